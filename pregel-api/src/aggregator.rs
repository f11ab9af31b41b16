use pregel_common::error::{PregelError, PregelResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AggregatorKind {
    Sum,
    Min,
    Max,
    Or,
    And,
    Overwrite,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum AggregatorValue {
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl AggregatorValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AggregatorValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AggregatorValue::Float(v) => Some(*v),
            AggregatorValue::Int(v) => Some(*v as f64),
            AggregatorValue::Bool(_) => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AggregatorValue::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl AggregatorKind {
    pub fn reduce(
        self,
        current: AggregatorValue,
        incoming: AggregatorValue,
    ) -> PregelResult<AggregatorValue> {
        use AggregatorValue::{Bool, Float, Int};
        let reduced = match (self, current, incoming) {
            (AggregatorKind::Overwrite, _, v) => v,
            (AggregatorKind::Sum, Int(a), Int(b)) => Int(a.saturating_add(b)),
            (AggregatorKind::Sum, Float(a), Float(b)) => Float(a + b),
            (AggregatorKind::Min, Int(a), Int(b)) => Int(a.min(b)),
            (AggregatorKind::Min, Float(a), Float(b)) => Float(a.min(b)),
            (AggregatorKind::Max, Int(a), Int(b)) => Int(a.max(b)),
            (AggregatorKind::Max, Float(a), Float(b)) => Float(a.max(b)),
            (AggregatorKind::Or, Bool(a), Bool(b)) => Bool(a || b),
            (AggregatorKind::And, Bool(a), Bool(b)) => Bool(a && b),
            (kind, a, b) => {
                return Err(PregelError::InvalidArgument(format!(
                    "aggregator {kind:?} cannot reduce {a:?} with {b:?}"
                )))
            }
        };
        Ok(reduced)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct Slot {
    kind: AggregatorKind,
    value: Option<AggregatorValue>,
}

/// Named accumulators of one execution.
///
/// Workers hold a per-superstep delta, the conductor holds the merged global
/// snapshot that is shipped back to every worker at the next barrier.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Aggregators {
    slots: BTreeMap<String, Slot>,
}

impl Aggregators {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_declarations(declarations: &[(String, AggregatorKind)]) -> Self {
        let mut out = Self::new();
        for (name, kind) in declarations {
            out.declare(name.clone(), *kind);
        }
        out
    }

    pub fn declare(&mut self, name: impl Into<String>, kind: AggregatorKind) {
        self.slots
            .entry(name.into())
            .or_insert(Slot { kind, value: None });
    }

    pub fn aggregate(&mut self, name: &str, value: AggregatorValue) -> PregelResult<()> {
        let slot = self
            .slots
            .get_mut(name)
            .ok_or_else(|| PregelError::InvalidArgument(format!("unknown aggregator: {name}")))?;
        slot.value = Some(match slot.value {
            None => value,
            Some(current) => slot.kind.reduce(current, value)?,
        });
        Ok(())
    }

    pub fn value(&self, name: &str) -> Option<AggregatorValue> {
        self.slots.get(name).and_then(|s| s.value)
    }

    /// Folds every set value of `other` into `self`.
    pub fn merge(&mut self, other: &Aggregators) -> PregelResult<()> {
        for (name, slot) in &other.slots {
            self.declare(name.clone(), slot.kind);
            if let Some(value) = slot.value {
                self.aggregate(name, value)?;
            }
        }
        Ok(())
    }

    /// Same declarations, no values.
    pub fn empty_like(&self) -> Self {
        Self {
            slots: self
                .slots
                .iter()
                .map(|(name, slot)| {
                    (
                        name.clone(),
                        Slot {
                            kind: slot.kind,
                            value: None,
                        },
                    )
                })
                .collect(),
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.slots.keys().map(|s| s.as_str())
    }

    pub fn has_values(&self) -> bool {
        self.slots.values().any(|s| s.value.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_reduces_per_kind() {
        let decl = vec![
            ("sum".to_string(), AggregatorKind::Sum),
            ("max".to_string(), AggregatorKind::Max),
            ("any".to_string(), AggregatorKind::Or),
        ];
        let mut a = Aggregators::from_declarations(&decl);
        a.aggregate("sum", AggregatorValue::Int(3)).unwrap();
        a.aggregate("max", AggregatorValue::Float(0.5)).unwrap();

        let mut b = a.empty_like();
        b.aggregate("sum", AggregatorValue::Int(4)).unwrap();
        b.aggregate("max", AggregatorValue::Float(0.25)).unwrap();
        b.aggregate("any", AggregatorValue::Bool(true)).unwrap();

        a.merge(&b).unwrap();
        assert_eq!(a.value("sum"), Some(AggregatorValue::Int(7)));
        assert_eq!(a.value("max"), Some(AggregatorValue::Float(0.5)));
        assert_eq!(a.value("any"), Some(AggregatorValue::Bool(true)));
        assert!(a.empty_like().value("sum").is_none());
    }

    #[test]
    fn unknown_name_and_type_mismatch_are_rejected() {
        let mut a = Aggregators::new();
        assert!(a.aggregate("nope", AggregatorValue::Int(1)).is_err());

        a.declare("sum", AggregatorKind::Sum);
        a.aggregate("sum", AggregatorValue::Int(1)).unwrap();
        assert!(a.aggregate("sum", AggregatorValue::Bool(true)).is_err());
    }
}
