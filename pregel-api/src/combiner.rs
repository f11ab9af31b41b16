use std::ops::Add;

/// Merges two messages addressed to the same vertex in the same superstep.
///
/// Implementations must give the same final value for any fold order of the
/// messages they see, since arrival order across workers is not defined.
pub trait Combiner<M>: Send + Sync {
    fn combine(&self, first: M, second: M) -> M;
}

/// Adapts a closure into a [`Combiner`].
pub struct FnCombiner<F>(pub F);

impl<M, F> Combiner<M> for FnCombiner<F>
where
    F: Fn(M, M) -> M + Send + Sync,
{
    fn combine(&self, first: M, second: M) -> M {
        (self.0)(first, second)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SumCombiner;

impl<M> Combiner<M> for SumCombiner
where
    M: Add<Output = M>,
{
    fn combine(&self, first: M, second: M) -> M {
        first + second
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MinCombiner;

impl<M> Combiner<M> for MinCombiner
where
    M: PartialOrd,
{
    fn combine(&self, first: M, second: M) -> M {
        if second < first {
            second
        } else {
            first
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MaxCombiner;

impl<M> Combiner<M> for MaxCombiner
where
    M: PartialOrd,
{
    fn combine(&self, first: M, second: M) -> M {
        if second > first {
            second
        } else {
            first
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fold<C: Combiner<i64>>(combiner: &C, messages: &[i64]) -> i64 {
        let mut it = messages.iter().copied();
        let first = it.next().unwrap();
        it.fold(first, |acc, m| combiner.combine(acc, m))
    }

    #[test]
    fn fold_order_does_not_change_result() {
        let forward = [5i64, 7, -3, 11, 2];
        let mut backward = forward;
        backward.reverse();
        let shuffled = [11i64, 2, 5, -3, 7];

        for orders in [&forward, &backward, &shuffled] {
            assert_eq!(fold(&SumCombiner, orders), 22);
            assert_eq!(fold(&MinCombiner, orders), -3);
            assert_eq!(fold(&MaxCombiner, orders), 11);
        }
    }

    #[test]
    fn closure_combiner() {
        let c = FnCombiner(|a: u32, b: u32| a | b);
        assert_eq!(c.combine(0b01, 0b10), 0b11);
    }
}
