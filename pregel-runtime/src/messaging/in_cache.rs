use crate::distributed::protocol::{decode, MessageBatch};
use dashmap::DashMap;
use pregel_api::{Combiner, MessageValue};
use pregel_common::error::PregelResult;
use pregel_common::types::VertexId;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Messages waiting for their destination vertex.
///
/// Inserts from the local job and from the network path may race; both go
/// through the map's shard locks.
pub trait IncomingCache<M>: Send + Sync {
    fn set_direct(&self, target: &VertexId, message: M);

    /// Removes and returns everything pending for `target`.
    fn take_messages(&self, target: &VertexId) -> Vec<M>;

    fn has_messages(&self, target: &VertexId) -> bool;

    fn pending_vertices(&self) -> u64;

    fn received_count(&self) -> u64;

    fn clear(&self);

    fn parse_messages(&self, batch: &MessageBatch) -> PregelResult<()>
    where
        M: MessageValue,
    {
        for (key, bytes) in &batch.messages {
            let message: M = decode(bytes)?;
            let target = VertexId::new(batch.shard.clone(), key.clone());
            self.set_direct(&target, message);
        }
        Ok(())
    }
}

/// Keeps every message as its own entry, in arrival order.
pub struct ArrayInCache<M> {
    messages: DashMap<VertexId, Vec<M>>,
    received: AtomicU64,
}

impl<M> ArrayInCache<M> {
    pub fn new() -> Self {
        Self {
            messages: DashMap::new(),
            received: AtomicU64::new(0),
        }
    }
}

impl<M> Default for ArrayInCache<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Send + Sync> IncomingCache<M> for ArrayInCache<M> {
    fn set_direct(&self, target: &VertexId, message: M) {
        self.messages
            .entry(target.clone())
            .or_default()
            .push(message);
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    fn take_messages(&self, target: &VertexId) -> Vec<M> {
        self.messages
            .remove(target)
            .map(|(_, msgs)| msgs)
            .unwrap_or_default()
    }

    fn has_messages(&self, target: &VertexId) -> bool {
        self.messages.contains_key(target)
    }

    fn pending_vertices(&self) -> u64 {
        self.messages.len() as u64
    }

    fn received_count(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    fn clear(&self) {
        self.messages.clear();
        self.received.store(0, Ordering::Relaxed);
    }
}

/// Holds at most one combined message per vertex.
pub struct CombiningInCache<M> {
    messages: DashMap<VertexId, Option<M>>,
    combiner: Arc<dyn Combiner<M>>,
    received: AtomicU64,
}

impl<M> CombiningInCache<M> {
    pub fn new(combiner: Arc<dyn Combiner<M>>) -> Self {
        Self {
            messages: DashMap::new(),
            combiner,
            received: AtomicU64::new(0),
        }
    }
}

impl<M: Send + Sync> IncomingCache<M> for CombiningInCache<M> {
    fn set_direct(&self, target: &VertexId, message: M) {
        let mut slot = self.messages.entry(target.clone()).or_insert(None);
        let combined = match slot.take() {
            Some(current) => self.combiner.combine(current, message),
            None => message,
        };
        *slot = Some(combined);
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    fn take_messages(&self, target: &VertexId) -> Vec<M> {
        self.messages
            .remove(target)
            .and_then(|(_, msg)| msg)
            .into_iter()
            .collect()
    }

    fn has_messages(&self, target: &VertexId) -> bool {
        self.messages.contains_key(target)
    }

    fn pending_vertices(&self) -> u64 {
        self.messages.len() as u64
    }

    fn received_count(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    fn clear(&self) {
        self.messages.clear();
        self.received.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::protocol::encode;
    use pregel_api::SumCombiner;
    use pregel_common::types::{ExecutionNumber, ShardId, WorkerId};
    use std::thread;

    fn vid(key: &str) -> VertexId {
        VertexId::new(ShardId::new("s1"), key)
    }

    #[test]
    fn array_cache_keeps_duplicates() {
        let cache = ArrayInCache::new();
        cache.set_direct(&vid("3"), 5i64);
        cache.set_direct(&vid("3"), 5i64);
        assert_eq!(cache.received_count(), 2);
        assert_eq!(cache.take_messages(&vid("3")), vec![5, 5]);
        assert!(cache.take_messages(&vid("3")).is_empty());
    }

    #[test]
    fn combining_cache_folds_concurrent_inserts() {
        let cache = Arc::new(CombiningInCache::new(
            Arc::new(SumCombiner) as Arc<dyn Combiner<i64>>
        ));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                thread::spawn(move || {
                    for i in 1..=100i64 {
                        cache.set_direct(&vid("hot"), i);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(cache.received_count(), 800);
        assert_eq!(cache.pending_vertices(), 1);
        assert_eq!(cache.take_messages(&vid("hot")), vec![8 * 5050]);
    }

    #[test]
    fn parse_messages_decodes_a_batch() {
        let cache = ArrayInCache::<u64>::new();
        let batch = MessageBatch {
            execution: ExecutionNumber(1),
            gss: 0,
            epoch: 0,
            sender: WorkerId::new("a"),
            shard: ShardId::new("s1"),
            messages: vec![
                ("3".to_string(), encode(&5u64).unwrap()),
                ("3".to_string(), encode(&7u64).unwrap()),
            ],
        };
        cache.parse_messages(&batch).unwrap();
        assert!(cache.has_messages(&vid("3")));
        assert_eq!(cache.take_messages(&vid("3")), vec![5, 7]);
    }
}
