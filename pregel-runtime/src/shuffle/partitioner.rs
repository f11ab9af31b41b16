use pregel_common::error::{PregelError, PregelResult};
use pregel_common::types::{ShardId, VertexId, WorkerId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub fn partition_of_bytes(id: &[u8], partitions: usize) -> usize {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::Hasher;
    let mut h = DefaultHasher::new();
    h.write(id);
    (h.finish() as usize) % partitions.max(1)
}

/// Cluster-wide shard to worker assignment of one execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ShardLayout {
    owners: BTreeMap<ShardId, WorkerId>,
}

impl ShardLayout {
    pub fn new() -> Self {
        Self::default()
    }

    /// `shards_per_worker` shards per worker, named `s<n>` in worker order.
    pub fn round_robin(workers: &[WorkerId], shards_per_worker: usize) -> PregelResult<Self> {
        if workers.is_empty() || shards_per_worker == 0 {
            return Err(PregelError::Config(
                "layout needs at least one worker and one shard per worker".to_string(),
            ));
        }
        let mut layout = Self::new();
        let mut n = 0usize;
        for _ in 0..shards_per_worker {
            for worker in workers {
                layout.assign(ShardId::new(format!("s{n:04}")), worker.clone());
                n += 1;
            }
        }
        Ok(layout)
    }

    pub fn assign(&mut self, shard: ShardId, worker: WorkerId) {
        self.owners.insert(shard, worker);
    }

    pub fn owner(&self, shard: &ShardId) -> PregelResult<&WorkerId> {
        self.owners
            .get(shard)
            .ok_or_else(|| PregelError::UnknownShard(shard.to_string()))
    }

    pub fn shard_count(&self) -> usize {
        self.owners.len()
    }

    pub fn shards_of(&self, worker: &WorkerId) -> BTreeSet<ShardId> {
        self.owners
            .iter()
            .filter(|(_, w)| *w == worker)
            .map(|(s, _)| s.clone())
            .collect()
    }

    pub fn workers(&self) -> BTreeSet<WorkerId> {
        self.owners.values().cloned().collect()
    }

    /// Hash-partitions a vertex key onto the shard list.
    pub fn shard_for_key(&self, key: &str) -> PregelResult<ShardId> {
        if self.owners.is_empty() {
            return Err(PregelError::Config("layout has no shards".to_string()));
        }
        let index = partition_of_bytes(key.as_bytes(), self.owners.len());
        self.owners
            .keys()
            .nth(index)
            .cloned()
            .ok_or_else(|| PregelError::Internal(format!("shard index {index} out of range")))
    }

    pub fn vertex_id(&self, key: &str) -> PregelResult<VertexId> {
        Ok(VertexId::new(self.shard_for_key(key)?, key))
    }
}
