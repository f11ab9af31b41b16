use crate::messaging::{new_incoming_cache, IncomingCache};
use crate::shuffle::partitioner::ShardLayout;
use pregel_api::{Combiner, MessageValue};
use pregel_common::config::{self, Configuration};
use pregel_common::error::{PregelError, PregelResult};
use pregel_common::types::{ExecutionNumber, GlobalSuperstep, ShardId, WorkerId};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, PartialEq)]
pub struct WorkerParams {
    pub message_batch_size: usize,
    pub store_results: bool,
}

impl Default for WorkerParams {
    fn default() -> Self {
        Self {
            message_batch_size: 4096,
            store_results: true,
        }
    }
}

impl WorkerParams {
    pub fn from_config(conf: &Configuration) -> PregelResult<Self> {
        let defaults = Self::default();
        let message_batch_size =
            conf.get_usize(config::MESSAGE_BATCH_SIZE, defaults.message_batch_size)?;
        if message_batch_size == 0 {
            return Err(PregelError::Config(format!(
                "{} must be positive",
                config::MESSAGE_BATCH_SIZE
            )));
        }
        Ok(Self {
            message_batch_size,
            store_results: conf.get_bool(config::STORE_RESULTS, defaults.store_results)?,
        })
    }
}

/// Static facts about one worker of one execution.
#[derive(Debug)]
pub struct WorkerConfig {
    pub execution: ExecutionNumber,
    pub worker_id: WorkerId,
    pub layout: ShardLayout,
    pub local_vertex_shards: BTreeSet<ShardId>,
    pub local_edge_shards: BTreeSet<ShardId>,
    pub params: WorkerParams,
}

impl WorkerConfig {
    pub fn new(
        execution: ExecutionNumber,
        worker_id: WorkerId,
        layout: ShardLayout,
        params: WorkerParams,
    ) -> PregelResult<Self> {
        let local = layout.shards_of(&worker_id);
        if local.is_empty() {
            return Err(PregelError::Config(format!(
                "worker {worker_id} owns no shards in execution {execution}"
            )));
        }
        Ok(Self {
            execution,
            worker_id,
            layout,
            local_edge_shards: local.clone(),
            local_vertex_shards: local,
            params,
        })
    }

    pub fn responsible_worker(&self, shard: &ShardId) -> PregelResult<&WorkerId> {
        self.layout.owner(shard)
    }

    /// Unknown shards are a routing error rather than "remote".
    pub fn is_local_vertex_shard(&self, shard: &ShardId) -> PregelResult<bool> {
        if self.local_vertex_shards.contains(shard) {
            return Ok(true);
        }
        self.layout.owner(shard)?;
        Ok(false)
    }
}

struct CachePair<M> {
    read: Arc<dyn IncomingCache<M>>,
    write: Arc<dyn IncomingCache<M>>,
}

/// Mutable per-execution state: current superstep, recovery epoch and the
/// incoming cache pair.
pub struct WorkerContext<M> {
    config: Arc<WorkerConfig>,
    gss: AtomicU64,
    epoch: AtomicU64,
    combiner: Option<Arc<dyn Combiner<M>>>,
    caches: Mutex<CachePair<M>>,
}

impl<M: MessageValue> WorkerContext<M> {
    pub fn new(config: Arc<WorkerConfig>, combiner: Option<Arc<dyn Combiner<M>>>) -> Self {
        Self {
            config,
            gss: AtomicU64::new(0),
            epoch: AtomicU64::new(0),
            caches: Mutex::new(CachePair {
                read: new_incoming_cache(combiner.clone()),
                write: new_incoming_cache(combiner.clone()),
            }),
            combiner,
        }
    }

    pub fn config(&self) -> &Arc<WorkerConfig> {
        &self.config
    }

    pub fn global_superstep(&self) -> GlobalSuperstep {
        self.gss.load(Ordering::SeqCst)
    }

    pub fn set_global_superstep(&self, gss: GlobalSuperstep) {
        self.gss.store(gss, Ordering::SeqCst);
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Enters a new recovery epoch with a fresh cache pair. A batch accepted
    /// under the old epoch can only land in the discarded pair.
    pub fn begin_epoch(&self, epoch: u64) {
        let mut caches = self.lock();
        self.epoch.store(epoch, Ordering::SeqCst);
        caches.read = new_incoming_cache(self.combiner.clone());
        caches.write = new_incoming_cache(self.combiner.clone());
    }

    /// The write cache for a batch sent in `epoch`; stale epochs are rejected.
    pub fn write_cache_for(&self, epoch: u64) -> PregelResult<Arc<dyn IncomingCache<M>>> {
        let caches = self.lock();
        let current = self.epoch();
        if epoch != current {
            return Err(PregelError::StaleEpoch {
                expected: current,
                actual: epoch,
            });
        }
        Ok(caches.write.clone())
    }

    pub fn read_cache(&self) -> Arc<dyn IncomingCache<M>> {
        self.lock().read.clone()
    }

    pub fn write_cache(&self) -> Arc<dyn IncomingCache<M>> {
        self.lock().write.clone()
    }

    /// Only valid at the barrier, while no job holds the read cache.
    pub fn swap_incoming_caches(&self) {
        let mut caches = self.lock();
        let pair = &mut *caches;
        std::mem::swap(&mut pair.read, &mut pair.write);
        pair.write.clear();
    }

    pub fn clear_all(&self) {
        let caches = self.lock();
        caches.read.clear();
        caches.write.clear();
    }

    fn lock(&self) -> MutexGuard<'_, CachePair<M>> {
        self.caches
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
