//! Per-worker message buffers.
//!
//! Incoming caches hold messages per destination vertex and are shared
//! between the local job and the network receive path. Outgoing caches are
//! owned by one running job and group messages per destination shard.

pub mod in_cache;
pub mod out_cache;

pub use in_cache::{ArrayInCache, CombiningInCache, IncomingCache};
pub use out_cache::{ArrayOutCache, CombiningOutCache, OutgoingCache};

use crate::distributed::transport::Transport;
use crate::worker::context::WorkerConfig;
use pregel_api::{Combiner, MessageValue};
use pregel_common::types::GlobalSuperstep;
use std::sync::Arc;

pub fn new_incoming_cache<M: MessageValue>(
    combiner: Option<Arc<dyn Combiner<M>>>,
) -> Arc<dyn IncomingCache<M>> {
    match combiner {
        Some(combiner) => Arc::new(CombiningInCache::new(combiner)),
        None => Arc::new(ArrayInCache::new()),
    }
}

pub fn new_outgoing_cache<M: MessageValue>(
    config: Arc<WorkerConfig>,
    local: Arc<dyn IncomingCache<M>>,
    transport: Arc<dyn Transport>,
    gss: GlobalSuperstep,
    epoch: u64,
    combiner: Option<Arc<dyn Combiner<M>>>,
) -> Box<dyn OutgoingCache<M>> {
    match combiner {
        Some(combiner) => Box::new(CombiningOutCache::new(
            config, local, transport, gss, epoch, combiner,
        )),
        None => Box::new(ArrayOutCache::new(config, local, transport, gss, epoch)),
    }
}
