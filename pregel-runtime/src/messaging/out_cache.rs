use crate::distributed::protocol::{encode, MessageBatch};
use crate::distributed::transport::{Delivery, Transport};
use crate::messaging::in_cache::IncomingCache;
use crate::worker::context::WorkerConfig;
use pregel_api::{Combiner, MessageValue};
use pregel_common::error::PregelResult;
use pregel_common::types::{GlobalSuperstep, ShardId, VertexId};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Sender-side buffer of one running job.
///
/// Messages for local vertices skip the buffer and land in the local write
/// cache. Everything else is grouped by destination shard until flushed.
pub trait OutgoingCache<M>: Send {
    fn append_message(&mut self, target: &VertexId, message: M) -> PregelResult<()>;

    /// Hands every non-empty shard bucket to the transport and clears it.
    fn flush_messages(&mut self) -> PregelResult<()>;

    /// Messages handed to the transport so far.
    fn send_count(&self) -> u64;

    fn local_count(&self) -> u64;

    fn buffered(&self) -> usize;

    fn take_deliveries(&mut self) -> Vec<Delivery>;
}

struct Routing<M> {
    config: Arc<WorkerConfig>,
    local: Arc<dyn IncomingCache<M>>,
    transport: Arc<dyn Transport>,
    gss: GlobalSuperstep,
    epoch: u64,
    send_count: u64,
    local_count: u64,
    deliveries: Vec<Delivery>,
}

impl<M: MessageValue> Routing<M> {
    fn new(
        config: Arc<WorkerConfig>,
        local: Arc<dyn IncomingCache<M>>,
        transport: Arc<dyn Transport>,
        gss: GlobalSuperstep,
        epoch: u64,
    ) -> Self {
        Self {
            config,
            local,
            transport,
            gss,
            epoch,
            send_count: 0,
            local_count: 0,
            deliveries: Vec::new(),
        }
    }

    /// Delivers locally and returns `None`, or hands the message back for buffering.
    fn route_local(&mut self, target: &VertexId, message: M) -> PregelResult<Option<M>> {
        if self.config.is_local_vertex_shard(&target.shard)? {
            self.local.set_direct(target, message);
            self.local_count += 1;
            Ok(None)
        } else {
            Ok(Some(message))
        }
    }

    fn ship(&mut self, shard: ShardId, messages: Vec<(String, Vec<u8>)>) -> PregelResult<()> {
        let worker = self.config.responsible_worker(&shard)?.clone();
        debug!(
            execution = %self.config.execution,
            gss = self.gss,
            %shard,
            %worker,
            count = messages.len(),
            "flushing message batch"
        );
        self.send_count += messages.len() as u64;
        let batch = MessageBatch {
            execution: self.config.execution,
            gss: self.gss,
            epoch: self.epoch,
            sender: self.config.worker_id.clone(),
            shard,
            messages,
        };
        self.deliveries.push(self.transport.send(&worker, batch));
        Ok(())
    }
}

/// Encodes a whole bucket up front so a failure leaves it buffered.
fn encode_bucket<'a, M: MessageValue>(
    messages: impl Iterator<Item = (&'a String, &'a M)>,
) -> PregelResult<Vec<(String, Vec<u8>)>> {
    messages
        .map(|(key, m)| Ok((key.clone(), encode(m)?)))
        .collect()
}

/// Preserves every message as a distinct entry.
pub struct ArrayOutCache<M> {
    routing: Routing<M>,
    buckets: HashMap<ShardId, Vec<(String, M)>>,
    buffered: usize,
}

impl<M: MessageValue> ArrayOutCache<M> {
    pub fn new(
        config: Arc<WorkerConfig>,
        local: Arc<dyn IncomingCache<M>>,
        transport: Arc<dyn Transport>,
        gss: GlobalSuperstep,
        epoch: u64,
    ) -> Self {
        Self {
            routing: Routing::new(config, local, transport, gss, epoch),
            buckets: HashMap::new(),
            buffered: 0,
        }
    }
}

impl<M: MessageValue> OutgoingCache<M> for ArrayOutCache<M> {
    fn append_message(&mut self, target: &VertexId, message: M) -> PregelResult<()> {
        let Some(message) = self.routing.route_local(target, message)? else {
            return Ok(());
        };
        self.buckets
            .entry(target.shard.clone())
            .or_default()
            .push((target.key.clone(), message));
        self.buffered += 1;
        if self.buffered >= self.routing.config.params.message_batch_size {
            self.flush_messages()?;
        }
        Ok(())
    }

    fn flush_messages(&mut self) -> PregelResult<()> {
        let shards: Vec<ShardId> = self.buckets.keys().cloned().collect();
        for shard in shards {
            let encoded = match self.buckets.get(&shard) {
                Some(messages) => encode_bucket(messages.iter().map(|(k, m)| (k, m)))?,
                None => continue,
            };
            self.buckets.remove(&shard);
            self.buffered = self.buffered.saturating_sub(encoded.len());
            if !encoded.is_empty() {
                self.routing.ship(shard, encoded)?;
            }
        }
        Ok(())
    }

    fn send_count(&self) -> u64 {
        self.routing.send_count
    }

    fn local_count(&self) -> u64 {
        self.routing.local_count
    }

    fn buffered(&self) -> usize {
        self.buffered
    }

    fn take_deliveries(&mut self) -> Vec<Delivery> {
        std::mem::take(&mut self.routing.deliveries)
    }
}

/// Reduces messages per destination vertex before they leave the worker.
pub struct CombiningOutCache<M> {
    routing: Routing<M>,
    combiner: Arc<dyn Combiner<M>>,
    buckets: HashMap<ShardId, HashMap<String, M>>,
    buffered: usize,
}

impl<M: MessageValue> CombiningOutCache<M> {
    pub fn new(
        config: Arc<WorkerConfig>,
        local: Arc<dyn IncomingCache<M>>,
        transport: Arc<dyn Transport>,
        gss: GlobalSuperstep,
        epoch: u64,
        combiner: Arc<dyn Combiner<M>>,
    ) -> Self {
        Self {
            routing: Routing::new(config, local, transport, gss, epoch),
            combiner,
            buckets: HashMap::new(),
            buffered: 0,
        }
    }
}

impl<M: MessageValue> OutgoingCache<M> for CombiningOutCache<M> {
    fn append_message(&mut self, target: &VertexId, message: M) -> PregelResult<()> {
        let Some(message) = self.routing.route_local(target, message)? else {
            return Ok(());
        };
        let bucket = self.buckets.entry(target.shard.clone()).or_default();
        let combined = match bucket.remove(&target.key) {
            Some(current) => self.combiner.combine(current, message),
            None => {
                self.buffered += 1;
                message
            }
        };
        bucket.insert(target.key.clone(), combined);
        if self.buffered >= self.routing.config.params.message_batch_size {
            self.flush_messages()?;
        }
        Ok(())
    }

    fn flush_messages(&mut self) -> PregelResult<()> {
        let shards: Vec<ShardId> = self.buckets.keys().cloned().collect();
        for shard in shards {
            let encoded = match self.buckets.get(&shard) {
                Some(messages) => encode_bucket(messages.iter())?,
                None => continue,
            };
            self.buckets.remove(&shard);
            self.buffered = self.buffered.saturating_sub(encoded.len());
            if !encoded.is_empty() {
                self.routing.ship(shard, encoded)?;
            }
        }
        Ok(())
    }

    fn send_count(&self) -> u64 {
        self.routing.send_count
    }

    fn local_count(&self) -> u64 {
        self.routing.local_count
    }

    fn buffered(&self) -> usize {
        self.buffered
    }

    fn take_deliveries(&mut self) -> Vec<Delivery> {
        std::mem::take(&mut self.routing.deliveries)
    }
}
