use crate::error::{KlagError, Result};
use crate::kafka::client::TopicPartition;
use crate::kafka::{FetchLimits, FetchedRecord, MAX_FETCH_BYTES};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, Consumer};
use rdkafka::message::Message;
use rdkafka::{Offset, TopicPartitionList};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, instrument, trace, warn};

/// Pool of reusable `BaseConsumer`s used for bounded record fetches, so
/// concurrent partition fetches do not each pay a fresh connection handshake.
pub struct RecordFetcher {
    base_config: ClientConfig,
    limits: FetchLimits,
    consumer_counter: AtomicU64,
    pool: Mutex<Vec<BaseConsumer>>,
    pool_size: usize,
}

impl RecordFetcher {
    pub fn with_pool_size(
        base_config: &ClientConfig,
        limits: FetchLimits,
        pool_size: usize,
    ) -> Result<Self> {
        let mut fetcher = Self {
            base_config: base_config.clone(),
            limits,
            consumer_counter: AtomicU64::new(0),
            pool: Mutex::new(Vec::with_capacity(pool_size)),
            pool_size,
        };

        for _ in 0..pool_size {
            let c = fetcher.create_consumer()?;
            fetcher
                .pool
                .get_mut()
                .unwrap_or_else(PoisonError::into_inner)
                .push(c);
        }

        debug!(
            pool_size = pool_size,
            max_wait = ?limits.max_wait,
            max_bytes = limits.max_bytes,
            "Created record fetcher pool"
        );

        Ok(fetcher)
    }

    fn create_consumer(&self) -> Result<BaseConsumer> {
        let counter = self.consumer_counter.fetch_add(1, Ordering::Relaxed);

        self.base_config
            .clone()
            .set("client.id", format!("klag-probe-fetch-{counter}"))
            .set("group.id", "klag-probe-fetch")
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            // Out-of-range start offsets jump to the end and come back empty
            .set("auto.offset.reset", "latest")
            .set("fetch.max.bytes", MAX_FETCH_BYTES.to_string())
            .set("max.partition.fetch.bytes", self.limits.max_bytes.to_string())
            .create()
            .map_err(KlagError::Kafka)
    }

    /// Take a consumer from the pool, or create a temporary one when more
    /// fetches run concurrently than the pool holds.
    fn acquire(&self) -> Result<BaseConsumer> {
        self.pool
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .map_or_else(|| self.create_consumer(), Ok)
    }

    fn release(&self, consumer: BaseConsumer) {
        let empty = TopicPartitionList::new();
        if let Err(e) = consumer.assign(&empty) {
            warn!(error = %e, "Failed to unassign consumer before returning to pool");
            return;
        }

        let mut pool = self.pool.lock().unwrap_or_else(PoisonError::into_inner);
        if pool.len() < self.pool_size {
            pool.push(consumer);
        }
    }

    /// Fetch the first record at or after `offset`. Waits at most
    /// `max_wait`; an empty result means the partition had nothing there.
    #[instrument(skip(self), fields(topic = %tp.topic, partition = tp.partition, offset = offset))]
    pub fn fetch(&self, tp: &TopicPartition, offset: i64) -> Result<Vec<FetchedRecord>> {
        let consumer = self.acquire()?;

        // Returns the consumer to the pool on every exit path.
        struct PoolGuard<'a> {
            consumer: Option<BaseConsumer>,
            pool: &'a RecordFetcher,
        }
        impl Drop for PoolGuard<'_> {
            fn drop(&mut self) {
                if let Some(consumer) = self.consumer.take() {
                    self.pool.release(consumer);
                }
            }
        }

        let guard = PoolGuard {
            consumer: Some(consumer),
            pool: self,
        };
        let Some(consumer) = guard.consumer.as_ref() else {
            return Ok(Vec::new());
        };

        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(&tp.topic, tp.partition, Offset::Offset(offset))
            .map_err(|e| KlagError::Fetch(format!("fetch position for {tp}: {e}")))?;

        consumer
            .assign(&tpl)
            .map_err(|e| KlagError::Fetch(format!("assign {tp}: {e}")))?;

        // Bound to a local so the borrowed message is gone before `guard` drops.
        let records = match consumer.poll(self.limits.max_wait) {
            None => {
                debug!("No record available within the wait time");
                Ok(Vec::new())
            }
            Some(Ok(msg)) => {
                trace!(
                    requested_offset = offset,
                    actual_offset = msg.offset(),
                    payload_len = msg.payload_len(),
                    "Fetched record"
                );
                Ok(vec![FetchedRecord {
                    offset: msg.offset(),
                    payload: msg.payload().map(<[u8]>::to_vec),
                }])
            }
            Some(Err(e)) => {
                warn!(error = %e, "Failed to fetch record");
                Err(KlagError::Fetch(format!("fetch {tp} at offset {offset}: {e}")))
            }
        };
        records
    }
}

impl std::fmt::Debug for RecordFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordFetcher")
            .field("limits", &self.limits)
            .field("pool_size", &self.pool_size)
            .finish_non_exhaustive()
    }
}
