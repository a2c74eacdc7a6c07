use crate::decode::TimestampDecoder;
use crate::error::{KlagError, Result};
use crate::kafka::{BrokerClient, TopicPartition};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Reads back the producer timestamp of the record nearest to a group's
/// committed offset. Brokers expose no "time since last write" per partition,
/// so this relies on every payload carrying its own timestamp.
pub struct TimestampExtractor<C: BrokerClient> {
    client: Arc<C>,
    decoder: Arc<dyn TimestampDecoder>,
    rewind: i64,
}

impl<C: BrokerClient> TimestampExtractor<C> {
    pub fn new(client: Arc<C>, decoder: Arc<dyn TimestampDecoder>, rewind: i64) -> Self {
        Self {
            client,
            decoder,
            rewind,
        }
    }

    /// First offset of the fetch window. Starts a little before `committed`
    /// so a group sitting exactly at the newest offset still finds a record.
    pub const fn fetch_start(&self, committed: i64) -> i64 {
        let start = committed.saturating_sub(self.rewind);
        if start < 0 {
            0
        } else {
            start
        }
    }

    /// Blocking. Unix seconds of the first record in the window, or 0 when the
    /// window is empty.
    #[instrument(skip(self), fields(topic = %tp.topic, partition = tp.partition))]
    pub fn extract(&self, tp: &TopicPartition, committed: i64) -> Result<i64> {
        let leader = self.client.leader(tp)?;
        let start = self.fetch_start(committed);

        let records = self.client.fetch_records(tp, start)?;
        let Some(record) = records.first() else {
            debug!(leader = leader, start = start, "No records near committed offset");
            return Ok(0);
        };

        let payload = record.payload.as_deref().ok_or_else(|| {
            KlagError::Decode(format!(
                "record {tp}@{} has no payload, message is missing timestamp",
                record.offset
            ))
        })?;

        let timestamp = self
            .decoder
            .decode_timestamp(payload)?
            .ok_or_else(|| {
                KlagError::Decode(format!(
                    "record {tp}@{}: message is missing timestamp",
                    record.offset
                ))
            })?;

        let timestamp = i64::try_from(timestamp).map_err(|_| {
            KlagError::Decode(format!(
                "record {tp}@{}: timestamp {timestamp} out of range",
                record.offset
            ))
        })?;

        debug!(
            leader = leader,
            start = start,
            record_offset = record.offset,
            timestamp = timestamp,
            "Extracted record timestamp"
        );
        Ok(timestamp)
    }
}
