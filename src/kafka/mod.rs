pub mod client;
pub mod consumer;
#[cfg(test)]
pub mod mock;

pub use client::{KafkaClient, TopicPartition};

use crate::error::Result;
use std::time::Duration;

/// Total bytes one fetch request may return; the per-partition budget is
/// capped by it.
pub const MAX_FETCH_BYTES: usize = 1_048_576;

/// Bounds applied to every record fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchLimits {
    pub max_wait: Duration,
    pub max_bytes: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedRecord {
    pub offset: i64,
    pub payload: Option<Vec<u8>>,
}

/// Broker operations the lag engine needs.
///
/// Every method may block on the network and is called from the blocking
/// pool. One instance is shared by all partition and pair tasks of a run, so
/// implementations must tolerate concurrent callers.
pub trait BrokerClient: Send + Sync + 'static {
    type Offsets: GroupOffsets;

    /// Partition ids of `topic`. An unknown topic is an error.
    fn partitions(&self, topic: &str) -> Result<Vec<i32>>;

    /// Offset manager positioned for `group_id`.
    fn offset_manager(&self, group_id: &str) -> Result<Self::Offsets>;

    /// Offset the next produced record will get (high watermark).
    fn newest_offset(&self, tp: &TopicPartition) -> Result<i64>;

    /// Oldest offset still retained (low watermark).
    fn oldest_offset(&self, tp: &TopicPartition) -> Result<i64>;

    /// Broker id currently leading the partition.
    fn leader(&self, tp: &TopicPartition) -> Result<i32>;

    /// Records starting at `offset`, bounded by the client's [`FetchLimits`].
    /// An empty vector means nothing arrived within the wait time.
    fn fetch_records(&self, tp: &TopicPartition, offset: i64) -> Result<Vec<FetchedRecord>>;
}

pub trait GroupOffsets: Send + Sync + 'static {
    fn group_id(&self) -> &str;

    /// Next offset the group would consume, `None` if it never committed on
    /// this partition.
    fn next_offset(&self, tp: &TopicPartition) -> Result<Option<i64>>;
}
