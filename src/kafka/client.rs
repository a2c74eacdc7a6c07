use crate::config::KafkaConfig;
use crate::error::{KlagError, Result};
use crate::kafka::consumer::RecordFetcher;
use crate::kafka::{BrokerClient, FetchLimits, FetchedRecord, GroupOffsets};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, Consumer};
use rdkafka::metadata::{Metadata, MetadataPartition};
use rdkafka::{Offset, TopicPartitionList};
use std::fmt;
use std::time::Duration;
use tracing::{debug, instrument};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: i32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.topic, self.partition)
    }
}

/// `rdkafka`-backed broker client. One metadata consumer answers partition,
/// leader and watermark queries; record fetches go through a pooled
/// [`RecordFetcher`]; each group gets its own [`GroupOffsetManager`].
pub struct KafkaClient {
    base_config: ClientConfig,
    consumer: BaseConsumer,
    fetcher: RecordFetcher,
    timeout: Duration,
}

impl KafkaClient {
    pub fn new(config: &KafkaConfig, limits: FetchLimits) -> Result<Self> {
        let mut base_config = ClientConfig::new();
        base_config.set("bootstrap.servers", config.broker_list().join(","));
        base_config.set("client.id", "klag-probe");

        for (key, value) in &config.consumer_properties {
            base_config.set(key, value);
        }

        let consumer: BaseConsumer = base_config
            .clone()
            .set("group.id", "klag-probe-internal")
            .set("enable.auto.commit", "false")
            .create()
            .map_err(KlagError::Kafka)?;

        let fetcher = RecordFetcher::with_pool_size(&base_config, limits, config.fetch_pool_size)?;

        debug!(
            brokers = %config.bootstrap_servers,
            timeout = ?config.timeout,
            "Created Kafka client"
        );

        Ok(Self {
            base_config,
            consumer,
            fetcher,
            timeout: config.timeout,
        })
    }

    fn topic_metadata(&self, topic: &str) -> Result<Metadata> {
        self.consumer
            .fetch_metadata(Some(topic), self.timeout)
            .map_err(|e| KlagError::Resolution(format!("metadata for topic '{topic}': {e}")))
    }

    fn watermarks(&self, tp: &TopicPartition) -> Result<(i64, i64)> {
        self.consumer
            .fetch_watermarks(&tp.topic, tp.partition, self.timeout)
            .map_err(|e| KlagError::Resolution(format!("offsets for {tp}: {e}")))
    }
}

fn find_partition<'a>(
    metadata: &'a Metadata,
    tp: &TopicPartition,
) -> Option<&'a MetadataPartition> {
    metadata
        .topics()
        .iter()
        .find(|t| t.name() == tp.topic)?
        .partitions()
        .iter()
        .find(|p| p.id() == tp.partition)
}

impl BrokerClient for KafkaClient {
    type Offsets = GroupOffsetManager;

    #[instrument(skip(self))]
    fn partitions(&self, topic: &str) -> Result<Vec<i32>> {
        let metadata = self.topic_metadata(topic)?;

        let topic_metadata = metadata
            .topics()
            .iter()
            .find(|t| t.name() == topic)
            .ok_or_else(|| KlagError::Resolution(format!("topic '{topic}' not found")))?;

        if let Some(err) = topic_metadata.error() {
            return Err(KlagError::Resolution(format!(
                "topic '{topic}' unavailable: {err:?}"
            )));
        }

        let mut partitions: Vec<i32> = topic_metadata.partitions().iter().map(|p| p.id()).collect();
        partitions.sort_unstable();

        debug!(count = partitions.len(), "Listed topic partitions");
        Ok(partitions)
    }

    #[instrument(skip(self))]
    fn offset_manager(&self, group_id: &str) -> Result<GroupOffsetManager> {
        let consumer: BaseConsumer = self
            .base_config
            .clone()
            .set("group.id", group_id)
            .set("enable.auto.commit", "false")
            .create()
            .map_err(|e| {
                KlagError::Resolution(format!("offset manager for group '{group_id}': {e}"))
            })?;

        Ok(GroupOffsetManager {
            group_id: group_id.to_string(),
            consumer,
            timeout: self.timeout,
        })
    }

    fn newest_offset(&self, tp: &TopicPartition) -> Result<i64> {
        self.watermarks(tp).map(|(_, high)| high)
    }

    fn oldest_offset(&self, tp: &TopicPartition) -> Result<i64> {
        self.watermarks(tp).map(|(low, _)| low)
    }

    fn leader(&self, tp: &TopicPartition) -> Result<i32> {
        let metadata = self
            .consumer
            .fetch_metadata(Some(&tp.topic), self.timeout)
            .map_err(|e| KlagError::Fetch(format!("leader lookup for {tp}: {e}")))?;

        let partition = find_partition(&metadata, tp)
            .ok_or_else(|| KlagError::Fetch(format!("partition {tp} not found")))?;

        if let Some(err) = partition.error() {
            return Err(KlagError::Fetch(format!("partition {tp} unavailable: {err:?}")));
        }

        match partition.leader() {
            leader if leader >= 0 => Ok(leader),
            _ => Err(KlagError::Fetch(format!("partition {tp} has no leader"))),
        }
    }

    fn fetch_records(&self, tp: &TopicPartition, offset: i64) -> Result<Vec<FetchedRecord>> {
        self.fetcher.fetch(tp, offset)
    }
}

impl fmt::Debug for KafkaClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KafkaClient")
            .field("timeout", &self.timeout)
            .field("fetcher", &self.fetcher)
            .finish_non_exhaustive()
    }
}

/// Committed-offset view of one consumer group. The consumer carries the
/// group id but never subscribes, so it does not join the group.
pub struct GroupOffsetManager {
    group_id: String,
    consumer: BaseConsumer,
    timeout: Duration,
}

impl GroupOffsets for GroupOffsetManager {
    fn group_id(&self) -> &str {
        &self.group_id
    }

    #[instrument(skip(self), fields(group = %self.group_id, topic = %tp.topic, partition = tp.partition))]
    fn next_offset(&self, tp: &TopicPartition) -> Result<Option<i64>> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition(&tp.topic, tp.partition);

        let committed = self
            .consumer
            .committed_offsets(tpl, self.timeout)
            .map_err(|e| {
                KlagError::Resolution(format!(
                    "committed offset of group '{}' on {tp}: {e}",
                    self.group_id
                ))
            })?;

        let elem = committed
            .find_partition(&tp.topic, tp.partition)
            .ok_or_else(|| {
                KlagError::Resolution(format!(
                    "committed offset of group '{}' on {tp} missing from response",
                    self.group_id
                ))
            })?;

        if let Err(e) = elem.error() {
            return Err(KlagError::Resolution(format!(
                "committed offset of group '{}' on {tp}: {e}",
                self.group_id
            )));
        }

        match elem.offset() {
            Offset::Offset(offset) => Ok(Some(offset)),
            other => {
                debug!(offset = ?other, "No committed offset");
                Ok(None)
            }
        }
    }
}

impl fmt::Debug for GroupOffsetManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupOffsetManager")
            .field("group_id", &self.group_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_partition_display() {
        let tp = TopicPartition::new("orders", 3);
        assert_eq!(tp.to_string(), "orders/3");
    }

    #[test]
    fn test_topic_partition_equality_and_hash() {
        use std::collections::HashSet;

        let mut set = HashSet::new();
        set.insert(TopicPartition::new("orders", 0));
        set.insert(TopicPartition::new("orders", 0));
        set.insert(TopicPartition::new("orders", 1));
        assert_eq!(set.len(), 2);
    }
}
