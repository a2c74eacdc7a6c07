//! In-memory broker used by the coordinator tests.

use crate::error::{KlagError, Result};
use crate::kafka::{BrokerClient, FetchedRecord, GroupOffsets, TopicPartition};
use rmpv::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, Default)]
struct MockPartition {
    oldest: i64,
    newest: i64,
    records: BTreeMap<i64, Option<Vec<u8>>>,
    delay: Option<Duration>,
}

#[derive(Debug, Default)]
pub struct MockBroker {
    topics: HashMap<String, BTreeMap<i32, MockPartition>>,
    committed: HashMap<String, HashMap<TopicPartition, i64>>,
    broken_offsets: HashSet<TopicPartition>,
    broken_groups: HashSet<String>,
    fetch_log: Mutex<Vec<(TopicPartition, i64)>>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_topic(mut self, topic: &str) -> Self {
        self.topics.entry(topic.to_string()).or_default();
        self
    }

    pub fn with_partition(mut self, topic: &str, partition: i32, newest: i64) -> Self {
        let entry = self
            .topics
            .entry(topic.to_string())
            .or_default()
            .entry(partition)
            .or_default();
        entry.newest = newest;
        self
    }

    pub fn with_oldest(mut self, topic: &str, partition: i32, oldest: i64) -> Self {
        self.partition_mut(topic, partition).oldest = oldest;
        self
    }

    pub fn with_committed(mut self, group: &str, topic: &str, partition: i32, offset: i64) -> Self {
        self.committed
            .entry(group.to_string())
            .or_default()
            .insert(TopicPartition::new(topic, partition), offset);
        self
    }

    pub fn with_record(
        mut self,
        topic: &str,
        partition: i32,
        offset: i64,
        payload: Option<Vec<u8>>,
    ) -> Self {
        self.partition_mut(topic, partition)
            .records
            .insert(offset, payload);
        self
    }

    /// Record whose payload is a MessagePack map with a `timestamp` entry.
    pub fn with_timestamp_record(self, topic: &str, partition: i32, offset: i64, ts: u64) -> Self {
        let payload = msgpack_payload(vec![
            (Value::from("timestamp"), Value::from(ts)),
            (Value::from("body"), Value::from("x")),
        ]);
        self.with_record(topic, partition, offset, Some(payload))
    }

    pub fn with_delay(mut self, topic: &str, partition: i32, delay: Duration) -> Self {
        self.partition_mut(topic, partition).delay = Some(delay);
        self
    }

    pub fn with_broken_offsets(mut self, topic: &str, partition: i32) -> Self {
        self.broken_offsets
            .insert(TopicPartition::new(topic, partition));
        self
    }

    pub fn with_broken_group(mut self, group: &str) -> Self {
        self.broken_groups.insert(group.to_string());
        self
    }

    /// Every `(partition, offset)` a fetch was issued for.
    pub fn fetches(&self) -> Vec<(TopicPartition, i64)> {
        self.fetch_log
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    fn partition_mut(&mut self, topic: &str, partition: i32) -> &mut MockPartition {
        self.topics
            .entry(topic.to_string())
            .or_default()
            .entry(partition)
            .or_default()
    }

    fn partition(&self, tp: &TopicPartition) -> Result<&MockPartition> {
        self.topics
            .get(&tp.topic)
            .and_then(|partitions| partitions.get(&tp.partition))
            .ok_or_else(|| KlagError::Resolution(format!("unknown partition {tp}")))
    }

    fn pause(&self, tp: &TopicPartition) {
        if let Ok(MockPartition {
            delay: Some(delay), ..
        }) = self.partition(tp)
        {
            std::thread::sleep(*delay);
        }
    }
}

pub fn msgpack_payload(entries: Vec<(Value, Value)>) -> Vec<u8> {
    let mut buf = Vec::new();
    rmpv::encode::write_value(&mut buf, &Value::Map(entries)).expect("encode payload");
    buf
}

#[derive(Debug)]
pub struct MockGroupOffsets {
    group_id: String,
    committed: HashMap<TopicPartition, i64>,
}

impl GroupOffsets for MockGroupOffsets {
    fn group_id(&self) -> &str {
        &self.group_id
    }

    fn next_offset(&self, tp: &TopicPartition) -> Result<Option<i64>> {
        Ok(self.committed.get(tp).copied())
    }
}

impl BrokerClient for MockBroker {
    type Offsets = MockGroupOffsets;

    fn partitions(&self, topic: &str) -> Result<Vec<i32>> {
        self.topics
            .get(topic)
            .map(|partitions| partitions.keys().copied().collect())
            .ok_or_else(|| KlagError::Resolution(format!("topic '{topic}' not found")))
    }

    fn offset_manager(&self, group_id: &str) -> Result<MockGroupOffsets> {
        if self.broken_groups.contains(group_id) {
            return Err(KlagError::Resolution(format!(
                "offset manager for group '{group_id}' unavailable"
            )));
        }

        Ok(MockGroupOffsets {
            group_id: group_id.to_string(),
            committed: self.committed.get(group_id).cloned().unwrap_or_default(),
        })
    }

    fn newest_offset(&self, tp: &TopicPartition) -> Result<i64> {
        self.pause(tp);
        if self.broken_offsets.contains(tp) {
            return Err(KlagError::Resolution(format!("offsets for {tp}: broker down")));
        }
        self.partition(tp).map(|p| p.newest)
    }

    fn oldest_offset(&self, tp: &TopicPartition) -> Result<i64> {
        self.partition(tp).map(|p| p.oldest)
    }

    fn leader(&self, tp: &TopicPartition) -> Result<i32> {
        self.partition(tp)
            .map(|_| 1)
            .map_err(|_| KlagError::Fetch(format!("partition {tp} not found")))
    }

    fn fetch_records(&self, tp: &TopicPartition, offset: i64) -> Result<Vec<FetchedRecord>> {
        self.fetch_log
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push((tp.clone(), offset));

        let partition = self
            .partition(tp)
            .map_err(|_| KlagError::Fetch(format!("partition {tp} not found")))?;

        Ok(partition
            .records
            .range(offset..)
            .map(|(offset, payload)| FetchedRecord {
                offset: *offset,
                payload: payload.clone(),
            })
            .collect())
    }
}
