use crate::config::UncommittedPolicy;
use crate::error::{KlagError, Result};
use crate::kafka::{BrokerClient, GroupOffsets, TopicPartition};
use std::sync::Arc;
use tracing::{debug, warn};

/// Committed and newest offset of one partition for one group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionOffsets {
    /// Next offset the group would consume.
    pub committed: i64,
    /// Offset the next produced record will get.
    pub newest: i64,
}

impl PartitionOffsets {
    /// `newest - committed + 1`: the record sitting at `committed` still
    /// counts as pending, so a group with `committed == newest` has lag 1 and
    /// only `committed == newest + 1` reads as fully caught up.
    pub const fn lag(&self) -> i64 {
        self.newest.saturating_sub(self.committed).saturating_add(1)
    }
}

pub struct OffsetResolver<C: BrokerClient> {
    client: Arc<C>,
    uncommitted: UncommittedPolicy,
}

impl<C: BrokerClient> OffsetResolver<C> {
    pub const fn new(client: Arc<C>, uncommitted: UncommittedPolicy) -> Self {
        Self {
            client,
            uncommitted,
        }
    }

    /// Blocking. Any failure is fatal for the partition's evaluation.
    pub fn resolve(&self, offsets: &C::Offsets, tp: &TopicPartition) -> Result<PartitionOffsets> {
        let newest = self.client.newest_offset(tp)?;

        let committed = match offsets.next_offset(tp)? {
            Some(committed) => committed,
            None => self.uncommitted_position(offsets.group_id(), tp, newest)?,
        };

        let resolved = PartitionOffsets { committed, newest };
        let lag = resolved.lag();
        if lag < 0 {
            warn!(
                group = offsets.group_id(),
                topic = %tp.topic,
                partition = tp.partition,
                committed = committed,
                newest = newest,
                lag = lag,
                "Committed offset is ahead of the newest offset"
            );
        } else {
            debug!(
                group = offsets.group_id(),
                topic = %tp.topic,
                partition = tp.partition,
                committed = committed,
                newest = newest,
                lag = lag,
                "Resolved partition offsets"
            );
        }

        Ok(resolved)
    }

    fn uncommitted_position(&self, group_id: &str, tp: &TopicPartition, newest: i64) -> Result<i64> {
        match self.uncommitted {
            UncommittedPolicy::Newest => Ok(newest),
            UncommittedPolicy::Oldest => self.client.oldest_offset(tp),
            UncommittedPolicy::Error => Err(KlagError::Resolution(format!(
                "group '{group_id}' has no committed offset on {tp}"
            ))),
        }
    }
}
