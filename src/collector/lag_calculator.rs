use crate::request::LagRequest;

/// Outcome of one partition's evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionResult {
    pub partition: i32,
    /// Negative when the committed offset is ahead of the newest offset.
    pub lag: i64,
    /// Unix seconds of the record near the committed offset, time mode only.
    /// 0 when no record was found.
    pub record_timestamp: Option<i64>,
}

/// Aggregated lag of one (group, topic) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupTopicResult {
    pub group_id: String,
    pub topic: String,
    pub total_lag: i64,
    /// Present in [`LagMode::LagAndTime`](crate::request::LagMode::LagAndTime) only.
    pub time_lag_seconds: Option<i64>,
}

pub struct LagCalculator;

impl LagCalculator {
    /// Combine the results of every partition of a topic. Callers must pass
    /// the complete set; sum and max make the outcome independent of the
    /// order partitions finished in.
    ///
    /// Time lag is measured against the most recent timestamp across
    /// partitions. A topic without partitions has a time lag of 0.
    pub fn aggregate(
        request: &LagRequest,
        partitions: &[PartitionResult],
        now_secs: i64,
    ) -> GroupTopicResult {
        let total_lag = partitions
            .iter()
            .map(|p| p.lag)
            .fold(0i64, i64::saturating_add);

        let time_lag_seconds = request.mode.wants_time().then(|| {
            partitions
                .iter()
                .map(|p| p.record_timestamp.unwrap_or(0))
                .max()
                .map_or(0, |newest| now_secs - newest)
        });

        GroupTopicResult {
            group_id: request.group_id.clone(),
            topic: request.topic.clone(),
            total_lag,
            time_lag_seconds,
        }
    }
}

pub fn unix_now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
}
