use crate::collector::lag_calculator::{unix_now_secs, GroupTopicResult, LagCalculator, PartitionResult};
use crate::collector::offset_resolver::OffsetResolver;
use crate::collector::run_blocking;
use crate::collector::timestamp_extractor::TimestampExtractor;
use crate::config::UncommittedPolicy;
use crate::decode::TimestampDecoder;
use crate::error::{KlagError, Result};
use crate::kafka::{BrokerClient, TopicPartition};
use crate::request::{LagMode, LagRequest};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// Evaluates one (group, topic) pair: one task per partition, then a single
/// aggregation once every partition has reported.
pub struct TopicLagCollector<C: BrokerClient> {
    client: Arc<C>,
    resolver: Arc<OffsetResolver<C>>,
    extractor: Arc<TimestampExtractor<C>>,
    clock: fn() -> i64,
}

impl<C: BrokerClient> TopicLagCollector<C> {
    pub fn new(
        client: Arc<C>,
        decoder: Arc<dyn TimestampDecoder>,
        uncommitted: UncommittedPolicy,
        rewind: i64,
    ) -> Self {
        Self {
            resolver: Arc::new(OffsetResolver::new(Arc::clone(&client), uncommitted)),
            extractor: Arc::new(TimestampExtractor::new(Arc::clone(&client), decoder, rewind)),
            client,
            clock: unix_now_secs,
        }
    }

    /// Replace the wall clock used for time lag, in unix seconds.
    #[cfg(test)]
    pub fn with_clock(mut self, clock: fn() -> i64) -> Self {
        self.clock = clock;
        self
    }

    /// Fails with the first partition error; the remaining partition tasks
    /// are cancelled and their results dropped.
    #[instrument(skip(self, request, cancel), fields(group = %request.group_id, topic = %request.topic, mode = ?request.mode))]
    pub async fn collect(
        &self,
        request: &LagRequest,
        cancel: &CancellationToken,
    ) -> Result<GroupTopicResult> {
        let partitions = {
            let client = Arc::clone(&self.client);
            let topic = request.topic.clone();
            run_blocking(cancel, move || client.partitions(&topic)).await?
        };

        let offsets = {
            let client = Arc::clone(&self.client);
            let group_id = request.group_id.clone();
            Arc::new(run_blocking(cancel, move || client.offset_manager(&group_id)).await?)
        };

        debug!(partitions = partitions.len(), "Evaluating partitions");

        let token = cancel.child_token();
        let mut tasks: JoinSet<Result<PartitionResult>> = JoinSet::new();

        for partition in &partitions {
            let tp = TopicPartition::new(&request.topic, *partition);
            let resolver = Arc::clone(&self.resolver);
            let extractor = Arc::clone(&self.extractor);
            let offsets = Arc::clone(&offsets);
            let mode = request.mode;
            let token = token.clone();

            tasks.spawn(async move {
                let blocking_token = token.clone();
                run_blocking(&token, move || {
                    evaluate_partition(&*resolver, &*extractor, &*offsets, &tp, mode, &blocking_token)
                })
                .await
            });
        }

        let mut results = Vec::with_capacity(partitions.len());
        while let Some(joined) = tasks.join_next().await {
            match joined.map_err(KlagError::from).and_then(|r| r) {
                Ok(result) => results.push(result),
                Err(e) => {
                    token.cancel();
                    tasks.abort_all();
                    warn!(
                        error = %e,
                        completed = results.len(),
                        total = partitions.len(),
                        "Partition evaluation failed, cancelling the rest"
                    );
                    return Err(e);
                }
            }
        }

        let result = LagCalculator::aggregate(request, &results, (self.clock)());
        debug!(
            total_lag = result.total_lag,
            time_lag_seconds = ?result.time_lag_seconds,
            "Aggregated topic lag"
        );
        Ok(result)
    }
}

/// Blocking work of one partition task.
fn evaluate_partition<C: BrokerClient>(
    resolver: &OffsetResolver<C>,
    extractor: &TimestampExtractor<C>,
    offsets: &C::Offsets,
    tp: &TopicPartition,
    mode: LagMode,
    cancel: &CancellationToken,
) -> Result<PartitionResult> {
    let resolved = resolver.resolve(offsets, tp)?;

    let record_timestamp = if mode.wants_time() {
        if cancel.is_cancelled() {
            return Err(KlagError::Cancelled);
        }
        Some(extractor.extract(tp, resolved.committed)?)
    } else {
        None
    };

    Ok(PartitionResult {
        partition: tp.partition,
        lag: resolved.lag(),
        record_timestamp,
    })
}
