use crate::collector::lag_calculator::GroupTopicResult;
use crate::collector::topic_collector::TopicLagCollector;
use crate::config::FailurePolicy;
use crate::error::{KlagError, Result};
use crate::kafka::BrokerClient;
use crate::report::Reporter;
use crate::request::LagRequest;
use std::io::Write;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub failed: usize,
}

/// Evaluates many (group, topic) pairs concurrently and reports each one as
/// soon as it completes, so output order follows completion order.
pub struct BatchRunner<C: BrokerClient> {
    collector: Arc<TopicLagCollector<C>>,
    policy: FailurePolicy,
}

impl<C: BrokerClient> BatchRunner<C> {
    pub const fn new(collector: Arc<TopicLagCollector<C>>, policy: FailurePolicy) -> Self {
        Self { collector, policy }
    }

    /// Under [`FailurePolicy::Abort`] the first failed pair cancels every
    /// other evaluation and is returned as the error. Under
    /// [`FailurePolicy::Report`] failures are written as report lines and
    /// counted in the summary.
    #[instrument(skip_all, fields(pairs = requests.len(), policy = ?self.policy))]
    pub async fn run<W: Write>(
        &self,
        requests: Vec<LagRequest>,
        reporter: &mut Reporter<W>,
    ) -> Result<BatchSummary> {
        let cancel = CancellationToken::new();
        let mut tasks: JoinSet<(LagRequest, Result<GroupTopicResult>)> = JoinSet::new();

        for request in requests {
            let collector = Arc::clone(&self.collector);
            let token = cancel.child_token();
            tasks.spawn(async move {
                let outcome = collector.collect(&request, &token).await;
                (request, outcome)
            });
        }

        let mut summary = BatchSummary::default();
        while let Some(joined) = tasks.join_next().await {
            let (request, outcome) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    cancel.cancel();
                    tasks.abort_all();
                    error!(error = %e, "Evaluation task panicked");
                    return Err(KlagError::from(e));
                }
            };

            match outcome {
                Ok(result) => {
                    reporter.report(&result)?;
                    summary.succeeded += 1;
                }
                Err(e) => match self.policy {
                    FailurePolicy::Abort => {
                        cancel.cancel();
                        tasks.abort_all();
                        error!(
                            group = %request.group_id,
                            topic = %request.topic,
                            error = %e,
                            "Evaluation failed, aborting batch"
                        );
                        return Err(e);
                    }
                    FailurePolicy::Report => {
                        warn!(
                            group = %request.group_id,
                            topic = %request.topic,
                            error = %e,
                            "Evaluation failed"
                        );
                        reporter.report_failure(&request, &e)?;
                        summary.failed += 1;
                    }
                },
            }
        }

        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            "Batch completed"
        );
        Ok(summary)
    }
}
