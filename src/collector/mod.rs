pub mod batch;
pub mod lag_calculator;
pub mod offset_resolver;
pub mod timestamp_extractor;
pub mod topic_collector;

pub use batch::BatchRunner;
pub use lag_calculator::GroupTopicResult;
pub use topic_collector::TopicLagCollector;

use crate::error::{KlagError, Result};
use tokio_util::sync::CancellationToken;

/// Run a blocking broker call on the blocking pool, giving up as soon as
/// `cancel` fires. The blocking call itself keeps running until its own
/// timeout, but its result is discarded.
pub(crate) async fn run_blocking<T, F>(cancel: &CancellationToken, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(KlagError::Cancelled),
        joined = tokio::task::spawn_blocking(f) => joined.map_err(KlagError::from).and_then(|r| r),
    }
}
