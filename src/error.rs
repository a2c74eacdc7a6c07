use thiserror::Error;

#[derive(Error, Debug)]
pub enum KlagError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    /// Partition enumeration, offset manager or offset lookup failed.
    #[error("Resolution error: {0}")]
    Resolution(String),

    /// Leader lookup or record fetch failed.
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// Record payload carries no usable timestamp.
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Task error: {0}")]
    Task(String),

    #[error("Evaluation cancelled")]
    Cancelled,
}

impl From<tokio::task::JoinError> for KlagError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Task(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, KlagError>;
