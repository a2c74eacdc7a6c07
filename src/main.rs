mod collector;
mod config;
mod decode;
mod error;
mod kafka;
mod report;
mod request;

use crate::collector::{BatchRunner, TopicLagCollector};
use crate::config::{Config, FailurePolicy};
use crate::decode::MsgpackTimestampDecoder;
use crate::kafka::KafkaClient;
use crate::report::Reporter;
use crate::request::{LagMode, LagRequest};
use anyhow::Context;
use clap::Parser;
use std::io::IsTerminal;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "klag-probe")]
#[command(about = "Snapshot Kafka consumer group lag, optionally with time lag")]
#[command(version)]
struct Args {
    /// List of broker addresses with ports, comma separated
    #[arg(short, long)]
    brokers: Option<String>,

    /// Comma-separated consumer group ids
    #[arg(short, long)]
    group_id: Option<String>,

    /// Topic name
    #[arg(short, long)]
    topic: Option<String>,

    /// What to compute for every (group, topic) pair
    #[arg(long, value_enum, default_value_t = LagMode::Lag)]
    command: LagMode,

    /// What to do when one pair fails: abort everything or report and go on
    #[arg(long, value_enum)]
    on_error: Option<FailurePolicy>,

    /// Optional TOML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error), written to stderr
    #[arg(short, long, default_value = "warn")]
    log_level: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputSource {
    Args,
    Stdin,
}

impl Args {
    /// Explicit `--group-id` and `--topic` win; otherwise piped input means
    /// batch mode.
    fn input_source(&self, stdin_is_terminal: bool) -> InputSource {
        if self.group_id.is_some() && self.topic.is_some() {
            InputSource::Args
        } else if stdin_is_terminal {
            InputSource::Args
        } else {
            InputSource::Stdin
        }
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    init_logging(&args.log_level);

    if let Err(e) = run(args).await {
        println!("{}", error_line(&e));
        std::process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let mut config = Config::load(args.config.as_deref())?;
    config.apply_overrides(args.brokers.as_deref(), args.on_error);

    let source = args.input_source(std::io::stdin().is_terminal());
    let requests = match source {
        InputSource::Args => {
            LagRequest::from_args(args.group_id.as_deref(), args.topic.as_deref(), args.command)?
        }
        InputSource::Stdin => read_batch(args.command).await?,
    };

    config.validate()?;
    info!(
        source = ?source,
        pairs = requests.len(),
        mode = ?args.command,
        on_error = ?config.on_error,
        "Configuration loaded"
    );

    let client = Arc::new(KafkaClient::new(&config.kafka, config.fetch.limits())?);
    let decoder = Arc::new(MsgpackTimestampDecoder::new(
        config.decoder.timestamp_field.as_str(),
    ));
    let collector = TopicLagCollector::new(
        client,
        decoder,
        config.kafka.uncommitted,
        config.fetch.rewind,
    );
    let runner = BatchRunner::new(Arc::new(collector), config.on_error);

    let total = requests.len();
    let mut reporter = Reporter::new(std::io::stdout());
    let summary = runner.run(requests, &mut reporter).await?;

    if summary.failed > 0 {
        anyhow::bail!("{} of {} evaluations failed", summary.failed, total);
    }

    Ok(())
}

async fn read_batch(mode: LagMode) -> anyhow::Result<Vec<LagRequest>> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut buffered = Vec::new();

    while let Some(line) = lines
        .next_line()
        .await
        .context("Failed to read batch input")?
    {
        buffered.push(line);
    }

    debug!(lines = buffered.len(), "Read batch input");
    Ok(LagRequest::parse_batch(
        buffered.iter().map(String::as_str),
        mode,
    )?)
}

/// Single-line message including every cause in the chain.
fn error_line(e: &anyhow::Error) -> String {
    format!("{e:#}")
}

fn init_logging(level: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
