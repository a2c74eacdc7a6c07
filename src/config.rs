use crate::error::{KlagError, Result};
use crate::kafka::{FetchLimits, MAX_FETCH_BYTES};
use clap::ValueEnum;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub kafka: KafkaConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub decoder: DecoderConfig,
    #[serde(default)]
    pub on_error: FailurePolicy,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KafkaConfig {
    /// Comma-separated `host:port` list. Usually supplied with `--brokers`.
    #[serde(default)]
    pub bootstrap_servers: String,
    /// Timeout applied to every blocking broker operation.
    #[serde(with = "humantime_serde", default = "default_kafka_timeout")]
    pub timeout: Duration,
    #[serde(default)]
    pub uncommitted: UncommittedPolicy,
    /// Number of fetch consumers kept warm for timestamp extraction.
    #[serde(default = "default_fetch_pool_size")]
    pub fetch_pool_size: usize,
    #[serde(default)]
    pub consumer_properties: HashMap<String, String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FetchConfig {
    #[serde(with = "humantime_serde", default = "default_max_wait")]
    pub max_wait: Duration,
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,
    /// How many positions before the committed offset the fetch starts.
    #[serde(default = "default_rewind")]
    pub rewind: i64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DecoderConfig {
    #[serde(default = "default_timestamp_field")]
    pub timestamp_field: String,
}

/// What the batch driver does when one (group, topic) evaluation fails.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Cancel everything in flight and exit with the first error.
    #[default]
    Abort,
    /// Report the failed pair and keep evaluating the others.
    Report,
}

/// Position assumed for a partition the group never committed on.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum UncommittedPolicy {
    #[default]
    Newest,
    Oldest,
    Error,
}

fn default_kafka_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_fetch_pool_size() -> usize {
    4
}

fn default_max_wait() -> Duration {
    Duration::from_secs(10)
}

fn default_max_bytes() -> usize {
    100_000
}

fn default_rewind() -> i64 {
    2
}

fn default_timestamp_field() -> String {
    "timestamp".to_string()
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: String::new(),
            timeout: default_kafka_timeout(),
            uncommitted: UncommittedPolicy::default(),
            fetch_pool_size: default_fetch_pool_size(),
            consumer_properties: HashMap::new(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_wait: default_max_wait(),
            max_bytes: default_max_bytes(),
            rewind: default_rewind(),
        }
    }
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            timestamp_field: default_timestamp_field(),
        }
    }
}

impl FetchConfig {
    pub const fn limits(&self) -> FetchLimits {
        FetchLimits {
            max_wait: self.max_wait,
            max_bytes: self.max_bytes,
        }
    }
}

impl Config {
    /// Load the optional configuration file. Without a path every value takes
    /// its default and the command line is expected to fill in the brokers.
    pub fn load(path: Option<&str>) -> Result<Config> {
        let Some(config_path) = path else {
            return Ok(Config::default());
        };

        if !Path::new(config_path).exists() {
            return Err(KlagError::Config(format!(
                "Configuration file not found: {}",
                config_path
            )));
        }

        let content = std::fs::read_to_string(config_path)?;
        let content = Self::substitute_env_vars(&content)?;

        toml::from_str(&content)
            .map_err(|e| KlagError::Config(format!("TOML parse error: {}", e)))
    }

    fn substitute_env_vars(content: &str) -> Result<String> {
        // Supports:
        // - ${VAR} - replaced with env var value, empty string if not set
        // - ${VAR:-default} - replaced with env var value, or "default" if not set
        // - ${?VAR} - same as ${VAR}
        let re = Regex::new(r"\$\{\??([^}:-]+)(?::-([^}]*))?\}")?;
        Ok(re
            .replace_all(content, |caps: &regex::Captures| {
                let var_name = &caps[1];
                let default_value = caps.get(2).map(|m| m.as_str()).unwrap_or("");
                std::env::var(var_name).unwrap_or_else(|_| default_value.to_string())
            })
            .to_string())
    }

    /// Apply command-line values on top of the file. Absent flags keep the
    /// file value.
    pub fn apply_overrides(&mut self, brokers: Option<&str>, on_error: Option<FailurePolicy>) {
        if let Some(brokers) = brokers {
            self.kafka.bootstrap_servers = brokers.to_string();
        }
        if let Some(policy) = on_error {
            self.on_error = policy;
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.kafka.validate()?;

        if self.fetch.max_bytes == 0 {
            return Err(KlagError::Config(
                "fetch.max_bytes must be greater than zero".to_string(),
            ));
        }

        if self.fetch.max_bytes > MAX_FETCH_BYTES {
            return Err(KlagError::Config(format!(
                "fetch.max_bytes cannot exceed {MAX_FETCH_BYTES} bytes, got {}",
                self.fetch.max_bytes
            )));
        }

        if self.fetch.rewind < 0 {
            return Err(KlagError::Config(
                "fetch.rewind cannot be negative".to_string(),
            ));
        }

        if self.decoder.timestamp_field.is_empty() {
            return Err(KlagError::Config(
                "decoder.timestamp_field cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

impl KafkaConfig {
    pub fn validate(&self) -> Result<()> {
        if self.broker_list().is_empty() {
            return Err(KlagError::Config(
                "Brokers are not defined. Use --brokers argument to define it.".to_string(),
            ));
        }

        if self.fetch_pool_size == 0 {
            return Err(KlagError::Config(
                "kafka.fetch_pool_size must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Broker addresses with blanks and empty entries removed.
    pub fn broker_list(&self) -> Vec<&str> {
        self.bootstrap_servers
            .split(',')
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn load_str(content: &str) -> Result<Config> {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        Config::load(Some(file.path().to_str().unwrap()))
    }

    #[test]
    fn test_config_loads_from_file() {
        let config = load_str(
            r#"
on_error = "report"

[kafka]
bootstrap_servers = "localhost:9092"
timeout = "3s"
uncommitted = "oldest"

[fetch]
max_wait = "500ms"
max_bytes = 2048
rewind = 5

[decoder]
timestamp_field = "ts"
"#,
        )
        .unwrap();

        assert_eq!(config.kafka.bootstrap_servers, "localhost:9092");
        assert_eq!(config.kafka.timeout, Duration::from_secs(3));
        assert_eq!(config.kafka.uncommitted, UncommittedPolicy::Oldest);
        assert_eq!(config.fetch.max_wait, Duration::from_millis(500));
        assert_eq!(config.fetch.max_bytes, 2048);
        assert_eq!(config.fetch.rewind, 5);
        assert_eq!(config.decoder.timestamp_field, "ts");
        assert_eq!(config.on_error, FailurePolicy::Report);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_config_values() {
        let config = Config::load(None).unwrap();
        assert!(config.kafka.bootstrap_servers.is_empty());
        assert_eq!(config.kafka.timeout, Duration::from_secs(10));
        assert_eq!(config.kafka.uncommitted, UncommittedPolicy::Newest);
        assert_eq!(config.fetch.max_wait, Duration::from_secs(10));
        assert_eq!(config.fetch.max_bytes, 100_000);
        assert_eq!(config.fetch.rewind, 2);
        assert_eq!(config.decoder.timestamp_field, "timestamp");
        assert_eq!(config.on_error, FailurePolicy::Abort);
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = Config::load(Some("/nonexistent/klag-probe.toml")).unwrap_err();
        assert!(matches!(err, KlagError::Config(_)));
    }

    #[test]
    fn test_config_env_with_default() {
        std::env::remove_var("KLAG_PROBE_TEST_UNSET_BROKERS");

        let config = load_str(
            r#"
[kafka]
bootstrap_servers = "${KLAG_PROBE_TEST_UNSET_BROKERS:-localhost:9092}"
"#,
        )
        .unwrap();
        assert_eq!(config.kafka.bootstrap_servers, "localhost:9092");
    }

    #[test]
    fn test_config_env_override() {
        std::env::set_var("KLAG_PROBE_TEST_SASL_USER", "myuser");

        let config = load_str(
            r#"
[kafka]
bootstrap_servers = "localhost:9092"

[kafka.consumer_properties]
"sasl.username" = "${KLAG_PROBE_TEST_SASL_USER}"
"#,
        )
        .unwrap();
        assert_eq!(
            config.kafka.consumer_properties.get("sasl.username"),
            Some(&"myuser".to_string())
        );

        std::env::remove_var("KLAG_PROBE_TEST_SASL_USER");
    }

    #[test]
    fn test_command_line_overrides_file() {
        let mut config = load_str(
            r#"
on_error = "report"

[kafka]
bootstrap_servers = "file-broker:9092"
"#,
        )
        .unwrap();

        config.apply_overrides(Some("cli-a:9092,cli-b:9092"), Some(FailurePolicy::Abort));
        assert_eq!(config.kafka.broker_list(), vec!["cli-a:9092", "cli-b:9092"]);
        assert_eq!(config.on_error, FailurePolicy::Abort);

        config.apply_overrides(None, None);
        assert_eq!(config.kafka.bootstrap_servers, "cli-a:9092,cli-b:9092");
    }

    #[test]
    fn test_validate_requires_brokers() {
        let mut config = Config::default();
        config.apply_overrides(Some(" , "), None);

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("Brokers are not defined"));
    }

    #[test]
    fn test_validate_bounds_fetch_budget() {
        let mut config = Config::default();
        config.apply_overrides(Some("localhost:9092"), None);

        config.fetch.max_bytes = MAX_FETCH_BYTES;
        assert!(config.validate().is_ok());

        config.fetch.max_bytes = 2 * MAX_FETCH_BYTES;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, KlagError::Config(_)));
        assert!(err.to_string().contains("fetch.max_bytes"));
    }

    #[test]
    fn test_validate_rejects_negative_rewind() {
        let mut config = Config::default();
        config.apply_overrides(Some("localhost:9092"), None);
        config.fetch.rewind = -1;

        assert!(matches!(config.validate(), Err(KlagError::Config(_))));
    }
}
