use crate::normalize::{CanonicalSchema, POPULATION_KEY, POPULATION_URL};
use crate::reconciliation::{RetryPolicy, TransferOptions, DEFAULT_CONCURRENCY};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::fs;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

pub const DEFAULT_SOURCE_URL: &str = "https://download.bls.gov/pub/time.series/pr/";

/// The dataset host rejects requests without a browser-like agent
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0 Safari/537.36";

fn default_source_url() -> String {
    DEFAULT_SOURCE_URL.to_string()
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_dataset_prefix() -> String {
    "bls".to_string()
}

fn default_population_prefix() -> String {
    "population".to_string()
}

fn default_population_url() -> String {
    POPULATION_URL.to_string()
}

fn default_population_key() -> String {
    POPULATION_KEY.to_string()
}

fn default_records_field() -> String {
    "data".to_string()
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

/// Where the dataset comes from
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SourceConfig {
    /// Directory index URL of the dataset
    #[serde(default = "default_source_url")]
    pub base_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Use a local directory instead of the HTTP index
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_dir: Option<PathBuf>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: default_source_url(),
            user_agent: default_user_agent(),
            local_dir: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// The bucket and its key prefixes. Each prefix reconciles independently.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DestinationConfig {
    #[serde(default)]
    pub bucket_root: PathBuf,
    #[serde(default = "default_dataset_prefix")]
    pub dataset_prefix: String,
    #[serde(default = "default_population_prefix")]
    pub population_prefix: String,
}

impl Default for DestinationConfig {
    fn default() -> Self {
        Self {
            bucket_root: PathBuf::new(),
            dataset_prefix: default_dataset_prefix(),
            population_prefix: default_population_prefix(),
        }
    }
}

/// The population API snapshot
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PopulationConfig {
    #[serde(default = "default_population_url")]
    pub url: String,
    /// Object key the snapshot is written under
    #[serde(default = "default_population_key")]
    pub key: String,
    #[serde(default = "default_records_field")]
    pub records_field: String,
    /// Overrides the built-in population schema
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<CanonicalSchema>,
}

impl Default for PopulationConfig {
    fn default() -> Self {
        Self {
            url: default_population_url(),
            key: default_population_key(),
            records_field: default_records_field(),
            schema: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransferConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Bucket sync configuration, passed explicitly to every component
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub destination: DestinationConfig,
    #[serde(default)]
    pub population: PopulationConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
}

impl SyncConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.destination.bucket_root.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("destination.bucketRoot is required".into()));
        }
        if self.transfer.concurrency == 0 {
            return Err(ConfigError::Invalid("transfer.concurrency must be at least 1".into()));
        }
        if self.transfer.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "transfer.retry.maxAttempts must be at least 1".into(),
            ));
        }

        let dataset = self.destination.dataset_prefix.trim_matches('/');
        let population = self.destination.population_prefix.trim_matches('/');
        for (name, prefix) in [("datasetPrefix", dataset), ("populationPrefix", population)] {
            if prefix.is_empty() {
                return Err(ConfigError::Invalid(format!("destination.{name} must not be empty")));
            }
            if prefix.split('/').any(|part| part.is_empty() || part == "." || part == "..") {
                return Err(ConfigError::Invalid(format!(
                    "destination.{name} '{prefix}' is not a plain key prefix"
                )));
            }
        }
        // Nested prefixes would let one namespace delete the other's objects
        if dataset == population
            || dataset.starts_with(&format!("{population}/"))
            || population.starts_with(&format!("{dataset}/"))
        {
            return Err(ConfigError::Invalid(
                "dataset and population prefixes must not overlap".into(),
            ));
        }

        if self.population.key.trim().is_empty() {
            return Err(ConfigError::Invalid("population.key must not be empty".into()));
        }
        if self.source.local_dir.is_none() && self.source.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("source.baseUrl must not be empty".into()));
        }
        Ok(())
    }

    pub fn transfer_options(&self) -> TransferOptions {
        TransferOptions {
            concurrency: self.transfer.concurrency,
            retry: self.transfer.retry,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.source.timeout_secs.max(1))
    }
}

/// Read the configuration file, if it exists
pub async fn read_config(path: &Path) -> Result<Option<SyncConfig>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }

    let content = fs::read_to_string(path).await?;
    let config: SyncConfig = serde_json::from_str(&content)?;
    Ok(Some(config))
}

/// Write the configuration file
pub async fn write_config(path: &Path, config: &SyncConfig) -> Result<(), ConfigError> {
    let content = serde_json::to_string_pretty(config)?;
    fs::write(path, content).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> SyncConfig {
        SyncConfig {
            destination: DestinationConfig {
                bucket_root: PathBuf::from("/tmp/bucket"),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults_from_empty_json() {
        let config: SyncConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.source.base_url, DEFAULT_SOURCE_URL);
        assert_eq!(config.population.key, "us_population.json");
        assert_eq!(config.transfer.concurrency, 4);
        assert_eq!(config.transfer.retry, RetryPolicy::default());
    }

    #[test]
    fn test_camel_case_fields() {
        let json = r#"{"destination":{"bucketRoot":"/data/bucket","datasetPrefix":"pr"},"transfer":{"retry":{"maxAttempts":5}}}"#;
        let config: SyncConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.destination.bucket_root, PathBuf::from("/data/bucket"));
        assert_eq!(config.destination.dataset_prefix, "pr");
        assert_eq!(config.transfer.retry.max_attempts, 5);
        assert_eq!(config.transfer.retry.initial_backoff_ms, 200);
    }

    #[test]
    fn test_validate() {
        assert!(valid().validate().is_ok());
        assert!(SyncConfig::default().validate().is_err());

        let mut config = valid();
        config.transfer.concurrency = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.destination.population_prefix = "bls".into();
        assert!(config.validate().is_err());

        let mut config = valid();
        config.destination.population_prefix = "bls/population".into();
        assert!(config.validate().is_err());

        let mut config = valid();
        config.destination.dataset_prefix = "../escape".into();
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_read_write_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bucket-sync.json");
        assert!(read_config(&path).await.unwrap().is_none());

        write_config(&path, &valid()).await.unwrap();
        assert_eq!(read_config(&path).await.unwrap(), Some(valid()));
    }
}
