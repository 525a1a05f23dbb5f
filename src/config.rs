use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use log::info;
use serde::{Deserialize, Deserializer};

use crate::session_client::RetryPolicy;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Everything the engine needs to talk to the remote service and persist results.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub base_url: String,
    pub search_path: String,
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub cache_path: PathBuf,
    pub flush_interval_secs: u64,
    /// Merged over the default session headers; names are matched case-insensitively.
    #[serde(deserialize_with = "merge_with_default_headers")]
    pub headers: BTreeMap<String, String>,
}

fn default_headers() -> BTreeMap<String, String> {
    [
        ("authority", "www.ratsit.se"),
        ("accept", "*/*"),
        ("x-requested-with", "XMLHttpRequest"),
        ("user-agent", "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/88.0.4324.182 Safari/537.36"),
        ("content-type", "application/x-www-form-urlencoded; charset=UTF-8"),
        ("origin", "https://www.ratsit.se"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

fn merge_with_default_headers<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let overrides = BTreeMap::<String, String>::deserialize(deserializer)?;
    let mut headers = default_headers();
    headers.extend(overrides.into_iter().map(|(k, v)| (k.to_lowercase(), v)));
    Ok(headers)
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            base_url: "https://www.ratsit.se".to_string(),
            search_path: "/Sok/SokPersonPartial".to_string(),
            timeout_secs: 10,
            max_attempts: 4,
            initial_backoff_ms: 1000,
            cache_path: PathBuf::from("cache.json"),
            flush_interval_secs: 60,
            headers: default_headers(),
        }
    }
}

impl EngineConfig {
    /// Reads a TOML file. Keys not present keep their defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: EngineConfig = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Loaded engine config from {:?} (base url {})", path, config.base_url);
        Ok(config)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
        }
    }

    pub fn search_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.search_path)
    }
}
