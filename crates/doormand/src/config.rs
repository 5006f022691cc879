use doorman_core::{Compatibility, ConfidenceModel, DistanceMetric, MatchPolicy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

const DEFAULT_CONFIG_PATH: &str = "/etc/doorman/doormand.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Text => "text",
            Self::Json => "json",
        })
    }
}

/// Daemon configuration: defaults, then the TOML file, then `DOORMAN_*`
/// environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listen address for the HTTP API.
    pub bind_addr: String,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Endpoint of the embedding extractor.
    pub provider_url: String,
    /// Model tag the extractor must report; also stamped on new identities.
    pub provider_model: String,
    pub provider_timeout_secs: u64,
    /// Pins the embedding length; unset accepts any.
    pub embedding_dim: Option<usize>,
    pub metric: DistanceMetric,
    pub recognition_threshold: f32,
    pub registration_threshold: f32,
    pub confidence_policy: ConfidenceModel,
    pub min_confidence: Option<f32>,
    pub request_timeout_secs: u64,
    pub max_body_mb: usize,
    /// Requests that may wait for the engine thread.
    pub engine_queue: usize,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:5000".to_string(),
            db_path: default_data_dir().join("doorman.db"),
            provider_url: "http://127.0.0.1:5001/represent".to_string(),
            provider_model: "Facenet512".to_string(),
            provider_timeout_secs: 30,
            embedding_dim: None,
            metric: DistanceMetric::Cosine,
            recognition_threshold: 0.40,
            registration_threshold: 0.40,
            confidence_policy: ConfidenceModel::Linear,
            min_confidence: None,
            request_timeout_secs: 60,
            max_body_mb: 10,
            engine_queue: 16,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
        }
    }
}

impl Config {
    /// Load from the file named by `DOORMAN_CONFIG` (or the default path),
    /// then apply environment overrides and validate.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("DOORMAN_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        let mut config = Self::from_file_or_default(&path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file. A missing file yields the defaults.
    pub fn from_file_or_default(path: &Path) -> Result<Self, ConfigError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Override fields from `DOORMAN_*` variables. Unparsable values keep
    /// the current setting.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);
        env.string("DOORMAN_BIND_ADDR", &mut self.bind_addr);
        if let Some(path) = env.get("DOORMAN_DB_PATH") {
            self.db_path = PathBuf::from(path);
        }
        env.string("DOORMAN_PROVIDER_URL", &mut self.provider_url);
        env.string("DOORMAN_PROVIDER_MODEL", &mut self.provider_model);
        env.parsed("DOORMAN_PROVIDER_TIMEOUT_SECS", &mut self.provider_timeout_secs);
        env.optional("DOORMAN_EMBEDDING_DIM", &mut self.embedding_dim);
        env.parsed("DOORMAN_METRIC", &mut self.metric);
        env.parsed("DOORMAN_RECOGNITION_THRESHOLD", &mut self.recognition_threshold);
        env.parsed("DOORMAN_REGISTRATION_THRESHOLD", &mut self.registration_threshold);
        env.parsed("DOORMAN_CONFIDENCE_POLICY", &mut self.confidence_policy);
        env.optional("DOORMAN_MIN_CONFIDENCE", &mut self.min_confidence);
        env.parsed("DOORMAN_REQUEST_TIMEOUT_SECS", &mut self.request_timeout_secs);
        env.parsed("DOORMAN_MAX_BODY_MB", &mut self.max_body_mb);
        env.parsed("DOORMAN_ENGINE_QUEUE", &mut self.engine_queue);
        env.string("DOORMAN_LOG_LEVEL", &mut self.log_level);
        env.parsed("DOORMAN_LOG_FORMAT", &mut self.log_format);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.socket_addr()?;
        for (name, value) in [
            ("recognition_threshold", self.recognition_threshold),
            ("registration_threshold", self.registration_threshold),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::Invalid(format!("{name} must be positive, got {value}")));
            }
        }
        if let Some(min) = self.min_confidence {
            if !(0.0..=1.0).contains(&min) {
                return Err(ConfigError::Invalid(format!("min_confidence must be within [0, 1], got {min}")));
            }
        }
        if self.engine_queue == 0 {
            return Err(ConfigError::Invalid("engine_queue must be at least 1".into()));
        }
        if self.embedding_dim == Some(0) {
            return Err(ConfigError::Invalid("embedding_dim must be positive when set".into()));
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.bind_addr
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("bind_addr '{}': {e}", self.bind_addr)))
    }

    /// Policy applied to recognition requests.
    pub fn recognition_policy(&self) -> MatchPolicy {
        MatchPolicy {
            metric: self.metric,
            threshold: self.recognition_threshold,
            confidence: self.confidence_policy,
            min_confidence: self.min_confidence,
        }
    }

    /// What stored identities must match to be compared.
    pub fn compatibility(&self) -> Compatibility {
        Compatibility {
            provider_model: Some(self.provider_model.clone()),
            dimension: self.embedding_dim,
        }
    }

    pub fn max_body_bytes(&self) -> usize {
        self.max_body_mb.saturating_mul(1024 * 1024)
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("doorman")
}

struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn string(&self, key: &str, slot: &mut String) {
        if let Some(value) = self.get(key) {
            *slot = value;
        }
    }

    fn parsed<T: FromStr>(&self, key: &str, slot: &mut T) {
        if let Some(raw) = self.get(key) {
            match raw.trim().parse() {
                Ok(value) => *slot = value,
                Err(_) => tracing::warn!(key, value = %raw, "ignoring unparsable environment override"),
            }
        }
    }

    fn optional<T: FromStr>(&self, key: &str, slot: &mut Option<T>) {
        if let Some(raw) = self.get(key) {
            match raw.trim().parse() {
                Ok(value) => *slot = Some(value),
                Err(_) => tracing::warn!(key, value = %raw, "ignoring unparsable environment override"),
            }
        }
    }
}
