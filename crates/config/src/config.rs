//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// A value parsed but is not usable
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Video/stream source configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamConfig {
    /// Source identifier: `-` for stdin, a file/FIFO path, or `tcp://host:port`
    #[serde(default = "default_stream_url")]
    pub url: String,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    /// Bytes per pixel of the raw frames (1 = gray, 3 = RGB)
    #[serde(default = "default_channels")]
    pub channels: u32,
    /// Upper bound for a single frame read
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

fn default_stream_url() -> String {
    "-".to_string()
}

fn default_width() -> u32 {
    640
}

fn default_height() -> u32 {
    480
}

fn default_channels() -> u32 {
    3
}

fn default_read_timeout_ms() -> u64 {
    1000
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: default_stream_url(),
            width: default_width(),
            height: default_height(),
            channels: default_channels(),
            read_timeout_ms: default_read_timeout_ms(),
        }
    }
}

impl StreamConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

/// Remote model-serving endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InferenceConfig {
    /// Base URL of the model server REST API
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub model_name: String,
    /// Model version (0 = latest)
    #[serde(default)]
    pub model_version: u64,
    /// Name of the model input the frame is bound to
    #[serde(default = "default_input_name")]
    pub input_name: String,
    /// Send JPEG-encoded frames instead of FP32 tensors
    #[serde(default)]
    pub binary_input: bool,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_endpoint() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_input_name() -> String {
    "image".to_string()
}

fn default_request_timeout_ms() -> u64 {
    5000
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            model_name: String::new(),
            model_version: 0,
            input_name: default_input_name(),
            binary_input: false,
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl InferenceConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Inference pipeline sizing and timing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    /// Number of inference executors (0 = auto-derive)
    #[serde(default)]
    pub executors: u32,
    /// Capacity of the input and output queues (0 = auto-derive)
    #[serde(default)]
    pub buffer_size: u32,
    /// Bounded wait used by the pipeline driver when polling a queue
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    /// Interval between executor abort checks
    #[serde(default = "default_monitor_interval_ms")]
    pub monitor_interval_ms: u64,
}

fn default_poll_timeout_ms() -> u64 {
    10
}

fn default_monitor_interval_ms() -> u64 {
    1000
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            executors: 0,
            buffer_size: 0,
            poll_timeout_ms: default_poll_timeout_ms(),
            monitor_interval_ms: default_monitor_interval_ms(),
        }
    }
}

/// Health supervision configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SupervisorConfig {
    /// Main-loop iterations per health window
    #[serde(default = "default_check_interval")]
    pub check_interval: u32,
    /// Stream recovery attempts before giving up
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,
    /// Pause before reinitializing the stream
    #[serde(default = "default_recovery_wait_ms")]
    pub recovery_wait_ms: u64,
}

fn default_check_interval() -> u32 {
    100
}

fn default_retry_limit() -> u32 {
    3
}

fn default_recovery_wait_ms() -> u64 {
    5000
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            check_interval: default_check_interval(),
            retry_limit: default_retry_limit(),
            recovery_wait_ms: default_recovery_wait_ms(),
        }
    }
}

/// Metrics HTTP endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_bind")]
    pub bind: String,
}

fn default_metrics_bind() -> String {
    "127.0.0.1:7878".to_string()
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: default_metrics_bind(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Default filter directive when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub inference: InferenceConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the file and handles missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - STREAM_URL -> stream.url
    /// - INFERENCE_ENDPOINT -> inference.endpoint
    /// - MODEL_NAME -> inference.model_name
    /// - MODEL_VERSION -> inference.model_version
    /// - INFERENCE_BINARY_INPUT -> inference.binary_input
    /// - PIPELINE_EXECUTORS -> pipeline.executors
    /// - PIPELINE_BUFFER_SIZE -> pipeline.buffer_size
    /// - SUPERVISOR_CHECK_INTERVAL -> supervisor.check_interval
    /// - SUPERVISOR_RETRY_LIMIT -> supervisor.retry_limit
    /// - METRICS_ENABLED -> metrics.enabled
    /// - LOG_LEVEL -> logging.level
    ///
    /// Unparseable numeric or boolean values are ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("STREAM_URL") {
            self.stream.url = val;
        }

        if let Ok(val) = env::var("INFERENCE_ENDPOINT") {
            self.inference.endpoint = val;
        }

        if let Ok(val) = env::var("MODEL_NAME") {
            self.inference.model_name = val;
        }

        if let Ok(val) = env::var("MODEL_VERSION") {
            if let Ok(version) = val.parse::<u64>() {
                self.inference.model_version = version;
            }
        }

        if let Ok(val) = env::var("INFERENCE_BINARY_INPUT") {
            if let Some(flag) = parse_bool(&val) {
                self.inference.binary_input = flag;
            }
        }

        if let Ok(val) = env::var("PIPELINE_EXECUTORS") {
            if let Ok(executors) = val.parse::<u32>() {
                self.pipeline.executors = executors;
            }
        }

        if let Ok(val) = env::var("PIPELINE_BUFFER_SIZE") {
            if let Ok(size) = val.parse::<u32>() {
                self.pipeline.buffer_size = size;
            }
        }

        if let Ok(val) = env::var("SUPERVISOR_CHECK_INTERVAL") {
            if let Ok(interval) = val.parse::<u32>() {
                self.supervisor.check_interval = interval;
            }
        }

        if let Ok(val) = env::var("SUPERVISOR_RETRY_LIMIT") {
            if let Ok(limit) = val.parse::<u32>() {
                self.supervisor.retry_limit = limit;
            }
        }

        if let Ok(val) = env::var("METRICS_ENABLED") {
            if let Some(flag) = parse_bool(&val) {
                self.metrics.enabled = flag;
            }
        }

        if let Ok(val) = env::var("LOG_LEVEL") {
            self.logging.level = val;
        }
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stream.url.trim().is_empty() {
            return Err(ConfigError::Invalid("stream.url must not be empty".into()));
        }
        if self.stream.width == 0 || self.stream.height == 0 || self.stream.channels == 0 {
            return Err(ConfigError::Invalid(format!(
                "stream frame geometry must be non-zero, got {}x{}x{}",
                self.stream.width, self.stream.height, self.stream.channels
            )));
        }
        if self.inference.model_name.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "inference.model_name must be set".into(),
            ));
        }
        let endpoint = self.inference.endpoint.as_str();
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(ConfigError::Invalid(format!(
                "inference.endpoint must be an http(s) URL, got '{}'",
                endpoint
            )));
        }
        if self.supervisor.check_interval == 0 {
            return Err(ConfigError::Invalid(
                "supervisor.check_interval must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Like [`Config::load`], but a missing file yields defaults plus overrides
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            return Self::load(path);
        }
        let mut config = Self::default();
        config.apply_env_overrides();
        Ok(config)
    }
}

// Accept "true", "1", "yes" as true; "false", "0", "no" as false
fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}
