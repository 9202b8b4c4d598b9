//! Global configuration parsing and validation.

use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Per-connection streaming behaviour.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct StreamConfig {
    /// Delay between heartbeat frames.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Hard deadline after which the stream is closed, measured from
    /// session start.
    #[serde(default = "default_deadline_ms")]
    pub deadline_ms: u64,
    /// Run the background task and carry the `status` field on every frame.
    ///
    /// When `false` the stream is heartbeat-only and ends at the deadline.
    #[serde(default = "default_true")]
    pub with_completion: bool,
    /// Frames buffered between the session loop and the response body.
    #[serde(default = "default_frame_buffer")]
    pub frame_buffer: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            deadline_ms: default_deadline_ms(),
            with_completion: true,
            frame_buffer: default_frame_buffer(),
        }
    }
}

impl StreamConfig {
    /// Heartbeat period as a [`Duration`].
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Session deadline as a [`Duration`].
    #[must_use]
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }
}

/// Reference background workload settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TaskConfig {
    /// Simulated processing time before the task reports success.
    #[serde(default = "default_task_delay_ms")]
    pub delay_ms: u64,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            delay_ms: default_task_delay_ms(),
        }
    }
}

impl TaskConfig {
    /// Task delay as a [`Duration`].
    #[must_use]
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// Cross-origin policy applied to every route.
///
/// Credentials are never allowed.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct CorsConfig {
    /// Allowed origins; `"*"` allows any origin.
    #[serde(default = "default_allow_origins")]
    pub allow_origins: Vec<String>,
    /// Request headers browsers may send.
    #[serde(default = "default_allow_headers")]
    pub allow_headers: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allow_origins: default_allow_origins(),
            allow_headers: default_allow_headers(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_heartbeat_interval_ms() -> u64 {
    2_000
}

fn default_deadline_ms() -> u64 {
    300_000
}

fn default_frame_buffer() -> usize {
    16
}

fn default_task_delay_ms() -> u64 {
    10_000
}

fn default_allow_origins() -> Vec<String> {
    vec!["*".into()]
}

fn default_allow_headers() -> Vec<String> {
    vec!["Cache-Control".into()]
}

fn default_host() -> String {
    "0.0.0.0".into()
}

fn default_http_port() -> u16 {
    3000
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Interface the HTTP listener binds to.
    #[serde(default = "default_host")]
    pub host: String,
    /// HTTP port for the SSE endpoint.
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Streaming session behaviour.
    #[serde(default)]
    pub stream: StreamConfig,
    /// Reference workload settings.
    #[serde(default)]
    pub task: TaskConfig,
    /// CORS policy.
    #[serde(default)]
    pub cors: CorsConfig,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
            stream: StreamConfig::default(),
            task: TaskConfig::default(),
            cors: CorsConfig::default(),
        }
    }
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and validate it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Socket address the listener binds to.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `host` is not an IP address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|err| AppError::Config(format!("invalid host {}: {err}", self.host)))?;
        Ok(SocketAddr::new(ip, self.http_port))
    }

    /// Check invariants the session loop relies on.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` describing the first violated rule.
    pub fn validate(&self) -> Result<()> {
        if self.stream.heartbeat_interval_ms == 0 {
            return Err(AppError::Config(
                "stream.heartbeat_interval_ms must be greater than zero".into(),
            ));
        }

        if self.stream.deadline_ms == 0 {
            return Err(AppError::Config(
                "stream.deadline_ms must be greater than zero".into(),
            ));
        }

        if self.stream.heartbeat_interval_ms > self.stream.deadline_ms {
            return Err(AppError::Config(
                "stream.heartbeat_interval_ms must not exceed stream.deadline_ms".into(),
            ));
        }

        if self.stream.frame_buffer == 0 {
            return Err(AppError::Config(
                "stream.frame_buffer must be greater than zero".into(),
            ));
        }

        self.bind_addr()?;
        Ok(())
    }
}
