//! Engine configuration.
//!
//! Configuration can be built in code with the `with_*` builders or loaded
//! from a TOML file. Every field has a default.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use sync_core::CyclePolicy;
use sync_types::{ExtensionKind, ExtensionsRequest};

/// Configuration for a sync engine instance.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EngineConfig {
    /// Namespace for the position cache key (default: "default").
    #[serde(default = "default_session_id")]
    pub session_id: String,
    /// Long-poll timeout sent to the server, in milliseconds (default: 30000).
    #[serde(default = "default_long_poll_timeout_ms")]
    pub long_poll_timeout_ms: u64,
    /// Cycles faster than this may be padded, in milliseconds (default: 5000).
    #[serde(default = "default_fast_response_threshold_ms")]
    pub fast_response_threshold_ms: u64,
    /// Minimum cycle time after a fast, empty response (default: 3000).
    #[serde(default = "default_backoff_target_ms")]
    pub backoff_target_ms: u64,
    /// Delay before retrying a failed cycle (default: 3000).
    #[serde(default = "default_error_retry_delay_ms")]
    pub error_retry_delay_ms: u64,
    /// Presence to set while syncing (optional).
    #[serde(default)]
    pub set_presence: Option<String>,
    /// Buffered events per update/status subscriber (default: 256).
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Extensions to enable.
    #[serde(default)]
    pub extensions: ExtensionsConfig,
}

/// Extension toggles.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ExtensionsConfig {
    /// To-device messages (default: true).
    #[serde(default = "default_true")]
    pub to_device: bool,
    /// E2EE key counts and device lists (default: true).
    #[serde(default = "default_true")]
    pub e2ee: bool,
    /// Account data (default: true).
    #[serde(default = "default_true")]
    pub account_data: bool,
    /// Read receipts (default: true).
    #[serde(default = "default_true")]
    pub receipts: bool,
    /// Typing notifications (default: true).
    #[serde(default = "default_true")]
    pub typing: bool,
    /// Presence (default: false).
    #[serde(default)]
    pub presence: bool,
}

// Default value functions
fn default_session_id() -> String {
    "default".to_string()
}

fn default_long_poll_timeout_ms() -> u64 {
    30_000
}

fn default_fast_response_threshold_ms() -> u64 {
    5_000
}

fn default_backoff_target_ms() -> u64 {
    3_000
}

fn default_error_retry_delay_ms() -> u64 {
    3_000
}

fn default_channel_capacity() -> usize {
    256
}

fn default_true() -> bool {
    true
}

impl Default for ExtensionsConfig {
    fn default() -> Self {
        Self {
            to_device: true,
            e2ee: true,
            account_data: true,
            receipts: true,
            typing: true,
            presence: false,
        }
    }
}

impl ExtensionsConfig {
    /// Enabled categories, in protocol order.
    pub fn enabled(&self) -> Vec<ExtensionKind> {
        ExtensionKind::ALL
            .into_iter()
            .filter(|kind| match kind {
                ExtensionKind::ToDevice => self.to_device,
                ExtensionKind::E2ee => self.e2ee,
                ExtensionKind::AccountData => self.account_data,
                ExtensionKind::Receipts => self.receipts,
                ExtensionKind::Typing => self.typing,
                ExtensionKind::Presence => self.presence,
            })
            .collect()
    }

    /// Build the request section, resuming to-device from `to_device_since`.
    pub fn request(&self, to_device_since: Option<String>) -> ExtensionsRequest {
        ExtensionsRequest::for_kinds(&self.enabled(), to_device_since)
    }

    /// Every extension disabled.
    pub fn none() -> Self {
        Self {
            to_device: false,
            e2ee: false,
            account_data: false,
            receipts: false,
            typing: false,
            presence: false,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            session_id: default_session_id(),
            long_poll_timeout_ms: default_long_poll_timeout_ms(),
            fast_response_threshold_ms: default_fast_response_threshold_ms(),
            backoff_target_ms: default_backoff_target_ms(),
            error_retry_delay_ms: default_error_retry_delay_ms(),
            set_presence: None,
            channel_capacity: default_channel_capacity(),
            extensions: ExtensionsConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Create a configuration for `session_id` with defaults.
    pub fn new(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            ..Self::default()
        }
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Set the long-poll timeout.
    pub fn with_long_poll_timeout(mut self, timeout: Duration) -> Self {
        self.long_poll_timeout_ms = duration_ms(timeout);
        self
    }

    /// Set the fast-response threshold.
    pub fn with_fast_response_threshold(mut self, threshold: Duration) -> Self {
        self.fast_response_threshold_ms = duration_ms(threshold);
        self
    }

    /// Set the backoff target interval.
    pub fn with_backoff_target(mut self, target: Duration) -> Self {
        self.backoff_target_ms = duration_ms(target);
        self
    }

    /// Set the retry delay after errors.
    pub fn with_error_retry_delay(mut self, delay: Duration) -> Self {
        self.error_retry_delay_ms = duration_ms(delay);
        self
    }

    /// Set the presence sent with each request.
    pub fn with_presence(mut self, presence: &str) -> Self {
        self.set_presence = Some(presence.to_string());
        self
    }

    /// Set the stream buffer size.
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Set the extension toggles.
    pub fn with_extensions(mut self, extensions: ExtensionsConfig) -> Self {
        self.extensions = extensions;
        self
    }

    /// Long-poll timeout as a duration.
    pub fn long_poll_timeout(&self) -> Duration {
        Duration::from_millis(self.long_poll_timeout_ms)
    }

    /// Loop timing policy.
    pub fn cycle_policy(&self) -> CyclePolicy {
        CyclePolicy {
            fast_response_threshold: Duration::from_millis(self.fast_response_threshold_ms),
            target_interval: Duration::from_millis(self.backoff_target_ms),
            retry_delay: Duration::from_millis(self.error_retry_delay_ms),
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
}
