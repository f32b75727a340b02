// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Host and client tuning knobs with TOML loading
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: 6 unit tests
//!
//! Example host file:
//!
//! ```toml
//! buffer_size = 65536
//! log_throughput = true
//! high_performance_threshold = 50000
//! thread_priority = 10
//! ```
//!
//! Log sinks cannot be expressed in TOML; loaded configurations carry the console sink and can
//! be switched with `with_logger`.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

use crate::framing::PAYLOAD_OFFSET;
use crate::logger::{default_logger, SharedLogger};

/// Default receive buffer size in bytes.
pub const DEFAULT_BUFFER_SIZE: usize = 256 * 1024;
/// Default events per second above which a host polls instead of blocking.
pub const DEFAULT_HIGH_PERFORMANCE_THRESHOLD: u64 = 200_000;

/// Errors raised while loading or validating a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// File being read.
        path: PathBuf,
        /// I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// The configuration file is not valid TOML for this configuration.
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        /// File being parsed.
        path: PathBuf,
        /// TOML failure.
        #[source]
        source: toml::de::Error,
    },
    /// Inline TOML could not be parsed.
    #[error("failed to parse config: {0}")]
    Toml(#[from] toml::de::Error),
    /// A value is out of range.
    #[error("invalid config: {0}")]
    Invalid(String),
}

fn read_toml<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let data = fs::read_to_string(path)
        .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
    toml::from_str(&data).map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })
}

/// Settings of a [`crate::Host`].
#[derive(Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HostConfig {
    /// Receive buffer size; packets larger than this are dropped.
    pub buffer_size: usize,
    /// Log the measured rate once per window.
    pub log_throughput: bool,
    /// Rate (events per second) above which the receive loop polls.
    pub high_performance_threshold: u64,
    /// Scheduling priority applied to the receive thread, best effort.
    pub thread_priority: Option<i32>,
    /// Diagnostic sink; `None` silences the host.
    #[serde(skip, default = "default_logger")]
    pub logger: Option<SharedLogger>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            log_throughput: false,
            high_performance_threshold: DEFAULT_HIGH_PERFORMANCE_THRESHOLD,
            thread_priority: None,
            logger: default_logger(),
        }
    }
}

impl HostConfig {
    /// Sets the receive buffer size.
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Enables or disables per-window rate logging.
    pub fn with_log_throughput(mut self, enabled: bool) -> Self {
        self.log_throughput = enabled;
        self
    }

    /// Sets the high-performance threshold in events per second.
    pub fn with_high_performance_threshold(mut self, threshold: u64) -> Self {
        self.high_performance_threshold = threshold;
        self
    }

    /// Requests a receive thread priority.
    pub fn with_thread_priority(mut self, priority: Option<i32>) -> Self {
        self.thread_priority = priority;
        self
    }

    /// Replaces the diagnostic sink.
    pub fn with_logger(mut self, logger: Option<SharedLogger>) -> Self {
        self.logger = logger;
        self
    }

    /// Parses a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config: Self = read_toml(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that the receive buffer can hold a framed packet.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_size <= PAYLOAD_OFFSET {
            return Err(ConfigError::Invalid(format!(
                "buffer_size {} must exceed the {PAYLOAD_OFFSET} byte framing overhead",
                self.buffer_size
            )));
        }
        if u32::try_from(self.buffer_size).is_err() {
            return Err(ConfigError::Invalid(format!(
                "buffer_size {} exceeds the 32-bit packet size limit",
                self.buffer_size
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for HostConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostConfig")
            .field("buffer_size", &self.buffer_size)
            .field("log_throughput", &self.log_throughput)
            .field("high_performance_threshold", &self.high_performance_threshold)
            .field("thread_priority", &self.thread_priority)
            .field("logger", &self.logger.is_some())
            .finish()
    }
}

/// Settings of a [`crate::Client`].
#[derive(Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    /// Upper bound for a remote send in milliseconds; `None` blocks until the receiver
    /// accepts the packet.
    pub send_timeout_ms: Option<u64>,
    /// Diagnostic sink; `None` silences the client.
    #[serde(skip, default = "default_logger")]
    pub logger: Option<SharedLogger>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self { send_timeout_ms: None, logger: default_logger() }
    }
}

impl ClientConfig {
    /// Bounds remote sends.
    pub fn with_send_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.send_timeout_ms =
            timeout.map(|timeout| u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Replaces the diagnostic sink.
    pub fn with_logger(mut self, logger: Option<SharedLogger>) -> Self {
        self.logger = logger;
        self
    }

    /// Remote send bound as a duration.
    pub fn send_timeout(&self) -> Option<Duration> {
        self.send_timeout_ms.map(Duration::from_millis)
    }

    /// Parses a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Loads a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        read_toml(path.as_ref())
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("send_timeout_ms", &self.send_timeout_ms)
            .field("logger", &self.logger.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults() {
        let config = HostConfig::default();
        assert_eq!(config.buffer_size, 262_144);
        assert!(!config.log_throughput);
        assert_eq!(config.high_performance_threshold, 200_000);
        assert_eq!(config.thread_priority, None);
        assert!(config.logger.is_some());
        assert_eq!(ClientConfig::default().send_timeout(), None);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = HostConfig::from_toml_str("log_throughput = true\nthread_priority = 10\n")
            .unwrap();
        assert!(config.log_throughput);
        assert_eq!(config.thread_priority, Some(10));
        assert_eq!(config.buffer_size, DEFAULT_BUFFER_SIZE);
        assert!(config.logger.is_some());
    }

    #[test]
    fn unknown_keys_rejected() {
        let err = HostConfig::from_toml_str("buffer = 12\n").unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
    }

    #[test]
    fn tiny_buffer_rejected() {
        let err = HostConfig::from_toml_str("buffer_size = 16\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(HostConfig::default().with_buffer_size(33).validate().is_ok());
    }

    #[test]
    fn load_reports_paths() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        match HostConfig::load(&missing).unwrap_err() {
            ConfigError::Read { path, .. } => assert_eq!(path, missing),
            other => panic!("unexpected error {other:?}"),
        }

        let broken = dir.path().join("broken.toml");
        fs::write(&broken, "buffer_size = \"big\"\n").unwrap();
        match HostConfig::load(&broken).unwrap_err() {
            ConfigError::Parse { path, .. } => assert_eq!(path, broken),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn client_file_roundtrip() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "send_timeout_ms = 250").unwrap();
        let config = ClientConfig::load(file.path()).unwrap();
        assert_eq!(config.send_timeout(), Some(Duration::from_millis(250)));
        let silent = config.with_logger(None).with_send_timeout(None);
        assert!(silent.logger.is_none());
        assert_eq!(silent.send_timeout_ms, None);
    }
}
