// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! YAML configuration parser with strict schema validation.
//!
//! Validates daemon, client and ring settings at boot-up time.
//! Any invalid field results in a HardValidationError that prevents startup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{HardValidationError, ShmBusError, ShmBusResult};
use crate::shm::{RetryPolicy, RingGeometry};
use crate::types::Endpoint;

/// Default well-known daemon endpoint.
pub const DEFAULT_DAEMON_SOCKET: &str = "/tmp/ipc_daemon.sock";

/// Default configuration file looked up when none is given explicitly.
pub const DEFAULT_CONFIG_FILE: &str = "shmbus.yaml";

/// Raw daemon configuration.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDaemonConfig {
    #[serde(default = "default_daemon_socket")]
    socket_path: String,
    #[serde(default = "default_evict_unreachable")]
    evict_unreachable: bool,
}

fn default_daemon_socket() -> String {
    DEFAULT_DAEMON_SOCKET.to_string()
}

fn default_evict_unreachable() -> bool {
    false
}

impl Default for RawDaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: default_daemon_socket(),
            evict_unreachable: default_evict_unreachable(),
        }
    }
}

/// Raw client configuration.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawClientConfig {
    #[serde(default = "default_socket_dir")]
    socket_dir: String,
}

fn default_socket_dir() -> String {
    "/tmp".to_string()
}

impl Default for RawClientConfig {
    fn default() -> Self {
        Self {
            socket_dir: default_socket_dir(),
        }
    }
}

/// Raw ring configuration.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRingConfig {
    #[serde(default = "default_slot_count")]
    slot_count: u32,
    #[serde(default = "default_slot_size")]
    slot_size: u32,
    #[serde(default = "default_open_attempts")]
    open_attempts: u32,
    #[serde(default = "default_open_backoff_ms")]
    open_backoff_ms: u64,
}

fn default_slot_count() -> u32 {
    8
}

fn default_slot_size() -> u32 {
    256
}

fn default_open_attempts() -> u32 {
    20
}

fn default_open_backoff_ms() -> u64 {
    100
}

impl Default for RawRingConfig {
    fn default() -> Self {
        Self {
            slot_count: default_slot_count(),
            slot_size: default_slot_size(),
            open_attempts: default_open_attempts(),
            open_backoff_ms: default_open_backoff_ms(),
        }
    }
}

/// Raw root configuration file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    daemon: RawDaemonConfig,
    #[serde(default)]
    client: RawClientConfig,
    #[serde(default)]
    ring: RawRingConfig,
}

/// Validated daemon configuration.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub socket_path: Endpoint,
    /// Drop an endpoint from every key once a send to it fails with
    /// NotFound or ConnectionRefused. Off unless configured.
    pub evict_unreachable: bool,
}

/// Validated client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub socket_dir: PathBuf,
}

/// Validated ring configuration.
#[derive(Debug, Clone)]
pub struct RingConfig {
    pub geometry: RingGeometry,
    pub open_retry: RetryPolicy,
}

/// Complete validated configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub daemon: DaemonConfig,
    pub client: ClientConfig,
    pub ring: RingConfig,
}

impl Default for Config {
    fn default() -> Self {
        // Defaults are constant and known-valid.
        match ConfigLoader::validate(RawConfig::default()) {
            Ok(config) => config,
            Err(e) => unreachable!("default configuration is invalid: {}", e),
        }
    }
}

/// Configuration loader with strict validation.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load and validate configuration from a YAML file.
    /// Returns HardValidationError for any invalid fields.
    pub fn load_file(path: impl AsRef<Path>) -> ShmBusResult<Config> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ShmBusError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| ShmBusError::Io {
            context: "reading config file",
            source: e,
        })?;

        Self::load_string(&content)
    }

    /// Load the file if it exists, otherwise fall back to defaults.
    ///
    /// Only the implicit default path may be absent; an explicitly named file
    /// that does not exist is still an error.
    pub fn load_or_default(path: impl AsRef<Path>) -> ShmBusResult<Config> {
        let path = path.as_ref();
        if !path.exists() && path == Path::new(DEFAULT_CONFIG_FILE) {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Config::default());
        }
        Self::load_file(path)
    }

    /// Load and validate configuration from a YAML string.
    pub fn load_string(content: &str) -> ShmBusResult<Config> {
        // An empty document means "all defaults".
        if content.trim().is_empty() {
            return Self::validate(RawConfig::default());
        }

        let raw: RawConfig =
            serde_yaml::from_str(content).map_err(|e| ShmBusError::ConfigParse {
                message: format!("YAML parse error: {}", e),
            })?;

        Self::validate(raw)
    }

    /// Validate raw configuration and convert to validated types.
    fn validate(raw: RawConfig) -> ShmBusResult<Config> {
        let daemon = DaemonConfig {
            socket_path: Endpoint::new(raw.daemon.socket_path)?,
            evict_unreachable: raw.daemon.evict_unreachable,
        };

        let socket_dir = PathBuf::from(&raw.client.socket_dir);
        if !socket_dir.is_absolute() {
            return Err(HardValidationError::InvalidFieldValue {
                field: "socket_dir",
                value: raw.client.socket_dir,
                reason: "Must be an absolute path".to_string(),
            }
            .into());
        }

        let ring = Self::validate_ring(raw.ring)?;

        Ok(Config {
            daemon,
            client: ClientConfig { socket_dir },
            ring,
        })
    }

    /// Validate ring configuration.
    fn validate_ring(raw: RawRingConfig) -> ShmBusResult<RingConfig> {
        let geometry = RingGeometry::new(raw.slot_count, raw.slot_size)?;

        if raw.open_attempts == 0 {
            return Err(HardValidationError::OutOfBounds {
                field: "open_attempts",
                value: 0,
                min: 1,
                max: u32::MAX as u64,
            }
            .into());
        }

        // Backoff between 1ms and 10s
        if !(1..=10_000).contains(&raw.open_backoff_ms) {
            return Err(HardValidationError::OutOfBounds {
                field: "open_backoff_ms",
                value: raw.open_backoff_ms,
                min: 1,
                max: 10_000,
            }
            .into());
        }

        Ok(RingConfig {
            geometry,
            open_retry: RetryPolicy::new(
                raw.open_attempts,
                Duration::from_millis(raw.open_backoff_ms),
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_config() {
        let yaml = r#"
daemon:
  socket_path: /tmp/test_daemon.sock
  evict_unreachable: false
client:
  socket_dir: /var/run/shmbus
ring:
  slot_count: 4
  slot_size: 64
  open_attempts: 5
  open_backoff_ms: 50
"#;

        let config = ConfigLoader::load_string(yaml).unwrap();
        assert_eq!(
            config.daemon.socket_path.as_path(),
            Path::new("/tmp/test_daemon.sock")
        );
        assert!(!config.daemon.evict_unreachable);
        assert_eq!(config.client.socket_dir, PathBuf::from("/var/run/shmbus"));
        assert_eq!(config.ring.geometry.slot_count(), 4);
        assert_eq!(config.ring.geometry.slot_size(), 64);
        assert_eq!(config.ring.open_retry.attempts(), 5);
    }

    #[test]
    fn test_defaults_applied() {
        let config = ConfigLoader::load_string("ring:\n  slot_size: 128\n").unwrap();
        assert_eq!(
            config.daemon.socket_path.as_path(),
            Path::new(DEFAULT_DAEMON_SOCKET)
        );
        assert!(!config.daemon.evict_unreachable);
        assert_eq!(config.ring.geometry.slot_count(), 8);
        assert_eq!(config.ring.geometry.slot_size(), 128);
    }

    #[test]
    fn test_eviction_opt_in() {
        let config = ConfigLoader::load_string("daemon:\n  evict_unreachable: true\n").unwrap();
        assert!(config.daemon.evict_unreachable);
        assert_eq!(
            config.daemon.socket_path.as_path(),
            Path::new(DEFAULT_DAEMON_SOCKET)
        );
    }

    #[test]
    fn test_empty_document_is_default() {
        let config = ConfigLoader::load_string("").unwrap();
        assert_eq!(config.ring.geometry.slot_count(), 8);
        assert_eq!(config.ring.open_retry.attempts(), 20);
    }

    #[test]
    fn test_zero_slot_count() {
        let result = ConfigLoader::load_string("ring:\n  slot_count: 0\n");
        assert!(matches!(result, Err(ShmBusError::HardValidation(_))));
    }

    #[test]
    fn test_relative_socket_path() {
        let result = ConfigLoader::load_string("daemon:\n  socket_path: daemon.sock\n");
        assert!(matches!(result, Err(ShmBusError::HardValidation(_))));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result = ConfigLoader::load_string("ring:\n  slots: 4\n");
        assert!(matches!(result, Err(ShmBusError::ConfigParse { .. })));
    }

    #[test]
    fn test_missing_explicit_file() {
        let result = ConfigLoader::load_or_default("/nonexistent/shmbus.yaml");
        assert!(matches!(result, Err(ShmBusError::ConfigNotFound { .. })));
    }
}
