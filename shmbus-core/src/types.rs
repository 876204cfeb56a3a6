// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Newtype wrappers for validated names.
//!
//! Following the "Newtype" pattern in Rust to ensure valid state by construction.
//! Every name that travels over the discovery protocol is a single whitespace-free
//! token, so each type rejects whitespace at creation time.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::HardValidationError;

/// Maximum service key length.
const MAX_SERVICE_KEY_LEN: usize = 64;

/// Maximum shared memory name length. Leaves room for the semaphore suffixes
/// within the kernel's NAME_MAX of 255 (glibc prepends "sem.").
const MAX_SHM_NAME_LEN: usize = 200;

/// Maximum endpoint path length (`sun_path` is 108 bytes including the NUL).
pub const MAX_ENDPOINT_LEN: usize = 107;

/// Validated service key used to group peers in the registry.
/// Must be non-empty, alphanumeric with `-`, `_` or `.`, max 64 chars.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ServiceKey(String);

impl ServiceKey {
    /// Create a new ServiceKey with validation.
    pub fn new(key: impl Into<String>) -> Result<Self, HardValidationError> {
        let key = key.into();

        if key.is_empty() {
            return Err(HardValidationError::InvalidFieldValue {
                field: "service_key",
                value: key,
                reason: "Service key cannot be empty".to_string(),
            });
        }

        if key.len() > MAX_SERVICE_KEY_LEN {
            return Err(HardValidationError::InvalidFieldValue {
                field: "service_key",
                value: key.clone(),
                reason: format!(
                    "Service key too long: {} chars (max {})",
                    key.len(),
                    MAX_SERVICE_KEY_LEN
                ),
            });
        }

        if !key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(HardValidationError::InvalidFieldValue {
                field: "service_key",
                value: key,
                reason: "Service key must contain only alphanumeric characters, '-', '_' and '.'"
                    .to_string(),
            });
        }

        Ok(Self(key))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for ServiceKey {
    type Error = HardValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ServiceKey> for String {
    fn from(key: ServiceKey) -> Self {
        key.0
    }
}

/// Validated POSIX shared memory name.
///
/// Must start with `/`, contain no other `/`, no whitespace, and be at most
/// 200 bytes long.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ShmName(String);

impl ShmName {
    /// Create a new ShmName with validation.
    pub fn new(name: impl Into<String>) -> Result<Self, HardValidationError> {
        let name = name.into();

        let reject = |name: String, reason: &str| HardValidationError::InvalidFieldValue {
            field: "shm_name",
            value: name,
            reason: reason.to_string(),
        };

        let Some(rest) = name.strip_prefix('/') else {
            return Err(reject(name, "Shared memory name must start with '/'"));
        };
        if rest.is_empty() {
            return Err(reject(name, "Shared memory name cannot be just '/'"));
        }
        if rest.contains('/') {
            return Err(reject(
                name,
                "Shared memory name cannot contain '/' after the leading one",
            ));
        }
        if name.len() > MAX_SHM_NAME_LEN {
            return Err(reject(name, "Shared memory name too long"));
        }
        if name.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(reject(
                name,
                "Shared memory name cannot contain whitespace or control characters",
            ));
        }

        Ok(Self(name))
    }

    /// Conventional ring name for a participant: `/<prefix>_<key>_<identity>`.
    pub fn derived(
        prefix: &str,
        key: &ServiceKey,
        identity: impl fmt::Display,
    ) -> Result<Self, HardValidationError> {
        Self::new(format!("/{}_{}_{}", prefix, key, identity))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ShmName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for ShmName {
    type Error = HardValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ShmName> for String {
    fn from(name: ShmName) -> Self {
        name.0
    }
}

/// Validated filesystem path of a Unix datagram endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Endpoint(PathBuf);

impl Endpoint {
    /// Create a new Endpoint with validation.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, HardValidationError> {
        let path = path.into();
        let display = path.to_string_lossy().to_string();

        let reject = |reason: String| HardValidationError::InvalidFieldValue {
            field: "endpoint",
            value: display.clone(),
            reason,
        };

        if !path.is_absolute() {
            return Err(reject("Endpoint path must be absolute".to_string()));
        }
        let Some(text) = path.to_str() else {
            return Err(reject("Endpoint path must be valid UTF-8".to_string()));
        };
        if text.len() > MAX_ENDPOINT_LEN {
            return Err(reject(format!(
                "Endpoint path too long: {} bytes (max {})",
                text.len(),
                MAX_ENDPOINT_LEN
            )));
        }
        if text.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(reject(
                "Endpoint path cannot contain whitespace or control characters".to_string(),
            ));
        }

        Ok(Self(path))
    }

    /// Get the endpoint as a path.
    pub fn as_path(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

impl TryFrom<String> for Endpoint {
    type Error = HardValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Endpoint> for String {
    fn from(endpoint: Endpoint) -> Self {
        endpoint.0.to_string_lossy().into_owned()
    }
}

impl AsRef<Path> for Endpoint {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}
