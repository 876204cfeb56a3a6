//! Custom error types for shmbus.
//!
//! This module defines explicit enum error types as per coding guidelines.
//! No `Box<dyn Error>`, no `anyhow::Result` - all errors are strongly typed.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type for shmbus.
/// All errors are explicit variants - no catch-all or generic handling.
#[derive(Debug, Error)]
pub enum ShmBusError {
    // =========================================================================
    // Configuration Errors - Fail-Fast on Invalid Config
    // =========================================================================
    #[error("Hard validation error: {0}")]
    HardValidation(#[from] HardValidationError),

    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    #[error("Configuration parse error: {message}")]
    ConfigParse { message: String },

    // =========================================================================
    // Shared Memory Errors
    // =========================================================================
    #[error("Shared memory error: {0}")]
    SharedMemory(#[from] SharedMemoryError),

    // =========================================================================
    // System Errors
    // =========================================================================
    #[error("IO error: {context} - {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Hard validation errors cause immediate process termination.
/// Used when configuration or a name is invalid and cannot be used safely.
#[derive(Debug, Error)]
pub enum HardValidationError {
    #[error("Invalid field value: {field} = {value} - {reason}")]
    InvalidFieldValue {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("Value out of bounds: {field} = {value} (min: {min}, max: {max})")]
    OutOfBounds {
        field: &'static str,
        value: u64,
        min: u64,
        max: u64,
    },
}

/// Shared memory and ring buffer errors.
#[derive(Debug, Error)]
pub enum SharedMemoryError {
    #[error("Failed to create shared memory segment: {name} - {reason}")]
    CreateFailed { name: String, reason: String },

    #[error("Shared memory segment already exists: {name}")]
    AlreadyExists { name: String },

    #[error("Failed to open shared memory segment: {name} - {reason}")]
    OpenFailed { name: String, reason: String },

    #[error("Failed to map shared memory: {reason}")]
    MapFailed { reason: String },

    #[error("Shared memory segment {name} too small: {size} bytes, need {required}")]
    TooSmall {
        name: String,
        size: usize,
        required: usize,
    },

    #[error("Bad ring magic in {name}: found {found:#010x}")]
    BadMagic { name: String, found: u32 },

    #[error("Unsupported ring format version in {name}: {found}")]
    UnsupportedVersion { name: String, found: u32 },

    #[error("Invalid ring geometry: {reason}")]
    InvalidGeometry { reason: String },

    #[error("Corrupt ring state in {name}: {reason}")]
    CorruptState { name: String, reason: String },

    #[error("Payload size exceeds slot size: {size} > {max}")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Ring buffer full - no free slot")]
    RingBufferFull,

    #[error("Failed to unlink shared memory segment {name}: {reason}")]
    Unlink { name: String, reason: String },

    #[error(transparent)]
    Semaphore(#[from] SemaphoreError),
}

/// Named semaphore errors.
#[derive(Debug, Error)]
pub enum SemaphoreError {
    #[error("Failed to create semaphore {name}: {reason}")]
    CreateFailed { name: String, reason: String },

    #[error("Semaphore already exists: {name}")]
    AlreadyExists { name: String },

    #[error("Failed to open semaphore {name} after {attempts} attempts: {reason}")]
    OpenFailed {
        name: String,
        attempts: u32,
        reason: String,
    },

    #[error("Wait on semaphore {name} failed: {reason}")]
    WaitFailed { name: String, reason: String },

    #[error("Post on semaphore {name} failed: {reason}")]
    PostFailed { name: String, reason: String },

    #[error("Failed to unlink semaphore {name}: {reason}")]
    Unlink { name: String, reason: String },
}

/// Discovery daemon and registration client errors.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Failed to bind endpoint {path}: {source}")]
    Bind {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to send to {path}: {source}")]
    Send {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to receive datagram: {0}")]
    Receive(#[source] std::io::Error),
}

/// Malformed discovery datagrams.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Empty message")]
    Empty,

    #[error("Message is not valid UTF-8")]
    NotUtf8,

    #[error("Datagram of {len} bytes exceeds the {max} byte limit")]
    Oversized { len: usize, max: usize },

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("{command} expects {expected} tokens, got {found}")]
    WrongTokenCount {
        command: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("Invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

impl From<HardValidationError> for ProtocolError {
    fn from(err: HardValidationError) -> Self {
        match err {
            HardValidationError::InvalidFieldValue { field, reason, .. } => {
                ProtocolError::InvalidField { field, reason }
            }
            HardValidationError::OutOfBounds { field, value, .. } => ProtocolError::InvalidField {
                field,
                reason: format!("value {} out of bounds", value),
            },
        }
    }
}

/// Result type alias using ShmBusError.
pub type ShmBusResult<T> = Result<T, ShmBusError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hard_validation_error_display() {
        let err = HardValidationError::InvalidFieldValue {
            field: "slot_size",
            value: "0".to_string(),
            reason: "must be non-zero".to_string(),
        };
        assert!(err.to_string().contains("slot_size"));
        assert!(err.to_string().contains("non-zero"));
    }

    #[test]
    fn test_error_chain() {
        let sem_err = SemaphoreError::AlreadyExists {
            name: "/ring_free".to_string(),
        };
        let shm_err: SharedMemoryError = sem_err.into();
        assert!(matches!(shm_err, SharedMemoryError::Semaphore(_)));

        let top: ShmBusError = shm_err.into();
        assert!(matches!(top, ShmBusError::SharedMemory(_)));
    }

    #[test]
    fn test_bad_magic_display_is_hex() {
        let err = SharedMemoryError::BadMagic {
            name: "/ring".to_string(),
            found: 0xdeadbeef,
        };
        assert!(err.to_string().contains("0xdeadbeef"));
    }

    #[test]
    fn test_validation_into_protocol_error() {
        let err: ProtocolError = HardValidationError::InvalidFieldValue {
            field: "service_key",
            value: String::new(),
            reason: "cannot be empty".to_string(),
        }
        .into();
        assert_eq!(
            err,
            ProtocolError::InvalidField {
                field: "service_key",
                reason: "cannot be empty".to_string()
            }
        );
    }
}
