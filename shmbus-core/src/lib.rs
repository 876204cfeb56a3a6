//! Shmbus Core Library
//!
//! Shared-memory message passing between local processes.
//! Provides a semaphore-guarded slot ring over POSIX shared memory,
//! a discovery daemon that matches producers with consumers, and the
//! configuration and validated name types both sides share.

pub mod config;
pub mod discovery;
pub mod error;
pub mod shm;
pub mod types;

// Re-export commonly used types
pub use config::{Config, ConfigLoader, DaemonConfig, RingConfig};
pub use discovery::{DiscoveryDaemon, PeerEvent, RegistrationClient};
pub use error::{
    DiscoveryError, HardValidationError, ProtocolError, SemaphoreError, SharedMemoryError,
    ShmBusError, ShmBusResult,
};
pub use shm::{RetryPolicy, RingGeometry, SharedRing};
pub use types::{Endpoint, ServiceKey, ShmName};
