// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Registration client used by producers and consumers.
//!
//! Binds a per-process datagram endpoint, announces rings to the daemon and
//! receives PEER pushes. A consumer reacts to a push by opening the advertised
//! ring without taking ownership.

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};

use tokio::net::UnixDatagram;

use crate::config::Config;
use crate::discovery::protocol::{ClientInfo, Message, MAX_DATAGRAM};
use crate::error::{DiscoveryError, HardValidationError, SharedMemoryError};
use crate::shm::{RetryPolicy, SharedRing};
use crate::types::{Endpoint, ServiceKey, ShmName};

/// Distinguishes several clients bound by the same process.
static CLIENT_SEQ: AtomicU32 = AtomicU32::new(0);

/// A PEER notification received from the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerEvent {
    pub key: ServiceKey,
    pub peer: ClientInfo,
}

impl PeerEvent {
    /// Open the peer's ring in non-owning mode.
    ///
    /// Returns `None` for discovery-only peers. Blocks while semaphore opens
    /// are retried.
    pub fn open_ring(&self, retry: RetryPolicy) -> Result<Option<SharedRing>, SharedMemoryError> {
        let Some(shm) = &self.peer.shm else {
            return Ok(None);
        };
        tracing::info!(key = %self.key, shm = %shm, peer = %self.peer.endpoint, "Opening peer ring");
        SharedRing::open(shm, retry).map(Some)
    }
}

/// Datagram endpoint registered with the discovery daemon.
pub struct RegistrationClient {
    socket: UnixDatagram,
    endpoint: Endpoint,
    daemon: Endpoint,
    registrations: Vec<(ServiceKey, Option<ShmName>)>,
}

impl RegistrationClient {
    /// Endpoint path unique to this process: `<dir>/shmbus_<role>_<pid>_<seq>.sock`.
    pub fn endpoint_for(socket_dir: &Path, role: &str) -> Result<Endpoint, HardValidationError> {
        let seq = CLIENT_SEQ.fetch_add(1, Ordering::Relaxed);
        let pid = nix::unistd::getpid();
        Endpoint::new(socket_dir.join(format!("shmbus_{}_{}_{}.sock", role, pid, seq)))
    }

    /// Bind a client for `role` using the configured directories.
    pub fn bind(config: &Config, role: &str) -> Result<Self, DiscoveryError> {
        let endpoint = Self::endpoint_for(&config.client.socket_dir, role).map_err(|e| {
            DiscoveryError::Bind {
                path: config.client.socket_dir.clone(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()),
            }
        })?;
        Self::bind_at(endpoint, config.daemon.socket_path.clone())
    }

    /// Bind a client at an explicit endpoint.
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind_at(endpoint: Endpoint, daemon: Endpoint) -> Result<Self, DiscoveryError> {
        // Left over by an earlier process with the same pid.
        let _ = std::fs::remove_file(endpoint.as_path());

        let socket = UnixDatagram::bind(endpoint.as_path()).map_err(|e| DiscoveryError::Bind {
            path: endpoint.as_path().to_path_buf(),
            source: e,
        })?;

        tracing::debug!(endpoint = %endpoint, daemon = %daemon, "Bound registration endpoint");

        Ok(Self {
            socket,
            endpoint,
            daemon,
            registrations: Vec::new(),
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Announce this endpoint under `key`, optionally advertising a ring.
    pub async fn register(
        &mut self,
        key: &ServiceKey,
        shm: Option<&ShmName>,
    ) -> Result<(), DiscoveryError> {
        let message = Message::Register {
            key: key.clone(),
            client: ClientInfo::new(self.endpoint.clone(), shm.cloned()),
        };
        self.send(&message).await?;

        self.registrations.retain(|(k, _)| k != key);
        self.registrations.push((key.clone(), shm.cloned()));

        tracing::info!(key = %key, endpoint = %self.endpoint, "Registered with daemon");
        Ok(())
    }

    /// Withdraw this endpoint from `key`.
    pub async fn deregister(&mut self, key: &ServiceKey) -> Result<(), DiscoveryError> {
        let shm = self
            .registrations
            .iter()
            .find(|(k, _)| k == key)
            .and_then(|(_, shm)| shm.clone());

        let message = Message::Deregister {
            key: key.clone(),
            client: ClientInfo::new(self.endpoint.clone(), shm),
        };
        self.send(&message).await?;

        self.registrations.retain(|(k, _)| k != key);
        tracing::info!(key = %key, endpoint = %self.endpoint, "Deregistered from daemon");
        Ok(())
    }

    /// Withdraw every registration made through this client.
    ///
    /// Failures are logged; the daemon may already be gone at shutdown.
    pub async fn deregister_all(&mut self) {
        let keys: Vec<ServiceKey> = self.registrations.iter().map(|(k, _)| k.clone()).collect();
        for key in keys {
            if let Err(e) = self.deregister(&key).await {
                tracing::warn!(key = %key, error = %e, "Failed to deregister");
            }
        }
    }

    /// Wait for the next PEER notification.
    ///
    /// Malformed datagrams and other commands are logged and skipped.
    pub async fn recv_peer(&self) -> Result<PeerEvent, DiscoveryError> {
        // One spare byte so an oversized datagram shows up as len > MAX_DATAGRAM
        let mut buf = vec![0u8; MAX_DATAGRAM + 1];
        loop {
            let len = self
                .socket
                .recv(&mut buf)
                .await
                .map_err(DiscoveryError::Receive)?;

            match Message::parse(&buf[..len]) {
                Ok(Message::Peer { key, peer }) => {
                    tracing::info!(key = %key, peer = %peer.endpoint, "Peer discovered");
                    return Ok(PeerEvent { key, peer });
                }
                Ok(other) => {
                    tracing::warn!(command = other.command(), "Ignoring unexpected message");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Ignoring malformed notification");
                }
            }
        }
    }

    async fn send(&self, message: &Message) -> Result<(), DiscoveryError> {
        self.socket
            .send_to(&message.encode(), self.daemon.as_path())
            .await
            .map_err(|e| DiscoveryError::Send {
                path: self.daemon.as_path().to_path_buf(),
                source: e,
            })?;
        Ok(())
    }
}

impl Drop for RegistrationClient {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(self.endpoint.as_path());
    }
}
