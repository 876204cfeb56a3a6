// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Discovery daemon: a single datagram receive loop around a [`ServiceRegistry`].
//!
//! Each datagram is parsed and fully handled before the next one is read,
//! so the registry needs no locking.

use std::future::Future;
use std::time::Duration;

use tokio::net::UnixDatagram;

use crate::config::DaemonConfig;
use crate::discovery::protocol::{Message, MAX_DATAGRAM};
use crate::discovery::registry::{Notification, ServiceRegistry};
use crate::error::DiscoveryError;
use crate::types::Endpoint;

/// Longest a single notification may wait for room in the peer's queue.
const DELIVER_TIMEOUT: Duration = Duration::from_millis(100);

/// Discovery daemon bound to its well-known endpoint.
pub struct DiscoveryDaemon {
    socket: UnixDatagram,
    endpoint: Endpoint,
    registry: ServiceRegistry,
    evict_unreachable: bool,
}

impl DiscoveryDaemon {
    /// Bind the daemon using its configuration.
    pub fn bind(config: &DaemonConfig) -> Result<Self, DiscoveryError> {
        Self::bind_at(config.socket_path.clone(), config.evict_unreachable)
    }

    /// Bind the daemon at `endpoint`, replacing a stale socket file.
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind_at(endpoint: Endpoint, evict_unreachable: bool) -> Result<Self, DiscoveryError> {
        // A previous daemon that died leaves its socket file behind.
        let _ = std::fs::remove_file(endpoint.as_path());

        let socket = UnixDatagram::bind(endpoint.as_path()).map_err(|e| DiscoveryError::Bind {
            path: endpoint.as_path().to_path_buf(),
            source: e,
        })?;

        tracing::info!(endpoint = %endpoint, "Discovery daemon listening");

        Ok(Self {
            socket,
            endpoint,
            registry: ServiceRegistry::new(),
            evict_unreachable,
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    /// Serve until `shutdown` completes.
    pub async fn run_until<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        // One spare byte so an oversized datagram shows up as len > MAX_DATAGRAM
        let mut buf = vec![0u8; MAX_DATAGRAM + 1];

        loop {
            let received = tokio::select! {
                _ = &mut shutdown => None,
                result = self.socket.recv_from(&mut buf) => Some(result),
            };

            match received {
                None => break,
                Some(Ok((len, _from))) => {
                    let notifications = self.handle_datagram(&buf[..len]);
                    self.deliver(notifications).await;
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Failed to receive datagram");
                }
            }
        }

        tracing::info!(
            services = self.registry.service_count(),
            clients = self.registry.len(),
            "Discovery daemon stopping"
        );
    }

    /// Parse and apply one datagram. Malformed input is logged and dropped.
    pub fn handle_datagram(&mut self, datagram: &[u8]) -> Vec<Notification> {
        match Message::parse(datagram) {
            Ok(message) => {
                tracing::debug!(message = %message, "Received request");
                self.registry.handle(message)
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    datagram = %String::from_utf8_lossy(datagram),
                    "Ignoring malformed request"
                );
                Vec::new()
            }
        }
    }

    /// Send notifications, waiting at most [`DELIVER_TIMEOUT`] on each.
    ///
    /// The transport is unreliable by contract: a receive queue that stays
    /// full drops the notification. Endpoints that no longer exist are
    /// evicted when `evict_unreachable` is set.
    async fn deliver(&mut self, notifications: Vec<Notification>) {
        for Notification { to, message } in notifications {
            let sent = tokio::time::timeout(
                DELIVER_TIMEOUT,
                self.socket.send_to(&message.encode(), to.as_path()),
            )
            .await;

            let result = match sent {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!(endpoint = %to, "Peer queue full, dropped notification");
                    continue;
                }
            };

            match result {
                Ok(_) => {
                    tracing::debug!(to = %to, message = %message, "Sent notification");
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused
                    ) =>
                {
                    if self.evict_unreachable {
                        let removed = self.registry.evict(&to);
                        tracing::warn!(
                            endpoint = %to,
                            removed = removed,
                            "Peer unreachable, evicted"
                        );
                    } else {
                        tracing::warn!(endpoint = %to, error = %e, "Peer unreachable");
                    }
                }
                Err(e) => {
                    tracing::warn!(endpoint = %to, error = %e, "Dropped notification");
                }
            }
        }
    }
}

impl Drop for DiscoveryDaemon {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(self.endpoint.as_path());
    }
}
