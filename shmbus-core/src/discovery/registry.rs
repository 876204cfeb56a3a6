// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! In-memory service registry owned by the discovery daemon.
//!
//! Transport-independent: handling a message returns the notifications to
//! send, and the daemon does the sending.

use std::collections::HashMap;

use crate::discovery::protocol::{ClientInfo, Message};
use crate::types::{Endpoint, ServiceKey};

/// A message the daemon must deliver to one endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub to: Endpoint,
    pub message: Message,
}

/// Map from service key to registered participants in registration order.
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    services: HashMap<ServiceKey, Vec<ClientInfo>>,
}

impl ServiceRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one protocol message.
    pub fn handle(&mut self, message: Message) -> Vec<Notification> {
        match message {
            Message::Register { key, client } => self.register(key, client),
            Message::Deregister { key, client } => {
                self.deregister(&key, &client.endpoint);
                Vec::new()
            }
            Message::Peer { key, peer } => {
                tracing::warn!(
                    key = %key,
                    from = %peer.endpoint,
                    "Ignoring PEER message sent to the daemon"
                );
                Vec::new()
            }
        }
    }

    /// Register `client` under `key`.
    ///
    /// Returns, in order: one PEER per already-registered participant
    /// addressed to the newcomer, then one PEER about the newcomer addressed
    /// to each of those participants. A repeated registration from the same
    /// endpoint replaces its entry in place instead of adding a second one.
    pub fn register(&mut self, key: ServiceKey, client: ClientInfo) -> Vec<Notification> {
        let peers = self.services.entry(key.clone()).or_default();

        let existing = peers.iter().position(|p| p.endpoint == client.endpoint);
        let others: Vec<ClientInfo> = peers
            .iter()
            .filter(|p| p.endpoint != client.endpoint)
            .cloned()
            .collect();

        match existing {
            Some(index) => peers[index] = client.clone(),
            None => peers.push(client.clone()),
        }

        tracing::info!(
            key = %key,
            endpoint = %client.endpoint,
            shm = client.shm.as_ref().map_or("-", |s| s.as_str()),
            peers = others.len(),
            rejoin = existing.is_some(),
            "Registered client"
        );

        let replay = others.iter().map(|peer| Notification {
            to: client.endpoint.clone(),
            message: Message::Peer {
                key: key.clone(),
                peer: peer.clone(),
            },
        });

        let announce = others.iter().map(|peer| Notification {
            to: peer.endpoint.clone(),
            message: Message::Peer {
                key: key.clone(),
                peer: client.clone(),
            },
        });

        replay.chain(announce).collect()
    }

    /// Remove `endpoint` from `key`. Returns whether it was registered.
    pub fn deregister(&mut self, key: &ServiceKey, endpoint: &Endpoint) -> bool {
        let Some(peers) = self.services.get_mut(key) else {
            return false;
        };

        let before = peers.len();
        peers.retain(|p| &p.endpoint != endpoint);
        let removed = peers.len() != before;

        if peers.is_empty() {
            self.services.remove(key);
        }

        if removed {
            tracing::info!(key = %key, endpoint = %endpoint, "Deregistered client");
        }
        removed
    }

    /// Remove `endpoint` from every key. Returns how many entries went away.
    pub fn evict(&mut self, endpoint: &Endpoint) -> usize {
        let mut removed = 0;
        self.services.retain(|_, peers| {
            let before = peers.len();
            peers.retain(|p| &p.endpoint != endpoint);
            removed += before - peers.len();
            !peers.is_empty()
        });
        removed
    }

    /// Participants under `key` in registration order.
    pub fn peers(&self, key: &ServiceKey) -> &[ClientInfo] {
        self.services
            .get(key)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Number of service keys with at least one participant.
    pub fn service_count(&self) -> usize {
        self.services.len()
    }

    /// Total registrations across all keys.
    pub fn len(&self) -> usize {
        self.services.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}
