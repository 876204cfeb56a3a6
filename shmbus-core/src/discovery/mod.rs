// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Service discovery over Unix datagram sockets.
//!
//! A daemon keeps the service registry; producers and consumers register
//! through a [`RegistrationClient`] and learn about each other via PEER
//! notifications pushed by the daemon.

pub mod client;
pub mod daemon;
pub mod protocol;
pub mod registry;

pub use client::{PeerEvent, RegistrationClient};
pub use daemon::DiscoveryDaemon;
pub use protocol::{ClientInfo, Message, MAX_DATAGRAM, SHM_NONE};
pub use registry::{Notification, ServiceRegistry};
