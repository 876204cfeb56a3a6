// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Discovery wire protocol.
//!
//! One message per datagram, ASCII tokens separated by whitespace:
//!
//! ```text
//! REGISTER   <service_key> <client_endpoint> <shm_name | ->
//! DEREGISTER <service_key> <client_endpoint> <shm_name | ->
//! PEER       <service_key> <peer_endpoint>   <shm_name | ->
//! ```

use std::fmt;

use crate::error::ProtocolError;
use crate::types::{Endpoint, ServiceKey, ShmName};

/// Token sent in place of a ring name by participants without one.
pub const SHM_NONE: &str = "-";

/// Alternate spelling of [`SHM_NONE`] accepted on input.
const SHM_NONE_ALT: &str = "none";

/// Largest datagram either side reads.
pub const MAX_DATAGRAM: usize = 1024;

/// Tokens per message including the command.
const TOKENS: usize = 4;

/// A registered participant: where to reach it and which ring it offers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub endpoint: Endpoint,
    pub shm: Option<ShmName>,
}

impl ClientInfo {
    pub fn new(endpoint: Endpoint, shm: Option<ShmName>) -> Self {
        Self { endpoint, shm }
    }

    fn shm_token(&self) -> &str {
        self.shm.as_ref().map_or(SHM_NONE, |s| s.as_str())
    }
}

/// A discovery protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Client → daemon: add me to `key`.
    Register { key: ServiceKey, client: ClientInfo },
    /// Client → daemon: remove me from `key`.
    Deregister { key: ServiceKey, client: ClientInfo },
    /// Daemon → client: `peer` is registered under `key`.
    Peer { key: ServiceKey, peer: ClientInfo },
}

impl Message {
    pub const REGISTER: &'static str = "REGISTER";
    pub const DEREGISTER: &'static str = "DEREGISTER";
    pub const PEER: &'static str = "PEER";

    /// Parse one datagram.
    ///
    /// Datagrams longer than [`MAX_DATAGRAM`] are rejected whole, since a
    /// receiver with a `MAX_DATAGRAM` buffer would only see a prefix.
    pub fn parse(datagram: &[u8]) -> Result<Self, ProtocolError> {
        if datagram.len() > MAX_DATAGRAM {
            return Err(ProtocolError::Oversized {
                len: datagram.len(),
                max: MAX_DATAGRAM,
            });
        }

        let text = std::str::from_utf8(datagram).map_err(|_| ProtocolError::NotUtf8)?;
        let text = text.trim_end_matches('\0');

        let tokens: Vec<&str> = text.split_ascii_whitespace().collect();
        let Some(&command) = tokens.first() else {
            return Err(ProtocolError::Empty);
        };

        let command = match command {
            Self::REGISTER => Self::REGISTER,
            Self::DEREGISTER => Self::DEREGISTER,
            Self::PEER => Self::PEER,
            other => return Err(ProtocolError::UnknownCommand(other.to_string())),
        };

        if tokens.len() != TOKENS {
            return Err(ProtocolError::WrongTokenCount {
                command,
                expected: TOKENS,
                found: tokens.len(),
            });
        }

        let key = ServiceKey::new(tokens[1])?;
        let info = ClientInfo::new(Endpoint::new(tokens[2])?, parse_shm(tokens[3])?);

        Ok(match command {
            Self::REGISTER => Message::Register { key, client: info },
            Self::DEREGISTER => Message::Deregister { key, client: info },
            _ => Message::Peer { key, peer: info },
        })
    }

    /// Command token of this message.
    pub fn command(&self) -> &'static str {
        match self {
            Message::Register { .. } => Self::REGISTER,
            Message::Deregister { .. } => Self::DEREGISTER,
            Message::Peer { .. } => Self::PEER,
        }
    }

    pub fn key(&self) -> &ServiceKey {
        match self {
            Message::Register { key, .. }
            | Message::Deregister { key, .. }
            | Message::Peer { key, .. } => key,
        }
    }

    /// The participant the message is about.
    pub fn info(&self) -> &ClientInfo {
        match self {
            Message::Register { client, .. } | Message::Deregister { client, .. } => client,
            Message::Peer { peer, .. } => peer,
        }
    }

    /// Wire form of the message.
    pub fn encode(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let info = self.info();
        write!(
            f,
            "{} {} {} {}",
            self.command(),
            self.key(),
            info.endpoint,
            info.shm_token()
        )
    }
}

fn parse_shm(token: &str) -> Result<Option<ShmName>, ProtocolError> {
    if token == SHM_NONE || token == SHM_NONE_ALT {
        return Ok(None);
    }
    Ok(Some(ShmName::new(token)?))
}
