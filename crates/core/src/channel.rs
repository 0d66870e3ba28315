// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Relay channel metadata.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::ids::ChannelId;

/// Largest message body accepted on a channel unless it says otherwise.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Classification of a channel, ordered from least to most sensitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SecurityLevel {
    #[default]
    Unclassified,
    Restricted,
    Secret,
    TopSecret,
}

impl SecurityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityLevel::Unclassified => "unclassified",
            SecurityLevel::Restricted => "restricted",
            SecurityLevel::Secret => "secret",
            SecurityLevel::TopSecret => "top_secret",
        }
    }

    /// Returns true if a holder of this level may read `required`.
    pub fn permits(&self, required: SecurityLevel) -> bool {
        *self >= required
    }
}

impl fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SecurityLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "unclassified" => Ok(SecurityLevel::Unclassified),
            "restricted" => Ok(SecurityLevel::Restricted),
            "secret" => Ok(SecurityLevel::Secret),
            "top_secret" => Ok(SecurityLevel::TopSecret),
            _ => Err(Error::InvalidSecurityLevel(s.to_string())),
        }
    }
}

/// What a channel is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    /// Ordinary conversation or topic.
    #[default]
    Standard,
    /// Designated for emergency broadcasts.
    Emergency,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Standard => "standard",
            ChannelKind::Emergency => "emergency",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ChannelKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "standard" => Ok(ChannelKind::Standard),
            "emergency" => Ok(ChannelKind::Emergency),
            _ => Err(Error::InvalidChannelKind(s.to_string())),
        }
    }
}

/// A named topic on the relay network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    pub name: String,
    #[serde(default)]
    pub security_level: SecurityLevel,
    #[serde(default)]
    pub participants: BTreeSet<String>,
    #[serde(default)]
    pub is_encrypted: bool,
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    #[serde(default)]
    pub kind: ChannelKind,
}

fn default_max_message_size() -> usize {
    DEFAULT_MAX_MESSAGE_SIZE
}

impl Channel {
    /// Creates a standard, unclassified channel with default limits.
    pub fn new(id: impl Into<ChannelId>, name: impl Into<String>) -> Self {
        Channel {
            id: id.into(),
            name: name.into(),
            security_level: SecurityLevel::default(),
            participants: BTreeSet::new(),
            is_encrypted: false,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            kind: ChannelKind::Standard,
        }
    }

    /// Creates an emergency channel, as synthesized when discovery finds none.
    pub fn emergency(id: impl Into<ChannelId>) -> Self {
        let id = id.into();
        let name = id.as_str().replace(['-', '_'], " ");
        Channel { kind: ChannelKind::Emergency, ..Channel::new(id, name) }
    }

    pub fn with_security_level(mut self, level: SecurityLevel) -> Self {
        self.security_level = level;
        self
    }

    pub fn with_max_message_size(mut self, bytes: usize) -> Self {
        self.max_message_size = bytes;
        self
    }

    pub fn with_participant(mut self, participant: impl Into<String>) -> Self {
        self.participants.insert(participant.into());
        self
    }

    pub fn encrypted(mut self) -> Self {
        self.is_encrypted = true;
        self
    }

    pub fn is_emergency(&self) -> bool {
        self.kind == ChannelKind::Emergency
    }

    /// Returns true if `content` fits within this channel's size limit.
    pub fn accepts(&self, content: &str) -> bool {
        content.len() <= self.max_message_size
    }
}

#[cfg(test)]
#[path = "channel_tests.rs"]
mod tests;
