// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Identifier types and client-side id generation.
//!
//! Generated ids have the form `{prefix}-{hash}` where the hash is the first
//! 16 hex chars of SHA256(generator seed + stamp + counter). The seed mixes the
//! process id and the generator's creation time so ids from different
//! processes do not collide.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::clock::Stamp;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                $name(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                $name(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                $name(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Identifier of a relay channel.
    ChannelId
);

string_id!(
    /// Client-generated identifier of an outbound message.
    MessageId
);

string_id!(
    /// Client-generated identifier of an offline entity; doubles as the
    /// idempotency key for remote sync.
    ClientId
);

string_id!(
    /// Identifier assigned by the remote store once a record is synced.
    RemoteId
);

/// Prefix for generated message ids.
pub const MESSAGE_PREFIX: &str = "msg";
/// Prefix for generated offline entity ids.
pub const CLIENT_PREFIX: &str = "off";
/// Prefix for record ids assigned by a relay.
pub const REMOTE_PREFIX: &str = "rec";

/// Generates unique client-side ids.
#[derive(Debug)]
pub struct IdGenerator {
    seed: String,
    counter: AtomicU64,
}

impl IdGenerator {
    pub fn new() -> Self {
        let nanos = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_nanos()).unwrap_or(0);
        Self::with_seed(format!("{}:{}", std::process::id(), nanos))
    }

    /// Creates a generator with a fixed seed (deterministic output).
    pub fn with_seed(seed: impl Into<String>) -> Self {
        IdGenerator { seed: seed.into(), counter: AtomicU64::new(0) }
    }

    pub fn message_id(&self, stamp: Stamp) -> MessageId {
        MessageId(self.generate(MESSAGE_PREFIX, stamp))
    }

    pub fn client_id(&self, stamp: Stamp) -> ClientId {
        ClientId(self.generate(CLIENT_PREFIX, stamp))
    }

    pub fn remote_id(&self, stamp: Stamp) -> RemoteId {
        RemoteId(self.generate(REMOTE_PREFIX, stamp))
    }

    fn generate(&self, prefix: &str, stamp: Stamp) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let input = format!("{}{}{}", self.seed, stamp, n);
        let hash = Sha256::digest(input.as_bytes());
        format!("{}-{}", prefix, hex::encode(&hash[..8]))
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "ids_tests.rs"]
mod tests;
