// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! bcn-core: Shared library for the beacon messaging layer
//!
//! This crate provides the data model, monotonic stamps, durable key-value
//! storage and wire protocol used by both the `bcn-link` client and the
//! `bcn-relay` server.

pub mod channel;
pub mod clock;
pub mod entity;
pub mod error;
pub mod ids;
pub mod message;
pub mod protocol;
pub mod store;

pub use channel::{Channel, ChannelKind, SecurityLevel, DEFAULT_MAX_MESSAGE_SIZE};
pub use clock::{ClockSource, ManualClock, Stamp, StampClock, SystemClock};
pub use entity::{OfflineEntity, RemoteRecord, SyncRecord, SyncStatus, WriteMode};
pub use error::{Error, Result};
pub use ids::{ChannelId, ClientId, IdGenerator, MessageId, RemoteId};
pub use message::{Envelope, InboundMessage, OutboundMessage, Priority};
pub use store::{KeyValueStore, MemoryStore, SqliteStore};
