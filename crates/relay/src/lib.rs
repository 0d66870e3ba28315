// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! bcn-relay: WebSocket relay for beacon clients.
//!
//! The relay fans published messages out to subscribed connections, answers
//! channel discovery, and keeps the canonical copy of synced records.

pub mod server;
pub mod state;

pub use server::{run, serve, BoxError};
pub use state::{Published, PublishRejection, RelayState, Upsert};
