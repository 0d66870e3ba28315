// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use super::*;
use bcn_core::{MemoryStore, MessageId, Priority, Stamp};
use serde_json::json;

fn state() -> RelayState {
    RelayState::new(Box::new(MemoryStore::new()), &[ChannelId::new("emergency-ops")])
}

fn record(client_id: &str, payload: serde_json::Value) -> SyncRecord {
    SyncRecord { client_id: ClientId::new(client_id), payload }
}

fn envelope(content: &str) -> Envelope {
    Envelope {
        message_id: MessageId::new("msg-1"),
        content: content.to_string(),
        priority: Priority::default(),
        created_at: Stamp::new(1, 0),
    }
}

#[test]
fn emergency_channels_are_advertised() {
    let state = state();
    let emergency = state.channels_of(ChannelKind::Emergency);
    assert_eq!(emergency.len(), 1);
    assert_eq!(emergency[0].id, ChannelId::new("emergency-ops"));
    assert!(state.channels_of(ChannelKind::Standard).is_empty());
}

#[test]
fn unknown_channel_is_created_as_standard() {
    let state = state();
    let channel = state.channel(&ChannelId::new("logistics"));
    assert_eq!(channel.kind, ChannelKind::Standard);
    assert_eq!(state.channels_of(ChannelKind::Standard).len(), 1);
}

#[test]
fn upsert_replay_is_idempotent() {
    let state = state();
    let first = state.upsert(record("c-1", json!({"n": 1})), WriteMode::Create).unwrap();
    let second = state.upsert(record("c-1", json!({"n": 1})), WriteMode::Create).unwrap();
    assert_eq!(first, second);
    assert_eq!(state.record_count().unwrap(), 1);
}

#[test]
fn diverging_create_conflicts_and_keeps_stored_payload() {
    let state = state();
    state.upsert(record("c-1", json!({"n": 1})), WriteMode::Create).unwrap();
    let id = state.fetch(&ClientId::new("c-1")).unwrap().unwrap().remote_id;
    let outcome = state.upsert(record("c-1", json!({"n": 2})), WriteMode::Create).unwrap();
    assert_eq!(outcome, Upsert::Conflict(id));
    assert_eq!(state.fetch(&ClientId::new("c-1")).unwrap().unwrap().payload, json!({"n": 1}));
}

#[test]
fn overwrite_replaces_payload_and_keeps_remote_id() {
    let state = state();
    let first = state.upsert(record("c-1", json!({"n": 1})), WriteMode::Create).unwrap();
    let second = state.upsert(record("c-1", json!({"n": 2})), WriteMode::Overwrite).unwrap();
    assert_eq!(first, second);
    let stored = state.fetch(&ClientId::new("c-1")).unwrap().unwrap();
    assert_eq!(stored.payload, json!({"n": 2}));
}

#[test]
fn fetch_missing_record_is_none() {
    assert!(state().fetch(&ClientId::new("nope")).unwrap().is_none());
}

#[test]
fn records_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let state = RelayState::open(dir.path(), &[]).unwrap();
        state.upsert(record("c-1", json!("x")), WriteMode::Create).unwrap();
    }
    let state = RelayState::open(dir.path(), &[]).unwrap();
    assert_eq!(state.record_count().unwrap(), 1);
}

#[tokio::test]
async fn publish_reaches_subscribers() {
    let state = state();
    let mut rx = state.subscribe();
    state.publish(ChannelId::new("ops"), envelope("hello")).unwrap();
    let published = rx.recv().await.unwrap();
    assert_eq!(published.channel_id, ChannelId::new("ops"));
    assert_eq!(published.envelope.content, "hello");
}

#[test]
fn oversized_publish_is_rejected() {
    let state = state();
    state.register_channel(Channel::new("tiny", "tiny").with_max_message_size(3));
    let result = state.publish(ChannelId::new("tiny"), envelope("too long"));
    assert_eq!(result, Err(PublishRejection::TooLarge { size: 8, max: 3 }));
}

#[test]
fn subscription_ids_are_unique() {
    let state = state();
    let a = state.next_subscription_id();
    let b = state.clone().next_subscription_id();
    assert_ne!(a, b);
}
