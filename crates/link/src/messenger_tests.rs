// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use super::*;
use crate::test_support::{test_config, wait_until, MockRelay};
use bcn_core::{Envelope, MemoryStore, Stamp};
use serde_json::json;
use std::sync::Mutex;
use std::time::Duration;

fn messenger_with(config: Config) -> (Messenger, Arc<MockRelay>) {
    let relay = MockRelay::new();
    let messenger = Messenger::new(config, relay.clone(), relay.clone(), Arc::new(MemoryStore::new())).unwrap();
    (messenger, relay)
}

fn messenger() -> (Messenger, Arc<MockRelay>) {
    messenger_with(test_config())
}

#[tokio::test(start_paused = true)]
async fn offline_messages_are_drained_after_connect() {
    let (messenger, relay) = messenger();
    let message = messenger.compose("ops", "sent while offline", Priority::NORMAL);
    assert_eq!(messenger.send(message).await.unwrap(), Delivery::Queued);

    messenger.connect().await.unwrap();

    assert!(wait_until(|| relay.published().len() == 1).await);
    assert!(messenger.queued().is_empty());
}

#[tokio::test(start_paused = true)]
async fn offline_entities_sync_after_connect() {
    let (messenger, _relay) = messenger();
    let entity = messenger.create_offline(json!({"form": "casualty-report"})).unwrap();

    messenger.connect().await.unwrap();

    assert!(wait_until(|| messenger.sync_stats().unwrap().synced == 1).await);
    let synced = messenger.offline(&entity.client_id).unwrap().unwrap();
    assert!(synced.remote_id.is_some());
    assert!(messenger.offline_by_status(SyncStatus::Pending).unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn inbound_messages_reach_observers_for_joined_channels() {
    let (messenger, relay) = messenger();
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    messenger.on_message(move |m| sink.lock().unwrap().push(m.envelope.content.clone()));
    messenger.connect().await.unwrap();
    messenger.join_channel("ops").await;

    let envelope = |content: &str| Envelope {
        message_id: MessageId::from(format!("msg-{content}")),
        content: content.to_string(),
        priority: Priority::NORMAL,
        created_at: Stamp::new(1, 0),
    };
    relay.deliver(&ChannelId::from("elsewhere"), envelope("ignored"));
    relay.deliver(&ChannelId::from("ops"), envelope("hello"));

    assert!(wait_until(|| !received.lock().unwrap().is_empty()).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(*received.lock().unwrap(), vec!["hello".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn dropped_connection_is_restored_automatically() {
    let (messenger, relay) = messenger();
    let states = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&states);
    messenger.on_connection_state_change(move |s| sink.lock().unwrap().push(*s));
    messenger.connect().await.unwrap();
    messenger.join_channel("ops").await;

    relay.drop_connection("network unreachable");

    assert!(wait_until(|| messenger.state() == ConnectionState::Error).await);
    tokio::time::sleep(Duration::from_millis(1_100)).await;
    assert_eq!(messenger.state(), ConnectionState::Connected);
    assert_eq!(relay.subscribed_channels(), vec![ChannelId::from("ops")]);
    assert_eq!(
        *states.lock().unwrap(),
        vec![
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Error,
            ConnectionState::Connecting,
            ConnectionState::Connected,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn periodic_reconcile_runs_while_connected() {
    let mut config = test_config();
    config.sync.interval_secs = 60;
    let (messenger, _relay) = messenger_with(config);
    messenger.connect().await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    let entity = messenger.create_offline(json!({"late": true})).unwrap();
    tokio::time::sleep(Duration::from_secs(61)).await;

    assert_eq!(messenger.offline(&entity.client_id).unwrap().unwrap().status, SyncStatus::Synced);
}

#[tokio::test(start_paused = true)]
async fn emergency_round_trip_through_messenger() {
    let (messenger, relay) = messenger();
    let changes = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&changes);
    messenger.on_emergency_change(move |s| sink.lock().unwrap().push(s.active));
    messenger.connect().await.unwrap();

    messenger.declare_emergency("evacuate sector 4").await.unwrap();
    messenger.declare_emergency("evacuate sectors 4 and 5").await.unwrap();
    messenger.resolve_emergency().await.unwrap();

    assert_eq!(relay.published().len(), 4);
    assert_eq!(*changes.lock().unwrap(), vec![true, true, false]);
    assert!(!messenger.session().emergency().active);
}

#[tokio::test(start_paused = true)]
async fn delivery_failures_reach_observers() {
    let mut config = test_config();
    config.dispatch.max_attempts = 1;
    let (messenger, relay) = messenger_with(config);
    let failures = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&failures);
    messenger.on_delivery_failure(move |f| sink.lock().unwrap().push(f.message.id.clone()));
    messenger.connect().await.unwrap();
    relay.set_publish_fails(true);

    let message = messenger.compose("ops", "lost", Priority::NORMAL);
    let id = message.id.clone();
    messenger.send(message).await.unwrap_err();

    assert_eq!(*failures.lock().unwrap(), vec![id.clone()]);
    relay.set_publish_fails(false);
    messenger.retry_failed(&id).unwrap();
    assert_eq!(messenger.drain().await.unwrap().sent, 1);
}

#[tokio::test]
async fn invalid_config_is_rejected() {
    let mut config = test_config();
    config.relay.url = "http://not-a-websocket".into();
    let relay = MockRelay::new();

    let result = Messenger::new(config, relay.clone(), relay, Arc::new(MemoryStore::new()));

    assert!(matches!(result, Err(crate::Error::Config(_))));
}

#[tokio::test]
async fn delete_and_disconnect() {
    let (messenger, relay) = messenger();
    messenger.connect().await.unwrap();
    let entity = messenger.create_offline(json!({})).unwrap();

    assert!(messenger.delete_offline(&entity.client_id).unwrap());
    messenger.disconnect().await.unwrap();

    assert_eq!(messenger.state(), ConnectionState::Disconnected);
    assert!(!relay.is_connected());
    assert_eq!(messenger.sync_stats().unwrap().total(), 0);
}

#[tokio::test(start_paused = true)]
async fn message_requeued_while_connected_is_retried() {
    let (messenger, relay) = messenger();
    messenger.connect().await.unwrap();
    relay.fail_next_publishes(1);

    let first = messenger.compose("ops", "hello", Priority::NORMAL);
    assert_eq!(messenger.send(first).await.unwrap(), Delivery::Requeued { attempts: 1 });
    let second = messenger.compose("ops", "world", Priority::NORMAL);
    assert_eq!(messenger.send(second).await.unwrap(), Delivery::Sent);

    assert!(wait_until(|| relay.published().len() == 2).await);
    assert!(messenger.queued().is_empty());
}
