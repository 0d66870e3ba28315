// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use super::*;
use crate::test_support::Harness;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

fn coordinator(h: &Harness) -> EmergencyCoordinator {
    EmergencyCoordinator::new(Arc::clone(&h.session), Arc::clone(&h.registry), Arc::clone(&h.dispatcher))
}

fn notices(h: &Harness, channel: &str) -> Vec<(EmergencyNotice, Priority)> {
    h.relay
        .published_on(&ChannelId::from(channel))
        .into_iter()
        .map(|e| (serde_json::from_str(&e.content).unwrap(), e.priority))
        .collect()
}

#[tokio::test]
async fn declare_joins_emergency_channels_and_broadcasts_once_per_channel() {
    let h = Harness::new();
    h.connect().await;
    h.registry.join_channel(&ChannelId::from("ops")).await;
    let emergency = coordinator(&h);

    let report = emergency.declare_emergency("river flooding").await.unwrap();

    assert_eq!(report.reached.len(), 3);
    assert!(report.rejected.is_empty());
    for channel in ["ops", "global-broadcast", "alerts"] {
        let sent = notices(&h, channel);
        assert_eq!(sent.len(), 1, "{channel}");
        assert_eq!(sent[0].0.kind, NoticeKind::Declared);
        assert_eq!(sent[0].0.reason.as_deref(), Some("river flooding"));
        assert_eq!(sent[0].1, Priority::EMERGENCY);
    }
    let state = h.session.emergency();
    assert!(state.active);
    assert!(state.declared_at.is_some());
}

#[tokio::test]
async fn second_declare_only_updates_reason() {
    let h = Harness::new();
    h.connect().await;
    let emergency = coordinator(&h);
    let notified = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&notified);
    h.session.on_emergency_change(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    emergency.declare_emergency("fire").await.unwrap();
    let declared_at = h.session.emergency().declared_at;
    let report = emergency.declare_emergency("fire, spreading north").await.unwrap();

    assert!(report.is_empty());
    assert_eq!(h.relay.published().len(), 2);
    assert_eq!(notified.load(Ordering::SeqCst), 2);
    let state = h.session.emergency();
    assert_eq!(state.reason.as_deref(), Some("fire, spreading north"));
    assert_eq!(state.declared_at, declared_at);
}

#[tokio::test]
async fn resolve_sends_one_stand_down_per_active_channel() {
    let h = Harness::new();
    h.connect().await;
    h.registry.join_channel(&ChannelId::from("ops")).await;
    let emergency = coordinator(&h);
    emergency.declare_emergency("storm").await.unwrap();

    let report = emergency.resolve_emergency().await.unwrap();

    assert_eq!(report.reached.len(), 3);
    for channel in ["ops", "global-broadcast", "alerts"] {
        let sent = notices(&h, channel);
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].0.kind, NoticeKind::StandDown);
        assert_eq!(sent[1].0.reason.as_deref(), Some("storm"));
        assert_eq!(sent[1].1, Priority::STAND_DOWN);
    }
    assert_eq!(h.session.emergency(), EmergencyState::default());
}

#[tokio::test]
async fn resolve_without_emergency_is_noop() {
    let h = Harness::new();
    h.connect().await;

    let report = coordinator(&h).resolve_emergency().await.unwrap();

    assert!(report.is_empty());
    assert!(h.relay.published().is_empty());
}

#[tokio::test]
async fn offline_declaration_is_buffered() {
    let h = Harness::new();
    let emergency = coordinator(&h);
    let states = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&states);
    h.session.on_emergency_change(move |s| sink.lock().unwrap().push(s.active));

    let report = emergency.declare_emergency("quake").await.unwrap();

    assert_eq!(report.reached.len(), 2);
    assert!(report.reached.iter().all(|(_, d)| *d == Delivery::Queued));
    assert_eq!(h.dispatcher.queue_len(), 2);
    assert_eq!(*states.lock().unwrap(), vec![true]);

    h.connect().await;
    h.dispatcher.drain().await.unwrap();
    assert_eq!(h.relay.published().len(), 2);
}

#[tokio::test]
async fn oversized_notice_is_reported_per_channel() {
    let h = Harness::new();
    h.connect().await;
    h.registry.register_channel(bcn_core::Channel::new("tiny", "Tiny").with_max_message_size(4));
    h.registry.join_channel(&ChannelId::from("tiny")).await;

    let report = coordinator(&h).declare_emergency("gas leak").await.unwrap();

    assert_eq!(report.rejected.len(), 1);
    assert_eq!(report.rejected[0].0, ChannelId::from("tiny"));
    assert_eq!(report.reached.len(), 2);
}

#[test]
fn notice_serializes_kind_in_snake_case() {
    let notice = EmergencyNotice { kind: NoticeKind::StandDown, reason: None, at: Utc::now() };
    let json = serde_json::to_string(&notice).unwrap();
    assert!(json.contains(r#""kind":"stand_down""#), "{json}");
    assert_eq!(notice.priority(), Priority::STAND_DOWN);
}

#[tokio::test]
async fn failed_broadcast_rolls_declaration_back() {
    let h = Harness::new();
    let store = Arc::new(crate::test_support::FlakyStore::default());
    let dispatcher = Arc::new(
        MessageDispatcher::new(
            Arc::clone(&h.session),
            h.relay.clone(),
            Arc::clone(&h.registry),
            store.clone(),
            Arc::clone(&h.stamps),
            Arc::clone(&h.ids),
            crate::test_support::test_config().dispatch,
        )
        .unwrap(),
    );
    let emergency = EmergencyCoordinator::new(Arc::clone(&h.session), Arc::clone(&h.registry), dispatcher);
    store.set_fail_writes(true);

    let err = emergency.declare_emergency("flood").await.unwrap_err();

    assert!(matches!(err, Error::Store(_)));
    assert!(!h.session.emergency().active);

    store.set_fail_writes(false);
    let report = emergency.declare_emergency("flood").await.unwrap();

    assert_eq!(report.reached.len(), 2);
    assert!(h.session.emergency().active);
}
