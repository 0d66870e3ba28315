// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use super::*;
use crate::test_support::Harness;

fn ops() -> ChannelId {
    ChannelId::from("ops")
}

#[tokio::test]
async fn join_while_disconnected_only_records_membership() {
    let h = Harness::new();

    assert!(!h.registry.join_channel(&ops()).await);

    assert!(h.session.is_member(&ops()));
    assert!(h.relay.subscribe_calls().is_empty());
    assert!(!h.registry.is_subscribed(&ops()));
}

#[tokio::test]
async fn join_while_connected_subscribes_once() {
    let h = Harness::new();
    h.connect().await;

    assert!(h.registry.join_channel(&ops()).await);
    assert!(h.registry.join_channel(&ops()).await);

    assert_eq!(h.relay.subscribe_calls(), vec![ops()]);
    assert_eq!(h.relay.subscribed_channels(), vec![ops()]);
}

#[tokio::test]
async fn failed_subscribe_is_replayed_by_rejoin() {
    let h = Harness::new();
    h.connect().await;
    h.relay.set_subscribe_fails(true);

    assert!(!h.registry.join_channel(&ops()).await);
    assert!(h.session.is_member(&ops()));

    h.relay.set_subscribe_fails(false);
    assert_eq!(h.registry.rejoin_all().await, 1);
    assert!(h.registry.is_subscribed(&ops()));
    assert_eq!(h.registry.rejoin_all().await, 0);
}

#[tokio::test]
async fn leave_unsubscribes_and_is_idempotent() {
    let h = Harness::new();
    h.connect().await;
    h.registry.join_channel(&ops()).await;

    assert!(h.registry.leave_channel(&ops()).await);
    assert!(!h.registry.leave_channel(&ops()).await);

    assert!(!h.session.is_member(&ops()));
    assert!(h.relay.subscribed_channels().is_empty());
    assert_eq!(h.relay.unsubscribed().len(), 1);
}

#[tokio::test]
async fn release_all_keeps_membership() {
    let h = Harness::new();
    h.connect().await;
    h.registry.join_channel(&ops()).await;
    h.registry.join_channel(&ChannelId::from("logistics")).await;

    h.registry.release_all().await;

    assert_eq!(h.registry.active_channels().len(), 2);
    assert!(!h.registry.is_subscribed(&ops()));
    assert!(h.relay.subscribed_channels().is_empty());
}

#[tokio::test]
async fn discovered_emergency_channels_are_cached() {
    let h = Harness::new();
    h.relay.set_emergency_channels(Some(vec![Channel::emergency("flood-watch")]));
    h.connect().await;

    let first = h.registry.resolve_emergency_channels().await;
    let second = h.registry.resolve_emergency_channels().await;

    assert_eq!(first, vec![ChannelId::from("flood-watch")]);
    assert_eq!(first, second);
    assert_eq!(h.relay.discover_calls(), 1);
    assert!(h.registry.channel(&ChannelId::from("flood-watch")).unwrap().is_emergency());

    h.registry.refresh_emergency_channels();
    h.registry.resolve_emergency_channels().await;
    assert_eq!(h.relay.discover_calls(), 2);
}

#[tokio::test]
async fn empty_discovery_caches_fallback() {
    let h = Harness::new();
    h.connect().await;

    let ids = h.registry.resolve_emergency_channels().await;
    h.registry.resolve_emergency_channels().await;

    assert_eq!(ids, vec![ChannelId::from("global-broadcast"), ChannelId::from("alerts")]);
    assert_eq!(h.relay.discover_calls(), 1);
    assert_eq!(h.registry.channel(&ChannelId::from("alerts")).unwrap().kind, ChannelKind::Emergency);
}

#[tokio::test]
async fn unreachable_relay_fallback_is_not_cached() {
    let h = Harness::new();

    let offline = h.registry.resolve_emergency_channels().await;
    assert_eq!(offline.len(), 2);
    assert_eq!(h.relay.discover_calls(), 0);

    h.relay.set_emergency_channels(Some(vec![Channel::emergency("sector-7")]));
    h.connect().await;
    assert_eq!(h.registry.resolve_emergency_channels().await, vec![ChannelId::from("sector-7")]);
}

#[tokio::test]
async fn discovery_error_falls_back_without_caching() {
    let h = Harness::new();
    h.relay.set_emergency_channels(None);
    h.connect().await;

    assert_eq!(h.registry.resolve_emergency_channels().await.len(), 2);
    h.registry.resolve_emergency_channels().await;
    assert_eq!(h.relay.discover_calls(), 2);
}

#[test]
fn max_message_size_uses_registered_value_or_default() {
    let h = Harness::new();
    h.registry.register_channel(Channel::new("tiny", "Tiny").with_max_message_size(16));

    assert_eq!(h.registry.max_message_size(&ChannelId::from("tiny")), 16);
    assert_eq!(h.registry.max_message_size(&ops()), bcn_core::DEFAULT_MAX_MESSAGE_SIZE);
}
