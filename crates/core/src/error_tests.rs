// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use super::*;
use yare::parameterized;

#[parameterized(
    invalid_status = { Error::InvalidStatus("done".into()), "done" },
    invalid_level = { Error::InvalidSecurityLevel("cosmic".into()), "cosmic" },
    invalid_kind = { Error::InvalidChannelKind("dm".into()), "dm" },
    corrupted = { Error::CorruptedData("bad row".into()), "bad row" },
)]
fn error_display_contains(err: Error, expected: &str) {
    assert!(err.to_string().contains(expected));
}

#[test]
fn error_invalid_transition_display() {
    let err = Error::InvalidTransition {
        from: "synced".into(),
        to: "syncing".into(),
        valid_targets: "(none)".into(),
    };
    let msg = err.to_string();
    assert!(msg.contains("synced"));
    assert!(msg.contains("syncing"));
    assert!(msg.contains("hint"));
}

#[test]
fn error_from_io() {
    let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
    let err: Error = io_err.into();
    assert!(matches!(err, Error::Io(_)));
}

#[test]
fn error_from_json() {
    let json_err = serde_json::from_str::<()>("invalid").unwrap_err();
    let err: Error = json_err.into();
    assert!(matches!(err, Error::Json(_)));
}
