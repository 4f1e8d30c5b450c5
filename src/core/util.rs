//
// Copyright 2024-2025 Velvet Room, Inc.
// SPDX-License-Identifier: MIT
//

//! Small shared helpers.

use std::time::{Duration, SystemTime};

/// Wall-clock milliseconds since the Unix epoch, for `createdAt` stamps.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Scrubs an SDP blob for logging: `ice-pwd` lines are masked and the body
/// is truncated. SDP carries credentials and addresses and must never be
/// logged whole.
pub fn redact_sdp(sdp: &str) -> String {
    const MAX_LINES: usize = 4;
    let mut out = String::new();
    for (i, line) in sdp.lines().enumerate() {
        if i == MAX_LINES {
            out.push_str("...");
            break;
        }
        if !out.is_empty() {
            out.push('|');
        }
        if line.contains("ice-pwd") {
            out.push_str("a=ice-pwd:[ REDACTED ]");
        } else {
            out.push_str(line);
        }
    }
    format!("{} ({} bytes)", out, sdp.len())
}

/// Formats a call duration as `MM:SS`, minutes unbounded.
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    format!("{:02}:{:02}", total / 60, total % 60)
}
