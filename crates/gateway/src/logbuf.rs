// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fixed-capacity debug log exposed via the authenticated `/api/debug`
//! endpoint. Oldest entries are evicted first; every stored message is
//! scrubbed for secret material before it lands in the buffer.

use std::collections::VecDeque;
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Maximum retained entries.
pub const LOG_CAPACITY: usize = 200;

const REDACTED: &str = "[REDACTED]";

/// A single captured log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// Epoch milliseconds.
    pub timestamp: u64,
    pub tag: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Bounded FIFO of scrubbed log entries.
#[derive(Debug, Default)]
pub struct LogBuffer {
    entries: Mutex<VecDeque<LogEntry>>,
}

impl LogBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry, evicting the oldest when full.
    pub fn push(&self, tag: &str, message: &str, data: Option<serde_json::Value>) {
        let entry = LogEntry {
            timestamp: now_millis(),
            tag: tag.to_owned(),
            message: scrub(message),
            data: data.map(scrub_value),
        };
        let mut entries = self.entries.lock();
        if entries.len() == LOG_CAPACITY {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Snapshot entries, newest last. `limit` keeps only the newest N.
    pub fn entries(&self, limit: Option<usize>) -> Vec<LogEntry> {
        let entries = self.entries.lock();
        let skip = limit.map(|n| entries.len().saturating_sub(n)).unwrap_or(0);
        entries.iter().skip(skip).cloned().collect()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

fn now_millis() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

fn scrub_patterns() -> &'static Vec<(Regex, String)> {
    static PATTERNS: OnceLock<Vec<(Regex, String)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            // Authorization header / bearer values.
            (r"(?i)bearer\s+[A-Za-z0-9._~+/=-]+", REDACTED.to_owned()),
            // JSON fields carrying token material.
            (
                r#"(?i)("(?:access_token|id_token|refresh_token|client_secret|token)"\s*:\s*")[^"]*(")"#,
                format!("${{1}}{REDACTED}${{2}}"),
            ),
            // Provider access-token prefixes.
            (r"sk-ant-[A-Za-z0-9_-]+", REDACTED.to_owned()),
            // JWT-shaped blobs.
            (
                r"eyJ[A-Za-z0-9_-]{8,}\.[A-Za-z0-9_-]{8,}\.[A-Za-z0-9_-]+",
                REDACTED.to_owned(),
            ),
        ]
        .into_iter()
        .filter_map(|(pattern, replacement)| Regex::new(pattern).ok().map(|re| (re, replacement)))
        .collect()
    })
}

/// Best-effort removal of secret material from a message or stack trace.
pub fn scrub(input: &str) -> String {
    let mut out = input.to_owned();
    for (re, replacement) in scrub_patterns() {
        out = re.replace_all(&out, replacement.as_str()).into_owned();
    }
    out
}

fn scrub_value(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::String(s) => serde_json::Value::String(scrub(&s)),
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.into_iter().map(scrub_value).collect())
        }
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.into_iter()
                .map(|(k, v)| {
                    if matches!(
                        k.as_str(),
                        "access_token" | "id_token" | "refresh_token" | "client_secret" | "token"
                    ) {
                        (k, serde_json::Value::String(REDACTED.to_owned()))
                    } else {
                        (k, scrub_value(v))
                    }
                })
                .collect(),
        ),
        other => other,
    }
}

#[cfg(test)]
#[path = "logbuf_tests.rs"]
mod tests;
