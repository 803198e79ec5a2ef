// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Host and usage metrics for the `/api/monitor` surface.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::OnceLock;
use sysinfo::{Disks, System};

use crate::store::SessionRecord;

/// Point-in-time host resource snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct SystemSnapshot {
    pub cpu_percent: f32,
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
    pub disk_used_bytes: u64,
    pub disk_total_bytes: u64,
}

/// Aggregates over the session-history table.
#[derive(Debug, Clone, Serialize)]
pub struct UsageAggregates {
    pub session_count: usize,
    pub total_turns: u64,
    pub total_cost_usd: f64,
}

fn system() -> &'static Mutex<System> {
    static SYSTEM: OnceLock<Mutex<System>> = OnceLock::new();
    SYSTEM.get_or_init(|| Mutex::new(System::new()))
}

/// Sample CPU, memory, and disk. CPU usage is measured across refreshes of
/// a process-wide [`System`], so early calls may read 0.
pub fn snapshot() -> SystemSnapshot {
    let (cpu_percent, memory_used_bytes, memory_total_bytes) = {
        let mut sys = system().lock();
        sys.refresh_cpu_usage();
        sys.refresh_memory();
        (sys.global_cpu_usage(), sys.used_memory(), sys.total_memory())
    };

    let disks = Disks::new_with_refreshed_list();
    let mut disk_total_bytes = 0u64;
    let mut disk_avail = 0u64;
    for disk in disks.list() {
        disk_total_bytes += disk.total_space();
        disk_avail += disk.available_space();
    }

    SystemSnapshot {
        cpu_percent,
        memory_used_bytes,
        memory_total_bytes,
        disk_used_bytes: disk_total_bytes.saturating_sub(disk_avail),
        disk_total_bytes,
    }
}

/// Roll the session history up into usage totals.
pub fn usage_aggregates(sessions: &[SessionRecord]) -> UsageAggregates {
    UsageAggregates {
        session_count: sessions.len(),
        total_turns: sessions.iter().map(|s| s.turn_count).sum(),
        total_cost_usd: sessions.iter().map(|s| s.cost_usd).sum(),
    }
}

#[cfg(test)]
#[path = "monitor_tests.rs"]
mod tests;
