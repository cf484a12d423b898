//! Per-host run statistics.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Counters for one host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostStats {
    pub ok: usize,
    pub changed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub unreachable: usize,
    pub rescued: usize,
    pub ignored: usize,
}

impl HostStats {
    pub fn merge(&mut self, other: &HostStats) {
        self.ok += other.ok;
        self.changed += other.changed;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.unreachable += other.unreachable;
        self.rescued += other.rescued;
        self.ignored += other.ignored;
    }
}

/// Which counter to bump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatKind {
    Ok,
    Changed,
    Failed,
    Skipped,
    Unreachable,
    Rescued,
    Ignored,
}

/// Statistics for every host touched by a run, in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    hosts: IndexMap<String, HostStats>,
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&mut self, host: &str, kind: StatKind) {
        let stats = self.hosts.entry(host.to_string()).or_default();
        let counter = match kind {
            StatKind::Ok => &mut stats.ok,
            StatKind::Changed => &mut stats.changed,
            StatKind::Failed => &mut stats.failed,
            StatKind::Skipped => &mut stats.skipped,
            StatKind::Unreachable => &mut stats.unreachable,
            StatKind::Rescued => &mut stats.rescued,
            StatKind::Ignored => &mut stats.ignored,
        };
        *counter += 1;
    }

    pub fn get(&self, host: &str) -> Option<&HostStats> {
        self.hosts.get(host)
    }

    pub fn hosts(&self) -> impl Iterator<Item = (&str, &HostStats)> {
        self.hosts.iter().map(|(name, stats)| (name.as_str(), stats))
    }

    /// Counters summed over every host.
    pub fn totals(&self) -> HostStats {
        let mut total = HostStats::default();
        for stats in self.hosts.values() {
            total.merge(stats);
        }
        total
    }

    pub fn merge(&mut self, other: &RunStats) {
        for (host, stats) in &other.hosts {
            self.hosts.entry(host.clone()).or_default().merge(stats);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}
