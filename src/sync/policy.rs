// ABOUTME: SyncPolicy - chooses Skip, Incremental, or Full from a change report
// ABOUTME: Pure decision on the share of rows needing re-embedding

use std::fmt;

use super::analyzer::ChangeReport;

pub const DEFAULT_CHANGE_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// Nothing changed: no store writes.
    Skip,
    /// Upsert new and changed rows, delete vanished ones.
    Incremental,
    /// Recreate the store from every current row.
    Full,
}

impl fmt::Display for SyncStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncStrategy::Skip => "skip",
            SyncStrategy::Incremental => "incremental",
            SyncStrategy::Full => "full",
        };
        f.write_str(name)
    }
}

/// A strategy together with the report that triggered it.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncDecision {
    pub strategy: SyncStrategy,
    pub report: ChangeReport,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncPolicy {
    /// Change ratio above which a full rebuild is chosen
    pub change_threshold: f64,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            change_threshold: DEFAULT_CHANGE_THRESHOLD,
        }
    }
}

impl SyncPolicy {
    pub fn new(change_threshold: f64) -> Self {
        Self { change_threshold }
    }

    /// Pick a strategy for `report`.
    ///
    /// A ratio equal to the threshold stays incremental; only a strictly
    /// larger share of new and changed rows triggers a rebuild.
    pub fn strategy_for(&self, report: &ChangeReport) -> SyncStrategy {
        if !report.has_changes() {
            SyncStrategy::Skip
        } else if report.change_ratio() > self.change_threshold {
            SyncStrategy::Full
        } else {
            SyncStrategy::Incremental
        }
    }

    pub fn decide(&self, report: ChangeReport) -> SyncDecision {
        SyncDecision {
            strategy: self.strategy_for(&report),
            report,
        }
    }
}
