//! Progress reports surfaced to the dashboard and scheduler

use serde::{Deserialize, Serialize};

/// Outcome of one bounded orchestrator tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressReport {
    /// Items whose detail fields are current for the worked account.
    pub processed: u64,
    /// Items known to the mirror for the worked account.
    pub total: u64,
    /// True when no more work remains (the caller can stop re-invoking).
    pub completed: bool,
    pub message: String,
}

impl ProgressReport {
    pub fn noop(message: impl Into<String>) -> Self {
        Self { processed: 0, total: 0, completed: false, message: message.into() }
    }

    pub fn done(message: impl Into<String>) -> Self {
        Self { processed: 0, total: 0, completed: true, message: message.into() }
    }
}

/// JSON body returned by the `trigger_sync` entry point.
///
/// A failed tick is still a well-formed response with `success: false`; the
/// polling dashboard renders `message` verbatim and never sees a bare error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerSyncResponse {
    pub success: bool,
    pub completed: bool,
    pub processed: u64,
    pub total: u64,
    pub message: String,
}

impl TriggerSyncResponse {
    pub fn from_report(report: ProgressReport) -> Self {
        Self {
            success: true,
            completed: report.completed,
            processed: report.processed,
            total: report.total,
            message: report.message,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self { success: false, completed: false, processed: 0, total: 0, message: message.into() }
    }
}

/// Aggregate mirror numbers for the dashboard overview card.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorStatistics {
    pub total_items: i64,
    pub synced_items: i64,
    pub pending_items: i64,
    pub update_requested_items: i64,
    pub active_items: i64,
    pub total_visits: i64,
    /// Share of mirror rows with current detail fields, in percent.
    pub completion_rate: f64,
}
