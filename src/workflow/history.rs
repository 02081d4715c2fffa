//! Append-only workflow audit trail
//!
//! Every transition writes at least one entry; entries are never
//! updated or deleted. An entry whose previous and new status are equal
//! records a sub-record mutation that did not cross a phase gate.

use crate::identifiers::{RequestId, UserId};
use crate::workflow::state::{step_name, RequestStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One audit-trail entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowHistoryEntry {
    /// The request this entry belongs to
    pub request: RequestId,
    /// Workflow step number (1-11)
    pub step: u8,
    /// Name of the workflow step
    pub step_name: String,
    /// User who performed the action
    pub actor: UserId,
    /// Action label
    pub action: String,
    /// Free-text comment
    pub comment: String,
    /// Status before the action
    pub previous_status: RequestStatus,
    /// Status after the action
    pub new_status: RequestStatus,
    /// When the entry was recorded
    pub recorded_at: DateTime<Utc>,
}

impl WorkflowHistoryEntry {
    /// Record an entry for a workflow step
    pub fn record(
        request: RequestId,
        step: u8,
        actor: UserId,
        action: impl Into<String>,
        comment: impl Into<String>,
        previous_status: RequestStatus,
        new_status: RequestStatus,
    ) -> Self {
        Self {
            request,
            step,
            step_name: step_name(step).to_string(),
            actor,
            action: action.into(),
            comment: comment.into(),
            previous_status,
            new_status,
            recorded_at: Utc::now(),
        }
    }

    /// Whether this entry recorded a status change
    pub fn changed_status(&self) -> bool {
        self.previous_status != self.new_status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_carries_step_name() {
        let entry = WorkflowHistoryEntry::record(
            RequestId::new(),
            3,
            UserId::new(),
            "QA registration completed",
            "Final CC: REQ/CC/25/QA/00002, Impact: Major",
            RequestStatus::PendingQaRegistration,
            RequestStatus::PendingCftEvaluation,
        );
        assert_eq!(entry.step_name, "QA-QMS Registration");
        assert!(entry.changed_status());
    }

    #[test]
    fn test_unchanged_status_entry() {
        let entry = WorkflowHistoryEntry::record(
            RequestId::new(),
            4,
            UserId::new(),
            "CFT evaluation completed for QA",
            "Decision: Approved, Risk: Low",
            RequestStatus::PendingCftEvaluation,
            RequestStatus::PendingCftEvaluation,
        );
        assert!(!entry.changed_status());
    }
}
