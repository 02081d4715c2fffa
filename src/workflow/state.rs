//! Workflow states and the transition table
//!
//! The request status is the single source of truth for workflow
//! position; the step number shown to users is derived from it, never
//! stored, so the two can't drift.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a change control request
///
/// `Closed` and `Rejected` are terminal; every other status names the
/// gate the request is currently waiting at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestStatus {
    /// Just created, not yet routed
    Draft,
    /// Waiting for the department head's feasibility decision
    PendingDeptHead,
    /// Waiting for QA registration and categorization
    PendingQaRegistration,
    /// Waiting for cross-functional team evaluations
    PendingCftEvaluation,
    /// Waiting for the risk assessment to complete
    PendingRiskAssessment,
    /// Waiting for document revisions
    PendingDocumentUpdate,
    /// Waiting for action plan creation and implementation
    PendingActionPlan,
    /// Waiting for QA final evaluation
    PendingQaEvaluation,
    /// Waiting for QA head approval
    PendingQaHeadApproval,
    /// Waiting for post-implementation verification
    PendingVerification,
    /// Successfully closed
    Closed,
    /// Rejected at some gate
    Rejected,
}

impl RequestStatus {
    /// Human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            RequestStatus::Draft => "Draft",
            RequestStatus::PendingDeptHead => "Pending Department Head",
            RequestStatus::PendingQaRegistration => "Pending QA Registration",
            RequestStatus::PendingCftEvaluation => "Pending CFT Evaluation",
            RequestStatus::PendingRiskAssessment => "Pending Risk Assessment",
            RequestStatus::PendingDocumentUpdate => "Pending Document Update",
            RequestStatus::PendingActionPlan => "Pending Action Plan",
            RequestStatus::PendingQaEvaluation => "Pending QA Evaluation",
            RequestStatus::PendingQaHeadApproval => "Pending QA Head Approval",
            RequestStatus::PendingVerification => "Pending Verification",
            RequestStatus::Closed => "Closed",
            RequestStatus::Rejected => "Rejected",
        }
    }

    /// Workflow step (1-11) this status corresponds to.
    ///
    /// `Rejected` has no step of its own - a rejected request keeps the
    /// step of the gate it was rejected at, recorded alongside the
    /// rejection fields on the aggregate.
    pub fn step(&self) -> Option<u8> {
        match self {
            RequestStatus::Draft => Some(1),
            RequestStatus::PendingDeptHead => Some(2),
            RequestStatus::PendingQaRegistration => Some(3),
            RequestStatus::PendingCftEvaluation => Some(4),
            RequestStatus::PendingRiskAssessment => Some(5),
            RequestStatus::PendingDocumentUpdate => Some(6),
            RequestStatus::PendingActionPlan => Some(7),
            RequestStatus::PendingQaEvaluation => Some(8),
            RequestStatus::PendingQaHeadApproval => Some(9),
            RequestStatus::PendingVerification => Some(10),
            RequestStatus::Closed => Some(11),
            RequestStatus::Rejected => None,
        }
    }

    /// Whether this is a terminal status (no outgoing transitions)
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestStatus::Closed | RequestStatus::Rejected)
    }

    /// Check if a transition to the target status is valid
    pub fn can_transition_to(&self, target: &RequestStatus) -> bool {
        self.valid_transitions().contains(target)
    }

    /// All valid target statuses from this status
    pub fn valid_transitions(&self) -> Vec<RequestStatus> {
        use RequestStatus::*;
        match self {
            Draft => vec![PendingDeptHead],
            PendingDeptHead => vec![PendingQaRegistration, Rejected],
            PendingQaRegistration => vec![PendingCftEvaluation],
            PendingCftEvaluation => vec![PendingRiskAssessment, PendingDocumentUpdate, Rejected],
            PendingRiskAssessment => vec![PendingDocumentUpdate],
            PendingDocumentUpdate => vec![PendingActionPlan],
            PendingActionPlan => vec![PendingQaEvaluation],
            PendingQaEvaluation => vec![PendingQaHeadApproval],
            // QA head can return the request for correction
            PendingQaHeadApproval => vec![PendingVerification, PendingActionPlan],
            PendingVerification => vec![Closed],
            Closed | Rejected => vec![],
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Name of a workflow step as it appears in the audit trail
pub fn step_name(step: u8) -> &'static str {
    match step {
        1 => "Initiation",
        2 => "Department Head Feasibility",
        3 => "QA-QMS Registration",
        4 => "CFT Evaluation",
        5 => "Risk Assessment",
        6 => "Document Management",
        7 => "Action Plan & Implementation",
        8 => "QA Final Evaluation",
        9 => "QA Head Approval",
        10 => "Post-Implementation Verification",
        11 => "QA Closure",
        _ => "Unknown",
    }
}

/// Impact level assigned by QA at registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImpactLevel {
    /// Low impact; risk assessment is skipped
    Minor,
    /// Significant impact; mandatory risk assessment
    Major,
    /// Highest impact; mandatory risk assessment
    Critical,
}

impl ImpactLevel {
    /// Whether this level mandates a risk assessment
    pub fn requires_risk_assessment(&self) -> bool {
        matches!(self, ImpactLevel::Major | ImpactLevel::Critical)
    }

    /// Human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            ImpactLevel::Minor => "Minor",
            ImpactLevel::Major => "Major",
            ImpactLevel::Critical => "Critical",
        }
    }
}

impl fmt::Display for ImpactLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
