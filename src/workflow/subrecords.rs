// Copyright 2025 Cowboy AI, LLC.

//! Sub-record aggregates feeding completion signals into the workflow
//!
//! Each sub-record has a small lifecycle of its own; the request only
//! advances when the relevant phase gate reports completion. The gate
//! functions live here so the threshold logic exists exactly once.

use crate::errors::{DomainError, DomainResult};
use crate::identifiers::{ActionItemId, AssessmentId, DepartmentId, RequestId, RevisionId, UserId};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------
// CFT evaluators and evaluations
// ---------------------------------------------------------------------

/// Evaluator assignment for one department on one request.
///
/// Existence is the "assigned" signal; assignments have no status and
/// are immutable once created. Unique per (request, department).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CftEvaluator {
    /// The request being evaluated
    pub request: RequestId,
    /// Department the evaluator represents
    pub department: DepartmentId,
    /// The assigned evaluator
    pub evaluator: UserId,
    /// When the assignment was made
    pub assigned_at: DateTime<Utc>,
}

impl CftEvaluator {
    /// Create an assignment
    pub fn new(request: RequestId, department: DepartmentId, evaluator: UserId) -> Self {
        Self {
            request,
            department,
            evaluator,
            assigned_at: Utc::now(),
        }
    }
}

/// Kind of impact identified by an evaluator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImpactType {
    /// Affects day-to-day operations
    Operational,
    /// Affects product or process quality
    Quality,
    /// Affects regulatory filings or commitments
    Regulatory,
    /// Affects cost or revenue
    Financial,
    /// Affects equipment, systems, or methods
    Technical,
    /// Anything else
    Other,
}

/// Evaluator's decision on the proposed change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EvaluationDecision {
    /// Change is acceptable
    Approved,
    /// Acceptable subject to stated conditions
    ApprovedWithConditions,
    /// Change must not proceed
    Rejected,
    /// Evaluation not concluded yet
    Pending,
}

impl fmt::Display for EvaluationDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EvaluationDecision::Approved => "Approved",
            EvaluationDecision::ApprovedWithConditions => "Approved with Conditions",
            EvaluationDecision::Rejected => "Rejected",
            EvaluationDecision::Pending => "Pending",
        };
        write!(f, "{name}")
    }
}

/// Risk level assessed by an evaluator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RiskLevel {
    /// Negligible risk
    Low,
    /// Moderate risk
    Medium,
    /// Serious risk
    High,
    /// Unacceptable without mitigation
    Critical,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RiskLevel::Low => "Low",
            RiskLevel::Medium => "Medium",
            RiskLevel::High => "High",
            RiskLevel::Critical => "Critical",
        };
        write!(f, "{name}")
    }
}

/// One department's evaluation of a request.
///
/// Keyed by (request, department); re-submission by the assigned
/// evaluator overwrites the previous fields (idempotent upsert).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CftEvaluation {
    /// The request being evaluated
    pub request: RequestId,
    /// Department this evaluation speaks for
    pub department: DepartmentId,
    /// Evaluator who submitted it
    pub evaluator: UserId,
    /// Kind of impact identified
    pub impact_type: ImpactType,
    /// The decision
    pub decision: EvaluationDecision,
    /// Assessed risk level
    pub risk_level: RiskLevel,
    /// Free-text notes
    pub notes: String,
    /// When the evaluation was first submitted
    pub submitted_at: DateTime<Utc>,
    /// Set exactly when the decision leaves Pending
    pub completed_at: Option<DateTime<Utc>>,
}

impl CftEvaluation {
    /// Create an evaluation; the completion timestamp is set when the
    /// decision is already conclusive
    pub fn new(
        request: RequestId,
        department: DepartmentId,
        evaluator: UserId,
        impact_type: ImpactType,
        decision: EvaluationDecision,
        risk_level: RiskLevel,
        notes: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            request,
            department,
            evaluator,
            impact_type,
            decision,
            risk_level,
            notes: notes.into(),
            submitted_at: now,
            completed_at: (decision != EvaluationDecision::Pending).then_some(now),
        }
    }

    /// Overwrite the evaluation fields on re-submission
    pub fn resubmit(
        &mut self,
        impact_type: ImpactType,
        decision: EvaluationDecision,
        risk_level: RiskLevel,
        notes: impl Into<String>,
    ) {
        self.impact_type = impact_type;
        self.decision = decision;
        self.risk_level = risk_level;
        self.notes = notes.into();
        if decision != EvaluationDecision::Pending {
            self.completed_at = Some(Utc::now());
        }
    }
}

// ---------------------------------------------------------------------
// Risk assessment
// ---------------------------------------------------------------------

/// Lifecycle of a risk assessment task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssessmentStatus {
    /// Created, not started
    Pending,
    /// Being worked on
    InProgress,
    /// Findings recorded
    Completed,
    /// Abandoned
    Cancelled,
}

/// Risk assessment task, auto-created for Major/Critical impact.
/// At most one exists per request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// Unique identifier
    pub id: AssessmentId,
    /// The request under assessment
    pub request: RequestId,
    /// User assigned to perform the assessment
    pub assigned_to: UserId,
    /// Current lifecycle status
    pub status: AssessmentStatus,
    /// Findings, populated on completion
    pub findings: String,
    /// Recommendations, populated on completion
    pub recommendations: String,
    /// When the task was created
    pub created_at: DateTime<Utc>,
    /// When the task completed
    pub completed_at: Option<DateTime<Utc>>,
}

impl RiskAssessment {
    /// Create a pending assessment task
    pub fn new(request: RequestId, assigned_to: UserId) -> Self {
        Self {
            id: AssessmentId::new(),
            request,
            assigned_to,
            status: AssessmentStatus::Pending,
            findings: String::new(),
            recommendations: String::new(),
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Move the task from Pending to InProgress
    pub fn start(&mut self) -> DomainResult<()> {
        if self.status != AssessmentStatus::Pending {
            return Err(DomainError::invalid_state(
                "start_risk_assessment",
                "Pending",
                format!("{:?}", self.status),
            ));
        }
        self.status = AssessmentStatus::InProgress;
        Ok(())
    }

    /// Record findings and complete the task
    pub fn complete(
        &mut self,
        findings: impl Into<String>,
        recommendations: impl Into<String>,
    ) -> DomainResult<()> {
        if !matches!(
            self.status,
            AssessmentStatus::Pending | AssessmentStatus::InProgress
        ) {
            return Err(DomainError::invalid_state(
                "complete_risk_assessment",
                "Pending or InProgress",
                format!("{:?}", self.status),
            ));
        }
        self.findings = findings.into();
        self.recommendations = recommendations.into();
        self.status = AssessmentStatus::Completed;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Abandon the task
    pub fn cancel(&mut self) -> DomainResult<()> {
        if !matches!(
            self.status,
            AssessmentStatus::Pending | AssessmentStatus::InProgress
        ) {
            return Err(DomainError::invalid_state(
                "cancel_risk_assessment",
                "Pending or InProgress",
                format!("{:?}", self.status),
            ));
        }
        self.status = AssessmentStatus::Cancelled;
        Ok(())
    }
}

// ---------------------------------------------------------------------
// Document revisions
// ---------------------------------------------------------------------

/// Lifecycle of a document revision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RevisionStatus {
    /// Awaiting work
    Pending,
    /// Being revised
    InProgress,
    /// Revision done
    Completed,
    /// Determined to need no change
    NotRequired,
}

impl RevisionStatus {
    /// Whether this revision still blocks the document phase gate
    pub fn is_open(&self) -> bool {
        matches!(self, RevisionStatus::Pending | RevisionStatus::InProgress)
    }
}

/// A document identified as needing revision for the change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRevision {
    /// Unique identifier
    pub id: RevisionId,
    /// The request this revision belongs to
    pub request: RequestId,
    /// Name of the document
    pub document_name: String,
    /// Document code/reference
    pub document_code: String,
    /// Department responsible for the revision
    pub assigned_department: DepartmentId,
    /// Current lifecycle status
    pub status: RevisionStatus,
    /// Notes about the revision
    pub revision_notes: String,
    /// Who completed the revision
    pub revised_by: Option<UserId>,
    /// When the revision completed
    pub revised_at: Option<DateTime<Utc>>,
}

impl DocumentRevision {
    /// Create a pending revision
    pub fn new(
        request: RequestId,
        document_name: impl Into<String>,
        document_code: impl Into<String>,
        assigned_department: DepartmentId,
    ) -> Self {
        Self {
            id: RevisionId::new(),
            request,
            document_name: document_name.into(),
            document_code: document_code.into(),
            assigned_department,
            status: RevisionStatus::Pending,
            revision_notes: String::new(),
            revised_by: None,
            revised_at: None,
        }
    }

    /// Move the revision from Pending to InProgress
    pub fn start(&mut self) -> DomainResult<()> {
        if self.status != RevisionStatus::Pending {
            return Err(DomainError::invalid_state(
                "start_document_revision",
                "Pending",
                format!("{:?}", self.status),
            ));
        }
        self.status = RevisionStatus::InProgress;
        Ok(())
    }

    /// Complete the revision, recording actor and notes atomically
    pub fn complete(&mut self, revised_by: UserId, notes: impl Into<String>) -> DomainResult<()> {
        if !self.status.is_open() {
            return Err(DomainError::invalid_state(
                "complete_document_revision",
                "Pending or InProgress",
                format!("{:?}", self.status),
            ));
        }
        self.status = RevisionStatus::Completed;
        self.revision_notes = notes.into();
        self.revised_by = Some(revised_by);
        self.revised_at = Some(Utc::now());
        Ok(())
    }

    /// Record that the document turned out not to need revision
    pub fn mark_not_required(&mut self, decided_by: UserId) -> DomainResult<()> {
        if !self.status.is_open() {
            return Err(DomainError::invalid_state(
                "mark_revision_not_required",
                "Pending or InProgress",
                format!("{:?}", self.status),
            ));
        }
        self.status = RevisionStatus::NotRequired;
        self.revised_by = Some(decided_by);
        self.revised_at = Some(Utc::now());
        Ok(())
    }
}

// ---------------------------------------------------------------------
// Action plan items
// ---------------------------------------------------------------------

/// Lifecycle of an action plan item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionStatus {
    /// Awaiting work
    Pending,
    /// Being implemented
    InProgress,
    /// Done
    Completed,
    /// Abandoned
    Cancelled,
}

impl ActionStatus {
    /// Whether this item still blocks the implementation phase gate
    pub fn is_open(&self) -> bool {
        matches!(self, ActionStatus::Pending | ActionStatus::InProgress)
    }
}

/// One item of the implementation action plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionItem {
    /// Unique identifier
    pub id: ActionItemId,
    /// The request this item implements
    pub request: RequestId,
    /// What has to be done
    pub description: String,
    /// Person responsible for the action
    pub responsible_person: UserId,
    /// Expected completion date
    pub expected_timeline: NaiveDate,
    /// Current lifecycle status
    pub status: ActionStatus,
    /// Additional notes
    pub notes: String,
    /// Actual completion time
    pub completed_at: Option<DateTime<Utc>>,
    /// When the item was created
    pub created_at: DateTime<Utc>,
    /// When the item was last updated
    pub updated_at: DateTime<Utc>,
}

impl ActionItem {
    /// Create a pending action item
    pub fn new(
        request: RequestId,
        description: impl Into<String>,
        responsible_person: UserId,
        expected_timeline: NaiveDate,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: ActionItemId::new(),
            request,
            description: description.into(),
            responsible_person,
            expected_timeline,
            status: ActionStatus::Pending,
            notes: String::new(),
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move the item from Pending to InProgress
    pub fn start(&mut self) -> DomainResult<()> {
        if self.status != ActionStatus::Pending {
            return Err(DomainError::invalid_state(
                "start_action_item",
                "Pending",
                format!("{:?}", self.status),
            ));
        }
        self.status = ActionStatus::InProgress;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Complete the item with notes
    pub fn complete(&mut self, notes: impl Into<String>) -> DomainResult<()> {
        if !self.status.is_open() {
            return Err(DomainError::invalid_state(
                "complete_action_item",
                "Pending or InProgress",
                format!("{:?}", self.status),
            ));
        }
        self.status = ActionStatus::Completed;
        self.notes = notes.into();
        let now = Utc::now();
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Cancel the item; it no longer blocks the phase gate
    pub fn cancel(&mut self, notes: impl Into<String>) -> DomainResult<()> {
        if !self.status.is_open() {
            return Err(DomainError::invalid_state(
                "cancel_action_item",
                "Pending or InProgress",
                format!("{:?}", self.status),
            ));
        }
        self.status = ActionStatus::Cancelled;
        self.notes = notes.into();
        self.updated_at = Utc::now();
        Ok(())
    }
}

// ---------------------------------------------------------------------
// Phase gates
// ---------------------------------------------------------------------

/// Whether every assigned department has submitted its evaluation.
///
/// The store guarantees an evaluation only exists for an assignment, so
/// count equality is the completion signal.
pub fn evaluations_complete(evaluators: &[CftEvaluator], evaluations: &[CftEvaluation]) -> bool {
    !evaluators.is_empty() && evaluators.len() == evaluations.len()
}

/// Whether any submitted evaluation rejected the change
pub fn any_evaluation_rejected(evaluations: &[CftEvaluation]) -> bool {
    evaluations
        .iter()
        .any(|e| e.decision == EvaluationDecision::Rejected)
}

/// Whether the document phase gate is satisfied (no revision remains
/// Pending or InProgress)
pub fn revisions_resolved(revisions: &[DocumentRevision]) -> bool {
    revisions.iter().all(|r| !r.status.is_open())
}

/// Whether the implementation phase gate is satisfied (no action item
/// remains Pending or InProgress)
pub fn actions_resolved(items: &[ActionItem]) -> bool {
    items.iter().all(|i| !i.status.is_open())
}
