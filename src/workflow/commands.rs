// Copyright 2025 Cowboy AI, LLC.

//! Operation payloads for the workflow service
//!
//! One struct per transition-table row. The request id and acting user
//! are passed alongside the payload, not inside it.

use crate::errors::{DomainError, DomainResult};
use crate::identifiers::{DepartmentId, UserId};
use crate::tracking::TrackingNumber;
use crate::workflow::state::ImpactLevel;
use crate::workflow::subrecords::{EvaluationDecision, ImpactType, RiskLevel};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Step 1: initiate a change control request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitiateRequest {
    /// User initiating the request
    pub initiator: UserId,
    /// Department of the initiator
    pub department: DepartmentId,
    /// Request title
    pub title: String,
    /// Detailed description of the change
    pub description: String,
}

impl InitiateRequest {
    /// Validate payload fields
    pub fn validate(&self) -> DomainResult<()> {
        if self.title.trim().is_empty() {
            return Err(DomainError::Validation("title is required".to_string()));
        }
        if self.description.trim().is_empty() {
            return Err(DomainError::Validation(
                "description is required".to_string(),
            ));
        }
        Ok(())
    }
}

/// Step 2: department head feasibility decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeptHeadDecision {
    /// Approve (true) or reject (false)
    pub approved: bool,
    /// Rejection reason; a default is used when empty
    #[serde(default)]
    pub reason: String,
}

/// An evaluator assignment requested at QA registration
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EvaluatorAssignment {
    /// Department the evaluator represents
    pub department: DepartmentId,
    /// The user to assign
    pub evaluator: UserId,
}

/// Step 3: QA registration and categorization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaRegistration {
    /// Explicit final number; generated when absent
    pub final_number: Option<TrackingNumber>,
    /// Impact level
    pub impact_level: ImpactLevel,
    /// Target completion date
    pub target_completion: NaiveDate,
    /// CFT evaluators to assign
    pub evaluators: Vec<EvaluatorAssignment>,
}

/// Step 4: one department's CFT evaluation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitEvaluation {
    /// Department the actor evaluates for
    pub department: DepartmentId,
    /// Kind of impact identified
    pub impact_type: ImpactType,
    /// The decision
    pub decision: EvaluationDecision,
    /// Assessed risk level
    pub risk_level: RiskLevel,
    /// Free-text notes
    #[serde(default)]
    pub notes: String,
}

/// Step 5: complete the risk assessment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteRiskAssessment {
    /// Risk assessment findings
    pub findings: String,
    /// Recommendations from the assessment
    pub recommendations: String,
}

/// A document to place under revision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevisionRequest {
    /// Name of the document
    pub document_name: String,
    /// Document code/reference
    #[serde(default)]
    pub document_code: String,
    /// Department responsible for the revision
    pub assigned_department: DepartmentId,
}

/// Step 6: suggest documents needing revision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanDocumentRevisions {
    /// Documents to place under revision; existing (name, code,
    /// department) rows are left untouched
    pub documents: Vec<RevisionRequest>,
}

/// An action plan item to create
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionItemRequest {
    /// What has to be done
    pub description: String,
    /// Person responsible for the action
    pub responsible_person: UserId,
    /// Expected completion date
    pub expected_timeline: NaiveDate,
}

/// Step 7: create action plan items
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateActionPlan {
    /// Items to insert
    pub items: Vec<ActionItemRequest>,
}

/// Step 8: QA final evaluation checklist
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaFinalEvaluation {
    /// CFT evaluations verified complete
    pub cft_complete: bool,
    /// Document updates verified complete
    pub document_updates_complete: bool,
    /// Risk assessment verified closed (Major/Critical only)
    pub risk_assessment_closed: bool,
    /// Regulatory filings verified complete
    pub regulatory_filings_complete: bool,
    /// Evaluation comments for the audit trail
    #[serde(default)]
    pub comments: String,
}

/// Step 9: QA head approval decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaHeadApproval {
    /// Approve (true) or return for correction (false)
    pub approved: bool,
    /// Reason when returning for correction
    #[serde(default)]
    pub reason: String,
}

/// Step 10: post-implementation verification checklist
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verification {
    /// Change implemented correctly
    pub change_implemented: bool,
    /// Training conducted
    pub training_conducted: bool,
    /// No adverse impact observed
    pub no_adverse_impact: bool,
    /// Verification comments for the audit trail
    #[serde(default)]
    pub comments: String,
}
