// Copyright 2025 Cowboy AI, LLC.

//! Change control request aggregate
//!
//! The aggregate owns every status mutation. Each method validates the
//! current status before applying its effect and fails with a typed
//! error otherwise, so an invalid transition can never be represented.
//! Multi-record completion decisions (evaluation thresholds, revision
//! and action gates) are computed by the service from sub-record
//! snapshots and applied here through the explicit `advance_*` methods.

use crate::entity::AggregateRoot;
use crate::errors::{DomainError, DomainResult};
use crate::identifiers::{DepartmentId, RequestId, UserId};
use crate::tracking::TrackingNumber;
use crate::workflow::state::{ImpactLevel, RequestStatus};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Rejection details, populated if and only if the request is Rejected
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    /// Why the request was rejected
    pub reason: String,
    /// Who rejected it
    pub rejected_by: UserId,
    /// When it was rejected
    pub rejected_at: DateTime<Utc>,
    /// The workflow step the request was at when rejected
    pub rejected_in_step: u8,
}

/// The change control request aggregate root
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeControlRequest {
    id: RequestId,
    version: u64,

    /// Temporary tracking number, assigned at initiation
    pub temporary_number: TrackingNumber,
    /// Final tracking number, assigned at QA registration
    pub final_number: Option<TrackingNumber>,

    /// User who initiated the request
    pub initiator: UserId,
    /// Department of the initiator
    pub department: DepartmentId,
    /// Request title
    pub title: String,
    /// Detailed description of the change
    pub description: String,

    /// Impact level assigned by QA
    pub impact_level: Option<ImpactLevel>,
    /// Target completion date assigned by QA
    pub target_completion: Option<NaiveDate>,
    /// QA user who registered the request
    pub qa_registered_by: Option<UserId>,
    /// When QA registration happened
    pub qa_registered_at: Option<DateTime<Utc>>,

    status: RequestStatus,
    rejection: Option<Rejection>,

    /// When the request was created
    pub created_at: DateTime<Utc>,
    /// When the request was last updated
    pub updated_at: DateTime<Utc>,
    /// When the request reached Closed
    pub closed_at: Option<DateTime<Utc>>,
}

impl ChangeControlRequest {
    /// Create a new request in Draft status
    pub fn new(
        temporary_number: TrackingNumber,
        initiator: UserId,
        department: DepartmentId,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: RequestId::new(),
            version: 0,
            temporary_number,
            final_number: None,
            initiator,
            department,
            title: title.into(),
            description: description.into(),
            impact_level: None,
            target_completion: None,
            qa_registered_by: None,
            qa_registered_at: None,
            status: RequestStatus::Draft,
            rejection: None,
            created_at: now,
            updated_at: now,
            closed_at: None,
        }
    }

    /// Current workflow status
    pub fn status(&self) -> RequestStatus {
        self.status
    }

    /// Rejection details, present only when the request is Rejected
    pub fn rejection(&self) -> Option<&Rejection> {
        self.rejection.as_ref()
    }

    /// Current workflow step (1-11), derived from status.
    ///
    /// A rejected request reports the step of the gate it was rejected
    /// at.
    pub fn current_step(&self) -> u8 {
        match self.status.step() {
            Some(step) => step,
            None => self
                .rejection
                .as_ref()
                .map(|r| r.rejected_in_step)
                .unwrap_or(0),
        }
    }

    /// Whether the request has reached a terminal status
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Fail unless the request is in the expected status
    pub fn ensure_status(&self, operation: &str, expected: RequestStatus) -> DomainResult<()> {
        if self.status != expected {
            return Err(DomainError::invalid_state(operation, expected, self.status));
        }
        Ok(())
    }

    /// Fail unless the request is in one of the expected statuses
    pub fn ensure_status_in(
        &self,
        operation: &str,
        expected: &[RequestStatus],
    ) -> DomainResult<()> {
        if !expected.contains(&self.status) {
            let expected = expected
                .iter()
                .map(|s| s.name())
                .collect::<Vec<_>>()
                .join(" or ");
            return Err(DomainError::invalid_state(operation, expected, self.status));
        }
        Ok(())
    }

    fn set_status(&mut self, to: RequestStatus) {
        debug_assert!(self.status.can_transition_to(&to));
        self.status = to;
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Step 2: route the drafted request to the department head
    pub fn route_to_dept_head(&mut self) -> DomainResult<()> {
        self.ensure_status("route_to_dept_head", RequestStatus::Draft)?;
        self.set_status(RequestStatus::PendingDeptHead);
        Ok(())
    }

    /// Step 2: department head approves feasibility
    pub fn approve_feasibility(&mut self) -> DomainResult<()> {
        self.ensure_status("dept_head_decision", RequestStatus::PendingDeptHead)?;
        self.set_status(RequestStatus::PendingQaRegistration);
        Ok(())
    }

    /// Reject the request at the current gate.
    ///
    /// Only valid where the transition table allows a rejection edge.
    /// Records the rejection fields together with the step the request
    /// was at, keeping the rejection invariant intact.
    pub fn reject(&mut self, rejected_by: UserId, reason: impl Into<String>) -> DomainResult<()> {
        if !self.status.can_transition_to(&RequestStatus::Rejected) {
            return Err(DomainError::invalid_state(
                "reject",
                "a status with a rejection edge",
                self.status,
            ));
        }
        let rejected_in_step = self.current_step();
        self.rejection = Some(Rejection {
            reason: reason.into(),
            rejected_by,
            rejected_at: Utc::now(),
            rejected_in_step,
        });
        self.status = RequestStatus::Rejected;
        self.touch();
        Ok(())
    }

    /// Step 3: QA registration and categorization
    pub fn register(
        &mut self,
        final_number: TrackingNumber,
        impact_level: ImpactLevel,
        target_completion: NaiveDate,
        registered_by: UserId,
    ) -> DomainResult<()> {
        self.ensure_status("qa_register", RequestStatus::PendingQaRegistration)?;
        self.final_number = Some(final_number);
        self.impact_level = Some(impact_level);
        self.target_completion = Some(target_completion);
        self.qa_registered_by = Some(registered_by);
        self.qa_registered_at = Some(Utc::now());
        self.set_status(RequestStatus::PendingCftEvaluation);
        Ok(())
    }

    /// Step 5: all evaluations are in and impact mandates a risk
    /// assessment that has not completed yet
    pub fn advance_to_risk_assessment(&mut self) -> DomainResult<()> {
        self.ensure_status("advance_to_risk_assessment", RequestStatus::PendingCftEvaluation)?;
        self.set_status(RequestStatus::PendingRiskAssessment);
        Ok(())
    }

    /// Step 6: move into the document management phase
    pub fn advance_to_document_update(&mut self) -> DomainResult<()> {
        self.ensure_status_in(
            "advance_to_document_update",
            &[
                RequestStatus::PendingCftEvaluation,
                RequestStatus::PendingRiskAssessment,
            ],
        )?;
        self.set_status(RequestStatus::PendingDocumentUpdate);
        Ok(())
    }

    /// Step 7: all document revisions resolved
    pub fn advance_to_action_plan(&mut self) -> DomainResult<()> {
        self.ensure_status("advance_to_action_plan", RequestStatus::PendingDocumentUpdate)?;
        self.set_status(RequestStatus::PendingActionPlan);
        Ok(())
    }

    /// Step 8: all action items resolved
    pub fn advance_to_qa_evaluation(&mut self) -> DomainResult<()> {
        self.ensure_status("advance_to_qa_evaluation", RequestStatus::PendingActionPlan)?;
        self.set_status(RequestStatus::PendingQaEvaluation);
        Ok(())
    }

    /// Step 9: QA final evaluation passed
    pub fn advance_to_qa_head_approval(&mut self) -> DomainResult<()> {
        self.ensure_status("qa_final_evaluation", RequestStatus::PendingQaEvaluation)?;
        self.set_status(RequestStatus::PendingQaHeadApproval);
        Ok(())
    }

    /// Step 10: QA head approves
    pub fn approve_by_qa_head(&mut self) -> DomainResult<()> {
        self.ensure_status("qa_head_approval", RequestStatus::PendingQaHeadApproval)?;
        self.set_status(RequestStatus::PendingVerification);
        Ok(())
    }

    /// Step 9 rejection path: QA head returns the request for
    /// correction, back to the action plan phase
    pub fn return_for_correction(&mut self) -> DomainResult<()> {
        self.ensure_status("qa_head_approval", RequestStatus::PendingQaHeadApproval)?;
        self.set_status(RequestStatus::PendingActionPlan);
        Ok(())
    }

    /// Step 10/11: post-implementation verification passed; the request
    /// closes
    pub fn close(&mut self) -> DomainResult<()> {
        self.ensure_status("verify", RequestStatus::PendingVerification)?;
        self.closed_at = Some(Utc::now());
        self.set_status(RequestStatus::Closed);
        Ok(())
    }

    /// Check aggregate invariants.
    ///
    /// Rejection fields are populated if and only if the status is
    /// Rejected; a closed request carries its closure timestamp.
    pub fn validate(&self) -> DomainResult<()> {
        match (self.status, &self.rejection) {
            (RequestStatus::Rejected, None) => Err(DomainError::Validation(
                "rejected request is missing its rejection record".to_string(),
            )),
            (status, Some(_)) if status != RequestStatus::Rejected => {
                Err(DomainError::Validation(format!(
                    "rejection record present on a {status} request"
                )))
            }
            _ if self.status == RequestStatus::Closed && self.closed_at.is_none() => Err(
                DomainError::Validation("closed request has no closure timestamp".to_string()),
            ),
            _ => Ok(()),
        }
    }
}

impl AggregateRoot for ChangeControlRequest {
    type Id = RequestId;

    fn id(&self) -> RequestId {
        self.id
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn increment_version(&mut self) {
        self.version += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn draft() -> ChangeControlRequest {
        ChangeControlRequest::new(
            TrackingNumber::new("REQ/CC/25/QA/00001"),
            UserId::new(),
            DepartmentId::new(),
            "Replace labeling line",
            "Swap the labeling line for the new model",
        )
    }

    #[test]
    fn test_new_request_is_draft_step_one() {
        let request = draft();
        assert_eq!(request.status(), RequestStatus::Draft);
        assert_eq!(request.current_step(), 1);
        assert!(request.rejection().is_none());
        request.validate().unwrap();
    }

    #[test]
    fn test_route_then_approve_feasibility() {
        let mut request = draft();
        request.route_to_dept_head().unwrap();
        assert_eq!(request.status(), RequestStatus::PendingDeptHead);
        assert_eq!(request.current_step(), 2);

        request.approve_feasibility().unwrap();
        assert_eq!(request.status(), RequestStatus::PendingQaRegistration);
    }

    #[test]
    fn test_route_requires_draft() {
        let mut request = draft();
        request.route_to_dept_head().unwrap();
        let err = request.route_to_dept_head().unwrap_err();
        assert!(err.is_invalid_state());
    }

    #[test]
    fn test_rejection_populates_fields_and_step() {
        let mut request = draft();
        request.route_to_dept_head().unwrap();
        let head = UserId::new();
        request.reject(head, "not needed").unwrap();

        assert_eq!(request.status(), RequestStatus::Rejected);
        let rejection = request.rejection().unwrap();
        assert_eq!(rejection.reason, "not needed");
        assert_eq!(rejection.rejected_by, head);
        assert_eq!(rejection.rejected_in_step, 2);
        assert_eq!(request.current_step(), 2);
        request.validate().unwrap();
    }

    #[test]
    fn test_reject_only_on_rejection_edges() {
        let mut request = draft();
        // Draft has no rejection edge
        assert!(request.reject(UserId::new(), "nope").unwrap_err().is_invalid_state());

        request.route_to_dept_head().unwrap();
        request.approve_feasibility().unwrap();
        // PendingQaRegistration has no rejection edge either
        assert!(request.reject(UserId::new(), "nope").unwrap_err().is_invalid_state());
    }

    #[test]
    fn test_register_sets_qa_fields() {
        let mut request = draft();
        request.route_to_dept_head().unwrap();
        request.approve_feasibility().unwrap();

        let qa = UserId::new();
        let target = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        request
            .register(
                TrackingNumber::new("REQ/CC/25/QA/00002"),
                ImpactLevel::Major,
                target,
                qa,
            )
            .unwrap();

        assert_eq!(request.status(), RequestStatus::PendingCftEvaluation);
        assert_eq!(request.impact_level, Some(ImpactLevel::Major));
        assert_eq!(request.target_completion, Some(target));
        assert_eq!(request.qa_registered_by, Some(qa));
        assert!(request.qa_registered_at.is_some());
    }

    #[test]
    fn test_terminal_request_accepts_nothing() {
        let mut request = draft();
        request.route_to_dept_head().unwrap();
        request.reject(UserId::new(), "stop").unwrap();

        assert!(request.approve_feasibility().unwrap_err().is_invalid_state());
        assert!(request.close().unwrap_err().is_invalid_state());
        assert!(request
            .register(
                TrackingNumber::new("REQ/CC/25/QA/00009"),
                ImpactLevel::Minor,
                NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
                UserId::new(),
            )
            .unwrap_err()
            .is_invalid_state());
    }

    #[test]
    fn test_close_sets_timestamp() {
        let mut request = draft();
        request.route_to_dept_head().unwrap();
        request.approve_feasibility().unwrap();
        request
            .register(
                TrackingNumber::new("REQ/CC/25/QA/00003"),
                ImpactLevel::Minor,
                NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
                UserId::new(),
            )
            .unwrap();
        request.advance_to_document_update().unwrap();
        request.advance_to_action_plan().unwrap();
        request.advance_to_qa_evaluation().unwrap();
        request.advance_to_qa_head_approval().unwrap();
        request.approve_by_qa_head().unwrap();
        request.close().unwrap();

        assert_eq!(request.status(), RequestStatus::Closed);
        assert_eq!(request.current_step(), 11);
        assert!(request.closed_at.is_some());
        request.validate().unwrap();
    }

    #[test]
    fn test_return_for_correction_resets_to_action_plan() {
        let mut request = draft();
        request.route_to_dept_head().unwrap();
        request.approve_feasibility().unwrap();
        request
            .register(
                TrackingNumber::new("REQ/CC/25/QA/00004"),
                ImpactLevel::Minor,
                NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
                UserId::new(),
            )
            .unwrap();
        request.advance_to_document_update().unwrap();
        request.advance_to_action_plan().unwrap();
        request.advance_to_qa_evaluation().unwrap();
        request.advance_to_qa_head_approval().unwrap();

        request.return_for_correction().unwrap();
        assert_eq!(request.status(), RequestStatus::PendingActionPlan);
        assert_eq!(request.current_step(), 7);
    }

    #[test]
    fn test_version_increments() {
        let mut request = draft();
        assert_eq!(request.version(), 0);
        request.increment_version();
        assert_eq!(request.version(), 1);
    }
}
