//! # Change Control Domain
//!
//! Workflow state machine for regulated-document change control. A
//! request moves through an ordered sequence of gated steps -
//! initiation, department-head approval, QA registration,
//! cross-functional evaluation, optional risk assessment, document
//! revision, action-plan implementation, QA evaluation, QA head
//! approval, post-implementation verification, closure - each requiring
//! a specific actor role, producing an immutable audit-trail entry, and
//! deterministically computing the next state.
//!
//! The crate owns the state machine, the aggregates, and the phase
//! gates; it consumes storage, permissions, and identifier generation
//! through trait interfaces:
//!
//! - [`WorkflowStore`]: durable storage with atomic read-modify-write
//!   and an append-only history log ([`InMemoryStore`] is the reference
//!   implementation)
//! - [`PermissionOracle`]: boolean role-resolution predicates, answered
//!   by an explicit role-assignment table ([`RoleTable`])
//! - [`TrackingNumberGenerator`]: unique, human-readable tracking
//!   numbers scoped by department and year
//!
//! ## Design principles
//!
//! 1. **Type safety**: phantom-typed IDs keep request, user, and
//!    department identifiers apart at compile time
//! 2. **Guarded transitions**: every status mutation validates the
//!    current status first; invalid moves are typed errors, never
//!    partial writes
//! 3. **Derived step numbers**: the step shown to users is a pure
//!    function of status, so the two cannot drift
//! 4. **Audit completeness**: every transition appends at least one
//!    history entry; entries are never updated or deleted

#![warn(missing_docs)]

mod entity;
mod errors;
mod identifiers;
mod org;
mod permissions;
mod store;
mod tracking;
pub mod workflow;

pub use entity::{AggregateRoot, Entity, EntityId};
pub use errors::{DomainError, DomainResult};
pub use identifiers::{
    ActionItemId, ActionItemMarker, AssessmentId, AssessmentMarker, DepartmentId,
    DepartmentMarker, RequestId, RequestMarker, RevisionId, RevisionMarker, UserId, UserMarker,
};
pub use org::{Department, User};
pub use permissions::{
    authorize, PermissionOracle, Role, RoleAssignment, RoleScope, RoleTable, WorkflowAction,
};
pub use store::{InMemoryStore, NewRequest, WorkflowStore};
pub use tracking::{
    current_year_suffix, next_in_sequence, number_prefix, TrackingKind, TrackingNumber,
    TrackingNumberGenerator, GENERIC_DEPARTMENT_CODE,
};
pub use workflow::{
    actions_resolved, any_evaluation_rejected, evaluations_complete, revisions_resolved,
    step_name, ActionItem, ActionItemRequest, ActionStatus, AssessmentStatus,
    CftEvaluation, CftEvaluator, ChangeControlRequest, ChangeControlService,
    CompleteRiskAssessment, CreateActionPlan, DeptHeadDecision, DocumentRevision,
    EvaluationDecision, EvaluatorAssignment, ImpactLevel, ImpactType, InitiateRequest,
    PlanDocumentRevisions, QaFinalEvaluation, QaHeadApproval, QaRegistration, Rejection,
    RequestSnapshot, RequestStatus, RevisionRequest, RevisionStatus, RiskAssessment, RiskLevel,
    SubmitEvaluation, Verification, WorkflowHistoryEntry,
};
