//! Identifier types for the change control domain
//!
//! Each entity kind gets a marker type and an `EntityId` alias so that
//! request, user, and department identifiers cannot be confused at
//! compile time.

use crate::entity::EntityId;

/// Marker type for change control requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestMarker;

/// Marker type for users
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UserMarker;

/// Marker type for departments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepartmentMarker;

/// Marker type for risk assessments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AssessmentMarker;

/// Marker type for document revisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RevisionMarker;

/// Marker type for action plan items
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActionItemMarker;

/// Identifier of a change control request
pub type RequestId = EntityId<RequestMarker>;

/// Identifier of a user
pub type UserId = EntityId<UserMarker>;

/// Identifier of a department
pub type DepartmentId = EntityId<DepartmentMarker>;

/// Identifier of a risk assessment
pub type AssessmentId = EntityId<AssessmentMarker>;

/// Identifier of a document revision
pub type RevisionId = EntityId<RevisionMarker>;

/// Identifier of an action plan item
pub type ActionItemId = EntityId<ActionItemMarker>;
