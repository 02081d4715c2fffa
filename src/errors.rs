// Copyright 2025 Cowboy AI, LLC.

//! Error types for change control workflow operations

use thiserror::Error;

/// Errors that can occur while driving a change control request through
/// its workflow
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    /// Operation attempted while the request is in the wrong status
    #[error("Invalid state for {operation}: expected {expected}, found {actual}")]
    InvalidState {
        /// The operation that was attempted
        operation: String,
        /// Status (or statuses) the operation requires
        expected: String,
        /// Status the request was actually in
        actual: String,
    },

    /// Actor lacks the role or assignment the transition requires
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Malformed or missing payload data
    #[error("Validation error: {0}")]
    Validation(String),

    /// A tracking number that must be unique already exists
    #[error("Duplicate tracking number: {0}")]
    DuplicateTrackingNumber(String),

    /// Referenced entity does not exist
    #[error("Entity not found: {entity_type} with id {id}")]
    EntityNotFound {
        /// Type of entity that wasn't found
        entity_type: String,
        /// ID that was searched for
        id: String,
    },

    /// Concurrency conflict
    #[error("Concurrency conflict: expected version {expected}, but found {actual}")]
    ConcurrencyConflict {
        /// Expected version
        expected: u64,
        /// Actual version
        actual: u64,
    },

    /// Deletion blocked because the entity is still referenced by
    /// retained workflow records
    #[error("Protected reference: {0}")]
    ProtectedReference(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for workflow operations
pub type DomainResult<T> = Result<T, DomainError>;

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::Serialization(err.to_string())
    }
}

impl DomainError {
    /// Create an invalid-state error from displayable statuses
    pub fn invalid_state(
        operation: impl Into<String>,
        expected: impl ToString,
        actual: impl ToString,
    ) -> Self {
        DomainError::InvalidState {
            operation: operation.into(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// Create a not-found error for an entity type and id
    pub fn not_found(entity_type: impl Into<String>, id: impl ToString) -> Self {
        DomainError::EntityNotFound {
            entity_type: entity_type.into(),
            id: id.to_string(),
        }
    }

    /// Check if this is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, DomainError::EntityNotFound { .. })
    }

    /// Check if this is an input-level validation error
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            DomainError::Validation(_) | DomainError::DuplicateTrackingNumber(_)
        )
    }

    /// Check if this is a permission error
    pub fn is_permission_error(&self) -> bool {
        matches!(self, DomainError::PermissionDenied(_))
    }

    /// Check if this is a concurrency error
    pub fn is_concurrency_error(&self) -> bool {
        matches!(self, DomainError::ConcurrencyConflict { .. })
    }

    /// Check if this is an invalid-state error
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, DomainError::InvalidState { .. })
    }
}
