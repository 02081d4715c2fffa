// Copyright 2025 Cowboy AI, LLC.

//! Organizational reference entities: users and departments
//!
//! These are consumed by the workflow, not owned by it. Deleting a user
//! or department that retained workflow records still reference is
//! blocked by the store (regulatory retention).

use crate::identifiers::{DepartmentId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user who can act in the workflow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Unique identifier
    pub id: UserId,
    /// Login name
    pub username: String,
    /// Home department, when known
    pub department: Option<DepartmentId>,
    /// When the user record was created
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Create a user with a generated id and no department
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            id: UserId::new(),
            username: username.into(),
            department: None,
            created_at: Utc::now(),
        }
    }

    /// Create a user belonging to a department
    pub fn in_department(username: impl Into<String>, department: DepartmentId) -> Self {
        Self {
            department: Some(department),
            ..Self::new(username)
        }
    }
}

/// A department with an optional head
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Department {
    /// Unique identifier
    pub id: DepartmentId,
    /// Short code used in tracking numbers (e.g. "QA", "PD", "RA")
    pub code: String,
    /// Full department name
    pub name: String,
    /// Department head, when assigned
    pub head: Option<UserId>,
    /// When the department record was created
    pub created_at: DateTime<Utc>,
    /// When the department record was last updated
    pub updated_at: DateTime<Utc>,
}

impl Department {
    /// Create a department with a generated id and no head
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: DepartmentId::new(),
            code: code.into(),
            name: name.into(),
            head: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Assign the department head
    pub fn with_head(mut self, head: UserId) -> Self {
        self.head = Some(head);
        self.updated_at = Utc::now();
        self
    }

    /// Whether the given user heads this department
    pub fn is_headed_by(&self, user: UserId) -> bool {
        self.head == Some(user)
    }
}
