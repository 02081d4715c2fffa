// Copyright 2025 Cowboy AI, LLC.

//! Permission oracle and role assignments
//!
//! Resolves "may actor A perform action X on request R". The workflow
//! service consults the oracle through [`authorize`] before executing
//! every role-gated transition, and still re-validates the guards
//! intrinsic to a transition (department head identity, evaluator
//! assignment) from loaded data. Roles are explicit assignment rows
//! (user x role x scope) rather than derived from foreign keys or name
//! matching.

use crate::errors::{DomainError, DomainResult};
use crate::identifiers::{ActionItemId, DepartmentId, RequestId, RevisionId, UserId};
use crate::store::WorkflowStore;
use crate::workflow::request::ChangeControlRequest;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};

/// A role a user can hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Head of a department (department-scoped)
    DepartmentHead,
    /// Member of the QA function
    QaUser,
    /// Head of the QA function
    QaHead,
}

/// Scope a role assignment applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoleScope {
    /// Applies everywhere
    Global,
    /// Applies within one department
    Department(DepartmentId),
}

/// One row of the role-assignment table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignment {
    /// The user holding the role
    pub user: UserId,
    /// The role held
    pub role: Role,
    /// Where it applies
    pub scope: RoleScope,
}

/// Boolean role-resolution predicates consumed by the workflow service
/// and the boundary
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PermissionOracle: Send + Sync {
    /// Whether the actor heads the given department
    async fn is_department_head(&self, actor: UserId, department: DepartmentId) -> bool;

    /// Whether the actor belongs to the QA function
    async fn is_qa_user(&self, actor: UserId) -> bool;

    /// Whether the actor heads the QA function
    async fn is_qa_head(&self, actor: UserId) -> bool;

    /// Whether the actor is the assigned evaluator for (request,
    /// department)
    async fn is_assigned_evaluator(
        &self,
        actor: UserId,
        request: RequestId,
        department: DepartmentId,
    ) -> bool;

    /// Whether the actor is assigned to the request's risk assessment
    async fn is_assessment_assignee(&self, actor: UserId, request: RequestId) -> bool;

    /// Whether the actor is responsible for the action item
    async fn is_responsible_party(
        &self,
        actor: UserId,
        request: RequestId,
        item: ActionItemId,
    ) -> bool;

    /// Whether the actor may complete the document revision: a member
    /// of the assigned department, or its head
    async fn may_complete_revision(
        &self,
        actor: UserId,
        request: RequestId,
        revision: RevisionId,
    ) -> bool;

    /// Whether the actor may view the request at all
    async fn may_view_request(&self, actor: UserId, request: RequestId) -> bool;
}

/// Role-table oracle backed by explicit assignments plus the live
/// workflow records in the store
pub struct RoleTable {
    assignments: RwLock<Vec<RoleAssignment>>,
    store: Arc<dyn WorkflowStore>,
}

impl RoleTable {
    /// Create an empty role table over a store
    pub fn new(store: Arc<dyn WorkflowStore>) -> Self {
        Self {
            assignments: RwLock::new(Vec::new()),
            store,
        }
    }

    /// Add a role assignment
    pub fn grant(&self, user: UserId, role: Role, scope: RoleScope) {
        let mut assignments = self.assignments.write().unwrap();
        let row = RoleAssignment { user, role, scope };
        if !assignments.contains(&row) {
            assignments.push(row);
        }
    }

    /// Remove a role assignment
    pub fn revoke(&self, user: UserId, role: Role, scope: RoleScope) {
        self.assignments
            .write()
            .unwrap()
            .retain(|a| !(a.user == user && a.role == role && a.scope == scope));
    }

    fn holds(&self, user: UserId, role: Role, scope: RoleScope) -> bool {
        self.assignments
            .read()
            .unwrap()
            .iter()
            .any(|a| a.user == user && a.role == role && a.scope == scope)
    }
}

#[async_trait]
impl PermissionOracle for RoleTable {
    async fn is_department_head(&self, actor: UserId, department: DepartmentId) -> bool {
        self.holds(actor, Role::DepartmentHead, RoleScope::Department(department))
    }

    async fn is_qa_user(&self, actor: UserId) -> bool {
        // QA head implies QA membership
        self.holds(actor, Role::QaUser, RoleScope::Global)
            || self.holds(actor, Role::QaHead, RoleScope::Global)
    }

    async fn is_qa_head(&self, actor: UserId) -> bool {
        self.holds(actor, Role::QaHead, RoleScope::Global)
    }

    async fn is_assigned_evaluator(
        &self,
        actor: UserId,
        request: RequestId,
        department: DepartmentId,
    ) -> bool {
        match self.store.evaluators(request).await {
            Ok(evaluators) => evaluators
                .iter()
                .any(|e| e.department == department && e.evaluator == actor),
            Err(_) => false,
        }
    }

    async fn is_assessment_assignee(&self, actor: UserId, request: RequestId) -> bool {
        matches!(
            self.store.risk_assessment(request).await,
            Ok(Some(assessment)) if assessment.assigned_to == actor
        )
    }

    async fn is_responsible_party(
        &self,
        actor: UserId,
        request: RequestId,
        item: ActionItemId,
    ) -> bool {
        matches!(
            self.store.action_item(request, item).await,
            Ok(item) if item.responsible_person == actor
        )
    }

    async fn may_complete_revision(
        &self,
        actor: UserId,
        request: RequestId,
        revision: RevisionId,
    ) -> bool {
        let Ok(revision) = self.store.document_revision(request, revision).await else {
            return false;
        };
        if self
            .is_department_head(actor, revision.assigned_department)
            .await
        {
            return true;
        }
        matches!(
            self.store.user(actor).await,
            Ok(user) if user.department == Some(revision.assigned_department)
        )
    }

    async fn may_view_request(&self, actor: UserId, request: RequestId) -> bool {
        let Ok(aggregate) = self.store.request(request).await else {
            return false;
        };
        if aggregate.initiator == actor
            || self.is_department_head(actor, aggregate.department).await
            || self.is_qa_user(actor).await
            || self.is_assessment_assignee(actor, request).await
        {
            return true;
        }
        if let Ok(evaluators) = self.store.evaluators(request).await {
            if evaluators.iter().any(|e| e.evaluator == actor) {
                return true;
            }
        }
        if let Ok(items) = self.store.action_items(request).await {
            if items.iter().any(|i| i.responsible_person == actor) {
                return true;
            }
        }
        false
    }
}

/// A workflow operation, for permission resolution at the boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowAction {
    /// Initiate a request
    Initiate,
    /// Decide feasibility as department head
    DeptHeadDecision,
    /// Perform QA registration
    QaRegister,
    /// Submit a CFT evaluation for a department
    SubmitEvaluation {
        /// Department the evaluation speaks for
        department: DepartmentId,
    },
    /// Complete the risk assessment
    CompleteRiskAssessment,
    /// Complete a document revision
    CompleteDocumentRevision {
        /// The revision being completed
        revision: RevisionId,
    },
    /// Create action plan items
    CreateActionPlan,
    /// Complete an action plan item
    CompleteActionItem {
        /// The item being completed
        item: ActionItemId,
    },
    /// Perform QA final evaluation
    QaFinalEvaluation,
    /// Decide as QA head
    QaHeadApproval,
    /// Perform post-implementation verification
    Verify,
}

/// Resolve whether the actor may perform the action, mapping each
/// operation to its oracle predicate.
///
/// The workflow service calls this before executing a transition; a
/// denial rejects the call before any state is touched.
pub async fn authorize(
    oracle: &dyn PermissionOracle,
    action: WorkflowAction,
    actor: UserId,
    request: &ChangeControlRequest,
) -> DomainResult<()> {
    use crate::entity::AggregateRoot;

    let allowed = match action {
        // Any authenticated user can initiate
        WorkflowAction::Initiate => true,
        WorkflowAction::DeptHeadDecision => {
            oracle.is_department_head(actor, request.department).await
        }
        WorkflowAction::QaRegister => oracle.is_qa_user(actor).await,
        WorkflowAction::SubmitEvaluation { department } => {
            oracle
                .is_assigned_evaluator(actor, request.id(), department)
                .await
        }
        WorkflowAction::CompleteRiskAssessment => {
            oracle.is_assessment_assignee(actor, request.id()).await
                || oracle.is_qa_user(actor).await
        }
        WorkflowAction::CompleteDocumentRevision { revision } => {
            oracle
                .may_complete_revision(actor, request.id(), revision)
                .await
        }
        WorkflowAction::CreateActionPlan => {
            oracle.is_qa_user(actor).await || request.initiator == actor
        }
        WorkflowAction::CompleteActionItem { item } => {
            oracle
                .is_responsible_party(actor, request.id(), item)
                .await
                || oracle.is_qa_user(actor).await
        }
        WorkflowAction::QaFinalEvaluation => oracle.is_qa_user(actor).await,
        WorkflowAction::QaHeadApproval => oracle.is_qa_head(actor).await,
        WorkflowAction::Verify => oracle.is_qa_user(actor).await,
    };

    if allowed {
        Ok(())
    } else {
        Err(DomainError::PermissionDenied(format!(
            "user {actor} may not perform {action:?}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::org::{Department, User};
    use crate::store::{InMemoryStore, NewRequest};
    use crate::workflow::subrecords::CftEvaluator;

    async fn seeded() -> (Arc<InMemoryStore>, RoleTable, ChangeControlRequest, DepartmentId, UserId)
    {
        let store = Arc::new(InMemoryStore::new());
        let initiator = User::new("initiator");
        let dept = Department::new("PD", "Product Development");
        let (initiator_id, dept_id) = (initiator.id, dept.id);
        store.insert_user(initiator).await.unwrap();
        store.insert_department(dept).await.unwrap();

        let request = store
            .create_request(NewRequest {
                initiator: initiator_id,
                department: dept_id,
                title: "New mold".to_string(),
                description: "Introduce mold #4".to_string(),
            })
            .await
            .unwrap();

        let table = RoleTable::new(store.clone() as Arc<dyn WorkflowStore>);
        (store, table, request, dept_id, initiator_id)
    }

    #[tokio::test]
    async fn test_role_table_scoping() {
        let (_, table, _, dept, _) = seeded().await;
        let head = UserId::new();
        let other_dept = DepartmentId::new();

        table.grant(head, Role::DepartmentHead, RoleScope::Department(dept));
        assert!(table.is_department_head(head, dept).await);
        assert!(!table.is_department_head(head, other_dept).await);

        table.revoke(head, Role::DepartmentHead, RoleScope::Department(dept));
        assert!(!table.is_department_head(head, dept).await);
    }

    #[tokio::test]
    async fn test_qa_head_implies_qa_user() {
        let (_, table, _, _, _) = seeded().await;
        let qa_head = UserId::new();
        table.grant(qa_head, Role::QaHead, RoleScope::Global);

        assert!(table.is_qa_head(qa_head).await);
        assert!(table.is_qa_user(qa_head).await);
        assert!(!table.is_qa_head(UserId::new()).await);
    }

    #[tokio::test]
    async fn test_evaluator_predicate_follows_assignments() {
        use crate::entity::AggregateRoot;

        let (store, table, request, dept, _) = seeded().await;
        let evaluator = UserId::new();

        assert!(!table.is_assigned_evaluator(evaluator, request.id(), dept).await);
        store
            .assign_evaluator(CftEvaluator::new(request.id(), dept, evaluator))
            .await
            .unwrap();
        assert!(table.is_assigned_evaluator(evaluator, request.id(), dept).await);
    }

    #[tokio::test]
    async fn test_view_permission_covers_participants() {
        use crate::entity::AggregateRoot;

        let (store, table, request, dept, initiator) = seeded().await;
        let evaluator = UserId::new();
        let stranger = UserId::new();

        store
            .assign_evaluator(CftEvaluator::new(request.id(), dept, evaluator))
            .await
            .unwrap();

        assert!(table.may_view_request(initiator, request.id()).await);
        assert!(table.may_view_request(evaluator, request.id()).await);
        assert!(!table.may_view_request(stranger, request.id()).await);
    }

    #[tokio::test]
    async fn test_authorize_maps_actions_to_predicates() {
        let (_, _, request, _, _) = seeded().await;
        let actor = UserId::new();

        let mut oracle = MockPermissionOracle::new();
        oracle.expect_is_qa_head().return_const(false);

        let err = authorize(&oracle, WorkflowAction::QaHeadApproval, actor, &request)
            .await
            .unwrap_err();
        assert!(err.is_permission_error());

        let mut oracle = MockPermissionOracle::new();
        oracle.expect_is_qa_user().return_const(true);
        authorize(&oracle, WorkflowAction::QaRegister, actor, &request)
            .await
            .unwrap();

        // Initiation is open to any authenticated user
        let oracle = MockPermissionOracle::new();
        authorize(&oracle, WorkflowAction::Initiate, actor, &request)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_authorize_initiator_can_plan_actions() {
        let (_, _, request, _, initiator) = seeded().await;

        let mut oracle = MockPermissionOracle::new();
        oracle.expect_is_qa_user().return_const(false);
        authorize(&oracle, WorkflowAction::CreateActionPlan, initiator, &request)
            .await
            .unwrap();
    }
}
