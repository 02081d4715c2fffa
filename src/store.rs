// Copyright 2025 Cowboy AI, LLC.

//! Storage contract and in-memory reference implementation
//!
//! The workflow consumes a durable store through [`WorkflowStore`]:
//! atomic read-modify-write on the request aggregate (optimistic
//! version check), CRUD for each sub-record type, an append-only
//! history log, and tracking-number reservation computed under the same
//! lock as the write that claims it. [`InMemoryStore`] implements the
//! contract for tests and embedding.

use crate::entity::AggregateRoot;
use crate::errors::{DomainError, DomainResult};
use crate::identifiers::{ActionItemId, DepartmentId, RequestId, RevisionId, UserId};
use crate::org::{Department, User};
use crate::tracking::{
    current_year_suffix, next_in_sequence, number_prefix, TrackingKind, TrackingNumber,
    TrackingNumberGenerator, GENERIC_DEPARTMENT_CODE,
};
use crate::workflow::history::WorkflowHistoryEntry;
use crate::workflow::request::ChangeControlRequest;
use crate::workflow::subrecords::{
    ActionItem, CftEvaluation, CftEvaluator, DocumentRevision, RiskAssessment,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Payload for creating a request; the store assigns the temporary
/// tracking number inside the same transaction as the insert
#[derive(Debug, Clone)]
pub struct NewRequest {
    /// User initiating the request
    pub initiator: UserId,
    /// Department of the initiator
    pub department: DepartmentId,
    /// Request title
    pub title: String,
    /// Detailed description of the change
    pub description: String,
}

/// Storage contract consumed by the workflow service
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Insert a user
    async fn insert_user(&self, user: User) -> DomainResult<()>;

    /// Load a user
    async fn user(&self, id: UserId) -> DomainResult<User>;

    /// Remove a user; fails while retained workflow records reference
    /// them
    async fn remove_user(&self, id: UserId) -> DomainResult<()>;

    /// Insert a department
    async fn insert_department(&self, department: Department) -> DomainResult<()>;

    /// Load a department
    async fn department(&self, id: DepartmentId) -> DomainResult<Department>;

    /// Remove a department; fails while requests or sub-records
    /// reference it
    async fn remove_department(&self, id: DepartmentId) -> DomainResult<()>;

    /// Create a request, assigning its temporary tracking number
    /// atomically with the insert
    async fn create_request(&self, new: NewRequest) -> DomainResult<ChangeControlRequest>;

    /// Load a request aggregate
    async fn request(&self, id: RequestId) -> DomainResult<ChangeControlRequest>;

    /// Save a request aggregate.
    ///
    /// The stored version must match the aggregate's; on success the
    /// version is incremented, on mismatch `ConcurrencyConflict` is
    /// returned and nothing is written.
    async fn save_request(&self, request: &mut ChangeControlRequest) -> DomainResult<()>;

    /// Remove a request and everything it owns (sub-records, history)
    async fn remove_request(&self, id: RequestId) -> DomainResult<()>;

    /// Reserve the final tracking number for a request: validate an
    /// explicit number for uniqueness, or generate the next one for the
    /// department, and claim it atomically
    async fn reserve_final_number(
        &self,
        id: RequestId,
        explicit: Option<TrackingNumber>,
        department_code: Option<&str>,
    ) -> DomainResult<TrackingNumber>;

    /// Evaluator assignments for a request
    async fn evaluators(&self, id: RequestId) -> DomainResult<Vec<CftEvaluator>>;

    /// Get-or-create an evaluator assignment; returns false when the
    /// department already had one
    async fn assign_evaluator(&self, evaluator: CftEvaluator) -> DomainResult<bool>;

    /// Evaluations submitted for a request
    async fn evaluations(&self, id: RequestId) -> DomainResult<Vec<CftEvaluation>>;

    /// Insert or overwrite the evaluation keyed by (request,
    /// department); fails when no matching assignment exists
    async fn upsert_evaluation(&self, evaluation: CftEvaluation) -> DomainResult<()>;

    /// The request's risk assessment, when one exists
    async fn risk_assessment(&self, id: RequestId) -> DomainResult<Option<RiskAssessment>>;

    /// Insert or overwrite the request's risk assessment
    async fn save_risk_assessment(&self, assessment: &RiskAssessment) -> DomainResult<()>;

    /// Document revisions for a request
    async fn document_revisions(&self, id: RequestId) -> DomainResult<Vec<DocumentRevision>>;

    /// Load one document revision
    async fn document_revision(
        &self,
        request: RequestId,
        revision: RevisionId,
    ) -> DomainResult<DocumentRevision>;

    /// Insert or overwrite a document revision by id
    async fn save_document_revision(&self, revision: &DocumentRevision) -> DomainResult<()>;

    /// Action plan items for a request
    async fn action_items(&self, id: RequestId) -> DomainResult<Vec<ActionItem>>;

    /// Load one action plan item
    async fn action_item(
        &self,
        request: RequestId,
        item: ActionItemId,
    ) -> DomainResult<ActionItem>;

    /// Insert or overwrite an action plan item by id
    async fn save_action_item(&self, item: &ActionItem) -> DomainResult<()>;

    /// Append an audit-trail entry; entries are never updated or
    /// removed
    async fn append_history(&self, entry: WorkflowHistoryEntry) -> DomainResult<()>;

    /// Audit trail for a request, in append order
    async fn history(&self, id: RequestId) -> DomainResult<Vec<WorkflowHistoryEntry>>;
}

#[derive(Default)]
struct StoreInner {
    users: HashMap<UserId, User>,
    departments: HashMap<DepartmentId, Department>,
    requests: HashMap<RequestId, ChangeControlRequest>,
    evaluators: HashMap<RequestId, Vec<CftEvaluator>>,
    evaluations: HashMap<RequestId, Vec<CftEvaluation>>,
    assessments: HashMap<RequestId, RiskAssessment>,
    revisions: HashMap<RequestId, Vec<DocumentRevision>>,
    actions: HashMap<RequestId, Vec<ActionItem>>,
    history: HashMap<RequestId, Vec<WorkflowHistoryEntry>>,
}

impl StoreInner {
    fn temporary_numbers(&self) -> impl Iterator<Item = &str> {
        self.requests.values().map(|r| r.temporary_number.as_str())
    }

    fn final_numbers(&self) -> impl Iterator<Item = (RequestId, &str)> {
        self.requests
            .values()
            .filter_map(|r| r.final_number.as_ref().map(|n| (r.id(), n.as_str())))
    }
}

/// In-memory store for tests and embedding
///
/// A single `RwLock` over the whole state gives every operation the
/// transactional behavior the contract requires; number generation and
/// the insert that claims the number happen under one write guard.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<RwLock<StoreInner>>,
}

impl InMemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowStore for InMemoryStore {
    async fn insert_user(&self, user: User) -> DomainResult<()> {
        self.inner.write().unwrap().users.insert(user.id, user);
        Ok(())
    }

    async fn user(&self, id: UserId) -> DomainResult<User> {
        self.inner
            .read()
            .unwrap()
            .users
            .get(&id)
            .cloned()
            .ok_or_else(|| DomainError::not_found("User", id))
    }

    async fn remove_user(&self, id: UserId) -> DomainResult<()> {
        let mut inner = self.inner.write().unwrap();

        let initiated = inner.requests.values().any(|r| r.initiator == id);
        let evaluating = inner
            .evaluators
            .values()
            .flatten()
            .any(|e| e.evaluator == id)
            || inner
                .evaluations
                .values()
                .flatten()
                .any(|e| e.evaluator == id);
        let assessing = inner.assessments.values().any(|a| a.assigned_to == id);
        let responsible = inner
            .actions
            .values()
            .flatten()
            .any(|a| a.responsible_person == id);

        if initiated || evaluating || assessing || responsible {
            return Err(DomainError::ProtectedReference(format!(
                "user {id} is referenced by retained workflow records"
            )));
        }

        // Headship is a soft reference; clear it rather than block.
        for department in inner.departments.values_mut() {
            if department.head == Some(id) {
                department.head = None;
            }
        }
        inner.users.remove(&id);
        Ok(())
    }

    async fn insert_department(&self, department: Department) -> DomainResult<()> {
        self.inner
            .write()
            .unwrap()
            .departments
            .insert(department.id, department);
        Ok(())
    }

    async fn department(&self, id: DepartmentId) -> DomainResult<Department> {
        self.inner
            .read()
            .unwrap()
            .departments
            .get(&id)
            .cloned()
            .ok_or_else(|| DomainError::not_found("Department", id))
    }

    async fn remove_department(&self, id: DepartmentId) -> DomainResult<()> {
        let mut inner = self.inner.write().unwrap();

        let referenced = inner.requests.values().any(|r| r.department == id)
            || inner
                .evaluators
                .values()
                .flatten()
                .any(|e| e.department == id)
            || inner
                .revisions
                .values()
                .flatten()
                .any(|r| r.assigned_department == id);

        if referenced {
            return Err(DomainError::ProtectedReference(format!(
                "department {id} is referenced by retained workflow records"
            )));
        }
        inner.departments.remove(&id);
        Ok(())
    }

    async fn create_request(&self, new: NewRequest) -> DomainResult<ChangeControlRequest> {
        let mut inner = self.inner.write().unwrap();

        if !inner.users.contains_key(&new.initiator) {
            return Err(DomainError::not_found("User", new.initiator));
        }
        let department = inner
            .departments
            .get(&new.department)
            .ok_or_else(|| DomainError::not_found("Department", new.department))?;

        let prefix = number_prefix(&department.code, &current_year_suffix());
        let temporary = next_in_sequence(&prefix, inner.temporary_numbers());

        let request = ChangeControlRequest::new(
            temporary,
            new.initiator,
            new.department,
            new.title,
            new.description,
        );
        inner.requests.insert(request.id(), request.clone());
        Ok(request)
    }

    async fn request(&self, id: RequestId) -> DomainResult<ChangeControlRequest> {
        self.inner
            .read()
            .unwrap()
            .requests
            .get(&id)
            .cloned()
            .ok_or_else(|| DomainError::not_found("ChangeControlRequest", id))
    }

    async fn save_request(&self, request: &mut ChangeControlRequest) -> DomainResult<()> {
        let mut inner = self.inner.write().unwrap();
        let stored = inner
            .requests
            .get(&request.id())
            .ok_or_else(|| DomainError::not_found("ChangeControlRequest", request.id()))?;

        if stored.version() != request.version() {
            return Err(DomainError::ConcurrencyConflict {
                expected: request.version(),
                actual: stored.version(),
            });
        }
        request.increment_version();
        inner.requests.insert(request.id(), request.clone());
        Ok(())
    }

    async fn remove_request(&self, id: RequestId) -> DomainResult<()> {
        let mut inner = self.inner.write().unwrap();
        inner
            .requests
            .remove(&id)
            .ok_or_else(|| DomainError::not_found("ChangeControlRequest", id))?;
        inner.evaluators.remove(&id);
        inner.evaluations.remove(&id);
        inner.assessments.remove(&id);
        inner.revisions.remove(&id);
        inner.actions.remove(&id);
        inner.history.remove(&id);
        Ok(())
    }

    async fn reserve_final_number(
        &self,
        id: RequestId,
        explicit: Option<TrackingNumber>,
        department_code: Option<&str>,
    ) -> DomainResult<TrackingNumber> {
        let mut inner = self.inner.write().unwrap();
        if !inner.requests.contains_key(&id) {
            return Err(DomainError::not_found("ChangeControlRequest", id));
        }

        let number = match explicit {
            Some(number) => {
                let taken = inner
                    .final_numbers()
                    .any(|(owner, existing)| owner != id && existing == number.as_str());
                if taken {
                    return Err(DomainError::DuplicateTrackingNumber(
                        number.as_str().to_string(),
                    ));
                }
                number
            }
            None => {
                let code = department_code.unwrap_or(GENERIC_DEPARTMENT_CODE);
                let prefix = number_prefix(code, &current_year_suffix());
                next_in_sequence(&prefix, inner.final_numbers().map(|(_, n)| n))
            }
        };

        // Claim immediately so a concurrent reservation cannot receive
        // the same number before the aggregate save lands.
        if let Some(stored) = inner.requests.get_mut(&id) {
            stored.final_number = Some(number.clone());
        }
        Ok(number)
    }

    async fn evaluators(&self, id: RequestId) -> DomainResult<Vec<CftEvaluator>> {
        Ok(self
            .inner
            .read()
            .unwrap()
            .evaluators
            .get(&id)
            .cloned()
            .unwrap_or_default())
    }

    async fn assign_evaluator(&self, evaluator: CftEvaluator) -> DomainResult<bool> {
        let mut inner = self.inner.write().unwrap();
        let assignments = inner.evaluators.entry(evaluator.request).or_default();

        if let Some(existing) = assignments
            .iter()
            .find(|e| e.department == evaluator.department)
        {
            if existing.evaluator != evaluator.evaluator {
                return Err(DomainError::Validation(format!(
                    "department {} already has an evaluator assigned",
                    evaluator.department
                )));
            }
            return Ok(false);
        }
        assignments.push(evaluator);
        Ok(true)
    }

    async fn evaluations(&self, id: RequestId) -> DomainResult<Vec<CftEvaluation>> {
        Ok(self
            .inner
            .read()
            .unwrap()
            .evaluations
            .get(&id)
            .cloned()
            .unwrap_or_default())
    }

    async fn upsert_evaluation(&self, evaluation: CftEvaluation) -> DomainResult<()> {
        let mut inner = self.inner.write().unwrap();

        let assigned = inner
            .evaluators
            .get(&evaluation.request)
            .map(|assignments| {
                assignments
                    .iter()
                    .any(|e| e.department == evaluation.department)
            })
            .unwrap_or(false);
        if !assigned {
            return Err(DomainError::Validation(format!(
                "no evaluator assignment for department {} on this request",
                evaluation.department
            )));
        }

        let evaluations = inner.evaluations.entry(evaluation.request).or_default();
        match evaluations
            .iter_mut()
            .find(|e| e.department == evaluation.department)
        {
            Some(existing) => *existing = evaluation,
            None => evaluations.push(evaluation),
        }
        Ok(())
    }

    async fn risk_assessment(&self, id: RequestId) -> DomainResult<Option<RiskAssessment>> {
        Ok(self.inner.read().unwrap().assessments.get(&id).cloned())
    }

    async fn save_risk_assessment(&self, assessment: &RiskAssessment) -> DomainResult<()> {
        self.inner
            .write()
            .unwrap()
            .assessments
            .insert(assessment.request, assessment.clone());
        Ok(())
    }

    async fn document_revisions(&self, id: RequestId) -> DomainResult<Vec<DocumentRevision>> {
        Ok(self
            .inner
            .read()
            .unwrap()
            .revisions
            .get(&id)
            .cloned()
            .unwrap_or_default())
    }

    async fn document_revision(
        &self,
        request: RequestId,
        revision: RevisionId,
    ) -> DomainResult<DocumentRevision> {
        self.inner
            .read()
            .unwrap()
            .revisions
            .get(&request)
            .and_then(|revisions| revisions.iter().find(|r| r.id == revision))
            .cloned()
            .ok_or_else(|| DomainError::not_found("DocumentRevision", revision))
    }

    async fn save_document_revision(&self, revision: &DocumentRevision) -> DomainResult<()> {
        let mut inner = self.inner.write().unwrap();
        let revisions = inner.revisions.entry(revision.request).or_default();
        match revisions.iter_mut().find(|r| r.id == revision.id) {
            Some(existing) => *existing = revision.clone(),
            None => revisions.push(revision.clone()),
        }
        Ok(())
    }

    async fn action_items(&self, id: RequestId) -> DomainResult<Vec<ActionItem>> {
        Ok(self
            .inner
            .read()
            .unwrap()
            .actions
            .get(&id)
            .cloned()
            .unwrap_or_default())
    }

    async fn action_item(
        &self,
        request: RequestId,
        item: ActionItemId,
    ) -> DomainResult<ActionItem> {
        self.inner
            .read()
            .unwrap()
            .actions
            .get(&request)
            .and_then(|items| items.iter().find(|i| i.id == item))
            .cloned()
            .ok_or_else(|| DomainError::not_found("ActionItem", item))
    }

    async fn save_action_item(&self, item: &ActionItem) -> DomainResult<()> {
        let mut inner = self.inner.write().unwrap();
        let items = inner.actions.entry(item.request).or_default();
        match items.iter_mut().find(|i| i.id == item.id) {
            Some(existing) => *existing = item.clone(),
            None => items.push(item.clone()),
        }
        Ok(())
    }

    async fn append_history(&self, entry: WorkflowHistoryEntry) -> DomainResult<()> {
        self.inner
            .write()
            .unwrap()
            .history
            .entry(entry.request)
            .or_default()
            .push(entry);
        Ok(())
    }

    async fn history(&self, id: RequestId) -> DomainResult<Vec<WorkflowHistoryEntry>> {
        Ok(self
            .inner
            .read()
            .unwrap()
            .history
            .get(&id)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl TrackingNumberGenerator for InMemoryStore {
    async fn next_number(
        &self,
        kind: TrackingKind,
        department_code: Option<&str>,
    ) -> DomainResult<TrackingNumber> {
        let inner = self.inner.read().unwrap();
        let code = department_code.unwrap_or(GENERIC_DEPARTMENT_CODE);
        let prefix = number_prefix(code, &current_year_suffix());
        let number = match kind {
            TrackingKind::Temporary => next_in_sequence(&prefix, inner.temporary_numbers()),
            TrackingKind::Final => next_in_sequence(&prefix, inner.final_numbers().map(|(_, n)| n)),
        };
        Ok(number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::subrecords::{EvaluationDecision, ImpactType, RiskLevel};

    fn seed(store: &InMemoryStore) -> (UserId, DepartmentId) {
        let user = User::new("initiator");
        let dept = Department::new("QA", "Quality Assurance");
        let (user_id, dept_id) = (user.id, dept.id);
        tokio_test::block_on(async {
            store.insert_user(user).await.unwrap();
            store.insert_department(dept).await.unwrap();
        });
        (user_id, dept_id)
    }

    fn new_request(store: &InMemoryStore, user: UserId, dept: DepartmentId) -> ChangeControlRequest {
        tokio_test::block_on(store.create_request(NewRequest {
            initiator: user,
            department: dept,
            title: "Swap resin supplier".to_string(),
            description: "Qualify the second-source resin".to_string(),
        }))
        .unwrap()
    }

    #[test]
    fn test_create_request_assigns_sequential_temp_numbers() {
        let store = InMemoryStore::new();
        let (user, dept) = seed(&store);

        let first = new_request(&store, user, dept);
        let second = new_request(&store, user, dept);

        assert_eq!(first.temporary_number.sequence(), Some(1));
        assert_eq!(second.temporary_number.sequence(), Some(2));
        assert!(first.temporary_number.as_str().contains("/QA/"));
    }

    #[test]
    fn test_save_request_detects_version_conflict() {
        let store = InMemoryStore::new();
        let (user, dept) = seed(&store);
        let created = new_request(&store, user, dept);

        tokio_test::block_on(async {
            let mut copy_a = store.request(created.id()).await.unwrap();
            let mut copy_b = store.request(created.id()).await.unwrap();

            copy_a.route_to_dept_head().unwrap();
            store.save_request(&mut copy_a).await.unwrap();
            assert_eq!(copy_a.version(), 1);

            copy_b.route_to_dept_head().unwrap();
            let err = store.save_request(&mut copy_b).await.unwrap_err();
            assert!(err.is_concurrency_error());
        });
    }

    #[test]
    fn test_reserve_final_number_rejects_duplicates() {
        let store = InMemoryStore::new();
        let (user, dept) = seed(&store);
        let first = new_request(&store, user, dept);
        let second = new_request(&store, user, dept);

        tokio_test::block_on(async {
            let number = store
                .reserve_final_number(first.id(), None, Some("QA"))
                .await
                .unwrap();
            assert_eq!(number.sequence(), Some(1));

            let err = store
                .reserve_final_number(second.id(), Some(number.clone()), Some("QA"))
                .await
                .unwrap_err();
            assert_eq!(
                err,
                DomainError::DuplicateTrackingNumber(number.as_str().to_string())
            );

            // Generation skips the claimed number
            let next = store
                .reserve_final_number(second.id(), None, Some("QA"))
                .await
                .unwrap();
            assert_eq!(next.sequence(), Some(2));
        });
    }

    #[test]
    fn test_assign_evaluator_is_get_or_create() {
        let store = InMemoryStore::new();
        let (user, dept) = seed(&store);
        let request = new_request(&store, user, dept);
        let evaluator = UserId::new();

        tokio_test::block_on(async {
            let assignment = CftEvaluator::new(request.id(), dept, evaluator);
            assert!(store.assign_evaluator(assignment.clone()).await.unwrap());
            assert!(!store.assign_evaluator(assignment).await.unwrap());

            let other = CftEvaluator::new(request.id(), dept, UserId::new());
            let err = store.assign_evaluator(other).await.unwrap_err();
            assert!(err.is_validation_error());

            assert_eq!(store.evaluators(request.id()).await.unwrap().len(), 1);
        });
    }

    #[test]
    fn test_upsert_evaluation_requires_assignment_and_replaces() {
        let store = InMemoryStore::new();
        let (user, dept) = seed(&store);
        let request = new_request(&store, user, dept);
        let evaluator = UserId::new();

        tokio_test::block_on(async {
            let unassigned = CftEvaluation::new(
                request.id(),
                dept,
                evaluator,
                ImpactType::Quality,
                EvaluationDecision::Approved,
                RiskLevel::Low,
                "",
            );
            assert!(store
                .upsert_evaluation(unassigned.clone())
                .await
                .unwrap_err()
                .is_validation_error());

            store
                .assign_evaluator(CftEvaluator::new(request.id(), dept, evaluator))
                .await
                .unwrap();
            store.upsert_evaluation(unassigned.clone()).await.unwrap();
            store.upsert_evaluation(unassigned).await.unwrap();

            // Second submission replaced, not appended
            assert_eq!(store.evaluations(request.id()).await.unwrap().len(), 1);
        });
    }

    #[test]
    fn test_remove_user_blocked_by_retained_records() {
        let store = InMemoryStore::new();
        let (user, dept) = seed(&store);
        let _request = new_request(&store, user, dept);

        tokio_test::block_on(async {
            let err = store.remove_user(user).await.unwrap_err();
            assert!(matches!(err, DomainError::ProtectedReference(_)));
        });
    }

    #[test]
    fn test_remove_department_blocked_then_allowed() {
        let store = InMemoryStore::new();
        let (user, dept) = seed(&store);
        let request = new_request(&store, user, dept);

        tokio_test::block_on(async {
            assert!(matches!(
                store.remove_department(dept).await.unwrap_err(),
                DomainError::ProtectedReference(_)
            ));

            store.remove_request(request.id()).await.unwrap();
            store.remove_department(dept).await.unwrap();
        });
    }

    #[test]
    fn test_remove_request_cascades() {
        let store = InMemoryStore::new();
        let (user, dept) = seed(&store);
        let request = new_request(&store, user, dept);

        tokio_test::block_on(async {
            store
                .assign_evaluator(CftEvaluator::new(request.id(), dept, UserId::new()))
                .await
                .unwrap();
            store.remove_request(request.id()).await.unwrap();

            assert!(store.request(request.id()).await.unwrap_err().is_not_found());
            assert!(store.evaluators(request.id()).await.unwrap().is_empty());
            assert!(store.history(request.id()).await.unwrap().is_empty());
        });
    }

    #[test]
    fn test_generator_scopes_by_kind() {
        let store = InMemoryStore::new();
        let (user, dept) = seed(&store);
        let _request = new_request(&store, user, dept);

        tokio_test::block_on(async {
            // One temporary number exists; final sequence is untouched
            let final_number = store
                .next_number(TrackingKind::Final, Some("QA"))
                .await
                .unwrap();
            assert_eq!(final_number.sequence(), Some(1));

            let temp_number = store
                .next_number(TrackingKind::Temporary, Some("QA"))
                .await
                .unwrap();
            assert_eq!(temp_number.sequence(), Some(2));
        });
    }
}
