// Copyright 2025 Cowboy AI, LLC.

//! Change control workflow service
//!
//! One method per transition-table row. Every operation runs as one
//! atomic unit under the request's lock: resolve the actor's role
//! through the permission oracle, load the aggregate and the
//! sub-records it gates on, validate, mutate, persist, append the
//! audit entries. Cascading auto-transitions (initiation auto-routes,
//! verification auto-closes) go through an explicit transition queue
//! processed inside the same unit, so audit ordering never depends on
//! nested calls.

use crate::entity::AggregateRoot;
use crate::errors::{DomainError, DomainResult};
use crate::identifiers::{ActionItemId, RequestId, RevisionId, UserId};
use crate::permissions::{authorize, PermissionOracle, WorkflowAction};
use crate::store::{NewRequest, WorkflowStore};
use crate::workflow::commands::{
    CompleteRiskAssessment, CreateActionPlan, DeptHeadDecision, InitiateRequest,
    PlanDocumentRevisions, QaFinalEvaluation, QaHeadApproval, QaRegistration, SubmitEvaluation,
    Verification,
};
use crate::workflow::history::WorkflowHistoryEntry;
use crate::workflow::request::ChangeControlRequest;
use crate::workflow::state::RequestStatus;
use crate::workflow::subrecords::{
    actions_resolved, any_evaluation_rejected, evaluations_complete, revisions_resolved,
    ActionItem, AssessmentStatus, CftEvaluation, CftEvaluator, DocumentRevision, RiskAssessment,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Auto-transitions queued by an operation and processed within the
/// same atomic unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueuedTransition {
    /// Route a freshly created request to the department head
    RouteToDeptHead,
    /// Write the closure entry after verification closes the request
    Closure,
}

/// Full read model of a request and everything attached to it
#[derive(Debug, Clone, serde::Serialize)]
pub struct RequestSnapshot {
    /// The aggregate root
    pub request: ChangeControlRequest,
    /// Evaluator assignments
    pub evaluators: Vec<CftEvaluator>,
    /// Submitted evaluations
    pub evaluations: Vec<CftEvaluation>,
    /// Risk assessment, when one exists
    pub risk_assessment: Option<RiskAssessment>,
    /// Document revisions
    pub document_revisions: Vec<DocumentRevision>,
    /// Action plan items
    pub action_items: Vec<ActionItem>,
    /// Audit trail, in append order
    pub history: Vec<WorkflowHistoryEntry>,
}

/// The workflow engine
pub struct ChangeControlService {
    store: Arc<dyn WorkflowStore>,
    oracle: Arc<dyn PermissionOracle>,
    locks: Mutex<HashMap<RequestId, Arc<tokio::sync::Mutex<()>>>>,
}

impl ChangeControlService {
    /// Create a service over a store and a permission oracle
    pub fn new(store: Arc<dyn WorkflowStore>, oracle: Arc<dyn PermissionOracle>) -> Self {
        Self {
            store,
            oracle,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Serialize writers per request: concurrent operations on the same
    /// request queue up here, operations on different requests do not
    /// contend.
    fn lock_for(&self, id: RequestId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        locks.entry(id).or_default().clone()
    }

    fn entry(
        request: &ChangeControlRequest,
        step: u8,
        actor: UserId,
        action: impl Into<String>,
        comment: impl Into<String>,
        previous_status: RequestStatus,
        new_status: RequestStatus,
    ) -> WorkflowHistoryEntry {
        WorkflowHistoryEntry::record(
            request.id(),
            step,
            actor,
            action,
            comment,
            previous_status,
            new_status,
        )
    }

    async fn append_entries(&self, entries: Vec<WorkflowHistoryEntry>) -> DomainResult<()> {
        for entry in entries {
            self.store.append_history(entry).await?;
        }
        Ok(())
    }

    async fn drain_queue(
        &self,
        request: &mut ChangeControlRequest,
        actor: UserId,
        queue: &mut VecDeque<QueuedTransition>,
        entries: &mut Vec<WorkflowHistoryEntry>,
    ) -> DomainResult<()> {
        while let Some(transition) = queue.pop_front() {
            match transition {
                QueuedTransition::RouteToDeptHead => {
                    let department = self.store.department(request.department).await?;
                    let head = department.head.ok_or_else(|| {
                        DomainError::Validation(format!(
                            "department {} does not have a department head assigned",
                            department.code
                        ))
                    })?;
                    let head_user = self.store.user(head).await?;

                    let previous = request.status();
                    request.route_to_dept_head()?;
                    entries.push(Self::entry(
                        request,
                        2,
                        actor,
                        "Routed to department head",
                        format!("Routed to {}", head_user.username),
                        previous,
                        request.status(),
                    ));
                }
                QueuedTransition::Closure => {
                    entries.push(Self::entry(
                        request,
                        11,
                        actor,
                        "Change control request closed",
                        "Request successfully closed",
                        request.status(),
                        request.status(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Step 1: initiate a request.
    ///
    /// Assigns the temporary tracking number, writes the initiation
    /// entry, and auto-routes to the department head - two audit
    /// entries in order, one atomic unit. The routing guard (the
    /// department has a head) is checked before the request row is
    /// created so a failed initiation leaves nothing behind.
    pub async fn initiate(&self, cmd: InitiateRequest) -> DomainResult<ChangeControlRequest> {
        // Initiation is open to any authenticated user; no role gate.
        cmd.validate()?;
        self.store.user(cmd.initiator).await?;
        let department = self.store.department(cmd.department).await?;
        if department.head.is_none() {
            return Err(DomainError::Validation(format!(
                "department {} does not have a department head assigned",
                department.code
            )));
        }

        let mut request = self
            .store
            .create_request(NewRequest {
                initiator: cmd.initiator,
                department: cmd.department,
                title: cmd.title,
                description: cmd.description,
            })
            .await?;

        let mut entries = vec![Self::entry(
            &request,
            1,
            cmd.initiator,
            "Request initiated",
            format!("Temporary CC number: {}", request.temporary_number),
            request.status(),
            request.status(),
        )];

        let mut queue = VecDeque::from([QueuedTransition::RouteToDeptHead]);
        self.drain_queue(&mut request, cmd.initiator, &mut queue, &mut entries)
            .await?;

        self.store.save_request(&mut request).await?;
        self.append_entries(entries).await?;

        info!(
            request = %request.id(),
            number = %request.temporary_number,
            status = %request.status(),
            "change control request initiated"
        );
        Ok(request)
    }

    /// Step 2: department head feasibility decision
    pub async fn dept_head_decision(
        &self,
        id: RequestId,
        actor: UserId,
        cmd: DeptHeadDecision,
    ) -> DomainResult<ChangeControlRequest> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let mut request = self.store.request(id).await?;
        authorize(
            self.oracle.as_ref(),
            WorkflowAction::DeptHeadDecision,
            actor,
            &request,
        )
        .await?;
        request.ensure_status("dept_head_decision", RequestStatus::PendingDeptHead)?;

        let department = self.store.department(request.department).await?;
        if !department.is_headed_by(actor) {
            return Err(DomainError::PermissionDenied(
                "only the department head can make this decision".to_string(),
            ));
        }

        let previous = request.status();
        let entry = if cmd.approved {
            request.approve_feasibility()?;
            Self::entry(
                &request,
                2,
                actor,
                "Approved by department head",
                "",
                previous,
                request.status(),
            )
        } else {
            let reason = if cmd.reason.trim().is_empty() {
                "Rejected by department head".to_string()
            } else {
                cmd.reason.clone()
            };
            request.reject(actor, reason)?;
            Self::entry(
                &request,
                2,
                actor,
                "Rejected by department head",
                cmd.reason,
                previous,
                request.status(),
            )
        };

        self.store.save_request(&mut request).await?;
        self.append_entries(vec![entry]).await?;

        info!(
            request = %request.id(),
            from = %previous,
            to = %request.status(),
            "department head decision applied"
        );
        Ok(request)
    }

    /// Step 3: QA registration and categorization.
    ///
    /// Reserves the final tracking number (generating one when absent),
    /// records impact level and target date, assigns CFT evaluators
    /// idempotently, and auto-creates the risk assessment task for
    /// Major/Critical impact.
    pub async fn qa_register(
        &self,
        id: RequestId,
        actor: UserId,
        cmd: QaRegistration,
    ) -> DomainResult<ChangeControlRequest> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let mut request = self.store.request(id).await?;
        authorize(self.oracle.as_ref(), WorkflowAction::QaRegister, actor, &request).await?;
        request.ensure_status("qa_register", RequestStatus::PendingQaRegistration)?;
        let registrar = self.store.user(actor).await?;

        // Referential and uniqueness validation before any write, so a
        // failure leaves the aggregate untouched.
        let existing = self.store.evaluators(id).await?;
        let mut planned: Vec<(crate::identifiers::DepartmentId, UserId)> = Vec::new();
        for assignment in &cmd.evaluators {
            self.store.department(assignment.department).await?;
            self.store.user(assignment.evaluator).await?;

            let conflicting = existing
                .iter()
                .map(|e| (e.department, e.evaluator))
                .chain(planned.iter().copied())
                .any(|(dept, user)| dept == assignment.department && user != assignment.evaluator);
            if conflicting {
                return Err(DomainError::Validation(format!(
                    "department {} already has an evaluator assigned",
                    assignment.department
                )));
            }
            planned.push((assignment.department, assignment.evaluator));
        }

        let department = self.store.department(request.department).await?;
        let final_number = self
            .store
            .reserve_final_number(id, cmd.final_number.clone(), Some(&department.code))
            .await?;

        let previous = request.status();
        request.register(
            final_number.clone(),
            cmd.impact_level,
            cmd.target_completion,
            actor,
        )?;

        for assignment in &cmd.evaluators {
            let created = self
                .store
                .assign_evaluator(CftEvaluator::new(
                    id,
                    assignment.department,
                    assignment.evaluator,
                ))
                .await?;
            debug!(
                request = %id,
                department = %assignment.department,
                created,
                "evaluator assignment"
            );
        }

        let mut entries = vec![Self::entry(
            &request,
            3,
            actor,
            "QA registration completed",
            format!("Final CC: {final_number}, Impact: {}", cmd.impact_level),
            previous,
            request.status(),
        )];

        if cmd.impact_level.requires_risk_assessment()
            && self.store.risk_assessment(id).await?.is_none()
        {
            let assessment = RiskAssessment::new(id, actor);
            self.store.save_risk_assessment(&assessment).await?;
            entries.push(Self::entry(
                &request,
                5,
                actor,
                "Risk assessment task created",
                format!("Assigned to {}", registrar.username),
                request.status(),
                request.status(),
            ));
        }

        self.store.save_request(&mut request).await?;
        self.append_entries(entries).await?;

        info!(
            request = %request.id(),
            number = %final_number,
            impact = %cmd.impact_level,
            "QA registration completed"
        );
        Ok(request)
    }

    /// Step 4: submit one department's CFT evaluation.
    ///
    /// The upsert is idempotent per (request, department). When the
    /// last assigned department submits, the phase gate fires: any
    /// rejection rejects the request; otherwise Minor impact skips the
    /// risk assessment, and Major/Critical proceeds to it unless it
    /// already completed.
    pub async fn submit_cft_evaluation(
        &self,
        id: RequestId,
        actor: UserId,
        cmd: SubmitEvaluation,
    ) -> DomainResult<ChangeControlRequest> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let mut request = self.store.request(id).await?;
        authorize(
            self.oracle.as_ref(),
            WorkflowAction::SubmitEvaluation {
                department: cmd.department,
            },
            actor,
            &request,
        )
        .await?;
        request.ensure_status("submit_cft_evaluation", RequestStatus::PendingCftEvaluation)?;

        let evaluators = self.store.evaluators(id).await?;
        let assigned = evaluators
            .iter()
            .any(|e| e.department == cmd.department && e.evaluator == actor);
        if !assigned {
            return Err(DomainError::PermissionDenied(format!(
                "user {actor} is not assigned as evaluator for department {}",
                cmd.department
            )));
        }

        let evaluation = match self
            .store
            .evaluations(id)
            .await?
            .into_iter()
            .find(|e| e.department == cmd.department)
        {
            Some(mut existing) => {
                existing.resubmit(cmd.impact_type, cmd.decision, cmd.risk_level, cmd.notes);
                existing
            }
            None => CftEvaluation::new(
                id,
                cmd.department,
                actor,
                cmd.impact_type,
                cmd.decision,
                cmd.risk_level,
                cmd.notes,
            ),
        };
        self.store.upsert_evaluation(evaluation.clone()).await?;

        let department = self.store.department(cmd.department).await?;
        let mut entries = vec![Self::entry(
            &request,
            4,
            actor,
            format!("CFT evaluation completed for {}", department.code),
            format!("Decision: {}, Risk: {}", evaluation.decision, evaluation.risk_level),
            request.status(),
            request.status(),
        )];

        let evaluations = self.store.evaluations(id).await?;
        let mut advanced = false;
        if evaluations_complete(&evaluators, &evaluations) {
            let previous = request.status();
            if any_evaluation_rejected(&evaluations) {
                request.reject(actor, "Rejected during CFT evaluation")?;
                entries.push(Self::entry(
                    &request,
                    4,
                    actor,
                    "Rejected during CFT evaluation",
                    "",
                    previous,
                    request.status(),
                ));
            } else {
                let impact = request.impact_level.ok_or_else(|| {
                    DomainError::Internal(
                        "registered request is missing its impact level".to_string(),
                    )
                })?;
                let risk_completed = matches!(
                    self.store.risk_assessment(id).await?,
                    Some(assessment) if assessment.status == AssessmentStatus::Completed
                );
                if !impact.requires_risk_assessment() || risk_completed {
                    request.advance_to_document_update()?;
                } else {
                    request.advance_to_risk_assessment()?;
                }
                entries.push(Self::entry(
                    &request,
                    4,
                    actor,
                    "All CFT evaluations completed",
                    "",
                    previous,
                    request.status(),
                ));
            }
            advanced = true;
        }

        if advanced {
            self.store.save_request(&mut request).await?;
            info!(
                request = %request.id(),
                to = %request.status(),
                "CFT evaluation phase concluded"
            );
        }
        self.append_entries(entries).await?;
        Ok(request)
    }

    /// Step 5: start the risk assessment task
    pub async fn start_risk_assessment(
        &self,
        id: RequestId,
        actor: UserId,
    ) -> DomainResult<RiskAssessment> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let request = self.store.request(id).await?;
        authorize(
            self.oracle.as_ref(),
            WorkflowAction::CompleteRiskAssessment,
            actor,
            &request,
        )
        .await?;
        request.ensure_status_in(
            "start_risk_assessment",
            &[
                RequestStatus::PendingCftEvaluation,
                RequestStatus::PendingRiskAssessment,
            ],
        )?;

        let mut assessment = self
            .store
            .risk_assessment(id)
            .await?
            .ok_or_else(|| DomainError::not_found("RiskAssessment", id))?;
        assessment.start()?;
        self.store.save_risk_assessment(&assessment).await?;

        self.append_entries(vec![Self::entry(
            &request,
            5,
            actor,
            "Risk assessment started",
            "",
            request.status(),
            request.status(),
        )])
        .await?;
        Ok(assessment)
    }

    /// Step 5: complete the risk assessment.
    ///
    /// Also accepted while evaluations are still outstanding; in that
    /// case the aggregate stays in the evaluation phase and the CFT
    /// gate will skip the risk-assessment stop when it fires.
    pub async fn complete_risk_assessment(
        &self,
        id: RequestId,
        actor: UserId,
        cmd: CompleteRiskAssessment,
    ) -> DomainResult<RiskAssessment> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let mut request = self.store.request(id).await?;
        // The assigned user or any QA user may complete the assessment.
        authorize(
            self.oracle.as_ref(),
            WorkflowAction::CompleteRiskAssessment,
            actor,
            &request,
        )
        .await?;
        request.ensure_status_in(
            "complete_risk_assessment",
            &[
                RequestStatus::PendingCftEvaluation,
                RequestStatus::PendingRiskAssessment,
            ],
        )?;

        let mut assessment = self
            .store
            .risk_assessment(id)
            .await?
            .ok_or_else(|| DomainError::not_found("RiskAssessment", id))?;

        assessment.complete(cmd.findings, cmd.recommendations)?;
        self.store.save_risk_assessment(&assessment).await?;

        let previous = request.status();
        let mut entries = Vec::new();
        if previous == RequestStatus::PendingRiskAssessment {
            request.advance_to_document_update()?;
            entries.push(Self::entry(
                &request,
                5,
                actor,
                "Risk assessment completed",
                "",
                previous,
                request.status(),
            ));
            self.store.save_request(&mut request).await?;
            info!(
                request = %request.id(),
                to = %request.status(),
                "risk assessment completed"
            );
        } else {
            entries.push(Self::entry(
                &request,
                5,
                actor,
                "Risk assessment completed",
                "Completed before all evaluations were submitted",
                previous,
                previous,
            ));
        }
        self.append_entries(entries).await?;
        Ok(assessment)
    }

    /// Step 6: place documents under revision (get-or-create per
    /// document)
    pub async fn plan_document_revisions(
        &self,
        id: RequestId,
        actor: UserId,
        cmd: PlanDocumentRevisions,
    ) -> DomainResult<Vec<DocumentRevision>> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let request = self.store.request(id).await?;
        request.ensure_status_in(
            "plan_document_revisions",
            &[
                RequestStatus::PendingDocumentUpdate,
                RequestStatus::PendingActionPlan,
            ],
        )?;

        for document in &cmd.documents {
            if document.document_name.trim().is_empty() {
                return Err(DomainError::Validation(
                    "document name is required".to_string(),
                ));
            }
            self.store.department(document.assigned_department).await?;
        }

        let existing = self.store.document_revisions(id).await?;
        let mut created = 0usize;
        for document in cmd.documents {
            let already = existing.iter().any(|r| {
                r.document_name == document.document_name
                    && r.document_code == document.document_code
                    && r.assigned_department == document.assigned_department
            });
            if !already {
                let revision = DocumentRevision::new(
                    id,
                    document.document_name,
                    document.document_code,
                    document.assigned_department,
                );
                self.store.save_document_revision(&revision).await?;
                created += 1;
            }
        }

        self.append_entries(vec![Self::entry(
            &request,
            6,
            actor,
            "Document revisions suggested",
            format!("{created} revision(s) opened"),
            request.status(),
            request.status(),
        )])
        .await?;
        self.store.document_revisions(id).await
    }

    /// The resolved permission rule for document revisions: any member
    /// of the assigned department, or its head, may work the revision.
    /// Checked here from loaded data; `may_complete_revision` on the
    /// oracle answers the same rule for the boundary.
    async fn ensure_revision_actor(
        &self,
        actor: UserId,
        revision: &DocumentRevision,
    ) -> DomainResult<()> {
        let department = self.store.department(revision.assigned_department).await?;
        if department.is_headed_by(actor) {
            return Ok(());
        }
        let user = self.store.user(actor).await?;
        if user.department == Some(revision.assigned_department) {
            return Ok(());
        }
        Err(DomainError::PermissionDenied(
            "only the assigned department or its head may work this revision".to_string(),
        ))
    }

    /// Step 6: start a document revision
    pub async fn start_document_revision(
        &self,
        id: RequestId,
        actor: UserId,
        revision_id: RevisionId,
    ) -> DomainResult<DocumentRevision> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let request = self.store.request(id).await?;
        let mut revision = self.store.document_revision(id, revision_id).await?;
        self.ensure_revision_actor(actor, &revision).await?;

        revision.start()?;
        self.store.save_document_revision(&revision).await?;

        self.append_entries(vec![Self::entry(
            &request,
            6,
            actor,
            format!("Document revision started: {}", revision.document_name),
            "",
            request.status(),
            request.status(),
        )])
        .await?;
        Ok(revision)
    }

    async fn conclude_revision(
        &self,
        mut request: ChangeControlRequest,
        actor: UserId,
        revision: DocumentRevision,
        action: String,
        comment: String,
    ) -> DomainResult<DocumentRevision> {
        self.store.save_document_revision(&revision).await?;

        let mut entries = vec![Self::entry(
            &request,
            6,
            actor,
            action,
            comment,
            request.status(),
            request.status(),
        )];

        let revisions = self.store.document_revisions(request.id()).await?;
        if revisions_resolved(&revisions)
            && request.status() == RequestStatus::PendingDocumentUpdate
        {
            let previous = request.status();
            request.advance_to_action_plan()?;
            entries.push(Self::entry(
                &request,
                6,
                actor,
                "All document revisions completed",
                "",
                previous,
                request.status(),
            ));
            self.store.save_request(&mut request).await?;
            info!(
                request = %request.id(),
                to = %request.status(),
                "document management phase concluded"
            );
        }
        self.append_entries(entries).await?;
        Ok(revision)
    }

    /// Step 6: complete a document revision; when no revision remains
    /// open the request advances to the action plan phase
    pub async fn complete_document_revision(
        &self,
        id: RequestId,
        actor: UserId,
        revision_id: RevisionId,
        notes: impl Into<String> + Send,
    ) -> DomainResult<DocumentRevision> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let request = self.store.request(id).await?;
        let mut revision = self.store.document_revision(id, revision_id).await?;
        self.ensure_revision_actor(actor, &revision).await?;

        let notes = notes.into();
        revision.complete(actor, notes.clone())?;
        let action = format!("Document revision completed: {}", revision.document_name);
        self.conclude_revision(request, actor, revision, action, notes)
            .await
    }

    /// Step 6: record that a document needs no revision after all; the
    /// phase gate treats it as resolved
    pub async fn mark_revision_not_required(
        &self,
        id: RequestId,
        actor: UserId,
        revision_id: RevisionId,
    ) -> DomainResult<DocumentRevision> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let request = self.store.request(id).await?;
        let mut revision = self.store.document_revision(id, revision_id).await?;
        self.ensure_revision_actor(actor, &revision).await?;

        revision.mark_not_required(actor)?;
        let action = format!("Document revision not required: {}", revision.document_name);
        self.conclude_revision(request, actor, revision, action, String::new())
            .await
    }

    /// Step 7: create action plan items
    pub async fn create_action_plan(
        &self,
        id: RequestId,
        actor: UserId,
        cmd: CreateActionPlan,
    ) -> DomainResult<Vec<ActionItem>> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let request = self.store.request(id).await?;
        // QA or the initiator may lay out the plan.
        authorize(
            self.oracle.as_ref(),
            WorkflowAction::CreateActionPlan,
            actor,
            &request,
        )
        .await?;
        request.ensure_status("create_action_plan", RequestStatus::PendingActionPlan)?;

        for item in &cmd.items {
            if item.description.trim().is_empty() {
                return Err(DomainError::Validation(
                    "action description is required".to_string(),
                ));
            }
            self.store.user(item.responsible_person).await?;
        }

        for item in cmd.items {
            let record = ActionItem::new(
                id,
                item.description,
                item.responsible_person,
                item.expected_timeline,
            );
            self.store.save_action_item(&record).await?;
        }

        self.append_entries(vec![Self::entry(
            &request,
            7,
            actor,
            "Action plan created",
            "",
            request.status(),
            request.status(),
        )])
        .await?;
        self.store.action_items(id).await
    }

    /// Step 7: start an action item
    pub async fn start_action_item(
        &self,
        id: RequestId,
        actor: UserId,
        item_id: ActionItemId,
    ) -> DomainResult<ActionItem> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let request = self.store.request(id).await?;
        let mut item = self.store.action_item(id, item_id).await?;
        authorize(
            self.oracle.as_ref(),
            WorkflowAction::CompleteActionItem { item: item_id },
            actor,
            &request,
        )
        .await?;

        item.start()?;
        self.store.save_action_item(&item).await?;

        self.append_entries(vec![Self::entry(
            &request,
            7,
            actor,
            "Action item started",
            item.description.clone(),
            request.status(),
            request.status(),
        )])
        .await?;
        Ok(item)
    }

    async fn conclude_action_item(
        &self,
        mut request: ChangeControlRequest,
        actor: UserId,
        item: ActionItem,
        action: &str,
    ) -> DomainResult<ActionItem> {
        self.store.save_action_item(&item).await?;

        let mut entries = vec![Self::entry(
            &request,
            7,
            actor,
            action,
            item.description.clone(),
            request.status(),
            request.status(),
        )];

        let items = self.store.action_items(request.id()).await?;
        if actions_resolved(&items) && request.status() == RequestStatus::PendingActionPlan {
            let previous = request.status();
            request.advance_to_qa_evaluation()?;
            entries.push(Self::entry(
                &request,
                7,
                actor,
                "All action plans completed",
                "",
                previous,
                request.status(),
            ));
            self.store.save_request(&mut request).await?;
            info!(
                request = %request.id(),
                to = %request.status(),
                "implementation phase concluded"
            );
        }
        self.append_entries(entries).await?;
        Ok(item)
    }

    /// Step 7: complete an action item; when none remain open the
    /// request advances to QA evaluation
    pub async fn complete_action_item(
        &self,
        id: RequestId,
        actor: UserId,
        item_id: ActionItemId,
        notes: impl Into<String> + Send,
    ) -> DomainResult<ActionItem> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let request = self.store.request(id).await?;
        let mut item = self.store.action_item(id, item_id).await?;
        // The responsible person or any QA user may complete the item.
        authorize(
            self.oracle.as_ref(),
            WorkflowAction::CompleteActionItem { item: item_id },
            actor,
            &request,
        )
        .await?;

        item.complete(notes.into())?;
        self.conclude_action_item(request, actor, item, "Action item completed")
            .await
    }

    /// Step 7: cancel an action item; it stops blocking the phase gate
    pub async fn cancel_action_item(
        &self,
        id: RequestId,
        actor: UserId,
        item_id: ActionItemId,
        notes: impl Into<String> + Send,
    ) -> DomainResult<ActionItem> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let request = self.store.request(id).await?;
        let mut item = self.store.action_item(id, item_id).await?;
        authorize(
            self.oracle.as_ref(),
            WorkflowAction::CompleteActionItem { item: item_id },
            actor,
            &request,
        )
        .await?;

        item.cancel(notes.into())?;
        self.conclude_action_item(request, actor, item, "Action item cancelled")
            .await
    }

    /// Step 8: QA final evaluation.
    ///
    /// All four checklist booleans must be true; the risk-closure
    /// checks apply only to Major/Critical impact and additionally
    /// require the stored assessment to be Completed.
    pub async fn qa_final_evaluation(
        &self,
        id: RequestId,
        actor: UserId,
        cmd: QaFinalEvaluation,
    ) -> DomainResult<ChangeControlRequest> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let mut request = self.store.request(id).await?;
        authorize(
            self.oracle.as_ref(),
            WorkflowAction::QaFinalEvaluation,
            actor,
            &request,
        )
        .await?;
        request.ensure_status("qa_final_evaluation", RequestStatus::PendingQaEvaluation)?;

        if !cmd.cft_complete {
            return Err(DomainError::Validation(
                "CFT evaluations are not complete".to_string(),
            ));
        }
        if !cmd.document_updates_complete {
            return Err(DomainError::Validation(
                "Document updates are not complete".to_string(),
            ));
        }
        if !cmd.regulatory_filings_complete {
            return Err(DomainError::Validation(
                "Regulatory filings are not complete".to_string(),
            ));
        }
        let requires_risk = request
            .impact_level
            .map(|impact| impact.requires_risk_assessment())
            .unwrap_or(false);
        if requires_risk {
            if !cmd.risk_assessment_closed {
                return Err(DomainError::Validation(
                    "Risk assessment is not closed".to_string(),
                ));
            }
            let completed = matches!(
                self.store.risk_assessment(id).await?,
                Some(assessment) if assessment.status == AssessmentStatus::Completed
            );
            if !completed {
                return Err(DomainError::Validation(
                    "Risk assessment must be completed".to_string(),
                ));
            }
        }

        let previous = request.status();
        request.advance_to_qa_head_approval()?;
        self.store.save_request(&mut request).await?;
        self.append_entries(vec![Self::entry(
            &request,
            8,
            actor,
            "QA final evaluation completed",
            cmd.comments,
            previous,
            request.status(),
        )])
        .await?;

        info!(request = %request.id(), "QA final evaluation passed");
        Ok(request)
    }

    /// Step 9: QA head approval - approve onward to verification or
    /// return the request to the action plan phase for correction
    pub async fn qa_head_approval(
        &self,
        id: RequestId,
        actor: UserId,
        cmd: QaHeadApproval,
    ) -> DomainResult<ChangeControlRequest> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let mut request = self.store.request(id).await?;
        authorize(
            self.oracle.as_ref(),
            WorkflowAction::QaHeadApproval,
            actor,
            &request,
        )
        .await?;
        request.ensure_status("qa_head_approval", RequestStatus::PendingQaHeadApproval)?;

        let previous = request.status();
        let entry = if cmd.approved {
            request.approve_by_qa_head()?;
            Self::entry(
                &request,
                9,
                actor,
                "Approved by QA head",
                "",
                previous,
                request.status(),
            )
        } else {
            request.return_for_correction()?;
            Self::entry(
                &request,
                9,
                actor,
                "Returned for correction",
                cmd.reason,
                previous,
                request.status(),
            )
        };

        self.store.save_request(&mut request).await?;
        self.append_entries(vec![entry]).await?;

        info!(
            request = %request.id(),
            from = %previous,
            to = %request.status(),
            "QA head decision applied"
        );
        Ok(request)
    }

    /// Step 10/11: post-implementation verification.
    ///
    /// All three checks must pass. Closing auto-chains the final
    /// closure entry through the transition queue, inside the same
    /// atomic unit.
    pub async fn verify(
        &self,
        id: RequestId,
        actor: UserId,
        cmd: Verification,
    ) -> DomainResult<ChangeControlRequest> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let mut request = self.store.request(id).await?;
        authorize(self.oracle.as_ref(), WorkflowAction::Verify, actor, &request).await?;
        request.ensure_status("verify", RequestStatus::PendingVerification)?;

        if !(cmd.change_implemented && cmd.training_conducted && cmd.no_adverse_impact) {
            return Err(DomainError::Validation(
                "All verification checks must pass".to_string(),
            ));
        }

        let previous = request.status();
        request.close()?;
        let mut entries = vec![Self::entry(
            &request,
            10,
            actor,
            "Verification completed",
            cmd.comments,
            previous,
            request.status(),
        )];

        let mut queue = VecDeque::from([QueuedTransition::Closure]);
        self.drain_queue(&mut request, actor, &mut queue, &mut entries)
            .await?;

        self.store.save_request(&mut request).await?;
        self.append_entries(entries).await?;

        info!(request = %request.id(), "change control request closed");
        Ok(request)
    }

    /// Full read model for the boundary: the aggregate with every
    /// nested sub-record and the audit trail
    pub async fn snapshot(&self, id: RequestId) -> DomainResult<RequestSnapshot> {
        Ok(RequestSnapshot {
            request: self.store.request(id).await?,
            evaluators: self.store.evaluators(id).await?,
            evaluations: self.store.evaluations(id).await?,
            risk_assessment: self.store.risk_assessment(id).await?,
            document_revisions: self.store.document_revisions(id).await?,
            action_items: self.store.action_items(id).await?,
            history: self.store.history(id).await?,
        })
    }
}
