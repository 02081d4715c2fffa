//! Concurrency, idempotence, and audit-trail invariants

use change_control_domain::*;
use chrono::NaiveDate;
use rand::seq::SliceRandom;
use std::sync::Arc;

struct Fixture {
    service: Arc<ChangeControlService>,
    store: Arc<InMemoryStore>,
    initiator: UserId,
    dept_head: UserId,
    qa: UserId,
    dept: DepartmentId,
    eval_dept_a: DepartmentId,
    eval_dept_b: DepartmentId,
    evaluator_a: UserId,
    evaluator_b: UserId,
}

async fn fixture() -> Fixture {
    let store = Arc::new(InMemoryStore::new());

    let dept_head = User::new("qa.head");
    let dept = Department::new("QA", "Quality Assurance").with_head(dept_head.id);
    let initiator = User::in_department("initiator", dept.id);
    let qa = User::in_department("qa.registrar", dept.id);

    let eval_dept_a = Department::new("PD", "Product Development");
    let eval_dept_b = Department::new("RA", "Regulatory Affairs");
    let evaluator_a = User::in_department("pd.evaluator", eval_dept_a.id);
    let evaluator_b = User::in_department("ra.evaluator", eval_dept_b.id);

    let roles = Arc::new(RoleTable::new(store.clone() as Arc<dyn WorkflowStore>));
    roles.grant(
        dept_head.id,
        Role::DepartmentHead,
        RoleScope::Department(dept.id),
    );
    roles.grant(qa.id, Role::QaUser, RoleScope::Global);

    let f = Fixture {
        service: Arc::new(ChangeControlService::new(
            store.clone() as Arc<dyn WorkflowStore>,
            roles as Arc<dyn PermissionOracle>,
        )),
        store: store.clone(),
        initiator: initiator.id,
        dept_head: dept_head.id,
        qa: qa.id,
        dept: dept.id,
        eval_dept_a: eval_dept_a.id,
        eval_dept_b: eval_dept_b.id,
        evaluator_a: evaluator_a.id,
        evaluator_b: evaluator_b.id,
    };

    for user in [initiator, dept_head, qa, evaluator_a, evaluator_b] {
        store.insert_user(user).await.unwrap();
    }
    for department in [dept, eval_dept_a, eval_dept_b] {
        store.insert_department(department).await.unwrap();
    }
    f
}

fn target_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 6, 30).unwrap()
}

async fn registered_major(f: &Fixture) -> RequestId {
    let request = f
        .service
        .initiate(InitiateRequest {
            initiator: f.initiator,
            department: f.dept,
            title: "Concurrent change".to_string(),
            description: "Exercise the evaluation gate".to_string(),
        })
        .await
        .unwrap();
    let id = request.id();

    f.service
        .dept_head_decision(
            id,
            f.dept_head,
            DeptHeadDecision {
                approved: true,
                reason: String::new(),
            },
        )
        .await
        .unwrap();
    f.service
        .qa_register(
            id,
            f.qa,
            QaRegistration {
                final_number: None,
                impact_level: ImpactLevel::Major,
                target_completion: target_date(),
                evaluators: vec![
                    EvaluatorAssignment {
                        department: f.eval_dept_a,
                        evaluator: f.evaluator_a,
                    },
                    EvaluatorAssignment {
                        department: f.eval_dept_b,
                        evaluator: f.evaluator_b,
                    },
                ],
            },
        )
        .await
        .unwrap();
    id
}

fn approve(department: DepartmentId) -> SubmitEvaluation {
    SubmitEvaluation {
        department,
        impact_type: ImpactType::Operational,
        decision: EvaluationDecision::Approved,
        risk_level: RiskLevel::Low,
        notes: String::new(),
    }
}

#[tokio::test]
async fn test_concurrent_initiation_never_duplicates_numbers() {
    let f = fixture().await;

    let mut handles = Vec::new();
    for i in 0..8 {
        let service = f.service.clone();
        let initiator = f.initiator;
        let dept = f.dept;
        handles.push(tokio::spawn(async move {
            service
                .initiate(InitiateRequest {
                    initiator,
                    department: dept,
                    title: format!("Concurrent request {i}"),
                    description: "racing for a number".to_string(),
                })
                .await
                .unwrap()
        }));
    }

    let mut numbers = Vec::new();
    for handle in handles {
        numbers.push(handle.await.unwrap().temporary_number);
    }
    numbers.sort_by(|a, b| a.as_str().cmp(b.as_str()));
    numbers.dedup();
    assert_eq!(numbers.len(), 8);
}

#[tokio::test]
async fn test_concurrent_evaluations_advance_exactly_once() {
    let f = fixture().await;
    let id = registered_major(&f).await;

    let submit_a = {
        let service = f.service.clone();
        let cmd = approve(f.eval_dept_a);
        let actor = f.evaluator_a;
        tokio::spawn(async move { service.submit_cft_evaluation(id, actor, cmd).await })
    };
    let submit_b = {
        let service = f.service.clone();
        let cmd = approve(f.eval_dept_b);
        let actor = f.evaluator_b;
        tokio::spawn(async move { service.submit_cft_evaluation(id, actor, cmd).await })
    };
    submit_a.await.unwrap().unwrap();
    submit_b.await.unwrap().unwrap();

    let snapshot = f.service.snapshot(id).await.unwrap();
    assert_eq!(
        snapshot.request.status(),
        RequestStatus::PendingRiskAssessment
    );
    assert_eq!(snapshot.evaluations.len(), 2);

    // The gate fired exactly once
    let gate_entries = snapshot
        .history
        .iter()
        .filter(|e| e.action == "All CFT evaluations completed")
        .count();
    assert_eq!(gate_entries, 1);
}

#[tokio::test]
async fn test_resubmission_is_idempotent() {
    let f = fixture().await;
    let id = registered_major(&f).await;

    let cmd = SubmitEvaluation {
        department: f.eval_dept_a,
        impact_type: ImpactType::Technical,
        decision: EvaluationDecision::ApprovedWithConditions,
        risk_level: RiskLevel::Medium,
        notes: "requalify mixer first".to_string(),
    };
    f.service
        .submit_cft_evaluation(id, f.evaluator_a, cmd.clone())
        .await
        .unwrap();
    f.service
        .submit_cft_evaluation(id, f.evaluator_a, cmd)
        .await
        .unwrap();

    let snapshot = f.service.snapshot(id).await.unwrap();
    assert_eq!(snapshot.evaluations.len(), 1);
    assert_eq!(
        snapshot.evaluations[0].decision,
        EvaluationDecision::ApprovedWithConditions
    );
    // Still waiting on the second department
    assert_eq!(
        snapshot.request.status(),
        RequestStatus::PendingCftEvaluation
    );
}

#[tokio::test]
async fn test_history_grows_monotonically_and_is_immutable() {
    let f = fixture().await;
    let id = registered_major(&f).await;

    let before = f.store.history(id).await.unwrap();
    assert!(!before.is_empty());

    // Submit evaluations in random order; history only ever grows
    let mut submissions = vec![
        (f.evaluator_a, f.eval_dept_a),
        (f.evaluator_b, f.eval_dept_b),
    ];
    submissions.shuffle(&mut rand::thread_rng());

    let mut previous_len = before.len();
    for (actor, department) in submissions {
        f.service
            .submit_cft_evaluation(id, actor, approve(department))
            .await
            .unwrap();
        let current = f.store.history(id).await.unwrap();
        assert!(current.len() > previous_len);
        previous_len = current.len();
    }

    // Earlier entries are byte-for-byte unchanged
    let after = f.store.history(id).await.unwrap();
    assert_eq!(&after[..before.len()], &before[..]);
}

#[tokio::test]
async fn test_rejection_fields_iff_rejected() {
    let f = fixture().await;

    // A rejected request has the fields populated
    let request = f
        .service
        .initiate(InitiateRequest {
            initiator: f.initiator,
            department: f.dept,
            title: "To be rejected".to_string(),
            description: "infeasible".to_string(),
        })
        .await
        .unwrap();
    let rejected = f
        .service
        .dept_head_decision(
            request.id(),
            f.dept_head,
            DeptHeadDecision {
                approved: false,
                reason: String::new(),
            },
        )
        .await
        .unwrap();
    assert_eq!(rejected.status(), RequestStatus::Rejected);
    let rejection = rejected.rejection().unwrap();
    assert_eq!(rejection.reason, "Rejected by department head");
    rejected.validate().unwrap();

    // A live request has none
    let live_id = registered_major(&f).await;
    let live = f.store.request(live_id).await.unwrap();
    assert!(live.rejection().is_none());
    live.validate().unwrap();
}

#[tokio::test]
async fn test_every_call_appends_at_least_one_entry() {
    let f = fixture().await;
    let id = registered_major(&f).await;

    // Even an operation that does not change status writes an entry
    // with previous == new
    let before = f.store.history(id).await.unwrap().len();
    f.service
        .submit_cft_evaluation(id, f.evaluator_a, approve(f.eval_dept_a))
        .await
        .unwrap();
    let history = f.store.history(id).await.unwrap();
    assert_eq!(history.len(), before + 1);
    let entry = history.last().unwrap();
    assert!(!entry.changed_status());
    assert_eq!(entry.previous_status, RequestStatus::PendingCftEvaluation);
}

#[tokio::test]
async fn test_stale_aggregate_save_conflicts() {
    let f = fixture().await;
    let id = registered_major(&f).await;

    let mut stale = f.store.request(id).await.unwrap();

    // Another writer completes first
    f.service
        .submit_cft_evaluation(id, f.evaluator_a, approve(f.eval_dept_a))
        .await
        .unwrap();
    f.service
        .submit_cft_evaluation(id, f.evaluator_b, approve(f.eval_dept_b))
        .await
        .unwrap();

    let err = f.store.save_request(&mut stale).await.unwrap_err();
    assert!(err.is_concurrency_error());
}
