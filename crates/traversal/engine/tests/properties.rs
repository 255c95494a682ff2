//! End-to-end traversal properties

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use traversal_engine::traversal_types::{
    ChildScope, DeferredOperation, Entry, EntryId, FeedbackId, SecretReference, SecretValue,
    Value, WorkflowGraph, REDACTION_MARKER,
};
use traversal_engine::{
    DeferredError, EventRecorder, ExecutionContext, FieldError, InMemorySessionStore,
    OperationCatalog, OperationError, OperationHandler, SecretError, SecretResolver,
    SessionStore, StaticSecretResolver, TraversalError, TraversalEvent, Traverser, Validator,
};

fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

fn network_graph() -> WorkflowGraph {
    let mut g = WorkflowGraph::new("network", "Network setup");
    g.add_root_entry(Entry::string("name", "Name")).unwrap();
    g.add_root_entry(
        Entry::boolean("custom_vpc", "Use a custom VPC?").with_child(
            ChildScope::new(vec![EntryId::new("region"), EntryId::new("cidr")])
                .with_gate("custom_vpc"),
        ),
    )
    .unwrap();
    g.add_entry(Entry::choice("region", "Region", ["eu", "us"]))
        .unwrap();
    g.add_entry(Entry::string("cidr", "CIDR block")).unwrap();
    g.add_root_entry(Entry::integer("size", "Cluster size")).unwrap();
    g
}

fn current_id(t: &Traverser) -> Option<EntryId> {
    t.current_question().map(|e| e.id.clone())
}

// ── Round-trip ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_roundtrip_inside_child_scope() {
    let graph = Arc::new(network_graph());
    let mut t = Traverser::new(graph.clone()).unwrap();
    t.start(ts(0)).await.unwrap();
    t.answer("prod", ts(1)).await.unwrap();
    t.answer("yes", ts(2)).await.unwrap();
    t.answer("eu", ts(3)).await.unwrap();
    assert_eq!(current_id(&t), Some(EntryId::new("cidr")));

    let json = t.serialize().to_json().unwrap();
    let document = traversal_engine::SessionDocument::from_json(&json).unwrap();

    let recorder = Arc::new(EventRecorder::new());
    let mut restored = Traverser::new(graph).unwrap();
    restored.subscribe(recorder.clone());
    restored.restore(document).unwrap();

    assert_eq!(restored.session_id(), t.session_id());
    assert_eq!(current_id(&restored), current_id(&t));
    assert_eq!(restored.ledger(), t.ledger());
    assert_eq!(restored.level_stack(), t.level_stack());
    assert_eq!(restored.current_level(), t.current_level());
    assert_eq!(
        recorder.events(),
        vec![TraversalEvent::SessionRestored {
            session_id: t.session_id().clone(),
            feedback_count: 3,
        }]
    );

    // Ids continue past the restored maximum
    let outcome = restored.answer("10.0.0.0/16", ts(4)).await.unwrap();
    assert_eq!(outcome.feedback_ids, vec![FeedbackId(3)]);
    assert_eq!(outcome.next_question, Some(EntryId::new("size")));
}

#[tokio::test]
async fn test_restore_rejects_changed_graph() {
    let mut t = Traverser::new(Arc::new(network_graph())).unwrap();
    t.start(ts(0)).await.unwrap();
    t.answer("prod", ts(1)).await.unwrap();
    let document = t.serialize();

    let mut changed = network_graph();
    changed
        .add_root_entry(Entry::boolean("ha", "High availability?"))
        .unwrap();
    let mut other = Traverser::new(Arc::new(changed)).unwrap();
    assert!(matches!(
        other.restore(document),
        Err(TraversalError::Restore(
            traversal_engine::RestoreError::VersionMismatch { .. }
        ))
    ));
    assert!(other.ledger().is_empty());
}

#[tokio::test]
async fn test_store_roundtrip() {
    let graph = Arc::new(network_graph());
    let store = InMemorySessionStore::new();

    let mut t = Traverser::new(graph.clone()).unwrap();
    t.start(ts(0)).await.unwrap();
    t.answer("prod", ts(1)).await.unwrap();
    store.save(t.session_id(), &t.serialize()).await.unwrap();

    let loaded = store.load(t.session_id()).await.unwrap().unwrap();
    let mut resumed = Traverser::new(graph).unwrap();
    resumed.restore(loaded).unwrap();
    assert_eq!(current_id(&resumed), Some(EntryId::new("custom_vpc")));
    assert!(store.delete(t.session_id()).await.unwrap());
}

// ── Ledger behaviour ─────────────────────────────────────────────────

#[tokio::test]
async fn test_invalid_answer_changes_nothing() {
    let mut t = Traverser::new(Arc::new(network_graph())).unwrap();
    t.start(ts(0)).await.unwrap();
    t.answer("prod", ts(1)).await.unwrap();
    t.answer("yes", ts(2)).await.unwrap();

    let before = t.serialize();
    let err = t.answer("ap-south", ts(3)).await.unwrap_err();
    assert!(matches!(err, TraversalError::Field(ref f) if f.entry_id == EntryId::new("region")));
    assert_eq!(current_id(&t), Some(EntryId::new("region")));
    assert_eq!(t.ledger().len(), 2);
    assert_eq!(t.serialize(), before);

    // Retry on the same question succeeds
    t.answer("us", ts(4)).await.unwrap();
    assert_eq!(current_id(&t), Some(EntryId::new("cidr")));
}

#[tokio::test]
async fn test_auto_skip_after_answer() {
    let mut g = WorkflowGraph::new("w", "W");
    g.add_root_entry(Entry::string("a", "A")).unwrap();
    g.add_root_entry(Entry::string("b", "B").with_automatic_answer("a"))
        .unwrap();
    g.add_root_entry(Entry::string("c", "C")).unwrap();

    let mut t = Traverser::new(Arc::new(g)).unwrap();
    t.start(ts(0)).await.unwrap();
    assert_eq!(current_id(&t), Some(EntryId::new("a")));

    t.answer("42", ts(1)).await.unwrap();
    assert_eq!(t.ledger().len(), 2);
    let b = t.ledger().get(FeedbackId(1)).unwrap();
    assert_eq!(b.entry_id, EntryId::new("b"));
    assert!(b.is_automatic);
    assert_eq!(b.answer(), &Value::from("42"));
    assert_eq!(current_id(&t), Some(EntryId::new("c")));
}

#[tokio::test]
async fn test_auto_skip_on_start() {
    let mut g = WorkflowGraph::new("w", "W");
    g.add_root_entry(Entry::boolean("telemetry", "Telemetry?").with_automatic_answer("false"))
        .unwrap();
    g.add_root_entry(Entry::string("name", "Name")).unwrap();

    let mut t = Traverser::new(Arc::new(g)).unwrap();
    t.start(ts(0)).await.unwrap();
    assert_eq!(t.ledger().len(), 1);
    assert_eq!(current_id(&t), Some(EntryId::new("name")));
}

#[tokio::test]
async fn test_child_scope_context_flows_to_parent() {
    let mut t = Traverser::new(Arc::new(network_graph())).unwrap();
    t.start(ts(0)).await.unwrap();
    t.answer("prod", ts(1)).await.unwrap();
    let depth_before = t.level_stack().depth();

    t.answer("yes", ts(2)).await.unwrap();
    assert_eq!(t.level_stack().depth(), depth_before + 1);
    t.answer("eu", ts(3)).await.unwrap();
    t.answer("10.0.0.0/16", ts(4)).await.unwrap();

    assert_eq!(t.level_stack().depth(), depth_before);
    assert_eq!(t.current_level().get("region"), Some(&Value::from("eu")));
    assert_eq!(current_id(&t), Some(EntryId::new("size")));
}

#[tokio::test]
async fn test_revisit_most_recent_wins() {
    let mut t = Traverser::new(Arc::new(network_graph())).unwrap();
    t.start(ts(0)).await.unwrap();
    t.answer("prod", ts(1)).await.unwrap();
    t.answer("no", ts(2)).await.unwrap();
    t.answer("3", ts(3)).await.unwrap();
    assert!(t.is_completed());

    t.restart(ts(4)).await.unwrap();
    t.answer("staging", ts(5)).await.unwrap();
    let current = t.ledger().current_answer(&EntryId::new("name")).unwrap();
    assert_eq!(current.answer(), &Value::from("staging"));
}

#[tokio::test]
async fn test_empty_workflow_completes_on_start() {
    let recorder = Arc::new(EventRecorder::new());
    let mut t = Traverser::new(Arc::new(WorkflowGraph::new("empty", "Empty"))).unwrap();
    t.subscribe(recorder.clone());
    t.start(ts(0)).await.unwrap();

    assert!(t.is_completed());
    assert!(t.current_question().is_none());
    assert!(t.ledger().is_empty());
    assert!(matches!(
        recorder.events().as_slice(),
        [TraversalEvent::Completed { feedback_count: 0, .. }]
    ));
}

// ── Secrets ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_sensitive_answer_never_serialized_as_literal() {
    let mut g = WorkflowGraph::new("w", "W");
    g.add_root_entry(Entry::string("token", "API token").sensitive())
        .unwrap();
    g.add_root_entry(Entry::string("name", "Name")).unwrap();

    let secrets = StaticSecretResolver::new().with_secret("API_TOKEN", "hunter2");
    let mut t = Traverser::new(Arc::new(g))
        .unwrap()
        .with_secret_resolver(Arc::new(secrets));
    t.start(ts(0)).await.unwrap();

    // Literal input is refused without echoing it
    let err = t.answer("hunter2", ts(1)).await.unwrap_err();
    assert!(!err.to_string().contains("hunter2"));

    t.answer("$API_TOKEN", ts(2)).await.unwrap();
    let json = t.serialize().to_json().unwrap();
    assert!(!json.contains("hunter2"));

    let feedback = t.ledger().get(FeedbackId(0)).unwrap();
    assert!(feedback.is_sensitive);
    assert_eq!(feedback.rendered_answer(), REDACTION_MARKER);
    assert!(!feedback.to_string().contains("API_TOKEN"));
    assert!(!format!("{:?}", feedback).contains("API_TOKEN"));
}

// ── Deferred operations ──────────────────────────────────────────────

struct Recording {
    journal: Arc<Mutex<Vec<String>>>,
    fail: bool,
}

#[async_trait]
impl OperationHandler for Recording {
    async fn execute(
        &self,
        op: &DeferredOperation,
        ctx: &ExecutionContext,
    ) -> Result<(), OperationError> {
        if self.fail {
            return Err(OperationError::new("apply failed"));
        }
        let label = op.payload["label"].as_str().unwrap_or_default();
        let token = ctx.literal("token").unwrap_or_default();
        self.journal
            .lock()
            .unwrap()
            .push(format!("exec:{}:{}", label, token));
        Ok(())
    }

    async fn rollback(
        &self,
        op: &DeferredOperation,
        _ctx: &ExecutionContext,
    ) -> Result<(), OperationError> {
        let label = op.payload["label"].as_str().unwrap_or_default();
        self.journal.lock().unwrap().push(format!("undo:{}", label));
        Ok(())
    }
}

fn token_graph() -> WorkflowGraph {
    let mut g = WorkflowGraph::new("deploy", "Deploy");
    g.add_root_entry(Entry::string("token", "API token").sensitive())
        .unwrap();
    g
}

fn deploy_traverser(journal: &Arc<Mutex<Vec<String>>>) -> Traverser {
    let catalog = OperationCatalog::new()
        .with_handler(
            "apply",
            Arc::new(Recording {
                journal: journal.clone(),
                fail: false,
            }),
        )
        .with_handler(
            "broken",
            Arc::new(Recording {
                journal: journal.clone(),
                fail: true,
            }),
        );
    let secrets = StaticSecretResolver::new().with_secret("API_TOKEN", "hunter2");
    Traverser::new(Arc::new(token_graph()))
        .unwrap()
        .with_catalog(catalog)
        .with_secret_resolver(Arc::new(secrets))
}

#[tokio::test]
async fn test_commit_runs_in_order_with_resolved_secrets() {
    let journal = Arc::new(Mutex::new(Vec::new()));
    let mut t = deploy_traverser(&journal);
    t.start(ts(0)).await.unwrap();
    t.register_operation("apply", serde_json::json!({"label": "op1"}))
        .unwrap();
    t.answer("$API_TOKEN", ts(1)).await.unwrap();
    t.register_operation("apply", serde_json::json!({"label": "op2"}))
        .unwrap();

    assert_eq!(t.pending_operations()[0].feedback_id, None);
    assert_eq!(t.pending_operations()[1].feedback_id, Some(FeedbackId(0)));

    let report = t.commit_operations().await.unwrap();
    assert_eq!(report.executed, 2);
    assert_eq!(
        *journal.lock().unwrap(),
        vec!["exec:op1:hunter2", "exec:op2:hunter2"]
    );
    assert!(t.pending_operations().is_empty());
    assert!(matches!(
        t.commit_operations().await,
        Err(TraversalError::AlreadyCommitted)
    ));
}

#[tokio::test]
async fn test_failed_operation_rolls_back_in_reverse() {
    let journal = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::new(EventRecorder::new());
    let mut t = deploy_traverser(&journal);
    t.subscribe(recorder.clone());
    t.start(ts(0)).await.unwrap();
    t.answer("$API_TOKEN", ts(1)).await.unwrap();
    for (op_type, label) in [("apply", "op1"), ("apply", "op2"), ("broken", "op3")] {
        t.register_operation(op_type, serde_json::json!({ "label": label }))
            .unwrap();
    }

    let err = t.commit_operations().await.unwrap_err();
    let TraversalError::Deferred(DeferredError::OperationFailed {
        op_type,
        position,
        rolled_back,
        ..
    }) = err
    else {
        panic!("expected OperationFailed");
    };
    assert_eq!(op_type.as_str(), "broken");
    assert_eq!(position, 2);
    assert_eq!(rolled_back, vec![1, 0]);
    assert_eq!(
        *journal.lock().unwrap(),
        vec![
            "exec:op1:hunter2",
            "exec:op2:hunter2",
            "undo:op2",
            "undo:op1"
        ]
    );
    assert!(!t.operations_committed());
    assert_eq!(t.pending_operations().len(), 3);
    assert!(recorder
        .events()
        .iter()
        .any(|e| matches!(e, TraversalEvent::OperationsRolledBack { position: 2, .. })));
}

#[tokio::test]
async fn test_cancel_discards_operations_unexecuted() {
    let journal = Arc::new(Mutex::new(Vec::new()));
    let mut t = deploy_traverser(&journal);
    t.start(ts(0)).await.unwrap();
    t.register_operation("apply", serde_json::json!({"label": "op1"}))
        .unwrap();
    t.cancel();

    assert!(t.pending_operations().is_empty());
    assert!(journal.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_unresolvable_secret_runs_nothing() {
    let journal = Arc::new(Mutex::new(Vec::new()));
    let catalog = OperationCatalog::new().with_handler(
        "apply",
        Arc::new(Recording {
            journal: journal.clone(),
            fail: false,
        }),
    );
    let mut t = Traverser::new(Arc::new(token_graph()))
        .unwrap()
        .with_catalog(catalog)
        .with_secret_resolver(Arc::new(StaticSecretResolver::new()));
    t.start(ts(0)).await.unwrap();
    t.answer("$API_TOKEN", ts(1)).await.unwrap();
    t.register_operation("apply", serde_json::json!({"label": "op1"}))
        .unwrap();

    let err = t.commit_operations().await.unwrap_err();
    assert!(matches!(err, TraversalError::Secret(_)));
    assert!(!err.to_string().contains("API_TOKEN"));
    assert!(journal.lock().unwrap().is_empty());
}

// ── Cancellation ─────────────────────────────────────────────────────

/// Never completes; the caller's future is dropped at this await
struct Stalled;

#[async_trait]
impl Validator for Stalled {
    async fn validate(&self, _entry: &Entry, _value: &Value) -> Result<(), FieldError> {
        std::future::pending::<()>().await;
        Ok(())
    }
}

#[async_trait]
impl SecretResolver for Stalled {
    async fn resolve(&self, _reference: &SecretReference) -> Result<SecretValue, SecretError> {
        std::future::pending::<()>().await;
        Err(SecretError::Unavailable("unreachable".into()))
    }
}

#[tokio::test]
async fn test_answer_dropped_during_validation_leaves_session_unchanged() {
    let recorder = Arc::new(EventRecorder::new());
    let mut t = Traverser::new(Arc::new(linear_graph(2)))
        .unwrap()
        .with_validator(Arc::new(Stalled));
    t.start(ts(0)).await.unwrap();
    t.subscribe(recorder.clone());
    let before = t.serialize();

    let result = tokio::time::timeout(Duration::from_millis(20), t.answer("x", ts(1))).await;
    assert!(result.is_err());

    assert_eq!(t.serialize(), before);
    assert_eq!(current_id(&t), Some(EntryId::new("q0")));
    assert!(t.ledger().is_empty());
    assert!(recorder.events().is_empty());
}

#[tokio::test]
async fn test_answer_dropped_after_staging_leaves_session_unchanged() {
    let mut g = WorkflowGraph::new("w", "W");
    g.add_root_entry(Entry::string("token", "API token").sensitive())
        .unwrap();
    g.add_root_entry(
        Entry::boolean("deploy", "Deploy?").with_child(
            ChildScope::new(vec![EntryId::new("target")]).with_inherited_literal("token"),
        ),
    )
    .unwrap();
    g.add_entry(Entry::string("target", "Target")).unwrap();

    let recorder = Arc::new(EventRecorder::new());
    let mut t = Traverser::new(Arc::new(g))
        .unwrap()
        .with_secret_resolver(Arc::new(Stalled));
    t.start(ts(0)).await.unwrap();
    t.answer("$API_TOKEN", ts(1)).await.unwrap();
    t.subscribe(recorder.clone());
    let before = t.serialize();

    // The feedback is staged before the resolver stalls on scope entry
    let result = tokio::time::timeout(Duration::from_millis(20), t.answer("yes", ts(2))).await;
    assert!(result.is_err());

    assert_eq!(t.serialize(), before);
    assert_eq!(t.ledger().len(), 1);
    assert_eq!(t.level_stack().depth(), 0);
    assert_eq!(current_id(&t), Some(EntryId::new("deploy")));
    assert!(recorder.events().is_empty());

    // The traverser stays usable after the dropped call
    let mut resumed = Traverser::new(t.graph().clone()).unwrap();
    resumed.restore(t.serialize()).unwrap();
    assert_eq!(current_id(&resumed), Some(EntryId::new("deploy")));
}

// ── Properties ───────────────────────────────────────────────────────

fn linear_graph(n: usize) -> WorkflowGraph {
    let mut g = WorkflowGraph::new("linear", "Linear");
    for i in 0..n {
        g.add_root_entry(Entry::string(format!("q{}", i), format!("Question {}", i)))
            .unwrap();
    }
    g
}

proptest! {
    #[test]
    fn property_ids_contiguous_and_roundtrip(
        answers in proptest::collection::vec("[a-z]{1,8}", 1..12),
        split in 0usize..12,
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        runtime.block_on(async {
            let graph = Arc::new(linear_graph(answers.len()));
            let split = split.min(answers.len());

            let mut t = Traverser::new(graph.clone()).unwrap();
            t.start(ts(0)).await.unwrap();
            for (i, answer) in answers[..split].iter().enumerate() {
                t.answer(answer.as_str(), ts(i as i64)).await.unwrap();
            }

            let mut restored = Traverser::new(graph).unwrap();
            restored.restore(t.serialize()).unwrap();
            assert_eq!(current_id(&restored), current_id(&t));
            assert_eq!(restored.ledger(), t.ledger());
            assert_eq!(restored.level_stack(), t.level_stack());

            for (i, answer) in answers[split..].iter().enumerate() {
                restored.answer(answer.as_str(), ts(i as i64)).await.unwrap();
            }
            assert!(restored.is_completed());
            let ids: Vec<u64> = restored.ledger().iter().map(|f| f.feedback_id.0).collect();
            let expected: Vec<u64> = (0..answers.len() as u64).collect();
            assert_eq!(ids, expected);
        });
    }
}
