//! Integration tests for the planning engine.

use async_trait::async_trait;
use elizaos_plugin_planning_engine::{
    Action, ActionContext, ActionPlan, ActionRegistry, ActionResult, ActionStep, ExecutionModel,
    HandlerCallback, Message, OnError, PlanStatus, PlanningConfig, PlanningContext,
    PlanningError, PlanningService, RetryPolicy, Runtime,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

struct StaticRuntime(String);

#[async_trait]
impl Runtime for StaticRuntime {
    async fn use_model(
        &self,
        _model_type: &str,
        _params: Value,
    ) -> elizaos_plugin_planning_engine::Result<String> {
        Ok(self.0.clone())
    }
}

/// Counts calls; fails every call when `fails` is set.
struct Counter {
    name: &'static str,
    fails: bool,
    calls: AtomicU32,
}

impl Counter {
    fn ok(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            fails: false,
            calls: AtomicU32::new(0),
        })
    }

    fn failing(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            fails: true,
            calls: AtomicU32::new(0),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Action for Counter {
    fn name(&self) -> &str {
        self.name
    }
    fn description(&self) -> &str {
        "counts calls"
    }
    async fn validate(&self, _context: &ActionContext, _message: &Message) -> bool {
        true
    }
    async fn handler(
        &self,
        _context: &ActionContext,
        _params: Value,
        _callback: Option<&HandlerCallback>,
    ) -> Result<Value, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fails {
            Err(format!("{} exploded", self.name))
        } else {
            Ok(json!(format!("{} done", self.name)))
        }
    }
}

/// Blocks until released, so a test can act while a plan is mid-flight.
struct Gate {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl Action for Gate {
    fn name(&self) -> &str {
        "GATE"
    }
    fn description(&self) -> &str {
        "waits for the test"
    }
    async fn validate(&self, _context: &ActionContext, _message: &Message) -> bool {
        true
    }
    async fn handler(
        &self,
        _context: &ActionContext,
        _params: Value,
        _callback: Option<&HandlerCallback>,
    ) -> Result<Value, String> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(json!("released"))
    }
}

fn no_retry(on_error: OnError) -> RetryPolicy {
    RetryPolicy {
        max_retries: 0,
        backoff_ms: 0,
        backoff_multiplier: 1.0,
        on_error,
    }
}

fn service_with(actions: Vec<Arc<dyn Action>>) -> PlanningService {
    let mut registry = ActionRegistry::new();
    for action in actions {
        registry.register(action);
    }
    PlanningService::new(PlanningConfig::default()).with_actions(registry)
}

#[test]
fn test_config_defaults() {
    let config = PlanningConfig::default();

    assert_eq!(config.max_steps, 10);
    assert_eq!(config.default_timeout_ms, 60000);
    assert_eq!(config.execution_model, ExecutionModel::Sequential);
    assert!(config.enable_adaptation);
}

#[tokio::test]
async fn test_dependency_ids_are_regenerated_in_order() {
    let response = r#"<plan>
<goal>Publish</goal>
<execution_model>dag</execution_model>
<steps>
<step><id>fetch</id><action>ANALYZE_INPUT</action></step>
<step><id>shape</id><action>PROCESS_ANALYSIS</action><dependencies>["fetch"]</dependencies></step>
<step><id>ship</id><action>EXECUTE_FINAL</action>
<dependencies>["shape", "ghost", "fetch"]</dependencies></step>
</steps>
</plan>"#;
    let service = PlanningService::with_runtime(
        PlanningConfig::default(),
        Arc::new(StaticRuntime(response.to_string())),
    );

    let plan = service
        .create_comprehensive_plan(&PlanningContext::new("Publish"), None, None)
        .await
        .unwrap();

    assert_eq!(plan.execution_model, ExecutionModel::Dag);
    assert_eq!(plan.steps[1].dependencies, vec![plan.steps[0].id]);
    assert_eq!(
        plan.steps[2].dependencies,
        vec![plan.steps[1].id, plan.steps[0].id]
    );
    assert!(service.validate_plan(&plan).await.valid);
}

#[tokio::test]
async fn test_cycle_detection() {
    let service = PlanningService::new(PlanningConfig::default());
    let mut a = ActionStep::new("ANALYZE_INPUT");
    let b = ActionStep::new("PROCESS_ANALYSIS").with_dependencies(vec![a.id]);
    let c = ActionStep::new("EXECUTE_FINAL").with_dependencies(vec![b.id]);
    a.dependencies.push(c.id);
    let plan = ActionPlan::new("loop", vec![a, b, c], ExecutionModel::Dag);

    let report = service.validate_plan(&plan).await;
    assert!(!report.valid);
    assert!(report
        .errors
        .iter()
        .any(|e| e.contains("circular dependencies")));
}

#[tokio::test]
async fn test_sequential_abort_stops_the_plan() {
    let s1 = Counter::ok("S1");
    let s2 = Counter::failing("S2");
    let s3 = Counter::ok("S3");
    let service = service_with(vec![s1.clone(), s2.clone(), s3.clone()]);

    let plan = ActionPlan::new(
        "abort",
        vec![
            ActionStep::new("S1"),
            ActionStep::new("S2").with_retry_policy(no_retry(OnError::Abort)),
            ActionStep::new("S3"),
        ],
        ExecutionModel::Sequential,
    );
    let result = service
        .execute_plan(&plan, &Message::from_text("go"), None)
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.status, PlanStatus::Failed);
    assert_eq!(result.completed_steps, 1);
    assert_eq!(s3.calls(), 0);
    let errors = result.errors.unwrap();
    assert!(errors[0].contains("S2 exploded"));
}

#[tokio::test]
async fn test_sequential_continue_runs_remaining_steps() {
    let s1 = Counter::ok("S1");
    let s2 = Counter::failing("S2");
    let s3 = Counter::ok("S3");
    let service = service_with(vec![s1.clone(), s2.clone(), s3.clone()]);

    let plan = ActionPlan::new(
        "continue",
        vec![
            ActionStep::new("S1"),
            ActionStep::new("S2")
                .with_retry_policy(no_retry(OnError::Abort))
                .with_on_error(OnError::Continue),
            ActionStep::new("S3"),
        ],
        ExecutionModel::Sequential,
    );
    let result = service
        .execute_plan(&plan, &Message::from_text("go"), None)
        .await
        .unwrap();

    assert_eq!(s3.calls(), 1);
    assert_eq!(result.completed_steps, 2);
    assert_eq!(result.results[1].text, "S3 done");
    assert_eq!(result.errors.as_ref().unwrap().len(), 1);
    assert!(result.errors.unwrap()[0].contains("S2"));
    assert_eq!(result.status, PlanStatus::Failed);
}

#[tokio::test]
async fn test_registry_entry_removed_for_every_outcome() {
    let service = service_with(vec![Counter::ok("OK"), Counter::failing("BAD")]);
    let message = Message::from_text("go");

    let success = ActionPlan::new("ok", vec![ActionStep::new("OK")], ExecutionModel::Sequential);
    let abort = ActionPlan::new(
        "abort",
        vec![ActionStep::new("BAD").with_retry_policy(no_retry(OnError::Abort))],
        ExecutionModel::Sequential,
    );
    let mut a = ActionStep::new("OK");
    let b = ActionStep::new("OK").with_dependencies(vec![a.id]);
    a.dependencies.push(b.id);
    let deadlock = ActionPlan::new("deadlock", vec![a, b], ExecutionModel::Dag);

    for (plan, expected) in [
        (&success, PlanStatus::Completed),
        (&abort, PlanStatus::Failed),
        (&deadlock, PlanStatus::Failed),
    ] {
        let result = service.execute_plan(plan, &message, None).await.unwrap();
        assert_eq!(result.status, expected, "plan {}", plan.goal);
        assert!(service.get_plan_status(plan.id).await.is_none());
    }
}

#[tokio::test]
async fn test_fallback_plan_on_unparsable_response() {
    let service = PlanningService::with_runtime(
        PlanningConfig::default(),
        Arc::new(StaticRuntime("Sure! Here is what I would do...".to_string())),
    );

    let plan = service
        .create_comprehensive_plan(&PlanningContext::new("Summarize the thread"), None, None)
        .await
        .unwrap();
    assert_eq!(plan.steps.len(), 1);
    assert_eq!(plan.steps[0].action_name, "REPLY");
    assert_eq!(plan.execution_model, ExecutionModel::Sequential);
}

#[tokio::test]
async fn test_invalid_context_is_rejected_before_model_call() {
    let service = PlanningService::new(PlanningConfig::default());
    let err = service
        .create_comprehensive_plan(&PlanningContext::new(""), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, PlanningError::InvalidContext(_)));
}

#[tokio::test]
async fn test_cancel_running_plan() {
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let after = Counter::ok("AFTER");
    let service = Arc::new(service_with(vec![
        Arc::new(Gate {
            entered: entered.clone(),
            release: release.clone(),
        }),
        after.clone(),
    ]));

    let plan = ActionPlan::new(
        "cancel me",
        vec![ActionStep::new("GATE"), ActionStep::new("AFTER")],
        ExecutionModel::Sequential,
    );
    let plan_id = plan.id;

    let runner = {
        let service = Arc::clone(&service);
        tokio::spawn(async move {
            service
                .execute_plan(&plan, &Message::from_text("go"), None)
                .await
        })
    };

    entered.notified().await;
    let status = service.get_plan_status(plan_id).await.unwrap();
    assert_eq!(status.status, PlanStatus::Running);

    assert!(service.cancel_plan(plan_id).await);
    assert_eq!(
        service.get_plan_status(plan_id).await.unwrap().status,
        PlanStatus::Cancelled
    );
    release.notify_one();

    let result = runner.await.unwrap().unwrap();
    assert_eq!(result.status, PlanStatus::Cancelled);
    assert!(!result.success);
    assert_eq!(result.completed_steps, 1);
    assert_eq!(after.calls(), 0);
    assert!(service.get_plan_status(plan_id).await.is_none());
    assert!(!service.cancel_plan(plan_id).await);
}

#[tokio::test]
async fn test_cancel_stops_dag_between_layers() {
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let after = Counter::ok("AFTER");
    let service = Arc::new(service_with(vec![
        Arc::new(Gate {
            entered: entered.clone(),
            release: release.clone(),
        }),
        after.clone(),
    ]));

    let gate = ActionStep::new("GATE");
    let next = ActionStep::new("AFTER").with_dependencies(vec![gate.id]);
    let plan = ActionPlan::new("layered", vec![gate, next], ExecutionModel::Dag);
    let plan_id = plan.id;

    let runner = {
        let service = Arc::clone(&service);
        tokio::spawn(async move {
            service
                .execute_plan(&plan, &Message::from_text("go"), None)
                .await
        })
    };

    entered.notified().await;
    assert!(service.cancel_plan(plan_id).await);
    release.notify_one();

    let result = runner.await.unwrap().unwrap();
    assert_eq!(result.status, PlanStatus::Cancelled);
    assert_eq!(result.completed_steps, 1);
    assert_eq!(after.calls(), 0);
    assert!(service.get_plan_status(plan_id).await.is_none());
}

#[tokio::test]
async fn test_cancel_lets_launched_parallel_steps_finish() {
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let sibling = Counter::ok("SIBLING");
    let service = Arc::new(service_with(vec![
        Arc::new(Gate {
            entered: entered.clone(),
            release: release.clone(),
        }),
        sibling.clone(),
    ]));

    let plan = ActionPlan::new(
        "fan out",
        vec![ActionStep::new("GATE"), ActionStep::new("SIBLING")],
        ExecutionModel::Parallel,
    );
    let plan_id = plan.id;

    let runner = {
        let service = Arc::clone(&service);
        tokio::spawn(async move {
            service
                .execute_plan(&plan, &Message::from_text("go"), None)
                .await
        })
    };

    entered.notified().await;
    assert!(service.cancel_plan(plan_id).await);
    release.notify_one();

    let result = runner.await.unwrap().unwrap();
    assert_eq!(result.status, PlanStatus::Cancelled);
    assert!(!result.success);
    assert_eq!(result.completed_steps, 2);
    assert_eq!(result.results[0].text, "released");
    assert_eq!(sibling.calls(), 1);
}

#[tokio::test]
async fn test_finished_plan_is_not_rerun() {
    let counter = Counter::ok("ONCE");
    let service = service_with(vec![counter.clone()]);
    let message = Message::from_text("go");
    let plan = service
        .create_simple_plan(&message, Some(&json!({"actions": ["ONCE"]})))
        .await
        .unwrap();

    let first = service.execute_plan(&plan, &message, None).await.unwrap();
    assert_eq!(first.status, PlanStatus::Completed);

    let second = service.execute_plan(&plan, &message, None).await;
    assert!(matches!(second, Err(PlanningError::ExecutionFailed(_))));
    assert_eq!(counter.calls(), 1);
    assert_eq!(
        service.get_active_plan(plan.id).await.unwrap().state.status,
        PlanStatus::Completed
    );
}

#[tokio::test]
async fn test_same_plan_cannot_run_twice_concurrently() {
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let service = Arc::new(service_with(vec![Arc::new(Gate {
        entered: entered.clone(),
        release: release.clone(),
    })]));
    let plan = ActionPlan::new(
        "once",
        vec![ActionStep::new("GATE")],
        ExecutionModel::Sequential,
    );

    let runner = {
        let service = Arc::clone(&service);
        let plan = plan.clone();
        tokio::spawn(async move {
            service
                .execute_plan(&plan, &Message::from_text("go"), None)
                .await
        })
    };
    entered.notified().await;

    let second = service
        .execute_plan(&plan, &Message::from_text("again"), None)
        .await;
    assert!(matches!(second, Err(PlanningError::ExecutionFailed(_))));

    release.notify_one();
    assert!(runner.await.unwrap().unwrap().success);
}

#[tokio::test]
async fn test_callback_receives_final_output() {
    let service = PlanningService::new(PlanningConfig::default());
    let seen = Arc::new(AtomicU32::new(0));
    let callback: HandlerCallback = {
        let seen = Arc::clone(&seen);
        Arc::new(move |_result: &ActionResult| {
            seen.fetch_add(1, Ordering::SeqCst);
        })
    };

    let plan = service
        .create_simple_plan(
            &Message::from_text("good news everyone"),
            Some(&json!({"actions": ["ANALYZE_INPUT", "PROCESS_ANALYSIS", "EXECUTE_FINAL"]})),
        )
        .await
        .unwrap();
    let result = service
        .execute_plan(&plan, &Message::from_text("good news everyone"), Some(callback))
        .await
        .unwrap();

    assert!(result.success, "{:?}", result.errors);
    assert_eq!(result.completed_steps, 3);
    assert_eq!(seen.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_adapted_plan_records_history_in_result() {
    let service = PlanningService::new(PlanningConfig::default());
    let plan = service
        .create_simple_plan(
            &Message::from_text("hello"),
            Some(&json!({"actions": ["ANALYZE_INPUT", "TELEPORT"]})),
        )
        .await
        .unwrap();

    let adapted = service
        .adapt_plan(&plan, 1, &[], Some("Action 'TELEPORT' not found"))
        .await
        .unwrap();
    assert_eq!(adapted.steps[0].id, plan.steps[0].id);
    assert_eq!(adapted.adaptations().len(), 1);

    let result = service
        .execute_plan(&adapted, &Message::from_text("hello"), None)
        .await
        .unwrap();
    assert!(result.success, "{:?}", result.errors);
    assert_eq!(result.adaptations.unwrap().len(), 1);
}

#[tokio::test]
async fn test_stop_cancels_live_executions() {
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let service = Arc::new(service_with(vec![
        Arc::new(Gate {
            entered: entered.clone(),
            release: release.clone(),
        }),
        Counter::ok("AFTER"),
    ]));
    let plan = ActionPlan::new(
        "shutdown",
        vec![ActionStep::new("GATE"), ActionStep::new("AFTER")],
        ExecutionModel::Sequential,
    );
    let plan_id = plan.id;

    let runner = {
        let service = Arc::clone(&service);
        tokio::spawn(async move {
            service
                .execute_plan(&plan, &Message::from_text("go"), None)
                .await
        })
    };
    entered.notified().await;

    service.stop().await;
    assert!(service.get_plan_status(plan_id).await.is_none());
    release.notify_one();

    let result = tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(result.status, PlanStatus::Cancelled);
}
