#![allow(missing_docs)]

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::actions::{ActionRegistry, HandlerCallback};
use crate::config::PlanningConfig;
use crate::error::{PlanningError, Result};
use crate::executor::PlanExecutor;
use crate::planner::{PlanBuilder, PlanValidator};
use crate::registry::ExecutionRegistry;
use crate::runtime::Runtime;
use crate::types::{
    ActionPlan, ActionResult, ExecutionModel, Message, PlanExecutionResult, PlanState,
    PlanningContext, ValidationReport,
};

/// Planning Service.
///
/// Owns the action registry, the execution registry and the table of active
/// plans, and exposes every planning operation over them.
pub struct PlanningService {
    config: RwLock<PlanningConfig>,
    runtime: Option<Arc<dyn Runtime>>,
    actions: Arc<ActionRegistry>,
    executions: ExecutionRegistry,
    active_plans: RwLock<HashMap<Uuid, ActionPlan>>,
}

impl PlanningService {
    pub const SERVICE_TYPE: &'static str = "planning";
    pub const CAPABILITY_DESCRIPTION: &'static str = "Planning and action coordination";

    pub fn new(config: PlanningConfig) -> Self {
        Self {
            config: RwLock::new(config),
            runtime: None,
            actions: Arc::new(ActionRegistry::with_planning_actions()),
            executions: ExecutionRegistry::new(),
            active_plans: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_runtime(config: PlanningConfig, runtime: Arc<dyn Runtime>) -> Self {
        Self {
            runtime: Some(runtime),
            ..Self::new(config)
        }
    }

    /// Replace the action registry the service plans and executes against.
    pub fn with_actions(mut self, actions: ActionRegistry) -> Self {
        self.actions = Arc::new(actions);
        self
    }

    pub fn actions(&self) -> &ActionRegistry {
        &self.actions
    }

    pub async fn config(&self) -> PlanningConfig {
        self.config.read().await.clone()
    }

    pub async fn update_config(&self, config: PlanningConfig) {
        *self.config.write().await = config;
    }

    /// Start the service.
    pub async fn start(&self) {
        info!(
            "[PlanningService] Started with {} actions",
            self.actions.len()
        );
    }

    /// Stop the service: cancel every live execution and forget active plans.
    pub async fn stop(&self) {
        let cancelled = self.executions.cancel_all().await;
        self.active_plans.write().await.clear();
        info!(
            "[PlanningService] Stopped, cancelled {} running plans",
            cancelled
        );
    }

    /// Create a simple plan for basic message handling.
    pub async fn create_simple_plan(
        &self,
        message: &Message,
        response_content: Option<&Value>,
    ) -> Option<ActionPlan> {
        let config = self.config.read().await;
        let plan = PlanBuilder::new(&config, &self.actions, self.runtime.as_deref())
            .create_simple_plan(message, response_content)?;
        drop(config);

        self.active_plans
            .write()
            .await
            .insert(plan.id, plan.clone());
        Some(plan)
    }

    pub async fn create_comprehensive_plan(
        &self,
        context: &PlanningContext,
        message: Option<&Message>,
        state: Option<&HashMap<String, Value>>,
    ) -> Result<ActionPlan> {
        let config = self.config.read().await.clone();
        let plan = PlanBuilder::new(&config, &self.actions, self.runtime.as_deref())
            .create_comprehensive_plan(context, message, state)
            .await?;

        self.active_plans
            .write()
            .await
            .insert(plan.id, plan.clone());
        Ok(plan)
    }

    pub async fn validate_plan(&self, plan: &ActionPlan) -> ValidationReport {
        let max_steps = self.config.read().await.max_steps;
        PlanValidator::new(&self.actions, max_steps).validate(plan)
    }

    /// Execute a plan, bounded by its own `timeoutMs` or else the configured
    /// default. The stored copy of the plan, if any, is updated with the
    /// terminal state. A plan that already reached a terminal state is
    /// rejected; adapt it to run again.
    pub async fn execute_plan(
        &self,
        plan: &ActionPlan,
        message: &Message,
        callback: Option<HandlerCallback>,
    ) -> Result<PlanExecutionResult> {
        let stored_status = self
            .active_plans
            .read()
            .await
            .get(&plan.id)
            .map(|stored| stored.state.status);
        if let Some(status) = stored_status
            .filter(|s| s.is_terminal())
            .or_else(|| plan.state.status.is_terminal().then_some(plan.state.status))
        {
            return Err(PlanningError::ExecutionFailed(format!(
                "Plan {} already finished as {}",
                plan.id, status
            )));
        }

        let timeout_ms = match plan.timeout_ms() {
            Some(ms) => ms,
            None => self.config.read().await.default_timeout_ms,
        };
        let timeout = (timeout_ms > 0).then(|| Duration::from_millis(timeout_ms as u64));

        self.set_active_state(plan.id, PlanState::running()).await;

        let result = PlanExecutor::new(&self.actions, &self.executions)
            .with_timeout(timeout)
            .execute_plan(plan, message, callback)
            .await?;

        if let Some(stored) = self.active_plans.write().await.get_mut(&plan.id) {
            if plan.execution_model == ExecutionModel::Sequential {
                stored.state.current_step_index = result.completed_steps;
            }
            stored.state.finish(
                result.status,
                result.errors.as_ref().and_then(|e| e.first().cloned()),
            );
        }

        info!(
            "[PlanningService] Plan {} execution completed. Success: {}, Duration: {:.0}ms",
            plan.id, result.success, result.duration
        );
        Ok(result)
    }

    /// Re-plan the unexecuted suffix of `plan`. The adapted plan supersedes
    /// the original in the active-plans table.
    pub async fn adapt_plan(
        &self,
        plan: &ActionPlan,
        current_step_index: usize,
        results: &[ActionResult],
        error: Option<&str>,
    ) -> Result<ActionPlan> {
        let config = self.config.read().await.clone();
        if !config.enable_adaptation {
            return Err(PlanningError::General(
                "Plan adaptation is disabled".to_string(),
            ));
        }

        let adapted = PlanBuilder::new(&config, &self.actions, self.runtime.as_deref())
            .adapt_plan(plan, current_step_index, results, error)
            .await;

        let mut plans = self.active_plans.write().await;
        plans.remove(&plan.id);
        plans.insert(adapted.id, adapted.clone());
        debug!(
            "[PlanningService] Plan {} superseded by {}",
            plan.id, adapted.id
        );
        Ok(adapted)
    }

    /// Status of a running plan; `None` once it has finished.
    pub async fn get_plan_status(&self, plan_id: Uuid) -> Option<PlanState> {
        self.executions.status(plan_id).await
    }

    pub async fn cancel_plan(&self, plan_id: Uuid) -> bool {
        let cancelled = self.executions.cancel(plan_id).await;
        if cancelled {
            info!("[PlanningService] Cancelled plan {}", plan_id);
        }
        cancelled
    }

    pub async fn get_active_plan(&self, plan_id: Uuid) -> Option<ActionPlan> {
        self.active_plans.read().await.get(&plan_id).cloned()
    }

    pub async fn active_plan_count(&self) -> usize {
        self.active_plans.read().await.len()
    }

    async fn set_active_state(&self, plan_id: Uuid, state: PlanState) {
        if let Some(stored) = self.active_plans.write().await.get_mut(&plan_id) {
            stored.state = state;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ActionStep, PlanStatus};
    use serde_json::json;

    #[tokio::test]
    async fn test_simple_plan_is_tracked_and_executed() {
        let service = PlanningService::new(PlanningConfig::default());
        let message = Message::from_text("please help");
        let content = serde_json::json!({"actions": ["ANALYZE_INPUT", "PROCESS_ANALYSIS"]});

        let plan = service
            .create_simple_plan(&message, Some(&content))
            .await
            .unwrap();
        assert!(service.get_active_plan(plan.id).await.is_some());

        let result = service.execute_plan(&plan, &message, None).await.unwrap();
        assert!(result.success, "{:?}", result.errors);
        assert_eq!(result.completed_steps, 2);
        assert!(service.get_plan_status(plan.id).await.is_none());

        let stored = service.get_active_plan(plan.id).await.unwrap();
        assert_eq!(stored.state.status, PlanStatus::Completed);
        assert_eq!(stored.state.current_step_index, 2);
        assert!(stored.state.end_time.is_some());
    }

    #[tokio::test]
    async fn test_finished_plan_cannot_run_again() {
        let service = PlanningService::new(PlanningConfig::default());
        let message = Message::from_text("hello");
        let plan = service.create_simple_plan(&message, None).await.unwrap();

        let first = service.execute_plan(&plan, &message, None).await.unwrap();
        assert!(first.success, "{:?}", first.errors);
        let finished = service.get_active_plan(plan.id).await.unwrap();

        let err = service
            .execute_plan(&plan, &message, None)
            .await
            .unwrap_err();
        assert!(matches!(err, PlanningError::ExecutionFailed(_)));
        let stored = service.get_active_plan(plan.id).await.unwrap();
        assert_eq!(stored.state.status, PlanStatus::Completed);
        assert_eq!(stored.state.start_time, finished.state.start_time);

        let mut untracked = ActionPlan::new(
            "x",
            vec![ActionStep::new("REPLY")],
            ExecutionModel::Sequential,
        );
        untracked.state.finish(PlanStatus::Failed, Some("earlier".into()));
        assert!(service.execute_plan(&untracked, &message, None).await.is_err());
    }

    #[tokio::test]
    async fn test_default_plans_run_on_builtin_reply() {
        let service = PlanningService::new(PlanningConfig::default());
        let message = Message::from_text("hello");

        let plan = service.create_simple_plan(&message, None).await.unwrap();
        assert_eq!(plan.steps[0].action_name, "REPLY");
        assert!(service.validate_plan(&plan).await.valid);
        let result = service.execute_plan(&plan, &message, None).await.unwrap();
        assert!(result.success, "{:?}", result.errors);
        assert_eq!(result.results[0].text, "hello");

        let fallback = service
            .create_comprehensive_plan(&PlanningContext::new("Say hi"), Some(&message), None)
            .await
            .unwrap();
        let report = service.validate_plan(&fallback).await;
        assert!(report.valid, "{:?}", report.errors);
        let result = service
            .execute_plan(&fallback, &message, None)
            .await
            .unwrap();
        assert!(result.success, "{:?}", result.errors);
        assert_eq!(result.results[0].text, "I'll help you with: Say hi");
    }

    #[tokio::test]
    async fn test_parallel_run_leaves_step_index_alone() {
        let service = PlanningService::new(PlanningConfig::default());
        let message = Message::from_text("hi");
        let content = json!({"actions": ["REPLY", "ANALYZE_INPUT"]});
        let mut plan = service
            .create_simple_plan(&message, Some(&content))
            .await
            .unwrap();
        plan.execution_model = ExecutionModel::Parallel;
        for step in &mut plan.steps {
            step.dependencies.clear();
        }
        service.active_plans.write().await.insert(plan.id, plan.clone());

        let result = service.execute_plan(&plan, &message, None).await.unwrap();
        assert!(result.success, "{:?}", result.errors);
        assert_eq!(result.completed_steps, 2);

        let stored = service.get_active_plan(plan.id).await.unwrap();
        assert_eq!(stored.state.status, PlanStatus::Completed);
        assert_eq!(stored.state.current_step_index, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_plan_timeout_overrides_default() {
        let mut actions = ActionRegistry::with_planning_actions();
        actions.register(Arc::new(Sleeper));
        let service = PlanningService::new(PlanningConfig {
            default_timeout_ms: 0,
            ..PlanningConfig::default()
        })
        .with_actions(actions);

        let mut plan = ActionPlan::new(
            "slow",
            vec![ActionStep::new("SLOW")],
            ExecutionModel::Sequential,
        );
        plan.metadata.insert("timeoutMs".to_string(), json!(50));

        let result = service
            .execute_plan(&plan, &Message::from_text("hi"), None)
            .await
            .unwrap();
        assert_eq!(result.status, PlanStatus::Failed);
        assert!(result.errors.unwrap()[0].contains("50ms"));
    }

    /// Sleeps for a minute before replying.
    struct Sleeper;

    #[async_trait::async_trait]
    impl crate::actions::Action for Sleeper {
        fn name(&self) -> &str {
            "SLOW"
        }
        fn description(&self) -> &str {
            "sleeps"
        }
        async fn validate(
            &self,
            _context: &crate::actions::ActionContext,
            _message: &Message,
        ) -> bool {
            true
        }
        async fn handler(
            &self,
            _context: &crate::actions::ActionContext,
            _params: Value,
            _callback: Option<&HandlerCallback>,
        ) -> std::result::Result<Value, String> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(json!("late"))
        }
    }

    #[tokio::test]
    async fn test_adaptation_can_be_disabled() {
        let config = PlanningConfig {
            enable_adaptation: false,
            ..PlanningConfig::default()
        };
        let service = PlanningService::new(config);
        let plan = ActionPlan::new("x", vec![], ExecutionModel::Sequential);

        assert!(service.adapt_plan(&plan, 0, &[], None).await.is_err());
    }

    #[tokio::test]
    async fn test_adaptation_supersedes_original() {
        let service = PlanningService::new(PlanningConfig::default());
        let plan = service
            .create_simple_plan(&Message::from_text("hello"), None)
            .await
            .unwrap();

        let adapted = service
            .adapt_plan(&plan, 0, &[], Some("no runtime"))
            .await
            .unwrap();
        assert!(service.get_active_plan(plan.id).await.is_none());
        assert!(service.get_active_plan(adapted.id).await.is_some());
        assert_eq!(adapted.steps[0].action_name, "REPLY");
    }

    #[tokio::test]
    async fn test_stop_clears_active_plans() {
        let service = PlanningService::new(PlanningConfig::default());
        service.start().await;
        service
            .create_simple_plan(&Message::from_text("hello"), None)
            .await
            .unwrap();
        assert_eq!(service.active_plan_count().await, 1);

        service.stop().await;
        assert_eq!(service.active_plan_count().await, 0);
    }
}
