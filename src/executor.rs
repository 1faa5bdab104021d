//! Plan execution across the three topologies.

use futures::future::join_all;
use serde_json::json;
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::actions::{ActionContext, ActionRegistry, HandlerCallback};
use crate::error::{PlanningError, Result};
use crate::registry::{ExecutionHandle, ExecutionRegistry, RegistrationGuard};
use crate::retry::{retry_with_backoff, Backoff};
use crate::types::{
    ActionPlan, ActionResult, ActionStep, ExecutionModel, Message, OnError, PlanExecutionResult,
    PlanStatus,
};

/// Results and contained step errors collected during one run.
#[derive(Debug, Default)]
struct RunLog {
    results: Vec<ActionResult>,
    errors: Vec<String>,
}

/// Runs plans against an action registry, tracking each run in an
/// [`ExecutionRegistry`] for status and cancellation.
pub struct PlanExecutor<'a> {
    actions: &'a ActionRegistry,
    executions: &'a ExecutionRegistry,
    timeout: Option<Duration>,
}

impl<'a> PlanExecutor<'a> {
    pub fn new(actions: &'a ActionRegistry, executions: &'a ExecutionRegistry) -> Self {
        Self {
            actions,
            executions,
            timeout: None,
        }
    }

    /// Bound every run by `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Execute `plan` to a terminal status. Step failures, aborts, deadlocks,
    /// timeouts and cancellation all come back as a result; only a plan that
    /// is already executing is rejected. The registry entry is removed on
    /// every path.
    pub async fn execute_plan(
        &self,
        plan: &ActionPlan,
        message: &Message,
        callback: Option<HandlerCallback>,
    ) -> Result<PlanExecutionResult> {
        let started = Instant::now();
        let handle = self.executions.register(plan.id).await?;
        let mut guard = RegistrationGuard::new(self.executions.clone(), &handle);

        info!(
            "[PlanningService] Executing plan {} ({} steps, {})",
            plan.id,
            plan.steps.len(),
            plan.execution_model
        );

        let mut log = RunLog::default();
        let dispatch = self.dispatch(plan, message, callback.as_ref(), &handle, &mut log);
        let outcome = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, dispatch).await {
                Ok(outcome) => outcome,
                Err(_) => Err(PlanningError::Timeout(limit.as_millis() as u64)),
            },
            None => dispatch.await,
        };

        let (status, error) = match outcome {
            Ok(()) if log.errors.is_empty() => (PlanStatus::Completed, None),
            Ok(()) => (PlanStatus::Failed, Some(log.errors.join("; "))),
            Err(e) => {
                let message = e.to_string();
                log.errors.insert(0, message.clone());
                if e.is_cancellation() {
                    (PlanStatus::Cancelled, None)
                } else {
                    error!("[PlanningService] Plan {} failed: {}", plan.id, message);
                    (PlanStatus::Failed, Some(message))
                }
            }
        };

        // A concurrent cancel_plan may already have made the entry terminal.
        let final_status = self
            .executions
            .finish(plan.id, status, error)
            .await
            .map(|state| state.status)
            .unwrap_or(status);
        self.executions.remove(plan.id).await;
        guard.disarm();

        let duration = started.elapsed().as_secs_f64() * 1000.0;
        info!(
            "[PlanningService] Plan {} finished as {} in {:.0}ms",
            plan.id, final_status, duration
        );

        let adaptations = plan.adaptations();
        Ok(PlanExecutionResult {
            plan_id: plan.id,
            success: final_status == PlanStatus::Completed,
            status: final_status,
            completed_steps: log.results.len(),
            total_steps: plan.steps.len(),
            results: log.results,
            errors: if log.errors.is_empty() {
                None
            } else {
                Some(log.errors)
            },
            duration,
            adaptations: if adaptations.is_empty() {
                None
            } else {
                Some(adaptations)
            },
        })
    }

    async fn dispatch(
        &self,
        plan: &ActionPlan,
        message: &Message,
        callback: Option<&HandlerCallback>,
        handle: &ExecutionHandle,
        log: &mut RunLog,
    ) -> Result<()> {
        match plan.execution_model {
            ExecutionModel::Sequential => {
                self.run_sequential(plan, message, callback, handle, log)
                    .await
            }
            ExecutionModel::Parallel => {
                self.run_parallel(plan, message, callback, handle, log)
                    .await
            }
            ExecutionModel::Dag => self.run_dag(plan, message, callback, handle, log).await,
        }
    }

    async fn run_sequential(
        &self,
        plan: &ActionPlan,
        message: &Message,
        callback: Option<&HandlerCallback>,
        handle: &ExecutionHandle,
        log: &mut RunLog,
    ) -> Result<()> {
        for (index, step) in plan.steps.iter().enumerate() {
            if handle.cancellation.is_cancelled() {
                return Err(PlanningError::Cancelled);
            }

            match self
                .execute_step(step, message, log.results.clone(), handle, callback)
                .await
            {
                Ok(result) => {
                    self.executions.record_result(plan.id, result.clone()).await;
                    log.results.push(result);
                    self.executions.set_current_step(plan.id, index + 1).await;
                }
                Err(e) => match step.error_policy() {
                    OnError::Abort => return Err(e),
                    OnError::Continue | OnError::Skip => {
                        warn!(
                            "[PlanningService] Step {} failed, continuing: {}",
                            step.id, e
                        );
                        log.errors.push(e.to_string());
                    }
                },
            }
        }
        Ok(())
    }

    /// Every step starts at once with no previous results; a failure never
    /// stops its siblings.
    async fn run_parallel(
        &self,
        plan: &ActionPlan,
        message: &Message,
        callback: Option<&HandlerCallback>,
        handle: &ExecutionHandle,
        log: &mut RunLog,
    ) -> Result<()> {
        let outcomes = join_all(
            plan.steps
                .iter()
                .map(|step| self.execute_step(step, message, Vec::new(), handle, callback)),
        )
        .await;

        for outcome in outcomes {
            match outcome {
                Ok(result) => {
                    self.executions.record_result(plan.id, result.clone()).await;
                    log.results.push(result);
                }
                Err(e) => log.errors.push(e.to_string()),
            }
        }
        Ok(())
    }

    /// Layer by layer: whatever has all dependencies finished runs next.
    /// A failed step still counts as finished for its dependents.
    async fn run_dag(
        &self,
        plan: &ActionPlan,
        message: &Message,
        callback: Option<&HandlerCallback>,
        handle: &ExecutionHandle,
        log: &mut RunLog,
    ) -> Result<()> {
        let mut completed: HashSet<Uuid> = HashSet::with_capacity(plan.steps.len());
        let mut pending: Vec<&ActionStep> = plan.steps.iter().collect();

        while !pending.is_empty() {
            if handle.cancellation.is_cancelled() {
                return Err(PlanningError::Cancelled);
            }

            let (ready, blocked): (Vec<&ActionStep>, Vec<&ActionStep>) =
                std::mem::take(&mut pending)
                    .into_iter()
                    .partition(|step| step.dependencies.iter().all(|d| completed.contains(d)));
            if ready.is_empty() {
                return Err(PlanningError::CircularDependency);
            }
            pending = blocked;

            debug!(
                "[PlanningService] Plan {}: running layer of {} steps, {} pending",
                plan.id,
                ready.len(),
                pending.len()
            );

            let previous = log.results.clone();
            let outcomes = join_all(ready.iter().map(|step| {
                self.execute_step(step, message, previous.clone(), handle, callback)
            }))
            .await;

            for (step, outcome) in ready.iter().zip(outcomes) {
                completed.insert(step.id);
                match outcome {
                    Ok(result) => {
                        self.executions.record_result(plan.id, result.clone()).await;
                        log.results.push(result);
                    }
                    Err(e) => {
                        warn!("[PlanningService] DAG step {} failed: {}", step.id, e);
                        log.errors.push(e.to_string());
                    }
                }
            }
        }
        Ok(())
    }

    /// Resolve, invoke with retry, normalize and stamp one step's result.
    async fn execute_step(
        &self,
        step: &ActionStep,
        message: &Message,
        previous_results: Vec<ActionResult>,
        handle: &ExecutionHandle,
        callback: Option<&HandlerCallback>,
    ) -> Result<ActionResult> {
        let action = self
            .actions
            .find_by_name(&step.action_name)
            .ok_or_else(|| PlanningError::ActionNotFound(step.action_name.clone()))?;

        let context = ActionContext {
            plan_id: handle.plan_id,
            step_id: step.id,
            message: message.clone(),
            previous_results,
            working_memory: handle.working_memory.clone(),
            cancellation: handle.cancellation.clone(),
        };
        let params = serde_json::to_value(&step.parameters)?;
        let backoff = Backoff::from(&step.effective_retry_policy());
        let operation = format!("Step {} ({})", step.id, step.action_name);

        let action = &action;
        let context = &context;
        let output = retry_with_backoff(
            move |_attempt| {
                let params = params.clone();
                async move { action.handler(context, params, callback).await }
            },
            &backoff,
            &operation,
        )
        .await
        .map_err(|exhausted| PlanningError::MaxRetriesExceeded {
            action: step.action_name.clone(),
            attempts: exhausted.attempts,
            last_error: exhausted.last_error,
        })?;

        let mut result = ActionResult::from_handler_output(output);
        result
            .data
            .insert("stepId".to_string(), json!(step.id.to_string()));
        result
            .data
            .insert("actionName".to_string(), json!(step.action_name));
        result.data.insert(
            "executedAt".to_string(),
            json!(chrono::Utc::now().timestamp_millis()),
        );

        let stored = serde_json::to_value(&result)?;
        handle
            .working_memory
            .set(format!("step:{}", step.id), stored.clone())
            .await;
        handle
            .working_memory
            .set(format!("action:{}", step.action_name), stored)
            .await;

        Ok(result)
    }
}
