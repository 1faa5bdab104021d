//! Table of plan executions that are currently in flight.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::error::{PlanningError, Result};
use crate::memory::WorkingMemory;
use crate::types::{ActionResult, PlanState, PlanStatus};

/// Live state of one running plan.
#[derive(Debug)]
pub struct PlanExecution {
    /// Distinguishes successive runs of the same plan id
    pub run_id: Uuid,
    pub state: PlanState,
    pub working_memory: WorkingMemory,
    pub results: Vec<ActionResult>,
    pub cancellation: CancellationToken,
}

/// Handles the executor keeps for the duration of a run.
#[derive(Debug, Clone)]
pub struct ExecutionHandle {
    pub plan_id: Uuid,
    pub run_id: Uuid,
    pub working_memory: WorkingMemory,
    pub cancellation: CancellationToken,
}

/// Shared, cloneable registry keyed by plan id. The executor owns result,
/// memory and progress writes; `cancel` only flips the token and the
/// terminal status fields.
#[derive(Debug, Clone, Default)]
pub struct ExecutionRegistry {
    executions: Arc<RwLock<HashMap<Uuid, PlanExecution>>>,
}

impl ExecutionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a `running` entry. A plan id can only run once at a time.
    pub async fn register(&self, plan_id: Uuid) -> Result<ExecutionHandle> {
        let mut executions = self.executions.write().await;
        if executions.contains_key(&plan_id) {
            return Err(PlanningError::ExecutionFailed(format!(
                "Plan {} is already executing",
                plan_id
            )));
        }

        let handle = ExecutionHandle {
            plan_id,
            run_id: Uuid::new_v4(),
            working_memory: WorkingMemory::new(),
            cancellation: CancellationToken::new(),
        };
        executions.insert(
            plan_id,
            PlanExecution {
                run_id: handle.run_id,
                state: PlanState::running(),
                working_memory: handle.working_memory.clone(),
                results: Vec::new(),
                cancellation: handle.cancellation.clone(),
            },
        );
        debug!("[PlanningService] Registered execution for plan {}", plan_id);
        Ok(handle)
    }

    pub async fn status(&self, plan_id: Uuid) -> Option<PlanState> {
        self.executions
            .read()
            .await
            .get(&plan_id)
            .map(|e| e.state.clone())
    }

    pub async fn is_active(&self, plan_id: Uuid) -> bool {
        self.executions.read().await.contains_key(&plan_id)
    }

    /// Results recorded so far for a running plan.
    pub async fn results(&self, plan_id: Uuid) -> Option<Vec<ActionResult>> {
        self.executions
            .read()
            .await
            .get(&plan_id)
            .map(|e| e.results.clone())
    }

    /// Signal cancellation and mark the plan `cancelled`. False when the plan
    /// is not running.
    pub async fn cancel(&self, plan_id: Uuid) -> bool {
        let mut executions = self.executions.write().await;
        match executions.get_mut(&plan_id) {
            Some(execution) => {
                execution.cancellation.cancel();
                execution.state.finish(PlanStatus::Cancelled, None);
                true
            }
            None => false,
        }
    }

    pub async fn record_result(&self, plan_id: Uuid, result: ActionResult) {
        if let Some(execution) = self.executions.write().await.get_mut(&plan_id) {
            execution.results.push(result);
        }
    }

    pub async fn set_current_step(&self, plan_id: Uuid, index: usize) {
        if let Some(execution) = self.executions.write().await.get_mut(&plan_id) {
            execution.state.current_step_index = index;
        }
    }

    /// Move the entry to a terminal status unless cancellation got there first.
    pub async fn finish(
        &self,
        plan_id: Uuid,
        status: PlanStatus,
        error: Option<String>,
    ) -> Option<PlanState> {
        let mut executions = self.executions.write().await;
        executions.get_mut(&plan_id).map(|execution| {
            execution.state.finish(status, error);
            execution.state.clone()
        })
    }

    pub async fn remove(&self, plan_id: Uuid) -> Option<PlanExecution> {
        let removed = self.executions.write().await.remove(&plan_id);
        if removed.is_some() {
            debug!("[PlanningService] Removed execution for plan {}", plan_id);
        }
        removed
    }

    /// Remove the entry only while it still belongs to run `run_id`.
    pub async fn remove_run(&self, plan_id: Uuid, run_id: Uuid) -> Option<PlanExecution> {
        let mut executions = self.executions.write().await;
        if executions.get(&plan_id)?.run_id != run_id {
            debug!(
                "[PlanningService] Plan {} was re-registered, keeping the newer run",
                plan_id
            );
            return None;
        }
        executions.remove(&plan_id)
    }

    /// Cancel every run and drop all entries.
    pub async fn cancel_all(&self) -> usize {
        let mut executions = self.executions.write().await;
        let count = executions.len();
        for execution in executions.values_mut() {
            execution.cancellation.cancel();
            execution.state.finish(PlanStatus::Cancelled, None);
        }
        executions.clear();
        count
    }

    pub async fn len(&self) -> usize {
        self.executions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.executions.read().await.is_empty()
    }
}

/// Removes a registry entry if the run is abandoned before it can clean up
/// after itself, e.g. when the execute future is dropped mid-flight.
pub(crate) struct RegistrationGuard {
    registry: ExecutionRegistry,
    plan_id: Uuid,
    run_id: Uuid,
    armed: bool,
}

impl RegistrationGuard {
    pub(crate) fn new(registry: ExecutionRegistry, handle: &ExecutionHandle) -> Self {
        Self {
            registry,
            plan_id: handle.plan_id,
            run_id: handle.run_id,
            armed: true,
        }
    }

    pub(crate) fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let registry = self.registry.clone();
        let (plan_id, run_id) = (self.plan_id, self.run_id);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                registry.remove_run(plan_id, run_id).await;
            });
        }
    }
}
