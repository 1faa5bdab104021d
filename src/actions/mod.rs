//! Named capabilities the planner can schedule.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::memory::WorkingMemory;
use crate::types::{ActionResult, Message};

mod builtin;

pub use builtin::{
    AnalyzeInputAction, CreatePlanAction, ExecuteFinalAction, ProcessAnalysisAction, ReplyAction,
};

/// Receives intermediate output an action wants surfaced to the user.
pub type HandlerCallback = Arc<dyn Fn(&ActionResult) + Send + Sync>;

#[async_trait]
pub trait Action: Send + Sync {
    fn name(&self) -> &str;
    fn similes(&self) -> Vec<&str> {
        Vec::new()
    }
    fn description(&self) -> &str;
    /// Whether the action applies to `message`. Checked upstream of the
    /// planner, never by the executor.
    async fn validate(&self, context: &ActionContext, message: &Message) -> bool;
    async fn handler(
        &self,
        context: &ActionContext,
        params: Value,
        callback: Option<&HandlerCallback>,
    ) -> Result<Value, String>;
}

/// What a handler sees of the running plan.
#[derive(Debug, Clone)]
pub struct ActionContext {
    pub plan_id: Uuid,
    pub step_id: Uuid,
    pub message: Message,
    pub previous_results: Vec<ActionResult>,
    pub working_memory: WorkingMemory,
    pub cancellation: CancellationToken,
}

impl ActionContext {
    /// Latest earlier result produced by the action `name` (case-insensitive)
    /// or by the step whose id is `name`.
    pub fn get_previous_result(&self, name: &str) -> Option<&ActionResult> {
        self.previous_results.iter().rev().find(|r| {
            r.action_name()
                .is_some_and(|a| a.eq_ignore_ascii_case(name))
                || r.step_id() == Some(name)
        })
    }
}

/// Name-keyed table of registered actions.
#[derive(Default, Clone)]
pub struct ActionRegistry {
    actions: HashMap<String, Arc<dyn Action>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in planning actions.
    pub fn with_planning_actions() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(AnalyzeInputAction));
        registry.register(Arc::new(ProcessAnalysisAction));
        registry.register(Arc::new(ExecuteFinalAction));
        registry.register(Arc::new(CreatePlanAction));
        registry.register(Arc::new(ReplyAction));
        registry
    }

    /// Register an action, returning the one it replaced.
    pub fn register(&mut self, action: Arc<dyn Action>) -> Option<Arc<dyn Action>> {
        self.actions.insert(action.name().to_string(), action)
    }

    /// Exact name first, then a case-insensitive match on names and similes.
    pub fn find_by_name(&self, name: &str) -> Option<Arc<dyn Action>> {
        if let Some(action) = self.actions.get(name) {
            return Some(Arc::clone(action));
        }
        self.actions
            .values()
            .find(|a| {
                a.name().eq_ignore_ascii_case(name)
                    || a.similes().iter().any(|s| s.eq_ignore_ascii_case(name))
            })
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.find_by_name(name).is_some()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.actions.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("actions", &self.names())
            .finish()
    }
}
