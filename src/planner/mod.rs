//! Plan construction: heuristic plans, model-backed plans, and enhancement.

use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::actions::ActionRegistry;
use crate::config::PlanningConfig;
use crate::error::Result;
use crate::runtime::Runtime;
use crate::types::{
    ActionPlan, ActionStep, ExecutionModel, Message, PlanningContext, RetryPolicy,
};

mod adapter;
pub mod parser;
mod prompts;
pub mod validator;

pub use parser::{parse_plan_response, ParseError, ParsedPlan};
pub use validator::PlanValidator;

/// Action every fallback plan runs.
pub const FALLBACK_ACTION: &str = "REPLY";

/// Builds, enhances and adapts plans against one action registry.
pub struct PlanBuilder<'a> {
    config: &'a PlanningConfig,
    actions: &'a ActionRegistry,
    runtime: Option<&'a dyn Runtime>,
}

impl<'a> PlanBuilder<'a> {
    pub fn new(
        config: &'a PlanningConfig,
        actions: &'a ActionRegistry,
        runtime: Option<&'a dyn Runtime>,
    ) -> Self {
        Self {
            config,
            actions,
            runtime,
        }
    }

    /// Heuristic plan for basic message handling: explicit `actions` in the
    /// response content win, otherwise the message text is classified.
    /// Steps form a strict linear chain.
    pub fn create_simple_plan(
        &self,
        message: &Message,
        response_content: Option<&Value>,
    ) -> Option<ActionPlan> {
        let actions: Vec<String> = match response_content
            .and_then(|content| content.get("actions"))
            .and_then(|a| a.as_array())
        {
            Some(list) => list
                .iter()
                .filter_map(|a| a.as_str())
                .map(str::to_string)
                .collect(),
            None => classify_message(&message.content.text),
        };

        if actions.is_empty() {
            return None;
        }

        let mut steps: Vec<ActionStep> = Vec::with_capacity(actions.len());
        for action_name in &actions {
            let dependencies = steps.last().map(|s: &ActionStep| vec![s.id]).unwrap_or_default();
            steps.push(
                ActionStep::new(action_name.clone())
                    .with_parameter("message", Value::String(message.content.text.clone()))
                    .with_dependencies(dependencies),
            );
        }

        let mut plan = ActionPlan::new(
            format!("Execute actions: {}", actions.join(", ")),
            steps,
            ExecutionModel::Sequential,
        );
        plan.thought = format!("Direct handling of message {}", message.id);
        plan.metadata.insert(
            "createdAt".to_string(),
            json!(chrono::Utc::now().timestamp_millis()),
        );
        plan.metadata.insert(
            "estimatedDuration".to_string(),
            json!(plan.steps.len() * 5000),
        );
        plan.metadata.insert("priority".to_string(), json!(1));
        plan.metadata
            .insert("tags".to_string(), json!(["simple", "message-handling"]));

        debug!(
            "[PlanningService] Created simple plan {} with {} steps",
            plan.id,
            plan.steps.len()
        );

        Some(plan)
    }

    /// Model-backed plan. Only an invalid context fails; a missing runtime,
    /// a failed model call or an unparsable response all yield the fallback plan.
    pub async fn create_comprehensive_plan(
        &self,
        context: &PlanningContext,
        message: Option<&Message>,
        state: Option<&HashMap<String, Value>>,
    ) -> Result<ActionPlan> {
        context.validate()?;

        info!(
            "[PlanningService] Creating comprehensive plan for goal: {}",
            context.goal
        );

        let prompt = prompts::build_planning_prompt(context, message, state, self.config);

        let response = match self.invoke_model(prompt).await {
            Ok(response) => response,
            Err(e) => {
                warn!("[PlanningService] Planning model call failed: {}", e);
                let plan = self.fallback_plan(&context.goal, &e.to_string());
                return Ok(with_context_timeout(plan, context));
            }
        };

        let parsed = match parse_plan_response(&response) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("[PlanningService] Could not parse planning response: {}", e);
                let plan = self.fallback_plan(&context.goal, &e.to_string());
                return Ok(with_context_timeout(plan, context));
            }
        };

        let estimated = parsed
            .estimated_duration
            .unwrap_or(parsed.steps.len() as u64 * 5000);
        let mut plan = ActionPlan::new(
            parsed.goal.unwrap_or_else(|| context.goal.clone()),
            parsed.steps,
            parsed
                .execution_model
                .unwrap_or_else(|| context.preferred_execution_model(self.config.execution_model)),
        );
        plan.thought = parsed
            .thought
            .unwrap_or_else(|| format!("Comprehensive plan for: {}", context.goal));
        plan.metadata.insert(
            "createdAt".to_string(),
            json!(chrono::Utc::now().timestamp_millis()),
        );
        plan.metadata
            .insert("estimatedDuration".to_string(), json!(estimated));
        plan.metadata.insert("priority".to_string(), json!(1));
        plan.metadata
            .insert("tags".to_string(), json!(["comprehensive"]));
        if !context.constraints.is_empty() {
            plan.metadata.insert(
                "constraints".to_string(),
                serde_json::to_value(&context.constraints)?,
            );
        }

        Ok(with_context_timeout(self.enhance_plan(plan), context))
    }

    /// One `REPLY` step, sequential. Used whenever model output is unusable.
    pub fn fallback_plan(&self, goal: &str, reason: &str) -> ActionPlan {
        let step = ActionStep::new(FALLBACK_ACTION)
            .with_parameter(
                "text",
                Value::String(format!("I'll help you with: {}", goal)),
            )
            .with_retry_policy(self.config.retry_policy.clone());

        let mut plan = ActionPlan::new(goal, vec![step], ExecutionModel::Sequential);
        plan.thought = "Fallback plan after planning failure".to_string();
        plan.metadata.insert(
            "createdAt".to_string(),
            json!(chrono::Utc::now().timestamp_millis()),
        );
        plan.metadata
            .insert("estimatedDuration".to_string(), json!(5000));
        plan.metadata.insert("priority".to_string(), json!(1));
        plan.metadata.insert("tags".to_string(), json!(["fallback"]));
        plan.metadata
            .insert("fallbackReason".to_string(), json!(reason));
        plan
    }

    /// Rewrite unknown actions to `REPLY` and give every step a retry policy.
    pub fn enhance_plan(&self, mut plan: ActionPlan) -> ActionPlan {
        self.enhance_steps(&mut plan.steps);
        plan
    }

    fn enhance_steps(&self, steps: &mut [ActionStep]) {
        for step in steps.iter_mut() {
            if !self.actions.contains(&step.action_name) {
                warn!(
                    "[PlanningService] Action '{}' not found, replacing with {}",
                    step.action_name, FALLBACK_ACTION
                );
                let missing = std::mem::replace(&mut step.action_name, FALLBACK_ACTION.to_string());
                step.parameters.insert(
                    "text".to_string(),
                    Value::String(format!("Unable to find action: {}", missing)),
                );
            }
            if step.retry_policy.is_none() {
                step.retry_policy = Some(self.default_retry_policy());
            }
        }
    }

    fn default_retry_policy(&self) -> RetryPolicy {
        self.config.retry_policy.clone()
    }

    async fn invoke_model(&self, prompt: String) -> Result<String> {
        let runtime = self.runtime.ok_or_else(|| {
            crate::error::PlanningError::Model("no runtime available for planning".to_string())
        })?;
        runtime
            .use_model(
                &self.config.planning_model_type,
                json!({
                    "prompt": prompt,
                    "temperature": self.config.planning_temperature,
                    "maxTokens": self.config.planning_max_tokens,
                }),
            )
            .await
    }
}

fn classify_message(text: &str) -> Vec<String> {
    let text = text.to_lowercase();
    let actions: &[&str] = if text.contains("email") {
        &["SEND_EMAIL"]
    } else if text.contains("research") && (text.contains("send") || text.contains("summary")) {
        &["SEARCH", "REPLY"]
    } else if text.contains("search") || text.contains("find") || text.contains("research") {
        &["SEARCH"]
    } else if text.contains("analyze") {
        &["THINK", "REPLY"]
    } else {
        &["REPLY"]
    };
    actions.iter().map(|a| a.to_string()).collect()
}

/// Carry the context's preferred run timeout on the plan for the executor.
fn with_context_timeout(mut plan: ActionPlan, context: &PlanningContext) -> ActionPlan {
    if let Some(timeout_ms) = context.preferred_timeout_ms() {
        plan.metadata
            .insert("timeoutMs".to_string(), json!(timeout_ms));
    }
    plan
}
