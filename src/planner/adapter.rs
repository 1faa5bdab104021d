use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use super::{parse_plan_response, prompts, PlanBuilder, FALLBACK_ACTION};
use crate::types::{ActionPlan, ActionResult, ActionStep, PlanState};

impl<'a> PlanBuilder<'a> {
    /// Re-plan everything from `current_step_index` on. The executed prefix
    /// is kept verbatim; the result is a new plan with a new id.
    pub async fn adapt_plan(
        &self,
        plan: &ActionPlan,
        current_step_index: usize,
        results: &[ActionResult],
        error: Option<&str>,
    ) -> ActionPlan {
        let split = current_step_index.min(plan.steps.len());
        info!(
            "[PlanningService] Adapting plan {} at step {}",
            plan.id, split
        );

        let prompt = prompts::build_adaptation_prompt(
            plan,
            split,
            results,
            error,
            &self.actions.names(),
        );

        let (replacement, note) = match self.invoke_model(prompt).await {
            Ok(response) => match parse_plan_response(&response) {
                Ok(parsed) => {
                    let mut steps = parsed.steps;
                    self.enhance_steps(&mut steps);
                    let note = format!("replaced remaining steps with {} new steps", steps.len());
                    (steps, note)
                }
                Err(e) => {
                    warn!("[PlanningService] Could not parse adaptation response: {}", e);
                    (vec![self.adaptation_reply(error)], format!("fallback reply ({})", e))
                }
            },
            Err(e) => {
                warn!("[PlanningService] Adaptation model call failed: {}", e);
                (vec![self.adaptation_reply(error)], format!("fallback reply ({})", e))
            }
        };

        let mut steps: Vec<ActionStep> = plan.steps[..split].to_vec();
        steps.extend(replacement);

        let mut adapted = plan.clone();
        adapted.id = Uuid::new_v4();
        adapted.steps = steps;
        adapted.state = PlanState::default();
        adapted
            .metadata
            .insert("adaptedFrom".to_string(), json!(plan.id.to_string()));
        adapted.push_adaptation(format!(
            "[{}] step {}: {}{}",
            chrono::Utc::now().to_rfc3339(),
            split,
            note,
            error.map(|e| format!(" after error: {}", e)).unwrap_or_default()
        ));

        adapted
    }

    fn adaptation_reply(&self, error: Option<&str>) -> ActionStep {
        let text = match error {
            Some(e) => format!("I ran into a problem and had to adjust the plan: {}", e),
            None => "I had to adjust the plan and will continue from here.".to_string(),
        };
        ActionStep::new(FALLBACK_ACTION)
            .with_parameter("text", Value::String(text))
            .with_retry_policy(self.default_retry_policy())
    }
}
