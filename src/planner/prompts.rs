use serde_json::Value;
use std::collections::HashMap;

use crate::config::PlanningConfig;
use crate::types::{ActionPlan, ActionResult, Message, PlanningContext};

const PLAN_FORMAT: &str = r#"<plan>
<goal>{{goal}}</goal>
<execution_model>{{execution_model}}</execution_model>
<steps>
<step>
<id>step_1</id>
<action>ACTION_NAME</action>
<parameters>{"key": "value"}</parameters>
<dependencies>[]</dependencies>
<description>What this step accomplishes</description>
</step>
</steps>
<estimated_duration>Total estimated time in milliseconds</estimated_duration>
</plan>"#;

pub(crate) fn build_planning_prompt(
    context: &PlanningContext,
    message: Option<&Message>,
    state: Option<&HashMap<String, Value>>,
    config: &PlanningConfig,
) -> String {
    let available_actions = context.available_actions.join(", ");
    let available_providers = context.available_providers.join(", ");
    let constraints: Vec<String> = context
        .constraints
        .iter()
        .map(|c| {
            format!(
                "{}: {}",
                c.constraint_type,
                c.description.clone().unwrap_or_else(|| c.value.to_string())
            )
        })
        .collect();

    let execution_model = context.preferred_execution_model(config.execution_model);
    let max_steps = context
        .preferences
        .as_ref()
        .and_then(|p| p.max_steps)
        .unwrap_or(config.max_steps);

    let message_text = message
        .map(|m| format!("CONTEXT MESSAGE: {}", m.content.text))
        .unwrap_or_default();

    let state_text = state
        .filter(|s| !s.is_empty())
        .map(|s| {
            let mut keys: Vec<&String> = s.keys().collect();
            keys.sort();
            let lines: Vec<String> = keys.iter().map(|k| format!("{}: {}", k, s[*k])).collect();
            format!("CURRENT STATE:\n{}", lines.join("\n"))
        })
        .unwrap_or_default();

    let format = PLAN_FORMAT
        .replace("{{goal}}", &context.goal)
        .replace("{{execution_model}}", &execution_model.to_string());

    format!(
        r#"You are an expert AI planning system. Create a comprehensive action plan to achieve the following goal.

GOAL: {}

AVAILABLE ACTIONS: {}
AVAILABLE PROVIDERS: {}
CONSTRAINTS: {}

EXECUTION MODEL: {}
MAX STEPS: {}

{}
{}

Create a detailed plan with the following structure:
{}

Focus on:
1. Breaking down the goal into logical, executable steps
2. Ensuring each step uses available actions
3. Managing dependencies between steps
4. Providing realistic time estimates
5. Including error handling considerations"#,
        context.goal,
        available_actions,
        available_providers,
        constraints.join(", "),
        execution_model,
        max_steps,
        message_text,
        state_text,
        format
    )
}

pub(crate) fn build_adaptation_prompt(
    plan: &ActionPlan,
    current_step_index: usize,
    results: &[ActionResult],
    error: Option<&str>,
    available_actions: &[String],
) -> String {
    let serialized_plan =
        serde_json::to_string_pretty(plan).unwrap_or_else(|_| format!("{:?}", plan.steps));
    let completed: Vec<String> = results
        .iter()
        .map(|r| {
            format!(
                "- {}: {}",
                r.action_name().unwrap_or("UNKNOWN"),
                if r.text.is_empty() { "(no output)" } else { r.text.as_str() }
            )
        })
        .collect();

    let format = PLAN_FORMAT
        .replace("{{goal}}", &plan.goal)
        .replace("{{execution_model}}", &plan.execution_model.to_string());

    format!(
        r#"You are an expert AI planning system. A plan needs to be adapted.

ORIGINAL PLAN:
{}

FAILURE POINT: step {} of {}
COMPLETED RESULTS:
{}

ERROR: {}

AVAILABLE ACTIONS: {}

Steps before the failure point are already done and will be kept. Produce only the
steps that should replace the remaining part of the plan, using this structure:
{}"#,
        serialized_plan,
        current_step_index,
        plan.steps.len(),
        if completed.is_empty() {
            "(none)".to_string()
        } else {
            completed.join("\n")
        },
        error.unwrap_or("none reported"),
        available_actions.join(", "),
        format
    )
}
