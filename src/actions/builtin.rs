use async_trait::async_trait;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use super::{Action, ActionContext, HandlerCallback};
use crate::types::{ActionResult, Message};

/// Parameter `key`, or the data of the latest result from `action`.
fn param_or_previous(
    params: &Value,
    context: &ActionContext,
    key: &str,
    action: &str,
) -> Option<Value> {
    params.get(key).cloned().or_else(|| {
        context
            .get_previous_result(action)
            .map(|r| Value::Object(r.data.clone().into_iter().collect::<Map<_, _>>()))
    })
}

pub struct AnalyzeInputAction;

#[async_trait]
impl Action for AnalyzeInputAction {
    fn name(&self) -> &str {
        "ANALYZE_INPUT"
    }
    fn similes(&self) -> Vec<&str> {
        vec!["ANALYZE", "PARSE_INPUT"]
    }
    fn description(&self) -> &str {
        "Analyzes user input and extracts key information"
    }
    async fn validate(&self, _context: &ActionContext, _message: &Message) -> bool {
        true
    }

    async fn handler(
        &self,
        context: &ActionContext,
        params: Value,
        _callback: Option<&HandlerCallback>,
    ) -> Result<Value, String> {
        let text = params
            .get("text")
            .and_then(|v| v.as_str())
            .unwrap_or(context.message.content.text.as_str());
        let words: Vec<&str> = text.split_whitespace().collect();
        let lower = text.to_lowercase();
        let sentiment = if lower.contains("urgent") || lower.contains("emergency") {
            "urgent"
        } else if lower.contains("good") {
            "positive"
        } else if lower.contains("bad") {
            "negative"
        } else {
            "neutral"
        };

        context
            .working_memory
            .set("analysis.sentiment", json!(sentiment))
            .await;

        Ok(json!({
            "text": format!("Analyzed {} words ({})", words.len(), sentiment),
            "wordCount": words.len(),
            "hasNumbers": text.chars().any(|c| c.is_numeric()),
            "sentiment": sentiment,
            "topics": words
                .iter()
                .filter(|w| w.len() >= 5)
                .map(|w| w.to_lowercase())
                .collect::<Vec<_>>(),
        }))
    }
}

pub struct ProcessAnalysisAction;

#[async_trait]
impl Action for ProcessAnalysisAction {
    fn name(&self) -> &str {
        "PROCESS_ANALYSIS"
    }
    fn similes(&self) -> Vec<&str> {
        vec!["PROCESS", "MAKE_DECISIONS"]
    }
    fn description(&self) -> &str {
        "Processes the analysis results and makes decisions"
    }
    async fn validate(&self, _context: &ActionContext, _message: &Message) -> bool {
        true
    }

    async fn handler(
        &self,
        context: &ActionContext,
        params: Value,
        _callback: Option<&HandlerCallback>,
    ) -> Result<Value, String> {
        let analysis = param_or_previous(&params, context, "analysis", "ANALYZE_INPUT")
            .ok_or_else(|| "Missing 'analysis' parameter".to_string())?;

        let word_count = analysis
            .get("wordCount")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        let sentiment = analysis
            .get("sentiment")
            .and_then(|v| v.as_str())
            .unwrap_or("neutral");

        let suggested_response = match sentiment {
            "positive" => "Thank you for the positive feedback!",
            "negative" => "I understand your concerns and will help address them.",
            _ => "I can help you with that.",
        };

        Ok(json!({
            "text": suggested_response,
            "needsMoreInfo": word_count < 5,
            "isComplex": word_count > 20,
            "requiresAction": sentiment != "neutral" || word_count > 8,
            "suggestedResponse": suggested_response,
        }))
    }
}

pub struct ExecuteFinalAction;

#[async_trait]
impl Action for ExecuteFinalAction {
    fn name(&self) -> &str {
        "EXECUTE_FINAL"
    }
    fn similes(&self) -> Vec<&str> {
        vec!["FINALIZE", "COMPLETE"]
    }
    fn description(&self) -> &str {
        "Executes the final action based on processing results"
    }
    async fn validate(&self, _context: &ActionContext, _message: &Message) -> bool {
        true
    }

    async fn handler(
        &self,
        context: &ActionContext,
        params: Value,
        callback: Option<&HandlerCallback>,
    ) -> Result<Value, String> {
        let decisions = param_or_previous(&params, context, "decisions", "PROCESS_ANALYSIS")
            .ok_or_else(|| "Missing 'decisions' parameter".to_string())?;

        let requires_action = decisions
            .get("requiresAction")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let suggested_response = decisions
            .get("suggestedResponse")
            .and_then(|v| v.as_str())
            .unwrap_or("Done.");

        if let Some(cb) = callback {
            cb(&ActionResult::success_with_text(suggested_response));
        }

        Ok(json!({
            "text": suggested_response,
            "executedAction": if requires_action { "RESPOND" } else { "ACKNOWLEDGE" },
        }))
    }
}

pub struct CreatePlanAction;

impl CreatePlanAction {
    fn is_plan_request(text: &str) -> bool {
        let lower = text.to_lowercase();
        lower.contains("plan")
            || lower.contains("project")
            || lower.contains("comprehensive")
            || lower.contains("organize")
            || lower.contains("strategy")
    }
}

#[async_trait]
impl Action for CreatePlanAction {
    fn name(&self) -> &str {
        "CREATE_PLAN"
    }
    fn similes(&self) -> Vec<&str> {
        vec!["PLAN_PROJECT", "GENERATE_PLAN", "MAKE_PLAN", "PROJECT_PLAN"]
    }
    fn description(&self) -> &str {
        "Creates a comprehensive project plan with multiple phases and tasks"
    }
    async fn validate(&self, _context: &ActionContext, message: &Message) -> bool {
        Self::is_plan_request(&message.content.text)
    }

    async fn handler(
        &self,
        _context: &ActionContext,
        _params: Value,
        _callback: Option<&HandlerCallback>,
    ) -> Result<Value, String> {
        Ok(json!({
            "text": "I've created a comprehensive 3-phase project plan.",
            "planId": Uuid::new_v4().to_string(),
            "name": "Comprehensive Project Plan",
            "phases": [
                {
                    "id": "phase_1",
                    "name": "Setup and Infrastructure",
                    "tasks": ["Repository Setup"]
                },
                {
                    "id": "phase_2",
                    "name": "Research and Knowledge",
                    "tasks": ["Research Best Practices", "Process Knowledge"]
                },
                {
                    "id": "phase_3",
                    "name": "Task Management",
                    "tasks": ["Create Initial Tasks"]
                }
            ],
            "totalPhases": 3,
            "totalTasks": 4,
            "executionStrategy": "sequential",
        }))
    }
}

/// Sends text back to the user. Fallback and rewritten steps target it.
pub struct ReplyAction;

#[async_trait]
impl Action for ReplyAction {
    fn name(&self) -> &str {
        "REPLY"
    }
    fn similes(&self) -> Vec<&str> {
        vec!["RESPOND", "ANSWER"]
    }
    fn description(&self) -> &str {
        "Replies to the user with the given text"
    }
    async fn validate(&self, _context: &ActionContext, _message: &Message) -> bool {
        true
    }

    async fn handler(
        &self,
        context: &ActionContext,
        params: Value,
        callback: Option<&HandlerCallback>,
    ) -> Result<Value, String> {
        let text = ["text", "message"]
            .iter()
            .find_map(|key| params.get(*key).and_then(|v| v.as_str()))
            .unwrap_or(context.message.content.text.as_str())
            .to_string();

        if let Some(cb) = callback {
            cb(&ActionResult::success_with_text(&text));
        }

        Ok(json!({ "text": text }))
    }
}
