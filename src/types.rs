//! Type definitions for the planning engine.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::{PlanningError, Result};

/// Execution model for plans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionModel {
    /// Execute steps one after another
    #[default]
    Sequential,
    /// Execute all steps simultaneously
    Parallel,
    /// Execute as a directed acyclic graph
    Dag,
}

impl ExecutionModel {
    /// Lenient parse used for model output and environment values.
    /// Anything unrecognised reads as sequential.
    pub fn from_tag(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "parallel" => Self::Parallel,
            "dag" => Self::Dag,
            _ => Self::Sequential,
        }
    }
}

impl std::fmt::Display for ExecutionModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sequential => write!(f, "sequential"),
            Self::Parallel => write!(f, "parallel"),
            Self::Dag => write!(f, "dag"),
        }
    }
}

/// What the sequential executor does once a step has failed for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OnError {
    /// Stop the whole plan
    #[default]
    Abort,
    /// Record the error and move on
    Continue,
    /// Record the error and move on
    Skip,
}

impl std::fmt::Display for OnError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Abort => write!(f, "abort"),
            Self::Continue => write!(f, "continue"),
            Self::Skip => write!(f, "skip"),
        }
    }
}

/// Retry policy for action steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt
    pub max_retries: u32,
    /// Initial backoff in milliseconds
    pub backoff_ms: u64,
    /// Backoff multiplier
    pub backoff_multiplier: f64,
    /// Action on error
    #[serde(default)]
    pub on_error: OnError,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff_ms: 1000,
            backoff_multiplier: 2.0,
            on_error: OnError::Abort,
        }
    }
}

/// Action step in a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionStep {
    /// Unique step identifier
    pub id: Uuid,
    /// Name of the action to execute
    pub action_name: String,
    /// Parameters for the action
    #[serde(default)]
    pub parameters: HashMap<String, Value>,
    /// Step dependencies (IDs of steps that must complete first)
    #[serde(default)]
    pub dependencies: Vec<Uuid>,
    /// Retry policy for this step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicy>,
    /// Error handling behavior, overrides the retry policy's
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_error: Option<OnError>,
    /// What the step is meant to accomplish
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ActionStep {
    /// A step with a fresh identifier and no dependencies.
    pub fn new(action_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            action_name: action_name.into(),
            parameters: HashMap::new(),
            dependencies: Vec::new(),
            retry_policy: None,
            on_error: None,
            description: None,
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<Uuid>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn with_on_error(mut self, on_error: OnError) -> Self {
        self.on_error = Some(on_error);
        self
    }

    /// Policy used by the executor; steps that were never enhanced get the default.
    pub fn effective_retry_policy(&self) -> RetryPolicy {
        self.retry_policy.clone().unwrap_or_default()
    }

    /// The step's own `on_error` wins over the one carried by its retry policy.
    pub fn error_policy(&self) -> OnError {
        self.on_error
            .or_else(|| self.retry_policy.as_ref().map(|p| p.on_error))
            .unwrap_or_default()
    }
}

/// Lifecycle status of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlanStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl PlanStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Plan execution state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanState {
    /// Current status
    pub status: PlanStatus,
    /// Start timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<i64>,
    /// End timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,
    /// Current step index (sequential execution only)
    #[serde(default)]
    pub current_step_index: usize,
    /// Error message if failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PlanState {
    /// State of a plan that has just entered `running`.
    pub fn running() -> Self {
        Self {
            status: PlanStatus::Running,
            start_time: Some(chrono::Utc::now().timestamp_millis()),
            ..Default::default()
        }
    }

    /// Move into a terminal status. Returns false, leaving the state
    /// untouched, when a terminal status was already reached.
    pub fn finish(&mut self, status: PlanStatus, error: Option<String>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = status;
        self.end_time = Some(chrono::Utc::now().timestamp_millis());
        if status == PlanStatus::Failed {
            self.error = error;
        }
        true
    }
}

/// Complete action plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionPlan {
    /// Unique plan identifier
    pub id: Uuid,
    /// Goal of the plan
    pub goal: String,
    /// Rationale behind the plan
    #[serde(default)]
    pub thought: String,
    /// Steps to execute
    pub steps: Vec<ActionStep>,
    /// Execution model
    pub execution_model: ExecutionModel,
    /// Plan state
    #[serde(default)]
    pub state: PlanState,
    /// Additional metadata
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl ActionPlan {
    pub fn new(goal: impl Into<String>, steps: Vec<ActionStep>, model: ExecutionModel) -> Self {
        Self {
            id: Uuid::new_v4(),
            goal: goal.into(),
            thought: String::new(),
            steps,
            execution_model: model,
            state: PlanState::default(),
            metadata: HashMap::new(),
        }
    }

    pub fn total_steps(&self) -> usize {
        self.steps.len()
    }

    /// Notes left by every adaptation, oldest first.
    pub fn adaptations(&self) -> Vec<String> {
        self.metadata
            .get("adaptations")
            .and_then(|v| v.as_array())
            .map(|notes| {
                notes
                    .iter()
                    .filter_map(|n| n.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Run timeout carried in the plan's metadata, if its context set one.
    pub fn timeout_ms(&self) -> Option<i64> {
        self.metadata.get("timeoutMs").and_then(|v| v.as_i64())
    }

    pub fn push_adaptation(&mut self, note: impl Into<String>) {
        let entry = self
            .metadata
            .entry("adaptations".to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        if !entry.is_array() {
            *entry = Value::Array(Vec::new());
        }
        if let Value::Array(notes) = entry {
            notes.push(Value::String(note.into()));
        }
    }
}

/// Planning context for comprehensive planning.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanningContext {
    /// Goal to achieve
    pub goal: String,
    /// Constraints on the plan
    #[serde(default)]
    pub constraints: Vec<PlanningConstraint>,
    /// Available actions
    #[serde(default)]
    pub available_actions: Vec<String>,
    /// Available providers
    #[serde(default)]
    pub available_providers: Vec<String>,
    /// Planning preferences
    #[serde(default)]
    pub preferences: Option<PlanningPreferences>,
}

impl PlanningContext {
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            ..Default::default()
        }
    }

    /// Build a context from loosely typed host input, rejecting malformed
    /// shapes before any model call is made.
    pub fn from_value(value: &Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| PlanningError::InvalidContext("context must be an object".into()))?;

        match obj.get("goal") {
            Some(Value::String(goal)) if !goal.trim().is_empty() => {}
            _ => {
                return Err(PlanningError::InvalidContext(
                    "Planning context must have a non-empty goal".into(),
                ))
            }
        }
        for key in ["constraints", "availableActions", "availableProviders"] {
            if let Some(v) = obj.get(key) {
                if !v.is_array() {
                    return Err(PlanningError::InvalidContext(format!(
                        "{} must be an array",
                        key
                    )));
                }
            }
        }
        if let Some(v) = obj.get("preferences") {
            if !v.is_object() && !v.is_null() {
                return Err(PlanningError::InvalidContext(
                    "preferences must be an object".into(),
                ));
            }
        }

        let context: Self = serde_json::from_value(value.clone())
            .map_err(|e| PlanningError::InvalidContext(e.to_string()))?;
        context.validate()?;
        Ok(context)
    }

    pub fn validate(&self) -> Result<()> {
        if self.goal.trim().is_empty() {
            return Err(PlanningError::InvalidContext(
                "Planning context must have a non-empty goal".to_string(),
            ));
        }
        if let Some(max_steps) = self.preferences.as_ref().and_then(|p| p.max_steps) {
            if max_steps == 0 {
                return Err(PlanningError::InvalidContext(
                    "preferences.maxSteps must be positive".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// The context's preferred model, or `default` when it states none.
    pub fn preferred_execution_model(&self, default: ExecutionModel) -> ExecutionModel {
        self.preferences
            .as_ref()
            .and_then(|p| p.execution_model)
            .unwrap_or(default)
    }

    pub fn preferred_timeout_ms(&self) -> Option<i64> {
        self.preferences.as_ref().and_then(|p| p.timeout_ms)
    }
}

/// Planning constraint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanningConstraint {
    /// Constraint type
    #[serde(rename = "type")]
    pub constraint_type: String,
    /// Constraint value
    pub value: Value,
    /// Description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Planning preferences.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PlanningPreferences {
    /// Preferred execution model
    #[serde(default)]
    pub execution_model: Option<ExecutionModel>,
    /// Maximum number of steps
    #[serde(default)]
    pub max_steps: Option<usize>,
    /// Timeout in milliseconds
    #[serde(default)]
    pub timeout_ms: Option<i64>,
}

/// Message that triggered planning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Message ID
    pub id: Uuid,
    /// Entity ID
    pub entity_id: Uuid,
    /// Room ID
    pub room_id: Uuid,
    /// Message content
    pub content: MessageContent,
}

impl Message {
    /// A message with fresh identifiers and the given text.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            entity_id: Uuid::new_v4(),
            room_id: Uuid::new_v4(),
            content: MessageContent {
                text: text.into(),
                source: None,
            },
        }
    }
}

/// Message content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageContent {
    /// Text content
    pub text: String,
    /// Source of the message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Result from a single action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    /// Result text
    #[serde(default)]
    pub text: String,
    /// Whether the action reported success
    #[serde(default = "default_true")]
    pub success: bool,
    /// Result data
    #[serde(default)]
    pub data: HashMap<String, Value>,
}

fn default_true() -> bool {
    true
}

impl ActionResult {
    pub fn success_with_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            success: true,
            data: HashMap::new(),
        }
    }

    /// Normalize whatever a handler returned. Objects keep their `text`,
    /// `success` and `data` fields (other keys are folded into `data`);
    /// anything else becomes a successful result carrying its string form.
    pub fn from_handler_output(output: Value) -> Self {
        match output {
            Value::Object(mut map) => {
                let text = match map.remove("text") {
                    Some(Value::String(s)) => s,
                    Some(other) => other.to_string(),
                    None => String::new(),
                };
                let success = map
                    .remove("success")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(true);
                let mut data: HashMap<String, Value> = match map.remove("data") {
                    Some(Value::Object(d)) => d.into_iter().collect(),
                    _ => HashMap::new(),
                };
                for (k, v) in map {
                    data.entry(k).or_insert(v);
                }
                Self {
                    text,
                    success,
                    data,
                }
            }
            Value::String(s) => Self::success_with_text(s),
            Value::Null => Self::success_with_text(""),
            other => Self::success_with_text(other.to_string()),
        }
    }

    pub fn step_id(&self) -> Option<&str> {
        self.data.get("stepId").and_then(|v| v.as_str())
    }

    pub fn action_name(&self) -> Option<&str> {
        self.data.get("actionName").and_then(|v| v.as_str())
    }
}

/// Result of plan execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanExecutionResult {
    /// Plan ID
    pub plan_id: Uuid,
    /// Whether execution was successful
    pub success: bool,
    /// Final status of the run
    pub status: PlanStatus,
    /// Number of completed steps
    pub completed_steps: usize,
    /// Total number of steps
    pub total_steps: usize,
    /// Results from each step
    #[serde(default)]
    pub results: Vec<ActionResult>,
    /// Errors encountered, causal error first
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
    /// Duration in milliseconds
    #[serde(default)]
    pub duration: f64,
    /// Adaptations made to the plan before this run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adaptations: Option<Vec<String>>,
}

/// Outcome of structural plan validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}
