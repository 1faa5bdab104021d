#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod service;
pub mod types;

pub mod actions;
pub mod embedding;
pub mod executor;
pub mod memory;
pub mod planner;
pub mod registry;
pub mod retry;
pub mod runtime;

pub use actions::{Action, ActionContext, ActionRegistry, HandlerCallback};

pub use actions::{
    AnalyzeInputAction, CreatePlanAction, ExecuteFinalAction, ProcessAnalysisAction, ReplyAction,
};

pub use config::{EmbeddingQueueConfig, PlanningConfig};
pub use embedding::{
    EmbeddingEvent, EmbeddingGenerationPayload, EmbeddingGenerationService, EmbeddingPriority,
    EmbeddingQueue, EmbeddingRuntime, Memory, QueueStats,
};
pub use error::{EmbeddingError, PlanningError, Result};
pub use executor::PlanExecutor;
pub use memory::WorkingMemory;
pub use planner::{parse_plan_response, PlanBuilder, PlanValidator};
pub use registry::ExecutionRegistry;
pub use runtime::Runtime;
pub use service::PlanningService;
pub use types::{
    ActionPlan, ActionResult, ActionStep, ExecutionModel, Message, OnError, PlanExecutionResult,
    PlanState, PlanStatus, PlanningConstraint, PlanningContext, PlanningPreferences, RetryPolicy,
    ValidationReport,
};

pub const PLUGIN_NAME: &str = "planning";
pub const PLUGIN_DESCRIPTION: &str = "Plan building, validation, execution and embedding queue";
pub const PLUGIN_VERSION: &str = env!("CARGO_PKG_VERSION");
