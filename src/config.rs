//! Configuration for the planning engine and the embedding queue.

use crate::runtime::model_type;
use crate::types::{ExecutionModel, RetryPolicy};
use serde::{Deserialize, Serialize};

/// Configuration for planning service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanningConfig {
    /// Maximum steps in a plan
    pub max_steps: usize,
    /// Default execution timeout in milliseconds
    pub default_timeout_ms: i64,
    /// Default execution model
    pub execution_model: ExecutionModel,
    /// Enable plan adaptation during execution
    pub enable_adaptation: bool,
    /// Default retry policy
    pub retry_policy: RetryPolicy,
    /// Model type for planning
    pub planning_model_type: String,
    /// Temperature for LLM generation
    pub planning_temperature: f32,
    /// Max tokens for planning response
    pub planning_max_tokens: i32,
}

impl Default for PlanningConfig {
    fn default() -> Self {
        Self {
            max_steps: 10,
            default_timeout_ms: 60000,
            execution_model: ExecutionModel::Sequential,
            enable_adaptation: true,
            retry_policy: RetryPolicy::default(),
            planning_model_type: model_type::TEXT_LARGE.to_string(),
            planning_temperature: 0.3,
            planning_max_tokens: 2000,
        }
    }
}

impl PlanningConfig {
    /// Create a new config from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(n) = env_parse("PLANNING_MAX_STEPS") {
            config.max_steps = n;
        }

        if let Some(n) = env_parse("PLANNING_TIMEOUT_MS") {
            config.default_timeout_ms = n;
        }

        if let Ok(val) = std::env::var("PLANNING_EXECUTION_MODEL") {
            config.execution_model = ExecutionModel::from_tag(&val);
        }

        if let Ok(val) = std::env::var("PLANNING_ENABLE_ADAPTATION") {
            config.enable_adaptation = val.to_lowercase() != "false";
        }

        if let Ok(val) = std::env::var("PLANNING_MODEL_TYPE") {
            config.planning_model_type = val;
        }

        if let Some(n) = env_parse("PLANNING_TEMPERATURE") {
            config.planning_temperature = n;
        }

        if let Some(n) = env_parse("PLANNING_MAX_TOKENS") {
            config.planning_max_tokens = n;
        }

        if let Some(n) = env_parse("PLANNING_MAX_RETRIES") {
            config.retry_policy.max_retries = n;
        }

        if let Some(n) = env_parse::<u64>("PLANNING_BACKOFF_MS") {
            config.retry_policy.backoff_ms = n.max(1);
        }

        config
    }
}

/// Configuration for the embedding generation queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingQueueConfig {
    /// Hard ceiling on queued items
    pub max_queue_size: usize,
    /// Items taken from the front per processing pass
    pub batch_size: usize,
    /// Delay between processing passes in milliseconds
    pub processing_interval_ms: u64,
    /// Retry ceiling applied when a request does not carry one
    pub default_max_retries: u32,
    /// Share of capacity evicted when the queue overflows
    pub eviction_ratio: f64,
    /// Base delay before a failed item becomes eligible again
    pub retry_backoff_ms: u64,
    /// Growth factor applied per retry
    pub retry_backoff_multiplier: f64,
}

impl Default for EmbeddingQueueConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 1000,
            batch_size: 10,
            processing_interval_ms: 100,
            default_max_retries: 3,
            eviction_ratio: 0.1,
            retry_backoff_ms: 1000,
            retry_backoff_multiplier: 2.0,
        }
    }
}

impl EmbeddingQueueConfig {
    /// Create a new config from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(n) = env_parse::<usize>("EMBEDDING_MAX_QUEUE_SIZE") {
            config.max_queue_size = n.max(1);
        }
        if let Some(n) = env_parse::<usize>("EMBEDDING_BATCH_SIZE") {
            config.batch_size = n.max(1);
        }
        if let Some(n) = env_parse("EMBEDDING_PROCESSING_INTERVAL_MS") {
            config.processing_interval_ms = n;
        }
        if let Some(n) = env_parse("EMBEDDING_MAX_RETRIES") {
            config.default_max_retries = n;
        }
        if let Some(n) = env_parse::<f64>("EMBEDDING_EVICTION_RATIO") {
            config.eviction_ratio = n.clamp(0.0, 1.0);
        }
        if let Some(n) = env_parse("EMBEDDING_RETRY_BACKOFF_MS") {
            config.retry_backoff_ms = n;
        }

        config
    }

    /// Number of items dropped per overflow event, never less than one.
    pub fn eviction_count(&self) -> usize {
        ((self.max_queue_size as f64 * self.eviction_ratio).floor() as usize).max(1)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|val| val.trim().parse().ok())
}
