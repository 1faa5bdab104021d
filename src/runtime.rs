//! Host runtime seam: the language-model primitive.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

pub mod model_type {
    pub const TEXT_SMALL: &str = "TEXT_SMALL";
    pub const TEXT_LARGE: &str = "TEXT_LARGE";
    pub const TEXT_EMBEDDING: &str = "TEXT_EMBEDDING";
}

/// Runtime trait for LLM operations.
#[async_trait]
pub trait Runtime: Send + Sync {
    /// Use a model for text generation. `params` carries `prompt`,
    /// `temperature` and `maxTokens`.
    async fn use_model(&self, model_type: &str, params: Value) -> Result<String>;
}
