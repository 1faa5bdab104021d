use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EmbeddingError;

/// A stored memory that may need an embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Memory {
    pub id: Uuid,
    pub entity_id: Uuid,
    pub room_id: Uuid,
    pub content: MemoryContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl Memory {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            entity_id: Uuid::new_v4(),
            room_id: Uuid::new_v4(),
            content: MemoryContent {
                text: Some(text.into()),
            },
            embedding: None,
        }
    }

    /// Text worth embedding, if any.
    pub fn text(&self) -> Option<&str> {
        self.content
            .text
            .as_deref()
            .filter(|t| !t.trim().is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// Embedding priority levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingPriority {
    /// High priority
    High,
    /// Normal priority
    #[default]
    Normal,
    /// Low priority
    Low,
}

impl EmbeddingPriority {
    /// Queue rank; lower is served first.
    pub fn rank(self) -> u8 {
        match self {
            Self::High => 0,
            Self::Normal => 1,
            Self::Low => 2,
        }
    }
}

/// Payload for embedding generation events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingGenerationPayload {
    /// Memory being embedded
    pub memory: Memory,
    /// Priority level
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<EmbeddingPriority>,
    /// Retry count
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
    /// Max retries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    /// Generated embedding
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// Error if failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EmbeddingGenerationPayload {
    /// An intake request for `memory` at `priority`.
    pub fn request(memory: Memory, priority: EmbeddingPriority) -> Self {
        Self {
            memory,
            priority: Some(priority),
            retry_count: None,
            max_retries: None,
            embedding: None,
            error: None,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// Outbound notifications from the embedding queue.
#[derive(Debug, Clone)]
pub enum EmbeddingEvent {
    Completed(EmbeddingGenerationPayload),
    /// Retries are exhausted; the item has left the queue.
    Failed(EmbeddingGenerationPayload),
}

impl EmbeddingEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Completed(_) => "EMBEDDING_GENERATION_COMPLETED",
            Self::Failed(_) => "EMBEDDING_GENERATION_FAILED",
        }
    }

    pub fn payload(&self) -> &EmbeddingGenerationPayload {
        match self {
            Self::Completed(p) | Self::Failed(p) => p,
        }
    }
}

/// Host primitives the embedding queue depends on.
#[async_trait]
pub trait EmbeddingRuntime: Send + Sync {
    async fn generate_embedding(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Persist `memory` with its new embedding.
    async fn update_memory(&self, memory: &Memory) -> Result<(), EmbeddingError>;

    async fn emit_event(&self, event: EmbeddingEvent);
}
