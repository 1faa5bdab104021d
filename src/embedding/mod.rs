//! Background embedding generation behind a priority queue.

mod queue;
mod service;
mod types;

pub use queue::{EmbeddingQueue, QueueItem, QueueStats};
pub use service::EmbeddingGenerationService;
pub use types::{
    EmbeddingEvent, EmbeddingGenerationPayload, EmbeddingPriority, EmbeddingRuntime, Memory,
    MemoryContent,
};
