use futures::future::join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::queue::{EmbeddingQueue, QueueItem, QueueStats};
use super::types::{EmbeddingEvent, EmbeddingGenerationPayload, EmbeddingRuntime};
use crate::config::EmbeddingQueueConfig;
use crate::error::EmbeddingError;
use crate::retry::Backoff;

/// Clears the processing flag however a pass ends.
struct ProcessingGuard(Arc<AtomicBool>);

impl Drop for ProcessingGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Queues embedding requests by priority and works through them in batches.
pub struct EmbeddingGenerationService {
    config: EmbeddingQueueConfig,
    runtime: Arc<dyn EmbeddingRuntime>,
    queue: Arc<Mutex<EmbeddingQueue>>,
    processing: Arc<AtomicBool>,
    shutdown: Arc<Mutex<Option<CancellationToken>>>,
}

impl EmbeddingGenerationService {
    pub const SERVICE_TYPE: &'static str = "embedding-generation";

    pub fn new(config: EmbeddingQueueConfig, runtime: Arc<dyn EmbeddingRuntime>) -> Self {
        let queue = EmbeddingQueue::from_config(&config);
        Self {
            config,
            runtime,
            queue: Arc::new(Mutex::new(queue)),
            processing: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(Mutex::new(None)),
        }
    }

    /// Spawn the processing loop. A second call while running does nothing.
    pub async fn start(&self) {
        let mut shutdown = self.shutdown.lock().await;
        if shutdown.is_some() {
            return;
        }

        let token = CancellationToken::new();
        *shutdown = Some(token.clone());

        let service = self.clone_for_task();
        let interval_ms = self.config.processing_interval_ms.max(1);
        tokio::spawn(async move {
            let mut interval = time::interval(Duration::from_millis(interval_ms));
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        service.process_queue().await;
                    }
                }
            }
            debug!("[EmbeddingService] Processing loop exited");
        });

        info!(
            "[EmbeddingService] Started (interval {}ms, batch {})",
            interval_ms, self.config.batch_size
        );
    }

    /// Stop the processing loop. Queued items are kept.
    pub async fn stop(&self) {
        if let Some(token) = self.shutdown.lock().await.take() {
            token.cancel();
            info!("[EmbeddingService] Stopped");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.shutdown.lock().await.is_some()
    }

    fn clone_for_task(&self) -> Self {
        Self {
            config: self.config.clone(),
            runtime: Arc::clone(&self.runtime),
            queue: Arc::clone(&self.queue),
            processing: Arc::clone(&self.processing),
            shutdown: Arc::clone(&self.shutdown),
        }
    }

    /// Intake for an "embedding requested" event. Memories that already
    /// carry an embedding, or have no text, are ignored. Returns whether the
    /// request was queued.
    pub async fn handle_embedding_requested(&self, payload: EmbeddingGenerationPayload) -> bool {
        let memory = payload.memory;
        if memory.embedding.is_some() {
            debug!(
                "[EmbeddingService] Memory {} already has an embedding, skipping",
                memory.id
            );
            return false;
        }
        if memory.text().is_none() {
            debug!("[EmbeddingService] Memory {} has no text, skipping", memory.id);
            return false;
        }

        let priority = payload.priority.unwrap_or_default();
        let max_retries = payload
            .max_retries
            .unwrap_or(self.config.default_max_retries);
        let memory_id = memory.id;

        let mut queue = self.queue.lock().await;
        let evicted = queue.push(QueueItem::new(memory, priority, max_retries));
        if evicted > 0 {
            warn!(
                "[EmbeddingService] Queue full, evicted {} lowest-priority items",
                evicted
            );
        }
        debug!(
            "[EmbeddingService] Queued memory {} ({:?}), queue size {}",
            memory_id,
            priority,
            queue.len()
        );
        true
    }

    /// Run one batch. Overlapping calls return immediately with zero.
    /// Returns the number of items attempted.
    pub async fn process_queue(&self) -> usize {
        if self.processing.swap(true, Ordering::SeqCst) {
            return 0;
        }
        let _guard = ProcessingGuard(Arc::clone(&self.processing));

        let batch = self
            .queue
            .lock()
            .await
            .take_ready_batch(self.config.batch_size, Instant::now());
        if batch.is_empty() {
            return 0;
        }

        let attempted = batch.len();
        debug!("[EmbeddingService] Processing batch of {}", attempted);

        let outcomes = join_all(batch.into_iter().map(|item| self.generate(item))).await;
        for outcome in outcomes {
            if let Err((item, e)) = outcome {
                self.retry_or_fail(item, e).await;
            }
        }
        attempted
    }

    async fn generate(&self, item: QueueItem) -> Result<(), (QueueItem, EmbeddingError)> {
        let text = item.memory.text().unwrap_or_default().to_string();
        let embedding = match self.runtime.generate_embedding(&text).await {
            Ok(embedding) => embedding,
            Err(e) => return Err((item, e)),
        };

        let mut memory = item.memory.clone();
        memory.embedding = Some(embedding.clone());
        if let Err(e) = self.runtime.update_memory(&memory).await {
            return Err((item, e));
        }

        self.runtime
            .emit_event(EmbeddingEvent::Completed(EmbeddingGenerationPayload {
                memory,
                priority: Some(item.priority),
                retry_count: Some(item.retry_count),
                max_retries: Some(item.max_retries),
                embedding: Some(embedding),
                error: None,
            }))
            .await;
        Ok(())
    }

    /// Requeue at the tail of the item's own band, or report it failed.
    async fn retry_or_fail(&self, mut item: QueueItem, e: EmbeddingError) {
        if item.retry_count < item.max_retries {
            item.retry_count += 1;
            let delay = self.backoff().delay_for(item.retry_count);
            item.next_attempt_at = Some(Instant::now() + delay);
            warn!(
                "[EmbeddingService] Embedding for memory {} failed (retry {}/{} in {}ms): {}",
                item.memory.id,
                item.retry_count,
                item.max_retries,
                delay.as_millis(),
                e
            );
            self.queue.lock().await.push(item);
            return;
        }

        error!(
            "[EmbeddingService] Embedding for memory {} failed after {} retries: {}",
            item.memory.id, item.retry_count, e
        );
        self.runtime
            .emit_event(EmbeddingEvent::Failed(EmbeddingGenerationPayload {
                memory: item.memory,
                priority: Some(item.priority),
                retry_count: Some(item.retry_count),
                max_retries: Some(item.max_retries),
                embedding: None,
                error: Some(e.to_string()),
            }))
            .await;
    }

    fn backoff(&self) -> Backoff {
        Backoff::new(
            self.config.default_max_retries,
            self.config.retry_backoff_ms,
            self.config.retry_backoff_multiplier,
        )
    }

    pub async fn get_queue_stats(&self) -> QueueStats {
        self.queue.lock().await.stats()
    }

    pub async fn get_queue_size(&self) -> usize {
        self.queue.lock().await.len()
    }

    pub async fn clear_queue(&self) {
        let mut queue = self.queue.lock().await;
        let dropped = queue.len();
        queue.clear();
        info!("[EmbeddingService] Cleared {} queued items", dropped);
    }

    /// Queued items in processing order.
    pub async fn queued_items(&self) -> Vec<QueueItem> {
        self.queue.lock().await.iter().cloned().collect()
    }
}
