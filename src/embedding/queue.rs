//! Priority-banded FIFO with bulk eviction.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::time::Instant;

use super::types::{EmbeddingPriority, Memory};
use crate::config::EmbeddingQueueConfig;

/// One pending embedding request.
#[derive(Debug, Clone)]
pub struct QueueItem {
    pub memory: Memory,
    pub priority: EmbeddingPriority,
    pub retry_count: u32,
    pub max_retries: u32,
    /// Milliseconds since the epoch at first intake
    pub added_at: i64,
    /// Earliest time a retried item may be processed again
    pub next_attempt_at: Option<Instant>,
}

impl QueueItem {
    pub fn new(memory: Memory, priority: EmbeddingPriority, max_retries: u32) -> Self {
        Self {
            memory,
            priority,
            retry_count: 0,
            max_retries,
            added_at: chrono::Utc::now().timestamp_millis(),
            next_attempt_at: None,
        }
    }

    fn is_ready(&self, now: Instant) -> bool {
        self.next_attempt_at.map_or(true, |at| at <= now)
    }
}

/// Item counts per priority band.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub high: usize,
    pub normal: usize,
    pub low: usize,
    pub total: usize,
}

/// All `high` items precede all `normal` items, which precede all `low`
/// items; insertion order is kept within a band.
#[derive(Debug)]
pub struct EmbeddingQueue {
    items: VecDeque<QueueItem>,
    max_size: usize,
    eviction_count: usize,
}

impl EmbeddingQueue {
    pub fn new(max_size: usize, eviction_count: usize) -> Self {
        Self {
            items: VecDeque::new(),
            max_size: max_size.max(1),
            eviction_count: eviction_count.max(1),
        }
    }

    pub fn from_config(config: &EmbeddingQueueConfig) -> Self {
        Self::new(config.max_queue_size, config.eviction_count())
    }

    /// Insert at the tail of the item's band, evicting first when full.
    /// Returns how many items were evicted.
    pub fn push(&mut self, item: QueueItem) -> usize {
        let evicted = if self.items.len() >= self.max_size {
            let needed = self.items.len() + 1 - self.max_size;
            self.evict(self.eviction_count.max(needed))
        } else {
            0
        };

        let rank = item.priority.rank();
        match self.items.iter().position(|i| i.priority.rank() > rank) {
            Some(index) => self.items.insert(index, item),
            None => self.items.push_back(item),
        }
        evicted
    }

    /// Drop up to `count` items, lowest band first and oldest first within it.
    fn evict(&mut self, count: usize) -> usize {
        let mut removed = 0;
        while removed < count {
            let Some(lowest) = self.items.iter().map(|i| i.priority.rank()).max() else {
                break;
            };
            let Some(index) = self
                .items
                .iter()
                .enumerate()
                .filter(|(_, i)| i.priority.rank() == lowest)
                .min_by_key(|(_, i)| i.added_at)
                .map(|(index, _)| index)
            else {
                break;
            };
            self.items.remove(index);
            removed += 1;
        }
        removed
    }

    /// Remove up to `batch_size` items that are due, front first. Items still
    /// backing off keep their position.
    pub fn take_ready_batch(&mut self, batch_size: usize, now: Instant) -> Vec<QueueItem> {
        let mut batch = Vec::with_capacity(batch_size.min(self.items.len()));
        let mut index = 0;
        while batch.len() < batch_size && index < self.items.len() {
            if self.items[index].is_ready(now) {
                if let Some(item) = self.items.remove(index) {
                    batch.push(item);
                }
            } else {
                index += 1;
            }
        }
        batch
    }

    pub fn stats(&self) -> QueueStats {
        let mut stats = QueueStats {
            total: self.items.len(),
            ..Default::default()
        };
        for item in &self.items {
            match item.priority {
                EmbeddingPriority::High => stats.high += 1,
                EmbeddingPriority::Normal => stats.normal += 1,
                EmbeddingPriority::Low => stats.low += 1,
            }
        }
        stats
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueueItem> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}
