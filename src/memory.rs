//! Scratch key/value space scoped to one plan execution.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Working memory shared between the executor and the actions of one run.
///
/// Cloning yields another handle onto the same store.
#[derive(Debug, Clone, Default)]
pub struct WorkingMemory {
    data: Arc<RwLock<HashMap<String, Value>>>,
}

impl WorkingMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        self.data.read().await.get(key).cloned()
    }

    pub async fn set(&self, key: impl Into<String>, value: Value) {
        self.data.write().await.insert(key.into(), value);
    }

    pub async fn remove(&self, key: &str) -> Option<Value> {
        self.data.write().await.remove(key)
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.data.read().await.contains_key(key)
    }

    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.data.read().await.is_empty()
    }

    pub async fn clear(&self) {
        self.data.write().await.clear();
    }

    /// Copy of every entry, for status reporting.
    pub async fn snapshot(&self) -> HashMap<String, Value> {
        self.data.read().await.clone()
    }
}
