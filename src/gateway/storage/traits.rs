//! Storage trait for command suggestions.

use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;

/// Category that user-saved commands go to.
pub const CUSTOM_CATEGORY: &str = "custom";

/// Known suggestion categories, in display order.
pub const CATEGORIES: [&str; 4] = ["git", "docker", "shell", CUSTOM_CATEGORY];

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unknown command category: {0}")]
    UnknownCategory(String),

    #[error("command store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("command store encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Trait for command suggestion storage.
///
/// Implementations must be thread-safe (`Send + Sync`) for use across
/// WebSocket connections. Reads never fail: a missing or unreadable
/// category loads as empty.
#[async_trait]
pub trait CommandStore: Send + Sync {
    /// Load one category.
    async fn load(&self, category: &str) -> Vec<String>;

    /// Load every known category.
    async fn load_all(&self) -> BTreeMap<String, Vec<String>> {
        let mut all = BTreeMap::new();
        for category in CATEGORIES {
            all.insert(category.to_string(), self.load(category).await);
        }
        all
    }

    /// Append a command to a category unless it is blank or already present.
    ///
    /// Returns whether the command was added.
    async fn append(&self, category: &str, command: &str) -> Result<bool, StoreError>;
}
