//! Command suggestion storage.
//!
//! Suggestions are grouped by category. The trait keeps the WebSocket layer
//! independent of where suggestions live; the default implementation keeps
//! one JSON file per category on disk.

mod command;
mod traits;

pub use command::FileCommandStore;
pub use traits::{CATEGORIES, CUSTOM_CATEGORY, CommandStore, StoreError};
