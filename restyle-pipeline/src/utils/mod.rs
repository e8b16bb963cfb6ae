//! Utility modules for restyle-pipeline

pub mod retry;
pub mod slug;

pub use retry::{retry_with_backoff, RetryPolicy};
pub use slug::style_slug;
