//! # Restyle Common Library
//!
//! Shared code for the restyle services:
//! - Error and result types
//! - Bootstrap configuration loading and root folder resolution
//! - Event types (RestyleEvent enum) and the broadcast EventBus

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
