//! # Mother DB Common Library
//!
//! Shared code for the Mother DB reconciliation tools:
//! - Error type
//! - Configuration file resolution and TOML helpers
//! - Session lifecycle events and the event bus

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
pub use events::{EventBus, ReconcileEvent};
