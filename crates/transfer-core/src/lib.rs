//! Core types and utilities for transfer-learning image classification.
//!
//! This crate provides the foundational types, configuration and error
//! handling shared by the dataset, feature extraction, training and pipeline
//! crates.

pub mod backend;
pub mod cli;
pub mod config;
pub mod error;
pub mod types;

pub use backend::{backend_name, default_device, DefaultBackend};
pub use cli::*;
pub use config::*;
pub use error::{Error, Result};
pub use types::*;

/// Re-export commonly used items
pub mod prelude {
    pub use crate::backend::{default_device, DefaultBackend};
    pub use crate::config::*;
    pub use crate::error::{Error, Result};
    pub use crate::types::*;
}
