//! Volplane Common - Shared types and utilities
//!
//! This crate provides the error taxonomy, configuration structures, API bodies and
//! domain types used across all Volplane components.

pub mod api;
pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use types::*;
