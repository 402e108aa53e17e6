//! # Starboard Common Library
//!
//! Shared code for the starboard mirror services:
//! - Error type and result alias
//! - TOML / environment configuration loading
//! - Event types and the broadcast event bus
//! - SSE helpers for the HTTP surface

pub mod config;
pub mod error;
pub mod events;
pub mod sse;

pub use error::{Error, Result};
