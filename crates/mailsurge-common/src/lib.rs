//! Mailsurge Common - Shared types, errors and configuration
//!
//! This crate provides the pieces shared by every Mailsurge crate:
//! the error taxonomy, id aliases and the TOML configuration loader.

pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
