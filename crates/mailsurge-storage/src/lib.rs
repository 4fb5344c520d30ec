//! Mailsurge Storage - PostgreSQL persistence layer
//!
//! This crate provides the database pool, models, and repositories for
//! the campaign dispatch and delivery feedback engine.

pub mod db;
pub mod models;
pub mod repository;

pub use db::DatabasePool;
pub use models::*;
pub use repository::*;
