//! HTTP handlers

pub mod campaigns;
pub mod health;
pub mod messages;
pub mod tracking;
pub mod webhooks;
