//! Spoil Me Core Library
//!
//! This crate provides the shared push payload types and configuration for
//! the Spoil Me Vintage delivery stack.

pub mod config;
pub mod types;

pub use config::AppConfig;
pub use types::{PushData, PushNotification, PushPayload};
