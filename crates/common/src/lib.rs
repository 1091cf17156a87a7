//! YaMDb Common Library
//!
//! Shared code for the YaMDb gateway including:
//! - Database models, schema bootstrap and repository
//! - Permission evaluation and caller extraction
//! - Confirmation codes and access tokens
//! - Account, catalog and review services
//! - Mail transport and post-commit notification outbox
//! - Error types, configuration, metrics

pub mod access;
pub mod auth;
pub mod config;
pub mod db;
pub mod errors;
pub mod mail;
pub mod metrics;
pub mod outbox;
pub mod services;
pub mod validators;

// Re-export commonly used types
pub use access::{AdminPolicy, Caller, Principal};
pub use config::AppConfig;
pub use db::{DbPool, Repository};
pub use errors::{AppError, Result};
pub use mail::Mailer;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
