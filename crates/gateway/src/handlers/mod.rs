//! API handlers module

pub mod auth;
pub mod catalog;
pub mod health;
pub mod reviews;
pub mod titles;
pub mod users;

use serde::Deserialize;

/// `?search=` filter shared by list endpoints
#[derive(Debug, Default, Deserialize)]
pub struct SearchQuery {
    pub search: Option<String>,
}
