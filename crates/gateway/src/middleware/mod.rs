//! HTTP middleware

pub mod metrics;
pub mod rate_limit;
pub mod trace;
