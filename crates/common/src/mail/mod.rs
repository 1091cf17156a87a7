//! Outbound mail abstraction
//!
//! Provides a unified interface for mail backends:
//! - Console (logs the message, default for development)
//! - Memory (collects messages, used by tests)
//! - HTTP relay (JSON POST to a transactional mail API)

use crate::config::MailConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

/// A single outbound message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Trait for mail delivery
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Deliver a message
    async fn send(&self, email: &Email) -> Result<()>;

    /// Backend name for logs and metrics
    fn backend(&self) -> &str;
}

/// Writes messages to the log instead of sending them
pub struct ConsoleMailer {
    from: String,
}

impl ConsoleMailer {
    pub fn new(from: impl Into<String>) -> Self {
        Self { from: from.into() }
    }
}

#[async_trait]
impl Mailer for ConsoleMailer {
    async fn send(&self, email: &Email) -> Result<()> {
        info!(
            from = %self.from,
            to = %email.to,
            subject = %email.subject,
            body = %email.body,
            "Outgoing mail"
        );
        Ok(())
    }

    fn backend(&self) -> &str {
        "console"
    }
}

/// Keeps every message in memory
#[derive(Default)]
pub struct MemoryMailer {
    sent: Mutex<Vec<Email>>,
}

impl MemoryMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages delivered so far
    pub fn sent(&self) -> Vec<Email> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Messages delivered to one address
    pub fn sent_to(&self, address: &str) -> Vec<Email> {
        self.sent()
            .into_iter()
            .filter(|email| email.to == address)
            .collect()
    }
}

#[async_trait]
impl Mailer for MemoryMailer {
    async fn send(&self, email: &Email) -> Result<()> {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(email.clone());
        Ok(())
    }

    fn backend(&self) -> &str {
        "memory"
    }
}

/// JSON-over-HTTP relay client
pub struct HttpMailer {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    from: String,
    max_retry: Duration,
}

#[derive(Serialize)]
struct RelayRequest<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    text: &'a str,
}

impl HttpMailer {
    /// Create a new relay client
    pub fn new(
        url: String,
        api_key: Option<String>,
        from: String,
        timeout: Duration,
        max_retry: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            url,
            api_key,
            from,
            max_retry,
        })
    }

    async fn post(&self, email: &Email) -> std::result::Result<(), backoff::Error<AppError>> {
        let request = RelayRequest {
            from: &self.from,
            to: &email.to,
            subject: &email.subject,
            text: &email.body,
        };

        let mut builder = self.client.post(&self.url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| backoff::Error::transient(AppError::HttpClient(e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        let err = AppError::Mail {
            message: format!("Relay error {}: {}", status, body),
        };

        if is_permanent(status) {
            Err(backoff::Error::permanent(err))
        } else {
            warn!(status = status.as_u16(), "Mail relay request failed, retrying");
            Err(backoff::Error::transient(err))
        }
    }
}

/// Client errors will not succeed on retry, except throttling
fn is_permanent(status: StatusCode) -> bool {
    status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, email: &Email) -> Result<()> {
        let policy = ExponentialBackoff {
            max_elapsed_time: Some(self.max_retry),
            ..Default::default()
        };

        retry(policy, || async move { self.post(email).await }).await
    }

    fn backend(&self) -> &str {
        "http"
    }
}

/// Create a mailer based on configuration
pub fn create_mailer(config: &MailConfig) -> Result<Arc<dyn Mailer>> {
    match config.backend.as_str() {
        "console" => Ok(Arc::new(ConsoleMailer::new(config.from_address.clone()))),
        "memory" => Ok(Arc::new(MemoryMailer::new())),
        "http" => {
            let url = config.api_url.clone().ok_or_else(|| AppError::Configuration {
                message: "mail.api_url is required for the http backend".to_string(),
            })?;
            Ok(Arc::new(HttpMailer::new(
                url,
                config.api_key.clone(),
                config.from_address.clone(),
                Duration::from_secs(config.timeout_secs),
                Duration::from_secs(config.max_retry_secs),
            )?))
        }
        other => {
            warn!(backend = other, "Unknown mail backend, using console");
            Ok(Arc::new(ConsoleMailer::new(config.from_address.clone())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn email(to: &str) -> Email {
        Email {
            to: to.to_string(),
            subject: "Hello".to_string(),
            body: "code".to_string(),
        }
    }

    #[tokio::test]
    async fn test_memory_mailer_collects() {
        let mailer = MemoryMailer::new();
        mailer.send(&email("a@example.com")).await.unwrap();
        mailer.send(&email("b@example.com")).await.unwrap();

        assert_eq!(mailer.sent().len(), 2);
        assert_eq!(mailer.sent_to("a@example.com"), vec![email("a@example.com")]);
    }

    #[tokio::test]
    async fn test_console_mailer() {
        let mailer = ConsoleMailer::new("noreply@example.com");
        tokio_test::assert_ok!(mailer.send(&email("a@example.com")).await);
        assert_eq!(mailer.backend(), "console");
    }

    #[test]
    fn test_permanent_statuses() {
        assert!(is_permanent(StatusCode::BAD_REQUEST));
        assert!(is_permanent(StatusCode::UNAUTHORIZED));
        assert!(!is_permanent(StatusCode::TOO_MANY_REQUESTS));
        assert!(!is_permanent(StatusCode::BAD_GATEWAY));
    }

    #[test]
    fn test_factory() {
        let mut config = MailConfig::default();
        assert_eq!(create_mailer(&config).unwrap().backend(), "console");

        config.backend = "memory".into();
        assert_eq!(create_mailer(&config).unwrap().backend(), "memory");

        config.backend = "http".into();
        assert!(matches!(create_mailer(&config), Err(AppError::Configuration { .. })));

        config.api_url = Some("http://localhost:9/send".into());
        assert_eq!(create_mailer(&config).unwrap().backend(), "http");

        config.backend = "carrier-pigeon".into();
        assert_eq!(create_mailer(&config).unwrap().backend(), "console");
    }
}
