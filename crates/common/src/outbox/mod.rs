//! Post-commit notification queue
//!
//! Provides:
//! - In-process bounded queue between request handlers and the mailer
//! - Notification messages and their rendering to mail
//! - A dispatcher task that drains the queue
//!
//! Handlers enqueue only after their write committed. Enqueueing never
//! fails the request and delivery errors never reach the caller.

use crate::mail::{Email, Mailer};
use crate::metrics;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, info, warn};

/// Notification message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    ConfirmationCode {
        username: String,
        email: String,
        code: String,
    },
}

impl Notification {
    /// Render as an email
    pub fn to_email(&self) -> Email {
        match self {
            Notification::ConfirmationCode { username, email, code } => Email {
                to: email.clone(),
                subject: "YaMDb confirmation code".to_string(),
                body: format!(
                    "Hello, {username}!\n\nYour confirmation code: {code}\n\n\
                     Exchange it for an access token at /api/v1/auth/token/."
                ),
            },
        }
    }
}

/// Producer side, cheap to clone into every service
#[derive(Clone)]
pub struct Outbox {
    tx: mpsc::Sender<Notification>,
}

/// Consumer side, run once as a background task
pub struct Dispatcher {
    rx: mpsc::Receiver<Notification>,
    mailer: Arc<dyn Mailer>,
}

impl Outbox {
    /// Create a connected outbox/dispatcher pair
    pub fn new(capacity: usize, mailer: Arc<dyn Mailer>) -> (Self, Dispatcher) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, Dispatcher { rx, mailer })
    }

    /// Queue a notification for delivery
    pub fn enqueue(&self, notification: Notification) {
        match self.tx.try_send(notification) {
            Ok(()) => debug!("Notification queued"),
            Err(TrySendError::Full(dropped)) => {
                metrics::record_notification("outbox", false);
                warn!(notification = ?dropped, "Outbox full, notification dropped");
            }
            Err(TrySendError::Closed(dropped)) => {
                metrics::record_notification("outbox", false);
                warn!(notification = ?dropped, "Dispatcher stopped, notification dropped");
            }
        }
    }
}

impl Dispatcher {
    /// Deliver queued notifications until every `Outbox` handle is dropped
    pub async fn run(mut self) {
        info!(backend = self.mailer.backend(), "Notification dispatcher started");

        while let Some(notification) = self.rx.recv().await {
            self.deliver(&notification).await;
        }

        info!("Notification dispatcher stopped");
    }

    async fn deliver(&self, notification: &Notification) {
        let email = notification.to_email();
        let backend = self.mailer.backend().to_string();

        match self.mailer.send(&email).await {
            Ok(()) => {
                metrics::record_notification(&backend, true);
                debug!(to = %email.to, backend = %backend, "Notification delivered");
            }
            Err(e) => {
                metrics::record_notification(&backend, false);
                error!(to = %email.to, backend = %backend, error = %e, "Notification delivery failed");
            }
        }
    }
}
