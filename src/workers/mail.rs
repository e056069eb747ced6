//! Outbound mail seam.
//!
//! `MailTransport` abstracts delivery; the email worker only sees this trait.
//! `mail.transport` selects the implementation:
//! - `smtp`: [`SmtpMailTransport`](super::smtp::SmtpMailTransport), real delivery
//! - `log`: `LogMailTransport`, logs the message and returns a generated id (development)

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::config::MailConfig;

use super::smtp::SmtpMailTransport;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("Mail transport unavailable: {0}")]
    Unavailable(String),

    #[error("Recipient rejected: {0}")]
    Rejected(String),
}

/// A fully rendered message ready for delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct MailMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html: Option<String>,
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryReceipt {
    pub message_id: String,
}

#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Transport identifier for logs ("log", "smtp", ...)
    fn name(&self) -> &'static str;

    async fn send(&self, message: &MailMessage) -> Result<DeliveryReceipt, MailError>;
}

pub struct LogMailTransport;

#[async_trait]
impl MailTransport for LogMailTransport {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn send(&self, message: &MailMessage) -> Result<DeliveryReceipt, MailError> {
        if !message.to.contains('@') {
            return Err(MailError::Rejected(message.to.clone()));
        }

        let message_id = format!("<{}@dispatch.local>", Uuid::new_v4());
        tracing::info!(
            transport = "log",
            message_id = %message_id,
            from = %message.from,
            to = %message.to,
            subject = %message.subject,
            html_bytes = message.html.as_ref().map(|h| h.len()).unwrap_or(0),
            "Email delivered"
        );

        Ok(DeliveryReceipt { message_id })
    }
}

/// Create the mail transport named by `config.transport`.
pub fn create_mail_transport(config: &MailConfig) -> Result<Arc<dyn MailTransport>, MailError> {
    match config.transport.as_str() {
        "smtp" => Ok(Arc::new(SmtpMailTransport::from_config(config)?)),
        "log" => {
            tracing::info!(transport = "log", "Mail is logged, not delivered");
            Ok(Arc::new(LogMailTransport))
        }
        other => {
            tracing::warn!(transport = %other, "Unknown mail transport, falling back to log");
            Ok(Arc::new(LogMailTransport))
        }
    }
}
