//! SMTP delivery through `lettre`.

use std::time::Duration;

use async_trait::async_trait;
use lettre::message::{header::ContentType, Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::Error as SmtpError;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use uuid::Uuid;

use crate::config::MailConfig;

use super::mail::{DeliveryReceipt, MailError, MailMessage, MailTransport};

/// Sends mail to an SMTP relay. Connections are pooled by `lettre`.
pub struct SmtpMailTransport {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    /// Right-hand side of generated Message-IDs
    id_domain: String,
}

impl SmtpMailTransport {
    pub fn from_config(config: &MailConfig) -> Result<Self, MailError> {
        let smtp = &config.smtp;
        let host = smtp
            .host
            .as_deref()
            .filter(|h| !h.trim().is_empty())
            .ok_or_else(|| MailError::Unavailable("mail.smtp.host is not set".to_string()))?;

        let builder = match smtp.tls.as_str() {
            "tls" => AsyncSmtpTransport::<Tokio1Executor>::relay(host).map_err(unavailable)?,
            "none" => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host),
            _ => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host).map_err(unavailable)?,
        };
        let mut builder = builder
            .port(smtp.port)
            .timeout(Some(Duration::from_millis(config.timeout_ms)));
        if let (Some(username), Some(password)) = (&smtp.username, &smtp.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        tracing::info!(host = %host, port = smtp.port, tls = %smtp.tls, "SMTP mail transport configured");

        Ok(Self {
            transport: builder.build(),
            id_domain: id_domain(&config.from),
        })
    }

    fn new_message_id(&self) -> String {
        format!("<{}@{}>", Uuid::new_v4(), self.id_domain)
    }
}

fn unavailable(e: SmtpError) -> MailError {
    MailError::Unavailable(e.to_string())
}

fn id_domain(from: &str) -> String {
    from.rsplit_once('@')
        .map(|(_, domain)| domain.trim_end_matches('>').to_string())
        .filter(|domain| !domain.is_empty())
        .unwrap_or_else(|| "dispatch.local".to_string())
}

/// MIME message for `message`: multipart/alternative when both bodies are present.
pub fn build_message(message: &MailMessage, message_id: String) -> Result<Message, MailError> {
    let from: Mailbox = message
        .from
        .parse()
        .map_err(|e| MailError::Rejected(format!("sender {}: {}", message.from, e)))?;
    let to: Mailbox = message
        .to
        .parse()
        .map_err(|e| MailError::Rejected(format!("recipient {}: {}", message.to, e)))?;

    let builder = Message::builder()
        .from(from)
        .to(to)
        .subject(message.subject.clone())
        .message_id(Some(message_id));

    let built = match (&message.html, &message.text) {
        (Some(html), Some(text)) => {
            builder.multipart(MultiPart::alternative_plain_html(text.clone(), html.clone()))
        }
        (Some(html), None) => builder.header(ContentType::TEXT_HTML).body(html.clone()),
        (None, Some(text)) => builder.header(ContentType::TEXT_PLAIN).body(text.clone()),
        (None, None) => builder.header(ContentType::TEXT_PLAIN).body(String::new()),
    };

    built.map_err(|e| MailError::Rejected(e.to_string()))
}

#[async_trait]
impl MailTransport for SmtpMailTransport {
    fn name(&self) -> &'static str {
        "smtp"
    }

    async fn send(&self, message: &MailMessage) -> Result<DeliveryReceipt, MailError> {
        let message_id = self.new_message_id();
        let email = build_message(message, message_id.clone())?;

        let response = self.transport.send(email).await.map_err(|e| {
            if e.is_permanent() {
                MailError::Rejected(e.to_string())
            } else {
                MailError::Unavailable(e.to_string())
            }
        })?;

        tracing::info!(
            transport = "smtp",
            message_id = %message_id,
            to = %message.to,
            code = %response.code(),
            "Email accepted by relay"
        );

        Ok(DeliveryReceipt { message_id })
    }
}
