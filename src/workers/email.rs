//! Email queue worker.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::timeout;

use crate::metrics::EMAILS_SENT_TOTAL;
use crate::queue::{Job, JobError, JobHandler};
use crate::template::TemplateRenderer;

use super::mail::{MailMessage, MailTransport};

/// Payload of an email job.
///
/// Either `html`/`text` is given directly, or `template` is rendered with
/// `templateData`. With neither, the generic template renders `templateData`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailPayload {
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub html: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub template_data: Option<Value>,
}

/// Default template name for payloads without content; resolves to the passthrough body.
const GENERIC_TEMPLATE: &str = "notification";

pub struct EmailWorker {
    renderer: Arc<TemplateRenderer>,
    transport: Arc<dyn MailTransport>,
    from: String,
    send_timeout: Duration,
}

impl EmailWorker {
    pub fn new(
        renderer: Arc<TemplateRenderer>,
        transport: Arc<dyn MailTransport>,
        from: impl Into<String>,
        send_timeout: Duration,
    ) -> Self {
        Self {
            renderer,
            transport,
            from: from.into(),
            send_timeout,
        }
    }

    async fn build_message(&self, payload: EmailPayload) -> MailMessage {
        let subject = payload
            .subject
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "Notification".to_string());

        let (html, text) = if payload.html.is_some() || payload.text.is_some() {
            (payload.html, payload.text)
        } else {
            let name = payload.template.as_deref().unwrap_or(GENERIC_TEMPLATE);
            let data = payload.template_data.unwrap_or_else(|| json!({}));
            (Some(self.renderer.render(name, &data).await), None)
        };

        MailMessage {
            from: self.from.clone(),
            to: payload.to,
            subject,
            html,
            text,
        }
    }
}

#[async_trait]
impl JobHandler for EmailWorker {
    async fn handle(&self, job: &Job) -> Result<Value, JobError> {
        let payload: EmailPayload = serde_json::from_value(job.payload.clone())
            .map_err(|e| JobError::InvalidPayload(e.to_string()))?;
        if payload.to.trim().is_empty() {
            return Err(JobError::InvalidPayload("missing recipient".to_string()));
        }

        let message = self.build_message(payload).await;
        let timeout_ms = self.send_timeout.as_millis() as u64;

        let receipt = timeout(self.send_timeout, self.transport.send(&message))
            .await
            .map_err(|_| JobError::Timeout(timeout_ms))?
            .map_err(|e| JobError::Delivery(e.to_string()))?;

        EMAILS_SENT_TOTAL.inc();
        tracing::info!(
            job_id = %job.id,
            job_type = %job.job_type,
            transport = self.transport.name(),
            message_id = %receipt.message_id,
            "Email job sent"
        );

        Ok(json!({
            "messageId": receipt.message_id,
            "recipient": message.to,
        }))
    }
}
