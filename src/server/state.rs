use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::Settings;
use crate::events::{EventRouter, RouterConfig};
use crate::notification::{create_notification_store, NotificationStore};
use crate::queue::{create_job_store, JobQueue, QueueName, QueuePolicy, RuntimeOptions};
use crate::redis::RedisPool;
use crate::template::TemplateRenderer;
use crate::workers::{create_mail_transport, EmailWorker, InAppWorker, MailError, MailTransport};

/// Runtime context built once at boot and shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub redis_pool: Option<Arc<RedisPool>>,
    pub email_queue: Arc<JobQueue>,
    pub in_app_queue: Arc<JobQueue>,
    pub store: Arc<dyn NotificationStore>,
    pub renderer: Arc<TemplateRenderer>,
    pub transport: Arc<dyn MailTransport>,
    pub router: Arc<EventRouter>,
    pub start_time: Instant,
}

impl AppState {
    /// Build the state with the mail transport selected by `mail.transport`.
    pub fn new(settings: Settings, redis_pool: Option<Arc<RedisPool>>) -> Result<Self, MailError> {
        let transport = create_mail_transport(&settings.mail)?;
        Ok(Self::with_transport(settings, redis_pool, transport))
    }

    /// Build the state around a specific mail transport.
    pub fn with_transport(
        settings: Settings,
        redis_pool: Option<Arc<RedisPool>>,
        transport: Arc<dyn MailTransport>,
    ) -> Self {
        let job_store = create_job_store(&settings.queue, redis_pool.clone());
        let options = RuntimeOptions::from(&settings.queue);

        let email_queue = JobQueue::new(
            QueueName::Email,
            QueuePolicy::from(&settings.queue.email),
            options.clone(),
            job_store.clone(),
        );
        let in_app_queue = JobQueue::new(
            QueueName::InApp,
            QueuePolicy::from(&settings.queue.in_app),
            options,
            job_store,
        );

        let store = create_notification_store(&settings.store, redis_pool.clone());
        let renderer = Arc::new(TemplateRenderer::from_config(&settings.templates));
        let router = Arc::new(EventRouter::new(
            email_queue.clone(),
            in_app_queue.clone(),
            RouterConfig::from(&settings.events),
        ));

        Self {
            settings: Arc::new(settings),
            redis_pool,
            email_queue,
            in_app_queue,
            store,
            renderer,
            transport,
            router,
            start_time: Instant::now(),
        }
    }

    /// Attach the workers to both queues and start consuming.
    pub async fn start_workers(&self) {
        let email_worker = EmailWorker::new(
            self.renderer.clone(),
            self.transport.clone(),
            self.settings.mail.from.clone(),
            Duration::from_millis(self.settings.mail.timeout_ms),
        );
        let in_app_worker = InAppWorker::new(
            self.store.clone(),
            Duration::from_millis(self.settings.store.operation_timeout_ms),
        );

        self.email_queue.start(Arc::new(email_worker)).await;
        self.in_app_queue.start(Arc::new(in_app_worker)).await;

        tracing::info!(
            email_concurrency = self.email_queue.policy().concurrency,
            in_app_concurrency = self.in_app_queue.policy().concurrency,
            "Queue workers started"
        );
    }

    pub fn queue(&self, name: QueueName) -> &Arc<JobQueue> {
        match name {
            QueueName::Email => &self.email_queue,
            QueueName::InApp => &self.in_app_queue,
        }
    }

    pub fn queues(&self) -> [&Arc<JobQueue>; 2] {
        [&self.email_queue, &self.in_app_queue]
    }
}
