use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub queue: QueueSettings,
    #[serde(default)]
    pub templates: TemplateConfig,
    #[serde(default)]
    pub mail: MailConfig,
    #[serde(default)]
    pub events: EventsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
    /// Consecutive failures before the circuit opens
    #[serde(default = "default_cb_failure_threshold")]
    pub circuit_breaker_failure_threshold: u32,
    /// Successes in half-open state before the circuit closes
    #[serde(default = "default_cb_success_threshold")]
    pub circuit_breaker_success_threshold: u32,
    #[serde(default = "default_cb_reset_timeout")]
    pub circuit_breaker_reset_timeout_seconds: u64,
    #[serde(default = "default_backoff_initial_delay")]
    pub backoff_initial_delay_ms: u64,
    #[serde(default = "default_backoff_max_delay")]
    pub backoff_max_delay_ms: u64,
    /// Connection attempts made at startup before giving up
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
    /// Upper bound for a single Redis command
    #[serde(default = "default_command_timeout")]
    pub command_timeout_ms: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiConfig {
    /// Optional key required on admin endpoints (X-API-Key header)
    pub key: Option<String>,
}

/// Notification feed storage settings
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// "memory" or "redis"
    #[serde(default = "default_backend")]
    pub backend: String,
    /// Retention window for feed list and detail records
    #[serde(default = "default_feed_ttl")]
    pub ttl_seconds: u64,
    /// Feed list is trimmed to this many ids on append
    #[serde(default = "default_max_feed_size")]
    pub max_feed_size: usize,
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    Exponential,
    Fixed,
}

/// Retry and retention policy for a single queue
#[derive(Debug, Clone, Deserialize)]
pub struct QueuePolicyConfig {
    pub concurrency: usize,
    pub max_attempts: u32,
    pub backoff: BackoffKind,
    pub backoff_delay_ms: u64,
    pub keep_completed: usize,
    pub keep_failed: usize,
}

impl QueuePolicyConfig {
    pub fn email_defaults() -> Self {
        Self {
            concurrency: 5,
            max_attempts: 3,
            backoff: BackoffKind::Exponential,
            backoff_delay_ms: 5_000,
            keep_completed: 50,
            keep_failed: 20,
        }
    }

    pub fn in_app_defaults() -> Self {
        Self {
            concurrency: 10,
            max_attempts: 2,
            backoff: BackoffKind::Fixed,
            backoff_delay_ms: 2_000,
            keep_completed: 100,
            keep_failed: 50,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueSettings {
    /// "memory" or "redis"
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_queue_prefix")]
    pub redis_prefix: String,
    /// Idle workers re-check for eligible jobs at this interval
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// An active job whose lease is not renewed within this window is stalled
    #[serde(default = "default_lease_duration")]
    pub lease_duration_ms: u64,
    #[serde(default = "default_stalled_interval")]
    pub stalled_check_interval_ms: u64,
    #[serde(default = "default_min_priority")]
    pub min_priority: u8,
    #[serde(default = "default_max_priority")]
    pub max_priority: u8,
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_seconds: u64,
    #[serde(default = "QueuePolicyConfig::email_defaults")]
    pub email: QueuePolicyConfig,
    #[serde(default = "QueuePolicyConfig::in_app_defaults")]
    pub in_app: QueuePolicyConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TemplateConfig {
    /// Directory holding `{name}.hbs` sources; built-ins are used when unset
    pub dir: Option<String>,
    #[serde(default = "default_locale")]
    pub locale: String,
    #[serde(default = "default_currency")]
    pub currency: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MailConfig {
    #[serde(default = "default_mail_from")]
    pub from: String,
    #[serde(default = "default_operation_timeout")]
    pub timeout_ms: u64,
    /// "smtp" delivers through `smtp`; "log" only logs (development)
    #[serde(default = "default_mail_transport")]
    pub transport: String,
    #[serde(default)]
    pub smtp: SmtpConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// "starttls", "tls" (implicit) or "none"
    #[serde(default = "default_smtp_tls")]
    pub tls: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventsConfig {
    /// Recipient of admin alert emails
    #[serde(default = "default_admin_email")]
    pub admin_email: String,
    /// Whether `admin.action` events produce an alert email
    #[serde(default)]
    pub notify_admin_actions: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8083
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_cb_failure_threshold() -> u32 {
    5
}

fn default_cb_success_threshold() -> u32 {
    2
}

fn default_cb_reset_timeout() -> u64 {
    30
}

fn default_backoff_initial_delay() -> u64 {
    100
}

fn default_backoff_max_delay() -> u64 {
    30_000
}

fn default_connect_attempts() -> u32 {
    5
}

fn default_command_timeout() -> u64 {
    3_000
}

fn default_backend() -> String {
    "memory".to_string()
}

fn default_feed_ttl() -> u64 {
    7 * 24 * 60 * 60 // 7 days
}

fn default_max_feed_size() -> usize {
    500
}

fn default_operation_timeout() -> u64 {
    5_000
}

fn default_queue_prefix() -> String {
    "dispatch:queue".to_string()
}

fn default_poll_interval() -> u64 {
    500
}

fn default_lease_duration() -> u64 {
    30_000
}

fn default_stalled_interval() -> u64 {
    30_000
}

fn default_min_priority() -> u8 {
    1
}

fn default_max_priority() -> u8 {
    10
}

fn default_shutdown_timeout() -> u64 {
    15
}

fn default_locale() -> String {
    "en-US".to_string()
}

fn default_currency() -> String {
    "USD".to_string()
}

fn default_mail_from() -> String {
    "no-reply@example.com".to_string()
}

fn default_mail_transport() -> String {
    "log".to_string()
}

fn default_smtp_port() -> u16 {
    587
}

fn default_smtp_tls() -> String {
    "starttls".to_string()
}

fn default_admin_email() -> String {
    "admin@example.com".to_string()
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());
        let email = QueuePolicyConfig::email_defaults();
        let in_app = QueuePolicyConfig::in_app_defaults();

        let builder = Config::builder()
            // Per-queue policies are nested, so every field needs a default
            // for partial environment overrides to deserialize.
            .set_default("queue.email.concurrency", email.concurrency as u64)?
            .set_default("queue.email.max_attempts", email.max_attempts as u64)?
            .set_default("queue.email.backoff", "exponential")?
            .set_default("queue.email.backoff_delay_ms", email.backoff_delay_ms)?
            .set_default("queue.email.keep_completed", email.keep_completed as u64)?
            .set_default("queue.email.keep_failed", email.keep_failed as u64)?
            .set_default("queue.in_app.concurrency", in_app.concurrency as u64)?
            .set_default("queue.in_app.max_attempts", in_app.max_attempts as u64)?
            .set_default("queue.in_app.backoff", "fixed")?
            .set_default("queue.in_app.backoff_delay_ms", in_app.backoff_delay_ms)?
            .set_default("queue.in_app.keep_completed", in_app.keep_completed as u64)?
            .set_default("queue.in_app.keep_failed", in_app.keep_failed as u64)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // SERVER__PORT, REDIS__URL, QUEUE__EMAIL__CONCURRENCY, ...
            .add_source(
                Environment::default()
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("server.cors_origins"),
            );

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject configurations the queue runtime cannot honour.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue.min_priority > self.queue.max_priority {
            return Err(ConfigError::Message(format!(
                "queue.min_priority ({}) exceeds queue.max_priority ({})",
                self.queue.min_priority, self.queue.max_priority
            )));
        }

        for (name, policy) in [("email", &self.queue.email), ("in_app", &self.queue.in_app)] {
            if policy.max_attempts == 0 {
                return Err(ConfigError::Message(format!(
                    "queue.{}.max_attempts must be at least 1",
                    name
                )));
            }
            if policy.concurrency == 0 {
                return Err(ConfigError::Message(format!(
                    "queue.{}.concurrency must be at least 1",
                    name
                )));
            }
        }

        Ok(())
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: vec![],
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            circuit_breaker_failure_threshold: default_cb_failure_threshold(),
            circuit_breaker_success_threshold: default_cb_success_threshold(),
            circuit_breaker_reset_timeout_seconds: default_cb_reset_timeout(),
            backoff_initial_delay_ms: default_backoff_initial_delay(),
            backoff_max_delay_ms: default_backoff_max_delay(),
            connect_attempts: default_connect_attempts(),
            command_timeout_ms: default_command_timeout(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            ttl_seconds: default_feed_ttl(),
            max_feed_size: default_max_feed_size(),
            operation_timeout_ms: default_operation_timeout(),
        }
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            redis_prefix: default_queue_prefix(),
            poll_interval_ms: default_poll_interval(),
            lease_duration_ms: default_lease_duration(),
            stalled_check_interval_ms: default_stalled_interval(),
            min_priority: default_min_priority(),
            max_priority: default_max_priority(),
            shutdown_timeout_seconds: default_shutdown_timeout(),
            email: QueuePolicyConfig::email_defaults(),
            in_app: QueuePolicyConfig::in_app_defaults(),
        }
    }
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            dir: None,
            locale: default_locale(),
            currency: default_currency(),
        }
    }
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            from: default_mail_from(),
            timeout_ms: default_operation_timeout(),
            transport: default_mail_transport(),
            smtp: SmtpConfig::default(),
        }
    }
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: default_smtp_port(),
            username: None,
            password: None,
            tls: default_smtp_tls(),
        }
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            admin_email: default_admin_email(),
            notify_admin_actions: false,
        }
    }
}
