mod settings;

pub use settings::{
    ApiConfig, BackoffKind, EventsConfig, MailConfig, QueuePolicyConfig, QueueSettings,
    RedisConfig, ServerConfig, Settings, SmtpConfig, StoreConfig, TemplateConfig,
};
