// Infrastructure layer (shared components)
pub mod infrastructure;

pub use infrastructure::config;
pub use infrastructure::error;
pub use infrastructure::metrics;
pub use infrastructure::redis;

// Domain layer
pub mod events;
pub mod notification;
pub mod queue;
pub mod template;
pub mod workers;

// Application layer
pub mod api;
pub mod server;

// Supporting modules
pub mod shutdown;
