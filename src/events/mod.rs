//! Domain event ingestion.
//!
//! Events arrive from the accounts, catalog and order services. Each event
//! type maps to a fixed set of email and in-app jobs; validation runs before
//! anything is submitted, so a rejected event leaves the queues untouched.

pub mod router;
pub mod types;

pub use router::{route, DispatchedJob, EventRouter, RouterConfig};
pub use types::{text_at, value_at, DomainEvent, EventError, EventType, EventTypeInfo};
