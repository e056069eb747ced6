//! Job handlers for the two queues.
//!
//! - `EmailWorker`: renders and sends email through a `MailTransport`
//! - `InAppWorker`: persists notifications to the `NotificationStore`
//!
//! Mail transports live in `mail` (trait, factory, log) and `smtp`.

pub mod email;
pub mod in_app;
pub mod mail;
pub mod smtp;

pub use email::{EmailPayload, EmailWorker};
pub use in_app::{InAppPayload, InAppWorker};
pub use mail::{
    create_mail_transport, DeliveryReceipt, LogMailTransport, MailError, MailMessage,
    MailTransport,
};
pub use smtp::SmtpMailTransport;
