//! Email template rendering.
//!
//! This module provides:
//! - A handlebars-style template language (variables, `if`/`unless`/`each` blocks, helpers)
//! - Locale-aware `formatCurrency` / `formatDate` helpers and comparison helpers
//! - Built-in templates for the standard emails
//! - A name-keyed compile cache with explicit invalidation
//!
//! # Example
//!
//! ```ignore
//! let renderer = TemplateRenderer::from_config(&settings.templates);
//!
//! let html = renderer
//!     .render("order-shipped", &json!({"order": {"id": "o1"}, "trackingNumber": "T1"}))
//!     .await;
//!
//! // Pick up edited files
//! renderer.invalidate("order-shipped");
//! ```

pub mod builtin;
mod helpers;
mod parser;
mod renderer;
mod types;

pub use helpers::HelperContext;
pub use renderer::{escape_html, CompiledTemplate, TemplateRenderer, TemplateSource};
pub use types::{TemplateError, TemplateResult};
