//! Domain event types and validation

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::queue::QueueError;

#[derive(Debug, Error)]
pub enum EventError {
    #[error("Unknown event type: {0}")]
    UnknownType(String),

    #[error("Invalid event data: {0}")]
    InvalidData(String),

    #[error("Event {event_type} is missing required field '{field}'")]
    MissingField {
        event_type: EventType,
        field: &'static str,
    },

    #[error("Failed to submit job: {0}")]
    Submission(#[from] QueueError),
}

impl EventError {
    /// Short label used for the rejection metric.
    pub fn reason(&self) -> &'static str {
        match self {
            EventError::UnknownType(_) => "unknown_type",
            EventError::InvalidData(_) => "invalid_data",
            EventError::MissingField { .. } => "missing_field",
            EventError::Submission(_) => "submission_failed",
        }
    }
}

/// Every event the router understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    UserRegistered,
    OrderCreated,
    OrderConfirmed,
    OrderShipped,
    OrderDelivered,
    OrderCancelled,
    ProductLowStock,
    AdminAction,
}

impl EventType {
    pub const ALL: [EventType; 8] = [
        EventType::UserRegistered,
        EventType::OrderCreated,
        EventType::OrderConfirmed,
        EventType::OrderShipped,
        EventType::OrderDelivered,
        EventType::OrderCancelled,
        EventType::ProductLowStock,
        EventType::AdminAction,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::UserRegistered => "user.registered",
            EventType::OrderCreated => "order.created",
            EventType::OrderConfirmed => "order.confirmed",
            EventType::OrderShipped => "order.shipped",
            EventType::OrderDelivered => "order.delivered",
            EventType::OrderCancelled => "order.cancelled",
            EventType::ProductLowStock => "product.low_stock",
            EventType::AdminAction => "admin.action",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            EventType::UserRegistered => "A user account was created; sends a welcome email and notification",
            EventType::OrderCreated => "An order was placed; sends a confirmation email and notification",
            EventType::OrderConfirmed => "An order was confirmed; sends a notification",
            EventType::OrderShipped => "An order left the warehouse; sends a shipping email and notification",
            EventType::OrderDelivered => "An order was delivered; sends a notification",
            EventType::OrderCancelled => "An order was cancelled; sends a notification",
            EventType::ProductLowStock => "A product is running low; alerts the admin by email",
            EventType::AdminAction => "An administrator performed an action; alerts the admin when enabled",
        }
    }

    /// Dotted paths that must be present and non-null in the event data.
    pub fn required_fields(&self) -> &'static [&'static str] {
        match self {
            EventType::UserRegistered => &["user.id", "user.email"],
            EventType::OrderCreated => &["order.id", "user.id", "user.email"],
            EventType::OrderConfirmed => &["order.id", "user.id"],
            EventType::OrderShipped => &["order.id", "user.id", "user.email"],
            EventType::OrderDelivered => &["order.id", "user.id"],
            EventType::OrderCancelled => &["order.id", "user.id"],
            EventType::ProductLowStock => &["product.id", "product.name"],
            EventType::AdminAction => &["action"],
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| EventError::UnknownType(s.to_string()))
    }
}

impl Serialize for EventType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Listing entry for `GET /events/types`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventTypeInfo {
    pub event_type: EventType,
    pub description: &'static str,
    pub required_fields: &'static [&'static str],
}

impl From<EventType> for EventTypeInfo {
    fn from(event_type: EventType) -> Self {
        Self {
            event_type,
            description: event_type.description(),
            required_fields: event_type.required_fields(),
        }
    }
}

/// A validated inbound event.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainEvent {
    pub event_type: EventType,
    pub data: Value,
}

impl DomainEvent {
    /// Resolve the type and check its required fields. Has no side effects.
    pub fn parse(event_type: &str, data: Value) -> Result<Self, EventError> {
        let event_type: EventType = event_type.parse()?;

        if !data.is_object() {
            return Err(EventError::InvalidData("data must be an object".to_string()));
        }

        for &field in event_type.required_fields() {
            if !is_present(value_at(&data, field)) {
                return Err(EventError::MissingField { event_type, field });
            }
        }

        Ok(Self { event_type, data })
    }
}

fn is_present(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(_) => true,
    }
}

/// Look up a dotted path such as `user.email`.
pub fn value_at<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(data, |current, key| current.get(key))
}

/// Text at a dotted path; numbers are stringified, anything else is empty.
pub fn text_at(data: &Value, path: &str) -> String {
    match value_at(data, path) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_known_types() {
        for t in EventType::ALL {
            assert_eq!(t.as_str().parse::<EventType>().unwrap(), t);
        }
        assert!(matches!(
            "user.deleted".parse::<EventType>(),
            Err(EventError::UnknownType(_))
        ));
    }

    #[test]
    fn test_missing_required_field() {
        let err = DomainEvent::parse("order.created", json!({"order": {"id": "o1"}, "user": {"id": "u1"}}))
            .unwrap_err();
        match err {
            EventError::MissingField { event_type, field } => {
                assert_eq!(event_type, EventType::OrderCreated);
                assert_eq!(field, "user.email");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_blank_string_counts_as_missing() {
        let result = DomainEvent::parse("user.registered", json!({"user": {"id": "u1", "email": " "}}));
        assert!(matches!(result, Err(EventError::MissingField { field: "user.email", .. })));
    }

    #[test]
    fn test_data_must_be_object() {
        assert!(matches!(
            DomainEvent::parse("admin.action", json!("reboot")),
            Err(EventError::InvalidData(_))
        ));
    }

    #[test]
    fn test_numeric_ids_accepted() {
        let event = DomainEvent::parse("order.delivered", json!({"order": {"id": 42}, "user": {"id": 7}})).unwrap();
        assert_eq!(text_at(&event.data, "order.id"), "42");
    }

    #[test]
    fn test_type_info_serialization() {
        let info = EventTypeInfo::from(EventType::ProductLowStock);
        let value = serde_json::to_value(info).unwrap();
        assert_eq!(value["eventType"], "product.low_stock");
        assert_eq!(value["requiredFields"], json!(["product.id", "product.name"]));
    }
}
