//! Assembles the client-to-relay wire frames: `REQ`, `CLOSE`, and `EVENT`.

use serde_json::{json, Value};

use crate::event::Event;
use crate::message_type::ClientMessageType;
use crate::subscription::Subscription;

/// A `REQ` request: a subscription id followed by one or more filters.
#[derive(Debug, Clone)]
pub struct Request {
    pub subscription_id: String,
    pub filters: Vec<Value>,
}

impl Request {
    pub fn from_subscription(subscription: &Subscription) -> Self {
        Request {
            subscription_id: subscription.id.clone(),
            filters: subscription.filters.0.iter().map(crate::filter::Filter::to_json_object).collect(),
        }
    }

    /// `["REQ", <subscription_id>, <filter>, ...]`
    pub fn to_message(&self) -> Value {
        let mut frame = vec![Value::String(ClientMessageType::Req.as_str().to_string()), Value::String(self.subscription_id.clone())];
        frame.extend(self.filters.clone());
        Value::Array(frame)
    }
}

/// `["CLOSE", <subscription_id>]`
pub fn close_message(subscription_id: &str) -> Value {
    json!([ClientMessageType::Close.as_str(), subscription_id])
}

/// `["EVENT", <event>]`
pub fn event_message(event: &Event) -> Value {
    json!([ClientMessageType::Event.as_str(), event.to_dict()])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{Filter, FilterSet};

    #[test]
    fn test_request_message_shape() {
        let sub = Subscription::new("s1", FilterSet::new(vec![Filter::new()]));
        let request = Request::from_subscription(&sub);
        let message = request.to_message();
        assert_eq!(message, json!(["REQ", "s1", {}]));
    }

    #[test]
    fn test_request_carries_multiple_filters() {
        let mut kind_filter = Filter::new();
        kind_filter.kinds = vec![1];
        let sub = Subscription::new("s2", FilterSet::new(vec![Filter::new(), kind_filter]));
        let request = Request::from_subscription(&sub);
        let message = request.to_message();
        let array = message.as_array().unwrap();
        assert_eq!(array.len(), 4);
        assert_eq!(array[0], json!("REQ"));
        assert_eq!(array[1], json!("s2"));
    }

    #[test]
    fn test_close_message_shape() {
        assert_eq!(close_message("s1"), json!(["CLOSE", "s1"]));
    }
}
