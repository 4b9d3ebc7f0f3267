//! JSON-RPC 1.0 message envelopes used by OVSDB.

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// OVSDB JSON-RPC methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    // Database discovery
    ListDbs,
    GetSchema,

    // Transactions
    Transact,
    Cancel,

    // Monitors
    Monitor,
    MonitorCond,
    MonitorCondSince,
    MonitorCancel,

    // Monitor notifications (server to client)
    Update,
    Update2,
    Update3,

    // Liveness
    Echo,
}

impl Method {
    /// Returns the wire name of the method.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::ListDbs => "list_dbs",
            Method::GetSchema => "get_schema",
            Method::Transact => "transact",
            Method::Cancel => "cancel",
            Method::Monitor => "monitor",
            Method::MonitorCond => "monitor_cond",
            Method::MonitorCondSince => "monitor_cond_since",
            Method::MonitorCancel => "monitor_cancel",
            Method::Update => "update",
            Method::Update2 => "update2",
            Method::Update3 => "update3",
            Method::Echo => "echo",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A method call expecting a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub method: String,
    #[serde(default)]
    pub params: Vec<Value>,
    pub id: Value,
}

impl Request {
    pub fn new(id: impl Into<Value>, method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            params: Vec::new(),
            id: id.into(),
        }
    }

    pub fn with_params(mut self, params: Vec<Value>) -> Self {
        self.params = params;
        self
    }
}

/// A method call without a response. Encoded with `"id": null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub method: String,
    #[serde(default)]
    pub params: Vec<Value>,
    #[serde(default)]
    id: Value,
}

impl Notification {
    pub fn new(method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            method: method.into(),
            params,
            id: Value::Null,
        }
    }
}

/// Response to a [`Request`].
///
/// Exactly one of `result` and `error` is non-null in a well formed
/// response. The error object is kept verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub error: Value,
    pub id: Value,
}

impl Response {
    pub fn ok(id: impl Into<Value>, result: Value) -> Self {
        Self {
            result,
            error: Value::Null,
            id: id.into(),
        }
    }

    pub fn error(id: impl Into<Value>, error: Value) -> Self {
        Self {
            result: Value::Null,
            error,
            id: id.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        !self.error.is_null()
    }

    /// Splits the response into its result or its remote error.
    pub fn into_result(self) -> Result<Value, Value> {
        if self.is_error() {
            Err(self.error)
        } else {
            Ok(self.result)
        }
    }
}

/// Any inbound JSON-RPC message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(Request),
    Notification(Notification),
    Response(Response),
}

impl Message {
    /// Classifies a decoded JSON value as a request, notification or response.
    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        let obj = value
            .as_object()
            .ok_or_else(|| ProtocolError::InvalidMessage("message is not an object".into()))?;

        if obj.contains_key("method") {
            let is_notification = obj.get("id").map_or(true, Value::is_null);
            if is_notification {
                return Ok(Message::Notification(serde_json::from_value(value)?));
            }
            return Ok(Message::Request(serde_json::from_value(value)?));
        }

        if obj.contains_key("id") && (obj.contains_key("result") || obj.contains_key("error")) {
            return Ok(Message::Response(serde_json::from_value(value)?));
        }

        Err(ProtocolError::InvalidMessage(format!(
            "neither a call nor a response: {}",
            value
        )))
    }

    /// Returns the method name for calls and notifications.
    pub fn method(&self) -> Option<&str> {
        match self {
            Message::Request(r) => Some(&r.method),
            Message::Notification(n) => Some(&n.method),
            Message::Response(_) => None,
        }
    }
}

impl From<Request> for Message {
    fn from(r: Request) -> Self {
        Message::Request(r)
    }
}

impl From<Notification> for Message {
    fn from(n: Notification) -> Self {
        Message::Notification(n)
    }
}

impl From<Response> for Message {
    fn from(r: Response) -> Self {
        Message::Response(r)
    }
}

impl Serialize for Message {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Message::Request(r) => r.serialize(serializer),
            Message::Notification(n) => n.serialize(serializer),
            Message::Response(r) => r.serialize(serializer),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_method_names() {
        assert_eq!(Method::MonitorCondSince.as_str(), "monitor_cond_since");
        assert_eq!(
            serde_json::to_value(Method::ListDbs).unwrap(),
            json!("list_dbs")
        );
        assert_eq!(Method::Update3.to_string(), "update3");
    }

    #[test]
    fn test_request_serialization() {
        let req = Request::new(7, Method::GetSchema.as_str()).with_params(vec![json!("db")]);
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({"method": "get_schema", "params": ["db"], "id": 7})
        );
    }

    #[test]
    fn test_notification_has_null_id() {
        let n = Notification::new("cancel", vec![json!(3)]);
        assert_eq!(
            serde_json::to_value(&n).unwrap(),
            json!({"method": "cancel", "params": [3], "id": null})
        );
    }

    #[test]
    fn test_classify_messages() {
        let msg = Message::from_value(json!({"method": "echo", "params": [], "id": "x"})).unwrap();
        assert!(matches!(msg, Message::Request(_)));

        let msg =
            Message::from_value(json!({"method": "update2", "params": ["m", {}], "id": null}))
                .unwrap();
        assert!(matches!(msg, Message::Notification(_)));
        assert_eq!(msg.method(), Some("update2"));

        let msg = Message::from_value(json!({"method": "update", "params": []})).unwrap();
        assert!(matches!(msg, Message::Notification(_)));

        let msg = Message::from_value(json!({"result": [1], "error": null, "id": 1})).unwrap();
        match msg {
            Message::Response(r) => {
                assert!(!r.is_error());
                assert_eq!(r.into_result(), Ok(json!([1])));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_classify_rejects_garbage() {
        assert!(Message::from_value(json!([1, 2])).is_err());
        assert!(Message::from_value(json!({"foo": 1})).is_err());
    }

    #[test]
    fn test_error_response_kept_verbatim() {
        let err = json!({"error": "unknown database", "details": "no db"});
        let resp = Response::error(2, err.clone());
        assert!(resp.is_error());
        assert_eq!(resp.into_result(), Err(err));
    }
}
