//! Dispatcher wire protocol.
//!
//! Every frame on the wire is one JSON object:
//!
//! ```text
//! { "namespace": "rpc" | "events", "id": <uuid>, "name": <kind>, "args": <payload> }
//! ```
//!
//! [`Envelope`] is the typed view of such a frame. The `name` discriminant
//! selects one [`Frame`] variant, each with its own payload type.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errno;
use crate::id::CallId;

/// Top-level routing namespace of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    Rpc,
    Events,
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Namespace::Rpc => write!(f, "rpc"),
            Namespace::Events => write!(f, "events"),
        }
    }
}

/// `rpc/call` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallArgs {
    pub method: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

/// `rpc/error` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorArgs {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stacktrace: Option<Value>,
}

/// `rpc/auth` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthArgs {
    pub username: String,
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
}

/// `rpc/auth_token` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthTokenArgs {
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
}

/// `events/event` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventArgs {
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

impl EventArgs {
    #[must_use]
    pub fn new(name: impl Into<String>, args: Value) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

/// `events/event_burst` payload
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EventBurstArgs {
    #[serde(default)]
    pub events: Vec<EventArgs>,
}

/// `events/logout` payload
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LogoutArgs {
    #[serde(default)]
    pub reason: Option<String>,
}

/// A decoded frame, discriminated by namespace and name
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Call(CallArgs),
    Response(Value),
    Error(ErrorArgs),
    Auth(AuthArgs),
    AuthToken(AuthTokenArgs),
    Event(EventArgs),
    EventBurst(EventBurstArgs),
    Subscribe(Vec<String>),
    Unsubscribe(Vec<String>),
    Logout(LogoutArgs),
}

impl Frame {
    #[must_use]
    pub fn namespace(&self) -> Namespace {
        match self {
            Frame::Call(_)
            | Frame::Response(_)
            | Frame::Error(_)
            | Frame::Auth(_)
            | Frame::AuthToken(_) => Namespace::Rpc,
            Frame::Event(_)
            | Frame::EventBurst(_)
            | Frame::Subscribe(_)
            | Frame::Unsubscribe(_)
            | Frame::Logout(_) => Namespace::Events,
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Frame::Call(_) => "call",
            Frame::Response(_) => "response",
            Frame::Error(_) => "error",
            Frame::Auth(_) => "auth",
            Frame::AuthToken(_) => "auth_token",
            Frame::Event(_) => "event",
            Frame::EventBurst(_) => "event_burst",
            Frame::Subscribe(_) => "subscribe",
            Frame::Unsubscribe(_) => "unsubscribe",
            Frame::Logout(_) => "logout",
        }
    }

    fn args(&self) -> Result<Value, serde_json::Error> {
        match self {
            Frame::Call(args) => serde_json::to_value(args),
            Frame::Response(value) => Ok(value.clone()),
            Frame::Error(args) => serde_json::to_value(args),
            Frame::Auth(args) => serde_json::to_value(args),
            Frame::AuthToken(args) => serde_json::to_value(args),
            Frame::Event(args) => serde_json::to_value(args),
            Frame::EventBurst(args) => serde_json::to_value(args),
            Frame::Subscribe(patterns) | Frame::Unsubscribe(patterns) => {
                serde_json::to_value(patterns)
            }
            Frame::Logout(args) => serde_json::to_value(args),
        }
    }

    fn from_parts(namespace: Namespace, name: &str, args: Value) -> Result<Self, DecodeError> {
        let frame = match (namespace, name) {
            (Namespace::Rpc, "call") => Frame::Call(payload(name, args)?),
            (Namespace::Rpc, "response") => Frame::Response(args),
            (Namespace::Rpc, "error") => Frame::Error(payload(name, args)?),
            (Namespace::Rpc, "auth") => Frame::Auth(payload(name, args)?),
            (Namespace::Rpc, "auth_token") => Frame::AuthToken(payload(name, args)?),
            (Namespace::Events, "event") => Frame::Event(payload(name, args)?),
            (Namespace::Events, "event_burst") => Frame::EventBurst(payload(name, args)?),
            (Namespace::Events, "subscribe") => Frame::Subscribe(payload(name, args)?),
            (Namespace::Events, "unsubscribe") => Frame::Unsubscribe(payload(name, args)?),
            (Namespace::Events, "logout") => {
                if args.is_null() {
                    Frame::Logout(LogoutArgs::default())
                } else {
                    Frame::Logout(payload(name, args)?)
                }
            }
            _ => {
                return Err(DecodeError::UnknownFrame {
                    namespace,
                    name: name.to_string(),
                });
            }
        };
        Ok(frame)
    }
}

fn payload<T: DeserializeOwned>(name: &str, args: Value) -> Result<T, DecodeError> {
    serde_json::from_value(args).map_err(|source| DecodeError::InvalidArgs {
        name: name.to_string(),
        source,
    })
}

/// Shape of a frame as it appears on the wire
#[derive(Debug, Serialize, Deserialize)]
struct RawEnvelope {
    namespace: Namespace,
    #[serde(default)]
    id: Option<String>,
    name: String,
    #[serde(default)]
    args: Value,
}

/// One complete wire message
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Correlation id. Servers send `null` for events and logouts.
    pub id: Option<CallId>,
    pub frame: Frame,
}

impl Envelope {
    /// Wrap a frame, filling the id with a fresh identifier when none is given.
    #[must_use]
    pub fn new(frame: Frame, id: Option<CallId>) -> Self {
        Self {
            id: Some(id.unwrap_or_default()),
            frame,
        }
    }

    /// Serialize this envelope to wire text.
    ///
    /// # Errors
    ///
    /// Returns an error if a payload cannot be represented as JSON.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        let raw = RawEnvelope {
            namespace: self.frame.namespace(),
            id: self.id.as_ref().map(ToString::to_string),
            name: self.frame.name().to_string(),
            args: self.frame.args()?,
        };
        serde_json::to_string(&raw)
    }

    /// Parse wire text into a typed envelope.
    ///
    /// # Errors
    ///
    /// Returns a [`DecodeError`] if the text is not JSON, names an unknown
    /// frame kind, or carries a payload of the wrong shape.
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        let raw: RawEnvelope = serde_json::from_str(text)?;
        let frame = Frame::from_parts(raw.namespace, &raw.name, raw.args)?;
        Ok(Self {
            id: raw.id.map(CallId::from),
            frame,
        })
    }
}

/// Reasons an inbound frame could not be decoded
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Malformed frame: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unknown frame {namespace}/{name}")]
    UnknownFrame { namespace: Namespace, name: String },

    #[error("Invalid arguments for '{name}': {source}")]
    InvalidArgs {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Structured failure of a single RPC call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("RPC error {code}: {message}")]
pub struct RpcException {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stacktrace: Option<Value>,
}

impl RpcException {
    #[must_use]
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            extra: None,
            stacktrace: None,
        }
    }

    /// Build an exception from a symbolic errno name such as `ETIMEDOUT`.
    #[must_use]
    pub fn from_errno(name: &str) -> Self {
        match errno::lookup(name) {
            Some(entry) => Self::new(entry.code, entry.description),
            None => Self::new(0, name),
        }
    }

    #[must_use]
    pub fn timed_out() -> Self {
        Self::from_errno("ETIMEDOUT")
    }

    #[must_use]
    pub fn connection_reset() -> Self {
        Self::from_errno("ECONNRESET")
    }

    /// Symbolic errno name for this exception's code, if it has one.
    #[must_use]
    pub fn errno_name(&self) -> Option<&'static str> {
        errno::name_of(self.code)
    }
}

impl From<ErrorArgs> for RpcException {
    fn from(args: ErrorArgs) -> Self {
        Self {
            code: args.code,
            message: args.message,
            extra: args.extra,
            stacktrace: args.stacktrace,
        }
    }
}

/// Credentials issued by a successful login
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    /// Token lifetime in seconds, `None` for sessions that never expire.
    pub lifetime: Option<u64>,
    pub username: String,
}

impl Session {
    /// Parse the `[token, lifetime, username]` triple returned by `auth`.
    ///
    /// Servers that answer with anything else still count as a successful
    /// login; the session is then empty.
    #[must_use]
    pub fn from_login_response(value: &Value) -> Self {
        serde_json::from_value::<(String, Option<u64>, String)>(value.clone())
            .map(|(token, lifetime, username)| Self {
                token,
                lifetime,
                username,
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_call_encoding() {
        let frame = Frame::Call(CallArgs {
            method: "system.info".to_string(),
            args: vec![],
        });
        let envelope = Envelope::new(frame, Some(CallId::from("abc")));
        let wire: Value = serde_json::from_str(&envelope.encode().unwrap()).unwrap();

        assert_eq!(wire["namespace"], "rpc");
        assert_eq!(wire["name"], "call");
        assert_eq!(wire["id"], "abc");
        assert_eq!(wire["args"], json!({"method": "system.info", "args": []}));
    }

    #[test]
    fn test_encode_fills_missing_id() {
        let envelope = Envelope::new(Frame::Subscribe(vec!["task.*".to_string()]), None);
        let wire: Value = serde_json::from_str(&envelope.encode().unwrap()).unwrap();

        assert_eq!(wire["id"].as_str().unwrap().len(), 36);
        assert_eq!(wire["namespace"], "events");
        assert_eq!(wire["args"], json!(["task.*"]));
    }

    #[test]
    fn test_decode_response() {
        let text = r#"{"namespace":"rpc","id":"42","name":"response","args":{"version":"1.0"}}"#;
        let envelope = Envelope::decode(text).unwrap();

        assert_eq!(envelope.id, Some(CallId::from("42")));
        assert_eq!(envelope.frame, Frame::Response(json!({"version": "1.0"})));
    }

    #[test]
    fn test_decode_error_with_extra() {
        let text = r#"{"namespace":"rpc","id":"1","name":"error",
            "args":{"code":13,"message":"Not logged in","extra":{"field":"x"}}}"#;
        let envelope = Envelope::decode(text).unwrap();

        let Frame::Error(args) = envelope.frame else {
            panic!("Expected Error frame");
        };
        let exception = RpcException::from(args);
        assert_eq!(exception.code, 13);
        assert_eq!(exception.message, "Not logged in");
        assert_eq!(exception.extra, Some(json!({"field": "x"})));
        assert!(exception.stacktrace.is_none());
    }

    #[test]
    fn test_decode_event_with_null_id_and_timestamp() {
        let text = r#"{"namespace":"events","id":null,"timestamp":1449000000.5,"name":"event",
            "args":{"name":"task.progress","args":{"percent":50}}}"#;
        let envelope = Envelope::decode(text).unwrap();

        assert!(envelope.id.is_none());
        assert_eq!(
            envelope.frame,
            Frame::Event(EventArgs::new("task.progress", json!({"percent": 50})))
        );
    }

    #[test]
    fn test_decode_event_burst() {
        let text = r#"{"namespace":"events","name":"event_burst","args":{"events":[
            {"name":"a","args":1},{"name":"b","args":2}]}}"#;
        let Frame::EventBurst(burst) = Envelope::decode(text).unwrap().frame else {
            panic!("Expected EventBurst frame");
        };

        let names: Vec<_> = burst.events.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["a", "b"]);
    }

    #[test]
    fn test_decode_logout_without_args() {
        let text = r#"{"namespace":"events","id":null,"name":"logout"}"#;
        let envelope = Envelope::decode(text).unwrap();
        assert_eq!(envelope.frame, Frame::Logout(LogoutArgs::default()));

        let text = r#"{"namespace":"events","name":"logout","args":{"reason":"idle"}}"#;
        let Frame::Logout(args) = Envelope::decode(text).unwrap().frame else {
            panic!("Expected Logout frame");
        };
        assert_eq!(args.reason.as_deref(), Some("idle"));
    }

    #[test]
    fn test_decode_malformed_text() {
        let result = Envelope::decode("not json at all");
        assert!(matches!(result, Err(DecodeError::Json(_))));
    }

    #[test]
    fn test_decode_unknown_namespace() {
        let result = Envelope::decode(r#"{"namespace":"shell","name":"spawn","args":{}}"#);
        assert!(matches!(result, Err(DecodeError::Json(_))));
    }

    #[test]
    fn test_decode_unknown_name() {
        let result = Envelope::decode(r#"{"namespace":"rpc","name":"teleport","args":{}}"#);
        match result {
            Err(DecodeError::UnknownFrame { namespace, name }) => {
                assert_eq!(namespace, Namespace::Rpc);
                assert_eq!(name, "teleport");
            }
            other => panic!("Expected UnknownFrame, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_wrong_payload_shape() {
        let result = Envelope::decode(r#"{"namespace":"rpc","id":"1","name":"error","args":"boom"}"#);
        let err = result.unwrap_err();
        assert!(matches!(err, DecodeError::InvalidArgs { .. }));
        assert!(err.to_string().contains("'error'"));
    }

    #[test]
    fn test_auth_omits_missing_resource() {
        let frame = Frame::Auth(AuthArgs {
            username: "root".to_string(),
            password: "secret".to_string(),
            resource: None,
        });
        let text = Envelope::new(frame, None).encode().unwrap();
        assert!(!text.contains("resource"));
        assert!(text.contains(r#""name":"auth""#));
    }

    #[test]
    fn test_rpc_exception_display() {
        let err = RpcException::new(22, "Invalid argument");
        assert_eq!(err.to_string(), "RPC error 22: Invalid argument");
        assert_eq!(err.errno_name(), Some("EINVAL"));
    }

    #[test]
    fn test_synthetic_exceptions() {
        let timeout = RpcException::timed_out();
        assert_eq!(timeout.code, 60);
        assert_eq!(timeout.message, "Operation timed out");

        let reset = RpcException::connection_reset();
        assert_eq!(reset.code, 54);
        assert_eq!(reset.message, "Connection reset by peer");
    }

    #[test]
    fn test_session_from_login_response() {
        let session = Session::from_login_response(&json!(["tok-1", 600, "root"]));
        assert_eq!(session.token, "tok-1");
        assert_eq!(session.lifetime, Some(600));
        assert_eq!(session.username, "root");

        let local = Session::from_login_response(&json!(["tok-2", null, "admin"]));
        assert_eq!(local.lifetime, None);

        let odd = Session::from_login_response(&json!({"ok": true}));
        assert_eq!(odd, Session::default());
    }
}
