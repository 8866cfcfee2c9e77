//! Protocol message types for module↔host communication.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Socket path the host listens on when nothing else is configured.
pub const DEFAULT_SOCKET: &str = "../juno.sock";

/// Correlation token attached to a request and echoed in its reply.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Wraps an existing token.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the token as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for RequestId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Numeric `type` tag carried by every message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
#[repr(u8)]
pub enum MessageType {
    /// Module → host handshake.
    Initialize = 1,
    /// Host acknowledges the handshake.
    InitializeAck = 2,
    /// Function invocation, in either direction.
    FunctionCall = 3,
    /// Result of a function invocation, in either direction.
    FunctionResponse = 4,
    /// Module subscribes to a hook.
    RegisterHook = 5,
    /// Host acknowledges a hook subscription.
    HookRegistered = 6,
    /// Module fires a hook.
    TriggerHook = 7,
    /// Host notifies the module that a hook fired.
    HookFired = 8,
    /// Module declares a function the host may call.
    DeclareFunction = 9,
    /// Host acknowledges a function declaration.
    FunctionDeclared = 10,
}

impl MessageType {
    /// Returns the wire code.
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Maps a wire code back to a message type.
    pub const fn from_code(code: u64) -> Option<Self> {
        Some(match code {
            1 => Self::Initialize,
            2 => Self::InitializeAck,
            3 => Self::FunctionCall,
            4 => Self::FunctionResponse,
            5 => Self::RegisterHook,
            6 => Self::HookRegistered,
            7 => Self::TriggerHook,
            8 => Self::HookFired,
            9 => Self::DeclareFunction,
            10 => Self::FunctionDeclared,
            _ => return None,
        })
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Initialize => "initialize",
            Self::InitializeAck => "initialize-ack",
            Self::FunctionCall => "function-call",
            Self::FunctionResponse => "function-response",
            Self::RegisterHook => "register-hook",
            Self::HookRegistered => "hook-registered",
            Self::TriggerHook => "trigger-hook",
            Self::HookFired => "hook-fired",
            Self::DeclareFunction => "declare-function",
            Self::FunctionDeclared => "function-declared",
        })
    }
}

/// A single protocol message.
///
/// On the wire every variant is a flat JSON object keyed by a numeric
/// `type` tag (see [`MessageType`]) plus the camelCase fields of that type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Frame", into = "Frame")]
#[non_exhaustive]
pub enum Message {
    /// Handshake announcing the module to the host.
    Initialize {
        /// Correlation token.
        request_id: RequestId,
        /// Name the module registers under.
        module_id: String,
        /// Module version.
        version: String,
        /// Required modules mapped to version requirements.
        dependencies: BTreeMap<String, String>,
    },
    /// Reply to [`Message::Initialize`].
    InitializeAck {
        /// Token of the handshake being acknowledged.
        request_id: RequestId,
    },
    /// Function invocation, outbound (`call_function`) or inbound (host
    /// calling a declared function).
    FunctionCall {
        /// Correlation token.
        request_id: RequestId,
        /// Fully qualified function name.
        function: String,
        /// Call arguments; `None` when the field is absent, `Some(Value::Null)`
        /// when it is an explicit `null`.
        arguments: Option<Value>,
    },
    /// Result of a [`Message::FunctionCall`].
    FunctionResponse {
        /// Token of the call being answered.
        request_id: RequestId,
        /// Returned payload.
        data: Value,
    },
    /// Subscribe to a hook.
    RegisterHook {
        /// Correlation token.
        request_id: RequestId,
        /// Hook name.
        hook: String,
    },
    /// Reply to [`Message::RegisterHook`].
    HookRegistered {
        /// Token of the registration being acknowledged.
        request_id: RequestId,
    },
    /// Fire a hook on the host.
    TriggerHook {
        /// Correlation token.
        request_id: RequestId,
        /// Hook name.
        hook: String,
    },
    /// Host notification that a hook fired.
    HookFired {
        /// Token chosen by the host; never used for correlation.
        request_id: Option<RequestId>,
        /// Hook name.
        hook: String,
    },
    /// Declare a function the host may call.
    DeclareFunction {
        /// Correlation token.
        request_id: RequestId,
        /// Function name, local to the module.
        function: String,
    },
    /// Reply to [`Message::DeclareFunction`].
    FunctionDeclared {
        /// Token of the declaration being acknowledged.
        request_id: RequestId,
        /// Function name echoed by the host.
        function: String,
    },
}

impl Message {
    /// Returns the wire type of this message.
    pub const fn kind(&self) -> MessageType {
        match self {
            Self::Initialize { .. } => MessageType::Initialize,
            Self::InitializeAck { .. } => MessageType::InitializeAck,
            Self::FunctionCall { .. } => MessageType::FunctionCall,
            Self::FunctionResponse { .. } => MessageType::FunctionResponse,
            Self::RegisterHook { .. } => MessageType::RegisterHook,
            Self::HookRegistered { .. } => MessageType::HookRegistered,
            Self::TriggerHook { .. } => MessageType::TriggerHook,
            Self::HookFired { .. } => MessageType::HookFired,
            Self::DeclareFunction { .. } => MessageType::DeclareFunction,
            Self::FunctionDeclared { .. } => MessageType::FunctionDeclared,
        }
    }

    /// Returns the correlation token, if the message carries one.
    pub const fn request_id(&self) -> Option<&RequestId> {
        match self {
            Self::Initialize { request_id, .. }
            | Self::InitializeAck { request_id }
            | Self::FunctionCall { request_id, .. }
            | Self::FunctionResponse { request_id, .. }
            | Self::RegisterHook { request_id, .. }
            | Self::HookRegistered { request_id }
            | Self::TriggerHook { request_id, .. }
            | Self::DeclareFunction { request_id, .. }
            | Self::FunctionDeclared { request_id, .. } => Some(request_id),
            Self::HookFired { request_id, .. } => request_id.as_ref(),
        }
    }
}

/// Flat record shape shared by every message on the wire.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Frame {
    /// Numeric message type.
    #[serde(rename = "type")]
    kind: u64,
    /// Correlation token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    request_id: Option<RequestId>,
    /// Module name (type 1).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    module_id: Option<String>,
    /// Module version (type 1).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    version: Option<String>,
    /// Dependency map (type 1).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    dependencies: Option<BTreeMap<String, String>>,
    /// Function name (types 3, 9, 10).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function: Option<String>,
    /// Call arguments (type 3). An explicit `null` is `Some(Value::Null)`.
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    arguments: Option<Value>,
    /// Response payload (type 4).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
    /// Hook name (types 5, 7, 8).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    hook: Option<String>,
}

/// Marks a field as present even when its value is `null`.
fn present<'de, D: serde::Deserializer<'de>>(d: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(d).map(Some)
}

/// Takes a mandatory field out of a [`Frame`] or names the missing one.
fn required<T>(field: Option<T>, name: &str, kind: MessageType) -> Result<T, String> {
    field.ok_or_else(|| format!("{kind} message missing `{name}`"))
}

impl TryFrom<Frame> for Message {
    type Error = String;

    fn try_from(f: Frame) -> Result<Self, Self::Error> {
        let kind = MessageType::from_code(f.kind)
            .ok_or_else(|| format!("unknown message type {}", f.kind))?;
        let request_id = |id: Option<RequestId>| required(id, "requestId", kind);

        Ok(match kind {
            MessageType::Initialize => Self::Initialize {
                request_id: request_id(f.request_id)?,
                module_id: required(f.module_id, "moduleId", kind)?,
                version: required(f.version, "version", kind)?,
                dependencies: f.dependencies.unwrap_or_default(),
            },
            MessageType::InitializeAck => Self::InitializeAck {
                request_id: request_id(f.request_id)?,
            },
            MessageType::FunctionCall => Self::FunctionCall {
                request_id: request_id(f.request_id)?,
                function: required(f.function, "function", kind)?,
                arguments: f.arguments,
            },
            MessageType::FunctionResponse => Self::FunctionResponse {
                request_id: request_id(f.request_id)?,
                data: f.data.unwrap_or(Value::Null),
            },
            MessageType::RegisterHook => Self::RegisterHook {
                request_id: request_id(f.request_id)?,
                hook: required(f.hook, "hook", kind)?,
            },
            MessageType::HookRegistered => Self::HookRegistered {
                request_id: request_id(f.request_id)?,
            },
            MessageType::TriggerHook => Self::TriggerHook {
                request_id: request_id(f.request_id)?,
                hook: required(f.hook, "hook", kind)?,
            },
            MessageType::HookFired => Self::HookFired {
                request_id: f.request_id,
                hook: required(f.hook, "hook", kind)?,
            },
            MessageType::DeclareFunction => Self::DeclareFunction {
                request_id: request_id(f.request_id)?,
                function: required(f.function, "function", kind)?,
            },
            MessageType::FunctionDeclared => Self::FunctionDeclared {
                request_id: request_id(f.request_id)?,
                function: required(f.function, "function", kind)?,
            },
        })
    }
}

impl From<Message> for Frame {
    fn from(msg: Message) -> Self {
        let kind = u64::from(msg.kind().code());
        match msg {
            Message::Initialize {
                request_id,
                module_id,
                version,
                dependencies,
            } => Self {
                kind,
                request_id: Some(request_id),
                module_id: Some(module_id),
                version: Some(version),
                dependencies: Some(dependencies),
                ..Self::default()
            },
            Message::InitializeAck { request_id } | Message::HookRegistered { request_id } => Self {
                kind,
                request_id: Some(request_id),
                ..Self::default()
            },
            Message::FunctionCall {
                request_id,
                function,
                arguments,
            } => Self {
                kind,
                request_id: Some(request_id),
                function: Some(function),
                arguments,
                ..Self::default()
            },
            Message::FunctionResponse { request_id, data } => Self {
                kind,
                request_id: Some(request_id),
                data: Some(data),
                ..Self::default()
            },
            Message::RegisterHook { request_id, hook } | Message::TriggerHook { request_id, hook } => {
                Self {
                    kind,
                    request_id: Some(request_id),
                    hook: Some(hook),
                    ..Self::default()
                }
            }
            Message::HookFired { request_id, hook } => Self {
                kind,
                request_id,
                hook: Some(hook),
                ..Self::default()
            },
            Message::DeclareFunction {
                request_id,
                function,
            }
            | Message::FunctionDeclared {
                request_id,
                function,
            } => Self {
                kind,
                request_id: Some(request_id),
                function: Some(function),
                ..Self::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn initialize_uses_wire_field_names() {
        let msg = Message::Initialize {
            request_id: "mod-1".into(),
            module_id: "test-module".into(),
            version: "1.0.0".into(),
            dependencies: BTreeMap::from([("test-module2".into(), "1.0.1".into())]),
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({
                "type": 1,
                "requestId": "mod-1",
                "moduleId": "test-module",
                "version": "1.0.0",
                "dependencies": { "test-module2": "1.0.1" }
            })
        );
    }

    #[test]
    fn initialize_without_dependencies_defaults_to_empty() {
        let msg: Message = serde_json::from_value(json!({
            "type": 1,
            "requestId": "a",
            "moduleId": "m",
            "version": "1.0.0"
        }))
        .unwrap();
        match msg {
            Message::Initialize { dependencies, .. } => assert!(dependencies.is_empty()),
            other => panic!("expected Initialize, got {other:?}"),
        }
    }

    #[test]
    fn function_call_arguments_are_optional() {
        let msg: Message = serde_json::from_value(json!({
            "type": 3,
            "requestId": "12345",
            "function": "test_fn"
        }))
        .unwrap();
        assert_eq!(
            msg,
            Message::FunctionCall {
                request_id: "12345".into(),
                function: "test_fn".into(),
                arguments: None,
            }
        );
        // Absent arguments stay absent when re-encoded.
        assert!(serde_json::to_value(&msg).unwrap().get("arguments").is_none());
    }

    #[test]
    fn null_arguments_differ_from_absent() {
        let msg: Message = serde_json::from_value(json!({
            "type": 3,
            "requestId": "12345",
            "function": "test_fn",
            "arguments": null
        }))
        .unwrap();
        assert_eq!(
            msg,
            Message::FunctionCall {
                request_id: "12345".into(),
                function: "test_fn".into(),
                arguments: Some(Value::Null),
            }
        );
        assert_eq!(serde_json::to_value(&msg).unwrap()["arguments"], Value::Null);
        assert!(serde_json::to_value(&msg).unwrap().get("arguments").is_some());
    }

    #[test]
    fn hook_fired_without_request_id() {
        let msg: Message = serde_json::from_value(json!({ "type": 8, "hook": "juno.activated" })).unwrap();
        assert_eq!(msg.kind(), MessageType::HookFired);
        assert!(msg.request_id().is_none());
    }

    #[test]
    fn function_response_keeps_null_data() {
        let msg = Message::FunctionResponse {
            request_id: "r".into(),
            data: Value::Null,
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({ "type": 4, "requestId": "r", "data": null })
        );
    }

    #[test]
    fn rejects_unknown_type() {
        let err = serde_json::from_value::<Message>(json!({ "type": 42, "requestId": "x" })).unwrap_err();
        assert!(err.to_string().contains("unknown message type 42"));
    }

    #[test]
    fn rejects_reply_without_request_id() {
        let err = serde_json::from_value::<Message>(json!({ "type": 2 })).unwrap_err();
        assert!(err.to_string().contains("requestId"));
    }

    #[test]
    fn type_codes_are_stable() {
        for code in 1..=10 {
            let kind = MessageType::from_code(code).unwrap();
            assert_eq!(u64::from(kind.code()), code);
        }
        assert!(MessageType::from_code(0).is_none());
        assert!(MessageType::from_code(11).is_none());
    }
}
