//! # Envelopes
//!
//! The structured request and response payloads exchanged over the
//! substrate. A request names a method and carries its arguments; a
//! response echoes the request id and carries exactly one of a result or a
//! classified error, discriminated by `ok`.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Classification of a failed call, carried on the wire as a string code.
///
/// These represent the *remote* side failing; transport and codec failures
/// are separate error types that never cross the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorCode {
    /// The requested method does not exist on the service.
    NoSuchMethod,
    /// The request payload could not be decoded.
    MalformedRequest,
    /// The method ran and failed without a more specific classification.
    Internal,
    /// A code minted by another implementation; preserved verbatim.
    Other(String),
}

impl ErrorCode {
    pub fn as_str(&self) -> &str {
        match self {
            Self::NoSuchMethod => "NO_SUCH_METHOD",
            Self::MalformedRequest => "MALFORMED_REQUEST",
            Self::Internal => "INTERNAL",
            Self::Other(code) => code,
        }
    }

    fn from_wire(code: String) -> Self {
        match code.as_str() {
            "NO_SUCH_METHOD" => Self::NoSuchMethod,
            "MALFORMED_REQUEST" => Self::MalformedRequest,
            "INTERNAL" => Self::Internal,
            _ => Self::Other(code),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// Wire form is the bare code string.
impl Serialize for ErrorCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ErrorCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::from_wire)
    }
}

/// A classified failure produced by a service implementation or by the
/// handler on its behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallFailure {
    pub code: ErrorCode,
    pub message: String,
}

impl CallFailure {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    /// The default classification for a method that failed without saying
    /// more about why.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    pub fn no_such_method(method: &str) -> Self {
        Self::new(ErrorCode::NoSuchMethod, format!("no such method: {}", method))
    }

    pub fn malformed_request(detail: impl Into<String>) -> Self {
        Self::new(ErrorCode::MalformedRequest, detail)
    }
}

impl fmt::Display for CallFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for CallFailure {}

/// The error half of a response, as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
}

/// A method invocation in flight from client to handler.
///
/// `request_id` is unique per in-flight call on the client and is echoed
/// back in the response for correlation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    #[serde(rename = "requestId")]
    pub request_id: String,
    pub method: String,
    pub args: Vec<Value>,
}

impl RequestEnvelope {
    pub fn new(request_id: impl Into<String>, method: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            request_id: request_id.into(),
            method: method.into(),
            args,
        }
    }
}

/// The handler's answer to a request. Exactly one of `result`/`error` is
/// meaningful, discriminated by `ok`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    #[serde(rename = "requestId")]
    pub request_id: String,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
}

impl ResponseEnvelope {
    pub fn success(request_id: impl Into<String>, result: Value) -> Self {
        Self {
            request_id: request_id.into(),
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(request_id: impl Into<String>, failure: CallFailure) -> Self {
        Self {
            request_id: request_id.into(),
            ok: false,
            result: None,
            error: Some(ErrorPayload {
                message: failure.message,
                code: Some(failure.code),
            }),
        }
    }

    /// Collapses the wire shape into the call's outcome.
    ///
    /// A success with no result decodes as `Value::Null`; a failure with no
    /// payload (malformed peer) decodes as an internal failure, so the
    /// caller always gets something classified.
    pub fn into_result(self) -> std::result::Result<Value, CallFailure> {
        if self.ok {
            Ok(self.result.unwrap_or(Value::Null))
        } else {
            match self.error {
                Some(payload) => Err(CallFailure {
                    code: payload.code.unwrap_or(ErrorCode::Internal),
                    message: payload.message,
                }),
                None => Err(CallFailure::internal("response carried no error payload")),
            }
        }
    }
}
