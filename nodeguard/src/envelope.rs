//! The normalized result contract of every mutating operation.
//!
//! Whatever an engine command produces (an [`EngineReply`], a loose JSON
//! mapping, a ready envelope, or an error) callers only ever observe a
//! [`ResultEnvelope`].

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::engine::EngineReply;

/// Classification of a failed envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// No strategy or config exists for the node.
    ConfigNotFound,
    /// Another delivery of the same job holds the lock.
    LockContention,
    /// The node has moved on since the action was scheduled.
    StaleTarget,
    /// The engine rejected the command.
    EngineCallFailure,
    /// An error or panic was caught at the facade boundary.
    Unexpected,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigNotFound => write!(f, "config_not_found"),
            Self::LockContention => write!(f, "lock_contention"),
            Self::StaleTarget => write!(f, "stale_target"),
            Self::EngineCallFailure => write!(f, "engine_call_failure"),
            Self::Unexpected => write!(f, "unexpected"),
        }
    }
}

impl ErrorKind {
    /// Returns true for outcomes that are expected no-ops rather than failures.
    #[must_use]
    pub fn is_soft(&self) -> bool {
        matches!(self, Self::ConfigNotFound | Self::LockContention | Self::StaleTarget)
    }
}

/// `{ok, data, message, error_kind, error_detail}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEnvelope {
    /// Whether the operation succeeded.
    pub ok: bool,
    /// Optional payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Human-readable message.
    #[serde(default)]
    pub message: String,
    /// Failure classification; `None` when `ok`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Error text or trace, when available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl ResultEnvelope {
    /// A successful envelope carrying data.
    #[must_use]
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            message: String::new(),
            error_kind: None,
            error_detail: None,
        }
    }

    /// A successful envelope without data.
    #[must_use]
    pub fn ok_empty() -> Self {
        Self {
            ok: true,
            data: None,
            message: String::new(),
            error_kind: None,
            error_detail: None,
        }
    }

    /// A failed envelope of the given kind.
    #[must_use]
    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            message: message.into(),
            error_kind: Some(kind),
            error_detail: None,
        }
    }

    /// The engine rejected the command.
    #[must_use]
    pub fn engine_failure(message: impl Into<String>) -> Self {
        Self::failure(ErrorKind::EngineCallFailure, message)
    }

    /// An error was caught at the boundary.
    #[must_use]
    pub fn unexpected(message: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::failure(ErrorKind::Unexpected, message).with_detail(detail)
    }

    /// The targeted node has progressed; nothing was done.
    #[must_use]
    pub fn stale(message: impl Into<String>) -> Self {
        Self::failure(ErrorKind::StaleTarget, message)
    }

    /// No configuration exists for the target.
    #[must_use]
    pub fn config_not_found(message: impl Into<String>) -> Self {
        Self::failure(ErrorKind::ConfigNotFound, message)
    }

    /// Sets the message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Sets the error detail.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.error_detail = Some(detail.into());
        self
    }

    /// Returns true if the operation was not performed because its target went stale.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.error_kind == Some(ErrorKind::StaleTarget)
    }
}

impl From<EngineReply> for ResultEnvelope {
    fn from(reply: EngineReply) -> Self {
        if reply.result {
            Self {
                ok: true,
                data: reply.data,
                message: reply.message,
                error_kind: None,
                error_detail: None,
            }
        } else {
            Self {
                ok: false,
                data: reply.data,
                message: reply.message,
                error_kind: Some(ErrorKind::EngineCallFailure),
                error_detail: reply.exc,
            }
        }
    }
}

/// Anything an engine command may produce on success.
pub trait IntoEnvelope {
    /// Converts into the normalized envelope.
    fn into_envelope(self) -> ResultEnvelope;
}

impl IntoEnvelope for ResultEnvelope {
    fn into_envelope(self) -> ResultEnvelope {
        self
    }
}

impl IntoEnvelope for EngineReply {
    fn into_envelope(self) -> ResultEnvelope {
        self.into()
    }
}

/// A mapping carrying a boolean `result` key is read as an engine reply;
/// any other value is treated as the data of a successful call.
impl IntoEnvelope for serde_json::Value {
    fn into_envelope(self) -> ResultEnvelope {
        let looks_like_reply = self
            .as_object()
            .is_some_and(|obj| obj.get("result").is_some_and(serde_json::Value::is_boolean));

        if looks_like_reply {
            match serde_json::from_value::<EngineReply>(self.clone()) {
                Ok(reply) => reply.into(),
                Err(_) => ResultEnvelope::ok(self),
            }
        } else {
            ResultEnvelope::ok(self)
        }
    }
}

impl IntoEnvelope for () {
    fn into_envelope(self) -> ResultEnvelope {
        ResultEnvelope::ok_empty()
    }
}
