//! Canonical message model
//!
//! Every decoded frame, whether it arrived as an OCPP-J array or inside a
//! SOAP envelope, becomes a [`CanonicalMessage`]:
//!
//! - **Call**       initiates an operation (`uniqueId`, `action`, `payload`)
//! - **CallResult** concludes it successfully (`uniqueId`, `payload`)
//! - **CallError**  concludes it with a failure (`uniqueId`, `errorCode`,
//!   `errorDescription`, `payload`)

use std::fmt;

use serde_json::Value;

use super::fault::ProtocolFault;

// ── MessageKind ────────────────────────────────────────────────

/// Kind of an RPC message, with its OCPP-J `MessageTypeId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Call,
    CallResult,
    CallError,
}

impl MessageKind {
    pub fn type_id(&self) -> u64 {
        match self {
            Self::Call => 2,
            Self::CallResult => 3,
            Self::CallError => 4,
        }
    }

    pub fn from_type_id(id: u64) -> Option<Self> {
        match id {
            2 => Some(Self::Call),
            3 => Some(Self::CallResult),
            4 => Some(Self::CallError),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Call => "Call",
            Self::CallResult => "CallResult",
            Self::CallError => "CallError",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── CanonicalMessage ───────────────────────────────────────────

/// A decoded protocol frame, independent of its wire format.
#[derive(Debug, Clone, PartialEq)]
pub enum CanonicalMessage {
    Call {
        unique_id: String,
        action: String,
        payload: Value,
    },
    CallResult {
        unique_id: String,
        payload: Value,
    },
    CallError {
        unique_id: String,
        error_code: String,
        error_description: String,
        payload: Value,
    },
}

impl CanonicalMessage {
    pub fn call(unique_id: impl Into<String>, action: impl Into<String>, payload: Value) -> Self {
        Self::Call {
            unique_id: unique_id.into(),
            action: action.into(),
            payload,
        }
    }

    pub fn result(unique_id: impl Into<String>, payload: Value) -> Self {
        Self::CallResult {
            unique_id: unique_id.into(),
            payload,
        }
    }

    /// Build a `CallError` reply out of a fault.
    pub fn error(unique_id: impl Into<String>, fault: &ProtocolFault) -> Self {
        Self::CallError {
            unique_id: unique_id.into(),
            error_code: fault.code.clone(),
            error_description: fault.description.clone(),
            payload: fault.details.clone(),
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Call { .. } => MessageKind::Call,
            Self::CallResult { .. } => MessageKind::CallResult,
            Self::CallError { .. } => MessageKind::CallError,
        }
    }

    pub fn unique_id(&self) -> &str {
        match self {
            Self::Call { unique_id, .. }
            | Self::CallResult { unique_id, .. }
            | Self::CallError { unique_id, .. } => unique_id,
        }
    }

    pub fn action(&self) -> Option<&str> {
        match self {
            Self::Call { action, .. } => Some(action),
            _ => None,
        }
    }

    pub fn payload(&self) -> &Value {
        match self {
            Self::Call { payload, .. }
            | Self::CallResult { payload, .. }
            | Self::CallError { payload, .. } => payload,
        }
    }

    /// Outcome carried by a reply: the payload of a `CallResult` or the
    /// fault of a `CallError`. `None` for a `Call`.
    pub fn into_outcome(self) -> Option<Result<Value, ProtocolFault>> {
        match self {
            Self::Call { .. } => None,
            Self::CallResult { payload, .. } => Some(Ok(payload)),
            Self::CallError {
                error_code,
                error_description,
                payload,
                ..
            } => Some(Err(ProtocolFault::raw(error_code, error_description, payload))),
        }
    }
}
