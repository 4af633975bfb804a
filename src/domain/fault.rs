//! Protocol-shaped error replies
//!
//! OCPP-J reports failures as `CallError` frames (`errorCode`,
//! `errorDescription`, `errorDetails`) while OCPP-S uses a SOAP fault
//! (`Code`, `SubCode`, `Reason`, `Detail`). Both are produced from one
//! [`ProtocolFault`] value.

use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

/// Standard OCPP-J error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorCode {
    NotImplemented,
    NotSupported,
    InternalError,
    ProtocolError,
    SecurityError,
    FormationViolation,
    PropertyConstraintViolation,
    OccurenceConstraintViolation,
    TypeConstraintViolation,
    GenericError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotImplemented => "NotImplemented",
            Self::NotSupported => "NotSupported",
            Self::InternalError => "InternalError",
            Self::ProtocolError => "ProtocolError",
            Self::SecurityError => "SecurityError",
            Self::FormationViolation => "FormationViolation",
            Self::PropertyConstraintViolation => "PropertyConstraintViolation",
            Self::OccurenceConstraintViolation => "OccurenceConstraintViolation",
            Self::TypeConstraintViolation => "TypeConstraintViolation",
            Self::GenericError => "GenericError",
        }
    }
}

/// Transport-neutral failure reply.
///
/// `code` stays a string because charge points are free to send codes
/// outside the standard set.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{code}: {description}")]
pub struct ProtocolFault {
    pub code: String,
    pub description: String,
    pub details: Value,
}

impl ProtocolFault {
    pub fn new(code: ErrorCode, description: impl Into<String>) -> Self {
        Self {
            code: code.as_str().to_string(),
            description: description.into(),
            details: json!({}),
        }
    }

    /// Fault carrying a code received from a peer or the backend.
    pub fn raw(code: impl Into<String>, description: impl Into<String>, details: Value) -> Self {
        Self {
            code: code.into(),
            description: description.into(),
            details,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn internal(description: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, description)
    }

    /// SOAP 1.2 fault class: faults caused by the request are `Sender`,
    /// everything else is `Receiver`.
    pub fn soap_code(&self) -> &'static str {
        match self.code.as_str() {
            "NotImplemented" | "NotSupported" | "ProtocolError" | "SecurityError"
            | "FormationViolation" | "PropertyConstraintViolation"
            | "OccurenceConstraintViolation" | "TypeConstraintViolation" => "Sender",
            _ => "Receiver",
        }
    }

    /// Text placed in a SOAP `Detail` element.
    pub fn detail_text(&self) -> String {
        match &self.details {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            Value::Object(map) if map.is_empty() => String::new(),
            other => other.to_string(),
        }
    }
}
