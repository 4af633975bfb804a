//! OCPP-J message framing
//!
//! Implements the OCPP-J (JSON over WebSocket) wire format:
//!
//! - **Call**       `[2, "<uniqueId>", "<action>", {<payload>}]`
//! - **CallResult** `[3, "<uniqueId>", {<payload>}]`
//! - **CallError**  `[4, "<uniqueId>", "<errorCode>", "<errorDescription>", {<errorDetails>}]`
//!
//! Decoding walks the array one element at a time with a [`ScanState`]
//! machine, so a frame is rejected at the first element that does not fit
//! its layout. Unknown action names are accepted here; the operation
//! catalog deals with them.

use std::fmt;

use serde::de::{self, DeserializeSeed, Deserializer, IgnoredAny, MapAccess, SeqAccess, Visitor};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::domain::{CanonicalMessage, MessageKind};

/// Framing violation while decoding an OCPP-J message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Malformed frame: {0}")]
pub struct MalformedFrame(pub String);

// ── Scanner ────────────────────────────────────────────────────

/// Position of the decoder inside the message array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Begin,
    MessageKind,
    UniqueId,
    Action,
    ErrorCode,
    ErrorDescription,
    PayloadBegin,
    PayloadValue,
    End,
}

impl fmt::Display for ScanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Begin => "array start",
            Self::MessageKind => "MessageTypeId",
            Self::UniqueId => "UniqueId",
            Self::Action => "Action",
            Self::ErrorCode => "ErrorCode",
            Self::ErrorDescription => "ErrorDescription",
            Self::PayloadBegin | Self::PayloadValue => "Payload",
            Self::End => "array end",
        };
        f.write_str(name)
    }
}

#[derive(Default)]
struct Scanned {
    kind: Option<MessageKind>,
    unique_id: String,
    action: String,
    error_code: String,
    error_description: String,
    payload: Option<Value>,
}

impl Scanned {
    fn into_message(self) -> Option<CanonicalMessage> {
        let payload = self.payload?;
        Some(match self.kind? {
            MessageKind::Call => CanonicalMessage::Call {
                unique_id: self.unique_id,
                action: self.action,
                payload,
            },
            MessageKind::CallResult => CanonicalMessage::CallResult {
                unique_id: self.unique_id,
                payload,
            },
            MessageKind::CallError => CanonicalMessage::CallError {
                unique_id: self.unique_id,
                error_code: self.error_code,
                error_description: self.error_description,
                payload,
            },
        })
    }
}

fn next_element<'de, A, T>(seq: &mut A, state: ScanState) -> Result<T, A::Error>
where
    A: SeqAccess<'de>,
    T: Deserialize<'de>,
{
    seq.next_element::<T>()
        .map_err(|e| de::Error::custom(format!("{state}: {e}")))?
        .ok_or_else(|| de::Error::custom(format!("{state}: premature end of array")))
}

struct FrameVisitor;

impl<'de> Visitor<'de> for FrameVisitor {
    type Value = CanonicalMessage;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an OCPP-J message array")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<CanonicalMessage, A::Error> {
        let mut scanned = Scanned::default();
        let mut state = ScanState::Begin;

        loop {
            state = match state {
                ScanState::Begin => ScanState::MessageKind,
                ScanState::MessageKind => {
                    let id: u64 = next_element(&mut seq, state)?;
                    let kind = MessageKind::from_type_id(id).ok_or_else(|| {
                        de::Error::custom(format!("{state}: invalid value {id}"))
                    })?;
                    scanned.kind = Some(kind);
                    ScanState::UniqueId
                }
                ScanState::UniqueId => {
                    scanned.unique_id = next_element(&mut seq, state)?;
                    match scanned.kind {
                        Some(MessageKind::Call) => ScanState::Action,
                        Some(MessageKind::CallError) => ScanState::ErrorCode,
                        _ => ScanState::PayloadBegin,
                    }
                }
                ScanState::Action => {
                    scanned.action = next_element(&mut seq, state)?;
                    ScanState::PayloadBegin
                }
                ScanState::ErrorCode => {
                    scanned.error_code = next_element(&mut seq, state)?;
                    ScanState::ErrorDescription
                }
                ScanState::ErrorDescription => {
                    scanned.error_description = next_element(&mut seq, state)?;
                    ScanState::PayloadBegin
                }
                ScanState::PayloadBegin => {
                    let payload = seq
                        .next_element_seed(PayloadSeed)
                        .map_err(|e| de::Error::custom(format!("{state}: {e}")))?
                        .ok_or_else(|| {
                            de::Error::custom(format!("{state}: premature end of array"))
                        })?;
                    scanned.payload = Some(payload);
                    ScanState::PayloadValue
                }
                ScanState::PayloadValue => {
                    if scanned.payload.is_none() {
                        return Err(de::Error::custom(format!("{state}: missing")));
                    }
                    ScanState::End
                }
                ScanState::End => {
                    if seq.next_element::<IgnoredAny>()?.is_some() {
                        return Err(de::Error::custom(format!(
                            "{state}: unexpected trailing element"
                        )));
                    }
                    break;
                }
            };
        }

        scanned
            .into_message()
            .ok_or_else(|| de::Error::custom("incomplete message"))
    }
}

/// Accepts only an object or an array as the payload element.
struct PayloadSeed;

impl<'de> DeserializeSeed<'de> for PayloadSeed {
    type Value = Value;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Value, D::Error> {
        deserializer.deserialize_any(self)
    }
}

impl<'de> Visitor<'de> for PayloadSeed {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an object or array")
    }

    fn visit_map<M: MapAccess<'de>>(self, map: M) -> Result<Value, M::Error> {
        Value::deserialize(de::value::MapAccessDeserializer::new(map))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, seq: A) -> Result<Value, A::Error> {
        Value::deserialize(de::value::SeqAccessDeserializer::new(seq))
    }
}

// ── Public API ─────────────────────────────────────────────────

/// Decode one OCPP-J text frame.
pub fn decode(text: &str) -> Result<CanonicalMessage, MalformedFrame> {
    let mut deserializer = serde_json::Deserializer::from_str(text);
    let message = (&mut deserializer)
        .deserialize_seq(FrameVisitor)
        .map_err(|e| MalformedFrame(e.to_string()))?;
    deserializer
        .end()
        .map_err(|e| MalformedFrame(format!("trailing characters: {e}")))?;
    Ok(message)
}

/// Encode a message as an OCPP-J text frame.
pub fn encode(message: &CanonicalMessage) -> String {
    let kind = Value::from(message.kind().type_id());
    let array = match message {
        CanonicalMessage::Call {
            unique_id,
            action,
            payload,
        } => vec![
            kind,
            Value::from(unique_id.as_str()),
            Value::from(action.as_str()),
            payload.clone(),
        ],
        CanonicalMessage::CallResult { unique_id, payload } => {
            vec![kind, Value::from(unique_id.as_str()), payload.clone()]
        }
        CanonicalMessage::CallError {
            unique_id,
            error_code,
            error_description,
            payload,
        } => vec![
            kind,
            Value::from(unique_id.as_str()),
            Value::from(error_code.as_str()),
            Value::from(error_description.as_str()),
            payload.clone(),
        ],
    };
    Value::Array(array).to_string()
}
