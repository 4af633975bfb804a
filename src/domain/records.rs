//! Request records kept per charging point
//!
//! The most recently parsed Authorize, StartTransaction, StopTransaction,
//! BootNotification, StatusNotification and DataTransfer payloads of a
//! device. SOAP devices send every scalar as text, so numeric fields accept
//! either a JSON number or a numeric string.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ── Status enums ───────────────────────────────────────────────

/// Connector status reported by StatusNotification (1.5 and 1.6 values)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChargePointStatus {
    Available,
    Preparing,
    Charging,
    #[serde(rename = "SuspendedEVSE")]
    SuspendedEvse,
    #[serde(rename = "SuspendedEV")]
    SuspendedEv,
    Finishing,
    Reserved,
    Unavailable,
    Faulted,
    Occupied,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChargePointErrorCode {
    ConnectorLockFailure,
    #[serde(rename = "EVCommunicationError")]
    EvCommunicationError,
    GroundFailure,
    HighTemperature,
    InternalError,
    LocalListConflict,
    NoError,
    OtherError,
    OverCurrentFailure,
    OverVoltage,
    PowerMeterFailure,
    PowerSwitchFailure,
    ReaderFailure,
    ResetFailure,
    UnderVoltage,
    WeakSignal,
    Mode3Error,
    #[serde(other)]
    Unknown,
}

// ── Request records ────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizeRequest {
    pub id_tag: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootNotificationRequest {
    pub charge_point_vendor: String,
    pub charge_point_model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub charge_point_serial_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub charge_box_serial_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firmware_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iccid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imsi: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meter_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meter_serial_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartTransactionRequest {
    #[serde(deserialize_with = "lenient::int")]
    pub connector_id: i64,
    pub id_tag: String,
    #[serde(deserialize_with = "lenient::int")]
    pub meter_start: i64,
    #[serde(default, deserialize_with = "lenient::opt_int")]
    pub reservation_id: Option<i64>,
    pub timestamp: String,
}

/// One sampled reading of a meter value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SampledValue {
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measurand: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeterValue {
    pub timestamp: String,
    #[serde(default, alias = "value", deserialize_with = "lenient::one_or_many")]
    pub sampled_value: Vec<SampledValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopTransactionRequest {
    #[serde(default)]
    pub id_tag: Option<String>,
    #[serde(deserialize_with = "lenient::int")]
    pub meter_stop: i64,
    pub timestamp: String,
    #[serde(deserialize_with = "lenient::int")]
    pub transaction_id: i64,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default, deserialize_with = "lenient::one_or_many")]
    pub transaction_data: Vec<MeterValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusNotificationRequest {
    #[serde(deserialize_with = "lenient::int")]
    pub connector_id: i64,
    pub error_code: ChargePointErrorCode,
    #[serde(default)]
    pub info: Option<String>,
    pub status: ChargePointStatus,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub vendor_id: Option<String>,
    #[serde(default)]
    pub vendor_error_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataTransferRequest {
    pub vendor_id: String,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub data: Option<String>,
}

// ── PendingTransactionState ────────────────────────────────────

/// Last-seen request records of one charging point.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingTransactionState {
    pub authorize: Option<AuthorizeRequest>,
    pub start_transaction: Option<StartTransactionRequest>,
    pub stop_transaction: Option<StopTransactionRequest>,
    pub boot_notification: Option<BootNotificationRequest>,
    pub status_notification: Option<StatusNotificationRequest>,
    pub data_transfer: Option<DataTransferRequest>,
}

impl PendingTransactionState {
    /// Parse and remember `payload` when `action` is one of the tracked
    /// requests. Returns `Ok(false)` for untracked actions.
    pub fn record(&mut self, action: &str, payload: &Map<String, Value>) -> serde_json::Result<bool> {
        let value = Value::Object(payload.clone());
        match action {
            "Authorize" => self.authorize = Some(serde_json::from_value(value)?),
            "StartTransaction" => self.start_transaction = Some(serde_json::from_value(value)?),
            "StopTransaction" => self.stop_transaction = Some(serde_json::from_value(value)?),
            "BootNotification" => self.boot_notification = Some(serde_json::from_value(value)?),
            "StatusNotification" => {
                self.status_notification = Some(serde_json::from_value(value)?)
            }
            "DataTransfer" => self.data_transfer = Some(serde_json::from_value(value)?),
            _ => return Ok(false),
        }
        Ok(true)
    }
}

// ── Lenient field decoding ─────────────────────────────────────

mod lenient {
    use serde::de::{self, DeserializeOwned, Deserializer};
    use serde::Deserialize;
    use serde_json::Value;

    fn to_int<E: de::Error>(value: Value) -> Result<i64, E> {
        match value {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .ok_or_else(|| E::custom("number out of range")),
            Value::String(s) => s
                .trim()
                .parse()
                .map_err(|_| E::custom(format!("invalid integer \"{s}\""))),
            other => Err(E::custom(format!("expected integer, got {other}"))),
        }
    }

    pub fn int<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
        to_int(Value::deserialize(d)?)
    }

    pub fn opt_int<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
        match Value::deserialize(d)? {
            Value::Null => Ok(None),
            Value::String(s) if s.is_empty() => Ok(None),
            other => to_int(other).map(Some),
        }
    }

    /// A list that SOAP renders as a bare element when it has one entry.
    pub fn one_or_many<'de, D, T>(d: D) -> Result<Vec<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: DeserializeOwned,
    {
        match Value::deserialize(d)? {
            Value::Null => Ok(Vec::new()),
            Value::Array(items) => items
                .into_iter()
                .map(|v| serde_json::from_value(v).map_err(de::Error::custom))
                .collect(),
            single => serde_json::from_value(single)
                .map(|v| vec![v])
                .map_err(de::Error::custom),
        }
    }
}
