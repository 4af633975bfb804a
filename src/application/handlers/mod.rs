//! Local answers to charge point requests
//!
//! Used when no backend query bridge is configured. Each handler parses the
//! validated payload into its typed record and builds the confirmation
//! payload the device expects.

use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use tracing::info;

use crate::application::session::ChargingPointSession;
use crate::domain::records::{
    AuthorizeRequest, BootNotificationRequest, DataTransferRequest, StartTransactionRequest,
    StatusNotificationRequest, StopTransactionRequest,
};
use crate::domain::{ErrorCode, ProtocolFault, TransportProtocol};
use crate::support::time::iso_time;

/// Values handed out in confirmations
#[derive(Debug, Clone)]
pub struct OcppSettings {
    /// Heartbeat interval announced in BootNotification replies, seconds
    pub heartbeat_interval: i64,
    /// Lifetime of an accepted idTag, seconds
    pub id_tag_expiry_secs: i64,
}

impl Default for OcppSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: 300,
            id_tag_expiry_secs: 300,
        }
    }
}

/// Answer `action` for `session`. `payload` has already passed catalog
/// validation.
pub fn handle_call(
    session: &ChargingPointSession,
    settings: &OcppSettings,
    action: &str,
    payload: &Map<String, Value>,
) -> Result<Value, ProtocolFault> {
    match action {
        "BootNotification" => boot_notification(session, settings, payload),
        "Heartbeat" => Ok(json!({ "currentTime": now() })),
        "Authorize" => authorize(session, settings, payload),
        "StartTransaction" => start_transaction(session, settings, payload),
        "StopTransaction" => stop_transaction(session, settings, payload),
        "StatusNotification" => status_notification(session, payload),
        "DataTransfer" => data_transfer(session, payload),
        other => Err(ProtocolFault::new(
            ErrorCode::NotImplemented,
            format!("{other} is not handled by this central system"),
        )),
    }
}

fn now() -> String {
    iso_time(0)
}

fn parse<T: DeserializeOwned>(action: &str, payload: &Map<String, Value>) -> Result<T, ProtocolFault> {
    serde_json::from_value(Value::Object(payload.clone())).map_err(|e| {
        ProtocolFault::new(
            ErrorCode::TypeConstraintViolation,
            format!("Invalid {action} payload: {e}"),
        )
    })
}

fn id_tag_info(settings: &OcppSettings) -> Value {
    json!({ "status": "Accepted", "expiryDate": iso_time(settings.id_tag_expiry_secs) })
}

fn boot_notification(
    session: &ChargingPointSession,
    settings: &OcppSettings,
    payload: &Map<String, Value>,
) -> Result<Value, ProtocolFault> {
    let request: BootNotificationRequest = parse("BootNotification", payload)?;
    info!(
        identity = %session.identity(),
        vendor = request.charge_point_vendor.as_str(),
        model = request.charge_point_model.as_str(),
        "🔌 BootNotification"
    );
    // OCPP-S 1.5 names the interval field differently.
    let interval_key = match session.protocol() {
        TransportProtocol::Soap => "heartbeatInterval",
        TransportProtocol::Json => "interval",
    };
    let mut reply = Map::new();
    reply.insert("status".into(), json!("Accepted"));
    reply.insert("currentTime".into(), json!(now()));
    reply.insert(interval_key.into(), json!(settings.heartbeat_interval));
    Ok(Value::Object(reply))
}

fn authorize(
    session: &ChargingPointSession,
    settings: &OcppSettings,
    payload: &Map<String, Value>,
) -> Result<Value, ProtocolFault> {
    let request: AuthorizeRequest = parse("Authorize", payload)?;
    info!(identity = %session.identity(), id_tag = request.id_tag.as_str(), "Authorize");
    Ok(json!({ "idTagInfo": id_tag_info(settings) }))
}

fn start_transaction(
    session: &ChargingPointSession,
    settings: &OcppSettings,
    payload: &Map<String, Value>,
) -> Result<Value, ProtocolFault> {
    let request: StartTransactionRequest = parse("StartTransaction", payload)?;
    let transaction_id = session.next_transaction_id();
    info!(
        identity = %session.identity(),
        connector_id = request.connector_id,
        id_tag = request.id_tag.as_str(),
        transaction_id,
        "⚡ StartTransaction"
    );
    Ok(json!({
        "idTagInfo": id_tag_info(settings),
        "transactionId": transaction_id,
    }))
}

fn stop_transaction(
    session: &ChargingPointSession,
    settings: &OcppSettings,
    payload: &Map<String, Value>,
) -> Result<Value, ProtocolFault> {
    let request: StopTransactionRequest = parse("StopTransaction", payload)?;
    info!(
        identity = %session.identity(),
        transaction_id = request.transaction_id,
        meter_stop = request.meter_stop,
        meter_values = request.transaction_data.len(),
        "StopTransaction"
    );
    Ok(json!({ "idTagInfo": id_tag_info(settings) }))
}

fn status_notification(
    session: &ChargingPointSession,
    payload: &Map<String, Value>,
) -> Result<Value, ProtocolFault> {
    let request: StatusNotificationRequest = parse("StatusNotification", payload)?;
    info!(
        identity = %session.identity(),
        connector_id = request.connector_id,
        status = ?request.status,
        error_code = ?request.error_code,
        "StatusNotification"
    );
    Ok(json!({}))
}

fn data_transfer(
    session: &ChargingPointSession,
    payload: &Map<String, Value>,
) -> Result<Value, ProtocolFault> {
    let request: DataTransferRequest = parse("DataTransfer", payload)?;
    info!(
        identity = %session.identity(),
        vendor_id = request.vendor_id.as_str(),
        message_id = request.message_id.as_deref().unwrap_or(""),
        "DataTransfer"
    );
    Ok(json!({ "status": "Accepted" }))
}
