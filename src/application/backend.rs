//! Statements submitted to the backend query bridge and decoding of their
//! replies

use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::application::ports::QueryRows;
use crate::domain::ProtocolFault;
use crate::support::BackendError;

/// Quote `value` as a SQL string literal.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn quote_optional(value: Option<&str>) -> String {
    value.map(quote_literal).unwrap_or_else(|| "NULL".to_string())
}

/// Hand an inbound Call to the backend for processing.
pub fn parse_statement(
    identity: &str,
    unique_id: &str,
    action: &str,
    payload: &Value,
    account: Option<&str>,
) -> String {
    format!(
        "SELECT CAST(ocpp.Parse({}, {}, {}, {}::jsonb, {}) AS text)",
        quote_literal(identity),
        quote_literal(unique_id),
        quote_literal(action),
        quote_literal(&payload.to_string()),
        quote_optional(account),
    )
}

pub fn connected_statement(identity: &str, connected: bool) -> String {
    format!(
        "SELECT CAST(ocpp.SetChargePointConnected({}, {connected}) AS text)",
        quote_literal(identity)
    )
}

/// Run the Central System list `endpoint` with the caller's token. The
/// endpoint name must come from the operation catalog. Each row is returned
/// as one JSON text column.
pub fn endpoint_statement(endpoint: &str, token: Option<&str>, filter: &Value) -> String {
    format!(
        "SELECT row_to_json(r)::text FROM ocpp.{endpoint}({}, {}::jsonb) AS r",
        quote_optional(token),
        quote_literal(&filter.to_string()),
    )
}

/// Failure of a list endpoint, with the HTTP status to answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointFailure {
    pub status: u16,
    pub message: String,
}

impl EndpointFailure {
    fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

/// Rows of an endpoint statement as a JSON array. A single row carrying
/// `{"error": {"code", "message"}}` is a failure.
pub fn endpoint_outcome(rows: Result<QueryRows, BackendError>) -> Result<Value, EndpointFailure> {
    let rows = rows.map_err(|e| EndpointFailure::new(500, e.to_string()))?;
    let single = rows.len() == 1;
    let mut items = Vec::with_capacity(rows.len());
    for row in rows {
        let item: Value = match row.into_iter().next().flatten() {
            Some(text) => serde_json::from_str(&text)
                .map_err(|e| EndpointFailure::new(500, format!("Invalid backend reply: {e}")))?,
            None => Value::Null,
        };
        if single {
            if let Some(failure) = endpoint_error(&item) {
                return Err(failure);
            }
        }
        let item = unwrap_single_column(item);
        if single {
            if let Some(failure) = endpoint_error(&item) {
                return Err(failure);
            }
        }
        items.push(item);
    }
    Ok(Value::Array(items))
}

/// `row_to_json` over a function returning one json column yields
/// `{"<function>": value}`.
fn unwrap_single_column(item: Value) -> Value {
    match item {
        Value::Object(map) if map.len() == 1 => {
            let (key, value) = map.into_iter().next().unwrap_or_default();
            if value.is_object() || value.is_array() {
                value
            } else {
                Value::Object(Map::from_iter([(key, value)]))
            }
        }
        other => other,
    }
}

fn endpoint_error(item: &Value) -> Option<EndpointFailure> {
    let error = item.get("error")?;
    let code = error.get("code")?.as_i64()?;
    let message = error.get("message")?.as_str()?;
    if code == 0 {
        return None;
    }
    let code = match code {
        c if c >= 10_000 => c / 100,
        c if c < 0 => 400,
        c => c,
    };
    let status = match code {
        401 | 403 | 404 | 500 => code as u16,
        _ => 400,
    };
    Some(EndpointFailure::new(status, message))
}

#[derive(Debug, Deserialize)]
struct BackendReply {
    result: bool,
    #[serde(default)]
    response: Value,
}

/// Turn the rows of an `ocpp.Parse` statement into the reply payload or the
/// fault to send back to the charge point.
pub fn parse_outcome(rows: Result<QueryRows, BackendError>) -> Result<Value, ProtocolFault> {
    let rows = rows.map_err(|e| ProtocolFault::internal(e.to_string()))?;
    let text = rows
        .into_iter()
        .next()
        .and_then(|row| row.into_iter().next())
        .flatten()
        .ok_or_else(|| ProtocolFault::internal("Backend returned no result"))?;
    let reply: BackendReply = serde_json::from_str(&text)
        .map_err(|e| ProtocolFault::internal(format!("Invalid backend reply: {e}")))?;

    if reply.result {
        Ok(reply.response)
    } else {
        Err(fault_from_response(reply.response))
    }
}

fn fault_from_response(response: Value) -> ProtocolFault {
    let code = response
        .get("errorCode")
        .and_then(Value::as_str)
        .unwrap_or("InternalError")
        .to_string();
    let message = match response.get("message").and_then(Value::as_str) {
        Some(message) => message.to_string(),
        None => match &response {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        },
    };
    ProtocolFault::raw(code, message, json!({}))
}
