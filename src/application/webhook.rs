//! Call webhook: request body sent for an inbound Call and decoding of the
//! HTTP reply into the answer for the charge point

use serde_json::{json, Value};

use crate::application::ports::WebhookReply;
use crate::domain::{ErrorCode, MessageKind, ProtocolFault};
use crate::support::BackendError;

/// `{identity, uniqueId, action, payload, account}`
pub fn request_body(
    identity: &str,
    unique_id: &str,
    action: &str,
    payload: &Value,
    account: Option<&str>,
) -> Value {
    json!({
        "identity": identity,
        "uniqueId": unique_id,
        "action": action,
        "payload": payload,
        "account": account.unwrap_or_default(),
    })
}

/// `messageTypeId` as a type id (`4`, `"4"`) or a kind name (`"CallError"`).
fn message_kind(value: &Value) -> Option<MessageKind> {
    match value {
        Value::Number(n) => n.as_u64().and_then(MessageKind::from_type_id),
        Value::String(s) => match s.parse::<u64>() {
            Ok(id) => MessageKind::from_type_id(id),
            Err(_) => [MessageKind::Call, MessageKind::CallResult, MessageKind::CallError]
                .into_iter()
                .find(|kind| kind.as_str() == s),
        },
        _ => None,
    }
}

fn text(value: &Value, key: &str) -> String {
    match value.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

/// A 2xx reply holds the answer: `payload` for a result, `errorCode` and
/// `errorDescription` for an error. Anything else is an `InternalError`
/// carrying the HTTP reason.
pub fn reply_outcome(reply: Result<WebhookReply, BackendError>) -> Result<Value, ProtocolFault> {
    let reply = reply.map_err(|e| ProtocolFault::internal(e.to_string()))?;
    if !(200..300).contains(&reply.status) {
        let reason = if reply.reason.is_empty() {
            format!("HTTP {}", reply.status)
        } else {
            reply.reason
        };
        return Err(ProtocolFault::internal(reason));
    }

    let content: Value = serde_json::from_str(&reply.body)
        .map_err(|e| ProtocolFault::internal(format!("Invalid webhook reply: {e}")))?;

    match content.get("messageTypeId").and_then(message_kind) {
        Some(MessageKind::CallError) => {
            let code = text(&content, "errorCode");
            let code = if code.is_empty() {
                ErrorCode::InternalError.as_str().to_string()
            } else {
                code
            };
            Err(ProtocolFault::raw(code, text(&content, "errorDescription"), json!({})))
        }
        Some(MessageKind::Call) => Err(ProtocolFault::new(
            ErrorCode::InternalError,
            "Webhook replied with a Call",
        )),
        _ => Ok(match content.get("payload") {
            Some(Value::Null) | None => json!({}),
            Some(payload) => payload.clone(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(body: &str) -> Result<WebhookReply, BackendError> {
        Ok(WebhookReply {
            status: 200,
            reason: "OK".into(),
            body: body.into(),
        })
    }

    #[test]
    fn body_carries_the_call_and_account() {
        let body = request_body("CP1", "42", "Authorize", &json!({"idTag": "T"}), Some("acme"));
        assert_eq!(
            body,
            json!({
                "identity": "CP1",
                "uniqueId": "42",
                "action": "Authorize",
                "payload": {"idTag": "T"},
                "account": "acme"
            })
        );
        assert_eq!(request_body("CP1", "1", "Heartbeat", &json!({}), None)["account"], "");
    }

    #[test]
    fn call_result_reply_yields_payload() {
        let outcome = reply_outcome(ok(
            r#"{"identity":"CP1","messageTypeId":"3","uniqueId":"42","action":"Authorize","payload":{"idTagInfo":{"status":"Accepted"}}}"#,
        ));
        assert_eq!(outcome.unwrap(), json!({"idTagInfo": {"status": "Accepted"}}));
        assert_eq!(reply_outcome(ok(r#"{"messageTypeId":3}"#)).unwrap(), json!({}));
    }

    #[test]
    fn call_error_reply_yields_fault() {
        let fault = reply_outcome(ok(
            r#"{"messageTypeId":"CallError","uniqueId":"42","errorCode":"SecurityError","errorDescription":"Blocked"}"#,
        ))
        .unwrap_err();
        assert_eq!(fault.code, "SecurityError");
        assert_eq!(fault.description, "Blocked");

        let fault = reply_outcome(ok(r#"{"messageTypeId":4}"#)).unwrap_err();
        assert_eq!(fault.code, "InternalError");
    }

    #[test]
    fn failed_requests_are_internal_errors() {
        let fault = reply_outcome(Ok(WebhookReply {
            status: 502,
            reason: "Bad Gateway".into(),
            body: String::new(),
        }))
        .unwrap_err();
        assert_eq!(fault.code, "InternalError");
        assert_eq!(fault.description, "Bad Gateway");

        let fault = reply_outcome(Err(BackendError::InvalidReply("refused".into()))).unwrap_err();
        assert!(fault.description.contains("refused"));

        assert_eq!(reply_outcome(ok("<html>")).unwrap_err().code, "InternalError");
    }
}
