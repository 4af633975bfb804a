//! Dispatcher
//!
//! Entry point for everything the transports hand to the protocol engine:
//! WebSocket connects, frames and disconnects, SOAP envelopes, and commands
//! from the management API. Decoded Calls are answered by the backend query
//! bridge, the Call webhook, or locally, in that order of preference;
//! replies to our own Calls go to the session's correlation table.

use std::sync::Arc;
use std::time::Instant;

use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::application::backend::{self, EndpointFailure};
use crate::application::handlers::{self, OcppSettings};
use crate::application::ports::{
    ConnectionId, PushCallback, SharedBinding, SharedQueryBridge, SharedSoapPush, SharedWebhook,
    SoapPush,
};
use crate::application::webhook;
use crate::application::session::{
    CallFailure, ChargingPointSession, SessionSnapshot, SharedRegistry, SweepReport,
};
use crate::application::soap_binding::SoapPushBinding;
use crate::codec::json::{self, MalformedFrame};
use crate::codec::soap::{self, ServiceNamespace, SoapFault, SoapMessage};
use crate::domain::{
    CanonicalMessage, CatalogError, ErrorCode, OperationCatalog, ProtocolFault, TransportProtocol,
    UnknownKeys,
};
use crate::support::{BackendError, SessionError};

/// Failure of a command issued through the management API
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DispatchError {
    #[error("Charge point {0} not found")]
    UnknownChargePoint(String),

    #[error("Charge point {0} is offline")]
    Offline(String),

    #[error(transparent)]
    Validation(#[from] CatalogError),

    /// The charge point answered with a CallError or SOAP fault
    #[error("{0}")]
    Rejected(ProtocolFault),

    #[error("Charge point {0} did not answer in time")]
    Timeout(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Session closed: {0}")]
    SessionClosed(String),

    #[error("Backend is not configured")]
    BackendDisabled,

    /// The backend refused or failed a Central System request
    #[error("{message}")]
    Backend { status: u16, message: String },
}

impl From<EndpointFailure> for DispatchError {
    fn from(failure: EndpointFailure) -> Self {
        Self::Backend {
            status: failure.status,
            message: failure.message,
        }
    }
}

impl From<CallFailure> for DispatchError {
    fn from(failure: CallFailure) -> Self {
        match failure {
            CallFailure::Rejected(fault) => Self::Rejected(fault),
            CallFailure::SessionClosed(reason) => Self::SessionClosed(reason),
            CallFailure::Timeout => Self::Timeout(String::new()),
            CallFailure::Transport(e) => Self::Transport(e),
        }
    }
}

/// Receives the reply to an inbound Call once it is known.
type ReplySink = Box<dyn FnOnce(CanonicalMessage) + Send + 'static>;

fn log_frame(direction: &str, identity: &str, message: &CanonicalMessage) {
    let payload = message.payload();
    let shown = match payload {
        Value::Object(map) if map.is_empty() => "(empty)".to_string(),
        Value::Null => "(empty)".to_string(),
        other => other.to_string(),
    };
    info!(
        "{direction} [{identity}] [{}] [{}] [{}] {shown}",
        message.unique_id(),
        message.action().unwrap_or("-"),
        message.kind(),
    );
}

pub struct Dispatcher {
    registry: SharedRegistry,
    catalog: &'static OperationCatalog,
    bridge: Option<SharedQueryBridge>,
    webhook: Option<SharedWebhook>,
    push: SharedSoapPush,
    settings: OcppSettings,
}

pub type SharedDispatcher = Arc<Dispatcher>;

impl Dispatcher {
    pub fn new(registry: SharedRegistry, settings: OcppSettings) -> Self {
        Self {
            registry,
            catalog: OperationCatalog::global(),
            bridge: None,
            webhook: None,
            push: Arc::new(DisabledPush),
            settings,
        }
    }

    /// Forward inbound Calls and connection state to `bridge`.
    pub fn with_query_bridge(mut self, bridge: SharedQueryBridge) -> Self {
        self.bridge = Some(bridge);
        self
    }

    /// Answer inbound Calls through `webhook` when no query bridge is set.
    pub fn with_webhook(mut self, webhook: SharedWebhook) -> Self {
        self.webhook = Some(webhook);
        self
    }

    /// Client used to push requests to SOAP charge points.
    pub fn with_soap_push(mut self, push: SharedSoapPush) -> Self {
        self.push = push;
        self
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    // ── Connection lifecycle ───────────────────────────────

    /// A WebSocket upgrade for `identity` succeeded.
    pub fn connect_json(
        &self,
        identity: &str,
        account: Option<String>,
        binding: SharedBinding,
    ) -> Result<Arc<ChargingPointSession>, SessionError> {
        let peer = binding.peer();
        let (session, _) = self.registry.attach(identity, binding, TransportProtocol::Json)?;
        session.set_account(account);
        session.set_address(peer);
        self.set_connected(&session, true);
        Ok(session)
    }

    /// The WebSocket connection `connection_id` closed.
    pub fn disconnect(&self, connection_id: ConnectionId) {
        let Some(session) = self.registry.detach(connection_id) else {
            return;
        };
        info!(identity = %session.identity(), connection_id, "🔌 Charge point disconnected");
        if !session.is_retired() {
            self.set_connected(&session, false);
        }
    }

    /// Tear down the session on `connection_id` after a fatal transport or
    /// framing error.
    pub fn abort(&self, connection_id: ConnectionId, reason: &str) {
        let Some(session) = self.registry.find_by_connection(connection_id) else {
            return;
        };
        warn!(identity = %session.identity(), connection_id, reason, "Connection aborted");
        let identified = !session.identity().is_empty();
        self.registry.retire(&session, reason);
        if identified {
            self.set_connected(&session, false);
        }
    }

    fn set_connected(&self, session: &Arc<ChargingPointSession>, connected: bool) {
        let Some(bridge) = &self.bridge else {
            return;
        };
        let identity = session.identity();
        session.begin_write();
        let session = session.clone();
        bridge.submit(
            backend::connected_statement(&identity, connected),
            Box::new(move |result| {
                session.end_write();
                if let Err(e) = result {
                    warn!(identity = %session.identity(), connected, error = %e, "Connected flag not stored");
                }
            }),
        );
    }

    // ── Inbound frames ─────────────────────────────────────

    /// Process one OCPP-J text frame received on `connection_id`. A
    /// malformed frame is returned to the caller, which must close the
    /// connection.
    pub fn handle_json_frame(&self, connection_id: ConnectionId, text: &str) -> Result<(), MalformedFrame> {
        let Some(session) = self.registry.find_by_connection(connection_id) else {
            debug!(connection_id, "Frame for a connection without session dropped");
            return Ok(());
        };
        let message = json::decode(text).map_err(|e| {
            metrics::counter!("ocpp_malformed_frames_total").increment(1);
            warn!(identity = %session.identity(), error = %e, raw = text, "Malformed frame");
            e
        })?;
        metrics::counter!(
            "ocpp_frames_total",
            "protocol" => TransportProtocol::Json.as_str(),
            "kind" => message.kind().as_str()
        )
        .increment(1);
        session.touch();
        log_frame("<<", &session.identity(), &message);

        let replier = session.clone();
        self.route(
            &session,
            message,
            Box::new(move |reply| {
                log_frame(">>", &replier.identity(), &reply);
                if let Err(e) = replier.reply(&reply) {
                    warn!(identity = %replier.identity(), error = %e, "Reply not delivered");
                }
            }),
        );
        Ok(())
    }

    fn route(&self, session: &Arc<ChargingPointSession>, message: CanonicalMessage, sink: ReplySink) {
        match message {
            CanonicalMessage::Call {
                unique_id,
                action,
                payload,
            } => self.handle_call(session, unique_id, action, payload, sink),
            reply => self.resolve_reply(session, reply),
        }
    }

    fn resolve_reply(&self, session: &ChargingPointSession, message: CanonicalMessage) {
        let unique_id = message.unique_id().to_string();
        let Some(outcome) = message.into_outcome() else {
            return;
        };
        let outcome = outcome.map_err(CallFailure::Rejected);
        let label = if outcome.is_ok() { "result" } else { "error" };
        if session.correlation().resolve(&unique_id, outcome) {
            metrics::counter!("ocpp_call_outcomes_total", "outcome" => label).increment(1);
        } else {
            metrics::counter!("ocpp_call_outcomes_total", "outcome" => "unmatched").increment(1);
            warn!(identity = %session.identity(), unique_id = %unique_id, "Reply to unknown call ignored");
        }
    }

    /// Validate an inbound Call against the catalog.
    fn check_inbound(&self, action: &str, payload: &Value) -> Result<Map<String, Value>, ProtocolFault> {
        let spec = self.catalog.get(action).ok_or_else(|| {
            ProtocolFault::new(ErrorCode::NotImplemented, format!("Unknown action {action}"))
        })?;
        if !spec.direction.inbound() {
            return Err(ProtocolFault::new(
                ErrorCode::NotSupported,
                format!("{action} is not sent by a charge point"),
            ));
        }
        self.catalog
            .validate(action, payload, UnknownKeys::Keep)
            .map_err(|e| {
                let code = match &e {
                    CatalogError::MissingRequiredField { .. } => ErrorCode::OccurenceConstraintViolation,
                    CatalogError::NotAnObject(_) => ErrorCode::FormationViolation,
                    CatalogError::UnknownField { .. } => ErrorCode::PropertyConstraintViolation,
                    CatalogError::UnknownOperation(_) | CatalogError::UnknownEndpoint(_) => {
                        ErrorCode::NotImplemented
                    }
                    CatalogError::WrongDirection { .. } => ErrorCode::NotSupported,
                };
                ProtocolFault::new(code, e.to_string())
            })
    }

    fn handle_call(
        &self,
        session: &Arc<ChargingPointSession>,
        unique_id: String,
        action: String,
        payload: Value,
        sink: ReplySink,
    ) {
        let validated = match self.check_inbound(&action, &payload) {
            Ok(validated) => validated,
            Err(fault) => {
                sink(CanonicalMessage::error(unique_id, &fault));
                return;
            }
        };
        session.record(&action, &validated);

        let Some(bridge) = &self.bridge else {
            if let Some(hook) = &self.webhook {
                return self.forward_to_webhook(hook, session, unique_id, action, validated, sink);
            }
            let reply = match handlers::handle_call(session, &self.settings, &action, &validated) {
                Ok(payload) => CanonicalMessage::result(unique_id, payload),
                Err(fault) => CanonicalMessage::error(unique_id, &fault),
            };
            sink(reply);
            return;
        };

        let sql = backend::parse_statement(
            &session.identity(),
            &unique_id,
            &action,
            &Value::Object(validated),
            session.account().as_deref(),
        );
        session.begin_write();
        let session = session.clone();
        bridge.submit(
            sql,
            Box::new(move |rows| {
                session.end_write();
                let reply = match backend::parse_outcome(rows) {
                    Ok(payload) => CanonicalMessage::result(unique_id, payload),
                    Err(fault) => {
                        debug!(identity = %session.identity(), action = %action, fault = %fault, "Backend rejected call");
                        CanonicalMessage::error(unique_id, &fault)
                    }
                };
                sink(reply);
            }),
        );
    }

    fn forward_to_webhook(
        &self,
        hook: &SharedWebhook,
        session: &Arc<ChargingPointSession>,
        unique_id: String,
        action: String,
        payload: Map<String, Value>,
        sink: ReplySink,
    ) {
        let body = webhook::request_body(
            &session.identity(),
            &unique_id,
            &action,
            &Value::Object(payload),
            session.account().as_deref(),
        );
        session.begin_write();
        let session = session.clone();
        hook.post(
            body,
            Box::new(move |reply| {
                session.end_write();
                let reply = match webhook::reply_outcome(reply) {
                    Ok(payload) => CanonicalMessage::result(unique_id, payload),
                    Err(fault) => {
                        debug!(identity = %session.identity(), action = %action, fault = %fault, "Webhook rejected call");
                        CanonicalMessage::error(unique_id, &fault)
                    }
                };
                sink(reply);
            }),
        );
    }

    // ── SOAP ───────────────────────────────────────────────

    /// Handle one SOAP envelope POSTed by a charge point and produce the
    /// reply envelope. `peer` is used when the request has no `From`
    /// address.
    pub async fn handle_soap(&self, body: &str, peer: &str) -> String {
        let request = match SoapMessage::decode(body) {
            Ok(request) => request,
            Err(e) => {
                metrics::counter!("ocpp_malformed_frames_total").increment(1);
                warn!(peer, error = %e, "Malformed SOAP envelope");
                let fault = ProtocolFault::new(ErrorCode::FormationViolation, e.to_string());
                return soap::encode_fault(&[], &SoapFault::from(&fault));
            }
        };
        let headers = request.prepare_response();
        let fault_reply =
            |fault: ProtocolFault| soap::encode_fault(&headers, &SoapFault::from(&fault));

        let Some(identity) = request.identity().map(str::to_string) else {
            return fault_reply(ProtocolFault::new(
                ErrorCode::ProtocolError,
                "Missing chargeBoxIdentity header",
            ));
        };
        let message = match request.to_canonical() {
            Ok(message) => message,
            Err(e) => {
                return fault_reply(ProtocolFault::new(ErrorCode::FormationViolation, e.to_string()))
            }
        };
        metrics::counter!(
            "ocpp_frames_total",
            "protocol" => TransportProtocol::Soap.as_str(),
            "kind" => message.kind().as_str()
        )
        .increment(1);

        let address = request
            .header("From")
            .filter(|a| !a.is_empty())
            .unwrap_or(peer)
            .to_string();
        let session = match self.soap_session(&identity, &address) {
            Ok(session) => session,
            Err(e) => return fault_reply(ProtocolFault::new(ErrorCode::SecurityError, e.to_string())),
        };
        session.touch();
        log_frame("<<", &identity, &message);

        let action = message.action().map(str::to_string);
        let (tx, rx) = oneshot::channel();
        self.route(
            &session,
            message,
            Box::new(move |reply| {
                let _ = tx.send(reply);
            }),
        );
        let Some(action) = action else {
            // Replies to our own requests are acknowledged with an empty body.
            return soap::encode_envelope(ServiceNamespace::CentralSystem, &headers, "", &Value::Null)
                .unwrap_or_else(|e| fault_reply(ProtocolFault::internal(e.to_string())));
        };

        match rx.await {
            Ok(reply) => {
                log_frame(">>", &identity, &reply);
                match reply.into_outcome() {
                    Some(Ok(payload)) => soap::encode_envelope(
                        ServiceNamespace::CentralSystem,
                        &headers,
                        &soap::body_element(&action, "Response"),
                        &payload,
                    )
                    .unwrap_or_else(|e| {
                        warn!(identity = %identity, action = %action, error = %e, "Reply not encodable");
                        fault_reply(ProtocolFault::internal(e.to_string()))
                    }),
                    Some(Err(fault)) => fault_reply(fault),
                    None => fault_reply(ProtocolFault::internal("No reply produced")),
                }
            }
            Err(_) => fault_reply(ProtocolFault::internal("Reply dropped")),
        }
    }

    /// Session of a SOAP charge point, re-bound when its address changed.
    fn soap_session(&self, identity: &str, address: &str) -> Result<Arc<ChargingPointSession>, SessionError> {
        if let Some(session) = self.registry.find_by_identity(identity) {
            if session.protocol() == TransportProtocol::Soap
                && session.is_online()
                && session.address() == address
            {
                return Ok(session);
            }
        }
        let binding: SharedBinding = SoapPushBinding::new(address, self.push.clone());
        let (session, existed) = self.registry.attach(identity, binding, TransportProtocol::Soap)?;
        session.set_address(address);
        if !existed {
            self.set_connected(&session, true);
        }
        Ok(session)
    }

    // ── Management API ─────────────────────────────────────

    /// Send `operation` to the charge point `identity` and wait for its
    /// reply.
    pub async fn execute_operation(
        &self,
        identity: &str,
        operation: &str,
        payload: Value,
    ) -> Result<Value, DispatchError> {
        let session = self
            .registry
            .find_by_identity(identity)
            .ok_or_else(|| DispatchError::UnknownChargePoint(identity.to_string()))?;
        let validated = self.catalog.validate_outbound(operation, &payload)?;

        let (tx, rx) = oneshot::channel();
        let unique_id = session
            .send(
                operation,
                Value::Object(validated),
                Box::new(move |outcome| {
                    let _ = tx.send(outcome);
                }),
            )
            .map_err(|e| match e {
                SessionError::TransportOffline(id) | SessionError::Retired(id) => {
                    DispatchError::Offline(id)
                }
                other => DispatchError::Transport(other.to_string()),
            })?;

        let started = Instant::now();
        let outcome = match tokio::time::timeout(self.registry.settings().call_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(CallFailure::SessionClosed("call abandoned".to_string())),
            Err(_) => {
                session.correlation().resolve(&unique_id, Err(CallFailure::Timeout));
                Err(CallFailure::Timeout)
            }
        };
        debug!(identity, operation, elapsed_ms = started.elapsed().as_millis() as u64, "Operation finished");

        let label = match &outcome {
            Ok(_) => "result",
            Err(CallFailure::Rejected(_)) => "error",
            Err(CallFailure::Timeout) => "timeout",
            Err(CallFailure::SessionClosed(_)) => "drained",
            Err(CallFailure::Transport(_)) => "transport",
        };
        metrics::counter!("ocpp_call_outcomes_total", "outcome" => label).increment(1);

        outcome.map_err(|failure| match DispatchError::from(failure) {
            DispatchError::Timeout(_) => DispatchError::Timeout(identity.to_string()),
            other => other,
        })
    }

    /// Run a Central System list endpoint such as `TransactionList` through
    /// the query bridge. `token` is the caller's bearer token, handed to the
    /// backend for authorization.
    pub async fn query_endpoint(
        &self,
        token: Option<&str>,
        endpoint: &str,
        filter: Value,
    ) -> Result<Value, DispatchError> {
        let validated = self.catalog.validate_endpoint(endpoint, &filter)?;
        let bridge = self.bridge.as_ref().ok_or(DispatchError::BackendDisabled)?;

        let (tx, rx) = oneshot::channel();
        bridge.submit(
            backend::endpoint_statement(endpoint, token, &Value::Object(validated)),
            Box::new(move |rows| {
                let _ = tx.send(rows);
            }),
        );
        let rows = match tokio::time::timeout(self.registry.settings().call_timeout, rx).await {
            Ok(Ok(rows)) => rows,
            Ok(Err(_)) => {
                return Err(DispatchError::Transport("query abandoned".to_string()));
            }
            Err(_) => {
                return Err(DispatchError::Backend {
                    status: 504,
                    message: format!("{endpoint} did not complete in time"),
                })
            }
        };
        Ok(backend::endpoint_outcome(rows)?)
    }

    /// Bound charge points, ordered by identity.
    pub fn charge_point_list(&self) -> Vec<SessionSnapshot> {
        let mut list: Vec<_> = self
            .registry
            .sessions()
            .into_iter()
            .filter(|s| !s.identity().is_empty())
            .map(|s| s.snapshot())
            .collect();
        list.sort_by(|a, b| a.identity.cmp(&b.identity));
        list
    }

    /// Periodic maintenance; see [`ChargingPointRegistry::sweep`].
    ///
    /// [`ChargingPointRegistry::sweep`]: crate::application::session::ChargingPointRegistry::sweep
    pub fn sweep(&self) -> SweepReport {
        let report = self.registry.sweep(Instant::now());
        if report.expired_calls > 0 {
            metrics::counter!("ocpp_call_outcomes_total", "outcome" => "timeout")
                .increment(report.expired_calls as u64);
        }
        report
    }

    pub fn shutdown(&self, reason: &str) -> usize {
        self.registry.shutdown(reason)
    }
}

/// Push client used when outbound SOAP is not configured.
struct DisabledPush;

impl SoapPush for DisabledPush {
    fn push(&self, _address: &str, _envelope: String, on_complete: PushCallback) {
        on_complete(Err(BackendError::InvalidReply(
            "SOAP push is not configured".to_string(),
        )));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::TransportBinding;
    use crate::application::session::{ChargingPointRegistry, SessionSettings, SessionState};
    use crate::application::ports::WebhookReply;
    use crate::application::testing::{FakeBinding, FakeBridge, FakePush, FakeWebhook};
    use serde_json::json;
    use std::time::Duration;

    fn dispatcher() -> Dispatcher {
        let registry = Arc::new(ChargingPointRegistry::new(SessionSettings::default()));
        Dispatcher::new(registry, OcppSettings::default())
    }

    fn connected(dispatcher: &Dispatcher, identity: &str) -> Arc<FakeBinding> {
        let binding = FakeBinding::new("10.1.1.1:40000");
        dispatcher
            .connect_json(identity, None, binding.clone())
            .unwrap();
        binding
    }

    fn last_reply(binding: &FakeBinding) -> CanonicalMessage {
        json::decode(&binding.last_frame().unwrap()).unwrap()
    }

    #[test]
    fn heartbeat_is_answered_locally() {
        let dispatcher = dispatcher();
        let binding = connected(&dispatcher, "CP001");
        dispatcher
            .handle_json_frame(binding.connection_id(), r#"[2,"123","Heartbeat",{}]"#)
            .unwrap();

        match last_reply(&binding) {
            CanonicalMessage::CallResult { unique_id, payload } => {
                assert_eq!(unique_id, "123");
                assert!(payload["currentTime"].is_string());
            }
            other => panic!("unexpected reply {other:?}"),
        }
    }

    #[test]
    fn inbound_validation_failures_become_call_errors() {
        let dispatcher = dispatcher();
        let binding = connected(&dispatcher, "CP001");
        let cases = [
            (r#"[2,"1","FlyToTheMoon",{}]"#, "NotImplemented"),
            (r#"[2,"2","Authorize",{}]"#, "OccurenceConstraintViolation"),
            (r#"[2,"3","Reset",{"type":"Hard"}]"#, "NotSupported"),
            (r#"[2,"4","Heartbeat",["x"]]"#, "FormationViolation"),
        ];
        for (frame, code) in cases {
            dispatcher.handle_json_frame(binding.connection_id(), frame).unwrap();
            match last_reply(&binding) {
                CanonicalMessage::CallError { error_code, .. } => assert_eq!(error_code, code, "{frame}"),
                other => panic!("unexpected reply {other:?}"),
            }
        }
    }

    #[test]
    fn calls_are_recorded_on_the_session() {
        let dispatcher = dispatcher();
        let binding = connected(&dispatcher, "CP001");
        dispatcher
            .handle_json_frame(binding.connection_id(), r#"[2,"9","Authorize",{"idTag":"TAG1"}]"#)
            .unwrap();
        let session = dispatcher.registry().find_by_identity("CP001").unwrap();
        assert_eq!(session.records().authorize.unwrap().id_tag, "TAG1");
    }

    #[test]
    fn malformed_frame_is_reported_to_the_transport() {
        let dispatcher = dispatcher();
        let binding = connected(&dispatcher, "CP001");
        let err = dispatcher
            .handle_json_frame(binding.connection_id(), r#"[2,"1",{}]"#)
            .unwrap_err();
        assert!(err.to_string().starts_with("Malformed frame"));

        dispatcher.abort(binding.connection_id(), "malformed frame");
        assert!(binding.is_closed());
        assert!(dispatcher.registry().find_by_identity("CP001").is_none());
    }

    #[test]
    fn backend_answers_calls_and_tracks_connection() {
        let registry = Arc::new(ChargingPointRegistry::new(SessionSettings::default()));
        let bridge = FakeBridge::parse_reply(true, json!({"status": "Accepted", "interval": 60}));
        let dispatcher =
            Dispatcher::new(registry, OcppSettings::default()).with_query_bridge(bridge.clone());
        let binding = FakeBinding::new("peer");
        dispatcher
            .connect_json("CP001", Some("acme".into()), binding.clone())
            .unwrap();

        dispatcher
            .handle_json_frame(
                binding.connection_id(),
                r#"[2,"b1","BootNotification",{"chargePointVendor":"V","chargePointModel":"M"}]"#,
            )
            .unwrap();

        assert_eq!(
            binding.last_frame().unwrap(),
            r#"[3,"b1",{"interval":60,"status":"Accepted"}]"#
        );
        let sql = bridge.sql();
        assert_eq!(sql[0], "SELECT CAST(ocpp.SetChargePointConnected('CP001', true) AS text)");
        assert!(sql[1].starts_with("SELECT CAST(ocpp.Parse('CP001', 'b1', 'BootNotification', '{"));
        assert!(sql[1].ends_with("::jsonb, 'acme') AS text)"));

        dispatcher.disconnect(binding.connection_id());
        assert_eq!(
            bridge.sql().last().unwrap(),
            "SELECT CAST(ocpp.SetChargePointConnected('CP001', false) AS text)"
        );
    }

    #[test]
    fn backend_rejection_is_a_call_error() {
        let registry = Arc::new(ChargingPointRegistry::new(SessionSettings::default()));
        let bridge = FakeBridge::parse_reply(
            false,
            json!({"errorCode": "SecurityError", "message": "Unknown tag"}),
        );
        let dispatcher = Dispatcher::new(registry, OcppSettings::default()).with_query_bridge(bridge);
        let binding = connected(&dispatcher, "CP001");
        dispatcher
            .handle_json_frame(binding.connection_id(), r#"[2,"a1","Authorize",{"idTag":"X"}]"#)
            .unwrap();
        assert_eq!(
            binding.last_frame().unwrap(),
            r#"[4,"a1","SecurityError","Unknown tag",{}]"#
        );
    }

    #[test]
    fn pending_backend_write_keeps_offline_session() {
        let registry = Arc::new(ChargingPointRegistry::new(SessionSettings {
            offline_grace: Duration::ZERO,
            ..SessionSettings::default()
        }));
        let bridge = FakeBridge::parse_reply(true, json!({}));
        let dispatcher =
            Dispatcher::new(registry.clone(), OcppSettings::default()).with_query_bridge(bridge.clone());
        let binding = connected(&dispatcher, "CP001");

        bridge.hold();
        dispatcher
            .handle_json_frame(binding.connection_id(), r#"[2,"s1","StatusNotification",{"connectorId":1,"errorCode":"NoError","status":"Available"}]"#)
            .unwrap();
        dispatcher.disconnect(binding.connection_id());

        let session = registry.find_by_identity("CP001").unwrap();
        assert_eq!(session.state(), SessionState::Offline);
        assert_eq!(session.pending_writes(), 2);
        assert_eq!(dispatcher.sweep().retired, 0);

        bridge.release();
        assert_eq!(session.pending_writes(), 0);
        assert_eq!(dispatcher.sweep().retired, 1);
        assert!(registry.find_by_identity("CP001").is_none());
    }

    #[test]
    fn webhook_answers_calls() {
        let registry = Arc::new(ChargingPointRegistry::new(SessionSettings::default()));
        let hook = FakeWebhook::answering(json!({
            "messageTypeId": 3,
            "payload": {"idTagInfo": {"status": "Blocked"}}
        }));
        let dispatcher = Dispatcher::new(registry, OcppSettings::default()).with_webhook(hook.clone());
        let binding = FakeBinding::new("peer");
        dispatcher
            .connect_json("CP001", Some("acme".into()), binding.clone())
            .unwrap();

        dispatcher
            .handle_json_frame(binding.connection_id(), r#"[2,"w1","Authorize",{"idTag":"TAG1"}]"#)
            .unwrap();

        assert_eq!(
            binding.last_frame().unwrap(),
            r#"[3,"w1",{"idTagInfo":{"status":"Blocked"}}]"#
        );
        assert_eq!(
            hook.bodies(),
            [json!({
                "identity": "CP001",
                "uniqueId": "w1",
                "action": "Authorize",
                "payload": {"idTag": "TAG1"},
                "account": "acme"
            })]
        );
        let session = dispatcher.registry().find_by_identity("CP001").unwrap();
        assert_eq!(session.pending_writes(), 0);
    }

    #[test]
    fn webhook_failures_become_call_errors() {
        let registry = Arc::new(ChargingPointRegistry::new(SessionSettings::default()));
        let hook = FakeWebhook::new(Ok(WebhookReply {
            status: 401,
            reason: "Unauthorized".into(),
            body: String::new(),
        }));
        let dispatcher = Dispatcher::new(registry, OcppSettings::default()).with_webhook(hook);
        let binding = connected(&dispatcher, "CP001");
        dispatcher
            .handle_json_frame(binding.connection_id(), r#"[2,"w2","Heartbeat",{}]"#)
            .unwrap();
        assert_eq!(
            binding.last_frame().unwrap(),
            r#"[4,"w2","InternalError","Unauthorized",{}]"#
        );
    }

    #[tokio::test]
    async fn list_endpoints_run_through_the_bridge() {
        let registry = Arc::new(ChargingPointRegistry::new(SessionSettings::default()));
        let bridge = FakeBridge::new(|_| {
            Ok(vec![
                vec![Some(r#"{"transactionId":1,"identity":"CP001"}"#.into())],
                vec![Some(r#"{"transactionId":2,"identity":"CP001"}"#.into())],
            ])
        });
        let dispatcher =
            Dispatcher::new(registry, OcppSettings::default()).with_query_bridge(bridge.clone());

        let list = dispatcher
            .query_endpoint(Some("tok"), "TransactionList", json!({"identity": "CP001"}))
            .await
            .unwrap();
        assert_eq!(list.as_array().unwrap().len(), 2);
        assert_eq!(list[1]["transactionId"], 2);
        assert_eq!(
            bridge.sql(),
            [r#"SELECT row_to_json(r)::text FROM ocpp.TransactionList('tok', '{"identity":"CP001"}'::jsonb) AS r"#]
        );
    }

    #[tokio::test]
    async fn list_endpoints_need_a_backend() {
        let dispatcher = dispatcher();
        assert_eq!(
            dispatcher
                .query_endpoint(None, "ReservationList", json!({"identity": "CP001"}))
                .await,
            Err(DispatchError::BackendDisabled)
        );
        assert_eq!(
            dispatcher.query_endpoint(None, "DropTables", json!({})).await,
            Err(DispatchError::Validation(CatalogError::UnknownEndpoint("DropTables".into())))
        );
    }

    #[tokio::test]
    async fn list_endpoint_errors_carry_status() {
        let registry = Arc::new(ChargingPointRegistry::new(SessionSettings::default()));
        let bridge = FakeBridge::new(|_| {
            Ok(vec![vec![Some(
                r#"{"error":{"code":403,"message":"Access denied"}}"#.into(),
            )]])
        });
        let dispatcher = Dispatcher::new(registry, OcppSettings::default()).with_query_bridge(bridge);
        assert_eq!(
            dispatcher
                .query_endpoint(None, "ReservationList", json!({"identity": "CP001"}))
                .await,
            Err(DispatchError::Backend {
                status: 403,
                message: "Access denied".into()
            })
        );
    }

    #[test]
    fn reply_to_unknown_call_is_ignored() {
        let dispatcher = dispatcher();
        let binding = connected(&dispatcher, "CP001");
        dispatcher
            .handle_json_frame(binding.connection_id(), r#"[3,"nobody",{}]"#)
            .unwrap();
        assert!(binding.frames().is_empty());
    }

    #[tokio::test]
    async fn execute_operation_round_trip() {
        let dispatcher = dispatcher();
        let binding = connected(&dispatcher, "CP001");

        let device = async {
            tokio::task::yield_now().await;
            let call = last_reply(&binding);
            assert_eq!(call.action(), Some("RemoteStartTransaction"));
            let frame = format!(r#"[3,"{}",{{"status":"Accepted"}}]"#, call.unique_id());
            dispatcher.handle_json_frame(binding.connection_id(), &frame).unwrap();
        };
        let (result, ()) = tokio::join!(
            dispatcher.execute_operation("CP001", "RemoteStartTransaction", json!({"idTag": "TAG1"})),
            device
        );
        assert_eq!(result.unwrap(), json!({"status": "Accepted"}));
        let session = dispatcher.registry().find_by_identity("CP001").unwrap();
        assert!(session.correlation().is_empty());
    }

    #[tokio::test]
    async fn execute_operation_reports_device_error() {
        let dispatcher = dispatcher();
        let binding = connected(&dispatcher, "CP001");

        let device = async {
            tokio::task::yield_now().await;
            let call = last_reply(&binding);
            let frame = format!(r#"[4,"{}","NotSupported","nope",{{}}]"#, call.unique_id());
            dispatcher.handle_json_frame(binding.connection_id(), &frame).unwrap();
        };
        let (result, ()) = tokio::join!(
            dispatcher.execute_operation("CP001", "ClearCache", json!({})),
            device
        );
        let err = result.unwrap_err();
        assert_eq!(err.to_string(), "NotSupported: nope");
    }

    #[tokio::test]
    async fn execute_operation_failures_before_sending() {
        let dispatcher = dispatcher();
        assert_eq!(
            dispatcher.execute_operation("CP404", "Reset", json!({"type": "Soft"})).await,
            Err(DispatchError::UnknownChargePoint("CP404".into()))
        );

        let binding = connected(&dispatcher, "CP001");
        let err = dispatcher
            .execute_operation("CP001", "RemoteStartTransaction", json!({}))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            DispatchError::Validation(CatalogError::MissingRequiredField {
                operation: "RemoteStartTransaction".into(),
                field: "idTag".into(),
            })
        );
        assert!(matches!(
            dispatcher.execute_operation("CP001", "Reset", json!({"type": "Soft", "x": 1})).await,
            Err(DispatchError::Validation(CatalogError::UnknownField { .. }))
        ));

        dispatcher.disconnect(binding.connection_id());
        assert_eq!(
            dispatcher.execute_operation("CP001", "Reset", json!({"type": "Soft"})).await,
            Err(DispatchError::Offline("CP001".into()))
        );
    }

    #[tokio::test]
    async fn execute_operation_times_out() {
        let registry = Arc::new(ChargingPointRegistry::new(SessionSettings {
            call_timeout: Duration::from_millis(20),
            ..SessionSettings::default()
        }));
        let dispatcher = Dispatcher::new(registry, OcppSettings::default());
        connected(&dispatcher, "CP001");
        assert_eq!(
            dispatcher.execute_operation("CP001", "ClearCache", json!({})).await,
            Err(DispatchError::Timeout("CP001".into()))
        );
        let session = dispatcher.registry().find_by_identity("CP001").unwrap();
        assert!(session.correlation().is_empty());
    }

    #[test]
    fn reconnect_takes_over_the_session() {
        let dispatcher = dispatcher();
        let first = connected(&dispatcher, "CP001");
        let second = connected(&dispatcher, "CP001");
        assert!(first.is_closed());

        dispatcher.disconnect(first.connection_id());
        let session = dispatcher.registry().find_by_identity("CP001").unwrap();
        assert_eq!(session.connection_id(), Some(second.connection_id()));
        assert_eq!(dispatcher.charge_point_list().len(), 1);
    }

    #[test]
    fn charge_point_list_is_sorted() {
        let dispatcher = dispatcher();
        connected(&dispatcher, "CP002");
        connected(&dispatcher, "CP001");
        let list: Vec<_> = dispatcher
            .charge_point_list()
            .into_iter()
            .map(|s| s.identity)
            .collect();
        assert_eq!(list, ["CP001", "CP002"]);
    }

    const SOAP_AUTHORIZE: &str = r#"<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope" xmlns:a="http://www.w3.org/2005/08/addressing" xmlns="urn://Ocpp/Cs/2012/06/">
  <s:Header>
    <chargeBoxIdentity>CP-SOAP-1</chargeBoxIdentity>
    <a:Action>/Authorize</a:Action>
    <a:MessageID>urn:uuid:0d5c8a8e</a:MessageID>
    <a:From><a:Address>http://10.0.0.5:8080/</a:Address></a:From>
    <a:To>http://cs.example.com/Ocpp</a:To>
  </s:Header>
  <s:Body><authorizeRequest><idTag>TAG1</idTag></authorizeRequest></s:Body>
</s:Envelope>"#;

    #[tokio::test]
    async fn soap_request_gets_soap_reply() {
        let dispatcher = dispatcher();
        let reply = dispatcher.handle_soap(SOAP_AUTHORIZE, "10.0.0.5").await;

        assert!(reply.contains("<authorizeResponse>"), "{reply}");
        assert!(reply.contains("<status>Accepted</status>"));
        assert!(reply.contains("<a:RelatesTo>urn:uuid:0d5c8a8e</a:RelatesTo>"));
        assert!(reply.contains("<a:Action>/AuthorizeResponse</a:Action>"));

        let session = dispatcher.registry().find_by_identity("CP-SOAP-1").unwrap();
        assert_eq!(session.protocol(), TransportProtocol::Soap);
        assert_eq!(session.address(), "http://10.0.0.5:8080/");

        // A second request from the same address reuses the binding.
        let connection = session.connection_id();
        dispatcher.handle_soap(SOAP_AUTHORIZE, "10.0.0.5").await;
        assert_eq!(session.connection_id(), connection);
    }

    #[tokio::test]
    async fn soap_failures_are_faults() {
        let dispatcher = dispatcher();
        let reply = dispatcher.handle_soap("plain text", "peer").await;
        assert!(reply.contains("<s:Fault>"));
        assert!(reply.contains("FormationViolation"));

        let missing = SOAP_AUTHORIZE.replace("<idTag>TAG1</idTag>", "");
        let reply = dispatcher.handle_soap(&missing, "peer").await;
        assert!(reply.contains("OccurenceConstraintViolation"), "{reply}");
        assert!(reply.contains("<s:Value>s:Sender</s:Value>"));
    }

    #[tokio::test]
    async fn soap_commands_are_pushed() {
        let registry = Arc::new(ChargingPointRegistry::new(SessionSettings::default()));
        let push = FakePush::new(|_| {
            Ok(r#"<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope"><s:Body><unlockConnectorResponse><status>Unlocked</status></unlockConnectorResponse></s:Body></s:Envelope>"#.to_string())
        });
        let dispatcher =
            Dispatcher::new(registry, OcppSettings::default()).with_soap_push(push.clone());
        dispatcher.handle_soap(SOAP_AUTHORIZE, "10.0.0.5").await;

        let result = dispatcher
            .execute_operation("CP-SOAP-1", "UnlockConnector", json!({"connectorId": 1}))
            .await;
        assert_eq!(result.unwrap(), json!({"status": "Unlocked"}));

        let pushed = push.pushed.lock().unwrap();
        assert_eq!(pushed[0].0, "http://10.0.0.5:8080/");
        assert!(pushed[0].1.contains("<unlockConnectorRequest>"));
        assert!(pushed[0].1.contains("<connectorId>1</connectorId>"));
    }

    #[test]
    fn shutdown_closes_everything() {
        let dispatcher = dispatcher();
        let binding = connected(&dispatcher, "CP001");
        dispatcher.shutdown("server shutting down");
        assert!(binding.is_closed());
        assert!(dispatcher.charge_point_list().is_empty());
    }
}
