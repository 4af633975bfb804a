//! Charging point session
//!
//! One device's identity, transport binding, outbound-call table and last
//! parsed request records. The transport binding is replaced on reconnect
//! while the correlation table stays, so calls issued before a takeover are
//! still answered through the new connection.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::correlation::{CallFailure, Continuation, CorrelationManager};
use crate::application::ports::{ConnectionId, ReplyRoute, SharedBinding};
use crate::codec::soap::{self, ServiceNamespace, SoapError};
use crate::codec::json;
use crate::domain::{
    CanonicalMessage, ErrorCode, PendingTransactionState, ProtocolFault, TransportProtocol,
};
use crate::support::SessionError;

/// Stable arena handle of a session
pub type SessionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    /// Attached to a connection, identity not announced yet
    Unbound,
    /// Identity known, live transport
    Online,
    /// Identity known, no transport
    Offline,
    Retired,
}

/// Settings shared by every session of a registry
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Deadline of an outbound Call
    pub call_timeout: Duration,
    /// How long an offline session is kept for a reconnect
    pub offline_grace: Duration,
    /// `From` address of SOAP requests pushed to charge points
    pub central_system_url: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(30),
            offline_grace: Duration::from_secs(60),
            central_system_url: "http://localhost:9000/Ocpp".to_string(),
        }
    }
}

/// Connection details for listings
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSnapshot {
    pub connection_id: ConnectionId,
    pub peer: String,
    pub connected_at: DateTime<Utc>,
}

/// Serializable view of a session
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub identity: String,
    pub address: String,
    pub account: Option<String>,
    pub protocol: TransportProtocol,
    pub state: SessionState,
    pub pending_calls: usize,
    pub pending_writes: usize,
    pub last_activity: DateTime<Utc>,
    pub connection: Option<ConnectionSnapshot>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct ChargingPointSession {
    id: SessionId,
    protocol: TransportProtocol,
    settings: Arc<SessionSettings>,
    identity: RwLock<String>,
    account: RwLock<Option<String>>,
    address: RwLock<String>,
    binding: RwLock<Option<SharedBinding>>,
    correlation: Arc<CorrelationManager>,
    records: Mutex<PendingTransactionState>,
    transaction_counter: AtomicI64,
    pending_writes: AtomicUsize,
    retired: AtomicBool,
    offline_since: Mutex<Option<Instant>>,
    last_activity: Mutex<DateTime<Utc>>,
}

impl ChargingPointSession {
    pub fn new(
        id: SessionId,
        protocol: TransportProtocol,
        binding: SharedBinding,
        settings: Arc<SessionSettings>,
    ) -> Self {
        let address = binding.peer();
        Self {
            id,
            protocol,
            correlation: Arc::new(CorrelationManager::new(settings.call_timeout)),
            settings,
            identity: RwLock::new(String::new()),
            account: RwLock::new(None),
            address: RwLock::new(address),
            binding: RwLock::new(Some(binding)),
            records: Mutex::new(PendingTransactionState::default()),
            transaction_counter: AtomicI64::new(0),
            pending_writes: AtomicUsize::new(0),
            retired: AtomicBool::new(false),
            offline_since: Mutex::new(None),
            last_activity: Mutex::new(Utc::now()),
        }
    }

    // ── Identity ───────────────────────────────────────────

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn protocol(&self) -> TransportProtocol {
        self.protocol
    }

    pub fn identity(&self) -> String {
        read(&self.identity).clone()
    }

    pub(crate) fn set_identity(&self, identity: &str) {
        *write(&self.identity) = identity.to_string();
    }

    pub fn account(&self) -> Option<String> {
        read(&self.account).clone()
    }

    pub fn set_account(&self, account: Option<String>) {
        *write(&self.account) = account;
    }

    pub fn address(&self) -> String {
        read(&self.address).clone()
    }

    pub fn set_address(&self, address: impl Into<String>) {
        *write(&self.address) = address.into();
    }

    // ── Transport binding ──────────────────────────────────

    pub fn binding(&self) -> Option<SharedBinding> {
        read(&self.binding).clone()
    }

    pub fn connection_id(&self) -> Option<ConnectionId> {
        read(&self.binding).as_ref().map(|b| b.connection_id())
    }

    pub fn is_online(&self) -> bool {
        read(&self.binding).as_ref().is_some_and(|b| b.is_open())
    }

    /// Replace the transport binding, keeping the correlation table.
    /// Returns the previous binding, which the caller should close.
    pub(crate) fn switch_transport(&self, new_binding: SharedBinding) -> Option<SharedBinding> {
        let previous = write(&self.binding).replace(new_binding);
        *lock(&self.offline_since) = None;
        self.touch();
        previous
    }

    /// Drop the binding if it is still `connection_id`.
    pub(crate) fn detach(&self, connection_id: ConnectionId) -> Option<SharedBinding> {
        let mut binding = write(&self.binding);
        if binding.as_ref().map(|b| b.connection_id()) != Some(connection_id) {
            return None;
        }
        *lock(&self.offline_since) = Some(Instant::now());
        binding.take()
    }

    // ── Outbound calls ─────────────────────────────────────

    pub fn correlation(&self) -> &Arc<CorrelationManager> {
        &self.correlation
    }

    /// Send a Call and register `continuation` for its reply.
    ///
    /// Fails with `TransportOffline` when there is no live binding; the
    /// continuation is then dropped without being registered. A send error
    /// after registration resolves the call with a transport failure.
    pub fn send(
        &self,
        action: &str,
        payload: Value,
        continuation: Continuation,
    ) -> Result<String, SessionError> {
        if self.is_retired() {
            return Err(SessionError::Retired(self.identity()));
        }
        let binding = self
            .binding()
            .filter(|b| b.is_open())
            .ok_or_else(|| SessionError::TransportOffline(self.identity()))?;

        let unique_id = self.correlation.issue(action, continuation);
        let text = match self.encode_call(action, &unique_id, &payload) {
            Ok(text) => text,
            Err(e) => {
                warn!(identity = %self.identity(), unique_id = %unique_id, error = %e, "Call not encodable");
                let fault = ProtocolFault::new(ErrorCode::FormationViolation, e.to_string());
                self.correlation.resolve(&unique_id, Err(CallFailure::Rejected(fault)));
                return Ok(unique_id);
            }
        };
        let route = ReplyRoute {
            unique_id: unique_id.clone(),
            correlation: self.correlation.clone(),
        };

        info!(
            identity = %self.identity(),
            unique_id = %unique_id,
            action,
            protocol = %self.protocol,
            "Sending call"
        );
        metrics::counter!("ocpp_calls_sent_total", "action" => action.to_string()).increment(1);

        if let Err(e) = binding.send_text(text, Some(route)) {
            warn!(identity = %self.identity(), unique_id = %unique_id, error = %e, "Send failed");
            self.correlation
                .resolve(&unique_id, Err(CallFailure::Transport(e.to_string())));
        }
        Ok(unique_id)
    }

    fn encode_call(&self, action: &str, unique_id: &str, payload: &Value) -> Result<String, SoapError> {
        match self.protocol {
            TransportProtocol::Json => {
                Ok(json::encode(&CanonicalMessage::call(unique_id, action, payload.clone())))
            }
            TransportProtocol::Soap => {
                let headers = soap::request_headers(
                    &self.identity(),
                    action,
                    unique_id,
                    &self.settings.central_system_url,
                    &self.address(),
                );
                soap::encode_envelope(
                    ServiceNamespace::ChargePoint,
                    &headers,
                    &soap::body_element(action, "Request"),
                    payload,
                )
            }
        }
    }

    /// Send a reply frame over the live binding (OCPP-J only; SOAP replies
    /// travel in the HTTP response).
    pub fn reply(&self, message: &CanonicalMessage) -> Result<(), SessionError> {
        let binding = self
            .binding()
            .ok_or_else(|| SessionError::TransportOffline(self.identity()))?;
        binding
            .send_text(json::encode(message), None)
            .map_err(|_| SessionError::TransportOffline(self.identity()))
    }

    // ── Records and counters ───────────────────────────────

    /// Remember the payload of a tracked request.
    pub fn record(&self, action: &str, payload: &Map<String, Value>) {
        if let Err(e) = lock(&self.records).record(action, payload) {
            debug!(identity = %self.identity(), action, error = %e, "Request not recorded");
        }
    }

    pub fn records(&self) -> PendingTransactionState {
        lock(&self.records).clone()
    }

    pub fn next_transaction_id(&self) -> i64 {
        self.transaction_counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Mark a backend write attributed to this session as in flight.
    pub fn begin_write(&self) {
        self.pending_writes.fetch_add(1, Ordering::SeqCst);
    }

    pub fn end_write(&self) {
        let _ = self
            .pending_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    pub fn pending_writes(&self) -> usize {
        self.pending_writes.load(Ordering::SeqCst)
    }

    pub fn touch(&self) {
        *lock(&self.last_activity) = Utc::now();
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        *lock(&self.last_activity)
    }

    // ── Lifecycle ──────────────────────────────────────────

    pub fn state(&self) -> SessionState {
        if self.is_retired() {
            SessionState::Retired
        } else if read(&self.identity).is_empty() {
            SessionState::Unbound
        } else if read(&self.binding).is_some() {
            SessionState::Online
        } else {
            SessionState::Offline
        }
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }

    /// Offline past the reconnect grace with no pending calls or writes.
    pub fn can_retire(&self, now: Instant) -> bool {
        if self.is_retired() || read(&self.binding).is_some() {
            return false;
        }
        if !self.correlation.is_empty() || self.pending_writes() > 0 {
            return false;
        }
        match *lock(&self.offline_since) {
            Some(since) => now.saturating_duration_since(since) >= self.settings.offline_grace,
            None => true,
        }
    }

    /// Flag the session retired and take its binding. Pending calls are
    /// left for [`drain`](Self::drain).
    pub(crate) fn mark_retired(&self) -> Option<SharedBinding> {
        self.retired.store(true, Ordering::SeqCst);
        write(&self.binding).take()
    }

    /// Fail every pending call with `reason`.
    pub fn drain(&self, reason: &str) -> usize {
        let drained = self.correlation.drain(reason);
        if drained > 0 {
            metrics::counter!("ocpp_call_outcomes_total", "outcome" => "drained")
                .increment(drained as u64);
        }
        drained
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let connection = self.binding().map(|b| ConnectionSnapshot {
            connection_id: b.connection_id(),
            peer: b.peer(),
            connected_at: b.connected_at(),
        });
        SessionSnapshot {
            identity: self.identity(),
            address: self.address(),
            account: self.account(),
            protocol: self.protocol,
            state: self.state(),
            pending_calls: self.correlation.pending_count(),
            pending_writes: self.pending_writes(),
            last_activity: self.last_activity(),
            connection,
        }
    }
}
