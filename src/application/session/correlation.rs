//! Correlation of outbound Calls with their replies
//!
//! Every Call the Central System sends is registered under its unique id
//! together with a continuation. The matching `CallResult`/`CallError`, a
//! deadline sweep, or session teardown removes the entry and invokes the
//! continuation. Removal from the map is the single point that decides who
//! runs a continuation, so it fires at most once.

use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::ProtocolFault;
use crate::support::SessionError;

/// Why an outbound Call did not produce a result payload
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CallFailure {
    /// The charge point answered with a CallError or SOAP fault
    #[error("{0}")]
    Rejected(ProtocolFault),

    #[error("Session closed: {0}")]
    SessionClosed(String),

    #[error("Response timeout")]
    Timeout,

    #[error("Transport error: {0}")]
    Transport(String),
}

pub type CallOutcome = Result<Value, CallFailure>;

/// Invoked exactly once with the outcome of a Call.
pub type Continuation = Box<dyn FnOnce(CallOutcome) + Send + Sync + 'static>;

/// Pending outbound Call waiting for its reply
struct PendingCall {
    action: String,
    continuation: Continuation,
    issued_at: Instant,
    deadline: Instant,
}

/// Snapshot of a pending call for diagnostics
#[derive(Debug, Clone)]
pub struct PendingCallInfo {
    pub unique_id: String,
    pub action: String,
    pub age: Duration,
}

/// Per-session table of outstanding Calls
pub struct CorrelationManager {
    pending: DashMap<String, PendingCall>,
    call_timeout: Duration,
}

impl CorrelationManager {
    pub fn new(call_timeout: Duration) -> Self {
        Self {
            pending: DashMap::new(),
            call_timeout,
        }
    }

    /// Register `continuation` under `unique_id`.
    pub fn register(
        &self,
        unique_id: impl Into<String>,
        action: impl Into<String>,
        continuation: Continuation,
    ) -> Result<(), SessionError> {
        let unique_id = unique_id.into();
        match self.pending.entry(unique_id) {
            Entry::Occupied(entry) => Err(SessionError::DuplicateUniqueId(entry.key().clone())),
            Entry::Vacant(entry) => {
                let now = Instant::now();
                entry.insert(PendingCall {
                    action: action.into(),
                    continuation,
                    issued_at: now,
                    deadline: now + self.call_timeout,
                });
                Ok(())
            }
        }
    }

    /// Register under a freshly generated unique id and return it.
    pub fn issue(&self, action: &str, continuation: Continuation) -> String {
        loop {
            let unique_id = generate_unique_id();
            if let Entry::Vacant(entry) = self.pending.entry(unique_id.clone()) {
                let now = Instant::now();
                entry.insert(PendingCall {
                    action: action.to_string(),
                    continuation,
                    issued_at: now,
                    deadline: now + self.call_timeout,
                });
                return unique_id;
            }
            debug!(unique_id = %unique_id, "Unique id collision, regenerating");
        }
    }

    /// Match a reply against its pending call. Returns `false` when nothing
    /// was waiting for `unique_id`.
    pub fn resolve(&self, unique_id: &str, outcome: CallOutcome) -> bool {
        match self.pending.remove(unique_id) {
            Some((_, call)) => {
                let elapsed = call.issued_at.elapsed();
                match &outcome {
                    Ok(_) => info!(unique_id, action = %call.action, ?elapsed, "Call resolved"),
                    Err(e) => warn!(unique_id, action = %call.action, error = %e, "Call failed"),
                }
                (call.continuation)(outcome);
                true
            }
            None => {
                warn!(unique_id, "Reply for unknown or already resolved call, ignoring");
                false
            }
        }
    }

    /// Fail every pending call with `reason` and clear the table.
    pub fn drain(&self, reason: &str) -> usize {
        let ids: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
        let mut drained = 0;
        for id in ids {
            if let Some((_, call)) = self.pending.remove(&id) {
                debug!(unique_id = %id, action = %call.action, reason, "Draining pending call");
                (call.continuation)(Err(CallFailure::SessionClosed(reason.to_string())));
                drained += 1;
            }
        }
        drained
    }

    /// Fail every call whose deadline is before `now` with `Timeout`.
    pub fn expire(&self, now: Instant) -> usize {
        let expired: Vec<String> = self
            .pending
            .iter()
            .filter(|e| e.deadline <= now)
            .map(|e| e.key().clone())
            .collect();
        let mut count = 0;
        for id in expired {
            if let Some((_, call)) = self.pending.remove(&id) {
                warn!(unique_id = %id, action = %call.action, "Call timed out");
                (call.continuation)(Err(CallFailure::Timeout));
                count += 1;
            }
        }
        count
    }

    pub fn contains(&self, unique_id: &str) -> bool {
        self.pending.contains_key(unique_id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn snapshot(&self) -> Vec<PendingCallInfo> {
        self.pending
            .iter()
            .map(|e| PendingCallInfo {
                unique_id: e.key().clone(),
                action: e.action.clone(),
                age: e.issued_at.elapsed(),
            })
            .collect()
    }
}

/// 32 lowercase hex characters.
pub fn generate_unique_id() -> String {
    Uuid::new_v4().simple().to_string()
}
