//! Ports to the collaborators around the protocol engine
//!
//! The engine never performs I/O itself. Transport connections, the backend
//! query facility, the Call webhook and the outbound SOAP client are reached
//! through these traits; every call returns immediately and reports
//! completion through a continuation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::application::session::correlation::CorrelationManager;
use crate::support::{BackendError, TransportError};

/// Opaque handle of one transport connection
pub type ConnectionId = u64;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

pub fn next_connection_id() -> ConnectionId {
    NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)
}

// ── Transport ──────────────────────────────────────────────────

/// Where the reply to an outbound Call must be delivered when it does not
/// arrive on the connection's own inbound stream.
#[derive(Clone)]
pub struct ReplyRoute {
    pub unique_id: String,
    pub correlation: Arc<CorrelationManager>,
}

/// A live transport connection to a charging point.
pub trait TransportBinding: Send + Sync {
    fn connection_id(&self) -> ConnectionId;

    /// Network address of the peer
    fn peer(&self) -> String;

    fn connected_at(&self) -> DateTime<Utc>;

    /// Hand one encoded frame to the transport. `route` is set for
    /// outbound Calls.
    fn send_text(&self, text: String, route: Option<ReplyRoute>) -> Result<(), TransportError>;

    fn is_open(&self) -> bool;

    /// Close the underlying connection. Idempotent.
    fn close(&self);
}

pub type SharedBinding = Arc<dyn TransportBinding>;

// ── Backend ────────────────────────────────────────────────────

/// Result rows of a backend query, each column rendered as text.
pub type QueryRows = Vec<Vec<Option<String>>>;

pub type QueryCallback = Box<dyn FnOnce(Result<QueryRows, BackendError>) + Send + 'static>;

/// Non-blocking SQL execution facility.
pub trait QueryBridge: Send + Sync {
    fn submit(&self, sql: String, on_complete: QueryCallback);
}

pub type SharedQueryBridge = Arc<dyn QueryBridge>;

pub type PushCallback = Box<dyn FnOnce(Result<String, BackendError>) + Send + 'static>;

/// Delivers SOAP envelopes to a charge point's own HTTP endpoint.
pub trait SoapPush: Send + Sync {
    fn push(&self, address: &str, envelope: String, on_complete: PushCallback);
}

pub type SharedSoapPush = Arc<dyn SoapPush>;

// ── Webhook ────────────────────────────────────────────────────

/// HTTP reply of the webhook endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookReply {
    pub status: u16,
    /// Status line reason, e.g. `Bad Gateway`
    pub reason: String,
    pub body: String,
}

pub type WebhookCallback = Box<dyn FnOnce(Result<WebhookReply, BackendError>) + Send + 'static>;

/// Forwards inbound Calls to an external HTTP service.
pub trait CallWebhook: Send + Sync {
    fn post(&self, body: Value, on_complete: WebhookCallback);
}

pub type SharedWebhook = Arc<dyn CallWebhook>;
