//! Transport binding of an OCPP-S charge point
//!
//! A SOAP device has no persistent connection. Requests to it are pushed as
//! HTTP POSTs to the address it announced in its `From` header, and the
//! reply envelope comes back in the HTTP response rather than on an inbound
//! stream, so it is decoded here and resolved through the reply route.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::application::ports::{
    next_connection_id, ConnectionId, ReplyRoute, SharedSoapPush, TransportBinding,
};
use crate::application::session::{CallFailure, CallOutcome};
use crate::codec::SoapMessage;
use crate::support::{BackendError, TransportError};

pub struct SoapPushBinding {
    id: ConnectionId,
    address: String,
    connected_at: DateTime<Utc>,
    push: SharedSoapPush,
    open: AtomicBool,
}

impl SoapPushBinding {
    pub fn new(address: impl Into<String>, push: SharedSoapPush) -> Arc<Self> {
        Arc::new(Self {
            id: next_connection_id(),
            address: address.into(),
            connected_at: Utc::now(),
            push,
            open: AtomicBool::new(true),
        })
    }
}

/// Outcome carried by the HTTP reply to a pushed request.
fn reply_outcome(reply: Result<String, BackendError>) -> CallOutcome {
    let body = reply.map_err(|e| CallFailure::Transport(e.to_string()))?;
    let canonical = SoapMessage::decode(&body)
        .and_then(|message| message.to_canonical())
        .map_err(|e| CallFailure::Transport(format!("Invalid SOAP reply: {e}")))?;
    match canonical.into_outcome() {
        Some(Ok(payload)) => Ok(payload),
        Some(Err(fault)) => Err(CallFailure::Rejected(fault)),
        None => Err(CallFailure::Transport("SOAP reply is a request".to_string())),
    }
}

impl TransportBinding for SoapPushBinding {
    fn connection_id(&self) -> ConnectionId {
        self.id
    }

    fn peer(&self) -> String {
        self.address.clone()
    }

    fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    fn send_text(&self, text: String, route: Option<ReplyRoute>) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed(self.id));
        }
        let address = self.address.clone();
        self.push.push(
            &self.address,
            text,
            Box::new(move |reply| {
                let Some(route) = route else {
                    return;
                };
                let outcome = reply_outcome(reply);
                if let Err(failure) = &outcome {
                    warn!(address = %address, unique_id = %route.unique_id, error = %failure, "SOAP push failed");
                }
                if !route.correlation.resolve(&route.unique_id, outcome) {
                    debug!(unique_id = %route.unique_id, "SOAP reply for a call no longer pending");
                }
            }),
        );
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}
