//! Transport binding backed by one WebSocket connection

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::application::ports::{next_connection_id, ConnectionId, ReplyRoute, TransportBinding};
use crate::support::TransportError;

/// Frames queued for the connection's writer task
#[derive(Debug, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close,
}

pub struct WsBinding {
    id: ConnectionId,
    peer: SocketAddr,
    connected_at: DateTime<Utc>,
    tx: mpsc::UnboundedSender<Outbound>,
    open: AtomicBool,
}

impl WsBinding {
    pub fn new(peer: SocketAddr, tx: mpsc::UnboundedSender<Outbound>) -> Arc<Self> {
        Arc::new(Self {
            id: next_connection_id(),
            peer,
            connected_at: Utc::now(),
            tx,
            open: AtomicBool::new(true),
        })
    }
}

impl TransportBinding for WsBinding {
    fn connection_id(&self) -> ConnectionId {
        self.id
    }

    fn peer(&self) -> String {
        self.peer.to_string()
    }

    fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    // Replies to our Calls come back on the inbound stream, so the route is
    // not needed here.
    fn send_text(&self, text: String, _route: Option<ReplyRoute>) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed(self.id));
        }
        self.tx
            .send(Outbound::Text(text))
            .map_err(|_| TransportError::Closed(self.id))
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.tx.is_closed()
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            let _ = self.tx.send(Outbound::Close);
        }
    }
}
