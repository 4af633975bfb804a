//! In-memory collaborators for unit tests

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use crate::application::ports::{
    next_connection_id, CallWebhook, ConnectionId, PushCallback, QueryBridge, QueryCallback,
    QueryRows, ReplyRoute, SoapPush, TransportBinding, WebhookCallback, WebhookReply,
};
use crate::support::{BackendError, TransportError};

/// Binding that records every frame it is asked to send.
pub struct FakeBinding {
    id: ConnectionId,
    peer: String,
    connected_at: DateTime<Utc>,
    open: AtomicBool,
    pub sent: Mutex<Vec<String>>,
    pub routes: Mutex<Vec<ReplyRoute>>,
}

impl FakeBinding {
    pub fn new(peer: &str) -> Arc<Self> {
        Arc::new(Self {
            id: next_connection_id(),
            peer: peer.to_string(),
            connected_at: Utc::now(),
            open: AtomicBool::new(true),
            sent: Mutex::new(Vec::new()),
            routes: Mutex::new(Vec::new()),
        })
    }

    pub fn frames(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn last_frame(&self) -> Option<String> {
        self.sent.lock().unwrap().last().cloned()
    }

    pub fn is_closed(&self) -> bool {
        !self.open.load(Ordering::SeqCst)
    }
}

impl TransportBinding for FakeBinding {
    fn connection_id(&self) -> ConnectionId {
        self.id
    }

    fn peer(&self) -> String {
        self.peer.clone()
    }

    fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    fn send_text(&self, text: String, route: Option<ReplyRoute>) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed(self.id));
        }
        self.sent.lock().unwrap().push(text);
        if let Some(route) = route {
            self.routes.lock().unwrap().push(route);
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

/// Query bridge that answers every statement with a canned reply.
pub struct FakeBridge {
    pub statements: Mutex<Vec<String>>,
    reply: Mutex<Box<dyn FnMut(&str) -> Result<QueryRows, String> + Send>>,
    held: Mutex<Vec<(String, QueryCallback)>>,
    hold: AtomicBool,
}

impl FakeBridge {
    pub fn new(reply: impl FnMut(&str) -> Result<QueryRows, String> + Send + 'static) -> Arc<Self> {
        Arc::new(Self {
            statements: Mutex::new(Vec::new()),
            reply: Mutex::new(Box::new(reply)),
            held: Mutex::new(Vec::new()),
            hold: AtomicBool::new(false),
        })
    }

    /// Bridge whose `ocpp.Parse` replies wrap `response` with `result`.
    pub fn parse_reply(result: bool, response: serde_json::Value) -> Arc<Self> {
        Self::new(move |sql| {
            if sql.contains("ocpp.Parse") {
                let body = serde_json::json!({"result": result, "response": response});
                Ok(vec![vec![Some(body.to_string())]])
            } else {
                Ok(vec![vec![Some("t".into())]])
            }
        })
    }

    /// Keep callbacks until [`release`](Self::release) is called.
    pub fn hold(&self) {
        self.hold.store(true, Ordering::SeqCst);
    }

    pub fn release(&self) {
        let held: Vec<_> = self.held.lock().unwrap().drain(..).collect();
        for (sql, callback) in held {
            let reply = self.answer(&sql);
            callback(reply.map_err(BackendError::InvalidReply));
        }
    }

    fn answer(&self, sql: &str) -> Result<QueryRows, String> {
        let mut reply = self.reply.lock().unwrap();
        (*reply)(sql)
    }

    pub fn sql(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }
}

impl QueryBridge for FakeBridge {
    fn submit(&self, sql: String, on_complete: QueryCallback) {
        self.statements.lock().unwrap().push(sql.clone());
        if self.hold.load(Ordering::SeqCst) {
            self.held.lock().unwrap().push((sql, on_complete));
            return;
        }
        let reply = self.answer(&sql);
        on_complete(reply.map_err(BackendError::InvalidReply));
    }
}

/// SOAP push client that answers with a fixed envelope.
pub struct FakePush {
    pub pushed: Mutex<Vec<(String, String)>>,
    reply: Box<dyn Fn(&str) -> Result<String, String> + Send + Sync>,
}

impl FakePush {
    pub fn new(reply: impl Fn(&str) -> Result<String, String> + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            pushed: Mutex::new(Vec::new()),
            reply: Box::new(reply),
        })
    }
}

impl SoapPush for FakePush {
    fn push(&self, address: &str, envelope: String, on_complete: PushCallback) {
        let reply = (self.reply)(&envelope);
        self.pushed.lock().unwrap().push((address.to_string(), envelope));
        on_complete(reply.map_err(BackendError::InvalidReply));
    }
}

/// Webhook that records request bodies and answers with a fixed reply.
pub struct FakeWebhook {
    pub posted: Mutex<Vec<serde_json::Value>>,
    reply: Result<WebhookReply, String>,
}

impl FakeWebhook {
    pub fn new(reply: Result<WebhookReply, String>) -> Arc<Self> {
        Arc::new(Self {
            posted: Mutex::new(Vec::new()),
            reply,
        })
    }

    /// `200 OK` with the given JSON body.
    pub fn answering(body: serde_json::Value) -> Arc<Self> {
        Self::new(Ok(WebhookReply {
            status: 200,
            reason: "OK".into(),
            body: body.to_string(),
        }))
    }

    pub fn bodies(&self) -> Vec<serde_json::Value> {
        self.posted.lock().unwrap().clone()
    }
}

impl CallWebhook for FakeWebhook {
    fn post(&self, body: serde_json::Value, on_complete: WebhookCallback) {
        self.posted.lock().unwrap().push(body);
        on_complete(self.reply.clone().map_err(BackendError::InvalidReply));
    }
}
