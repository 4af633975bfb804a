//! OCPP-J WebSocket server
//!
//! Accepts charge-point connections at `ws://<host>:<port>/ocpp/{identity}`
//! and feeds their frames to the [`Dispatcher`](crate::application::Dispatcher).

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use super::binding::{Outbound, WsBinding};
use super::handshake::{self, ConnectTarget, OCPP_SUBPROTOCOL};
use crate::application::ports::TransportBinding;
use crate::application::SharedDispatcher;
use crate::support::shutdown::ShutdownSignal;

/// How long the writer gets to flush after the reader stopped
const WRITER_DRAIN: Duration = Duration::from_millis(500);

type ServerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// OCPP WebSocket Server
pub struct OcppServer {
    address: String,
    dispatcher: SharedDispatcher,
    shutdown_signal: Option<ShutdownSignal>,
}

impl OcppServer {
    pub fn new(address: impl Into<String>, dispatcher: SharedDispatcher) -> Self {
        Self {
            address: address.into(),
            dispatcher,
            shutdown_signal: None,
        }
    }

    /// Set the shutdown signal for graceful shutdown
    pub fn with_shutdown(mut self, signal: ShutdownSignal) -> Self {
        self.shutdown_signal = Some(signal);
        self
    }

    /// Start the WebSocket server
    pub async fn run(&self) -> ServerResult {
        let listener = TcpListener::bind(&self.address).await?;

        info!("🔌 OCPP-J endpoint started on ws://{}", self.address);
        info!(
            "   Charge points should connect to: ws://{}/ocpp/{{identity}}",
            self.address
        );

        if let Some(ref shutdown) = self.shutdown_signal {
            self.run_with_shutdown(listener, shutdown.clone()).await
        } else {
            self.run_loop(listener).await
        }
    }

    async fn run_loop(&self, listener: TcpListener) -> ServerResult {
        while let Ok((stream, addr)) = listener.accept().await {
            self.spawn_connection(stream, addr);
        }
        Ok(())
    }

    async fn run_with_shutdown(&self, listener: TcpListener, shutdown: ShutdownSignal) -> ServerResult {
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            self.spawn_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                        }
                    }
                }
                _ = shutdown.notified().wait() => {
                    info!("🛑 WebSocket server received shutdown signal");
                    self.graceful_shutdown();
                    return Ok(());
                }
            }
        }
    }

    fn spawn_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let dispatcher = self.dispatcher.clone();
        let shutdown = self.shutdown_signal.clone();

        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, addr, dispatcher, shutdown).await {
                error!("Connection error from {}: {}", addr, e);
            }
        });
    }

    fn graceful_shutdown(&self) {
        let drained = self.dispatcher.shutdown("server shutting down");
        info!(drained, "✅ WebSocket server shutdown complete");
    }
}

fn reject(status: StatusCode, reason: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason.to_string()));
    *response.status_mut() = status;
    response
}

/// Validate the upgrade request and pick the subprotocol. tungstenite has
/// already checked the key and set `Sec-WebSocket-Accept`.
fn negotiate(
    req: &Request,
    mut response: Response,
    addr: SocketAddr,
) -> Result<(ConnectTarget, Response), ErrorResponse> {
    let path = req.uri().path();
    info!("WebSocket handshake from: {}, path: {}", addr, path);

    let Some(target) = handshake::parse_path(path) else {
        warn!(%addr, path, "Handshake without charge point identity rejected");
        return Err(reject(StatusCode::BAD_REQUEST, "Missing charge point identity"));
    };

    let requested = req
        .headers()
        .get("Sec-WebSocket-Protocol")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if handshake::offers_ocpp16(requested) {
        response
            .headers_mut()
            .insert("Sec-WebSocket-Protocol", HeaderValue::from_static(OCPP_SUBPROTOCOL));
    } else if !requested.is_empty() {
        warn!(identity = %target.identity, requested, "Client does not offer ocpp1.6");
    }

    Ok((target, response))
}

/// Which side of the connection stopped first
enum Ended {
    Writer,
    Reader(Option<String>),
    Shutdown,
}

/// Handle a single WebSocket connection
pub(crate) async fn handle_connection<S>(
    stream: S,
    addr: SocketAddr,
    dispatcher: SharedDispatcher,
    shutdown: Option<ShutdownSignal>,
) -> ServerResult
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    debug!("New connection from: {}", addr);

    let mut target: Option<ConnectTarget> = None;
    let ws_stream = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, response: Response| {
        let (parsed, response) = negotiate(req, response, addr)?;
        target = Some(parsed);
        Ok(response)
    })
    .await?;
    let Some(target) = target else {
        return Ok(());
    };

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();
    let binding = WsBinding::new(addr, tx);
    let connection_id = binding.connection_id();

    if let Err(e) = dispatcher.connect_json(&target.identity, target.account.clone(), binding.clone()) {
        warn!(identity = %target.identity, %addr, error = %e, "Connection refused");
        let _ = ws_sender.send(Message::Close(None)).await;
        return Ok(());
    }
    info!(identity = %target.identity, %addr, connection_id, "[{}] Connected", target.identity);

    // Outgoing frames
    let identity = target.identity.clone();
    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            match frame {
                Outbound::Text(text) => {
                    if let Err(e) = ws_sender.send(Message::Text(text)).await {
                        error!("[{}] Send error: {}", identity, e);
                        break;
                    }
                }
                Outbound::Close => {
                    if let Err(e) = ws_sender.send(Message::Close(None)).await {
                        debug!("[{}] Close not sent: {}", identity, e);
                    }
                    break;
                }
            }
        }
    });

    // Incoming frames; yields the reason when the session must be torn down.
    let identity = target.identity.clone();
    let recv_dispatcher = dispatcher.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = ws_receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    if recv_dispatcher.handle_json_frame(connection_id, &text).is_err() {
                        return Some("malformed frame".to_string());
                    }
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                    debug!("[{}] Ping/Pong", identity);
                }
                Ok(Message::Close(frame)) => {
                    info!("[{}] Close frame received: {:?}", identity, frame);
                    return None;
                }
                Ok(Message::Binary(data)) => {
                    warn!("[{}] Binary message received ({} bytes), ignoring", identity, data.len());
                }
                Ok(Message::Frame(_)) => {}
                Err(e) => {
                    return Some(format!("transport error: {e}"));
                }
            }
        }
        None
    });

    let shutdown_wait = async move {
        match shutdown {
            Some(shutdown) => shutdown.notified().wait().await,
            None => std::future::pending().await,
        }
    };

    let ended = tokio::select! {
        _ = &mut send_task => Ended::Writer,
        result = &mut recv_task => Ended::Reader(result.ok().flatten()),
        _ = shutdown_wait => Ended::Shutdown,
    };

    match &ended {
        Ended::Reader(Some(reason)) => dispatcher.abort(connection_id, reason),
        Ended::Shutdown => {
            info!("[{}] Connection closing due to server shutdown", target.identity);
            dispatcher.disconnect(connection_id);
        }
        _ => dispatcher.disconnect(connection_id),
    }
    binding.close();
    recv_task.abort();
    if !matches!(ended, Ended::Writer) {
        let _ = tokio::time::timeout(WRITER_DRAIN, send_task).await;
    }

    info!("[{}] Disconnected", target.identity);
    Ok(())
}
