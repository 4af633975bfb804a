//! WebSocket interfaces
//!
//! - `ocpp_server`: OCPP-J accept loop and per-connection reader/writer
//! - `handshake`: Path parsing, subprotocol and accept token
//! - `binding`: Transport binding handed to the session

pub mod binding;
pub mod handshake;
pub mod ocpp_server;

pub use binding::WsBinding;
pub use ocpp_server::OcppServer;
