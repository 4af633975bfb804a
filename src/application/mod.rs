pub mod backend;
pub mod dispatcher;
pub mod handlers;
pub mod ports;
pub mod services;
pub mod session;
pub mod soap_binding;
pub mod webhook;

#[cfg(test)]
pub(crate) mod testing;

// Re-export key types for convenience
pub use dispatcher::{DispatchError, Dispatcher, SharedDispatcher};
pub use handlers::OcppSettings;
pub use ports::{
    CallWebhook, ConnectionId, QueryBridge, SharedBinding, SharedQueryBridge, SharedSoapPush,
    SharedWebhook, SoapPush, TransportBinding, WebhookReply,
};
pub use services::{SessionSweeper, SweeperConfig};
pub use session::{
    ChargingPointRegistry, ChargingPointSession, SessionSettings, SharedRegistry,
};
