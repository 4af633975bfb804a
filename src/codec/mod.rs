//! Message codec for the two OCPP wire formats
//!
//! - [`json`]: OCPP-J positional arrays carried in WebSocket text frames
//! - [`soap`]: OCPP-S SOAP 1.2 envelopes carried in HTTP POST bodies

pub mod json;
pub mod soap;

pub use json::MalformedFrame;
pub use soap::{ServiceNamespace, SoapError, SoapFault, SoapMessage};
