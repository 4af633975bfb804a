pub mod errors;
pub mod shutdown;
pub mod time;

pub use errors::{BackendError, SessionError, TransportError};
