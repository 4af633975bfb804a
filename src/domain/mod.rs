//! Protocol domain: canonical messages, faults, catalog and device records

pub mod catalog;
pub mod fault;
pub mod message;
pub mod protocol;
pub mod records;

pub use catalog::{
    CatalogError, Direction, EndpointSpec, FieldKind, FieldSpec, OperationCatalog, OperationSpec,
    UnknownKeys,
};
pub use fault::{ErrorCode, ProtocolFault};
pub use message::{CanonicalMessage, MessageKind};
pub use protocol::TransportProtocol;
pub use records::{ChargePointErrorCode, ChargePointStatus, PendingTransactionState};
