use thiserror::Error;

/// Registry, session and correlation failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("Charge point {0} is already bound to a live connection")]
    DuplicateIdentity(String),

    #[error("Charge point {0} is not connected")]
    TransportOffline(String),

    #[error("Unique id {0} is already pending")]
    DuplicateUniqueId(String),

    #[error("Identity cannot be empty")]
    EmptyIdentity,

    #[error("Session {0} is retired")]
    Retired(String),

    #[error("Session {0} cannot be removed before it is retired")]
    NotRetired(String),
}

/// Failure of a transport connection to accept a frame
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Connection {0} is closed")]
    Closed(u64),

    #[error("Send failed: {0}")]
    Send(String),
}

/// Failure reported by an external collaborator (database, HTTP push)
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid backend reply: {0}")]
    InvalidReply(String),
}
