//! Charging point sessions: per-device state, call correlation and the
//! registry that owns them

pub mod charging_point;
pub mod correlation;
pub mod registry;

pub use charging_point::{
    ChargingPointSession, SessionId, SessionSettings, SessionSnapshot, SessionState,
};
pub use correlation::{CallFailure, CallOutcome, Continuation, CorrelationManager};
pub use registry::{ChargingPointRegistry, RegistryStats, SharedRegistry, SweepReport};
