//! Request handlers of the HTTP surface

pub mod central_system;
pub mod charge_points;
pub mod metrics;
pub mod soap;
pub mod system;

use crate::application::SharedDispatcher;

/// State shared by the management API and the SOAP endpoint
#[derive(Clone)]
pub struct ApiState {
    pub dispatcher: SharedDispatcher,
}
