//! Session Sweeper Service
//!
//! Expires outbound calls past their deadline, retires sessions that stayed
//! offline past the reconnect grace, and publishes session gauges.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::application::dispatcher::SharedDispatcher;
use crate::application::session::SweepReport;
use crate::support::shutdown::ShutdownSignal;

/// Configuration for the sweeper
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// How often to sweep (in seconds)
    pub sweep_interval_secs: u64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 5,
        }
    }
}

/// Background task driving [`Dispatcher::sweep`](crate::application::Dispatcher::sweep)
pub struct SessionSweeper {
    dispatcher: SharedDispatcher,
    config: SweeperConfig,
    running: Arc<RwLock<bool>>,
}

impl SessionSweeper {
    pub fn new(dispatcher: SharedDispatcher) -> Self {
        Self {
            dispatcher,
            config: SweeperConfig::default(),
            running: Arc::new(RwLock::new(false)),
        }
    }

    pub fn with_config(mut self, config: SweeperConfig) -> Self {
        self.config = config;
        self
    }

    /// Start the sweeper background task
    pub fn start(&self, shutdown: ShutdownSignal) {
        let dispatcher = self.dispatcher.clone();
        let config = self.config.clone();
        let running = self.running.clone();

        tokio::spawn(async move {
            *running.write().await = true;
            info!("🧹 Session sweeper started (interval: {}s)", config.sweep_interval_secs);

            let mut interval =
                tokio::time::interval(Duration::from_secs(config.sweep_interval_secs.max(1)));
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let report = dispatcher.sweep();
                        log_report(report);
                        publish_gauges(&dispatcher);
                    }
                    _ = shutdown.notified().wait() => {
                        info!("🧹 Session sweeper shutting down");
                        break;
                    }
                }
            }

            *running.write().await = false;
            info!("🧹 Session sweeper stopped");
        });
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }
}

fn log_report(report: SweepReport) {
    if report != SweepReport::default() {
        info!(
            expired_calls = report.expired_calls,
            retired = report.retired,
            "Sweep finished"
        );
    } else {
        debug!("Sweep finished, nothing to do");
    }
}

fn publish_gauges(dispatcher: &SharedDispatcher) {
    let stats = dispatcher.registry().stats();
    metrics::gauge!("ocpp_sessions", "state" => "unbound").set(stats.unbound as f64);
    metrics::gauge!("ocpp_sessions", "state" => "online").set(stats.online as f64);
    metrics::gauge!("ocpp_sessions", "state" => "offline").set(stats.offline as f64);
}
