//! OCPP Central System
//!
//! Serves OCPP-J charge points over WebSocket, OCPP-S charge points over
//! HTTP, and the management API. Reads configuration from a TOML file
//! (~/.config/ocpp-central-system/config.toml, or `OCPP_CONFIG`).

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use ocpp_cs::application::{
    ChargingPointRegistry, Dispatcher, SessionSweeper, SweeperConfig,
};
use ocpp_cs::infrastructure::{ReqwestSoapPush, ReqwestWebhook, SeaOrmQueryBridge};
use ocpp_cs::interfaces::ws::OcppServer;
use ocpp_cs::support::shutdown::ShutdownCoordinator;
use ocpp_cs::{create_api_router, default_config_path, init_database, AppConfig, DatabaseConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Load configuration ─────────────────────────────────────
    let config_path = std::env::var("OCPP_CONFIG")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| default_config_path());
    let app_cfg = match AppConfig::load(&config_path) {
        Ok(cfg) => {
            tracing_subscriber::fmt()
                .with_env_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.logging.level)),
                )
                .init();
            info!("Configuration loaded from {}", config_path.display());
            cfg
        }
        Err(e) => {
            tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::new("info"))
                .init();
            error!("Failed to load config: {}. Using defaults.", e);
            AppConfig::default()
        }
    };

    info!("Starting OCPP Central System...");

    // ── Prometheus metrics recorder (before any metrics calls) ──
    let prometheus_handle = match metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            info!("📊 Prometheus metrics recorder installed");
            Some(handle)
        }
        Err(e) => {
            warn!("Prometheus recorder not installed: {}", e);
            None
        }
    };

    // ── Protocol engine ────────────────────────────────────────
    let registry = Arc::new(ChargingPointRegistry::new(app_cfg.session_settings()));
    let mut dispatcher = Dispatcher::new(registry, app_cfg.ocpp_settings());

    let db = if app_cfg.database.enabled {
        let db_config = DatabaseConfig {
            url: std::env::var("DATABASE_URL").unwrap_or_else(|_| app_cfg.database.url.clone()),
        };
        let db = match init_database(&db_config).await {
            Ok(db) => db,
            Err(e) => {
                error!("Failed to connect to database: {}", e);
                return Err(e.into());
            }
        };
        dispatcher = dispatcher.with_query_bridge(Arc::new(SeaOrmQueryBridge::new(db.clone())));
        info!("🗄️ Charge point requests are processed by the backend");
        Some(db)
    } else {
        match app_cfg.webhook_settings(std::env::var("WEBHOOK_URL").ok()) {
            Some(hook) => match ReqwestWebhook::new(hook.url.clone(), hook.auth, hook.timeout) {
                Ok(client) => {
                    dispatcher = dispatcher.with_webhook(Arc::new(client));
                    info!("🪝 Charge point requests are forwarded to {}", hook.url);
                }
                Err(e) => {
                    error!("Failed to create webhook client: {}", e);
                    return Err(e.into());
                }
            },
            None => info!("Backend disabled, charge point requests are answered locally"),
        }
        None
    };

    match ReqwestSoapPush::new(Duration::from_secs(app_cfg.soap.push_timeout_secs)) {
        Ok(push) => dispatcher = dispatcher.with_soap_push(Arc::new(push)),
        Err(e) => warn!("SOAP push client unavailable, OCPP-S commands disabled: {}", e),
    }
    let dispatcher = Arc::new(dispatcher);

    // ── Shutdown coordination ──────────────────────────────────
    let shutdown = ShutdownCoordinator::new(app_cfg.server.shutdown_timeout);
    let shutdown_signal = shutdown.signal();
    shutdown.start_signal_listener();

    // ── Session sweeper ────────────────────────────────────────
    let sweeper = SessionSweeper::new(dispatcher.clone()).with_config(SweeperConfig {
        sweep_interval_secs: app_cfg.session.sweep_interval_secs,
    });
    sweeper.start(shutdown_signal.clone());

    // ── OCPP-J WebSocket server ────────────────────────────────
    let server = OcppServer::new(app_cfg.server.ws_address(), dispatcher.clone())
        .with_shutdown(shutdown_signal.clone());
    let ws_signal = shutdown_signal.clone();
    let ws_task = tokio::spawn(async move {
        match server.run().await {
            Ok(()) => info!("WebSocket server stopped"),
            Err(e) => {
                error!("WebSocket server error: {}", e);
                ws_signal.trigger();
            }
        }
    });

    // ── Management API + OCPP-S endpoint ───────────────────────
    let api_router = create_api_router(dispatcher.clone(), prometheus_handle);
    let api_addr = app_cfg.server.api_address();
    let listener = tokio::net::TcpListener::bind(&api_addr).await?;
    info!("REST API server listening on http://{}", api_addr);
    info!("   SOAP charge points should post to: http://{}/Ocpp", api_addr);

    let api_shutdown = shutdown_signal.clone();
    let api_signal = shutdown_signal.clone();
    let api_task = tokio::spawn(async move {
        let served = axum::serve(
            listener,
            api_router.into_make_service_with_connect_info::<std::net::SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            api_shutdown.wait().await;
            info!("🛑 REST API server received shutdown signal");
        })
        .await;
        match served {
            Ok(()) => info!("REST API server stopped"),
            Err(e) => {
                error!("REST API server error: {}", e);
                api_signal.trigger();
            }
        }
    });

    info!("🚀 All servers started. Press Ctrl+C to shutdown gracefully.");

    let completed = shutdown
        .shutdown_with_cleanup(|| async {
            if let Err(e) = ws_task.await {
                error!("WebSocket server task panicked: {}", e);
            }
            if let Err(e) = api_task.await {
                error!("REST API server task panicked: {}", e);
            }
        })
        .await;
    if !completed {
        warn!("Servers did not stop in time");
    }

    // ── Final cleanup ──────────────────────────────────────────
    info!("🧹 Performing final cleanup...");
    let drained = dispatcher.shutdown("server shutting down");
    if drained > 0 {
        info!(drained, "Pending calls failed on shutdown");
    }

    if let Some(db) = db {
        if let Err(e) = db.close().await {
            warn!("Error closing database connection: {}", e);
        } else {
            info!("✅ Database connection closed");
        }
    }

    info!("👋 OCPP Central System shutdown complete");
    Ok(())
}
