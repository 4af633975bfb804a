//! Infrastructure layer - external concerns

pub mod database;
pub mod soap_client;
pub mod webhook_client;

pub use database::{init_database, DatabaseConfig, SeaOrmQueryBridge};
pub use soap_client::ReqwestSoapPush;
pub use webhook_client::{ReqwestWebhook, WebhookAuth};
