//! Query bridge over a sea-orm connection
//!
//! Statements run on the tokio runtime; the completion callback receives
//! every row with each column rendered as text.

use std::time::Instant;

use sea_orm::{ConnectionTrait, DatabaseConnection, QueryResult, Statement};
use tracing::{debug, warn};

use crate::application::ports::{QueryBridge, QueryCallback, QueryRows};
use crate::support::BackendError;

#[derive(Clone)]
pub struct SeaOrmQueryBridge {
    db: DatabaseConnection,
}

impl SeaOrmQueryBridge {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    async fn run(db: &DatabaseConnection, sql: String) -> Result<QueryRows, BackendError> {
        let statement = Statement::from_string(db.get_database_backend(), sql);
        let rows = db.query_all(statement).await?;
        Ok(rows.iter().map(row_text).collect())
    }
}

/// Leading text columns of a row. Stops at the first column that is not
/// readable as text.
fn row_text(row: &QueryResult) -> Vec<Option<String>> {
    let mut columns = Vec::new();
    for index in 0.. {
        match row.try_get_by_index::<Option<String>>(index) {
            Ok(value) => columns.push(value),
            Err(_) => break,
        }
    }
    columns
}

impl QueryBridge for SeaOrmQueryBridge {
    fn submit(&self, sql: String, on_complete: QueryCallback) {
        let db = self.db.clone();
        tokio::spawn(async move {
            let started = Instant::now();
            debug!(sql = %sql, "Submitting statement");
            let result = Self::run(&db, sql).await;
            metrics::histogram!("ocpp_backend_latency_seconds")
                .record(started.elapsed().as_secs_f64());
            if let Err(e) = &result {
                warn!(error = %e, "Statement failed");
            }
            on_complete(result);
        });
    }
}
