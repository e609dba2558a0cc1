//! Postgres-backed entity store.

mod articles;
mod relations;
mod types;
mod util;

pub use util::map_sqlx_error;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use sqlx::{
    Postgres, Transaction,
    postgres::{PgPool, PgPoolOptions},
    query,
};

use crate::application::repos::RepoError;

#[derive(Clone)]
pub struct PostgresRepositories {
    pool: Arc<PgPool>,
    query_timeout: Duration,
}

impl PostgresRepositories {
    pub fn new(pool: PgPool, query_timeout: Duration) -> Self {
        Self {
            pool: Arc::new(pool),
            query_timeout,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn begin(&self) -> Result<Transaction<'_, Postgres>, RepoError> {
        self.pool.begin().await.map_err(map_sqlx_error)
    }

    pub async fn connect(
        url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<PgPool, sqlx::Error> {
        PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(url)
            .await
    }

    pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations")
            .run(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn health_check(&self) -> Result<(), RepoError> {
        self.bounded(async {
            query("SELECT 1")
                .execute(self.pool())
                .await
                .map(|_| ())
                .map_err(map_sqlx_error)
        })
        .await
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Run one store call under the configured per-query deadline.
    async fn bounded<T, F>(&self, call: F) -> Result<T, RepoError>
    where
        F: Future<Output = Result<T, RepoError>>,
    {
        match tokio::time::timeout(self.query_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(RepoError::Timeout),
        }
    }

    /// Server-side statement limit for writes, kept under the client deadline.
    fn statement_timeout_ms(&self) -> u64 {
        let millis = u64::try_from(self.query_timeout.as_millis()).unwrap_or(u64::MAX);
        (millis.saturating_mul(9) / 10).max(1)
    }

    fn convert_count(value: i64) -> Result<u64, RepoError> {
        value
            .try_into()
            .map_err(|_| RepoError::from_persistence("count exceeds supported range"))
    }
}

/// Identifier sets bind as `BIGINT[]` for `= ANY($1)` lookups.
fn id_array(ids: &crate::application::repos::IdSet) -> Vec<i64> {
    ids.iter().copied().collect()
}
