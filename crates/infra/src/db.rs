//! Postgres connection pool, per-call timeouts and error mapping.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|-----------------------|------------|----------|
//! | Database (unique violation) | `23505` | `Duplicate` | Name, username, email or (villa, amenity) link already exists |
//! | Database (foreign key violation) | `23503` | `ReferenceNotFound` | Unknown category, location, amenity, amenity type or role |
//! | Database (foreign key violation on delete) | `23503` | `InUse` | Deleting a row other rows still point at |
//! | Database (exclusion violation) | `23P01` | `Overlap` | Concurrent booking slipped past the advisory lock |
//! | Database (serialization failure / deadlock) | `40001` / `40P01` | `Contention` | Transaction aborted by a concurrent one |
//! | Database (other) | Any other | `Database` | Check constraints, type errors |
//! | PoolClosed / PoolTimedOut / Io / other | N/A | `Database` | Connection failures |
//! | `tokio::time::timeout` elapsed | N/A | `Timeout` | Call exceeded the per-operation deadline |

use std::future::Future;
use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::warn;

use crate::config::DatabaseConfig;
use crate::store::StoreError;

/// Build the connection pool.
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, StoreError> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.query_timeout)
        .connect(&config.url)
        .await
        .map_err(|e| map_sqlx_error("connect", e))
}

/// Run `fut` with a deadline.
///
/// `read_only` is carried into [`StoreError::Timeout`] so callers can tell
/// whether retrying is safe.
pub async fn with_timeout<T, F>(
    operation: &'static str,
    read_only: bool,
    limit: Duration,
    fut: F,
) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!(operation, read_only, limit_ms = limit.as_millis() as u64, "store call timed out");
            Err(StoreError::Timeout { operation, read_only })
        }
    }
}

pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let constraint = db_err.constraint().unwrap_or("unknown").to_string();

            match db_err.code().as_deref() {
                Some("23505") => StoreError::Duplicate { constraint },
                Some("23503") => StoreError::ReferenceNotFound { constraint },
                Some("23P01") => StoreError::Overlap { conflicting: None },
                Some("40001") | Some("40P01") => StoreError::Contention,
                _ => StoreError::Database(format!(
                    "database error in {}: {}",
                    operation,
                    db_err.message()
                )),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Database(format!("connection pool closed in {}", operation))
        }
        sqlx::Error::PoolTimedOut => {
            StoreError::Database(format!("connection pool timed out in {}", operation))
        }
        _ => StoreError::Database(format!("sqlx error in {}: {}", operation, err)),
    }
}

/// Like [`map_sqlx_error`], but a foreign key violation means the row being
/// deleted is still referenced.
pub(crate) fn map_delete_error(operation: &str, err: sqlx::Error) -> StoreError {
    match map_sqlx_error(operation, err) {
        StoreError::ReferenceNotFound { constraint } => StoreError::InUse { constraint },
        other => other,
    }
}
