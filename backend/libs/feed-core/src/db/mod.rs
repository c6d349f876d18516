//! Store access layer.
//!
//! One repository per table family, all on sqlx/Postgres. Bulk writes go
//! through `QueryBuilder` with ON CONFLICT handling; the ingester's flush
//! path takes an explicit transaction so a whole batch commits atomically.

pub mod batch_repo;
pub mod fatigue_repo;
pub mod feedback_repo;
pub mod graph_repo;
pub mod keyword_repo;
pub mod meta_repo;
pub mod post_repo;
pub mod serving_repo;
pub mod taste_repo;

use sqlx::migrate::Migrator;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Embedded forward-only migrations, run on startup by both services.
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Chunk size for bulk inserts.
pub const INSERT_CHUNK: usize = 500;

const CONTENTION_RETRIES: u32 = 3;
const CONTENTION_BACKOFF: Duration = Duration::from_secs(1);

/// True for errors worth retrying: lock/serialization contention or pool
/// exhaustion.
pub fn is_contention(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(db) => matches!(
            db.code().as_deref(),
            Some("40001") | Some("40P01") | Some("55P03")
        ),
        _ => false,
    }
}

/// Retry `op` up to 3 times with a 1 s backoff when the store reports
/// contention. Used by the ingester flush and the semantic batch insert.
pub async fn with_contention_retry<T, F, Fut>(op_name: &str, mut op: F) -> Result<T, sqlx::Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, sqlx::Error>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if attempt < CONTENTION_RETRIES && is_contention(&e) => {
                attempt += 1;
                warn!(op = op_name, attempt, error = %e, "Store contention, retrying");
                tokio::time::sleep(CONTENTION_BACKOFF).await;
            }
            Err(e) => return Err(e),
        }
    }
}
