//! Single-writer guard around the drop/recreate/bulk-load cycle.
//!
//! Two overlapping runs against the same table would interleave DROP, CREATE
//! and COPY and leave duplicated or missing rows. Each run therefore takes a
//! session-level PostgreSQL advisory lock keyed on the table name before it
//! touches the table, and gives up immediately if another session holds it.

use sha2::{Digest, Sha256};
use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};

use crate::errors::{PipelineError, ResultExt};

/// Advisory lock key for a table: the first eight bytes of its name's SHA-256.
pub fn lock_key(table: &str) -> i64 {
    let digest = Sha256::digest(table.to_ascii_lowercase().as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(bytes)
}

/// A held advisory lock. The lock lives as long as its connection's session.
pub struct RefreshLock {
    conn: Option<PoolConnection<Postgres>>,
    key: i64,
    table: String,
}

impl RefreshLock {
    /// Takes the refresh lock for `table` without waiting.
    pub async fn acquire(pool: &PgPool, table: &str) -> Result<Self, PipelineError> {
        let mut conn = pool
            .acquire()
            .await
            .context("Failed to get a connection for the refresh lock")?;
        let key = lock_key(table);

        let locked: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
            .bind(key)
            .fetch_one(&mut *conn)
            .await?;

        if !locked {
            tracing::warn!("Refresh lock {} for {} is held by another run", key, table);
            return Err(PipelineError::RefreshInProgress(table.to_string()));
        }

        tracing::debug!("Acquired refresh lock {} for {}", key, table);
        Ok(Self {
            conn: Some(conn),
            key,
            table: table.to_string(),
        })
    }

    /// Releases the lock and returns the connection to the pool.
    ///
    /// If the unlock statement fails the session is closed instead, which
    /// drops the lock server-side.
    pub async fn release(mut self) -> Result<(), PipelineError> {
        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };

        let unlocked = sqlx::query_scalar::<_, bool>("SELECT pg_advisory_unlock($1)")
            .bind(self.key)
            .fetch_one(&mut *conn)
            .await;

        match unlocked {
            Ok(true) => {
                tracing::debug!("Released refresh lock for {}", self.table);
                Ok(())
            }
            Ok(false) => {
                tracing::warn!("Refresh lock for {} was not held at release", self.table);
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Unlock failed for {}, closing session: {}", self.table, e);
                conn.close().await?;
                Ok(())
            }
        }
    }
}

impl Drop for RefreshLock {
    fn drop(&mut self) {
        // Not released explicitly: detach so the session ends with the socket
        // instead of going back to the pool still holding the lock.
        if let Some(conn) = self.conn.take() {
            tracing::warn!("Refresh lock for {} dropped without release", self.table);
            drop(conn.detach());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_key_is_stable_and_case_insensitive() {
        assert_eq!(lock_key("public.wb_loans"), lock_key("public.wb_loans"));
        assert_eq!(lock_key("public.WB_Loans"), lock_key("public.wb_loans"));
        assert_ne!(lock_key("public.wb_loans"), lock_key("staging.wb_loans"));
    }
}
