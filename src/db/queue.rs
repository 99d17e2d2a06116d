//! Queue records.
//!
//! Queues are created lazily the first time a job is enqueued to a name.
//! Polling a name nobody has enqueued to finds nothing and creates nothing.
//! Creation is idempotent and tolerates several processes racing to create
//! the same name.

use sqlx::SqliteConnection;

use super::{Db, format_timestamp, now, parse_timestamp};
use crate::error::Result;
use crate::model::Queue;
use crate::telemetry::metrics;
use opentelemetry::KeyValue;

impl Db {
    /// Create the queue if it does not exist yet.
    pub async fn ensure_queue(&self, name: &str) -> Result<()> {
        let mut conn = self.pool().acquire().await?;
        ensure_queue_on(&mut conn, name).await
    }

    /// Get a queue by name.
    pub async fn get_queue(&self, name: &str) -> Result<Option<Queue>> {
        let row: Option<QueueRow> = sqlx::query_as(
            "SELECT name, created_at, updated_at FROM queues WHERE name = ?1",
        )
        .bind(name)
        .fetch_optional(self.pool())
        .await?;

        row.map(QueueRow::try_into_queue).transpose()
    }

    /// All queues, by name.
    pub async fn list_queues(&self) -> Result<Vec<Queue>> {
        let rows: Vec<QueueRow> =
            sqlx::query_as("SELECT name, created_at, updated_at FROM queues ORDER BY name ASC")
                .fetch_all(self.pool())
                .await?;

        rows.into_iter().map(QueueRow::try_into_queue).collect()
    }
}

/// Insert-or-ignore, usable on a pooled connection or inside a transaction.
pub(crate) async fn ensure_queue_on(conn: &mut SqliteConnection, name: &str) -> Result<()> {
    let now = format_timestamp(now());
    let inserted = sqlx::query(
        "INSERT INTO queues (name, created_at, updated_at) VALUES (?1, ?2, ?2)
         ON CONFLICT (name) DO NOTHING",
    )
    .bind(name)
    .bind(&now)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    if inserted > 0 {
        tracing::debug!(queue = name, "queue created");
        metrics::queue_operations().add(
            1,
            &[
                KeyValue::new("queue", name.to_string()),
                KeyValue::new("operation", "create"),
            ],
        );
    }
    Ok(())
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct QueueRow {
    name: String,
    created_at: String,
    updated_at: String,
}

impl QueueRow {
    fn try_into_queue(self) -> Result<Queue> {
        Ok(Queue {
            name: self.name,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}
