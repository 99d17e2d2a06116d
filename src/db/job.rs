//! Job records: insert, lookup, status transitions, and the claim protocol.
//!
//! Every status change goes through [`Db::transition`] (or the claim, which
//! uses the same conditional update). The `WHERE id = ? AND status = ?`
//! predicate is what keeps two workers from ever owning the same job: only
//! the first writer matches a row, everyone else sees zero rows affected.

use std::collections::BTreeMap;

use opentelemetry::KeyValue;
use tracing::debug;

use super::queue::ensure_queue_on;
use super::{Db, format_timestamp, now, parse_timestamp};
use crate::error::{Error, Result};
use crate::model::{Job, JobId, Status};
use crate::telemetry::metrics;

/// Outcome of one conditional claim attempt.
enum ClaimAttempt {
    Claimed,
    /// Another worker flipped the candidate first.
    Race,
}

impl Db {
    /// Insert a new pending job, creating its queue if needed.
    ///
    /// Both writes happen in one transaction.
    pub async fn insert_job(&self, queue_name: &str, payload: Vec<u8>) -> Result<Job> {
        let now = now();
        let job = Job {
            id: JobId::new(),
            queue_name: queue_name.to_string(),
            payload,
            result: None,
            status: Status::Pending,
            created_at: now,
            updated_at: now,
        };

        let mut tx = self.pool().begin().await?;
        ensure_queue_on(&mut tx, queue_name).await?;
        sqlx::query(
            "INSERT INTO jobs (id, queue_name, payload, result, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, NULL, ?4, ?5, ?5)",
        )
        .bind(job.id.to_string())
        .bind(&job.queue_name)
        .bind(&job.payload)
        .bind(job.status.as_str())
        .bind(format_timestamp(now))
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        metrics::jobs_enqueued().add(1, &[KeyValue::new("queue", queue_name.to_string())]);
        debug!(job_id = %job.id, queue = queue_name, "job inserted");
        Ok(job)
    }

    /// Get a job by ID.
    pub async fn get_job(&self, id: JobId) -> Result<Job> {
        let row: Option<JobRow> = sqlx::query_as(
            "SELECT id, queue_name, payload, result, status, created_at, updated_at
             FROM jobs WHERE id = ?1",
        )
        .bind(id.to_string())
        .fetch_optional(self.pool())
        .await?;

        row.ok_or_else(|| Error::NotFound(id.to_string()))?
            .try_into_job()
    }

    /// List jobs in creation order, optionally filtered by queue and status.
    pub async fn list_jobs(
        &self,
        queue_name: Option<&str>,
        status: Option<Status>,
        limit: i64,
    ) -> Result<Vec<Job>> {
        let rows: Vec<JobRow> = sqlx::query_as(
            "SELECT id, queue_name, payload, result, status, created_at, updated_at
             FROM jobs
             WHERE (?1 IS NULL OR queue_name = ?1)
               AND (?2 IS NULL OR status = ?2)
             ORDER BY created_at ASC, id ASC
             LIMIT ?3",
        )
        .bind(queue_name)
        .bind(status.map(Status::as_str))
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        rows.into_iter().map(JobRow::try_into_job).collect()
    }

    /// Number of jobs per status in a queue. Statuses with no jobs are
    /// reported as zero.
    pub async fn count_by_status(&self, queue_name: &str) -> Result<BTreeMap<String, i64>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM jobs WHERE queue_name = ?1 GROUP BY status",
        )
        .bind(queue_name)
        .fetch_all(self.pool())
        .await?;

        let mut counts: BTreeMap<String, i64> = Status::ALL
            .iter()
            .map(|s| (s.to_string(), 0))
            .collect();
        for (status, count) in rows {
            counts.insert(status, count);
        }
        Ok(counts)
    }

    // -----------------------------------------------------------------------
    // Claim protocol
    // -----------------------------------------------------------------------

    /// Claim the oldest pending job in `queue_name`, moving it to running.
    ///
    /// Returns `None` if no pending job exists. Under any number of
    /// concurrent callers each pending job is handed to exactly one of them.
    pub async fn claim_next(&self, queue_name: &str) -> Result<Option<JobId>> {
        loop {
            let candidate: Option<(String,)> = sqlx::query_as(
                "SELECT id FROM jobs
                 WHERE queue_name = ?1 AND status = 'pending'
                 ORDER BY created_at ASC, id ASC
                 LIMIT 1",
            )
            .bind(queue_name)
            .fetch_optional(self.pool())
            .await?;

            let Some((candidate,)) = candidate else {
                record_claim(queue_name, "empty");
                return Ok(None);
            };
            let id: JobId = candidate.parse()?;

            match self.try_claim(id).await? {
                ClaimAttempt::Claimed => {
                    record_claim(queue_name, "claimed");
                    record_transition(Status::Pending, Status::Running);
                    debug!(job_id = %id, queue = queue_name, "job claimed");
                    return Ok(Some(id));
                }
                ClaimAttempt::Race => {
                    // The loser's candidate is no longer pending, so the next
                    // select moves on to a different row.
                    record_claim(queue_name, "race");
                    debug!(job_id = %id, queue = queue_name, "lost claim race, retrying");
                }
            }
        }
    }

    async fn try_claim(&self, id: JobId) -> Result<ClaimAttempt> {
        if self
            .conditional_update(id, Status::Pending, Status::Running, None)
            .await?
        {
            Ok(ClaimAttempt::Claimed)
        } else {
            Ok(ClaimAttempt::Race)
        }
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    /// Transition a job's status with optimistic concurrency.
    ///
    /// `result` must be present exactly when `to` is terminal.
    pub async fn transition(
        &self,
        id: JobId,
        from: Status,
        to: Status,
        result: Option<&[u8]>,
    ) -> Result<Job> {
        validate_transition(from, to)?;
        if to.is_terminal() != result.is_some() {
            return Err(Error::Other(format!(
                "status {to} {} a result",
                if to.is_terminal() { "requires" } else { "must not carry" }
            )));
        }

        if !self.conditional_update(id, from, to, result).await? {
            // Distinguish a missing row from one in the wrong status.
            let current = self.get_job(id).await?;
            return Err(Error::InvalidTransition {
                from: current.status.to_string(),
                to: to.to_string(),
            });
        }

        record_transition(from, to);
        self.get_job(id).await
    }

    /// Complete a job: Running → Completed with the encoded return value.
    pub async fn complete_job(&self, id: JobId, result: &[u8]) -> Result<Job> {
        self.transition(id, Status::Running, Status::Completed, Some(result))
            .await
    }

    /// Fail a job: Running → Failed with encoded failure detail.
    pub async fn fail_job(&self, id: JobId, failure: &[u8]) -> Result<Job> {
        self.transition(id, Status::Running, Status::Failed, Some(failure))
            .await
    }

    /// The single statement that writes `status`. Returns whether a row
    /// matched.
    async fn conditional_update(
        &self,
        id: JobId,
        from: Status,
        to: Status,
        result: Option<&[u8]>,
    ) -> Result<bool> {
        let rows_affected = sqlx::query(
            "UPDATE jobs SET status = ?1, result = ?2, updated_at = ?3
             WHERE id = ?4 AND status = ?5",
        )
        .bind(to.as_str())
        .bind(result)
        .bind(format_timestamp(now()))
        .bind(id.to_string())
        .bind(from.as_str())
        .execute(self.pool())
        .await?
        .rows_affected();

        Ok(rows_affected == 1)
    }
}

/// Validate a state transition, returning an error if disallowed.
fn validate_transition(from: Status, to: Status) -> Result<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(Error::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

fn record_transition(from: Status, to: Status) {
    metrics::job_state_transitions().add(
        1,
        &[
            KeyValue::new("from", from.to_string()),
            KeyValue::new("to", to.to_string()),
        ],
    );
}

fn record_claim(queue_name: &str, result: &'static str) {
    metrics::claims().add(
        1,
        &[
            KeyValue::new("queue", queue_name.to_string()),
            KeyValue::new("result", result),
        ],
    );
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct JobRow {
    id: String,
    queue_name: String,
    payload: Vec<u8>,
    result: Option<Vec<u8>>,
    status: String,
    created_at: String,
    updated_at: String,
}

impl JobRow {
    fn try_into_job(self) -> Result<Job> {
        Ok(Job {
            id: self.id.parse()?,
            queue_name: self.queue_name,
            payload: self.payload,
            result: self.result,
            status: self.status.parse()?,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}
