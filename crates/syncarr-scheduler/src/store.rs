// SPDX-License-Identifier: GPL-3.0-or-later
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqliteConnection, SqlitePool};
use syncarr_config::PriorityOrdering;
use syncarr_infrastructure::millis::{from_millis, opt_from_millis, opt_to_millis, to_millis};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backoff::RetrySchedule;
use crate::task::{NewTask, TaskId, TaskRecord, TaskState};

/// How a queue picks its next task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimPolicy {
    pub ordering: PriorityOrdering,
    /// A lock older than this is considered abandoned
    pub lock_timeout: Duration,
}

/// Result of claiming from a queue.
#[derive(Debug, Clone, PartialEq)]
pub enum Claim {
    /// The task is locked by the caller and ready to run
    Ready(TaskRecord),
    /// The task passed its deadline and was marked EXPIRED instead of running
    Expired(TaskRecord),
}

/// Enqueue refusals callers may want to tell apart from store failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnqueueError {
    /// The owning source was deleted; nothing may be scheduled for it any more
    #[error("owner {0} no longer exists")]
    OwnerGone(String),
}

/// What happened when a worker tried to record an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Applied,
    /// Another worker owns the record now
    LockLost,
    /// The record was revoked or deleted while running
    Gone,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Due and waiting to be claimed
    pub pending: u64,
    /// Waiting for a future `run_at`
    pub scheduled: u64,
    pub running: u64,
    pub retrying: u64,
    pub revoked: u64,
    pub complete: u64,
    pub failed: u64,
    pub expired: u64,
    /// Finished records still holding a result payload
    pub result_keys: u64,
}

impl QueueStats {
    pub fn total(&self) -> u64 {
        self.pending
            + self.scheduled
            + self.running
            + self.retrying
            + self.revoked
            + self.complete
            + self.failed
            + self.expired
    }
}

/// Durable task records.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a PENDING record. Fails with [`EnqueueError::OwnerGone`] when `task.owner` names a
    /// source that no longer exists.
    async fn enqueue(&self, task: NewTask) -> Result<TaskId>;
    /// Permanently fail RUNNING records of `queue` whose lock expired after their last attempt.
    async fn fail_abandoned(
        &self,
        queue: &str,
        now: DateTime<Utc>,
        policy: &ClaimPolicy,
    ) -> Result<Vec<TaskRecord>>;
    /// Atomically lock the next eligible task of `queue` for `worker_id`.
    async fn claim_next(
        &self,
        queue: &str,
        worker_id: &str,
        now: DateTime<Utc>,
        policy: &ClaimPolicy,
    ) -> Result<Option<Claim>>;
    async fn complete(
        &self,
        id: TaskId,
        worker_id: &str,
        result: &Value,
        now: DateTime<Utc>,
    ) -> Result<Settlement>;
    /// Record a failure. With a schedule the task is retried, otherwise it fails permanently.
    async fn fail(
        &self,
        id: TaskId,
        worker_id: &str,
        error: &str,
        retry: Option<RetrySchedule>,
        now: DateTime<Utc>,
    ) -> Result<Settlement>;
    /// Keep every pending task of a class from being claimed until `until`.
    async fn revoke(&self, queue: &str, task_name: &str, until: DateTime<Utc>) -> Result<()>;
    async fn restore(&self, queue: &str, task_name: &str) -> Result<()>;
    async fn clear_revocations(&self, queue: &str) -> Result<u64>;
    /// Delete every record of the queue, and its revocations.
    async fn flush(&self, queue: &str) -> Result<u64>;
    async fn flush_scheduled(&self, queue: &str, now: DateTime<Utc>) -> Result<u64>;
    async fn flush_results(&self, queue: &str) -> Result<u64>;
    async fn revoke_pending(&self, queue: &str, now: DateTime<Utc>) -> Result<u64>;
    async fn purge_finished(&self, before: DateTime<Utc>) -> Result<u64>;
    async fn find_pending(&self, task_hash: &str) -> Result<Option<TaskRecord>>;
    async fn get(&self, id: TaskId) -> Result<Option<TaskRecord>>;
    async fn stats(&self, queue: &str, now: DateTime<Utc>) -> Result<QueueStats>;
    async fn list_failed(&self, queue: &str, limit: i64) -> Result<Vec<TaskRecord>>;
    /// Give back any connection held for `queue` so the pool can close it.
    async fn release_idle(&self, queue: &str);
}

const CLAIMABLE: &str = "('PENDING', 'FAILED_RETRYABLE')";
const FINISHED: &str = "('COMPLETE', 'FAILED_PERMANENT', 'REVOKED', 'EXPIRED')";
const UNFINISHED: &str = "('PENDING', 'FAILED_RETRYABLE', 'RUNNING')";

/// SQLite-backed task store.
///
/// Claims for a queue reuse one pooled connection until the queue goes idle.
pub struct SqliteTaskStore {
    pool: SqlitePool,
    sticky: Mutex<HashMap<String, PoolConnection<Sqlite>>>,
}

impl SqliteTaskStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            sticky: Mutex::new(HashMap::new()),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn sticky_lock(&self) -> MutexGuard<'_, HashMap<String, PoolConnection<Sqlite>>> {
        self.sticky.lock().unwrap_or_else(|poisoned| {
            warn!(target: "store", "sticky connection map poisoned, recovering");
            poisoned.into_inner()
        })
    }

    async fn checkout(&self, queue: &str) -> Result<PoolConnection<Sqlite>> {
        let cached = self.sticky_lock().remove(queue);
        match cached {
            Some(conn) => Ok(conn),
            None => Ok(self.pool.acquire().await?),
        }
    }

    fn checkin(&self, queue: &str, conn: PoolConnection<Sqlite>) {
        // A concurrent claimer may have parked its own connection meanwhile; the loser is dropped
        self.sticky_lock().insert(queue.to_string(), conn);
    }

    /// Revoke every unfinished task owned by `owner` inside the caller's transaction.
    ///
    /// Running tasks keep running, but their outcome is discarded when they settle.
    pub async fn revoke_owner_in(
        conn: &mut SqliteConnection,
        owner: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<TaskRecord>> {
        let q = format!(
            "UPDATE tasks SET state = 'REVOKED', finished_at = ? WHERE owner = ? AND state IN {} RETURNING *",
            UNFINISHED
        );
        let rows = sqlx::query(&q)
            .bind(to_millis(now))
            .bind(owner)
            .fetch_all(&mut *conn)
            .await?;
        let revoked = rows.iter().map(row_to_task).collect::<Result<Vec<_>>>()?;
        debug!(target: "store", owner, revoked = revoked.len(), "revoked owned tasks");
        Ok(revoked)
    }

    async fn fail_abandoned_on(
        conn: &mut SqliteConnection,
        queue: &str,
        now: DateTime<Utc>,
        policy: &ClaimPolicy,
    ) -> Result<Vec<TaskRecord>> {
        let rows = sqlx::query(
            r#"
            UPDATE tasks SET
                state = 'FAILED_PERMANENT',
                locked_by = NULL,
                locked_at = NULL,
                finished_at = ?,
                last_error = COALESCE(last_error, 'abandoned after the final attempt')
            WHERE queue = ? AND state = 'RUNNING' AND locked_at <= ? AND attempts >= max_attempts
            RETURNING *
            "#,
        )
        .bind(to_millis(now))
        .bind(queue)
        .bind(lock_cutoff(now, policy))
        .fetch_all(&mut *conn)
        .await?;
        let abandoned = rows.iter().map(row_to_task).collect::<Result<Vec<_>>>()?;
        if !abandoned.is_empty() {
            warn!(target: "store", queue, count = abandoned.len(), "abandoned tasks failed permanently");
        }
        Ok(abandoned)
    }

    async fn claim_on(
        conn: &mut SqliteConnection,
        queue: &str,
        worker_id: &str,
        now: DateTime<Utc>,
        policy: &ClaimPolicy,
    ) -> Result<Option<Claim>> {
        let now_ms = to_millis(now);
        let lock_cutoff = lock_cutoff(now, policy);

        let direction = match policy.ordering {
            PriorityOrdering::Ascending => "ASC",
            PriorityOrdering::Descending => "DESC",
        };
        let eligible = format!(
            "(state IN {claimable} OR (state = 'RUNNING' AND locked_at <= ?)) AND attempts < max_attempts",
            claimable = CLAIMABLE
        );
        let q = format!(
            r#"
            UPDATE tasks SET
                state = 'RUNNING',
                locked_by = ?,
                locked_at = ?,
                attempts = attempts + 1
            WHERE id = (
                SELECT t.id FROM tasks t
                WHERE t.queue = ?
                  AND t.run_at <= ?
                  AND {eligible}
                  AND NOT EXISTS (
                      SELECT 1 FROM task_revocations r
                      WHERE r.queue = t.queue AND r.task_name = t.task_name AND r.revoked_until > ?
                  )
                ORDER BY t.priority {direction}, t.run_at ASC, t.rowid ASC
                LIMIT 1
            )
            AND {eligible}
            RETURNING *
            "#,
            eligible = eligible,
            direction = direction,
        );
        let row = sqlx::query(&q)
            .bind(worker_id)
            .bind(now_ms)
            .bind(queue)
            .bind(now_ms)
            .bind(lock_cutoff)
            .bind(now_ms)
            .bind(lock_cutoff)
            .fetch_optional(&mut *conn)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut task = row_to_task(&row)?;

        if task.expires_at.is_some_and(|deadline| deadline <= now) {
            sqlx::query(
                r#"
                UPDATE tasks SET
                    state = 'EXPIRED',
                    attempts = attempts - 1,
                    locked_by = NULL,
                    locked_at = NULL,
                    finished_at = ?
                WHERE id = ? AND locked_by = ?
                "#,
            )
            .bind(now_ms)
            .bind(task.id.to_string())
            .bind(worker_id)
            .execute(&mut *conn)
            .await?;
            task.state = TaskState::Expired;
            task.attempts = task.attempts.saturating_sub(1);
            task.locked_by = None;
            task.locked_at = None;
            task.finished_at = Some(now);
            debug!(target: "store", task_id = %task.id, queue, "task expired before running");
            return Ok(Some(Claim::Expired(task)));
        }

        Ok(Some(Claim::Ready(task)))
    }

    /// Work out why a settling update matched nothing.
    async fn settlement_for_miss(&self, id: TaskId) -> Result<Settlement> {
        let state: Option<String> = sqlx::query_scalar("SELECT state FROM tasks WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(match state.as_deref() {
            None | Some("REVOKED") => Settlement::Gone,
            Some(_) => Settlement::LockLost,
        })
    }

    async fn count(&self, sql: &str, queue: &str, extra: Option<i64>) -> Result<u64> {
        let mut query = sqlx::query_scalar::<_, i64>(sql).bind(queue);
        if let Some(extra) = extra {
            query = query.bind(extra);
        }
        let n = query.fetch_one(&self.pool).await?;
        Ok(u64::try_from(n).unwrap_or(0))
    }

    async fn count_state(&self, queue: &str, state: TaskState) -> Result<u64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tasks WHERE queue = ? AND state = ?")
            .bind(queue)
            .bind(state.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(n).unwrap_or(0))
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn enqueue(&self, task: NewTask) -> Result<TaskId> {
        let id = TaskId::new();
        let hash = task.task_hash();
        let mut tx = self.pool.begin().await?;

        if task.replace_existing {
            let q = format!(
                "DELETE FROM tasks WHERE task_hash = ? AND locked_by IS NULL AND state IN {}",
                CLAIMABLE
            );
            let replaced = sqlx::query(&q).bind(&hash).execute(&mut *tx).await?;
            if replaced.rows_affected() > 0 {
                debug!(target: "store", task_name = %task.task_name, replaced = replaced.rows_affected(), "replaced existing tasks");
            }
        }

        let now = Utc::now();
        // The owner check and the insert are one statement, so a concurrent source deletion
        // either sees this record and revokes it or makes the insert a no-op
        let inserted = sqlx::query(
            r#"
            INSERT INTO tasks (
                id, queue, task_name, args, kwargs, task_hash, verbose_name, owner, priority,
                run_at, expires_at, attempts, max_attempts, retry_delay_secs, state, created_at
            )
            SELECT ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, 0, 'PENDING', ?
            WHERE ? IS NULL OR EXISTS (SELECT 1 FROM sources WHERE id = ?)
            "#,
        )
        .bind(id.to_string())
        .bind(&task.queue)
        .bind(&task.task_name)
        .bind(serde_json::to_string(&task.args)?)
        .bind(serde_json::to_string(&task.kwargs)?)
        .bind(&hash)
        .bind(&task.verbose_name)
        .bind(&task.owner)
        .bind(task.priority)
        .bind(to_millis(task.run_at))
        .bind(opt_to_millis(task.expires_at))
        .bind(i64::from(task.max_attempts))
        .bind(to_millis(now))
        .bind(&task.owner)
        .bind(&task.owner)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            let owner = task.owner.unwrap_or_default();
            debug!(target: "store", task_name = %task.task_name, %owner, "owner is gone, task not enqueued");
            return Err(EnqueueError::OwnerGone(owner).into());
        }
        tx.commit().await?;
        debug!(target: "store", task_id = %id, queue = %task.queue, task_name = %task.task_name, "task enqueued");
        Ok(id)
    }

    async fn fail_abandoned(
        &self,
        queue: &str,
        now: DateTime<Utc>,
        policy: &ClaimPolicy,
    ) -> Result<Vec<TaskRecord>> {
        let mut conn = self.checkout(queue).await?;
        let abandoned = Self::fail_abandoned_on(&mut conn, queue, now, policy).await?;
        self.checkin(queue, conn);
        Ok(abandoned)
    }

    async fn claim_next(
        &self,
        queue: &str,
        worker_id: &str,
        now: DateTime<Utc>,
        policy: &ClaimPolicy,
    ) -> Result<Option<Claim>> {
        let mut conn = self.checkout(queue).await?;
        let claimed = Self::claim_on(&mut conn, queue, worker_id, now, policy).await?;
        self.checkin(queue, conn);
        Ok(claimed)
    }

    async fn complete(
        &self,
        id: TaskId,
        worker_id: &str,
        result: &Value,
        now: DateTime<Utc>,
    ) -> Result<Settlement> {
        let updated = sqlx::query(
            r#"
            UPDATE tasks SET
                state = 'COMPLETE',
                result = ?,
                locked_by = NULL,
                locked_at = NULL,
                finished_at = ?
            WHERE id = ? AND state = 'RUNNING' AND locked_by = ?
            "#,
        )
        .bind(serde_json::to_string(result)?)
        .bind(to_millis(now))
        .bind(id.to_string())
        .bind(worker_id)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 1 {
            Ok(Settlement::Applied)
        } else {
            self.settlement_for_miss(id).await
        }
    }

    async fn fail(
        &self,
        id: TaskId,
        worker_id: &str,
        error: &str,
        retry: Option<RetrySchedule>,
        now: DateTime<Utc>,
    ) -> Result<Settlement> {
        let updated = match retry {
            Some(schedule) => {
                sqlx::query(
                    r#"
                    UPDATE tasks SET
                        state = 'FAILED_RETRYABLE',
                        run_at = ?,
                        retry_delay_secs = ?,
                        last_error = ?,
                        locked_by = NULL,
                        locked_at = NULL
                    WHERE id = ? AND state = 'RUNNING' AND locked_by = ?
                    "#,
                )
                .bind(to_millis(schedule.run_at))
                .bind(i64::try_from(schedule.delay_secs).unwrap_or(i64::MAX))
                .bind(error)
                .bind(id.to_string())
                .bind(worker_id)
                .execute(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    UPDATE tasks SET
                        state = 'FAILED_PERMANENT',
                        last_error = ?,
                        locked_by = NULL,
                        locked_at = NULL,
                        finished_at = ?
                    WHERE id = ? AND state = 'RUNNING' AND locked_by = ?
                    "#,
                )
                .bind(error)
                .bind(to_millis(now))
                .bind(id.to_string())
                .bind(worker_id)
                .execute(&self.pool)
                .await?
            }
        };

        if updated.rows_affected() == 1 {
            Ok(Settlement::Applied)
        } else {
            self.settlement_for_miss(id).await
        }
    }

    async fn revoke(&self, queue: &str, task_name: &str, until: DateTime<Utc>) -> Result<()> {
        info!(target: "store", queue, task_name, until = %until, "revoking task class");
        sqlx::query(
            r#"
            INSERT INTO task_revocations (queue, task_name, revoked_until) VALUES (?, ?, ?)
            ON CONFLICT (queue, task_name) DO UPDATE SET revoked_until = excluded.revoked_until
            "#,
        )
        .bind(queue)
        .bind(task_name)
        .bind(to_millis(until))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn restore(&self, queue: &str, task_name: &str) -> Result<()> {
        info!(target: "store", queue, task_name, "restoring task class");
        sqlx::query("DELETE FROM task_revocations WHERE queue = ? AND task_name = ?")
            .bind(queue)
            .bind(task_name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn clear_revocations(&self, queue: &str) -> Result<u64> {
        let done = sqlx::query("DELETE FROM task_revocations WHERE queue = ?")
            .bind(queue)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected())
    }

    async fn flush(&self, queue: &str) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let deleted = sqlx::query("DELETE FROM tasks WHERE queue = ?")
            .bind(queue)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM task_revocations WHERE queue = ?")
            .bind(queue)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        info!(target: "store", queue, deleted = deleted.rows_affected(), "queue flushed");
        Ok(deleted.rows_affected())
    }

    async fn flush_scheduled(&self, queue: &str, now: DateTime<Utc>) -> Result<u64> {
        let q = format!(
            "DELETE FROM tasks WHERE queue = ? AND run_at > ? AND state IN {}",
            CLAIMABLE
        );
        let deleted = sqlx::query(&q)
            .bind(queue)
            .bind(to_millis(now))
            .execute(&self.pool)
            .await?;
        Ok(deleted.rows_affected())
    }

    async fn flush_results(&self, queue: &str) -> Result<u64> {
        let q = format!("DELETE FROM tasks WHERE queue = ? AND state IN {}", FINISHED);
        let deleted = sqlx::query(&q).bind(queue).execute(&self.pool).await?;
        Ok(deleted.rows_affected())
    }

    async fn revoke_pending(&self, queue: &str, now: DateTime<Utc>) -> Result<u64> {
        let q = format!(
            "UPDATE tasks SET state = 'REVOKED', finished_at = ? WHERE queue = ? AND run_at <= ? AND state IN {}",
            CLAIMABLE
        );
        let now_ms = to_millis(now);
        let revoked = sqlx::query(&q)
            .bind(now_ms)
            .bind(queue)
            .bind(now_ms)
            .execute(&self.pool)
            .await?;
        Ok(revoked.rows_affected())
    }

    async fn purge_finished(&self, before: DateTime<Utc>) -> Result<u64> {
        let q = format!(
            "DELETE FROM tasks WHERE finished_at IS NOT NULL AND finished_at < ? AND state IN {}",
            FINISHED
        );
        let purged = sqlx::query(&q)
            .bind(to_millis(before))
            .execute(&self.pool)
            .await?;
        debug!(target: "store", purged = purged.rows_affected(), "purged finished tasks");
        Ok(purged.rows_affected())
    }

    async fn find_pending(&self, task_hash: &str) -> Result<Option<TaskRecord>> {
        let q = format!(
            "SELECT * FROM tasks WHERE task_hash = ? AND state IN {} ORDER BY run_at ASC LIMIT 1",
            UNFINISHED
        );
        let row = sqlx::query(&q)
            .bind(task_hash)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_task(&r)).transpose()
    }

    async fn get(&self, id: TaskId) -> Result<Option<TaskRecord>> {
        let row = sqlx::query("SELECT * FROM tasks WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_task(&r)).transpose()
    }

    async fn stats(&self, queue: &str, now: DateTime<Utc>) -> Result<QueueStats> {
        let now_ms = to_millis(now);
        Ok(QueueStats {
            pending: self
                .count(
                    "SELECT COUNT(*) FROM tasks WHERE queue = ? AND state = 'PENDING' AND run_at <= ?",
                    queue,
                    Some(now_ms),
                )
                .await?,
            scheduled: self
                .count(
                    "SELECT COUNT(*) FROM tasks WHERE queue = ? AND state = 'PENDING' AND run_at > ?",
                    queue,
                    Some(now_ms),
                )
                .await?,
            running: self.count_state(queue, TaskState::Running).await?,
            retrying: self.count_state(queue, TaskState::FailedRetryable).await?,
            revoked: self.count_state(queue, TaskState::Revoked).await?,
            complete: self.count_state(queue, TaskState::Complete).await?,
            failed: self.count_state(queue, TaskState::FailedPermanent).await?,
            expired: self.count_state(queue, TaskState::Expired).await?,
            result_keys: self
                .count(
                    "SELECT COUNT(*) FROM tasks WHERE queue = ? AND result IS NOT NULL",
                    queue,
                    None,
                )
                .await?,
        })
    }

    async fn list_failed(&self, queue: &str, limit: i64) -> Result<Vec<TaskRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM tasks WHERE queue = ? AND state = 'FAILED_PERMANENT' ORDER BY finished_at DESC LIMIT ?",
        )
        .bind(queue)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_task).collect()
    }

    async fn release_idle(&self, queue: &str) {
        if self.sticky_lock().remove(queue).is_some() {
            debug!(target: "store", queue, "released idle connection");
        }
    }
}

fn chrono_duration(duration: Duration) -> ChronoDuration {
    ChronoDuration::from_std(duration).unwrap_or_else(|_| ChronoDuration::days(365 * 100))
}

/// Locks taken at or before this instant are abandoned.
fn lock_cutoff(now: DateTime<Utc>, policy: &ClaimPolicy) -> i64 {
    to_millis(
        now.checked_sub_signed(chrono_duration(policy.lock_timeout))
            .unwrap_or(DateTime::<Utc>::MIN_UTC),
    )
}

fn row_to_task(row: &SqliteRow) -> Result<TaskRecord> {
    let id: String = row.try_get("id")?;
    let args: String = row.try_get("args")?;
    let kwargs: String = row.try_get("kwargs")?;
    let state: String = row.try_get("state")?;
    let attempts: i64 = row.try_get("attempts")?;
    let max_attempts: i64 = row.try_get("max_attempts")?;
    let retry_delay_secs: i64 = row.try_get("retry_delay_secs")?;
    let result: Option<String> = row.try_get("result")?;

    Ok(TaskRecord {
        id: TaskId::from_uuid(Uuid::parse_str(&id)?),
        queue: row.try_get("queue")?,
        task_name: row.try_get("task_name")?,
        args: serde_json::from_str(&args)?,
        kwargs: serde_json::from_str(&kwargs)?,
        task_hash: row.try_get("task_hash")?,
        verbose_name: row.try_get("verbose_name")?,
        owner: row.try_get("owner")?,
        priority: row.try_get("priority")?,
        run_at: from_millis(row.try_get("run_at")?)?,
        expires_at: opt_from_millis(row.try_get("expires_at")?)?,
        attempts: u32::try_from(attempts)?,
        max_attempts: u32::try_from(max_attempts)?,
        retry_delay_secs: u64::try_from(retry_delay_secs)?,
        state: state.parse::<TaskState>().map_err(|e| anyhow!(e))?,
        locked_by: row.try_get("locked_by")?,
        locked_at: opt_from_millis(row.try_get("locked_at")?)?,
        result: result.map(|r| serde_json::from_str(&r)).transpose()?,
        last_error: row.try_get("last_error")?,
        created_at: from_millis(row.try_get("created_at")?)?,
        finished_at: opt_from_millis(row.try_get("finished_at")?)?,
    })
}
