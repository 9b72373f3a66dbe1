//! Idempotent record persistence.
//!
//! A single operation: insert a record into the time-series table. The
//! `(machine_id, sequence_number)` uniqueness constraint plus
//! ON-CONFLICT-DO-NOTHING semantics make the insert idempotent, which is what
//! lets the pipeline run at-least-once end to end — redeliveries and warm
//! replays collapse into duplicates instead of corruption.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use telemetry_wire::SensorRecord;
use thiserror::Error;

/// What happened to an inserted record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// A new row was written.
    Inserted,
    /// The row already existed; the record was silently absorbed.
    Duplicate,
}

/// Error types for repository operations.
#[derive(Debug, Clone, Error)]
pub enum RepoError {
    /// Connection-level trouble; the consumer NAKs and the broker redelivers.
    #[error("transient repository failure: {0}")]
    Transient(String),
    /// Schema or authorization trouble; retrying the same work cannot help.
    #[error("fatal repository failure: {0}")]
    Fatal(String),
}

impl RepoError {
    #[inline]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Storage seam for the consumer. Uses native async fn in traits; for dynamic
/// dispatch use [`RepositoryBoxed`].
pub trait Repository: Send + Sync {
    fn insert(
        &self,
        record: &SensorRecord,
    ) -> impl Future<Output = Result<InsertOutcome, RepoError>> + Send;

    fn name(&self) -> &str;
}

/// Object-safe version of [`Repository`] for dynamic dispatch.
pub trait RepositoryBoxed: Send + Sync {
    fn insert_boxed<'a>(
        &'a self,
        record: &'a SensorRecord,
    ) -> std::pin::Pin<Box<dyn Future<Output = Result<InsertOutcome, RepoError>> + Send + 'a>>;

    fn name(&self) -> &str;
}

/// Blanket implementation: any Repository can be used as RepositoryBoxed.
impl<T: Repository> RepositoryBoxed for T {
    fn insert_boxed<'a>(
        &'a self,
        record: &'a SensorRecord,
    ) -> std::pin::Pin<Box<dyn Future<Output = Result<InsertOutcome, RepoError>> + Send + 'a>> {
        Box::pin(self.insert(record))
    }

    fn name(&self) -> &str {
        Repository::name(self)
    }
}

const SENSOR_DATA_DDL: &str = r"
CREATE TABLE IF NOT EXISTS sensor_data (
    time                 TIMESTAMPTZ NOT NULL,
    machine_id           TEXT NOT NULL,
    sequence_number      BIGINT NOT NULL,
    temperature          DOUBLE PRECISION NOT NULL,
    spindle_speed        DOUBLE PRECISION NOT NULL,
    x_pos_mm             DOUBLE PRECISION NOT NULL,
    y_pos_mm             DOUBLE PRECISION NOT NULL,
    z_pos_mm             DOUBLE PRECISION NOT NULL,
    feed_rate_actual     DOUBLE PRECISION NOT NULL,
    spindle_load_percent DOUBLE PRECISION NOT NULL,
    total_power_kw       DOUBLE PRECISION NOT NULL,
    machine_state        TEXT NOT NULL,
    active_program_line  INTEGER NOT NULL,
    UNIQUE (machine_id, sequence_number)
)";

const MACHINES_DDL: &str = r"
CREATE TABLE IF NOT EXISTS machines (
    id              TEXT PRIMARY KEY,
    name            TEXT NOT NULL,
    location        TEXT NOT NULL DEFAULT '',
    controller_type TEXT NOT NULL DEFAULT '',
    max_spindle_rpm DOUBLE PRECISION NOT NULL DEFAULT 0,
    axis_count      INTEGER NOT NULL DEFAULT 3,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at      TIMESTAMPTZ NOT NULL DEFAULT now()
)";

const INSERT_RECORD: &str = r"
INSERT INTO sensor_data (
    time, machine_id, sequence_number, temperature, spindle_speed,
    x_pos_mm, y_pos_mm, z_pos_mm, feed_rate_actual, spindle_load_percent,
    total_power_kw, machine_state, active_program_line
) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
ON CONFLICT (machine_id, sequence_number) DO NOTHING";

/// Postgres-backed repository over a shared connection pool.
pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    /// Connects the pool. The pool is shared by every consumer task.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    /// Creates the two tables this service needs, including the uniqueness
    /// constraint the idempotent insert relies on. Anything beyond this is
    /// the schema-migration tooling's business.
    pub async fn ensure_schema(&self) -> Result<(), sqlx::Error> {
        sqlx::query(SENSOR_DATA_DDL).execute(&self.pool).await?;
        sqlx::query(MACHINES_DDL).execute(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Connection-level failures may heal on redelivery; everything else is a
/// schema or authorization problem that retrying cannot fix.
fn classify(err: &sqlx::Error) -> RepoError {
    match err {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            RepoError::Transient(err.to_string())
        }
        other => RepoError::Fatal(other.to_string()),
    }
}

impl Repository for PgRepository {
    async fn insert(&self, record: &SensorRecord) -> Result<InsertOutcome, RepoError> {
        let result = sqlx::query(INSERT_RECORD)
            .bind(record.timestamp)
            .bind(&record.machine_id)
            .bind(record.sequence_number as i64)
            .bind(record.temperature)
            .bind(record.spindle_speed)
            .bind(record.x_pos_mm)
            .bind(record.y_pos_mm)
            .bind(record.z_pos_mm)
            .bind(record.feed_rate_actual)
            .bind(record.spindle_load_percent)
            .bind(record.total_power_kw)
            .bind(&record.machine_state)
            .bind(record.active_program_line)
            .execute(&self.pool)
            .await
            .map_err(|err| classify(&err))?;

        if result.rows_affected() == 0 {
            Ok(InsertOutcome::Duplicate)
        } else {
            Ok(InsertOutcome::Inserted)
        }
    }

    fn name(&self) -> &str {
        "postgres"
    }
}

/// In-memory repository with injectable failures, for tests and dry runs.
#[derive(Default)]
pub struct MemoryRepository {
    rows: Mutex<HashMap<(String, u64), SensorRecord>>,
    failure: Mutex<Option<RepoError>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent insert fail with `err` until [`heal`](Self::heal).
    pub fn fail_with(&self, err: RepoError) {
        *self.failure.lock().unwrap() = Some(err);
    }

    pub fn heal(&self) {
        *self.failure.lock().unwrap() = None;
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stored sequence numbers for one machine, ascending.
    pub fn sequences_for(&self, machine_id: &str) -> Vec<u64> {
        let mut sequences: Vec<u64> = self
            .rows
            .lock()
            .unwrap()
            .keys()
            .filter(|(machine, _)| machine == machine_id)
            .map(|(_, sequence)| *sequence)
            .collect();
        sequences.sort_unstable();
        sequences
    }
}

impl Repository for MemoryRepository {
    async fn insert(&self, record: &SensorRecord) -> Result<InsertOutcome, RepoError> {
        if let Some(err) = self.failure.lock().unwrap().clone() {
            return Err(err);
        }

        let key = (record.machine_id.clone(), record.sequence_number);
        let mut rows = self.rows.lock().unwrap();
        if rows.contains_key(&key) {
            return Ok(InsertOutcome::Duplicate);
        }
        rows.insert(key, record.clone());
        Ok(InsertOutcome::Inserted)
    }

    fn name(&self) -> &str {
        "memory"
    }
}
