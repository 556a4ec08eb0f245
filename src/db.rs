//! Optional persistence collaborator (§4.10): build history and
//! per-package status, used to throttle nvchecker sources and to skip
//! `Depended` promotion onto already-failed dependents.
//!
//! Grounded on the teacher's `sqlx`-based persistence (`buildbtw-poc`
//! used a `SqlitePool` behind an API layer); the schema here is new,
//! narrowed to what the Cycle Driver actually reads and writes.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use thiserror::Error;
use time::OffsetDateTime;

use crate::{Pkgbase, outcome::ResourceUsage};

#[derive(Error, Debug)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Build history and status store (§4.10). All methods are best-effort
/// reads/writes from the Cycle Driver's point of view: a [`NullDatabase`]
/// satisfies the same trait when `lilac.dburl` is unset (§6).
#[async_trait]
pub trait Database: Send + Sync {
    /// Timestamp of the last successful build that consumed a change
    /// from the given nvchecker source index, if any (§4.1 step 3).
    async fn last_success(
        &self,
        pkgbase: &Pkgbase,
        source_index: usize,
    ) -> Result<Option<OffsetDateTime>, DbError>;

    /// Whether the most recent build recorded for this package failed
    /// (§9, `Depended` promotion skip rule).
    async fn is_last_build_failed(&self, pkgbase: &Pkgbase) -> Result<bool, DbError>;

    /// Appends one build-log record (§4.5 "Append a log record"):
    /// outcome kind, both version fields, elapsed time, resource usage,
    /// the serialized build reasons, and any free-form message.
    #[allow(clippy::too_many_arguments)]
    async fn record_log(
        &self,
        pkgbase: &Pkgbase,
        outcome_kind: &str,
        nv_version: Option<&str>,
        pkg_version: Option<&str>,
        elapsed: Duration,
        usage: Option<&ResourceUsage>,
        reasons: &str,
        message: Option<&str>,
    ) -> Result<(), DbError>;

    async fn set_status(
        &self,
        pkgbase: &Pkgbase,
        source_index: Option<usize>,
        succeeded: bool,
    ) -> Result<(), DbError>;
}

/// No-op [`Database`] used when no `dburl` is configured (§6).
pub struct NullDatabase;

#[async_trait]
impl Database for NullDatabase {
    async fn last_success(
        &self,
        _pkgbase: &Pkgbase,
        _source_index: usize,
    ) -> Result<Option<OffsetDateTime>, DbError> {
        Ok(None)
    }

    async fn is_last_build_failed(&self, _pkgbase: &Pkgbase) -> Result<bool, DbError> {
        Ok(false)
    }

    async fn record_log(
        &self,
        _pkgbase: &Pkgbase,
        _outcome_kind: &str,
        _nv_version: Option<&str>,
        _pkg_version: Option<&str>,
        _elapsed: Duration,
        _usage: Option<&ResourceUsage>,
        _reasons: &str,
        _message: Option<&str>,
    ) -> Result<(), DbError> {
        Ok(())
    }

    async fn set_status(
        &self,
        _pkgbase: &Pkgbase,
        _source_index: Option<usize>,
        _succeeded: bool,
    ) -> Result<(), DbError> {
        Ok(())
    }
}

/// [`Database`] backed by SQLite via `sqlx` (§4.10, §6 `lilac.dburl`).
pub struct SqliteDatabase {
    pool: SqlitePool,
}

impl SqliteDatabase {
    pub async fn connect(url: &str) -> Result<Self, DbError> {
        let pool = SqlitePool::connect(url).await?;
        let db = SqliteDatabase { pool };
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> Result<(), DbError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS build_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                pkgbase TEXT NOT NULL,
                outcome_kind TEXT NOT NULL,
                nv_version TEXT,
                pkg_version TEXT,
                elapsed_secs REAL NOT NULL,
                cpu_time_secs REAL,
                peak_memory_bytes INTEGER,
                reasons TEXT NOT NULL,
                message TEXT,
                recorded_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS package_status (
                pkgbase TEXT NOT NULL,
                source_index INTEGER NOT NULL,
                succeeded INTEGER NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (pkgbase, source_index)
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl Database for SqliteDatabase {
    async fn last_success(
        &self,
        pkgbase: &Pkgbase,
        source_index: usize,
    ) -> Result<Option<OffsetDateTime>, DbError> {
        let row = sqlx::query(
            "SELECT updated_at FROM package_status
             WHERE pkgbase = ? AND source_index = ? AND succeeded = 1",
        )
        .bind(pkgbase.as_ref())
        .bind(source_index as i64)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row
            .map(|row| row.get::<String, _>("updated_at"))
            .and_then(|raw| OffsetDateTime::parse(&raw, &time::format_description::well_known::Rfc3339).ok()))
    }

    async fn is_last_build_failed(&self, pkgbase: &Pkgbase) -> Result<bool, DbError> {
        let row = sqlx::query(
            "SELECT outcome_kind FROM build_log
             WHERE pkgbase = ? ORDER BY id DESC LIMIT 1",
        )
        .bind(pkgbase.as_ref())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row
            .map(|row| row.get::<String, _>("outcome_kind"))
            .map(|kind| kind == "failed")
            .unwrap_or(false))
    }

    async fn record_log(
        &self,
        pkgbase: &Pkgbase,
        outcome_kind: &str,
        nv_version: Option<&str>,
        pkg_version: Option<&str>,
        elapsed: Duration,
        usage: Option<&ResourceUsage>,
        reasons: &str,
        message: Option<&str>,
    ) -> Result<(), DbError> {
        let now = OffsetDateTime::now_utc()
            .format(&time::format_description::well_known::Rfc3339)
            .map_err(|_| DbError::Sqlx(sqlx::Error::RowNotFound))?;

        let cpu_time_secs = usage.and_then(|u| u.cpu_time).map(|d| d.as_secs_f64());
        let peak_memory_bytes = usage.and_then(|u| u.peak_memory_bytes).map(|b| b as i64);

        sqlx::query(
            "INSERT INTO build_log (
                pkgbase, outcome_kind, nv_version, pkg_version, elapsed_secs,
                cpu_time_secs, peak_memory_bytes, reasons, message, recorded_at
             )
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(pkgbase.as_ref())
        .bind(outcome_kind)
        .bind(nv_version)
        .bind(pkg_version)
        .bind(elapsed.as_secs_f64())
        .bind(cpu_time_secs)
        .bind(peak_memory_bytes)
        .bind(reasons)
        .bind(message)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_status(
        &self,
        pkgbase: &Pkgbase,
        source_index: Option<usize>,
        succeeded: bool,
    ) -> Result<(), DbError> {
        let now = OffsetDateTime::now_utc()
            .format(&time::format_description::well_known::Rfc3339)
            .map_err(|_| DbError::Sqlx(sqlx::Error::RowNotFound))?;

        sqlx::query(
            "INSERT INTO package_status (pkgbase, source_index, succeeded, updated_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(pkgbase, source_index) DO UPDATE SET
                succeeded = excluded.succeeded,
                updated_at = excluded.updated_at",
        )
        .bind(pkgbase.as_ref())
        .bind(source_index.unwrap_or(0) as i64)
        .bind(succeeded as i64)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
