// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! SQLite persistence for run records and schedule watermarks.

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use skein_sched_core::{AttemptRecord, FailureReason, RunId, RunRecord, RunState};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqliteSynchronous};

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
	#[error("Database error: {0}")]
	Sqlx(#[from] sqlx::Error),

	#[error("Serialization error: {0}")]
	Serialization(#[from] serde_json::Error),

	#[error("Internal: {0}")]
	Internal(String),
}

pub type Result<T> = std::result::Result<T, RepositoryError>;

type RunRow = (
	String,
	String,
	DateTime<Utc>,
	i64,
	String,
	DateTime<Utc>,
	Option<DateTime<Utc>>,
	Option<DateTime<Utc>>,
	Option<String>,
	Option<String>,
	String,
);

const RUN_COLUMNS: &str = "run_id, task_name, scheduled_at, attempt, state, queued_at, started_at, ended_at, failure_reason, teardown_error, attempts";

/// Create a SqlitePool with WAL mode and common settings.
#[tracing::instrument(skip(database_url))]
pub async fn create_pool(database_url: &str) -> Result<SqlitePool> {
	let options = SqliteConnectOptions::from_str(database_url)
		.map_err(|e| RepositoryError::Internal(format!("Invalid database URL: {e}")))?
		.journal_mode(SqliteJournalMode::Wal)
		.synchronous(SqliteSynchronous::Normal)
		.create_if_missing(true);

	let pool = SqlitePool::connect_with(options).await?;

	tracing::debug!("database pool created");
	Ok(pool)
}

/// Write-through store for the run table.
#[derive(Clone)]
pub struct RunRepository {
	pool: SqlitePool,
}

impl RunRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	/// Create the tables if they do not exist yet.
	#[tracing::instrument(skip(self))]
	pub async fn migrate(&self) -> Result<()> {
		sqlx::query(
			r#"
			CREATE TABLE IF NOT EXISTS run_records (
				run_id TEXT PRIMARY KEY,
				task_name TEXT NOT NULL,
				scheduled_at TEXT NOT NULL,
				attempt INTEGER NOT NULL,
				state TEXT NOT NULL,
				queued_at TEXT NOT NULL,
				started_at TEXT,
				ended_at TEXT,
				failure_reason TEXT,
				teardown_error TEXT,
				attempts TEXT NOT NULL
			)
			"#,
		)
		.execute(&self.pool)
		.await?;

		sqlx::query(
			"CREATE INDEX IF NOT EXISTS idx_run_records_task ON run_records (task_name, queued_at)",
		)
		.execute(&self.pool)
		.await?;

		sqlx::query(
			r#"
			CREATE TABLE IF NOT EXISTS task_watermarks (
				task_name TEXT PRIMARY KEY,
				watermark_ms INTEGER NOT NULL
			)
			"#,
		)
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	/// Insert or update a run. A terminal row only accepts terminal
	/// snapshots, so a stale write that lands late cannot reopen it.
	#[tracing::instrument(skip(self, run), fields(run_id = %run.run_id, task = %run.task_name, state = %run.state))]
	pub async fn upsert_run(&self, run: &RunRecord) -> Result<()> {
		let failure_reason = run
			.failure_reason
			.as_ref()
			.map(serde_json::to_string)
			.transpose()?;
		let attempts = serde_json::to_string(&run.attempts)?;

		sqlx::query(
			r#"
			INSERT INTO run_records (run_id, task_name, scheduled_at, attempt, state, queued_at, started_at, ended_at, failure_reason, teardown_error, attempts)
			VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
			ON CONFLICT(run_id) DO UPDATE SET
				attempt = excluded.attempt,
				state = excluded.state,
				started_at = excluded.started_at,
				ended_at = excluded.ended_at,
				failure_reason = excluded.failure_reason,
				teardown_error = excluded.teardown_error,
				attempts = excluded.attempts
			WHERE run_records.state NOT IN ('succeeded', 'terminal_failed')
				OR excluded.state IN ('succeeded', 'terminal_failed')
			"#,
		)
		.bind(run.run_id.to_string())
		.bind(&run.task_name)
		.bind(run.scheduled_at)
		.bind(run.attempt as i64)
		.bind(run.state.as_str())
		.bind(run.queued_at)
		.bind(run.started_at)
		.bind(run.ended_at)
		.bind(failure_reason)
		.bind(&run.teardown_error)
		.bind(attempts)
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	#[tracing::instrument(skip(self))]
	pub async fn get_run(&self, run_id: &RunId) -> Result<Option<RunRecord>> {
		let row = sqlx::query_as::<_, RunRow>(&format!(
			"SELECT {RUN_COLUMNS} FROM run_records WHERE run_id = ?"
		))
		.bind(run_id.to_string())
		.fetch_optional(&self.pool)
		.await?;

		row.map(row_to_run).transpose()
	}

	/// Most recent runs of a task, newest first.
	#[tracing::instrument(skip(self))]
	pub async fn list_runs(&self, task_name: &str, limit: u32) -> Result<Vec<RunRecord>> {
		let rows = sqlx::query_as::<_, RunRow>(&format!(
			"SELECT {RUN_COLUMNS} FROM run_records WHERE task_name = ? ORDER BY queued_at DESC LIMIT ?"
		))
		.bind(task_name)
		.bind(limit as i64)
		.fetch_all(&self.pool)
		.await?;

		rows.into_iter().map(row_to_run).collect()
	}

	/// Delete terminal runs that ended before `cutoff`.
	#[tracing::instrument(skip(self))]
	pub async fn delete_ended_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
		let result = sqlx::query(
			"DELETE FROM run_records WHERE ended_at IS NOT NULL AND state IN ('succeeded', 'terminal_failed') AND ended_at < ?",
		)
		.bind(cutoff)
		.execute(&self.pool)
		.await?;

		Ok(result.rows_affected())
	}

	/// Close out runs left unfinished by a previous process. Their
	/// executions died with it, so they can never reach a terminal state
	/// on their own.
	#[tracing::instrument(skip(self))]
	pub async fn abandon_unfinished(&self, now: DateTime<Utc>) -> Result<u64> {
		let reason = serde_json::to_string(&FailureReason::StatusUnavailable(
			"scheduler restarted before the run finished".to_string(),
		))?;
		let result = sqlx::query(
			"UPDATE run_records SET state = 'terminal_failed', ended_at = ?, failure_reason = ? WHERE state NOT IN ('succeeded', 'terminal_failed')",
		)
		.bind(now)
		.bind(reason)
		.execute(&self.pool)
		.await?;

		Ok(result.rows_affected())
	}

	/// Record that a task fired at `watermark`. Never moves a watermark back.
	#[tracing::instrument(skip(self))]
	pub async fn save_watermark(&self, task_name: &str, watermark: DateTime<Utc>) -> Result<()> {
		sqlx::query(
			r#"
			INSERT INTO task_watermarks (task_name, watermark_ms)
			VALUES (?, ?)
			ON CONFLICT(task_name) DO UPDATE SET
				watermark_ms = MAX(task_watermarks.watermark_ms, excluded.watermark_ms)
			"#,
		)
		.bind(task_name)
		.bind(watermark.timestamp_millis())
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	#[tracing::instrument(skip(self))]
	pub async fn load_watermarks(&self) -> Result<HashMap<String, DateTime<Utc>>> {
		let rows = sqlx::query_as::<_, (String, i64)>(
			"SELECT task_name, watermark_ms FROM task_watermarks",
		)
		.fetch_all(&self.pool)
		.await?;

		rows
			.into_iter()
			.map(|(task, ms)| {
				Utc.timestamp_millis_opt(ms)
					.single()
					.map(|ts| (task.clone(), ts))
					.ok_or_else(|| RepositoryError::Internal(format!("invalid watermark for {task}: {ms}")))
			})
			.collect()
	}
}

fn row_to_run(row: RunRow) -> Result<RunRecord> {
	let (
		run_id,
		task_name,
		scheduled_at,
		attempt,
		state,
		queued_at,
		started_at,
		ended_at,
		failure_reason,
		teardown_error,
		attempts,
	) = row;

	Ok(RunRecord {
		run_id: run_id
			.parse()
			.map_err(|_| RepositoryError::Internal(format!("invalid run id: {run_id}")))?,
		task_name,
		scheduled_at,
		attempt: attempt as u32,
		state: state
			.parse::<RunState>()
			.map_err(RepositoryError::Internal)?,
		queued_at,
		started_at,
		ended_at,
		failure_reason: failure_reason
			.as_deref()
			.map(serde_json::from_str::<FailureReason>)
			.transpose()?,
		teardown_error,
		attempts: serde_json::from_str::<Vec<AttemptRecord>>(&attempts)?,
	})
}
