use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{params, Connection, OpenFlags, OptionalExtension, TransactionBehavior};
use tracing::{debug, info};

use super::rows::{timestamp, to_json, ResultRow, RunRow, RESULT_COLUMNS, RUN_COLUMNS};
use super::schema::{DDL, SCHEMA_VERSION};
use crate::errors::StoreError;
use crate::model::{Run, RunSummary};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Durable run history. Writes go through one connection; on-disk stores read through
/// short-lived read-only connections so loads never wait on a save.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

enum Reader<'a> {
    Shared(MutexGuard<'a, Connection>),
    Owned(Connection),
}

impl Deref for Reader<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        match self {
            Reader::Shared(guard) => guard,
            Reader::Owned(conn) => conn,
        }
    }
}

impl Store {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.display().to_string(),
                source,
            })?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL; PRAGMA foreign_keys = ON;",
        )?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path.to_path_buf()),
        };
        store.init_schema()?;
        debug!(path = %path.display(), "opened run store");
        Ok(store)
    }

    pub fn memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Idempotent.
    pub fn init_schema(&self) -> Result<(), StoreError> {
        let conn = self.writer()?;
        conn.execute_batch(DDL)?;
        let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if version < SCHEMA_VERSION {
            conn.execute_batch(&format!("PRAGMA user_version = {}", SCHEMA_VERSION))?;
        }
        Ok(())
    }

    fn writer(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn reader(&self) -> Result<Reader<'_>, StoreError> {
        match &self.path {
            Some(path) => {
                let conn = Connection::open_with_flags(
                    path,
                    OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
                )?;
                conn.busy_timeout(BUSY_TIMEOUT)?;
                Ok(Reader::Owned(conn))
            }
            None => Ok(Reader::Shared(self.writer()?)),
        }
    }

    /// Persists a sealed run and all its results in one transaction.
    /// A run id already present is rejected, never overwritten.
    pub fn save(&self, run: &Run) -> Result<(), StoreError> {
        let run_id = run.id();
        let totals = run.totals();
        let models_json = to_json(run_id, &run.models())?;
        let rows = run
            .results()
            .iter()
            .enumerate()
            .map(|(slot, r)| ResultRow::from_result(run_id, slot, r))
            .collect::<Result<Vec<_>, _>>()?;

        let mut conn = self.writer()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO runs (
                id, created_at, created_at_ms, finished_at, definition_name, definition_hash,
                models_json, status, result_count, match_count, error_count,
                input_tokens, output_tokens, total_cost
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                run_id,
                timestamp(run.created_at()),
                run.created_at().timestamp_millis(),
                timestamp(run.finished_at()),
                run.definition_name(),
                run.definition_hash(),
                models_json,
                run.status().as_str(),
                totals.results as i64,
                totals.matches as i64,
                totals.errors as i64,
                totals.input_tokens as i64,
                totals.output_tokens as i64,
                totals.cost,
            ],
        )?;
        if inserted == 0 {
            return Err(StoreError::Duplicate {
                run_id: run_id.to_string(),
            });
        }

        {
            let mut stmt = tx.prepare(
                "INSERT INTO results (
                    run_id, slot, test_case_idx, model, inputs_json, rendered_prompt, expected,
                    response, match_mode, outcome, match_details, input_tokens, output_tokens,
                    cost, latency_ms, error_json, judge_json
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
            )?;
            for row in &rows {
                stmt.execute(params![
                    run_id,
                    row.slot,
                    row.test_case_idx,
                    row.model,
                    row.inputs_json,
                    row.rendered_prompt,
                    row.expected,
                    row.response,
                    row.match_mode,
                    row.outcome,
                    row.match_details,
                    row.input_tokens,
                    row.output_tokens,
                    row.cost,
                    row.latency_ms,
                    row.error_json,
                    row.judge_json,
                ])?;
            }
        }
        tx.commit()?;
        info!(run_id, results = rows.len(), status = run.status().as_str(), "run saved");
        Ok(())
    }

    pub fn load(&self, run_id: &str) -> Result<Run, StoreError> {
        let conn = self.reader()?;
        let header = conn
            .query_row(
                &format!("SELECT {} FROM runs WHERE id = ?1", RUN_COLUMNS),
                params![run_id],
                RunRow::from_row,
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound {
                run_id: run_id.to_string(),
            })?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM results WHERE run_id = ?1 ORDER BY slot",
            RESULT_COLUMNS
        ))?;
        let rows = stmt.query_map(params![run_id], ResultRow::from_row)?;
        let mut results = Vec::new();
        for row in rows {
            results.push(row?.into_result(run_id)?);
        }

        let (summary, finished_at) = header.into_summary()?;
        Ok(Run::restore(summary, finished_at, results))
    }

    pub fn exists(&self, run_id: &str) -> Result<bool, StoreError> {
        let conn = self.reader()?;
        let found = conn
            .query_row("SELECT 1 FROM runs WHERE id = ?1", params![run_id], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    /// Most recent first.
    pub fn list(&self, limit: usize, offset: usize) -> Result<Vec<RunSummary>, StoreError> {
        self.list_where(None, limit, offset)
    }

    pub fn list_for_definition(
        &self,
        definition_name: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<RunSummary>, StoreError> {
        self.list_where(Some(definition_name), limit, offset)
    }

    fn list_where(
        &self,
        definition_name: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<RunSummary>, StoreError> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM runs
             WHERE (?1 IS NULL OR definition_name = ?1)
             ORDER BY created_at_ms DESC, id DESC
             LIMIT ?2 OFFSET ?3",
            RUN_COLUMNS
        ))?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let offset = i64::try_from(offset).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![definition_name, limit, offset], RunRow::from_row)?;

        let mut out = Vec::new();
        for row in rows {
            let (summary, _) = row?.into_summary()?;
            out.push(summary);
        }
        Ok(out)
    }
}
