//! SQLite-backed source: batched snapshot scan plus an independent `COUNT(*)`.

mod connection;
mod cursor;

pub use connection::{is_encrypted, open_db, open_db_in_memory, open_reader};
pub use cursor::SqliteCursor;

use anyhow::{Context as _, Result};
use rusqlite::Row;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::DataSource;
use crate::pipeline::Context;
use crate::utils::config::DB_SCAN_BATCH_SIZE;

/// WAL tuning pragmas (synchronous, autocheckpoint, size limit). Use after PRAGMA journal_mode = WAL.
pub(crate) const WAL_PRAGMAS: &str = r#"
        PRAGMA synchronous = NORMAL;
        PRAGMA wal_autocheckpoint = 10000;
        PRAGMA journal_size_limit = 67108864;
        "#;

/// Schema for the users table.
pub(crate) const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    email TEXT NOT NULL,
    password_hash TEXT NOT NULL,
    role TEXT NOT NULL DEFAULT 'user',
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at_ns INTEGER NOT NULL,
    updated_at_ns INTEGER NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_users_email ON users(email);
CREATE INDEX IF NOT EXISTS idx_users_created ON users(created_at_ns DESC, id);
"#;

/// Turns one result row into an item. Shared by every cursor of a source.
pub trait RowDecoder: Clone + Send + Sync {
    type Item: Send;

    fn decode(&self, row: &Row<'_>) -> rusqlite::Result<Self::Item>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    fn keyword(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }

    /// Comparison that selects rows after a key in this direction.
    fn after(self) -> &'static str {
        match self {
            SortOrder::Asc => ">",
            SortOrder::Desc => "<",
        }
    }
}

/// A scan and the count that goes with it.
///
/// With a sort key ([`ScanQuery::order_by`]), `select_sql` is the unordered base select and
/// batches resume after the last row's key (keyset paging). The key must be unique over the
/// scan and its columns NOT NULL. Without one, `select_sql` must end in a total `ORDER BY`
/// itself and batches append `LIMIT ? OFFSET ?`.
#[derive(Clone, Debug)]
pub struct ScanQuery {
    pub select_sql: String,
    pub count_sql: String,
    pub sort_key: Vec<(String, SortOrder)>,
}

/// How a cursor pages through a scan.
#[derive(Clone, Debug)]
pub(crate) enum Paging {
    /// `?1` limit, `?2` offset.
    Offset { sql: String },
    /// `?1` limit; `next_sql` binds the previous batch's last key as `?2..`.
    Keyset {
        first_sql: String,
        next_sql: String,
        columns: Vec<String>,
    },
}

impl ScanQuery {
    pub fn new(select_sql: impl Into<String>, count_sql: impl Into<String>) -> Self {
        Self {
            select_sql: select_sql.into(),
            count_sql: count_sql.into(),
            sort_key: Vec::new(),
        }
    }

    /// Page by `columns` instead of by offset.
    pub fn order_by(mut self, columns: &[(&str, SortOrder)]) -> Self {
        self.sort_key = columns
            .iter()
            .map(|(col, order)| (col.to_string(), *order))
            .collect();
        self
    }

    fn base_sql(&self) -> &str {
        self.select_sql.trim_end().trim_end_matches(';')
    }

    pub(crate) fn paging(&self) -> Paging {
        if self.sort_key.is_empty() {
            return Paging::Offset {
                sql: format!("{} LIMIT ?1 OFFSET ?2", self.base_sql()),
            };
        }
        let order = self
            .sort_key
            .iter()
            .map(|(col, dir)| format!("{} {}", col, dir.keyword()))
            .collect::<Vec<_>>()
            .join(", ");
        let base = self.base_sql();
        Paging::Keyset {
            first_sql: format!("SELECT * FROM ({}) ORDER BY {} LIMIT ?1", base, order),
            next_sql: format!(
                "SELECT * FROM ({}) WHERE {} ORDER BY {} LIMIT ?1",
                base,
                self.after_key_predicate(),
                order
            ),
            columns: self.sort_key.iter().map(|(col, _)| col.clone()).collect(),
        }
    }

    /// Rows strictly after the key bound at `?2..`, e.g. for `(a DESC, b ASC)`:
    /// `a <= ?2 AND (a < ?2 OR (a = ?2 AND b > ?3))`. The leading range lets SQLite use an
    /// index on the first key column.
    fn after_key_predicate(&self) -> String {
        let param = |i: usize| format!("?{}", i + 2);
        let branches = (0..self.sort_key.len())
            .map(|i| {
                let mut terms: Vec<String> = self.sort_key[..i]
                    .iter()
                    .enumerate()
                    .map(|(j, (col, _))| format!("{} = {}", col, param(j)))
                    .collect();
                let (col, dir) = &self.sort_key[i];
                terms.push(format!("{} {} {}", col, dir.after(), param(i)));
                format!("({})", terms.join(" AND "))
            })
            .collect::<Vec<_>>()
            .join(" OR ");
        let (first, dir) = &self.sort_key[0];
        format!("{} {}= ?2 AND ({})", first, dir.after(), branches)
    }
}

#[derive(Clone)]
pub struct SqliteSource<D> {
    db_path: PathBuf,
    passphrase: Option<Arc<str>>,
    decoder: D,
    batch_size: usize,
}

impl<D: RowDecoder> SqliteSource<D> {
    pub fn new(db_path: &Path, decoder: D) -> Self {
        Self {
            db_path: db_path.to_path_buf(),
            passphrase: None,
            decoder,
            batch_size: DB_SCAN_BATCH_SIZE,
        }
    }

    pub fn with_passphrase(mut self, passphrase: Option<&str>) -> Self {
        self.passphrase = passphrase.map(Arc::from);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }
}

impl<D: RowDecoder> DataSource for SqliteSource<D> {
    type Item = D::Item;
    type Query = ScanQuery;
    type Cursor = SqliteCursor<D>;

    fn open(&self, query: &ScanQuery) -> Result<SqliteCursor<D>> {
        let conn = open_reader(&self.db_path, self.passphrase.as_deref())?;
        SqliteCursor::begin(
            conn,
            query.paging(),
            self.decoder.clone(),
            self.batch_size,
        )
    }

    fn count(&self, query: &ScanQuery, ctx: &Context) -> Result<i64> {
        let conn = open_reader(&self.db_path, self.passphrase.as_deref())?;
        let handle = conn.get_interrupt_handle();
        let _interrupt = ctx.on_cancel(move || handle.interrupt());
        if let Some(reason) = ctx.err() {
            anyhow::bail!("count skipped: {}", reason);
        }
        conn.query_row(&query.count_sql, [], |row| row.get::<_, i64>(0))
            .context("count query")
    }
}
