use anyhow::{Context, Result};
use log::debug;
use rusqlite::types::Value;
use rusqlite::{Connection, InterruptHandle, params_from_iter};
use std::collections::VecDeque;
use std::sync::Arc;

use super::{Paging, RowDecoder};
use crate::source::{Interrupter, SourceCursor};

/// Batched scan over one connection held inside a read transaction, so every batch reads the
/// same snapshot. Memory is bounded by one batch.
pub struct SqliteCursor<D: RowDecoder> {
    conn: Option<Connection>,
    paging: Paging,
    decoder: D,
    buffer: VecDeque<D::Item>,
    /// Rows read so far; the offset for offset paging.
    offset: usize,
    /// Sort key of the last row read, for keyset paging.
    last_key: Option<Vec<Value>>,
    batch_size: usize,
    exhausted: bool,
    interrupt: Arc<InterruptHandle>,
}

impl<D: RowDecoder> SqliteCursor<D> {
    pub(crate) fn begin(
        conn: Connection,
        paging: Paging,
        decoder: D,
        batch_size: usize,
    ) -> Result<Self> {
        conn.execute_batch("BEGIN DEFERRED")
            .context("begin read transaction")?;
        let interrupt = Arc::new(conn.get_interrupt_handle());
        Ok(Self {
            conn: Some(conn),
            paging,
            decoder,
            buffer: VecDeque::with_capacity(batch_size),
            offset: 0,
            last_key: None,
            batch_size,
            exhausted: false,
            interrupt,
        })
    }

    fn fetch_batch(&mut self) -> Result<()> {
        let conn = self.conn.as_ref().context("cursor closed")?;
        let mut params = vec![Value::Integer(self.batch_size as i64)];
        let (sql, key_columns): (&str, &[String]) = match &self.paging {
            Paging::Offset { sql } => {
                params.push(Value::Integer(self.offset as i64));
                (sql.as_str(), &[][..])
            }
            Paging::Keyset {
                first_sql,
                next_sql,
                columns,
            } => match &self.last_key {
                None => (first_sql.as_str(), columns.as_slice()),
                Some(key) => {
                    params.extend(key.iter().cloned());
                    (next_sql.as_str(), columns.as_slice())
                }
            },
        };

        let mut stmt = conn.prepare_cached(sql).context("prepare scan")?;
        let decoder = &self.decoder;
        let rows = stmt
            .query_map(params_from_iter(params), |row| {
                let item = decoder.decode(row)?;
                let key = key_columns
                    .iter()
                    .map(|col| row.get::<_, Value>(col.as_str()))
                    .collect::<rusqlite::Result<Vec<Value>>>()?;
                Ok((item, key))
            })
            .context("run scan batch")?;
        let mut fetched = 0_usize;
        let mut last_key = None;
        for row in rows {
            let (item, key) = row.context("decode row")?;
            self.buffer.push_back(item);
            last_key = Some(key);
            fetched += 1;
        }
        self.offset += fetched;
        if last_key.is_some() {
            self.last_key = last_key;
        }
        if fetched < self.batch_size {
            self.exhausted = true;
        }
        debug!("sqlite cursor: fetched {} rows ({} so far)", fetched, self.offset);
        Ok(())
    }
}

impl<D: RowDecoder> SourceCursor for SqliteCursor<D> {
    type Item = D::Item;

    fn advance(&mut self) -> Result<Option<D::Item>> {
        if self.buffer.is_empty() && !self.exhausted {
            self.fetch_batch()?;
        }
        Ok(self.buffer.pop_front())
    }

    fn close(&mut self) {
        self.buffer.clear();
        if let Some(conn) = self.conn.take() {
            // Read-only transaction; nothing to keep.
            let _ = conn.execute_batch("ROLLBACK");
            let _ = conn.close();
        }
    }

    fn interrupter(&self) -> Option<Interrupter> {
        let handle = Arc::clone(&self.interrupt);
        Some(Box::new(move || handle.interrupt()))
    }
}

impl<D: RowDecoder> Drop for SqliteCursor<D> {
    fn drop(&mut self) {
        self.close();
    }
}
