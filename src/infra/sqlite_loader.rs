use crate::app::ports::LoaderPort;
use crate::error::{LoadCause, LoadError};
use crate::observability::metrics;
use crate::types::{LoadResult, RecordKind, Table, Value};
use async_trait::async_trait;
use rusqlite::types::{FromSql, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::{params_from_iter, Connection, ToSql};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(rusqlite::types::Value::Null),
            Value::Integer(i) => ToSqlOutput::Owned(rusqlite::types::Value::Integer(*i)),
            Value::Real(f) => ToSqlOutput::Owned(rusqlite::types::Value::Real(*f)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}

impl FromSql for Value {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Ok(match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Integer(i),
            ValueRef::Real(f) => Value::Real(f),
            ValueRef::Text(t) | ValueRef::Blob(t) => {
                Value::Text(String::from_utf8_lossy(t).into_owned())
            }
        })
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Column affinity for a new table, from the first non-null values seen
fn infer_affinity(table: &Table, col: usize) -> &'static str {
    let mut affinity = None;
    for row in table.rows() {
        let next = match &row[col] {
            Value::Null => continue,
            Value::Integer(_) => "INTEGER",
            Value::Real(_) => "REAL",
            Value::Text(_) => return "TEXT",
        };
        affinity = match (affinity, next) {
            (None, n) => Some(n),
            (Some("INTEGER"), "REAL") | (Some("REAL"), _) => Some("REAL"),
            (Some(a), _) => Some(a),
        };
    }
    affinity.unwrap_or("TEXT")
}

fn existing_columns(conn: &Connection, target: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(target)))?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;
    rows.collect()
}

/// Append all rows inside one transaction. Dropping the transaction on any
/// early return rolls it back, so the target never sees a partial append.
fn append_rows(
    conn: &mut Connection,
    table: &Table,
    target: &str,
    cancel: &CancellationToken,
) -> Result<usize, LoadCause> {
    let tx = conn.transaction()?;

    let existing = existing_columns(&tx, target)?;
    if existing.is_empty() {
        let defs: Vec<String> = table
            .columns()
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{} {}", quote_ident(c), infer_affinity(table, i)))
            .collect();
        let ddl = format!("CREATE TABLE {} ({})", quote_ident(target), defs.join(", "));
        debug!("{}", ddl);
        tx.execute(&ddl, [])?;
    } else {
        let missing: Vec<String> = table
            .columns()
            .iter()
            .filter(|c| !existing.contains(c))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(LoadCause::SchemaMismatch { missing });
        }
    }

    {
        let columns: Vec<String> = table.columns().iter().map(|c| quote_ident(c)).collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(target),
            columns.join(", "),
            placeholders.join(", ")
        );
        let mut stmt = tx.prepare(&sql)?;
        for row in table.rows() {
            if cancel.is_cancelled() {
                return Err(LoadCause::Cancelled);
            }
            stmt.execute(params_from_iter(row.iter()))?;
        }
    }

    if cancel.is_cancelled() {
        return Err(LoadCause::Cancelled);
    }
    tx.commit()?;
    Ok(table.len())
}

/// Append-only SQLite sink. One connection shared by all kind-pipelines;
/// the mutex serializes their writes.
#[derive(Clone)]
pub struct SqliteLoader {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteLoader {
    pub fn open<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.busy_timeout(std::time::Duration::from_secs(30))?;
        info!("Opened SQLite sink at {}", path.display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> anyhow::Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("connection lock poisoned"))
    }

    /// Number of rows in `target`; 0 when the table does not exist yet
    pub fn count_rows(&self, target: &str) -> anyhow::Result<usize> {
        let conn = self.lock()?;
        if existing_columns(&conn, target)?.is_empty() {
            return Ok(0);
        }
        let n: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", quote_ident(target)),
            [],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    /// Read `columns` of every row in insertion order
    pub fn read_rows(&self, target: &str, columns: &[String]) -> anyhow::Result<Vec<Vec<Value>>> {
        let conn = self.lock()?;
        let cols: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM {} ORDER BY rowid",
            cols.join(", "),
            quote_ident(target)
        ))?;
        let rows = stmt.query_map([], |row| {
            (0..columns.len())
                .map(|i| row.get::<_, Value>(i))
                .collect::<rusqlite::Result<Vec<_>>>()
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

#[async_trait]
impl LoaderPort for SqliteLoader {
    async fn load(
        &self,
        kind: RecordKind,
        table: Table,
        target: &str,
        cancel: &CancellationToken,
    ) -> Result<LoadResult, LoadError> {
        if table.columns().is_empty() {
            debug!("Nothing to load into {}", target);
            return Ok(LoadResult {
                kind,
                table_name: target.to_string(),
                rows_written: 0,
            });
        }

        let conn = self.conn.clone();
        let owned_target = target.to_string();
        let cancel = cancel.clone();
        let t0 = Instant::now();

        let joined = tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| LoadCause::Task("connection lock poisoned".into()))?;
            append_rows(&mut guard, &table, &owned_target, &cancel)
        })
        .await;

        let result = match joined {
            Ok(r) => r,
            Err(e) => Err(LoadCause::Task(e.to_string())),
        };
        match result {
            Ok(rows_written) => {
                metrics::loader::load_success(target, rows_written, t0.elapsed().as_secs_f64());
                info!("Appended {} rows to {}", rows_written, target);
                Ok(LoadResult {
                    kind,
                    table_name: target.to_string(),
                    rows_written,
                })
            }
            Err(cause) => {
                metrics::loader::load_error(target);
                error!("Append to {} failed: {}", target, cause);
                Err(LoadError::new(target, cause))
            }
        }
    }
}
