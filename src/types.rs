use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use thiserror::Error;

/// Identifier of one tracked zone (e.g. `POI001`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AreaCode(String);

impl AreaCode {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AreaCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AreaCode {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// The three record kinds pulled for every area
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Population,
    TrafficMeta,
    TrafficDetail,
}

impl RecordKind {
    pub const ALL: [RecordKind; 3] = [
        RecordKind::Population,
        RecordKind::TrafficMeta,
        RecordKind::TrafficDetail,
    ];

    /// Name of the relational table this kind is appended to.
    ///
    /// These names are part of the persisted contract; renaming one strands
    /// every row loaded before the rename.
    pub fn table_name(self) -> &'static str {
        match self {
            RecordKind::Population => "pptln",
            RecordKind::TrafficMeta => "traffic_meta",
            RecordKind::TrafficDetail => "traffic_detail",
        }
    }

    fn index(self) -> usize {
        match self {
            RecordKind::Population => 0,
            RecordKind::TrafficMeta => 1,
            RecordKind::TrafficDetail => 2,
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table_name())
    }
}

/// A single scalar cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl Value {
    /// Convert a JSON value into a cell. Arrays and objects are not scalars.
    pub fn from_json(v: &serde_json::Value) -> Option<Value> {
        match v {
            serde_json::Value::Null => Some(Value::Null),
            serde_json::Value::Bool(b) => Some(Value::Integer(i64::from(*b))),
            serde_json::Value::Number(n) => Some(match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => Value::Real(n.as_f64().unwrap_or(f64::NAN)),
            }),
            serde_json::Value::String(s) => Some(Value::Text(s.clone())),
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TableError {
    #[error("duplicate column name: {0}")]
    DuplicateColumn(String),

    #[error("row {row} has {found} cells, expected {expected}")]
    RowWidth {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("unknown column: {0}")]
    UnknownColumn(String),
}

/// Ordered rows sharing one column schema
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    /// Create an empty table with the given columns
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Result<Self, TableError> {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        let mut seen = HashSet::new();
        for c in &columns {
            if !seen.insert(c.as_str()) {
                return Err(TableError::DuplicateColumn(c.clone()));
            }
        }
        Ok(Self {
            columns,
            rows: Vec::new(),
        })
    }

    pub fn with_rows<S: Into<String>>(
        columns: impl IntoIterator<Item = S>,
        rows: Vec<Vec<Value>>,
    ) -> Result<Self, TableError> {
        let mut table = Self::new(columns)?;
        for row in rows {
            table.push_row(row)?;
        }
        Ok(table)
    }

    pub fn push_row(&mut self, row: Vec<Value>) -> Result<(), TableError> {
        if row.len() != self.columns.len() {
            return Err(TableError::RowWidth {
                row: self.rows.len(),
                expected: self.columns.len(),
                found: row.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Vec<Value>> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row).map(|r| &r[idx])
    }

    /// Row `i` as a column name to value mapping
    pub fn row_map(&self, i: usize) -> Option<BTreeMap<&str, &Value>> {
        let row = self.rows.get(i)?;
        Some(self.columns.iter().map(String::as_str).zip(row.iter()).collect())
    }

    /// Rearrange columns into `order`, which must name exactly the same columns.
    pub fn reorder(self, order: &[String]) -> Result<Table, TableError> {
        if order.len() != self.columns.len() {
            return Err(TableError::RowWidth {
                row: 0,
                expected: order.len(),
                found: self.columns.len(),
            });
        }
        let positions = order
            .iter()
            .map(|c| {
                self.column_index(c)
                    .ok_or_else(|| TableError::UnknownColumn(c.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let rows = self
            .rows
            .into_iter()
            .map(|row| positions.iter().map(|&p| row[p].clone()).collect())
            .collect();
        Ok(Table {
            columns: order.to_vec(),
            rows,
        })
    }

    /// Append `other`'s rows; the caller guarantees identical column order.
    pub(crate) fn extend_rows(&mut self, other: Table) {
        self.rows.extend(other.rows);
    }
}

/// The three tables produced by one extractor call for one area
#[derive(Debug, Clone, PartialEq)]
pub struct AreaSnapshot {
    pub area: AreaCode,
    pub population: Table,
    pub traffic_meta: Table,
    pub traffic_detail: Table,
}

impl AreaSnapshot {
    pub fn table(&self, kind: RecordKind) -> &Table {
        match kind {
            RecordKind::Population => &self.population,
            RecordKind::TrafficMeta => &self.traffic_meta,
            RecordKind::TrafficDetail => &self.traffic_detail,
        }
    }
}

/// Per-area tables grouped by kind, in area iteration order
#[derive(Debug, Default)]
pub struct Bucket {
    areas: Vec<AreaCode>,
    tables: [Vec<Table>; 3],
}

impl Bucket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, snapshot: AreaSnapshot) {
        let AreaSnapshot {
            area,
            population,
            traffic_meta,
            traffic_detail,
        } = snapshot;
        self.areas.push(area);
        self.tables[RecordKind::Population.index()].push(population);
        self.tables[RecordKind::TrafficMeta.index()].push(traffic_meta);
        self.tables[RecordKind::TrafficDetail.index()].push(traffic_detail);
    }

    pub fn areas(&self) -> &[AreaCode] {
        &self.areas
    }

    pub fn area_count(&self) -> usize {
        self.areas.len()
    }

    pub fn tables(&self, kind: RecordKind) -> &[Table] {
        &self.tables[kind.index()]
    }

    /// Move the tables for `kind` out, leaving that entry empty
    pub fn take(&mut self, kind: RecordKind) -> Vec<Table> {
        std::mem::take(&mut self.tables[kind.index()])
    }
}

/// Rows written by one append
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadResult {
    pub kind: RecordKind,
    pub table_name: String,
    pub rows_written: usize,
}
