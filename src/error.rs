use crate::types::{AreaCode, RecordKind, TableError};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Why a single area fetch failed
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchCause {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("unexpected HTTP status {0}")]
    Status(u16),

    #[error("API error {code}: {message}")]
    Api { code: String, message: String },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("cancelled")]
    Cancelled,
}

/// A failed extractor call, tagged with the area and, when known, the record kind.
///
/// `kind` is `None` when the per-area request itself failed, before the
/// response was split into kinds.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("fetch failed for area {area}{}: {cause}", kind_suffix(.kind))]
pub struct FetchError {
    pub area: AreaCode,
    pub kind: Option<RecordKind>,
    #[source]
    pub cause: FetchCause,
}

impl FetchError {
    pub fn new(area: &AreaCode, cause: FetchCause) -> Self {
        Self {
            area: area.clone(),
            kind: None,
            cause,
        }
    }

    pub fn for_kind(area: &AreaCode, kind: RecordKind, cause: FetchCause) -> Self {
        Self {
            area: area.clone(),
            kind: Some(kind),
            cause,
        }
    }
}

fn kind_suffix(kind: &Option<RecordKind>) -> String {
    kind.map(|k| format!(" ({})", k)).unwrap_or_default()
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MergeError {
    #[error("schema mismatch in {kind} at table {area_index}: expected {expected:?}, found {found:?}")]
    SchemaMismatch {
        kind: RecordKind,
        area_index: usize,
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("invalid table for {kind}: {source}")]
    Table {
        kind: RecordKind,
        #[source]
        source: TableError,
    },
}

#[derive(Error, Debug)]
pub enum LoadCause {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("target table is missing columns {missing:?}")]
    SchemaMismatch { missing: Vec<String> },

    #[error("cancelled before commit")]
    Cancelled,

    #[error("load task failed: {0}")]
    Task(String),
}

#[derive(Error, Debug)]
#[error("append to table '{table}' failed: {cause}")]
pub struct LoadError {
    pub table: String,
    #[source]
    pub cause: LoadCause,
}

impl LoadError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self.cause, LoadCause::Cancelled)
    }

    pub fn new(table: impl Into<String>, cause: impl Into<LoadCause>) -> Self {
        Self {
            table: table.into(),
            cause: cause.into(),
        }
    }
}

/// Stage at which a kind-pipeline failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetched,
    Merged,
    Loaded,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Fetched => "fetch",
            Stage::Merged => "merge",
            Stage::Loaded => "load",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug)]
pub enum KindFailure {
    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error(transparent)]
    Load(#[from] LoadError),

    /// The run was cancelled before this kind committed; nothing was appended
    #[error("cancelled before commit")]
    Cancelled,

    /// The run timeout fired before this kind committed; nothing was appended
    #[error("timed out after {0:?} before commit")]
    TimedOut(Duration),
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("collect stage failed: {0}")]
    Collect(#[from] FetchError),

    #[error("{kind} pipeline failed at {stage} stage: {source}")]
    Kind {
        kind: RecordKind,
        stage: Stage,
        #[source]
        source: KindFailure,
    },

    #[error("run cancelled")]
    Cancelled,

    #[error("run timed out after {0:?}")]
    TimedOut(Duration),
}

impl PipelineError {
    /// The kind-pipeline this error belongs to; `None` for run-wide failures.
    pub fn kind(&self) -> Option<RecordKind> {
        match self {
            PipelineError::Kind { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub fn stage(&self) -> Option<Stage> {
        match self {
            PipelineError::Collect(_) => Some(Stage::Fetched),
            PipelineError::Kind { stage, .. } => Some(*stage),
            PipelineError::Cancelled | PipelineError::TimedOut(_) => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
