use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A raw workbook tracked by content hash, with its extracted data table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataFile {
    pub file_hash: String,
    pub file_path: String,
    pub file_etag: Option<String>,
    pub file_mtime: DateTime<Utc>,
    pub basename: String,
    /// Content-addressed copy of the raw bytes, when one was written
    pub payload_ref: Option<String>,
    /// Data sheet serialized as CSV; `None` for tracked-but-unsupported files
    pub csv_data: Option<String>,
    pub imported_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: Option<Uuid>,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub id: Option<Uuid>,
    pub name: String,
}

/// One (file, sample) measurement batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Option<Uuid>,
    pub data_file: String,
    pub project_id: Uuid,
    pub sample_id: Option<Uuid>,
    pub date: NaiveDateTime,
}

/// One spot measurement within a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub id: Option<Uuid>,
    pub session_id: Uuid,
    pub analysis_name: Option<String>,
    pub session_index: Option<i64>,
}

/// One measured parameter value attached to an analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Datum {
    pub id: Option<Uuid>,
    pub analysis_id: Uuid,
    pub parameter: String,
    pub value: f64,
    pub unit: Option<String>,
    pub error: Option<f64>,
    pub error_unit: Option<String>,
    pub error_metric: String,
    pub is_interpreted: bool,
    pub is_accepted: Option<bool>,
}

impl Project {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
        }
    }
}

impl Sample {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
        }
    }
}

impl DataFile {
    /// Whether a previous run committed every sample of this file
    pub fn is_imported(&self) -> bool {
        self.imported_at.is_some()
    }
}
