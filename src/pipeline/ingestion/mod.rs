// Pipeline ingestion: workbook discovery, data-sheet extraction and data-file tracking

pub mod workbook;

pub use workbook::{datatable_grid, grid_to_csv, read_sheet};

use crate::constants::{AGE_PICK_MARKER, WORKBOOK_EXTENSIONS};
use crate::error::{ImportError, Result};
use crate::gateway::write_cas;
use crate::idempotency::content_hash;
use crate::pipeline::storage::Storage;
use crate::types::DataFile;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

/// A workbook found on disk together with its storage path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    pub path: PathBuf,
    /// Path relative to the scanned root, `/`-separated
    pub storage_path: String,
}

/// Result of tracking one workbook
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// Data sheet extracted and stored
    Extracted(DataFile),
    /// Content already tracked; nothing was re-read
    Known(DataFile),
    /// Tracked without a data table (a convention we do not import)
    Unsupported(DataFile),
}

impl IngestOutcome {
    pub fn data_file(&self) -> &DataFile {
        match self {
            IngestOutcome::Extracted(f) | IngestOutcome::Known(f) | IngestOutcome::Unsupported(f) => f,
        }
    }
}

/// Recursively collect workbook files under `root`, sorted by path.
pub fn discover_files(root: &Path) -> Result<Vec<DiscoveredFile>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(true) {
        let entry = entry.map_err(|e| ImportError::Io(e.into()))?;
        if !entry.file_type().is_file() || !is_workbook(entry.path()) {
            continue;
        }
        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        let storage_path = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        files.push(DiscoveredFile {
            path: entry.path().to_path_buf(),
            storage_path,
        });
    }
    files.sort_by(|a, b| a.path.cmp(&b.path));
    debug!("Discovered {} workbooks under {}", files.len(), root.display());
    Ok(files)
}

fn is_workbook(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            WORKBOOK_EXTENSIONS
                .iter()
                .any(|known| e.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

fn is_age_pick(basename: &str) -> bool {
    basename.contains(AGE_PICK_MARKER)
}

/// Tracks raw workbooks by content hash and extracts their data sheet
pub struct DataFileIngestor {
    storage: Arc<dyn Storage>,
    data_sheet: String,
    cas_root: Option<PathBuf>,
}

impl DataFileIngestor {
    pub fn new(storage: Arc<dyn Storage>, data_sheet: impl Into<String>) -> Self {
        Self {
            storage,
            data_sheet: data_sheet.into(),
            cas_root: None,
        }
    }

    /// Keep a content-addressed copy of every extracted workbook under `root`
    pub fn with_cas_root(mut self, root: Option<PathBuf>) -> Self {
        self.cas_root = root;
        self
    }

    #[instrument(skip(self, file), fields(path = %file.storage_path))]
    pub async fn ingest_file(&self, file: &DiscoveredFile, redo: bool) -> Result<IngestOutcome> {
        let bytes = tokio::fs::read(&file.path).await?;
        let file_hash = content_hash(&bytes);

        let existing = self.storage.get_data_file(&file_hash).await?;
        if let Some(existing) = &existing {
            if !redo {
                debug!("Data file {} already tracked", file_hash);
                if existing.csv_data.is_none() && is_age_pick(&existing.basename) {
                    return Ok(IngestOutcome::Unsupported(existing.clone()));
                }
                return Ok(IngestOutcome::Known(existing.clone()));
            }
        }

        let metadata = tokio::fs::metadata(&file.path).await?;
        let file_mtime: DateTime<Utc> = metadata.modified()?.into();
        let basename = file
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        let csv_data = match read_sheet(&bytes, &self.data_sheet)? {
            Some(grid) => Some(grid_to_csv(&grid)?),
            None if is_age_pick(&basename) => None,
            None => {
                warn!("No '{}' sheet in {}", self.data_sheet, file.storage_path);
                return Err(ImportError::MalformedTable("no data table".to_string()));
            }
        };

        let payload_ref = match &self.cas_root {
            Some(root) => Some(write_cas(root, &bytes).map_err(|e| ImportError::Storage {
                message: format!("CAS write failed: {}", e),
            })?),
            None => None,
        };

        let record = DataFile {
            file_hash,
            file_path: file.storage_path.clone(),
            file_etag: None,
            file_mtime,
            basename,
            payload_ref,
            csv_data,
            imported_at: existing.and_then(|f| f.imported_at),
        };
        self.storage.upsert_data_file(&record).await?;

        if record.csv_data.is_none() {
            info!("Tracked {} without a data table", record.file_path);
            return Ok(IngestOutcome::Unsupported(record));
        }
        info!("Extracted data table from {}", record.file_path);
        Ok(IngestOutcome::Extracted(record))
    }
}
