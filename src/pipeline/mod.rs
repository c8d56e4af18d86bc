// Data processing pipeline: ingestion, processing, and storage

pub mod ingestion;
pub mod processing;
pub mod storage;

use crate::config::Config;
use crate::error::{ImportError, Result};
use crate::metrics::ImportMetrics;
use crate::types::DataFile;
use ingestion::{discover_files, DataFileIngestor, DiscoveredFile, IngestOutcome};
use processing::catalog::{ImportSettings, LaserchronImporter};
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use storage::Storage;
use tracing::{debug, error, info, instrument, warn};

/// Where a file got to in the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FileState {
    Pending,
    Extracted,
    Decoded,
    Generalized,
    Importing,
    Committed,
    DecodeFailed,
    ImportFailed,
}

impl FileState {
    /// State a failure in this state lands in
    fn failed(self) -> FileState {
        match self {
            FileState::Importing | FileState::Committed => FileState::ImportFailed,
            _ => FileState::DecodeFailed,
        }
    }
}

impl fmt::Display for FileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum FileOutcome {
    Imported { samples: usize },
    AlreadyImported,
    /// Extract-only runs stop once the table is stored
    Tracked,
    Failed { state: FileState, error: String },
}

/// Outcome for one file, identified the way logs identify it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileStatus {
    pub file_path: String,
    pub file_hash: Option<String>,
    pub outcome: FileOutcome,
}

/// Result of a complete pipeline run
#[derive(Debug, Default, Serialize)]
pub struct PipelineResult {
    pub files: Vec<FileStatus>,
    pub imported: usize,
    pub skipped: usize,
    pub tracked: usize,
    pub failed: usize,
    pub samples: usize,
}

impl PipelineResult {
    fn record(&mut self, status: FileStatus) {
        match &status.outcome {
            FileOutcome::Imported { samples } => {
                self.imported += 1;
                self.samples += samples;
            }
            FileOutcome::AlreadyImported => self.skipped += 1,
            FileOutcome::Tracked => self.tracked += 1,
            FileOutcome::Failed { .. } => self.failed += 1,
        }
        self.files.push(status);
    }

    pub fn errors(&self) -> impl Iterator<Item = (&str, &str)> {
        self.files.iter().filter_map(|f| match &f.outcome {
            FileOutcome::Failed { error, .. } => Some((f.file_path.as_str(), error.as_str())),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub redo: bool,
    pub stop_on_error: bool,
}

struct StageError {
    state: FileState,
    error: ImportError,
}

/// Drives files from discovery to committed sessions
pub struct Pipeline {
    storage: Arc<dyn Storage>,
    ingestor: DataFileIngestor,
    importer: LaserchronImporter,
}

impl Pipeline {
    pub fn new(storage: Arc<dyn Storage>, config: &Config) -> Self {
        let ingestor = DataFileIngestor::new(storage.clone(), config.import.data_sheet.clone())
            .with_cas_root(config.storage.cas_root.clone());
        let importer = LaserchronImporter::new(storage.clone(), ImportSettings::from(&config.import));
        Self {
            storage,
            ingestor,
            importer,
        }
    }

    pub fn importer(&self) -> &LaserchronImporter {
        &self.importer
    }

    /// Track and import every workbook under `root`.
    #[instrument(skip(self), fields(root = %root.display()))]
    pub async fn run_directory(&self, root: &Path, options: RunOptions) -> Result<PipelineResult> {
        ImportMetrics::record_run("directory");
        let mut result = PipelineResult::default();
        for file in discover_files(root)? {
            let status = match self.ingest(&file, options.redo).await {
                Ok(record) => {
                    let outcome = self.import_record(&record, options.redo).await;
                    self.finish(&record.file_path, Some(record.file_hash.clone()), outcome)
                }
                Err(err) => self.finish(&file.storage_path, None, Err(err)),
            };
            self.record(&mut result, status, options)?;
        }
        info!(
            "Run finished: {} imported, {} skipped, {} failed",
            result.imported, result.skipped, result.failed
        );
        Ok(result)
    }

    /// Track every workbook under `root` without importing anything.
    #[instrument(skip(self), fields(root = %root.display()))]
    pub async fn extract_directory(&self, root: &Path, options: RunOptions) -> Result<PipelineResult> {
        ImportMetrics::record_run("extract");
        let mut result = PipelineResult::default();
        for file in discover_files(root)? {
            let status = match self.ingest(&file, options.redo).await {
                Ok(record) => self.finish(&record.file_path, Some(record.file_hash), Ok(FileOutcome::Tracked)),
                Err(err) => self.finish(&file.storage_path, None, Err(err)),
            };
            self.record(&mut result, status, options)?;
        }
        info!("Extraction finished: {} tracked, {} failed", result.tracked, result.failed);
        Ok(result)
    }

    /// Import files that are already tracked.
    ///
    /// With no basenames every tracked file is considered. Naming files
    /// always re-imports them.
    #[instrument(skip(self, basenames))]
    pub async fn import_tracked(
        &self,
        basenames: &[String],
        options: RunOptions,
    ) -> Result<PipelineResult> {
        ImportMetrics::record_run("tracked");
        let mut result = PipelineResult::default();

        let (files, redo) = if basenames.is_empty() {
            (self.storage.list_data_files().await?, options.redo)
        } else {
            let mut files = Vec::new();
            for basename in basenames {
                match self.storage.get_data_file_by_basename(basename).await? {
                    Some(file) => files.push(file),
                    None => {
                        let err = ImportError::MalformedTable(format!(
                            "no tracked data file named {}",
                            basename
                        ));
                        let status = self.finish(
                            basename,
                            None,
                            Err(StageError {
                                state: FileState::Pending.failed(),
                                error: err,
                            }),
                        );
                        self.record(&mut result, status, options)?;
                    }
                }
            }
            (files, true)
        };

        for file in files {
            let outcome = self.import_record(&file, redo).await;
            let status = self.finish(&file.file_path, Some(file.file_hash.clone()), outcome);
            self.record(&mut result, status, options)?;
        }
        Ok(result)
    }

    /// Stored CSV form of a tracked file's data table
    pub async fn datatable_csv(&self, basename: &str) -> Result<Option<String>> {
        let file = self.storage.get_data_file_by_basename(basename).await?;
        Ok(file.and_then(|f| f.csv_data))
    }

    async fn ingest(&self, file: &DiscoveredFile, redo: bool) -> std::result::Result<DataFile, StageError> {
        let failed = |error: ImportError| StageError {
            state: FileState::Pending.failed(),
            error,
        };
        match self.ingestor.ingest_file(file, redo).await.map_err(failed)? {
            IngestOutcome::Extracted(record) | IngestOutcome::Known(record) => Ok(record),
            IngestOutcome::Unsupported(record) => Err(failed(ImportError::UnsupportedFormat(
                format!("{} has no data table", record.basename),
            ))),
        }
    }

    /// Move one tracked file through decode, generalize and import.
    async fn import_record(
        &self,
        file: &DataFile,
        redo: bool,
    ) -> std::result::Result<FileOutcome, StageError> {
        if !redo && file.is_imported() {
            debug!("{} already imported", file.file_path);
            return Ok(FileOutcome::AlreadyImported);
        }

        let started = Instant::now();
        let mut state = FileState::Extracted;
        let fail = |state: FileState| {
            move |error: ImportError| StageError {
                state: state.failed(),
                error,
            }
        };

        let decoded = self.importer.decode(file).map_err(fail(state))?;
        state = advance(file, state, FileState::Decoded);

        let table = self.importer.generalize(decoded).map_err(fail(state))?;
        state = advance(file, state, FileState::Generalized);

        state = advance(file, state, FileState::Importing);
        let reports = self
            .importer
            .import_table(file, &table)
            .await
            .map_err(fail(state))?;
        advance(file, state, FileState::Committed);
        ImportMetrics::record_import_duration(started.elapsed().as_secs_f64());

        Ok(FileOutcome::Imported {
            samples: reports.len(),
        })
    }

    fn finish(
        &self,
        file_path: &str,
        file_hash: Option<String>,
        outcome: std::result::Result<FileOutcome, StageError>,
    ) -> (FileStatus, Option<ImportError>) {
        match outcome {
            Ok(outcome) => (
                FileStatus {
                    file_path: file_path.to_string(),
                    file_hash,
                    outcome,
                },
                None,
            ),
            Err(StageError { state, error }) => {
                if error.is_recoverable() {
                    warn!(file = file_path, %state, "Import failed: {}", error);
                } else {
                    error!(file = file_path, %state, "Import failed: {}", error);
                }
                (
                    FileStatus {
                        file_path: file_path.to_string(),
                        file_hash,
                        outcome: FileOutcome::Failed {
                            state,
                            error: error.to_string(),
                        },
                    },
                    Some(error),
                )
            }
        }
    }

    fn record(
        &self,
        result: &mut PipelineResult,
        (status, error): (FileStatus, Option<ImportError>),
        options: RunOptions,
    ) -> Result<()> {
        ImportMetrics::record_outcome(&status.outcome);
        result.record(status);
        match error {
            Some(err) if options.stop_on_error => Err(err),
            _ => Ok(()),
        }
    }
}

fn advance(file: &DataFile, from: FileState, to: FileState) -> FileState {
    debug!(file = %file.file_path, "{} -> {}", from, to);
    to
}
