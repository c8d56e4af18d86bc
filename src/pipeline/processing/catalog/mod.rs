//! Writing generalized LaserChron tables into storage.
//!
//! One data file yields one session per distinct sample name. Each session
//! is written inside its own transactional scope, so a failing sample leaves
//! no partial rows behind while earlier samples of the same file stay put.

pub mod dates;
pub mod mapper;

pub use dates::{extract_datetime, infer_project_name};
pub use mapper::{allclose, DatumMapper, MappedDatum};

use crate::config::ImportConfig;
use crate::constants::NUPM_MON_MARKER;
use crate::error::{ImportError, Result};
use crate::pipeline::ingestion::datatable_grid;
use crate::pipeline::processing::decode::{decode_table, DecodeOptions};
use crate::pipeline::processing::normalize::{
    GeneralizeOptions, GeneralizedRow, GeneralizedTable, SampleGeneralizer, SuffixRules,
};
use crate::pipeline::processing::table::DecodedTable;
use crate::pipeline::storage::Storage;
use crate::types::{Analysis, DataFile, Project, Sample, Session};
use chrono::{NaiveDateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Settings that shape how a table is decoded and written
#[derive(Debug, Clone)]
pub struct ImportSettings {
    pub decode: DecodeOptions,
    pub generalize: GeneralizeOptions,
    pub trust_file_times: bool,
    pub default_project: String,
    pub error_metric: String,
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self::from(&ImportConfig::default())
    }
}

impl From<&ImportConfig> for ImportSettings {
    fn from(config: &ImportConfig) -> Self {
        Self {
            decode: DecodeOptions {
                expected_columns: config.expected_columns,
            },
            generalize: GeneralizeOptions::from(config),
            trust_file_times: config.trust_file_times,
            default_project: config.default_project.clone(),
            error_metric: config.error_metric.clone(),
        }
    }
}

/// What one committed sample session contained
#[derive(Debug, Clone, PartialEq)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub sample_name: Option<String>,
    pub analyses: usize,
    pub data: usize,
}

/// Samples found in one tracked file, without anything being written
#[derive(Debug, Clone, PartialEq)]
pub struct FileSamples {
    pub basename: String,
    pub file_path: String,
    pub samples: Vec<SampleGroup>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SampleGroup {
    pub name: Option<String>,
    pub labels: Vec<String>,
}

/// Imports decoded LaserChron data tables into storage
pub struct LaserchronImporter {
    storage: Arc<dyn Storage>,
    settings: ImportSettings,
    generalizer: SampleGeneralizer,
}

impl LaserchronImporter {
    pub fn new(storage: Arc<dyn Storage>, settings: ImportSettings) -> Self {
        let generalizer = SampleGeneralizer::new(SuffixRules::default(), settings.generalize);
        Self {
            storage,
            settings,
            generalizer,
        }
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Reject files we recognize but cannot import, then decode the stored table.
    #[instrument(skip(self, file), fields(file = %file.file_path))]
    pub fn decode(&self, file: &DataFile) -> Result<DecodedTable> {
        if file.basename.contains(NUPM_MON_MARKER) {
            return Err(ImportError::UnsupportedFormat(
                "NUPM-MON files are not handled yet".to_string(),
            ));
        }
        let csv_data = file
            .csv_data
            .as_deref()
            .ok_or_else(|| ImportError::MalformedTable("table data not extracted".to_string()))?;
        let grid = datatable_grid(csv_data)?;
        decode_table(&grid, self.settings.decode)
    }

    pub fn generalize(&self, table: DecodedTable) -> Result<GeneralizedTable> {
        self.generalizer.generalize(table)
    }

    /// Decode, generalize and write every sample of a data file, then stamp it
    /// as imported.
    pub async fn import_data_file(&self, file: &DataFile) -> Result<Vec<SessionReport>> {
        let decoded = self.decode(file)?;
        let table = self.generalize(decoded)?;
        self.import_table(file, &table).await
    }

    /// Write every sample of an already generalized table.
    ///
    /// Fails at the first sample that cannot be written; samples before it
    /// stay committed and the file is not stamped.
    #[instrument(skip(self, file, table), fields(file = %file.file_path))]
    pub async fn import_table(
        &self,
        file: &DataFile,
        table: &GeneralizedTable,
    ) -> Result<Vec<SessionReport>> {
        let mut reports = Vec::new();
        for sample_name in table.sample_names() {
            let report = self.import_session(file, table, sample_name.as_deref()).await?;
            reports.push(report);
        }
        self.storage
            .mark_imported(&file.file_hash, Utc::now())
            .await?;
        info!(
            "Imported {} with {} sample sessions",
            file.file_path,
            reports.len()
        );
        Ok(reports)
    }

    /// Write one sample's rows as a session inside its own transaction.
    pub async fn import_session(
        &self,
        file: &DataFile,
        table: &GeneralizedTable,
        sample_name: Option<&str>,
    ) -> Result<SessionReport> {
        self.storage.begin().await?;
        match self.write_session(file, table, sample_name).await {
            Ok(report) => {
                self.storage.commit().await?;
                Ok(report)
            }
            Err(err) => {
                if let Err(rollback_err) = self.storage.rollback().await {
                    warn!("Rollback failed: {}", rollback_err);
                }
                warn!(
                    sample = sample_name.unwrap_or("<spots only>"),
                    "Sample import rolled back: {}", err
                );
                Err(err)
            }
        }
    }

    /// Date for a data file's sessions: a date in the path, then (if trusted)
    /// the file's modification time, then the unknown-date sentinel.
    pub fn session_date(&self, file: &DataFile) -> NaiveDateTime {
        if let Some(date) = extract_datetime(&file.file_path) {
            return date;
        }
        if self.settings.trust_file_times {
            return file.file_mtime.naive_utc();
        }
        dates::unknown_date()
    }

    async fn project(&self, name: &str) -> Result<Project> {
        if let Some(project) = self.storage.get_project_by_name(name).await? {
            return Ok(project);
        }
        let mut project = Project::new(name);
        self.storage.create_project(&mut project).await?;
        info!("Created new project: {}", name);
        Ok(project)
    }

    async fn sample(&self, name: &str) -> Result<Sample> {
        if let Some(sample) = self.storage.get_sample_by_name(name).await? {
            return Ok(sample);
        }
        let mut sample = Sample::new(name);
        self.storage.create_sample(&mut sample).await?;
        debug!("Created new sample: {}", name);
        Ok(sample)
    }

    async fn write_session(
        &self,
        file: &DataFile,
        table: &GeneralizedTable,
        sample_name: Option<&str>,
    ) -> Result<SessionReport> {
        let project_name = infer_project_name(&file.file_path)
            .unwrap_or_else(|| self.settings.default_project.clone());
        let project = self.project(&project_name).await?;
        let project_id = project.id.ok_or_else(|| ImportError::Storage {
            message: format!("project {} has no id", project.name),
        })?;

        let date = self.session_date(file);

        let sample_id = match sample_name {
            Some(name) => self.sample(name).await?.id,
            None => None,
        };

        let session = match self.storage.find_session(&file.file_hash, sample_id).await? {
            Some(mut existing) => {
                // Project and date always follow the file, even if edited since
                warn!(
                    "Existing session {:?} found for {}; overwriting project and date",
                    existing.id, file.file_path
                );
                existing.project_id = project_id;
                existing.date = date;
                self.storage.update_session(&existing).await?;
                existing
            }
            None => {
                let mut session = Session {
                    id: None,
                    data_file: file.file_hash.clone(),
                    project_id,
                    sample_id,
                    date,
                };
                self.storage.create_session(&mut session).await?;
                session
            }
        };
        let session_id = session.id.ok_or_else(|| ImportError::Storage {
            message: "session has no id".to_string(),
        })?;

        let rows = dedupe_rows(table.rows_for_sample(sample_name));
        if rows.duplicates > 0 {
            warn!(
                "Duplicate analyses found for sample {}: {} dropped",
                sample_name.unwrap_or("<spots only>"),
                rows.duplicates
            );
        }

        let mapper = DatumMapper::new(table, &self.settings.error_metric);
        let mut data = 0;
        for row in &rows.kept {
            data += self.write_analysis(&mapper, row, session_id).await?;
        }

        Ok(SessionReport {
            session_id,
            sample_name: sample_name.map(str::to_string),
            analyses: rows.kept.len(),
            data,
        })
    }

    async fn write_analysis(
        &self,
        mapper: &DatumMapper<'_>,
        row: &GeneralizedRow,
        session_id: Uuid,
    ) -> Result<usize> {
        let key = &row.key;
        let analysis = match self
            .storage
            .find_analysis(session_id, key.analysis_name.as_deref(), key.session_index)
            .await?
        {
            Some(analysis) => analysis,
            None => {
                let mut analysis = Analysis {
                    id: None,
                    session_id,
                    analysis_name: key.analysis_name.clone(),
                    session_index: key.session_index,
                };
                self.storage.create_analysis(&mut analysis).await?;
                analysis
            }
        };
        let analysis_id = analysis.id.ok_or_else(|| ImportError::Storage {
            message: "analysis has no id".to_string(),
        })?;

        let mapped = mapper.map_row(row, analysis_id);
        let count = mapped.len();
        for MappedDatum { mut datum, description } in mapped {
            for unit in [&datum.unit, &datum.error_unit].into_iter().flatten() {
                self.storage.ensure_unit(unit).await?;
            }
            self.storage
                .ensure_parameter(&datum.parameter, &description)
                .await?;

            match self.storage.find_datum(analysis_id, &datum.parameter).await? {
                Some(existing) => {
                    datum.id = existing.id;
                    self.storage.update_datum(&datum).await?;
                }
                None => self.storage.create_datum(&mut datum).await?,
            }
        }
        Ok(count)
    }

    /// Decode and generalize every tracked table and report its samples.
    pub async fn list_samples(&self) -> Result<Vec<FileSamples>> {
        let mut out = Vec::new();
        for file in self.storage.list_data_files().await? {
            if file.csv_data.is_none() {
                continue;
            }
            let result = self.decode(&file).and_then(|t| self.generalize(t));
            let (samples, error) = match result {
                Ok(table) => {
                    let samples = table
                        .sample_names()
                        .into_iter()
                        .map(|name| {
                            let labels = table
                                .rows_for_sample(name.as_deref())
                                .map(|r| r.analysis.clone())
                                .collect();
                            SampleGroup { name, labels }
                        })
                        .collect();
                    (samples, None)
                }
                Err(err) => {
                    warn!("Could not list samples for {}: {}", file.file_path, err);
                    (Vec::new(), Some(err.to_string()))
                }
            };
            out.push(FileSamples {
                basename: file.basename,
                file_path: file.file_path,
                samples,
                error,
            });
        }
        Ok(out)
    }
}

struct DedupedRows<'a> {
    kept: Vec<&'a GeneralizedRow>,
    duplicates: usize,
}

/// Drop rows that would land on an analysis already seen in this sample;
/// the first occurrence wins. Rows without an analysis name are keyed by
/// their label.
fn dedupe_rows<'a>(rows: impl Iterator<Item = &'a GeneralizedRow>) -> DedupedRows<'a> {
    let mut seen = HashSet::new();
    let mut kept = Vec::new();
    let mut duplicates = 0;
    for row in rows {
        let key = match &row.key.analysis_name {
            Some(name) => (name.as_str(), row.key.session_index),
            None => (row.analysis.as_str(), None),
        };
        if seen.insert(key) {
            kept.push(row);
        } else {
            duplicates += 1;
        }
    }
    DedupedRows { kept, duplicates }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::processing::normalize::AnalysisKey;
    use crate::pipeline::processing::table::{Cell, ColumnKind, ColumnMeta, MetaFrame};
    use crate::pipeline::storage::InMemoryStorage;
    use chrono::{DateTime, NaiveDate};

    fn data_file(path: &str) -> DataFile {
        DataFile {
            file_hash: "f00d".to_string(),
            file_path: path.to_string(),
            file_etag: None,
            file_mtime: DateTime::parse_from_rfc3339("2020-02-03T04:05:06Z")
                .unwrap()
                .with_timezone(&Utc),
            basename: "run".to_string(),
            payload_ref: None,
            csv_data: None,
            imported_at: None,
        }
    }

    fn row(sample: Option<&str>, label: &str, index: i64, age: f64) -> GeneralizedRow {
        GeneralizedRow {
            key: AnalysisKey {
                sample_name: sample.map(str::to_string),
                analysis_name: Some(format!("Spot {}", index)),
                session_index: Some(index),
            },
            analysis: label.to_string(),
            values: vec![Cell::Number(age), Cell::Number(age)],
        }
    }

    fn table(rows: Vec<GeneralizedRow>) -> GeneralizedTable {
        let column = |key: &str| ColumnMeta {
            key: key.to_string(),
            description: key.to_string(),
            unit: Some("Ma".to_string()),
            kind: ColumnKind::Numeric,
        };
        GeneralizedTable {
            meta: MetaFrame::new(vec![column("age_206Pb_238U"), column("best_age")]),
            rows,
        }
    }

    #[test]
    fn test_session_date_precedence() {
        let importer = LaserchronImporter::new(
            Arc::new(InMemoryStorage::new()),
            ImportSettings::default(),
        );
        let dated = data_file("proj/2019-03-14 run.xlsx");
        assert_eq!(
            importer.session_date(&dated),
            NaiveDate::from_ymd_opt(2019, 3, 14)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap()
        );
        assert_eq!(importer.session_date(&data_file("proj/run.xlsx")), dates::unknown_date());

        let trusting = LaserchronImporter::new(
            Arc::new(InMemoryStorage::new()),
            ImportSettings {
                trust_file_times: true,
                ..ImportSettings::default()
            },
        );
        assert_eq!(
            trusting.session_date(&data_file("proj/run.xlsx")),
            NaiveDate::from_ymd_opt(2020, 2, 3)
                .unwrap()
                .and_hms_opt(4, 5, 6)
                .unwrap()
        );
        assert_eq!(
            trusting.session_date(&dated).date(),
            NaiveDate::from_ymd_opt(2019, 3, 14).unwrap()
        );
    }

    #[test]
    fn test_nupm_mon_and_missing_table_are_rejected() {
        let importer = LaserchronImporter::new(
            Arc::new(InMemoryStorage::new()),
            ImportSettings::default(),
        );
        let mut file = data_file("proj/run.xlsx");
        assert!(matches!(
            importer.decode(&file),
            Err(ImportError::MalformedTable(_))
        ));
        file.basename = "NUPM-MON 2019".to_string();
        file.csv_data = Some("a\n".to_string());
        assert!(matches!(
            importer.decode(&file),
            Err(ImportError::UnsupportedFormat(_))
        ));
    }

    #[tokio::test]
    async fn test_import_table_writes_sessions_and_stamps_file() {
        let storage = Arc::new(InMemoryStorage::new());
        let file = data_file("Gehrels/run.xlsx");
        storage.upsert_data_file(&file).await.unwrap();
        let importer = LaserchronImporter::new(storage.clone(), ImportSettings::default());

        let t = table(vec![
            row(Some("ALC-14"), "ALC-14 Spot 1", 1, 100.0),
            row(None, "Spot 9", 9, 50.0),
            row(Some("ALC-14"), "ALC-14 Spot 2", 2, 101.0),
            row(Some("ALC-14"), "ALC-14 Spot 1", 1, 999.0),
        ]);
        let reports = importer.import_table(&file, &t).await.unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].sample_name.as_deref(), Some("ALC-14"));
        assert_eq!(reports[0].analyses, 2);
        assert_eq!(reports[1].sample_name, None);

        let sessions = storage.get_sessions_for_file("f00d").await.unwrap();
        assert_eq!(sessions.len(), 2);
        assert!(sessions[1].sample_id.is_none());
        let project = storage.get_project_by_name("Gehrels").await.unwrap().unwrap();
        assert_eq!(sessions[0].project_id, project.id.unwrap());

        // The duplicate label keeps its first values
        let analyses = storage.get_analyses(reports[0].session_id).await.unwrap();
        let data = storage.get_data(analyses[0].id.unwrap()).await.unwrap();
        assert_eq!(data.len(), 1);
        assert_eq!(data[0].value, 100.0);
        assert_eq!(data[0].is_accepted, Some(true));

        let stamped = storage.get_data_file("f00d").await.unwrap().unwrap();
        assert!(stamped.is_imported());
    }

    #[tokio::test]
    async fn test_reimport_updates_in_place() {
        let storage = Arc::new(InMemoryStorage::new());
        let file = data_file("Gehrels/run.xlsx");
        storage.upsert_data_file(&file).await.unwrap();
        let importer = LaserchronImporter::new(storage.clone(), ImportSettings::default());

        importer
            .import_table(&file, &table(vec![row(Some("A-1"), "A-1 Spot 1", 1, 10.0)]))
            .await
            .unwrap();
        let reports = importer
            .import_table(&file, &table(vec![row(Some("A-1"), "A-1 Spot 1", 1, 12.0)]))
            .await
            .unwrap();

        let sessions = storage.get_sessions_for_file("f00d").await.unwrap();
        assert_eq!(sessions.len(), 1);
        let analyses = storage.get_analyses(reports[0].session_id).await.unwrap();
        assert_eq!(analyses.len(), 1);
        let data = storage.get_data(analyses[0].id.unwrap()).await.unwrap();
        assert_eq!(data.len(), 1);
        assert_eq!(data[0].value, 12.0);
    }

    #[tokio::test]
    async fn test_failed_sample_is_rolled_back() {
        let storage = Arc::new(InMemoryStorage::new());
        // Not tracked: creating the session violates the data-file reference
        let file = data_file("Gehrels/run.xlsx");
        let importer = LaserchronImporter::new(storage.clone(), ImportSettings::default());

        let result = importer
            .import_table(&file, &table(vec![row(Some("A-1"), "A-1 Spot 1", 1, 10.0)]))
            .await;
        assert!(matches!(result, Err(ImportError::StorageConstraint(_))));
        assert!(storage.get_project_by_name("Gehrels").await.unwrap().is_none());
        assert!(storage.get_sample_by_name("A-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_labels_sharing_an_analysis_name_keep_the_first_row() {
        let storage = Arc::new(InMemoryStorage::new());
        let file = data_file("Gehrels/run.xlsx");
        storage.upsert_data_file(&file).await.unwrap();
        let importer = LaserchronImporter::new(storage.clone(), ImportSettings::default());

        let t = table(vec![
            row(Some("ALC-14"), "ALC-14 Spot 1", 1, 100.0),
            row(Some("ALC-14"), "ALC-14 Spot 2", 2, 101.0),
            row(Some("ALC-14"), "ALC-14_Spot 1", 1, 200.0),
        ]);
        let reports = importer.import_table(&file, &t).await.unwrap();
        assert_eq!(reports[0].analyses, 2);

        let analyses = storage.get_analyses(reports[0].session_id).await.unwrap();
        assert_eq!(analyses.len(), 2);
        let data = storage.get_data(analyses[0].id.unwrap()).await.unwrap();
        assert_eq!(data[0].value, 100.0);
    }

    #[test]
    fn test_unnamed_rows_dedupe_by_label() {
        let unnamed = |label: &str| GeneralizedRow {
            key: AnalysisKey {
                sample_name: Some(label.to_string()),
                analysis_name: None,
                session_index: None,
            },
            analysis: label.to_string(),
            values: vec![],
        };
        let rows = vec![unnamed("R33-1"), unnamed("R33-2"), unnamed("R33-1")];
        let deduped = dedupe_rows(rows.iter());
        assert_eq!(deduped.kept.len(), 2);
        assert_eq!(deduped.duplicates, 1);
    }

    #[test]
    fn test_dedupe_rows_keeps_first() {
        let rows = vec![
            row(Some("A"), "A 1", 1, 1.0),
            row(Some("A"), "A 1", 1, 2.0),
            row(Some("A"), "A 2", 2, 3.0),
        ];
        let deduped = dedupe_rows(rows.iter());
        assert_eq!(deduped.kept.len(), 2);
        assert_eq!(deduped.duplicates, 1);
        assert_eq!(deduped.kept[0].values[0], Cell::Number(1.0));
    }
}
