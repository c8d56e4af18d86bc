mod common;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{spot, write_datatable, DATA_PER_ANALYSIS};
use sparrow_laserchron::pipeline::storage::{SqliteStorage, Storage};
use sparrow_laserchron::types::{Analysis, DataFile, Datum, Project, Sample, Session};
use sparrow_laserchron::{Config, FileOutcome, FileState, ImportError, Pipeline, RunOptions};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::tempdir;
use uuid::Uuid;

fn two_samples(root: &Path) -> Result<()> {
    write_datatable(
        &root.join("Gehrels lab").join("run_20160412.xlsx"),
        &[
            spot("ALC-14 Spot 1", 100.0, 100.0),
            spot("ALC-14 Spot 2", 101.0, 101.0),
            spot("ALC-15 Spot 1", 300.0, 300.0),
            spot("ALC-15 Spot 2", 301.0, 290.0),
        ],
    )
}

async fn count_data(storage: &dyn Storage, session: &Session) -> Result<usize> {
    let mut total = 0;
    for analysis in storage.get_analyses(session.id.unwrap()).await? {
        total += storage.get_data(analysis.id.unwrap()).await?.len();
    }
    Ok(total)
}

#[tokio::test]
async fn test_redo_leaves_one_row_per_key() -> Result<()> {
    let dir = tempdir()?;
    two_samples(&dir.path().join("data"))?;
    let storage = Arc::new(SqliteStorage::open(dir.path().join("store.db"))?);
    let pipeline = Pipeline::new(storage.clone(), &Config::default());

    let first = pipeline
        .run_directory(&dir.path().join("data"), RunOptions::default())
        .await?;
    assert_eq!(first.samples, 2);

    let redo = RunOptions {
        redo: true,
        stop_on_error: false,
    };
    let second = pipeline.run_directory(&dir.path().join("data"), redo).await?;
    assert_eq!(second.files[0].outcome, FileOutcome::Imported { samples: 2 });

    let hash = second.files[0].file_hash.clone().unwrap();
    let sessions = storage.get_sessions_for_file(&hash).await?;
    assert_eq!(sessions.len(), 2);
    for session in &sessions {
        assert_eq!(storage.get_analyses(session.id.unwrap()).await?.len(), 2);
        assert_eq!(count_data(storage.as_ref(), session).await?, 2 * DATA_PER_ANALYSIS);
    }
    assert_eq!(
        sessions[0].date.date(),
        chrono::NaiveDate::from_ymd_opt(2016, 4, 12).unwrap()
    );
    Ok(())
}

#[tokio::test]
async fn test_store_survives_reopen() -> Result<()> {
    let dir = tempdir()?;
    two_samples(&dir.path().join("data"))?;
    let db = dir.path().join("store.db");
    {
        let storage = Arc::new(SqliteStorage::open(&db)?);
        Pipeline::new(storage, &Config::default())
            .run_directory(&dir.path().join("data"), RunOptions::default())
            .await?;
    }

    let storage = Arc::new(SqliteStorage::open(&db)?);
    let pipeline = Pipeline::new(storage.clone(), &Config::default());
    let again = pipeline
        .run_directory(&dir.path().join("data"), RunOptions::default())
        .await?;
    assert_eq!(again.files[0].outcome, FileOutcome::AlreadyImported);
    assert!(storage.get_project_by_name("Gehrels lab").await?.is_some());
    Ok(())
}

/// Delegates to SQLite but rejects datum inserts after a budget is spent
struct FailingStorage {
    inner: SqliteStorage,
    datum_budget: AtomicUsize,
}

#[async_trait]
impl Storage for FailingStorage {
    async fn begin(&self) -> sparrow_laserchron::Result<()> {
        self.inner.begin().await
    }
    async fn commit(&self) -> sparrow_laserchron::Result<()> {
        self.inner.commit().await
    }
    async fn rollback(&self) -> sparrow_laserchron::Result<()> {
        self.inner.rollback().await
    }
    async fn get_data_file(&self, file_hash: &str) -> sparrow_laserchron::Result<Option<DataFile>> {
        self.inner.get_data_file(file_hash).await
    }
    async fn get_data_file_by_basename(
        &self,
        basename: &str,
    ) -> sparrow_laserchron::Result<Option<DataFile>> {
        self.inner.get_data_file_by_basename(basename).await
    }
    async fn upsert_data_file(&self, file: &DataFile) -> sparrow_laserchron::Result<()> {
        self.inner.upsert_data_file(file).await
    }
    async fn list_data_files(&self) -> sparrow_laserchron::Result<Vec<DataFile>> {
        self.inner.list_data_files().await
    }
    async fn mark_imported(&self, file_hash: &str, at: DateTime<Utc>) -> sparrow_laserchron::Result<()> {
        self.inner.mark_imported(file_hash, at).await
    }
    async fn ensure_unit(&self, unit: &str) -> sparrow_laserchron::Result<()> {
        self.inner.ensure_unit(unit).await
    }
    async fn ensure_parameter(&self, id: &str, description: &str) -> sparrow_laserchron::Result<()> {
        self.inner.ensure_parameter(id, description).await
    }
    async fn create_project(&self, project: &mut Project) -> sparrow_laserchron::Result<()> {
        self.inner.create_project(project).await
    }
    async fn get_project_by_name(&self, name: &str) -> sparrow_laserchron::Result<Option<Project>> {
        self.inner.get_project_by_name(name).await
    }
    async fn create_sample(&self, sample: &mut Sample) -> sparrow_laserchron::Result<()> {
        self.inner.create_sample(sample).await
    }
    async fn get_sample_by_name(&self, name: &str) -> sparrow_laserchron::Result<Option<Sample>> {
        self.inner.get_sample_by_name(name).await
    }
    async fn find_session(
        &self,
        data_file: &str,
        sample_id: Option<Uuid>,
    ) -> sparrow_laserchron::Result<Option<Session>> {
        self.inner.find_session(data_file, sample_id).await
    }
    async fn create_session(&self, session: &mut Session) -> sparrow_laserchron::Result<()> {
        self.inner.create_session(session).await
    }
    async fn update_session(&self, session: &Session) -> sparrow_laserchron::Result<()> {
        self.inner.update_session(session).await
    }
    async fn get_sessions_for_file(&self, data_file: &str) -> sparrow_laserchron::Result<Vec<Session>> {
        self.inner.get_sessions_for_file(data_file).await
    }
    async fn find_analysis(
        &self,
        session_id: Uuid,
        analysis_name: Option<&str>,
        session_index: Option<i64>,
    ) -> sparrow_laserchron::Result<Option<Analysis>> {
        self.inner
            .find_analysis(session_id, analysis_name, session_index)
            .await
    }
    async fn create_analysis(&self, analysis: &mut Analysis) -> sparrow_laserchron::Result<()> {
        self.inner.create_analysis(analysis).await
    }
    async fn get_analyses(&self, session_id: Uuid) -> sparrow_laserchron::Result<Vec<Analysis>> {
        self.inner.get_analyses(session_id).await
    }
    async fn find_datum(
        &self,
        analysis_id: Uuid,
        parameter: &str,
    ) -> sparrow_laserchron::Result<Option<Datum>> {
        self.inner.find_datum(analysis_id, parameter).await
    }
    async fn create_datum(&self, datum: &mut Datum) -> sparrow_laserchron::Result<()> {
        let left = self.datum_budget.load(Ordering::SeqCst);
        if left == 0 {
            return Err(ImportError::StorageConstraint(
                "datum rejected by test store".to_string(),
            ));
        }
        self.datum_budget.store(left - 1, Ordering::SeqCst);
        self.inner.create_datum(datum).await
    }
    async fn update_datum(&self, datum: &Datum) -> sparrow_laserchron::Result<()> {
        self.inner.update_datum(datum).await
    }
    async fn get_data(&self, analysis_id: Uuid) -> sparrow_laserchron::Result<Vec<Datum>> {
        self.inner.get_data(analysis_id).await
    }
}

#[tokio::test]
async fn test_constraint_violation_rolls_back_only_that_sample() -> Result<()> {
    let dir = tempdir()?;
    two_samples(&dir.path().join("data"))?;
    let storage = Arc::new(FailingStorage {
        inner: SqliteStorage::open(dir.path().join("store.db"))?,
        // The first sample fits; the second fails partway through its first analysis
        datum_budget: AtomicUsize::new(2 * DATA_PER_ANALYSIS + 3),
    });
    let pipeline = Pipeline::new(storage.clone(), &Config::default());

    let result = pipeline
        .run_directory(&dir.path().join("data"), RunOptions::default())
        .await?;
    match &result.files[0].outcome {
        FileOutcome::Failed { state, error } => {
            assert_eq!(*state, FileState::ImportFailed);
            assert!(error.contains("datum rejected"), "{}", error);
        }
        other => panic!("unexpected outcome {:?}", other),
    }

    let hash = result.files[0].file_hash.clone().unwrap();
    let sessions = storage.get_sessions_for_file(&hash).await?;
    assert_eq!(sessions.len(), 1);
    let kept = storage.get_sample_by_name("ALC-14").await?.unwrap();
    assert_eq!(sessions[0].sample_id, kept.id);
    assert_eq!(
        count_data(storage.as_ref(), &sessions[0]).await?,
        2 * DATA_PER_ANALYSIS
    );
    assert!(storage.get_sample_by_name("ALC-15").await?.is_none());
    assert!(!storage.get_data_file(&hash).await?.unwrap().is_imported());
    Ok(())
}
