// Persistence port for imported LaserChron records

pub mod in_memory;
pub mod sqlite;

pub use in_memory::InMemoryStorage;
pub use sqlite::SqliteStorage;

use crate::error::Result;
use crate::types::{Analysis, DataFile, Datum, Project, Sample, Session};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Storage trait for data files and the records imported from them.
///
/// Writes between `begin` and `commit` form one unit; `rollback` discards
/// every write since `begin`. Scopes do not nest.
#[async_trait]
pub trait Storage: Send + Sync {
    // Transactional scope
    async fn begin(&self) -> Result<()>;
    async fn commit(&self) -> Result<()>;
    async fn rollback(&self) -> Result<()>;

    // Data file operations
    async fn get_data_file(&self, file_hash: &str) -> Result<Option<DataFile>>;
    async fn get_data_file_by_basename(&self, basename: &str) -> Result<Option<DataFile>>;
    async fn upsert_data_file(&self, file: &DataFile) -> Result<()>;
    async fn list_data_files(&self) -> Result<Vec<DataFile>>;
    async fn mark_imported(&self, file_hash: &str, at: DateTime<Utc>) -> Result<()>;

    // Vocabulary
    async fn ensure_unit(&self, unit: &str) -> Result<()>;
    async fn ensure_parameter(&self, id: &str, description: &str) -> Result<()>;

    // Project / sample operations
    async fn create_project(&self, project: &mut Project) -> Result<()>;
    async fn get_project_by_name(&self, name: &str) -> Result<Option<Project>>;
    async fn create_sample(&self, sample: &mut Sample) -> Result<()>;
    async fn get_sample_by_name(&self, name: &str) -> Result<Option<Sample>>;

    // Session operations
    async fn find_session(&self, data_file: &str, sample_id: Option<Uuid>)
        -> Result<Option<Session>>;
    async fn create_session(&self, session: &mut Session) -> Result<()>;
    async fn update_session(&self, session: &Session) -> Result<()>;
    async fn get_sessions_for_file(&self, data_file: &str) -> Result<Vec<Session>>;

    // Analysis operations
    async fn find_analysis(
        &self,
        session_id: Uuid,
        analysis_name: Option<&str>,
        session_index: Option<i64>,
    ) -> Result<Option<Analysis>>;
    async fn create_analysis(&self, analysis: &mut Analysis) -> Result<()>;
    async fn get_analyses(&self, session_id: Uuid) -> Result<Vec<Analysis>>;

    // Datum operations
    async fn find_datum(&self, analysis_id: Uuid, parameter: &str) -> Result<Option<Datum>>;
    async fn create_datum(&self, datum: &mut Datum) -> Result<()>;
    async fn update_datum(&self, datum: &Datum) -> Result<()>;
    async fn get_data(&self, analysis_id: Uuid) -> Result<Vec<Datum>>;
}
