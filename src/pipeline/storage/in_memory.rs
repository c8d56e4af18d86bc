use super::Storage;
use crate::error::{ImportError, Result};
use crate::types::{Analysis, DataFile, Datum, Project, Sample, Session};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
struct MemoryState {
    data_files: BTreeMap<String, DataFile>,
    units: BTreeSet<String>,
    parameters: BTreeMap<String, String>,
    projects: HashMap<Uuid, Project>,
    samples: HashMap<Uuid, Sample>,
    sessions: HashMap<Uuid, Session>,
    analyses: HashMap<Uuid, Analysis>,
    data: HashMap<Uuid, Datum>,
    // Insertion order, so listings are stable
    session_order: Vec<Uuid>,
    analysis_order: Vec<Uuid>,
    datum_order: Vec<Uuid>,
}

/// In-memory storage implementation for development/testing.
///
/// Enforces the same uniqueness and reference constraints as the SQLite
/// schema; `rollback` restores the snapshot taken at `begin`.
pub struct InMemoryStorage {
    state: Arc<Mutex<MemoryState>>,
    snapshot: Arc<Mutex<Option<MemoryState>>>,
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            snapshot: Arc::new(Mutex::new(None)),
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>> {
        lock(&self.state)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex.lock().map_err(|e| ImportError::Storage {
        message: format!("storage lock poisoned: {}", e),
    })
}

fn constraint(message: impl Into<String>) -> ImportError {
    ImportError::StorageConstraint(message.into())
}

fn missing_id(what: &str) -> ImportError {
    ImportError::Storage {
        message: format!("Cannot update {} without ID", what),
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn begin(&self) -> Result<()> {
        let state = self.state()?.clone();
        let mut snapshot = lock(&self.snapshot)?;
        if snapshot.is_some() {
            return Err(ImportError::Storage {
                message: "transaction already open".to_string(),
            });
        }
        *snapshot = Some(state);
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        lock(&self.snapshot)?.take();
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        if let Some(saved) = lock(&self.snapshot)?.take() {
            *self.state()? = saved;
            debug!("Rolled back in-memory transaction");
        }
        Ok(())
    }

    async fn get_data_file(&self, file_hash: &str) -> Result<Option<DataFile>> {
        Ok(self.state()?.data_files.get(file_hash).cloned())
    }

    async fn get_data_file_by_basename(&self, basename: &str) -> Result<Option<DataFile>> {
        let state = self.state()?;
        let file = state
            .data_files
            .values()
            .filter(|f| f.basename == basename)
            .min_by(|a, b| a.file_path.cmp(&b.file_path))
            .cloned();
        Ok(file)
    }

    async fn upsert_data_file(&self, file: &DataFile) -> Result<()> {
        let mut state = self.state()?;
        state
            .data_files
            .insert(file.file_hash.clone(), file.clone());
        debug!("Upserted data file: {} ({})", file.file_path, file.file_hash);
        Ok(())
    }

    async fn list_data_files(&self) -> Result<Vec<DataFile>> {
        let state = self.state()?;
        let mut files: Vec<DataFile> = state.data_files.values().cloned().collect();
        files.sort_by(|a, b| a.file_path.cmp(&b.file_path));
        Ok(files)
    }

    async fn mark_imported(&self, file_hash: &str, at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state()?;
        let file = state
            .data_files
            .get_mut(file_hash)
            .ok_or_else(|| constraint(format!("unknown data file {}", file_hash)))?;
        file.imported_at = Some(at);
        Ok(())
    }

    async fn ensure_unit(&self, unit: &str) -> Result<()> {
        self.state()?.units.insert(unit.to_string());
        Ok(())
    }

    async fn ensure_parameter(&self, id: &str, description: &str) -> Result<()> {
        self.state()?
            .parameters
            .entry(id.to_string())
            .or_insert_with(|| description.to_string());
        Ok(())
    }

    async fn create_project(&self, project: &mut Project) -> Result<()> {
        let mut state = self.state()?;
        if state.projects.values().any(|p| p.name == project.name) {
            return Err(constraint(format!("duplicate project name {}", project.name)));
        }
        let id = Uuid::new_v4();
        project.id = Some(id);
        state.projects.insert(id, project.clone());

        debug!("Created project: {} with id {}", project.name, id);
        Ok(())
    }

    async fn get_project_by_name(&self, name: &str) -> Result<Option<Project>> {
        let state = self.state()?;
        let project = state.projects.values().find(|p| p.name == name).cloned();
        Ok(project)
    }

    async fn create_sample(&self, sample: &mut Sample) -> Result<()> {
        let mut state = self.state()?;
        if state.samples.values().any(|s| s.name == sample.name) {
            return Err(constraint(format!("duplicate sample name {}", sample.name)));
        }
        let id = Uuid::new_v4();
        sample.id = Some(id);
        state.samples.insert(id, sample.clone());

        debug!("Created sample: {} with id {}", sample.name, id);
        Ok(())
    }

    async fn get_sample_by_name(&self, name: &str) -> Result<Option<Sample>> {
        let state = self.state()?;
        let sample = state.samples.values().find(|s| s.name == name).cloned();
        Ok(sample)
    }

    async fn find_session(
        &self,
        data_file: &str,
        sample_id: Option<Uuid>,
    ) -> Result<Option<Session>> {
        let state = self.state()?;
        let session = state
            .session_order
            .iter()
            .filter_map(|id| state.sessions.get(id))
            .find(|s| s.data_file == data_file && s.sample_id == sample_id)
            .cloned();
        Ok(session)
    }

    async fn create_session(&self, session: &mut Session) -> Result<()> {
        let mut state = self.state()?;
        if !state.data_files.contains_key(&session.data_file) {
            return Err(constraint(format!("unknown data file {}", session.data_file)));
        }
        if !state.projects.contains_key(&session.project_id) {
            return Err(constraint(format!("unknown project {}", session.project_id)));
        }
        if let Some(sample_id) = session.sample_id {
            if !state.samples.contains_key(&sample_id) {
                return Err(constraint(format!("unknown sample {}", sample_id)));
            }
        }
        let id = Uuid::new_v4();
        session.id = Some(id);
        state.sessions.insert(id, session.clone());
        state.session_order.push(id);

        debug!("Created session for {} with id {}", session.data_file, id);
        Ok(())
    }

    async fn update_session(&self, session: &Session) -> Result<()> {
        let id = session.id.ok_or_else(|| missing_id("session"))?;
        let mut state = self.state()?;
        if !state.projects.contains_key(&session.project_id) {
            return Err(constraint(format!("unknown project {}", session.project_id)));
        }
        state.sessions.insert(id, session.clone());

        debug!("Updated session with id {}", id);
        Ok(())
    }

    async fn get_sessions_for_file(&self, data_file: &str) -> Result<Vec<Session>> {
        let state = self.state()?;
        let sessions = state
            .session_order
            .iter()
            .filter_map(|id| state.sessions.get(id))
            .filter(|s| s.data_file == data_file)
            .cloned()
            .collect();
        Ok(sessions)
    }

    async fn find_analysis(
        &self,
        session_id: Uuid,
        analysis_name: Option<&str>,
        session_index: Option<i64>,
    ) -> Result<Option<Analysis>> {
        let state = self.state()?;
        let analysis = state
            .analyses
            .values()
            .find(|a| {
                a.session_id == session_id
                    && a.analysis_name.as_deref() == analysis_name
                    && a.session_index == session_index
            })
            .cloned();
        Ok(analysis)
    }

    async fn create_analysis(&self, analysis: &mut Analysis) -> Result<()> {
        let mut state = self.state()?;
        if !state.sessions.contains_key(&analysis.session_id) {
            return Err(constraint(format!("unknown session {}", analysis.session_id)));
        }
        let duplicate = state.analyses.values().any(|a| {
            a.session_id == analysis.session_id
                && a.analysis_name == analysis.analysis_name
                && a.session_index == analysis.session_index
        });
        if duplicate {
            return Err(constraint("duplicate analysis in session"));
        }
        let id = Uuid::new_v4();
        analysis.id = Some(id);
        state.analyses.insert(id, analysis.clone());
        state.analysis_order.push(id);
        Ok(())
    }

    async fn get_analyses(&self, session_id: Uuid) -> Result<Vec<Analysis>> {
        let state = self.state()?;
        let analyses = state
            .analysis_order
            .iter()
            .filter_map(|id| state.analyses.get(id))
            .filter(|a| a.session_id == session_id)
            .cloned()
            .collect();
        Ok(analyses)
    }

    async fn find_datum(&self, analysis_id: Uuid, parameter: &str) -> Result<Option<Datum>> {
        let state = self.state()?;
        let datum = state
            .data
            .values()
            .find(|d| d.analysis_id == analysis_id && d.parameter == parameter)
            .cloned();
        Ok(datum)
    }

    async fn create_datum(&self, datum: &mut Datum) -> Result<()> {
        let mut state = self.state()?;
        if !state.analyses.contains_key(&datum.analysis_id) {
            return Err(constraint(format!("unknown analysis {}", datum.analysis_id)));
        }
        if !state.parameters.contains_key(&datum.parameter) {
            return Err(constraint(format!("unknown parameter {}", datum.parameter)));
        }
        for unit in [&datum.unit, &datum.error_unit].into_iter().flatten() {
            if !state.units.contains(unit) {
                return Err(constraint(format!("unknown unit {}", unit)));
            }
        }
        let duplicate = state
            .data
            .values()
            .any(|d| d.analysis_id == datum.analysis_id && d.parameter == datum.parameter);
        if duplicate {
            return Err(constraint(format!(
                "duplicate datum {} for analysis {}",
                datum.parameter, datum.analysis_id
            )));
        }
        let id = Uuid::new_v4();
        datum.id = Some(id);
        state.data.insert(id, datum.clone());
        state.datum_order.push(id);
        Ok(())
    }

    async fn update_datum(&self, datum: &Datum) -> Result<()> {
        let id = datum.id.ok_or_else(|| missing_id("datum"))?;
        let mut state = self.state()?;
        if !state.data.contains_key(&id) {
            return Err(constraint(format!("unknown datum {}", id)));
        }
        state.data.insert(id, datum.clone());
        Ok(())
    }

    async fn get_data(&self, analysis_id: Uuid) -> Result<Vec<Datum>> {
        let state = self.state()?;
        let data = state
            .datum_order
            .iter()
            .filter_map(|id| state.data.get(id))
            .filter(|d| d.analysis_id == analysis_id)
            .cloned()
            .collect();
        Ok(data)
    }
}
