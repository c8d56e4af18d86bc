use super::Storage;
use crate::error::{ImportError, Result};
use crate::types::{Analysis, DataFile, Datum, Project, Sample, Session};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};
use uuid::Uuid;

const SESSION_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

const SCHEMA: &str = r#"
    PRAGMA journal_mode=WAL;
    PRAGMA foreign_keys=ON;
    CREATE TABLE IF NOT EXISTS data_file (
        file_hash    TEXT PRIMARY KEY,
        file_path    TEXT NOT NULL,
        file_etag    TEXT,
        file_mtime   TEXT NOT NULL,
        basename     TEXT NOT NULL,
        payload_ref  TEXT,
        csv_data     TEXT,
        imported_at  TEXT
    );
    CREATE INDEX IF NOT EXISTS data_file_basename ON data_file (basename);
    CREATE TABLE IF NOT EXISTS vocabulary_unit (
        id  TEXT PRIMARY KEY
    );
    CREATE TABLE IF NOT EXISTS vocabulary_parameter (
        id           TEXT PRIMARY KEY,
        description  TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS project (
        id    TEXT PRIMARY KEY,
        name  TEXT NOT NULL UNIQUE
    );
    CREATE TABLE IF NOT EXISTS sample (
        id    TEXT PRIMARY KEY,
        name  TEXT NOT NULL UNIQUE
    );
    CREATE TABLE IF NOT EXISTS session (
        id          TEXT PRIMARY KEY,
        data_file   TEXT NOT NULL REFERENCES data_file (file_hash),
        project_id  TEXT NOT NULL REFERENCES project (id),
        sample_id   TEXT REFERENCES sample (id),
        date        TEXT NOT NULL,
        seq         INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS analysis (
        id             TEXT PRIMARY KEY,
        session_id     TEXT NOT NULL REFERENCES session (id),
        analysis_name  TEXT,
        session_index  INTEGER,
        seq            INTEGER NOT NULL,
        UNIQUE (session_id, analysis_name, session_index)
    );
    CREATE TABLE IF NOT EXISTS datum (
        id              TEXT PRIMARY KEY,
        analysis_id     TEXT NOT NULL REFERENCES analysis (id),
        parameter       TEXT NOT NULL REFERENCES vocabulary_parameter (id),
        value           REAL NOT NULL,
        unit            TEXT REFERENCES vocabulary_unit (id),
        error           REAL,
        error_unit      TEXT REFERENCES vocabulary_unit (id),
        error_metric    TEXT NOT NULL,
        is_interpreted  INTEGER NOT NULL,
        is_accepted     INTEGER,
        seq             INTEGER NOT NULL,
        UNIQUE (analysis_id, parameter)
    );
"#;

const DATA_FILE_COLUMNS: &str =
    "file_hash, file_path, file_etag, file_mtime, basename, payload_ref, csv_data, imported_at";

/// SQLite-backed storage; one connection guarded by a mutex.
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        info!("Opened SQLite storage at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| ImportError::Storage {
            message: format!("connection lock poisoned: {}", e),
        })
    }
}

fn parse_uuid(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| ImportError::Storage {
        message: format!("invalid uuid '{}': {}", raw, e),
    })
}

fn parse_opt_uuid(raw: Option<String>) -> Result<Option<Uuid>> {
    raw.as_deref().map(parse_uuid).transpose()
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ImportError::Storage {
            message: format!("invalid timestamp '{}': {}", raw, e),
        })
}

fn parse_session_date(raw: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, SESSION_DATE_FORMAT).map_err(|e| ImportError::Storage {
        message: format!("invalid session date '{}': {}", raw, e),
    })
}

fn format_session_date(date: &NaiveDateTime) -> String {
    date.format(SESSION_DATE_FORMAT).to_string()
}

fn missing_id(what: &str) -> ImportError {
    ImportError::Storage {
        message: format!("Cannot update {} without ID", what),
    }
}

fn read_data_file(row: &Row<'_>) -> Result<DataFile> {
    let mtime: String = row.get(3)?;
    let imported_at: Option<String> = row.get(7)?;
    Ok(DataFile {
        file_hash: row.get(0)?,
        file_path: row.get(1)?,
        file_etag: row.get(2)?,
        file_mtime: parse_timestamp(&mtime)?,
        basename: row.get(4)?,
        payload_ref: row.get(5)?,
        csv_data: row.get(6)?,
        imported_at: imported_at.as_deref().map(parse_timestamp).transpose()?,
    })
}

fn read_session(row: &Row<'_>) -> Result<Session> {
    let id: String = row.get(0)?;
    let project_id: String = row.get(2)?;
    let date: String = row.get(4)?;
    Ok(Session {
        id: Some(parse_uuid(&id)?),
        data_file: row.get(1)?,
        project_id: parse_uuid(&project_id)?,
        sample_id: parse_opt_uuid(row.get(3)?)?,
        date: parse_session_date(&date)?,
    })
}

fn read_analysis(row: &Row<'_>) -> Result<Analysis> {
    let id: String = row.get(0)?;
    let session_id: String = row.get(1)?;
    Ok(Analysis {
        id: Some(parse_uuid(&id)?),
        session_id: parse_uuid(&session_id)?,
        analysis_name: row.get(2)?,
        session_index: row.get(3)?,
    })
}

fn read_datum(row: &Row<'_>) -> Result<Datum> {
    let id: String = row.get(0)?;
    let analysis_id: String = row.get(1)?;
    Ok(Datum {
        id: Some(parse_uuid(&id)?),
        analysis_id: parse_uuid(&analysis_id)?,
        parameter: row.get(2)?,
        value: row.get(3)?,
        unit: row.get(4)?,
        error: row.get(5)?,
        error_unit: row.get(6)?,
        error_metric: row.get(7)?,
        is_interpreted: row.get(8)?,
        is_accepted: row.get(9)?,
    })
}

/// Run a query and map every row with `read`
fn query_all<T>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn rusqlite::ToSql],
    read: fn(&Row<'_>) -> Result<T>,
) -> Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(read(row)?);
    }
    Ok(out)
}

fn query_first<T>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn rusqlite::ToSql],
    read: fn(&Row<'_>) -> Result<T>,
) -> Result<Option<T>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    match rows.next()? {
        Some(row) => Ok(Some(read(row)?)),
        None => Ok(None),
    }
}

fn next_seq(conn: &Connection, table: &str) -> Result<i64> {
    let sql = format!("SELECT COALESCE(MAX(seq), 0) + 1 FROM {}", table);
    let seq: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
    Ok(seq)
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn begin(&self) -> Result<()> {
        self.conn()?.execute_batch("BEGIN IMMEDIATE")?;
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        self.conn()?.execute_batch("COMMIT")?;
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        let conn = self.conn()?;
        if !conn.is_autocommit() {
            conn.execute_batch("ROLLBACK")?;
            debug!("Rolled back SQLite transaction");
        }
        Ok(())
    }

    async fn get_data_file(&self, file_hash: &str) -> Result<Option<DataFile>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM data_file WHERE file_hash = ?1",
            DATA_FILE_COLUMNS
        );
        query_first(&conn, &sql, &[&file_hash], read_data_file)
    }

    async fn get_data_file_by_basename(&self, basename: &str) -> Result<Option<DataFile>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM data_file WHERE basename = ?1 ORDER BY file_path LIMIT 1",
            DATA_FILE_COLUMNS
        );
        query_first(&conn, &sql, &[&basename], read_data_file)
    }

    async fn upsert_data_file(&self, file: &DataFile) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO data_file (file_hash, file_path, file_etag, file_mtime, basename,
                                    payload_ref, csv_data, imported_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT (file_hash) DO UPDATE SET
                file_path = excluded.file_path,
                file_etag = excluded.file_etag,
                file_mtime = excluded.file_mtime,
                basename = excluded.basename,
                payload_ref = excluded.payload_ref,
                csv_data = excluded.csv_data,
                imported_at = excluded.imported_at",
            params![
                file.file_hash,
                file.file_path,
                file.file_etag,
                file.file_mtime.to_rfc3339(),
                file.basename,
                file.payload_ref,
                file.csv_data,
                file.imported_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        debug!("Upserted data file: {} ({})", file.file_path, file.file_hash);
        Ok(())
    }

    async fn list_data_files(&self) -> Result<Vec<DataFile>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM data_file ORDER BY file_path",
            DATA_FILE_COLUMNS
        );
        query_all(&conn, &sql, &[], read_data_file)
    }

    async fn mark_imported(&self, file_hash: &str, at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE data_file SET imported_at = ?1 WHERE file_hash = ?2",
            params![at.to_rfc3339(), file_hash],
        )?;
        if changed == 0 {
            return Err(ImportError::StorageConstraint(format!(
                "unknown data file {}",
                file_hash
            )));
        }
        Ok(())
    }

    async fn ensure_unit(&self, unit: &str) -> Result<()> {
        self.conn()?.execute(
            "INSERT OR IGNORE INTO vocabulary_unit (id) VALUES (?1)",
            params![unit],
        )?;
        Ok(())
    }

    async fn ensure_parameter(&self, id: &str, description: &str) -> Result<()> {
        self.conn()?.execute(
            "INSERT OR IGNORE INTO vocabulary_parameter (id, description) VALUES (?1, ?2)",
            params![id, description],
        )?;
        Ok(())
    }

    async fn create_project(&self, project: &mut Project) -> Result<()> {
        let id = Uuid::new_v4();
        self.conn()?.execute(
            "INSERT INTO project (id, name) VALUES (?1, ?2)",
            params![id.to_string(), project.name],
        )?;
        project.id = Some(id);

        debug!("Created project: {} with id {}", project.name, id);
        Ok(())
    }

    async fn get_project_by_name(&self, name: &str) -> Result<Option<Project>> {
        let conn = self.conn()?;
        query_first(
            &conn,
            "SELECT id, name FROM project WHERE name = ?1",
            &[&name],
            |row| {
                let id: String = row.get(0)?;
                Ok(Project {
                    id: Some(parse_uuid(&id)?),
                    name: row.get(1)?,
                })
            },
        )
    }

    async fn create_sample(&self, sample: &mut Sample) -> Result<()> {
        let id = Uuid::new_v4();
        self.conn()?.execute(
            "INSERT INTO sample (id, name) VALUES (?1, ?2)",
            params![id.to_string(), sample.name],
        )?;
        sample.id = Some(id);

        debug!("Created sample: {} with id {}", sample.name, id);
        Ok(())
    }

    async fn get_sample_by_name(&self, name: &str) -> Result<Option<Sample>> {
        let conn = self.conn()?;
        query_first(
            &conn,
            "SELECT id, name FROM sample WHERE name = ?1",
            &[&name],
            |row| {
                let id: String = row.get(0)?;
                Ok(Sample {
                    id: Some(parse_uuid(&id)?),
                    name: row.get(1)?,
                })
            },
        )
    }

    async fn find_session(
        &self,
        data_file: &str,
        sample_id: Option<Uuid>,
    ) -> Result<Option<Session>> {
        let conn = self.conn()?;
        let sample_id = sample_id.map(|id| id.to_string());
        query_first(
            &conn,
            "SELECT id, data_file, project_id, sample_id, date FROM session
             WHERE data_file = ?1 AND sample_id IS ?2 ORDER BY seq LIMIT 1",
            &[&data_file, &sample_id],
            read_session,
        )
    }

    async fn create_session(&self, session: &mut Session) -> Result<()> {
        let conn = self.conn()?;
        let id = Uuid::new_v4();
        let seq = next_seq(&conn, "session")?;
        conn.execute(
            "INSERT INTO session (id, data_file, project_id, sample_id, date, seq)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id.to_string(),
                session.data_file,
                session.project_id.to_string(),
                session.sample_id.map(|s| s.to_string()),
                format_session_date(&session.date),
                seq,
            ],
        )?;
        session.id = Some(id);

        debug!("Created session for {} with id {}", session.data_file, id);
        Ok(())
    }

    async fn update_session(&self, session: &Session) -> Result<()> {
        let id = session.id.ok_or_else(|| missing_id("session"))?;
        self.conn()?.execute(
            "UPDATE session SET data_file = ?2, project_id = ?3, sample_id = ?4, date = ?5
             WHERE id = ?1",
            params![
                id.to_string(),
                session.data_file,
                session.project_id.to_string(),
                session.sample_id.map(|s| s.to_string()),
                format_session_date(&session.date),
            ],
        )?;

        debug!("Updated session with id {}", id);
        Ok(())
    }

    async fn get_sessions_for_file(&self, data_file: &str) -> Result<Vec<Session>> {
        let conn = self.conn()?;
        query_all(
            &conn,
            "SELECT id, data_file, project_id, sample_id, date FROM session
             WHERE data_file = ?1 ORDER BY seq",
            &[&data_file],
            read_session,
        )
    }

    async fn find_analysis(
        &self,
        session_id: Uuid,
        analysis_name: Option<&str>,
        session_index: Option<i64>,
    ) -> Result<Option<Analysis>> {
        let conn = self.conn()?;
        query_first(
            &conn,
            "SELECT id, session_id, analysis_name, session_index FROM analysis
             WHERE session_id = ?1 AND analysis_name IS ?2 AND session_index IS ?3
             LIMIT 1",
            &[&session_id.to_string(), &analysis_name, &session_index],
            read_analysis,
        )
    }

    async fn create_analysis(&self, analysis: &mut Analysis) -> Result<()> {
        let conn = self.conn()?;
        let id = Uuid::new_v4();
        let seq = next_seq(&conn, "analysis")?;
        conn.execute(
            "INSERT INTO analysis (id, session_id, analysis_name, session_index, seq)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                id.to_string(),
                analysis.session_id.to_string(),
                analysis.analysis_name,
                analysis.session_index,
                seq,
            ],
        )?;
        analysis.id = Some(id);
        Ok(())
    }

    async fn get_analyses(&self, session_id: Uuid) -> Result<Vec<Analysis>> {
        let conn = self.conn()?;
        query_all(
            &conn,
            "SELECT id, session_id, analysis_name, session_index FROM analysis
             WHERE session_id = ?1 ORDER BY seq",
            &[&session_id.to_string()],
            read_analysis,
        )
    }

    async fn find_datum(&self, analysis_id: Uuid, parameter: &str) -> Result<Option<Datum>> {
        let conn = self.conn()?;
        query_first(
            &conn,
            "SELECT id, analysis_id, parameter, value, unit, error, error_unit,
                    error_metric, is_interpreted, is_accepted
             FROM datum WHERE analysis_id = ?1 AND parameter = ?2",
            &[&analysis_id.to_string(), &parameter],
            read_datum,
        )
    }

    async fn create_datum(&self, datum: &mut Datum) -> Result<()> {
        let conn = self.conn()?;
        let id = Uuid::new_v4();
        let seq = next_seq(&conn, "datum")?;
        conn.execute(
            "INSERT INTO datum (id, analysis_id, parameter, value, unit, error, error_unit,
                                error_metric, is_interpreted, is_accepted, seq)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                id.to_string(),
                datum.analysis_id.to_string(),
                datum.parameter,
                datum.value,
                datum.unit,
                datum.error,
                datum.error_unit,
                datum.error_metric,
                datum.is_interpreted,
                datum.is_accepted,
                seq,
            ],
        )?;
        datum.id = Some(id);
        Ok(())
    }

    async fn update_datum(&self, datum: &Datum) -> Result<()> {
        let id = datum.id.ok_or_else(|| missing_id("datum"))?;
        self.conn()?.execute(
            "UPDATE datum SET value = ?2, unit = ?3, error = ?4, error_unit = ?5,
                              error_metric = ?6, is_interpreted = ?7, is_accepted = ?8
             WHERE id = ?1",
            params![
                id.to_string(),
                datum.value,
                datum.unit,
                datum.error,
                datum.error_unit,
                datum.error_metric,
                datum.is_interpreted,
                datum.is_accepted,
            ],
        )?;
        Ok(())
    }

    async fn get_data(&self, analysis_id: Uuid) -> Result<Vec<Datum>> {
        let conn = self.conn()?;
        query_all(
            &conn,
            "SELECT id, analysis_id, parameter, value, unit, error, error_unit,
                    error_metric, is_interpreted, is_accepted
             FROM datum WHERE analysis_id = ?1 ORDER BY seq",
            &[&analysis_id.to_string()],
            read_datum,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn open_temp() -> (TempDir, SqliteStorage) {
        let dir = TempDir::new().unwrap();
        let storage = SqliteStorage::open(dir.path().join("test.db")).unwrap();
        (dir, storage)
    }

    fn data_file() -> DataFile {
        DataFile {
            file_hash: "abc123".to_string(),
            file_path: "Project A/2019-03-01 run.xlsx".to_string(),
            file_etag: None,
            file_mtime: Utc::now(),
            basename: "2019-03-01 run".to_string(),
            payload_ref: None,
            csv_data: Some("x,y\n".to_string()),
            imported_at: None,
        }
    }

    #[tokio::test]
    async fn test_data_file_upsert_and_mark_imported() {
        let (_dir, storage) = open_temp();
        storage.upsert_data_file(&data_file()).await.unwrap();
        storage.upsert_data_file(&data_file()).await.unwrap();
        assert_eq!(storage.list_data_files().await.unwrap().len(), 1);

        storage.mark_imported("abc123", Utc::now()).await.unwrap();
        let file = storage.get_data_file("abc123").await.unwrap().unwrap();
        assert!(file.is_imported());
        let by_name = storage
            .get_data_file_by_basename("2019-03-01 run")
            .await
            .unwrap();
        assert_eq!(by_name.map(|f| f.file_hash), Some("abc123".to_string()));
    }

    #[tokio::test]
    async fn test_duplicate_sample_is_a_constraint_violation() {
        let (_dir, storage) = open_temp();
        storage.create_sample(&mut Sample::new("ALC-14")).await.unwrap();
        let result = storage.create_sample(&mut Sample::new("ALC-14")).await;
        assert!(matches!(result, Err(ImportError::StorageConstraint(_))));
    }

    #[tokio::test]
    async fn test_session_lookup_matches_null_sample() {
        let (_dir, storage) = open_temp();
        storage.upsert_data_file(&data_file()).await.unwrap();
        let mut project = Project::new("Project A");
        storage.create_project(&mut project).await.unwrap();

        let mut session = Session {
            id: None,
            data_file: "abc123".to_string(),
            project_id: project.id.unwrap(),
            sample_id: None,
            date: NaiveDate::from_ymd_opt(1, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
        };
        storage.create_session(&mut session).await.unwrap();

        let found = storage.find_session("abc123", None).await.unwrap().unwrap();
        assert_eq!(found, session);
        assert!(storage
            .find_session("abc123", Some(Uuid::new_v4()))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let (_dir, storage) = open_temp();
        storage.begin().await.unwrap();
        storage.create_project(&mut Project::new("Gone")).await.unwrap();
        storage.rollback().await.unwrap();
        assert!(storage.get_project_by_name("Gone").await.unwrap().is_none());

        storage.begin().await.unwrap();
        storage.create_project(&mut Project::new("Kept")).await.unwrap();
        storage.commit().await.unwrap();
        assert!(storage.get_project_by_name("Kept").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_datum_round_trip_and_unknown_parameter() {
        let (_dir, storage) = open_temp();
        storage.upsert_data_file(&data_file()).await.unwrap();
        let mut project = Project::new("Project A");
        storage.create_project(&mut project).await.unwrap();
        let mut session = Session {
            id: None,
            data_file: "abc123".to_string(),
            project_id: project.id.unwrap(),
            sample_id: None,
            date: NaiveDate::from_ymd_opt(2019, 3, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
        };
        storage.create_session(&mut session).await.unwrap();
        let mut analysis = Analysis {
            id: None,
            session_id: session.id.unwrap(),
            analysis_name: None,
            session_index: None,
        };
        storage.create_analysis(&mut analysis).await.unwrap();
        let analysis_id = analysis.id.unwrap();
        assert!(storage
            .find_analysis(session.id.unwrap(), None, None)
            .await
            .unwrap()
            .is_some());

        let mut datum = Datum {
            id: None,
            analysis_id,
            parameter: "age_206Pb_238U".to_string(),
            value: 100.0,
            unit: Some("Ma".to_string()),
            error: Some(1.5),
            error_unit: Some("Ma".to_string()),
            error_metric: "2s".to_string(),
            is_interpreted: true,
            is_accepted: Some(true),
        };
        let result = storage.create_datum(&mut datum).await;
        assert!(matches!(result, Err(ImportError::StorageConstraint(_))));

        storage.ensure_unit("Ma").await.unwrap();
        storage
            .ensure_parameter("age_206Pb_238U", "206Pb/238U age")
            .await
            .unwrap();
        storage.create_datum(&mut datum).await.unwrap();

        let data = storage.get_data(analysis_id).await.unwrap();
        assert_eq!(data, vec![datum]);
    }
}
