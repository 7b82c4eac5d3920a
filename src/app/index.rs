use chrono::NaiveDateTime;
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::app::models::{ArtifactKind, StoredArtifact};
use crate::app::store::TIMESTAMP_FORMAT;

pub const INDEX_FILE_NAME: &str = "artifact_index.sqlite";
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Maps each file in the output directory to the device and kind it was
/// saved for, so reports do not depend on parsing file names. Rows are keyed
/// by file name; paths are rebuilt from the directory the index lives in.
#[derive(Debug, Clone)]
pub struct ArtifactIndex {
    dir: PathBuf,
    db_path: PathBuf,
}

impl ArtifactIndex {
    pub fn for_dir(output_dir: &Path) -> Self {
        Self {
            dir: output_dir.to_path_buf(),
            db_path: output_dir.join(INDEX_FILE_NAME),
        }
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn open(&self) -> Result<Connection, String> {
        let connection = Connection::open(&self.db_path)
            .map_err(|err| format!("Failed to open artifact index: {err}"))?;
        connection
            .busy_timeout(BUSY_TIMEOUT)
            .map_err(|err| format!("Failed to configure artifact index: {err}"))?;
        connection
            .execute_batch(
                "PRAGMA journal_mode=WAL;
                 CREATE TABLE IF NOT EXISTS artifact_files (
                   file_name TEXT PRIMARY KEY,
                   kind TEXT NOT NULL,
                   device_id TEXT NOT NULL,
                   captured_at TEXT NOT NULL
                 );
                 CREATE INDEX IF NOT EXISTS idx_artifact_files_device ON artifact_files(device_id);
                ",
            )
            .map_err(|err| format!("Failed to initialize artifact index: {err}"))?;
        Ok(connection)
    }

    fn write(&self, verb: &str, artifact: &StoredArtifact) -> Result<usize, String> {
        let connection = self.open()?;
        connection
            .execute(
                &format!(
                    "{verb} INTO artifact_files (file_name, kind, device_id, captured_at)
                     VALUES (?1, ?2, ?3, ?4)"
                ),
                params![
                    artifact.file_name,
                    artifact.kind.file_prefix(),
                    artifact.device_id,
                    artifact.captured_at.format(TIMESTAMP_FORMAT).to_string(),
                ],
            )
            .map_err(|err| format!("Failed to record artifact: {err}"))
    }

    /// Called after a save; the file on disk was just replaced, so is the row.
    pub fn record(&self, artifact: &StoredArtifact) -> Result<(), String> {
        self.write("INSERT OR REPLACE", artifact).map(|_| ())
    }

    /// Backfill for files found by scanning. An existing row keeps its owner;
    /// returns whether a row was added.
    pub fn record_if_absent(&self, artifact: &StoredArtifact) -> Result<bool, String> {
        self.write("INSERT OR IGNORE", artifact).map(|changed| changed > 0)
    }

    pub fn forget(&self, file_name: &str) -> Result<(), String> {
        let connection = self.open()?;
        connection
            .execute(
                "DELETE FROM artifact_files WHERE file_name = ?1",
                params![file_name],
            )
            .map_err(|err| format!("Failed to drop artifact row: {err}"))?;
        Ok(())
    }

    /// File name to owning device id, for every indexed file.
    pub fn owners(&self) -> Result<HashMap<String, String>, String> {
        let connection = self.open()?;
        let mut statement = connection
            .prepare("SELECT file_name, device_id FROM artifact_files")
            .map_err(|err| format!("Failed to query artifact index: {err}"))?;
        let rows = statement
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
            .map_err(|err| format!("Failed to query artifact index: {err}"))?;
        rows.collect::<Result<HashMap<_, _>, _>>()
            .map_err(|err| format!("Failed to read artifact row: {err}"))
    }

    /// Entries for `device_id`, ordered by file name.
    pub fn for_device(&self, device_id: &str) -> Result<Vec<StoredArtifact>, String> {
        let connection = self.open()?;
        let mut statement = connection
            .prepare(
                "SELECT file_name, kind, device_id, captured_at
                 FROM artifact_files WHERE device_id = ?1 ORDER BY file_name ASC",
            )
            .map_err(|err| format!("Failed to query artifact index: {err}"))?;
        let rows = statement
            .query_map(params![device_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .map_err(|err| format!("Failed to query artifact index: {err}"))?;

        let mut artifacts = Vec::new();
        for row in rows {
            let (file_name, kind, device_id, captured_at) =
                row.map_err(|err| format!("Failed to read artifact row: {err}"))?;
            let Some(kind) = ArtifactKind::from_prefix(&kind) else {
                continue;
            };
            let Ok(captured_at) = NaiveDateTime::parse_from_str(&captured_at, TIMESTAMP_FORMAT) else {
                continue;
            };
            artifacts.push(StoredArtifact {
                path: self.dir.join(&file_name),
                file_name,
                kind,
                device_id,
                captured_at,
            });
        }
        Ok(artifacts)
    }
}
