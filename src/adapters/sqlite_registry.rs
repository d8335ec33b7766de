use crate::core::{Project, ProjectRegistry, RegistrySession};
use crate::utils::error::{OrchestratorError, Result};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS projects (
    project_id   TEXT PRIMARY KEY NOT NULL,
    project_name TEXT NOT NULL,
    latitude     REAL NOT NULL,
    longitude    REAL NOT NULL,
    city         TEXT NOT NULL
);
"#;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite 建案登記簿；每個 session 各自開一條連線
#[derive(Debug, Clone)]
pub struct SqliteRegistry {
    path: PathBuf,
}

impl SqliteRegistry {
    /// 開啟（必要時建立）資料庫檔案並套用 schema
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Self::connect(&path)?;
        conn.execute_batch(SCHEMA_SQL).map_err(|e| OrchestratorError::PersistenceError {
            message: format!("failed to apply registry schema: {}", e),
            source: Some(e),
        })?;

        tracing::debug!("Project registry initialized at {}", path.display());
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(path: &Path) -> Result<Connection> {
        let conn = Connection::open(path).map_err(|e| OrchestratorError::PersistenceError {
            message: format!("failed to open registry at {}: {}", path.display(), e),
            source: Some(e),
        })?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }
}

impl ProjectRegistry for SqliteRegistry {
    type Session = SqliteSession;

    fn open_session(&self) -> Result<SqliteSession> {
        let conn = Self::connect(&self.path)?;
        Ok(SqliteSession {
            conn: Mutex::new(conn),
        })
    }
}

/// 獨佔一條連線，Drop 時關閉
#[derive(Debug)]
pub struct SqliteSession {
    conn: Mutex<Connection>,
}

impl SqliteSession {
    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| OrchestratorError::persistence("registry connection lock poisoned"))
    }
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

impl RegistrySession for SqliteSession {
    fn exists(&self, project_id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let found = conn
            .query_row(
                "SELECT 1 FROM projects WHERE project_id = ?1",
                params![project_id],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn find(&self, project_id: &str) -> Result<Option<Project>> {
        let conn = self.conn()?;
        let project = conn
            .query_row(
                r#"
                SELECT project_id, project_name, latitude, longitude, city
                FROM projects
                WHERE project_id = ?1
                "#,
                params![project_id],
                |row| {
                    Ok(Project {
                        project_id: row.get(0)?,
                        project_name: row.get(1)?,
                        latitude: row.get(2)?,
                        longitude: row.get(3)?,
                        city: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(project)
    }

    // 單一 INSERT，主鍵衝突本身就是重複的訊號
    fn create(&self, project: &Project) -> Result<()> {
        let conn = self.conn()?;
        let inserted = conn.execute(
            r#"
            INSERT INTO projects (project_id, project_name, latitude, longitude, city)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                project.project_id,
                project.project_name,
                project.latitude,
                project.longitude,
                project.city
            ],
        );

        match inserted {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(OrchestratorError::DuplicateError {
                project_id: project.project_id.clone(),
            }),
            Err(e) => Err(e.into()),
        }
    }
}
