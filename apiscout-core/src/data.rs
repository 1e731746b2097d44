use apiscout_scanner::error::ScanError;
use apiscout_scanner::{CrawlOutput, EndpointRecord, FormRecord, ReportWriter};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Result, params};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub struct Database {
    conn: Connection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Running,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
        }
    }
}

/// A stored scan, as listed by [`Database::list_sessions`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: String,
    pub target: String,
    pub start_time: i64,
    pub end_time: Option<i64>,
    pub status: String,
}

fn current_timestamp() -> i64 {
    Utc::now().timestamp()
}

impl Database {
    pub fn drop(path: &Path) -> std::io::Result<()> {
        fs::remove_file(path)
    }

    pub fn exists(path: &Path) -> bool {
        path.exists()
    }

    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            ",
        )?;

        let db = Database { conn };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            "
CREATE TABLE IF NOT EXISTS scan_sessions (
    id TEXT PRIMARY KEY,
    target TEXT NOT NULL,
    start_time INTEGER NOT NULL,
    end_time INTEGER,
    status TEXT NOT NULL CHECK(status IN ('running', 'completed', 'failed')),
    configuration TEXT        -- JSON configuration used
);

CREATE TABLE IF NOT EXISTS pages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    url TEXT NOT NULL,
    visit_order INTEGER NOT NULL,
    FOREIGN KEY(session_id) REFERENCES scan_sessions(id) ON DELETE CASCADE,
    UNIQUE(session_id, url)
);

CREATE INDEX IF NOT EXISTS idx_pages_session ON pages(session_id);

CREATE TABLE IF NOT EXISTS endpoints (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    url TEXT NOT NULL,
    method TEXT NOT NULL,
    requires_auth BOOLEAN NOT NULL,
    status_code INTEGER NOT NULL,
    source TEXT NOT NULL CHECK(source IN ('response', 'console')),
    discovered_at INTEGER NOT NULL,
    FOREIGN KEY(session_id) REFERENCES scan_sessions(id) ON DELETE CASCADE,
    UNIQUE(session_id, url)
);

CREATE INDEX IF NOT EXISTS idx_endpoints_session ON endpoints(session_id);
CREATE INDEX IF NOT EXISTS idx_endpoints_auth ON endpoints(requires_auth);

CREATE TABLE IF NOT EXISTS forms (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    action TEXT NOT NULL,
    method TEXT NOT NULL,
    parameters TEXT NOT NULL,  -- JSON array of field names
    FOREIGN KEY(session_id) REFERENCES scan_sessions(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_forms_session ON forms(session_id);
            ",
        )?;
        Ok(())
    }

    // Session management
    pub fn create_session(&self, target: &str, configuration: Option<&str>) -> Result<String> {
        self.create_session_at(target, configuration, current_timestamp())
    }

    pub fn create_session_at(
        &self,
        target: &str,
        configuration: Option<&str>,
        start_time: i64,
    ) -> Result<String> {
        let session_id = uuid::Uuid::new_v4().to_string();

        self.conn.execute(
            "INSERT INTO scan_sessions (id, target, start_time, status, configuration) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                &session_id,
                target,
                start_time,
                SessionStatus::Running.as_str(),
                configuration
            ],
        )?;

        Ok(session_id)
    }

    pub fn complete_session(&self, session_id: &str) -> Result<()> {
        self.finish_session(session_id, SessionStatus::Completed, current_timestamp())
    }

    pub fn fail_session(&self, session_id: &str) -> Result<()> {
        self.finish_session(session_id, SessionStatus::Failed, current_timestamp())
    }

    fn finish_session(&self, session_id: &str, status: SessionStatus, end_time: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE scan_sessions SET status = ?1, end_time = ?2 WHERE id = ?3",
            params![status.as_str(), end_time, session_id],
        )?;
        Ok(())
    }

    pub fn get_session(&self, session_id: &str) -> Result<Option<SessionInfo>> {
        self.conn
            .query_row(
                "SELECT id, target, start_time, end_time, status FROM scan_sessions WHERE id = ?1",
                params![session_id],
                session_from_row,
            )
            .optional()
    }

    pub fn list_sessions(&self) -> Result<Vec<SessionInfo>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, target, start_time, end_time, status FROM scan_sessions ORDER BY start_time DESC, rowid DESC",
        )?;
        let sessions = stmt
            .query_map([], session_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(sessions)
    }

    // Page operations
    pub fn insert_page(&self, session_id: &str, url: &str, visit_order: usize) -> Result<i64> {
        self.conn.execute(
            "INSERT OR IGNORE INTO pages (session_id, url, visit_order) VALUES (?1, ?2, ?3)",
            params![session_id, url, visit_order as i64],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_pages_by_session(&self, session_id: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT url FROM pages WHERE session_id = ?1 ORDER BY visit_order")?;
        let pages = stmt
            .query_map(params![session_id], |row| row.get(0))?
            .collect::<Result<Vec<_>>>()?;
        Ok(pages)
    }

    // Endpoint operations
    pub fn insert_endpoint(&self, session_id: &str, endpoint: &EndpointRecord) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO endpoints (
                session_id, url, method, requires_auth, status_code, source, discovered_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                session_id,
                &endpoint.url,
                &endpoint.method,
                endpoint.auth_required,
                endpoint.status_code as i64,
                endpoint.source.as_str(),
                current_timestamp(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_endpoint_by_url(&self, session_id: &str, url: &str) -> Result<Option<i64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM endpoints WHERE session_id = ?1 AND url = ?2")?;

        let result = stmt
            .query_row(params![session_id, url], |row| row.get(0))
            .optional()?;
        Ok(result)
    }

    /// `(url, method, requires_auth, status_code)` in discovery order.
    pub fn get_endpoints_by_session(
        &self,
        session_id: &str,
    ) -> Result<Vec<(String, String, bool, u16)>> {
        let mut stmt = self.conn.prepare(
            "SELECT url, method, requires_auth, status_code FROM endpoints WHERE session_id = ?1 ORDER BY id",
        )?;

        let endpoints = stmt
            .query_map(params![session_id], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })?
            .collect::<Result<Vec<_>>>()?;

        Ok(endpoints)
    }

    pub fn get_auth_counts(&self, session_id: &str) -> Result<(i64, i64)> {
        self.conn.query_row(
            "SELECT
                COALESCE(SUM(CASE WHEN requires_auth THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN requires_auth THEN 0 ELSE 1 END), 0)
             FROM endpoints WHERE session_id = ?1",
            params![session_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
    }

    // Form operations
    pub fn insert_form(&self, session_id: &str, form: &FormRecord) -> Result<i64> {
        let parameters =
            serde_json::to_string(&form.params).unwrap_or_else(|_| "[]".to_string());
        self.conn.execute(
            "INSERT INTO forms (session_id, action, method, parameters) VALUES (?1, ?2, ?3, ?4)",
            params![session_id, &form.action, &form.method, parameters],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_forms_by_session(&self, session_id: &str) -> Result<Vec<FormRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT action, method, parameters FROM forms WHERE session_id = ?1 ORDER BY id",
        )?;

        let forms = stmt
            .query_map(params![session_id], |row| {
                let parameters: String = row.get(2)?;
                Ok(FormRecord {
                    action: row.get(0)?,
                    method: row.get(1)?,
                    params: serde_json::from_str(&parameters).unwrap_or_default(),
                })
            })?
            .collect::<Result<Vec<_>>>()?;

        Ok(forms)
    }

    /// Stores a finished crawl as one completed session.
    pub fn save_crawl(&self, output: &CrawlOutput, configuration: Option<&str>) -> Result<String> {
        let tx = self.conn.unchecked_transaction()?;
        let session_id =
            self.create_session_at(&output.target, configuration, output.started_at.timestamp())?;

        for (order, page) in output.visited_pages.iter().enumerate() {
            self.insert_page(&session_id, page, order)?;
        }
        for endpoint in &output.endpoints {
            self.insert_endpoint(&session_id, endpoint)?;
        }
        for form in &output.forms {
            self.insert_form(&session_id, form)?;
        }
        self.finish_session(
            &session_id,
            SessionStatus::Completed,
            output.finished_at.timestamp(),
        )?;

        tx.commit()?;
        debug!(
            "Stored session {} ({} endpoints, {} pages)",
            session_id,
            output.endpoints.len(),
            output.visited_pages.len()
        );
        Ok(session_id)
    }
}

fn session_from_row(row: &rusqlite::Row<'_>) -> Result<SessionInfo> {
    Ok(SessionInfo {
        id: row.get(0)?,
        target: row.get(1)?,
        start_time: row.get(2)?,
        end_time: row.get(3)?,
        status: row.get(4)?,
    })
}

/// Persists each finished crawl into the scan history database.
pub struct DatabaseReportWriter {
    path: PathBuf,
    configuration: Option<String>,
}

impl DatabaseReportWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            configuration: None,
        }
    }

    pub fn with_configuration(mut self, configuration: String) -> Self {
        self.configuration = Some(configuration);
        self
    }
}

impl ReportWriter for DatabaseReportWriter {
    fn name(&self) -> &str {
        "database"
    }

    fn write_report(&self, output: &CrawlOutput) -> apiscout_scanner::error::Result<Vec<String>> {
        let to_error = |e: rusqlite::Error| {
            ScanError::Report(format!("{}: {}", self.path.display(), e))
        };
        let db = Database::new(&self.path).map_err(to_error)?;
        let session_id = db
            .save_crawl(output, self.configuration.as_deref())
            .map_err(to_error)?;
        Ok(vec![format!("{} (session {})", self.path.display(), session_id)])
    }
}
