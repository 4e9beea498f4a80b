//! SQLite store for projects, issues, messages, and dialogs.
//!
//! All access goes through [`DbHandle`], which serializes the connection
//! behind a mutex and runs closures on tokio's blocking pool so synchronous
//! SQLite I/O never ties up async workers. State transitions that race
//! (issue claims, dialog resolution) are single conditional UPDATE
//! statements guarded by the pre-image status; zero affected rows means a
//! lost race, not an error.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params};

use crate::agents::DEFAULT_AGENTS;
use crate::models::*;

/// Priority ordering used by both the issue list and the dispatch claim.
const PRIORITY_RANK_SQL: &str =
    "CASE priority WHEN 'urgent' THEN 0 WHEN 'high' THEN 1 WHEN 'medium' THEN 2 ELSE 3 END";

/// Code-side timestamps use the same format as SQLite's `datetime('now')`
/// so mixed writers sort consistently.
fn now_utc() -> String {
    chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Async-safe handle to the store.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<Db>>,
}

impl DbHandle {
    pub fn new(db: Db) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Db) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db
                .lock()
                .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }
}

pub struct Db {
    conn: Connection,
}

/// Fields for a new issue row. Everything optional carries the same
/// semantics as the column it lands in.
#[derive(Debug, Clone, Default)]
pub struct NewIssue {
    pub project_id: i64,
    pub title: String,
    pub description: String,
    pub priority: Priority,
    pub status: IssueStatus,
    pub created_by: String,
    pub created_by_type: SenderType,
    pub assigned_agent_id: Option<String>,
    pub queued_agent_id: Option<String>,
    pub tags: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub project_id: i64,
    pub sender_id: String,
    pub sender_type: SenderType,
    pub content: String,
    pub message_type: MessageType,
    pub metadata: Option<MessageMetadata>,
}

#[derive(Debug, Clone)]
pub struct NewDialog {
    pub project_id: i64,
    pub agent_id: String,
    pub issue_id: Option<i64>,
    pub title: String,
    pub message: String,
    pub options: Vec<String>,
    pub default_option: String,
}

/// The row the dispatcher hands to the agent runner after a claim.
#[derive(Debug, Clone)]
pub struct ClaimedIssue {
    pub id: i64,
    pub project_id: i64,
    pub agent_id: String,
    pub title: String,
    pub description: String,
    pub priority: Priority,
}

impl Db {
    /// Open (or create) the database at `path` and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// In-memory database for tests.
    pub fn new_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON; PRAGMA synchronous = NORMAL;")
            .context("failed to configure connection")?;
        // These pragmas echo a value back, so they must be read as queries.
        self.conn
            .query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))
            .context("failed to set journal mode")?;
        self.conn
            .query_row("PRAGMA busy_timeout = 5000", [], |_| Ok(()))
            .context("failed to set busy timeout")?;
        self.run_migrations().context("failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS projects (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    description TEXT NOT NULL DEFAULT '',
                    settings TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS issues (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                    title TEXT NOT NULL,
                    description TEXT NOT NULL DEFAULT '',
                    priority TEXT NOT NULL DEFAULT 'medium',
                    status TEXT NOT NULL DEFAULT 'proposed',
                    created_by TEXT NOT NULL DEFAULT '',
                    created_by_type TEXT NOT NULL DEFAULT 'user',
                    assigned_agent_id TEXT,
                    queued_agent_id TEXT,
                    queued_at TEXT,
                    started_at TEXT,
                    completed_at TEXT,
                    tags TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS messages (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                    sender_id TEXT NOT NULL,
                    sender_type TEXT NOT NULL,
                    content TEXT NOT NULL,
                    message_type TEXT NOT NULL DEFAULT 'chat',
                    metadata TEXT,
                    timestamp TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS dialogs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                    agent_id TEXT NOT NULL,
                    issue_id INTEGER,
                    title TEXT NOT NULL DEFAULT '',
                    message TEXT NOT NULL DEFAULT '',
                    options TEXT NOT NULL DEFAULT '[]',
                    default_option TEXT NOT NULL DEFAULT '',
                    status TEXT NOT NULL DEFAULT 'open',
                    selected_option TEXT,
                    responded_by TEXT,
                    responded_at TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE INDEX IF NOT EXISTS idx_issues_project ON issues(project_id);
                CREATE INDEX IF NOT EXISTS idx_issues_queue ON issues(status, queued_agent_id);
                CREATE INDEX IF NOT EXISTS idx_messages_project ON messages(project_id);
                CREATE INDEX IF NOT EXISTS idx_dialogs_project ON dialogs(project_id);
                ",
            )
            .context("failed to create tables")?;

        self.ensure_issue_columns()
    }

    /// Upgrade pre-existing stores: older deployments lack the
    /// `queued_agent_id` and `created_at` issue columns. `created_at` is
    /// backfilled from `queued_at` where possible.
    fn ensure_issue_columns(&self) -> Result<()> {
        let mut stmt = self
            .conn
            .prepare("PRAGMA table_info(issues)")
            .context("failed to inspect issues table")?;
        let columns: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(1))
            .context("failed to scan issues columns")?
            .collect::<std::result::Result<_, _>>()?;

        if !columns.iter().any(|c| c == "queued_agent_id") {
            self.conn
                .execute("ALTER TABLE issues ADD COLUMN queued_agent_id TEXT", [])
                .context("failed to add queued_agent_id column")?;
        }

        if !columns.iter().any(|c| c == "created_at") {
            self.conn
                .execute("ALTER TABLE issues ADD COLUMN created_at TEXT", [])
                .context("failed to add created_at column")?;
            self.conn
                .execute(
                    "UPDATE issues SET created_at = COALESCE(queued_at, datetime('now'))
                     WHERE created_at IS NULL",
                    [],
                )
                .context("failed to backfill created_at column")?;
        }

        Ok(())
    }

    // ── Projects ──────────────────────────────────────────────────────

    pub fn create_project(&self, name: &str, description: &str) -> Result<Project> {
        self.conn
            .execute(
                "INSERT INTO projects (name, description) VALUES (?1, ?2)",
                params![name, description],
            )
            .context("failed to insert project")?;
        let id = self.conn.last_insert_rowid();
        self.get_project(id)?
            .context("project not found after insert")
    }

    pub fn get_project(&self, id: i64) -> Result<Option<Project>> {
        self.conn
            .query_row(
                "SELECT id, name, description, settings, created_at FROM projects WHERE id = ?1",
                params![id],
                |row| {
                    Ok(ProjectRow {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        description: row.get(2)?,
                        settings: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                },
            )
            .optional()
            .context("failed to query project")?
            .map(ProjectRow::into_project)
            .transpose()
    }

    pub fn list_projects(&self) -> Result<Vec<Project>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, name, description, settings, created_at
                 FROM projects ORDER BY created_at DESC, id DESC",
            )
            .context("failed to prepare list_projects")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(ProjectRow {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    description: row.get(2)?,
                    settings: row.get(3)?,
                    created_at: row.get(4)?,
                })
            })
            .context("failed to query projects")?;
        let mut projects = Vec::new();
        for row in rows {
            projects.push(row.context("failed to read project row")?.into_project()?);
        }
        Ok(projects)
    }

    pub fn project_ids(&self) -> Result<Vec<i64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM projects ORDER BY id")
            .context("failed to prepare project_ids")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, i64>(0))
            .context("failed to query project ids")?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(row.context("failed to read project id")?);
        }
        Ok(ids)
    }

    pub fn load_settings(&self, project_id: i64) -> Result<Option<WorkspaceSettings>> {
        let raw: Option<Option<String>> = self
            .conn
            .query_row(
                "SELECT settings FROM projects WHERE id = ?1",
                params![project_id],
                |row| row.get(0),
            )
            .optional()
            .context("failed to query project settings")?;

        match raw.flatten() {
            Some(json) if !json.trim().is_empty() => {
                let settings = serde_json::from_str(&json)
                    .with_context(|| format!("invalid settings for project {}", project_id))?;
                Ok(Some(settings))
            }
            _ => Ok(None),
        }
    }

    pub fn save_settings(&self, project_id: i64, settings: &WorkspaceSettings) -> Result<()> {
        let json = serde_json::to_string(settings).context("failed to marshal settings")?;
        self.conn
            .execute(
                "UPDATE projects SET settings = ?1 WHERE id = ?2",
                params![json, project_id],
            )
            .context("failed to persist settings")?;
        Ok(())
    }

    // ── Issues ────────────────────────────────────────────────────────

    pub fn create_issue(&self, new: &NewIssue) -> Result<Issue> {
        // queued_at mirrors queued_agent_id presence; both are written
        // together or not at all.
        let queued_at = new.queued_agent_id.as_ref().map(|_| now_utc());
        self.conn
            .execute(
                "INSERT INTO issues (project_id, title, description, priority, status,
                                     created_by, created_by_type, assigned_agent_id,
                                     queued_agent_id, queued_at, tags)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    new.project_id,
                    new.title,
                    new.description,
                    new.priority.as_str(),
                    new.status.as_str(),
                    new.created_by,
                    new.created_by_type.as_str(),
                    new.assigned_agent_id,
                    new.queued_agent_id,
                    queued_at,
                    new.tags,
                ],
            )
            .context("failed to insert issue")?;
        let id = self.conn.last_insert_rowid();
        self.get_issue(id)?.context("issue not found after insert")
    }

    pub fn get_issue(&self, id: i64) -> Result<Option<Issue>> {
        self.conn
            .query_row(
                &format!("{} WHERE id = ?1", ISSUE_SELECT),
                params![id],
                issue_row_mapper,
            )
            .optional()
            .context("failed to query issue")?
            .map(IssueRow::into_issue)
            .transpose()
    }

    pub fn list_issues(&self, project_id: i64) -> Result<Vec<Issue>> {
        let sql = format!(
            "{} WHERE project_id = ?1 ORDER BY {}, queued_at DESC",
            ISSUE_SELECT, PRIORITY_RANK_SQL
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("failed to prepare list_issues")?;
        let rows = stmt
            .query_map(params![project_id], issue_row_mapper)
            .context("failed to query issues")?;
        let mut issues = Vec::new();
        for row in rows {
            issues.push(row.context("failed to read issue row")?.into_issue()?);
        }
        Ok(issues)
    }

    /// Apply a status transition with its timestamp side effects. Timestamps
    /// use COALESCE so repeated transitions are idempotent.
    pub fn update_issue_status(&self, id: i64, status: IssueStatus) -> Result<bool> {
        let mut fields = vec!["status = ?1".to_string()];
        if status != IssueStatus::Todo {
            fields.push("queued_agent_id = NULL".to_string());
        }
        match status {
            IssueStatus::InProgress => {
                fields.push("started_at = COALESCE(started_at, datetime('now'))".to_string())
            }
            IssueStatus::Done => {
                fields.push("completed_at = COALESCE(completed_at, datetime('now'))".to_string())
            }
            _ => {}
        }

        let sql = format!("UPDATE issues SET {} WHERE id = ?2", fields.join(", "));
        let count = self
            .conn
            .execute(&sql, params![status.as_str(), id])
            .context("failed to update issue status")?;
        Ok(count > 0)
    }

    pub fn set_assigned_agent(&self, id: i64, agent_id: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE issues SET assigned_agent_id = ?1 WHERE id = ?2",
                params![agent_id, id],
            )
            .context("failed to assign agent")?;
        Ok(())
    }

    /// Put an issue on an agent's queue. An issue that is already queued
    /// keeps its assignment and its `queued_at`, so repeating the same
    /// transition never reorders the queue.
    pub fn queue_issue(&self, id: i64, agent_id: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE issues
                 SET queued_agent_id = COALESCE(queued_agent_id, ?1),
                     queued_at = CASE WHEN queued_agent_id IS NULL THEN ?2 ELSE queued_at END
                 WHERE id = ?3",
                params![agent_id, now_utc(), id],
            )
            .context("failed to queue issue")?;
        Ok(())
    }

    /// Atomically claim the next ready issue: highest priority first,
    /// earliest queued as tiebreaker. The conditional UPDATE only wins while
    /// the row is still `todo`; losing the race returns `None`.
    pub fn claim_next_queued_issue(&self) -> Result<Option<ClaimedIssue>> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("failed to begin claim transaction")?;

        let sql = format!(
            "SELECT id, project_id, queued_agent_id, title, description, priority
             FROM issues
             WHERE status = 'todo' AND queued_agent_id IS NOT NULL
             ORDER BY {}, queued_at ASC
             LIMIT 1",
            PRIORITY_RANK_SQL
        );
        let candidate = tx
            .query_row(&sql, [], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })
            .optional()
            .context("failed to query queued issues")?;

        let (id, project_id, agent_id, title, description, priority) = match candidate {
            Some(row) => row,
            None => return Ok(None),
        };

        let count = tx
            .execute(
                "UPDATE issues
                 SET status = 'inProgress',
                     started_at = COALESCE(started_at, datetime('now')),
                     assigned_agent_id = COALESCE(assigned_agent_id, queued_agent_id),
                     queued_agent_id = NULL
                 WHERE id = ?1 AND status = 'todo'",
                params![id],
            )
            .context("failed to claim issue")?;
        tx.commit().context("failed to commit claim")?;

        if count == 0 {
            // Lost the race to a concurrent actor.
            return Ok(None);
        }

        let priority = Priority::from_str(&priority)
            .map_err(|e| anyhow::anyhow!(e))
            .context("failed to parse claimed issue priority")?;
        Ok(Some(ClaimedIssue {
            id,
            project_id,
            agent_id,
            title,
            description,
            priority,
        }))
    }

    /// Mark an issue done. Returns false when it was already done (the
    /// caller then skips the broadcast).
    pub fn complete_issue(&self, id: i64) -> Result<bool> {
        let count = self
            .conn
            .execute(
                "UPDATE issues
                 SET status = 'done',
                     completed_at = COALESCE(completed_at, datetime('now')),
                     queued_agent_id = NULL
                 WHERE id = ?1 AND status != 'done'",
                params![id],
            )
            .context("failed to complete issue")?;
        Ok(count > 0)
    }

    pub fn delete_issue(&self, id: i64) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM issues WHERE id = ?1", params![id])
            .context("failed to delete issue")?;
        Ok(count > 0)
    }

    // ── Queue statistics ──────────────────────────────────────────────

    /// Per-agent queue/status snapshot. Every default agent appears even at
    /// zero counts so clients can render a stable grid.
    pub fn collect_queue_stats(&self, project_id: i64) -> Result<Vec<QueueStat>> {
        let mut stats: Vec<QueueStat> = DEFAULT_AGENTS
            .iter()
            .map(|agent| QueueStat::idle(project_id, agent.as_str()))
            .collect();

        let ensure_entry = |stats: &mut Vec<QueueStat>, agent_id: &str| -> usize {
            if let Some(pos) = stats.iter().position(|s| s.agent_id == agent_id) {
                return pos;
            }
            stats.push(QueueStat::idle(project_id, agent_id));
            stats.len() - 1
        };

        let mut stmt = self
            .conn
            .prepare(
                "SELECT queued_agent_id, COUNT(*)
                 FROM issues
                 WHERE project_id = ?1 AND status = 'todo' AND queued_agent_id IS NOT NULL
                 GROUP BY queued_agent_id",
            )
            .context("failed to prepare queue depth query")?;
        let rows = stmt
            .query_map(params![project_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .context("failed to query queue depths")?;
        for row in rows {
            let (agent_id, count) = row.context("failed to read queue depth row")?;
            let pos = ensure_entry(&mut stats, &agent_id);
            stats[pos].queue_depth = count;
        }

        let mut stmt = self
            .conn
            .prepare(
                "SELECT assigned_agent_id, COUNT(*)
                 FROM issues
                 WHERE project_id = ?1 AND status = 'inProgress' AND assigned_agent_id IS NOT NULL
                 GROUP BY assigned_agent_id",
            )
            .context("failed to prepare in-progress query")?;
        let rows = stmt
            .query_map(params![project_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .context("failed to query in-progress counts")?;
        for row in rows {
            let (agent_id, count) = row.context("failed to read in-progress row")?;
            let pos = ensure_entry(&mut stats, &agent_id);
            stats[pos].in_progress = count;
        }

        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, title, assigned_agent_id
                 FROM issues
                 WHERE project_id = ?1 AND status = 'inProgress' AND assigned_agent_id IS NOT NULL
                 ORDER BY started_at ASC",
            )
            .context("failed to prepare current issue query")?;
        let rows = stmt
            .query_map(params![project_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .context("failed to query current issues")?;
        for row in rows {
            let (issue_id, title, agent_id) = row.context("failed to read current issue row")?;
            let pos = ensure_entry(&mut stats, &agent_id);
            if stats[pos].current_issue_id.is_none() {
                stats[pos].current_issue_id = Some(issue_id);
                stats[pos].current_issue_title = Some(title);
            }
        }

        for stat in &mut stats {
            stat.derive_status();
        }
        Ok(stats)
    }

    // ── Messages ──────────────────────────────────────────────────────

    pub fn create_message(&self, new: &NewMessage) -> Result<Message> {
        let metadata_json = match &new.metadata {
            Some(md) if !md.is_empty() => {
                Some(serde_json::to_string(md).context("failed to marshal message metadata")?)
            }
            _ => None,
        };
        self.conn
            .execute(
                "INSERT INTO messages (project_id, sender_id, sender_type, content, message_type, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    new.project_id,
                    new.sender_id,
                    new.sender_type.as_str(),
                    new.content,
                    new.message_type.as_str(),
                    metadata_json,
                ],
            )
            .context("failed to insert message")?;
        let id = self.conn.last_insert_rowid();
        self.get_message(id)?
            .context("message not found after insert")
    }

    pub fn get_message(&self, id: i64) -> Result<Option<Message>> {
        self.conn
            .query_row(
                "SELECT id, project_id, sender_id, sender_type, content, message_type, metadata, timestamp
                 FROM messages WHERE id = ?1",
                params![id],
                |row| {
                    Ok(MessageRow {
                        id: row.get(0)?,
                        project_id: row.get(1)?,
                        sender_id: row.get(2)?,
                        sender_type: row.get(3)?,
                        content: row.get(4)?,
                        message_type: row.get(5)?,
                        metadata: row.get(6)?,
                        timestamp: row.get(7)?,
                    })
                },
            )
            .optional()
            .context("failed to query message")?
            .map(MessageRow::into_message)
            .transpose()
    }

    // ── Dialogs ───────────────────────────────────────────────────────

    pub fn create_dialog(&self, new: &NewDialog) -> Result<Dialog> {
        let options_json =
            serde_json::to_string(&new.options).context("failed to marshal dialog options")?;
        self.conn
            .execute(
                "INSERT INTO dialogs (project_id, agent_id, issue_id, title, message, options, default_option, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'open')",
                params![
                    new.project_id,
                    new.agent_id,
                    new.issue_id,
                    new.title,
                    new.message,
                    options_json,
                    new.default_option,
                ],
            )
            .context("failed to insert dialog")?;
        let id = self.conn.last_insert_rowid();
        self.get_dialog(id)?
            .context("dialog not found after insert")
    }

    pub fn get_dialog(&self, id: i64) -> Result<Option<Dialog>> {
        self.conn
            .query_row(
                &format!("{} WHERE id = ?1", DIALOG_SELECT),
                params![id],
                dialog_row_mapper,
            )
            .optional()
            .context("failed to query dialog")?
            .map(DialogRow::into_dialog)
            .transpose()
    }

    pub fn list_dialogs(&self, project_id: i64) -> Result<Vec<Dialog>> {
        let sql = format!(
            "{} WHERE project_id = ?1 ORDER BY created_at DESC, id DESC",
            DIALOG_SELECT
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("failed to prepare list_dialogs")?;
        let rows = stmt
            .query_map(params![project_id], dialog_row_mapper)
            .context("failed to query dialogs")?;
        let mut dialogs = Vec::new();
        for row in rows {
            dialogs.push(row.context("failed to read dialog row")?.into_dialog()?);
        }
        Ok(dialogs)
    }

    /// Conditionally resolve a dialog. Returns false when another responder
    /// won the race (the row is no longer open).
    pub fn resolve_dialog(&self, id: i64, selected: &str, responded_by: &str) -> Result<bool> {
        let count = self
            .conn
            .execute(
                "UPDATE dialogs
                 SET status = 'resolved', selected_option = ?1, responded_by = ?2,
                     responded_at = ?3
                 WHERE id = ?4 AND status = 'open'",
                params![selected, responded_by, now_utc(), id],
            )
            .context("failed to resolve dialog")?;
        Ok(count > 0)
    }
}

// ── Row helpers ───────────────────────────────────────────────────────

const ISSUE_SELECT: &str = "SELECT id, project_id, title, description, priority, status,
        created_by, created_by_type, assigned_agent_id, queued_agent_id,
        queued_at, started_at, completed_at, tags, created_at
 FROM issues";

struct IssueRow {
    id: i64,
    project_id: i64,
    title: String,
    description: String,
    priority: String,
    status: String,
    created_by: String,
    created_by_type: String,
    assigned_agent_id: Option<String>,
    queued_agent_id: Option<String>,
    queued_at: Option<String>,
    started_at: Option<String>,
    completed_at: Option<String>,
    tags: Option<String>,
    created_at: String,
}

fn issue_row_mapper(row: &rusqlite::Row<'_>) -> rusqlite::Result<IssueRow> {
    Ok(IssueRow {
        id: row.get(0)?,
        project_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        priority: row.get(4)?,
        status: row.get(5)?,
        created_by: row.get(6)?,
        created_by_type: row.get(7)?,
        assigned_agent_id: row.get(8)?,
        queued_agent_id: row.get(9)?,
        queued_at: row.get(10)?,
        started_at: row.get(11)?,
        completed_at: row.get(12)?,
        tags: row.get(13)?,
        created_at: row.get(14)?,
    })
}

impl IssueRow {
    fn into_issue(self) -> Result<Issue> {
        let priority = Priority::from_str(&self.priority)
            .map_err(|e| anyhow::anyhow!(e))
            .context("failed to parse issue priority")?;
        let status = IssueStatus::from_str(&self.status)
            .map_err(|e| anyhow::anyhow!(e))
            .context("failed to parse issue status")?;
        let created_by_type = SenderType::from_str(&self.created_by_type)
            .map_err(|e| anyhow::anyhow!(e))
            .context("failed to parse issue creator type")?;

        Ok(Issue {
            id: self.id,
            project_id: self.project_id,
            title: self.title,
            description: self.description,
            priority,
            status,
            created_by: self.created_by,
            created_by_type,
            assigned_agent_id: self.assigned_agent_id,
            queued_agent_id: self.queued_agent_id,
            queued_at: self.queued_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            tags: self.tags,
            created_at: self.created_at,
        })
    }
}

struct ProjectRow {
    id: i64,
    name: String,
    description: String,
    settings: Option<String>,
    created_at: String,
}

impl ProjectRow {
    fn into_project(self) -> Result<Project> {
        let settings = match self.settings {
            Some(json) if !json.trim().is_empty() => Some(
                serde_json::from_str(&json)
                    .with_context(|| format!("corrupt settings JSON for project {}", self.id))?,
            ),
            _ => None,
        };
        Ok(Project {
            id: self.id,
            name: self.name,
            description: self.description,
            settings,
            created_at: self.created_at,
        })
    }
}

struct MessageRow {
    id: i64,
    project_id: i64,
    sender_id: String,
    sender_type: String,
    content: String,
    message_type: String,
    metadata: Option<String>,
    timestamp: String,
}

impl MessageRow {
    fn into_message(self) -> Result<Message> {
        let sender_type = SenderType::from_str(&self.sender_type)
            .map_err(|e| anyhow::anyhow!(e))
            .context("failed to parse sender type")?;
        let message_type = MessageType::from_str(&self.message_type)
            .map_err(|e| anyhow::anyhow!(e))
            .context("failed to parse message type")?;
        let metadata = match self.metadata {
            Some(json) if !json.trim().is_empty() => Some(
                serde_json::from_str(&json)
                    .with_context(|| format!("corrupt metadata JSON for message {}", self.id))?,
            ),
            _ => None,
        };
        Ok(Message {
            id: self.id,
            project_id: self.project_id,
            sender_id: self.sender_id,
            sender_type,
            content: self.content,
            message_type,
            metadata,
            timestamp: self.timestamp,
        })
    }
}

const DIALOG_SELECT: &str = "SELECT id, project_id, agent_id, issue_id, title, message, options,
        default_option, status, selected_option, responded_by, responded_at, created_at
 FROM dialogs";

struct DialogRow {
    id: i64,
    project_id: i64,
    agent_id: String,
    issue_id: Option<i64>,
    title: String,
    message: String,
    options: String,
    default_option: String,
    status: String,
    selected_option: Option<String>,
    responded_by: Option<String>,
    responded_at: Option<String>,
    created_at: String,
}

fn dialog_row_mapper(row: &rusqlite::Row<'_>) -> rusqlite::Result<DialogRow> {
    Ok(DialogRow {
        id: row.get(0)?,
        project_id: row.get(1)?,
        agent_id: row.get(2)?,
        issue_id: row.get(3)?,
        title: row.get(4)?,
        message: row.get(5)?,
        options: row.get(6)?,
        default_option: row.get(7)?,
        status: row.get(8)?,
        selected_option: row.get(9)?,
        responded_by: row.get(10)?,
        responded_at: row.get(11)?,
        created_at: row.get(12)?,
    })
}

impl DialogRow {
    fn into_dialog(self) -> Result<Dialog> {
        let status = DialogStatus::from_str(&self.status)
            .map_err(|e| anyhow::anyhow!(e))
            .context("failed to parse dialog status")?;
        let options: Vec<String> = serde_json::from_str(&self.options)
            .with_context(|| format!("corrupt options JSON for dialog {}", self.id))?;
        Ok(Dialog {
            id: self.id,
            project_id: self.project_id,
            agent_id: self.agent_id,
            issue_id: self.issue_id,
            title: self.title,
            message: self.message,
            options,
            default_option: self.default_option,
            status,
            selected_option: self.selected_option,
            responded_by: self.responded_by,
            responded_at: self.responded_at,
            created_at: self.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_db() -> (Db, i64) {
        let db = Db::new_in_memory().unwrap();
        let project = db.create_project("alpha", "test project").unwrap();
        (db, project.id)
    }

    fn todo_issue(project_id: i64, title: &str, priority: Priority, agent: &str) -> NewIssue {
        NewIssue {
            project_id,
            title: title.to_string(),
            description: String::new(),
            priority,
            status: IssueStatus::Todo,
            created_by: "u1".to_string(),
            created_by_type: SenderType::User,
            assigned_agent_id: None,
            queued_agent_id: Some(agent.to_string()),
            tags: None,
        }
    }

    #[test]
    fn migrations_create_all_tables() {
        let db = Db::new_in_memory().unwrap();
        let count: i64 = db
            .conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table'
                 AND name IN ('projects', 'issues', 'messages', 'dialogs')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 4);
    }

    #[test]
    fn legacy_issue_table_gains_columns_with_backfill() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE projects (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 name TEXT NOT NULL,
                 description TEXT NOT NULL DEFAULT '',
                 settings TEXT,
                 created_at TEXT NOT NULL DEFAULT (datetime('now'))
             );
             CREATE TABLE issues (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 project_id INTEGER NOT NULL,
                 title TEXT NOT NULL,
                 description TEXT NOT NULL DEFAULT '',
                 priority TEXT NOT NULL DEFAULT 'medium',
                 status TEXT NOT NULL DEFAULT 'proposed',
                 created_by TEXT NOT NULL DEFAULT '',
                 created_by_type TEXT NOT NULL DEFAULT 'user',
                 assigned_agent_id TEXT,
                 queued_at TEXT,
                 started_at TEXT,
                 completed_at TEXT,
                 tags TEXT
             );
             INSERT INTO projects (name) VALUES ('legacy');
             INSERT INTO issues (project_id, title, queued_at)
                 VALUES (1, 'old row', '2023-01-01 00:00:00');",
        )
        .unwrap();

        let db = Db { conn };
        db.init().unwrap();

        let issue = db.get_issue(1).unwrap().unwrap();
        assert_eq!(issue.created_at, "2023-01-01 00:00:00");
        assert!(issue.queued_agent_id.is_none());
    }

    #[test]
    fn create_and_fetch_issue() {
        let (db, project_id) = seeded_db();
        let issue = db
            .create_issue(&todo_issue(project_id, "API schema", Priority::High, "backend_architect"))
            .unwrap();
        assert!(issue.id > 0);
        assert_eq!(issue.status, IssueStatus::Todo);
        assert_eq!(issue.queued_agent_id.as_deref(), Some("backend_architect"));
        assert!(issue.queued_at.is_some());
        assert!(!issue.created_at.is_empty());
    }

    #[test]
    fn claim_prefers_priority_then_queue_order() {
        let (db, project_id) = seeded_db();
        db.create_issue(&todo_issue(project_id, "low", Priority::Low, "qa_tester"))
            .unwrap();
        db.create_issue(&todo_issue(project_id, "urgent", Priority::Urgent, "qa_tester"))
            .unwrap();
        db.create_issue(&todo_issue(project_id, "high", Priority::High, "qa_tester"))
            .unwrap();

        let claimed = db.claim_next_queued_issue().unwrap().unwrap();
        assert_eq!(claimed.title, "urgent");
        assert_eq!(claimed.priority, Priority::Urgent);

        let claimed = db.claim_next_queued_issue().unwrap().unwrap();
        assert_eq!(claimed.title, "high");
    }

    #[test]
    fn claim_at_equal_priority_takes_earliest_queued() {
        let (db, project_id) = seeded_db();
        let first = db
            .create_issue(&todo_issue(project_id, "first", Priority::Medium, "qa_tester"))
            .unwrap();
        // Force a strictly earlier queue time for the first issue.
        db.conn
            .execute(
                "UPDATE issues SET queued_at = datetime('now', '-1 hour') WHERE id = ?1",
                params![first.id],
            )
            .unwrap();
        db.create_issue(&todo_issue(project_id, "second", Priority::Medium, "qa_tester"))
            .unwrap();

        let claimed = db.claim_next_queued_issue().unwrap().unwrap();
        assert_eq!(claimed.title, "first");
    }

    #[test]
    fn claim_transitions_and_is_exclusive() {
        let (db, project_id) = seeded_db();
        let issue = db
            .create_issue(&todo_issue(project_id, "only", Priority::Medium, "qa_tester"))
            .unwrap();

        let claimed = db.claim_next_queued_issue().unwrap().unwrap();
        assert_eq!(claimed.id, issue.id);

        let fresh = db.get_issue(issue.id).unwrap().unwrap();
        assert_eq!(fresh.status, IssueStatus::InProgress);
        assert!(fresh.started_at.is_some());
        assert_eq!(fresh.assigned_agent_id.as_deref(), Some("qa_tester"));
        assert!(fresh.queued_agent_id.is_none());

        // Nothing queued remains: subsequent claim finds no issue.
        assert!(db.claim_next_queued_issue().unwrap().is_none());
    }

    #[test]
    fn status_update_is_idempotent_on_timestamps() {
        let (db, project_id) = seeded_db();
        let issue = db
            .create_issue(&todo_issue(project_id, "t", Priority::Medium, "qa_tester"))
            .unwrap();

        db.update_issue_status(issue.id, IssueStatus::InProgress)
            .unwrap();
        let first = db.get_issue(issue.id).unwrap().unwrap();
        db.conn
            .execute(
                "UPDATE issues SET started_at = '2020-01-01 00:00:00' WHERE id = ?1",
                params![issue.id],
            )
            .unwrap();

        db.update_issue_status(issue.id, IssueStatus::InProgress)
            .unwrap();
        let second = db.get_issue(issue.id).unwrap().unwrap();
        assert_eq!(second.started_at.as_deref(), Some("2020-01-01 00:00:00"));
        assert_eq!(first.status, second.status);
    }

    #[test]
    fn repeated_todo_transition_keeps_queue_timestamp() {
        let (db, project_id) = seeded_db();
        let issue = db
            .create_issue(&todo_issue(project_id, "t", Priority::Medium, "qa_tester"))
            .unwrap();
        db.conn
            .execute(
                "UPDATE issues SET queued_at = '2020-01-01 00:00:00' WHERE id = ?1",
                params![issue.id],
            )
            .unwrap();

        // The same transition the status handler performs, applied twice.
        for _ in 0..2 {
            db.update_issue_status(issue.id, IssueStatus::Todo).unwrap();
            db.queue_issue(issue.id, "qa_tester").unwrap();
        }

        let fresh = db.get_issue(issue.id).unwrap().unwrap();
        assert_eq!(fresh.status, IssueStatus::Todo);
        assert_eq!(fresh.queued_at.as_deref(), Some("2020-01-01 00:00:00"));
        assert_eq!(fresh.queued_agent_id.as_deref(), Some("qa_tester"));
    }

    #[test]
    fn queue_issue_keeps_existing_assignment() {
        let (db, project_id) = seeded_db();
        let issue = db
            .create_issue(&todo_issue(project_id, "t", Priority::Medium, "qa_tester"))
            .unwrap();
        db.conn
            .execute(
                "UPDATE issues SET queued_at = '2020-01-01 00:00:00' WHERE id = ?1",
                params![issue.id],
            )
            .unwrap();

        db.queue_issue(issue.id, "backend_architect").unwrap();

        let fresh = db.get_issue(issue.id).unwrap().unwrap();
        assert_eq!(fresh.queued_agent_id.as_deref(), Some("qa_tester"));
        assert_eq!(fresh.queued_at.as_deref(), Some("2020-01-01 00:00:00"));
    }

    #[test]
    fn requeue_after_leaving_todo_stamps_fresh_time() {
        let (db, project_id) = seeded_db();
        let issue = db
            .create_issue(&todo_issue(project_id, "t", Priority::Medium, "qa_tester"))
            .unwrap();
        db.conn
            .execute(
                "UPDATE issues SET queued_at = '2020-01-01 00:00:00' WHERE id = ?1",
                params![issue.id],
            )
            .unwrap();

        // Leaving todo clears the queue assignment; coming back is a real
        // transition and gets a new queue timestamp.
        db.update_issue_status(issue.id, IssueStatus::Review).unwrap();
        db.update_issue_status(issue.id, IssueStatus::Todo).unwrap();
        db.queue_issue(issue.id, "qa_tester").unwrap();

        let fresh = db.get_issue(issue.id).unwrap().unwrap();
        assert_eq!(fresh.queued_agent_id.as_deref(), Some("qa_tester"));
        assert_ne!(fresh.queued_at.as_deref(), Some("2020-01-01 00:00:00"));
    }

    #[test]
    fn leaving_todo_clears_queue_assignment() {
        let (db, project_id) = seeded_db();
        let issue = db
            .create_issue(&todo_issue(project_id, "t", Priority::Medium, "qa_tester"))
            .unwrap();

        db.update_issue_status(issue.id, IssueStatus::Review).unwrap();
        let fresh = db.get_issue(issue.id).unwrap().unwrap();
        assert_eq!(fresh.status, IssueStatus::Review);
        assert!(fresh.queued_agent_id.is_none());
    }

    #[test]
    fn complete_issue_only_fires_once() {
        let (db, project_id) = seeded_db();
        let issue = db
            .create_issue(&todo_issue(project_id, "t", Priority::Medium, "qa_tester"))
            .unwrap();

        assert!(db.complete_issue(issue.id).unwrap());
        assert!(!db.complete_issue(issue.id).unwrap());

        let fresh = db.get_issue(issue.id).unwrap().unwrap();
        assert_eq!(fresh.status, IssueStatus::Done);
        assert!(fresh.completed_at.is_some());
        assert!(fresh.queued_agent_id.is_none());
    }

    #[test]
    fn queue_stats_always_cover_default_agents() {
        let (db, project_id) = seeded_db();
        let stats = db.collect_queue_stats(project_id).unwrap();
        assert_eq!(stats.len(), DEFAULT_AGENTS.len());
        assert!(stats.iter().all(|s| s.status == AgentActivity::Idle));

        db.create_issue(&todo_issue(project_id, "q1", Priority::Medium, "qa_tester"))
            .unwrap();
        db.create_issue(&todo_issue(project_id, "q2", Priority::Medium, "qa_tester"))
            .unwrap();
        db.claim_next_queued_issue().unwrap().unwrap();

        let stats = db.collect_queue_stats(project_id).unwrap();
        let qa = stats.iter().find(|s| s.agent_id == "qa_tester").unwrap();
        assert_eq!(qa.queue_depth, 1);
        assert_eq!(qa.in_progress, 1);
        assert_eq!(qa.status, AgentActivity::Working);
        assert_eq!(qa.current_issue_title.as_deref(), Some("q1"));

        let pm = stats.iter().find(|s| s.agent_id == "product_manager").unwrap();
        assert_eq!(pm.status, AgentActivity::Idle);
    }

    #[test]
    fn message_metadata_roundtrips() {
        let (db, project_id) = seeded_db();
        let message = db
            .create_message(&NewMessage {
                project_id,
                sender_id: "backend_architect".to_string(),
                sender_type: SenderType::Agent,
                content: "done".to_string(),
                message_type: MessageType::Chat,
                metadata: Some(MessageMetadata {
                    workspace_path: Some("data/projects/1".to_string()),
                    notes: Some(vec!["seeded readme".to_string()]),
                    plan: None,
                    git: None,
                }),
            })
            .unwrap();

        let fetched = db.get_message(message.id).unwrap().unwrap();
        let metadata = fetched.metadata.unwrap();
        assert_eq!(metadata.workspace_path.as_deref(), Some("data/projects/1"));
        assert_eq!(metadata.notes.unwrap(), vec!["seeded readme"]);
    }

    #[test]
    fn empty_metadata_is_stored_as_null() {
        let (db, project_id) = seeded_db();
        let message = db
            .create_message(&NewMessage {
                project_id,
                sender_id: "u1".to_string(),
                sender_type: SenderType::User,
                content: "hi".to_string(),
                message_type: MessageType::Chat,
                metadata: Some(MessageMetadata::default()),
            })
            .unwrap();
        assert!(message.metadata.is_none());
    }

    #[test]
    fn dialog_resolution_is_single_direction() {
        let (db, project_id) = seeded_db();
        let dialog = db
            .create_dialog(&NewDialog {
                project_id,
                agent_id: "backend_architect".to_string(),
                issue_id: None,
                title: "Auth".to_string(),
                message: "Which?".to_string(),
                options: vec!["A".to_string(), "B".to_string()],
                default_option: "A".to_string(),
            })
            .unwrap();
        assert_eq!(dialog.status, DialogStatus::Open);

        assert!(db.resolve_dialog(dialog.id, "B", "u1").unwrap());
        let fresh = db.get_dialog(dialog.id).unwrap().unwrap();
        assert_eq!(fresh.status, DialogStatus::Resolved);
        assert_eq!(fresh.selected_option.as_deref(), Some("B"));
        assert_eq!(fresh.responded_by.as_deref(), Some("u1"));
        assert!(fresh.responded_at.is_some());

        // Second resolve loses the conditional update.
        assert!(!db.resolve_dialog(dialog.id, "A", "u2").unwrap());
    }

    #[test]
    fn settings_roundtrip_through_project_row() {
        let (db, project_id) = seeded_db();
        assert!(db.load_settings(project_id).unwrap().is_none());

        let settings = WorkspaceSettings {
            workspace_path: "data/projects/1".to_string(),
            repo_type: Some("init".to_string()),
            repo_url: None,
        };
        db.save_settings(project_id, &settings).unwrap();
        assert_eq!(db.load_settings(project_id).unwrap().unwrap(), settings);
    }

    #[test]
    fn list_issues_orders_by_priority() {
        let (db, project_id) = seeded_db();
        db.create_issue(&todo_issue(project_id, "low", Priority::Low, "qa_tester"))
            .unwrap();
        db.create_issue(&todo_issue(project_id, "urgent", Priority::Urgent, "qa_tester"))
            .unwrap();

        let issues = db.list_issues(project_id).unwrap();
        assert_eq!(issues[0].title, "urgent");
        assert_eq!(issues[1].title, "low");
    }
}
