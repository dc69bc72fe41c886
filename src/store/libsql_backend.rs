//! libSQL backend — async `Database` trait implementation.
//!
//! Supports local file and in-memory databases. Besides the engine-facing
//! trait, the backend carries inherent seeding helpers used by catalog
//! tooling and tests; the engine itself never writes catalog rows.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::catalog::{Agent, Difficulty, Domain, Task, TaskKind};
use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::{
    DailyTaskList, Database, EntryStatus, ListPlan, RotationRecord, TaskEntry,
};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
    /// Serializes transactional writes. The connection is shared, and
    /// SQLite transactions cannot nest.
    write_lock: tokio::sync::Mutex<()>,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
            write_lock: tokio::sync::Mutex::new(()),
        };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
            write_lock: tokio::sync::Mutex::new(()),
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse a stored `YYYY-MM-DD` date.
fn parse_date(s: &str) -> Result<NaiveDate, DatabaseError> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| DatabaseError::Query(format!("Bad date '{s}': {e}")))
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn kind_to_str(kind: TaskKind) -> &'static str {
    match kind {
        TaskKind::Fixed => "fixed",
        TaskKind::Rotating => "rotating",
    }
}

fn str_to_kind(s: &str) -> TaskKind {
    match s {
        "fixed" => TaskKind::Fixed,
        _ => TaskKind::Rotating,
    }
}

fn difficulty_to_str(d: Difficulty) -> &'static str {
    match d {
        Difficulty::Easy => "easy",
        Difficulty::Medium => "medium",
        Difficulty::Hard => "hard",
    }
}

fn str_to_difficulty(s: &str) -> Difficulty {
    match s {
        "medium" => Difficulty::Medium,
        "hard" => Difficulty::Hard,
        _ => Difficulty::Easy,
    }
}

fn status_to_str(status: EntryStatus) -> &'static str {
    match status {
        EntryStatus::Pending => "pending",
        EntryStatus::Completed => "completed",
        EntryStatus::Reviewed => "reviewed",
    }
}

fn str_to_status(s: &str) -> EntryStatus {
    match s {
        "completed" => EntryStatus::Completed,
        "reviewed" => EntryStatus::Reviewed,
        _ => EntryStatus::Pending,
    }
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

/// Convert `Option<u32>` to libsql Value.
fn opt_int(n: Option<u32>) -> libsql::Value {
    match n {
        Some(n) => libsql::Value::Integer(n as i64),
        None => libsql::Value::Null,
    }
}

fn parse_uuid(s: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(s).map_err(|e| DatabaseError::Query(format!("Bad uuid '{s}': {e}")))
}

/// Wrap a libsql write error, distinguishing unique-constraint races.
fn write_error(op: &str, e: libsql::Error) -> DatabaseError {
    let msg = e.to_string();
    if msg.contains("UNIQUE constraint failed") {
        DatabaseError::Constraint(format!("{op}: {msg}"))
    } else {
        DatabaseError::Query(format!("{op}: {msg}"))
    }
}

fn row_to_domain(row: &libsql::Row) -> Result<Domain, DatabaseError> {
    let id_str: String = row
        .get(0)
        .map_err(|e| DatabaseError::Query(format!("domain row: {e}")))?;
    let name: String = row
        .get(1)
        .map_err(|e| DatabaseError::Query(format!("domain row: {e}")))?;
    let created_str: String = row.get(2).unwrap_or_default();
    Ok(Domain {
        id: parse_uuid(&id_str)?,
        name,
        created_at: parse_datetime(&created_str),
    })
}

fn row_to_agent(row: &libsql::Row) -> Result<Agent, DatabaseError> {
    let id_str: String = row
        .get(0)
        .map_err(|e| DatabaseError::Query(format!("agent row: {e}")))?;
    let domain_str: String = row
        .get(1)
        .map_err(|e| DatabaseError::Query(format!("agent row: {e}")))?;
    let name: String = row
        .get(2)
        .map_err(|e| DatabaseError::Query(format!("agent row: {e}")))?;
    let birth_str: Option<String> = row.get(3).ok();
    let active: i64 = row.get(4).unwrap_or(0);

    let birth_date = match birth_str {
        Some(s) => Some(parse_date(&s)?),
        None => None,
    };

    Ok(Agent {
        id: parse_uuid(&id_str)?,
        domain_id: parse_uuid(&domain_str)?,
        name,
        birth_date,
        active: active != 0,
    })
}

fn row_to_task(row: &libsql::Row) -> Result<Task, DatabaseError> {
    let id_str: String = row
        .get(0)
        .map_err(|e| DatabaseError::Query(format!("task row: {e}")))?;
    let domain_str: String = row
        .get(1)
        .map_err(|e| DatabaseError::Query(format!("task row: {e}")))?;
    let title: String = row
        .get(2)
        .map_err(|e| DatabaseError::Query(format!("task row: {e}")))?;
    let kind_str: String = row.get(3).unwrap_or_else(|_| "rotating".into());
    let difficulty_str: String = row.get(4).unwrap_or_else(|_| "easy".into());
    let min_age: Option<i64> = row.get(5).ok();
    let max_age: Option<i64> = row.get(6).ok();
    let position: i64 = row.get(7).unwrap_or(0);
    let active: i64 = row.get(8).unwrap_or(0);
    let estimated_minutes: Option<i64> = row.get(9).ok();

    Ok(Task {
        id: parse_uuid(&id_str)?,
        domain_id: parse_uuid(&domain_str)?,
        title,
        kind: str_to_kind(&kind_str),
        difficulty: str_to_difficulty(&difficulty_str),
        min_age: min_age.map(|n| n as u32),
        max_age: max_age.map(|n| n as u32),
        estimated_minutes: estimated_minutes.map(|n| n as u32),
        position,
        active: active != 0,
        fixed_assignees: Vec::new(),
    })
}

const TASK_COLUMNS: &str =
    "id, domain_id, title, kind, difficulty, min_age, max_age, position, active, estimated_minutes";

const AGENT_COLUMNS: &str = "id, domain_id, name, birth_date, active";

// ── Seeding helpers (catalog tooling and tests) ─────────────────────

impl LibSqlBackend {
    /// Create a domain.
    pub async fn create_domain(&self, name: &str) -> Result<Domain, DatabaseError> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        self.conn()
            .execute(
                "INSERT INTO domains (id, name, created_at) VALUES (?1, ?2, ?3)",
                params![id.to_string(), name, now.to_rfc3339()],
            )
            .await
            .map_err(|e| write_error("create_domain", e))?;
        Ok(Domain {
            id,
            name: name.to_string(),
            created_at: now,
        })
    }

    /// Insert an agent row as given.
    pub async fn insert_agent(&self, agent: &Agent) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO agents (id, domain_id, name, birth_date, active) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    agent.id.to_string(),
                    agent.domain_id.to_string(),
                    agent.name.clone(),
                    opt_text(agent.birth_date.map(|d| d.to_string()).as_deref()),
                    agent.active as i64,
                ],
            )
            .await
            .map_err(|e| write_error("insert_agent", e))?;
        Ok(())
    }

    /// Insert a task row as given, including its fixed bindings.
    pub async fn insert_task(&self, task: &Task) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO tasks (id, domain_id, title, kind, difficulty, min_age, max_age, position, active, estimated_minutes) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    task.id.to_string(),
                    task.domain_id.to_string(),
                    task.title.clone(),
                    kind_to_str(task.kind),
                    difficulty_to_str(task.difficulty),
                    opt_int(task.min_age),
                    opt_int(task.max_age),
                    task.position,
                    task.active as i64,
                    opt_int(task.estimated_minutes),
                ],
            )
            .await
            .map_err(|e| write_error("insert_task", e))?;

        for agent_id in &task.fixed_assignees {
            self.conn()
                .execute(
                    "INSERT INTO task_assignees (task_id, agent_id) VALUES (?1, ?2)",
                    params![task.id.to_string(), agent_id.to_string()],
                )
                .await
                .map_err(|e| write_error("insert_task binding", e))?;
        }
        Ok(())
    }

    /// Flip a task's active flag.
    pub async fn set_task_active(&self, task_id: Uuid, active: bool) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE tasks SET active = ?1 WHERE id = ?2",
                params![active as i64, task_id.to_string()],
            )
            .await
            .map_err(|e| write_error("set_task_active", e))?;
        Ok(())
    }

    /// Flip an agent's active flag.
    pub async fn set_agent_active(
        &self,
        agent_id: Uuid,
        active: bool,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE agents SET active = ?1 WHERE id = ?2",
                params![active as i64, agent_id.to_string()],
            )
            .await
            .map_err(|e| write_error("set_agent_active", e))?;
        Ok(())
    }

    /// Append a single rotation record (history seeding for tests).
    pub async fn insert_rotation(
        &self,
        task_id: Uuid,
        agent_id: Uuid,
        date: NaiveDate,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO rotations (id, task_id, agent_id, assigned_date) VALUES (?1, ?2, ?3, ?4)",
                params![
                    Uuid::new_v4().to_string(),
                    task_id.to_string(),
                    agent_id.to_string(),
                    date.to_string(),
                ],
            )
            .await
            .map_err(|e| write_error("insert_rotation", e))?;
        Ok(())
    }
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Catalog reads ───────────────────────────────────────────────

    async fn list_domains(&self) -> Result<Vec<Domain>, DatabaseError> {
        let mut rows = self
            .conn()
            .query("SELECT id, name, created_at FROM domains ORDER BY created_at, id", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("list_domains: {e}")))?;

        let mut domains = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_domain(&row) {
                Ok(d) => domains.push(d),
                Err(e) => tracing::warn!("Skipping domain row: {e}"),
            }
        }
        Ok(domains)
    }

    async fn list_agents(&self, domain_id: Uuid) -> Result<Vec<Agent>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {AGENT_COLUMNS} FROM agents WHERE domain_id = ?1 ORDER BY created_at, id"
                ),
                params![domain_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_agents: {e}")))?;

        let mut agents = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_agent(&row) {
                Ok(a) => agents.push(a),
                Err(e) => tracing::warn!("Skipping agent row: {e}"),
            }
        }
        Ok(agents)
    }

    async fn list_active_tasks(&self, domain_id: Uuid) -> Result<Vec<Task>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {TASK_COLUMNS} FROM tasks WHERE domain_id = ?1 AND active = 1 ORDER BY position, created_at, id"
                ),
                params![domain_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_active_tasks: {e}")))?;

        let mut tasks = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_task(&row) {
                Ok(t) => tasks.push(t),
                Err(e) => tracing::warn!("Skipping task row: {e}"),
            }
        }

        // Attach fixed bindings
        for task in tasks.iter_mut().filter(|t| t.kind == TaskKind::Fixed) {
            let mut rows = self
                .conn()
                .query(
                    "SELECT agent_id FROM task_assignees WHERE task_id = ?1 ORDER BY agent_id",
                    params![task.id.to_string()],
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("list_active_tasks bindings: {e}")))?;
            while let Ok(Some(row)) = rows.next().await {
                let agent_str: String = row.get(0).unwrap_or_default();
                task.fixed_assignees.push(parse_uuid(&agent_str)?);
            }
        }

        Ok(tasks)
    }

    // ── Rotation history ────────────────────────────────────────────

    async fn count_recent_rotations(
        &self,
        task_id: Uuid,
        agent_ids: &[Uuid],
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<HashMap<Uuid, u32>, DatabaseError> {
        // Dates are stored as YYYY-MM-DD, so string comparison is date order.
        let mut rows = self
            .conn()
            .query(
                "SELECT agent_id, COUNT(*) FROM rotations
                 WHERE task_id = ?1 AND assigned_date >= ?2 AND assigned_date < ?3
                 GROUP BY agent_id",
                params![task_id.to_string(), from.to_string(), to.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("count_recent_rotations: {e}")))?;

        let wanted: HashSet<Uuid> = agent_ids.iter().copied().collect();
        let mut counts: HashMap<Uuid, u32> = agent_ids.iter().map(|id| (*id, 0)).collect();
        while let Ok(Some(row)) = rows.next().await {
            let agent_str: String = row.get(0).unwrap_or_default();
            let count: i64 = row.get(1).unwrap_or(0);
            let agent = parse_uuid(&agent_str)?;
            if wanted.contains(&agent) {
                counts.insert(agent, count as u32);
            }
        }
        Ok(counts)
    }

    async fn last_rotation_date(
        &self,
        task_id: Uuid,
        agent_id: Uuid,
    ) -> Result<Option<NaiveDate>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT MAX(assigned_date) FROM rotations WHERE task_id = ?1 AND agent_id = ?2",
                params![task_id.to_string(), agent_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("last_rotation_date: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let date_str: Option<String> = row.get(0).ok();
                match date_str {
                    Some(s) if !s.is_empty() => Ok(Some(parse_date(&s)?)),
                    _ => Ok(None),
                }
            }
            _ => Ok(None),
        }
    }

    // ── Materialization ─────────────────────────────────────────────

    async fn replace_daily_lists(
        &self,
        domain_id: Uuid,
        date: NaiveDate,
        plan: &ListPlan,
    ) -> Result<(), DatabaseError> {
        // Concurrent domain passes share this connection; hold the write
        // lock for the whole transaction so a second BEGIN never nests.
        let _tx = self.write_lock.lock().await;

        let conn = self.conn();
        conn.execute("BEGIN IMMEDIATE", ())
            .await
            .map_err(|e| write_error("replace_daily_lists begin", e))?;

        match Self::write_plan(conn, domain_id, date, plan).await {
            Ok(()) => {
                conn.execute("COMMIT", ())
                    .await
                    .map_err(|e| write_error("replace_daily_lists commit", e))?;
                debug!(domain_id = %domain_id, %date, lists = plan.lists.len(), "Daily lists replaced");
                Ok(())
            }
            Err(e) => {
                let _ = conn.execute("ROLLBACK", ()).await;
                Err(e)
            }
        }
    }

    // ── Downstream reads ────────────────────────────────────────────

    async fn get_daily_list(
        &self,
        agent_id: Uuid,
        date: NaiveDate,
    ) -> Result<Option<DailyTaskList>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, agent_id, date, generated_at FROM daily_lists
                 WHERE agent_id = ?1 AND date = ?2",
                params![agent_id.to_string(), date.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_daily_list: {e}")))?;

        let row = match rows.next().await {
            Ok(Some(row)) => row,
            Ok(None) => return Ok(None),
            Err(e) => return Err(DatabaseError::Query(format!("get_daily_list: {e}"))),
        };

        let id_str: String = row.get(0).unwrap_or_default();
        let generated_str: String = row.get(3).unwrap_or_default();
        let list_id = parse_uuid(&id_str)?;

        let mut entry_rows = self
            .conn()
            .query(
                "SELECT id, task_id, status FROM daily_list_entries
                 WHERE list_id = ?1 ORDER BY rowid",
                params![list_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_daily_list entries: {e}")))?;

        let mut entries = Vec::new();
        while let Ok(Some(row)) = entry_rows.next().await {
            let entry_id: String = row.get(0).unwrap_or_default();
            let task_str: String = row.get(1).unwrap_or_default();
            let status_str: String = row.get(2).unwrap_or_default();
            entries.push(TaskEntry {
                id: parse_uuid(&entry_id)?,
                task_id: parse_uuid(&task_str)?,
                status: str_to_status(&status_str),
            });
        }

        Ok(Some(DailyTaskList {
            id: list_id,
            agent_id,
            date,
            generated_at: parse_datetime(&generated_str),
            entries,
        }))
    }

    async fn rotations_on(
        &self,
        domain_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<RotationRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT r.task_id, r.agent_id, r.assigned_date FROM rotations r
                 JOIN tasks t ON t.id = r.task_id
                 WHERE t.domain_id = ?1 AND r.assigned_date = ?2
                 ORDER BY r.task_id, r.agent_id",
                params![domain_id.to_string(), date.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("rotations_on: {e}")))?;

        let mut records = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let task_str: String = row.get(0).unwrap_or_default();
            let agent_str: String = row.get(1).unwrap_or_default();
            let date_str: String = row.get(2).unwrap_or_default();
            records.push(RotationRecord {
                task_id: parse_uuid(&task_str)?,
                agent_id: parse_uuid(&agent_str)?,
                assigned_date: parse_date(&date_str)?,
            });
        }
        Ok(records)
    }
}

impl LibSqlBackend {
    /// Body of `replace_daily_lists`, run inside an open transaction.
    async fn write_plan(
        conn: &Connection,
        domain_id: Uuid,
        date: NaiveDate,
        plan: &ListPlan,
    ) -> Result<(), DatabaseError> {
        let domain = domain_id.to_string();
        let day = date.to_string();

        // Clear-and-rebuild: wipe everything this (domain, date) produced
        // on a prior run so regeneration is idempotent.
        conn.execute(
            "DELETE FROM daily_list_entries WHERE list_id IN (
                 SELECT id FROM daily_lists WHERE date = ?2
                 AND agent_id IN (SELECT id FROM agents WHERE domain_id = ?1))",
            params![domain.clone(), day.clone()],
        )
        .await
        .map_err(|e| write_error("clear entries", e))?;

        conn.execute(
            "DELETE FROM daily_lists WHERE date = ?2
             AND agent_id IN (SELECT id FROM agents WHERE domain_id = ?1)",
            params![domain.clone(), day.clone()],
        )
        .await
        .map_err(|e| write_error("clear lists", e))?;

        conn.execute(
            "DELETE FROM rotations WHERE assigned_date = ?2
             AND task_id IN (SELECT id FROM tasks WHERE domain_id = ?1)",
            params![domain.clone(), day.clone()],
        )
        .await
        .map_err(|e| write_error("clear rotations", e))?;

        let generated_at = Utc::now().to_rfc3339();
        for list in &plan.lists {
            let list_id = Uuid::new_v4();
            conn.execute(
                "INSERT INTO daily_lists (id, agent_id, date, generated_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    list_id.to_string(),
                    list.agent_id.to_string(),
                    day.clone(),
                    generated_at.clone(),
                ],
            )
            .await
            .map_err(|e| write_error("insert list", e))?;

            for task_id in &list.task_ids {
                conn.execute(
                    "INSERT INTO daily_list_entries (id, list_id, task_id, status) VALUES (?1, ?2, ?3, ?4)",
                    params![
                        Uuid::new_v4().to_string(),
                        list_id.to_string(),
                        task_id.to_string(),
                        status_to_str(EntryStatus::Pending),
                    ],
                )
                .await
                .map_err(|e| write_error("insert entry", e))?;
            }
        }

        for (task_id, agent_id) in &plan.rotations {
            conn.execute(
                "INSERT INTO rotations (id, task_id, agent_id, assigned_date) VALUES (?1, ?2, ?3, ?4)",
                params![
                    Uuid::new_v4().to_string(),
                    task_id.to_string(),
                    agent_id.to_string(),
                    day.clone(),
                ],
            )
            .await
            .map_err(|e| write_error("insert rotation", e))?;
        }

        Ok(())
    }
}
