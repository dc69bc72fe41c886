//! Version-tracked database migrations for the libSQL backend.
//!
//! Each migration has a version number and SQL. `run_migrations()` checks
//! the current version and applies only the new ones sequentially.

use libsql::Connection;

use crate::error::DatabaseError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial_schema",
        sql: r#"
            CREATE TABLE IF NOT EXISTS domains (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS agents (
                id TEXT PRIMARY KEY,
                domain_id TEXT NOT NULL REFERENCES domains(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                birth_date TEXT,
                active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            CREATE INDEX IF NOT EXISTS idx_agents_domain ON agents(domain_id);

            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                domain_id TEXT NOT NULL REFERENCES domains(id) ON DELETE CASCADE,
                title TEXT NOT NULL,
                kind TEXT NOT NULL,
                difficulty TEXT NOT NULL,
                min_age INTEGER,
                max_age INTEGER,
                position INTEGER NOT NULL DEFAULT 0,
                active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            CREATE INDEX IF NOT EXISTS idx_tasks_domain ON tasks(domain_id);

            CREATE TABLE IF NOT EXISTS task_assignees (
                task_id TEXT NOT NULL,
                agent_id TEXT NOT NULL,
                PRIMARY KEY (task_id, agent_id)
            );

            CREATE TABLE IF NOT EXISTS daily_lists (
                id TEXT PRIMARY KEY,
                agent_id TEXT NOT NULL REFERENCES agents(id) ON DELETE CASCADE,
                date TEXT NOT NULL,
                generated_at TEXT NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_daily_lists_agent_date
                ON daily_lists(agent_id, date);
            CREATE INDEX IF NOT EXISTS idx_daily_lists_date ON daily_lists(date);

            CREATE TABLE IF NOT EXISTS daily_list_entries (
                id TEXT PRIMARY KEY,
                list_id TEXT NOT NULL REFERENCES daily_lists(id) ON DELETE CASCADE,
                task_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
                status TEXT NOT NULL DEFAULT 'pending'
            );
            CREATE INDEX IF NOT EXISTS idx_daily_list_entries_list
                ON daily_list_entries(list_id);

            CREATE TABLE IF NOT EXISTS rotations (
                id TEXT PRIMARY KEY,
                task_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
                agent_id TEXT NOT NULL REFERENCES agents(id) ON DELETE CASCADE,
                assigned_date TEXT NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_rotations_unique
                ON rotations(task_id, agent_id, assigned_date);
            CREATE INDEX IF NOT EXISTS idx_rotations_task_date
                ON rotations(task_id, assigned_date);
        "#,
    },
    Migration {
        version: 2,
        name: "task_estimates",
        sql: r#"
            ALTER TABLE tasks ADD COLUMN estimated_minutes INTEGER;
        "#,
    },
];

/// Run all pending migrations against the given connection.
///
/// Creates the `_migrations` table if it doesn't exist.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to create _migrations table: {e}")))?;

    let current_version = get_current_version(conn).await?;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            conn.execute_batch(migration.sql).await.map_err(|e| {
                DatabaseError::Migration(format!(
                    "Migration V{} ({}) failed: {e}",
                    migration.version, migration.name
                ))
            })?;
            seed_version(conn, migration.version, migration.name).await?;
        }
    }

    Ok(())
}

/// Get the highest applied migration version, or 0 if none.
async fn get_current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to query migration version: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to read migration version: {e}")))?;

    match row {
        Some(row) => {
            let version: i64 = row.get(0).map_err(|e| {
                DatabaseError::Migration(format!("Failed to parse migration version: {e}"))
            })?;
            Ok(version)
        }
        None => Ok(0),
    }
}

/// Insert a version record into `_migrations`.
async fn seed_version(conn: &Connection, version: i64, name: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![version, name],
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to record migration V{version}: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_conn() -> Connection {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .unwrap();
        db.connect().unwrap()
    }

    /// Seed the domain/agent/task rows the FK-constrained fixtures reference.
    async fn seed_parents(conn: &Connection) {
        conn.execute_batch(
            "INSERT INTO domains (id, name) VALUES ('d', 'home');
             INSERT INTO agents (id, domain_id, name) VALUES ('a', 'd', 'Ada');
             INSERT INTO tasks (id, domain_id, title, kind, difficulty)
                 VALUES ('t', 'd', 'dishes', 'rotating', 'easy');",
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn migrations_create_all_tables() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();

        for table in &[
            "domains",
            "agents",
            "tasks",
            "task_assignees",
            "daily_lists",
            "daily_list_entries",
            "rotations",
            "_migrations",
        ] {
            let mut rows = conn
                .query(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    libsql::params![*table],
                )
                .await
                .unwrap();
            let row = rows.next().await.unwrap().unwrap();
            let count: i64 = row.get(0).unwrap();
            assert_eq!(count, 1, "Table '{}' should exist", table);
        }
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();
        // Running again should not fail
        run_migrations(&conn).await.unwrap();

        let version = get_current_version(&conn).await.unwrap();
        assert_eq!(version, 2);
    }

    #[tokio::test]
    async fn rotation_triple_is_unique() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();

        seed_parents(&conn).await;
        conn.execute(
            "INSERT INTO rotations (id, task_id, agent_id, assigned_date) VALUES ('r1', 't', 'a', '2026-08-25')",
            (),
        )
        .await
        .unwrap();
        let dup = conn
            .execute(
                "INSERT INTO rotations (id, task_id, agent_id, assigned_date) VALUES ('r2', 't', 'a', '2026-08-25')",
                (),
            )
            .await;
        assert!(dup.is_err());
    }

    #[tokio::test]
    async fn one_list_per_agent_and_date() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();

        seed_parents(&conn).await;
        conn.execute(
            "INSERT INTO daily_lists (id, agent_id, date, generated_at) VALUES ('l1', 'a', '2026-08-25', '2026-08-25T05:00:00Z')",
            (),
        )
        .await
        .unwrap();
        let dup = conn
            .execute(
                "INSERT INTO daily_lists (id, agent_id, date, generated_at) VALUES ('l2', 'a', '2026-08-25', '2026-08-25T05:00:00Z')",
                (),
            )
            .await;
        assert!(dup.is_err());
    }
}
