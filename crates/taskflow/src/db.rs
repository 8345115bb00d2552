use rusqlite::functions::FunctionFlags;
use rusqlite::Connection;

/// SQL name of the Unicode lowercase function used by search.
pub const CASEFOLD_FN: &str = "casefold";

pub fn init_db(path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;

    // Enable WAL mode for concurrent reads
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;

    // Checkpoint any pending WAL data before running migrations.
    conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;

    // Resources, assignments and tags hang off tasks via cascading keys.
    conn.execute_batch("PRAGMA foreign_keys=ON;")?;

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE,
            image TEXT,
            lang TEXT NOT NULL DEFAULT 'en',
            stripe_customer_id TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS sessions (
            token_hash TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            expires_at TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS tasks (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            parent_id TEXT REFERENCES tasks(id) ON DELETE SET NULL,
            title TEXT NOT NULL,
            description TEXT,
            priority TEXT NOT NULL DEFAULT 'medium',
            category TEXT NOT NULL,
            completed INTEGER NOT NULL DEFAULT 0,
            scheduled INTEGER NOT NULL DEFAULT 0,
            status TEXT,
            date TEXT,
            start_time TEXT,
            end_time TEXT,
            duration INTEGER,
            sort_order INTEGER NOT NULL DEFAULT 1000,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS task_tags (
            task_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
            tag TEXT NOT NULL,
            PRIMARY KEY (task_id, tag)
        );

        CREATE TABLE IF NOT EXISTS task_resources (
            id TEXT PRIMARY KEY,
            task_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
            position INTEGER NOT NULL,
            name TEXT NOT NULL,
            resource_type TEXT NOT NULL,
            category TEXT NOT NULL,
            url TEXT
        );

        CREATE TABLE IF NOT EXISTS task_assignments (
            task_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            created_at TEXT NOT NULL,
            PRIMARY KEY (task_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS subscriptions (
            id TEXT PRIMARY KEY,
            plan TEXT NOT NULL,
            status TEXT NOT NULL,
            stripe_customer_id TEXT NOT NULL,
            stripe_subscription_id TEXT,
            billing TEXT,
            price REAL,
            period_start TEXT,
            period_end TEXT,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_sessions_user_id ON sessions(user_id);
        CREATE INDEX IF NOT EXISTS idx_tasks_user_id ON tasks(user_id);
        CREATE INDEX IF NOT EXISTS idx_tasks_parent_id ON tasks(parent_id);
        CREATE INDEX IF NOT EXISTS idx_tasks_bucket ON tasks(completed, scheduled, status);
        CREATE INDEX IF NOT EXISTS idx_tasks_date ON tasks(date);
        CREATE INDEX IF NOT EXISTS idx_task_tags_task_id ON task_tags(task_id);
        CREATE INDEX IF NOT EXISTS idx_task_resources_task_id ON task_resources(task_id, position);
        CREATE INDEX IF NOT EXISTS idx_task_assignments_user_id ON task_assignments(user_id);
        CREATE INDEX IF NOT EXISTS idx_subscriptions_customer ON subscriptions(stripe_customer_id);
        ",
    )?;

    register_functions(&conn)?;

    Ok(conn)
}

/// SQLite's built-in `LOWER()` only folds ASCII, so search goes through a
/// Unicode-aware lowercase registered per connection.
fn register_functions(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        CASEFOLD_FN,
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let text = ctx.get::<Option<String>>(0)?;
            Ok(text.map(|t| t.to_lowercase()))
        },
    )
}

/// Create a SQLite-backed StorageBackend from a path.
pub fn init_sqlite_storage(
    path: &str,
) -> rusqlite::Result<std::sync::Arc<dyn crate::storage::StorageBackend>> {
    let conn = init_db(path)?;
    let conn = std::sync::Arc::new(std::sync::Mutex::new(conn));
    Ok(std::sync::Arc::new(crate::storage::sqlite::SqliteBackend::new(conn)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn casefold_lowercases_non_ascii() {
        let conn = init_db(":memory:").unwrap();
        let folded: String = conn
            .query_row("SELECT casefold('CAFÉ Überprüfung')", [], |row| row.get(0))
            .unwrap();
        assert_eq!(folded, "café überprüfung");
        let null: Option<String> = conn
            .query_row("SELECT casefold(NULL)", [], |row| row.get(0))
            .unwrap();
        assert_eq!(null, None);
    }
}
