use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                username        TEXT NOT NULL UNIQUE,
                password_hash   TEXT NOT NULL,
                role            TEXT NOT NULL CHECK (role IN ('admin', 'teacher')),
                created_at      TEXT NOT NULL,
                updated_at      TEXT NOT NULL
            );

            CREATE TABLE students (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                nisn            TEXT NOT NULL UNIQUE,
                name            TEXT NOT NULL,
                class           TEXT NOT NULL,
                parent_name     TEXT NOT NULL,
                parent_whatsapp TEXT NOT NULL,
                created_at      TEXT NOT NULL,
                updated_at      TEXT NOT NULL
            );

            CREATE TABLE violations (
                id                  INTEGER PRIMARY KEY AUTOINCREMENT,
                student_id          INTEGER NOT NULL REFERENCES students(id),
                violation_type      TEXT NOT NULL,
                location            TEXT NOT NULL,
                description         TEXT,
                photo_url           TEXT,
                violation_time      TEXT NOT NULL,
                reported_by         INTEGER NOT NULL REFERENCES users(id),
                whatsapp_sent       INTEGER NOT NULL DEFAULT 0,
                whatsapp_sent_at    TEXT,
                created_at          TEXT NOT NULL,
                updated_at          TEXT NOT NULL
            );

            CREATE INDEX idx_violations_student
                ON violations(student_id, violation_time);

            CREATE INDEX idx_violations_time
                ON violations(violation_time);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
