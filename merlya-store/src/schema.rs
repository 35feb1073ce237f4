//! Schema migrations, applied at open via `PRAGMA user_version`.

use rusqlite::Connection;
use tracing::info;

/// Ordered migration scripts. Index + 1 is the resulting `user_version`.
const MIGRATIONS: &[&str] = &[
    // v1: the full initial schema
    "
    CREATE TABLE hosts (
        id               INTEGER PRIMARY KEY,
        name             TEXT NOT NULL UNIQUE,
        hostname         TEXT NOT NULL,
        port             INTEGER NOT NULL DEFAULT 22,
        username         TEXT,
        private_key_path TEXT,
        jump_host_name   TEXT,
        tags_json        TEXT NOT NULL DEFAULT '[]',
        metadata_json    TEXT NOT NULL DEFAULT '{}',
        elevation_method TEXT NOT NULL DEFAULT 'none',
        health_status    TEXT NOT NULL DEFAULT 'unknown',
        os_info_json     TEXT,
        last_seen        TEXT,
        source_id        INTEGER REFERENCES inventory_sources(id),
        created_at       TEXT NOT NULL,
        updated_at       TEXT NOT NULL
    );
    CREATE INDEX idx_hosts_hostname ON hosts(hostname);

    CREATE TABLE host_versions (
        id           INTEGER PRIMARY KEY,
        host_id      INTEGER NOT NULL REFERENCES hosts(id) ON DELETE CASCADE,
        version      INTEGER NOT NULL,
        changes_json TEXT NOT NULL,
        changed_by   TEXT NOT NULL,
        created_at   TEXT NOT NULL,
        UNIQUE(host_id, version)
    );

    CREATE TABLE host_deletions (
        id              INTEGER PRIMARY KEY,
        host_id         INTEGER NOT NULL,
        hostname        TEXT NOT NULL,
        attributes_json TEXT NOT NULL,
        reason          TEXT NOT NULL,
        deleted_at      TEXT NOT NULL
    );

    CREATE TABLE inventory_sources (
        id            INTEGER PRIMARY KEY,
        name          TEXT NOT NULL UNIQUE,
        source_type   TEXT NOT NULL,
        file_path     TEXT,
        import_method TEXT NOT NULL,
        host_count    INTEGER NOT NULL DEFAULT 0,
        created_at    TEXT NOT NULL
    );

    CREATE TABLE variables (
        name       TEXT PRIMARY KEY,
        value      TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE TABLE audit (
        id           INTEGER PRIMARY KEY,
        timestamp    TEXT NOT NULL,
        actor        TEXT NOT NULL,
        action       TEXT NOT NULL,
        target       TEXT NOT NULL,
        command_hash TEXT,
        outcome      TEXT NOT NULL,
        duration_ms  INTEGER,
        metadata_json TEXT NOT NULL DEFAULT 'null'
    );
    CREATE INDEX idx_audit_timestamp ON audit(timestamp);
    ",
];

/// Bring `conn` up to the latest schema version.
pub fn migrate(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    let current: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    for (i, script) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i64;
        if version > current {
            conn.execute_batch(script)?;
            conn.pragma_update(None, "user_version", version)?;
            info!(version, "inventory schema migrated");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrate_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        migrate(&conn).unwrap();
        let version: i64 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap();
        assert_eq!(version, MIGRATIONS.len() as i64);
    }
}
