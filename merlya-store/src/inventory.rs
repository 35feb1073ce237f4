//! Host inventory operations: upsert with version log, atomic bulk import,
//! structural search, tombstoned deletion, import sources, config
//! variables, and the audit table.

use crate::{StoreError, schema};
use chrono::{DateTime, Utc};
use merlya_types::{
    AuditOutcome, AuditRecord, ElevationMethod, HealthStatus, Host, HostName, HostPatch,
    MAX_JUMP_DEPTH,
};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use std::net::IpAddr;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

/// Search filter for [`InventoryStore::search_hosts`]. Tag and group
/// filters use structural JSON predicates, not string `LIKE`, so `web`
/// never matches a host tagged `webcam`.
#[derive(Debug, Clone, Default)]
pub struct HostSearch {
    /// Substring match on name or hostname.
    pub pattern: Option<String>,
    /// Exact match on the `environment` metadata key.
    pub environment: Option<String>,
    /// Exact match against one element of the tag set.
    pub tag: Option<String>,
    /// Exact match on the `group` metadata key.
    pub group: Option<String>,
    /// Page size. Zero means no limit.
    pub limit: usize,
    /// Page offset.
    pub offset: usize,
}

/// One registered import source.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportSource {
    /// Row id.
    pub id: i64,
    /// Unique source name.
    pub name: String,
    /// Kind of source, e.g. `ssh_config`, `manual`, `api`.
    pub source_type: String,
    /// File the source was read from, when applicable.
    pub file_path: Option<String>,
    /// How the import ran, e.g. `cli`, `repl`.
    pub import_method: String,
    /// Hosts created by the last import.
    pub host_count: i64,
    /// Registration time.
    pub created_at: DateTime<Utc>,
}

/// The process-wide inventory store. One writer at a time (the connection
/// lock); readers observe committed snapshots through WAL.
pub struct InventoryStore {
    conn: Mutex<Connection>,
}

impl InventoryStore {
    /// Open (and migrate) the inventory at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        schema::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// An in-memory inventory, for tests and ephemeral runs.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        schema::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Insert or update a host. UPSERT semantics: on conflict the
    /// hostname, metadata (deep-merged) and non-null patch fields are
    /// applied; absent fields preserve stored values. Identical attributes
    /// are a no-op; no version record is created when nothing changes.
    pub fn add_host(
        &self,
        name: &HostName,
        patch: HostPatch,
        changed_by: &str,
        source: Option<&str>,
    ) -> Result<i64, StoreError> {
        let mut conn = self.conn.lock().expect("inventory lock");
        let tx = conn.transaction()?;
        let source_id = match source {
            Some(name) => Some(source_id_by_name(&tx, name)?),
            None => None,
        };
        let id = upsert_host(&tx, name, patch, changed_by, source_id)?;
        tx.commit()?;
        Ok(id)
    }

    /// Atomic batch upsert attributed to a registered source: either every
    /// row commits or none does. Returns the number of rows written.
    pub fn bulk_add_hosts(
        &self,
        hosts: Vec<(HostName, HostPatch)>,
        source: &str,
    ) -> Result<usize, StoreError> {
        let mut conn = self.conn.lock().expect("inventory lock");
        let tx = conn.transaction()?;
        let source_id = source_id_by_name(&tx, source)?;
        let mut written = 0usize;
        for (name, patch) in hosts {
            upsert_host(&tx, &name, patch, "import", Some(source_id))?;
            written += 1;
        }
        tx.execute(
            "UPDATE inventory_sources SET host_count = ?1 WHERE id = ?2",
            params![written as i64, source_id],
        )?;
        tx.commit()?;
        info!(source, count = written, "bulk host import committed");
        Ok(written)
    }

    /// Resolve a host reference: exact name (case-insensitive), then
    /// hostname, then IP literal.
    pub fn get_host(&self, reference: &str) -> Result<Option<Host>, StoreError> {
        let conn = self.conn.lock().expect("inventory lock");
        let folded = reference.trim().to_ascii_lowercase();

        if let Some(host) = host_by_column(&conn, "name", &folded)? {
            return Ok(Some(host));
        }
        if let Some(host) = host_by_column(&conn, "lower(hostname)", &folded)? {
            return Ok(Some(host));
        }
        if reference.trim().parse::<IpAddr>().is_ok() {
            if let Some(host) = host_by_column(&conn, "hostname", reference.trim())? {
                return Ok(Some(host));
            }
        }
        Ok(None)
    }

    /// Offset-paginated host search.
    pub fn search_hosts(&self, search: &HostSearch) -> Result<Vec<Host>, StoreError> {
        let conn = self.conn.lock().expect("inventory lock");
        let mut sql = String::from("SELECT * FROM hosts WHERE 1=1");
        let mut values: Vec<SqlValue> = Vec::new();

        if let Some(pattern) = &search.pattern {
            sql.push_str(&format!(
                " AND (name LIKE ?{n} OR hostname LIKE ?{n})",
                n = values.len() + 1
            ));
            values.push(SqlValue::Text(format!("%{pattern}%")));
        }
        if let Some(tag) = &search.tag {
            sql.push_str(&format!(
                " AND EXISTS (SELECT 1 FROM json_each(hosts.tags_json) WHERE json_each.value = ?{})",
                values.len() + 1
            ));
            values.push(SqlValue::Text(tag.clone()));
        }
        if let Some(environment) = &search.environment {
            sql.push_str(&format!(
                " AND json_extract(hosts.metadata_json, '$.environment') = ?{}",
                values.len() + 1
            ));
            values.push(SqlValue::Text(environment.clone()));
        }
        if let Some(group) = &search.group {
            sql.push_str(&format!(
                " AND json_extract(hosts.metadata_json, '$.group') = ?{}",
                values.len() + 1
            ));
            values.push(SqlValue::Text(group.clone()));
        }
        sql.push_str(" ORDER BY name");
        if search.limit > 0 {
            sql.push_str(&format!(" LIMIT {} OFFSET {}", search.limit, search.offset));
        } else if search.offset > 0 {
            sql.push_str(&format!(" LIMIT -1 OFFSET {}", search.offset));
        }

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(values), row_to_host)?;
        let mut hosts = Vec::new();
        for row in rows {
            hosts.push(row??);
        }
        Ok(hosts)
    }

    /// All host names, sorted. Used for alias resolution and suggestions.
    pub fn host_names(&self) -> Result<Vec<HostName>, StoreError> {
        let conn = self.conn.lock().expect("inventory lock");
        let mut stmt = conn.prepare("SELECT name FROM hosts ORDER BY name")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut names = Vec::new();
        for row in rows {
            let raw = row?;
            names.push(
                HostName::parse(&raw)
                    .map_err(|e| StoreError::Validation(format!("stored name {raw:?}: {e}")))?,
            );
        }
        Ok(names)
    }

    /// Delete a host, preserving its attributes and the reason in the
    /// append-only deletions table.
    pub fn delete_host(&self, name: &HostName, reason: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().expect("inventory lock");
        let tx = conn.transaction()?;
        tombstone_host(&tx, name, reason)?;
        tx.commit()?;
        Ok(())
    }

    /// The tombstones, newest first.
    pub fn deletions(&self, limit: usize) -> Result<Vec<(Host, String)>, StoreError> {
        let conn = self.conn.lock().expect("inventory lock");
        let mut stmt = conn.prepare(
            "SELECT attributes_json, reason FROM host_deletions ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (attrs, reason) = row?;
            out.push((serde_json::from_str(&attrs)?, reason));
        }
        Ok(out)
    }

    /// Version history for a host, oldest first:
    /// `(version, changed_fields, changed_by, created_at)`.
    pub fn versions(
        &self,
        name: &HostName,
    ) -> Result<Vec<(i64, Vec<String>, String, DateTime<Utc>)>, StoreError> {
        let conn = self.conn.lock().expect("inventory lock");
        let mut stmt = conn.prepare(
            "SELECT v.version, v.changes_json, v.changed_by, v.created_at
             FROM host_versions v JOIN hosts h ON h.id = v.host_id
             WHERE h.name = ?1 ORDER BY v.version",
        )?;
        let rows = stmt.query_map(params![name.as_str()], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (version, changes, changed_by, created_at) = row?;
            out.push((
                version,
                serde_json::from_str(&changes)?,
                changed_by,
                parse_ts(&created_at)?,
            ));
        }
        Ok(out)
    }

    /// Keep only the newest `keep` version records for a host. Returns the
    /// number pruned.
    pub fn prune_versions(&self, name: &HostName, keep: usize) -> Result<usize, StoreError> {
        let conn = self.conn.lock().expect("inventory lock");
        let pruned = conn.execute(
            "DELETE FROM host_versions WHERE host_id = (SELECT id FROM hosts WHERE name = ?1)
             AND version <= (
                 SELECT MAX(version) - ?2 FROM host_versions
                 WHERE host_id = (SELECT id FROM hosts WHERE name = ?1)
             )",
            params![name.as_str(), keep as i64],
        )?;
        Ok(pruned)
    }

    /// Register (or refresh) an import source.
    pub fn register_source(
        &self,
        name: &str,
        source_type: &str,
        file_path: Option<&str>,
        import_method: &str,
    ) -> Result<i64, StoreError> {
        let conn = self.conn.lock().expect("inventory lock");
        conn.execute(
            "INSERT INTO inventory_sources (name, source_type, file_path, import_method, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(name) DO UPDATE SET
                 source_type = excluded.source_type,
                 file_path = excluded.file_path,
                 import_method = excluded.import_method",
            params![name, source_type, file_path, import_method, now_ts()],
        )?;
        let id: i64 = conn.query_row(
            "SELECT id FROM inventory_sources WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Remove an import source and tombstone every host it created, with
    /// reason `source-removed:<name>`. Returns the number of hosts removed.
    pub fn delete_source(&self, name: &str) -> Result<usize, StoreError> {
        let mut conn = self.conn.lock().expect("inventory lock");
        let tx = conn.transaction()?;
        let source_id = source_id_by_name(&tx, name)?;

        let host_names: Vec<String> = {
            let mut stmt = tx.prepare("SELECT name FROM hosts WHERE source_id = ?1")?;
            let rows = stmt.query_map(params![source_id], |row| row.get(0))?;
            rows.collect::<Result<_, _>>()?
        };
        let reason = format!("source-removed:{name}");
        for raw in &host_names {
            let host_name = HostName::parse(raw)
                .map_err(|e| StoreError::Validation(format!("stored name {raw:?}: {e}")))?;
            tombstone_host(&tx, &host_name, &reason)?;
        }
        tx.execute(
            "DELETE FROM inventory_sources WHERE id = ?1",
            params![source_id],
        )?;
        tx.commit()?;
        info!(source = name, hosts = host_names.len(), "import source removed");
        Ok(host_names.len())
    }

    /// All registered sources, sorted by name.
    pub fn sources(&self) -> Result<Vec<ImportSource>, StoreError> {
        let conn = self.conn.lock().expect("inventory lock");
        let mut stmt = conn.prepare(
            "SELECT id, name, source_type, file_path, import_method, host_count, created_at
             FROM inventory_sources ORDER BY name",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, i64>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (id, name, source_type, file_path, import_method, host_count, created_at) = row?;
            out.push(ImportSource {
                id,
                name,
                source_type,
                file_path,
                import_method,
                host_count,
                created_at: parse_ts(&created_at)?,
            });
        }
        Ok(out)
    }

    /// Set a non-sensitive config variable.
    pub fn var_set(&self, name: &str, value: &str) -> Result<(), StoreError> {
        if name.is_empty() {
            return Err(StoreError::Validation("variable name is empty".into()));
        }
        let conn = self.conn.lock().expect("inventory lock");
        conn.execute(
            "INSERT INTO variables (name, value, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(name) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![name, value, now_ts()],
        )?;
        Ok(())
    }

    /// Fetch a config variable.
    pub fn var_get(&self, name: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock().expect("inventory lock");
        Ok(conn
            .query_row(
                "SELECT value FROM variables WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Remove a config variable. Absence is not an error.
    pub fn var_delete(&self, name: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("inventory lock");
        conn.execute("DELETE FROM variables WHERE name = ?1", params![name])?;
        Ok(())
    }

    /// All variable names, sorted.
    pub fn var_names(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.conn.lock().expect("inventory lock");
        let mut stmt = conn.prepare("SELECT name FROM variables ORDER BY name")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// Append an audit record. The table is append-only; nothing updates
    /// or deletes rows.
    pub fn append_audit(&self, record: &AuditRecord) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("inventory lock");
        conn.execute(
            "INSERT INTO audit (timestamp, actor, action, target, command_hash, outcome, duration_ms, metadata_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.timestamp.to_rfc3339(),
                record.actor,
                record.action,
                record.target,
                record.command_hash,
                record.outcome.as_str(),
                record.duration_ms.map(|d| d as i64),
                serde_json::to_string(&record.metadata)?,
            ],
        )?;
        Ok(())
    }

    /// The newest `limit` audit records, newest first.
    pub fn recent_audit(&self, limit: usize) -> Result<Vec<AuditRecord>, StoreError> {
        let conn = self.conn.lock().expect("inventory lock");
        let mut stmt = conn.prepare(
            "SELECT timestamp, actor, action, target, command_hash, outcome, duration_ms, metadata_json
             FROM audit ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, Option<i64>>(6)?,
                row.get::<_, String>(7)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (ts, actor, action, target, command_hash, outcome, duration_ms, metadata) = row?;
            out.push(AuditRecord {
                timestamp: parse_ts(&ts)?,
                actor,
                action,
                target,
                command_hash,
                outcome: match outcome.as_str() {
                    "ok" => AuditOutcome::Ok,
                    "failed" => AuditOutcome::Failed,
                    "blocked" => AuditOutcome::Blocked,
                    "cancelled" => AuditOutcome::Cancelled,
                    other => {
                        return Err(StoreError::Validation(format!(
                            "unknown audit outcome {other:?}"
                        )));
                    }
                },
                duration_ms: duration_ms.map(|d| d as u64),
                metadata: serde_json::from_str(&metadata)?,
            });
        }
        Ok(out)
    }

    /// Record a health observation for a host. Missing hosts are ignored;
    /// enrichment must not fail a command that already succeeded.
    pub fn record_health(
        &self,
        name: &HostName,
        status: HealthStatus,
        last_seen: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("inventory lock");
        match last_seen {
            Some(seen) => conn.execute(
                "UPDATE hosts SET health_status = ?1, last_seen = ?2, updated_at = ?3 WHERE name = ?4",
                params![status.as_str(), seen.to_rfc3339(), now_ts(), name.as_str()],
            )?,
            None => conn.execute(
                "UPDATE hosts SET health_status = ?1, updated_at = ?2 WHERE name = ?3",
                params![status.as_str(), now_ts(), name.as_str()],
            )?,
        };
        Ok(())
    }

    /// Store an observed OS snapshot for a host.
    pub fn record_os_info(
        &self,
        name: &HostName,
        os_info: &serde_json::Value,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("inventory lock");
        conn.execute(
            "UPDATE hosts SET os_info_json = ?1, updated_at = ?2 WHERE name = ?3",
            params![serde_json::to_string(os_info)?, now_ts(), name.as_str()],
        )?;
        Ok(())
    }
}

// ── internals ───────────────────────────────────────────────────────────

fn now_ts() -> String {
    Utc::now().to_rfc3339()
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Validation(format!("bad timestamp {raw:?}: {e}")))
}

fn source_id_by_name(tx: &Transaction<'_>, name: &str) -> Result<i64, StoreError> {
    tx.query_row(
        "SELECT id FROM inventory_sources WHERE name = ?1",
        params![name],
        |row| row.get(0),
    )
    .optional()?
    .ok_or_else(|| StoreError::NotFound(format!("import source {name:?}")))
}

fn host_by_column(conn: &Connection, column: &str, value: &str) -> Result<Option<Host>, StoreError> {
    let sql = format!("SELECT * FROM hosts WHERE {column} = ?1");
    let host = conn
        .query_row(&sql, params![value], row_to_host)
        .optional()?;
    host.transpose().map_err(StoreError::from)
}

fn host_by_name_tx(tx: &Transaction<'_>, name: &HostName) -> Result<Option<Host>, StoreError> {
    let host = tx
        .query_row(
            "SELECT * FROM hosts WHERE name = ?1",
            params![name.as_str()],
            row_to_host,
        )
        .optional()?;
    host.transpose().map_err(StoreError::from)
}

type HostRow = Result<Host, serde_json::Error>;

fn row_to_host(row: &rusqlite::Row<'_>) -> Result<HostRow, rusqlite::Error> {
    let name: String = row.get("name")?;
    let tags: String = row.get("tags_json")?;
    let metadata: String = row.get("metadata_json")?;
    let os_info: Option<String> = row.get("os_info_json")?;
    let elevation: String = row.get("elevation_method")?;
    let health: String = row.get("health_status")?;
    let last_seen: Option<String> = row.get("last_seen")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    let jump: Option<String> = row.get("jump_host_name")?;

    Ok((|| {
        Ok(Host {
            name: HostName::parse(&name).map_err(|e| {
                serde_json::Error::io(std::io::Error::other(format!("bad stored name: {e}")))
            })?,
            hostname: row_get_string(row, "hostname"),
            port: row_get_port(row),
            username: row_get_opt(row, "username"),
            private_key_path: row_get_opt(row, "private_key_path"),
            jump_host: match jump {
                Some(j) => Some(HostName::parse(&j).map_err(|e| {
                    serde_json::Error::io(std::io::Error::other(format!("bad jump name: {e}")))
                })?),
                None => None,
            },
            tags: serde_json::from_str(&tags)?,
            metadata: serde_json::from_str(&metadata)?,
            elevation_method: ElevationMethod::from_str_opt(&elevation).unwrap_or_default(),
            health_status: HealthStatus::from_str_opt(&health).unwrap_or_default(),
            os_info: os_info.map(|raw| serde_json::from_str(&raw)).transpose()?,
            last_seen: last_seen
                .map(|raw| {
                    DateTime::parse_from_rfc3339(&raw).map(|dt| dt.with_timezone(&Utc))
                })
                .transpose()
                .map_err(|e| {
                    serde_json::Error::io(std::io::Error::other(format!("bad last_seen: {e}")))
                })?,
            created_at: DateTime::parse_from_rfc3339(&created_at)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| {
                    serde_json::Error::io(std::io::Error::other(format!("bad created_at: {e}")))
                })?,
            updated_at: DateTime::parse_from_rfc3339(&updated_at)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| {
                    serde_json::Error::io(std::io::Error::other(format!("bad updated_at: {e}")))
                })?,
        })
    })())
}

fn row_get_string(row: &rusqlite::Row<'_>, column: &str) -> String {
    row.get(column).unwrap_or_default()
}

fn row_get_opt(row: &rusqlite::Row<'_>, column: &str) -> Option<String> {
    row.get(column).unwrap_or(None)
}

fn row_get_port(row: &rusqlite::Row<'_>) -> u16 {
    row.get::<_, i64>("port")
        .ok()
        .and_then(|p| u16::try_from(p).ok())
        .unwrap_or(22)
}

/// Apply `patch` to `current`, returning the new row and the names of the
/// fields that changed.
fn apply_patch(current: &Host, patch: HostPatch) -> (Host, Vec<String>) {
    let mut next = current.clone();
    let mut changed = Vec::new();

    if let Some(hostname) = patch.hostname {
        if hostname != next.hostname {
            next.hostname = hostname;
            changed.push("hostname".to_string());
        }
    }
    if let Some(port) = patch.port {
        if port != next.port {
            next.port = port;
            changed.push("port".to_string());
        }
    }
    if !patch.username.is_keep() {
        let updated = patch.username.apply(next.username.clone());
        if updated != next.username {
            next.username = updated;
            changed.push("username".to_string());
        }
    }
    if !patch.private_key_path.is_keep() {
        let updated = patch.private_key_path.apply(next.private_key_path.clone());
        if updated != next.private_key_path {
            next.private_key_path = updated;
            changed.push("private_key_path".to_string());
        }
    }
    if !patch.jump_host.is_keep() {
        let updated = patch.jump_host.apply(next.jump_host.clone());
        if updated != next.jump_host {
            next.jump_host = updated;
            changed.push("jump_host_name".to_string());
        }
    }
    if let Some(tags) = patch.tags {
        if tags != next.tags {
            next.tags = tags;
            changed.push("tags".to_string());
        }
    }
    if !patch.metadata.is_empty() {
        let mut merged = next.metadata.clone();
        for (k, v) in patch.metadata {
            merged.insert(k, v);
        }
        if merged != next.metadata {
            next.metadata = merged;
            changed.push("metadata".to_string());
        }
    }
    if let Some(method) = patch.elevation_method {
        if method != next.elevation_method {
            next.elevation_method = method;
            changed.push("elevation_method".to_string());
        }
    }
    if let Some(status) = patch.health_status {
        if status != next.health_status {
            next.health_status = status;
            changed.push("health_status".to_string());
        }
    }
    if !patch.os_info.is_keep() {
        let updated = patch.os_info.apply(next.os_info.clone());
        if updated != next.os_info {
            next.os_info = updated;
            changed.push("os_info".to_string());
        }
    }
    if !patch.last_seen.is_keep() {
        let updated = patch.last_seen.apply(next.last_seen);
        if updated != next.last_seen {
            next.last_seen = updated;
            changed.push("last_seen".to_string());
        }
    }

    (next, changed)
}

/// Validate the jump chain induced by giving `name` the jump host
/// `first_jump`: every referenced host must exist, the graph must stay a
/// forest (no cycles), and the chain depth is bounded by
/// [`MAX_JUMP_DEPTH`].
fn validate_jump_chain(
    tx: &Transaction<'_>,
    name: &HostName,
    first_jump: &HostName,
) -> Result<(), StoreError> {
    let mut visited = vec![name.clone()];
    let mut next = Some(first_jump.clone());
    let mut depth = 0usize;

    while let Some(current) = next {
        depth += 1;
        if depth > MAX_JUMP_DEPTH {
            return Err(StoreError::Validation(format!(
                "jump chain for {name} exceeds depth {MAX_JUMP_DEPTH}"
            )));
        }
        if visited.contains(&current) {
            return Err(StoreError::Validation(format!(
                "jump chain for {name} contains a cycle through {current}"
            )));
        }
        let Some(host) = host_by_name_tx(tx, &current)? else {
            return Err(StoreError::NotFound(format!("jump host {current}")));
        };
        visited.push(current);
        next = host.jump_host;
    }
    Ok(())
}

fn upsert_host(
    tx: &Transaction<'_>,
    name: &HostName,
    patch: HostPatch,
    changed_by: &str,
    source_id: Option<i64>,
) -> Result<i64, StoreError> {
    match host_by_name_tx(tx, name)? {
        Some(existing) => {
            let (next, changed) = apply_patch(&existing, patch);
            if changed.is_empty() {
                return host_id(tx, name);
            }
            if let Some(jump) = &next.jump_host {
                validate_jump_chain(tx, name, jump)?;
            }
            tx.execute(
                "UPDATE hosts SET hostname = ?1, port = ?2, username = ?3,
                     private_key_path = ?4, jump_host_name = ?5, tags_json = ?6,
                     metadata_json = ?7, elevation_method = ?8, health_status = ?9,
                     os_info_json = ?10, last_seen = ?11, updated_at = ?12
                 WHERE name = ?13",
                params![
                    next.hostname,
                    next.port,
                    next.username,
                    next.private_key_path,
                    next.jump_host.as_ref().map(|j| j.as_str().to_string()),
                    serde_json::to_string(&next.tags)?,
                    serde_json::to_string(&next.metadata)?,
                    next.elevation_method.as_str(),
                    next.health_status.as_str(),
                    next.os_info
                        .as_ref()
                        .map(serde_json::to_string)
                        .transpose()?,
                    next.last_seen.map(|t| t.to_rfc3339()),
                    now_ts(),
                    name.as_str(),
                ],
            )?;
            let id = host_id(tx, name)?;
            record_version(tx, id, &changed, changed_by)?;
            debug!(host = %name, fields = ?changed, "host updated");
            Ok(id)
        }
        None => {
            let Some(hostname) = patch.hostname.clone() else {
                return Err(StoreError::Validation(format!(
                    "host {name} does not exist and no hostname was given"
                )));
            };
            let base = Host::new(name.clone(), hostname);
            let (next, mut changed) = apply_patch(&base, patch);
            changed.insert(0, "created".to_string());
            if let Some(jump) = &next.jump_host {
                validate_jump_chain(tx, name, jump)?;
            }
            tx.execute(
                "INSERT INTO hosts (name, hostname, port, username, private_key_path,
                     jump_host_name, tags_json, metadata_json, elevation_method,
                     health_status, os_info_json, last_seen, source_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14)",
                params![
                    name.as_str(),
                    next.hostname,
                    next.port,
                    next.username,
                    next.private_key_path,
                    next.jump_host.as_ref().map(|j| j.as_str().to_string()),
                    serde_json::to_string(&next.tags)?,
                    serde_json::to_string(&next.metadata)?,
                    next.elevation_method.as_str(),
                    next.health_status.as_str(),
                    next.os_info
                        .as_ref()
                        .map(serde_json::to_string)
                        .transpose()?,
                    next.last_seen.map(|t| t.to_rfc3339()),
                    source_id,
                    now_ts(),
                ],
            )?;
            let id = host_id(tx, name)?;
            record_version(tx, id, &changed, changed_by)?;
            debug!(host = %name, "host created");
            Ok(id)
        }
    }
}

fn host_id(tx: &Transaction<'_>, name: &HostName) -> Result<i64, StoreError> {
    tx.query_row(
        "SELECT id FROM hosts WHERE name = ?1",
        params![name.as_str()],
        |row| row.get(0),
    )
    .optional()?
    .ok_or_else(|| StoreError::NotFound(format!("host {name}")))
}

fn record_version(
    tx: &Transaction<'_>,
    host_id: i64,
    changed: &[String],
    changed_by: &str,
) -> Result<(), StoreError> {
    let version: i64 = tx.query_row(
        "SELECT COALESCE(MAX(version), 0) + 1 FROM host_versions WHERE host_id = ?1",
        params![host_id],
        |row| row.get(0),
    )?;
    tx.execute(
        "INSERT INTO host_versions (host_id, version, changes_json, changed_by, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            host_id,
            version,
            serde_json::to_string(changed)?,
            changed_by,
            now_ts(),
        ],
    )?;
    Ok(())
}

fn tombstone_host(tx: &Transaction<'_>, name: &HostName, reason: &str) -> Result<(), StoreError> {
    let Some(host) = host_by_name_tx(tx, name)? else {
        return Err(StoreError::NotFound(format!("host {name}")));
    };
    let id = host_id(tx, name)?;
    tx.execute(
        "INSERT INTO host_deletions (host_id, hostname, attributes_json, reason, deleted_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            id,
            host.hostname,
            serde_json::to_string(&host)?,
            reason,
            now_ts(),
        ],
    )?;
    tx.execute("DELETE FROM hosts WHERE id = ?1", params![id])?;
    Ok(())
}
