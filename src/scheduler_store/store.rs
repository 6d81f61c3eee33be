//! SQLite-backed scheduler store.
//!
//! A single scheduler.db holds the tenant registry, the index-type config
//! registry and the snapshot directory, so cross-table writes (priority
//! cascades, reconciliation) and the select-and-transition of the lease
//! assigner each run as one transaction.

use super::models::*;
use super::schema::SCHEDULER_VERSIONED_SCHEMAS;
use super::trait_def::SchedulerStore;
use crate::sqlite_persistence::BASE_DB_VERSION;
use anyhow::{bail, Context, Result};
use rusqlite::{params, types::Type, Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::info;
use uuid::Uuid;

pub struct SqliteSchedulerStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSchedulerStore {
    /// Open an existing scheduler database or create a new one with the
    /// current schema.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = if db_path.as_ref().exists() {
            Connection::open_with_flags(
                &db_path,
                rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                    | rusqlite::OpenFlags::SQLITE_OPEN_URI
                    | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?
        } else {
            let conn = Connection::open(&db_path)?;
            conn.execute("PRAGMA foreign_keys = ON;", [])?;
            SCHEDULER_VERSIONED_SCHEMAS
                .last()
                .context("No schemas defined")?
                .create(&conn)?;
            info!("Created new scheduler database at {:?}", db_path.as_ref());
            conn
        };

        conn.execute("PRAGMA foreign_keys = ON;", [])?;
        // Other workers may hold the write lock while assigning; wait for it
        // instead of surfacing SQLITE_BUSY to the caller.
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        let db_version = conn
            .query_row("PRAGMA user_version;", [], |row| row.get::<usize, i64>(0))
            .context("Failed to read database version")?
            - BASE_DB_VERSION as i64;

        if db_version < 0 {
            bail!(
                "Scheduler database version {} is too old, does not contain base db version {}",
                db_version,
                BASE_DB_VERSION
            );
        }
        let version = db_version as usize;

        let schema_count = SCHEDULER_VERSIONED_SCHEMAS.len();
        if version >= schema_count {
            bail!(
                "Scheduler database version {} is too new (max supported: {})",
                version,
                schema_count - 1
            );
        }

        SCHEDULER_VERSIONED_SCHEMAS
            .get(version)
            .context("Failed to get schema")?
            .validate(&conn)?;

        Self::migrate_if_needed(&conn, version)?;

        Ok(SqliteSchedulerStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory store for testing.
    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON;", [])?;
        SCHEDULER_VERSIONED_SCHEMAS
            .last()
            .context("No schemas defined")?
            .create(&conn)?;

        Ok(SqliteSchedulerStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn migrate_if_needed(conn: &Connection, current_version: usize) -> Result<()> {
        let target_version = SCHEDULER_VERSIONED_SCHEMAS.len() - 1;

        if current_version >= target_version {
            return Ok(());
        }

        info!(
            "Migrating scheduler database from version {} to {}",
            current_version, target_version
        );

        for schema in SCHEDULER_VERSIONED_SCHEMAS.iter().skip(current_version + 1) {
            if let Some(migration_fn) = schema.migration {
                info!("Running scheduler migration to version {}", schema.version);
                migration_fn(conn)?;
            }
        }

        conn.execute(
            &format!("PRAGMA user_version = {}", BASE_DB_VERSION + target_version),
            [],
        )?;

        Ok(())
    }

    /// Current timestamp in seconds.
    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }

    fn parse_err(e: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
        rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e))
    }

    fn row_to_tenant(row: &rusqlite::Row) -> rusqlite::Result<Tenant> {
        Ok(Tenant {
            id: row.get("id")?,
            tenant_id: row.get("tenant_id")?,
            enabled: row.get("enabled")?,
            priority: row.get("priority")?,
            marked_for_deletion: row.get("marked_for_deletion")?,
            marked_for_deletion_at: row.get("marked_for_deletion_at")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    fn row_to_config(row: &rusqlite::Row) -> rusqlite::Result<IndexTypeConfig> {
        Ok(IndexTypeConfig {
            id: row.get("id")?,
            tenant_id: row.get("tenant_id")?,
            index_type: row
                .get::<_, String>("index_type")?
                .parse()
                .map_err(Self::parse_err)?,
            enabled: row.get("enabled")?,
            priority: row.get("priority")?,
            frequency_mins: row.get("frequency_mins")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    fn row_to_snapshot(row: &rusqlite::Row) -> rusqlite::Result<Snapshot> {
        Ok(Snapshot {
            id: row.get("id")?,
            index_type_config_id: row.get("index_type_config_id")?,
            index_name: row.get("index_name")?,
            ingested_at: IngestionMark::from_i64(row.get("ingested_at")?),
            status: row
                .get::<_, String>("status")?
                .parse()
                .map_err(Self::parse_err)?,
            index_exists: row.get("index_exists")?,
            priority: row.get("priority")?,
            status_changed_at: row.get("status_changed_at")?,
            last_refresh_started_at: row.get("last_refresh_started_at")?,
            last_refreshed_at: row.get("last_refreshed_at")?,
            heartbeat_at: row.get("heartbeat_at")?,
            latest_offsets: row
                .get::<_, Option<String>>("latest_offsets")?
                .and_then(|s| serde_json::from_str(&s).ok())
                .unwrap_or_default(),
            failed_attempts_count: row.get("failed_attempts_count")?,
            marked_for_deletion: row.get("marked_for_deletion")?,
            marked_for_deletion_at: row.get("marked_for_deletion_at")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    fn row_to_candidate(row: &rusqlite::Row) -> rusqlite::Result<PromotionCandidate> {
        Ok(PromotionCandidate {
            snapshot_id: row.get(0)?,
            tenant_id: row.get(1)?,
            index_type: row.get::<_, String>(2)?.parse().map_err(Self::parse_err)?,
            ingested_at: IngestionMark::from_i64(row.get(3)?),
            status: row.get::<_, String>(4)?.parse().map_err(Self::parse_err)?,
            status_changed_at: row.get(5)?,
            heartbeat_at: row.get(6)?,
            last_refresh_started_at: row.get(7)?,
            last_refreshed_at: row.get(8)?,
            failed_attempts_count: row.get(9)?,
            frequency_mins: row.get(10)?,
        })
    }

    /// `?` placeholder list for a dynamic IN clause.
    fn placeholders(count: usize) -> String {
        vec!["?"; count].join(", ")
    }

    /// Ingestion marks inlined as a comma-separated integer list. Marks are
    /// plain integers, so no quoting is required.
    fn marks_list(marks: &[IngestionMark]) -> String {
        marks
            .iter()
            .map(|m| m.as_i64().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl SchedulerStore for SqliteSchedulerStore {
    // === Tenant Registry ===

    fn upsert_tenants(&self, tenant_ids: &[String]) -> Result<usize> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare("INSERT OR IGNORE INTO tenants (tenant_id) VALUES (?1)")?;
            for tenant_id in tenant_ids {
                inserted += stmt.execute([tenant_id])?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    fn get_tenant(&self, tenant_id: &str) -> Result<Option<Tenant>> {
        let conn = self.conn.lock().unwrap();
        let tenant = conn
            .query_row(
                "SELECT * FROM tenants WHERE tenant_id = ?1",
                [tenant_id],
                Self::row_to_tenant,
            )
            .optional()?;
        Ok(tenant)
    }

    fn get_tenant_by_id(&self, id: i64) -> Result<Option<Tenant>> {
        let conn = self.conn.lock().unwrap();
        let tenant = conn
            .query_row(
                "SELECT * FROM tenants WHERE id = ?1",
                [id],
                Self::row_to_tenant,
            )
            .optional()?;
        Ok(tenant)
    }

    fn list_tenants(
        &self,
        tenant_ids: Option<&[String]>,
        marked_for_deletion: Option<bool>,
    ) -> Result<Vec<Tenant>> {
        let conn = self.conn.lock().unwrap();

        let mut sql = "SELECT * FROM tenants WHERE 1=1".to_string();
        let mut sql_params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(ids) = tenant_ids {
            if ids.is_empty() {
                return Ok(Vec::new());
            }
            sql.push_str(&format!(
                " AND tenant_id IN ({})",
                Self::placeholders(ids.len())
            ));
            for id in ids {
                sql_params.push(Box::new(id.clone()));
            }
        }
        if let Some(deleted) = marked_for_deletion {
            sql.push_str(" AND marked_for_deletion = ?");
            sql_params.push(Box::new(deleted));
        }
        sql.push_str(" ORDER BY tenant_id ASC");

        let mut stmt = conn.prepare(&sql)?;
        let params_refs: Vec<&dyn rusqlite::ToSql> =
            sql_params.iter().map(|p| p.as_ref()).collect();
        let tenants = stmt
            .query_map(params_refs.as_slice(), Self::row_to_tenant)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tenants)
    }

    fn set_tenant_enabled(&self, tenant_id: &str, enabled: bool) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE tenants SET enabled = ?1, updated_at = ?2 WHERE tenant_id = ?3",
            params![enabled, Self::now(), tenant_id],
        )?;
        Ok(changed > 0)
    }

    fn set_tenant_priority(&self, tenant_id: &str, priority: i32) -> Result<usize> {
        let mut conn = self.conn.lock().unwrap();
        let now = Self::now();
        let tx = conn.transaction()?;

        let mut rewritten = tx.execute(
            "UPDATE tenants SET priority = ?1, updated_at = ?2 WHERE tenant_id = ?3",
            params![priority, now, tenant_id],
        )?;
        rewritten += tx.execute(
            r#"UPDATE index_type_configs SET priority = ?1, updated_at = ?2
               WHERE tenant_id = (SELECT id FROM tenants WHERE tenant_id = ?3)"#,
            params![priority, now, tenant_id],
        )?;
        rewritten += tx.execute(
            r#"UPDATE snapshots SET priority = ?1, updated_at = ?2
               WHERE index_type_config_id IN (
                   SELECT c.id FROM index_type_configs c
                   JOIN tenants t ON t.id = c.tenant_id
                   WHERE t.tenant_id = ?3
               )"#,
            params![priority, now, tenant_id],
        )?;

        tx.commit()?;
        Ok(rewritten)
    }

    fn mark_tenants_deleted(&self, tenant_ids: &[String]) -> Result<usize> {
        if tenant_ids.is_empty() {
            return Ok(0);
        }
        let conn = self.conn.lock().unwrap();
        let now = Self::now();
        let sql = format!(
            r#"UPDATE tenants SET marked_for_deletion = 1, marked_for_deletion_at = ?1, updated_at = ?1
               WHERE marked_for_deletion = 0 AND tenant_id IN ({})"#,
            Self::placeholders(tenant_ids.len())
        );
        let mut sql_params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(now)];
        for id in tenant_ids {
            sql_params.push(Box::new(id.clone()));
        }
        let params_refs: Vec<&dyn rusqlite::ToSql> =
            sql_params.iter().map(|p| p.as_ref()).collect();
        Ok(conn.execute(&sql, params_refs.as_slice())?)
    }

    fn mark_tenants_not_deleted(&self, tenant_ids: &[String]) -> Result<usize> {
        if tenant_ids.is_empty() {
            return Ok(0);
        }
        let conn = self.conn.lock().unwrap();
        let now = Self::now();
        let sql = format!(
            r#"UPDATE tenants SET marked_for_deletion = 0, marked_for_deletion_at = NULL, updated_at = ?1
               WHERE marked_for_deletion = 1 AND tenant_id IN ({})"#,
            Self::placeholders(tenant_ids.len())
        );
        let mut sql_params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(now)];
        for id in tenant_ids {
            sql_params.push(Box::new(id.clone()));
        }
        let params_refs: Vec<&dyn rusqlite::ToSql> =
            sql_params.iter().map(|p| p.as_ref()).collect();
        Ok(conn.execute(&sql, params_refs.as_slice())?)
    }

    // === Index-Type Configuration Registry ===

    fn upsert_index_type_config(
        &self,
        tenant_id: &str,
        index_type: IndexType,
        priority: i32,
        frequency_mins: i64,
    ) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();

        let tenant_row_id: Option<i64> = conn
            .query_row(
                "SELECT id FROM tenants WHERE tenant_id = ?1",
                [tenant_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(tenant_row_id) = tenant_row_id else {
            return Ok(None);
        };

        conn.execute(
            r#"INSERT OR IGNORE INTO index_type_configs
               (id, tenant_id, index_type, priority, frequency_mins)
               VALUES (?1, ?2, ?3, ?4, ?5)"#,
            params![
                Uuid::new_v4().to_string(),
                tenant_row_id,
                index_type.as_db_str(),
                priority,
                frequency_mins,
            ],
        )?;

        let id: String = conn.query_row(
            "SELECT id FROM index_type_configs WHERE tenant_id = ?1 AND index_type = ?2",
            params![tenant_row_id, index_type.as_db_str()],
            |row| row.get(0),
        )?;
        Ok(Some(id))
    }

    fn get_index_type_config(&self, id: &str) -> Result<Option<IndexTypeConfig>> {
        let conn = self.conn.lock().unwrap();
        let config = conn
            .query_row(
                "SELECT * FROM index_type_configs WHERE id = ?1",
                [id],
                Self::row_to_config,
            )
            .optional()?;
        Ok(config)
    }

    fn find_index_type_config(
        &self,
        tenant_id: &str,
        index_type: IndexType,
    ) -> Result<Option<IndexTypeConfig>> {
        let conn = self.conn.lock().unwrap();
        let config = conn
            .query_row(
                r#"SELECT c.* FROM index_type_configs c
                   JOIN tenants t ON t.id = c.tenant_id
                   WHERE t.tenant_id = ?1 AND c.index_type = ?2"#,
                params![tenant_id, index_type.as_db_str()],
                Self::row_to_config,
            )
            .optional()?;
        Ok(config)
    }

    fn list_index_type_configs(&self, tenant_id: &str) -> Result<Vec<IndexTypeConfig>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"SELECT c.* FROM index_type_configs c
               JOIN tenants t ON t.id = c.tenant_id
               WHERE t.tenant_id = ?1
               ORDER BY c.index_type ASC"#,
        )?;
        let configs = stmt
            .query_map([tenant_id], Self::row_to_config)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(configs)
    }

    fn set_index_type_config_enabled(&self, id: &str, enabled: bool) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE index_type_configs SET enabled = ?1, updated_at = ?2 WHERE id = ?3",
            params![enabled, Self::now(), id],
        )?;
        Ok(changed > 0)
    }

    fn set_index_type_config_priority(&self, id: &str, priority: i32) -> Result<usize> {
        let mut conn = self.conn.lock().unwrap();
        let now = Self::now();
        let tx = conn.transaction()?;

        let mut rewritten = tx.execute(
            "UPDATE index_type_configs SET priority = ?1, updated_at = ?2 WHERE id = ?3",
            params![priority, now, id],
        )?;
        rewritten += tx.execute(
            "UPDATE snapshots SET priority = ?1, updated_at = ?2 WHERE index_type_config_id = ?3",
            params![priority, now, id],
        )?;

        tx.commit()?;
        Ok(rewritten)
    }

    fn set_index_type_config_frequency(&self, id: &str, frequency_mins: i64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE index_type_configs SET frequency_mins = ?1, updated_at = ?2 WHERE id = ?3",
            params![frequency_mins, Self::now(), id],
        )?;
        Ok(changed > 0)
    }

    // === Snapshot Directory ===

    fn batch_upsert_snapshots(&self, snapshots: &[Snapshot]) -> Result<usize> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                r#"INSERT OR IGNORE INTO snapshots (
                    id, index_type_config_id, index_name, ingested_at, status,
                    index_exists, priority, status_changed_at, last_refresh_started_at,
                    last_refreshed_at, heartbeat_at, latest_offsets, failed_attempts_count,
                    marked_for_deletion, marked_for_deletion_at, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)"#,
            )?;
            for snapshot in snapshots {
                inserted += stmt.execute(params![
                    snapshot.id,
                    snapshot.index_type_config_id,
                    snapshot.index_name,
                    snapshot.ingested_at.as_i64(),
                    snapshot.status.as_db_str(),
                    snapshot.index_exists,
                    snapshot.priority,
                    snapshot.status_changed_at,
                    snapshot.last_refresh_started_at,
                    snapshot.last_refreshed_at,
                    snapshot.heartbeat_at,
                    serde_json::to_string(&snapshot.latest_offsets)?,
                    snapshot.failed_attempts_count,
                    snapshot.marked_for_deletion,
                    snapshot.marked_for_deletion_at,
                    snapshot.created_at,
                    snapshot.updated_at,
                ])?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    fn get_snapshot(&self, id: &str) -> Result<Option<Snapshot>> {
        let conn = self.conn.lock().unwrap();
        let snapshot = conn
            .query_row(
                "SELECT * FROM snapshots WHERE id = ?1",
                [id],
                Self::row_to_snapshot,
            )
            .optional()?;
        Ok(snapshot)
    }

    fn list_snapshots(
        &self,
        filter: &SnapshotFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Snapshot>> {
        let conn = self.conn.lock().unwrap();

        let mut sql = "SELECT * FROM snapshots WHERE 1=1".to_string();
        let mut sql_params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(ids) = &filter.ids {
            if ids.is_empty() {
                return Ok(Vec::new());
            }
            sql.push_str(&format!(" AND id IN ({})", Self::placeholders(ids.len())));
            for id in ids {
                sql_params.push(Box::new(id.clone()));
            }
        }
        if let Some(config_ids) = &filter.index_type_config_ids {
            if config_ids.is_empty() {
                return Ok(Vec::new());
            }
            sql.push_str(&format!(
                " AND index_type_config_id IN ({})",
                Self::placeholders(config_ids.len())
            ));
            for id in config_ids {
                sql_params.push(Box::new(id.clone()));
            }
        }
        if let Some(statuses) = &filter.statuses {
            if statuses.is_empty() {
                return Ok(Vec::new());
            }
            sql.push_str(&format!(
                " AND status IN ({})",
                Self::placeholders(statuses.len())
            ));
            for status in statuses {
                sql_params.push(Box::new(status.as_db_str().to_string()));
            }
        }
        if let Some(deleted) = filter.marked_for_deletion {
            sql.push_str(" AND marked_for_deletion = ?");
            sql_params.push(Box::new(deleted));
        }

        sql.push_str(" ORDER BY ingested_at DESC LIMIT ? OFFSET ?");
        sql_params.push(Box::new(limit as i64));
        sql_params.push(Box::new(offset as i64));

        let mut stmt = conn.prepare(&sql)?;
        let params_refs: Vec<&dyn rusqlite::ToSql> =
            sql_params.iter().map(|p| p.as_ref()).collect();
        let snapshots = stmt
            .query_map(params_refs.as_slice(), Self::row_to_snapshot)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(snapshots)
    }

    fn update_snapshot_priority(&self, id: &str, priority: i32) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE snapshots SET priority = ?1, updated_at = ?2 WHERE id = ?3",
            params![priority, Self::now(), id],
        )?;
        Ok(changed > 0)
    }

    fn tombstone_snapshots_absent_from(
        &self,
        config_id: &str,
        active_marks: &[IngestionMark],
    ) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let now = Self::now();
        // An empty active set tombstones every snapshot of the config; an
        // empty IN () list is not valid SQL, so drop the clause entirely.
        let exclusion = if active_marks.is_empty() {
            String::new()
        } else {
            format!(" AND ingested_at NOT IN ({})", Self::marks_list(active_marks))
        };
        let sql = format!(
            r#"UPDATE snapshots SET marked_for_deletion = 1, marked_for_deletion_at = ?1, updated_at = ?1
               WHERE index_type_config_id = ?2
                 AND marked_for_deletion = 0{}"#,
            exclusion
        );
        Ok(conn.execute(&sql, params![now, config_id])?)
    }

    fn revive_snapshots(&self, config_id: &str, active_marks: &[IngestionMark]) -> Result<usize> {
        if active_marks.is_empty() {
            return Ok(0);
        }
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            r#"UPDATE snapshots SET marked_for_deletion = 0, marked_for_deletion_at = NULL, updated_at = ?1
               WHERE index_type_config_id = ?2
                 AND marked_for_deletion = 1
                 AND ingested_at IN ({})"#,
            Self::marks_list(active_marks)
        );
        Ok(conn.execute(&sql, params![Self::now(), config_id])?)
    }

    // === Worker Protocol ===

    fn update_snapshot_status(
        &self,
        id: &str,
        status: JobStatus,
        last_refresh_started_at: Option<i64>,
    ) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let now = Self::now();

        let changed = match status {
            JobStatus::Success => conn.execute(
                r#"UPDATE snapshots SET
                       status = 'SUCCESS',
                       failed_attempts_count = 0,
                       index_exists = 1,
                       last_refresh_started_at = COALESCE(?1, last_refresh_started_at),
                       last_refreshed_at = ?2,
                       status_changed_at = ?2,
                       updated_at = ?2
                   WHERE id = ?3"#,
                params![last_refresh_started_at, now, id],
            )?,
            JobStatus::Failure => conn.execute(
                r#"UPDATE snapshots SET
                       status = 'FAILURE',
                       failed_attempts_count = failed_attempts_count + 1,
                       status_changed_at = ?1,
                       updated_at = ?1
                   WHERE id = ?2"#,
                params![now, id],
            )?,
            other => conn.execute(
                "UPDATE snapshots SET status = ?1, status_changed_at = ?2, updated_at = ?2 WHERE id = ?3",
                params![other.as_db_str(), now, id],
            )?,
        };
        Ok(changed > 0)
    }

    fn update_snapshot_offsets(&self, id: &str, offsets: &RefreshOffsets) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let now = Self::now();
        let changed = conn.execute(
            r#"UPDATE snapshots SET latest_offsets = ?1, heartbeat_at = ?2, updated_at = ?2
               WHERE id = ?3 AND status = 'PENDING'"#,
            params![serde_json::to_string(offsets)?, now, id],
        )?;
        Ok(changed)
    }

    // === Promotion & Assignment ===

    fn list_promotion_candidates(&self) -> Result<Vec<PromotionCandidate>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"SELECT s.id, t.tenant_id, c.index_type, s.ingested_at, s.status,
                      s.status_changed_at, s.heartbeat_at, s.last_refresh_started_at,
                      s.last_refreshed_at, s.failed_attempts_count, c.frequency_mins
               FROM snapshots s
               JOIN index_type_configs c ON c.id = s.index_type_config_id
               JOIN tenants t ON t.id = c.tenant_id
               WHERE s.marked_for_deletion = 0
                 AND s.status != 'SCHEDULED'
                 AND c.enabled = 1
                 AND t.enabled = 1
                 AND t.marked_for_deletion = 0"#,
        )?;
        let candidates = stmt
            .query_map([], Self::row_to_candidate)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(candidates)
    }

    fn promote_snapshots(&self, snapshot_ids: &[String]) -> Result<usize> {
        if snapshot_ids.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.lock().unwrap();
        let now = Self::now();
        let tx = conn.transaction()?;
        let mut promoted = 0;
        // Stay well below SQLite's bound-parameter limit
        for chunk in snapshot_ids.chunks(500) {
            let sql = format!(
                "UPDATE snapshots SET status = 'SCHEDULED', status_changed_at = ?1, updated_at = ?1 WHERE id IN ({})",
                Self::placeholders(chunk.len())
            );
            let mut sql_params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(now)];
            for id in chunk {
                sql_params.push(Box::new(id.clone()));
            }
            let params_refs: Vec<&dyn rusqlite::ToSql> =
                sql_params.iter().map(|p| p.as_ref()).collect();
            promoted += tx.execute(&sql, params_refs.as_slice())?;
        }
        tx.commit()?;
        Ok(promoted)
    }

    fn promote_snapshots_for(&self, tenant_id: &str, mark: IngestionMark) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let now = Self::now();
        let changed = conn.execute(
            r#"UPDATE snapshots SET status = 'SCHEDULED', status_changed_at = ?1, updated_at = ?1
               WHERE ingested_at = ?2
                 AND marked_for_deletion = 0
                 AND status NOT IN ('SCHEDULED', 'PENDING')
                 AND index_type_config_id IN (
                     SELECT c.id FROM index_type_configs c
                     JOIN tenants t ON t.id = c.tenant_id
                     WHERE t.tenant_id = ?3
                       AND c.enabled = 1
                       AND t.enabled = 1
                       AND t.marked_for_deletion = 0
                 )"#,
            params![now, mark.as_i64(), tenant_id],
        )?;
        Ok(changed)
    }

    fn assign_next_snapshot(&self) -> Result<Option<Snapshot>> {
        let mut conn = self.conn.lock().unwrap();
        let now = Self::now();
        // IMMEDIATE takes the write lock up front so the select and the
        // transition happen under one exclusive transaction even with
        // multiple processes sharing the database file.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let picked: Option<String> = tx
            .query_row(
                r#"SELECT s.id
                   FROM snapshots s
                   JOIN index_type_configs c ON c.id = s.index_type_config_id
                   JOIN tenants t ON t.id = c.tenant_id
                   WHERE s.status = 'SCHEDULED'
                     AND s.marked_for_deletion = 0
                     AND c.enabled = 1
                     AND t.enabled = 1
                     AND t.marked_for_deletion = 0
                   ORDER BY s.priority ASC,
                            ((?1 - COALESCE(s.last_refreshed_at, 0)) / 60 - c.frequency_mins) DESC,
                            s.ingested_at DESC,
                            s.updated_at DESC
                   LIMIT 1"#,
                params![now],
                |row| row.get(0),
            )
            .optional()?;

        let Some(snapshot_id) = picked else {
            tx.commit()?;
            return Ok(None);
        };

        tx.execute(
            r#"UPDATE snapshots SET status = 'PENDING', heartbeat_at = NULL,
                                    status_changed_at = ?1, updated_at = ?1
               WHERE id = ?2"#,
            params![now, snapshot_id],
        )?;

        let snapshot = tx.query_row(
            "SELECT * FROM snapshots WHERE id = ?1",
            [&snapshot_id],
            Self::row_to_snapshot,
        )?;
        tx.commit()?;
        Ok(Some(snapshot))
    }

    fn count_scheduled(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM snapshots WHERE status = 'SCHEDULED'",
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}
