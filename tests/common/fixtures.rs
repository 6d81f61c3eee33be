//! Test fixture creation for a tempdir-backed scheduler database.
//!
//! Timestamps that the public API stamps with "now" (last refresh, heartbeat,
//! status change) are backdated through a second raw connection to the same
//! database file, the same way an operator would inspect a live scheduler.db.

use anyhow::Result;
use rusqlite::{params, Connection};
use snapshot_scheduler::config::SchedulerSettings;
use snapshot_scheduler::scheduler::SchedulerService;
use snapshot_scheduler::scheduler_store::{
    IndexType, IngestionMark, Snapshot, SnapshotFilter, SqliteSchedulerStore,
};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

pub struct TestScheduler {
    pub service: Arc<SchedulerService>,
    pub db_path: PathBuf,
    _temp_dir: TempDir,
}

pub fn create_test_scheduler() -> TestScheduler {
    create_test_scheduler_with(SchedulerSettings::default())
}

pub fn create_test_scheduler_with(settings: SchedulerSettings) -> TestScheduler {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("scheduler.db");
    let store = Arc::new(SqliteSchedulerStore::new(&db_path).unwrap());
    let service = Arc::new(SchedulerService::new(store, settings));
    TestScheduler {
        service,
        db_path,
        _temp_dir: temp_dir,
    }
}

impl TestScheduler {
    /// A second connection to the same database file.
    pub fn raw_conn(&self) -> Connection {
        Connection::open(&self.db_path).unwrap()
    }

    /// Create tenant + config, returning the config id.
    pub fn seed_config(
        &self,
        tenant_id: &str,
        tenant_priority: i32,
        index_type: IndexType,
        frequency_mins: i64,
    ) -> Result<String> {
        self.service.upsert_tenants(&[tenant_id.to_string()])?;
        self.service
            .update_tenant_priority(tenant_id, tenant_priority)?;
        let config_id = self
            .service
            .upsert_index_type_config(tenant_id, index_type, tenant_priority, frequency_mins)?
            .expect("tenant was just created");
        Ok(config_id)
    }

    /// Create a snapshot under the config via reconciliation and return it.
    pub fn seed_snapshot(&self, config_id: &str, mark: IngestionMark) -> Result<Snapshot> {
        self.service.reconcile_snapshots(config_id, &[mark])?;
        let snapshot = self
            .service
            .list_snapshots(
                &SnapshotFilter {
                    index_type_config_ids: Some(vec![config_id.to_string()]),
                    ..Default::default()
                },
                100,
                0,
            )?
            .into_iter()
            .find(|snapshot| snapshot.ingested_at == mark)
            .expect("snapshot was just reconciled in");
        Ok(snapshot)
    }

    pub fn backdate_last_refreshed(&self, snapshot_id: &str, secs_ago: i64) {
        let now = chrono::Utc::now().timestamp();
        self.raw_conn()
            .execute(
                "UPDATE snapshots SET last_refreshed_at = ?1 WHERE id = ?2",
                params![now - secs_ago, snapshot_id],
            )
            .unwrap();
    }

    pub fn backdate_heartbeat(&self, snapshot_id: &str, secs_ago: i64) {
        let now = chrono::Utc::now().timestamp();
        self.raw_conn()
            .execute(
                "UPDATE snapshots SET heartbeat_at = ?1 WHERE id = ?2",
                params![now - secs_ago, snapshot_id],
            )
            .unwrap();
    }

    pub fn backdate_status_changed(&self, snapshot_id: &str, secs_ago: i64) {
        let now = chrono::Utc::now().timestamp();
        self.raw_conn()
            .execute(
                "UPDATE snapshots SET status_changed_at = ?1 WHERE id = ?2",
                params![now - secs_ago, snapshot_id],
            )
            .unwrap();
    }

    pub fn set_status_raw(&self, snapshot_id: &str, status: &str) {
        self.raw_conn()
            .execute(
                "UPDATE snapshots SET status = ?1 WHERE id = ?2",
                params![status, snapshot_id],
            )
            .unwrap();
    }
}
