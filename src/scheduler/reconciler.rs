//! Three-way set reconciliation against the authoritative tenant directory.
//!
//! Keeps the tenant registry and each config's snapshot directory in sync
//! with the external source of truth: upsert what is present, revive what
//! came back, tombstone what disappeared. Nothing is ever hard-deleted here,
//! so in-flight leases stay valid until the next promotion sweep naturally
//! excludes their rows.

use crate::config::SchedulerSettings;
use crate::scheduler::directory::TenantDirectory;
use crate::scheduler_store::{IngestionMark, SchedulerStore, Snapshot, SnapshotFilter};
use anyhow::Result;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Row counts touched by one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub inserted: usize,
    pub revived: usize,
    pub tombstoned: usize,
}

impl ReconcileOutcome {
    pub fn is_noop(&self) -> bool {
        self.inserted == 0 && self.revived == 0 && self.tombstoned == 0
    }
}

pub struct Reconciler {
    store: Arc<dyn SchedulerStore>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn SchedulerStore>) -> Self {
        Self { store }
    }

    /// Reconcile the tenant registry against the authoritative id list.
    ///
    /// Idempotent: a second pass with the same input touches zero rows.
    pub fn reconcile_tenants(&self, active_ids: &[String]) -> Result<ReconcileOutcome> {
        let inserted = self.store.upsert_tenants(active_ids)?;
        let revived = self.store.mark_tenants_not_deleted(active_ids)?;

        let active: HashSet<&str> = active_ids.iter().map(|id| id.as_str()).collect();
        let absent: Vec<String> = self
            .store
            .list_tenants(None, Some(false))?
            .into_iter()
            .filter(|tenant| !active.contains(tenant.tenant_id.as_str()))
            .map(|tenant| tenant.tenant_id)
            .collect();
        let tombstoned = self.store.mark_tenants_deleted(&absent)?;

        let outcome = ReconcileOutcome {
            inserted,
            revived,
            tombstoned,
        };
        if !outcome.is_noop() {
            info!(
                "Tenant reconciliation: {} inserted, {} revived, {} tombstoned",
                outcome.inserted, outcome.revived, outcome.tombstoned
            );
        }
        Ok(outcome)
    }

    /// Reconcile a config's snapshot directory against its active ingestion
    /// marks. Unknown config ids reconcile nothing.
    pub fn reconcile_snapshots(
        &self,
        config_id: &str,
        active_marks: &[IngestionMark],
    ) -> Result<ReconcileOutcome> {
        let Some(config) = self.store.get_index_type_config(config_id)? else {
            debug!("Snapshot reconciliation skipped: no config {}", config_id);
            return Ok(ReconcileOutcome::default());
        };
        let Some(tenant) = self.store.get_tenant_by_id(config.tenant_id)? else {
            warn!("Config {} has no owning tenant row", config_id);
            return Ok(ReconcileOutcome::default());
        };

        let existing_marks: HashSet<i64> = self
            .store
            .list_snapshots(
                &SnapshotFilter {
                    index_type_config_ids: Some(vec![config_id.to_string()]),
                    ..Default::default()
                },
                usize::MAX >> 1,
                0,
            )?
            .into_iter()
            .map(|snapshot| snapshot.ingested_at.as_i64())
            .collect();

        let new_snapshots: Vec<Snapshot> = active_marks
            .iter()
            .filter(|mark| !existing_marks.contains(&mark.as_i64()))
            .map(|mark| Snapshot::new(&config, &tenant.tenant_id, *mark))
            .collect();

        let inserted = self.store.batch_upsert_snapshots(&new_snapshots)?;
        let revived = self.store.revive_snapshots(config_id, active_marks)?;
        let tombstoned = self
            .store
            .tombstone_snapshots_absent_from(config_id, active_marks)?;

        let outcome = ReconcileOutcome {
            inserted,
            revived,
            tombstoned,
        };
        if !outcome.is_noop() {
            info!(
                "Snapshot reconciliation for {}: {} inserted, {} revived, {} tombstoned",
                config.index_type, outcome.inserted, outcome.revived, outcome.tombstoned
            );
        }
        Ok(outcome)
    }

    /// Full pass driven by the external directory: tenants first, then every
    /// (tenant, index type) pair it declares. New configs are created with
    /// the configured defaults; existing ones are left untouched.
    pub async fn run(
        &self,
        directory: &dyn TenantDirectory,
        settings: &SchedulerSettings,
    ) -> Result<()> {
        let specs = directory.active_tenants().await?;
        let active_ids: Vec<String> = specs.iter().map(|spec| spec.tenant_id.clone()).collect();
        self.reconcile_tenants(&active_ids)?;

        for spec in &specs {
            for index_type in &spec.index_types {
                let Some(config_id) = self.store.upsert_index_type_config(
                    &spec.tenant_id,
                    *index_type,
                    settings.default_priority,
                    settings.default_frequency_mins,
                )?
                else {
                    warn!("Tenant {} vanished during reconciliation", spec.tenant_id);
                    continue;
                };

                let marks = directory
                    .active_ingestion_marks(&spec.tenant_id, *index_type)
                    .await?;
                self.reconcile_snapshots(&config_id, &marks)?;
            }
        }
        Ok(())
    }
}
