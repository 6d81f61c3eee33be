//! Scheduler service facade.
//!
//! Single entry point collaborators call into: registry upkeep,
//! reconciliation, promotion sweeps, lease assignment and the worker
//! protocol. Thin orchestration over the store plus logging and metrics;
//! every business rule lives in the store and the promotion policy.

use crate::config::SchedulerSettings;
use crate::metrics;
use crate::scheduler::directory::TenantDirectory;
use crate::scheduler::promotion::{PromotionPolicy, Promoter};
use crate::scheduler::reconciler::{ReconcileOutcome, Reconciler};
use crate::scheduler_store::{
    IndexType, IngestionMark, JobStatus, RefreshOffsets, SchedulerStore, Snapshot, SnapshotFilter,
    Tenant, MAX_PRIORITY, MIN_PRIORITY,
};
use anyhow::{ensure, Result};
use std::sync::Arc;
use tracing::{info, warn};

pub struct SchedulerService {
    store: Arc<dyn SchedulerStore>,
    promoter: Promoter,
    reconciler: Reconciler,
    settings: SchedulerSettings,
}

impl SchedulerService {
    pub fn new(store: Arc<dyn SchedulerStore>, settings: SchedulerSettings) -> Self {
        let promoter = Promoter::new(Arc::clone(&store), PromotionPolicy::new(&settings));
        let reconciler = Reconciler::new(Arc::clone(&store));
        Self {
            store,
            promoter,
            reconciler,
            settings,
        }
    }

    fn check_priority(priority: i32) -> Result<()> {
        ensure!(
            (MIN_PRIORITY..=MAX_PRIORITY).contains(&priority),
            "priority {} outside allowed range {}..={}",
            priority,
            MIN_PRIORITY,
            MAX_PRIORITY
        );
        Ok(())
    }

    // === Tenant Registry ===

    pub fn upsert_tenants(&self, tenant_ids: &[String]) -> Result<usize> {
        self.store.upsert_tenants(tenant_ids)
    }

    pub fn get_tenant(&self, tenant_id: &str) -> Result<Option<Tenant>> {
        self.store.get_tenant(tenant_id)
    }

    pub fn list_tenants(
        &self,
        tenant_ids: Option<&[String]>,
        marked_for_deletion: Option<bool>,
    ) -> Result<Vec<Tenant>> {
        self.store.list_tenants(tenant_ids, marked_for_deletion)
    }

    pub fn reconcile_tenants(&self, active_ids: &[String]) -> Result<ReconcileOutcome> {
        self.reconciler.reconcile_tenants(active_ids)
    }

    pub fn set_tenant_enabled(&self, tenant_id: &str, enabled: bool) -> Result<bool> {
        let changed = self.store.set_tenant_enabled(tenant_id, enabled)?;
        if changed {
            info!(
                "Tenant {} scheduling {}",
                tenant_id,
                if enabled { "enabled" } else { "disabled" }
            );
        }
        Ok(changed)
    }

    /// Cascades to the tenant's configs and their snapshots.
    pub fn update_tenant_priority(&self, tenant_id: &str, priority: i32) -> Result<usize> {
        Self::check_priority(priority)?;
        let rewritten = self.store.set_tenant_priority(tenant_id, priority)?;
        if rewritten > 0 {
            info!(
                "Tenant {} priority set to {} ({} rows rewritten)",
                tenant_id, priority, rewritten
            );
        }
        Ok(rewritten)
    }

    // === Index-Type Configuration Registry ===

    pub fn upsert_index_type_config(
        &self,
        tenant_id: &str,
        index_type: IndexType,
        priority: i32,
        frequency_mins: i64,
    ) -> Result<Option<String>> {
        Self::check_priority(priority)?;
        self.store
            .upsert_index_type_config(tenant_id, index_type, priority, frequency_mins)
    }

    pub fn set_index_type_config_enabled(&self, config_id: &str, enabled: bool) -> Result<bool> {
        self.store.set_index_type_config_enabled(config_id, enabled)
    }

    /// Cascades to the config's snapshots.
    pub fn update_index_type_config_priority(
        &self,
        config_id: &str,
        priority: i32,
    ) -> Result<usize> {
        Self::check_priority(priority)?;
        self.store.set_index_type_config_priority(config_id, priority)
    }

    pub fn set_index_type_config_frequency(
        &self,
        config_id: &str,
        frequency_mins: i64,
    ) -> Result<bool> {
        self.store
            .set_index_type_config_frequency(config_id, frequency_mins)
    }

    // === Snapshot Directory ===

    pub fn upsert_snapshots(&self, snapshots: &[Snapshot]) -> Result<usize> {
        self.store.batch_upsert_snapshots(snapshots)
    }

    pub fn reconcile_snapshots(
        &self,
        config_id: &str,
        active_marks: &[IngestionMark],
    ) -> Result<ReconcileOutcome> {
        self.reconciler.reconcile_snapshots(config_id, active_marks)
    }

    pub fn get_snapshot(&self, snapshot_id: &str) -> Result<Option<Snapshot>> {
        self.store.get_snapshot(snapshot_id)
    }

    pub fn list_snapshots(
        &self,
        filter: &SnapshotFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Snapshot>> {
        self.store.list_snapshots(filter, limit, offset)
    }

    pub fn update_snapshot_priority(&self, snapshot_id: &str, priority: i32) -> Result<bool> {
        Self::check_priority(priority)?;
        self.store.update_snapshot_priority(snapshot_id, priority)
    }

    // === Scheduling ===

    /// Run one promotion sweep. Returns the number of snapshots promoted.
    pub fn schedule_jobs(&self) -> Result<usize> {
        self.promoter.schedule_jobs()
    }

    /// Forced re-promotion hook for external ingestion trackers.
    pub fn schedule_jobs_for(&self, tenant_id: &str, mark: IngestionMark) -> Result<usize> {
        self.promoter.schedule_jobs_for(tenant_id, mark)
    }

    /// Hand out at most one lease. `None` means nothing is ready to run.
    pub fn assign_job(&self) -> Result<Option<Snapshot>> {
        let assigned = self.store.assign_next_snapshot()?;
        metrics::record_assignment(assigned.is_some());
        if let Some(snapshot) = &assigned {
            info!(
                "Assigned snapshot {} ({}) to a worker",
                snapshot.id, snapshot.index_name
            );
        }
        Ok(assigned)
    }

    /// Full reconciliation pass against the authoritative directory.
    pub async fn reconcile_with(&self, directory: &dyn TenantDirectory) -> Result<()> {
        self.reconciler.run(directory, &self.settings).await
    }

    // === Worker Protocol ===

    /// Terminal (or corrective) status report from a lease holder.
    ///
    /// Accepted unconditionally by snapshot id (last writer wins, matching
    /// the store contract). A report against a snapshot that is not currently
    /// leased is logged, since it usually means the lease went stale and was
    /// reclaimed while the worker kept running.
    pub fn report_status(
        &self,
        snapshot_id: &str,
        status: JobStatus,
        last_refresh_started_at: Option<i64>,
    ) -> Result<bool> {
        if let Some(current) = self.store.get_snapshot(snapshot_id)? {
            if status.is_terminal() && current.status != JobStatus::Pending {
                warn!(
                    "Status report {} for snapshot {} which is {} (lease likely reclaimed)",
                    status, snapshot_id, current.status
                );
            }
        } else {
            return Ok(false);
        }

        let changed =
            self.store
                .update_snapshot_status(snapshot_id, status, last_refresh_started_at)?;
        if changed {
            metrics::record_status_report(status.as_db_str());
        }
        Ok(changed)
    }

    /// Progress report from a lease holder: persists the cursor blob and
    /// refreshes the heartbeat. Ignored (returns 0) unless the snapshot is
    /// currently leased.
    pub fn report_progress(&self, snapshot_id: &str, offsets: &RefreshOffsets) -> Result<usize> {
        let applied = self.store.update_snapshot_offsets(snapshot_id, offsets)?;
        if applied > 0 {
            metrics::record_progress_report();
        }
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler_store::SqliteSchedulerStore;

    fn make_service() -> SchedulerService {
        let store = Arc::new(SqliteSchedulerStore::in_memory().unwrap());
        SchedulerService::new(store, SchedulerSettings::default())
    }

    fn seed_snapshot(service: &SchedulerService, tenant: &str, mark: IngestionMark) -> Snapshot {
        service.upsert_tenants(&[tenant.to_string()]).unwrap();
        let config_id = service
            .upsert_index_type_config(tenant, IndexType::WorkItems, 1, 60)
            .unwrap()
            .unwrap();
        service.reconcile_snapshots(&config_id, &[mark]).unwrap();
        service
            .list_snapshots(
                &SnapshotFilter {
                    index_type_config_ids: Some(vec![config_id]),
                    ..Default::default()
                },
                10,
                0,
            )
            .unwrap()
            .remove(0)
    }

    #[test]
    fn test_schedule_then_assign_round_trip() {
        let service = make_service();
        let snapshot = seed_snapshot(&service, "acme", IngestionMark::Latest);

        assert_eq!(service.schedule_jobs().unwrap(), 1);
        let assigned = service.assign_job().unwrap().unwrap();
        assert_eq!(assigned.id, snapshot.id);
        assert_eq!(assigned.status, JobStatus::Pending);
        assert!(assigned.heartbeat_at.is_none());

        // Queue drained
        assert!(service.assign_job().unwrap().is_none());
    }

    #[test]
    fn test_tenant_priority_orders_assignment() {
        let service = make_service();
        let relaxed = seed_snapshot(&service, "relaxed", IngestionMark::Latest);
        let urgent = seed_snapshot(&service, "urgent", IngestionMark::Latest);
        service.update_tenant_priority("relaxed", 3).unwrap();
        service.update_tenant_priority("urgent", 0).unwrap();

        service.schedule_jobs().unwrap();

        assert_eq!(service.assign_job().unwrap().unwrap().id, urgent.id);
        assert_eq!(service.assign_job().unwrap().unwrap().id, relaxed.id);
    }

    #[test]
    fn test_worker_protocol_success_flow() {
        let service = make_service();
        let snapshot = seed_snapshot(&service, "acme", IngestionMark::Latest);

        service.schedule_jobs().unwrap();
        let leased = service.assign_job().unwrap().unwrap();

        let mut offsets = RefreshOffsets::default();
        offsets.latest_work_item_updated_ats.insert(4, 1612137000);
        assert_eq!(service.report_progress(&leased.id, &offsets).unwrap(), 1);

        let started_at = 1700000000;
        assert!(service
            .report_status(&leased.id, JobStatus::Success, Some(started_at))
            .unwrap());

        let finished = service.get_snapshot(&snapshot.id).unwrap().unwrap();
        assert_eq!(finished.status, JobStatus::Success);
        assert!(finished.index_exists);
        assert_eq!(finished.failed_attempts_count, 0);
        assert_eq!(finished.last_refresh_started_at, Some(started_at));
        assert_eq!(finished.latest_offsets, offsets);
    }

    #[test]
    fn test_report_for_unknown_snapshot_is_absent_result() {
        let service = make_service();
        assert!(!service
            .report_status("no-such-id", JobStatus::Success, None)
            .unwrap());
        assert_eq!(
            service
                .report_progress("no-such-id", &RefreshOffsets::default())
                .unwrap(),
            0
        );
    }

    #[test]
    fn test_late_report_last_writer_wins() {
        let service = make_service();
        let snapshot = seed_snapshot(&service, "acme", IngestionMark::Latest);

        // Not leased, but the report is still applied
        assert!(service
            .report_status(&snapshot.id, JobStatus::Failure, None)
            .unwrap());
        let row = service.get_snapshot(&snapshot.id).unwrap().unwrap();
        assert_eq!(row.status, JobStatus::Failure);
        assert_eq!(row.failed_attempts_count, 1);
    }

    #[test]
    fn test_priority_out_of_range_is_rejected() {
        let service = make_service();
        seed_snapshot(&service, "acme", IngestionMark::Latest);
        assert!(service.update_tenant_priority("acme", 6).is_err());
        assert!(service.update_tenant_priority("acme", -1).is_err());
    }

    #[test]
    fn test_disabled_tenant_never_promoted() {
        let service = make_service();
        let snapshot = seed_snapshot(&service, "acme", IngestionMark::Latest);
        service.set_tenant_enabled("acme", false).unwrap();

        assert_eq!(service.schedule_jobs().unwrap(), 0);
        assert_eq!(
            service.get_snapshot(&snapshot.id).unwrap().unwrap().status,
            JobStatus::Unassigned
        );
    }

    #[test]
    fn test_retry_budget_exhaustion_stops_promotion() {
        let service = make_service();
        let snapshot = seed_snapshot(&service, "acme", IngestionMark::Latest);

        for round in 0..5 {
            assert_eq!(service.schedule_jobs().unwrap(), 1, "round {}", round);
            let leased = service.assign_job().unwrap().unwrap();
            service
                .report_status(&leased.id, JobStatus::Failure, None)
                .unwrap();
        }

        // 5 consecutive failures: the budget is spent
        assert_eq!(service.schedule_jobs().unwrap(), 0);
        let row = service.get_snapshot(&snapshot.id).unwrap().unwrap();
        assert_eq!(row.status, JobStatus::Failure);
        assert_eq!(row.failed_attempts_count, 5);

        // Until the forced hook intervenes
        assert_eq!(
            service
                .schedule_jobs_for("acme", IngestionMark::Latest)
                .unwrap(),
            1
        );
    }
}
