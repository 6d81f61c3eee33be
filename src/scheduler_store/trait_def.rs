//! SchedulerStore trait definition.
//!
//! The shared durable store is the coordination point for every worker in the
//! fleet; its one non-trivial primitive is the atomic select-and-transition
//! in `assign_next_snapshot`. Everything else is single-row or transactional
//! multi-row writes.

use super::models::*;
use anyhow::Result;

/// Trait for scheduler storage backends.
///
/// Business outcomes are encoded in data, not errors: writes addressing rows
/// that do not exist report zero rows touched, duplicate-key upserts are
/// no-ops, and an empty assignment pool yields `None`. Only persistence
/// failures surface as errors.
pub trait SchedulerStore: Send + Sync {
    // === Tenant Registry ===

    /// Insert every id that is not already present. Existing rows are left
    /// untouched. Returns the number of rows inserted.
    fn upsert_tenants(&self, tenant_ids: &[String]) -> Result<usize>;

    /// Get a tenant by its natural key.
    fn get_tenant(&self, tenant_id: &str) -> Result<Option<Tenant>>;

    /// Get a tenant by its surrogate row id (the key configs point at).
    fn get_tenant_by_id(&self, id: i64) -> Result<Option<Tenant>>;

    /// List tenants, optionally restricted to an id set and/or tombstone state.
    fn list_tenants(
        &self,
        tenant_ids: Option<&[String]>,
        marked_for_deletion: Option<bool>,
    ) -> Result<Vec<Tenant>>;

    /// Enable or disable scheduling for a tenant. Returns false if the tenant
    /// does not exist.
    fn set_tenant_enabled(&self, tenant_id: &str, enabled: bool) -> Result<bool>;

    /// Set a tenant's priority and cascade it to all of its index-type
    /// configs and their snapshots, in one transaction. Returns the total
    /// number of rows rewritten.
    fn set_tenant_priority(&self, tenant_id: &str, priority: i32) -> Result<usize>;

    /// Tombstone the given tenants (timestamp = now). Rows already
    /// tombstoned are left untouched. Returns the number of rows changed.
    fn mark_tenants_deleted(&self, tenant_ids: &[String]) -> Result<usize>;

    /// Clear the tombstone on the given tenants. Returns the number of rows
    /// changed.
    fn mark_tenants_not_deleted(&self, tenant_ids: &[String]) -> Result<usize>;

    // === Index-Type Configuration Registry ===

    /// Insert a config for (tenant, index type) unless one exists; on
    /// conflict the existing row is left as is. Returns the config id either
    /// way, or `None` if the tenant does not exist.
    fn upsert_index_type_config(
        &self,
        tenant_id: &str,
        index_type: IndexType,
        priority: i32,
        frequency_mins: i64,
    ) -> Result<Option<String>>;

    /// Get a config by id.
    fn get_index_type_config(&self, id: &str) -> Result<Option<IndexTypeConfig>>;

    /// Get the config for a (tenant, index type) pair.
    fn find_index_type_config(
        &self,
        tenant_id: &str,
        index_type: IndexType,
    ) -> Result<Option<IndexTypeConfig>>;

    /// List all configs belonging to a tenant.
    fn list_index_type_configs(&self, tenant_id: &str) -> Result<Vec<IndexTypeConfig>>;

    /// Enable or disable a config. Returns false if it does not exist.
    fn set_index_type_config_enabled(&self, id: &str, enabled: bool) -> Result<bool>;

    /// Set a config's priority and cascade it to all of its snapshots in one
    /// transaction. Returns the total number of rows rewritten.
    fn set_index_type_config_priority(&self, id: &str, priority: i32) -> Result<usize>;

    /// Set a config's refresh frequency. Returns false if it does not exist.
    fn set_index_type_config_frequency(&self, id: &str, frequency_mins: i64) -> Result<bool>;

    // === Snapshot Directory ===

    /// Insert every snapshot whose (config, ingestion-mark) pair is not
    /// already present; existing rows are left untouched. Returns the number
    /// of rows inserted.
    fn batch_upsert_snapshots(&self, snapshots: &[Snapshot]) -> Result<usize>;

    /// Get a snapshot by id.
    fn get_snapshot(&self, id: &str) -> Result<Option<Snapshot>>;

    /// Paged, filtered listing ordered by ingestion mark descending.
    fn list_snapshots(
        &self,
        filter: &SnapshotFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Snapshot>>;

    /// Set a single snapshot's priority. Returns false if it does not exist.
    fn update_snapshot_priority(&self, id: &str, priority: i32) -> Result<bool>;

    /// Tombstone every snapshot of the config whose ingestion mark is NOT in
    /// `active_marks`. Rows already tombstoned keep their original
    /// timestamp. Returns the number of rows changed.
    fn tombstone_snapshots_absent_from(
        &self,
        config_id: &str,
        active_marks: &[IngestionMark],
    ) -> Result<usize>;

    /// Clear the tombstone on every snapshot of the config whose ingestion
    /// mark IS in `active_marks`. Returns the number of rows changed.
    fn revive_snapshots(&self, config_id: &str, active_marks: &[IngestionMark]) -> Result<usize>;

    // === Worker Protocol ===

    /// Record a status transition reported for a snapshot.
    ///
    /// `Failure` increments the failed-attempt counter; `Success` resets it,
    /// marks the index as existing, stores the caller-provided refresh start
    /// time and stamps the refresh completion. The heartbeat is never
    /// advanced by a status write. Returns false if the snapshot does not
    /// exist.
    fn update_snapshot_status(
        &self,
        id: &str,
        status: JobStatus,
        last_refresh_started_at: Option<i64>,
    ) -> Result<bool>;

    /// Persist in-flight refresh offsets and touch the heartbeat, but only
    /// while the snapshot is `PENDING`. Returns the number of rows updated
    /// (0 or 1); 0 means the write was ignored.
    fn update_snapshot_offsets(&self, id: &str, offsets: &RefreshOffsets) -> Result<usize>;

    // === Promotion & Assignment ===

    /// All live snapshots visible to the promoter: snapshot not tombstoned,
    /// config enabled, tenant enabled and not tombstoned. `SCHEDULED` rows
    /// are excluded since they are already in the queue.
    fn list_promotion_candidates(&self) -> Result<Vec<PromotionCandidate>>;

    /// Bulk-move the given snapshots to `SCHEDULED`. Returns the number of
    /// rows changed.
    fn promote_snapshots(&self, snapshot_ids: &[String]) -> Result<usize>;

    /// Force-promote every live, gated snapshot of (tenant, ingestion mark)
    /// that is not already `SCHEDULED` or `PENDING`, bypassing the timers
    /// and the retry budget. Returns the number of rows changed.
    fn promote_snapshots_for(&self, tenant_id: &str, mark: IngestionMark) -> Result<usize>;

    /// Atomically pick the single most urgent `SCHEDULED` snapshot (gated by
    /// tenant/config enabled and live) and transition it to `PENDING` with a
    /// cleared heartbeat. Selection and transition happen in one
    /// transaction, so no two callers can ever receive the same snapshot.
    ///
    /// Ordering: priority ascending, lag descending, ingestion mark
    /// descending, last-updated descending.
    fn assign_next_snapshot(&self) -> Result<Option<Snapshot>>;

    /// Number of snapshots currently sitting in `SCHEDULED`.
    fn count_scheduled(&self) -> Result<usize>;
}
