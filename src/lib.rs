//! Snapshot Scheduler Library
//!
//! Refresh scheduler for a multi-tenant search-index fleet: keeps one
//! derived index artifact per (tenant, index-type, ingestion-mark) tuple
//! periodically refreshed, bounds staleness, retries failures within a
//! budget, and hands out at most one lease per snapshot across any number of
//! workers sharing the store.

pub mod config;
pub mod metrics;
pub mod scheduler;
pub mod scheduler_store;
pub mod sqlite_persistence;

// Re-export commonly used types for convenience
pub use config::{AppConfig, CliConfig, FileConfig, SchedulerSettings};
pub use scheduler::{
    FileTenantDirectory, PromotionPolicy, Promoter, ReconcileOutcome, Reconciler, SchedulerService,
    SweepLoop, TenantDirectory, TenantSpec,
};
pub use scheduler_store::{
    IndexType, IngestionMark, JobStatus, RefreshOffsets, SchedulerStore, Snapshot, SnapshotFilter,
    SqliteSchedulerStore, Tenant,
};
