//! Data models for the snapshot scheduler.
//!
//! Defines tenants, per-tenant index-type configurations, index snapshots
//! (the schedulable jobs), job statuses, ingestion marks and refresh offsets.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Seconds in one UTC calendar day; ingestion marks are day-boundary epochs.
pub const SECS_PER_DAY: i64 = 86_400;

/// Lowest (most urgent) priority value. Lower value = served first.
pub const MIN_PRIORITY: i32 = 0;
/// Highest (least urgent) priority value allowed by the schema.
pub const MAX_PRIORITY: i32 = 5;

/// Status of an index snapshot in the refresh state machine.
///
/// `Scheduled` is always transient: the promoter is the only producer and the
/// lease assigner the only consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Unassigned,
    Scheduled,
    Pending,
    Success,
    Failure,
}

#[derive(Debug, Error)]
#[error("unknown job status: {0}")]
pub struct ParseJobStatusError(String);

impl JobStatus {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            JobStatus::Unassigned => "UNASSIGNED",
            JobStatus::Scheduled => "SCHEDULED",
            JobStatus::Pending => "PENDING",
            JobStatus::Success => "SUCCESS",
            JobStatus::Failure => "FAILURE",
        }
    }

    /// Returns true for the terminal outcomes of a refresh attempt.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Failure)
    }
}

impl FromStr for JobStatus {
    type Err = ParseJobStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UNASSIGNED" => Ok(JobStatus::Unassigned),
            "SCHEDULED" => Ok(JobStatus::Scheduled),
            "PENDING" => Ok(JobStatus::Pending),
            "SUCCESS" => Ok(JobStatus::Success),
            "FAILURE" => Ok(JobStatus::Failure),
            _ => Err(ParseJobStatusError(s.to_string())),
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_db_str())
    }
}

/// Kind of derived index a snapshot refreshes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IndexType {
    ScmCommit,
    ScmPr,
    WorkItems,
}

#[derive(Debug, Error)]
#[error("unknown index type: {0}")]
pub struct ParseIndexTypeError(String);

impl IndexType {
    pub const ALL: [IndexType; 3] = [IndexType::ScmCommit, IndexType::ScmPr, IndexType::WorkItems];

    pub fn as_db_str(&self) -> &'static str {
        match self {
            IndexType::ScmCommit => "SCM_COMMIT",
            IndexType::ScmPr => "SCM_PR",
            IndexType::WorkItems => "WORK_ITEMS",
        }
    }

    fn index_prefix(&self) -> &'static str {
        match self {
            IndexType::ScmCommit => "scm_commits",
            IndexType::ScmPr => "scm_prs",
            IndexType::WorkItems => "work_items",
        }
    }

    /// Whether this type uses the long lease-staleness SLA.
    ///
    /// A single WORK_ITEMS refresh routinely runs for over an hour, so its
    /// leases must survive much longer without a heartbeat before being
    /// reclaimed.
    pub fn uses_long_lease(&self) -> bool {
        matches!(self, IndexType::WorkItems)
    }

    /// Name of the physical index partition backing a snapshot,
    /// e.g. `work_items_acme_1612137600` or `work_items_acme_latest`.
    pub fn partitioned_index_name(&self, tenant_id: &str, mark: IngestionMark) -> String {
        format!("{}_{}_{}", self.index_prefix(), tenant_id, mark.label())
    }
}

impl FromStr for IndexType {
    type Err = ParseIndexTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SCM_COMMIT" => Ok(IndexType::ScmCommit),
            "SCM_PR" => Ok(IndexType::ScmPr),
            "WORK_ITEMS" => Ok(IndexType::WorkItems),
            _ => Err(ParseIndexTypeError(s.to_string())),
        }
    }
}

impl std::fmt::Display for IndexType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_db_str())
    }
}

/// Logical "as-of" version of an index: either a fixed UTC day boundary or
/// the open-ended latest partition.
///
/// Stored as an i64; the open-ended mark maps to `i64::MAX` so that a
/// descending sort on the raw value serves the newest data first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IngestionMark {
    Latest,
    Day(i64),
}

impl IngestionMark {
    pub fn as_i64(&self) -> i64 {
        match self {
            IngestionMark::Latest => i64::MAX,
            IngestionMark::Day(epoch) => *epoch,
        }
    }

    pub fn from_i64(value: i64) -> Self {
        if value == i64::MAX {
            IngestionMark::Latest
        } else {
            IngestionMark::Day(value)
        }
    }

    /// Start of the UTC day containing the given timestamp.
    pub fn day_containing(ts: i64) -> i64 {
        ts - ts.rem_euclid(SECS_PER_DAY)
    }

    /// The day mark for the current UTC day.
    pub fn current_day(now: DateTime<Utc>) -> Self {
        IngestionMark::Day(Self::day_containing(now.timestamp()))
    }

    /// True if this mark still receives new data: the open-ended partition,
    /// or the partition of the current UTC day.
    pub fn is_open_ended_or_current(&self, now: DateTime<Utc>) -> bool {
        match self {
            IngestionMark::Latest => true,
            IngestionMark::Day(epoch) => *epoch == Self::day_containing(now.timestamp()),
        }
    }

    /// For a fixed past day, the epoch at which the following calendar day
    /// begins. `None` for the open-ended mark.
    pub fn next_day_start(&self) -> Option<i64> {
        match self {
            IngestionMark::Latest => None,
            IngestionMark::Day(epoch) => Some(epoch + SECS_PER_DAY),
        }
    }

    fn label(&self) -> String {
        match self {
            IngestionMark::Latest => "latest".to_string(),
            IngestionMark::Day(epoch) => epoch.to_string(),
        }
    }
}

impl PartialOrd for IngestionMark {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IngestionMark {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.as_i64().cmp(&other.as_i64())
    }
}

/// Per-integration ingestion cursors persisted alongside a snapshot while a
/// refresh is in flight. Maps are keyed by integration id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshOffsets {
    pub latest_issue_updated_ats: BTreeMap<i64, i64>,
    pub latest_work_item_updated_ats: BTreeMap<i64, i64>,
    pub latest_commit_committed_ats: BTreeMap<i64, i64>,
    pub latest_pr_updated_ats: BTreeMap<i64, i64>,
}

impl RefreshOffsets {
    pub fn is_empty(&self) -> bool {
        self.latest_issue_updated_ats.is_empty()
            && self.latest_work_item_updated_ats.is_empty()
            && self.latest_commit_committed_ats.is_empty()
            && self.latest_pr_updated_ats.is_empty()
    }
}

/// A customer scope known to the scheduler.
#[derive(Debug, Clone)]
pub struct Tenant {
    /// Surrogate row id.
    pub id: i64,
    /// Natural key: the tenant's external identifier.
    pub tenant_id: String,
    /// Gate: a disabled tenant contributes no candidates to the promoter.
    pub enabled: bool,
    /// 0 = served first. Cascades to configs and snapshots on update.
    pub priority: i32,
    pub marked_for_deletion: bool,
    pub marked_for_deletion_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Per (tenant, index-type) refresh settings. Owned by its tenant.
#[derive(Debug, Clone)]
pub struct IndexTypeConfig {
    /// Unique identifier (UUID).
    pub id: String,
    /// Owning tenant row id.
    pub tenant_id: i64,
    pub index_type: IndexType,
    pub enabled: bool,
    pub priority: i32,
    /// How often the open-ended/current-day snapshot should be refreshed.
    pub frequency_mins: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// One schedulable unit of work: the refresh state of a single
/// (index-type-config, ingestion-mark) pair.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Unique identifier (UUID).
    pub id: String,
    /// Owning index-type-config id.
    pub index_type_config_id: String,
    /// Physical index partition name.
    pub index_name: String,
    pub ingested_at: IngestionMark,
    pub status: JobStatus,
    /// Whether the physical index has ever been built.
    pub index_exists: bool,
    /// Denormalized copy kept consistent by the priority cascade.
    pub priority: i32,
    pub status_changed_at: i64,
    /// When the refresh that produced the last terminal status began.
    pub last_refresh_started_at: Option<i64>,
    /// When the last successful refresh completed.
    pub last_refreshed_at: Option<i64>,
    /// Sole liveness signal while leased; cleared when a lease is granted.
    pub heartbeat_at: Option<i64>,
    pub latest_offsets: RefreshOffsets,
    /// Consecutive failures since the last success.
    pub failed_attempts_count: i32,
    pub marked_for_deletion: bool,
    pub marked_for_deletion_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Snapshot {
    /// Create a fresh, unassigned snapshot for a config's ingestion mark.
    pub fn new(config: &IndexTypeConfig, tenant_id: &str, mark: IngestionMark) -> Self {
        let now = Utc::now().timestamp();
        Self {
            id: Uuid::new_v4().to_string(),
            index_type_config_id: config.id.clone(),
            index_name: config.index_type.partitioned_index_name(tenant_id, mark),
            ingested_at: mark,
            status: JobStatus::Unassigned,
            index_exists: false,
            priority: config.priority,
            status_changed_at: now,
            last_refresh_started_at: None,
            last_refreshed_at: None,
            heartbeat_at: None,
            latest_offsets: RefreshOffsets::default(),
            failed_attempts_count: 0,
            marked_for_deletion: false,
            marked_for_deletion_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Read-only projection the promoter evaluates, joined across the three
/// tables with all gating (tenant enabled and live, config enabled, snapshot
/// live) already applied by the store.
#[derive(Debug, Clone)]
pub struct PromotionCandidate {
    pub snapshot_id: String,
    pub tenant_id: String,
    pub index_type: IndexType,
    pub ingested_at: IngestionMark,
    pub status: JobStatus,
    pub status_changed_at: i64,
    pub heartbeat_at: Option<i64>,
    pub last_refresh_started_at: Option<i64>,
    pub last_refreshed_at: Option<i64>,
    pub failed_attempts_count: i32,
    pub frequency_mins: i64,
}

/// Filter for paged snapshot listings. All fields are conjunctive; `None`
/// means "don't filter on this".
#[derive(Debug, Clone, Default)]
pub struct SnapshotFilter {
    pub ids: Option<Vec<String>>,
    pub index_type_config_ids: Option<Vec<String>>,
    pub statuses: Option<Vec<JobStatus>>,
    pub marked_for_deletion: Option<bool>,
}
