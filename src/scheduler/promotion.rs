//! Promotion sweep: decides which snapshots are eligible to run.
//!
//! The policy is pure so every SLA rule can be unit tested; the promoter
//! applies it over the store's gated candidate projection and moves the
//! winners into SCHEDULED in bulk. Promotion only ever feeds the queue, so
//! the sweep needs no mutual exclusion with the lease assigner.

use crate::config::SchedulerSettings;
use crate::metrics;
use crate::scheduler_store::{IndexType, JobStatus, PromotionCandidate, SchedulerStore};
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Eligibility rules evaluated per snapshot.
#[derive(Debug, Clone)]
pub struct PromotionPolicy {
    /// Lease staleness SLA for lightweight index types, in minutes.
    pub short_lease_timeout_mins: i64,
    /// Lease staleness SLA for the heavy index type, in minutes. A single
    /// heavy refresh naturally runs long, so its liveness timeout must be
    /// long enough to avoid reclaiming leases from healthy workers.
    pub long_lease_timeout_mins: i64,
    /// Consecutive failures after which a snapshot is no longer retried.
    pub max_failed_attempts: i32,
}

impl PromotionPolicy {
    pub fn new(settings: &SchedulerSettings) -> Self {
        Self {
            short_lease_timeout_mins: settings.lease_timeout_short_mins,
            long_lease_timeout_mins: settings.lease_timeout_long_mins,
            max_failed_attempts: settings.max_failed_attempts,
        }
    }

    /// Whether a candidate should be promoted to SCHEDULED right now.
    pub fn is_eligible(&self, candidate: &PromotionCandidate, now: DateTime<Utc>) -> bool {
        match candidate.status {
            JobStatus::Unassigned => true,
            JobStatus::Scheduled => false,
            JobStatus::Pending => self.lease_is_stale(candidate, now),
            JobStatus::Failure => candidate.failed_attempts_count < self.max_failed_attempts,
            JobStatus::Success => self.needs_refresh(candidate, now),
        }
    }

    fn lease_timeout_mins(&self, index_type: IndexType) -> i64 {
        if index_type.uses_long_lease() {
            self.long_lease_timeout_mins
        } else {
            self.short_lease_timeout_mins
        }
    }

    /// A lease is stale once the holder has been silent for longer than the
    /// type's SLA, measured from the later of heartbeat and status change.
    fn lease_is_stale(&self, candidate: &PromotionCandidate, now: DateTime<Utc>) -> bool {
        let last_alive = candidate
            .heartbeat_at
            .unwrap_or(candidate.status_changed_at)
            .max(candidate.status_changed_at);
        let elapsed_secs = now.timestamp() - last_alive;
        elapsed_secs > self.lease_timeout_mins(candidate.index_type) * 60
    }

    fn needs_refresh(&self, candidate: &PromotionCandidate, now: DateTime<Utc>) -> bool {
        if candidate.ingested_at.is_open_ended_or_current(now) {
            // Still receiving data: refresh on the configured cadence
            match candidate.last_refreshed_at {
                None => true,
                Some(refreshed) => now.timestamp() - refreshed > candidate.frequency_mins * 60,
            }
        } else {
            // Finalized past day: one catch-up refresh beginning on the
            // following calendar day picks up late-arriving data, after
            // which the partition is left alone.
            match candidate.ingested_at.next_day_start() {
                Some(next_day_start) => candidate
                    .last_refresh_started_at
                    .map_or(true, |started| started < next_day_start),
                None => false,
            }
        }
    }
}

/// Periodic sweep that feeds the SCHEDULED queue.
pub struct Promoter {
    store: Arc<dyn SchedulerStore>,
    policy: PromotionPolicy,
}

impl Promoter {
    pub fn new(store: Arc<dyn SchedulerStore>, policy: PromotionPolicy) -> Self {
        Self { store, policy }
    }

    /// Run one sweep over every live snapshot. Returns the number of
    /// snapshots promoted to SCHEDULED.
    pub fn schedule_jobs(&self) -> Result<usize> {
        let started = Instant::now();
        let now = Utc::now();

        let candidates = self.store.list_promotion_candidates()?;
        let eligible: Vec<String> = candidates
            .iter()
            .filter(|candidate| self.policy.is_eligible(candidate, now))
            .map(|candidate| candidate.snapshot_id.clone())
            .collect();

        let promoted = if eligible.is_empty() {
            0
        } else {
            self.store.promote_snapshots(&eligible)?
        };

        debug!(
            "Promotion sweep evaluated {} candidates, promoted {}",
            candidates.len(),
            promoted
        );
        if promoted > 0 {
            info!("Promoted {} snapshots to SCHEDULED", promoted);
        }

        metrics::record_sweep(started.elapsed(), promoted);
        metrics::set_scheduled_backlog(self.store.count_scheduled()?);
        Ok(promoted)
    }

    /// Forced re-promotion of a (tenant, ingestion-mark) pair, bypassing the
    /// timers and the retry budget. Used by external ingestion trackers when
    /// fresh data lands out of band. Never steals an active lease.
    pub fn schedule_jobs_for(
        &self,
        tenant_id: &str,
        mark: crate::scheduler_store::IngestionMark,
    ) -> Result<usize> {
        let promoted = self.store.promote_snapshots_for(tenant_id, mark)?;
        if promoted > 0 {
            info!(
                "Force-promoted {} snapshots for tenant {} at mark {}",
                promoted,
                tenant_id,
                mark.as_i64()
            );
        }
        metrics::record_forced_promotions(promoted);
        Ok(promoted)
    }
}
