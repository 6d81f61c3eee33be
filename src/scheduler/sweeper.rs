//! Periodic sweep loop for the scheduler daemon.
//!
//! Reconciles against the tenant directory (when one is configured) and runs
//! a promotion sweep on a jittered interval until shutdown. Workers are
//! external processes; this loop only keeps the registries accurate and the
//! SCHEDULED queue fed.

use crate::config::SchedulerSettings;
use crate::scheduler::directory::TenantDirectory;
use crate::scheduler::service::SchedulerService;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

pub struct SweepLoop {
    service: Arc<SchedulerService>,
    directory: Option<Arc<dyn TenantDirectory>>,
    settings: SchedulerSettings,
    shutdown_token: CancellationToken,
}

impl SweepLoop {
    pub fn new(
        service: Arc<SchedulerService>,
        directory: Option<Arc<dyn TenantDirectory>>,
        settings: SchedulerSettings,
        shutdown_token: CancellationToken,
    ) -> Self {
        Self {
            service,
            directory,
            settings,
            shutdown_token,
        }
    }

    /// Run until the shutdown token fires. The first sweep happens
    /// immediately so a freshly started daemon does not sit idle for a full
    /// interval.
    pub async fn run(&self) {
        info!(
            "Starting sweep loop (interval: {}s, directory: {})",
            self.settings.sweep_interval_secs,
            if self.directory.is_some() {
                "configured"
            } else {
                "none"
            }
        );

        self.sweep_once().await;

        loop {
            let sleep_duration = self.next_interval();
            debug!("Sweep loop sleeping for {:?}", sleep_duration);

            tokio::select! {
                _ = tokio::time::sleep(sleep_duration) => {
                    self.sweep_once().await;
                }
                _ = self.shutdown_token.cancelled() => {
                    info!("Sweep loop received shutdown signal");
                    break;
                }
            }
        }

        info!("Sweep loop stopped");
    }

    async fn sweep_once(&self) {
        if let Some(directory) = &self.directory {
            if let Err(e) = self.service.reconcile_with(directory.as_ref()).await {
                // Directory hiccups are retried on the next pass
                error!("Reconciliation failed: {:#}", e);
            }
        }

        match self.service.schedule_jobs() {
            Ok(promoted) => debug!("Sweep promoted {} snapshots", promoted),
            Err(e) => error!("Promotion sweep failed: {:#}", e),
        }
    }

    /// Interval with ±10% jitter so multiple schedulers sharing one store
    /// don't sweep in lockstep.
    fn next_interval(&self) -> Duration {
        let base = self.settings.sweep_interval_secs.max(1) as f64;
        let jitter = rand::rng().random_range(0.9..1.1);
        Duration::from_secs_f64(base * jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::directory::{TenantDirectory, TenantSpec};
    use crate::scheduler_store::{IndexType, IngestionMark, JobStatus, SqliteSchedulerStore};
    use crate::scheduler_store::SchedulerStore;
    use anyhow::Result;
    use async_trait::async_trait;

    struct StaticDirectory {
        tenants: Vec<&'static str>,
    }

    #[async_trait]
    impl TenantDirectory for StaticDirectory {
        async fn active_tenants(&self) -> Result<Vec<TenantSpec>> {
            Ok(self
                .tenants
                .iter()
                .map(|id| TenantSpec {
                    tenant_id: id.to_string(),
                    index_types: vec![IndexType::WorkItems],
                })
                .collect())
        }

        async fn active_ingestion_marks(
            &self,
            _tenant_id: &str,
            _index_type: IndexType,
        ) -> Result<Vec<IngestionMark>> {
            Ok(vec![IngestionMark::Latest])
        }
    }

    #[tokio::test]
    async fn test_first_sweep_runs_immediately() {
        let store = Arc::new(SqliteSchedulerStore::in_memory().unwrap());
        let service = Arc::new(SchedulerService::new(
            store.clone(),
            SchedulerSettings::default(),
        ));
        let directory: Arc<dyn TenantDirectory> = Arc::new(StaticDirectory {
            tenants: vec!["acme"],
        });

        let settings = SchedulerSettings {
            sweep_interval_secs: 3600,
            ..Default::default()
        };
        let shutdown_token = CancellationToken::new();
        let sweep_loop = SweepLoop::new(
            service.clone(),
            Some(directory),
            settings,
            shutdown_token.clone(),
        );

        let handle = tokio::spawn(async move { sweep_loop.run().await });
        tokio::time::sleep(Duration::from_millis(300)).await;

        // The startup sweep reconciled the tenant and promoted its snapshot
        assert!(store.get_tenant("acme").unwrap().is_some());
        let assigned = service.assign_job().unwrap().unwrap();
        assert_eq!(assigned.status, JobStatus::Pending);

        shutdown_token.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_loop() {
        let store = Arc::new(SqliteSchedulerStore::in_memory().unwrap());
        let service = Arc::new(SchedulerService::new(store, SchedulerSettings::default()));
        let shutdown_token = CancellationToken::new();
        let sweep_loop = SweepLoop::new(
            service,
            None,
            SchedulerSettings::default(),
            shutdown_token.clone(),
        );

        let handle = tokio::spawn(async move { sweep_loop.run().await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_token.cancel();

        let finished = tokio::time::timeout(Duration::from_secs(2), handle).await;
        assert!(finished.is_ok(), "loop must stop promptly on shutdown");
    }
}
