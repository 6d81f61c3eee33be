//! Authoritative tenant directory.
//!
//! The reconciler pulls the list of active tenants and their active
//! ingestion marks from here; in production this sits in front of the
//! provisioning system, while deployments without one can point the daemon
//! at a TOML file.

use crate::scheduler_store::{IndexType, IngestionMark};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::warn;

/// One active tenant and the index types it should be scheduled for.
#[derive(Debug, Clone)]
pub struct TenantSpec {
    pub tenant_id: String,
    pub index_types: Vec<IndexType>,
}

/// Source of truth for which tenants and ingestion marks are active.
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    async fn active_tenants(&self) -> Result<Vec<TenantSpec>>;

    async fn active_ingestion_marks(
        &self,
        tenant_id: &str,
        index_type: IndexType,
    ) -> Result<Vec<IngestionMark>>;
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct DirectoryFile {
    /// Days of day-partitioned history to keep active, in addition to the
    /// open-ended partition.
    retention_days: i64,
    tenants: Vec<DirectoryTenant>,
}

#[derive(Debug, Deserialize)]
struct DirectoryTenant {
    id: String,
    #[serde(default)]
    index_types: Vec<String>,
    retention_days: Option<i64>,
}

/// TOML-backed directory. The file is re-read on every pass so edits are
/// picked up without restarting the daemon.
pub struct FileTenantDirectory {
    path: PathBuf,
}

impl FileTenantDirectory {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    fn load(&self) -> Result<DirectoryFile> {
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read tenant directory file: {:?}", self.path))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse tenant directory file: {:?}", self.path))
    }

    fn parse_index_types(tenant: &DirectoryTenant) -> Vec<IndexType> {
        if tenant.index_types.is_empty() {
            return IndexType::ALL.to_vec();
        }
        tenant
            .index_types
            .iter()
            .filter_map(|name| match IndexType::from_str(name) {
                Ok(index_type) => Some(index_type),
                Err(e) => {
                    warn!("Skipping index type for tenant {}: {}", tenant.id, e);
                    None
                }
            })
            .collect()
    }

    /// The open-ended partition plus one day mark per retained day, ending
    /// with the current UTC day.
    fn marks_for_retention(retention_days: i64, now_ts: i64) -> Vec<IngestionMark> {
        let today = IngestionMark::day_containing(now_ts);
        let mut marks = vec![IngestionMark::Latest];
        for days_back in 0..retention_days.max(0) {
            marks.push(IngestionMark::Day(
                today - days_back * crate::scheduler_store::SECS_PER_DAY,
            ));
        }
        marks
    }
}

#[async_trait]
impl TenantDirectory for FileTenantDirectory {
    async fn active_tenants(&self) -> Result<Vec<TenantSpec>> {
        let file = self.load()?;
        Ok(file
            .tenants
            .iter()
            .map(|tenant| TenantSpec {
                tenant_id: tenant.id.clone(),
                index_types: Self::parse_index_types(tenant),
            })
            .collect())
    }

    async fn active_ingestion_marks(
        &self,
        tenant_id: &str,
        _index_type: IndexType,
    ) -> Result<Vec<IngestionMark>> {
        let file = self.load()?;
        let retention_days = file
            .tenants
            .iter()
            .find(|tenant| tenant.id == tenant_id)
            .and_then(|tenant| tenant.retention_days)
            .unwrap_or(file.retention_days);
        Ok(Self::marks_for_retention(
            retention_days,
            Utc::now().timestamp(),
        ))
    }
}
