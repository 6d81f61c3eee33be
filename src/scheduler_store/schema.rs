//! Database schema for scheduler.db.
//!
//! Three related tables: tenants own index-type configs, configs own index
//! snapshots. Deletions cascade down the ownership chain; scheduling-time
//! removal is always a soft tombstone, never a row delete.

use crate::sqlite_column;
use crate::sqlite_persistence::{
    Column, ForeignKey, ForeignKeyOnChange, SqlType, Table, VersionedSchema, DEFAULT_TIMESTAMP,
};

const PRIORITY_CHECK: &str = "priority BETWEEN 0 AND 5";

const TENANTS_TABLE_V1: Table = Table {
    name: "tenants",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("tenant_id", &SqlType::Text, non_null = true, is_unique = true),
        sqlite_column!("enabled", &SqlType::Integer, non_null = true, default_value = Some("1")),
        sqlite_column!(
            "priority",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("1"),
            check = Some(PRIORITY_CHECK)
        ),
        sqlite_column!(
            "marked_for_deletion",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("marked_for_deletion_at", &SqlType::Integer),
        sqlite_column!(
            "created_at",
            &SqlType::Integer,
            non_null = true,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
        sqlite_column!(
            "updated_at",
            &SqlType::Integer,
            non_null = true,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
    ],
    indices: &[("idx_tenants_deletion", "marked_for_deletion")],
    unique_constraints: &[],
};

const TENANT_FK: ForeignKey = ForeignKey {
    foreign_table: "tenants",
    foreign_column: "id",
    on_delete: ForeignKeyOnChange::Cascade,
};

const INDEX_TYPE_CONFIGS_TABLE_V1: Table = Table {
    name: "index_type_configs",
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true),
        sqlite_column!(
            "tenant_id",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&TENANT_FK)
        ),
        sqlite_column!("index_type", &SqlType::Text, non_null = true),
        sqlite_column!("enabled", &SqlType::Integer, non_null = true, default_value = Some("1")),
        sqlite_column!(
            "priority",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("1"),
            check = Some(PRIORITY_CHECK)
        ),
        sqlite_column!(
            "frequency_mins",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("60")
        ),
        sqlite_column!(
            "created_at",
            &SqlType::Integer,
            non_null = true,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
        sqlite_column!(
            "updated_at",
            &SqlType::Integer,
            non_null = true,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
    ],
    indices: &[("idx_configs_tenant", "tenant_id")],
    unique_constraints: &[&["tenant_id", "index_type"]],
};

const INDEX_TYPE_CONFIG_FK: ForeignKey = ForeignKey {
    foreign_table: "index_type_configs",
    foreign_column: "id",
    on_delete: ForeignKeyOnChange::Cascade,
};

const SNAPSHOTS_TABLE_V1: Table = Table {
    name: "snapshots",
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true),
        sqlite_column!(
            "index_type_config_id",
            &SqlType::Text,
            non_null = true,
            foreign_key = Some(&INDEX_TYPE_CONFIG_FK)
        ),
        sqlite_column!("index_name", &SqlType::Text, non_null = true),
        sqlite_column!("ingested_at", &SqlType::Integer, non_null = true),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!(
            "index_exists",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!(
            "priority",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("1"),
            check = Some(PRIORITY_CHECK)
        ),
        sqlite_column!(
            "status_changed_at",
            &SqlType::Integer,
            non_null = true,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
        sqlite_column!("last_refresh_started_at", &SqlType::Integer),
        sqlite_column!("last_refreshed_at", &SqlType::Integer),
        sqlite_column!("heartbeat_at", &SqlType::Integer),
        sqlite_column!("latest_offsets", &SqlType::Text),
        sqlite_column!(
            "failed_attempts_count",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!(
            "marked_for_deletion",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("marked_for_deletion_at", &SqlType::Integer),
        sqlite_column!(
            "created_at",
            &SqlType::Integer,
            non_null = true,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
        sqlite_column!(
            "updated_at",
            &SqlType::Integer,
            non_null = true,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
    ],
    indices: &[
        ("idx_snapshots_status_priority", "status, priority, updated_at"),
        ("idx_snapshots_config", "index_type_config_id"),
        ("idx_snapshots_deletion", "marked_for_deletion"),
    ],
    unique_constraints: &[&["index_type_config_id", "ingested_at"]],
};

pub const SCHEDULER_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 0,
    tables: &[
        TENANTS_TABLE_V1,
        INDEX_TYPE_CONFIGS_TABLE_V1,
        SNAPSHOTS_TABLE_V1,
    ],
    migration: None,
}];
