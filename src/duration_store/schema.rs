//! SQLite schema for the duration database.
//!
//! - albums / tracks: the minimal library slice the resolver reads and writes
//! - duration_resolutions: one active resolution per track
//! - duration_sources: per-provider answers, deleted with their resolution
//! - duration_resolver_progress: singleton snapshot of the bulk worker

use crate::sqlite_column;
use crate::sqlite_persistence::{
    Column, ForeignKey, ForeignKeyOnChange, SqlType, Table, VersionedSchema,
};

// =============================================================================
// Version 1 - Library, resolutions and sources
// =============================================================================

const ALBUMS_TABLE_V1: Table = Table {
    name: "albums",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("title", &SqlType::Text, non_null = true),
        sqlite_column!("artist", &SqlType::Text, non_null = true),
    ],
    indices: &[],
};

/// Tracks carry album_id 0 for orphaned rows, so there is no foreign key.
const TRACKS_TABLE_V1: Table = Table {
    name: "tracks",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("album_id", &SqlType::Integer, non_null = true),
        sqlite_column!("title", &SqlType::Text, non_null = true),
        sqlite_column!(
            "track_number",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!(
            "duration",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!(
            "duration_source",
            &SqlType::Text,
            non_null = true,
            default_value = Some("'none'")
        ),
        sqlite_column!(
            "duration_needs_review",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("duration_resolved_at", &SqlType::Integer),
    ],
    indices: &[("idx_tracks_album", "album_id, track_number")],
};

const TRACK_FK: ForeignKey = ForeignKey {
    foreign_table: "tracks",
    foreign_column: "id",
    on_delete: ForeignKeyOnChange::Cascade,
};

const DURATION_RESOLUTIONS_TABLE_V1: Table = Table {
    name: "duration_resolutions",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!(
            "track_id",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&TRACK_FK)
        ),
        sqlite_column!("album_id", &SqlType::Integer, non_null = true),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!(
            "original_duration",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("resolved_duration", &SqlType::Integer),
        sqlite_column!(
            "consensus_count",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!(
            "sources_queried",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!(
            "successful_queries",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!(
            "auto_applied",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("review_action", &SqlType::Text),
        sqlite_column!("reviewed_by", &SqlType::Text),
        sqlite_column!("review_notes", &SqlType::Text),
        sqlite_column!("reviewed_at", &SqlType::Integer),
        sqlite_column!("applied_at", &SqlType::Integer),
        sqlite_column!("created_at", &SqlType::Integer, non_null = true),
        sqlite_column!("updated_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[
        ("idx_duration_resolutions_track", "track_id"),
        ("idx_duration_resolutions_status", "status, updated_at DESC"),
    ],
};

const RESOLUTION_FK: ForeignKey = ForeignKey {
    foreign_table: "duration_resolutions",
    foreign_column: "id",
    on_delete: ForeignKeyOnChange::Cascade,
};

const DURATION_SOURCES_TABLE_V1: Table = Table {
    name: "duration_sources",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!(
            "resolution_id",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&RESOLUTION_FK)
        ),
        sqlite_column!("source_name", &SqlType::Text, non_null = true),
        sqlite_column!(
            "duration_value",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!(
            "match_score",
            &SqlType::Real,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!(
            "confidence",
            &SqlType::Real,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("external_id", &SqlType::Text),
        sqlite_column!("external_url", &SqlType::Text),
        sqlite_column!(
            "error_message",
            &SqlType::Text,
            non_null = true,
            default_value = Some("''")
        ),
        sqlite_column!(
            "query_duration_ms",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("queried_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[("idx_duration_sources_resolution", "resolution_id")],
};

// =============================================================================
// Version 2 - Bulk worker progress
// =============================================================================

/// Singleton row (id = 1) mirroring the bulk worker state.
const DURATION_RESOLVER_PROGRESS_TABLE_V2: Table = Table {
    name: "duration_resolver_progress",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!(
            "total_tracks",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!(
            "processed_tracks",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!(
            "resolved_count",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!(
            "needs_review_count",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!(
            "failed_count",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!(
            "skipped_count",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("current_track_id", &SqlType::Integer),
        sqlite_column!("current_track", &SqlType::Text),
        sqlite_column!("last_processed_track_id", &SqlType::Integer),
        sqlite_column!("last_error", &SqlType::Text),
        sqlite_column!("started_at", &SqlType::Integer),
        sqlite_column!("last_activity_at", &SqlType::Integer),
        sqlite_column!("completed_at", &SqlType::Integer),
    ],
    indices: &[],
};

/// Migration from version 1 to version 2: add the progress table
fn migrate_v1_to_v2(conn: &rusqlite::Connection) -> anyhow::Result<()> {
    DURATION_RESOLVER_PROGRESS_TABLE_V2.create(conn)
}

pub const DURATION_VERSIONED_SCHEMAS: &[VersionedSchema] = &[
    VersionedSchema {
        version: 1,
        tables: &[
            ALBUMS_TABLE_V1,
            TRACKS_TABLE_V1,
            DURATION_RESOLUTIONS_TABLE_V1,
            DURATION_SOURCES_TABLE_V1,
        ],
        migration: None,
    },
    VersionedSchema {
        version: 2,
        tables: &[
            ALBUMS_TABLE_V1,
            TRACKS_TABLE_V1,
            DURATION_RESOLUTIONS_TABLE_V1,
            DURATION_SOURCES_TABLE_V1,
            DURATION_RESOLVER_PROGRESS_TABLE_V2,
        ],
        migration: Some(migrate_v1_to_v2),
    },
];
