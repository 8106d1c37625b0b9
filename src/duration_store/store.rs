use super::models::*;
use super::schema::DURATION_VERSIONED_SCHEMAS;
use super::trait_def::DurationStore;
use crate::sqlite_persistence::{read_schema_version, BASE_DB_VERSION};
use anyhow::{bail, Context, Result};
use chrono::Utc;
use rusqlite::{params, params_from_iter, types::Value, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

const RESOLUTION_COLUMNS: &str = "id, track_id, album_id, status, original_duration, \
    resolved_duration, consensus_count, sources_queried, successful_queries, auto_applied, \
    review_action, reviewed_by, review_notes, reviewed_at, applied_at, created_at, updated_at";

const SOURCE_COLUMNS: &str = "id, resolution_id, source_name, duration_value, match_score, \
    confidence, external_id, external_url, error_message, query_duration_ms, queried_at";

const TRACK_COLUMNS: &str = "id, album_id, title, track_number, duration, duration_source, \
    duration_needs_review, duration_resolved_at";

const PROGRESS_ROW_ID: i64 = 1;

/// Makes `%`, `_` and `\` match literally under `ESCAPE '\'`.
fn escape_like(search: &str) -> String {
    let mut escaped = String::with_capacity(search.len());
    for c in search.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

pub struct SqliteDurationStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteDurationStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        let is_new_db = !path.exists();

        let mut conn = Connection::open(path).context("Failed to open duration database")?;
        conn.execute("PRAGMA foreign_keys = ON;", [])?;

        let latest = DURATION_VERSIONED_SCHEMAS
            .last()
            .context("No duration schema versions defined")?;

        if is_new_db {
            info!("Creating new duration database at {:?}", path);
            latest.create(&conn)?;
        } else {
            let db_version = read_schema_version(&conn)?;
            if db_version < 1 {
                bail!(
                    "Duration database version {} is invalid (expected >= 1)",
                    db_version
                );
            }

            let schema = DURATION_VERSIONED_SCHEMAS
                .iter()
                .find(|s| s.version as i64 == db_version)
                .with_context(|| format!("Unknown duration database version {}", db_version))?;
            schema.validate(&conn).with_context(|| {
                format!(
                    "Duration database schema validation failed for version {}",
                    db_version
                )
            })?;

            if db_version < latest.version as i64 {
                info!(
                    "Migrating duration database from version {} to {}",
                    db_version, latest.version
                );
                Self::migrate_if_needed(&mut conn, db_version as usize)?;
            }
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON;", [])?;
        DURATION_VERSIONED_SCHEMAS
            .last()
            .context("No duration schema versions defined")?
            .create(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn migrate_if_needed(conn: &mut Connection, from_version: usize) -> Result<()> {
        let tx = conn.transaction()?;
        let mut latest_from = from_version;
        for schema in DURATION_VERSIONED_SCHEMAS.iter() {
            if schema.version <= from_version {
                continue;
            }
            info!(
                "Running duration database migration from version {} to {}",
                latest_from, schema.version
            );
            if let Some(migration_fn) = schema.migration {
                migration_fn(&tx).with_context(|| {
                    format!("Failed to run migration to version {}", schema.version)
                })?;
            }
            latest_from = schema.version;
        }
        tx.execute(
            &format!("PRAGMA user_version = {}", BASE_DB_VERSION + latest_from),
            [],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn now() -> i64 {
        Utc::now().timestamp()
    }

    fn row_to_track(row: &rusqlite::Row) -> rusqlite::Result<Track> {
        let source_str: String = row.get("duration_source")?;
        Ok(Track {
            id: row.get("id")?,
            album_id: row.get("album_id")?,
            title: row.get("title")?,
            track_number: row.get("track_number")?,
            duration: row.get("duration")?,
            duration_source: DurationOrigin::parse(&source_str).unwrap_or(DurationOrigin::None),
            duration_needs_review: row.get("duration_needs_review")?,
            duration_resolved_at: row.get("duration_resolved_at")?,
        })
    }

    fn row_to_album(row: &rusqlite::Row) -> rusqlite::Result<Album> {
        Ok(Album {
            id: row.get("id")?,
            title: row.get("title")?,
            artist: row.get("artist")?,
        })
    }

    fn row_to_resolution(row: &rusqlite::Row) -> rusqlite::Result<DurationResolution> {
        let status_str: String = row.get("status")?;
        let action_str: Option<String> = row.get("review_action")?;
        Ok(DurationResolution {
            id: row.get("id")?,
            track_id: row.get("track_id")?,
            album_id: row.get("album_id")?,
            status: ResolutionStatus::parse(&status_str).unwrap_or(ResolutionStatus::Failed),
            original_duration: row.get("original_duration")?,
            resolved_duration: row.get("resolved_duration")?,
            consensus_count: row.get("consensus_count")?,
            sources_queried: row.get("sources_queried")?,
            successful_queries: row.get("successful_queries")?,
            auto_applied: row.get("auto_applied")?,
            review_action: action_str.as_deref().and_then(ReviewAction::parse),
            reviewed_by: row.get("reviewed_by")?,
            review_notes: row.get("review_notes")?,
            reviewed_at: row.get("reviewed_at")?,
            applied_at: row.get("applied_at")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    fn row_to_source(row: &rusqlite::Row) -> rusqlite::Result<DurationSource> {
        Ok(DurationSource {
            id: row.get("id")?,
            resolution_id: row.get("resolution_id")?,
            source_name: row.get("source_name")?,
            duration_value: row.get("duration_value")?,
            match_score: row.get("match_score")?,
            confidence: row.get("confidence")?,
            external_id: row.get("external_id")?,
            external_url: row.get("external_url")?,
            error_message: row.get("error_message")?,
            query_duration_ms: row.get("query_duration_ms")?,
            queried_at: row.get("queried_at")?,
        })
    }

    fn row_to_progress(row: &rusqlite::Row) -> rusqlite::Result<PersistedProgress> {
        let status_str: String = row.get("status")?;
        Ok(PersistedProgress {
            status: WorkerStatus::parse(&status_str).unwrap_or(WorkerStatus::Failed),
            total_tracks: row.get("total_tracks")?,
            processed_tracks: row.get("processed_tracks")?,
            resolved_count: row.get("resolved_count")?,
            needs_review_count: row.get("needs_review_count")?,
            failed_count: row.get("failed_count")?,
            skipped_count: row.get("skipped_count")?,
            current_track_id: row.get("current_track_id")?,
            current_track: row.get("current_track")?,
            last_processed_track_id: row.get("last_processed_track_id")?,
            last_error: row.get("last_error")?,
            started_at: row.get("started_at")?,
            last_activity_at: row.get("last_activity_at")?,
            completed_at: row.get("completed_at")?,
        })
    }

    // Helpers taking a plain connection so they can run inside transactions.

    fn query_track(conn: &Connection, id: i64) -> Result<Option<Track>> {
        let track = conn
            .query_row(
                &format!("SELECT {} FROM tracks WHERE id = ?1", TRACK_COLUMNS),
                params![id],
                Self::row_to_track,
            )
            .optional()?;
        Ok(track)
    }

    fn query_album(conn: &Connection, id: i64) -> Result<Option<Album>> {
        let album = conn
            .query_row(
                "SELECT id, title, artist FROM albums WHERE id = ?1",
                params![id],
                Self::row_to_album,
            )
            .optional()?;
        Ok(album)
    }

    fn query_resolution(conn: &Connection, id: i64) -> Result<Option<DurationResolution>> {
        let resolution = conn
            .query_row(
                &format!(
                    "SELECT {} FROM duration_resolutions WHERE id = ?1",
                    RESOLUTION_COLUMNS
                ),
                params![id],
                Self::row_to_resolution,
            )
            .optional()?;
        Ok(resolution)
    }

    fn query_active_resolution(conn: &Connection, track_id: i64) -> Result<Option<DurationResolution>> {
        let resolution = conn
            .query_row(
                &format!(
                    "SELECT {} FROM duration_resolutions
                     WHERE track_id = ?1 AND status != ?2
                     ORDER BY created_at DESC, id DESC LIMIT 1",
                    RESOLUTION_COLUMNS
                ),
                params![track_id, ResolutionStatus::Rejected.as_str()],
                Self::row_to_resolution,
            )
            .optional()?;
        Ok(resolution)
    }

    fn query_tracks_needing_duration(conn: &Connection, album_id: Option<i64>) -> Result<Vec<Track>> {
        let mut sql = format!(
            "SELECT {} FROM tracks
             WHERE duration <= 0 AND album_id > 0 AND TRIM(title) != ''",
            TRACK_COLUMNS
        );
        if album_id.is_some() {
            sql.push_str(" AND album_id = ?1");
        }
        sql.push_str(" ORDER BY album_id, track_number, id");

        let mut stmt = conn.prepare(&sql)?;
        let tracks = match album_id {
            Some(album_id) => stmt
                .query_map(params![album_id], Self::row_to_track)?
                .collect::<rusqlite::Result<Vec<_>>>()?,
            None => stmt
                .query_map([], Self::row_to_track)?
                .collect::<rusqlite::Result<Vec<_>>>()?,
        };
        Ok(tracks)
    }
}

impl DurationStore for SqliteDurationStore {
    fn insert_album(&self, title: &str, artist: &str) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO albums (title, artist) VALUES (?1, ?2)",
            params![title, artist],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn insert_track(&self, track: &NewTrack) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO tracks (album_id, title, track_number, duration) VALUES (?1, ?2, ?3, ?4)",
            params![track.album_id, track.title, track.track_number, track.duration],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn get_album(&self, id: i64) -> Result<Option<Album>> {
        let conn = self.conn.lock().unwrap();
        Self::query_album(&conn, id)
    }

    fn get_track(&self, id: i64) -> Result<Option<Track>> {
        let conn = self.conn.lock().unwrap();
        Self::query_track(&conn, id)
    }

    fn list_tracks_needing_duration(&self) -> Result<Vec<Track>> {
        let conn = self.conn.lock().unwrap();
        Self::query_tracks_needing_duration(&conn, None)
    }

    fn list_album_tracks_needing_duration(&self, album_id: i64) -> Result<Vec<Track>> {
        let conn = self.conn.lock().unwrap();
        Self::query_tracks_needing_duration(&conn, Some(album_id))
    }

    fn get_duration_stats(&self) -> Result<DurationStats> {
        let conn = self.conn.lock().unwrap();
        let stats = conn.query_row(
            "SELECT
                COUNT(*),
                COALESCE(SUM(CASE WHEN duration <= 0 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN duration > 0 AND duration_source = 'resolved' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN duration > 0 AND duration_source = 'manual' THEN 1 ELSE 0 END), 0)
             FROM tracks",
            [],
            |row| {
                Ok(DurationStats {
                    total_tracks: row.get(0)?,
                    missing_duration: row.get(1)?,
                    resolved_duration: row.get(2)?,
                    manual_duration: row.get(3)?,
                    needs_review: 0,
                })
            },
        )?;
        let needs_review: i64 = conn.query_row(
            "SELECT COUNT(*) FROM duration_resolutions WHERE status = ?1",
            params![ResolutionStatus::NeedsReview.as_str()],
            |row| row.get(0),
        )?;
        Ok(DurationStats {
            needs_review,
            ..stats
        })
    }

    fn get_resolution(&self, id: i64) -> Result<Option<DurationResolution>> {
        let conn = self.conn.lock().unwrap();
        Self::query_resolution(&conn, id)
    }

    fn get_active_resolution_for_track(&self, track_id: i64) -> Result<Option<DurationResolution>> {
        let conn = self.conn.lock().unwrap();
        Self::query_active_resolution(&conn, track_id)
    }

    fn get_sources(&self, resolution_id: i64) -> Result<Vec<DurationSource>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM duration_sources WHERE resolution_id = ?1 ORDER BY id",
            SOURCE_COLUMNS
        ))?;
        let sources = stmt
            .query_map(params![resolution_id], Self::row_to_source)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(sources)
    }

    fn get_source(&self, source_id: i64) -> Result<Option<DurationSource>> {
        let conn = self.conn.lock().unwrap();
        let source = conn
            .query_row(
                &format!("SELECT {} FROM duration_sources WHERE id = ?1", SOURCE_COLUMNS),
                params![source_id],
                Self::row_to_source,
            )
            .optional()?;
        Ok(source)
    }

    fn save_resolution_attempt(&self, attempt: &ResolutionAttempt) -> Result<DurationResolution> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let now = Self::now();

        // Sources go with their resolution through the cascade, but clear
        // them explicitly so the result does not depend on the pragma.
        tx.execute(
            "DELETE FROM duration_sources WHERE resolution_id IN
                (SELECT id FROM duration_resolutions WHERE track_id = ?1)",
            params![attempt.track_id],
        )?;
        let replaced = tx.execute(
            "DELETE FROM duration_resolutions WHERE track_id = ?1",
            params![attempt.track_id],
        )?;
        if replaced > 0 {
            debug!(
                "Replaced {} prior resolution(s) for track {}",
                replaced, attempt.track_id
            );
        }

        let auto_applied = attempt.apply_to_track && attempt.resolved_duration.is_some();
        tx.execute(
            "INSERT INTO duration_resolutions (
                track_id, album_id, status, original_duration, resolved_duration,
                consensus_count, sources_queried, successful_queries, auto_applied,
                applied_at, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
            params![
                attempt.track_id,
                attempt.album_id,
                attempt.status.as_str(),
                attempt.original_duration,
                attempt.resolved_duration,
                attempt.consensus_count,
                attempt.sources_queried,
                attempt.successful_queries,
                auto_applied,
                if auto_applied { Some(now) } else { None },
                now,
            ],
        )?;
        let resolution_id = tx.last_insert_rowid();

        for source in &attempt.sources {
            tx.execute(
                "INSERT INTO duration_sources (
                    resolution_id, source_name, duration_value, match_score, confidence,
                    external_id, external_url, error_message, query_duration_ms, queried_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    resolution_id,
                    source.source_name,
                    source.duration_value,
                    source.match_score,
                    source.confidence,
                    source.external_id,
                    source.external_url,
                    source.error_message,
                    source.query_duration_ms,
                    now,
                ],
            )?;
        }

        match (auto_applied, attempt.resolved_duration) {
            (true, Some(duration)) => {
                tx.execute(
                    "UPDATE tracks SET duration = ?1, duration_source = ?2,
                        duration_needs_review = 0, duration_resolved_at = ?3
                     WHERE id = ?4",
                    params![
                        duration,
                        DurationOrigin::Resolved.as_str(),
                        now,
                        attempt.track_id
                    ],
                )?;
            }
            _ if attempt.status == ResolutionStatus::NeedsReview => {
                tx.execute(
                    "UPDATE tracks SET duration_needs_review = 1 WHERE id = ?1",
                    params![attempt.track_id],
                )?;
            }
            _ => {}
        }

        let resolution = Self::query_resolution(&tx, resolution_id)?
            .context("Inserted resolution disappeared")?;
        tx.commit()?;
        Ok(resolution)
    }

    fn apply_review(
        &self,
        resolution_id: i64,
        duration: i32,
        reviewed_by: &str,
        notes: Option<&str>,
    ) -> Result<DurationResolution> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let now = Self::now();

        let existing = Self::query_resolution(&tx, resolution_id)?
            .with_context(|| format!("Resolution {} not found", resolution_id))?;

        tx.execute(
            "UPDATE duration_resolutions SET
                status = ?1, resolved_duration = ?2, review_action = ?3, reviewed_by = ?4,
                review_notes = COALESCE(?5, review_notes), reviewed_at = ?6, applied_at = ?6,
                updated_at = ?6
             WHERE id = ?7",
            params![
                ResolutionStatus::Approved.as_str(),
                duration,
                ReviewAction::Apply.as_str(),
                reviewed_by,
                notes,
                now,
                resolution_id
            ],
        )?;
        tx.execute(
            "UPDATE tracks SET duration = ?1, duration_source = ?2,
                duration_needs_review = 0, duration_resolved_at = ?3
             WHERE id = ?4",
            params![
                duration,
                DurationOrigin::Manual.as_str(),
                now,
                existing.track_id
            ],
        )?;

        let resolution = Self::query_resolution(&tx, resolution_id)?
            .context("Updated resolution disappeared")?;
        tx.commit()?;
        Ok(resolution)
    }

    fn reject_resolution(
        &self,
        resolution_id: i64,
        reviewed_by: &str,
        notes: Option<&str>,
    ) -> Result<DurationResolution> {
        let conn = self.conn.lock().unwrap();
        let now = Self::now();

        let updated = conn.execute(
            "UPDATE duration_resolutions SET
                status = ?1, resolved_duration = NULL, review_action = ?2, reviewed_by = ?3,
                review_notes = COALESCE(?4, review_notes), reviewed_at = ?5, updated_at = ?5
             WHERE id = ?6",
            params![
                ResolutionStatus::Rejected.as_str(),
                ReviewAction::Reject.as_str(),
                reviewed_by,
                notes,
                now,
                resolution_id
            ],
        )?;
        if updated == 0 {
            bail!("Resolution {} not found", resolution_id);
        }

        Self::query_resolution(&conn, resolution_id)?
            .with_context(|| format!("Resolution {} not found", resolution_id))
    }

    fn set_manual_duration(
        &self,
        track_id: i64,
        duration: i32,
        reviewed_by: &str,
        notes: Option<&str>,
    ) -> Result<DurationResolution> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let now = Self::now();

        let track = Self::query_track(&tx, track_id)?
            .with_context(|| format!("Track {} not found", track_id))?;

        tx.execute(
            "UPDATE tracks SET duration = ?1, duration_source = ?2,
                duration_needs_review = 0, duration_resolved_at = ?3
             WHERE id = ?4",
            params![duration, DurationOrigin::Manual.as_str(), now, track_id],
        )?;

        let resolution_id = match Self::query_active_resolution(&tx, track_id)? {
            Some(active) => {
                tx.execute(
                    "UPDATE duration_resolutions SET
                        status = ?1, resolved_duration = ?2, review_action = ?3, reviewed_by = ?4,
                        review_notes = COALESCE(?5, review_notes), reviewed_at = ?6,
                        applied_at = ?6, updated_at = ?6
                     WHERE id = ?7",
                    params![
                        ResolutionStatus::Approved.as_str(),
                        duration,
                        ReviewAction::Manual.as_str(),
                        reviewed_by,
                        notes,
                        now,
                        active.id
                    ],
                )?;
                active.id
            }
            None => {
                tx.execute(
                    "INSERT INTO duration_resolutions (
                        track_id, album_id, status, original_duration, resolved_duration,
                        review_action, reviewed_by, review_notes, reviewed_at, applied_at,
                        created_at, updated_at
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9, ?9, ?9)",
                    params![
                        track_id,
                        track.album_id,
                        ResolutionStatus::Approved.as_str(),
                        track.duration,
                        duration,
                        ReviewAction::Manual.as_str(),
                        reviewed_by,
                        notes,
                        now
                    ],
                )?;
                tx.last_insert_rowid()
            }
        };

        let resolution = Self::query_resolution(&tx, resolution_id)?
            .context("Manual resolution disappeared")?;
        tx.commit()?;
        Ok(resolution)
    }

    fn update_review_notes(&self, resolution_id: i64, notes: Option<&str>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE duration_resolutions SET review_notes = ?1, updated_at = ?2 WHERE id = ?3",
            params![notes, Self::now(), resolution_id],
        )?;
        if updated == 0 {
            bail!("Resolution {} not found", resolution_id);
        }
        Ok(())
    }

    fn list_resolutions(&self, filter: &ResolutionFilter) -> Result<(Vec<ResolutionEntry>, usize)> {
        let conn = self.conn.lock().unwrap();

        let mut where_clauses = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if !filter.statuses.is_empty() {
            let placeholders = vec!["?"; filter.statuses.len()].join(", ");
            where_clauses.push(format!("r.status IN ({})", placeholders));
            values.extend(
                filter
                    .statuses
                    .iter()
                    .map(|s| Value::Text(s.as_str().to_string())),
            );
        }
        if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            where_clauses.push(
                "(t.title LIKE ? ESCAPE '\\' OR a.title LIKE ? ESCAPE '\\' OR a.artist LIKE ? ESCAPE '\\')"
                    .to_string(),
            );
            let pattern = format!("%{}%", escape_like(search));
            for _ in 0..3 {
                values.push(Value::Text(pattern.clone()));
            }
        }

        let from = format!(
            "FROM duration_resolutions r
             JOIN tracks t ON t.id = r.track_id
             LEFT JOIN albums a ON a.id = r.album_id{}",
            if where_clauses.is_empty() {
                String::new()
            } else {
                format!(" WHERE {}", where_clauses.join(" AND "))
            }
        );

        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) {}", from),
            params_from_iter(values.iter()),
            |row| row.get(0),
        )?;

        let order = if filter.newest_first_by_update {
            "r.updated_at DESC, r.id DESC"
        } else {
            "r.created_at DESC, r.id DESC"
        };
        let mut page_values = values.clone();
        page_values.push(Value::Integer(filter.limit as i64));
        page_values.push(Value::Integer(i64::try_from(filter.offset).unwrap_or(i64::MAX)));

        let mut stmt = conn.prepare(&format!(
            "SELECT r.id {} ORDER BY {} LIMIT ? OFFSET ?",
            from, order
        ))?;
        let ids = stmt
            .query_map(params_from_iter(page_values.iter()), |row| row.get::<_, i64>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut entries = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(resolution) = Self::query_resolution(&conn, id)? else {
                continue;
            };
            let Some(track) = Self::query_track(&conn, resolution.track_id)? else {
                continue;
            };
            let album = Self::query_album(&conn, resolution.album_id)?;
            entries.push(ResolutionEntry {
                resolution,
                track,
                album,
            });
        }

        Ok((entries, total as usize))
    }

    fn save_progress(&self, progress: &PersistedProgress) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO duration_resolver_progress (
                id, status, total_tracks, processed_tracks, resolved_count, needs_review_count,
                failed_count, skipped_count, current_track_id, current_track,
                last_processed_track_id, last_error, started_at, last_activity_at, completed_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                PROGRESS_ROW_ID,
                progress.status.as_str(),
                progress.total_tracks,
                progress.processed_tracks,
                progress.resolved_count,
                progress.needs_review_count,
                progress.failed_count,
                progress.skipped_count,
                progress.current_track_id,
                progress.current_track,
                progress.last_processed_track_id,
                progress.last_error,
                progress.started_at,
                progress.last_activity_at,
                progress.completed_at,
            ],
        )?;
        Ok(())
    }

    fn load_progress(&self) -> Result<Option<PersistedProgress>> {
        let conn = self.conn.lock().unwrap();
        let progress = conn
            .query_row(
                "SELECT * FROM duration_resolver_progress WHERE id = ?1",
                params![PROGRESS_ROW_ID],
                Self::row_to_progress,
            )
            .optional()?;
        Ok(progress)
    }

    fn clear_progress(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM duration_resolver_progress WHERE id = ?1",
            params![PROGRESS_ROW_ID],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn seed_track(store: &SqliteDurationStore, title: &str, number: i32, duration: i32) -> (i64, i64) {
        let album_id = store.insert_album("Kind of Blue", "Miles Davis").unwrap();
        let track_id = store
            .insert_track(&NewTrack {
                album_id,
                title: title.to_string(),
                track_number: number,
                duration,
            })
            .unwrap();
        (album_id, track_id)
    }

    fn attempt(track_id: i64, album_id: i64, status: ResolutionStatus) -> ResolutionAttempt {
        ResolutionAttempt {
            track_id,
            album_id,
            status,
            original_duration: 0,
            resolved_duration: if status == ResolutionStatus::Resolved {
                Some(245)
            } else {
                None
            },
            consensus_count: 2,
            sources_queried: 2,
            successful_queries: 2,
            apply_to_track: status == ResolutionStatus::Resolved,
            sources: vec![
                NewDurationSource {
                    source_name: "musicbrainz".to_string(),
                    duration_value: 245,
                    match_score: 0.95,
                    confidence: 0.9,
                    external_id: Some("mbid-1".to_string()),
                    external_url: None,
                    error_message: String::new(),
                    query_duration_ms: 40,
                },
                NewDurationSource::failed("wikipedia", "No matching track found", 15),
            ],
        }
    }

    #[test]
    fn test_reopen_existing_database() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("duration.db");
        {
            let store = SqliteDurationStore::new(&db_path).unwrap();
            seed_track(&store, "So What", 1, 0);
        }
        let store = SqliteDurationStore::new(&db_path).unwrap();
        assert_eq!(store.list_tracks_needing_duration().unwrap().len(), 1);
    }

    #[test]
    fn test_tracks_needing_duration_skips_invalid_rows() {
        let store = SqliteDurationStore::in_memory().unwrap();
        let (album_id, _) = seed_track(&store, "So What", 1, 0);
        store
            .insert_track(&NewTrack {
                album_id,
                title: "Freddie Freeloader".to_string(),
                track_number: 2,
                duration: 589,
            })
            .unwrap();
        store
            .insert_track(&NewTrack {
                album_id: 0,
                title: "Orphan".to_string(),
                track_number: 1,
                duration: 0,
            })
            .unwrap();
        store
            .insert_track(&NewTrack {
                album_id,
                title: "  ".to_string(),
                track_number: 3,
                duration: 0,
            })
            .unwrap();

        let tracks = store.list_tracks_needing_duration().unwrap();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].title, "So What");
        assert_eq!(
            store.list_album_tracks_needing_duration(album_id).unwrap().len(),
            1
        );
        assert!(store
            .list_album_tracks_needing_duration(album_id + 100)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_save_resolved_attempt_applies_duration() {
        let store = SqliteDurationStore::in_memory().unwrap();
        let (album_id, track_id) = seed_track(&store, "So What", 1, 0);

        let resolution = store
            .save_resolution_attempt(&attempt(track_id, album_id, ResolutionStatus::Resolved))
            .unwrap();
        assert_eq!(resolution.status, ResolutionStatus::Resolved);
        assert!(resolution.auto_applied);
        assert!(resolution.applied_at.is_some());

        let track = store.get_track(track_id).unwrap().unwrap();
        assert_eq!(track.duration, 245);
        assert_eq!(track.duration_source, DurationOrigin::Resolved);

        let sources = store.get_sources(resolution.id).unwrap();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[1].error_message, "No matching track found");
    }

    #[test]
    fn test_save_attempt_replaces_previous_resolution() {
        let store = SqliteDurationStore::in_memory().unwrap();
        let (album_id, track_id) = seed_track(&store, "So What", 1, 0);

        let first = store
            .save_resolution_attempt(&attempt(track_id, album_id, ResolutionStatus::NeedsReview))
            .unwrap();
        assert!(store.get_track(track_id).unwrap().unwrap().duration_needs_review);

        let second = store
            .save_resolution_attempt(&attempt(track_id, album_id, ResolutionStatus::Resolved))
            .unwrap();

        assert!(store.get_resolution(first.id).unwrap().is_none());
        assert!(store.get_sources(first.id).unwrap().is_empty());
        assert_eq!(
            store.get_active_resolution_for_track(track_id).unwrap().unwrap().id,
            second.id
        );
        assert!(!store.get_track(track_id).unwrap().unwrap().duration_needs_review);
    }

    #[test]
    fn test_apply_review_sets_manual_origin() {
        let store = SqliteDurationStore::in_memory().unwrap();
        let (album_id, track_id) = seed_track(&store, "So What", 1, 0);
        let resolution = store
            .save_resolution_attempt(&attempt(track_id, album_id, ResolutionStatus::NeedsReview))
            .unwrap();

        let applied = store
            .apply_review(resolution.id, 200, "admin", Some("checked vinyl"))
            .unwrap();
        assert_eq!(applied.status, ResolutionStatus::Approved);
        assert_eq!(applied.resolved_duration, Some(200));
        assert_eq!(applied.review_action, Some(ReviewAction::Apply));
        assert_eq!(applied.review_notes.as_deref(), Some("checked vinyl"));

        let track = store.get_track(track_id).unwrap().unwrap();
        assert_eq!(track.duration, 200);
        assert_eq!(track.duration_source, DurationOrigin::Manual);
        assert!(!track.duration_needs_review);
    }

    #[test]
    fn test_reject_leaves_track_untouched() {
        let store = SqliteDurationStore::in_memory().unwrap();
        let (album_id, track_id) = seed_track(&store, "So What", 1, 0);
        let resolution = store
            .save_resolution_attempt(&attempt(track_id, album_id, ResolutionStatus::Resolved))
            .unwrap();

        let rejected = store
            .reject_resolution(resolution.id, "admin", Some("wrong recording"))
            .unwrap();
        assert_eq!(rejected.status, ResolutionStatus::Rejected);
        assert_eq!(rejected.resolved_duration, None);
        assert_eq!(store.get_track(track_id).unwrap().unwrap().duration, 245);
        assert!(store.get_active_resolution_for_track(track_id).unwrap().is_none());

        assert!(store.reject_resolution(9999, "admin", None).is_err());
    }

    #[test]
    fn test_manual_duration_creates_resolution_when_missing() {
        let store = SqliteDurationStore::in_memory().unwrap();
        let (_, track_id) = seed_track(&store, "So What", 1, 0);

        let resolution = store
            .set_manual_duration(track_id, 562, "admin", None)
            .unwrap();
        assert_eq!(resolution.status, ResolutionStatus::Approved);
        assert_eq!(resolution.review_action, Some(ReviewAction::Manual));
        assert_eq!(resolution.original_duration, 0);

        let track = store.get_track(track_id).unwrap().unwrap();
        assert_eq!(track.duration, 562);
        assert_eq!(track.duration_source, DurationOrigin::Manual);

        assert!(store.set_manual_duration(9999, 100, "admin", None).is_err());
    }

    #[test]
    fn test_deleting_track_cascades_resolutions_and_sources() {
        let store = SqliteDurationStore::in_memory().unwrap();
        let (album_id, track_id) = seed_track(&store, "So What", 1, 0);
        let resolution = store
            .save_resolution_attempt(&attempt(track_id, album_id, ResolutionStatus::NeedsReview))
            .unwrap();

        {
            let conn = store.conn.lock().unwrap();
            conn.execute("DELETE FROM tracks WHERE id = ?1", params![track_id])
                .unwrap();
        }

        assert!(store.get_resolution(resolution.id).unwrap().is_none());
        assert!(store.get_sources(resolution.id).unwrap().is_empty());
    }

    #[test]
    fn test_list_resolutions_filters_and_paginates() {
        let store = SqliteDurationStore::in_memory().unwrap();
        let album_id = store.insert_album("Blue Train", "John Coltrane").unwrap();
        for i in 1..=5 {
            let track_id = store
                .insert_track(&NewTrack {
                    album_id,
                    title: format!("Track {}", i),
                    track_number: i,
                    duration: 0,
                })
                .unwrap();
            let status = if i % 2 == 0 {
                ResolutionStatus::Resolved
            } else {
                ResolutionStatus::NeedsReview
            };
            store
                .save_resolution_attempt(&attempt(track_id, album_id, status))
                .unwrap();
        }

        let (page, total) = store
            .list_resolutions(&ResolutionFilter {
                statuses: vec![ResolutionStatus::NeedsReview],
                limit: 2,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(total, 3);
        assert_eq!(page.len(), 2);
        assert!(page
            .iter()
            .all(|e| e.resolution.status == ResolutionStatus::NeedsReview));
        assert_eq!(page[0].album.as_ref().unwrap().artist, "John Coltrane");

        let (page, total) = store
            .list_resolutions(&ResolutionFilter {
                statuses: vec![ResolutionStatus::NeedsReview],
                search: Some("Track 3".to_string()),
                limit: 20,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(page[0].track.title, "Track 3");

        let (_, total) = store
            .list_resolutions(&ResolutionFilter {
                statuses: vec![ResolutionStatus::NeedsReview],
                search: Some("coltrane".to_string()),
                limit: 20,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(total, 3);
    }

    #[test]
    fn test_search_treats_wildcards_literally() {
        let store = SqliteDurationStore::in_memory().unwrap();
        for (i, title) in ["100% Pure", "1000 Days", "Take_Five", "Take Five"].iter().enumerate() {
            let (album_id, track_id) = seed_track(&store, title, i as i32 + 1, 0);
            store
                .save_resolution_attempt(&attempt(track_id, album_id, ResolutionStatus::NeedsReview))
                .unwrap();
        }
        let search = |text: &str| {
            let (entries, total) = store
                .list_resolutions(&ResolutionFilter {
                    search: Some(text.to_string()),
                    limit: 20,
                    ..Default::default()
                })
                .unwrap();
            let mut titles: Vec<String> = entries.into_iter().map(|e| e.track.title).collect();
            titles.sort();
            assert_eq!(titles.len(), total);
            titles
        };

        assert_eq!(search("100%"), vec!["100% Pure"]);
        assert_eq!(search("Take_"), vec!["Take_Five"]);
        assert_eq!(search("Take"), vec!["Take Five", "Take_Five"]);
        assert_eq!(search("%"), vec!["100% Pure"]);
    }

    #[test]
    fn test_offset_past_the_end_returns_empty_page() {
        let store = SqliteDurationStore::in_memory().unwrap();
        let (album_id, track_id) = seed_track(&store, "So What", 1, 0);
        store
            .save_resolution_attempt(&attempt(track_id, album_id, ResolutionStatus::NeedsReview))
            .unwrap();

        let (entries, total) = store
            .list_resolutions(&ResolutionFilter {
                limit: 20,
                offset: usize::MAX,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(total, 1);
        assert!(entries.is_empty());
    }

    #[test]
    fn test_progress_roundtrip_and_clear() {
        let store = SqliteDurationStore::in_memory().unwrap();
        assert!(store.load_progress().unwrap().is_none());

        let progress = PersistedProgress {
            status: WorkerStatus::Paused,
            total_tracks: 50,
            processed_tracks: 10,
            resolved_count: 7,
            needs_review_count: 2,
            failed_count: 1,
            skipped_count: 0,
            current_track_id: Some(11),
            current_track: Some("Miles Davis - So What".to_string()),
            last_processed_track_id: Some(10),
            last_error: None,
            started_at: Some(1_700_000_000),
            last_activity_at: Some(1_700_000_100),
            completed_at: None,
        };
        store.save_progress(&progress).unwrap();
        assert_eq!(store.load_progress().unwrap(), Some(progress.clone()));

        let updated = PersistedProgress {
            processed_tracks: 11,
            ..progress
        };
        store.save_progress(&updated).unwrap();
        assert_eq!(store.load_progress().unwrap().unwrap().processed_tracks, 11);

        store.clear_progress().unwrap();
        assert!(store.load_progress().unwrap().is_none());
    }

    #[test]
    fn test_duration_stats() {
        let store = SqliteDurationStore::in_memory().unwrap();
        let (album_id, track_id) = seed_track(&store, "So What", 1, 0);
        seed_track(&store, "Blue in Green", 3, 0);
        store
            .insert_track(&NewTrack {
                album_id,
                title: "Flamenco Sketches".to_string(),
                track_number: 5,
                duration: 566,
            })
            .unwrap();
        store
            .save_resolution_attempt(&attempt(track_id, album_id, ResolutionStatus::Resolved))
            .unwrap();

        let stats = store.get_duration_stats().unwrap();
        assert_eq!(stats.total_tracks, 3);
        assert_eq!(stats.missing_duration, 1);
        assert_eq!(stats.resolved_duration, 1);
        assert_eq!(stats.manual_duration, 0);
        assert_eq!(stats.needs_review, 0);
    }
}
