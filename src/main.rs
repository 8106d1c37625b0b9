use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod cli_style;

use cli_style::{
    colors, format_duration, format_timestamp, get_styles, print_empty_list, print_error,
    print_key_value, print_key_value_colored, print_section_footer, print_section_header,
    print_success, print_warning, resolution_status_color, worker_status_color, TableBuilder,
};
use duration_resolver::bulk::{BulkProgress, ProgressPersistence, WorkerState};
use duration_resolver::config::{AppConfig, CliConfig, FileConfig};
use duration_resolver::duration::{
    BulkReviewAction, DurationResolverService, ReviewItem, ReviewPage, ReviewQueueQuery,
};
use duration_resolver::duration_store::{DurationStore, SqliteDurationStore};

fn parse_path(s: &str) -> Result<PathBuf> {
    let original_path = PathBuf::from(s);
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
#[command(styles = get_styles(), name = "duration-admin")]
struct CliArgs {
    /// Directory holding duration.db.
    #[clap(long, value_parser = parse_path)]
    pub db_dir: Option<PathBuf>,

    /// Path to a TOML config file, its values override the CLI.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Print results as JSON instead of tables.
    #[clap(long)]
    pub json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Shows the persisted progress of the bulk resolution.
    Status,

    /// Shows duration statistics of the library.
    Stats,

    /// Lists tracks still missing a duration.
    Tracks {
        /// Only tracks of this album.
        #[clap(long)]
        album: Option<i64>,
    },

    /// Lists resolutions waiting for review, newest first.
    Queue {
        #[clap(long, default_value_t = 1)]
        page: usize,
        #[clap(long, default_value_t = 20)]
        limit: usize,
        #[clap(long)]
        search: Option<String>,
    },

    /// Lists resolved and approved resolutions.
    Resolved {
        #[clap(long, default_value_t = 1)]
        page: usize,
        #[clap(long, default_value_t = 20)]
        limit: usize,
        #[clap(long)]
        search: Option<String>,
    },

    /// Shows a resolution with every source that was queried.
    Show { id: i64 },

    /// Approves a resolution with the given duration in seconds.
    Apply {
        id: i64,
        duration: i32,
        #[clap(long)]
        notes: Option<String>,
    },

    /// Approves a resolution using the duration reported by one source.
    ApplySource {
        id: i64,
        source_id: i64,
        #[clap(long)]
        notes: Option<String>,
    },

    /// Rejects a resolution, the track keeps its duration.
    Reject {
        id: i64,
        #[clap(long)]
        notes: Option<String>,
    },

    /// Sets the duration of a track by hand.
    Set {
        track_id: i64,
        duration: i32,
        #[clap(long)]
        notes: Option<String>,
    },

    /// Keeps a resolution in the queue, only storing notes.
    Skip {
        id: i64,
        #[clap(long)]
        notes: Option<String>,
    },

    /// Applies or rejects many resolutions at once.
    /// ACTION is either apply_all or reject_all.
    BulkReview {
        action: String,
        #[clap(required = true)]
        ids: Vec<i64>,
        #[clap(long)]
        notes: Option<String>,
    },

    /// Discards the persisted bulk progress.
    ResetProgress,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_page(title: &str, page: &ReviewPage) {
    print_section_header(title);
    if page.items.is_empty() {
        print_empty_list("Nothing to show");
    } else {
        let mut table = TableBuilder::new(&["ID", "Track", "Album", "Status", "Duration", "Sources"]);
        for item in &page.items {
            table.add_row(vec![
                item.resolution.id.to_string(),
                item.track.title.clone(),
                item.album
                    .as_ref()
                    .map(|a| format!("{} - {}", a.artist, a.title))
                    .unwrap_or_default(),
                item.resolution.status.as_str().to_string(),
                format_duration(item.resolution.resolved_duration.unwrap_or(0)),
                format!(
                    "{}/{}",
                    item.resolution.successful_queries, item.resolution.sources_queried
                ),
            ]);
        }
        table.print();
    }
    print_key_value(
        "Page",
        &format!(
            "{} of {} ({} total)",
            page.page,
            page.total_pages.max(1),
            page.total
        ),
    );
    print_section_footer();
}

fn print_item(item: &ReviewItem) {
    let resolution = &item.resolution;
    print_section_header(&format!("Resolution {}", resolution.id));
    print_key_value("Track", &format!("{} ({})", item.track.title, item.track.id));
    if let Some(album) = &item.album {
        print_key_value("Album", &format!("{} - {}", album.artist, album.title));
    }
    print_key_value_colored(
        "Status",
        resolution.status.as_str(),
        resolution_status_color(resolution.status),
    );
    print_key_value("Original", &format_duration(resolution.original_duration));
    print_key_value(
        "Resolved",
        &format_duration(resolution.resolved_duration.unwrap_or(0)),
    );
    print_key_value(
        "Consensus",
        &format!(
            "{} of {} sources",
            resolution.consensus_count, resolution.sources_queried
        ),
    );
    if let Some(notes) = &resolution.review_notes {
        print_key_value("Notes", notes);
    }
    print_key_value("Updated", &format_timestamp(Some(resolution.updated_at)));

    let mut table = TableBuilder::new(&["ID", "Source", "Duration", "Match", "Confidence", "Result"]);
    for s in &item.sources {
        let result = if !s.source.error_message.is_empty() {
            s.source.error_message.clone()
        } else if s.caused_match {
            "match".to_string()
        } else {
            "ok".to_string()
        };
        table.add_row(vec![
            s.source.id.to_string(),
            s.source.source_name.clone(),
            format_duration(s.source.duration_value),
            format!("{:.2}", s.source.match_score),
            format!("{:.2}", s.source.confidence),
            result,
        ]);
    }
    table.print();
    print_section_footer();
}

fn print_progress(progress: &BulkProgress) {
    let state = &progress.state;
    print_section_header("Bulk resolution");
    print_key_value_colored(
        "Status",
        state.status.as_str(),
        worker_status_color(state.status),
    );
    print_key_value(
        "Processed",
        &format!(
            "{}/{} ({:.1}%)",
            state.processed_tracks, state.total_tracks, progress.percent_complete
        ),
    );
    print_key_value("Resolved", &state.resolved_count.to_string());
    print_key_value("Needs review", &state.needs_review_count.to_string());
    print_key_value("Failed", &state.failed_count.to_string());
    print_key_value("Skipped", &state.skipped_count.to_string());
    if let Some(track) = &state.current_track {
        print_key_value("Current track", track);
    }
    if let Some(error) = &state.last_error {
        print_key_value_colored("Last error", error, colors::RED);
    }
    print_key_value("Started", &format_timestamp(state.started_at));
    print_key_value("Last activity", &format_timestamp(state.last_activity_at));
    print_key_value("Completed", &format_timestamp(state.completed_at));
    print_section_footer();
}

fn run(cli: CliArgs) -> Result<()> {
    let file_config = cli.config.as_deref().map(FileConfig::load).transpose()?;
    let config = AppConfig::resolve(
        &CliConfig {
            db_dir: cli.db_dir.clone(),
        },
        file_config,
    )?;

    let db_path = config.duration_db_path();
    info!("Opening duration database at {:?}", db_path);
    let store = Arc::new(
        SqliteDurationStore::new(&db_path)
            .with_context(|| format!("Failed to open {:?}", db_path))?,
    );
    let service = DurationResolverService::new(store.clone(), vec![], config.resolver.clone());
    let json = cli.json;

    match cli.command {
        Command::Status => {
            let persistence = ProgressPersistence::new(store.clone());
            let state = persistence
                .reconciled_view()?
                .map(|p| WorkerState::from_persisted(&p))
                .unwrap_or_default();
            let progress = BulkProgress::from(state);
            if json {
                print_json(&progress)?;
            } else {
                print_progress(&progress);
            }
        }
        Command::Stats => {
            let stats = service.statistics()?;
            if json {
                print_json(&stats)?;
            } else {
                print_section_header("Durations");
                print_key_value("Total tracks", &stats.total_tracks.to_string());
                print_key_value_colored(
                    "Missing duration",
                    &stats.missing_duration.to_string(),
                    if stats.missing_duration > 0 {
                        colors::YELLOW
                    } else {
                        colors::GREEN
                    },
                );
                print_key_value("Auto-resolved", &stats.resolved_duration.to_string());
                print_key_value("Manual", &stats.manual_duration.to_string());
                print_key_value("Awaiting review", &stats.pending_review.to_string());
                print_section_footer();
            }
        }
        Command::Tracks { album } => {
            let tracks = match album {
                Some(album_id) => service.tracks_needing_resolution_for_album(album_id)?,
                None => service.tracks_needing_resolution()?,
            };
            if json {
                print_json(&tracks)?;
            } else {
                print_section_header("Tracks missing a duration");
                if tracks.is_empty() {
                    print_empty_list("Every track has a duration");
                } else {
                    let mut table = TableBuilder::new(&["ID", "Album", "#", "Title", "Review"]);
                    for track in &tracks {
                        table.add_row(vec![
                            track.id.to_string(),
                            track.album_id.to_string(),
                            track.track_number.to_string(),
                            track.title.clone(),
                            if track.duration_needs_review { "yes" } else { "" }.to_string(),
                        ]);
                    }
                    table.print();
                }
                print_section_footer();
            }
        }
        Command::Queue { page, limit, search } => {
            let page = service.review_queue(&ReviewQueueQuery { page, limit, search })?;
            if json {
                print_json(&page)?;
            } else {
                print_page("Review queue", &page);
            }
        }
        Command::Resolved { page, limit, search } => {
            let page = service.resolved_queue(&ReviewQueueQuery { page, limit, search })?;
            if json {
                print_json(&page)?;
            } else {
                print_page("Resolved", &page);
            }
        }
        Command::Show { id } => {
            let item = service.review_details(id)?;
            if json {
                print_json(&item)?;
            } else {
                print_item(&item);
            }
        }
        Command::Apply {
            id,
            duration,
            notes,
        } => {
            let resolution = service.apply_resolution(id, duration, notes.as_deref())?;
            print_success(&format!(
                "Track {} set to {}",
                resolution.track_id,
                format_duration(duration)
            ));
        }
        Command::ApplySource {
            id,
            source_id,
            notes,
        } => {
            let resolution = service.apply_source(id, source_id, notes.as_deref())?;
            print_success(&format!(
                "Track {} set to {}",
                resolution.track_id,
                format_duration(resolution.resolved_duration.unwrap_or(0))
            ));
        }
        Command::Reject { id, notes } => {
            service.reject_resolution(id, "admin", notes.as_deref())?;
            print_success(&format!("Resolution {} rejected", id));
        }
        Command::Set {
            track_id,
            duration,
            notes,
        } => {
            service.manually_set_duration(track_id, duration, notes.as_deref())?;
            print_success(&format!(
                "Track {} set to {}",
                track_id,
                format_duration(duration)
            ));
        }
        Command::Skip { id, notes } => {
            service.skip_review(id, notes.as_deref())?;
            print_success(&format!("Resolution {} left in the queue", id));
        }
        Command::BulkReview { action, ids, notes } => {
            let Some(action) = BulkReviewAction::parse(&action) else {
                bail!("Unknown bulk action '{}', use apply_all or reject_all", action);
            };
            let result = service.bulk_review(action, &ids, notes.as_deref())?;
            if json {
                print_json(&result)?;
            } else if result.failed > 0 {
                print_warning(&format!(
                    "{} processed, {} failed",
                    result.processed, result.failed
                ));
            } else {
                print_success(&format!("{} processed", result.processed));
            }
        }
        Command::ResetProgress => {
            store.clear_progress()?;
            print_success("Bulk progress cleared");
        }
    }
    Ok(())
}

fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .init();

    let cli = CliArgs::parse();
    if let Err(err) = run(cli) {
        print_error(&format!("{:#}", err));
        std::process::exit(1);
    }
}
