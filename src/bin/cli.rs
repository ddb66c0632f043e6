//! timeline-cli - Debug tool for stay/move segmentation
//!
//! Usage:
//!   timeline-cli segment <history.json> [--zones <states.json>] [--places <history.json>]
//!                        [--radius <m>] [--min-stay <min>] [--email <contact>] [--json]
//!
//! Reads exported state history, segments it into stays and moves, labels the
//! stays and prints the day's timeline.

use chrono::{DateTime, Local};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use stay_timeline::{
    apply_update, cache::FileStore, format, history, places::end_of_day_ms, segment_timeline,
    GeocodeCache, GeocodeQueue, GeocodeSettings, GeocodeUpdate, NominatimClient, ResolveOptions, Segment,
    SegmentConfig, UpdateCallback,
};

#[derive(Parser)]
#[command(name = "timeline-cli")]
#[command(about = "Debug tool for GPS stay/move segmentation", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose debug output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Segment one day of tracker history
    Segment {
        /// Tracker history export (JSON)
        history: PathBuf,

        /// State snapshot containing zone.* entities
        #[arg(long)]
        zones: Option<PathBuf>,

        /// Place sensor history export
        #[arg(long)]
        places: Option<PathBuf>,

        /// Stay radius in meters
        #[arg(long, default_value = "75")]
        radius: f64,

        /// Minimum stay in minutes
        #[arg(long, default_value = "10")]
        min_stay: f64,

        /// Contact address for reverse geocoding (no lookups without it)
        #[arg(long)]
        email: Option<String>,

        /// Reverse geocoding config (endpoint, request interval)
        #[arg(long, default_value = "reverse_geocoding.json")]
        geocode_config: PathBuf,

        /// Directory for the persisted geocode cache
        #[arg(long)]
        cache_dir: Option<PathBuf>,

        /// Print segments as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(if cli.verbose {
        "debug"
    } else {
        "warn"
    }))
    .init();

    let result = match cli.command {
        Commands::Segment {
            history,
            zones,
            places,
            radius,
            min_stay,
            email,
            geocode_config,
            cache_dir,
            json,
        } => run_segment(SegmentArgs {
            history,
            zones,
            places,
            config: SegmentConfig::from_minutes(radius, min_stay),
            email,
            geocode_config,
            cache_dir,
            json,
        }),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

struct SegmentArgs {
    history: PathBuf,
    zones: Option<PathBuf>,
    places: Option<PathBuf>,
    config: SegmentConfig,
    email: Option<String>,
    geocode_config: PathBuf,
    cache_dir: Option<PathBuf>,
    json: bool,
}

/// Load a history export: a flat list, a list of per-entity lists, or an
/// object keyed by entity id.
fn load_states(path: &Path) -> Result<Vec<Value>, String> {
    let raw = std::fs::read_to_string(path).map_err(|e| format!("{}: {}", path.display(), e))?;
    let value: Value = serde_json::from_str(&raw).map_err(|e| format!("{}: {}", path.display(), e))?;

    Ok(match value {
        Value::Array(items) if items.iter().all(Value::is_array) => items
            .into_iter()
            .flat_map(|inner| match inner {
                Value::Array(states) => states,
                _ => Vec::new(),
            })
            .collect(),
        Value::Array(items) => items,
        Value::Object(map) => map
            .into_iter()
            .flat_map(|(_, states)| match states {
                Value::Array(states) => states,
                _ => Vec::new(),
            })
            .collect(),
        _ => Vec::new(),
    })
}

fn run_segment(args: SegmentArgs) -> Result<(), String> {
    let points = history::points_from_states(&load_states(&args.history)?);
    let zones = match &args.zones {
        Some(path) => history::zones_from_states(&load_states(path)?),
        None => Vec::new(),
    };
    let place_states = match &args.places {
        Some(path) => history::place_states_from_states(&load_states(path)?),
        None => Vec::new(),
    };

    let mut segments = segment_timeline(&points, &args.config, &zones);

    let day_end_ms = points
        .iter()
        .map(|p| p.timestamp)
        .max()
        .and_then(DateTime::from_timestamp_millis)
        .and_then(|ts| end_of_day_ms(ts.with_timezone(&Local).date_naive(), &Local))
        .unwrap_or(i64::MAX);

    let settings = GeocodeSettings::load(&args.geocode_config);
    let cache = match &args.cache_dir {
        Some(dir) => GeocodeCache::with_store(Box::new(FileStore::new(dir)), settings.cache_capacity),
        None => GeocodeCache::in_memory(settings.cache_capacity),
    };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("Failed to create tokio runtime: {}", e))?;

    runtime.block_on(async {
        let client = NominatimClient::new()?;
        let queue = GeocodeQueue::new(Arc::new(client), settings, cache);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let on_update: UpdateCallback = Arc::new(move |update: &GeocodeUpdate| {
            let _ = tx.send(update.clone());
        });

        let queued = queue.resolve_stays(
            &mut segments,
            &ResolveOptions {
                place_states: &place_states,
                day_end_ms,
                api_key: args.email.as_deref(),
                on_update,
            },
        );

        let budget = Duration::from_millis(
            (queue.settings().request_interval_ms + queue.settings().request_timeout_ms)
                * u64::from(queue.settings().max_attempts)
                * queued as u64
                + 1_000,
        );
        for _ in 0..queued {
            match tokio::time::timeout(budget, rx.recv()).await {
                Ok(Some(update)) => {
                    apply_update(&mut segments, &update);
                }
                _ => break,
            }
        }
        queue.shutdown();
        Ok::<(), String>(())
    })?;

    if args.json {
        let out = serde_json::to_string_pretty(&segments).map_err(|e| e.to_string())?;
        println!("{}", out);
        return Ok(());
    }

    print_timeline(&segments, points.len());
    Ok(())
}

fn print_timeline(segments: &[Segment], point_count: usize) {
    println!("{} points, {} segments", point_count, segments.len());
    println!("{}", "=".repeat(60));

    if segments.is_empty() {
        println!("No location history for this day.");
        return;
    }

    for segment in segments {
        let span = format!("{} - {}", clock(segment.start()), clock(segment.end()));
        match segment {
            Segment::Stay(stay) => println!(
                "STAY  {}  {:>8}  {}  ({}, r={})",
                span,
                format::format_duration(stay.duration_ms),
                stay.label().unwrap_or(stay_timeline::UNKNOWN_LOCATION),
                format::format_coords(&stay.center),
                format::format_distance(stay.radius_meters),
            ),
            Segment::Move(travel) => println!(
                "MOVE  {}  {:>8}  {}  ({} points)",
                span,
                format::format_duration(travel.duration_ms),
                format::format_distance(travel.distance_meters),
                travel.points.len(),
            ),
        }
    }
}

fn clock(timestamp_ms: i64) -> String {
    DateTime::from_timestamp_millis(timestamp_ms)
        .map(|ts| ts.with_timezone(&Local).format("%H:%M").to_string())
        .unwrap_or_else(|| "--:--".to_string())
}
