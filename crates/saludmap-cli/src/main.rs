//! saludmap - find nearby health services from the command line.
//!
//! Every command runs through the same offline-first core the map front end
//! uses: positions are persisted, places are served from the local cache
//! when available, and tile downloads land in the resource cache.

use std::io;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use saludmap_core::geo::haversine_m;
use saludmap_core::location::IpPositionProvider;
use saludmap_core::models::{Coordinates, LocationFix};
use saludmap_core::proxy::HttpTransport;
use saludmap_core::utils::{format_distance, truncate_string};
use saludmap_core::{AppContext, Config, PlacesState};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

// ============================================================================
// Constants
// ============================================================================

/// Default radius for `prefetch`, in meters.
const DEFAULT_PREFETCH_RADIUS_M: f64 = 2000.0;

/// Width of the name column in place listings
const NAME_COLUMN_WIDTH: usize = 40;

/// Set to a directory to also write daily-rotated log files there.
const LOG_DIR_ENV: &str = "SALUDMAP_LOG_DIR";

const USAGE: &str = "\
Usage: saludmap [--offline] [--json] <command>

Commands:
  locate                          Request a fresh position and store it
  calibrate                       Take a calibrated position fix
  watch                           Follow position updates until Ctrl-C
  manual <lat> <lng>              Pin the current location
  places [<lat> <lng>]            Health services near a point (default: current location)
  saved list                      List saved locations
  saved add <name> <lat> <lng> [description]
  saved delete <id>
  prefetch <lat> <lng> [radius_m] Download map tiles around a point for offline use
  clean-tiles                     Remove cached tiles and API responses past their max age
  stats                           Show cache statistics

--json prints places and saved locations as JSON.
Set RUST_LOG (e.g. RUST_LOG=debug) for diagnostics on stderr.";

/// Initialize the tracing subscriber for logging
fn init_tracing() -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match std::env::var(LOG_DIR_ENV) {
        Ok(dir) if !dir.is_empty() => {
            let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "saludmap.log"));
            (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
        }
        _ => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    // Keep the guard alive so buffered log lines are flushed on exit
    let _log_guard = init_tracing();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let offline = take_flag(&mut args, "--offline");
    let json = take_flag(&mut args, "--json");
    if args.is_empty() || args[0] == "--help" || args[0] == "-h" {
        eprintln!("{}", USAGE);
        return Ok(());
    }

    let mut config = Config::load()?;
    config.offline = offline;
    let provider = Arc::new(
        IpPositionProvider::new(config.ip_locate_url.clone()).context("Failed to create position provider")?,
    );
    let transport = Arc::new(HttpTransport::new().context("Failed to create HTTP client")?);
    let ctx = AppContext::init(config, provider, transport).await?;
    info!(command = %args[0], offline, "saludmap starting");

    let result = run(&ctx, &args, json).await;
    ctx.shutdown().await;
    result
}

async fn run(ctx: &AppContext, args: &[String], json: bool) -> Result<()> {
    match args[0].as_str() {
        "locate" => {
            let fix = ctx.tracker.get_current_position().await?;
            print_fix(&fix);
        }
        "calibrate" => {
            let fix = ctx.tracker.calibrate_position().await?;
            print_fix(&fix);
        }
        "watch" => watch(ctx).await?,
        "manual" => {
            let at = parse_coordinates(args.get(1), args.get(2))?;
            let fix = ctx.tracker.set_manual_location(at.lat, at.lng).await?;
            print_fix(&fix);
        }
        "places" => places(ctx, args, json).await?,
        "saved" => saved(ctx, args, json).await?,
        "prefetch" => prefetch(ctx, args).await?,
        "clean-tiles" => {
            let removed = ctx.store.clean_old_tiles(ctx.config.tile_max_age()).await?;
            println!("Removed {} cached tiles older than {} days", removed, ctx.config.tile_max_age().num_days());
            let removed = ctx.store.clean_old_api_responses(ctx.config.api_max_age()).await?;
            println!("Removed {} cached API responses older than {} days", removed, ctx.config.api_max_age().num_days());
        }
        "stats" => {
            let stats = ctx.store.cache_stats().await?;
            println!("Tiles:           {}", stats.tiles);
            println!("API responses:   {}", stats.api);
            println!("Static assets:   {}", stats.static_assets);
            println!("Places:          {}", stats.places);
            println!("Saved locations: {}", stats.saved_locations);
            if let Some(fix) = ctx.tracker.current_location() {
                println!(
                    "Last location:   {:.5}, {:.5} ({})",
                    fix.lat,
                    fix.lng,
                    fix.source.label()
                );
            }
        }
        other => bail!("Unknown command '{}'\n\n{}", other, USAGE),
    }
    Ok(())
}

// ============================================================================
// Commands
// ============================================================================

async fn watch(ctx: &AppContext) -> Result<()> {
    let _sub = ctx.tracker.subscribe(print_fix);
    ctx.tracker.start_watching();
    eprintln!("Watching position, press Ctrl-C to stop...");
    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;
    ctx.tracker.stop_watching();
    Ok(())
}

async fn places(ctx: &AppContext, args: &[String], json: bool) -> Result<()> {
    let fix = if args.len() >= 3 {
        let at = parse_coordinates(args.get(1), args.get(2))?;
        LocationFix::manual(at.lat, at.lng)
    } else {
        match ctx.tracker.current_location() {
            Some(fix) => fix,
            None => bail!("No known location. Run 'saludmap locate' or pass <lat> <lng>."),
        }
    };

    let state = ctx.places.refresh(&fix).await;
    if json {
        println!("{}", serde_json::to_string_pretty(&state.places)?);
    } else {
        print_places(fix.coordinates(), &state);
    }
    Ok(())
}

async fn saved(ctx: &AppContext, args: &[String], json: bool) -> Result<()> {
    match args.get(1).map(String::as_str) {
        Some("list") | None => {
            let saved = ctx.store.get_saved_locations().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&saved)?);
                return Ok(());
            }
            if saved.is_empty() {
                println!("No saved locations");
            }
            for location in saved {
                println!(
                    "{}  {:<30} {:>10.5} {:>10.5}  {}",
                    location.id,
                    truncate_string(&location.name, 30),
                    location.lat,
                    location.lng,
                    location.description.as_deref().unwrap_or("")
                );
            }
        }
        Some("add") => {
            let Some(name) = args.get(2) else {
                bail!("Usage: saludmap saved add <name> <lat> <lng> [description]");
            };
            let at = parse_coordinates(args.get(3), args.get(4))?;
            let description = args.get(5).map(String::as_str);
            let location = ctx
                .store
                .save_named_location(name, at.lat, at.lng, description)
                .await?;
            println!("Saved '{}' as {}", location.name, location.id);
        }
        Some("delete") => {
            let id = parse_id(args.get(2))?;
            if ctx.store.delete_saved_location(id).await? {
                println!("Deleted {}", id);
            } else {
                println!("No saved location with id {}", id);
            }
        }
        Some(other) => bail!("Unknown saved command '{}'", other),
    }
    Ok(())
}

async fn prefetch(ctx: &AppContext, args: &[String]) -> Result<()> {
    let center = parse_coordinates(args.get(1), args.get(2))?;
    let radius_m = match args.get(3) {
        Some(r) => r.parse::<f64>().with_context(|| format!("Invalid radius '{}'", r))?,
        None => DEFAULT_PREFETCH_RADIUS_M,
    };

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCancelling after in-flight tiles finish...");
            on_ctrl_c.cancel();
        }
    });

    let report = ctx
        .prefetcher
        .download_tiles_for_area(center, radius_m, |pct| eprint!("\rDownloading tiles: {:5.1}%", pct), &cancel)
        .await;
    eprintln!();

    println!(
        "Fetched {} of {} tiles ({} failed, {} pending)",
        report.fetched.len(),
        report.total,
        report.failed.len(),
        report.pending.len()
    );
    for (tile, reason) in report.failed.iter().take(5) {
        println!("  {} - {}", tile, reason);
    }
    if report.cancelled {
        println!("Cancelled. Run the same command again to fetch the remaining tiles.");
    }
    Ok(())
}

// ============================================================================
// Output
// ============================================================================

fn print_fix(fix: &LocationFix) {
    println!(
        "{:.6}, {:.6}  accuracy {}  [{}]  {}",
        fix.lat,
        fix.lng,
        fix.accuracy_display(),
        fix.source.label(),
        fix.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
    );
}

fn print_places(center: Coordinates, state: &PlacesState) {
    if let Some(ref error) = state.error {
        println!("{}", error);
    }
    if state.places.is_empty() {
        println!("No places found nearby");
        return;
    }
    if state.from_cache {
        println!("Offline results (saved on this device)");
    }
    for cached in &state.places {
        let place = &cached.place;
        println!(
            "[{}] {:<width$} {:>8}  {}",
            place.place_type.marker_label(),
            truncate_string(place.display_name(), NAME_COLUMN_WIDTH),
            format_distance(haversine_m(center, place.coordinates())),
            place.address().unwrap_or(""),
            width = NAME_COLUMN_WIDTH
        );
    }
    if state.from_cache {
        if let Some(oldest) = state.places.iter().min_by_key(|p| p.saved_at) {
            println!("Oldest entry saved {}", oldest.age_display());
        }
    }
}

// ============================================================================
// Argument parsing
// ============================================================================

fn take_flag(args: &mut Vec<String>, flag: &str) -> bool {
    let before = args.len();
    args.retain(|a| a != flag);
    args.len() != before
}

fn parse_coordinates(lat: Option<&String>, lng: Option<&String>) -> Result<Coordinates> {
    let (Some(lat), Some(lng)) = (lat, lng) else {
        bail!("Expected <lat> <lng>");
    };
    let lat: f64 = lat.parse().with_context(|| format!("Invalid latitude '{}'", lat))?;
    let lng: f64 = lng.parse().with_context(|| format!("Invalid longitude '{}'", lng))?;
    let at = Coordinates::new(lat, lng);
    if !at.is_valid() {
        bail!("Coordinates out of range: {}, {}", lat, lng);
    }
    Ok(at)
}

fn parse_id(arg: Option<&String>) -> Result<Uuid> {
    let arg = arg.context("Expected a saved location id")?;
    Uuid::parse_str(arg).with_context(|| format!("Invalid id '{}'", arg))
}
