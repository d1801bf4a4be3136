//! osm-tiles - Render a slippy-map viewport to a PNG.
//!
//! This binary fetches one map with the tile worker pool and writes it out.

use clap::Parser;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use osm_tiles::{Config, MapSurface, TileMap, TileMapOptions};

fn main() -> ExitCode {
    let config = Config::parse();

    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let provider = match config.resolve_provider() {
        Ok(provider) => provider,
        Err(e) => {
            error!("Provider error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let options = TileMapOptions {
        force_single_worker: config.single_worker,
        ..TileMapOptions::default()
    };
    let mut map = TileMap::with_options(options);

    if let Err(e) = map.set_tile_provider(provider) {
        error!("Provider error: {}", e);
        return ExitCode::FAILURE;
    }
    if let Err(e) = map.set_size(config.width, config.height) {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let capacity = config.cache_tiles.unwrap_or_else(|| map.tiles_needed());
    if let Err(e) = map.resize_tiles_cache(capacity) {
        error!("Failed to allocate tile cache: {}", e);
        return ExitCode::FAILURE;
    }

    info!("Configuration:");
    info!("  Provider: {}", map.provider_name());
    info!("  Center: {}, {} at zoom {}", config.lon, config.lat, config.zoom);
    info!("  Viewport: {}x{}", config.width, config.height);
    info!("  Cache: {} tiles", capacity);
    match config.timeout() {
        Some(timeout) => info!("  Timeout: {} ms", timeout.as_millis()),
        None => info!("  Timeout: none"),
    }

    let mut surface = MapSurface::default();
    let report = match map.fetch_map(
        &mut surface,
        config.lon,
        config.lat,
        config.zoom,
        config.timeout(),
    ) {
        Ok(report) => report,
        Err(e) => {
            error!("Failed to fetch map: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if report.failures > 0 || report.shed > 0 {
        warn!(
            "{} of {} tile(s) missing ({} failed, {} dropped on timeout)",
            report.failures + report.shed,
            report.jobs,
            report.failures,
            report.shed
        );
    }

    if let Err(e) = surface.to_rgb_image().save(&config.output) {
        error!("Failed to write {}: {}", config.output.display(), e);
        return ExitCode::FAILURE;
    }

    info!("Wrote {}", config.output.display());
    let attribution = map.provider_attribution();
    if !attribution.is_empty() {
        info!("Map data: {}", attribution);
    }

    ExitCode::SUCCESS
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "osm_tiles=debug"
    } else {
        "osm_tiles=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
