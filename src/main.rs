//! Strata arena - a headless battle simulation on the Strata ECS
//!
//! Usage: `strata [settings.toml]`

mod arena;
mod components;
mod settings;
mod systems;

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::arena::Arena;
use crate::settings::ArenaSettings;

fn main() -> Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set subscriber")?;

    info!("Starting Strata arena...");

    let path = std::env::args_os().nth(1).map(PathBuf::from);
    let settings = ArenaSettings::load(path.as_deref());

    let mut arena = Arena::new(&settings);
    let summary = arena.run(settings.simulation.max_ticks);

    info!(
        ticks = summary.ticks,
        heroes_left = summary.heroes_left,
        monsters_left = summary.monsters_left,
        heroes_lost = summary.heroes_lost,
        monsters_lost = summary.monsters_lost,
        "Battle over: {}",
        summary.outcome
    );
    Ok(())
}
