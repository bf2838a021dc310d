//! Arena settings with persistence
//!
//! Settings are read from the path given on the command line, falling back to
//! `~/.config/strata/arena.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// All arena settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArenaSettings {
    pub simulation: SimulationSettings,
    pub spawn: SpawnSettings,
}

impl ArenaSettings {
    /// Get the default settings file path
    fn settings_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("strata").join("arena.toml"))
    }

    /// Load settings from `path`, or from the default location, or return defaults
    pub fn load(path: Option<&Path>) -> Self {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => {
                let Some(path) = Self::settings_path() else {
                    warn!("Could not determine config directory");
                    return Self::default();
                };
                path
            }
        };

        if !path.exists() {
            info!("No settings file found, using defaults");
            return Self::default();
        }

        match fs::read_to_string(&path) {
            Ok(content) => match Self::parse(&content) {
                Ok(settings) => {
                    info!("Loaded settings from {:?}", path);
                    settings
                }
                Err(e) => {
                    warn!("Failed to parse settings: {}, using defaults", e);
                    Self::default()
                }
            },
            Err(e) => {
                warn!("Failed to read settings file: {}, using defaults", e);
                Self::default()
            }
        }
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}

/// How long the simulation runs and how it is seeded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    /// Maximum number of ticks before the battle is called a draw
    pub max_ticks: u32,
    /// RNG seed, so runs are reproducible
    pub seed: u64,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            max_ticks: 200,
            seed: 0x5eed,
        }
    }
}

/// Who enters the arena
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpawnSettings {
    pub heroes: u32,
    pub monsters: u32,
    /// Arena width in cells
    pub width: i32,
    /// Arena height in cells
    pub height: i32,
}

impl Default for SpawnSettings {
    fn default() -> Self {
        Self {
            heroes: 3,
            monsters: 8,
            width: 40,
            height: 20,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let settings = ArenaSettings::parse("[spawn]\nmonsters = 2\n").unwrap();
        assert_eq!(settings.spawn.monsters, 2);
        assert_eq!(settings.spawn.heroes, SpawnSettings::default().heroes);
        assert_eq!(settings.simulation, SimulationSettings::default());
    }

    #[test]
    fn roundtrips_through_toml() {
        let settings = ArenaSettings::default();
        let text = toml::to_string_pretty(&settings).unwrap();
        assert_eq!(ArenaSettings::parse(&text).unwrap(), settings);
    }

    #[test]
    fn missing_file_uses_defaults() {
        let path = Path::new("/nonexistent/strata/arena.toml");
        assert_eq!(ArenaSettings::load(Some(path)), ArenaSettings::default());
    }
}
