use anyhow::{Context, Result, anyhow};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fs, path::PathBuf, time::Duration};

use crate::model::{Coordinate, Location};

/// Environment variable that overrides the stored API key.
pub const API_KEY_ENV: &str = "OPENWEATHER_API_KEY";

const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// A named location stored in the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedLocation {
    pub label: String,
    pub lat: f64,
    pub lon: f64,
}

impl SavedLocation {
    pub fn to_location(&self) -> Result<Location> {
        let coordinate = Coordinate::new(self.lat, self.lon)
            .with_context(|| format!("Saved location '{}' has invalid coordinates", self.label))?;
        Ok(Location::new(self.label.clone(), coordinate))
    }
}

impl From<&Location> for SavedLocation {
    fn from(location: &Location) -> Self {
        Self {
            label: location.label.clone(),
            lat: location.coordinate.lat(),
            lon: location.coordinate.lon(),
        }
    }
}

/// Top-level configuration stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// OpenWeather API key, used for both the weather and air-pollution endpoints.
    pub api_key: Option<String>,

    /// Per-request timeout in seconds.
    pub timeout_secs: Option<u64>,

    /// Name of the location `show` uses when none is given.
    pub default_location: Option<String>,

    /// Example TOML:
    /// [locations.seoul]
    /// label = "Seoul"
    /// lat = 37.5
    /// lon = 127.0
    #[serde(default)]
    pub locations: BTreeMap<String, SavedLocation>,
}

impl Config {
    /// Load config from disk, or return an empty default if it doesn't exist yet.
    pub fn load() -> Result<Self> {
        let path = Self::config_file_path()?;
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Save config to disk, creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_file_path()?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;

        fs::write(&path, toml)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Path to the config file.
    pub fn config_file_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("dev", "airweather", "airweather")
            .ok_or_else(|| anyhow!("Could not determine platform config directory"))?;

        Ok(dirs.config_dir().join("config.toml"))
    }

    /// API key from the environment, falling back to the config file.
    pub fn api_key(&self) -> Result<String> {
        self.api_key_with_env(std::env::var(API_KEY_ENV).ok())
    }

    fn api_key_with_env(&self, env: Option<String>) -> Result<String> {
        env.filter(|key| !key.trim().is_empty())
            .or_else(|| self.api_key.clone())
            .ok_or_else(|| {
                anyhow!(
                    "No OpenWeather API key configured.\n\
                     Hint: run `airweather configure` or set {API_KEY_ENV}."
                )
            })
    }

    pub fn set_api_key(&mut self, api_key: String) {
        self.api_key = Some(api_key);
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS))
    }

    /// Set/replace a saved location; the first one saved becomes the default.
    pub fn upsert_location(&mut self, name: &str, location: &Location) {
        let key = name.to_lowercase();
        self.locations.insert(key.clone(), SavedLocation::from(location));

        if self.default_location.is_none() {
            self.default_location = Some(key);
        }
    }

    /// Remove a saved location, clearing the default if it pointed there.
    pub fn remove_location(&mut self, name: &str) -> Result<SavedLocation> {
        let key = name.to_lowercase();
        let removed = self
            .locations
            .remove(&key)
            .ok_or_else(|| anyhow!("Unknown location '{name}'."))?;

        if self.default_location.as_deref() == Some(key.as_str()) {
            self.default_location = None;
        }

        Ok(removed)
    }

    pub fn location(&self, name: &str) -> Result<Location> {
        let saved = self.locations.get(&name.to_lowercase()).ok_or_else(|| {
            anyhow!(
                "Unknown location '{name}'.\n\
                 Hint: run `airweather location add {name} <LAT> <LON>` first."
            )
        })?;
        saved.to_location()
    }

    pub fn set_default_location(&mut self, name: &str) -> Result<()> {
        let key = name.to_lowercase();
        if !self.locations.contains_key(&key) {
            return Err(anyhow!("Unknown location '{name}'."));
        }
        self.default_location = Some(key);
        Ok(())
    }

    pub fn default_location(&self) -> Result<Location> {
        let name = self.default_location.as_ref().ok_or_else(|| {
            anyhow!(
                "No default location configured.\n\
                 Hint: pass --lat/--lon or run `airweather location add <NAME> <LAT> <LON>` first."
            )
        })?;
        self.location(name)
    }
}
