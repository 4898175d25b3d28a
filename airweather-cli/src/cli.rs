use std::{process::ExitCode, sync::Arc};

use airweather_core::{
    Config, Coordinate, FetchState, Location, OpenWeatherProvider, WeatherAggregator,
};
use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::debug;

use crate::render;

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(
    name = "airweather",
    version,
    about = "Current weather and air quality for a location"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Configure the OpenWeather API key and request timeout.
    Configure,

    /// Show weather and air quality for a location.
    Show {
        /// Saved location name; the default location is used when omitted.
        name: Option<String>,

        /// Latitude in degrees; overrides the saved location.
        #[arg(long, requires = "lon", allow_negative_numbers = true)]
        lat: Option<f64>,

        /// Longitude in degrees; overrides the saved location.
        #[arg(long, requires = "lat", allow_negative_numbers = true)]
        lon: Option<f64>,

        /// Label to display instead of the saved one.
        #[arg(long)]
        label: Option<String>,
    },

    /// Manage saved locations.
    Location {
        #[command(subcommand)]
        command: LocationCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum LocationCommand {
    /// Save a location under a short name.
    Add {
        name: String,

        #[arg(allow_negative_numbers = true)]
        lat: f64,

        #[arg(allow_negative_numbers = true)]
        lon: f64,

        /// Display label; defaults to the name.
        #[arg(long)]
        label: Option<String>,

        /// Make this the default location.
        #[arg(long)]
        default: bool,
    },

    /// Remove a saved location.
    Remove { name: String },

    /// List saved locations.
    List,
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<ExitCode> {
        match self.command {
            Command::Configure => configure()?,
            Command::Show {
                name,
                lat,
                lon,
                label,
            } => {
                let config = Config::load()?;
                let location = resolve_location(&config, name, lat, lon, label)?;
                return show(&config, &location).await;
            }
            Command::Location { command } => run_location(command)?,
        }

        Ok(ExitCode::SUCCESS)
    }
}

fn configure() -> anyhow::Result<()> {
    let mut config = Config::load()?;

    let api_key = inquire::Password::new("OpenWeather API key:")
        .without_confirmation()
        .prompt()
        .context("Failed to read API key")?;

    let timeout = inquire::CustomType::<u64>::new("Request timeout (seconds):")
        .with_default(config.timeout().as_secs())
        .prompt()
        .context("Failed to read request timeout")?;

    config.set_api_key(api_key.trim().to_string());
    config.timeout_secs = Some(timeout);
    config.save()?;

    println!("Saved configuration to {}", Config::config_file_path()?.display());
    Ok(())
}

fn resolve_location(
    config: &Config,
    name: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
    label: Option<String>,
) -> anyhow::Result<Location> {
    let mut location = match (lat, lon, name) {
        (Some(lat), Some(lon), name) => {
            let coordinate = Coordinate::new(lat, lon)?;
            Location::new(name.unwrap_or_else(|| coordinate.to_string()), coordinate)
        }
        (_, _, Some(name)) => config.location(&name)?,
        _ => config.default_location()?,
    };

    if let Some(label) = label {
        location.label = label;
    }

    Ok(location)
}

async fn show(config: &Config, location: &Location) -> anyhow::Result<ExitCode> {
    let provider = OpenWeatherProvider::new(config.api_key()?)
        .with_timeout(config.timeout());
    let provider = Arc::new(provider);
    let aggregator = WeatherAggregator::new(provider.clone(), provider);

    debug!(label = %location.label, coordinate = %location.coordinate, "showing location");
    aggregator.set_coordinate(location.coordinate);

    let mut rx = aggregator.subscribe();
    let state = loop {
        let state = rx.borrow_and_update().clone();
        if !state.is_loading() {
            break state;
        }
        eprintln!("{}", render::render(&location.label, &state));
        rx.changed().await.context("Aggregator stopped before settling")?;
    };

    match state {
        FetchState::Failed(_) => {
            eprintln!("{}", render::render(&location.label, &state));
            Ok(ExitCode::FAILURE)
        }
        _ => {
            println!("{}", render::render(&location.label, &state));
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn run_location(command: LocationCommand) -> anyhow::Result<()> {
    let mut config = Config::load()?;

    match command {
        LocationCommand::Add {
            name,
            lat,
            lon,
            label,
            default,
        } => {
            let coordinate = Coordinate::new(lat, lon)?;
            let location = Location::new(label.unwrap_or_else(|| name.clone()), coordinate);

            config.upsert_location(&name, &location);
            if default {
                config.set_default_location(&name)?;
            }
            config.save()?;

            println!("Saved '{name}' at {coordinate}");
        }
        LocationCommand::Remove { name } => {
            let removed = config.remove_location(&name)?;
            config.save()?;

            println!("Removed '{}'", removed.label);
        }
        LocationCommand::List => {
            if config.locations.is_empty() {
                println!("No saved locations.");
            }
            for (name, saved) in &config.locations {
                let marker = if config.default_location.as_deref() == Some(name.as_str()) {
                    "*"
                } else {
                    " "
                };
                println!(
                    "{marker} {name:<12} {} ({:.4}, {:.4})",
                    saved.label, saved.lat, saved.lon
                );
            }
        }
    }

    Ok(())
}
