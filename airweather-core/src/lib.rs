//! Core library for the `airweather` CLI.
//!
//! This crate defines:
//! - Data sources for current weather and air quality
//! - The aggregator that joins both into one record and tracks its lifecycle
//! - AQI classification and clock formatting used when displaying results
//! - Configuration & credentials handling
//!
//! It is used by `airweather-cli`, but can also be reused by other binaries or services.

pub mod aggregator;
pub mod aqi;
pub mod config;
pub mod format;
pub mod model;
pub mod source;

pub use aggregator::{AggregateError, FAILURE_MESSAGE, WeatherAggregator};
pub use aqi::{AqiCategory, classify};
pub use config::{Config, SavedLocation};
pub use model::{Coordinate, CoordinateError, FetchState, Location, WeatherRecord};
pub use source::{AirQualitySource, OpenWeatherProvider, SourceError, SourceKind, WeatherSource};
