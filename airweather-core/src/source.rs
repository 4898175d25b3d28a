use async_trait::async_trait;
use reqwest::StatusCode;
use std::fmt::Debug;
use thiserror::Error;

use crate::model::{Coordinate, RawAirQualityReading, RawWeatherReading};

pub mod openweather;

pub use openweather::OpenWeatherProvider;

/// The two remote data sources the aggregator joins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Weather,
    AirQuality,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Weather => "weather",
            SourceKind::AirQuality => "air_pollution",
        }
    }

    pub const fn all() -> &'static [SourceKind] {
        &[SourceKind::Weather, SourceKind::AirQuality]
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("request to the {source_kind} endpoint failed")]
    Transport {
        source_kind: SourceKind,
        #[source]
        source: reqwest::Error,
    },

    #[error("{source_kind} request failed with status {status}: {body}")]
    Status {
        source_kind: SourceKind,
        status: StatusCode,
        body: String,
    },

    #[error("failed to parse {source_kind} response")]
    Parse {
        source_kind: SourceKind,
        #[source]
        source: serde_json::Error,
    },

    #[error("{source_kind} response contained no data")]
    Empty { source_kind: SourceKind },
}

impl SourceError {
    pub fn source_kind(&self) -> SourceKind {
        match self {
            SourceError::Transport { source_kind, .. }
            | SourceError::Status { source_kind, .. }
            | SourceError::Parse { source_kind, .. }
            | SourceError::Empty { source_kind } => *source_kind,
        }
    }
}

#[async_trait]
pub trait WeatherSource: Send + Sync + Debug {
    async fn fetch_weather(&self, coord: Coordinate) -> Result<RawWeatherReading, SourceError>;
}

#[async_trait]
pub trait AirQualitySource: Send + Sync + Debug {
    async fn fetch_air_quality(
        &self,
        coord: Coordinate,
    ) -> Result<RawAirQualityReading, SourceError>;
}
