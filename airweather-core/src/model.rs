use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::aqi;

/// Icon image template used by the weather provider.
const ICON_URL_BASE: &str = "https://openweathermap.org/img/wn";

/// Latitude/longitude pair identifying a query location.
///
/// Compared by value: two coordinates with identical components are the same
/// query and never trigger a second fetch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "CoordinateFields")]
pub struct Coordinate {
    lat: f64,
    lon: f64,
}

#[derive(Deserialize)]
struct CoordinateFields {
    lat: f64,
    lon: f64,
}

impl TryFrom<CoordinateFields> for Coordinate {
    type Error = CoordinateError;

    fn try_from(fields: CoordinateFields) -> Result<Self, Self::Error> {
        Coordinate::new(fields.lat, fields.lon)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum CoordinateError {
    #[error("latitude {0} is out of range (expected -90..=90)")]
    Latitude(f64),
    #[error("longitude {0} is out of range (expected -180..=180)")]
    Longitude(f64),
}

impl Coordinate {
    pub fn new(lat: f64, lon: f64) -> Result<Self, CoordinateError> {
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return Err(CoordinateError::Latitude(lat));
        }
        if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
            return Err(CoordinateError::Longitude(lon));
        }
        Ok(Self { lat, lon })
    }

    pub fn lat(&self) -> f64 {
        self.lat
    }

    pub fn lon(&self) -> f64 {
        self.lon
    }
}

impl std::fmt::Display for Coordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.4}, {:.4}", self.lat, self.lon)
    }
}

/// A coordinate plus the label shown to the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub label: String,
    pub coordinate: Coordinate,
}

impl Location {
    pub fn new(label: impl Into<String>, coordinate: Coordinate) -> Self {
        Self {
            label: label.into(),
            coordinate,
        }
    }
}

/// Current conditions as delivered by the weather provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawWeatherReading {
    #[serde(default)]
    pub name: Option<String>,
    pub main: RawMain,
    pub wind: RawWind,
    #[serde(default)]
    pub weather: Vec<RawCondition>,
    pub sys: RawSun,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMain {
    pub temp: f64,
    pub feels_like: f64,
    pub humidity: u8,
    pub pressure: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawWind {
    pub speed: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawCondition {
    pub description: String,
    pub icon: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSun {
    pub sunrise: i64,
    pub sunset: i64,
}

/// One air-quality reading as delivered by the air-quality provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawAirQualityReading {
    pub main: RawAqi,
    pub components: RawComponents,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawAqi {
    pub aqi: u8,
}

/// Pollutant concentrations in µg/m³.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawComponents {
    pub pm2_5: f64,
    pub pm10: f64,
    #[serde(default)]
    pub co: Option<f64>,
    #[serde(default)]
    pub no: Option<f64>,
    #[serde(default)]
    pub no2: Option<f64>,
    #[serde(default)]
    pub o3: Option<f64>,
    #[serde(default)]
    pub so2: Option<f64>,
    #[serde(default)]
    pub nh3: Option<f64>,
}

/// Weather and air quality for one location, merged from both providers.
///
/// Only ever built when both fetches succeeded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherRecord {
    pub temp: i32,
    pub feels_like: i32,
    pub humidity: u8,
    /// m/s
    pub wind_speed: f64,
    /// hPa
    pub pressure: u32,
    pub description: String,
    pub icon: String,
    /// Epoch seconds.
    pub sunrise: i64,
    /// Epoch seconds.
    pub sunset: i64,
    pub aqi: u8,
    pub pm25: f64,
    pub pm10: f64,
}

impl WeatherRecord {
    pub fn aqi_label(&self) -> &'static str {
        aqi::classify(i64::from(self.aqi))
    }

    /// Image URL for the condition icon, if the provider sent one.
    pub fn icon_url(&self) -> Option<String> {
        if self.icon.is_empty() {
            None
        } else {
            Some(format!("{ICON_URL_BASE}/{}@2x.png", self.icon))
        }
    }
}

/// Lifecycle of one aggregation cycle.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum FetchState {
    #[default]
    Loading,
    Failed(String),
    Ready(WeatherRecord),
}

impl FetchState {
    pub fn is_loading(&self) -> bool {
        matches!(self, FetchState::Loading)
    }

    pub fn record(&self) -> Option<&WeatherRecord> {
        match self {
            FetchState::Ready(record) => Some(record),
            _ => None,
        }
    }
}
