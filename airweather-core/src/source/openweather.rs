use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::model::{Coordinate, RawAirQualityReading, RawWeatherReading};

use super::{AirQualitySource, SourceError, SourceKind, WeatherSource};

pub const DEFAULT_BASE_URL: &str = "https://api.openweathermap.org";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// OpenWeather client serving both the current-weather and the air-pollution
/// endpoints.
#[derive(Debug, Clone)]
pub struct OpenWeatherProvider {
    api_key: String,
    base_url: String,
    timeout: Duration,
    http: Client,
}

impl OpenWeatherProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
            http: Client::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn endpoint(&self, kind: SourceKind) -> String {
        format!("{}/data/2.5/{}", self.base_url, kind.as_str())
    }

    async fn get(&self, kind: SourceKind, coord: Coordinate) -> Result<String, SourceError> {
        let url = self.endpoint(kind);
        let lat = coord.lat().to_string();
        let lon = coord.lon().to_string();

        debug!(%url, %coord, "requesting {kind}");

        let mut request = self
            .http
            .get(&url)
            .timeout(self.timeout)
            .query(&[
                ("lat", lat.as_str()),
                ("lon", lon.as_str()),
                ("appid", self.api_key.as_str()),
            ]);
        if kind == SourceKind::Weather {
            request = request.query(&[("units", "metric")]);
        }

        // Transport errors embed the request URL, which includes the API key.
        let res = request
            .send()
            .await
            .map_err(|err| transport_error(kind, err))?;

        let status = res.status();
        let body = res.text().await.map_err(|err| transport_error(kind, err))?;

        if !status.is_success() {
            return Err(SourceError::Status {
                source_kind: kind,
                status,
                body: truncate_body(&body),
            });
        }

        Ok(body)
    }
}

fn transport_error(kind: SourceKind, err: reqwest::Error) -> SourceError {
    SourceError::Transport {
        source_kind: kind,
        source: err.without_url(),
    }
}

#[derive(Debug, Deserialize)]
struct AirPollutionEnvelope {
    list: Vec<RawAirQualityReading>,
}

/// Validate a current-weather body against the expected schema.
pub fn parse_weather(body: &str) -> Result<RawWeatherReading, SourceError> {
    serde_json::from_str(body).map_err(|source| SourceError::Parse {
        source_kind: SourceKind::Weather,
        source,
    })
}

/// Validate an air-pollution body and take its current reading.
pub fn parse_air_quality(body: &str) -> Result<RawAirQualityReading, SourceError> {
    let envelope: AirPollutionEnvelope =
        serde_json::from_str(body).map_err(|source| SourceError::Parse {
            source_kind: SourceKind::AirQuality,
            source,
        })?;

    envelope.list.into_iter().next().ok_or(SourceError::Empty {
        source_kind: SourceKind::AirQuality,
    })
}

#[async_trait]
impl WeatherSource for OpenWeatherProvider {
    async fn fetch_weather(&self, coord: Coordinate) -> Result<RawWeatherReading, SourceError> {
        let body = self.get(SourceKind::Weather, coord).await?;
        parse_weather(&body)
    }
}

#[async_trait]
impl AirQualitySource for OpenWeatherProvider {
    async fn fetch_air_quality(
        &self,
        coord: Coordinate,
    ) -> Result<RawAirQualityReading, SourceError> {
        let body = self.get(SourceKind::AirQuality, coord).await?;
        parse_air_quality(&body)
    }
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    match body.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}
