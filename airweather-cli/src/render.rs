//! Terminal rendering of an aggregator state.

use airweather_core::{FetchState, WeatherRecord, format};
use chrono::{Local, TimeZone};
use std::fmt::Display;

const NO_TIME: &str = "--:--";

/// Render `state` for `label`, showing sun times in the local time zone.
pub fn render(label: &str, state: &FetchState) -> String {
    render_in(label, state, &Local)
}

pub fn render_in<Tz: TimeZone>(label: &str, state: &FetchState, tz: &Tz) -> String
where
    Tz::Offset: Display,
{
    match state {
        FetchState::Loading => format!("Loading weather for {label}..."),
        FetchState::Failed(message) => format!("{label}: {message}"),
        FetchState::Ready(record) => render_record(label, record, tz),
    }
}

fn render_record<Tz: TimeZone>(label: &str, record: &WeatherRecord, tz: &Tz) -> String
where
    Tz::Offset: Display,
{
    let clock = |epoch| {
        format::clock_in(epoch, tz)
            .unwrap_or_else(|| NO_TIME.to_string())
    };

    let mut lines = vec![
        label.to_string(),
        format!(
            "  Temperature  {}°C (feels like {}°C)",
            record.temp, record.feels_like
        ),
        format!("  Condition    {}", record.description),
        format!("  Humidity     {}%", record.humidity),
        format!("  Wind         {:.1} m/s", record.wind_speed),
        format!("  Pressure     {} hPa", record.pressure),
        format!("  Sunrise      {}", clock(record.sunrise)),
        format!("  Sunset       {}", clock(record.sunset)),
        format!("  Air quality  {} (AQI {})", record.aqi_label(), record.aqi),
        format!("  PM2.5        {:.1} µg/m³", record.pm25),
        format!("  PM10         {:.1} µg/m³", record.pm10),
    ];
    if let Some(url) = record.icon_url() {
        lines.push(format!("  Icon         {url}"));
    }
    lines.join("\n")
}
