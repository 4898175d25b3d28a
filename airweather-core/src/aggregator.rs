//! Joins the weather and air-quality sources into one [`WeatherRecord`] and
//! publishes the [`FetchState`] lifecycle for a single location.
//!
//! Every new coordinate starts a fresh cycle tagged with a generation number.
//! A cycle only commits its result while its generation is still the latest,
//! so a slow, superseded cycle can never overwrite a newer one.

use std::sync::{
    Arc, Mutex, MutexGuard,
    atomic::{AtomicU64, Ordering},
};

use thiserror::Error;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, warn};

use crate::{
    model::{Coordinate, FetchState, RawAirQualityReading, RawWeatherReading, WeatherRecord},
    source::{AirQualitySource, SourceError, WeatherSource},
};

/// Message published when a cycle fails, whichever source caused it.
pub const FAILURE_MESSAGE: &str = "Failed to load weather information.";

/// Description used when the provider sends no condition entry.
pub const UNKNOWN_CONDITION: &str = "Unknown";

#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("weather source failed")]
    Weather(#[source] SourceError),

    #[error("air-quality source failed")]
    AirQuality(#[source] SourceError),

    #[error("both sources failed (air quality: {})", report(.air_quality))]
    Both {
        #[source]
        weather: SourceError,
        air_quality: SourceError,
    },
}

/// Fetch both sources concurrently and merge them.
///
/// Waits for both requests to settle; any failure fails the whole pass.
pub async fn aggregate(
    weather: &dyn WeatherSource,
    air: &dyn AirQualitySource,
    coord: Coordinate,
) -> Result<WeatherRecord, AggregateError> {
    let (weather, air) = tokio::join!(weather.fetch_weather(coord), air.fetch_air_quality(coord));

    match (weather, air) {
        (Ok(weather), Ok(air)) => Ok(normalize(&weather, &air)),
        (Err(weather), Ok(_)) => Err(AggregateError::Weather(weather)),
        (Ok(_), Err(air_quality)) => Err(AggregateError::AirQuality(air_quality)),
        (Err(weather), Err(air_quality)) => Err(AggregateError::Both {
            weather,
            air_quality,
        }),
    }
}

/// Merge one reading from each source into a [`WeatherRecord`].
pub fn normalize(weather: &RawWeatherReading, air: &RawAirQualityReading) -> WeatherRecord {
    let (description, icon) = match weather.weather.first() {
        Some(condition) => (condition.description.clone(), condition.icon.clone()),
        None => (UNKNOWN_CONDITION.to_string(), String::new()),
    };

    WeatherRecord {
        temp: weather.main.temp.round() as i32,
        feels_like: weather.main.feels_like.round() as i32,
        humidity: weather.main.humidity,
        wind_speed: weather.wind.speed,
        pressure: weather.main.pressure,
        description,
        icon,
        sunrise: weather.sys.sunrise,
        sunset: weather.sys.sunset,
        aqi: air.main.aqi,
        pm25: air.components.pm2_5,
        pm10: air.components.pm10,
    }
}

#[derive(Debug, Default)]
struct Inflight {
    coord: Option<Coordinate>,
    task: Option<JoinHandle<()>>,
}

/// Owns the [`FetchState`] for one location and re-runs the aggregation
/// whenever the coordinate changes.
///
/// Cycles are spawned on the ambient tokio runtime, so the trigger methods
/// must be called from within one.
#[derive(Debug)]
pub struct WeatherAggregator {
    weather: Arc<dyn WeatherSource>,
    air: Arc<dyn AirQualitySource>,
    state: Arc<watch::Sender<FetchState>>,
    generation: Arc<AtomicU64>,
    inflight: Mutex<Inflight>,
}

impl WeatherAggregator {
    pub fn new(weather: Arc<dyn WeatherSource>, air: Arc<dyn AirQualitySource>) -> Self {
        let (state, _) = watch::channel(FetchState::Loading);
        Self {
            weather,
            air,
            state: Arc::new(state),
            generation: Arc::new(AtomicU64::new(0)),
            inflight: Mutex::new(Inflight::default()),
        }
    }

    /// Start a cycle for `coord` unless it equals the current coordinate.
    ///
    /// Returns `true` if a new cycle was started.
    pub fn set_coordinate(&self, coord: Coordinate) -> bool {
        let mut inflight = self.lock_inflight();
        if inflight.coord == Some(coord) {
            debug!(%coord, "coordinate unchanged, keeping current cycle");
            return false;
        }
        inflight.coord = Some(coord);
        self.start_cycle(&mut inflight, coord);
        true
    }

    /// Restart the cycle for the current coordinate, if there is one.
    pub fn refresh(&self) -> bool {
        let mut inflight = self.lock_inflight();
        match inflight.coord {
            Some(coord) => {
                self.start_cycle(&mut inflight, coord);
                true
            }
            None => false,
        }
    }

    pub fn coordinate(&self) -> Option<Coordinate> {
        self.lock_inflight().coord
    }

    /// Number of cycles started so far.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> FetchState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<FetchState> {
        self.state.subscribe()
    }

    /// Wait for the current cycle to leave `Loading`.
    ///
    /// Never resolves if no coordinate has been set.
    pub async fn settled(&self) -> FetchState {
        let mut rx = self.subscribe();
        match rx.wait_for(|state| !state.is_loading()).await {
            Ok(state) => state.clone(),
            Err(_) => self.state(),
        }
    }

    fn lock_inflight(&self) -> MutexGuard<'_, Inflight> {
        self.inflight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn start_cycle(&self, inflight: &mut Inflight, coord: Coordinate) {
        if let Some(task) = inflight.task.take() {
            task.abort();
        }

        // Bump the generation under the channel lock so a stale commit cannot
        // slip in between the bump and the Loading transition.
        let mut generation = 0;
        self.state.send_modify(|state| {
            generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            *state = FetchState::Loading;
        });
        debug!(generation, %coord, "starting aggregation cycle");

        let weather = Arc::clone(&self.weather);
        let air = Arc::clone(&self.air);
        let state = Arc::clone(&self.state);
        let current = Arc::clone(&self.generation);

        inflight.task = Some(tokio::spawn(async move {
            let next = match aggregate(weather.as_ref(), air.as_ref(), coord).await {
                Ok(record) => FetchState::Ready(record),
                Err(err) => {
                    warn!(generation, %coord, error = %report(&err), "aggregation cycle failed");
                    FetchState::Failed(FAILURE_MESSAGE.to_string())
                }
            };

            if !commit(&state, &current, generation, next) {
                debug!(generation, %coord, "discarding result of superseded cycle");
            }
        }));
    }
}

impl Drop for WeatherAggregator {
    fn drop(&mut self) {
        if let Some(task) = self.lock_inflight().task.take() {
            task.abort();
        }
    }
}

/// Publish `next` only if `generation` is still the latest cycle.
fn commit(
    state: &watch::Sender<FetchState>,
    current: &AtomicU64,
    generation: u64,
    next: FetchState,
) -> bool {
    state.send_if_modified(|slot| {
        if current.load(Ordering::SeqCst) != generation {
            return false;
        }
        *slot = next;
        true
    })
}

/// Render an error with its full source chain.
fn report(err: &(dyn std::error::Error + 'static)) -> String {
    let mut out = err.to_string();
    let mut cause = err.source();
    while let Some(inner) = cause {
        out.push_str(": ");
        out.push_str(&inner.to_string());
        cause = inner.source();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        model::{RawAqi, RawComponents, RawCondition, RawMain, RawSun, RawWind},
        source::SourceKind,
    };
    use async_trait::async_trait;
    use reqwest::StatusCode;
    use std::{sync::atomic::AtomicUsize, time::Duration};
    use tokio::time::{Instant, sleep};

    fn weather_reading(temp: f64, feels_like: f64) -> RawWeatherReading {
        RawWeatherReading {
            name: None,
            main: RawMain {
                temp,
                feels_like,
                humidity: 55,
                pressure: 1012,
            },
            wind: RawWind { speed: 3.6 },
            weather: vec![RawCondition {
                description: "clear sky".into(),
                icon: "01d".into(),
            }],
            sys: RawSun {
                sunrise: 1_700_000_000,
                sunset: 1_700_030_000,
            },
        }
    }

    fn air_reading() -> RawAirQualityReading {
        RawAirQualityReading {
            main: RawAqi { aqi: 2 },
            components: RawComponents {
                pm2_5: 12.3,
                pm10: 20.1,
                co: Some(201.9),
                no: None,
                no2: None,
                o3: None,
                so2: None,
                nh3: None,
            },
        }
    }

    fn unavailable(kind: SourceKind) -> SourceError {
        SourceError::Status {
            source_kind: kind,
            status: StatusCode::SERVICE_UNAVAILABLE,
            body: String::new(),
        }
    }

    fn missing(kind: SourceKind) -> SourceError {
        SourceError::Empty { source_kind: kind }
    }

    fn coord(lat: f64, lon: f64) -> Coordinate {
        Coordinate::new(lat, lon).unwrap()
    }

    #[derive(Debug, Clone)]
    struct Script {
        temp: f64,
        weather_ok: bool,
        air_ok: bool,
        weather_delay: Duration,
        air_delay: Duration,
    }

    impl Script {
        fn ok(temp: f64, delay_ms: u64) -> Self {
            Self {
                temp,
                weather_ok: true,
                air_ok: true,
                weather_delay: Duration::from_millis(delay_ms),
                air_delay: Duration::from_millis(delay_ms),
            }
        }

        fn weather_down(mut self) -> Self {
            self.weather_ok = false;
            self
        }

        fn air_down(mut self) -> Self {
            self.air_ok = false;
            self
        }

        fn delays(mut self, weather_ms: u64, air_ms: u64) -> Self {
            self.weather_delay = Duration::from_millis(weather_ms);
            self.air_delay = Duration::from_millis(air_ms);
            self
        }
    }

    /// Serves canned readings per coordinate after a scripted delay.
    #[derive(Debug, Default)]
    struct ScriptedSource {
        scripts: Vec<(Coordinate, Script)>,
        weather_calls: AtomicUsize,
        air_calls: AtomicUsize,
        settled: AtomicUsize,
    }

    impl ScriptedSource {
        fn new(scripts: Vec<(Coordinate, Script)>) -> Arc<Self> {
            Arc::new(Self {
                scripts,
                ..Default::default()
            })
        }

        fn script(&self, coord: Coordinate) -> Option<Script> {
            self.scripts
                .iter()
                .find(|(c, _)| *c == coord)
                .map(|(_, s)| s.clone())
        }
    }

    #[async_trait]
    impl WeatherSource for ScriptedSource {
        async fn fetch_weather(&self, coord: Coordinate) -> Result<RawWeatherReading, SourceError> {
            self.weather_calls.fetch_add(1, Ordering::SeqCst);
            let script = self
                .script(coord)
                .ok_or_else(|| missing(SourceKind::Weather))?;
            sleep(script.weather_delay).await;
            self.settled.fetch_add(1, Ordering::SeqCst);
            if script.weather_ok {
                Ok(weather_reading(script.temp, script.temp - 0.5))
            } else {
                Err(unavailable(SourceKind::Weather))
            }
        }
    }

    #[async_trait]
    impl AirQualitySource for ScriptedSource {
        async fn fetch_air_quality(
            &self,
            coord: Coordinate,
        ) -> Result<RawAirQualityReading, SourceError> {
            self.air_calls.fetch_add(1, Ordering::SeqCst);
            let script = self
                .script(coord)
                .ok_or_else(|| missing(SourceKind::AirQuality))?;
            sleep(script.air_delay).await;
            self.settled.fetch_add(1, Ordering::SeqCst);
            if script.air_ok {
                Ok(air_reading())
            } else {
                Err(unavailable(SourceKind::AirQuality))
            }
        }
    }

    fn aggregator(source: &Arc<ScriptedSource>) -> WeatherAggregator {
        WeatherAggregator::new(source.clone(), source.clone())
    }

    async fn run(
        source: &ScriptedSource,
        coord: Coordinate,
    ) -> Result<WeatherRecord, AggregateError> {
        aggregate(source, source, coord).await
    }

    #[test]
    fn normalize_builds_expected_record() {
        let record = normalize(&weather_reading(21.4, 20.9), &air_reading());

        assert_eq!(
            record,
            WeatherRecord {
                temp: 21,
                feels_like: 21,
                humidity: 55,
                wind_speed: 3.6,
                pressure: 1012,
                description: "clear sky".into(),
                icon: "01d".into(),
                sunrise: 1_700_000_000,
                sunset: 1_700_030_000,
                aqi: 2,
                pm25: 12.3,
                pm10: 20.1,
            }
        );
        assert_eq!(record.aqi_label(), "Fair");
    }

    #[test]
    fn normalize_rounds_temperatures() {
        let record = normalize(&weather_reading(18.6, -0.4), &air_reading());
        assert_eq!(record.temp, 19);
        assert_eq!(record.feels_like, 0);

        let record = normalize(&weather_reading(2.5, -2.5), &air_reading());
        assert_eq!(record.temp, 3);
        assert_eq!(record.feels_like, -3);
    }

    #[test]
    fn normalize_falls_back_when_no_condition_is_reported() {
        let mut weather = weather_reading(10.0, 9.0);
        weather.weather.clear();

        let record = normalize(&weather, &air_reading());
        assert_eq!(record.description, UNKNOWN_CONDITION);
        assert_eq!(record.icon, "");
        assert_eq!(record.icon_url(), None);
    }

    #[test]
    fn normalize_uses_first_condition_entry() {
        let mut weather = weather_reading(10.0, 9.0);
        weather.weather.push(RawCondition {
            description: "mist".into(),
            icon: "50d".into(),
        });

        let record = normalize(&weather, &air_reading());
        assert_eq!(record.description, "clear sky");
        assert_eq!(record.icon, "01d");
    }

    #[tokio::test]
    async fn aggregate_reports_which_source_failed() {
        let here = coord(37.5, 127.0);

        let air_down = ScriptedSource::new(vec![(here, Script::ok(21.4, 0).air_down())]);
        let err = run(&air_down, here).await.unwrap_err();
        assert!(matches!(err, AggregateError::AirQuality(_)));

        let weather_down = ScriptedSource::new(vec![(here, Script::ok(21.4, 0).weather_down())]);
        let err = run(&weather_down, here).await.unwrap_err();
        assert!(matches!(err, AggregateError::Weather(_)));

        let both_down = ScriptedSource::new(vec![(
            here,
            Script::ok(21.4, 0).weather_down().air_down(),
        )]);
        let err = run(&both_down, here).await.unwrap_err();
        assert!(matches!(err, AggregateError::Both { .. }));

        let message = report(&err);
        assert!(message.contains("air_pollution request failed"));
        assert!(message.contains("weather request failed"));
    }

    #[tokio::test(start_paused = true)]
    async fn aggregate_requests_both_sources_concurrently() {
        let here = coord(37.5, 127.0);
        let source = ScriptedSource::new(vec![(here, Script::ok(21.4, 0).delays(100, 100))]);

        let started = Instant::now();
        run(&source, here).await.unwrap();
        let elapsed = started.elapsed();

        // Sequential requests would take 200ms.
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_millis(150), "took {elapsed:?}");
        assert_eq!(source.weather_calls.load(Ordering::SeqCst), 1);
        assert_eq!(source.air_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn fast_failure_still_waits_for_the_other_source() {
        let here = coord(37.5, 127.0);
        let source = ScriptedSource::new(vec![(
            here,
            Script::ok(21.4, 0).weather_down().delays(10, 100),
        )]);

        let started = Instant::now();
        let err = run(&source, here).await.unwrap_err();

        assert!(matches!(err, AggregateError::Weather(_)));
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert_eq!(source.settled.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn repeated_cycles_yield_identical_records() {
        let here = coord(37.5, 127.0);
        let source = ScriptedSource::new(vec![(here, Script::ok(21.4, 0))]);

        let first = run(&source, here).await.unwrap();
        let second = run(&source, here).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test(start_paused = true)]
    async fn cycle_moves_from_loading_to_ready() {
        let here = coord(37.5, 127.0);
        let source = ScriptedSource::new(vec![(here, Script::ok(21.4, 50))]);
        let agg = aggregator(&source);

        assert!(agg.set_coordinate(here));
        assert_eq!(agg.state(), FetchState::Loading);

        let state = agg.settled().await;
        let record = state.record().expect("cycle should be ready");
        assert_eq!(record.temp, 21);
        assert_eq!(record.humidity, 55);
        assert_eq!(record.pressure, 1012);
        assert_eq!(record.aqi, 2);
        assert_eq!(agg.generation(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_air_quality_discards_weather() {
        let here = coord(37.5, 127.0);
        let source = ScriptedSource::new(vec![(here, Script::ok(21.4, 10).air_down())]);
        let agg = aggregator(&source);

        agg.set_coordinate(here);

        let failed = FetchState::Failed(FAILURE_MESSAGE.to_string());
        assert_eq!(agg.settled().await, failed);
        assert!(agg.state().record().is_none());
        assert_eq!(source.weather_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn same_coordinate_does_not_refetch() {
        let here = coord(37.5, 127.0);
        let source = ScriptedSource::new(vec![(here, Script::ok(21.4, 10))]);
        let agg = aggregator(&source);

        assert!(agg.set_coordinate(here));
        agg.settled().await;
        assert!(!agg.set_coordinate(coord(37.5, 127.0)));

        assert_eq!(agg.generation(), 1);
        assert_eq!(source.weather_calls.load(Ordering::SeqCst), 1);
        assert_eq!(source.air_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_restarts_current_coordinate() {
        let here = coord(37.5, 127.0);
        let source = ScriptedSource::new(vec![(here, Script::ok(21.4, 10))]);
        let agg = aggregator(&source);

        assert!(!agg.refresh());
        agg.set_coordinate(here);
        agg.settled().await;

        assert!(agg.refresh());
        assert!(agg.state().is_loading());
        assert!(agg.settled().await.record().is_some());
        assert_eq!(agg.generation(), 2);
        assert_eq!(source.weather_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn newer_cycle_wins_when_older_settles_last() {
        let slow = coord(37.5, 127.0);
        let fast = coord(35.1, 129.0);
        let source = ScriptedSource::new(vec![
            (slow, Script::ok(10.0, 100)),
            (fast, Script::ok(20.0, 10)),
        ]);
        let agg = aggregator(&source);

        agg.set_coordinate(slow);
        agg.set_coordinate(fast);

        assert_eq!(agg.settled().await.record().map(|r| r.temp), Some(20));

        sleep(Duration::from_millis(200)).await;
        assert_eq!(agg.state().record().map(|r| r.temp), Some(20));
    }

    #[tokio::test(start_paused = true)]
    async fn newer_cycle_wins_when_older_settles_first() {
        let fast = coord(37.5, 127.0);
        let slow = coord(35.1, 129.0);
        let source = ScriptedSource::new(vec![
            (fast, Script::ok(10.0, 10)),
            (slow, Script::ok(20.0, 100)),
        ]);
        let agg = aggregator(&source);

        agg.set_coordinate(fast);
        agg.set_coordinate(slow);

        sleep(Duration::from_millis(50)).await;
        assert!(agg.state().is_loading());

        assert_eq!(agg.settled().await.record().map(|r| r.temp), Some(20));
        assert_eq!(agg.coordinate(), Some(slow));
    }

    #[tokio::test(start_paused = true)]
    async fn subscribers_observe_each_transition() {
        let first = coord(37.5, 127.0);
        let second = coord(35.1, 129.0);
        let source = ScriptedSource::new(vec![
            (first, Script::ok(10.0, 10)),
            (second, Script::ok(20.0, 10).weather_down()),
        ]);
        let agg = aggregator(&source);
        let mut rx = agg.subscribe();

        agg.set_coordinate(first);
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().is_loading());
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().record().is_some());

        agg.set_coordinate(second);
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().is_loading());
        rx.changed().await.unwrap();

        let failed = FetchState::Failed(FAILURE_MESSAGE.to_string());
        assert_eq!(*rx.borrow_and_update(), failed);
    }

    #[test]
    fn stale_generation_is_not_committed() {
        let (state, _rx) = watch::channel(FetchState::Loading);
        let current = AtomicU64::new(2);

        assert!(!commit(&state, &current, 1, FetchState::Failed("stale".into())));
        assert_eq!(*state.borrow(), FetchState::Loading);

        assert!(commit(&state, &current, 2, FetchState::Failed("fresh".into())));
        assert_eq!(*state.borrow(), FetchState::Failed("fresh".into()));
    }
}
