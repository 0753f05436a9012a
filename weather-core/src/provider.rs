use crate::{
    Config,
    model::{Location, WeatherData},
    provider::{
        city::{BoundingBoxResolver, CityResolver},
        openmeteo::OpenMeteoProvider,
        openweather::OpenWeatherProvider,
        simulated::SimulatedProvider,
        weatherapi::WeatherApiProvider,
    },
    simulator::ClimateSimulator,
};
use async_trait::async_trait;
use reqwest::Client;
use std::{convert::TryFrom, fmt::Debug, sync::Arc, time::Duration};

pub mod city;
pub mod openmeteo;
pub mod openweather;
pub mod simulated;
pub mod weatherapi;

/// Coordinates used by [`WeatherProvider::is_available`] to probe a provider.
pub const PROBE_COORDINATES: (f64, f64) = (6.9271, 79.8612);

/// Bound on both connecting to and hearing back from a live weather API.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

const USER_AGENT: &str = "WeatherServer/1.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderId {
    OpenWeather,
    WeatherApi,
    OpenMeteo,
    Simulated,
}

impl ProviderId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::OpenWeather => "openweather",
            ProviderId::WeatherApi => "weatherapi",
            ProviderId::OpenMeteo => "openmeteo",
            ProviderId::Simulated => "simulated",
        }
    }

    pub const fn all() -> &'static [ProviderId] {
        &[
            ProviderId::OpenWeather,
            ProviderId::WeatherApi,
            ProviderId::OpenMeteo,
            ProviderId::Simulated,
        ]
    }

    pub fn requires_api_key(&self) -> bool {
        matches!(self, ProviderId::OpenWeather | ProviderId::WeatherApi)
    }

    /// Environment variable that can supply this provider's API key.
    pub fn api_key_env_var(&self) -> Option<&'static str> {
        match self {
            ProviderId::OpenWeather => Some("OPENWEATHER_API_KEY"),
            ProviderId::WeatherApi => Some("WEATHERAPI_API_KEY"),
            ProviderId::OpenMeteo | ProviderId::Simulated => None,
        }
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for ProviderId {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let lower = value.trim().to_lowercase();

        match lower.as_str() {
            "openweather" => Ok(ProviderId::OpenWeather),
            "weatherapi" => Ok(ProviderId::WeatherApi),
            "openmeteo" => Ok(ProviderId::OpenMeteo),
            "simulated" => Ok(ProviderId::Simulated),
            _ => Err(anyhow::anyhow!(
                "Unknown provider '{value}'. Supported providers: openweather, weatherapi, openmeteo, simulated."
            )),
        }
    }
}

/// Where a reading came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Live,
    Simulated,
}

/// A reading together with its origin.
#[derive(Debug, Clone)]
pub struct Observation {
    pub data: WeatherData,
    pub origin: Origin,
}

impl Observation {
    pub fn live(data: WeatherData) -> Self {
        Self { data, origin: Origin::Live }
    }

    pub fn simulated(data: WeatherData) -> Self {
        Self { data, origin: Origin::Simulated }
    }

    pub fn is_live(&self) -> bool {
        self.origin == Origin::Live
    }
}

/// What every provider falls back on: the simulator, and a resolver for naming bare coordinates.
#[derive(Debug, Clone)]
pub struct Fallback {
    simulator: Arc<ClimateSimulator>,
    resolver: Arc<dyn CityResolver>,
}

impl Fallback {
    pub fn new(simulator: Arc<ClimateSimulator>, resolver: Arc<dyn CityResolver>) -> Self {
        Self { simulator, resolver }
    }

    /// Name a coordinate pair, or label it with the unresolved placeholder.
    pub fn resolve(&self, latitude: f64, longitude: f64) -> Location {
        self.resolver
            .resolve(latitude, longitude)
            .unwrap_or_else(|| city::unresolved(latitude, longitude))
    }

    pub fn simulate(&self, location: &Location) -> Observation {
        Observation::simulated(self.simulator.generate(location))
    }

    /// The live call failed; log why and serve simulated data instead.
    pub fn after_failure(
        &self,
        provider: ProviderId,
        location: &Location,
        cause: &anyhow::Error,
    ) -> Observation {
        let reason = format!("{cause:#}");
        tracing::warn!(
            %provider,
            city = location.city(),
            error = %reason,
            "Live weather fetch failed; using simulated data"
        );
        self.simulate(location)
    }

    /// The provider has no usable credentials; serve simulated data without trying.
    pub fn unconfigured(&self, provider: ProviderId, location: &Location) -> Observation {
        tracing::debug!(
            %provider,
            city = location.city(),
            "API key not configured; using simulated data"
        );
        self.simulate(location)
    }
}

impl Default for Fallback {
    fn default() -> Self {
        Self::new(
            Arc::new(ClimateSimulator::new()),
            Arc::new(BoundingBoxResolver::sri_lanka()),
        )
    }
}

/// Source of current conditions.
///
/// Implementations never fail: a live provider that cannot produce a real
/// reading answers from its [`Fallback`] and marks the result
/// [`Origin::Simulated`]. Retrying is left to the caller's next interval.
#[async_trait]
pub trait WeatherProvider: Send + Sync + Debug {
    fn id(&self) -> ProviderId;

    fn fallback(&self) -> &Fallback;

    /// Current conditions at `location`, labelled with that location.
    async fn observe(&self, location: &Location) -> Observation;

    /// Current conditions at a bare coordinate pair. Out-of-range values are
    /// passed through as-is.
    async fn fetch(&self, latitude: f64, longitude: f64) -> WeatherData {
        let location = self.fallback().resolve(latitude, longitude);
        self.observe(&location).await.data
    }

    async fn fetch_for(&self, location: &Location) -> WeatherData {
        self.observe(location).await.data
    }

    /// Probe once; `false` when the answer had to be simulated.
    async fn is_available(&self) -> bool {
        let (latitude, longitude) = PROBE_COORDINATES;
        let location = self.fallback().resolve(latitude, longitude);
        self.observe(&location).await.is_live()
    }
}

/// HTTP client shared by the live providers.
///
/// Providers also set [`HTTP_TIMEOUT`] on every request, so the bound holds
/// even when the configured client cannot be built.
pub(crate) fn http_client() -> Client {
    Client::builder()
        .connect_timeout(HTTP_TIMEOUT)
        .timeout(HTTP_TIMEOUT)
        .user_agent(USER_AGENT)
        .build()
        .unwrap_or_else(|e| {
            tracing::error!(error = %e, "Could not build configured HTTP client; using defaults");
            Client::new()
        })
}

/// Drop empty keys and unreplaced template placeholders.
pub(crate) fn usable_api_key(api_key: Option<String>) -> Option<String> {
    api_key
        .map(|key| key.trim().to_string())
        .filter(|key| !key.is_empty())
        .filter(|key| !key.contains('{') && !key.eq_ignore_ascii_case("your_api_key"))
}

/// Keep the caller's location unless it was never resolved; then trust the API's naming.
pub(crate) fn label_location(
    requested: &Location,
    city: &str,
    country: &str,
    timezone: Option<&str>,
) -> Location {
    if city::is_placeholder(requested.city()) && !city.trim().is_empty() {
        Location::new(
            city,
            country,
            requested.latitude(),
            requested.longitude(),
            timezone.unwrap_or(requested.timezone()),
        )
    } else {
        requested.clone()
    }
}

pub(crate) fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    if body.len() > MAX {
        let cut = (0..=MAX).rev().find(|i| body.is_char_boundary(*i)).unwrap_or(0);
        format!("{}...", &body[..cut])
    } else {
        body.to_string()
    }
}

/// Construct a provider from config and explicit ProviderId.
///
/// A keyed provider without a key is still returned; it will answer from the
/// simulator and report itself unavailable.
pub fn provider_from_config(
    id: ProviderId,
    config: &Config,
    fallback: Fallback,
) -> Arc<dyn WeatherProvider> {
    let api_key = config.provider_api_key(id).map(str::to_owned);

    if id.requires_api_key() && usable_api_key(api_key.clone()).is_none() {
        tracing::warn!(
            provider = %id,
            "No API key configured; weather will be simulated"
        );
    }

    match id {
        ProviderId::OpenWeather => {
            Arc::new(OpenWeatherProvider::new(api_key).with_fallback(fallback))
        }
        ProviderId::WeatherApi => Arc::new(WeatherApiProvider::new(api_key).with_fallback(fallback)),
        ProviderId::OpenMeteo => Arc::new(OpenMeteoProvider::new().with_fallback(fallback)),
        ProviderId::Simulated => Arc::new(SimulatedProvider::new(fallback)),
    }
}

/// Construct the default provider from config, using `default_provider` field.
pub fn default_provider_from_config(config: &Config) -> anyhow::Result<Arc<dyn WeatherProvider>> {
    let id = config.default_provider_id()?;
    Ok(provider_from_config(id, config, Fallback::default()))
}
