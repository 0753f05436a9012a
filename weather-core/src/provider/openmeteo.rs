use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::{
    model::{Condition, Location, Measurements, WeatherData},
    provider::{
        Fallback, HTTP_TIMEOUT, Observation, ProviderId, http_client, label_location,
        truncate_body,
    },
    simulator::{solar_hour, uv_index},
};

use super::WeatherProvider;

const CURRENT_FIELDS: &str = "temperature_2m,relative_humidity_2m,apparent_temperature,\
pressure_msl,wind_speed_10m,cloud_cover,visibility,weather_code";

/// Open-Meteo needs no API key, so it is the one live provider that works out of the box.
#[derive(Debug, Clone)]
pub struct OpenMeteoProvider {
    base_url: String,
    http: Client,
    timeout: Duration,
    fallback: Fallback,
}

impl OpenMeteoProvider {
    pub const DEFAULT_BASE_URL: &'static str = "https://api.open-meteo.com/v1/forecast";

    pub fn new() -> Self {
        Self {
            base_url: Self::DEFAULT_BASE_URL.to_string(),
            http: http_client(),
            timeout: HTTP_TIMEOUT,
            fallback: Fallback::default(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Bound on a single request, connect through last body byte.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_fallback(mut self, fallback: Fallback) -> Self {
        self.fallback = fallback;
        self
    }

    async fn fetch_current(&self, location: &Location) -> Result<WeatherData> {
        let res = self
            .http
            .get(&self.base_url)
            .timeout(self.timeout)
            .query(&[
                ("latitude", format!("{:.4}", location.latitude())),
                ("longitude", format!("{:.4}", location.longitude())),
                ("current", CURRENT_FIELDS.to_string()),
                ("wind_speed_unit", "kmh".to_string()),
                ("timezone", "auto".to_string()),
            ])
            .send()
            .await
            .context("Failed to send request to Open-Meteo")?;

        let status = res.status();
        let body = res.text().await.context("Failed to read Open-Meteo response body")?;

        if !status.is_success() {
            return Err(anyhow!(
                "Open-Meteo request failed with status {}: {}",
                status,
                truncate_body(&body),
            ));
        }

        let parsed: OmResponse =
            serde_json::from_str(&body).context("Failed to parse Open-Meteo JSON")?;

        Ok(parsed.into_weather(location))
    }
}

impl Default for OpenMeteoProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct OmCurrent {
    temperature_2m: f64,
    relative_humidity_2m: f64,
    apparent_temperature: f64,
    pressure_msl: f64,
    wind_speed_10m: f64,
    cloud_cover: f64,
    /// metres
    visibility: Option<f64>,
    weather_code: Option<u16>,
}

#[derive(Debug, Deserialize)]
struct OmResponse {
    timezone: Option<String>,
    current: OmCurrent,
}

impl OmResponse {
    fn into_weather(self, requested: &Location) -> WeatherData {
        // Open-Meteo does not name places; only the timezone can be learned here.
        let location = label_location(
            requested,
            requested.city(),
            requested.country(),
            self.timezone.as_deref(),
        );

        let current = self.current;
        let condition = current
            .weather_code
            .map(condition_from_wmo)
            .unwrap_or_else(|| Condition::from_cloud_cover(current.cloud_cover));

        let hour = solar_hour(location.longitude(), Utc::now());

        let measurements = Measurements {
            temperature: current.temperature_2m,
            humidity: current.relative_humidity_2m,
            wind_speed: current.wind_speed_10m,
            pressure: current.pressure_msl,
            feels_like: current.apparent_temperature,
            uv_index: uv_index(location.latitude(), hour),
            visibility: current.visibility.map(|m| m / 1000.0).unwrap_or(10.0),
            cloudiness: current.cloud_cover,
        };

        WeatherData::new(location, measurements, condition, condition.description())
    }
}

/// WMO weather interpretation codes as used by Open-Meteo.
fn condition_from_wmo(code: u16) -> Condition {
    match code {
        0 | 1 => Condition::Clear,
        2 | 3 => Condition::Clouds,
        45 | 48 => Condition::Fog,
        51..=57 => Condition::Drizzle,
        61..=67 | 80..=82 => Condition::Rain,
        71..=77 | 85 | 86 => Condition::Snow,
        95..=99 => Condition::Thunderstorm,
        _ => Condition::Unknown,
    }
}

#[async_trait]
impl WeatherProvider for OpenMeteoProvider {
    fn id(&self) -> ProviderId {
        ProviderId::OpenMeteo
    }

    fn fallback(&self) -> &Fallback {
        &self.fallback
    }

    async fn observe(&self, location: &Location) -> Observation {
        match self.fetch_current(location).await {
            Ok(data) => {
                tracing::info!(
                    provider = %self.id(),
                    city = data.location().city(),
                    "Fetched live weather"
                );
                Observation::live(data)
            }
            Err(e) => self.fallback.after_failure(self.id(), location, &e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Origin;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn wmo_codes_map_to_conditions() {
        assert_eq!(condition_from_wmo(0), Condition::Clear);
        assert_eq!(condition_from_wmo(3), Condition::Clouds);
        assert_eq!(condition_from_wmo(48), Condition::Fog);
        assert_eq!(condition_from_wmo(53), Condition::Drizzle);
        assert_eq!(condition_from_wmo(81), Condition::Rain);
        assert_eq!(condition_from_wmo(75), Condition::Snow);
        assert_eq!(condition_from_wmo(96), Condition::Thunderstorm);
        assert_eq!(condition_from_wmo(42), Condition::Unknown);
    }

    #[tokio::test]
    async fn parses_current_block() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/forecast"))
            .and(query_param("timezone", "auto"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "latitude": 6.93, "longitude": 79.86, "timezone": "Asia/Colombo",
                "current": {
                    "temperature_2m": 29.3, "relative_humidity_2m": 79,
                    "apparent_temperature": 34.2, "pressure_msl": 1010.4,
                    "wind_speed_10m": 11.5, "cloud_cover": 64,
                    "visibility": 24140.0, "weather_code": 2
                }
            })))
            .mount(&server)
            .await;

        let provider =
            OpenMeteoProvider::new().with_base_url(format!("{}/v1/forecast", server.uri()));
        let observation = provider.observe(&Location::colombo()).await;

        assert_eq!(observation.origin, Origin::Live);
        let data = observation.data;
        assert_eq!(data.location().city(), "Colombo");
        assert_eq!(data.condition(), Condition::Clouds);
        assert_eq!(data.visibility(), 24.1);
        assert_eq!(data.feels_like(), 34.2);
    }

    #[tokio::test]
    async fn missing_current_block_falls_back() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "error": true })))
            .mount(&server)
            .await;

        let provider =
            OpenMeteoProvider::new().with_base_url(format!("{}/v1/forecast", server.uri()));

        assert_eq!(provider.observe(&Location::colombo()).await.origin, Origin::Simulated);
    }
}
