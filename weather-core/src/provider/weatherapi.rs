use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::{
    model::{Condition, Location, Measurements, WeatherData},
    provider::{
        Fallback, HTTP_TIMEOUT, Observation, ProviderId, http_client, label_location,
        truncate_body, usable_api_key,
    },
    simulator::{solar_hour, uv_index},
};

use super::WeatherProvider;

#[derive(Debug, Clone)]
pub struct WeatherApiProvider {
    api_key: Option<String>,
    base_url: String,
    http: Client,
    timeout: Duration,
    fallback: Fallback,
}

impl WeatherApiProvider {
    pub const DEFAULT_BASE_URL: &'static str = "http://api.weatherapi.com/v1/current.json";

    pub fn new(api_key: Option<String>) -> Self {
        Self {
            api_key: usable_api_key(api_key),
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

    async fn fetch_current(&self, api_key: &str, location: &Location) -> Result<WeatherData> {
        let q = format!("{:.4},{:.4}", location.latitude(), location.longitude());

        let res = self
            .http
            .get(&self.base_url)
            .timeout(self.timeout)
            .query(&[("key", api_key), ("q", q.as_str())])
            .send()
            .await
            .context("Failed to send request to WeatherAPI.com (current)")?;

        let status = res.status();
        let body = res.text().await.context("Failed to read WeatherAPI current response body")?;

        if !status.is_success() {
            return Err(anyhow::anyhow!(
                "WeatherAPI current request failed with status {}: {}",
                status,
                truncate_body(&body),
            ));
        }

        let parsed: WaResponse =
            serde_json::from_str(&body).context("Failed to parse WeatherAPI current JSON")?;

        Ok(parsed.into_weather(location))
    }
}

#[derive(Debug, Deserialize)]
struct WaLocation {
    name: String,
    country: String,
    tz_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WaCondition {
    text: String,
}

#[derive(Debug, Deserialize)]
struct WaCurrent {
    temp_c: f64,
    feelslike_c: f64,
    humidity: f64,
    pressure_mb: f64,
    wind_kph: f64,
    cloud: f64,
    uv: Option<f64>,
    vis_km: f64,
    condition: WaCondition,
}

#[derive(Debug, Deserialize)]
struct WaResponse {
    location: WaLocation,
    current: WaCurrent,
}

impl WaResponse {
    fn into_weather(self, requested: &Location) -> WeatherData {
        let location = label_location(
            requested,
            &self.location.name,
            &self.location.country,
            self.location.tz_id.as_deref(),
        );

        let current = self.current;
        let uv = current.uv.unwrap_or_else(|| {
            uv_index(location.latitude(), solar_hour(location.longitude(), Utc::now()))
        });

        let measurements = Measurements {
            temperature: current.temp_c,
            humidity: current.humidity,
            wind_speed: current.wind_kph,
            pressure: current.pressure_mb,
            feels_like: current.feelslike_c,
            uv_index: uv,
            visibility: current.vis_km,
            cloudiness: current.cloud,
        };

        let condition = Condition::from_text(&current.condition.text);
        WeatherData::new(location, measurements, condition, current.condition.text)
    }
}

#[async_trait]
impl WeatherProvider for WeatherApiProvider {
    fn id(&self) -> ProviderId {
        ProviderId::WeatherApi
    }

    fn fallback(&self) -> &Fallback {
        &self.fallback
    }

    async fn observe(&self, location: &Location) -> Observation {
        let Some(api_key) = self.api_key.as_deref() else {
            return self.fallback.unconfigured(self.id(), location);
        };

        match self.fetch_current(api_key, location).await {
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
    use crate::provider::{Origin, city};
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sample_body() -> serde_json::Value {
        json!({
            "location": {
                "name": "London", "country": "United Kingdom",
                "lat": 51.52, "lon": -0.11, "tz_id": "Europe/London"
            },
            "current": {
                "temp_c": 11.0, "feelslike_c": 9.4, "humidity": 82, "pressure_mb": 1012.0,
                "wind_kph": 14.4, "cloud": 75, "uv": 2.0, "vis_km": 10.0,
                "condition": { "text": "Patchy light drizzle" }
            }
        })
    }

    #[tokio::test]
    async fn names_unresolved_coordinates_from_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/current.json"))
            .and(query_param("key", "KEY"))
            .respond_with(ResponseTemplate::new(200).set_body_json(sample_body()))
            .mount(&server)
            .await;

        let provider = WeatherApiProvider::new(Some("KEY".into()))
            .with_base_url(format!("{}/v1/current.json", server.uri()));

        let observation = provider.observe(&city::unresolved(51.52, -0.11)).await;

        assert_eq!(observation.origin, Origin::Live);
        let data = observation.data;
        assert_eq!(data.location().city(), "London");
        assert_eq!(data.location().timezone(), "Europe/London");
        assert_eq!(data.condition(), Condition::Drizzle);
        assert_eq!(data.description(), "Patchy light drizzle");
        assert_eq!(data.uv_index(), 2);
    }

    #[tokio::test]
    async fn server_error_falls_back_to_simulator() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let provider = WeatherApiProvider::new(Some("KEY".into()))
            .with_base_url(format!("{}/v1/current.json", server.uri()));

        let data = provider.fetch(6.9271, 79.8612).await;
        assert_eq!(data.location().city(), "Colombo");
        assert!(!provider.is_available().await);
    }
}
