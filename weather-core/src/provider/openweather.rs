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
        truncate_body, usable_api_key,
    },
    simulator::{solar_hour, uv_index},
};

use super::WeatherProvider;

#[derive(Debug, Clone)]
pub struct OpenWeatherProvider {
    api_key: Option<String>,
    base_url: String,
    http: Client,
    timeout: Duration,
    fallback: Fallback,
}

impl OpenWeatherProvider {
    pub const DEFAULT_BASE_URL: &'static str = "https://api.openweathermap.org/data/2.5/weather";

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
        let res = self
            .http
            .get(&self.base_url)
            .timeout(self.timeout)
            .query(&[
                ("lat", format!("{:.4}", location.latitude())),
                ("lon", format!("{:.4}", location.longitude())),
                ("appid", api_key.to_string()),
                ("units", "metric".to_string()),
            ])
            .send()
            .await
            .context("Failed to send request to OpenWeather (current weather)")?;

        let status = res.status();
        let body = res
            .text()
            .await
            .context("Failed to read OpenWeather current response body")?;

        if !status.is_success() {
            let hint = match status.as_u16() {
                401 => " (invalid API key)",
                429 => " (rate limit exceeded)",
                _ => "",
            };
            return Err(anyhow!(
                "OpenWeather current request failed with status {}{}: {}",
                status,
                hint,
                truncate_body(&body),
            ));
        }

        let parsed: OwCurrentResponse =
            serde_json::from_str(&body).context("Failed to parse OpenWeather current JSON")?;

        Ok(parsed.into_weather(location))
    }
}

#[derive(Debug, Deserialize)]
struct OwMain {
    temp: f64,
    feels_like: Option<f64>,
    humidity: f64,
    pressure: f64,
}

#[derive(Debug, Deserialize)]
struct OwWeather {
    main: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct OwWind {
    /// m/s with metric units
    speed: f64,
}

#[derive(Debug, Deserialize)]
struct OwClouds {
    all: f64,
}

#[derive(Debug, Default, Deserialize)]
struct OwSys {
    country: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OwCurrentResponse {
    name: String,
    #[serde(default)]
    sys: OwSys,
    main: OwMain,
    weather: Vec<OwWeather>,
    wind: OwWind,
    clouds: OwClouds,
    /// metres
    visibility: Option<f64>,
}

impl OwCurrentResponse {
    fn into_weather(self, requested: &Location) -> WeatherData {
        let country = self.sys.country.as_deref().unwrap_or("Unknown");
        let location = label_location(requested, &self.name, country, None);

        let (condition, description) = match self.weather.first() {
            Some(w) => (Condition::from_text(&w.main), w.description.clone()),
            None => (Condition::Unknown, Condition::Unknown.description().to_string()),
        };

        let hour = solar_hour(location.longitude(), Utc::now());

        let measurements = Measurements {
            temperature: self.main.temp,
            humidity: self.main.humidity,
            wind_speed: self.wind.speed * 3.6,
            pressure: self.main.pressure,
            feels_like: self.main.feels_like.unwrap_or(self.main.temp),
            uv_index: uv_index(location.latitude(), hour),
            visibility: self.visibility.map(|m| m / 1000.0).unwrap_or(10.0),
            cloudiness: self.clouds.all,
        };

        WeatherData::new(location, measurements, condition, description)
    }
}

#[async_trait]
impl WeatherProvider for OpenWeatherProvider {
    fn id(&self) -> ProviderId {
        ProviderId::OpenWeather
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
