use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// City used when the request carries no usable location.
pub const UNKNOWN_CITY: &str = "Unknown";

/// A named place on the globe.
///
/// Fields are private: a location is built once and replaced, never patched,
/// so its coordinates and its name always belong together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    city: String,
    country: String,
    latitude: f64,
    longitude: f64,
    timezone: String,
}

impl Location {
    pub fn new(
        city: impl Into<String>,
        country: impl Into<String>,
        latitude: f64,
        longitude: f64,
        timezone: impl Into<String>,
    ) -> Self {
        Self {
            city: city.into(),
            country: country.into(),
            latitude,
            longitude,
            timezone: timezone.into(),
        }
    }

    /// Location assumed for clients connecting from the local machine.
    pub fn colombo() -> Self {
        Self::new("Colombo", "Sri Lanka", 6.9271, 79.8612, "Asia/Colombo")
    }

    /// Placeholder for clients whose location could not be determined.
    pub fn unknown() -> Self {
        Self::new(UNKNOWN_CITY, UNKNOWN_CITY, 0.0, 0.0, "UTC")
    }

    pub fn city(&self) -> &str {
        &self.city
    }

    pub fn country(&self) -> &str {
        &self.country
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    pub fn timezone(&self) -> &str {
        &self.timezone
    }

    pub fn is_southern(&self) -> bool {
        self.latitude < 0.0
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}, {} ({:.4}, {:.4})",
            self.city, self.country, self.latitude, self.longitude
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Condition {
    Clear,
    Clouds,
    Rain,
    Drizzle,
    Thunderstorm,
    Snow,
    Mist,
    Fog,
    Unknown,
}

impl Condition {
    pub const fn all() -> &'static [Condition] {
        &[
            Condition::Clear,
            Condition::Clouds,
            Condition::Rain,
            Condition::Drizzle,
            Condition::Thunderstorm,
            Condition::Snow,
            Condition::Mist,
            Condition::Fog,
            Condition::Unknown,
        ]
    }

    /// Human-readable text sent alongside the condition.
    pub fn description(&self) -> &'static str {
        match self {
            Condition::Clear => "Clear sky",
            Condition::Clouds => "Cloudy",
            Condition::Rain => "Rain showers",
            Condition::Drizzle => "Light drizzle",
            Condition::Thunderstorm => "Thunderstorms",
            Condition::Snow => "Snow",
            Condition::Mist => "Misty",
            Condition::Fog => "Foggy",
            Condition::Unknown => "Fair weather",
        }
    }

    /// Map free-form provider text ("Patchy light rain", "Overcast", ...) onto a condition.
    ///
    /// Keywords are checked from most to least specific, so "thundery rain"
    /// is a thunderstorm and "light drizzle" is not rain.
    pub fn from_text(text: &str) -> Self {
        let lower = text.to_lowercase();
        let has = |needle: &str| lower.contains(needle);

        if has("thunder") || has("storm") {
            Condition::Thunderstorm
        } else if has("drizzle") {
            Condition::Drizzle
        } else if has("rain") || has("shower") {
            Condition::Rain
        } else if has("snow") || has("sleet") || has("blizzard") || has("ice") {
            Condition::Snow
        } else if has("fog") {
            Condition::Fog
        } else if has("mist") || has("haze") || has("smoke") || has("dust") {
            Condition::Mist
        } else if has("cloud") || has("overcast") {
            Condition::Clouds
        } else if has("sun") || has("clear") {
            Condition::Clear
        } else {
            Condition::Unknown
        }
    }

    /// Coarse condition from cloud cover alone.
    pub fn from_cloud_cover(cloud_cover: f64) -> Self {
        if cloud_cover < 20.0 {
            Condition::Clear
        } else {
            Condition::Clouds
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Raw numbers for a reading, before they are normalised into [`WeatherData`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurements {
    /// °C
    pub temperature: f64,
    /// %
    pub humidity: f64,
    /// km/h
    pub wind_speed: f64,
    /// hPa
    pub pressure: f64,
    /// °C
    pub feels_like: f64,
    pub uv_index: f64,
    /// km
    pub visibility: f64,
    /// %
    pub cloudiness: f64,
}

/// One reading for one location.
///
/// Built fresh on every generation or fetch. The constructor clamps every
/// bounded field (humidity and cloudiness to 0..=100, UV to 0..=11, wind and
/// visibility to >= 0) and rounds to one decimal place, so no instance can
/// violate those ranges whatever the upstream source reported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherData {
    location: Location,
    temperature: f64,
    humidity: f64,
    wind_speed: f64,
    pressure: f64,
    feels_like: f64,
    condition: Condition,
    description: String,
    uv_index: u8,
    visibility: f64,
    cloudiness: f64,
    timestamp: DateTime<Utc>,
}

impl WeatherData {
    pub fn new(
        location: Location,
        measurements: Measurements,
        condition: Condition,
        description: impl Into<String>,
    ) -> Self {
        let Measurements {
            temperature,
            humidity,
            wind_speed,
            pressure,
            feels_like,
            uv_index,
            visibility,
            cloudiness,
        } = measurements;

        Self {
            location,
            temperature: round1(temperature),
            humidity: round1(clamp_finite(humidity, 0.0, 100.0)),
            wind_speed: round1(clamp_finite(wind_speed, 0.0, f64::MAX)),
            pressure: round1(pressure),
            feels_like: round1(feels_like),
            condition,
            description: description.into(),
            uv_index: clamp_finite(uv_index.round(), 0.0, 11.0) as u8,
            visibility: round1(clamp_finite(visibility, 0.0, f64::MAX)),
            cloudiness: round1(clamp_finite(cloudiness, 0.0, 100.0)),
            timestamp: Utc::now(),
        }
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    pub fn humidity(&self) -> f64 {
        self.humidity
    }

    pub fn wind_speed(&self) -> f64 {
        self.wind_speed
    }

    pub fn pressure(&self) -> f64 {
        self.pressure
    }

    pub fn feels_like(&self) -> f64 {
        self.feels_like
    }

    pub fn condition(&self) -> Condition {
        self.condition
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn uv_index(&self) -> u8 {
        self.uv_index
    }

    pub fn visibility(&self) -> f64 {
        self.visibility
    }

    pub fn cloudiness(&self) -> f64 {
        self.cloudiness
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

impl fmt::Display for WeatherData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {:.1}°C, {:.1}% humidity, {:.1} km/h wind, {}",
            self.location, self.temperature, self.humidity, self.wind_speed, self.condition
        )
    }
}

pub(crate) fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn clamp_finite(value: f64, min: f64, max: f64) -> f64 {
    if value.is_nan() { min } else { value.clamp(min, max) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn measurements() -> Measurements {
        Measurements {
            temperature: 27.46,
            humidity: 80.04,
            wind_speed: 12.25,
            pressure: 1011.33,
            feels_like: 30.01,
            uv_index: 7.4,
            visibility: 10.0,
            cloudiness: 55.55,
        }
    }

    #[test]
    fn weather_data_rounds_to_one_decimal() {
        let data = WeatherData::new(Location::colombo(), measurements(), Condition::Clouds, "Cloudy");

        assert_eq!(data.temperature(), 27.5);
        assert_eq!(data.humidity(), 80.0);
        assert_eq!(data.pressure(), 1011.3);
        assert_eq!(data.uv_index(), 7);
        assert_eq!(data.cloudiness(), 55.6);
    }

    #[test]
    fn weather_data_clamps_out_of_range_values() {
        let raw = Measurements {
            humidity: 140.0,
            wind_speed: -3.0,
            uv_index: 14.2,
            visibility: -1.0,
            cloudiness: f64::NAN,
            ..measurements()
        };
        let data = WeatherData::new(Location::unknown(), raw, Condition::Unknown, "");

        assert_eq!(data.humidity(), 100.0);
        assert_eq!(data.wind_speed(), 0.0);
        assert_eq!(data.uv_index(), 11);
        assert_eq!(data.visibility(), 0.0);
        assert_eq!(data.cloudiness(), 0.0);
    }

    #[test]
    fn condition_from_text_prefers_specific_keywords() {
        assert_eq!(Condition::from_text("Thundery outbreaks possible"), Condition::Thunderstorm);
        assert_eq!(Condition::from_text("Light drizzle"), Condition::Drizzle);
        assert_eq!(Condition::from_text("Patchy rain nearby"), Condition::Rain);
        assert_eq!(Condition::from_text("Overcast"), Condition::Clouds);
        assert_eq!(Condition::from_text("Sunny"), Condition::Clear);
        assert_eq!(Condition::from_text("Freezing fog"), Condition::Fog);
        assert_eq!(Condition::from_text("Haze"), Condition::Mist);
        assert_eq!(Condition::from_text("Tornado"), Condition::Unknown);
    }

    #[test]
    fn every_condition_has_a_description() {
        for condition in Condition::all() {
            assert!(!condition.description().is_empty());
        }
    }

    #[test]
    fn location_serializes_fields_in_declaration_order() {
        let json = serde_json::to_string(&Location::colombo()).unwrap();
        let city = json.find("\"city\"").unwrap();
        let country = json.find("\"country\"").unwrap();
        let timezone = json.find("\"timezone\"").unwrap();
        assert!(city < country && country < timezone);
    }

    #[test]
    fn unknown_location_has_a_non_empty_city() {
        let location = Location::unknown();
        assert_eq!(location.city(), UNKNOWN_CITY);
        assert!(!location.city().is_empty());
    }
}
