use std::fmt::Debug;

use crate::model::{Location, UNKNOWN_CITY};

/// City used for coordinates no resolver recognised.
pub const UNRESOLVED_CITY: &str = "Unknown City";

/// Turns a coordinate pair into a named [`Location`].
pub trait CityResolver: Send + Sync + Debug {
    fn resolve(&self, latitude: f64, longitude: f64) -> Option<Location>;
}

pub fn unresolved(latitude: f64, longitude: f64) -> Location {
    Location::new(UNRESOLVED_CITY, UNKNOWN_CITY, latitude, longitude, "UTC")
}

/// True for either placeholder city name.
pub fn is_placeholder(city: &str) -> bool {
    city == UNRESOLVED_CITY || city == UNKNOWN_CITY || city.trim().is_empty()
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoundingBox {
    pub city: String,
    pub country: String,
    pub timezone: String,
    pub latitude: (f64, f64),
    pub longitude: (f64, f64),
}

impl BoundingBox {
    pub fn new(
        city: &str,
        country: &str,
        timezone: &str,
        latitude: (f64, f64),
        longitude: (f64, f64),
    ) -> Self {
        Self {
            city: city.to_string(),
            country: country.to_string(),
            timezone: timezone.to_string(),
            latitude,
            longitude,
        }
    }

    pub fn contains(&self, latitude: f64, longitude: f64) -> bool {
        (self.latitude.0..=self.latitude.1).contains(&latitude)
            && (self.longitude.0..=self.longitude.1).contains(&longitude)
    }
}

/// Table lookup; the first box containing the point names it.
#[derive(Debug, Clone, Default)]
pub struct BoundingBoxResolver {
    boxes: Vec<BoundingBox>,
}

impl BoundingBoxResolver {
    pub fn new(boxes: Vec<BoundingBox>) -> Self {
        Self { boxes }
    }

    /// A handful of Sri Lankan cities.
    pub fn sri_lanka() -> Self {
        let tz = "Asia/Colombo";
        Self::new(vec![
            BoundingBox::new("Colombo", "Sri Lanka", tz, (6.8, 7.0), (79.8, 80.0)),
            BoundingBox::new("Kandy", "Sri Lanka", tz, (7.2, 7.4), (80.5, 80.8)),
            BoundingBox::new("Galle", "Sri Lanka", tz, (6.0, 6.1), (80.1, 80.3)),
            BoundingBox::new("Jaffna", "Sri Lanka", tz, (9.6, 9.7), (80.0, 80.1)),
            BoundingBox::new("Nuwara Eliya", "Sri Lanka", tz, (6.9, 7.0), (80.7, 80.9)),
        ])
    }
}

impl CityResolver for BoundingBoxResolver {
    fn resolve(&self, latitude: f64, longitude: f64) -> Option<Location> {
        self.boxes
            .iter()
            .find(|b| b.contains(latitude, longitude))
            .map(|b| Location::new(&b.city, &b.country, latitude, longitude, &b.timezone))
    }
}
