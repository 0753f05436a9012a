//! Plausible weather for places the live providers cannot (or may not) reach.
//!
//! The output is a function of the location's climate zone, the local hour and
//! the month, plus random draws from the simulator's generator. It is not a
//! forecast; it only has to look like weather for that part of the world at
//! that time of day and year.

use chrono::{DateTime, Datelike, Timelike, Utc};
use rand::{Rng, SeedableRng, rngs::StdRng};
use std::f64::consts::PI;
use std::sync::{Mutex, PoisonError};

use crate::model::{Condition, Location, Measurements, WeatherData};

/// Countries between 23.5° and 35° treated as desert rather than humid subtropics.
const ARID_COUNTRIES: &[&str] = &[
    "afghanistan",
    "algeria",
    "chad",
    "egypt",
    "iran",
    "iraq",
    "jordan",
    "kuwait",
    "libya",
    "mali",
    "mauritania",
    "morocco",
    "niger",
    "oman",
    "pakistan",
    "qatar",
    "saudi arabia",
    "sudan",
    "united arab emirates",
    "western sahara",
];

/// Cities exposed to sea breezes.
const COASTAL_CITIES: &[&str] = &[
    "colombo",
    "galle",
    "jaffna",
    "trincomalee",
    "chennai",
    "mumbai",
    "singapore",
    "sydney",
    "cape town",
    "lisbon",
    "san francisco",
    "miami",
    "rio de janeiro",
    "honolulu",
    "reykjavik",
];

/// Elevation in metres for the cities whose pressure is noticeably lower.
const ALTITUDES_M: &[(&str, f64)] = &[
    ("nuwara eliya", 1868.0),
    ("kandy", 500.0),
    ("badulla", 680.0),
    ("denver", 1609.0),
    ("mexico city", 2240.0),
    ("bogota", 2640.0),
    ("quito", 2850.0),
    ("la paz", 3640.0),
    ("addis ababa", 2355.0),
    ("nairobi", 1795.0),
    ("kathmandu", 1400.0),
    ("johannesburg", 1753.0),
];

/// Inclusive numeric band.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Span {
    pub min: f64,
    pub max: f64,
}

impl Span {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        if self.max <= self.min {
            self.min
        } else {
            rng.gen_range(self.min..=self.max)
        }
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Value ranges a zone's readings are drawn from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoneRanges {
    pub temperature: Span,
    pub humidity: Span,
    pub wind: Span,
    pub pressure: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClimateZone {
    Tropical,
    Temperate,
    Continental,
    Arid,
    Polar,
}

impl ClimateZone {
    pub const fn all() -> &'static [ClimateZone] {
        &[
            ClimateZone::Tropical,
            ClimateZone::Temperate,
            ClimateZone::Continental,
            ClimateZone::Arid,
            ClimateZone::Polar,
        ]
    }

    /// Bucket a location by absolute latitude; the 23.5°..35° band is split by country.
    pub fn resolve(latitude: f64, country: &str) -> Self {
        let latitude = latitude.abs();

        if latitude < 23.5 {
            ClimateZone::Tropical
        } else if latitude < 35.0 {
            if is_arid_country(country) {
                ClimateZone::Arid
            } else {
                ClimateZone::Tropical
            }
        } else if latitude < 50.0 {
            ClimateZone::Temperate
        } else if latitude < 60.0 {
            ClimateZone::Continental
        } else {
            ClimateZone::Polar
        }
    }

    pub fn for_location(location: &Location) -> Self {
        Self::resolve(location.latitude(), location.country())
    }

    pub const fn ranges(&self) -> ZoneRanges {
        match self {
            ClimateZone::Tropical => ZoneRanges {
                temperature: Span::new(24.0, 32.0),
                humidity: Span::new(65.0, 95.0),
                wind: Span::new(5.0, 20.0),
                pressure: Span::new(1005.0, 1015.0),
            },
            ClimateZone::Temperate => ZoneRanges {
                temperature: Span::new(8.0, 22.0),
                humidity: Span::new(50.0, 90.0),
                wind: Span::new(8.0, 25.0),
                pressure: Span::new(1008.0, 1022.0),
            },
            ClimateZone::Continental => ZoneRanges {
                temperature: Span::new(-5.0, 18.0),
                humidity: Span::new(45.0, 85.0),
                wind: Span::new(10.0, 30.0),
                pressure: Span::new(1010.0, 1028.0),
            },
            ClimateZone::Arid => ZoneRanges {
                temperature: Span::new(22.0, 40.0),
                humidity: Span::new(10.0, 40.0),
                wind: Span::new(10.0, 30.0),
                pressure: Span::new(1005.0, 1015.0),
            },
            ClimateZone::Polar => ZoneRanges {
                temperature: Span::new(-30.0, 0.0),
                humidity: Span::new(60.0, 90.0),
                wind: Span::new(15.0, 40.0),
                pressure: Span::new(990.0, 1015.0),
            },
        }
    }

    /// Walk the zone's rule ladder; the first matching rule wins, otherwise clear sky.
    pub fn condition(&self, humidity: f64, temperature: f64, roll: f64) -> Condition {
        self.ladder()
            .iter()
            .find(|rule| rule.matches(humidity, temperature, roll))
            .map(|rule| rule.condition)
            .unwrap_or(Condition::Clear)
    }

    fn ladder(&self) -> &'static [Rule] {
        match self {
            ClimateZone::Tropical => TROPICAL_LADDER,
            ClimateZone::Temperate => TEMPERATE_LADDER,
            ClimateZone::Continental => CONTINENTAL_LADDER,
            ClimateZone::Arid => ARID_LADDER,
            ClimateZone::Polar => POLAR_LADDER,
        }
    }
}

/// `humidity > humidity_above && roll < roll_below && temperature < temperature_below`
#[derive(Debug, Clone, Copy)]
struct Rule {
    humidity_above: f64,
    roll_below: f64,
    temperature_below: f64,
    condition: Condition,
}

impl Rule {
    const fn new(humidity_above: f64, roll_below: f64, condition: Condition) -> Self {
        Self {
            humidity_above,
            roll_below,
            temperature_below: f64::INFINITY,
            condition,
        }
    }

    const fn freezing(humidity_above: f64, roll_below: f64, temperature_below: f64) -> Self {
        Self {
            humidity_above,
            roll_below,
            temperature_below,
            condition: Condition::Snow,
        }
    }

    fn matches(&self, humidity: f64, temperature: f64, roll: f64) -> bool {
        humidity > self.humidity_above
            && roll < self.roll_below
            && temperature < self.temperature_below
    }
}

const TROPICAL_LADDER: &[Rule] = &[
    Rule::new(85.0, 0.3, Condition::Thunderstorm),
    Rule::new(80.0, 0.5, Condition::Rain),
    Rule::new(75.0, 0.7, Condition::Drizzle),
    Rule::new(70.0, 1.0, Condition::Clouds),
];

const TEMPERATE_LADDER: &[Rule] = &[
    Rule::freezing(70.0, 0.5, 0.0),
    Rule::new(80.0, 0.4, Condition::Rain),
    Rule::new(75.0, 0.55, Condition::Drizzle),
    Rule::new(85.0, 0.7, Condition::Fog),
    Rule::new(70.0, 0.2, Condition::Mist),
    Rule::new(60.0, 1.0, Condition::Clouds),
];

const CONTINENTAL_LADDER: &[Rule] = &[
    Rule::freezing(65.0, 0.6, 0.0),
    Rule::new(80.0, 0.4, Condition::Rain),
    Rule::new(75.0, 0.5, Condition::Drizzle),
    Rule::new(80.0, 0.65, Condition::Mist),
    Rule::new(60.0, 1.0, Condition::Clouds),
];

const ARID_LADDER: &[Rule] = &[
    Rule::new(35.0, 0.15, Condition::Rain),
    Rule::new(25.0, 0.2, Condition::Mist),
    Rule::new(20.0, 0.5, Condition::Clouds),
];

const POLAR_LADDER: &[Rule] = &[
    Rule::freezing(70.0, 0.6, 2.0),
    Rule::new(80.0, 0.75, Condition::Fog),
    Rule::new(65.0, 1.0, Condition::Clouds),
];

fn is_arid_country(country: &str) -> bool {
    let country = country.trim().to_lowercase();
    ARID_COUNTRIES.contains(&country.as_str())
}

fn is_coastal(city: &str) -> bool {
    let city = city.trim().to_lowercase();
    COASTAL_CITIES.contains(&city.as_str())
}

fn altitude_m(city: &str) -> f64 {
    let city = city.trim().to_lowercase();
    ALTITUDES_M
        .iter()
        .find(|(name, _)| *name == city)
        .map(|(_, metres)| *metres)
        .unwrap_or(0.0)
}

/// Peaks mid-afternoon, bottoms out before dawn. Bounded by ±8 °C.
pub fn diurnal_temperature(hour: u32) -> f64 {
    ((f64::from(hour) - 6.0) * PI / 12.0).sin() * 8.0
}

/// Shifted by half a year south of the equator. Bounded by ±10 °C.
pub fn seasonal_temperature(month: u32, southern: bool) -> f64 {
    let shift = if southern { 6.0 } else { 0.0 };
    ((f64::from(month) - shift) * PI / 6.0).sin() * 10.0
}

/// `round(latEffect * timeEffect * 11)`, strongest at the equator around noon.
pub fn uv_index(latitude: f64, hour: u32) -> f64 {
    let lat_effect = (1.0 - latitude.abs() / 90.0).max(0.0);
    let time_effect = (1.0 - (f64::from(hour) - 12.0).abs() / 6.0).max(0.0);
    (lat_effect * time_effect * 11.0).round().clamp(0.0, 11.0)
}

/// Heat index above 27 °C, wind chill below 10 °C in a breeze, otherwise the air temperature.
pub fn feels_like(temperature: f64, humidity: f64, wind_kmh: f64) -> f64 {
    if temperature > 27.0 {
        heat_index(temperature, humidity)
    } else if temperature < 10.0 && wind_kmh > 5.0 {
        wind_chill(temperature, wind_kmh)
    } else {
        temperature
    }
}

// Rothfusz regression, evaluated in Fahrenheit.
fn heat_index(temperature: f64, humidity: f64) -> f64 {
    let t = temperature * 9.0 / 5.0 + 32.0;
    let r = humidity;
    let hi = -42.379 + 2.049_015_23 * t + 10.143_331_27 * r
        - 0.224_755_41 * t * r
        - 0.006_837_83 * t * t
        - 0.054_817_17 * r * r
        + 0.001_228_74 * t * t * r
        + 0.000_852_82 * t * r * r
        - 0.000_001_99 * t * t * r * r;
    (hi - 32.0) * 5.0 / 9.0
}

fn wind_chill(temperature: f64, wind_kmh: f64) -> f64 {
    let v = wind_kmh.powf(0.16);
    13.12 + 0.6215 * temperature - 11.37 * v + 0.3965 * temperature * v
}

fn visibility_band(condition: Condition) -> Span {
    match condition {
        Condition::Clear => Span::new(10.0, 20.0),
        Condition::Clouds => Span::new(8.0, 15.0),
        Condition::Rain => Span::new(3.0, 8.0),
        Condition::Drizzle => Span::new(4.0, 10.0),
        Condition::Thunderstorm => Span::new(1.0, 5.0),
        Condition::Snow => Span::new(0.5, 4.0),
        Condition::Mist => Span::new(1.0, 4.0),
        Condition::Fog => Span::new(0.1, 1.0),
        Condition::Unknown => Span::new(5.0, 10.0),
    }
}

fn cloudiness_band(condition: Condition) -> Span {
    match condition {
        Condition::Clear => Span::new(0.0, 20.0),
        Condition::Clouds => Span::new(40.0, 90.0),
        Condition::Rain => Span::new(70.0, 100.0),
        Condition::Drizzle => Span::new(60.0, 90.0),
        Condition::Thunderstorm => Span::new(85.0, 100.0),
        Condition::Snow => Span::new(70.0, 100.0),
        Condition::Mist => Span::new(40.0, 80.0),
        Condition::Fog => Span::new(80.0, 100.0),
        Condition::Unknown => Span::new(20.0, 60.0),
    }
}

/// Local solar hour (0..24) at `longitude`, derived from UTC.
pub fn solar_hour(longitude: f64, now: DateTime<Utc>) -> u32 {
    let utc_hours = f64::from(now.hour()) + f64::from(now.minute()) / 60.0;
    ((utc_hours + longitude / 15.0).rem_euclid(24.0).floor() as u32).min(23)
}

/// Generate one reading for `location` at local `hour` (0..24) of `month` (1..=12).
pub fn simulate<R: Rng + ?Sized>(
    location: &Location,
    hour: u32,
    month: u32,
    rng: &mut R,
) -> WeatherData {
    let zone = ClimateZone::for_location(location);
    let ranges = zone.ranges();
    let h = f64::from(hour);

    let temperature = ranges.temperature.sample(rng)
        + diurnal_temperature(hour)
        + seasonal_temperature(month, location.is_southern());

    let humidity = ranges.humidity.clamp(
        ranges.humidity.sample(rng) - (35.0 - temperature) * 0.5
            + ((h - 6.0) * PI / 12.0).cos() * 10.0,
    );

    let coastal_breeze = if is_coastal(location.city()) { 5.0 } else { 0.0 };
    let wind_speed =
        (ranges.wind.sample(rng) + ((h - 12.0) * PI / 12.0).sin() * 5.0 + coastal_breeze).max(0.0);

    let pressure = ranges.pressure.sample(rng) - altitude_m(location.city()) * 0.1
        + rng.gen_range(-1.0..=1.0);

    let roll: f64 = rng.gen_range(0.0..1.0);
    let condition = zone.condition(humidity, temperature, roll);

    let measurements = Measurements {
        temperature,
        humidity,
        wind_speed,
        pressure,
        feels_like: feels_like(temperature, humidity, wind_speed),
        uv_index: uv_index(location.latitude(), hour),
        visibility: visibility_band(condition).sample(rng),
        cloudiness: cloudiness_band(condition).sample(rng),
    };

    WeatherData::new(
        location.clone(),
        measurements,
        condition,
        condition.description(),
    )
}

/// Shared simulator handle; the generator is the only state it keeps.
#[derive(Debug)]
pub struct ClimateSimulator {
    rng: Mutex<StdRng>,
}

impl ClimateSimulator {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Reproducible sequence of readings.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Reading for the current local solar hour and month at `location`.
    pub fn generate(&self, location: &Location) -> WeatherData {
        let now = Utc::now();
        self.generate_at(location, solar_hour(location.longitude(), now), now.month())
    }

    pub fn generate_at(&self, location: &Location, hour: u32, month: u32) -> WeatherData {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        simulate(location, hour, month, &mut *rng)
    }
}

impl Default for ClimateSimulator {
    fn default() -> Self {
        Self::new()
    }
}

/// Occasional jump of a session to another city, decided outside the simulator.
#[derive(Debug, Clone)]
pub struct LocationDrift {
    probability: f64,
    cities: Vec<Location>,
}

impl LocationDrift {
    pub fn new(probability: f64, cities: Vec<Location>) -> Self {
        Self {
            probability: probability.clamp(0.0, 1.0),
            cities,
        }
    }

    /// Returns the city to move to, or `None` to stay put.
    pub fn next<R: Rng + ?Sized>(&self, current: &Location, rng: &mut R) -> Option<Location> {
        if !rng.gen_bool(self.probability) {
            return None;
        }

        let candidates: Vec<&Location> = self
            .cities
            .iter()
            .filter(|city| city.city() != current.city())
            .collect();

        if candidates.is_empty() {
            return None;
        }

        let pick = rng.gen_range(0..candidates.len());
        Some(candidates[pick].clone())
    }
}

impl Default for LocationDrift {
    fn default() -> Self {
        Self::new(
            0.05,
            vec![
                Location::colombo(),
                Location::new("Kandy", "Sri Lanka", 7.2906, 80.6337, "Asia/Colombo"),
                Location::new("Galle", "Sri Lanka", 6.0329, 80.2168, "Asia/Colombo"),
                Location::new("Jaffna", "Sri Lanka", 9.6615, 80.0255, "Asia/Colombo"),
                Location::new("Nuwara Eliya", "Sri Lanka", 6.9497, 80.7891, "Asia/Colombo"),
            ],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_locations() -> Vec<Location> {
        vec![
            Location::colombo(),
            Location::new("Nuwara Eliya", "Sri Lanka", 6.9497, 80.7891, "Asia/Colombo"),
            Location::new("Cairo", "Egypt", 30.0444, 31.2357, "Africa/Cairo"),
            Location::new("Shanghai", "China", 31.2304, 121.4737, "Asia/Shanghai"),
            Location::new("Paris", "France", 48.8566, 2.3522, "Europe/Paris"),
            Location::new("Moscow", "Russia", 55.7558, 37.6173, "Europe/Moscow"),
            Location::new("Tromso", "Norway", 69.6492, 18.9553, "Europe/Oslo"),
            Location::new("Sydney", "Australia", -33.8688, 151.2093, "Australia/Sydney"),
            Location::new("Ushuaia", "Argentina", -54.8019, -68.3030, "America/Argentina/Ushuaia"),
            Location::unknown(),
        ]
    }

    #[test]
    fn zone_thresholds_follow_absolute_latitude() {
        assert_eq!(ClimateZone::resolve(6.9, "Sri Lanka"), ClimateZone::Tropical);
        assert_eq!(ClimateZone::resolve(-23.0, "Brazil"), ClimateZone::Tropical);
        assert_eq!(ClimateZone::resolve(30.0, "Egypt"), ClimateZone::Arid);
        assert_eq!(ClimateZone::resolve(30.0, "China"), ClimateZone::Tropical);
        assert_eq!(ClimateZone::resolve(-45.0, "New Zealand"), ClimateZone::Temperate);
        assert_eq!(ClimateZone::resolve(55.0, "Russia"), ClimateZone::Continental);
        assert_eq!(ClimateZone::resolve(-75.0, "Antarctica"), ClimateZone::Polar);
    }

    #[test]
    fn arid_lookup_ignores_case_and_whitespace() {
        assert_eq!(ClimateZone::resolve(25.0, " SAUDI ARABIA "), ClimateZone::Arid);
    }

    #[test]
    fn tropical_ladder_first_match_wins() {
        let zone = ClimateZone::Tropical;
        assert_eq!(zone.condition(90.0, 28.0, 0.1), Condition::Thunderstorm);
        assert_eq!(zone.condition(90.0, 28.0, 0.4), Condition::Rain);
        assert_eq!(zone.condition(82.0, 28.0, 0.6), Condition::Drizzle);
        assert_eq!(zone.condition(72.0, 28.0, 0.9), Condition::Clouds);
        assert_eq!(zone.condition(65.0, 28.0, 0.0), Condition::Clear);
    }

    #[test]
    fn snow_only_when_freezing() {
        assert_eq!(ClimateZone::Continental.condition(80.0, -4.0, 0.1), Condition::Snow);
        assert_eq!(ClimateZone::Continental.condition(80.0, 6.0, 0.1), Condition::Drizzle);
        assert_eq!(ClimateZone::Polar.condition(75.0, -10.0, 0.5), Condition::Snow);
    }

    #[test]
    fn generated_readings_respect_invariants() {
        let simulator = ClimateSimulator::seeded(7);

        for location in sample_locations() {
            for hour in 0..24 {
                for month in 1..=12 {
                    let data = simulator.generate_at(&location, hour, month);

                    assert!((0.0..=100.0).contains(&data.humidity()), "{data}");
                    assert!((0.0..=100.0).contains(&data.cloudiness()), "{data}");
                    assert!(data.uv_index() <= 11, "{data}");
                    assert!(data.visibility() >= 0.0, "{data}");
                    assert!(data.wind_speed() >= 0.0, "{data}");
                    assert_eq!(data.description(), data.condition().description());
                    assert_eq!(data.location(), &location);
                }
            }
        }
    }

    #[test]
    fn temperature_stays_within_zone_plus_diurnal_bound_when_seasonal_term_vanishes() {
        // sin(6π/6) == 0 for the northern hemisphere in June.
        for location in sample_locations().iter().filter(|l| !l.is_southern()) {
            let ranges = ClimateZone::for_location(location).ranges();
            let simulator = ClimateSimulator::seeded(42);

            for hour in 0..24 {
                let data = simulator.generate_at(location, hour, 6);
                let t = data.temperature();
                assert!(
                    t >= ranges.temperature.min - 8.05 && t <= ranges.temperature.max + 8.05,
                    "{} out of range at hour {hour}: {t}",
                    location.city()
                );
            }
        }
    }

    #[test]
    fn same_seed_same_output() {
        let a = ClimateSimulator::seeded(99).generate_at(&Location::colombo(), 14, 3);
        let b = ClimateSimulator::seeded(99).generate_at(&Location::colombo(), 14, 3);

        assert_eq!(a.temperature(), b.temperature());
        assert_eq!(a.condition(), b.condition());
        assert_eq!(a.cloudiness(), b.cloudiness());
    }

    #[test]
    fn humidity_clamped_to_zone_bounds() {
        let simulator = ClimateSimulator::seeded(3);
        let cairo = Location::new("Cairo", "Egypt", 30.0444, 31.2357, "Africa/Cairo");
        let bounds = ClimateZone::Arid.ranges().humidity;

        for hour in 0..24 {
            let data = simulator.generate_at(&cairo, hour, 1);
            assert!(bounds.contains(data.humidity()), "{}", data.humidity());
        }
    }

    #[test]
    fn high_altitude_lowers_pressure() {
        let simulator = ClimateSimulator::seeded(11);
        let hill = Location::new("Nuwara Eliya", "Sri Lanka", 6.9497, 80.7891, "Asia/Colombo");

        let data = simulator.generate_at(&hill, 12, 1);
        assert!(data.pressure() < ClimateZone::Tropical.ranges().pressure.min - 150.0);
    }

    #[test]
    fn uv_index_peaks_at_equator_noon() {
        assert_eq!(uv_index(0.0, 12), 11.0);
        assert_eq!(uv_index(0.0, 3), 0.0);
        assert_eq!(uv_index(90.0, 12), 0.0);
        assert_eq!(uv_index(45.0, 12), 6.0);
    }

    #[test]
    fn feels_like_switches_formula_by_temperature() {
        assert_eq!(feels_like(20.0, 60.0, 10.0), 20.0);
        assert!(feels_like(32.0, 80.0, 5.0) > 32.0);
        assert!(feels_like(0.0, 60.0, 30.0) < 0.0);
        assert_eq!(feels_like(5.0, 60.0, 3.0), 5.0);
    }

    #[test]
    fn solar_hour_shifts_with_longitude() {
        let noon = DateTime::parse_from_rfc3339("2024-06-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);

        assert_eq!(solar_hour(0.0, noon), 12);
        assert_eq!(solar_hour(79.8612, noon), 17);
        assert_eq!(solar_hour(-150.0, noon), 2);
    }

    #[test]
    fn drift_never_picks_the_current_city() {
        let drift = LocationDrift::new(1.0, LocationDrift::default().cities);
        let mut rng = StdRng::seed_from_u64(5);

        for _ in 0..50 {
            let next = drift.next(&Location::colombo(), &mut rng).unwrap();
            assert_ne!(next.city(), "Colombo");
        }
    }

    #[test]
    fn drift_with_zero_probability_stays_put() {
        let drift = LocationDrift::new(0.0, LocationDrift::default().cities);
        let mut rng = StdRng::seed_from_u64(5);
        assert!(drift.next(&Location::colombo(), &mut rng).is_none());
    }
}
