//! Daylight predicate from the solar altitude

use chrono::{DateTime, Datelike, Timelike, Utc};

/// Calculate Julian Day from a chrono DateTime
fn julian_day(dt: &DateTime<Utc>) -> f64 {
    let year = dt.year();
    let month = dt.month() as i32;
    let day = dt.day() as f64;
    let hour = dt.hour() as f64 + dt.minute() as f64 / 60.0 + dt.second() as f64 / 3600.0;

    let (y, m) = if month <= 2 {
        (year - 1, month + 12)
    } else {
        (year, month)
    };

    let a = (y as f64 / 100.0).floor();
    let b = 2.0 - a + (a / 4.0).floor();

    (365.25 * (y as f64 + 4716.0)).floor() + (30.6001 * (m as f64 + 1.0)).floor() + day + hour / 24.0 + b
        - 1524.5
}

/// Local sidereal time in degrees
fn local_sidereal_degrees(jd: f64, longitude: f64) -> f64 {
    let t = (jd - 2451545.0) / 36525.0;
    let gmst = 280.46061837 + 360.98564736629 * (jd - 2451545.0) + 0.000387933 * t * t
        - t * t * t / 38710000.0;
    (gmst + longitude).rem_euclid(360.0)
}

/// Solar right ascension and declination in degrees
fn solar_equatorial(jd: f64) -> (f64, f64) {
    // Days since J2000.0
    let n = jd - 2451545.0;

    let l = (280.460 + 0.9856474 * n).rem_euclid(360.0);
    let g = (357.528 + 0.9856003 * n).rem_euclid(360.0).to_radians();

    // Ecliptic longitude and obliquity
    let lambda = (l + 1.915 * g.sin() + 0.020 * (2.0 * g).sin()).to_radians();
    let epsilon = (23.439 - 0.0000004 * n).to_radians();

    let ra = (epsilon.cos() * lambda.sin()).atan2(lambda.cos()).to_degrees();
    let dec = (epsilon.sin() * lambda.sin()).asin().to_degrees();
    (ra.rem_euclid(360.0), dec)
}

/// Altitude of the sun in degrees for an observer at `latitude`/`longitude`
/// (degrees, east positive)
pub fn solar_altitude(latitude: f64, longitude: f64, at: DateTime<Utc>) -> f64 {
    let jd = julian_day(&at);
    let (ra, dec) = solar_equatorial(jd);
    let hour_angle = (local_sidereal_degrees(jd, longitude) - ra).to_radians();

    let lat = latitude.to_radians();
    let dec = dec.to_radians();
    (lat.sin() * dec.sin() + lat.cos() * dec.cos() * hour_angle.cos())
        .asin()
        .to_degrees()
}

/// "Is it daytime" at a fixed site
#[derive(Debug, Clone)]
pub struct DaylightSensor {
    latitude: f64,
    longitude: f64,
    altitude_limit: f64,
}

impl DaylightSensor {
    pub fn new(latitude: f64, longitude: f64, altitude_limit: f64) -> Self {
        Self {
            latitude,
            longitude,
            altitude_limit,
        }
    }

    pub fn is_daytime_at(&self, at: DateTime<Utc>) -> bool {
        solar_altitude(self.latitude, self.longitude, at) > self.altitude_limit
    }

    pub fn is_daytime(&self) -> bool {
        self.is_daytime_at(Utc::now())
    }
}
