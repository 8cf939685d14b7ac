//! Sensor simulation engine
//!
//! Pure formulas producing time-varying sensor values from wall-clock time
//! and bounded randomness, plus the per-object [`Dynamics`] table that
//! applies them to an instance on reads and on the periodic refresh tick.
//!
//! Reads and refreshes draw independently: a read followed by a refresh
//! changes a value twice.

use chrono::{DateTime, Utc};
use rand::distributions::Distribution;
use rand::Rng;
use statrs::distribution::Normal;
use std::f64::consts::PI;

use crate::object::{Instance, ResourceId};
use crate::objects::{connectivity, device, location, sensor};
use crate::value::ResourceValue;

pub const BASE_TEMPERATURE: f64 = 22.0;
const TEMPERATURE_SWING: f64 = 5.0;
const TEMPERATURE_NOISE: f64 = 0.5;

pub const BASE_HUMIDITY: f64 = 45.0;
const HUMIDITY_SWING: f64 = 15.0;
const HUMIDITY_NOISE: f64 = 2.0;
pub const HUMIDITY_MIN: f64 = 20.0;
pub const HUMIDITY_MAX: f64 = 90.0;

pub const BATTERY_FLOOR: f64 = 20.0;
const BATTERY_MAX_DRAIN: f64 = 0.1;

const MEMORY_BASE_KB: i64 = 512_000;
pub const MEMORY_FLOOR_KB: i64 = 100_000;

pub const BASE_LATITUDE: f64 = 40.4168;
pub const BASE_LONGITUDE: f64 = -3.7038;
/// About 10 m of GPS drift
const GPS_DRIFT_DEG: f64 = 0.0001;

const SIGNAL_BASE_DBM: f64 = -45.0;
const SIGNAL_NOISE_DBM: f64 = 5.0;
pub const SIGNAL_MIN_DBM: i64 = -100;
pub const SIGNAL_MAX_DBM: i64 = -20;

/// Sample N(0, std_dev)
fn gaussian<R: Rng + ?Sized>(rng: &mut R, std_dev: f64) -> f64 {
    Normal::new(0.0, std_dev)
        .map(|normal| normal.sample(rng))
        .unwrap_or(0.0)
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Hours elapsed since the Unix epoch (fractional)
pub fn hour_of_epoch(now: DateTime<Utc>) -> f64 {
    now.timestamp_millis() as f64 / 3_600_000.0
}

/// Position in the 24 hour cycle, in [-1, 1]
fn daily_cycle(now: DateTime<Utc>) -> f64 {
    (2.0 * PI * hour_of_epoch(now) / 24.0).sin()
}

/// `22 + 5 sin(2π h/24) + N(0, 0.5)`, one decimal
pub fn temperature<R: Rng + ?Sized>(now: DateTime<Utc>, rng: &mut R) -> f64 {
    let value = BASE_TEMPERATURE + TEMPERATURE_SWING * daily_cycle(now) + gaussian(rng, TEMPERATURE_NOISE);
    round_to(value, 1)
}

/// `45 - 15 sin(2π h/24) + N(0, 2)`, clamped to [20, 90], one decimal
pub fn humidity<R: Rng + ?Sized>(now: DateTime<Utc>, rng: &mut R) -> f64 {
    let value = BASE_HUMIDITY - HUMIDITY_SWING * daily_cycle(now) + gaussian(rng, HUMIDITY_NOISE);
    round_to(value.clamp(HUMIDITY_MIN, HUMIDITY_MAX), 1)
}

/// Drain up to 0.1 percentage points, never below the floor
pub fn drain_battery<R: Rng + ?Sized>(current: f64, rng: &mut R) -> f64 {
    (current - rng.gen_range(0.0..=BATTERY_MAX_DRAIN)).max(BATTERY_FLOOR)
}

/// Free memory in KB: `512000 + U{-50000..10000}`, at least 100000
pub fn free_memory<R: Rng + ?Sized>(rng: &mut R) -> i64 {
    (MEMORY_BASE_KB + rng.gen_range(-50_000..=10_000)).max(MEMORY_FLOOR_KB)
}

/// Coordinate with GPS drift around its base, six decimals
pub fn jitter_coordinate<R: Rng + ?Sized>(base: f64, rng: &mut R) -> f64 {
    round_to(base + gaussian(rng, GPS_DRIFT_DEG), 6)
}

/// Radio signal strength in dBm: `-45 + N(0, 5)`, clamped to [-100, -20]
pub fn signal_strength<R: Rng + ?Sized>(rng: &mut R) -> i64 {
    let raw = (SIGNAL_BASE_DBM + gaussian(rng, SIGNAL_NOISE_DBM)) as i64;
    raw.clamp(SIGNAL_MIN_DBM, SIGNAL_MAX_DBM)
}

/// Link quality in percent derived from signal strength
pub fn link_quality(signal_dbm: i64) -> i64 {
    (100 + (signal_dbm + 30) * 2).clamp(0, 100)
}

/// Link utilization in percent, uniform in [1, 15]
pub fn link_utilization<R: Rng + ?Sized>(rng: &mut R) -> i64 {
    rng.gen_range(1..=15)
}

/// Widen the min/max measured resources so they enclose `value`
fn track_bounds(instance: &mut Instance, value: f64) {
    let min = instance
        .get(sensor::MIN_MEASURED)
        .and_then(ResourceValue::as_f64)
        .unwrap_or(value);
    let max = instance
        .get(sensor::MAX_MEASURED)
        .and_then(ResourceValue::as_f64)
        .unwrap_or(value);

    if value < min || !instance.contains(sensor::MIN_MEASURED) {
        instance.set(sensor::MIN_MEASURED, value);
    }
    if value > max || !instance.contains(sensor::MAX_MEASURED) {
        instance.set(sensor::MAX_MEASURED, value);
    }
}

fn set_sensor_value(instance: &mut Instance, value: f64) {
    instance.set(sensor::SENSOR_VALUE, value);
    track_bounds(instance, value);
}

fn current_battery(instance: &Instance) -> f64 {
    instance
        .get(device::BATTERY_LEVEL)
        .and_then(ResourceValue::as_f64)
        .unwrap_or(100.0)
}

fn current_signal(instance: &Instance) -> i64 {
    instance
        .get(connectivity::RADIO_SIGNAL_STRENGTH)
        .and_then(ResourceValue::as_i64)
        .unwrap_or(SIGNAL_BASE_DBM as i64)
}

/// Simulated behavior attached to an object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dynamics {
    /// Values set once at construction
    Static,
    Device,
    Connectivity,
    Location,
    Temperature,
    Humidity,
}

impl Dynamics {
    /// Whether the periodic refresh tick changes this object
    pub fn refreshes(self) -> bool {
        !matches!(self, Self::Static)
    }

    /// Recompute the resource about to be read
    pub fn on_read<R: Rng + ?Sized>(
        self,
        resource_id: ResourceId,
        instance: &mut Instance,
        now: DateTime<Utc>,
        rng: &mut R,
    ) {
        match (self, resource_id) {
            (Self::Device, device::CURRENT_TIME) => instance.set(device::CURRENT_TIME, now),
            (Self::Device, device::BATTERY_LEVEL) => {
                let level = drain_battery(current_battery(instance), rng);
                instance.set(device::BATTERY_LEVEL, level);
            }
            (Self::Temperature, sensor::SENSOR_VALUE) => {
                set_sensor_value(instance, temperature(now, rng));
            }
            (Self::Humidity, sensor::SENSOR_VALUE) => {
                set_sensor_value(instance, humidity(now, rng));
            }
            (Self::Location, location::LATITUDE) => {
                instance.set(location::LATITUDE, jitter_coordinate(BASE_LATITUDE, rng));
            }
            (Self::Location, location::LONGITUDE) => {
                instance.set(location::LONGITUDE, jitter_coordinate(BASE_LONGITUDE, rng));
            }
            (Self::Location, location::TIMESTAMP) => {
                instance.set(location::TIMESTAMP, now.timestamp());
            }
            (Self::Connectivity, connectivity::RADIO_SIGNAL_STRENGTH) => {
                instance.set(connectivity::RADIO_SIGNAL_STRENGTH, signal_strength(rng));
            }
            (Self::Connectivity, connectivity::LINK_QUALITY) => {
                let quality = link_quality(current_signal(instance));
                instance.set(connectivity::LINK_QUALITY, quality);
            }
            _ => {}
        }
    }

    /// Recompute every dynamic resource of the instance in place
    pub fn on_refresh<R: Rng + ?Sized>(self, instance: &mut Instance, now: DateTime<Utc>, rng: &mut R) {
        match self {
            Self::Static => {}
            Self::Device => {
                instance.set(device::CURRENT_TIME, now);
                // Refresh keeps whole percents
                let level = drain_battery(current_battery(instance), rng).trunc();
                instance.set(device::BATTERY_LEVEL, level);
                instance.set(device::MEMORY_FREE, free_memory(rng));
            }
            Self::Temperature => set_sensor_value(instance, temperature(now, rng)),
            Self::Humidity => set_sensor_value(instance, humidity(now, rng)),
            Self::Location => {
                instance.set(location::LATITUDE, jitter_coordinate(BASE_LATITUDE, rng));
                instance.set(location::LONGITUDE, jitter_coordinate(BASE_LONGITUDE, rng));
                instance.set(location::TIMESTAMP, now.timestamp());
            }
            Self::Connectivity => {
                let signal = signal_strength(rng);
                instance.set(connectivity::RADIO_SIGNAL_STRENGTH, signal);
                instance.set(connectivity::LINK_QUALITY, link_quality(signal));
                instance.set(connectivity::LINK_UTILIZATION, link_utilization(rng));
            }
        }
    }
}
