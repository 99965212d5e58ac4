use std::f64::consts::{FRAC_PI_4, FRAC_PI_6, PI};
use std::fmt;
use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use tracing::info;

use crate::error::CoreError;

/// Named set of rate limits used to scale both mappers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FlightProfile {
    pub name: &'static str,
    pub ground_speed: f64,   // m/s, |vx| and |vy|
    pub vertical_speed: f64, // m/s, |vz|
    pub yaw_rate: f64,       // rad/s
}

pub const ECO: FlightProfile = FlightProfile {
    name: "eco",
    ground_speed: 2.0,
    vertical_speed: 0.35,
    yaw_rate: PI / 9.0, // 20 deg/s
};

pub const STANDARD: FlightProfile = FlightProfile {
    name: "standard",
    ground_speed: 3.0,
    vertical_speed: 0.5,
    yaw_rate: FRAC_PI_6, // 30 deg/s
};

pub const PERFORMANCE: FlightProfile = FlightProfile {
    name: "performance",
    ground_speed: 4.5,
    vertical_speed: 0.75,
    yaw_rate: FRAC_PI_4, // 45 deg/s
};

pub const ALL_PROFILES: [&FlightProfile; 3] = [&ECO, &STANDARD, &PERFORMANCE];

impl FlightProfile {
    /// Case-insensitive lookup of one of the built-in tiers.
    pub fn by_name(name: &str) -> Result<&'static FlightProfile, CoreError> {
        let wanted = name.trim();
        ALL_PROFILES
            .into_iter()
            .find(|p| p.name.eq_ignore_ascii_case(wanted))
            .ok_or_else(|| CoreError::InvalidProfileName(name.to_string()))
    }
}

impl fmt::Display for FlightProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (ground {:.2} m/s, vertical {:.2} m/s, yaw {:.0} deg/s)",
            self.name,
            self.ground_speed,
            self.vertical_speed,
            self.yaw_rate.to_degrees()
        )
    }
}

/// The single active profile, shared by both mappers.
///
/// Swapping only affects the next recompute; already published commands are
/// left as they are.
#[derive(Debug)]
pub struct ActiveProfile {
    current: Mutex<&'static FlightProfile>,
}

impl ActiveProfile {
    pub fn new(initial: &'static FlightProfile) -> Self {
        Self { current: Mutex::new(initial) }
    }

    pub fn get(&self) -> &'static FlightProfile {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Unknown names leave the previous profile in place.
    pub fn set(&self, name: &str) -> Result<&'static FlightProfile, CoreError> {
        let next = FlightProfile::by_name(name)?;
        let mut cur = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if cur.name != next.name {
            info!("profile: {} -> {}", cur.name, next.name);
        }
        *cur = next;
        Ok(next)
    }
}

impl Default for ActiveProfile {
    fn default() -> Self {
        Self::new(&STANDARD)
    }
}
