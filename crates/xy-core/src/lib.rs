pub mod command;
pub mod error;
pub mod link;
pub mod manual;
pub mod mode;
pub mod perception;
pub mod profile;
pub mod session;
pub mod streamer;
pub mod zone;

use std::time::Duration;

use serde::Deserialize;

pub use command::{VelocityCommand, VelocityVector};
pub use error::{CoreError, LinkError};
pub use link::{PerceptionSource, VehicleLink};
pub use manual::Key;
pub use mode::ControlMode;
pub use perception::{ObservationStatus, PerceptionConfig, TargetObservation};
pub use profile::FlightProfile;
pub use session::{ControlSession, StatusSnapshot};
pub use zone::{Zone, ZoneGrid};

/// `[control]` section of the config file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// eco | standard | performance
    pub default_profile: String,

    /// Horizontal/vertical pixel distance from frame center below which the
    /// tracker does not move on that axis.
    pub dead_zone_h_px: f64,
    pub dead_zone_v_px: f64,

    /// Observations older than this are ignored (target treated as lost).
    pub observation_max_age_ms: u64,

    /// Upper bound on waiting for the streamer's final zero command.
    pub stop_timeout_ms: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            default_profile: profile::STANDARD.name.to_string(),
            dead_zone_h_px: 80.0,
            dead_zone_v_px: 60.0,
            observation_max_age_ms: 500,
            stop_timeout_ms: 2000,
        }
    }
}

impl ControlConfig {
    pub fn perception(&self) -> PerceptionConfig {
        PerceptionConfig {
            dead_zone_h_px: self.dead_zone_h_px,
            dead_zone_v_px: self.dead_zone_v_px,
            max_age: Duration::from_millis(self.observation_max_age_ms),
        }
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}
