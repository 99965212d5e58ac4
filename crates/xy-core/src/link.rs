use crate::error::LinkError;
use crate::perception::TargetObservation;

/// Capability interface of the command/telemetry link to the vehicle.
///
/// Implementations must answer from cached telemetry or apply their own
/// bounded timeouts: the streamer calls both methods from its fixed-rate tick.
pub trait VehicleLink: Send + Sync {
    fn is_armed(&self) -> bool;

    /// Body-frame velocity target (m/s, m/s, m/s NED, rad/s).
    fn send_velocity(&self, vx: f64, vy: f64, vz: f64, yaw_rate: f64) -> Result<(), LinkError>;
}

/// Source of the most recent perception result.
pub trait PerceptionSource: Send + Sync {
    fn latest_observation(&self) -> TargetObservation;
}
