pub mod mav;
pub mod autodetect;
pub mod safety;
pub mod state;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct FcConfig {
    /// false: run against the built-in simulated vehicle.
    pub enable: bool,

    /// If true, probe candidate serial ports/bauds and pick the first that
    /// yields an autopilot HEARTBEAT.
    pub autodetect: bool,

    /// When autodetect=false: fixed port config
    pub serial_dev: Option<String>,
    pub baud: Option<u32>,

    /// Autodetect candidates, e.g. ["/dev/ttyUSB0","/dev/ttyACM0","/dev/ttyTHS1"]
    pub candidate_devs: Option<Vec<String>>,
    pub candidate_bauds: Option<Vec<u32>>,

    /// Heartbeat wait per probe attempt
    pub heartbeat_timeout_ms: Option<u64>,

    /// MAVLink ids we use (companion side)
    pub sys_id: u8,
    pub comp_id: u8,

    /// target system/component (autopilot side). 1/1 is common for ArduPilot.
    pub target_sys: u8,
    pub target_comp: u8,

    /// Hard safety: only allow these high-level commands
    pub allow_rtl: bool,
    pub allow_land: bool,

    /// Require seeing an autopilot heartbeat before sending commands
    pub require_heartbeat: bool,

    /// Companion heartbeat rate. Default 1 Hz.
    pub send_heartbeat_hz: Option<f32>,

    /// How long `run` waits for the vehicle to report armed. Default 0 (don't wait).
    pub arm_wait_ms: Option<u64>,

    /// Armed state older than this is reported as unknown. Default 3000.
    pub telemetry_stale_ms: Option<u64>,
}
