use std::time::{Duration, Instant};

use mavlink::common::{MavModeFlag, HEARTBEAT_DATA, SYS_STATUS_DATA};
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatteryStatus {
    pub voltage: Option<f32>,  // Volts
    pub remaining: Option<u8>, // Percent 0-100
}

/// Autopilot telemetry as last seen by the reader.
#[derive(Debug, Clone, Default)]
pub struct FcStatus {
    pub connected: bool,
    pub port: Option<String>,
    pub baud: Option<u32>,
    pub armed: Option<bool>,
    pub custom_mode: Option<u32>,
    pub last_heartbeat: Option<Instant>,
    pub battery: BatteryStatus,
}

impl FcStatus {
    pub fn hb_age(&self, now: Instant) -> Option<Duration> {
        self.last_heartbeat.map(|t| now.saturating_duration_since(t))
    }

    pub fn summary(&self, stale_after: Duration, now: Instant) -> FcSummary {
        FcSummary {
            connected: self.connected,
            port: self.port.clone(),
            baud: self.baud,
            armed: self.armed_within(stale_after, now),
            mode: self.custom_mode.map(|m| match CopterMode::from_custom_mode(m) {
                Some(c) => c.to_string(),
                None => format!("CUSTOM({})", m),
            }),
            hb_age_ms: self.hb_age(now).map(|d| d.as_millis() as u64),
            battery_v: self.battery.voltage,
            battery_pct: self.battery.remaining,
        }
    }

    /// Armed flag, or None when no heartbeat arrived within `stale_after`.
    pub fn armed_within(&self, stale_after: Duration, now: Instant) -> Option<bool> {
        let t = self.last_heartbeat?;
        if now.saturating_duration_since(t) > stale_after {
            return None;
        }
        self.armed
    }

    pub fn apply_heartbeat(&mut self, hb: &HEARTBEAT_DATA, now: Instant) {
        self.connected = true;
        self.armed = Some(hb.base_mode.contains(MavModeFlag::MAV_MODE_FLAG_SAFETY_ARMED));
        self.custom_mode = Some(hb.custom_mode);
        self.last_heartbeat = Some(now);
    }

    pub fn apply_sys_status(&mut self, status: &SYS_STATUS_DATA) {
        // voltage_battery is in millivolts, u16::MAX means unknown
        if status.voltage_battery != u16::MAX {
            self.battery.voltage = Some(status.voltage_battery as f32 / 1000.0);
        }
        // -1 means invalid
        if (0..=100).contains(&status.battery_remaining) {
            self.battery.remaining = Some(status.battery_remaining as u8);
        }
    }
}

/// Console view of the autopilot telemetry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FcSummary {
    pub connected: bool,
    pub port: Option<String>,
    pub baud: Option<u32>,
    /// None when unknown or stale.
    pub armed: Option<bool>,
    pub mode: Option<String>,
    pub hb_age_ms: Option<u64>,
    pub battery_v: Option<f32>,
    pub battery_pct: Option<u8>,
}

/// ArduCopter custom flight modes we command or wait for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopterMode {
    Stabilize,
    AltHold,
    Guided,
    Loiter,
    Rtl,
    Land,
}

impl CopterMode {
    pub fn custom_mode(self) -> u32 {
        match self {
            CopterMode::Stabilize => 0,
            CopterMode::AltHold => 2,
            CopterMode::Guided => 4,
            CopterMode::Loiter => 5,
            CopterMode::Rtl => 6,
            CopterMode::Land => 9,
        }
    }

    pub fn from_custom_mode(m: u32) -> Option<Self> {
        [
            CopterMode::Stabilize,
            CopterMode::AltHold,
            CopterMode::Guided,
            CopterMode::Loiter,
            CopterMode::Rtl,
            CopterMode::Land,
        ]
        .into_iter()
        .find(|c| c.custom_mode() == m)
    }
}

impl std::fmt::Display for CopterMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CopterMode::Stabilize => "STABILIZE",
            CopterMode::AltHold => "ALT_HOLD",
            CopterMode::Guided => "GUIDED",
            CopterMode::Loiter => "LOITER",
            CopterMode::Rtl => "RTL",
            CopterMode::Land => "LAND",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mavlink::common::{MavAutopilot, MavState, MavType};

    fn heartbeat(armed: bool, custom_mode: u32) -> HEARTBEAT_DATA {
        let mut base_mode = MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED;
        if armed {
            base_mode |= MavModeFlag::MAV_MODE_FLAG_SAFETY_ARMED;
        }
        HEARTBEAT_DATA {
            custom_mode,
            mavtype: MavType::MAV_TYPE_QUADROTOR,
            autopilot: MavAutopilot::MAV_AUTOPILOT_ARDUPILOTMEGA,
            base_mode,
            system_status: MavState::MAV_STATE_ACTIVE,
            mavlink_version: 3,
        }
    }

    #[test]
    fn heartbeat_sets_armed_and_mode() {
        let mut st = FcStatus::default();
        let now = Instant::now();
        assert_eq!(st.armed_within(Duration::from_secs(3), now), None);

        st.apply_heartbeat(&heartbeat(true, 4), now);
        assert_eq!(st.armed_within(Duration::from_secs(3), now), Some(true));
        assert_eq!(st.custom_mode.and_then(CopterMode::from_custom_mode), Some(CopterMode::Guided));

        st.apply_heartbeat(&heartbeat(false, 9), now);
        assert_eq!(st.armed_within(Duration::from_secs(3), now), Some(false));
    }

    #[test]
    fn stale_heartbeat_is_unknown() {
        let mut st = FcStatus::default();
        let t0 = Instant::now();
        st.apply_heartbeat(&heartbeat(true, 4), t0);
        assert_eq!(st.armed_within(Duration::from_secs(3), t0 + Duration::from_secs(4)), None);
    }

    #[test]
    fn summary_reports_battery_and_heartbeat_age() {
        let mut st = FcStatus { port: Some("/dev/ttyTHS1".into()), ..Default::default() };
        let t0 = Instant::now();
        st.apply_heartbeat(&heartbeat(true, 7), t0);
        st.apply_sys_status(&SYS_STATUS_DATA {
            voltage_battery: 15_200,
            current_battery: -1,
            battery_remaining: 64,
            ..Default::default()
        });

        let s = st.summary(Duration::from_secs(3), t0 + Duration::from_millis(400));
        assert_eq!(s.armed, Some(true));
        assert_eq!(s.mode.as_deref(), Some("CUSTOM(7)"));
        assert_eq!(s.hb_age_ms, Some(400));
        assert_eq!(s.battery_v, Some(15.2));
        assert_eq!(s.battery_pct, Some(64));

        st.apply_heartbeat(&heartbeat(false, 9), t0);
        assert_eq!(st.summary(Duration::from_secs(3), t0).mode.as_deref(), Some("LAND"));
    }
}
