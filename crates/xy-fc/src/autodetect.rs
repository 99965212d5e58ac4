use std::time::{Duration, Instant};

use anyhow::Result;
use mavlink::common::{MavAutopilot, MavMessage};
use tracing::{info, warn};

use crate::mav::FcLink;
use crate::FcConfig;

#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub dev: String,
    pub baud: u32,
    pub hb_seen: bool,
    pub elapsed_ms: u64,
    pub note: String,
}

#[derive(Debug, Clone)]
pub struct AutodetectResult {
    pub chosen: Option<(String, u32)>,
    pub probes: Vec<ProbeResult>,
}

/// USB telemetry radios first, then Jetson/Pi UARTs.
pub fn default_candidate_devs() -> Vec<String> {
    vec![
        "/dev/ttyUSB0".into(),
        "/dev/ttyUSB1".into(),
        "/dev/ttyACM0".into(),
        "/dev/ttyACM1".into(),
        "/dev/ttyTHS1".into(),
        "/dev/serial0".into(),
        "/dev/ttyAMA0".into(),
    ]
}

pub fn default_candidate_bauds() -> Vec<u32> {
    vec![57600, 115200, 921600]
}

pub fn autodetect_fc(cfg: &FcConfig) -> Result<AutodetectResult> {
    let devs = cfg.candidate_devs.clone().unwrap_or_else(default_candidate_devs);
    let bauds = cfg.candidate_bauds.clone().unwrap_or_else(default_candidate_bauds);
    let heartbeat_timeout = Duration::from_millis(cfg.heartbeat_timeout_ms.unwrap_or(1500));
    let mut probes = Vec::new();

    for dev in devs {
        for &baud in &bauds {
            let start = Instant::now();
            let (hb_seen, note) = match FcLink::open(&dev, baud, cfg) {
                Ok(link) => {
                    if wait_for_autopilot(&link, heartbeat_timeout) {
                        (true, "heartbeat".to_string())
                    } else {
                        (false, "no heartbeat".to_string())
                    }
                }
                Err(e) => {
                    warn!("fc autodetect probe failed dev={} baud={} err={:#}", dev, baud, e);
                    (false, format!("open/connect failed: {:#}", e))
                }
            };

            probes.push(ProbeResult {
                dev: dev.clone(),
                baud,
                hb_seen,
                elapsed_ms: start.elapsed().as_millis() as u64,
                note,
            });
            if hb_seen {
                info!("fc autodetect: OK {} @ {}", dev, baud);
                return Ok(AutodetectResult { chosen: Some((dev, baud)), probes });
            }
        }
    }

    Ok(AutodetectResult { chosen: None, probes })
}

// each poll returns within the link's poll budget, so the deadline is
// rechecked at least that often
fn wait_for_autopilot(link: &FcLink, timeout: Duration) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        match link.poll_once() {
            Ok(Some(msg)) if msg.is_autopilot_heartbeat() => return true,
            Ok(_) => {}
            Err(_) => std::thread::sleep(Duration::from_millis(25)),
        }
    }
    false
}

// helper trait-ish on mavlink message without leaking mavlink type to callers
trait HeartbeatCheck {
    fn is_autopilot_heartbeat(&self) -> bool;
}

impl HeartbeatCheck for MavMessage {
    fn is_autopilot_heartbeat(&self) -> bool {
        matches!(self, MavMessage::HEARTBEAT(hb) if hb.autopilot != MavAutopilot::MAV_AUTOPILOT_INVALID)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mav::tests::{test_config, Capture, NoisePort, SilentPort};
    use crate::mav::POLL_BUDGET;

    #[test]
    fn silent_port_gives_up_at_deadline() {
        let link = FcLink::from_io(Box::new(SilentPort), Box::new(Capture::default()), &test_config());
        let t0 = Instant::now();
        assert!(!wait_for_autopilot(&link, Duration::from_millis(300)));
        assert!(t0.elapsed() < Duration::from_millis(300) + POLL_BUDGET + Duration::from_millis(100));
    }

    #[test]
    fn noisy_port_gives_up_at_deadline() {
        let link = FcLink::from_io(Box::new(NoisePort), Box::new(Capture::default()), &test_config());
        let t0 = Instant::now();
        assert!(!wait_for_autopilot(&link, Duration::from_millis(300)));
        assert!(t0.elapsed() < Duration::from_millis(300) + POLL_BUDGET + Duration::from_millis(100));
    }
}
