use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, trace};

use crate::command::{VelocityCommand, VelocityVector};
use crate::mode::ControlMode;
use crate::profile::{ActiveProfile, FlightProfile};
use crate::zone::{Column, Row, Zone, ZoneGrid};

/// Latest perception result, in pixels of the frame it came from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetObservation {
    pub center: (f64, f64),
    pub frame: ZoneGrid,
    pub zone: Zone,
    pub present: bool,
    pub captured_at: Instant,
}

impl TargetObservation {
    pub fn detected(x: f64, y: f64, frame: ZoneGrid, captured_at: Instant) -> Self {
        Self { center: (x, y), frame, zone: frame.classify(x, y), present: true, captured_at }
    }

    pub fn absent(frame: ZoneGrid, captured_at: Instant) -> Self {
        let center = frame.center();
        Self { center, frame, zone: Zone::Center, present: false, captured_at }
    }

    /// Pixel offset of the target from the frame center (+x right, +y down).
    pub fn offset(&self) -> (f64, f64) {
        let (cx, cy) = self.frame.center();
        (self.center.0 - cx, self.center.1 - cy)
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.captured_at)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationStatus {
    Fresh,
    Absent,
    /// Older than the staleness bound; handled like an absent target.
    Stale,
}

#[derive(Debug, Clone, Copy)]
pub struct PerceptionConfig {
    pub dead_zone_h_px: f64,
    pub dead_zone_v_px: f64,
    pub max_age: Duration,
}

impl Default for PerceptionConfig {
    fn default() -> Self {
        Self { dead_zone_h_px: 80.0, dead_zone_v_px: 60.0, max_age: Duration::from_millis(500) }
    }
}

/// Zone-bucketed, bang-bang tracking under AUTONOMOUS authority.
#[derive(Debug)]
pub struct PerceptionMapper {
    cfg: PerceptionConfig,
    command: Arc<VelocityCommand>,
    profile: Arc<ActiveProfile>,
    last_status: Option<ObservationStatus>,
    last: VelocityVector,
}

impl PerceptionMapper {
    pub fn new(cfg: PerceptionConfig, command: Arc<VelocityCommand>, profile: Arc<ActiveProfile>) -> Self {
        Self { cfg, command, profile, last_status: None, last: VelocityVector::ZERO }
    }

    pub fn on_observation(&mut self, obs: &TargetObservation) -> VelocityVector {
        self.on_observation_at(obs, Instant::now())
    }

    pub fn on_observation_at(&mut self, obs: &TargetObservation, now: Instant) -> VelocityVector {
        let status = self.classify(obs, now);
        if self.last_status != Some(status) {
            debug!("perception: {:?} (zone {})", status, obs.zone);
            self.last_status = Some(status);
        }

        let v = match status {
            ObservationStatus::Fresh => self.track(obs, self.profile.get()),
            ObservationStatus::Absent | ObservationStatus::Stale => VelocityVector::ZERO,
        };
        self.last = v;
        if !self.command.publish_as(ControlMode::Autonomous, v) {
            trace!("perception: not owner, discarded {:?}", v);
        }
        v
    }

    pub fn classify(&self, obs: &TargetObservation, now: Instant) -> ObservationStatus {
        if obs.age(now) > self.cfg.max_age {
            ObservationStatus::Stale
        } else if !obs.present {
            ObservationStatus::Absent
        } else {
            ObservationStatus::Fresh
        }
    }

    pub fn last_computed(&self) -> VelocityVector {
        self.last
    }

    pub fn last_status(&self) -> Option<ObservationStatus> {
        self.last_status
    }

    fn track(&self, obs: &TargetObservation, p: &FlightProfile) -> VelocityVector {
        if obs.zone.is_dead_zone() {
            return VelocityVector::ZERO;
        }
        let (dx, dy) = obs.offset();

        let vy = match obs.zone.column() {
            Column::Left if dx.abs() > self.cfg.dead_zone_h_px => -p.ground_speed,
            Column::Right if dx.abs() > self.cfg.dead_zone_h_px => p.ground_speed,
            _ => 0.0,
        };
        // target above center: climb (negative z)
        let vz = match obs.zone.row() {
            Row::Top if dy.abs() > self.cfg.dead_zone_v_px => -p.vertical_speed,
            Row::Bottom if dy.abs() > self.cfg.dead_zone_v_px => p.vertical_speed,
            _ => 0.0,
        };

        VelocityVector { vx: 0.0, vy, vz, yaw_rate: 0.0 }
    }
}
