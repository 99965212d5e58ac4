//! Glue between the target detector and the control core: detections in,
//! one [`TargetObservation`] out.

use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::trace;
use xy_core::{PerceptionSource, TargetObservation, ZoneGrid};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class_id: i32,
    pub conf: f32,
    // normalized 0..1
    pub cx: f32,
    pub cy: f32,
    pub w: f32,
    pub h: f32,
}

impl Detection {
    pub fn area(&self) -> f32 {
        self.w.max(0.0) * self.h.max(0.0)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    pub frame_width: u32,
    pub frame_height: u32,
    /// None tracks any class.
    pub target_class: Option<i32>,
    pub min_conf: f32,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self { frame_width: 640, frame_height: 480, target_class: None, min_conf: 0.5 }
    }
}

/// The largest eligible detection; nearest faces are the biggest.
pub fn select_target<'a>(dets: &'a [Detection], cfg: &TargetConfig) -> Option<&'a Detection> {
    dets.iter()
        .filter(|d| d.conf >= cfg.min_conf)
        .filter(|d| cfg.target_class.map_or(true, |c| c == d.class_id))
        .max_by(|a, b| a.area().total_cmp(&b.area()))
}

pub fn to_observation(det: Option<&Detection>, frame: ZoneGrid, captured_at: Instant) -> TargetObservation {
    match det {
        Some(d) => {
            let x = f64::from(d.cx.clamp(0.0, 1.0)) * f64::from(frame.width);
            let y = f64::from(d.cy.clamp(0.0, 1.0)) * f64::from(frame.height);
            TargetObservation::detected(x, y, frame, captured_at)
        }
        None => TargetObservation::absent(frame, captured_at),
    }
}

/// Latest-value slot written by the detector thread and read by the session.
#[derive(Debug)]
pub struct ObservationBoard {
    cfg: TargetConfig,
    latest: Mutex<TargetObservation>,
}

impl ObservationBoard {
    pub fn new(cfg: TargetConfig) -> Self {
        let frame = ZoneGrid::new(cfg.frame_width, cfg.frame_height);
        Self { latest: Mutex::new(TargetObservation::absent(frame, Instant::now())), cfg }
    }

    pub fn frame(&self) -> ZoneGrid {
        ZoneGrid::new(self.cfg.frame_width, self.cfg.frame_height)
    }

    pub fn publish(&self, obs: TargetObservation) {
        trace!("observation: present={} zone={}", obs.present, obs.zone);
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = obs;
    }

    /// Detector entry point: publishes the selected target of one frame.
    pub fn publish_detections(&self, dets: &[Detection], captured_at: Instant) -> TargetObservation {
        let obs = to_observation(select_target(dets, &self.cfg), self.frame(), captured_at);
        self.publish(obs);
        obs
    }
}

impl PerceptionSource for ObservationBoard {
    fn latest_observation(&self) -> TargetObservation {
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xy_core::Zone;

    fn det(class_id: i32, conf: f32, cx: f32, cy: f32, side: f32) -> Detection {
        Detection { class_id, conf, cx, cy, w: side, h: side }
    }

    #[test]
    fn picks_largest_confident_target() {
        let cfg = TargetConfig { target_class: Some(0), ..Default::default() };
        let dets = vec![
            det(0, 0.9, 0.1, 0.1, 0.1),
            det(0, 0.3, 0.5, 0.5, 0.5), // low confidence
            det(1, 0.9, 0.5, 0.5, 0.4), // wrong class
            det(0, 0.8, 0.9, 0.9, 0.2),
        ];
        let t = select_target(&dets, &cfg).unwrap();
        assert_eq!((t.cx, t.cy), (0.9, 0.9));
    }

    #[test]
    fn board_converts_to_pixels() {
        let board = ObservationBoard::new(TargetConfig::default());
        let now = Instant::now();
        let obs = board.publish_detections(&[det(0, 0.9, 0.9375, 0.0625, 0.1)], now);
        assert!(obs.present);
        assert_eq!(obs.zone, Zone::TopRight);
        assert_eq!(obs.center, (600.0, 30.0));
        assert_eq!(board.latest_observation(), obs);

        let obs = board.publish_detections(&[], now);
        assert!(!obs.present);
        assert_eq!(board.latest_observation().zone, Zone::Center);
    }
}
