use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use tracing::{debug, info};
use xy_core::{LinkError, VehicleLink, VelocityVector};

/// Stand-in vehicle for running without an autopilot. Always armed until it
/// is told to land.
#[derive(Debug)]
pub struct SimLink {
    armed: AtomicBool,
    received: AtomicU64,
    last: Mutex<VelocityVector>,
}

impl SimLink {
    pub fn new() -> Self {
        Self { armed: AtomicBool::new(true), received: AtomicU64::new(0), last: Mutex::new(VelocityVector::ZERO) }
    }

    pub fn takeoff(&self, alt_m: f32) {
        self.armed.store(true, Ordering::Relaxed);
        info!("sim: takeoff to {:.1}m", alt_m);
    }

    pub fn land(&self) {
        info!("sim: landed, disarming");
        self.armed.store(false, Ordering::Relaxed);
    }

    pub fn rtl(&self) {
        info!("sim: returning to launch");
    }
}

impl Default for SimLink {
    fn default() -> Self {
        Self::new()
    }
}

impl VehicleLink for SimLink {
    fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Relaxed)
    }

    fn send_velocity(&self, vx: f64, vy: f64, vz: f64, yaw_rate: f64) -> Result<(), LinkError> {
        let v = VelocityVector::new(vx, vy, vz, yaw_rate);
        let mut last = self.last.lock().map_err(|_| LinkError::Disconnected)?;
        if *last != v {
            info!("sim: velocity vx={:.2} vy={:.2} vz={:.2} yaw={:.2}", vx, vy, vz, yaw_rate);
        }
        *last = v;
        let n = self.received.fetch_add(1, Ordering::Relaxed) + 1;
        debug!("sim: {} commands received", n);
        Ok(())
    }
}
