use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::mode::ControlMode;
use crate::profile::FlightProfile;

/// Body-frame velocity target: m/s forward, right, down and rad/s yaw rate.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct VelocityVector {
    pub vx: f64,
    pub vy: f64,
    pub vz: f64,
    pub yaw_rate: f64,
}

impl VelocityVector {
    pub const ZERO: VelocityVector = VelocityVector { vx: 0.0, vy: 0.0, vz: 0.0, yaw_rate: 0.0 };

    pub fn new(vx: f64, vy: f64, vz: f64, yaw_rate: f64) -> Self {
        Self { vx, vy, vz, yaw_rate }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    pub fn within(&self, p: &FlightProfile) -> bool {
        self.vx.abs() <= p.ground_speed
            && self.vy.abs() <= p.ground_speed
            && self.vz.abs() <= p.vertical_speed
            && self.yaw_rate.abs() <= p.yaw_rate
    }
}

#[derive(Debug)]
struct Slot {
    mode: ControlMode,
    vector: VelocityVector,
    revision: u64,
    /// Set while no session is running; publishes are rejected.
    halted: bool,
}

/// The single shared command.
///
/// Write authority and the vector live under one lock, so a publish can never
/// race a mode transition and a snapshot always sees all four fields from the
/// same write. The lock is only held for a copy.
#[derive(Debug)]
pub struct VelocityCommand {
    slot: Mutex<Slot>,
}

impl VelocityCommand {
    pub fn new(mode: ControlMode) -> Self {
        Self { slot: Mutex::new(Slot { mode, vector: VelocityVector::ZERO, revision: 0, halted: false }) }
    }

    /// Stores `v` if `author` currently holds write authority and the command
    /// is not halted. Returns whether it was stored; a rejected vector is
    /// dropped, not queued.
    pub fn publish_as(&self, author: ControlMode, v: VelocityVector) -> bool {
        let mut slot = self.lock();
        if slot.halted || slot.mode != author {
            return false;
        }
        slot.vector = v;
        slot.revision += 1;
        true
    }

    pub fn snapshot(&self) -> VelocityVector {
        self.lock().vector
    }

    pub fn zero(&self) {
        let mut slot = self.lock();
        slot.vector = VelocityVector::ZERO;
        slot.revision += 1;
    }

    /// Zeroes the vector and rejects every publish until [`resume`](Self::resume).
    pub fn halt(&self) {
        let mut slot = self.lock();
        slot.halted = true;
        slot.vector = VelocityVector::ZERO;
        slot.revision += 1;
    }

    /// Accepts publishes again, starting from a zero vector.
    pub fn resume(&self) {
        let mut slot = self.lock();
        slot.halted = false;
        slot.vector = VelocityVector::ZERO;
        slot.revision += 1;
    }

    pub fn is_halted(&self) -> bool {
        self.lock().halted
    }

    pub fn mode(&self) -> ControlMode {
        self.lock().mode
    }

    /// Number of stores since creation, zeroing included.
    pub fn revision(&self) -> u64 {
        self.lock().revision
    }

    /// Moves write authority to `next` and zeroes the vector in the same
    /// critical section. Returns the previous mode.
    pub(crate) fn hand_over(&self, next: impl FnOnce(ControlMode) -> ControlMode) -> (ControlMode, ControlMode) {
        let mut slot = self.lock();
        let prev = slot.mode;
        slot.mode = next(prev);
        slot.vector = VelocityVector::ZERO;
        slot.revision += 1;
        (prev, slot.mode)
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::STANDARD;
    use std::sync::Arc;

    #[test]
    fn only_owner_may_publish() {
        let cmd = VelocityCommand::new(ControlMode::Manual);
        let v = VelocityVector::new(1.0, 0.0, 0.0, 0.0);
        assert!(!cmd.publish_as(ControlMode::Autonomous, v));
        assert!(cmd.snapshot().is_zero());
        assert!(cmd.publish_as(ControlMode::Manual, v));
        assert_eq!(cmd.snapshot(), v);
    }

    #[test]
    fn hand_over_zeroes_in_same_step() {
        let cmd = VelocityCommand::new(ControlMode::Autonomous);
        cmd.publish_as(ControlMode::Autonomous, VelocityVector::new(0.0, 3.0, -0.5, 0.0));
        let (prev, now) = cmd.hand_over(ControlMode::other);
        assert_eq!((prev, now), (ControlMode::Autonomous, ControlMode::Manual));
        assert!(cmd.snapshot().is_zero());
    }

    #[test]
    fn halted_command_stays_zero() {
        let cmd = VelocityCommand::new(ControlMode::Manual);
        cmd.publish_as(ControlMode::Manual, VelocityVector::new(2.0, 0.0, 0.0, 0.0));
        cmd.halt();
        assert!(cmd.snapshot().is_zero());
        assert!(!cmd.publish_as(ControlMode::Manual, VelocityVector::new(3.0, 0.0, 0.0, 0.0)));
        cmd.hand_over(ControlMode::other);
        assert!(!cmd.publish_as(ControlMode::Autonomous, VelocityVector::new(0.0, 3.0, 0.0, 0.0)));
        assert!(cmd.snapshot().is_zero());

        cmd.resume();
        assert!(cmd.publish_as(ControlMode::Autonomous, VelocityVector::new(0.0, 3.0, 0.0, 0.0)));
    }

    #[test]
    fn bounds_check_against_profile() {
        assert!(VelocityVector::new(3.0, -3.0, 0.5, 0.1).within(&STANDARD));
        assert!(!VelocityVector::new(3.1, 0.0, 0.0, 0.0).within(&STANDARD));
    }

    #[test]
    fn snapshots_are_never_torn() {
        let cmd = Arc::new(VelocityCommand::new(ControlMode::Manual));
        let writer = {
            let cmd = cmd.clone();
            std::thread::spawn(move || {
                for i in 0..20_000 {
                    let s = f64::from(i % 7);
                    cmd.publish_as(ControlMode::Manual, VelocityVector::new(s, s, s, s));
                }
            })
        };
        for _ in 0..20_000 {
            let v = cmd.snapshot();
            assert!(v.vx == v.vy && v.vy == v.vz && v.vz == v.yaw_rate, "torn read: {:?}", v);
        }
        writer.join().unwrap();
    }
}
