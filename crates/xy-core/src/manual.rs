use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, trace};

use crate::command::{VelocityCommand, VelocityVector};
use crate::mode::ControlMode;
use crate::profile::{ActiveProfile, FlightProfile};

/// Logical direction keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Key {
    Forward,
    Backward,
    Left,
    Right,
    Up,
    Down,
    YawLeft,
    YawRight,
}

impl Key {
    /// Maps the symbolic identifiers delivered by the input layer.
    pub fn from_symbol(sym: &str) -> Option<Key> {
        let key = match sym.trim().to_ascii_lowercase().as_str() {
            "w" | "forward" => Key::Forward,
            "s" | "backward" | "back" => Key::Backward,
            "a" | "left_strafe" => Key::Left,
            "d" | "right_strafe" => Key::Right,
            "q" | "up" => Key::Up,
            "e" | "down" => Key::Down,
            "left" | "yaw_left" => Key::YawLeft,
            "right" | "yaw_right" => Key::YawRight,
            _ => return None,
        };
        Some(key)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Keys currently held down.
#[derive(Debug, Clone, Default)]
pub struct ManualKeyState {
    held: HashSet<Key>,
}

impl ManualKeyState {
    pub fn press(&mut self, key: Key) -> bool {
        self.held.insert(key)
    }

    pub fn release(&mut self, key: Key) -> bool {
        self.held.remove(&key)
    }

    pub fn is_held(&self, key: Key) -> bool {
        self.held.contains(&key)
    }

    pub fn clear(&mut self) {
        self.held.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }

    /// `rate` if only `pos` is held, `-rate` if only `neg` is, zero otherwise.
    fn axis(&self, pos: Key, neg: Key, rate: f64) -> f64 {
        match (self.is_held(pos), self.is_held(neg)) {
            (true, false) => rate,
            (false, true) => -rate,
            _ => 0.0,
        }
    }

    /// Velocity for the held keys. Up is negative z (NED).
    pub fn velocity(&self, p: &FlightProfile) -> VelocityVector {
        VelocityVector {
            vx: self.axis(Key::Forward, Key::Backward, p.ground_speed),
            vy: self.axis(Key::Right, Key::Left, p.ground_speed),
            vz: self.axis(Key::Down, Key::Up, p.vertical_speed),
            yaw_rate: self.axis(Key::YawRight, Key::YawLeft, p.yaw_rate),
        }
    }
}

/// Turns key transitions into velocity commands under MANUAL authority.
#[derive(Debug)]
pub struct ManualInputMapper {
    keys: ManualKeyState,
    command: Arc<VelocityCommand>,
    profile: Arc<ActiveProfile>,
    last: VelocityVector,
}

impl ManualInputMapper {
    pub fn new(command: Arc<VelocityCommand>, profile: Arc<ActiveProfile>) -> Self {
        Self { keys: ManualKeyState::default(), command, profile, last: VelocityVector::ZERO }
    }

    pub fn on_key_down(&mut self, key: Key) -> VelocityVector {
        self.keys.press(key);
        self.recompute()
    }

    pub fn on_key_up(&mut self, key: Key) -> VelocityVector {
        self.keys.release(key);
        self.recompute()
    }

    /// Recomputes from the held keys and publishes if MANUAL owns the command.
    pub fn recompute(&mut self) -> VelocityVector {
        let v = self.keys.velocity(self.profile.get());
        self.last = v;
        if self.command.publish_as(ControlMode::Manual, v) {
            debug!("manual: {:?}", v);
        } else {
            trace!("manual: not owner, discarded {:?}", v);
        }
        v
    }

    /// Last computed vector, published or not.
    pub fn last_computed(&self) -> VelocityVector {
        self.last
    }

    pub fn keys(&self) -> &ManualKeyState {
        &self.keys
    }

    /// Drops every held key without publishing anything.
    pub fn release_all(&mut self) {
        self.keys.clear();
        self.last = VelocityVector::ZERO;
    }
}
