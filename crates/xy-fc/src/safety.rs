use std::time::{Duration, Instant};

/// High-level commands subject to rate limiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guarded {
    Rtl,
    Land,
    Takeoff,
}

/// Rejects repeats of the same high-level command within `min_interval`,
/// so a held key can't flood the autopilot with COMMAND_LONGs.
#[derive(Debug)]
pub struct CommandRateLimit {
    last: [Option<Instant>; 3],
    min_interval: Duration,
}

impl CommandRateLimit {
    pub fn new(min_interval: Duration) -> Self {
        Self { last: [None; 3], min_interval }
    }

    pub fn allow(&mut self, cmd: Guarded) -> bool {
        self.allow_at(cmd, Instant::now())
    }

    pub fn allow_at(&mut self, cmd: Guarded, now: Instant) -> bool {
        let slot = &mut self.last[cmd as usize];
        if let Some(t) = *slot {
            if now.saturating_duration_since(t) < self.min_interval {
                return false;
            }
        }
        *slot = Some(now);
        true
    }
}
