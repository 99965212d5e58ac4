use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use crate::command::{VelocityCommand, VelocityVector};
use crate::error::{CoreError, LinkError};
use crate::link::VehicleLink;

/// Refresh period; must stay well below the autopilot's velocity-hold timeout.
pub const STREAM_PERIOD: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Sent(VelocityVector),
    /// Vehicle not armed; nothing transmitted.
    DisarmedSkip,
    /// Transmission failed; retried with the latest snapshot next tick.
    LinkError(LinkError),
}

#[derive(Debug, Default)]
pub struct StreamStats {
    sent: AtomicU64,
    skipped: AtomicU64,
    errors: AtomicU64,
    consecutive_errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StreamCounters {
    pub ticks_sent: u64,
    pub ticks_skipped: u64,
    pub link_errors: u64,
    pub consecutive_link_errors: u64,
}

impl StreamStats {
    pub fn counters(&self) -> StreamCounters {
        StreamCounters {
            ticks_sent: self.sent.load(Ordering::Relaxed),
            ticks_skipped: self.skipped.load(Ordering::Relaxed),
            link_errors: self.errors.load(Ordering::Relaxed),
            consecutive_link_errors: self.consecutive_errors.load(Ordering::Relaxed),
        }
    }

    fn record(&self, outcome: &TickOutcome) {
        match outcome {
            TickOutcome::Sent(_) => {
                self.sent.fetch_add(1, Ordering::Relaxed);
                self.consecutive_errors.store(0, Ordering::Relaxed);
            }
            TickOutcome::DisarmedSkip => {
                self.skipped.fetch_add(1, Ordering::Relaxed);
            }
            TickOutcome::LinkError(_) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                self.consecutive_errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Periodically forwards the latest command to the vehicle while armed.
pub struct CommandStreamer {
    command: Arc<VelocityCommand>,
    link: Arc<dyn VehicleLink>,
    stats: Arc<StreamStats>,
    period: Duration,
}

impl CommandStreamer {
    pub fn new(command: Arc<VelocityCommand>, link: Arc<dyn VehicleLink>) -> Self {
        Self { command, link, stats: Arc::new(StreamStats::default()), period: STREAM_PERIOD }
    }

    pub fn stats(&self) -> Arc<StreamStats> {
        self.stats.clone()
    }

    /// One cycle: arm check, snapshot, send.
    pub fn tick(&self) -> TickOutcome {
        let outcome = if !self.link.is_armed() {
            TickOutcome::DisarmedSkip
        } else {
            let v = self.command.snapshot();
            match self.link.send_velocity(v.vx, v.vy, v.vz, v.yaw_rate) {
                Ok(()) => TickOutcome::Sent(v),
                Err(e) => TickOutcome::LinkError(e),
            }
        };

        match &outcome {
            TickOutcome::Sent(v) => trace!("stream: sent {:?}", v),
            TickOutcome::DisarmedSkip => trace!("stream: disarmed, skip"),
            TickOutcome::LinkError(e) => warn!("stream: {} (retrying next tick)", e),
        }
        self.stats.record(&outcome);
        outcome
    }

    /// Zeroes the shared command and transmits it once, if armed.
    fn send_final_zero(&self) {
        self.command.zero();
        if !self.link.is_armed() {
            debug!("stream: disarmed at stop, final zero not transmitted");
            return;
        }
        let z = VelocityVector::ZERO;
        match self.link.send_velocity(z.vx, z.vy, z.vz, z.yaw_rate) {
            Ok(()) => info!("stream: final zero command sent"),
            Err(e) => warn!("stream: final zero command failed: {}", e),
        }
    }

    /// Spawns the periodic task on the current tokio runtime.
    pub fn spawn(self) -> StreamerHandle {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let stats = self.stats.clone();

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!("stream: started ({} ms period)", self.period.as_millis());

            loop {
                tokio::select! {
                    biased;
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        self.tick();
                    }
                }
            }

            self.send_final_zero();
            info!("stream: stopped");
        });

        StreamerHandle { stop_tx: Some(stop_tx), join: Some(join), stats }
    }
}

pub struct StreamerHandle {
    stop_tx: Option<oneshot::Sender<()>>,
    join: Option<JoinHandle<()>>,
    stats: Arc<StreamStats>,
}

impl StreamerHandle {
    pub fn stats(&self) -> &StreamStats {
        &self.stats
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Signals the task and waits, at most `timeout`, until the final zero
    /// command has gone out.
    pub async fn stop(mut self, timeout: Duration) -> Result<(), CoreError> {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        let Some(join) = self.join.take() else {
            return Ok(());
        };
        match tokio::time::timeout(timeout, join).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(CoreError::StreamerJoin(e.to_string())),
            Err(_) => Err(CoreError::StopTimeout(timeout)),
        }
    }
}

impl Drop for StreamerHandle {
    fn drop(&mut self) {
        // not awaited: the task still sends its final zero on its own
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
    }
}
