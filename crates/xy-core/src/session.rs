use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::command::{VelocityCommand, VelocityVector};
use crate::error::CoreError;
use crate::link::{PerceptionSource, VehicleLink};
use crate::manual::{Key, ManualInputMapper};
use crate::mode::{ControlMode, ControlModeSwitch};
use crate::perception::{PerceptionMapper, TargetObservation};
use crate::profile::{ActiveProfile, FlightProfile};
use crate::streamer::{CommandStreamer, StreamCounters, StreamStats, StreamerHandle};
use crate::ControlConfig;

/// Read-only view for the operator console.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub ts_unix_ms: i64,
    pub mode: ControlMode,
    pub profile: &'static str,
    pub last_vector: VelocityVector,
    pub armed: bool,
    pub streaming: bool,
    #[serde(flatten)]
    pub stream: StreamCounters,
}

/// Owns the shared command, the mode switch, the active profile and both
/// mappers for one control session. Entry points take `&self` so the input
/// and perception collaborators can call in from their own threads.
pub struct ControlSession {
    command: Arc<VelocityCommand>,
    modes: ControlModeSwitch,
    profile: Arc<ActiveProfile>,
    manual: Mutex<ManualInputMapper>,
    perception: Mutex<PerceptionMapper>,
    link: Arc<dyn VehicleLink>,
    streamer: Mutex<Option<StreamerHandle>>,
    stats: Mutex<Arc<StreamStats>>,
    stop_timeout: Duration,
}

impl ControlSession {
    pub fn new(cfg: &ControlConfig, link: Arc<dyn VehicleLink>) -> Result<Self, CoreError> {
        let initial = FlightProfile::by_name(&cfg.default_profile)?;
        let command = Arc::new(VelocityCommand::new(ControlMode::Manual));
        let profile = Arc::new(ActiveProfile::new(initial));

        Ok(Self {
            modes: ControlModeSwitch::new(command.clone()),
            manual: Mutex::new(ManualInputMapper::new(command.clone(), profile.clone())),
            perception: Mutex::new(PerceptionMapper::new(
                cfg.perception(),
                command.clone(),
                profile.clone(),
            )),
            command,
            profile,
            link,
            streamer: Mutex::new(None),
            stats: Mutex::new(Arc::new(StreamStats::default())),
            stop_timeout: cfg.stop_timeout(),
        })
    }

    /// Starts the command streamer. Must be called inside a tokio runtime.
    pub fn start(&self) -> Result<(), CoreError> {
        let mut slot = lock(&self.streamer);
        if slot.as_ref().is_some_and(|h| !h.is_finished()) {
            return Err(CoreError::AlreadyRunning);
        }
        self.command.resume();
        let streamer = CommandStreamer::new(self.command.clone(), self.link.clone());
        *lock(&self.stats) = streamer.stats();
        *slot = Some(streamer.spawn());
        info!("session: started in {} mode, profile {}", self.modes.current(), self.profile.get().name);
        Ok(())
    }

    /// Tears the session down: drops held keys, halts the command at zero and
    /// waits until the streamer has sent its final zero. Input arriving after
    /// this is still mapped but never published.
    pub async fn stop(&self) -> Result<(), CoreError> {
        lock(&self.manual).release_all();
        self.command.halt();
        let handle = lock(&self.streamer).take().ok_or(CoreError::NotRunning)?;
        let res = handle.stop(self.stop_timeout).await;
        match &res {
            Ok(()) => info!("session: stopped"),
            Err(e) => warn!("session: stop incomplete: {}", e),
        }
        res
    }

    pub fn toggle_mode(&self) -> ControlMode {
        self.modes.toggle()
    }

    /// Hands control back to the operator with a zero command. Used when the
    /// vehicle is told to land or return home.
    pub fn disengage(&self) {
        self.modes.force(ControlMode::Manual);
    }

    pub fn set_profile(&self, name: &str) -> Result<&'static FlightProfile, CoreError> {
        self.profile.set(name)
    }

    pub fn on_key_down(&self, key: Key) -> VelocityVector {
        lock(&self.manual).on_key_down(key)
    }

    pub fn on_key_up(&self, key: Key) -> VelocityVector {
        lock(&self.manual).on_key_up(key)
    }

    pub fn on_observation(&self, obs: &TargetObservation) -> VelocityVector {
        lock(&self.perception).on_observation(obs)
    }

    /// Pulls the latest observation from `source` and maps it.
    pub fn poll_perception(&self, source: &dyn PerceptionSource) -> VelocityVector {
        let obs = source.latest_observation();
        self.on_observation(&obs)
    }

    pub fn mode(&self) -> ControlMode {
        self.modes.current()
    }

    pub fn command(&self) -> VelocityVector {
        self.command.snapshot()
    }

    pub fn status(&self) -> StatusSnapshot {
        let streaming = lock(&self.streamer).as_ref().is_some_and(|h| !h.is_finished());
        StatusSnapshot {
            ts_unix_ms: (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64,
            mode: self.modes.current(),
            profile: self.profile.get().name,
            last_vector: self.command.snapshot(),
            armed: self.link.is_armed(),
            streaming,
            stream: lock(&self.stats).counters(),
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streamer::tests::RecordingLink;
    use crate::zone::ZoneGrid;
    use std::time::Instant;

    const FRAME: ZoneGrid = ZoneGrid { width: 640, height: 480 };

    fn session(link: Arc<RecordingLink>) -> ControlSession {
        ControlSession::new(&ControlConfig::default(), link).unwrap()
    }

    struct FixedSource(TargetObservation);

    impl PerceptionSource for FixedSource {
        fn latest_observation(&self) -> TargetObservation {
            self.0
        }
    }

    #[test]
    fn scenario_forward_on_standard() {
        let s = session(RecordingLink::armed());
        s.on_key_down(Key::Forward);
        assert_eq!(s.command(), VelocityVector::new(3.0, 0.0, 0.0, 0.0));
    }

    #[test]
    fn switching_to_manual_zeroes_despite_held_keys() {
        let s = session(RecordingLink::armed());
        s.on_key_down(Key::Forward);
        assert_eq!(s.toggle_mode(), ControlMode::Autonomous);
        s.on_observation(&TargetObservation::detected(10.0, 10.0, FRAME, Instant::now()));
        assert!(!s.command().is_zero());

        assert_eq!(s.toggle_mode(), ControlMode::Manual);
        assert!(s.command().is_zero());
        // held key only takes effect on the next key event
        s.on_key_down(Key::Left);
        assert_eq!(s.command(), VelocityVector::new(3.0, -3.0, 0.0, 0.0));
    }

    #[test]
    fn autonomous_without_observation_is_zero() {
        let s = session(RecordingLink::armed());
        s.on_key_down(Key::Up);
        s.toggle_mode();
        assert!(s.command().is_zero());
        s.on_key_down(Key::Forward);
        assert!(s.command().is_zero());
    }

    #[test]
    fn scenario_performance_top_right() {
        let s = session(RecordingLink::armed());
        s.set_profile("performance").unwrap();
        s.toggle_mode();
        let src = FixedSource(TargetObservation::detected(620.0, 10.0, FRAME, Instant::now()));
        s.poll_perception(&src);
        assert_eq!(s.command(), VelocityVector::new(0.0, 4.5, -0.75, 0.0));
    }

    #[test]
    fn scenario_center_zeroes_previous_motion() {
        let s = session(RecordingLink::armed());
        s.toggle_mode();
        s.on_observation(&TargetObservation::detected(10.0, 470.0, FRAME, Instant::now()));
        assert!(!s.command().is_zero());
        s.on_observation(&TargetObservation::detected(320.0, 240.0, FRAME, Instant::now()));
        assert!(s.command().is_zero());
    }

    #[test]
    fn invalid_profile_is_rejected() {
        let s = session(RecordingLink::armed());
        s.set_profile("eco").unwrap();
        assert!(matches!(s.set_profile("sport"), Err(CoreError::InvalidProfileName(_))));
        assert_eq!(s.status().profile, "eco");
    }

    #[test]
    fn disengage_returns_to_manual() {
        let s = session(RecordingLink::armed());
        s.toggle_mode();
        s.on_observation(&TargetObservation::detected(10.0, 10.0, FRAME, Instant::now()));
        s.disengage();
        assert_eq!(s.mode(), ControlMode::Manual);
        assert!(s.command().is_zero());
    }

    #[tokio::test(start_paused = true)]
    async fn start_stop_lifecycle() {
        let link = RecordingLink::armed();
        let s = session(link.clone());
        assert!(matches!(s.stop().await, Err(CoreError::NotRunning)));

        s.start().unwrap();
        assert!(matches!(s.start(), Err(CoreError::AlreadyRunning)));
        s.on_key_down(Key::Forward);
        tokio::time::sleep(Duration::from_millis(320)).await;

        let st = s.status();
        assert!(st.streaming && st.armed);
        assert!(st.stream.ticks_sent >= 3);

        s.stop().await.unwrap();
        assert_eq!(link.sent().last(), Some(&VelocityVector::ZERO));
        assert!(link.sent().iter().any(|v| v.vx == 3.0));
        assert!(!s.status().streaming);
    }

    #[tokio::test(start_paused = true)]
    async fn input_after_stop_is_not_published() {
        let s = session(RecordingLink::armed());
        s.start().unwrap();
        s.stop().await.unwrap();

        assert_eq!(s.on_key_down(Key::Forward), VelocityVector::new(3.0, 0.0, 0.0, 0.0));
        s.toggle_mode();
        s.on_observation(&TargetObservation::detected(10.0, 10.0, FRAME, Instant::now()));
        let st = s.status();
        assert!(!st.streaming);
        assert!(st.last_vector.is_zero());

        s.start().unwrap();
        s.on_observation(&TargetObservation::detected(10.0, 10.0, FRAME, Instant::now()));
        assert!(!s.command().is_zero());
        s.stop().await.unwrap();
    }
}
