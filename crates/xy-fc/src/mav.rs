use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use mavlink::{
    common::{
        MavAutopilot, MavCmd, MavFrame, MavMessage, MavModeFlag, MavState, MavType,
        PositionTargetTypemask, COMMAND_LONG_DATA, HEARTBEAT_DATA, SET_POSITION_TARGET_LOCAL_NED_DATA,
    },
    error::MessageReadError,
    MavHeader, MavlinkVersion,
};
use tokio::sync::watch;
use tokio_serial::SerialPort;
use tracing::{debug, info, warn};
use xy_core::{LinkError, VehicleLink};

use crate::safety::{CommandRateLimit, Guarded};
use crate::state::{CopterMode, FcStatus, FcSummary};
use crate::FcConfig;

/// Serial read/write timeout. Bounds every read the reader makes, so it
/// notices `close()`, and every write a sender makes.
pub const IO_TIMEOUT: Duration = Duration::from_millis(100);

/// Longest a single `poll_once` keeps reading, idle port or not.
pub const POLL_BUDGET: Duration = Duration::from_millis(250);

/// Position, acceleration and yaw ignored: velocity + yaw rate are honoured.
pub fn velocity_yaw_rate_mask() -> PositionTargetTypemask {
    use PositionTargetTypemask as M;
    M::POSITION_TARGET_TYPEMASK_X_IGNORE
        | M::POSITION_TARGET_TYPEMASK_Y_IGNORE
        | M::POSITION_TARGET_TYPEMASK_Z_IGNORE
        | M::POSITION_TARGET_TYPEMASK_AX_IGNORE
        | M::POSITION_TARGET_TYPEMASK_AY_IGNORE
        | M::POSITION_TARGET_TYPEMASK_AZ_IGNORE
        | M::POSITION_TARGET_TYPEMASK_YAW_IGNORE
}

#[allow(deprecated)]
pub fn velocity_target(
    target_sys: u8,
    target_comp: u8,
    time_boot_ms: u32,
    vx: f64,
    vy: f64,
    vz: f64,
    yaw_rate: f64,
) -> SET_POSITION_TARGET_LOCAL_NED_DATA {
    SET_POSITION_TARGET_LOCAL_NED_DATA {
        time_boot_ms,
        target_system: target_sys,
        target_component: target_comp,
        coordinate_frame: MavFrame::MAV_FRAME_BODY_NED,
        type_mask: velocity_yaw_rate_mask(),
        x: 0.0,
        y: 0.0,
        z: 0.0,
        vx: vx as f32,
        vy: vy as f32,
        vz: vz as f32,
        afx: 0.0,
        afy: 0.0,
        afz: 0.0,
        yaw: 0.0,
        yaw_rate: yaw_rate as f32,
    }
}

type Reader = Box<dyn Read + Send>;
type Writer = Box<dyn Write + Send>;

// caps the time one poll spends in the frame parser, which otherwise keeps
// reading through bytes that never form a frame
struct Budgeted {
    inner: Reader,
    until: Instant,
}

impl Read for Budgeted {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if Instant::now() >= self.until {
            return Err(std::io::Error::new(ErrorKind::TimedOut, "poll budget spent"));
        }
        self.inner.read(buf)
    }
}

/// MAVLink v2 link to the autopilot.
///
/// Reads and writes go through separate handles behind separate locks: a
/// reader waiting on a silent port never holds up a velocity send.
pub struct FcLink {
    reader: Mutex<Budgeted>,
    writer: Mutex<Writer>,
    sys_id: u8,
    comp_id: u8,
    sequence: AtomicU8,
    target_sys: u8,
    target_comp: u8,
    status: watch::Sender<FcStatus>,
    limiter: Mutex<CommandRateLimit>,
    allow_rtl: bool,
    allow_land: bool,
    require_heartbeat: bool,
    stale_after: Duration,
    started: Instant,
    closed: AtomicBool,
}

impl FcLink {
    pub fn open(dev: &str, baud: u32, cfg: &FcConfig) -> Result<Self> {
        let port = tokio_serial::new(dev, baud)
            .timeout(IO_TIMEOUT)
            .open()
            .with_context(|| format!("open fc serial device {}", dev))?;
        let writer = port.try_clone().with_context(|| format!("clone fc serial handle {}", dev))?;

        let link = Self::from_io(Box::new(port), Box::new(writer), cfg);
        link.status.send_modify(|st| {
            st.port = Some(dev.to_string());
            st.baud = Some(baud);
        });
        Ok(link)
    }

    /// Builds a link over any byte transport. `reader` should return
    /// `TimedOut`/`WouldBlock` when idle rather than block indefinitely.
    pub fn from_io(reader: Reader, writer: Writer, cfg: &FcConfig) -> Self {
        Self {
            reader: Mutex::new(Budgeted { inner: reader, until: Instant::now() }),
            writer: Mutex::new(writer),
            sys_id: cfg.sys_id,
            comp_id: cfg.comp_id,
            sequence: AtomicU8::new(0),
            target_sys: cfg.target_sys,
            target_comp: cfg.target_comp,
            status: watch::channel(FcStatus::default()).0,
            limiter: Mutex::new(CommandRateLimit::new(Duration::from_secs(2))),
            allow_rtl: cfg.allow_rtl,
            allow_land: cfg.allow_land,
            require_heartbeat: cfg.require_heartbeat,
            stale_after: Duration::from_millis(cfg.telemetry_stale_ms.unwrap_or(3000)),
            started: Instant::now(),
            closed: AtomicBool::new(false),
        }
    }

    /// Reads at most one message, waiting no longer than the transport's read
    /// timeout. Telemetry from the target system updates the shared status.
    /// Ok(None) means nothing usable arrived in time.
    pub fn poll_once(&self) -> Result<Option<MavMessage>> {
        let res = {
            let mut r = lock(&self.reader);
            r.until = Instant::now() + POLL_BUDGET;
            mavlink::read_versioned_msg::<MavMessage, _>(&mut *r, MavlinkVersion::V2)
        };
        let (hdr, msg) = match res {
            Ok(m) => m,
            Err(MessageReadError::Io(e)) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                return Ok(None);
            }
            Err(MessageReadError::Io(e)) => return Err(e).context("fc read"),
            Err(e) => {
                debug!("fc recv: {}", e);
                return Ok(None);
            }
        };
        if hdr.system_id != self.target_sys {
            return Ok(Some(msg));
        }
        match &msg {
            MavMessage::HEARTBEAT(hb) if hb.autopilot != MavAutopilot::MAV_AUTOPILOT_INVALID => {
                let now = Instant::now();
                self.status.send_modify(|st| {
                    let was_armed = st.armed;
                    st.apply_heartbeat(hb, now);
                    if was_armed != st.armed {
                        info!("fc: armed={:?} mode={:?}", st.armed, st.custom_mode.and_then(CopterMode::from_custom_mode));
                    }
                });
            }
            MavMessage::SYS_STATUS(s) => self.status.send_modify(|st| st.apply_sys_status(s)),
            _ => {}
        }
        Ok(Some(msg))
    }

    /// Reader loop in a blocking task. Also sends the companion heartbeat at
    /// `hb_hz`. Exits within one read timeout of `close()`.
    pub fn spawn_reader(self: &Arc<Self>, hb_hz: f32) -> tokio::task::JoinHandle<()> {
        let link = self.clone();
        tokio::task::spawn_blocking(move || {
            let hb_interval = Duration::from_secs_f32(1.0 / hb_hz.max(0.2));
            let mut last_hb_send: Option<Instant> = None;

            while !link.closed.load(Ordering::Relaxed) {
                if last_hb_send.map_or(true, |t| t.elapsed() >= hb_interval) {
                    if let Err(e) = link.send_heartbeat() {
                        warn!("fc heartbeat send failed: {:#}", e);
                    }
                    last_hb_send = Some(Instant::now());
                }
                if let Err(e) = link.poll_once() {
                    debug!("fc reader: {:#}", e);
                    std::thread::sleep(IO_TIMEOUT);
                }
            }
            debug!("fc reader: closed");
        })
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }

    pub fn telemetry(&self) -> FcSummary {
        self.status.borrow().summary(self.stale_after, Instant::now())
    }

    /// Waits up to `timeout` for the first autopilot heartbeat.
    pub async fn wait_heartbeat(&self, timeout: Duration) -> bool {
        self.wait_status(timeout, |s| s.last_heartbeat.is_some()).await
    }

    /// Waits up to `timeout` for an armed heartbeat.
    pub async fn wait_armed(&self, timeout: Duration) -> bool {
        self.wait_status(timeout, |s| s.armed == Some(true)).await
    }

    /// Waits up to `timeout` for the autopilot to report `mode`.
    pub async fn wait_mode(&self, mode: CopterMode, timeout: Duration) -> bool {
        self.wait_status(timeout, move |s| s.custom_mode == Some(mode.custom_mode())).await
    }

    async fn wait_status(&self, timeout: Duration, pred: impl FnMut(&FcStatus) -> bool) -> bool {
        let mut rx = self.status.subscribe();
        let seen = matches!(tokio::time::timeout(timeout, rx.wait_for(pred)).await, Ok(Ok(_)));
        seen
    }

    pub fn send_heartbeat(&self) -> Result<()> {
        let hb = HEARTBEAT_DATA {
            custom_mode: 0,
            mavtype: MavType::MAV_TYPE_ONBOARD_CONTROLLER,
            autopilot: MavAutopilot::MAV_AUTOPILOT_INVALID,
            base_mode: MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED,
            system_status: MavState::MAV_STATE_ACTIVE,
            mavlink_version: 3,
        };
        self.send(MavMessage::HEARTBEAT(hb))
    }

    pub fn set_mode(&self, mode: CopterMode) -> Result<()> {
        self.ensure_heartbeat("mode change")?;
        info!("FC: set mode {:?}", mode);
        // param1: MAV_MODE_FLAG_CUSTOM_MODE_ENABLED
        self.command_long(MavCmd::MAV_CMD_DO_SET_MODE, [1.0, mode.custom_mode() as f32, 0.0, 0.0, 0.0, 0.0, 0.0])
    }

    pub fn cmd_rtl(&self) -> Result<()> {
        if !self.allow_rtl {
            anyhow::bail!("FC RTL command disabled by config");
        }
        if !self.guard(Guarded::Rtl, "RTL")? {
            return Ok(());
        }
        info!("FC: sending RTL");
        self.command_long(MavCmd::MAV_CMD_NAV_RETURN_TO_LAUNCH, [0.0; 7])
    }

    pub fn cmd_land(&self) -> Result<()> {
        if !self.allow_land {
            anyhow::bail!("FC LAND command disabled by config");
        }
        if !self.guard(Guarded::Land, "LAND")? {
            return Ok(());
        }
        info!("FC: sending LAND");
        self.command_long(MavCmd::MAV_CMD_NAV_LAND, [0.0; 7])
    }

    pub fn cmd_takeoff(&self, alt_m: f32) -> Result<()> {
        anyhow::ensure!(alt_m > 0.0 && alt_m <= 50.0, "takeoff altitude {}m out of range", alt_m);
        if !self.is_armed() {
            anyhow::bail!("refusing TAKEOFF: vehicle not armed");
        }
        if !self.guard(Guarded::Takeoff, "TAKEOFF")? {
            return Ok(());
        }
        info!("FC: sending TAKEOFF to {:.1}m", alt_m);
        self.command_long(MavCmd::MAV_CMD_NAV_TAKEOFF, [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, alt_m])
    }

    // heartbeat precondition + rate limit; Ok(false) means rate-limited
    fn guard(&self, cmd: Guarded, what: &str) -> Result<bool> {
        self.ensure_heartbeat(what)?;
        let allowed = lock(&self.limiter).allow(cmd);
        if !allowed {
            warn!("{} rate-limited", what);
        }
        Ok(allowed)
    }

    fn ensure_heartbeat(&self, what: &str) -> Result<()> {
        if self.require_heartbeat && self.status.borrow().last_heartbeat.is_none() {
            anyhow::bail!("refusing {}: no heartbeat seen yet", what);
        }
        Ok(())
    }

    fn command_long(&self, command: MavCmd, p: [f32; 7]) -> Result<()> {
        let cmd = COMMAND_LONG_DATA {
            target_system: self.target_sys,
            target_component: self.target_comp,
            command: command.into(),
            confirmation: 0,
            param1: p[0],
            param2: p[1],
            param3: p[2],
            param4: p[3],
            param5: p[4],
            param6: p[5],
            param7: p[6],
        };
        self.send(MavMessage::COMMAND_LONG(cmd))
    }

    fn send(&self, msg: MavMessage) -> Result<()> {
        let hdr = MavHeader {
            system_id: self.sys_id,
            component_id: self.comp_id,
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
        };
        let mut w = lock(&self.writer);
        mavlink::write_versioned_msg(&mut *w, MavlinkVersion::V2, hdr, &msg).context("mavlink send")?;
        w.flush().context("mavlink flush")?;
        Ok(())
    }

    fn time_boot_ms(&self) -> u32 {
        self.started.elapsed().as_millis() as u32
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl VehicleLink for FcLink {
    fn is_armed(&self) -> bool {
        self.status.borrow().armed_within(self.stale_after, Instant::now()) == Some(true)
    }

    fn send_velocity(&self, vx: f64, vy: f64, vz: f64, yaw_rate: f64) -> Result<(), LinkError> {
        if self.require_heartbeat && self.status.borrow().last_heartbeat.is_none() {
            return Err(LinkError::Rejected("no heartbeat seen yet".into()));
        }
        let target = velocity_target(self.target_sys, self.target_comp, self.time_boot_ms(), vx, vy, vz, yaw_rate);
        self.send(MavMessage::SET_POSITION_TARGET_LOCAL_NED(target))
            .map_err(|e| LinkError::Transmit(format!("{:#}", e)))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Idle serial port: every read times out, nothing ever arrives.
    pub(crate) struct SilentPort;

    impl Read for SilentPort {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            std::thread::sleep(Duration::from_millis(20));
            Err(std::io::Error::new(ErrorKind::TimedOut, "idle"))
        }
    }

    /// Port streaming bytes that never contain a MAVLink v2 start marker.
    pub(crate) struct NoisePort;

    impl Read for NoisePort {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            buf.fill(0x55);
            Ok(buf.len())
        }
    }

    #[derive(Clone, Default)]
    pub(crate) struct Capture(pub Arc<Mutex<Vec<u8>>>);

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    pub(crate) fn test_config() -> FcConfig {
        FcConfig {
            enable: true,
            autodetect: false,
            serial_dev: None,
            baud: None,
            candidate_devs: None,
            candidate_bauds: None,
            heartbeat_timeout_ms: None,
            sys_id: 255,
            comp_id: 190,
            target_sys: 1,
            target_comp: 1,
            allow_rtl: true,
            allow_land: true,
            require_heartbeat: false,
            send_heartbeat_hz: None,
            arm_wait_ms: None,
            telemetry_stale_ms: None,
        }
    }

    fn autopilot_heartbeat(armed: bool, custom_mode: u32) -> Vec<u8> {
        let mut base_mode = MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED;
        if armed {
            base_mode |= MavModeFlag::MAV_MODE_FLAG_SAFETY_ARMED;
        }
        let hb = HEARTBEAT_DATA {
            custom_mode,
            mavtype: MavType::MAV_TYPE_QUADROTOR,
            autopilot: MavAutopilot::MAV_AUTOPILOT_ARDUPILOTMEGA,
            base_mode,
            system_status: MavState::MAV_STATE_ACTIVE,
            mavlink_version: 3,
        };
        let hdr = MavHeader { system_id: 1, component_id: 1, sequence: 0 };
        let mut buf = Vec::new();
        mavlink::write_versioned_msg(&mut buf, MavlinkVersion::V2, hdr, &MavMessage::HEARTBEAT(hb)).unwrap();
        buf
    }

    #[tokio::test]
    async fn silent_autopilot_does_not_block_sends() {
        let out = Capture::default();
        let link = Arc::new(FcLink::from_io(Box::new(SilentPort), Box::new(out.clone()), &test_config()));
        let reader = link.spawn_reader(1.0);
        tokio::time::sleep(Duration::from_millis(60)).await;

        let t0 = Instant::now();
        for _ in 0..5 {
            link.send_velocity(1.0, 0.0, 0.0, 0.0).unwrap();
        }
        assert!(t0.elapsed() < Duration::from_millis(200), "sends took {:?}", t0.elapsed());
        assert_eq!(out.0.lock().unwrap().first(), Some(&0xFD));
        assert!(!link.is_armed());

        link.close();
        tokio::time::timeout(Duration::from_secs(1), reader).await.unwrap().unwrap();
    }

    #[test]
    fn noisy_port_poll_is_bounded() {
        let link = FcLink::from_io(Box::new(NoisePort), Box::new(Capture::default()), &test_config());
        let t0 = Instant::now();
        assert!(link.poll_once().unwrap().is_none());
        assert!(t0.elapsed() < POLL_BUDGET + Duration::from_millis(250));
    }

    #[tokio::test]
    async fn heartbeat_updates_status_and_waits() {
        let bytes = autopilot_heartbeat(true, CopterMode::Guided.custom_mode());
        let link = FcLink::from_io(Box::new(std::io::Cursor::new(bytes)), Box::new(Capture::default()), &test_config());
        assert!(!link.wait_heartbeat(Duration::from_millis(10)).await);

        assert!(matches!(link.poll_once().unwrap(), Some(MavMessage::HEARTBEAT(_))));
        assert!(link.is_armed());
        assert_eq!(link.telemetry().mode.as_deref(), Some("GUIDED"));
        assert!(link.wait_armed(Duration::from_millis(10)).await);
        assert!(link.wait_mode(CopterMode::Guided, Duration::from_millis(10)).await);
        assert!(!link.wait_mode(CopterMode::Land, Duration::from_millis(10)).await);

        // exhausted transport surfaces as a read error
        assert!(link.poll_once().is_err());
    }

    #[test]
    fn mask_keeps_velocity_and_yaw_rate() {
        let m = velocity_yaw_rate_mask();
        assert_eq!(m.bits(), 0x05C7);
        assert!(!m.contains(PositionTargetTypemask::POSITION_TARGET_TYPEMASK_VX_IGNORE));
        assert!(!m.contains(PositionTargetTypemask::POSITION_TARGET_TYPEMASK_YAW_RATE_IGNORE));
    }

    #[test]
    fn velocity_target_fields() {
        let t = velocity_target(1, 1, 1234, 3.0, -4.5, -0.75, 0.5);
        assert_eq!((t.target_system, t.target_component, t.time_boot_ms), (1, 1, 1234));
        assert_eq!((t.vx, t.vy, t.vz, t.yaw_rate), (3.0, -4.5, -0.75, 0.5));
        assert_eq!(t.coordinate_frame, MavFrame::MAV_FRAME_BODY_NED);
        assert_eq!((t.x, t.afx, t.yaw), (0.0, 0.0, 0.0));
    }
}
