mod console;
mod sim;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use xy_core::profile::ALL_PROFILES;
use xy_core::{ControlConfig, ControlSession, FlightProfile, TargetObservation, VehicleLink, ZoneGrid};
use xy_fc::autodetect::{autodetect_fc, AutodetectResult};
use xy_fc::mav::FcLink;
use xy_fc::state::{CopterMode, FcSummary};
use xy_fc::FcConfig;
use xy_vision::{ObservationBoard, TargetConfig};

use console::ConsoleCmd;
use sim::SimLink;

/// How often the session pulls the latest observation.
const PERCEPTION_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Parser)]
#[command(name = "elevatexy", version, about = "ElevateXY - keyboard and target-tracking velocity control")]
struct Cli {
    #[arg(long)]
    config: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate the config file.
    Doctor,
    /// List the flight profiles.
    Profiles,
    /// Start a control session reading operator commands from stdin.
    Run,
    Fc { #[command(subcommand)] cmd: FcCmd },
}

#[derive(Debug, Subcommand)]
enum FcCmd {
    /// Probe serial ports/bauds for MAVLink heartbeats.
    Autodetect,
}

#[derive(Debug, serde::Deserialize)]
struct Config {
    #[serde(default)]
    control: ControlConfig,
    #[serde(default)]
    vision: TargetConfig,
    fc: Option<FcConfig>,
}

fn load_config(path: &str) -> Result<Config> {
    let s = std::fs::read_to_string(path).context("read config")?;
    toml::from_str(&s).context("parse config toml")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;

    match cli.cmd {
        Command::Doctor => doctor(&cfg)?,
        Command::Profiles => profiles(),
        Command::Run => run(&cfg).await?,
        Command::Fc { cmd } => fc_cmd(&cfg, cmd)?,
    }
    Ok(())
}

fn doctor(cfg: &Config) -> Result<()> {
    info!("doctor: starting");

    let c = &cfg.control;
    FlightProfile::by_name(&c.default_profile).context("control.default_profile")?;
    anyhow::ensure!(c.dead_zone_h_px >= 0.0 && c.dead_zone_v_px >= 0.0, "control dead zones must be >= 0");
    anyhow::ensure!(
        (100..=5000).contains(&c.observation_max_age_ms),
        "control.observation_max_age_ms should be 100..5000"
    );
    anyhow::ensure!(c.stop_timeout_ms >= 200, "control.stop_timeout_ms too small");

    let v = &cfg.vision;
    anyhow::ensure!(v.frame_width >= 3 && v.frame_height >= 3, "vision frame too small for a 3x3 grid");
    anyhow::ensure!((0.0..=1.0).contains(&v.min_conf), "vision.min_conf must be 0..1");
    anyhow::ensure!(
        c.dead_zone_h_px < f64::from(v.frame_width) / 2.0 && c.dead_zone_v_px < f64::from(v.frame_height) / 2.0,
        "dead zones cover the whole frame"
    );

    match &cfg.fc {
        Some(fc) if fc.enable => {
            if fc.autodetect {
                info!("doctor: fc autodetect enabled (OK)");
            } else {
                anyhow::ensure!(fc.serial_dev.as_ref().map(|s| !s.is_empty()).unwrap_or(false), "fc.serial_dev missing");
                anyhow::ensure!(fc.baud.unwrap_or(0) > 0, "fc.baud invalid");
            }
            anyhow::ensure!(fc.send_heartbeat_hz.unwrap_or(1.0) > 0.0, "fc.send_heartbeat_hz must be > 0");
        }
        _ => info!("doctor: fc disabled, simulated vehicle will be used"),
    }

    info!("doctor: OK");
    Ok(())
}

fn profiles() {
    for p in ALL_PROFILES {
        println!("{}", p);
    }
}

fn fc_cmd(cfg: &Config, cmd: FcCmd) -> Result<()> {
    match cmd {
        FcCmd::Autodetect => {
            let fc = cfg.fc.as_ref().context("no [fc] config section")?;
            anyhow::ensure!(fc.enable, "fc.enable=false");
            let res = autodetect_fc(fc)?;
            if let Some((dev, baud)) = &res.chosen {
                println!("CHOSEN: {} @ {}", dev, baud);
            } else {
                println!("CHOSEN: none");
            }
            print_probes(&res);
            Ok(())
        }
    }
}

fn print_probes(res: &AutodetectResult) {
    for p in &res.probes {
        println!("probe dev={} baud={} hb={} {}ms note={}", p.dev, p.baud, p.hb_seen, p.elapsed_ms, p.note);
    }
}

fn resolve_fc_port(fc: &FcConfig) -> Result<(String, u32)> {
    if fc.autodetect {
        let res = autodetect_fc(fc)?;
        if let Some((dev, baud)) = res.chosen {
            return Ok((dev, baud));
        }
        anyhow::bail!("fc autodetect failed: no heartbeat found");
    } else {
        let dev = fc.serial_dev.clone().context("fc.serial_dev missing (autodetect=false)")?;
        let baud = fc.baud.context("fc.baud missing (autodetect=false)")?;
        Ok((dev, baud))
    }
}

/// Vehicle behind the session, plus the operations outside the core.
enum Vehicle {
    Fc(Arc<FcLink>),
    Sim(Arc<SimLink>),
}

impl Vehicle {
    fn link(&self) -> Arc<dyn VehicleLink> {
        match self {
            Vehicle::Fc(l) => l.clone() as Arc<dyn VehicleLink>,
            Vehicle::Sim(l) => l.clone() as Arc<dyn VehicleLink>,
        }
    }

    fn takeoff(&self, alt_m: f32) -> Result<()> {
        match self {
            Vehicle::Fc(l) => l.cmd_takeoff(alt_m),
            Vehicle::Sim(l) => {
                l.takeoff(alt_m);
                Ok(())
            }
        }
    }

    fn land(&self) -> Result<()> {
        match self {
            Vehicle::Fc(l) => l.cmd_land(),
            Vehicle::Sim(l) => {
                l.land();
                Ok(())
            }
        }
    }

    fn rtl(&self) -> Result<()> {
        match self {
            Vehicle::Fc(l) => l.cmd_rtl(),
            Vehicle::Sim(l) => {
                l.rtl();
                Ok(())
            }
        }
    }

    fn telemetry(&self) -> Option<FcSummary> {
        match self {
            Vehicle::Fc(l) => Some(l.telemetry()),
            Vehicle::Sim(_) => None,
        }
    }

    fn close(&self) {
        if let Vehicle::Fc(l) = self {
            l.close();
        }
    }
}

async fn connect_vehicle(cfg: &Config) -> Result<Vehicle> {
    let Some(fc) = cfg.fc.as_ref().filter(|fc| fc.enable) else {
        info!("run: fc disabled, using simulated vehicle");
        return Ok(Vehicle::Sim(Arc::new(SimLink::new())));
    };

    let (dev, baud) = resolve_fc_port(fc)?;
    let link = Arc::new(FcLink::open(&dev, baud, fc).context("FC open")?);
    link.spawn_reader(fc.send_heartbeat_hz.unwrap_or(1.0));
    info!("run: fc link on {} @ {}", dev, baud);
    let hb_wait = Duration::from_millis(fc.heartbeat_timeout_ms.unwrap_or(1500));
    if !link.wait_heartbeat(hb_wait).await {
        warn!("run: no autopilot heartbeat within {:?}", hb_wait);
    }

    // velocity targets are only honoured in GUIDED
    match link.set_mode(CopterMode::Guided) {
        Ok(()) if link.wait_mode(CopterMode::Guided, Duration::from_secs(3)).await => info!("run: GUIDED"),
        Ok(()) => warn!("run: autopilot did not confirm GUIDED"),
        Err(e) => warn!("run: set GUIDED failed: {:#}", e),
    }

    if let Some(ms) = fc.arm_wait_ms.filter(|ms| *ms > 0) {
        info!("run: waiting up to {} ms for the vehicle to arm", ms);
        if !link.wait_armed(Duration::from_millis(ms)).await {
            warn!("run: vehicle not armed; commands are withheld until it is");
        }
    }
    Ok(Vehicle::Fc(link))
}

async fn run(cfg: &Config) -> Result<()> {
    info!("run: starting");

    let vehicle = connect_vehicle(cfg).await?;
    let session = Arc::new(ControlSession::new(&cfg.control, vehicle.link())?);
    let board = Arc::new(ObservationBoard::new(cfg.vision.clone()));

    session.start()?;

    let poller = {
        let session = session.clone();
        let board = board.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(PERCEPTION_POLL);
            loop {
                tick.tick().await;
                session.poll_perception(board.as_ref());
            }
        })
    };

    println!("{}", console::HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("read stdin")?,
            _ = &mut ctrl_c => {
                warn!("run: interrupted");
                break;
            }
        };
        let Some(line) = line else { break };

        let cmd = match console::parse(&line) {
            Ok(Some(cmd)) => cmd,
            Ok(None) => continue,
            Err(e) => {
                println!("{:#}", e);
                continue;
            }
        };
        if cmd == ConsoleCmd::Quit {
            break;
        }
        if let Err(e) = handle(cmd, &session, &board, &vehicle) {
            warn!("{:#}", e);
        }
    }

    poller.abort();
    let res = session.stop().await;
    vehicle.close();
    res.context("stop session")?;
    info!("run: done");
    Ok(())
}

fn handle(cmd: ConsoleCmd, session: &Arc<ControlSession>, board: &ObservationBoard, vehicle: &Vehicle) -> Result<()> {
    match cmd {
        ConsoleCmd::KeyDown(k) => {
            session.on_key_down(k);
        }
        ConsoleCmd::KeyUp(k) => {
            session.on_key_up(k);
        }
        ConsoleCmd::Tap(k, hold) => {
            session.on_key_down(k);
            let session = session.clone();
            tokio::spawn(async move {
                tokio::time::sleep(hold).await;
                session.on_key_up(k);
            });
        }
        ConsoleCmd::Toggle => {
            let mode = session.toggle_mode();
            println!("{} MODE", mode);
        }
        ConsoleCmd::Profile(name) => {
            let p = session.set_profile(&name)?;
            println!("profile: {}", p);
        }
        ConsoleCmd::Observe { x, y, frame } => {
            let frame = frame.map_or_else(|| board.frame(), |(w, h)| ZoneGrid::new(w, h));
            board.publish(TargetObservation::detected(x, y, frame, Instant::now()));
        }
        ConsoleCmd::Detections(dets) => {
            let obs = board.publish_detections(&dets, Instant::now());
            println!("target: {}", if obs.present { obs.zone.to_string() } else { "none".into() });
        }
        ConsoleCmd::Lost => {
            board.publish(TargetObservation::absent(board.frame(), Instant::now()));
        }
        ConsoleCmd::Status => {
            println!("{}", serde_json::to_string(&session.status())?);
            if let Some(fc) = vehicle.telemetry() {
                println!("{}", serde_json::to_string(&fc)?);
            }
        }
        ConsoleCmd::Takeoff(alt) => vehicle.takeoff(alt)?,
        ConsoleCmd::Land => {
            session.disengage();
            vehicle.land()?;
        }
        ConsoleCmd::Rtl => {
            session.disengage();
            vehicle.rtl()?;
        }
        ConsoleCmd::Help => println!("{}", console::HELP),
        ConsoleCmd::Quit => {}
    }
    Ok(())
}
