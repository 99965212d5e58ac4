use std::time::Duration;

use anyhow::{Context, Result};
use xy_core::Key;
use xy_vision::Detection;

/// One operator line from stdin.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCmd {
    KeyDown(Key),
    KeyUp(Key),
    /// Hold a key for a while, then release it.
    Tap(Key, Duration),
    Toggle,
    Profile(String),
    /// Target center in pixels, optionally in a frame other than the configured one.
    Observe { x: f64, y: f64, frame: Option<(u32, u32)> },
    /// One detector frame, normalised boxes as JSON.
    Detections(Vec<Detection>),
    Lost,
    Status,
    Takeoff(f32),
    Land,
    Rtl,
    Help,
    Quit,
}

pub const HELP: &str = "\
commands:
  down <key> | up <key>     hold / release a key (w a s d q e left right)
  tap <key> [secs]          hold a key for secs (default 2)
  toggle | space            switch MANUAL <-> AUTONOMOUS
  profile <name> | 1 2 3    eco / standard / performance
  obs <x> <y> [w h] | lost  feed a target position (pixels) / report no target
  det <json>                feed a detector frame, e.g. det [{\"class_id\":0,\"conf\":0.9,\"cx\":0.8,\"cy\":0.2,\"w\":0.1,\"h\":0.2}]
  takeoff [alt] | land | rtl
  status | help | quit";

pub fn parse(line: &str) -> Result<Option<ConsoleCmd>> {
    let mut it = line.split_whitespace();
    let Some(head) = it.next() else { return Ok(None) };
    let arg = it.next();

    let cmd = match head.to_ascii_lowercase().as_str() {
        "down" => ConsoleCmd::KeyDown(key(arg)?),
        "up" => ConsoleCmd::KeyUp(key(arg)?),
        "tap" => {
            let secs: f64 = match it.next() {
                Some(s) => s.parse().context("tap duration")?,
                None => 2.0,
            };
            anyhow::ensure!(secs > 0.0 && secs <= 10.0, "tap duration must be in (0, 10] s");
            ConsoleCmd::Tap(key(arg)?, Duration::from_secs_f64(secs))
        }
        "toggle" | "space" => ConsoleCmd::Toggle,
        "profile" => ConsoleCmd::Profile(arg.context("profile needs a name")?.to_string()),
        "1" => ConsoleCmd::Profile("eco".into()),
        "2" => ConsoleCmd::Profile("standard".into()),
        "3" => ConsoleCmd::Profile("performance".into()),
        "obs" => {
            let x = arg.context("obs needs x y")?.parse().context("obs x")?;
            let y = it.next().context("obs needs x y")?.parse().context("obs y")?;
            let frame = match (it.next(), it.next()) {
                (None, _) => None,
                (Some(w), Some(h)) => {
                    let w: u32 = w.parse().context("obs frame width")?;
                    let h: u32 = h.parse().context("obs frame height")?;
                    anyhow::ensure!(w >= 3 && h >= 3, "obs frame too small");
                    Some((w, h))
                }
                (Some(_), None) => anyhow::bail!("obs frame needs both w and h"),
            };
            ConsoleCmd::Observe { x, y, frame }
        }
        "det" => {
            let json = line.trim_start()[head.len()..].trim();
            let dets = if json.is_empty() {
                Vec::new()
            } else {
                serde_json::from_str(json).context("det expects a JSON list of detections")?
            };
            ConsoleCmd::Detections(dets)
        }
        "lost" => ConsoleCmd::Lost,
        "status" => ConsoleCmd::Status,
        "takeoff" | "t" => {
            let alt = match arg {
                Some(s) => s.parse().context("takeoff altitude")?,
                None => 3.0,
            };
            ConsoleCmd::Takeoff(alt)
        }
        "land" | "l" => ConsoleCmd::Land,
        "rtl" | "r" => ConsoleCmd::Rtl,
        "help" | "?" => ConsoleCmd::Help,
        "quit" | "exit" | "esc" => ConsoleCmd::Quit,
        other => anyhow::bail!("unknown command: {} (try help)", other),
    };
    Ok(Some(cmd))
}

fn key(sym: Option<&str>) -> Result<Key> {
    let sym = sym.context("missing key")?;
    Key::from_symbol(sym).with_context(|| format!("unknown key: {}", sym))
}
