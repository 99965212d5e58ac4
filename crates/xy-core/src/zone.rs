//! 3x3 partition of the camera frame.
//!
//! Columns are `[0, w/3)`, `[w/3, 2*(w/3))` and `[2*(w/3), w)` with `w/3`
//! rounded down; rows use the same convention on the height. Lower bounds are
//! inclusive, upper bounds exclusive. Anything outside the frame is classified
//! as [`Zone::Center`], which the perception mapper treats as "hold".

use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Zone {
    TopLeft,
    TopCenter,
    TopRight,
    CenterLeft,
    Center,
    CenterRight,
    BottomLeft,
    BottomCenter,
    BottomRight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Left,
    Middle,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Row {
    Top,
    Middle,
    Bottom,
}

impl Zone {
    pub fn from_parts(row: Row, col: Column) -> Self {
        match (row, col) {
            (Row::Top, Column::Left) => Zone::TopLeft,
            (Row::Top, Column::Middle) => Zone::TopCenter,
            (Row::Top, Column::Right) => Zone::TopRight,
            (Row::Middle, Column::Left) => Zone::CenterLeft,
            (Row::Middle, Column::Middle) => Zone::Center,
            (Row::Middle, Column::Right) => Zone::CenterRight,
            (Row::Bottom, Column::Left) => Zone::BottomLeft,
            (Row::Bottom, Column::Middle) => Zone::BottomCenter,
            (Row::Bottom, Column::Right) => Zone::BottomRight,
        }
    }

    pub fn row(self) -> Row {
        match self {
            Zone::TopLeft | Zone::TopCenter | Zone::TopRight => Row::Top,
            Zone::CenterLeft | Zone::Center | Zone::CenterRight => Row::Middle,
            Zone::BottomLeft | Zone::BottomCenter | Zone::BottomRight => Row::Bottom,
        }
    }

    pub fn column(self) -> Column {
        match self {
            Zone::TopLeft | Zone::CenterLeft | Zone::BottomLeft => Column::Left,
            Zone::TopCenter | Zone::Center | Zone::BottomCenter => Column::Middle,
            Zone::TopRight | Zone::CenterRight | Zone::BottomRight => Column::Right,
        }
    }

    pub fn is_dead_zone(self) -> bool {
        self == Zone::Center
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Zone::TopLeft => "TOP_LEFT",
            Zone::TopCenter => "TOP_CENTER",
            Zone::TopRight => "TOP_RIGHT",
            Zone::CenterLeft => "CENTER_LEFT",
            Zone::Center => "CENTER",
            Zone::CenterRight => "CENTER_RIGHT",
            Zone::BottomLeft => "BOTTOM_LEFT",
            Zone::BottomCenter => "BOTTOM_CENTER",
            Zone::BottomRight => "BOTTOM_RIGHT",
        };
        f.write_str(s)
    }
}

/// Frame dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ZoneGrid {
    pub width: u32,
    pub height: u32,
}

impl ZoneGrid {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn classify(&self, x: f64, y: f64) -> Zone {
        classify(x, y, self.width, self.height)
    }

    pub fn center(&self) -> (f64, f64) {
        (f64::from(self.width) / 2.0, f64::from(self.height) / 2.0)
    }
}

pub fn classify(x: f64, y: f64, width: u32, height: u32) -> Zone {
    match (band(x, width), band(y, height)) {
        (Some(c), Some(r)) => {
            let col = [Column::Left, Column::Middle, Column::Right][c];
            let row = [Row::Top, Row::Middle, Row::Bottom][r];
            Zone::from_parts(row, col)
        }
        _ => Zone::Center,
    }
}

// index of the third that `v` falls in, None when outside [0, extent)
fn band(v: f64, extent: u32) -> Option<usize> {
    if !v.is_finite() || v < 0.0 || v >= f64::from(extent) {
        return None;
    }
    let step = f64::from(extent / 3);
    Some(if v < step {
        0
    } else if v < step * 2.0 {
        1
    } else {
        2
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const W: u32 = 640;
    const H: u32 = 480;

    #[test]
    fn origin_and_center() {
        assert_eq!(classify(0.0, 0.0, W, H), Zone::TopLeft);
        assert_eq!(classify(320.0, 240.0, W, H), Zone::Center);
        assert_eq!(classify(639.0, 479.0, W, H), Zone::BottomRight);
    }

    #[test]
    fn column_boundaries_are_half_open() {
        // 640 / 3 = 213
        assert_eq!(classify(212.0, 240.0, W, H), Zone::CenterLeft);
        assert_eq!(classify(213.0, 240.0, W, H), Zone::Center);
        assert_eq!(classify(425.0, 240.0, W, H), Zone::Center);
        assert_eq!(classify(426.0, 240.0, W, H), Zone::CenterRight);
    }

    #[test]
    fn row_boundaries_are_half_open() {
        // 480 / 3 = 160
        assert_eq!(classify(320.0, 159.0, W, H), Zone::TopCenter);
        assert_eq!(classify(320.0, 160.0, W, H), Zone::Center);
        assert_eq!(classify(320.0, 319.0, W, H), Zone::Center);
        assert_eq!(classify(320.0, 320.0, W, H), Zone::BottomCenter);
    }

    #[test]
    fn outside_frame_holds() {
        assert_eq!(classify(-1.0, 10.0, W, H), Zone::Center);
        assert_eq!(classify(640.0, 10.0, W, H), Zone::Center);
        assert_eq!(classify(10.0, 480.0, W, H), Zone::Center);
        assert_eq!(classify(f64::NAN, 10.0, W, H), Zone::Center);
    }

    #[test]
    fn row_and_column_round_trip() {
        let grid = ZoneGrid::new(W, H);
        let z = grid.classify(600.0, 20.0);
        assert_eq!(z, Zone::TopRight);
        assert_eq!(z.row(), Row::Top);
        assert_eq!(z.column(), Column::Right);
        assert_eq!(Zone::from_parts(z.row(), z.column()), z);
        assert_eq!(z.to_string(), "TOP_RIGHT");
    }
}
