use tokio::process::Command;
use tracing::info;

use crate::core::error::{RecorderError, Result};

/// What part of the screen the encoder should grab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureRegion {
    /// Whole display, offset +0,0.
    #[default]
    FullScreen,
    /// Interactive window pick (xdotool).
    Window,
    /// Interactive rectangle pick (slop).
    Selection,
}

/// Capture rectangle in screen coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub width: u32,
    pub height: u32,
    pub x: i32,
    pub y: i32,
}

/// Resolve a capture region to concrete geometry.
///
/// Returns `None` for full-screen capture (the encoder grabs the whole display).
/// Interactive modes shell out to the picker utilities; a cancelled pick
/// (non-zero exit) aborts the start request before anything is launched.
pub async fn pick(region: CaptureRegion) -> Result<Option<Geometry>> {
    match region {
        CaptureRegion::FullScreen => Ok(None),
        CaptureRegion::Selection => pick_selection().await.map(Some),
        CaptureRegion::Window => pick_window().await.map(Some),
    }
}

async fn pick_selection() -> Result<Geometry> {
    info!("Waiting for region selection (slop)");

    let output = Command::new("slop")
        .args(["-f", "%w %h %x %y"])
        .output()
        .await?;

    if !output.status.success() {
        return Err(RecorderError::SelectionCancelled);
    }

    parse_slop(&String::from_utf8_lossy(&output.stdout))
}

async fn pick_window() -> Result<Geometry> {
    info!("Waiting for window selection (xdotool)");

    let selected = Command::new("xdotool")
        .arg("selectwindow")
        .output()
        .await?;

    if !selected.status.success() {
        return Err(RecorderError::SelectionCancelled);
    }

    let window_id = String::from_utf8_lossy(&selected.stdout).trim().to_string();
    if window_id.is_empty() {
        return Err(RecorderError::SelectionCancelled);
    }

    let geometry = Command::new("xdotool")
        .args(["getwindowgeometry", "--shell", &window_id])
        .output()
        .await?;

    if !geometry.status.success() {
        return Err(RecorderError::SelectionCancelled);
    }

    parse_xdotool_shell(&String::from_utf8_lossy(&geometry.stdout))
}

/// Parse slop's formatted output: "W H X Y".
fn parse_slop(out: &str) -> Result<Geometry> {
    let fields: Vec<&str> = out.split_whitespace().collect();
    if fields.len() != 4 {
        return Err(RecorderError::BadGeometry(out.to_string()));
    }

    let parse = |s: &str| {
        s.parse::<i64>()
            .map_err(|_| RecorderError::BadGeometry(out.to_string()))
    };

    Ok(Geometry {
        width: parse(fields[0])? as u32,
        height: parse(fields[1])? as u32,
        x: parse(fields[2])? as i32,
        y: parse(fields[3])? as i32,
    })
}

/// Parse `xdotool getwindowgeometry --shell` output (KEY=VALUE lines).
fn parse_xdotool_shell(out: &str) -> Result<Geometry> {
    let mut width = None;
    let mut height = None;
    let mut x = None;
    let mut y = None;

    for line in out.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value: i64 = value
            .trim()
            .parse()
            .map_err(|_| RecorderError::BadGeometry(out.to_string()))?;

        match key.trim() {
            "WIDTH" => width = Some(value),
            "HEIGHT" => height = Some(value),
            "X" => x = Some(value),
            "Y" => y = Some(value),
            _ => {}
        }
    }

    match (width, height, x, y) {
        (Some(w), Some(h), Some(x), Some(y)) => Ok(Geometry {
            width: w as u32,
            height: h as u32,
            x: x as i32,
            y: y as i32,
        }),
        _ => Err(RecorderError::BadGeometry(out.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_slop_output() {
        let g = parse_slop("800 600 120 48\n").unwrap();
        assert_eq!(
            g,
            Geometry {
                width: 800,
                height: 600,
                x: 120,
                y: 48
            }
        );
    }

    #[test]
    fn rejects_malformed_slop_output() {
        assert!(parse_slop("").is_err());
        assert!(parse_slop("800 600 120").is_err());
        assert!(parse_slop("800 600 abc 48").is_err());
    }

    #[test]
    fn parses_xdotool_shell_output() {
        let out = "WINDOW=69206019\nX=64\nY=27\nWIDTH=1280\nHEIGHT=720\nSCREEN=0\n";
        let g = parse_xdotool_shell(out).unwrap();
        assert_eq!(
            g,
            Geometry {
                width: 1280,
                height: 720,
                x: 64,
                y: 27
            }
        );
    }

    #[test]
    fn rejects_xdotool_output_missing_fields() {
        assert!(parse_xdotool_shell("WINDOW=1\nX=0\nY=0\n").is_err());
    }
}
