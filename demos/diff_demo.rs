//! Runs diff and composite on a synthetic moving scene and prints the force
//! acting on a marker that drifts with it.
//!
//!   RUST_LOG=debug cargo run --example diff_demo -- [frames]

use anyhow::{Context, Result};
use snow_diff::boundary::{composite_filter, diff_filter};
use snow_diff::{FilterSession, FilterStats, MarkerPosition, YuvFrame};

const WIDTH: u32 = 320;
const HEIGHT: u32 = 240;
const DEFAULT_FRAMES: usize = 12;

/// A bright vertical bar at `bar_x` on a mid-grey background, NV21.
fn render_scene(bar_x: u32) -> Vec<u8> {
    let (w, h) = (WIDTH as usize, HEIGHT as usize);
    let mut data = vec![128u8; w * h * 3 / 2];
    for y in 0..h {
        for x in bar_x as usize..(bar_x as usize + 16).min(w) {
            data[y * w + x] = 235;
        }
    }
    data
}

fn main() -> Result<()> {
    env_logger::init();

    let frames = match std::env::args().nth(1) {
        Some(raw) => raw
            .parse::<usize>()
            .with_context(|| format!("invalid frame count: {raw}"))?,
        None => DEFAULT_FRAMES,
    };

    let session = FilterSession::new().context("failed to build filter session")?;
    let size = session.config().marker_size;
    let mut stats = FilterStats::new();
    let mut marker = MarkerPosition::new(
        ((WIDTH - size) / 2) as i32,
        ((HEIGHT - size) / 2) as i32,
    );
    let mut output = vec![0u8; (WIDTH * HEIGHT * 3 / 2) as usize];

    for frame in 0..frames {
        let mut previous = render_scene(40 + frame as u32 * 8);
        let mut current = render_scene(40 + (frame as u32 + 1) * 8);
        let a = YuvFrame::from_nv21(&mut previous, WIDTH, HEIGHT)?;
        let b = YuvFrame::from_nv21(&mut current, WIDTH, HEIGHT)?;
        let mut out = YuvFrame::from_nv21(&mut output, WIDTH, HEIGHT)?;

        let mut force = [0.0f32; 2];
        let failed = if frame % 2 == 0 {
            diff_filter(&session, &a, &b, marker.x, marker.y, &mut out, &mut force, &mut stats)
        } else {
            composite_filter(&session, &a, &b, marker.x, marker.y, &mut out, &mut force, &mut stats)
        };
        if failed {
            anyhow::bail!("filter failed on frame {frame}");
        }

        println!(
            "frame {frame:>3}: marker ({:>3}, {:>3}) force ({:>9.2}, {:>9.2})",
            marker.x, marker.y, force[0], force[1]
        );
        let max_x = (WIDTH - size) as i32;
        let max_y = (HEIGHT - size) as i32;
        marker.x = (marker.x - (force[0] / 100.0) as i32).clamp(0, max_x);
        marker.y = (marker.y - (force[1] / 100.0) as i32).clamp(0, max_y);
    }

    let snap = stats.snapshot();
    println!(
        "{} calls, {} failed, last {:?}, minimum {:?}",
        snap.calls, snap.failures, snap.last, snap.minimum
    );
    Ok(())
}
