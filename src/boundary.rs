//! Boolean entry points for hosts that only observe success or failure.
//!
//! These return `true` when the call FAILED. Every failure is logged with
//! its detail; `out_force` is written only on success.

use log::{error, warn};

use crate::dispatch::{ParallelForHook, TaskHook};
use crate::error::{FilterError, FilterErrorClass, FilterResult};
use crate::filter::{FilterSession, MarkerPosition};
use crate::frame::YuvFrame;
use crate::reduce::ForceVector;
use crate::stats::FilterStats;

#[allow(clippy::too_many_arguments)]
pub fn diff_filter(
    session: &FilterSession,
    frame_a: &YuvFrame<'_>,
    frame_b: &YuvFrame<'_>,
    marker_x: i32,
    marker_y: i32,
    out_frame: &mut YuvFrame<'_>,
    out_force: &mut [f32; 2],
    stats: &mut FilterStats,
) -> bool {
    let marker = MarkerPosition::new(marker_x, marker_y);
    let result = session.diff(frame_a, frame_b, marker, out_frame, stats);
    report("diffFilter", result, out_force)
}

#[allow(clippy::too_many_arguments)]
pub fn composite_filter(
    session: &FilterSession,
    frame_a: &YuvFrame<'_>,
    frame_b: &YuvFrame<'_>,
    marker_x: i32,
    marker_y: i32,
    out_frame: &mut YuvFrame<'_>,
    out_force: &mut [f32; 2],
    stats: &mut FilterStats,
) -> bool {
    let marker = MarkerPosition::new(marker_x, marker_y);
    let result = session.composite(frame_a, frame_b, marker, out_frame, stats);
    report("compositeFilter", result, out_force)
}

/// Install or clear (`None`) the single-task override.
pub fn set_custom_single_task_hook(session: &mut FilterSession, hook: Option<TaskHook>) {
    session.dispatcher_mut().install_task_hook(hook);
}

/// Install or clear (`None`) the whole-range override.
pub fn set_custom_parallel_for_hook(session: &mut FilterSession, hook: Option<ParallelForHook>) {
    session.dispatcher_mut().install_parallel_for_hook(hook);
}

fn report(name: &str, result: FilterResult<ForceVector>, out_force: &mut [f32; 2]) -> bool {
    match result {
        Ok(force) => {
            *out_force = force.to_array();
            false
        }
        Err(err) => {
            log_failure(name, &err);
            true
        }
    }
}

fn log_failure(name: &str, err: &FilterError) {
    match err.class() {
        FilterErrorClass::Precondition => warn!("{name} rejected: {err}"),
        FilterErrorClass::KernelFailure | FilterErrorClass::Fatal => {
            error!("{name} failed: {err}")
        }
    }
}
