use std::sync::OnceLock;

use log::trace;

use crate::buffer::StridedBuffer;
use crate::dispatch::Dispatcher;
use crate::error::{FilterError, FilterResult, status_to_result};
use crate::kernel::{check_marker_bounds, run_row_chunks};

/// Weighted pull of a signal towards the centre of a region.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ForceVector {
    pub x: f32,
    pub y: f32,
}

impl ForceVector {
    pub const ZERO: Self = Self { x: 0.0, y: 0.0 };

    pub fn magnitude(&self) -> f32 {
        self.x.hypot(self.y)
    }

    pub fn to_array(self) -> [f32; 2] {
        [self.x, self.y]
    }
}

/// Square region `[origin, origin + size)` on both axes, in the signal's
/// logical coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ForceRegion {
    pub origin_x: i32,
    pub origin_y: i32,
    pub size: i32,
}

impl ForceRegion {
    pub fn new(origin_x: i32, origin_y: i32, size: i32) -> Self {
        Self {
            origin_x,
            origin_y,
            size,
        }
    }

    /// `origin + size / 2`, in continuous coordinates.
    pub fn center(&self) -> (f32, f32) {
        let half = self.size as f32 / 2.0;
        (self.origin_x as f32 + half, self.origin_y as f32 + half)
    }
}

/// Sum `factor · (signal / 255) · (center − p)` over every pixel `p` in
/// `region`.
///
/// Rows are split into dispatcher units; each unit writes its own partial
/// sum and the partials are added in unit order, so the result is stable for
/// a fixed dispatcher configuration.
pub fn compute_force(
    signal: &StridedBuffer<'_>,
    region: ForceRegion,
    force_factor: f32,
    dispatcher: &Dispatcher,
) -> FilterResult<ForceVector> {
    signal.require_byte_elements("computeForce signal")?;
    if region.size < 0 {
        return Err(FilterError::InvalidConfig(format!(
            "force region size {} is negative",
            region.size
        )));
    }
    let local_x = region.origin_x - signal.min(0);
    let local_y = region.origin_y - signal.min(1);
    if local_x < 0 || local_y < 0 {
        return Err(FilterError::OutOfBounds {
            x: region.origin_x.max(0) as u32,
            y: region.origin_y.max(0) as u32,
            size: region.size as u32,
            width: signal.width().max(0) as u32,
            height: signal.height().max(0) as u32,
        });
    }
    check_marker_bounds(signal, local_x as u32, local_y as u32, region.size as u32)?;
    if region.size == 0 {
        return Ok(ForceVector::ZERO);
    }

    let (cx, cy) = region.center();
    let scale = force_factor / u8::MAX as f32;
    let grain = dispatcher.rows_per_task().max(1);
    let units = (region.size + grain - 1) / grain;
    let partials: Vec<OnceLock<(f32, f32)>> = (0..units).map(|_| OnceLock::new()).collect();

    let view = *signal;
    let status = run_row_chunks(dispatcher, region.size, |unit, rows| {
        let mut sum = (0.0f32, 0.0f32);
        for row in rows {
            let y = region.origin_y + row;
            let dy = cy - y as f32;
            for col in 0..region.size {
                let x = region.origin_x + col;
                let value = unsafe { view.read(x, y) };
                if value == 0 {
                    continue;
                }
                let weight = value as f32 * scale;
                sum.0 += weight * (cx - x as f32);
                sum.1 += weight * dy;
            }
        }
        match partials.get(unit as usize) {
            Some(slot) if slot.set(sum).is_ok() => 0,
            _ => -1,
        }
    });
    status_to_result("computeForce", status)?;

    let force = partials
        .iter()
        .filter_map(OnceLock::get)
        .fold(ForceVector::ZERO, |acc, (x, y)| ForceVector {
            x: acc.x + x,
            y: acc.y + y,
        });
    trace!(
        "computeForce region=({}, {}) size={} -> ({:.3}, {:.3})",
        region.origin_x, region.origin_y, region.size, force.x, force.y
    );
    Ok(force)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::DispatcherConfig;

    fn assert_close(actual: f32, expected: f32) {
        assert!(
            (actual - expected).abs() <= 1e-3 * expected.abs().max(1.0),
            "{actual} != {expected}"
        );
    }

    #[test]
    fn zero_signal_has_no_force() {
        let mut data = vec![0u8; 64 * 48];
        let plane = StridedBuffer::packed_2d(&mut data, 64, 48).unwrap();
        for (x, y) in [(0, 0), (10, 5), (32, 16)] {
            let force = compute_force(&plane, ForceRegion::new(x, y, 32), 10.0, &Dispatcher::serial())
                .unwrap();
            assert_eq!(force, ForceVector::ZERO);
        }
    }

    #[test]
    fn corner_pixel_pushes_toward_opposite_corner() {
        let mut data = vec![0u8; 64 * 64];
        data[8 * 64 + 4] = 255;
        let plane = StridedBuffer::packed_2d(&mut data, 64, 64).unwrap();
        let force = compute_force(&plane, ForceRegion::new(4, 8, 32), 10.0, &Dispatcher::serial())
            .unwrap();
        assert_close(force.x, 160.0);
        assert_close(force.y, 160.0);
    }

    #[test]
    fn partitioning_only_changes_rounding() {
        let mut data: Vec<u8> = (0..96 * 96).map(|i| (i * 31 % 256) as u8).collect();
        let plane = StridedBuffer::packed_2d(&mut data, 96, 96).unwrap();
        let region = ForceRegion::new(7, 11, 64);
        let serial = compute_force(&plane, region, 10.0, &Dispatcher::serial()).unwrap();
        let parallel = Dispatcher::new(DispatcherConfig {
            max_workers: 4,
            force_serial: false,
            rows_per_task: 3,
            ..DispatcherConfig::default()
        })
        .unwrap();
        let split = compute_force(&plane, region, 10.0, &parallel).unwrap();
        assert!((split.x - serial.x).abs() < 1.0, "{split:?} vs {serial:?}");
        assert!((split.y - serial.y).abs() < 1.0, "{split:?} vs {serial:?}");
    }

    #[test]
    fn absolute_coordinates_follow_min() {
        let mut data = vec![0u8; 16 * 16];
        data[0] = 255;
        let plane = StridedBuffer::packed_2d(&mut data, 16, 16).unwrap().with_min(100, 200);
        let force = compute_force(&plane, ForceRegion::new(100, 200, 8), 2.0, &Dispatcher::serial())
            .unwrap();
        assert_close(force.x, 8.0);
        assert!(compute_force(&plane, ForceRegion::new(0, 0, 8), 2.0, &Dispatcher::serial()).is_err());
    }

    #[test]
    fn region_must_fit() {
        let mut data = vec![0u8; 8 * 8];
        let plane = StridedBuffer::packed_2d(&mut data, 8, 8).unwrap();
        assert!(compute_force(&plane, ForceRegion::new(0, 0, 8), 1.0, &Dispatcher::serial()).is_ok());
        let err = compute_force(&plane, ForceRegion::new(1, 0, 8), 1.0, &Dispatcher::serial())
            .unwrap_err();
        assert!(matches!(err, FilterError::OutOfBounds { .. }));
    }
}
