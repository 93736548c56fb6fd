//! Frame-level entry points: diff-and-mark and composite preview.

use std::time::Instant;

use log::debug;

use crate::buffer::StridedBuffer;
use crate::dispatch::{Dispatcher, DispatcherConfig, ParallelForHook, TaskHook};
use crate::error::{FilterError, FilterResult};
use crate::frame::{self, YuvFrame};
use crate::kernel::{self, DiffParams};
use crate::reduce::{self, ForceRegion, ForceVector};
use crate::stats::FilterStats;

#[derive(Clone, Debug, PartialEq)]
pub struct FilterConfig {
    /// Side of the square marker and of the force region, in luma pixels.
    pub marker_size: u32,
    pub force_factor: f32,
    /// Absolute differences at or below this are treated as noise.
    pub noise_floor: u8,
    /// Mirror the output horizontally, for front-camera previews.
    pub mirror_output: bool,
    /// Chroma written by [`FilterSession::diff`] outside the marker.
    pub neutral_chroma: u8,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            marker_size: 32,
            force_factor: 10.0,
            noise_floor: 5,
            mirror_output: true,
            neutral_chroma: 128,
        }
    }
}

impl FilterConfig {
    pub fn validate(&self) -> FilterResult<()> {
        if self.marker_size == 0 || self.marker_size > i32::MAX as u32 {
            return Err(FilterError::InvalidConfig(format!(
                "marker_size {} out of range",
                self.marker_size
            )));
        }
        if !self.force_factor.is_finite() {
            return Err(FilterError::InvalidConfig(format!(
                "force_factor must be finite, got {}",
                self.force_factor
            )));
        }
        Ok(())
    }

    fn diff_params(&self) -> DiffParams {
        DiffParams {
            noise_floor: self.noise_floor,
            mirror: self.mirror_output,
        }
    }
}

/// Top-left corner of the marker in output luma coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MarkerPosition {
    pub x: i32,
    pub y: i32,
}

impl MarkerPosition {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

pub struct FilterSessionBuilder {
    config: FilterConfig,
    dispatcher_config: DispatcherConfig,
    task_hook: Option<TaskHook>,
    parallel_for_hook: Option<ParallelForHook>,
}

impl FilterSessionBuilder {
    pub fn new() -> Self {
        Self {
            config: FilterConfig::default(),
            dispatcher_config: DispatcherConfig::default(),
            task_hook: None,
            parallel_for_hook: None,
        }
    }

    pub fn with_config(mut self, config: FilterConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_dispatcher_config(mut self, config: DispatcherConfig) -> Self {
        self.dispatcher_config = config;
        self
    }

    pub fn marker_size(mut self, size: u32) -> Self {
        self.config.marker_size = size;
        self
    }

    pub fn mirror_output(mut self, enabled: bool) -> Self {
        self.config.mirror_output = enabled;
        self
    }

    pub fn with_task_hook(mut self, hook: Option<TaskHook>) -> Self {
        self.task_hook = hook;
        self
    }

    pub fn with_parallel_for_hook(mut self, hook: Option<ParallelForHook>) -> Self {
        self.parallel_for_hook = hook;
        self
    }

    pub fn build(self) -> FilterResult<FilterSession> {
        self.config.validate()?;
        let mut dispatcher = Dispatcher::new(self.dispatcher_config)?;
        dispatcher.install_task_hook(self.task_hook);
        dispatcher.install_parallel_for_hook(self.parallel_for_hook);
        Ok(FilterSession {
            config: self.config,
            dispatcher,
        })
    }
}

impl Default for FilterSessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct FilterSession {
    config: FilterConfig,
    dispatcher: Dispatcher,
}

impl FilterSession {
    pub fn builder() -> FilterSessionBuilder {
        FilterSessionBuilder::new()
    }

    pub fn new() -> FilterResult<Self> {
        Self::builder().build()
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Mutable access for installing or clearing hooks between calls.
    pub fn dispatcher_mut(&mut self) -> &mut Dispatcher {
        &mut self.dispatcher
    }

    /// Thresholded luma difference of `a` and `b` into `out`, neutral chroma,
    /// marker overlay. Returns the force the difference exerts on the marker
    /// region.
    ///
    /// All preconditions are checked before `out` is written.
    pub fn diff(
        &self,
        a: &YuvFrame<'_>,
        b: &YuvFrame<'_>,
        marker: MarkerPosition,
        out: &mut YuvFrame<'_>,
        stats: &mut FilterStats,
    ) -> FilterResult<ForceVector> {
        self.timed("diffFilter", stats, || self.diff_inner(a, b, marker, out))
    }

    /// Same force as [`diff`](Self::diff), but the output shows `b`
    /// (mirrored when configured) under the marker instead of the
    /// difference image.
    pub fn composite(
        &self,
        a: &YuvFrame<'_>,
        b: &YuvFrame<'_>,
        marker: MarkerPosition,
        out: &mut YuvFrame<'_>,
        stats: &mut FilterStats,
    ) -> FilterResult<ForceVector> {
        self.timed("compositeFilter", stats, || {
            self.composite_inner(a, b, marker, out)
        })
    }

    /// Layout-converting frame copy on this session's dispatcher.
    pub fn copy_frame(&self, src: &YuvFrame<'_>, dst: &mut YuvFrame<'_>) -> FilterResult<()> {
        frame::copy_frame(src, dst, &self.dispatcher)
    }

    fn timed<F>(&self, name: &str, stats: &mut FilterStats, f: F) -> FilterResult<ForceVector>
    where
        F: FnOnce() -> FilterResult<ForceVector>,
    {
        self.dispatcher.announce_once();
        let started = Instant::now();
        let result = f();
        match &result {
            Ok(_) => {
                stats.record(started.elapsed());
                if let (Some(last), Some(minimum)) = (stats.last(), stats.minimum()) {
                    debug!(
                        "{name} time taken: {} us (minimum: {} us)",
                        last.as_micros(),
                        minimum.as_micros()
                    );
                }
            }
            Err(_) => stats.record_failure(),
        }
        result
    }

    fn check_inputs(
        &self,
        a: &YuvFrame<'_>,
        b: &YuvFrame<'_>,
        marker: MarkerPosition,
        out: &YuvFrame<'_>,
    ) -> FilterResult<ForceRegion> {
        let mismatch = if !a.extents_equal(b) {
            Some(("frameB", b.describe_extents()))
        } else if !a.extents_equal(out) {
            Some(("output", out.describe_extents()))
        } else {
            None
        };
        if let Some((name, other)) = mismatch {
            return Err(FilterError::ExtentMismatch(format!(
                "frameA {} vs {name} {other}",
                a.describe_extents()
            )));
        }
        let size = self.config.marker_size;
        let (x, y) = match (u32::try_from(marker.x), u32::try_from(marker.y)) {
            (Ok(x), Ok(y)) => (x, y),
            _ => {
                return Err(FilterError::OutOfBounds {
                    x: marker.x.max(0) as u32,
                    y: marker.y.max(0) as u32,
                    size,
                    width: out.width().max(0) as u32,
                    height: out.height().max(0) as u32,
                });
            }
        };
        kernel::check_marker_bounds(&out.luma(), x, y, size)?;
        Ok(ForceRegion::new(marker.x, marker.y, size as i32))
    }

    fn diff_inner(
        &self,
        a: &YuvFrame<'_>,
        b: &YuvFrame<'_>,
        marker: MarkerPosition,
        out: &mut YuvFrame<'_>,
    ) -> FilterResult<ForceVector> {
        let region = self.check_inputs(a, b, marker, out)?;
        let d = &self.dispatcher;

        let mut luma = out.luma();
        kernel::diff_and_threshold(&a.luma(), &b.luma(), &mut luma, self.config.diff_params(), d)?;
        let force = reduce::compute_force(
            &luma.with_min(0, 0),
            region,
            self.config.force_factor,
            d,
        )?;
        out.fill_chroma(self.config.neutral_chroma, d)?;
        self.overlay(out, region)?;
        Ok(force)
    }

    fn composite_inner(
        &self,
        a: &YuvFrame<'_>,
        b: &YuvFrame<'_>,
        marker: MarkerPosition,
        out: &mut YuvFrame<'_>,
    ) -> FilterResult<ForceVector> {
        let region = self.check_inputs(a, b, marker, out)?;
        let d = &self.dispatcher;
        let mirror = self.config.mirror_output;

        if mirror {
            for (name, src, dst) in [
                ("luma", b.luma(), out.luma()),
                ("chromaU", b.chroma_u(), out.chroma_u()),
                ("chromaV", b.chroma_v(), out.chroma_v()),
            ] {
                if kernel::ranges_overlap(src.byte_span(), dst.byte_span()) {
                    return Err(FilterError::InvalidBuffer(format!(
                        "composite output {name} overlaps frameB"
                    )));
                }
            }
        }

        let force = self.region_force(a, b, region)?;

        if mirror {
            kernel::flip_horizontal_2d(&b.luma(), &mut out.luma(), d)?;
            kernel::flip_horizontal_2d(&b.chroma_u(), &mut out.chroma_u(), d)?;
            kernel::flip_horizontal_2d(&b.chroma_v(), &mut out.chroma_v(), d)?;
        } else {
            frame::copy_frame(b, out, d)?;
        }
        self.overlay(out, region)?;
        Ok(force)
    }

    /// Force from the (optionally mirrored) difference of `a` and `b`,
    /// evaluated only inside `region` on a scratch plane.
    fn region_force(
        &self,
        a: &YuvFrame<'_>,
        b: &YuvFrame<'_>,
        region: ForceRegion,
    ) -> FilterResult<ForceVector> {
        let size = region.size;
        let width = a.width();
        let source_x = if self.config.mirror_output {
            width - region.origin_x - size
        } else {
            region.origin_x
        };
        let crop_a = a.luma().with_min(0, 0).crop_2d(source_x, region.origin_y, size, size)?;
        let crop_b = b.luma().with_min(0, 0).crop_2d(source_x, region.origin_y, size, size)?;

        let mut scratch = vec![0u8; (size as usize) * (size as usize)];
        let mut signal = StridedBuffer::packed_2d(&mut scratch, size as u32, size as u32)?;
        kernel::diff_and_threshold(
            &crop_a,
            &crop_b,
            &mut signal,
            self.config.diff_params(),
            &self.dispatcher,
        )?;
        reduce::compute_force(
            &signal.with_min(region.origin_x, region.origin_y),
            region,
            self.config.force_factor,
            &self.dispatcher,
        )
    }

    fn overlay(&self, out: &mut YuvFrame<'_>, region: ForceRegion) -> FilterResult<()> {
        kernel::overlay_marker(
            &mut out.luma(),
            &mut out.chroma_u(),
            &mut out.chroma_v(),
            region.origin_x as u32,
            region.origin_y as u32,
            region.size as u32,
            &self.dispatcher,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn serial_session(config: FilterConfig) -> FilterSession {
        FilterSession::builder()
            .with_config(config)
            .with_dispatcher_config(DispatcherConfig::serial())
            .build()
            .unwrap()
    }

    fn small_config() -> FilterConfig {
        FilterConfig {
            marker_size: 4,
            ..FilterConfig::default()
        }
    }

    #[test]
    fn invalid_config_fails_build() {
        let result = FilterSession::builder()
            .with_dispatcher_config(DispatcherConfig::serial())
            .marker_size(0)
            .build();
        assert!(matches!(result, Err(FilterError::InvalidConfig(_))));
    }

    #[test]
    fn diff_writes_threshold_neutral_chroma_and_marker() {
        let session = serial_session(small_config());
        let mut a = vec![10u8; 16 * 8 * 3 / 2];
        let mut b = a.clone();
        b[0] = 110;
        let mut out = vec![0u8; a.len()];
        let fa = YuvFrame::from_nv21(&mut a, 16, 8).unwrap();
        let fb = YuvFrame::from_nv21(&mut b, 16, 8).unwrap();
        let mut fo = YuvFrame::from_i420(&mut out, 16, 8).unwrap();
        let mut stats = FilterStats::new();
        session
            .diff(&fa, &fb, MarkerPosition::new(8, 2), &mut fo, &mut stats)
            .unwrap();

        // Mirrored: source column 0 lands on output column 15.
        assert_eq!(out[15], 95);
        assert_eq!(out[0], 0);
        assert_eq!(out[2 * 16 + 8], kernel::MARKER_LUMA);
        assert_eq!(out[128 + 16 + 4], kernel::MARKER_CHROMA);
        assert_eq!(out[128], 128);
        assert_eq!(stats.snapshot().calls, 1);
    }

    #[test]
    fn marker_outside_frame_leaves_output_untouched() {
        let session = serial_session(small_config());
        let mut a = vec![0u8; 8 * 8 * 3 / 2];
        let mut b = a.clone();
        let mut out = vec![42u8; a.len()];
        let fa = YuvFrame::from_nv12(&mut a, 8, 8).unwrap();
        let fb = YuvFrame::from_nv12(&mut b, 8, 8).unwrap();
        let mut fo = YuvFrame::from_nv12(&mut out, 8, 8).unwrap();
        let mut stats = FilterStats::new();
        for marker in [MarkerPosition::new(5, 0), MarkerPosition::new(-1, 0)] {
            let err = session.diff(&fa, &fb, marker, &mut fo, &mut stats).unwrap_err();
            assert!(matches!(err, FilterError::OutOfBounds { .. }));
        }
        assert!(out.iter().all(|p| *p == 42));
        assert_eq!(stats.snapshot().failures, 2);
    }

    #[test]
    fn composite_shows_mirrored_b() {
        let session = serial_session(small_config());
        let mut a = vec![0u8; 8 * 8 * 3 / 2];
        let mut b: Vec<u8> = (0..a.len()).map(|i| (i % 200) as u8).collect();
        let mut out = vec![0u8; a.len()];
        let fa = YuvFrame::from_i420(&mut a, 8, 8).unwrap();
        let fb = YuvFrame::from_i420(&mut b, 8, 8).unwrap();
        let mut fo = YuvFrame::from_i420(&mut out, 8, 8).unwrap();
        session
            .composite(&fa, &fb, MarkerPosition::new(0, 0), &mut fo, &mut FilterStats::new())
            .unwrap();
        // Row 7 is below the marker.
        assert_eq!(out[7 * 8], b[7 * 8 + 7]);
        assert_eq!(out[7 * 8 + 7], b[7 * 8]);
        // Last U row, outside the marker footprint.
        assert_eq!(out[64 + 3 * 4], b[64 + 3 * 4 + 3]);
        assert_eq!(out[0], kernel::MARKER_LUMA);
    }

    #[test]
    fn composite_force_matches_diff_force() {
        let session = serial_session(small_config());
        let mut a = vec![0u8; 16 * 8 * 3 / 2];
        let mut b = a.clone();
        // Column 12 mirrors onto column 3, inside a marker at (2, 2).
        b[3 * 16 + 12] = 255;
        let mut out = vec![0u8; a.len()];
        let fa = YuvFrame::from_nv21(&mut a, 16, 8).unwrap();
        let fb = YuvFrame::from_nv21(&mut b, 16, 8).unwrap();
        let mut fo = YuvFrame::from_nv21(&mut out, 16, 8).unwrap();
        let mut stats = FilterStats::new();
        let marker = MarkerPosition::new(2, 2);
        let diff = session.diff(&fa, &fb, marker, &mut fo, &mut stats).unwrap();
        let composite = session.composite(&fa, &fb, marker, &mut fo, &mut stats).unwrap();
        assert!(diff.magnitude() > 0.0);
        assert!((diff.x - composite.x).abs() < 1e-4);
        assert!((diff.y - composite.y).abs() < 1e-4);
    }
}
