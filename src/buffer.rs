//! Strided, non-owning views over pixel memory.
//!
//! [`RawBuffer`] is the layout-stable descriptor exchanged with externally
//! compiled kernels and the host boundary. [`StridedBuffer`] is the checked
//! view the rest of the crate works with: it never allocates, never frees,
//! and addresses an element at logical coordinates as
//! `host + Σ(coord_d − min_d) · stride_d · elem_size`.
//!
//! Strides are in elements and signed, so padded rows, reversed rows and
//! every-other-byte channel views are all expressed without copying.

use std::fmt;
use std::marker::PhantomData;

use crate::error::{FilterError, FilterResult};

/// Maximum number of dimensions a buffer descriptor carries.
pub const MAX_DIMS: usize = 4;

/// Layout-stable buffer descriptor.
///
/// Field order and widths match the descriptor consumed by externally
/// compiled pipelines; do not reorder.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RawBuffer {
    pub host: *mut u8,
    pub extent: [i32; MAX_DIMS],
    pub stride: [i32; MAX_DIMS],
    pub min: [i32; MAX_DIMS],
    pub elem_size: i32,
    pub host_dirty: bool,
    pub dev_dirty: bool,
}

impl Default for RawBuffer {
    fn default() -> Self {
        Self {
            host: std::ptr::null_mut(),
            extent: [0; MAX_DIMS],
            stride: [0; MAX_DIMS],
            min: [0; MAX_DIMS],
            elem_size: 0,
            host_dirty: false,
            dev_dirty: false,
        }
    }
}

/// A non-owning view of up to four strided dimensions of pixel memory.
///
/// The lifetime ties views built from slices to their backing storage.
/// Views built from a [`RawBuffer`] carry whatever lifetime the caller
/// promises in [`StridedBuffer::from_raw`].
#[derive(Clone, Copy)]
pub struct StridedBuffer<'a> {
    host: *mut u8,
    extent: [i32; MAX_DIMS],
    stride: [i32; MAX_DIMS],
    min: [i32; MAX_DIMS],
    elem_size: i32,
    host_dirty: bool,
    _memory: PhantomData<&'a mut [u8]>,
}

// Kernels hand each worker a disjoint set of rows; the view itself is only
// an address table.
unsafe impl Send for StridedBuffer<'_> {}
unsafe impl Sync for StridedBuffer<'_> {}

impl<'a> StridedBuffer<'a> {
    /// Wrap an externally described buffer.
    ///
    /// # Safety
    ///
    /// Every coordinate inside `[min, min + extent)` must address memory
    /// that stays valid and writable for `'a`, and nothing else may hold a
    /// Rust reference into that memory while the view is used.
    pub unsafe fn from_raw(raw: RawBuffer) -> FilterResult<Self> {
        if raw.host.is_null() {
            return Err(FilterError::InvalidBuffer("host pointer is null".into()));
        }
        if raw.elem_size <= 0 {
            return Err(FilterError::InvalidBuffer(format!(
                "element size must be positive, got {}",
                raw.elem_size
            )));
        }
        if let Some(d) = raw.extent.iter().position(|e| *e < 0) {
            return Err(FilterError::InvalidBuffer(format!(
                "negative extent {} in dimension {d}",
                raw.extent[d]
            )));
        }
        Ok(Self {
            host: raw.host,
            extent: raw.extent,
            stride: raw.stride,
            min: raw.min,
            elem_size: raw.elem_size,
            host_dirty: raw.host_dirty,
            _memory: PhantomData,
        })
    }

    /// Byte-element 2-D view over a slice with `row_stride` bytes per row.
    pub fn from_slice_2d(
        data: &'a mut [u8],
        width: u32,
        height: u32,
        row_stride: usize,
    ) -> FilterResult<Self> {
        let w = usize::try_from(width).map_err(|_| overflow())?;
        let h = usize::try_from(height).map_err(|_| overflow())?;
        if row_stride < w {
            return Err(FilterError::InvalidBuffer(format!(
                "row stride {row_stride} is smaller than width {w}"
            )));
        }
        let required = if w == 0 || h == 0 {
            0
        } else {
            (h - 1)
                .checked_mul(row_stride)
                .and_then(|rows| rows.checked_add(w))
                .ok_or_else(overflow)?
        };
        if data.len() < required {
            return Err(FilterError::InvalidBuffer(format!(
                "backing slice too small: got {} bytes, need {required} for {w}x{h} with stride {row_stride}",
                data.len()
            )));
        }
        let to_i32 = |v: usize| i32::try_from(v).map_err(|_| overflow());
        Ok(Self {
            host: data.as_mut_ptr(),
            extent: [to_i32(w)?, to_i32(h)?, 0, 0],
            stride: [1, to_i32(row_stride)?, 0, 0],
            min: [0; MAX_DIMS],
            elem_size: 1,
            host_dirty: true,
            _memory: PhantomData,
        })
    }

    /// Tightly packed byte-element 2-D view.
    pub fn packed_2d(data: &'a mut [u8], width: u32, height: u32) -> FilterResult<Self> {
        Self::from_slice_2d(data, width, height, width as usize)
    }

    pub fn to_raw(&self) -> RawBuffer {
        RawBuffer {
            host: self.host,
            extent: self.extent,
            stride: self.stride,
            min: self.min,
            elem_size: self.elem_size,
            host_dirty: self.host_dirty,
            dev_dirty: false,
        }
    }

    pub fn host_ptr(&self) -> *mut u8 {
        self.host
    }

    pub fn extent(&self, dim: usize) -> i32 {
        self.extent[dim]
    }

    pub fn stride(&self, dim: usize) -> i32 {
        self.stride[dim]
    }

    pub fn min(&self, dim: usize) -> i32 {
        self.min[dim]
    }

    pub fn width(&self) -> i32 {
        self.extent[0]
    }

    pub fn height(&self) -> i32 {
        self.extent[1]
    }

    pub fn elem_size(&self) -> i32 {
        self.elem_size
    }

    pub fn host_dirty(&self) -> bool {
        self.host_dirty
    }

    pub fn set_host_dirty(&mut self, dirty: bool) {
        self.host_dirty = dirty;
    }

    /// Number of elements the view covers; zero-extent trailing dimensions
    /// are treated as absent.
    pub fn element_count(&self) -> usize {
        let used = self.extent.iter().take_while(|e| **e > 0).count();
        if used == 0 {
            return 0;
        }
        self.extent[..used].iter().map(|e| *e as usize).product()
    }

    pub fn is_empty(&self) -> bool {
        self.element_count() == 0
    }

    /// Byte offset of `coords` from `host`. Dimensions beyond `coords.len()`
    /// are taken at their minimum.
    #[inline(always)]
    pub fn byte_offset(&self, coords: &[i32]) -> isize {
        let mut offset = 0isize;
        for (d, coord) in coords.iter().enumerate().take(MAX_DIMS) {
            offset += (*coord as isize - self.min[d] as isize) * self.stride[d] as isize;
        }
        offset * self.elem_size as isize
    }

    /// Address of the element at `coords`. No bounds checking: callers
    /// validate extents before touching memory.
    #[inline(always)]
    pub fn address_of(&self, coords: &[i32]) -> *mut u8 {
        self.host.wrapping_offset(self.byte_offset(coords))
    }

    pub fn contains(&self, coords: &[i32]) -> bool {
        coords.iter().enumerate().take(MAX_DIMS).all(|(d, c)| {
            *c >= self.min[d] && (*c as i64) < self.min[d] as i64 + self.extent[d] as i64
        })
    }

    /// Extent equality over every dimension; the precondition for all
    /// two-input kernels.
    pub fn extents_equal(&self, other: &StridedBuffer<'_>) -> bool {
        self.extent == other.extent
    }

    pub fn describe_extents(&self) -> String {
        format!("{}x{}", self.extent[0], self.extent[1])
    }

    /// Re-label logical coordinates so the first element sits at
    /// `(min_x, min_y)`. Memory is untouched.
    pub fn with_min(mut self, min_x: i32, min_y: i32) -> Self {
        self.min[0] = min_x;
        self.min[1] = min_y;
        self
    }

    /// Sub-rectangle in logical coordinates. The result keeps absolute
    /// coordinates: its minimum is `(x, y)`.
    pub fn crop_2d(&self, x: i32, y: i32, width: i32, height: i32) -> FilterResult<Self> {
        let inside = width >= 0
            && height >= 0
            && x >= self.min[0]
            && y >= self.min[1]
            && x as i64 + width as i64 <= self.min[0] as i64 + self.extent[0] as i64
            && y as i64 + height as i64 <= self.min[1] as i64 + self.extent[1] as i64;
        if !inside {
            return Err(FilterError::InvalidBuffer(format!(
                "crop ({x}, {y}) {width}x{height} outside {} buffer at ({}, {})",
                self.describe_extents(),
                self.min[0],
                self.min[1]
            )));
        }
        let mut view = *self;
        view.host = self.address_of(&[x, y]);
        view.extent[0] = width;
        view.extent[1] = height;
        view.min[0] = x;
        view.min[1] = y;
        Ok(view)
    }

    /// The same memory with the innermost coordinate reversed.
    pub fn mirrored_x(&self) -> Self {
        let mut view = *self;
        if self.extent[0] > 0 {
            view.host = self.address_of(&[self.min[0] + self.extent[0] - 1, self.min[1]]);
            view.stride[0] = -self.stride[0];
        }
        view
    }

    /// One channel of a plane whose innermost dimension interleaves
    /// `channels` samples. The result has `extent[0] / channels` columns.
    ///
    /// Fails unless `channels > 0` and `0 <= channel < channels`.
    pub fn channel_view(&self, channel: i32, channels: i32) -> FilterResult<Self> {
        if channels <= 0 || !(0..channels).contains(&channel) {
            return Err(FilterError::InvalidBuffer(format!(
                "channel {channel} of {channels} is not a valid interleaved channel"
            )));
        }
        Ok(self.channel_view_unchecked(channel, channels))
    }

    /// U/V half of a two-channel interleaved chroma plane.
    pub(crate) fn interleaved_half(&self, second: bool) -> Self {
        self.channel_view_unchecked(i32::from(second), 2)
    }

    fn channel_view_unchecked(&self, channel: i32, channels: i32) -> Self {
        let mut view = *self;
        let step = self.stride[0] as isize * self.elem_size as isize;
        view.host = self.host.wrapping_offset(channel as isize * step);
        view.extent[0] = self.extent[0] / channels;
        view.stride[0] = self.stride[0] * channels;
        view.min[0] = self.min[0] / channels;
        view
    }

    /// Rows from `self` followed by rows from `other`, as a single view.
    /// Only valid when `other` starts exactly where `self`'s row stride
    /// would place row `height`.
    pub(crate) fn stacked_with(&self, other: &StridedBuffer<'_>) -> Option<Self> {
        let same_shape = self.extent[0] == other.extent[0]
            && self.stride == other.stride
            && self.elem_size == other.elem_size;
        let next_row = self.address_of(&[self.min[0], self.min[1] + self.extent[1]]);
        if !same_shape || next_row != other.host {
            return None;
        }
        let mut view = *self;
        view.extent[1] = self.extent[1] + other.extent[1];
        Some(view)
    }

    /// Lowest address and one-past-highest address the view can touch.
    pub(crate) fn byte_span(&self) -> (usize, usize) {
        if self.is_empty() {
            return (self.host as usize, self.host as usize);
        }
        let mut low = 0isize;
        let mut high = 0isize;
        for d in 0..MAX_DIMS {
            if self.extent[d] <= 0 {
                continue;
            }
            let reach = (self.extent[d] as isize - 1) * self.stride[d] as isize * self.elem_size as isize;
            if reach < 0 {
                low += reach;
            } else {
                high += reach;
            }
        }
        let base = self.host as usize;
        (
            base.wrapping_add_signed(low),
            base.wrapping_add_signed(high) + self.elem_size as usize,
        )
    }

    pub(crate) fn require_byte_elements(&self, what: &str) -> FilterResult<()> {
        if self.elem_size != 1 {
            return Err(FilterError::UnsupportedFormat(format!(
                "{what} has element size {}, only 1-byte elements are supported",
                self.elem_size
            )));
        }
        Ok(())
    }

    /// # Safety
    ///
    /// `(x, y)` must lie inside the view.
    #[inline(always)]
    pub unsafe fn read(&self, x: i32, y: i32) -> u8 {
        unsafe { *self.address_of(&[x, y]) }
    }

    /// # Safety
    ///
    /// `(x, y)` must lie inside the view and no reference may alias it.
    #[inline(always)]
    pub unsafe fn write(&self, x: i32, y: i32, value: u8) {
        unsafe { *self.address_of(&[x, y]) = value }
    }

    /// Contiguous byte row, when the innermost stride is exactly one.
    #[inline(always)]
    pub(crate) unsafe fn row_slice(&self, y: i32) -> Option<&'a [u8]> {
        if self.stride[0] != 1 || self.elem_size != 1 {
            return None;
        }
        let ptr = self.address_of(&[self.min[0], y]);
        Some(unsafe { std::slice::from_raw_parts(ptr, self.extent[0] as usize) })
    }

    #[inline(always)]
    pub(crate) unsafe fn row_slice_mut(&self, y: i32) -> Option<&'a mut [u8]> {
        if self.stride[0] != 1 || self.elem_size != 1 {
            return None;
        }
        let ptr = self.address_of(&[self.min[0], y]);
        Some(unsafe { std::slice::from_raw_parts_mut(ptr, self.extent[0] as usize) })
    }
}

/// Fail unless every buffer in `others` has `first`'s extents.
pub(crate) fn require_equal_extents(
    operation: &str,
    first: &StridedBuffer<'_>,
    others: &[&StridedBuffer<'_>],
) -> FilterResult<()> {
    if others.iter().all(|b| first.extents_equal(b)) {
        return Ok(());
    }
    let mut detail = format!("{operation}: {}", first.describe_extents());
    for other in others {
        detail.push_str(" vs ");
        detail.push_str(&other.describe_extents());
    }
    Err(FilterError::ExtentMismatch(detail))
}

fn overflow() -> FilterError {
    FilterError::InvalidBuffer("buffer dimensions overflow".into())
}

impl fmt::Debug for StridedBuffer<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StridedBuffer")
            .field("host", &self.host)
            .field("extent", &self.extent)
            .field("stride", &self.stride)
            .field("min", &self.min)
            .field("elem_size", &self.elem_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addressing_honours_padded_rows() {
        let mut data = vec![0u8; 3 * 8];
        let buf = StridedBuffer::from_slice_2d(&mut data, 5, 3, 8).unwrap();
        assert_eq!(buf.byte_offset(&[4, 2]), 2 * 8 + 4);
        unsafe { buf.write(4, 2, 9) };
        assert_eq!(data[20], 9);
    }

    #[test]
    fn short_slice_is_rejected() {
        let mut data = vec![0u8; 10];
        let err = StridedBuffer::from_slice_2d(&mut data, 4, 3, 4).unwrap_err();
        assert!(err.is_precondition());
        // Last row only needs `width` bytes, not a full stride.
        let mut data = vec![0u8; 2 * 6 + 4];
        assert!(StridedBuffer::from_slice_2d(&mut data, 4, 3, 6).is_ok());
    }

    #[test]
    fn mirrored_view_reverses_columns() {
        let mut data: Vec<u8> = (0..8).collect();
        let buf = StridedBuffer::packed_2d(&mut data, 4, 2).unwrap();
        let mirrored = buf.mirrored_x();
        unsafe {
            assert_eq!(mirrored.read(0, 0), 3);
            assert_eq!(mirrored.read(3, 0), 0);
            assert_eq!(mirrored.read(1, 1), 6);
        }
    }

    #[test]
    fn channel_view_splits_interleaved_samples() {
        let mut data = vec![10u8, 20, 11, 21, 12, 22, 13, 23];
        let buf = StridedBuffer::packed_2d(&mut data, 4, 2).unwrap();
        let second = buf.channel_view(1, 2).unwrap();
        assert_eq!(second.width(), 2);
        unsafe {
            assert_eq!(second.read(0, 0), 20);
            assert_eq!(second.read(1, 1), 23);
        }
        assert_eq!(buf.interleaved_half(true).host_ptr(), second.host_ptr());
    }

    #[test]
    fn channel_outside_the_interleave_is_rejected() {
        let mut data = vec![0u8; 8];
        let (head, tail) = data.split_at_mut(4);
        let buf = StridedBuffer::packed_2d(head, 4, 1).unwrap();
        for (channel, channels) in [(3, 2), (2, 2), (-1, 2), (0, 0), (0, -2)] {
            let err = buf.channel_view(channel, channels).unwrap_err();
            assert!(err.is_precondition(), "({channel}, {channels})");
        }
        assert!(tail.iter().all(|b| *b == 0));
    }

    #[test]
    fn crop_keeps_absolute_coordinates() {
        let mut data: Vec<u8> = (0..16).collect();
        let buf = StridedBuffer::packed_2d(&mut data, 4, 4).unwrap();
        let crop = buf.crop_2d(1, 2, 2, 2).unwrap();
        assert_eq!(crop.min(0), 1);
        unsafe { assert_eq!(crop.read(1, 2), 9) };
        assert!(buf.crop_2d(3, 3, 2, 1).is_err());
    }

    #[test]
    fn raw_round_trip_and_null_rejection() {
        let mut data = vec![0u8; 4];
        let buf = StridedBuffer::packed_2d(&mut data, 2, 2).unwrap();
        let raw = buf.to_raw();
        let again = unsafe { StridedBuffer::from_raw(raw) }.unwrap();
        assert!(again.extents_equal(&buf));
        assert!(unsafe { StridedBuffer::from_raw(RawBuffer::default()) }.is_err());
    }

    #[test]
    fn stacked_planes_form_one_view() {
        let mut data = vec![0u8; 8];
        let whole = StridedBuffer::packed_2d(&mut data, 2, 4).unwrap();
        let top = whole.crop_2d(0, 0, 2, 2).unwrap().with_min(0, 0);
        let bottom = whole.crop_2d(0, 2, 2, 2).unwrap().with_min(0, 0);
        let stacked = top.stacked_with(&bottom).unwrap();
        assert_eq!(stacked.height(), 4);
        assert!(bottom.stacked_with(&top).is_none());
    }
}
