//! Stateless pixel kernels over [`StridedBuffer`]s.
//!
//! Every kernel validates element sizes and extents before the first byte
//! is written, then runs its row loop through a [`Dispatcher`] with each
//! unit owning a disjoint band of rows. Only 1-byte elements are accepted.

mod parallel;
mod scalar;

pub(crate) use parallel::{run_row_chunks, ranges_overlap};

use log::trace;

use crate::buffer::{StridedBuffer, require_equal_extents};
use crate::dispatch::Dispatcher;
use crate::error::{FilterError, FilterResult, status_to_result};
use parallel::run_rows;

/// Status codes returned by the status-reporting kernels
/// ([`deinterleave`], [`interleave`]).
pub const STATUS_SUCCESS: i32 = 0;
pub const STATUS_UNSUPPORTED_FORMAT: i32 = -2;
pub const STATUS_EXTENT_MISMATCH: i32 = -3;
/// The interleaved plane shares memory with a planar buffer.
pub const STATUS_PARTIAL_OVERLAP: i32 = -4;

/// Luma written by [`overlay_marker`].
pub const MARKER_LUMA: u8 = u8::MAX;
/// Chroma written by [`overlay_marker`].
pub const MARKER_CHROMA: u8 = 0;

/// Parameters of [`diff_and_threshold`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DiffParams {
    /// Subtracted from every absolute difference, clamping at zero, to
    /// suppress sensor noise.
    pub noise_floor: u8,
    /// Reverse the innermost coordinate of the output.
    pub mirror: bool,
}

impl Default for DiffParams {
    fn default() -> Self {
        Self {
            noise_floor: 5,
            mirror: false,
        }
    }
}

fn check_binary(
    operation: &str,
    src: &StridedBuffer<'_>,
    dst: &StridedBuffer<'_>,
) -> FilterResult<()> {
    src.require_byte_elements(&format!("{operation} source"))?;
    dst.require_byte_elements(&format!("{operation} destination"))?;
    require_equal_extents(operation, src, &[dst])
}

/// Same memory, same layout: element `i` of one view is element `i` of the
/// other.
fn same_view(a: &StridedBuffer<'_>, b: &StridedBuffer<'_>) -> bool {
    a.host_ptr() == b.host_ptr()
        && a.elem_size() == b.elem_size()
        && (0..crate::buffer::MAX_DIMS).all(|d| a.stride(d) == b.stride(d))
}

/// Inputs may be the output itself, but never a shifted or reshaped view of
/// it: units would read rows other units are writing.
fn partially_overlaps(input: &StridedBuffer<'_>, output: &StridedBuffer<'_>) -> bool {
    ranges_overlap(input.byte_span(), output.byte_span()) && !same_view(input, output)
}

fn check_overlap(
    operation: &str,
    input: &StridedBuffer<'_>,
    output: &StridedBuffer<'_>,
) -> FilterResult<()> {
    if partially_overlaps(input, output) {
        return Err(FilterError::InvalidBuffer(format!(
            "{operation} source and destination partially overlap"
        )));
    }
    Ok(())
}

fn copy_rows(
    operation: &'static str,
    src: StridedBuffer<'_>,
    dst: &mut StridedBuffer<'_>,
    dispatcher: &Dispatcher,
) -> FilterResult<()> {
    let out = *dst;
    let width = src.width() as usize;
    let (src_step, dst_step) = (src.stride(0) as isize, out.stride(0) as isize);
    let status = run_rows(dispatcher, src.height(), |row| unsafe {
        scalar::copy_row(
            src.address_of(&[src.min(0), src.min(1) + row]),
            src_step,
            out.address_of(&[out.min(0), out.min(1) + row]),
            dst_step,
            width,
        );
    });
    dst.set_host_dirty(true);
    status_to_result(operation, status)
}

/// Element-wise copy honouring both buffers' strides.
pub fn copy_2d(
    src: &StridedBuffer<'_>,
    dst: &mut StridedBuffer<'_>,
    dispatcher: &Dispatcher,
) -> FilterResult<()> {
    check_binary("copy2D", src, dst)?;
    if src.is_empty() {
        return Ok(());
    }
    check_overlap("copy2D", src, dst)?;
    copy_rows("copy2D", *src, dst, dispatcher)
}

/// Copy with the innermost coordinate reversed: `dst(x, y) = src(w − 1 − x, y)`.
///
/// Source and destination must not share memory.
pub fn flip_horizontal_2d(
    src: &StridedBuffer<'_>,
    dst: &mut StridedBuffer<'_>,
    dispatcher: &Dispatcher,
) -> FilterResult<()> {
    check_binary("flipHorizontal2D", src, dst)?;
    if src.is_empty() {
        return Ok(());
    }
    if ranges_overlap(src.byte_span(), dst.byte_span()) {
        return Err(FilterError::InvalidBuffer(
            "flipHorizontal2D source and destination overlap".into(),
        ));
    }
    copy_rows("flipHorizontal2D", src.mirrored_x(), dst, dispatcher)
}

/// Set every addressed element to `value`.
pub fn fill_2d(dst: &mut StridedBuffer<'_>, value: u8, dispatcher: &Dispatcher) -> FilterResult<()> {
    dst.require_byte_elements("fill2D destination")?;
    if dst.is_empty() {
        return Ok(());
    }
    let out = *dst;
    let width = out.width() as usize;
    let step = out.stride(0) as isize;
    let status = run_rows(dispatcher, out.height(), |row| unsafe {
        scalar::fill_row(out.address_of(&[out.min(0), out.min(1) + row]), step, width, value);
    });
    dst.set_host_dirty(true);
    status_to_result("fill2D", status)
}

/// Split a two-channel interleaved plane (`2w × h`) into two planar
/// `w × h` buffers: even samples to `first`, odd samples to `second`.
///
/// Returns [`STATUS_SUCCESS`] or a nonzero status; nothing is written when
/// a precondition fails.
pub fn deinterleave(
    src: &StridedBuffer<'_>,
    first: &mut StridedBuffer<'_>,
    second: &mut StridedBuffer<'_>,
    dispatcher: &Dispatcher,
) -> i32 {
    if src.elem_size() != 1 || first.elem_size() != 1 || second.elem_size() != 1 {
        return STATUS_UNSUPPORTED_FORMAT;
    }
    if !planar_pair_matches(src, first, second) {
        return STATUS_EXTENT_MISMATCH;
    }
    if ranges_overlap(src.byte_span(), first.byte_span())
        || ranges_overlap(src.byte_span(), second.byte_span())
    {
        return STATUS_PARTIAL_OVERLAP;
    }
    let (src, a, b) = (*src, *first, *second);
    let width = a.width() as usize;
    let status = run_rows(dispatcher, a.height(), |row| unsafe {
        scalar::deinterleave_row(
            src.address_of(&[src.min(0), src.min(1) + row]),
            src.stride(0) as isize,
            a.address_of(&[a.min(0), a.min(1) + row]),
            a.stride(0) as isize,
            b.address_of(&[b.min(0), b.min(1) + row]),
            b.stride(0) as isize,
            width,
        );
    });
    first.set_host_dirty(true);
    second.set_host_dirty(true);
    status
}

/// Inverse of [`deinterleave`]: `dst(2x) = first(x)`, `dst(2x + 1) = second(x)`.
pub fn interleave(
    first: &StridedBuffer<'_>,
    second: &StridedBuffer<'_>,
    dst: &mut StridedBuffer<'_>,
    dispatcher: &Dispatcher,
) -> i32 {
    if dst.elem_size() != 1 || first.elem_size() != 1 || second.elem_size() != 1 {
        return STATUS_UNSUPPORTED_FORMAT;
    }
    if !planar_pair_matches(dst, first, second) {
        return STATUS_EXTENT_MISMATCH;
    }
    if ranges_overlap(first.byte_span(), dst.byte_span())
        || ranges_overlap(second.byte_span(), dst.byte_span())
    {
        return STATUS_PARTIAL_OVERLAP;
    }
    let (out, a, b) = (*dst, *first, *second);
    let width = a.width() as usize;
    let status = run_rows(dispatcher, a.height(), |row| unsafe {
        scalar::interleave_row(
            a.address_of(&[a.min(0), a.min(1) + row]),
            a.stride(0) as isize,
            b.address_of(&[b.min(0), b.min(1) + row]),
            b.stride(0) as isize,
            out.address_of(&[out.min(0), out.min(1) + row]),
            out.stride(0) as isize,
            width,
        );
    });
    dst.set_host_dirty(true);
    status
}

fn planar_pair_matches(
    interleaved: &StridedBuffer<'_>,
    first: &StridedBuffer<'_>,
    second: &StridedBuffer<'_>,
) -> bool {
    first.extents_equal(second)
        && interleaved.width() == first.width() * 2
        && interleaved.height() == first.height()
        && (2..crate::buffer::MAX_DIMS).all(|d| interleaved.extent(d) == first.extent(d))
}

/// Thresholded absolute difference of two 8-bit planes.
///
/// Each output byte is `clamp(|b − a| − noise_floor, 0, 255)`, computed in
/// a signed 16-bit domain. With `mirror` set the output is horizontally
/// reversed.
pub fn diff_and_threshold(
    input_a: &StridedBuffer<'_>,
    input_b: &StridedBuffer<'_>,
    dst: &mut StridedBuffer<'_>,
    params: DiffParams,
    dispatcher: &Dispatcher,
) -> FilterResult<()> {
    input_a.require_byte_elements("diffAndThreshold input A")?;
    input_b.require_byte_elements("diffAndThreshold input B")?;
    dst.require_byte_elements("diffAndThreshold destination")?;
    require_equal_extents("diffAndThreshold", dst, &[input_a, input_b])?;
    if dst.is_empty() {
        return Ok(());
    }

    let out_span = dst.byte_span();
    let aliased = ranges_overlap(out_span, input_a.byte_span())
        || ranges_overlap(out_span, input_b.byte_span());
    if aliased && params.mirror {
        return Err(FilterError::InvalidBuffer(
            "diffAndThreshold cannot mirror in place".into(),
        ));
    }
    check_overlap("diffAndThreshold", input_a, dst)?;
    check_overlap("diffAndThreshold", input_b, dst)?;

    let (a, b) = if params.mirror {
        (input_a.mirrored_x(), input_b.mirrored_x())
    } else {
        (*input_a, *input_b)
    };
    let out = *dst;
    let width = out.width() as usize;
    let floor = params.noise_floor;
    let contiguous = !aliased && a.stride(0) == 1 && b.stride(0) == 1 && out.stride(0) == 1;
    trace!(
        "diffAndThreshold {} floor={floor} mirror={} contiguous={contiguous}",
        out.describe_extents(),
        params.mirror
    );

    let status = run_rows(dispatcher, out.height(), |row| unsafe {
        let ya = a.min(1) + row;
        let yb = b.min(1) + row;
        let yo = out.min(1) + row;
        if contiguous
            && let (Some(ra), Some(rb), Some(ro)) =
                (a.row_slice(ya), b.row_slice(yb), out.row_slice_mut(yo))
        {
            scalar::abs_diff_row_contiguous(ra, rb, ro, floor);
            return;
        }
        scalar::abs_diff_row(
            a.address_of(&[a.min(0), ya]),
            a.stride(0) as isize,
            b.address_of(&[b.min(0), yb]),
            b.stride(0) as isize,
            out.address_of(&[out.min(0), yo]),
            out.stride(0) as isize,
            width,
            floor,
        );
    });
    dst.set_host_dirty(true);
    status_to_result("diffAndThreshold", status)
}

/// Paint a `size × size` marker at `(origin_x, origin_y)`: maximum luma,
/// zero chroma over the marker's 4:2:0 footprint.
///
/// Fails with [`FilterError::OutOfBounds`] before writing anything when
/// `origin + size` exceeds the luma extents on either axis.
pub fn overlay_marker(
    luma: &mut StridedBuffer<'_>,
    chroma_u: &mut StridedBuffer<'_>,
    chroma_v: &mut StridedBuffer<'_>,
    origin_x: u32,
    origin_y: u32,
    size: u32,
    dispatcher: &Dispatcher,
) -> FilterResult<()> {
    check_marker_bounds(luma, origin_x, origin_y, size)?;
    luma.require_byte_elements("overlayMarker luma")?;
    chroma_u.require_byte_elements("overlayMarker chroma U")?;
    chroma_v.require_byte_elements("overlayMarker chroma V")?;
    if size == 0 {
        return Ok(());
    }

    let (ox, oy, size) = (origin_x as i32, origin_y as i32, size as i32);
    let lum = *luma;
    let status = run_rows(dispatcher, size, |row| unsafe {
        scalar::fill_row(
            lum.address_of(&[lum.min(0) + ox, lum.min(1) + oy + row]),
            lum.stride(0) as isize,
            size as usize,
            MARKER_LUMA,
        );
    });
    status_to_result("overlayMarker", status)?;

    // Chroma samples touched by luma columns ox..ox+size at half resolution.
    let (u, v) = (*chroma_u, *chroma_v);
    let cx0 = ox / 2;
    let cy0 = oy / 2;
    let cx1 = ((ox + size - 1) / 2 + 1).min(u.width()).min(v.width());
    let cy1 = ((oy + size - 1) / 2 + 1).min(u.height()).min(v.height());
    if cx1 > cx0 && cy1 > cy0 {
        let cw = (cx1 - cx0) as usize;
        let status = run_rows(dispatcher, cy1 - cy0, |row| unsafe {
            for plane in [&u, &v] {
                scalar::fill_row(
                    plane.address_of(&[plane.min(0) + cx0, plane.min(1) + cy0 + row]),
                    plane.stride(0) as isize,
                    cw,
                    MARKER_CHROMA,
                );
            }
        });
        status_to_result("overlayMarker", status)?;
    }

    luma.set_host_dirty(true);
    chroma_u.set_host_dirty(true);
    chroma_v.set_host_dirty(true);
    Ok(())
}

/// `Ok` when a `size` square at `(x, y)` fits inside `plane`.
pub fn check_marker_bounds(
    plane: &StridedBuffer<'_>,
    x: u32,
    y: u32,
    size: u32,
) -> FilterResult<()> {
    let width = plane.width().max(0) as u32;
    let height = plane.height().max(0) as u32;
    if x as u64 + size as u64 > width as u64 || y as u64 + size as u64 > height as u64 {
        return Err(FilterError::OutOfBounds {
            x,
            y,
            size,
            width,
            height,
        });
    }
    Ok(())
}
