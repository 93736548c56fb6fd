//! Single-row byte loops. `*_step` arguments are signed byte distances
//! between consecutive samples; `1` takes the contiguous path.

#[inline(always)]
pub(crate) unsafe fn copy_row(src: *const u8, src_step: isize, dst: *mut u8, dst_step: isize, len: usize) {
    if src_step == 1 && dst_step == 1 {
        unsafe { std::ptr::copy(src, dst, len) };
        return;
    }
    for i in 0..len as isize {
        unsafe { *dst.offset(i * dst_step) = *src.offset(i * src_step) };
    }
}

#[inline(always)]
pub(crate) unsafe fn fill_row(dst: *mut u8, dst_step: isize, len: usize, value: u8) {
    if dst_step == 1 {
        unsafe { std::ptr::write_bytes(dst, value, len) };
        return;
    }
    for i in 0..len as isize {
        unsafe { *dst.offset(i * dst_step) = value };
    }
}

/// `|b − a|` in a signed 16-bit domain, minus `noise_floor`, clamped to
/// `0..=255`.
#[inline(always)]
pub(crate) fn thresholded_abs_diff(a: u8, b: u8, noise_floor: u8) -> u8 {
    let diff = (b as i16 - a as i16).abs();
    (diff - noise_floor as i16).clamp(0, u8::MAX as i16) as u8
}

#[inline(always)]
pub(crate) fn abs_diff_row_contiguous(a: &[u8], b: &[u8], dst: &mut [u8], noise_floor: u8) {
    for ((out, &pa), &pb) in dst.iter_mut().zip(a).zip(b) {
        *out = thresholded_abs_diff(pa, pb, noise_floor);
    }
}

#[inline(always)]
#[allow(clippy::too_many_arguments)]
pub(crate) unsafe fn abs_diff_row(
    a: *const u8,
    a_step: isize,
    b: *const u8,
    b_step: isize,
    dst: *mut u8,
    dst_step: isize,
    len: usize,
    noise_floor: u8,
) {
    for i in 0..len as isize {
        unsafe {
            *dst.offset(i * dst_step) =
                thresholded_abs_diff(*a.offset(i * a_step), *b.offset(i * b_step), noise_floor);
        }
    }
}

/// Split `len` sample pairs into two rows. Pairs are `src_step` apart
/// inside the pair and `2 * src_step` apart from each other.
#[inline(always)]
pub(crate) unsafe fn deinterleave_row(
    src: *const u8,
    src_step: isize,
    first: *mut u8,
    first_step: isize,
    second: *mut u8,
    second_step: isize,
    len: usize,
) {
    for i in 0..len as isize {
        unsafe {
            let pair = src.offset(2 * i * src_step);
            *first.offset(i * first_step) = *pair;
            *second.offset(i * second_step) = *pair.offset(src_step);
        }
    }
}

#[inline(always)]
pub(crate) unsafe fn interleave_row(
    first: *const u8,
    first_step: isize,
    second: *const u8,
    second_step: isize,
    dst: *mut u8,
    dst_step: isize,
    len: usize,
) {
    for i in 0..len as isize {
        unsafe {
            let pair = dst.offset(2 * i * dst_step);
            *pair = *first.offset(i * first_step);
            *pair.offset(dst_step) = *second.offset(i * second_step);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_suppresses_noise_and_saturates() {
        assert_eq!(thresholded_abs_diff(100, 103, 5), 0);
        assert_eq!(thresholded_abs_diff(103, 100, 0), 3);
        assert_eq!(thresholded_abs_diff(0, 255, 5), 250);
        assert_eq!(thresholded_abs_diff(255, 0, 0), 255);
    }

    #[test]
    fn reversed_step_copies_backwards() {
        let src = [1u8, 2, 3, 4];
        let mut dst = [0u8; 4];
        unsafe { copy_row(src.as_ptr().add(3), -1, dst.as_mut_ptr(), 1, 4) };
        assert_eq!(dst, [4, 3, 2, 1]);
    }
}
