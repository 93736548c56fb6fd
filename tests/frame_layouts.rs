// Integration tests for frame construction, layout conversion and the
// interleave kernels, through the public API only.

use snow_diff::kernel::{self, STATUS_SUCCESS};
use snow_diff::{
    ChromaLayout, ChromaStorage, Dispatcher, DispatcherConfig, FilterError, RawBuffer,
    StridedBuffer, YuvFrame, copy_frame,
};

fn pooled() -> Dispatcher {
    Dispatcher::new(DispatcherConfig {
        max_workers: 4,
        force_serial: false,
        rows_per_task: 2,
        ..DispatcherConfig::default()
    })
    .unwrap()
}

fn pattern(len: usize, seed: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 13 + seed) % 251) as u8).collect()
}

// ===== Layout conversion =====

#[test_log::test]
fn nv21_to_i420_routes_v_first() {
    let (w, h) = (16usize, 10usize);
    let mut src = pattern(w * h * 3 / 2, 3);
    let expected = src.clone();
    let mut dst = vec![0u8; src.len()];
    let d = pooled();
    {
        let s = YuvFrame::from_nv21(&mut src, w as u32, h as u32).unwrap();
        let mut t = YuvFrame::from_i420(&mut dst, w as u32, h as u32).unwrap();
        copy_frame(&s, &mut t, &d).unwrap();
    }
    assert_eq!(&dst[..w * h], &expected[..w * h]);
    let (cw, ch) = (w / 2, h / 2);
    let u_plane = &dst[w * h..w * h + cw * ch];
    let v_plane = &dst[w * h + cw * ch..];
    for y in 0..ch {
        for x in 0..cw {
            let pair = w * h + y * w + 2 * x;
            assert_eq!(v_plane[y * cw + x], expected[pair], "V at ({x}, {y})");
            assert_eq!(u_plane[y * cw + x], expected[pair + 1], "U at ({x}, {y})");
        }
    }
}

#[test_log::test]
fn nv12_to_yv12_routes_u_first() {
    let (w, h) = (8usize, 4usize);
    let mut src = pattern(w * h * 3 / 2, 9);
    let expected = src.clone();
    let mut dst = vec![0u8; src.len()];
    {
        let s = YuvFrame::from_nv12(&mut src, w as u32, h as u32).unwrap();
        let mut t = YuvFrame::from_yv12(&mut dst, w as u32, h as u32).unwrap();
        copy_frame(&s, &mut t, &Dispatcher::serial()).unwrap();
    }
    // YV12 stores V first.
    let plane = (w / 2) * (h / 2);
    assert_eq!(dst[w * h], expected[w * h + 1]);
    assert_eq!(dst[w * h + plane], expected[w * h]);
}

#[test_log::test]
fn planar_round_trip_through_interleaved() {
    let (w, h) = (12usize, 6usize);
    let mut original = pattern(w * h * 3 / 2, 1);
    let snapshot = original.clone();
    let mut interleaved = vec![0u8; original.len()];
    let mut back = vec![0u8; original.len()];
    let d = pooled();
    {
        let a = YuvFrame::from_i420(&mut original, w as u32, h as u32).unwrap();
        let mut b = YuvFrame::from_nv21(&mut interleaved, w as u32, h as u32).unwrap();
        let mut c = YuvFrame::from_i420(&mut back, w as u32, h as u32).unwrap();
        copy_frame(&a, &mut b, &d).unwrap();
        copy_frame(&b, &mut c, &d).unwrap();
    }
    assert_eq!(back, snapshot);
}

#[test_log::test]
fn nv12_round_trip_through_planar() {
    let (w, h) = (12usize, 6usize);
    let mut original = pattern(w * h * 3 / 2, 9);
    let snapshot = original.clone();
    let mut planar = vec![0u8; original.len()];
    let mut back = vec![0u8; original.len()];
    let d = pooled();
    {
        let a = YuvFrame::from_nv12(&mut original, w as u32, h as u32).unwrap();
        let mut b = YuvFrame::from_i420(&mut planar, w as u32, h as u32).unwrap();
        let mut c = YuvFrame::from_nv12(&mut back, w as u32, h as u32).unwrap();
        copy_frame(&a, &mut b, &d).unwrap();
        copy_frame(&b, &mut c, &d).unwrap();
    }
    assert_eq!(back, snapshot);

    // NV12 stores U first, so the planar U plane takes the even samples.
    let (luma, quarter) = (w * h, w * h / 4);
    let even: Vec<u8> = snapshot[luma..].iter().step_by(2).copied().collect();
    let odd: Vec<u8> = snapshot[luma + 1..].iter().step_by(2).copied().collect();
    assert_eq!(&planar[luma..luma + quarter], &even[..]);
    assert_eq!(&planar[luma + quarter..], &odd[..]);
}

#[test_log::test]
fn copy_between_mismatched_frames_is_rejected() {
    let mut a = vec![1u8; 8 * 8 * 3 / 2];
    let mut b = vec![2u8; 8 * 4 * 3 / 2];
    let s = YuvFrame::from_nv12(&mut a, 8, 8).unwrap();
    let mut t = YuvFrame::from_nv12(&mut b, 8, 4).unwrap();
    let err = copy_frame(&s, &mut t, &Dispatcher::serial()).unwrap_err();
    assert!(matches!(err, FilterError::ExtentMismatch(_)));
    assert!(b.iter().all(|p| *p == 2));
}

// ===== Interleave kernels =====

#[test_log::test]
fn deinterleave_then_interleave_restores_plane() {
    let (cw, ch) = (5u32, 3u32);
    let mut src = pattern((2 * cw * ch) as usize, 4);
    let snapshot = src.clone();
    let mut first = vec![0u8; (cw * ch) as usize];
    let mut second = vec![0u8; (cw * ch) as usize];
    let mut rebuilt = vec![0u8; src.len()];
    let d = pooled();

    let plane = StridedBuffer::packed_2d(&mut src, 2 * cw, ch).unwrap();
    let mut a = StridedBuffer::packed_2d(&mut first, cw, ch).unwrap();
    let mut b = StridedBuffer::packed_2d(&mut second, cw, ch).unwrap();
    assert_eq!(kernel::deinterleave(&plane, &mut a, &mut b, &d), STATUS_SUCCESS);
    let mut out = StridedBuffer::packed_2d(&mut rebuilt, 2 * cw, ch).unwrap();
    assert_eq!(kernel::interleave(&a, &b, &mut out, &d), STATUS_SUCCESS);

    assert_eq!(rebuilt, snapshot);
    assert_eq!(first[0], snapshot[0]);
    assert_eq!(second[0], snapshot[1]);
}

// ===== Host descriptors =====

#[test_log::test]
fn raw_descriptors_build_a_frame() {
    let mut luma = vec![0u8; 4 * 2];
    let mut chroma = vec![0u8; 4];
    let raw_luma = StridedBuffer::packed_2d(&mut luma, 4, 2).unwrap().to_raw();
    let raw_chroma = StridedBuffer::packed_2d(&mut chroma, 4, 1).unwrap().to_raw();
    let frame =
        unsafe { YuvFrame::from_raw(raw_luma, ChromaLayout::InterleavedVFirst, raw_chroma, None) }
            .unwrap();
    assert_eq!(frame.chroma_layout(), ChromaLayout::InterleavedVFirst);
    assert!(matches!(frame.chroma_storage(), ChromaStorage::InterleavedVFirst(_)));

    let planar = unsafe {
        YuvFrame::from_raw(raw_luma, ChromaLayout::PlanarGeneric, raw_chroma, None)
    };
    assert!(planar.is_err());

    let null = unsafe { StridedBuffer::from_raw(RawBuffer::default()) };
    assert!(null.is_err());
}
