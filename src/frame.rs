use std::fmt;

use crate::buffer::{RawBuffer, StridedBuffer};
use crate::dispatch::Dispatcher;
use crate::error::{FilterError, FilterResult, status_to_result};
use crate::kernel;

/// Chroma memory layout tag. Discriminants are stable for hosts that pass
/// the tag as an integer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ChromaLayout {
    /// One plane, samples alternate U, V (NV12).
    InterleavedUFirst = 0,
    /// One plane, samples alternate V, U (NV21).
    InterleavedVFirst = 1,
    /// Two planes back to back, U plane first (I420).
    PlanarPackedUFirst = 2,
    /// Two planes back to back, V plane first (YV12).
    PlanarPackedVFirst = 3,
    /// Two unrelated planes.
    PlanarGeneric = 4,
}

impl ChromaLayout {
    pub fn from_raw(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::InterleavedUFirst),
            1 => Some(Self::InterleavedVFirst),
            2 => Some(Self::PlanarPackedUFirst),
            3 => Some(Self::PlanarPackedVFirst),
            4 => Some(Self::PlanarGeneric),
            _ => None,
        }
    }

    pub const fn is_interleaved(self) -> bool {
        matches!(self, Self::InterleavedUFirst | Self::InterleavedVFirst)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InterleavedUFirst => "interleaved-u-first",
            Self::InterleavedVFirst => "interleaved-v-first",
            Self::PlanarPackedUFirst => "planar-packed-u-first",
            Self::PlanarPackedVFirst => "planar-packed-v-first",
            Self::PlanarGeneric => "planar-generic",
        }
    }
}

/// Chroma storage of a 4:2:0 frame.
///
/// Interleaved planes are `2·cw × ch` bytes wide; planar buffers are
/// `cw × ch` each. Which sample comes first is part of the variant and is
/// never inferred.
#[derive(Clone, Copy, Debug)]
pub enum ChromaStorage<'a> {
    InterleavedUFirst(StridedBuffer<'a>),
    InterleavedVFirst(StridedBuffer<'a>),
    /// `v` starts exactly where `u`'s rows end.
    PlanarPackedUFirst {
        u: StridedBuffer<'a>,
        v: StridedBuffer<'a>,
    },
    /// `u` starts exactly where `v`'s rows end.
    PlanarPackedVFirst {
        u: StridedBuffer<'a>,
        v: StridedBuffer<'a>,
    },
    PlanarGeneric {
        u: StridedBuffer<'a>,
        v: StridedBuffer<'a>,
    },
}

impl<'a> ChromaStorage<'a> {
    pub fn layout(&self) -> ChromaLayout {
        match self {
            Self::InterleavedUFirst(_) => ChromaLayout::InterleavedUFirst,
            Self::InterleavedVFirst(_) => ChromaLayout::InterleavedVFirst,
            Self::PlanarPackedUFirst { .. } => ChromaLayout::PlanarPackedUFirst,
            Self::PlanarPackedVFirst { .. } => ChromaLayout::PlanarPackedVFirst,
            Self::PlanarGeneric { .. } => ChromaLayout::PlanarGeneric,
        }
    }

    fn u(&self) -> StridedBuffer<'a> {
        match *self {
            Self::InterleavedUFirst(plane) => plane.interleaved_half(false),
            Self::InterleavedVFirst(plane) => plane.interleaved_half(true),
            Self::PlanarPackedUFirst { u, .. }
            | Self::PlanarPackedVFirst { u, .. }
            | Self::PlanarGeneric { u, .. } => u,
        }
    }

    fn v(&self) -> StridedBuffer<'a> {
        match *self {
            Self::InterleavedUFirst(plane) => plane.interleaved_half(true),
            Self::InterleavedVFirst(plane) => plane.interleaved_half(false),
            Self::PlanarPackedUFirst { v, .. }
            | Self::PlanarPackedVFirst { v, .. }
            | Self::PlanarGeneric { v, .. } => v,
        }
    }
}

/// A 4:2:0 YUV frame over caller-owned memory. Holds layout metadata only.
#[derive(Clone, Copy)]
pub struct YuvFrame<'a> {
    luma: StridedBuffer<'a>,
    chroma: ChromaStorage<'a>,
}

impl<'a> YuvFrame<'a> {
    /// Validate and assemble a frame.
    ///
    /// Requires 1-byte elements everywhere, chroma extents exactly half the
    /// luma extents on both axes, and truly adjacent planes for the packed
    /// layouts.
    pub fn new(luma: StridedBuffer<'a>, chroma: ChromaStorage<'a>) -> FilterResult<Self> {
        luma.require_byte_elements("luma")?;
        match chroma {
            ChromaStorage::InterleavedUFirst(plane) | ChromaStorage::InterleavedVFirst(plane) => {
                plane.require_byte_elements("interleaved chroma")?;
                if plane.width() % 2 != 0 {
                    return Err(FilterError::InvalidBuffer(format!(
                        "interleaved chroma width {} is odd",
                        plane.width()
                    )));
                }
            }
            ChromaStorage::PlanarPackedUFirst { u, v } => {
                require_planes(&u, &v)?;
                require_adjacent(&u, &v, "U", "V")?;
            }
            ChromaStorage::PlanarPackedVFirst { u, v } => {
                require_planes(&u, &v)?;
                require_adjacent(&v, &u, "V", "U")?;
            }
            ChromaStorage::PlanarGeneric { u, v } => require_planes(&u, &v)?,
        }

        let frame = Self { luma, chroma };
        for (name, plane) in [("chromaU", frame.chroma_u()), ("chromaV", frame.chroma_v())] {
            if plane.width() * 2 != luma.width() || plane.height() * 2 != luma.height() {
                return Err(FilterError::InvalidBuffer(format!(
                    "{name} {} is not half of luma {} (4:2:0 required)",
                    plane.describe_extents(),
                    luma.describe_extents()
                )));
            }
        }
        Ok(frame)
    }

    /// Assemble a frame from host descriptors. `second` is ignored for the
    /// interleaved layouts and required otherwise.
    ///
    /// # Safety
    ///
    /// Same contract as [`StridedBuffer::from_raw`] for every descriptor.
    pub unsafe fn from_raw(
        luma: RawBuffer,
        layout: ChromaLayout,
        first: RawBuffer,
        second: Option<RawBuffer>,
    ) -> FilterResult<Self> {
        let luma = unsafe { StridedBuffer::from_raw(luma)? };
        let first = unsafe { StridedBuffer::from_raw(first)? };
        let chroma = match layout {
            ChromaLayout::InterleavedUFirst => ChromaStorage::InterleavedUFirst(first),
            ChromaLayout::InterleavedVFirst => ChromaStorage::InterleavedVFirst(first),
            planar => {
                let raw = second.ok_or_else(|| {
                    FilterError::InvalidBuffer(format!(
                        "{} chroma needs two planes",
                        planar.as_str()
                    ))
                })?;
                let second = unsafe { StridedBuffer::from_raw(raw)? };
                match planar {
                    ChromaLayout::PlanarPackedVFirst => ChromaStorage::PlanarPackedVFirst {
                        u: second,
                        v: first,
                    },
                    ChromaLayout::PlanarPackedUFirst => ChromaStorage::PlanarPackedUFirst {
                        u: first,
                        v: second,
                    },
                    _ => ChromaStorage::PlanarGeneric {
                        u: first,
                        v: second,
                    },
                }
            }
        };
        Self::new(luma, chroma)
    }

    /// NV12 in one contiguous slice: luma, then interleaved U/V.
    pub fn from_nv12(data: &'a mut [u8], width: u32, height: u32) -> FilterResult<Self> {
        let (luma, chroma) = split_semi_planar(data, width, height)?;
        Self::new(luma, ChromaStorage::InterleavedUFirst(chroma))
    }

    /// NV21 in one contiguous slice: luma, then interleaved V/U.
    pub fn from_nv21(data: &'a mut [u8], width: u32, height: u32) -> FilterResult<Self> {
        let (luma, chroma) = split_semi_planar(data, width, height)?;
        Self::new(luma, ChromaStorage::InterleavedVFirst(chroma))
    }

    /// I420 in one contiguous slice: luma, U plane, V plane.
    pub fn from_i420(data: &'a mut [u8], width: u32, height: u32) -> FilterResult<Self> {
        let (luma, first, second) = split_planar(data, width, height)?;
        Self::new(luma, ChromaStorage::PlanarPackedUFirst { u: first, v: second })
    }

    /// YV12 in one contiguous slice: luma, V plane, U plane.
    pub fn from_yv12(data: &'a mut [u8], width: u32, height: u32) -> FilterResult<Self> {
        let (luma, first, second) = split_planar(data, width, height)?;
        Self::new(luma, ChromaStorage::PlanarPackedVFirst { u: second, v: first })
    }

    /// Three independent planes.
    pub fn from_planes(
        luma: StridedBuffer<'a>,
        u: StridedBuffer<'a>,
        v: StridedBuffer<'a>,
    ) -> FilterResult<Self> {
        Self::new(luma, ChromaStorage::PlanarGeneric { u, v })
    }

    pub fn luma(&self) -> StridedBuffer<'a> {
        self.luma
    }

    pub fn chroma_u(&self) -> StridedBuffer<'a> {
        self.chroma.u()
    }

    pub fn chroma_v(&self) -> StridedBuffer<'a> {
        self.chroma.v()
    }

    pub fn chroma_storage(&self) -> &ChromaStorage<'a> {
        &self.chroma
    }

    pub fn chroma_layout(&self) -> ChromaLayout {
        self.chroma.layout()
    }

    pub fn width(&self) -> i32 {
        self.luma.width()
    }

    pub fn height(&self) -> i32 {
        self.luma.height()
    }

    /// The whole interleaved chroma plane, for interleaved layouts.
    pub fn interleaved_chroma_view(&self) -> Option<StridedBuffer<'a>> {
        match self.chroma {
            ChromaStorage::InterleavedUFirst(plane) | ChromaStorage::InterleavedVFirst(plane) => {
                Some(plane)
            }
            _ => None,
        }
    }

    /// Both packed planes as one `cw × 2·ch` view, first plane on top.
    pub fn packed_planar_chroma_view(&self) -> Option<StridedBuffer<'a>> {
        match self.chroma {
            ChromaStorage::PlanarPackedUFirst { u, v } => u.stacked_with(&v),
            ChromaStorage::PlanarPackedVFirst { u, v } => v.stacked_with(&u),
            _ => None,
        }
    }

    /// Structural equality of luma and both chroma views; the chroma tag is
    /// not compared.
    pub fn extents_equal(&self, other: &YuvFrame<'_>) -> bool {
        self.luma.extents_equal(&other.luma)
            && self.chroma_u().extents_equal(&other.chroma_u())
            && self.chroma_v().extents_equal(&other.chroma_v())
    }

    pub fn describe_extents(&self) -> String {
        format!(
            "luma: {}, chromaU: {}, chromaV: {}",
            self.luma.describe_extents(),
            self.chroma_u().describe_extents(),
            self.chroma_v().describe_extents()
        )
    }

    /// Set all chroma to `value`, through the widest single view the layout
    /// offers.
    pub fn fill_chroma(&mut self, value: u8, dispatcher: &Dispatcher) -> FilterResult<()> {
        if let Some(mut plane) = self.interleaved_chroma_view() {
            return kernel::fill_2d(&mut plane, value, dispatcher);
        }
        if let Some(mut planes) = self.packed_planar_chroma_view() {
            return kernel::fill_2d(&mut planes, value, dispatcher);
        }
        kernel::fill_2d(&mut self.chroma_u(), value, dispatcher)?;
        kernel::fill_2d(&mut self.chroma_v(), value, dispatcher)
    }
}

/// Copy `src` into `dst`, converting chroma layout where needed.
///
/// Interleaved → planar uses the dedicated deinterleave kernel, routing the
/// first interleaved sample to U or V according to the source tag. Every
/// other combination is a per-plane strided copy.
pub fn copy_frame(
    src: &YuvFrame<'_>,
    dst: &mut YuvFrame<'_>,
    dispatcher: &Dispatcher,
) -> FilterResult<()> {
    if !src.extents_equal(dst) {
        return Err(FilterError::ExtentMismatch(format!(
            "copy frame: src {} vs dst {}",
            src.describe_extents(),
            dst.describe_extents()
        )));
    }

    kernel::copy_2d(&src.luma(), &mut dst.luma(), dispatcher)?;

    let interleaved_src = src.interleaved_chroma_view();
    match (interleaved_src, dst.chroma_layout().is_interleaved()) {
        (Some(plane), false) => {
            let (mut first, mut second) = match src.chroma_layout() {
                ChromaLayout::InterleavedUFirst => (dst.chroma_u(), dst.chroma_v()),
                _ => (dst.chroma_v(), dst.chroma_u()),
            };
            let status = kernel::deinterleave(&plane, &mut first, &mut second, dispatcher);
            status_to_result("deinterleave", status)
        }
        _ => {
            kernel::copy_2d(&src.chroma_u(), &mut dst.chroma_u(), dispatcher)?;
            kernel::copy_2d(&src.chroma_v(), &mut dst.chroma_v(), dispatcher)
        }
    }
}

fn require_planes(u: &StridedBuffer<'_>, v: &StridedBuffer<'_>) -> FilterResult<()> {
    u.require_byte_elements("chroma U")?;
    v.require_byte_elements("chroma V")?;
    if !u.extents_equal(v) {
        return Err(FilterError::InvalidBuffer(format!(
            "chroma planes differ: U {} vs V {}",
            u.describe_extents(),
            v.describe_extents()
        )));
    }
    Ok(())
}

fn require_adjacent(
    first: &StridedBuffer<'_>,
    second: &StridedBuffer<'_>,
    first_name: &str,
    second_name: &str,
) -> FilterResult<()> {
    if first.stacked_with(second).is_none() {
        return Err(FilterError::InvalidBuffer(format!(
            "packed chroma requires the {second_name} plane to follow the {first_name} plane"
        )));
    }
    Ok(())
}

fn even_dimensions(width: u32, height: u32) -> FilterResult<(usize, usize)> {
    if width % 2 != 0 || height % 2 != 0 {
        return Err(FilterError::InvalidBuffer(format!(
            "4:2:0 frames need even dimensions, got {width}x{height}"
        )));
    }
    Ok((width as usize, height as usize))
}

fn require_len(data: &[u8], needed: usize, width: u32, height: u32) -> FilterResult<()> {
    if data.len() < needed {
        return Err(FilterError::InvalidBuffer(format!(
            "YUV 4:2:0 frame data too small: got {}, expected {needed} for {width}x{height}",
            data.len()
        )));
    }
    Ok(())
}

fn split_semi_planar(
    data: &mut [u8],
    width: u32,
    height: u32,
) -> FilterResult<(StridedBuffer<'_>, StridedBuffer<'_>)> {
    let (w, h) = even_dimensions(width, height)?;
    let luma_len = w.checked_mul(h).ok_or(FilterError::InvalidBuffer(
        "frame size overflow".into(),
    ))?;
    require_len(data, luma_len + luma_len / 2, width, height)?;
    let (luma, chroma) = data.split_at_mut(luma_len);
    Ok((
        StridedBuffer::packed_2d(luma, width, height)?,
        StridedBuffer::packed_2d(chroma, width, height / 2)?,
    ))
}

fn split_planar(
    data: &mut [u8],
    width: u32,
    height: u32,
) -> FilterResult<(StridedBuffer<'_>, StridedBuffer<'_>, StridedBuffer<'_>)> {
    let (w, h) = even_dimensions(width, height)?;
    let luma_len = w.checked_mul(h).ok_or(FilterError::InvalidBuffer(
        "frame size overflow".into(),
    ))?;
    let plane_len = luma_len / 4;
    require_len(data, luma_len + 2 * plane_len, width, height)?;
    let (luma, chroma) = data.split_at_mut(luma_len);
    let (first, second) = chroma.split_at_mut(plane_len);
    Ok((
        StridedBuffer::packed_2d(luma, width, height)?,
        StridedBuffer::packed_2d(first, width / 2, height / 2)?,
        StridedBuffer::packed_2d(second, width / 2, height / 2)?,
    ))
}

impl fmt::Debug for YuvFrame<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("YuvFrame")
            .field("layout", &self.chroma_layout())
            .field("luma", &self.luma)
            .field("chroma_u", &self.chroma_u())
            .field("chroma_v", &self.chroma_v())
            .finish()
    }
}
