use std::fmt;

#[derive(Debug)]
pub enum FilterError {
    /// Two buffers that must share a shape do not. Carries a rendered
    /// description of both sides for the diagnostic log.
    ExtentMismatch(String),

    /// Element size other than one byte, or a layout the operation cannot
    /// address.
    UnsupportedFormat(String),

    /// The marker square does not fit inside the frame.
    OutOfBounds {
        x: u32,
        y: u32,
        size: u32,
        width: u32,
        height: u32,
    },

    /// Null host pointer, short backing slice, or a frame whose planes
    /// violate 4:2:0 subsampling.
    InvalidBuffer(String),

    InvalidConfig(String),

    /// A kernel unit returned a nonzero status. The code is opaque and
    /// kernel-specific.
    Kernel { kernel: &'static str, code: i32 },

    Platform(anyhow::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterErrorClass {
    /// Rejected before any pixel was written.
    Precondition,
    KernelFailure,
    Fatal,
}

impl FilterError {
    pub fn class(&self) -> FilterErrorClass {
        match self {
            Self::ExtentMismatch(_)
            | Self::UnsupportedFormat(_)
            | Self::OutOfBounds { .. }
            | Self::InvalidBuffer(_)
            | Self::InvalidConfig(_) => FilterErrorClass::Precondition,
            Self::Kernel { .. } => FilterErrorClass::KernelFailure,
            Self::Platform(_) => FilterErrorClass::Fatal,
        }
    }

    /// `true` when the destination is guaranteed untouched.
    pub fn is_precondition(&self) -> bool {
        matches!(self.class(), FilterErrorClass::Precondition)
    }

    /// Status code of a failed kernel, if this error came from one.
    pub fn kernel_code(&self) -> Option<i32> {
        match self {
            Self::Kernel { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl fmt::Display for FilterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExtentMismatch(detail) => write!(f, "buffer extents must be equal: {detail}"),
            Self::UnsupportedFormat(detail) => write!(f, "unsupported pixel format: {detail}"),
            Self::OutOfBounds {
                x,
                y,
                size,
                width,
                height,
            } => write!(
                f,
                "marker out of bounds: position ({x}, {y}), size ({size}, {size}), frame size ({width}, {height})"
            ),
            Self::InvalidBuffer(detail) => write!(f, "invalid buffer: {detail}"),
            Self::InvalidConfig(detail) => write!(f, "invalid filter configuration: {detail}"),
            Self::Kernel { kernel, code } => {
                write!(f, "{kernel} failed with error code: {code}")
            }
            Self::Platform(inner) => write!(f, "{inner}"),
        }
    }
}

impl std::error::Error for FilterError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Platform(inner) => Some(inner.as_ref()),
            _ => None,
        }
    }
}

pub type FilterResult<T> = Result<T, FilterError>;

/// Map a kernel status to a result. `0` is success; anything else is
/// reported verbatim.
pub(crate) fn status_to_result(kernel: &'static str, code: i32) -> FilterResult<()> {
    if code == 0 {
        Ok(())
    } else {
        Err(FilterError::Kernel { kernel, code })
    }
}
