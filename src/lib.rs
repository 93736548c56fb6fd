pub mod boundary;
pub mod buffer;
pub mod dispatch;
pub(crate) mod env_config;
pub mod error;
pub mod filter;
pub mod frame;
pub mod kernel;
pub mod reduce;
pub mod stats;

use error::FilterResult;

pub use buffer::{MAX_DIMS, RawBuffer, StridedBuffer};
pub use dispatch::{
    BinarySemaphore, Dispatcher, DispatcherConfig, ParallelForHook, TaskFn, TaskHook,
    parallel_for_hook, task_hook,
};
pub use error::{FilterError, FilterErrorClass};
pub use filter::{FilterConfig, FilterSession, FilterSessionBuilder, MarkerPosition};
pub use frame::{ChromaLayout, ChromaStorage, YuvFrame, copy_frame};
pub use kernel::DiffParams;
pub use reduce::{ForceRegion, ForceVector};
pub use stats::{FilterStats, FilterStatsSnapshot};

/// Run one diff-and-mark pass with a default session.
pub fn diff_once(
    a: &YuvFrame<'_>,
    b: &YuvFrame<'_>,
    marker: MarkerPosition,
    out: &mut YuvFrame<'_>,
) -> FilterResult<ForceVector> {
    let session = FilterSession::new()?;
    session.diff(a, b, marker, out, &mut FilterStats::new())
}
