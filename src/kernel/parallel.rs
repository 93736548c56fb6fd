use std::ops::Range;

use crate::dispatch::Dispatcher;

/// Number of units needed to cover `height` rows at `rows_per_task` rows
/// per unit.
#[inline(always)]
pub(crate) fn row_task_count(height: i32, rows_per_task: i32) -> i32 {
    if height <= 0 {
        return 0;
    }
    let grain = rows_per_task.max(1);
    height / grain + i32::from(height % grain != 0)
}

/// Row range owned by unit `task`. Ranges of distinct units never overlap,
/// which is what lets units write without synchronisation.
#[inline(always)]
pub(crate) fn task_rows(task: i32, height: i32, rows_per_task: i32) -> Range<i32> {
    let grain = rows_per_task.max(1);
    let first = task.saturating_mul(grain).min(height);
    let last = first.saturating_add(grain).min(height);
    first..last
}

/// Slice `height` rows into units and run `chunk_fn(task, rows)` for each
/// through the dispatcher. Returns the aggregate dispatch status.
pub(crate) fn run_row_chunks<F>(dispatcher: &Dispatcher, height: i32, chunk_fn: F) -> i32
where
    F: Fn(i32, Range<i32>) -> i32 + Sync,
{
    let grain = dispatcher.rows_per_task();
    let tasks = row_task_count(height, grain);
    dispatcher.run_parallel_for(
        &|task| chunk_fn(task, task_rows(task, height, grain)),
        0,
        tasks,
    )
}

/// Row-at-a-time convenience over [`run_row_chunks`]; `row_fn` receives
/// the zero-based row offset.
pub(crate) fn run_rows<F>(dispatcher: &Dispatcher, height: i32, row_fn: F) -> i32
where
    F: Fn(i32) + Sync,
{
    run_row_chunks(dispatcher, height, |_, rows| {
        for row in rows {
            row_fn(row);
        }
        0
    })
}

#[inline(always)]
pub(crate) fn ranges_overlap(a: (usize, usize), b: (usize, usize)) -> bool {
    a.0 < b.1 && b.0 < a.1
}
