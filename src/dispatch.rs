//! Parallel task dispatch.
//!
//! A [`Dispatcher`] splits an index range into independent units and runs
//! them on a worker pool, blocking the caller until every unit has finished.
//! Embedders may replace single-task execution, whole-range dispatch, or
//! both, by installing hooks before the dispatcher is shared.
//!
//! Units return an `i32` status where `0` means success. The aggregate
//! status of [`Dispatcher::run_parallel_for`] is `0` only when every unit
//! succeeded; otherwise it is the first nonzero status recorded.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock};

use log::{debug, error};

use crate::env_config::{self, define_env_flag};
use crate::error::{FilterError, FilterResult};

/// Status returned when `start + count` does not fit in an `i32`.
pub const RANGE_OVERFLOW_STATUS: i32 = -1;

pub const DEFAULT_ROWS_PER_TASK: i32 = 8;

/// One unit of work: receives its index, returns a status.
pub type TaskFn<'t> = dyn Fn(i32) -> i32 + Sync + 't;

/// Replaces direct execution of a single unit.
pub type TaskHook = Arc<dyn Fn(&TaskFn<'_>, i32) -> i32 + Send + Sync>;

/// Replaces partition-and-dispatch of a whole range `(task, start, count)`.
pub type ParallelForHook = Arc<dyn Fn(&TaskFn<'_>, i32, i32) -> i32 + Send + Sync>;

/// Box a closure as a [`TaskHook`].
pub fn task_hook<F>(hook: F) -> TaskHook
where
    F: Fn(&TaskFn<'_>, i32) -> i32 + Send + Sync + 'static,
{
    Arc::new(hook)
}

/// Box a closure as a [`ParallelForHook`].
pub fn parallel_for_hook<F>(hook: F) -> ParallelForHook
where
    F: Fn(&TaskFn<'_>, i32, i32) -> i32 + Send + Sync + 'static,
{
    Arc::new(hook)
}

define_env_flag!(enabled_when(force_serial_from_env, env_config::FORCE_SERIAL_VAR));

#[derive(Clone, Debug)]
pub struct DispatcherConfig {
    /// Upper bound on worker threads. Defaults to `SNOW_DIFF_MAX_WORKERS`
    /// or the host's available parallelism.
    pub max_workers: usize,
    /// Run every unit inline on the calling thread. Defaults to
    /// `SNOW_DIFF_FORCE_SERIAL`.
    pub force_serial: bool,
    /// Worker threads are named `{prefix}-{index}`.
    pub thread_name_prefix: String,
    /// Scan lines handed to each unit by the row kernels.
    pub rows_per_task: i32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_workers: env_config::env_var_positive_usize(env_config::MAX_WORKERS_VAR)
                .unwrap_or_else(host_parallelism),
            force_serial: force_serial_from_env(),
            thread_name_prefix: "snow-diff-worker".to_string(),
            rows_per_task: DEFAULT_ROWS_PER_TASK,
        }
    }
}

impl DispatcherConfig {
    /// A configuration that never spawns threads.
    pub fn serial() -> Self {
        Self {
            max_workers: 1,
            force_serial: true,
            ..Self::default()
        }
    }
}

fn host_parallelism() -> usize {
    static HOST: OnceLock<usize> = OnceLock::new();
    *HOST.get_or_init(|| {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    })
}

/// A binary semaphore created in the signalled state.
///
/// Constructed eagerly with its owner, so there is no lazy first-use race
/// to guard against.
#[derive(Debug)]
pub struct BinarySemaphore {
    available: Mutex<bool>,
    signalled: Condvar,
}

impl Default for BinarySemaphore {
    fn default() -> Self {
        Self::new()
    }
}

impl BinarySemaphore {
    pub fn new() -> Self {
        Self {
            available: Mutex::new(true),
            signalled: Condvar::new(),
        }
    }

    /// Block until the semaphore is available, then take it.
    pub fn wait(&self) {
        let mut available = self
            .available
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        while !*available {
            available = self
                .signalled
                .wait(available)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        *available = false;
    }

    /// Release the semaphore and wake one waiter.
    pub fn signal(&self) {
        let mut available = self
            .available
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *available = true;
        self.signalled.notify_one();
    }

    /// Take the semaphore for the lifetime of the returned guard.
    pub fn acquire(&self) -> SemaphoreGuard<'_> {
        self.wait();
        SemaphoreGuard { semaphore: self }
    }
}

pub struct SemaphoreGuard<'s> {
    semaphore: &'s BinarySemaphore,
}

impl Drop for SemaphoreGuard<'_> {
    fn drop(&mut self) {
        self.semaphore.signal();
    }
}

pub struct Dispatcher {
    pool: Option<rayon::ThreadPool>,
    workers: usize,
    rows_per_task: i32,
    task_hook: Option<TaskHook>,
    parallel_for_hook: Option<ParallelForHook>,
    init_lock: BinarySemaphore,
    announced: AtomicBool,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig) -> FilterResult<Self> {
        if config.max_workers == 0 {
            return Err(FilterError::InvalidConfig(
                "max_workers must be at least 1".into(),
            ));
        }
        if config.rows_per_task <= 0 {
            return Err(FilterError::InvalidConfig(format!(
                "rows_per_task must be positive, got {}",
                config.rows_per_task
            )));
        }
        let workers = if config.force_serial {
            1
        } else {
            host_parallelism().min(config.max_workers)
        };
        let pool = if workers <= 1 {
            None
        } else {
            let prefix = config.thread_name_prefix.clone();
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(workers)
                .thread_name(move |index| format!("{prefix}-{index}"))
                .build()
                .map_err(|e| {
                    FilterError::Platform(anyhow::anyhow!(
                        "failed to build dispatch worker pool: {e}"
                    ))
                })?;
            Some(pool)
        };
        Ok(Self {
            pool,
            workers,
            rows_per_task: config.rows_per_task,
            task_hook: None,
            parallel_for_hook: None,
            init_lock: BinarySemaphore::new(),
            announced: AtomicBool::new(false),
        })
    }

    /// A dispatcher that runs every unit on the calling thread.
    pub fn serial() -> Self {
        Self {
            pool: None,
            workers: 1,
            rows_per_task: DEFAULT_ROWS_PER_TASK,
            task_hook: None,
            parallel_for_hook: None,
            init_lock: BinarySemaphore::new(),
            announced: AtomicBool::new(false),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers
    }

    pub fn rows_per_task(&self) -> i32 {
        self.rows_per_task
    }

    /// Install a single-task override.
    ///
    /// Requires `&mut self`: hooks cannot change while a dispatch that
    /// borrows this dispatcher is running.
    pub fn set_task_hook<F>(&mut self, hook: F)
    where
        F: Fn(&TaskFn<'_>, i32) -> i32 + Send + Sync + 'static,
    {
        self.task_hook = Some(task_hook(hook));
    }

    /// Install or clear (`None`) the single-task override.
    pub fn install_task_hook(&mut self, hook: Option<TaskHook>) {
        self.task_hook = hook;
    }

    pub fn set_parallel_for_hook<F>(&mut self, hook: F)
    where
        F: Fn(&TaskFn<'_>, i32, i32) -> i32 + Send + Sync + 'static,
    {
        self.parallel_for_hook = Some(parallel_for_hook(hook));
    }

    /// Install or clear (`None`) the whole-range override.
    pub fn install_parallel_for_hook(&mut self, hook: Option<ParallelForHook>) {
        self.parallel_for_hook = hook;
    }

    pub fn has_hooks(&self) -> bool {
        self.task_hook.is_some() || self.parallel_for_hook.is_some()
    }

    /// Run one unit, through the single-task hook when one is installed.
    pub fn run_single_task(&self, task: &TaskFn<'_>, index: i32) -> i32 {
        match &self.task_hook {
            Some(hook) => hook(task, index),
            None => task(index),
        }
    }

    /// Run `task` for every index in `[start, start + count)` and block
    /// until all of them return.
    ///
    /// With a whole-range hook installed the call is delegated to it
    /// verbatim. Otherwise every index is executed exactly once, each
    /// through [`run_single_task`](Self::run_single_task); a failing unit
    /// does not stop the others.
    pub fn run_parallel_for(&self, task: &TaskFn<'_>, start: i32, count: i32) -> i32 {
        if let Some(hook) = &self.parallel_for_hook {
            return hook(task, start, count);
        }
        if count <= 0 {
            return 0;
        }
        let Some(end) = start.checked_add(count) else {
            error!("parallel for range overflows: start {start}, count {count}");
            return RANGE_OVERFLOW_STATUS;
        };

        let failure = AtomicI32::new(0);
        let record = |status: i32| {
            if status != 0 {
                let _ = failure.compare_exchange(0, status, Ordering::AcqRel, Ordering::Acquire);
            }
        };

        match &self.pool {
            Some(pool) if count > 1 => {
                use rayon::prelude::*;
                pool.install(|| {
                    (start..end)
                        .into_par_iter()
                        .for_each(|index| record(self.run_single_task(task, index)));
                });
            }
            _ => {
                for index in start..end {
                    record(self.run_single_task(task, index));
                }
            }
        }

        failure.load(Ordering::Acquire)
    }

    /// Run `f` while holding the dispatcher's semaphore.
    pub fn with_exclusive<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.init_lock.acquire();
        f()
    }

    /// Log host parallelism the first time any filter runs on this
    /// dispatcher.
    pub(crate) fn announce_once(&self) {
        if self.announced.load(Ordering::Acquire) {
            return;
        }
        self.with_exclusive(|| {
            if !self.announced.load(Ordering::Relaxed) {
                debug!(
                    "host system has {} cpus, dispatching on {} worker(s){}",
                    host_parallelism(),
                    self.workers,
                    if self.has_hooks() { " with custom hooks" } else { "" }
                );
                self.announced.store(true, Ordering::Release);
            }
        });
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("workers", &self.workers)
            .field("rows_per_task", &self.rows_per_task)
            .field("task_hook", &self.task_hook.is_some())
            .field("parallel_for_hook", &self.parallel_for_hook.is_some())
            .finish()
    }
}
