use crossbeam_utils::{Backoff, CachePadded};
use std::collections::VecDeque;
use std::io;
use std::marker::PhantomData;
use std::mem;
use std::ops::Range;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

type Job = Box<dyn FnOnce() + Send + 'static>;

// State shared between the scheduler handle and its workers
struct Shared {
    queue: Mutex<VecDeque<Job>>,
    job_available: Condvar,
    stop: AtomicBool,
    submitted: CachePadded<AtomicUsize>,
    completed: CachePadded<AtomicUsize>,
    idle_lock: Mutex<()>,
    idle: Condvar,
}

impl Shared {
    fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            job_available: Condvar::new(),
            stop: AtomicBool::new(false),
            submitted: CachePadded::new(AtomicUsize::new(0)),
            completed: CachePadded::new(AtomicUsize::new(0)),
            idle_lock: Mutex::new(()),
            idle: Condvar::new(),
        }
    }

    fn lock_queue(&self) -> MutexGuard<'_, VecDeque<Job>> {
        // Jobs never run while the queue is locked, so a poisoned lock still holds a valid queue
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_idle(&self) -> bool {
        // Load submitted first: completed can only catch up with it, never overtake it
        let submitted = self.submitted.load(Ordering::Acquire);
        let completed = self.completed.load(Ordering::Acquire);
        completed >= submitted
    }

    // Blocks until a job is available, or returns None once the pool is stopping
    fn next_job(&self) -> Option<Job> {
        let mut queue = self.lock_queue();
        loop {
            if let Some(job) = queue.pop_front() {
                return Some(job);
            }
            if self.stop.load(Ordering::Acquire) {
                return None;
            }
            queue = self
                .job_available
                .wait(queue)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn finish_jobs(&self, count: usize) {
        self.completed.fetch_add(count, Ordering::AcqRel);
        if self.is_idle() {
            // Take the lock so a waiter between its idle check and its sleep can't miss this
            let _guard = self.idle_lock.lock().unwrap_or_else(PoisonError::into_inner);
            self.idle.notify_all();
        }
    }

    fn wait(&self) {
        let backoff = Backoff::new();
        while !self.is_idle() {
            if backoff.is_completed() {
                let guard = self.idle_lock.lock().unwrap_or_else(PoisonError::into_inner);
                if self.is_idle() {
                    break;
                }
                let _guard = self
                    .idle
                    .wait(guard)
                    .unwrap_or_else(PoisonError::into_inner);
            } else {
                backoff.snooze();
            }
        }
    }
}

fn worker_loop(shared: Arc<Shared>) {
    while let Some(job) = shared.next_job() {
        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
            log::error!(
                "job panicked on {}",
                thread::current().name().unwrap_or("unnamed worker")
            );
        }
        shared.finish_jobs(1);
    }
}

/// A fixed-size pool of long-lived worker threads consuming fire-and-forget jobs from one FIFO
/// queue.
///
/// Jobs carry no ordering guarantee: any worker may pick up any job, so callers partition work by
/// index ranges rather than by dependency. `wait` is the only synchronization primitive and acts
/// as a barrier over everything submitted so far.
pub struct JobScheduler {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl JobScheduler {
    /// Creates a scheduler with `worker_count` workers (clamped to at least one).
    pub fn new(worker_count: usize) -> io::Result<Self> {
        let mut scheduler = Self {
            shared: Arc::new(Shared::new()),
            workers: Vec::new(),
        };
        scheduler.initialize(worker_count)?;
        Ok(scheduler)
    }

    /// Creates a scheduler with one worker per available hardware thread.
    pub fn with_available_parallelism() -> io::Result<Self> {
        let worker_count = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self::new(worker_count)
    }

    /// Stops the current pool (see [`JobScheduler::reset`]) and starts a fresh one.
    pub fn initialize(&mut self, worker_count: usize) -> io::Result<()> {
        self.reset();

        let worker_count = worker_count.max(1);
        self.shared = Arc::new(Shared::new());
        for index in 0..worker_count {
            let shared = Arc::clone(&self.shared);
            let handle = thread::Builder::new()
                .name(format!("tilerast-worker-{index}"))
                .spawn(move || worker_loop(shared))?;
            self.workers.push(handle);
        }

        log::debug!("job scheduler started with {worker_count} workers");
        Ok(())
    }

    /// Shuts the pool down. Queued jobs that have not started yet are dropped without running,
    /// running jobs are allowed to finish.
    ///
    /// After a reset without a following `initialize`, `execute` runs jobs inline on the caller.
    pub fn reset(&mut self) {
        let dropped = {
            let mut queue = self.shared.lock_queue();
            self.shared.stop.store(true, Ordering::Release);
            mem::take(&mut *queue)
        };
        let dropped_count = dropped.len();
        drop(dropped);

        if dropped_count > 0 {
            log::debug!("job scheduler reset dropped {dropped_count} queued jobs");
            self.shared.finish_jobs(dropped_count);
        }
        self.shared.job_available.notify_all();
        self.shared.wait();

        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                log::error!("job scheduler worker exited with a panic");
            }
        }
    }

    /// Enqueues a job and returns immediately.
    pub fn execute<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit(Box::new(job));
    }

    /// Blocks until every job submitted so far has completed.
    pub fn wait(&self) {
        self.shared.wait();
    }

    pub fn is_busy(&self) -> bool {
        !self.shared.is_idle()
    }

    /// Number of live workers, and the number of partitions the pipeline stages split work into.
    pub fn worker_count(&self) -> usize {
        self.workers.len().max(1)
    }

    /// Runs `f` with a [`Scope`] through which jobs borrowing from the caller's stack can be
    /// submitted. Returns only after all of those jobs have finished, even if `f` panics.
    ///
    /// Panics if any job submitted through the scope panicked.
    pub fn scope<'env, F, T>(&'env self, f: F) -> T
    where
        F: for<'scope> FnOnce(&'scope Scope<'scope, 'env>) -> T,
    {
        let scope = Scope {
            scheduler: self,
            panicked: AtomicBool::new(false),
            scope: PhantomData,
            env: PhantomData,
        };

        let result = {
            let _drain = WaitOnDrop(self);
            f(&scope)
        };

        if scope.panicked.load(Ordering::Acquire) {
            panic!("a job submitted to the scope panicked");
        }
        result
    }

    fn submit(&self, job: Job) {
        if self.workers.is_empty() {
            log::warn!("job scheduler has no workers, running job inline");
            job();
            return;
        }

        // Count the job before any worker can see it, so `wait` can never observe it as done early
        self.shared.submitted.fetch_add(1, Ordering::AcqRel);
        self.shared.lock_queue().push_back(job);
        self.shared.job_available.notify_one();
    }
}

impl Drop for JobScheduler {
    fn drop(&mut self) {
        self.reset();
    }
}

struct WaitOnDrop<'a>(&'a JobScheduler);

impl Drop for WaitOnDrop<'_> {
    fn drop(&mut self) {
        self.0.wait();
    }
}

/// Submission handle for jobs that borrow data living at least as long as the scope.
pub struct Scope<'scope, 'env: 'scope> {
    scheduler: &'scope JobScheduler,
    panicked: AtomicBool,
    scope: PhantomData<&'scope mut &'scope ()>,
    env: PhantomData<&'env mut &'env ()>,
}

impl<'scope, 'env> Scope<'scope, 'env> {
    pub fn execute<F>(&'scope self, job: F)
    where
        F: FnOnce() + Send + 'scope,
    {
        let panicked = &self.panicked;
        let job = move || {
            if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                log::error!("scoped job panicked");
                panicked.store(true, Ordering::Release);
            }
        };
        let job: Box<dyn FnOnce() + Send + 'scope> = Box::new(job);
        // SAFETY: `JobScheduler::scope` neither returns nor unwinds before `wait` has seen every
        // job submitted here complete, so nothing borrowed for 'scope is used after it ends.
        // Jobs can't be dropped unrun either: `reset` needs `&mut JobScheduler`.
        let job: Job = unsafe { mem::transmute::<Box<dyn FnOnce() + Send + 'scope>, Job>(job) };
        self.scheduler.submit(job);
    }

    pub fn worker_count(&self) -> usize {
        self.scheduler.worker_count()
    }
}

/// Splits `0..len` into `parts` contiguous ranges whose lengths differ by at most one. Range `i`
/// always starts where range `i - 1` ends, so concatenating per-part output keeps input order.
pub fn partition(len: usize, parts: usize) -> impl Iterator<Item = Range<usize>> {
    let parts = parts.max(1);
    let base = len / parts;
    let extra = len % parts;
    (0..parts).map(move |i| {
        let start = i * base + i.min(extra);
        let end = start + base + usize::from(i < extra);
        start..end
    })
}
