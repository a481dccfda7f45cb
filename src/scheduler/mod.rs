//! Worker pool and task queues (spec.md §5).
//!
//! One pool, sized `logical CPUs + 2`, shared by three task classes — parse,
//! build, test — queued separately so a soft priority (parse before build
//! before test) can be enforced without a full priority queue: each worker
//! always drains the parse queue first, then build, then test. This is the
//! same message-passing shape cargo's `job_queue` uses (a coordinator
//! draining a queue of `Message` variants), adapted from cargo's single OS
//! thread to a pool of tokio workers sharing one set of queues behind a
//! mutex, since the work items here (cache lookups, sandboxed exec, network
//! fetch) are themselves async.
//!
//! Dependency ordering and cycle detection live in `graph`; this module
//! only decides *when* a ready task actually runs and *how many* run at
//! once.

mod dedup;

pub use dedup::{BuildDedup, Claim};

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};
use tracing::instrument;

pub type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Which queue a unit of work belongs to. Parse tasks are always drained
/// before build tasks, which are always drained before test tasks — this
/// mirrors spec.md §5's "parse, build, and test tasks share [the pool]"
/// combined with §4.1/§4.6's strict phase ordering (a package must finish
/// parsing before its targets can build; a target must finish building
/// before it can test).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskClass {
    Parse,
    Build,
    Test,
}

struct Task {
    run: Box<dyn FnOnce() -> BoxFuture + Send>,
}

#[derive(Default)]
struct Queues {
    parse: VecDeque<Task>,
    build: VecDeque<Task>,
    test: VecDeque<Task>,
}

impl Queues {
    fn push(&mut self, class: TaskClass, task: Task) {
        match class {
            TaskClass::Parse => self.parse.push_back(task),
            TaskClass::Build => self.build.push_back(task),
            TaskClass::Test => self.test.push_back(task),
        }
    }

    /// Pops in strict parse > build > test priority order.
    fn pop(&mut self) -> Option<Task> {
        self.parse
            .pop_front()
            .or_else(|| self.build.pop_front())
            .or_else(|| self.test.pop_front())
    }

    fn is_empty(&self) -> bool {
        self.parse.is_empty() && self.build.is_empty() && self.test.is_empty()
    }
}

/// Backpressure bound (spec.md §5: "scheduler may block on a bounded task
/// channel to provide backpressure"). `submit` awaits `capacity_available`
/// whenever `queue_len()` has reached this bound, so a producer outrunning
/// the worker pool blocks instead of growing the queues without limit.
const CHANNEL_CAPACITY: usize = 4096;

/// `logical CPUs + 2`, the worker-pool default named in spec.md §5 and
/// `DESIGN.md`.
pub fn default_worker_count() -> usize {
    num_cpus::get() + 2
}

struct Inner {
    queues: Mutex<Queues>,
    work_available: Notify,
    capacity_available: Notify,
    pending: AtomicUsize,
    draining: AtomicBool,
    stop_submission: AtomicBool,
    kill_all: Arc<Notify>,
    keep_going: bool,
}

/// Shared handle used to submit work and to request a stop. Cheap to clone;
/// all clones share the same queues.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(keep_going: bool) -> Self {
        Scheduler {
            inner: Arc::new(Inner {
                queues: Mutex::new(Queues::default()),
                work_available: Notify::new(),
                capacity_available: Notify::new(),
                pending: AtomicUsize::new(0),
                draining: AtomicBool::new(false),
                stop_submission: AtomicBool::new(false),
                kill_all: Arc::new(Notify::new()),
                keep_going,
            }),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stop_submission.load(Ordering::SeqCst)
    }

    /// A one-shot stop that only blocks further submission (spec.md §5:
    /// "One-shot stop flag stops submission"); in-flight tasks keep running
    /// to completion. Called when `!keepGoing` and a task fails.
    pub fn stop_submission(&self) {
        self.inner.stop_submission.store(true, Ordering::SeqCst);
    }

    /// A hard stop: blocks submission and wakes every worker loop so it can
    /// kill its in-flight process group. Used for host-termination/Ctrl-C,
    /// not for an ordinary `!keepGoing` build failure.
    pub fn kill_all(&self) {
        self.stop_submission();
        self.inner.kill_all.notify_waiters();
    }

    /// A `Notify` that fires when `kill_all` is called — a running task can
    /// race this against its own work to abort early.
    pub fn kill_all_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.inner.kill_all)
    }

    pub fn keep_going(&self) -> bool {
        self.inner.keep_going
    }

    pub fn queue_len(&self) -> usize {
        self.inner.pending.load(Ordering::SeqCst)
    }

    /// Called by a task runner on failure: under `keepGoing` this is a
    /// no-op (the queue keeps draining); otherwise it trips the one-shot
    /// stop.
    pub fn report_failure(&self) {
        if !self.inner.keep_going {
            self.stop_submission();
        }
    }

    #[instrument(skip(self, fut))]
    pub async fn submit_parse<F>(&self, fut: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.submit(TaskClass::Parse, fut).await
    }

    #[instrument(skip(self, fut))]
    pub async fn submit_build<F>(&self, fut: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.submit(TaskClass::Build, fut).await
    }

    #[instrument(skip(self, fut))]
    pub async fn submit_test<F>(&self, fut: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.submit(TaskClass::Test, fut).await
    }

    async fn submit<F>(&self, class: TaskClass, fut: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.is_stopped() {
            return false;
        }
        while self.queue_len() >= CHANNEL_CAPACITY {
            self.inner.capacity_available.notified().await;
            if self.is_stopped() {
                return false;
            }
        }
        let task = Task {
            run: Box::new(move || Box::pin(fut) as BoxFuture),
        };
        let mut queues = self.inner.queues.lock().await;
        queues.push(class, task);
        self.inner.pending.fetch_add(1, Ordering::SeqCst);
        drop(queues);
        self.inner.work_available.notify_one();
        true
    }

    /// Runs `worker_count` loops pulling from the queues in parse/build/test
    /// priority order. Returns once `stop_and_drain` has been called and the
    /// last in-flight task finishes, or once every queue is empty and no
    /// `Scheduler` handle other than this call's remain reachable for new
    /// submissions (in practice: callers drop their handles, then await
    /// this future).
    pub async fn run(&self, worker_count: usize) {
        let mut handles = Vec::with_capacity(worker_count.max(1));
        for _ in 0..worker_count.max(1) {
            let inner = Arc::clone(&self.inner);
            handles.push(tokio::spawn(async move { worker_loop(inner).await }));
        }
        for handle in handles {
            let _ = handle.await;
        }
    }

    /// Marks the pool as draining: once every queued task completes and no
    /// more are submitted, `run`'s worker loops exit. Call after the last
    /// `submit_*` so `run` doesn't block forever waiting for more work.
    pub fn stop_and_drain(&self) {
        self.inner.draining.store(true, Ordering::SeqCst);
        self.inner.work_available.notify_waiters();
    }
}

async fn worker_loop(inner: Arc<Inner>) {
    loop {
        let task = {
            let mut queues = inner.queues.lock().await;
            queues.pop()
        };
        match task {
            Some(task) => {
                (task.run)().await;
                inner.pending.fetch_sub(1, Ordering::SeqCst);
                inner.capacity_available.notify_one();
            }
            None => {
                if inner.draining.load(Ordering::SeqCst) {
                    let queues = inner.queues.lock().await;
                    if queues.is_empty() {
                        return;
                    }
                    drop(queues);
                }
                inner.work_available.notified().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize as Counter;

    #[tokio::test]
    async fn submitted_tasks_all_run() {
        let scheduler = Scheduler::new(true);
        let counter = Arc::new(Counter::new(0));
        for _ in 0..5 {
            let counter = Arc::clone(&counter);
            scheduler
                .submit_build(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .await;
        }
        scheduler.stop_and_drain();
        scheduler.run(2).await;
        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn stopped_scheduler_refuses_new_submissions() {
        let scheduler = Scheduler::new(false);
        scheduler.report_failure();
        assert!(scheduler.is_stopped());
        let accepted = scheduler.submit_build(async {}).await;
        assert!(!accepted);
        scheduler.stop_and_drain();
        scheduler.run(1).await;
    }

    #[tokio::test]
    async fn keep_going_ignores_reported_failures() {
        let scheduler = Scheduler::new(true);
        scheduler.report_failure();
        assert!(!scheduler.is_stopped());
    }

    #[tokio::test]
    async fn submit_blocks_once_capacity_is_reached() {
        let scheduler = Scheduler::new(true);
        let release = Arc::new(Notify::new());
        for _ in 0..CHANNEL_CAPACITY {
            let release = Arc::clone(&release);
            scheduler
                .submit_build(async move {
                    release.notified().await;
                })
                .await;
        }
        assert_eq!(scheduler.queue_len(), CHANNEL_CAPACITY);

        let scheduler_clone = scheduler.clone();
        let extra = tokio::spawn(async move { scheduler_clone.submit_build(async {}).await });

        // The extra submission can't enqueue until a running task frees capacity.
        tokio::task::yield_now().await;
        assert!(!extra.is_finished());

        let handle = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.run(8).await })
        };
        release.notify_waiters();

        let accepted = tokio::time::timeout(std::time::Duration::from_secs(5), extra)
            .await
            .expect("extra submission never unblocked")
            .unwrap();
        assert!(accepted);

        scheduler.stop_and_drain();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn parse_tasks_run_before_build_tasks() {
        let scheduler = Scheduler::new(true);
        let order = Arc::new(Mutex::new(Vec::new()));
        {
            let order = Arc::clone(&order);
            scheduler
                .submit_build(async move {
                    order.lock().await.push("build");
                })
                .await;
        }
        {
            let order = Arc::clone(&order);
            scheduler
                .submit_parse(async move {
                    order.lock().await.push("parse");
                })
                .await;
        }
        scheduler.stop_and_drain();
        scheduler.run(1).await;
        assert_eq!(*order.lock().await, vec!["parse", "build"]);
    }
}
