//! Main thread dispatcher
//!
//! Producers on any thread push work through a [`DispatchHandle`]; the
//! [`Dispatcher`] owned by the main thread drains the queue once per tick.
//! Each drain swaps out the whole batch under the lock and runs it after
//! releasing it, so items enqueued during a drain run on the next tick.

use std::collections::VecDeque;
use std::convert::Infallible;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;

use parking_lot::Mutex;

use super::completion::{self, Completion, Resolver, TaskError, TaskResult};
use super::work::{self, WorkItem};
use crate::config::DispatcherConfig;
use crate::coroutines::{Coroutine, StepScheduler};
use crate::error::{
    log_failure_handler, panic_message, BoxError, DispatchError, DispatchResult, FailureHandler,
    ItemFailure,
};

/// Set while a single-instance dispatcher is alive in this process
static SINGLE_INSTANCE_ACTIVE: AtomicBool = AtomicBool::new(false);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Unbound,
    Active { main_thread: ThreadId },
}

struct QueueState {
    status: Status,
    items: VecDeque<WorkItem>,
    capacity: Option<usize>,
}

struct Shared {
    state: Mutex<QueueState>,
}

/// Producer side of the dispatcher
///
/// Cheap to clone and safe to use from any thread. A handle can be created
/// before the dispatcher exists; enqueueing fails with
/// [`DispatchError::NotInitialized`] until a [`Dispatcher`] is activated on
/// it, and again after that dispatcher shuts down.
#[derive(Clone)]
pub struct DispatchHandle {
    shared: Arc<Shared>,
}

impl Default for DispatchHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchHandle {
    /// Create a handle with no dispatcher bound yet
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState {
                    status: Status::Unbound,
                    items: VecDeque::new(),
                    capacity: None,
                }),
            }),
        }
    }

    /// Queue a work item for the next drain
    ///
    /// This is safe to call from any thread.
    ///
    /// # Returns
    /// - `Ok(())` if the item was queued
    /// - `Err(NotInitialized)` if no dispatcher is active
    /// - `Err(QueueFull)` if the configured capacity is reached (item is dropped)
    #[tracing::instrument(skip_all)]
    pub fn enqueue(&self, item: WorkItem) -> DispatchResult<()> {
        self.push_with(move |_| (item, ()))
    }

    /// Queue a closure for the next drain
    pub fn enqueue_fn<F>(&self, f: F) -> DispatchResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.enqueue(WorkItem::immediate(f))
    }

    /// Queue a fallible closure; its error goes to the failure handler
    pub fn enqueue_fallible<F, E>(&self, f: F) -> DispatchResult<()>
    where
        F: FnOnce() -> Result<(), E> + Send + 'static,
        E: Into<BoxError>,
    {
        self.enqueue(WorkItem::fallible(f))
    }

    /// Queue a coroutine; its first step runs in the next drain
    pub fn enqueue_coroutine<C>(&self, coroutine: C) -> DispatchResult<()>
    where
        C: Coroutine + 'static,
    {
        self.enqueue(WorkItem::suspendable(coroutine))
    }

    /// Queue a closure and get a handle to its return value
    ///
    /// The returned [`Completion`] resolves once the main thread has run the
    /// closure. A panic in the closure resolves it with
    /// [`TaskError::Panicked`].
    ///
    /// # Example
    ///
    /// ```ignore
    /// let completion = handle.enqueue_and_await(|| scene.node_count())?;
    /// let count = completion.await?;
    /// ```
    pub fn enqueue_and_await<F, T>(&self, f: F) -> DispatchResult<Completion<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.try_enqueue_and_await(move || Ok::<T, Infallible>(f()))
    }

    /// Queue a fallible closure and get a handle to its outcome
    ///
    /// An `Err(e)` returned by the closure resolves the completion with
    /// [`TaskError::Failed(e)`](TaskError::Failed), keeping the original error.
    #[tracing::instrument(skip_all)]
    pub fn try_enqueue_and_await<F, T, E>(&self, f: F) -> DispatchResult<Completion<T, E>>
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: fmt::Debug + Send + 'static,
    {
        self.push_with(move |main_thread| {
            let (resolver, completion) = completion::pending(Some(main_thread));
            let item = WorkItem::Immediate(Box::new(move || resolve_on_main(f, resolver)));
            (item, completion)
        })
    }

    /// Check whether a dispatcher is currently bound
    pub fn is_active(&self) -> bool {
        matches!(self.shared.state.lock().status, Status::Active { .. })
    }

    /// Check if the current thread is the active dispatcher's main thread
    pub fn is_main_thread(&self) -> bool {
        match self.shared.state.lock().status {
            Status::Active { main_thread } => main_thread == std::thread::current().id(),
            Status::Unbound => false,
        }
    }

    /// Number of items waiting for the next drain
    pub fn pending(&self) -> usize {
        self.shared.state.lock().items.len()
    }

    /// Build and push an item under the queue lock
    ///
    /// `make` receives the main thread id and is only called once the item
    /// is known to be accepted.
    fn push_with<R>(&self, make: impl FnOnce(ThreadId) -> (WorkItem, R)) -> DispatchResult<R> {
        let mut state = self.shared.state.lock();

        let Status::Active { main_thread } = state.status else {
            tracing::debug!("Rejected work item: dispatcher not initialized");
            return Err(DispatchError::NotInitialized);
        };

        if let Some(capacity) = state.capacity {
            if state.items.len() >= capacity {
                tracing::warn!("Dispatch queue full, dropping work item");
                return Err(DispatchError::QueueFull { capacity });
            }
        }

        let (item, output) = make(main_thread);
        state.items.push_back(item);
        Ok(output)
    }
}

impl fmt::Debug for DispatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("DispatchHandle")
            .field("status", &state.status)
            .field("pending", &state.items.len())
            .finish()
    }
}

/// Body of an awaitable item, runs on the main thread
fn resolve_on_main<F, T, E>(f: F, resolver: Resolver<T, E>) -> Result<(), BoxError>
where
    F: FnOnce() -> Result<T, E>,
    E: fmt::Debug,
{
    let result: TaskResult<T, E> = match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(error)) => Err(TaskError::Failed(error)),
        Err(payload) => Err(TaskError::Panicked(panic_message(payload.as_ref()))),
    };

    // Nobody is awaiting: surface failures instead of dropping them
    match resolver.resolve(result) {
        Ok(()) | Err(Ok(_)) => Ok(()),
        Err(Err(error)) => Err(format!("Unobserved awaitable failure: {:?}", error).into()),
    }
}

/// Summary of one drain
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    /// Items taken from the queue and run (or started)
    pub executed: usize,
    /// Immediate items that failed
    pub failed: usize,
    /// Suspendable items handed to the step scheduler
    pub started_coroutines: usize,
}

/// Consumer side of the dispatcher, owned by the main thread
///
/// Created with [`activate`](Self::activate) on the thread that will call
/// [`drain`](Self::drain). Dropping it shuts it down.
pub struct Dispatcher {
    handle: DispatchHandle,
    main_thread: ThreadId,
    steps: StepScheduler,
    failure_handler: FailureHandler,
    backlog_warn_threshold: usize,
    single_instance: bool,
    shut_down: bool,
}

impl Dispatcher {
    /// Activate a dispatcher on a fresh handle
    pub fn new(config: &DispatcherConfig) -> DispatchResult<Self> {
        Self::activate(&DispatchHandle::new(), config)
    }

    /// Activate a dispatcher on `handle`, making the calling thread the main thread
    ///
    /// # Returns
    /// `Err(AlreadyActive)` if the handle already has a live dispatcher, or
    /// if `single_instance` is set and another one is alive in this process
    #[tracing::instrument(skip_all)]
    pub fn activate(handle: &DispatchHandle, config: &DispatcherConfig) -> DispatchResult<Self> {
        if config.single_instance
            && SINGLE_INSTANCE_ACTIVE
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
        {
            tracing::warn!("Refusing to activate a second single-instance dispatcher");
            return Err(DispatchError::AlreadyActive);
        }

        let main_thread = std::thread::current().id();
        {
            let mut state = handle.shared.state.lock();
            if let Status::Active { .. } = state.status {
                if config.single_instance {
                    SINGLE_INSTANCE_ACTIVE.store(false, Ordering::Release);
                }
                return Err(DispatchError::AlreadyActive);
            }
            state.status = Status::Active { main_thread };
            state.capacity = config.capacity();
        }

        tracing::debug!("Dispatcher activated on main thread {:?}", main_thread);

        let failure_handler = log_failure_handler();
        Ok(Self {
            handle: handle.clone(),
            main_thread,
            steps: StepScheduler::with_failure_handler(failure_handler.clone()),
            failure_handler,
            backlog_warn_threshold: config.backlog_warn_threshold,
            single_instance: config.single_instance,
            shut_down: false,
        })
    }

    /// Producer handle bound to this dispatcher
    pub fn handle(&self) -> DispatchHandle {
        self.handle.clone()
    }

    pub fn main_thread(&self) -> ThreadId {
        self.main_thread
    }

    /// Fail with `WrongThread` unless called on the main thread
    pub fn ensure_main_thread(&self) -> DispatchResult<()> {
        let actual = std::thread::current().id();
        if actual == self.main_thread {
            Ok(())
        } else {
            Err(DispatchError::WrongThread {
                expected: self.main_thread,
                actual,
            })
        }
    }

    /// Step scheduler that continues suspendable items
    pub fn steps(&self) -> &StepScheduler {
        &self.steps
    }

    pub fn steps_mut(&mut self) -> &mut StepScheduler {
        &mut self.steps
    }

    /// Route unhandled failures (failed fire-and-forget items, panicking
    /// coroutines, unobserved awaitable failures) to `handler`
    pub fn set_failure_handler<F>(&mut self, handler: F)
    where
        F: Fn(&ItemFailure) + Send + Sync + 'static,
    {
        let handler: FailureHandler = Arc::new(handler);
        self.steps.set_failure_handler(handler.clone());
        self.failure_handler = handler;
    }

    /// Run every item queued before this call, in enqueue order
    ///
    /// Called once per tick on the main thread. Failures are isolated per
    /// item and reported to the failure handler. Suspendable items run their
    /// first step here and continue in the step scheduler.
    #[tracing::instrument(skip(self))]
    pub fn drain(&mut self) -> DispatchResult<DrainReport> {
        self.ensure_main_thread()?;

        let batch = std::mem::take(&mut self.handle.shared.state.lock().items);
        let mut report = DrainReport::default();
        if batch.is_empty() {
            return Ok(report);
        }

        if self.backlog_warn_threshold > 0 && batch.len() > self.backlog_warn_threshold {
            tracing::warn!(
                "Draining {} queued items (threshold {})",
                batch.len(),
                self.backlog_warn_threshold
            );
        }

        for item in batch {
            report.executed += 1;
            match item {
                WorkItem::Immediate(task) => {
                    if let Err(failure) = work::run_task(task) {
                        report.failed += 1;
                        (self.failure_handler)(&failure);
                    }
                }
                WorkItem::Suspendable(coroutine) => {
                    report.started_coroutines += 1;
                    self.steps.start_boxed(coroutine);
                }
            }
        }

        tracing::trace!(
            "Drained {} items ({} failed, {} coroutines started)",
            report.executed,
            report.failed,
            report.started_coroutines
        );
        Ok(report)
    }

    /// Shut down, unbinding the handle
    ///
    /// Items still queued are dropped without running; their completions
    /// resolve with [`TaskError::Abandoned`]. Running coroutines are stopped.
    pub fn shutdown(mut self) {
        self.deactivate();
    }

    fn deactivate(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;

        let dropped = {
            let mut state = self.handle.shared.state.lock();
            state.status = Status::Unbound;
            state.capacity = None;
            std::mem::take(&mut state.items)
        };
        let stopped = self.steps.stop_all();

        if self.single_instance {
            SINGLE_INSTANCE_ACTIVE.store(false, Ordering::Release);
        }

        tracing::debug!(
            "Dispatcher shut down ({} queued items dropped, {} coroutines stopped)",
            dropped.len(),
            stopped
        );
        // Dropped outside the lock: abandoned completions wake their awaiters
        drop(dropped);
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.deactivate();
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("main_thread", &self.main_thread)
            .field("pending", &self.handle.pending())
            .field("coroutines", &self.steps.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coroutines::{Step, StepContext};
    use parking_lot::Mutex as PlMutex;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn config() -> DispatcherConfig {
        DispatcherConfig::default()
    }

    fn recorder() -> Arc<PlMutex<Vec<&'static str>>> {
        Arc::new(PlMutex::new(Vec::new()))
    }

    #[test]
    fn test_lifecycle_not_initialized() {
        let handle = DispatchHandle::new();
        assert_eq!(handle.enqueue_fn(|| {}), Err(DispatchError::NotInitialized));
        assert!(!handle.is_active());

        let dispatcher = Dispatcher::activate(&handle, &config()).unwrap();
        assert!(handle.is_active());
        assert!(handle.is_main_thread());
        assert_eq!(handle.enqueue_fn(|| {}), Ok(()));

        dispatcher.shutdown();
        assert!(!handle.is_active());
        assert_eq!(handle.enqueue_fn(|| {}), Err(DispatchError::NotInitialized));
        assert!(matches!(
            handle.enqueue_and_await(|| 1),
            Err(DispatchError::NotInitialized)
        ));
    }

    #[test]
    fn test_activate_twice_on_same_handle() {
        let handle = DispatchHandle::new();
        let _dispatcher = Dispatcher::activate(&handle, &config()).unwrap();
        assert!(matches!(
            Dispatcher::activate(&handle, &config()),
            Err(DispatchError::AlreadyActive)
        ));
    }

    #[test]
    fn test_reactivate_after_shutdown() {
        let handle = DispatchHandle::new();
        Dispatcher::activate(&handle, &config()).unwrap().shutdown();

        let mut dispatcher = Dispatcher::activate(&handle, &config()).unwrap();
        handle.enqueue_fn(|| {}).unwrap();
        assert_eq!(dispatcher.drain().unwrap().executed, 1);
    }

    #[test]
    fn test_single_instance() {
        let config = DispatcherConfig {
            single_instance: true,
            ..Default::default()
        };

        let first = Dispatcher::new(&config).unwrap();
        assert!(matches!(
            Dispatcher::new(&config),
            Err(DispatchError::AlreadyActive)
        ));

        drop(first);
        let second = Dispatcher::new(&config).unwrap();
        second.shutdown();
    }

    #[test]
    fn test_fifo_order() {
        let mut dispatcher = Dispatcher::new(&config()).unwrap();
        let handle = dispatcher.handle();
        let log = recorder();

        for name in ["A", "B", "C", "D", "E"] {
            let log = log.clone();
            handle.enqueue_fn(move || log.lock().push(name)).unwrap();
        }
        assert_eq!(handle.pending(), 5);

        let report = dispatcher.drain().unwrap();
        assert_eq!(report.executed, 5);
        assert_eq!(*log.lock(), vec!["A", "B", "C", "D", "E"]);
        assert_eq!(handle.pending(), 0);
    }

    #[test]
    fn test_reentrant_enqueue_runs_next_drain() {
        let mut dispatcher = Dispatcher::new(&config()).unwrap();
        let handle = dispatcher.handle();
        let log = recorder();

        let inner_log = log.clone();
        let inner_handle = handle.clone();
        handle
            .enqueue_fn(move || {
                inner_log.lock().push("outer");
                let log = inner_log.clone();
                inner_handle
                    .enqueue_fn(move || log.lock().push("inner"))
                    .unwrap();
            })
            .unwrap();

        assert_eq!(dispatcher.drain().unwrap().executed, 1);
        assert_eq!(*log.lock(), vec!["outer"]);
        assert_eq!(handle.pending(), 1);

        assert_eq!(dispatcher.drain().unwrap().executed, 1);
        assert_eq!(*log.lock(), vec!["outer", "inner"]);
    }

    #[test]
    fn test_failing_item_does_not_stop_batch() {
        let mut dispatcher = Dispatcher::new(&config()).unwrap();
        let failures = Arc::new(PlMutex::new(Vec::new()));
        let f = failures.clone();
        dispatcher.set_failure_handler(move |failure| f.lock().push(failure.to_string()));

        let handle = dispatcher.handle();
        let log = recorder();

        let l = log.clone();
        handle.enqueue_fn(move || l.lock().push("first")).unwrap();
        handle.enqueue_fn(|| panic!("item blew up")).unwrap();
        handle
            .enqueue_fallible(|| Err::<(), _>("bad state"))
            .unwrap();
        let l = log.clone();
        handle.enqueue_fn(move || l.lock().push("last")).unwrap();

        let report = dispatcher.drain().unwrap();
        assert_eq!(report.executed, 4);
        assert_eq!(report.failed, 2);
        assert_eq!(*log.lock(), vec!["first", "last"]);
        assert_eq!(
            *failures.lock(),
            vec![
                "Work item panicked: item blew up".to_string(),
                "Work item failed: bad state".to_string(),
            ]
        );
    }

    #[test]
    fn test_await_resolves_after_drain() {
        let mut dispatcher = Dispatcher::new(&config()).unwrap();
        let handle = dispatcher.handle();

        let mut completion = handle.enqueue_and_await(|| 42).unwrap();
        assert!(!completion.is_resolved());
        assert!(completion.try_take().is_none());

        dispatcher.drain().unwrap();
        assert_eq!(completion.wait(), Ok(42));
    }

    #[test]
    fn test_await_preserves_error_value() {
        #[derive(Debug, PartialEq)]
        enum LoadError {
            Missing(u32),
        }

        let mut dispatcher = Dispatcher::new(&config()).unwrap();
        let handle = dispatcher.handle();

        let completion = handle
            .try_enqueue_and_await(|| Err::<u32, _>(LoadError::Missing(7)))
            .unwrap();
        dispatcher.drain().unwrap();

        assert_eq!(
            completion.wait(),
            Err(TaskError::Failed(LoadError::Missing(7)))
        );
    }

    #[test]
    fn test_await_panic_resolves_panicked() {
        let mut dispatcher = Dispatcher::new(&config()).unwrap();
        let handle = dispatcher.handle();

        let completion = handle
            .enqueue_and_await(|| -> u32 { panic!("main thread exploded") })
            .unwrap();
        let report = dispatcher.drain().unwrap();

        assert_eq!(report.failed, 0);
        assert_eq!(
            completion.wait(),
            Err(TaskError::Panicked("main thread exploded".to_string()))
        );
    }

    #[test]
    fn test_unobserved_await_failure_reported() {
        let mut dispatcher = Dispatcher::new(&config()).unwrap();
        let failures = Arc::new(AtomicUsize::new(0));
        let f = failures.clone();
        dispatcher.set_failure_handler(move |_| {
            f.fetch_add(1, Ordering::SeqCst);
        });

        let handle = dispatcher.handle();
        drop(handle.try_enqueue_and_await(|| Err::<(), _>("lost")).unwrap());
        drop(handle.enqueue_and_await(|| 5).unwrap());

        let report = dispatcher.drain().unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(failures.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_wait_on_main_thread_does_not_deadlock() {
        let dispatcher = Dispatcher::new(&config()).unwrap();
        let completion = dispatcher.handle().enqueue_and_await(|| 1).unwrap();
        assert_eq!(completion.wait(), Err(TaskError::WouldBlockMainThread));
    }

    #[test]
    fn test_shutdown_abandons_queued_awaitables() {
        let dispatcher = Dispatcher::new(&config()).unwrap();
        let completion = dispatcher.handle().enqueue_and_await(|| 1).unwrap();

        let waiter = std::thread::spawn(move || completion.wait());
        dispatcher.shutdown();

        assert_eq!(waiter.join().unwrap(), Err(TaskError::Abandoned));
    }

    #[test]
    fn test_background_await_example() {
        let mut dispatcher = Dispatcher::new(&config()).unwrap();
        let handle = dispatcher.handle();
        let log = recorder();

        // Items queued from the main thread itself run in order
        for name in ["A", "B", "C"] {
            let log = log.clone();
            handle.enqueue_fn(move || log.lock().push(name)).unwrap();
        }
        dispatcher.drain().unwrap();
        assert_eq!(*log.lock(), vec!["A", "B", "C"]);

        // A background thread awaits a value computed on the main thread
        let producer = handle.clone();
        let (queued_tx, queued_rx) = std::sync::mpsc::channel();
        let worker = std::thread::spawn(move || {
            let completion = producer.enqueue_and_await(|| 42).unwrap();
            queued_tx.send(()).unwrap();
            match completion.wait_timeout(Duration::from_millis(50)) {
                Ok(result) => panic!("Resolved before drain: {result:?}"),
                Err(completion) => completion.wait(),
            }
        });

        queued_rx.recv().unwrap();
        std::thread::sleep(Duration::from_millis(100));
        dispatcher.drain().unwrap();

        assert_eq!(worker.join().unwrap(), Ok(42));
    }

    #[test]
    fn test_concurrent_producers() {
        const THREADS: usize = 8;
        const ITEMS: usize = 500;

        let mut dispatcher = Dispatcher::new(&config()).unwrap();
        let handle = dispatcher.handle();
        let seen = Arc::new(PlMutex::new(Vec::with_capacity(THREADS * ITEMS)));

        let producers: Vec<_> = (0..THREADS)
            .map(|thread| {
                let handle = handle.clone();
                let seen = seen.clone();
                std::thread::spawn(move || {
                    for item in 0..ITEMS {
                        let seen = seen.clone();
                        handle
                            .enqueue_fn(move || seen.lock().push((thread, item)))
                            .unwrap();
                    }
                })
            })
            .collect();

        // Drain while producers are still running
        let mut drained = 0;
        while producers.iter().any(|p| !p.is_finished()) {
            drained += dispatcher.drain().unwrap().executed;
        }
        for producer in producers {
            producer.join().unwrap();
        }
        drained += dispatcher.drain().unwrap().executed;

        assert_eq!(drained, THREADS * ITEMS);

        let mut seen = seen.lock().clone();
        assert_eq!(seen.len(), THREADS * ITEMS);

        // Per-producer order is preserved
        for thread in 0..THREADS {
            let items: Vec<usize> = seen
                .iter()
                .filter(|(t, _)| *t == thread)
                .map(|(_, i)| *i)
                .collect();
            assert_eq!(items, (0..ITEMS).collect::<Vec<_>>());
        }

        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), THREADS * ITEMS);
    }

    #[test]
    fn test_drain_from_wrong_thread() {
        let dispatcher = Dispatcher::new(&config()).unwrap();
        let handle = dispatcher.handle();
        handle.enqueue_fn(|| {}).unwrap();

        let result = std::thread::spawn(move || {
            let mut dispatcher = dispatcher;
            let result = dispatcher.drain();
            (result, dispatcher)
        })
        .join()
        .unwrap();

        assert!(matches!(result.0, Err(DispatchError::WrongThread { .. })));
        assert_eq!(handle.pending(), 1);
    }

    #[test]
    fn test_queue_capacity() {
        let config = DispatcherConfig {
            max_queued: 2,
            ..Default::default()
        };
        let mut dispatcher = Dispatcher::new(&config).unwrap();
        let handle = dispatcher.handle();

        handle.enqueue_fn(|| {}).unwrap();
        handle.enqueue_fn(|| {}).unwrap();
        assert_eq!(
            handle.enqueue_fn(|| {}),
            Err(DispatchError::QueueFull { capacity: 2 })
        );

        dispatcher.drain().unwrap();
        assert_eq!(handle.enqueue_fn(|| {}), Ok(()));
    }

    #[test]
    fn test_suspendable_item_continues_in_scheduler() {
        let mut dispatcher = Dispatcher::new(&config()).unwrap();
        let handle = dispatcher.handle();
        let steps_run = Arc::new(AtomicUsize::new(0));

        let s = steps_run.clone();
        handle
            .enqueue_coroutine(move |_: &StepContext| {
                if s.fetch_add(1, Ordering::SeqCst) == 0 {
                    Step::Yield
                } else {
                    Step::Done
                }
            })
            .unwrap();

        let report = dispatcher.drain().unwrap();
        assert_eq!(report.started_coroutines, 1);
        assert_eq!(steps_run.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.steps().len(), 1);
        assert_eq!(handle.pending(), 0);

        // Not re-queued: a second drain does nothing, the scheduler resumes it
        assert_eq!(dispatcher.drain().unwrap().executed, 0);
        dispatcher.steps_mut().tick();
        assert_eq!(steps_run.load(Ordering::SeqCst), 2);
        assert!(dispatcher.steps().is_empty());
    }

    #[test]
    fn test_unbounded_wait_does_not_stop_batch() {
        let mut dispatcher = Dispatcher::new(&config()).unwrap();
        let handle = dispatcher.handle();
        let ran = Arc::new(AtomicUsize::new(0));

        handle
            .enqueue_coroutine(|_: &StepContext| Step::WaitFor(Duration::MAX))
            .unwrap();
        let r = ran.clone();
        handle
            .enqueue_fn(move || {
                r.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        let completion = handle.enqueue_and_await(|| "after").unwrap();

        let report = dispatcher.drain().unwrap();
        assert_eq!(report.executed, 3);
        assert_eq!(report.failed, 0);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert_eq!(completion.wait(), Ok("after"));

        dispatcher.steps_mut().tick();
        assert_eq!(dispatcher.steps().len(), 1);
    }

    struct Ticker {
        steps: Arc<AtomicUsize>,
        dropped: Arc<AtomicBool>,
    }

    impl Coroutine for Ticker {
        fn resume(&mut self, _: &StepContext) -> Step {
            self.steps.fetch_add(1, Ordering::SeqCst);
            Step::Yield
        }
    }

    impl Drop for Ticker {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_shutdown_stops_running_coroutines() {
        let mut dispatcher = Dispatcher::new(&config()).unwrap();
        let handle = dispatcher.handle();
        let steps = Arc::new(AtomicUsize::new(0));
        let dropped = Arc::new(AtomicBool::new(false));

        handle
            .enqueue_coroutine(Ticker {
                steps: steps.clone(),
                dropped: dropped.clone(),
            })
            .unwrap();
        dispatcher.drain().unwrap();
        dispatcher.steps_mut().tick();
        assert_eq!(steps.load(Ordering::SeqCst), 2);
        assert_eq!(dispatcher.steps().len(), 1);
        assert!(!dropped.load(Ordering::SeqCst));

        dispatcher.shutdown();

        assert!(dropped.load(Ordering::SeqCst));
        assert_eq!(steps.load(Ordering::SeqCst), 2);
        assert!(!handle.is_active());
    }

    #[test]
    fn test_await_cooperatively_from_background() {
        let mut dispatcher = Dispatcher::new(&config()).unwrap();
        let handle = dispatcher.handle();

        let worker = std::thread::spawn(move || {
            pollster::block_on(async move {
                let first = handle.enqueue_and_await(|| 20).unwrap().await;
                let second = handle.enqueue_and_await(|| 22).unwrap().await;
                Ok::<_, TaskError>(first? + second?)
            })
        });

        while !worker.is_finished() {
            dispatcher.drain().unwrap();
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(worker.join().unwrap(), Ok(42));
    }
}
