//! Active objects: worker threads that own an event loop and execute work
//! items submitted from other threads.

use std::collections::VecDeque;
use std::os::unix::io::RawFd;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use log::{debug, error, warn};

use evl_core::{EventFd, FdEvents};

use crate::standard::event_loop::EventLoop;

/// Scheduling policy for the worker thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedulingPolicy {
    /// The default time-sharing policy; the right choice almost always.
    Default,
    /// `SCHED_FIFO`, for work that needs real-time execution.
    Fifo,
}

type WorkItem = Box<dyn FnOnce() + Send>;
type WorkQueue = Arc<Mutex<VecDeque<WorkItem>>>;

/// A worker thread running its own event loop, accepting work items from
/// any thread.
///
/// [`execute`](ActiveObject::execute) appends a work item to a protected
/// queue and signals the worker through a semaphore-counting notify
/// descriptor; the worker's loop wakes, dequeues one item per notification
/// and runs it. Items run strictly in submission order, on the worker
/// thread, exactly once.
///
/// Handles are shared (`Arc`). When the last handle is dropped from a
/// foreign thread, a final stop item is queued behind the remaining work
/// and the worker is joined; when the last handle is dropped from inside
/// the worker itself, the thread is detached and its loop stopped directly
/// (no self-join).
pub struct ActiveObject {
    name: String,
    /// Shared with the worker's readiness callback so the descriptor stays
    /// open until both sides are done with it.
    notify_fd: Arc<EventFd>,
    queue: WorkQueue,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ActiveObject {
    /// Creates an active object whose worker thread is named `name`.
    ///
    /// `init`, when given, runs on the worker before any work item. Returns
    /// `None` when the notify descriptor or the thread cannot be created;
    /// that is the only failure mode exposed to callers.
    pub fn create(
        name: &str,
        init: Option<Box<dyn FnOnce() + Send>>,
        policy: SchedulingPolicy,
    ) -> Option<Arc<ActiveObject>> {
        let notify_fd = match evl_core::eventfd_semaphore() {
            Ok(notify_fd) => Arc::new(notify_fd),
            Err(err) => {
                error!("create: could not create the notify fd for '{}': {}", name, err);
                return None;
            }
        };

        let queue: WorkQueue = Arc::new(Mutex::new(VecDeque::new()));

        let worker = {
            let name = name.to_owned();
            let notify_fd = notify_fd.clone();
            let queue = queue.clone();
            thread::Builder::new().spawn(move || worker_main(name, notify_fd, queue, init, policy))
        };
        let worker = match worker {
            Ok(worker) => worker,
            Err(err) => {
                error!("create: could not spawn the worker thread for '{}': {}", name, err);
                return None;
            }
        };

        debug!("created active object '{}'", name);
        Some(Arc::new(ActiveObject {
            name: name.to_owned(),
            notify_fd,
            queue,
            worker: Mutex::new(Some(worker)),
        }))
    }

    /// Appends `work` to the queue and notifies the worker. Callable from
    /// any thread.
    pub fn execute<F>(&self, work: F)
    where
        F: FnOnce() + Send + 'static,
    {
        lock_queue(&self.queue).push_back(Box::new(work));
        if let Err(err) = evl_core::eventfd_write_one(&self.notify_fd) {
            error!("execute: could not notify worker '{}': {}", self.name, err);
        }
    }

    /// The worker thread's name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for ActiveObject {
    fn drop(&mut self) {
        let worker = match self.worker.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let worker = match worker {
            Some(worker) => worker,
            None => return,
        };

        if worker.thread().id() == thread::current().id() {
            // Terminated from inside a work item on the worker itself:
            // detach, then stop the loop directly.
            debug!("active object '{}' dropped from its own worker, detaching", self.name);
            drop(worker);
            stop_worker_loop(self.notify_fd.as_raw());
        } else {
            debug!("active object '{}' dropped, stopping its worker", self.name);
            let notify_raw = self.notify_fd.as_raw();
            lock_queue(&self.queue).push_back(Box::new(move || stop_worker_loop(notify_raw)));
            if let Err(err) = evl_core::eventfd_write_one(&self.notify_fd) {
                error!("could not notify worker '{}' to stop: {}", self.name, err);
            }
            if worker.join().is_err() {
                error!("the worker thread of '{}' panicked", self.name);
            }
        }
    }
}

fn worker_main(
    name: String,
    notify_fd: Arc<EventFd>,
    queue: WorkQueue,
    init: Option<WorkItem>,
    policy: SchedulingPolicy,
) {
    if let Err(err) = evl_core::set_thread_name(&name) {
        warn!("worker '{}': could not set the thread name: {}", name, err);
    }

    let event_loop = EventLoop::thread_instance();

    let dispatch_fd = notify_fd.clone();
    let dispatch_queue = queue.clone();
    let registered = event_loop.add_fd_handler(
        notify_fd.as_raw(),
        FdEvents::READABLE,
        move |_fd, _events| dispatch_one(&dispatch_fd, &dispatch_queue),
    );
    if let Err(err) = registered {
        error!("worker '{}': could not register the notify fd: {}", name, err);
        return;
    }

    if policy == SchedulingPolicy::Fifo {
        if let Err(err) = evl_core::set_fifo_scheduling() {
            warn!("worker '{}': could not apply SCHED_FIFO: {}", name, err);
        }
    }

    if let Some(init) = init {
        init();
    }

    if let Err(err) = event_loop.run() {
        error!("worker '{}': the event loop failed: {}", name, err);
    }
}

/// One unit read, one item dequeued, invoked outside the queue lock. Each
/// `execute` writes one unit, so a backlog drains one readiness event at a
/// time.
fn dispatch_one(notify_fd: &EventFd, queue: &WorkQueue) {
    if let Err(err) = evl_core::eventfd_read_one(notify_fd) {
        error!("could not read the notify fd: {}", err);
        return;
    }

    let work = lock_queue(queue).pop_front();
    if let Some(work) = work {
        work();
    }
}

/// Runs on the worker: takes the notify descriptor out of its loop and
/// stops it.
fn stop_worker_loop(notify_raw: RawFd) {
    let event_loop = EventLoop::thread_instance();
    let _ = event_loop.remove_fd_handler(notify_raw);
    let _ = event_loop.stop();
}

/// The mutex guards only enqueue and dequeue, never the work invocation.
fn lock_queue(queue: &WorkQueue) -> MutexGuard<'_, VecDeque<WorkItem>> {
    match queue.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
