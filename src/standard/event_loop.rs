//! The per-thread event loop.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::thread::{self, ThreadId};

use log::{debug, error, trace, warn};

use evl_core::{EpollEvent, EpollFd, FdEvents};

use crate::error::{Error, Result};
use crate::standard::thread_local;

/// How many kernel events one wait may return. Deliberately small so that a
/// stop or teardown signal observed inside a callback propagates after at
/// most a couple of dispatches; an implementation constant, not a tuning
/// surface.
const EVENT_BATCH_SIZE: usize = 3;

/// Callback invoked when a registered descriptor becomes ready. Receives
/// the descriptor and the delivered subset of its requested mask.
pub type FdCallback = Box<dyn FnMut(RawFd, FdEvents)>;

/// Zero-argument callback queued with [`EventLoop::schedule_event`].
pub type ScheduledEvent = Box<dyn FnOnce()>;

struct FdHandler {
    fd: RawFd,
    /// Requested mask. Cleared on removal so that an event already dequeued
    /// in the current batch dispatches as a no-op.
    events: Cell<FdEvents>,
    callback: RefCell<FdCallback>,
}

/// The single-threaded readiness dispatcher owned by one thread.
///
/// One instance exists per participating thread
/// ([`thread_instance`](EventLoop::thread_instance)); every operation other
/// than construction fails with [`Error::WrongThread`] when invoked from
/// any other thread. [`run`](EventLoop::run) blocks in the kernel waiting
/// for readiness on the registered descriptors and dispatches their
/// callbacks on the owner thread; between FD callbacks it drains the queue
/// of scheduled events, which therefore have priority over external
/// readiness.
///
/// The kernel demultiplexer handle is created lazily by the first
/// successful [`add_fd_handler`](EventLoop::add_fd_handler) and closed when
/// the instance is dropped.
pub struct EventLoop {
    owner: ThreadId,
    epoll: RefCell<Option<EpollFd>>,
    handlers: RefCell<HashMap<RawFd, Rc<FdHandler>>>,
    /// Handlers removed during the current batch. Kept alive until the top
    /// of the next wait iteration so already-dequeued events for them
    /// resolve to a safe no-op instead of a dangling lookup.
    removed: RefCell<HashMap<RawFd, Rc<FdHandler>>>,
    scheduled: RefCell<VecDeque<ScheduledEvent>>,
    running: Cell<bool>,
}

impl Default for EventLoop {
    fn default() -> EventLoop {
        EventLoop {
            owner: thread::current().id(),
            epoll: RefCell::new(None),
            handlers: RefCell::new(HashMap::new()),
            removed: RefCell::new(HashMap::new()),
            scheduled: RefCell::new(VecDeque::new()),
            running: Cell::new(false),
        }
    }
}

impl EventLoop {
    /// Returns the calling thread's event loop, creating it on first
    /// access.
    pub fn thread_instance() -> Rc<EventLoop> {
        thread_local::instance::<EventLoop>()
    }

    /// Drops the calling thread's event loop instance.
    pub fn reset() {
        debug!("resetting the event loop");
        thread_local::reset::<EventLoop>();
    }

    /// Registers `callback` for readiness events on `fd`.
    ///
    /// `events` must be non-empty. At most one handler may exist per
    /// descriptor.
    pub fn add_fd_handler<F>(&self, fd: RawFd, events: FdEvents, callback: F) -> Result<()>
    where
        F: FnMut(RawFd, FdEvents) + 'static,
    {
        self.check_owner("add_fd_handler")?;

        if self.handlers.borrow().contains_key(&fd) {
            warn!("add_fd_handler: a handler for fd {} already exists", fd);
            return Err(Error::AlreadyExists);
        }

        if events.is_empty() {
            error!("add_fd_handler: empty event mask for fd {}", fd);
            return Err(Error::InvalidArg);
        }

        self.ensure_epoll()?;
        {
            let epoll = self.epoll.borrow();
            let epoll = epoll
                .as_ref()
                .ok_or_else(|| Error::Internal("the epoll instance disappeared".into()))?;
            evl_core::epoll_add(epoll, fd, events, fd as u64)?;
        }

        let handler = Rc::new(FdHandler {
            fd,
            events: Cell::new(events),
            callback: RefCell::new(Box::new(callback)),
        });
        self.handlers.borrow_mut().insert(fd, handler);

        trace!("add_fd_handler: added fd {} with {:?}", fd, events);
        Ok(())
    }

    /// Replaces the requested mask of an already-registered descriptor.
    pub fn update_fd_events(&self, fd: RawFd, events: FdEvents) -> Result<()> {
        self.check_owner("update_fd_events")?;

        let handlers = self.handlers.borrow();
        let handler = match handlers.get(&fd) {
            Some(handler) => handler,
            None => {
                warn!("update_fd_events: fd {} not found", fd);
                return Err(Error::NotFound);
            }
        };

        if events.is_empty() {
            error!("update_fd_events: empty event mask for fd {}", fd);
            return Err(Error::InvalidArg);
        }

        {
            let epoll = self.epoll.borrow();
            let epoll = epoll
                .as_ref()
                .ok_or_else(|| Error::Internal("the epoll instance disappeared".into()))?;
            evl_core::epoll_modify(epoll, fd, events, fd as u64)?;
        }
        handler.events.set(events);

        trace!("update_fd_events: fd {} now watches {:?}", fd, events);
        Ok(())
    }

    /// Unregisters the handler for `fd`.
    ///
    /// An event for the descriptor may already have been dequeued by the
    /// current batch; the handler is therefore parked in a graveyard with a
    /// cleared mask until the next wait iteration, turning such a stale
    /// event into a no-op. No callback for `fd` runs after this returns.
    pub fn remove_fd_handler(&self, fd: RawFd) -> Result<()> {
        self.check_owner("remove_fd_handler")?;

        let handler = match self.handlers.borrow_mut().remove(&fd) {
            Some(handler) => handler,
            None => {
                warn!("remove_fd_handler: fd {} not found", fd);
                return Err(Error::NotFound);
            }
        };

        if let Some(epoll) = self.epoll.borrow().as_ref() {
            // The kernel drops the registration with the last close anyway.
            let _ = evl_core::epoll_remove(epoll, fd);
        }

        handler.events.set(FdEvents::empty());
        self.removed.borrow_mut().insert(fd, handler);

        trace!("remove_fd_handler: removed fd {}", fd);
        Ok(())
    }

    /// Runs the loop until [`stop`](EventLoop::stop) is called or the
    /// handler map becomes empty.
    ///
    /// Waits indefinitely for up to `EVENT_BATCH_SIZE` events per
    /// iteration; a wait interrupted by a signal retries silently. Any
    /// other wait failure returns [`Error::Internal`].
    pub fn run(&self) -> Result<()> {
        self.check_owner("run")?;

        debug!("run: starting the event loop");
        self.running.set(true);

        let mut batch = [EpollEvent::zeroed(); EVENT_BATCH_SIZE];

        while self.running.get() && !self.handlers.borrow().is_empty() {
            // Handlers removed during the previous batch are now safe to
            // drop: no stale event for them can still be in flight.
            self.removed.borrow_mut().clear();

            let count = {
                let epoll = self.epoll.borrow();
                let epoll = match epoll.as_ref() {
                    Some(epoll) => epoll,
                    None => {
                        error!("run: handlers are registered but no epoll instance exists");
                        return Err(Error::Internal("missing epoll instance".into()));
                    }
                };
                evl_core::epoll_wait(epoll, &mut batch, -1)?
            };

            trace!("run: dispatching a batch of {} event(s)", count);
            for event in batch.iter().take(count) {
                self.handle_epoll_event(event);
            }
        }

        debug!("run: the event loop exited");
        Ok(())
    }

    /// Makes [`run`](EventLoop::run) return once the current batch has been
    /// dispatched.
    pub fn stop(&self) -> Result<()> {
        self.check_owner("stop")?;
        debug!("stop: exiting the event loop after the current batch");
        self.running.set(false);
        Ok(())
    }

    /// Queues `event` to run before the next external FD callback.
    ///
    /// Scheduled events run in FIFO order and have priority over readiness
    /// dispatch; see [`run`](EventLoop::run).
    pub fn schedule_event<F>(&self, event: F) -> Result<()>
    where
        F: FnOnce() + 'static,
    {
        self.check_owner("schedule_event")?;
        self.scheduled.borrow_mut().push_back(Box::new(event));
        trace!("schedule_event: queued a scheduled event");
        Ok(())
    }

    fn handle_epoll_event(&self, event: &EpollEvent) {
        let fd = event.token() as RawFd;

        // Graveyard first: an event dequeued for a handler removed earlier
        // in this batch must not reach a handler re-added under the same
        // descriptor number.
        let handler = {
            let removed = self.removed.borrow();
            match removed.get(&fd) {
                Some(handler) => Some(handler.clone()),
                None => self.handlers.borrow().get(&fd).cloned(),
            }
        };
        let handler = match handler {
            Some(handler) => handler,
            None => {
                warn!("run: dropping an event for unknown fd {}", fd);
                return;
            }
        };

        // Removed handlers carry an empty mask and fall through here.
        let delivered = event.ready_events() & handler.events.get();
        if delivered.is_empty() {
            trace!("run: suppressing an event for fd {}", fd);
            return;
        }

        trace!("run: invoking the callback for fd {} with {:?}", fd, delivered);
        (handler.callback.borrow_mut())(handler.fd, delivered);

        self.run_scheduled_events();
    }

    fn run_scheduled_events(&self) {
        // Drains until empty, re-reading the queue head every iteration so
        // events scheduled by a scheduled event also run before the next FD
        // callback. A callback that perpetually reschedules starves the
        // rest of the batch.
        loop {
            let next = self.scheduled.borrow_mut().pop_front();
            match next {
                Some(event) => event(),
                None => break,
            }
        }
    }

    fn ensure_epoll(&self) -> Result<()> {
        let mut slot = self.epoll.borrow_mut();
        if slot.is_none() {
            debug!("creating the epoll instance");
            *slot = Some(evl_core::epoll_create()?);
        }
        Ok(())
    }

    fn check_owner(&self, op: &str) -> Result<()> {
        if thread::current().id() != self.owner {
            error!("{}: called from a thread that does not own this event loop", op);
            return Err(Error::WrongThread);
        }
        Ok(())
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        if self.epoll.get_mut().is_some() {
            debug!("dropping the event loop and closing its epoll instance");
        }
    }
}
