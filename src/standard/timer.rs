//! The timer manager: arbitrarily many logical timers multiplexed over one
//! kernel timer descriptor.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;
use std::thread::{self, ThreadId};
use std::time::Duration;

use log::{debug, error, trace, warn};

use evl_core::{FdEvents, MonotonicTime, TimerFd};

use crate::error::{Error, Result};
use crate::standard::event_loop::EventLoop;
use crate::standard::thread_local;

/// Target of timer expirations.
///
/// Implement this on the object that owns the timers and subscribe it with
/// an `Rc`. The `user_id` passed back distinguishes multiple timers on the
/// same subscriber; `(subscriber, user_id)` identifies one live timer.
pub trait TimerSubscriber {
    /// Invoked on the owner thread when the timer for `user_id` expires.
    ///
    /// May freely start or cancel timers, including its own.
    fn handle_timer_expired(&self, user_id: u32);
}

#[derive(Clone)]
struct TimerEntry {
    subscriber: Rc<dyn TimerSubscriber>,
    user_id: u32,
    periodical: bool,
    interval: Duration,
}

/// Ascending deadline, then insertion sequence: timers sharing a deadline
/// fire in start order.
type TimerKey = (MonotonicTime, u64);

/// Multiplexes one-shot and periodical timers for one thread.
///
/// All timers share a single timer descriptor registered in the thread's
/// [`EventLoop`]; the descriptor is created lazily by the first start and
/// is always armed for the earliest pending deadline (or disarmed when no
/// timers remain). Deadlines live on the monotonic clock, so wall-clock
/// changes do not affect them.
pub struct TimerManager {
    owner: ThreadId,
    timer_fd: RefCell<Option<TimerFd>>,
    /// All active timers, sorted by deadline. Timers with equal deadlines
    /// keep insertion order through the sequence half of the key.
    active: RefCell<BTreeMap<TimerKey, TimerEntry>>,
    next_seq: Cell<u64>,
}

impl Default for TimerManager {
    fn default() -> TimerManager {
        TimerManager {
            owner: thread::current().id(),
            timer_fd: RefCell::new(None),
            active: RefCell::new(BTreeMap::new()),
            next_seq: Cell::new(0),
        }
    }
}

impl TimerManager {
    /// Returns the calling thread's timer manager, creating it on first
    /// access.
    pub fn thread_instance() -> Rc<TimerManager> {
        thread_local::instance::<TimerManager>()
    }

    /// Drops the calling thread's timer manager instance.
    pub fn reset() {
        thread_local::reset::<TimerManager>();
    }

    /// Starts a one-shot timer expiring `timeout` from now.
    pub fn start_timer(
        &self,
        timeout: Duration,
        subscriber: Rc<dyn TimerSubscriber>,
        user_id: u32,
    ) -> Result<()> {
        trace!("starting a timer, timeout = {:?}, user_id = {}", timeout, user_id);
        self.launch_new_timer(
            TimerEntry {
                subscriber,
                user_id,
                periodical: false,
                interval: Duration::ZERO,
            },
            timeout,
        )
    }

    /// Starts a periodical timer firing every `interval` until cancelled.
    pub fn start_periodical_timer(
        &self,
        interval: Duration,
        subscriber: Rc<dyn TimerSubscriber>,
        user_id: u32,
    ) -> Result<()> {
        trace!(
            "starting a periodical timer, interval = {:?}, user_id = {}",
            interval,
            user_id
        );
        self.launch_new_timer(
            TimerEntry {
                subscriber,
                user_id,
                periodical: true,
                interval,
            },
            interval,
        )
    }

    /// Cancels the timer identified by `(subscriber, user_id)`.
    ///
    /// After this returns the subscriber is not invoked for that identity
    /// again unless the timer is restarted; this holds even when the timer
    /// is already due in the current batch.
    pub fn cancel_timer(&self, subscriber: &dyn TimerSubscriber, user_id: u32) -> Result<()> {
        self.check_owner("cancel_timer")?;

        let (key, was_earliest) = {
            let active = self.active.borrow();
            let found = active
                .iter()
                .find(|(_, entry)| {
                    subscriber_ptr(entry.subscriber.as_ref()) == subscriber_ptr(subscriber)
                        && entry.user_id == user_id
                })
                .map(|(key, _)| *key);
            match found {
                Some(key) => (key, active.keys().next() == Some(&key)),
                None => {
                    warn!("cancel_timer: no timer for user_id {}", user_id);
                    return Err(Error::NotFound);
                }
            }
        };

        trace!("cancelling a timer, user_id = {}", user_id);
        self.active.borrow_mut().remove(&key);

        if was_earliest {
            // The kernel timer was armed for the cancelled deadline.
            if let Err(err) = self.rearm() {
                error!("cancel_timer: failed to reprogram the timer fd: {}", err);
            }
        }

        Ok(())
    }

    fn launch_new_timer(&self, entry: TimerEntry, timeout: Duration) -> Result<()> {
        self.check_owner("start_timer")?;
        let user_id = entry.user_id;

        {
            let active = self.active.borrow();
            let duplicate = active.values().any(|existing| {
                subscriber_ptr(existing.subscriber.as_ref())
                    == subscriber_ptr(entry.subscriber.as_ref())
                    && existing.user_id == user_id
            });
            if duplicate {
                warn!("start_timer: a timer for user_id {} already exists", user_id);
                return Err(Error::AlreadyExists);
            }
        }

        self.ensure_timer_fd()?;

        let deadline = evl_core::monotonic_now()? + timeout;
        let key = (deadline, self.bump_seq());
        let is_earliest = {
            let mut active = self.active.borrow_mut();
            active.insert(key, entry);
            active.keys().next() == Some(&key)
        };

        if is_earliest {
            if let Err(err) = self.rearm() {
                // Roll the insert back so the map and the kernel timer stay
                // consistent.
                self.active.borrow_mut().remove(&key);
                error!("start_timer: failed to program the timer fd: {}", err);
                return Err(err);
            }
        }

        trace!("started a timer, user_id = {}", user_id);
        Ok(())
    }

    /// Lazily creates the timer descriptor and registers it with the
    /// thread's event loop.
    fn ensure_timer_fd(&self) -> Result<()> {
        if self.timer_fd.borrow().is_some() {
            return Ok(());
        }

        let timer_fd = evl_core::timerfd_create()?;
        let raw = timer_fd.as_raw();

        let registered = EventLoop::thread_instance().add_fd_handler(
            raw,
            FdEvents::READABLE,
            move |_fd, _events| {
                if let Some(manager) = thread_local::try_instance::<TimerManager>() {
                    manager.on_timer_expired();
                }
            },
        );
        if let Err(err) = registered {
            error!("failed to register the timer fd with the event loop: {}", err);
            return Err(Error::Internal(format!(
                "could not register the timer fd: {}",
                err
            )));
        }

        debug!("created timer fd {}", raw);
        *self.timer_fd.borrow_mut() = Some(timer_fd);
        Ok(())
    }

    /// Programs the timer descriptor for the earliest pending deadline, or
    /// disarms it when no timers remain.
    fn rearm(&self) -> Result<()> {
        let timer_fd = self.timer_fd.borrow();
        let timer_fd = match timer_fd.as_ref() {
            Some(timer_fd) => timer_fd,
            None => return Ok(()),
        };

        let earliest = self.active.borrow().keys().next().map(|key| key.0);
        match earliest {
            Some(deadline) => evl_core::timerfd_arm_at(timer_fd, deadline)?,
            None => {
                trace!("no timers remain, disarming the timer fd");
                evl_core::timerfd_disarm(timer_fd)?;
            }
        }
        Ok(())
    }

    /// Expiry handler, invoked by the event loop when the timer descriptor
    /// becomes readable. At most one subscriber is invoked per kernel
    /// event; any further due timers fire on subsequent loop iterations
    /// once the descriptor has been re-armed.
    fn on_timer_expired(&self) {
        {
            let timer_fd = self.timer_fd.borrow();
            let timer_fd = match timer_fd.as_ref() {
                Some(timer_fd) => timer_fd,
                None => return,
            };
            match evl_core::timerfd_read(timer_fd) {
                // The due timer was cancelled by a peer callback in the same
                // batch; nothing to deliver.
                Ok(None) => {
                    trace!("the timer fd fired but no expiration is pending");
                    return;
                }
                Ok(Some(_)) => {}
                Err(err) => {
                    error!("failed to read the timer fd: {}", err);
                    return;
                }
            }
        }

        let fired = {
            let mut active = self.active.borrow_mut();
            match active.pop_first() {
                Some((_, entry)) => {
                    if entry.periodical {
                        match evl_core::monotonic_now() {
                            Ok(now) => {
                                active.insert((now + entry.interval, self.bump_seq()), entry.clone());
                            }
                            Err(err) => {
                                error!("failed to re-schedule a periodical timer: {}", err)
                            }
                        }
                    }
                    Some(entry)
                }
                None => {
                    error!("the timer fd fired but no timer is active");
                    None
                }
            }
        };
        let entry = match fired {
            Some(entry) => entry,
            None => return,
        };

        // Reprogram before invoking, so a subscriber that starts or cancels
        // timers observes a consistent state.
        if let Err(err) = self.rearm() {
            error!("failed to reprogram the timer fd: {}", err);
        }

        trace!("timer expired, user_id = {}", entry.user_id);
        entry.subscriber.handle_timer_expired(entry.user_id);
    }

    fn bump_seq(&self) -> u64 {
        let seq = self.next_seq.get();
        self.next_seq.set(seq + 1);
        seq
    }

    fn check_owner(&self, op: &str) -> Result<()> {
        if thread::current().id() != self.owner {
            error!("{}: called from a thread that does not own this timer manager", op);
            return Err(Error::WrongThread);
        }
        Ok(())
    }
}

impl Drop for TimerManager {
    fn drop(&mut self) {
        if let Some(timer_fd) = self.timer_fd.get_mut().take() {
            let _ = evl_core::timerfd_disarm(&timer_fd);
            if let Some(event_loop) = thread_local::try_instance::<EventLoop>() {
                let _ = event_loop.remove_fd_handler(timer_fd.as_raw());
            }
            debug!("timer manager dropped, timer fd closed");
        }
    }
}

/// Identity is the subscriber's data pointer, so two `Rc` clones of the same
/// object compare equal regardless of which vtable the fat pointers carry.
fn subscriber_ptr(subscriber: &dyn TimerSubscriber) -> *const () {
    subscriber as *const dyn TimerSubscriber as *const ()
}
