//! Core types: readiness masks, owned descriptor handles and monotonic time.

use std::fmt;
use std::ops::Add;
use std::os::unix::io::RawFd;
use std::time::Duration;

use crate::functions::close_fd;

const NANOS_PER_SEC: u64 = 1_000_000_000;

bitflags::bitflags! {
    /// Readiness events deliverable for a registered descriptor.
    ///
    /// The values are deliberately decoupled from the kernel's `epoll` flag
    /// values; conversion in both directions happens inside this crate so
    /// kernel bits never leak to callers.
    pub struct FdEvents: u32 {
        /// The descriptor has data to read.
        const READABLE = 1 << 0;
        /// The descriptor accepts writes without blocking.
        const WRITABLE = 1 << 1;
    }
}

impl FdEvents {
    pub(crate) fn to_epoll(self) -> u32 {
        let mut bits = 0;
        if self.contains(FdEvents::READABLE) {
            bits |= libc::EPOLLIN as u32;
        }
        if self.contains(FdEvents::WRITABLE) {
            bits |= libc::EPOLLOUT as u32;
        }
        bits
    }

    /// Kernel-only bits (`EPOLLERR`, `EPOLLHUP`, ...) have no public
    /// counterpart and are dropped.
    pub(crate) fn from_epoll(bits: u32) -> FdEvents {
        let mut events = FdEvents::empty();
        if bits & libc::EPOLLIN as u32 != 0 {
            events |= FdEvents::READABLE;
        }
        if bits & libc::EPOLLOUT as u32 != 0 {
            events |= FdEvents::WRITABLE;
        }
        events
    }
}

/// One slot of an epoll wait batch.
///
/// Wraps the kernel's event record; [`ready_events`] hands the readiness out
/// as an [`FdEvents`] mask and [`token`] returns the registration token.
///
/// [`ready_events`]: EpollEvent::ready_events
/// [`token`]: EpollEvent::token
#[repr(transparent)]
#[derive(Clone, Copy)]
pub struct EpollEvent(pub(crate) libc::epoll_event);

impl EpollEvent {
    /// An empty slot, for filling wait buffers.
    pub fn zeroed() -> EpollEvent {
        EpollEvent(libc::epoll_event { events: 0, u64: 0 })
    }

    pub(crate) fn new(events: FdEvents, token: u64) -> EpollEvent {
        EpollEvent(libc::epoll_event {
            events: events.to_epoll(),
            u64: token,
        })
    }

    /// The delivered readiness, converted to the public mask.
    pub fn ready_events(&self) -> FdEvents {
        let bits = self.0.events;
        FdEvents::from_epoll(bits)
    }

    /// The token supplied when the descriptor was registered.
    pub fn token(&self) -> u64 {
        self.0.u64
    }
}

impl fmt::Debug for EpollEvent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let events = self.0.events;
        let token = self.0.u64;
        f.debug_struct("EpollEvent")
            .field("events", &events)
            .field("token", &token)
            .finish()
    }
}

/// An owned epoll instance. Closed on drop.
#[derive(Debug)]
pub struct EpollFd(RawFd);

impl EpollFd {
    pub(crate) fn from_raw(fd: RawFd) -> EpollFd {
        EpollFd(fd)
    }

    pub fn as_raw(&self) -> RawFd {
        self.0
    }
}

impl Drop for EpollFd {
    fn drop(&mut self) {
        close_fd(self.0);
    }
}

/// An owned timer descriptor bound to the monotonic clock. Closed on drop.
#[derive(Debug)]
pub struct TimerFd(RawFd);

impl TimerFd {
    pub(crate) fn from_raw(fd: RawFd) -> TimerFd {
        TimerFd(fd)
    }

    pub fn as_raw(&self) -> RawFd {
        self.0
    }
}

impl Drop for TimerFd {
    fn drop(&mut self) {
        close_fd(self.0);
    }
}

/// An owned semaphore-mode event descriptor. Closed on drop.
///
/// Writes add to the counter; each read takes exactly one unit, which makes
/// the descriptor a cross-thread notification semaphore.
#[derive(Debug)]
pub struct EventFd(RawFd);

impl EventFd {
    pub(crate) fn from_raw(fd: RawFd) -> EventFd {
        EventFd(fd)
    }

    pub fn as_raw(&self) -> RawFd {
        self.0
    }
}

impl Drop for EventFd {
    fn drop(&mut self) {
        close_fd(self.0);
    }
}

/// A point on the monotonic clock (`CLOCK_MONOTONIC`), in nanoseconds since
/// an unspecified epoch. Unaffected by wall-clock changes, comparable, and
/// directly usable for absolute timer programming.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MonotonicTime(u64);

impl MonotonicTime {
    pub(crate) fn from_nanos(nanos: u64) -> MonotonicTime {
        MonotonicTime(nanos)
    }

    pub fn as_nanos(self) -> u64 {
        self.0
    }

    pub(crate) fn to_timespec(self) -> libc::timespec {
        let mut spec: libc::timespec = unsafe { std::mem::zeroed() };
        spec.tv_sec = (self.0 / NANOS_PER_SEC) as libc::time_t;
        spec.tv_nsec = (self.0 % NANOS_PER_SEC) as libc::c_long;
        spec
    }
}

impl Add<Duration> for MonotonicTime {
    type Output = MonotonicTime;

    fn add(self, rhs: Duration) -> MonotonicTime {
        MonotonicTime(self.0.saturating_add(rhs.as_nanos() as u64))
    }
}
