//! Thin and safe wrappers for the kernel primitives the runtime sits on.
//!
//! One function per system call (or per tight cluster of calls), with a
//! minimal layer of zero-cost abstraction: return values are checked and
//! turned into [`Error`](crate::Error), descriptor ownership is expressed
//! through the handle types in [`types`](crate::types), and kernel flag
//! values stay inside this crate. Refer to the corresponding man pages
//! (`epoll(7)`, `timerfd_create(2)`, `eventfd(2)`) for the underlying
//! semantics; the parameter mapping is close to 1:1.

use std::ffi::CString;
use std::io;
use std::mem;
use std::os::unix::io::RawFd;

use log::warn;

use crate::error::{Error, Result};
use crate::types::{EpollEvent, EpollFd, EventFd, FdEvents, MonotonicTime, TimerFd};

/// Checks a `-1`-on-error return value, capturing `errno` on failure.
fn check(ret: libc::c_int, fn_name: &'static str) -> Result<libc::c_int> {
    if ret == -1 {
        Err(Error::last_os(fn_name))
    } else {
        Ok(ret)
    }
}

/// Closes a descriptor, logging rather than failing; used by the handle
/// types' `Drop` implementations.
pub(crate) fn close_fd(fd: RawFd) {
    if unsafe { libc::close(fd) } == -1 {
        warn!(
            "close({}) failed: {}",
            fd,
            io::Error::last_os_error()
        );
    }
}

//============================================================================
//================================= epoll ====================================
//============================================================================

/// Creates an epoll instance. `EPOLL_CLOEXEC` keeps the descriptor from
/// leaking across `exec` in multithreaded processes.
pub fn epoll_create() -> Result<EpollFd> {
    let fd = check(
        unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) },
        "epoll_create1",
    )?;
    Ok(EpollFd::from_raw(fd))
}

/// Adds `fd` to the interest list with the given readiness mask; `token` is
/// handed back verbatim in every event reported for the descriptor.
pub fn epoll_add(epoll: &EpollFd, fd: RawFd, events: FdEvents, token: u64) -> Result<()> {
    let mut event = EpollEvent::new(events, token);
    check(
        unsafe { libc::epoll_ctl(epoll.as_raw(), libc::EPOLL_CTL_ADD, fd, &mut event.0) },
        "epoll_ctl",
    )?;
    Ok(())
}

/// Replaces the readiness mask of an already-registered descriptor.
pub fn epoll_modify(epoll: &EpollFd, fd: RawFd, events: FdEvents, token: u64) -> Result<()> {
    let mut event = EpollEvent::new(events, token);
    check(
        unsafe { libc::epoll_ctl(epoll.as_raw(), libc::EPOLL_CTL_MOD, fd, &mut event.0) },
        "epoll_ctl",
    )?;
    Ok(())
}

/// Takes `fd` off the interest list.
pub fn epoll_remove(epoll: &EpollFd, fd: RawFd) -> Result<()> {
    check(
        unsafe {
            libc::epoll_ctl(
                epoll.as_raw(),
                libc::EPOLL_CTL_DEL,
                fd,
                std::ptr::null_mut(),
            )
        },
        "epoll_ctl",
    )?;
    Ok(())
}

/// Waits for readiness, filling `events` with up to `events.len()` entries
/// and returning how many were delivered. A negative `timeout_ms` blocks
/// indefinitely. A wait interrupted by a signal is reported as an empty
/// batch rather than an error.
pub fn epoll_wait(epoll: &EpollFd, events: &mut [EpollEvent], timeout_ms: i32) -> Result<usize> {
    let count = unsafe {
        libc::epoll_wait(
            epoll.as_raw(),
            events.as_mut_ptr() as *mut libc::epoll_event,
            events.len() as libc::c_int,
            timeout_ms,
        )
    };
    if count == -1 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EINTR) {
            return Ok(0);
        }
        return Err(Error::Syscall {
            fn_name: "epoll_wait",
            source: err,
        });
    }
    Ok(count as usize)
}

//============================================================================
//================================ timerfd ===================================
//============================================================================

/// Creates a non-blocking timer descriptor on the monotonic clock.
pub fn timerfd_create() -> Result<TimerFd> {
    let fd = check(
        unsafe { libc::timerfd_create(libc::CLOCK_MONOTONIC, libc::TFD_CLOEXEC | libc::TFD_NONBLOCK) },
        "timerfd_create",
    )?;
    Ok(TimerFd::from_raw(fd))
}

/// Programs the timer to fire once at the absolute `deadline`. A deadline in
/// the past fires immediately.
pub fn timerfd_arm_at(timer: &TimerFd, deadline: MonotonicTime) -> Result<()> {
    let mut spec: libc::itimerspec = unsafe { mem::zeroed() };
    spec.it_value = deadline.to_timespec();
    check(
        unsafe {
            libc::timerfd_settime(
                timer.as_raw(),
                libc::TFD_TIMER_ABSTIME,
                &spec,
                std::ptr::null_mut(),
            )
        },
        "timerfd_settime",
    )?;
    Ok(())
}

/// Disarms the timer and clears any pending expiration count.
pub fn timerfd_disarm(timer: &TimerFd) -> Result<()> {
    let spec: libc::itimerspec = unsafe { mem::zeroed() };
    check(
        unsafe {
            libc::timerfd_settime(
                timer.as_raw(),
                libc::TFD_TIMER_ABSTIME,
                &spec,
                std::ptr::null_mut(),
            )
        },
        "timerfd_settime",
    )?;
    Ok(())
}

/// Reads the expiration counter. `Ok(None)` means the read would block: no
/// expiration is pending, e.g. because the timer was reprogrammed after the
/// readiness event was already queued.
pub fn timerfd_read(timer: &TimerFd) -> Result<Option<u64>> {
    let mut count: u64 = 0;
    let ret = unsafe {
        libc::read(
            timer.as_raw(),
            &mut count as *mut u64 as *mut libc::c_void,
            mem::size_of::<u64>(),
        )
    };
    if ret == -1 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EAGAIN) {
            return Ok(None);
        }
        return Err(Error::Syscall {
            fn_name: "read",
            source: err,
        });
    }
    Ok(Some(count))
}

//============================================================================
//================================ eventfd ===================================
//============================================================================

/// Creates a semaphore-mode event descriptor with a zero counter.
pub fn eventfd_semaphore() -> Result<EventFd> {
    let fd = check(
        unsafe { libc::eventfd(0, libc::EFD_CLOEXEC | libc::EFD_SEMAPHORE) },
        "eventfd",
    )?;
    Ok(EventFd::from_raw(fd))
}

/// Adds one unit to the counter. Callable from any thread.
pub fn eventfd_write_one(event: &EventFd) -> Result<()> {
    let one: u64 = 1;
    let ret = unsafe {
        libc::write(
            event.as_raw(),
            &one as *const u64 as *const libc::c_void,
            mem::size_of::<u64>(),
        )
    };
    if ret == -1 {
        return Err(Error::last_os("write"));
    }
    Ok(())
}

/// Takes one unit from the counter; blocks while the counter is zero, so
/// only call this once the descriptor has reported readable.
pub fn eventfd_read_one(event: &EventFd) -> Result<u64> {
    let mut count: u64 = 0;
    let ret = unsafe {
        libc::read(
            event.as_raw(),
            &mut count as *mut u64 as *mut libc::c_void,
            mem::size_of::<u64>(),
        )
    };
    if ret == -1 {
        return Err(Error::last_os("read"));
    }
    Ok(count)
}

//============================================================================
//=========================== clock and thread ===============================
//============================================================================

/// The current monotonic time.
pub fn monotonic_now() -> Result<MonotonicTime> {
    let mut spec: libc::timespec = unsafe { mem::zeroed() };
    check(
        unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut spec) },
        "clock_gettime",
    )?;
    Ok(MonotonicTime::from_nanos(
        spec.tv_sec as u64 * 1_000_000_000 + spec.tv_nsec as u64,
    ))
}

/// Names the calling thread. The kernel caps names at 15 bytes plus the
/// terminator; longer names are truncated.
pub fn set_thread_name(name: &str) -> Result<()> {
    let mut bytes = name.as_bytes().to_vec();
    bytes.truncate(15);
    let name = CString::new(bytes)
        .map_err(|_| Error::InvalidInput(format!("thread name {:?} contains a nul byte", name)))?;
    check(
        unsafe { libc::prctl(libc::PR_SET_NAME, name.as_ptr() as libc::c_ulong, 0, 0, 0) },
        "prctl",
    )?;
    Ok(())
}

/// Switches the calling thread to `SCHED_FIFO` at the policy's minimum
/// priority. Typically requires `CAP_SYS_NICE`.
pub fn set_fifo_scheduling() -> Result<()> {
    unsafe {
        let mut policy: libc::c_int = 0;
        let mut param: libc::sched_param = mem::zeroed();
        let ret = libc::pthread_getschedparam(libc::pthread_self(), &mut policy, &mut param);
        if ret != 0 {
            return Err(Error::Syscall {
                fn_name: "pthread_getschedparam",
                source: io::Error::from_raw_os_error(ret),
            });
        }
        // The inherited priority is 0, which SCHED_FIFO rejects.
        param.sched_priority = libc::sched_get_priority_min(libc::SCHED_FIFO);
        let ret = libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &param);
        if ret != 0 {
            return Err(Error::Syscall {
                fn_name: "pthread_setschedparam",
                source: io::Error::from_raw_os_error(ret),
            });
        }
    }
    Ok(())
}
