//! Thin wrappers for the Linux kernel primitives behind the [`evl`] runtime.
//!
//! Everything the per-thread services need from the kernel lives here:
//! readiness demultiplexing (`epoll`), a monotonic timer descriptor
//! (`timerfd`), a semaphore-counting notification descriptor (`eventfd`),
//! the monotonic clock, and the thread-name/`SCHED_FIFO` setters. The
//! wrappers add a minimal layer of zero-cost abstraction: owned descriptor
//! handles that close on drop, checked return values, and a public
//! readiness mask ([`FdEvents`]) that keeps kernel flag values from leaking
//! upward. Policy (handler maps, dispatch, thread affinity) belongs to the
//! `evl` crate; nothing here holds state beyond a descriptor.
//!
//! All functions report failure through [`Error`], which carries the
//! failing function's name and the OS error.
//!
//! [`evl`]: https://docs.rs/evl

#![doc(html_root_url = "https://docs.rs/evl-core/0.1.0")]

mod error;
mod functions;
mod types;

#[cfg(test)]
mod tests;

pub use self::error::{Error, Result};
pub use self::functions::{
    epoll_add, epoll_create, epoll_modify, epoll_remove, epoll_wait, eventfd_read_one,
    eventfd_semaphore, eventfd_write_one, monotonic_now, set_fifo_scheduling, set_thread_name,
    timerfd_arm_at, timerfd_create, timerfd_disarm, timerfd_read,
};
pub use self::types::{EpollEvent, EpollFd, EventFd, FdEvents, MonotonicTime, TimerFd};
