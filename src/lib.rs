//! Per-thread event loops, timers, publish/subscribe dispatch and active
//! objects for Linux.
//!
//! `evl` is a runtime for building reactive, event-driven components in a
//! multi-threaded process. Each participating thread owns a private set of
//! cooperating services, fetched through their `thread_instance()`
//! constructors; operating on an instance from any other thread is rejected
//! at runtime with [`Error::WrongThread`]:
//!
//! * [`EventLoop`]: waits on a set of descriptors, dispatches readiness
//!   callbacks and drains a queue of scheduled (deferred) callbacks.
//! * [`TimerManager`]: multiplexes any number of one-shot and periodical
//!   timers over a single kernel timer descriptor in the loop.
//! * [`ItcPubSub`]: watches the thread's mailbox descriptor and routes
//!   incoming messages to handlers by message number.
//! * [`ActiveObject`]: a worker thread running its own loop, executing
//!   work items submitted from any thread in submission order.
//! * [`StartupRegistry`]: brings a set of registered modules online in two
//!   phases: concurrent, deadline-bounded preparation, then sequential
//!   start.
//!
//! Parallelism comes solely from running many such loops, one per thread;
//! there is no internal thread pool, and a loop's callbacks all run on its
//! owner thread. Callbacks are expected not to block: the only blocking
//! point of a healthy loop is the kernel wait itself.
//!
//! ## Foundations
//!
//! The kernel primitives (epoll, timerfd, eventfd, monotonic clock) are
//! wrapped by the lower-level [`evl-core`] crate, re-exported here as
//! [`core`](crate::core).
//!
//! Errors use the closed code family in [`Error`]; logging goes through the
//! [`log`] facade and no logger is installed by the library.
//!
//! [`evl-core`]: https://docs.rs/evl-core

#![doc(html_root_url = "https://docs.rs/evl/0.1.0")]

mod error;
mod standard;

#[cfg(test)]
mod tests;

pub use evl_core as core;

pub use crate::error::{Error, Result};
pub use crate::standard::thread_local;
pub use crate::standard::{
    ActiveObject, EventLoop, FdCallback, ItcPubSub, Mailbox, MailboxMessage, ModuleAllocator,
    MsgHandler, PreparationResponder, ScheduledEvent, SchedulingPolicy, StartupModule,
    StartupRegistrar, StartupRegistry, TimerManager, TimerSubscriber,
};

#[doc(no_inline)]
pub use evl_core::{FdEvents, MonotonicTime};
