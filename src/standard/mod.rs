//! `evl` standard services.

mod active_object;
mod event_loop;
mod pub_sub;
mod startup;
pub mod thread_local;
mod timer;

pub use self::active_object::{ActiveObject, SchedulingPolicy};
pub use self::event_loop::{EventLoop, FdCallback, ScheduledEvent};
pub use self::pub_sub::{ItcPubSub, Mailbox, MailboxMessage, MsgHandler};
pub use self::startup::{
    ModuleAllocator, PreparationResponder, StartupModule, StartupRegistrar, StartupRegistry,
};
pub use self::timer::{TimerManager, TimerSubscriber};
