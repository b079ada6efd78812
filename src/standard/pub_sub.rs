//! The inter-thread-communication publish/subscribe demultiplexer.
//!
//! Holds the message numbers registered against the current thread's
//! mailbox. The mailbox descriptor is watched by the thread's
//! [`EventLoop`]; whenever a peer sends a message, the loop wakes this
//! service, which receives exactly one message and routes it to the handler
//! registered for its message number. The transport itself (addressing,
//! allocation, delivery) lives outside this crate; only the surface this
//! service consumes is modeled here.

use std::cell::RefCell;
use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::thread::{self, ThreadId};

use log::{debug, error, trace, warn};

use evl_core::FdEvents;

use crate::error::{Error, Result};
use crate::standard::event_loop::EventLoop;
use crate::standard::thread_local;

/// One message received from the thread's mailbox.
///
/// Ownership transfers into the handler; implementations release the
/// underlying transport buffer when the box is dropped.
pub trait MailboxMessage {
    /// The message number messages are dispatched by.
    fn msg_no(&self) -> u32;
}

/// The slice of the message transport this service consumes: a descriptor
/// that turns readable when messages are pending, and a non-blocking
/// receive.
pub trait Mailbox {
    /// The readable descriptor signalling pending messages.
    fn fd(&self) -> RawFd;
    /// Receives one pending message, or `None` when the mailbox is empty.
    /// Must not block.
    fn try_receive(&self) -> Option<Box<dyn MailboxMessage>>;
}

/// Handler invoked with ownership of the received message.
pub type MsgHandler = Box<dyn FnMut(Box<dyn MailboxMessage>)>;

/// Per-thread registry mapping message numbers to handlers.
pub struct ItcPubSub {
    owner: ThreadId,
    /// At most one mailbox is bound per thread.
    mailbox: RefCell<Option<Rc<dyn Mailbox>>>,
    handlers: RefCell<HashMap<u32, Rc<RefCell<MsgHandler>>>>,
}

impl Default for ItcPubSub {
    fn default() -> ItcPubSub {
        ItcPubSub {
            owner: thread::current().id(),
            mailbox: RefCell::new(None),
            handlers: RefCell::new(HashMap::new()),
        }
    }
}

impl ItcPubSub {
    /// Returns the calling thread's pub/sub registry, creating it on first
    /// access.
    pub fn thread_instance() -> Rc<ItcPubSub> {
        thread_local::instance::<ItcPubSub>()
    }

    /// Drops the calling thread's pub/sub registry instance.
    pub fn reset() {
        thread_local::reset::<ItcPubSub>();
    }

    /// Binds the thread's mailbox and registers its descriptor with the
    /// event loop.
    pub fn add_mailbox(&self, mailbox: Rc<dyn Mailbox>) -> Result<()> {
        self.check_owner("add_mailbox")?;

        if self.mailbox.borrow().is_some() {
            warn!("add_mailbox: a mailbox is already bound");
            return Err(Error::AlreadyExists);
        }

        let fd = mailbox.fd();
        let registered = EventLoop::thread_instance().add_fd_handler(
            fd,
            FdEvents::READABLE,
            move |_fd, _events| {
                if let Some(pub_sub) = thread_local::try_instance::<ItcPubSub>() {
                    pub_sub.handle_mailbox_event();
                }
            },
        );
        if let Err(err) = registered {
            error!("add_mailbox: failed to register mailbox fd {}: {}", fd, err);
            return Err(Error::Internal(format!(
                "could not register mailbox fd {}: {}",
                fd, err
            )));
        }

        *self.mailbox.borrow_mut() = Some(mailbox);
        debug!("add_mailbox: bound mailbox fd {}", fd);
        Ok(())
    }

    /// Registers `handler` for messages numbered `msg_no`.
    pub fn register_msg<F>(&self, msg_no: u32, handler: F) -> Result<()>
    where
        F: FnMut(Box<dyn MailboxMessage>) + 'static,
    {
        self.check_owner("register_msg")?;

        let mut handlers = self.handlers.borrow_mut();
        if handlers.contains_key(&msg_no) {
            warn!("register_msg: message number {} already exists", msg_no);
            return Err(Error::AlreadyExists);
        }
        handlers.insert(msg_no, Rc::new(RefCell::new(Box::new(handler) as MsgHandler)));

        trace!("register_msg: registered message number {}", msg_no);
        Ok(())
    }

    /// Removes the handler for `msg_no`.
    pub fn deregister_msg(&self, msg_no: u32) -> Result<()> {
        self.check_owner("deregister_msg")?;

        match self.handlers.borrow_mut().remove(&msg_no) {
            Some(_) => {
                trace!("deregister_msg: deregistered message number {}", msg_no);
                Ok(())
            }
            None => {
                warn!("deregister_msg: message number {} not found", msg_no);
                Err(Error::NotFound)
            }
        }
    }

    /// Mailbox readiness handler: one receive per event. Further pending
    /// messages surface on later loop iterations, which interleaves mailbox
    /// traffic with the thread's other descriptors.
    fn handle_mailbox_event(&self) {
        let mailbox = match self.mailbox.borrow().as_ref().map(Rc::clone) {
            Some(mailbox) => mailbox,
            None => return,
        };
        let msg = match mailbox.try_receive() {
            Some(msg) => msg,
            None => return,
        };

        let msg_no = msg.msg_no();
        let handler = self.handlers.borrow().get(&msg_no).cloned();
        match handler {
            Some(handler) => {
                trace!("dispatching message number {}", msg_no);
                (handler.borrow_mut())(msg);
            }
            // Dropping the message releases it back to the transport.
            None => debug!(
                "no handler registered for message number {}, discarding",
                msg_no
            ),
        }
    }

    fn check_owner(&self, op: &str) -> Result<()> {
        if thread::current().id() != self.owner {
            error!("{}: called from a thread that does not own this registry", op);
            return Err(Error::WrongThread);
        }
        Ok(())
    }
}

impl Drop for ItcPubSub {
    fn drop(&mut self) {
        if let Some(mailbox) = self.mailbox.get_mut().take() {
            if let Some(event_loop) = thread_local::try_instance::<EventLoop>() {
                let _ = event_loop.remove_fd_handler(mailbox.fd());
            }
        }
    }
}
