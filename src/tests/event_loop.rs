//! Event loop behavior: registration codes, scheduled-event priority,
//! mid-batch removal and the owner-thread boundary.

use std::cell::RefCell;
use std::rc::Rc;
use std::thread;

use evl_core::FdEvents;

use crate::error::Error;
use crate::standard::EventLoop;
use crate::tests::ForceSend;

#[test]
fn add_update_remove_return_codes() {
    let event_loop = EventLoop::thread_instance();
    let event_fd = evl_core::eventfd_semaphore().unwrap();
    let raw = event_fd.as_raw();

    assert!(event_loop
        .add_fd_handler(raw, FdEvents::READABLE, |_, _| {})
        .is_ok());
    assert!(matches!(
        event_loop.add_fd_handler(raw, FdEvents::READABLE, |_, _| {}),
        Err(Error::AlreadyExists)
    ));

    // An empty mask is rejected before anything reaches the kernel.
    assert!(matches!(
        event_loop.add_fd_handler(raw + 1, FdEvents::empty(), |_, _| {}),
        Err(Error::InvalidArg)
    ));

    assert!(matches!(
        event_loop.update_fd_events(9999, FdEvents::READABLE),
        Err(Error::NotFound)
    ));
    assert!(event_loop
        .update_fd_events(raw, FdEvents::READABLE | FdEvents::WRITABLE)
        .is_ok());
    assert!(matches!(
        event_loop.update_fd_events(raw, FdEvents::empty()),
        Err(Error::InvalidArg)
    ));

    assert!(event_loop.remove_fd_handler(raw).is_ok());
    assert!(matches!(
        event_loop.remove_fd_handler(raw),
        Err(Error::NotFound)
    ));
}

#[test]
fn scheduled_events_run_before_the_next_fd_callback() {
    let event_loop = EventLoop::thread_instance();
    let order: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));

    let fd_a = Rc::new(evl_core::eventfd_semaphore().unwrap());
    let fd_b = Rc::new(evl_core::eventfd_semaphore().unwrap());

    {
        let order = order.clone();
        let my_fd = fd_a.clone();
        let peer_fd = fd_b.clone();
        event_loop
            .add_fd_handler(fd_a.as_raw(), FdEvents::READABLE, move |_, _| {
                evl_core::eventfd_read_one(&my_fd).unwrap();
                order.borrow_mut().push("fd_a");

                let event_loop = EventLoop::thread_instance();
                {
                    let order = order.clone();
                    event_loop
                        .schedule_event(move || order.borrow_mut().push("first"))
                        .unwrap();
                }
                {
                    let order = order.clone();
                    event_loop
                        .schedule_event(move || order.borrow_mut().push("second"))
                        .unwrap();
                }

                // Make the peer descriptor ready; its callback must still
                // run after the scheduled events above.
                evl_core::eventfd_write_one(&peer_fd).unwrap();
            })
            .unwrap();
    }
    {
        let order = order.clone();
        let my_fd = fd_b.clone();
        event_loop
            .add_fd_handler(fd_b.as_raw(), FdEvents::READABLE, move |_, _| {
                evl_core::eventfd_read_one(&my_fd).unwrap();
                order.borrow_mut().push("fd_b");
                EventLoop::thread_instance().stop().unwrap();
            })
            .unwrap();
    }

    evl_core::eventfd_write_one(&fd_a).unwrap();
    event_loop.run().unwrap();

    assert_eq!(*order.borrow(), ["fd_a", "first", "second", "fd_b"]);
}

#[test]
fn a_handler_removed_mid_batch_does_not_fire() {
    let event_loop = EventLoop::thread_instance();
    let fired: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));

    let fd_a = Rc::new(evl_core::eventfd_semaphore().unwrap());
    let fd_b = Rc::new(evl_core::eventfd_semaphore().unwrap());
    let raw_a = fd_a.as_raw();
    let raw_b = fd_b.as_raw();

    // Both descriptors are ready when the batch is collected; whichever
    // callback runs first removes the other, so exactly one may fire.
    {
        let fired = fired.clone();
        let my_fd = fd_a.clone();
        event_loop
            .add_fd_handler(raw_a, FdEvents::READABLE, move |_, _| {
                evl_core::eventfd_read_one(&my_fd).unwrap();
                fired.borrow_mut().push("a");
                let event_loop = EventLoop::thread_instance();
                event_loop.remove_fd_handler(raw_b).unwrap();
                event_loop.stop().unwrap();
            })
            .unwrap();
    }
    {
        let fired = fired.clone();
        let my_fd = fd_b.clone();
        event_loop
            .add_fd_handler(raw_b, FdEvents::READABLE, move |_, _| {
                evl_core::eventfd_read_one(&my_fd).unwrap();
                fired.borrow_mut().push("b");
                let event_loop = EventLoop::thread_instance();
                event_loop.remove_fd_handler(raw_a).unwrap();
                event_loop.stop().unwrap();
            })
            .unwrap();
    }

    evl_core::eventfd_write_one(&fd_a).unwrap();
    evl_core::eventfd_write_one(&fd_b).unwrap();
    event_loop.run().unwrap();

    assert_eq!(fired.borrow().len(), 1);
}

#[test]
fn operations_are_rejected_off_the_owner_thread() {
    let event_loop = EventLoop::thread_instance();
    let event_fd = evl_core::eventfd_semaphore().unwrap();
    let raw = event_fd.as_raw();

    let smuggled = ForceSend(event_loop.clone());
    thread::spawn(move || {
        let event_loop = smuggled.0;
        assert!(matches!(
            event_loop.add_fd_handler(raw, FdEvents::READABLE, |_, _| {}),
            Err(Error::WrongThread)
        ));
        assert!(matches!(
            event_loop.update_fd_events(raw, FdEvents::READABLE),
            Err(Error::WrongThread)
        ));
        assert!(matches!(
            event_loop.remove_fd_handler(raw),
            Err(Error::WrongThread)
        ));
        assert!(matches!(event_loop.schedule_event(|| {}), Err(Error::WrongThread)));
        assert!(matches!(event_loop.stop(), Err(Error::WrongThread)));
        assert!(matches!(event_loop.run(), Err(Error::WrongThread)));
    })
    .join()
    .unwrap();

    // The rejected add left nothing behind: the fd is still free.
    assert!(event_loop
        .add_fd_handler(raw, FdEvents::READABLE, |_, _| {})
        .is_ok());
    event_loop.remove_fd_handler(raw).unwrap();
}
