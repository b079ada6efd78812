//! Timer manager behavior: ordering, periodical re-arming, cancellation
//! (including of already-due timers) and the duplicate-identity rules.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};

use crate::error::Error;
use crate::standard::{EventLoop, TimerManager, TimerSubscriber};
use crate::tests::ForceSend;

/// Records expirations; stops the loop after `stop_after` of them.
struct RecordingSubscriber {
    fired: RefCell<Vec<u32>>,
    stop_after: usize,
}

impl RecordingSubscriber {
    fn new(stop_after: usize) -> Rc<RecordingSubscriber> {
        Rc::new(RecordingSubscriber {
            fired: RefCell::new(Vec::new()),
            stop_after,
        })
    }
}

impl TimerSubscriber for RecordingSubscriber {
    fn handle_timer_expired(&self, user_id: u32) {
        self.fired.borrow_mut().push(user_id);
        if self.fired.borrow().len() == self.stop_after {
            EventLoop::thread_instance().stop().unwrap();
        }
    }
}

/// Counts expirations without stopping anything.
struct CountingSubscriber {
    fired: Cell<u32>,
}

impl TimerSubscriber for CountingSubscriber {
    fn handle_timer_expired(&self, _user_id: u32) {
        self.fired.set(self.fired.get() + 1);
    }
}

/// Stops the loop on its first expiration.
struct StopSubscriber;

impl TimerSubscriber for StopSubscriber {
    fn handle_timer_expired(&self, _user_id: u32) {
        EventLoop::thread_instance().stop().unwrap();
    }
}

#[test]
fn timers_with_the_same_timeout_fire_in_start_order() {
    let timers = TimerManager::thread_instance();
    let subscriber = RecordingSubscriber::new(2);

    timers
        .start_timer(Duration::from_millis(30), subscriber.clone(), 1)
        .unwrap();
    timers
        .start_timer(Duration::from_millis(30), subscriber.clone(), 2)
        .unwrap();

    EventLoop::thread_instance().run().unwrap();

    assert_eq!(*subscriber.fired.borrow(), [1, 2]);
}

#[test]
fn duplicate_identity_and_cancel_return_codes() {
    let timers = TimerManager::thread_instance();
    let subscriber = RecordingSubscriber::new(usize::MAX);

    timers
        .start_timer(Duration::from_secs(60), subscriber.clone(), 5)
        .unwrap();
    assert!(matches!(
        timers.start_timer(Duration::from_secs(60), subscriber.clone(), 5),
        Err(Error::AlreadyExists)
    ));
    assert!(matches!(
        timers.start_periodical_timer(Duration::from_secs(60), subscriber.clone(), 5),
        Err(Error::AlreadyExists)
    ));

    // A different user id on the same subscriber is a distinct timer.
    timers
        .start_timer(Duration::from_secs(60), subscriber.clone(), 6)
        .unwrap();

    assert!(timers.cancel_timer(subscriber.as_ref(), 5).is_ok());
    assert!(matches!(
        timers.cancel_timer(subscriber.as_ref(), 5),
        Err(Error::NotFound)
    ));
    assert!(timers.cancel_timer(subscriber.as_ref(), 6).is_ok());
}

#[test]
fn periodical_timer_fires_repeatedly() {
    let timers = TimerManager::thread_instance();
    let counter = Rc::new(CountingSubscriber { fired: Cell::new(0) });
    let stopper = Rc::new(StopSubscriber);

    let started = Instant::now();
    timers
        .start_periodical_timer(Duration::from_millis(50), counter.clone(), 9)
        .unwrap();
    timers
        .start_timer(Duration::from_millis(175), stopper, 0)
        .unwrap();

    EventLoop::thread_instance().run().unwrap();

    // Ticks at 50, 100 and 150 ms; the loop stops at 175 ms.
    assert_eq!(counter.fired.get(), 3);
    assert!(started.elapsed() >= Duration::from_millis(150));
}

#[test]
fn cancelled_timer_never_fires() {
    let timers = TimerManager::thread_instance();
    let counter = Rc::new(CountingSubscriber { fired: Cell::new(0) });
    let stopper = Rc::new(StopSubscriber);

    timers
        .start_timer(Duration::from_millis(20), counter.clone(), 3)
        .unwrap();
    timers.cancel_timer(counter.as_ref(), 3).unwrap();
    timers
        .start_timer(Duration::from_millis(60), stopper, 0)
        .unwrap();

    EventLoop::thread_instance().run().unwrap();

    assert_eq!(counter.fired.get(), 0);
}

/// On its first expiration, cancels the peer timer that is due at the same
/// deadline and stops the loop.
struct CancellingSubscriber {
    fired: RefCell<Vec<u32>>,
}

impl TimerSubscriber for CancellingSubscriber {
    fn handle_timer_expired(&self, user_id: u32) {
        self.fired.borrow_mut().push(user_id);
        if user_id == 1 {
            let timers = TimerManager::thread_instance();
            timers.cancel_timer(self, 2).unwrap();
            EventLoop::thread_instance().stop().unwrap();
        }
    }
}

#[test]
fn cancelling_an_already_due_timer_prevents_its_delivery() {
    let timers = TimerManager::thread_instance();
    let subscriber = Rc::new(CancellingSubscriber {
        fired: RefCell::new(Vec::new()),
    });

    timers
        .start_timer(Duration::from_millis(30), subscriber.clone(), 1)
        .unwrap();
    timers
        .start_timer(Duration::from_millis(30), subscriber.clone(), 2)
        .unwrap();

    EventLoop::thread_instance().run().unwrap();

    assert_eq!(*subscriber.fired.borrow(), [1]);
}

#[test]
fn restarting_after_cancel_is_allowed() {
    let timers = TimerManager::thread_instance();
    let subscriber = RecordingSubscriber::new(1);

    timers
        .start_timer(Duration::from_millis(20), subscriber.clone(), 4)
        .unwrap();
    timers.cancel_timer(subscriber.as_ref(), 4).unwrap();
    timers
        .start_timer(Duration::from_millis(20), subscriber.clone(), 4)
        .unwrap();

    EventLoop::thread_instance().run().unwrap();

    assert_eq!(*subscriber.fired.borrow(), [4]);
}

#[test]
fn operations_are_rejected_off_the_owner_thread() {
    let timers = TimerManager::thread_instance();
    let subscriber = RecordingSubscriber::new(usize::MAX);

    let smuggled = ForceSend((timers.clone(), subscriber.clone()));
    thread::spawn(move || {
        let (timers, subscriber) = smuggled.0;
        assert!(matches!(
            timers.start_timer(Duration::from_secs(1), subscriber.clone(), 1),
            Err(Error::WrongThread)
        ));
        assert!(matches!(
            timers.start_periodical_timer(Duration::from_secs(1), subscriber.clone(), 1),
            Err(Error::WrongThread)
        ));
        assert!(matches!(
            timers.cancel_timer(subscriber.as_ref(), 1),
            Err(Error::WrongThread)
        ));
    })
    .join()
    .unwrap();
}
