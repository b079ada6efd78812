//! Sanity tests for the primitive wrappers. The behavior of the services
//! built on top of them is covered in the `evl` crate.

use std::thread;
use std::time::Duration;

use crate::types::FdEvents;

#[test]
fn readiness_mask_conversion_drops_kernel_only_bits() {
    assert_eq!(FdEvents::READABLE.to_epoll(), libc::EPOLLIN as u32);
    assert_eq!(FdEvents::WRITABLE.to_epoll(), libc::EPOLLOUT as u32);
    assert_eq!(
        (FdEvents::READABLE | FdEvents::WRITABLE).to_epoll(),
        libc::EPOLLIN as u32 | libc::EPOLLOUT as u32
    );

    assert_eq!(
        FdEvents::from_epoll(libc::EPOLLIN as u32 | libc::EPOLLERR as u32),
        FdEvents::READABLE
    );
    assert!(FdEvents::from_epoll(libc::EPOLLHUP as u32).is_empty());
}

#[test]
fn semaphore_eventfd_hands_out_single_units() {
    let event_fd = crate::eventfd_semaphore().unwrap();
    for _ in 0..3 {
        crate::eventfd_write_one(&event_fd).unwrap();
    }
    for _ in 0..3 {
        assert_eq!(crate::eventfd_read_one(&event_fd).unwrap(), 1);
    }
}

#[test]
fn timerfd_delivers_after_the_deadline() {
    let timer_fd = crate::timerfd_create().unwrap();
    let deadline = crate::monotonic_now().unwrap() + Duration::from_millis(50);
    crate::timerfd_arm_at(&timer_fd, deadline).unwrap();

    // Not due yet: the non-blocking read reports an empty counter.
    assert_eq!(crate::timerfd_read(&timer_fd).unwrap(), None);

    thread::sleep(Duration::from_millis(80));
    assert_eq!(crate::timerfd_read(&timer_fd).unwrap(), Some(1));
}

#[test]
fn disarming_clears_a_pending_expiration() {
    let timer_fd = crate::timerfd_create().unwrap();
    let deadline = crate::monotonic_now().unwrap() + Duration::from_millis(10);
    crate::timerfd_arm_at(&timer_fd, deadline).unwrap();
    thread::sleep(Duration::from_millis(30));

    crate::timerfd_disarm(&timer_fd).unwrap();
    assert_eq!(crate::timerfd_read(&timer_fd).unwrap(), None);
}

#[test]
fn epoll_reports_readable_descriptors_with_their_token() {
    let epoll = crate::epoll_create().unwrap();
    let event_fd = crate::eventfd_semaphore().unwrap();
    crate::epoll_add(&epoll, event_fd.as_raw(), FdEvents::READABLE, 42).unwrap();

    crate::eventfd_write_one(&event_fd).unwrap();

    let mut events = [crate::EpollEvent::zeroed(); 4];
    let count = crate::epoll_wait(&epoll, &mut events, 1000).unwrap();
    assert_eq!(count, 1);
    assert_eq!(events[0].token(), 42);
    assert!(events[0].ready_events().contains(FdEvents::READABLE));

    crate::epoll_remove(&epoll, event_fd.as_raw()).unwrap();
}

#[test]
fn monotonic_time_orders_and_advances() {
    let earlier = crate::monotonic_now().unwrap();
    let later = crate::monotonic_now().unwrap() + Duration::from_millis(1);
    assert!(earlier < later);
    assert!(later.as_nanos() - earlier.as_nanos() >= 1_000_000);
}
