//! Thread-local singleton storage.
//!
//! Each service in this crate exists exactly once per participating thread;
//! this module is the storage backing that rule. Instances are keyed by
//! their type, constructed on first access, handed out as `Rc` clones, and
//! destroyed either by an explicit [`reset`] or when the thread exits
//! through any path (the `thread_local!` destructor takes care of the
//! latter). An instance is never visible to another thread.

use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

thread_local! {
    static SLOTS: RefCell<HashMap<TypeId, Rc<dyn Any>>> = RefCell::new(HashMap::new());
}

/// Returns the calling thread's instance of `T`, constructing it with
/// `T::default()` on first access.
///
/// The instance lives until [`reset`] or thread exit; outstanding `Rc`
/// clones keep the value itself alive past a `reset`.
pub fn instance<T: Default + 'static>() -> Rc<T> {
    SLOTS.with(|slots| {
        let mut slots = slots.borrow_mut();
        let slot = slots
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Rc::new(T::default()) as Rc<dyn Any>);
        slot.clone()
            .downcast::<T>()
            .ok()
            .expect("thread-local slot holds a value of the keyed type")
    })
}

/// Returns the calling thread's instance of `T` only if one already exists;
/// never constructs.
///
/// Unlike [`instance`] this is also safe to call while the thread's storage
/// is being torn down (e.g. from another slot's destructor), in which case
/// it returns `None`.
pub fn try_instance<T: 'static>() -> Option<Rc<T>> {
    SLOTS
        .try_with(|slots| {
            let slots = slots.try_borrow().ok()?;
            let slot = slots.get(&TypeId::of::<T>())?;
            slot.clone().downcast::<T>().ok()
        })
        .ok()
        .flatten()
}

/// Drops the calling thread's instance of `T`, if any. The next
/// [`instance`] call constructs a fresh one.
pub fn reset<T: 'static>() {
    let _ = SLOTS.try_with(|slots| {
        if let Ok(mut slots) = slots.try_borrow_mut() {
            slots.remove(&TypeId::of::<T>());
        }
    });
}
