//! The two-phase startup orchestrator.
//!
//! Modules register an allocator; [`StartupRegistry::start_all_modules`]
//! instantiates every module, lets all of them *prepare* concurrently
//! against a shared timeout, and only when every one of them reported
//! success runs the *start* phase in registration order.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use log::{error, info, warn};

use crate::standard::thread_local;

/// One startup module.
pub trait StartupModule {
    fn module_name(&self) -> String;

    /// Begins the module's preparation and returns without waiting for it.
    ///
    /// The implementation must arrange for `responder.ready(..)` to be
    /// called exactly once, from any thread; a module that never reports is
    /// classified as timed out.
    fn prepare(&self, responder: Arc<PreparationResponder>);

    /// Second phase; invoked only after every registered module prepared
    /// successfully within the deadline.
    fn start(&self);
}

/// Produces a fresh module instance when startup begins.
pub type ModuleAllocator = Box<dyn Fn() -> Rc<dyn StartupModule>>;

/// Outcome of one module's preparation phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PreparationOutcome {
    ReadySuccess,
    ReadyFailure,
    TimedOut,
}

/// One-shot readiness signal handed to a preparing module.
///
/// Carries an absolute monotonic deadline; the orchestrator waits on each
/// responder independently. Only the first `ready` call counts.
pub struct PreparationResponder {
    module_name: String,
    deadline: Instant,
    result: Mutex<Option<bool>>,
    fulfilled: Condvar,
}

impl PreparationResponder {
    fn new(module_name: String, deadline: Instant) -> PreparationResponder {
        PreparationResponder {
            module_name,
            deadline,
            result: Mutex::new(None),
            fulfilled: Condvar::new(),
        }
    }

    /// Reports the preparation result. Later calls are ignored.
    pub fn ready(&self, success: bool) {
        let mut result = match self.result.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if result.is_none() {
            *result = Some(success);
            self.fulfilled.notify_all();
        }
    }

    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    /// Blocks until the result arrives or the deadline passes.
    fn wait(&self) -> PreparationOutcome {
        let mut result = match self.result.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        loop {
            if let Some(success) = *result {
                return if success {
                    PreparationOutcome::ReadySuccess
                } else {
                    PreparationOutcome::ReadyFailure
                };
            }
            let now = Instant::now();
            if now >= self.deadline {
                return PreparationOutcome::TimedOut;
            }
            let (guard, _) = match self.fulfilled.wait_timeout(result, self.deadline - now) {
                Ok(woken) => woken,
                Err(poisoned) => poisoned.into_inner(),
            };
            result = guard;
        }
    }
}

/// The startup registry of the orchestrating thread.
pub struct StartupRegistry {
    allocators: RefCell<Vec<ModuleAllocator>>,
    modules: RefCell<Vec<Rc<dyn StartupModule>>>,
}

impl Default for StartupRegistry {
    fn default() -> StartupRegistry {
        StartupRegistry {
            allocators: RefCell::new(Vec::new()),
            modules: RefCell::new(Vec::new()),
        }
    }
}

impl StartupRegistry {
    /// Returns the calling thread's startup registry, creating it on first
    /// access.
    pub fn thread_instance() -> Rc<StartupRegistry> {
        thread_local::instance::<StartupRegistry>()
    }

    /// Drops the calling thread's startup registry instance.
    pub fn reset() {
        info!("resetting the startup registry");
        thread_local::reset::<StartupRegistry>();
    }

    /// Publishes a module allocator. Modules are prepared and started in
    /// registration order.
    pub fn register_module_allocator(&self, allocator: ModuleAllocator) {
        self.allocators.borrow_mut().push(allocator);
    }

    /// Runs both startup phases.
    ///
    /// Every module's `prepare` is kicked off without waiting, with an
    /// absolute deadline of `startup_timeout` from its launch; the
    /// responders are then awaited in registration order and each module is
    /// classified as ready-success, ready-failure or timed-out. The start
    /// phase runs, and `true` is returned, only when every module reported
    /// success in time.
    pub fn start_all_modules(&self, startup_timeout: Duration) -> bool {
        let allocator_count = self.allocators.borrow().len();
        let mut responders = Vec::with_capacity(allocator_count);

        for index in 0..allocator_count {
            let module = {
                let allocators = self.allocators.borrow();
                allocators[index]()
            };
            let responder = Arc::new(PreparationResponder::new(
                module.module_name(),
                Instant::now() + startup_timeout,
            ));

            info!("preparing initialization for '{}'", responder.module_name());
            module.prepare(responder.clone());

            self.modules.borrow_mut().push(module);
            responders.push(responder);
        }

        if responders.is_empty() {
            warn!("start_all_modules: no modules registered");
            return false;
        }

        let mut all_ready = true;
        for responder in &responders {
            match responder.wait() {
                PreparationOutcome::ReadySuccess => {
                    info!(
                        "prepared initialization for '{}' successfully",
                        responder.module_name()
                    );
                }
                PreparationOutcome::ReadyFailure => {
                    error!(
                        "failed to prepare initialization for '{}'",
                        responder.module_name()
                    );
                    all_ready = false;
                }
                PreparationOutcome::TimedOut => {
                    error!(
                        "timed out preparing initialization for '{}' (timeout = {:?})",
                        responder.module_name(),
                        startup_timeout
                    );
                    all_ready = false;
                }
            }
        }

        if !all_ready {
            return false;
        }

        for module in self.modules.borrow().iter() {
            info!("starting up '{}'", module.module_name());
            module.start();
        }
        true
    }
}

/// Registers a module allocator on construction.
///
/// Rust has no code that runs before `main`, so the static-registrar idiom
/// becomes an explicit guard value a module constructs during setup of the
/// orchestrating thread.
pub struct StartupRegistrar;

impl StartupRegistrar {
    pub fn new(allocator: ModuleAllocator) -> StartupRegistrar {
        StartupRegistry::thread_instance().register_module_allocator(allocator);
        StartupRegistrar
    }
}
