//! Shared fixtures for the integration tests.
//!
//! The unit tests in the core crate pin down the scheduling algebra against
//! mocks; the tests in this crate re-run the interesting interleavings over
//! the real host binding, with live threads, a live alarm timer and real
//! blocking waits.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use vm_port::port::{Port, SchedulerError, SchedulerHook};
use vm_port_host::{HostClock, HostKernel};

/// A fully wired port over the host binding.
pub type TestPort = Port<HostKernel, HostClock, EchoScheduler>;

/// Scheduler hook that mirrors what the runtime's scheduler does: count the
/// re-entry, then immediately deliver a wakeup, like a scheduler that found
/// runnable work.
#[derive(Clone, Default)]
pub struct EchoScheduler {
    inner: Arc<EchoInner>,
}

#[derive(Default)]
struct EchoInner {
    calls: AtomicUsize,
    port: OnceLock<Arc<TestPort>>,
}

impl EchoScheduler {
    /// How many times the scheduler has been re-entered.
    pub fn calls(&self) -> usize {
        self.inner.calls.load(Ordering::SeqCst)
    }
}

impl SchedulerHook for EchoScheduler {
    fn schedule(&self) -> Result<(), SchedulerError> {
        self.inner.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(port) = self.inner.port.get() {
            port.wakeup_vm().map_err(|_| SchedulerError)?;
        }
        Ok(())
    }
}

/// Builds a port over the host binding, with the scheduler hook feeding
/// wakeups back into it.
pub fn vm() -> (Arc<TestPort>, EchoScheduler) {
    let scheduler = EchoScheduler::default();
    let port = Arc::new(
        Port::initialize(HostKernel::new(), HostClock::new(), scheduler.clone())
            .expect("host binding failed to initialize"),
    );
    if scheduler.inner.port.set(Arc::clone(&port)).is_err() {
        panic!("fixture wired twice");
    }
    (port, scheduler)
}
