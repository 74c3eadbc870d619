//! Minimal example of driving a runtime loop through the scheduling port.
//!
//! A real managed runtime alternates between executing bytecode and
//! sleeping until its next deadline. This demo fakes the bytecode part with
//! a print and a fixed 50 ms next-deadline, and lets the port do the real
//! work:
//!
//! 1. How to wire a port over the host binding, with the scheduler hook
//!    feeding wakeups back into it.
//! 2. How the schedule-request / idle / alarm-expiry / wakeup cycle runs.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use vm_port::port::{Port, SchedulerError, SchedulerHook};
use vm_port_host::{HostClock, HostKernel};

type DemoPort = Port<HostKernel, HostClock, Scheduler>;

/// Stand-in for the runtime's scheduler entry point: every re-entry finds
/// "runnable work" and wakes the runtime task.
#[derive(Clone, Default)]
struct Scheduler {
    inner: Arc<SchedulerInner>,
}

#[derive(Default)]
struct SchedulerInner {
    wakeups: AtomicUsize,
    port: OnceLock<Arc<DemoPort>>,
}

impl SchedulerHook for Scheduler {
    fn schedule(&self) -> Result<(), SchedulerError> {
        self.inner.wakeups.fetch_add(1, Ordering::SeqCst);
        match self.inner.port.get() {
            Some(port) => port.wakeup_vm().map_err(|_| SchedulerError),
            None => Err(SchedulerError),
        }
    }
}

fn main() {
    // Create the port once, before the runtime loop starts, then hand it to
    // the scheduler hook so alarm expiries can wake the loop up.
    let scheduler = Scheduler::default();
    let port = Arc::new(
        Port::initialize(HostKernel::new(), HostClock::new(), scheduler.clone())
            .expect("host kernel objects"),
    );
    if scheduler.inner.port.set(Arc::clone(&port)).is_err() {
        panic!("port wired twice");
    }
    port.vm_task_started().unwrap();

    let started = Instant::now();
    for slice in 1..=5 {
        println!(
            "[{:>4} ms] task {}: running bytecode slice {slice}",
            started.elapsed().as_millis(),
            port.current_task_id(),
        );

        // Out of work for now: ask to be woken 50 ms from now and sleep.
        let next_deadline = port.current_time(true) + 50;
        port.schedule_request(next_deadline).unwrap();
        port.idle_vm().unwrap();
    }

    println!(
        "[{:>4} ms] done after {} alarm wakeups",
        started.elapsed().as_millis(),
        scheduler.inner.wakeups.load(Ordering::SeqCst),
    );
    port.shutdown().unwrap();
}
