//! Host (std) binding for the `vm-port` scheduling port.
//!
//! Implements the port's kernel-primitive and time-source interfaces over
//! plain threads: a condvar-backed idle gate, a one-shot alarm timer
//! serviced by a dedicated thread, an `Instant`-anchored clock, and
//! process-unique per-thread task IDs. The test suite and demos run the
//! port over this binding; on hardware its role is played by an RTOS
//! binding crate instead.
//!
//! Depending on this crate also enables `critical-section`'s `std`
//! implementation, so binaries linking the port get a working critical
//! section without further setup.

#![deny(dead_code)]

pub mod clock;
pub mod gate;
pub mod timer;

pub use clock::HostClock;
pub use gate::HostGate;
pub use timer::HostTimer;

use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;

use vm_port::kernel::{Kernel, KernelError};

/// Kernel binding over std threads.
///
/// The tick period chosen here is the unit [`HostTimer::arm`] counts in; a
/// paired [`HostClock`] must be built with the same period so its tick
/// conversion agrees (both default to [`HostKernel::DEFAULT_TICK`]).
///
/// [`HostTimer::arm`]: vm_port::kernel::AlarmTimer::arm
#[derive(Debug, Clone)]
pub struct HostKernel {
    tick: Duration,
}

impl HostKernel {
    /// Tick period used by [`new`][HostKernel::new]: one millisecond per
    /// tick.
    pub const DEFAULT_TICK: Duration = Duration::from_millis(1);

    /// Binding with the default tick period.
    pub fn new() -> Self {
        Self::with_tick(Self::DEFAULT_TICK)
    }

    /// Binding with a custom tick period. Must be nonzero.
    pub fn with_tick(tick: Duration) -> Self {
        assert!(!tick.is_zero());
        HostKernel { tick }
    }
}

impl Default for HostKernel {
    fn default() -> Self {
        Self::new()
    }
}

impl Kernel for HostKernel {
    type Timer = HostTimer;
    type Gate = HostGate;

    fn alarm_timer<F>(&self, expiry: F) -> Result<HostTimer, KernelError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        HostTimer::spawn(self.tick, expiry)
    }

    fn idle_gate(&self) -> Result<HostGate, KernelError> {
        Ok(HostGate::new())
    }

    fn current_task_id(&self) -> i32 {
        task_id()
    }
}

static NEXT_TASK_ID: AtomicI32 = AtomicI32::new(1);

thread_local! {
    static TASK_ID: i32 = NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed);
}

/// Process-unique identifier of the calling thread, assigned on first use.
pub fn task_id() -> i32 {
    TASK_ID.with(|id| *id)
}
