//! The idle gate: a sticky wakeup bit with true blocking semantics.

use std::sync::{Condvar, Mutex};

use vm_port::kernel::{AcquireError, IdleGate, KernelError};

/// Blocking wakeup signal backed by a condvar.
///
/// A release with no waiter leaves the bit set, so the next acquire returns
/// immediately, and repeated releases coalesce into a single pending
/// wakeup. Only one thread (the runtime task) is expected to acquire.
#[derive(Debug)]
pub struct HostGate {
    pending: Mutex<bool>,
    wake: Condvar,
}

impl HostGate {
    pub(crate) fn new() -> Self {
        HostGate {
            pending: Mutex::new(false),
            wake: Condvar::new(),
        }
    }
}

impl IdleGate for HostGate {
    fn acquire(&self) -> Result<(), AcquireError> {
        let mut pending = self
            .pending
            .lock()
            .map_err(|_| AcquireError::Kernel(KernelError::Rejected))?;
        while !*pending {
            // A poisoned wait means another holder of the gate died: the
            // wait was aborted, not satisfied.
            pending = self
                .wake
                .wait(pending)
                .map_err(|_| AcquireError::Interrupted)?;
        }
        *pending = false;
        Ok(())
    }

    fn release(&self) -> Result<(), KernelError> {
        let mut pending = self.pending.lock().map_err(|_| KernelError::Rejected)?;
        *pending = true;
        log::trace!("wakeup pending");
        self.wake.notify_one();
        Ok(())
    }

    fn try_acquire(&self) -> Result<bool, KernelError> {
        let mut pending = self.pending.lock().map_err(|_| KernelError::Rejected)?;
        Ok(std::mem::replace(&mut *pending, false))
    }
}
