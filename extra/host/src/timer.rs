//! The alarm timer: a one-shot countdown serviced by a dedicated thread.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use vm_port::kernel::{AlarmTimer, KernelError};

/// One-shot alarm backed by a worker thread.
///
/// Arming replaces any previous countdown, and the worker always decides
/// against the latest programmed state, so a stale deadline can never fire.
/// The expiry routine runs on the worker thread, the host stand-in for an
/// RTOS timer context. Dropping the timer stops the worker.
#[derive(Debug)]
pub struct HostTimer {
    tick: Duration,
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<State>,
    wake: Condvar,
}

#[derive(Debug, Default)]
struct State {
    fire_at: Option<Instant>,
    shutdown: bool,
}

impl HostTimer {
    pub(crate) fn spawn<F>(tick: Duration, expiry: F) -> Result<Self, KernelError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let shared = Arc::new(Shared::default());
        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("vm-port-alarm".into())
            .spawn(move || service_alarms(&worker_shared, expiry))
            .map_err(|_| KernelError::OutOfResources)?;
        Ok(HostTimer {
            tick,
            shared,
            worker: Some(worker),
        })
    }

    fn countdown(&self, ticks: u64) -> Duration {
        // Saturate: a countdown centuries out just never fires.
        let nanos = self.tick.as_nanos().saturating_mul(u128::from(ticks));
        Duration::from_nanos(nanos.min(u128::from(u64::MAX)) as u64)
    }
}

impl AlarmTimer for HostTimer {
    fn arm(&self, ticks: u64) -> Result<(), KernelError> {
        let mut state = self.shared.state.lock().map_err(|_| KernelError::Rejected)?;
        state.fire_at = Some(Instant::now() + self.countdown(ticks));
        log::trace!("alarm armed {ticks} ticks out");
        self.shared.wake.notify_all();
        Ok(())
    }

    fn disarm(&self) -> Result<(), KernelError> {
        let mut state = self.shared.state.lock().map_err(|_| KernelError::Rejected)?;
        state.fire_at = None;
        self.shared.wake.notify_all();
        Ok(())
    }
}

impl Drop for HostTimer {
    fn drop(&mut self) {
        if let Ok(mut state) = self.shared.state.lock() {
            state.shutdown = true;
            state.fire_at = None;
        }
        self.shared.wake.notify_all();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn service_alarms<F: Fn()>(shared: &Shared, expiry: F) {
    let Ok(mut state) = shared.state.lock() else {
        return;
    };
    loop {
        if state.shutdown {
            return;
        }
        match state.fire_at {
            None => {
                state = match shared.wake.wait(state) {
                    Ok(guard) => guard,
                    Err(_) => return,
                };
            }
            Some(at) => {
                let now = Instant::now();
                if now < at {
                    state = match shared.wake.wait_timeout(state, at - now) {
                        Ok((guard, _)) => guard,
                        Err(_) => return,
                    };
                } else {
                    // One-shot: go inert before running the expiry routine,
                    // so the routine itself may rearm.
                    state.fire_at = None;
                    drop(state);
                    log::trace!("alarm fired");
                    expiry();
                    state = match shared.state.lock() {
                        Ok(guard) => guard,
                        Err(_) => return,
                    };
                }
            }
        }
    }
}
