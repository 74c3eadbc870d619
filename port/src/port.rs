// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The port facade: deadline tracking, alarm scheduling and the idle/wakeup
//! handshake.
//!
//! A [`Port`] owns the three stateful entities of the bridge -- the shared
//! deadline, the alarm timer and the idle gate -- and composes them into the
//! entry points the managed runtime calls. All three are created exactly once
//! by [`Port::initialize`] and live as long as the port; there is no teardown
//! path, mirroring the fact that the runtime task itself never goes away.
//!
//! # The deadline invariant
//!
//! At all times the deadline equals either "no request pending" (an internal
//! sentinel standing in for plus infinity) or the minimum absolute time among
//! all [`schedule_request`][Port::schedule_request] calls since the last
//! wakeup. Only `schedule_request` lowers it, and only
//! [`wakeup_vm`][Port::wakeup_vm] resets it. The timer-expiry context runs
//! concurrently with the runtime task in general, so the compare-and-lower
//! sequence is guarded by a critical section; the value itself lives in an
//! atomic so `wakeup_vm` can reset it from any context without taking the
//! section.
//!
//! # Sticky wakeups
//!
//! A wakeup delivered while the runtime is not idling is not lost: the gate
//! release stays pending and the next [`idle_vm`][Port::idle_vm] returns
//! immediately. [`ack_wakeup`][Port::ack_wakeup] drains that pending state
//! when the runtime has already re-evaluated its work by other means and
//! wants the next idle to genuinely sleep.

use core::fmt;

use portable_atomic::{AtomicI64, Ordering};

use crate::kernel::{AcquireError, AlarmTimer, IdleGate, Kernel, KernelError};
use crate::time::TimeSource;

/// Sentinel deadline meaning "no wakeup requested". Every real request
/// compares lower.
const NO_DEADLINE: i64 = i64::MAX;

/// Failure reported by the runtime scheduler's re-entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SchedulerError;

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("runtime scheduler re-entry failed")
    }
}

/// The managed runtime's scheduler re-entry point.
///
/// Invoking it asks the runtime to re-evaluate runnable work; the runtime
/// answers by calling [`Port::wakeup_vm`] if its task is (or may be) idling.
/// The port invokes the hook from two places: synchronously from
/// [`Port::schedule_request`] when the requested time is already due, and
/// from the kernel's timer context when the alarm fires.
pub trait SchedulerHook: Send + Sync {
    /// Re-enters the runtime's scheduler.
    fn schedule(&self) -> Result<(), SchedulerError>;
}

impl<S: SchedulerHook> SchedulerHook for &S {
    fn schedule(&self) -> Result<(), SchedulerError> {
        (**self).schedule()
    }
}

/// Errors surfaced by port entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PortError {
    /// A kernel primitive failed; see [`KernelError`].
    Kernel(KernelError),
    /// The idle wait was aborted by the kernel instead of being satisfied
    /// by a wakeup. The runtime treats this differently from both success
    /// and generic failure, so it is never folded into either.
    Interrupted,
    /// The synchronously invoked scheduler re-entry point reported failure.
    Scheduler(SchedulerError),
}

impl From<KernelError> for PortError {
    fn from(e: KernelError) -> Self {
        PortError::Kernel(e)
    }
}

impl fmt::Display for PortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortError::Kernel(e) => write!(f, "kernel primitive failure: {e}"),
            PortError::Interrupted => f.write_str("idle wait interrupted"),
            PortError::Scheduler(e) => write!(f, "{e}"),
        }
    }
}

/// The port context object.
///
/// Construct exactly one with [`Port::initialize`], before the runtime task
/// calls any other entry point, and keep it alive for the life of the
/// process. All methods take `&self`; the port is shared between the runtime
/// task and the timer-expiry context, never moved between them.
pub struct Port<K: Kernel, T, S> {
    deadline: AtomicI64,
    timer: K::Timer,
    gate: K::Gate,
    kernel: K,
    time: T,
    scheduler: S,
}

impl<K: Kernel, T, S> fmt::Debug for Port<K, T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Port")
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

impl<K, T, S> Port<K, T, S>
where
    K: Kernel,
    T: TimeSource,
    S: SchedulerHook + Clone + 'static,
{
    /// Creates the alarm timer (disarmed, one-shot, wired to `scheduler`)
    /// and the idle gate (count zero), and initializes the time source.
    ///
    /// Fails if either kernel object cannot be constructed; a port that
    /// failed to initialize must not be used, so no partially constructed
    /// value is returned.
    pub fn initialize(kernel: K, time: T, scheduler: S) -> Result<Self, PortError> {
        let timer = kernel.alarm_timer({
            let hook = scheduler.clone();
            move || alarm_expired(&hook)
        })?;
        let gate = kernel.idle_gate()?;
        time.init();
        Ok(Port {
            deadline: AtomicI64::new(NO_DEADLINE),
            timer,
            gate,
            kernel,
            time,
            scheduler,
        })
    }

    /// Called once the runtime's task context exists. The port needs
    /// nothing from it, so this is a successful no-op.
    pub fn vm_task_started(&self) -> Result<(), PortError> {
        Ok(())
    }

    /// Guarantees the runtime task is woken at or before `deadline_ms`
    /// (absolute system milliseconds).
    ///
    /// If an earlier *or equal* wakeup is already guaranteed, this does
    /// nothing -- equal deadlines count as already satisfied, so there is no
    /// redundant rearm. Otherwise the new, lower deadline wins: any pending
    /// firing for the stale one is cancelled and the timer rearmed. A
    /// deadline that is already due does not arm anything; the scheduler is
    /// re-entered directly on the calling thread instead, and its failure
    /// propagates.
    ///
    /// The compare-and-lower runs inside a critical section so it cannot
    /// interleave with a concurrent wakeup resetting the deadline from the
    /// timer context.
    pub fn schedule_request(&self, deadline_ms: i64) -> Result<(), PortError> {
        let already_due = critical_section::with(|_| -> Result<bool, PortError> {
            // An earlier or equal wakeup is already guaranteed.
            if deadline_ms >= self.deadline.load(Ordering::SeqCst) {
                return Ok(false);
            }
            self.deadline.store(deadline_ms, Ordering::SeqCst);

            // Cancel any pending firing for the stale, later deadline.
            self.timer.disarm()?;

            let relative_ms = deadline_ms - self.time.system_time_ms();
            if relative_ms > 0 {
                port_trace!("alarm in {=i64} ms", relative_ms);
                self.timer.arm(self.time.millis_to_ticks(relative_ms))?;
                Ok(false)
            } else {
                Ok(true)
            }
        })?;

        if already_due {
            // Deadline already reached; re-enter the scheduler on this
            // thread instead of arming. The deadline is published, so this
            // runs outside the critical section.
            port_trace!("deadline already due, re-entering scheduler");
            self.scheduler.schedule().map_err(PortError::Scheduler)?;
        }
        Ok(())
    }

    /// Blocks the calling task until a wakeup is delivered, with no
    /// timeout.
    ///
    /// Returns immediately if a wakeup is already pending. Must be called
    /// only by the runtime task; calling it from anywhere else puts the
    /// wrong thread to sleep. A wait the kernel aborted abnormally surfaces
    /// as [`PortError::Interrupted`].
    pub fn idle_vm(&self) -> Result<(), PortError> {
        self.gate.acquire().map_err(|e| match e {
            AcquireError::Interrupted => PortError::Interrupted,
            AcquireError::Kernel(e) => PortError::Kernel(e),
        })
    }

    /// Wakes the runtime task, or leaves a wakeup pending if it is not
    /// currently idling.
    ///
    /// Unconditionally resets the deadline first: whatever was armed is
    /// considered handled once a wakeup is in flight, even if the wakeup
    /// came from somewhere other than the alarm. Safe to call from the
    /// timer-expiry context. Must be called only through the runtime's
    /// scheduler, never by arbitrary application code.
    pub fn wakeup_vm(&self) -> Result<(), PortError> {
        self.deadline.store(NO_DEADLINE, Ordering::SeqCst);
        port_trace!("wakeup");
        self.gate.release()?;
        Ok(())
    }

    /// Clears any outstanding pending wakeup, so the next [`idle_vm`] call
    /// genuinely blocks instead of returning on a stale release.
    ///
    /// Called by the runtime task when it has already re-evaluated its work
    /// between a wakeup and the next idle.
    ///
    /// [`idle_vm`]: Port::idle_vm
    pub fn ack_wakeup(&self) -> Result<(), PortError> {
        while self.gate.try_acquire()? {}
        Ok(())
    }

    /// Identity of the calling task.
    pub fn current_task_id(&self) -> i32 {
        self.kernel.current_task_id()
    }

    /// Called during runtime end. The kernel objects live for the process
    /// lifetime, so this is a successful no-op.
    pub fn shutdown(&self) -> Result<(), PortError> {
        Ok(())
    }

    /// Re-anchors application time; see
    /// [`TimeSource::set_application_time`].
    pub fn set_application_time(&self, time_ms: i64) {
        self.time.set_application_time(time_ms);
    }

    /// Current time in milliseconds: system clock if `system` is true,
    /// application clock otherwise.
    pub fn current_time(&self, system: bool) -> i64 {
        if system {
            self.time.system_time_ms()
        } else {
            self.time.application_time_ms()
        }
    }

    /// Monotonic nanosecond counter; only differences between two calls are
    /// meaningful.
    pub fn time_nanos(&self) -> i64 {
        self.time.time_nanos()
    }
}

/// Timer-expiry path, run on the kernel's timer context.
///
/// A failing re-entry here means shared scheduling state is already corrupt,
/// and no caller exists in an asynchronous callback context to receive a
/// result, so this asserts instead of returning.
fn alarm_expired<S: SchedulerHook>(hook: &S) {
    port_trace!("alarm fired");
    cheap_assert!(hook.schedule().is_ok());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicI64 as StdAtomicI64, AtomicU32, AtomicUsize, Ordering as O};
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Event {
        Disarm,
        Arm(u64),
    }

    #[derive(Debug, Clone, Default)]
    struct Trace(Arc<Mutex<Vec<Event>>>);

    impl Trace {
        fn push(&self, e: Event) {
            self.0.lock().unwrap().push(e);
        }

        fn take(&self) -> Vec<Event> {
            std::mem::take(&mut *self.0.lock().unwrap())
        }
    }

    #[derive(Debug)]
    struct MockTimer {
        trace: Trace,
        fail_arm: Arc<AtomicBool>,
    }

    impl AlarmTimer for MockTimer {
        fn arm(&self, ticks: u64) -> Result<(), KernelError> {
            if self.fail_arm.load(O::SeqCst) {
                return Err(KernelError::Rejected);
            }
            self.trace.push(Event::Arm(ticks));
            Ok(())
        }

        fn disarm(&self) -> Result<(), KernelError> {
            self.trace.push(Event::Disarm);
            Ok(())
        }
    }

    /// Non-blocking stand-in for the gate: an empty acquire reports an
    /// aborted wait instead of sleeping, so tests never hang. Blocking
    /// behavior is covered by the host-binding test suite.
    #[derive(Debug)]
    struct MockGate {
        count: Arc<AtomicU32>,
    }

    impl IdleGate for MockGate {
        fn acquire(&self) -> Result<(), AcquireError> {
            let taken = self
                .count
                .fetch_update(O::SeqCst, O::SeqCst, |c| c.checked_sub(1))
                .is_ok();
            if taken {
                Ok(())
            } else {
                Err(AcquireError::Interrupted)
            }
        }

        fn release(&self) -> Result<(), KernelError> {
            self.count.fetch_add(1, O::SeqCst);
            Ok(())
        }

        fn try_acquire(&self) -> Result<bool, KernelError> {
            let taken = self
                .count
                .fetch_update(O::SeqCst, O::SeqCst, |c| c.checked_sub(1))
                .is_ok();
            Ok(taken)
        }
    }

    #[derive(Default)]
    struct ExpirySlot(Mutex<Option<Box<dyn Fn() + Send + Sync>>>);

    impl fmt::Debug for ExpirySlot {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("ExpirySlot")
        }
    }

    #[derive(Debug, Default)]
    struct KernelInner {
        trace: Trace,
        gate_count: Arc<AtomicU32>,
        fail_arm: Arc<AtomicBool>,
        fail_create: AtomicBool,
        expiry: ExpirySlot,
    }

    #[derive(Debug, Clone, Default)]
    struct MockKernel(Arc<KernelInner>);

    impl MockKernel {
        fn fire_alarm(&self) {
            let expiry = self.0.expiry.0.lock().unwrap();
            (expiry.as_ref().expect("no alarm timer created"))();
        }

        fn pending_wakeups(&self) -> u32 {
            self.0.gate_count.load(O::SeqCst)
        }
    }

    impl Kernel for MockKernel {
        type Timer = MockTimer;
        type Gate = MockGate;

        fn alarm_timer<F>(&self, expiry: F) -> Result<MockTimer, KernelError>
        where
            F: Fn() + Send + Sync + 'static,
        {
            if self.0.fail_create.load(O::SeqCst) {
                return Err(KernelError::OutOfResources);
            }
            *self.0.expiry.0.lock().unwrap() = Some(Box::new(expiry));
            Ok(MockTimer {
                trace: self.0.trace.clone(),
                fail_arm: self.0.fail_arm.clone(),
            })
        }

        fn idle_gate(&self) -> Result<MockGate, KernelError> {
            if self.0.fail_create.load(O::SeqCst) {
                return Err(KernelError::OutOfResources);
            }
            Ok(MockGate {
                count: self.0.gate_count.clone(),
            })
        }

        fn current_task_id(&self) -> i32 {
            7
        }
    }

    #[derive(Debug, Default)]
    struct ClockInner {
        now_ms: StdAtomicI64,
        app_offset_ms: StdAtomicI64,
        inited: AtomicBool,
    }

    /// Manual clock: one tick per millisecond, time advances only when a
    /// test says so.
    #[derive(Debug, Clone, Default)]
    struct MockClock(Arc<ClockInner>);

    impl MockClock {
        fn set_now(&self, ms: i64) {
            self.0.now_ms.store(ms, O::SeqCst);
        }
    }

    impl TimeSource for MockClock {
        fn init(&self) {
            self.0.inited.store(true, O::SeqCst);
        }

        fn system_time_ms(&self) -> i64 {
            self.0.now_ms.load(O::SeqCst)
        }

        fn application_time_ms(&self) -> i64 {
            self.system_time_ms() + self.0.app_offset_ms.load(O::SeqCst)
        }

        fn set_application_time(&self, time_ms: i64) {
            self.0
                .app_offset_ms
                .store(time_ms - self.system_time_ms(), O::SeqCst);
        }

        fn time_nanos(&self) -> i64 {
            self.system_time_ms() * 1_000_000
        }

        fn millis_to_ticks(&self, millis: i64) -> u64 {
            millis as u64
        }
    }

    #[derive(Debug, Clone, Default)]
    struct Recorder {
        calls: Arc<AtomicUsize>,
        fail: Arc<AtomicBool>,
    }

    impl SchedulerHook for Recorder {
        fn schedule(&self) -> Result<(), SchedulerError> {
            if self.fail.load(O::SeqCst) {
                return Err(SchedulerError);
            }
            self.calls.fetch_add(1, O::SeqCst);
            Ok(())
        }
    }

    type TestPort = Port<MockKernel, MockClock, Recorder>;

    fn rig() -> (TestPort, MockKernel, MockClock, Recorder) {
        let kernel = MockKernel::default();
        let clock = MockClock::default();
        let sched = Recorder::default();
        let port = Port::initialize(kernel.clone(), clock.clone(), sched.clone())
            .expect("initialize failed");
        (port, kernel, clock, sched)
    }

    #[test]
    fn initialize_sets_up_time_source() {
        let (_port, kernel, clock, _sched) = rig();
        assert!(clock.0.inited.load(O::SeqCst));
        assert_eq!(kernel.pending_wakeups(), 0);
        assert!(kernel.0.trace.take().is_empty());
    }

    #[test]
    fn initialize_surfaces_object_creation_failure() {
        let kernel = MockKernel::default();
        kernel.0.fail_create.store(true, O::SeqCst);
        let r = Port::initialize(kernel, MockClock::default(), Recorder::default());
        assert_eq!(
            r.err().map(|e| format!("{e}")),
            Some("kernel primitive failure: kernel object creation failed".to_string()),
        );
    }

    #[test]
    fn first_request_arms_relative_to_now() {
        let (port, kernel, clock, _sched) = rig();
        clock.set_now(50);
        port.schedule_request(100).unwrap();
        assert_eq!(kernel.0.trace.take(), vec![Event::Disarm, Event::Arm(50)]);
    }

    #[test]
    fn later_request_never_overrides_earlier() {
        let (port, kernel, clock, _sched) = rig();
        clock.set_now(50);
        port.schedule_request(100).unwrap();
        kernel.0.trace.take();
        port.schedule_request(150).unwrap();
        assert!(kernel.0.trace.take().is_empty());
    }

    #[test]
    fn equal_deadline_counts_as_already_satisfied() {
        let (port, kernel, clock, _sched) = rig();
        clock.set_now(50);
        port.schedule_request(100).unwrap();
        kernel.0.trace.take();
        port.schedule_request(100).unwrap();
        assert!(kernel.0.trace.take().is_empty());
    }

    #[test]
    fn earlier_request_cancels_and_rearms() {
        let (port, kernel, clock, _sched) = rig();
        clock.set_now(50);
        port.schedule_request(100).unwrap();
        clock.set_now(60);
        port.schedule_request(80).unwrap();
        assert_eq!(
            kernel.0.trace.take(),
            vec![
                Event::Disarm,
                Event::Arm(50),
                Event::Disarm,
                Event::Arm(20),
            ],
        );
    }

    #[test]
    fn due_deadline_reenters_scheduler_instead_of_arming() {
        let (port, kernel, clock, sched) = rig();
        clock.set_now(50);
        port.schedule_request(40).unwrap();
        assert_eq!(sched.calls.load(O::SeqCst), 1);
        // Disarmed, but nothing armed.
        assert_eq!(kernel.0.trace.take(), vec![Event::Disarm]);
    }

    #[test]
    fn exactly_due_deadline_also_reenters_scheduler() {
        let (port, _kernel, clock, sched) = rig();
        clock.set_now(50);
        port.schedule_request(50).unwrap();
        assert_eq!(sched.calls.load(O::SeqCst), 1);
    }

    #[test]
    fn due_path_propagates_scheduler_failure() {
        let (port, _kernel, clock, sched) = rig();
        sched.fail.store(true, O::SeqCst);
        clock.set_now(50);
        assert_eq!(
            port.schedule_request(10),
            Err(PortError::Scheduler(SchedulerError)),
        );
    }

    #[test]
    fn rearm_failure_surfaces() {
        let (port, kernel, clock, _sched) = rig();
        kernel.0.fail_arm.store(true, O::SeqCst);
        clock.set_now(50);
        assert_eq!(
            port.schedule_request(100),
            Err(PortError::Kernel(KernelError::Rejected)),
        );
    }

    #[test]
    fn wakeup_resets_deadline_tracking() {
        let (port, kernel, clock, _sched) = rig();
        clock.set_now(50);
        port.schedule_request(100).unwrap();
        kernel.0.trace.take();

        port.wakeup_vm().unwrap();

        // A request later than the old deadline arms again: the old
        // deadline is gone.
        port.schedule_request(150).unwrap();
        assert_eq!(kernel.0.trace.take(), vec![Event::Disarm, Event::Arm(100)]);
    }

    #[test]
    fn wakeup_releases_gate_once_per_call() {
        let (port, kernel, _clock, _sched) = rig();
        port.wakeup_vm().unwrap();
        port.wakeup_vm().unwrap();
        assert_eq!(kernel.pending_wakeups(), 2);
    }

    #[test]
    fn pending_wakeup_makes_idle_immediate() {
        let (port, kernel, _clock, _sched) = rig();
        port.wakeup_vm().unwrap();
        port.idle_vm().unwrap();
        assert_eq!(kernel.pending_wakeups(), 0);
    }

    #[test]
    fn ack_drains_every_pending_wakeup() {
        let (port, kernel, _clock, _sched) = rig();
        port.wakeup_vm().unwrap();
        port.wakeup_vm().unwrap();
        port.ack_wakeup().unwrap();
        assert_eq!(kernel.pending_wakeups(), 0);
    }

    #[test]
    fn ack_with_nothing_pending_is_a_noop() {
        let (port, kernel, _clock, _sched) = rig();
        port.ack_wakeup().unwrap();
        assert_eq!(kernel.pending_wakeups(), 0);
    }

    #[test]
    fn aborted_idle_wait_reports_interrupted() {
        let (port, _kernel, _clock, _sched) = rig();
        assert_eq!(port.idle_vm(), Err(PortError::Interrupted));
    }

    #[test]
    fn alarm_expiry_reenters_scheduler() {
        let (_port, kernel, _clock, sched) = rig();
        kernel.fire_alarm();
        assert_eq!(sched.calls.load(O::SeqCst), 1);
    }

    #[test]
    #[should_panic]
    fn alarm_expiry_asserts_on_scheduler_failure() {
        let (_port, kernel, _clock, sched) = rig();
        sched.fail.store(true, O::SeqCst);
        kernel.fire_alarm();
    }

    #[test]
    fn full_cycle_lower_wins_then_fire_then_reset() {
        let (port, kernel, clock, sched) = rig();
        clock.set_now(50);
        port.schedule_request(100).unwrap();
        clock.set_now(60);
        port.schedule_request(80).unwrap();
        assert_eq!(
            kernel.0.trace.take(),
            vec![
                Event::Disarm,
                Event::Arm(50),
                Event::Disarm,
                Event::Arm(20),
            ],
        );

        clock.set_now(80);
        kernel.fire_alarm();
        assert_eq!(sched.calls.load(O::SeqCst), 1);

        // The runtime's scheduler answers the alarm with a wakeup, which
        // resets deadline tracking for the next cycle.
        port.wakeup_vm().unwrap();
        port.idle_vm().unwrap();
        port.schedule_request(120).unwrap();
        assert_eq!(kernel.0.trace.take(), vec![Event::Disarm, Event::Arm(40)]);
    }

    #[test]
    fn lifecycle_entry_points_are_noops() {
        let (port, kernel, _clock, _sched) = rig();
        port.vm_task_started().unwrap();
        port.shutdown().unwrap();
        assert!(kernel.0.trace.take().is_empty());
    }

    #[test]
    fn task_id_delegates_to_kernel() {
        let (port, _kernel, _clock, _sched) = rig();
        assert_eq!(port.current_task_id(), 7);
    }

    #[test]
    fn time_queries_delegate_to_time_source() {
        let (port, _kernel, clock, _sched) = rig();
        clock.set_now(500);
        assert_eq!(port.current_time(true), 500);
        assert_eq!(port.time_nanos(), 500_000_000);

        port.set_application_time(1_000_000);
        assert_eq!(port.current_time(false), 1_000_000);
        // The application clock advances with system time, the system clock
        // ignores the offset.
        clock.set_now(700);
        assert_eq!(port.current_time(false), 1_000_200);
        assert_eq!(port.current_time(true), 700);
    }
}
