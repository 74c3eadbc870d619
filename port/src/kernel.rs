// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interfaces onto the host kernel's timer and signaling primitives.
//!
//! The port needs exactly two kernel objects -- one one-shot countdown timer
//! and one blocking wakeup signal -- plus a task-identity query. A platform
//! binding implements [`Kernel`] to construct them; the port core never
//! names a concrete kernel type.

use core::fmt;

/// Error returned by kernel primitive construction and operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum KernelError {
    /// A kernel object could not be constructed, typically because the
    /// kernel ran out of the relevant resource.
    OutOfResources,
    /// The kernel rejected an operation on an existing object.
    Rejected,
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::OutOfResources => f.write_str("kernel object creation failed"),
            KernelError::Rejected => f.write_str("kernel operation rejected"),
        }
    }
}

/// Failure of a blocking acquire on the idle gate.
///
/// The two cases must stay distinct: the runtime reacts differently to a
/// wait the kernel aborted (task deletion, wait abort) than to an operation
/// the kernel rejected outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AcquireError {
    /// The wait was aborted by the kernel rather than satisfied by a
    /// release.
    Interrupted,
    /// The kernel rejected the wait outright.
    Kernel(KernelError),
}

/// A single one-shot countdown timer.
///
/// The timer is created disarmed and fires at most once per [`arm`], then
/// becomes inert until rearmed. Reprogramming never makes it periodic.
///
/// [`arm`]: AlarmTimer::arm
pub trait AlarmTimer: Send + Sync {
    /// Starts (or restarts) the countdown so the expiry routine the timer
    /// was created with runs `ticks` native ticks from now.
    fn arm(&self, ticks: u64) -> Result<(), KernelError>;

    /// Cancels any pending firing. Disarming an already inert timer is a
    /// successful no-op.
    fn disarm(&self) -> Result<(), KernelError>;
}

/// The blocking wakeup signal the runtime task sleeps on.
///
/// Semantically a counting signal created with count zero: `acquire` blocks
/// until the count is positive and decrements it, `release` increments it
/// and unblocks at most one waiter. Because a release with no waiter leaves
/// the count raised, a wakeup delivered before the sleep starts is never
/// lost -- the next acquire returns immediately.
///
/// Implementations must use true blocking waits, never a spin on a flag:
/// the whole point of the gate is letting the runtime task yield the CPU.
pub trait IdleGate: Send + Sync {
    /// Blocks the calling task, with no timeout, until a release is
    /// consumed.
    fn acquire(&self) -> Result<(), AcquireError>;

    /// Increments the count, unblocking at most one waiter. Must be safe to
    /// call from contexts other than the runtime task, including timer
    /// expiry.
    fn release(&self) -> Result<(), KernelError>;

    /// Consumes one pending release without blocking. Returns `false` if
    /// the count was already zero.
    fn try_acquire(&self) -> Result<bool, KernelError>;
}

/// Constructor and identity surface of the underlying kernel.
pub trait Kernel: Send + Sync {
    /// Concrete timer type of this binding.
    type Timer: AlarmTimer;
    /// Concrete gate type of this binding.
    type Gate: IdleGate;

    /// Creates the alarm timer in a disarmed one-shot configuration.
    /// `expiry` runs on the kernel's timer context every time the timer
    /// fires.
    fn alarm_timer<F>(&self, expiry: F) -> Result<Self::Timer, KernelError>
    where
        F: Fn() + Send + Sync + 'static;

    /// Creates the idle gate with an initial count of zero.
    fn idle_gate(&self) -> Result<Self::Gate, KernelError>;

    /// Identity of the calling task.
    fn current_task_id(&self) -> i32;
}
