// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Alarm scheduling and idle/wakeup port between a managed-runtime task and
//! its host kernel.
//!
//! A managed runtime with a single thread of execution alternates between
//! running bytecode and sleeping. To do that on top of a preemptive kernel it
//! needs exactly two services:
//!
//! 1. An *alarm*: be woken at a precise future time so it can re-evaluate
//!    which of its own green tasks are runnable.
//! 2. An *idle gate*: sleep until explicitly woken, without losing a wakeup
//!    that arrives before the sleep actually starts.
//!
//! This crate is that bridge. It owns a single one-shot alarm timer, a single
//! blocking wakeup signal, and one shared "next wakeup deadline" value, and
//! composes them into the handful of entry points the runtime relies on
//! (see [`port::Port`]).
//!
//!
//! # Execution contexts
//!
//! Exactly two contexts touch port state:
//!
//! - the runtime task itself, which calls
//!   [`schedule_request`][port::Port::schedule_request] and
//!   [`idle_vm`][port::Port::idle_vm], and
//! - the kernel's timer-expiry context, which re-enters the runtime's
//!   scheduler, which in turn calls [`wakeup_vm`][port::Port::wakeup_vm].
//!
//! The deadline value is the one piece of state both contexts read *and*
//! write, so the compare-and-lower sequence in `schedule_request` runs inside
//! a [`critical_section`] critical section. Everything else is either a
//! kernel object whose operations are atomic on their own, or a one-line
//! delegation to a platform service.
//!
//!
//! # Platform bindings
//!
//! The port never talks to a kernel directly. The timer, the gate, the clock
//! and the task-identity query are injected behind the narrow traits in
//! [`kernel`] and [`time`], so the same core runs over a real RTOS binding
//! or over a plain-threads host binding for development and testing.
//!
//! Two link-time obligations fall on whichever binding you pick:
//!
//! - a `critical-section` implementation (RTOS bindings usually provide
//!   their own; host builds enable the crate's `std` implementation), and
//! - with the `defmt` feature enabled, a `defmt` global logger.
//!
//!
//! # Feature flags
//!
//! - `defmt`: emit trace-level events at scheduling decisions, wakeups and
//!   alarm firings through `defmt`. Off by default and entirely compiled out
//!   when disabled.

#![cfg_attr(not(test), no_std)]

#![warn(
    elided_lifetimes_in_paths,
    explicit_outlives_requirements,
    missing_debug_implementations,
    missing_docs,
    semicolon_in_expressions_from_macros,
    single_use_lifetimes,
    trivial_casts,
    trivial_numeric_casts,
    unreachable_pub,
    unsafe_op_in_unsafe_fn,
    unused_qualifications,
)]

/// Internal assert macro that doesn't stringify its expression or generate any
/// fancy messages. This means failures must be diagnosed by file:line only,
/// so, don't use this more than once on the same line. In exchange, this
/// makes asserts significantly smaller in terms of text size.
macro_rules! cheap_assert {
    ($x:expr) => {
        if !$x { panic!(); };
    }
}

/// Internal logging shim: forwards to `defmt` when the feature is enabled and
/// compiles to nothing otherwise.
macro_rules! port_trace {
    ($s:literal $(, $x:expr)* $(,)?) => {
        {
            #[cfg(feature = "defmt")]
            ::defmt::trace!($s $(, $x)*);
            #[cfg(not(feature = "defmt"))]
            let _ = ($( & $x ),*);
        }
    };
}

pub mod kernel;
pub mod port;
pub mod time;

#[doc(hidden)]
pub use portable_atomic;
