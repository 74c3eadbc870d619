// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Time services consumed by the port.
//!
//! The port queries time, it never owns it. A platform binding provides a
//! monotonic clock, the application-time offset store, and the conversion
//! from milliseconds to whatever tick unit its timer hardware counts in.

/// Monotonic time base, application-time offset store and tick conversion.
pub trait TimeSource: Send + Sync {
    /// One-time setup of the time base, called exactly once during port
    /// initialization, before any query. The default does nothing.
    fn init(&self) {}

    /// Milliseconds elapsed since the device started. Independent of any
    /// user setting; never goes backwards.
    fn system_time_ms(&self) -> i64;

    /// Milliseconds since the Unix epoch, as last established through
    /// [`set_application_time`]. Advances at the same rate as system time.
    ///
    /// [`set_application_time`]: TimeSource::set_application_time
    fn application_time_ms(&self) -> i64;

    /// Re-anchors application time so that [`application_time_ms`] reads
    /// `time_ms` now. Does not affect system time.
    ///
    /// [`application_time_ms`]: TimeSource::application_time_ms
    fn set_application_time(&self, time_ms: i64);

    /// Monotonic nanosecond counter. Only the difference between two calls
    /// is meaningful; the absolute value is not anchored to any epoch.
    fn time_nanos(&self) -> i64;

    /// Converts a millisecond duration to native timer ticks, for arming
    /// the alarm timer. Implementations should round up so an alarm never
    /// fires before its millisecond deadline.
    fn millis_to_ticks(&self, millis: i64) -> u64;
}
