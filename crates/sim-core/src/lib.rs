//! Simulated-time primitives for discrete-event peripheral models.
//!
//! Device cores in this workspace do not run on wall-clock time. They are
//! driven by a host simulator that owns an event queue: a core schedules a
//! callback some number of ticks in the future, and the host calls back in
//! when simulated time reaches that point. This crate provides the tick
//! unit, the `Scheduler` trait a core sees, and a reference `EventQueue`
//! for hosts (and tests) that have no scheduler of their own.

mod sched;
mod ticks;

pub use sched::{EventQueue, Scheduler};
pub use ticks::Ticks;
