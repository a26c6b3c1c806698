//! The event-scheduler seam between a device core and its host simulator.

use crate::Ticks;

/// Host-side event scheduling, as seen by a device core.
///
/// A core never owns time. It asks the host to call it back for a given
/// unit after a delay, and may cancel that request. Each unit has at most
/// one pending event: scheduling again replaces the previous request.
///
/// Callbacks are never concurrent with command processing; the host is
/// single-threaded and cooperative.
pub trait Scheduler {
    /// Current simulated time.
    fn now(&self) -> Ticks;

    /// Request a callback for `unit` after `delay` ticks, replacing any
    /// pending request for that unit. A zero delay fires on the next
    /// event-queue poll.
    fn activate(&mut self, unit: usize, delay: Ticks);

    /// Drop any pending callback for `unit`.
    fn cancel(&mut self, unit: usize);

    /// Whether `unit` has a callback pending.
    fn is_active(&self, unit: usize) -> bool;
}

/// Reference event queue: one due-time slot per unit.
///
/// Suitable for hosts and test harnesses that have no simulator of their
/// own. `pop_next` hands back events in simulated-time order (ties broken
/// by unit number) and advances the clock to the event time.
#[derive(Debug, Clone)]
pub struct EventQueue {
    now: Ticks,
    due: Vec<Option<Ticks>>,
}

impl EventQueue {
    #[must_use]
    pub fn new(units: usize) -> Self {
        Self {
            now: Ticks::ZERO,
            due: vec![None; units],
        }
    }

    /// The earliest pending event, without firing it.
    #[must_use]
    pub fn next_due(&self) -> Option<(Ticks, usize)> {
        self.due
            .iter()
            .enumerate()
            .filter_map(|(unit, due)| due.map(|t| (t, unit)))
            .min()
    }

    /// Fire the earliest pending event: advance the clock to its due time
    /// and return `(time, unit)`.
    pub fn pop_next(&mut self) -> Option<(Ticks, usize)> {
        let (time, unit) = self.next_due()?;
        self.due[unit] = None;
        self.now = time;
        Some((time, unit))
    }

    /// Advance the clock to `time` without firing anything. Never moves
    /// the clock backwards.
    pub fn advance_to(&mut self, time: Ticks) {
        if time > self.now {
            self.now = time;
        }
    }
}

impl Scheduler for EventQueue {
    fn now(&self) -> Ticks {
        self.now
    }

    fn activate(&mut self, unit: usize, delay: Ticks) {
        self.due[unit] = Some(self.now + delay);
    }

    fn cancel(&mut self, unit: usize) {
        self.due[unit] = None;
    }

    fn is_active(&self, unit: usize) -> bool {
        self.due[unit].is_some()
    }
}
