//! The transport motion model.
//!
//! A moving transport is always in one of three phases per direction:
//! accelerating, at speed, or decelerating. Commands that cannot take
//! effect immediately queue up to two deferred transitions behind the
//! current one: a reversal is "decelerate, then accelerate the other way,
//! then run the function at speed". The original hardware packed this
//! queue into one 18-bit register as three 6-bit motion+function codes;
//! here it is an explicit three-deep stack of [`MotionStep`]s.

use crate::config::TimingParams;

/// Tape motion direction. Forward runs from the reverse end zone toward
/// the forward end zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dir {
    Fwd,
    Rev,
}

impl Dir {
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Fwd => Self::Rev,
            Self::Rev => Self::Fwd,
        }
    }
}

/// Motion phase of a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Motion {
    #[default]
    Stop,
    Decel(Dir),
    Accel(Dir),
    AtSpeed(Dir),
}

impl Motion {
    #[must_use]
    pub const fn dir(self) -> Option<Dir> {
        match self {
            Self::Stop => None,
            Self::Decel(d) | Self::Accel(d) | Self::AtSpeed(d) => Some(d),
        }
    }

    #[must_use]
    pub const fn is_moving(self) -> bool {
        !matches!(self, Self::Stop)
    }

    /// Accelerating or at speed (not stopping or stopped).
    #[must_use]
    pub const fn is_driven(self) -> bool {
        matches!(self, Self::Accel(_) | Self::AtSpeed(_))
    }
}

/// Function code of the "write timing and mark track" command, which the
/// simulator cannot honor and rejects with a select error.
pub const WRITE_MARK_CODE: u32 = 0o7;

/// Controller function, plus the off-reel pseudo-function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Func {
    Move,
    Search,
    Read,
    Write,
    ReadAll,
    WriteAll,
    /// Not a command: a deselected moving transport coasts under this
    /// function until it leaves the reel and detaches.
    OffReel,
}

impl Func {
    /// Decode a Status A function code. Code 4 is unassigned and code 7
    /// (write mark) is rejected earlier in command validation; both
    /// decode to `None` and surface as a select error.
    #[must_use]
    pub const fn from_code(code: u32) -> Option<Self> {
        match code {
            0o0 => Some(Self::Move),
            0o1 => Some(Self::Search),
            0o2 => Some(Self::Read),
            0o3 => Some(Self::Write),
            0o5 => Some(Self::ReadAll),
            0o6 => Some(Self::WriteAll),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_write(self) -> bool {
        matches!(self, Self::Write | Self::WriteAll)
    }
}

/// One motion phase with the function to run when it completes.
///
/// Ramp steps carry no function; the function rides on the at-speed step
/// that follows them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MotionStep {
    pub motion: Motion,
    pub func: Option<Func>,
}

impl MotionStep {
    #[must_use]
    pub const fn new(motion: Motion, func: Option<Func>) -> Self {
        Self { motion, func }
    }
}

/// The current motion step plus up to two deferred transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StateStack {
    current: MotionStep,
    queued: [Option<MotionStep>; 2],
}

impl StateStack {
    /// A stack holding just `step`, dropping anything queued.
    #[must_use]
    pub const fn only(step: MotionStep) -> Self {
        Self {
            current: step,
            queued: [None, None],
        }
    }

    #[must_use]
    pub const fn current(&self) -> MotionStep {
        self.current
    }

    /// Replace the first deferred step, keeping the second.
    pub fn set_second(&mut self, step: MotionStep) {
        self.queued[0] = Some(step);
    }

    /// Replace the second deferred step.
    pub fn set_third(&mut self, step: MotionStep) {
        self.queued[1] = Some(step);
    }

    /// The stack after the current step completes. An empty queue
    /// advances to stopped.
    #[must_use]
    pub fn advanced(self) -> Self {
        Self {
            current: self.queued[0].unwrap_or_default(),
            queued: [self.queued[1], None],
        }
    }

    pub fn advance(&mut self) {
        *self = self.advanced();
    }

    #[must_use]
    pub const fn has_pending(&self) -> bool {
        self.queued[0].is_some() || self.queued[1].is_some()
    }
}

/// Lines covered in `elapsed` ticks of the given motion phase.
///
/// Velocity ramps linearly over the accel/decel intervals, so distance is
/// quadratic in elapsed line count `n` against the ramp length in lines
/// `N`: `n²/2N` accelerating and `(2nN − n²)/2N` decelerating. The caller
/// applies the direction sign.
#[must_use]
pub fn travel(motion: Motion, elapsed: u64, timing: &TimingParams) -> u64 {
    let n = elapsed / timing.line_time();
    match motion {
        Motion::Stop => 0,
        Motion::AtSpeed(_) => n,
        Motion::Accel(_) => {
            let nmax = timing.accel_time() / timing.line_time();
            n * n / (2 * nmax)
        }
        Motion::Decel(_) => {
            let nmax = timing.decel_time() / timing.line_time();
            (2 * n * nmax).saturating_sub(n * n) / (2 * nmax)
        }
    }
}
