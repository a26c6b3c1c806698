//! Type 550 / TC02 DECtape controller.
//!
//! Simulates the control side of an eight-transport DECtape subsystem:
//! the shared command/status/data registers, the per-transport motion
//! state machine, and the line-timed service events that move words
//! between the tape image and the host.
//!
//! # Register interface
//!
//! Two 18-bit registers and a one-word data buffer:
//! - **Status A** — the command register. Bits 15:12 select the unit
//!   (1-7 direct, 8 is transport 0, anything else invalid), bit 5 is
//!   start/stop, bit 4 is direction (set = reverse), bits 2:0 the
//!   function code.
//! - **Status B** — the status register: data flag, block-end flag,
//!   error flag, and the specific error bits ([`status_b`]).
//! - **Data buffer** — the single-word exchange path between host and
//!   tape.
//!
//! The host drives the controller with five command pulses — [`mse`],
//! [`mlc`], [`mrd`], [`mwr`], [`mrs`] — and fields an interrupt request
//! whenever any of the data, block-end, or error flags is up.
//!
//! # Motion and events
//!
//! Transports accelerate, run at speed, and decelerate under the motion
//! equations in [`motion::travel`]; position is integrated lazily from
//! elapsed simulated time, never per tick. The controller owns no clock:
//! it schedules callbacks through the host's [`Scheduler`] and does all
//! functional work (search, read, write) in [`service`], one word-time
//! apart, when those callbacks fire.
//!
//! A transport that is deselected while moving is switched to the
//! off-reel pseudo-function: it coasts out past the end zone, where it
//! detaches itself without ever touching the shared registers again.
//!
//! [`mse`]: Type550::mse
//! [`mlc`]: Type550::mlc
//! [`mrd`]: Type550::mrd
//! [`mwr`]: Type550::mwr
//! [`mrs`]: Type550::mrs
//! [`service`]: Type550::service

pub mod config;
pub mod drive;
pub mod headers;
pub mod motion;

pub use config::TimingParams;
pub use drive::Drive;
pub use motion::{Dir, Func, Motion, MotionStep};

use format_dectape::{TapeImage, BLOCK_NUM_WORD, CSUM_WORD, END_ZONE_LINES, HT_LINES, WORD_LINES, WORD_MASK};
use log::{debug, trace};
use motion::{travel, StateStack, WRITE_MARK_CODE};
use sim_core::{Scheduler, Ticks};

/// Transports on one controller.
pub const NUM_DRIVES: usize = 8;

/// Status register A (command register) bit assignments.
pub mod status_a {
    /// Unit-select field.
    pub const UNIT_SHIFT: u32 = 12;
    pub const UNIT_MASK: u32 = 0o17 << UNIT_SHIFT;
    /// Start/stop: set puts the selected transport in motion.
    pub const START: u32 = 1 << 5;
    /// Direction: set = reverse.
    pub const REVERSE: u32 = 1 << 4;
    /// Function code field.
    pub const FNC_MASK: u32 = 0o7;
    /// The motion and function bits replaced by MLC.
    pub const COMMAND_MASK: u32 = 0o77;
}

/// Status register B (status register) bit assignments.
pub mod status_b {
    /// Data flag: a word wants service through the data buffer.
    pub const DTF: u32 = 1 << 17;
    /// Block-end flag: the word just serviced was the last of its block.
    pub const BEF: u32 = 1 << 16;
    /// Error flag: set together with one of the specific bits below.
    pub const ERF: u32 = 1 << 15;
    /// End zone reached.
    pub const END: u32 = 1 << 14;
    /// Timing error: the host missed a data-flag service window.
    pub const TIM: u32 = 1 << 13;
    /// Reverse motion (recomputed by MRS).
    pub const REV: u32 = 1 << 12;
    /// Transport in driven motion (recomputed by MRS).
    pub const GO: u32 = 1 << 11;
    /// Mark-track error. Never raised: write timing is not simulated.
    pub const MRK: u32 = 1 << 10;
    /// Select error.
    pub const SEL: u32 = 1 << 9;
    /// All specific error bits.
    pub const ALL_ERRORS: u32 = END | TIM | MRK | SEL;
}

/// Within-block substate bits.
pub mod substate {
    /// Word count overflowed (maintained by the host's read-all /
    /// write-all channel logic).
    pub const WC_OVERFLOW: u32 = 0o1;
    /// Between block start and the first serviced word.
    pub const START_OF_BLOCK: u32 = 0o2;
}

/// How deep a reset goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetKind {
    /// Power-on: cancel everything and zero all motion state.
    Cold,
    /// Reset over a running simulation: moving transports decelerate so
    /// position stays continuous.
    Warm,
}

/// The controller plus its eight transports.
pub struct Type550 {
    drives: [Drive; NUM_DRIVES],
    status_a: u32,
    status_b: u32,
    data_buffer: u32,
    substate: u32,
    timing: TimingParams,
    /// Images that came off their transport without a host detach
    /// (off-reel). The host drains these to run its write-back policy.
    ejected: Vec<(usize, TapeImage)>,
}

impl Type550 {
    #[must_use]
    pub fn new(timing: TimingParams) -> Self {
        Self {
            drives: std::array::from_fn(|_| Drive::new()),
            status_a: 0,
            status_b: 0,
            data_buffer: 0,
            substate: 0,
            timing,
            ejected: Vec::new(),
        }
    }

    /// Type 550 unit map: field 1-7 selects that transport, 8 selects
    /// transport 0, 0 and 9-15 are invalid.
    const fn unit_index(field: u32) -> Option<usize> {
        match field {
            1..=7 => Some(field as usize),
            8 => Some(0),
            _ => None,
        }
    }

    /// The transport the unit-select field currently addresses.
    #[must_use]
    pub fn selected_unit(&self) -> Option<usize> {
        Self::unit_index((self.status_a & status_a::UNIT_MASK) >> status_a::UNIT_SHIFT)
    }

    // -----------------------------------------------------------------------
    // Command pulses
    // -----------------------------------------------------------------------

    /// MSE — select. Replaces the unit-select field, spinning down the
    /// previously selected transport if the field changed, and clears
    /// the flags and error bits.
    pub fn mse<S: Scheduler>(&mut self, word: u32, sched: &mut S) {
        if (self.status_a ^ word) & status_a::UNIT_MASK != 0 {
            self.deselect(sched);
        }
        self.status_a = (self.status_a & !status_a::UNIT_MASK) | (word & status_a::UNIT_MASK);
        self.status_b &= !(status_b::DTF | status_b::BEF | status_b::ERF | status_b::ALL_ERRORS);
        trace!("select: unit field {:o}", (word & status_a::UNIT_MASK) >> status_a::UNIT_SHIFT);
    }

    /// MLC — load command. Replaces the start/stop, direction, and
    /// function bits, clears the flags, validates the command, and runs
    /// the motion-transition engine.
    pub fn mlc<S: Scheduler>(&mut self, word: u32, sched: &mut S) {
        self.status_a =
            (self.status_a & !status_a::COMMAND_MASK) | (word & status_a::COMMAND_MASK);
        self.status_b &= !(status_b::DTF | status_b::BEF | status_b::ERF | status_b::ALL_ERRORS);
        let code = self.status_a & status_a::FNC_MASK;
        let writes = matches!(Func::from_code(code), Some(f) if f.is_write());
        match self.selected_unit() {
            None => self.set_error(None, status_b::SEL, sched),
            Some(unit)
                if !self.drives[unit].enabled
                    || code == WRITE_MARK_CODE
                    || (writes && self.drives[unit].write_protected()) =>
            {
                self.set_error(Some(unit), status_b::SEL, sched);
            }
            Some(unit) => self.new_command(unit, sched),
        }
    }

    /// MRD — read data. Hands the data buffer to the host and drops the
    /// data and block-end flags.
    pub fn mrd(&mut self) -> u32 {
        self.status_b &= !(status_b::DTF | status_b::BEF);
        self.data_buffer
    }

    /// MWR — write data. Takes a word from the host into the data buffer
    /// and drops the data and block-end flags.
    pub fn mwr(&mut self, word: u32) {
        self.data_buffer = word & WORD_MASK;
        self.status_b &= !(status_b::DTF | status_b::BEF);
    }

    /// MRS — read status. Recomputes the reverse and go bits from the
    /// selected transport and returns Status B.
    pub fn mrs(&mut self) -> u32 {
        self.status_b &= !(status_b::REV | status_b::GO);
        if let Some(unit) = self.selected_unit() {
            let drive = &self.drives[unit];
            let mot = drive.state.current().motion;
            if mot.dir() == Some(Dir::Rev) {
                self.status_b |= status_b::REV;
            }
            if mot.is_driven() || drive.state.has_pending() {
                self.status_b |= status_b::GO;
            }
        }
        self.status_b
    }

    /// Whether the controller is requesting an interrupt: any of the
    /// data, block-end, or error flags is up.
    #[must_use]
    pub fn interrupt_request(&self) -> bool {
        self.status_b & (status_b::DTF | status_b::BEF | status_b::ERF) != 0
    }

    /// The IO-skip condition, for hosts that wire the controller into an
    /// IO-status bus.
    #[must_use]
    pub fn io_skip(&self) -> bool {
        self.status_b & (status_b::ERF | status_b::DTF) != 0
    }

    // -----------------------------------------------------------------------
    // Attach, detach, reset
    // -----------------------------------------------------------------------

    /// Mount a tape on `unit`, positioned just past the reverse end zone.
    pub fn attach(&mut self, unit: usize, image: TapeImage, now: Ticks) {
        debug!("unit {unit}: attached {:?} tape", image.format());
        self.drives[unit].attach(image, now);
    }

    /// Unmount `unit`, returning the image so the host can write it back
    /// (the usual policy: persist iff [`TapeImage::dirty`]). Detaching a
    /// transport that is in selected, commanded motion raises a select
    /// error.
    pub fn detach<S: Scheduler>(&mut self, unit: usize, sched: &mut S) -> Option<TapeImage> {
        if sched.is_active(unit) {
            sched.cancel(unit);
            if self.selected_unit() == Some(unit) && self.status_a & status_a::START != 0 {
                self.status_b |= status_b::ERF | status_b::SEL | status_b::DTF;
            }
        }
        self.drives[unit].clear()
    }

    /// Enable or disable a transport. Commands addressed to a disabled
    /// transport fail with a select error.
    pub fn set_enabled(&mut self, unit: usize, enabled: bool) {
        self.drives[unit].enabled = enabled;
    }

    /// Set or clear the write lock on a transport.
    pub fn set_write_locked(&mut self, unit: usize, locked: bool) {
        self.drives[unit].write_locked = locked;
    }

    /// Reset the subsystem. A warm reset keeps moving transports
    /// position-continuous by decelerating them; a cold reset zeroes
    /// everything.
    pub fn reset<S: Scheduler>(&mut self, kind: ResetKind, sched: &mut S) {
        for unit in 0..NUM_DRIVES {
            match kind {
                ResetKind::Warm => {
                    let mot = self.drives[unit].state.current().motion;
                    if let Motion::Accel(dir) | Motion::AtSpeed(dir) = mot {
                        if self.update_position(unit, sched) {
                            continue;
                        }
                        sched.cancel(unit);
                        sched.activate(unit, Ticks::new(self.timing.decel_time()));
                        self.drives[unit].state =
                            StateStack::only(MotionStep::new(Motion::Decel(dir), None));
                    }
                }
                ResetKind::Cold => {
                    sched.cancel(unit);
                    self.drives[unit].state = StateStack::default();
                    self.drives[unit].last_update = sched.now();
                }
            }
        }
        self.status_a = 0;
        self.status_b = 0;
    }

    // -----------------------------------------------------------------------
    // Motion-transition engine
    // -----------------------------------------------------------------------

    /// Spin down the currently selected transport before the unit field
    /// changes. A moving transport must never touch the shared registers
    /// once another unit owns them, so it is handed the off-reel
    /// pseudo-function and coasts away to detach itself.
    fn deselect<S: Scheduler>(&mut self, sched: &mut S) {
        let Some(unit) = self.selected_unit() else {
            return;
        };
        match self.drives[unit].state.current().motion {
            Motion::AtSpeed(dir) => {
                let step = MotionStep::new(Motion::AtSpeed(dir), Some(Func::OffReel));
                self.launch(unit, StateStack::only(step), sched);
            }
            Motion::Accel(dir) => {
                self.drives[unit]
                    .state
                    .set_second(MotionStep::new(Motion::AtSpeed(dir), Some(Func::OffReel)));
            }
            _ => {}
        }
    }

    /// Classify and apply a command-register change for an addressable
    /// transport.
    fn new_command<S: Scheduler>(&mut self, unit: usize, sched: &mut S) {
        if !self.drives[unit].is_attached() {
            self.set_error(Some(unit), status_b::SEL, sched);
            return;
        }
        let prev_mot = self.drives[unit].state.current().motion;
        let prev_moving = prev_mot.is_moving();
        let prev_dir = prev_mot.dir().unwrap_or(Dir::Fwd);
        let new_moving = self.status_a & status_a::START != 0;
        let new_dir = if self.status_a & status_a::REVERSE != 0 {
            Dir::Rev
        } else {
            Dir::Fwd
        };
        let new_func = Func::from_code(self.status_a & status_a::FNC_MASK);
        let accel = Ticks::new(self.timing.accel_time());
        let decel = Ticks::new(self.timing.decel_time());

        // Stop to stop: nothing to do.
        if !prev_moving && !new_moving {
            return;
        }

        // Stop to start: ramp up, then run the function at speed.
        if new_moving && !prev_moving {
            if self.update_position(unit, sched) {
                return;
            }
            sched.cancel(unit);
            sched.activate(unit, accel);
            let drive = &mut self.drives[unit];
            drive.state = StateStack::only(MotionStep::new(Motion::Accel(new_dir), None));
            drive
                .state
                .set_second(MotionStep::new(Motion::AtSpeed(new_dir), new_func));
            return;
        }

        // Start to stop: ramp down, unless already doing so.
        if prev_moving && !new_moving {
            if !matches!(prev_mot, Motion::Decel(_)) {
                if self.update_position(unit, sched) {
                    return;
                }
                sched.cancel(unit);
                sched.activate(unit, decel);
            }
            self.drives[unit].state =
                StateStack::only(MotionStep::new(Motion::Decel(prev_dir), None));
            return;
        }

        // Direction change under way: decelerate, then ramp up the other
        // way, then run the function.
        if prev_dir != new_dir {
            if !matches!(prev_mot, Motion::Decel(_)) {
                if self.update_position(unit, sched) {
                    return;
                }
                sched.cancel(unit);
                sched.activate(unit, decel);
            }
            let drive = &mut self.drives[unit];
            drive.state = StateStack::only(MotionStep::new(Motion::Decel(prev_dir), None));
            drive
                .state
                .set_second(MotionStep::new(Motion::Accel(new_dir), None));
            drive
                .state
                .set_third(MotionStep::new(Motion::AtSpeed(new_dir), new_func));
            return;
        }

        // Same direction but still decelerating from an earlier command:
        // ramp back up.
        if !prev_mot.is_driven() {
            if self.update_position(unit, sched) {
                return;
            }
            sched.cancel(unit);
            sched.activate(unit, accel);
            let drive = &mut self.drives[unit];
            drive.state = StateStack::only(MotionStep::new(Motion::Accel(new_dir), None));
            drive
                .state
                .set_second(MotionStep::new(Motion::AtSpeed(new_dir), new_func));
            return;
        }

        // Accelerating the right way: just swap in the new function.
        if matches!(prev_mot, Motion::Accel(_)) {
            self.drives[unit]
                .state
                .set_second(MotionStep::new(Motion::AtSpeed(new_dir), new_func));
            return;
        }

        // At speed the right way: launch immediately.
        let step = MotionStep::new(Motion::AtSpeed(new_dir), new_func);
        self.launch(unit, StateStack::only(step), sched);
    }

    // -----------------------------------------------------------------------
    // Function launcher
    // -----------------------------------------------------------------------

    /// Begin functional processing on a transport that is (or has just
    /// come) up to speed: integrate position, adopt the new state, and
    /// schedule the first functional event.
    fn launch<S: Scheduler>(&mut self, unit: usize, new_state: StateStack, sched: &mut S) {
        let old_pos = self.drives[unit].position;
        if self.update_position(unit, sched) {
            return;
        }
        let step = new_state.current();
        let dir = step.motion.dir().unwrap_or(Dir::Fwd);
        let (g, pos) = {
            let drive = &mut self.drives[unit];
            drive.state = new_state;
            if drive.position == old_pos {
                // Bump one line so the block-offset math below is
                // well defined.
                drive.position = match dir {
                    Dir::Rev => drive.position.saturating_sub(1),
                    Dir::Fwd => drive.position + 1,
                };
            }
            (drive.geometry, drive.position)
        };

        let wrong_ez = match dir {
            Dir::Rev => g.in_reverse_ez(pos),
            Dir::Fwd => g.in_forward_ez(pos),
        };
        if wrong_ez {
            self.set_error(Some(unit), status_b::END, sched);
            return;
        }

        sched.cancel(unit);
        self.substate = substate::START_OF_BLOCK;
        let blk = g.block_of(pos);
        let line = self.timing.line_time();
        let Some(func) = step.func else {
            // Unassigned function code.
            self.set_error(Some(unit), status_b::SEL, sched);
            return;
        };

        const BLOCK_NUM_LINES: u32 = BLOCK_NUM_WORD * WORD_LINES;
        let target: i64 = match func {
            Func::OffReel => match dir {
                Dir::Rev => -1000,
                Dir::Fwd => i64::from(g.forward_ez() + END_ZONE_LINES + 1000),
            },
            Func::Move => {
                trace!("unit {unit}: moving {dir:?}");
                let target = match dir {
                    Dir::Rev => END_ZONE_LINES - WORD_LINES,
                    Dir::Fwd => g.forward_ez() + WORD_LINES,
                };
                sched.activate(unit, Ticks::new(u64::from(target.abs_diff(pos)) * line));
                return;
            }
            Func::Search => {
                trace!("unit {unit}: searching {dir:?}");
                match dir {
                    // Land on the block-number word of the adjacent block
                    // in the motion direction.
                    Dir::Rev => {
                        let base = if g.in_forward_ez(pos) { g.blocks } else { blk };
                        i64::from(g.block_start(base)) - i64::from(BLOCK_NUM_LINES + WORD_LINES)
                    }
                    Dir::Fwd => {
                        let base = if g.in_reverse_ez(pos) { 0 } else { blk + 1 };
                        i64::from(g.block_start(base) + BLOCK_NUM_LINES + (WORD_LINES - 1))
                    }
                }
            }
            Func::Read | Func::Write | Func::ReadAll | Func::WriteAll => {
                if matches!(func, Func::ReadAll | Func::WriteAll) {
                    debug!("unit {unit}: {func:?} block {blk} {dir:?}");
                }
                let target = if g.in_end_zone(pos) {
                    // Starting from the permissible end zone: run in to
                    // the first word boundary of the block area.
                    match dir {
                        Dir::Rev => g.forward_ez() - WORD_LINES,
                        Dir::Fwd => END_ZONE_LINES + (WORD_LINES - 1),
                    }
                } else {
                    // Align to the word boundary ahead: word end going
                    // forward, word start going reverse.
                    let word_start = (pos / WORD_LINES) * WORD_LINES;
                    match dir {
                        Dir::Fwd => word_start + (WORD_LINES - 1),
                        Dir::Rev => word_start,
                    }
                };
                i64::from(target)
            }
        };

        if func.is_write() {
            // The host owes the first word before the tape reaches it.
            self.status_b |= status_b::DTF;
        }
        sched.activate(unit, Ticks::new(target.abs_diff(i64::from(pos)) * line));
    }

    // -----------------------------------------------------------------------
    // Event service
    // -----------------------------------------------------------------------

    /// Scheduled-event callback for `unit`. The host calls this when a
    /// delay requested through the [`Scheduler`] expires.
    pub fn service<S: Scheduler>(&mut self, unit: usize, sched: &mut S) {
        let state = self.drives[unit].state;
        match state.current().motion {
            Motion::Decel(_) => {
                if self.update_position(unit, sched) {
                    return;
                }
                let drive = &mut self.drives[unit];
                drive.state.advance();
                if drive.state.current().motion.is_moving() {
                    // A reversal was queued behind the ramp-down.
                    sched.activate(unit, Ticks::new(self.timing.accel_time()));
                }
            }
            Motion::Accel(_) => {
                self.launch(unit, state.advanced(), sched);
            }
            Motion::AtSpeed(dir) => {
                self.service_at_speed(unit, dir, state.current().func, sched);
            }
            Motion::Stop => {
                // No event should ever find a stopped transport.
                self.set_error(Some(unit), status_b::SEL, sched);
            }
        }
    }

    fn service_at_speed<S: Scheduler>(
        &mut self,
        unit: usize,
        dir: Dir,
        func: Option<Func>,
        sched: &mut S,
    ) {
        if self.update_position(unit, sched) {
            return;
        }
        let g = self.drives[unit].geometry;
        let pos = self.drives[unit].position;
        if g.in_end_zone(pos) {
            self.set_error(Some(unit), status_b::END, sched);
            return;
        }
        let blk = g.block_of(pos);
        let Some(func) = func else {
            self.set_error(Some(unit), status_b::SEL, sched);
            return;
        };
        match func {
            // A move's only event is end-zone arrival.
            Func::Move => self.set_error(Some(unit), status_b::END, sched),
            Func::OffReel => {
                // Deselected coast-out has left the reel: detach quietly.
                sched.cancel(unit);
                if let Some(image) = self.drives[unit].clear() {
                    self.ejected.push((unit, image));
                }
            }
            Func::Search => {
                if self.timing_error(unit, sched) {
                    return;
                }
                sched.activate(
                    unit,
                    Ticks::new(u64::from(g.lines_per_block()) * self.timing.line_time()),
                );
                self.data_buffer = blk;
                self.status_b |= status_b::DTF;
            }
            Func::Read | Func::ReadAll => self.service_read(unit, dir, func, blk, sched),
            Func::Write | Func::WriteAll => self.service_write(unit, dir, func, blk, sched),
        }
    }

    fn service_read<S: Scheduler>(
        &mut self,
        unit: usize,
        dir: Dir,
        func: Func,
        blk: u32,
        sched: &mut S,
    ) {
        if self.timing_error(unit, sched) {
            return;
        }
        sched.activate(unit, Ticks::new(self.timing.word_time()));

        let drive = &self.drives[unit];
        let g = drive.geometry;
        let offset = g.offset_of(drive.position);
        let Some(image) = drive.image.as_ref() else {
            self.set_error(Some(unit), status_b::SEL, sched);
            return;
        };

        let mut published = None;
        let mut block_end = false;
        if g.in_data_zone(offset) {
            let word = (offset - HT_LINES) / WORD_LINES;
            published = Some(image.fetch((blk * g.block_words + word) as usize));
        } else {
            let frame_word = offset / WORD_LINES;
            let fwd_csum = g.fwd_csum_word();
            // The end-adjacent words are never serviced; a plain read
            // additionally skips everything but the two checksum slots.
            let skip = frame_word == 0
                || frame_word == g.frame_words() - 1
                || (func == Func::Read && frame_word != CSUM_WORD && frame_word != fwd_csum);
            if !skip {
                published = Some(headers::header_word(image, blk, frame_word));
                // The final relevant word in the motion direction ends
                // the block instead of requesting the next word.
                block_end = frame_word
                    == match dir {
                        Dir::Rev => CSUM_WORD,
                        Dir::Fwd => fwd_csum,
                    };
            }
        }

        if let Some(mut word) = published {
            if dir == Dir::Rev {
                word = headers::complement_obverse(word);
            }
            self.data_buffer = word;
            self.status_b |= if block_end { status_b::BEF } else { status_b::DTF };
        }
    }

    fn service_write<S: Scheduler>(
        &mut self,
        unit: usize,
        dir: Dir,
        func: Func,
        blk: u32,
        sched: &mut S,
    ) {
        if self.timing_error(unit, sched) {
            return;
        }
        sched.activate(unit, Ticks::new(self.timing.word_time()));

        let data = self.data_buffer;
        let drive = &mut self.drives[unit];
        let g = drive.geometry;
        let offset = g.offset_of(drive.position);

        let flag = if g.in_data_zone(offset) {
            let word = (offset - HT_LINES) / WORD_LINES;
            let Some(image) = drive.image.as_mut() else {
                self.set_error(Some(unit), status_b::SEL, sched);
                return;
            };
            let stored = match dir {
                Dir::Rev => headers::complement_obverse(data),
                Dir::Fwd => data,
            };
            image.store((blk * g.block_words + word) as usize, stored);
            let last = match dir {
                Dir::Rev => 0,
                Dir::Fwd => g.block_words - 1,
            };
            Some(word == last)
        } else {
            let frame_word = offset / WORD_LINES;
            // Interblock words land in the bit bucket; write-all still
            // paces the host through them, a plain write only wakes up
            // for the checksum slot.
            let skip = frame_word == 0
                || frame_word == g.frame_words() - 1
                || (func == Func::Write && frame_word != g.fwd_csum_word());
            if skip {
                None
            } else {
                Some(false)
            }
        };

        match flag {
            Some(true) => self.status_b |= status_b::BEF,
            Some(false) => self.status_b |= status_b::DTF,
            None => {}
        }
    }

    /// Raise a timing error if the host has not yet serviced the
    /// previous word.
    fn timing_error<S: Scheduler>(&mut self, unit: usize, sched: &mut S) -> bool {
        if self.status_b & status_b::DTF != 0 {
            self.set_error(Some(unit), status_b::TIM, sched);
            return true;
        }
        false
    }

    // -----------------------------------------------------------------------
    // Position integration and errors
    // -----------------------------------------------------------------------

    /// Bring `unit`'s position up to the present. Returns true when the
    /// tape ran off the reel, in which case the transport has detached
    /// itself (with a select error if it was the selected unit).
    fn update_position<S: Scheduler>(&mut self, unit: usize, sched: &mut S) -> bool {
        let now = sched.now();
        let drive = &mut self.drives[unit];
        let elapsed = now.since(drive.last_update);
        if elapsed == 0 {
            return false;
        }
        drive.last_update = now;
        let motion = drive.state.current().motion;
        let delta = i64::try_from(travel(motion, elapsed, &self.timing)).unwrap_or(i64::MAX);
        let mut pos = i64::from(drive.position);
        match motion.dir() {
            Some(Dir::Rev) => pos -= delta,
            _ => pos += delta,
        }
        let limit = i64::from(drive.geometry.forward_ez() + END_ZONE_LINES);
        if pos < 0 || pos > limit {
            debug!("unit {unit}: ran off the reel");
            let image = self.drives[unit].clear();
            sched.cancel(unit);
            if let Some(image) = image {
                self.ejected.push((unit, image));
            }
            if self.selected_unit() == Some(unit) {
                self.set_error(Some(unit), status_b::SEL, sched);
            }
            return true;
        }
        drive.position = pos as u32;
        false
    }

    /// Raise an error: drop start/stop, latch the error bits, and bring
    /// a driven transport to a controlled stop.
    fn set_error<S: Scheduler>(&mut self, unit: Option<usize>, error: u32, sched: &mut S) {
        debug!("error {error:#o} on unit {unit:?}");
        self.status_a &= !status_a::START;
        self.status_b |= status_b::ERF | error;
        if let Some(unit) = unit {
            let motion = self.drives[unit].state.current().motion;
            if let Motion::Accel(dir) | Motion::AtSpeed(dir) = motion {
                sched.cancel(unit);
                if self.update_position(unit, sched) {
                    return;
                }
                sched.activate(unit, Ticks::new(self.timing.decel_time()));
                self.drives[unit].state =
                    StateStack::only(MotionStep::new(Motion::Decel(dir), None));
            }
        }
    }

    // -----------------------------------------------------------------------
    // Inspection
    // -----------------------------------------------------------------------

    #[must_use]
    pub fn status_a(&self) -> u32 {
        self.status_a
    }

    /// Status B as latched, without the MRS recomputation.
    #[must_use]
    pub fn status_b(&self) -> u32 {
        self.status_b
    }

    #[must_use]
    pub fn data_buffer(&self) -> u32 {
        self.data_buffer
    }

    #[must_use]
    pub fn substate(&self) -> u32 {
        self.substate
    }

    #[must_use]
    pub fn drive(&self, unit: usize) -> &Drive {
        &self.drives[unit]
    }

    #[must_use]
    pub fn timing(&self) -> &TimingParams {
        &self.timing
    }

    /// Images that came off their reel since the last call. The host
    /// applies its write-back policy to each.
    pub fn take_ejected(&mut self) -> Vec<(usize, TapeImage)> {
        std::mem::take(&mut self.ejected)
    }
}

impl Default for Type550 {
    fn default() -> Self {
        Self::new(TimingParams::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use format_dectape::TapeFormat;
    use sim_core::EventQueue;

    fn command(unit_field: u32, go: bool, dir: Dir, code: u32) -> u32 {
        let mut word = (unit_field << status_a::UNIT_SHIFT) | code;
        if go {
            word |= status_a::START;
        }
        if dir == Dir::Rev {
            word |= status_a::REVERSE;
        }
        word
    }

    fn controller_with_tape(unit: usize) -> (Type550, EventQueue) {
        let mut ctrl = Type550::default();
        let queue = EventQueue::new(NUM_DRIVES);
        ctrl.attach(unit, TapeImage::blank(TapeFormat::Native18), queue.now());
        (ctrl, queue)
    }

    #[test]
    fn unit_map_is_type_550() {
        assert_eq!(Type550::unit_index(0), None);
        for field in 1..=7 {
            assert_eq!(Type550::unit_index(field), Some(field as usize));
        }
        assert_eq!(Type550::unit_index(8), Some(0));
        for field in 9..=15 {
            assert_eq!(Type550::unit_index(field), None);
        }
    }

    #[test]
    fn mse_selects_and_clears_flags() {
        let (mut ctrl, mut q) = controller_with_tape(1);
        ctrl.status_b = status_b::DTF | status_b::ERF | status_b::SEL;
        ctrl.mse(command(1, false, Dir::Fwd, 0), &mut q);
        assert_eq!(ctrl.selected_unit(), Some(1));
        assert_eq!(ctrl.status_b() & (status_b::DTF | status_b::ERF | status_b::SEL), 0);
        assert!(!ctrl.interrupt_request());
    }

    #[test]
    fn mlc_without_valid_unit_is_select_error() {
        let mut ctrl = Type550::default();
        let mut q = EventQueue::new(NUM_DRIVES);
        ctrl.mlc(command(0, true, Dir::Fwd, 0o2), &mut q);
        assert_ne!(ctrl.status_b() & status_b::SEL, 0);
        assert_ne!(ctrl.status_b() & status_b::ERF, 0);
        assert_eq!(ctrl.status_a() & status_a::START, 0);
        assert!(ctrl.interrupt_request());
    }

    #[test]
    fn mlc_on_unattached_drive_is_select_error() {
        let mut ctrl = Type550::default();
        let mut q = EventQueue::new(NUM_DRIVES);
        ctrl.mse(command(3, false, Dir::Fwd, 0), &mut q);
        ctrl.mlc(command(3, true, Dir::Fwd, 0o2), &mut q);
        assert_ne!(ctrl.status_b() & status_b::SEL, 0);
    }

    #[test]
    fn mlc_on_disabled_drive_is_select_error() {
        let (mut ctrl, mut q) = controller_with_tape(1);
        ctrl.set_enabled(1, false);
        ctrl.mse(command(1, false, Dir::Fwd, 0), &mut q);
        ctrl.mlc(command(1, true, Dir::Fwd, 0o2), &mut q);
        assert_ne!(ctrl.status_b() & status_b::SEL, 0);
    }

    #[test]
    fn write_mark_is_rejected() {
        let (mut ctrl, mut q) = controller_with_tape(1);
        ctrl.mse(command(1, false, Dir::Fwd, 0), &mut q);
        ctrl.mlc(command(1, true, Dir::Fwd, 0o7), &mut q);
        assert_ne!(ctrl.status_b() & status_b::SEL, 0);
        assert!(!q.is_active(1));
    }

    #[test]
    fn write_on_locked_drive_is_select_error() {
        let (mut ctrl, mut q) = controller_with_tape(1);
        ctrl.set_write_locked(1, true);
        ctrl.mse(command(1, false, Dir::Fwd, 0), &mut q);
        ctrl.mlc(command(1, true, Dir::Fwd, 0o3), &mut q);
        assert_ne!(ctrl.status_b() & status_b::SEL, 0);

        // Reading a locked drive is fine.
        ctrl.mse(command(1, false, Dir::Fwd, 0), &mut q);
        ctrl.mlc(command(1, true, Dir::Fwd, 0o2), &mut q);
        assert_eq!(ctrl.status_b() & status_b::SEL, 0);
    }

    #[test]
    fn mrd_and_mwr_exchange_the_buffer() {
        let mut ctrl = Type550::default();
        ctrl.status_b = status_b::DTF;
        ctrl.mwr(0o123_456);
        assert_eq!(ctrl.status_b() & status_b::DTF, 0);
        ctrl.status_b = status_b::BEF;
        assert_eq!(ctrl.mrd(), 0o123_456);
        assert_eq!(ctrl.status_b() & status_b::BEF, 0);
    }

    #[test]
    fn mwr_masks_to_18_bits() {
        let mut ctrl = Type550::default();
        ctrl.mwr(0xFFFF_FFFF);
        assert_eq!(ctrl.mrd(), WORD_MASK);
    }

    #[test]
    fn mrs_reports_go_and_reverse() {
        let (mut ctrl, mut q) = controller_with_tape(1);
        ctrl.mse(command(1, false, Dir::Fwd, 0), &mut q);
        assert_eq!(ctrl.mrs() & (status_b::GO | status_b::REV), 0);

        ctrl.mlc(command(1, true, Dir::Rev, 0o0), &mut q);
        let status = ctrl.mrs();
        assert_ne!(status & status_b::GO, 0);
        assert_ne!(status & status_b::REV, 0);
    }

    #[test]
    fn go_is_reported_while_a_transition_is_queued() {
        let (mut ctrl, mut q) = controller_with_tape(1);
        ctrl.mse(command(1, false, Dir::Fwd, 0), &mut q);
        ctrl.mlc(command(1, true, Dir::Fwd, 0o0), &mut q);
        // Ride through accel into at-speed, then command a stop: the
        // transport is decelerating with nothing queued, but a stop is
        // not "go" either.
        q.pop_next();
        ctrl.service(1, &mut q);
        ctrl.mlc(command(1, false, Dir::Fwd, 0o0), &mut q);
        assert_eq!(ctrl.mrs() & status_b::GO, 0);

        // Reverse while decelerating: the queued reversal reports go.
        ctrl.mlc(command(1, true, Dir::Rev, 0o0), &mut q);
        assert_ne!(ctrl.mrs() & status_b::GO, 0);
    }

    #[test]
    fn command_ramps_up_then_runs_function() {
        let (mut ctrl, mut q) = controller_with_tape(1);
        ctrl.mse(command(1, false, Dir::Fwd, 0), &mut q);
        ctrl.mlc(command(1, true, Dir::Fwd, 0o1), &mut q);
        assert_eq!(ctrl.drive(1).motion(), Motion::Accel(Dir::Fwd));

        let (time, unit) = q.pop_next().expect("accel event");
        assert_eq!(unit, 1);
        assert_eq!(time, Ticks::new(54_000));
        ctrl.service(1, &mut q);
        assert_eq!(ctrl.drive(1).motion(), Motion::AtSpeed(Dir::Fwd));
        // Ramp-up covered half the at-speed distance.
        assert_eq!(ctrl.drive(1).position(), END_ZONE_LINES + 2250);
        assert!(q.is_active(1));
    }

    #[test]
    fn deselect_while_accelerating_queues_off_reel() {
        let (mut ctrl, mut q) = controller_with_tape(1);
        ctrl.mse(command(1, false, Dir::Fwd, 0), &mut q);
        ctrl.mlc(command(1, true, Dir::Fwd, 0o1), &mut q);
        ctrl.mse(command(2, false, Dir::Fwd, 0), &mut q);

        // The old transport keeps its accel event, then coasts off reel.
        q.pop_next();
        ctrl.service(1, &mut q);
        assert_eq!(ctrl.drive(1).motion(), Motion::AtSpeed(Dir::Fwd));
        assert_eq!(ctrl.drive(1).state.current().func, Some(Func::OffReel));

        // It self-detaches without disturbing the controller registers.
        q.pop_next();
        ctrl.service(1, &mut q);
        assert!(!ctrl.drive(1).is_attached());
        assert_eq!(ctrl.status_b() & status_b::ALL_ERRORS, 0);
        let ejected = ctrl.take_ejected();
        assert_eq!(ejected.len(), 1);
        assert_eq!(ejected[0].0, 1);
    }

    #[test]
    fn detach_in_commanded_motion_is_select_error() {
        let (mut ctrl, mut q) = controller_with_tape(1);
        ctrl.mse(command(1, false, Dir::Fwd, 0), &mut q);
        ctrl.mlc(command(1, true, Dir::Fwd, 0o1), &mut q);
        let image = ctrl.detach(1, &mut q);
        assert!(image.is_some());
        assert!(!q.is_active(1));
        assert_ne!(ctrl.status_b() & status_b::SEL, 0);
        assert_ne!(ctrl.status_b() & status_b::DTF, 0);
    }

    #[test]
    fn cold_reset_zeroes_everything() {
        let (mut ctrl, mut q) = controller_with_tape(1);
        ctrl.mse(command(1, false, Dir::Fwd, 0), &mut q);
        ctrl.mlc(command(1, true, Dir::Fwd, 0o1), &mut q);
        ctrl.reset(ResetKind::Cold, &mut q);
        assert_eq!(ctrl.status_a(), 0);
        assert_eq!(ctrl.status_b(), 0);
        assert_eq!(ctrl.drive(1).motion(), Motion::Stop);
        assert!(!q.is_active(1));
    }

    #[test]
    fn warm_reset_decelerates_moving_drives() {
        let (mut ctrl, mut q) = controller_with_tape(1);
        ctrl.mse(command(1, false, Dir::Fwd, 0), &mut q);
        ctrl.mlc(command(1, true, Dir::Fwd, 0o1), &mut q);
        q.pop_next();
        ctrl.service(1, &mut q); // now at speed
        let pos = ctrl.drive(1).position();

        ctrl.reset(ResetKind::Warm, &mut q);
        assert_eq!(ctrl.drive(1).motion(), Motion::Decel(Dir::Fwd));
        assert!(q.is_active(1));
        // Position was integrated, not discarded.
        assert!(ctrl.drive(1).position() >= pos);

        let (_, unit) = q.pop_next().expect("decel event");
        ctrl.service(unit, &mut q);
        assert_eq!(ctrl.drive(1).motion(), Motion::Stop);
    }

    #[test]
    fn error_flag_implies_a_specific_error() {
        let (mut ctrl, mut q) = controller_with_tape(1);
        // Drive a handful of command sequences, some erroring.
        ctrl.mse(command(1, false, Dir::Fwd, 0), &mut q);
        ctrl.mlc(command(1, true, Dir::Fwd, 0o2), &mut q);
        ctrl.mlc(command(1, true, Dir::Fwd, 0o7), &mut q);
        ctrl.mse(command(12, false, Dir::Fwd, 0), &mut q);
        ctrl.mlc(command(12, true, Dir::Fwd, 0o1), &mut q);
        let b = ctrl.status_b();
        assert_eq!(b & status_b::ERF != 0, b & status_b::ALL_ERRORS != 0);
        if b & status_b::ERF != 0 {
            assert_eq!(ctrl.status_a() & status_a::START, 0);
        }
    }
}
