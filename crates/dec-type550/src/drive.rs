//! A single DECtape transport.

use format_dectape::{Geometry, TapeImage, END_ZONE_LINES};
use sim_core::Ticks;

use crate::motion::{Motion, StateStack};

/// One of the eight transports hanging off the controller.
///
/// Position is tracked in tape lines and only integrated on demand from
/// the simulated time elapsed since `last_update` (see
/// [`crate::motion::travel`]); nothing ticks per line.
#[derive(Debug)]
pub struct Drive {
    pub(crate) image: Option<TapeImage>,
    pub(crate) geometry: Geometry,
    pub(crate) enabled: bool,
    pub(crate) write_locked: bool,
    /// On-reel position in lines. Line 0 starts the reverse end zone.
    pub(crate) position: u32,
    /// When `position` was last integrated.
    pub(crate) last_update: Ticks,
    pub(crate) state: StateStack,
}

impl Drive {
    pub(crate) fn new() -> Self {
        Self {
            image: None,
            geometry: Geometry::D18,
            enabled: true,
            write_locked: false,
            position: 0,
            last_update: Ticks::ZERO,
            state: StateStack::default(),
        }
    }

    pub(crate) fn attach(&mut self, image: TapeImage, now: Ticks) {
        self.geometry = image.geometry();
        self.image = Some(image);
        self.position = END_ZONE_LINES;
        self.last_update = now;
    }

    /// Zero motion state and position, give back the image, and fall back
    /// to the default geometry.
    pub(crate) fn clear(&mut self) -> Option<TapeImage> {
        self.position = 0;
        self.state = StateStack::default();
        self.geometry = Geometry::D18;
        self.image.take()
    }

    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.image.is_some()
    }

    #[must_use]
    pub fn position(&self) -> u32 {
        self.position
    }

    #[must_use]
    pub fn motion(&self) -> Motion {
        self.state.current().motion
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    #[must_use]
    pub fn write_protected(&self) -> bool {
        self.write_locked || self.image.as_ref().is_some_and(TapeImage::read_only)
    }

    #[must_use]
    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    /// Read a word of the mounted image, for hosts that peek at tape
    /// contents (debuggers, deposit/examine).
    #[must_use]
    pub fn peek_word(&self, addr: usize) -> Option<u32> {
        self.image.as_ref().map(|image| image.fetch(addr))
    }
}
