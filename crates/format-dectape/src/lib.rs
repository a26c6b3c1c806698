//! DECtape image files and the in-memory tape they become.
//!
//! A tape image on disk only contains data words; headers, checksums and
//! the mark track are reconstructed by the controller. Three file formats
//! exist, all converted to the native 18-bit in-memory representation at
//! load time:
//!
//! | format  | on-disk word             | block              |
//! |---------|--------------------------|--------------------|
//! | 18b/36b | 32-bit LE, 18 bits used  | 256 words          |
//! | 16b     | 16-bit LE                | 256 words          |
//! | 12b     | 16-bit LE, 12 bits used  | 129 words -> 86    |
//!
//! The 12b format packs three 12-bit words into two native words:
//! `(A<<6 | B>>6, (B & 077)<<12 | C)`. Saving applies the exact inverse,
//! so a load/save round trip reproduces the original bytes.

mod geometry;

pub use geometry::{
    Geometry, BLOCK_NUM_WORD, CSUM_WORD, END_ZONE_LINES, HT_LINES, HT_WORDS, WORD_LINES, WORD_MASK,
};

use log::debug;

/// On-disk encoding of a tape image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TapeFormat {
    /// 32-bit little-endian words, low 18 bits significant.
    #[default]
    Native18,
    /// 16-bit little-endian words, zero-extended to 18 bits.
    Packed16,
    /// 16-bit little-endian words, low 12 bits significant, packed 3-to-2.
    Packed12,
}

impl TapeFormat {
    #[must_use]
    pub const fn geometry(self) -> Geometry {
        match self {
            Self::Native18 | Self::Packed16 => Geometry::D18,
            Self::Packed12 => Geometry::D12,
        }
    }

    /// Exact byte size of a full image in this encoding.
    #[must_use]
    pub const fn file_size(self) -> usize {
        let g = self.geometry();
        match self {
            Self::Native18 => g.capacity_words() as usize * 4,
            Self::Packed16 => g.capacity_words() as usize * 2,
            // 129 on-disk words per 86-word block.
            Self::Packed12 => (g.blocks * PACKED12_GROUP_DISK) as usize * 2,
        }
    }
}

/// On-disk 12-bit words per transcode group (one 86-native-word block).
const PACKED12_GROUP_DISK: u32 = 129;

/// Native words per transcode group.
const PACKED12_GROUP_NATIVE: u32 = 86;

#[derive(thiserror::Error, Debug)]
pub enum FormatError {
    #[error("image holds {words} words, over the {capacity}-word tape capacity")]
    Oversize { words: usize, capacity: usize },
}

/// An attached tape, buffered in memory as native 18-bit words.
///
/// The word buffer always spans the full tape capacity; loading a short
/// file leaves the remainder zeroed. The high-water mark tracks how many
/// words are worth writing back at detach.
#[derive(Debug, Clone)]
pub struct TapeImage {
    words: Vec<u32>,
    format: TapeFormat,
    high_water: usize,
    read_only: bool,
}

impl TapeImage {
    /// A blank, fully-zeroed tape. Nothing is written back at detach
    /// until a word is stored.
    #[must_use]
    pub fn blank(format: TapeFormat) -> Self {
        Self {
            words: vec![0; format.geometry().capacity_words() as usize],
            format,
            high_water: 0,
            read_only: false,
        }
    }

    /// Decode an image file. `forced` pins the encoding (the attach-time
    /// `-R`/`-S` switches, or `-T` as `Some(Native18)`); `None` autosizes
    /// on the exact 16b and 12b file sizes and falls back to 18b.
    pub fn load(bytes: &[u8], forced: Option<TapeFormat>) -> Result<Self, FormatError> {
        let format = forced.unwrap_or_else(|| Self::autosize(bytes.len()));
        let mut image = Self::blank(format);
        image.high_water = match format {
            TapeFormat::Native18 => image.decode_18b(bytes)?,
            TapeFormat::Packed16 => image.decode_16b(bytes)?,
            TapeFormat::Packed12 => image.decode_12b(bytes)?,
        };
        debug!(
            "decoded {:?} image: {} of {} words",
            format,
            image.high_water,
            image.words.len()
        );
        Ok(image)
    }

    fn autosize(len: usize) -> TapeFormat {
        if len == TapeFormat::Packed12.file_size() {
            TapeFormat::Packed12
        } else if len == TapeFormat::Packed16.file_size() {
            TapeFormat::Packed16
        } else {
            TapeFormat::Native18
        }
    }

    fn decode_18b(&mut self, bytes: &[u8]) -> Result<usize, FormatError> {
        let count = bytes.len() / 4;
        self.check_capacity(count)?;
        for (word, chunk) in self.words.iter_mut().zip(bytes.chunks_exact(4)) {
            *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        Ok(count)
    }

    fn decode_16b(&mut self, bytes: &[u8]) -> Result<usize, FormatError> {
        let count = bytes.len() / 2;
        self.check_capacity(count)?;
        for (word, chunk) in self.words.iter_mut().zip(bytes.chunks_exact(2)) {
            *word = u32::from(u16::from_le_bytes([chunk[0], chunk[1]]));
        }
        Ok(count)
    }

    fn decode_12b(&mut self, bytes: &[u8]) -> Result<usize, FormatError> {
        let disk_words: Vec<u32> = bytes
            .chunks_exact(2)
            .map(|c| u32::from(u16::from_le_bytes([c[0], c[1]])))
            .collect();
        let groups = disk_words.len().div_ceil(PACKED12_GROUP_DISK as usize);
        self.check_capacity(groups * PACKED12_GROUP_NATIVE as usize)?;
        let mut na = 0;
        for group in disk_words.chunks(PACKED12_GROUP_DISK as usize) {
            let mut buf = [0u32; PACKED12_GROUP_DISK as usize];
            buf[..group.len()].copy_from_slice(group);
            for k in (0..buf.len()).step_by(3) {
                let (a, b, c) = (buf[k] & 0o7777, buf[k + 1], buf[k + 2] & 0o7777);
                self.words[na] = (a << 6) | ((b >> 6) & 0o77);
                self.words[na + 1] = ((b & 0o77) << 12) | c;
                na += 2;
            }
        }
        Ok(na)
    }

    fn check_capacity(&self, words: usize) -> Result<(), FormatError> {
        if words > self.words.len() {
            return Err(FormatError::Oversize {
                words,
                capacity: self.words.len(),
            });
        }
        Ok(())
    }

    /// Encode the buffer back into the on-disk format, covering the
    /// high-water mark (rounded up to whole transcode groups for the
    /// packed formats).
    #[must_use]
    pub fn save(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self.format {
            TapeFormat::Native18 => {
                for &word in &self.words[..self.high_water] {
                    out.extend_from_slice(&word.to_le_bytes());
                }
            }
            TapeFormat::Packed16 => {
                let mut na = 0;
                while na < self.high_water {
                    for &word in &self.words[na..na + self.geometry().block_words as usize] {
                        out.extend_from_slice(&((word & 0o177_777) as u16).to_le_bytes());
                    }
                    na += self.geometry().block_words as usize;
                }
            }
            TapeFormat::Packed12 => {
                let mut na = 0;
                while na < self.high_water {
                    for _ in 0..PACKED12_GROUP_DISK / 3 {
                        let (w0, w1) = (self.words[na], self.words[na + 1]);
                        let a = (w0 >> 6) & 0o7777;
                        let b = ((w0 & 0o77) << 6) | ((w1 >> 12) & 0o77);
                        let c = w1 & 0o7777;
                        for disk in [a, b, c] {
                            out.extend_from_slice(&(disk as u16).to_le_bytes());
                        }
                        na += 2;
                    }
                }
            }
        }
        debug!("encoded {:?} image: {} bytes", self.format, out.len());
        out
    }

    #[must_use]
    pub const fn format(&self) -> TapeFormat {
        self.format
    }

    #[must_use]
    pub const fn geometry(&self) -> Geometry {
        self.format.geometry()
    }

    /// Words ever written (load or store), i.e. how much `save` covers.
    #[must_use]
    pub const fn high_water(&self) -> usize {
        self.high_water
    }

    #[must_use]
    pub const fn read_only(&self) -> bool {
        self.read_only
    }

    pub fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    /// Whether detach should write this image back to disk.
    #[must_use]
    pub const fn dirty(&self) -> bool {
        self.high_water != 0 && !self.read_only
    }

    /// The 18-bit word at word address `addr`.
    #[must_use]
    pub fn fetch(&self, addr: usize) -> u32 {
        self.words[addr] & WORD_MASK
    }

    /// Store an 18-bit word, advancing the high-water mark.
    pub fn store(&mut self, addr: usize, word: u32) {
        self.words[addr] = word & WORD_MASK;
        if addr >= self.high_water {
            self.high_water = addr + 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn autosize_matches_signatures() {
        assert_eq!(TapeImage::autosize(380_292), TapeFormat::Packed12);
        assert_eq!(TapeImage::autosize(295_936), TapeFormat::Packed16);
        assert_eq!(TapeImage::autosize(100), TapeFormat::Native18);
        assert_eq!(TapeImage::autosize(0), TapeFormat::Native18);
    }

    #[test]
    fn forced_format_wins_over_size() {
        let bytes = vec![0u8; 1024];
        let img = TapeImage::load(&bytes, Some(TapeFormat::Packed16)).expect("load");
        assert_eq!(img.format(), TapeFormat::Packed16);
    }

    #[test]
    fn short_18b_file_zero_fills() {
        let mut bytes = Vec::new();
        for w in [0o123_456u32, 0o777_777, 0o000_001] {
            bytes.extend_from_slice(&w.to_le_bytes());
        }
        let img = TapeImage::load(&bytes, None).expect("load");
        assert_eq!(img.high_water(), 3);
        assert_eq!(img.fetch(0), 0o123_456);
        assert_eq!(img.fetch(1), 0o777_777);
        assert_eq!(img.fetch(2), 0o000_001);
        assert_eq!(img.fetch(3), 0);
    }

    #[test]
    fn oversize_file_rejected() {
        let bytes = vec![0u8; TapeFormat::Native18.file_size() + 4];
        assert!(TapeImage::load(&bytes, None).is_err());
    }

    #[test]
    fn packed12_transcoding_is_exact() {
        // Three 12-bit words A, B, C pack as (A<<6 | B>>6, (B&077)<<12 | C).
        let mut bytes = Vec::new();
        for w in [0o1234u16, 0o5671, 0o7777] {
            bytes.extend_from_slice(&w.to_le_bytes());
        }
        let img = TapeImage::load(&bytes, Some(TapeFormat::Packed12)).expect("load");
        assert_eq!(img.fetch(0), (0o1234 << 6) | 0o56);
        assert_eq!(img.fetch(1), (0o71 << 12) | 0o7777);
    }

    #[test]
    fn load_save_identity_18b() {
        let mut bytes = Vec::new();
        for i in 0..TapeFormat::Native18.geometry().capacity_words() {
            bytes.extend_from_slice(&(u32::from(i) & WORD_MASK).to_le_bytes());
        }
        let img = TapeImage::load(&bytes, None).expect("load");
        assert_eq!(img.save(), bytes);
    }

    #[test]
    fn load_save_identity_16b() {
        let mut bytes = Vec::new();
        for i in 0..TapeFormat::Packed16.geometry().capacity_words() {
            bytes.extend_from_slice(&(i as u16).to_le_bytes());
        }
        assert_eq!(bytes.len(), TapeFormat::Packed16.file_size());
        let img = TapeImage::load(&bytes, None).expect("load");
        assert_eq!(img.format(), TapeFormat::Packed16);
        assert_eq!(img.save(), bytes);
    }

    #[test]
    fn load_save_identity_12b() {
        let mut bytes = Vec::new();
        for i in 0..TapeFormat::Packed12.file_size() / 2 {
            bytes.extend_from_slice(&((i as u16) & 0o7777).to_le_bytes());
        }
        let img = TapeImage::load(&bytes, None).expect("load");
        assert_eq!(img.format(), TapeFormat::Packed12);
        assert_eq!(img.save(), bytes);
    }

    #[test]
    fn store_advances_high_water() {
        let mut img = TapeImage::blank(TapeFormat::Native18);
        assert_eq!(img.high_water(), 0);
        assert!(!img.dirty());
        img.store(100, 0o707_070);
        assert_eq!(img.high_water(), 101);
        assert_eq!(img.fetch(100), 0o707_070);
        assert!(img.dirty());
    }

    #[test]
    fn store_masks_to_18_bits() {
        let mut img = TapeImage::blank(TapeFormat::Native18);
        img.store(0, 0xFFFF_FFFF);
        assert_eq!(img.fetch(0), WORD_MASK);
    }

    #[test]
    fn read_only_image_is_never_dirty() {
        let mut img = TapeImage::blank(TapeFormat::Native18);
        img.store(0, 1);
        img.set_read_only(true);
        assert!(!img.dirty());
    }

    #[test]
    fn save_covers_whole_groups_for_packed_formats() {
        let mut img = TapeImage::blank(TapeFormat::Packed12);
        img.store(0, 0o4321);
        // One native word written; save still emits a full 129-word group.
        assert_eq!(img.save().len(), 129 * 2);

        let mut img = TapeImage::blank(TapeFormat::Packed16);
        img.store(10, 0o55);
        assert_eq!(img.save().len(), 256 * 2);
    }
}
