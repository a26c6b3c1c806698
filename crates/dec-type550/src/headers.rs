//! Generated interblock words.
//!
//! Image files hold only data words, so the header and trailer words a
//! real tape carries are reconstructed on demand: block numbers from the
//! block address, the forward checksum from the block contents, and the
//! reverse checksum slot as the all-ones "no checksum" sentinel that
//! software overwrites. Everything else in the interblock zones reads 0.
//!
//! Also here: the complement obverse, the transform a reverse-moving
//! transport applies to every word. Tape is written least-significant
//! line first, so reading backwards yields the lines in reverse order
//! with every bit inverted.

use format_dectape::{Geometry, TapeImage, BLOCK_NUM_WORD, CSUM_WORD, WORD_MASK};

/// Invert all 18 bits and reverse the order of the six 3-bit lines.
/// The transform is its own inverse.
#[must_use]
pub const fn complement_obverse(word: u32) -> u32 {
    let d = !word & WORD_MASK;
    ((d >> 15) & 0o7)
        | ((d >> 9) & 0o70)
        | ((d >> 3) & 0o700)
        | ((d & 0o700) << 3)
        | ((d & 0o70) << 9)
        | ((d & 0o7) << 15)
}

/// Forward checksum of one block: 18-bit one's-complement sum of the data
/// words with end-around carry, seeded all-ones, final result inverted.
#[must_use]
pub fn block_checksum(image: &TapeImage, block: u32) -> u32 {
    let g = image.geometry();
    let base = (block * g.block_words) as usize;
    let mut sum = WORD_MASK;
    for i in 0..g.block_words as usize {
        sum += image.fetch(base + i);
        if sum > WORD_MASK {
            sum = (sum + 1) & WORD_MASK;
        }
    }
    sum ^ WORD_MASK
}

/// The word read at interblock position `frame_word` of `block`.
///
/// `frame_word` indexes the whole block frame in forward order: header
/// words 0..5, then data, then trailer.
#[must_use]
pub fn header_word(image: &TapeImage, block: u32, frame_word: u32) -> u32 {
    let g: Geometry = image.geometry();
    if frame_word == BLOCK_NUM_WORD {
        return block;
    }
    if frame_word == CSUM_WORD {
        return WORD_MASK;
    }
    if frame_word == g.fwd_csum_word() {
        return block_checksum(image, block);
    }
    if frame_word == g.rev_blknum_word() {
        return complement_obverse(block);
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use format_dectape::TapeFormat;

    #[test]
    fn complement_obverse_known_values() {
        // All-zeros inverts to all-ones; line reversal is then invisible.
        assert_eq!(complement_obverse(0), WORD_MASK);
        assert_eq!(complement_obverse(WORD_MASK), 0);
        // 0o123456 -> invert 0o654321 -> reverse lines 0o123456... spelled out:
        assert_eq!(complement_obverse(0o123_456), 0o123_456);
        assert_eq!(complement_obverse(0o700_000), 0o777_770);
    }

    #[test]
    fn complement_obverse_is_an_involution() {
        for word in [0u32, 1, 0o7, 0o70, 0o252_525, 0o525_252, 0o777_777, 0o123_456, 0o741_230] {
            assert_eq!(complement_obverse(complement_obverse(word)), word);
        }
        for i in 0..1000 {
            let word = (i * 0o1111) & WORD_MASK;
            assert_eq!(complement_obverse(complement_obverse(word)), word);
        }
    }

    /// One's-complement add with end-around carry.
    fn ones_add(a: u32, b: u32) -> u32 {
        let mut s = a + b;
        if s > WORD_MASK {
            s = (s + 1) & WORD_MASK;
        }
        s
    }

    #[test]
    fn checksum_of_zero_block_is_zero() {
        // Seed all-ones plus zero words stays all-ones; inverted -> 0.
        let img = TapeImage::blank(TapeFormat::Native18);
        assert_eq!(block_checksum(&img, 0), 0);
    }

    #[test]
    fn checksum_sums_to_all_ones() {
        let mut img = TapeImage::blank(TapeFormat::Native18);
        let g = img.geometry();
        for i in 0..g.block_words {
            img.store((7 * g.block_words + i) as usize, (i + 1) & WORD_MASK);
        }
        let csum = block_checksum(&img, 7);

        let mut total = WORD_MASK;
        for i in 0..g.block_words {
            total = ones_add(total, img.fetch((7 * g.block_words + i) as usize));
        }
        total = ones_add(total, csum);
        assert_eq!(total, WORD_MASK);
    }

    #[test]
    fn header_words_by_position() {
        let mut img = TapeImage::blank(TapeFormat::Native18);
        img.store(100 * 256, 0o123_456); // make block 100's checksum nonzero
        let g = img.geometry();

        assert_eq!(header_word(&img, 100, 0), 0);
        assert_eq!(header_word(&img, 100, 1), 100);
        assert_eq!(header_word(&img, 100, 2), 0);
        assert_eq!(header_word(&img, 100, 3), 0);
        assert_eq!(header_word(&img, 100, 4), WORD_MASK);
        assert_eq!(header_word(&img, 100, 261), block_checksum(&img, 100));
        assert_eq!(header_word(&img, 100, 262), 0);
        assert_eq!(header_word(&img, 100, 264), complement_obverse(100));
        assert_eq!(header_word(&img, 100, g.frame_words() - 1), 0);
    }
}
