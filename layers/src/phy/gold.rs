//! Gold sequence generation
//!
//! Length-31 Gold sequence generator according to 3GPP TS 38.211
//! Section 5.2.1, used for DMRS and scrambling sequences.

/// Gold sequence LFSR pair
pub struct GoldSequence {
    x1: u32,
    x2: u32,
}

impl GoldSequence {
    /// Create a new generator with initialization value, already advanced
    /// past the Nc = 1600 warm-up
    pub fn new(c_init: u32) -> Self {
        // x1 starts with all ones, x2 with c_init
        let mut gen = Self {
            x1: 0x7FFF_FFFF,
            x2: c_init & 0x7FFF_FFFF,
        };
        for _ in 0..1600 {
            gen.advance();
        }
        gen
    }

    /// Advance LFSR state by one step
    fn advance(&mut self) {
        // x1(n+31) = (x1(n+3) + x1(n)) mod 2
        let x1_new = ((self.x1 >> 3) ^ self.x1) & 1;
        self.x1 = ((self.x1 >> 1) | (x1_new << 30)) & 0x7FFF_FFFF;

        // x2(n+31) = (x2(n+3) + x2(n+2) + x2(n+1) + x2(n)) mod 2
        let x2_new = ((self.x2 >> 3) ^ (self.x2 >> 2) ^ (self.x2 >> 1) ^ self.x2) & 1;
        self.x2 = ((self.x2 >> 1) | (x2_new << 30)) & 0x7FFF_FFFF;
    }

    /// Generate the next bit of c(n)
    pub fn next_bit(&mut self) -> u8 {
        let c = (self.x1 ^ self.x2) & 1;
        self.advance();
        c as u8
    }

    /// Skip n bits of the sequence
    pub fn skip_bits(&mut self, n: usize) {
        for _ in 0..n {
            self.advance();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_is_deterministic() {
        let mut a = GoldSequence::new(12345);
        let mut b = GoldSequence::new(12345);
        for _ in 0..64 {
            assert_eq!(a.next_bit(), b.next_bit());
        }
    }

    #[test]
    fn test_skip_matches_generate() {
        let mut a = GoldSequence::new(0x1234_5678 & 0x7FFF_FFFF);
        let mut b = GoldSequence::new(0x1234_5678 & 0x7FFF_FFFF);
        for _ in 0..100 {
            a.next_bit();
        }
        b.skip_bits(100);
        assert_eq!(a.next_bit(), b.next_bit());
    }

    #[test]
    fn test_different_seeds_differ() {
        let mut a = GoldSequence::new(1);
        let mut b = GoldSequence::new(2);
        let bits_a: Vec<u8> = (0..64).map(|_| a.next_bit()).collect();
        let bits_b: Vec<u8> = (0..64).map(|_| b.next_bit()).collect();
        assert_ne!(bits_a, bits_b);
    }
}
