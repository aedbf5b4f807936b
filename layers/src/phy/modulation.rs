//! Modulation mapping for PUSCH
//!
//! Bit-to-symbol mapping according to 3GPP TS 38.211 Section 5.1, in
//! fixed point. Constellation amplitudes are stored in Q13 so the 256QAM
//! outer points (15/sqrt(170) > 1) still fit in i16; the final symbol is
//! scaled by the transmit amplitude and shifted back down.

use num_complex::Complex;

use crate::LayerError;

/// Transmit amplitude applied to every mapped resource element
pub const AMP: i16 = 512;

/// Q13 fixed-point shift of the constellation tables
pub const MOD_SHIFT: u32 = 13;

/// 1/sqrt(2) in Q13
pub const QPSK_LEVEL: i16 = 5793;

// Per-axis magnitudes in Q13, indexed by the Gray-coded amplitude bits
const LEVELS_16QAM: [i16; 2] = [2591, 7773]; // 1,3 / sqrt(10)
const LEVELS_64QAM: [i16; 4] = [3792, 1264, 6320, 8848]; // 3,1,5,7 / sqrt(42)
const LEVELS_256QAM: [i16; 8] = [3141, 4398, 1885, 628, 6911, 5655, 8168, 9424]; // 5,7,3,1,11,9,13,15 / sqrt(170)

#[inline]
fn bit(data: &[u8], idx: usize) -> u8 {
    (data[idx >> 3] >> (7 - (idx & 7))) & 1
}

#[inline]
fn scale(level: i16, sign_bit: u8, amp: i16) -> i16 {
    let v = (level as i32 * amp as i32) >> MOD_SHIFT;
    if sign_bit == 0 {
        v as i16
    } else {
        -v as i16
    }
}

/// Map `num_bits` bits (MSB first within each byte) onto `num_bits / qm`
/// symbols of the 2^qm-QAM constellation at the given amplitude.
pub fn modulate(
    data: &[u8],
    num_bits: usize,
    qm: u8,
    amp: i16,
) -> Result<Vec<Complex<i16>>, LayerError> {
    if num_bits > data.len() * 8 || num_bits % qm as usize != 0 {
        return Err(LayerError::InvalidConfiguration(format!(
            "cannot map {} bits with Qm {} from {} bytes",
            num_bits,
            qm,
            data.len()
        )));
    }

    let num_symbols = num_bits / qm as usize;
    let mut out = Vec::with_capacity(num_symbols);

    for s in 0..num_symbols {
        let b = s * qm as usize;
        let sym = match qm {
            2 => Complex::new(
                scale(QPSK_LEVEL, bit(data, b), amp),
                scale(QPSK_LEVEL, bit(data, b + 1), amp),
            ),
            4 => Complex::new(
                scale(LEVELS_16QAM[bit(data, b + 2) as usize], bit(data, b), amp),
                scale(
                    LEVELS_16QAM[bit(data, b + 3) as usize],
                    bit(data, b + 1),
                    amp,
                ),
            ),
            6 => {
                let i_idx = (bit(data, b + 2) * 2 + bit(data, b + 4)) as usize;
                let q_idx = (bit(data, b + 3) * 2 + bit(data, b + 5)) as usize;
                Complex::new(
                    scale(LEVELS_64QAM[i_idx], bit(data, b), amp),
                    scale(LEVELS_64QAM[q_idx], bit(data, b + 1), amp),
                )
            }
            8 => {
                let i_idx = (bit(data, b + 2) * 4 + bit(data, b + 4) * 2 + bit(data, b + 6)) as usize;
                let q_idx = (bit(data, b + 3) * 4 + bit(data, b + 5) * 2 + bit(data, b + 7)) as usize;
                Complex::new(
                    scale(LEVELS_256QAM[i_idx], bit(data, b), amp),
                    scale(LEVELS_256QAM[q_idx], bit(data, b + 1), amp),
                )
            }
            _ => {
                return Err(LayerError::InvalidConfiguration(format!(
                    "unsupported modulation order {}",
                    qm
                )))
            }
        };
        out.push(sym);
    }

    Ok(out)
}

/// Round-robin layer mapping (TS 38.211 Section 6.3.1.3)
pub fn layer_map(symbols: &[Complex<i16>], num_layers: usize) -> Vec<Vec<Complex<i16>>> {
    let per_layer = symbols.len() / num_layers;
    let mut layers = vec![Vec::with_capacity(per_layer); num_layers];
    for (i, &s) in symbols.iter().enumerate() {
        layers[i % num_layers].push(s);
    }
    layers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qpsk_mapping() {
        // bits 00 01 10 11
        let syms = modulate(&[0b0001_1011], 8, 2, AMP).unwrap();
        let a = ((QPSK_LEVEL as i32 * AMP as i32) >> MOD_SHIFT) as i16;
        assert_eq!(syms[0], Complex::new(a, a));
        assert_eq!(syms[1], Complex::new(a, -a));
        assert_eq!(syms[2], Complex::new(-a, a));
        assert_eq!(syms[3], Complex::new(-a, -a));
    }

    #[test]
    fn test_16qam_amplitude_bits() {
        // b0..b3 = 0 0 0 0 -> inner point (+1,+1)/sqrt(10)
        // b0..b3 = 0 0 1 1 -> outer point (+3,+3)/sqrt(10)
        let syms = modulate(&[0b0000_0011], 8, 4, AMP).unwrap();
        let inner = ((LEVELS_16QAM[0] as i32 * AMP as i32) >> MOD_SHIFT) as i16;
        let outer = ((LEVELS_16QAM[1] as i32 * AMP as i32) >> MOD_SHIFT) as i16;
        assert_eq!(syms[0], Complex::new(inner, inner));
        assert_eq!(syms[1], Complex::new(outer, outer));
        assert!(outer > inner);
    }

    #[test]
    fn test_256qam_extreme_points() {
        // all-zero bits -> magnitude 5, all-one bits -> -15 corner
        let syms = modulate(&[0x00, 0xFF], 16, 8, AMP).unwrap();
        let m5 = ((LEVELS_256QAM[0] as i32 * AMP as i32) >> MOD_SHIFT) as i16;
        let m15 = ((LEVELS_256QAM[7] as i32 * AMP as i32) >> MOD_SHIFT) as i16;
        assert_eq!(syms[0], Complex::new(m5, m5));
        assert_eq!(syms[1], Complex::new(-m15, -m15));
    }

    #[test]
    fn test_bit_count_validation() {
        assert!(modulate(&[0u8; 2], 10, 4, AMP).is_err());
        assert!(modulate(&[0u8; 1], 16, 2, AMP).is_err());
        assert!(modulate(&[0u8; 2], 8, 3, AMP).is_err());
    }

    #[test]
    fn test_layer_map_round_robin() {
        let syms: Vec<Complex<i16>> = (0..8).map(|i| Complex::new(i, 0)).collect();
        let layers = layer_map(&syms, 2);
        assert_eq!(layers[0].len(), 4);
        assert_eq!(layers[1].len(), 4);
        assert_eq!(layers[0][1], Complex::new(2, 0));
        assert_eq!(layers[1][0], Complex::new(1, 0));
    }
}
