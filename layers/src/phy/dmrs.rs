//! PUSCH DMRS parameters and sequence generation
//!
//! Port-dependent CDM parameters according to 3GPP TS 38.211 Tables
//! 6.4.1.1.3-1/2, symbol positions according to Table 6.4.1.1.3-3/4
//! (single-symbol DMRS), and the Gold-based QPSK reference sequence.

use interfaces::pusch::DmrsConfigType;
use num_complex::Complex;

use crate::phy::gold::GoldSequence;
use crate::phy::modulation::{MOD_SHIFT, QPSK_LEVEL};
use crate::LayerError;

/// PUSCH time-domain mapping type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingType {
    TypeA,
    TypeB,
}

/// Number of DMRS resource elements per RB for one port
pub fn dmrs_per_rb(config_type: DmrsConfigType) -> usize {
    match config_type {
        DmrsConfigType::Type1 => 6, // comb-2, every other subcarrier
        DmrsConfigType::Type2 => 4, // two pairs of adjacent subcarriers
    }
}

/// Subcarrier offset delta of the CDM group the port belongs to
/// (TS 38.211 Tables 6.4.1.1.3-1 and 6.4.1.1.3-2)
pub fn get_delta(config_type: DmrsConfigType, port: u8) -> u8 {
    match config_type {
        DmrsConfigType::Type1 => match port {
            0 | 1 | 4 | 5 => 0,
            2 | 3 | 6 | 7 => 1,
            _ => unreachable!("type 1 DMRS port {} out of range", port),
        },
        DmrsConfigType::Type2 => match port {
            0 | 1 | 6 | 7 => 0,
            2 | 3 | 8 | 9 => 2,
            4 | 5 | 10 | 11 => 4,
            _ => unreachable!("type 2 DMRS port {} out of range", port),
        },
    }
}

/// Frequency-domain cover code w_f(k') for the port
pub fn get_wf(config_type: DmrsConfigType, port: u8) -> [i16; 2] {
    let max_port = match config_type {
        DmrsConfigType::Type1 => 7,
        DmrsConfigType::Type2 => 11,
    };
    if port > max_port {
        unreachable!("DMRS port {} out of range", port);
    }
    if port % 2 == 0 {
        [1, 1]
    } else {
        [1, -1]
    }
}

/// Time-domain cover code w_t(l') for the port
pub fn get_wt(config_type: DmrsConfigType, port: u8) -> [i16; 2] {
    match config_type {
        DmrsConfigType::Type1 => {
            if port < 4 {
                [1, 1]
            } else {
                [1, -1]
            }
        }
        DmrsConfigType::Type2 => {
            if port < 6 {
                [1, 1]
            } else {
                [1, -1]
            }
        }
    }
}

/// Antenna port carried by the given layer, taken from the scheduled
/// port bitmap (bit p set means port 1000 + p is in use)
pub fn dmrs_port_for_layer(layer: usize, dmrs_ports: u16) -> Result<u8, LayerError> {
    let mut remaining = layer;
    for p in 0..16 {
        if dmrs_ports & (1 << p) != 0 {
            if remaining == 0 {
                return Ok(p);
            }
            remaining -= 1;
        }
    }
    Err(LayerError::InvalidConfiguration(format!(
        "layer {} has no port in DMRS port bitmap {:#x}",
        layer, dmrs_ports
    )))
}

/// DMRS scrambling initialization
/// c_init = (2^17 * (14 * n_slot + l + 1) * (2 * N_ID + 1) + 2 * N_ID + n_SCID) mod 2^31
pub fn pusch_dmrs_c_init(slot: u32, symbol: u8, n_id: u16, n_scid: u8) -> u32 {
    let l = symbol as u32;
    let n_symb_slot = 14u32; // normal CP
    ((1u32 << 17)
        .wrapping_mul(n_symb_slot * slot + l + 1)
        .wrapping_mul(2 * n_id as u32 + 1)
        .wrapping_add(2 * n_id as u32 + n_scid as u32))
        & 0x7FFF_FFFF
}

/// Bitmap of DMRS symbol positions for single-symbol DMRS
/// (TS 38.211 Tables 6.4.1.1.3-3 and 6.4.1.1.3-4)
pub fn dmrs_symbol_mask(
    mapping_type: MappingType,
    type_a_position: u8,
    additional_position: u8,
    start_symbol: u8,
    num_symbols: u8,
) -> Result<u16, LayerError> {
    if additional_position > 3 {
        return Err(LayerError::InvalidConfiguration(format!(
            "invalid dmrs-AdditionalPosition {}",
            additional_position
        )));
    }

    let positions: &[u8] = match mapping_type {
        MappingType::TypeA => {
            let l0 = type_a_position;
            if l0 != 2 && l0 != 3 {
                return Err(LayerError::InvalidConfiguration(format!(
                    "invalid dmrs-TypeA-Position {}",
                    l0
                )));
            }
            // Duration counted from symbol 0 of the slot
            let ld = start_symbol + num_symbols;
            if !(4..=14).contains(&ld) {
                return Err(LayerError::InvalidConfiguration(format!(
                    "type A duration {} out of range",
                    ld
                )));
            }
            let mask = match (additional_position, ld) {
                (0, _) => vec![l0],
                (1, 4..=7) => vec![l0],
                (1, 8..=9) => vec![l0, 7],
                (1, 10..=12) => vec![l0, 9],
                (1, _) => vec![l0, 11],
                (2, 4..=7) => vec![l0],
                (2, 8..=9) => vec![l0, 7],
                (2, 10..=12) => vec![l0, 6, 9],
                (2, _) => vec![l0, 7, 11],
                (3, 4..=7) => vec![l0],
                (3, 8..=9) => vec![l0, 7],
                (3, 10..=11) => vec![l0, 6, 9],
                (3, _) => vec![l0, 5, 8, 11],
                _ => unreachable!(),
            };
            return Ok(mask.iter().fold(0u16, |m, &l| m | (1 << l)));
        }
        MappingType::TypeB => {
            let ld = num_symbols;
            if !(1..=14).contains(&ld) {
                return Err(LayerError::InvalidConfiguration(format!(
                    "type B duration {} out of range",
                    ld
                )));
            }
            let end = start_symbol as u16 + ld as u16;
            if end > 14 {
                return Err(LayerError::InvalidConfiguration(format!(
                    "type B allocation {}..{} exceeds the slot",
                    start_symbol, end
                )));
            }
            match (additional_position, ld) {
                (0, _) => &[0],
                (1, 1..=4) => &[0],
                (1, 5..=7) => &[0, 4],
                (1, 8..=9) => &[0, 6],
                (1, 10..=11) => &[0, 8],
                (1, _) => &[0, 10],
                (2, 1..=4) => &[0],
                (2, 5..=7) => &[0, 4],
                (2, 8..=9) => &[0, 3, 6],
                (2, 10..=11) => &[0, 4, 8],
                (2, _) => &[0, 5, 10],
                (3, 1..=4) => &[0],
                (3, 5..=7) => &[0, 4],
                (3, 8..=9) => &[0, 3, 6],
                (3, _) => &[0, 3, 6, 9],
                _ => unreachable!(),
            }
        }
    };

    // Type B positions are relative to the first symbol of the allocation
    Ok(positions
        .iter()
        .fold(0u16, |m, &l| m | (1 << (l + start_symbol))))
}

/// Generate the weighted DMRS sequence for one symbol over the allocated
/// RBs. The sequence reference point is CRB 0, so the generator is skipped
/// ahead to the first allocated RB.
pub fn generate_dmrs_symbol(
    c_init: u32,
    config_type: DmrsConfigType,
    abs_start_rb: u16,
    nb_rb: u16,
    wf: [i16; 2],
    wt: i16,
    amp: i16,
) -> Vec<Complex<i16>> {
    let per_rb = dmrs_per_rb(config_type);
    let mut gen = GoldSequence::new(c_init);
    gen.skip_bits(2 * per_rb * abs_start_rb as usize);

    let level = ((QPSK_LEVEL as i32 * amp as i32) >> MOD_SHIFT) as i16;
    let n = per_rb * nb_rb as usize;
    let mut seq = Vec::with_capacity(n);
    for k in 0..n {
        let c0 = gen.next_bit();
        let c1 = gen.next_bit();
        let w = wf[k % 2] * wt;
        let re = if c0 == 0 { level } else { -level };
        let im = if c1 == 0 { level } else { -level };
        seq.push(Complex::new(w * re, w * im));
    }
    seq
}
