//! MCS, TBS and resource-allocation tables for PUSCH
//!
//! Lookup tables and the transport-block size computation according to
//! 3GPP TS 38.214 Sections 5.1.3 and 6.1.4.

use interfaces::pusch::McsTable;

use crate::LayerError;

/// MCS index table 5.1.3.1-1 (up to 64QAM): target code rate in 1/10240
const CODE_RATE_QAM64: [u16; 29] = [
    1200, 1570, 1930, 2510, 3080, 3790, 4490, 5260, 6020, 6790, 3400, 3780, 4340, 4900, 5530,
    6160, 6580, 4380, 4660, 5170, 5670, 6160, 6660, 7190, 7720, 8220, 8730, 9100, 9480,
];

/// MCS index table 5.1.3.1-2 (up to 256QAM): target code rate in 1/10240
const CODE_RATE_QAM256: [u16; 28] = [
    1200, 1930, 3080, 4490, 6020, 3780, 4340, 4900, 5530, 6160, 6580, 4660, 5170, 5670, 6160,
    6660, 7190, 7720, 8220, 8730, 6825, 7110, 7540, 7970, 8410, 8850, 9165, 9480,
];

/// TBS table 5.1.3.2-1 for N_info <= 3824 bits
const TBS_TABLE: [u32; 93] = [
    24, 32, 40, 48, 56, 64, 72, 80, 88, 96, 104, 112, 120, 128, 136, 144, 152, 160, 168, 176,
    184, 192, 208, 224, 240, 256, 272, 288, 304, 320, 336, 352, 368, 384, 408, 432, 456, 480,
    504, 528, 552, 576, 608, 640, 672, 704, 736, 768, 808, 848, 888, 928, 984, 1032, 1064, 1128,
    1160, 1192, 1224, 1256, 1288, 1320, 1352, 1416, 1480, 1544, 1608, 1672, 1736, 1800, 1864,
    1928, 2024, 2088, 2152, 2216, 2280, 2408, 2472, 2536, 2600, 2664, 2728, 2792, 2856, 2976,
    3104, 3240, 3368, 3496, 3624, 3752, 3824,
];

/// Modulation order and target code rate for an MCS index.
///
/// Reserved indices at the top of each table are retransmission entries:
/// they fix the modulation order but carry no code rate, returned as 0.
pub fn mcs_qm_and_rate(mcs: u8, table: McsTable) -> Result<(u8, u16), LayerError> {
    match table {
        McsTable::Qam64 => match mcs {
            0..=9 => Ok((2, CODE_RATE_QAM64[mcs as usize])),
            10..=16 => Ok((4, CODE_RATE_QAM64[mcs as usize])),
            17..=28 => Ok((6, CODE_RATE_QAM64[mcs as usize])),
            29 => Ok((2, 0)),
            30 => Ok((4, 0)),
            31 => Ok((6, 0)),
            _ => Err(LayerError::InvalidConfiguration(format!(
                "invalid MCS index {}",
                mcs
            ))),
        },
        McsTable::Qam256 => match mcs {
            0..=4 => Ok((2, CODE_RATE_QAM256[mcs as usize])),
            5..=10 => Ok((4, CODE_RATE_QAM256[mcs as usize])),
            11..=19 => Ok((6, CODE_RATE_QAM256[mcs as usize])),
            20..=27 => Ok((8, CODE_RATE_QAM256[mcs as usize])),
            28 => Ok((2, 0)),
            29 => Ok((4, 0)),
            30 => Ok((6, 0)),
            31 => Ok((8, 0)),
            _ => Err(LayerError::InvalidConfiguration(format!(
                "invalid MCS index {}",
                mcs
            ))),
        },
    }
}

#[inline]
fn floor_log2(v: u64) -> u32 {
    63 - v.leading_zeros()
}

#[inline]
fn div_ceil_u64(a: u64, b: u64) -> u64 {
    (a + b - 1) / b
}

/// Transport block size in bits (TS 38.214 Section 5.1.3.2)
#[allow(clippy::too_many_arguments)]
pub fn compute_tbs(
    qm: u8,
    rate_x10240: u16,
    nb_rb: u16,
    nb_symbols: u8,
    nb_dmrs_re_prb: u16,
    nb_rb_oh: u16,
    tb_scaling: u8,
    nb_layers: u8,
) -> u32 {
    let re_prb = (12 * nb_symbols as u32)
        .saturating_sub(nb_dmrs_re_prb as u32)
        .saturating_sub(nb_rb_oh as u32);
    let n_re = re_prb.min(156) as u64 * nb_rb as u64;
    let n_info =
        (n_re * rate_x10240 as u64 * qm as u64 * nb_layers as u64 / 10240) >> tb_scaling;

    if n_info <= 3824 {
        let n = floor_log2(n_info.max(1)).saturating_sub(6).max(3);
        let n_info_p = ((n_info >> n) << n).max(24) as u32;
        // Smallest table entry not below N'_info
        for &tbs in TBS_TABLE.iter() {
            if tbs >= n_info_p {
                return tbs;
            }
        }
        unreachable!("quantized N_info {} exceeds the short TBS table", n_info_p)
    } else {
        let n = floor_log2(n_info - 24) - 5;
        let n_info_p = (((n_info - 24 + (1 << (n - 1))) >> n) << n).max(3840);
        if rate_x10240 <= 2560 {
            let c = div_ceil_u64(n_info_p + 24, 3816);
            (8 * c * div_ceil_u64(n_info_p + 24, 8 * c) - 24) as u32
        } else if n_info_p > 8424 {
            let c = div_ceil_u64(n_info_p + 24, 8424);
            (8 * c * div_ceil_u64(n_info_p + 24, 8 * c) - 24) as u32
        } else {
            (8 * div_ceil_u64(n_info_p + 24, 8) - 24) as u32
        }
    }
}

/// DMRS resource elements per PRB over the whole allocation
pub fn dmrs_re_per_prb(
    config_type: interfaces::pusch::DmrsConfigType,
    num_cdm_grps_no_data: u8,
    dmrs_symb_pos: u16,
) -> u16 {
    let per_symbol = match config_type {
        interfaces::pusch::DmrsConfigType::Type1 => 6 * num_cdm_grps_no_data as u16,
        interfaces::pusch::DmrsConfigType::Type2 => 4 * num_cdm_grps_no_data as u16,
    };
    per_symbol * dmrs_symb_pos.count_ones() as u16
}

/// Decode a type-1 frequency-domain resource assignment (RIV) into
/// (rb_start, rb_size) within a BWP of `bwp_size` RBs.
pub fn decode_riv(riv: u16, bwp_size: u16) -> Result<(u16, u16), LayerError> {
    if bwp_size == 0 {
        return Err(LayerError::InvalidConfiguration("empty BWP".into()));
    }
    let l = riv / bwp_size;
    let s = riv % bwp_size;
    if l + 1 + s <= bwp_size {
        Ok((s, l + 1))
    } else if l + 1 <= bwp_size {
        // mirrored encoding for allocations longer than half the BWP
        Ok((bwp_size - 1 - s, bwp_size - l + 1))
    } else {
        Err(LayerError::InvalidPdu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use interfaces::pusch::DmrsConfigType;

    #[test]
    fn test_mcs_lookup() {
        assert_eq!(mcs_qm_and_rate(9, McsTable::Qam64).unwrap(), (2, 6790));
        assert_eq!(mcs_qm_and_rate(28, McsTable::Qam64).unwrap(), (6, 9480));
        assert_eq!(mcs_qm_and_rate(20, McsTable::Qam256).unwrap(), (8, 6825));
        // reserved retransmission entries have no rate
        assert_eq!(mcs_qm_and_rate(29, McsTable::Qam64).unwrap(), (2, 0));
        assert_eq!(mcs_qm_and_rate(31, McsTable::Qam256).unwrap(), (8, 0));
        assert!(mcs_qm_and_rate(32, McsTable::Qam64).is_err());
    }

    #[test]
    fn test_tbs_small_allocation() {
        // 1 RB, 14 symbols, 12 DMRS RE, QPSK lowest rate:
        // N_RE = 156, N_info = 156*2*1200/10240 = 36 -> quantized 32
        let tbs = compute_tbs(2, 1200, 1, 14, 12, 0, 0, 1);
        assert_eq!(tbs, 32);
        // TBS never goes below the smallest table entry
        let tbs = compute_tbs(2, 1200, 1, 2, 12, 0, 0, 1);
        assert_eq!(tbs, 24);
    }

    #[test]
    fn test_tbs_monotonic_in_rbs() {
        let mut prev = 0;
        for nb_rb in [1u16, 2, 5, 10, 20, 50, 100, 200, 273] {
            let tbs = compute_tbs(6, 6660, nb_rb, 14, 12, 0, 0, 1);
            assert!(tbs >= prev, "nb_rb={}", nb_rb);
            prev = tbs;
        }
    }

    #[test]
    fn test_tbs_large_allocation_byte_aligned() {
        // Large N_info path: result is byte aligned after the +24 CRC
        let tbs = compute_tbs(6, 9480, 100, 14, 12, 0, 0, 2);
        assert!(tbs > 3824);
        assert_eq!((tbs + 24) % 8, 0);
    }

    #[test]
    fn test_dmrs_re_accounting() {
        assert_eq!(dmrs_re_per_prb(DmrsConfigType::Type1, 2, 1 << 2), 12);
        assert_eq!(
            dmrs_re_per_prb(DmrsConfigType::Type1, 1, (1 << 2) | (1 << 11)),
            12
        );
        assert_eq!(dmrs_re_per_prb(DmrsConfigType::Type2, 3, 1 << 0), 12);
    }

    #[test]
    fn test_riv_round_trip() {
        // direct encoding: (L-1) <= N/2
        let n = 51u16;
        let riv = n * (5 - 1) + 7; // L=5, start=7
        assert_eq!(decode_riv(riv, n).unwrap(), (7, 5));
        // mirrored encoding: L-1 > N/2
        let riv = n * (n - 40 + 1) + (n - 1 - 3); // L=40, start=3
        assert_eq!(decode_riv(riv, n).unwrap(), (3, 40));
    }

    #[test]
    fn test_riv_rejects_overrun() {
        // implied length exceeds the BWP
        assert!(decode_riv(10 * 10 + 5, 10).is_err());
    }
}
