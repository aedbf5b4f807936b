//! PUSCH resource-element mapping
//!
//! Builds the per-layer frequency-domain slot grids for a scheduled PUSCH
//! PDU: scrambling, modulation, layer mapping, per-symbol DMRS/PTRS/data
//! classification, per-RB mapping with DC wraparound, and codebook
//! precoding onto the antenna ports.
//!
//! Subcarrier indices are FFT-shifted: the grid row is indexed by FFT bin
//! and an allocation may straddle the wrap from bin fft_size-1 to bin 0.
//! RBs crossing the wrap are assembled in a 12-subcarrier staging buffer
//! and copied back in two pieces.

use interfaces::pusch::{DmrsConfigType, PuschPdu, PuschPduBitmap};
use ndarray::Array2;
use num_complex::Complex;
use tracing::{debug, trace};

use crate::phy::dmrs::{
    dmrs_per_rb, dmrs_port_for_layer, generate_dmrs_symbol, get_delta, get_wf, get_wt,
    pusch_dmrs_c_init,
};
use crate::phy::gold::GoldSequence;
use crate::phy::modulation::{layer_map, modulate, AMP, MOD_SHIFT, QPSK_LEVEL};
use crate::phy::precoding::precode;
use crate::phy::ptrs::{first_ptrs_re, ptrs_symbol_mask};
use crate::LayerError;

/// Carrier-level constants of the transmit chain
#[derive(Debug, Clone, Copy)]
pub struct CarrierConfig {
    /// FFT size of the OFDM modulator
    pub fft_size: usize,
    /// Symbols per slot (14 for normal CP)
    pub symbols_per_slot: u8,
    /// FFT bin of subcarrier 0 of CRB 0
    pub first_sc_offset: usize,
    /// Physical antenna ports driven by the precoder
    pub num_tx_ports: u8,
}

/// Resource-element role within one RB of a DMRS-carrying symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReKind {
    /// Carries a data symbol
    Data,
    /// Carries this layer's DMRS sequence
    Dmrs,
    /// Reserved by a DMRS CDM group without data
    Empty,
}

/// Precomputed RB fill pattern for DMRS symbols. Selecting the pattern
/// once per PDU replaces per-RB dispatch on configuration type.
#[derive(Debug, Clone)]
struct DmrsRbPattern {
    kinds: [ReKind; 12],
    data_per_rb: usize,
}

impl DmrsRbPattern {
    fn new(config_type: DmrsConfigType, delta: u8, num_cdm_no_data: u8) -> Self {
        let own_group = match config_type {
            DmrsConfigType::Type1 => delta,
            DmrsConfigType::Type2 => delta / 2,
        };
        let mut kinds = [ReKind::Data; 12];
        let mut data_per_rb = 0;
        for (sc, kind) in kinds.iter_mut().enumerate() {
            let group = match config_type {
                DmrsConfigType::Type1 => (sc % 2) as u8,
                DmrsConfigType::Type2 => ((sc % 6) / 2) as u8,
            };
            *kind = if group == own_group {
                ReKind::Dmrs
            } else if group < num_cdm_no_data {
                ReKind::Empty
            } else {
                data_per_rb += 1;
                ReKind::Data
            };
        }
        Self { kinds, data_per_rb }
    }
}

/// Run `fill` over the 12 subcarriers of one RB starting at FFT bin `sc`.
/// An RB that straddles the FFT wrap is staged in a local buffer and
/// written back in two pieces.
fn map_rb_span(row: &mut [Complex<i16>], sc: usize, fill: impl FnOnce(&mut [Complex<i16>])) {
    let fft_size = row.len();
    if sc + 12 <= fft_size {
        fill(&mut row[sc..sc + 12]);
    } else {
        let left = fft_size - sc;
        let mut staged = [Complex::new(0i16, 0i16); 12];
        staged[..left].copy_from_slice(&row[sc..]);
        staged[left..].copy_from_slice(&row[..12 - left]);
        fill(&mut staged);
        row[sc..].copy_from_slice(&staged[..left]);
        row[..12 - left].copy_from_slice(&staged[left..]);
    }
}

/// Whether the given RB of the allocation carries a PTRS tone
#[inline]
fn is_ptrs_rb(rb: u16, k_ptrs: u8, k_rb_ref: u16) -> bool {
    rb >= k_rb_ref && (rb - k_rb_ref) % k_ptrs as u16 == 0
}

/// Scrambling sequence application (TS 38.211 Section 6.3.1.1)
pub fn scramble(data: &[u8], num_bits: usize, rnti: u16, scrambling_id: u16) -> Vec<u8> {
    let c_init = ((rnti as u32) << 15) + scrambling_id as u32;
    let mut gen = GoldSequence::new(c_init);
    let mut out = vec![0u8; (num_bits + 7) / 8];
    for (i, byte) in out.iter_mut().enumerate() {
        let mut b = data.get(i).copied().unwrap_or(0);
        for bit in 0..8 {
            if i * 8 + bit >= num_bits {
                break;
            }
            b ^= gen.next_bit() << (7 - bit);
        }
        *byte = b;
    }
    out
}

/// Data resource elements per layer for the PDU
pub fn data_res_per_layer(pdu: &PuschPdu) -> usize {
    let nb_rb = pdu.rb_size as usize;
    let has_ptrs = pdu.pdu_bit_map.contains(PuschPduBitmap::PUSCH_PTRS);
    let pattern = DmrsRbPattern::new(
        pdu.dmrs_config_type,
        0,
        pdu.num_dmrs_cdm_grps_no_data.max(1),
    );
    let ptrs_mask = if has_ptrs {
        ptrs_symbol_mask(
            pdu.start_symbol_index,
            pdu.nr_of_symbols,
            pdu.ptrs.time_density,
            pdu.ul_dmrs_symb_pos,
        )
    } else {
        0
    };
    let num_ptrs_rbs = if has_ptrs {
        let first_re = first_ptrs_re(
            pdu.rnti.0,
            pdu.ptrs.freq_density,
            pdu.rb_size,
            pdu.ptrs.re_offset,
        );
        let k_rb_ref = first_re / 12;
        (0..pdu.rb_size)
            .filter(|&rb| is_ptrs_rb(rb, pdu.ptrs.freq_density, k_rb_ref))
            .count()
    } else {
        0
    };

    let mut res = 0;
    for s in pdu.start_symbol_index..pdu.start_symbol_index + pdu.nr_of_symbols {
        if (pdu.ul_dmrs_symb_pos >> s) & 1 == 1 {
            res += pattern.data_per_rb * nb_rb;
        } else if (ptrs_mask >> s) & 1 == 1 {
            res += 12 * nb_rb - num_ptrs_rbs;
        } else {
            res += 12 * nb_rb;
        }
    }
    res
}

/// Total codeword bits the allocation can carry
pub fn available_bits(pdu: &PuschPdu) -> usize {
    data_res_per_layer(pdu) * pdu.qam_mod_order as usize * pdu.nr_of_layers as usize
}

/// PUSCH transmit-side mapping chain
pub struct UlschTx {
    pub carrier: CarrierConfig,
}

impl UlschTx {
    pub fn new(carrier: CarrierConfig) -> Self {
        Self { carrier }
    }

    /// Map one scheduled PUSCH onto antenna-port grids
    /// `[symbols_per_slot, fft_size]` for the given slot. `codeword` holds
    /// the rate-matched bits; exactly `available_bits(pdu)` of it are
    /// transmitted.
    pub fn transmit(
        &self,
        pdu: &PuschPdu,
        codeword: &[u8],
        slot: u16,
    ) -> Result<Vec<Array2<Complex<i16>>>, LayerError> {
        if !pdu.pdu_bit_map.contains(PuschPduBitmap::PUSCH_DATA) {
            return Err(LayerError::InvalidState("PUSCH PDU carries no data".into()));
        }
        let nl = pdu.nr_of_layers as usize;
        if nl == 0 || nl > 4 {
            return Err(LayerError::InvalidConfiguration(format!(
                "invalid layer count {}",
                nl
            )));
        }
        let last_symbol = pdu.start_symbol_index as usize + pdu.nr_of_symbols as usize;
        if last_symbol > self.carrier.symbols_per_slot as usize {
            return Err(LayerError::InvalidConfiguration(format!(
                "symbol allocation [{}+{}] exceeds the {}-symbol slot",
                pdu.start_symbol_index, pdu.nr_of_symbols, self.carrier.symbols_per_slot
            )));
        }
        let g = available_bits(pdu);
        if g == 0 {
            return Err(LayerError::InvalidConfiguration(
                "empty PUSCH allocation".into(),
            ));
        }
        if codeword.len() * 8 < g {
            return Err(LayerError::InvalidPdu);
        }
        if pdu.transform_precoding {
            // DFT spreading happens downstream of this mapper; the RE
            // layout is unchanged
            trace!("transform precoding enabled, mapping DFT-s-OFDM layout");
        }

        let scrambled = scramble(codeword, g, pdu.rnti.0, pdu.data_scrambling_id);
        let symbols = modulate(&scrambled, g, pdu.qam_mod_order, AMP)?;
        let layers_data = layer_map(&symbols, nl);

        let has_ptrs = pdu.pdu_bit_map.contains(PuschPduBitmap::PUSCH_PTRS);
        let ptrs_mask = if has_ptrs {
            ptrs_symbol_mask(
                pdu.start_symbol_index,
                pdu.nr_of_symbols,
                pdu.ptrs.time_density,
                pdu.ul_dmrs_symb_pos,
            )
        } else {
            0
        };
        let (k_rb_ref, k_re_ref) = if has_ptrs {
            let first_re = first_ptrs_re(
                pdu.rnti.0,
                pdu.ptrs.freq_density,
                pdu.rb_size,
                pdu.ptrs.re_offset,
            );
            (first_re / 12, (first_re % 12) as usize)
        } else {
            (0, 0)
        };

        let abs_start_rb = pdu.bwp_start + pdu.rb_start;
        let fft_size = self.carrier.fft_size;
        let start_sc = (self.carrier.first_sc_offset + abs_start_rb as usize * 12) % fft_size;

        debug!(
            "mapping PUSCH rnti={:#x} rbs [{}+{}] symbols [{}+{}] layers {} start_sc {}",
            pdu.rnti.0,
            abs_start_rb,
            pdu.rb_size,
            pdu.start_symbol_index,
            pdu.nr_of_symbols,
            nl,
            start_sc
        );

        let mut layer_grids = Vec::with_capacity(nl);
        for (layer, data) in layers_data.iter().enumerate() {
            let port = dmrs_port_for_layer(layer, pdu.dmrs_ports)?;
            let delta = get_delta(pdu.dmrs_config_type, port);
            let own_group = match pdu.dmrs_config_type {
                DmrsConfigType::Type1 => delta,
                DmrsConfigType::Type2 => delta / 2,
            };
            if own_group >= pdu.num_dmrs_cdm_grps_no_data {
                return Err(LayerError::InvalidConfiguration(format!(
                    "DMRS port {} sits in CDM group {} outside the {} no-data groups",
                    port, own_group, pdu.num_dmrs_cdm_grps_no_data
                )));
            }
            let wf = get_wf(pdu.dmrs_config_type, port);
            // Single-symbol DMRS, l' = 0
            let wt = get_wt(pdu.dmrs_config_type, port)[0];
            let pattern =
                DmrsRbPattern::new(pdu.dmrs_config_type, delta, pdu.num_dmrs_cdm_grps_no_data);

            let mut grid =
                Array2::zeros((self.carrier.symbols_per_slot as usize, fft_size));
            self.map_layer(
                &mut grid, pdu, slot, data, &pattern, wf, wt, start_sc, ptrs_mask, k_rb_ref,
                k_re_ref,
            )?;
            layer_grids.push(grid);
        }

        precode(&layer_grids, self.carrier.num_tx_ports, pdu.tpmi)
    }

    #[allow(clippy::too_many_arguments)]
    fn map_layer(
        &self,
        grid: &mut Array2<Complex<i16>>,
        pdu: &PuschPdu,
        slot: u16,
        data: &[Complex<i16>],
        pattern: &DmrsRbPattern,
        wf: [i16; 2],
        wt: i16,
        start_sc: usize,
        ptrs_mask: u16,
        k_rb_ref: u16,
        k_re_ref: usize,
    ) -> Result<(), LayerError> {
        let fft_size = self.carrier.fft_size;
        let cols = fft_size;
        let flat = grid
            .as_slice_mut()
            .ok_or_else(|| LayerError::ProcessingError("grid is not contiguous".into()))?;

        let abs_start_rb = pdu.bwp_start + pdu.rb_start;
        let per_rb = dmrs_per_rb(pdu.dmrs_config_type);
        let ptrs_level = ((QPSK_LEVEL as i32 * AMP as i32) >> MOD_SHIFT) as i16;

        let mut data_idx = 0usize;
        for s in pdu.start_symbol_index..pdu.start_symbol_index + pdu.nr_of_symbols {
            let row = &mut flat[s as usize * cols..(s as usize + 1) * cols];
            let is_dmrs = (pdu.ul_dmrs_symb_pos >> s) & 1 == 1;
            let is_ptrs = (ptrs_mask >> s) & 1 == 1;

            if is_dmrs {
                let c_init = pusch_dmrs_c_init(
                    slot as u32,
                    s,
                    pdu.ul_dmrs_scrambling_id,
                    pdu.scid,
                );
                let dmrs_seq = generate_dmrs_symbol(
                    c_init,
                    pdu.dmrs_config_type,
                    abs_start_rb,
                    pdu.rb_size,
                    wf,
                    wt,
                    AMP,
                );
                let mut dmrs_idx = 0usize;
                for rb in 0..pdu.rb_size {
                    let sc = (start_sc + rb as usize * 12) % fft_size;
                    map_rb_span(row, sc, |out| {
                        for (k, re) in out.iter_mut().enumerate() {
                            match pattern.kinds[k] {
                                ReKind::Dmrs => {
                                    *re = dmrs_seq[dmrs_idx];
                                    dmrs_idx += 1;
                                }
                                ReKind::Data => {
                                    *re = data[data_idx];
                                    data_idx += 1;
                                }
                                ReKind::Empty => *re = Complex::new(0, 0),
                            }
                        }
                    });
                }
                debug_assert_eq!(dmrs_idx, per_rb * pdu.rb_size as usize);
            } else if is_ptrs {
                // PTRS tones reuse the Gold QPSK sequence of this symbol
                let c_init = pusch_dmrs_c_init(
                    slot as u32,
                    s,
                    pdu.ul_dmrs_scrambling_id,
                    pdu.scid,
                );
                let mut gen = GoldSequence::new(c_init);
                for rb in 0..pdu.rb_size {
                    let sc = (start_sc + rb as usize * 12) % fft_size;
                    let ptrs_here = is_ptrs_rb(rb, pdu.ptrs.freq_density, k_rb_ref);
                    map_rb_span(row, sc, |out| {
                        for (k, re) in out.iter_mut().enumerate() {
                            if ptrs_here && k == k_re_ref {
                                let c0 = gen.next_bit();
                                let c1 = gen.next_bit();
                                *re = Complex::new(
                                    if c0 == 0 { ptrs_level } else { -ptrs_level },
                                    if c1 == 0 { ptrs_level } else { -ptrs_level },
                                );
                            } else {
                                *re = data[data_idx];
                                data_idx += 1;
                            }
                        }
                    });
                }
            } else {
                for rb in 0..pdu.rb_size {
                    let sc = (start_sc + rb as usize * 12) % fft_size;
                    map_rb_span(row, sc, |out| {
                        for re in out.iter_mut() {
                            *re = data[data_idx];
                            data_idx += 1;
                        }
                    });
                }
            }
        }
        debug_assert_eq!(data_idx, data.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::types::Rnti;
    use interfaces::pusch::{McsTable, PuschData, PuschPtrs, PuschUci};

    fn test_pdu(rb_size: u16) -> PuschPdu {
        PuschPdu {
            pdu_bit_map: PuschPduBitmap::PUSCH_DATA,
            rnti: Rnti(0x1234),
            bwp_start: 0,
            bwp_size: 51,
            target_code_rate: 6790,
            qam_mod_order: 2,
            mcs_index: 9,
            mcs_table: McsTable::Qam64,
            transform_precoding: false,
            data_scrambling_id: 0,
            nr_of_layers: 1,
            tpmi: 0,
            ul_dmrs_symb_pos: 1 << 2,
            dmrs_config_type: DmrsConfigType::Type1,
            ul_dmrs_scrambling_id: 0,
            pusch_identity: 0,
            scid: 0,
            num_dmrs_cdm_grps_no_data: 2,
            dmrs_ports: 1,
            rb_start: 0,
            rb_size,
            frequency_hopping: false,
            start_symbol_index: 0,
            nr_of_symbols: 14,
            pusch_data: PuschData {
                rv_index: 0,
                harq_process_id: 0,
                new_data_indicator: true,
                tb_size: 8,
                tx_payload: bytes::Bytes::new(),
            },
            uci: PuschUci::default(),
            ptrs: PuschPtrs::default(),
            absolute_delta_pusch: 0,
        }
    }

    fn carrier(fft_size: usize, first_sc_offset: usize) -> CarrierConfig {
        CarrierConfig {
            fft_size,
            symbols_per_slot: 14,
            first_sc_offset,
            num_tx_ports: 1,
        }
    }

    fn codeword_for(pdu: &PuschPdu) -> Vec<u8> {
        let g = available_bits(pdu);
        (0..(g + 7) / 8).map(|i| (i * 37 + 11) as u8).collect()
    }

    #[test]
    fn test_available_bits_accounting() {
        let mut pdu = test_pdu(4);
        // cdm_grps 2, type 1: DMRS symbol carries no data
        // 13 data symbols * 48 RE * Qm 2
        assert_eq!(available_bits(&pdu), 13 * 48 * 2);

        pdu.num_dmrs_cdm_grps_no_data = 1;
        // DMRS symbol now carries 6 data REs per RB
        assert_eq!(available_bits(&pdu), (13 * 48 + 24) * 2);
    }

    #[test]
    fn test_dmrs_symbol_layout_type1() {
        let pdu = test_pdu(2);
        let tx = UlschTx::new(carrier(256, 0));
        let grids = tx.transmit(&pdu, &codeword_for(&pdu), 0).unwrap();
        let grid = &grids[0];

        // Port 0, delta 0: DMRS on even subcarriers of symbol 2, and with
        // 2 CDM groups without data the odd subcarriers stay empty
        for sc in 0..24 {
            let re = grid[(2, sc)];
            if sc % 2 == 0 {
                assert_ne!(re, Complex::new(0, 0), "sc {}", sc);
            } else {
                assert_eq!(re, Complex::new(0, 0), "sc {}", sc);
            }
        }
        // A pure data symbol is fully occupied
        for sc in 0..24 {
            assert_ne!(grid[(3, sc)], Complex::new(0, 0), "sc {}", sc);
        }
        // Outside the allocation nothing is mapped
        assert_eq!(grid[(3, 24)], Complex::new(0, 0));
    }

    #[test]
    fn test_symbol_allocation_past_slot_end_rejected() {
        // A back-loaded allocation spilling past symbol 13 must fail
        // cleanly instead of indexing outside the slot grid
        let mut pdu = test_pdu(2);
        pdu.start_symbol_index = 8;
        pdu.nr_of_symbols = 8;
        pdu.ul_dmrs_symb_pos = 1 << 8;
        let tx = UlschTx::new(carrier(256, 0));
        let codeword = codeword_for(&pdu);
        assert!(matches!(
            tx.transmit(&pdu, &codeword, 0),
            Err(LayerError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_dc_wraparound_transparency() {
        // Same PDU mapped with an offset placing the allocation across
        // the FFT wrap must contain the same values, index-shifted
        let pdu = test_pdu(2);
        let plain = UlschTx::new(carrier(256, 0))
            .transmit(&pdu, &codeword_for(&pdu), 0)
            .unwrap();
        // 2 RBs = 24 subcarriers; start 18 bins before the wrap point
        let offset = 256 - 18;
        let wrapped = UlschTx::new(carrier(256, offset))
            .transmit(&pdu, &codeword_for(&pdu), 0)
            .unwrap();

        for s in 0..14 {
            for sc in 0..24 {
                assert_eq!(
                    plain[0][(s, sc)],
                    wrapped[0][(s, (offset + sc) % 256)],
                    "symbol {} sc {}",
                    s,
                    sc
                );
            }
        }
    }

    #[test]
    fn test_ptrs_tone_placement() {
        let mut pdu = test_pdu(4);
        pdu.pdu_bit_map |= PuschPduBitmap::PUSCH_PTRS;
        pdu.ptrs = PuschPtrs {
            time_density: 1,
            freq_density: 2,
            ports: 1,
            re_offset: 0,
        };
        let tx = UlschTx::new(carrier(256, 0));
        let grids = tx.transmit(&pdu, &codeword_for(&pdu), 0).unwrap();

        // rnti 0x1234 even, k_ptrs 2, nb_rb 4 divisible: k_rb_ref = 0,
        // PTRS RBs 0 and 2, tone at RE 0 of the RB
        let first = first_ptrs_re(pdu.rnti.0, 2, 4, 0);
        assert_eq!(first, 0);
        // Every non-DMRS symbol carries PTRS at L_ptrs 1; the tone REs
        // are occupied (they hold the QPSK reference, not data)
        let re = grids[0][(0, 0)];
        assert_ne!(re, Complex::new(0, 0));
        // Data accounting shrinks by one RE per PTRS RB per PTRS symbol
        let without = {
            let mut p = test_pdu(4);
            p.num_dmrs_cdm_grps_no_data = 2;
            data_res_per_layer(&p)
        };
        assert_eq!(data_res_per_layer(&pdu), without - 13 * 2);
    }

    #[test]
    fn test_insufficient_codeword_rejected() {
        let pdu = test_pdu(2);
        let tx = UlschTx::new(carrier(256, 0));
        assert!(matches!(
            tx.transmit(&pdu, &[0u8; 4], 0),
            Err(LayerError::InvalidPdu)
        ));
    }

    #[test]
    fn test_two_layer_two_port_identity() {
        let mut pdu = test_pdu(2);
        pdu.nr_of_layers = 2;
        pdu.dmrs_ports = 0b11;
        pdu.num_dmrs_cdm_grps_no_data = 2;
        let mut c = carrier(256, 0);
        c.num_tx_ports = 2;
        let grids = UlschTx::new(c).transmit(&pdu, &codeword_for(&pdu), 3).unwrap();
        assert_eq!(grids.len(), 2);
        // Ports 0 and 1 share CDM group 0: DMRS occupies even subcarriers
        // on both layers, with the w_f cover differing between them
        assert_ne!(grids[0][(2, 0)], Complex::new(0, 0));
        assert_ne!(grids[1][(2, 0)], Complex::new(0, 0));
    }
}
