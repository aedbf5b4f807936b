//! FAPI-style uplink configuration PDUs
//!
//! These are the structures the MAC scheduler hands to the PHY for each
//! uplink slot. Field layout follows the FAPI UL_TTI conventions so the
//! PHY can consume them without further translation.

use bitflags::bitflags;
use bytes::Bytes;
use common::types::Rnti;

bitflags! {
    /// Optional parts present in a PUSCH PDU
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PuschPduBitmap: u8 {
        /// Transport block data is present
        const PUSCH_DATA = 1 << 0;
        /// UCI is multiplexed on PUSCH
        const PUSCH_UCI = 1 << 1;
        /// PTRS is transmitted
        const PUSCH_PTRS = 1 << 2;
        /// Transform precoding (DFT-s-OFDM) is applied
        const DFTS_OFDM = 1 << 3;
    }
}

/// DMRS configuration type (TS 38.211 Section 6.4.1.1.3)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmrsConfigType {
    /// Type 1: comb-2, up to 2 CDM groups
    Type1,
    /// Type 2: adjacent pairs, up to 3 CDM groups
    Type2,
}

/// MCS table selection (TS 38.214 Section 6.1.4.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McsTable {
    /// Table 5.1.3.1-1, up to 64QAM
    Qam64,
    /// Table 5.1.3.1-2, up to 256QAM
    Qam256,
}

/// Per-transport-block data parameters
#[derive(Debug, Clone)]
pub struct PuschData {
    /// Redundancy version index
    pub rv_index: u8,
    /// HARQ process number
    pub harq_process_id: u8,
    /// True on initial transmission of a transport block
    pub new_data_indicator: bool,
    /// Transport block size in bytes
    pub tb_size: u32,
    /// MAC PDU to transmit; filled by the scheduler at the TX slot
    pub tx_payload: Bytes,
}

/// UCI-on-PUSCH parameters, valid when `PUSCH_UCI` is set in the bitmap
#[derive(Debug, Clone, Copy, Default)]
pub struct PuschUci {
    /// Number of HARQ-ACK bits multiplexed on PUSCH
    pub harq_ack_bit_length: u16,
    /// Number of CSI part 1 bits
    pub csi_part1_bit_length: u16,
    /// Number of CSI part 2 bits
    pub csi_part2_bit_length: u16,
    /// Alpha scaling index (TS 38.212 Section 6.3.2.4)
    pub alpha_scaling: u8,
    /// Beta offset index for HARQ-ACK (TS 38.213 Table 9.3-1)
    pub beta_offset_harq_ack: u8,
    /// Beta offset index for CSI part 1
    pub beta_offset_csi1: u8,
    /// Beta offset index for CSI part 2
    pub beta_offset_csi2: u8,
}

/// PTRS parameters, valid when `PUSCH_PTRS` is set in the bitmap
#[derive(Debug, Clone, Copy, Default)]
pub struct PuschPtrs {
    /// Time density L_ptrs in symbols (1, 2 or 4)
    pub time_density: u8,
    /// Frequency density K_ptrs in RB (2 or 4)
    pub freq_density: u8,
    /// Bitmap of antenna ports carrying PTRS
    pub ports: u16,
    /// Resource-element offset k_RE_ref (TS 38.211 Table 6.4.1.2.2.1-1)
    pub re_offset: u8,
}

/// A scheduled PUSCH transmission
#[derive(Debug, Clone)]
pub struct PuschPdu {
    /// Which optional parts of this PDU are valid
    pub pdu_bit_map: PuschPduBitmap,
    pub rnti: Rnti,

    // Bandwidth part
    pub bwp_start: u16,
    pub bwp_size: u16,

    // Codeword
    /// Target code rate in units of 1/10240
    pub target_code_rate: u16,
    /// Modulation order Qm (2, 4, 6 or 8)
    pub qam_mod_order: u8,
    pub mcs_index: u8,
    pub mcs_table: McsTable,
    /// True when DFT-s-OFDM is applied
    pub transform_precoding: bool,
    pub data_scrambling_id: u16,
    pub nr_of_layers: u8,
    /// Transmitted precoding matrix indicator
    pub tpmi: u8,

    // DMRS
    /// Bitmap of symbols carrying DMRS within the slot
    pub ul_dmrs_symb_pos: u16,
    pub dmrs_config_type: DmrsConfigType,
    pub ul_dmrs_scrambling_id: u16,
    /// N_ID used with transform precoding
    pub pusch_identity: u16,
    /// DMRS sequence initialization n_SCID
    pub scid: u8,
    /// Number of DMRS CDM groups without data (1-3)
    pub num_dmrs_cdm_grps_no_data: u8,
    /// Bitmap of scheduled DMRS ports (bit p = port 1000 + p)
    pub dmrs_ports: u16,

    // Frequency allocation
    pub rb_start: u16,
    pub rb_size: u16,
    pub frequency_hopping: bool,

    // Time allocation
    pub start_symbol_index: u8,
    pub nr_of_symbols: u8,

    pub pusch_data: PuschData,
    pub uci: PuschUci,
    pub ptrs: PuschPtrs,

    /// Closed-loop power adjustment derived from the grant TPC field
    pub absolute_delta_pusch: i8,
}

impl Default for PuschData {
    fn default() -> Self {
        Self {
            rv_index: 0,
            harq_process_id: 0,
            new_data_indicator: true,
            tb_size: 0,
            tx_payload: Bytes::new(),
        }
    }
}

impl Default for PuschPdu {
    fn default() -> Self {
        Self {
            pdu_bit_map: PuschPduBitmap::empty(),
            rnti: Rnti::new(0),
            bwp_start: 0,
            bwp_size: 0,
            target_code_rate: 0,
            qam_mod_order: 2,
            mcs_index: 0,
            mcs_table: McsTable::Qam64,
            transform_precoding: false,
            data_scrambling_id: 0,
            nr_of_layers: 1,
            tpmi: 0,
            ul_dmrs_symb_pos: 0,
            dmrs_config_type: DmrsConfigType::Type1,
            ul_dmrs_scrambling_id: 0,
            pusch_identity: 0,
            scid: 0,
            num_dmrs_cdm_grps_no_data: 2,
            dmrs_ports: 1,
            rb_start: 0,
            rb_size: 0,
            frequency_hopping: false,
            start_symbol_index: 0,
            nr_of_symbols: 14,
            pusch_data: PuschData::default(),
            uci: PuschUci::default(),
            ptrs: PuschPtrs::default(),
            absolute_delta_pusch: 0,
        }
    }
}

/// PDU type discriminant for UL config bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UlConfigType {
    Pusch,
    Pucch,
    Prach,
    Srs,
}

/// Entry of the per-slot uplink configuration list
///
/// Only PUSCH carries a payload today; the other channels are staged as
/// placeholders so the slot list keeps one entry per scheduled PDU.
#[derive(Debug, Clone)]
pub enum UlConfigPdu {
    Pusch(Box<PuschPdu>),
    Pucch,
    Prach,
    Srs,
}

impl UlConfigPdu {
    pub fn pdu_type(&self) -> UlConfigType {
        match self {
            UlConfigPdu::Pusch(_) => UlConfigType::Pusch,
            UlConfigPdu::Pucch => UlConfigType::Pucch,
            UlConfigPdu::Prach => UlConfigType::Prach,
            UlConfigPdu::Srs => UlConfigType::Srs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bitmap_flags_combine() {
        let mut map = PuschPduBitmap::PUSCH_DATA;
        map |= PuschPduBitmap::DFTS_OFDM;
        assert!(map.contains(PuschPduBitmap::PUSCH_DATA));
        assert!(map.contains(PuschPduBitmap::DFTS_OFDM));
        assert!(!map.contains(PuschPduBitmap::PUSCH_UCI));
    }

    #[test]
    fn test_pdu_type_discriminants() {
        let pusch = UlConfigPdu::Pusch(Box::new(PuschPdu::default()));
        assert_eq!(pusch.pdu_type(), UlConfigType::Pusch);
        assert_eq!(UlConfigPdu::Pucch.pdu_type(), UlConfigType::Pucch);
        assert_eq!(UlConfigPdu::Prach.pdu_type(), UlConfigType::Prach);
        assert_eq!(UlConfigPdu::Srs.pdu_type(), UlConfigType::Srs);
    }
}
