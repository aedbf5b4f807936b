//! PUSCH PDU construction from decoded uplink grants
//!
//! Turns a DCI 0_0/0_1, a RAR UL grant or the configured MsgA resource
//! into the FAPI-style [`PuschPdu`] the PHY consumes, resolving MCS, TBS,
//! DMRS ports, PTRS densities and precoding according to TS 38.212
//! Section 7.3.1.1 and TS 38.214 Section 6.1.

use tracing::{debug, error, warn};

use interfaces::dci::{RarUlGrant, UlDci, UlDciFormat};
use interfaces::pusch::{DmrsConfigType, McsTable, PuschData, PuschPdu, PuschPduBitmap};

use crate::mac::tables::{compute_tbs, decode_riv, dmrs_re_per_prb, mcs_qm_and_rate};
use crate::mac::{MsgAPuschResource, TdaEntry, UeMac, NUM_UL_HARQ};
use crate::phy::dmrs::{dmrs_symbol_mask, MappingType};
use crate::phy::ptrs::select_densities;
use crate::LayerError;

/// An uplink grant in any of the forms the UE can receive one
#[derive(Debug, Clone)]
pub enum UlGrant {
    Dci(UlDci),
    Rar(RarUlGrant),
    MsgA(MsgAPuschResource),
}

/// Accumulated TPC command to dB mapping (TS 38.213 Table 7.1.1-1)
const TPC_ACCUMULATED_DB: [i8; 4] = [-1, 0, 1, 3];

/// Number of layers and TPMI from the precoding information field
/// (TS 38.212 Tables 7.3.1.1.2-2..4; 4-port entries restricted to the
/// non-coherent codebook subset).
fn decode_precoding_information(
    num_antenna_ports: u8,
    max_rank: u8,
    value: u8,
) -> Result<(u8, u8), LayerError> {
    let entry = match (num_antenna_ports, max_rank, value) {
        (1, _, _) => (1, 0),
        // 2 ports, fully coherent
        (2, 1, 0..=5) => (1, value),
        (2, 2.., 0) => (1, 0),
        (2, 2.., 1) => (1, 1),
        (2, 2.., 2) => (2, 0),
        (2, 2.., 3) => (1, 2),
        (2, 2.., 4) => (1, 3),
        (2, 2.., 5) => (1, 4),
        (2, 2.., 6) => (1, 5),
        (2, 2.., 7) => (2, 1),
        (2, 2.., 8) => (2, 2),
        // 4 ports, non-coherent subset
        (4, 1, 0..=3) => (1, value),
        (4, 2.., 0..=3) => (1, value),
        (4, 2, 4..=9) => (2, value - 4),
        (4, 3.., 4..=9) => (2, value - 4),
        (4, 3.., 10) => (3, 0),
        (4, 4, 11) => (4, 0),
        _ => {
            return Err(LayerError::InvalidPdu);
        }
    };
    if entry.0 > max_rank {
        return Err(LayerError::InvalidPdu);
    }
    Ok(entry)
}

/// CDM groups without data and DMRS port bitmap from the antenna ports
/// field (TS 38.212 Tables 7.3.1.1.2-6..15, maxLength 1).
fn decode_antenna_ports(
    transform_precoding: bool,
    config_type: DmrsConfigType,
    nr_of_layers: u8,
    value: u8,
) -> Result<(u8, u16), LayerError> {
    fn ports(list: &[u8]) -> u16 {
        list.iter().fold(0u16, |m, &p| m | (1 << p))
    }
    let entry = match (transform_precoding, config_type, nr_of_layers, value) {
        // Table 7.3.1.1.2-6
        (true, DmrsConfigType::Type1, 1, 0..=3) => (2, ports(&[value])),
        // Table 7.3.1.1.2-8
        (false, DmrsConfigType::Type1, 1, 0..=1) => (1, ports(&[value])),
        (false, DmrsConfigType::Type1, 1, 2..=5) => (2, ports(&[value - 2])),
        // Table 7.3.1.1.2-9
        (false, DmrsConfigType::Type1, 2, 0) => (1, ports(&[0, 1])),
        (false, DmrsConfigType::Type1, 2, 1) => (2, ports(&[0, 1])),
        (false, DmrsConfigType::Type1, 2, 2) => (2, ports(&[2, 3])),
        (false, DmrsConfigType::Type1, 2, 3) => (2, ports(&[0, 2])),
        // Tables 7.3.1.1.2-10/11
        (false, DmrsConfigType::Type1, 3, 0) => (2, ports(&[0, 1, 2])),
        (false, DmrsConfigType::Type1, 4, 0) => (2, ports(&[0, 1, 2, 3])),
        // Table 7.3.1.1.2-12
        (false, DmrsConfigType::Type2, 1, 0..=1) => (1, ports(&[value])),
        (false, DmrsConfigType::Type2, 1, 2..=5) => (2, ports(&[value - 2])),
        (false, DmrsConfigType::Type2, 1, 6..=11) => (3, ports(&[value - 6])),
        // Table 7.3.1.1.2-13
        (false, DmrsConfigType::Type2, 2, 0) => (1, ports(&[0, 1])),
        (false, DmrsConfigType::Type2, 2, 1) => (2, ports(&[0, 1])),
        (false, DmrsConfigType::Type2, 2, 2) => (2, ports(&[2, 3])),
        (false, DmrsConfigType::Type2, 2, 3) => (3, ports(&[0, 1])),
        (false, DmrsConfigType::Type2, 2, 4) => (3, ports(&[2, 3])),
        (false, DmrsConfigType::Type2, 2, 5) => (3, ports(&[4, 5])),
        // Table 7.3.1.1.2-14
        (false, DmrsConfigType::Type2, 3, 0) => (2, ports(&[0, 1, 2])),
        (false, DmrsConfigType::Type2, 3, 1) => (3, ports(&[0, 1, 2])),
        // Table 7.3.1.1.2-15
        (false, DmrsConfigType::Type2, 4, 0) => (2, ports(&[0, 1, 2, 3])),
        (false, DmrsConfigType::Type2, 4, 1) => (3, ports(&[0, 1, 2, 3])),
        _ => return Err(LayerError::InvalidPdu),
    };
    Ok(entry)
}

impl UeMac {
    pub(crate) fn tda_entry(&self, index: u8) -> Result<TdaEntry, LayerError> {
        self.config
            .tda_table
            .get(index as usize)
            .copied()
            .ok_or_else(|| {
                LayerError::InvalidConfiguration(format!(
                    "time-domain allocation row {} not configured",
                    index
                ))
            })
    }

    /// Build the PUSCH PDU for an uplink grant.
    ///
    /// On a toggled NDI the transport block size is computed and cached in
    /// the HARQ process; a retransmission grant reuses the cached size so
    /// the TB length never changes across redundancy versions.
    pub(crate) fn config_pusch_pdu(&mut self, grant: &UlGrant) -> Result<PuschPdu, LayerError> {
        match grant {
            UlGrant::Dci(dci) => self.pusch_from_dci(dci),
            UlGrant::Rar(rar) => self.pusch_from_rar(rar),
            UlGrant::MsgA(res) => self.pusch_from_msga(res),
        }
    }

    fn pusch_from_dci(&mut self, dci: &UlDci) -> Result<PuschPdu, LayerError> {
        let tda = self.tda_entry(dci.time_domain_assignment)?;
        let (rb_start, rb_size) = decode_riv(dci.frequency_domain_assignment, self.config.bwp_size)?;

        let mut pdu = PuschPdu {
            pdu_bit_map: PuschPduBitmap::PUSCH_DATA,
            rnti: self.config.rnti,
            bwp_start: self.config.bwp_start,
            bwp_size: self.config.bwp_size,
            rb_start,
            rb_size,
            frequency_hopping: dci.frequency_hopping,
            start_symbol_index: tda.start_symbol,
            nr_of_symbols: tda.num_symbols,
            data_scrambling_id: self.config.data_scrambling_id,
            ul_dmrs_scrambling_id: self.config.ul_dmrs_scrambling_id,
            pusch_identity: self.config.pusch_identity,
            dmrs_config_type: self.config.dmrs_config_type,
            transform_precoding: self.config.transform_precoding,
            mcs_index: dci.mcs,
            ..Default::default()
        };
        if pdu.transform_precoding {
            pdu.pdu_bit_map |= PuschPduBitmap::DFTS_OFDM;
        }

        // Layers, TPMI and DMRS ports
        match dci.format {
            UlDciFormat::Format0_0 => {
                pdu.mcs_table = McsTable::Qam64;
                pdu.nr_of_layers = 1;
                pdu.tpmi = 0;
                pdu.num_dmrs_cdm_grps_no_data = 2;
                pdu.dmrs_ports = 1;
                pdu.scid = 0;
            }
            UlDciFormat::Format0_1 => {
                pdu.mcs_table = self.config.mcs_table;
                let (nl, tpmi) = decode_precoding_information(
                    self.config.num_antenna_ports,
                    self.config.max_rank,
                    dci.precoding_information,
                )?;
                pdu.nr_of_layers = nl;
                pdu.tpmi = tpmi;
                let (num_cdm, ports) = decode_antenna_ports(
                    pdu.transform_precoding,
                    pdu.dmrs_config_type,
                    nl,
                    dci.antenna_ports,
                )?;
                pdu.num_dmrs_cdm_grps_no_data = num_cdm;
                pdu.dmrs_ports = ports;
                pdu.scid = dci.dmrs_sequence_initialization & 1;
            }
        }

        pdu.ul_dmrs_symb_pos = dmrs_symbol_mask(
            tda.mapping_type,
            self.config.dmrs_type_a_position,
            self.config.dmrs_additional_position,
            tda.start_symbol,
            tda.num_symbols,
        )?;

        let (qm, rate) = mcs_qm_and_rate(dci.mcs, pdu.mcs_table)?;
        pdu.qam_mod_order = qm;
        if pdu.qam_mod_order == 0 {
            error!(mcs = dci.mcs, "grant resolves to zero modulation order");
            return Err(LayerError::InvalidPdu);
        }

        // HARQ: a toggled NDI starts a new transport block
        let pid = dci.harq_pid as usize % NUM_UL_HARQ;
        let new_data = match self.harq[pid].last_ndi {
            None => true,
            Some(prev) => prev != dci.ndi,
        };
        if rate > 0 {
            pdu.target_code_rate = rate;
            let dmrs_re = dmrs_re_per_prb(
                pdu.dmrs_config_type,
                pdu.num_dmrs_cdm_grps_no_data,
                pdu.ul_dmrs_symb_pos,
            );
            let tbs_bits = compute_tbs(
                qm,
                rate,
                rb_size,
                tda.num_symbols,
                dmrs_re,
                0,
                0,
                pdu.nr_of_layers,
            );
            self.harq[pid].tb_size_bytes = tbs_bits >> 3;
            self.harq[pid].target_code_rate = rate;
            self.harq[pid].qam_mod_order = qm;
        } else {
            // reserved MCS entry: only valid on retransmission, where the
            // rate and size of the initial transmission are reused
            if new_data {
                warn!(
                    mcs = dci.mcs,
                    harq_pid = pid,
                    "reserved MCS on a new transport block"
                );
                return Err(LayerError::InvalidState(
                    "retransmission MCS without a stored transport block".into(),
                ));
            }
            pdu.target_code_rate = self.harq[pid].target_code_rate;
        }
        self.harq[pid].last_ndi = Some(dci.ndi);

        let tb_size = self.harq[pid].tb_size_bytes;
        if tb_size == 0 {
            error!(harq_pid = pid, "transport block size resolved to zero");
            return Err(LayerError::InvalidPdu);
        }
        pdu.pusch_data = PuschData {
            rv_index: dci.rv,
            harq_process_id: pid as u8,
            new_data_indicator: new_data,
            tb_size,
            tx_payload: bytes::Bytes::new(),
        };

        // PTRS only applies to CP-OFDM grants with a configured PTRS
        if dci.format == UlDciFormat::Format0_1 && !pdu.transform_precoding {
            if let Some(ptrs_cfg) = &self.config.ptrs {
                match select_densities(ptrs_cfg, dci.mcs, rb_size) {
                    Some(densities) => {
                        pdu.pdu_bit_map |= PuschPduBitmap::PUSCH_PTRS;
                        pdu.ptrs.time_density = densities.time_density;
                        pdu.ptrs.freq_density = densities.freq_density;
                        pdu.ptrs.re_offset = ptrs_cfg.re_offset;
                        // PTRS on the lowest indexed scheduled DMRS port
                        pdu.ptrs.ports = 1 << pdu.dmrs_ports.trailing_zeros().min(15);
                    }
                    None => {
                        debug!(
                            mcs = dci.mcs,
                            rb_size, "PTRS disabled by density thresholds"
                        );
                    }
                }
            }
        }

        // Closed-loop power control is not wired through yet, so the
        // accumulated TPC offset is computed but not applied.
        pdu.absolute_delta_pusch = TPC_ACCUMULATED_DB[(dci.tpc & 3) as usize];
        pdu.absolute_delta_pusch = 0;

        Ok(pdu)
    }

    fn pusch_from_rar(&mut self, rar: &RarUlGrant) -> Result<PuschPdu, LayerError> {
        let tda = self.tda_entry(rar.time_domain_assignment)?;
        let (rb_start, rb_size) = decode_riv(rar.frequency_domain_assignment, self.config.bwp_size)?;
        // the grant MCS field is 4 bits wide
        let mcs = rar.mcs & 0xf;
        let (qm, rate) = mcs_qm_and_rate(mcs, McsTable::Qam64)?;

        let mut pdu = PuschPdu {
            pdu_bit_map: PuschPduBitmap::PUSCH_DATA,
            rnti: self.config.rnti,
            bwp_start: self.config.bwp_start,
            bwp_size: self.config.bwp_size,
            rb_start,
            rb_size,
            frequency_hopping: rar.frequency_hopping,
            start_symbol_index: tda.start_symbol,
            nr_of_symbols: tda.num_symbols,
            mcs_index: mcs,
            mcs_table: McsTable::Qam64,
            qam_mod_order: qm,
            target_code_rate: rate,
            transform_precoding: self.config.transform_precoding,
            data_scrambling_id: self.config.data_scrambling_id,
            ul_dmrs_scrambling_id: self.config.ul_dmrs_scrambling_id,
            pusch_identity: self.config.pusch_identity,
            dmrs_config_type: self.config.dmrs_config_type,
            nr_of_layers: 1,
            num_dmrs_cdm_grps_no_data: 2,
            dmrs_ports: 1,
            ..Default::default()
        };
        if pdu.transform_precoding {
            pdu.pdu_bit_map |= PuschPduBitmap::DFTS_OFDM;
        }
        pdu.ul_dmrs_symb_pos = dmrs_symbol_mask(
            tda.mapping_type,
            self.config.dmrs_type_a_position,
            self.config.dmrs_additional_position,
            tda.start_symbol,
            tda.num_symbols,
        )?;

        let dmrs_re = dmrs_re_per_prb(pdu.dmrs_config_type, 2, pdu.ul_dmrs_symb_pos);
        let tbs_bits = compute_tbs(qm, rate, rb_size, tda.num_symbols, dmrs_re, 0, 0, 1);
        // Msg3 always goes through HARQ process 0
        self.harq[0].tb_size_bytes = tbs_bits >> 3;
        self.harq[0].target_code_rate = rate;
        self.harq[0].qam_mod_order = qm;
        self.harq[0].last_ndi = Some(0);

        pdu.pusch_data = PuschData {
            rv_index: 0,
            harq_process_id: 0,
            new_data_indicator: true,
            tb_size: tbs_bits >> 3,
            tx_payload: bytes::Bytes::new(),
        };

        pdu.absolute_delta_pusch = TPC_ACCUMULATED_DB[(rar.tpc & 3) as usize];
        pdu.absolute_delta_pusch = 0;

        Ok(pdu)
    }

    fn pusch_from_msga(&mut self, res: &MsgAPuschResource) -> Result<PuschPdu, LayerError> {
        let (qm, rate) = mcs_qm_and_rate(res.mcs & 0xf, McsTable::Qam64)?;
        let mut pdu = PuschPdu {
            pdu_bit_map: PuschPduBitmap::PUSCH_DATA,
            rnti: self.config.rnti,
            bwp_start: self.config.bwp_start,
            bwp_size: self.config.bwp_size,
            rb_start: res.rb_start,
            rb_size: res.rb_size,
            start_symbol_index: res.start_symbol,
            nr_of_symbols: res.num_symbols,
            mcs_index: res.mcs & 0xf,
            mcs_table: McsTable::Qam64,
            qam_mod_order: qm,
            target_code_rate: rate,
            transform_precoding: self.config.transform_precoding,
            data_scrambling_id: self.config.data_scrambling_id,
            ul_dmrs_scrambling_id: self.config.ul_dmrs_scrambling_id,
            pusch_identity: self.config.pusch_identity,
            dmrs_config_type: self.config.dmrs_config_type,
            nr_of_layers: 1,
            num_dmrs_cdm_grps_no_data: 2,
            dmrs_ports: 1,
            ..Default::default()
        };
        if pdu.transform_precoding {
            pdu.pdu_bit_map |= PuschPduBitmap::DFTS_OFDM;
        }
        // The MsgA occasion is self-contained, mapping type B
        pdu.ul_dmrs_symb_pos = dmrs_symbol_mask(
            MappingType::TypeB,
            self.config.dmrs_type_a_position,
            self.config.dmrs_additional_position,
            res.start_symbol,
            res.num_symbols,
        )?;

        let dmrs_re = dmrs_re_per_prb(pdu.dmrs_config_type, 2, pdu.ul_dmrs_symb_pos);
        let tbs_bits = compute_tbs(qm, rate, res.rb_size, res.num_symbols, dmrs_re, 0, 0, 1);
        pdu.pusch_data = PuschData {
            rv_index: 0,
            harq_process_id: 0,
            new_data_indicator: true,
            tb_size: tbs_bits >> 3,
            tx_payload: bytes::Bytes::new(),
        };
        Ok(pdu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mac::scheduler::tests::{test_config, test_mac};
    use interfaces::pusch::PuschPduBitmap;

    fn dci_0_0(mcs: u8, ndi: u8, rv: u8, pid: u8) -> UlDci {
        // RIV for 10 RBs starting at RB 2 in a 51-RB BWP
        UlDci::format0_0(51 * 9 + 2, 0, mcs, ndi, rv, pid, 1)
    }

    #[test]
    fn test_dci_0_0_basic_fields() {
        let mut mac = test_mac(test_config());
        let pdu = mac.config_pusch_pdu(&UlGrant::Dci(dci_0_0(9, 1, 0, 0))).unwrap();
        assert_eq!(pdu.rb_start, 2);
        assert_eq!(pdu.rb_size, 10);
        assert_eq!(pdu.nr_of_layers, 1);
        assert_eq!(pdu.qam_mod_order, 2);
        assert_eq!(pdu.target_code_rate, 6790);
        assert_eq!(pdu.num_dmrs_cdm_grps_no_data, 2);
        assert!(pdu.pusch_data.new_data_indicator);
        assert!(pdu.pusch_data.tb_size > 0);
        // TPC is decoded but not applied
        assert_eq!(pdu.absolute_delta_pusch, 0);
    }

    #[test]
    fn test_ndi_toggle_controls_tbs_cache() {
        let mut mac = test_mac(test_config());
        let first = mac.config_pusch_pdu(&UlGrant::Dci(dci_0_0(9, 1, 0, 3))).unwrap();
        // same NDI: retransmission, cached TBS reused even with the
        // reserved MCS 29 that carries no code rate
        let retx = mac.config_pusch_pdu(&UlGrant::Dci(dci_0_0(29, 1, 2, 3))).unwrap();
        assert!(!retx.pusch_data.new_data_indicator);
        assert_eq!(retx.pusch_data.tb_size, first.pusch_data.tb_size);
        assert_eq!(retx.target_code_rate, first.target_code_rate);
        assert_eq!(retx.qam_mod_order, 2);
        // toggled NDI: new transport block
        let next = mac.config_pusch_pdu(&UlGrant::Dci(dci_0_0(9, 0, 0, 3))).unwrap();
        assert!(next.pusch_data.new_data_indicator);
    }

    #[test]
    fn test_reserved_mcs_rejected_on_new_data() {
        let mut mac = test_mac(test_config());
        let res = mac.config_pusch_pdu(&UlGrant::Dci(dci_0_0(29, 1, 0, 5)));
        assert!(res.is_err());
    }

    #[test]
    fn test_dci_0_1_layers_and_ports() {
        let mut cfg = test_config();
        cfg.num_antenna_ports = 2;
        cfg.max_rank = 2;
        let mut mac = test_mac(cfg);
        let mut dci = dci_0_0(9, 1, 0, 0);
        dci.format = UlDciFormat::Format0_1;
        dci.precoding_information = 7; // 2 layers, TPMI 1
        dci.antenna_ports = 1; // 2 CDM groups, ports {0,1}
        let pdu = mac.config_pusch_pdu(&UlGrant::Dci(dci)).unwrap();
        assert_eq!(pdu.nr_of_layers, 2);
        assert_eq!(pdu.tpmi, 1);
        assert_eq!(pdu.num_dmrs_cdm_grps_no_data, 2);
        assert_eq!(pdu.dmrs_ports, 0b11);
    }

    #[test]
    fn test_ptrs_enabled_and_silently_disabled() {
        let mut cfg = test_config();
        cfg.ptrs = Some(crate::phy::ptrs::PtrsUplinkConfig {
            ptrs_mcs: [5, 10, 20],
            freq_density: [5, 75],
            re_offset: 0,
        });
        let mut mac = test_mac(cfg);
        let mut dci = dci_0_0(9, 1, 0, 0);
        dci.format = UlDciFormat::Format0_1;
        let pdu = mac.config_pusch_pdu(&UlGrant::Dci(dci)).unwrap();
        assert!(pdu.pdu_bit_map.contains(PuschPduBitmap::PUSCH_PTRS));
        assert_eq!(pdu.ptrs.time_density, 4);
        assert_eq!(pdu.ptrs.freq_density, 2);

        // MCS below the first threshold: PTRS bit silently absent
        let mut dci = dci_0_0(2, 0, 0, 0);
        dci.format = UlDciFormat::Format0_1;
        let pdu = mac.config_pusch_pdu(&UlGrant::Dci(dci)).unwrap();
        assert!(!pdu.pdu_bit_map.contains(PuschPduBitmap::PUSCH_PTRS));
    }

    #[test]
    fn test_rar_grant_uses_harq_zero() {
        let mut mac = test_mac(test_config());
        let rar = RarUlGrant {
            frequency_hopping: false,
            frequency_domain_assignment: 51 * 2, // 3 RBs at RB 0
            time_domain_assignment: 0,
            mcs: 2,
            tpc: 3,
            csi_request: false,
        };
        let pdu = mac.config_pusch_pdu(&UlGrant::Rar(rar)).unwrap();
        assert_eq!(pdu.rb_size, 3);
        assert_eq!(pdu.pusch_data.harq_process_id, 0);
        assert!(pdu.pusch_data.new_data_indicator);
        assert_eq!(pdu.mcs_table, McsTable::Qam64);
    }

    #[test]
    fn test_msga_static_resource() {
        let mut mac = test_mac(test_config());
        let res = MsgAPuschResource {
            rb_start: 4,
            rb_size: 2,
            start_symbol: 0,
            num_symbols: 6,
            mcs: 1,
            time_offset_slots: 4,
        };
        let pdu = mac.config_pusch_pdu(&UlGrant::MsgA(res)).unwrap();
        assert_eq!(pdu.rb_start, 4);
        assert_eq!(pdu.rb_size, 2);
        assert_eq!(pdu.nr_of_symbols, 6);
        assert!(pdu.pusch_data.tb_size > 0);
    }

    #[test]
    fn test_bad_tda_index_rejected() {
        let mut mac = test_mac(test_config());
        let mut dci = dci_0_0(9, 1, 0, 0);
        dci.time_domain_assignment = 9;
        assert!(mac.config_pusch_pdu(&UlGrant::Dci(dci)).is_err());
    }
}
