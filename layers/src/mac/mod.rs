//! UE MAC layer: uplink scheduling, grant handling and PDU assembly
//!
//! The MAC receives decoded uplink grants (DCI, RAR, configured MsgA
//! resources), turns them into FAPI-style PUSCH PDUs parked in the
//! [`ul_config::UlConfigStore`], and on each uplink slot indication fills
//! the pending PDUs with MAC transport blocks and hands them to the PHY
//! through the [`ScheduledResponseSink`].

pub mod bsr;
pub mod lcp;
pub mod phr;
pub mod pusch_config;
pub mod scheduler;
pub mod tables;
pub mod ul_config;

use std::sync::Arc;

use bytes::Bytes;

use common::timers::SlotTimer;
use common::types::{DuplexMode, FrameSlot, Rnti, SubcarrierSpacing, TddPattern};
use interfaces::pusch::{DmrsConfigType, McsTable};
use interfaces::rlc::RlcUplink;
use interfaces::scheduled_response::ScheduledResponseSink;

use crate::mac::bsr::BsrState;
use crate::mac::lcp::{LcpEngine, LogicalChannelConfig};
use crate::mac::phr::{PhrConfig, PhrState};
use crate::mac::ul_config::UlConfigStore;
use crate::phy::dmrs::MappingType;
use crate::phy::ptrs::PtrsUplinkConfig;
use crate::LayerError;

/// Number of uplink HARQ processes
pub const NUM_UL_HARQ: usize = 16;

/// Row of the PUSCH time-domain allocation table (TS 38.214 Table 6.1.2.1.1-2)
#[derive(Debug, Clone, Copy)]
pub struct TdaEntry {
    /// Slot offset between the grant and the PUSCH
    pub k2: u32,
    pub mapping_type: MappingType,
    pub start_symbol: u8,
    pub num_symbols: u8,
}

/// Configured grant resource for 2-step RA MsgA PUSCH
#[derive(Debug, Clone, Copy)]
pub struct MsgAPuschResource {
    pub rb_start: u16,
    pub rb_size: u16,
    pub start_symbol: u8,
    pub num_symbols: u8,
    pub mcs: u8,
    /// Slots between the preamble occasion and the PUSCH occasion
    pub time_offset_slots: u32,
}

/// Semi-static UE MAC configuration, distilled from RRC
#[derive(Debug, Clone)]
pub struct UeMacConfig {
    pub rnti: Rnti,
    pub scs: SubcarrierSpacing,
    pub duplex_mode: DuplexMode,
    pub tdd: Option<TddPattern>,

    // Active uplink BWP
    pub bwp_start: u16,
    pub bwp_size: u16,

    // PUSCH-Config
    pub mcs_table: McsTable,
    pub transform_precoding: bool,
    pub data_scrambling_id: u16,
    pub num_antenna_ports: u8,
    pub max_rank: u8,
    pub tda_table: Vec<TdaEntry>,

    // DMRS-UplinkConfig
    pub dmrs_config_type: DmrsConfigType,
    /// dmrs-TypeA-Position: first DMRS symbol for mapping type A (2 or 3)
    pub dmrs_type_a_position: u8,
    /// dmrs-AdditionalPosition (0-3)
    pub dmrs_additional_position: u8,
    pub ul_dmrs_scrambling_id: u16,
    pub pusch_identity: u16,

    /// PTRS-UplinkConfig; absent when PTRS is not configured
    pub ptrs: Option<PtrsUplinkConfig>,

    // MAC-CellGroupConfig
    pub logical_channels: Vec<LogicalChannelConfig>,
    pub periodic_bsr_timer_slots: u32,
    pub retx_bsr_timer_slots: u32,
    pub phr: PhrConfig,
    pub time_alignment_timer_slots: u32,

    pub msga: Option<MsgAPuschResource>,
}

/// Per-process uplink HARQ bookkeeping
#[derive(Debug, Clone, Copy, Default)]
pub struct UlHarqInfo {
    /// NDI value of the last grant for this process; `None` before the
    /// first transmission
    pub last_ndi: Option<u8>,
    /// Cached transport block size in bytes, reused on retransmission
    pub tb_size_bytes: u32,
    /// Cached target code rate of the initial transmission
    pub target_code_rate: u16,
    /// Cached modulation order of the initial transmission
    pub qam_mod_order: u8,
}

/// UE MAC entity. Owns all scheduling state; one instance per cell.
pub struct UeMac {
    pub(crate) config: UeMacConfig,
    pub(crate) harq: [UlHarqInfo; NUM_UL_HARQ],
    pub(crate) ul_config: UlConfigStore,
    pub(crate) lcp: LcpEngine,
    pub(crate) bsr: BsrState,
    pub(crate) phr: PhrState,
    pub(crate) time_alignment_timer: SlotTimer,
    pub(crate) rlc: Box<dyn RlcUplink>,
    pub(crate) sink: Arc<dyn ScheduledResponseSink>,
    /// Pending Msg3: transmission slot and the stored payload that must
    /// be sent (and resent on retransmission) instead of a fresh PDU
    pub(crate) msg3: Option<(FrameSlot, Bytes)>,
    /// Slot of the last Bj refill
    pub(crate) last_bj_update: Option<FrameSlot>,
    /// Current downlink pathloss estimate in dB, fed by the PHY
    pub(crate) pathloss_db: u16,
}

impl UeMac {
    pub fn new(
        config: UeMacConfig,
        rlc: Box<dyn RlcUplink>,
        sink: Arc<dyn ScheduledResponseSink>,
    ) -> Result<Self, LayerError> {
        if config.bwp_size == 0 {
            return Err(LayerError::InvalidConfiguration("empty uplink BWP".into()));
        }
        if !matches!(config.num_antenna_ports, 1 | 2 | 4) {
            return Err(LayerError::InvalidConfiguration(format!(
                "unsupported antenna port count {}",
                config.num_antenna_ports
            )));
        }
        if !matches!(config.dmrs_type_a_position, 2 | 3) {
            return Err(LayerError::InvalidConfiguration(
                "dmrs-TypeA-Position must be pos2 or pos3".into(),
            ));
        }
        let ul_config = UlConfigStore::new(config.scs, config.duplex_mode, config.tdd);
        let lcp = LcpEngine::new(config.logical_channels.clone());
        let bsr = BsrState::new(config.periodic_bsr_timer_slots, config.retx_bsr_timer_slots);
        let phr = PhrState::new(config.phr);
        let mut time_alignment_timer = SlotTimer::new(config.time_alignment_timer_slots);
        time_alignment_timer.start();
        Ok(Self {
            config,
            harq: [UlHarqInfo::default(); NUM_UL_HARQ],
            ul_config,
            lcp,
            bsr,
            phr,
            time_alignment_timer,
            rlc,
            sink,
            msg3: None,
            last_bj_update: None,
            pathloss_db: 0,
        })
    }

    pub fn rnti(&self) -> Rnti {
        self.config.rnti
    }

    /// Update the downlink pathloss estimate used for PHR triggering.
    pub fn set_pathloss(&mut self, pathloss_db: u16) {
        self.pathloss_db = pathloss_db;
    }
}
