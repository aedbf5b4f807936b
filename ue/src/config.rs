//! YAML configuration structures for the UE application

use serde::{Deserialize, Serialize};

use common::types::{DuplexMode, SubcarrierSpacing, TddPattern};

/// Top-level configuration file layout
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UeConfig {
    pub cell: CellConfig,
    pub pusch: PuschConfig,
    #[serde(default)]
    pub mac: MacConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// Serving cell parameters
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CellConfig {
    /// C-RNTI assigned to this UE
    pub rnti: u16,
    /// Subcarrier spacing in kHz (15, 30, 60, 120, 240)
    pub scs_khz: u16,
    /// "fdd" or "tdd"
    #[serde(default = "default_duplex")]
    pub duplex: String,
    /// TDD pattern, required when duplex is "tdd"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tdd: Option<TddConfig>,
    /// First RB of the active uplink BWP
    #[serde(default)]
    pub bwp_start: u16,
    /// Width of the active uplink BWP in RBs
    pub bwp_size: u16,
    /// FFT size of the transmit grid
    #[serde(default = "default_fft_size")]
    pub fft_size: usize,
    /// Number of transmit antenna ports (1, 2 or 4)
    #[serde(default = "default_one")]
    pub num_antenna_ports: u8,
}

fn default_duplex() -> String {
    "fdd".into()
}

fn default_fft_size() -> usize {
    1024
}

fn default_one() -> u8 {
    1
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct TddConfig {
    pub period_slots: u16,
    pub num_dl_slots: u16,
    pub num_ul_slots: u16,
}

impl From<TddConfig> for TddPattern {
    fn from(c: TddConfig) -> Self {
        TddPattern {
            period_slots: c.period_slots,
            num_dl_slots: c.num_dl_slots,
            num_ul_slots: c.num_ul_slots,
        }
    }
}

/// PUSCH and DMRS parameters
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PuschConfig {
    /// "qam64" or "qam256"
    #[serde(default = "default_mcs_table")]
    pub mcs_table: String,
    #[serde(default)]
    pub transform_precoding: bool,
    #[serde(default)]
    pub data_scrambling_id: u16,
    #[serde(default = "default_one")]
    pub max_rank: u8,
    /// DMRS configuration type (1 or 2)
    #[serde(default = "default_one")]
    pub dmrs_config_type: u8,
    /// dmrs-TypeA-Position (2 or 3)
    #[serde(default = "default_type_a_position")]
    pub dmrs_type_a_position: u8,
    /// dmrs-AdditionalPosition (0-3)
    #[serde(default = "default_one")]
    pub dmrs_additional_position: u8,
    #[serde(default)]
    pub dmrs_scrambling_id: u16,
    #[serde(default)]
    pub pusch_identity: u16,
    /// Time-domain allocation table
    #[serde(default = "default_tda_table")]
    pub time_domain_allocations: Vec<TdaConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ptrs: Option<PtrsConfig>,
}

fn default_mcs_table() -> String {
    "qam64".into()
}

fn default_type_a_position() -> u8 {
    2
}

fn default_tda_table() -> Vec<TdaConfig> {
    vec![TdaConfig {
        k2: 6,
        mapping_type: "typeA".into(),
        start_symbol: 0,
        num_symbols: 14,
    }]
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TdaConfig {
    pub k2: u32,
    /// "typeA" or "typeB"
    pub mapping_type: String,
    pub start_symbol: u8,
    pub num_symbols: u8,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct PtrsConfig {
    /// MCS thresholds ptrs-MCS1..3
    pub ptrs_mcs: [u8; 3],
    /// RB thresholds [N_RB0, N_RB1]
    pub freq_density: [u16; 2],
    #[serde(default)]
    pub re_offset: u8,
}

/// MAC timers and logical channels
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MacConfig {
    #[serde(default = "default_lc_table")]
    pub logical_channels: Vec<LogicalChannelYaml>,
    #[serde(default = "default_periodic_bsr")]
    pub periodic_bsr_timer_slots: u32,
    #[serde(default = "default_retx_bsr")]
    pub retx_bsr_timer_slots: u32,
    #[serde(default = "default_phr_periodic")]
    pub phr_periodic_timer_slots: u32,
    #[serde(default = "default_phr_prohibit")]
    pub phr_prohibit_timer_slots: u32,
    #[serde(default = "default_phr_change")]
    pub phr_tx_power_factor_change_db: u16,
    #[serde(default = "default_ta_timer")]
    pub time_alignment_timer_slots: u32,
}

impl Default for MacConfig {
    fn default() -> Self {
        Self {
            logical_channels: default_lc_table(),
            periodic_bsr_timer_slots: default_periodic_bsr(),
            retx_bsr_timer_slots: default_retx_bsr(),
            phr_periodic_timer_slots: default_phr_periodic(),
            phr_prohibit_timer_slots: default_phr_prohibit(),
            phr_tx_power_factor_change_db: default_phr_change(),
            time_alignment_timer_slots: default_ta_timer(),
        }
    }
}

fn default_lc_table() -> Vec<LogicalChannelYaml> {
    vec![LogicalChannelYaml {
        lcid: 4,
        lcg_id: Some(0),
        priority: 1,
        pbr_bytes_per_ms: None,
        bucket_size_ms: 100,
    }]
}

fn default_periodic_bsr() -> u32 {
    320
}

fn default_retx_bsr() -> u32 {
    640
}

fn default_phr_periodic() -> u32 {
    1000
}

fn default_phr_prohibit() -> u32 {
    200
}

fn default_phr_change() -> u16 {
    3
}

fn default_ta_timer() -> u32 {
    10240
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct LogicalChannelYaml {
    pub lcid: u8,
    #[serde(default)]
    pub lcg_id: Option<u8>,
    pub priority: u8,
    /// Prioritised bit rate in bytes/ms; absent means infinity
    #[serde(default)]
    pub pbr_bytes_per_ms: Option<u32>,
    #[serde(default = "default_bucket")]
    pub bucket_size_ms: u32,
}

fn default_bucket() -> u32 {
    100
}

/// Logging configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LogConfig {
    #[serde(default)]
    pub level: Option<String>,
}

impl UeConfig {
    pub fn scs(&self) -> anyhow::Result<SubcarrierSpacing> {
        match self.cell.scs_khz {
            15 => Ok(SubcarrierSpacing::Scs15),
            30 => Ok(SubcarrierSpacing::Scs30),
            60 => Ok(SubcarrierSpacing::Scs60),
            120 => Ok(SubcarrierSpacing::Scs120),
            240 => Ok(SubcarrierSpacing::Scs240),
            other => Err(anyhow::anyhow!("invalid subcarrier spacing: {} kHz", other)),
        }
    }

    pub fn duplex_mode(&self) -> anyhow::Result<DuplexMode> {
        match self.cell.duplex.as_str() {
            "fdd" => Ok(DuplexMode::Fdd),
            "tdd" => Ok(DuplexMode::Tdd),
            other => Err(anyhow::anyhow!("invalid duplex mode: {}", other)),
        }
    }
}
