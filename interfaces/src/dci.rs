//! Decoded uplink grant structures
//!
//! Fields of DCI formats 0_0 and 0_1 (TS 38.212 Section 7.3.1.1) and of
//! the RAR UL grant (TS 38.213 Section 8.2), already extracted from the
//! bit-level payload by the downlink decoder.

use serde::{Deserialize, Serialize};

/// Uplink DCI format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UlDciFormat {
    /// Fallback format 0_0
    Format0_0,
    /// Non-fallback format 0_1
    Format0_1,
}

/// Decoded uplink DCI
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct UlDci {
    /// DCI format this grant was decoded from
    pub format: UlDciFormat,
    /// Frequency-domain resource assignment (RIV)
    pub frequency_domain_assignment: u16,
    /// Row index into the PUSCH time-domain allocation table
    pub time_domain_assignment: u8,
    /// Frequency hopping flag
    pub frequency_hopping: bool,
    /// Modulation and coding scheme index
    pub mcs: u8,
    /// New data indicator
    pub ndi: u8,
    /// Redundancy version
    pub rv: u8,
    /// HARQ process number
    pub harq_pid: u8,
    /// Transmit power control command
    pub tpc: u8,
    /// SRS resource indicator (format 0_1)
    pub srs_resource_indicator: u8,
    /// Precoding information and number of layers (format 0_1)
    pub precoding_information: u8,
    /// Antenna ports field (format 0_1)
    pub antenna_ports: u8,
    /// PTRS-DMRS association (format 0_1)
    pub ptrs_dmrs_association: u8,
    /// DMRS sequence initialization bit, n_SCID (format 0_1)
    pub dmrs_sequence_initialization: u8,
}

impl UlDci {
    /// Minimal fallback grant with everything not present in 0_0 zeroed
    pub fn format0_0(
        frequency_domain_assignment: u16,
        time_domain_assignment: u8,
        mcs: u8,
        ndi: u8,
        rv: u8,
        harq_pid: u8,
        tpc: u8,
    ) -> Self {
        Self {
            format: UlDciFormat::Format0_0,
            frequency_domain_assignment,
            time_domain_assignment,
            frequency_hopping: false,
            mcs,
            ndi,
            rv,
            harq_pid,
            tpc,
            srs_resource_indicator: 0,
            precoding_information: 0,
            antenna_ports: 0,
            ptrs_dmrs_association: 0,
            dmrs_sequence_initialization: 0,
        }
    }
}

/// RAR UL grant for the Msg3 transmission
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RarUlGrant {
    /// Frequency hopping flag
    pub frequency_hopping: bool,
    /// Msg3 frequency-domain resource assignment (RIV)
    pub frequency_domain_assignment: u16,
    /// Msg3 time-domain allocation row index
    pub time_domain_assignment: u8,
    /// MCS index (restricted to 0-15 by the grant field width)
    pub mcs: u8,
    /// TPC command for Msg3 PUSCH
    pub tpc: u8,
    /// CSI request bit
    pub csi_request: bool,
}
