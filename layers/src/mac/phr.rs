//! Power headroom reporting (TS 38.321 Section 5.4.6)
//!
//! Only the single-entry PHR MAC CE is produced: two octets carrying the
//! Type 1 power headroom and PCMAX, each quantized to the 6-bit ranges of
//! TS 38.133 Tables 10.1.17.1-1 and 10.1.18.1-1.

use common::timers::SlotTimer;

/// PH_0 of Table 10.1.17.1-1 in dB
const PH_MIN_DB: i16 = -32;
/// PCMAX_C_0 of Table 10.1.18.1-1 in dBm
const PCMAX_MIN_DBM: i16 = -29;

/// 6-bit report index for a Type 1 power headroom in dB
pub fn ph_index(ph_db: i16) -> u8 {
    (ph_db - PH_MIN_DB).clamp(0, 63) as u8
}

/// 6-bit report index for PCMAX in dBm
pub fn pcmax_index(pcmax_dbm: i16) -> u8 {
    (pcmax_dbm - PCMAX_MIN_DBM).clamp(0, 63) as u8
}

/// Single-entry PHR MAC CE
pub fn encode_single_entry_phr(ph_db: i16, pcmax_dbm: i16) -> [u8; 2] {
    [ph_index(ph_db), pcmax_index(pcmax_dbm)]
}

#[derive(Debug, Clone, Copy)]
pub struct PhrConfig {
    /// phr-PeriodicTimer in slots
    pub periodic_timer_slots: u32,
    /// phr-ProhibitTimer in slots
    pub prohibit_timer_slots: u32,
    /// phr-Tx-PowerFactorChange in dB
    pub tx_power_factor_change_db: u16,
}

/// PHR trigger and timer state
pub struct PhrState {
    config: PhrConfig,
    periodic_timer: SlotTimer,
    prohibit_timer: SlotTimer,
    triggered: bool,
    last_reported_pathloss_db: Option<u16>,
}

impl PhrState {
    pub fn new(config: PhrConfig) -> Self {
        let mut periodic_timer = SlotTimer::new(config.periodic_timer_slots);
        // First PHR goes out as soon as uplink resources allow
        periodic_timer.start();
        Self {
            config,
            periodic_timer,
            prohibit_timer: SlotTimer::new(config.prohibit_timer_slots),
            triggered: true,
            last_reported_pathloss_db: None,
        }
    }

    /// Advance timers by one slot; `pathloss_db` is the current downlink
    /// pathloss estimate used for the change trigger.
    pub fn tick(&mut self, pathloss_db: u16) {
        if self.periodic_timer.tick() {
            self.triggered = true;
        }
        let prohibit_expired = self.prohibit_timer.tick() || !self.prohibit_timer.is_active();
        if prohibit_expired {
            if let Some(last) = self.last_reported_pathloss_db {
                if pathloss_db.abs_diff(last) >= self.config.tx_power_factor_change_db {
                    self.triggered = true;
                }
            }
        }
    }

    pub fn triggered(&self) -> bool {
        self.triggered
    }

    /// A PHR CE was included in a MAC PDU.
    pub fn reported(&mut self, pathloss_db: u16) {
        self.triggered = false;
        self.last_reported_pathloss_db = Some(pathloss_db);
        self.periodic_timer.start();
        self.prohibit_timer.start();
    }
}
