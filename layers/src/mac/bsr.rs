//! Buffer status reporting (TS 38.321 Section 5.4.5)
//!
//! Buffer levels are quantized through the 5-bit table of TS 38.321
//! Table 6.1.3.1-1 for short reports and an 8-bit table for long reports.
//! Trigger state (regular, periodic, retransmission) lives in [`BsrState`]
//! and is ticked once per uplink slot by the scheduler.

use std::sync::OnceLock;

use common::timers::SlotTimer;

/// 5-bit buffer size levels in bytes; index 31 means "above the last level"
pub const SHORT_BSR_TABLE: [u32; 32] = [
    0, 10, 14, 20, 28, 38, 53, 74, 102, 142, 198, 276, 384, 535, 745, 1038, 1446, 2014, 2806,
    3909, 5446, 7587, 10570, 14726, 20516, 28581, 39818, 55474, 77284, 107669, 150000, 300000,
];

/// Largest buffer level representable by the 8-bit table
const LONG_BSR_MAX_BYTES: f64 = 81_338_368.0;

fn long_bsr_table() -> &'static [u32; 256] {
    static TABLE: OnceLock<[u32; 256]> = OnceLock::new();
    TABLE.get_or_init(|| {
        // Levels grow geometrically from 10 bytes to the maximum over 254
        // steps, kept strictly increasing after the floor.
        let ratio = (LONG_BSR_MAX_BYTES / 10.0).powf(1.0 / 253.0);
        let mut table = [0u32; 256];
        for k in 1..=254usize {
            let level = (10.0 * ratio.powi(k as i32 - 1)).floor() as u32;
            table[k] = level.max(table[k - 1] + 1);
        }
        table[255] = u32::MAX;
        table
    })
}

/// Smallest 5-bit index whose level covers `bytes`
pub fn short_bsr_index(bytes: u32) -> u8 {
    match SHORT_BSR_TABLE.binary_search(&bytes) {
        Ok(idx) => idx as u8,
        Err(idx) => (idx as u8).min(31),
    }
}

/// Smallest 8-bit index whose level covers `bytes`
pub fn long_bsr_index(bytes: u32) -> u8 {
    let table = long_bsr_table();
    match table.binary_search(&bytes) {
        Ok(idx) => idx as u8,
        Err(idx) => (idx as u8).min(255),
    }
}

/// MAC CE layout chosen for a buffer status report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BsrFormat {
    Short,
    ShortTruncated,
    Long,
    LongTruncated,
}

/// Short BSR CE: LCG id in the top 3 bits, buffer size index below
pub fn encode_short_bsr(lcg_id: u8, buffer_bytes: u32) -> u8 {
    (lcg_id << 5) | short_bsr_index(buffer_bytes)
}

/// Long BSR CE: LCG presence bitmap followed by one buffer size octet
/// per reported LCG, in increasing LCG order.
pub fn encode_long_bsr(buffer_per_lcg: &[Option<u32>; 8]) -> Vec<u8> {
    let mut ce = Vec::with_capacity(9);
    let mut bitmap = 0u8;
    for (lcg, buffer) in buffer_per_lcg.iter().enumerate() {
        if buffer.is_some() {
            bitmap |= 1 << lcg;
        }
    }
    ce.push(bitmap);
    for buffer in buffer_per_lcg.iter().flatten() {
        ce.push(long_bsr_index(*buffer));
    }
    ce
}

/// Size in bytes of the long BSR CE (without subheader) for `num_lcgs`
pub fn long_bsr_ce_size(num_lcgs: usize) -> usize {
    1 + num_lcgs
}

/// BSR trigger and timer state
pub struct BsrState {
    pub regular_triggered: bool,
    pub periodic_triggered: bool,
    periodic_timer: SlotTimer,
    retx_timer: SlotTimer,
}

impl BsrState {
    pub fn new(periodic_timer_slots: u32, retx_timer_slots: u32) -> Self {
        let mut periodic_timer = SlotTimer::new(periodic_timer_slots);
        periodic_timer.start();
        Self {
            regular_triggered: false,
            periodic_triggered: false,
            periodic_timer,
            retx_timer: SlotTimer::new(retx_timer_slots),
        }
    }

    /// Advance both timers by one slot. `data_pending` gates the
    /// retransmission trigger: an expired retxBSR-Timer only raises a
    /// regular BSR while there is still data to report.
    pub fn tick(&mut self, data_pending: bool) {
        if self.periodic_timer.tick() {
            self.periodic_triggered = true;
        }
        if self.retx_timer.tick() && data_pending {
            self.regular_triggered = true;
        }
    }

    /// New data arrived on a logical channel; raises a regular BSR.
    pub fn trigger_regular(&mut self) {
        self.regular_triggered = true;
    }

    pub fn triggered(&self) -> bool {
        self.regular_triggered || self.periodic_triggered
    }

    /// A BSR was included in a MAC PDU: clear triggers and restart timers.
    pub fn reported(&mut self) {
        self.regular_triggered = false;
        self.periodic_triggered = false;
        self.periodic_timer.start();
        self.retx_timer.start();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_index_boundaries() {
        assert_eq!(short_bsr_index(0), 0);
        assert_eq!(short_bsr_index(10), 1);
        assert_eq!(short_bsr_index(11), 2);
        assert_eq!(short_bsr_index(150000), 30);
        assert_eq!(short_bsr_index(150001), 31);
        assert_eq!(short_bsr_index(u32::MAX), 31);
    }

    #[test]
    fn test_long_table_monotonic() {
        let table = long_bsr_table();
        for k in 1..256 {
            assert!(table[k] > table[k - 1], "index {}", k);
        }
        assert_eq!(table[0], 0);
        assert_eq!(table[1], 10);
        // last finite level covers the configured maximum
        assert!(table[254] >= 81_000_000);
    }

    #[test]
    fn test_long_index_covers_value() {
        let table = long_bsr_table();
        for bytes in [0u32, 1, 10, 999, 50_000, 1_000_000, 81_338_368] {
            let idx = long_bsr_index(bytes) as usize;
            assert!(table[idx] >= bytes);
            if idx > 0 {
                assert!(table[idx - 1] < bytes);
            }
        }
    }

    #[test]
    fn test_short_ce_layout() {
        let ce = encode_short_bsr(3, 100);
        assert_eq!(ce >> 5, 3);
        assert_eq!(ce & 0x1f, short_bsr_index(100));
    }

    #[test]
    fn test_long_ce_layout() {
        let mut buffers = [None; 8];
        buffers[0] = Some(500u32);
        buffers[4] = Some(70_000u32);
        let ce = encode_long_bsr(&buffers);
        assert_eq!(ce.len(), 3);
        assert_eq!(ce[0], 0b0001_0001);
        assert_eq!(ce[1], long_bsr_index(500));
        assert_eq!(ce[2], long_bsr_index(70_000));
    }

    #[test]
    fn test_periodic_trigger_and_report() {
        let mut state = BsrState::new(3, 100);
        assert!(!state.triggered());
        state.tick(false);
        state.tick(false);
        state.tick(false);
        assert!(state.periodic_triggered);
        state.reported();
        assert!(!state.triggered());
        // timer restarted: fires again after the full period
        state.tick(false);
        state.tick(false);
        assert!(!state.triggered());
        state.tick(false);
        assert!(state.triggered());
    }

    #[test]
    fn test_retx_trigger_needs_pending_data() {
        let mut state = BsrState::new(1000, 2);
        state.reported(); // starts the retx timer
        state.tick(false);
        state.tick(false);
        assert!(!state.regular_triggered);
        state.reported();
        state.tick(true);
        state.tick(true);
        assert!(state.regular_triggered);
    }
}
