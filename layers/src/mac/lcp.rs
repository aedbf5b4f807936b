//! Logical channel prioritization and UL-SCH MAC PDU assembly
//!
//! Implements the LCP procedure of TS 38.321 Section 5.4.3: a token
//! bucket (Bj) per logical channel enforces the prioritised bit rate in
//! the first allocation round, strict priority order with equal-priority
//! splitting governs who gets the remaining space, and BSR/PHR MAC CEs
//! plus padding complete the transport block.

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, trace, warn};

use interfaces::rlc::RlcUplink;

use crate::mac::bsr::{
    encode_long_bsr, encode_short_bsr, long_bsr_ce_size, BsrFormat, BsrState,
};
use crate::LayerError;

// UL-SCH LCID values (TS 38.321 Table 6.2.1-2)
pub const LCID_CCCH: u8 = 0;
pub const LCID_SINGLE_ENTRY_PHR: u8 = 57;
pub const LCID_SHORT_TRUNCATED_BSR: u8 = 59;
pub const LCID_LONG_TRUNCATED_BSR: u8 = 60;
pub const LCID_SHORT_BSR: u8 = 61;
pub const LCID_LONG_BSR: u8 = 62;
pub const LCID_PADDING: u8 = 63;

/// Prioritised bit rate value meaning "no rate limit"
pub const PBR_INFINITE: u32 = u32::MAX;

#[derive(Debug, Clone, Copy)]
pub struct LogicalChannelConfig {
    pub lcid: u8,
    /// Logical channel group for BSR, if any
    pub lcg_id: Option<u8>,
    /// 1 is highest priority, 16 lowest
    pub priority: u8,
    /// Prioritised bit rate in bytes per millisecond
    pub pbr_bytes_per_ms: u32,
    /// Bucket size duration in milliseconds
    pub bucket_size_ms: u32,
}

struct LcState {
    config: LogicalChannelConfig,
    /// Token bucket in bytes; may go negative when a served SDU
    /// overshoots the remaining tokens
    bj: i64,
    bucket_size: i64,
    /// Bytes the RLC entity reported for this channel
    buffer: u32,
}

impl LcState {
    fn new(config: LogicalChannelConfig) -> Self {
        let bucket_size = if config.pbr_bytes_per_ms == PBR_INFINITE {
            i64::MAX
        } else {
            config.pbr_bytes_per_ms as i64 * config.bucket_size_ms as i64
        };
        Self {
            config,
            bj: 0,
            bucket_size,
            buffer: 0,
        }
    }
}

/// Result of one MAC PDU build
pub struct BuiltPdu {
    pub payload: Bytes,
    pub bsr_included: bool,
    pub phr_included: bool,
}

pub struct LcpEngine {
    /// Sorted by ascending priority value (highest priority first)
    lcs: Vec<LcState>,
}

impl LcpEngine {
    pub fn new(mut configs: Vec<LogicalChannelConfig>) -> Self {
        configs.sort_by_key(|c| c.priority);
        Self {
            lcs: configs.into_iter().map(LcState::new).collect(),
        }
    }

    /// Refill each Bj by PBR * elapsed, capped at the bucket size
    /// (TS 38.321 Section 5.4.3.1).
    pub fn update_bj(&mut self, elapsed_ms: u32) {
        for lc in &mut self.lcs {
            if lc.config.pbr_bytes_per_ms == PBR_INFINITE {
                lc.bj = lc.bucket_size;
                continue;
            }
            lc.bj = (lc.bj + lc.config.pbr_bytes_per_ms as i64 * elapsed_ms as i64)
                .min(lc.bucket_size);
        }
    }

    /// Refresh buffer occupancy from RLC. Returns true when data appeared
    /// on a channel that previously had none, which raises a regular BSR.
    pub fn refresh_buffers(&mut self, rlc: &dyn RlcUplink) -> bool {
        let mut new_data = false;
        for lc in &mut self.lcs {
            let status = rlc.buffer_status(lc.config.lcid);
            if status > 0 && lc.buffer == 0 {
                new_data = true;
            }
            lc.buffer = status;
        }
        new_data
    }

    /// Total bytes pending across all logical channels
    pub fn total_buffer(&self) -> u32 {
        self.lcs.iter().map(|lc| lc.buffer).sum()
    }

    /// Buffer occupancy aggregated per logical channel group
    pub fn buffer_per_lcg(&self) -> [Option<u32>; 8] {
        let mut buffers: [Option<u32>; 8] = [None; 8];
        for lc in &self.lcs {
            if let Some(lcg) = lc.config.lcg_id {
                if lc.buffer > 0 {
                    let slot = &mut buffers[lcg as usize & 7];
                    *slot = Some(slot.unwrap_or(0) + lc.buffer);
                }
            }
        }
        buffers
    }

    /// MAC subheader size for an SDU of `sdu_len` bytes
    fn subheader_size(sdu_len: usize) -> usize {
        if sdu_len < 256 {
            2
        } else {
            3
        }
    }

    fn write_subheader(out: &mut BytesMut, lcid: u8, sdu_len: usize) {
        if sdu_len < 256 {
            out.put_u8(lcid & 0x3f);
            out.put_u8(sdu_len as u8);
        } else {
            out.put_u8(0x40 | (lcid & 0x3f));
            out.put_u16(sdu_len as u16);
        }
    }

    /// Build a MAC PDU of exactly `tb_size` bytes.
    ///
    /// Layout: MAC SDUs in priority order, then PHR and BSR MAC CEs, then
    /// padding. CE space is reserved up front so a triggered report is
    /// never squeezed out by data.
    pub fn build_pdu(
        &mut self,
        rlc: &mut dyn RlcUplink,
        tb_size: usize,
        bsr: &BsrState,
        phr_ce: Option<[u8; 2]>,
    ) -> Result<BuiltPdu, LayerError> {
        if tb_size == 0 {
            return Err(LayerError::InvalidConfiguration(
                "zero-size transport block".into(),
            ));
        }
        let mut out = BytesMut::with_capacity(tb_size);

        // Reserve CE space before filling data
        let phr_reserved = match phr_ce {
            Some(_) if tb_size >= 3 => 3,
            _ => 0,
        };
        let lcgs_with_data = self.buffer_per_lcg().iter().flatten().count();
        let (bsr_format, bsr_reserved) =
            self.select_bsr_format(bsr, lcgs_with_data, tb_size.saturating_sub(phr_reserved));

        let mut space = tb_size - phr_reserved - bsr_reserved;
        self.fill_sdus(rlc, &mut out, &mut space);

        let mut phr_included = false;
        if phr_reserved > 0 {
            if let Some(ce) = phr_ce {
                out.put_u8(LCID_SINGLE_ENTRY_PHR);
                out.put_slice(&ce);
                phr_included = true;
            }
        }

        let mut bsr_included = false;
        let leftover = tb_size - out.len() - bsr_reserved;
        if let Some(format) = bsr_format {
            self.write_bsr(&mut out, format, bsr_reserved);
            bsr_included = true;
        } else if lcgs_with_data > 0 && leftover >= 2 {
            // Padding BSR: spare room at the end of the PDU is used for a
            // report even without a trigger (TS 38.321 Section 5.4.5).
            if lcgs_with_data > 1 && leftover >= 1 + long_bsr_ce_size(lcgs_with_data) {
                let size = 1 + long_bsr_ce_size(lcgs_with_data);
                self.write_bsr(&mut out, BsrFormat::Long, size);
            } else {
                self.write_bsr(&mut out, BsrFormat::Short, 2);
            }
            bsr_included = true;
        }

        // Fill the remainder with a padding subPDU
        let padding = tb_size - out.len();
        if padding > 0 {
            out.put_u8(LCID_PADDING);
            out.put_bytes(0, padding - 1);
        }

        debug_assert_eq!(out.len(), tb_size);
        trace!(
            tb_size,
            bsr_included,
            phr_included,
            "built UL-SCH MAC PDU"
        );
        Ok(BuiltPdu {
            payload: out.freeze(),
            bsr_included,
            phr_included,
        })
    }

    /// Pick the BSR CE layout for a triggered report and the bytes to
    /// reserve for it (CE plus subheader), degrading to a truncated form
    /// when the grant cannot fit the full report.
    fn select_bsr_format(
        &self,
        bsr: &BsrState,
        lcgs_with_data: usize,
        available: usize,
    ) -> (Option<BsrFormat>, usize) {
        if !bsr.triggered() {
            return (None, 0);
        }
        if lcgs_with_data > 1 {
            let long_size = 1 + long_bsr_ce_size(lcgs_with_data);
            if available >= long_size {
                return (Some(BsrFormat::Long), long_size);
            }
            if available >= 3 {
                // room for the bitmap and at least one buffer octet
                return (Some(BsrFormat::LongTruncated), available.min(long_size));
            }
            if available >= 2 {
                return (Some(BsrFormat::ShortTruncated), 2);
            }
            warn!("grant too small for any BSR");
            return (None, 0);
        }
        if available >= 2 {
            return (Some(BsrFormat::Short), 2);
        }
        warn!("grant too small for any BSR");
        (None, 0)
    }

    /// Append the BSR subheader and CE; `max_size` bounds the total bytes
    /// written, truncating the octet list of a long truncated BSR.
    fn write_bsr(&self, out: &mut BytesMut, format: BsrFormat, max_size: usize) {
        let buffers = self.buffer_per_lcg();
        match format {
            BsrFormat::Short | BsrFormat::ShortTruncated => {
                // highest-priority LCG with data, or LCG 0 when empty
                let (lcg, bytes) = self
                    .lcs
                    .iter()
                    .find_map(|lc| match (lc.config.lcg_id, lc.buffer) {
                        (Some(lcg), b) if b > 0 => Some((lcg, b)),
                        _ => None,
                    })
                    .unwrap_or((0, 0));
                let lcid = if format == BsrFormat::Short {
                    LCID_SHORT_BSR
                } else {
                    LCID_SHORT_TRUNCATED_BSR
                };
                out.put_u8(lcid);
                out.put_u8(encode_short_bsr(lcg, bytes));
            }
            BsrFormat::Long | BsrFormat::LongTruncated => {
                let lcid = if format == BsrFormat::Long {
                    LCID_LONG_BSR
                } else {
                    LCID_LONG_TRUNCATED_BSR
                };
                let mut ce = encode_long_bsr(&buffers);
                ce.truncate(max_size.saturating_sub(1));
                out.put_u8(lcid);
                out.put_slice(&ce);
            }
        }
    }

    /// Serve logical channels into `out` while `space` allows.
    ///
    /// Round 0 honours the token buckets: a channel is only served up to
    /// its Bj. Later rounds ignore Bj so leftover space is not wasted.
    /// Channels sharing a priority split the space of their round evenly.
    fn fill_sdus(&mut self, rlc: &mut dyn RlcUplink, out: &mut BytesMut, space: &mut usize) {
        let mut sdu_buf = vec![0u8; *space];
        let mut round = 0usize;
        loop {
            let mut served_any = false;
            let mut idx = 0;
            while idx < self.lcs.len() {
                if *space < 2 {
                    return;
                }
                // channels of equal priority split the current space
                let priority = self.lcs[idx].config.priority;
                let ties = self.lcs[idx..]
                    .iter()
                    .take_while(|lc| lc.config.priority == priority)
                    .filter(|lc| lc.buffer > 0)
                    .count();
                let buflen_ep = if ties > 1 { *space / ties } else { *space };

                let lc = &mut self.lcs[idx];
                idx += 1;
                if lc.buffer == 0 {
                    continue;
                }
                if round == 0 && lc.bj <= 0 && lc.config.pbr_bytes_per_ms != PBR_INFINITE {
                    continue;
                }

                let mut req = lc.buffer as usize;
                if round == 0 && lc.config.pbr_bytes_per_ms != PBR_INFINITE {
                    req = req.min(lc.bj as usize);
                }
                req = req.min(buflen_ep);
                // leave room for the subheader
                let max_sdu = if *space >= 3 + 256 {
                    *space - 3
                } else {
                    space.saturating_sub(2).min(255)
                };
                req = req.min(max_sdu);
                if req == 0 {
                    continue;
                }

                let sdu_len = rlc.data_request(lc.config.lcid, &mut sdu_buf[..req]);
                if sdu_len == 0 {
                    // RLC had nothing deliverable despite a nonzero status
                    lc.buffer = 0;
                    continue;
                }
                let header = Self::subheader_size(sdu_len);
                Self::write_subheader(out, lc.config.lcid, sdu_len);
                out.put_slice(&sdu_buf[..sdu_len]);
                *space -= header + sdu_len;
                lc.buffer = lc.buffer.saturating_sub(sdu_len as u32);
                // Bj is decremented by the full served size and may go
                // negative (TS 38.321 Section 5.4.3.1)
                lc.bj -= sdu_len as i64;
                served_any = true;
                debug!(
                    lcid = lc.config.lcid,
                    sdu_len, round, "multiplexed MAC SDU"
                );
            }
            if !served_any {
                return;
            }
            round += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// RLC stub with a fixed byte count per LCID
    struct StubRlc {
        buffers: [u32; 33],
        fill_byte: u8,
    }

    impl StubRlc {
        fn new() -> Self {
            Self {
                buffers: [0; 33],
                fill_byte: 0xab,
            }
        }

        fn with(mut self, lcid: u8, bytes: u32) -> Self {
            self.buffers[lcid as usize] = bytes;
            self
        }
    }

    impl RlcUplink for StubRlc {
        fn buffer_status(&self, lcid: u8) -> u32 {
            self.buffers[lcid as usize]
        }

        fn data_request(&mut self, lcid: u8, buf: &mut [u8]) -> usize {
            let avail = self.buffers[lcid as usize] as usize;
            let n = avail.min(buf.len());
            buf[..n].fill(self.fill_byte);
            self.buffers[lcid as usize] -= n as u32;
            n
        }
    }

    fn lc(lcid: u8, priority: u8, pbr: u32) -> LogicalChannelConfig {
        LogicalChannelConfig {
            lcid,
            lcg_id: Some(0),
            priority,
            pbr_bytes_per_ms: pbr,
            bucket_size_ms: 100,
        }
    }

    fn quiet_bsr() -> BsrState {
        BsrState::new(common::timers::TIMER_INFINITE, common::timers::TIMER_INFINITE)
    }

    #[test]
    fn test_pdu_is_exactly_tb_size() {
        let mut engine = LcpEngine::new(vec![lc(4, 1, PBR_INFINITE)]);
        let mut rlc = StubRlc::new().with(4, 50);
        engine.refresh_buffers(&rlc);
        let built = engine.build_pdu(&mut rlc, 100, &quiet_bsr(), None).unwrap();
        assert_eq!(built.payload.len(), 100);
        // subheader: R/F=0, LCID 4, L=50
        assert_eq!(built.payload[0], 4);
        assert_eq!(built.payload[1], 50);
        assert_eq!(&built.payload[2..52], &[0xab; 50][..]);
    }

    #[test]
    fn test_priority_order() {
        let mut engine = LcpEngine::new(vec![lc(5, 9, PBR_INFINITE), lc(4, 1, PBR_INFINITE)]);
        let mut rlc = StubRlc::new().with(4, 20).with(5, 20);
        engine.refresh_buffers(&rlc);
        let built = engine.build_pdu(&mut rlc, 30, &quiet_bsr(), None).unwrap();
        // LCID 4 (priority 1) served first and fully; LCID 5 gets the rest
        assert_eq!(built.payload[0], 4);
        assert_eq!(built.payload[1], 20);
        assert_eq!(built.payload[22], 5);
    }

    #[test]
    fn test_bj_limits_first_round() {
        let mut engine = LcpEngine::new(vec![lc(4, 1, 10), lc(5, 2, PBR_INFINITE)]);
        engine.update_bj(1); // Bj(4) = 10 bytes
        let mut rlc = StubRlc::new().with(4, 100).with(5, 100);
        engine.refresh_buffers(&rlc);
        let built = engine.build_pdu(&mut rlc, 50, &quiet_bsr(), None).unwrap();
        // round 0: LCID 4 capped at 10 by its bucket, LCID 5 takes the rest
        assert_eq!(built.payload[0], 4);
        assert_eq!(built.payload[1], 10);
        assert_eq!(built.payload[12], 5);
    }

    #[test]
    fn test_bj_goes_negative_and_blocks_next_round0() {
        let mut engine = LcpEngine::new(vec![lc(4, 1, 10)]);
        engine.update_bj(1);
        let mut rlc = StubRlc::new().with(4, 100);
        engine.refresh_buffers(&rlc);
        // big grant: round 0 serves 10, later rounds drain the rest
        let built = engine.build_pdu(&mut rlc, 120, &quiet_bsr(), None).unwrap();
        assert_eq!(built.payload.len(), 120);
        assert!(engine.lcs[0].bj < 0);
    }

    #[test]
    fn test_bj_refill_clamps_at_bucket_size() {
        // pbr 10 B/ms, bucket_size_ms 100: bucket caps at 1000 bytes
        let mut engine = LcpEngine::new(vec![lc(4, 1, 10), lc(5, 2, PBR_INFINITE)]);
        engine.update_bj(50);
        assert_eq!(engine.lcs[0].bj, 500);
        // refill far past the cap: clamped, not accumulated
        engine.update_bj(200);
        assert_eq!(engine.lcs[0].bj, 1000);
        engine.update_bj(1);
        assert_eq!(engine.lcs[0].bj, 1000);
        // infinite PBR pins the bucket at its ceiling
        assert_eq!(engine.lcs[1].bj, i64::MAX);
    }

    #[test]
    fn test_bj_decrements_only_by_served_bytes() {
        let mut engine = LcpEngine::new(vec![lc(4, 1, 10)]);
        engine.update_bj(5); // Bj = 50
        let mut rlc = StubRlc::new().with(4, 30);
        engine.refresh_buffers(&rlc);
        let built = engine.build_pdu(&mut rlc, 100, &quiet_bsr(), None).unwrap();
        assert_eq!(built.payload.len(), 100);
        // 30 bytes served out of 50 tokens
        assert_eq!(engine.lcs[0].bj, 20);
        // an idle build must not touch the bucket
        engine.refresh_buffers(&rlc);
        engine.build_pdu(&mut rlc, 100, &quiet_bsr(), None).unwrap();
        assert_eq!(engine.lcs[0].bj, 20);
    }

    #[test]
    fn test_equal_priority_split() {
        let mut engine = LcpEngine::new(vec![lc(4, 3, PBR_INFINITE), lc(5, 3, PBR_INFINITE)]);
        let mut rlc = StubRlc::new().with(4, 500).with(5, 500);
        engine.refresh_buffers(&rlc);
        let built = engine.build_pdu(&mut rlc, 100, &quiet_bsr(), None).unwrap();
        assert_eq!(built.payload.len(), 100);
        // first SDU takes about half the space, not all of it
        assert_eq!(built.payload[0], 4);
        let first_len = built.payload[1] as usize;
        assert!(first_len <= 50, "first SDU len {}", first_len);
        assert_eq!(built.payload[2 + first_len], 5);
    }

    #[test]
    fn test_short_bsr_appended() {
        let mut engine = LcpEngine::new(vec![lc(4, 1, PBR_INFINITE)]);
        let mut rlc = StubRlc::new().with(4, 1000);
        engine.refresh_buffers(&rlc);
        let mut bsr = quiet_bsr();
        bsr.trigger_regular();
        let built = engine.build_pdu(&mut rlc, 50, &bsr, None).unwrap();
        assert!(built.bsr_included);
        // BSR CE sits after the data: subheader(2) + 46 data bytes
        assert_eq!(built.payload[48], LCID_SHORT_BSR);
        assert_eq!(built.payload[49] >> 5, 0); // LCG 0
    }

    #[test]
    fn test_long_bsr_for_multiple_lcgs() {
        let mut cfg_a = lc(4, 1, PBR_INFINITE);
        cfg_a.lcg_id = Some(1);
        let mut cfg_b = lc(5, 2, PBR_INFINITE);
        cfg_b.lcg_id = Some(4);
        let mut engine = LcpEngine::new(vec![cfg_a, cfg_b]);
        let mut rlc = StubRlc::new().with(4, 10_000).with(5, 10_000);
        engine.refresh_buffers(&rlc);
        let mut bsr = quiet_bsr();
        bsr.trigger_regular();
        let built = engine.build_pdu(&mut rlc, 60, &bsr, None).unwrap();
        assert!(built.bsr_included);
        // long BSR: subheader + bitmap + 2 octets at the tail
        let tail = &built.payload[56..];
        assert_eq!(tail[0], LCID_LONG_BSR);
        assert_eq!(tail[1], 0b0001_0010);
    }

    #[test]
    fn test_phr_reserved_and_included() {
        let mut engine = LcpEngine::new(vec![lc(4, 1, PBR_INFINITE)]);
        let mut rlc = StubRlc::new().with(4, 1000);
        engine.refresh_buffers(&rlc);
        let built = engine
            .build_pdu(&mut rlc, 50, &quiet_bsr(), Some([42, 52]))
            .unwrap();
        assert!(built.phr_included);
        // data fills 47 bytes (2 header + 45), PHR CE occupies the last 3
        assert_eq!(built.payload[47], LCID_SINGLE_ENTRY_PHR);
        assert_eq!(built.payload[48], 42);
        assert_eq!(built.payload[49], 52);
    }

    #[test]
    fn test_padding_bsr_in_leftover_space() {
        let mut engine = LcpEngine::new(vec![lc(4, 1, PBR_INFINITE)]);
        let mut rlc = StubRlc::new().with(4, 10);
        engine.refresh_buffers(&rlc);
        let built = engine.build_pdu(&mut rlc, 40, &quiet_bsr(), None).unwrap();
        // no trigger, but plenty of padding: a short BSR is slipped in
        assert!(built.bsr_included);
        assert_eq!(built.payload[12], LCID_SHORT_BSR);
        assert_eq!(built.payload[14], LCID_PADDING);
    }

    #[test]
    fn test_all_padding_when_idle() {
        let mut engine = LcpEngine::new(vec![lc(4, 1, PBR_INFINITE)]);
        let mut rlc = StubRlc::new();
        engine.refresh_buffers(&rlc);
        let built = engine.build_pdu(&mut rlc, 20, &quiet_bsr(), None).unwrap();
        assert_eq!(built.payload.len(), 20);
        assert!(!built.bsr_included);
        assert_eq!(built.payload[0], LCID_PADDING);
        assert!(built.payload[1..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_large_sdu_uses_16bit_length() {
        let mut engine = LcpEngine::new(vec![lc(4, 1, PBR_INFINITE)]);
        let mut rlc = StubRlc::new().with(4, 1000);
        engine.refresh_buffers(&rlc);
        let built = engine.build_pdu(&mut rlc, 600, &quiet_bsr(), None).unwrap();
        // F=1 subheader with 16-bit length
        assert_eq!(built.payload[0], 0x40 | 4);
        let len = u16::from_be_bytes([built.payload[1], built.payload[2]]) as usize;
        assert_eq!(len, 597);
    }

    #[test]
    fn test_zero_tb_rejected() {
        let mut engine = LcpEngine::new(vec![]);
        let mut rlc = StubRlc::new();
        assert!(engine.build_pdu(&mut rlc, 0, &quiet_bsr(), None).is_err());
    }
}
