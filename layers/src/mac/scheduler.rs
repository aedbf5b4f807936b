//! Uplink slot scheduling
//!
//! Grant handlers place PUSCH PDUs into the slot-indexed store at
//! grant-reception time; the per-slot tick ([`UeMac::ul_slot_indication`])
//! then fills the transport blocks for the current slot and pushes the
//! result to the PHY.

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, info, warn};

use common::types::FrameSlot;
use interfaces::dci::{RarUlGrant, UlDci};
use interfaces::pusch::UlConfigPdu;
use interfaces::scheduled_response::ScheduledResponse;

use crate::mac::lcp::LCID_PADDING;
use crate::mac::phr::encode_single_entry_phr;
use crate::mac::pusch_config::UlGrant;
use crate::mac::{UeMac, UlHarqInfo};
use crate::LayerError;

/// Minimum number of slots between grant reception and PUSCH transmission
/// the transmit pipeline can absorb
pub const MIN_RX_TO_TX_SLOTS: u32 = 6;

/// Additional Msg3 slot delay per numerology (TS 38.213 Table 8.2-2)
const MSG3_DELTA: [u32; 4] = [2, 3, 4, 6];

/// Nominal UE maximum transmit power in dBm (power class 3)
const PCMAX_DBM: i16 = 23;

impl UeMac {
    /// Transmission slot for a grant received at `at` with slot offset
    /// `k2`; Msg3 gets the numerology-dependent extra delay.
    pub(crate) fn pusch_slot(
        &self,
        at: FrameSlot,
        k2: u32,
        is_msg3: bool,
    ) -> Result<FrameSlot, LayerError> {
        let mut offset = k2;
        if is_msg3 {
            offset += MSG3_DELTA[self.config.scs.mu().min(3) as usize];
        }
        if offset < MIN_RX_TO_TX_SLOTS {
            return Err(LayerError::InvalidConfiguration(format!(
                "PUSCH offset {} below the {}-slot processing floor",
                offset, MIN_RX_TO_TX_SLOTS
            )));
        }
        Ok(at.add_slots(offset, self.config.scs.slots_per_frame()))
    }

    /// Process an uplink DCI received at slot `at`. Returns the slot the
    /// PUSCH was scheduled for.
    pub fn handle_dci(&mut self, at: FrameSlot, dci: UlDci) -> Result<FrameSlot, LayerError> {
        let tda = self.tda_entry(dci.time_domain_assignment)?;
        let tx_slot = self.pusch_slot(at, tda.k2, false)?;
        let pdu = self.config_pusch_pdu(&UlGrant::Dci(dci))?;
        debug!(
            rnti = self.config.rnti.value(),
            frame = tx_slot.frame,
            slot = tx_slot.slot,
            tb_size = pdu.pusch_data.tb_size,
            "scheduled PUSCH from DCI"
        );
        let mut writer = self.ul_config.writer(tx_slot)?;
        writer.push(UlConfigPdu::Pusch(Box::new(pdu)))?;
        Ok(tx_slot)
    }

    /// Process a RAR UL grant: schedule Msg3 with the stored payload.
    pub fn handle_rar_grant(
        &mut self,
        at: FrameSlot,
        grant: RarUlGrant,
        msg3_payload: Bytes,
    ) -> Result<FrameSlot, LayerError> {
        let tda = self.tda_entry(grant.time_domain_assignment)?;
        let tx_slot = self.pusch_slot(at, tda.k2, true)?;
        let pdu = self.config_pusch_pdu(&UlGrant::Rar(grant))?;
        info!(
            frame = tx_slot.frame,
            slot = tx_slot.slot,
            tb_size = pdu.pusch_data.tb_size,
            "scheduled Msg3 from RAR grant"
        );
        let mut writer = self.ul_config.writer(tx_slot)?;
        writer.push(UlConfigPdu::Pusch(Box::new(pdu)))?;
        drop(writer);
        self.msg3 = Some((tx_slot, msg3_payload));
        Ok(tx_slot)
    }

    /// Schedule the MsgA PUSCH occasion following a preamble sent at `at`.
    pub fn schedule_msga(
        &mut self,
        at: FrameSlot,
        payload: Bytes,
    ) -> Result<FrameSlot, LayerError> {
        let res = self.config.msga.ok_or_else(|| {
            LayerError::InvalidConfiguration("MsgA PUSCH resource not configured".into())
        })?;
        let tx_slot = self.pusch_slot(at, res.time_offset_slots, false)?;
        let pdu = self.config_pusch_pdu(&UlGrant::MsgA(res))?;
        let mut writer = self.ul_config.writer(tx_slot)?;
        writer.push(UlConfigPdu::Pusch(Box::new(pdu)))?;
        drop(writer);
        self.msg3 = Some((tx_slot, payload));
        Ok(tx_slot)
    }

    /// The contention resolution succeeded; the stored Msg3/MsgA payload
    /// is no longer needed.
    pub fn ra_completed(&mut self) {
        self.msg3 = None;
    }

    /// Restart the time alignment timer on a received TA command.
    pub fn apply_time_alignment(&mut self) {
        self.time_alignment_timer.start();
    }

    /// Uplink synchronization is lost: flush everything that assumed a
    /// valid timing advance.
    pub fn time_alignment_expired(&mut self) {
        warn!(
            rnti = self.config.rnti.value(),
            "time alignment timer expired, flushing uplink state"
        );
        self.ul_config.clear_all();
        self.harq = [UlHarqInfo::default(); super::NUM_UL_HARQ];
        self.msg3 = None;
    }

    /// Per-slot tick: advance timers, refill token buckets, fill the
    /// transport blocks pending for `now` and hand them to the PHY.
    pub async fn ul_slot_indication(&mut self, now: FrameSlot) -> Result<(), LayerError> {
        let data_pending = self.lcp.total_buffer() > 0;
        self.bsr.tick(data_pending);
        self.phr.tick(self.pathloss_db);
        if self.time_alignment_timer.tick() {
            self.time_alignment_expired();
            return Ok(());
        }

        // Bj refill in whole elapsed milliseconds
        let slots_per_frame = self.config.scs.slots_per_frame();
        match self.last_bj_update {
            None => self.last_bj_update = Some(now),
            Some(last) => {
                let elapsed_ms = now.slots_since(&last, slots_per_frame) >> self.config.scs.mu();
                if elapsed_ms > 0 {
                    self.lcp.update_bj(elapsed_ms);
                    self.last_bj_update = Some(now);
                }
            }
        }

        if self.lcp.refresh_buffers(self.rlc.as_ref()) {
            self.bsr.trigger_regular();
        }

        let Some(mut reader) = self.ul_config.reader(now)? else {
            return Ok(());
        };

        let mut bsr_sent = false;
        let mut phr_sent = false;
        for entry in reader.iter_mut() {
            // Only PUSCH entries carry a transport block to fill
            let UlConfigPdu::Pusch(pusch) = entry else {
                continue;
            };
            let tb_size = pusch.pusch_data.tb_size as usize;
            let is_msg3 = matches!(&self.msg3, Some((slot, _)) if *slot == now);
            pusch.pusch_data.tx_payload = if is_msg3 {
                let (_, payload) = self.msg3.as_ref().ok_or_else(|| {
                    LayerError::InvalidState("msg3 payload vanished".into())
                })?;
                pad_to_tb(payload, tb_size)?
            } else {
                let phr_ce = if self.phr.triggered() {
                    Some(encode_single_entry_phr(self.power_headroom_db(), PCMAX_DBM))
                } else {
                    None
                };
                let built = self
                    .lcp
                    .build_pdu(self.rlc.as_mut(), tb_size, &self.bsr, phr_ce)?;
                bsr_sent |= built.bsr_included;
                phr_sent |= built.phr_included;
                built.payload
            };
        }

        let pdus = reader.take();
        drop(reader);
        self.sink
            .scheduled_response(ScheduledResponse {
                tx_slot: now,
                ul_config: pdus,
            })
            .await
            .map_err(|e| LayerError::ProcessingError(format!("scheduled response: {}", e)))?;

        if bsr_sent {
            self.bsr.reported();
        }
        if phr_sent {
            self.phr.reported(self.pathloss_db);
        }
        Ok(())
    }

    /// Type 1 power headroom from the open-loop estimate
    /// P_tx = P0 + PL with P0 = -70 dBm.
    fn power_headroom_db(&self) -> i16 {
        PCMAX_DBM - (self.pathloss_db as i16 - 70)
    }
}

/// Extend a stored payload to the granted transport block size with a
/// padding subPDU; a payload larger than the grant is an error.
fn pad_to_tb(payload: &Bytes, tb_size: usize) -> Result<Bytes, LayerError> {
    use std::cmp::Ordering;
    match payload.len().cmp(&tb_size) {
        Ordering::Equal => Ok(payload.clone()),
        Ordering::Less => {
            let mut out = BytesMut::with_capacity(tb_size);
            out.put_slice(payload);
            out.put_u8(LCID_PADDING);
            out.put_bytes(0, tb_size - payload.len() - 1);
            Ok(out.freeze())
        }
        Ordering::Greater => Err(LayerError::InvalidPdu),
    }
}
