//! Slot-indexed store for pending uplink transmission configurations
//!
//! Grants decoded at slot n schedule a PUSCH at slot n + k2. The PDUs built
//! from those grants are parked here, indexed by their transmission slot,
//! until the scheduler reaches that slot and hands them to the PHY. Each
//! slot entry carries its own lock so a writer filling a future slot never
//! contends with the reader draining the current one.

use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, MutexGuard};

use tracing::{error, warn};

use common::types::{DuplexMode, FrameSlot, SubcarrierSpacing, TddPattern};
use interfaces::pusch::UlConfigPdu;

use crate::LayerError;

/// FAPI UL_TTI request list capacity
pub const MAX_UL_PDUS_PER_SLOT: usize = 10;

struct SlotUlConfig {
    tag: FrameSlot,
    pdus: Vec<UlConfigPdu>,
}

pub struct UlConfigStore {
    slots: Vec<Mutex<SlotUlConfig>>,
    duplex_mode: DuplexMode,
    tdd: Option<TddPattern>,
}

impl UlConfigStore {
    pub fn new(scs: SubcarrierSpacing, duplex_mode: DuplexMode, tdd: Option<TddPattern>) -> Self {
        let slots_per_frame = scs.slots_per_frame() as usize;
        let slots = (0..slots_per_frame)
            .map(|_| {
                Mutex::new(SlotUlConfig {
                    tag: FrameSlot { frame: 0, slot: 0 },
                    pdus: Vec::with_capacity(MAX_UL_PDUS_PER_SLOT),
                })
            })
            .collect();
        Self {
            slots,
            duplex_mode,
            tdd,
        }
    }

    fn is_ul_slot(&self, slot: u16) -> bool {
        match (self.duplex_mode, &self.tdd) {
            (DuplexMode::Fdd, _) | (_, None) => true,
            (DuplexMode::Tdd, Some(pattern)) => pattern.is_ul_slot(slot),
        }
    }

    fn entry(
        &self,
        tx_slot: FrameSlot,
    ) -> Result<MutexGuard<'_, SlotUlConfig>, LayerError> {
        let idx = tx_slot.slot as usize % self.slots.len();
        self.slots[idx]
            .lock()
            .map_err(|_| LayerError::ProcessingError("ul config slot lock poisoned".into()))
    }

    /// Acquire exclusive write access to the entry for `tx_slot`.
    ///
    /// Fails if `tx_slot` is not an uplink slot. PDUs left over from an
    /// earlier frame that were never transmitted are dropped with an error
    /// log, so a missed slot cannot poison the entry forever.
    pub fn writer(&self, tx_slot: FrameSlot) -> Result<UlConfigWriter<'_>, LayerError> {
        if !self.is_ul_slot(tx_slot.slot) {
            return Err(LayerError::InvalidState(format!(
                "slot {} is not an uplink slot",
                tx_slot.slot
            )));
        }
        let mut guard = self.entry(tx_slot)?;
        if guard.tag != tx_slot && !guard.pdus.is_empty() {
            error!(
                frame = guard.tag.frame,
                slot = guard.tag.slot,
                "dropping {} stale UL PDU(s) never handed to PHY",
                guard.pdus.len()
            );
            guard.pdus.clear();
        }
        guard.tag = tx_slot;
        Ok(UlConfigWriter { guard })
    }

    /// Access the PDUs scheduled for `tx_slot`, if any.
    ///
    /// Returns `None` when nothing was scheduled for this slot. A stale
    /// entry (tagged with a different frame/slot) is cleared on sight.
    pub fn reader(&self, tx_slot: FrameSlot) -> Result<Option<UlConfigReader<'_>>, LayerError> {
        let mut guard = self.entry(tx_slot)?;
        if guard.tag != tx_slot {
            if !guard.pdus.is_empty() {
                error!(
                    frame = guard.tag.frame,
                    slot = guard.tag.slot,
                    "dropping {} stale UL PDU(s) never handed to PHY",
                    guard.pdus.len()
                );
                guard.pdus.clear();
            }
            return Ok(None);
        }
        if guard.pdus.is_empty() {
            return Ok(None);
        }
        Ok(Some(UlConfigReader { guard }))
    }

    /// Drop every pending PDU, e.g. when uplink synchronization is lost.
    pub fn clear_all(&self) {
        for entry in &self.slots {
            match entry.lock() {
                Ok(mut guard) => guard.pdus.clear(),
                Err(_) => warn!("ul config slot lock poisoned during flush"),
            }
        }
    }
}

/// Write handle for one slot entry; the lock is held until drop.
pub struct UlConfigWriter<'a> {
    guard: MutexGuard<'a, SlotUlConfig>,
}

impl UlConfigWriter<'_> {
    pub fn push(&mut self, pdu: UlConfigPdu) -> Result<(), LayerError> {
        if self.guard.pdus.len() >= MAX_UL_PDUS_PER_SLOT {
            warn!("ul config slot full, grant dropped");
            return Err(LayerError::ResourceUnavailable);
        }
        self.guard.pdus.push(pdu);
        Ok(())
    }

    /// Roll back the most recent push, e.g. when a grant turns out to be
    /// unusable after the slot entry was already reserved.
    pub fn pop_last(&mut self) -> Option<UlConfigPdu> {
        self.guard.pdus.pop()
    }

    pub fn len(&self) -> usize {
        self.guard.pdus.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guard.pdus.is_empty()
    }
}

/// Read/update handle over the PDUs of one slot; the lock is held until
/// drop. The scheduler fills transport payloads in place through this
/// handle right before handing the slot to the PHY.
pub struct UlConfigReader<'a> {
    guard: MutexGuard<'a, SlotUlConfig>,
}

impl UlConfigReader<'_> {
    /// Move the PDUs out, leaving the entry empty for reuse.
    pub fn take(&mut self) -> Vec<UlConfigPdu> {
        std::mem::take(&mut self.guard.pdus)
    }
}

impl Deref for UlConfigReader<'_> {
    type Target = [UlConfigPdu];

    fn deref(&self) -> &Self::Target {
        &self.guard.pdus
    }
}

impl DerefMut for UlConfigReader<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard.pdus
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::types::Rnti;
    use interfaces::pusch::{PuschPdu, UlConfigType};

    fn test_pdu(rnti: u16) -> UlConfigPdu {
        let pdu = PuschPdu {
            rnti: Rnti::new(rnti),
            ..Default::default()
        };
        UlConfigPdu::Pusch(Box::new(pdu))
    }

    fn store() -> UlConfigStore {
        UlConfigStore::new(SubcarrierSpacing::Scs30, DuplexMode::Fdd, None)
    }

    #[test]
    fn test_write_then_read() {
        let store = store();
        let tx = FrameSlot { frame: 5, slot: 3 };
        {
            let mut writer = store.writer(tx).unwrap();
            writer.push(test_pdu(0x1234)).unwrap();
            writer.push(test_pdu(0x5678)).unwrap();
        }
        let mut reader = store.reader(tx).unwrap().unwrap();
        assert_eq!(reader.len(), 2);
        assert_eq!(reader[0].pdu_type(), UlConfigType::Pusch);
        let pdus = reader.take();
        assert_eq!(pdus.len(), 2);
        drop(reader);
        assert!(store.reader(tx).unwrap().is_none());
    }

    #[test]
    fn test_mixed_channel_types_in_one_slot() {
        let store = store();
        let tx = FrameSlot { frame: 6, slot: 1 };
        {
            let mut writer = store.writer(tx).unwrap();
            writer.push(UlConfigPdu::Prach).unwrap();
            writer.push(test_pdu(0x1234)).unwrap();
        }
        let reader = store.reader(tx).unwrap().unwrap();
        assert_eq!(reader.len(), 2);
        assert_eq!(reader[0].pdu_type(), UlConfigType::Prach);
        assert_eq!(reader[1].pdu_type(), UlConfigType::Pusch);
    }

    #[test]
    fn test_capacity_limit() {
        let store = store();
        let tx = FrameSlot { frame: 0, slot: 0 };
        let mut writer = store.writer(tx).unwrap();
        for _ in 0..MAX_UL_PDUS_PER_SLOT {
            writer.push(test_pdu(1)).unwrap();
        }
        assert!(matches!(
            writer.push(test_pdu(1)),
            Err(LayerError::ResourceUnavailable)
        ));
    }

    #[test]
    fn test_stale_entry_recovered_by_writer() {
        let store = store();
        let old = FrameSlot { frame: 1, slot: 7 };
        {
            let mut writer = store.writer(old).unwrap();
            writer.push(test_pdu(1)).unwrap();
        }
        // same slot index, next frame: the unread PDU must not survive
        let new = FrameSlot { frame: 2, slot: 7 };
        let mut writer = store.writer(new).unwrap();
        assert!(writer.is_empty());
        writer.push(test_pdu(2)).unwrap();
        drop(writer);
        let reader = store.reader(new).unwrap().unwrap();
        assert_eq!(reader.len(), 1);
    }

    #[test]
    fn test_stale_entry_cleared_by_reader() {
        let store = store();
        let old = FrameSlot { frame: 3, slot: 2 };
        {
            let mut writer = store.writer(old).unwrap();
            writer.push(test_pdu(1)).unwrap();
        }
        let other = FrameSlot { frame: 4, slot: 2 };
        assert!(store.reader(other).unwrap().is_none());
        // the stale content is gone even for its original tag
        assert!(store.reader(old).unwrap().is_none());
    }

    #[test]
    fn test_rollback() {
        let store = store();
        let tx = FrameSlot { frame: 0, slot: 1 };
        let mut writer = store.writer(tx).unwrap();
        writer.push(test_pdu(1)).unwrap();
        writer.push(test_pdu(2)).unwrap();
        assert!(writer.pop_last().is_some());
        assert_eq!(writer.len(), 1);
    }

    #[test]
    fn test_rejects_downlink_slot() {
        let tdd = TddPattern {
            period_slots: 10,
            num_dl_slots: 7,
            num_ul_slots: 2,
        };
        let store = UlConfigStore::new(SubcarrierSpacing::Scs30, DuplexMode::Tdd, Some(tdd));
        assert!(store.writer(FrameSlot { frame: 0, slot: 0 }).is_err());
        assert!(store.writer(FrameSlot { frame: 0, slot: 9 }).is_ok());
    }

    #[test]
    fn test_clear_all() {
        let store = store();
        let tx = FrameSlot { frame: 0, slot: 4 };
        store.writer(tx).unwrap().push(test_pdu(1)).unwrap();
        store.clear_all();
        assert!(store.reader(tx).unwrap().is_none());
    }
}
