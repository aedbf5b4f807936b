//! Per-slot MAC to PHY handoff
//!
//! At the end of each uplink scheduling tick the MAC hands the PHY the
//! list of configured transmissions for that slot.

use async_trait::async_trait;
use common::types::FrameSlot;

use crate::pusch::UlConfigPdu;
use crate::InterfaceError;

/// Everything the PHY needs to transmit in one slot
#[derive(Debug, Clone)]
pub struct ScheduledResponse {
    /// Transmission slot
    pub tx_slot: FrameSlot,
    /// Configured uplink PDUs, payloads already filled
    pub ul_config: Vec<UlConfigPdu>,
}

/// Consumer of scheduled responses, implemented by the PHY front end
#[async_trait]
pub trait ScheduledResponseSink: Send + Sync {
    async fn scheduled_response(&self, response: ScheduledResponse) -> Result<(), InterfaceError>;
}
