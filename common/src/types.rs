//! Common Types for the 5G UE Stack
//!
//! Defines fundamental types used throughout the protocol stack

use num_derive::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};

/// Radio Network Temporary Identifier (RNTI)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rnti(pub u16);

impl Rnti {
    /// Create a new RNTI
    pub fn new(value: u16) -> Self {
        Self(value)
    }

    /// Get the RNTI value
    pub fn value(&self) -> u16 {
        self.0
    }
}

/// Subcarrier spacing values in kHz
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive, Serialize, Deserialize)]
pub enum SubcarrierSpacing {
    /// 15 kHz
    Scs15 = 15,
    /// 30 kHz
    Scs30 = 30,
    /// 60 kHz
    Scs60 = 60,
    /// 120 kHz
    Scs120 = 120,
    /// 240 kHz
    Scs240 = 240,
}

impl SubcarrierSpacing {
    /// Numerology mu as defined in TS 38.211 Section 4.3.2
    pub fn mu(&self) -> u8 {
        match self {
            SubcarrierSpacing::Scs15 => 0,
            SubcarrierSpacing::Scs30 => 1,
            SubcarrierSpacing::Scs60 => 2,
            SubcarrierSpacing::Scs120 => 3,
            SubcarrierSpacing::Scs240 => 4,
        }
    }

    /// Subcarrier spacing in kHz
    pub fn khz(&self) -> u16 {
        *self as u16
    }

    /// Number of slots per 10 ms frame
    pub fn slots_per_frame(&self) -> u16 {
        10 << self.mu()
    }

    /// Number of slots per 1 ms subframe
    pub fn slots_per_subframe(&self) -> u16 {
        1 << self.mu()
    }
}

/// Duplex mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DuplexMode {
    /// Frequency Division Duplex
    Fdd,
    /// Time Division Duplex
    Tdd,
}

/// Simplified TDD UL/DL slot pattern: a repeating period of downlink
/// slots followed by uplink slots (flexible slots counted as downlink).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TddPattern {
    /// Period length in slots
    pub period_slots: u16,
    /// Number of downlink slots at the start of the period
    pub num_dl_slots: u16,
    /// Number of uplink slots at the end of the period
    pub num_ul_slots: u16,
}

impl TddPattern {
    /// Whether the given absolute slot carries uplink symbols
    pub fn is_ul_slot(&self, slot: u16) -> bool {
        let pos = slot % self.period_slots;
        pos >= self.period_slots - self.num_ul_slots
    }
}

/// Frame and slot pair with modulo-1024 frame arithmetic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameSlot {
    /// System frame number (0-1023)
    pub frame: u16,
    /// Slot within the frame
    pub slot: u16,
}

impl FrameSlot {
    /// Maximum system frame number plus one
    pub const NUM_FRAMES: u16 = 1024;

    /// Create a new frame/slot pair
    pub fn new(frame: u16, slot: u16) -> Self {
        Self { frame, slot }
    }

    /// Advance by `offset` slots, wrapping the frame number at 1024
    pub fn add_slots(&self, offset: u32, slots_per_frame: u16) -> Self {
        let total = self.frame as u32 * slots_per_frame as u32 + self.slot as u32 + offset;
        Self {
            frame: ((total / slots_per_frame as u32) % Self::NUM_FRAMES as u32) as u16,
            slot: (total % slots_per_frame as u32) as u16,
        }
    }

    /// Number of slots from `earlier` to `self`, assuming `self` is not
    /// more than half the frame space ahead
    pub fn slots_since(&self, earlier: &FrameSlot, slots_per_frame: u16) -> u32 {
        let a = self.frame as u32 * slots_per_frame as u32 + self.slot as u32;
        let b = earlier.frame as u32 * slots_per_frame as u32 + earlier.slot as u32;
        let wrap = Self::NUM_FRAMES as u32 * slots_per_frame as u32;
        (a + wrap - b) % wrap
    }
}
