//! Physical Layer (PHY) Submodules
//!
//! Uplink transmit-side processing of the 5G NR physical layer according
//! to 3GPP TS 38.211/38.214: reference-signal generation, modulation,
//! PUSCH resource-element mapping, codebook precoding and the receive-side
//! soft demappers.

pub mod dmrs;
pub mod gold;
pub mod llr;
pub mod mapping;
pub mod modulation;
pub mod precoding;
pub mod ptrs;

// Re-export commonly used types
pub use gold::GoldSequence;
pub use mapping::{available_bits, CarrierConfig, UlschTx};
pub use precoding::PrecWeight;
