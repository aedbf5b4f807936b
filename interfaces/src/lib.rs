//! Inter-Layer Interfaces Library
//!
//! This crate defines the structures exchanged across layer boundaries:
//! decoded uplink grants (DCI, RAR), the FAPI-style UL config PDUs handed
//! from MAC to PHY, and the RLC data-plane seam used by the multiplexer.

pub mod dci;
pub mod pusch;
pub mod rlc;
pub mod scheduled_response;

use thiserror::Error;

/// Interface errors
#[derive(Error, Debug)]
pub enum InterfaceError {
    #[error("Invalid message format")]
    InvalidMessage,

    #[error("Interface not initialized")]
    NotInitialized,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Buffer full")]
    BufferFull,
}
