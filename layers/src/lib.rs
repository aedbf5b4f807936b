//! Protocol Stack Layers Library
//!
//! This crate implements the UE-side uplink MAC and PHY processing
//! according to 3GPP Release 16.

pub mod mac;
pub mod phy;

use thiserror::Error;

/// Common errors for protocol layers
#[derive(Error, Debug)]
pub enum LayerError {
    #[error("Invalid protocol data unit")]
    InvalidPdu,

    #[error("Layer not initialized")]
    NotInitialized,

    #[error("Resource unavailable")]
    ResourceUnavailable,

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Processing error: {0}")]
    ProcessingError(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}
