//! RLC data-plane seam
//!
//! The MAC multiplexer pulls SDUs from RLC synchronously while building a
//! MAC PDU; the trait mirrors the status-indication / data-request pair of
//! the RLC service access point.

/// Uplink RLC entity as seen by the MAC multiplexer
pub trait RlcUplink: Send {
    /// Bytes currently pending on the given logical channel, including
    /// RLC header overhead
    fn buffer_status(&self, lcid: u8) -> u32;

    /// Fill `buf` with at most `buf.len()` bytes of RLC PDU data for the
    /// given logical channel. Returns the number of bytes written; 0 means
    /// the channel could not produce a PDU within the offered size.
    fn data_request(&mut self, lcid: u8, buf: &mut [u8]) -> usize;
}
