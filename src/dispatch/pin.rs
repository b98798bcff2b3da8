//! Output pin contracts (source-mode file forwarding).
//!
//! In source mode every dispatched object becomes one packet on an
//! output pin: a single pin per session, or one per (service, TSI)
//! when split mode is on, so manifests and media never share a pin.

use bytes::Bytes;

/// Metadata set on a pin before each packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinProperties {
    /// Pin id: the TSI in split mode, the service id otherwise.
    pub id: u32,
    /// Owning broadcast service.
    pub service_id: u32,
    /// Source URL (the broadcast filename).
    pub url: String,
    /// Filename extension, `*` when the name has none.
    pub file_ext: String,
}

/// One dispatched object as a packet.
#[derive(Debug, Clone)]
pub struct FilePacket {
    pub data: Bytes,
    /// Set when keep-corrupted forwards an unrepaired object.
    pub corrupted: bool,
}

/// A downstream output pin.
pub trait PinOutput {
    /// Update pin metadata.
    fn set_properties(&mut self, props: &PinProperties);
    /// Enqueue one packet.
    fn send(&mut self, packet: FilePacket);
    /// Ask the consumer to delete a previously forwarded segment.
    fn send_delete(&mut self, segment_name: &str);
    /// Signal end of stream.
    fn set_eos(&mut self);
}

/// Creates pins lazily as services and TSIs appear.
pub trait PinFactory {
    fn new_pin(&mut self) -> Box<dyn PinOutput>;
}

/// Per (service, TSI) output, created on first use and retained for
/// the session's lifetime.
pub(crate) struct TsiOutput {
    pub sid: u32,
    pub tsi: u32,
    pub pin: Box<dyn PinOutput>,
}

/// Extension after the last dot, `*` when the name has none.
pub(crate) fn file_extension(filename: &str) -> &str {
    match filename.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() => ext,
        _ => "*",
    }
}
