//! Routecast-Repair: byte-range repair of broadcast-delivered segments
//!
//! A one-to-many broadcast gives no opportunity to re-request lost
//! packets, so objects arrive with holes: a buffer plus the list of
//! byte ranges that were actually received. This crate patches such a
//! buffer in place until every byte is well-formed for its container
//! format, without ever reallocating or resizing.
//!
//! # Modules
//!
//! - `ranges` - Received byte-range bookkeeping
//! - `ts` - MPEG-2 TS patching on the 188-byte packet grid
//! - `isobmff` - Top-level box scanning and `free`-box patching
//! - `request` - Lost-range computation for unicast companion repair
//!
//! # Strategies
//!
//! MPEG-2 TS: lost ranges are widened to packet boundaries and each
//! lost packet slot gets a null-packet header (PID 0x1FFF).
//!
//! ISOBMFF: the top-level box chain is re-walked from the received
//! ranges; incomplete boxes are converted to `free`, gaps are covered
//! by synthetic `free` boxes, so the chain stays parseable end to end.

pub mod error;
pub mod isobmff;
pub mod ranges;
pub mod request;
pub mod ts;

pub use error::{Error, Result};
pub use isobmff::MdatPolicy;
pub use ranges::{ByteRange, RangeList};
pub use request::{missing_ranges, RepairRequest};

/// Container format of a received object, decided once per object from
/// its filename suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    /// MPEG-2 transport stream (`.ts` / `.m2ts`).
    MpegTs,
    /// ISO base media file format segment (everything else).
    Isobmff,
}

impl ContainerKind {
    /// Select the repair strategy from the filename suffix.
    pub fn from_filename(filename: &str) -> Self {
        if filename.ends_with(".ts") || filename.ends_with(".m2ts") {
            Self::MpegTs
        } else {
            Self::Isobmff
        }
    }
}

/// Repair behavior for corrupted objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum RepairMode {
    /// Deliver objects exactly as received.
    None,
    /// Local patching; incomplete `mdat` boxes are kept.
    #[default]
    Simple,
    /// Local patching; incomplete `mdat` boxes are lost along with
    /// their preceding `moof`.
    Strict,
    /// Unicast companion repair; local patching is bypassed.
    Full,
}

impl RepairMode {
    /// The mdat policy local patching runs under.
    pub fn mdat_policy(self) -> MdatPolicy {
        match self {
            Self::Strict => MdatPolicy::Discard,
            _ => MdatPolicy::KeepPartial,
        }
    }
}

/// Outcome of a local repair pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepairOutcome {
    /// The buffer is now well-formed and the corrupted flag can be
    /// cleared. False means a remnant too short to patch remains.
    pub patched: bool,
    /// TS only: the PAT/PMT window was lost entirely; the caller should
    /// drop the object if it is the first on its stream.
    pub drop_if_first: bool,
}

/// Patch `data` in place according to the container kind.
pub fn repair(
    kind: ContainerKind,
    policy: MdatPolicy,
    data: &mut [u8],
    ranges: &RangeList,
) -> RepairOutcome {
    match kind {
        ContainerKind::MpegTs => RepairOutcome {
            patched: true,
            drop_if_first: ts::patch_gaps(data, ranges),
        },
        ContainerKind::Isobmff => RepairOutcome {
            patched: isobmff::patch_boxes(data, ranges, policy),
            drop_if_first: false,
        },
    }
}
