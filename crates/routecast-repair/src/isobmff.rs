//! ISOBMFF top-level box scanning and patching.
//!
//! A CMAF/DASH media segment is a flat chain of top-level boxes. Repair
//! walks that chain using only received bytes: boxes that arrived whole
//! are kept, everything else is converted into (or covered by) `free`
//! boxes so the chain stays parseable without ever resizing the buffer.

use crate::ranges::RangeList;

/// Four-character box type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoxType(pub [u8; 4]);

impl BoxType {
    pub const STYP: Self = Self(*b"styp");
    pub const EMSG: Self = Self(*b"emsg");
    pub const PRFT: Self = Self(*b"prft");
    pub const MOOF: Self = Self(*b"moof");
    pub const MDAT: Self = Self(*b"mdat");
    pub const FREE: Self = Self(*b"free");
    pub const SIDX: Self = Self(*b"sidx");
    pub const SSIX: Self = Self(*b"ssix");

    /// Create from bytes.
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    /// Get the 4-char code as a string.
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or("????")
    }
}

impl std::fmt::Display for BoxType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Top-level boxes expected in a media segment.
const TOP_LEVEL_TYPES: [BoxType; 8] = [
    BoxType::STYP,
    BoxType::EMSG,
    BoxType::PRFT,
    BoxType::MOOF,
    BoxType::MDAT,
    BoxType::FREE,
    BoxType::SIDX,
    BoxType::SSIX,
];

/// Box header length: 4-byte size + 4-byte type.
const BOX_HEADER_SIZE: usize = 8;

/// How a partially received `mdat` payload is handled.
///
/// This is a named policy on purpose: keeping a truncated `mdat` is a
/// deliberate lossy trade-off, not an oversight to be "fixed".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MdatPolicy {
    /// Keep the truncated `mdat` as-is: partial media that still
    /// decodes beats discarding the whole fragment.
    KeepPartial,
    /// Convert the `mdat` and its owning `moof` to `free`: fragment
    /// metadata without its full sample data is unusable.
    Discard,
}

/// A top-level box located by the scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopLevelBox {
    /// Offset of the box start (the size field).
    pub offset: usize,
    /// Declared box size, header included.
    pub size: usize,
    /// Four-character type code.
    pub box_type: BoxType,
}

/// Locate the next well-known top-level box at or after `start` whose
/// identifying bytes were actually received.
///
/// The cursor first advances to received data (a type code straddling a
/// reception gap must never be trusted), then scans for a whitelist
/// match and validates the 4 bytes preceding it as a big-endian size
/// >= 8. A failed validation is a false match: advance one byte, retry.
pub fn next_top_level_box(data: &[u8], ranges: &RangeList, start: usize) -> Option<TopLevelBox> {
    let mut pos = ranges.next_received(start)?;
    while pos + BOX_HEADER_SIZE < data.len() {
        if let Some(&box_type) = TOP_LEVEL_TYPES.iter().find(|t| data[pos..pos + 4] == t.0) {
            // the size field precedes the type code; both must have
            // been received to be trusted
            if pos >= 4 && ranges.covers(pos - 4, BOX_HEADER_SIZE) {
                let size = u32::from_be_bytes([
                    data[pos - 4],
                    data[pos - 3],
                    data[pos - 2],
                    data[pos - 1],
                ]) as usize;
                if size >= BOX_HEADER_SIZE {
                    return Some(TopLevelBox {
                        offset: pos - 4,
                        size,
                        box_type,
                    });
                }
            }
        }
        pos += 1;
    }
    None
}

/// Patch the top-level box chain in place.
///
/// Returns `true` when the whole buffer was accounted for and the
/// object can be considered well-formed; `false` when a trailing
/// remnant is too short to hold a box header, in which case the object
/// must stay marked corrupted.
pub fn patch_boxes(data: &mut [u8], ranges: &RangeList, policy: MdatPolicy) -> bool {
    let size = data.len();
    let mut pos = 0;
    let mut prev_moof: Option<usize> = None;
    loop {
        if pos >= size {
            return true;
        }
        let remain = size - pos;
        if remain < BOX_HEADER_SIZE {
            // nothing valid can cover these bytes
            return false;
        }
        let Some(found) = next_top_level_box(data, ranges, pos) else {
            // no further box: the tail becomes one final free box
            write_free_header(data, pos, remain);
            return true;
        };
        // bytes between the previous box end and the recovered box were
        // lost; cover them with a synthetic free box
        if found.offset > pos {
            write_free_header(data, pos, found.offset - pos);
        }
        pos = found.offset;

        let mut box_complete = false;
        let mut incomplete_mdat = false;
        match found.box_type {
            BoxType::FREE => box_complete = true,
            BoxType::MDAT => match policy {
                MdatPolicy::KeepPartial => box_complete = true,
                MdatPolicy::Discard => incomplete_mdat = true,
            },
            BoxType::MOOF => prev_moof = Some(pos),
            _ => {}
        }
        if !box_complete {
            box_complete = ranges.covers(pos, found.size);
            incomplete_mdat &= !box_complete;
        }
        if box_complete {
            pos += found.size;
            continue;
        }
        if incomplete_mdat {
            // fragment metadata without its sample data is unusable
            if let Some(moof_pos) = prev_moof {
                write_free_type(data, moof_pos);
            }
        }
        write_free_type(data, pos);
        pos += found.size;
    }
}

fn write_free_header(data: &mut [u8], pos: usize, size: usize) {
    data[pos..pos + 4].copy_from_slice(&(size as u32).to_be_bytes());
    data[pos + 4..pos + 8].copy_from_slice(&BoxType::FREE.0);
}

fn write_free_type(data: &mut [u8], pos: usize) {
    data[pos + 4..pos + 8].copy_from_slice(&BoxType::FREE.0);
}
