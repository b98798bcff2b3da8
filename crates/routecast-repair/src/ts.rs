//! MPEG-2 TS segment patching.
//!
//! Lost byte ranges are widened to the 188-byte packet grid and every
//! packet slot in a widened gap is overwritten with a null-packet
//! header, so a demuxer sees a continuous stream of valid packets with
//! the lost ones pointing at PID 0x1FFF.

use crate::ranges::RangeList;

/// TS packet length.
pub const TS_PACKET_SIZE: usize = 188;

/// Sync byte, PID 0x1FFF, adaptation-field-control = payload only.
const NULL_PACKET_HEADER: [u8; 4] = [0x47, 0x1F, 0xFF, 0x10];

/// Leading packets expected to carry PAT/PMT; losing all of them makes
/// the segment useless as a stream bootstrap.
const PAT_WINDOW_PACKETS: usize = 4;

/// Patch every lost packet slot in `data` with a null-packet header.
///
/// Gap ends are rounded inward to the packet grid: a packet only
/// partially received is treated as fully missing. Trailing payload
/// bytes of overwritten packets are left as-is.
///
/// Returns `true` when the first received range starts beyond the
/// PAT/PMT window, i.e. the caller should drop the segment rather than
/// deliver a streamless program if this is the first object on its
/// stream.
pub fn patch_gaps(data: &mut [u8], ranges: &RangeList) -> bool {
    let mut drop_if_first = false;
    let mut pos = 0;
    for (i, range) in ranges.iter().enumerate() {
        if i == 0 && range.offset > PAT_WINDOW_PACKETS * TS_PACKET_SIZE {
            drop_if_first = true;
        }
        // the packet holding the range start lost its head
        let gap_end = range.offset.next_multiple_of(TS_PACKET_SIZE);
        pos = fill_null(data, pos, gap_end);
        // the packet holding the range end lost its tail; rewind so the
        // next gap fill covers it
        let range_end = range.end() - range.end() % TS_PACKET_SIZE;
        pos = pos.max(range_end);
    }
    fill_null(data, pos, data.len());
    drop_if_first
}

/// Stamp null-packet headers on every packet slot in `[pos, end)`.
fn fill_null(data: &mut [u8], mut pos: usize, end: usize) -> usize {
    while pos < end {
        if pos + NULL_PACKET_HEADER.len() > data.len() {
            break;
        }
        data[pos..pos + NULL_PACKET_HEADER.len()].copy_from_slice(&NULL_PACKET_HEADER);
        pos += TS_PACKET_SIZE;
    }
    pos
}
