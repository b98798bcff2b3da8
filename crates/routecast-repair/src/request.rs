//! Unicast repair support.
//!
//! Broadcast reception is one-way; the only requestive recovery option
//! is a companion unicast fetch of whatever the broadcast lost. This
//! module computes the lost ranges and shapes the request. Actually
//! issuing it (HTTP, retries, response patching) is an integration
//! point outside this crate.

use crate::ranges::{ByteRange, RangeList};

/// A companion unicast request covering everything the broadcast lost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairRequest {
    /// Absolute URL of the object on the repair server.
    pub url: String,
    /// Byte ranges to fetch, in offset order.
    pub ranges: Vec<ByteRange>,
}

impl RepairRequest {
    /// Build a request for `filename` against `repair_url`, covering
    /// the complement of the received ranges.
    pub fn new(repair_url: &str, filename: &str, ranges: &RangeList, total_size: usize) -> Self {
        let url = if repair_url.ends_with('/') {
            format!("{repair_url}{filename}")
        } else {
            format!("{repair_url}/{filename}")
        };
        Self {
            url,
            ranges: missing_ranges(ranges, total_size),
        }
    }

    /// Check whether there is nothing left to fetch.
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

/// Complement of the received ranges over `[0, total_size)`.
///
/// N received intervals leave at most N+1 lost ones: before the first,
/// between consecutive pairs, and after the last.
pub fn missing_ranges(ranges: &RangeList, total_size: usize) -> Vec<ByteRange> {
    let mut lost = Vec::with_capacity(ranges.len() + 1);
    let mut pos = 0;
    for range in ranges.iter() {
        if range.offset > pos {
            lost.push(ByteRange::new(pos, range.offset - pos));
        }
        pos = pos.max(range.end());
    }
    if total_size > pos {
        lost.push(ByteRange::new(pos, total_size - pos));
    }
    lost
}
