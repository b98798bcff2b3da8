//! Two-phase repair gate.
//!
//! A freshly delivered object may still have unpatched holes, and its
//! buffer may later be shared by reference with out-of-band cache
//! consumers. Nothing downstream may see the buffer until repair has
//! run, so the ordering is made structural: [`Received`] is the only
//! way in, repair consumes it, and routing only accepts
//! [`Dispatchable`].

use crate::demux::ReceivedObject;
use routecast_repair::{RepairMode, RepairRequest};
use tracing::warn;

/// A delivered object that has not yet passed the repair gate.
pub struct Received<'a> {
    object: &'a ReceivedObject,
}

/// A delivered object cleared for routing. Its buffer is final: from
/// here on shared references may be published.
pub struct Dispatchable<'a> {
    object: &'a ReceivedObject,
    drop_if_first: bool,
}

impl<'a> Received<'a> {
    /// Enter the gate with a borrowed object descriptor.
    pub fn new(object: &'a ReceivedObject) -> Self {
        Self { object }
    }

    /// Run local repair and cross the gate.
    ///
    /// Non-corrupted objects pass through untouched, which makes the
    /// gate idempotent. An unrepairable object keeps its corrupted
    /// flag; the router decides whether keep-corrupted still forwards
    /// it.
    pub fn repair(self, mode: RepairMode) -> Dispatchable<'a> {
        let object = self.object;
        let mut drop_if_first = false;
        if matches!(mode, RepairMode::Simple | RepairMode::Strict) {
            let mut blob = object.blob.lock();
            if blob.corrupted {
                let outcome = routecast_repair::repair(
                    object.kind(),
                    mode.mdat_policy(),
                    &mut blob.data,
                    &object.ranges,
                );
                if outcome.patched {
                    blob.corrupted = false;
                } else {
                    warn!(
                        "Failed to patch tail of corrupted segment {}, keeping corrupted flag",
                        object.filename
                    );
                }
                drop_if_first = outcome.drop_if_first;
            }
        }
        Dispatchable {
            object,
            drop_if_first,
        }
    }

    /// Cross the gate without touching the buffer (repair disabled, or
    /// deferred to a unicast companion fetch).
    pub fn into_dispatchable(self) -> Dispatchable<'a> {
        Dispatchable {
            object: self.object,
            drop_if_first: false,
        }
    }

    /// Shape the unicast companion request for full repair mode.
    pub fn repair_request(&self, repair_url: &str) -> RepairRequest {
        RepairRequest::new(
            repair_url,
            &self.object.filename,
            &self.object.ranges,
            self.object.total_size,
        )
    }

    /// The wrapped descriptor.
    pub fn object(&self) -> &'a ReceivedObject {
        self.object
    }
}

impl<'a> Dispatchable<'a> {
    /// The wrapped descriptor.
    pub fn object(&self) -> &'a ReceivedObject {
        self.object
    }

    /// TS only: the PAT/PMT window was lost; drop this object if it is
    /// the first on its stream.
    pub fn drop_if_first(&self) -> bool {
        self.drop_if_first
    }

    /// Check the corrupted flag after repair.
    pub fn is_corrupted(&self) -> bool {
        self.object.is_corrupted()
    }
}
