//! External ROUTE demultiplexer interface.
//!
//! The wire protocol (LCT/ALC packet parsing, FEC, session/TSI
//! bookkeeping, object completion, socket I/O) lives behind this
//! boundary. The demux owns every received object; the core sees one
//! borrowed descriptor per lifecycle event and talks back through the
//! query/command surface of [`RouteDemux`].

use crate::config::TuneIn;
use crate::error::Error;
use parking_lot::Mutex;
use routecast_repair::{ContainerKind, RangeList};
use std::sync::Arc;
use std::time::Duration;

/// Owned payload of one delivered object.
#[derive(Debug, Default)]
pub struct Blob {
    /// The byte buffer; bytes outside the received ranges are
    /// uninitialized until repair runs.
    pub data: Vec<u8>,
    /// Set while lost ranges remain unpatched.
    pub corrupted: bool,
    /// Set while the demux is still appending (low-latency delivery).
    pub in_transfer: bool,
}

impl Blob {
    /// A complete, well-formed payload.
    pub fn complete(data: Vec<u8>) -> Self {
        Self {
            data,
            corrupted: false,
            in_transfer: false,
        }
    }

    /// A payload with unpatched holes.
    pub fn corrupted(data: Vec<u8>) -> Self {
        Self {
            data,
            corrupted: true,
            in_transfer: false,
        }
    }
}

/// Shared handle to a blob. The demux owns the allocation; cache mode
/// may publish clones, which must treat the payload as immutable.
pub type SharedBlob = Arc<Mutex<Blob>>;

/// Wrap a blob for sharing.
pub fn shared(blob: Blob) -> SharedBlob {
    Arc::new(Mutex::new(blob))
}

/// Descriptor of one object delivered by the demux, borrowed by the
/// core for the duration of a single event callback.
#[derive(Debug, Clone)]
pub struct ReceivedObject {
    /// Object name within the service.
    pub filename: String,
    /// Transport session the object belongs to.
    pub tsi: u32,
    /// Object identifier within the TSI.
    pub toi: u32,
    /// Declared total object size.
    pub total_size: usize,
    /// Payload buffer.
    pub blob: SharedBlob,
    /// Byte ranges that actually arrived, sorted and disjoint.
    pub ranges: RangeList,
    /// Wall-clock download duration in milliseconds.
    pub download_ms: u32,
    /// False when this delivery repeats unchanged carousel content.
    pub updated: bool,
    kind: ContainerKind,
}

impl ReceivedObject {
    /// Describe a delivered object. The container kind is decided
    /// here, once, from the filename suffix.
    pub fn new(
        filename: impl Into<String>,
        tsi: u32,
        toi: u32,
        blob: SharedBlob,
        ranges: RangeList,
    ) -> Self {
        let filename = filename.into();
        let kind = ContainerKind::from_filename(&filename);
        let total_size = blob.lock().data.len();
        Self {
            filename,
            tsi,
            toi,
            total_size,
            blob,
            ranges,
            download_ms: 0,
            updated: true,
            kind,
        }
    }

    /// Container format this object repairs as.
    pub fn kind(&self) -> ContainerKind {
        self.kind
    }

    /// Check the corrupted flag.
    pub fn is_corrupted(&self) -> bool {
        self.blob.lock().corrupted
    }
}

/// One lifecycle event from the demux.
#[derive(Debug)]
pub enum Event<'a> {
    /// A service was discovered.
    ServiceFound { service_id: u32 },
    /// The service list was re-scanned.
    ServiceScan,
    /// A manifest (MPD) finished downloading.
    ManifestReady {
        service_id: u32,
        object: &'a ReceivedObject,
    },
    /// A media segment finished downloading.
    SegmentReady {
        service_id: u32,
        object: &'a ReceivedObject,
    },
    /// A low-latency fragment of a still-downloading segment.
    SegmentFragment {
        service_id: u32,
        object: &'a ReceivedObject,
    },
    /// A plain file finished downloading.
    FileReady {
        service_id: u32,
        object: &'a ReceivedObject,
    },
    /// An object was removed upstream.
    FileDelete {
        service_id: u32,
        filename: &'a str,
    },
    /// Wall-clock signalling from the broadcast.
    TimeSignal { service_id: u32 },
    /// The session ended upstream.
    Eos,
}

/// Receives lifecycle events during a pump step.
pub trait EventSink {
    fn on_event(&mut self, event: Event<'_>);
}

/// Result of one pump step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpStatus {
    /// One unit of work was processed.
    Pumped,
    /// No data available right now.
    Empty,
    /// The session ended upstream.
    Eos,
}

/// Cumulative reception counters, timestamps relative to demux start.
#[derive(Debug, Clone, Copy, Default)]
pub struct DemuxStats {
    pub packets: u64,
    pub bytes: u64,
    pub first_packet_time: Option<Duration>,
    pub last_packet_time: Option<Duration>,
}

/// Black-box interface to the ROUTE demultiplexer.
///
/// `process` must never block beyond a bounded poll; it returns
/// [`PumpStatus::Empty`] instead so the caller's scheduler can do other
/// work. None of the commands may be issued from inside an event
/// callback; the dispatch layer queues them and the driving loop
/// applies them once the pump step returns.
pub trait RouteDemux {
    /// Pump one unit of work, delivering lifecycle events to `sink`.
    fn process(&mut self, sink: &mut dyn EventSink) -> Result<PumpStatus, Error>;

    /// Number of objects buffered for a service.
    fn object_count(&self, service_id: u32) -> usize;

    /// Drop the oldest buffered object; false when nothing could go.
    fn remove_first_object(&mut self, service_id: u32) -> bool;

    /// Drop a buffered object by name.
    fn remove_object_by_name(&mut self, service_id: u32, filename: &str);

    /// Protect a buffered object from trimming while it is in use.
    fn force_keep_object(&mut self, service_id: u32, filename: &str);

    /// Drop every buffered object for a service.
    fn purge_objects(&mut self, service_id: u32);

    /// Tune to a service (initial tune or retune).
    fn tune_in(&mut self, target: TuneIn);

    /// Check whether a service id is currently announced.
    fn has_service(&self, service_id: u32) -> bool;

    /// Restrict delivery to a single TSI (debug aid).
    fn set_tsi_filter(&mut self, tsi: Option<u32>);

    /// Switch one stream's framing between skip and deliver without
    /// stopping the shared session.
    fn set_stream_delivery(&mut self, tsi: u32, deliver: bool);

    /// Allow fragment events before an object completes.
    fn set_progressive_dispatch(&mut self, enabled: bool);

    /// Tolerate out-of-order packets for `timeout` before closing an
    /// object.
    fn set_reorder(&mut self, reorder: bool, timeout: Duration);

    /// Cumulative reception counters.
    fn stats(&self) -> DemuxStats;
}
