//! Shared test harness for integration tests.
//!
//! Provides a scripted [`MockDemux`] standing in for the external ROUTE
//! demultiplexer, recording pin sinks, and object builders for TS and
//! ISOBMFF payloads.

use bytes::{BufMut, BytesMut};
use parking_lot::Mutex;
use routecast::config::TuneIn;
use routecast::demux::{
    shared, Blob, DemuxStats, Event, EventSink, PumpStatus, ReceivedObject, RouteDemux,
};
use routecast::dispatch::{FilePacket, PinFactory, PinOutput, PinProperties};
use routecast::error::Error;
use routecast_repair::{ByteRange, RangeList};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

/// Initialize test logging once.
pub fn init_logs() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// One scripted lifecycle event, owned by the mock.
pub enum OwnedEvent {
    ServiceFound { service_id: u32 },
    ServiceScan,
    Manifest { service_id: u32, object: ReceivedObject },
    Segment { service_id: u32, object: ReceivedObject },
    Fragment { service_id: u32, object: ReceivedObject },
    File { service_id: u32, object: ReceivedObject },
    Delete { service_id: u32, filename: String },
}

/// One scripted pump step.
pub enum Step {
    Event(OwnedEvent),
    Empty,
    Eos,
    Fail(String),
}

/// Scripted demultiplexer recording every command issued against it.
#[derive(Default)]
pub struct MockDemux {
    pub script: VecDeque<Step>,
    pub buffered: HashMap<u32, Vec<String>>,
    pub services: Vec<u32>,
    pub purged: Vec<u32>,
    pub removed_by_name: Vec<(u32, String)>,
    pub force_kept: Vec<(u32, String)>,
    pub tunes: Vec<TuneIn>,
    pub stream_delivery: Vec<(u32, bool)>,
    pub progressive: Option<bool>,
    pub reorder: Option<(bool, Duration)>,
    pub tsi_filter: Option<Option<u32>>,
    pub counters: DemuxStats,
}

impl MockDemux {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            script: steps.into(),
            ..Default::default()
        }
    }

    pub fn with_services(mut self, services: &[u32]) -> Self {
        self.services = services.to_vec();
        self
    }
}

impl RouteDemux for MockDemux {
    fn process(&mut self, sink: &mut dyn EventSink) -> Result<PumpStatus, Error> {
        match self.script.pop_front() {
            None | Some(Step::Empty) => Ok(PumpStatus::Empty),
            Some(Step::Eos) => Ok(PumpStatus::Eos),
            Some(Step::Fail(msg)) => Err(Error::demux(msg)),
            Some(Step::Event(event)) => {
                // delivered objects enter the per-service buffer first,
                // like the real demux's object store
                match &event {
                    OwnedEvent::Manifest { service_id, object }
                    | OwnedEvent::Segment { service_id, object }
                    | OwnedEvent::File { service_id, object } => {
                        self.buffered
                            .entry(*service_id)
                            .or_default()
                            .push(object.filename.clone());
                    }
                    _ => {}
                }
                match &event {
                    OwnedEvent::ServiceFound { service_id } => {
                        if !self.services.contains(service_id) {
                            self.services.push(*service_id);
                        }
                        sink.on_event(Event::ServiceFound {
                            service_id: *service_id,
                        });
                    }
                    OwnedEvent::ServiceScan => sink.on_event(Event::ServiceScan),
                    OwnedEvent::Manifest { service_id, object } => {
                        sink.on_event(Event::ManifestReady {
                            service_id: *service_id,
                            object,
                        });
                    }
                    OwnedEvent::Segment { service_id, object } => {
                        sink.on_event(Event::SegmentReady {
                            service_id: *service_id,
                            object,
                        });
                    }
                    OwnedEvent::Fragment { service_id, object } => {
                        sink.on_event(Event::SegmentFragment {
                            service_id: *service_id,
                            object,
                        });
                    }
                    OwnedEvent::File { service_id, object } => {
                        sink.on_event(Event::FileReady {
                            service_id: *service_id,
                            object,
                        });
                    }
                    OwnedEvent::Delete {
                        service_id,
                        filename,
                    } => {
                        sink.on_event(Event::FileDelete {
                            service_id: *service_id,
                            filename,
                        });
                    }
                }
                Ok(PumpStatus::Pumped)
            }
        }
    }

    fn object_count(&self, service_id: u32) -> usize {
        self.buffered.get(&service_id).map_or(0, Vec::len)
    }

    fn remove_first_object(&mut self, service_id: u32) -> bool {
        match self.buffered.get_mut(&service_id) {
            Some(objects) if !objects.is_empty() => {
                objects.remove(0);
                true
            }
            _ => false,
        }
    }

    fn remove_object_by_name(&mut self, service_id: u32, filename: &str) {
        if let Some(objects) = self.buffered.get_mut(&service_id) {
            objects.retain(|name| name != filename);
        }
        self.removed_by_name.push((service_id, filename.to_string()));
    }

    fn force_keep_object(&mut self, service_id: u32, filename: &str) {
        self.force_kept.push((service_id, filename.to_string()));
    }

    fn purge_objects(&mut self, service_id: u32) {
        self.buffered.remove(&service_id);
        self.purged.push(service_id);
    }

    fn tune_in(&mut self, target: TuneIn) {
        self.tunes.push(target);
    }

    fn has_service(&self, service_id: u32) -> bool {
        self.services.contains(&service_id)
    }

    fn set_tsi_filter(&mut self, tsi: Option<u32>) {
        self.tsi_filter = Some(tsi);
    }

    fn set_stream_delivery(&mut self, tsi: u32, deliver: bool) {
        self.stream_delivery.push((tsi, deliver));
    }

    fn set_progressive_dispatch(&mut self, enabled: bool) {
        self.progressive = Some(enabled);
    }

    fn set_reorder(&mut self, reorder: bool, timeout: Duration) {
        self.reorder = Some((reorder, timeout));
    }

    fn stats(&self) -> DemuxStats {
        self.counters
    }
}

/// Everything one pin saw.
#[derive(Default)]
pub struct PinLog {
    pub props: Vec<PinProperties>,
    pub packets: Vec<FilePacket>,
    pub deletes: Vec<String>,
    pub eos: u32,
}

/// Pin that appends everything into a shared log.
pub struct RecordingPin {
    log: Arc<Mutex<PinLog>>,
}

impl PinOutput for RecordingPin {
    fn set_properties(&mut self, props: &PinProperties) {
        self.log.lock().props.push(props.clone());
    }

    fn send(&mut self, packet: FilePacket) {
        self.log.lock().packets.push(packet);
    }

    fn send_delete(&mut self, segment_name: &str) {
        self.log.lock().deletes.push(segment_name.to_string());
    }

    fn set_eos(&mut self) {
        self.log.lock().eos += 1;
    }
}

/// Factory handing out recording pins; keeps a handle to every log.
#[derive(Default, Clone)]
pub struct RecordingPinFactory {
    pub logs: Arc<Mutex<Vec<Arc<Mutex<PinLog>>>>>,
}

impl RecordingPinFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pin_count(&self) -> usize {
        self.logs.lock().len()
    }

    /// Snapshot accessor for the n-th created pin's log.
    pub fn log(&self, index: usize) -> Arc<Mutex<PinLog>> {
        self.logs.lock()[index].clone()
    }
}

impl PinFactory for RecordingPinFactory {
    fn new_pin(&mut self) -> Box<dyn PinOutput> {
        let log = Arc::new(Mutex::new(PinLog::default()));
        self.logs.lock().push(log.clone());
        Box::new(RecordingPin { log })
    }
}

fn range_list(received: &[(usize, usize)]) -> RangeList {
    RangeList::new(
        received
            .iter()
            .map(|&(offset, size)| ByteRange::new(offset, size))
            .collect(),
    )
    .unwrap()
}

/// A complete, well-formed object.
pub fn clean_object(filename: &str, tsi: u32, toi: u32, data: Vec<u8>) -> ReceivedObject {
    let len = data.len();
    ReceivedObject::new(
        filename,
        tsi,
        toi,
        shared(Blob::complete(data)),
        RangeList::whole(len),
    )
}

/// A corrupted object with the given received ranges.
pub fn corrupted_object(
    filename: &str,
    tsi: u32,
    toi: u32,
    data: Vec<u8>,
    received: &[(usize, usize)],
) -> ReceivedObject {
    ReceivedObject::new(
        filename,
        tsi,
        toi,
        shared(Blob::corrupted(data)),
        range_list(received),
    )
}

/// Patterned TS payload of `packets` x 188 bytes.
pub fn ts_payload(packets: usize) -> Vec<u8> {
    (0..packets * 188).map(|i| (i % 251) as u8).collect()
}

/// Minimal ISOBMFF segment: styp + moof + mdat with patterned payload.
pub fn isobmff_payload(moof_size: usize, mdat_size: usize) -> Vec<u8> {
    let mut buf = BytesMut::new();
    for (box_type, size) in [(b"styp", 24usize), (b"moof", moof_size), (b"mdat", mdat_size)] {
        buf.put_u32(size as u32);
        buf.put_slice(box_type);
        for i in 0..size - 8 {
            buf.put_u8((i % 113) as u8);
        }
    }
    buf.to_vec()
}
