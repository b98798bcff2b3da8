//! Object dispatch routing.
//!
//! One decision per delivered object: pass the repair gate, then hand
//! the object to the configured destination (HTTP cache, output pins,
//! or a directory), maintaining loop state, the retention window and
//! the demux's buffered-object count along the way.
//!
//! The router runs inside demux event callbacks, so it never talks to
//! the demux directly; commands are queued as [`DemuxAction`]s and
//! applied by the driving loop after each pump step.

mod cache;
mod disk;
mod pin;

pub use cache::{
    cache_key, parse_cache_key, CacheHandle, CachePayload, CacheRecord, HttpCache,
    MemoryHttpCache, CACHE_SCHEME_ROOT, HDR_FIRST_SEG, HDR_LOOP, HDR_LOW_LATENCY, HDR_ROUTE,
};
pub use disk::DiskOutput;
pub use pin::{FilePacket, PinFactory, PinOutput, PinProperties};

use crate::config::{Config, TuneIn};
use crate::demux::{Event, EventSink, ReceivedObject};
use crate::error::{Error, Result};
use crate::object::{Dispatchable, Received};
use crate::tracker::{LoopTracker, RetentionFifo, ToiObservation};
use bytes::Bytes;
use pin::{file_extension, TsiOutput};
use routecast_repair::{RepairMode, RepairRequest};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

/// Issues unicast companion repair requests (full repair mode).
///
/// Implementations fetch the lost ranges out-of-band and patch the
/// demux-owned buffer; request/response handling is outside this core.
pub trait UnicastRepair {
    fn request(&mut self, request: RepairRequest);
}

/// Demux commands the router cannot issue mid-callback; the driving
/// loop applies them once the pump step returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DemuxAction {
    /// Drop every buffered object of the service (loop recovery).
    Purge { service_id: u32 },
    /// Trim buffered objects down to `keep`, oldest first.
    Trim { service_id: u32, keep: usize },
    /// Drop one buffered object by name (cache entry destroyed).
    Remove { service_id: u32, filename: String },
    /// Protect one buffered object from trimming (cache entry in use).
    ForceKeep { service_id: u32, filename: String },
    /// Re-tune to the given target.
    Retune { target: TuneIn },
    /// Check the tuned service still exists; fall back to first-found.
    VerifyTune { service_id: u32 },
}

/// Sink selection, fixed for the session's lifetime.
enum OutputMode {
    Cache(Box<dyn HttpCache>),
    Directory(DiskOutput),
    Pins { factory: Box<dyn PinFactory> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ModeKind {
    Cache,
    Directory,
    Pins,
}

/// Owner of a retained segment name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RetainedIn {
    Cache,
    Disk,
    DefaultPin,
    TsiPin(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CacheEvent {
    Segment,
    Fragment,
    File,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PinDeliverable {
    Manifest,
    Segment,
    File,
}

/// Routes received objects to their downstream destination.
pub struct Dispatcher {
    config: Config,
    mode: OutputMode,
    default_pin: Option<Box<dyn PinOutput>>,
    tsi_outs: Vec<TsiOutput>,
    loop_tracker: LoopTracker,
    retention: RetentionFifo<RetainedIn>,
    /// First segment of the current broadcast loop, surfaced in cache
    /// headers so HTTP consumers can anchor their clock.
    clock_init_seg: Option<String>,
    manifest_entries: HashMap<u32, CacheHandle>,
    tune_service_id: u32,
    first_service_seen: bool,
    actions: Vec<DemuxAction>,
    repairer: Option<Box<dyn UnicastRepair>>,
}

impl Dispatcher {
    /// Cache mode: populate `cache` with received files.
    pub fn with_cache(mut config: Config, cache: Box<dyn HttpCache>) -> Self {
        config.cache = true;
        config.output_dir = None;
        config.validate();
        Self::new(config, OutputMode::Cache(cache))
    }

    /// Standalone mode: write files under the configured directory.
    pub fn with_directory(mut config: Config) -> Result<Self> {
        config.validate();
        let Some(root) = config.output_dir.clone() else {
            return Err(Error::invalid_config(
                "standalone mode requires an output directory",
            ));
        };
        Ok(Self::new(
            config,
            OutputMode::Directory(DiskOutput::new(root)),
        ))
    }

    /// Source mode: forward files as packets on pins from `factory`.
    pub fn with_pins(mut config: Config, factory: Box<dyn PinFactory>) -> Self {
        config.cache = false;
        config.output_dir = None;
        config.validate();
        Self::new(config, OutputMode::Pins { factory })
    }

    fn new(config: Config, mode: OutputMode) -> Self {
        let retention = RetentionFifo::new(config.max_segments);
        let tune_service_id = match config.tune_in {
            TuneIn::Service(id) => id,
            _ => 0,
        };
        Self {
            config,
            mode,
            default_pin: None,
            tsi_outs: Vec::new(),
            loop_tracker: LoopTracker::new(),
            retention,
            clock_init_seg: None,
            manifest_entries: HashMap::new(),
            tune_service_id,
            first_service_seen: false,
            actions: Vec::new(),
            repairer: None,
        }
    }

    /// Install the unicast repair hook used by full repair mode.
    pub fn set_unicast_repair(&mut self, repairer: Box<dyn UnicastRepair>) {
        self.repairer = Some(repairer);
    }

    /// The session configuration this router was built with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// True once a service announcement or manifest was observed.
    pub fn first_service_seen(&self) -> bool {
        self.first_service_seen
    }

    /// Service currently tuned; 0 when none is pinned yet.
    pub fn tuned_service(&self) -> u32 {
        self.tune_service_id
    }

    /// Forget the pinned service (tune fallback).
    pub fn clear_tuned_service(&mut self) {
        self.tune_service_id = 0;
    }

    /// Drain the demux commands queued during event handling.
    pub fn take_actions(&mut self) -> Vec<DemuxAction> {
        std::mem::take(&mut self.actions)
    }

    /// Signal end of stream to every owned sink.
    pub fn signal_eos(&mut self) {
        if let Some(pin) = self.default_pin.as_mut() {
            pin.set_eos();
        }
        for out in &mut self.tsi_outs {
            out.pin.set_eos();
        }
    }

    /// Handle an out-of-band HTTP request against a synthetic `groute`
    /// URL. A request for another service re-tunes to it; a request for
    /// the tuned service pins the object in the demux; entry
    /// destruction releases it. Returns false when the URL is not ours.
    pub fn on_cache_request(&mut self, url: &str, is_destroy: bool) -> bool {
        let Some((service_id, filename)) = parse_cache_key(url) else {
            return false;
        };
        if is_destroy {
            self.actions.push(DemuxAction::Remove {
                service_id,
                filename: filename.to_string(),
            });
        } else if service_id != 0 && service_id != self.tune_service_id {
            info!(
                "Request on service {service_id} but tuned on service {}, retuning",
                self.tune_service_id
            );
            self.tune_service_id = service_id;
            self.loop_tracker.reset();
            self.clock_init_seg = None;
            self.actions.push(DemuxAction::Retune {
                target: TuneIn::Service(service_id),
            });
        } else {
            self.actions.push(DemuxAction::ForceKeep {
                service_id,
                filename: filename.to_string(),
            });
        }
        true
    }

    fn mode_kind(&self) -> ModeKind {
        match self.mode {
            OutputMode::Cache(_) => ModeKind::Cache,
            OutputMode::Directory(_) => ModeKind::Directory,
            OutputMode::Pins { .. } => ModeKind::Pins,
        }
    }

    /// Repair gate: every segment/file crosses it exactly once before
    /// routing.
    fn pass_repair_gate<'a>(&mut self, object: &'a ReceivedObject) -> Dispatchable<'a> {
        match self.config.repair {
            RepairMode::None => Received::new(object).into_dispatchable(),
            RepairMode::Full => {
                let received = Received::new(object);
                if object.is_corrupted() {
                    if let Some(url) = &self.config.repair_url {
                        let request = received.repair_request(url);
                        info!(
                            "Requesting unicast repair of {} ({} lost ranges)",
                            object.filename,
                            request.ranges.len()
                        );
                        if let Some(repairer) = &mut self.repairer {
                            repairer.request(request);
                        } else {
                            debug!(
                                "No unicast repairer installed, keeping {} corrupted",
                                object.filename
                            );
                        }
                    }
                }
                received.into_dispatchable()
            }
            mode => Received::new(object).repair(mode),
        }
    }

    fn on_manifest(&mut self, service_id: u32, object: &ReceivedObject) {
        self.first_service_seen = true;
        match self.mode_kind() {
            ModeKind::Directory => {
                let d = Received::new(object).into_dispatchable();
                self.write_to_disk(service_id, &d, false);
            }
            ModeKind::Pins => {
                let d = Received::new(object).into_dispatchable();
                self.send_to_pins(service_id, &d, PinDeliverable::Manifest);
            }
            ModeKind::Cache => self.cache_manifest(service_id, object),
        }
    }

    fn cache_manifest(&mut self, service_id: u32, object: &ReceivedObject) {
        let OutputMode::Cache(cache) = &mut self.mode else {
            return;
        };
        let key = cache_key(service_id, &object.filename);
        let payload = CachePayload::Owned(Bytes::copy_from_slice(&object.blob.lock().data));
        let handle = cache.insert(&key, payload, "application/dash+xml", object.download_ms);
        cache.force_headers(&handle, &format!("{HDR_ROUTE}: {service_id}\r\n"));
        self.manifest_entries.insert(service_id, handle);

        // a new manifest re-anchors loop detection and the loop clock
        self.loop_tracker.reset();
        self.clock_init_seg = None;
        self.tune_service_id = service_id;
        info!(
            "Manifest {} for service {service_id} pushed to cache",
            object.filename
        );
    }

    fn on_segment(&mut self, service_id: u32, object: &ReceivedObject) {
        let dispatchable = self.pass_repair_gate(object);
        match self.mode_kind() {
            ModeKind::Directory => self.write_to_disk(service_id, &dispatchable, true),
            ModeKind::Pins => self.send_to_pins(service_id, &dispatchable, PinDeliverable::Segment),
            ModeKind::Cache => self.cache_object(service_id, &dispatchable, CacheEvent::Segment),
        }
    }

    fn on_fragment(&mut self, service_id: u32, object: &ReceivedObject) {
        // progressive dispatch only feeds the cache
        if self.mode_kind() != ModeKind::Cache {
            return;
        }
        let d = Received::new(object).into_dispatchable();
        self.cache_object(service_id, &d, CacheEvent::Fragment);
    }

    fn on_file(&mut self, service_id: u32, object: &ReceivedObject) {
        let dispatchable = self.pass_repair_gate(object);
        match self.mode_kind() {
            ModeKind::Directory => self.write_to_disk(service_id, &dispatchable, false),
            ModeKind::Pins => self.send_to_pins(service_id, &dispatchable, PinDeliverable::File),
            ModeKind::Cache => self.cache_object(service_id, &dispatchable, CacheEvent::File),
        }
    }

    fn on_file_delete(&mut self, service_id: u32, filename: &str) {
        let OutputMode::Cache(cache) = &mut self.mode else {
            return;
        };
        let key = cache_key(service_id, filename);
        cache.insert(&key, CachePayload::Empty, "video/mp4", 0);
    }

    fn cache_object(&mut self, service_id: u32, d: &Dispatchable<'_>, event: CacheEvent) {
        let object = d.object();
        let OutputMode::Cache(cache) = &mut self.mode else {
            return;
        };

        // low-latency clock headers on the service manifest: set when
        // the loop's first segment is unknown, refresh when the
        // previously advertised in-flight segment completes
        if matches!(event, CacheEvent::Segment | CacheEvent::Fragment) {
            let advertised_completes = matches!(event, CacheEvent::Segment)
                && self.clock_init_seg.as_deref() == Some(object.filename.as_str());
            if self.clock_init_seg.is_none() || advertised_completes {
                if let Some(handle) = self.manifest_entries.get(&service_id) {
                    let first_seg = self
                        .clock_init_seg
                        .get_or_insert_with(|| object.filename.clone())
                        .clone();
                    let mut headers =
                        format!("{HDR_ROUTE}: {service_id}\r\n{HDR_FIRST_SEG}: {first_seg}\r\n");
                    if event == CacheEvent::Fragment {
                        headers.push_str(&format!("{HDR_LOW_LATENCY}: yes\r\n"));
                    }
                    cache.force_headers(handle, &headers);
                }
            }
        }

        // unrepaired objects are dropped unless explicitly kept
        if d.is_corrupted() && !self.config.keep_corrupted {
            return;
        }

        // loop bookkeeping follows segment delivery only
        let mut is_loop = false;
        if matches!(event, CacheEvent::Segment | CacheEvent::Fragment) {
            if d.drop_if_first() && !self.loop_tracker.is_synced() {
                debug!(
                    "Dropping {}: PAT/PMT window lost before stream sync",
                    object.filename
                );
                return;
            }
            if let ToiObservation::Loop { previous } =
                self.loop_tracker.observe(object.tsi, object.toi)
            {
                warn!(
                    "Loop detected on service {service_id} for TSI {}: prev TOI {previous} this TOI {}",
                    object.tsi, object.toi
                );
                self.actions.push(DemuxAction::Purge { service_id });
                is_loop = true;
                self.clock_init_seg = Some(object.filename.clone());
                if let Some(handle) = self.manifest_entries.get(&service_id) {
                    let headers = format!(
                        "{HDR_ROUTE}: {service_id}\r\n{HDR_FIRST_SEG}: {}\r\n{HDR_LOOP}: yes\r\n",
                        object.filename
                    );
                    cache.force_headers(handle, &headers);
                }
            }
        }

        // publish: files (manifest-adjacent, init segments) are copied
        // so the entry outlives object recycling; media segments share
        // the blob
        let key = cache_key(service_id, &object.filename);
        let payload = match event {
            CacheEvent::File => {
                CachePayload::Owned(Bytes::copy_from_slice(&object.blob.lock().data))
            }
            _ => CachePayload::Shared(object.blob.clone()),
        };
        let handle = cache.insert(&key, payload, "video/mp4", object.download_ms);
        cache.force_headers(&handle, &format!("{HDR_ROUTE}: yes\r\n"));

        if event == CacheEvent::Fragment {
            debug!("Pushing fragment of {} to cache", object.filename);
            return;
        }
        info!("Pushing file {} to cache", object.filename);

        // retention window: evicted names become tombstones
        if event == CacheEvent::Segment && self.retention.is_enabled() {
            for (_, old_key) in self.retention.push(RetainedIn::Cache, key) {
                cache.insert(&old_key, CachePayload::Empty, "video/mp4", 0);
            }
        }

        if is_loop {
            // keep the just-recovered timeline buffered this cycle
            return;
        }
        self.actions.push(DemuxAction::Trim {
            service_id,
            keep: self.config.cached_objects,
        });
    }

    fn send_to_pins(&mut self, service_id: u32, d: &Dispatchable<'_>, deliverable: PinDeliverable) {
        let object = d.object();
        if !d.is_corrupted() || self.config.keep_corrupted {
            if matches!(deliverable, PinDeliverable::Manifest | PinDeliverable::File)
                && self.config.skip_repeats
                && !object.updated
            {
                // repeat delivery of unchanged carousel content
                return;
            }
            let split = self.config.split_tsi && object.tsi != 0;
            let owner = if split {
                match self
                    .tsi_outs
                    .iter()
                    .position(|out| out.sid == service_id && out.tsi == object.tsi)
                {
                    Some(idx) => RetainedIn::TsiPin(idx),
                    None => {
                        let OutputMode::Pins { factory } = &mut self.mode else {
                            return;
                        };
                        self.tsi_outs.push(TsiOutput {
                            sid: service_id,
                            tsi: object.tsi,
                            pin: factory.new_pin(),
                        });
                        RetainedIn::TsiPin(self.tsi_outs.len() - 1)
                    }
                }
            } else {
                if self.default_pin.is_none() {
                    let OutputMode::Pins { factory } = &mut self.mode else {
                        return;
                    };
                    self.default_pin = Some(factory.new_pin());
                }
                RetainedIn::DefaultPin
            };

            let props = PinProperties {
                id: if split { object.tsi } else { service_id },
                service_id,
                url: object.filename.clone(),
                file_ext: file_extension(&object.filename).to_string(),
            };
            let packet = FilePacket {
                data: Bytes::copy_from_slice(&object.blob.lock().data),
                corrupted: d.is_corrupted(),
            };
            if let Some(pin) = self.pin_for(owner) {
                pin.set_properties(&props);
                pin.send(packet);
            }

            if deliverable == PinDeliverable::Segment && self.retention.is_enabled() {
                for (evicted_owner, name) in
                    self.retention.push(owner, object.filename.clone())
                {
                    if let Some(pin) = self.pin_for(evicted_owner) {
                        pin.send_delete(&name);
                    }
                }
            }
        }
        self.actions.push(DemuxAction::Trim {
            service_id,
            keep: 1,
        });
    }

    fn write_to_disk(&mut self, service_id: u32, d: &Dispatchable<'_>, is_segment: bool) {
        let object = d.object();
        if d.is_corrupted() && !self.config.keep_corrupted {
            return;
        }
        let OutputMode::Directory(disk) = &mut self.mode else {
            return;
        };
        let written = {
            let blob = object.blob.lock();
            disk.write(service_id, &object.filename, &blob.data)
        };
        self.actions.push(DemuxAction::Trim {
            service_id,
            keep: 1,
        });
        if is_segment && self.retention.is_enabled() {
            if let Some(path) = written {
                for (_, old) in self
                    .retention
                    .push(RetainedIn::Disk, path.to_string_lossy().into_owned())
                {
                    disk.delete(Path::new(&old));
                }
            }
        }
    }

    fn pin_for(&mut self, owner: RetainedIn) -> Option<&mut (dyn PinOutput + '_)> {
        match owner {
            RetainedIn::DefaultPin => self.default_pin.as_mut().map(|pin| &mut **pin as &mut dyn PinOutput),
            RetainedIn::TsiPin(idx) => self.tsi_outs.get_mut(idx).map(|out| &mut *out.pin as &mut dyn PinOutput),
            RetainedIn::Cache | RetainedIn::Disk => None,
        }
    }
}

impl EventSink for Dispatcher {
    fn on_event(&mut self, event: Event<'_>) {
        match event {
            Event::ServiceFound { .. } => self.first_service_seen = true,
            Event::ServiceScan => {
                if self.tune_service_id != 0 {
                    self.actions.push(DemuxAction::VerifyTune {
                        service_id: self.tune_service_id,
                    });
                }
            }
            Event::ManifestReady { service_id, object } => self.on_manifest(service_id, object),
            Event::SegmentReady { service_id, object } => self.on_segment(service_id, object),
            Event::SegmentFragment { service_id, object } => self.on_fragment(service_id, object),
            Event::FileReady { service_id, object } => self.on_file(service_id, object),
            Event::FileDelete {
                service_id,
                filename,
            } => self.on_file_delete(service_id, filename),
            Event::TimeSignal { .. } | Event::Eos => {}
        }
    }
}
