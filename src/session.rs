//! Driving loop.
//!
//! The session is pumped by an external scheduler: each `process` call
//! does a bounded amount of work and returns instead of blocking, so
//! the scheduler can interleave other work. Tune-in and data-stall
//! timeouts, throughput reporting and the play/stop reference count
//! all live here.

use crate::config::{Config, TuneIn};
use crate::demux::{PumpStatus, RouteDemux};
use crate::dispatch::{DemuxAction, Dispatcher};
use std::time::{Duration, Instant};
use tracing::{error, info};

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Constructed, not yet pumped.
    Init,
    /// Waiting for the first service announcement.
    Tuning,
    /// Tuned and receiving.
    Steady,
    /// Ended normally (upstream EOS or data stall).
    Eos,
    /// Ended on a session-level failure (tune timeout, demux error).
    Failed,
}

/// What one `process` call accomplished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Nothing to do right now; call again after a short delay.
    Idle,
    /// The session ended; further calls are no-ops.
    Ended,
}

/// Pin lifecycle events fed back from downstream consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinEvent {
    /// A consumer started playing, optionally switching one stream's
    /// framing to deliver.
    Play { tsi: Option<u32> },
    /// A consumer stopped, optionally switching one stream's framing
    /// back to skip.
    Stop { tsi: Option<u32> },
}

/// One receiver session: a demux handle, a dispatcher, and the state
/// driving both. No process-wide state; dropping the session releases
/// everything it owns.
pub struct Session<D: RouteDemux> {
    demux: D,
    dispatcher: Dispatcher,
    timeout: Duration,
    stats_interval: Option<Duration>,
    state: SessionState,
    start_time: Instant,
    tune_time: Option<Instant>,
    stalled_since: Option<Instant>,
    stats_reported: u32,
    nb_playing: u32,
    initial_play_forced: bool,
}

impl<D: RouteDemux> Session<D> {
    /// Wire a demux to a dispatcher and apply the dispatcher's config
    /// to the demux (progressive dispatch, reorder, TSI filter, initial
    /// tune-in).
    pub fn new(mut demux: D, dispatcher: Dispatcher) -> Self {
        let config: &Config = dispatcher.config();
        demux.set_progressive_dispatch(!config.full_segments_only);
        demux.set_reorder(config.reorder, config.reorder_timeout());
        if let Some(tsi) = config.tsi_filter {
            demux.set_tsi_filter(Some(tsi));
        }
        demux.tune_in(config.tune_in);
        info!("Tune-in started ({})", config.source);

        let timeout = config.timeout();
        let stats_interval = config.stats_interval();
        Self {
            demux,
            dispatcher,
            timeout,
            stats_interval,
            state: SessionState::Init,
            start_time: Instant::now(),
            tune_time: None,
            stalled_since: None,
            stats_reported: 0,
            nb_playing: 1,
            initial_play_forced: true,
        }
    }

    /// Pump the demux until it runs dry, then apply timeouts and
    /// report throughput. Never blocks beyond the demux's bounded poll.
    pub fn process(&mut self) -> SessionStatus {
        if matches!(self.state, SessionState::Eos | SessionState::Failed) {
            return SessionStatus::Ended;
        }
        if self.nb_playing == 0 {
            return SessionStatus::Idle;
        }

        loop {
            match self.demux.process(&mut self.dispatcher) {
                Ok(PumpStatus::Pumped) => {
                    self.stalled_since = None;
                    self.sync_tune_state();
                    self.apply_actions();
                }
                Ok(PumpStatus::Empty) => break,
                Ok(PumpStatus::Eos) => {
                    self.finish(SessionState::Eos);
                    return SessionStatus::Ended;
                }
                Err(e) => {
                    error!("Demux failure, ending session: {e}");
                    self.finish(SessionState::Failed);
                    return SessionStatus::Ended;
                }
            }
        }
        self.sync_tune_state();
        self.apply_actions();

        if self.tune_time.is_some() {
            match self.stalled_since {
                None => self.stalled_since = Some(Instant::now()),
                Some(since) if since.elapsed() >= self.timeout => {
                    info!("No data for {} ms, ending session", since.elapsed().as_millis());
                    self.finish(SessionState::Eos);
                    return SessionStatus::Ended;
                }
                Some(_) => {}
            }
        } else if self.start_time.elapsed() >= self.timeout {
            error!(
                "No service found within {} ms, tune-in failed",
                self.start_time.elapsed().as_millis()
            );
            self.finish(SessionState::Failed);
            return SessionStatus::Ended;
        }

        self.report_stats();
        SessionStatus::Idle
    }

    /// Feed a downstream pin lifecycle event. The initial play is
    /// implicit, so the first PLAY does not double-count.
    pub fn on_pin_event(&mut self, event: PinEvent) {
        match event {
            PinEvent::Play { tsi } => {
                if !self.initial_play_forced {
                    self.nb_playing += 1;
                }
                self.initial_play_forced = false;
                if let Some(tsi) = tsi {
                    self.demux.set_stream_delivery(tsi, true);
                }
            }
            PinEvent::Stop { tsi } => {
                self.nb_playing = self.nb_playing.saturating_sub(1);
                if let Some(tsi) = tsi {
                    self.demux.set_stream_delivery(tsi, false);
                }
            }
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// True while at least one consumer is playing.
    pub fn is_playing(&self) -> bool {
        self.nb_playing > 0
    }

    /// The demux handle.
    pub fn demux(&self) -> &D {
        &self.demux
    }

    /// The dispatch router (cache-probe entry point).
    pub fn dispatcher_mut(&mut self) -> &mut Dispatcher {
        &mut self.dispatcher
    }

    /// Shared view of the dispatch router.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    fn sync_tune_state(&mut self) {
        if self.tune_time.is_some() {
            return;
        }
        if self.dispatcher.first_service_seen() {
            self.tune_time = Some(Instant::now());
            self.state = SessionState::Steady;
            info!("Tuned: first service found");
        } else {
            self.state = SessionState::Tuning;
        }
    }

    fn apply_actions(&mut self) {
        for action in self.dispatcher.take_actions() {
            match action {
                DemuxAction::Purge { service_id } => self.demux.purge_objects(service_id),
                DemuxAction::Trim { service_id, keep } => {
                    while self.demux.object_count(service_id) > keep {
                        if !self.demux.remove_first_object(service_id) {
                            break;
                        }
                    }
                }
                DemuxAction::Remove {
                    service_id,
                    filename,
                } => self.demux.remove_object_by_name(service_id, &filename),
                DemuxAction::ForceKeep {
                    service_id,
                    filename,
                } => self.demux.force_keep_object(service_id, &filename),
                DemuxAction::Retune { target } => self.demux.tune_in(target),
                DemuxAction::VerifyTune { service_id } => {
                    if !self.demux.has_service(service_id) {
                        error!(
                            "Asked to tune to service {service_id} but no such service, tuning to first one"
                        );
                        self.dispatcher.clear_tuned_service();
                        self.demux.tune_in(TuneIn::FirstFound);
                    }
                }
            }
        }
    }

    fn finish(&mut self, state: SessionState) {
        self.state = state;
        self.dispatcher.signal_eos();
    }

    fn report_stats(&mut self) {
        let Some(interval) = self.stats_interval else {
            return;
        };
        let elapsed = self.start_time.elapsed();
        if elapsed < interval * (self.stats_reported + 1) {
            return;
        }
        self.stats_reported += 1;

        let stats = self.demux.stats();
        let window = match (stats.first_packet_time, stats.last_packet_time) {
            (Some(first), Some(last)) => last.saturating_sub(first),
            _ => Duration::ZERO,
        };
        let rate_mbps = if window.as_micros() > 0 {
            (stats.bytes * 8) as f64 / window.as_micros() as f64
        } else {
            0.0
        };
        info!(
            "[{}s] {} bytes {} packets in {} ms rate {:.02} mbps",
            elapsed.as_secs(),
            stats.bytes,
            stats.packets,
            window.as_millis(),
            rate_mbps
        );
    }
}
