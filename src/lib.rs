//! Routecast - repair, retention and dispatch for ROUTE broadcast objects
//!
//! A ROUTE (ATSC 3.0 / DVB) demultiplexer turns a one-to-many UDP
//! broadcast into delivered objects: manifests, media segments, plain
//! files. This crate is everything that happens next. Received objects
//! pass a repair gate that patches transport losses in place, then get
//! routed to an HTTP cache, per-service output pins, or a directory,
//! while carousel loops are detected and stale objects are trimmed.
//!
//! # Modules
//!
//! - `config` - Session parameters (source, timeouts, repair mode, ...)
//! - `demux` - Black-box interface to the external ROUTE demultiplexer
//! - `object` - The `Received -> Dispatchable` repair gate
//! - `dispatch` - Per-object routing to cache, pins or disk
//! - `tracker` - Carousel-loop detection and segment retention
//! - `session` - The cooperative driving loop
//!
//! # Architecture
//!
//! The wire protocol is out of scope: an implementation of
//! [`demux::RouteDemux`] owns sockets, FEC and object assembly, and
//! feeds lifecycle events into the [`dispatch::Dispatcher`]. The
//! [`session::Session`] pumps that demux cooperatively, never blocking
//! past a bounded poll, and applies the dispatcher's queued demux
//! commands between pump steps. Repair happens strictly before an
//! object's buffer can be shared downstream; the two-phase types in
//! `object` make that ordering a compile-time property.

pub mod config;
pub mod demux;
pub mod dispatch;
pub mod error;
pub mod object;
pub mod session;
pub mod tracker;

pub use config::{Config, SourceUrl, TuneIn};
pub use dispatch::Dispatcher;
pub use error::{Error, Result};
pub use session::{PinEvent, Session, SessionState, SessionStatus};
