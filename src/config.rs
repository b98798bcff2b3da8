//! Session configuration.
//!
//! Every session owns an immutable `Config`; there is no process-wide
//! state. Configs come from a TOML file or are built programmatically,
//! then normalized once with [`Config::validate`].

use crate::error::{Error, Result};
use routecast_repair::RepairMode;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Broadcast source selector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SourceUrl {
    /// ATSC 3.0 service discovery (`atsc://`).
    Atsc,
    /// Generic ROUTE session on a multicast group
    /// (`route://host:port[/path]`).
    Route {
        host: IpAddr,
        port: u16,
        path: Option<String>,
    },
}

impl SourceUrl {
    /// Parse a source URL, rejecting unknown schemes and non-multicast
    /// ROUTE hosts.
    pub fn parse(url: &str) -> Result<Self> {
        if url == "atsc://" {
            return Ok(Self::Atsc);
        }
        let Some(rest) = url.strip_prefix("route://") else {
            return Err(Error::invalid_source(format!(
                "unsupported scheme in {url}"
            )));
        };
        let (addr, path) = match rest.split_once('/') {
            Some((addr, path)) => (addr, Some(path.to_string())),
            None => (rest, None),
        };
        let Some((host, port)) = addr.rsplit_once(':') else {
            return Err(Error::invalid_source(format!("missing port in {url}")));
        };
        let host: IpAddr = host
            .parse()
            .map_err(|_| Error::invalid_source(format!("bad host in {url}")))?;
        let port: u16 = port
            .parse()
            .map_err(|_| Error::invalid_source(format!("bad port in {url}")))?;
        if !host.is_multicast() {
            return Err(Error::invalid_source(format!(
                "{host} is not a multicast address"
            )));
        }
        Ok(Self::Route { host, port, path })
    }
}

impl std::fmt::Display for SourceUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Atsc => write!(f, "atsc://"),
            Self::Route { host, port, path } => {
                write!(f, "route://{host}:{port}")?;
                if let Some(path) = path {
                    write!(f, "/{path}")?;
                }
                Ok(())
            }
        }
    }
}

impl TryFrom<String> for SourceUrl {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<SourceUrl> for String {
    fn from(value: SourceUrl) -> Self {
        value.to_string()
    }
}

/// Service selection at tune-in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TuneIn {
    /// Do not tune to any service.
    None,
    /// Tune to every service found.
    All,
    /// Tune to the first service found.
    #[default]
    FirstFound,
    /// Tune to a specific service id.
    Service(u32),
}

/// Immutable session parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Broadcast source.
    pub source: SourceUrl,
    /// Multicast interface; system default when unset.
    pub interface: Option<String>,
    /// Receive buffer size in bytes, handed to the demux.
    pub buffer_size: u32,
    /// Service selection at tune-in.
    pub tune_in: TuneIn,
    /// Tune-in and data-stall timeout in milliseconds.
    pub timeout_ms: u64,
    /// Populate an HTTP cache with received files.
    pub cache: bool,
    /// Standalone mode: write received files under this directory.
    pub output_dir: Option<PathBuf>,
    /// Buffered objects kept per service in the demux after dispatch.
    pub cached_objects: usize,
    /// Forward corrupted files instead of dropping them.
    pub keep_corrupted: bool,
    /// Skip repeated files (pin mode only).
    pub skip_repeats: bool,
    /// One output pin per (service, TSI) instead of a single pin.
    pub split_tsi: bool,
    /// Throughput report interval in milliseconds; 0 disables stats.
    pub stats_ms: u64,
    /// Restrict delivery to a single TSI (debug).
    pub tsi_filter: Option<u32>,
    /// Maximum retained segments per sink; 0 keeps everything.
    pub max_segments: usize,
    /// Tolerate out-of-order packets instead of closing objects early.
    pub reorder: bool,
    /// How long to wait for out-of-order packets, in milliseconds.
    pub reorder_timeout_ms: u64,
    /// Only dispatch full segments (forced on outside cache mode).
    pub full_segments_only: bool,
    /// Repair behavior for corrupted files.
    pub repair: RepairMode,
    /// Unicast repair server for full repair mode.
    pub repair_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source: SourceUrl::Atsc,
            interface: None,
            buffer_size: 0x8_0000,
            tune_in: TuneIn::FirstFound,
            timeout_ms: 5000,
            cache: true,
            output_dir: None,
            cached_objects: 8,
            keep_corrupted: false,
            skip_repeats: true,
            split_tsi: false,
            stats_ms: 1000,
            tsi_filter: None,
            max_segments: 0,
            reorder: false,
            reorder_timeout_ms: 5000,
            full_segments_only: false,
            repair: RepairMode::default(),
            repair_url: None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&content)
            .map_err(|e| Error::invalid_config(format!("{}: {e}", path.display())))?;
        config.validate();
        Ok(config)
    }

    /// Normalize interdependent options. Idempotent; run once before
    /// the config is handed to a session.
    pub fn validate(&mut self) {
        // standalone mode wins over the cache
        if self.output_dir.is_some() {
            self.cache = false;
        }
        // progressive dispatch is only possible when populating a cache
        if !self.cache {
            self.full_segments_only = true;
        }
        // downstream consumers always need the previous object
        if self.cached_objects == 0 {
            self.cached_objects = 1;
        }
    }

    /// Tune-in / data-stall timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Out-of-order gathering timeout.
    pub fn reorder_timeout(&self) -> Duration {
        Duration::from_millis(self.reorder_timeout_ms)
    }

    /// Throughput report interval; `None` when disabled.
    pub fn stats_interval(&self) -> Option<Duration> {
        (self.stats_ms > 0).then(|| Duration::from_millis(self.stats_ms))
    }
}
