//! Process-wide and per-zone configuration, loaded once at startup from a
//! TOML document via `serde` + `toml` (§2.1, §6, §6.1).

use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use bytes::Bytes;
use camino::Utf8PathBuf;
use domain::base::Name;
use serde::{Deserialize, Serialize};

use crate::common::datetime::TimeSpan;

/// How a zone's SOA serial is advanced on a change (§6).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SerialPolicy {
    #[default]
    Increment,
    Unixtime,
}

/// One NOTIFY target (§6 `notify_out`).
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct NotifyTarget {
    pub address: SocketAddr,
    #[serde(default)]
    pub tsig_key: Option<String>,
    #[serde(default)]
    pub via: Option<String>,
}

/// Allow/deny sets for XFR, UPDATE and NOTIFY (§6 `acl.*`).
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct AclConfig {
    #[serde(default)]
    pub allow_transfer: Vec<IpAddr>,
    #[serde(default)]
    pub allow_update: Vec<IpAddr>,
    #[serde(default)]
    pub allow_notify: Vec<IpAddr>,
}

impl AclConfig {
    pub fn permits_transfer(&self, addr: IpAddr) -> bool {
        self.allow_transfer.is_empty() || self.allow_transfer.contains(&addr)
    }

    pub fn permits_update(&self, addr: IpAddr) -> bool {
        self.allow_update.contains(&addr)
    }

    pub fn permits_notify(&self, addr: IpAddr) -> bool {
        self.allow_notify.contains(&addr)
    }
}

fn default_dbsync_timeout() -> TimeSpan {
    TimeSpan::from_secs(60)
}

fn default_notify_retries() -> u32 {
    5
}

fn default_max_conn_idle() -> TimeSpan {
    TimeSpan::from_secs(30)
}

/// Configuration for a single authoritative zone (§6).
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ZoneConfig {
    /// The zone's apex name, as text; parsed lazily via [`ZoneConfig::apex`]
    /// since `Name<Bytes>` has no serde impl this crate can rely on.
    pub name: String,

    /// Text zonefile path, used for the flush path (§4.5 `flush_timer`).
    pub file: Utf8PathBuf,

    #[serde(default)]
    pub serial_policy: SerialPolicy,

    #[serde(default = "default_dbsync_timeout")]
    pub dbsync_timeout: TimeSpan,

    #[serde(default)]
    pub dnssec_enable: bool,

    #[serde(default)]
    pub build_diffs: bool,

    #[serde(default)]
    pub notify_out: Vec<NotifyTarget>,

    #[serde(default = "default_notify_retries")]
    pub notify_retries: u32,

    #[serde(default)]
    pub acl: AclConfig,

    #[serde(default = "default_max_conn_idle")]
    pub max_conn_idle: TimeSpan,

    /// The zone's master, if this zone is a secondary. `None` means this
    /// zone has no upstream and the lifecycle controller's IDLE/refresh
    /// ticks are no-ops (§4.5 "refresh tick, no master").
    #[serde(default)]
    pub master: Option<SocketAddr>,
}

impl ZoneConfig {
    /// Parse [`ZoneConfig::name`] into the owned domain name type used
    /// throughout the zone store.
    pub fn apex(&self) -> Result<Name<Bytes>, domain::base::name::FromStrError> {
        Name::from_str(&self.name)
    }

    /// `dbsync_timeout == 0` means "flush immediately on every change"
    /// rather than "never" (§4.5).
    pub fn flush_immediately(&self) -> bool {
        self.dbsync_timeout.duration().is_zero()
    }
}

/// `RUST_LOG`-style verbosity (§6.1 `log_level`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warning,
    Error,
}

/// Where log output is written (§6.1 `log_target`).
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogTarget {
    File(Utf8PathBuf),
    Stdout,
    Stderr,
}

impl Default for LogTarget {
    fn default() -> Self {
        LogTarget::Stderr
    }
}

/// The logging half of the process-wide config (§2.1, §6.1).
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,
    #[serde(default)]
    pub target: LogTarget,
    /// Extra per-target `tracing` directives, e.g. `authority_core::zone=debug`.
    #[serde(default)]
    pub trace_targets: Vec<String>,
}

fn default_jitter_pct() -> u8 {
    10
}

fn default_journal_max_bytes() -> u64 {
    16 * 1024 * 1024
}

/// The process-wide configuration (§2.1, §6.1).
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Config {
    /// `JITTER_PCT` in §4.5's jitter formula: `interval * (100 - r) / 100`,
    /// `r` uniform in `[0, jitter_pct)`.
    #[serde(default = "default_jitter_pct")]
    pub jitter_pct: u8,

    /// The per-zone journal byte budget (§4.2.1).
    #[serde(default = "default_journal_max_bytes")]
    pub journal_max_bytes: u64,

    /// Base directory for persisted zone-store state (dump artifacts).
    pub zone_state_dir: Utf8PathBuf,

    /// Base directory for flushed text zonefiles.
    pub zonefile_dir: Utf8PathBuf,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub zones: Vec<ZoneConfig>,
}

impl Config {
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn load(path: &camino::Utf8Path) -> Result<Self, crate::error::Error> {
        let text = std::fs::read_to_string(path).map_err(|err| {
            crate::error::Error::permanent(
                crate::error::Code::Enoent,
                format!("reading config file {path}: {err}"),
            )
        })?;
        Self::from_toml_str(&text).map_err(|err| {
            crate::error::Error::validation(
                crate::error::Code::Malf,
                format!("parsing config file {path}: {err}"),
            )
        })
    }

    pub fn zone(&self, name: &str) -> Option<&ZoneConfig> {
        self.zones.iter().find(|z| z.name == name)
    }
}
