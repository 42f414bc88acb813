//! Zone identity and per-zone lifecycle state (§3).

use std::borrow::Borrow;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use bytes::Bytes;
use domain::base::Name;

use authority_zonestore::Journal;

use crate::config::ZoneConfig;
use crate::zone::lifecycle::TimerHandle;
use crate::zone::store::ContentStore;

pub mod gateway;
pub mod lifecycle;
pub mod store;

/// The owned domain name type this crate addresses zones by.
pub type ZoneName = Name<Bytes>;

/// `xfr_in.state` (§3, §4.5).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum XfrInState {
    #[default]
    Idle,
    Sched,
    Pending,
}

/// The handles of a zone's timers (§4.5): REFRESH, RETRY, EXPIRE, FLUSH,
/// and DNSSEC-resign.
#[derive(Default)]
pub struct TimerHandles {
    pub refresh: Option<TimerHandle>,
    pub retry: Option<TimerHandle>,
    pub expire: Option<TimerHandle>,
    pub flush: Option<TimerHandle>,
    pub dnssec: Option<TimerHandle>,
}

/// The per-zone state guarded by [`Zone::state`]'s mutex (§3, §5
/// "per-zone mutex").
pub struct ZoneState {
    pub config: ZoneConfig,
    pub xfr_in: XfrInState,
    pub timers: TimerHandles,

    /// The last serial successfully flushed to the text zonefile.
    pub zonefile_serial: Option<u32>,
    pub zonefile_mtime: Option<SystemTime>,

    /// The absolute time the DNSSEC timer is currently armed for, tracked
    /// here (rather than recovered from the opaque [`TimerHandle`]) so the
    /// Request Gateway's "never reschedule later" rule (§4.5) can compare
    /// against it without depending on a [`lifecycle::Scheduler`].
    pub dnssec_deadline: Option<SystemTime>,

    /// Set once the zone is torn down; timers are cancelled and the zone is
    /// destroyed once its refcount reaches zero (§5).
    pub discarded: bool,
}

/// An authoritative zone: an apex name, its content store, its change
/// journal, and the mutex-guarded lifecycle state that the Controller and
/// Request Gateway drive (§3).
pub struct Zone {
    pub name: ZoneName,
    pub journal: Journal,
    pub store: ContentStore,
    pub state: Mutex<ZoneState>,
}

impl Zone {
    pub fn new(config: ZoneConfig, journal_max_bytes: u64) -> Result<Self, domain::base::name::FromStrError> {
        let name = config.apex()?;
        Ok(Self {
            name,
            journal: Journal::new(journal_max_bytes),
            store: ContentStore::new(),
            state: Mutex::new(ZoneState {
                config,
                xfr_in: XfrInState::default(),
                timers: TimerHandles::default(),
                zonefile_serial: None,
                zonefile_mtime: None,
                dnssec_deadline: None,
                discarded: false,
            }),
        })
    }

    /// Cancel all of this zone's timers and mark it discarded. The zone
    /// itself is only destroyed once the last `Arc<Zone>` is dropped (§5
    /// "a zone with discarded=true and refcount=0 is destroyed").
    pub fn discard(&self, scheduler: &dyn lifecycle::Scheduler) {
        let mut state = self.state.lock().unwrap();
        if let Some(h) = state.timers.refresh.take() {
            scheduler.cancel(h);
        }
        if let Some(h) = state.timers.retry.take() {
            scheduler.cancel(h);
        }
        if let Some(h) = state.timers.expire.take() {
            scheduler.cancel(h);
        }
        if let Some(h) = state.timers.flush.take() {
            scheduler.cancel(h);
        }
        if let Some(h) = state.timers.dnssec.take() {
            scheduler.cancel(h);
        }
        state.discarded = true;
    }
}

impl fmt::Debug for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Zone").field("name", &self.name).finish_non_exhaustive()
    }
}

//----------- ZoneByName --------------------------------------------------------

/// A [`Zone`] keyed by its apex name, for the global zone table.
#[derive(Clone)]
pub struct ZoneByName(pub Arc<Zone>);

impl Borrow<ZoneName> for ZoneByName {
    fn borrow(&self) -> &ZoneName {
        &self.0.name
    }
}

impl PartialEq for ZoneByName {
    fn eq(&self, other: &Self) -> bool {
        self.0.name == other.0.name
    }
}

impl Eq for ZoneByName {}

impl PartialOrd for ZoneByName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ZoneByName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.name.cmp(&other.0.name)
    }
}

impl Hash for ZoneByName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.name.hash(state)
    }
}

impl fmt::Debug for ZoneByName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

//----------- ZoneByPtr ----------------------------------------------------------

/// A [`Zone`] keyed by its address in memory, for timer/task bookkeeping
/// that must not confuse two zones sharing a name across a reconfiguration.
#[derive(Clone)]
pub struct ZoneByPtr(pub Arc<Zone>);

impl PartialEq for ZoneByPtr {
    fn eq(&self, other: &Self) -> bool {
        Arc::as_ptr(&self.0).cast::<()>() == Arc::as_ptr(&other.0).cast::<()>()
    }
}

impl Eq for ZoneByPtr {}

impl PartialOrd for ZoneByPtr {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ZoneByPtr {
    fn cmp(&self, other: &Self) -> Ordering {
        Arc::as_ptr(&self.0).cast::<()>().cmp(&Arc::as_ptr(&other.0).cast::<()>())
    }
}

impl Hash for ZoneByPtr {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Arc::as_ptr(&self.0).cast::<()>().hash(state)
    }
}

impl fmt::Debug for ZoneByPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ZoneConfig;
    use std::collections::HashSet;

    fn zone_config(name: &str) -> ZoneConfig {
        ZoneConfig {
            name: name.to_string(),
            file: format!("{name}zone").into(),
            serial_policy: Default::default(),
            dbsync_timeout: crate::common::datetime::TimeSpan::from_secs(60),
            dnssec_enable: false,
            build_diffs: false,
            notify_out: vec![],
            notify_retries: 5,
            acl: Default::default(),
            max_conn_idle: crate::common::datetime::TimeSpan::from_secs(30),
            master: None,
        }
    }

    #[test]
    fn zone_by_name_hashes_and_compares_by_name_only() {
        let a = ZoneByName(Arc::new(Zone::new(zone_config("example.com."), 1024).unwrap()));
        let b = ZoneByName(Arc::new(Zone::new(zone_config("example.com."), 1024).unwrap()));
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn zone_by_ptr_distinguishes_same_named_zones() {
        let a = ZoneByPtr(Arc::new(Zone::new(zone_config("example.com."), 1024).unwrap()));
        let b = ZoneByPtr(Arc::new(Zone::new(zone_config("example.com."), 1024).unwrap()));
        assert_ne!(a, b);
    }

    #[test]
    fn new_zone_starts_idle_and_not_discarded() {
        let zone = Zone::new(zone_config("example.com."), 1024).unwrap();
        let state = zone.state.lock().unwrap();
        assert_eq!(state.xfr_in, XfrInState::Idle);
        assert!(!state.discarded);
    }
}
