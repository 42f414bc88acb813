//! The global zone table and process-wide shared state (§4.1 "`iterate()`
//! walks the global zone table").

use std::fmt;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::config::Config;
use crate::log::Logger;
use crate::manager::Update;
use crate::zone::gateway::{DnssecSigner, NullSigner};
use crate::zone::lifecycle::{self, Scheduler, TokioScheduler};
use crate::zone::{Zone, ZoneByName, ZoneByPtr, ZoneName};

/// The process's central, shared state: the global zone table, the
/// process-wide config, the logger, and the out-of-scope external
/// collaborators (§4.5.1, §4.6.1) every zone is driven through.
pub struct Center {
    zones: Mutex<foldhash::HashSet<ZoneByName>>,

    /// Zone instances whose timers have already been armed by
    /// [`Center::drive_zone`], keyed by pointer identity so a
    /// reconfiguration that drops a zone out of `zones` and installs a new
    /// `Arc<Zone>` under the same name is armed afresh rather than being
    /// mistaken for a zone already driven (§4.5).
    driven: Mutex<foldhash::HashSet<ZoneByPtr>>,

    pub config: Config,
    pub logger: &'static Logger,
    pub scheduler: Arc<dyn Scheduler>,
    pub signer: Arc<dyn DnssecSigner>,
    pub update_tx: mpsc::UnboundedSender<Update>,
}

impl Center {
    pub fn new(config: Config, logger: &'static Logger, update_tx: mpsc::UnboundedSender<Update>) -> Self {
        Self {
            zones: Mutex::new(foldhash::HashSet::default()),
            driven: Mutex::new(foldhash::HashSet::default()),
            config,
            logger,
            scheduler: Arc::new(TokioScheduler::new()),
            signer: Arc::new(NullSigner),
            update_tx,
        }
    }

    /// Build a `Zone` for every entry in [`Config::zones`], install it into
    /// the table, and arm its REFRESH/FLUSH/DNSSEC timers (§4.5). Called
    /// once at startup.
    pub fn load_zones(&self) -> Result<(), domain::base::name::FromStrError> {
        for zone_config in &self.config.zones {
            let zone = Arc::new(Zone::new(zone_config.clone(), self.config.journal_max_bytes)?);
            self.zones.lock().unwrap().insert(ZoneByName(Arc::clone(&zone)));
            self.drive_zone(zone);
        }
        Ok(())
    }

    /// Arm a zone's timers exactly once per `Arc<Zone>` instance (§4.5's
    /// per-zone bootstrap: REFRESH if a master is configured, FLUSH unless
    /// `dbsync_timeout == 0`, DNSSEC-resign if `dnssec_enable`).
    pub fn drive_zone(&self, zone: Arc<Zone>) {
        if !self.driven.lock().unwrap().insert(ZoneByPtr(Arc::clone(&zone))) {
            return;
        }
        lifecycle::spawn_refresh_timer(Arc::clone(&zone), Arc::clone(&self.scheduler), self.config.jitter_pct);
        lifecycle::spawn_flush_timer(Arc::clone(&zone), Arc::clone(&self.scheduler));
        lifecycle::spawn_dnssec_timer(zone, Arc::clone(&self.scheduler), Arc::clone(&self.signer));
    }

    /// The Zone Content Store's `lookup_zone` (§4.1).
    pub fn lookup_zone(&self, name: &ZoneName) -> Option<Arc<Zone>> {
        self.zones.lock().unwrap().get(name).map(|z| Arc::clone(&z.0))
    }

    pub fn insert_zone(&self, zone: Arc<Zone>) {
        self.zones.lock().unwrap().replace(ZoneByName(zone));
    }

    pub fn remove_zone(&self, name: &ZoneName) -> Option<Arc<Zone>> {
        self.zones.lock().unwrap().take(name).map(|z| z.0)
    }

    /// The Zone Content Store's `iterate()` (§4.1): every zone currently in
    /// the table, as retained `Arc` handles.
    pub fn iterate(&self) -> Vec<Arc<Zone>> {
        self.zones.lock().unwrap().iter().map(|z| Arc::clone(&z.0)).collect()
    }

    pub fn zone_count(&self) -> usize {
        self.zones.lock().unwrap().len()
    }
}

impl fmt::Debug for Center {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Center")
            .field("zone_count", &self.zone_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ZoneConfig;
    use std::sync::OnceLock;

    fn config(zone_names: &[&str]) -> Config {
        Config {
            jitter_pct: 10,
            journal_max_bytes: 1024,
            zone_state_dir: "/tmp/state".into(),
            zonefile_dir: "/tmp/zones".into(),
            logging: Default::default(),
            zones: zone_names
                .iter()
                .map(|name| ZoneConfig {
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
                })
                .collect(),
        }
    }

    /// `Logger::launch` installs a process-global `tracing` subscriber, so
    /// only the first call across this whole test binary may succeed.
    fn shared_logger() -> &'static Logger {
        static LOGGER: OnceLock<&'static Logger> = OnceLock::new();
        *LOGGER.get_or_init(|| Logger::launch(&Default::default()).expect("install test subscriber"))
    }

    fn center(zone_names: &[&str]) -> Center {
        let (tx, _rx) = mpsc::unbounded_channel();
        Center::new(config(zone_names), shared_logger(), tx)
    }

    // `load_zones` arms each zone's timers via `drive_zone`, which spawns
    // tokio tasks (§4.5) — these need a runtime, hence `#[tokio::test]`.

    #[tokio::test]
    async fn load_zones_populates_the_table() {
        let c = center(&["example.com.", "example.net."]);
        c.load_zones().unwrap();
        assert_eq!(c.zone_count(), 2);
        assert!(c.lookup_zone(&"example.com.".parse().unwrap()).is_some());
    }

    #[tokio::test]
    async fn remove_zone_drops_it_from_the_table() {
        let c = center(&["example.com."]);
        c.load_zones().unwrap();
        let name: ZoneName = "example.com.".parse().unwrap();
        assert!(c.remove_zone(&name).is_some());
        assert!(c.lookup_zone(&name).is_none());
    }

    #[tokio::test]
    async fn iterate_yields_every_zone() {
        let c = center(&["a.example.", "b.example."]);
        c.load_zones().unwrap();
        assert_eq!(c.iterate().len(), 2);
    }

    #[tokio::test]
    async fn drive_zone_only_arms_a_given_instance_once() {
        let c = center(&[]);
        let zone = Arc::new(
            Zone::new(
                ZoneConfig {
                    name: "example.com.".to_string(),
                    file: "example.com.zone".into(),
                    serial_policy: Default::default(),
                    dbsync_timeout: crate::common::datetime::TimeSpan::from_secs(0),
                    dnssec_enable: false,
                    build_diffs: false,
                    notify_out: vec![],
                    notify_retries: 5,
                    acl: Default::default(),
                    max_conn_idle: crate::common::datetime::TimeSpan::from_secs(30),
                    master: None,
                },
                1024,
            )
            .unwrap(),
        );
        assert!(c.driven.lock().unwrap().is_empty());
        c.drive_zone(Arc::clone(&zone));
        assert_eq!(c.driven.lock().unwrap().len(), 1);
        c.drive_zone(zone);
        assert_eq!(c.driven.lock().unwrap().len(), 1);
    }
}
