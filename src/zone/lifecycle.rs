//! The Zone Lifecycle Controller: the per-zone timer state machine
//! (§4.5, §4.5.1).

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use rand::Rng;
use tracing::{debug, trace, warn};

/// An opaque timer identifier returned by a [`Scheduler`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TimerHandle(pub u64);

/// Which of the zone's four timers a scheduled firing belongs to (§4.5).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerKind {
    Refresh,
    Retry,
    Expire,
    Flush,
    Dnssec,
}

/// A timer action: the work to run when a scheduled firing isn't cancelled
/// first.
pub type TimerAction = Box<dyn FnOnce() + Send + 'static>;

/// The event scheduler's queue implementation is out of scope (§4.5.1); this
/// is the trait surface the lifecycle controller drives it through.
pub trait Scheduler: Send + Sync {
    fn schedule_after(&self, delay: Duration, kind: TimerKind, action: TimerAction) -> TimerHandle;
    fn schedule_at(&self, at: SystemTime, kind: TimerKind, action: TimerAction) -> TimerHandle;
    fn cancel(&self, handle: TimerHandle);
}

/// The concrete, testable default [`Scheduler`], driven by `tokio::time`.
///
/// This is ambient infrastructure, not "the event scheduler's queue
/// implementation" the distilled spec calls out of scope (that would be a
/// timer wheel backing a production transport); driving the trait from
/// `tokio::time::sleep` inside a `tokio::task::spawn`ed task is the
/// idiomatic way to implement it in an async Rust codebase already built on
/// a multi-thread tokio runtime (§5).
pub struct TokioScheduler {
    next_id: AtomicU64,
    cancelled: Arc<Mutex<HashSet<u64>>>,
}

impl TokioScheduler {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            cancelled: Arc::new(Mutex::new(HashSet::new())),
        }
    }
}

impl Default for TokioScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for TokioScheduler {
    fn schedule_after(&self, delay: Duration, kind: TimerKind, action: TimerAction) -> TimerHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancelled = Arc::clone(&self.cancelled);
        tokio::task::spawn(async move {
            tokio::time::sleep(delay).await;
            if cancelled.lock().unwrap().remove(&id) {
                trace!(timer = id, ?kind, "cancelled timer fired, discarding");
                return;
            }
            trace!(timer = id, ?kind, "timer fired");
            action();
        });
        TimerHandle(id)
    }

    fn schedule_at(&self, at: SystemTime, kind: TimerKind, action: TimerAction) -> TimerHandle {
        let delay = match at.duration_since(SystemTime::now()) {
            Ok(d) => d,
            Err(_) => {
                warn!(?kind, "scheduling a timer whose target time is already past");
                Duration::ZERO
            }
        };
        self.schedule_after(delay, kind, action)
    }

    fn cancel(&self, handle: TimerHandle) {
        self.cancelled.lock().unwrap().insert(handle.0);
    }
}

/// Apply REFRESH/RETRY jitter: `interval * (100 - r) / 100`, `r` uniform in
/// `[0, jitter_pct)` (§4.5).
pub fn jittered(interval: Duration, jitter_pct: u8) -> Duration {
    let r: u64 = if jitter_pct == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..jitter_pct as u64)
    };
    let millis = interval.as_millis() as u64;
    Duration::from_millis(millis.saturating_mul(100 - r) / 100)
}

/// `EXPIRE = expire + 2 * max_conn_idle`, computed from an SOA's expire
/// field and the zone's configured `max_conn_idle` (§4.5 "schedule EXPIRE on
/// first attempt").
pub fn expire_deadline(soa_expire: Duration, max_conn_idle: Duration) -> Duration {
    soa_expire + max_conn_idle * 2
}

/// Whether `candidate` is strictly earlier than the timer currently
/// scheduled at `current`. The DNSSEC timer is only ever moved earlier,
/// never later (§4.5 "never later").
pub fn is_earlier(candidate: SystemTime, current: Option<SystemTime>) -> bool {
    match current {
        Some(current) => candidate < current,
        None => true,
    }
}

//----------- §4.5 state machine (events -> effects) ------------------------------

use authority_zonestore::ZoneContents;

use crate::zone::gateway::DnssecSigner;
use crate::zone::{XfrInState, Zone};

/// The retry/refresh interval used before any SOA has ever been published
/// for a zone (bootstrapping a freshly configured secondary, or an initial
/// DNSSEC-resign pass) — there is no SOA to read REFRESH/RETRY from yet.
const BOOTSTRAP_INTERVAL: Duration = Duration::from_secs(60);

/// What a REFRESH tick wants the caller to enqueue next (§4.5's "IDLE,
/// refresh tick" rows). Actually enqueuing a probe or transfer is network
/// I/O out of this crate's scope, same as [`Scheduler`] and `DnssecSigner`;
/// this is the pure state transition, leaving the enqueue itself to the
/// caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshEffect {
    /// No master configured: nothing to do.
    NoOp,
    /// No local contents yet: request a full transfer.
    RequestAxfr,
    /// Contents present: probe the master's SOA first.
    RequestSoaProbe,
}

/// Drive a REFRESH tick (§4.5 "IDLE, refresh tick, ..." rows). Moves
/// `xfr_in.state` to `PENDING` whenever a master is configured, arms EXPIRE
/// on the first attempt, and arms RETRY with jitter — firing RETRY drives
/// another call to this same function, which is how the "RETRY fires
/// later" rows of the table keep retrying the probe/transfer enqueue.
pub fn on_refresh_tick(zone: &Arc<Zone>, scheduler: &Arc<dyn Scheduler>, jitter_pct: u8) -> RefreshEffect {
    let mut state = zone.state.lock().unwrap();
    if state.config.master.is_none() {
        return RefreshEffect::NoOp;
    }
    let contents = zone.store.load();
    state.xfr_in = XfrInState::Pending;

    let effect = if contents.is_some() {
        RefreshEffect::RequestSoaProbe
    } else {
        RefreshEffect::RequestAxfr
    };

    if let Some(contents) = &contents {
        if state.timers.expire.is_none() {
            let deadline = expire_deadline(contents.expire(), state.config.max_conn_idle.duration());
            let z = Arc::clone(zone);
            let s = Arc::clone(scheduler);
            let handle = scheduler.schedule_after(deadline, TimerKind::Expire, Box::new(move || {
                on_expire_tick(&z, s.as_ref());
            }));
            state.timers.expire = Some(handle);
        }
    }

    let retry_interval = contents.as_deref().map(ZoneContents::retry).unwrap_or(BOOTSTRAP_INTERVAL);
    let z = Arc::clone(zone);
    let s = Arc::clone(scheduler);
    let retry_handle = scheduler.schedule_after(jittered(retry_interval, jitter_pct), TimerKind::Retry, Box::new(move || {
        on_refresh_tick(&z, &s, jitter_pct);
    }));
    if let Some(old) = state.timers.retry.replace(retry_handle) {
        scheduler.cancel(old);
    }

    effect
}

/// Arm the REFRESH timer; firing it drives [`on_refresh_tick`]. Used both
/// to start a zone's refresh cycle (from [`crate::center::Center`]) and to
/// restart it after a successful transfer.
fn arm_refresh(zone: Arc<Zone>, scheduler: Arc<dyn Scheduler>, jitter_pct: u8) {
    let interval = zone.store.load().as_deref().map(ZoneContents::refresh).unwrap_or(BOOTSTRAP_INTERVAL);
    let z = Arc::clone(&zone);
    let s = Arc::clone(&scheduler);
    let handle = scheduler.schedule_after(jittered(interval, jitter_pct), TimerKind::Refresh, Box::new(move || {
        on_refresh_tick(&z, &s, jitter_pct);
    }));
    zone.state.lock().unwrap().timers.refresh = Some(handle);
}

/// Arm the REFRESH timer for a zone with a configured master (§4.5's
/// per-zone bootstrap); a no-op if the zone has no master.
pub fn spawn_refresh_timer(zone: Arc<Zone>, scheduler: Arc<dyn Scheduler>, jitter_pct: u8) {
    if zone.state.lock().unwrap().config.master.is_none() {
        return;
    }
    arm_refresh(zone, scheduler, jitter_pct);
}

/// Drive a successful transfer apply (§4.5 "PENDING, transfer success"):
/// cancel EXPIRE and RETRY, return to `IDLE`, and reschedule REFRESH with
/// jitter. The content swap itself has already happened by the time this
/// is called (via [`crate::zone::gateway::apply_axfr`]/`apply_ixfr`
/// followed by [`crate::zone::store::ContentStore::replace`]); NOTIFY
/// fan-out to `notify_out` peers is likewise the caller's responsibility,
/// for the same out-of-scope reason as the probe/transfer enqueue above.
pub fn on_transfer_success(zone: &Arc<Zone>, scheduler: &Arc<dyn Scheduler>, jitter_pct: u8) {
    {
        let mut state = zone.state.lock().unwrap();
        if let Some(h) = state.timers.expire.take() {
            scheduler.cancel(h);
        }
        if let Some(h) = state.timers.retry.take() {
            scheduler.cancel(h);
        }
        state.xfr_in = XfrInState::Idle;
    }
    arm_refresh(Arc::clone(zone), Arc::clone(scheduler), jitter_pct);
}

/// Drive a failed transfer attempt (§4.5 "PENDING, transfer failure"): the
/// zone moves to `SCHED`, where the RETRY timer armed by [`on_refresh_tick`]
/// fires again later.
pub fn on_transfer_failure(zone: &Zone) {
    let mut state = zone.state.lock().unwrap();
    state.xfr_in = XfrInState::Sched;
}

/// Drive an EXPIRE tick (§4.5 "any, EXPIRE tick"): the zone becomes
/// answerable only with SERVFAIL until the next successful transfer.
pub fn on_expire_tick(zone: &Zone, scheduler: &dyn Scheduler) {
    zone.store.expire();
    let mut state = zone.state.lock().unwrap();
    if let Some(h) = state.timers.refresh.take() {
        scheduler.cancel(h);
    }
    if let Some(h) = state.timers.retry.take() {
        scheduler.cancel(h);
    }
    state.timers.expire = None;
    state.xfr_in = XfrInState::Idle;
    warn!(zone = %zone.name, "zone expired, contents withdrawn");
}

/// Drive a FLUSH tick (§4.5 "`flush_timer` fires every `dbsync_timeout`
/// seconds"): if the journal is non-empty and contents are published,
/// flush to the text zonefile and mark the journal clean.
pub fn on_flush_tick(zone: &Zone) {
    if zone.journal.is_empty() {
        return;
    }
    let Some(contents) = zone.store.load() else {
        return;
    };
    let mut state = zone.state.lock().unwrap();
    match crate::zone::gateway::flush_zonefile(zone, &state, &contents) {
        Ok(()) => {
            zone.journal.mark_all_clean();
            state.zonefile_serial = Some(contents.serial().get());
            state.zonefile_mtime = Some(SystemTime::now());
        }
        Err(err) => warn!(zone = %zone.name, %err, "scheduled zonefile flush failed"),
    }
}

/// Arm the periodic FLUSH timer; a no-op when `dbsync_timeout == 0` (§4.5
/// "flush immediately on every change" — handled inline by
/// [`crate::zone::gateway::apply_update`] instead of by this timer).
pub fn spawn_flush_timer(zone: Arc<Zone>, scheduler: Arc<dyn Scheduler>) {
    let (flush_immediately, interval) = {
        let state = zone.state.lock().unwrap();
        (state.config.flush_immediately(), state.config.dbsync_timeout.duration())
    };
    if flush_immediately {
        return;
    }
    arm_flush(zone, scheduler, interval);
}

fn arm_flush(zone: Arc<Zone>, scheduler: Arc<dyn Scheduler>, interval: Duration) {
    let z = Arc::clone(&zone);
    let s = Arc::clone(&scheduler);
    let handle = scheduler.schedule_after(interval, TimerKind::Flush, Box::new(move || {
        on_flush_tick(&z);
        arm_flush(z, s, interval);
    }));
    zone.state.lock().unwrap().timers.flush = Some(handle);
}

/// Drive a DNSSEC-resign tick (§4.5 "`dnssec_timer` is absolute"): re-sign
/// the whole zone and swap in the result, then record the signer's
/// requested next-refresh time for the caller to reschedule from.
pub fn on_dnssec_tick(zone: &Zone, signer: &dyn DnssecSigner) {
    let Some(contents) = zone.store.load() else {
        return;
    };
    let result = signer.sign_zone(&zone.name, &contents);
    if let Some(changeset) = result.changeset {
        let new_contents = authority_zonestore::apply(&changeset, &contents);
        zone.store.replace(new_contents, crate::zone::store::PublishKind::Update);
    }
    zone.state.lock().unwrap().dnssec_deadline = result.next_refresh_at;
}

/// Arm the DNSSEC timer for a DNSSEC-enabled zone; a no-op otherwise. Each
/// firing reschedules itself from the deadline [`on_dnssec_tick`] records,
/// per §4.5's "if the target is in the past, warn and schedule immediately"
/// ([`Scheduler::schedule_at`] already implements that fallback).
pub fn spawn_dnssec_timer(zone: Arc<Zone>, scheduler: Arc<dyn Scheduler>, signer: Arc<dyn DnssecSigner>) {
    if !zone.state.lock().unwrap().config.dnssec_enable {
        return;
    }
    arm_dnssec(zone, scheduler, signer, SystemTime::now() + BOOTSTRAP_INTERVAL);
}

fn arm_dnssec(zone: Arc<Zone>, scheduler: Arc<dyn Scheduler>, signer: Arc<dyn DnssecSigner>, at: SystemTime) {
    let z = Arc::clone(&zone);
    let s = Arc::clone(&scheduler);
    let sg = Arc::clone(&signer);
    let handle = scheduler.schedule_at(at, TimerKind::Dnssec, Box::new(move || {
        on_dnssec_tick(&z, sg.as_ref());
        let next = z
            .state
            .lock()
            .unwrap()
            .dnssec_deadline
            .take()
            .unwrap_or_else(|| SystemTime::now() + BOOTSTRAP_INTERVAL);
        arm_dnssec(z, s, sg, next);
    }));
    zone.state.lock().unwrap().timers.dnssec = Some(handle);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_never_exceeds_the_configured_interval() {
        let interval = Duration::from_secs(3600);
        for _ in 0..100 {
            let got = jittered(interval, 10);
            assert!(got <= interval);
            assert!(got >= interval * 9 / 10);
        }
    }

    #[test]
    fn zero_jitter_pct_is_a_no_op() {
        let interval = Duration::from_secs(3600);
        assert_eq!(jittered(interval, 0), interval);
    }

    #[test]
    fn expire_deadline_factors_in_twice_max_conn_idle() {
        let got = expire_deadline(Duration::from_secs(86400), Duration::from_secs(30));
        assert_eq!(got, Duration::from_secs(86400 + 60));
    }

    #[test]
    fn dnssec_timer_only_moves_earlier() {
        let now = SystemTime::now();
        let later = now + Duration::from_secs(3600);
        let earlier = now - Duration::from_secs(60);

        assert!(!is_earlier(later, Some(now)));
        assert!(is_earlier(earlier, Some(now)));
        assert!(is_earlier(now, None));
    }

    #[tokio::test]
    async fn cancelling_a_timer_before_it_fires_suppresses_the_action() {
        let scheduler = TokioScheduler::new();
        let handle = scheduler.schedule_after(Duration::from_secs(9_999), TimerKind::Refresh, Box::new(|| {}));
        scheduler.cancel(handle);
        assert!(scheduler.cancelled.lock().unwrap().contains(&handle.0));
    }

    use crate::config::{AclConfig, SerialPolicy, ZoneConfig};
    use crate::common::datetime::TimeSpan;

    fn zone_config(master: Option<std::net::SocketAddr>) -> ZoneConfig {
        ZoneConfig {
            name: "example.com.".to_string(),
            file: "example.com.zone".into(),
            serial_policy: SerialPolicy::Increment,
            dbsync_timeout: TimeSpan::from_secs(60),
            dnssec_enable: false,
            build_diffs: false,
            notify_out: vec![],
            notify_retries: 5,
            acl: AclConfig::default(),
            max_conn_idle: TimeSpan::from_secs(30),
            master,
        }
    }

    fn arc_scheduler() -> (Arc<TokioScheduler>, Arc<dyn Scheduler>) {
        let concrete = Arc::new(TokioScheduler::new());
        let dyn_handle: Arc<dyn Scheduler> = concrete.clone();
        (concrete, dyn_handle)
    }

    #[test]
    fn refresh_tick_with_no_master_is_a_no_op() {
        let zone = Arc::new(Zone::new(zone_config(None), 1024).unwrap());
        let (_concrete, scheduler) = arc_scheduler();
        assert_eq!(on_refresh_tick(&zone, &scheduler, 10), RefreshEffect::NoOp);
        assert_eq!(zone.state.lock().unwrap().xfr_in, XfrInState::Idle);
        assert!(zone.state.lock().unwrap().timers.retry.is_none());
    }

    #[tokio::test]
    async fn refresh_tick_with_master_and_no_contents_requests_axfr() {
        let master = "127.0.0.1:53".parse().unwrap();
        let zone = Arc::new(Zone::new(zone_config(Some(master)), 1024).unwrap());
        let (_concrete, scheduler) = arc_scheduler();
        assert_eq!(on_refresh_tick(&zone, &scheduler, 10), RefreshEffect::RequestAxfr);
        assert_eq!(zone.state.lock().unwrap().xfr_in, XfrInState::Pending);
        assert!(zone.state.lock().unwrap().timers.retry.is_some());
        assert!(zone.state.lock().unwrap().timers.expire.is_none());
    }

    #[test]
    fn transfer_failure_moves_to_sched() {
        let zone = Zone::new(zone_config(None), 1024).unwrap();
        on_transfer_failure(&zone);
        assert_eq!(zone.state.lock().unwrap().xfr_in, XfrInState::Sched);
    }

    #[tokio::test]
    async fn transfer_success_cancels_expire_and_retry_and_reschedules_refresh() {
        let zone = Arc::new(Zone::new(zone_config(None), 1024).unwrap());
        let (concrete, scheduler) = arc_scheduler();
        let expire_handle = scheduler.schedule_after(Duration::from_secs(9_999), TimerKind::Expire, Box::new(|| {}));
        let retry_handle = scheduler.schedule_after(Duration::from_secs(9_999), TimerKind::Retry, Box::new(|| {}));
        {
            let mut state = zone.state.lock().unwrap();
            state.timers.expire = Some(expire_handle);
            state.timers.retry = Some(retry_handle);
        }

        on_transfer_success(&zone, &scheduler, 10);

        let state = zone.state.lock().unwrap();
        assert_eq!(state.xfr_in, XfrInState::Idle);
        assert!(state.timers.expire.is_none());
        assert!(state.timers.retry.is_none());
        assert!(state.timers.refresh.is_some());
        assert!(concrete.cancelled.lock().unwrap().contains(&expire_handle.0));
        assert!(concrete.cancelled.lock().unwrap().contains(&retry_handle.0));
    }

    #[tokio::test]
    async fn expire_tick_withdraws_contents_and_returns_to_idle() {
        let zone = Zone::new(zone_config(None), 1024).unwrap();
        let scheduler = TokioScheduler::new();
        let handle = scheduler.schedule_after(Duration::from_secs(9_999), TimerKind::Refresh, Box::new(|| {}));
        zone.state.lock().unwrap().timers.refresh = Some(handle);
        zone.state.lock().unwrap().xfr_in = XfrInState::Pending;

        on_expire_tick(&zone, &scheduler);

        assert_eq!(zone.state.lock().unwrap().xfr_in, XfrInState::Idle);
        assert!(zone.store.load().is_none());
        assert!(scheduler.cancelled.lock().unwrap().contains(&handle.0));
    }

    #[test]
    fn flush_tick_is_a_no_op_on_an_empty_journal() {
        let zone = Zone::new(zone_config(None), 1024).unwrap();
        on_flush_tick(&zone);
        assert!(zone.state.lock().unwrap().zonefile_serial.is_none());
    }

    #[test]
    fn spawn_refresh_timer_is_a_no_op_without_a_master() {
        let zone = Arc::new(Zone::new(zone_config(None), 1024).unwrap());
        let (concrete, scheduler) = arc_scheduler();
        spawn_refresh_timer(Arc::clone(&zone), scheduler, 10);
        assert!(zone.state.lock().unwrap().timers.refresh.is_none());
        assert!(concrete.cancelled.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn spawn_refresh_timer_arms_refresh_with_a_master() {
        let master = "127.0.0.1:53".parse().unwrap();
        let zone = Arc::new(Zone::new(zone_config(Some(master)), 1024).unwrap());
        let (_concrete, scheduler) = arc_scheduler();
        spawn_refresh_timer(Arc::clone(&zone), scheduler, 10);
        assert!(zone.state.lock().unwrap().timers.refresh.is_some());
    }

    #[test]
    fn spawn_flush_timer_is_a_no_op_when_dbsync_timeout_is_zero() {
        let mut config = zone_config(None);
        config.dbsync_timeout = TimeSpan::from_secs(0);
        let zone = Arc::new(Zone::new(config, 1024).unwrap());
        let (_concrete, scheduler) = arc_scheduler();
        spawn_flush_timer(Arc::clone(&zone), scheduler);
        assert!(zone.state.lock().unwrap().timers.flush.is_none());
    }

    #[tokio::test]
    async fn spawn_flush_timer_arms_flush_when_dbsync_timeout_is_nonzero() {
        let zone = Arc::new(Zone::new(zone_config(None), 1024).unwrap());
        let (_concrete, scheduler) = arc_scheduler();
        spawn_flush_timer(Arc::clone(&zone), scheduler);
        assert!(zone.state.lock().unwrap().timers.flush.is_some());
    }

    #[test]
    fn spawn_dnssec_timer_is_a_no_op_when_disabled() {
        let zone = Arc::new(Zone::new(zone_config(None), 1024).unwrap());
        let (_concrete, scheduler) = arc_scheduler();
        let signer: Arc<dyn crate::zone::gateway::DnssecSigner> = Arc::new(crate::zone::gateway::NullSigner);
        spawn_dnssec_timer(Arc::clone(&zone), scheduler, signer);
        assert!(zone.state.lock().unwrap().timers.dnssec.is_none());
    }
}
