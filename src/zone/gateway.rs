//! The Request Gateway: DDNS UPDATE (§4.6), SOA-response (§4.7), and
//! transfer-in apply (§4.8) paths, plus the DNSSEC signer interface
//! (§4.6.1).

use std::time::SystemTime;

use bytes::BytesMut;
use domain::base::iana::Rcode;
use tracing::{debug, info, warn};

use authority_zonestore::{
    apply, create_from_diff, create_from_wire, deserialize, merge, serialize, Changeset,
    ChangesetError, ChangesetFlags, Changesets, JournalError, RRset, Serial, UpdateApplyError,
    UpdatePacket, ZoneContents,
};

use crate::config::SerialPolicy;
use crate::error::{Code, Error};
use crate::zone::lifecycle::is_earlier;
use crate::zone::{Zone, ZoneName};

//----------- DnssecSigner (external-collaborator interface) ----------------------

/// The outcome of a signing call: an optional changeset carrying the new or
/// updated signatures, and the next moment the signer wants to be asked
/// again (§4.6.1).
#[derive(Clone, Debug, Default)]
pub struct SignResult {
    pub changeset: Option<Changeset>,
    pub next_refresh_at: Option<SystemTime>,
}

/// The DNSSEC signer's cryptographic routines are out of scope (§1); this is
/// the call shape the gateway drives it through.
pub trait DnssecSigner: Send + Sync {
    fn sign_changeset(&self, zone: &ZoneName, contents: &ZoneContents, diff: &Changeset) -> SignResult;
    fn sign_zone(&self, zone: &ZoneName, contents: &ZoneContents) -> SignResult;
}

/// The default signer: DNSSEC disabled, never produces a resign changeset.
/// Used by every test and by any zone with `dnssec_enable = false`.
pub struct NullSigner;

impl DnssecSigner for NullSigner {
    fn sign_changeset(&self, _zone: &ZoneName, _contents: &ZoneContents, _diff: &Changeset) -> SignResult {
        SignResult::default()
    }

    fn sign_zone(&self, _zone: &ZoneName, _contents: &ZoneContents) -> SignResult {
        SignResult::default()
    }
}

//----------- serial selection ---------------------------------------------------

fn choose_serial(policy: SerialPolicy, old_serial: Serial, now: SystemTime) -> Serial {
    let candidate = match policy {
        SerialPolicy::Increment => old_serial.add(1),
        SerialPolicy::Unixtime => {
            let secs = now
                .duration_since(SystemTime::UNIX_EPOCH)
                .map(|d| d.as_secs() as u32)
                .unwrap_or(0);
            Serial::new(secs)
        }
    };
    if !candidate.is_newer_than(old_serial) {
        warn!(old = %old_serial, new = %candidate, "chosen serial is not strictly newer");
    }
    candidate
}

//----------- §4.6 DDNS UPDATE path ----------------------------------------------

/// Apply a DDNS UPDATE to `zone` (§4.6's numbered algorithm). Assumes TSIG
/// has already been verified by the caller and that the zone is held under
/// a read-side section; returns the RCODE to place in the response.
pub fn apply_update(zone: &Zone, packet: &UpdatePacket, signer: &dyn DnssecSigner) -> Rcode {
    let Some(old_contents) = zone.store.load() else {
        return Rcode::SERVFAIL;
    };

    let mut state = zone.state.lock().unwrap();

    // Step 2: choose the next serial.
    let new_serial = choose_serial(state.config.serial_policy, old_contents.serial(), SystemTime::now());

    // Step 3: apply the UPDATE to a cloned content tree.
    let update_result = match create_from_wire(packet, &old_contents, new_serial) {
        Ok(r) => r,
        Err(UpdateApplyError(rcode)) => return rcode,
    };
    if update_result.no_op {
        return Rcode::NOERROR;
    }

    let mut changeset = update_result.changeset;
    let mut new_contents = update_result.contents;

    // Step 4/5: DNSSEC re-sign, merged into the semantic changeset.
    if state.config.dnssec_enable {
        let apex_changed = apex_dnskey_or_nsec3param(&old_contents) != apex_dnskey_or_nsec3param(&new_contents);
        let sign_result = if apex_changed {
            signer.sign_zone(&zone.name, &new_contents)
        } else {
            signer.sign_changeset(&zone.name, &new_contents, &changeset)
        };

        if let Some(resign) = sign_result.changeset {
            new_contents = apply(&resign, &new_contents);
            changeset = match merge(changeset, resign) {
                Ok(merged) => merged,
                Err(_) => return Rcode::SERVFAIL,
            };
        }

        // Step 8: reschedule the DNSSEC timer, never later than it
        // already was scheduled.
        if let Some(next) = sign_result.next_refresh_at {
            if is_earlier(next, state.dnssec_deadline) {
                debug!(zone = %zone.name, "rescheduling DNSSEC timer earlier");
                state.dnssec_deadline = Some(next);
            }
        }
    }

    // Step 6: journal transaction, with flush-and-retry-once on BUSY.
    let mut buf = BytesMut::new();
    serialize(&changeset, &mut buf);
    let payload = buf.freeze();

    if zone.journal.trans_begin().is_err() {
        return Rcode::SERVFAIL;
    }

    let store_result = zone
        .journal
        .store(changeset.serial_from.get(), changeset.serial_to.get(), payload.clone());

    if let Err(JournalError::Busy) = store_result {
        if let Err(err) = flush_zonefile(zone, &state, &old_contents) {
            warn!(zone = %zone.name, %err, "journal flush-and-retry failed");
            let _ = zone.journal.trans_rollback();
            return Rcode::SERVFAIL;
        }
        zone.journal.mark_all_clean();
        state.zonefile_serial = Some(old_contents.serial().get());
        state.zonefile_mtime = Some(SystemTime::now());
        if zone
            .journal
            .store(changeset.serial_from.get(), changeset.serial_to.get(), payload)
            .is_err()
        {
            let _ = zone.journal.trans_rollback();
            return Rcode::SERVFAIL;
        }
    } else if store_result.is_err() {
        let _ = zone.journal.trans_rollback();
        return Rcode::SERVFAIL;
    }

    // Step 9: commit, then step 10: swap contents.
    if zone.journal.trans_commit().is_err() {
        return Rcode::SERVFAIL;
    }
    zone.store.replace(new_contents, crate::zone::store::PublishKind::Update);

    // Step 12: dbsync_timeout == 0 means flush on every change.
    if state.config.flush_immediately() {
        if let Some(contents) = zone.store.load() {
            if let Err(err) = flush_zonefile(zone, &state, &contents) {
                warn!(zone = %zone.name, %err, "immediate post-update flush failed");
            } else {
                zone.journal.mark_all_clean();
                state.zonefile_serial = Some(new_serial.get());
                state.zonefile_mtime = Some(SystemTime::now());
            }
        }
    }

    info!(zone = %zone.name, serial = %new_serial, "applied DDNS update");
    Rcode::NOERROR
}

/// The apex's DNSKEY/NSEC3PARAM RRsets, compared by equality to detect
/// whether a resign must cover the whole zone rather than just the
/// incoming diff (§4.6 step 4).
fn apex_dnskey_or_nsec3param(contents: &ZoneContents) -> (Option<RRset>, Option<RRset>) {
    let apex = contents.apex();
    (
        apex.rrset(domain::base::iana::Rtype::DNSKEY).cloned(),
        apex.rrset(domain::base::iana::Rtype::NSEC3PARAM).cloned(),
    )
}

/// Flush the journal to the persisted zone-dump artifact (§4.2 "used by the
/// zonefile-flush to clear DIRTY bits after a successful dump" ties the
/// journal's notion of "zonefile flush" directly to the dump codec).
pub fn flush_zonefile(
    zone: &Zone,
    state: &crate::zone::ZoneState,
    contents: &ZoneContents,
) -> Result<(), Error> {
    let target_dir = &state.config.file;
    let target_dir = target_dir.parent().unwrap_or(camino::Utf8Path::new("."));
    let final_name = state
        .config
        .file
        .file_name()
        .unwrap_or("zone.dump")
        .to_string();
    authority_zonestore::dump_zone_to_file(contents, &zone.name.to_string(), target_dir, &final_name, 1)
        .map(|_report| ())
        .map_err(Error::from)
}

//----------- §4.7 SOA-response path ----------------------------------------------

/// The outcome of matching a received SOA response against the zone's
/// in-flight probe (§4.7).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SoaResponseOutcome {
    /// The message ID didn't match the outstanding probe; silently dropped.
    Dropped,
    /// The remote serial is not newer than ours; refresh rescheduled.
    UpToDate,
    /// The remote serial is newer; a transfer should be enqueued. `true` if
    /// it should be an IXFR (a journal entry chain exists), `false` for a
    /// full AXFR.
    TransferNeeded { ixfr: bool },
}

/// Handle an inbound SOA response (§4.7).
pub fn on_soa_response(
    zone: &Zone,
    expected_msg_id: u16,
    received_msg_id: u16,
    remote_serial: Serial,
) -> SoaResponseOutcome {
    if expected_msg_id != received_msg_id {
        return SoaResponseOutcome::Dropped;
    }

    let Some(contents) = zone.store.load() else {
        // No local contents yet: always transfer, and always full since
        // there is nothing to incrementally transfer from.
        let mut state = zone.state.lock().unwrap();
        state.xfr_in = crate::zone::XfrInState::Pending;
        return SoaResponseOutcome::TransferNeeded { ixfr: false };
    };

    let local_serial = contents.serial();
    if !remote_serial.is_newer_than(local_serial) {
        return SoaResponseOutcome::UpToDate;
    }

    let mut state = zone.state.lock().unwrap();
    state.xfr_in = crate::zone::XfrInState::Pending;
    let ixfr = !zone.journal.is_empty();
    SoaResponseOutcome::TransferNeeded { ixfr }
}

//----------- §4.8 Transfer-in apply path ------------------------------------------

/// Apply an AXFR-in response: `records` forms a complete new zone image.
/// Synthesizes the changeset via [`create_from_diff`] against the previous
/// contents, falling back to an all-additions changeset when the zone had
/// no previous contents.
pub fn apply_axfr(zone: &Zone, apex: domain::base::Name<bytes::Bytes>, records: Vec<RRset>) -> Result<(ZoneContents, Changeset), Error> {
    let mut new_contents = ZoneContents::new(apex);
    for record in records {
        let id = new_contents.get_or_insert(record.owner.clone(), authority_zonestore::NodeFlags::AUTHORITATIVE);
        if let Some(node) = new_contents.node_mut(id) {
            node.insert_rrset(record);
        }
    }

    let changeset = match zone.store.load() {
        Some(old_contents) => create_from_diff(&old_contents, &new_contents)?,
        None => from_scratch_changeset(&new_contents),
    };

    Ok((new_contents, changeset))
}

/// An AXFR applied to a zone with no previous contents has no base to diff
/// against; its changeset is simply "everything is an addition" (§4.8
/// "falling back to a from-scratch diff with no base").
fn from_scratch_changeset(new_contents: &ZoneContents) -> Changeset {
    let soa = new_contents
        .apex()
        .rrset(domain::base::iana::Rtype::SOA)
        .cloned()
        .expect("a freshly loaded zone always carries an apex SOA");
    let mut additions = Vec::new();
    for (_, node) in new_contents.nodes() {
        for rrset in node.rrsets() {
            if rrset.rtype != domain::base::iana::Rtype::SOA {
                additions.push(rrset.clone());
            }
        }
    }
    Changeset {
        serial_from: new_contents.serial(),
        soa_from: soa.clone(),
        removals: Vec::new(),
        additions,
        soa_to: soa,
        serial_to: new_contents.serial(),
        flags: ChangesetFlags::EMPTY,
    }
}

/// Apply an IXFR-in response: a chain of incremental changesets, validated
/// and folded into one via repeated [`merge`], then applied to the previous
/// contents (§4.8).
pub fn apply_ixfr(base: &ZoneContents, changesets: Vec<Changeset>) -> Result<(ZoneContents, Changeset), Error> {
    let mut iter = changesets.into_iter();
    let mut folded = iter
        .next()
        .ok_or_else(|| Error::validation(Code::Malf, "empty IXFR changeset chain"))?;

    for next in iter {
        folded = merge(folded, next)?;
    }

    let new_contents = apply(&folded, base);
    Ok((new_contents, folded))
}

/// Parse a changeset chain out of its serialized wire form, in journal
/// order, validating contiguity as it goes (§3 "the journal forms a
/// chain").
pub fn decode_changeset_chain(payloads: Vec<bytes::Bytes>) -> Result<Vec<Changeset>, ChangesetError> {
    let decoded: Result<Vec<Changeset>, ChangesetError> = payloads.into_iter().map(deserialize).collect();
    let chain = Changesets(decoded?);
    chain.validate()?;
    Ok(chain.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    use authority_zonestore::{Rdata, RdataItem};
    use domain::base::iana::{Class, Rtype};
    use domain::base::Ttl;

    use crate::common::datetime::TimeSpan;
    use crate::config::{AclConfig, SerialPolicy, ZoneConfig};
    use crate::zone::Zone;

    type OwnerName = domain::base::Name<bytes::Bytes>;

    fn zone_config(name: &str, dnssec_enable: bool) -> ZoneConfig {
        ZoneConfig {
            name: name.to_string(),
            file: format!("/tmp/{name}zone").into(),
            serial_policy: SerialPolicy::Increment,
            dbsync_timeout: TimeSpan::from_secs(60),
            dnssec_enable,
            build_diffs: false,
            notify_out: vec![],
            notify_retries: 5,
            acl: AclConfig::default(),
            max_conn_idle: TimeSpan::from_secs(30),
            master: None,
        }
    }

    fn soa_rrset(owner: &OwnerName, serial: u32) -> RRset {
        let rdata = Rdata::new(vec![
            RdataItem::Dname(owner.clone()),
            RdataItem::Dname(owner.clone()),
            RdataItem::Scalar(serial),
            RdataItem::Scalar(7200),
            RdataItem::Scalar(3600),
            RdataItem::Scalar(1209600),
            RdataItem::Scalar(3600),
        ]);
        RRset::new(owner.clone(), Class::IN, Rtype::SOA, Ttl::from_secs(3600), vec![rdata])
    }

    fn zone_with_soa(name: &str, serial: u32) -> Zone {
        let zone = Zone::new(zone_config(name, false), 16 * 1024).unwrap();
        let apex = OwnerName::from_str(name).unwrap();
        let mut contents = ZoneContents::new(apex.clone());
        let apex_id = contents.apex_id();
        contents.node_mut(apex_id).unwrap().insert_rrset(soa_rrset(&apex, serial));
        zone.store.replace(contents, crate::zone::store::PublishKind::Initial);
        zone
    }

    fn www_a_update(zone_name: &str) -> UpdatePacket {
        let zone = OwnerName::from_str(zone_name).unwrap();
        let www = OwnerName::from_str(&format!("www.{zone_name}")).unwrap();
        let a_rdata = Rdata::new(vec![RdataItem::Scalar(0x0100007f)]);
        UpdatePacket {
            zone,
            prerequisites: vec![],
            updates: vec![UpdateRr {
                owner: www,
                class: Class::IN,
                rtype: Rtype::A,
                ttl: Ttl::from_secs(300),
                rdata: Some(a_rdata),
            }],
        }
    }

    #[test]
    fn apply_update_adds_an_rrset_and_bumps_the_serial() {
        let zone = zone_with_soa("example.com.", 10);
        let packet = www_a_update("example.com.");

        let rcode = apply_update(&zone, &packet, &NullSigner);
        assert_eq!(rcode, Rcode::NOERROR);

        let contents = zone.store.load().unwrap();
        assert_eq!(contents.serial(), Serial::new(11));
        assert!(!zone.journal.is_empty());
    }

    #[test]
    fn apply_update_with_no_matching_removal_is_a_no_op() {
        let zone = zone_with_soa("example.com.", 10);
        let www = OwnerName::from_str("www.example.com.").unwrap();
        let packet = UpdatePacket {
            zone: OwnerName::from_str("example.com.").unwrap(),
            prerequisites: vec![],
            updates: vec![UpdateRr {
                owner: www,
                class: Class::ANY,
                rtype: Rtype::A,
                ttl: Ttl::from_secs(0),
                rdata: None,
            }],
        };

        let rcode = apply_update(&zone, &packet, &NullSigner);
        assert_eq!(rcode, Rcode::NOERROR);

        let contents = zone.store.load().unwrap();
        assert_eq!(contents.serial(), Serial::new(10));
        assert!(zone.journal.is_empty());
    }

    #[test]
    fn apply_update_forwards_prerequisite_failure_rcode() {
        let zone = zone_with_soa("example.com.", 10);
        let www = OwnerName::from_str("www.example.com.").unwrap();
        let packet = UpdatePacket {
            zone: OwnerName::from_str("example.com.").unwrap(),
            prerequisites: vec![authority_zonestore::Prerequisite::RrsetExists { owner: www, rtype: Rtype::A }],
            updates: vec![],
        };

        let rcode = apply_update(&zone, &packet, &NullSigner);
        assert_eq!(rcode, Rcode::NXRRSET);
    }

    #[test]
    fn apply_update_servfails_on_unloaded_zone() {
        let zone = Zone::new(zone_config("example.com.", false), 16 * 1024).unwrap();
        let packet = www_a_update("example.com.");
        assert_eq!(apply_update(&zone, &packet, &NullSigner), Rcode::SERVFAIL);
    }

    #[test]
    fn on_soa_response_drops_mismatched_message_id() {
        let zone = zone_with_soa("example.com.", 10);
        let outcome = on_soa_response(&zone, 1, 2, Serial::new(11));
        assert_eq!(outcome, SoaResponseOutcome::Dropped);
    }

    #[test]
    fn on_soa_response_is_up_to_date_when_remote_is_not_newer() {
        let zone = zone_with_soa("example.com.", 10);
        let outcome = on_soa_response(&zone, 1, 1, Serial::new(10));
        assert_eq!(outcome, SoaResponseOutcome::UpToDate);
    }

    #[test]
    fn on_soa_response_wants_axfr_when_journal_is_empty() {
        let zone = zone_with_soa("example.com.", 10);
        let outcome = on_soa_response(&zone, 1, 1, Serial::new(11));
        assert_eq!(outcome, SoaResponseOutcome::TransferNeeded { ixfr: false });
    }

    #[test]
    fn on_soa_response_wants_axfr_when_store_is_empty() {
        let zone = Zone::new(zone_config("example.com.", false), 16 * 1024).unwrap();
        let outcome = on_soa_response(&zone, 1, 1, Serial::new(11));
        assert_eq!(outcome, SoaResponseOutcome::TransferNeeded { ixfr: false });
    }

    #[test]
    fn apply_axfr_with_no_prior_contents_adds_everything() {
        let zone = Zone::new(zone_config("example.com.", false), 16 * 1024).unwrap();
        let apex = OwnerName::from_str("example.com.").unwrap();
        let soa = soa_rrset(&apex, 1);

        let (new_contents, changeset) = apply_axfr(&zone, apex, vec![soa]).unwrap();
        assert_eq!(new_contents.serial(), Serial::new(1));
        assert!(changeset.removals.is_empty());
    }

    #[test]
    fn apply_axfr_against_prior_contents_diffs() {
        let zone = zone_with_soa("example.com.", 10);
        let apex = OwnerName::from_str("example.com.").unwrap();
        let soa = soa_rrset(&apex, 11);

        let (new_contents, changeset) = apply_axfr(&zone, apex, vec![soa]).unwrap();
        assert_eq!(new_contents.serial(), Serial::new(11));
        assert_eq!(changeset.serial_from, Serial::new(10));
    }

    #[test]
    fn apply_ixfr_folds_a_chain_and_applies_it() {
        let apex = OwnerName::from_str("example.com.").unwrap();
        let base = zone_with_soa("example.com.", 10);
        let base_contents = base.store.load().unwrap();

        let www = OwnerName::from_str("www.example.com.").unwrap();
        let a_rdata = Rdata::new(vec![RdataItem::Scalar(0x0100007f)]);
        let addition = RRset::new(www, Class::IN, Rtype::A, Ttl::from_secs(300), vec![a_rdata]);

        let changeset = Changeset {
            serial_from: Serial::new(10),
            soa_from: soa_rrset(&apex, 10),
            removals: vec![],
            additions: vec![addition],
            soa_to: soa_rrset(&apex, 11),
            serial_to: Serial::new(11),
            flags: ChangesetFlags::EMPTY,
        };

        let (new_contents, folded) = apply_ixfr(&base_contents, vec![changeset]).unwrap();
        assert_eq!(new_contents.serial(), Serial::new(11));
        assert_eq!(folded.serial_to, Serial::new(11));
    }

    #[test]
    fn apply_ixfr_rejects_an_empty_chain() {
        let base = zone_with_soa("example.com.", 10);
        let base_contents = base.store.load().unwrap();
        assert!(apply_ixfr(&base_contents, vec![]).is_err());
    }

    #[test]
    fn decode_changeset_chain_round_trips_and_validates() {
        let apex = OwnerName::from_str("example.com.").unwrap();
        let changeset = Changeset {
            serial_from: Serial::new(10),
            soa_from: soa_rrset(&apex, 10),
            removals: vec![],
            additions: vec![],
            soa_to: soa_rrset(&apex, 11),
            serial_to: Serial::new(11),
            flags: ChangesetFlags::EMPTY,
        };

        let mut buf = BytesMut::new();
        serialize(&changeset, &mut buf);
        let payload = buf.freeze();

        let decoded = decode_changeset_chain(vec![payload]).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].serial_to, Serial::new(11));
    }
}
