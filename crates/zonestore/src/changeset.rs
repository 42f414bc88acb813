//! The changeset engine: diffing, merging, (de)serializing, applying and
//! rolling back changes to a zone's contents.

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use domain::base::iana::{Class, Rcode, Rtype};
use domain::base::Ttl;

use crate::node::NodeFlags;
use crate::rdata::{Rdata, RdataItem};
use crate::rrset::RRset;
use crate::serial::Serial;
use crate::{StoredName, ZoneContents};

//----------- Changeset --------------------------------------------------------

/// Changeset-level flags.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChangesetFlags(u32);

impl ChangesetFlags {
    pub const EMPTY: ChangesetFlags = ChangesetFlags(0);
    /// This changeset is (or includes) a DNSSEC re-signing delta.
    pub const DNSSEC_RESIGN: ChangesetFlags = ChangesetFlags(0b01);

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }
}

impl std::ops::BitOr for ChangesetFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// `(serial_from, soa_from, removals[], additions[], soa_to, serial_to, flags)`.
#[derive(Clone, Debug, PartialEq)]
pub struct Changeset {
    pub serial_from: Serial,
    pub soa_from: RRset,
    pub removals: Vec<RRset>,
    pub additions: Vec<RRset>,
    pub soa_to: RRset,
    pub serial_to: Serial,
    pub flags: ChangesetFlags,
}

impl Changeset {
    pub fn is_empty(&self) -> bool {
        self.removals.is_empty() && self.additions.is_empty()
    }
}

/// An ordered envelope of changesets, forming a chain:
/// `chs[i].serial_to == chs[i+1].serial_from`.
#[derive(Clone, Debug, Default)]
pub struct Changesets(pub Vec<Changeset>);

impl Changesets {
    pub fn validate(&self) -> Result<(), ChangesetError> {
        for pair in self.0.windows(2) {
            if pair[0].serial_to.get() != pair[1].serial_from.get() {
                return Err(ChangesetError::ChainMismatch);
            }
        }
        Ok(())
    }
}

//----------- Errors -------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChangesetError {
    /// `create_from_diff`: the old and new serials are equal.
    NoDiff,
    /// `create_from_diff`: the new serial is not strictly greater.
    Range,
    /// `merge`: the two changesets are not contiguous.
    ChainMismatch,
    /// A malformed changeset was encountered while deserializing.
    Malformed(String),
}

impl fmt::Display for ChangesetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangesetError::NoDiff => f.write_str("old and new serials are equal"),
            ChangesetError::Range => f.write_str("new serial is not strictly greater than the old one"),
            ChangesetError::ChainMismatch => {
                f.write_str("changesets are not contiguous in serial")
            }
            ChangesetError::Malformed(reason) => write!(f, "malformed changeset: {reason}"),
        }
    }
}

impl std::error::Error for ChangesetError {}

//----------- create_from_diff --------------------------------------------------

/// Synthesize a changeset representing the delta between two full content
/// snapshots, e.g. after a text zonefile reload.
pub fn create_from_diff(old: &ZoneContents, new: &ZoneContents) -> Result<Changeset, ChangesetError> {
    let old_serial = old.serial();
    let new_serial = new.serial();

    if old_serial.get() == new_serial.get() {
        return Err(ChangesetError::NoDiff);
    }
    if !new_serial.is_newer_than(old_serial) {
        return Err(ChangesetError::Range);
    }

    let soa_from = old
        .apex()
        .rrset(Rtype::SOA)
        .cloned()
        .expect("every snapshot carries an apex SOA");
    let soa_to = new
        .apex()
        .rrset(Rtype::SOA)
        .cloned()
        .expect("every snapshot carries an apex SOA");

    let mut removals = Vec::new();
    let mut additions = Vec::new();

    for (_, old_node) in old.nodes() {
        for old_rrset in old_node.rrsets() {
            if old_rrset.rtype == Rtype::SOA {
                continue;
            }
            let still_present = new
                .find_node(&old_node.owner)
                .and_then(|id| new.node(id))
                .and_then(|n| n.rrset(old_rrset.rtype))
                .is_some_and(|new_rrset| new_rrset.data() == old_rrset.data());
            if !still_present {
                removals.push(old_rrset.clone());
            }
        }
    }

    for (_, new_node) in new.nodes() {
        for new_rrset in new_node.rrsets() {
            if new_rrset.rtype == Rtype::SOA {
                continue;
            }
            let already_present = old
                .find_node(&new_node.owner)
                .and_then(|id| old.node(id))
                .and_then(|n| n.rrset(new_rrset.rtype))
                .is_some_and(|old_rrset| old_rrset.data() == new_rrset.data());
            if !already_present {
                additions.push(new_rrset.clone());
            }
        }
    }

    Ok(Changeset {
        serial_from: old_serial,
        soa_from,
        removals,
        additions,
        soa_to,
        serial_to: new_serial,
        flags: ChangesetFlags::EMPTY,
    })
}

//----------- merge ---------------------------------------------------------------

/// Merge the DNSSEC resign changeset `b` into the semantic changeset `a`.
/// Requires `a.serial_to == b.serial_from`.
pub fn merge(mut a: Changeset, b: Changeset) -> Result<Changeset, ChangesetError> {
    if a.serial_to.get() != b.serial_from.get() {
        return Err(ChangesetError::ChainMismatch);
    }
    a.removals.extend(b.removals);
    a.additions.extend(b.additions);
    a.soa_to = b.soa_to;
    a.serial_to = b.serial_to;
    a.flags = a.flags | b.flags;
    Ok(a)
}

//----------- apply / rollback -----------------------------------------------------

/// Apply `changeset` to a clone of `contents`, returning the new snapshot.
pub fn apply(changeset: &Changeset, contents: &ZoneContents) -> ZoneContents {
    let mut new_contents = contents.clone();
    for rrset in &changeset.removals {
        if let Some(id) = new_contents.find_node(&rrset.owner) {
            if let Some(node) = new_contents.node_mut(id) {
                node.remove_rrset(rrset.rtype);
            }
        }
    }
    for rrset in &changeset.additions {
        let id = new_contents.get_or_insert(rrset.owner.clone(), NodeFlags::AUTHORITATIVE);
        if let Some(node) = new_contents.node_mut(id) {
            node.insert_rrset(rrset.clone());
        }
    }
    let apex_id = new_contents.apex_id();
    if let Some(apex) = new_contents.node_mut(apex_id) {
        apex.insert_rrset(changeset.soa_to.clone());
    }
    new_contents
}

/// Undo `changeset` against `contents`: the inverse of [`apply`], used when a
/// journal-committed change must be rolled back together with the content
/// update that hadn't yet become visible (§4.6 step 11).
pub fn rollback(changeset: &Changeset, contents: &ZoneContents) -> ZoneContents {
    let mut old_contents = contents.clone();
    for rrset in &changeset.additions {
        if let Some(id) = old_contents.find_node(&rrset.owner) {
            if let Some(node) = old_contents.node_mut(id) {
                node.remove_rrset(rrset.rtype);
            }
        }
    }
    for rrset in &changeset.removals {
        let id = old_contents.get_or_insert(rrset.owner.clone(), NodeFlags::AUTHORITATIVE);
        if let Some(node) = old_contents.node_mut(id) {
            node.insert_rrset(rrset.clone());
        }
    }
    let apex_id = old_contents.apex_id();
    if let Some(apex) = old_contents.node_mut(apex_id) {
        apex.insert_rrset(changeset.soa_from.clone());
    }
    old_contents
}

//----------- serialize / deserialize -----------------------------------------------

/// `flags:u32 | soa_from | [remove RRs...] | soa_to | [add RRs...]`.
///
/// Section boundaries are identified structurally: the deserializer expects
/// an SOA record where an RR is expected (the first SOA separates REMOVE
/// from ADD, the second terminates the changeset).
pub fn serialize(changeset: &Changeset, buf: &mut BytesMut) {
    buf.put_u32(changeset.flags.bits());
    write_rrset(buf, &changeset.soa_from);
    for rrset in &changeset.removals {
        write_rrset(buf, rrset);
    }
    write_rrset(buf, &changeset.soa_to);
    for rrset in &changeset.additions {
        write_rrset(buf, rrset);
    }
}

pub fn deserialize(mut buf: Bytes) -> Result<Changeset, ChangesetError> {
    if buf.remaining() < 4 {
        return Err(ChangesetError::Malformed("truncated flags".into()));
    }
    let flags = ChangesetFlags::from_bits(buf.get_u32());

    let soa_from = read_rrset(&mut buf)?;
    if soa_from.rtype != Rtype::SOA {
        return Err(ChangesetError::Malformed("expected leading SOA".into()));
    }

    let mut removals = Vec::new();
    let soa_to;
    loop {
        let rrset = read_rrset(&mut buf)?;
        if rrset.rtype == Rtype::SOA {
            soa_to = rrset;
            break;
        }
        removals.push(rrset);
    }

    let mut additions = Vec::new();
    while buf.has_remaining() {
        let rrset = read_rrset(&mut buf)?;
        if rrset.rtype == Rtype::SOA {
            break;
        }
        additions.push(rrset);
    }

    let serial_from = soa_serial(&soa_from)?;
    let serial_to = soa_serial(&soa_to)?;

    Ok(Changeset {
        serial_from,
        soa_from,
        removals,
        additions,
        soa_to,
        serial_to,
        flags,
    })
}

fn soa_serial(soa: &RRset) -> Result<Serial, ChangesetError> {
    let rdata = soa
        .data()
        .first()
        .ok_or_else(|| ChangesetError::Malformed("empty SOA rdata".into()))?;
    match rdata.items().get(2) {
        Some(RdataItem::Scalar(serial)) => Ok(Serial::new(*serial)),
        _ => Err(ChangesetError::Malformed("SOA missing serial".into())),
    }
}

fn write_rrset(buf: &mut BytesMut, rrset: &RRset) {
    let owner = rrset.owner.as_slice();
    buf.put_u16(owner.len() as u16);
    buf.put_slice(owner);
    buf.put_u16(u16::from(rrset.class.to_int()));
    buf.put_u16(rrset.rtype.to_int());
    buf.put_u32(rrset.ttl.as_secs());
    buf.put_u16(rrset.len() as u16);
    for rdata in rrset.data() {
        write_rdata(buf, rdata);
    }
}

fn write_rdata(buf: &mut BytesMut, rdata: &Rdata) {
    buf.put_u16(rdata.items().len() as u16);
    for item in rdata.items() {
        match item {
            RdataItem::Dname(name) => {
                buf.put_u8(0);
                let octets = name.as_slice();
                buf.put_u16(octets.len() as u16);
                buf.put_slice(octets);
            }
            RdataItem::Blob(bytes) => {
                buf.put_u8(1);
                buf.put_u16(bytes.len() as u16);
                buf.put_slice(bytes);
            }
            RdataItem::Scalar(v) => {
                buf.put_u8(2);
                buf.put_u32(*v);
            }
        }
    }
}

fn read_rrset(buf: &mut Bytes) -> Result<RRset, ChangesetError> {
    if buf.remaining() < 2 {
        return Err(ChangesetError::Malformed("truncated owner length".into()));
    }
    let owner_len = buf.get_u16() as usize;
    if buf.remaining() < owner_len {
        return Err(ChangesetError::Malformed("truncated owner".into()));
    }
    let owner_bytes = buf.copy_to_bytes(owner_len);
    let owner = StoredName::from_octets(owner_bytes)
        .map_err(|_| ChangesetError::Malformed("invalid owner name".into()))?;

    if buf.remaining() < 10 {
        return Err(ChangesetError::Malformed("truncated rrset header".into()));
    }
    let class = Class::from_int(buf.get_u16());
    let rtype = Rtype::from_int(buf.get_u16());
    let ttl = Ttl::from_secs(buf.get_u32());
    let rdata_count = buf.get_u16();

    let mut data = Vec::with_capacity(rdata_count as usize);
    for _ in 0..rdata_count {
        data.push(read_rdata(buf)?);
    }
    if data.is_empty() {
        return Err(ChangesetError::Malformed("rrset with no rdata".into()));
    }

    Ok(RRset::new(owner, class, rtype, ttl, data))
}

fn read_rdata(buf: &mut Bytes) -> Result<Rdata, ChangesetError> {
    if buf.remaining() < 2 {
        return Err(ChangesetError::Malformed("truncated rdata item count".into()));
    }
    let item_count = buf.get_u16();
    let mut items = Vec::with_capacity(item_count as usize);
    for _ in 0..item_count {
        if buf.remaining() < 1 {
            return Err(ChangesetError::Malformed("truncated rdata tag".into()));
        }
        let tag = buf.get_u8();
        match tag {
            0 => {
                let len = buf.get_u16() as usize;
                let bytes = buf.copy_to_bytes(len);
                let name = StoredName::from_octets(bytes)
                    .map_err(|_| ChangesetError::Malformed("invalid rdata dname".into()))?;
                items.push(RdataItem::Dname(name));
            }
            1 => {
                let len = buf.get_u16() as usize;
                items.push(RdataItem::Blob(buf.copy_to_bytes(len)));
            }
            2 => {
                items.push(RdataItem::Scalar(buf.get_u32()));
            }
            other => return Err(ChangesetError::Malformed(format!("unknown rdata tag {other}"))),
        }
    }
    Ok(Rdata::new(items))
}

//----------- UpdatePacket (RFC 2136 DDNS) -------------------------------------------

/// A pre-parsed DDNS update, handed to [`create_from_wire`] by the caller
/// (the DNS wire parser itself is out of scope).
#[derive(Clone, Debug)]
pub struct UpdatePacket {
    pub zone: StoredName,
    pub prerequisites: Vec<Prerequisite>,
    pub updates: Vec<UpdateRr>,
}

/// An RFC 2136 §3.2 prerequisite.
#[derive(Clone, Debug)]
pub enum Prerequisite {
    /// ANY class, ANY type, empty RDATA, TTL 0: an RRset must exist.
    RrsetExists { owner: StoredName, rtype: Rtype },
    /// NONE class, ANY type, empty RDATA, TTL 0: an RRset must not exist.
    RrsetNotExists { owner: StoredName, rtype: Rtype },
    /// ANY class, ANY type, ANY RDATA at owner, empty RDATA, TTL 0: the name
    /// must be in use by at least one RRset.
    NameInUse { owner: StoredName },
    /// NONE class, ANY type, empty RDATA, TTL 0: the name must not be in
    /// use by any RRset.
    NameNotInUse { owner: StoredName },
    /// A specific RRset (class = zone class) must exist with exactly this
    /// data.
    RrsetExistsWithData(RRset),
}

/// One update record within a DDNS UPDATE's Update Section (RFC 2136 §3.4).
#[derive(Clone, Debug)]
pub struct UpdateRr {
    pub owner: StoredName,
    pub class: Class,
    pub rtype: Rtype,
    pub ttl: Ttl,
    /// `None` means "delete", consistent with RFC 2136's empty-RDATA
    /// convention; `Some` carries the record to add.
    pub rdata: Option<Rdata>,
}

/// The outcome of applying a DDNS update, prior to the DNSSEC and journal
/// steps that the Request Gateway layers on top.
pub struct UpdateResult {
    pub contents: ZoneContents,
    pub changeset: Changeset,
    /// Whether the update turned out to be a no-op (e.g. deleting an RRset
    /// that didn't exist): the gateway should return `NOERROR` without
    /// proceeding to DNSSEC/journal steps.
    pub no_op: bool,
}

/// An update that failed either a prerequisite check or a consistency rule,
/// carrying the negative RCODE the gateway must return.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UpdateApplyError(pub Rcode);

impl fmt::Display for UpdateApplyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "update rejected with rcode {:?}", self.0)
    }
}

impl std::error::Error for UpdateApplyError {}

/// Apply a DDNS update to a clone of `old_contents`, producing a new
/// snapshot and its changeset. `new_serial` has already been chosen by the
/// caller per the configured `serial_policy` (§4.6 step 2).
pub fn create_from_wire(
    packet: &UpdatePacket,
    old_contents: &ZoneContents,
    new_serial: Serial,
) -> Result<UpdateResult, UpdateApplyError> {
    check_prerequisites(packet, old_contents)?;

    let mut contents = old_contents.clone();
    let mut removals = Vec::new();
    let mut additions = Vec::new();

    for rr in &packet.updates {
        apply_one_update(&mut contents, rr, &mut removals, &mut additions)?;
    }

    let no_op = removals.is_empty() && additions.is_empty();

    let soa_from = old_contents
        .apex()
        .rrset(Rtype::SOA)
        .cloned()
        .expect("every snapshot carries an apex SOA");

    if no_op {
        return Ok(UpdateResult {
            contents: old_contents.clone(),
            changeset: Changeset {
                serial_from: old_contents.serial(),
                soa_from: soa_from.clone(),
                removals,
                additions,
                soa_to: soa_from,
                serial_to: old_contents.serial(),
                flags: ChangesetFlags::EMPTY,
            },
            no_op: true,
        });
    }

    let soa_to = build_next_soa(&soa_from, new_serial);
    let apex_id = contents.apex_id();
    if let Some(apex) = contents.node_mut(apex_id) {
        apex.insert_rrset(soa_to.clone());
    }

    let changeset = Changeset {
        serial_from: old_contents.serial(),
        soa_from,
        removals,
        additions,
        soa_to,
        serial_to: new_serial,
        flags: ChangesetFlags::EMPTY,
    };

    Ok(UpdateResult {
        contents,
        changeset,
        no_op: false,
    })
}

fn build_next_soa(soa_from: &RRset, new_serial: Serial) -> RRset {
    let mut rdata = soa_from
        .data()
        .first()
        .cloned()
        .expect("SOA rrset is never empty");
    if let Some(slot) = rdata.0.get_mut(2) {
        *slot = RdataItem::Scalar(new_serial.get());
    }
    RRset::new(
        soa_from.owner.clone(),
        soa_from.class,
        Rtype::SOA,
        soa_from.ttl,
        vec![rdata],
    )
}

fn check_prerequisites(
    packet: &UpdatePacket,
    contents: &ZoneContents,
) -> Result<(), UpdateApplyError> {
    for prereq in &packet.prerequisites {
        let satisfied = match prereq {
            Prerequisite::RrsetExists { owner, rtype } => contents
                .find_node(owner)
                .and_then(|id| contents.node(id))
                .and_then(|n| n.rrset(*rtype))
                .is_some(),
            Prerequisite::RrsetNotExists { owner, rtype } => !contents
                .find_node(owner)
                .and_then(|id| contents.node(id))
                .and_then(|n| n.rrset(*rtype))
                .is_some(),
            Prerequisite::NameInUse { owner } => contents
                .find_node(owner)
                .and_then(|id| contents.node(id))
                .is_some_and(|n| !n.is_empty()),
            Prerequisite::NameNotInUse { owner } => !contents
                .find_node(owner)
                .and_then(|id| contents.node(id))
                .is_some_and(|n| !n.is_empty()),
            Prerequisite::RrsetExistsWithData(want) => contents
                .find_node(&want.owner)
                .and_then(|id| contents.node(id))
                .and_then(|n| n.rrset(want.rtype))
                .is_some_and(|have| have.data() == want.data()),
        };

        let failure_code = match prereq {
            Prerequisite::RrsetExists { .. }
            | Prerequisite::NameInUse { .. }
            | Prerequisite::RrsetExistsWithData(_) => Rcode::NXRRSET,
            Prerequisite::RrsetNotExists { .. } | Prerequisite::NameNotInUse { .. } => {
                Rcode::YXRRSET
            }
        };

        if !satisfied {
            return Err(UpdateApplyError(failure_code));
        }
    }
    Ok(())
}

fn apply_one_update(
    contents: &mut ZoneContents,
    rr: &UpdateRr,
    removals: &mut Vec<RRset>,
    additions: &mut Vec<RRset>,
) -> Result<(), UpdateApplyError> {
    match (rr.class, &rr.rdata) {
        // Class ANY + empty RDATA: delete an RRset (or, with type ANY, all
        // RRsets at the owner).
        (Class::ANY, None) => {
            let Some(id) = contents.find_node(&rr.owner) else {
                return Ok(());
            };
            if rr.rtype == Rtype::ANY {
                if let Some(node) = contents.node_mut(id) {
                    let types: Vec<Rtype> = node.rrsets().map(|r| r.rtype).collect();
                    for rtype in types {
                        if rtype == Rtype::SOA {
                            continue;
                        }
                        if let Some(removed) = node.remove_rrset(rtype) {
                            removals.push(removed);
                        }
                    }
                }
            } else if let Some(node) = contents.node_mut(id) {
                if let Some(removed) = node.remove_rrset(rr.rtype) {
                    removals.push(removed);
                }
            }
            Ok(())
        }

        // Class NONE: delete one specific RR from an RRset.
        (Class::NONE, Some(rdata)) => {
            let Some(id) = contents.find_node(&rr.owner) else {
                return Ok(());
            };
            if let Some(node) = contents.node_mut(id) {
                if let Some(existing) = node.rrset_mut(rr.rtype) {
                    if let Some(pos) = existing.data().iter().position(|d| d == rdata) {
                        let mut removed_rrset = RRset::new(
                            existing.owner.clone(),
                            existing.class,
                            existing.rtype,
                            existing.ttl,
                            vec![rdata.clone()],
                        );
                        removed_rrset.rrsig = None;
                        removals.push(removed_rrset);

                        if existing.len() == 1 {
                            node.remove_rrset(rr.rtype);
                        } else {
                            // Rebuild without the removed position.
                            let remaining: Vec<Rdata> = existing
                                .data()
                                .iter()
                                .enumerate()
                                .filter(|(i, _)| *i != pos)
                                .map(|(_, d)| d.clone())
                                .collect();
                            let rebuilt = RRset::new(
                                existing.owner.clone(),
                                existing.class,
                                existing.rtype,
                                existing.ttl,
                                remaining,
                            );
                            node.insert_rrset(rebuilt);
                        }
                    }
                }
            }
            Ok(())
        }

        (Class::NONE, None) | (Class::ANY, Some(_)) => Err(UpdateApplyError(Rcode::FORMERR)),

        // Any other class with RDATA: add the record (RFC 2136 §3.4.2).
        (class, Some(rdata)) => {
            let id = contents.get_or_insert(rr.owner.clone(), NodeFlags::AUTHORITATIVE);
            let node = contents
                .node_mut(id)
                .expect("get_or_insert always returns a valid id");

            let already_present = node
                .rrset(rr.rtype)
                .is_some_and(|existing| existing.data().contains(rdata));

            if !already_present {
                match node.rrset_mut(rr.rtype) {
                    Some(existing) => {
                        existing.push(rdata.clone());
                    }
                    None => {
                        node.insert_rrset(RRset::new(
                            rr.owner.clone(),
                            class,
                            rr.rtype,
                            rr.ttl,
                            vec![rdata.clone()],
                        ));
                    }
                }
                let added = node
                    .rrset(rr.rtype)
                    .cloned()
                    .expect("just inserted or updated");
                let mut single = added.clone();
                // Record the addition as containing just this one RR, to
                // keep the changeset minimal; callers that want the full
                // resulting RRset can re-read it from `contents`.
                if single.len() > 1 {
                    single = RRset::new(
                        added.owner.clone(),
                        added.class,
                        added.rtype,
                        added.ttl,
                        vec![rdata.clone()],
                    );
                }
                additions.push(single);
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeFlags;
    use std::str::FromStr;

    fn apex() -> StoredName {
        StoredName::from_str("example.com.").unwrap()
    }

    fn soa_rrset(owner: &StoredName, serial: u32) -> RRset {
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

    fn contents_with_serial(serial: u32) -> ZoneContents {
        let name = apex();
        let mut contents = ZoneContents::new(name.clone());
        let apex_id = contents.apex_id();
        contents.node_mut(apex_id).unwrap().insert_rrset(soa_rrset(&name, serial));
        contents
    }

    #[test]
    fn create_from_diff_rejects_equal_serials() {
        let a = contents_with_serial(5);
        let b = contents_with_serial(5);
        assert_eq!(create_from_diff(&a, &b), Err(ChangesetError::NoDiff));
    }

    #[test]
    fn create_from_diff_rejects_non_increasing_serials() {
        let a = contents_with_serial(5);
        let b = contents_with_serial(3);
        assert_eq!(create_from_diff(&a, &b), Err(ChangesetError::Range));
    }

    #[test]
    fn roundtrip_serialize_deserialize() {
        let name = apex();
        let soa_from = soa_rrset(&name, 1);
        let soa_to = soa_rrset(&name, 2);

        let www = StoredName::from_str("www.example.com.").unwrap();
        let a_rdata = Rdata::new(vec![RdataItem::Scalar(0x0100007f)]);
        let addition = RRset::new(www.clone(), Class::IN, Rtype::A, Ttl::from_secs(300), vec![a_rdata]);

        let changeset = Changeset {
            serial_from: Serial::new(1),
            soa_from,
            removals: vec![],
            additions: vec![addition],
            soa_to,
            serial_to: Serial::new(2),
            flags: ChangesetFlags::EMPTY,
        };

        let mut buf = BytesMut::new();
        serialize(&changeset, &mut buf);
        let restored = deserialize(buf.freeze()).unwrap();

        assert_eq!(restored.serial_from, changeset.serial_from);
        assert_eq!(restored.serial_to, changeset.serial_to);
        assert_eq!(restored.additions.len(), 1);
        assert_eq!(restored.additions[0].owner, www);
    }

    #[test]
    fn merge_requires_contiguous_serials() {
        let name = apex();
        let a = Changeset {
            serial_from: Serial::new(1),
            soa_from: soa_rrset(&name, 1),
            removals: vec![],
            additions: vec![],
            soa_to: soa_rrset(&name, 2),
            serial_to: Serial::new(2),
            flags: ChangesetFlags::EMPTY,
        };
        let b = Changeset {
            serial_from: Serial::new(3),
            soa_from: soa_rrset(&name, 3),
            removals: vec![],
            additions: vec![],
            soa_to: soa_rrset(&name, 4),
            serial_to: Serial::new(4),
            flags: ChangesetFlags::EMPTY,
        };
        assert_eq!(merge(a, b), Err(ChangesetError::ChainMismatch));
    }

    #[test]
    fn delete_rrset_update_is_a_no_op_when_absent() {
        let contents = contents_with_serial(1);
        let www = StoredName::from_str("www.example.com.").unwrap();
        let packet = UpdatePacket {
            zone: apex(),
            prerequisites: vec![],
            updates: vec![UpdateRr {
                owner: www,
                class: Class::ANY,
                rtype: Rtype::A,
                ttl: Ttl::from_secs(0),
                rdata: None,
            }],
        };
        let result = create_from_wire(&packet, &contents, Serial::new(2)).unwrap();
        assert!(result.no_op);
    }

    #[test]
    fn add_rr_to_new_owner() {
        let contents = contents_with_serial(1);
        let www = StoredName::from_str("www.example.com.").unwrap();
        let packet = UpdatePacket {
            zone: apex(),
            prerequisites: vec![],
            updates: vec![UpdateRr {
                owner: www.clone(),
                class: Class::IN,
                rtype: Rtype::A,
                ttl: Ttl::from_secs(300),
                rdata: Some(Rdata::new(vec![RdataItem::Scalar(0x0100007f)])),
            }],
        };
        let result = create_from_wire(&packet, &contents, Serial::new(2)).unwrap();
        assert!(!result.no_op);
        assert_eq!(result.changeset.serial_to, Serial::new(2));
        let id = result.contents.find_node(&www).unwrap();
        assert!(result.contents.node(id).unwrap().rrset(Rtype::A).is_some());
    }
}
