//! Typed RDATA items.
//!
//! The DNS wire parser/serializer is out of scope for this crate; records
//! reach us already split into these typed items by an external collaborator
//! (the wire codec, or the DDNS `UpdatePacket`), and we hand equivalent items
//! back out for the wire codec to encode. What we own is the shape needed to
//! intern in-zone names, detect CNAME cycles, and round-trip through the
//! dump codec and the changeset engine.

use bytes::Bytes;

use crate::StoredName;

/// One item within an RR's RDATA.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RdataItem {
    /// A domain-name reference (e.g. the target of a CNAME, or an NS's
    /// nameserver). May or may not resolve to a node within this zone.
    Dname(StoredName),

    /// An opaque, variable-length blob (carries its own 16-bit length prefix
    /// on the wire; here it is simply its decoded bytes).
    Blob(Bytes),

    /// A fixed-width scalar (e.g. an A record's address, a priority field).
    Scalar(u32),
}

impl RdataItem {
    /// The domain name this item refers to, if it is a [`RdataItem::Dname`].
    pub fn as_dname(&self) -> Option<&StoredName> {
        match self {
            RdataItem::Dname(name) => Some(name),
            _ => None,
        }
    }
}

/// The RDATA of a single resource record: an ordered sequence of typed
/// items, per the RR-type's descriptor.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Rdata(pub Vec<RdataItem>);

impl Rdata {
    pub fn new(items: Vec<RdataItem>) -> Self {
        Self(items)
    }

    pub fn items(&self) -> &[RdataItem] {
        &self.0
    }

    /// Iterate over the domain names referenced by this RDATA (e.g. for
    /// interning during a dump, or for CNAME chain walking).
    pub fn dnames(&self) -> impl Iterator<Item = &StoredName> {
        self.0.iter().filter_map(RdataItem::as_dname)
    }
}
