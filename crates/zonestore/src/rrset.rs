//! Resource record sets.

use bytes::Bytes;
use domain::base::{iana::Class, Rtype, Ttl};

use crate::rdata::Rdata;
use crate::StoredName;

/// An RRSIG covering an [`RRset`].
///
/// Only the fields needed to cross-validate a signature against its covered
/// RRset during a dump (§4.3's `do_checks == 2` escalation) are broken out;
/// the raw signature bytes are carried opaquely since the cryptographic
/// verification itself is out of scope here.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rrsig {
    pub type_covered: Rtype,
    pub algorithm: u8,
    pub labels: u8,
    pub original_ttl: Ttl,
    pub expiration: u32,
    pub inception: u32,
    pub key_tag: u16,
    pub signer_name: StoredName,
    pub signature: Bytes,
}

/// An owner + class + type + TTL, with an ordered, non-empty sequence of
/// RDATA records and an optional attached RRSIG.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RRset {
    pub owner: StoredName,
    pub class: Class,
    pub rtype: Rtype,
    pub ttl: Ttl,
    data: Vec<Rdata>,
    pub rrsig: Option<Rrsig>,
}

impl RRset {
    /// Construct a new RRset. Panics if `data` is empty: an RRset is by
    /// definition a non-empty set of records.
    pub fn new(owner: StoredName, class: Class, rtype: Rtype, ttl: Ttl, data: Vec<Rdata>) -> Self {
        assert!(!data.is_empty(), "an RRset must carry at least one record");
        Self {
            owner,
            class,
            rtype,
            ttl,
            data,
            rrsig: None,
        }
    }

    pub fn data(&self) -> &[Rdata] {
        &self.data
    }

    pub fn push(&mut self, rdata: Rdata) {
        self.data.push(rdata);
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Rotate the RDATA sequence by one position (DNS round-robin), treating
    /// it as the circular sequence the data model describes.
    pub fn rotate(&mut self) {
        if self.data.len() > 1 {
            self.data.rotate_left(1);
        }
    }

    pub fn owner_label_count(&self) -> u8 {
        self.owner.iter_labels().count() as u8
    }
}
