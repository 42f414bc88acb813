//! Owner-name nodes within a zone's content tree.
//!
//! The reference daemon this crate is descended from represents the content
//! tree with raw pointers and an unsafe double-buffered arena. Pointers
//! don't survive a crate boundary safely without a compiler at hand to
//! check the invariants, so nodes here live in a plain `Vec` arena and refer
//! to each other by index (a [`NodeId`]) instead of by pointer — the same
//! "parent back-link is non-owning" and "pointer serves as a unique ID"
//! properties the dump codec needs, without the `unsafe`.

use domain::base::iana::Rtype;

use crate::rrset::RRset;
use crate::StoredName;

/// An index into a [`crate::contents::ZoneContents`] node arena.
///
/// `0` is reserved as the sentinel meaning "no parent" / "no NSEC3 peer",
/// matching the dump codec's wire convention (§4.3.1); real nodes are
/// assigned IDs starting at `1`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl NodeId {
    pub const NONE: NodeId = NodeId(0);

    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    /// The arena index this ID addresses, given node `1` lives at `Vec`
    /// index `0`.
    pub fn index(self) -> Option<usize> {
        (!self.is_none()).then(|| (self.0 - 1) as usize)
    }

    pub fn from_index(index: usize) -> Self {
        Self((index + 1) as u32)
    }
}

/// Per-node flags: authoritative / glue / NSEC3.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NodeFlags(u8);

impl NodeFlags {
    pub const AUTHORITATIVE: NodeFlags = NodeFlags(0b0000_0001);
    pub const GLUE: NodeFlags = NodeFlags(0b0000_0010);
    pub const NSEC3: NodeFlags = NodeFlags(0b0000_0100);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }
}

impl std::ops::BitOr for NodeFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// A single owner name within a zone's content tree.
#[derive(Clone, Debug)]
pub struct Node {
    pub owner: StoredName,

    /// Non-owning back-link to the parent node, or [`NodeId::NONE`] for the
    /// apex.
    pub parent: NodeId,

    pub flags: NodeFlags,

    /// The paired node in the other tree (apex tree <-> NSEC3 tree), if any.
    pub nsec3_peer: NodeId,

    rrsets: foldhash::HashMap<Rtype, RRset>,
}

impl Node {
    pub fn new(owner: StoredName, parent: NodeId, flags: NodeFlags) -> Self {
        Self {
            owner,
            parent,
            flags,
            nsec3_peer: NodeId::NONE,
            rrsets: foldhash::HashMap::default(),
        }
    }

    pub fn rrset(&self, rtype: Rtype) -> Option<&RRset> {
        self.rrsets.get(&rtype)
    }

    pub fn rrset_mut(&mut self, rtype: Rtype) -> Option<&mut RRset> {
        self.rrsets.get_mut(&rtype)
    }

    pub fn insert_rrset(&mut self, rrset: RRset) -> Option<RRset> {
        self.rrsets.insert(rrset.rtype, rrset)
    }

    pub fn remove_rrset(&mut self, rtype: Rtype) -> Option<RRset> {
        self.rrsets.remove(&rtype)
    }

    pub fn rrsets(&self) -> impl Iterator<Item = &RRset> {
        self.rrsets.values()
    }

    pub fn rrset_count(&self) -> usize {
        self.rrsets.len()
    }

    pub fn is_authoritative(&self) -> bool {
        self.flags.contains(NodeFlags::AUTHORITATIVE)
    }

    pub fn is_empty(&self) -> bool {
        self.rrsets.is_empty()
    }
}
