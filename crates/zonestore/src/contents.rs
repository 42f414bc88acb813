//! Immutable zone content snapshots.

use std::time::Duration;

use domain::base::iana::Rtype;

use crate::node::{Node, NodeFlags, NodeId};
use crate::rdata::RdataItem;
use crate::serial::Serial;
use crate::util::name_parent;
use crate::StoredName;

/// An immutable snapshot of a zone's contents.
///
/// Once published via the Zone Content Store, a `ZoneContents` is never
/// mutated in place: the changeset engine and the zone loader both build a
/// *new* `ZoneContents` (usually starting from a clone of an old one) and
/// hand it to the store for an atomic swap.
#[derive(Clone, Debug)]
pub struct ZoneContents {
    apex: NodeId,
    nodes: Vec<Node>,
    nsec3_nodes: Vec<Node>,
    by_name: foldhash::HashMap<StoredName, NodeId>,
    nsec3_by_name: foldhash::HashMap<StoredName, NodeId>,

    /// Count of authoritative nodes in the apex tree, tracked incrementally
    /// so dump/reporting code doesn't need to re-scan (§9 "global
    /// node_count").
    authoritative_node_count: u32,
}

impl ZoneContents {
    /// Construct a fresh, empty content tree rooted at `apex`.
    pub fn new(apex_name: StoredName) -> Self {
        let mut node = Node::new(apex_name.clone(), NodeId::NONE, NodeFlags::AUTHORITATIVE);
        node.flags.insert(NodeFlags::AUTHORITATIVE);
        let mut by_name = foldhash::HashMap::default();
        by_name.insert(apex_name, NodeId::from_index(0));
        Self {
            apex: NodeId::from_index(0),
            nodes: vec![node],
            nsec3_nodes: Vec::new(),
            by_name,
            nsec3_by_name: foldhash::HashMap::default(),
            authoritative_node_count: 1,
        }
    }

    pub fn apex_id(&self) -> NodeId {
        self.apex
    }

    pub fn apex(&self) -> &Node {
        self.node(self.apex).expect("the apex node always exists")
    }

    pub fn apex_mut(&mut self) -> &mut Node {
        self.node_mut(self.apex).expect("the apex node always exists")
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        id.index().and_then(|i| self.nodes.get(i))
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        id.index().and_then(|i| self.nodes.get_mut(i))
    }

    pub fn nsec3_node(&self, id: NodeId) -> Option<&Node> {
        id.index().and_then(|i| self.nsec3_nodes.get(i))
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (NodeId::from_index(i), n))
    }

    pub fn nsec3_nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nsec3_nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (NodeId::from_index(i), n))
    }

    pub fn find_node(&self, name: &StoredName) -> Option<NodeId> {
        self.by_name.get(name).copied()
    }

    pub fn find_nsec3_node(&self, name: &StoredName) -> Option<NodeId> {
        self.nsec3_by_name.get(name).copied()
    }

    /// Find the closest enclosing node of `name` within this zone, i.e. the
    /// existing ancestor with the longest matching suffix. Used by the dump
    /// codec to resolve externally-sourced dnames (§4.3 "closest-encloser
    /// lookup").
    pub fn closest_encloser(&self, name: &StoredName) -> Option<NodeId> {
        let mut candidate = name.clone();
        loop {
            if let Some(id) = self.find_node(&candidate) {
                return Some(id);
            }
            if candidate.is_root() {
                return None;
            }
            candidate = name_parent(&candidate).expect("non-root name has a parent");
        }
    }

    /// Insert (or fetch) the node for `name`, creating intermediate
    /// non-authoritative ancestors as needed. Authoritative status is
    /// determined by the caller via `flags`.
    pub fn get_or_insert(&mut self, name: StoredName, flags: NodeFlags) -> NodeId {
        if let Some(id) = self.by_name.get(&name) {
            if let Some(node) = self.node_mut(*id) {
                if flags.contains(NodeFlags::AUTHORITATIVE) && !node.is_authoritative() {
                    node.flags.insert(NodeFlags::AUTHORITATIVE);
                    self.authoritative_node_count += 1;
                }
            }
            return *id;
        }

        let parent = if name == self.apex().owner {
            NodeId::NONE
        } else {
            let parent_name = name_parent(&name).expect("non-apex name has a parent");
            self.get_or_insert(parent_name, NodeFlags::empty())
        };

        let node = Node::new(name.clone(), parent, flags);
        let id = NodeId::from_index(self.nodes.len());
        self.nodes.push(node);
        self.by_name.insert(name, id);
        if flags.contains(NodeFlags::AUTHORITATIVE) {
            self.authoritative_node_count += 1;
        }
        id
    }

    pub fn insert_nsec3_node(&mut self, name: StoredName) -> NodeId {
        if let Some(id) = self.nsec3_by_name.get(&name) {
            return *id;
        }
        let node = Node::new(name.clone(), NodeId::NONE, NodeFlags::NSEC3);
        let id = NodeId::from_index(self.nsec3_nodes.len());
        self.nsec3_nodes.push(node);
        self.nsec3_by_name.insert(name, id);
        id
    }

    pub fn authoritative_node_count(&self) -> u32 {
        self.authoritative_node_count
    }

    pub fn node_count(&self) -> u32 {
        self.nodes.len() as u32
    }

    pub fn nsec3_node_count(&self) -> u32 {
        self.nsec3_nodes.len() as u32
    }

    /// The apex SOA record's serial number. Panics if the apex lacks an SOA,
    /// which the invariants in §3 say must never happen for a published
    /// snapshot.
    pub fn serial(&self) -> Serial {
        let soa = self
            .apex()
            .rrset(Rtype::SOA)
            .expect("the apex SOA RR exists in every snapshot");
        let rdata = soa.data().first().expect("an RRset is never empty");
        match rdata.items().get(2) {
            Some(RdataItem::Scalar(serial)) => Serial::new(*serial),
            _ => panic!("malformed SOA RDATA: expected serial as the third item"),
        }
    }

    /// Whether the apex carries a DNSKEY RRset (i.e. this zone is
    /// DNSSEC-secured).
    pub fn is_dnssec_secured(&self) -> bool {
        self.apex().rrset(Rtype::DNSKEY).is_some()
    }

    /// The apex SOA's REFRESH field (§4.5's "refresh tick" interval).
    pub fn refresh(&self) -> Duration {
        self.soa_timer_field(3)
    }

    /// The apex SOA's RETRY field (§4.5's "RETRY fires... with jitter").
    pub fn retry(&self) -> Duration {
        self.soa_timer_field(4)
    }

    /// The apex SOA's EXPIRE field (§4.5's `expire + 2·max_conn_idle`).
    pub fn expire(&self) -> Duration {
        self.soa_timer_field(5)
    }

    /// One of the SOA RDATA's trailing scalar fields: `2` = serial, `3` =
    /// refresh, `4` = retry, `5` = expire, `6` = minimum. Panics under the
    /// same invariant as [`ZoneContents::serial`].
    fn soa_timer_field(&self, index: usize) -> Duration {
        let soa = self
            .apex()
            .rrset(Rtype::SOA)
            .expect("the apex SOA RR exists in every snapshot");
        let rdata = soa.data().first().expect("an RRset is never empty");
        match rdata.items().get(index) {
            Some(RdataItem::Scalar(secs)) => Duration::from_secs(*secs as u64),
            _ => panic!("malformed SOA RDATA: expected a scalar timer field at index {index}"),
        }
    }
}
