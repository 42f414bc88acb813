//! Zone content, change journal, changeset and dump-codec storage.
//!
//! This crate holds the data-heavy half of the authoritative-zone lifecycle
//! core: the immutable zone content tree published by the Zone Content
//! Store, the bounded change journal backing incremental transfers, the
//! changeset engine that diffs/merges/(de)serializes changes, and the
//! two-pass binary zone-dump codec. It is independent of any particular
//! transport, scheduler, or signer — those are wired in by the root crate.

pub mod changeset;
pub mod contents;
pub mod dump;
pub mod journal;
pub mod node;
pub mod rdata;
pub mod rrset;
pub mod serial;
mod util;

pub use changeset::{
    apply, create_from_diff, create_from_wire, deserialize, merge, rollback, serialize, Changeset,
    ChangesetError, ChangesetFlags, Changesets, Prerequisite, UpdateApplyError, UpdatePacket,
    UpdateResult, UpdateRr,
};
pub use contents::ZoneContents;
pub use dump::{DumpError, DumpReport};
pub use journal::{Journal, JournalError};
pub use node::{Node, NodeFlags, NodeId};
pub use rdata::{Rdata, RdataItem};
pub use rrset::RRset;
pub use serial::Serial;

use bytes::Bytes;
use domain::base::Name;

/// The owned, reference-counted domain name type used throughout this crate.
pub type StoredName = Name<Bytes>;
