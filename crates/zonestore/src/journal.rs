//! The bounded, in-process change journal ("IXFR DB").
//!
//! The on-disk journal file format is explicitly out of scope (spec §6:
//! "opaque to this spec beyond the key/flag/payload abstraction"); what this
//! module owns is that abstraction: a bounded, ordered collection of
//! serialized changesets, addressable by `(serial_from, serial_to)`, with
//! transactional append and the BUSY/flush-and-retry recovery path.

use std::fmt;
use std::sync::Mutex;

use bytes::Bytes;

/// Per-entry flags.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EntryFlags(u8);

impl EntryFlags {
    pub const VALID: EntryFlags = EntryFlags(0b001);
    pub const DIRTY: EntryFlags = EntryFlags(0b010);
    pub const TRANS: EntryFlags = EntryFlags(0b100);

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
}

impl std::ops::BitOr for EntryFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// The 64-bit journal key: upper 32 bits `serial_to`, lower 32 bits
/// `serial_from`. Ordering is by `serial_from`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntryKey(pub u64);

impl EntryKey {
    pub fn new(serial_from: u32, serial_to: u32) -> Self {
        Self(((serial_to as u64) << 32) | serial_from as u64)
    }

    pub fn serial_from(self) -> u32 {
        (self.0 & 0xFFFF_FFFF) as u32
    }

    pub fn serial_to(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// `cmp_from(k, s) = low32(k) - s`: a total ordering suitable for a
    /// binary search keyed on `serial_from`.
    pub fn cmp_from(self, s: u32) -> i64 {
        self.serial_from() as i64 - s as i64
    }

    /// `cmp_to(k, s) = high32(k) - s`.
    pub fn cmp_to(self, s: u32) -> i64 {
        self.serial_to() as i64 - s as i64
    }
}

#[derive(Clone, Debug)]
struct Entry {
    key: EntryKey,
    payload: Bytes,
    flags: EntryFlags,
}

/// An error from a journal operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JournalError {
    /// The journal is full; the caller must flush to the zonefile and retry
    /// exactly once.
    Busy,
    /// A transaction was already open when another was requested.
    TransactionInProgress,
    /// There was no open transaction to commit or roll back.
    NoTransaction,
}

impl fmt::Display for JournalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JournalError::Busy => "the journal is full",
            JournalError::TransactionInProgress => "a journal transaction is already open",
            JournalError::NoTransaction => "no journal transaction is open",
        })
    }
}

impl std::error::Error for JournalError {}

struct JournalInner {
    entries: Vec<Entry>,
    max_bytes: u64,
    valid_bytes: u64,
    transaction_open: bool,
    retain_count: usize,
}

impl JournalInner {
    fn valid_iter(&self) -> impl Iterator<Item = &Entry> {
        self.entries
            .iter()
            .filter(|e| e.flags.contains(EntryFlags::VALID) && !e.flags.contains(EntryFlags::TRANS))
    }
}

/// A zone's bounded change journal.
pub struct Journal {
    inner: Mutex<JournalInner>,
}

impl Journal {
    pub fn new(max_bytes: u64) -> Self {
        Self {
            inner: Mutex::new(JournalInner {
                entries: Vec::new(),
                max_bytes,
                valid_bytes: 0,
                transaction_open: false,
                retain_count: 0,
            }),
        }
    }

    /// Increment the retain count. The journal is conceptually torn down
    /// only once the count returns to zero; since a `Journal`'s lifetime in
    /// this crate is already owned by its `Zone`, this purely gates the
    /// "only one transaction open" rule and lets `is_used` report truthfully.
    pub fn retain(&self) {
        self.inner.lock().unwrap().retain_count += 1;
    }

    pub fn release(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.retain_count = inner.retain_count.saturating_sub(1);
    }

    pub fn is_used(&self) -> bool {
        self.inner.lock().unwrap().retain_count > 0
    }

    pub fn trans_begin(&self) -> Result<(), JournalError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.transaction_open {
            return Err(JournalError::TransactionInProgress);
        }
        inner.transaction_open = true;
        Ok(())
    }

    /// Append a changeset payload within the open transaction.
    ///
    /// Returns [`JournalError::Busy`] once appending this entry would exceed
    /// the configured byte budget; per §4.2 the caller must then flush the
    /// journal to the zonefile and retry exactly once.
    pub fn store(&self, serial_from: u32, serial_to: u32, payload: Bytes) -> Result<(), JournalError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.transaction_open {
            return Err(JournalError::NoTransaction);
        }
        let added = payload.len() as u64;
        if inner.valid_bytes + added > inner.max_bytes {
            return Err(JournalError::Busy);
        }
        inner.valid_bytes += added;
        inner.entries.push(Entry {
            key: EntryKey::new(serial_from, serial_to),
            payload,
            flags: EntryFlags::VALID | EntryFlags::TRANS | EntryFlags::DIRTY,
        });
        Ok(())
    }

    pub fn trans_commit(&self) -> Result<(), JournalError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.transaction_open {
            return Err(JournalError::NoTransaction);
        }
        for entry in inner.entries.iter_mut() {
            entry.flags.remove(EntryFlags::TRANS);
        }
        inner.transaction_open = false;
        Ok(())
    }

    /// Roll back the currently open transaction: any entries appended since
    /// `trans_begin` are discarded.
    pub fn trans_rollback(&self) -> Result<(), JournalError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.transaction_open {
            return Err(JournalError::NoTransaction);
        }
        let removed_bytes: u64 = inner
            .entries
            .iter()
            .filter(|e| e.flags.contains(EntryFlags::TRANS))
            .map(|e| e.payload.len() as u64)
            .sum();
        inner.entries.retain(|e| !e.flags.contains(EntryFlags::TRANS));
        inner.valid_bytes -= removed_bytes;
        inner.transaction_open = false;
        Ok(())
    }

    /// Find the first committed, valid, non-transactional entry whose key
    /// compares equal to `from` under `cmp`, then return the ordered chain
    /// of payloads from there to the end of the journal.
    pub fn fetch(&self, from: u32, cmp: impl Fn(EntryKey, u32) -> i64) -> Vec<Bytes> {
        let inner = self.inner.lock().unwrap();
        let mut entries: Vec<&Entry> = inner.valid_iter().collect();
        entries.sort_by_key(|e| e.key.serial_from());
        let start = entries.iter().position(|e| cmp(e.key, from) == 0);
        match start {
            Some(i) => entries[i..].iter().map(|e| e.payload.clone()).collect(),
            None => Vec::new(),
        }
    }

    /// Apply `f` to every valid, non-transactional entry. Used by the
    /// zonefile flush to clear `DIRTY` bits after a successful dump.
    pub fn walk(&self, mut f: impl FnMut(EntryKey) -> bool) {
        let mut inner = self.inner.lock().unwrap();
        for entry in inner.entries.iter_mut() {
            if entry.flags.contains(EntryFlags::VALID) && !entry.flags.contains(EntryFlags::TRANS) {
                let keep_dirty = f(entry.key);
                if !keep_dirty {
                    entry.flags.remove(EntryFlags::DIRTY);
                }
            }
        }
    }

    pub fn mark_all_clean(&self) {
        self.walk(|_| false);
    }

    pub fn has_dirty(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner
            .entries
            .iter()
            .any(|e| e.flags.contains(EntryFlags::DIRTY) && e.flags.contains(EntryFlags::VALID))
    }

    pub fn is_empty(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.valid_iter().next().is_none()
    }
}

impl fmt::Debug for Journal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock().unwrap();
        f.debug_struct("Journal")
            .field("entry_count", &inner.entries.len())
            .field("valid_bytes", &inner.valid_bytes)
            .field("max_bytes", &inner.max_bytes)
            .finish()
    }
}
