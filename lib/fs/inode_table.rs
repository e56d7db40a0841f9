//! Inode arena with a reverse name index.
//!
//! Addresses pack a slot index into the low 32 bits and an allocation generation into the high
//! 32 bits. The generation is a table-wide counter bumped on every allocation, so addresses are
//! strictly increasing and never repeat, even though slots freed by eviction get reused. Lookups
//! by address index the slot vector directly and compare generations.
//!
//! The root lives in slot 1 with generation 0, which packs to `FUSE_ROOT_ID`. Slot 0 is never
//! occupied because address 0 is invalid in FUSE.

use std::ffi::{OsStr, OsString};

use rustc_hash::FxHashMap;
use tracing::{trace, warn};

use super::error::InodeTableError;
use super::{INodeType, InodeAddr, ROOT_ADDR};

const SLOT_BITS: u32 = 32;
const SLOT_MASK: u64 = (1 << SLOT_BITS) - 1;

/// The name the root is indexed under.
pub const ROOT_NAME: &str = ".";

#[expect(
    clippy::cast_possible_truncation,
    reason = "both halves are masked/shifted into u32 range"
)]
fn unpack(addr: InodeAddr) -> (u32, u32) {
    ((addr >> SLOT_BITS) as u32, (addr & SLOT_MASK) as u32)
}

fn pack(generation: u32, slot: u32) -> InodeAddr {
    (u64::from(generation) << SLOT_BITS) | u64::from(slot)
}

/// One live entry of the namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InodeRecord {
    /// Unique, never reused address.
    pub addr: InodeAddr,
    /// Namespace key. Unique across live records.
    pub name: OsString,
    /// Cached byte length. Stale unless refreshed from the backing store.
    pub size: u64,
    /// [`INodeType::Directory`] only for the root.
    pub itype: INodeType,
    /// Outstanding kernel lookups not yet balanced by forgets.
    pub rc: u64,
}

impl InodeRecord {
    /// Whether this record is the pinned root directory.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.addr == ROOT_ADDR
    }
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    record: Option<InodeRecord>,
}

/// Outcome of [`InodeTable::release`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Released {
    /// The record is still live with the given count.
    Retained(u64),
    /// The count reached zero and the record was evicted.
    Evicted,
    /// No live record has this address.
    Unknown,
}

/// Owns every inode record and the name → address index.
#[derive(Debug)]
pub struct InodeTable {
    slots: Vec<Slot>,
    free_slots: Vec<u32>,
    by_name: FxHashMap<OsString, InodeAddr>,
    next_generation: u32,
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl InodeTable {
    /// Create a table holding only the root directory.
    #[must_use]
    pub fn new() -> Self {
        let (root_generation, root_slot) = unpack(ROOT_ADDR);
        debug_assert_eq!(root_generation, 0, "root must sit below every allocated generation");

        let mut slots: Vec<Slot> = (0..=root_slot).map(|_| Slot::default()).collect();
        slots[root_slot as usize].record = Some(InodeRecord {
            addr: ROOT_ADDR,
            name: OsString::from(ROOT_NAME),
            size: 0,
            itype: INodeType::Directory,
            rc: 1,
        });

        let mut by_name = FxHashMap::default();
        by_name.insert(OsString::from(ROOT_NAME), ROOT_ADDR);

        Self {
            slots,
            free_slots: Vec::new(),
            by_name,
            next_generation: root_generation + 1,
        }
    }

    /// Insert a new file record named `name`.
    ///
    /// Fails with [`InodeTableError::AlreadyExists`] if the name is already indexed.
    pub fn allocate(
        &mut self,
        name: &OsStr,
        size: u64,
        rc: u64,
    ) -> Result<InodeAddr, InodeTableError> {
        if self.by_name.contains_key(name) {
            return Err(InodeTableError::AlreadyExists);
        }

        let generation = self.next_generation;
        let next_generation = generation
            .checked_add(1)
            .ok_or(InodeTableError::Exhausted)?;

        let slot = match self.free_slots.pop() {
            Some(slot) => slot,
            None => {
                let slot =
                    u32::try_from(self.slots.len()).map_err(|_| InodeTableError::Exhausted)?;
                self.slots.push(Slot::default());
                slot
            }
        };

        let addr = pack(generation, slot);
        self.next_generation = next_generation;
        self.slots[slot as usize] = Slot {
            generation,
            record: Some(InodeRecord {
                addr,
                name: name.to_owned(),
                size,
                itype: INodeType::File,
                rc,
            }),
        };
        self.by_name.insert(name.to_owned(), addr);

        trace!(addr, ?name, rc, "allocated inode");
        Ok(addr)
    }

    /// Resolve `name` and take one kernel reference on it.
    pub fn lookup(&mut self, name: &OsStr) -> Result<InodeAddr, InodeTableError> {
        let addr = self.addr_of(name).ok_or(InodeTableError::NotFound)?;
        let record = self.get_mut(addr)?;
        record.rc = record.rc.saturating_add(1);
        trace!(addr, rc = record.rc, "looked up inode");
        Ok(addr)
    }

    /// Resolve `name` without touching its reference count.
    #[must_use]
    pub fn addr_of(&self, name: &OsStr) -> Option<InodeAddr> {
        self.by_name.get(name).copied()
    }

    /// Fetch the record at `addr`.
    pub fn get(&self, addr: InodeAddr) -> Result<&InodeRecord, InodeTableError> {
        let (generation, slot) = unpack(addr);
        self.slots
            .get(slot as usize)
            .filter(|s| s.generation == generation)
            .and_then(|s| s.record.as_ref())
            .ok_or(InodeTableError::NotFound)
    }

    fn get_mut(&mut self, addr: InodeAddr) -> Result<&mut InodeRecord, InodeTableError> {
        let (generation, slot) = unpack(addr);
        self.slots
            .get_mut(slot as usize)
            .filter(|s| s.generation == generation)
            .and_then(|s| s.record.as_mut())
            .ok_or(InodeTableError::NotFound)
    }

    /// Whether `addr` names a live record.
    #[must_use]
    pub fn contains(&self, addr: InodeAddr) -> bool {
        self.get(addr).is_ok()
    }

    /// Store a freshly probed size on the record.
    pub fn set_size(&mut self, addr: InodeAddr, size: u64) -> Result<(), InodeTableError> {
        self.get_mut(addr)?.size = size;
        Ok(())
    }

    /// Drop `n` kernel references. The record is evicted once none remain, unless it is the root.
    pub fn release(&mut self, addr: InodeAddr, n: u64) -> Released {
        let Ok(record) = self.get_mut(addr) else {
            warn!(addr, n, "release on unknown inode");
            return Released::Unknown;
        };

        record.rc = record.rc.saturating_sub(n);
        if record.rc > 0 || record.is_root() {
            trace!(addr, rc = record.rc, "decremented rc");
            return Released::Retained(record.rc);
        }

        trace!(addr, "evicting inode");
        self.evict(addr);
        Released::Evicted
    }

    /// Delete the record named `name` regardless of its reference count.
    pub fn remove(&mut self, name: &OsStr) -> Result<InodeRecord, InodeTableError> {
        let addr = self.addr_of(name).ok_or(InodeTableError::NotFound)?;
        if addr == ROOT_ADDR {
            return Err(InodeTableError::RootPinned);
        }
        self.evict(addr).ok_or(InodeTableError::NotFound)
    }

    /// Re-key the record named `from` to `to`, keeping its address and count.
    pub fn rename(&mut self, from: &OsStr, to: &OsStr) -> Result<InodeAddr, InodeTableError> {
        let addr = self.addr_of(from).ok_or(InodeTableError::NotFound)?;
        if addr == ROOT_ADDR {
            return Err(InodeTableError::RootPinned);
        }
        if self.by_name.contains_key(to) {
            return Err(InodeTableError::AlreadyExists);
        }

        self.get_mut(addr)?.name = to.to_owned();
        self.by_name.remove(from);
        self.by_name.insert(to.to_owned(), addr);
        Ok(addr)
    }

    /// Number of live records, root included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    /// Always false: the root is never evicted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    fn evict(&mut self, addr: InodeAddr) -> Option<InodeRecord> {
        let (generation, slot) = unpack(addr);
        let entry = self.slots.get_mut(slot as usize)?;
        if entry.generation != generation {
            return None;
        }
        let record = entry.record.take()?;
        self.by_name.remove(&record.name);
        self.free_slots.push(slot);
        Some(record)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn root_packs_to_fuse_root_id() {
        let table = InodeTable::new();
        let root = table.get(ROOT_ADDR).unwrap();
        assert!(root.is_root());
        assert_eq!(root.itype, INodeType::Directory);
        assert_eq!(table.addr_of(OsStr::new(ROOT_NAME)), Some(ROOT_ADDR));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn slot_zero_never_resolves() {
        let table = InodeTable::new();
        assert_eq!(table.get(0), Err(InodeTableError::NotFound));
    }

    #[test]
    fn reused_slot_gets_a_greater_address() {
        let mut table = InodeTable::new();
        let first = table.allocate(OsStr::new("a"), 0, 1).unwrap();
        assert_eq!(table.release(first, 1), Released::Evicted);

        let second = table.allocate(OsStr::new("b"), 0, 1).unwrap();
        assert_eq!(unpack(first).1, unpack(second).1, "slot should be recycled");
        assert!(second > first);
        assert_eq!(table.get(first), Err(InodeTableError::NotFound));
    }

    #[test]
    fn allocated_addresses_sit_above_root() {
        let mut table = InodeTable::new();
        let addr = table.allocate(OsStr::new("a"), 0, 1).unwrap();
        assert!(addr > ROOT_ADDR);
    }

    #[test]
    fn exhausted_generation_fails_allocation() {
        let mut table = InodeTable::new();
        table.next_generation = u32::MAX;
        assert_eq!(
            table.allocate(OsStr::new("a"), 0, 1),
            Err(InodeTableError::Exhausted)
        );
        assert!(table.addr_of(OsStr::new("a")).is_none());
    }

    #[test]
    fn lookup_consults_only_the_index() {
        let mut table = InodeTable::new();
        assert_eq!(
            table.lookup(OsStr::new("unknown")),
            Err(InodeTableError::NotFound)
        );

        let addr = table.allocate(OsStr::new("known"), 0, 0).unwrap();
        assert_eq!(table.lookup(OsStr::new("known")), Ok(addr));
        assert_eq!(table.get(addr).unwrap().rc, 1);
    }
}
