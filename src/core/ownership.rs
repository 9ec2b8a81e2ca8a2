// This module models the affine ownership discipline for heap-backed values. Every heap
// value produced during lowering (call result, concatenation) is given a ReclaimId minted
// by the session; the id is only a map key and is never dereferenced. The Owned handle
// wraps a fresh id and is deliberately neither Copy nor Clone, so each produced value is
// moved exactly once: into a variable slot, into a return exclusion, or left in the free
// set where the scope-exit sweep reclaims it. Ownership describes what an expression
// result carries (nothing, a fresh value, or a borrow of a variable's value). FreeSet is
// the per-scope table of pending deallocations, mapping each id to the two stack slots
// that hold the value's address and byte size. It iterates in id order so the emitted
// sweep is deterministic.

//! Reclamation-ids, owned handles and per-scope free sets.

use crate::core::scope::StackSlot;
use std::collections::BTreeMap;
use std::fmt;

/// Unique token identifying one heap allocation for at-most-once deallocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReclaimId(u32);

impl ReclaimId {
    pub(crate) const fn new(n: u32) -> Self {
        Self(n)
    }
}

impl fmt::Display for ReclaimId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A freshly produced heap value that has not been handed to an owner yet.
#[must_use = "a produced heap value must be bound, returned or left to the free set"]
#[derive(Debug, PartialEq, Eq)]
pub struct Owned {
    id: ReclaimId,
}

impl Owned {
    pub(crate) fn new(id: ReclaimId) -> Self {
        Self { id }
    }

    pub fn id(&self) -> ReclaimId {
        self.id
    }

    /// Give up the handle, transferring ownership to whoever keeps the id.
    pub fn into_id(self) -> ReclaimId {
        self.id
    }
}

/// What an expression result carries in terms of heap ownership.
#[derive(Debug, PartialEq, Eq)]
pub enum Ownership {
    /// Not heap-backed, or a pointer into static data.
    None,
    /// A fresh heap value, already registered in the producing scope's free set.
    Fresh(Owned),
    /// A read of a variable that owns the heap value under this id.
    Borrowed(ReclaimId),
}

/// Stack slots holding a pending deallocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagedEntry {
    pub address: StackSlot,
    pub size: StackSlot,
}

/// Per-scope set of pending deallocations, flushed when the scope exits.
#[derive(Debug, Default, Clone)]
pub struct FreeSet {
    entries: BTreeMap<ReclaimId, StagedEntry>,
}

impl FreeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a pending deallocation. Returns the previous entry for `id`, if any.
    pub fn stage(&mut self, id: ReclaimId, entry: StagedEntry) -> Option<StagedEntry> {
        self.entries.insert(id, entry)
    }

    pub fn remove(&mut self, id: ReclaimId) -> Option<StagedEntry> {
        self.entries.remove(&id)
    }

    /// Entries in id order.
    pub fn iter(&self) -> impl Iterator<Item = (ReclaimId, StagedEntry)> + '_ {
        self.entries.iter().map(|(id, entry)| (*id, *entry))
    }
}
