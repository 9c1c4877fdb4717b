//! Block arena
//!
//! Allocates what a quantum store is built from (set nodes, slot arrays
//! and data blocks) and accounts for keyed pool entries. Every allocation
//! carries a [`Reservation`] that is charged against the arena on
//! creation and returned to it on drop.
//!
//! # Accounting
//!
//! The footprint is counted in nominal units, not in exact heap bytes:
//!
//! | allocation  | units                  |
//! |-------------|------------------------|
//! | pool entry  | [`POOL_ENTRY_COST`]    |
//! | set node    | [`SET_NODE_COST`]      |
//! | slot array  | `qset * SLOT_COST`     |
//! | block       | `quantum`              |
//!
//! An arena with a limit refuses any allocation that would take the total
//! above it. Independently of the limit, the heap memory itself is reserved
//! with `try_reserve_exact`, so an allocator failure is reported as
//! `OutOfMemory` instead of aborting.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::{Result, ScullError};

/// Units charged for one set node
pub const SET_NODE_COST: usize = 64;
/// Units charged per slot of a slot array
pub const SLOT_COST: usize = 8;
/// Units charged for one keyed pool entry
pub const POOL_ENTRY_COST: usize = 128;

#[derive(Debug)]
struct Ledger {
    in_use: AtomicUsize,
    blocks: AtomicUsize,
    limit: Option<usize>,
}

impl Ledger {
    fn charge(&self, units: usize) -> Result<()> {
        let limit = self.limit;
        self.in_use
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                let next = current.checked_add(units)?;
                match limit {
                    Some(limit) if next > limit => None,
                    _ => Some(next),
                }
            })
            .map(|_| ())
            .map_err(|_| ScullError::OutOfMemory)
    }

    fn refund(&self, units: usize) {
        self.in_use.fetch_sub(units, Ordering::AcqRel);
    }
}

/// Footprint held by one live allocation
///
/// Returned to the arena when dropped.
#[derive(Debug)]
pub struct Reservation {
    ledger: Arc<Ledger>,
    units: usize,
}

impl Reservation {
    fn grow(&mut self, extra: usize) -> Result<()> {
        self.ledger.charge(extra)?;
        self.units += extra;
        Ok(())
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.ledger.refund(self.units);
    }
}

/// A data block
///
/// Its length is the quantum in effect when it was allocated, possibly
/// grown later by [`Block::grow`].
#[derive(Debug)]
pub struct Block {
    data: Vec<u8>,
    reservation: Reservation,
}

impl Block {
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Extend the block with zeroes up to `len` bytes
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` if the arena refuses the extra footprint; the
    /// block is left unchanged.
    pub fn grow(&mut self, len: usize) -> Result<()> {
        let Some(extra) = len.checked_sub(self.data.len()).filter(|&n| n > 0) else {
            return Ok(());
        };
        self.data
            .try_reserve_exact(extra)
            .map_err(|_| ScullError::OutOfMemory)?;
        self.reservation.grow(extra)?;
        self.data.resize(len, 0);
        Ok(())
    }
}

impl Drop for Block {
    fn drop(&mut self) {
        self.reservation.ledger.blocks.fetch_sub(1, Ordering::AcqRel);
    }
}

/// The slots of one set; each slot may hold a block
#[derive(Debug)]
pub struct SlotArray {
    slots: Vec<Option<Block>>,
    reservation: Reservation,
}

impl SlotArray {
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Block> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    /// # Panics
    ///
    /// Panics if `index` is not below [`SlotArray::len`].
    pub fn slot_mut(&mut self, index: usize) -> &mut Option<Block> {
        &mut self.slots[index]
    }

    /// Number of slots holding a block
    #[must_use]
    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Extend with empty slots up to `len`
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` if the extra slots cannot be accounted for or
    /// reserved; the array is left unchanged.
    pub fn grow(&mut self, len: usize) -> Result<()> {
        let Some(extra) = len.checked_sub(self.slots.len()).filter(|&n| n > 0) else {
            return Ok(());
        };
        let units = extra
            .checked_mul(SLOT_COST)
            .ok_or(ScullError::OutOfMemory)?;
        self.slots
            .try_reserve_exact(extra)
            .map_err(|_| ScullError::OutOfMemory)?;
        self.reservation.grow(units)?;
        self.slots.resize_with(len, || None);
        Ok(())
    }
}

/// Shared allocator for all devices of one registry
///
/// Clones share the same accounting.
#[derive(Debug, Clone)]
pub struct BlockArena(Arc<Ledger>);

impl BlockArena {
    #[must_use]
    pub fn new(limit: Option<usize>) -> Self {
        Self(Arc::new(Ledger {
            in_use: AtomicUsize::new(0),
            blocks: AtomicUsize::new(0),
            limit,
        }))
    }

    #[must_use]
    pub fn unlimited() -> Self {
        Self::new(None)
    }

    fn reserve(&self, units: usize) -> Result<Reservation> {
        self.0.charge(units)?;
        Ok(Reservation {
            ledger: Arc::clone(&self.0),
            units,
        })
    }

    /// Account for a new set node
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` if the limit would be exceeded.
    pub fn alloc_set_node(&self) -> Result<Reservation> {
        self.reserve(SET_NODE_COST)
    }

    /// Account for a new keyed pool entry
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` if the limit would be exceeded.
    pub fn alloc_pool_entry(&self) -> Result<Reservation> {
        self.reserve(POOL_ENTRY_COST)
    }

    /// Allocate a slot array of `qset` empty slots
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` if the limit would be exceeded or the heap
    /// refuses the memory.
    pub fn alloc_slots(&self, qset: usize) -> Result<SlotArray> {
        let units = qset.checked_mul(SLOT_COST).ok_or(ScullError::OutOfMemory)?;
        let mut slots = Vec::new();
        slots
            .try_reserve_exact(qset)
            .map_err(|_| ScullError::OutOfMemory)?;
        let reservation = self.reserve(units)?;
        slots.resize_with(qset, || None);
        Ok(SlotArray { slots, reservation })
    }

    /// Allocate a zero-filled block of `quantum` bytes
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` if the limit would be exceeded or the heap
    /// refuses the memory.
    pub fn alloc_block(&self, quantum: usize) -> Result<Block> {
        let mut data = Vec::new();
        data.try_reserve_exact(quantum)
            .map_err(|_| ScullError::OutOfMemory)?;
        let reservation = self.reserve(quantum)?;
        data.resize(quantum, 0);
        self.0.blocks.fetch_add(1, Ordering::AcqRel);
        Ok(Block { data, reservation })
    }

    /// Units currently charged
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.0.in_use.load(Ordering::Acquire)
    }

    /// Live data blocks across all devices
    #[must_use]
    pub fn blocks(&self) -> usize {
        self.0.blocks.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn limit(&self) -> Option<usize> {
        self.0.limit
    }
}

impl Default for BlockArena {
    fn default() -> Self {
        Self::unlimited()
    }
}
