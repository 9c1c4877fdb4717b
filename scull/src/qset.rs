//! Quantum store
//!
//! A logical byte stream kept as a chain of sets. Set `i` covers the byte
//! range `[i * itemsize, (i + 1) * itemsize)` where `itemsize = quantum * qset`;
//! inside a set, slot `j` holds the block for
//! `[j * quantum, (j + 1) * quantum)` of that range.
//!
//! ```text
//!  head
//!   │
//!   ▼
//! ┌──────┐  next  ┌──────┐  next
//! │ set 0│───────▶│ set 1│───────▶ None
//! └──┬───┘        └──┬───┘
//!    │ slots         │ slots (None until first write)
//!    ▼
//! [Some(block), None, Some(block), ...]
//! ```
//!
//! Set nodes live in an arena vector and link to each other by index.
//! Everything is allocated lazily: set nodes when `follow` reaches them,
//! slot arrays and blocks on the first write that lands in them. Reading a
//! region that was never written returns no bytes.
//!
//! None of the operations lock; the owning device serialises access.

use std::fmt;

use tracing::trace;

use crate::arena::{Block, BlockArena, Reservation, SlotArray};
use crate::config::Geometry;
use crate::error::{Result, ScullError};

/// One node of the chain
#[derive(Debug)]
pub struct QSet {
    slots: Option<SlotArray>,
    next: Option<usize>,
    _node: Reservation,
}

impl QSet {
    /// The slot array, if any write has landed in this set
    #[must_use]
    pub fn slots(&self) -> Option<&SlotArray> {
        self.slots.as_ref()
    }

    /// Arena index of the next set in the chain
    #[must_use]
    pub fn next(&self) -> Option<usize> {
        self.next
    }
}

/// Position of a byte inside the two-level structure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Locus {
    set: usize,
    slot: usize,
    offset: usize,
}

impl Locus {
    fn of(pos: usize, geometry: Geometry) -> Self {
        let itemsize = geometry.itemsize();
        let rest = pos % itemsize;
        Self {
            set: pos / itemsize,
            slot: rest / geometry.quantum,
            offset: rest % geometry.quantum,
        }
    }
}

pub struct QuantumStore {
    sets: Vec<QSet>,
    head: Option<usize>,
    geometry: Geometry,
    size: usize,
    arena: BlockArena,
}

impl QuantumStore {
    #[must_use]
    pub fn new(geometry: Geometry, arena: BlockArena) -> Self {
        Self {
            sets: Vec::new(),
            head: None,
            geometry,
            size: 0,
            arena,
        }
    }

    /// Bytes stored, the high-water mark of all writes since the last trim
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    #[must_use]
    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    /// Change the sizing used for allocations from now on
    ///
    /// Sets, slot arrays and blocks allocated earlier keep their sizes.
    /// Offsets are decomposed with the new sizing, so data written before
    /// the change is generally not found at its old offsets any more.
    pub fn set_geometry(&mut self, geometry: Geometry) {
        self.geometry = geometry;
    }

    /// Number of sets in the chain
    #[must_use]
    pub fn set_count(&self) -> usize {
        self.chain().count()
    }

    /// Number of allocated blocks
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.chain()
            .filter_map(QSet::slots)
            .map(SlotArray::occupied)
            .sum()
    }

    fn chain(&self) -> impl Iterator<Item = &QSet> + '_ {
        std::iter::successors(self.head.map(|i| &self.sets[i]), |set| {
            set.next.map(|i| &self.sets[i])
        })
    }

    /// Release every set, slot array and block and reset to `defaults`
    pub fn trim(&mut self, defaults: Geometry) {
        trace!(
            sets = self.sets.len(),
            size = self.size,
            "trimming quantum store"
        );
        self.sets.clear();
        self.head = None;
        self.geometry = defaults;
        self.size = 0;
    }

    fn push_set(&mut self) -> Result<usize> {
        let node = self.arena.alloc_set_node()?;
        self.sets
            .try_reserve(1)
            .map_err(|_| ScullError::OutOfMemory)?;
        self.sets.push(QSet {
            slots: None,
            next: None,
            _node: node,
        });
        Ok(self.sets.len() - 1)
    }

    /// Return the set at chain index `n`, allocating missing sets on the way
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` if a set cannot be allocated. Sets allocated
    /// before the failure stay in the chain.
    pub fn follow(&mut self, n: usize) -> Result<&mut QSet> {
        let mut index = match self.head {
            Some(head) => head,
            None => {
                let head = self.push_set()?;
                self.head = Some(head);
                head
            }
        };
        for _ in 0..n {
            index = match self.sets[index].next {
                Some(next) => next,
                None => {
                    let next = self.push_set()?;
                    self.sets[index].next = Some(next);
                    next
                }
            };
        }
        Ok(&mut self.sets[index])
    }

    /// Read from `pos` into `buf`, never crossing a block boundary
    ///
    /// Returns 0 at or past the end of data and inside a hole.
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` if a set on the way cannot be allocated.
    pub fn read(&mut self, pos: usize, buf: &mut [u8]) -> Result<usize> {
        if pos >= self.size || buf.is_empty() {
            return Ok(0);
        }
        let count = buf.len().min(self.size - pos);
        let geometry = self.geometry;
        let locus = Locus::of(pos, geometry);

        let set = self.follow(locus.set)?;
        let Some(block) = set.slots.as_ref().and_then(|slots| slots.get(locus.slot)) else {
            trace!(pos, ?locus, "read hole");
            return Ok(0);
        };
        // A block allocated under a smaller quantum may end before `offset`
        let Some(tail) = block.as_slice().get(locus.offset..) else {
            trace!(pos, ?locus, len = block.len(), "read past short block");
            return Ok(0);
        };
        let n = count.min(geometry.quantum - locus.offset).min(tail.len());
        buf[..n].copy_from_slice(&tail[..n]);
        Ok(n)
    }

    /// Write `data` at `pos`, never crossing a block boundary
    ///
    /// Returns the number of bytes written, which is less than `data.len()`
    /// when the data reaches past the end of the block.
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` if a set, slot array or block cannot be
    /// allocated; allocations made before the failure are kept and the size
    /// is not changed. Returns `InvalidArgument` if the end position does
    /// not fit the address space.
    pub fn write(&mut self, pos: usize, data: &[u8]) -> Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        if pos.checked_add(data.len()).is_none() {
            return Err(ScullError::InvalidArgument(format!(
                "write of {} bytes at {pos} overflows",
                data.len()
            )));
        }
        let geometry = self.geometry;
        let arena = self.arena.clone();
        let locus = Locus::of(pos, geometry);

        let set = self.follow(locus.set)?;
        let slots = match &mut set.slots {
            Some(slots) => {
                slots.grow(geometry.qset)?;
                slots
            }
            empty @ None => empty.insert(arena.alloc_slots(geometry.qset)?),
        };
        let block = match slots.slot_mut(locus.slot) {
            Some(block) => {
                block.grow(geometry.quantum)?;
                block
            }
            empty @ None => empty.insert(arena.alloc_block(geometry.quantum)?),
        };

        let n = data.len().min(geometry.quantum - locus.offset);
        block.as_mut_slice()[locus.offset..locus.offset + n].copy_from_slice(&data[..n]);
        self.size = self.size.max(pos + n);
        Ok(n)
    }
}

impl fmt::Debug for QuantumStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "QuantumStore(quantum={}, qset={}, size={}, sets={})",
            self.geometry.quantum,
            self.geometry.qset,
            self.size,
            self.sets.len()
        )
    }
}
