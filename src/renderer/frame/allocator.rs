//! Linear Frame Allocator
//!
//! A fixed-capacity byte arena for one frame's recorded data. Allocation is a
//! cursor bump; the whole arena is released at once by [`FrameAllocator::reset`].
//!
//! Allocations are addressed by [`ArenaSpan`] (offset + length) rather than
//! by reference, so recorded opcodes can hold them without borrowing the
//! arena, and the arena can be reset while the frame object is reused.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ cmd buf │ upload bytes ░│ compiled block │ ...     │  free    │
//! └──────────────────────────────────────────────────────────────┘
//! 0                                                    ▲ cursor   capacity
//!                         ░ = alignment padding
//! ```

use crate::errors::{RenderError, Result};

/// Alignment of every allocation, in bytes.
pub const ARENA_ALIGNMENT: usize = 8;

/// A range of bytes inside a [`FrameAllocator`] or a resource command buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ArenaSpan {
    offset: u32,
    len: u32,
}

impl ArenaSpan {
    pub const EMPTY: Self = Self { offset: 0, len: 0 };

    #[must_use]
    pub(crate) const fn new(offset: usize, len: usize) -> Self {
        Self {
            offset: offset as u32,
            len: len as u32,
        }
    }

    #[inline]
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset as usize
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    #[must_use]
    pub fn range(&self) -> std::ops::Range<usize> {
        self.offset()..self.offset() + self.len()
    }
}

/// Resolves spans recorded into opcodes back to bytes.
pub trait SpanStorage {
    fn bytes(&self, span: ArenaSpan) -> Result<&[u8]>;
}

/// Looks `span` up in `storage`, failing when it does not fit.
pub(crate) fn span_bytes(storage: &[u8], span: ArenaSpan) -> Result<&[u8]> {
    storage.get(span.range()).ok_or(RenderError::InvalidSpan {
        offset: span.offset(),
        end: span.offset() + span.len(),
        allocated: storage.len(),
    })
}

/// Bump allocator with a fixed capacity.
#[derive(Debug)]
pub struct FrameAllocator {
    /// Backing bytes; `storage.len()` is the cursor.
    storage: Vec<u8>,
    capacity: usize,
}

impl FrameAllocator {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            storage: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Reserves `size` zeroed bytes.
    pub fn allocate(&mut self, size: usize) -> Result<ArenaSpan> {
        let offset = self.bump(size)?;
        Ok(ArenaSpan::new(offset, size))
    }

    /// Copies `data` into the arena. The caller's buffer may be dropped
    /// right after this returns.
    pub fn copy_from_slice(&mut self, data: &[u8]) -> Result<ArenaSpan> {
        let span = self.allocate(data.len())?;
        self.storage[span.range()].copy_from_slice(data);
        Ok(span)
    }

    /// Charges `count` records of type `T` against the capacity.
    ///
    /// Used for records the frame keeps in typed storage (command buffers,
    /// compiled state blocks) so they count towards the same budget as raw
    /// byte allocations.
    pub fn reserve<T>(&mut self, count: usize) -> Result<()> {
        self.reserve_bytes(size_of::<T>() * count)
    }

    pub fn reserve_bytes(&mut self, size: usize) -> Result<()> {
        self.bump(size).map(|_| ())
    }

    fn bump(&mut self, size: usize) -> Result<usize> {
        let offset = self.storage.len().next_multiple_of(ARENA_ALIGNMENT);
        let end = offset + size;
        if end > self.capacity {
            return Err(RenderError::FrameArenaExhausted {
                requested: size,
                capacity: self.capacity,
                allocated: self.storage.len(),
            });
        }
        self.storage.resize(end, 0);
        Ok(offset)
    }

    /// Bytes of an allocation made since the last reset.
    pub fn bytes(&self, span: ArenaSpan) -> Result<&[u8]> {
        span_bytes(&self.storage, span)
    }

    /// Bytes consumed so far, padding included.
    #[inline]
    #[must_use]
    pub fn allocated_bytes(&self) -> usize {
        self.storage.len()
    }

    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.capacity - self.storage.len()
    }

    /// Releases every allocation. Outstanding spans become dangling.
    pub fn reset(&mut self) {
        self.storage.clear();
    }
}

impl SpanStorage for FrameAllocator {
    fn bytes(&self, span: ArenaSpan) -> Result<&[u8]> {
        FrameAllocator::bytes(self, span)
    }
}
