// SPDX-License-Identifier: CEPL-1.0
//! Bump-pointer arenas with nested temporary scopes.
//!
//! A root [`Arena`] owns one page-aligned block. Children are carved out of a
//! parent with a single allocation and give nothing back when dropped; only
//! the root releases memory.
//!
//! Invalidation is enforced by borrows: `alloc` takes `&self` and hands out
//! slices tied to that borrow, while [`Arena::clear`], [`Arena::begin_temp`]
//! and the end of a [`TempScope`] need `&mut self`. A rewind can therefore
//! never leave a live slice pointing into reused memory.

use std::alloc::{self, Layout};
use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;

use thiserror::Error;

/// Every request is aligned to at least this many bytes.
pub const MIN_ALIGN: usize = 8;

/// Granularity of root reservations.
pub const PAGE_SIZE: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArenaError {
    #[error("arena exhausted: requested {requested} bytes, {remaining} of {capacity} remaining")]
    Exhausted {
        requested: usize,
        remaining: usize,
        capacity: usize,
    },
    #[error("alignment {0} is not a power of two")]
    BadAlignment(usize),
    #[error("could not reserve {0} bytes for a root arena")]
    Reserve(usize),
}

enum Backing {
    Root(Layout),
    Carved,
}

pub struct Arena<'parent> {
    base: NonNull<u8>,
    used: Cell<usize>,
    capacity: usize,
    backing: Backing,
    _parent: PhantomData<&'parent [u8]>,
}

/// Rounds `value` up to a multiple of `align` (a power of two).
pub fn align_up(value: usize, align: usize) -> Option<usize> {
    debug_assert!(align.is_power_of_two());
    value.checked_add(align - 1).map(|v| v & !(align - 1))
}

impl Arena<'static> {
    /// Reserves a root arena of at least `capacity` bytes, rounded up to whole pages.
    pub fn new(capacity: usize) -> Result<Self, ArenaError> {
        let rounded = align_up(capacity.max(1), PAGE_SIZE).ok_or(ArenaError::Reserve(capacity))?;
        let layout =
            Layout::from_size_align(rounded, PAGE_SIZE).map_err(|_| ArenaError::Reserve(rounded))?;

        // SAFETY: the layout has a non-zero size.
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        let base = NonNull::new(ptr).ok_or(ArenaError::Reserve(rounded))?;

        tracing::debug!(capacity = rounded, "root arena reserved");
        Ok(Arena {
            base,
            used: Cell::new(0),
            capacity: rounded,
            backing: Backing::Root(layout),
            _parent: PhantomData,
        })
    }
}

impl<'parent> Arena<'parent> {
    /// Carves a child arena of exactly `capacity` bytes out of this one.
    pub fn child(&self, capacity: usize) -> Result<Arena<'_>, ArenaError> {
        let block = self.alloc(capacity, MIN_ALIGN)?;
        Ok(Arena {
            base: NonNull::from(block).cast::<u8>(),
            used: Cell::new(0),
            capacity,
            backing: Backing::Carved,
            _parent: PhantomData,
        })
    }

    /// Hands out `size` zeroed bytes aligned to `max(align, MIN_ALIGN)`.
    ///
    /// The arena advances by `size` rounded up to that alignment. Fails
    /// without side effects when the rounded request does not fit.
    #[allow(clippy::mut_from_ref)]
    pub fn alloc(&self, size: usize, align: usize) -> Result<&mut [u8], ArenaError> {
        let (start, rounded) = self.reserve(size, align)?;

        // SAFETY: `start..start + rounded` lies inside the block and was not
        // handed out since the last rewind. Rewinds need `&mut self`, so no
        // slice from before the rewind can still be alive.
        let block =
            unsafe { std::slice::from_raw_parts_mut(self.base.as_ptr().add(start), rounded) };
        block.fill(0);
        Ok(&mut block[..size])
    }

    #[allow(clippy::mut_from_ref)]
    pub fn alloc_copy(&self, bytes: &[u8]) -> Result<&mut [u8], ArenaError> {
        let block = self.alloc(bytes.len(), MIN_ALIGN)?;
        block.copy_from_slice(bytes);
        Ok(block)
    }

    /// Moves `value` into the arena. Its destructor never runs, hence `Copy`.
    #[allow(clippy::mut_from_ref)]
    pub fn alloc_value<T: Copy>(&self, value: T) -> Result<&mut T, ArenaError> {
        let (start, _) = self.reserve(std::mem::size_of::<T>(), std::mem::align_of::<T>())?;

        // SAFETY: same region argument as `alloc`; `reserve` aligned the start
        // to at least `align_of::<T>()` and reserved `size_of::<T>()` bytes.
        unsafe {
            let ptr = self.base.as_ptr().add(start).cast::<T>();
            ptr.write(value);
            Ok(&mut *ptr)
        }
    }

    fn reserve(&self, size: usize, align: usize) -> Result<(usize, usize), ArenaError> {
        let align = align.max(MIN_ALIGN);
        if !align.is_power_of_two() {
            return Err(ArenaError::BadAlignment(align));
        }

        let exhausted = |requested: usize| ArenaError::Exhausted {
            requested,
            remaining: self.remaining(),
            capacity: self.capacity,
        };

        let rounded = align_up(size, align).ok_or_else(|| exhausted(size))?;
        let addr = self.base.as_ptr() as usize;
        let used = self.used.get();
        let start = align_up(addr + used, align).ok_or_else(|| exhausted(rounded))? - addr;
        let end = start.checked_add(rounded).ok_or_else(|| exhausted(rounded))?;
        if end > self.capacity {
            return Err(exhausted(rounded));
        }

        self.used.set(end);
        Ok((start, rounded))
    }

    pub fn used(&self) -> usize {
        self.used.get()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn remaining(&self) -> usize {
        self.capacity - self.used.get()
    }

    /// Forgets every allocation.
    pub fn clear(&mut self) {
        self.used.set(0);
    }

    /// Opens a save-point; everything allocated through the scope is released when it ends.
    pub fn begin_temp(&mut self) -> TempScope<'_, 'parent> {
        let position = self.used.get();
        TempScope {
            arena: self,
            position,
        }
    }
}

impl Drop for Arena<'_> {
    fn drop(&mut self) {
        if let Backing::Root(layout) = self.backing {
            // SAFETY: `base` came from `alloc_zeroed` with this exact layout.
            unsafe { alloc::dealloc(self.base.as_ptr(), layout) };
        }
    }
}

impl fmt::Debug for Arena<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena")
            .field("used", &self.used.get())
            .field("capacity", &self.capacity)
            .field("root", &matches!(self.backing, Backing::Root(_)))
            .finish()
    }
}

/// Save-point into an [`Arena`]. Derefs to the arena; rewinds it on drop.
pub struct TempScope<'a, 'parent> {
    arena: &'a mut Arena<'parent>,
    position: usize,
}

impl TempScope<'_, '_> {
    /// The `used` value the arena returns to.
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn end(self) {}
}

impl<'parent> Deref for TempScope<'_, 'parent> {
    type Target = Arena<'parent>;

    fn deref(&self) -> &Self::Target {
        self.arena
    }
}

impl DerefMut for TempScope<'_, '_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.arena
    }
}

impl Drop for TempScope<'_, '_> {
    fn drop(&mut self) {
        self.arena.used.set(self.position);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_capacity_rounds_to_pages() {
        assert_eq!(Arena::new(1).unwrap().capacity(), PAGE_SIZE);
        assert_eq!(Arena::new(PAGE_SIZE).unwrap().capacity(), PAGE_SIZE);
        assert_eq!(Arena::new(PAGE_SIZE + 1).unwrap().capacity(), 2 * PAGE_SIZE);
    }

    #[test]
    fn alloc_succeeds_iff_rounded_size_fits() {
        for used_before in [0usize, 8, 4000, 4088] {
            for size in [0usize, 1, 7, 8, 9, 15, 16, 100, 4096] {
                let arena = Arena::new(PAGE_SIZE).unwrap();
                if used_before > 0 {
                    arena.alloc(used_before, MIN_ALIGN).unwrap();
                }
                let u = arena.used();
                let rounded = align_up(size, MIN_ALIGN).unwrap();
                let fits = rounded <= arena.capacity() - u;

                let result = arena.alloc(size, 0);
                assert_eq!(result.is_ok(), fits, "size {size} with {u} used");
                if fits {
                    assert_eq!(arena.used(), u + rounded);
                } else {
                    assert_eq!(arena.used(), u, "failed alloc must not move the cursor");
                }
            }
        }
    }

    #[test]
    fn small_alignments_round_up_to_eight() {
        let arena = Arena::new(64).unwrap();
        arena.alloc(3, 1).unwrap();
        assert_eq!(arena.used(), 8);
        arena.alloc(3, 4).unwrap();
        assert_eq!(arena.used(), 16);
    }

    #[test]
    fn large_alignment_is_honoured() {
        let arena = Arena::new(PAGE_SIZE).unwrap();
        arena.alloc(8, 0).unwrap();
        let block = arena.alloc(32, 64).unwrap();
        assert_eq!(block.as_ptr() as usize % 64, 0);
        assert_eq!(block.len(), 32);
    }

    #[test]
    fn rejects_non_power_of_two_alignment() {
        let arena = Arena::new(64).unwrap();
        assert_eq!(arena.alloc(8, 24).unwrap_err(), ArenaError::BadAlignment(24));
        assert_eq!(arena.used(), 0);
    }

    #[test]
    fn exhaustion_reports_sizes() {
        let arena = Arena::new(PAGE_SIZE).unwrap();
        arena.alloc(PAGE_SIZE - 16, 0).unwrap();
        let err = arena.alloc(17, 0).unwrap_err();
        assert_eq!(
            err,
            ArenaError::Exhausted {
                requested: 24,
                remaining: 16,
                capacity: PAGE_SIZE
            }
        );
    }

    #[test]
    fn earlier_blocks_stay_put() {
        let arena = Arena::new(PAGE_SIZE).unwrap();
        let a = arena.alloc_copy(b"first").unwrap();
        let b = arena.alloc_copy(b"second").unwrap();
        assert_eq!(&a[..], b"first");
        assert_eq!(&b[..], b"second");
        assert!(b.as_ptr() as usize >= a.as_ptr() as usize + 8);
    }

    #[test]
    fn clear_resets_usage_and_memory_is_zeroed_again() {
        let mut arena = Arena::new(PAGE_SIZE).unwrap();
        arena.alloc_copy(&[0xAB; 32]).unwrap();
        arena.clear();
        assert_eq!(arena.used(), 0);
        let block = arena.alloc(32, 0).unwrap();
        assert!(block.iter().all(|&b| b == 0));
    }

    #[test]
    fn temp_scope_round_trips_used() {
        let mut arena = Arena::new(PAGE_SIZE).unwrap();
        arena.alloc(40, 0).unwrap();
        let before = arena.used();
        {
            let scope = arena.begin_temp();
            assert_eq!(scope.position(), before);
            for size in [1, 2, 300, 17] {
                scope.alloc(size, 0).unwrap();
            }
            assert!(scope.used() > before);
        }
        assert_eq!(arena.used(), before);
    }

    #[test]
    fn nested_temp_scopes_unwind_in_order() {
        let mut arena = Arena::new(PAGE_SIZE).unwrap();
        let mut outer = arena.begin_temp();
        outer.alloc(16, 0).unwrap();
        let mid = outer.used();
        {
            let inner = outer.begin_temp();
            inner.alloc(512, 0).unwrap();
            inner.end();
        }
        assert_eq!(outer.used(), mid);
        outer.end();
        assert_eq!(arena.used(), 0);
    }

    #[test]
    fn child_is_carved_from_parent() {
        let parent = Arena::new(PAGE_SIZE).unwrap();
        {
            let child = parent.child(100).unwrap();
            assert_eq!(child.capacity(), 100);
            assert_eq!(parent.used(), 104);
            child.alloc(96, 0).unwrap();
            assert!(child.alloc(8, 0).is_err());
        }
        // Dropping the child gives nothing back to the parent.
        assert_eq!(parent.used(), 104);
    }

    #[test]
    fn child_larger_than_parent_fails() {
        let parent = Arena::new(PAGE_SIZE).unwrap();
        assert!(matches!(
            parent.child(2 * PAGE_SIZE),
            Err(ArenaError::Exhausted { .. })
        ));
    }

    #[test]
    fn alloc_value_places_struct() {
        #[derive(Clone, Copy, Debug, PartialEq)]
        struct Cursor {
            x: i32,
            y: i32,
        }

        let arena = Arena::new(64).unwrap();
        let cursor = arena.alloc_value(Cursor { x: 3, y: -4 }).unwrap();
        cursor.x += 1;
        assert_eq!(*cursor, Cursor { x: 4, y: -4 });
        assert_eq!(arena.used(), 8);
    }
}
