// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! The allocator: fast bump path through new space, slow path through old
//! space for large objects, and the `NoAllocationFailureScope` / failure
//! sentinel contract described in §4.1.

use super::old_space::OldSpace;
use super::semi_space::{CanResize, SemiSpace};
use crate::types::Vaddr;

/// Returned by [`TwoSpaceHeap::allocate`] when both the fast and slow paths
/// fail. Callers treat this as "GC and retry; if still failure, signal an
/// allocation-failed process termination" -- the allocator itself never
/// retries or collects.
pub struct AllocationFailure;

/// Guard object for a `NoAllocationFailureScope`. Allocations performed
/// while any guard is alive must succeed; the heap panics otherwise. Drop
/// exits the scope.
pub struct NoAllocationFailureScope<'h> {
    heap: &'h mut TwoSpaceHeap,
}

impl Drop for NoAllocationFailureScope<'_> {
    fn drop(&mut self) {
        self.heap.no_failure_depth -= 1;
    }
}

/// The process heap shared by every process: one `SemiSpace` new space and
/// one `OldSpace` old space, plus the large-object threshold that routes
/// big allocations straight to old space.
pub struct TwoSpaceHeap {
    pub(crate) new_space: SemiSpace,
    pub(crate) old_space: OldSpace,
    large_object_threshold: u64,
    no_failure_depth: u32,
}

impl TwoSpaceHeap {
    #[must_use]
    pub fn new(
        new_space_base: Vaddr,
        new_space_chunk_size: u64,
        old_space_base: Vaddr,
        old_space_chunk_size: u64,
        large_object_threshold: u64,
    ) -> Self {
        Self {
            new_space: SemiSpace::new(new_space_base, new_space_chunk_size, CanResize::Yes),
            old_space: OldSpace::new(old_space_base, old_space_chunk_size),
            large_object_threshold,
            no_failure_depth: 0,
        }
    }

    /// Allocates `size` bytes aligned to `align`. Objects at or above the
    /// large-object threshold go straight to old space (§4.1 allocation
    /// policy); everything else is a new-space bump allocation. Panics if
    /// inside a `NoAllocationFailureScope` and the request could not be
    /// satisfied by either space.
    pub fn allocate(&mut self, size: u64, align: u64) -> Option<Vaddr> {
        let result = if size >= self.large_object_threshold {
            self.old_space.allocate(size, align)
        } else {
            self.new_space.allocate(size, align)
        };
        if result.is_none() && self.no_failure_depth > 0 {
            panic!("allocation failed inside a no-allocation-failure scope");
        }
        result
    }

    pub fn enter_no_allocation_failure_scope(&mut self) -> NoAllocationFailureScope<'_> {
        self.no_failure_depth += 1;
        NoAllocationFailureScope { heap: self }
    }

    #[must_use]
    pub fn new_space(&self) -> &SemiSpace {
        &self.new_space
    }

    #[must_use]
    pub fn old_space(&self) -> &OldSpace {
        &self.old_space
    }

    #[must_use]
    pub fn needs_old_space_gc(&self) -> bool {
        self.old_space.needs_garbage_collection()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn small_allocation_goes_to_new_space() {
        let mut heap = TwoSpaceHeap::new(Vaddr::new(0), 1024, Vaddr::new(0x10000), 1024, 256);
        let before = heap.old_space.used_after_last_gc();
        let addr = heap.allocate(32, 8);
        assert!(addr.is_some());
        assert_eq!(heap.old_space.used_after_last_gc(), before);
        assert_eq!(heap.new_space.used(), 32);
    }

    #[test]
    fn large_allocation_goes_to_old_space() {
        let mut heap = TwoSpaceHeap::new(Vaddr::new(0), 1024, Vaddr::new(0x10000), 1024, 256);
        let addr = heap.allocate(512, 8);
        assert!(addr.is_some());
        assert_eq!(heap.new_space.used(), 0);
    }

    #[test]
    #[should_panic(expected = "no-allocation-failure scope")]
    fn scope_panics_on_exhaustion() {
        let mut heap = TwoSpaceHeap::new(Vaddr::new(0), 16, Vaddr::new(0x10000), 16, 256);
        let _scope = heap.enter_no_allocation_failure_scope();
        heap.allocate(9999, 8);
    }
}
