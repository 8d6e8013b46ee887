// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! `OldSpace`: a free-list-managed region holding tenured objects, with a
//! per-chunk object-start table used to locate the object containing an
//! arbitrary interior address during compaction and remembered-set replay.
//!
//! Mark bits are kept in each object's header ([`crate::value::ObjectHeader`])
//! rather than a parallel per-chunk bitmap; the design notes explicitly
//! allow either representation as long as it resets in O(chunk size / word
//! size), and folding marking into the header avoids a second metadata
//! table that would need to stay in lock-step with object placement.

use crate::types::Vaddr;
use alloc::vec::Vec;

const WORD: u64 = 8;

struct OldChunk {
    base: Vaddr,
    size: u64,
    /// One bit per word: true if an object starts at that word.
    object_starts: Vec<bool>,
}

impl OldChunk {
    fn word_index(&self, addr: Vaddr) -> usize {
        (addr.diff(self.base) / WORD as i64) as usize
    }

    fn contains(&self, addr: Vaddr) -> bool {
        addr >= self.base && addr < self.base.add(self.size)
    }
}

struct FreeBlock {
    addr: Vaddr,
    size: u64,
}

pub struct OldSpace {
    chunk_size: u64,
    chunks: Vec<OldChunk>,
    free_list: Vec<FreeBlock>,
    used_after_last_gc: u64,
}

impl OldSpace {
    #[must_use]
    pub fn new(base: Vaddr, chunk_size: u64) -> Self {
        let words = (chunk_size / WORD) as usize;
        Self {
            chunk_size,
            chunks: alloc::vec![OldChunk { base, size: chunk_size, object_starts: alloc::vec![false; words] }],
            free_list: alloc::vec![FreeBlock { addr: base, size: chunk_size }],
            used_after_last_gc: 0,
        }
    }

    #[must_use]
    pub fn used_after_last_gc(&self) -> u64 {
        self.used_after_last_gc
    }

    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.chunks.iter().map(|c| c.size).sum()
    }

    /// Every currently-marked object start, grouped by the chunk it lives
    /// in, in ascending address order within each chunk. Used by the
    /// old-space collector to enumerate objects for marking, sweeping and
    /// (per-chunk) compaction.
    #[must_use]
    pub fn chunks_with_object_starts(&self) -> Vec<(Vaddr, u64, Vec<Vaddr>)> {
        self.chunks
            .iter()
            .map(|chunk| {
                let starts = chunk
                    .object_starts
                    .iter()
                    .enumerate()
                    .filter_map(|(idx, set)| set.then(|| chunk.base.add(idx as u64 * WORD)))
                    .collect();
                (chunk.base, chunk.size, starts)
            })
            .collect()
    }

    /// First-fit allocation from the free list. Marks the returned address
    /// as an object start. Growing the space (acquiring a fresh chunk) is
    /// the allocator's job via [`Self::add_chunk`]; `allocate` alone never
    /// grows.
    pub fn allocate(&mut self, size: u64, align: u64) -> Option<Vaddr> {
        let idx = self.free_list.iter().position(|b| {
            let aligned = b.addr.align_up(align);
            aligned.diff(b.addr) as u64 + size <= b.size
        })?;

        let block = &self.free_list[idx];
        let aligned = block.addr.align_up(align);
        let pad = aligned.diff(block.addr) as u64;
        let remaining = block.size - pad - size;
        let tail_addr = aligned.add(size);

        self.free_list.remove(idx);
        if pad > 0 {
            self.free_list.push(FreeBlock { addr: block.addr, size: pad });
        }
        if remaining > 0 {
            self.free_list.push(FreeBlock { addr: tail_addr, size: remaining });
        }

        self.mark_object_start(aligned);
        Some(aligned)
    }

    pub fn add_chunk(&mut self) {
        let last = self.chunks.last().expect("at least one chunk present");
        let base = last.base.add(last.size);
        let size = self.chunk_size;
        let words = (size / WORD) as usize;
        self.chunks.push(OldChunk { base, size, object_starts: alloc::vec![false; words] });
        self.free_list.push(FreeBlock { addr: base, size });
    }

    fn chunk_for(&mut self, addr: Vaddr) -> Option<&mut OldChunk> {
        self.chunks.iter_mut().find(|c| c.contains(addr))
    }

    fn mark_object_start(&mut self, addr: Vaddr) {
        if let Some(chunk) = self.chunk_for(addr) {
            let idx = chunk.word_index(addr);
            chunk.object_starts[idx] = true;
        }
    }

    /// Locates the start of the object whose storage contains `interior`,
    /// by scanning backward from `interior`'s word to the nearest marked
    /// start within the same chunk. Used by remembered-set card scanning
    /// and by `FixPointersVisitor` during compaction.
    #[must_use]
    pub fn object_containing(&self, interior: Vaddr) -> Option<Vaddr> {
        let chunk = self.chunks.iter().find(|c| c.contains(interior))?;
        let mut idx = chunk.word_index(interior);
        loop {
            if chunk.object_starts[idx] {
                return Some(chunk.base.add(idx as u64 * WORD));
            }
            if idx == 0 {
                return None;
            }
            idx -= 1;
        }
    }

    /// Rebuilds the free list from a set of surviving `(addr, size)` object
    /// ranges, in address order, after a sweep. Also resets every chunk's
    /// object-start table and re-marks surviving starts; O(chunk size /
    /// word size) per the design notes.
    pub fn rebuild_after_sweep(&mut self, live_ranges: &[(Vaddr, u64)]) {
        for chunk in &mut self.chunks {
            chunk.object_starts.iter_mut().for_each(|b| *b = false);
        }
        self.free_list.clear();
        let mut used = 0u64;

        for chunk in &self.chunks {
            let chunk_end = chunk.base.add(chunk.size);
            let mut cursor = chunk.base;
            let mut ranges_in_chunk: Vec<(Vaddr, u64)> =
                live_ranges.iter().copied().filter(|(a, _)| chunk.contains(*a)).collect();
            ranges_in_chunk.sort_by_key(|(a, _)| *a);

            for (addr, size) in ranges_in_chunk {
                if addr > cursor {
                    self.free_list.push(FreeBlock { addr: cursor, size: addr.diff(cursor) as u64 });
                }
                used += size;
                cursor = addr.add(size);
            }
            if cursor < chunk_end {
                self.free_list.push(FreeBlock { addr: cursor, size: chunk_end.diff(cursor) as u64 });
            }
        }

        for (addr, _) in live_ranges {
            self.mark_object_start(*addr);
        }

        self.used_after_last_gc = used;
    }

    #[must_use]
    pub fn needs_garbage_collection(&self) -> bool {
        self.capacity() > 0 && self.used_after_last_gc * 2 >= self.capacity()
    }

    /// Widens the budget by adding another chunk. Called by the old-space
    /// collector's pointless-GC heuristic when compaction made no progress.
    pub fn widen_budget(&mut self) {
        self.add_chunk();
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn allocate_marks_object_start() {
        let mut space = OldSpace::new(Vaddr::new(0x2000), 256);
        let a = space.allocate(32, 8).unwrap();
        assert_eq!(space.object_containing(a.add(5)), Some(a));
    }

    #[test]
    fn first_fit_reuses_freed_block() {
        let mut space = OldSpace::new(Vaddr::new(0), 64);
        let a = space.allocate(16, 8).unwrap();
        let _b = space.allocate(16, 8).unwrap();
        space.rebuild_after_sweep(&[(a, 16)]);
        let c = space.allocate(16, 8);
        assert!(c.is_some());
    }

    #[test]
    fn rebuild_after_sweep_computes_used() {
        let mut space = OldSpace::new(Vaddr::new(0), 64);
        let a = space.allocate(16, 8).unwrap();
        let b = space.allocate(16, 8).unwrap();
        space.rebuild_after_sweep(&[(a, 16), (b, 16)]);
        assert_eq!(space.used_after_last_gc(), 32);
    }

    #[test]
    fn idempotent_sweep_keeps_used_stable() {
        let mut space = OldSpace::new(Vaddr::new(0), 64);
        let a = space.allocate(16, 8).unwrap();
        space.rebuild_after_sweep(&[(a, 16)]);
        let first = space.used_after_last_gc();
        space.rebuild_after_sweep(&[(a, 16)]);
        assert_eq!(first, space.used_after_last_gc());
    }
}
