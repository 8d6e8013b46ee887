// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! The old-space collector (§4.4): a full-graph mark phase shared by both
//! modes, followed by either a sweep (reclaim dead ranges into the free
//! list) or a compaction (pack survivors toward each chunk's start and fix
//! up every pointer that moved). Marking walks the whole object graph --
//! new space included -- because reachability is a property of the graph,
//! not of which space an object happens to live in; only old-space chunks
//! are ever physically reclaimed or moved.

use super::old_space::OldSpace;
use super::trace::{object_size, visit_pointer_fields, walk_reachable};
use super::weak::WeakTable;
use super::write_barrier::RememberedSet;
use crate::platform::MemorySpace;
use crate::types::Vaddr;
use crate::value::{InstanceFormat, MarkColor, ObjectHeader, Value};
use alloc::collections::BTreeMap;
use alloc::vec::Vec;

pub use super::trace::ClassFormatLookup;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionMode {
    Sweep,
    Compact,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct OldSpaceGcReport {
    pub objects_reclaimed: usize,
    pub bytes_reclaimed: u64,
    pub compacted: bool,
    pub widened_budget: bool,
}

struct Visited {
    addr: Vaddr,
    format: InstanceFormat,
}

/// Marks every object reachable from `roots`, across both new and old
/// space, black. Returns the full visited set (address plus instance
/// format) so callers can both pick out the old-space survivors and, in
/// compact mode, fix up pointers living anywhere in the graph.
fn mark<M: MemorySpace>(mem: &mut M, roots: &[Value], class_format: ClassFormatLookup<'_>) -> Vec<Visited> {
    let mut visited = Vec::new();
    walk_reachable(mem, roots, class_format, |mem, addr, format| {
        ObjectHeader::set_mark(mem, addr, MarkColor::Black);
        visited.push(Visited { addr, format });
    });
    visited
}

/// Runs one old-space collection cycle. `roots` is mutated in place to
/// reflect any address that moved under compaction. `remembered_set` has
/// any card belonging to a moved object re-keyed to its destination. `weak`
/// holds every weak slot registered before this call (a process's port-list
/// head, say): it is swept against the mark phase's result -- cleared if
/// dead, rewritten to its post-compaction address if alive and moved --
/// before any mark bit is reset.
pub fn collect<M: MemorySpace>(
    old_space: &mut OldSpace,
    mem: &mut M,
    roots: &mut [Value],
    remembered_set: &mut RememberedSet,
    weak: &mut WeakTable,
    class_format: ClassFormatLookup<'_>,
    mode: CollectionMode,
) -> OldSpaceGcReport {
    log::trace!("old-space collect start: mode={mode:?} roots={}", roots.len());
    let visited = mark(mem, roots, class_format);

    let mut total_old_objects = 0usize;
    let mut live_in_old: Vec<(Vaddr, u64)> = Vec::new();
    for (_base, _size, starts) in old_space.chunks_with_object_starts() {
        total_old_objects += starts.len();
        for addr in starts {
            if ObjectHeader::mark(mem, addr) == MarkColor::Black {
                let format = class_format(ObjectHeader::class(mem, addr));
                live_in_old.push((addr, object_size(mem, addr, format)));
            }
        }
    }

    let used_before = old_space.used_after_last_gc();
    let mut destinations: BTreeMap<Vaddr, Vaddr> = BTreeMap::new();
    let mut report = OldSpaceGcReport {
        objects_reclaimed: total_old_objects - live_in_old.len(),
        ..OldSpaceGcReport::default()
    };

    match mode {
        CollectionMode::Sweep => {
            weak.process(mem, WeakTable::mark_is_alive, |_mem, addr| addr);
            old_space.rebuild_after_sweep(&live_in_old);
        }
        CollectionMode::Compact => {
            report.compacted = true;
            destinations = compute_destinations(old_space, &live_in_old);

            for root in roots.iter_mut() {
                if root.is_heap_object() {
                    if let Some(&to) = destinations.get(&root.as_heap_ptr()) {
                        *root = Value::heap_ptr(to);
                    }
                }
            }
            for entry in &visited {
                fix_up_pointers(mem, entry.addr, entry.format, &destinations);
            }
            for card in remembered_set.cards().collect::<Vec<_>>() {
                if let Some(&to) = destinations.get(&card) {
                    remembered_set.forget(card);
                    remembered_set.remember(to);
                }
            }
            weak.process(mem, WeakTable::mark_is_alive, |_mem, addr| {
                destinations.get(&addr).copied().unwrap_or(addr)
            });

            for &(from, size) in &live_in_old {
                let to = destinations[&from];
                if to != from {
                    mem.copy_within(from, to, size as usize);
                }
            }

            let moved_ranges: Vec<(Vaddr, u64)> =
                live_in_old.iter().map(|&(from, size)| (destinations[&from], size)).collect();
            old_space.rebuild_after_sweep(&moved_ranges);
        }
    }

    report.bytes_reclaimed = used_before.saturating_sub(old_space.used_after_last_gc());

    // Every surviving object's mark resets to white for the next cycle, at
    // its post-move address if compaction relocated it.
    for entry in visited {
        let final_addr = destinations.get(&entry.addr).copied().unwrap_or(entry.addr);
        ObjectHeader::set_mark(mem, final_addr, MarkColor::White);
    }

    if old_space.needs_garbage_collection() {
        old_space.widen_budget();
        report.widened_budget = true;
    }

    log::debug!(
        "old-space collect end: reclaimed={} bytes_reclaimed={} compacted={}",
        report.objects_reclaimed,
        report.bytes_reclaimed,
        report.compacted
    );
    report
}

/// Packs every live old-space object toward the start of the chunk it
/// already lives in, in ascending address order, and returns the
/// old-address -> new-address map for every live object across all chunks.
fn compute_destinations(old_space: &OldSpace, live_in_old: &[(Vaddr, u64)]) -> BTreeMap<Vaddr, Vaddr> {
    let mut map = BTreeMap::new();
    for (chunk_base, chunk_size, _starts) in old_space.chunks_with_object_starts() {
        let chunk_end = chunk_base.add(chunk_size);
        let mut in_chunk: Vec<(Vaddr, u64)> =
            live_in_old.iter().copied().filter(|&(a, _)| a >= chunk_base && a < chunk_end).collect();
        in_chunk.sort_by_key(|&(a, _)| a);

        let mut cursor = chunk_base;
        for (addr, size) in in_chunk {
            map.insert(addr, cursor);
            cursor = cursor.add(size);
        }
    }
    map
}

/// Rewrites every pointer-shaped slot of `object` (its class slot and its
/// pointer fields) that currently targets a moved address, to the moved
/// address's destination.
fn fix_up_pointers<M: MemorySpace>(
    mem: &mut M,
    object: Vaddr,
    format: InstanceFormat,
    destinations: &BTreeMap<Vaddr, Vaddr>,
) {
    let class = ObjectHeader::class(mem, object);
    if let Some(&to) = destinations.get(&class) {
        ObjectHeader::set_class(mem, object, to);
    }
    visit_pointer_fields(mem, object, format, |slot| {
        let v = Value::from_word(mem.read(slot));
        if v.is_heap_object() {
            if let Some(&to) = destinations.get(&v.as_heap_ptr()) {
                mem.write(slot, Value::heap_ptr(to).word());
            }
        }
    });
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::platform::MockVSpace;
    use crate::value::HeapArray;

    fn array_format(_class: Vaddr) -> InstanceFormat {
        InstanceFormat::Array
    }

    #[test]
    fn sweep_reclaims_unreachable_object() {
        let mut mem = MockVSpace::new(1 << 16, Vaddr::new(0));
        let mut old_space = OldSpace::new(Vaddr::new(0x1000), 4096);

        let live = old_space.allocate(HeapArray::alloc_size(0), 8).unwrap();
        ObjectHeader::set_class(&mut mem, live, Vaddr::new(0xFEED));
        HeapArray::set_length(&mut mem, live, 0);

        let garbage = old_space.allocate(HeapArray::alloc_size(0), 8).unwrap();
        ObjectHeader::set_class(&mut mem, garbage, Vaddr::new(0xFEED));
        HeapArray::set_length(&mut mem, garbage, 0);

        let mut roots = [Value::heap_ptr(live)];
        let mut remembered = RememberedSet::new();
        let report =
            collect(&mut old_space, &mut mem, &mut roots, &mut remembered, &mut WeakTable::new(), &array_format, CollectionMode::Sweep);

        assert_eq!(report.objects_reclaimed, 1);
        assert_eq!(old_space.object_containing(live.add(1)), Some(live));
    }

    #[test]
    fn compact_moves_survivor_and_fixes_pointer_field() {
        let mut mem = MockVSpace::new(1 << 16, Vaddr::new(0));
        let mut old_space = OldSpace::new(Vaddr::new(0x1000), 4096);

        let garbage = old_space.allocate(HeapArray::alloc_size(0), 8).unwrap();
        ObjectHeader::set_class(&mut mem, garbage, Vaddr::new(0xFEED));
        HeapArray::set_length(&mut mem, garbage, 0);

        let survivor = old_space.allocate(HeapArray::alloc_size(1), 8).unwrap();
        ObjectHeader::set_class(&mut mem, survivor, Vaddr::new(0xFEED));
        HeapArray::set_length(&mut mem, survivor, 1);

        let inner = old_space.allocate(HeapArray::alloc_size(0), 8).unwrap();
        ObjectHeader::set_class(&mut mem, inner, Vaddr::new(0xFEED));
        HeapArray::set_length(&mut mem, inner, 0);
        HeapArray::set(&mut mem, survivor, 0, Value::heap_ptr(inner));

        let mut roots = [Value::heap_ptr(survivor)];
        let mut remembered = RememberedSet::new();
        let report =
            collect(&mut old_space, &mut mem, &mut roots, &mut remembered, &mut WeakTable::new(), &array_format, CollectionMode::Compact);

        assert!(report.compacted);
        let moved_survivor = roots[0].as_heap_ptr();
        assert_eq!(moved_survivor, Vaddr::new(0x1000));

        let moved_inner = HeapArray::get(&mem, moved_survivor, 0);
        assert!(moved_inner.is_heap_object());
        assert_eq!(moved_inner.as_heap_ptr(), moved_survivor.add(HeapArray::alloc_size(1)));
    }

    #[test]
    fn collecting_twice_with_no_mutation_reclaims_nothing_the_second_time() {
        let mut mem = MockVSpace::new(1 << 16, Vaddr::new(0));
        let mut old_space = OldSpace::new(Vaddr::new(0x1000), 4096);

        let garbage = old_space.allocate(HeapArray::alloc_size(0), 8).unwrap();
        ObjectHeader::set_class(&mut mem, garbage, Vaddr::new(0xFEED));
        HeapArray::set_length(&mut mem, garbage, 0);

        let survivor = old_space.allocate(HeapArray::alloc_size(0), 8).unwrap();
        ObjectHeader::set_class(&mut mem, survivor, Vaddr::new(0xFEED));
        HeapArray::set_length(&mut mem, survivor, 0);

        let mut roots = [Value::heap_ptr(survivor)];
        let mut remembered = RememberedSet::new();
        let first =
            collect(&mut old_space, &mut mem, &mut roots, &mut remembered, &mut WeakTable::new(), &array_format, CollectionMode::Sweep);
        assert_eq!(first.objects_reclaimed, 1);
        let used_after_first = old_space.used_after_last_gc();

        let second =
            collect(&mut old_space, &mut mem, &mut roots, &mut remembered, &mut WeakTable::new(), &array_format, CollectionMode::Sweep);
        assert_eq!(second.objects_reclaimed, 0);
        assert_eq!(old_space.used_after_last_gc(), used_after_first);
        assert_eq!(roots[0].as_heap_ptr(), survivor);
    }
}
