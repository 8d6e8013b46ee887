// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! The copying collector over new space (§4.3): a Cheney-style scavenge
//! with remembered-set roots and age-based promotion to old space.

use super::allocator::TwoSpaceHeap;
use super::old_space::OldSpace;
use super::semi_space::{CanResize, SemiSpace};
use super::trace::{object_size, visit_pointer_fields};
use super::write_barrier::RememberedSet;
use crate::platform::MemorySpace;
use crate::types::Vaddr;
use crate::value::{ObjectHeader, Value};
use alloc::vec::Vec;

pub use super::trace::ClassFormatLookup;

#[derive(Debug, Default, Clone, Copy)]
pub struct ScavengeReport {
    pub objects_copied: usize,
    pub objects_promoted: usize,
    pub trigger_old_space_gc: bool,
}

/// If more than this many objects promote in a single scavenge, the old
/// space is filling quickly enough to warrant scheduling its own
/// collection on top of whatever `needs_garbage_collection` already says.
const PROMOTION_BURST_THRESHOLD: usize = 64;

/// Runs one scavenge cycle. `roots` is mutated in place so callers observe
/// forwarded addresses; `remembered_set` supplies old→new roots and is
/// updated to drop cards that no longer point into new space. Pointers
/// already living in old or program space are left untouched: only objects
/// inside the from-space being scavenged are copied. `promotion_age_threshold`
/// is the survived-scavenges count at which a surviving object is promoted
/// to old space instead of being copied within new space again.
pub fn scavenge<M: MemorySpace>(
    heap: &mut TwoSpaceHeap,
    mem: &mut M,
    roots: &mut [Value],
    remembered_set: &mut RememberedSet,
    class_format: ClassFormatLookup<'_>,
    promotion_age_threshold: u32,
) -> ScavengeReport {
    log::trace!("scavenge start: {} roots", roots.len());
    let from_space_base = heap.new_space.base();
    let from_space_end = heap.new_space.end();
    let in_from_space = move |addr: Vaddr| addr >= from_space_base && addr < from_space_end;

    let mut to_space = SemiSpace::new(from_space_end, heap.new_space.chunk_size(), CanResize::Yes);
    let mut report = ScavengeReport::default();
    let mut worklist: Vec<Vaddr> = Vec::new();

    for root in roots.iter_mut() {
        forward_value(
            mem,
            root,
            in_from_space,
            &mut to_space,
            &mut heap.old_space,
            class_format,
            &mut worklist,
            &mut report,
            promotion_age_threshold,
        );
    }

    let mut live_cards_with_new_refs: Vec<Vaddr> = Vec::new();
    for card in remembered_set.cards().collect::<Vec<_>>() {
        if let Some(object) = heap.old_space.object_containing(card) {
            let format = class_format(ObjectHeader::class(mem, object));
            let mut still_has_new_ref = false;
            visit_pointer_fields(mem, object, format, |slot| {
                let mut v = Value::from_word(mem.read(slot));
                if v.is_heap_object() && in_from_space(v.as_heap_ptr()) {
                    forward_value(
                        mem,
                        &mut v,
                        in_from_space,
                        &mut to_space,
                        &mut heap.old_space,
                        class_format,
                        &mut worklist,
                        &mut report,
                        promotion_age_threshold,
                    );
                    mem.write(slot, v.word());
                    if to_space.contains(v.as_heap_ptr()) {
                        still_has_new_ref = true;
                    }
                }
            });
            if still_has_new_ref {
                live_cards_with_new_refs.push(card);
            }
        }
    }
    for card in remembered_set.cards().collect::<Vec<_>>() {
        if !live_cards_with_new_refs.contains(&card) {
            remembered_set.forget(card);
        }
    }

    while let Some(object) = worklist.pop() {
        let format = class_format(ObjectHeader::class(mem, object));
        visit_pointer_fields(mem, object, format, |slot| {
            let mut v = Value::from_word(mem.read(slot));
            if v.is_heap_object() && in_from_space(v.as_heap_ptr()) {
                forward_value(
                    mem,
                    &mut v,
                    in_from_space,
                    &mut to_space,
                    &mut heap.old_space,
                    class_format,
                    &mut worklist,
                    &mut report,
                    promotion_age_threshold,
                );
                mem.write(slot, v.word());
            }
        });
    }

    report.trigger_old_space_gc = report.objects_promoted > PROMOTION_BURST_THRESHOLD;
    heap.new_space = to_space;
    log::debug!(
        "scavenge end: copied={} promoted={} trigger_old_space_gc={}",
        report.objects_copied,
        report.objects_promoted,
        report.trigger_old_space_gc
    );
    report
}

/// Forwards a single `Value` in place: if `value` does not point into the
/// from-space, it is left unchanged (already old/program space). If it has
/// already been forwarded this cycle, `value` is rewritten to the existing
/// forwarding address. Otherwise the object is copied -- promoted to old
/// space if old enough, copied within to-space otherwise -- and a
/// forwarding pointer is installed in the from-object's header.
#[allow(clippy::too_many_arguments)]
fn forward_value<M: MemorySpace>(
    mem: &mut M,
    value: &mut Value,
    in_from_space: impl Fn(Vaddr) -> bool,
    to_space: &mut SemiSpace,
    old_space: &mut OldSpace,
    class_format: ClassFormatLookup<'_>,
    worklist: &mut Vec<Vaddr>,
    report: &mut ScavengeReport,
    promotion_age_threshold: u32,
) {
    if !value.is_heap_object() {
        return;
    }
    let from = value.as_heap_ptr();
    if !in_from_space(from) {
        return;
    }

    if let Some(forwarded) = ObjectHeader::forwarding(mem, from) {
        *value = Value::heap_ptr(forwarded);
        return;
    }

    let class = ObjectHeader::class(mem, from);
    let format = class_format(class);
    let size = object_size(mem, from, format);
    let age = ObjectHeader::age(mem, from);

    let to = if age >= promotion_age_threshold {
        match old_space.allocate(size, 8) {
            Some(addr) => {
                report.objects_promoted += 1;
                addr
            }
            None => to_space.allocate(size, 8).expect("to-space must accept every surviving object"),
        }
    } else {
        to_space.allocate(size, 8).expect("to-space must accept every surviving object")
    };

    mem.copy_within(from, to, size as usize);
    ObjectHeader::bump_age(mem, to);
    ObjectHeader::set_forwarding(mem, from, to);
    *value = Value::heap_ptr(to);
    report.objects_copied += 1;
    worklist.push(to);
}
