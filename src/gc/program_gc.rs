// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Program GC (§4.5): the collector over the immutable-at-runtime program
//! heap (classes, function bytecode, canonical singletons). Unlike the
//! data-space collectors, program GC must cooperate with every live stack
//! across every process, since a moved function would otherwise leave
//! dangling interior pointers inside interpreter frames.
//!
//! The full protocol is split across small, independently testable steps
//! (chain, cook, scavenge, uncook) rather than one monolithic pass, mostly
//! because the cook/uncook bracket has to survive a GC pass run by a
//! different module ([`super::scavenger`] or [`super::old_space_gc`]) in
//! between, and keeping the steps separate makes that ordering explicit at
//! the call site instead of hidden inside one function.

use super::semi_space::{CanResize, SemiSpace};
use super::trace::{object_size, visit_pointer_fields, walk_reachable, ClassFormatLookup};
use crate::platform::MemorySpace;
use crate::types::Vaddr;
use crate::value::{HeapFunction, InstanceFormat, ObjectHeader, Stack, Value};
use alloc::vec::Vec;

/// A frame's saved `bcp - function.bytecode_start()` distance, recorded
/// while cooking so uncooking can restore an interior pointer against the
/// function's (possibly moved) post-scavenge address.
#[derive(Debug, Clone, Copy)]
pub struct FrameDelta {
    pub stack: Vaddr,
    pub frame_index: u32,
    pub delta: i64,
}

/// Links every live `Stack` reachable from `roots` into a singly-linked
/// chain via its `next` slot and returns the chain head (mirrors
/// `Program.stack_chain_`). `Vaddr::null()` if no stack is reachable.
pub fn chain_live_stacks<M: MemorySpace>(
    mem: &mut M,
    roots: &[Value],
    class_format: ClassFormatLookup<'_>,
) -> Vaddr {
    let mut head = Vaddr::null();
    walk_reachable(mem, roots, class_format, |mem, addr, format| {
        if format == InstanceFormat::Stack {
            Stack::set_next(mem, addr, head);
            head = addr;
        }
    });
    head
}

/// Walks a chain built by [`chain_live_stacks`] into a plain list, in chain
/// (most-recently-linked-first) order.
pub fn stacks_in_chain<M: MemorySpace>(mem: &M, head: Vaddr) -> Vec<Vaddr> {
    let mut stacks = Vec::new();
    let mut cursor = head;
    while !cursor.is_null() {
        stacks.push(cursor);
        cursor = Stack::next(mem, cursor);
    }
    stacks
}

/// Zeroes the `next` slot of every stack in the chain, discarding it. Step
/// 5's final action, done once uncooking no longer needs the chain.
pub fn discard_chain<M: MemorySpace>(mem: &mut M, head: Vaddr) {
    let mut cursor = head;
    while !cursor.is_null() {
        let next = Stack::next(mem, cursor);
        Stack::set_next(mem, cursor, Vaddr::null());
        cursor = next;
    }
}

/// Cooks every frame of every stack in `stacks`: saves each frame's
/// `bcp - function.bytecode_start()` delta, then overwrites the bcp slot
/// with the frame's own (untagged) function pointer so the slot holds a
/// traceable base-object pointer instead of a raw interior one.
pub fn cook_stacks<M: MemorySpace>(mem: &mut M, stacks: &[Vaddr]) -> Vec<FrameDelta> {
    log::trace!("cooking {} stacks for program GC", stacks.len());
    let mut deltas = Vec::new();
    for &stack in stacks {
        let count = Stack::frame_count(mem, stack);
        for index in 0..count {
            let frame = Stack::frame(mem, stack, index);
            if !frame.function.is_heap_object() {
                continue;
            }
            let bytecode_start = HeapFunction::bytecode_start(mem, frame.function.as_heap_ptr());
            let delta = frame.bcp.diff(bytecode_start);
            deltas.push(FrameDelta { stack, frame_index: index, delta });
            Stack::cook_frame(mem, stack, index, frame.function);
        }
    }
    log::debug!("cooked {} frames across {} stacks", deltas.len(), stacks.len());
    deltas
}

/// Restores every cooked frame's bcp from its saved delta and the frame's
/// function pointer, which by this point may have been forwarded to a new
/// program-space address by an intervening [`scavenge_program_space`] and
/// [`fix_up_program_pointers_in_object`] pass.
pub fn uncook_stacks<M: MemorySpace>(mem: &mut M, deltas: &[FrameDelta]) {
    log::trace!("uncooking {} frames after program GC", deltas.len());
    for delta in deltas {
        let frame = Stack::frame(mem, delta.stack, delta.frame_index);
        let bytecode_start = HeapFunction::bytecode_start(mem, frame.function.as_heap_ptr());
        Stack::uncook_frame(mem, delta.stack, delta.frame_index, bytecode_start, delta.delta);
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ProgramScavengeReport {
    pub objects_copied: usize,
}

/// Cheney-scavenges program space into a fresh to-space. `priority_order`
/// (typically `[double_class, null_object, false_object, true_object, ..popular]`)
/// is forwarded before any other root so those objects land first, in
/// that order, at the front of to-space -- the 2-word spacing invariant
/// snapshot layout depends on. Program objects are immutable at runtime,
/// so (unlike the data scavenger) there is no age/promotion tracking and
/// no remembered set: every reachable program object is copied every time.
pub fn scavenge_program_space<M: MemorySpace>(
    program_space: &mut SemiSpace,
    mem: &mut M,
    program_roots: &mut [Value],
    class_format: ClassFormatLookup<'_>,
    priority_order: &[Vaddr],
) -> ProgramScavengeReport {
    let from_base = program_space.base();
    let from_end = program_space.end();
    let in_from_space = move |addr: Vaddr| addr >= from_base && addr < from_end;

    let mut to_space = SemiSpace::new(from_end, program_space.chunk_size(), CanResize::Yes);
    let mut report = ProgramScavengeReport::default();
    let mut worklist: Vec<Vaddr> = Vec::new();

    for &addr in priority_order {
        let mut v = Value::heap_ptr(addr);
        forward_program_value(mem, &mut v, in_from_space, &mut to_space, class_format, &mut worklist, &mut report);
    }
    for root in program_roots.iter_mut() {
        forward_program_value(mem, root, in_from_space, &mut to_space, class_format, &mut worklist, &mut report);
    }

    while let Some(object) = worklist.pop() {
        let format = class_format(ObjectHeader::class(mem, object));
        visit_pointer_fields(mem, object, format, |slot| {
            let mut v = Value::from_word(mem.read(slot));
            if v.is_heap_object() && in_from_space(v.as_heap_ptr()) {
                forward_program_value(mem, &mut v, in_from_space, &mut to_space, class_format, &mut worklist, &mut report);
                mem.write(slot, v.word());
            }
        });
    }

    *program_space = to_space;
    report
}

#[allow(clippy::too_many_arguments)]
fn forward_program_value<M: MemorySpace>(
    mem: &mut M,
    value: &mut Value,
    in_from_space: impl Fn(Vaddr) -> bool,
    to_space: &mut SemiSpace,
    class_format: ClassFormatLookup<'_>,
    worklist: &mut Vec<Vaddr>,
    report: &mut ProgramScavengeReport,
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

    let format = class_format(ObjectHeader::class(mem, from));
    let size = object_size(mem, from, format);
    let to = to_space.allocate(size, 8).expect("program to-space must accept every surviving object");

    mem.copy_within(from, to, size as usize);
    ObjectHeader::set_forwarding(mem, from, to);
    *value = Value::heap_ptr(to);
    report.objects_copied += 1;
    worklist.push(to);
}

/// Rewrites `value` in place if it is a forwarded pointer into the program
/// from-space of the most recent [`scavenge_program_space`] call. Used by
/// callers outside this module (process heaps, process roots) that hold
/// their own process→program pointers, which `scavenge_program_space`
/// cannot discover on its own since it only walks from program roots.
pub fn fix_up_program_pointer<M: MemorySpace>(
    mem: &M,
    value: &mut Value,
    in_from_space: impl Fn(Vaddr) -> bool,
) {
    if value.is_heap_object() && in_from_space(value.as_heap_ptr()) {
        if let Some(to) = ObjectHeader::forwarding(mem, value.as_heap_ptr()) {
            *value = Value::heap_ptr(to);
        }
    }
}

/// Applies [`fix_up_program_pointer`] to every pointer-shaped field of a
/// single process-heap object.
pub fn fix_up_program_pointers_in_object<M: MemorySpace>(
    mem: &mut M,
    object: Vaddr,
    format: InstanceFormat,
    in_from_space: impl Fn(Vaddr) -> bool + Copy,
) {
    visit_pointer_fields(mem, object, format, |slot| {
        let mut v = Value::from_word(mem.read(slot));
        if v.is_heap_object() && in_from_space(v.as_heap_ptr()) {
            fix_up_program_pointer(mem, &mut v, in_from_space);
            mem.write(slot, v.word());
        }
    });
}

/// Recomputes a breakpoint's bcp after its function moved: `bytecode_index`
/// is stable across a program GC, only the function's base address changes.
pub fn recompute_breakpoint_bcp<M: MemorySpace>(mem: &M, function: Value, bytecode_index: u32) -> Vaddr {
    HeapFunction::bytecode_start(mem, function.as_heap_ptr()).add(u64::from(bytecode_index))
}

/// Counts, for every object reachable from `roots`, how many distinct
/// pointer-shaped slots across the whole graph reference it. Used by
/// snapshot GC to bias to-space layout toward the objects worth placing
/// for locality -- popular objects end up adjacent regardless of original
/// allocation order, which plain allocation-order Cheney scavenging would
/// not guarantee.
#[must_use]
pub fn count_popularity<M: MemorySpace>(
    mem: &mut M,
    roots: &[Value],
    class_format: ClassFormatLookup<'_>,
) -> alloc::collections::BTreeMap<Vaddr, usize> {
    let mut counts: alloc::collections::BTreeMap<Vaddr, usize> = alloc::collections::BTreeMap::new();
    walk_reachable(mem, roots, class_format, |mem, addr, format| {
        visit_pointer_fields(mem, addr, format, |slot| {
            let v = Value::from_word(mem.read(slot));
            if v.is_heap_object() {
                *counts.entry(v.as_heap_ptr()).or_insert(0) += 1;
            }
        });
    });
    counts
}

/// Builds the priority list snapshot GC forwards first: `double_class`,
/// then `null`/`false`/`true` in that order (the spacing invariant), then
/// the `popular_count` most-referenced remaining objects by descending
/// popularity, ties broken by ascending from-space address so the layout
/// is deterministic across runs given the same heap contents.
#[must_use]
pub fn snapshot_priority_order(
    double_class: Vaddr,
    null: Vaddr,
    false_obj: Vaddr,
    true_obj: Vaddr,
    popularity: &alloc::collections::BTreeMap<Vaddr, usize>,
    popular_count: usize,
) -> Vec<Vaddr> {
    let mut order = alloc::vec![double_class, null, false_obj, true_obj];
    let mut rest: Vec<(Vaddr, usize)> = popularity
        .iter()
        .filter(|&(&addr, _)| addr != double_class && addr != null && addr != false_obj && addr != true_obj)
        .map(|(&addr, &count)| (addr, count))
        .collect();
    rest.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    order.extend(rest.into_iter().take(popular_count).map(|(addr, _)| addr));
    order
}

/// Step 7: the null/false/true singleton 2-word spacing invariant that
/// snapshot layout and certain interpreter fast paths (tagged-singleton
/// range checks) both depend on.
#[must_use]
pub fn verify_singleton_placement(null: Vaddr, false_obj: Vaddr, true_obj: Vaddr) -> bool {
    false_obj.diff(null) == 16 && true_obj.diff(false_obj) == 16
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::platform::MockVSpace;
    use crate::value::{Frame, HeapArray};

    fn function_format(_class: Vaddr) -> InstanceFormat {
        InstanceFormat::Function
    }

    fn build_function(mem: &mut MockVSpace, at: Vaddr, bytecode_len: u32) -> Vaddr {
        ObjectHeader::set_class(mem, at, Vaddr::new(0xF00D));
        HeapFunction::set_bytecode_len(mem, at, bytecode_len);
        HeapFunction::set_literal_count(mem, at, 0);
        HeapFunction::set_arity(mem, at, 0, false);
        at
    }

    #[test]
    fn cook_then_uncook_round_trips_bcp_after_move() {
        let mut mem = MockVSpace::new(1 << 16, Vaddr::new(0));
        let program_base = Vaddr::new(0x1000);
        let mut program_space = SemiSpace::new(program_base, 4096, CanResize::Yes);

        let function_size = HeapFunction::alloc_size(16, 0);
        let function = program_space.allocate(function_size, 8).unwrap();
        build_function(&mut mem, function, 16);
        let bytecode_start = HeapFunction::bytecode_start(&mem, function);

        let stack = Vaddr::new(0x20000);
        Stack::set_capacity(&mut mem, stack, 1);
        Stack::set_frame_count(&mut mem, stack, 1);
        let original_bcp = bytecode_start.add(5);
        Stack::set_frame(&mut mem, stack, 0, Frame { function: Value::heap_ptr(function), bcp: original_bcp });

        let deltas = cook_stacks(&mut mem, &[stack]);
        assert_eq!(deltas.len(), 1);
        assert_eq!(Stack::frame(&mem, stack, 0).bcp, function);

        let mut roots = [Value::heap_ptr(function)];
        let report = scavenge_program_space(&mut program_space, &mut mem, &mut roots, &function_format, &[]);
        assert_eq!(report.objects_copied, 1);

        let in_from_space = move |addr: Vaddr| addr >= program_base && addr < program_base.add(4096);
        fix_up_program_pointers_in_object(&mut mem, stack, InstanceFormat::Stack, in_from_space);

        uncook_stacks(&mut mem, &deltas);

        let moved_function = roots[0].as_heap_ptr();
        assert_ne!(moved_function, function);
        let restored = Stack::frame(&mem, stack, 0);
        assert_eq!(restored.function.as_heap_ptr(), moved_function);
        assert_eq!(restored.bcp, HeapFunction::bytecode_start(&mem, moved_function).add(5));
    }

    #[test]
    fn chain_collects_every_reachable_stack_exactly_once() {
        let mut mem = MockVSpace::new(1 << 16, Vaddr::new(0));

        fn stack_format(_class: Vaddr) -> InstanceFormat {
            InstanceFormat::Stack
        }

        let stack_a = Vaddr::new(0x4000);
        Stack::set_capacity(&mut mem, stack_a, 0);
        Stack::set_frame_count(&mut mem, stack_a, 0);
        let stack_b = Vaddr::new(0x5000);
        Stack::set_capacity(&mut mem, stack_b, 0);
        Stack::set_frame_count(&mut mem, stack_b, 0);

        let roots = [Value::heap_ptr(stack_a), Value::heap_ptr(stack_b)];
        let head = chain_live_stacks(&mut mem, &roots, &stack_format);
        let chained = stacks_in_chain(&mem, head);

        assert_eq!(chained.len(), 2);
        assert!(chained.contains(&stack_a));
        assert!(chained.contains(&stack_b));

        discard_chain(&mut mem, head);
        assert_eq!(Stack::next(&mem, stack_a), Vaddr::null());
        assert_eq!(Stack::next(&mem, stack_b), Vaddr::null());
    }

    #[test]
    fn popularity_counts_every_incoming_pointer() {
        let mut mem = MockVSpace::new(1 << 16, Vaddr::new(0));

        fn array_format(_class: Vaddr) -> InstanceFormat {
            InstanceFormat::Array
        }

        let shared = Vaddr::new(0x3000);
        ObjectHeader::set_class(&mut mem, shared, Vaddr::new(1));
        HeapArray::set_length(&mut mem, shared, 0);

        let a = Vaddr::new(0x3100);
        ObjectHeader::set_class(&mut mem, a, Vaddr::new(1));
        HeapArray::set_length(&mut mem, a, 1);
        HeapArray::set(&mut mem, a, 0, Value::heap_ptr(shared));

        let b = Vaddr::new(0x3200);
        ObjectHeader::set_class(&mut mem, b, Vaddr::new(1));
        HeapArray::set_length(&mut mem, b, 1);
        HeapArray::set(&mut mem, b, 0, Value::heap_ptr(shared));

        let roots = [Value::heap_ptr(a), Value::heap_ptr(b)];
        let counts = count_popularity(&mut mem, &roots, &array_format);
        assert_eq!(counts.get(&shared), Some(&2));
    }

    #[test]
    fn snapshot_priority_orders_singletons_before_popular_objects() {
        let mut popularity = alloc::collections::BTreeMap::new();
        popularity.insert(Vaddr::new(0x5000), 10);
        popularity.insert(Vaddr::new(0x6000), 3);

        let order = snapshot_priority_order(
            Vaddr::new(0x1000),
            Vaddr::new(0x1010),
            Vaddr::new(0x1020),
            Vaddr::new(0x1030),
            &popularity,
            1,
        );

        assert_eq!(order[..4], [Vaddr::new(0x1000), Vaddr::new(0x1010), Vaddr::new(0x1020), Vaddr::new(0x1030)]);
        assert_eq!(order[4], Vaddr::new(0x5000));
        assert_eq!(order.len(), 5);
    }

    #[test]
    fn singleton_placement_checks_two_word_stride() {
        let null = Vaddr::new(0x1000);
        let false_obj = null.add(16);
        let true_obj = false_obj.add(16);
        assert!(verify_singleton_placement(null, false_obj, true_obj));
        assert!(!verify_singleton_placement(null, false_obj, false_obj.add(8)));
    }

    #[test]
    fn priority_order_lands_first_in_to_space() {
        let mut mem = MockVSpace::new(1 << 16, Vaddr::new(0));
        let program_base = Vaddr::new(0x1000);
        let mut program_space = SemiSpace::new(program_base, 4096, CanResize::Yes);

        let a = program_space.allocate(HeapArray::alloc_size(0), 8).unwrap();
        ObjectHeader::set_class(&mut mem, a, Vaddr::new(1));
        HeapArray::set_length(&mut mem, a, 0);
        let special = program_space.allocate(HeapArray::alloc_size(0), 8).unwrap();
        ObjectHeader::set_class(&mut mem, special, Vaddr::new(1));
        HeapArray::set_length(&mut mem, special, 0);

        fn array_format(_class: Vaddr) -> InstanceFormat {
            InstanceFormat::Array
        }

        let mut roots = [Value::heap_ptr(a)];
        scavenge_program_space(&mut program_space, &mut mem, &mut roots, &array_format, &[special]);

        let special_moved = ObjectHeader::forwarding(&mem, special).unwrap();
        let a_moved = roots[0].as_heap_ptr();
        assert!(special_moved < a_moved, "priority object must be placed before later roots");
    }
}
