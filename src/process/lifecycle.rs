// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! `SpawnProcess` / `ScheduleProcessForDeletion` (§4.6). Both operate
//! directly against the shared [`TwoSpaceHeap`] -- processes here are
//! ordinary heap objects, not regions carved out of a dedicated pool, since
//! the process heap is shared rather than partitioned per-process.

use super::ProcessTable;
use crate::error::Signal;
use crate::gc::TwoSpaceHeap;
use crate::platform::MemorySpace;
use crate::types::Vaddr;
use crate::value::{Frame, HeapProcess, ObjectHeader, ProcessState, Stack, Value};

/// Allocates a process, its stack, and an initial frame for `entry` at
/// `entry_pc`. On any failure -- stack allocation, the entry frame not
/// fitting `stack_capacity`, or process allocation -- nothing is registered
/// in `table`; the abandoned allocation is ordinary garbage the next
/// scavenge reclaims. On success, `parent`'s triangle count is incremented.
#[allow(clippy::too_many_arguments)]
pub fn spawn_process<M: MemorySpace>(
    heap: &mut TwoSpaceHeap,
    mem: &mut M,
    table: &mut ProcessTable,
    process_class: Vaddr,
    stack_class: Vaddr,
    parent: Option<Vaddr>,
    stack_capacity: u32,
    entry: Value,
    entry_pc: Vaddr,
) -> Option<Vaddr> {
    let stack_addr = heap.allocate(Stack::alloc_size(stack_capacity), 8)?;
    ObjectHeader::set_class(mem, stack_addr, stack_class);
    Stack::set_capacity(mem, stack_addr, stack_capacity);
    Stack::set_frame_count(mem, stack_addr, 0);
    Stack::set_next(mem, stack_addr, Vaddr::null());

    if !Stack::push_frame(mem, stack_addr, Frame { function: entry, bcp: entry_pc }) {
        return None;
    }

    let process_addr = heap.allocate(HeapProcess::SIZE, 8)?;
    ObjectHeader::set_class(mem, process_addr, process_class);
    HeapProcess::set_stack(mem, process_addr, Value::heap_ptr(stack_addr));
    HeapProcess::set_ports(mem, process_addr, Value::smi(0));
    HeapProcess::set_parent(
        mem,
        process_addr,
        parent.map_or(Value::smi(0), Value::heap_ptr),
    );
    HeapProcess::set_triangle_count(mem, process_addr, 1);
    HeapProcess::set_state(mem, process_addr, ProcessState::Running);
    HeapProcess::set_allocation_failure(mem, process_addr, false);

    table.insert(process_addr);
    if let Some(parent_addr) = parent {
        HeapProcess::increment_triangle_count(mem, parent_addr);
    }
    Some(process_addr)
}

/// Terminates `process` with `signal`, removes it from `table`, then walks
/// the parent chain decrementing triangle counts. An ancestor whose count
/// reaches zero is itself removed from `table` and the walk continues to
/// its parent; the first ancestor with descendants remaining stops it.
/// Returns `signal` only when `process` had no parent (it was the main
/// process), for the caller to use as the program's exit kind.
pub fn schedule_process_for_deletion<M: MemorySpace>(
    mem: &mut M,
    table: &mut ProcessTable,
    process: Vaddr,
    signal: Signal,
) -> Option<Signal> {
    HeapProcess::set_state(mem, process, ProcessState::Terminated);
    table.remove(process);

    let is_main = !HeapProcess::parent(mem, process).is_heap_object();
    let mut ancestor = HeapProcess::parent(mem, process);
    while ancestor.is_heap_object() {
        let addr = ancestor.as_heap_ptr();
        let remaining = HeapProcess::decrement_triangle_count(mem, addr);
        if remaining != 0 {
            break;
        }
        table.remove(addr);
        ancestor = HeapProcess::parent(mem, addr);
    }

    is_main.then_some(signal)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::platform::MockVSpace;
    use crate::types::Vaddr;

    fn heap_and_mem() -> (TwoSpaceHeap, MockVSpace) {
        let heap = TwoSpaceHeap::new(Vaddr::new(0), 4096, Vaddr::new(0x10000), 4096, 1024);
        let mem = MockVSpace::new(0x20000, Vaddr::new(0));
        (heap, mem)
    }

    #[test]
    fn spawn_registers_process_and_bumps_parent_count() {
        let (mut heap, mut mem) = heap_and_mem();
        let mut table = ProcessTable::new();
        let process_class = Vaddr::new(8);
        let stack_class = Vaddr::new(16);

        let parent = spawn_process(
            &mut heap, &mut mem, &mut table, process_class, stack_class, None, 4,
            Value::heap_ptr(Vaddr::new(512)), Vaddr::new(600),
        )
        .expect("parent spawn succeeds");
        assert_eq!(HeapProcess::triangle_count(&mem, parent), 1);

        let child = spawn_process(
            &mut heap, &mut mem, &mut table, process_class, stack_class, Some(parent), 4,
            Value::heap_ptr(Vaddr::new(512)), Vaddr::new(600),
        )
        .expect("child spawn succeeds");

        assert_eq!(HeapProcess::triangle_count(&mem, parent), 2);
        assert_eq!(table.processes(), &[parent, child]);
    }

    #[test]
    fn spawn_fails_cleanly_when_stack_capacity_is_zero() {
        let (mut heap, mut mem) = heap_and_mem();
        let mut table = ProcessTable::new();
        let result = spawn_process(
            &mut heap, &mut mem, &mut table, Vaddr::new(8), Vaddr::new(16), None, 0,
            Value::heap_ptr(Vaddr::new(512)), Vaddr::new(600),
        );
        assert!(result.is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn deleting_child_does_not_remove_parent_with_other_descendants() {
        let (mut heap, mut mem) = heap_and_mem();
        let mut table = ProcessTable::new();
        let parent = spawn_process(
            &mut heap, &mut mem, &mut table, Vaddr::new(8), Vaddr::new(16), None, 4,
            Value::heap_ptr(Vaddr::new(512)), Vaddr::new(600),
        )
        .unwrap();
        let child_a = spawn_process(
            &mut heap, &mut mem, &mut table, Vaddr::new(8), Vaddr::new(16), Some(parent), 4,
            Value::heap_ptr(Vaddr::new(512)), Vaddr::new(600),
        )
        .unwrap();
        let child_b = spawn_process(
            &mut heap, &mut mem, &mut table, Vaddr::new(8), Vaddr::new(16), Some(parent), 4,
            Value::heap_ptr(Vaddr::new(512)), Vaddr::new(600),
        )
        .unwrap();

        let exit = schedule_process_for_deletion(&mut mem, &mut table, child_a, Signal::Terminated);
        assert_eq!(exit, None);
        assert!(!table.processes().contains(&child_a));
        assert!(table.processes().contains(&parent));
        assert_eq!(HeapProcess::triangle_count(&mem, parent), 2);

        let exit = schedule_process_for_deletion(&mut mem, &mut table, child_b, Signal::Terminated);
        assert_eq!(exit, None);
        assert_eq!(HeapProcess::triangle_count(&mem, parent), 1);
        assert!(table.processes().contains(&parent));
    }

    #[test]
    fn three_level_tree_removes_every_ancestor_only_once_fully_descendant_free() {
        let (mut heap, mut mem) = heap_and_mem();
        let mut table = ProcessTable::new();
        let p = spawn_process(
            &mut heap, &mut mem, &mut table, Vaddr::new(8), Vaddr::new(16), None, 4,
            Value::heap_ptr(Vaddr::new(512)), Vaddr::new(600),
        )
        .unwrap();
        let a = spawn_process(
            &mut heap, &mut mem, &mut table, Vaddr::new(8), Vaddr::new(16), Some(p), 4,
            Value::heap_ptr(Vaddr::new(512)), Vaddr::new(600),
        )
        .unwrap();
        let b = spawn_process(
            &mut heap, &mut mem, &mut table, Vaddr::new(8), Vaddr::new(16), Some(p), 4,
            Value::heap_ptr(Vaddr::new(512)), Vaddr::new(600),
        )
        .unwrap();
        let c = spawn_process(
            &mut heap, &mut mem, &mut table, Vaddr::new(8), Vaddr::new(16), Some(a), 4,
            Value::heap_ptr(Vaddr::new(512)), Vaddr::new(600),
        )
        .unwrap();
        assert_eq!(HeapProcess::triangle_count(&mem, p), 3);
        assert_eq!(HeapProcess::triangle_count(&mem, a), 2);

        // Killing C only drops A's count; P still has B and A alive.
        let exit = schedule_process_for_deletion(&mut mem, &mut table, c, Signal::Terminated);
        assert_eq!(exit, None);
        assert_eq!(HeapProcess::triangle_count(&mem, a), 1);
        assert_eq!(HeapProcess::triangle_count(&mem, p), 3);
        assert!(table.processes().contains(&a));
        assert!(table.processes().contains(&p));

        // Killing B drops P's count to 2; A is still alive so the walk
        // never reaches past B.
        let exit = schedule_process_for_deletion(&mut mem, &mut table, b, Signal::Terminated);
        assert_eq!(exit, None);
        assert_eq!(HeapProcess::triangle_count(&mem, p), 2);
        assert!(table.processes().contains(&p));

        // Killing A (now childless) drops A's own count to zero, removing
        // A, and the walk continues up to P, whose count drops to 1 -- not
        // yet zero, so P survives with its own exit kind uncaptured.
        let exit = schedule_process_for_deletion(&mut mem, &mut table, a, Signal::Terminated);
        assert_eq!(exit, None);
        assert!(!table.processes().contains(&a));
        assert_eq!(HeapProcess::triangle_count(&mem, p), 1);
        assert_eq!(table.processes(), &[p]);

        // Finally P itself, the main process, is deleted directly -- its
        // own exit kind is captured since it has no parent.
        let exit = schedule_process_for_deletion(&mut mem, &mut table, p, Signal::Terminated);
        assert_eq!(exit, Some(Signal::Terminated));
        assert!(table.is_empty());
    }

    #[test]
    fn deleting_the_main_process_captures_exit_signal() {
        let (mut heap, mut mem) = heap_and_mem();
        let mut table = ProcessTable::new();
        let main = spawn_process(
            &mut heap, &mut mem, &mut table, Vaddr::new(8), Vaddr::new(16), None, 4,
            Value::heap_ptr(Vaddr::new(512)), Vaddr::new(600),
        )
        .unwrap();

        let exit = schedule_process_for_deletion(&mut mem, &mut table, main, Signal::UncaughtException);
        assert_eq!(exit, Some(Signal::UncaughtException));
        assert!(table.is_empty());
    }
}
