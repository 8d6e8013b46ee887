// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! The program: the immutable code heap, the shared process heap, the
//! process list, named root slots, and (optionally) a debugger, wired
//! together into the handful of operations a scheduler and an interpreter
//! actually call.

use crate::config::VmConfig;
use crate::debug::DebugInfo;
use crate::error::Signal;
use crate::gc::{
    self, chain_live_stacks, collect_old_space, cook_stacks, count_popularity, discard_chain,
    fix_up_program_pointers_in_object, scavenge, scavenge_program_space, snapshot_priority_order,
    stacks_in_chain, uncook_stacks, verify_singleton_placement, walk_reachable, CanResize,
    ClassFormatLookup, CollectionMode, FrameDelta, OldSpaceGcReport, RememberedSet, ScavengeReport,
    SemiSpace, TwoSpaceHeap, WeakTable,
};
use crate::platform::MemorySpace;
use crate::process::{self, ProcessTable};
use crate::types::Vaddr;
use crate::value::{HeapProcess, ObjectHeader, Stack, Value};
use alloc::vec::Vec;

/// The named root slots every program carries outside its process list:
/// the `double`/`null`/`false`/`true` objects whose 2-word spacing the
/// snapshot layout depends on, and the classes `SpawnProcess` stamps onto
/// freshly allocated processes and stacks.
#[derive(Debug, Clone, Copy)]
pub struct Singletons {
    pub null: Vaddr,
    pub false_obj: Vaddr,
    pub true_obj: Vaddr,
    pub double_class: Vaddr,
    pub process_class: Vaddr,
    pub stack_class: Vaddr,
}

/// State threaded between [`Program::prepare_program_gc`],
/// [`Program::perform_program_gc`] and [`Program::finish_program_gc`].
/// Split into three calls (rather than one method) because the precise
/// pre-pass and the chaining pass are themselves ordinary data
/// collections a scheduler may want to interleave with other bookkeeping
/// before committing to the cook/scavenge/uncook bracket.
#[derive(Debug, Default)]
pub struct ProgramGcSession {
    stack_chain_head: Vaddr,
    deltas: Vec<FrameDelta>,
    forwarded_breakpoint_functions: Vec<Value>,
}

/// Holds the program heap (immutable at runtime: classes, function
/// bytecode, canonical singletons), the process heap every process
/// shares, the process list, and an optional attached debugger.
pub struct Program {
    program_space: SemiSpace,
    heap: TwoSpaceHeap,
    remembered_set: RememberedSet,
    processes: ProcessTable,
    singletons: Singletons,
    extra_roots: Vec<Value>,
    debug_info: Option<DebugInfo>,
    exit_kind: Option<Signal>,
    next_old_space_mode: CollectionMode,
    config: VmConfig,
}

impl Program {
    #[must_use]
    pub fn new(
        config: VmConfig,
        program_base: Vaddr,
        new_space_base: Vaddr,
        old_space_base: Vaddr,
        singletons: Singletons,
        extra_roots: Vec<Value>,
    ) -> Self {
        Self {
            program_space: SemiSpace::new(program_base, config.program_chunk_size, CanResize::Yes),
            heap: TwoSpaceHeap::new(
                new_space_base,
                config.new_space_chunk_size,
                old_space_base,
                config.old_space_chunk_size,
                config.large_object_threshold,
            ),
            remembered_set: RememberedSet::new(),
            processes: ProcessTable::new(),
            singletons,
            extra_roots,
            debug_info: None,
            exit_kind: None,
            next_old_space_mode: CollectionMode::Sweep,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    #[must_use]
    pub fn singletons(&self) -> &Singletons {
        &self.singletons
    }

    #[must_use]
    pub fn processes(&self) -> &[Vaddr] {
        self.processes.processes()
    }

    #[must_use]
    pub fn exit_kind(&self) -> Option<Signal> {
        self.exit_kind
    }

    #[must_use]
    pub fn needs_old_space_gc(&self) -> bool {
        self.heap.needs_old_space_gc()
    }

    /// `Heap::allocate`: the interpreter's allocation slow path. Large
    /// objects route to old space, everything else bumps new space.
    pub fn allocate(&mut self, size: u64, align: u64) -> Option<Vaddr> {
        self.heap.allocate(size, align)
    }

    /// `Heap::write_barrier`: call from every mutator pointer store.
    pub fn write_barrier(&mut self, container: Vaddr, is_container_old: bool, is_value_new: bool) {
        gc::write_barrier(&mut self.remembered_set, container, is_container_old, is_value_new);
    }

    /// `ProcessTable::spawn_process`. Stamps the program's own
    /// `process_class`/`stack_class` onto the new objects.
    pub fn spawn_process<M: MemorySpace>(
        &mut self,
        mem: &mut M,
        parent: Option<Vaddr>,
        stack_capacity: u32,
        entry: Value,
        entry_pc: Vaddr,
    ) -> Option<Vaddr> {
        process::spawn_process(
            &mut self.heap,
            mem,
            &mut self.processes,
            self.singletons.process_class,
            self.singletons.stack_class,
            parent,
            stack_capacity,
            entry,
            entry_pc,
        )
    }

    /// `ScheduleProcessForDeletion`. Records the program's exit kind if
    /// `process` was the main process.
    pub fn schedule_process_for_deletion<M: MemorySpace>(&mut self, mem: &mut M, process: Vaddr, signal: Signal) {
        if let Some(exit) = process::schedule_process_for_deletion(mem, &mut self.processes, process, signal) {
            self.exit_kind = Some(exit);
        }
    }

    /// `IterateRoots`: every process address, plus every breakpoint's held
    /// process pointer.
    pub fn iterate_roots(&self, mut visitor: impl FnMut(Value)) {
        for &addr in self.processes.processes() {
            visitor(Value::heap_ptr(addr));
        }
        if let Some(debug) = &self.debug_info {
            for coroutine in debug.process_roots() {
                visitor(coroutine);
            }
        }
    }

    pub fn ensure_debugger_attached(&mut self) {
        self.debug_info.get_or_insert_with(DebugInfo::new);
    }

    #[allow(clippy::too_many_arguments)]
    pub fn set_breakpoint(
        &mut self,
        bcp: Vaddr,
        function: Value,
        bytecode_index: u32,
        one_shot: bool,
        coroutine: Value,
        stack_height: Option<u64>,
    ) -> Option<u32> {
        self.debug_info
            .as_mut()
            .map(|debug| debug.set_breakpoint(bcp, function, bytecode_index, one_shot, coroutine, stack_height))
    }

    pub fn delete_breakpoint(&mut self, id: u32) {
        if let Some(debug) = &mut self.debug_info {
            debug.delete_breakpoint(id);
        }
    }

    pub fn should_break(&mut self, bcp: Vaddr, sp: u64) -> bool {
        self.debug_info.as_mut().is_some_and(|debug| debug.should_break(bcp, sp))
    }

    pub fn set_stepping(&mut self, stepping: bool) {
        if let Some(debug) = &mut self.debug_info {
            debug.set_stepping(stepping);
        }
    }

    #[must_use]
    pub fn is_stepping(&self) -> bool {
        self.debug_info.as_ref().is_some_and(DebugInfo::is_stepping)
    }

    /// Every root the data collectors (new space, old space) need:
    /// every process, plus every breakpoint's coroutine field. Named slots
    /// and program pointers held by processes are not data roots -- they
    /// live in, or point into, program space, which the data collectors
    /// never touch.
    fn data_roots(&self) -> Vec<Value> {
        let mut roots: Vec<Value> = self.processes.processes().iter().map(|&p| Value::heap_ptr(p)).collect();
        if let Some(debug) = &self.debug_info {
            roots.extend(debug.process_roots());
        }
        roots
    }

    /// Writes a post-collection `data_roots` vector back: the leading
    /// entries become the process table (in order), the remainder go back
    /// into the breakpoint coroutine fields.
    fn apply_data_roots(&mut self, roots: &[Value]) {
        let process_count = self.processes.len();
        let forwarded: Vec<Vaddr> = roots[..process_count].iter().map(|v| v.as_heap_ptr()).collect();
        self.processes.replace_all(forwarded);
        if let Some(debug) = &mut self.debug_info {
            debug.apply_process_roots(&roots[process_count..]);
        }
    }

    /// Registers every live process's port-list head as a weak slot, in the
    /// address space the caller is about to collect. Shared by
    /// `collect_new_space` and `collect_old_space` so a process's ports are
    /// swept every data-GC cycle, per the process object's own weak-port
    /// contract (see [`crate::value::HeapProcess::ports`]).
    fn register_port_weak_slots(&self) -> WeakTable {
        let mut weak = WeakTable::new();
        for &process in self.processes.processes() {
            weak.register(process.add(HeapProcess::ports_offset()));
        }
        weak
    }

    /// `CollectNewSpace`. A process's port-list head is a weak reference:
    /// it is registered before the scavenge and swept afterward against the
    /// from-space boundary this cycle collected, clearing any port whose
    /// target never got forwarded and rewriting any that moved.
    pub fn collect_new_space<M: MemorySpace>(&mut self, mem: &mut M, class_format: ClassFormatLookup<'_>) -> ScavengeReport {
        let from_base = self.heap.new_space().base();
        let from_end = self.heap.new_space().end();
        let in_from_space = move |addr: Vaddr| addr >= from_base && addr < from_end;

        let mut weak = self.register_port_weak_slots();
        let mut roots = self.data_roots();
        let report =
            scavenge(&mut self.heap, mem, &mut roots, &mut self.remembered_set, class_format, self.config.promotion_age_threshold);
        self.apply_data_roots(&roots);

        weak.process(
            mem,
            |mem, addr| !in_from_space(addr) || ObjectHeader::forwarding(mem, addr).is_some(),
            |mem, addr| if in_from_space(addr) { ObjectHeader::forwarding(mem, addr).unwrap_or(addr) } else { addr },
        );

        report
    }

    /// `CollectOldSpace`. Alternates sweep/compact per the previous
    /// cycle's mode rather than taking a mode argument, matching the
    /// old-space collector's own alternation rule. Port-list heads are
    /// registered the same way `collect_new_space` does, so a dead port is
    /// cleared whichever mode runs.
    pub fn collect_old_space<M: MemorySpace>(
        &mut self,
        mem: &mut M,
        class_format: ClassFormatLookup<'_>,
    ) -> OldSpaceGcReport {
        let mode = self.next_old_space_mode;
        let mut weak = self.register_port_weak_slots();
        let mut roots = self.data_roots();
        let report = collect_old_space(
            &mut self.heap.old_space,
            mem,
            &mut roots,
            &mut self.remembered_set,
            &mut weak,
            class_format,
            mode,
        );
        self.apply_data_roots(&roots);
        self.next_old_space_mode = match mode {
            CollectionMode::Sweep => CollectionMode::Compact,
            CollectionMode::Compact => CollectionMode::Sweep,
        };
        report
    }

    /// The `[double_class, null, false_obj, true_obj]` ordering the
    /// 2-word spacing invariant depends on.
    fn priority_singletons(&self) -> Vec<Vaddr> {
        alloc::vec![
            self.singletons.double_class,
            self.singletons.null,
            self.singletons.false_obj,
            self.singletons.true_obj,
        ]
    }

    fn program_roots_vec(&self) -> Vec<Value> {
        let mut roots =
            alloc::vec![Value::heap_ptr(self.singletons.process_class), Value::heap_ptr(self.singletons.stack_class)];
        roots.extend(self.extra_roots.iter().copied());
        roots
    }

    /// Counts pointer-field references across the whole program-reachable
    /// graph and returns the `snapshot_popular_count` most-referenced
    /// addresses, to pass as the `popular_objects` argument to
    /// [`Program::perform_program_gc`] for a `SnapshotGC` run.
    pub fn compute_popular_objects<M: MemorySpace>(&self, mem: &mut M, class_format: ClassFormatLookup<'_>) -> Vec<Vaddr> {
        let roots = self.program_roots_vec();
        let popularity = count_popularity(mem, &roots, class_format);
        let order = snapshot_priority_order(
            self.singletons.double_class,
            self.singletons.null,
            self.singletons.false_obj,
            self.singletons.true_obj,
            &popularity,
            self.config.snapshot_popular_count,
        );
        order[4..].to_vec()
    }

    /// `PrepareProgramGC`: a precise data-GC pre-pass to eliminate
    /// floating garbage stacks, then chains every remaining live stack.
    pub fn prepare_program_gc<M: MemorySpace>(&mut self, mem: &mut M, class_format: ClassFormatLookup<'_>) -> ProgramGcSession {
        self.collect_old_space(mem, class_format);
        self.collect_new_space(mem, class_format);
        let roots = self.data_roots();
        let stack_chain_head = chain_live_stacks(mem, &roots, class_format);
        ProgramGcSession { stack_chain_head, ..ProgramGcSession::default() }
    }

    /// `PerformProgramGC`: cooks every chained stack, scavenges program
    /// space (forwarding `popular_objects` first, after the singletons,
    /// for a `SnapshotGC` run -- pass `&[]` otherwise), then fixes up
    /// every program pointer held by a reachable data object (a process's
    /// stack frames are the only such pointers this crate's object shapes
    /// carry). Every cooked frame's function is added to the scavenge root
    /// set directly, not just the named program roots -- a function held
    /// only by a live stack, with no other program-space referent, would
    /// otherwise never get forwarded, leaving the frame's later fix-up pass
    /// with nothing to rewrite it to.
    pub fn perform_program_gc<M: MemorySpace>(
        &mut self,
        mem: &mut M,
        session: &mut ProgramGcSession,
        class_format: ClassFormatLookup<'_>,
        popular_objects: &[Vaddr],
    ) {
        let stacks = stacks_in_chain(mem, session.stack_chain_head);
        session.deltas = cook_stacks(mem, &stacks);

        let from_base = self.program_space.base();
        let from_end = self.program_space.end();

        let mut priority_order = self.priority_singletons();
        priority_order.extend_from_slice(popular_objects);

        let mut program_roots = self.program_roots_vec();
        for &stack in &stacks {
            let frame_count = Stack::frame_count(mem, stack);
            for index in 0..frame_count {
                let function = Stack::frame(mem, stack, index).function;
                if function.is_heap_object() {
                    program_roots.push(function);
                }
            }
        }
        let debug_root_start = program_roots.len();
        if let Some(debug) = &self.debug_info {
            program_roots.extend(debug.program_roots());
        }

        scavenge_program_space(&mut self.program_space, mem, &mut program_roots, class_format, &priority_order);

        self.singletons.process_class = program_roots[0].as_heap_ptr();
        self.singletons.stack_class = program_roots[1].as_heap_ptr();
        let extra_len = self.extra_roots.len();
        self.extra_roots.clear();
        self.extra_roots.extend_from_slice(&program_roots[2..2 + extra_len]);
        session.forwarded_breakpoint_functions = program_roots[debug_root_start..].to_vec();

        for slot in [
            &mut self.singletons.double_class,
            &mut self.singletons.null,
            &mut self.singletons.false_obj,
            &mut self.singletons.true_obj,
        ] {
            if let Some(to) = ObjectHeader::forwarding(mem, *slot) {
                *slot = to;
            }
        }

        let in_from_space = move |addr: Vaddr| addr >= from_base && addr < from_end;
        let data_roots = self.data_roots();
        walk_reachable(mem, &data_roots, class_format, |mem, addr, format| {
            let class = ObjectHeader::class(mem, addr);
            if in_from_space(class) {
                if let Some(to) = ObjectHeader::forwarding(mem, class) {
                    ObjectHeader::set_class(mem, addr, to);
                }
            }
            fix_up_program_pointers_in_object(mem, addr, format, in_from_space);
        });
    }

    /// `FinishProgramGC`: restores every cooked frame's bcp, discards the
    /// stack chain, rebuilds the breakpoint index against the moved
    /// functions, and returns whether the 2-word singleton placement
    /// invariant still holds.
    pub fn finish_program_gc<M: MemorySpace>(&mut self, mem: &mut M, session: ProgramGcSession) -> bool {
        uncook_stacks(mem, &session.deltas);
        discard_chain(mem, session.stack_chain_head);

        if let Some(debug) = &mut self.debug_info {
            debug.recompute_all_bcps(mem, &session.forwarded_breakpoint_functions);
        }

        verify_singleton_placement(self.singletons.null, self.singletons.false_obj, self.singletons.true_obj)
    }
}
