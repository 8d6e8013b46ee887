// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Breakpoints (§4.7). Grounded in the same idiom as [`crate::gc::write_barrier`]'s
//! `RememberedSet`: a flat table plus a secondary index, rather than storing
//! breakpoint state inside heap objects, since breakpoints are host-side
//! debugger bookkeeping rather than data the interpreter's bytecode touches.

use crate::types::Vaddr;
use crate::value::Value;
use alloc::collections::BTreeMap;
use alloc::vec::Vec;

/// `{ function, bytecode_index, id, one_shot?, coroutine?, stack_height? }`
/// (§3's "Breakpoint" entry). A non-null `coroutine` + `stack_height` makes
/// this a step-over breakpoint: it only fires when the interpreter's stack
/// pointer matches `stack_height` exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Breakpoint {
    pub function: Value,
    pub bytecode_index: u32,
    pub id: u32,
    pub one_shot: bool,
    pub coroutine: Value,
    pub stack_height: Option<u64>,
}

/// Owns the `bcp -> Breakpoint` mapping the interpreter consults at every
/// bytecode boundary (§5's designated safepoints). Kept separate from
/// [`crate::program::Program`] itself so a VM can run without a debugger
/// attached at zero cost beyond an `Option`.
#[derive(Debug, Default)]
pub struct DebugInfo {
    breakpoints: Vec<Breakpoint>,
    by_bcp: BTreeMap<Vaddr, usize>,
    next_id: u32,
    is_stepping: bool,
}

impl DebugInfo {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_stepping(&self) -> bool {
        self.is_stepping
    }

    pub fn set_stepping(&mut self, stepping: bool) {
        self.is_stepping = stepping;
    }

    #[must_use]
    pub fn breakpoints(&self) -> &[Breakpoint] {
        &self.breakpoints
    }

    /// Inserts a breakpoint at `bcp` for `function`/`bytecode_index`.
    /// Idempotent: if one is already registered for this
    /// `(function, bytecode_index)` pair, returns its existing id rather
    /// than creating a duplicate.
    #[allow(clippy::too_many_arguments)]
    pub fn set_breakpoint(
        &mut self,
        bcp: Vaddr,
        function: Value,
        bytecode_index: u32,
        one_shot: bool,
        coroutine: Value,
        stack_height: Option<u64>,
    ) -> u32 {
        if let Some(&index) = self.by_bcp.get(&bcp) {
            if let Some(existing) = self.breakpoints.get(index) {
                if existing.function == function && existing.bytecode_index == bytecode_index {
                    return existing.id;
                }
            }
        }

        let id = self.next_id;
        self.next_id += 1;
        let index = self.breakpoints.len();
        self.breakpoints.push(Breakpoint {
            function,
            bytecode_index,
            id,
            one_shot,
            coroutine,
            stack_height,
        });
        self.by_bcp.insert(bcp, index);
        id
    }

    pub fn delete_breakpoint(&mut self, id: u32) {
        if let Some(pos) = self.breakpoints.iter().position(|b| b.id == id) {
            self.breakpoints.remove(pos);
            self.by_bcp.retain(|_, index| {
                if *index == pos {
                    false
                } else {
                    if *index > pos {
                        *index -= 1;
                    }
                    true
                }
            });
        }
    }

    /// `true` when the interpreter should halt at `bcp`: single-step mode
    /// fires unconditionally; otherwise a registered breakpoint fires if
    /// present and, for step-over entries, only when `sp` matches the
    /// recorded `stack_height`. A fired one-shot breakpoint is removed.
    pub fn should_break(&mut self, bcp: Vaddr, sp: u64) -> bool {
        if self.is_stepping {
            return true;
        }
        let Some(&index) = self.by_bcp.get(&bcp) else {
            return false;
        };
        let Some(bp) = self.breakpoints.get(index).copied() else {
            return false;
        };
        if let Some(expected) = bp.stack_height {
            if expected != sp {
                return false;
            }
        }
        if bp.one_shot {
            self.delete_breakpoint(bp.id);
        }
        true
    }

    /// Every `coroutine` field, for inclusion in the data-GC root set:
    /// breakpoints reference process-heap objects that can move during a
    /// scavenge or old-space collection even though no program GC ran.
    #[must_use]
    pub fn process_roots(&self) -> Vec<Value> {
        self.breakpoints.iter().map(|b| b.coroutine).collect()
    }

    /// Writes back forwarded `coroutine` values after a data GC. `forwarded`
    /// must be the same slice previously returned by
    /// [`DebugInfo::process_roots`], scavenged in place.
    pub fn apply_process_roots(&mut self, forwarded: &[Value]) {
        for (bp, value) in self.breakpoints.iter_mut().zip(forwarded) {
            bp.coroutine = *value;
        }
    }

    /// Every `function` field, for the program-GC fix-up pass.
    #[must_use]
    pub fn program_roots(&self) -> Vec<Value> {
        self.breakpoints.iter().map(|b| b.function).collect()
    }

    /// Step 6 of the program GC protocol (§4.5): after `function` fields
    /// have been forwarded to their post-GC addresses, recompute every
    /// breakpoint's bcp (bytecode_index is unaffected by the move) and
    /// rebuild the bcp index from scratch.
    pub fn recompute_all_bcps<M: crate::platform::MemorySpace>(&mut self, mem: &M, forwarded_functions: &[Value]) {
        log::debug!("rebuilding breakpoint table: {} breakpoints after program GC", self.breakpoints.len());
        for (bp, function) in self.breakpoints.iter_mut().zip(forwarded_functions) {
            bp.function = *function;
        }
        self.by_bcp.clear();
        for (index, bp) in self.breakpoints.iter().enumerate() {
            let bcp = crate::gc::recompute_breakpoint_bcp(mem, bp.function, bp.bytecode_index);
            self.by_bcp.insert(bcp, index);
        }
    }
}
