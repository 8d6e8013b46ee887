// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Weak-pointer and port-cleanup hooks. A weak slot holds a `Value` that the
//! collector clears to `Value::smi(0)` rather than keeping alive, if nothing
//! else reaches the referent by the end of marking. Ports are modeled the
//! same way: a process's port list is a set of weak slots the collector
//! sweeps after marking, dropping entries whose target died.

use crate::platform::MemorySpace;
use crate::types::Vaddr;
use crate::value::{MarkColor, ObjectHeader, Value};
use alloc::vec::Vec;

/// Registered weak slots, given as the address of the `Value` word itself
/// so the collector can read, judge, and clear it in place.
#[derive(Default)]
pub struct WeakTable {
    slots: Vec<Vaddr>,
}

impl WeakTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, slot: Vaddr) {
        self.slots.push(slot);
    }

    /// Clears every weak slot whose referent `is_alive` judges dead, leaving
    /// a live slot's referent rewritten through `forward` (the new address a
    /// copying or compacting pass may have moved it to; the identity
    /// function if the collector in question never moves survivors). Never
    /// fails, per §7.
    ///
    /// `is_alive`/`forward` let the same sweep serve both collectors: the
    /// new-space scavenger judges liveness by whether a from-space address
    /// was forwarded this cycle, while the old-space collector judges it by
    /// the mark color the preceding mark phase left behind.
    pub fn process<M: MemorySpace>(
        &mut self,
        mem: &mut M,
        is_alive: impl Fn(&M, Vaddr) -> bool,
        forward: impl Fn(&M, Vaddr) -> Vaddr,
    ) -> usize {
        let mut cleared = 0;
        for &slot in &self.slots {
            let v = Value::from_word(mem.read(slot));
            if v.is_heap_object() {
                let addr = v.as_heap_ptr();
                if is_alive(mem, addr) {
                    let to = forward(mem, addr);
                    if to != addr {
                        mem.write(slot, Value::heap_ptr(to).word());
                    }
                } else {
                    mem.write(slot, Value::smi(0).word());
                    cleared += 1;
                }
            }
        }
        cleared
    }

    /// The old-space collector's liveness judgment: a reached object is
    /// marked black by the preceding full-graph mark phase.
    pub fn mark_is_alive<M: MemorySpace>(mem: &M, addr: Vaddr) -> bool {
        ObjectHeader::mark(mem, addr) == MarkColor::Black
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::platform::MockVSpace;

    #[test]
    fn dead_weak_reference_is_cleared() {
        let mut mem = MockVSpace::new(4096, Vaddr::new(0));
        let target = Vaddr::new(256);
        let slot = Vaddr::new(64);
        mem.write(slot, Value::heap_ptr(target).word());

        let mut table = WeakTable::new();
        table.register(slot);
        let cleared = table.process(&mut mem, WeakTable::mark_is_alive, |_mem, addr| addr);

        assert_eq!(cleared, 1);
        assert!(Value::from_word(mem.read(slot)).is_smi());
    }

    #[test]
    fn live_weak_reference_survives() {
        let mut mem = MockVSpace::new(4096, Vaddr::new(0));
        let target = Vaddr::new(256);
        let slot = Vaddr::new(64);
        mem.write(slot, Value::heap_ptr(target).word());
        ObjectHeader::set_mark(&mut mem, target, MarkColor::Black);

        let mut table = WeakTable::new();
        table.register(slot);
        let cleared = table.process(&mut mem, WeakTable::mark_is_alive, |_mem, addr| addr);

        assert_eq!(cleared, 0);
        assert_eq!(Value::from_word(mem.read(slot)).as_heap_ptr(), target);
    }

    #[test]
    fn forwarded_weak_reference_is_rewritten_to_new_address() {
        let mut mem = MockVSpace::new(4096, Vaddr::new(0));
        let from = Vaddr::new(256);
        let to = Vaddr::new(512);
        let slot = Vaddr::new(64);
        mem.write(slot, Value::heap_ptr(from).word());
        ObjectHeader::set_forwarding(&mut mem, from, to);

        let mut table = WeakTable::new();
        table.register(slot);
        let cleared = table.process(
            &mut mem,
            |mem, addr| ObjectHeader::forwarding(mem, addr).is_some(),
            |mem, addr| ObjectHeader::forwarding(mem, addr).unwrap_or(addr),
        );

        assert_eq!(cleared, 0);
        assert_eq!(Value::from_word(mem.read(slot)).as_heap_ptr(), to);
    }
}
