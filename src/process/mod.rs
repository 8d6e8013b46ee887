// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Process lifecycle (component 3's "Process" data model entry, §4.6).
//! A process owns a stack, a port list, and a parent back-link; it shares
//! the process heap with every other process rather than owning a private
//! memory region carved out of a fixed-capacity pool (see `lifecycle.rs`'s
//! module doc for why).

mod lifecycle;

pub use lifecycle::{schedule_process_for_deletion, spawn_process};

use crate::types::Vaddr;
use alloc::vec::Vec;

/// The program's live-process registry (§3's "Program" entry's "process
/// list", §4.6's "Process list operations are serialized by a mutex").
/// This type is the unsynchronized payload; an embedder wraps it in
/// `std::sync::Mutex` under `std` or `core::cell::RefCell` under `no_std`
/// per §5, rather than pulling in a lock-free crate.
#[derive(Debug, Default)]
pub struct ProcessTable {
    processes: Vec<Vaddr>,
}

impl ProcessTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn processes(&self) -> &[Vaddr] {
        &self.processes
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.processes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    pub fn insert(&mut self, process: Vaddr) {
        self.processes.push(process);
    }

    pub fn remove(&mut self, process: Vaddr) {
        self.processes.retain(|&p| p != process);
    }

    /// Replaces every entry with its forwarded address, in order. Used after
    /// a data GC: `forwarded` is the same addresses [`ProcessTable::processes`]
    /// returned, scavenged as `Value`s and unwrapped back to `Vaddr`.
    pub fn replace_all(&mut self, forwarded: Vec<Vaddr>) {
        self.processes = forwarded;
    }
}
