// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! The memory subsystem's collectors, laid out by generation: a copying
//! scavenger over new space (§4.3), a mark-sweep/mark-compact collector
//! over old space (§4.4), and a dedicated precise collector for program
//! space (§4.5 -- see [`crate::program`]). Every collector shares the
//! shape-directed traversal in [`trace`] rather than re-deriving object
//! layout knowledge of its own.

mod allocator;
mod old_space;
mod old_space_gc;
mod program_gc;
mod scavenger;
mod semi_space;
mod trace;
mod weak;
mod write_barrier;

pub use allocator::{AllocationFailure, NoAllocationFailureScope, TwoSpaceHeap};
pub use old_space::OldSpace;
pub use old_space_gc::{collect as collect_old_space, CollectionMode, OldSpaceGcReport};
pub use program_gc::{
    chain_live_stacks, cook_stacks, count_popularity, discard_chain, fix_up_program_pointer,
    fix_up_program_pointers_in_object, recompute_breakpoint_bcp, scavenge_program_space,
    snapshot_priority_order, stacks_in_chain, uncook_stacks, verify_singleton_placement, FrameDelta,
    ProgramScavengeReport,
};
pub use scavenger::{scavenge, ScavengeReport};
pub use semi_space::{CanResize, SemiSpace};
pub use trace::{object_size, visit_pointer_fields, walk_reachable, ClassFormatLookup};
pub use weak::WeakTable;
pub use write_barrier::{write_barrier, RememberedSet, CARD_SIZE};
