// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! # Vellum VM
//!
//! Program and object memory subsystem for a small embedded bytecode VM:
//! a tagged-pointer value representation, a generational heap (copying
//! new-space scavenger plus a mark-sweep/mark-compact old-space
//! collector) shared by every process, a separate precise collector over
//! an immutable program heap, process lifecycle bookkeeping, and a
//! debugger breakpoint table.
//!
//! ## Architecture
//!
//! - [`value`] — the tagged `Value` word and the heap object shapes it
//!   can point to (arrays, strings, functions, stacks, processes, classes).
//! - [`gc`] — the allocator and every collector: the new-space scavenger,
//!   the old-space mark-sweep/mark-compact collector, and program GC.
//! - [`process`] — process spawn/teardown and the live-process table.
//! - [`program`] — [`program::Program`], the type that wires the above
//!   together into the operations an interpreter and scheduler call.
//! - [`debug`] — the breakpoint table a debugger session attaches.
//! - [`platform`] — the `MemorySpace`/`Platform` abstraction over the
//!   address space the rest of the crate is written against.
//!
//! ## `no_std` Support
//!
//! This crate is `no_std` by default. The `std` feature (on by default in
//! this workspace) pulls in `std::error::Error` for [`error::VmError`] and
//! is automatically enabled during testing.

#![cfg_attr(not(any(test, feature = "std")), no_std)]

extern crate alloc;

#[cfg(any(test, feature = "std"))]
extern crate std;

pub mod config;
pub mod debug;
pub mod error;
pub mod gc;
pub mod platform;
pub mod process;
pub mod program;
pub mod types;
pub mod value;

pub use config::VmConfig;
pub use debug::{Breakpoint, DebugInfo};
pub use error::{AllocError, Signal, VmError};
pub use platform::{MemorySpace, Platform};
pub use process::ProcessTable;
pub use program::{Program, Singletons};
pub use types::{Paddr, Vaddr};
pub use value::Value;

/// Crate version for runtime queries: prefers a build-supplied version
/// string over `CARGO_PKG_VERSION`.
pub const VERSION: &str = match option_env!("VELLUM_VM_VERSION") {
    Some(v) => v,
    None => env!("CARGO_PKG_VERSION"),
};
