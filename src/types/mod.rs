// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Address newtypes shared across the platform, value and GC layers.

mod address;

pub use address::{Paddr, Vaddr};
