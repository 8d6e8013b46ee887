// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Stack objects: a variable-size frame region plus the `next` slot used
//! only during program GC to chain every live stack (component 3's "Stack"
//! data model entry, and the substrate for §4.5's cook/uncook protocol).

use super::object::ObjectHeader;
use super::Value;
use crate::platform::MemorySpace;
use crate::types::Vaddr;

/// One activation record. `bcp` is normally a raw interior pointer into
/// `function`'s bytecode; during a program GC it is temporarily replaced by
/// `function`'s own tagged pointer (see [`Stack::cook_frame`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub function: Value,
    pub bcp: Vaddr,
}

/// `[header][frame_count:u32][capacity:u32][next:Vaddr][frames: (Value, u64) * capacity]`
pub struct Stack;

impl Stack {
    const FRAME_COUNT_OFFSET: u64 = ObjectHeader::size();
    const CAPACITY_OFFSET: u64 = Self::FRAME_COUNT_OFFSET + 4;
    const NEXT_OFFSET: u64 = Self::CAPACITY_OFFSET + 4;
    pub const HEADER_SIZE: u64 = Self::NEXT_OFFSET + 8;
    const FRAME_SIZE: u64 = 16;

    #[must_use]
    pub const fn alloc_size(capacity: u32) -> u64 {
        Self::HEADER_SIZE + capacity as u64 * Self::FRAME_SIZE
    }

    pub fn frame_count<M: MemorySpace>(mem: &M, stack: Vaddr) -> u32 {
        mem.read(stack.add(Self::FRAME_COUNT_OFFSET))
    }

    pub fn set_frame_count<M: MemorySpace>(mem: &mut M, stack: Vaddr, count: u32) {
        mem.write(stack.add(Self::FRAME_COUNT_OFFSET), count);
    }

    pub fn capacity<M: MemorySpace>(mem: &M, stack: Vaddr) -> u32 {
        mem.read(stack.add(Self::CAPACITY_OFFSET))
    }

    pub fn set_capacity<M: MemorySpace>(mem: &mut M, stack: Vaddr, capacity: u32) {
        mem.write(stack.add(Self::CAPACITY_OFFSET), capacity);
    }

    /// Chain slot, used only between `Program::chain_stacks` and
    /// `Program::uncook_stacks`; zero outside a program GC.
    pub fn next<M: MemorySpace>(mem: &M, stack: Vaddr) -> Vaddr {
        Vaddr::new(mem.read(stack.add(Self::NEXT_OFFSET)))
    }

    pub fn set_next<M: MemorySpace>(mem: &mut M, stack: Vaddr, next: Vaddr) {
        mem.write(stack.add(Self::NEXT_OFFSET), next.as_u64());
    }

    fn frame_offset(index: u32) -> u64 {
        Self::HEADER_SIZE + u64::from(index) * Self::FRAME_SIZE
    }

    pub fn frame<M: MemorySpace>(mem: &M, stack: Vaddr, index: u32) -> Frame {
        let base = stack.add(Self::frame_offset(index));
        Frame {
            function: Value::from_word(mem.read(base)),
            bcp: Vaddr::new(mem.read(base.add(8))),
        }
    }

    pub fn set_frame<M: MemorySpace>(mem: &mut M, stack: Vaddr, index: u32, frame: Frame) {
        let base = stack.add(Self::frame_offset(index));
        mem.write(base, frame.function.word());
        mem.write(base.add(8), frame.bcp.as_u64());
    }

    /// Pushes a frame for `function` at `bcp`, bumping `frame_count`.
    /// Returns `false` if `capacity` is exhausted (a stack-overflow
    /// condition the interpreter surfaces as `Signal::UncaughtException`,
    /// not a GC concern).
    pub fn push_frame<M: MemorySpace>(mem: &mut M, stack: Vaddr, frame: Frame) -> bool {
        let count = Self::frame_count(mem, stack);
        if count >= Self::capacity(mem, stack) {
            return false;
        }
        Self::set_frame(mem, stack, count, frame);
        Self::set_frame_count(mem, stack, count + 1);
        true
    }

    pub fn pop_frame<M: MemorySpace>(mem: &mut M, stack: Vaddr) -> Option<Frame> {
        let count = Self::frame_count(mem, stack);
        if count == 0 {
            return None;
        }
        let frame = Self::frame(mem, stack, count - 1);
        Self::set_frame_count(mem, stack, count - 1);
        Some(frame)
    }

    /// Overwrites frame `index`'s bcp slot with `function`'s own tagged
    /// pointer, turning a raw interior pointer into a base-object pointer
    /// the GC can trace. Step 3 of the program GC protocol.
    pub fn cook_frame<M: MemorySpace>(mem: &mut M, stack: Vaddr, index: u32, function: Value) {
        let base = stack.add(Self::frame_offset(index));
        mem.write(base.add(8), function.word());
    }

    /// Restores frame `index`'s bcp slot from `function.bytecode_start() +
    /// delta`. Step 5 of the program GC protocol.
    pub fn uncook_frame<M: MemorySpace>(
        mem: &mut M,
        stack: Vaddr,
        index: u32,
        bytecode_start: Vaddr,
        delta: i64,
    ) {
        let base = stack.add(Self::frame_offset(index));
        let restored = if delta >= 0 {
            bytecode_start.add(delta as u64)
        } else {
            bytecode_start.sub((-delta) as u64)
        };
        mem.write(base.add(8), restored.as_u64());
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::platform::MockVSpace;

    #[test]
    fn push_and_pop_frames() {
        let mut mem = MockVSpace::new(4096, Vaddr::new(0));
        let stack = Vaddr::new(64);
        Stack::set_capacity(&mut mem, stack, 4);
        Stack::set_frame_count(&mut mem, stack, 0);

        let f = Frame { function: Value::heap_ptr(Vaddr::new(1024)), bcp: Vaddr::new(1040) };
        assert!(Stack::push_frame(&mut mem, stack, f));
        assert_eq!(Stack::frame_count(&mem, stack), 1);
        assert_eq!(Stack::pop_frame(&mut mem, stack), Some(f));
        assert_eq!(Stack::frame_count(&mem, stack), 0);
    }

    #[test]
    fn push_respects_capacity() {
        let mut mem = MockVSpace::new(4096, Vaddr::new(0));
        let stack = Vaddr::new(64);
        Stack::set_capacity(&mut mem, stack, 1);
        Stack::set_frame_count(&mut mem, stack, 0);
        let f = Frame { function: Value::heap_ptr(Vaddr::new(1024)), bcp: Vaddr::new(1040) };
        assert!(Stack::push_frame(&mut mem, stack, f));
        assert!(!Stack::push_frame(&mut mem, stack, f));
    }

    #[test]
    fn cook_then_uncook_restores_bcp() {
        let mut mem = MockVSpace::new(4096, Vaddr::new(0));
        let stack = Vaddr::new(64);
        Stack::set_capacity(&mut mem, stack, 1);
        Stack::set_frame_count(&mut mem, stack, 1);

        let function = Value::heap_ptr(Vaddr::new(2048));
        let bytecode_start = Vaddr::new(2048 + 32);
        let original_bcp = bytecode_start.add(17);
        Stack::set_frame(&mut mem, stack, 0, Frame { function, bcp: original_bcp });

        let delta = original_bcp.diff(bytecode_start);
        Stack::cook_frame(&mut mem, stack, 0, function);
        assert_eq!(Stack::frame(&mem, stack, 0).bcp, function.as_heap_ptr());

        let new_bytecode_start = Vaddr::new(9000);
        Stack::uncook_frame(&mut mem, stack, 0, new_bytecode_start, delta);
        assert_eq!(Stack::frame(&mem, stack, 0).bcp, new_bytecode_start.add(17));
    }
}
