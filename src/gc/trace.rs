// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Shape-directed traversal shared by the scavenger, the old-space marker,
//! and `FixPointersVisitor`. Dispatches on a class's `InstanceFormat` rather
//! than on a `Value` enum variant, since instances here live behind headers
//! rather than as Rust enum payloads.

use crate::platform::MemorySpace;
use crate::types::Vaddr;
use crate::value::{
    HeapArray, HeapByteArray, HeapClosure, HeapFunction, HeapInteger, HeapProcess, HeapString,
    InstanceFormat, ObjectHeader, Stack, Value, CLASS_SIZE, METHODS_OFFSET, SUPERCLASS_OFFSET,
};
use alloc::collections::BTreeSet;
use alloc::vec::Vec;

/// Looks up a class's instance format. Shared between the scavenger, the
/// old-space collector, and program GC so all three dispatch on shape the
/// same way.
pub type ClassFormatLookup<'a> = &'a dyn Fn(Vaddr) -> InstanceFormat;

/// Total size in bytes of `object`, whose class has instance format
/// `format`. Variable-size formats read their length from a header slot;
/// fixed formats use the format's constant size.
pub fn object_size<M: MemorySpace>(mem: &M, object: Vaddr, format: InstanceFormat) -> u64 {
    if let Some(words) = format.fixed_size_words() {
        return u64::from(words) * 8;
    }
    match format {
        InstanceFormat::Array => HeapArray::alloc_size(HeapArray::length(mem, object)),
        InstanceFormat::ByteArray => HeapByteArray::alloc_size(HeapByteArray::length(mem, object)),
        InstanceFormat::OneByteString => {
            HeapString::alloc_size(crate::value::StringKind::OneByte, HeapString::length(mem, object))
        }
        InstanceFormat::TwoByteString => {
            HeapString::alloc_size(crate::value::StringKind::TwoByte, HeapString::length(mem, object))
        }
        InstanceFormat::HeapInteger => HeapInteger::alloc_size(HeapInteger::limb_count(mem, object)),
        InstanceFormat::Function => {
            HeapFunction::alloc_size(HeapFunction::bytecode_len(mem, object), HeapFunction::literal_count(mem, object))
        }
        InstanceFormat::Closure => HeapClosure::alloc_size(HeapClosure::captures_len(mem, object)),
        InstanceFormat::Class => CLASS_SIZE,
        InstanceFormat::Stack => {
            Stack::alloc_size(Stack::capacity(mem, object))
        }
        InstanceFormat::Process => HeapProcess::SIZE,
        InstanceFormat::Coroutine | InstanceFormat::Port => 3 * 8,
        InstanceFormat::Initializer | InstanceFormat::DispatchTableEntry => 4 * 8,
        InstanceFormat::Smi | InstanceFormat::Num => 0,
        InstanceFormat::Null | InstanceFormat::True | InstanceFormat::False | InstanceFormat::Double => {
            unreachable!("fixed formats handled above")
        }
    }
}

/// Calls `visit` with the address of every `Value`-sized pointer slot
/// inside `object`. The class pointer itself is visited separately by
/// callers that need it (program GC does; the scavenger does not, since
/// program space is immutable from the data GC's point of view).
pub fn visit_pointer_fields<M: MemorySpace>(
    mem: &M,
    object: Vaddr,
    format: InstanceFormat,
    mut visit: impl FnMut(Vaddr),
) {
    match format {
        InstanceFormat::Array => {
            let len = HeapArray::length(mem, object);
            for i in 0..len {
                visit(object.add(HeapArray::HEADER_SIZE + u64::from(i) * 8));
            }
        }
        InstanceFormat::Function => {
            let bytecode_len = HeapFunction::bytecode_len(mem, object);
            let literal_count = HeapFunction::literal_count(mem, object);
            let bytecode_padded = (u64::from(bytecode_len) + 7) & !7;
            let base = object.add(HeapFunction::HEADER_SIZE + bytecode_padded);
            for i in 0..literal_count {
                visit(base.add(u64::from(i) * 8));
            }
        }
        InstanceFormat::Closure => {
            let len = HeapClosure::captures_len(mem, object);
            for i in 0..len {
                visit(object.add(HeapClosure::HEADER_SIZE + u64::from(i) * 8));
            }
        }
        InstanceFormat::Stack => {
            let count = Stack::frame_count(mem, object);
            for i in 0..count {
                let frame_base = object.add(Stack::HEADER_SIZE + u64::from(i) * 16);
                visit(frame_base);
            }
        }
        InstanceFormat::Class => {
            visit(object.add(SUPERCLASS_OFFSET));
            visit(object.add(METHODS_OFFSET));
        }
        InstanceFormat::Process => {
            visit(object.add(HeapProcess::stack_offset()));
            visit(object.add(HeapProcess::parent_offset()));
            // The port slot is deliberately not visited here: it is a weak
            // reference, registered with a `WeakTable` and swept after
            // marking rather than kept alive by this strong-field walk.
        }
        InstanceFormat::ByteArray
        | InstanceFormat::OneByteString
        | InstanceFormat::TwoByteString
        | InstanceFormat::HeapInteger
        | InstanceFormat::Double
        | InstanceFormat::Null
        | InstanceFormat::True
        | InstanceFormat::False
        | InstanceFormat::Coroutine
        | InstanceFormat::Port
        | InstanceFormat::Initializer
        | InstanceFormat::DispatchTableEntry
        | InstanceFormat::Smi
        | InstanceFormat::Num => {}
    }
}

/// Walks every object reachable from `roots` exactly once, depth-first,
/// calling `visit` with the object's address and shape. `visit` receives
/// `mem` back so it can mutate the object it is being shown (installing a
/// mark, chaining a `next` slot) without a second borrow of the space.
/// Visited-once bookkeeping is a local set, independent of any header mark
/// bits a caller may also be maintaining for its own purposes.
pub fn walk_reachable<M: MemorySpace>(
    mem: &mut M,
    roots: &[Value],
    class_format: ClassFormatLookup<'_>,
    mut visit: impl FnMut(&mut M, Vaddr, InstanceFormat),
) {
    let mut seen: BTreeSet<Vaddr> = BTreeSet::new();
    let mut worklist: Vec<Vaddr> =
        roots.iter().filter(|v| v.is_heap_object()).map(|v| v.as_heap_ptr()).collect();

    while let Some(addr) = worklist.pop() {
        if !seen.insert(addr) {
            continue;
        }
        let class = ObjectHeader::class(mem, addr);
        let format = class_format(class);
        worklist.push(class);
        visit_pointer_fields(mem, addr, format, |slot| {
            let v = Value::from_word(mem.read(slot));
            if v.is_heap_object() {
                worklist.push(v.as_heap_ptr());
            }
        });
        visit(mem, addr, format);
    }
}
