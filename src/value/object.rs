// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Object layout (component 2): the fixed header every heap object carries,
//! and the `Class`/`InstanceFormat` pair that tells the collector how big an
//! object is and how to interpret its trailing payload.

use super::Value;
use crate::platform::MemorySpace;
use crate::types::Vaddr;

/// First word of every heap object: the untagged address of its `Class`.
/// Second word: identity hash in the high bits, mark color and age in the
/// low bits. The exact packing is private to this module; everything else
/// goes through the accessors below so the packing can change without
/// touching collector code.
const HEADER_SIZE: u64 = 16;
const CLASS_OFFSET: u64 = 0;
const META_OFFSET: u64 = 8;

const MARK_BITS: u32 = 0x3;
const AGE_SHIFT: u32 = 2;
const AGE_BITS: u32 = 0x7;
const HASH_SHIFT: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MarkColor {
    White = 0,
    Gray = 1,
    Black = 2,
}

impl MarkColor {
    const fn from_bits(bits: u32) -> Self {
        match bits & MARK_BITS {
            0 => Self::White,
            1 => Self::Gray,
            _ => Self::Black,
        }
    }
}

/// Accessors for the header shared by every heap object. Not a Rust struct
/// overlaying memory directly (objects live behind a `MemorySpace`, not a
/// native pointer) -- instead a zero-sized handle bound to an address.
pub struct ObjectHeader;

impl ObjectHeader {
    #[must_use]
    pub const fn size() -> u64 {
        HEADER_SIZE
    }

    pub fn class<M: MemorySpace>(mem: &M, object: Vaddr) -> Vaddr {
        Vaddr::new(mem.read::<u64>(object.add(CLASS_OFFSET)))
    }

    pub fn set_class<M: MemorySpace>(mem: &mut M, object: Vaddr, class: Vaddr) {
        mem.write(object.add(CLASS_OFFSET), class.as_u64());
    }

    fn meta<M: MemorySpace>(mem: &M, object: Vaddr) -> u32 {
        mem.read(object.add(META_OFFSET))
    }

    fn set_meta<M: MemorySpace>(mem: &mut M, object: Vaddr, meta: u32) {
        mem.write(object.add(META_OFFSET), meta);
    }

    pub fn mark<M: MemorySpace>(mem: &M, object: Vaddr) -> MarkColor {
        MarkColor::from_bits(Self::meta(mem, object))
    }

    pub fn set_mark<M: MemorySpace>(mem: &mut M, object: Vaddr, color: MarkColor) {
        let meta = Self::meta(mem, object);
        Self::set_meta(mem, object, (meta & !MARK_BITS) | (color as u32));
    }

    pub fn age<M: MemorySpace>(mem: &M, object: Vaddr) -> u32 {
        (Self::meta(mem, object) >> AGE_SHIFT) & AGE_BITS
    }

    pub fn bump_age<M: MemorySpace>(mem: &mut M, object: Vaddr) -> u32 {
        let meta = Self::meta(mem, object);
        let age = ((meta >> AGE_SHIFT) & AGE_BITS).saturating_add(1).min(AGE_BITS);
        Self::set_meta(mem, object, (meta & !(AGE_BITS << AGE_SHIFT)) | (age << AGE_SHIFT));
        age
    }

    pub fn identity_hash<M: MemorySpace>(mem: &M, object: Vaddr) -> u32 {
        Self::meta(mem, object) >> HASH_SHIFT
    }

    pub fn set_identity_hash<M: MemorySpace>(mem: &mut M, object: Vaddr, hash: u32) {
        let meta = Self::meta(mem, object);
        let low = meta & ((1 << HASH_SHIFT) - 1);
        Self::set_meta(mem, object, (hash << HASH_SHIFT) | low);
    }

    /// Writes a forwarding pointer into the class slot and flags the header
    /// as forwarded via the otherwise-unused top mark bit combination. The
    /// scavenger and compactor both use this rather than a separate
    /// forwarded flag word, to keep the header at two words.
    pub fn set_forwarding<M: MemorySpace>(mem: &mut M, object: Vaddr, new_location: Vaddr) {
        mem.write(object.add(CLASS_OFFSET), new_location.as_u64() | 1);
    }

    pub fn forwarding<M: MemorySpace>(mem: &M, object: Vaddr) -> Option<Vaddr> {
        let word: u64 = mem.read(object.add(CLASS_OFFSET));
        if word & 1 == 1 {
            Some(Vaddr::new(word & !1))
        } else {
            None
        }
    }
}

/// Layout marker identifying how the collector should interpret an
/// instance's trailing payload, and (for fixed-size formats) its size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceFormat {
    Null,
    True,
    False,
    Coroutine,
    Port,
    Array,
    ByteArray,
    OneByteString,
    TwoByteString,
    Double,
    HeapInteger,
    Function,
    Closure,
    Initializer,
    DispatchTableEntry,
    Class,
    Stack,
    Process,
    /// `Smi`/`Num` instances never actually reach the heap (see [`Value`]);
    /// this marker exists only so class introspection can answer "what
    /// kind of value would this class tag as" uniformly.
    Smi,
    Num,
}

impl InstanceFormat {
    /// Fixed size in words for formats that are not variable-length. Variable
    /// formats (arrays, strings, functions, stacks, ...) return `None`; their
    /// size is read from a header slot in the object itself instead.
    #[must_use]
    pub const fn fixed_size_words(self) -> Option<u32> {
        match self {
            Self::Null | Self::True | Self::False => Some(2),
            Self::Double => Some(3),
            Self::DispatchTableEntry => Some(4),
            Self::Array
            | Self::ByteArray
            | Self::OneByteString
            | Self::TwoByteString
            | Self::HeapInteger
            | Self::Function
            | Self::Closure
            | Self::Initializer
            | Self::Class
            | Self::Stack
            | Self::Process
            | Self::Coroutine
            | Self::Port
            | Self::Smi
            | Self::Num => None,
        }
    }
}

/// A class object: the instance format mutators and the collector use to
/// size and trace instances, a superclass pointer, and a methods table
/// value (opaque to the memory subsystem -- interpreted by the interpreter).
pub struct Class;

const FORMAT_OFFSET: u64 = ObjectHeader::size();
pub const SUPERCLASS_OFFSET: u64 = FORMAT_OFFSET + 8;
pub const METHODS_OFFSET: u64 = SUPERCLASS_OFFSET + 8;
pub const CLASS_SIZE: u64 = METHODS_OFFSET + 8;

impl Class {
    pub fn instance_format<M: MemorySpace>(mem: &M, class: Vaddr) -> InstanceFormat {
        let tag: u32 = mem.read(class.add(FORMAT_OFFSET));
        decode_format(tag)
    }

    pub fn set_instance_format<M: MemorySpace>(mem: &mut M, class: Vaddr, format: InstanceFormat) {
        mem.write(class.add(FORMAT_OFFSET), encode_format(format));
    }

    pub fn superclass<M: MemorySpace>(mem: &M, class: Vaddr) -> Value {
        Value::from_word(mem.read(class.add(SUPERCLASS_OFFSET)))
    }

    pub fn set_superclass<M: MemorySpace>(mem: &mut M, class: Vaddr, superclass: Value) {
        mem.write(class.add(SUPERCLASS_OFFSET), superclass.word());
    }

    pub fn methods<M: MemorySpace>(mem: &M, class: Vaddr) -> Value {
        Value::from_word(mem.read(class.add(METHODS_OFFSET)))
    }

    pub fn set_methods<M: MemorySpace>(mem: &mut M, class: Vaddr, methods: Value) {
        mem.write(class.add(METHODS_OFFSET), methods.word());
    }
}

const fn encode_format(format: InstanceFormat) -> u32 {
    match format {
        InstanceFormat::Null => 0,
        InstanceFormat::True => 1,
        InstanceFormat::False => 2,
        InstanceFormat::Coroutine => 3,
        InstanceFormat::Port => 4,
        InstanceFormat::Array => 5,
        InstanceFormat::ByteArray => 6,
        InstanceFormat::OneByteString => 7,
        InstanceFormat::TwoByteString => 8,
        InstanceFormat::Double => 9,
        InstanceFormat::HeapInteger => 10,
        InstanceFormat::Function => 11,
        InstanceFormat::Closure => 12,
        InstanceFormat::Initializer => 13,
        InstanceFormat::DispatchTableEntry => 14,
        InstanceFormat::Class => 15,
        InstanceFormat::Stack => 16,
        InstanceFormat::Process => 17,
        InstanceFormat::Smi => 18,
        InstanceFormat::Num => 19,
    }
}

const fn decode_format(tag: u32) -> InstanceFormat {
    match tag {
        0 => InstanceFormat::Null,
        1 => InstanceFormat::True,
        2 => InstanceFormat::False,
        3 => InstanceFormat::Coroutine,
        4 => InstanceFormat::Port,
        5 => InstanceFormat::Array,
        6 => InstanceFormat::ByteArray,
        7 => InstanceFormat::OneByteString,
        8 => InstanceFormat::TwoByteString,
        9 => InstanceFormat::Double,
        10 => InstanceFormat::HeapInteger,
        11 => InstanceFormat::Function,
        12 => InstanceFormat::Closure,
        13 => InstanceFormat::Initializer,
        14 => InstanceFormat::DispatchTableEntry,
        15 => InstanceFormat::Class,
        16 => InstanceFormat::Stack,
        17 => InstanceFormat::Process,
        18 => InstanceFormat::Smi,
        _ => InstanceFormat::Num,
    }
}
