//! Heap kinds and their mark procedures.
//!
//! Every cell is allocated under exactly one [`HeapKind`]. The kind selects
//! the block pool the cell lives in and the [`MarkProcedure`] the collector
//! uses to find the pointers inside it. Kinds are registered once per heap,
//! before the first allocation of that kind.

use std::fmt;

use crate::descriptor::MarkDescriptor;
use crate::object::GcHeader;

/// Collector-level tag for a family of cells sharing a mark procedure.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeapKind {
    /// String contents; no pointers
    String = 0,
    /// Symbol with an optional description string
    Symbol = 1,
    /// Boxed float64 referenced from encoded slots
    NumberBox = 2,
    /// Getter/setter pair stored in an accessor property slot
    AccessorPair = 3,
    /// Ordinary object
    Object = 4,
    /// Array object with a fast-mode element buffer
    ArrayObject = 5,
    /// Callable object
    FunctionObject = 6,
    /// Weak reference object
    WeakRefObject = 7,
    /// Finalization registry object
    FinalizationRegistryObject = 8,
    /// Buffer of full-width encoded values
    ValueVector = 9,
    /// Buffer of 4-byte encoded values backing fast-mode arrays
    ArrayStorage = 10,
    /// Buffer whose elements never contain pointers
    PointerFreeBuffer = 11,
}

impl HeapKind {
    /// Number of kinds.
    pub const COUNT: usize = 12;

    /// Every kind, in tag order.
    pub const ALL: [HeapKind; Self::COUNT] = [
        HeapKind::String,
        HeapKind::Symbol,
        HeapKind::NumberBox,
        HeapKind::AccessorPair,
        HeapKind::Object,
        HeapKind::ArrayObject,
        HeapKind::FunctionObject,
        HeapKind::WeakRefObject,
        HeapKind::FinalizationRegistryObject,
        HeapKind::ValueVector,
        HeapKind::ArrayStorage,
        HeapKind::PointerFreeBuffer,
    ];

    /// Table index of this kind.
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Human readable kind name, used in logs and panics.
    pub const fn name(self) -> &'static str {
        match self {
            HeapKind::String => "String",
            HeapKind::Symbol => "Symbol",
            HeapKind::NumberBox => "NumberBox",
            HeapKind::AccessorPair => "AccessorPair",
            HeapKind::Object => "Object",
            HeapKind::ArrayObject => "ArrayObject",
            HeapKind::FunctionObject => "FunctionObject",
            HeapKind::WeakRefObject => "WeakRefObject",
            HeapKind::FinalizationRegistryObject => "FinalizationRegistryObject",
            HeapKind::ValueVector => "ValueVector",
            HeapKind::ArrayStorage => "ArrayStorage",
            HeapKind::PointerFreeBuffer => "PointerFreeBuffer",
        }
    }
}

impl fmt::Display for HeapKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Mark callback: enumerate every pointer in the payload.
///
/// The first argument points at the payload (just past the header).
pub type MarkCallback = unsafe fn(*const u8, &mut dyn FnMut(*const GcHeader));

/// Iterable mark step: starting at `cursor`, find the next live pointer in a
/// variable-length buffer. Returns the cursor to resume from together with
/// the pointer, or `None` once the end of the buffer is reached.
pub type IterableMark = unsafe fn(*const u8, usize) -> Option<(usize, *const GcHeader)>;

/// How the collector discovers pointers inside cells of one kind.
#[derive(Clone, Copy)]
pub enum MarkProcedure {
    /// The payload holds no pointers.
    Leaf,
    /// Fixed layout: the descriptor lists the pointer words.
    Descriptor(MarkDescriptor),
    /// Variable or tag-dependent layout walked by a callback.
    Callback(MarkCallback),
    /// Variable-length buffer walked with a cursor.
    Iterable(IterableMark),
}

impl MarkProcedure {
    /// Report every pointer held by the payload.
    ///
    /// # Safety
    /// `payload` must be the payload of a live cell of the kind this
    /// procedure was registered for.
    pub unsafe fn visit(&self, payload: *const u8, tracer: &mut dyn FnMut(*const GcHeader)) {
        match self {
            MarkProcedure::Leaf => {}
            MarkProcedure::Descriptor(descriptor) => unsafe { descriptor.trace(payload, tracer) },
            MarkProcedure::Callback(callback) => unsafe { callback(payload, tracer) },
            MarkProcedure::Iterable(next) => {
                let mut cursor = 0;
                while let Some((resume, ptr)) = unsafe { next(payload, cursor) } {
                    tracer(ptr);
                    cursor = resume;
                }
            }
        }
    }

    /// Short name of the procedure shape.
    pub fn shape(&self) -> &'static str {
        match self {
            MarkProcedure::Leaf => "leaf",
            MarkProcedure::Descriptor(_) => "descriptor",
            MarkProcedure::Callback(_) => "callback",
            MarkProcedure::Iterable(_) => "iterable",
        }
    }
}

impl fmt::Debug for MarkProcedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarkProcedure::Descriptor(d) => f.debug_tuple("Descriptor").field(d).finish(),
            other => f.write_str(other.shape()),
        }
    }
}

/// One-time registration table of mark procedures, indexed by kind.
pub struct KindTable {
    procedures: [Option<MarkProcedure>; HeapKind::COUNT],
}

impl KindTable {
    /// Create an empty table.
    pub const fn new() -> Self {
        Self {
            procedures: [None; HeapKind::COUNT],
        }
    }

    /// Register `procedure` for `kind`.
    ///
    /// # Panics
    /// Panics if the kind already has a procedure.
    pub fn register(&mut self, kind: HeapKind, procedure: MarkProcedure) {
        let slot = &mut self.procedures[kind.index()];
        if slot.is_some() {
            panic!("heap kind {kind} registered twice");
        }
        *slot = Some(procedure);
    }

    /// Whether `kind` has been registered.
    #[inline]
    pub fn is_registered(&self, kind: HeapKind) -> bool {
        self.procedures[kind.index()].is_some()
    }

    /// Mark procedure for `kind`.
    ///
    /// # Panics
    /// Panics if the kind was never registered.
    #[inline]
    pub fn procedure(&self, kind: HeapKind) -> &MarkProcedure {
        match &self.procedures[kind.index()] {
            Some(procedure) => procedure,
            None => panic!("heap kind {kind} used before registration"),
        }
    }
}

impl Default for KindTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_indices_are_dense() {
        for (i, kind) in HeapKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), i);
        }
    }

    #[test]
    fn test_register_once() {
        let mut table = KindTable::new();
        assert!(!table.is_registered(HeapKind::String));
        table.register(HeapKind::String, MarkProcedure::Leaf);
        assert!(table.is_registered(HeapKind::String));
        assert_eq!(table.procedure(HeapKind::String).shape(), "leaf");
    }

    #[test]
    #[should_panic(expected = "registered twice")]
    fn test_double_registration_panics() {
        let mut table = KindTable::new();
        table.register(HeapKind::Symbol, MarkProcedure::Leaf);
        table.register(HeapKind::Symbol, MarkProcedure::Leaf);
    }

    #[test]
    #[should_panic(expected = "before registration")]
    fn test_unregistered_kind_panics() {
        let table = KindTable::new();
        table.procedure(HeapKind::ArrayStorage);
    }
}
