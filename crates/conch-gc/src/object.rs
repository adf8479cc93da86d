//! GC cell layout: the header that precedes every managed value and the typed
//! pointer handed out by the allocator.

use std::cell::Cell;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::ops::Deref;
use std::ptr::NonNull;

use crate::kind::HeapKind;

/// GC object header.
///
/// Eight bytes, always at offset zero of a cell. The `kind` byte selects the
/// mark procedure; the `cell_id` is the 31-bit compressed address used by
/// 4-byte slots.
#[repr(C)]
pub struct GcHeader {
    /// Mark bits for tri-color marking
    mark: Cell<u8>,
    /// Heap kind of the cell
    kind: HeapKind,
    /// Per-cell flag bits
    flags: Cell<u8>,
    _reserved: u8,
    /// Compressed cell id (see `GcHeap::header_for_cell_id`)
    cell_id: u32,
}

/// Mark color for tri-color marking
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkColor {
    /// Not yet visited
    White = 0,
    /// In worklist
    Gray = 1,
    /// Fully scanned
    Black = 2,
}

/// Flag bits stored in [`GcHeader`].
pub mod flags {
    /// The cell is the target of at least one finalizer registration.
    pub const HAS_FINALIZER: u8 = 1 << 0;
    /// The cell was registered with the leak checker.
    pub const LEAK_TRACKED: u8 = 1 << 1;
}

impl GcHeader {
    /// Byte offset of the payload that follows the header.
    pub const PAYLOAD_OFFSET: usize = std::mem::size_of::<GcHeader>();

    /// Create new header
    pub const fn new(kind: HeapKind, cell_id: u32) -> Self {
        Self {
            mark: Cell::new(MarkColor::White as u8),
            kind,
            flags: Cell::new(0),
            _reserved: 0,
            cell_id,
        }
    }

    /// Get mark color
    #[inline]
    pub fn mark(&self) -> MarkColor {
        match self.mark.get() {
            0 => MarkColor::White,
            1 => MarkColor::Gray,
            _ => MarkColor::Black,
        }
    }

    /// Set mark color
    #[inline]
    pub fn set_mark(&self, color: MarkColor) {
        self.mark.set(color as u8);
    }

    /// Heap kind of this cell
    #[inline]
    pub fn kind(&self) -> HeapKind {
        self.kind
    }

    /// Compressed 31-bit id of this cell
    #[inline]
    pub fn cell_id(&self) -> u32 {
        self.cell_id
    }

    /// Test a flag bit
    #[inline]
    pub fn has_flag(&self, flag: u8) -> bool {
        self.flags.get() & flag != 0
    }

    /// Set a flag bit
    #[inline]
    pub fn set_flag(&self, flag: u8) {
        self.flags.set(self.flags.get() | flag);
    }

    /// Clear a flag bit
    #[inline]
    pub fn clear_flag(&self, flag: u8) {
        self.flags.set(self.flags.get() & !flag);
    }

    /// Pointer to the payload that follows this header.
    #[inline]
    pub fn payload(&self) -> *const u8 {
        // SAFETY: every header is followed by its payload inside the same cell
        unsafe { (self as *const GcHeader as *const u8).add(Self::PAYLOAD_OFFSET) }
    }
}

impl fmt::Debug for GcHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GcHeader")
            .field("kind", &self.kind)
            .field("mark", &self.mark())
            .field("cell_id", &self.cell_id)
            .finish()
    }
}

/// In-memory layout of a managed cell.
#[repr(C)]
pub struct GcAllocation<T> {
    /// Cell header
    pub header: GcHeader,
    /// Managed value
    pub value: T,
}

/// Typed pointer to a managed cell.
///
/// The word stored is the header address, so `Option<GcPtr<T>>` is a
/// single word that a [`crate::MarkDescriptor`] can scan directly. A `GcPtr`
/// stays valid until a collection runs that cannot reach it; rooting is the
/// embedder's job.
pub struct GcPtr<T> {
    ptr: NonNull<GcAllocation<T>>,
    _marker: PhantomData<T>,
}

impl<T> GcPtr<T> {
    /// Wrap a header pointer.
    ///
    /// # Safety
    /// `header` must point to a live cell whose payload is a `T`.
    #[inline]
    pub unsafe fn from_header(header: *const GcHeader) -> Self {
        Self {
            // SAFETY: caller guarantees a live, non-null cell
            ptr: unsafe { NonNull::new_unchecked(header as *mut GcAllocation<T>) },
            _marker: PhantomData,
        }
    }

    /// The cell header.
    #[inline]
    pub fn header(&self) -> &GcHeader {
        // SAFETY: a GcPtr always points to an initialized cell
        unsafe { &self.ptr.as_ref().header }
    }

    /// Raw header pointer, as reported to the collector.
    #[inline]
    pub fn as_header_ptr(&self) -> *const GcHeader {
        self.ptr.as_ptr() as *const GcHeader
    }

    /// Heap kind of the cell.
    #[inline]
    pub fn kind(&self) -> HeapKind {
        self.header().kind()
    }

    /// Cell address as an integer.
    #[inline]
    pub fn addr(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    /// Identity comparison.
    #[inline]
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        a.ptr == b.ptr
    }

    /// Reinterpret as a pointer to another payload type.
    ///
    /// # Safety
    /// The cell payload must actually be a `U`.
    #[inline]
    pub unsafe fn cast<U>(self) -> GcPtr<U> {
        GcPtr {
            ptr: self.ptr.cast(),
            _marker: PhantomData,
        }
    }
}

impl<T> Clone for GcPtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for GcPtr<T> {}

impl<T> PartialEq for GcPtr<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr
    }
}

impl<T> Eq for GcPtr<T> {}

impl<T> Hash for GcPtr<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl<T> Deref for GcPtr<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        // SAFETY: the cell is initialized for as long as it is reachable
        unsafe { &self.ptr.as_ref().value }
    }
}

impl<T> fmt::Debug for GcPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GcPtr({:?} @ {:#x})", self.kind(), self.addr())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        assert_eq!(std::mem::size_of::<GcHeader>(), 8);
        assert_eq!(
            std::mem::offset_of!(GcAllocation<u64>, value),
            GcHeader::PAYLOAD_OFFSET
        );
        assert_eq!(
            std::mem::size_of::<Option<GcPtr<u64>>>(),
            std::mem::size_of::<usize>()
        );
    }

    #[test]
    fn test_header_marking() {
        let header = GcHeader::new(HeapKind::Object, 7);
        assert_eq!(header.mark(), MarkColor::White);

        header.set_mark(MarkColor::Gray);
        assert_eq!(header.mark(), MarkColor::Gray);

        header.set_mark(MarkColor::Black);
        assert_eq!(header.mark(), MarkColor::Black);
        assert_eq!(header.kind(), HeapKind::Object);
        assert_eq!(header.cell_id(), 7);
    }

    #[test]
    fn test_header_flags() {
        let header = GcHeader::new(HeapKind::String, 0);
        assert!(!header.has_flag(flags::HAS_FINALIZER));
        header.set_flag(flags::HAS_FINALIZER);
        assert!(header.has_flag(flags::HAS_FINALIZER));
        header.clear_flag(flags::HAS_FINALIZER);
        assert!(!header.has_flag(flags::HAS_FINALIZER));
    }
}
