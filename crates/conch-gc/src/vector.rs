//! Growable vectors whose buffers are GC cells.
//!
//! The vector header (buffer pointer, reallocation count) is embedded in its
//! owner; the elements live in a [`VectorBuffer`] cell allocated under the
//! allocator's kind. The owner's mark procedure reports the buffer, and the
//! buffer kind's mark procedure (usually [`iterate_vector_buffer`]) reports
//! the pointers inside it. Pointer-free element types go to
//! [`PointerFreeAllocator`] so the collector never scans them.
//!
//! Growing allocates a new buffer and copies; the old buffer becomes garbage.

use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;

use crate::growth::{FitExact, GrowthPolicy, Log2};
use crate::heap::heap;
use crate::kind::HeapKind;
use crate::object::{GcHeader, GcPtr};

/// Element type storable in a [`GcVector`].
pub trait Slot: Copy + 'static {
    /// Filler for capacity past the length.
    const EMPTY: Self;
}

/// Element type that may hold a cell pointer.
pub trait TraceSlot: Slot {
    /// The cell this slot points to, if any.
    fn traced_pointer(&self) -> Option<*const GcHeader>;
}

/// Selects the heap kind vector buffers are allocated under.
pub trait BufferAllocator {
    /// Kind of every buffer allocated by this allocator.
    const KIND: HeapKind;
}

/// Buffers of full-width encoded values.
#[derive(Debug)]
pub struct ValueVectorAllocator;

impl BufferAllocator for ValueVectorAllocator {
    const KIND: HeapKind = HeapKind::ValueVector;
}

/// Buffers of 4-byte encoded values backing fast-mode arrays.
#[derive(Debug)]
pub struct ArrayStorageAllocator;

impl BufferAllocator for ArrayStorageAllocator {
    const KIND: HeapKind = HeapKind::ArrayStorage;
}

/// Buffers the collector never scans.
#[derive(Debug)]
pub struct PointerFreeAllocator;

impl BufferAllocator for PointerFreeAllocator {
    const KIND: HeapKind = HeapKind::PointerFreeBuffer;
}

/// Payload of a vector buffer cell.
pub struct VectorBuffer<T> {
    len: Cell<usize>,
    slots: Box<[Cell<T>]>,
}

impl<T: Slot> VectorBuffer<T> {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            len: Cell::new(0),
            slots: (0..capacity).map(|_| Cell::new(T::EMPTY)).collect(),
        }
    }

    /// Number of initialized elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.len.get()
    }

    /// Whether the buffer holds no elements.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of slots.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Element at `index` (must be `< capacity`).
    #[inline]
    pub fn slot(&self, index: usize) -> T {
        self.slots[index].get()
    }
}

/// Iterable mark step over a [`VectorBuffer`]: reports the next pointer at
/// or after `cursor` among the first `len` slots.
///
/// # Safety
/// `payload` must be the payload of a live `VectorBuffer<T>` cell.
pub unsafe fn iterate_vector_buffer<T: TraceSlot>(
    payload: *const u8,
    cursor: usize,
) -> Option<(usize, *const GcHeader)> {
    // SAFETY: caller guarantees the payload type
    let buffer = unsafe { &*(payload as *const VectorBuffer<T>) };
    let len = buffer.len().min(buffer.capacity());
    (cursor..len).find_map(|index| {
        buffer
            .slot(index)
            .traced_pointer()
            .map(|ptr| (index + 1, ptr))
    })
}

/// Growable vector with a GC-allocated buffer.
pub struct GcVector<T: Slot, A: BufferAllocator, P: GrowthPolicy = Log2> {
    buffer: Option<GcPtr<VectorBuffer<T>>>,
    reallocations: usize,
    _marker: PhantomData<(A, P)>,
}

impl<T: Slot, A: BufferAllocator, P: GrowthPolicy> GcVector<T, A, P> {
    /// Empty vector; no buffer is allocated until the first element.
    pub const fn new() -> Self {
        Self {
            buffer: None,
            reallocations: 0,
            _marker: PhantomData,
        }
    }

    /// Vector with room for `capacity` elements.
    pub fn with_capacity(capacity: usize) -> Self {
        let mut vector = Self::new();
        vector.reallocate(capacity);
        vector
    }

    /// Number of elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.buffer.map_or(0, |b| b.len())
    }

    /// Whether the vector holds no elements.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of elements the current buffer can hold.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.buffer.map_or(0, |b| b.capacity())
    }

    /// Number of buffers allocated over the vector's lifetime.
    #[inline]
    pub fn reallocation_count(&self) -> usize {
        self.reallocations
    }

    /// Header of the current buffer, for the owner's mark procedure.
    #[inline]
    pub fn buffer_header(&self) -> Option<*const GcHeader> {
        self.buffer.map(|b| b.as_header_ptr())
    }

    /// Element at `index`, if in bounds.
    #[inline]
    pub fn get(&self, index: usize) -> Option<T> {
        let buffer = self.buffer?;
        (index < buffer.len()).then(|| buffer.slot(index))
    }

    /// Overwrite the element at `index`.
    ///
    /// # Panics
    /// Panics if `index >= len`.
    #[inline]
    pub fn set(&self, index: usize, value: T) {
        let len = self.len();
        match self.buffer {
            Some(buffer) if index < len => buffer.slots[index].set(value),
            _ => panic!("index out of bounds: the len is {len} but the index is {index}"),
        }
    }

    /// Update the element at `index` in place through `f`.
    ///
    /// # Panics
    /// Panics if `index >= len`.
    pub fn update(&self, index: usize, f: impl FnOnce(&mut T)) {
        let Some(mut value) = self.get(index) else {
            panic!("index out of bounds: the len is {} but the index is {index}", self.len());
        };
        f(&mut value);
        self.set(index, value);
    }

    /// Append an element, growing per the policy.
    pub fn push(&mut self, value: T) {
        let len = self.len();
        if len == self.capacity() {
            self.reallocate(P::reserved_capacity(self.capacity(), len + 1));
        }
        if let Some(buffer) = self.buffer {
            buffer.slots[len].set(value);
            buffer.len.set(len + 1);
        }
    }

    /// Remove and return the last element.
    pub fn pop(&mut self) -> Option<T> {
        let buffer = self.buffer?;
        let len = buffer.len();
        if len == 0 {
            return None;
        }
        let value = buffer.slot(len - 1);
        buffer.slots[len - 1].set(T::EMPTY);
        buffer.len.set(len - 1);
        Some(value)
    }

    /// Resize to `new_len`, filling new slots with `fill`. Growth reserves
    /// capacity per the policy.
    pub fn resize(&mut self, new_len: usize, fill: T) {
        let capacity = P::reserved_capacity(self.capacity(), new_len);
        self.resize_with_capacity(new_len, capacity, fill);
    }

    /// Resize to `new_len`, reserving exactly `capacity` slots if the buffer
    /// must grow. Used by owners with their own growth rules.
    pub fn resize_with_capacity(&mut self, new_len: usize, capacity: usize, fill: T) {
        let len = self.len();
        if new_len > self.capacity() {
            self.reallocate(capacity.max(new_len));
        }
        let Some(buffer) = self.buffer else { return };
        if new_len > len {
            for slot in &buffer.slots[len..new_len] {
                slot.set(fill);
            }
        } else {
            for slot in &buffer.slots[new_len..len] {
                slot.set(T::EMPTY);
            }
        }
        buffer.len.set(new_len);
    }

    /// Shorten to `new_len`; no-op if already shorter.
    pub fn truncate(&mut self, new_len: usize) {
        if new_len < self.len() {
            self.resize_with_capacity(new_len, 0, T::EMPTY);
        }
    }

    /// Insert `value` at `index`, shifting later elements.
    ///
    /// # Panics
    /// Panics if `index > len`.
    pub fn insert(&mut self, index: usize, value: T) {
        let len = self.len();
        assert!(index <= len, "insertion index (is {index}) should be <= len (is {len})");
        self.push(T::EMPTY);
        if let Some(buffer) = self.buffer {
            for i in (index..len).rev() {
                buffer.slots[i + 1].set(buffer.slots[i].get());
            }
            buffer.slots[index].set(value);
        }
    }

    /// Remove the element at `index`, shifting later elements.
    ///
    /// # Panics
    /// Panics if `index >= len`.
    pub fn remove(&mut self, index: usize) -> T {
        let len = self.len();
        let Some(buffer) = self.buffer.filter(|_| index < len) else {
            panic!("removal index (is {index}) should be < len (is {len})");
        };
        let value = buffer.slot(index);
        for i in index..len - 1 {
            buffer.slots[i].set(buffer.slots[i + 1].get());
        }
        buffer.slots[len - 1].set(T::EMPTY);
        buffer.len.set(len - 1);
        value
    }

    /// Drop all elements and release the buffer.
    pub fn clear(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            buffer.len.set(0);
        }
    }

    /// Release unused capacity.
    pub fn shrink_to_fit(&mut self) {
        let len = self.len();
        if len == 0 {
            self.clear();
        } else if len < self.capacity() {
            self.reallocate(len);
        }
    }

    /// Iterate over a snapshot of the elements.
    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        (0..self.len()).filter_map(move |i| self.get(i))
    }

    /// Copy the elements into a `Vec`.
    pub fn to_vec(&self) -> Vec<T> {
        self.iter().collect()
    }

    fn reallocate(&mut self, capacity: usize) {
        let len = self.len().min(capacity);
        let fresh = VectorBuffer::with_capacity(capacity);
        if let Some(old) = self.buffer {
            for i in 0..len {
                fresh.slots[i].set(old.slot(i));
            }
            old.len.set(0);
        }
        fresh.len.set(len);
        self.buffer = Some(heap().alloc(A::KIND, fresh));
        self.reallocations += 1;
    }
}

impl<T: Slot, A: BufferAllocator, P: GrowthPolicy> Default for GcVector<T, A, P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Slot + fmt::Debug, A: BufferAllocator, P: GrowthPolicy> fmt::Debug for GcVector<T, A, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

/// Vector whose capacity always equals its length.
///
/// Every length change reallocates; used for buffers that rarely change size.
pub struct TightVector<T: Slot, A: BufferAllocator> {
    inner: GcVector<T, A, FitExact>,
}

impl<T: Slot, A: BufferAllocator> TightVector<T, A> {
    /// Empty vector.
    pub const fn new() -> Self {
        Self {
            inner: GcVector::new(),
        }
    }

    /// Number of elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether the vector holds no elements.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Element at `index`, if in bounds.
    #[inline]
    pub fn get(&self, index: usize) -> Option<T> {
        self.inner.get(index)
    }

    /// Overwrite the element at `index`.
    #[inline]
    pub fn set(&self, index: usize, value: T) {
        self.inner.set(index, value);
    }

    /// Append an element.
    pub fn push(&mut self, value: T) {
        self.inner.push(value);
    }

    /// Resize to exactly `new_len` elements.
    pub fn resize(&mut self, new_len: usize, fill: T) {
        self.inner.resize(new_len, fill);
        self.inner.shrink_to_fit();
    }

    /// Remove the element at `index`.
    pub fn remove(&mut self, index: usize) -> T {
        let value = self.inner.remove(index);
        self.inner.shrink_to_fit();
        value
    }

    /// Drop all elements and release the buffer.
    pub fn clear(&mut self) {
        self.inner.clear();
    }

    /// Header of the current buffer, for the owner's mark procedure.
    #[inline]
    pub fn buffer_header(&self) -> Option<*const GcHeader> {
        self.inner.buffer_header()
    }

    /// Iterate over a snapshot of the elements.
    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        self.inner.iter()
    }
}

impl<T: Slot, A: BufferAllocator> Default for TightVector<T, A> {
    fn default() -> Self {
        Self::new()
    }
}

impl Slot for u32 {
    const EMPTY: Self = 0;
}

impl Slot for u64 {
    const EMPTY: Self = 0;
}

impl Slot for f64 {
    const EMPTY: Self = 0.0;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::MarkProcedure;

    fn register_pointer_free() {
        let heap = heap();
        if !heap.is_kind_registered(HeapKind::PointerFreeBuffer) {
            heap.register_kind(HeapKind::PointerFreeBuffer, MarkProcedure::Leaf);
        }
    }

    #[test]
    fn test_push_pop() {
        register_pointer_free();
        let mut v: GcVector<u64, PointerFreeAllocator> = GcVector::new();
        assert_eq!(v.capacity(), 0);
        for i in 0..10 {
            v.push(i);
        }
        assert_eq!(v.len(), 10);
        assert_eq!(v.capacity(), 16);
        assert_eq!(v.get(9), Some(9));
        assert_eq!(v.get(10), None);
        assert_eq!(v.pop(), Some(9));
        assert_eq!(v.len(), 9);
    }

    #[test]
    fn test_log2_growth_reallocates_logarithmically() {
        register_pointer_free();
        let mut v: GcVector<u32, PointerFreeAllocator> = GcVector::new();
        for i in 0..100_000u32 {
            v.push(i);
        }
        assert_eq!(v.len(), 100_000);
        // 1, 2, 4, ..., 131072
        assert_eq!(v.reallocation_count(), 18);
        assert_eq!(v.get(99_999), Some(99_999));
    }

    #[test]
    fn test_insert_remove() {
        register_pointer_free();
        let mut v: GcVector<u64, PointerFreeAllocator, FitExact> = GcVector::new();
        v.push(1);
        v.push(3);
        v.insert(1, 2);
        assert_eq!(v.to_vec(), vec![1, 2, 3]);
        assert_eq!(v.remove(0), 1);
        assert_eq!(v.to_vec(), vec![2, 3]);
    }

    #[test]
    fn test_resize_fills_and_clears() {
        register_pointer_free();
        let mut v: GcVector<u64, PointerFreeAllocator> = GcVector::new();
        v.resize(4, 9);
        assert_eq!(v.to_vec(), vec![9, 9, 9, 9]);
        v.truncate(1);
        assert_eq!(v.to_vec(), vec![9]);
        v.clear();
        assert_eq!(v.capacity(), 0);
        assert!(v.buffer_header().is_none());
    }

    #[test]
    fn test_tight_vector_capacity_tracks_length() {
        register_pointer_free();
        let mut v: TightVector<u64, PointerFreeAllocator> = TightVector::new();
        v.resize(3, 1);
        assert_eq!(v.inner.capacity(), 3);
        v.push(2);
        assert_eq!(v.inner.capacity(), 4);
        v.remove(0);
        assert_eq!(v.inner.capacity(), 3);
        assert_eq!(v.iter().collect::<Vec<_>>(), vec![1, 1, 2]);
    }

    #[test]
    fn test_buffer_survives_through_owner_root() {
        register_pointer_free();
        let mut v: GcVector<u64, PointerFreeAllocator> = GcVector::new();
        v.push(42);
        let header = v.buffer_header().unwrap();
        heap().collect(&[header]);
        assert_eq!(v.get(0), Some(42));
    }
}
