//! # Conch Garbage Collector
//!
//! Kind-tagged, stop-the-world mark/sweep collector for the Conch runtime
//! core.
//!
//! ## Design
//!
//! - **Heap kinds**: every cell belongs to a [`HeapKind`]; each kind registers
//!   exactly one [`MarkProcedure`] (leaf, descriptor bitmap, callback or
//!   iterable) before its first allocation
//! - **Marked blocks**: 16KB blocks per (kind, size class); large cells are
//!   allocated individually
//! - **Compressed ids**: 31-bit cell ids back the 4-byte value encoding
//! - **Weak state**: disappearing links and deferred finalizers
//! - **Vectors**: [`GcVector`] and [`TightVector`] keep their elements in GC
//!   buffers with pluggable [`GrowthPolicy`]

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod descriptor;
pub mod finalization;
pub mod growth;
pub mod heap;
pub mod kind;
#[cfg(feature = "leak_checker")]
pub mod leak_checker;
pub mod marked_block;
pub mod object;
pub mod vector;
pub mod weak_ref;

pub use descriptor::MarkDescriptor;
pub use finalization::{FinalizerId, FiredFinalizer};
pub use growth::{FitExact, GrowthPolicy, Log2, Percent, PercentWithGap, percent_capacity};
pub use heap::{CollectionDisabled, GcConfig, GcHeap, HeapStats, heap};
pub use kind::{HeapKind, IterableMark, KindTable, MarkCallback, MarkProcedure};
#[cfg(feature = "leak_checker")]
pub use leak_checker::LeakChecker;
pub use object::{GcAllocation, GcHeader, GcPtr, MarkColor, flags};
pub use vector::{
    ArrayStorageAllocator, BufferAllocator, GcVector, PointerFreeAllocator, Slot, TightVector,
    TraceSlot, ValueVectorAllocator, VectorBuffer, iterate_vector_buffer,
};
pub use weak_ref::LinkId;
