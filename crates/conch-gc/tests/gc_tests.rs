//! GC correctness tests
//!
//! These tests verify that the stop-the-world mark/sweep garbage collector
//! correctly handles reachability, weak state, kind iteration and vector
//! buffers.

use std::cell::Cell;

use conch_gc::{
    GcConfig, GcHeader, GcHeap, GcPtr, GcVector, HeapKind, MarkProcedure, TraceSlot, Slot,
    ValueVectorAllocator, iterate_vector_buffer, mark_descriptor,
};

/// Simple test object for GC testing
struct TestObject {
    value: i32,
    /// Optional reference to another object's GcHeader
    reference: Cell<Option<*const GcHeader>>,
}

impl TestObject {
    fn new(value: i32) -> Self {
        Self {
            value,
            reference: Cell::new(None),
        }
    }
}

unsafe fn trace_test_object(payload: *const u8, tracer: &mut dyn FnMut(*const GcHeader)) {
    let object = unsafe { &*(payload as *const TestObject) };
    if let Some(ptr) = object.reference.get() {
        tracer(ptr);
    }
}

fn test_heap() -> GcHeap {
    let heap = GcHeap::default();
    heap.register_kind(HeapKind::Object, MarkProcedure::Callback(trace_test_object));
    heap
}

#[test]
fn test_collect_simple_garbage() {
    let heap = test_heap();
    heap.alloc(HeapKind::Object, TestObject::new(42));

    assert_eq!(heap.live_cells(), 1);
    let initial_size = heap.total_bytes();
    assert!(initial_size > 0);

    // Force GC with no roots
    let reclaimed = heap.collect(&[]);

    assert_eq!(reclaimed, initial_size);
    assert_eq!(heap.live_cells(), 0);
    assert_eq!(heap.total_bytes(), 0);
}

#[test]
fn test_rooted_object_survives() {
    let heap = test_heap();
    let obj = heap.alloc(HeapKind::Object, TestObject::new(7));

    heap.collect(&[obj.as_header_ptr()]);
    heap.collect(&[obj.as_header_ptr()]);

    assert_eq!(heap.live_cells(), 1);
    assert_eq!(obj.value, 7);
}

#[test]
fn test_circular_references_collected() {
    let heap = test_heap();
    let obj1 = heap.alloc(HeapKind::Object, TestObject::new(1));
    let obj2 = heap.alloc(HeapKind::Object, TestObject::new(2));
    obj1.reference.set(Some(obj2.as_header_ptr()));
    obj2.reference.set(Some(obj1.as_header_ptr()));

    // Rooted cycle survives
    heap.collect(&[obj1.as_header_ptr()]);
    assert_eq!(heap.live_cells(), 2);

    // Unrooted cycle is collected
    heap.collect(&[]);
    assert_eq!(heap.live_cells(), 0);
}

#[test]
fn test_descriptor_and_callback_kinds_coexist() {
    struct Pair {
        left: Option<GcPtr<TestObject>>,
        tag: u64,
        right: Option<GcPtr<TestObject>>,
    }

    let heap = test_heap();
    heap.register_kind(
        HeapKind::AccessorPair,
        MarkProcedure::Descriptor(mark_descriptor!(Pair, left, right)),
    );

    let left = heap.alloc(HeapKind::Object, TestObject::new(10));
    let right = heap.alloc(HeapKind::Object, TestObject::new(20));
    let pair = heap.alloc(
        HeapKind::AccessorPair,
        Pair {
            left: Some(left),
            tag: 99,
            right: Some(right),
        },
    );
    heap.alloc(HeapKind::Object, TestObject::new(30));

    heap.collect(&[pair.as_header_ptr()]);
    assert_eq!(heap.live_count_of(HeapKind::Object), 2);
    assert_eq!(pair.tag, 99);
    assert_eq!(pair.left.map(|o| o.value), Some(10));
    assert_eq!(pair.right.map(|o| o.value), Some(20));
}

#[test]
#[should_panic(expected = "registered twice")]
fn test_double_registration_panics() {
    let heap = test_heap();
    heap.register_kind(HeapKind::Object, MarkProcedure::Leaf);
}

#[test]
fn test_compressed_id_resolves_to_header() {
    let heap = test_heap();
    let cells: Vec<GcPtr<TestObject>> = (0..2000)
        .map(|i| heap.alloc(HeapKind::Object, TestObject::new(i)))
        .collect();

    for cell in &cells {
        let id = cell.header().cell_id();
        assert!(id < (1 << 31));
        assert_eq!(heap.header_for_cell_id(id), cell.as_header_ptr());
    }
    let ids: std::collections::HashSet<u32> = cells.iter().map(|c| c.header().cell_id()).collect();
    assert_eq!(ids.len(), cells.len());
}

#[test]
fn test_disappearing_link_cleared_when_target_dies() {
    let heap = test_heap();
    let owner = heap.alloc(HeapKind::Object, TestObject::new(1));
    let target = heap.alloc(HeapKind::Object, TestObject::new(2));
    let link = heap.register_disappearing_link(owner.as_header_ptr(), target.as_header_ptr());

    // Target reachable through a root
    heap.collect(&[owner.as_header_ptr(), target.as_header_ptr()]);
    assert_eq!(heap.link_target(link), Some(target.as_header_ptr()));

    // Only the owner is rooted; the weak link does not keep the target
    heap.collect(&[owner.as_header_ptr()]);
    assert_eq!(heap.link_target(link), None);
    assert_eq!(heap.live_cells(), 1);

    // The owner dies and the link is released
    heap.collect(&[]);
    assert_eq!(heap.link_count(), 0);
}

#[test]
fn test_finalizer_fires_once_and_roots_owner() {
    let heap = test_heap();
    let owner = heap.alloc(HeapKind::Object, TestObject::new(1));
    let target = heap.alloc(HeapKind::Object, TestObject::new(2));
    heap.register_finalizer(target.as_header_ptr(), owner.as_header_ptr(), 5);
    assert_eq!(heap.pending_finalizer_count(), 1);

    heap.collect(&[owner.as_header_ptr()]);
    assert!(heap.has_fired_finalizers());
    assert_eq!(heap.pending_finalizer_count(), 0);

    // The owner stays alive without roots until the queue is drained
    heap.collect(&[]);
    assert_eq!(heap.live_cells(), 1);

    let fired = heap.take_fired_finalizers();
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].owner, owner.as_header_ptr());
    assert_eq!(fired[0].token, 5);

    heap.collect(&[]);
    assert_eq!(heap.live_cells(), 0);
    assert!(heap.take_fired_finalizers().is_empty());
}

#[test]
fn test_finalizer_with_dead_owner_never_fires() {
    let heap = test_heap();
    let owner = heap.alloc(HeapKind::Object, TestObject::new(1));
    let target = heap.alloc(HeapKind::Object, TestObject::new(2));
    heap.register_finalizer(target.as_header_ptr(), owner.as_header_ptr(), 1);

    heap.collect(&[]);
    assert!(!heap.has_fired_finalizers());
    assert_eq!(heap.pending_finalizer_count(), 0);
}

#[test]
fn test_iterate_kind_counts_live_cells_only() {
    let heap = test_heap();
    let a = heap.alloc(HeapKind::Object, TestObject::new(1));
    let b = heap.alloc(HeapKind::Object, TestObject::new(2));
    heap.alloc(HeapKind::Object, TestObject::new(3));
    a.reference.set(Some(b.as_header_ptr()));

    let mut sum = 0;
    let visited = heap.iterate_kind(HeapKind::Object, &[a.as_header_ptr()], &mut |cell| {
        sum += unsafe { GcPtr::<TestObject>::from_header(cell) }.value;
    });
    assert_eq!(visited, 2);
    assert_eq!(sum, 3);
}

#[test]
fn test_stress_mode_always_requests_collection() {
    let heap = GcHeap::new(GcConfig {
        stress: true,
        ..GcConfig::default()
    });
    assert!(heap.should_collect());
}

/// Slot holding either a small integer or a header address.
#[derive(Clone, Copy)]
struct TaggedSlot(usize);

impl Slot for TaggedSlot {
    const EMPTY: Self = TaggedSlot(1);
}

impl TraceSlot for TaggedSlot {
    fn traced_pointer(&self) -> Option<*const GcHeader> {
        (self.0 & 1 == 0).then_some(self.0 as *const GcHeader)
    }
}

#[test]
fn test_vector_buffer_traces_only_initialized_prefix() {
    let heap = conch_gc::heap();
    if !heap.is_kind_registered(HeapKind::Object) {
        heap.register_kind(HeapKind::Object, MarkProcedure::Callback(trace_test_object));
    }
    if !heap.is_kind_registered(HeapKind::ValueVector) {
        heap.register_kind(
            HeapKind::ValueVector,
            MarkProcedure::Iterable(iterate_vector_buffer::<TaggedSlot>),
        );
    }

    let kept = heap.alloc(HeapKind::Object, TestObject::new(1));
    let dropped = heap.alloc(HeapKind::Object, TestObject::new(2));

    let mut vector: GcVector<TaggedSlot, ValueVectorAllocator> = GcVector::new();
    vector.push(TaggedSlot(kept.as_header_ptr() as usize));
    vector.push(TaggedSlot(dropped.as_header_ptr() as usize));
    vector.pop();
    vector.push(TaggedSlot(3));

    let before = heap.live_count_of(HeapKind::Object);
    heap.collect(&[vector.buffer_header().unwrap()]);
    assert_eq!(heap.live_count_of(HeapKind::Object), before - 1);
    assert_eq!(kept.value, 1);
}
