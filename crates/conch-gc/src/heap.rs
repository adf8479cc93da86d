//! Kind-tagged mark/sweep heap.
//!
//! ## Design
//!
//! - **Kinds**: every cell is allocated under a [`HeapKind`] whose registered
//!   [`MarkProcedure`] finds the pointers inside it
//! - **Block-Based Allocation**: cells live in 16KB blocks, one directory per
//!   (kind, size class); cells over 8KB get individual allocations
//! - **Compressed ids**: every cell carries a 31-bit id resolvable through
//!   [`GcHeap::header_for_cell_id`], used by 4-byte encoded slots
//! - **Stop-the-world**: [`GcHeap::collect`] runs reset, mark, weak
//!   processing and sweep in one pause. Allocation never collects; the
//!   embedder calls `collect` at safe points when [`GcHeap::should_collect`]
//! - **Weak state**: disappearing links are nulled and finalizers queued
//!   between mark and sweep; queued finalizers never run inside the pause

use std::alloc::Layout;
use std::cell::{Cell, RefCell};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crate::finalization::{FinalizerId, FinalizerTable, FiredFinalizer};
use crate::kind::{HeapKind, KindTable, MarkProcedure};
use crate::marked_block::{
    BlockDirectory, BlockTable, DropFn, LARGE_OBJECT_THRESHOLD, NUM_SIZE_CLASSES,
    size_class_cell_size, size_class_index,
};
use crate::object::{GcAllocation, GcHeader, GcPtr, MarkColor};
use crate::weak_ref::{DisappearingLinks, LinkId};

/// Compressed-id bit marking a large-object slot.
pub const LARGE_ID_BIT: u32 = 1 << 30;

/// GC configuration
#[derive(Debug, Clone)]
pub struct GcConfig {
    /// Bytes allocated before the first collection is requested (default: 1MB)
    pub initial_threshold: usize,
    /// Lower bound of the adaptive threshold (default: 256KB)
    pub min_threshold: usize,
    /// Threshold = live bytes x factor after each collection (default: 2.0)
    pub heap_growth_factor: f64,
    /// Request a collection at every safe point
    pub stress: bool,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            initial_threshold: 1024 * 1024,
            min_threshold: 256 * 1024,
            heap_growth_factor: 2.0,
            stress: false,
        }
    }
}

/// A large cell (> 8KB), individually allocated.
struct LargeAllocation {
    /// Pointer to the GcHeader at the start of the allocation
    header: *mut GcHeader,
    /// Size of the allocation (header + value)
    size: usize,
    /// Drop-and-deallocate function for this allocation
    drop_fn: DropFn,
}

/// Statistics from the heap
#[derive(Debug, Clone, Copy)]
pub struct HeapStats {
    /// Total bytes currently allocated
    pub total_bytes: usize,
    /// Number of live cells
    pub live_cells: usize,
    /// Current collection threshold in bytes
    pub threshold: usize,
    /// Total number of collections performed
    pub collection_count: usize,
    /// Bytes reclaimed in last collection
    pub last_reclaimed: usize,
    /// Cells freed in last collection
    pub last_freed_cells: usize,
    /// Blocks currently held by all directories
    pub block_count: usize,
    /// Total pause time accumulated across all collections
    pub total_pause_time: Duration,
    /// Pause time of the last collection
    pub last_pause_time: Duration,
}

/// Guard returned by [`GcHeap::disable_collection`].
///
/// Collection stays disabled while any guard is alive.
#[must_use = "collection is re-enabled as soon as the guard is dropped"]
pub struct CollectionDisabled<'a> {
    heap: &'a GcHeap,
}

impl Drop for CollectionDisabled<'_> {
    fn drop(&mut self) {
        let depth = self.heap.disable_depth.get();
        self.heap.disable_depth.set(depth - 1);
    }
}

/// The heap: kind registry, block directories, large objects and weak state.
pub struct GcHeap {
    config: RefCell<GcConfig>,
    kinds: RefCell<KindTable>,
    blocks: BlockTable,
    /// Indexed `[kind][size class]`.
    directories: Vec<Vec<BlockDirectory>>,
    large_objects: RefCell<Vec<Option<LargeAllocation>>>,
    large_free: RefCell<Vec<u32>>,
    links: DisappearingLinks,
    finalizers: FinalizerTable,
    total_bytes: AtomicUsize,
    threshold: AtomicUsize,
    collection_count: AtomicUsize,
    last_reclaimed: AtomicUsize,
    last_freed_cells: AtomicUsize,
    total_pause_nanos: AtomicU64,
    last_pause_nanos: AtomicU64,
    /// Cumulative allocations per kind
    allocations_by_kind: [AtomicUsize; HeapKind::COUNT],
    disable_depth: Cell<usize>,
    collecting: Cell<bool>,
    #[cfg(feature = "leak_checker")]
    leak_checker: crate::leak_checker::LeakChecker,
}

impl GcHeap {
    /// Create a heap with the given configuration
    pub fn new(config: GcConfig) -> Self {
        let directories = HeapKind::ALL
            .iter()
            .map(|_| {
                (0..NUM_SIZE_CLASSES)
                    .map(|i| BlockDirectory::new(size_class_cell_size(i)))
                    .collect()
            })
            .collect();

        Self {
            threshold: AtomicUsize::new(config.initial_threshold),
            config: RefCell::new(config),
            kinds: RefCell::new(KindTable::new()),
            blocks: BlockTable::new(),
            directories,
            large_objects: RefCell::new(Vec::new()),
            large_free: RefCell::new(Vec::new()),
            links: DisappearingLinks::new(),
            finalizers: FinalizerTable::new(),
            total_bytes: AtomicUsize::new(0),
            collection_count: AtomicUsize::new(0),
            last_reclaimed: AtomicUsize::new(0),
            last_freed_cells: AtomicUsize::new(0),
            total_pause_nanos: AtomicU64::new(0),
            last_pause_nanos: AtomicU64::new(0),
            allocations_by_kind: std::array::from_fn(|_| AtomicUsize::new(0)),
            disable_depth: Cell::new(0),
            collecting: Cell::new(false),
            #[cfg(feature = "leak_checker")]
            leak_checker: crate::leak_checker::LeakChecker::new(),
        }
    }

    /// Replace the configuration. The threshold restarts from
    /// `initial_threshold`.
    pub fn configure(&self, config: GcConfig) {
        self.threshold
            .store(config.initial_threshold, Ordering::Relaxed);
        *self.config.borrow_mut() = config;
    }

    /// Current configuration.
    pub fn config(&self) -> GcConfig {
        self.config.borrow().clone()
    }

    // ---------------------------------------------------------------
    // Kinds
    // ---------------------------------------------------------------

    /// Register the mark procedure of `kind`.
    ///
    /// # Panics
    /// Panics if `kind` is already registered on this heap.
    pub fn register_kind(&self, kind: HeapKind, procedure: MarkProcedure) {
        #[cfg(feature = "gc_logging")]
        tracing::debug!(
            target: "conch::gc",
            kind = kind.name(),
            procedure = procedure.shape(),
            "heap kind registered"
        );
        self.kinds.borrow_mut().register(kind, procedure);
    }

    /// Whether `kind` has a mark procedure on this heap.
    pub fn is_kind_registered(&self, kind: HeapKind) -> bool {
        self.kinds.borrow().is_registered(kind)
    }

    fn assert_registered(&self, kind: HeapKind) {
        if !self.is_kind_registered(kind) {
            panic!("heap kind {kind} used before registration");
        }
    }

    // ---------------------------------------------------------------
    // Allocation
    // ---------------------------------------------------------------

    /// Allocate `value` in a cell of `kind`.
    ///
    /// Allocation never triggers a collection.
    ///
    /// # Panics
    /// Panics if `kind` is not registered or `T` needs more than 8-byte
    /// alignment.
    pub fn alloc<T: 'static>(&self, kind: HeapKind, value: T) -> GcPtr<T> {
        self.assert_registered(kind);
        let layout = Layout::new::<GcAllocation<T>>();
        assert!(layout.align() <= 8, "cell payloads must be at most 8-byte aligned");
        debug_assert_eq!(
            std::mem::offset_of!(GcAllocation<T>, value),
            GcHeader::PAYLOAD_OFFSET
        );
        let size = layout.size();

        let (ptr, cell_id) = match size_class_index(size) {
            Some(sc) if size <= LARGE_OBJECT_THRESHOLD => {
                self.directories[kind.index()][sc].allocate(&self.blocks, size, drop_cell_in_block::<T>)
            }
            _ => {
                // SAFETY: layout is valid and non-zero sized (it contains the header)
                let raw = unsafe { std::alloc::alloc(layout) };
                if raw.is_null() {
                    std::alloc::handle_alloc_error(layout);
                }
                let cell_id = self.register_large(raw as *mut GcHeader, size, drop_large_cell::<T>);
                (raw, cell_id)
            }
        };

        let cell = ptr as *mut GcAllocation<T>;
        // SAFETY: ptr is non-null, aligned and sized for GcAllocation<T>
        unsafe {
            std::ptr::write(&raw mut (*cell).header, GcHeader::new(kind, cell_id));
            std::ptr::write(&raw mut (*cell).value, value);
        }

        self.total_bytes.fetch_add(size, Ordering::Relaxed);
        self.allocations_by_kind[kind.index()].fetch_add(1, Ordering::Relaxed);

        // SAFETY: the cell was just initialized
        unsafe { GcPtr::from_header(cell as *const GcHeader) }
    }

    fn register_large(&self, header: *mut GcHeader, size: usize, drop_fn: DropFn) -> u32 {
        let entry = LargeAllocation {
            header,
            size,
            drop_fn,
        };
        let mut large = self.large_objects.borrow_mut();
        let index = match self.large_free.borrow_mut().pop() {
            Some(index) => {
                large[index as usize] = Some(entry);
                index
            }
            None => {
                large.push(Some(entry));
                large.len() as u32 - 1
            }
        };
        if index >= LARGE_ID_BIT {
            panic!("large object table exhausted the compressed cell id space");
        }
        LARGE_ID_BIT | index
    }

    /// Resolve a compressed cell id to its header.
    ///
    /// # Panics
    /// Panics if the id does not name a live cell; a stale id means a slot
    /// outlived its target, which is heap corruption.
    pub fn header_for_cell_id(&self, cell_id: u32) -> *const GcHeader {
        if cell_id & LARGE_ID_BIT != 0 {
            let index = (cell_id & !LARGE_ID_BIT) as usize;
            return match self.large_objects.borrow().get(index) {
                Some(Some(entry)) => entry.header,
                _ => panic!("compressed cell id {cell_id:#x} names no large object"),
            };
        }
        self.blocks.header_for_cell_id(cell_id)
    }

    // ---------------------------------------------------------------
    // Accounting
    // ---------------------------------------------------------------

    /// Get total allocated bytes
    pub fn total_bytes(&self) -> usize {
        self.total_bytes.load(Ordering::Relaxed)
    }

    /// Current collection threshold
    pub fn threshold(&self) -> usize {
        self.threshold.load(Ordering::Relaxed)
    }

    /// Whether the embedder should collect at its next safe point
    pub fn should_collect(&self) -> bool {
        self.config.borrow().stress || self.total_bytes() >= self.threshold()
    }

    /// Number of live cells (blocks + large objects).
    pub fn live_cells(&self) -> usize {
        let block_cells: usize = self
            .directories
            .iter()
            .flatten()
            .map(|d| d.live_count())
            .sum();
        block_cells + self.large_objects.borrow().iter().flatten().count()
    }

    /// Number of live cells of `kind`.
    pub fn live_count_of(&self, kind: HeapKind) -> usize {
        let mut count = 0;
        self.for_each_cell(kind, &mut |_| count += 1);
        count
    }

    /// Cumulative number of allocations of `kind` since the heap was created.
    pub fn allocations_of(&self, kind: HeapKind) -> usize {
        self.allocations_by_kind[kind.index()].load(Ordering::Relaxed)
    }

    /// Get collection statistics
    pub fn stats(&self) -> HeapStats {
        HeapStats {
            total_bytes: self.total_bytes(),
            live_cells: self.live_cells(),
            threshold: self.threshold(),
            collection_count: self.collection_count.load(Ordering::Relaxed),
            last_reclaimed: self.last_reclaimed.load(Ordering::Relaxed),
            last_freed_cells: self.last_freed_cells.load(Ordering::Relaxed),
            block_count: self.blocks.block_count(),
            total_pause_time: Duration::from_nanos(self.total_pause_nanos.load(Ordering::Relaxed)),
            last_pause_time: Duration::from_nanos(self.last_pause_nanos.load(Ordering::Relaxed)),
        }
    }

    // ---------------------------------------------------------------
    // Collection
    // ---------------------------------------------------------------

    /// Disable collection until the returned guard is dropped. Guards nest.
    pub fn disable_collection(&self) -> CollectionDisabled<'_> {
        self.disable_depth.set(self.disable_depth.get() + 1);
        CollectionDisabled { heap: self }
    }

    /// Whether [`GcHeap::collect`] would currently run.
    pub fn is_collection_enabled(&self) -> bool {
        self.disable_depth.get() == 0 && !self.collecting.get()
    }

    /// Perform a full mark/sweep collection.
    ///
    /// Owners of fired-but-undrained finalizers are added to `roots`.
    /// Returns the number of bytes reclaimed; 0 when collection is disabled.
    pub fn collect(&self, roots: &[*const GcHeader]) -> usize {
        if !self.is_collection_enabled() {
            #[cfg(feature = "gc_logging")]
            tracing::debug!(target: "conch::gc", "collection skipped: disabled");
            return 0;
        }
        self.collecting.set(true);
        let start = Instant::now();

        #[cfg(feature = "gc_logging")]
        let initial_cells = self.live_cells();
        #[cfg(feature = "gc_logging")]
        tracing::debug!(
            target: "conch::gc",
            roots = roots.len(),
            heap_bytes = self.total_bytes(),
            cells = initial_cells,
            "GC cycle starting"
        );

        // Phase 1: Reset all marks to white
        self.reset_marks();

        // Phase 2: Mark from roots
        let mut all_roots = roots.to_vec();
        all_roots.extend(self.finalizers.fired_owners());
        self.mark(&all_roots);

        // Phase 3: Weak processing, before any cell is freed
        // SAFETY: marks are final and nothing has been swept yet
        let _link_sweep = unsafe { self.links.process() };
        let _finalizer_sweep = unsafe { self.finalizers.process() };
        #[cfg(feature = "leak_checker")]
        unsafe {
            self.leak_checker.process();
        }

        #[cfg(feature = "gc_logging")]
        tracing::debug!(
            target: "conch::gc",
            links_cleared = _link_sweep.cleared,
            links_released = _link_sweep.released,
            finalizers_fired = _finalizer_sweep.fired,
            finalizers_dropped = _finalizer_sweep.dropped,
            "weak processing complete"
        );

        // Phase 4: Sweep unmarked cells
        let (reclaimed, freed) = self.sweep();

        let elapsed = start.elapsed();
        let elapsed_nanos = elapsed.as_nanos() as u64;
        let _collection_num = self.collection_count.fetch_add(1, Ordering::Relaxed) + 1;
        self.last_reclaimed.store(reclaimed, Ordering::Relaxed);
        self.last_freed_cells.store(freed, Ordering::Relaxed);
        self.total_pause_nanos
            .fetch_add(elapsed_nanos, Ordering::Relaxed);
        self.last_pause_nanos
            .store(elapsed_nanos, Ordering::Relaxed);
        self.update_threshold();

        #[cfg(feature = "gc_logging")]
        tracing::info!(
            target: "conch::gc",
            collection = _collection_num,
            reclaimed_bytes = reclaimed,
            freed_cells = freed,
            pause_us = elapsed.as_micros() as u64,
            live_bytes = self.total_bytes(),
            next_threshold = self.threshold(),
            "GC cycle complete"
        );

        self.collecting.set(false);
        reclaimed
    }

    fn update_threshold(&self) {
        let config = self.config.borrow();
        let live = self.total_bytes() as f64;
        let next = (live * config.heap_growth_factor) as usize;
        self.threshold
            .store(next.max(config.min_threshold), Ordering::Relaxed);
    }

    fn reset_marks(&self) {
        for dir in self.directories.iter().flatten() {
            dir.clear_marks();
        }
        for entry in self.large_objects.borrow().iter().flatten() {
            // SAFETY: registered large objects are initialized
            unsafe { (*entry.header).set_mark(MarkColor::White) };
        }
    }

    /// Mark phase: trace from roots with each kind's mark procedure.
    fn mark(&self, roots: &[*const GcHeader]) {
        let kinds = self.kinds.borrow();
        let mut worklist: Vec<*const GcHeader> = Vec::with_capacity(roots.len());

        for &root in roots {
            if root.is_null() {
                continue;
            }
            // SAFETY: roots are live headers supplied by the embedder
            let header = unsafe { &*root };
            if header.mark() == MarkColor::White {
                header.set_mark(MarkColor::Gray);
                worklist.push(root);
            }
        }

        while let Some(ptr) = worklist.pop() {
            // SAFETY: only live headers are ever pushed
            let header = unsafe { &*ptr };
            if header.mark() == MarkColor::Black {
                continue;
            }

            let procedure = kinds.procedure(header.kind());
            unsafe {
                procedure.visit(header.payload(), &mut |child| {
                    if child.is_null() {
                        return;
                    }
                    let child_header = &*child;
                    if child_header.mark() == MarkColor::White {
                        child_header.set_mark(MarkColor::Gray);
                        worklist.push(child);
                    }
                });
            }

            header.set_mark(MarkColor::Black);
        }
    }

    /// Sweep phase: free all white cells. Returns (bytes, cells).
    fn sweep(&self) -> (usize, usize) {
        let mut reclaimed = 0;
        let mut freed = 0;

        for dir in self.directories.iter().flatten() {
            let (bytes, cells) = dir.sweep(&self.blocks);
            reclaimed += bytes;
            freed += cells;
        }

        let mut dead = Vec::new();
        {
            let mut large = self.large_objects.borrow_mut();
            let mut large_free = self.large_free.borrow_mut();
            for (index, slot) in large.iter_mut().enumerate() {
                let is_dead = match slot {
                    // SAFETY: registered large objects are initialized
                    Some(entry) => (unsafe { (*entry.header).mark() }) == MarkColor::White,
                    None => false,
                };
                if is_dead && let Some(entry) = slot.take() {
                    reclaimed += entry.size;
                    large_free.push(index as u32);
                    dead.push(entry);
                }
            }
        }
        freed += dead.len();
        for entry in dead {
            unsafe {
                (entry.drop_fn)(entry.header as *mut u8);
            }
        }

        self.total_bytes.fetch_sub(reclaimed, Ordering::Relaxed);
        (reclaimed, freed)
    }

    // ---------------------------------------------------------------
    // Kind iteration
    // ---------------------------------------------------------------

    fn snapshot_cells(&self, kind: HeapKind) -> Vec<*const GcHeader> {
        let mut cells = Vec::new();
        for dir in &self.directories[kind.index()] {
            dir.for_each_allocated(|header| cells.push(header));
        }
        for entry in self.large_objects.borrow().iter().flatten() {
            // SAFETY: registered large objects are initialized
            if unsafe { (*entry.header).kind() } == kind {
                cells.push(entry.header as *const GcHeader);
            }
        }
        cells
    }

    /// Visit every allocated cell of `kind` without collecting first.
    ///
    /// Cells that are already unreachable but not yet swept are included.
    pub fn for_each_cell(&self, kind: HeapKind, f: &mut dyn FnMut(*const GcHeader)) {
        for cell in self.snapshot_cells(kind) {
            f(cell);
        }
    }

    /// Force a full collection, then visit every live cell of `kind` with
    /// collection disabled. Returns the number of cells visited.
    ///
    /// This pauses for a full collection; keep it off hot paths.
    ///
    /// # Panics
    /// Panics if `kind` is not registered.
    pub fn iterate_kind(
        &self,
        kind: HeapKind,
        roots: &[*const GcHeader],
        callback: &mut dyn FnMut(*const GcHeader),
    ) -> usize {
        self.assert_registered(kind);
        self.collect(roots);

        let _disabled = self.disable_collection();
        let cells = self.snapshot_cells(kind);

        #[cfg(feature = "gc_logging")]
        tracing::debug!(
            target: "conch::gc",
            kind = kind.name(),
            cells = cells.len(),
            "iterating heap kind"
        );

        for &cell in &cells {
            callback(cell);
        }
        cells.len()
    }

    // ---------------------------------------------------------------
    // Weak state
    // ---------------------------------------------------------------

    /// Register a disappearing link from `owner` to `target`.
    pub fn register_disappearing_link(&self, owner: *const GcHeader, target: *const GcHeader) -> LinkId {
        self.links.register(owner, target)
    }

    /// Remove a disappearing link.
    pub fn unregister_disappearing_link(&self, id: LinkId) {
        self.links.unregister(id);
    }

    /// Target of a link, or `None` once the target was collected.
    pub fn link_target(&self, id: LinkId) -> Option<*const GcHeader> {
        self.links.target(id)
    }

    /// Number of registered links.
    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// Register a finalizer notification for `target`, delivered to `owner`
    /// with `token` once the target dies.
    pub fn register_finalizer(&self, target: *const GcHeader, owner: *const GcHeader, token: u64) -> FinalizerId {
        self.finalizers.register(target, owner, token)
    }

    /// Cancel a finalizer. Returns whether it was still pending.
    pub fn unregister_finalizer(&self, id: FinalizerId) -> bool {
        self.finalizers.unregister(id)
    }

    /// Number of finalizers still waiting for their target to die.
    pub fn pending_finalizer_count(&self) -> usize {
        self.finalizers.len()
    }

    /// Whether fired finalizers are waiting to be drained.
    pub fn has_fired_finalizers(&self) -> bool {
        self.finalizers.has_fired()
    }

    /// Drain fired finalizers. Their owners stop being roots.
    pub fn take_fired_finalizers(&self) -> Vec<FiredFinalizer> {
        self.finalizers.take_fired()
    }

    /// Leak checker of this heap.
    #[cfg(feature = "leak_checker")]
    pub fn leak_checker(&self) -> &crate::leak_checker::LeakChecker {
        &self.leak_checker
    }

    // ---------------------------------------------------------------
    // Teardown
    // ---------------------------------------------------------------

    /// Deallocate every cell without marking. Returns bytes reclaimed.
    pub fn dealloc_all(&self) -> usize {
        let total = self.total_bytes();

        for dir in self.directories.iter().flatten() {
            dir.dealloc_all();
        }

        let entries: Vec<LargeAllocation> = self
            .large_objects
            .borrow_mut()
            .drain(..)
            .flatten()
            .collect();
        self.large_free.borrow_mut().clear();
        for entry in entries {
            unsafe {
                (entry.drop_fn)(entry.header as *mut u8);
            }
        }

        self.total_bytes.store(0, Ordering::Relaxed);
        total
    }
}

impl Default for GcHeap {
    fn default() -> Self {
        Self::new(GcConfig::default())
    }
}

impl Drop for GcHeap {
    fn drop(&mut self) {
        self.dealloc_all();
    }
}

/// Drop function for block-allocated cells.
///
/// Only drops the value in-place (the block owns the memory).
unsafe fn drop_cell_in_block<T>(ptr: *mut u8) {
    let cell = ptr as *mut GcAllocation<T>;
    // SAFETY: ptr points to an initialized GcAllocation<T>
    unsafe {
        std::ptr::drop_in_place(&raw mut (*cell).value);
    }
}

/// Drop function for large cells (individually allocated).
unsafe fn drop_large_cell<T>(ptr: *mut u8) {
    let layout = Layout::new::<GcAllocation<T>>();
    let cell = ptr as *mut GcAllocation<T>;
    // SAFETY: ptr points to an initialized GcAllocation<T> allocated with `layout`
    unsafe {
        std::ptr::drop_in_place(&raw mut (*cell).value);
        std::alloc::dealloc(ptr, layout);
    }
}

// Thread-local heap.
//
// Each thread gets its own heap so that collections in one thread (with that
// thread's roots) never sweep cells belonging to another. The heap is leaked
// to produce a `&'static` reference; each thread leaks exactly one heap.
thread_local! {
    static THREAD_HEAP: &'static GcHeap = Box::leak(Box::new(GcHeap::default()));
}

/// Get the thread-local heap
pub fn heap() -> &'static GcHeap {
    THREAD_HEAP.with(|h| *h)
}
