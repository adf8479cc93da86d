//! Block-based allocation.
//!
//! Cells are allocated in fixed-size blocks (16KB). Each block is dedicated
//! to a single (kind, size class) pair. Allocation finds a free cell via
//! bitmap scan. Sweeping is per-block; entirely-dead blocks beyond a small
//! burst buffer are released.
//!
//! ## Layout
//!
//! ```text
//! MarkedBlock (16KB total storage):
//! ┌──────────────────────────────┐
//! │ Cell 0: [u8; cell_size]      │  (GcHeader + T written by caller)
//! │ Cell 1: [u8; cell_size]      │
//! │ ...                          │
//! │ Cell K: [u8; cell_size]      │
//! └──────────────────────────────┘
//!
//! Metadata stored separately (not inline):
//!   - free_bits: bitvec, 1 = free, 0 = allocated
//!   - drop_fns: per-cell function pointers
//! ```
//!
//! Every block owns an id in the [`BlockTable`]. A cell's compressed id is
//! `block_id << CELL_INDEX_BITS | cell_index`.

use std::cell::{Cell, RefCell};

use crate::object::{GcHeader, MarkColor};

/// Block size: 16KB.
pub const BLOCK_SIZE: usize = 16 * 1024;

/// Bits of a compressed cell id holding the cell index inside its block.
pub const CELL_INDEX_BITS: u32 = 10;

/// Largest block id that still fits a 31-bit compressed cell id.
pub const MAX_BLOCK_ID: u32 = (1 << (30 - CELL_INDEX_BITS)) - 1;

/// Size classes for segregated allocation.
/// Cells are rounded up to the nearest size class.
/// Covers 16 bytes to 8KB. Larger cells use large-object space.
const SIZE_CLASSES: &[usize] = &[
    16, 32, 48, 64, 96, 128, 192, 256, 384, 512, 1024, 2048, 4096, 8192,
];

/// Large object threshold: cells bigger than this bypass block allocation.
pub const LARGE_OBJECT_THRESHOLD: usize = 8192;

/// Number of size classes.
pub const NUM_SIZE_CLASSES: usize = 14; // must match SIZE_CLASSES.len()

/// Type-erased drop function for cleaning up allocations
pub type DropFn = unsafe fn(*mut u8);

/// Find the size class index for a given allocation size.
/// Returns `None` if the size exceeds the largest size class (large object).
#[inline]
pub fn size_class_index(size: usize) -> Option<usize> {
    SIZE_CLASSES.iter().position(|&sc| sc >= size)
}

/// Get the cell size for a given size class index.
#[inline]
pub fn size_class_cell_size(index: usize) -> usize {
    SIZE_CLASSES[index]
}

/// Compose a compressed cell id.
#[inline]
pub fn compose_cell_id(block_id: u32, cell_index: usize) -> u32 {
    (block_id << CELL_INDEX_BITS) | cell_index as u32
}

/// A 16KB block of memory containing fixed-size cells.
pub struct MarkedBlock {
    /// Raw storage for cells (16KB, 8-byte aligned via Vec<u64>).
    storage: Vec<u64>,
    /// Id of this block in the block table.
    block_id: u32,
    /// Cell size in bytes (one of SIZE_CLASSES).
    cell_size: usize,
    /// Number of cells that fit in this block.
    num_cells: usize,
    /// Free bitvector: bit N = 1 means cell N is free.
    free_bits: RefCell<Vec<u64>>,
    /// Per-cell drop function (set when cell is allocated, cleared on free).
    cell_drop_fns: RefCell<Vec<Option<DropFn>>>,
    /// Per-cell allocation size (actual size, for stats tracking).
    cell_sizes: RefCell<Vec<usize>>,
    /// Number of live (allocated) cells.
    live_count: Cell<usize>,
}

impl MarkedBlock {
    /// Create a new block for the given cell size.
    pub fn new(block_id: u32, cell_size: usize) -> Self {
        assert!(cell_size >= 16, "cell size must be at least 16 bytes");
        assert!(
            cell_size.is_multiple_of(8),
            "cell size must be 8-byte aligned"
        );

        let num_cells = BLOCK_SIZE / cell_size;
        assert!(num_cells > 0, "cell size too large for block");
        debug_assert!(num_cells <= 1 << CELL_INDEX_BITS);

        let storage = vec![0u64; BLOCK_SIZE.div_ceil(8)];

        // All cells start free
        let num_words = num_cells.div_ceil(64);
        let mut free_bits = vec![u64::MAX; num_words];
        let remainder = num_cells % 64;
        if remainder != 0 {
            free_bits[num_words - 1] = (1u64 << remainder) - 1;
        }

        Self {
            storage,
            block_id,
            cell_size,
            num_cells,
            free_bits: RefCell::new(free_bits),
            cell_drop_fns: RefCell::new(vec![None; num_cells]),
            cell_sizes: RefCell::new(vec![0usize; num_cells]),
            live_count: Cell::new(0),
        }
    }

    /// Try to allocate a cell in this block.
    ///
    /// Returns a pointer to the start of the cell (where GcHeader goes) and
    /// the cell index, or `None` if the block is full. The caller must write
    /// the header and value before the next collection.
    pub fn allocate(&self, actual_size: usize, drop_fn: DropFn) -> Option<(*mut u8, usize)> {
        let mut free_bits = self.free_bits.borrow_mut();

        for (word_idx, word) in free_bits.iter_mut().enumerate() {
            if *word == 0 {
                continue;
            }

            let bit_idx = word.trailing_zeros() as usize;
            let cell_idx = word_idx * 64 + bit_idx;
            if cell_idx >= self.num_cells {
                return None;
            }

            *word &= !(1u64 << bit_idx);
            self.cell_drop_fns.borrow_mut()[cell_idx] = Some(drop_fn);
            self.cell_sizes.borrow_mut()[cell_idx] = actual_size;
            self.live_count.set(self.live_count.get() + 1);

            let ptr = self.storage.as_ptr() as *mut u8;
            // SAFETY: cell_idx < num_cells, so the cell lies inside storage
            let cell_ptr = unsafe { ptr.add(cell_idx * self.cell_size) };
            return Some((cell_ptr, cell_idx));
        }

        None
    }

    /// Check if this block is full (no free cells).
    #[inline]
    pub fn is_full(&self) -> bool {
        self.live_count.get() == self.num_cells
    }

    /// Check if this block is empty (all cells free).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.live_count.get() == 0
    }

    /// Get number of live cells.
    #[inline]
    pub fn live_count(&self) -> usize {
        self.live_count.get()
    }

    /// Id of this block in the block table.
    #[inline]
    pub fn block_id(&self) -> u32 {
        self.block_id
    }

    /// Get the cell size for this block.
    #[inline]
    pub fn cell_size(&self) -> usize {
        self.cell_size
    }

    /// Get the number of cells in this block.
    #[inline]
    pub fn num_cells(&self) -> usize {
        self.num_cells
    }

    #[inline]
    fn is_free(free_bits: &[u64], cell_idx: usize) -> bool {
        free_bits[cell_idx / 64] & (1u64 << (cell_idx % 64)) != 0
    }

    /// Whether cell `cell_idx` currently holds an object.
    pub fn is_allocated(&self, cell_idx: usize) -> bool {
        cell_idx < self.num_cells && !Self::is_free(&self.free_bits.borrow(), cell_idx)
    }

    /// Set every allocated cell to White.
    pub fn clear_marks(&self) {
        self.for_each_allocated(|header| {
            // SAFETY: allocated cells always start with an initialized header
            unsafe { (*header).set_mark(MarkColor::White) }
        });
    }

    /// Sweep this block: free all white (unreachable) cells.
    ///
    /// Returns the number of bytes reclaimed and the number of cells freed.
    pub fn sweep(&self) -> (usize, usize) {
        let base = self.storage.as_ptr() as *mut u8;
        let mut free_bits = self.free_bits.borrow_mut();
        let mut drop_fns = self.cell_drop_fns.borrow_mut();
        let mut sizes = self.cell_sizes.borrow_mut();
        let mut reclaimed: usize = 0;

        // Drop functions run after the borrows are released
        let mut to_drop: Vec<(*mut u8, DropFn)> = Vec::new();

        for cell_idx in 0..self.num_cells {
            if Self::is_free(&free_bits, cell_idx) {
                continue;
            }

            let offset = cell_idx * self.cell_size;
            // SAFETY: allocated cell inside storage
            let header_ptr = unsafe { base.add(offset) as *const GcHeader };
            let mark = unsafe { (*header_ptr).mark() };

            if mark == MarkColor::White {
                if let Some(drop_fn) = drop_fns[cell_idx] {
                    to_drop.push((unsafe { base.add(offset) }, drop_fn));
                }
                free_bits[cell_idx / 64] |= 1u64 << (cell_idx % 64);
                drop_fns[cell_idx] = None;
                reclaimed += sizes[cell_idx];
                sizes[cell_idx] = 0;
                self.live_count.set(self.live_count.get() - 1);
            }
        }

        drop(free_bits);
        drop(drop_fns);
        drop(sizes);

        let freed = to_drop.len();
        for (ptr, drop_fn) in to_drop {
            unsafe {
                drop_fn(ptr);
            }
        }

        (reclaimed, freed)
    }

    /// Deallocate ALL cells without checking marks.
    /// Used during heap teardown.
    ///
    /// Returns the number of bytes reclaimed.
    pub fn dealloc_all(&self) -> usize {
        let base = self.storage.as_ptr() as *mut u8;
        let mut free_bits = self.free_bits.borrow_mut();
        let mut drop_fns = self.cell_drop_fns.borrow_mut();
        let mut sizes = self.cell_sizes.borrow_mut();
        let mut reclaimed: usize = 0;
        let mut to_drop: Vec<(*mut u8, DropFn)> = Vec::new();

        for cell_idx in 0..self.num_cells {
            if Self::is_free(&free_bits, cell_idx) {
                continue;
            }
            if let Some(drop_fn) = drop_fns[cell_idx] {
                to_drop.push((unsafe { base.add(cell_idx * self.cell_size) }, drop_fn));
            }
            free_bits[cell_idx / 64] |= 1u64 << (cell_idx % 64);
            drop_fns[cell_idx] = None;
            reclaimed += sizes[cell_idx];
            sizes[cell_idx] = 0;
        }

        self.live_count.set(0);

        drop(free_bits);
        drop(drop_fns);
        drop(sizes);

        for (ptr, drop_fn) in to_drop {
            unsafe {
                drop_fn(ptr);
            }
        }

        reclaimed
    }

    /// Check if a pointer belongs to this block.
    #[inline]
    pub fn contains(&self, ptr: *const u8) -> bool {
        let base = self.storage.as_ptr() as usize;
        let addr = ptr as usize;
        addr >= base && addr < base + BLOCK_SIZE
    }

    /// Get the header pointer for a given cell index.
    ///
    /// # Safety
    /// `cell_idx` must be < `num_cells` and the cell must be allocated.
    #[inline]
    pub unsafe fn cell_header(&self, cell_idx: usize) -> *const GcHeader {
        let base = self.storage.as_ptr() as *const u8;
        unsafe { base.add(cell_idx * self.cell_size) as *const GcHeader }
    }

    /// Iterate over all allocated cells.
    pub fn for_each_allocated<F>(&self, mut f: F)
    where
        F: FnMut(*const GcHeader),
    {
        let base = self.storage.as_ptr() as *const u8;
        let free_bits = self.free_bits.borrow();

        for cell_idx in 0..self.num_cells {
            if Self::is_free(&free_bits, cell_idx) {
                continue;
            }
            let header_ptr = unsafe { base.add(cell_idx * self.cell_size) as *const GcHeader };
            f(header_ptr);
        }
    }
}

/// Id-indexed table of every block in a heap.
///
/// Blocks are boxed, so their addresses stay put while the table grows.
/// Ids of released blocks are recycled.
pub struct BlockTable {
    slots: RefCell<Vec<*const MarkedBlock>>,
    free_ids: RefCell<Vec<u32>>,
}

impl BlockTable {
    /// Create an empty table.
    ///
    /// Block id 0 is never issued, so compressed ids below
    /// `1 << CELL_INDEX_BITS` never name a cell.
    pub fn new() -> Self {
        Self {
            slots: RefCell::new(vec![std::ptr::null()]),
            free_ids: RefCell::new(Vec::new()),
        }
    }

    /// Reserve an id for a block about to be created.
    ///
    /// # Panics
    /// Panics if the compressed id space is exhausted.
    pub fn reserve(&self) -> u32 {
        if let Some(id) = self.free_ids.borrow_mut().pop() {
            return id;
        }
        let mut slots = self.slots.borrow_mut();
        let id = slots.len() as u32;
        if id > MAX_BLOCK_ID {
            panic!("block table exhausted the compressed cell id space");
        }
        slots.push(std::ptr::null());
        id
    }

    /// Install the block that owns `id`.
    pub fn install(&self, block: &MarkedBlock) {
        self.slots.borrow_mut()[block.block_id() as usize] = block as *const MarkedBlock;
    }

    /// Release the id of a block that is being freed.
    pub fn release(&self, id: u32) {
        self.slots.borrow_mut()[id as usize] = std::ptr::null();
        self.free_ids.borrow_mut().push(id);
    }

    /// Header of the cell with compressed id `cell_id`.
    ///
    /// # Panics
    /// Panics if the id does not name an allocated cell.
    pub fn header_for_cell_id(&self, cell_id: u32) -> *const GcHeader {
        let block_id = (cell_id >> CELL_INDEX_BITS) as usize;
        let cell_idx = (cell_id & ((1 << CELL_INDEX_BITS) - 1)) as usize;
        let slots = self.slots.borrow();
        let block = match slots.get(block_id) {
            Some(block) if !block.is_null() => *block,
            _ => panic!("compressed cell id {cell_id:#x} names no block"),
        };
        // SAFETY: installed blocks stay alive until released
        let block = unsafe { &*block };
        if !block.is_allocated(cell_idx) {
            panic!("compressed cell id {cell_id:#x} names a free cell");
        }
        unsafe { block.cell_header(cell_idx) }
    }

    /// Number of blocks currently installed.
    pub fn block_count(&self) -> usize {
        self.slots.borrow().iter().filter(|b| !b.is_null()).count()
    }
}

impl Default for BlockTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-(kind, size class) directory of blocks.
///
/// Allocation scans from the current block cursor forward.
pub struct BlockDirectory {
    /// The cell size for all blocks in this directory.
    cell_size: usize,
    /// All blocks in this directory.
    blocks: RefCell<Vec<Box<MarkedBlock>>>,
    /// Index of the current block to try allocating from.
    cursor: Cell<usize>,
}

impl BlockDirectory {
    /// Maximum number of empty blocks to retain per directory as a burst
    /// buffer. Additional empty blocks are freed.
    const MAX_EMPTY_BLOCKS: usize = 2;

    /// Create a new directory for the given cell size.
    pub fn new(cell_size: usize) -> Self {
        Self {
            cell_size,
            blocks: RefCell::new(Vec::new()),
            cursor: Cell::new(0),
        }
    }

    /// Allocate a cell from this directory.
    ///
    /// Tries the current block, then scans forward. If all blocks are full,
    /// allocates a new block registered in `table`.
    ///
    /// Returns a pointer to the cell start and the cell's compressed id.
    pub fn allocate(&self, table: &BlockTable, actual_size: usize, drop_fn: DropFn) -> (*mut u8, u32) {
        let mut blocks = self.blocks.borrow_mut();
        let num_blocks = blocks.len();

        if num_blocks > 0 {
            let start = self.cursor.get() % num_blocks;
            for i in 0..num_blocks {
                let idx = (start + i) % num_blocks;
                if let Some((ptr, cell_idx)) = blocks[idx].allocate(actual_size, drop_fn) {
                    self.cursor.set(idx);
                    return (ptr, compose_cell_id(blocks[idx].block_id(), cell_idx));
                }
            }
        }

        let block = Box::new(MarkedBlock::new(table.reserve(), self.cell_size));
        table.install(&block);
        let Some((ptr, cell_idx)) = block.allocate(actual_size, drop_fn) else {
            unreachable!("freshly created block has free cells");
        };
        let cell_id = compose_cell_id(block.block_id(), cell_idx);
        self.cursor.set(blocks.len());
        blocks.push(block);
        (ptr, cell_id)
    }

    /// Reset marks of every allocated cell.
    pub fn clear_marks(&self) {
        for block in self.blocks.borrow().iter() {
            block.clear_marks();
        }
    }

    /// Sweep all blocks, returning bytes reclaimed and cells freed.
    ///
    /// Excess empty blocks (beyond `MAX_EMPTY_BLOCKS`) are released and their
    /// ids returned to `table`.
    pub fn sweep(&self, table: &BlockTable) -> (usize, usize) {
        let mut reclaimed = 0;
        let mut freed = 0;
        {
            let blocks = self.blocks.borrow();
            for block in blocks.iter() {
                let (bytes, cells) = block.sweep();
                reclaimed += bytes;
                freed += cells;
            }
        }

        let mut empty_kept = 0usize;
        self.blocks.borrow_mut().retain(|block| {
            if block.is_empty() {
                if empty_kept < Self::MAX_EMPTY_BLOCKS {
                    empty_kept += 1;
                    true
                } else {
                    table.release(block.block_id());
                    false
                }
            } else {
                true
            }
        });

        self.cursor.set(0);
        (reclaimed, freed)
    }

    /// Deallocate all cells across all blocks (teardown).
    pub fn dealloc_all(&self) -> usize {
        self.blocks.borrow().iter().map(|b| b.dealloc_all()).sum()
    }

    /// Iterate over all allocated cells across all blocks.
    pub fn for_each_allocated<F>(&self, mut f: F)
    where
        F: FnMut(*const GcHeader),
    {
        for block in self.blocks.borrow().iter() {
            block.for_each_allocated(&mut f);
        }
    }

    /// Get total live count across all blocks.
    pub fn live_count(&self) -> usize {
        self.blocks.borrow().iter().map(|b| b.live_count()).sum()
    }

    /// Number of blocks held by this directory.
    pub fn block_count(&self) -> usize {
        self.blocks.borrow().len()
    }

    /// Get the cell size for this directory.
    #[inline]
    pub fn cell_size(&self) -> usize {
        self.cell_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    unsafe fn dummy_drop(_ptr: *mut u8) {}

    #[test]
    fn test_size_class_index() {
        assert_eq!(size_class_index(1), Some(0));
        assert_eq!(size_class_index(16), Some(0));
        assert_eq!(size_class_index(17), Some(1));
        assert_eq!(size_class_index(33), Some(2));
        assert_eq!(size_class_index(8192), Some(13));
        assert_eq!(size_class_index(8193), None);
    }

    #[test]
    fn test_marked_block_allocate() {
        let block = MarkedBlock::new(0, 64);
        let (p1, i1) = block.allocate(64, dummy_drop).unwrap();
        let (p2, i2) = block.allocate(64, dummy_drop).unwrap();
        assert_eq!(block.live_count(), 2);
        assert_eq!((i1, i2), (0, 1));
        assert_eq!(p2 as usize - p1 as usize, 64);
    }

    #[test]
    fn test_marked_block_fill() {
        let block = MarkedBlock::new(0, BLOCK_SIZE);
        assert_eq!(block.num_cells(), 1);
        assert!(block.allocate(BLOCK_SIZE, dummy_drop).is_some());
        assert!(block.is_full());
        assert!(block.allocate(BLOCK_SIZE, dummy_drop).is_none());
    }

    #[test]
    fn test_marked_block_sweep_reuses_slot() {
        let block = MarkedBlock::new(0, 64);
        let (ptr1, _) = block.allocate(48, dummy_drop).unwrap();
        let (ptr2, _) = block.allocate(48, dummy_drop).unwrap();

        unsafe {
            (*(ptr1 as *const GcHeader)).set_mark(MarkColor::Black);
            (*(ptr2 as *const GcHeader)).set_mark(MarkColor::White);
        }

        let (reclaimed, freed) = block.sweep();
        assert_eq!(reclaimed, 48);
        assert_eq!(freed, 1);
        assert_eq!(block.live_count(), 1);

        let (ptr3, _) = block.allocate(48, dummy_drop).unwrap();
        assert_eq!(ptr3, ptr2);
    }

    #[test]
    fn test_directory_cell_ids_resolve() {
        let table = BlockTable::new();
        let dir = BlockDirectory::new(BLOCK_SIZE);
        let (p1, id1) = dir.allocate(&table, BLOCK_SIZE, dummy_drop);
        let (p2, id2) = dir.allocate(&table, BLOCK_SIZE, dummy_drop);
        assert_ne!(id1, id2);
        assert_eq!(dir.block_count(), 2);
        assert_eq!(table.header_for_cell_id(id1) as usize, p1 as usize);
        assert_eq!(table.header_for_cell_id(id2) as usize, p2 as usize);
    }

    #[test]
    fn test_directory_releases_excess_empty_blocks() {
        let table = BlockTable::new();
        let dir = BlockDirectory::new(BLOCK_SIZE);
        for _ in 0..5 {
            let (ptr, _) = dir.allocate(&table, BLOCK_SIZE, dummy_drop);
            unsafe { (*(ptr as *const GcHeader)).set_mark(MarkColor::White) };
        }
        assert_eq!(table.block_count(), 5);
        let (_, freed) = dir.sweep(&table);
        assert_eq!(freed, 5);
        assert_eq!(dir.block_count(), 2);
        assert_eq!(table.block_count(), 2);
        // Released ids are recycled
        let id = table.reserve();
        assert!((1..=5).contains(&id));
    }
}
