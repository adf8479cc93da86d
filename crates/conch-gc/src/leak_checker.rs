//! Debug-only tracking of cells that are expected to die.
//!
//! Code that drops its last reference to a cell registers it here with a
//! description. Every collection forgets entries whose cell was swept; what
//! remains after a full collection is a leak, reported together with the
//! backtrace captured at registration.

use std::backtrace::Backtrace;
use std::cell::RefCell;

use rustc_hash::FxHashMap;

use crate::object::{GcHeader, MarkColor, flags};

/// A registered cell that has not been collected yet.
#[derive(Debug)]
pub struct LeakEntry {
    /// Compressed id of the cell
    pub cell_id: u32,
    /// Caller-supplied description
    pub description: String,
    /// Where the cell was registered
    pub backtrace: Backtrace,
}

/// Registry of cells expected to be collected.
#[derive(Debug, Default)]
pub struct LeakChecker {
    /// Keyed by header address
    entries: RefCell<FxHashMap<usize, LeakEntry>>,
}

impl LeakChecker {
    /// Create an empty checker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `header`, expecting it to be collected eventually.
    pub fn register(&self, header: *const GcHeader, description: impl Into<String>) {
        // SAFETY: caller passes a live header
        let header_ref = unsafe { &*header };
        header_ref.set_flag(flags::LEAK_TRACKED);
        self.entries.borrow_mut().insert(
            header as usize,
            LeakEntry {
                cell_id: header_ref.cell_id(),
                description: description.into(),
                backtrace: Backtrace::capture(),
            },
        );
    }

    /// Forget tracked cells that are about to be swept.
    ///
    /// # Safety
    /// Must run after marking and before sweeping.
    pub unsafe fn process(&self) {
        self.entries.borrow_mut().retain(|&addr, _| {
            // SAFETY: tracked cells are valid until the sweep that frees them
            unsafe { (*(addr as *const GcHeader)).mark() } != MarkColor::White
        });
    }

    /// Number of tracked cells still alive.
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Whether every tracked cell was collected.
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    /// Descriptions of the cells still alive, sorted.
    pub fn report(&self) -> Vec<String> {
        let mut leaks: Vec<String> = self
            .entries
            .borrow()
            .values()
            .map(|entry| format!("cell {:#x}: {}", entry.cell_id, entry.description))
            .collect();
        leaks.sort();
        leaks
    }

    /// Log every surviving entry with its registration backtrace.
    pub fn dump_leaks(&self) {
        for entry in self.entries.borrow().values() {
            tracing::warn!(
                target: "conch::gc",
                cell_id = entry.cell_id,
                description = %entry.description,
                backtrace = %entry.backtrace,
                "tracked cell survived collection"
            );
        }
    }
}
