//! Disappearing links: collector-managed weak pointers.
//!
//! A link records a weak `target` on behalf of an `owner` cell. The target is
//! NOT traced. After marking, the heap nulls every link whose target is
//! unmarked and frees every link whose owner is unmarked, so a live owner
//! never observes a dangling target.

use std::cell::RefCell;

use crate::object::{GcHeader, MarkColor};

/// Handle to a registered disappearing link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkId(u32);

impl LinkId {
    /// Raw slot index.
    pub fn index(self) -> u32 {
        self.0
    }
}

struct LinkEntry {
    /// Cell that holds the link; the link dies with it
    owner: *const GcHeader,
    /// Weak pointer to the target's GcHeader (NOT traced)
    target: *const GcHeader,
}

/// Outcome of one weak-processing pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LinkSweep {
    /// Links whose target died and were nulled
    pub cleared: usize,
    /// Links freed because their owner died
    pub released: usize,
}

/// Slot table of disappearing links.
pub struct DisappearingLinks {
    entries: RefCell<Vec<Option<LinkEntry>>>,
    free: RefCell<Vec<u32>>,
}

impl DisappearingLinks {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            entries: RefCell::new(Vec::new()),
            free: RefCell::new(Vec::new()),
        }
    }

    /// Register a link from `owner` to `target`.
    pub fn register(&self, owner: *const GcHeader, target: *const GcHeader) -> LinkId {
        let entry = LinkEntry { owner, target };
        if let Some(index) = self.free.borrow_mut().pop() {
            self.entries.borrow_mut()[index as usize] = Some(entry);
            return LinkId(index);
        }
        let mut entries = self.entries.borrow_mut();
        entries.push(Some(entry));
        LinkId(entries.len() as u32 - 1)
    }

    /// Remove a link. Unknown or already removed ids are ignored.
    pub fn unregister(&self, id: LinkId) {
        let mut entries = self.entries.borrow_mut();
        if let Some(slot) = entries.get_mut(id.0 as usize)
            && slot.take().is_some()
        {
            self.free.borrow_mut().push(id.0);
        }
    }

    /// Current target of a link, or `None` once it disappeared.
    pub fn target(&self, id: LinkId) -> Option<*const GcHeader> {
        self.entries
            .borrow()
            .get(id.0 as usize)
            .and_then(|slot| slot.as_ref())
            .map(|entry| entry.target)
            .filter(|target| !target.is_null())
    }

    /// Number of registered links.
    pub fn len(&self) -> usize {
        self.entries.borrow().iter().filter(|e| e.is_some()).count()
    }

    /// Whether no link is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Null dead targets and free links of dead owners.
    ///
    /// # Safety
    /// Must run after marking and before sweeping, while every registered
    /// owner and target is still a valid header.
    pub unsafe fn process(&self) -> LinkSweep {
        let mut result = LinkSweep::default();
        let mut entries = self.entries.borrow_mut();
        let mut free = self.free.borrow_mut();

        for (index, slot) in entries.iter_mut().enumerate() {
            let Some(entry) = slot else { continue };
            // SAFETY: caller guarantees owners are valid during weak processing
            if unsafe { (*entry.owner).mark() } == MarkColor::White {
                *slot = None;
                free.push(index as u32);
                result.released += 1;
                continue;
            }
            if !entry.target.is_null() && unsafe { (*entry.target).mark() } == MarkColor::White {
                entry.target = std::ptr::null();
                result.cleared += 1;
            }
        }

        result
    }
}

impl Default for DisappearingLinks {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DisappearingLinks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisappearingLinks")
            .field("links", &self.len())
            .finish()
    }
}
