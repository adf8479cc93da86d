//! Finalizer registrations with deferred firing.
//!
//! An entry ties a weak `target` to an `owner` cell and an opaque `token`
//! chosen by the owner. When weak processing finds the target unmarked while
//! the owner is marked, the entry is removed and a [`FiredFinalizer`] is
//! queued. Nothing runs during the pause: the embedder drains the queue at a
//! safe point with [`FinalizerTable::take_fired`]. Entries whose owner died
//! are dropped without firing.

use std::cell::RefCell;

use crate::object::{GcHeader, MarkColor, flags};

/// Handle to a registered finalizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FinalizerId(u32);

impl FinalizerId {
    /// Raw slot index.
    pub fn index(self) -> u32 {
        self.0
    }
}

struct FinalizerEntry {
    /// Weak pointer to the watched cell (NOT traced)
    target: *const GcHeader,
    /// Cell that receives the notification
    owner: *const GcHeader,
    /// Owner-defined payload
    token: u64,
}

/// A finalizer whose target died, waiting to be dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FiredFinalizer {
    /// Owner cell; kept alive by the heap until the queue is drained
    pub owner: *const GcHeader,
    /// Token given at registration
    pub token: u64,
}

/// Outcome of one weak-processing pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FinalizerSweep {
    /// Entries moved to the fired queue
    pub fired: usize,
    /// Entries dropped because their owner died
    pub dropped: usize,
}

/// Slot table of finalizer registrations plus the fired queue.
pub struct FinalizerTable {
    entries: RefCell<Vec<Option<FinalizerEntry>>>,
    free: RefCell<Vec<u32>>,
    fired: RefCell<Vec<FiredFinalizer>>,
}

impl FinalizerTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            entries: RefCell::new(Vec::new()),
            free: RefCell::new(Vec::new()),
            fired: RefCell::new(Vec::new()),
        }
    }

    /// Register a finalizer for `target` on behalf of `owner`.
    pub fn register(&self, target: *const GcHeader, owner: *const GcHeader, token: u64) -> FinalizerId {
        // SAFETY: caller passes live headers
        unsafe { (*target).set_flag(flags::HAS_FINALIZER) };
        let entry = FinalizerEntry { target, owner, token };
        if let Some(index) = self.free.borrow_mut().pop() {
            self.entries.borrow_mut()[index as usize] = Some(entry);
            return FinalizerId(index);
        }
        let mut entries = self.entries.borrow_mut();
        entries.push(Some(entry));
        FinalizerId(entries.len() as u32 - 1)
    }

    /// Remove a registration. Returns whether it was still pending.
    pub fn unregister(&self, id: FinalizerId) -> bool {
        let mut entries = self.entries.borrow_mut();
        match entries.get_mut(id.0 as usize) {
            Some(slot) if slot.is_some() => {
                *slot = None;
                self.free.borrow_mut().push(id.0);
                true
            }
            _ => false,
        }
    }

    /// Number of registrations not yet fired.
    pub fn len(&self) -> usize {
        self.entries.borrow().iter().filter(|e| e.is_some()).count()
    }

    /// Whether no registration is pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Owners of fired but undrained finalizers; treated as roots.
    pub fn fired_owners(&self) -> Vec<*const GcHeader> {
        self.fired.borrow().iter().map(|f| f.owner).collect()
    }

    /// Whether fired finalizers are waiting to be drained.
    pub fn has_fired(&self) -> bool {
        !self.fired.borrow().is_empty()
    }

    /// Drain the fired queue.
    pub fn take_fired(&self) -> Vec<FiredFinalizer> {
        std::mem::take(&mut *self.fired.borrow_mut())
    }

    /// Fire entries with dead targets and drop entries with dead owners.
    ///
    /// # Safety
    /// Must run after marking and before sweeping, while every registered
    /// owner and target is still a valid header.
    pub unsafe fn process(&self) -> FinalizerSweep {
        let mut result = FinalizerSweep::default();
        let mut entries = self.entries.borrow_mut();
        let mut free = self.free.borrow_mut();
        let mut fired = self.fired.borrow_mut();

        for (index, slot) in entries.iter_mut().enumerate() {
            let Some(entry) = slot.as_ref() else { continue };
            // SAFETY: caller guarantees headers are valid during weak processing
            let owner_dead = unsafe { (*entry.owner).mark() } == MarkColor::White;
            let target_dead = unsafe { (*entry.target).mark() } == MarkColor::White;

            if owner_dead {
                result.dropped += 1;
            } else if target_dead {
                fired.push(FiredFinalizer {
                    owner: entry.owner,
                    token: entry.token,
                });
                result.fired += 1;
            } else {
                continue;
            }
            *slot = None;
            free.push(index as u32);
        }

        result
    }
}

impl Default for FinalizerTable {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FinalizerTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FinalizerTable")
            .field("entries", &self.len())
            .field("fired", &self.fired.borrow().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::HeapKind;

    #[test]
    fn test_fires_once_for_dead_target() {
        let owner = GcHeader::new(HeapKind::FinalizationRegistryObject, 0);
        let target = GcHeader::new(HeapKind::Object, 1);
        owner.set_mark(MarkColor::Black);

        let table = FinalizerTable::new();
        table.register(&target, &owner, 42);
        assert!(target.has_flag(flags::HAS_FINALIZER));

        let sweep = unsafe { table.process() };
        assert_eq!(sweep, FinalizerSweep { fired: 1, dropped: 0 });
        assert_eq!(table.fired_owners(), vec![&owner as *const GcHeader]);

        // A second pass finds nothing left to fire
        let sweep = unsafe { table.process() };
        assert_eq!(sweep.fired, 0);

        let fired = table.take_fired();
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].token, 42);
        assert!(!table.has_fired());
    }

    #[test]
    fn test_dead_owner_drops_entry() {
        let owner = GcHeader::new(HeapKind::FinalizationRegistryObject, 0);
        let target = GcHeader::new(HeapKind::Object, 1);

        let table = FinalizerTable::new();
        table.register(&target, &owner, 7);
        let sweep = unsafe { table.process() };
        assert_eq!(sweep, FinalizerSweep { fired: 0, dropped: 1 });
        assert!(table.take_fired().is_empty());
        assert!(table.is_empty());
    }

    #[test]
    fn test_unregister_prevents_firing() {
        let owner = GcHeader::new(HeapKind::FinalizationRegistryObject, 0);
        let target = GcHeader::new(HeapKind::Object, 1);
        owner.set_mark(MarkColor::Black);

        let table = FinalizerTable::new();
        let id = table.register(&target, &owner, 1);
        assert!(table.unregister(id));
        assert!(!table.unregister(id));
        let sweep = unsafe { table.process() };
        assert_eq!(sweep.fired, 0);
    }
}
