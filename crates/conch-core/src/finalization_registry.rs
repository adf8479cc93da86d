//! `FinalizationRegistry` objects
//!
//! Each registration is a cell holding the held value strongly and the
//! target and unregister token weakly. The target is watched by a heap
//! finalizer whose token names the cell. When the collector reports the
//! target dead, the cell is marked as pending and one cleanup job is queued
//! for the registry; the job calls the cleanup callback once per pending
//! cell, each call in its own sandbox. Nothing here runs during a
//! collection pause.
//!
//! ```text
//! Registered --unregister--> Dead
//!     |
//!   target collected
//!     v
//! Pending --cleanup job / cleanupSome--> Dead
//!     |
//!   unregister
//!     v
//!   Dead
//! ```
//!
//! Dead slots are reused by later registrations and compacted away once
//! they outnumber half of the list.

use conch_gc::{FinalizerId, FiredFinalizer, GcHeader, HeapKind, LinkId, heap};
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::context::Context;
use crate::encoded_value::EncodedValue;
use crate::error::{VmError, VmResult};
use crate::job::{Job, SandBox, SandBoxResult};
use crate::object::{ObjectData, ObjectRef};
use crate::value::Value;
use crate::weak_ref::can_be_held_weakly;

struct RegistryCell {
    /// Weak link to the target, cleared when it dies
    target: LinkId,
    /// Held value passed to the cleanup callback
    held: EncodedValue,
    /// Weak link to the unregister token
    unregister_token: Option<LinkId>,
    finalizer: FinalizerId,
    token: u64,
    /// The target died and the callback has not run yet
    pending: bool,
}

/// State of a FinalizationRegistry object
pub struct RegistryData {
    cleanup: Value,
    cells: Vec<Option<RegistryCell>>,
    /// Finalizer token to slot index
    index: FxHashMap<u64, usize>,
    dead_count: usize,
    next_token: u64,
    /// Tokens of pending cells, in firing order
    pending: Vec<u64>,
    cleanup_scheduled: bool,
}

impl RegistryData {
    fn new(cleanup: Value) -> Self {
        Self {
            cleanup,
            cells: Vec::new(),
            index: FxHashMap::default(),
            dead_count: 0,
            next_token: 1,
            pending: Vec::new(),
            cleanup_scheduled: false,
        }
    }

    /// Registrations that are neither unregistered nor cleaned up
    pub fn live_cell_count(&self) -> usize {
        self.cells.len() - self.dead_count
    }

    /// Length of the slot list, dead slots included
    pub fn slot_count(&self) -> usize {
        self.cells.len()
    }

    /// Registrations whose target died and await their callback
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn trace(&self, tracer: &mut dyn FnMut(*const GcHeader)) {
        if let Some(header) = self.cleanup.as_header() {
            tracer(header);
        }
        for cell in self.cells.iter().flatten() {
            if let Some(header) = conch_gc::TraceSlot::traced_pointer(&cell.held) {
                tracer(header);
            }
        }
    }

    fn insert(&mut self, cell: RegistryCell) {
        let token = cell.token;
        let slot = if self.dead_count > 0
            && let Some(free) = self.cells.iter().position(Option::is_none)
        {
            self.dead_count -= 1;
            self.cells[free] = Some(cell);
            free
        } else {
            self.cells.push(Some(cell));
            self.cells.len() - 1
        };
        self.index.insert(token, slot);
    }

    /// Mark the slot dead and release its heap registrations.
    fn kill(&mut self, slot: usize) -> Option<RegistryCell> {
        let cell = self.cells.get_mut(slot)?.take()?;
        self.index.remove(&cell.token);
        heap().unregister_disappearing_link(cell.target);
        if let Some(link) = cell.unregister_token {
            heap().unregister_disappearing_link(link);
        }
        // A fired finalizer's id is already free and may name a newer entry
        if !cell.pending {
            heap().unregister_finalizer(cell.finalizer);
        }
        self.dead_count += 1;
        Some(cell)
    }

    fn compact_if_sparse(&mut self) {
        if self.dead_count <= self.cells.len() / 2 + 1 {
            return;
        }
        debug!(
            target: "conch::core",
            slots = self.cells.len(),
            dead = self.dead_count,
            "compacting finalization registry"
        );
        self.cells.retain(Option::is_some);
        self.dead_count = 0;
        self.index = self
            .cells
            .iter()
            .enumerate()
            .filter_map(|(slot, cell)| cell.as_ref().map(|cell| (cell.token, slot)))
            .collect();
    }

    /// Take the held values of every pending cell, killing the cells.
    fn take_pending(&mut self) -> Vec<Value> {
        let tokens = std::mem::take(&mut self.pending);
        let mut held = Vec::with_capacity(tokens.len());
        for token in tokens {
            let Some(&slot) = self.index.get(&token) else { continue };
            if let Some(cell) = self.kill(slot) {
                held.push(cell.held.to_value());
            }
        }
        self.compact_if_sparse();
        held
    }
}

fn with_registry<R>(registry: ObjectRef, f: impl FnOnce(&mut RegistryData) -> R) -> Option<R> {
    match &mut registry.borrow_mut().data {
        ObjectData::FinalizationRegistry(data) => Some(f(data)),
        _ => None,
    }
}

fn require_registry(ctx: &mut Context, registry: ObjectRef, method: &str) -> VmResult<()> {
    if registry.is_finalization_registry() {
        Ok(())
    } else {
        Err(ctx.throw_type_error(format!("FinalizationRegistry.prototype.{method} called on incompatible receiver")))
    }
}

/// `new FinalizationRegistry(cleanup)`
pub(crate) fn create(ctx: &mut Context, cleanup: Value) -> VmResult<ObjectRef> {
    if !cleanup.is_callable() {
        return Err(ctx.throw_type_error("FinalizationRegistry: cleanup must be callable"));
    }
    let prototype = ctx.intrinsics().finalization_registry_prototype;
    Ok(ctx.new_object(
        Some(prototype),
        ObjectData::FinalizationRegistry(RegistryData::new(cleanup)),
    ))
}

/// `FinalizationRegistry.prototype.register`
pub fn register(
    ctx: &mut Context,
    registry: ObjectRef,
    target: Value,
    held: Value,
    unregister_token: Value,
) -> VmResult<()> {
    require_registry(ctx, registry, "register")?;
    let Some(target_header) = target.as_header().filter(|_| can_be_held_weakly(target)) else {
        return Err(ctx.throw_type_error("FinalizationRegistry.prototype.register: invalid target"));
    };
    if target.same_value(&held) {
        return Err(ctx.throw_type_error(
            "FinalizationRegistry.prototype.register: target and holdings must not be same",
        ));
    }
    let token_header = if unregister_token.is_undefined() {
        None
    } else if can_be_held_weakly(unregister_token) {
        unregister_token.as_header()
    } else {
        return Err(ctx.throw_type_error(
            "FinalizationRegistry.prototype.register: invalid unregister token",
        ));
    };

    let owner = registry.header_ptr();
    with_registry(registry, |data| {
        let token = data.next_token;
        data.next_token += 1;
        let cell = RegistryCell {
            target: heap().register_disappearing_link(owner, target_header),
            held: EncodedValue::new(held),
            unregister_token: token_header.map(|header| heap().register_disappearing_link(owner, header)),
            finalizer: heap().register_finalizer(target_header, owner, token),
            token,
            pending: false,
        };
        data.insert(cell);
    })
    .ok_or_else(|| VmError::internal("registry data vanished during register"))
}

/// `FinalizationRegistry.prototype.unregister`: remove every cell
/// registered with `unregister_token`. Returns whether any was removed.
pub fn unregister(ctx: &mut Context, registry: ObjectRef, unregister_token: Value) -> VmResult<bool> {
    require_registry(ctx, registry, "unregister")?;
    let Some(token_header) = unregister_token
        .as_header()
        .filter(|_| can_be_held_weakly(unregister_token))
    else {
        return Err(ctx.throw_type_error(
            "FinalizationRegistry.prototype.unregister: invalid unregister token",
        ));
    };
    let removed = with_registry(registry, |data| {
        let matching: Vec<usize> = data
            .cells
            .iter()
            .enumerate()
            .filter_map(|(slot, cell)| {
                let link = cell.as_ref()?.unregister_token?;
                (heap().link_target(link) == Some(token_header)).then_some(slot)
            })
            .collect();
        for &slot in &matching {
            data.kill(slot);
        }
        data.compact_if_sparse();
        !matching.is_empty()
    });
    Ok(removed.unwrap_or(false))
}

/// `FinalizationRegistry.prototype.cleanupSome`: run the callbacks of every
/// pending cell now, with `callback` in place of the registry's cleanup
/// function when given. Errors propagate.
pub fn cleanup_some(ctx: &mut Context, registry: ObjectRef, callback: Option<Value>) -> VmResult<()> {
    require_registry(ctx, registry, "cleanupSome")?;
    if let Some(callback) = callback
        && !callback.is_callable()
    {
        return Err(ctx.throw_type_error("FinalizationRegistry.prototype.cleanupSome: callback must be callable"));
    }
    let Some((cleanup, held)) = with_registry(registry, |data| (data.cleanup, data.take_pending())) else {
        return Ok(());
    };
    let callback = callback.unwrap_or(cleanup);
    let _rooted: Vec<_> = held.iter().map(|value| ctx.root(*value)).collect();
    for value in held {
        ctx.call(callback, Value::undefined(), &[value])?;
    }
    Ok(())
}

/// Route a fired heap finalizer to its registry and schedule cleanup.
pub(crate) fn dispatch_fired(ctx: &mut Context, fired: FiredFinalizer) {
    // SAFETY: fired owners are kept alive until taken from the heap
    if unsafe { (*fired.owner).kind() } != HeapKind::FinalizationRegistryObject {
        return;
    }
    // SAFETY: the kind check above guarantees an object cell
    let registry = unsafe { ObjectRef::from_header(fired.owner) };
    let schedule = with_registry(registry, |data| {
        let Some(&slot) = data.index.get(&fired.token) else {
            return false;
        };
        let Some(cell) = data.cells[slot].as_mut() else {
            return false;
        };
        if cell.pending {
            return false;
        }
        cell.pending = true;
        data.pending.push(fired.token);
        !std::mem::replace(&mut data.cleanup_scheduled, true)
    });
    debug!(target: "conch::core", token = fired.token, "finalizer fired");
    if schedule == Some(true) {
        ctx.enqueue_job(Job::FinalizationCleanup { registry });
    }
}

/// Body of a queued cleanup job: call the cleanup function once per pending
/// cell. A throwing callback is logged and does not stop the others.
pub(crate) fn run_cleanup_job(ctx: &mut Context, registry: ObjectRef) -> VmResult<Value> {
    let Some((cleanup, held)) = with_registry(registry, |data| {
        data.cleanup_scheduled = false;
        (data.cleanup, data.take_pending())
    }) else {
        return Ok(Value::undefined());
    };
    let _rooted: Vec<_> = held.iter().map(|value| ctx.root(*value)).collect();
    for value in held {
        if let SandBoxResult::Error(error) = SandBox::run(ctx, |ctx| ctx.call(cleanup, Value::undefined(), &[value])) {
            warn!(target: "conch::core", %error, "finalization cleanup callback failed");
        }
    }
    Ok(Value::undefined())
}

/// Registry state, for inspection
pub fn registry_stats(registry: ObjectRef) -> Option<(usize, usize, usize)> {
    match &registry.borrow().data {
        ObjectData::FinalizationRegistry(data) => {
            Some((data.live_cell_count(), data.slot_count(), data.pending_count()))
        }
        _ => None,
    }
}
