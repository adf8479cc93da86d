//! `WeakRef` objects
//!
//! A WeakRef holds its target through a disappearing link owned by the
//! WeakRef cell; the collector clears the link when the target dies and
//! frees it when the WeakRef itself dies.

use conch_gc::{LinkId, heap};

use crate::context::Context;
use crate::error::VmResult;
use crate::object::{ObjectData, ObjectRef};
use crate::value::Value;

/// State of a WeakRef object
#[derive(Debug)]
pub struct WeakRefData {
    link: Option<LinkId>,
}

/// CanBeHeldWeakly: objects and symbols
pub fn can_be_held_weakly(value: Value) -> bool {
    value.is_object() || value.is_symbol()
}

/// `new WeakRef(target)`
pub(crate) fn create(ctx: &mut Context, target: Value) -> VmResult<ObjectRef> {
    let Some(target_header) = target.as_header().filter(|_| can_be_held_weakly(target)) else {
        return Err(ctx.throw_type_error("WeakRef: invalid target"));
    };
    let prototype = ctx.intrinsics().weak_ref_prototype;
    let weak_ref = ctx.new_object(Some(prototype), ObjectData::WeakRef(WeakRefData { link: None }));
    let link = heap().register_disappearing_link(weak_ref.header_ptr(), target_header);
    if let ObjectData::WeakRef(data) = &mut weak_ref.borrow_mut().data {
        data.link = Some(link);
    }
    ctx.add_to_kept_objects(target);
    Ok(weak_ref)
}

/// The target, or `None` once collected. Does not keep the target alive.
pub fn target(weak_ref: ObjectRef) -> Option<Value> {
    let link = match &weak_ref.borrow().data {
        ObjectData::WeakRef(data) => data.link?,
        _ => return None,
    };
    // SAFETY: a set link only ever points at a live cell
    heap().link_target(link).map(|header| unsafe { Value::from_header(header) })
}

/// `WeakRef.prototype.deref`: the target, kept alive until the next job
/// queue drain.
pub fn deref(ctx: &mut Context, weak_ref: ObjectRef) -> Option<Value> {
    let value = target(weak_ref)?;
    ctx.add_to_kept_objects(value);
    Some(value)
}
