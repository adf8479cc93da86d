//! Array exotic objects
//!
//! An array keeps its elements in one of two modes:
//!
//! - **Fast mode**: a flat buffer of [`EncodedSmallValue`] exactly `length`
//!   long, holes marked with the empty sentinel. Every present element is an
//!   implicit `{writable, enumerable, configurable}` data property.
//! - **General mode**: elements are ordinary index properties in the
//!   object's structure.
//!
//! Leaving fast mode is irreversible. It happens when an element gets a
//! non-default descriptor, when the length grows sparsely past the
//! configured thresholds, on `preventExtensions`, when `length` becomes
//! read-only, and when some prototype object gains an index property.
//!
//! `length` is structure slot 0, a natively backed data property; its value
//! is tracked in [`ArrayData`].

use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;

use conch_gc::{
    ArrayStorageAllocator, FitExact, GcHeader, GcVector, GrowthPolicy, Log2, PointerFreeAllocator, TightVector,
    percent_capacity,
};

use crate::config::ArrayModeConfig;
use crate::context::{Context, StaticStrings};
use crate::encoded_value::{EncodedSmallValue, EncodedValue};
use crate::error::VmResult;
use crate::object::{ObjectData, ObjectRef};
use crate::property_descriptor::{
    NativeAccessorData, PropertyAttributes, PropertyDescriptor, StructurePropertyDescriptor,
};
use crate::property_name::PropertyName;
use crate::structure::ObjectStructure;
use crate::value::Value;

type FastBuffer = GcVector<EncodedSmallValue, ArrayStorageAllocator, FitExact>;

/// Cached present indices of a fast buffer; never scanned
type IndexCache = TightVector<u32, PointerFreeAllocator>;

/// Structure slot of `length`
pub(crate) const LENGTH_SLOT: usize = 0;

/// Native descriptor of a writable `length`
pub static ARRAY_LENGTH: NativeAccessorData = NativeAccessorData {
    name: "length",
    attributes: PropertyAttributes {
        writable: true,
        enumerable: false,
        configurable: false,
    },
    getter: length_getter,
    setter: Some(length_setter),
};

/// Native descriptor of a read-only `length`
pub static ARRAY_LENGTH_READONLY: NativeAccessorData = NativeAccessorData {
    name: "length",
    attributes: PropertyAttributes::frozen(),
    getter: length_getter,
    setter: None,
};

fn length_getter(object: ObjectRef) -> Value {
    let length = object.borrow().as_array().map_or(0, ArrayData::length);
    Value::number(f64::from(length))
}

fn length_setter(ctx: &mut Context, object: ObjectRef, value: Value) -> VmResult<bool> {
    define_length(ctx, object, PropertyDescriptor::default().with_value(value))
}

// ============================================================================
// Array state
// ============================================================================

/// Element storage and length of an array
pub struct ArrayData {
    /// Fast-mode buffer; `None` once in general mode
    fast: Option<FastBuffer>,
    length: u32,
    length_writable: bool,
    /// Buffer reallocations caused by growth
    growth_count: u32,
    /// Present fast-mode indices; `None` when stale
    index_cache: RefCell<Option<IndexCache>>,
    spread: bool,
}

impl ArrayData {
    fn new(fast: bool, spread: bool) -> Self {
        Self {
            fast: fast.then(FastBuffer::new),
            length: 0,
            length_writable: true,
            growth_count: 0,
            index_cache: RefCell::new(None),
            spread,
        }
    }

    /// Whether elements live in the flat buffer
    #[inline]
    pub fn is_fast_mode(&self) -> bool {
        self.fast.is_some()
    }

    /// Current `length`
    #[inline]
    pub fn length(&self) -> u32 {
        self.length
    }

    /// Whether `length` is writable
    #[inline]
    pub fn is_length_writable(&self) -> bool {
        self.length_writable
    }

    /// Whether this is a spread array (null prototype, never converted by
    /// prototype changes elsewhere)
    #[inline]
    pub fn is_spread(&self) -> bool {
        self.spread
    }

    /// Reallocations of the fast buffer so far
    pub fn reallocation_count(&self) -> usize {
        self.fast.as_ref().map_or(0, FastBuffer::reallocation_count)
    }

    /// Capacity of the fast buffer
    pub fn fast_capacity(&self) -> usize {
        self.fast.as_ref().map_or(0, FastBuffer::capacity)
    }

    /// Present element at `index` in fast mode
    pub fn fast_get(&self, index: u32) -> Option<Value> {
        let slot = self.fast.as_ref()?.get(index as usize)?;
        (!slot.is_empty()).then(|| slot.to_value())
    }

    fn invalidate_index_cache(&self) {
        self.index_cache.borrow_mut().take();
    }

    /// Resize the fast buffer to `new_length`, holes filling any growth.
    fn resize_fast(&mut self, config: &ArrayModeConfig, new_length: u32) {
        let Some(fast) = self.fast.as_mut() else { return };
        let required = new_length as usize;
        if required == 0 {
            fast.clear();
        } else if required > fast.capacity() {
            let capacity = reserved_capacity(config, self.growth_count, fast.capacity(), required);
            self.growth_count += 1;
            fast.resize_with_capacity(required, capacity, EncodedSmallValue::EMPTY);
        } else {
            fast.resize_with_capacity(required, required, EncodedSmallValue::EMPTY);
        }
        self.length = new_length;
        self.invalidate_index_cache();
    }

    pub(crate) fn trace(&self, tracer: &mut dyn FnMut(*const GcHeader)) {
        if let Some(buffer) = self.fast.as_ref().and_then(FastBuffer::buffer_header) {
            tracer(buffer);
        }
        if let Some(buffer) = self.index_cache.borrow().as_ref().and_then(IndexCache::buffer_header) {
            tracer(buffer);
        }
    }
}

/// Capacity to reserve when the fast buffer must hold `required` elements.
///
/// Small buffers and the first few growths fit exactly; after that growth
/// is geometric so repeated pushes stay amortized O(1).
pub fn reserved_capacity(config: &ArrayModeConfig, growth_count: u32, current: usize, required: usize) -> usize {
    if required <= config.fit_exact_limit || growth_count < config.fit_exact_growths {
        FitExact::reserved_capacity(current, required)
    } else if required <= config.log2_growth_limit {
        Log2::reserved_capacity(current, required)
    } else {
        percent_capacity(required, config.percent_growth.saturating_sub(100))
    }
}

/// Whether growing the length from `old` to `new` abandons fast mode
fn is_sparse_growth(config: &ArrayModeConfig, old: u32, new: u32) -> bool {
    new > config.max_fast_mode_length
        || (new > config.non_fast_mode_min_size && new > old && new - old > config.non_fast_mode_start_min_gap)
}

// ============================================================================
// Creation
// ============================================================================

/// Allocate an array of `length` holes.
pub(crate) fn alloc_array(ctx: &mut Context, length: u32, spread: bool) -> ObjectRef {
    let fast = spread || !ctx.some_prototype_has_index_property();
    let prototype = if spread { None } else { Some(ctx.intrinsics().array_prototype) };
    let structure = ctx.array_structure();
    let object = ctx.new_object_with_structure(structure, prototype, ObjectData::Array(ArrayData::new(fast, spread)));
    object.borrow_mut().values.push(EncodedValue::EMPTY);
    if length > 0 {
        set_array_length(ctx, object, length);
    }
    object
}

/// Allocate `Array.prototype` while the context is being built.
pub(crate) fn alloc_prototype_array(structure: Rc<ObjectStructure>, prototype: ObjectRef) -> ObjectRef {
    let object = ObjectRef::alloc(structure, Some(prototype), ObjectData::Array(ArrayData::new(true, false)));
    object.borrow_mut().values.push(EncodedValue::EMPTY);
    object
}

/// Structure every array starts with: just `length`
pub(crate) fn initial_structure(root: &Rc<ObjectStructure>, names: &StaticStrings) -> Rc<ObjectStructure> {
    let mut structure = Rc::clone(root);
    ObjectStructure::add_property(
        &mut structure,
        PropertyName::Atomic(names.length),
        StructurePropertyDescriptor::native(&ARRAY_LENGTH),
    );
    structure
}

// ============================================================================
// Mode changes
// ============================================================================

/// Move the elements of a fast-mode array into its structure. No-op for
/// general-mode arrays and non-arrays.
pub fn convert_into_non_fast_mode(object: ObjectRef, reason: &'static str) {
    let mut inner = object.borrow_mut();
    let Some(fast) = inner.as_array_mut().and_then(|array| array.fast.take()) else {
        return;
    };
    tracing::debug!(
        target: "conch::core",
        length = fast.len(),
        reason,
        "array left fast mode"
    );
    if fast.iter().any(|slot| !slot.is_empty()) {
        ObjectStructure::convert_to_dictionary(&mut inner.structure);
    }
    for (index, slot) in fast.iter().enumerate() {
        if slot.is_empty() {
            continue;
        }
        inner.push_property(
            PropertyName::Index(index as u32),
            StructurePropertyDescriptor::default_data(),
            EncodedValue::new(slot.to_value()),
        );
    }
}

fn mark_length_read_only(object: ObjectRef) {
    convert_into_non_fast_mode(object, "length made read-only");
    let mut inner = object.borrow_mut();
    if let Some(array) = inner.as_array_mut() {
        array.length_writable = false;
    }
    ObjectStructure::replace_descriptor(
        &mut inner.structure,
        LENGTH_SLOT,
        StructurePropertyDescriptor::native(&ARRAY_LENGTH_READONLY),
    );
}

// ============================================================================
// Length
// ============================================================================

/// Set `length` to `new_length`, deleting elements at or past it.
///
/// In general mode deletion runs from the highest index down; on the first
/// non-configurable element the length stops one past it and `false` is
/// returned.
pub fn set_array_length(ctx: &mut Context, object: ObjectRef, new_length: u32) -> bool {
    let (fast, old_length) = {
        let inner = object.borrow();
        match inner.as_array() {
            Some(array) => (array.is_fast_mode(), array.length),
            None => return false,
        }
    };

    if fast {
        if new_length > old_length && is_sparse_growth(&ctx.config().array, old_length, new_length) {
            convert_into_non_fast_mode(object, "sparse length growth");
        } else {
            if let Some(array) = object.borrow_mut().as_array_mut() {
                array.resize_fast(&ctx.config().array, new_length);
            }
            return true;
        }
    }

    if new_length < old_length {
        let mut doomed: Vec<u32> = object
            .borrow()
            .structure
            .items()
            .iter()
            .filter_map(|item| item.name.as_index())
            .filter(|&index| index >= new_length)
            .collect();
        doomed.sort_unstable_by(|a, b| b.cmp(a));
        for index in doomed {
            if !object.ordinary_delete(&PropertyName::Index(index)) {
                set_tracked_length(object, index + 1);
                return false;
            }
        }
    }
    set_tracked_length(object, new_length);
    true
}

fn set_tracked_length(object: ObjectRef, length: u32) {
    if let Some(array) = object.borrow_mut().as_array_mut() {
        array.length = length;
        array.invalidate_index_cache();
    }
}

/// ArraySetLength: `[[DefineOwnProperty]]` of `length`
fn define_length(ctx: &mut Context, object: ObjectRef, desc: PropertyDescriptor) -> VmResult<bool> {
    if desc.configurable == Some(true) || desc.enumerable == Some(true) || desc.is_accessor_descriptor() {
        return Ok(false);
    }

    let Some(value) = desc.value else {
        let writable = object.borrow().as_array().is_some_and(ArrayData::is_length_writable);
        if desc.writable == Some(true) && !writable {
            return Ok(false);
        }
        if desc.writable == Some(false) && writable {
            mark_length_read_only(object);
        }
        return Ok(true);
    };

    let new_length = ctx.to_uint32(value)?;
    let number = ctx.to_number(value)?;
    if f64::from(new_length) != number {
        return Err(ctx.throw_range_error("Invalid array length"));
    }

    // Coercion may have run script, so read the state afterwards
    let (old_length, writable) = {
        let inner = object.borrow();
        let array = inner.as_array();
        (array.map_or(0, ArrayData::length), array.is_some_and(ArrayData::is_length_writable))
    };
    if !writable {
        return Ok(desc.writable != Some(true) && new_length == old_length);
    }

    let keep_writable = desc.writable != Some(false);
    let succeeded = new_length == old_length || set_array_length(ctx, object, new_length);
    if !keep_writable {
        mark_length_read_only(object);
    }
    Ok(succeeded)
}

// ============================================================================
// Internal methods
// ============================================================================

/// Array `[[DefineOwnProperty]]`
pub(crate) fn define_own_property(
    ctx: &mut Context,
    object: ObjectRef,
    name: &PropertyName,
    desc: PropertyDescriptor,
) -> VmResult<bool> {
    let index = match name {
        PropertyName::Index(index) => *index,
        _ if name.matches_str("length") => return define_length(ctx, object, desc),
        _ => return object.ordinary_define_own_property(ctx, name, desc),
    };

    if object.is_fast_mode_array() {
        if object.is_prototype_object() {
            convert_into_non_fast_mode(object, "index defined on a prototype");
            ctx.note_prototype_index_property();
        } else {
            if let Some(defined) = fast_define(&ctx.config().array, object, index, &desc) {
                return Ok(defined);
            }
            convert_into_non_fast_mode(object, "non-default element descriptor");
        }
    }

    let (length, length_writable) = {
        let inner = object.borrow();
        let array = inner.as_array();
        (array.map_or(0, ArrayData::length), array.is_some_and(ArrayData::is_length_writable))
    };
    if index >= length && !length_writable {
        return Ok(false);
    }
    if !object.ordinary_define_own_property(ctx, name, desc)? {
        return Ok(false);
    }
    if index >= length {
        set_tracked_length(object, index + 1);
    }
    Ok(true)
}

/// Define an element in fast mode. `None` means the descriptor cannot be
/// represented and the array must leave fast mode.
fn fast_define(config: &ArrayModeConfig, object: ObjectRef, index: u32, desc: &PropertyDescriptor) -> Option<bool> {
    let mut inner = object.borrow_mut();
    let array = inner.as_array_mut()?;
    let present = array.fast_get(index).is_some();

    if present {
        if desc.is_accessor_descriptor() || !desc.present_attributes_all_true() {
            return None;
        }
        if let Some(value) = desc.value {
            array.fast.as_ref()?.update(index as usize, |slot| slot.assign(value));
        }
        return Some(true);
    }

    if !desc.is_default_data() {
        return None;
    }
    if index >= array.length {
        let new_length = index + 1;
        if is_sparse_growth(config, array.length, new_length) {
            return None;
        }
        array.resize_fast(config, new_length);
    }
    let value = desc.value.unwrap_or_default();
    array.fast.as_ref()?.set(index as usize, EncodedSmallValue::new(value));
    array.invalidate_index_cache();
    Some(true)
}

/// Delete an element in fast mode. `None` when not a fast-mode array.
pub(crate) fn delete_fast(object: ObjectRef, index: u32) -> Option<bool> {
    let inner = object.borrow();
    let array = inner.as_array()?;
    let fast = array.fast.as_ref()?;
    if index < array.length {
        fast.set(index as usize, EncodedSmallValue::EMPTY);
        array.invalidate_index_cache();
    }
    Some(true)
}

/// Overwrite a present fast-mode element. Returns `false` when the fast
/// path does not apply.
pub(crate) fn fast_set_existing(object: ObjectRef, index: u32, value: Value) -> bool {
    let inner = object.borrow();
    let Some(array) = inner.as_array() else { return false };
    let Some(fast) = array.fast.as_ref() else { return false };
    if array.fast_get(index).is_none() {
        return false;
    }
    fast.update(index as usize, |slot| slot.assign(value));
    true
}

/// Present element indices of a fast-mode array, ascending
pub(crate) fn fast_indices(object: ObjectRef) -> Option<Vec<u32>> {
    let inner = object.borrow();
    let array = inner.as_array()?;
    let fast = array.fast.as_ref()?;
    let mut cache = array.index_cache.borrow_mut();
    let indices = cache.get_or_insert_with(|| {
        let mut indices = IndexCache::new();
        for (index, slot) in fast.iter().enumerate() {
            if !slot.is_empty() {
                indices.push(index as u32);
            }
        }
        indices
    });
    Some(indices.iter().collect())
}

// ============================================================================
// Element operations
// ============================================================================

/// Append `value` as if by `array.push(value)`.
pub fn push(ctx: &mut Context, object: ObjectRef, value: Value) -> VmResult<()> {
    let length = object.borrow().as_array().map_or(0, ArrayData::length);
    if length == u32::MAX {
        return Err(ctx.throw_type_error("Pushing past the maximum array length"));
    }
    object.create_data_property_or_throw(ctx, &PropertyName::Index(length), value)
}

/// Sort the elements in place, as `Array.prototype.sort`.
///
/// The sort is stable. `undefined` values sort after every other value and
/// holes after those. Without a comparator elements compare by their string
/// form in UTF-16 code unit order. Errors thrown by the comparator or by
/// coercion propagate, leaving the array partially updated.
pub fn sort(ctx: &mut Context, object: ObjectRef, comparator: Option<Value>) -> VmResult<()> {
    if let Some(f) = comparator
        && !f.is_undefined()
        && !f.is_callable()
    {
        return Err(ctx.throw_type_error("The comparison function must be either a function or undefined"));
    }
    let comparator = comparator.filter(|f| !f.is_undefined());

    let length = u32::try_from(ctx.length_of_array_like(object)?)
        .map_err(|_| ctx.throw_range_error("Invalid array length"))?;
    let mut items = Vec::new();
    let mut undefined_count = 0u32;
    for index in 0..length {
        let name = PropertyName::Index(index);
        if !object.has_property(&name) {
            continue;
        }
        let value = object.get_property(ctx, &name)?;
        if value.is_undefined() {
            undefined_count += 1;
        } else {
            items.push(value);
        }
    }

    let _rooted: Vec<_> = items.iter().map(|value| ctx.root(*value)).collect();
    let mut compare = |ctx: &mut Context, x: Value, y: Value| -> VmResult<Ordering> {
        match comparator {
            Some(f) => {
                let result = ctx.call(f, Value::undefined(), &[x, y])?;
                let n = ctx.to_number(result)?;
                Ok(n.partial_cmp(&0.0).unwrap_or(Ordering::Equal))
            }
            None => {
                let x = ctx.to_js_string(x)?;
                let y = ctx.to_js_string(y)?;
                Ok(x.as_str().encode_utf16().cmp(y.as_str().encode_utf16()))
            }
        }
    };
    merge_sort(ctx, &mut items, &mut compare)?;

    let present = items.len() as u32;
    for (index, value) in items.into_iter().enumerate() {
        object.set_property(ctx, &PropertyName::Index(index as u32), value)?;
    }
    for index in present..present + undefined_count {
        object.set_property(ctx, &PropertyName::Index(index), Value::undefined())?;
    }
    for index in present + undefined_count..length {
        object.delete_property_or_throw(ctx, &PropertyName::Index(index))?;
    }
    Ok(())
}

type Comparator<'a> = dyn FnMut(&mut Context, Value, Value) -> VmResult<Ordering> + 'a;

/// Bottom-up stable merge sort with a fallible comparator
fn merge_sort(ctx: &mut Context, items: &mut Vec<Value>, compare: &mut Comparator<'_>) -> VmResult<()> {
    let len = items.len();
    let mut scratch = items.clone();
    let mut width = 1;
    while width < len {
        let mut start = 0;
        while start < len {
            let mid = (start + width).min(len);
            let end = (start + 2 * width).min(len);
            merge(ctx, &items[start..mid], &items[mid..end], &mut scratch[start..end], compare)?;
            start = end;
        }
        std::mem::swap(items, &mut scratch);
        width *= 2;
    }
    Ok(())
}

fn merge(
    ctx: &mut Context,
    left: &[Value],
    right: &[Value],
    out: &mut [Value],
    compare: &mut Comparator<'_>,
) -> VmResult<()> {
    let (mut i, mut j) = (0, 0);
    for slot in out.iter_mut() {
        let take_right = if i == left.len() {
            true
        } else if j == right.len() {
            false
        } else {
            compare(ctx, right[j], left[i])? == Ordering::Less
        };
        if take_right {
            *slot = right[j];
            j += 1;
        } else {
            *slot = left[i];
            i += 1;
        }
    }
    Ok(())
}
