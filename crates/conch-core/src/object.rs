//! JavaScript objects and the ordinary internal methods
//!
//! An object is a GC cell holding an [`ObjectCell`] around [`ObjectInner`]:
//! a shared [`ObjectStructure`] naming the properties, a GC vector of
//! [`EncodedValue`] slots holding their values, the prototype link and the
//! class-specific [`ObjectData`].
//!
//! Methods never hold a borrow of an object across a call that may run
//! script (getters, setters, coercion hooks), since script may touch the
//! same object.

use std::rc::Rc;

use conch_gc::{GcHeader, GcPtr, GcVector, HeapKind, PercentWithGap, ValueVectorAllocator, heap};
use rustc_hash::FxHashSet;

use crate::array::ArrayData;
use crate::context::Context;
use crate::encoded_value::EncodedValue;
use crate::error::VmResult;
use crate::finalization_registry::RegistryData;
use crate::function::NativeFunction;
use crate::object_cell::{ObjectCell, ObjectCellRef, ObjectCellRefMut};
use crate::property_descriptor::{
    AccessorPair, NativeAccessorData, PropertyAttributes, PropertyDescriptor, StructurePropertyDescriptor,
};
use crate::property_name::PropertyName;
use crate::string::JsString;
use crate::structure::ObjectStructure;
use crate::value::Value;
use crate::weak_ref::WeakRefData;

/// Class-specific object state
pub enum ObjectData {
    /// Plain object
    Ordinary,
    /// Error instance
    Error,
    /// Array exotic object
    Array(ArrayData),
    /// Callable object backed by a Rust closure
    Function(NativeFunction),
    /// Boolean, Number, String or Symbol wrapper
    PrimitiveWrapper(Value),
    /// `WeakRef` instance
    WeakRef(WeakRefData),
    /// `FinalizationRegistry` instance
    FinalizationRegistry(RegistryData),
}

impl ObjectData {
    /// Heap kind for objects carrying this data
    pub fn heap_kind(&self) -> HeapKind {
        match self {
            ObjectData::Array(_) => HeapKind::ArrayObject,
            ObjectData::Function(_) => HeapKind::FunctionObject,
            ObjectData::WeakRef(_) => HeapKind::WeakRefObject,
            ObjectData::FinalizationRegistry(_) => HeapKind::FinalizationRegistryObject,
            _ => HeapKind::Object,
        }
    }

    fn trace(&self, tracer: &mut dyn FnMut(*const GcHeader)) {
        match self {
            ObjectData::Array(array) => array.trace(tracer),
            ObjectData::PrimitiveWrapper(value) => {
                if let Some(header) = value.as_header() {
                    tracer(header);
                }
            }
            ObjectData::FinalizationRegistry(registry) => registry.trace(tracer),
            // The target of a WeakRef is held through a disappearing link
            ObjectData::WeakRef(_) => {}
            ObjectData::Ordinary | ObjectData::Error | ObjectData::Function(_) => {}
        }
    }
}

/// Native descriptor of a String wrapper's `length`
pub static STRING_LENGTH: NativeAccessorData = NativeAccessorData {
    name: "length",
    attributes: PropertyAttributes::frozen(),
    getter: string_length_getter,
    setter: None,
};

fn string_length_getter(object: ObjectRef) -> Value {
    let length = object.wrapped_string().map_or(0, |s| s.len());
    Value::number(f64::from(length))
}

/// Property value slots: most objects stay small, so growth is capped at a
/// few slots past what is needed
pub(crate) type PropertyValues = GcVector<EncodedValue, ValueVectorAllocator, PercentWithGap<50, 8>>;

/// Mutable state of an object
pub struct ObjectInner {
    pub(crate) structure: Rc<ObjectStructure>,
    pub(crate) values: PropertyValues,
    pub(crate) prototype: Option<ObjectRef>,
    pub(crate) extensible: bool,
    pub(crate) is_prototype: bool,
    pub(crate) data: ObjectData,
}

impl ObjectInner {
    /// Class-specific data
    pub fn data(&self) -> &ObjectData {
        &self.data
    }

    /// Array state, if this is an array
    pub fn as_array(&self) -> Option<&ArrayData> {
        match &self.data {
            ObjectData::Array(array) => Some(array),
            _ => None,
        }
    }

    pub(crate) fn as_array_mut(&mut self) -> Option<&mut ArrayData> {
        match &mut self.data {
            ObjectData::Array(array) => Some(array),
            _ => None,
        }
    }

    /// Append a property whose name is known to be absent and atomic.
    pub(crate) fn push_property(&mut self, name: PropertyName, descriptor: StructurePropertyDescriptor, slot: EncodedValue) {
        ObjectStructure::add_property(&mut self.structure, name, descriptor);
        self.values.push(slot);
    }
}

/// A heap object cell
pub struct JsObject {
    inner: ObjectCell<ObjectInner>,
}

/// Mark procedure shared by every object kind.
///
/// # Safety
/// `payload` must be the payload of a live object cell.
pub(crate) unsafe fn trace_object(payload: *const u8, tracer: &mut dyn FnMut(*const GcHeader)) {
    // SAFETY: caller guarantees the payload type
    let object = unsafe { &*(payload as *const JsObject) };
    // SAFETY: marking never overlaps a mutator borrow
    let inner = unsafe { object.inner.peek() };
    inner.structure.trace(tracer);
    if let Some(buffer) = inner.values.buffer_header() {
        tracer(buffer);
    }
    if let Some(prototype) = inner.prototype {
        tracer(prototype.header_ptr());
    }
    inner.data.trace(tracer);
}

/// Handle to a heap object
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct ObjectRef(GcPtr<JsObject>);

impl ObjectRef {
    /// Allocate an object. The caller records `prototype` as a prototype
    /// object through the context.
    pub(crate) fn alloc(structure: Rc<ObjectStructure>, prototype: Option<ObjectRef>, data: ObjectData) -> ObjectRef {
        let kind = data.heap_kind();
        let inner = ObjectInner {
            structure,
            values: GcVector::new(),
            prototype,
            extensible: true,
            is_prototype: false,
            data,
        };
        ObjectRef(heap().alloc(
            kind,
            JsObject {
                inner: ObjectCell::new(inner),
            },
        ))
    }

    /// Create an ordinary object
    pub fn new_ordinary(ctx: &mut Context, prototype: Option<ObjectRef>) -> ObjectRef {
        ctx.new_object(prototype, ObjectData::Ordinary)
    }

    /// Wrap an object header.
    ///
    /// # Safety
    /// `header` must be a live cell of an object kind.
    #[inline]
    pub unsafe fn from_header(header: *const GcHeader) -> Self {
        // SAFETY: caller guarantees an object cell
        ObjectRef(unsafe { GcPtr::from_header(header) })
    }

    /// Cell header
    #[inline]
    pub fn header_ptr(&self) -> *const GcHeader {
        self.0.as_header_ptr()
    }

    /// Heap kind of the cell
    #[inline]
    pub fn kind(&self) -> HeapKind {
        self.0.kind()
    }

    /// Borrow the object state
    #[inline]
    pub fn borrow(&self) -> ObjectCellRef<'_, ObjectInner> {
        self.0.inner.borrow()
    }

    #[inline]
    pub(crate) fn borrow_mut(&self) -> ObjectCellRefMut<'_, ObjectInner> {
        self.0.inner.borrow_mut()
    }

    /// Whether this object has a `[[Call]]` method
    pub fn is_callable(&self) -> bool {
        self.kind() == HeapKind::FunctionObject
    }

    /// Whether this is an array exotic object
    pub fn is_array(&self) -> bool {
        self.kind() == HeapKind::ArrayObject
    }

    /// Whether this is a `WeakRef` instance
    pub fn is_weak_ref(&self) -> bool {
        self.kind() == HeapKind::WeakRefObject
    }

    /// Whether this is a `FinalizationRegistry` instance
    pub fn is_finalization_registry(&self) -> bool {
        self.kind() == HeapKind::FinalizationRegistryObject
    }

    /// Whether this object is some other object's prototype
    pub fn is_prototype_object(&self) -> bool {
        self.borrow().is_prototype
    }

    /// Whether this is an array holding its elements in fast mode
    pub fn is_fast_mode_array(&self) -> bool {
        self.borrow().as_array().is_some_and(ArrayData::is_fast_mode)
    }

    /// The object's structure
    pub fn structure(&self) -> Rc<ObjectStructure> {
        Rc::clone(&self.borrow().structure)
    }

    /// The wrapped primitive of a wrapper object
    pub fn primitive_value(&self) -> Option<Value> {
        match self.borrow().data {
            ObjectData::PrimitiveWrapper(value) => Some(value),
            _ => None,
        }
    }

    /// Whether this is an Error instance
    pub fn is_error(&self) -> bool {
        matches!(self.borrow().data, ObjectData::Error)
    }

    fn wrapped_string(&self) -> Option<GcPtr<JsString>> {
        self.primitive_value().and_then(|v| v.as_string())
    }

    // ---------------------------------------------------------------
    // [[GetPrototypeOf]] / [[SetPrototypeOf]] / extensibility
    // ---------------------------------------------------------------

    /// `[[GetPrototypeOf]]`
    pub fn get_prototype_of(&self) -> Option<ObjectRef> {
        self.borrow().prototype
    }

    /// `[[SetPrototypeOf]]`; returns `false` for non-extensible objects and
    /// prototype cycles.
    pub fn set_prototype_of(&self, ctx: &mut Context, prototype: Option<ObjectRef>) -> bool {
        let (current, extensible) = {
            let inner = self.borrow();
            (inner.prototype, inner.extensible)
        };
        if current == prototype {
            return true;
        }
        if !extensible {
            return false;
        }
        let mut cursor = prototype;
        while let Some(p) = cursor {
            if p == *self {
                return false;
            }
            cursor = p.get_prototype_of();
        }
        self.borrow_mut().prototype = prototype;
        if let Some(prototype) = prototype {
            ctx.mark_as_prototype(prototype);
        }
        true
    }

    /// `[[IsExtensible]]`
    pub fn is_extensible(&self) -> bool {
        self.borrow().extensible
    }

    /// `[[PreventExtensions]]`. Fast-mode arrays move to general mode first,
    /// because their holes are not ordinary absent properties.
    pub fn prevent_extensions(&self) -> bool {
        crate::array::convert_into_non_fast_mode(*self, "preventExtensions");
        self.borrow_mut().extensible = false;
        true
    }

    // ---------------------------------------------------------------
    // [[GetOwnProperty]]
    // ---------------------------------------------------------------

    /// `[[GetOwnProperty]]`
    pub fn get_own_property(&self, name: &PropertyName) -> Option<PropertyDescriptor> {
        if let PropertyName::Index(index) = *name {
            match self.exotic_own_index(index) {
                ExoticIndex::Found(desc) => return Some(desc),
                ExoticIndex::Absent => return None,
                ExoticIndex::Ordinary => {}
            }
        }
        self.ordinary_get_own_property(name)
    }

    fn exotic_own_index(&self, index: u32) -> ExoticIndex {
        {
            let inner = self.borrow();
            if let Some(array) = inner.as_array()
                && array.is_fast_mode()
            {
                return match array.fast_get(index) {
                    Some(value) => ExoticIndex::Found(PropertyDescriptor::data_default(value)),
                    None => ExoticIndex::Absent,
                };
            }
        }
        if let Some(string) = self.wrapped_string()
            && let Some(unit) = string.code_unit_string(index)
        {
            let value = Value::string(JsString::new_gc(&unit));
            return ExoticIndex::Found(PropertyDescriptor::data(
                value,
                PropertyAttributes {
                    writable: false,
                    enumerable: true,
                    configurable: false,
                },
            ));
        }
        ExoticIndex::Ordinary
    }

    /// OrdinaryGetOwnProperty over the structure
    pub(crate) fn ordinary_get_own_property(&self, name: &PropertyName) -> Option<PropertyDescriptor> {
        let (descriptor, slot) = {
            let inner = self.borrow();
            let index = inner.structure.find_property(name)?;
            (inner.structure.item(index).descriptor, inner.values.get(index)?)
        };
        Some(self.describe_slot(descriptor, slot))
    }

    fn describe_slot(&self, descriptor: StructurePropertyDescriptor, slot: EncodedValue) -> PropertyDescriptor {
        if let Some(native) = descriptor.native_data() {
            return PropertyDescriptor::data((native.getter)(*self), native.attributes);
        }
        if descriptor.is_accessor() {
            let pair = slot.as_accessor_pair();
            return PropertyDescriptor::accessor(
                pair.and_then(|p| p.getter()),
                pair.and_then(|p| p.setter()),
                descriptor.is_enumerable(),
                descriptor.is_configurable(),
            );
        }
        PropertyDescriptor::data(slot.to_value(), descriptor.attributes())
    }

    /// Whether an own property exists
    pub fn has_own_property(&self, name: &PropertyName) -> bool {
        self.get_own_property(name).is_some()
    }

    // ---------------------------------------------------------------
    // [[DefineOwnProperty]]
    // ---------------------------------------------------------------

    /// `[[DefineOwnProperty]]`; returns `Ok(false)` when the definition is
    /// rejected.
    pub fn define_own_property(
        &self,
        ctx: &mut Context,
        name: &PropertyName,
        desc: PropertyDescriptor,
    ) -> VmResult<bool> {
        if self.is_array() {
            return crate::array::define_own_property(ctx, *self, name, desc);
        }
        if let PropertyName::Index(index) = *name
            && let ExoticIndex::Found(current) = self.exotic_own_index(index)
        {
            // String indices are read-only and non-configurable
            return Ok(is_compatible_descriptor(false, &desc, Some(&current)));
        }
        self.ordinary_define_own_property(ctx, name, desc)
    }

    /// DefinePropertyOrThrow
    pub fn define_property_or_throw(
        &self,
        ctx: &mut Context,
        name: &PropertyName,
        desc: PropertyDescriptor,
    ) -> VmResult<()> {
        if self.define_own_property(ctx, name, desc)? {
            Ok(())
        } else {
            Err(ctx.throw_type_error(format!("Cannot redefine property: {}", name.describe())))
        }
    }

    /// CreateDataProperty
    pub fn create_data_property(&self, ctx: &mut Context, name: &PropertyName, value: Value) -> VmResult<bool> {
        self.define_own_property(ctx, name, PropertyDescriptor::data_default(value))
    }

    /// CreateDataPropertyOrThrow
    pub fn create_data_property_or_throw(&self, ctx: &mut Context, name: &PropertyName, value: Value) -> VmResult<()> {
        if self.create_data_property(ctx, name, value)? {
            Ok(())
        } else {
            Err(ctx.throw_type_error(format!("Cannot define property {}", name.describe())))
        }
    }

    /// OrdinaryDefineOwnProperty (ValidateAndApplyPropertyDescriptor over
    /// the structure)
    pub(crate) fn ordinary_define_own_property(
        &self,
        ctx: &mut Context,
        name: &PropertyName,
        desc: PropertyDescriptor,
    ) -> VmResult<bool> {
        let name = ctx.canonical_name(*name);
        let found = {
            let inner = self.borrow();
            inner.structure.find_property(&name).map(|index| {
                let descriptor = inner.structure.item(index).descriptor;
                (index, descriptor, inner.values.get(index).unwrap_or(EncodedValue::EMPTY))
            })
        };

        let Some((index, packed, slot)) = found else {
            if !self.is_extensible() {
                return Ok(false);
            }
            let (descriptor, slot) = new_slot(&desc);
            let (added_index, is_prototype) = {
                let mut inner = self.borrow_mut();
                inner.push_property(name, descriptor, slot);
                (name.as_index().is_some(), inner.is_prototype)
            };
            if added_index && is_prototype {
                ctx.note_prototype_index_property();
            }
            return Ok(true);
        };

        let current = self.describe_slot(packed, slot);
        if !is_compatible_descriptor(false, &desc, Some(&current)) {
            return Ok(false);
        }
        let merged = merge_descriptor(&current, &desc);

        if let Some(native) = packed.native_data() {
            let attributes_unchanged = !merged.is_accessor_descriptor()
                && merged.writable == Some(native.attributes.writable)
                && merged.enumerable == Some(native.attributes.enumerable)
                && merged.configurable == Some(native.attributes.configurable);
            if attributes_unchanged {
                let Some(value) = desc.value else { return Ok(true) };
                if current.value.is_some_and(|v| v.same_value(&value)) {
                    return Ok(true);
                }
                return match native.setter {
                    Some(setter) => setter(ctx, *self, value),
                    None => Ok(false),
                };
            }
        }

        let (descriptor, new_slot) = new_slot(&merged);
        let mut inner = self.borrow_mut();
        ObjectStructure::replace_descriptor(&mut inner.structure, index, descriptor);
        if descriptor.is_accessor() {
            inner.values.set(index, new_slot);
        } else {
            let value = merged.value.unwrap_or_default();
            inner.values.update(index, |slot| {
                if slot.as_accessor_pair().is_some() {
                    *slot = EncodedValue::EMPTY;
                }
                slot.assign(value);
            });
        }
        Ok(true)
    }

    // ---------------------------------------------------------------
    // [[HasProperty]] / [[Get]] / [[Set]] / [[Delete]]
    // ---------------------------------------------------------------

    /// `[[HasProperty]]`
    pub fn has_property(&self, name: &PropertyName) -> bool {
        let mut current = Some(*self);
        while let Some(object) = current {
            if object.has_own_property(name) {
                return true;
            }
            current = object.get_prototype_of();
        }
        false
    }

    /// `[[Get]]`
    pub fn get(&self, ctx: &mut Context, name: &PropertyName, receiver: Value) -> VmResult<Value> {
        let mut current = *self;
        loop {
            if let Some(desc) = current.get_own_property(name) {
                if let Some(value) = desc.value {
                    return Ok(value);
                }
                return match desc.get {
                    Some(getter) if !getter.is_undefined() => ctx.call(getter, receiver, &[]),
                    _ => Ok(Value::undefined()),
                };
            }
            match current.get_prototype_of() {
                Some(prototype) => current = prototype,
                None => return Ok(Value::undefined()),
            }
        }
    }

    /// `[[Get]]` with this object as receiver
    pub fn get_property(&self, ctx: &mut Context, name: &PropertyName) -> VmResult<Value> {
        self.get(ctx, name, Value::object(*self))
    }

    /// `[[Get]]` of a string-named property
    pub fn get_str(&self, ctx: &mut Context, name: &str) -> VmResult<Value> {
        let key = ctx.name(name);
        self.get(ctx, &key, Value::object(*self))
    }

    /// `[[Set]]` of a string-named property; throws when rejected
    pub fn set_str(&self, ctx: &mut Context, name: &str, value: Value) -> VmResult<()> {
        let key = ctx.name(name);
        self.set_property(ctx, &key, value)
    }

    /// `[[Set]]` (OrdinarySet)
    pub fn set(&self, ctx: &mut Context, name: &PropertyName, value: Value, receiver: Value) -> VmResult<bool> {
        let mut current = *self;
        let own = loop {
            if let Some(desc) = current.get_own_property(name) {
                break desc;
            }
            match current.get_prototype_of() {
                Some(prototype) => current = prototype,
                None => break PropertyDescriptor::data_default(Value::undefined()),
            }
        };

        if own.is_accessor_descriptor() {
            return match own.set {
                Some(setter) if !setter.is_undefined() => {
                    ctx.call(setter, receiver, &[value])?;
                    Ok(true)
                }
                _ => Ok(false),
            };
        }
        if own.writable == Some(false) {
            return Ok(false);
        }
        let Some(receiver) = receiver.as_object() else {
            return Ok(false);
        };
        match receiver.get_own_property(name) {
            Some(existing) => {
                if existing.is_accessor_descriptor() || existing.writable == Some(false) {
                    return Ok(false);
                }
                receiver.define_own_property(ctx, name, PropertyDescriptor::default().with_value(value))
            }
            None => receiver.create_data_property(ctx, name, value),
        }
    }

    /// `[[Set]]` with this object as receiver; throws when rejected
    pub fn set_property(&self, ctx: &mut Context, name: &PropertyName, value: Value) -> VmResult<()> {
        if self.set(ctx, name, value, Value::object(*self))? {
            Ok(())
        } else {
            Err(ctx.throw_type_error(format!(
                "Cannot assign to read only property '{}' of object",
                name.describe()
            )))
        }
    }

    /// `[[Delete]]`
    pub fn delete_own_property(&self, name: &PropertyName) -> bool {
        if let PropertyName::Index(index) = *name {
            if let Some(deleted) = crate::array::delete_fast(*self, index) {
                return deleted;
            }
            if let Some(string) = self.wrapped_string()
                && index < string.len()
            {
                return false;
            }
        }
        self.ordinary_delete(name)
    }

    /// DeletePropertyOrThrow
    pub fn delete_property_or_throw(&self, ctx: &mut Context, name: &PropertyName) -> VmResult<()> {
        if self.delete_own_property(name) {
            Ok(())
        } else {
            Err(ctx.throw_type_error(format!("Cannot delete property '{}'", name.describe())))
        }
    }

    pub(crate) fn ordinary_delete(&self, name: &PropertyName) -> bool {
        let mut inner = self.borrow_mut();
        let Some(index) = inner.structure.find_property(name) else {
            return true;
        };
        if !inner.structure.item(index).descriptor.is_configurable() {
            return false;
        }
        ObjectStructure::remove_property(&mut inner.structure, index);
        inner.values.remove(index);
        true
    }

    // ---------------------------------------------------------------
    // Key enumeration
    // ---------------------------------------------------------------

    /// `[[OwnPropertyKeys]]`: integer indices ascending, then strings, then
    /// symbols, each in creation order.
    pub fn own_property_keys(&self) -> Vec<PropertyName> {
        let mut indices = crate::array::fast_indices(*self).unwrap_or_default();
        if let Some(string) = self.wrapped_string() {
            indices.extend(0..string.len());
        }

        let inner = self.borrow();
        let items = inner.structure.items();
        let mut keys = Vec::with_capacity(indices.len() + items.len());
        let mut structure_indices: Vec<u32> = items.iter().filter_map(|item| item.name.as_index()).collect();
        if !structure_indices.is_empty() {
            indices.append(&mut structure_indices);
            indices.sort_unstable();
        }
        keys.extend(indices.into_iter().map(PropertyName::Index));
        keys.extend(
            items
                .iter()
                .map(|item| item.name)
                .filter(|name| name.as_index().is_none() && !name.is_symbol()),
        );
        keys.extend(items.iter().map(|item| item.name).filter(PropertyName::is_symbol));
        keys
    }

    /// Enumerable string keys along the prototype chain, in `for-in` order,
    /// skipping shadowed names.
    pub fn enumerate(&self) -> Vec<PropertyName> {
        let mut seen = FxHashSet::default();
        let mut result = Vec::new();
        let mut current = Some(*self);
        while let Some(object) = current {
            for key in object.own_property_keys() {
                if key.is_symbol() || !seen.insert(key) {
                    continue;
                }
                if object
                    .get_own_property(&key)
                    .is_some_and(|desc| desc.enumerable == Some(true))
                {
                    result.push(key);
                }
            }
            current = object.get_prototype_of();
        }
        result
    }

    // ---------------------------------------------------------------
    // Indexed fast paths
    // ---------------------------------------------------------------

    /// Get with a value key, reading fast-mode elements directly.
    pub fn get_indexed_property(&self, ctx: &mut Context, key: Value) -> VmResult<Value> {
        if let Some(index) = fast_index_key(key) {
            let fast = self.borrow().as_array().and_then(|array| array.fast_get(index));
            if let Some(value) = fast {
                return Ok(value);
            }
        }
        let name = ctx.to_property_key(key)?;
        self.get(ctx, &name, Value::object(*self))
    }

    /// Set with a value key, writing present fast-mode elements directly.
    pub fn set_indexed_property(&self, ctx: &mut Context, key: Value, value: Value) -> VmResult<bool> {
        if let Some(index) = fast_index_key(key)
            && crate::array::fast_set_existing(*self, index, value)
        {
            return Ok(true);
        }
        let name = ctx.to_property_key(key)?;
        self.set(ctx, &name, value, Value::object(*self))
    }

    /// HasProperty with a value key
    pub fn has_indexed_property(&self, ctx: &mut Context, key: Value) -> VmResult<bool> {
        if let Some(index) = fast_index_key(key) {
            let fast = self.borrow().as_array().and_then(|array| array.fast_get(index));
            if fast.is_some() {
                return Ok(true);
            }
        }
        let name = ctx.to_property_key(key)?;
        Ok(self.has_property(&name))
    }

    /// Identity comparison
    #[inline]
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        a == b
    }
}

impl std::fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ObjectRef({} @ {:#x})", self.kind(), self.0.addr())
    }
}

enum ExoticIndex {
    Found(PropertyDescriptor),
    Absent,
    Ordinary,
}

/// Array index carried directly by a number key
fn fast_index_key(key: Value) -> Option<u32> {
    key.as_int32().and_then(|i| u32::try_from(i).ok())
}

/// Packed descriptor and slot for a freshly applied descriptor record;
/// absent attributes default to `false`.
fn new_slot(desc: &PropertyDescriptor) -> (StructurePropertyDescriptor, EncodedValue) {
    let descriptor = desc.to_structure_descriptor();
    if descriptor.is_accessor() {
        let callable = |f: Option<Value>| f.and_then(|v| v.as_object());
        let pair = AccessorPair::new_gc(callable(desc.get), callable(desc.set));
        return (descriptor, EncodedValue::from_accessor_pair(pair));
    }
    (descriptor, EncodedValue::new(desc.value.unwrap_or_default()))
}

/// Complete descriptor after applying `desc` to `current`.
pub(crate) fn merge_descriptor(current: &PropertyDescriptor, desc: &PropertyDescriptor) -> PropertyDescriptor {
    let enumerable = desc.enumerable.or(current.enumerable);
    let configurable = desc.configurable.or(current.configurable);
    if current.is_data_descriptor() && desc.is_accessor_descriptor() {
        return PropertyDescriptor {
            get: Some(desc.get.unwrap_or_default()),
            set: Some(desc.set.unwrap_or_default()),
            enumerable,
            configurable,
            ..PropertyDescriptor::default()
        };
    }
    if current.is_accessor_descriptor() && desc.is_data_descriptor() {
        return PropertyDescriptor {
            value: Some(desc.value.unwrap_or_default()),
            writable: Some(desc.writable.unwrap_or(false)),
            enumerable,
            configurable,
            ..PropertyDescriptor::default()
        };
    }
    if current.is_accessor_descriptor() {
        return PropertyDescriptor {
            get: desc.get.or(current.get),
            set: desc.set.or(current.set),
            enumerable,
            configurable,
            ..PropertyDescriptor::default()
        };
    }
    PropertyDescriptor {
        value: desc.value.or(current.value),
        writable: desc.writable.or(current.writable),
        enumerable,
        configurable,
        ..PropertyDescriptor::default()
    }
}

/// Validation half of ValidateAndApplyPropertyDescriptor.
///
/// `current` is a complete descriptor or `None` when the property is absent.
pub(crate) fn is_compatible_descriptor(
    extensible: bool,
    desc: &PropertyDescriptor,
    current: Option<&PropertyDescriptor>,
) -> bool {
    let Some(current) = current else {
        return extensible;
    };
    if current.configurable == Some(false) {
        if desc.configurable == Some(true) {
            return false;
        }
        if desc.enumerable.is_some() && desc.enumerable != current.enumerable {
            return false;
        }
        if !desc.is_generic_descriptor() && desc.is_accessor_descriptor() != current.is_accessor_descriptor() {
            return false;
        }
        if current.is_accessor_descriptor() {
            let same = |a: Option<Value>, b: Option<Value>| match (a, b) {
                (Some(a), Some(b)) => a.same_value(&b),
                (None, _) => true,
                (Some(_), None) => false,
            };
            if !same(desc.get, current.get) || !same(desc.set, current.set) {
                return false;
            }
        } else if current.writable == Some(false) {
            if desc.writable == Some(true) {
                return false;
            }
            if let (Some(value), Some(existing)) = (desc.value, current.value)
                && !value.same_value(&existing)
            {
                return false;
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(value: i32, writable: bool, configurable: bool) -> PropertyDescriptor {
        PropertyDescriptor::data(
            Value::int32(value),
            PropertyAttributes {
                writable,
                enumerable: true,
                configurable,
            },
        )
    }

    #[test]
    fn test_compatible_with_absent_property() {
        let desc = data(1, true, true);
        assert!(is_compatible_descriptor(true, &desc, None));
        assert!(!is_compatible_descriptor(false, &desc, None));
    }

    #[test]
    fn test_non_configurable_rejects_changes() {
        let current = data(1, false, false);
        assert!(is_compatible_descriptor(true, &PropertyDescriptor::default(), Some(&current)));
        assert!(is_compatible_descriptor(
            true,
            &PropertyDescriptor::default().with_value(Value::int32(1)),
            Some(&current)
        ));
        assert!(!is_compatible_descriptor(
            true,
            &PropertyDescriptor::default().with_value(Value::int32(2)),
            Some(&current)
        ));
        assert!(!is_compatible_descriptor(
            true,
            &PropertyDescriptor::default().with_configurable(true),
            Some(&current)
        ));
        assert!(!is_compatible_descriptor(
            true,
            &PropertyDescriptor::default().with_get(Value::undefined()),
            Some(&current)
        ));
    }

    #[test]
    fn test_non_configurable_writable_allows_value_change() {
        let current = data(1, true, false);
        let desc = PropertyDescriptor::default().with_value(Value::int32(5)).with_writable(false);
        assert!(is_compatible_descriptor(true, &desc, Some(&current)));
        let merged = merge_descriptor(&current, &desc);
        assert_eq!(merged.value.and_then(|v| v.as_int32()), Some(5));
        assert_eq!(merged.writable, Some(false));
        assert_eq!(merged.configurable, Some(false));
    }

    #[test]
    fn test_merge_data_to_accessor() {
        let current = data(1, true, true);
        let desc = PropertyDescriptor::default().with_set(Value::undefined());
        let merged = merge_descriptor(&current, &desc);
        assert!(merged.is_accessor_descriptor());
        assert!(merged.get.is_some_and(|g| g.is_undefined()));
        assert_eq!(merged.enumerable, Some(true));
        assert!(merged.value.is_none());
    }
}
