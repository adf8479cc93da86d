//! Property descriptors
//!
//! Two forms exist. [`StructurePropertyDescriptor`] is the packed, word-sized
//! form stored in structures next to each property name. [`PropertyDescriptor`]
//! is the record passed to and returned from the object internal methods,
//! with every field optional the way `[[DefineOwnProperty]]` needs it.

use std::fmt;

use conch_gc::{GcPtr, HeapKind, MarkDescriptor, heap, mark_descriptor};

use crate::context::Context;
use crate::error::VmResult;
use crate::object::ObjectRef;
use crate::value::Value;

/// Property attributes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PropertyAttributes {
    /// Property is writable
    pub writable: bool,
    /// Property is enumerable
    pub enumerable: bool,
    /// Property is configurable
    pub configurable: bool,
}

impl PropertyAttributes {
    /// Default data property attributes
    pub const fn data() -> Self {
        Self {
            writable: true,
            enumerable: true,
            configurable: true,
        }
    }

    /// Non-writable, non-enumerable, non-configurable
    pub const fn frozen() -> Self {
        Self {
            writable: false,
            enumerable: false,
            configurable: false,
        }
    }

    /// Writable and configurable but hidden from enumeration, as for
    /// builtin methods
    pub const fn builtin_method() -> Self {
        Self {
            writable: true,
            enumerable: false,
            configurable: true,
        }
    }
}

// ============================================================================
// Accessor pairs
// ============================================================================

/// Getter/setter functions of a script accessor property, stored in the
/// property's value slot.
pub struct AccessorPair {
    getter: Option<ObjectRef>,
    setter: Option<ObjectRef>,
}

/// Mark descriptor of [`AccessorPair`] cells.
pub const ACCESSOR_PAIR_DESCRIPTOR: MarkDescriptor = mark_descriptor!(AccessorPair, getter, setter);

impl AccessorPair {
    /// Allocate a pair
    pub fn new_gc(getter: Option<ObjectRef>, setter: Option<ObjectRef>) -> GcPtr<AccessorPair> {
        heap().alloc(HeapKind::AccessorPair, AccessorPair { getter, setter })
    }

    /// The getter, if any
    pub fn getter(&self) -> Option<ObjectRef> {
        self.getter
    }

    /// The setter, if any
    pub fn setter(&self) -> Option<ObjectRef> {
        self.setter
    }
}

// ============================================================================
// Native accessors
// ============================================================================

/// Reads a natively backed data property.
pub type NativeGetter = fn(ObjectRef) -> Value;

/// Writes a natively backed data property. Returns `false` when the write
/// is rejected.
pub type NativeSetter = fn(&mut Context, ObjectRef, Value) -> VmResult<bool>;

/// A data property whose value lives outside the property slot, such as an
/// array's `length`.
///
/// Instances are `'static` and referenced by address from
/// [`StructurePropertyDescriptor`].
pub struct NativeAccessorData {
    /// Name, for diagnostics
    pub name: &'static str,
    /// Reported attributes
    pub attributes: PropertyAttributes,
    /// Reads the value
    pub getter: NativeGetter,
    /// Writes the value; `None` for read-only properties
    pub setter: Option<NativeSetter>,
}

impl fmt::Debug for NativeAccessorData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeAccessorData")
            .field("name", &self.name)
            .field("attributes", &self.attributes)
            .finish()
    }
}

// ============================================================================
// Packed structure descriptor
// ============================================================================

const INLINE_TAG: usize = 1;
const WRITABLE: usize = 1 << 1;
const ENUMERABLE: usize = 1 << 2;
const CONFIGURABLE: usize = 1 << 3;
const HAS_GETTER: usize = 1 << 4;
const ACCESSOR_MODE: usize = 1 << 6;

/// Packed per-property descriptor stored in a structure.
///
/// ```text
/// bit 0 set:   inline descriptor
///   bit 1      writable (data) / has setter (accessor)
///   bit 2      enumerable
///   bit 3      configurable
///   bit 4      has getter (accessor)
///   bit 6      accessor mode
/// bit 0 clear: address of a &'static NativeAccessorData
/// ```
///
/// Accessor descriptors have no writable attribute, so the writable bit
/// records setter presence instead.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct StructurePropertyDescriptor(usize);

impl StructurePropertyDescriptor {
    /// Plain data property
    pub const fn data(attributes: PropertyAttributes) -> Self {
        let mut bits = INLINE_TAG;
        if attributes.writable {
            bits |= WRITABLE;
        }
        if attributes.enumerable {
            bits |= ENUMERABLE;
        }
        if attributes.configurable {
            bits |= CONFIGURABLE;
        }
        Self(bits)
    }

    /// Writable, enumerable, configurable data property
    pub const fn default_data() -> Self {
        Self::data(PropertyAttributes::data())
    }

    /// Script accessor property
    pub const fn accessor(has_getter: bool, has_setter: bool, enumerable: bool, configurable: bool) -> Self {
        let mut bits = INLINE_TAG | ACCESSOR_MODE;
        if has_getter {
            bits |= HAS_GETTER;
        }
        if has_setter {
            bits |= WRITABLE;
        }
        if enumerable {
            bits |= ENUMERABLE;
        }
        if configurable {
            bits |= CONFIGURABLE;
        }
        Self(bits)
    }

    /// Data property backed by a native getter/setter
    pub fn native(data: &'static NativeAccessorData) -> Self {
        let bits = data as *const NativeAccessorData as usize;
        debug_assert_eq!(bits & INLINE_TAG, 0);
        Self(bits)
    }

    /// Raw word
    #[inline]
    pub fn bits(&self) -> usize {
        self.0
    }

    #[inline]
    fn is_inline(&self) -> bool {
        self.0 & INLINE_TAG != 0
    }

    /// The native accessor, for natively backed data properties
    #[inline]
    pub fn native_data(&self) -> Option<&'static NativeAccessorData> {
        // SAFETY: non-inline descriptors are built from &'static references
        (!self.is_inline()).then(|| unsafe { &*(self.0 as *const NativeAccessorData) })
    }

    /// Data property, plain or natively backed
    #[inline]
    pub fn is_data(&self) -> bool {
        !self.is_accessor()
    }

    /// Data property whose value lives in the slot
    #[inline]
    pub fn is_plain_data(&self) -> bool {
        self.is_inline() && self.0 & ACCESSOR_MODE == 0
    }

    /// Natively backed data property
    #[inline]
    pub fn is_native(&self) -> bool {
        !self.is_inline()
    }

    /// Script accessor property
    #[inline]
    pub fn is_accessor(&self) -> bool {
        self.is_inline() && self.0 & ACCESSOR_MODE != 0
    }

    /// Plain data property with every attribute set
    #[inline]
    pub fn is_default_data(&self) -> bool {
        *self == Self::default_data()
    }

    /// Writable attribute (always `false` for accessors)
    pub fn is_writable(&self) -> bool {
        match self.native_data() {
            Some(native) => native.attributes.writable,
            None => self.is_plain_data() && self.0 & WRITABLE != 0,
        }
    }

    /// Enumerable attribute
    pub fn is_enumerable(&self) -> bool {
        match self.native_data() {
            Some(native) => native.attributes.enumerable,
            None => self.0 & ENUMERABLE != 0,
        }
    }

    /// Configurable attribute
    pub fn is_configurable(&self) -> bool {
        match self.native_data() {
            Some(native) => native.attributes.configurable,
            None => self.0 & CONFIGURABLE != 0,
        }
    }

    /// Accessor with a getter
    pub fn has_getter(&self) -> bool {
        self.is_accessor() && self.0 & HAS_GETTER != 0
    }

    /// Accessor with a setter
    pub fn has_setter(&self) -> bool {
        self.is_accessor() && self.0 & WRITABLE != 0
    }

    /// The attributes as a record (writable is `false` for accessors)
    pub fn attributes(&self) -> PropertyAttributes {
        PropertyAttributes {
            writable: self.is_writable(),
            enumerable: self.is_enumerable(),
            configurable: self.is_configurable(),
        }
    }
}

impl fmt::Debug for StructurePropertyDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(native) = self.native_data() {
            return write!(f, "Native({})", native.name);
        }
        let flag = |set: bool, c: char| if set { c } else { '-' };
        if self.is_accessor() {
            write!(
                f,
                "Accessor({}{}{}{})",
                flag(self.has_getter(), 'g'),
                flag(self.has_setter(), 's'),
                flag(self.is_enumerable(), 'e'),
                flag(self.is_configurable(), 'c')
            )
        } else {
            write!(
                f,
                "Data({}{}{})",
                flag(self.is_writable(), 'w'),
                flag(self.is_enumerable(), 'e'),
                flag(self.is_configurable(), 'c')
            )
        }
    }
}

// ============================================================================
// Descriptor records
// ============================================================================

/// Property descriptor record; absent fields are `None`.
#[derive(Clone, Copy, Debug, Default)]
pub struct PropertyDescriptor {
    /// `[[Value]]`
    pub value: Option<Value>,
    /// `[[Writable]]`
    pub writable: Option<bool>,
    /// `[[Get]]`, `undefined` or a callable
    pub get: Option<Value>,
    /// `[[Set]]`, `undefined` or a callable
    pub set: Option<Value>,
    /// `[[Enumerable]]`
    pub enumerable: Option<bool>,
    /// `[[Configurable]]`
    pub configurable: Option<bool>,
}

impl PropertyDescriptor {
    /// Complete data descriptor
    pub fn data(value: Value, attributes: PropertyAttributes) -> Self {
        Self {
            value: Some(value),
            writable: Some(attributes.writable),
            enumerable: Some(attributes.enumerable),
            configurable: Some(attributes.configurable),
            ..Self::default()
        }
    }

    /// Writable, enumerable, configurable data descriptor
    pub fn data_default(value: Value) -> Self {
        Self::data(value, PropertyAttributes::data())
    }

    /// Complete accessor descriptor
    pub fn accessor(get: Option<ObjectRef>, set: Option<ObjectRef>, enumerable: bool, configurable: bool) -> Self {
        let callable = |f: Option<ObjectRef>| Some(f.map_or(Value::undefined(), Value::object));
        Self {
            get: callable(get),
            set: callable(set),
            enumerable: Some(enumerable),
            configurable: Some(configurable),
            ..Self::default()
        }
    }

    /// Set `[[Value]]`
    pub fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }

    /// Set `[[Writable]]`
    pub fn with_writable(mut self, writable: bool) -> Self {
        self.writable = Some(writable);
        self
    }

    /// Set `[[Enumerable]]`
    pub fn with_enumerable(mut self, enumerable: bool) -> Self {
        self.enumerable = Some(enumerable);
        self
    }

    /// Set `[[Configurable]]`
    pub fn with_configurable(mut self, configurable: bool) -> Self {
        self.configurable = Some(configurable);
        self
    }

    /// Set `[[Get]]`
    pub fn with_get(mut self, get: Value) -> Self {
        self.get = Some(get);
        self
    }

    /// Set `[[Set]]`
    pub fn with_set(mut self, set: Value) -> Self {
        self.set = Some(set);
        self
    }

    /// IsAccessorDescriptor
    pub fn is_accessor_descriptor(&self) -> bool {
        self.get.is_some() || self.set.is_some()
    }

    /// IsDataDescriptor
    pub fn is_data_descriptor(&self) -> bool {
        self.value.is_some() || self.writable.is_some()
    }

    /// IsGenericDescriptor
    pub fn is_generic_descriptor(&self) -> bool {
        !self.is_accessor_descriptor() && !self.is_data_descriptor()
    }

    /// Every present boolean attribute is `true`
    pub fn present_attributes_all_true(&self) -> bool {
        [self.writable, self.enumerable, self.configurable]
            .into_iter()
            .all(|attr| attr.unwrap_or(true))
    }

    /// A data descriptor with a value and every attribute present and `true`
    pub fn is_default_data(&self) -> bool {
        self.value.is_some()
            && self.get.is_none()
            && self.set.is_none()
            && self.writable == Some(true)
            && self.enumerable == Some(true)
            && self.configurable == Some(true)
    }

    /// Packed form of this descriptor once applied to a fresh property,
    /// with absent attributes defaulting to `false`.
    pub fn to_structure_descriptor(&self) -> StructurePropertyDescriptor {
        let enumerable = self.enumerable.unwrap_or(false);
        let configurable = self.configurable.unwrap_or(false);
        if self.is_accessor_descriptor() {
            let present = |f: Option<Value>| f.is_some_and(|v| !v.is_undefined());
            StructurePropertyDescriptor::accessor(present(self.get), present(self.set), enumerable, configurable)
        } else {
            StructurePropertyDescriptor::data(PropertyAttributes {
                writable: self.writable.unwrap_or(false),
                enumerable,
                configurable,
            })
        }
    }
}
