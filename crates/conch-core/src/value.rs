//! JavaScript values with NaN-boxing
//!
//! NaN-boxing encodes JS values in 64 bits using the IEEE 754 NaN space.
//! This allows storing pointers, integers, and special values without
//! additional allocation.
//!
//! ## Encoding Scheme
//!
//! ```text
//! 64 bits: SEEEEEEE EEEEMMMM MMMMMMMM ... MMMMMMMM
//!          S = sign bit
//!          E = exponent (11 bits)
//!          M = mantissa (52 bits)
//!
//! Regular doubles: When exponent != 0x7FF (NaN)
//! NaN-boxed values: When exponent == 0x7FF and mantissa != 0 (quiet NaN)
//!
//! Encoding:
//! - Double:     stored directly (except NaN)
//! - NaN:        0x7FFA_0000_0000_0000 (canonical NaN, distinct from undefined)
//! - Integer:    0x7FF8_0001_XXXX_XXXX (32-bit signed in lower bits)
//! - Pointer:    0x7FFC_XXXX_XXXX_XXXX (48-bit GcHeader address)
//! - Undefined:  0x7FF8_0000_0000_0000
//! - Null:       0x7FF8_0000_0000_0001
//! - True:       0x7FF8_0000_0000_0002
//! - False:      0x7FF8_0000_0000_0003
//! - Empty:      0x7FF8_0000_0000_0004 (hole marker, never user visible)
//! ```
//!
//! A `Value` is a plain copyable word. It does not keep its target alive: a
//! value held only on the native stack must be rooted through
//! [`crate::Context::root`] before the next collection.

use std::fmt;

use conch_gc::{GcHeader, GcPtr, HeapKind};

use crate::object::ObjectRef;
use crate::string::JsString;
use crate::symbol::Symbol;

// NaN-boxing constants
const QUIET_NAN: u64 = 0x7FF8_0000_0000_0000;
const TAG_MASK: u64 = 0xFFFF_0000_0000_0000;
const BOX_MASK: u64 = 0xFFF8_0000_0000_0000;
const PAYLOAD_MASK: u64 = 0x0000_FFFF_FFFF_FFFF;

// Tags (in the upper 16 bits after quiet NaN prefix)
const TAG_UNDEFINED: u64 = 0x7FF8_0000_0000_0000;
const TAG_NULL: u64 = 0x7FF8_0000_0000_0001;
const TAG_TRUE: u64 = 0x7FF8_0000_0000_0002;
const TAG_FALSE: u64 = 0x7FF8_0000_0000_0003;
const TAG_EMPTY: u64 = 0x7FF8_0000_0000_0004;
const TAG_NAN: u64 = 0x7FFA_0000_0000_0000; // Canonical NaN (distinct from undefined)
const TAG_INT32: u64 = 0x7FF8_0001_0000_0000;
const TAG_POINTER: u64 = 0x7FFC_0000_0000_0000;

/// Whether cells of `kind` are JS objects.
#[inline]
pub fn is_object_kind(kind: HeapKind) -> bool {
    matches!(
        kind,
        HeapKind::Object
            | HeapKind::ArrayObject
            | HeapKind::FunctionObject
            | HeapKind::WeakRefObject
            | HeapKind::FinalizationRegistryObject
    )
}

/// Hint passed to ToPrimitive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreferredType {
    /// No preference ("default")
    Default,
    /// Prefer a number ("number")
    Number,
    /// Prefer a string ("string")
    String,
}

impl PreferredType {
    /// Hint string handed to `@@toPrimitive`
    pub fn as_str(self) -> &'static str {
        match self {
            PreferredType::Default => "default",
            PreferredType::Number => "number",
            PreferredType::String => "string",
        }
    }
}

/// A JavaScript value using NaN-boxing for efficient storage
#[derive(Clone, Copy)]
pub struct Value {
    bits: u64,
}

impl Value {
    /// Create undefined value
    #[inline]
    pub const fn undefined() -> Self {
        Self { bits: TAG_UNDEFINED }
    }

    /// Create null value
    #[inline]
    pub const fn null() -> Self {
        Self { bits: TAG_NULL }
    }

    /// Create the hole marker
    #[inline]
    pub const fn empty() -> Self {
        Self { bits: TAG_EMPTY }
    }

    /// Create boolean value
    #[inline]
    pub const fn boolean(b: bool) -> Self {
        Self {
            bits: if b { TAG_TRUE } else { TAG_FALSE },
        }
    }

    /// Create integer value
    #[inline]
    pub const fn int32(n: i32) -> Self {
        Self {
            bits: TAG_INT32 | (n as u32 as u64),
        }
    }

    /// Create number value.
    ///
    /// Integral values in the int32 range are stored as integers, except
    /// negative zero.
    #[inline]
    pub fn number(n: f64) -> Self {
        let as_int = n as i32;
        if as_int as f64 == n && !(n == 0.0 && n.is_sign_negative()) {
            Self::int32(as_int)
        } else {
            Self::double(n)
        }
    }

    /// Create a number value that always uses the double encoding
    #[inline]
    pub fn double(n: f64) -> Self {
        if n.is_nan() {
            Self { bits: TAG_NAN }
        } else {
            Self { bits: n.to_bits() }
        }
    }

    /// Create NaN value
    #[inline]
    pub const fn nan() -> Self {
        Self { bits: TAG_NAN }
    }

    /// Create string value
    #[inline]
    pub fn string(s: GcPtr<JsString>) -> Self {
        Self::pointer(s.as_header_ptr())
    }

    /// Create symbol value
    #[inline]
    pub fn symbol(s: GcPtr<Symbol>) -> Self {
        Self::pointer(s.as_header_ptr())
    }

    /// Create object value
    #[inline]
    pub fn object(o: ObjectRef) -> Self {
        Self::pointer(o.header_ptr())
    }

    #[inline]
    fn pointer(header: *const GcHeader) -> Self {
        let addr = header as u64;
        debug_assert_eq!(addr & !PAYLOAD_MASK, 0, "heap address exceeds 48 bits");
        Self {
            bits: TAG_POINTER | (addr & PAYLOAD_MASK),
        }
    }

    /// Create a value from a cell header.
    ///
    /// # Safety
    /// `header` must be a live string, symbol or object cell.
    pub unsafe fn from_header(header: *const GcHeader) -> Self {
        // SAFETY: caller guarantees a live header
        let kind = unsafe { (*header).kind() };
        debug_assert!(
            matches!(kind, HeapKind::String | HeapKind::Symbol) || is_object_kind(kind),
            "{kind} cells are not values"
        );
        Self::pointer(header)
    }

    /// Raw bits
    #[inline]
    pub fn to_bits(&self) -> u64 {
        self.bits
    }

    // ---------------------------------------------------------------
    // Tag inspection
    // ---------------------------------------------------------------

    /// Check if value is undefined
    #[inline]
    pub fn is_undefined(&self) -> bool {
        self.bits == TAG_UNDEFINED
    }

    /// Check if value is null
    #[inline]
    pub fn is_null(&self) -> bool {
        self.bits == TAG_NULL
    }

    /// Check if value is null or undefined
    #[inline]
    pub fn is_nullish(&self) -> bool {
        self.is_undefined() || self.is_null()
    }

    /// Check if value is the hole marker
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bits == TAG_EMPTY
    }

    /// Check if value is a boolean
    #[inline]
    pub fn is_boolean(&self) -> bool {
        self.bits == TAG_TRUE || self.bits == TAG_FALSE
    }

    /// Check if value is an int32
    #[inline]
    pub fn is_int32(&self) -> bool {
        (self.bits & 0xFFFF_FFFF_0000_0000) == TAG_INT32
    }

    /// Check if value is a double (including NaN)
    #[inline]
    pub fn is_double(&self) -> bool {
        self.bits == TAG_NAN || (self.bits & BOX_MASK) != QUIET_NAN
    }

    /// Check if value is a number (int32 or double)
    #[inline]
    pub fn is_number(&self) -> bool {
        self.is_int32() || self.is_double()
    }

    /// Check if value is a heap pointer
    #[inline]
    pub fn is_pointer(&self) -> bool {
        (self.bits & TAG_MASK) == TAG_POINTER
    }

    /// Check if value is a string
    #[inline]
    pub fn is_string(&self) -> bool {
        self.heap_kind() == Some(HeapKind::String)
    }

    /// Check if value is a symbol
    #[inline]
    pub fn is_symbol(&self) -> bool {
        self.heap_kind() == Some(HeapKind::Symbol)
    }

    /// Check if value is an object
    #[inline]
    pub fn is_object(&self) -> bool {
        self.heap_kind().is_some_and(is_object_kind)
    }

    /// Check if value is a callable object
    pub fn is_callable(&self) -> bool {
        self.as_object().is_some_and(|o| o.is_callable())
    }

    /// Check if value is a primitive
    #[inline]
    pub fn is_primitive(&self) -> bool {
        !self.is_object()
    }

    // ---------------------------------------------------------------
    // Accessors
    // ---------------------------------------------------------------

    /// Header of the referenced cell
    #[inline]
    pub fn as_header(&self) -> Option<*const GcHeader> {
        self.is_pointer()
            .then_some((self.bits & PAYLOAD_MASK) as *const GcHeader)
    }

    /// Heap kind of the referenced cell
    #[inline]
    pub fn heap_kind(&self) -> Option<HeapKind> {
        // SAFETY: pointer values reference live cells
        self.as_header().map(|h| unsafe { (*h).kind() })
    }

    /// Get as boolean
    #[inline]
    pub fn as_boolean(&self) -> Option<bool> {
        match self.bits {
            TAG_TRUE => Some(true),
            TAG_FALSE => Some(false),
            _ => None,
        }
    }

    /// Get as int32
    #[inline]
    pub fn as_int32(&self) -> Option<i32> {
        self.is_int32().then_some(self.bits as u32 as i32)
    }

    /// Get as double (only for double-encoded numbers)
    #[inline]
    pub fn as_double(&self) -> Option<f64> {
        if self.bits == TAG_NAN {
            Some(f64::NAN)
        } else if self.is_double() {
            Some(f64::from_bits(self.bits))
        } else {
            None
        }
    }

    /// Get as number (int32 or double)
    #[inline]
    pub fn as_number(&self) -> Option<f64> {
        match self.as_int32() {
            Some(n) => Some(n as f64),
            None => self.as_double(),
        }
    }

    /// Get as string
    #[inline]
    pub fn as_string(&self) -> Option<GcPtr<JsString>> {
        let header = self.as_header()?;
        // SAFETY: the kind check guarantees the payload type
        (self.heap_kind()? == HeapKind::String).then(|| unsafe { GcPtr::from_header(header) })
    }

    /// Get as symbol
    #[inline]
    pub fn as_symbol(&self) -> Option<GcPtr<Symbol>> {
        let header = self.as_header()?;
        // SAFETY: the kind check guarantees the payload type
        (self.heap_kind()? == HeapKind::Symbol).then(|| unsafe { GcPtr::from_header(header) })
    }

    /// Get as object
    #[inline]
    pub fn as_object(&self) -> Option<ObjectRef> {
        let header = self.as_header()?;
        // SAFETY: the kind check guarantees the payload type
        is_object_kind(self.heap_kind()?).then(|| unsafe { ObjectRef::from_header(header) })
    }

    // ---------------------------------------------------------------
    // Non-coercing operations
    // ---------------------------------------------------------------

    /// ToBoolean
    pub fn to_boolean(&self) -> bool {
        if let Some(b) = self.as_boolean() {
            return b;
        }
        if let Some(n) = self.as_int32() {
            return n != 0;
        }
        if let Some(n) = self.as_double() {
            return n != 0.0 && !n.is_nan();
        }
        if let Some(s) = self.as_string() {
            return !s.is_empty();
        }
        !self.is_nullish() && !self.is_empty()
    }

    /// `typeof` result
    pub fn type_of(&self) -> &'static str {
        if self.is_undefined() || self.is_empty() {
            "undefined"
        } else if self.is_null() {
            "object"
        } else if self.is_boolean() {
            "boolean"
        } else if self.is_number() {
            "number"
        } else if self.is_string() {
            "string"
        } else if self.is_symbol() {
            "symbol"
        } else if self.is_callable() {
            "function"
        } else {
            "object"
        }
    }

    /// IsStrictlyEqual (`===`)
    pub fn strict_equals(&self, other: &Value) -> bool {
        if let (Some(a), Some(b)) = (self.as_number(), other.as_number()) {
            return a == b;
        }
        if let (Some(a), Some(b)) = (self.as_string(), other.as_string()) {
            return a.as_str() == b.as_str();
        }
        self.bits == other.bits
    }

    /// SameValue: like `===` but NaN equals NaN and +0 differs from -0
    pub fn same_value(&self, other: &Value) -> bool {
        if let (Some(a), Some(b)) = (self.as_number(), other.as_number()) {
            if a.is_nan() && b.is_nan() {
                return true;
            }
            return a == b && a.is_sign_negative() == b.is_sign_negative();
        }
        self.strict_equals(other)
    }

    /// SameValueZero: like SameValue but +0 equals -0
    pub fn same_value_zero(&self, other: &Value) -> bool {
        if let (Some(a), Some(b)) = (self.as_number(), other.as_number()) {
            return (a.is_nan() && b.is_nan()) || a == b;
        }
        self.strict_equals(other)
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::undefined()
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_undefined() {
            write!(f, "undefined")
        } else if self.is_null() {
            write!(f, "null")
        } else if self.is_empty() {
            write!(f, "<empty>")
        } else if let Some(b) = self.as_boolean() {
            write!(f, "{b}")
        } else if let Some(n) = self.as_int32() {
            write!(f, "{n}")
        } else if let Some(n) = self.as_double() {
            write!(f, "{n:?}")
        } else if let Some(s) = self.as_string() {
            write!(f, "{:?}", s.as_str())
        } else if self.is_symbol() {
            write!(f, "Symbol()")
        } else {
            write!(f, "[object {:#x}]", self.bits & PAYLOAD_MASK)
        }
    }
}
