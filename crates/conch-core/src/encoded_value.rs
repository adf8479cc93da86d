//! Heap-storable value encodings
//!
//! [`Value`] is a NaN-boxed word meant for locals and arguments. Property
//! slots and array buffers store one of the encodings below instead, whose
//! every non-immediate word is a real cell reference the collector can
//! follow:
//!
//! ```text
//! EncodedValue (usize)
//!   xxxx...xxx1   small integer, 31-bit signed, value << 1 | 1
//!   0, 2, 4, 6, 8 empty, undefined, null, true, false
//!   other even    GcHeader address (string, symbol, object,
//!                 number box or accessor pair)
//!
//! EncodedSmallValue (u32)
//!   xxxx...xxx1   small integer, 31-bit signed, value << 1 | 1
//!   id << 1       id < 16: empty, undefined, null, true, false
//!                 id >= 16: compressed cell id
//! ```
//!
//! Numbers outside the small-integer range are stored in a [`NumberBox`]
//! cell. A box belongs to exactly one slot, so overwriting a slot that
//! already holds a box with another boxed number stores the new double into
//! the existing box instead of allocating. Encodings must therefore never be
//! copied raw from one slot into another; copy through [`Value`] instead.

use std::cell::Cell;
use std::fmt;

use conch_gc::{GcHeader, GcPtr, HeapKind, Slot, TraceSlot, heap};

use crate::property_descriptor::AccessorPair;
use crate::value::{Value, is_object_kind};

// Small-integer tagging shared by both encodings
const SMI_TAG: u32 = 1;
const SMI_MIN: i32 = -(1 << 30);
const SMI_MAX: i32 = (1 << 30) - 1;

/// Whether `value` fits the 31-bit small-integer range.
#[inline]
pub fn is_valid_smi(value: i32) -> bool {
    (value as u32).wrapping_add(0x4000_0000) < 0x8000_0000
}

/// Small integer encodable from a number, if any.
#[inline]
fn smi_from_value(value: Value) -> Option<i32> {
    if let Some(i) = value.as_int32() {
        return is_valid_smi(i).then_some(i);
    }
    let n = value.as_double()?;
    let i = n as i32;
    (i as f64 == n && !(n == 0.0 && n.is_sign_negative()) && (SMI_MIN..=SMI_MAX).contains(&i))
        .then_some(i)
}

// ============================================================================
// Number boxes
// ============================================================================

/// Heap cell holding one double for an encoded slot.
pub struct NumberBox {
    value: Cell<f64>,
}

impl NumberBox {
    /// Allocate a box holding `value`.
    pub fn new_gc(value: f64) -> GcPtr<NumberBox> {
        heap().alloc(HeapKind::NumberBox, NumberBox { value: Cell::new(value) })
    }

    /// The boxed number.
    #[inline]
    pub fn get(&self) -> f64 {
        self.value.get()
    }

    #[inline]
    fn set(&self, value: f64) {
        self.value.set(value);
    }
}

/// Header of the number box `header` refers to, if it is one.
///
/// The kind byte is read before the payload, so a pointer to any other cell
/// kind is never reinterpreted as a box.
#[inline]
fn as_number_box(header: *const GcHeader) -> Option<GcPtr<NumberBox>> {
    // SAFETY: encoded slots only hold headers of live cells
    let kind = unsafe { (*header).kind() };
    // SAFETY: the kind check guarantees the payload type
    (kind == HeapKind::NumberBox).then(|| unsafe { GcPtr::from_header(header) })
}

/// Decode a cell reference into a value.
#[inline]
fn value_from_cell(header: *const GcHeader) -> Value {
    if let Some(number) = as_number_box(header) {
        return Value::double(number.get());
    }
    // SAFETY: encoded slots only hold headers of live cells
    let kind = unsafe { (*header).kind() };
    match kind {
        // SAFETY: the kind is a value kind
        HeapKind::String | HeapKind::Symbol => unsafe { Value::from_header(header) },
        kind if is_object_kind(kind) => unsafe { Value::from_header(header) },
        HeapKind::AccessorPair => panic!("accessor pair read as a data value"),
        other => panic!("{other} cell found in an encoded value slot"),
    }
}

// ============================================================================
// EncodedValue
// ============================================================================

const IMMEDIATE_EMPTY: usize = 0;
const IMMEDIATE_UNDEFINED: usize = 2;
const IMMEDIATE_NULL: usize = 4;
const IMMEDIATE_TRUE: usize = 6;
const IMMEDIATE_FALSE: usize = 8;
/// Words below this are immediates, never addresses.
const IMMEDIATE_LIMIT: usize = 0x100;

/// Word-sized heap encoding of a [`Value`].
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct EncodedValue(usize);

impl EncodedValue {
    /// The hole marker
    pub const EMPTY: EncodedValue = EncodedValue(IMMEDIATE_EMPTY);
    /// `undefined`
    pub const UNDEFINED: EncodedValue = EncodedValue(IMMEDIATE_UNDEFINED);

    /// Encode `value`, boxing numbers outside the small-integer range.
    pub fn new(value: Value) -> Self {
        let mut encoded = Self::EMPTY;
        encoded.assign(value);
        encoded
    }

    /// Encode an accessor pair.
    pub fn from_accessor_pair(pair: GcPtr<AccessorPair>) -> Self {
        Self(pair.as_header_ptr() as usize)
    }

    /// Raw word
    #[inline]
    pub fn to_bits(&self) -> usize {
        self.0
    }

    /// Whether this is the hole marker
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0 == IMMEDIATE_EMPTY
    }

    /// Whether this is a small integer
    #[inline]
    pub fn is_smi(&self) -> bool {
        self.0 as u32 & SMI_TAG == SMI_TAG
    }

    /// The small integer, if this is one
    #[inline]
    pub fn as_smi(&self) -> Option<i32> {
        // Arithmetic shift keeps the sign
        self.is_smi().then_some((self.0 as isize >> 1) as i32)
    }

    /// Whether this slot holds a cell reference
    #[inline]
    pub fn is_stored_in_heap(&self) -> bool {
        !self.is_smi() && self.0 >= IMMEDIATE_LIMIT
    }

    #[inline]
    fn header(&self) -> Option<*const GcHeader> {
        self.is_stored_in_heap().then_some(self.0 as *const GcHeader)
    }

    /// Whether this slot holds a private number box
    pub fn is_number_box(&self) -> bool {
        self.header().and_then(as_number_box).is_some()
    }

    /// The accessor pair, if this slot holds one
    pub fn as_accessor_pair(&self) -> Option<GcPtr<AccessorPair>> {
        let header = self.header()?;
        // SAFETY: encoded slots only hold headers of live cells
        let kind = unsafe { (*header).kind() };
        // SAFETY: the kind check guarantees the payload type
        (kind == HeapKind::AccessorPair).then(|| unsafe { GcPtr::from_header(header) })
    }

    /// Decode into a [`Value`].
    ///
    /// # Panics
    /// Panics on an unknown immediate or an accessor pair.
    pub fn to_value(&self) -> Value {
        if let Some(i) = self.as_smi() {
            return Value::int32(i);
        }
        match self.0 {
            IMMEDIATE_EMPTY => Value::empty(),
            IMMEDIATE_UNDEFINED => Value::undefined(),
            IMMEDIATE_NULL => Value::null(),
            IMMEDIATE_TRUE => Value::boolean(true),
            IMMEDIATE_FALSE => Value::boolean(false),
            word if word < IMMEDIATE_LIMIT => panic!("torn encoded value {word:#x}"),
            word => value_from_cell(word as *const GcHeader),
        }
    }

    /// Store `value` into this slot.
    ///
    /// A boxed number overwriting a slot that already holds a box reuses the
    /// box in place.
    pub fn assign(&mut self, value: Value) {
        if let Some(i) = smi_from_value(value) {
            self.0 = (((i as u32) << 1) | SMI_TAG) as i32 as isize as usize;
            return;
        }
        if let Some(n) = value.as_number() {
            if let Some(existing) = self.header().and_then(as_number_box) {
                existing.set(n);
                return;
            }
            self.0 = NumberBox::new_gc(n).as_header_ptr() as usize;
            return;
        }
        if let Some(header) = value.as_header() {
            self.0 = header as usize;
            return;
        }
        self.0 = if value.is_undefined() {
            IMMEDIATE_UNDEFINED
        } else if value.is_null() {
            IMMEDIATE_NULL
        } else if value.is_empty() {
            IMMEDIATE_EMPTY
        } else if value.to_boolean() {
            IMMEDIATE_TRUE
        } else {
            IMMEDIATE_FALSE
        };
    }
}

impl Default for EncodedValue {
    fn default() -> Self {
        Self::UNDEFINED
    }
}

impl Slot for EncodedValue {
    const EMPTY: Self = EncodedValue::EMPTY;
}

impl TraceSlot for EncodedValue {
    #[inline]
    fn traced_pointer(&self) -> Option<*const GcHeader> {
        self.header()
    }
}

impl fmt::Debug for EncodedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.as_accessor_pair().is_some() {
            return write!(f, "EncodedValue(<accessor>)");
        }
        write!(f, "EncodedValue({:?})", self.to_value())
    }
}

// ============================================================================
// EncodedSmallValue
// ============================================================================

const SMALL_EMPTY: u32 = 0;
const SMALL_UNDEFINED: u32 = 1;
const SMALL_NULL: u32 = 2;
const SMALL_TRUE: u32 = 3;
const SMALL_FALSE: u32 = 4;
/// Ids below this are immediates; cell ids never fall below it.
const SMALL_IMMEDIATE_LIMIT: u32 = 16;

/// 4-byte heap encoding of a [`Value`], used by fast-mode array storage.
///
/// Cell references are stored as compressed cell ids and resolved through
/// the thread heap.
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct EncodedSmallValue(u32);

impl EncodedSmallValue {
    /// The hole marker
    pub const EMPTY: EncodedSmallValue = EncodedSmallValue(SMALL_EMPTY << 1);
    /// `undefined`
    pub const UNDEFINED: EncodedSmallValue = EncodedSmallValue(SMALL_UNDEFINED << 1);

    /// Encode `value`, boxing numbers outside the small-integer range.
    pub fn new(value: Value) -> Self {
        let mut encoded = Self::EMPTY;
        encoded.assign(value);
        encoded
    }

    /// Raw word
    #[inline]
    pub fn to_bits(&self) -> u32 {
        self.0
    }

    /// Whether this is the hole marker
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0 == Self::EMPTY.0
    }

    /// Whether this is a small integer
    #[inline]
    pub fn is_smi(&self) -> bool {
        self.0 & SMI_TAG == SMI_TAG
    }

    /// The small integer, if this is one
    #[inline]
    pub fn as_smi(&self) -> Option<i32> {
        self.is_smi().then_some((self.0 as i32) >> 1)
    }

    #[inline]
    fn cell_id(&self) -> Option<u32> {
        let id = self.0 >> 1;
        (!self.is_smi() && id >= SMALL_IMMEDIATE_LIMIT).then_some(id)
    }

    #[inline]
    fn header(&self) -> Option<*const GcHeader> {
        self.cell_id().map(|id| heap().header_for_cell_id(id))
    }

    /// Whether this slot holds a private number box
    pub fn is_number_box(&self) -> bool {
        self.header().and_then(as_number_box).is_some()
    }

    /// Decode into a [`Value`].
    ///
    /// # Panics
    /// Panics on an unknown immediate or a stale cell id.
    pub fn to_value(&self) -> Value {
        if let Some(i) = self.as_smi() {
            return Value::int32(i);
        }
        match self.0 >> 1 {
            SMALL_EMPTY => Value::empty(),
            SMALL_UNDEFINED => Value::undefined(),
            SMALL_NULL => Value::null(),
            SMALL_TRUE => Value::boolean(true),
            SMALL_FALSE => Value::boolean(false),
            id if id < SMALL_IMMEDIATE_LIMIT => panic!("torn encoded small value {:#x}", self.0),
            id => value_from_cell(heap().header_for_cell_id(id)),
        }
    }

    /// Store `value` into this slot, reusing a private box for numbers.
    pub fn assign(&mut self, value: Value) {
        if let Some(i) = smi_from_value(value) {
            self.0 = ((i as u32) << 1) | SMI_TAG;
            return;
        }
        let id = if let Some(n) = value.as_number() {
            if let Some(existing) = self.header().and_then(as_number_box) {
                existing.set(n);
                return;
            }
            NumberBox::new_gc(n).header().cell_id()
        } else if let Some(header) = value.as_header() {
            // SAFETY: pointer values reference live cells
            unsafe { (*header).cell_id() }
        } else if value.is_undefined() {
            SMALL_UNDEFINED
        } else if value.is_null() {
            SMALL_NULL
        } else if value.is_empty() {
            SMALL_EMPTY
        } else if value.to_boolean() {
            SMALL_TRUE
        } else {
            SMALL_FALSE
        };
        self.0 = id << 1;
    }
}

impl Default for EncodedSmallValue {
    fn default() -> Self {
        Self::UNDEFINED
    }
}

impl Slot for EncodedSmallValue {
    const EMPTY: Self = EncodedSmallValue::EMPTY;
}

impl TraceSlot for EncodedSmallValue {
    #[inline]
    fn traced_pointer(&self) -> Option<*const GcHeader> {
        self.header()
    }
}

impl fmt::Debug for EncodedSmallValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncodedSmallValue({:?})", self.to_value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conch_gc::MarkProcedure;

    fn register_boxes() {
        if !heap().is_kind_registered(HeapKind::NumberBox) {
            heap().register_kind(HeapKind::NumberBox, MarkProcedure::Leaf);
        }
    }

    #[test]
    fn test_smi_range() {
        assert!(is_valid_smi(0));
        assert!(is_valid_smi(SMI_MAX));
        assert!(is_valid_smi(SMI_MIN));
        assert!(!is_valid_smi(SMI_MAX + 1));
        assert!(!is_valid_smi(SMI_MIN - 1));
        assert!(!is_valid_smi(i32::MIN));
    }

    #[test]
    fn test_negative_smi_uses_arithmetic_shift() {
        let encoded = EncodedValue::new(Value::int32(-5));
        assert!(encoded.is_smi());
        assert_eq!(encoded.as_smi(), Some(-5));
        let small = EncodedSmallValue::new(Value::int32(SMI_MIN));
        assert_eq!(small.as_smi(), Some(SMI_MIN));
    }

    #[test]
    fn test_immediates() {
        for value in [
            Value::undefined(),
            Value::null(),
            Value::boolean(true),
            Value::boolean(false),
            Value::empty(),
        ] {
            let encoded = EncodedValue::new(value);
            assert!(!encoded.is_stored_in_heap());
            assert_eq!(encoded.to_value().to_bits(), value.to_bits());
            let small = EncodedSmallValue::new(value);
            assert_eq!(small.to_value().to_bits(), value.to_bits());
        }
        assert_eq!(EncodedValue::EMPTY.to_bits(), 0);
    }

    #[test]
    fn test_integral_double_is_inline() {
        register_boxes();
        let encoded = EncodedValue::new(Value::double(12.0));
        assert_eq!(encoded.as_smi(), Some(12));
        assert!(!EncodedValue::new(Value::double(-0.0)).is_smi());
    }

    #[test]
    fn test_out_of_range_numbers_are_boxed() {
        register_boxes();
        let big = EncodedValue::new(Value::int32(i32::MAX));
        assert!(big.is_number_box());
        assert_eq!(big.to_value().as_number(), Some(i32::MAX as f64));

        let negative_zero = EncodedSmallValue::new(Value::double(-0.0));
        assert!(negative_zero.is_number_box());
        let decoded = negative_zero.to_value().as_number().unwrap();
        assert!(decoded == 0.0 && decoded.is_sign_negative());
    }

    #[test]
    fn test_assign_reuses_box() {
        register_boxes();
        let mut slot = EncodedValue::new(Value::double(1.5));
        let before = slot.to_bits();
        slot.assign(Value::double(2.5));
        assert_eq!(slot.to_bits(), before);
        assert_eq!(slot.to_value().as_number(), Some(2.5));

        slot.assign(Value::int32(3));
        assert!(slot.is_smi());
        slot.assign(Value::double(4.5));
        assert_ne!(slot.to_bits(), before);

        let mut small = EncodedSmallValue::new(Value::double(0.25));
        let before = small.to_bits();
        small.assign(Value::nan());
        assert_eq!(small.to_bits(), before);
        assert!(small.to_value().as_number().unwrap().is_nan());
    }

    #[test]
    #[should_panic(expected = "torn encoded value")]
    fn test_torn_immediate_panics() {
        let _ = EncodedValue(0x42).to_value();
    }

    #[test]
    fn test_trace_skips_immediates() {
        register_boxes();
        assert_eq!(EncodedValue::new(Value::int32(9)).traced_pointer(), None);
        assert_eq!(EncodedValue::UNDEFINED.traced_pointer(), None);
        assert_eq!(EncodedSmallValue::EMPTY.traced_pointer(), None);
        let boxed = EncodedSmallValue::new(Value::double(0.5));
        assert!(boxed.traced_pointer().is_some());
    }
}
