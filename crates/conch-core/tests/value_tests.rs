//! Value encoding tests
//!
//! Values must survive a trip through both heap encodings unchanged, and
//! the equality algorithms must agree with each other.

use conch_core::{Context, EncodedSmallValue, EncodedValue, Value};
use conch_core::number::{number_to_string, string_to_number};
use proptest::prelude::*;

proptest! {
    #[test]
    fn test_int32_survives_nan_boxing(n in any::<i32>()) {
        let value = Value::int32(n);
        prop_assert_eq!(value.as_int32(), Some(n));
        prop_assert_eq!(value.as_number(), Some(f64::from(n)));
    }

    #[test]
    fn test_numbers_survive_both_encodings(n in any::<f64>()) {
        let _ctx = Context::new();
        let value = Value::number(n);
        let wide = EncodedValue::new(value).to_value();
        let small = EncodedSmallValue::new(value).to_value();
        prop_assert!(wide.same_value(&value));
        prop_assert!(small.same_value(&value));
    }

    #[test]
    fn test_same_value_implies_same_value_zero(a in any::<f64>(), b in any::<f64>()) {
        let (a, b) = (Value::number(a), Value::number(b));
        if a.same_value(&b) {
            prop_assert!(a.same_value_zero(&b));
        }
        if a.strict_equals(&b) {
            prop_assert!(a.same_value_zero(&b));
        }
    }

    #[test]
    fn test_integer_strings_round_trip(n in -1_000_000_000i64..1_000_000_000i64) {
        let text = number_to_string(n as f64);
        prop_assert_eq!(&text, &n.to_string());
        prop_assert_eq!(string_to_number(&text), n as f64);
    }
}

#[test]
fn test_number_edge_cases() {
    let zero = Value::number(0.0);
    let negative_zero = Value::number(-0.0);
    assert!(zero.strict_equals(&negative_zero));
    assert!(!zero.same_value(&negative_zero));
    assert!(zero.same_value_zero(&negative_zero));

    let nan = Value::nan();
    assert!(!nan.strict_equals(&nan));
    assert!(nan.same_value(&nan));
}

#[test]
fn test_negative_zero_is_boxed_not_tagged() {
    let _ctx = Context::new();
    let encoded = EncodedValue::new(Value::number(-0.0));
    assert!(!encoded.is_smi());
    assert!(encoded.to_value().as_number().is_some_and(|n| n == 0.0 && n.is_sign_negative()));
}

#[test]
fn test_small_integers_stay_immediate() {
    let encoded = EncodedSmallValue::new(Value::int32((1 << 30) - 1));
    assert_eq!(encoded.as_smi(), Some((1 << 30) - 1));
    let encoded = EncodedValue::new(Value::int32(-(1 << 30)));
    assert_eq!(encoded.as_smi(), Some(-(1 << 30)));
}

#[test]
fn test_assign_reuses_number_box() {
    let _ctx = Context::new();
    let mut slot = EncodedValue::new(Value::number(1.5));
    let before = slot.to_bits();
    slot.assign(Value::number(2.5));
    assert_eq!(slot.to_bits(), before);
    assert_eq!(slot.to_value().as_number(), Some(2.5));
    slot.assign(Value::int32(3));
    assert!(slot.is_smi());
}

#[test]
fn test_number_formatting() {
    assert_eq!(number_to_string(0.1), "0.1");
    assert_eq!(number_to_string(-0.0), "0");
    assert_eq!(number_to_string(1e21), "1e+21");
    assert_eq!(number_to_string(f64::NEG_INFINITY), "-Infinity");
    assert_eq!(string_to_number("0x10"), 16.0);
    assert!(string_to_number("12px").is_nan());
    assert_eq!(string_to_number(" \n"), 0.0);
}

#[test]
fn test_type_of() {
    let mut ctx = Context::new();
    let s = Value::string(ctx.intern("x"));
    let f = ctx.new_function("f", 0, |_, _, _| Ok(Value::undefined())).unwrap();
    assert_eq!(Value::undefined().type_of(), "undefined");
    assert_eq!(Value::null().type_of(), "object");
    assert_eq!(s.type_of(), "string");
    assert_eq!(Value::object(f).type_of(), "function");
    assert_eq!(Value::object(ctx.new_plain_object()).type_of(), "object");
}
