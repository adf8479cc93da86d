//! Array tests
//!
//! Fast-mode invariants, the transitions into general mode, `length`
//! semantics and sorting.

use conch_core::array::{self, set_array_length};
use conch_core::{Context, ObjectRef, PropertyAttributes, PropertyDescriptor, PropertyName, Value};

fn int_array(ctx: &mut Context, values: &[i32]) -> ObjectRef {
    let values: Vec<Value> = values.iter().copied().map(Value::int32).collect();
    ctx.new_array_from(&values).unwrap()
}

fn length_of(array: ObjectRef) -> u32 {
    array.borrow().as_array().map_or(0, |a| a.length())
}

fn elements(ctx: &mut Context, array: ObjectRef) -> Vec<Option<i32>> {
    (0..length_of(array))
        .map(|i| {
            let value = array.get_property(ctx, &PropertyName::Index(i)).unwrap();
            value.as_int32()
        })
        .collect()
}

#[test]
fn test_new_arrays_start_in_fast_mode() {
    let mut ctx = Context::new();
    let array = int_array(&mut ctx, &[1, 2, 3]);
    assert!(array.is_fast_mode_array());
    assert_eq!(length_of(array), 3);
    assert_eq!(elements(&mut ctx, array), [Some(1), Some(2), Some(3)]);
    let length = array.get_str(&mut ctx, "length").unwrap();
    assert_eq!(length.as_number(), Some(3.0));
}

#[test]
fn test_holes_are_absent_properties() {
    let mut ctx = Context::new();
    let array = ctx.new_array(4);
    assert!(array.is_fast_mode_array());
    assert!(!array.has_own_property(&PropertyName::Index(2)));
    array.set_property(&mut ctx, &PropertyName::Index(2), Value::int32(9)).unwrap();
    assert!(array.has_own_property(&PropertyName::Index(2)));
    assert_eq!(elements(&mut ctx, array), [None, None, Some(9), None]);

    let keys = array.own_property_keys();
    assert_eq!(keys[0].as_index(), Some(2));
    assert!(keys[1].matches_str("length"));
}

#[test]
fn test_cached_indices_survive_collection() {
    let mut ctx = Context::new();
    let array = ctx.new_array(6);
    let _root = ctx.root(Value::object(array));
    for index in [1, 4] {
        array.set_property(&mut ctx, &PropertyName::Index(index), Value::int32(index as i32)).unwrap();
    }
    let before: Vec<Option<u32>> = array.own_property_keys().iter().map(PropertyName::as_index).collect();
    assert_eq!(before, [Some(1), Some(4), None]);

    for _ in 0..50 {
        ctx.new_array(4);
    }
    ctx.collect_garbage();
    let after: Vec<Option<u32>> = array.own_property_keys().iter().map(PropertyName::as_index).collect();
    assert_eq!(after, before);

    assert!(array.delete_own_property(&PropertyName::Index(1)));
    assert_eq!(array.own_property_keys()[0].as_index(), Some(4));
}

#[test]
fn test_many_pushes_reallocate_geometrically() {
    let mut ctx = Context::new();
    let array = ctx.new_array(0);
    for i in 0..100_000 {
        array::push(&mut ctx, array, Value::int32(i)).unwrap();
    }
    assert!(array.is_fast_mode_array());
    assert_eq!(length_of(array), 100_000);
    let reallocations = array.borrow().as_array().map_or(0, |a| a.reallocation_count());
    assert!(reallocations < 40, "{reallocations} reallocations");
    assert_eq!(
        array.get_property(&mut ctx, &PropertyName::Index(99_999)).unwrap().as_int32(),
        Some(99_999)
    );
}

#[test]
fn test_sparse_write_leaves_fast_mode() {
    let mut ctx = Context::new();
    let array = int_array(&mut ctx, &[1]);
    array
        .set_property(&mut ctx, &PropertyName::Index(1_000_000), Value::int32(2))
        .unwrap();
    assert!(!array.is_fast_mode_array());
    assert_eq!(length_of(array), 1_000_001);
    assert_eq!(
        array.get_property(&mut ctx, &PropertyName::Index(0)).unwrap().as_int32(),
        Some(1)
    );
}

#[test]
fn test_non_default_element_descriptor_leaves_fast_mode() {
    let mut ctx = Context::new();
    let array = int_array(&mut ctx, &[1, 2]);
    let frozen = PropertyDescriptor::data(Value::int32(5), PropertyAttributes::frozen());
    array
        .define_property_or_throw(&mut ctx, &PropertyName::Index(0), frozen)
        .unwrap();
    assert!(!array.is_fast_mode_array());
    assert_eq!(elements(&mut ctx, array), [Some(5), Some(2)]);
    assert!(!array.delete_own_property(&PropertyName::Index(0)));
}

#[test]
fn test_truncating_length_deletes_elements() {
    let mut ctx = Context::new();
    let array = int_array(&mut ctx, &[1, 2, 3, 4]);
    array.set_str(&mut ctx, "length", Value::int32(2)).unwrap();
    assert_eq!(elements(&mut ctx, array), [Some(1), Some(2)]);
    array.set_str(&mut ctx, "length", Value::int32(4)).unwrap();
    assert_eq!(elements(&mut ctx, array), [Some(1), Some(2), None, None]);
}

#[test]
fn test_truncation_stops_at_non_configurable_element() {
    let mut ctx = Context::new();
    let array = int_array(&mut ctx, &[0, 1, 2, 3, 4]);
    let pinned = PropertyDescriptor::data(Value::int32(1), PropertyAttributes::frozen());
    array
        .define_property_or_throw(&mut ctx, &PropertyName::Index(1), pinned)
        .unwrap();

    assert!(!set_array_length(&mut ctx, array, 0));
    assert_eq!(length_of(array), 2);
    assert_eq!(elements(&mut ctx, array), [Some(0), Some(1)]);
}

#[test]
fn test_invalid_length_is_range_error() {
    let mut ctx = Context::new();
    let array = ctx.new_array(0);
    let error = array.set_str(&mut ctx, "length", Value::number(1.5)).unwrap_err();
    assert!(error.is_range_error());
    let error = array.set_str(&mut ctx, "length", Value::number(-1.0)).unwrap_err();
    assert!(error.is_range_error());
}

#[test]
fn test_read_only_length_blocks_growth() {
    let mut ctx = Context::new();
    let array = int_array(&mut ctx, &[1, 2]);
    let length = ctx.name("length");
    let read_only = PropertyDescriptor::default().with_writable(false);
    array.define_property_or_throw(&mut ctx, &length, read_only).unwrap();

    assert!(!array.is_fast_mode_array());
    assert!(array.set_str(&mut ctx, "length", Value::int32(0)).is_err());
    assert!(!array.create_data_property(&mut ctx, &PropertyName::Index(2), Value::null()).unwrap());
    assert!(array::push(&mut ctx, array, Value::null()).is_err());
    array.set_property(&mut ctx, &PropertyName::Index(0), Value::int32(7)).unwrap();
    assert_eq!(elements(&mut ctx, array), [Some(7), Some(2)]);
}

#[test]
fn test_prevent_extensions_converts_and_blocks() {
    let mut ctx = Context::new();
    let array = int_array(&mut ctx, &[1]);
    assert!(array.prevent_extensions());
    assert!(!array.is_fast_mode_array());
    assert!(array::push(&mut ctx, array, Value::int32(2)).is_err());
    assert_eq!(length_of(array), 1);
}

#[test]
fn test_prototype_index_property_disables_fast_mode() {
    let mut ctx = Context::new();
    let before = int_array(&mut ctx, &[1, 2]);
    let spread = ctx.new_spread_array(&[Value::int32(1)]).unwrap();
    assert!(!ctx.some_prototype_has_index_property());

    let prototype = ctx.new_plain_object();
    let child = ctx.new_plain_object();
    child.set_prototype_of(&mut ctx, Some(prototype));
    prototype
        .set_property(&mut ctx, &PropertyName::Index(5), Value::int32(50))
        .unwrap();

    assert!(ctx.some_prototype_has_index_property());
    assert!(!before.is_fast_mode_array());
    assert!(spread.is_fast_mode_array());
    assert!(!ctx.new_array(3).is_fast_mode_array());
}

#[test]
fn test_holes_read_through_array_prototype() {
    let mut ctx = Context::new();
    let array = ctx.new_array(3);
    let array_prototype = ctx.intrinsics().array_prototype;
    array_prototype
        .set_property(&mut ctx, &PropertyName::Index(1), Value::int32(11))
        .unwrap();
    assert!(!array.is_fast_mode_array());
    assert_eq!(
        array.get_property(&mut ctx, &PropertyName::Index(1)).unwrap().as_int32(),
        Some(11)
    );
}

#[test]
fn test_sort_default_order_is_string_order() {
    let mut ctx = Context::new();
    let array = int_array(&mut ctx, &[10, 9, 1, 100]);
    array::sort(&mut ctx, array, None).unwrap();
    assert_eq!(elements(&mut ctx, array), [Some(1), Some(10), Some(100), Some(9)]);
}

#[test]
fn test_sort_with_comparator_is_stable_and_moves_holes_last() {
    let mut ctx = Context::new();
    let array = ctx.new_array(6);
    for (index, value) in [(0, 31), (1, 12), (3, 21), (4, 11)] {
        array
            .set_property(&mut ctx, &PropertyName::Index(index), Value::int32(value))
            .unwrap();
    }
    array
        .set_property(&mut ctx, &PropertyName::Index(5), Value::undefined())
        .unwrap();
    // Compare by tens digit only
    let by_tens = ctx
        .new_function("byTens", 2, |ctx, _, args| {
            let a = ctx.to_number(args[0])?;
            let b = ctx.to_number(args[1])?;
            Ok(Value::number((a / 10.0).floor() - (b / 10.0).floor()))
        })
        .unwrap();
    array::sort(&mut ctx, array, Some(Value::object(by_tens))).unwrap();

    assert_eq!(elements(&mut ctx, array), [Some(12), Some(11), Some(21), Some(31), None, None]);
    assert!(array.has_own_property(&PropertyName::Index(4)));
    assert!(!array.has_own_property(&PropertyName::Index(5)));
}

#[test]
fn test_sort_comparator_error_propagates() {
    let mut ctx = Context::new();
    let array = int_array(&mut ctx, &[2, 1]);
    let throws = ctx
        .new_function("throws", 2, |ctx, _, _| Err(ctx.throw_type_error("nope")))
        .unwrap();
    let error = array::sort(&mut ctx, array, Some(Value::object(throws))).unwrap_err();
    assert!(error.is_type_error());
    let not_callable = array::sort(&mut ctx, array, Some(Value::int32(1))).unwrap_err();
    assert!(not_callable.is_type_error());
}

#[test]
fn test_join_and_to_string() {
    let mut ctx = Context::new();
    let array = int_array(&mut ctx, &[1, 2, 3]);
    let text = ctx.to_js_string(Value::object(array)).unwrap();
    assert_eq!(text.as_str(), "1,2,3");
}

#[test]
fn test_iterate_arrays_visits_live_arrays() {
    let mut ctx = Context::new();
    let kept = int_array(&mut ctx, &[1]);
    let _root = ctx.root(Value::object(kept));
    for _ in 0..10 {
        ctx.new_array(1);
    }
    let mut seen = Vec::new();
    let visited = ctx.iterate_arrays(|array| seen.push(array));
    assert_eq!(visited, seen.len());
    assert!(seen.contains(&kept));
    // Array.prototype plus the rooted array
    assert_eq!(visited, 2);
}
