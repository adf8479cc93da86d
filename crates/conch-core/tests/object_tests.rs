//! Object model tests
//!
//! Structure sharing, the ordinary internal methods, prototype chains and
//! the ToPrimitive protocol.

use std::rc::Rc;

use conch_core::{Context, PreferredType, PropertyAttributes, PropertyDescriptor, PropertyName, Value};

fn key(ctx: &mut Context, name: &str) -> PropertyName {
    ctx.name(name)
}

#[test]
fn test_same_history_shares_structure() {
    let mut ctx = Context::new();
    let a = ctx.new_plain_object();
    let b = ctx.new_plain_object();
    for object in [a, b] {
        object.set_str(&mut ctx, "x", Value::int32(1)).unwrap();
        object.set_str(&mut ctx, "y", Value::int32(2)).unwrap();
    }
    assert!(Rc::ptr_eq(&a.structure(), &b.structure()));

    let c = ctx.new_plain_object();
    c.set_str(&mut ctx, "y", Value::int32(2)).unwrap();
    c.set_str(&mut ctx, "x", Value::int32(1)).unwrap();
    assert!(!Rc::ptr_eq(&a.structure(), &c.structure()));
}

#[test]
fn test_deletion_leaves_shared_structure() {
    let mut ctx = Context::new();
    let plain = ctx.new_plain_object();
    let deleted = ctx.new_plain_object();
    for object in [plain, deleted] {
        object.set_str(&mut ctx, "x", Value::int32(1)).unwrap();
    }
    deleted.set_str(&mut ctx, "y", Value::int32(2)).unwrap();
    let y = key(&mut ctx, "y");
    assert!(deleted.delete_own_property(&y));

    assert_eq!(plain.own_property_keys().len(), deleted.own_property_keys().len());
    assert!(!Rc::ptr_eq(&plain.structure(), &deleted.structure()));
    assert!(deleted.structure().is_dictionary());
}

#[test]
fn test_define_get_and_delete() {
    let mut ctx = Context::new();
    let object = ctx.new_plain_object();
    let x = key(&mut ctx, "x");
    object.create_data_property_or_throw(&mut ctx, &x, Value::int32(7)).unwrap();
    assert_eq!(object.get_property(&mut ctx, &x).unwrap().as_int32(), Some(7));

    let desc = object.get_own_property(&x).unwrap();
    assert_eq!(desc.writable, Some(true));
    assert_eq!(desc.enumerable, Some(true));
    assert_eq!(desc.configurable, Some(true));

    assert!(object.delete_own_property(&x));
    assert!(!object.has_own_property(&x));
    assert!(object.get_property(&mut ctx, &x).unwrap().is_undefined());
}

#[test]
fn test_non_configurable_property_resists() {
    let mut ctx = Context::new();
    let object = ctx.new_plain_object();
    let x = key(&mut ctx, "x");
    object
        .define_property_or_throw(&mut ctx, &x, PropertyDescriptor::data(Value::int32(1), PropertyAttributes::frozen()))
        .unwrap();

    assert!(!object.delete_own_property(&x));
    assert!(object.delete_property_or_throw(&mut ctx, &x).unwrap_err().is_type_error());
    assert!(!object.set(&mut ctx, &x, Value::int32(2), Value::object(object)).unwrap());
    let redefine = PropertyDescriptor::default().with_enumerable(true);
    assert!(!object.define_own_property(&mut ctx, &x, redefine).unwrap());
    // Same value is always compatible
    let same = PropertyDescriptor::default().with_value(Value::int32(1));
    assert!(object.define_own_property(&mut ctx, &x, same).unwrap());
}

#[test]
fn test_non_extensible_rejects_new_properties() {
    let mut ctx = Context::new();
    let object = ctx.new_plain_object();
    object.set_str(&mut ctx, "kept", Value::boolean(true)).unwrap();
    assert!(object.prevent_extensions());
    assert!(!object.is_extensible());

    let added = key(&mut ctx, "added");
    assert!(!object.create_data_property(&mut ctx, &added, Value::null()).unwrap());
    assert!(object.set_str(&mut ctx, "added", Value::null()).is_err());
    object.set_str(&mut ctx, "kept", Value::boolean(false)).unwrap();
    assert_eq!(object.get_str(&mut ctx, "kept").unwrap().as_boolean(), Some(false));
}

#[test]
fn test_prototype_chain_lookup_and_shadowing() {
    let mut ctx = Context::new();
    let parent = ctx.new_plain_object();
    parent.set_str(&mut ctx, "inherited", Value::int32(1)).unwrap();
    let child = ctx.new_plain_object();
    assert!(child.set_prototype_of(&mut ctx, Some(parent)));
    assert!(parent.is_prototype_object());

    assert_eq!(child.get_str(&mut ctx, "inherited").unwrap().as_int32(), Some(1));
    child.set_str(&mut ctx, "inherited", Value::int32(2)).unwrap();
    assert_eq!(child.get_str(&mut ctx, "inherited").unwrap().as_int32(), Some(2));
    assert_eq!(parent.get_str(&mut ctx, "inherited").unwrap().as_int32(), Some(1));
}

#[test]
fn test_prototype_cycles_are_rejected() {
    let mut ctx = Context::new();
    let a = ctx.new_plain_object();
    let b = ctx.new_plain_object();
    assert!(b.set_prototype_of(&mut ctx, Some(a)));
    assert!(!a.set_prototype_of(&mut ctx, Some(b)));
    assert!(!a.set_prototype_of(&mut ctx, Some(a)));
}

#[test]
fn test_own_property_keys_order() {
    let mut ctx = Context::new();
    let object = ctx.new_plain_object();
    let symbol = ctx.new_symbol(Some("s"));
    object.set_property(&mut ctx, &PropertyName::from_symbol(symbol), Value::null()).unwrap();
    object.set_str(&mut ctx, "b", Value::null()).unwrap();
    object.set_str(&mut ctx, "10", Value::null()).unwrap();
    object.set_str(&mut ctx, "a", Value::null()).unwrap();
    object.set_str(&mut ctx, "2", Value::null()).unwrap();

    let keys = object.own_property_keys();
    assert_eq!(keys.len(), 5);
    assert_eq!(keys[0].as_index(), Some(2));
    assert_eq!(keys[1].as_index(), Some(10));
    assert!(keys[2].matches_str("b"));
    assert!(keys[3].matches_str("a"));
    assert!(keys[4].is_symbol());
}

#[test]
fn test_accessor_property_calls_getter_and_setter() {
    let mut ctx = Context::new();
    let object = ctx.new_plain_object();
    let getter = ctx
        .new_function("get", 0, |ctx, this, _| {
            let object = ctx.to_object(this)?;
            object.get_str(ctx, "_x")
        })
        .unwrap();
    let setter = ctx
        .new_function("set", 1, |ctx, this, args| {
            let object = ctx.to_object(this)?;
            object.set_str(ctx, "_x", args[0])?;
            Ok(Value::undefined())
        })
        .unwrap();
    let x = key(&mut ctx, "x");
    object
        .define_property_or_throw(&mut ctx, &x, PropertyDescriptor::accessor(Some(getter), Some(setter), true, true))
        .unwrap();

    object.set_str(&mut ctx, "x", Value::int32(41)).unwrap();
    assert_eq!(object.get_str(&mut ctx, "_x").unwrap().as_int32(), Some(41));
    assert_eq!(object.get_str(&mut ctx, "x").unwrap().as_int32(), Some(41));
    assert!(object.get_own_property(&x).unwrap().is_accessor_descriptor());
}

#[test]
fn test_string_wrapper_exposes_code_units() {
    let mut ctx = Context::new();
    let text = Value::string(ctx.intern("abc"));
    let wrapper = ctx.to_object(text).unwrap();
    let second = wrapper.get_property(&mut ctx, &PropertyName::Index(1)).unwrap();
    assert_eq!(second.as_string().map(|s| s.as_str().to_string()), Some("b".to_string()));
    assert_eq!(wrapper.get_str(&mut ctx, "length").unwrap().as_number(), Some(3.0));
    assert!(!wrapper.delete_own_property(&PropertyName::Index(0)));
    assert!(wrapper.get_property(&mut ctx, &PropertyName::Index(3)).unwrap().is_undefined());
}

#[test]
fn test_to_primitive_hook() {
    let mut ctx = Context::new();
    let object = ctx.new_plain_object();
    let hook = ctx
        .new_function("[Symbol.toPrimitive]", 1, |ctx, _, args| {
            let hint = ctx.to_js_string(args[0])?;
            Ok(Value::string(hint))
        })
        .unwrap();
    let to_primitive = PropertyName::from_symbol(ctx.symbols().to_primitive);
    object.set_property(&mut ctx, &to_primitive, Value::object(hook)).unwrap();

    let result = ctx.to_primitive(Value::object(object), PreferredType::Number).unwrap();
    assert_eq!(result.as_string().map(|s| s.as_str().to_string()), Some("number".to_string()));
    let text = ctx.to_js_string(Value::object(object)).unwrap();
    assert_eq!(text.as_str(), "string");
}

#[test]
fn test_to_primitive_hook_returning_object_throws() {
    let mut ctx = Context::new();
    let object = ctx.new_plain_object();
    let hook = ctx
        .new_function("hook", 1, |ctx, _, _| Ok(Value::object(ctx.new_plain_object())))
        .unwrap();
    let to_primitive = PropertyName::from_symbol(ctx.symbols().to_primitive);
    object.set_property(&mut ctx, &to_primitive, Value::object(hook)).unwrap();
    let error = ctx.to_number(Value::object(object)).unwrap_err();
    assert!(error.is_type_error());
}

#[test]
fn test_plain_object_to_string() {
    let mut ctx = Context::new();
    let object = ctx.new_plain_object();
    let text = ctx.to_js_string(Value::object(object)).unwrap();
    assert_eq!(text.as_str(), "[object Object]");
}

#[test]
fn test_thrown_errors_are_error_objects() {
    let mut ctx = Context::new();
    let error = ctx.throw_type_error("bad thing");
    assert_eq!(error.to_string(), "Uncaught exception: TypeError: bad thing");
    let thrown = error.thrown_value().and_then(|v| v.as_object()).unwrap();
    assert!(thrown.is_error());
    let text = ctx.to_js_string(Value::object(thrown)).unwrap();
    assert_eq!(text.as_str(), "TypeError: bad thing");
}

#[test]
fn test_enumerate_skips_shadowed_and_non_enumerable() {
    let mut ctx = Context::new();
    let parent = ctx.new_plain_object();
    parent.set_str(&mut ctx, "shared", Value::int32(1)).unwrap();
    parent.set_str(&mut ctx, "parent_only", Value::int32(1)).unwrap();
    let child = ctx.new_plain_object();
    child.set_prototype_of(&mut ctx, Some(parent));
    child.set_str(&mut ctx, "shared", Value::int32(2)).unwrap();
    let hidden = key(&mut ctx, "hidden");
    child
        .define_property_or_throw(&mut ctx, &hidden, PropertyDescriptor::data(Value::null(), PropertyAttributes::frozen()))
        .unwrap();

    let names: Vec<String> = child.enumerate().iter().map(PropertyName::describe).collect();
    assert_eq!(names, ["shared", "parent_only"]);
}

#[test]
fn test_abstract_equality_through_value_of() {
    let mut ctx = Context::new();
    let object = ctx.new_plain_object();
    let value_of = ctx.new_function("valueOf", 0, |_, _, _| Ok(Value::int32(3))).unwrap();
    object.set_str(&mut ctx, "valueOf", Value::object(value_of)).unwrap();
    let three = Value::string(ctx.intern("3"));
    assert!(ctx.abstract_equals(Value::object(object), three).unwrap());
    assert!(ctx.abstract_equals(Value::object(object), Value::int32(3)).unwrap());
    assert!(!ctx.abstract_equals(Value::object(object), Value::null()).unwrap());
}
