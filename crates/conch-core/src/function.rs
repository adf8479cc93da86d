//! Native functions and the builtin methods the conversion algorithms rely on
//!
//! Every callable object is backed by a Rust closure. Closures are not
//! traced: one that needs a heap value must read it from a property of an
//! object reachable from its arguments or the context, never capture it.

use std::fmt;
use std::rc::Rc;

use smallvec::SmallVec;

use crate::context::Context;
use crate::error::VmResult;
use crate::finalization_registry;
use crate::number::number_to_string;
use crate::object::{ObjectData, ObjectRef};
use crate::property_descriptor::{PropertyAttributes, PropertyDescriptor};
use crate::value::Value;
use crate::weak_ref;

/// Native function handler: `(context, this, arguments) -> completion`
pub type NativeFn = Rc<dyn Fn(&mut Context, Value, &[Value]) -> VmResult<Value>>;

/// Argument list sized for the common small arities
pub type Arguments = SmallVec<[Value; 4]>;

/// The callable part of a function object
#[derive(Clone)]
pub struct NativeFunction {
    /// Function name, used for stack frames
    pub name: String,
    /// Declared arity
    pub length: u32,
    /// Handler
    pub func: NativeFn,
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFunction")
            .field("name", &self.name)
            .field("length", &self.length)
            .finish()
    }
}

/// Argument `index`, or `undefined` when absent
#[inline]
pub fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).copied().unwrap_or_default()
}

/// Define `length` and `name` on a fresh function object, in that order.
pub(crate) fn init_function_properties(ctx: &mut Context, function: ObjectRef, name: &str, length: u32) -> VmResult<()> {
    let attributes = PropertyAttributes {
        writable: false,
        enumerable: false,
        configurable: true,
    };
    let length_key = ctx.name("length");
    function.define_property_or_throw(
        ctx,
        &length_key,
        PropertyDescriptor::data(Value::number(f64::from(length)), attributes),
    )?;
    let name_key = ctx.name("name");
    let name_value = Value::string(ctx.intern(name));
    function.define_property_or_throw(ctx, &name_key, PropertyDescriptor::data(name_value, attributes))
}

/// Install a non-enumerable method on `target`.
pub fn define_builtin_method(
    ctx: &mut Context,
    target: ObjectRef,
    name: &str,
    length: u32,
    func: impl Fn(&mut Context, Value, &[Value]) -> VmResult<Value> + 'static,
) -> VmResult<ObjectRef> {
    let function = ctx.new_function(name, length, func)?;
    let key = ctx.name(name);
    target.define_property_or_throw(
        ctx,
        &key,
        PropertyDescriptor::data(Value::object(function), PropertyAttributes::builtin_method()),
    )?;
    Ok(function)
}

fn define_value(ctx: &mut Context, target: ObjectRef, name: &str, value: Value) -> VmResult<()> {
    let key = ctx.name(name);
    target.define_property_or_throw(ctx, &key, PropertyDescriptor::data(value, PropertyAttributes::builtin_method()))
}

fn define_to_string_tag(ctx: &mut Context, target: ObjectRef, tag: &str) -> VmResult<()> {
    let key = crate::property_name::PropertyName::from_symbol(ctx.symbols().to_string_tag);
    let value = Value::string(ctx.intern(tag));
    let attributes = PropertyAttributes {
        writable: false,
        enumerable: false,
        configurable: true,
    };
    target.define_property_or_throw(ctx, &key, PropertyDescriptor::data(value, attributes))
}

// ============================================================================
// Builtins
// ============================================================================

/// Populate the intrinsic prototypes.
pub(crate) fn install_builtins(ctx: &mut Context) -> VmResult<()> {
    let intrinsics = ctx.intrinsics();

    let object_prototype = intrinsics.object_prototype;
    define_builtin_method(ctx, object_prototype, "valueOf", 0, |ctx, this, _| {
        Ok(Value::object(ctx.to_object(this)?))
    })?;
    define_builtin_method(ctx, object_prototype, "toString", 0, object_to_string)?;
    define_builtin_method(ctx, object_prototype, "hasOwnProperty", 1, |ctx, this, args| {
        let key = ctx.to_property_key(arg(args, 0))?;
        let object = ctx.to_object(this)?;
        Ok(Value::boolean(object.has_own_property(&key)))
    })?;

    let array_prototype = intrinsics.array_prototype;
    define_builtin_method(ctx, array_prototype, "join", 1, array_join)?;
    define_builtin_method(ctx, array_prototype, "toString", 0, |ctx, this, _| {
        let object = ctx.to_object(this)?;
        let join = object.get_str(ctx, "join")?;
        if join.is_callable() {
            ctx.call(join, Value::object(object), &[])
        } else {
            object_to_string(ctx, Value::object(object), &[])
        }
    })?;
    define_builtin_method(ctx, array_prototype, "push", 1, |ctx, this, args| {
        let object = ctx.to_object(this)?;
        let mut length = ctx.length_of_array_like(object)?;
        for value in args {
            let key = ctx.index_key(length);
            object.set_property(ctx, &key, *value)?;
            length += 1;
        }
        let length_key = ctx.name("length");
        let length = Value::number(length as f64);
        object.set_property(ctx, &length_key, length)?;
        Ok(length)
    })?;
    define_builtin_method(ctx, array_prototype, "sort", 1, |ctx, this, args| {
        let object = ctx.to_object(this)?;
        crate::array::sort(ctx, object, Some(arg(args, 0)))?;
        Ok(Value::object(object))
    })?;

    define_builtin_method(ctx, intrinsics.boolean_prototype, "valueOf", 0, |ctx, this, _| {
        this_primitive(ctx, this, Value::is_boolean, "Boolean")
    })?;
    define_builtin_method(ctx, intrinsics.boolean_prototype, "toString", 0, |ctx, this, _| {
        let b = this_primitive(ctx, this, Value::is_boolean, "Boolean")?;
        let text = if b.to_boolean() { "true" } else { "false" };
        Ok(Value::string(ctx.intern(text)))
    })?;

    define_builtin_method(ctx, intrinsics.number_prototype, "valueOf", 0, |ctx, this, _| {
        this_primitive(ctx, this, Value::is_number, "Number")
    })?;
    define_builtin_method(ctx, intrinsics.number_prototype, "toString", 1, |ctx, this, _| {
        let n = this_primitive(ctx, this, Value::is_number, "Number")?;
        let text = number_to_string(n.as_number().unwrap_or(f64::NAN));
        Ok(Value::string(ctx.new_string(&text)))
    })?;

    define_builtin_method(ctx, intrinsics.string_prototype, "valueOf", 0, |ctx, this, _| {
        this_primitive(ctx, this, Value::is_string, "String")
    })?;
    define_builtin_method(ctx, intrinsics.string_prototype, "toString", 0, |ctx, this, _| {
        this_primitive(ctx, this, Value::is_string, "String")
    })?;

    define_builtin_method(ctx, intrinsics.symbol_prototype, "valueOf", 0, |ctx, this, _| {
        this_primitive(ctx, this, Value::is_symbol, "Symbol")
    })?;
    define_builtin_method(ctx, intrinsics.symbol_prototype, "toString", 0, |ctx, this, _| {
        let symbol = this_primitive(ctx, this, Value::is_symbol, "Symbol")?;
        let text = symbol.as_symbol().map(|s| s.descriptive_string()).unwrap_or_default();
        Ok(Value::string(ctx.new_string(&text)))
    })?;

    let error_prototype = intrinsics.error_prototype;
    define_builtin_method(ctx, error_prototype, "toString", 0, error_to_string)?;
    for (prototype, name) in [
        (error_prototype, "Error"),
        (intrinsics.type_error_prototype, "TypeError"),
        (intrinsics.range_error_prototype, "RangeError"),
    ] {
        let name = Value::string(ctx.intern(name));
        define_value(ctx, prototype, "name", name)?;
        let empty = Value::string(ctx.intern(""));
        define_value(ctx, prototype, "message", empty)?;
    }

    let weak_ref_prototype = intrinsics.weak_ref_prototype;
    define_builtin_method(ctx, weak_ref_prototype, "deref", 0, |ctx, this, _| {
        let weak_ref = this_object_of_kind(ctx, this, ObjectRef::is_weak_ref, "WeakRef.prototype.deref")?;
        Ok(weak_ref::deref(ctx, weak_ref).unwrap_or_default())
    })?;
    define_to_string_tag(ctx, weak_ref_prototype, "WeakRef")?;

    let registry_prototype = intrinsics.finalization_registry_prototype;
    define_builtin_method(ctx, registry_prototype, "register", 2, |ctx, this, args| {
        let registry = this_object_of_kind(
            ctx,
            this,
            ObjectRef::is_finalization_registry,
            "FinalizationRegistry.prototype.register",
        )?;
        finalization_registry::register(ctx, registry, arg(args, 0), arg(args, 1), arg(args, 2))?;
        Ok(Value::undefined())
    })?;
    define_builtin_method(ctx, registry_prototype, "unregister", 1, |ctx, this, args| {
        let registry = this_object_of_kind(
            ctx,
            this,
            ObjectRef::is_finalization_registry,
            "FinalizationRegistry.prototype.unregister",
        )?;
        let removed = finalization_registry::unregister(ctx, registry, arg(args, 0))?;
        Ok(Value::boolean(removed))
    })?;
    define_builtin_method(ctx, registry_prototype, "cleanupSome", 0, |ctx, this, args| {
        let registry = this_object_of_kind(
            ctx,
            this,
            ObjectRef::is_finalization_registry,
            "FinalizationRegistry.prototype.cleanupSome",
        )?;
        let callback = arg(args, 0);
        let callback = (!callback.is_undefined()).then_some(callback);
        finalization_registry::cleanup_some(ctx, registry, callback)?;
        Ok(Value::undefined())
    })?;
    define_to_string_tag(ctx, registry_prototype, "FinalizationRegistry")?;
    Ok(())
}

/// thisBooleanValue / thisNumberValue / thisStringValue / thisSymbolValue
fn this_primitive(ctx: &mut Context, this: Value, check: fn(&Value) -> bool, type_name: &str) -> VmResult<Value> {
    if check(&this) {
        return Ok(this);
    }
    if let Some(primitive) = this.as_object().and_then(|o| o.primitive_value())
        && check(&primitive)
    {
        return Ok(primitive);
    }
    Err(ctx.throw_type_error(format!("{type_name}.prototype method called on incompatible receiver")))
}

fn this_object_of_kind(
    ctx: &mut Context,
    this: Value,
    check: fn(&ObjectRef) -> bool,
    method: &str,
) -> VmResult<ObjectRef> {
    match this.as_object() {
        Some(object) if check(&object) => Ok(object),
        _ => Err(ctx.throw_type_error(format!("{method} called on incompatible receiver"))),
    }
}

/// `Object.prototype.toString`
fn object_to_string(ctx: &mut Context, this: Value, _args: &[Value]) -> VmResult<Value> {
    if this.is_undefined() {
        return Ok(Value::string(ctx.intern("[object Undefined]")));
    }
    if this.is_null() {
        return Ok(Value::string(ctx.intern("[object Null]")));
    }
    let object = ctx.to_object(this)?;
    let builtin_tag = if object.is_array() {
        "Array"
    } else if object.is_callable() {
        "Function"
    } else if object.is_error() {
        "Error"
    } else {
        match object.primitive_value() {
            Some(v) if v.is_boolean() => "Boolean",
            Some(v) if v.is_number() => "Number",
            Some(v) if v.is_string() => "String",
            _ => "Object",
        }
    };
    let tag_key = crate::property_name::PropertyName::from_symbol(ctx.symbols().to_string_tag);
    let tag = object.get_property(ctx, &tag_key)?;
    let text = match tag.as_string() {
        Some(tag) => format!("[object {}]", tag.as_str()),
        None => format!("[object {builtin_tag}]"),
    };
    Ok(Value::string(ctx.new_string(&text)))
}

/// `Array.prototype.join`
fn array_join(ctx: &mut Context, this: Value, args: &[Value]) -> VmResult<Value> {
    let object = ctx.to_object(this)?;
    let length = ctx.length_of_array_like(object)?;
    let separator = match arg(args, 0) {
        v if v.is_undefined() => ",".to_string(),
        v => ctx.to_js_string(v)?.as_str().to_string(),
    };
    let mut out = String::new();
    for index in 0..length {
        if index > 0 {
            out.push_str(&separator);
        }
        let key = ctx.index_key(index);
        let element = object.get_property(ctx, &key)?;
        if !element.is_nullish() {
            out.push_str(ctx.to_js_string(element)?.as_str());
        }
    }
    Ok(Value::string(ctx.new_string(&out)))
}

/// `Error.prototype.toString`
fn error_to_string(ctx: &mut Context, this: Value, _args: &[Value]) -> VmResult<Value> {
    let Some(object) = this.as_object() else {
        return Err(ctx.throw_type_error("Error.prototype.toString called on non-object"));
    };
    let name = object.get_str(ctx, "name")?;
    let name = if name.is_undefined() {
        "Error".to_string()
    } else {
        ctx.to_js_string(name)?.as_str().to_string()
    };
    let message = object.get_str(ctx, "message")?;
    let message = if message.is_undefined() {
        String::new()
    } else {
        ctx.to_js_string(message)?.as_str().to_string()
    };
    let text = match (name.is_empty(), message.is_empty()) {
        (true, _) => message,
        (false, true) => name,
        (false, false) => format!("{name}: {message}"),
    };
    Ok(Value::string(ctx.new_string(&text)))
}

impl ObjectRef {
    /// The native function backing this object, if callable
    pub fn native_function(&self) -> Option<NativeFunction> {
        match &self.borrow().data {
            ObjectData::Function(function) => Some(function.clone()),
            _ => None,
        }
    }
}
