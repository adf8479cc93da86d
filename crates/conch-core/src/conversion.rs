//! Abstract type conversions
//!
//! ToPrimitive and the conversions built on it. Every conversion that may
//! reach an object can run user code through `@@toPrimitive`, `valueOf` or
//! `toString`, so they all take the context and return a [`VmResult`].

use conch_gc::GcPtr;

use crate::array::ArrayData;
use crate::context::Context;
use crate::error::VmResult;
use crate::number::{self, number_to_string, string_to_number};
use crate::object::ObjectRef;
use crate::property_name::PropertyName;
use crate::string::JsString;
use crate::value::{PreferredType, Value};

impl Context {
    /// ToPrimitive
    pub fn to_primitive(&mut self, value: Value, hint: PreferredType) -> VmResult<Value> {
        let Some(object) = value.as_object() else {
            return Ok(value);
        };
        let key = PropertyName::from_symbol(self.symbols().to_primitive);
        let exotic = object.get(self, &key, value)?;
        if !exotic.is_nullish() {
            if !exotic.is_callable() {
                return Err(self.throw_type_error("Symbol.toPrimitive is not a function"));
            }
            let hint = Value::string(self.intern(hint.as_str()));
            let result = self.call(exotic, value, &[hint])?;
            if result.is_object() {
                return Err(self.throw_type_error("Cannot convert object to primitive value"));
            }
            return Ok(result);
        }
        let hint = match hint {
            PreferredType::String => PreferredType::String,
            PreferredType::Default | PreferredType::Number => PreferredType::Number,
        };
        self.ordinary_to_primitive(object, hint)
    }

    /// OrdinaryToPrimitive: `valueOf` then `toString`, reversed for a
    /// string hint
    pub fn ordinary_to_primitive(&mut self, object: ObjectRef, hint: PreferredType) -> VmResult<Value> {
        let names = self.names();
        let order = match hint {
            PreferredType::String => [names.to_string, names.value_of],
            _ => [names.value_of, names.to_string],
        };
        let receiver = Value::object(object);
        for name in order {
            let method = object.get(self, &PropertyName::Atomic(name), receiver)?;
            if method.is_callable() {
                let result = self.call(method, receiver, &[])?;
                if !result.is_object() {
                    return Ok(result);
                }
            }
        }
        Err(self.throw_type_error("Cannot convert object to primitive value"))
    }

    /// ToNumber
    pub fn to_number(&mut self, value: Value) -> VmResult<f64> {
        if let Some(n) = value.as_number() {
            return Ok(n);
        }
        if value.is_undefined() {
            return Ok(f64::NAN);
        }
        if value.is_null() {
            return Ok(0.0);
        }
        if let Some(b) = value.as_boolean() {
            return Ok(if b { 1.0 } else { 0.0 });
        }
        if let Some(s) = value.as_string() {
            return Ok(string_to_number(s.as_str()));
        }
        if value.is_symbol() {
            return Err(self.throw_type_error("Cannot convert a Symbol value to a number"));
        }
        let primitive = self.to_primitive(value, PreferredType::Number)?;
        self.to_number(primitive)
    }

    /// ToString
    pub fn to_js_string(&mut self, value: Value) -> VmResult<GcPtr<JsString>> {
        if let Some(s) = value.as_string() {
            return Ok(s);
        }
        if let Some(n) = value.as_int32() {
            let mut buffer = itoa::Buffer::new();
            return Ok(self.new_string(buffer.format(n)));
        }
        if let Some(n) = value.as_number() {
            return Ok(self.new_string(&number_to_string(n)));
        }
        if value.is_undefined() {
            return Ok(self.intern("undefined"));
        }
        if value.is_null() {
            return Ok(self.intern("null"));
        }
        if let Some(b) = value.as_boolean() {
            return Ok(self.intern(if b { "true" } else { "false" }));
        }
        if value.is_symbol() {
            return Err(self.throw_type_error("Cannot convert a Symbol value to a string"));
        }
        let primitive = self.to_primitive(value, PreferredType::String)?;
        self.to_js_string(primitive)
    }

    /// ToObject
    pub fn to_object(&mut self, value: Value) -> VmResult<ObjectRef> {
        if let Some(object) = value.as_object() {
            return Ok(object);
        }
        if value.is_nullish() {
            return Err(self.throw_type_error("Cannot convert undefined or null to object"));
        }
        Ok(self.wrap_primitive(value))
    }

    /// ToPropertyKey
    pub fn to_property_key(&mut self, value: Value) -> VmResult<PropertyName> {
        if let Some(n) = value.as_int32()
            && n >= 0
        {
            return Ok(PropertyName::Index(n as u32));
        }
        let key = self.to_primitive(value, PreferredType::String)?;
        if let Some(symbol) = key.as_symbol() {
            return Ok(PropertyName::from_symbol(symbol));
        }
        let string = self.to_js_string(key)?;
        Ok(PropertyName::from_string(string))
    }

    /// ToInt32
    pub fn to_int32(&mut self, value: Value) -> VmResult<i32> {
        if let Some(n) = value.as_int32() {
            return Ok(n);
        }
        Ok(number::to_int32(self.to_number(value)?))
    }

    /// ToUint32
    pub fn to_uint32(&mut self, value: Value) -> VmResult<u32> {
        Ok(number::to_uint32(self.to_number(value)?))
    }

    /// ToIntegerOrInfinity
    pub fn to_integer_or_infinity(&mut self, value: Value) -> VmResult<f64> {
        Ok(number::to_integer_or_infinity(self.to_number(value)?))
    }

    /// ToLength
    pub fn to_length(&mut self, value: Value) -> VmResult<u64> {
        Ok(number::to_length(self.to_number(value)?))
    }

    /// The array index `value` names as a property key, if any
    pub fn to_array_index(&mut self, value: Value) -> VmResult<Option<u32>> {
        Ok(self.to_property_key(value)?.as_index())
    }

    /// LengthOfArrayLike. Arrays answer from their tracked length without
    /// a property lookup.
    pub fn length_of_array_like(&mut self, object: ObjectRef) -> VmResult<u64> {
        if let Some(length) = object.borrow().as_array().map(ArrayData::length) {
            return Ok(u64::from(length));
        }
        let key = PropertyName::Atomic(self.names().length);
        let length = object.get(self, &key, Value::object(object))?;
        self.to_length(length)
    }

    /// IsLooselyEqual (`==`)
    pub fn abstract_equals(&mut self, lhs: Value, rhs: Value) -> VmResult<bool> {
        let (mut x, mut y) = (lhs, rhs);
        loop {
            if same_type(&x, &y) {
                return Ok(x.strict_equals(&y));
            }
            if x.is_nullish() && y.is_nullish() {
                return Ok(true);
            }
            if x.is_number() && y.is_string() {
                y = Value::number(self.to_number(y)?);
            } else if x.is_string() && y.is_number() {
                x = Value::number(self.to_number(x)?);
            } else if x.is_boolean() {
                x = Value::number(self.to_number(x)?);
            } else if y.is_boolean() {
                y = Value::number(self.to_number(y)?);
            } else if x.is_object() && is_equality_primitive(&y) {
                x = self.to_primitive(x, PreferredType::Default)?;
            } else if y.is_object() && is_equality_primitive(&x) {
                y = self.to_primitive(y, PreferredType::Default)?;
            } else {
                return Ok(false);
            }
        }
    }
}

fn same_type(a: &Value, b: &Value) -> bool {
    (a.is_undefined() && b.is_undefined())
        || (a.is_null() && b.is_null())
        || (a.is_number() && b.is_number())
        || (a.is_boolean() && b.is_boolean())
        || (a.is_string() && b.is_string())
        || (a.is_symbol() && b.is_symbol())
        || (a.is_object() && b.is_object())
}

fn is_equality_primitive(value: &Value) -> bool {
    value.is_string() || value.is_number() || value.is_symbol()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_number_of_primitives() {
        let mut ctx = Context::new();
        assert!(ctx.to_number(Value::undefined()).unwrap().is_nan());
        assert_eq!(ctx.to_number(Value::null()).unwrap(), 0.0);
        assert_eq!(ctx.to_number(Value::boolean(true)).unwrap(), 1.0);
        let s = Value::string(ctx.intern("  42  "));
        assert_eq!(ctx.to_number(s).unwrap(), 42.0);
        let sym = Value::symbol(ctx.new_symbol(None));
        assert!(ctx.to_number(sym).unwrap_err().is_type_error());
    }

    #[test]
    fn test_to_property_key_canonicalizes_indices() {
        let mut ctx = Context::new();
        let key = ctx.to_property_key(Value::number(3.0)).unwrap();
        assert_eq!(key.as_index(), Some(3));
        let key = ctx.to_property_key(Value::number(-1.0)).unwrap();
        assert!(key.matches_str("-1"));
        let s = Value::string(ctx.intern("007"));
        assert!(ctx.to_property_key(s).unwrap().as_index().is_none());
    }

    #[test]
    fn test_abstract_equals() {
        let mut ctx = Context::new();
        assert!(ctx.abstract_equals(Value::null(), Value::undefined()).unwrap());
        let one = Value::string(ctx.intern("1"));
        assert!(ctx.abstract_equals(Value::int32(1), one).unwrap());
        assert!(ctx.abstract_equals(Value::boolean(true), one).unwrap());
        assert!(!ctx.abstract_equals(Value::null(), Value::int32(0)).unwrap());
        assert!(!ctx.abstract_equals(Value::nan(), Value::nan()).unwrap());
    }

    #[test]
    fn test_wrapper_to_primitive_uses_value_of() {
        let mut ctx = Context::new();
        let wrapper = ctx.to_object(Value::int32(5)).unwrap();
        let primitive = ctx.to_primitive(Value::object(wrapper), PreferredType::Default).unwrap();
        assert_eq!(primitive.as_number(), Some(5.0));
        let text = ctx.to_js_string(Value::object(wrapper)).unwrap();
        assert_eq!(text.as_str(), "5");
    }
}
