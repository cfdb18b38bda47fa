//! Scalar marshalers: booleans, integers, floats, enums, flags, pointers
//!
//! Integer conversion is exact: the script value must fit the target width
//! and signedness, otherwise the call fails with an overflow error.

use super::CleanupData;
use crate::cache::ArgCache;
use crate::core::{NativeArg, TypeTag, Value};
use crate::errors::{MarshalError, Result};
use crate::introspection::{EnumInfo, InterfaceInfo};
use crate::invoke::InvokeState;
use core::ffi::c_void;
use num_traits::{Bounded, ToPrimitive};

#[inline]
fn bounds<T: Bounded + Into<i128>>() -> (i128, i128) {
    (T::min_value().into(), T::max_value().into())
}

/// Inclusive range of an integral tag
pub fn integer_range(tag: TypeTag) -> (i128, i128) {
    match tag {
        TypeTag::Boolean => (0, 1),
        TypeTag::Int8 => bounds::<i8>(),
        TypeTag::UInt8 => bounds::<u8>(),
        TypeTag::Int16 => bounds::<i16>(),
        TypeTag::UInt16 => bounds::<u16>(),
        TypeTag::Int32 => bounds::<i32>(),
        TypeTag::UInt32 => bounds::<u32>(),
        TypeTag::Int64 => bounds::<i64>(),
        TypeTag::UInt64 => bounds::<u64>(),
        _ => bounds::<i64>(),
    }
}

fn integer_of(tag: TypeTag, value: &Value) -> Result<i128> {
    match value {
        Value::Int(i) => Ok(*i),
        Value::Bool(b) => Ok(*b as i128),
        Value::Float(f) if f.is_nan() => Err(MarshalError::type_error("int", "nan")),
        Value::Float(f) => f.trunc().to_i128().ok_or_else(|| {
            let (min, max) = integer_range(tag);
            MarshalError::overflow(f, min, max)
        }),
        // 1-byte integers also take a single character
        Value::Bytes(bytes) if tag.storage_size() == 1 => match bytes.as_bytes() {
            [byte] => Ok(*byte as i128),
            other => Err(MarshalError::type_error(
                "a single byte",
                format!("bytes of length {}", other.len()),
            )),
        },
        Value::Str(text) if tag.storage_size() == 1 => match text.as_str().as_bytes() {
            [byte] => Ok(*byte as i128),
            _ => Err(MarshalError::type_error(
                "a single character",
                format!("str of length {}", text.as_str().chars().count()),
            )),
        },
        other => Err(MarshalError::type_error("int", other.type_name())),
    }
}

/// Range-checked integer conversion
pub fn integer_to_native(tag: TypeTag, value: &Value) -> Result<NativeArg> {
    let n = integer_of(tag, value)?;
    let (min, max) = integer_range(tag);
    if n < min || n > max {
        return Err(MarshalError::overflow(n, min, max));
    }
    Ok(NativeArg::from_integer(tag, n))
}

fn float_to_native(tag: TypeTag, value: &Value) -> Result<NativeArg> {
    let f = value
        .as_float()
        .ok_or_else(|| MarshalError::type_error("float", value.type_name()))?;
    let mut arg = NativeArg::zeroed();
    if tag == TypeTag::Float {
        let max = f32::MAX as f64;
        if f.is_finite() && (f < -max || f > max) {
            return Err(MarshalError::overflow(f, -max, max));
        }
        arg.v_float = f as f32;
    } else {
        arg.v_double = f;
    }
    Ok(arg)
}

/// Convert a script value to a native scalar of `tag`
pub fn value_to_native(tag: TypeTag, value: &Value) -> Result<NativeArg> {
    match tag {
        TypeTag::Boolean => Ok(NativeArg::from_integer(tag, value.is_truthy() as i128)),
        TypeTag::Float | TypeTag::Double => float_to_native(tag, value),
        t if t.is_integral() => integer_to_native(t, value),
        other => Err(MarshalError::unsupported(other.name())),
    }
}

/// Convert a native scalar of `tag` to a script value
pub fn native_to_value(tag: TypeTag, native: NativeArg) -> Value {
    match tag {
        TypeTag::Void => Value::None,
        TypeTag::Boolean => Value::Bool(native.to_integer(tag) != 0),
        // SAFETY: float members are plain data
        TypeTag::Float => Value::Float(unsafe { native.v_float } as f64),
        TypeTag::Double => Value::Float(unsafe { native.v_double }),
        other => Value::Int(native.to_integer(other)),
    }
}

pub(crate) fn scalar_in(
    _state: &mut InvokeState<'_>,
    arg: &ArgCache,
    value: &Value,
) -> Result<(NativeArg, CleanupData)> {
    Ok((value_to_native(arg.type_desc.tag, value)?, CleanupData::None))
}

pub(crate) fn scalar_out(_state: &InvokeState<'_>, arg: &ArgCache, native: NativeArg) -> Result<Value> {
    Ok(native_to_value(arg.type_desc.tag, native))
}

pub(crate) fn void_in(
    _state: &mut InvokeState<'_>,
    _arg: &ArgCache,
    _value: &Value,
) -> Result<(NativeArg, CleanupData)> {
    Ok((NativeArg::zeroed(), CleanupData::None))
}

pub(crate) fn void_out(_state: &InvokeState<'_>, _arg: &ArgCache, _native: NativeArg) -> Result<Value> {
    Ok(Value::None)
}

fn enum_info(arg: &ArgCache) -> Result<(&EnumInfo, bool)> {
    match arg.type_desc.interface.as_ref() {
        Some(InterfaceInfo::Enum(info)) => Ok((info, false)),
        Some(InterfaceInfo::Flags(info)) => Ok((info, true)),
        _ => Err(MarshalError::unsupported(arg.type_desc.display_name())),
    }
}

/// Integer conversion validated against the members of an enum or flags type
pub fn enum_to_native(info: &EnumInfo, is_flags: bool, value: &Value) -> Result<NativeArg> {
    let native = integer_to_native(info.storage, value)?;
    let n = native.to_integer(info.storage) as i64;
    let valid = if is_flags {
        n & !info.all_bits() == 0
    } else {
        info.contains(n)
    };
    if !valid {
        return Err(MarshalError::value(format!(
            "{} is not a valid {}.{}",
            n, info.namespace, info.name
        )));
    }
    Ok(native)
}

pub(crate) fn enum_in(
    _state: &mut InvokeState<'_>,
    arg: &ArgCache,
    value: &Value,
) -> Result<(NativeArg, CleanupData)> {
    let (info, is_flags) = enum_info(arg)?;
    Ok((enum_to_native(info, is_flags, value)?, CleanupData::None))
}

pub(crate) fn enum_out(_state: &InvokeState<'_>, arg: &ArgCache, native: NativeArg) -> Result<Value> {
    let (info, _) = enum_info(arg)?;
    Ok(Value::Int(native.to_integer(info.storage)))
}

pub(crate) fn pointer_in(
    _state: &mut InvokeState<'_>,
    _arg: &ArgCache,
    value: &Value,
) -> Result<(NativeArg, CleanupData)> {
    match value {
        Value::None => Ok((NativeArg::null(), CleanupData::None)),
        Value::Int(addr) => {
            let addr = addr
                .to_usize()
                .ok_or_else(|| MarshalError::overflow(addr, 0, usize::MAX))?;
            Ok((NativeArg::from_ptr(addr as *mut c_void), CleanupData::None))
        }
        other => Err(MarshalError::type_error("int or None", other.type_name())),
    }
}

pub(crate) fn pointer_out(_state: &InvokeState<'_>, _arg: &ArgCache, native: NativeArg) -> Result<Value> {
    if native.is_null() {
        Ok(Value::None)
    } else {
        Ok(Value::Int(native.pointer() as usize as i128))
    }
}
