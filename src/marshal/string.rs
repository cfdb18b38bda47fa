//! String marshalers (utf8 and filename)
//!
//! Transfer NOTHING hands native code a pointer into the script value's own
//! NUL-terminated buffer and keeps the value alive for the call. Transfer
//! EVERYTHING duplicates into C heap memory the callee frees.

use super::CleanupData;
use crate::cache::ArgCache;
use crate::core::memory;
use crate::core::{NativeArg, Transfer, TypeTag, Value};
use crate::errors::{MarshalError, Result};
use crate::invoke::InvokeState;

pub(crate) fn utf8_in(
    _state: &mut InvokeState<'_>,
    arg: &ArgCache,
    value: &Value,
) -> Result<(NativeArg, CleanupData)> {
    let (ptr, bytes, nul_free) = match value {
        Value::None if arg.allow_none => return Ok((NativeArg::null(), CleanupData::None)),
        Value::Str(text) => (text.as_ptr(), text.as_str().as_bytes(), !text.has_interior_nul()),
        Value::Bytes(bytes) => {
            if arg.type_desc.tag == TypeTag::Utf8 && std::str::from_utf8(bytes.as_bytes()).is_err() {
                return Err(MarshalError::value("bytes are not valid utf-8"));
            }
            (bytes.as_ptr(), bytes.as_bytes(), !bytes.has_interior_nul())
        }
        other => return Err(MarshalError::type_error("str", other.type_name())),
    };
    if !nul_free {
        return Err(MarshalError::type_error(
            "str without null characters",
            "str with embedded null character",
        ));
    }

    match arg.transfer {
        Transfer::Nothing => Ok((
            NativeArg::from_ptr(ptr as *mut u8),
            CleanupData::Borrowed(value.clone()),
        )),
        _ => {
            let dup = memory::strdup(bytes)?;
            Ok((NativeArg::from_ptr(dup), CleanupData::Allocation(dup)))
        }
    }
}

pub(crate) fn utf8_out(_state: &InvokeState<'_>, arg: &ArgCache, native: NativeArg) -> Result<Value> {
    let ptr = native.pointer();
    if ptr.is_null() {
        return Ok(Value::None);
    }
    // SAFETY: non-null string arguments are NUL-terminated
    let bytes = unsafe { memory::c_str_bytes(ptr) };
    let decoded = match arg.type_desc.tag {
        TypeTag::Filename => Ok(String::from_utf8_lossy(bytes).into_owned()),
        _ => std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|e| MarshalError::value(format!("invalid utf-8 returned: {}", e))),
    };
    if arg.transfer == Transfer::Everything {
        // SAFETY: ownership was transferred to us
        unsafe { memory::free(ptr) };
    }
    Ok(Value::str(&decoded?))
}

pub(crate) fn utf8_cleanup(_state: &InvokeState<'_>, _arg: &ArgCache, data: CleanupData, was_processed: bool) {
    // Once the call happened the callee owns duplicated strings
    if let CleanupData::Allocation(ptr) = data {
        if !was_processed {
            // SAFETY: allocated by utf8_in and never handed over
            unsafe { memory::free(ptr) };
        }
    }
}
