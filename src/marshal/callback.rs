//! Callback marshaler: script callables passed where native code expects a
//! function pointer
//!
//! The closure id goes into the user-data slot so the destroy notifier can
//! find the closure again. Without a user-data slot a destroy notifier can
//! never identify the closure; a no-op notifier is installed instead and a
//! resource-leak warning is raised.

use super::CleanupData;
use crate::cache::{ArgCache, LinkRole};
use crate::closure::{self, ClosureMode};
use crate::core::{NativeArg, ScopeType, Value};
use crate::errors::{MarshalError, Result, Warning};
use crate::invoke::InvokeState;
use core::ffi::c_void;

pub(crate) fn callback_in(
    state: &mut InvokeState<'_>,
    arg: &ArgCache,
    value: &Value,
) -> Result<(NativeArg, CleanupData)> {
    let user_data_slot = arg.link(LinkRole::UserData);
    let destroy_slot = arg.link(LinkRole::DestroyNotify);

    if value.is_none() || value.is_default() {
        if !arg.allow_none {
            return Err(MarshalError::type_error("callable", value.type_name()));
        }
        for slot in [user_data_slot, destroy_slot].into_iter().flatten() {
            state.set_slot_value(slot, NativeArg::null());
        }
        return Ok((NativeArg::null(), CleanupData::None));
    }
    if !value.is_callable() {
        return Err(MarshalError::type_error("callable", value.type_name()));
    }

    let signature = arg
        .callback
        .clone()
        .ok_or_else(|| MarshalError::invalid_config(format!("callback '{}' has no signature", arg.name)))?;

    // User data supplied from script code travels with the closure
    let user_data = user_data_slot
        .and_then(|slot| state.cache().args[slot].script_arg_index)
        .and_then(|index| state.script_arg(index))
        .cloned();

    let env = state.env().clone();
    let record = closure::create(
        &env,
        signature,
        arg.scope,
        value.clone(),
        user_data,
        None,
        ClosureMode::Callback,
    )?;
    let id = record.id();

    if let Some(slot) = user_data_slot {
        state.set_slot_value(slot, NativeArg::from_ptr(id as usize as *mut c_void));
    }

    if let Some(slot) = destroy_slot {
        let notifier: unsafe extern "C" fn(*mut c_void) = if user_data_slot.is_some() {
            closure::destroy_notify_trampoline
        } else {
            let warning = Warning::resource_leak(&state.cache().name);
            if env.config.invoke.leak_warnings_as_errors {
                closure::dispose(id, "leak warning raised as error");
                return Err(MarshalError::value(warning.message));
            }
            env.warnings.warn(&warning);
            closure::destroy_notify_noop
        };
        state.set_slot_value(slot, NativeArg::from_ptr(notifier as *mut c_void));
    }

    Ok((NativeArg::from_ptr(record.native().as_ptr()), CleanupData::Closure(id)))
}

pub(crate) fn callback_out(_state: &InvokeState<'_>, arg: &ArgCache, _native: NativeArg) -> Result<Value> {
    Err(MarshalError::not_implemented(format!(
        "returning callback '{}' to script code",
        arg.name
    )))
}

pub(crate) fn callback_cleanup(_state: &InvokeState<'_>, arg: &ArgCache, data: CleanupData, was_processed: bool) {
    if let CleanupData::Closure(id) = data {
        // Closures never seen by native code are always ours to free
        if !was_processed || arg.scope == ScopeType::Call {
            closure::dispose(id, if was_processed { "call returned" } else { "call failed" });
        }
    }
}
