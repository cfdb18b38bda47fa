//! Closure bridge: script callables exposed as native function pointers
//!
//! Every live closure sits in a process-wide registry keyed by id. The
//! backend handler only remembers the id, so a dispatch that races a dispose
//! finds nothing and returns a zeroed value instead of touching freed state.
//!
//! Lifetime by scope:
//! - CALL: disposed by the Invoker once the native call returns
//! - NOTIFIED: disposed by the destroy notifier or by signal disconnect
//! - ASYNC: disposed after its first dispatch

use crate::cache::{ArgMeta, CallableCache};
use crate::core::{ArrayLength, NativeArg, ScopeType, TypeDescriptor, Value};
use crate::errors::{MarshalError, Result};
use crate::introspection::{ArgInfo, CallableInfo, FunctionKind, InterfaceInfo, Repository};
use crate::invoke::{script_lock, ClosureHandler, InvokeState, MarshalEnv, NativeCallback};
use crate::logging::{debug, error, log_closure_created, log_closure_disposed};
use crate::stats;
use core::ffi::c_void;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

static LIVE_CLOSURES: Lazy<DashMap<u64, Arc<ClosureRecord>>> = Lazy::new(DashMap::new);
static NEXT_CLOSURE_ID: AtomicU64 = AtomicU64::new(1);

/// Where the script-side user data goes when the closure is dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClosureMode {
    /// In place of the signature's user-data parameter, or appended when
    /// the signature has none
    Callback,
    /// Appended after the emitted arguments; a tuple contributes each item
    Signal,
}

/// A script callable bound to a native callback signature
pub struct ClosureRecord {
    id: u64,
    callable: Value,
    user_data: Option<Value>,
    swap_data: Option<Value>,
    scope: ScopeType,
    mode: ClosureMode,
    signature: Arc<CallableCache>,
    env: Arc<MarshalEnv>,
    native: NativeCallback,
}

impl ClosureRecord {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Function pointer handed to native code
    pub fn native(&self) -> NativeCallback {
        self.native
    }

    pub fn scope(&self) -> ScopeType {
        self.scope
    }

    pub fn signature(&self) -> &Arc<CallableCache> {
        &self.signature
    }

    pub fn user_data(&self) -> Option<&Value> {
        self.user_data.as_ref()
    }

    pub fn is_live(&self) -> bool {
        is_live(self.id)
    }

    /// Run the captured callable for one native call-in
    ///
    /// The caller holds the script lock. Returns the native return value;
    /// callback out arguments are written through their pointers.
    pub fn invoke_native_call(&self, native_args: &[NativeArg]) -> Result<NativeArg> {
        let cache = &*self.signature;
        if native_args.len() < cache.args.len() {
            return Err(MarshalError::invalid_config(format!(
                "callback expects {} arguments, native code passed {}",
                cache.args.len(),
                native_args.len()
            )));
        }

        let mut state = InvokeState::for_dispatch(cache, &self.env, native_args);
        let mut script_args = Vec::with_capacity(cache.args.len() + 1);
        let mut user_data_placed = false;

        for (index, arg) in cache.args.iter().enumerate() {
            match arg.meta {
                ArgMeta::ClosureData => {
                    if self.mode == ClosureMode::Callback {
                        if let Some(data) = &self.user_data {
                            script_args.push(data.clone());
                            user_data_placed = true;
                        }
                    }
                    continue;
                }
                ArgMeta::Child | ArgMeta::ChildWithScriptArg => continue,
                _ => {}
            }
            if !arg.direction.is_to_script() {
                continue;
            }
            let value = arg
                .to_script(&state, state.slot_value(index))
                .map_err(|e| e.with_argument(arg.name.clone(), index))?;
            script_args.push(value);
        }

        if let Some(swap) = &self.swap_data {
            if let Some(first) = script_args.first_mut() {
                *first = swap.clone();
            }
        }
        if !user_data_placed {
            match (&self.user_data, self.mode) {
                (Some(Value::Tuple(extra)), ClosureMode::Signal) => script_args.extend(extra.iter().cloned()),
                (Some(data), _) => script_args.push(data.clone()),
                (None, _) => {}
            }
        }

        let result = match &self.callable {
            Value::Callable(callable) => callable.call(&script_args)?,
            other => return Err(MarshalError::type_error("callable", other.type_name())),
        };

        self.store_results(&mut state, native_args, result)
    }

    /// Split the callable's result into the return value and out arguments
    fn store_results(&self, state: &mut InvokeState<'_>, native_args: &[NativeArg], result: Value) -> Result<NativeArg> {
        let cache = &*self.signature;
        let outs: Vec<usize> = cache
            .args
            .iter()
            .enumerate()
            .filter(|(_, a)| a.meta == ArgMeta::Normal && a.direction.is_from_script())
            .map(|(i, _)| i)
            .collect();
        let has_return = cache.has_return_value();
        let n_results = usize::from(has_return) + outs.len();

        let mut values = match n_results {
            0 => Vec::new(),
            1 => vec![result],
            n => match result {
                Value::Tuple(items) if items.len() == n => items.iter().cloned().collect(),
                other => {
                    return Err(MarshalError::type_error(
                        format!("tuple of {} values", n),
                        other.type_name(),
                    ))
                }
            },
        }
        .into_iter();

        let mut ret = NativeArg::zeroed();
        if has_return {
            let value = values.next().unwrap_or(Value::None);
            let (native, data) = cache
                .return_cache
                .to_native(state, &value)
                .map_err(|e| e.with_argument("return value", None))?;
            cache.return_cache.release(state, data, true);
            ret = native;
        }

        for (index, value) in outs.into_iter().zip(values) {
            let arg = &cache.args[index];
            let (native, data) = arg
                .to_native(state, &value)
                .map_err(|e| e.with_argument(arg.name.clone(), index))?;
            let dst = native_args[index].pointer();
            if !dst.is_null() {
                // SAFETY: native code passes a valid pointer for each out slot
                unsafe { native.write_to(dst as *mut u8, arg.type_desc.storage_size()) };
            }
            arg.release(state, data, true);
        }

        Ok(ret)
    }
}

impl fmt::Debug for ClosureRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClosureRecord")
            .field("id", &self.id)
            .field("callable", &self.signature.name)
            .field("scope", &self.scope)
            .field("mode", &self.mode)
            .field("native", &self.native)
            .finish()
    }
}

/// Backend-facing handler; resolves the record on every dispatch
struct Trampoline {
    id: u64,
}

impl ClosureHandler for Trampoline {
    fn dispatch(&self, args: &[NativeArg]) -> NativeArg {
        let record = match LIVE_CLOSURES.get(&self.id).map(|r| r.value().clone()) {
            Some(record) => record,
            None => {
                error!(target: "closure", id = self.id, "dispatch to a disposed closure");
                return NativeArg::zeroed();
            }
        };

        let result = {
            let _guard = script_lock();
            record.invoke_native_call(args)
        };
        if record.scope == ScopeType::Async {
            dispose(record.id, "async callback dispatched");
        }

        match result {
            Ok(ret) => ret,
            Err(e) => {
                let e = e.with_callable(record.signature.name.clone());
                error!(target: "closure", id = record.id, error = %e, "callback raised");
                NativeArg::zeroed()
            }
        }
    }
}

/// Bind `callable` to `signature` and register it as live
pub fn create(
    env: &Arc<MarshalEnv>,
    signature: Arc<CallableCache>,
    scope: ScopeType,
    callable: Value,
    user_data: Option<Value>,
    swap_data: Option<Value>,
    mode: ClosureMode,
) -> Result<Arc<ClosureRecord>> {
    if !callable.is_callable() {
        return Err(MarshalError::type_error("callable", callable.type_name()));
    }

    let id = NEXT_CLOSURE_ID.fetch_add(1, Ordering::Relaxed);
    let native = env.backend.prepare_closure(&signature, Arc::new(Trampoline { id }))?;
    let record = Arc::new(ClosureRecord {
        id,
        callable,
        user_data,
        swap_data,
        scope,
        mode,
        signature,
        env: env.clone(),
        native,
    });
    LIVE_CLOSURES.insert(id, record.clone());

    stats::record_closure_created();
    log_closure_created(id, &record.signature.name, scope_name(scope));
    Ok(record)
}

fn scope_name(scope: ScopeType) -> &'static str {
    match scope {
        ScopeType::Call => "call",
        ScopeType::Notified => "notified",
        ScopeType::Async => "async",
    }
}

/// Release closure `id`; false when it was already disposed
pub fn dispose(id: u64, reason: &str) -> bool {
    match LIVE_CLOSURES.remove(&id) {
        Some((_, record)) => {
            record.env.backend.release_closure(record.native);
            stats::record_closure_disposed();
            log_closure_disposed(id, reason);
            true
        }
        None => false,
    }
}

pub fn is_live(id: u64) -> bool {
    LIVE_CLOSURES.contains_key(&id)
}

/// Number of closures not yet disposed, across every environment
pub fn live_count() -> usize {
    LIVE_CLOSURES.len()
}

/// Destroy notifier installed next to a user-data slot holding a closure id
pub extern "C" fn destroy_notify_trampoline(data: *mut c_void) {
    let id = data as usize as u64;
    if !dispose(id, "destroy notify") {
        debug!(target: "closure", id, "destroy notify for unknown closure");
    }
}

/// Destroy notifier for callbacks without a user-data slot
pub extern "C" fn destroy_notify_noop(_data: *mut c_void) {}

/// Handler connected to a signal; disconnects on drop
pub struct SignalConnection {
    closure: Arc<ClosureRecord>,
    connected: AtomicBool,
}

impl SignalConnection {
    pub fn closure_id(&self) -> u64 {
        self.closure.id
    }

    pub fn callback(&self) -> NativeCallback {
        self.closure.native
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Emit the signal to this handler, as the native side would
    pub fn emit(&self, args: &[NativeArg]) -> Result<NativeArg> {
        if !self.is_connected() {
            return Err(MarshalError::value("signal handler is disconnected"));
        }
        self.closure.env.backend.invoke_callback(self.closure.native, args)
    }

    /// Invalidate the handler; true on the first call only
    pub fn disconnect(&self) -> bool {
        if self.connected.swap(false, Ordering::AcqRel) {
            dispose(self.closure.id, "signal disconnected")
        } else {
            false
        }
    }
}

impl Drop for SignalConnection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl fmt::Debug for SignalConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalConnection")
            .field("closure", &self.closure.id)
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Signal signature with the emitting instance as leading argument
fn with_leading_instance(signal: &CallableInfo, object: InterfaceInfo) -> CallableInfo {
    let mut info = signal.clone();
    info.kind = FunctionKind::Callback;
    for arg in info.args.iter_mut() {
        arg.closure = arg.closure.map(|i| i + 1);
        arg.destroy = arg.destroy.map(|i| i + 1);
        shift_length(&mut arg.ty);
    }
    shift_length(&mut info.return_type);
    info.args.insert(0, ArgInfo::new("instance", TypeDescriptor::interface(object)));
    info
}

fn shift_length(ty: &mut TypeDescriptor) {
    if let Some(array) = ty.array.as_mut() {
        if let Some(ArrayLength::Indexed(i)) = array.length {
            array.length = Some(ArrayLength::Indexed(i + 1));
        }
    }
}

/// Connect `callable` to `signal` on the object type `namespace.object`
///
/// `user_data` is appended to the emitted arguments (a tuple contributes
/// each item); `swap_data` replaces the emitting instance.
#[allow(clippy::too_many_arguments)]
pub fn connect_signal(
    env: &Arc<MarshalEnv>,
    repo: &dyn Repository,
    namespace: &str,
    object: &str,
    signal: &str,
    callable: Value,
    user_data: Option<Value>,
    swap_data: Option<Value>,
) -> Result<SignalConnection> {
    let info = repo.find_signal(namespace, object, signal)?;
    let object_info = repo.find_interface(namespace, object)?;
    let signature = CallableCache::build_callback(&with_leading_instance(&info, object_info))?;

    let closure = create(
        env,
        Arc::new(signature),
        ScopeType::Notified,
        callable,
        user_data,
        swap_data,
        ClosureMode::Signal,
    )?;
    Ok(SignalConnection {
        closure,
        connected: AtomicBool::new(true),
    })
}
