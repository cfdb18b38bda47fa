//! Invoker: runs one call through its CallableCache
//!
//! A call moves through four steps: building the native argument buffer,
//! calling the native function, building the script result, and cleanup.
//! A failure while building arguments releases every slot converted so far,
//! newest first, and nothing else.

mod backend;
mod state;

pub use backend::{
    ClosureHandler, FunctionTable, NativeBackend, NativeCallback, NativeFrame, NativeFunction,
};
pub use state::InvokeState;

use crate::cache::{ArgMeta, CallableCache};
use crate::closure::{self, ClosureMode, ClosureRecord};
use crate::config::MarshalConfig;
use crate::core::{NativeArg, ScopeType, Value};
use crate::errors::{ErrorKind, MarshalError, Result, TracingSink, WarningSink};
use crate::introspection::CallableInfo;
use crate::logging::{log_invoke, log_invoke_return, log_marshal_error};
use crate::marshal::{ForeignRegistry, WrapperRegistry};
use crate::stats;
use once_cell::sync::Lazy;
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;

static SCRIPT_LOCK: Lazy<ReentrantMutex<()>> = Lazy::new(|| ReentrantMutex::new(()));

/// Acquire the process-wide script lock
///
/// Script values are only touched while this is held. Reentrant, so a
/// closure dispatched synchronously from inside a native call can take it
/// again on the same thread.
pub fn script_lock() -> ReentrantMutexGuard<'static, ()> {
    SCRIPT_LOCK.lock()
}

/// Everything a call needs besides its cache and arguments
pub struct MarshalEnv {
    pub backend: Arc<dyn NativeBackend>,
    pub config: MarshalConfig,
    pub warnings: Arc<dyn WarningSink>,
    pub wrappers: WrapperRegistry,
    pub foreign: ForeignRegistry,
}

impl MarshalEnv {
    pub fn new(backend: Arc<dyn NativeBackend>) -> Self {
        Self {
            backend,
            config: MarshalConfig::default(),
            warnings: Arc::new(TracingSink),
            wrappers: WrapperRegistry::new(),
            foreign: ForeignRegistry::new(),
        }
    }

    pub fn with_config(mut self, config: MarshalConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_warnings(mut self, sink: Arc<dyn WarningSink>) -> Self {
        self.warnings = sink;
        self
    }
}

impl fmt::Debug for MarshalEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MarshalEnv")
            .field("config", &self.config)
            .field("wrappers", &self.wrappers.len())
            .field("foreign", &self.foreign.len())
            .finish()
    }
}

/// Entry point used by bindings
#[derive(Debug, Clone)]
pub struct Invoker {
    env: Arc<MarshalEnv>,
}

impl Invoker {
    pub fn new(env: MarshalEnv) -> Self {
        Self { env: Arc::new(env) }
    }

    pub fn from_env(env: Arc<MarshalEnv>) -> Self {
        Self { env }
    }

    pub fn env(&self) -> &Arc<MarshalEnv> {
        &self.env
    }

    /// Call the native function described by `cache`
    ///
    /// Returns the return value and out arguments: nothing gives `None`,
    /// one result is returned bare, several as a tuple.
    pub fn invoke(&self, cache: &CallableCache, instance: Option<&Value>, args: &[Value]) -> Result<Value> {
        stats::record_call();
        log_invoke(&cache.name, args.len());

        let result = self.invoke_inner(cache, instance, args).map_err(|e| {
            stats::record_error();
            let e = e.with_callable(cache.name.clone());
            log_marshal_error(&cache.name, &e.to_string());
            e
        });

        log_invoke_return(&cache.name, result.is_ok());
        result
    }

    fn invoke_inner(&self, cache: &CallableCache, instance: Option<&Value>, args: &[Value]) -> Result<Value> {
        if args.len() > cache.n_script_args {
            return Err(MarshalError::new(ErrorKind::TooManyArguments {
                expected: cache.n_script_args,
                found: args.len(),
            }));
        }

        let mut lock = script_lock();
        let mut state = InvokeState::new(cache, &self.env, args);

        if let Err(e) = build_args(&mut state, instance) {
            state.cleanup(false);
            return Err(e);
        }

        let function = match self.env.backend.resolve(&cache.symbol) {
            Ok(function) => function,
            Err(e) => {
                state.cleanup(false);
                return Err(e);
            }
        };

        let backend = &self.env.backend;
        let call = if self.env.config.invoke.release_lock_during_call {
            ReentrantMutexGuard::unlocked(&mut lock, || backend.invoke(&function, state.native_args_mut()))
        } else {
            backend.invoke(&function, state.native_args_mut())
        };
        let ret = match call {
            Ok(ret) => ret,
            Err(e) => {
                state.cleanup(false);
                return Err(e);
            }
        };

        if let Some(error) = state.take_error() {
            state.cleanup(true);
            return Err(MarshalError::native(error.domain, error.code, error.message));
        }

        let result = build_result(&state, ret);
        state.cleanup(true);
        result
    }

    /// Wrap `callable` as a native function pointer with the callback
    /// signature `signature`
    ///
    /// The closure is NOTIFIED: it lives until disposed, typically by the
    /// native side firing `closure::destroy_notify_trampoline`.
    pub fn marshal_closure(
        &self,
        signature: &CallableInfo,
        callable: Value,
        user_data: Option<Value>,
        swap_data: Option<Value>,
    ) -> Result<Arc<ClosureRecord>> {
        let cache = CallableCache::build_callback(signature)?;
        closure::create(
            &self.env,
            Arc::new(cache),
            ScopeType::Notified,
            callable,
            user_data,
            swap_data,
            ClosureMode::Callback,
        )
    }
}

/// Convert every script-supplied slot, in native order
fn build_args(state: &mut InvokeState<'_>, instance: Option<&Value>) -> Result<()> {
    let cache = state.cache();
    for (index, arg) in cache.args.iter().enumerate() {
        let value = match arg.meta {
            ArgMeta::Instance => instance.ok_or_else(|| MarshalError::missing("self"))?,
            // Filled while processing their parent
            ArgMeta::Child | ArgMeta::ChildWithScriptArg => continue,
            _ if !arg.direction.is_from_script() => continue,
            _ => match arg.script_arg_index.and_then(|k| state.script_arg(k)) {
                Some(value) => value,
                // Omitted optional arguments stay zeroed
                None if arg.has_default => continue,
                None => {
                    return Err(MarshalError::missing(arg.name.clone()).with_argument(arg.name.clone(), index))
                }
            },
        };

        let (native, data) = arg
            .to_native(state, value)
            .map_err(|e| e.with_argument(arg.name.clone(), index))?;
        state.store_converted(index, native, data);
    }
    Ok(())
}

fn build_result(state: &InvokeState<'_>, ret: NativeArg) -> Result<Value> {
    let cache = state.cache();
    let mut results: SmallVec<[Value; 4]> = SmallVec::new();
    let mut failure: Option<MarshalError> = None;

    if cache.has_return_value() {
        match cache.return_cache.to_script(state, ret) {
            Ok(value) => results.push(value),
            Err(e) => failure = Some(e.with_argument("return value", None)),
        }
    }

    // Slots after a failure are still converted so owned outputs get freed
    for (index, arg) in cache.args.iter().enumerate() {
        if arg.meta != ArgMeta::Normal || !arg.direction.is_to_script() {
            continue;
        }
        match arg.to_script(state, state.slot_value(index)) {
            Ok(value) => results.push(value),
            Err(e) if failure.is_none() => failure = Some(e.with_argument(arg.name.clone(), index)),
            Err(_) => {}
        }
    }

    if let Some(e) = failure {
        return Err(e);
    }

    Ok(match results.len() {
        0 => Value::None,
        1 => results.pop().unwrap_or(Value::None),
        _ => Value::tuple(results),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Transfer, TypeTag};
    use crate::introspection::ArgInfo;

    fn env_with(table: Arc<FunctionTable>) -> Arc<MarshalEnv> {
        Arc::new(MarshalEnv::new(table))
    }

    #[test]
    fn test_script_lock_is_reentrant() {
        let _outer = script_lock();
        let _inner = script_lock();
    }

    #[test]
    fn test_state_out_slots_point_at_storage() {
        let info = CallableInfo::function("Test", "out_pair")
            .arg(ArgInfo::new("a", TypeTag::Int32))
            .arg(ArgInfo::new("b", TypeTag::Int32).out());
        let cache = CallableCache::build(&info).unwrap();
        let env = env_with(Arc::new(FunctionTable::new()));
        let mut state = InvokeState::new(&cache, &env, &[]);

        assert!(state.native_args_mut()[0].is_null());
        assert!(!state.native_args_mut()[1].is_null());

        state.set_slot_value(1, NativeArg::from_integer(TypeTag::Int32, 7));
        assert_eq!(state.slot_value(1).to_integer(TypeTag::Int32), 7);
        assert_eq!(state.pending_cleanups(), 0);
    }

    #[test]
    fn test_throwing_callable_has_error_slot() {
        let info = CallableInfo::function("Test", "may_fail").throws();
        let cache = CallableCache::build(&info).unwrap();
        let env = env_with(Arc::new(FunctionTable::new()));
        let mut state = InvokeState::new(&cache, &env, &[]);
        assert_eq!(state.native_args_mut().len(), 1);
        assert!(state.take_error().is_none());
    }

    #[test]
    fn test_dispatch_state_reads_inout_through_pointer() {
        let info = CallableInfo::callback("Test", "Cb")
            .arg(ArgInfo::new("counter", TypeTag::Int32).inout());
        let cache = CallableCache::build_callback(&info).unwrap();
        let env = env_with(Arc::new(FunctionTable::new()));
        let mut counter: i32 = 41;
        let args = [NativeArg::from_ptr(&mut counter as *mut i32)];
        let state = InvokeState::for_dispatch(&cache, &env, &args);
        assert_eq!(state.slot_value(0).to_integer(TypeTag::Int32), 41);
    }

    #[test]
    fn test_unknown_symbol_is_not_found() {
        let info = CallableInfo::function("Test", "missing").returns(TypeTag::Int32, Transfer::Nothing);
        let cache = CallableCache::build(&info).unwrap();
        let invoker = Invoker::from_env(env_with(Arc::new(FunctionTable::new())));
        let err = invoker.invoke(&cache, None, &[]).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::NotFound { .. }));
        assert_eq!(err.callable.as_deref(), Some("Test.missing"));
    }
}
