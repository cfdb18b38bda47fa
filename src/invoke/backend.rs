//! Native-call backend
//!
//! The engine never calls machine code itself. A `NativeBackend` resolves
//! symbols, performs calls with an assembled argument buffer and turns
//! closure handlers into callable native function pointers.
//!
//! `FunctionTable` is the in-process backend: symbols map to Rust closures
//! that see the raw argument buffer through a `NativeFrame`, exactly as a C
//! callee would.

use crate::cache::CallableCache;
use crate::core::{NativeArg, NativeError};
use crate::errors::{MarshalError, Result};
use crate::logging::trace;
use core::ffi::c_void;
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Resolved native function
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeFunction {
    symbol: String,
    addr: usize,
}

impl NativeFunction {
    pub fn new(symbol: impl Into<String>, addr: usize) -> Self {
        Self {
            symbol: symbol.into(),
            addr,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn addr(&self) -> usize {
        self.addr
    }
}

/// Native function pointer produced for a closure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeCallback {
    addr: usize,
}

impl NativeCallback {
    pub fn from_ptr(ptr: *mut c_void) -> Self {
        Self { addr: ptr as usize }
    }

    pub fn from_arg(arg: NativeArg) -> Self {
        Self::from_ptr(arg.pointer())
    }

    pub fn as_ptr(&self) -> *mut c_void {
        self.addr as *mut c_void
    }

    pub fn addr(&self) -> usize {
        self.addr
    }
}

/// Receives calls made through a prepared closure
pub trait ClosureHandler: Send + Sync {
    fn dispatch(&self, args: &[NativeArg]) -> NativeArg;
}

/// Calling-convention and closure-trampoline subsystem
pub trait NativeBackend: Send + Sync {
    /// Look up a native symbol; `NotFound` when absent
    fn resolve(&self, symbol: &str) -> Result<NativeFunction>;

    /// Call `function` with the assembled argument buffer
    fn invoke(&self, function: &NativeFunction, args: &mut [NativeArg]) -> Result<NativeArg>;

    /// Produce a native function pointer that forwards to `handler`
    fn prepare_closure(
        &self,
        signature: &CallableCache,
        handler: Arc<dyn ClosureHandler>,
    ) -> Result<NativeCallback>;

    /// Invalidate a pointer from `prepare_closure`
    fn release_closure(&self, callback: NativeCallback);

    /// Call through a native function pointer, as native code would
    fn invoke_callback(&self, callback: NativeCallback, args: &[NativeArg]) -> Result<NativeArg>;
}

type NativeFn = dyn Fn(&mut NativeFrame<'_>) -> NativeArg + Send + Sync;

/// Table of Rust closures standing in for native symbols
pub struct FunctionTable {
    symbols: DashMap<String, usize>,
    functions: DashMap<usize, Arc<NativeFn>>,
    callbacks: DashMap<usize, Arc<dyn ClosureHandler>>,
    next_addr: AtomicUsize,
}

impl Default for FunctionTable {
    fn default() -> Self {
        Self {
            symbols: DashMap::new(),
            functions: DashMap::new(),
            callbacks: DashMap::new(),
            next_addr: AtomicUsize::new(0x1000),
        }
    }
}

impl FunctionTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_addr(&self) -> usize {
        self.next_addr.fetch_add(0x10, Ordering::Relaxed)
    }

    /// Register `body` under `symbol`, replacing any previous definition
    pub fn register<F>(&self, symbol: impl Into<String>, body: F) -> NativeFunction
    where
        F: Fn(&mut NativeFrame<'_>) -> NativeArg + Send + Sync + 'static,
    {
        let symbol = symbol.into();
        let addr = self.allocate_addr();
        if let Some(old) = self.symbols.insert(symbol.clone(), addr) {
            self.functions.remove(&old);
        }
        self.functions.insert(addr, Arc::new(body));
        NativeFunction::new(symbol, addr)
    }

    /// Closures currently callable through this table
    pub fn live_callbacks(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_live(&self, callback: NativeCallback) -> bool {
        self.callbacks.contains_key(&callback.addr)
    }
}

impl fmt::Debug for FunctionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionTable")
            .field("symbols", &self.symbols.len())
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

impl NativeBackend for FunctionTable {
    fn resolve(&self, symbol: &str) -> Result<NativeFunction> {
        self.symbols
            .get(symbol)
            .map(|addr| NativeFunction::new(symbol, *addr))
            .ok_or_else(|| MarshalError::not_found(symbol))
    }

    fn invoke(&self, function: &NativeFunction, args: &mut [NativeArg]) -> Result<NativeArg> {
        let body = self
            .functions
            .get(&function.addr)
            .map(|f| f.value().clone())
            .ok_or_else(|| MarshalError::not_found(function.symbol.clone()))?;
        trace!(target: "invoke", symbol = %function.symbol, n_args = args.len(), "native call");
        let mut frame = NativeFrame { args, table: self };
        Ok(body(&mut frame))
    }

    fn prepare_closure(
        &self,
        _signature: &CallableCache,
        handler: Arc<dyn ClosureHandler>,
    ) -> Result<NativeCallback> {
        let addr = self.allocate_addr();
        self.callbacks.insert(addr, handler);
        Ok(NativeCallback { addr })
    }

    fn release_closure(&self, callback: NativeCallback) {
        self.callbacks.remove(&callback.addr);
    }

    fn invoke_callback(&self, callback: NativeCallback, args: &[NativeArg]) -> Result<NativeArg> {
        let handler = self
            .callbacks
            .get(&callback.addr)
            .map(|h| h.value().clone())
            .ok_or_else(|| MarshalError::not_found(format!("callback {:#x}", callback.addr)))?;
        Ok(handler.dispatch(args))
    }
}

/// Argument buffer as seen by a native callee
pub struct NativeFrame<'a> {
    args: &'a mut [NativeArg],
    table: &'a FunctionTable,
}

impl<'a> NativeFrame<'a> {
    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    #[inline]
    pub fn arg(&self, index: usize) -> NativeArg {
        self.args[index]
    }

    pub fn args(&self) -> &[NativeArg] {
        self.args
    }

    pub fn table(&self) -> &'a FunctionTable {
        self.table
    }

    /// Read `size` bytes through the pointer in slot `index` (inout arguments)
    ///
    /// # Safety
    /// Slot `index` must hold a valid out-argument pointer.
    pub unsafe fn read_out(&self, index: usize, size: usize) -> NativeArg {
        NativeArg::read_from(self.args[index].pointer() as *const u8, size)
    }

    /// Store `value` through the pointer in slot `index` (out arguments)
    ///
    /// # Safety
    /// Slot `index` must hold a valid out-argument pointer.
    pub unsafe fn write_out(&self, index: usize, value: NativeArg, size: usize) {
        value.write_to(self.args[index].pointer() as *mut u8, size);
    }

    /// Call a function pointer received as an argument
    pub fn call_callback(&self, callback: NativeArg, args: &[NativeArg]) -> Result<NativeArg> {
        self.table.invoke_callback(NativeCallback::from_arg(callback), args)
    }

    /// Fire a destroy notifier received as an argument
    ///
    /// # Safety
    /// `notify` must be null or a `unsafe extern "C" fn(*mut c_void)`.
    pub unsafe fn destroy_notify(&self, notify: NativeArg, data: NativeArg) {
        if !notify.is_null() {
            let func: unsafe extern "C" fn(*mut c_void) = std::mem::transmute(notify.pointer());
            func(data.pointer());
        }
    }

    /// Report failure through the trailing error slot
    ///
    /// # Safety
    /// The callable must be declared as throwing.
    pub unsafe fn raise(&self, error: NativeError) {
        if let Some(slot) = self.args.last() {
            error.raise(slot.pointer() as *mut *mut NativeError);
        }
    }
}
