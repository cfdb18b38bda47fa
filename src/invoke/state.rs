//! Per-call transient state

use super::MarshalEnv;
use crate::cache::CallableCache;
use crate::core::{Direction, NativeArg, NativeError, Value};
use crate::marshal::CleanupData;
use bitvec::prelude::*;
use std::sync::Arc;

/// Native argument buffer, script arguments and cleanup data of one call
///
/// Out and inout slots hold a pointer into `out_storage`, which has a fixed
/// address for the lifetime of the state. A throwing callable gets one extra
/// storage cell for its error pointer.
pub struct InvokeState<'a> {
    cache: &'a CallableCache,
    env: &'a Arc<MarshalEnv>,
    script_args: &'a [Value],
    in_args: Vec<NativeArg>,
    out_storage: Box<[NativeArg]>,
    cleanup_data: Vec<CleanupData>,
    /// Slots whose `convert_in` succeeded and still owe a cleanup
    converted: BitVec,
}

impl<'a> InvokeState<'a> {
    /// State for a script-to-native call
    pub fn new(cache: &'a CallableCache, env: &'a Arc<MarshalEnv>, script_args: &'a [Value]) -> Self {
        let n = cache.args.len();
        let n_storage = n + usize::from(cache.throws);
        let mut out_storage = vec![NativeArg::zeroed(); n_storage].into_boxed_slice();
        let mut in_args = vec![NativeArg::zeroed(); n_storage];

        let base = out_storage.as_mut_ptr();
        for (i, arg) in cache.args.iter().enumerate() {
            if arg.direction.is_to_script() {
                // SAFETY: i < n_storage
                in_args[i] = NativeArg::from_ptr(unsafe { base.add(i) });
            }
        }
        if cache.throws {
            // SAFETY: n < n_storage
            in_args[n] = NativeArg::from_ptr(unsafe { base.add(n) });
        }

        Self {
            cache,
            env,
            script_args,
            in_args,
            out_storage,
            cleanup_data: (0..n).map(|_| CleanupData::None).collect(),
            converted: bitvec![0; n],
        }
    }

    /// State for a native-to-script dispatch through a closure
    ///
    /// `cache` has reversed directions: slots native code passes in are
    /// `ToScript`, pointers it expects to be filled are `FromScript`.
    pub fn for_dispatch(cache: &'a CallableCache, env: &'a Arc<MarshalEnv>, native_args: &[NativeArg]) -> Self {
        let n = cache.args.len();
        let in_args: Vec<NativeArg> = (0..n)
            .map(|i| native_args.get(i).copied().unwrap_or_default())
            .collect();
        let out_storage: Box<[NativeArg]> = cache
            .args
            .iter()
            .zip(in_args.iter())
            .map(|(arg, native)| match arg.direction {
                Direction::ToScript => *native,
                Direction::Bidirectional if !native.is_null() => {
                    // SAFETY: native code passes a valid pointer for inout slots
                    unsafe { NativeArg::read_from(native.pointer() as *const u8, arg.type_desc.storage_size()) }
                }
                _ => NativeArg::zeroed(),
            })
            .collect();

        Self {
            cache,
            env,
            script_args: &[],
            in_args,
            out_storage,
            cleanup_data: (0..n).map(|_| CleanupData::None).collect(),
            converted: bitvec![0; n],
        }
    }

    #[inline]
    pub fn cache(&self) -> &'a CallableCache {
        self.cache
    }

    #[inline]
    pub fn env(&self) -> &'a Arc<MarshalEnv> {
        self.env
    }

    /// Script argument at `index`; omitted and placeholder arguments are `None`
    pub fn script_arg(&self, index: usize) -> Option<&'a Value> {
        self.script_args.get(index).filter(|v| !v.is_default())
    }

    pub fn script_args(&self) -> &'a [Value] {
        self.script_args
    }

    /// Current value of native slot `index`, looking through out pointers
    pub fn slot_value(&self, index: usize) -> NativeArg {
        match self.cache.args.get(index) {
            Some(arg) if arg.direction.is_to_script() => self.out_storage[index],
            Some(_) => self.in_args[index],
            None => NativeArg::zeroed(),
        }
    }

    /// Fill native slot `index`; out and inout slots are written through
    pub fn set_slot_value(&mut self, index: usize, value: NativeArg) {
        match self.cache.args.get(index) {
            Some(arg) if arg.direction.is_to_script() => self.out_storage[index] = value,
            Some(_) => self.in_args[index] = value,
            None => {}
        }
    }

    /// Record a successful `convert_in` for slot `index`
    pub(crate) fn store_converted(&mut self, index: usize, native: NativeArg, data: CleanupData) {
        self.set_slot_value(index, native);
        self.cleanup_data[index] = data;
        self.converted.set(index, true);
    }

    /// Buffer handed to the backend, including the trailing error slot
    pub(crate) fn native_args_mut(&mut self) -> &mut [NativeArg] {
        &mut self.in_args
    }

    /// Error raised by a throwing callable, if any
    pub fn take_error(&mut self) -> Option<NativeError> {
        if !self.cache.throws {
            return None;
        }
        let slot = self.out_storage.len() - 1;
        let ptr = self.out_storage[slot].pointer() as *mut NativeError;
        self.out_storage[slot] = NativeArg::null();
        // SAFETY: only `NativeError::raise` stores into the error slot
        unsafe { NativeError::take(ptr) }
    }

    /// Run cleanup for every converted slot, last converted first
    pub(crate) fn cleanup(&mut self, was_processed: bool) {
        let cache = self.cache;
        let pending: Vec<usize> = self.converted.iter_ones().collect();
        for index in pending.into_iter().rev() {
            self.converted.set(index, false);
            let data = std::mem::replace(&mut self.cleanup_data[index], CleanupData::None);
            cache.args[index].release(self, data, was_processed);
        }
    }

    /// Number of slots still owing a cleanup
    pub fn pending_cleanups(&self) -> usize {
        self.converted.count_ones()
    }
}

impl Drop for InvokeState<'_> {
    fn drop(&mut self) {
        // An error the caller never looked at still has to be freed
        drop(self.take_error());
    }
}
