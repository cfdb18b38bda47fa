//! Per-argument conversion plan

use super::CallableCache;
use crate::core::{Direction, NativeArg, ScopeType, Transfer, TypeDescriptor, Value};
use crate::errors::{MarshalError, Result};
use crate::introspection::InterfaceInfo;
use crate::invoke::InvokeState;
use crate::marshal::{classify, CleanupData, CleanupFn, ConvertInFn, ConvertOutFn, MarshalFamily};
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;

/// Role an ArgCache plays inside its callable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgMeta {
    /// Ordinary argument taken from the script argument list
    Normal,
    /// Implicit receiver of a method or vfunc
    Instance,
    Return,
    /// Hidden slot filled while processing its parent (length, destroy notify)
    Child,
    /// Slot filled by its parent from a script-visible argument (user data)
    ChildWithScriptArg,
    /// User-data parameter of a callback signature, replaced by the closure's data
    ClosureData,
    /// Element type of a container
    Element,
}

/// Kind of relation from a parent argument to a child slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkRole {
    Length,
    UserData,
    DestroyNotify,
}

/// Relation to another slot, stored as a native argument index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChildLink {
    pub role: LinkRole,
    pub target: usize,
}

/// Precomputed description of one native argument slot
#[derive(Clone)]
pub struct ArgCache {
    pub name: String,
    pub meta: ArgMeta,
    pub direction: Direction,
    pub transfer: Transfer,
    pub type_desc: TypeDescriptor,
    pub family: MarshalFamily,
    /// Position in the script argument list; `None` for hidden slots
    pub script_arg_index: Option<usize>,
    /// Position in the native argument buffer; `None` for return values and elements
    pub native_arg_index: Option<usize>,
    pub has_default: bool,
    pub allow_none: bool,
    pub scope: ScopeType,
    pub links: SmallVec<[ChildLink; 2]>,
    pub convert_in: Option<ConvertInFn>,
    pub convert_out: Option<ConvertOutFn>,
    pub cleanup: Option<CleanupFn>,
    /// Element caches: one for arrays and lists, key and value for hash tables
    pub items: Vec<ArgCache>,
    /// Signature of a callback argument, with directions seen from the callee
    pub callback: Option<Arc<CallableCache>>,
}

impl ArgCache {
    /// Classify `ty` and resolve its marshaler entry points
    pub fn new(
        name: impl Into<String>,
        ty: &TypeDescriptor,
        direction: Direction,
        transfer: Transfer,
        meta: ArgMeta,
    ) -> Result<Self> {
        let family = classify(ty)?;
        let marshaler = family.marshaler();

        let items = match family {
            MarshalFamily::CArray | MarshalFamily::SizedArray | MarshalFamily::List => {
                let element = ty
                    .element()
                    .ok_or_else(|| MarshalError::unsupported(ty.display_name()))?;
                vec![Self::for_element(element, direction, transfer.for_elements())?]
            }
            MarshalFamily::Hash => {
                let (key, value) = ty
                    .hash_params()
                    .ok_or_else(|| MarshalError::unsupported(ty.display_name()))?;
                vec![
                    Self::for_element(key, direction, transfer.for_elements())?,
                    Self::for_element(value, direction, transfer.for_elements())?,
                ]
            }
            _ => Vec::new(),
        };

        // Destroy notifiers are filled with static functions, never closures
        let callback = match (&ty.interface, meta) {
            (Some(InterfaceInfo::Callback(info)), m) if m != ArgMeta::Child => {
                Some(Arc::new(CallableCache::build_callback(info)?))
            }
            _ => None,
        };

        Ok(Self {
            name: name.into(),
            meta,
            direction,
            transfer,
            type_desc: ty.clone(),
            family,
            script_arg_index: None,
            native_arg_index: None,
            has_default: false,
            allow_none: false,
            scope: ScopeType::Call,
            links: SmallVec::new(),
            convert_in: if direction.is_from_script() { marshaler.convert_in } else { None },
            convert_out: if direction.is_to_script() { marshaler.convert_out } else { None },
            cleanup: if direction.is_from_script() { marshaler.cleanup } else { None },
            items,
            callback,
        })
    }

    fn for_element(ty: &TypeDescriptor, direction: Direction, transfer: Transfer) -> Result<Self> {
        let mut cache = Self::new("item", ty, direction, transfer, ArgMeta::Element)?;
        cache.allow_none = true;
        Ok(cache)
    }

    /// Target slot of the first link with `role`
    #[inline]
    pub fn link(&self, role: LinkRole) -> Option<usize> {
        self.links.iter().find(|l| l.role == role).map(|l| l.target)
    }

    /// Whether the script argument list supplies this slot directly
    #[inline]
    pub fn is_script_visible(&self) -> bool {
        self.script_arg_index.is_some()
    }

    /// Hidden or parent-filled slots are skipped by the Invoker's main passes
    #[inline]
    pub fn is_child(&self) -> bool {
        matches!(self.meta, ArgMeta::Child | ArgMeta::ChildWithScriptArg)
    }

    pub fn element(&self) -> Result<&ArgCache> {
        self.items
            .first()
            .ok_or_else(|| MarshalError::unsupported(self.type_desc.display_name()))
    }

    pub fn hash_elements(&self) -> Result<(&ArgCache, &ArgCache)> {
        match self.items.as_slice() {
            [key, value] => Ok((key, value)),
            _ => Err(MarshalError::unsupported(self.type_desc.display_name())),
        }
    }

    /// Run `convert_in`
    pub fn to_native(&self, state: &mut InvokeState<'_>, value: &Value) -> Result<(NativeArg, CleanupData)> {
        match self.convert_in {
            Some(convert) => convert(state, self, value),
            None => Err(MarshalError::invalid_config(format!(
                "'{}' cannot be converted to native",
                self.name
            ))),
        }
    }

    /// Run `convert_out`
    pub fn to_script(&self, state: &InvokeState<'_>, native: NativeArg) -> Result<Value> {
        match self.convert_out {
            Some(convert) => convert(state, self, native),
            None => Err(MarshalError::invalid_config(format!(
                "'{}' cannot be converted to a script value",
                self.name
            ))),
        }
    }

    /// Run `cleanup`, if the family has one
    pub fn release(&self, state: &InvokeState<'_>, data: CleanupData, was_processed: bool) {
        if let Some(cleanup) = self.cleanup {
            cleanup(state, self, data, was_processed);
        }
    }
}

impl fmt::Debug for ArgCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArgCache")
            .field("name", &self.name)
            .field("meta", &self.meta)
            .field("direction", &self.direction)
            .field("transfer", &self.transfer)
            .field("type", &self.type_desc.display_name())
            .field("family", &self.family)
            .field("script_arg_index", &self.script_arg_index)
            .field("native_arg_index", &self.native_arg_index)
            .field("links", &self.links)
            .field("convert_in", &self.convert_in.is_some())
            .field("convert_out", &self.convert_out.is_some())
            .field("cleanup", &self.cleanup.is_some())
            .finish()
    }
}
