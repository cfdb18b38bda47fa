//! Per-callable conversion plan

use super::arg::{ArgCache, ArgMeta, ChildLink, LinkRole};
use crate::core::{ArrayLength, Direction, Transfer, TypeDescriptor, TypeTag};
use crate::errors::{MarshalError, Result};
use crate::introspection::{ArgInfo, CallableInfo, FunctionKind, InterfaceInfo};
use crate::logging::log_cache_built;
use crate::marshal::MarshalFamily;
use crate::stats;
use smallvec::SmallVec;

/// Ordered ArgCaches of one callable plus script/native index bookkeeping
///
/// Immutable once built and shared read-only between concurrent calls.
#[derive(Debug, Clone)]
pub struct CallableCache {
    /// `Namespace.name`, used in diagnostics
    pub name: String,
    pub symbol: String,
    pub kind: FunctionKind,
    /// Native argument order; the instance slot comes first for methods
    pub args: Vec<ArgCache>,
    pub return_cache: ArgCache,
    /// Number of script-visible input arguments
    pub n_script_args: usize,
    /// A trailing error slot follows the declared arguments
    pub throws: bool,
    pub skip_return: bool,
}

/// Child role assigned to a declared argument during the first pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ChildMark {
    role: LinkRole,
    parent: usize,
}

fn mark(
    marks: &mut [Option<ChildMark>],
    n: usize,
    parent: usize,
    target: usize,
    role: LinkRole,
) -> Result<()> {
    if target >= n {
        return Err(MarshalError::invalid_config(format!(
            "{:?} argument index {} out of range ({} arguments)",
            role, target, n
        )));
    }
    if target == parent {
        return Err(MarshalError::invalid_config(format!(
            "argument {} cannot be its own {:?} argument",
            parent, role
        )));
    }
    match marks[target] {
        // Several arrays may share one length argument
        Some(existing) if existing.role == role && role == LinkRole::Length => Ok(()),
        Some(existing) => Err(MarshalError::invalid_config(format!(
            "argument {} is both {:?} of {} and {:?} of {}",
            target, existing.role, existing.parent, role, parent
        ))),
        None => {
            marks[target] = Some(ChildMark { role, parent });
            Ok(())
        }
    }
}

fn length_index(ty: &TypeDescriptor) -> Option<usize> {
    match ty.array.as_ref().and_then(|a| a.length) {
        Some(ArrayLength::Indexed(index)) if ty.tag == TypeTag::Array => Some(index),
        _ => None,
    }
}

fn is_callback(ty: &TypeDescriptor) -> bool {
    matches!(ty.interface, Some(InterfaceInfo::Callback(_)))
}

/// First pass: find which declared arguments are children of which parents
fn resolve_children(info: &CallableInfo) -> Result<Vec<Option<ChildMark>>> {
    let n = info.args.len();
    let mut marks = vec![None; n];
    // Marker for the return value as parent
    let return_parent = usize::MAX;

    if let Some(len) = length_index(&info.return_type) {
        mark(&mut marks, n, return_parent, len, LinkRole::Length)?;
    }

    for (i, arg) in info.args.iter().enumerate() {
        if let Some(len) = length_index(&arg.ty) {
            mark(&mut marks, n, i, len, LinkRole::Length)?;
        }
        if is_callback(&arg.ty) {
            if let Some(closure) = arg.closure {
                mark(&mut marks, n, i, closure, LinkRole::UserData)?;
            }
            if let Some(destroy) = arg.destroy {
                mark(&mut marks, n, i, destroy, LinkRole::DestroyNotify)?;
            }
        }
    }

    // Children are leaves, which keeps links acyclic
    for (i, arg) in info.args.iter().enumerate() {
        if marks[i].is_some()
            && (length_index(&arg.ty).is_some() || (is_callback(&arg.ty) && (arg.closure.is_some() || arg.destroy.is_some())))
        {
            return Err(MarshalError::invalid_config(format!(
                "argument '{}' is a child and has children of its own",
                arg.name
            )));
        }
    }
    Ok(marks)
}

fn links_for(ty: &TypeDescriptor, arg: Option<&ArgInfo>, offset: usize) -> SmallVec<[ChildLink; 2]> {
    let mut links = SmallVec::new();
    if let Some(len) = length_index(ty) {
        links.push(ChildLink {
            role: LinkRole::Length,
            target: len + offset,
        });
    }
    if let Some(arg) = arg.filter(|a| is_callback(&a.ty)) {
        if let Some(closure) = arg.closure {
            links.push(ChildLink {
                role: LinkRole::UserData,
                target: closure + offset,
            });
        }
        if let Some(destroy) = arg.destroy {
            links.push(ChildLink {
                role: LinkRole::DestroyNotify,
                target: destroy + offset,
            });
        }
    }
    links
}

impl CallableCache {
    /// Build the plan for a function, method, constructor or vfunc
    pub fn build(info: &CallableInfo) -> Result<Self> {
        Self::build_inner(info, info.kind == FunctionKind::Callback)
    }

    /// Build the plan for a callback type; native code is the caller, so
    /// argument directions are reversed
    pub fn build_callback(info: &CallableInfo) -> Result<Self> {
        Self::build_inner(info, true)
    }

    fn build_inner(info: &CallableInfo, reversed: bool) -> Result<Self> {
        let name = info.qualified_name();
        let kind = if reversed { FunctionKind::Callback } else { info.kind };
        let cache = Self::assemble(info, kind, reversed).map_err(|e| e.with_callable(name.clone()))?;
        log_cache_built(&name, cache.args.len(), cache.n_script_args);
        stats::record_cache_built();
        Ok(cache)
    }

    fn assemble(info: &CallableInfo, kind: FunctionKind, reversed: bool) -> Result<Self> {
        let marks = resolve_children(info)?;
        let offset = usize::from(kind.has_instance());
        let mut args = Vec::with_capacity(info.args.len() + offset);

        if kind.has_instance() {
            let container = info.container.as_ref().ok_or_else(|| {
                MarshalError::invalid_config("method without a containing type")
            })?;
            let mut instance = ArgCache::new(
                "self",
                &TypeDescriptor::interface(container.clone()),
                Direction::FromScript,
                Transfer::Nothing,
                ArgMeta::Instance,
            )?;
            instance.native_arg_index = Some(0);
            args.push(instance);
        }

        let return_direction = if reversed { Direction::FromScript } else { Direction::ToScript };
        for (i, arg) in info.args.iter().enumerate() {
            let direction = if reversed { arg.direction.reversed() } else { arg.direction };
            let meta = match marks[i] {
                Some(ChildMark { role: LinkRole::UserData, .. }) => ArgMeta::ChildWithScriptArg,
                Some(ChildMark { role: LinkRole::Length, parent }) => {
                    // An input length for an output array is supplied by the script
                    let parent_dir = if parent == usize::MAX {
                        return_direction
                    } else if reversed {
                        info.args[parent].direction.reversed()
                    } else {
                        info.args[parent].direction
                    };
                    if direction == Direction::FromScript && parent_dir == Direction::ToScript {
                        ArgMeta::Normal
                    } else {
                        ArgMeta::Child
                    }
                }
                Some(ChildMark { .. }) => ArgMeta::Child,
                None if reversed && arg.closure == Some(i) && !is_callback(&arg.ty) => ArgMeta::ClosureData,
                None => ArgMeta::Normal,
            };

            let mut cache = ArgCache::new(arg.name.clone(), &arg.ty, direction, arg.transfer, meta)
                .map_err(|e| e.with_argument(arg.name.clone(), i + offset))?;
            cache.native_arg_index = Some(i + offset);
            cache.allow_none = arg.may_be_null || arg.optional;
            cache.has_default = arg.optional || meta == ArgMeta::ChildWithScriptArg;
            cache.scope = arg.scope;
            cache.links = links_for(&arg.ty, Some(arg), offset);
            args.push(cache);
        }

        let mut return_cache = ArgCache::new(
            "return value",
            &info.return_type,
            return_direction,
            info.return_transfer,
            ArgMeta::Return,
        )
        .map_err(|e| e.with_argument("return value", None))?;
        return_cache.allow_none = info.may_return_null;
        return_cache.links = links_for(&info.return_type, None, offset);

        // Script indices are contiguous over visible input slots in native order
        let mut n_script_args = 0;
        for cache in args.iter_mut() {
            let visible = matches!(cache.meta, ArgMeta::Normal | ArgMeta::ChildWithScriptArg)
                && cache.direction.is_from_script();
            if visible {
                cache.script_arg_index = Some(n_script_args);
                n_script_args += 1;
            }
        }

        Ok(Self {
            name: info.qualified_name(),
            symbol: info.symbol.clone(),
            kind,
            args,
            return_cache,
            n_script_args,
            throws: info.throws,
            skip_return: info.skip_return,
        })
    }

    /// Number of native argument slots, without the error slot
    #[inline]
    pub fn n_native_args(&self) -> usize {
        self.args.len()
    }

    #[inline]
    pub fn has_instance(&self) -> bool {
        self.kind.has_instance()
    }

    /// Names of the script-visible arguments, in script order
    pub fn script_arg_names(&self) -> Vec<&str> {
        let mut visible: Vec<(usize, &str)> = self
            .args
            .iter()
            .filter_map(|a| a.script_arg_index.map(|i| (i, a.name.as_str())))
            .collect();
        visible.sort_unstable_by_key(|(i, _)| *i);
        visible.into_iter().map(|(_, name)| name).collect()
    }

    /// Every child link as (parent native index, link); the return value
    /// reports as `None`
    pub fn child_links(&self) -> Vec<(Option<usize>, ChildLink)> {
        self.args
            .iter()
            .flat_map(|a| a.links.iter().map(move |l| (a.native_arg_index, *l)))
            .chain(self.return_cache.links.iter().map(|l| (None, *l)))
            .collect()
    }

    /// Number of script-visible results: return value plus out arguments
    pub fn n_results(&self) -> usize {
        let ret = usize::from(self.has_return_value());
        ret + self
            .args
            .iter()
            .filter(|a| a.meta == ArgMeta::Normal && a.direction.is_to_script())
            .count()
    }

    pub(crate) fn has_return_value(&self) -> bool {
        !self.skip_return && self.return_cache.family != MarshalFamily::Void
    }

    pub fn arg(&self, index: usize) -> Option<&ArgCache> {
        self.args.get(index)
    }

    /// Mutable slot access, for bindings that override individual marshalers
    pub fn arg_mut(&mut self, index: usize) -> Option<&mut ArgCache> {
        self.args.get_mut(index)
    }
}
