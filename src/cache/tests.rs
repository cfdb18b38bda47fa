//! Tests for cache construction

use super::*;
use crate::core::{ArrayLength, Direction, ScopeType, Transfer, TypeDescriptor, TypeTag};
use crate::errors::ErrorKind;
use crate::introspection::{
    ArgInfo, CallableInfo, InMemoryRepository, InterfaceInfo, ObjectInfo, Repository,
};
use crate::marshal::{MarshalFamily, WrapperFuncs};
use std::sync::Arc;

fn int_array_with_length(length_index: usize) -> TypeDescriptor {
    TypeDescriptor::c_array(TypeTag::Int32.into(), ArrayLength::Indexed(length_index))
}

fn callback_info() -> Arc<CallableInfo> {
    Arc::new(
        CallableInfo::callback("Test", "Func")
            .arg(ArgInfo::new("value", TypeTag::Int32))
            .arg(ArgInfo::new("data", TypeDescriptor::pointer()).with_closure(1))
            .returns(TypeTag::Boolean, Transfer::Nothing),
    )
}

fn callback_type() -> TypeDescriptor {
    TypeDescriptor::interface(InterfaceInfo::Callback(callback_info()))
}

#[test]
fn test_hidden_length_argument() {
    let info = CallableInfo::function("Test", "sum")
        .arg(ArgInfo::new("values", int_array_with_length(1)))
        .arg(ArgInfo::new("n_values", TypeTag::UInt32));
    let cache = CallableCache::build(&info).unwrap();

    assert_eq!(cache.n_script_args, 1);
    assert_eq!(cache.script_arg_names(), vec!["values"]);
    assert_eq!(cache.args[0].link(LinkRole::Length), Some(1));
    assert_eq!(cache.args[1].meta, ArgMeta::Child);
    assert!(cache.args[1].script_arg_index.is_none());
}

#[test]
fn test_input_length_of_output_array_stays_visible() {
    let info = CallableInfo::function("Test", "read")
        .arg(ArgInfo::new("buffer", int_array_with_length(1)).out())
        .arg(ArgInfo::new("count", TypeTag::UInt32));
    let cache = CallableCache::build(&info).unwrap();

    assert_eq!(cache.args[1].meta, ArgMeta::Normal);
    assert_eq!(cache.script_arg_names(), vec!["count"]);
    assert_eq!(cache.n_results(), 1);
}

#[test]
fn test_shared_length_argument() {
    let info = CallableInfo::function("Test", "zip")
        .arg(ArgInfo::new("keys", int_array_with_length(2)))
        .arg(ArgInfo::new("values", int_array_with_length(2)))
        .arg(ArgInfo::new("n", TypeTag::UInt32));
    let cache = CallableCache::build(&info).unwrap();
    assert_eq!(cache.n_script_args, 2);
    assert_eq!(cache.args[2].meta, ArgMeta::Child);
}

#[test]
fn test_return_length_links_to_out_argument() {
    let info = CallableInfo::function("Test", "list")
        .arg(ArgInfo::new("n_items", TypeTag::UInt32).out())
        .returns(int_array_with_length(0), Transfer::Everything);
    let cache = CallableCache::build(&info).unwrap();

    assert_eq!(cache.return_cache.link(LinkRole::Length), Some(0));
    assert_eq!(cache.args[0].meta, ArgMeta::Child);
    assert_eq!(cache.n_results(), 1);
    assert!(cache.child_links().contains(&(
        None,
        ChildLink {
            role: LinkRole::Length,
            target: 0
        }
    )));
}

#[test]
fn test_length_index_out_of_range() {
    let info = CallableInfo::function("Test", "broken").arg(ArgInfo::new("values", int_array_with_length(4)));
    let err = CallableCache::build(&info).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::InvalidArgumentConfig { .. }));
    assert_eq!(err.callable.as_deref(), Some("Test.broken"));
}

#[test]
fn test_self_referencing_length_is_invalid() {
    let info = CallableInfo::function("Test", "broken").arg(ArgInfo::new("values", int_array_with_length(0)));
    let err = CallableCache::build(&info).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::InvalidArgumentConfig { .. }));
}

#[test]
fn test_conflicting_child_roles_are_invalid() {
    let info = CallableInfo::function("Test", "broken")
        .arg(ArgInfo::new("values", int_array_with_length(2)))
        .arg(ArgInfo::new("func", callback_type()).with_closure(2))
        .arg(ArgInfo::new("n", TypeTag::UInt32));
    let err = CallableCache::build(&info).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::InvalidArgumentConfig { .. }));
}

#[test]
fn test_callback_children() {
    let info = CallableInfo::function("Test", "foreach")
        .arg(ArgInfo::new("func", callback_type()).with_closure(1).with_destroy(2).with_scope(ScopeType::Notified))
        .arg(ArgInfo::new("user_data", TypeDescriptor::pointer()))
        .arg(ArgInfo::new("notify", TypeDescriptor::pointer()));
    let cache = CallableCache::build(&info).unwrap();

    assert_eq!(cache.args[0].family, MarshalFamily::Callback);
    assert_eq!(cache.args[0].link(LinkRole::UserData), Some(1));
    assert_eq!(cache.args[0].link(LinkRole::DestroyNotify), Some(2));
    assert_eq!(cache.args[0].scope, ScopeType::Notified);
    assert_eq!(cache.args[1].meta, ArgMeta::ChildWithScriptArg);
    assert!(cache.args[1].has_default);
    assert_eq!(cache.args[2].meta, ArgMeta::Child);
    assert_eq!(cache.script_arg_names(), vec!["func", "user_data"]);

    let signature = cache.args[0].callback.as_ref().unwrap();
    assert_eq!(signature.args[0].direction, Direction::ToScript);
    assert_eq!(signature.args[1].meta, ArgMeta::ClosureData);
    assert_eq!(signature.return_cache.direction, Direction::FromScript);
}

#[test]
fn test_method_instance_slot() {
    let object = Arc::new(ObjectInfo::new("Test", "Widget", WrapperFuncs::NONE));
    let info = CallableInfo::method("Test", "resize", InterfaceInfo::Object(object))
        .arg(ArgInfo::new("values", int_array_with_length(1)))
        .arg(ArgInfo::new("n", TypeTag::Int32));
    let cache = CallableCache::build(&info).unwrap();

    assert!(cache.has_instance());
    assert_eq!(cache.n_native_args(), 3);
    assert_eq!(cache.args[0].meta, ArgMeta::Instance);
    // Links address native slots, shifted past the instance
    assert_eq!(cache.args[1].link(LinkRole::Length), Some(2));
    assert_eq!(cache.args[1].script_arg_index, Some(0));
    assert_eq!(cache.args[2].native_arg_index, Some(2));
}

#[test]
fn test_optional_arguments_have_defaults() {
    let info = CallableInfo::function("Test", "open")
        .arg(ArgInfo::new("path", TypeTag::Filename))
        .arg(ArgInfo::new("flags", TypeTag::Int32).optional());
    let cache = CallableCache::build(&info).unwrap();
    assert!(!cache.args[0].has_default);
    assert!(cache.args[1].has_default);
    assert!(cache.args[1].allow_none);
}

#[test]
fn test_out_arguments_count_as_results() {
    let info = CallableInfo::function("Test", "divmod")
        .arg(ArgInfo::new("a", TypeTag::Int32))
        .arg(ArgInfo::new("b", TypeTag::Int32))
        .arg(ArgInfo::new("quotient", TypeTag::Int32).out())
        .arg(ArgInfo::new("remainder", TypeTag::Int32).out())
        .returns(TypeTag::Boolean, Transfer::Nothing)
        .skip_return();
    let cache = CallableCache::build(&info).unwrap();
    assert_eq!(cache.n_script_args, 2);
    assert_eq!(cache.n_results(), 2);
}

#[test]
fn test_unsupported_argument_type_is_attributed() {
    let iface = TypeDescriptor::interface(InterfaceInfo::Interface {
        namespace: "Test".into(),
        name: "Iface".into(),
    });
    let info = CallableInfo::function("Test", "take").arg(ArgInfo::new("thing", iface));
    let err = CallableCache::build(&info).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::UnsupportedType { .. }));
    assert_eq!(err.argument.as_deref(), Some("thing"));
}

#[test]
fn test_build_is_deterministic() {
    let info = CallableInfo::function("Test", "foreach")
        .arg(ArgInfo::new("func", callback_type()).with_closure(1))
        .arg(ArgInfo::new("user_data", TypeDescriptor::pointer()));
    let a = CallableCache::build(&info).unwrap();
    let b = CallableCache::build(&info).unwrap();
    assert_eq!(format!("{:?}", a), format!("{:?}", b));
    assert_eq!(a.child_links(), b.child_links());
}

#[test]
fn test_registry_memoises_plans() {
    let registry = CacheRegistry::new();
    let info = CallableInfo::function("Test", "noop");
    let a = registry.get_or_build(&info).unwrap();
    let b = registry.get_or_build(&info).unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert!(registry.contains("Test.noop"));
    assert_eq!(registry.len(), 1);

    registry.clear();
    assert!(registry.is_empty());
}

#[test]
fn test_registry_memoises_failures() {
    let registry = CacheRegistry::new();
    let info = CallableInfo::function("Test", "broken").arg(ArgInfo::new("values", int_array_with_length(9)));
    let first = registry.get_or_build(&info).unwrap_err();
    let second = registry.get_or_build(&info).unwrap_err();
    assert_eq!(first, second);
}

#[test]
fn test_registry_lookup_through_repository() {
    let repo = InMemoryRepository::new();
    repo.register_callable(CallableInfo::function("Test", "ping"));
    let registry = CacheRegistry::new();
    assert_eq!(registry.lookup(&repo, "Test", "ping").unwrap().symbol, "test_ping");

    let err = registry.lookup(&repo, "Test", "pong").unwrap_err();
    assert!(matches!(err.kind, ErrorKind::NotFound { .. }));
    assert!(repo.find_callable("Test", "ping").is_ok());
}
