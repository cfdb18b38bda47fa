//! Tests for classification and the marshaler families

use super::basic::{enum_to_native, integer_range, integer_to_native, native_to_value, value_to_native};
use super::*;
use crate::cache::CallableCache;
use crate::core::{ArrayLength, Direction, Transfer, TypeDescriptor};
use crate::errors::ErrorKind;
use crate::introspection::{ArgInfo, CallableInfo, EnumInfo, FieldInfo, ObjectInfo, StructInfo};
use crate::invoke::{FunctionTable, MarshalEnv};
use proptest::prelude::*;

fn env() -> Arc<MarshalEnv> {
    Arc::new(MarshalEnv::new(Arc::new(FunctionTable::new())))
}

fn single_arg(ty: TypeDescriptor) -> CallableCache {
    let info = CallableInfo::function("Test", "take").arg(ArgInfo::new("value", ty));
    CallableCache::build(&info).unwrap()
}

fn convert(cache: &CallableCache, value: &Value) -> Result<NativeArg> {
    let env = env();
    let mut state = InvokeState::new(cache, &env, &[]);
    let (native, data) = cache.args[0].to_native(&mut state, value)?;
    cache.args[0].release(&state, data, false);
    Ok(native)
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

#[test]
fn test_classify_scalars_and_strings() {
    assert_eq!(classify(&TypeTag::Int32.into()).unwrap(), MarshalFamily::Basic);
    assert_eq!(classify(&TypeTag::Boolean.into()).unwrap(), MarshalFamily::Basic);
    assert_eq!(classify(&TypeTag::Void.into()).unwrap(), MarshalFamily::Void);
    assert_eq!(classify(&TypeDescriptor::pointer()).unwrap(), MarshalFamily::Pointer);
    assert_eq!(classify(&TypeTag::Filename.into()).unwrap(), MarshalFamily::Utf8);
}

#[test]
fn test_classify_containers() {
    let strv = TypeDescriptor::c_array(TypeTag::Utf8.into(), ArrayLength::ZeroTerminated);
    assert_eq!(classify(&strv).unwrap(), MarshalFamily::CArray);

    let garray = TypeDescriptor::sized_array(TypeTag::Int32.into());
    assert_eq!(classify(&garray).unwrap(), MarshalFamily::SizedArray);

    let list = TypeDescriptor::list(TypeTag::GSList, TypeTag::Utf8.into());
    assert_eq!(classify(&list).unwrap(), MarshalFamily::List);

    let hash = TypeDescriptor::hash(TypeTag::Utf8.into(), TypeTag::Int32.into());
    assert_eq!(classify(&hash).unwrap(), MarshalFamily::Hash);
}

#[test]
fn test_classify_c_array_without_length_is_invalid() {
    let mut ty = TypeDescriptor::c_array(TypeTag::Int32.into(), ArrayLength::ZeroTerminated);
    if let Some(array) = ty.array.as_mut() {
        array.length = None;
    }
    let err = classify(&ty).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::InvalidArgumentConfig { .. }));
}

#[test]
fn test_classify_interfaces() {
    let object = Arc::new(ObjectInfo::new("Test", "Widget", WrapperFuncs::NONE));
    let ty = TypeDescriptor::interface(InterfaceInfo::Object(object));
    assert_eq!(classify(&ty).unwrap(), MarshalFamily::Object);

    let foreign = Arc::new(StructInfo::new("cairo", "Context", 8).foreign());
    let ty = TypeDescriptor::interface(InterfaceInfo::Struct(foreign));
    assert_eq!(classify(&ty).unwrap(), MarshalFamily::Foreign);

    let abstract_iface = TypeDescriptor::interface(InterfaceInfo::Interface {
        namespace: "Test".into(),
        name: "Iface".into(),
    });
    let err = classify(&abstract_iface).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::UnsupportedType { .. }));
}

#[test]
fn test_pointer_families() {
    assert!(!MarshalFamily::Basic.is_pointer());
    assert!(!MarshalFamily::Flags.is_pointer());
    assert!(MarshalFamily::Utf8.is_pointer());
    assert!(MarshalFamily::Callback.is_pointer());
}

// ---------------------------------------------------------------------------
// Scalars
// ---------------------------------------------------------------------------

#[test]
fn test_integer_ranges() {
    let cases: [(TypeTag, i128, i128); 8] = [
        (TypeTag::Int8, i8::MIN as i128, i8::MAX as i128),
        (TypeTag::UInt8, 0, u8::MAX as i128),
        (TypeTag::Int16, i16::MIN as i128, i16::MAX as i128),
        (TypeTag::UInt16, 0, u16::MAX as i128),
        (TypeTag::Int32, i32::MIN as i128, i32::MAX as i128),
        (TypeTag::UInt32, 0, u32::MAX as i128),
        (TypeTag::Int64, i64::MIN as i128, i64::MAX as i128),
        (TypeTag::UInt64, 0, u64::MAX as i128),
    ];

    for (tag, min, max) in cases {
        assert_eq!(integer_range(tag), (min, max), "{}", tag);

        for edge in [min, max] {
            let native = integer_to_native(tag, &Value::Int(edge)).unwrap();
            assert_eq!(native_to_value(tag, native), Value::Int(edge), "{} at {}", tag, edge);
        }

        for outside in [min - 1, max + 1] {
            let err = integer_to_native(tag, &Value::Int(outside)).unwrap_err();
            assert!(err.is_overflow(), "{} accepted {}", tag, outside);
        }
    }
}

#[test]
fn test_uint64_limits() {
    let max = integer_to_native(TypeTag::UInt64, &Value::Int(u64::MAX as i128)).unwrap();
    assert_eq!(max.bits(), u64::MAX);

    let err = integer_to_native(TypeTag::UInt64, &Value::Int(u64::MAX as i128 + 1)).unwrap_err();
    assert!(err.is_overflow());

    let err = integer_to_native(TypeTag::UInt64, &Value::Int(-1)).unwrap_err();
    assert!(err.is_overflow());
}

#[test]
fn test_int8_takes_single_character() {
    let native = integer_to_native(TypeTag::Int8, &Value::str("0")).unwrap();
    assert_eq!(native.to_integer(TypeTag::Int8), 48);

    let native = integer_to_native(TypeTag::UInt8, &Value::bytes(b"\xff")).unwrap();
    assert_eq!(native.to_integer(TypeTag::UInt8), 255);

    let err = integer_to_native(TypeTag::Int8, &Value::bytes(b"ab")).unwrap_err();
    assert!(err.is_type_error());

    // Wider integers never accept text
    assert!(integer_to_native(TypeTag::Int32, &Value::str("7")).unwrap_err().is_type_error());
}

#[test]
fn test_float_truncates_and_rejects_nan() {
    let native = integer_to_native(TypeTag::Int32, &Value::Float(3.9)).unwrap();
    assert_eq!(native.to_integer(TypeTag::Int32), 3);

    let err = integer_to_native(TypeTag::Int32, &Value::Float(f64::NAN)).unwrap_err();
    assert!(err.is_type_error());
}

#[test]
fn test_boolean_uses_truthiness() {
    let t = value_to_native(TypeTag::Boolean, &Value::str("x")).unwrap();
    let f = value_to_native(TypeTag::Boolean, &Value::list(vec![])).unwrap();
    assert_eq!(native_to_value(TypeTag::Boolean, t), Value::Bool(true));
    assert_eq!(native_to_value(TypeTag::Boolean, f), Value::Bool(false));
}

#[test]
fn test_float_range() {
    let native = value_to_native(TypeTag::Float, &Value::Int(2)).unwrap();
    assert_eq!(native_to_value(TypeTag::Float, native), Value::Float(2.0));

    let err = value_to_native(TypeTag::Float, &Value::Float(1e300)).unwrap_err();
    assert!(err.is_overflow());

    // Doubles take the full range, infinities included
    assert!(value_to_native(TypeTag::Double, &Value::Float(f64::INFINITY)).is_ok());
    assert!(value_to_native(TypeTag::Float, &Value::str("1.0")).unwrap_err().is_type_error());
}

#[test]
fn test_enum_validation() {
    let info = EnumInfo::new("Test", "Color").member("red", 0).member("green", 1);
    assert!(enum_to_native(&info, false, &Value::Int(1)).is_ok());

    let err = enum_to_native(&info, false, &Value::Int(5)).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::Value { .. }));
}

#[test]
fn test_flags_accept_member_combinations() {
    let info = EnumInfo::new("Test", "Mode").member("read", 1).member("write", 2);
    assert!(enum_to_native(&info, true, &Value::Int(3)).is_ok());
    assert!(enum_to_native(&info, true, &Value::Int(0)).is_ok());
    assert!(enum_to_native(&info, true, &Value::Int(4)).is_err());
}

proptest! {
    #[test]
    fn prop_int16_accepts_exactly_its_range(n in -100_000i64..100_000i64) {
        let result = integer_to_native(TypeTag::Int16, &Value::Int(n as i128));
        if (i16::MIN as i64..=i16::MAX as i64).contains(&n) {
            prop_assert_eq!(result.unwrap().to_integer(TypeTag::Int16), n as i128);
        } else {
            prop_assert!(result.unwrap_err().is_overflow());
        }
    }

    #[test]
    fn prop_uint32_rejects_negatives(n in i64::MIN..0i64) {
        let err = integer_to_native(TypeTag::UInt32, &Value::Int(n as i128)).unwrap_err();
        prop_assert!(err.is_overflow());
    }

    #[test]
    fn prop_int64_preserves_value(n in any::<i64>()) {
        let native = integer_to_native(TypeTag::Int64, &Value::Int(n as i128)).unwrap();
        prop_assert_eq!(native_to_value(TypeTag::Int64, native), Value::Int(n as i128));
    }
}

// ---------------------------------------------------------------------------
// Strings
// ---------------------------------------------------------------------------

#[test]
fn test_borrowed_string_points_into_value() {
    let cache = single_arg(TypeTag::Utf8.into());
    let env = env();
    let mut state = InvokeState::new(&cache, &env, &[]);
    let value = Value::str("hello");
    let (native, data) = cache.args[0].to_native(&mut state, &value).unwrap();
    match &value {
        Value::Str(text) => assert_eq!(native.pointer() as *const u8, text.as_ptr()),
        _ => unreachable!(),
    }
    assert!(matches!(data, CleanupData::Borrowed(_)));
    cache.args[0].release(&state, data, true);
}

#[test]
fn test_string_rejects_embedded_nul() {
    let cache = single_arg(TypeTag::Utf8.into());
    let err = convert(&cache, &Value::str("a\0b")).unwrap_err();
    assert!(err.is_type_error());
}

#[test]
fn test_string_rejects_invalid_utf8_bytes() {
    let cache = single_arg(TypeTag::Utf8.into());
    let err = convert(&cache, &Value::bytes(b"\xff\xfe")).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::Value { .. }));

    // Filenames are plain bytes
    let cache = single_arg(TypeTag::Filename.into());
    assert!(convert(&cache, &Value::bytes(b"\xff\xfe")).is_ok());
}

#[test]
fn test_none_needs_nullable() {
    let cache = single_arg(TypeTag::Utf8.into());
    assert!(convert(&cache, &Value::None).unwrap_err().is_type_error());

    let info = CallableInfo::function("Test", "take").arg(ArgInfo::new("value", TypeTag::Utf8).nullable());
    let cache = CallableCache::build(&info).unwrap();
    assert!(convert(&cache, &Value::None).unwrap().is_null());
}

// ---------------------------------------------------------------------------
// Containers
// ---------------------------------------------------------------------------

#[test]
fn test_fixed_array_length_mismatch() {
    let cache = single_arg(TypeDescriptor::c_array(TypeTag::Int32.into(), ArrayLength::Fixed(3)));
    let err = convert(&cache, &Value::list(vec![Value::Int(1), Value::Int(2)])).unwrap_err();
    match err.kind {
        ErrorKind::Value { reason } => assert_eq!(reason, "Must contain 3 items, not 2"),
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn test_array_element_error_keeps_its_kind() {
    let cache = single_arg(TypeDescriptor::c_array(TypeTag::UInt8.into(), ArrayLength::ZeroTerminated));
    let err = convert(&cache, &Value::list(vec![Value::Int(1), Value::Int(300)])).unwrap_err();
    assert!(err.is_overflow());
}

#[test]
fn test_zero_terminated_array_layout() {
    let cache = single_arg(TypeDescriptor::c_array(TypeTag::Int16.into(), ArrayLength::ZeroTerminated));
    let env = env();
    let mut state = InvokeState::new(&cache, &env, &[]);
    let value = Value::list(vec![Value::Int(7), Value::Int(8)]);
    let (native, data) = cache.args[0].to_native(&mut state, &value).unwrap();
    let ptr = native.pointer() as *const i16;
    unsafe {
        assert_eq!(*ptr, 7);
        assert_eq!(*ptr.add(1), 8);
        assert_eq!(*ptr.add(2), 0);
    }
    cache.args[0].release(&state, data, true);
}

#[test]
fn test_hash_requires_mapping() {
    let cache = single_arg(TypeDescriptor::hash(TypeTag::Utf8.into(), TypeTag::Int32.into()));
    assert!(convert(&cache, &Value::list(vec![])).unwrap_err().is_type_error());
    assert!(convert(&cache, &Value::dict(vec![(Value::str("k"), Value::Int(1))])).is_ok());
}

#[test]
fn test_array_view_exposes_memory() {
    let view = ArrayView::from_values(TypeTag::UInt16, &[Value::Int(1), Value::Int(2)]).unwrap();
    assert_eq!(view.format(), "H");
    assert_eq!(view.item_size(), 2);
    assert_eq!(view.as_bytes().len(), 4);
    assert_eq!(view.get(1), Value::Int(2));
    assert_eq!(view.get(2), Value::None);
    assert_eq!(view.to_list(), Value::list(vec![Value::Int(1), Value::Int(2)]));
    assert_eq!(view.refcount(), 1);

    let shared = unsafe { ArrayView::new(view.as_native(), TypeTag::UInt16) };
    assert_eq!(view.refcount(), 2);
    drop(shared);
    assert_eq!(view.refcount(), 1);
}

#[test]
fn test_array_view_rejects_non_numbers() {
    assert!(ArrayView::from_values(TypeTag::Utf8, &[]).is_err());
    assert!(ArrayView::from_values(TypeTag::Int8, &[Value::Int(1000)]).unwrap_err().is_overflow());
}

// ---------------------------------------------------------------------------
// Structs and wrappers
// ---------------------------------------------------------------------------

fn point_info() -> Arc<StructInfo> {
    Arc::new(
        StructInfo::new("Test", "Point", 12)
            .field(FieldInfo::new("x", 0, TypeTag::Int32))
            .field(FieldInfo::new("y", 4, TypeTag::Int32))
            .field(FieldInfo::new("id", 8, TypeTag::UInt32).read_only()),
    )
}

#[test]
fn test_struct_fields() {
    let point = StructInstance::new_zeroed(point_info()).unwrap();
    point.set_field("x", &Value::Int(-3)).unwrap();
    point.set_field("y", &Value::Int(9)).unwrap();
    assert_eq!(point.get_field("x").unwrap(), Value::Int(-3));
    assert_eq!(point.get_field("y").unwrap(), Value::Int(9));
    assert_eq!(point.get_field("id").unwrap(), Value::Int(0));
    assert!(point.is_owned());

    let err = point.set_field("id", &Value::Int(1)).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::Value { .. }));
    let err = point.get_field("z").unwrap_err();
    assert!(matches!(err.kind, ErrorKind::NotFound { .. }));
}

#[test]
fn test_zero_size_struct_cannot_be_created() {
    let info = Arc::new(StructInfo::new("Test", "Opaque", 0));
    assert!(StructInstance::new_zeroed(info).unwrap_err().is_type_error());
}

#[test]
fn test_struct_argument_type_check() {
    let other = Arc::new(StructInfo::new("Test", "Rect", 16));
    let cache = single_arg(TypeDescriptor::interface(InterfaceInfo::Struct(point_info())));
    let rect = Value::Struct(Arc::new(StructInstance::new_zeroed(other).unwrap()));
    assert!(convert(&cache, &rect).unwrap_err().is_type_error());

    let point = Value::Struct(Arc::new(StructInstance::new_zeroed(point_info()).unwrap()));
    let native = convert(&cache, &point).unwrap();
    match &point {
        Value::Struct(instance) => assert_eq!(native.pointer(), instance.as_ptr()),
        _ => unreachable!(),
    }
}

#[test]
fn test_wrapper_registry_reuses_classes() {
    let registry = WrapperRegistry::new();
    let a = registry.class_new_full("TestThing", WrapperFuncs::NONE);
    let b = registry.class_new_full("TestThing", WrapperFuncs::NONE);
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(registry.len(), 1);

    let err = a.instantiate(&[]).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::NotImplemented { .. }));
}

#[test]
fn test_wrapper_identity_and_display() {
    let registry = WrapperRegistry::new();
    let class = registry.class_new_full("TestThing", WrapperFuncs::NONE);
    let ptr = 0x1000 as *mut c_void;
    let a = Wrapper::new(class.clone(), ptr);
    let b = Wrapper::new(class, ptr);
    assert_eq!(a, b);
    assert_eq!(a.to_string(), format!("<TestThing at {:p}>", ptr));
    assert_eq!(a.steal(), ptr);
    assert!(a.peek_wrapped().is_null());
}

#[test]
fn test_object_class_follows_hierarchy() {
    let base = Arc::new(ObjectInfo::new("Test", "Base", WrapperFuncs::NONE));
    let derived = Arc::new(ObjectInfo::new("Test", "Derived", WrapperFuncs::NONE).with_parent(base.clone()));
    let registry = WrapperRegistry::new();
    let class = registry.class_from_object_info(&derived);
    assert!(class.is_a(&base));
    assert!(!registry.class_from_object_info(&base).is_a(&derived));
}

#[test]
fn test_out_direction_has_no_convert_in() {
    let info = CallableInfo::function("Test", "get").arg(ArgInfo::new("out", TypeTag::Int32).out());
    let cache = CallableCache::build(&info).unwrap();
    assert_eq!(cache.args[0].direction, Direction::ToScript);
    assert!(cache.args[0].convert_in.is_none());
    assert!(cache.args[0].convert_out.is_some());
    assert_eq!(cache.args[0].transfer, Transfer::Nothing);
}
