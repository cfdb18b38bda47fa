//! Tests for the core data model

use super::memory::{self, NativeArray, NativeError, NativeHashTable, NativeList};
use super::*;
use core::ffi::c_void;

#[test]
fn test_tag_storage_sizes() {
    assert_eq!(TypeTag::Void.storage_size(), 0);
    assert_eq!(TypeTag::Boolean.storage_size(), 1);
    assert_eq!(TypeTag::Int16.storage_size(), 2);
    assert_eq!(TypeTag::UInt32.storage_size(), 4);
    assert_eq!(TypeTag::Float.storage_size(), 4);
    assert_eq!(TypeTag::Double.storage_size(), 8);
    assert_eq!(TypeTag::Utf8.storage_size(), core::mem::size_of::<usize>());
}

#[test]
fn test_tag_predicates() {
    assert!(TypeTag::UInt64.is_integral());
    assert!(!TypeTag::Boolean.is_integral());
    assert!(TypeTag::Double.is_float());
    assert!(TypeTag::Int8.is_numeric());
    assert!(TypeTag::GHash.is_container());
    assert!(!TypeTag::Utf8.is_container());
}

#[test]
fn test_direction_reversal() {
    assert_eq!(Direction::FromScript.reversed(), Direction::ToScript);
    assert_eq!(Direction::ToScript.reversed(), Direction::FromScript);
    assert_eq!(Direction::Bidirectional.reversed(), Direction::Bidirectional);
    assert!(Direction::Bidirectional.is_from_script());
    assert!(Direction::Bidirectional.is_to_script());
}

#[test]
fn test_transfer_for_elements() {
    assert_eq!(Transfer::Everything.for_elements(), Transfer::Everything);
    assert_eq!(Transfer::Container.for_elements(), Transfer::Nothing);
    assert_eq!(Transfer::Nothing.for_elements(), Transfer::Nothing);
}

#[test]
fn test_descriptor_display_names() {
    let strv = TypeDescriptor::c_array(TypeTag::Utf8.into(), ArrayLength::ZeroTerminated);
    assert_eq!(strv.display_name(), "array[utf8]");

    let hash = TypeDescriptor::hash(TypeTag::Utf8.into(), TypeTag::Int32.into());
    assert_eq!(hash.display_name(), "ghash[utf8, int32]");

    assert_eq!(TypeDescriptor::pointer().display_name(), "gpointer");
}

#[test]
fn test_native_arg_integers() {
    let arg = NativeArg::from_integer(TypeTag::Int8, -5);
    assert_eq!(arg.to_integer(TypeTag::Int8), -5);

    let arg = NativeArg::from_integer(TypeTag::UInt64, u64::MAX as i128);
    assert_eq!(arg.to_integer(TypeTag::UInt64), u64::MAX as i128);

    let arg = NativeArg::from_integer(TypeTag::Boolean, 7);
    assert_eq!(arg.to_integer(TypeTag::Boolean), 1);
}

#[test]
fn test_native_arg_unaligned_storage() {
    let mut buf = [0u8; 9];
    let arg = NativeArg::from_integer(TypeTag::Int32, 0x0102_0304);
    unsafe {
        arg.write_to(buf.as_mut_ptr().add(1), 4);
        let back = NativeArg::read_from(buf.as_ptr().add(1), 4);
        assert_eq!(back.to_integer(TypeTag::Int32), 0x0102_0304);
    }
    assert_eq!(buf[0], 0);
    assert_eq!(buf[5], 0);
}

#[test]
fn test_pointer_payload_packing() {
    let arg = NativeArg::from_integer(TypeTag::UInt16, 513);
    let payload = arg.to_pointer_payload(2);
    let back = NativeArg::from_pointer_payload(payload, 2);
    assert_eq!(back.to_integer(TypeTag::UInt16), 513);
}

#[test]
fn test_strdup_is_nul_terminated() {
    let ptr = memory::strdup(b"hello").unwrap();
    unsafe {
        assert_eq!(memory::c_str_bytes(ptr), b"hello");
        memory::free(ptr);
    }
}

#[test]
fn test_native_array_refcount() {
    let array = NativeArray::new(4, 3).unwrap();
    unsafe {
        assert_eq!((*array).len(), 3);
        assert_eq!((*array).as_bytes(), &[0u8; 12]);

        NativeArray::array_ref(array);
        assert_eq!((*array).refcount(), 2);
        NativeArray::array_unref(array);
        assert_eq!((*array).refcount(), 1);
        NativeArray::array_unref(array);
    }
}

#[test]
fn test_native_list_order() {
    let payloads = [1usize, 2, 3].map(|v| v as *mut c_void);
    let head = NativeList::from_payloads(&payloads);
    unsafe {
        assert_eq!(NativeList::payloads(head), payloads.to_vec());
        assert!((*head).prev.is_null());
        NativeList::free(head);
    }
    assert!(NativeList::from_payloads(&[]).is_null());
}

#[test]
fn test_hash_table_replaces_keys() {
    let table = NativeHashTable::new();
    unsafe {
        (*table).insert(1 as *mut c_void, 10 as *mut c_void);
        (*table).insert(1 as *mut c_void, 20 as *mut c_void);
        assert_eq!((*table).len(), 1);
        assert_eq!((*table).entries()[0].1 as usize, 20);
        NativeHashTable::free(table);
    }
}

#[test]
fn test_native_error_slot() {
    let mut slot: *mut NativeError = core::ptr::null_mut();
    unsafe {
        NativeError::new("test-domain", 3, "boom").raise(&mut slot);
        let err = NativeError::take(slot).unwrap();
        assert_eq!(err.domain, "test-domain");
        assert_eq!(err.code, 3);
        assert!(NativeError::take(core::ptr::null_mut()).is_none());
    }
}

#[test]
fn test_text_buffer_is_c_compatible() {
    let text = Text::new("abc");
    assert_eq!(text.len(), 3);
    unsafe {
        assert_eq!(*text.as_ptr().add(3), 0);
    }
    assert!(Text::new("a\0b").has_interior_nul());
}

#[test]
fn test_parse_int_literals() {
    assert_eq!(Value::parse_int("42").unwrap(), Value::Int(42));
    assert_eq!(Value::parse_int("-0x10").unwrap(), Value::Int(-16));
    assert_eq!(Value::parse_int("0b1010").unwrap(), Value::Int(10));
    assert_eq!(Value::parse_int("0o17").unwrap(), Value::Int(15));
    assert_eq!(Value::parse_int("1_000").unwrap(), Value::Int(1000));
    assert!(Value::parse_int("12abc").is_err());
}

#[test]
fn test_value_truthiness() {
    assert!(!Value::None.is_truthy());
    assert!(!Value::Int(0).is_truthy());
    assert!(Value::str("x").is_truthy());
    assert!(!Value::list(vec![]).is_truthy());
    assert!(Value::function("f", |_| Ok(Value::None)).is_truthy());
}

#[test]
fn test_value_elements() {
    let dict = Value::dict(vec![(Value::str("a"), Value::Int(1))]);
    assert_eq!(dict.elements().unwrap(), vec![Value::str("a")]);
    assert_eq!(Value::bytes(b"\x01\x02").elements().unwrap(), vec![Value::Int(1), Value::Int(2)]);
    assert!(Value::Int(3).elements().is_none());
}

#[test]
fn test_callable_values_compare_by_identity() {
    let f = Value::function("f", |args| Ok(Value::Int(args.len() as i128)));
    let g = Value::function("f", |args| Ok(Value::Int(args.len() as i128)));
    assert_eq!(f, f.clone());
    assert_ne!(f, g);
}
