//! FFI Module Tests
//!
//! Exercise the exports the way a host would: zeroed status in, status and
//! buffers out.

use std::collections::HashSet;

use super::checksum::INTERFACE;
use super::exports::*;
use super::*;

fn status() -> RustCallStatus {
    RustCallStatus::new()
}

fn take_message(status: &mut RustCallStatus) -> String {
    let bytes = status.take_error_buf().destroy_into_vec().unwrap();
    String::from_utf8(bytes).unwrap()
}

#[test]
fn test_rustbuffer_alloc_export() {
    let mut st = status();
    let buf = ffi_telio_rustbuffer_alloc(32, &mut st);
    assert!(st.is_success());
    assert!(buf.capacity() >= 32);
    assert_eq!(buf.len(), 0);

    let mut st = status();
    ffi_telio_rustbuffer_free(buf, &mut st);
    assert!(st.is_success());
}

#[test]
fn test_rustbuffer_alloc_negative_sets_code_two() {
    let mut st = status();
    let buf = ffi_telio_rustbuffer_alloc(-8, &mut st);
    assert_eq!(st.status_code(), Some(CallStatusCode::Panic));
    assert!(take_message(&mut st).contains("negative"));
    assert!(buf.data_ptr().is_null());
}

#[test]
fn test_rustbuffer_from_bytes_copies() {
    let source = b"meshnet".to_vec();
    let span = ForeignBytes::from_slice(&source).unwrap();

    let mut st = status();
    let buf = ffi_telio_rustbuffer_from_bytes(span, &mut st);
    assert!(st.is_success());
    assert_eq!(buf.as_slice(), b"meshnet");
    assert_ne!(buf.data_ptr(), source.as_ptr());

    let mut st = status();
    ffi_telio_rustbuffer_free(buf, &mut st);
    assert!(st.is_success());
}

#[test]
fn test_rustbuffer_reserve_export() {
    let buf = RustBuffer::from_vec(vec![1, 2, 3, 4]).unwrap();
    let mut st = status();
    let grown = ffi_telio_rustbuffer_reserve(buf, 60, &mut st);
    assert!(st.is_success());
    assert_eq!(grown.as_slice(), &[1, 2, 3, 4]);
    assert!(grown.capacity() >= 64);
    grown.destroy().unwrap();
}

#[test]
fn test_contract_version_export() {
    let mut st = status();
    assert_eq!(ffi_telio_uniffi_contract_version(&mut st), 24);
    assert!(st.is_success());
}

#[test]
fn test_every_symbol_has_an_accessor() {
    let exported: HashSet<&str> = CHECKSUM_ACCESSORS.iter().map(|(name, _)| *name).collect();
    let declared: HashSet<String> = INTERFACE.iter().map(|s| s.accessor()).collect();

    assert_eq!(exported.len(), CHECKSUM_ACCESSORS.len());
    for name in &declared {
        assert!(exported.contains(name.as_str()), "missing accessor {name}");
    }
    assert_eq!(exported.len(), declared.len());
}

#[test]
fn test_accessors_return_table_checksums() {
    for (name, accessor) in CHECKSUM_ACCESSORS {
        let mut st = status();
        let value = (*accessor)(&mut st);
        assert!(st.is_success(), "{name} failed");
        assert_eq!(value, checksum::lookup(name).unwrap());
    }
}

#[test]
fn test_null_callback_registration_rejected() {
    let mut st = status();
    uniffi_telio_fn_init_callback_telioprotectcb(None, &mut st);
    assert_eq!(st.status_code(), Some(CallStatusCode::Panic));
    assert!(take_message(&mut st).contains("TelioProtectCb"));
}

#[test]
fn test_future_export_with_unknown_handle() {
    let mut st = status();
    let value = ffi_telio_rust_future_complete_u32(0, &mut st);
    assert_eq!(value, 0);
    assert_eq!(st.status_code(), Some(CallStatusCode::Panic));
    assert_eq!(take_message(&mut st), "null handle");
}
