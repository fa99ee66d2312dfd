//! Integration tests for the buffer and status protocol
//!
//! Drives the buffer exports the way a host does and checks the wire
//! decoder against arbitrary input.

use proptest::prelude::*;

use telio_bridge::ffi::codec::{lift_from_bytes, lower_to_vec, CodecError, Json};
use telio_bridge::ffi::exports::{
    ffi_telio_rustbuffer_alloc, ffi_telio_rustbuffer_free, ffi_telio_rustbuffer_from_bytes,
    ffi_telio_rustbuffer_reserve,
};
use telio_bridge::ffi::{CallStatusCode, ForeignBytes, RustBuffer, RustCallStatus};
use telio_bridge::telio::{Config, Features, TelioError};

fn free(buf: RustBuffer) {
    let mut status = RustCallStatus::new();
    ffi_telio_rustbuffer_free(buf, &mut status);
    assert!(status.is_success());
}

/// Helper to copy host bytes into a new buffer through the export
fn copy_in(data: &[u8]) -> RustBuffer {
    let mut status = RustCallStatus::new();
    let buf = ffi_telio_rustbuffer_from_bytes(ForeignBytes::from_slice(data).unwrap(), &mut status);
    assert!(status.is_success());
    buf
}

// === Buffer exports ===

#[test]
fn test_alloc_write_reserve_free() {
    let mut status = RustCallStatus::new();
    let buf = ffi_telio_rustbuffer_alloc(0, &mut status);
    assert!(status.is_success());
    assert!(buf.is_empty());

    let buf = ffi_telio_rustbuffer_reserve(buf, 64, &mut status);
    assert!(status.is_success());
    assert!(buf.capacity() >= 64);
    assert_eq!(buf.len(), 0);
    free(buf);
}

#[test]
fn test_reserve_negative_consumes_input() {
    let buf = copy_in(b"abc");
    let mut status = RustCallStatus::new();
    let out = ffi_telio_rustbuffer_reserve(buf, -1, &mut status);
    assert_eq!(status.status_code(), Some(CallStatusCode::Panic));
    assert!(out.is_empty());
    status.take_error_buf().destroy().unwrap();
}

#[test]
fn test_empty_span_with_null_data() {
    // Safety: a zero-length span never reads through its pointer.
    let span = unsafe { ForeignBytes::from_raw_parts(std::ptr::null(), 0) };
    let mut status = RustCallStatus::new();
    let buf = ffi_telio_rustbuffer_from_bytes(span, &mut status);
    assert!(status.is_success());
    assert!(buf.is_empty());
    free(buf);
}

#[test]
fn test_null_span_with_length_rejected() {
    // Safety: the export checks the pointer before reading.
    let span = unsafe { ForeignBytes::from_raw_parts(std::ptr::null(), 4) };
    let mut status = RustCallStatus::new();
    let buf = ffi_telio_rustbuffer_from_bytes(span, &mut status);
    assert_eq!(status.status_code(), Some(CallStatusCode::Panic));
    assert!(buf.is_empty());
    status.take_error_buf().destroy().unwrap();
}

// === Records ===

#[test]
fn test_partial_feature_json_takes_defaults() {
    let mut bytes = Vec::new();
    let text = r#"{"direct":{}}"#.to_string();
    bytes.extend_from_slice(&lower_to_vec(&text));

    let Json(features) = lift_from_bytes::<Json<Features>>(&bytes).unwrap();
    assert!(features.direct.is_some());
    assert_eq!(features.wireguard, Features::default().wireguard);
}

#[test]
fn test_record_with_bad_json_is_codec_error() {
    let bytes = lower_to_vec(&"{not json".to_string());
    assert!(matches!(
        lift_from_bytes::<Json<Config>>(&bytes),
        Err(CodecError::Json(_))
    ));
}

proptest! {
    #[test]
    fn prop_alloc_then_free(size in 0i32..65536) {
        let mut status = RustCallStatus::new();
        let buf = ffi_telio_rustbuffer_alloc(size, &mut status);
        prop_assert!(status.is_success());
        prop_assert!(buf.capacity() >= size as usize);
        prop_assert_eq!(buf.len(), 0);
        let (data, capacity) = (buf.data_ptr() as *mut u8, buf.capacity() as i32);

        ffi_telio_rustbuffer_free(buf, &mut status);
        prop_assert!(status.is_success());

        // A second free of the same storage is refused, never honoured.
        if cfg!(debug_assertions) && !data.is_null() {
            let again = unsafe { RustBuffer::from_raw_parts(data, 0, capacity) };
            ffi_telio_rustbuffer_free(again, &mut status);
            prop_assert_eq!(status.status_code(), Some(CallStatusCode::Panic));
            status.take_error_buf().destroy().unwrap();
        }
    }

    #[test]
    fn prop_from_bytes_copies_exactly(data in proptest::collection::vec(any::<u8>(), 0..512)) {
        let buf = copy_in(&data);
        prop_assert_eq!(buf.as_slice(), data.as_slice());
        prop_assert!(buf.capacity() >= buf.len());
        free(buf);
    }

    #[test]
    fn prop_reserve_keeps_contents(
        data in proptest::collection::vec(any::<u8>(), 0..256),
        additional in 0i32..4096,
    ) {
        let buf = copy_in(&data);
        let mut status = RustCallStatus::new();
        let grown = ffi_telio_rustbuffer_reserve(buf, additional, &mut status);
        prop_assert!(status.is_success());
        prop_assert_eq!(grown.as_slice(), data.as_slice());
        prop_assert!(grown.capacity() >= data.len() + additional as usize);
        free(grown);
    }

    #[test]
    fn prop_decoder_never_panics(data in proptest::collection::vec(any::<u8>(), 0..64)) {
        let _ = lift_from_bytes::<Option<Vec<String>>>(&data);
        let _ = lift_from_bytes::<TelioError>(&data);
        let _ = lift_from_bytes::<Json<Features>>(&data);
    }

    #[test]
    fn prop_trailing_bytes_rejected(value in any::<i64>(), junk in 1usize..8) {
        let mut bytes = lower_to_vec(&value);
        bytes.extend(std::iter::repeat(0u8).take(junk));
        prop_assert!(
            matches!(lift_from_bytes::<i64>(&bytes), Err(CodecError::TrailingBytes(n)) if n == junk)
        );
    }

    #[test]
    fn prop_truncated_string_is_unexpected_end(text in "[a-z]{1,32}", cut in 1usize..4) {
        let bytes = lower_to_vec(&text);
        let truncated = &bytes[..bytes.len() - cut.min(text.len())];
        let is_end = matches!(
            lift_from_bytes::<String>(truncated),
            Err(CodecError::UnexpectedEnd { .. })
        );
        prop_assert!(is_end);
    }
}
