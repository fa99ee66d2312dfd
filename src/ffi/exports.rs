//! C exports of the bridge protocol
//!
//! Buffer utilities, callback registration, the async task quartets and the
//! version/checksum gate. Every function takes the call status last and
//! runs its body through [`rust_call`].

use std::ffi::c_void;

use super::buffer::{self, ForeignBytes, RustBuffer};
use super::callback::{self, CallbackInterface, ForeignCallback};
use super::checksum;
use super::future::{self, FfiPointer, ResultKind, RustFutureContinuation};
use super::status::{rust_call, CallError, RustCallStatus};

// ============================================================================
// Buffers
// ============================================================================

#[no_mangle]
pub extern "C" fn ffi_telio_rustbuffer_alloc(
    size: i32,
    call_status: *mut RustCallStatus,
) -> RustBuffer {
    rust_call(call_status, || Ok(buffer::alloc(size)?))
}

#[no_mangle]
pub extern "C" fn ffi_telio_rustbuffer_from_bytes(
    bytes: ForeignBytes,
    call_status: *mut RustCallStatus,
) -> RustBuffer {
    // Safety: the host keeps the span alive for the duration of the call.
    rust_call(call_status, || Ok(unsafe { buffer::from_bytes(bytes) }?))
}

#[no_mangle]
pub extern "C" fn ffi_telio_rustbuffer_free(buf: RustBuffer, call_status: *mut RustCallStatus) {
    rust_call(call_status, || Ok(buffer::free(buf)?))
}

#[no_mangle]
pub extern "C" fn ffi_telio_rustbuffer_reserve(
    buf: RustBuffer,
    additional: i32,
    call_status: *mut RustCallStatus,
) -> RustBuffer {
    rust_call(call_status, || Ok(buffer::reserve(buf, additional)?))
}

// ============================================================================
// Callback registration
// ============================================================================

#[no_mangle]
pub extern "C" fn uniffi_telio_fn_init_callback_telioeventcb(
    callback_stub: Option<ForeignCallback>,
    call_status: *mut RustCallStatus,
) {
    rust_call(call_status, || {
        Ok(callback::register(CallbackInterface::Event, callback_stub)?)
    })
}

#[no_mangle]
pub extern "C" fn uniffi_telio_fn_init_callback_teliologgercb(
    callback_stub: Option<ForeignCallback>,
    call_status: *mut RustCallStatus,
) {
    rust_call(call_status, || {
        Ok(callback::register(CallbackInterface::Logger, callback_stub)?)
    })
}

#[no_mangle]
pub extern "C" fn uniffi_telio_fn_init_callback_telioprotectcb(
    callback_stub: Option<ForeignCallback>,
    call_status: *mut RustCallStatus,
) {
    rust_call(call_status, || {
        Ok(callback::register(CallbackInterface::Protect, callback_stub)?)
    })
}

// ============================================================================
// Async tasks
// ============================================================================

#[no_mangle]
pub extern "C" fn ffi_telio_rust_future_continuation_callback_set(
    callback: Option<RustFutureContinuation>,
    call_status: *mut RustCallStatus,
) {
    rust_call(call_status, || {
        let callback = callback.ok_or_else(|| CallError::unexpected("null continuation callback"))?;
        future::set_continuation(callback);
        Ok(())
    })
}

macro_rules! future_exports {
    ($($kind:ident: $ret:ty => $poll:ident, $cancel:ident, $complete:ident, $free:ident;)*) => {
        $(
            #[no_mangle]
            pub extern "C" fn $poll(
                handle: u64,
                data: *const c_void,
                call_status: *mut RustCallStatus,
            ) {
                rust_call(call_status, || Ok(future::poll(handle, ResultKind::$kind, data)?))
            }

            #[no_mangle]
            pub extern "C" fn $cancel(handle: u64, call_status: *mut RustCallStatus) {
                rust_call(call_status, || Ok(future::cancel(handle, ResultKind::$kind)?))
            }

            #[no_mangle]
            pub extern "C" fn $complete(handle: u64, call_status: *mut RustCallStatus) -> $ret {
                rust_call(call_status, || future::complete::<$ret>(handle))
            }

            #[no_mangle]
            pub extern "C" fn $free(handle: u64, call_status: *mut RustCallStatus) {
                rust_call(call_status, || Ok(future::free(handle, ResultKind::$kind)?))
            }
        )*
    };
}

future_exports! {
    U8: u8 => ffi_telio_rust_future_poll_u8, ffi_telio_rust_future_cancel_u8,
        ffi_telio_rust_future_complete_u8, ffi_telio_rust_future_free_u8;
    I8: i8 => ffi_telio_rust_future_poll_i8, ffi_telio_rust_future_cancel_i8,
        ffi_telio_rust_future_complete_i8, ffi_telio_rust_future_free_i8;
    U16: u16 => ffi_telio_rust_future_poll_u16, ffi_telio_rust_future_cancel_u16,
        ffi_telio_rust_future_complete_u16, ffi_telio_rust_future_free_u16;
    I16: i16 => ffi_telio_rust_future_poll_i16, ffi_telio_rust_future_cancel_i16,
        ffi_telio_rust_future_complete_i16, ffi_telio_rust_future_free_i16;
    U32: u32 => ffi_telio_rust_future_poll_u32, ffi_telio_rust_future_cancel_u32,
        ffi_telio_rust_future_complete_u32, ffi_telio_rust_future_free_u32;
    I32: i32 => ffi_telio_rust_future_poll_i32, ffi_telio_rust_future_cancel_i32,
        ffi_telio_rust_future_complete_i32, ffi_telio_rust_future_free_i32;
    U64: u64 => ffi_telio_rust_future_poll_u64, ffi_telio_rust_future_cancel_u64,
        ffi_telio_rust_future_complete_u64, ffi_telio_rust_future_free_u64;
    I64: i64 => ffi_telio_rust_future_poll_i64, ffi_telio_rust_future_cancel_i64,
        ffi_telio_rust_future_complete_i64, ffi_telio_rust_future_free_i64;
    F32: f32 => ffi_telio_rust_future_poll_f32, ffi_telio_rust_future_cancel_f32,
        ffi_telio_rust_future_complete_f32, ffi_telio_rust_future_free_f32;
    F64: f64 => ffi_telio_rust_future_poll_f64, ffi_telio_rust_future_cancel_f64,
        ffi_telio_rust_future_complete_f64, ffi_telio_rust_future_free_f64;
    Pointer: FfiPointer => ffi_telio_rust_future_poll_pointer, ffi_telio_rust_future_cancel_pointer,
        ffi_telio_rust_future_complete_pointer, ffi_telio_rust_future_free_pointer;
    RustBuffer: RustBuffer => ffi_telio_rust_future_poll_rust_buffer,
        ffi_telio_rust_future_cancel_rust_buffer, ffi_telio_rust_future_complete_rust_buffer,
        ffi_telio_rust_future_free_rust_buffer;
    Void: () => ffi_telio_rust_future_poll_void, ffi_telio_rust_future_cancel_void,
        ffi_telio_rust_future_complete_void, ffi_telio_rust_future_free_void;
}

// ============================================================================
// Version and checksum gate
// ============================================================================

#[no_mangle]
pub extern "C" fn ffi_telio_uniffi_contract_version(call_status: *mut RustCallStatus) -> u32 {
    rust_call(call_status, || Ok(checksum::CONTRACT_VERSION))
}

/// Signature shared by every checksum accessor.
pub type ChecksumAccessor = extern "C" fn(*mut RustCallStatus) -> u16;

macro_rules! checksum_accessors {
    ($($name:ident),* $(,)?) => {
        $(
            #[no_mangle]
            pub extern "C" fn $name(call_status: *mut RustCallStatus) -> u16 {
                rust_call(call_status, || Ok(checksum::lookup(stringify!($name))?))
            }
        )*

        /// Every checksum accessor with its exported name.
        pub static CHECKSUM_ACCESSORS: &[(&str, ChecksumAccessor)] = &[
            $((stringify!($name), $name as ChecksumAccessor),)*
        ];
    };
}

checksum_accessors!(
    uniffi_telio_checksum_func_deserialize_feature_config,
    uniffi_telio_checksum_func_deserialize_meshnet_config,
    uniffi_telio_checksum_func_generate_public_key,
    uniffi_telio_checksum_func_generate_secret_key,
    uniffi_telio_checksum_func_get_commit_sha,
    uniffi_telio_checksum_func_get_default_adapter,
    uniffi_telio_checksum_func_get_default_feature_config,
    uniffi_telio_checksum_func_get_version_tag,
    uniffi_telio_checksum_func_set_global_logger,
    uniffi_telio_checksum_method_telio_connect_to_exit_node,
    uniffi_telio_checksum_method_telio_connect_to_exit_node_postquantum,
    uniffi_telio_checksum_method_telio_connect_to_exit_node_with_id,
    uniffi_telio_checksum_method_telio_disable_magic_dns,
    uniffi_telio_checksum_method_telio_disconnect_from_exit_node,
    uniffi_telio_checksum_method_telio_disconnect_from_exit_nodes,
    uniffi_telio_checksum_method_telio_enable_magic_dns,
    uniffi_telio_checksum_method_telio_generate_stack_panic,
    uniffi_telio_checksum_method_telio_generate_thread_panic,
    uniffi_telio_checksum_method_telio_get_adapter_luid,
    uniffi_telio_checksum_method_telio_get_last_error,
    uniffi_telio_checksum_method_telio_get_nat,
    uniffi_telio_checksum_method_telio_get_secret_key,
    uniffi_telio_checksum_method_telio_get_status_map,
    uniffi_telio_checksum_method_telio_is_running,
    uniffi_telio_checksum_method_telio_notify_network_change,
    uniffi_telio_checksum_method_telio_notify_sleep,
    uniffi_telio_checksum_method_telio_notify_wakeup,
    uniffi_telio_checksum_method_telio_probe_pmtu,
    uniffi_telio_checksum_method_telio_receive_ping,
    uniffi_telio_checksum_method_telio_set_fwmark,
    uniffi_telio_checksum_method_telio_set_meshnet,
    uniffi_telio_checksum_method_telio_set_meshnet_off,
    uniffi_telio_checksum_method_telio_set_secret_key,
    uniffi_telio_checksum_method_telio_shutdown,
    uniffi_telio_checksum_method_telio_shutdown_hard,
    uniffi_telio_checksum_method_telio_start,
    uniffi_telio_checksum_method_telio_start_named,
    uniffi_telio_checksum_method_telio_start_with_tun,
    uniffi_telio_checksum_method_telio_stop,
    uniffi_telio_checksum_method_telio_trigger_analytics_event,
    uniffi_telio_checksum_method_telio_trigger_qos_collection,
    uniffi_telio_checksum_constructor_telio_new,
    uniffi_telio_checksum_constructor_telio_new_with_protect,
    uniffi_telio_checksum_method_telioeventcb_event,
    uniffi_telio_checksum_method_teliologgercb_log,
    uniffi_telio_checksum_method_telioprotectcb_protect,
);
