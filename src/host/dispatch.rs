//! Host-side callback dispatch
//!
//! Host objects implementing a callback interface are lowered to `u64`
//! handles. The trampoline registered for the interface receives
//! `(handle, method, args)` from the library, finds the object and invokes
//! the method:
//!
//! ```text
//! method 0   release the handle          -> 0
//! method 1   invoke; Ok                  -> 0
//!            invoke; Err(TelioError)     -> 1, error lowered into out_buf
//!            undecodable args, panic     -> 2, message in out_buf
//! other      unknown method              -> 2
//! ```

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use once_cell::sync::Lazy;
use tracing::warn;

use crate::ffi::buffer::RustBuffer;
use crate::ffi::callback::{CallbackCode, ForeignCallback, IDX_CALLBACK_FREE};
use crate::ffi::codec::{lower_to_vec, CodecError, Json, WireFormat, WireReader};
use crate::ffi::exports::{
    uniffi_telio_fn_init_callback_telioeventcb, uniffi_telio_fn_init_callback_teliologgercb,
    uniffi_telio_fn_init_callback_telioprotectcb,
};
use crate::ffi::handle_map::{tags, HandleError, HandleMap};
use crate::ffi::status::panic_message;
use crate::telio::{Event, TelioError, TelioEventCb, TelioLogLevel, TelioLoggerCb, TelioProtectCb};

use super::call::{rust_call_infallible, HostCallError};

/// Handle table for one callback interface.
pub struct CallbackDispatcher<T: ?Sized> {
    objects: HandleMap<Arc<T>>,
}

impl<T: ?Sized> CallbackDispatcher<T> {
    pub fn new(tag: u8) -> Self {
        Self {
            objects: HandleMap::new(tag),
        }
    }

    /// Hand out a handle the library can call back through.
    pub fn lower(&self, object: Arc<T>) -> Result<u64, HandleError> {
        self.objects.insert(object)
    }

    pub fn get(&self, handle: u64) -> Result<Arc<T>, HandleError> {
        self.objects.get(handle)
    }

    pub fn release(&self, handle: u64) -> Result<Arc<T>, HandleError> {
        self.objects.remove(handle)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

pub static EVENT_CALLBACKS: Lazy<CallbackDispatcher<dyn TelioEventCb>> =
    Lazy::new(|| CallbackDispatcher::new(tags::EVENT_CB));
pub static LOGGER_CALLBACKS: Lazy<CallbackDispatcher<dyn TelioLoggerCb>> =
    Lazy::new(|| CallbackDispatcher::new(tags::LOGGER_CB));
pub static PROTECT_CALLBACKS: Lazy<CallbackDispatcher<dyn TelioProtectCb>> =
    Lazy::new(|| CallbackDispatcher::new(tags::PROTECT_CB));

/// Register all three trampolines with the library.
pub fn register_trampolines() -> Result<(), HostCallError<std::convert::Infallible>> {
    rust_call_infallible(|st| {
        uniffi_telio_fn_init_callback_telioeventcb(Some(telio_event_cb_trampoline), st)
    })?;
    rust_call_infallible(|st| {
        uniffi_telio_fn_init_callback_teliologgercb(Some(telio_logger_cb_trampoline), st)
    })?;
    rust_call_infallible(|st| {
        uniffi_telio_fn_init_callback_telioprotectcb(Some(telio_protect_cb_trampoline), st)
    })?;
    Ok(())
}

enum Outcome {
    Done,
    Failed(TelioError),
}

impl From<Result<(), TelioError>> for Outcome {
    fn from(result: Result<(), TelioError>) -> Self {
        match result {
            Ok(()) => Outcome::Done,
            Err(e) => Outcome::Failed(e),
        }
    }
}

/// Shared body of the trampolines.
fn dispatch<T: ?Sized>(
    table: &CallbackDispatcher<T>,
    handle: u64,
    method: i32,
    args_data: *const u8,
    args_len: i32,
    out_buf: *mut RustBuffer,
    invoke: impl FnOnce(&T, &mut WireReader<'_>) -> Result<Outcome, CodecError>,
) -> i32 {
    let (code, payload) = match dispatch_inner(table, handle, method, args_data, args_len, invoke) {
        Ok(Outcome::Done) => (CallbackCode::Success, Vec::new()),
        Ok(Outcome::Failed(e)) => (CallbackCode::Error, lower_to_vec(&e)),
        Err(message) => {
            warn!(handle, method, %message, "callback dispatch failed");
            (CallbackCode::Unexpected, message.into_bytes())
        }
    };

    if !payload.is_empty() && !out_buf.is_null() {
        // Safety: the library passes a valid, writable out-buffer slot.
        unsafe { out_buf.write(RustBuffer::from_vec(payload).unwrap_or_default()) };
    }
    code as i32
}

fn dispatch_inner<T: ?Sized>(
    table: &CallbackDispatcher<T>,
    handle: u64,
    method: i32,
    args_data: *const u8,
    args_len: i32,
    invoke: impl FnOnce(&T, &mut WireReader<'_>) -> Result<Outcome, CodecError>,
) -> Result<Outcome, String> {
    if method == IDX_CALLBACK_FREE {
        return table
            .release(handle)
            .map(|_| Outcome::Done)
            .map_err(|e| e.to_string());
    }
    if method != 1 {
        return Err(format!("unknown callback method {method}"));
    }

    let object = table.get(handle).map_err(|e| e.to_string())?;
    let args: &[u8] = match usize::try_from(args_len) {
        Ok(0) => &[],
        Ok(len) if !args_data.is_null() => {
            // Safety: the library keeps `len` bytes alive for this call.
            unsafe { std::slice::from_raw_parts(args_data, len) }
        }
        _ => return Err(format!("invalid argument span of {args_len} bytes")),
    };

    panic::catch_unwind(AssertUnwindSafe(|| -> Result<Outcome, CodecError> {
        let mut reader = WireReader::new(args);
        let outcome = invoke(&object, &mut reader)?;
        reader.finish()?;
        Ok(outcome)
    }))
    .map_err(|payload| panic_message(payload.as_ref()))?
    .map_err(|e| e.to_string())
}

pub extern "C" fn telio_event_cb_trampoline(
    handle: u64,
    method: i32,
    args_data: *const u8,
    args_len: i32,
    out_buf: *mut RustBuffer,
) -> i32 {
    dispatch(&*EVENT_CALLBACKS, handle, method, args_data, args_len, out_buf, |cb, reader| {
        let Json(event) = Json::<Event>::read(reader)?;
        Ok(cb.event(event).into())
    })
}

pub extern "C" fn telio_logger_cb_trampoline(
    handle: u64,
    method: i32,
    args_data: *const u8,
    args_len: i32,
    out_buf: *mut RustBuffer,
) -> i32 {
    dispatch(&*LOGGER_CALLBACKS, handle, method, args_data, args_len, out_buf, |cb, reader| {
        let level = TelioLogLevel::read(reader)?;
        let payload = String::read(reader)?;
        Ok(cb.log(level, payload).into())
    })
}

pub extern "C" fn telio_protect_cb_trampoline(
    handle: u64,
    method: i32,
    args_data: *const u8,
    args_len: i32,
    out_buf: *mut RustBuffer,
) -> i32 {
    dispatch(&*PROTECT_CALLBACKS, handle, method, args_data, args_len, out_buf, |cb, reader| {
        let socket_id = i32::read(reader)?;
        Ok(cb.protect(socket_id).into())
    })
}

// Keep the trampolines' signatures pinned to the protocol type.
const _: ForeignCallback = telio_event_cb_trampoline;
const _: ForeignCallback = telio_logger_cb_trampoline;
const _: ForeignCallback = telio_protect_cb_trampoline;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ffi::codec::lift_from_bytes;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Sockets(Mutex<Vec<i32>>);

    impl TelioProtectCb for Sockets {
        fn protect(&self, socket_id: i32) -> Result<(), TelioError> {
            if socket_id < 0 {
                return Err(TelioError::InvalidString);
            }
            self.0.lock().push(socket_id);
            Ok(())
        }
    }

    type ProtectTable = CallbackDispatcher<dyn TelioProtectCb>;

    fn call(table: &ProtectTable, handle: u64, method: i32, args: &[u8]) -> (i32, Vec<u8>) {
        let mut out = RustBuffer::empty();
        let len = args.len() as i32;
        let code = dispatch(table, handle, method, args.as_ptr(), len, &mut out, |cb, reader| {
            Ok(cb.protect(i32::read(reader)?).into())
        });
        (code, out.destroy_into_vec().unwrap())
    }

    #[test]
    fn test_dispatch_outcomes() {
        let table = ProtectTable::new(tags::PROTECT_CB);
        let sockets = Arc::new(Sockets::default());
        let handle = table.lower(sockets.clone()).unwrap();

        assert_eq!(call(&table, handle, 1, &lower_to_vec(&7i32)), (0, vec![]));
        assert_eq!(*sockets.0.lock(), vec![7]);

        let (code, payload) = call(&table, handle, 1, &lower_to_vec(&-1i32));
        assert_eq!(code, 1);
        assert_eq!(lift_from_bytes::<TelioError>(&payload).unwrap(), TelioError::InvalidString);

        let (code, payload) = call(&table, handle, 1, &[0, 1]);
        assert_eq!(code, 2);
        assert!(String::from_utf8(payload).unwrap().contains("unexpected end"));

        let (code, _) = call(&table, handle, 5, &[]);
        assert_eq!(code, 2);

        assert_eq!(call(&table, handle, 0, &[]).0, 0);
        assert!(table.is_empty());
        assert_eq!(call(&table, handle, 1, &lower_to_vec(&7i32)).0, 2);
    }

    #[test]
    fn test_trailing_args_rejected() {
        let table = ProtectTable::new(tags::PROTECT_CB);
        let handle = table.lower(Arc::new(Sockets::default())).unwrap();
        let mut args = lower_to_vec(&3i32);
        args.push(0);
        assert_eq!(call(&table, handle, 1, &args).0, 2);
    }
}
