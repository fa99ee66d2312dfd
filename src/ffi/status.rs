//! Call status protocol
//!
//! Every export takes a `*mut RustCallStatus` as its last argument. The host
//! zeroes it, the export fills it, the host frees any error buffer written
//! into it. [`rust_call`] is the single place where an export body runs:
//! it turns `Err` into codes 1/2/3 and catches panics so they never unwind
//! across the C boundary.

use std::any::Any;
use std::ffi::c_void;
use std::panic::{self, AssertUnwindSafe};

use tracing::{error, warn};

use super::buffer::{BufferError, RustBuffer};

/// Outcome of a boundary call, as written into [`RustCallStatus::code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i8)]
pub enum CallStatusCode {
    Success = 0,
    /// Expected error; `error_buf` holds the serialized domain error.
    Error = 1,
    /// Unexpected error or panic; `error_buf` holds a UTF-8 message.
    Panic = 2,
    /// The asynchronous task was cancelled before it produced a value.
    Cancelled = 3,
}

impl CallStatusCode {
    pub fn from_i8(code: i8) -> Option<Self> {
        match code {
            0 => Some(Self::Success),
            1 => Some(Self::Error),
            2 => Some(Self::Panic),
            3 => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// Out-parameter of every boundary call.
#[repr(C)]
#[derive(Debug, Default)]
pub struct RustCallStatus {
    pub code: i8,
    pub error_buf: RustBuffer,
}

impl RustCallStatus {
    /// A freshly zeroed status, as the caller must supply it.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status_code(&self) -> Option<CallStatusCode> {
        CallStatusCode::from_i8(self.code)
    }

    pub fn is_success(&self) -> bool {
        self.code == CallStatusCode::Success as i8
    }

    /// Move the error buffer out, leaving an empty one behind.
    pub fn take_error_buf(&mut self) -> RustBuffer {
        std::mem::take(&mut self.error_buf)
    }
}

/// Failure of an export body.
#[derive(Debug, Clone, PartialEq)]
pub enum CallError {
    /// A domain error already lowered to its wire form.
    Expected(Vec<u8>),
    /// Anything the host cannot be expected to handle.
    Unexpected(String),
    Cancelled,
}

impl CallError {
    pub fn unexpected(msg: impl Into<String>) -> Self {
        Self::Unexpected(msg.into())
    }
}

/// Internal errors surface to the host as code 2 with their display text.
macro_rules! impl_unexpected {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for CallError {
                fn from(e: $ty) -> Self {
                    CallError::Unexpected(e.to_string())
                }
            }
        )*
    };
}

impl_unexpected!(
    BufferError,
    super::codec::CodecError,
    super::handle_map::HandleError,
    super::callback::CallbackError,
    super::future::FutureError,
    super::checksum::ChecksumError,
);

/// Value an export returns when it fails. The host ignores it.
pub trait FfiDefault {
    fn ffi_default() -> Self;
}

macro_rules! impl_ffi_default {
    ($($ty:ty => $value:expr),* $(,)?) => {
        $(
            impl FfiDefault for $ty {
                #[inline]
                fn ffi_default() -> Self {
                    $value
                }
            }
        )*
    };
}

impl_ffi_default!(
    () => (),
    u8 => 0,
    i8 => 0,
    u16 => 0,
    i16 => 0,
    u32 => 0,
    i32 => 0,
    u64 => 0,
    i64 => 0,
    f32 => 0.0,
    f64 => 0.0,
    RustBuffer => RustBuffer::empty(),
    *const c_void => std::ptr::null(),
);

/// Run an export body and record its outcome in `out_status`.
///
/// `out_status` may be null, in which case the outcome is only logged.
pub fn rust_call<T, F>(out_status: *mut RustCallStatus, body: F) -> T
where
    T: FfiDefault,
    F: FnOnce() -> Result<T, CallError>,
{
    let outcome = panic::catch_unwind(AssertUnwindSafe(body));

    // Safety: the host passes either null or a pointer to a status it owns
    // for the duration of this call.
    let status = unsafe { out_status.as_mut() };

    match outcome {
        Ok(Ok(value)) => {
            if let Some(status) = status {
                status.code = CallStatusCode::Success as i8;
            }
            value
        }
        Ok(Err(err)) => {
            write_error(status, err);
            T::ffi_default()
        }
        Err(payload) => {
            let msg = panic_message(payload.as_ref());
            error!(message = %msg, "panic caught at the call boundary");
            write_error(status, CallError::Unexpected(msg));
            T::ffi_default()
        }
    }
}

fn write_error(status: Option<&mut RustCallStatus>, err: CallError) {
    let (code, payload) = match err {
        CallError::Expected(bytes) => (CallStatusCode::Error, bytes),
        CallError::Unexpected(msg) => {
            warn!(message = %msg, "boundary call failed");
            (CallStatusCode::Panic, msg.into_bytes())
        }
        CallError::Cancelled => (CallStatusCode::Cancelled, Vec::new()),
    };

    let Some(status) = status else {
        return;
    };
    status.code = code as i8;
    // An oversized payload leaves the buffer empty; the code still stands.
    status.error_buf = RustBuffer::from_vec(payload).unwrap_or_default();
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
