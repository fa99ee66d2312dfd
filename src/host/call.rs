//! Calling exports the way a host binding does
//!
//! A zeroed status goes in; afterwards the status decides between the
//! returned value, a lifted domain error, a panic message or cancellation.

use thiserror::Error;

use crate::ffi::buffer::RustBuffer;
use crate::ffi::codec::{lift_from_buffer, CodecError, WireFormat};
use crate::ffi::status::{CallStatusCode, RustCallStatus};

/// Message reported when a panic left no message behind.
pub const EMPTY_PANIC_MESSAGE: &str = "Rust panicked while handling Rust panic";

/// Outcome of a failed export call, seen from the host.
#[derive(Debug, Error)]
pub enum HostCallError<E> {
    #[error("call returned an error: {0}")]
    Expected(E),

    #[error("call panicked: {0}")]
    Panic(String),

    #[error("call was cancelled")]
    Cancelled,

    #[error("error buffer could not be lifted: {0}")]
    Lift(CodecError),

    #[error("function declares no error type but reported one")]
    UndeclaredError,

    #[error("unknown status code {0}")]
    UnknownCode(i8),
}

/// Call an export that may return `E` as its error.
pub fn rust_call_host<T, E, F>(f: F) -> Result<T, HostCallError<E>>
where
    E: WireFormat,
    F: FnOnce(&mut RustCallStatus) -> T,
{
    let mut status = RustCallStatus::new();
    let value = f(&mut status);
    check_call_status(status).map(|()| value)
}

/// Call an export that declares no error type.
pub fn rust_call_infallible<T, F>(f: F) -> Result<T, HostCallError<std::convert::Infallible>>
where
    F: FnOnce(&mut RustCallStatus) -> T,
{
    let mut status = RustCallStatus::new();
    let value = f(&mut status);
    check_status_with(status, |buf| {
        let _ = buf.destroy();
        Err(HostCallError::UndeclaredError)
    })
    .map(|()| value)
}

/// Interpret a status written by an export, freeing its error buffer.
pub fn check_call_status<E: WireFormat>(status: RustCallStatus) -> Result<(), HostCallError<E>> {
    check_status_with(status, |bytes| {
        lift_from_buffer::<E>(bytes)
            .map(HostCallError::Expected)
            .map_err(HostCallError::Lift)
    })
}

fn check_status_with<E>(
    mut status: RustCallStatus,
    lift_error: impl FnOnce(RustBuffer) -> Result<HostCallError<E>, HostCallError<E>>,
) -> Result<(), HostCallError<E>> {
    let buf = status.take_error_buf();
    match CallStatusCode::from_i8(status.code) {
        Some(CallStatusCode::Success) => {
            let _ = buf.destroy();
            Ok(())
        }
        Some(CallStatusCode::Error) => Err(lift_error(buf).unwrap_or_else(|e| e)),
        Some(CallStatusCode::Panic) => {
            let message = match buf.destroy_into_vec() {
                Ok(bytes) if !bytes.is_empty() => String::from_utf8_lossy(&bytes).into_owned(),
                _ => EMPTY_PANIC_MESSAGE.to_string(),
            };
            Err(HostCallError::Panic(message))
        }
        Some(CallStatusCode::Cancelled) => {
            let _ = buf.destroy();
            Err(HostCallError::Cancelled)
        }
        None => {
            let _ = buf.destroy();
            Err(HostCallError::UnknownCode(status.code))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ffi::codec::lower_to_vec;
    use crate::telio::TelioError;

    fn status(code: i8, payload: Vec<u8>) -> RustCallStatus {
        RustCallStatus {
            code,
            error_buf: RustBuffer::from_vec(payload).unwrap(),
        }
    }

    #[test]
    fn test_success() {
        assert!(check_call_status::<TelioError>(status(0, vec![])).is_ok());
    }

    #[test]
    fn test_expected_error_lifted() {
        let payload = lower_to_vec(&TelioError::AlreadyStarted);
        match check_call_status::<TelioError>(status(1, payload)) {
            Err(HostCallError::Expected(TelioError::AlreadyStarted)) => {}
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_garbage_error_is_lift_failure() {
        let result = check_call_status::<TelioError>(status(1, vec![0, 0]));
        assert!(matches!(result, Err(HostCallError::Lift(_))));
    }

    #[test]
    fn test_panic_messages() {
        match check_call_status::<TelioError>(status(2, b"index out of bounds".to_vec())) {
            Err(HostCallError::Panic(msg)) => assert_eq!(msg, "index out of bounds"),
            other => panic!("unexpected {other:?}"),
        }
        match check_call_status::<TelioError>(status(2, vec![])) {
            Err(HostCallError::Panic(msg)) => assert_eq!(msg, EMPTY_PANIC_MESSAGE),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_cancelled_and_unknown() {
        assert!(matches!(
            check_call_status::<TelioError>(status(3, vec![])),
            Err(HostCallError::Cancelled)
        ));
        assert!(matches!(
            check_call_status::<TelioError>(status(9, vec![])),
            Err(HostCallError::UnknownCode(9))
        ));
    }

    #[test]
    fn test_infallible_rejects_error_code() {
        let result = rust_call_infallible(|st| {
            *st = status(1, vec![0, 0, 0, 1]);
        });
        assert!(matches!(result, Err(HostCallError::UndeclaredError)));
    }

    #[test]
    fn test_value_passed_through() {
        let value = rust_call_host::<_, TelioError, _>(|_| 42u32).unwrap();
        assert_eq!(value, 42);
    }
}
