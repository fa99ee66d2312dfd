//! Host-implemented callback interfaces
//!
//! Each trait has a `Foreign*` proxy that forwards calls to a host object
//! through the registered trampoline. Method index 1 is the interface's only
//! method; index 0 is the release sent when the proxy is dropped.

use crate::ffi::callback::{CallbackError, CallbackInterface, ForeignCallbackHandle};
use crate::ffi::codec::{lift_from_bytes, lower_to_vec, Json, WireFormat};

use super::error::TelioError;
use super::types::{Event, TelioLogLevel};

pub const METHOD_EVENT: i32 = 1;
pub const METHOD_LOG: i32 = 1;
pub const METHOD_PROTECT: i32 = 1;

/// Receives device events.
pub trait TelioEventCb: Send + Sync {
    fn event(&self, payload: Event) -> Result<(), TelioError>;
}

/// Receives log lines.
pub trait TelioLoggerCb: Send + Sync {
    fn log(&self, log_level: TelioLogLevel, payload: String) -> Result<(), TelioError>;
}

/// Excludes a socket from the tunnel.
pub trait TelioProtectCb: Send + Sync {
    fn protect(&self, socket_id: i32) -> Result<(), TelioError>;
}

/// Map a failed host call onto the error the trait reports.
fn host_error(err: CallbackError) -> TelioError {
    match err {
        CallbackError::Foreign(bytes) => lift_from_bytes::<TelioError>(&bytes)
            .unwrap_or_else(|e| TelioError::unknown(format!("undecodable host error: {e}"))),
        other => TelioError::unknown(other.to_string()),
    }
}

#[derive(Debug)]
pub struct ForeignEventCb(ForeignCallbackHandle);

impl ForeignEventCb {
    pub fn new(handle: u64) -> Self {
        Self(ForeignCallbackHandle::new(CallbackInterface::Event, handle))
    }
}

impl TelioEventCb for ForeignEventCb {
    fn event(&self, payload: Event) -> Result<(), TelioError> {
        let args = lower_to_vec(&Json(payload));
        self.0.invoke(METHOD_EVENT, &args).map(drop).map_err(host_error)
    }
}

#[derive(Debug)]
pub struct ForeignLoggerCb(ForeignCallbackHandle);

impl ForeignLoggerCb {
    pub fn new(handle: u64) -> Self {
        Self(ForeignCallbackHandle::new(CallbackInterface::Logger, handle))
    }
}

impl TelioLoggerCb for ForeignLoggerCb {
    fn log(&self, log_level: TelioLogLevel, payload: String) -> Result<(), TelioError> {
        let mut args = Vec::with_capacity(8 + payload.len());
        log_level.write(&mut args);
        payload.write(&mut args);
        self.0.invoke(METHOD_LOG, &args).map(drop).map_err(host_error)
    }
}

#[derive(Debug)]
pub struct ForeignProtectCb(ForeignCallbackHandle);

impl ForeignProtectCb {
    pub fn new(handle: u64) -> Self {
        Self(ForeignCallbackHandle::new(CallbackInterface::Protect, handle))
    }
}

impl TelioProtectCb for ForeignProtectCb {
    fn protect(&self, socket_id: i32) -> Result<(), TelioError> {
        let args = lower_to_vec(&socket_id);
        self.0.invoke(METHOD_PROTECT, &args).map(drop).map_err(host_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_foreign_error_is_lifted() {
        let bytes = lower_to_vec(&TelioError::NotStarted);
        assert_eq!(host_error(CallbackError::Foreign(bytes)), TelioError::NotStarted);
    }

    #[test]
    fn test_garbage_foreign_error() {
        let err = host_error(CallbackError::Foreign(vec![1, 2]));
        assert!(matches!(err, TelioError::UnknownError { .. }));
    }

    #[test]
    fn test_other_failures_become_unknown() {
        let err = host_error(CallbackError::Unexpected("host exploded".into()));
        assert_eq!(err, TelioError::unknown("host callback failed: host exploded"));
    }
}
