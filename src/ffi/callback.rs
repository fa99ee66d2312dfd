//! Callback registration and invocation
//!
//! The host registers one trampoline per callback interface. Host objects
//! implementing an interface are known to this library only as a `u64`
//! handle; calling a method means calling the trampoline with that handle,
//! a method index and the serialized arguments.
//!
//! Method index 0 is reserved: it tells the host that this library has
//! dropped its last reference to the handle.

use std::fmt;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, warn};

use super::buffer::{BufferError, RustBuffer};

/// Host-side trampoline.
pub type ForeignCallback = extern "C" fn(
    handle: u64,
    method: i32,
    args_data: *const u8,
    args_len: i32,
    out_buf: *mut RustBuffer,
) -> i32;

/// Method index that releases the host object.
pub const IDX_CALLBACK_FREE: i32 = 0;

/// Trampoline return codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum CallbackCode {
    Success = 0,
    /// `out_buf` holds a serialized domain error.
    Error = 1,
    /// `out_buf` may hold a UTF-8 message.
    Unexpected = 2,
    Cancelled = 3,
}

impl CallbackCode {
    pub fn from_i32(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Success),
            1 => Some(Self::Error),
            2 => Some(Self::Unexpected),
            3 => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// Callback interfaces this library calls out to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackInterface {
    Event,
    Logger,
    Protect,
}

impl CallbackInterface {
    pub const ALL: [CallbackInterface; 3] = [Self::Event, Self::Logger, Self::Protect];

    pub fn name(self) -> &'static str {
        match self {
            Self::Event => "TelioEventCb",
            Self::Logger => "TelioLoggerCb",
            Self::Protect => "TelioProtectCb",
        }
    }

    fn slot(self) -> usize {
        match self {
            Self::Event => 0,
            Self::Logger => 1,
            Self::Protect => 2,
        }
    }
}

impl fmt::Display for CallbackInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Callback failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallbackError {
    #[error("no callback registered for {0}")]
    NotRegistered(CallbackInterface),

    #[error("a different callback is already registered for {0}")]
    AlreadyRegistered(CallbackInterface),

    #[error("null callback pointer for {0}")]
    NullCallback(CallbackInterface),

    /// The host returned a serialized domain error.
    #[error("host callback returned an error")]
    Foreign(Vec<u8>),

    #[error("host callback failed: {0}")]
    Unexpected(String),

    #[error("host callback was cancelled")]
    Cancelled,

    #[error("host callback returned unknown code {0}")]
    UnknownCode(i32),

    #[error(transparent)]
    Buffer(#[from] BufferError),
}

/// Result type for callback operations.
pub type CallbackResult<T> = Result<T, CallbackError>;

/// One trampoline slot per interface.
pub struct CallbackRegistry {
    slots: [RwLock<Option<ForeignCallback>>; 3],
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self {
            slots: [RwLock::new(None), RwLock::new(None), RwLock::new(None)],
        }
    }

    /// Register a trampoline. Registering the same pointer again is a no-op.
    pub fn register(&self, iface: CallbackInterface, callback: ForeignCallback) -> CallbackResult<()> {
        let mut slot = self.slots[iface.slot()].write();
        match *slot {
            Some(existing) if existing as usize == callback as usize => Ok(()),
            Some(_) => Err(CallbackError::AlreadyRegistered(iface)),
            None => {
                debug!(interface = %iface, "callback registered");
                *slot = Some(callback);
                Ok(())
            }
        }
    }

    pub fn get(&self, iface: CallbackInterface) -> CallbackResult<ForeignCallback> {
        self.slots[iface.slot()]
            .read()
            .ok_or(CallbackError::NotRegistered(iface))
    }

    pub fn is_registered(&self, iface: CallbackInterface) -> bool {
        self.slots[iface.slot()].read().is_some()
    }

    /// Forget every registration.
    pub fn teardown(&self) {
        for slot in &self.slots {
            *slot.write() = None;
        }
    }
}

impl Default for CallbackRegistry {
    fn default() -> Self {
        Self::new()
    }
}

static REGISTRY: Lazy<CallbackRegistry> = Lazy::new(CallbackRegistry::new);

/// The process-wide registry.
pub fn registry() -> &'static CallbackRegistry {
    &REGISTRY
}

/// Register a trampoline that may arrive as a null pointer from C.
pub fn register(iface: CallbackInterface, callback: Option<ForeignCallback>) -> CallbackResult<()> {
    let callback = callback.ok_or(CallbackError::NullCallback(iface))?;
    registry().register(iface, callback)
}

/// A host object, as seen from this side.
///
/// Dropping the handle sends method 0 so the host can release its object.
#[derive(Debug)]
pub struct ForeignCallbackHandle {
    iface: CallbackInterface,
    handle: u64,
}

impl ForeignCallbackHandle {
    pub fn new(iface: CallbackInterface, handle: u64) -> Self {
        Self { iface, handle }
    }

    pub fn interface(&self) -> CallbackInterface {
        self.iface
    }

    pub fn handle(&self) -> u64 {
        self.handle
    }

    /// Call `method` with serialized `args`, returning the serialized result.
    pub fn invoke(&self, method: i32, args: &[u8]) -> CallbackResult<Vec<u8>> {
        let callback = registry().get(self.iface)?;
        let args_len =
            i32::try_from(args.len()).map_err(|_| BufferError::TooLarge(args.len()))?;

        let mut out = RustBuffer::empty();
        let code = callback(self.handle, method, args.as_ptr(), args_len, &mut out);
        let payload = out.destroy_into_vec()?;

        match CallbackCode::from_i32(code) {
            Some(CallbackCode::Success) => Ok(payload),
            Some(CallbackCode::Error) => Err(CallbackError::Foreign(payload)),
            Some(CallbackCode::Unexpected) => {
                let msg = String::from_utf8(payload)
                    .unwrap_or_else(|_| "host callback failed with a non UTF-8 message".into());
                Err(CallbackError::Unexpected(msg))
            }
            Some(CallbackCode::Cancelled) => Err(CallbackError::Cancelled),
            None => Err(CallbackError::UnknownCode(code)),
        }
    }
}

impl Drop for ForeignCallbackHandle {
    fn drop(&mut self) {
        if !registry().is_registered(self.iface) {
            return;
        }
        if let Err(e) = self.invoke(IDX_CALLBACK_FREE, &[]) {
            warn!(interface = %self.iface, handle = self.handle, error = %e, "failed to release host callback");
        }
    }
}
