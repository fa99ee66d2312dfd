//! Cross-language call bridge
//!
//! The protocol every exported function speaks with the host runtime.
//!
//! # Architecture
//!
//! ```text
//! Host runtime (Go / Swift / Kotlin / C)
//!       │  zeroed RustCallStatus, RustBuffer / ForeignBytes arguments
//!       ▼
//! exports (extern "C", #[no_mangle])
//!       │
//!       ▼
//! status::rust_call ── catch_unwind ──> code 0 / 1 / 2 / 3 + error_buf
//!       │
//!       ├── codec        wire format of arguments, returns and errors
//!       ├── handle_map   u64 handles for objects and tasks
//!       ├── callback     trampolines back into the host
//!       ├── future       poll / cancel / complete / free
//!       └── checksum     contract version + per-symbol checksums
//! ```
//!
//! # Ownership
//!
//! - A `RustBuffer` belongs to whoever last received it and is freed once,
//!   by this library's allocator.
//! - `ForeignBytes` are loaned for one call and never retained.
//! - The status out-parameter is zeroed by the caller; an error buffer
//!   written into it becomes the caller's.

pub mod buffer;
pub mod callback;
pub mod checksum;
pub mod codec;
pub mod exports;
pub mod future;
pub mod handle_map;
pub mod loader;
pub mod status;

pub use buffer::{BufferError, ForeignBytes, RustBuffer};
pub use callback::{
    CallbackCode, CallbackError, CallbackInterface, ForeignCallback, ForeignCallbackHandle,
};
pub use checksum::{ChecksumError, InterfaceSymbol, CONTRACT_VERSION};
pub use codec::{CodecError, Json, WireFormat};
pub use future::{FfiPointer, FutureError, ResultKind, RustFutureContinuation};
pub use handle_map::{HandleError, HandleMap};
pub use loader::{DynamicLibrary, LibraryLoader, LoaderError};
pub use status::{rust_call, CallError, CallStatusCode, RustCallStatus};

/// Forget every callback registration, the continuation and all tasks.
pub fn teardown() {
    callback::registry().teardown();
    future::teardown();
}

#[cfg(test)]
mod tests;
