//! Telio Bridge - Cross-language call boundary for the telio library
//!
//! Telio Bridge exposes a meshnet/VPN device and its helpers to host
//! runtimes (Go, Swift, Kotlin, C) through a flat C ABI, following the
//! uniffi scaffolding contract (version 24, namespace `telio`).
//!
//! # Key Features
//!
//! - **Owned buffers**: `RustBuffer` / `ForeignBytes` with a single owner
//!   and one allocator
//! - **Uniform errors**: every export reports success, a typed error, a
//!   panic or cancellation through `RustCallStatus`
//! - **Callbacks**: host objects for events, logging and socket protection
//!   reached through one registered trampoline per interface
//! - **Async tasks**: poll / cancel / complete / free for every result kind
//! - **Contract gate**: version and per-symbol checksums checked before use
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────┐
//! │   Host binding      │  Go / Swift / Kotlin / C
//! └─────────┬───────────┘
//!           │ extern "C" exports, u64 handles, RustBuffer arguments
//!           ▼
//! ┌─────────────────────┐
//! │   ffi               │  buffers, status, codec, callbacks, futures,
//! │                     │  checksums
//! └─────────┬───────────┘
//!           │
//!           ▼
//! ┌─────────────────────┐
//! │   telio             │  device, keys, records, error domain
//! └─────────────────────┘
//!
//! host     the binding's half, used by tests and the CLI
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod ffi;
pub mod host;
pub mod logging;
pub mod telio;

// Re-export commonly used types
pub use config::{BridgeConfig, ConfigError};
pub use ffi::{
    rust_call, CallError, CallStatusCode, ForeignBytes, ForeignCallback, Json, RustBuffer,
    RustCallStatus, WireFormat, CONTRACT_VERSION,
};
pub use host::{verify_contract, ContractError, ExpectedContract, HostCallError};
pub use telio::{
    Config, Event, Features, PublicKey, SecretKey, Telio, TelioAdapterType, TelioError,
    TelioEventCb, TelioLogLevel, TelioLoggerCb, TelioNode, TelioProtectCb,
};
