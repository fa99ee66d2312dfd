//! Host side of the bridge
//!
//! What a generated binding does on its end of the boundary: call exports
//! and interpret the status they leave behind, serve callback trampolines
//! for host objects, and check the contract before the first real call.

pub mod call;
pub mod dispatch;
pub mod gate;

pub use call::{check_call_status, rust_call_host, rust_call_infallible, HostCallError};
pub use dispatch::{
    register_trampolines, CallbackDispatcher, EVENT_CALLBACKS, LOGGER_CALLBACKS,
    PROTECT_CALLBACKS,
};
pub use gate::{
    verify_contract, ContractError, ExpectedContract, GateReport, InProcessProbe, LibraryProbe,
    ScaffoldingProbe,
};
