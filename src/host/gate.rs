//! Contract verification
//!
//! Before the first real call a host checks that the library speaks the
//! same contract version and that every symbol it will use has the checksum
//! its bindings were generated against. The first mismatch aborts.

use thiserror::Error;
use tracing::{debug, warn};

use crate::ffi::checksum::{self, CONTRACT_VERSION};
use crate::ffi::exports::{ffi_telio_uniffi_contract_version, CHECKSUM_ACCESSORS};
use crate::ffi::loader::{DynamicLibrary, LoaderError};

use super::call::rust_call_infallible;

/// Gate failures.
#[derive(Debug, Error)]
pub enum ContractError {
    #[error("contract version mismatch: bindings expect {expected}, library reports {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("checksum mismatch for {symbol}: bindings expect {expected}, library reports {found}")]
    ChecksumMismatch {
        symbol: String,
        expected: u16,
        found: u16,
    },

    #[error("library does not export {0}")]
    MissingSymbol(String),

    #[error("gate call failed: {0}")]
    Call(String),
}

/// Source of the values the gate compares.
pub trait ScaffoldingProbe {
    fn contract_version(&self) -> Result<u32, ContractError>;
    fn checksum(&self, accessor: &str) -> Result<u16, ContractError>;
}

/// What the bindings were generated against.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpectedContract {
    pub contract_version: u32,
    /// `(accessor, checksum)` pairs, checked in order.
    pub checksums: Vec<(String, u16)>,
    /// When false a checksum mismatch is logged and verification continues.
    pub strict: bool,
}

impl ExpectedContract {
    /// The contract of this crate's own interface.
    pub fn current() -> Self {
        Self {
            contract_version: CONTRACT_VERSION,
            checksums: checksum::checksum_table(),
            strict: true,
        }
    }

    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Replace the expected checksum of `accessor`.
    pub fn with_checksum(mut self, accessor: &str, value: u16) -> Self {
        match self.checksums.iter_mut().find(|(name, _)| name == accessor) {
            Some(entry) => entry.1 = value,
            None => self.checksums.push((accessor.to_string(), value)),
        }
        self
    }
}

/// Summary of a verification run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GateReport {
    pub contract_version: u32,
    pub checked: usize,
    /// Mismatches tolerated because the contract is not strict.
    pub mismatches: Vec<String>,
}

/// Compare `probe` against `expected`.
pub fn verify_contract(
    probe: &dyn ScaffoldingProbe,
    expected: &ExpectedContract,
) -> Result<GateReport, ContractError> {
    let found = probe.contract_version()?;
    if found != expected.contract_version {
        return Err(ContractError::VersionMismatch {
            expected: expected.contract_version,
            found,
        });
    }

    let mut report = GateReport {
        contract_version: found,
        ..GateReport::default()
    };
    for (accessor, want) in &expected.checksums {
        let got = probe.checksum(accessor)?;
        report.checked += 1;
        if got == *want {
            continue;
        }
        let mismatch = ContractError::ChecksumMismatch {
            symbol: accessor.clone(),
            expected: *want,
            found: got,
        };
        if expected.strict {
            return Err(mismatch);
        }
        warn!(%mismatch, "continuing past checksum mismatch");
        report.mismatches.push(accessor.clone());
    }
    debug!(checked = report.checked, "contract verified");
    Ok(report)
}

/// Probe the exports linked into this process.
#[derive(Debug, Default, Clone, Copy)]
pub struct InProcessProbe;

impl ScaffoldingProbe for InProcessProbe {
    fn contract_version(&self) -> Result<u32, ContractError> {
        rust_call_infallible(|st| ffi_telio_uniffi_contract_version(st))
            .map_err(|e| ContractError::Call(e.to_string()))
    }

    fn checksum(&self, accessor: &str) -> Result<u16, ContractError> {
        let (_, f) = CHECKSUM_ACCESSORS
            .iter()
            .find(|(name, _)| *name == accessor)
            .ok_or_else(|| ContractError::MissingSymbol(accessor.to_string()))?;
        rust_call_infallible(|st| (*f)(st)).map_err(|e| ContractError::Call(e.to_string()))
    }
}

/// Probe a dynamically loaded scaffolding library.
pub struct LibraryProbe {
    library: DynamicLibrary,
}

impl LibraryProbe {
    pub fn new(library: DynamicLibrary) -> Self {
        Self { library }
    }

    pub fn library(&self) -> &DynamicLibrary {
        &self.library
    }
}

fn loader_error(e: LoaderError) -> ContractError {
    match e {
        LoaderError::SymbolNotFound { name, .. } => ContractError::MissingSymbol(name),
        other => ContractError::Call(other.to_string()),
    }
}

impl ScaffoldingProbe for LibraryProbe {
    fn contract_version(&self) -> Result<u32, ContractError> {
        self.library.contract_version().map_err(loader_error)
    }

    fn checksum(&self, accessor: &str) -> Result<u16, ContractError> {
        self.library.checksum(accessor).map_err(loader_error)
    }
}
