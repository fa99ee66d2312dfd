//! Errors returned by the device API

use thiserror::Error;

use crate::ffi::codec::{lower_to_vec, CodecError, CodecResult, WireFormat, WireReader};
use crate::ffi::status::CallError;

/// Errors the host sees as `TelioError`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TelioError {
    #[error("{inner}")]
    UnknownError { inner: String },

    #[error("invalid key")]
    InvalidKey,

    #[error("bad config")]
    BadConfig,

    #[error("lock error")]
    LockError,

    #[error("invalid string")]
    InvalidString,

    #[error("device already started")]
    AlreadyStarted,

    #[error("device not started")]
    NotStarted,
}

/// Result type for device operations.
pub type TelioResult<T> = Result<T, TelioError>;

impl TelioError {
    pub fn unknown(inner: impl Into<String>) -> Self {
        Self::UnknownError {
            inner: inner.into(),
        }
    }

    /// Variant index on the wire.
    pub fn code(&self) -> i32 {
        match self {
            Self::UnknownError { .. } => 1,
            Self::InvalidKey => 2,
            Self::BadConfig => 3,
            Self::LockError => 4,
            Self::InvalidString => 5,
            Self::AlreadyStarted => 6,
            Self::NotStarted => 7,
        }
    }
}

impl WireFormat for TelioError {
    fn write(&self, out: &mut Vec<u8>) {
        self.code().write(out);
        if let Self::UnknownError { inner } = self {
            inner.write(out);
        }
    }

    fn read(reader: &mut WireReader<'_>) -> CodecResult<Self> {
        Ok(match i32::read(reader)? {
            1 => Self::UnknownError {
                inner: String::read(reader)?,
            },
            2 => Self::InvalidKey,
            3 => Self::BadConfig,
            4 => Self::LockError,
            5 => Self::InvalidString,
            6 => Self::AlreadyStarted,
            7 => Self::NotStarted,
            value => {
                return Err(CodecError::InvalidVariant {
                    type_name: "TelioError",
                    value,
                })
            }
        })
    }
}

impl From<TelioError> for CallError {
    fn from(e: TelioError) -> Self {
        CallError::Expected(lower_to_vec(&e))
    }
}
