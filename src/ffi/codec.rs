//! Wire serialization
//!
//! Values crossing the boundary inside a [`RustBuffer`] use a big-endian
//! layout shared with the host bindings:
//!
//! ```text
//! integers, floats   network byte order
//! bool               i8, 0 or 1
//! String             i32 byte length, UTF-8 bytes
//! Option<T>          i8 tag (0 none, 1 some), then T
//! Vec<T>             i32 item count, then items
//! enum               i32 variant index, starting at 1
//! record             Json<T>: the record's JSON text as a String
//! ```
//!
//! A top-level string argument is the exception: it travels as raw UTF-8
//! without a length prefix ([`lower_string`], [`lift_string`]).

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use super::buffer::{BufferError, RustBuffer};

/// Decoding errors.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("unexpected end of buffer: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEnd { needed: usize, remaining: usize },

    #[error("junk data left in buffer after lifting: {0} bytes")]
    TrailingBytes(usize),

    #[error("invalid bool value {0}")]
    InvalidBool(i8),

    #[error("invalid option tag {0}")]
    InvalidTag(i8),

    #[error("negative length {0}")]
    NegativeLength(i32),

    #[error("invalid {type_name} variant {value}")]
    InvalidVariant { type_name: &'static str, value: i32 },

    #[error("invalid UTF-8 in string")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("invalid record JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Buffer(#[from] BufferError),
}

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Cursor over serialized bytes.
pub struct WireReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn take(&mut self, n: usize) -> CodecResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(CodecError::UnexpectedEnd {
                needed: n,
                remaining: self.remaining(),
            });
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn take_array<const N: usize>(&mut self) -> CodecResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    /// Fail if anything is left unread.
    pub fn finish(self) -> CodecResult<()> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(CodecError::TrailingBytes(n)),
        }
    }
}

/// A type with a wire representation.
pub trait WireFormat: Sized {
    fn write(&self, out: &mut Vec<u8>);
    fn read(reader: &mut WireReader<'_>) -> CodecResult<Self>;
}

macro_rules! impl_wire_number {
    ($($ty:ty),* $(,)?) => {
        $(
            impl WireFormat for $ty {
                fn write(&self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_be_bytes());
                }

                fn read(reader: &mut WireReader<'_>) -> CodecResult<Self> {
                    Ok(<$ty>::from_be_bytes(reader.take_array()?))
                }
            }
        )*
    };
}

impl_wire_number!(u8, i8, u16, i16, u32, i32, u64, i64, f32, f64);

impl WireFormat for bool {
    fn write(&self, out: &mut Vec<u8>) {
        (*self as i8).write(out);
    }

    fn read(reader: &mut WireReader<'_>) -> CodecResult<Self> {
        match i8::read(reader)? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(CodecError::InvalidBool(other)),
        }
    }
}

/// Read an i32 length prefix.
fn read_len(reader: &mut WireReader<'_>) -> CodecResult<usize> {
    let len = i32::read(reader)?;
    if len < 0 {
        return Err(CodecError::NegativeLength(len));
    }
    Ok(len as usize)
}

// Lengths above i32::MAX cannot be represented; the buffer layer rejects
// such payloads before they leave the process.
fn write_len(len: usize, out: &mut Vec<u8>) {
    (len.min(i32::MAX as usize) as i32).write(out);
}

impl WireFormat for String {
    fn write(&self, out: &mut Vec<u8>) {
        write_len(self.len(), out);
        out.extend_from_slice(self.as_bytes());
    }

    fn read(reader: &mut WireReader<'_>) -> CodecResult<Self> {
        let len = read_len(reader)?;
        let bytes = reader.take(len)?;
        Ok(String::from_utf8(bytes.to_vec())?)
    }
}

impl<T: WireFormat> WireFormat for Option<T> {
    fn write(&self, out: &mut Vec<u8>) {
        match self {
            None => 0i8.write(out),
            Some(v) => {
                1i8.write(out);
                v.write(out);
            }
        }
    }

    fn read(reader: &mut WireReader<'_>) -> CodecResult<Self> {
        match i8::read(reader)? {
            0 => Ok(None),
            1 => Ok(Some(T::read(reader)?)),
            tag => Err(CodecError::InvalidTag(tag)),
        }
    }
}

impl<T: WireFormat> WireFormat for Vec<T> {
    fn write(&self, out: &mut Vec<u8>) {
        write_len(self.len(), out);
        for item in self {
            item.write(out);
        }
    }

    fn read(reader: &mut WireReader<'_>) -> CodecResult<Self> {
        let count = read_len(reader)?;
        // Every item takes at least one byte.
        let mut items = Vec::with_capacity(count.min(reader.remaining()));
        for _ in 0..count {
            items.push(T::read(reader)?);
        }
        Ok(items)
    }
}

/// A serde record carried as its JSON text.
#[derive(Debug, Clone, PartialEq)]
pub struct Json<T>(pub T);

impl<T: Serialize + DeserializeOwned> WireFormat for Json<T> {
    fn write(&self, out: &mut Vec<u8>) {
        // Serializing plain data records to a string does not fail.
        let text = serde_json::to_string(&self.0).unwrap_or_default();
        text.write(out);
    }

    fn read(reader: &mut WireReader<'_>) -> CodecResult<Self> {
        let text = String::read(reader)?;
        Ok(Json(serde_json::from_str(&text)?))
    }
}

/// Implement [`WireFormat`] for a fieldless enum with 1-based variants.
#[macro_export]
macro_rules! wire_enum {
    ($ty:ident { $($variant:ident = $index:literal),* $(,)? }) => {
        impl $crate::ffi::codec::WireFormat for $ty {
            fn write(&self, out: &mut Vec<u8>) {
                let index: i32 = match self {
                    $($ty::$variant => $index,)*
                };
                $crate::ffi::codec::WireFormat::write(&index, out);
            }

            fn read(
                reader: &mut $crate::ffi::codec::WireReader<'_>,
            ) -> $crate::ffi::codec::CodecResult<Self> {
                let index = <i32 as $crate::ffi::codec::WireFormat>::read(reader)?;
                match index {
                    $($index => Ok($ty::$variant),)*
                    value => Err($crate::ffi::codec::CodecError::InvalidVariant {
                        type_name: stringify!($ty),
                        value,
                    }),
                }
            }
        }
    };
}

/// Serialize a value into plain bytes.
pub fn lower_to_vec<T: WireFormat>(value: &T) -> Vec<u8> {
    let mut out = Vec::new();
    value.write(&mut out);
    out
}

/// Serialize a value into a new buffer.
pub fn lower_into_buffer<T: WireFormat>(value: &T) -> CodecResult<RustBuffer> {
    Ok(RustBuffer::from_vec(lower_to_vec(value))?)
}

/// Decode bytes that must hold exactly one value.
pub fn lift_from_bytes<T: WireFormat>(bytes: &[u8]) -> CodecResult<T> {
    let mut reader = WireReader::new(bytes);
    let value = T::read(&mut reader)?;
    reader.finish()?;
    Ok(value)
}

/// Decode and free a buffer that must hold exactly one value.
pub fn lift_from_buffer<T: WireFormat>(buf: RustBuffer) -> CodecResult<T> {
    let bytes = buf.destroy_into_vec()?;
    lift_from_bytes(&bytes)
}

/// A top-level string becomes a buffer of raw UTF-8.
pub fn lower_string(s: impl Into<String>) -> CodecResult<RustBuffer> {
    Ok(RustBuffer::from_vec(s.into().into_bytes())?)
}

/// Decode and free a buffer of raw UTF-8.
pub fn lift_string(buf: RustBuffer) -> CodecResult<String> {
    lift_utf8(buf.destroy_into_vec()?)
}

/// Decode raw UTF-8 already taken out of a buffer.
pub fn lift_utf8(bytes: Vec<u8>) -> CodecResult<String> {
    Ok(String::from_utf8(bytes)?)
}

/// Take the storage of every buffer argument of a call.
///
/// All buffers are released before the first error is reported, so nothing
/// decoded afterwards can leave one behind.
pub fn take_buffers<const N: usize>(bufs: [RustBuffer; N]) -> CodecResult<[Vec<u8>; N]> {
    let taken = bufs.map(RustBuffer::destroy_into_vec);
    if let Some(err) = taken.iter().find_map(|r| r.as_ref().err()) {
        return Err(err.clone().into());
    }
    Ok(taken.map(Result::unwrap_or_default))
}
