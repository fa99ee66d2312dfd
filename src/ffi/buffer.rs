//! Owned and borrowed byte buffers
//!
//! `RustBuffer` is the only way bytes travel from this library to the host
//! and back again. The struct layout is part of the ABI and must not change.
//! Fields are private so safe Rust can only build a buffer through
//! [`RustBuffer::from_vec`]; buffers handed in by the host are trusted at the
//! `extern "C"` boundary.

use std::ptr;

use thiserror::Error;
use tracing::{debug, warn};

/// Buffer protocol violations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BufferError {
    #[error("buffer size {0} is negative")]
    NegativeSize(i64),

    #[error("buffer size {0} exceeds i32::MAX")]
    TooLarge(usize),

    #[error("buffer has null data but capacity {0}")]
    NullWithCapacity(i32),

    #[error("borrowed span has null data but length {0}")]
    NullSpan(i32),

    #[error("buffer is inconsistent: len {len} capacity {capacity}")]
    Inconsistent { len: i32, capacity: i32 },

    #[error("allocation of {0} bytes failed")]
    AllocationFailed(usize),

    #[error("buffer at {0:#x} was already freed")]
    DoubleFree(usize),
}

/// Result type for buffer operations.
pub type BufferResult<T> = Result<T, BufferError>;

/// A byte buffer allocated by this library.
///
/// Whoever holds the value owns the storage. It must come back through
/// [`RustBuffer::destroy_into_vec`] (or the `ffi_telio_rustbuffer_free`
/// export) exactly once.
#[repr(C)]
#[derive(Debug)]
pub struct RustBuffer {
    capacity: i32,
    len: i32,
    data: *mut u8,
}

// Ownership is exclusive; the pointer is never shared between two values.
unsafe impl Send for RustBuffer {}

impl RustBuffer {
    /// An empty buffer with no storage.
    pub const fn empty() -> Self {
        Self {
            capacity: 0,
            len: 0,
            data: ptr::null_mut(),
        }
    }

    /// Rebuild a buffer from its raw parts.
    ///
    /// # Safety
    ///
    /// The parts must describe a buffer previously produced by this library
    /// that has not been freed yet, or be an empty buffer.
    pub unsafe fn from_raw_parts(data: *mut u8, len: i32, capacity: i32) -> Self {
        Self {
            capacity,
            len,
            data,
        }
    }

    /// Take ownership of a vector's storage.
    pub fn from_vec(mut v: Vec<u8>) -> BufferResult<Self> {
        if v.capacity() > i32::MAX as usize {
            v.shrink_to_fit();
        }
        let capacity = i32::try_from(v.capacity()).map_err(|_| BufferError::TooLarge(v.capacity()))?;
        let len = i32::try_from(v.len()).map_err(|_| BufferError::TooLarge(v.len()))?;

        if capacity == 0 {
            return Ok(Self::empty());
        }

        let mut v = std::mem::ManuallyDrop::new(v);
        let data = v.as_mut_ptr();
        live::track(data);
        Ok(Self {
            capacity,
            len,
            data,
        })
    }

    /// Hand the storage back to a `Vec`, consuming the buffer.
    pub fn destroy_into_vec(self) -> BufferResult<Vec<u8>> {
        if self.capacity < 0 || self.len < 0 || self.len > self.capacity {
            return Err(BufferError::Inconsistent {
                len: self.len,
                capacity: self.capacity,
            });
        }
        if self.data.is_null() {
            if self.capacity != 0 {
                return Err(BufferError::NullWithCapacity(self.capacity));
            }
            return Ok(Vec::new());
        }
        if self.capacity == 0 {
            return Err(BufferError::Inconsistent {
                len: self.len,
                capacity: self.capacity,
            });
        }
        live::untrack(self.data)?;

        // Safety: data/len/capacity were produced by `from_vec` and the live
        // set confirms the allocation has not been released.
        Ok(unsafe { Vec::from_raw_parts(self.data, self.len as usize, self.capacity as usize) })
    }

    /// Release the storage.
    pub fn destroy(self) -> BufferResult<()> {
        self.destroy_into_vec().map(drop)
    }

    /// View the initialized bytes.
    pub fn as_slice(&self) -> &[u8] {
        if self.data.is_null() || self.len <= 0 {
            return &[];
        }
        // Safety: a non-null buffer owns at least `len` initialized bytes.
        unsafe { std::slice::from_raw_parts(self.data, self.len as usize) }
    }

    pub fn len(&self) -> usize {
        self.len.max(0) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len <= 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity.max(0) as usize
    }

    pub fn data_ptr(&self) -> *const u8 {
        self.data
    }
}

impl Default for RustBuffer {
    fn default() -> Self {
        Self::empty()
    }
}

/// Bytes loaned by the host for the duration of one call.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ForeignBytes {
    len: i32,
    data: *const u8,
}

impl ForeignBytes {
    /// Borrow a slice as a span. The span must not outlive `bytes`.
    pub fn from_slice(bytes: &[u8]) -> BufferResult<Self> {
        let len = i32::try_from(bytes.len()).map_err(|_| BufferError::TooLarge(bytes.len()))?;
        Ok(Self {
            len,
            data: bytes.as_ptr(),
        })
    }

    /// # Safety
    ///
    /// `data` must be valid for reads of `len` bytes for as long as the
    /// span is used.
    pub unsafe fn from_raw_parts(data: *const u8, len: i32) -> Self {
        Self { len, data }
    }

    /// View the loaned bytes.
    ///
    /// # Safety
    ///
    /// The memory behind the span must still be live.
    pub unsafe fn as_slice<'a>(&self) -> BufferResult<&'a [u8]> {
        if self.len < 0 {
            return Err(BufferError::NegativeSize(self.len as i64));
        }
        if self.data.is_null() {
            if self.len != 0 {
                return Err(BufferError::NullSpan(self.len));
            }
            return Ok(&[]);
        }
        Ok(std::slice::from_raw_parts(self.data, self.len as usize))
    }

    pub fn len(&self) -> usize {
        self.len.max(0) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len <= 0
    }
}

/// Allocate a buffer with room for at least `size` bytes and length 0.
pub fn alloc(size: i32) -> BufferResult<RustBuffer> {
    if size < 0 {
        return Err(BufferError::NegativeSize(size as i64));
    }
    let size = size as usize;
    let mut v = Vec::new();
    v.try_reserve_exact(size)
        .map_err(|_| BufferError::AllocationFailed(size))?;
    debug!(size, "rustbuffer alloc");
    RustBuffer::from_vec(v)
}

/// Copy a borrowed span into a new buffer.
///
/// # Safety
///
/// See [`ForeignBytes::as_slice`].
pub unsafe fn from_bytes(bytes: ForeignBytes) -> BufferResult<RustBuffer> {
    let slice = bytes.as_slice()?;
    RustBuffer::from_vec(slice.to_vec())
}

/// Release a buffer.
pub fn free(buf: RustBuffer) -> BufferResult<()> {
    buf.destroy().map_err(|e| {
        warn!(error = %e, "rustbuffer free rejected");
        e
    })
}

/// Grow a buffer so that at least `additional` more bytes fit.
///
/// The input is consumed whatever the outcome; on error its storage has
/// already been released.
pub fn reserve(buf: RustBuffer, additional: i32) -> BufferResult<RustBuffer> {
    let mut v = buf.destroy_into_vec()?;
    if additional < 0 {
        return Err(BufferError::NegativeSize(additional as i64));
    }
    let additional = additional as usize;
    let wanted = v.len().saturating_add(additional);
    if wanted > i32::MAX as usize {
        return Err(BufferError::TooLarge(wanted));
    }
    v.try_reserve_exact(additional)
        .map_err(|_| BufferError::AllocationFailed(wanted))?;
    RustBuffer::from_vec(v)
}

/// Live allocation tracking.
///
/// Debug builds remember every pointer handed out so that a second free is
/// reported instead of corrupting the heap. Release builds skip the
/// bookkeeping.
mod live {
    use super::BufferError;

    #[cfg(debug_assertions)]
    mod imp {
        use std::collections::HashSet;

        use once_cell::sync::Lazy;
        use parking_lot::Mutex;

        use super::BufferError;

        static LIVE: Lazy<Mutex<HashSet<usize>>> = Lazy::new(|| Mutex::new(HashSet::new()));

        pub fn track(ptr: *mut u8) {
            LIVE.lock().insert(ptr as usize);
        }

        pub fn untrack(ptr: *mut u8) -> Result<(), BufferError> {
            if LIVE.lock().remove(&(ptr as usize)) {
                Ok(())
            } else {
                Err(BufferError::DoubleFree(ptr as usize))
            }
        }
    }

    #[cfg(not(debug_assertions))]
    mod imp {
        use super::BufferError;

        #[inline(always)]
        pub fn track(_ptr: *mut u8) {}

        #[inline(always)]
        pub fn untrack(_ptr: *mut u8) -> Result<(), BufferError> {
            Ok(())
        }
    }

    pub fn track(ptr: *mut u8) {
        imp::track(ptr)
    }

    pub fn untrack(ptr: *mut u8) -> Result<(), BufferError> {
        imp::untrack(ptr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_buffer_has_null_data() {
        let buf = RustBuffer::empty();
        assert!(buf.data_ptr().is_null());
        assert_eq!(buf.capacity(), 0);
        assert!(buf.destroy_into_vec().unwrap().is_empty());
    }

    #[test]
    fn test_alloc_capacity_and_len() {
        let buf = alloc(64).unwrap();
        assert!(buf.capacity() >= 64);
        assert_eq!(buf.len(), 0);
        assert!(!buf.data_ptr().is_null());
        free(buf).unwrap();
    }

    #[test]
    fn test_alloc_zero_is_empty() {
        let buf = alloc(0).unwrap();
        assert!(buf.data_ptr().is_null());
        free(buf).unwrap();
    }

    #[test]
    fn test_alloc_negative_rejected() {
        assert_eq!(alloc(-1).unwrap_err(), BufferError::NegativeSize(-1));
    }

    #[test]
    fn test_from_vec_round_trip() {
        let buf = RustBuffer::from_vec(b"telio".to_vec()).unwrap();
        assert_eq!(buf.as_slice(), b"telio");
        assert_eq!(buf.destroy_into_vec().unwrap(), b"telio");
    }

    #[test]
    fn test_reserve_preserves_content() {
        let buf = RustBuffer::from_vec(vec![1, 2, 3]).unwrap();
        let grown = reserve(buf, 100).unwrap();
        assert_eq!(grown.as_slice(), &[1, 2, 3]);
        assert!(grown.capacity() >= 103);
        free(grown).unwrap();
    }

    #[test]
    fn test_reserve_negative_rejected() {
        let buf = RustBuffer::from_vec(vec![1]).unwrap();
        assert!(matches!(reserve(buf, -4), Err(BufferError::NegativeSize(-4))));
    }

    #[test]
    fn test_null_data_with_capacity_rejected() {
        let buf = unsafe { RustBuffer::from_raw_parts(ptr::null_mut(), 0, 16) };
        assert_eq!(buf.destroy().unwrap_err(), BufferError::NullWithCapacity(16));
    }

    #[test]
    fn test_len_beyond_capacity_rejected() {
        let buf = unsafe { RustBuffer::from_raw_parts(ptr::null_mut(), 8, 4) };
        assert!(matches!(
            buf.destroy(),
            Err(BufferError::Inconsistent { len: 8, capacity: 4 })
        ));
    }

    #[test]
    fn test_null_span_with_length_rejected() {
        let span = unsafe { ForeignBytes::from_raw_parts(ptr::null(), 3) };
        assert_eq!(
            unsafe { from_bytes(span) }.unwrap_err(),
            BufferError::NullSpan(3)
        );
    }

    #[cfg(debug_assertions)]
    #[test]
    fn test_untracked_pointer_rejected() {
        let mut v = std::mem::ManuallyDrop::new(vec![9u8; 32]);
        let forged = unsafe { RustBuffer::from_raw_parts(v.as_mut_ptr(), 32, v.capacity() as i32) };
        assert!(matches!(free(forged), Err(BufferError::DoubleFree(_))));
        unsafe { std::mem::ManuallyDrop::drop(&mut v) };
    }
}
