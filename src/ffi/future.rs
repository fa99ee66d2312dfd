//! Asynchronous task bridge
//!
//! An async operation started by an export is stored as a [`RustFuture`] in
//! a handle table and driven by the host through four calls per result
//! kind: `poll`, `cancel`, `complete` and `free`.
//!
//! ```text
//!            poll -> ready            complete
//! Pending ------------------> Ready -----------> Consumed
//!    |
//!    | cancel
//!    v
//! Canceled
//! ```
//!
//! Every `poll` ends in exactly one call of the registered continuation
//! with the `data` pointer passed to that poll: [`POLL_READY`] once the
//! task is done (or canceled), [`POLL_MAYBE_READY`] when a waker fires on
//! a task that is still pending.

use std::any::Any;
use std::ffi::c_void;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};

use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tracing::{debug, warn};

use super::buffer::RustBuffer;
use super::handle_map::{tags, HandleError, HandleMap};
use super::status::{panic_message, CallError, FfiDefault};

/// The task finished; call `complete`.
pub const POLL_READY: i8 = 0;
/// Something changed; call `poll` again.
pub const POLL_MAYBE_READY: i8 = 1;

/// Host function told about task progress.
pub type RustFutureContinuation = extern "C" fn(data: *const c_void, poll_code: i8);

/// Result type tag of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultKind {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    F32,
    F64,
    Pointer,
    RustBuffer,
    Void,
}

impl ResultKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::U8 => "u8",
            Self::I8 => "i8",
            Self::U16 => "u16",
            Self::I16 => "i16",
            Self::U32 => "u32",
            Self::I32 => "i32",
            Self::U64 => "u64",
            Self::I64 => "i64",
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::Pointer => "pointer",
            Self::RustBuffer => "rust_buffer",
            Self::Void => "void",
        }
    }
}

impl fmt::Display for ResultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Opaque pointer result.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FfiPointer(pub *const c_void);

// The pointer is only carried, never dereferenced, on this side.
unsafe impl Send for FfiPointer {}

impl FfiDefault for FfiPointer {
    fn ffi_default() -> Self {
        FfiPointer(std::ptr::null())
    }
}

/// A value a task can produce.
pub trait FfiReturn: FfiDefault + Sized + Send + 'static {
    const KIND: ResultKind;

    /// Release a value that was never handed to the host.
    fn discard(self) {}
}

macro_rules! impl_ffi_return {
    ($($ty:ty => $kind:ident),* $(,)?) => {
        $(
            impl FfiReturn for $ty {
                const KIND: ResultKind = ResultKind::$kind;
            }
        )*
    };
}

impl_ffi_return!(
    u8 => U8,
    i8 => I8,
    u16 => U16,
    i16 => I16,
    u32 => U32,
    i32 => I32,
    u64 => U64,
    i64 => I64,
    f32 => F32,
    f64 => F64,
    FfiPointer => Pointer,
    () => Void,
);

impl FfiReturn for RustBuffer {
    const KIND: ResultKind = ResultKind::RustBuffer;

    fn discard(self) {
        if let Err(e) = self.destroy() {
            warn!(error = %e, "failed to release uncollected task result");
        }
    }
}

/// Task protocol violations.
#[derive(Debug, Error)]
pub enum FutureError {
    #[error(transparent)]
    Handle(#[from] HandleError),

    #[error("task produces {found}, {expected} was requested")]
    KindMismatch {
        expected: ResultKind,
        found: ResultKind,
    },

    #[error("task {0:#018x} is not ready")]
    NotReady(u64),

    #[error("task {0:#018x} was already completed")]
    AlreadyCompleted(u64),

    #[error("task {0:#018x} is still pending and cannot be freed")]
    StillPending(u64),
}

/// Result type for task operations.
pub type FutureResult<T> = Result<T, FutureError>;

type TaskFuture<T> = Pin<Box<dyn Future<Output = Result<T, CallError>> + Send + 'static>>;

enum Phase<T> {
    Pending(TaskFuture<T>),
    /// The inner future is out on loan to a poll in progress.
    Polling,
    Ready(Result<T, CallError>),
    Consumed,
    Canceled,
}

struct Inner<T> {
    phase: Phase<T>,
    cancel_requested: bool,
    waiting: Option<Arc<WakeSlot>>,
}

/// Continuation for one poll call. Fires at most once.
struct WakeSlot {
    data: usize,
    fired: AtomicBool,
}

impl WakeSlot {
    fn new(data: *const c_void) -> Arc<Self> {
        Arc::new(Self {
            data: data as usize,
            fired: AtomicBool::new(false),
        })
    }

    fn fire(&self, code: i8) {
        if !self.fired.swap(true, Ordering::AcqRel) {
            invoke_continuation(self.data as *const c_void, code);
        }
    }
}

impl Wake for WakeSlot {
    fn wake(self: Arc<Self>) {
        self.fire(POLL_MAYBE_READY);
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.fire(POLL_MAYBE_READY);
    }
}

/// A task whose result is a `T`.
pub struct RustFuture<T> {
    inner: Mutex<Inner<T>>,
}

impl<T: FfiReturn> RustFuture<T> {
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = Result<T, CallError>> + Send + 'static,
    {
        Self {
            inner: Mutex::new(Inner {
                phase: Phase::Pending(Box::pin(future)),
                cancel_requested: false,
                waiting: None,
            }),
        }
    }

    fn poll(&self, data: *const c_void) {
        let slot = WakeSlot::new(data);

        let mut inner = self.inner.lock();
        let mut future = match std::mem::replace(&mut inner.phase, Phase::Polling) {
            Phase::Pending(future) => future,
            Phase::Polling => {
                // Polled concurrently; the host will come back.
                drop(inner);
                slot.fire(POLL_MAYBE_READY);
                return;
            }
            done => {
                inner.phase = done;
                drop(inner);
                slot.fire(POLL_READY);
                return;
            }
        };
        drop(inner);

        let waker = Waker::from(Arc::clone(&slot));
        let mut cx = Context::from_waker(&waker);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(&mut cx)));

        let mut inner = self.inner.lock();
        if inner.cancel_requested {
            inner.phase = Phase::Canceled;
            let previous = inner.waiting.take();
            drop(inner);
            drop(future);
            if let Some(previous) = previous {
                previous.fire(POLL_READY);
            }
            slot.fire(POLL_READY);
            return;
        }

        let result = match outcome {
            Ok(Poll::Pending) => {
                inner.phase = Phase::Pending(future);
                let previous = inner.waiting.replace(slot);
                drop(inner);
                if let Some(previous) = previous {
                    previous.fire(POLL_MAYBE_READY);
                }
                return;
            }
            Ok(Poll::Ready(result)) => result,
            Err(payload) => Err(CallError::Unexpected(panic_message(payload.as_ref()))),
        };

        inner.phase = Phase::Ready(result);
        let previous = inner.waiting.take();
        drop(inner);
        drop(future);
        if let Some(previous) = previous {
            previous.fire(POLL_READY);
        }
        slot.fire(POLL_READY);
    }

    fn cancel(&self) {
        let mut inner = self.inner.lock();
        match std::mem::replace(&mut inner.phase, Phase::Canceled) {
            Phase::Pending(future) => {
                let waiting = inner.waiting.take();
                drop(inner);
                drop(future);
                if let Some(waiting) = waiting {
                    waiting.fire(POLL_READY);
                }
            }
            Phase::Polling => {
                inner.phase = Phase::Polling;
                inner.cancel_requested = true;
            }
            other => inner.phase = other,
        }
    }

    fn complete(&self, handle: u64) -> Result<T, CallError> {
        let mut inner = self.inner.lock();
        match std::mem::replace(&mut inner.phase, Phase::Consumed) {
            Phase::Ready(result) => result,
            Phase::Consumed => Err(FutureError::AlreadyCompleted(handle).into()),
            Phase::Canceled => {
                inner.phase = Phase::Canceled;
                Err(CallError::Cancelled)
            }
            other => {
                inner.phase = other;
                Err(FutureError::NotReady(handle).into())
            }
        }
    }

    fn can_free(&self) -> bool {
        !matches!(self.inner.lock().phase, Phase::Pending(_) | Phase::Polling)
    }

    fn release(&self) {
        let mut inner = self.inner.lock();
        if let Phase::Ready(Ok(_)) = inner.phase {
            if let Phase::Ready(Ok(value)) = std::mem::replace(&mut inner.phase, Phase::Consumed) {
                drop(inner);
                value.discard();
            }
        }
    }
}

/// Kind-erased view stored in the task table.
trait ErasedFuture: Send + Sync {
    fn kind(&self) -> ResultKind;
    fn poll(&self, data: *const c_void);
    fn cancel(&self);
    fn can_free(&self) -> bool;
    fn release(&self);
    fn as_any(&self) -> &dyn Any;
}

impl<T: FfiReturn> ErasedFuture for RustFuture<T> {
    fn kind(&self) -> ResultKind {
        T::KIND
    }

    fn poll(&self, data: *const c_void) {
        RustFuture::poll(self, data)
    }

    fn cancel(&self) {
        RustFuture::cancel(self)
    }

    fn can_free(&self) -> bool {
        RustFuture::can_free(self)
    }

    fn release(&self) {
        RustFuture::release(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

static TASKS: Lazy<HandleMap<Arc<dyn ErasedFuture>>> =
    Lazy::new(|| HandleMap::new(tags::FUTURE));

static CONTINUATION: Lazy<RwLock<Option<RustFutureContinuation>>> =
    Lazy::new(|| RwLock::new(None));

/// Register the host continuation. A later call replaces it.
pub fn set_continuation(callback: RustFutureContinuation) {
    *CONTINUATION.write() = Some(callback);
}

fn invoke_continuation(data: *const c_void, code: i8) {
    let callback = *CONTINUATION.read();
    match callback {
        Some(callback) => callback(data, code),
        None => warn!(code, "task progressed but no continuation callback is registered"),
    }
}

fn lookup(handle: u64, kind: ResultKind) -> FutureResult<Arc<dyn ErasedFuture>> {
    let task = TASKS.get(handle)?;
    if task.kind() != kind {
        return Err(FutureError::KindMismatch {
            expected: kind,
            found: task.kind(),
        });
    }
    Ok(task)
}

/// Store a new task and return its handle. Nothing runs until the first poll.
pub fn spawn<T, F>(future: F) -> FutureResult<u64>
where
    T: FfiReturn,
    F: Future<Output = Result<T, CallError>> + Send + 'static,
{
    let task: Arc<dyn ErasedFuture> = Arc::new(RustFuture::new(future));
    let handle = TASKS.insert(task)?;
    debug!(handle, kind = %T::KIND, "task created");
    Ok(handle)
}

pub fn poll(handle: u64, kind: ResultKind, data: *const c_void) -> FutureResult<()> {
    let task = lookup(handle, kind)?;
    task.poll(data);
    Ok(())
}

pub fn cancel(handle: u64, kind: ResultKind) -> FutureResult<()> {
    let task = lookup(handle, kind)?;
    task.cancel();
    Ok(())
}

/// Take the task's result. Buffer results become the caller's.
pub fn complete<T: FfiReturn>(handle: u64) -> Result<T, CallError> {
    let task = lookup(handle, T::KIND)?;
    let future = task
        .as_any()
        .downcast_ref::<RustFuture<T>>()
        .ok_or(FutureError::KindMismatch {
            expected: T::KIND,
            found: task.kind(),
        })?;
    future.complete(handle)
}

/// Release a task. Rejected while it is still pending.
pub fn free(handle: u64, kind: ResultKind) -> FutureResult<()> {
    lookup(handle, kind)?;
    let task = TASKS
        .remove_if(handle, |task| task.can_free())?
        .ok_or(FutureError::StillPending(handle))?;
    task.release();
    debug!(handle, "task freed");
    Ok(())
}

/// Number of tasks not yet freed.
pub fn live_tasks() -> usize {
    TASKS.len()
}

/// Cancel and drop every task and forget the continuation.
pub fn teardown() {
    for task in TASKS.clear() {
        task.cancel();
        task.release();
    }
    *CONTINUATION.write() = None;
}
