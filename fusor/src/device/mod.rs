//! Device-runtime contract plus the engine-owned stream and event caches.

mod pool;
mod streams;

pub use pool::EventPool;
pub use streams::StreamRegistry;

use crate::error::Result;
use crate::types::{DeviceId, RawEvent, RawStream};

/// The device runtime (CUDA-driver-like) as the engine needs it.
///
/// Handles are opaque `u64`s owned by the implementation. Copies are
/// enqueued on the given stream; ordering within one stream follows
/// enqueue order.
pub trait DeviceOps: Send + Sync {
    /// Make `device` current for the calling thread.
    fn set_device(&self, device: DeviceId) -> Result<()>;

    /// `(least, greatest)` stream priorities for `device`. Numerically
    /// lower means more urgent.
    fn stream_priority_range(&self, device: DeviceId) -> Result<(i32, i32)>;

    /// Create a non-blocking stream on `device` at `priority`.
    fn create_stream(&self, device: DeviceId, priority: i32) -> Result<RawStream>;

    /// Create an event on `device` with blocking-synchronize semantics and
    /// timing disabled.
    fn create_event(&self, device: DeviceId) -> Result<RawEvent>;

    /// Record `event` at the current tail of `stream`.
    fn record_event(&self, event: RawEvent, stream: RawStream) -> Result<()>;

    /// Block the calling thread until `event` has completed.
    fn synchronize_event(&self, event: RawEvent) -> Result<()>;

    /// Allocate `bytes` of device memory on `device`.
    fn alloc(&self, device: DeviceId, bytes: usize) -> Result<u64>;

    /// Release an allocation returned by [`DeviceOps::alloc`].
    ///
    /// # Safety
    /// `ptr` must come from `alloc` on the same device and have no pending
    /// device work against it.
    unsafe fn free(&self, device: DeviceId, ptr: u64) -> Result<()>;

    /// Enqueue a device-to-device copy.
    ///
    /// # Safety
    /// `dst` and `src` must be valid device pointers for `bytes` bytes and
    /// must stay valid until the copy lands on the stream.
    unsafe fn memcpy_d2d_async(
        &self,
        dst: u64,
        src: u64,
        bytes: usize,
        stream: RawStream,
    ) -> Result<()>;

    /// Enqueue a device-to-host copy. `dst` is a host pointer.
    ///
    /// # Safety
    /// As for [`DeviceOps::memcpy_d2d_async`]; `dst` must be a valid host
    /// pointer for `bytes` bytes.
    unsafe fn memcpy_d2h_async(
        &self,
        dst: u64,
        src: u64,
        bytes: usize,
        stream: RawStream,
    ) -> Result<()>;

    /// Enqueue a host-to-device copy. `src` is a host pointer.
    ///
    /// # Safety
    /// As for [`DeviceOps::memcpy_d2h_async`], with roles swapped.
    unsafe fn memcpy_h2d_async(
        &self,
        dst: u64,
        src: u64,
        bytes: usize,
        stream: RawStream,
    ) -> Result<()>;
}
