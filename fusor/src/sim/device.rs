use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::device::DeviceOps;
use crate::error::{FusorError, Result};
use crate::types::{DeviceId, RawEvent, RawStream};

/// Device runtime backed by host memory.
///
/// Copies execute immediately, so stream ordering holds trivially; streams
/// and events are inert numbered tokens. One instance per simulated worker.
pub struct SimDeviceOps {
    allocations: Mutex<Vec<Box<[u8]>>>,
    streams_created: AtomicU64,
    events_created: AtomicU64,
}

impl SimDeviceOps {
    pub fn new() -> Self {
        Self {
            allocations: Mutex::new(Vec::new()),
            streams_created: AtomicU64::new(0),
            events_created: AtomicU64::new(0),
        }
    }

    /// Total events ever created, for pool-recycling assertions.
    pub fn events_created(&self) -> u64 {
        self.events_created.load(Ordering::SeqCst)
    }

    /// Total streams ever created.
    pub fn streams_created(&self) -> u64 {
        self.streams_created.load(Ordering::SeqCst)
    }

    fn check_device(op: &'static str, device: DeviceId) -> Result<()> {
        if device < 0 {
            return Err(FusorError::collective(op, format!("bad device {device}")));
        }
        Ok(())
    }
}

impl Default for SimDeviceOps {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceOps for SimDeviceOps {
    fn set_device(&self, device: DeviceId) -> Result<()> {
        Self::check_device("set_device", device)
    }

    fn stream_priority_range(&self, device: DeviceId) -> Result<(i32, i32)> {
        Self::check_device("stream_priority_range", device)?;
        Ok((0, -5))
    }

    fn create_stream(&self, device: DeviceId, _priority: i32) -> Result<RawStream> {
        Self::check_device("create_stream", device)?;
        Ok(self.streams_created.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn create_event(&self, device: DeviceId) -> Result<RawEvent> {
        Self::check_device("create_event", device)?;
        Ok(self.events_created.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn record_event(&self, _event: RawEvent, _stream: RawStream) -> Result<()> {
        Ok(())
    }

    fn synchronize_event(&self, _event: RawEvent) -> Result<()> {
        Ok(())
    }

    fn alloc(&self, device: DeviceId, bytes: usize) -> Result<u64> {
        Self::check_device("alloc", device)?;
        let buf = vec![0u8; bytes.max(1)].into_boxed_slice();
        let ptr = buf.as_ptr() as u64;
        self.allocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(buf);
        Ok(ptr)
    }

    unsafe fn free(&self, device: DeviceId, ptr: u64) -> Result<()> {
        Self::check_device("free", device)?;
        self.allocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|b| b.as_ptr() as u64 != ptr);
        Ok(())
    }

    unsafe fn memcpy_d2d_async(
        &self,
        dst: u64,
        src: u64,
        bytes: usize,
        _stream: RawStream,
    ) -> Result<()> {
        if bytes > 0 {
            unsafe {
                std::ptr::copy_nonoverlapping(src as *const u8, dst as *mut u8, bytes);
            }
        }
        Ok(())
    }

    unsafe fn memcpy_d2h_async(
        &self,
        dst: u64,
        src: u64,
        bytes: usize,
        stream: RawStream,
    ) -> Result<()> {
        unsafe { self.memcpy_d2d_async(dst, src, bytes, stream) }
    }

    unsafe fn memcpy_h2d_async(
        &self,
        dst: u64,
        src: u64,
        bytes: usize,
        stream: RawStream,
    ) -> Result<()> {
        unsafe { self.memcpy_d2d_async(dst, src, bytes, stream) }
    }
}
