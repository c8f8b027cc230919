use std::collections::HashMap;
use std::mem::MaybeUninit;
use std::sync::{Mutex, PoisonError};

use cudarc::driver::sys as cu;

use fusor::{DeviceId, DeviceOps, FusorError, RawEvent, RawStream, Result};

fn check(op: &'static str, result: cu::CUresult) -> Result<()> {
    if result == cu::CUresult::CUDA_SUCCESS {
        Ok(())
    } else {
        Err(FusorError::collective(op, format!("{result:?}")))
    }
}

/// Device runtime over the CUDA driver API.
///
/// Primary contexts are retained once per device and made current on every
/// `set_device`, so the submission thread and the finalizer thread can both
/// address the device. Streams are created non-blocking so reduction work
/// never serializes against the legacy default stream.
pub struct CudaDeviceOps {
    contexts: Mutex<HashMap<DeviceId, cu::CUcontext>>,
}

// SAFETY: CUcontext handles are process-wide; the driver API is thread-safe
// once contexts are made current per thread.
unsafe impl Send for CudaDeviceOps {}
unsafe impl Sync for CudaDeviceOps {}

impl CudaDeviceOps {
    pub fn new() -> Result<Self> {
        check("cuInit", unsafe { cu::cuInit(0) })?;
        Ok(Self {
            contexts: Mutex::new(HashMap::new()),
        })
    }

    fn context_for(&self, device: DeviceId) -> Result<cu::CUcontext> {
        if device < 0 {
            return Err(FusorError::InvalidDevice {
                device,
                what: "CUDA context",
            });
        }
        let mut contexts = self.contexts.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(&ctx) = contexts.get(&device) {
            return Ok(ctx);
        }

        let mut dev = MaybeUninit::uninit();
        check("cuDeviceGet", unsafe {
            cu::cuDeviceGet(dev.as_mut_ptr(), device)
        })?;
        let mut ctx = MaybeUninit::uninit();
        check("cuDevicePrimaryCtxRetain", unsafe {
            cu::cuDevicePrimaryCtxRetain(ctx.as_mut_ptr(), dev.assume_init())
        })?;
        let ctx = unsafe { ctx.assume_init() };
        tracing::debug!(device, "retained primary context");
        contexts.insert(device, ctx);
        Ok(ctx)
    }
}

impl DeviceOps for CudaDeviceOps {
    fn set_device(&self, device: DeviceId) -> Result<()> {
        let ctx = self.context_for(device)?;
        check("cuCtxSetCurrent", unsafe { cu::cuCtxSetCurrent(ctx) })
    }

    fn stream_priority_range(&self, device: DeviceId) -> Result<(i32, i32)> {
        self.set_device(device)?;
        let mut least = 0i32;
        let mut greatest = 0i32;
        check("cuCtxGetStreamPriorityRange", unsafe {
            cu::cuCtxGetStreamPriorityRange(&mut least, &mut greatest)
        })?;
        Ok((least, greatest))
    }

    fn create_stream(&self, device: DeviceId, priority: i32) -> Result<RawStream> {
        self.set_device(device)?;
        let mut stream = MaybeUninit::uninit();
        check("cuStreamCreateWithPriority", unsafe {
            cu::cuStreamCreateWithPriority(
                stream.as_mut_ptr(),
                cu::CUstream_flags::CU_STREAM_NON_BLOCKING as u32,
                priority,
            )
        })?;
        Ok(unsafe { stream.assume_init() } as RawStream)
    }

    fn create_event(&self, device: DeviceId) -> Result<RawEvent> {
        self.set_device(device)?;
        let flags = cu::CUevent_flags::CU_EVENT_BLOCKING_SYNC as u32
            | cu::CUevent_flags::CU_EVENT_DISABLE_TIMING as u32;
        let mut event = MaybeUninit::uninit();
        check("cuEventCreate", unsafe {
            cu::cuEventCreate(event.as_mut_ptr(), flags)
        })?;
        Ok(unsafe { event.assume_init() } as RawEvent)
    }

    fn record_event(&self, event: RawEvent, stream: RawStream) -> Result<()> {
        check("cuEventRecord", unsafe {
            cu::cuEventRecord(event as cu::CUevent, stream as cu::CUstream)
        })
    }

    fn synchronize_event(&self, event: RawEvent) -> Result<()> {
        check("cuEventSynchronize", unsafe {
            cu::cuEventSynchronize(event as cu::CUevent)
        })
    }

    fn alloc(&self, device: DeviceId, bytes: usize) -> Result<u64> {
        self.set_device(device)?;
        let mut dptr = MaybeUninit::uninit();
        check("cuMemAlloc", unsafe {
            cu::cuMemAlloc_v2(dptr.as_mut_ptr(), bytes.max(1))
        })?;
        Ok(unsafe { dptr.assume_init() } as u64)
    }

    unsafe fn free(&self, device: DeviceId, ptr: u64) -> Result<()> {
        self.set_device(device)?;
        check("cuMemFree", unsafe {
            cu::cuMemFree_v2(ptr as cu::CUdeviceptr)
        })
    }

    unsafe fn memcpy_d2d_async(
        &self,
        dst: u64,
        src: u64,
        bytes: usize,
        stream: RawStream,
    ) -> Result<()> {
        check("cuMemcpyDtoDAsync", unsafe {
            cu::cuMemcpyDtoDAsync_v2(
                dst as cu::CUdeviceptr,
                src as cu::CUdeviceptr,
                bytes,
                stream as cu::CUstream,
            )
        })
    }

    unsafe fn memcpy_d2h_async(
        &self,
        dst: u64,
        src: u64,
        bytes: usize,
        stream: RawStream,
    ) -> Result<()> {
        check("cuMemcpyDtoHAsync", unsafe {
            cu::cuMemcpyDtoHAsync_v2(
                dst as usize as *mut std::ffi::c_void,
                src as cu::CUdeviceptr,
                bytes,
                stream as cu::CUstream,
            )
        })
    }

    unsafe fn memcpy_h2d_async(
        &self,
        dst: u64,
        src: u64,
        bytes: usize,
        stream: RawStream,
    ) -> Result<()> {
        check("cuMemcpyHtoDAsync", unsafe {
            cu::cuMemcpyHtoDAsync_v2(
                dst as cu::CUdeviceptr,
                src as usize as *const std::ffi::c_void,
                bytes,
                stream as cu::CUstream,
            )
        })
    }
}
