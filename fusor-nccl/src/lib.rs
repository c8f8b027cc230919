//! CUDA driver and NCCL providers for the fusor reduction engine.
//!
//! `CudaDeviceOps` implements the device-runtime contract over the CUDA
//! driver API; `NcclCollectiveOps` implements the device-collective
//! contract over NCCL. Both trade in the engine's raw `u64` handle model.
//!
//! Requires the CUDA and NCCL userspace libraries at build and run time;
//! the crate is therefore not a default workspace member.

mod collective;
mod device;

pub use collective::{NcclCollectiveOps, id_from_bytes, id_to_bytes};
pub use device::CudaDeviceOps;
