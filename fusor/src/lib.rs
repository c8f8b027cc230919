//! A collective-reduction engine for synchronous data-parallel training.
//!
//! Batches of per-tensor reduction requests become fused collective
//! operations on a dedicated device stream, with completion delivered
//! through per-tensor callbacks off the submission thread. Device runtime,
//! device collectives and the cross-node host transport are traits; the
//! `sim` module provides in-process implementations for tests and CPU-only
//! bring-up, and the `fusor-nccl` crate provides the CUDA/NCCL backend.

pub mod channel;
pub mod collective;
pub mod config;
pub mod context;
pub mod device;
pub mod engine;
pub mod entry;
pub mod error;
pub mod fusion;
pub mod sim;
pub mod strategy;
pub mod timeline;
pub mod topology;
pub mod types;

mod executor;
mod job;
pub(crate) mod reduce;

pub use channel::HostChannel;
pub use collective::{CollectiveOps, CommCache, CommPlan, UNIQUE_ID_BYTES, UniqueId};
pub use config::EngineConfig;
pub use context::EngineContext;
pub use device::{DeviceOps, EventPool, StreamRegistry};
pub use engine::ReduceEngine;
pub use entry::{Callback, Response, TensorEntry};
pub use error::{FusorError, Result};
pub use fusion::FusionArena;
pub use strategy::AllreduceStrategy;
pub use timeline::{NullTimeline, Timeline, TracingTimeline};
pub use topology::WorkerTopology;
pub use types::{
    CPU_DEVICE_ID, DataType, DeviceId, FUSION_ATOM, Rank, RawComm, RawEvent, RawStream, ReduceOp,
    Scope, Status,
};
