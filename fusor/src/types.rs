/// Rank of a participant in a communicator group (0-indexed).
pub type Rank = usize;

/// Device ordinal as reported by the runtime. Negative values are sentinels.
pub type DeviceId = i32;

/// Device id denoting host placement. Batches on this device are not
/// eligible for device-collective reduction.
pub const CPU_DEVICE_ID: DeviceId = -1;

/// Alignment atom for the per-rank shard of a fused buffer. Hierarchical
/// reduction pads fused batches so each rank's shard is a multiple of this
/// many elements.
pub const FUSION_ATOM: usize = 64;

/// Raw device-stream handle.
///
/// fusor manages streams, events, communicators and device memory as `u64`
/// handles; the provider traits map them onto the underlying runtime.
pub type RawStream = u64;

/// Raw device-event handle.
pub type RawEvent = u64;

/// Raw communicator handle. Constructed exactly once per device-tuple key
/// and shared by all subsequent jobs for that key.
pub type RawComm = u64;

/// Element types fusor can describe.
///
/// Only a subset is accepted for device-collective reduction; see
/// [`DataType::collective_supported`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DataType {
    I8 = 0,
    U8 = 1,
    I32 = 2,
    I64 = 3,
    F16 = 4,
    BF16 = 5,
    F32 = 6,
    F64 = 7,
}

impl DataType {
    /// Size of one element in bytes.
    pub const fn size_in_bytes(self) -> usize {
        match self {
            DataType::I8 | DataType::U8 => 1,
            DataType::F16 | DataType::BF16 => 2,
            DataType::I32 | DataType::F32 => 4,
            DataType::I64 | DataType::F64 => 8,
        }
    }

    /// Human-readable name.
    pub const fn name(self) -> &'static str {
        match self {
            DataType::I8 => "i8",
            DataType::U8 => "u8",
            DataType::I32 => "i32",
            DataType::I64 => "i64",
            DataType::F16 => "f16",
            DataType::BF16 => "bf16",
            DataType::F32 => "f32",
            DataType::F64 => "f64",
        }
    }

    /// Whether the device-collective backends accept this element type.
    pub const fn collective_supported(self) -> bool {
        matches!(
            self,
            DataType::I32 | DataType::I64 | DataType::F16 | DataType::F32 | DataType::F64
        )
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Reduction operations carried by the backend contracts.
///
/// The engine itself only issues `Sum`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReduceOp {
    Sum,
    Prod,
    Min,
    Max,
}

impl std::fmt::Display for ReduceOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReduceOp::Sum => f.write_str("sum"),
            ReduceOp::Prod => f.write_str("prod"),
            ReduceOp::Min => f.write_str("min"),
            ReduceOp::Max => f.write_str("max"),
        }
    }
}

/// Peer sets of the host transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Every worker.
    Global,
    /// Workers on this node.
    Local,
    /// Workers with this local rank, one per node.
    Cross,
}

/// User-facing completion state delivered to entry callbacks and returned
/// by `execute`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Ok,
    /// The batch is enqueued; callbacks fire when the device work lands.
    InProgress,
    Failed(String),
}

impl Status {
    pub fn is_ok(&self) -> bool {
        matches!(self, Status::Ok)
    }
}
