use crate::error::{FusorError, Result};
use crate::types::{DataType, DeviceId, Status};

/// Completion callback fired exactly once per entry, off the submission
/// thread, after the entry's output buffer is ready (or the job failed).
pub type Callback = Box<dyn FnOnce(Status) + Send + 'static>;

/// One tensor's reduction request.
///
/// The engine never owns entry memory: `input` and `output` must stay valid
/// until the callback fires.
pub struct TensorEntry {
    /// Logical tensor name, used for timeline rows.
    pub name: String,
    /// Device pointer to the input data.
    pub input: u64,
    /// Device pointer to the output buffer (same length as the input).
    pub output: u64,
    /// Element count.
    pub num_elements: usize,
    /// Element type. All entries of a batch share it.
    pub dtype: DataType,
    /// Device id; [`crate::CPU_DEVICE_ID`](crate::types::CPU_DEVICE_ID)
    /// denotes host placement.
    pub device: DeviceId,
    /// Completion callback.
    pub callback: Callback,
}

impl TensorEntry {
    pub fn new(
        name: impl Into<String>,
        input: u64,
        output: u64,
        num_elements: usize,
        dtype: DataType,
        device: DeviceId,
        callback: Callback,
    ) -> Self {
        Self {
            name: name.into(),
            input,
            output,
            num_elements,
            dtype,
            device,
            callback,
        }
    }

    /// Byte length of this entry's data.
    pub fn size_bytes(&self) -> usize {
        self.num_elements * self.dtype.size_in_bytes()
    }
}

impl std::fmt::Debug for TensorEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TensorEntry")
            .field("name", &self.name)
            .field("num_elements", &self.num_elements)
            .field("dtype", &self.dtype)
            .field("device", &self.device)
            .finish_non_exhaustive()
    }
}

/// Descriptor from the external coordinator: the device of each
/// participating worker, ordered by rank.
#[derive(Debug, Clone)]
pub struct Response {
    pub devices: Vec<DeviceId>,
}

impl Response {
    pub fn new(devices: Vec<DeviceId>) -> Self {
        Self { devices }
    }
}

/// Validate batch shape and return the shared `(dtype, device)` signature.
///
/// A batch is an ordered, non-empty sequence of entries sharing element
/// type and device; its order defines the fusion-buffer layout.
pub(crate) fn batch_signature(entries: &[TensorEntry]) -> Result<(DataType, DeviceId)> {
    let first = entries.first().ok_or_else(|| FusorError::InvalidBatch {
        reason: "batch is empty".into(),
    })?;
    for e in &entries[1..] {
        if e.dtype != first.dtype {
            return Err(FusorError::InvalidBatch {
                reason: format!(
                    "mixed element types in batch: {} vs {} ({})",
                    first.dtype, e.dtype, e.name
                ),
            });
        }
        if e.device != first.device {
            return Err(FusorError::InvalidBatch {
                reason: format!(
                    "mixed devices in batch: {} vs {} ({})",
                    first.device, e.device, e.name
                ),
            });
        }
    }
    Ok((first.dtype, first.device))
}
