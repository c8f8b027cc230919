use crate::types::{DataType, DeviceId, Status};

pub type Result<T> = std::result::Result<T, FusorError>;

#[derive(Debug, thiserror::Error)]
pub enum FusorError {
    #[error("type {dtype} is not supported for device collectives")]
    UnsupportedDType { dtype: DataType },

    #[error("{op} failed: {reason}")]
    Collective { op: &'static str, reason: String },

    #[error("host transport {op} failed: {reason}")]
    Transport { op: &'static str, reason: String },

    #[error("topology error: {reason}")]
    Topology { reason: String },

    #[error("invalid batch: {reason}")]
    InvalidBatch { reason: String },

    #[error("invalid device {device} for {what}")]
    InvalidDevice { device: DeviceId, what: &'static str },

    #[error("engine shut down before the job could be finalized")]
    ShuttingDown,
}

impl FusorError {
    /// A device-collective or device-runtime failure, named after the
    /// operation that produced it.
    pub fn collective(op: &'static str, reason: impl Into<String>) -> Self {
        FusorError::Collective {
            op,
            reason: reason.into(),
        }
    }

    /// A host-transport failure.
    pub fn transport(op: &'static str, reason: impl Into<String>) -> Self {
        FusorError::Transport {
            op,
            reason: reason.into(),
        }
    }

    pub fn topology(reason: impl Into<String>) -> Self {
        FusorError::Topology {
            reason: reason.into(),
        }
    }

    /// Convert into the user-facing status delivered to entry callbacks.
    pub fn into_status(self) -> Status {
        Status::Failed(self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collective_error_carries_op_name() {
        let e = FusorError::collective("allreduce", "invalid argument");
        assert_eq!(e.to_string(), "allreduce failed: invalid argument");
    }

    #[test]
    fn unsupported_dtype_names_the_type() {
        let e = FusorError::UnsupportedDType {
            dtype: DataType::I8,
        };
        assert!(e.to_string().contains("i8"));
    }

    #[test]
    fn into_status_is_failed() {
        let s = FusorError::transport("barrier", "peer gone").into_status();
        match s {
            Status::Failed(msg) => assert!(msg.contains("barrier")),
            other => panic!("expected Failed, got {other:?}"),
        }
    }
}
