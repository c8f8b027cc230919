//! Runtime-configurable tuning parameters.
//!
//! All values have defaults. Override via environment variables (prefixed
//! `FUSOR_`) or by constructing a custom `EngineConfig`.

/// Tuning parameters for the reduction engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Use the hierarchical allreduce strategy (intra-node device
    /// collectives plus a cross-node host allreduce) when the batch is
    /// eligible.
    pub hierarchical_allreduce: bool,

    /// Initial capacity of the per-device fusion buffer.
    pub fusion_buffer_bytes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            hierarchical_allreduce: false,
            fusion_buffer_bytes: 64 * 1024 * 1024, // 64 MiB
        }
    }
}

impl EngineConfig {
    /// Load config from environment variables, falling back to defaults.
    ///
    /// Recognized variables:
    /// - `FUSOR_HIERARCHICAL_ALLREDUCE` (`1`/`true` enables)
    /// - `FUSOR_FUSION_BUFFER_BYTES`
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("FUSOR_HIERARCHICAL_ALLREDUCE") {
            cfg.hierarchical_allreduce = matches!(v.as_str(), "1" | "true" | "TRUE");
        }
        if let Ok(v) = std::env::var("FUSOR_FUSION_BUFFER_BYTES") {
            if let Ok(n) = v.parse::<usize>() {
                cfg.fusion_buffer_bytes = n;
            }
        }

        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = EngineConfig::default();
        assert!(!cfg.hierarchical_allreduce);
        assert_eq!(cfg.fusion_buffer_bytes, 64 * 1024 * 1024);
    }
}
