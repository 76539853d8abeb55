//! Build configuration.

use crate::error::{Error, Result};

/// Parameters for constructing the colored index
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// K-mer length
    pub k: usize,

    /// RAM budget in bytes for the external-memory stages
    pub ram_bytes: usize,

    /// Number of worker threads for pair emission and sorting
    pub n_threads: usize,

    /// Also index and color the reverse complement of every sequence
    pub add_rev_comp: bool,

    /// Layout-tuning knob accepted for compatibility with existing command
    /// lines; the current single-pointer-array store does not use it
    pub colorset_pointer_tradeoff: usize,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            k: 31,
            ram_bytes: 1000 * 1_000_000,
            n_threads: 1,
            add_rev_comp: true,
            colorset_pointer_tradeoff: 3,
        }
    }
}

impl BuildConfig {
    /// Validates the configuration parameters
    pub fn validate(&self) -> Result<()> {
        if self.k == 0 {
            return Err(Error::InvalidArgument("k must be positive".to_string()));
        }
        if self.n_threads == 0 {
            return Err(Error::InvalidArgument(
                "n_threads must be positive".to_string(),
            ));
        }
        if self.ram_bytes == 0 {
            return Err(Error::InvalidArgument(
                "the RAM budget must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Logs the configuration via tracing
    pub fn log(&self) {
        tracing::info!("Build configuration:");
        tracing::info!("  k = {}", self.k);
        tracing::info!("  ram budget = {} bytes", self.ram_bytes);
        tracing::info!("  n_threads = {}", self.n_threads);
        tracing::info!("  reverse complements = {}", self.add_rev_comp);
        tracing::debug!(
            "  colorset pointer tradeoff = {}",
            self.colorset_pointer_tradeoff
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(BuildConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_k_rejected() {
        let config = BuildConfig { k: 0, ..BuildConfig::default() };
        assert!(matches!(config.validate(), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_zero_threads_rejected() {
        let config = BuildConfig { n_threads: 0, ..BuildConfig::default() };
        assert!(config.validate().is_err());
    }
}
