//! Runtime configuration

use conch_gc::GcConfig;

/// Tuning of the array fast-mode buffer.
///
/// None of these values affect observable semantics; they only decide when
/// an array gives up its flat buffer and how aggressively the buffer grows.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayModeConfig {
    /// Lengths at or above this may abandon fast mode when grown sparsely
    pub non_fast_mode_min_size: u32,
    /// Growing by more than this many elements past the old length counts as
    /// sparse once `non_fast_mode_min_size` is reached
    pub non_fast_mode_start_min_gap: u32,
    /// Fast mode is abandoned for lengths above this
    pub max_fast_mode_length: u32,
    /// Buffers up to this size always fit exactly
    pub fit_exact_limit: usize,
    /// Number of initial growths that fit exactly regardless of size
    pub fit_exact_growths: u32,
    /// Below this size growth rounds to the next power of two
    pub log2_growth_limit: usize,
    /// Above `log2_growth_limit`, capacity as a percentage of the required
    /// length
    pub percent_growth: usize,
}

impl Default for ArrayModeConfig {
    fn default() -> Self {
        Self {
            non_fast_mode_min_size: 128 * 1024,
            non_fast_mode_start_min_gap: 1024,
            max_fast_mode_length: 1 << 31,
            fit_exact_limit: 8,
            fit_exact_growths: 3,
            log2_growth_limit: 64 * 1024,
            percent_growth: 125,
        }
    }
}

/// Configuration of a [`crate::Context`]
#[derive(Debug, Clone, Default)]
pub struct ContextConfig {
    /// Collector thresholds, applied to the thread heap
    pub gc: GcConfig,
    /// Array fast-mode tuning
    pub array: ArrayModeConfig,
}
