//! Tolerance constants for sync testing.

/// Ratio band a settled chase must stay inside.
pub const RATIO_EPSILON: f64 = 0.001;

/// Positions that should match exactly may differ by one sample of rounding.
pub const SAMPLE_EPSILON: i64 = 1;

/// One process block at the test block size.
pub const BLOCK_EPSILON: i64 = super::TEST_BLOCK_SIZE as i64;
