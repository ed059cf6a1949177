//! Configuration of the backward builder.

use typed_builder::TypedBuilder;

/// Default limit on how deeply nets may be nested inside each other.
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Backward builder settings.
///
/// # Example
///
/// ```
/// use netgrad::BackwardConfig;
///
/// let config = BackwardConfig::builder().max_depth(8).build();
/// assert_eq!(config.max_depth, 8);
/// assert!(config.dedup_zero_fill);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, TypedBuilder)]
pub struct BackwardConfig {
    /// Deepest net nesting accepted before giving up (default: 64). The
    /// operator passed to the driver is at depth 0.
    #[builder(default = DEFAULT_MAX_DEPTH)]
    pub max_depth: usize,
    /// Emit one `fill_zeros_like` per distinct zero variable even when a
    /// gradient operator binds the same pruned gradient in several slots
    /// (default: true).
    #[builder(default = true)]
    pub dedup_zero_fill: bool,
}

impl Default for BackwardConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}
