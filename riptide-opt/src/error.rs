//! Optimizer-level failures.

use thiserror::Error;

/// The only recoverable way the optimizer stops early.
///
/// Everything else it could complain about is an internal invariant and
/// panics with the offending node instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OptError {
    /// The function outgrew its node budget mid-rewrite. The driver may
    /// retry with a larger budget.
    #[error("node budget of {limit} exhausted after {live} live nodes")]
    ResourceExhausted {
        /// Configured ceiling.
        limit: usize,
        /// Nodes alive when the ceiling was hit.
        live: usize,
    },
}
