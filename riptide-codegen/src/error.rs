//! Backend error taxonomy and user-visible diagnostics.

use thiserror::Error;

use riptide_ir::{BuildError, Op, SourceLoc};
use riptide_opt::OptError;

/// Why a single function failed to compile.
///
/// Every variant here is recoverable at function granularity — the rest of
/// the module keeps compiling. Internal invariant violations are not
/// errors; they panic with the offending node and take the process down.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    /// The frontend handed over malformed IR.
    #[error("invalid IR: {0}")]
    Build(#[from] BuildError),

    /// The IR uses a feature this target cannot lower.
    #[error("target {target} cannot lower {op}: {reason}")]
    Unsupported {
        /// Name of the refusing target.
        target: &'static str,
        /// The opcode that has no lowering.
        op: Op,
        /// What exactly is missing.
        reason: String,
    },

    /// A configured resource ceiling was exceeded.
    #[error(transparent)]
    Resource(#[from] OptError),
}

/// Category tag on a [`Diagnostic`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// Malformed input IR.
    UserIrInvariant,
    /// Feature unsupported by the selected target.
    UnsupportedTarget,
    /// Arena/emitter ceiling hit; retry with larger limits may succeed.
    ResourceExhaustion,
}

/// One user-visible failure record, aggregated per module.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    /// The function that failed.
    pub function: String,
    /// Failure category.
    pub kind: DiagnosticKind,
    /// Human-readable description.
    pub message: String,
    /// Nearest safepoint location, when one was recorded.
    pub loc: Option<SourceLoc>,
}

impl Diagnostic {
    /// Builds the record for a failed function.
    pub fn from_error(function: &str, err: &CompileError) -> Self {
        let kind = match err {
            CompileError::Build(_) => DiagnosticKind::UserIrInvariant,
            CompileError::Unsupported { .. } => DiagnosticKind::UnsupportedTarget,
            CompileError::Resource(_) => DiagnosticKind::ResourceExhaustion,
        };
        Diagnostic {
            function: function.to_owned(),
            kind,
            message: err.to_string(),
            loc: None,
        }
    }
}
