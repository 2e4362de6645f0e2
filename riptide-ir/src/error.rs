//! Errors surfaced while the frontend constructs IR.

use thiserror::Error;

use crate::dt::DataType;
use crate::node::NodeId;
use crate::op::Op;

/// Malformed IR detected at a builder call site.
///
/// These are user (frontend) errors and are recoverable at function
/// granularity: the rest of the module still compiles. Violations detected
/// *after* building — inside the optimizer or backend — are internal bugs
/// and abort instead.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BuildError {
    /// A PHI's data inputs do not line up with its region's predecessors.
    #[error("phi joining {region} needs {want} data inputs, got {got}")]
    PhiArity {
        /// The join region.
        region: NodeId,
        /// Predecessor count of the region.
        want: usize,
        /// Data inputs supplied.
        got: usize,
    },

    /// An operand has the wrong data type for the operation.
    #[error("{op} operand {slot} has type {found}, expected {want}")]
    TypeMismatch {
        /// The operation being built.
        op: Op,
        /// Operand position.
        slot: usize,
        /// Required type.
        want: DataType,
        /// Supplied type.
        found: DataType,
    },

    /// The two operands of a binary operation disagree.
    #[error("{op} operands disagree: {lhs} vs {rhs}")]
    OperandMismatch {
        /// The operation being built.
        op: Op,
        /// Left operand type.
        lhs: DataType,
        /// Right operand type.
        rhs: DataType,
    },

    /// An instruction was appended with no open control point (the block
    /// was already terminated, or no region was entered).
    #[error("no open control point for {op}")]
    NoControl {
        /// The operation being built.
        op: Op,
    },

    /// An integer width outside `1..=64` was requested.
    #[error("unsupported integer width {bits}")]
    BadWidth {
        /// The requested width.
        bits: u32,
    },

    /// Return arity or types do not match the function prototype.
    #[error("return value {slot} has type {found}, prototype says {want}")]
    ReturnMismatch {
        /// Return value position.
        slot: usize,
        /// Type from the prototype.
        want: DataType,
        /// Supplied type.
        found: DataType,
    },

    /// Wrong number of return values.
    #[error("returning {got} values, prototype says {want}")]
    ReturnArity {
        /// Count from the prototype.
        want: usize,
        /// Values supplied.
        got: usize,
    },

    /// Wrong number of call arguments for a non-varargs prototype.
    #[error("call passes {got} arguments, prototype says {want}")]
    CallArity {
        /// Count from the prototype.
        want: usize,
        /// Arguments supplied.
        got: usize,
    },

    /// The function grew past its configured node budget.
    #[error("function exceeded its node budget of {limit}")]
    NodeBudget {
        /// The configured ceiling.
        limit: usize,
    },
}
