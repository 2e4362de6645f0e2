//! The rewrite engine and scheduler of the Riptide compiler.
//!
//! Three passes move a function from builder output to backend input:
//!
//! 1. [`optimize`] — the incremental peephole loop: structural
//!    idealization, identity folding, global value numbering and
//!    lattice-based constant propagation, iterated to a fixed point.
//! 2. [`Cfg::build`] — basic blocks out of the region structure, with
//!    reverse postorder, semi-NCA dominators and natural loops.
//! 3. [`schedule`] — global code motion assigning every floating node a
//!    block, then a per-block linear order for instruction selection.

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![deny(unused_must_use)]

mod ideal;
mod identity;
mod transfer;

pub mod cfg;
pub mod error;
pub mod gcm;
pub mod gvn;
pub mod peephole;
pub mod sched;

pub use cfg::{Block, BlockId, Cfg};
pub use error::OptError;
pub use gcm::{LatencyModel, UnitLatency, HOIST_THRESHOLD};
pub use gvn::GvnTable;
pub use peephole::{optimize, OptLevel, OptStats};
pub use sched::{schedule, Schedule};
