//! Backend pipeline: tiles, register allocation and machine-code emission.
//!
//! The scheduled sea of nodes arrives from `riptide-opt`; instruction
//! selection walks each block's node list in reverse, matching tiles with
//! register masks and folded addressing. Linear-scan allocation assigns
//! physical registers (splitting live ranges onto the stack when it must),
//! and the emitter lowers the tile stream to bytes plus the patch and
//! relocation lists the outer object writer consumes.
//!
//! Everything target-specific hides behind the [`Target`] trait; the x86-64
//! implementation lives in [`x64`].

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![deny(unused_must_use)]

pub mod emit;
pub mod error;
pub mod frame;
pub mod isel;
pub mod liveness;
pub mod output;
pub mod pipeline;
pub mod regalloc;
pub mod target;
pub mod tile;
pub mod x64;

pub use error::{CompileError, Diagnostic, DiagnosticKind};
pub use output::{CompiledFunction, Location, Patch, PatchKind, StackSlot};
pub use pipeline::{compile_function, compile_module, Config};
pub use target::{CTypeSizes, Target};
pub use tile::{Addr, AddrBase, Operand, PhysReg, RegClass, RegMask, Tile, VReg};
pub use x64::X64;
