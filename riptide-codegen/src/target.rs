//! The target description consumed by the machine-independent backend.

use core::fmt;

use riptide_ir::{CallConv, DataType, Function, NodeId};
use riptide_opt::LatencyModel;

use crate::emit::EmitCtx;
use crate::error::CompileError;
use crate::frame::FrameLayout;
use crate::isel::Sel;
use crate::tile::{PhysReg, RegClass, RegMask, Tile, VReg};

/// C integer sizes in bytes, handed to the frontend for layout decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CTypeSizes {
    /// `_Bool`
    pub bool_: u8,
    /// `char`
    pub char_: u8,
    /// `short`
    pub short: u8,
    /// `int`
    pub int: u8,
    /// `long`
    pub long: u8,
    /// `long long`
    pub llong: u8,
    /// Any object pointer.
    pub pointer: u8,
}

/// Everything the core needs to know about a machine.
///
/// One implementation per architecture; the pipeline is generic over it so
/// tile opcodes stay strongly typed end to end.
pub trait Target: Sized {
    /// Target-specific tile opcode, carrying immediates, addressing shapes
    /// and condition codes.
    type Op: Clone + fmt::Debug;

    /// Short name used in diagnostics.
    fn name(&self) -> &'static str;

    /// C integer sizes for the frontend's layout computations.
    fn type_sizes(&self) -> CTypeSizes;

    /// Byte order of the emitted code's data accesses.
    fn little_endian(&self) -> bool;

    /// Number of register classes.
    fn class_count(&self) -> u8;

    /// The class a value of type `dt` is allocated in.
    fn reg_class(&self, dt: DataType) -> RegClass;

    /// Total registers the encoding can name in `class`.
    fn reg_count(&self, class: RegClass) -> u8;

    /// Bit set of registers the allocator may hand out in `class` (the
    /// stack/frame registers and reserved scratch registers are absent).
    fn allocatable(&self, class: RegClass) -> u32;

    /// Bit set of caller-saved registers in `class`.
    fn caller_saved(&self, class: RegClass) -> u32;

    /// Bit set of callee-saved registers in `class`.
    fn callee_saved(&self, class: RegClass) -> u32;

    /// Argument registers for `cc` in `class`, in ABI order.
    fn arg_regs(&self, cc: CallConv, class: RegClass) -> &'static [PhysReg];

    /// Return-value registers for `cc` in `class`, in ABI order.
    fn ret_regs(&self, cc: CallConv, class: RegClass) -> &'static [PhysReg];

    /// Expected latency of `n` in cycles, for the scheduler.
    fn latency(&self, f: &Function, n: NodeId) -> u32;

    /// Whether `n` is cheaper to re-emit at each use than to keep live.
    /// The allocator consults this flag, never the opcode.
    fn is_remat(&self, f: &Function, n: NodeId) -> bool;

    /// Emits tiles for one scheduled node (called in reverse block order).
    fn select(&self, ctx: &mut Sel<'_, Self>, n: NodeId) -> Result<(), CompileError>;

    /// A plain register-to-register move tile (phi lowering, spills).
    fn copy_tile(&self, dst: VReg, src: VReg, mask: RegMask) -> Tile<Self::Op>;

    /// An unconditional jump to another block.
    fn jump_tile(&self, to: riptide_opt::BlockId) -> Tile<Self::Op>;

    /// Re-emits a rematerializable node straight into `dst` at a use site.
    /// Returns `None` when the node cannot be re-emitted after all.
    fn remat_tile(
        &self,
        f: &Function,
        n: NodeId,
        dst: VReg,
        mask: RegMask,
    ) -> Option<Tile<Self::Op>>;

    /// A store of `src` into spill slot `slot`.
    fn spill_store(&self, slot: u32, src: VReg, mask: RegMask) -> Tile<Self::Op>;

    /// A load of spill slot `slot` into `dst`.
    fn spill_load(&self, slot: u32, dst: VReg, mask: RegMask) -> Tile<Self::Op>;

    /// Byte size of a spill slot for `class`.
    fn spill_size(&self, class: RegClass) -> u32;

    /// Reserved scratch register `which` (0 or 1) of `class`; never handed
    /// to the allocator, used to feed spilled operands.
    fn scratch_reg(&self, class: RegClass, which: u8) -> PhysReg;

    /// Is this tile a plain register copy (coalescing hint source)?
    fn is_copy_tile(&self, tile: &Tile<Self::Op>) -> bool;

    /// Outgoing-argument bytes this tile needs reserved at the bottom of
    /// the frame (0 for everything but stack-argument stores).
    fn outgoing_bytes(&self, tile: &Tile<Self::Op>) -> u32;

    /// Encodes one allocated tile into the byte buffer.
    fn emit(&self, ctx: &mut EmitCtx<'_>, tile: &Tile<Self::Op>) -> Result<(), CompileError>;

    /// Emits the frame setup sequence.
    fn emit_prologue(&self, ctx: &mut EmitCtx<'_>, frame: &FrameLayout)
        -> Result<(), CompileError>;

    /// Emits the frame teardown and return sequence.
    fn emit_epilogue(&self, ctx: &mut EmitCtx<'_>, frame: &FrameLayout)
        -> Result<(), CompileError>;
}

/// Adapter handing a target's latency table to the scheduler.
pub struct TargetLatency<'a, T>(pub &'a T);

impl<T: Target> LatencyModel for TargetLatency<'_, T> {
    fn latency(&self, f: &Function, n: NodeId) -> u32 {
        self.0.latency(f, n)
    }
}
