//! The x86-64 target.

pub mod encode;
pub mod isel;
pub mod regs;

use riptide_ir::{CallConv, DataType, Function, NodeId, Op, SourceLoc, SymbolId};
use riptide_opt::BlockId;

use crate::emit::EmitCtx;
use crate::error::CompileError;
use crate::frame::FrameLayout;
use crate::isel::Sel;
use crate::target::Target;
use crate::tile::{Addr, PhysReg, RegClass, RegMask, Tile, VReg};

use regs::{GPR, XMM};

/// Two-operand integer ALU opcodes sharing one encoding family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AluOp {
    /// `add`
    Add,
    /// `sub`
    Sub,
    /// `and`
    And,
    /// `or`
    Or,
    /// `xor`
    Xor,
    /// `cmp` (flags only)
    Cmp,
}

/// Shift/rotate opcodes sharing the group-2 encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftOp {
    /// `shl`
    Shl,
    /// `shr`
    Shr,
    /// `sar`
    Sar,
    /// `rol`
    Rol,
    /// `ror`
    Ror,
}

/// Scalar SSE arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FAluOp {
    /// `addss`/`addsd`
    Add,
    /// `subss`/`subsd`
    Sub,
    /// `mulss`/`mulsd`
    Mul,
    /// `divss`/`divsd`
    Div,
}

/// Condition codes (the low nibble of `0f 9x`/`0f 8x`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cc {
    /// equal
    E,
    /// not equal
    Ne,
    /// unsigned below
    B,
    /// unsigned below-or-equal
    Be,
    /// unsigned above
    A,
    /// unsigned above-or-equal
    Ae,
    /// signed less
    L,
    /// signed less-or-equal
    Le,
    /// signed greater
    G,
    /// signed greater-or-equal
    Ge,
    /// not zero
    Nz,
}

impl Cc {
    /// The `cc` nibble of the two-byte opcode.
    pub fn nibble(self) -> u8 {
        match self {
            Cc::E => 0x4,
            Cc::Ne | Cc::Nz => 0x5,
            Cc::B => 0x2,
            Cc::Ae => 0x3,
            Cc::Be => 0x6,
            Cc::A => 0x7,
            Cc::L => 0xc,
            Cc::Ge => 0xd,
            Cc::Le => 0xe,
            Cc::G => 0xf,
        }
    }
}

/// x86-64 tile opcodes.
///
/// Register identities come from the tile's operand lists; everything else
/// (immediates, folded addresses, condition codes) lives here. In tiles
/// with a folded address, the address's register components sit at the
/// front of `ins` and `Addr` refers to them by index.
#[derive(Debug, Clone)]
pub enum X64Op {
    /// Register-to-register move of either class; the coalescing target.
    Copy,
    /// `mov r, imm`
    MovRI {
        /// Operand size in bytes.
        size: u8,
        /// The immediate, sign-extended.
        imm: i64,
    },
    /// `lea r, [addr]`
    Lea {
        /// Folded address.
        addr: Addr,
    },
    /// `mov r, [addr]` (integer load)
    Load {
        /// Access size in bytes.
        size: u8,
        /// Folded address.
        addr: Addr,
    },
    /// `movzx`/`movsx r, [addr]` — load fused with an extension.
    LoadExt {
        /// Sign- vs zero-extend.
        signed: bool,
        /// Memory access size in bytes.
        from: u8,
        /// Register result size in bytes.
        to: u8,
        /// Folded address.
        addr: Addr,
    },
    /// `mov [addr], r` — the value is the last input operand.
    Store {
        /// Access size in bytes.
        size: u8,
        /// Folded address.
        addr: Addr,
    },
    /// `mov [addr], imm32`
    StoreImm {
        /// Access size in bytes.
        size: u8,
        /// Folded address.
        addr: Addr,
        /// Immediate value.
        imm: i32,
    },
    /// Two-address ALU op: `outs[0] (== ins[0]) op= ins[1]`.
    Alu {
        /// Which operation.
        op: AluOp,
        /// Operand size in bytes.
        size: u8,
    },
    /// Two-address ALU with immediate: `outs[0] (== ins[0]) op= imm`.
    AluImm {
        /// Which operation.
        op: AluOp,
        /// Operand size in bytes.
        size: u8,
        /// Immediate value.
        imm: i32,
    },
    /// `imul r, r` (two-address).
    Mul {
        /// Operand size in bytes.
        size: u8,
    },
    /// `imul r, r, imm32` (three-operand form).
    MulImm {
        /// Operand size in bytes.
        size: u8,
        /// Immediate factor.
        imm: i32,
    },
    /// `neg r` (two-address).
    Neg {
        /// Operand size in bytes.
        size: u8,
    },
    /// `not r` (two-address).
    Not {
        /// Operand size in bytes.
        size: u8,
    },
    /// Shift/rotate by an immediate count (two-address).
    ShiftImm {
        /// Which shift.
        op: ShiftOp,
        /// Operand size in bytes.
        size: u8,
        /// Count.
        imm: u8,
    },
    /// Shift/rotate by `cl`; `ins[1]` is pinned to RCX.
    ShiftCl {
        /// Which shift.
        op: ShiftOp,
        /// Operand size in bytes.
        size: u8,
    },
    /// `cdq`/`cqo`: sign-extend RAX into RDX.
    SignExtendAx {
        /// Operand size in bytes (4 or 8).
        size: u8,
    },
    /// `div`/`idiv` by `ins[2]`; RAX:RDX in, RAX (quotient) and RDX
    /// (remainder) out.
    Div {
        /// Operand size in bytes.
        size: u8,
        /// Signed division.
        signed: bool,
    },
    /// `movzx`/`movsx r, r`.
    ExtRR {
        /// Sign- vs zero-extend.
        signed: bool,
        /// Source size in bytes.
        from: u8,
        /// Destination size in bytes.
        to: u8,
    },
    /// `cmp r, r` (flags only).
    CmpRR {
        /// Operand size in bytes.
        size: u8,
    },
    /// `cmp r, imm` (flags only).
    CmpRI {
        /// Operand size in bytes.
        size: u8,
        /// Immediate value.
        imm: i32,
    },
    /// `test r, r` (flags only).
    TestRR {
        /// Operand size in bytes.
        size: u8,
    },
    /// `setcc r8`.
    Setcc {
        /// Condition.
        cc: Cc,
    },
    /// `cmovcc r, r`.
    Cmov {
        /// Condition.
        cc: Cc,
        /// Operand size in bytes (4 or 8).
        size: u8,
    },
    /// `jcc` to a block.
    Jcc {
        /// Condition.
        cc: Cc,
        /// Target block.
        target: BlockId,
    },
    /// `jmp` to a block (dropped when the layout falls through).
    Jmp {
        /// Target block.
        target: BlockId,
    },
    /// Scalar float ALU (two-address over XMM).
    FAlu {
        /// Which operation.
        op: FAluOp,
        /// Operand size in bytes (4 or 8).
        size: u8,
    },
    /// `movss`/`movsd xmm, [addr]`.
    FLoad {
        /// Access size in bytes.
        size: u8,
        /// Folded address.
        addr: Addr,
    },
    /// `movss`/`movsd [addr], xmm` — value is the last input.
    FStore {
        /// Access size in bytes.
        size: u8,
        /// Folded address.
        addr: Addr,
    },
    /// `movd`/`movq xmm, r`.
    GprToXmm {
        /// Transfer size in bytes.
        size: u8,
    },
    /// `movd`/`movq r, xmm`.
    XmmToGpr {
        /// Transfer size in bytes.
        size: u8,
    },
    /// `ucomiss`/`ucomisd` (flags only).
    Ucomi {
        /// Operand size in bytes.
        size: u8,
    },
    /// `cvtsi2ss`/`cvtsi2sd`.
    CvtIntToFloat {
        /// Integer operand size in bytes.
        int_size: u8,
        /// Float result size in bytes.
        float_size: u8,
    },
    /// `cvttss2si`/`cvttsd2si` (truncating).
    CvtFloatToInt {
        /// Integer result size in bytes.
        int_size: u8,
        /// Float operand size in bytes.
        float_size: u8,
    },
    /// `call rel32` against a symbol.
    CallSym {
        /// The callee.
        sym: SymbolId,
    },
    /// `call r` — target is the last input operand.
    CallReg,
    /// Epilogue and `ret`.
    Ret,
    /// Debug location marker; emits no bytes.
    Loc {
        /// The source location.
        loc: SourceLoc,
    },
    /// Spill store into an allocator slot.
    SpillStore {
        /// Slot index.
        slot: u32,
    },
    /// Spill reload from an allocator slot.
    SpillLoad {
        /// Slot index.
        slot: u32,
    },
    /// `rep movsb` (RDI, RSI, RCX pinned).
    RepMovsb,
    /// `rep stosb` (RDI, RAX, RCX pinned).
    RepStosb,
    /// `xchg [addr], r` (implicitly locked; value is last input).
    XchgMem {
        /// Access size in bytes.
        size: u8,
        /// Folded address.
        addr: Addr,
    },
    /// `lock xadd [addr], r` — the register receives the old value.
    LockXadd {
        /// Access size in bytes.
        size: u8,
        /// Folded address.
        addr: Addr,
    },
    /// `lock op [addr], r` with no result value.
    LockAluMem {
        /// Which operation (And/Or/Xor).
        op: AluOp,
        /// Access size in bytes.
        size: u8,
        /// Folded address.
        addr: Addr,
    },
    /// Store of an outgoing stack argument at `[rsp + offset]`.
    StoreStackArg {
        /// Access size in bytes.
        size: u8,
        /// Offset into the outgoing-argument area.
        offset: u32,
    },
    /// Load of an incoming stack parameter (the `index`-th overflow slot
    /// above the return address).
    LoadStackParam {
        /// Access size in bytes.
        size: u8,
        /// Overflow slot index.
        index: u32,
    },
    /// Compare-and-swap: RAX expected, last input desired, RAX out.
    LockCmpxchg {
        /// Access size in bytes.
        size: u8,
        /// Folded address.
        addr: Addr,
    },
    /// `mov rax,[m]; op tmp; lock cmpxchg` retry loop for fetch-and-ops
    /// whose old value is demanded.
    RmwLoop {
        /// Which operation (And/Or/Xor).
        op: AluOp,
        /// Access size in bytes.
        size: u8,
        /// Folded address.
        addr: Addr,
    },
}

/// The x86-64 target description.
#[derive(Debug, Default, Clone, Copy)]
pub struct X64;

impl Target for X64 {
    type Op = X64Op;

    fn name(&self) -> &'static str {
        "x86-64"
    }

    fn type_sizes(&self) -> crate::target::CTypeSizes {
        crate::target::CTypeSizes {
            bool_: 1,
            char_: 1,
            short: 2,
            int: 4,
            long: 8,
            llong: 8,
            pointer: 8,
        }
    }

    fn little_endian(&self) -> bool {
        true
    }

    fn class_count(&self) -> u8 {
        2
    }

    fn reg_class(&self, dt: DataType) -> RegClass {
        if dt.is_float() {
            XMM
        } else {
            GPR
        }
    }

    fn reg_count(&self, _class: RegClass) -> u8 {
        16
    }

    fn allocatable(&self, class: RegClass) -> u32 {
        if class == GPR {
            regs::GPR_ALLOCATABLE
        } else {
            regs::XMM_ALLOCATABLE
        }
    }

    fn caller_saved(&self, class: RegClass) -> u32 {
        if class == GPR {
            regs::GPR_CALLER_SAVED
        } else {
            regs::XMM_CALLER_SAVED
        }
    }

    fn callee_saved(&self, class: RegClass) -> u32 {
        if class == GPR {
            regs::GPR_CALLEE_SAVED
        } else {
            0
        }
    }

    fn arg_regs(&self, cc: CallConv, class: RegClass) -> &'static [PhysReg] {
        match (cc, class == GPR) {
            (CallConv::C, true) => &regs::SYSV_ARG_GPR,
            (CallConv::C, false) => &regs::SYSV_ARG_XMM,
            (CallConv::Win64, true) => &regs::WIN64_ARG_GPR,
            (CallConv::Win64, false) => &regs::WIN64_ARG_XMM,
        }
    }

    fn ret_regs(&self, cc: CallConv, class: RegClass) -> &'static [PhysReg] {
        match (cc, class == GPR) {
            (CallConv::C, true) => &regs::SYSV_RET_GPR,
            (CallConv::C, false) => &regs::SYSV_RET_XMM,
            (CallConv::Win64, true) => &regs::WIN64_RET_GPR,
            (CallConv::Win64, false) => &regs::WIN64_RET_XMM,
        }
    }

    fn latency(&self, f: &Function, n: NodeId) -> u32 {
        match f.op(n) {
            Op::Load | Op::AtomicLoad => 4,
            Op::Mul => 3,
            Op::Udiv | Op::Sdiv | Op::Umod | Op::Smod => 30,
            Op::Fadd | Op::Fsub | Op::Fmul => 4,
            Op::Fdiv => 14,
            Op::Call => 10,
            Op::Int2Float | Op::Float2Int => 6,
            _ => 1,
        }
    }

    fn is_remat(&self, f: &Function, n: NodeId) -> bool {
        match f.op(n) {
            Op::IntConst | Op::Symbol => true,
            // Frame addresses re-emit as one LEA; thread-locals go through
            // the index symbol and are not worth re-deriving.
            Op::Local => f.node(n).local_info().is_some_and(|i| !i.tls),
            _ => false,
        }
    }

    fn select(&self, ctx: &mut Sel<'_, Self>, n: NodeId) -> Result<(), CompileError> {
        isel::select(self, ctx, n)
    }

    fn copy_tile(&self, dst: VReg, src: VReg, mask: RegMask) -> Tile<X64Op> {
        Tile::new(X64Op::Copy).read(src, mask).write(dst, mask)
    }

    fn jump_tile(&self, to: BlockId) -> Tile<X64Op> {
        Tile::new(X64Op::Jmp { target: to })
    }

    fn remat_tile(
        &self,
        f: &Function,
        n: NodeId,
        dst: VReg,
        mask: RegMask,
    ) -> Option<Tile<X64Op>> {
        let op = match f.op(n) {
            Op::IntConst => X64Op::MovRI {
                size: 8,
                imm: f.node(n).int_value()?,
            },
            Op::Symbol => match f.node(n).payload {
                riptide_ir::Payload::Symbol(sym) => X64Op::Lea {
                    addr: Addr {
                        base: crate::tile::AddrBase::Sym(sym),
                        index: None,
                        scale: 1,
                        disp: 0,
                    },
                },
                _ => return None,
            },
            Op::Local => X64Op::Lea {
                addr: Addr::frame(n, 0),
            },
            _ => return None,
        };
        Some(Tile::new(op).write(dst, mask).from_node(n))
    }

    fn spill_store(&self, slot: u32, src: VReg, mask: RegMask) -> Tile<X64Op> {
        Tile::new(X64Op::SpillStore { slot }).read(src, mask)
    }

    fn spill_load(&self, slot: u32, dst: VReg, mask: RegMask) -> Tile<X64Op> {
        Tile::new(X64Op::SpillLoad { slot }).write(dst, mask)
    }

    fn spill_size(&self, _class: RegClass) -> u32 {
        8
    }

    fn scratch_reg(&self, class: RegClass, which: u8) -> PhysReg {
        match (class == GPR, which) {
            (true, 0) => regs::R10,
            (true, 1) => regs::R11,
            (false, 0) => regs::XMM14,
            (false, 1) => regs::XMM15,
            _ => panic!("out of scratch registers (class {class:?}, {which})"),
        }
    }

    fn is_copy_tile(&self, tile: &Tile<X64Op>) -> bool {
        matches!(tile.op, X64Op::Copy)
    }

    fn outgoing_bytes(&self, tile: &Tile<X64Op>) -> u32 {
        match tile.op {
            X64Op::StoreStackArg { offset, .. } => offset + 8,
            _ => 0,
        }
    }

    fn emit(&self, ctx: &mut EmitCtx<'_>, tile: &Tile<X64Op>) -> Result<(), CompileError> {
        encode::emit_tile(self, ctx, tile)
    }

    fn emit_prologue(
        &self,
        ctx: &mut EmitCtx<'_>,
        frame: &FrameLayout,
    ) -> Result<(), CompileError> {
        encode::emit_prologue(ctx, frame)
    }

    fn emit_epilogue(
        &self,
        ctx: &mut EmitCtx<'_>,
        frame: &FrameLayout,
    ) -> Result<(), CompileError> {
        encode::emit_epilogue(ctx, frame)
    }
}
