//! The opcode table.

use strum::{Display, EnumCount};

/// Every operation a node can perform.
///
/// Control, memory and data operations share one namespace because they
/// share one graph. The handful of `Mach*` opcodes only appear after
/// instruction selection has started replacing IR with machine tiles.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, EnumCount)]
#[strum(serialize_all = "snake_case")]
pub enum Op {
    /// Function entry. Produces a tuple of (control, memory, params...).
    Start,
    /// Control join point; each input is one incoming control edge.
    Region,
    /// SSA merge bound to a region: input 0 is the region, input `k + 1`
    /// carries the value entering along `region.inputs[k]`.
    Phi,
    /// Extracts one element of a tuple-producing parent.
    Proj,
    /// Multi-way control split on an integer key.
    Branch,
    /// Function exit: control, memory, then the returned values.
    Return,

    /// Integer constant (payload holds the value).
    IntConst,
    /// Float constant (payload holds the raw bits).
    FloatConst,
    /// Address of a module-level symbol.
    Symbol,
    /// Stack slot owned by the current frame.
    Local,

    /// Memory read: (ctrl, mem, addr).
    Load,
    /// Memory write: (ctrl, mem, addr, value); produces the new memory.
    Store,
    /// `memcpy(dst, src, count)` over a memory edge.
    Memcpy,
    /// `memset(dst, byte, count)` over a memory edge.
    Memset,
    /// Atomic load with an ordering payload.
    AtomicLoad,
    /// Atomic exchange; produces (mem, old value).
    AtomicXchg,
    /// Atomic fetch-add; produces (mem, old value).
    AtomicAdd,
    /// Atomic fetch-and; produces (mem, old value).
    AtomicAnd,
    /// Atomic fetch-or; produces (mem, old value).
    AtomicOr,
    /// Atomic fetch-xor; produces (mem, old value).
    AtomicXor,
    /// Atomic compare-and-swap; produces (mem, old value).
    AtomicCas,
    /// Call through a symbol or pointer: (ctrl, mem, target, args...).
    Call,
    /// Pins a source location for debug info; otherwise a no-op.
    Safepoint,

    /// Two's complement addition.
    Add,
    /// Two's complement subtraction.
    Sub,
    /// Two's complement multiplication.
    Mul,
    /// Unsigned division.
    Udiv,
    /// Signed division.
    Sdiv,
    /// Unsigned remainder.
    Umod,
    /// Signed remainder.
    Smod,
    /// Shift left.
    Shl,
    /// Logical shift right.
    Shr,
    /// Arithmetic shift right.
    Sar,
    /// Rotate left.
    Rol,
    /// Rotate right.
    Ror,
    /// Bitwise and.
    And,
    /// Bitwise or.
    Or,
    /// Bitwise xor.
    Xor,
    /// Integer negation.
    Neg,
    /// Bitwise complement.
    Not,

    /// Float addition.
    Fadd,
    /// Float subtraction.
    Fsub,
    /// Float multiplication.
    Fmul,
    /// Float division.
    Fdiv,

    /// Integer equality.
    CmpEq,
    /// Integer inequality.
    CmpNe,
    /// Unsigned less-than.
    CmpUlt,
    /// Unsigned less-or-equal.
    CmpUle,
    /// Signed less-than.
    CmpSlt,
    /// Signed less-or-equal.
    CmpSle,
    /// Float ordered less-than.
    CmpFlt,
    /// Float ordered less-or-equal.
    CmpFle,

    /// Sign extension to a wider integer.
    SignExt,
    /// Zero extension to a wider integer.
    ZeroExt,
    /// Truncation to a narrower integer.
    Truncate,
    /// Reinterpret an integer as a pointer.
    Int2Ptr,
    /// Reinterpret a pointer as an integer.
    Ptr2Int,
    /// Signed integer to float conversion.
    Int2Float,
    /// Float to signed integer conversion.
    Float2Int,
    /// Bit-pattern-preserving cast between same-width types.
    Bitcast,

    /// Pointer plus a constant byte offset.
    Member,
    /// Pointer plus `index * stride`.
    Array,
    /// `cond ? a : b` without control flow.
    Select,
    /// Explicit merge of memory versions.
    MergeMem,
    /// A value whose use is undefined behavior.
    Poison,
    /// Tombstone left behind by `kill`.
    Dead,

    /// Machine-level copy inserted during phi lowering and spilling.
    MachCopy,
    /// Machine-level projection of a multi-output tile.
    MachProj,
}

impl Op {
    /// Nodes that stay in the basic block of their control input; global
    /// code motion never moves them.
    pub fn is_pinned(self) -> bool {
        matches!(
            self,
            Op::Start
                | Op::Region
                | Op::Phi
                | Op::Proj
                | Op::Branch
                | Op::Return
                | Op::Safepoint
                | Op::Local
                | Op::Store
                | Op::Memcpy
                | Op::Memset
                | Op::AtomicLoad
                | Op::AtomicXchg
                | Op::AtomicAdd
                | Op::AtomicAnd
                | Op::AtomicOr
                | Op::AtomicXor
                | Op::AtomicCas
                | Op::Call
                | Op::MachCopy
                | Op::MachProj
        )
    }

    /// Nodes that must survive even with zero users.
    pub fn has_effect(self) -> bool {
        matches!(
            self,
            Op::Start
                | Op::Region
                | Op::Branch
                | Op::Return
                | Op::Safepoint
                | Op::Store
                | Op::Memcpy
                | Op::Memset
                | Op::AtomicLoad
                | Op::AtomicXchg
                | Op::AtomicAdd
                | Op::AtomicAnd
                | Op::AtomicOr
                | Op::AtomicXor
                | Op::AtomicCas
                | Op::Call
        )
    }

    /// Operand order does not matter.
    pub fn is_commutative(self) -> bool {
        matches!(
            self,
            Op::Add
                | Op::Mul
                | Op::And
                | Op::Or
                | Op::Xor
                | Op::Fadd
                | Op::Fmul
                | Op::CmpEq
                | Op::CmpNe
        )
    }

    /// Reassociating `(a op b) op c` into `a op (b op c)` is legal.
    pub fn is_associative(self) -> bool {
        matches!(self, Op::Add | Op::Mul | Op::And | Op::Or | Op::Xor)
    }

    /// Two-operand integer arithmetic/bitwise operation.
    pub fn is_int_binop(self) -> bool {
        matches!(
            self,
            Op::Add
                | Op::Sub
                | Op::Mul
                | Op::Udiv
                | Op::Sdiv
                | Op::Umod
                | Op::Smod
                | Op::Shl
                | Op::Shr
                | Op::Sar
                | Op::Rol
                | Op::Ror
                | Op::And
                | Op::Or
                | Op::Xor
        )
    }

    /// Two-operand float arithmetic.
    pub fn is_float_binop(self) -> bool {
        matches!(self, Op::Fadd | Op::Fsub | Op::Fmul | Op::Fdiv)
    }

    /// Any comparison opcode.
    pub fn is_cmp(self) -> bool {
        matches!(
            self,
            Op::CmpEq
                | Op::CmpNe
                | Op::CmpUlt
                | Op::CmpUle
                | Op::CmpSlt
                | Op::CmpSle
                | Op::CmpFlt
                | Op::CmpFle
        )
    }

    /// Shift or rotate, where the right operand is a bit count.
    pub fn is_shift(self) -> bool {
        matches!(self, Op::Shl | Op::Shr | Op::Sar | Op::Rol | Op::Ror)
    }

    /// Read-modify-write atomic (produces a (mem, old) tuple).
    pub fn is_atomic_rmw(self) -> bool {
        matches!(
            self,
            Op::AtomicXchg
                | Op::AtomicAdd
                | Op::AtomicAnd
                | Op::AtomicOr
                | Op::AtomicXor
                | Op::AtomicCas
        )
    }

    /// Excluded from global value numbering: identity matters beyond
    /// structure for stack slots, and effectful nodes never repeat.
    pub fn is_gvn_exempt(self) -> bool {
        self == Op::Local || self.has_effect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pinned_ops_have_no_float_freedom() {
        for op in [Op::Region, Op::Phi, Op::Store, Op::Call, Op::Branch] {
            assert!(op.is_pinned(), "{op} must be pinned");
        }
        for op in [Op::Add, Op::Load, Op::IntConst, Op::Member] {
            assert!(!op.is_pinned(), "{op} must float");
        }
    }

    #[test]
    fn effects_are_not_garbage() {
        assert!(Op::Store.has_effect());
        assert!(Op::Call.has_effect());
        assert!(!Op::Load.has_effect());
        assert!(!Op::Add.has_effect());
    }
}
