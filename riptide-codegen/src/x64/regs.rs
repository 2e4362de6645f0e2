//! x86-64 register file and ABI tables.

use crate::tile::{PhysReg, RegClass};

/// General-purpose registers.
pub const GPR: RegClass = RegClass(0);
/// SSE registers.
pub const XMM: RegClass = RegClass(1);

/// `rax`
pub const RAX: PhysReg = PhysReg(0);
/// `rcx`
pub const RCX: PhysReg = PhysReg(1);
/// `rdx`
pub const RDX: PhysReg = PhysReg(2);
/// `rbx`
pub const RBX: PhysReg = PhysReg(3);
/// `rsp`
pub const RSP: PhysReg = PhysReg(4);
/// `rbp`
pub const RBP: PhysReg = PhysReg(5);
/// `rsi`
pub const RSI: PhysReg = PhysReg(6);
/// `rdi`
pub const RDI: PhysReg = PhysReg(7);
/// `r8`
pub const R8: PhysReg = PhysReg(8);
/// `r9`
pub const R9: PhysReg = PhysReg(9);
/// `r10` — first reserved scratch.
pub const R10: PhysReg = PhysReg(10);
/// `r11` — second reserved scratch.
pub const R11: PhysReg = PhysReg(11);
/// `r12`
pub const R12: PhysReg = PhysReg(12);
/// `r13`
pub const R13: PhysReg = PhysReg(13);
/// `r14`
pub const R14: PhysReg = PhysReg(14);
/// `r15`
pub const R15: PhysReg = PhysReg(15);

/// `xmm0`
pub const XMM0: PhysReg = PhysReg(0);
/// `xmm1`
pub const XMM1: PhysReg = PhysReg(1);
/// `xmm14` — first reserved float scratch.
pub const XMM14: PhysReg = PhysReg(14);
/// `xmm15` — second reserved float scratch.
pub const XMM15: PhysReg = PhysReg(15);

use static_assertions::const_assert;

const fn bit(r: PhysReg) -> u32 {
    1 << r.0
}

/// GPRs the allocator may assign: everything except the stack registers
/// and the two reserved scratches.
pub const GPR_ALLOCATABLE: u32 =
    0xffff & !(bit(RSP) | bit(RBP) | bit(R10) | bit(R11));

/// XMM registers the allocator may assign.
pub const XMM_ALLOCATABLE: u32 = 0xffff & !(bit(XMM14) | bit(XMM15));

/// System-V caller-saved GPRs.
pub const GPR_CALLER_SAVED: u32 = bit(RAX)
    | bit(RCX)
    | bit(RDX)
    | bit(RSI)
    | bit(RDI)
    | bit(R8)
    | bit(R9)
    | bit(R10)
    | bit(R11);

/// System-V callee-saved GPRs (minus the stack registers).
pub const GPR_CALLEE_SAVED: u32 = bit(RBX) | bit(R12) | bit(R13) | bit(R14) | bit(R15);

// The save classes must partition the file, and the reserved scratches
// must never be handed to the allocator.
const_assert!(GPR_CALLER_SAVED & GPR_CALLEE_SAVED == 0);
const_assert!(GPR_ALLOCATABLE & (bit(RSP) | bit(RBP) | bit(R10) | bit(R11)) == 0);
const_assert!(XMM_ALLOCATABLE & (bit(XMM14) | bit(XMM15)) == 0);

/// All XMM registers are caller-saved in both supported conventions.
pub const XMM_CALLER_SAVED: u32 = 0xffff;

/// System-V integer argument order.
pub const SYSV_ARG_GPR: [PhysReg; 6] = [RDI, RSI, RDX, RCX, R8, R9];
/// System-V float argument order.
pub const SYSV_ARG_XMM: [PhysReg; 8] = [
    PhysReg(0),
    PhysReg(1),
    PhysReg(2),
    PhysReg(3),
    PhysReg(4),
    PhysReg(5),
    PhysReg(6),
    PhysReg(7),
];
/// System-V integer return order.
pub const SYSV_RET_GPR: [PhysReg; 2] = [RAX, RDX];
/// System-V float return order.
pub const SYSV_RET_XMM: [PhysReg; 2] = [XMM0, XMM1];

/// Win64 integer argument order.
pub const WIN64_ARG_GPR: [PhysReg; 4] = [RCX, RDX, R8, R9];
/// Win64 float argument order.
pub const WIN64_ARG_XMM: [PhysReg; 4] = [PhysReg(0), PhysReg(1), PhysReg(2), PhysReg(3)];
/// Win64 integer return order.
pub const WIN64_RET_GPR: [PhysReg; 1] = [RAX];
/// Win64 float return order.
pub const WIN64_RET_XMM: [PhysReg; 1] = [XMM0];
