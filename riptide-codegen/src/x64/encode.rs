//! x86-64 byte encoding for the selected tiles.
//!
//! Small helpers build the REX/ModRM/SIB plumbing; each tile opcode maps
//! onto one of a handful of encoding families. Memory operands resolve
//! frame and spill slots to RSP-relative displacements, and RIP-relative
//! symbol references leave a patch for the outer writer.

use crate::emit::EmitCtx;
use crate::error::CompileError;
use crate::frame::FrameLayout;
use crate::output::PatchKind;
use crate::tile::{Addr, AddrBase, Tile};

use super::{AluOp, Cc, FAluOp, ShiftOp, X64, X64Op};
use riptide_ir::SymbolId;

/// A memory operand with its slot indirections already resolved.
enum Mem {
    /// `[reg + (index << scale) + disp]`
    Reg {
        base: u8,
        index: Option<(u8, u8)>,
        disp: i32,
    },
    /// `[rip + sym]`
    Rip(SymbolId),
}

fn resolve(ctx: &EmitCtx<'_>, tile: &Tile<X64Op>, addr: &Addr) -> Mem {
    let index = addr.index.map(|i| {
        let r = tile.ins[i as usize].reg().0;
        let scale_log = addr.scale.trailing_zeros() as u8;
        (r, scale_log)
    });
    match addr.base {
        AddrBase::Reg(i) => Mem::Reg {
            base: tile.ins[i as usize].reg().0,
            index,
            disp: addr.disp,
        },
        AddrBase::Frame(local) => Mem::Reg {
            base: 4, // rsp
            index,
            disp: addr.disp + ctx.frame.local_offset(local) as i32,
        },
        AddrBase::Spill(slot) => Mem::Reg {
            base: 4,
            index,
            disp: addr.disp + ctx.frame.spill_offset(slot) as i32,
        },
        AddrBase::Sym(sym) => Mem::Rip(sym),
    }
}

fn rex_bits(w: bool, reg: u8, index: u8, rm: u8) -> u8 {
    0x40 | (u8::from(w) << 3) | ((reg >> 3) << 2) | ((index >> 3) << 1) | (rm >> 3)
}

/// Emits 66/REX prefixes for a register-register form.
fn prefix_rr(ctx: &mut EmitCtx<'_>, size: u8, reg: u8, rm: u8) {
    if size == 2 {
        ctx.u8(0x66);
    }
    let rex = rex_bits(size == 8, reg, 0, rm);
    // 8-bit accesses to spl/bpl/sil/dil also need an empty REX.
    if rex != 0x40 || (size == 1 && (reg >= 4 || rm >= 4)) {
        ctx.u8(rex);
    }
}

fn modrm(md: u8, reg: u8, rm: u8) -> u8 {
    (md << 6) | ((reg & 7) << 3) | (rm & 7)
}

/// Emits `opcode /reg, rm-register` with prefixes.
fn op_rr(ctx: &mut EmitCtx<'_>, size: u8, opcode: &[u8], reg: u8, rm: u8) {
    prefix_rr(ctx, size, reg, rm);
    ctx.bytes(opcode);
    ctx.u8(modrm(3, reg, rm));
}

/// Emits `opcode /reg, [mem]` with prefixes, SIB and displacement.
fn op_rm(ctx: &mut EmitCtx<'_>, size: u8, opcode: &[u8], reg: u8, mem: &Mem) {
    if size == 2 {
        ctx.u8(0x66);
    }
    match *mem {
        Mem::Rip(sym) => {
            let rex = rex_bits(size == 8, reg, 0, 0);
            if rex != 0x40 || (size == 1 && reg >= 4) {
                ctx.u8(rex);
            }
            ctx.bytes(opcode);
            ctx.u8(modrm(0, reg, 5));
            ctx.sym_patch(PatchKind::Rel32, sym);
        }
        Mem::Reg { base, index, disp } => {
            let rex = rex_bits(size == 8, reg, index.map(|(r, _)| r).unwrap_or(0), base);
            if rex != 0x40 || (size == 1 && reg >= 4) {
                ctx.u8(rex);
            }
            ctx.bytes(opcode);

            let need_sib = index.is_some() || base & 7 == 4;
            let md = if disp == 0 && base & 7 != 5 {
                0
            } else if i8::try_from(disp).is_ok() {
                1
            } else {
                2
            };
            if need_sib {
                ctx.u8(modrm(md, reg, 4));
                let (idx, scale_log) = index.unwrap_or((4, 0)); // 100 = none
                ctx.u8((scale_log << 6) | ((idx & 7) << 3) | (base & 7));
            } else {
                ctx.u8(modrm(md, reg, base));
            }
            match md {
                1 => ctx.u8(disp as i8 as u8),
                2 => ctx.bytes(&disp.to_le_bytes()),
                _ => {}
            }
        }
    }
}

fn alu_mr_opcode(op: AluOp, size: u8) -> u8 {
    let base = match op {
        AluOp::Add => 0x01,
        AluOp::Or => 0x09,
        AluOp::And => 0x21,
        AluOp::Sub => 0x29,
        AluOp::Xor => 0x31,
        AluOp::Cmp => 0x39,
    };
    if size == 1 {
        base - 1
    } else {
        base
    }
}

fn alu_imm_ext(op: AluOp) -> u8 {
    match op {
        AluOp::Add => 0,
        AluOp::Or => 1,
        AluOp::And => 4,
        AluOp::Sub => 5,
        AluOp::Xor => 6,
        AluOp::Cmp => 7,
    }
}

fn shift_ext(op: ShiftOp) -> u8 {
    match op {
        ShiftOp::Rol => 0,
        ShiftOp::Ror => 1,
        ShiftOp::Shl => 4,
        ShiftOp::Shr => 5,
        ShiftOp::Sar => 7,
    }
}

fn falu_opcode(op: FAluOp) -> u8 {
    match op {
        FAluOp::Add => 0x58,
        FAluOp::Mul => 0x59,
        FAluOp::Sub => 0x5c,
        FAluOp::Div => 0x5e,
    }
}

fn sse_prefix(size: u8) -> u8 {
    if size == 8 {
        0xf2
    } else {
        0xf3
    }
}

/// Encodes one allocated tile.
pub fn emit_tile(
    _t: &X64,
    ctx: &mut EmitCtx<'_>,
    tile: &Tile<X64Op>,
) -> Result<(), CompileError> {
    match &tile.op {
        X64Op::Copy => {
            let dst = tile.outs[0].reg().0;
            let src = tile.ins[0].reg().0;
            if dst == src {
                return Ok(());
            }
            if tile.outs[0].mask.class == super::regs::XMM {
                // movaps dst, src
                op_rr(ctx, 4, &[0x0f, 0x28], dst, src);
            } else {
                op_rr(ctx, 8, &[0x89], src, dst);
            }
            Ok(())
        }
        X64Op::MovRI { size, imm } => {
            let dst = tile.outs[0].reg().0;
            if *size == 8 {
                if let Ok(imm32) = i32::try_from(*imm) {
                    prefix_rr(ctx, 8, 0, dst);
                    ctx.u8(0xc7);
                    ctx.u8(modrm(3, 0, dst));
                    ctx.bytes(&imm32.to_le_bytes());
                } else {
                    prefix_rr(ctx, 8, 0, dst);
                    ctx.u8(0xb8 + (dst & 7));
                    ctx.u64le(*imm as u64);
                }
            } else {
                prefix_rr(ctx, 4, 0, dst);
                ctx.u8(0xb8 + (dst & 7));
                ctx.bytes(&(*imm as i32).to_le_bytes());
            }
            Ok(())
        }
        X64Op::Lea { addr } => {
            let dst = tile.outs[0].reg().0;
            let mem = resolve(ctx, tile, addr);
            op_rm(ctx, 8, &[0x8d], dst, &mem);
            Ok(())
        }
        X64Op::Load { size, addr } => {
            let dst = tile.outs[0].reg().0;
            let mem = resolve(ctx, tile, addr);
            let opc: &[u8] = if *size == 1 { &[0x8a] } else { &[0x8b] };
            op_rm(ctx, *size, opc, dst, &mem);
            Ok(())
        }
        X64Op::LoadExt {
            signed,
            from,
            to,
            addr,
        } => {
            let dst = tile.outs[0].reg().0;
            let mem = resolve(ctx, tile, addr);
            let size = *to;
            match (*signed, *from) {
                (false, 1) => op_rm(ctx, size, &[0x0f, 0xb6], dst, &mem),
                (false, 2) => op_rm(ctx, size, &[0x0f, 0xb7], dst, &mem),
                (false, 4) => op_rm(ctx, 4, &[0x8b], dst, &mem),
                (true, 1) => op_rm(ctx, size, &[0x0f, 0xbe], dst, &mem),
                (true, 2) => op_rm(ctx, size, &[0x0f, 0xbf], dst, &mem),
                (true, 4) => op_rm(ctx, 8, &[0x63], dst, &mem),
                _ => op_rm(ctx, size, &[0x8b], dst, &mem),
            }
            Ok(())
        }
        X64Op::Store { size, addr } => {
            let value = tile.ins.last().expect("store value").reg().0;
            let mem = resolve(ctx, tile, addr);
            let opc: &[u8] = if *size == 1 { &[0x88] } else { &[0x89] };
            op_rm(ctx, *size, opc, value, &mem);
            Ok(())
        }
        X64Op::StoreImm { size, addr, imm } => {
            let mem = resolve(ctx, tile, addr);
            let opc: &[u8] = if *size == 1 { &[0xc6] } else { &[0xc7] };
            op_rm(ctx, *size, opc, 0, &mem);
            match size {
                1 => ctx.u8(*imm as u8),
                2 => ctx.bytes(&(*imm as u16).to_le_bytes()),
                _ => ctx.bytes(&imm.to_le_bytes()),
            }
            Ok(())
        }
        X64Op::Alu { op, size } => {
            let dst = tile.outs[0].reg().0;
            let src = tile.ins[1].reg().0;
            op_rr(ctx, *size, &[alu_mr_opcode(*op, *size)], src, dst);
            Ok(())
        }
        X64Op::AluImm { op, size, imm } => {
            let dst = tile.outs[0].reg().0;
            emit_alu_imm(ctx, *op, *size, dst, *imm);
            Ok(())
        }
        X64Op::Mul { size } => {
            let dst = tile.outs[0].reg().0;
            let src = tile.ins[1].reg().0;
            op_rr(ctx, (*size).max(4), &[0x0f, 0xaf], dst, src);
            Ok(())
        }
        X64Op::MulImm { size, imm } => {
            let dst = tile.outs[0].reg().0;
            let src = tile.ins[0].reg().0;
            let size = (*size).max(4);
            if let Ok(imm8) = i8::try_from(*imm) {
                op_rr(ctx, size, &[0x6b], dst, src);
                ctx.u8(imm8 as u8);
            } else {
                op_rr(ctx, size, &[0x69], dst, src);
                ctx.bytes(&imm.to_le_bytes());
            }
            Ok(())
        }
        X64Op::Neg { size } => {
            let dst = tile.outs[0].reg().0;
            let opc: &[u8] = if *size == 1 { &[0xf6] } else { &[0xf7] };
            op_rr(ctx, *size, opc, 3, dst);
            Ok(())
        }
        X64Op::Not { size } => {
            let dst = tile.outs[0].reg().0;
            let opc: &[u8] = if *size == 1 { &[0xf6] } else { &[0xf7] };
            op_rr(ctx, *size, opc, 2, dst);
            Ok(())
        }
        X64Op::ShiftImm { op, size, imm } => {
            let dst = tile.outs[0].reg().0;
            let opc: &[u8] = if *size == 1 { &[0xc0] } else { &[0xc1] };
            op_rr(ctx, *size, opc, shift_ext(*op), dst);
            ctx.u8(*imm);
            Ok(())
        }
        X64Op::ShiftCl { op, size } => {
            let dst = tile.outs[0].reg().0;
            let opc: &[u8] = if *size == 1 { &[0xd2] } else { &[0xd3] };
            op_rr(ctx, *size, opc, shift_ext(*op), dst);
            Ok(())
        }
        X64Op::SignExtendAx { size } => {
            if *size == 8 {
                ctx.u8(0x48);
            }
            ctx.u8(0x99);
            Ok(())
        }
        X64Op::Div { size, signed } => {
            let divisor = tile.ins[2].reg().0;
            let ext = if *signed { 7 } else { 6 };
            op_rr(ctx, *size, &[0xf7], ext, divisor);
            Ok(())
        }
        X64Op::ExtRR { signed, from, to } => {
            let dst = tile.outs[0].reg().0;
            let src = tile.ins[0].reg().0;
            match (*signed, *from) {
                (false, 1) => op_rr(ctx, *to, &[0x0f, 0xb6], dst, src),
                (false, 2) => op_rr(ctx, *to, &[0x0f, 0xb7], dst, src),
                (false, _) => op_rr(ctx, 4, &[0x8b], dst, src),
                (true, 1) => op_rr(ctx, *to, &[0x0f, 0xbe], dst, src),
                (true, 2) => op_rr(ctx, *to, &[0x0f, 0xbf], dst, src),
                (true, _) => op_rr(ctx, 8, &[0x63], dst, src),
            }
            Ok(())
        }
        X64Op::CmpRR { size } => {
            let lhs = tile.ins[0].reg().0;
            let rhs = tile.ins[1].reg().0;
            op_rr(ctx, *size, &[alu_mr_opcode(AluOp::Cmp, *size)], rhs, lhs);
            Ok(())
        }
        X64Op::CmpRI { size, imm } => {
            let lhs = tile.ins[0].reg().0;
            emit_alu_imm(ctx, AluOp::Cmp, *size, lhs, *imm);
            Ok(())
        }
        X64Op::TestRR { size } => {
            let a = tile.ins[0].reg().0;
            let b = tile.ins[1].reg().0;
            let opc: &[u8] = if *size == 1 { &[0x84] } else { &[0x85] };
            op_rr(ctx, *size, opc, b, a);
            Ok(())
        }
        X64Op::Setcc { cc } => {
            let dst = tile.outs[0].reg().0;
            op_rr(ctx, 1, &[0x0f, 0x90 + cc.nibble()], 0, dst);
            Ok(())
        }
        X64Op::Cmov { cc, size } => {
            let dst = tile.outs[0].reg().0;
            let src = tile.ins[1].reg().0;
            op_rr(ctx, (*size).max(4), &[0x0f, 0x40 + cc.nibble()], dst, src);
            Ok(())
        }
        X64Op::Jcc { cc, target } => {
            ctx.u8(0x0f);
            ctx.u8(0x80 + cc.nibble());
            ctx.block_rel32(*target);
            Ok(())
        }
        X64Op::Jmp { target } => {
            if ctx.next_block == Some(*target) {
                return Ok(());
            }
            ctx.u8(0xe9);
            ctx.block_rel32(*target);
            Ok(())
        }
        X64Op::FAlu { op, size } => {
            let dst = tile.outs[0].reg().0;
            let src = tile.ins[1].reg().0;
            ctx.u8(sse_prefix(*size));
            op_rr(ctx, 4, &[0x0f, falu_opcode(*op)], dst, src);
            Ok(())
        }
        X64Op::FLoad { size, addr } => {
            let dst = tile.outs[0].reg().0;
            let mem = resolve(ctx, tile, addr);
            ctx.u8(sse_prefix(*size));
            op_rm(ctx, 4, &[0x0f, 0x10], dst, &mem);
            Ok(())
        }
        X64Op::FStore { size, addr } => {
            let value = tile.ins.last().expect("store value").reg().0;
            let mem = resolve(ctx, tile, addr);
            ctx.u8(sse_prefix(*size));
            op_rm(ctx, 4, &[0x0f, 0x11], value, &mem);
            Ok(())
        }
        X64Op::GprToXmm { size } => {
            let dst = tile.outs[0].reg().0;
            let src = tile.ins[0].reg().0;
            ctx.u8(0x66);
            op_rr(ctx, *size, &[0x0f, 0x6e], dst, src);
            Ok(())
        }
        X64Op::XmmToGpr { size } => {
            let src = tile.ins[0].reg().0;
            let dst = tile.outs[0].reg().0;
            ctx.u8(0x66);
            op_rr(ctx, *size, &[0x0f, 0x7e], src, dst);
            Ok(())
        }
        X64Op::Ucomi { size } => {
            let x = tile.ins[0].reg().0;
            let y = tile.ins[1].reg().0;
            if *size == 8 {
                ctx.u8(0x66);
            }
            op_rr(ctx, 4, &[0x0f, 0x2e], x, y);
            Ok(())
        }
        X64Op::CvtIntToFloat {
            int_size,
            float_size,
        } => {
            let dst = tile.outs[0].reg().0;
            let src = tile.ins[0].reg().0;
            ctx.u8(sse_prefix(*float_size));
            op_rr(ctx, *int_size, &[0x0f, 0x2a], dst, src);
            Ok(())
        }
        X64Op::CvtFloatToInt {
            int_size,
            float_size,
        } => {
            let dst = tile.outs[0].reg().0;
            let src = tile.ins[0].reg().0;
            ctx.u8(sse_prefix(*float_size));
            op_rr(ctx, *int_size, &[0x0f, 0x2c], dst, src);
            Ok(())
        }
        X64Op::CallSym { sym } => {
            ctx.u8(0xe8);
            ctx.sym_patch(PatchKind::Rel32, *sym);
            Ok(())
        }
        X64Op::CallReg => {
            let target = tile.ins.last().expect("call target").reg().0;
            op_rr(ctx, 4, &[0xff], 2, target);
            Ok(())
        }
        X64Op::Ret => {
            let frame = ctx.frame;
            emit_epilogue(ctx, frame)?;
            Ok(())
        }
        X64Op::Loc { loc } => {
            ctx.record_location(*loc);
            Ok(())
        }
        X64Op::SpillStore { slot } => {
            let src = &tile.ins[0];
            let mem = Mem::Reg {
                base: 4,
                index: None,
                disp: ctx.frame.spill_offset(*slot) as i32,
            };
            if src.mask.class == super::regs::XMM {
                ctx.u8(0xf2);
                op_rm(ctx, 4, &[0x0f, 0x11], src.reg().0, &mem);
            } else {
                op_rm(ctx, 8, &[0x89], src.reg().0, &mem);
            }
            Ok(())
        }
        X64Op::SpillLoad { slot } => {
            let dst = &tile.outs[0];
            let mem = Mem::Reg {
                base: 4,
                index: None,
                disp: ctx.frame.spill_offset(*slot) as i32,
            };
            if dst.mask.class == super::regs::XMM {
                ctx.u8(0xf2);
                op_rm(ctx, 4, &[0x0f, 0x10], dst.reg().0, &mem);
            } else {
                op_rm(ctx, 8, &[0x8b], dst.reg().0, &mem);
            }
            Ok(())
        }
        X64Op::StoreStackArg { size, offset } => {
            let src = &tile.ins[0];
            let mem = Mem::Reg {
                base: 4,
                index: None,
                disp: *offset as i32,
            };
            if src.mask.class == super::regs::XMM {
                ctx.u8(sse_prefix(*size));
                op_rm(ctx, 4, &[0x0f, 0x11], src.reg().0, &mem);
            } else {
                let opc: &[u8] = if *size == 1 { &[0x88] } else { &[0x89] };
                op_rm(ctx, (*size).max(8), opc, src.reg().0, &mem);
            }
            Ok(())
        }
        X64Op::LoadStackParam { size, index } => {
            let dst = &tile.outs[0];
            let mem = Mem::Reg {
                base: 4,
                index: None,
                disp: ctx.frame.incoming_param_offset(*index) as i32,
            };
            if dst.mask.class == super::regs::XMM {
                ctx.u8(sse_prefix(*size));
                op_rm(ctx, 4, &[0x0f, 0x10], dst.reg().0, &mem);
            } else {
                op_rm(ctx, (*size).max(4), &[0x8b], dst.reg().0, &mem);
            }
            Ok(())
        }
        X64Op::RepMovsb => {
            ctx.bytes(&[0xf3, 0xa4]);
            Ok(())
        }
        X64Op::RepStosb => {
            ctx.bytes(&[0xf3, 0xaa]);
            Ok(())
        }
        X64Op::XchgMem { size, addr } => {
            let value = tile.ins.last().expect("xchg value").reg().0;
            let mem = resolve(ctx, tile, addr);
            let opc: &[u8] = if *size == 1 { &[0x86] } else { &[0x87] };
            op_rm(ctx, *size, opc, value, &mem);
            Ok(())
        }
        X64Op::LockXadd { size, addr } => {
            let value = tile.ins.last().expect("xadd value").reg().0;
            let mem = resolve(ctx, tile, addr);
            ctx.u8(0xf0);
            let opc: &[u8] = if *size == 1 {
                &[0x0f, 0xc0]
            } else {
                &[0x0f, 0xc1]
            };
            op_rm(ctx, *size, opc, value, &mem);
            Ok(())
        }
        X64Op::LockAluMem { op, size, addr } => {
            let value = tile.ins.last().expect("rmw value").reg().0;
            let mem = resolve(ctx, tile, addr);
            ctx.u8(0xf0);
            op_rm(ctx, *size, &[alu_mr_opcode(*op, *size)], value, &mem);
            Ok(())
        }
        X64Op::LockCmpxchg { size, addr } => {
            let desired = tile.ins.last().expect("cas desired").reg().0;
            let mem = resolve(ctx, tile, addr);
            ctx.u8(0xf0);
            let opc: &[u8] = if *size == 1 {
                &[0x0f, 0xb0]
            } else {
                &[0x0f, 0xb1]
            };
            op_rm(ctx, *size, opc, desired, &mem);
            Ok(())
        }
        X64Op::RmwLoop { op, size, addr } => {
            let src = tile.ins.last().expect("rmw operand").reg().0;
            let tmp = tile.tmps[0].reg().0;
            let mem = resolve(ctx, tile, addr);
            // mov rax, [m]
            let load: &[u8] = if *size == 1 { &[0x8a] } else { &[0x8b] };
            op_rm(ctx, *size, load, 0, &mem);
            let loop_top = ctx.here();
            // mov tmp, rax ; op tmp, src ; lock cmpxchg [m], tmp
            op_rr(ctx, 8, &[0x89], 0, tmp);
            op_rr(ctx, *size, &[alu_mr_opcode(*op, *size)], src, tmp);
            ctx.u8(0xf0);
            let cmpxchg: &[u8] = if *size == 1 {
                &[0x0f, 0xb0]
            } else {
                &[0x0f, 0xb1]
            };
            op_rm(ctx, *size, cmpxchg, tmp, &mem);
            // jne loop_top (rel8 backward)
            ctx.u8(0x75);
            let rel = loop_top.wrapping_sub(ctx.here() + 1) as i32;
            debug_assert!((-128..0).contains(&rel), "rmw loop body too long");
            ctx.u8(rel as i8 as u8);
            Ok(())
        }
    }
}

fn emit_alu_imm(ctx: &mut EmitCtx<'_>, op: AluOp, size: u8, rm: u8, imm: i32) {
    let ext = alu_imm_ext(op);
    if size == 1 {
        op_rr(ctx, 1, &[0x80], ext, rm);
        ctx.u8(imm as u8);
    } else if let Ok(imm8) = i8::try_from(imm) {
        op_rr(ctx, size, &[0x83], ext, rm);
        ctx.u8(imm8 as u8);
    } else {
        op_rr(ctx, size, &[0x81], ext, rm);
        match size {
            2 => ctx.bytes(&(imm as u16).to_le_bytes()),
            _ => ctx.bytes(&imm.to_le_bytes()),
        }
    }
}

/// Frame setup: push the frame pointer and callee saves, adjust RSP,
/// probing first when the frame outgrows the configured threshold.
pub fn emit_prologue(ctx: &mut EmitCtx<'_>, frame: &FrameLayout) -> Result<(), CompileError> {
    if frame.frame_pointer {
        ctx.u8(0x55); // push rbp
        ctx.bytes(&[0x48, 0x89, 0xe5]); // mov rbp, rsp
    }
    for save in &frame.saves {
        if save.0 >= 8 {
            ctx.u8(0x41);
        }
        ctx.u8(0x50 + (save.0 & 7));
    }
    if frame.sub_amount > 0 {
        if let Some(probe) = frame.chkstk {
            ctx.u8(0xb8); // mov eax, imm32
            ctx.u32le(frame.sub_amount);
            ctx.u8(0xe8);
            ctx.sym_patch(PatchKind::Rel32, probe);
        }
        emit_rsp_adjust(ctx, 0x28 /* sub */, frame.sub_amount);
    }
    Ok(())
}

/// Frame teardown and return. Called per RETURN tile.
pub fn emit_epilogue(ctx: &mut EmitCtx<'_>, frame: &FrameLayout) -> Result<(), CompileError> {
    let start = ctx.here();
    if frame.sub_amount > 0 {
        emit_rsp_adjust(ctx, 0x00 /* add */, frame.sub_amount);
    }
    for save in frame.saves.iter().rev() {
        if save.0 >= 8 {
            ctx.u8(0x41);
        }
        ctx.u8(0x58 + (save.0 & 7));
    }
    if frame.frame_pointer {
        ctx.u8(0x5d); // pop rbp
    }
    ctx.u8(0xc3);
    ctx.epilogue_length = ctx.here() - start;
    Ok(())
}

fn emit_rsp_adjust(ctx: &mut EmitCtx<'_>, ext_bits: u8, amount: u32) {
    // add/sub rsp, imm — ext 0 is add, 5 is sub in the 81/83 group; the
    // caller passes the group bits pre-shifted (0x00 or 0x28).
    if let Ok(imm8) = i8::try_from(amount as i32) {
        ctx.bytes(&[0x48, 0x83, 0xc4 | ext_bits, imm8 as u8]);
    } else {
        ctx.bytes(&[0x48, 0x81, 0xc4 | ext_bits]);
        ctx.u32le(amount);
    }
}

#[cfg(test)]
mod tests;
