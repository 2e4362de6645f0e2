//! x86-64 tile matching.
//!
//! Runs under the reverse-order driver: consumers select before producers,
//! so address arithmetic, compares and constants can be folded into their
//! user's tile and never materialize unless someone asked for a register.

use riptide_ir::{DataType, Function, NodeId, Op, Payload};
use riptide_opt::BlockId;

use crate::error::CompileError;
use crate::isel::Sel;
use crate::target::Target;
use crate::tile::{Addr, AddrBase, RegMask, Tile};

use super::regs::{self, GPR, XMM};
use super::{AluOp, Cc, FAluOp, ShiftOp, X64, X64Op};

type Result<T> = core::result::Result<T, CompileError>;

fn unsupported(n_op: Op, reason: impl Into<String>) -> CompileError {
    CompileError::Unsupported {
        target: "x86-64",
        op: n_op,
        reason: reason.into(),
    }
}

/// Machine operand size of a data type, in bytes.
fn size_of(dt: DataType) -> Result<u8> {
    match dt {
        DataType::Int(1) | DataType::Int(8) => Ok(1),
        DataType::Int(16) => Ok(2),
        DataType::Int(32) => Ok(4),
        DataType::Int(64) | DataType::Ptr => Ok(8),
        DataType::F32 => Ok(4),
        DataType::F64 => Ok(8),
        other => Err(unsupported(
            Op::Bitcast,
            format!("values of type {other} in registers"),
        )),
    }
}

fn imm32_of(f: &Function, n: NodeId) -> Option<i32> {
    let v = f.node(n).int_value()?;
    i32::try_from(v).ok()
}

pub(super) fn select(t: &X64, ctx: &mut Sel<'_, X64>, n: NodeId) -> Result<()> {
    let f = ctx.f;
    match f.op(n) {
        Op::IntConst | Op::Poison => {
            if ctx.has_vreg(n) {
                let dst = ctx.vreg_of(n);
                let size = if f.dt(n).bits() == 64 { 8 } else { 4 };
                let imm = f.node(n).int_value().unwrap_or(0);
                let mask = ctx.any_mask(n);
                ctx.emit(
                    Tile::new(X64Op::MovRI { size, imm })
                        .write(dst, mask)
                        .from_node(n),
                );
            }
            Ok(())
        }
        Op::FloatConst => {
            if ctx.has_vreg(n) {
                let dst = ctx.vreg_of(n);
                let (size, imm) = match f.node(n).payload {
                    Payload::F32(bits) => (4u8, i64::from(bits)),
                    Payload::F64(bits) => (8u8, bits as i64),
                    _ => (8u8, 0),
                };
                let tmp = ctx.fresh(GPR);
                let gmask = ctx.class_mask(GPR);
                let xmask = ctx.class_mask(XMM);
                ctx.emit_all(vec![
                    Tile::new(X64Op::MovRI { size, imm }).write(tmp, gmask),
                    Tile::new(X64Op::GprToXmm { size })
                        .read(tmp, gmask)
                        .write(dst, xmask)
                        .from_node(n),
                ]);
            }
            Ok(())
        }
        Op::Symbol => {
            if ctx.has_vreg(n) {
                let dst = ctx.vreg_of(n);
                let Payload::Symbol(sym) = f.node(n).payload else {
                    panic!("symbol node {n} without symbol payload");
                };
                let mask = ctx.any_mask(n);
                ctx.emit(
                    Tile::new(X64Op::Lea {
                        addr: Addr {
                            base: AddrBase::Sym(sym),
                            index: None,
                            scale: 1,
                            disp: 0,
                        },
                    })
                    .write(dst, mask)
                    .from_node(n),
                );
            }
            Ok(())
        }
        Op::Local => {
            if ctx.has_vreg(n) {
                let dst = ctx.vreg_of(n);
                let mask = ctx.any_mask(n);
                let addr = if f.node(n).local_info().is_some_and(|i| i.tls) {
                    // Thread-locals resolve through the runtime-provided
                    // index symbol; without one there is no lowering.
                    let Some(sym) = ctx.tls_index else {
                        return Err(unsupported(
                            Op::Local,
                            "thread-local storage without a TLS index symbol",
                        ));
                    };
                    Addr {
                        base: AddrBase::Sym(sym),
                        index: None,
                        scale: 1,
                        disp: 0,
                    }
                } else {
                    Addr::frame(n, 0)
                };
                ctx.emit(Tile::new(X64Op::Lea { addr }).write(dst, mask).from_node(n));
            }
            Ok(())
        }
        Op::Proj => select_proj(t, ctx, n),
        Op::Load => {
            if !ctx.has_vreg(n) && f.users(n).is_empty() {
                return Ok(());
            }
            let dst = ctx.vreg_of(n);
            let dt = f.dt(n);
            let size = size_of(dt)?;
            let addr_node = f.input(n, 2).expect("load address");
            let (addr, mut tile_ins) = fold_addr(ctx, n, addr_node)?;
            let op = if dt.is_float() {
                X64Op::FLoad { size, addr }
            } else {
                X64Op::Load { size, addr }
            };
            let mut tile = Tile::new(op).from_node(n);
            tile.ins.append(&mut tile_ins);
            tile.outs.push(crate::tile::Operand::new(dst, ctx.any_mask(n)));
            ctx.emit(tile);
            Ok(())
        }
        Op::Store => select_store(ctx, n),
        op if op.is_int_binop() => select_int_binop(ctx, n, op),
        op if op.is_float_binop() => select_float_binop(ctx, n, op),
        Op::Neg | Op::Not => {
            let dst = ctx.vreg_of(n);
            let src = f.input(n, 1).expect("operand");
            let src_v = ctx.vreg_of(src);
            let size = size_of(f.dt(n))?;
            let mask = ctx.any_mask(n);
            let op = if f.op(n) == Op::Neg {
                X64Op::Neg { size }
            } else {
                X64Op::Not { size }
            };
            ctx.emit_all(vec![
                Tile::new(X64Op::Copy).read(src_v, mask).write(dst, mask),
                Tile::new(op).read(dst, mask).write(dst, mask).from_node(n),
            ]);
            Ok(())
        }
        op if op.is_cmp() => {
            // Standalone boolean materialization; branches fuse their
            // compare before it ever gets here.
            let dst = ctx.vreg_of(n);
            let mask = ctx.any_mask(n);
            let cc = emit_cmp_flags(ctx, n)?;
            ctx.emit_all(vec![
                Tile::new(X64Op::Setcc { cc }).write(dst, mask).from_node(n),
                Tile::new(X64Op::ExtRR {
                    signed: false,
                    from: 1,
                    to: 4,
                })
                .read(dst, mask)
                .write(dst, mask),
            ]);
            Ok(())
        }
        Op::SignExt | Op::ZeroExt => select_ext(ctx, n),
        Op::Truncate | Op::Int2Ptr | Op::Ptr2Int => {
            let src = f.input(n, 1).expect("operand");
            let src_v = ctx.vreg_of(src);
            let dst = ctx.vreg_of(n);
            let mask = ctx.any_mask(n);
            ctx.emit(
                Tile::new(X64Op::Copy)
                    .read(src_v, mask)
                    .write(dst, mask)
                    .from_node(n),
            );
            Ok(())
        }
        Op::Bitcast => {
            let src = f.input(n, 1).expect("operand");
            let src_v = ctx.vreg_of(src);
            let dst = ctx.vreg_of(n);
            let from_float = f.dt(src).is_float();
            let to_float = f.dt(n).is_float();
            let size = size_of(f.dt(n))?;
            let tile = match (from_float, to_float) {
                (false, true) => Tile::new(X64Op::GprToXmm { size })
                    .read(src_v, ctx.class_mask(GPR))
                    .write(dst, ctx.class_mask(XMM)),
                (true, false) => Tile::new(X64Op::XmmToGpr { size })
                    .read(src_v, ctx.class_mask(XMM))
                    .write(dst, ctx.class_mask(GPR)),
                _ => Tile::new(X64Op::Copy)
                    .read(src_v, ctx.any_mask(n))
                    .write(dst, ctx.any_mask(n)),
            };
            ctx.emit(tile.from_node(n));
            Ok(())
        }
        Op::Int2Float => {
            let src = f.input(n, 1).expect("operand");
            let src_v = ctx.vreg_of(src);
            let dst = ctx.vreg_of(n);
            let int_size = size_of(f.dt(src))?.max(4);
            let float_size = size_of(f.dt(n))?;
            ctx.emit(
                Tile::new(X64Op::CvtIntToFloat {
                    int_size,
                    float_size,
                })
                .read(src_v, ctx.class_mask(GPR))
                .write(dst, ctx.class_mask(XMM))
                .from_node(n),
            );
            Ok(())
        }
        Op::Float2Int => {
            let src = f.input(n, 1).expect("operand");
            let src_v = ctx.vreg_of(src);
            let dst = ctx.vreg_of(n);
            let float_size = size_of(f.dt(src))?;
            let int_size = size_of(f.dt(n))?.max(4);
            ctx.emit(
                Tile::new(X64Op::CvtFloatToInt {
                    int_size,
                    float_size,
                })
                .read(src_v, ctx.class_mask(XMM))
                .write(dst, ctx.class_mask(GPR))
                .from_node(n),
            );
            Ok(())
        }
        Op::Member | Op::Array => select_address_value(ctx, n),
        Op::Select => select_select(ctx, n),
        Op::Branch => select_branch(ctx, n),
        Op::Return => select_return(t, ctx, n),
        Op::Call => select_call(t, ctx, n),
        Op::Safepoint => {
            if let Payload::Safepoint(loc) = f.node(n).payload {
                ctx.emit(Tile::new(X64Op::Loc { loc }).from_node(n));
            }
            Ok(())
        }
        Op::Memcpy => {
            let (dst, src, count) = (
                f.input(n, 2).expect("dst"),
                f.input(n, 3).expect("src"),
                f.input(n, 4).expect("count"),
            );
            let tiles = rep_setup(
                ctx,
                &[(regs::RDI, dst), (regs::RSI, src), (regs::RCX, count)],
            );
            let mut all = tiles.0;
            let mut rep = Tile::new(X64Op::RepMovsb).from_node(n);
            rep.ins = tiles.1;
            all.push(rep);
            ctx.emit_all(all);
            Ok(())
        }
        Op::Memset => {
            let (dst, byte, count) = (
                f.input(n, 2).expect("dst"),
                f.input(n, 3).expect("byte"),
                f.input(n, 4).expect("count"),
            );
            let tiles = rep_setup(
                ctx,
                &[(regs::RDI, dst), (regs::RAX, byte), (regs::RCX, count)],
            );
            let mut all = tiles.0;
            let mut rep = Tile::new(X64Op::RepStosb).from_node(n);
            rep.ins = tiles.1;
            all.push(rep);
            ctx.emit_all(all);
            Ok(())
        }
        Op::AtomicLoad
        | Op::AtomicXchg
        | Op::AtomicAdd
        | Op::AtomicAnd
        | Op::AtomicOr
        | Op::AtomicXor
        | Op::AtomicCas => select_atomic(ctx, n),
        other => Err(unsupported(other, "no tile pattern")),
    }
}

/// The overflow-slot index of parameter `param`: how many parameters
/// before it also missed their class's register file.
fn stack_slot_of_param(t: &X64, f: &Function, param: usize) -> u32 {
    let cc = f.proto.call_conv;
    let mut used = [0usize; 2];
    let mut overflow = 0u32;
    for &dt in &f.proto.params[..param] {
        let class = t.reg_class(dt);
        let pos = used[class.0 as usize];
        used[class.0 as usize] += 1;
        if pos >= t.arg_regs(cc, class).len() {
            overflow += 1;
        }
    }
    overflow
}

/// Copies values into fixed registers ahead of a string operation.
fn rep_setup(
    ctx: &mut Sel<'_, X64>,
    args: &[(crate::tile::PhysReg, NodeId)],
) -> (Vec<Tile<X64Op>>, Vec<crate::tile::Operand>) {
    let mut tiles = Vec::new();
    let mut ins = Vec::new();
    for &(reg, node) in args {
        let src = ctx.vreg_of(node);
        let fixed = ctx.fresh(GPR);
        let fixed_mask = RegMask::single(GPR, reg);
        tiles.push(
            Tile::new(X64Op::Copy)
                .read(src, ctx.class_mask(GPR))
                .write(fixed, fixed_mask),
        );
        ins.push(crate::tile::Operand::new(fixed, fixed_mask));
    }
    (tiles, ins)
}

fn select_proj(t: &X64, ctx: &mut Sel<'_, X64>, n: NodeId) -> Result<()> {
    let f = ctx.f;
    let parent = f.input(n, 0).expect("projection parent");
    // Parameters arrive in their ABI registers at function entry.
    if f.op(parent) == Op::Start {
        let index = f.node(n).proj_index().unwrap_or(0);
        if index >= 2 && ctx.has_vreg(n) {
            let param = (index - 2) as usize;
            let cc = f.proto.call_conv;
            let class = t.reg_class(f.dt(n));
            // Position within this class among the parameters.
            let class_pos = f.proto.params[..param]
                .iter()
                .filter(|&&dt| t.reg_class(dt) == class)
                .count();
            let regs = t.arg_regs(cc, class);
            let dst = ctx.vreg_of(n);
            if let Some(&reg) = regs.get(class_pos) {
                let fixed = ctx.fresh(class);
                ctx.emit(
                    Tile::new(X64Op::Copy)
                        .read(fixed, RegMask::single(class, reg))
                        .write(dst, ctx.class_mask(class))
                        .from_node(n),
                );
            } else {
                // Overflowed the register file: the caller left it above
                // our return address.
                let index = stack_slot_of_param(t, f, param);
                let size = size_of(f.dt(n))?;
                ctx.emit(
                    Tile::new(X64Op::LoadStackParam { size, index })
                        .write(dst, ctx.class_mask(class))
                        .from_node(n),
                );
            }
        }
    }
    // Call and atomic results were wired when their parent was selected.
    Ok(())
}

fn select_store(ctx: &mut Sel<'_, X64>, n: NodeId) -> Result<()> {
    let f = ctx.f;
    let addr_node = f.input(n, 2).expect("store address");
    let value = f.input(n, 3).expect("store value");
    let dt = f.dt(value);
    let size = size_of(dt)?;
    let (addr, mut tile_ins) = fold_addr(ctx, n, addr_node)?;

    if dt.is_float() {
        let v = ctx.vreg_of(value);
        let mut tile = Tile::new(X64Op::FStore { size, addr }).from_node(n);
        tile.ins.append(&mut tile_ins);
        tile.ins
            .push(crate::tile::Operand::new(v, ctx.class_mask(XMM)));
        ctx.emit(tile);
        return Ok(());
    }
    if let Some(imm) = imm32_of(f, value) {
        let mut tile = Tile::new(X64Op::StoreImm { size, addr, imm }).from_node(n);
        tile.ins.append(&mut tile_ins);
        ctx.emit(tile);
        return Ok(());
    }
    let v = ctx.vreg_of(value);
    let mut tile = Tile::new(X64Op::Store { size, addr }).from_node(n);
    tile.ins.append(&mut tile_ins);
    tile.ins
        .push(crate::tile::Operand::new(v, ctx.class_mask(GPR)));
    ctx.emit(tile);
    Ok(())
}

fn select_int_binop(ctx: &mut Sel<'_, X64>, n: NodeId, op: Op) -> Result<()> {
    let f = ctx.f;
    let dst = ctx.vreg_of(n);
    let lhs = f.input(n, 1).expect("lhs");
    let rhs = f.input(n, 2).expect("rhs");
    let size = size_of(f.dt(n))?;
    let mask = ctx.any_mask(n);

    match op {
        Op::Add | Op::Sub | Op::And | Op::Or | Op::Xor => {
            let alu = match op {
                Op::Add => AluOp::Add,
                Op::Sub => AluOp::Sub,
                Op::And => AluOp::And,
                Op::Or => AluOp::Or,
                _ => AluOp::Xor,
            };
            let lhs_v = ctx.vreg_of(lhs);
            let mut tiles = vec![Tile::new(X64Op::Copy).read(lhs_v, mask).write(dst, mask)];
            if let Some(imm) = imm32_of(f, rhs) {
                tiles.push(
                    Tile::new(X64Op::AluImm { op: alu, size, imm })
                        .read(dst, mask)
                        .write(dst, mask)
                        .from_node(n),
                );
            } else {
                let rhs_v = ctx.vreg_of(rhs);
                tiles.push(
                    Tile::new(X64Op::Alu { op: alu, size })
                        .read(dst, mask)
                        .read(rhs_v, mask)
                        .write(dst, mask)
                        .from_node(n),
                );
            }
            ctx.emit_all(tiles);
            Ok(())
        }
        Op::Mul => {
            let lhs_v = ctx.vreg_of(lhs);
            if let Some(imm) = imm32_of(f, rhs) {
                ctx.emit(
                    Tile::new(X64Op::MulImm { size, imm })
                        .read(lhs_v, mask)
                        .write(dst, mask)
                        .from_node(n),
                );
            } else {
                let rhs_v = ctx.vreg_of(rhs);
                ctx.emit_all(vec![
                    Tile::new(X64Op::Copy).read(lhs_v, mask).write(dst, mask),
                    Tile::new(X64Op::Mul { size })
                        .read(dst, mask)
                        .read(rhs_v, mask)
                        .write(dst, mask)
                        .from_node(n),
                ]);
            }
            Ok(())
        }
        Op::Udiv | Op::Sdiv | Op::Umod | Op::Smod => {
            let signed = matches!(op, Op::Sdiv | Op::Smod);
            let wants_rem = matches!(op, Op::Umod | Op::Smod);
            if size < 4 {
                return Err(unsupported(op, "sub-32-bit division"));
            }
            let lhs_v = ctx.vreg_of(lhs);
            let rhs_v = ctx.vreg_of(rhs);
            let rax_in = ctx.fresh(GPR);
            let rdx_in = ctx.fresh(GPR);
            let rax_out = ctx.fresh(GPR);
            let rdx_out = ctx.fresh(GPR);
            let rax = RegMask::single(GPR, regs::RAX);
            let rdx = RegMask::single(GPR, regs::RDX);

            let mut tiles = vec![Tile::new(X64Op::Copy).read(lhs_v, mask).write(rax_in, rax)];
            if signed {
                tiles.push(
                    Tile::new(X64Op::SignExtendAx { size })
                        .read(rax_in, rax)
                        .write(rdx_in, rdx),
                );
            } else {
                tiles.push(Tile::new(X64Op::MovRI { size: 4, imm: 0 }).write(rdx_in, rdx));
            }
            tiles.push(
                Tile::new(X64Op::Div { size, signed })
                    .read(rax_in, rax)
                    .read(rdx_in, rdx)
                    .read(rhs_v, mask)
                    .write(rax_out, rax)
                    .write(rdx_out, rdx)
                    .from_node(n),
            );
            let result = if wants_rem { rdx_out } else { rax_out };
            let result_mask = if wants_rem { rdx } else { rax };
            tiles.push(
                Tile::new(X64Op::Copy)
                    .read(result, result_mask)
                    .write(dst, mask),
            );
            ctx.emit_all(tiles);
            Ok(())
        }
        Op::Shl | Op::Shr | Op::Sar | Op::Rol | Op::Ror => {
            let shift = match op {
                Op::Shl => ShiftOp::Shl,
                Op::Shr => ShiftOp::Shr,
                Op::Sar => ShiftOp::Sar,
                Op::Rol => ShiftOp::Rol,
                _ => ShiftOp::Ror,
            };
            let lhs_v = ctx.vreg_of(lhs);
            let mut tiles = Vec::new();
            if let Some(imm) = imm32_of(f, rhs) {
                tiles.push(Tile::new(X64Op::Copy).read(lhs_v, mask).write(dst, mask));
                tiles.push(
                    Tile::new(X64Op::ShiftImm {
                        op: shift,
                        size,
                        imm: imm as u8,
                    })
                    .read(dst, mask)
                    .write(dst, mask)
                    .from_node(n),
                );
            } else {
                let count = ctx.vreg_of(rhs);
                let cl = ctx.fresh(GPR);
                let cl_mask = RegMask::single(GPR, regs::RCX);
                // Claim RCX first so the destination never lands on it.
                tiles.push(Tile::new(X64Op::Copy).read(count, mask).write(cl, cl_mask));
                tiles.push(Tile::new(X64Op::Copy).read(lhs_v, mask).write(dst, mask));
                tiles.push(
                    Tile::new(X64Op::ShiftCl { op: shift, size })
                        .read(dst, mask)
                        .read(cl, cl_mask)
                        .write(dst, mask)
                        .from_node(n),
                );
            }
            ctx.emit_all(tiles);
            Ok(())
        }
        other => Err(unsupported(other, "no integer tile")),
    }
}

fn select_float_binop(ctx: &mut Sel<'_, X64>, n: NodeId, op: Op) -> Result<()> {
    let f = ctx.f;
    let dst = ctx.vreg_of(n);
    let lhs = ctx.vreg_of(f.input(n, 1).expect("lhs"));
    let rhs = ctx.vreg_of(f.input(n, 2).expect("rhs"));
    let size = size_of(f.dt(n))?;
    let fop = match op {
        Op::Fadd => FAluOp::Add,
        Op::Fsub => FAluOp::Sub,
        Op::Fmul => FAluOp::Mul,
        _ => FAluOp::Div,
    };
    let mask = ctx.class_mask(XMM);
    ctx.emit_all(vec![
        Tile::new(X64Op::Copy).read(lhs, mask).write(dst, mask),
        Tile::new(X64Op::FAlu { op: fop, size })
            .read(dst, mask)
            .read(rhs, mask)
            .write(dst, mask)
            .from_node(n),
    ]);
    Ok(())
}

fn select_ext(ctx: &mut Sel<'_, X64>, n: NodeId) -> Result<()> {
    let f = ctx.f;
    let signed = f.op(n) == Op::SignExt;
    let src = f.input(n, 1).expect("operand");
    let from = size_of(f.dt(src))?;
    let to = size_of(f.dt(n))?;
    let dst = ctx.vreg_of(n);
    let mask = ctx.any_mask(n);

    // Extensions merge with a load when they are its only user.
    if f.op(src) == Op::Load
        && ctx.only_user(src) == Some(n)
        && ctx.in_current_block(src)
        && !ctx.has_vreg(src)
        && f.dt(src).bits() > 1
    {
        let addr_node = f.input(src, 2).expect("load address");
        let (addr, mut tile_ins) = fold_addr(ctx, src, addr_node)?;
        let mut tile = Tile::new(X64Op::LoadExt {
            signed,
            from,
            to,
            addr,
        })
        .from_node(n);
        tile.ins.append(&mut tile_ins);
        tile.outs.push(crate::tile::Operand::new(dst, mask));
        ctx.emit(tile);
        ctx.mark_consumed(src);
        return Ok(());
    }

    let src_v = ctx.vreg_of(src);
    let one_bit = f.dt(src).bits() == 1;
    if signed && one_bit {
        // An i1 holds 0 or 1 in a register; its sign extension is 0 or -1.
        ctx.emit_all(vec![
            Tile::new(X64Op::ExtRR {
                signed: false,
                from: 1,
                to,
            })
            .read(src_v, mask)
            .write(dst, mask),
            Tile::new(X64Op::Neg { size: to })
                .read(dst, mask)
                .write(dst, mask)
                .from_node(n),
        ]);
        return Ok(());
    }
    ctx.emit(
        Tile::new(X64Op::ExtRR { signed, from, to })
            .read(src_v, mask)
            .write(dst, mask)
            .from_node(n),
    );
    Ok(())
}

fn select_select(ctx: &mut Sel<'_, X64>, n: NodeId) -> Result<()> {
    let f = ctx.f;
    if f.dt(n).is_float() {
        return Err(unsupported(Op::Select, "float select"));
    }
    let cond = ctx.vreg_of(f.input(n, 1).expect("cond"));
    let then_v = ctx.vreg_of(f.input(n, 2).expect("then"));
    let else_v = ctx.vreg_of(f.input(n, 3).expect("else"));
    let dst = ctx.vreg_of(n);
    let size = size_of(f.dt(n))?.max(4);
    let mask = ctx.any_mask(n);
    ctx.emit_all(vec![
        Tile::new(X64Op::Copy).read(else_v, mask).write(dst, mask),
        Tile::new(X64Op::TestRR { size: 1 })
            .read(cond, mask)
            .read(cond, mask),
        Tile::new(X64Op::Cmov { cc: Cc::Nz, size })
            .read(dst, mask)
            .read(then_v, mask)
            .write(dst, mask)
            .from_node(n),
    ]);
    Ok(())
}

/// Emits the flag-setting compare for `cmp_node` and returns the condition
/// under which the predicate is true.
fn emit_cmp_flags(ctx: &mut Sel<'_, X64>, cmp_node: NodeId) -> Result<Cc> {
    let f = ctx.f;
    let op = f.op(cmp_node);
    let lhs = f.input(cmp_node, 1).expect("lhs");
    let rhs = f.input(cmp_node, 2).expect("rhs");
    let operand_dt = f.node(cmp_node).cmp_dt().unwrap_or(DataType::I64);
    let size = size_of(operand_dt)?;

    if operand_dt.is_float() {
        // `a < b` is tested as `b > a`: NaN makes `ja`/`jae` fall false.
        let a = ctx.vreg_of(lhs);
        let b = ctx.vreg_of(rhs);
        let mask = ctx.class_mask(XMM);
        ctx.emit(
            Tile::new(X64Op::Ucomi { size })
                .read(b, mask)
                .read(a, mask)
                .from_node(cmp_node),
        );
        return Ok(match op {
            Op::CmpFlt => Cc::A,
            Op::CmpFle => Cc::Ae,
            Op::CmpEq => Cc::E,
            _ => Cc::Ne,
        });
    }

    let cc = match op {
        Op::CmpEq => Cc::E,
        Op::CmpNe => Cc::Ne,
        Op::CmpUlt => Cc::B,
        Op::CmpUle => Cc::Be,
        Op::CmpSlt => Cc::L,
        Op::CmpSle => Cc::Le,
        other => return Err(unsupported(other, "unknown compare")),
    };
    let lhs_v = ctx.vreg_of(lhs);
    let mask = ctx.class_mask(GPR);
    if let Some(imm) = imm32_of(f, rhs) {
        ctx.emit(
            Tile::new(X64Op::CmpRI { size, imm })
                .read(lhs_v, mask)
                .from_node(cmp_node),
        );
    } else {
        let rhs_v = ctx.vreg_of(rhs);
        ctx.emit(
            Tile::new(X64Op::CmpRR { size })
                .read(lhs_v, mask)
                .read(rhs_v, mask)
                .from_node(cmp_node),
        );
    }
    Ok(cc)
}

/// Maps each branch edge (by key index, default last) to its target block.
fn branch_targets(ctx: &Sel<'_, X64>, branch: NodeId) -> Vec<Option<BlockId>> {
    let f = ctx.f;
    let Payload::Branch(ref keys) = f.node(branch).payload else {
        return Vec::new();
    };
    let mut out = vec![None; keys.len() + 1];
    for u in f.users(branch) {
        if f.op(u.node) != Op::Proj {
            continue;
        }
        let Some(i) = f.node(u.node).proj_index() else {
            continue;
        };
        let region = f
            .users(u.node)
            .iter()
            .find(|ru| f.op(ru.node) == Op::Region)
            .map(|ru| ru.node);
        if let Some(r) = region {
            if let Some(b) = ctx.sched.cfg.block_of_head(r) {
                if let Some(slot) = out.get_mut(i as usize) {
                    *slot = Some(b);
                }
            }
        }
    }
    out
}

fn select_branch(ctx: &mut Sel<'_, X64>, n: NodeId) -> Result<()> {
    let f = ctx.f;
    let Payload::Branch(keys) = f.node(n).payload.clone() else {
        panic!("branch {n} without key payload");
    };
    let key = f.input(n, 1).expect("branch key");
    let targets = branch_targets(ctx, n);
    let fallback = ctx.block;
    let target = |i: usize| targets.get(i).copied().flatten().unwrap_or(fallback);

    if keys.len() == 1 && keys[0] == 0 {
        let (true_blk, false_blk) = (target(1), target(0));
        // Compare-and-branch fusion: the compare's only consumer is us.
        if f.op(key).is_cmp() && ctx.only_user(key) == Some(n) && ctx.in_current_block(key) {
            let cc = emit_cmp_flags(ctx, key)?;
            ctx.mark_consumed(key);
            ctx.emit_all(vec![
                Tile::new(X64Op::Jcc {
                    cc,
                    target: true_blk,
                })
                .from_node(n),
                Tile::new(X64Op::Jmp { target: false_blk }),
            ]);
            return Ok(());
        }
        let k = ctx.vreg_of(key);
        let size = size_of(f.dt(key))?;
        let mask = ctx.class_mask(GPR);
        ctx.emit_all(vec![
            Tile::new(X64Op::TestRR { size }).read(k, mask).read(k, mask),
            Tile::new(X64Op::Jcc {
                cc: Cc::Nz,
                target: true_blk,
            })
            .from_node(n),
            Tile::new(X64Op::Jmp { target: false_blk }),
        ]);
        return Ok(());
    }

    // Multi-way: a compare-and-jump ladder, default edge last.
    let k = ctx.vreg_of(key);
    let size = size_of(f.dt(key))?;
    let mask = ctx.class_mask(GPR);
    let mut tiles = Vec::new();
    for (i, &kv) in keys.iter().enumerate() {
        let imm = i32::try_from(kv)
            .map_err(|_| unsupported(Op::Branch, "switch key beyond 32 bits"))?;
        tiles.push(Tile::new(X64Op::CmpRI { size, imm }).read(k, mask));
        tiles.push(Tile::new(X64Op::Jcc {
            cc: Cc::E,
            target: target(i),
        }));
    }
    tiles.push(Tile::new(X64Op::Jmp {
        target: target(keys.len()),
    }));
    ctx.emit_all(tiles);
    Ok(())
}

fn select_return(t: &X64, ctx: &mut Sel<'_, X64>, n: NodeId) -> Result<()> {
    let f = ctx.f;
    let cc = f.proto.call_conv;
    let mut tiles = Vec::new();
    let mut ret_tile = Tile::new(X64Op::Ret).from_node(n);
    let mut used = [0usize; 2];
    for i in 2..f.inputs(n).len() {
        let value = f.input(n, i).expect("return value");
        let class = t.reg_class(f.dt(value));
        let regs = t.ret_regs(cc, class);
        let pos = used[class.0 as usize];
        used[class.0 as usize] += 1;
        let Some(&reg) = regs.get(pos) else {
            return Err(unsupported(Op::Return, "too many return values"));
        };
        let fixed = ctx.fresh(class);
        let fixed_mask = RegMask::single(class, reg);
        let src = ctx.vreg_of(value);
        tiles.push(
            Tile::new(X64Op::Copy)
                .read(src, ctx.class_mask(class))
                .write(fixed, fixed_mask),
        );
        ret_tile.ins.push(crate::tile::Operand::new(fixed, fixed_mask));
    }
    tiles.push(ret_tile);
    ctx.emit_all(tiles);
    Ok(())
}

fn select_call(t: &X64, ctx: &mut Sel<'_, X64>, n: NodeId) -> Result<()> {
    let f = ctx.f;
    let Payload::Call(proto) = f.node(n).payload.clone() else {
        panic!("call {n} without prototype payload");
    };
    let cc = proto.call_conv;
    let target_node = f.input(n, 2).expect("call target");
    let args: Vec<NodeId> = f.inputs(n)[3..].iter().flatten().copied().collect();

    let mut tiles = Vec::new();
    let mut call_ins = Vec::new();
    let mut used = [0usize; 2];
    let mut overflow = 0u32;
    let mut float_args = 0i64;
    for &arg in &args {
        let class = t.reg_class(f.dt(arg));
        if class == XMM {
            float_args += 1;
        }
        let regs = t.arg_regs(cc, class);
        let pos = used[class.0 as usize];
        used[class.0 as usize] += 1;
        let src = ctx.vreg_of(arg);
        if let Some(&reg) = regs.get(pos) {
            let fixed = ctx.fresh(class);
            let fixed_mask = RegMask::single(class, reg);
            tiles.push(
                Tile::new(X64Op::Copy)
                    .read(src, ctx.class_mask(class))
                    .write(fixed, fixed_mask),
            );
            call_ins.push(crate::tile::Operand::new(fixed, fixed_mask));
        } else {
            // Past the register file: spill into the outgoing area the
            // frame reserves at the bottom of the stack.
            let size = size_of(f.dt(arg))?;
            tiles.push(
                Tile::new(X64Op::StoreStackArg {
                    size,
                    offset: overflow * 8,
                })
                .read(src, ctx.class_mask(class)),
            );
            overflow += 1;
        }
    }
    if proto.varargs && cc == riptide_ir::CallConv::C {
        // System-V varargs: AL carries the number of vector arguments.
        let al = ctx.fresh(GPR);
        let al_mask = RegMask::single(GPR, regs::RAX);
        tiles.push(
            Tile::new(X64Op::MovRI {
                size: 4,
                imm: float_args,
            })
            .write(al, al_mask),
        );
        call_ins.push(crate::tile::Operand::new(al, al_mask));
    }

    let mut call = if f.op(target_node) == Op::Symbol {
        let Payload::Symbol(sym) = f.node(target_node).payload else {
            panic!("symbol node without payload");
        };
        Tile::new(X64Op::CallSym { sym }).from_node(n)
    } else {
        let tv = ctx.vreg_of(target_node);
        call_ins.push(crate::tile::Operand::new(tv, ctx.class_mask(GPR)));
        Tile::new(X64Op::CallReg).from_node(n)
    };
    call.ins = call_ins;
    call = call
        .clobbering(RegMask {
            class: GPR,
            bits: t.caller_saved(GPR),
        })
        .clobbering(RegMask {
            class: XMM,
            bits: t.caller_saved(XMM),
        });

    // Wire used return projections out of their ABI registers.
    let mut after = Vec::new();
    let mut ret_used = [0usize; 2];
    let mut projs: Vec<(u32, NodeId)> = f
        .users(n)
        .iter()
        .filter(|u| f.op(u.node) == Op::Proj)
        .filter_map(|u| f.node(u.node).proj_index().map(|i| (i, u.node)))
        .filter(|&(i, _)| i >= 1)
        .collect();
    projs.sort_by_key(|&(i, _)| i);
    for (_, proj) in projs {
        let class = t.reg_class(f.dt(proj));
        let regs = t.ret_regs(cc, class);
        let pos = ret_used[class.0 as usize];
        ret_used[class.0 as usize] += 1;
        let Some(&reg) = regs.get(pos) else {
            return Err(unsupported(Op::Call, "too many return values"));
        };
        let fixed = ctx.fresh(class);
        let fixed_mask = RegMask::single(class, reg);
        call.outs.push(crate::tile::Operand::new(fixed, fixed_mask));
        if ctx.has_vreg(proj) || !f.users(proj).is_empty() {
            let dst = ctx.vreg_of(proj);
            after.push(
                Tile::new(X64Op::Copy)
                    .read(fixed, fixed_mask)
                    .write(dst, ctx.class_mask(class))
                    .from_node(proj),
            );
        }
    }

    tiles.push(call);
    tiles.extend(after);
    ctx.emit_all(tiles);
    Ok(())
}

fn select_atomic(ctx: &mut Sel<'_, X64>, n: NodeId) -> Result<()> {
    let f = ctx.f;
    let op = f.op(n);
    let addr_node = f.input(n, 2).expect("atomic address");
    let (addr, tile_ins) = fold_addr(ctx, n, addr_node)?;
    let mask = ctx.class_mask(GPR);

    // The (mem, value) tuple: find the value projection if it is read.
    let value_proj = f
        .users(n)
        .iter()
        .find(|u| f.op(u.node) == Op::Proj && f.node(u.node).proj_index() == Some(1))
        .map(|u| u.node);
    let value_read = value_proj.is_some_and(|p| !f.users(p).is_empty() || ctx.has_vreg(p));

    match op {
        Op::AtomicLoad => {
            let Some(proj) = value_proj else {
                return Ok(());
            };
            if !value_read {
                return Ok(());
            }
            let dst = ctx.vreg_of(proj);
            let size = size_of(f.dt(proj))?;
            let mut tile = Tile::new(X64Op::Load { size, addr }).from_node(n);
            tile.ins = tile_ins;
            tile.outs.push(crate::tile::Operand::new(dst, mask));
            ctx.emit(tile);
            Ok(())
        }
        Op::AtomicXchg | Op::AtomicAdd => {
            let operand = f.input(n, 3).expect("atomic operand");
            let size = size_of(f.dt(operand))?;
            let src = ctx.vreg_of(operand);
            let io = ctx.fresh(GPR);
            let x64op = if op == Op::AtomicXchg {
                X64Op::XchgMem { size, addr }
            } else {
                X64Op::LockXadd { size, addr }
            };
            let mut rmw = Tile::new(x64op).from_node(n);
            rmw.ins = tile_ins;
            rmw.ins.push(crate::tile::Operand::new(io, mask));
            rmw.outs.push(crate::tile::Operand::new(io, mask));
            let mut tiles = vec![Tile::new(X64Op::Copy).read(src, mask).write(io, mask), rmw];
            if let (Some(proj), true) = (value_proj, value_read) {
                let dst = ctx.vreg_of(proj);
                tiles.push(Tile::new(X64Op::Copy).read(io, mask).write(dst, mask));
            }
            ctx.emit_all(tiles);
            Ok(())
        }
        Op::AtomicAnd | Op::AtomicOr | Op::AtomicXor => {
            let operand = f.input(n, 3).expect("atomic operand");
            let size = size_of(f.dt(operand))?;
            let src = ctx.vreg_of(operand);
            let alu = match op {
                Op::AtomicAnd => AluOp::And,
                Op::AtomicOr => AluOp::Or,
                _ => AluOp::Xor,
            };
            if !value_read {
                // No one wants the old value: a single locked RMW does it.
                let mut tile = Tile::new(X64Op::LockAluMem { op: alu, size, addr }).from_node(n);
                tile.ins = tile_ins;
                tile.ins.push(crate::tile::Operand::new(src, mask));
                ctx.emit(tile);
                return Ok(());
            }
            // Old value demanded: compare-exchange retry loop, old in RAX.
            let rax = ctx.fresh(GPR);
            let rax_mask = RegMask::single(GPR, regs::RAX);
            let tmp = ctx.fresh(GPR);
            let mut loop_tile = Tile::new(X64Op::RmwLoop { op: alu, size, addr }).from_node(n);
            loop_tile.ins = tile_ins;
            loop_tile.ins.push(crate::tile::Operand::new(src, mask));
            loop_tile.outs.push(crate::tile::Operand::new(rax, rax_mask));
            loop_tile.tmps.push(crate::tile::Operand::new(tmp, mask));
            let proj = value_proj.expect("value read implies projection");
            let dst = ctx.vreg_of(proj);
            ctx.emit_all(vec![
                loop_tile,
                Tile::new(X64Op::Copy).read(rax, rax_mask).write(dst, mask),
            ]);
            Ok(())
        }
        Op::AtomicCas => {
            let expected = f.input(n, 3).expect("expected");
            let desired = f.input(n, 4).expect("desired");
            let size = size_of(f.dt(expected))?;
            let exp_v = ctx.vreg_of(expected);
            let des_v = ctx.vreg_of(desired);
            let rax = ctx.fresh(GPR);
            let rax_mask = RegMask::single(GPR, regs::RAX);
            let mut cas = Tile::new(X64Op::LockCmpxchg { size, addr }).from_node(n);
            cas.ins = tile_ins;
            cas.ins.push(crate::tile::Operand::new(rax, rax_mask));
            cas.ins.push(crate::tile::Operand::new(des_v, mask));
            cas.outs.push(crate::tile::Operand::new(rax, rax_mask));
            let mut tiles = vec![
                Tile::new(X64Op::Copy).read(exp_v, mask).write(rax, rax_mask),
                cas,
            ];
            if let (Some(proj), true) = (value_proj, value_read) {
                let dst = ctx.vreg_of(proj);
                tiles.push(Tile::new(X64Op::Copy).read(rax, rax_mask).write(dst, mask));
            }
            ctx.emit_all(tiles);
            Ok(())
        }
        other => Err(unsupported(other, "atomic shape")),
    }
}

/// A MEMBER or ARRAY whose address escapes into a register becomes a LEA.
fn select_address_value(ctx: &mut Sel<'_, X64>, n: NodeId) -> Result<()> {
    let f = ctx.f;
    if !ctx.has_vreg(n) && f.users(n).is_empty() {
        return Ok(());
    }
    let dst = ctx.vreg_of(n);
    let mask = ctx.any_mask(n);
    let base_node = f.input(n, 1).expect("address base");
    let (mut addr, mut tile_ins) = fold_addr(ctx, n, base_node)?;

    match f.node(n).payload.clone() {
        Payload::Member(off) => {
            let total = i64::from(addr.disp) + off;
            if let Ok(d) = i32::try_from(total) {
                addr.disp = d;
            } else {
                return Err(unsupported(Op::Member, "displacement beyond 32 bits"));
            }
        }
        Payload::Array(stride) => {
            let idx = f.input(n, 2).expect("array index");
            // RIP-relative bases cannot carry an index register; pull the
            // symbol address into a register first.
            if let AddrBase::Sym(sym) = addr.base {
                let tmp = ctx.fresh(GPR);
                let gmask = ctx.class_mask(GPR);
                ctx.emit(
                    Tile::new(X64Op::Lea {
                        addr: Addr {
                            base: AddrBase::Sym(sym),
                            index: None,
                            scale: 1,
                            disp: 0,
                        },
                    })
                    .write(tmp, gmask),
                );
                tile_ins.push(crate::tile::Operand::new(tmp, gmask));
                addr.base = AddrBase::Reg((tile_ins.len() - 1) as u8);
            }
            if addr.index.is_none() && [1, 2, 4, 8].contains(&stride) {
                let v = ctx.vreg_of(idx);
                tile_ins.push(crate::tile::Operand::new(v, ctx.class_mask(GPR)));
                addr.index = Some((tile_ins.len() - 1) as u8);
                addr.scale = stride as u8;
            } else {
                // Odd stride: scale the index separately, then add it in.
                let idx_v = ctx.vreg_of(idx);
                let scaled = ctx.fresh(GPR);
                let gmask = ctx.class_mask(GPR);
                let imm = i32::try_from(stride)
                    .map_err(|_| unsupported(Op::Array, "stride beyond 32 bits"))?;
                ctx.emit_all(vec![Tile::new(X64Op::MulImm { size: 8, imm })
                    .read(idx_v, gmask)
                    .write(scaled, gmask)]);
                tile_ins.push(crate::tile::Operand::new(scaled, gmask));
                addr.index = Some((tile_ins.len() - 1) as u8);
                addr.scale = 1;
            }
        }
        _ => {}
    }

    let mut tile = Tile::new(X64Op::Lea { addr }).from_node(n);
    tile.ins.append(&mut tile_ins);
    tile.outs.push(crate::tile::Operand::new(dst, mask));
    ctx.emit(tile);
    Ok(())
}

/// Folds address arithmetic reachable from `addr_node` into one operand.
/// Returns the shaped address and the register operands it references.
fn fold_addr(
    ctx: &mut Sel<'_, X64>,
    consumer: NodeId,
    addr_node: NodeId,
) -> Result<(Addr, Vec<crate::tile::Operand>)> {
    let f = ctx.f;
    let mut ins: Vec<crate::tile::Operand> = Vec::new();
    let mut disp: i64 = 0;
    let mut index: Option<(NodeId, u8)> = None; // node, scale
    let mut base = addr_node;
    let mut consumed: Vec<NodeId> = Vec::new();
    // Each folded link must feed only the link above it (or the consumer
    // itself); shared subtrees keep their own LEA.
    let mut prev = consumer;

    loop {
        match f.op(base) {
            Op::Member if ctx.only_user(base) == Some(prev) => {
                let Payload::Member(off) = f.node(base).payload else {
                    break;
                };
                disp += off;
                consumed.push(base);
                prev = base;
                let Some(b) = f.input(base, 1) else { break };
                base = b;
            }
            Op::Array if index.is_none() && ctx.only_user(base) == Some(prev) => {
                let Payload::Array(stride) = f.node(base).payload else {
                    break;
                };
                if ![1, 2, 4, 8].contains(&stride) {
                    break;
                }
                let idx = f.input(base, 2).expect("array index");
                index = Some((idx, stride as u8));
                consumed.push(base);
                prev = base;
                let Some(b) = f.input(base, 1) else { break };
                base = b;
            }
            _ => break,
        }
    }
    if i32::try_from(disp).is_err() {
        // Too far to fold; take the whole expression in a register.
        let v = ctx.vreg_of(addr_node);
        ins.push(crate::tile::Operand::new(v, ctx.class_mask(GPR)));
        return Ok((Addr::reg(0), ins));
    }
    for c in &consumed {
        ctx.mark_consumed(*c);
    }

    let addr_base = match f.op(base) {
        Op::Local if !f.node(base).local_info().is_some_and(|i| i.tls) => AddrBase::Frame(base),
        Op::Symbol if index.is_none() => {
            // RIP-relative addressing cannot carry an index register.
            let Payload::Symbol(sym) = f.node(base).payload else {
                panic!("symbol node without payload");
            };
            AddrBase::Sym(sym)
        }
        _ => {
            let v = ctx.vreg_of(base);
            ins.push(crate::tile::Operand::new(v, ctx.class_mask(GPR)));
            AddrBase::Reg(0)
        }
    };
    let index_slot = index.map(|(idx, scale)| {
        let v = ctx.vreg_of(idx);
        ins.push(crate::tile::Operand::new(v, ctx.class_mask(GPR)));
        ((ins.len() - 1) as u8, scale)
    });

    Ok((
        Addr {
            base: addr_base,
            index: index_slot.map(|(i, _)| i),
            scale: index_slot.map(|(_, s)| s).unwrap_or(1),
            disp: disp as i32,
        },
        ins,
    ))
}
