use riptide_ir::NodeId;
use test_case::test_case;

use super::super::regs::{GPR, RAX, RCX, RDI, RSI, XMM};
use super::*;
use crate::tile::{Operand, PhysReg, RegMask, VReg};

fn frame() -> FrameLayout {
    FrameLayout::default()
}

fn operand(reg: PhysReg, class: crate::tile::RegClass) -> Operand {
    let mut op = Operand::new(VReg(0), RegMask::single(class, reg));
    op.assigned = Some(reg);
    op
}

fn emit_one(tile: Tile<X64Op>) -> Vec<u8> {
    let fr = frame();
    let mut ctx = EmitCtx::new(&fr, 4, false);
    emit_tile(&X64, &mut ctx, &tile).unwrap();
    let (code, _, _) = ctx.finish();
    code
}

#[test]
fn mov_eax_imm() {
    let mut t = Tile::new(X64Op::MovRI { size: 4, imm: 5 });
    t.outs.push(operand(RAX, GPR));
    assert_eq!(emit_one(t), vec![0xb8, 5, 0, 0, 0]);
}

#[test]
fn mov_r64_big_imm_uses_movabs() {
    let mut t = Tile::new(X64Op::MovRI {
        size: 8,
        imm: 0x1122_3344_5566,
    });
    t.outs.push(operand(RAX, GPR));
    let code = emit_one(t);
    assert_eq!(&code[..2], &[0x48, 0xb8]);
    assert_eq!(code.len(), 10);
}

#[test]
fn reg_reg_copy() {
    let mut t = Tile::new(X64Op::Copy);
    t.ins.push(operand(RAX, GPR));
    t.outs.push(operand(RCX, GPR));
    assert_eq!(emit_one(t), vec![0x48, 0x89, 0xc1]);
}

#[test]
fn coalesced_copy_is_silent() {
    let mut t = Tile::new(X64Op::Copy);
    t.ins.push(operand(RAX, GPR));
    t.outs.push(operand(RAX, GPR));
    assert!(emit_one(t).is_empty());
}

#[test]
fn shl_eax_3() {
    let mut t = Tile::new(X64Op::ShiftImm {
        op: ShiftOp::Shl,
        size: 4,
        imm: 3,
    });
    t.ins.push(operand(RAX, GPR));
    t.outs.push(operand(RAX, GPR));
    assert_eq!(emit_one(t), vec![0xc1, 0xe0, 0x03]);
}

#[test_case(7, &[0x83, 0xc0, 0x07] ; "imm8 short form")]
#[test_case(300, &[0x81, 0xc0, 0x2c, 0x01, 0x00, 0x00] ; "imm32 long form")]
#[test_case(-1, &[0x83, 0xc0, 0xff] ; "negative imm8")]
fn add_immediate_picks_the_width(imm: i32, want: &[u8]) {
    let mut t = Tile::new(X64Op::AluImm {
        op: AluOp::Add,
        size: 4,
        imm,
    });
    t.ins.push(operand(RAX, GPR));
    t.outs.push(operand(RAX, GPR));
    assert_eq!(emit_one(t), want);
}

#[test]
fn scaled_index_load() {
    // mov eax, [rdi + rsi*4 + 4]
    let mut t = Tile::new(X64Op::Load {
        size: 4,
        addr: Addr {
            base: AddrBase::Reg(0),
            index: Some(1),
            scale: 4,
            disp: 4,
        },
    });
    t.ins.push(operand(RDI, GPR));
    t.ins.push(operand(RSI, GPR));
    t.outs.push(operand(RAX, GPR));
    assert_eq!(emit_one(t), vec![0x8b, 0x44, 0xb7, 0x04]);
}

#[test]
fn rsp_relative_spill_roundtrip() {
    let mut fr = frame();
    fr.spills = vec![8];
    let mut ctx = EmitCtx::new(&fr, 0, false);
    let mut store = Tile::new(X64Op::SpillStore { slot: 0 });
    store.ins.push(operand(RAX, GPR));
    emit_tile(&X64, &mut ctx, &store).unwrap();
    let mut load = Tile::new(X64Op::SpillLoad { slot: 0 });
    load.outs.push(operand(RCX, GPR));
    emit_tile(&X64, &mut ctx, &load).unwrap();
    let (code, _, _) = ctx.finish();
    // mov [rsp+8], rax ; mov rcx, [rsp+8]
    assert_eq!(
        code,
        vec![0x48, 0x89, 0x44, 0x24, 0x08, 0x48, 0x8b, 0x4c, 0x24, 0x08]
    );
}

#[test]
fn compare_and_branch_pair() {
    let fr = frame();
    let mut ctx = EmitCtx::new(&fr, 2, false);
    let mut cmp = Tile::new(X64Op::CmpRR { size: 4 });
    cmp.ins.push(operand(RDI, GPR));
    cmp.ins.push(operand(RSI, GPR));
    emit_tile(&X64, &mut ctx, &cmp).unwrap();
    emit_tile(
        &X64,
        &mut ctx,
        &Tile::new(X64Op::Jcc {
            cc: Cc::L,
            target: riptide_opt::BlockId(1),
        }),
    )
    .unwrap();
    ctx.bind_label(riptide_opt::BlockId(1));
    let (code, _, _) = ctx.finish();
    // cmp edi, esi ; jl +0
    assert_eq!(&code[..2], &[0x39, 0xf7]);
    assert_eq!(&code[2..4], &[0x0f, 0x8c]);
    assert_eq!(&code[4..8], &0i32.to_le_bytes());
}

#[test]
fn fallthrough_jump_vanishes() {
    let fr = frame();
    let mut ctx = EmitCtx::new(&fr, 2, false);
    ctx.next_block = Some(riptide_opt::BlockId(1));
    emit_tile(
        &X64,
        &mut ctx,
        &Tile::new(X64Op::Jmp {
            target: riptide_opt::BlockId(1),
        }),
    )
    .unwrap();
    let (code, _, _) = ctx.finish();
    assert!(code.is_empty());
}

#[test]
fn call_records_a_patch() {
    let fr = frame();
    let mut ctx = EmitCtx::new(&fr, 0, false);
    emit_tile(
        &X64,
        &mut ctx,
        &Tile::new(X64Op::CallSym {
            sym: riptide_ir::SymbolId(3),
        }),
    )
    .unwrap();
    let (code, patches, _) = ctx.finish();
    assert_eq!(code[0], 0xe8);
    assert_eq!(patches.len(), 1);
    assert_eq!(patches[0].offset, 1);
    assert_eq!(patches[0].kind, PatchKind::Rel32);
    assert_eq!(patches[0].target, riptide_ir::SymbolId(3));
}

#[test]
fn sse_add_is_prefixed_by_width() {
    let mut t = Tile::new(X64Op::FAlu {
        op: FAluOp::Add,
        size: 8,
    });
    t.ins.push(operand(PhysReg(0), XMM));
    t.ins.push(operand(PhysReg(1), XMM));
    t.outs.push(operand(PhysReg(0), XMM));
    assert_eq!(emit_one(t), vec![0xf2, 0x0f, 0x58, 0xc1]);
}

#[test]
fn frame_addressing_goes_through_rsp() {
    let mut fr = frame();
    fr.locals.insert(NodeId(9), 16);
    let mut ctx = EmitCtx::new(&fr, 0, false);
    let mut t = Tile::new(X64Op::Lea {
        addr: Addr::frame(NodeId(9), 0),
    });
    t.outs.push(operand(RAX, GPR));
    emit_tile(&X64, &mut ctx, &t).unwrap();
    let (code, _, _) = ctx.finish();
    // lea rax, [rsp+16]
    assert_eq!(code, vec![0x48, 0x8d, 0x44, 0x24, 0x10]);
}

#[test]
fn prologue_epilogue_frame_pointer_shape() {
    let mut fr = frame();
    fr.frame_pointer = true;
    fr.sub_amount = 32;
    let mut ctx = EmitCtx::new(&fr, 0, false);
    emit_prologue(&mut ctx, &fr).unwrap();
    let pro_len = ctx.here();
    emit_epilogue(&mut ctx, &fr).unwrap();
    let (code, _, _) = ctx.finish();
    // push rbp ; mov rbp, rsp ; sub rsp, 32
    assert_eq!(&code[..pro_len as usize], &[0x55, 0x48, 0x89, 0xe5, 0x48, 0x83, 0xec, 0x20]);
    // add rsp, 32 ; pop rbp ; ret
    assert_eq!(&code[pro_len as usize..], &[0x48, 0x83, 0xc4, 0x20, 0x5d, 0xc3]);
}
