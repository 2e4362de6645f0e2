use riptide_ir::{DataType, Function, FunctionBuilder, Op, Prototype, SymbolId};
use riptide_opt::{schedule, Cfg, UnitLatency};
use rstest::rstest;

use super::*;
use crate::isel::select_function;
use crate::liveness;
use crate::x64::X64;

fn lower(f: &Function) -> (crate::isel::Selection<crate::x64::X64Op>, riptide_opt::Schedule) {
    let sched = schedule(f, Cfg::build(f), &UnitLatency);
    let sel = select_function(f, &sched, &X64, None).unwrap();
    (sel, sched)
}

fn run(f: &Function) -> (TileList<crate::x64::X64Op>, AllocResult) {
    let (sel, sched) = lower(f);
    let live = liveness::compute(&sel.list, &sched.cfg);
    let alloc = allocate(&X64, f, &sel.list, &sched.cfg, &live, &sel.classes);
    let list = apply(&X64, f, sel.list, &alloc);
    (list, alloc)
}

/// Every operand's assigned register must satisfy its mask.
fn check_masks(list: &TileList<crate::x64::X64Op>) {
    for tiles in &list.tiles {
        for tile in tiles {
            for op in tile.ins.iter().chain(&tile.outs).chain(&tile.tmps) {
                let r = op.reg();
                assert!(
                    op.mask.contains(r),
                    "{:?} assigned outside its mask {:#x}",
                    r,
                    op.mask.bits
                );
            }
        }
    }
}

fn proto(params: usize) -> Prototype {
    Prototype {
        params: vec![DataType::I32; params],
        returns: vec![DataType::I32],
        ..Prototype::default()
    }
}

#[test]
fn simple_function_allocates_without_spills() {
    let mut b = FunctionBuilder::new("t", SymbolId(0), proto(2));
    let s = b.binop(Op::Add, b.param(0), b.param(1)).unwrap();
    b.ret(&[s]).unwrap();
    let f = b.finish();

    let (list, alloc) = run(&f);
    assert_eq!(alloc.spill_slots, 0);
    check_masks(&list);
}

#[test]
fn fixed_register_constraints_hold() {
    // Division pins RAX/RDX; the shift count pins RCX.
    let mut b = FunctionBuilder::new("t", SymbolId(0), proto(3));
    let q = b.binop(Op::Sdiv, b.param(0), b.param(1)).unwrap();
    let s = b.binop(Op::Shl, q, b.param(2)).unwrap();
    b.ret(&[s]).unwrap();
    let f = b.finish();

    let (list, _) = run(&f);
    check_masks(&list);

    // The divisor feeds an idiv whose implicit operands sit in RAX/RDX.
    let has_div = list
        .tiles
        .iter()
        .flatten()
        .any(|t| matches!(t.op, crate::x64::X64Op::Div { .. }));
    assert!(has_div);
}

#[rstest]
#[case(6)]
#[case(14)]
#[case(24)]
fn register_pressure_forces_spills_that_still_satisfy_masks(#[case] live: i64) {
    // At the larger counts, more simultaneously-live values than
    // allocatable registers.
    let mut b = FunctionBuilder::new("t", SymbolId(0), proto(1));
    let x = b.param(0);
    let values: Vec<_> = (1..=live)
        .map(|i| {
            let c = b.sint(32, i).unwrap();
            b.binop(Op::Mul, x, c).unwrap()
        })
        .collect();
    // Sum them in reverse so every product stays live across the others.
    let mut acc = values[0];
    for &v in values.iter().skip(1) {
        acc = b.binop(Op::Add, acc, v).unwrap();
    }
    b.ret(&[acc]).unwrap();
    let f = b.finish();

    let (list, _alloc) = run(&f);
    check_masks(&list);
}

#[test]
fn values_survive_calls_in_callee_saved_registers_or_slots() {
    use riptide_ir::{Linkage, Module, SymbolKind};
    let module = Module::new();
    let ext = module.declare(
        "ext",
        SymbolKind::Function(Prototype {
            returns: vec![DataType::I32],
            ..Prototype::default()
        }),
        Linkage::External,
    );

    let mut b = FunctionBuilder::new("t", SymbolId(0), proto(1));
    let before = b.binop(Op::Add, b.param(0), b.param(0)).unwrap();
    let target = b.symbol(ext);
    let rets = b
        .call(
            target,
            Prototype {
                returns: vec![DataType::I32],
                ..Prototype::default()
            },
            &[],
        )
        .unwrap();
    let total = b.binop(Op::Add, before, rets[0]).unwrap();
    b.ret(&[total]).unwrap();
    let f = b.finish();

    let (list, alloc) = run(&f);
    check_masks(&list);

    // `before` lives across the call, so it either claimed a callee-saved
    // register or went to the stack; silently sitting in a caller-saved
    // register would be a miscompile.
    assert!(
        alloc.used_callee_saved[0] != 0 || alloc.spill_slots > 0,
        "call-crossing value kept nowhere safe"
    );
}
