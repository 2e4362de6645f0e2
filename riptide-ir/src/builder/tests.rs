use rstest::rstest;

use super::*;
use crate::dt::DataType;
use crate::error::BuildError;
use crate::module::{CallConv, Linkage, SymbolKind};
use crate::op::Op;

fn proto(params: &[DataType], returns: &[DataType]) -> Prototype {
    Prototype {
        call_conv: CallConv::C,
        params: params.to_vec(),
        returns: returns.to_vec(),
        varargs: false,
    }
}

fn builder(params: &[DataType], returns: &[DataType]) -> FunctionBuilder {
    FunctionBuilder::new("t", SymbolId(0), proto(params, returns))
}

#[test]
fn straight_line_return() {
    let mut b = builder(&[DataType::I32, DataType::I32], &[DataType::I32]);
    let sum = b.binop(Op::Add, b.param(0), b.param(1)).unwrap();
    b.ret(&[sum]).unwrap();

    let f = b.finish();
    assert_eq!(f.returns.len(), 1);
    f.verify_edges().unwrap();
}

#[test]
fn phi_arity_is_checked() {
    let mut b = builder(&[DataType::I32], &[DataType::I32]);
    let merge = b.region();
    b.goto(merge).unwrap();
    b.enter_region(merge);

    let v = b.param(0);
    let err = b.phi(merge, &[v, v]).unwrap_err();
    assert!(matches!(err, BuildError::PhiArity { want: 1, got: 2, .. }));
}

#[test]
fn terminated_block_rejects_instructions() {
    let mut b = builder(&[], &[]);
    b.ret(&[]).unwrap();
    let addr = b.null_ptr();
    let err = b.load(DataType::I32, addr, 4).unwrap_err();
    assert_eq!(err, BuildError::NoControl { op: Op::Load });
}

#[rstest]
#[case(Op::Add)]
#[case(Op::Mul)]
#[case(Op::Xor)]
fn mixed_width_operands_are_rejected(#[case] op: Op) {
    let mut b = builder(&[DataType::I32, DataType::I64], &[]);
    let err = b.binop(op, b.param(0), b.param(1)).unwrap_err();
    assert!(matches!(err, BuildError::OperandMismatch { .. }));
}

#[test]
fn diamond_with_phi() {
    let mut b = builder(&[DataType::I32], &[DataType::I32]);
    let cond = b.param(0);
    let (then_edge, else_edge) = b.cond_branch(cond).unwrap();

    let merge = b.region();

    b.set_control(Some(then_edge));
    let two = b.sint(32, 2).unwrap();
    b.goto(merge).unwrap();

    b.set_control(Some(else_edge));
    let three = b.sint(32, 3).unwrap();
    b.goto(merge).unwrap();

    b.enter_region(merge);
    let joined = b.phi(merge, &[two, three]).unwrap();
    b.ret(&[joined]).unwrap();

    let f = b.finish();
    f.verify_edges().unwrap();

    // PHI shape: region + one data input per predecessor.
    assert_eq!(f.op(joined), Op::Phi);
    assert_eq!(f.inputs(joined).len(), f.inputs(merge).len() + 1);
}

#[test]
fn store_advances_memory() {
    let mut b = builder(&[], &[]);
    let slot = b.local(4, 4, Some("x"));
    let before = b.get_memory().unwrap();
    let one = b.sint(32, 1).unwrap();
    let st = b.store(slot, one, 4).unwrap();
    assert_eq!(b.get_memory(), Some(st));
    assert_ne!(b.get_memory(), Some(before));
    b.ret(&[]).unwrap();
    b.finish().verify_edges().unwrap();
}

#[test]
fn call_produces_memory_and_value_projections() {
    let m = Module::new();
    let callee = m.declare(
        "callee",
        SymbolKind::Function(proto(&[DataType::I32], &[DataType::I32])),
        Linkage::External,
    );
    let mut b = builder(&[DataType::I32], &[DataType::I32]);
    let target = b.symbol(callee);
    let rets = b
        .call(target, proto(&[DataType::I32], &[DataType::I32]), &[b.param(0)])
        .unwrap();
    assert_eq!(rets.len(), 1);
    assert_eq!(b.func().dt(rets[0]), DataType::I32);
    // Memory moved past the call.
    let mem = b.get_memory().unwrap();
    assert_eq!(b.func().op(mem), Op::Proj);
    b.ret(&[rets[0]]).unwrap();
}

#[test]
fn branch_wires_cases_and_default() {
    let mut b = builder(&[DataType::I32], &[]);
    let (d1, d2, d3) = (b.region(), b.region(), b.region());
    b.branch(b.param(0), d3, &[(1, d1), (2, d2)]).unwrap();

    let f = b.func();
    assert_eq!(f.inputs(d1).len(), 1);
    assert_eq!(f.inputs(d2).len(), 1);
    assert_eq!(f.inputs(d3).len(), 1);
    let proj = f.input(d1, 0).unwrap();
    let branch = f.input(proj, 0).unwrap();
    assert_eq!(f.op(branch), Op::Branch);
    assert_eq!(f.node(branch).payload, Payload::Branch(Box::new([1, 2])));
}

#[test]
fn safepoints_chain_through_control() {
    let mut b = builder(&[], &[]);
    let loc = SourceLoc {
        file: 1,
        line: 10,
        column: 2,
    };
    let sp = b.safepoint(loc).unwrap();
    assert_eq!(b.get_control(), Some(sp));
    let sp2 = b.safepoint(loc).unwrap();
    assert_eq!(b.func().input(sp2, 0), Some(sp));
    b.ret(&[]).unwrap();
}
