//! End-to-end rewrite-engine behavior over built IR.

use rstest::rstest;
use test_case::test_case;

use riptide_ir::{DataType, Function, FunctionBuilder, Op, Payload, Prototype, SymbolId};
use riptide_opt::{optimize, Cfg, GvnTable, OptLevel};

fn proto(params: usize, returns: usize) -> Prototype {
    Prototype {
        params: vec![DataType::I32; params],
        returns: vec![DataType::I32; returns],
        ..Prototype::default()
    }
}

fn builder(params: usize, returns: usize) -> FunctionBuilder {
    FunctionBuilder::new("t", SymbolId(0), proto(params, returns))
}

fn ret_value(f: &Function) -> riptide_ir::NodeId {
    let ret = f.returns[0];
    f.input(ret, 2).expect("return value")
}

fn assert_ret_const(f: &Function, want: i64) {
    let v = ret_value(f);
    assert_eq!(f.op(v), Op::IntConst, "return feeds {:?}", f.op(v));
    assert_eq!(f.node(v).int_value(), Some(want));
}

/// Scenario: `return (cond ? 2 : 2) + 3`. The phi identity-folds, the
/// region diamond collapses, and the add constant-folds to 5.
#[test]
fn constant_folds_across_a_diamond() {
    let mut b = builder(1, 1);
    let (t, e) = b.cond_branch(b.param(0)).unwrap();
    let merge = b.region();

    b.set_control(Some(t));
    let two_a = b.sint(32, 2).unwrap();
    b.goto(merge).unwrap();

    b.set_control(Some(e));
    let two_b = b.sint(32, 2).unwrap();
    b.goto(merge).unwrap();

    b.enter_region(merge);
    let phi = b.phi(merge, &[two_a, two_b]).unwrap();
    let three = b.sint(32, 3).unwrap();
    let sum = b.binop(Op::Add, phi, three).unwrap();
    b.ret(&[sum]).unwrap();

    let mut f = b.finish();
    optimize(&mut f, OptLevel::Normal).unwrap();

    assert_ret_const(&f, 5);
    assert!(f.is_dead(phi), "phi must fold away");
    assert!(f.is_dead(merge), "region must collapse");
    let cfg = Cfg::build(&f);
    assert_eq!(cfg.blocks.len(), 1, "control flow is straight-line now");
    f.verify_edges().unwrap();
}

/// Scenario: `return x * 2^k` strength-reduces to a shift and stays there.
#[rstest]
#[case(8, 3)]
#[case(2, 1)]
#[case(1024, 10)]
fn multiply_by_power_of_two_becomes_shift(#[case] factor: i64, #[case] amount: i64) {
    let mut b = builder(1, 1);
    let c = b.sint(32, factor).unwrap();
    let prod = b.binop(Op::Mul, b.param(0), c).unwrap();
    b.ret(&[prod]).unwrap();

    let mut f = b.finish();
    optimize(&mut f, OptLevel::Normal).unwrap();

    let v = ret_value(&f);
    assert_eq!(f.op(v), Op::Shl);
    let k = f.input(v, 2).unwrap();
    assert_eq!(f.node(k).int_value(), Some(amount));

    // Identity must not re-expand it: a second run changes nothing.
    let stats = optimize(&mut f, OptLevel::Normal).unwrap();
    assert_eq!(stats.rewrites(), 0, "stable function was rewritten");
}

#[test]
fn add_zero_is_identity() {
    let mut b = builder(1, 1);
    let zero = b.sint(32, 0).unwrap();
    let sum = b.binop(Op::Add, b.param(0), zero).unwrap();
    b.ret(&[sum]).unwrap();

    let mut f = b.finish();
    optimize(&mut f, OptLevel::Normal).unwrap();
    assert_eq!(ret_value(&f), b_param(&f), "x + 0 must collapse to x");
}

/// The first parameter's projection, found by shape.
fn b_param(f: &Function) -> riptide_ir::NodeId {
    f.users(f.start)
        .iter()
        .map(|u| u.node)
        .find(|&n| f.node(n).proj_index() == Some(2))
        .expect("param projection")
}

#[test]
fn congruent_subtrees_merge() {
    let mut b = builder(2, 1);
    let a1 = b.binop(Op::Add, b.param(0), b.param(1)).unwrap();
    let a2 = b.binop(Op::Add, b.param(0), b.param(1)).unwrap();
    let prod = b.binop(Op::Mul, a1, a2).unwrap();
    b.ret(&[prod]).unwrap();

    let mut f = b.finish();
    optimize(&mut f, OptLevel::Normal).unwrap();

    let v = ret_value(&f);
    assert_eq!(f.op(v), Op::Mul);
    assert_eq!(f.input(v, 1), f.input(v, 2), "the adds share one class");
    assert!(f.is_dead(a1) != f.is_dead(a2), "exactly one add survives");
}

/// After a full run, the graph is canonical: re-interning every live node
/// into a fresh table finds no duplicates.
#[test]
fn fixed_point_graph_is_gvn_canonical() {
    let mut b = builder(2, 1);
    let a1 = b.binop(Op::Add, b.param(0), b.param(1)).unwrap();
    let a2 = b.binop(Op::Add, b.param(0), b.param(1)).unwrap();
    let x = b.binop(Op::Xor, a1, a2).unwrap();
    b.ret(&[x]).unwrap();

    let mut f = b.finish();
    optimize(&mut f, OptLevel::Normal).unwrap();

    let mut table = GvnTable::new();
    for n in f.live_ids().collect::<Vec<_>>() {
        assert_eq!(table.intern(&f, n), n, "{n} has a duplicate left");
    }
}

#[test]
fn negated_compare_folds() {
    // (x < y) == 0 becomes y <= x.
    let mut b = builder(2, 1);
    let lt = b.cmp(Op::CmpSlt, b.param(0), b.param(1)).unwrap();
    let zero = b.bool_const(false);
    let eq = b.cmp(Op::CmpEq, lt, zero).unwrap();
    let wide = b.zero_ext(eq, DataType::I32).unwrap();
    b.ret(&[wide]).unwrap();

    let mut f = b.finish();
    optimize(&mut f, OptLevel::Normal).unwrap();

    let v = ret_value(&f);
    assert_eq!(f.op(v), Op::ZeroExt);
    let inner = f.input(v, 1).unwrap();
    assert_eq!(f.op(inner), Op::CmpSle, "negation flips the comparison");
}

/// Scenario: a store into a LOCAL nothing reads disappears along with the
/// LOCAL itself.
#[test]
fn dead_store_and_local_are_eliminated() {
    let mut b = builder(0, 1);
    let slot = b.local(4, 4, Some("dead"));
    let v = b.sint(32, 42).unwrap();
    b.store(slot, v, 4).unwrap();
    let zero = b.sint(32, 0).unwrap();
    b.ret(&[zero]).unwrap();

    let mut f = b.finish();
    optimize(&mut f, OptLevel::Normal).unwrap();

    assert!(f.is_dead(slot), "unread local must die");
    assert!(
        f.live_ids().all(|n| f.op(n) != Op::Store),
        "dead store survived"
    );
    // The return's memory edge goes straight back to START's memory.
    let ret = f.returns[0];
    let mem = f.input(ret, 1).unwrap();
    assert_eq!(f.node(mem).proj_index(), Some(1));
}

#[test]
fn constant_branch_collapses_to_the_taken_side() {
    let mut b = builder(0, 1);
    let cond = b.bool_const(true);
    let (t, e) = b.cond_branch(cond).unwrap();
    let merge = b.region();

    b.set_control(Some(t));
    let seven = b.sint(32, 7).unwrap();
    b.goto(merge).unwrap();

    b.set_control(Some(e));
    let nine = b.sint(32, 9).unwrap();
    b.goto(merge).unwrap();

    b.enter_region(merge);
    let phi = b.phi(merge, &[seven, nine]).unwrap();
    b.ret(&[phi]).unwrap();

    let mut f = b.finish();
    optimize(&mut f, OptLevel::Normal).unwrap();

    assert_ret_const(&f, 7);
    let cfg = Cfg::build(&f);
    assert_eq!(cfg.blocks.len(), 1);
    assert!(
        f.live_ids().all(|n| f.op(n) != Op::Branch),
        "decided branch survived"
    );
}

#[test]
fn select_of_one_and_zero_is_zero_extension() {
    let mut b = builder(2, 1);
    let c = b.cmp(Op::CmpSlt, b.param(0), b.param(1)).unwrap();
    let one = b.sint(32, 1).unwrap();
    let zero = b.sint(32, 0).unwrap();
    let sel = b.select(c, one, zero).unwrap();
    b.ret(&[sel]).unwrap();

    let mut f = b.finish();
    optimize(&mut f, OptLevel::Normal).unwrap();

    let v = ret_value(&f);
    assert_eq!(f.op(v), Op::ZeroExt);
}

#[test]
fn division_by_constant_zero_is_poison_not_a_crash() {
    let mut b = builder(1, 1);
    let zero = b.sint(32, 0).unwrap();
    let q = b.binop(Op::Udiv, b.param(0), zero).unwrap();
    b.ret(&[q]).unwrap();

    let mut f = b.finish();
    optimize(&mut f, OptLevel::Normal).unwrap();
    assert_eq!(f.op(ret_value(&f)), Op::Poison);
}

#[test_case(32 ; "exactly the width")]
#[test_case(40 ; "beyond the width")]
#[test_case(63 ; "maximum count")]
fn oversized_shift_is_poison(count: i64) {
    let mut b = builder(1, 1);
    let k = b.sint(32, count).unwrap();
    let s = b.binop(Op::Shl, b.param(0), k).unwrap();
    b.ret(&[s]).unwrap();

    let mut f = b.finish();
    optimize(&mut f, OptLevel::Normal).unwrap();
    assert_eq!(f.op(ret_value(&f)), Op::Poison);
}

#[test]
fn rotate_pattern_is_recognized() {
    // (x << 5) | (x >> 27) over i32 is a rotate-left by 5.
    let mut b = builder(1, 1);
    let five = b.sint(32, 5).unwrap();
    let twenty_seven = b.sint(32, 27).unwrap();
    let hi = b.binop(Op::Shl, b.param(0), five).unwrap();
    let lo = b.binop(Op::Shr, b.param(0), twenty_seven).unwrap();
    let or = b.binop(Op::Or, hi, lo).unwrap();
    b.ret(&[or]).unwrap();

    let mut f = b.finish();
    optimize(&mut f, OptLevel::Normal).unwrap();
    assert_eq!(f.op(ret_value(&f)), Op::Rol);
}

#[test]
fn unsigned_division_by_three_uses_the_reciprocal() {
    let mut b = builder(1, 1);
    let three = b.sint(32, 3).unwrap();
    let q = b.binop(Op::Udiv, b.param(0), three).unwrap();
    b.ret(&[q]).unwrap();

    let mut f = b.finish();
    optimize(&mut f, OptLevel::Normal).unwrap();

    let v = ret_value(&f);
    assert_eq!(f.op(v), Op::Truncate, "division must be gone");
    assert!(
        f.live_ids().all(|n| f.op(n) != Op::Udiv),
        "udiv tile would still be emitted"
    );
}

#[test]
fn umod_by_power_of_two_is_a_mask() {
    let mut b = builder(1, 1);
    let sixteen = b.sint(32, 16).unwrap();
    let m = b.binop(Op::Umod, b.param(0), sixteen).unwrap();
    b.ret(&[m]).unwrap();

    let mut f = b.finish();
    optimize(&mut f, OptLevel::Normal).unwrap();

    let v = ret_value(&f);
    assert_eq!(f.op(v), Op::And);
    let mask = f.input(v, 2).unwrap();
    assert_eq!(f.node(mask).int_value(), Some(15));
}

/// Scenario: the accumulator phi of a counted loop survives every rewrite
/// and the widening counter keeps the lattice finite.
#[test]
fn loop_phi_survives_and_widening_terminates() {
    let mut b = builder(1, 1);
    let zero = b.sint(32, 0).unwrap();
    let one = b.sint(32, 1).unwrap();

    let header = b.region();
    b.goto(header).unwrap();
    b.enter_region(header);
    let i = b.phi(header, &[zero]).unwrap();
    let cond = b.cmp(Op::CmpSlt, i, b.param(0)).unwrap();
    let (body_edge, exit_edge) = b.cond_branch(cond).unwrap();

    let body = b.region();
    b.add_pred(body, body_edge);
    b.enter_region(body);
    let next = b.binop(Op::Add, i, one).unwrap();
    b.goto(header).unwrap();

    let exit = b.region();
    b.add_pred(exit, exit_edge);
    b.enter_region(exit);
    b.ret(&[i]).unwrap();

    let mut f = b.finish();
    f.add_input(i, Some(next));

    optimize(&mut f, OptLevel::Normal).unwrap();

    assert!(!f.is_dead(i), "loop phi folded incorrectly");
    assert!(!f.is_dead(next), "loop increment folded incorrectly");
    // The widened value is the full type range, not an endless refinement.
    let v = f.peek_value(i).unwrap();
    let full = f.universe.from_dt(DataType::I32);
    assert_eq!(v, full);
    f.verify_edges().unwrap();
}

#[test]
fn member_chains_flatten() {
    let mut b = FunctionBuilder::new(
        "t",
        SymbolId(0),
        Prototype {
            params: vec![DataType::Ptr],
            returns: vec![DataType::I32],
            ..Prototype::default()
        },
    );
    let p = b.param(0);
    let a = b.member(p, 8).unwrap();
    let c = b.member(a, 16).unwrap();
    let l = b.load(DataType::I32, c, 4).unwrap();
    b.ret(&[l]).unwrap();

    let mut f = b.finish();
    optimize(&mut f, OptLevel::Normal).unwrap();

    let v = ret_value(&f);
    assert_eq!(f.op(v), Op::Load);
    let addr = f.input(v, 2).unwrap();
    assert_eq!(f.op(addr), Op::Member);
    assert_eq!(f.node(addr).payload, Payload::Member(24));
    assert_eq!(f.op(f.input(addr, 1).unwrap()), Op::Proj, "base is the param");
}

#[test]
fn store_to_load_forwarding() {
    let mut b = builder(1, 1);
    let slot = b.local(4, 4, None);
    b.store(slot, b.param(0), 4).unwrap();
    let back = b.load(DataType::I32, slot, 4).unwrap();
    b.ret(&[back]).unwrap();

    let mut f = b.finish();
    optimize(&mut f, OptLevel::Normal).unwrap();
    assert_eq!(ret_value(&f), b_param(&f), "load must forward the store");
}

#[test]
fn none_level_runs_a_single_pass() {
    let mut b = builder(1, 1);
    let zero = b.sint(32, 0).unwrap();
    let s = b.binop(Op::Add, b.param(0), zero).unwrap();
    b.ret(&[s]).unwrap();

    let mut f = b.finish();
    // A single pass still performs local work, but must terminate without
    // chasing the transitive closure.
    optimize(&mut f, OptLevel::None).unwrap();
    f.verify_edges().unwrap();
}
