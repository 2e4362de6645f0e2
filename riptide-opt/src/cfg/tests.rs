use riptide_ir::{DataType, FunctionBuilder, Op, Prototype, SymbolId};

use super::*;

fn proto_i32() -> Prototype {
    Prototype {
        params: vec![DataType::I32],
        returns: vec![DataType::I32],
        ..Prototype::default()
    }
}

#[test]
fn straight_line_is_one_block() {
    let mut b = FunctionBuilder::new("t", SymbolId(0), proto_i32());
    b.ret(&[b.param(0)]).unwrap();
    let f = b.finish();

    let cfg = Cfg::build(&f);
    assert_eq!(cfg.blocks.len(), 1);
    let entry = &cfg.blocks[0];
    assert_eq!(entry.head, f.start);
    assert_eq!(f.op(entry.terminator.unwrap()), Op::Return);
    assert!(entry.succs.is_empty());
}

fn diamond() -> riptide_ir::Function {
    let mut b = FunctionBuilder::new("t", SymbolId(0), proto_i32());
    let (t, e) = b.cond_branch(b.param(0)).unwrap();
    let merge = b.region();

    b.set_control(Some(t));
    let one = b.sint(32, 1).unwrap();
    b.goto(merge).unwrap();

    b.set_control(Some(e));
    let two = b.sint(32, 2).unwrap();
    b.goto(merge).unwrap();

    b.enter_region(merge);
    let phi = b.phi(merge, &[one, two]).unwrap();
    b.ret(&[phi]).unwrap();
    b.finish()
}

#[test]
fn diamond_dominators() {
    let f = diamond();
    let cfg = Cfg::build(&f);
    // entry, two arms, merge — but the arms are the projections' regions;
    // here the arms have no region of their own, so the branch edges feed
    // the merge region directly: entry and merge only.
    assert_eq!(cfg.blocks.len(), 2);
    let merge = BlockId(1);
    assert_eq!(cfg.blocks[merge.index()].preds.len(), 2);
    assert_eq!(cfg.blocks[merge.index()].idom, cfg.entry());
    assert_eq!(cfg.blocks[merge.index()].dom_depth, 1);
    assert!(cfg.dominates(cfg.entry(), merge));
    assert!(!cfg.dominates(merge, cfg.entry()));
}

fn diamond_with_arms() -> riptide_ir::Function {
    let mut b = FunctionBuilder::new("t", SymbolId(0), proto_i32());
    let (t, e) = b.cond_branch(b.param(0)).unwrap();
    let (then_r, else_r, merge) = (b.region(), b.region(), b.region());
    b.add_pred(then_r, t);
    b.add_pred(else_r, e);

    b.enter_region(then_r);
    let one = b.sint(32, 1).unwrap();
    b.goto(merge).unwrap();

    b.enter_region(else_r);
    let two = b.sint(32, 2).unwrap();
    b.goto(merge).unwrap();

    b.enter_region(merge);
    let phi = b.phi(merge, &[one, two]).unwrap();
    b.ret(&[phi]).unwrap();
    b.finish()
}

#[test]
fn diamond_with_arm_blocks() {
    let f = diamond_with_arms();
    let cfg = Cfg::build(&f);
    assert_eq!(cfg.blocks.len(), 4);

    let entry = cfg.entry();
    assert_eq!(cfg.blocks[entry.index()].succs.len(), 2);

    // Both arms are dominated by the entry; the merge's idom is the entry,
    // not either arm.
    let merge = cfg
        .blocks
        .iter()
        .position(|b| b.preds.len() == 2)
        .map(|i| BlockId(i as u32))
        .unwrap();
    assert_eq!(cfg.blocks[merge.index()].idom, entry);
    for &arm in &cfg.blocks[entry.index()].succs {
        assert_eq!(cfg.blocks[arm.index()].idom, entry);
        assert_eq!(cfg.lca(arm, merge), entry);
    }

    // RPO puts the entry first and the merge last.
    assert_eq!(cfg.rpo.first(), Some(&entry));
    assert_eq!(cfg.rpo.last(), Some(&merge));
}

fn loop_graph() -> riptide_ir::Function {
    // for (i = 0; i < n; ++i) {}
    let mut b = FunctionBuilder::new("t", SymbolId(0), proto_i32());
    let zero = b.sint(32, 0).unwrap();
    let one = b.sint(32, 1).unwrap();

    let header = b.region();
    b.goto(header).unwrap();
    b.enter_region(header);
    // Placeholder phi arm for the backedge, patched below.
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
    // Patch the backedge arm of the phi now that it exists.
    f.add_input(i, Some(next));
    f
}

#[test]
fn natural_loop_is_detected() {
    let f = loop_graph();
    let cfg = Cfg::build(&f);

    let header = cfg
        .blocks
        .iter()
        .position(|b| b.loop_header.is_some() && b.affine)
        .map(|i| BlockId(i as u32))
        .expect("affine loop header");
    let hb = &cfg.blocks[header.index()];
    assert_eq!(hb.loop_header, Some(header), "header is its own loop");
    assert_eq!(hb.loop_depth, 1);
    assert_eq!(hb.preds.len(), 2);

    // The body block is in the loop; the exit block is not.
    let body = cfg
        .blocks
        .iter()
        .enumerate()
        .find(|(i, b)| BlockId(*i as u32) != header && b.loop_depth == 1)
        .map(|(i, _)| BlockId(i as u32))
        .expect("loop body block");
    assert!(cfg.dominates(header, body));
}
