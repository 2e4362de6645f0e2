//! Structural idealizations.
//!
//! Each function here either returns `None` (nothing to do), `Some(n)` (the
//! node was improved in place, e.g. operands swapped or a dead region arm
//! dropped), or `Some(k)` with `k != n` (the driver subsumes `n` with `k`).
//! New interior nodes are created raw; the driver queues and value-numbers
//! them afterwards.

use riptide_ir::{DataType, Function, NodeId, Op, Payload, Universe};

use crate::peephole::Engine;

pub(crate) fn idealize(f: &mut Function, eng: &mut Engine, n: NodeId) -> Option<NodeId> {
    match f.op(n) {
        op if op.is_int_binop() => ideal_int_binop(f, eng, n, op),
        op if op.is_cmp() => ideal_cmp(f, n, op),
        Op::Select => ideal_select(f, n),
        Op::Member => ideal_member(f, n),
        Op::Array => ideal_array(f, n),
        Op::Proj => ideal_proj(f, n),
        Op::Region => ideal_region(f, eng, n),
        Op::Load => ideal_load(f, n),
        Op::Store => ideal_store(f, n),
        Op::SignExt | Op::ZeroExt => None,
        _ => None,
    }
}

/// The integer constant a node evaluates to, reading the payload directly.
fn as_const(f: &Function, n: NodeId) -> Option<i64> {
    f.node(n).int_value()
}

fn make_const(f: &mut Function, v: i64, dt: DataType) -> NodeId {
    f.new_node(Op::IntConst, dt, 1, Payload::Int(dt.normalize(v)))
}

fn make_poison(f: &mut Function, dt: DataType) -> NodeId {
    f.new_node(Op::Poison, dt, 1, Payload::None)
}

/// Constant-folds `a op b` in the semantics of `dt`. Division by zero and
/// oversized shifts return `None` (the callers produce POISON instead).
fn fold_binop(op: Op, a: i64, b: i64, dt: DataType) -> Option<i64> {
    let bits = dt.bits();
    let mask = dt.mask();
    let ua = (a as u64) & mask;
    let ub = (b as u64) & mask;
    let wrap = |v: i64| dt.normalize(v);
    Some(match op {
        Op::Add => wrap(a.wrapping_add(b)),
        Op::Sub => wrap(a.wrapping_sub(b)),
        Op::Mul => wrap(a.wrapping_mul(b)),
        Op::And => wrap(a & b),
        Op::Or => wrap(a | b),
        Op::Xor => wrap(a ^ b),
        Op::Shl if (ub as u32) < bits => wrap(a.wrapping_shl(ub as u32)),
        Op::Shr if (ub as u32) < bits => wrap((ua >> ub) as i64),
        Op::Sar if (ub as u32) < bits => wrap(a >> ub),
        Op::Udiv if ub != 0 => wrap((ua / ub) as i64),
        Op::Umod if ub != 0 => wrap((ua % ub) as i64),
        Op::Sdiv if b != 0 => wrap(a.wrapping_div(b)),
        Op::Smod if b != 0 => wrap(a.wrapping_rem(b)),
        _ => return None,
    })
}

fn ideal_int_binop(f: &mut Function, eng: &mut Engine, n: NodeId, op: Op) -> Option<NodeId> {
    let dt = f.dt(n);
    let bits = dt.bits();
    let lhs = f.input(n, 1)?;
    let rhs = f.input(n, 2)?;

    // Canonical operand order: constants ride on the right.
    if op.is_commutative() && as_const(f, lhs).is_some() && as_const(f, rhs).is_none() {
        eng.set_input(f, n, 1, Some(rhs));
        eng.set_input(f, n, 2, Some(lhs));
        return Some(n);
    }

    let rc = as_const(f, rhs);

    // (x op c1) op c2 => x op (c1 op c2) for the associative ops.
    if let Some(c2) = rc {
        if op.is_associative() && f.op(lhs) == op {
            let inner_rhs = f.input(lhs, 2)?;
            if let Some(c1) = as_const(f, inner_rhs) {
                let folded = fold_binop(op, c1, c2, dt)?;
                let x = f.input(lhs, 1)?;
                let c = make_const(f, folded, dt);
                return Some(f.node_with_inputs(
                    op,
                    dt,
                    &[None, Some(x), Some(c)],
                    Payload::None,
                ));
            }
        }
    }

    match op {
        // x - x => 0; x - c => x + (-c), so later passes only see ADD.
        Op::Sub => {
            if lhs == rhs {
                return Some(make_const(f, 0, dt));
            }
            if let Some(c) = rc {
                if c != dt.signed_min() {
                    let neg = make_const(f, c.wrapping_neg(), dt);
                    return Some(f.node_with_inputs(
                        Op::Add,
                        dt,
                        &[None, Some(lhs), Some(neg)],
                        Payload::None,
                    ));
                }
            }
            None
        }

        // x ^ x => 0; x ^ ~0 => ~x.
        Op::Xor => {
            if lhs == rhs {
                return Some(make_const(f, 0, dt));
            }
            if rc == Some(-1) {
                return Some(f.node_with_inputs(
                    Op::Not,
                    dt,
                    &[None, Some(lhs)],
                    Payload::None,
                ));
            }
            sink_extension(f, n, op)
        }

        // Multiplication by a power of two is a shift.
        Op::Mul => {
            let c = rc?;
            let uc = (c as u64) & dt.mask();
            if uc.is_power_of_two() {
                let k = make_const(f, uc.trailing_zeros() as i64, dt);
                return Some(f.node_with_inputs(
                    Op::Shl,
                    dt,
                    &[None, Some(lhs), Some(k)],
                    Payload::None,
                ));
            }
            None
        }

        // Unsigned division: power of two becomes a shift, other constants
        // become a multiply by the reciprocal when the product provably
        // fits 64 bits.
        Op::Udiv => {
            let c = rc?;
            let d = (c as u64) & dt.mask();
            if d == 0 {
                return Some(make_poison(f, dt));
            }
            if d.is_power_of_two() {
                let k = make_const(f, d.trailing_zeros() as i64, dt);
                return Some(f.node_with_inputs(
                    Op::Shr,
                    dt,
                    &[None, Some(lhs), Some(k)],
                    Payload::None,
                ));
            }
            magic_udiv(f, lhs, d, dt)
        }

        // Unsigned remainder by a power of two is a mask.
        Op::Umod => {
            let c = rc?;
            let d = (c as u64) & dt.mask();
            if d == 0 {
                return Some(make_poison(f, dt));
            }
            if d.is_power_of_two() {
                let m = make_const(f, (d - 1) as i64, dt);
                return Some(f.node_with_inputs(
                    Op::And,
                    dt,
                    &[None, Some(lhs), Some(m)],
                    Payload::None,
                ));
            }
            None
        }

        Op::Sdiv | Op::Smod => {
            if rc == Some(0) {
                return Some(make_poison(f, dt));
            }
            None
        }

        // Oversized shift counts are undefined; collapsing shifts may also
        // discover one.
        Op::Shl | Op::Shr | Op::Sar => {
            let c = rc?;
            let k = (c as u64) & dt.mask();
            if k >= u64::from(bits) {
                return Some(make_poison(f, dt));
            }
            if op == Op::Shl && f.op(lhs) == Op::Shl {
                if let Some(c1) = as_const(f, f.input(lhs, 2)?) {
                    let total = (c1 as u64 & dt.mask()) + k;
                    if total >= u64::from(bits) {
                        return Some(make_poison(f, dt));
                    }
                    let kk = make_const(f, total as i64, dt);
                    let x = f.input(lhs, 1)?;
                    return Some(f.node_with_inputs(
                        Op::Shl,
                        dt,
                        &[None, Some(x), Some(kk)],
                        Payload::None,
                    ));
                }
            }
            None
        }

        // or(shl(a, k), shr(a, bits-k)) is a rotate.
        Op::Or => {
            if let Some(rot) = match_rotate(f, lhs, rhs, bits).or_else(|| match_rotate(f, rhs, lhs, bits)) {
                let (a, k) = rot;
                let kc = make_const(f, k as i64, dt);
                return Some(f.node_with_inputs(
                    Op::Rol,
                    dt,
                    &[None, Some(a), Some(kc)],
                    Payload::None,
                ));
            }
            sink_extension(f, n, op)
        }

        Op::And => sink_extension(f, n, op),

        _ => None,
    }
}

/// `(shl a k, shr a (bits-k))` with constant counts; returns `(a, k)`.
fn match_rotate(f: &Function, shl: NodeId, shr: NodeId, bits: u32) -> Option<(NodeId, u32)> {
    if f.op(shl) != Op::Shl || f.op(shr) != Op::Shr {
        return None;
    }
    let a = f.input(shl, 1)?;
    if f.input(shr, 1)? != a {
        return None;
    }
    let k = as_const(f, f.input(shl, 2)?)? as u64;
    let j = as_const(f, f.input(shr, 2)?)? as u64;
    if k > 0 && k < u64::from(bits) && k + j == u64::from(bits) {
        return Some((a, k as u32));
    }
    None
}

/// `binop(ext(x), ext(y))` with matching extensions narrows to
/// `ext(binop(x, y))` for the bitwise ops (both extensions distribute).
fn sink_extension(f: &mut Function, n: NodeId, op: Op) -> Option<NodeId> {
    if !matches!(op, Op::And | Op::Or | Op::Xor) {
        return None;
    }
    let lhs = f.input(n, 1)?;
    let rhs = f.input(n, 2)?;
    let ext = f.op(lhs);
    if !matches!(ext, Op::SignExt | Op::ZeroExt) || f.op(rhs) != ext {
        return None;
    }
    let x = f.input(lhs, 1)?;
    let y = f.input(rhs, 1)?;
    let src = f.dt(x);
    if f.dt(y) != src {
        return None;
    }
    let dt = f.dt(n);
    let inner = f.node_with_inputs(op, src, &[None, Some(x), Some(y)], Payload::None);
    Some(f.node_with_inputs(ext, dt, &[None, Some(inner)], Payload::None))
}

fn ideal_cmp(f: &mut Function, n: NodeId, op: Op) -> Option<NodeId> {
    let lhs = f.input(n, 1)?;
    let rhs = f.input(n, 2)?;

    // Reflexive integer compares are decided by shape alone.
    if lhs == rhs && !matches!(op, Op::CmpFlt | Op::CmpFle) {
        let truth = matches!(op, Op::CmpEq | Op::CmpUle | Op::CmpSle);
        return Some(make_const(f, truth as i64, DataType::BOOL));
    }

    // cmp_eq(c, 0) where c is itself a compare: fold away the booleanness.
    if f.op(lhs).is_cmp() && as_const(f, rhs) == Some(0) {
        let a = f.input(lhs, 1)?;
        let b = f.input(lhs, 2)?;
        let payload = f.node(lhs).payload.clone();
        match op {
            // !(c) — flip the inner comparison.
            Op::CmpEq => {
                let (neg, swap) = match f.op(lhs) {
                    Op::CmpEq => (Op::CmpNe, false),
                    Op::CmpNe => (Op::CmpEq, false),
                    Op::CmpSlt => (Op::CmpSle, true),
                    Op::CmpSle => (Op::CmpSlt, true),
                    Op::CmpUlt => (Op::CmpUle, true),
                    Op::CmpUle => (Op::CmpUlt, true),
                    _ => return None,
                };
                let (x, y) = if swap { (b, a) } else { (a, b) };
                return Some(f.node_with_inputs(
                    neg,
                    DataType::BOOL,
                    &[None, Some(x), Some(y)],
                    payload,
                ));
            }
            // (c != 0) is just c.
            Op::CmpNe => return Some(lhs),
            _ => {}
        }
    }
    None
}

fn ideal_select(f: &mut Function, n: NodeId) -> Option<NodeId> {
    let cond = f.input(n, 1)?;
    let t = f.input(n, 2)?;
    let e = f.input(n, 3)?;
    let dt = f.dt(n);

    // select(b, 1, 0) over a boolean is the zero-extension of b.
    if f.dt(cond) == DataType::BOOL && as_const(f, t) == Some(1) && as_const(f, e) == Some(0) {
        if dt == DataType::BOOL {
            return Some(cond);
        }
        if dt.is_int() {
            return Some(f.node_with_inputs(
                Op::ZeroExt,
                dt,
                &[None, Some(cond)],
                Payload::None,
            ));
        }
    }
    if t == e {
        return Some(t);
    }
    None
}

fn ideal_member(f: &mut Function, n: NodeId) -> Option<NodeId> {
    let Payload::Member(off) = f.node(n).payload else {
        return None;
    };
    let base = f.input(n, 1)?;
    // member(member(b, i), j) => member(b, i + j)
    if f.op(base) == Op::Member {
        let Payload::Member(inner) = f.node(base).payload else {
            return None;
        };
        let b = f.input(base, 1)?;
        return Some(f.node_with_inputs(
            Op::Member,
            DataType::Ptr,
            &[None, Some(b)],
            Payload::Member(inner.wrapping_add(off)),
        ));
    }
    None
}

fn ideal_array(f: &mut Function, n: NodeId) -> Option<NodeId> {
    let Payload::Array(stride) = f.node(n).payload else {
        return None;
    };
    let base = f.input(n, 1)?;
    let index = f.input(n, 2)?;

    // Constant index: the whole access is a fixed offset.
    if let Some(i) = as_const(f, index) {
        return Some(f.node_with_inputs(
            Op::Member,
            DataType::Ptr,
            &[None, Some(base)],
            Payload::Member(i.wrapping_mul(stride)),
        ));
    }
    match f.op(index) {
        // array(b, shl(i, k), s) => array(b, i, s << k)
        Op::Shl => {
            let k = as_const(f, f.input(index, 2)?)?;
            if (0..63).contains(&k) {
                let i = f.input(index, 1)?;
                return Some(f.node_with_inputs(
                    Op::Array,
                    DataType::Ptr,
                    &[None, Some(base), Some(i)],
                    Payload::Array(stride.wrapping_shl(k as u32)),
                ));
            }
            None
        }
        // array(b, mul(i, c), s) => array(b, i, s * c)
        Op::Mul => {
            let c = as_const(f, f.input(index, 2)?)?;
            let i = f.input(index, 1)?;
            Some(f.node_with_inputs(
                Op::Array,
                DataType::Ptr,
                &[None, Some(base), Some(i)],
                Payload::Array(stride.wrapping_mul(c)),
            ))
        }
        // array(b, add(i, c), s) => member(array(b, i, s), c * s)
        Op::Add => {
            let c = as_const(f, f.input(index, 2)?)?;
            let i = f.input(index, 1)?;
            let arr = f.node_with_inputs(
                Op::Array,
                DataType::Ptr,
                &[None, Some(base), Some(i)],
                Payload::Array(stride),
            );
            Some(f.node_with_inputs(
                Op::Member,
                DataType::Ptr,
                &[None, Some(arr)],
                Payload::Member(c.wrapping_mul(stride)),
            ))
        }
        _ => None,
    }
}

/// Branch projections fold once the key value decides the branch: the one
/// live edge bypasses the branch entirely, dead edges are dropped by their
/// regions (see [`ideal_region`]).
fn ideal_proj(f: &mut Function, n: NodeId) -> Option<NodeId> {
    let parent = f.input(n, 0)?;
    if f.op(parent) != Op::Branch {
        return None;
    }
    let my_value = f.peek_value(n)?;
    if my_value != Universe::CTRL {
        return None;
    }
    // Live edge: are all the sibling edges dead?
    let value = f.peek_value(parent)?;
    let riptide_ir::Value::Tuple(elems) = f.universe.get(value).clone() else {
        return None;
    };
    let my_index = f.node(n).proj_index()? as usize;
    let alone = elems
        .iter()
        .enumerate()
        .all(|(i, &e)| i == my_index || e == Universe::XCTRL);
    if alone {
        // The branch no longer branches; step over it.
        return f.input(parent, 0);
    }
    None
}

fn ideal_region(f: &mut Function, eng: &mut Engine, n: NodeId) -> Option<NodeId> {
    // Drop arms whose incoming edge is dead, with the matching PHI arms.
    let pred_count = f.inputs(n).len();
    for k in 0..pred_count {
        let Some(pred) = f.input(n, k) else { continue };
        if f.peek_value(pred) != Some(Universe::XCTRL) {
            continue;
        }
        let phis: Vec<NodeId> = f
            .users(n)
            .iter()
            .filter(|u| u.slot == 0 && f.op(u.node) == Op::Phi)
            .map(|u| u.node)
            .collect();
        for phi in phis {
            eng.remove_input(f, phi, k + 1);
        }
        eng.remove_input(f, n, k);
        return Some(n);
    }

    let preds: Vec<NodeId> = f.inputs(n).iter().flatten().copied().collect();

    // Single predecessor: the join is no join. PHIs collapse to their only
    // value first so the region can dissolve into its predecessor. A
    // branch projection as the predecessor keeps the region alive: it is
    // this region that makes the edge a block of its own.
    let pred_is_branch_edge = |p: NodeId| {
        f.op(p) == Op::Proj
            && f.input(p, 0).is_some_and(|parent| f.op(parent) == Op::Branch)
    };
    if preds.len() == 1 && f.inputs(n).len() == 1 && preds[0] != n && !pred_is_branch_edge(preds[0]) {
        let phis: Vec<NodeId> = f
            .users(n)
            .iter()
            .filter(|u| u.slot == 0 && f.op(u.node) == Op::Phi)
            .map(|u| u.node)
            .collect();
        for phi in phis {
            let v = f.input(phi, 1)?;
            if v == phi {
                // A phi feeding only itself never produced a value.
                let p = make_poison(f, f.dt(phi));
                eng.subsume(f, phi, p);
            } else {
                eng.subsume(f, phi, v);
            }
        }
        return Some(preds[0]);
    }

    // Diamond collapse: every predecessor is a projection of one branch,
    // all of that branch's edges land here, and no PHI needs the join.
    if preds.len() >= 2 {
        let has_phi = f
            .users(n)
            .iter()
            .any(|u| u.slot == 0 && f.op(u.node) == Op::Phi);
        if !has_phi {
            let first_parent = f.input(preds[0], 0)?;
            // All edges must come off one branch, cover all of it, and
            // carry nothing of their own (an effect pinned to an edge
            // would float into the wrong block after the collapse).
            let all_same_branch = f.op(preds[0]) == Op::Proj
                && f.op(first_parent) == Op::Branch
                && preds.iter().all(|&p| {
                    f.op(p) == Op::Proj
                        && f.input(p, 0) == Some(first_parent)
                        && f.users(p).len() == 1
                });
            if all_same_branch && f.users(first_parent).len() == preds.len() {
                return f.input(first_parent, 0);
            }
        }
    }
    None
}

/// Store-to-load forwarding: a load that reads exactly what the store in
/// its memory input just wrote.
fn ideal_load(f: &mut Function, n: NodeId) -> Option<NodeId> {
    let mem = f.input(n, 1)?;
    if f.op(mem) != Op::Store {
        return None;
    }
    let addr = f.input(n, 2)?;
    if f.input(mem, 2) != Some(addr) {
        return None;
    }
    let value = f.input(mem, 3)?;
    if f.dt(value) == f.dt(n) {
        return Some(value);
    }
    None
}

fn ideal_store(f: &mut Function, n: NodeId) -> Option<NodeId> {
    let addr = f.input(n, 2)?;

    // A store to a stack slot nothing ever reads is dead: bypass its
    // memory edge; the LOCAL loses its last user and dies next.
    if f.op(addr) == Op::Local {
        let only_stored = f
            .users(addr)
            .iter()
            .all(|u| f.op(u.node) == Op::Store && u.slot == 2);
        if only_stored {
            return f.input(n, 1);
        }
    }

    // Store over store to the same address, with nobody reading the older
    // memory version in between.
    let prev = f.input(n, 1)?;
    if f.op(prev) == Op::Store
        && f.input(prev, 2) == Some(addr)
        && f.users(prev).len() == 1
        && f.dt(f.input(prev, 3)?) == f.dt(f.input(n, 3)?)
    {
        return Some(f.node_with_inputs(
            Op::Store,
            DataType::Memory,
            &[f.input(n, 0), f.input(prev, 1), Some(addr), f.input(n, 3)],
            f.node(n).payload.clone(),
        ));
    }
    None
}

/// Computes the reciprocal pair `(m, p)` so `n / d == (n * m) >> p` holds
/// for all `bits`-wide unsigned `n`; declines when the product could not
/// be computed in 64 bits.
fn magic_udiv(f: &mut Function, lhs: NodeId, d: u64, dt: DataType) -> Option<NodeId> {
    let bits = dt.bits();
    if bits > 32 || d < 3 {
        return None;
    }
    // Round-up method: m = ceil(2^p / d) divides exactly when the excess
    // e = m*d - 2^p stays under 2^(p-bits). Search the smallest such p
    // whose multiplier also keeps n*m inside 64 bits; divisors that would
    // need the wider fixup sequence keep their division tile.
    let k = 64 - (d - 1).leading_zeros(); // ceil(log2 d)
    let (m, p) = (bits..=(bits + k).min(63)).find_map(|p| {
        let m = ((1u128 << p) + u128::from(d) - 1) / u128::from(d);
        let e = m * u128::from(d) - (1u128 << p);
        (e < (1u128 << (p - bits)) && m < (1u128 << (64 - bits))).then_some((m, p))
    })?;

    let wide = f.node_with_inputs(
        Op::ZeroExt,
        DataType::I64,
        &[None, Some(lhs)],
        Payload::None,
    );
    let mc = make_const(f, m as i64, DataType::I64);
    let mul = f.node_with_inputs(
        Op::Mul,
        DataType::I64,
        &[None, Some(wide), Some(mc)],
        Payload::None,
    );
    let pc = make_const(f, i64::from(p), DataType::I64);
    let shr = f.node_with_inputs(
        Op::Shr,
        DataType::I64,
        &[None, Some(mul), Some(pc)],
        Payload::None,
    );
    Some(f.node_with_inputs(
        Op::Truncate,
        dt,
        &[None, Some(shr)],
        Payload::None,
    ))
}
