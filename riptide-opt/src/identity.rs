//! Identity folding: find an existing node that already computes `n`.
//!
//! Unlike idealization nothing is created here; the result is always a
//! node that is already in the graph (possibly `n` itself, meaning no
//! progress).

use riptide_ir::{Function, NodeId, Op, Payload, Value};

pub(crate) fn identity(f: &mut Function, n: NodeId) -> NodeId {
    match f.op(n) {
        Op::Add | Op::Xor | Op::Shl | Op::Shr | Op::Sar | Op::Rol | Op::Ror => {
            rhs_const(f, n, 0).unwrap_or(n)
        }
        Op::Or => {
            if let (Some(a), Some(b)) = (f.input(n, 1), f.input(n, 2)) {
                if a == b {
                    return a;
                }
            }
            match rhs_value(f, n) {
                Some(0) => f.input(n, 1).unwrap_or(n),
                // Saturated: or with all ones is the all-ones constant.
                Some(-1) => f.input(n, 2).unwrap_or(n),
                _ => n,
            }
        }
        Op::Mul => match rhs_value(f, n) {
            Some(1) => f.input(n, 1).unwrap_or(n),
            // Anything times zero is the zero on the right.
            Some(0) => f.input(n, 2).unwrap_or(n),
            _ => n,
        },
        Op::Udiv | Op::Sdiv => rhs_const(f, n, 1).unwrap_or(n),
        Op::And => identity_and(f, n),
        Op::Phi => identity_phi(f, n),
        Op::Member => match f.node(n).payload {
            Payload::Member(0) => f.input(n, 1).unwrap_or(n),
            _ => n,
        },
        Op::Safepoint => match f.input(n, 0) {
            Some(inner) if f.op(inner) == Op::Safepoint => inner,
            _ => n,
        },
        Op::Select => identity_select(f, n),
        Op::Neg | Op::Not => match f.input(n, 1) {
            Some(inner) if f.op(inner) == f.op(n) => f.input(inner, 1).unwrap_or(n),
            _ => n,
        },
        Op::SignExt | Op::ZeroExt | Op::Truncate | Op::Bitcast => {
            match f.input(n, 1) {
                Some(x) if f.dt(x) == f.dt(n) => x,
                _ => n,
            }
        }
        Op::Int2Ptr => unwrap_cast(f, n, Op::Ptr2Int),
        Op::Ptr2Int => unwrap_cast(f, n, Op::Int2Ptr),
        _ => n,
    }
}

/// `x op c => x` when the right operand is the constant `c`.
fn rhs_const(f: &Function, n: NodeId, c: i64) -> Option<NodeId> {
    if rhs_value(f, n) == Some(c) {
        f.input(n, 1)
    } else {
        None
    }
}

fn rhs_value(f: &Function, n: NodeId) -> Option<i64> {
    f.node(f.input(n, 2)?).int_value()
}

fn identity_and(f: &mut Function, n: NodeId) -> NodeId {
    let Some(lhs) = f.input(n, 1) else { return n };
    let Some(rhs) = f.input(n, 2) else { return n };
    let mask = f.dt(n).mask();
    match f.node(rhs).int_value() {
        // All ones (sign-extended) keeps every bit.
        Some(-1) => return lhs,
        Some(0) => return rhs,
        Some(c) => {
            // The mask only clears bits already known zero.
            let lv = f.value_of(lhs);
            if let Value::Int(i) = f.universe.get(lv) {
                if i.zeros & mask & !(c as u64) == mask & !(c as u64) {
                    return lhs;
                }
            }
        }
        None => {}
    }
    if lhs == rhs {
        return lhs;
    }
    n
}

/// `phi(x, x, ..., x)` (possibly with self-references mixed in) is `x`.
fn identity_phi(f: &Function, n: NodeId) -> NodeId {
    let inputs = f.inputs(n);
    let mut seen: Option<NodeId> = None;
    for &input in &inputs[1..] {
        let Some(v) = input else { return n };
        if v == n {
            continue;
        }
        match seen {
            None => seen = Some(v),
            Some(s) if s == v => {}
            Some(_) => return n,
        }
    }
    seen.unwrap_or(n)
}

fn identity_select(f: &mut Function, n: NodeId) -> NodeId {
    let Some(cond) = f.input(n, 1) else { return n };
    let cv = f.value_of(cond);
    match f.universe.singleton(cv) {
        Some(riptide_ir::Singleton::Int(0)) => f.input(n, 3).unwrap_or(n),
        Some(riptide_ir::Singleton::Int(_)) => f.input(n, 2).unwrap_or(n),
        _ => n,
    }
}

fn unwrap_cast(f: &Function, n: NodeId, inverse: Op) -> NodeId {
    match f.input(n, 1) {
        Some(inner) if f.op(inner) == inverse => f.input(inner, 1).unwrap_or(n),
        _ => n,
    }
}
