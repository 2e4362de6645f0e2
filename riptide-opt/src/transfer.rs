//! Per-opcode lattice transfer functions.
//!
//! Each function computes the abstract value of a node from the recorded
//! values of its inputs. They must be monotone: recomputing with lower
//! inputs yields a lower (or equal) output. Range arithmetic is done in
//! 128 bits and falls back to the type-wide range whenever the result
//! could wrap, which keeps every case trivially sound.

use riptide_ir::{
    DataType, Function, IntRange, NodeId, Op, Payload, Singleton, Universe, Value, ValueId,
};

pub(crate) fn dataflow(f: &mut Function, n: NodeId) -> ValueId {
    match f.op(n) {
        Op::IntConst => {
            let v = f.node(n).int_value().unwrap_or(0);
            match f.dt(n) {
                DataType::Ptr if v == 0 => Universe::NULL,
                DataType::Ptr => Universe::XNULL,
                dt => f.universe.int_const(v, dt),
            }
        }
        Op::FloatConst => match f.node(n).payload {
            Payload::F32(bits) => f.universe.intern(Value::FltCon32(bits)),
            Payload::F64(bits) => f.universe.intern(Value::FltCon64(bits)),
            _ => Universe::BOT,
        },
        Op::Symbol => match f.node(n).payload {
            Payload::Symbol(sym) => f.universe.intern(Value::PtrCon(sym)),
            _ => Universe::BOT,
        },
        Op::Local => Universe::XNULL,
        Op::Poison => Universe::TOP,

        Op::Start => {
            let params: Vec<DataType> = f.proto.params.clone();
            let mut elems = vec![Universe::CTRL, Universe::ALLMEM];
            elems.extend(params.into_iter().map(|dt| f.universe.from_dt(dt)));
            f.universe.intern(Value::Tuple(elems.into_boxed_slice()))
        }
        Op::Proj | Op::MachProj => {
            let Some(parent) = f.input(n, 0) else {
                return Universe::BOT;
            };
            let pv = f.value_of(parent);
            let idx = f.node(n).proj_index().unwrap_or(0) as usize;
            let elem = match f.universe.get(pv) {
                Value::Tuple(elems) => elems.get(idx).copied(),
                _ => None,
            };
            match elem {
                Some(e) => e,
                None => {
                    let dt = f.dt(n);
                    f.universe.from_dt(dt)
                }
            }
        }

        Op::Region => {
            let preds: Vec<NodeId> = f.inputs(n).iter().flatten().copied().collect();
            if preds.is_empty() {
                return Universe::XCTRL;
            }
            let mut acc = Universe::XCTRL;
            for p in preds {
                let pv = f.value_of(p);
                acc = f.universe.meet(acc, pv);
            }
            acc
        }
        Op::Safepoint => match f.input(n, 0) {
            Some(ctrl) => f.value_of(ctrl),
            None => Universe::XCTRL,
        },
        Op::Branch => branch(f, n),
        Op::Phi => phi(f, n),
        Op::Return => Universe::BOT,

        op if op.is_int_binop() => int_binop(f, n, op),
        op if op.is_float_binop() => float_binop(f, n, op),
        op if op.is_cmp() => compare(f, n, op),
        Op::Neg | Op::Not => int_unop(f, n),

        Op::SignExt => unop_value(f, n),
        Op::ZeroExt => zero_ext(f, n),
        Op::Truncate => truncate(f, n),
        Op::Int2Ptr => int2ptr(f, n),
        Op::Ptr2Int => ptr2int(f, n),
        Op::Int2Float => int2float(f, n),
        Op::Float2Int => float2int(f, n),
        Op::Bitcast => bitcast(f, n),

        Op::Select => select(f, n),
        Op::Member | Op::Array => pointer_offset(f, n),
        Op::MergeMem => {
            let inputs: Vec<NodeId> = f.inputs(n).iter().flatten().copied().collect();
            let mut acc = Universe::ANYMEM;
            for i in inputs {
                let v = f.value_of(i);
                acc = f.universe.meet(acc, v);
            }
            acc
        }
        Op::Store | Op::Memcpy | Op::Memset => Universe::ALLMEM,

        // Loads, calls, atomics, machine nodes: nothing beyond the type.
        _ => {
            let dt = f.dt(n);
            f.universe.from_dt(dt)
        }
    }
}

fn int_of(f: &mut Function, n: NodeId) -> Option<IntRange> {
    let v = f.value_of(n);
    f.universe.as_int(v)
}

/// Re-normalizes a computed range+mask combination for `dt` and interns it.
fn norm(f: &mut Function, dt: DataType, min: i64, max: i64, zeros: u64, ones: u64) -> ValueId {
    let mask = dt.mask();
    let (mut zeros, mut ones) = (zeros, ones);
    if dt.bits() < 64 {
        zeros &= mask;
        ones &= mask;
        if min >= 0 {
            zeros |= !mask;
        } else if max < 0 {
            ones |= !mask;
        }
    }
    if zeros & ones != 0 {
        // Contradictory knowledge: this value cannot exist.
        return Universe::TOP;
    }
    if zeros | ones == u64::MAX {
        let c = ones as i64;
        return f.universe.intern(Value::Int(IntRange::constant(c)));
    }
    if min == max {
        return f.universe.intern(Value::Int(IntRange::constant(min)));
    }
    f.universe.intern(Value::Int(IntRange {
        min,
        max,
        zeros,
        ones,
        widen: 0,
    }))
}

/// The range interned when nothing is known.
fn bottom(f: &mut Function, dt: DataType) -> ValueId {
    f.universe.from_dt(dt)
}

/// `(lo, hi)` of the value seen as `dt`-wide unsigned, when the range does
/// not straddle the sign flip.
fn unsigned_range(dt: DataType, r: IntRange) -> (u64, u64) {
    let mask = dt.mask();
    if r.min >= 0 || r.max < 0 {
        ((r.min as u64) & mask, (r.max as u64) & mask)
    } else {
        (0, dt.unsigned_max())
    }
}

fn fits_i128(dt: DataType, lo: i128, hi: i128) -> bool {
    lo >= i128::from(dt.signed_min()) && hi <= i128::from(dt.signed_max())
}

fn int_binop(f: &mut Function, n: NodeId, op: Op) -> ValueId {
    let dt = f.dt(n);
    let (Some(a), Some(b)) = (f.input(n, 1), f.input(n, 2)) else {
        return bottom(f, dt);
    };
    let (Some(a), Some(b)) = (int_of(f, a), int_of(f, b)) else {
        return bottom(f, dt);
    };

    match op {
        Op::Add | Op::Sub => {
            let (lo, hi) = if op == Op::Add {
                (
                    i128::from(a.min) + i128::from(b.min),
                    i128::from(a.max) + i128::from(b.max),
                )
            } else {
                (
                    i128::from(a.min) - i128::from(b.max),
                    i128::from(a.max) - i128::from(b.min),
                )
            };
            if fits_i128(dt, lo, hi) {
                norm(f, dt, lo as i64, hi as i64, 0, 0)
            } else {
                bottom(f, dt)
            }
        }
        Op::Mul => {
            let corners = [
                i128::from(a.min) * i128::from(b.min),
                i128::from(a.min) * i128::from(b.max),
                i128::from(a.max) * i128::from(b.min),
                i128::from(a.max) * i128::from(b.max),
            ];
            let lo = corners.iter().copied().min().unwrap_or(0);
            let hi = corners.iter().copied().max().unwrap_or(0);
            if fits_i128(dt, lo, hi) {
                norm(f, dt, lo as i64, hi as i64, 0, 0)
            } else {
                bottom(f, dt)
            }
        }
        Op::And | Op::Or | Op::Xor => bitwise(f, dt, a, b, op),
        Op::Shl | Op::Shr | Op::Sar => shift(f, dt, a, b, op),
        Op::Udiv => {
            let (al, ah) = unsigned_range(dt, a);
            let (bl, bh) = unsigned_range(dt, b);
            if bl > 0 && ah <= i64::MAX as u64 {
                norm(f, dt, (al / bh) as i64, (ah / bl) as i64, 0, 0)
            } else {
                bottom(f, dt)
            }
        }
        Op::Umod => {
            let (_, ah) = unsigned_range(dt, a);
            let (bl, bh) = unsigned_range(dt, b);
            if bl > 0 && bh <= i64::MAX as u64 {
                let hi = ah.min(bh - 1) as i64;
                norm(f, dt, 0, hi.max(0), 0, 0)
            } else {
                bottom(f, dt)
            }
        }
        Op::Sdiv => {
            if a.is_constant() && b.is_constant() && b.min != 0 {
                let c = a.min.wrapping_div(b.min);
                f.universe.int_const(c, dt)
            } else {
                bottom(f, dt)
            }
        }
        Op::Smod => {
            if a.is_constant() && b.is_constant() && b.min != 0 {
                let c = a.min.wrapping_rem(b.min);
                f.universe.int_const(c, dt)
            } else {
                bottom(f, dt)
            }
        }
        // Rotates: width-local bit shuffling, nothing cheap to say.
        _ => bottom(f, dt),
    }
}

fn bitwise(f: &mut Function, dt: DataType, a: IntRange, b: IntRange, op: Op) -> ValueId {
    let (zeros, ones) = match op {
        Op::And => (a.zeros | b.zeros, a.ones & b.ones),
        Op::Or => (a.zeros & b.zeros, a.ones | b.ones),
        Op::Xor => (
            (a.zeros & b.zeros) | (a.ones & b.ones),
            (a.zeros & b.ones) | (a.ones & b.zeros),
        ),
        _ => unreachable!("bitwise called with {op}"),
    };
    let (min, max) = match op {
        Op::And if a.min >= 0 || b.min >= 0 => {
            let hi = match (a.min >= 0, b.min >= 0) {
                (true, true) => a.max.min(b.max),
                (true, false) => a.max,
                (false, true) => b.max,
                (false, false) => unreachable!(),
            };
            (0, hi)
        }
        Op::Or | Op::Xor if a.min >= 0 && b.min >= 0 => {
            let top = (a.max | b.max) as u64;
            let hi = if top == 0 {
                0
            } else {
                ((1u128 << (64 - top.leading_zeros())) - 1) as i64
            };
            let lo = if op == Op::Or { a.min.max(b.min) } else { 0 };
            (lo, hi)
        }
        _ => (dt.signed_min(), dt.signed_max()),
    };
    norm(f, dt, min, max, zeros, ones)
}

fn shift(f: &mut Function, dt: DataType, a: IntRange, b: IntRange, op: Op) -> ValueId {
    let bits = dt.bits();
    let mask = dt.mask();
    if !b.is_constant() {
        return bottom(f, dt);
    }
    let s = (b.min as u64) & mask;
    if s >= u64::from(bits) {
        // Poisoned; idealize turns the node itself into POISON.
        return Universe::TOP;
    }
    let s32 = s as u32;
    match op {
        Op::Shl => {
            let lo = i128::from(a.min) << s32;
            let hi = i128::from(a.max) << s32;
            let zeros = ((a.zeros & mask) << s32) | ((1u64 << s32) - 1);
            let ones = (a.ones & mask) << s32;
            if fits_i128(dt, lo, hi) {
                norm(f, dt, lo as i64, hi as i64, zeros, ones)
            } else {
                norm(f, dt, dt.signed_min(), dt.signed_max(), zeros & mask, ones & mask)
            }
        }
        Op::Shr => {
            let (lo, hi) = unsigned_range(dt, a);
            let zeros = ((a.zeros & mask) >> s32) | (mask & !(mask >> s32)) | !mask;
            let ones = (a.ones & mask) >> s32;
            norm(f, dt, (lo >> s32) as i64, (hi >> s32) as i64, zeros, ones)
        }
        Op::Sar => norm(f, dt, a.min >> s32, a.max >> s32, 0, 0),
        _ => bottom(f, dt),
    }
}

fn int_unop(f: &mut Function, n: NodeId) -> ValueId {
    let dt = f.dt(n);
    let Some(x) = f.input(n, 1) else {
        return bottom(f, dt);
    };
    let Some(a) = int_of(f, x) else {
        return bottom(f, dt);
    };
    // One-bit arithmetic wraps immediately: -v ≡ v and ~v ≡ 1 - v.
    if dt == DataType::BOOL {
        return match f.op(n) {
            Op::Neg => f.universe.intern(Value::Int(a)),
            Op::Not => norm(f, dt, 1 - a.max, 1 - a.min, 0, 0),
            _ => bottom(f, dt),
        };
    }
    match f.op(n) {
        Op::Neg => {
            if a.min == dt.signed_min() {
                bottom(f, dt)
            } else {
                norm(f, dt, -a.max, -a.min, 0, 0)
            }
        }
        Op::Not => norm(f, dt, -1 - a.max, -1 - a.min, a.ones, a.zeros),
        _ => bottom(f, dt),
    }
}

fn float_binop(f: &mut Function, n: NodeId, op: Op) -> ValueId {
    let dt = f.dt(n);
    let (Some(a), Some(b)) = (f.input(n, 1), f.input(n, 2)) else {
        return bottom(f, dt);
    };
    let av = f.value_of(a);
    let bv = f.value_of(b);
    match (f.universe.get(av).clone(), f.universe.get(bv).clone()) {
        (Value::FltCon32(x), Value::FltCon32(y)) => {
            let r = apply_f64(op, f64::from(f32::from_bits(x)), f64::from(f32::from_bits(y)));
            f.universe.intern(Value::FltCon32((r as f32).to_bits()))
        }
        (Value::FltCon64(x), Value::FltCon64(y)) => {
            let r = apply_f64(op, f64::from_bits(x), f64::from_bits(y));
            f.universe.intern(Value::FltCon64(r.to_bits()))
        }
        (Value::Nan32, _) | (_, Value::Nan32) => Universe::NAN32,
        (Value::Nan64, _) | (_, Value::Nan64) => Universe::NAN64,
        _ => bottom(f, dt),
    }
}

fn apply_f64(op: Op, x: f64, y: f64) -> f64 {
    match op {
        Op::Fadd => x + y,
        Op::Fsub => x - y,
        Op::Fmul => x * y,
        Op::Fdiv => x / y,
        _ => f64::NAN,
    }
}

fn compare(f: &mut Function, n: NodeId, op: Op) -> ValueId {
    let (Some(a), Some(b)) = (f.input(n, 1), f.input(n, 2)) else {
        return bottom(f, DataType::BOOL);
    };
    let operand_dt = f.node(n).cmp_dt().unwrap_or(DataType::I64);
    let av = f.value_of(a);
    let bv = f.value_of(b);

    let decided = match (f.universe.get(av).clone(), f.universe.get(bv).clone()) {
        (Value::Int(x), Value::Int(y)) => int_compare(op, operand_dt, x, y),
        (Value::FltCon32(x), Value::FltCon32(y)) => {
            float_compare(op, f64::from(f32::from_bits(x)), f64::from(f32::from_bits(y)))
        }
        (Value::FltCon64(x), Value::FltCon64(y)) => {
            float_compare(op, f64::from_bits(x), f64::from_bits(y))
        }
        // An ordered float comparison with a guaranteed NaN is false.
        (Value::Nan32 | Value::Nan64, _) | (_, Value::Nan32 | Value::Nan64)
            if matches!(op, Op::CmpFlt | Op::CmpFle) =>
        {
            Some(false)
        }
        (x, y) => ptr_compare(op, &x, &y),
    };
    match decided {
        Some(true) => Universe::TRUE,
        Some(false) => Universe::FALSE,
        None => bottom(f, DataType::BOOL),
    }
}

fn int_compare(op: Op, dt: DataType, a: IntRange, b: IntRange) -> Option<bool> {
    let disjoint_bits = (a.ones & b.zeros) != 0 || (a.zeros & b.ones) != 0;
    let disjoint_range = a.max < b.min || b.max < a.min;
    match op {
        Op::CmpEq => {
            if disjoint_range || disjoint_bits {
                Some(false)
            } else if a.is_constant() && b.is_constant() && a.min == b.min {
                Some(true)
            } else {
                None
            }
        }
        Op::CmpNe => int_compare(Op::CmpEq, dt, a, b).map(|v| !v),
        Op::CmpSlt => {
            if a.max < b.min {
                Some(true)
            } else if a.min >= b.max {
                Some(false)
            } else {
                None
            }
        }
        Op::CmpSle => {
            if a.max <= b.min {
                Some(true)
            } else if a.min > b.max {
                Some(false)
            } else {
                None
            }
        }
        Op::CmpUlt | Op::CmpUle => {
            let (al, ah) = unsigned_range(dt, a);
            let (bl, bh) = unsigned_range(dt, b);
            match op {
                Op::CmpUlt => {
                    if ah < bl {
                        Some(true)
                    } else if al >= bh {
                        Some(false)
                    } else {
                        None
                    }
                }
                _ => {
                    if ah <= bl {
                        Some(true)
                    } else if al > bh {
                        Some(false)
                    } else {
                        None
                    }
                }
            }
        }
        _ => None,
    }
}

fn float_compare(op: Op, x: f64, y: f64) -> Option<bool> {
    match op {
        Op::CmpFlt => Some(x < y),
        Op::CmpFle => Some(x <= y),
        Op::CmpEq => Some(x == y),
        Op::CmpNe => Some(x != y),
        _ => None,
    }
}

fn ptr_compare(op: Op, a: &Value, b: &Value) -> Option<bool> {
    let equal = match (a, b) {
        (Value::Null, Value::Null) => Some(true),
        (Value::Null, Value::XNull | Value::PtrCon(_)) => Some(false),
        (Value::XNull | Value::PtrCon(_), Value::Null) => Some(false),
        (Value::PtrCon(x), Value::PtrCon(y)) => Some(x == y),
        _ => None,
    }?;
    match op {
        Op::CmpEq => Some(equal),
        Op::CmpNe => Some(!equal),
        _ => None,
    }
}

fn branch(f: &mut Function, n: NodeId) -> ValueId {
    let keys: Box<[i64]> = match &f.node(n).payload {
        Payload::Branch(keys) => keys.clone(),
        _ => return Universe::BOT,
    };
    let edges = keys.len() + 1;
    let ctrl_dead = match f.input(n, 0) {
        Some(c) => f.value_of(c) == Universe::XCTRL,
        None => true,
    };
    if ctrl_dead {
        return f
            .universe
            .intern(Value::Tuple(vec![Universe::XCTRL; edges].into_boxed_slice()));
    }

    let key_dt = f.input(n, 1).map(|k| f.dt(k)).unwrap_or(DataType::I64);
    let range = f.input(n, 1).and_then(|k| int_of(f, k));
    let mut elems = vec![Universe::CTRL; edges];
    if let Some(r) = range {
        let mut matched = None;
        for (i, &k) in keys.iter().enumerate() {
            let k = key_dt.normalize(k);
            if excludes(r, k) {
                elems[i] = Universe::XCTRL;
            } else if r.is_constant() && r.min == k {
                matched = Some(i);
            }
        }
        if let Some(hit) = matched {
            for (i, e) in elems.iter_mut().enumerate() {
                if i != hit {
                    *e = Universe::XCTRL;
                }
            }
        } else if r.is_constant() {
            // A constant key that matched nothing takes the default.
            for e in elems.iter_mut().take(keys.len()) {
                *e = Universe::XCTRL;
            }
        }
    }
    f.universe.intern(Value::Tuple(elems.into_boxed_slice()))
}

/// Can the range provably never take the value `k`?
fn excludes(r: IntRange, k: i64) -> bool {
    if k < r.min || k > r.max {
        return true;
    }
    (k as u64 & r.zeros) != 0 || (!(k as u64) & r.ones) != 0
}

fn phi(f: &mut Function, n: NodeId) -> ValueId {
    let Some(region) = f.input(n, 0) else {
        return Universe::BOT;
    };
    if f.value_of(region) == Universe::XCTRL {
        return Universe::TOP;
    }
    let arms: Vec<(Option<NodeId>, Option<NodeId>)> = {
        let inputs = f.inputs(n).to_vec();
        let preds = f.inputs(region).to_vec();
        preds
            .iter()
            .copied()
            .zip(inputs[1..].iter().copied())
            .collect()
    };
    let mut acc = Universe::TOP;
    for (pred, value) in arms {
        let (Some(pred), Some(value)) = (pred, value) else {
            continue;
        };
        if f.value_of(pred) == Universe::XCTRL {
            continue;
        }
        let v = f.value_of(value);
        acc = f.universe.meet(acc, v);
    }
    acc
}

fn unop_value(f: &mut Function, n: NodeId) -> ValueId {
    // Sign extension preserves the sign-extended representation exactly —
    // except out of the boolean type, whose canonical 0/1 becomes 0/-1.
    let dt = f.dt(n);
    let Some(x) = f.input(n, 1) else {
        return bottom(f, dt);
    };
    if f.dt(x) == DataType::BOOL {
        return match int_of(f, x) {
            Some(r) => norm(f, dt, -r.max, -r.min, 0, 0),
            None => bottom(f, dt),
        };
    }
    f.value_of(x)
}

fn zero_ext(f: &mut Function, n: NodeId) -> ValueId {
    let dt = f.dt(n);
    let Some(x) = f.input(n, 1) else {
        return bottom(f, dt);
    };
    let old = f.dt(x);
    let Some(a) = int_of(f, x) else {
        return bottom(f, dt);
    };
    let (lo, hi) = unsigned_range(old, a);
    if hi <= i64::MAX as u64 {
        let zeros = (a.zeros & old.mask()) | !old.mask();
        let ones = a.ones & old.mask();
        norm(f, dt, lo as i64, hi as i64, zeros, ones)
    } else {
        bottom(f, dt)
    }
}

fn truncate(f: &mut Function, n: NodeId) -> ValueId {
    let dt = f.dt(n);
    let Some(x) = f.input(n, 1) else {
        return bottom(f, dt);
    };
    let Some(a) = int_of(f, x) else {
        return bottom(f, dt);
    };
    if a.fits(dt) {
        norm(f, dt, a.min, a.max, a.zeros, a.ones)
    } else {
        bottom(f, dt)
    }
}

fn int2ptr(f: &mut Function, n: NodeId) -> ValueId {
    let Some(x) = f.input(n, 1) else {
        return Universe::PTR;
    };
    match int_of(f, x) {
        Some(r) if r.is_constant() && r.min == 0 => Universe::NULL,
        Some(r) if r.min > 0 || r.max < 0 || r.ones != 0 => Universe::XNULL,
        _ => Universe::PTR,
    }
}

fn ptr2int(f: &mut Function, n: NodeId) -> ValueId {
    let Some(x) = f.input(n, 1) else {
        return bottom(f, DataType::I64);
    };
    let xv = f.value_of(x);
    if xv == Universe::NULL {
        f.universe.int_const(0, DataType::I64)
    } else {
        bottom(f, DataType::I64)
    }
}

fn int2float(f: &mut Function, n: NodeId) -> ValueId {
    let dt = f.dt(n);
    let Some(x) = f.input(n, 1) else {
        return bottom(f, dt);
    };
    match int_of(f, x) {
        Some(r) if r.is_constant() => match dt {
            DataType::F32 => f
                .universe
                .intern(Value::FltCon32((r.min as f32).to_bits())),
            _ => f.universe.intern(Value::FltCon64((r.min as f64).to_bits())),
        },
        _ => bottom(f, dt),
    }
}

fn float2int(f: &mut Function, n: NodeId) -> ValueId {
    let dt = f.dt(n);
    let Some(x) = f.input(n, 1) else {
        return bottom(f, dt);
    };
    let xv = f.value_of(x);
    match f.universe.get(xv).clone() {
        Value::FltCon32(bits) => {
            let v = f32::from_bits(bits) as i64;
            f.universe.int_const(v, dt)
        }
        Value::FltCon64(bits) => {
            let v = f64::from_bits(bits) as i64;
            f.universe.int_const(v, dt)
        }
        _ => bottom(f, dt),
    }
}

fn bitcast(f: &mut Function, n: NodeId) -> ValueId {
    let dt = f.dt(n);
    let Some(x) = f.input(n, 1) else {
        return bottom(f, dt);
    };
    let xv = f.value_of(x);
    let single = f.universe.singleton(xv);
    match (single, dt) {
        (Some(Singleton::Int(v)), DataType::F32) => {
            f.universe.intern(Value::FltCon32(v as u32))
        }
        (Some(Singleton::Int(v)), DataType::F64) => {
            f.universe.intern(Value::FltCon64(v as u64))
        }
        (Some(Singleton::F32(bits)), DataType::Int(_)) => {
            f.universe.int_const(i64::from(bits as i32), dt)
        }
        (Some(Singleton::F64(bits)), DataType::Int(_)) => {
            f.universe.int_const(bits as i64, dt)
        }
        _ => bottom(f, dt),
    }
}

fn select(f: &mut Function, n: NodeId) -> ValueId {
    let dt = f.dt(n);
    let (Some(c), Some(t), Some(e)) = (f.input(n, 1), f.input(n, 2), f.input(n, 3)) else {
        return bottom(f, dt);
    };
    let cv = f.value_of(c);
    match f.universe.singleton(cv) {
        Some(Singleton::Int(0)) => f.value_of(e),
        Some(Singleton::Int(_)) => f.value_of(t),
        _ => {
            let tv = f.value_of(t);
            let ev = f.value_of(e);
            f.universe.meet(tv, ev)
        }
    }
}

fn pointer_offset(f: &mut Function, n: NodeId) -> ValueId {
    let Some(base) = f.input(n, 1) else {
        return Universe::PTR;
    };
    let bv = f.value_of(base);
    match f.universe.get(bv) {
        Value::XNull | Value::PtrCon(_) => Universe::XNULL,
        _ => Universe::PTR,
    }
}
