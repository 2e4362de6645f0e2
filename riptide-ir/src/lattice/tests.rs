use quickcheck::{Arbitrary, Gen};
use quickcheck_macros::quickcheck;

use super::*;

/// Generator wrapper: a small but representative slice of the universe.
#[derive(Debug, Clone)]
struct AnyValue(Value);

impl Arbitrary for AnyValue {
    fn arbitrary(g: &mut Gen) -> Self {
        let v = match u8::arbitrary(g) % 12 {
            0 => Value::Top,
            1 => Value::Bot,
            2 => Value::Ctrl,
            3 => Value::XCtrl,
            4 => Value::Null,
            5 => Value::XNull,
            6 => Value::Ptr,
            7 => Value::PtrCon(SymbolId(u8::arbitrary(g) as u32 % 4)),
            8 => Value::FltCon64(f64::from(i8::arbitrary(g)).to_bits()),
            9 => {
                let a = i16::arbitrary(g) as i64;
                let b = i16::arbitrary(g) as i64;
                Value::Int(IntRange::range(a.min(b), a.max(b)))
            }
            10 => Value::Int(IntRange::constant(i8::arbitrary(g) as i64)),
            _ => Value::MemSlice(AliasSet::single(u8::arbitrary(g) as u32 % 8)),
        };
        AnyValue(v)
    }
}

#[quickcheck]
fn meet_is_idempotent(a: AnyValue) -> bool {
    let mut u = Universe::new();
    let a = u.intern(a.0);
    u.meet(a, a) == a
}

#[quickcheck]
fn top_is_identity_bot_absorbs(a: AnyValue) -> bool {
    let mut u = Universe::new();
    let a = u.intern(a.0);
    u.meet(a, Universe::TOP) == a && u.meet(a, Universe::BOT) == Universe::BOT
}

#[quickcheck]
fn meet_is_commutative(a: AnyValue, b: AnyValue) -> bool {
    let mut u = Universe::new();
    let (a, b) = (u.intern(a.0), u.intern(b.0));
    u.meet(a, b) == u.meet(b, a)
}

#[quickcheck]
fn meet_is_associative(a: AnyValue, b: AnyValue, c: AnyValue) -> bool {
    let mut u = Universe::new();
    let (a, b, c) = (u.intern(a.0), u.intern(b.0), u.intern(c.0));
    let ab = u.meet(a, b);
    let bc = u.meet(b, c);
    u.meet(ab, c) == u.meet(a, bc)
}

#[quickcheck]
fn dual_is_an_involution(a: AnyValue) -> bool {
    let mut u = Universe::new();
    let a = u.intern(a.0);
    let d = u.dual(a);
    u.dual(d) == a
}

#[quickcheck]
fn join_flips_the_units(a: AnyValue) -> bool {
    let mut u = Universe::new();
    let a = u.intern(a.0);
    u.join(a, Universe::BOT) == a && u.join(a, Universe::TOP) == Universe::TOP
}

#[test]
fn interning_canonicalizes() {
    let mut u = Universe::new();
    let a = u.intern(Value::Int(IntRange::constant(42)));
    let b = u.intern(Value::Int(IntRange::constant(42)));
    assert_eq!(a, b);
    assert_eq!(u.structural_hash(a), u.structural_hash(b));
}

#[test]
fn int_constants_sign_extend_through_their_type() {
    let mut u = Universe::new();
    let a = u.int_const(0xff, DataType::I8);
    assert_eq!(u.as_int(a).unwrap().min, -1);

    let b = u.int_const(1, DataType::BOOL);
    assert_eq!(b, Universe::TRUE);
    let c = u.int_const(0, DataType::BOOL);
    assert_eq!(c, Universe::FALSE);
}

#[test]
fn int_meet_unions_ranges_and_intersects_bits() {
    let mut u = Universe::new();
    let a = u.int_const(4, DataType::I32);
    let b = u.int_const(6, DataType::I32);
    let m = u.meet(a, b);
    let i = u.as_int(m).unwrap();
    assert_eq!((i.min, i.max), (4, 6));
    // 4 = 0b100, 6 = 0b110: bit 2 known one, bit 0 known zero.
    assert_eq!(i.ones, 0b100);
    assert_eq!(i.zeros & 1, 1);
}

#[test]
fn pointer_family_meets() {
    let mut u = Universe::new();
    let (s0, s1) = (
        u.intern(Value::PtrCon(SymbolId(0))),
        u.intern(Value::PtrCon(SymbolId(1))),
    );
    assert_eq!(u.meet(s0, s1), Universe::XNULL);
    assert_eq!(u.meet(s0, Universe::XNULL), Universe::XNULL);
    assert_eq!(u.meet(s0, Universe::NULL), Universe::PTR);
    assert_eq!(u.meet(Universe::NULL, Universe::XNULL), Universe::PTR);
}

#[test]
fn float_constants_meet_into_nan_buckets() {
    let mut u = Universe::new();
    let one = u.intern(Value::FltCon64(1f64.to_bits()));
    let two = u.intern(Value::FltCon64(2f64.to_bits()));
    let nan = u.intern(Value::FltCon64(f64::NAN.to_bits()));
    assert_eq!(u.meet(one, two), Universe::XNAN64);
    assert_eq!(u.meet(one, nan), Universe::FLT64);
    assert_eq!(u.meet(nan, Universe::NAN64), Universe::NAN64);
}

#[test]
fn memory_meets() {
    let mut u = Universe::new();
    let a = u.intern(Value::MemSlice(AliasSet::single(1)));
    let b = u.intern(Value::MemSlice(AliasSet::single(2)));
    let ab = u.meet(a, b);
    match u.get(ab) {
        Value::MemSlice(s) => {
            assert!(s.contains(1) && s.contains(2) && !s.contains(3));
        }
        other => panic!("expected slice, got {other:?}"),
    }
    assert_eq!(u.meet(a, Universe::ALLMEM), Universe::ALLMEM);
    assert_eq!(u.meet(a, Universe::ANYMEM), a);
}

#[test]
fn widening_reaches_the_type_bottom() {
    let mut u = Universe::new();
    let dt = DataType::I32;
    let mut cur = u.int_const(0, dt);
    // Simulate a loop counter that keeps growing: the update sequence must
    // hit the full i32 range in finitely many steps.
    for hi in 1..100 {
        let next = u.int_range(0, hi);
        cur = u.apply_widening(cur, next, dt);
        if cur == u.from_dt(dt) {
            return;
        }
    }
    panic!("widening never converged");
}

#[test]
fn singletons_materialize() {
    let mut u = Universe::new();
    let c = u.int_const(7, DataType::I32);
    assert_eq!(u.singleton(c), Some(Singleton::Int(7)));
    assert_eq!(u.singleton(Universe::NULL), Some(Singleton::Null));
    assert_eq!(u.singleton(Universe::BOT), None);
    let r = u.int_range(0, 5);
    assert_eq!(u.singleton(r), None);
}
