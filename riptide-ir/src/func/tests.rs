use quickcheck::{Arbitrary, Gen};
use quickcheck_macros::quickcheck;

use super::*;
use crate::module::Prototype;

fn empty() -> Function {
    Function::new("t", SymbolId(0), Prototype::default())
}

fn konst(f: &mut Function, v: i64) -> NodeId {
    f.new_node(Op::IntConst, DataType::I32, 1, Payload::Int(v))
}

#[test]
fn set_input_mirrors_edges() {
    let mut f = empty();
    let a = konst(&mut f, 1);
    let b = konst(&mut f, 2);
    let add = f.node_with_inputs(
        Op::Add,
        DataType::I32,
        &[None, Some(a), Some(b)],
        Payload::None,
    );

    assert_eq!(f.users(a), &[Use { node: add, slot: 1 }]);
    assert_eq!(f.users(b), &[Use { node: add, slot: 2 }]);

    f.set_input(add, 2, Some(a));
    assert_eq!(f.users(b), &[]);
    assert_eq!(f.users(a).len(), 2);
    f.verify_edges().unwrap();
}

#[test]
fn subsume_migrates_all_users() {
    let mut f = empty();
    let a = konst(&mut f, 1);
    let b = konst(&mut f, 1);
    let u1 = f.node_with_inputs(Op::Neg, DataType::I32, &[None, Some(a)], Payload::None);
    let u2 = f.node_with_inputs(
        Op::Add,
        DataType::I32,
        &[None, Some(a), Some(a)],
        Payload::None,
    );

    f.subsume(a, b);
    assert!(f.is_dead(a));
    assert_eq!(f.input(u1, 1), Some(b));
    assert_eq!(f.input(u2, 1), Some(b));
    assert_eq!(f.input(u2, 2), Some(b));
    assert_eq!(f.users(b).len(), 3);
    f.verify_edges().unwrap();
}

#[test]
fn remove_input_renumbers_user_slots() {
    let mut f = empty();
    let region = f.new_node(Op::Region, DataType::Control, 0, Payload::None);
    let c0 = konst(&mut f, 0);
    let c1 = konst(&mut f, 1);
    let c2 = konst(&mut f, 2);
    let phi = f.node_with_inputs(
        Op::Phi,
        DataType::I32,
        &[Some(region), Some(c0), Some(c1), Some(c2)],
        Payload::None,
    );

    f.remove_input(phi, 2);
    assert_eq!(f.inputs(phi), &[Some(region), Some(c0), Some(c2)]);
    assert_eq!(f.users(c1), &[]);
    assert_eq!(f.users(c2), &[Use { node: phi, slot: 2 }]);
    f.verify_edges().unwrap();
}

#[test]
#[should_panic(expected = "still has users")]
fn kill_with_users_aborts() {
    let mut f = empty();
    let a = konst(&mut f, 1);
    let _user = f.node_with_inputs(Op::Neg, DataType::I32, &[None, Some(a)], Payload::None);
    f.kill(a);
}

#[test]
fn kill_unwires_inputs() {
    let mut f = empty();
    let a = konst(&mut f, 1);
    let n = f.node_with_inputs(Op::Neg, DataType::I32, &[None, Some(a)], Payload::None);
    f.kill(n);
    assert!(f.is_dead(n));
    assert_eq!(f.users(a), &[]);
    f.verify_edges().unwrap();
}

#[test]
fn lazy_types_default_from_dt() {
    let mut f = empty();
    let a = konst(&mut f, 1);
    let v = f.value_of(a);
    let full = f.universe.from_dt(DataType::I32);
    assert_eq!(v, full, "first read yields the type-wide range");
    let c = f.universe.int_const(1, DataType::I32);
    assert!(f.set_value(a, c));
    assert!(!f.set_value(a, c));
}

/// A random but well-formed mutation script over a small graph.
#[derive(Debug, Clone)]
struct Script(Vec<(u8, u8, u8)>);

impl Arbitrary for Script {
    fn arbitrary(g: &mut Gen) -> Self {
        let len = usize::arbitrary(g) % 40;
        Script((0..len).map(|_| Arbitrary::arbitrary(g)).collect())
    }
}

#[quickcheck]
fn random_mutation_keeps_the_mirror(script: Script) -> bool {
    let mut f = empty();
    let pool: Vec<NodeId> = (0..8).map(|i| konst(&mut f, i)).collect();
    let sinks: Vec<NodeId> = (0..4)
        .map(|_| f.new_node(Op::Add, DataType::I32, 3, Payload::None))
        .collect();

    for (op, x, y) in script.0 {
        let sink = sinks[x as usize % sinks.len()];
        match op % 3 {
            0 => {
                let v = pool[y as usize % pool.len()];
                let slot = 1 + (op as usize / 3) % 2;
                f.set_input(sink, slot, Some(v));
            }
            1 => {
                let slot = 1 + y as usize % 2;
                f.set_input(sink, slot, None);
            }
            _ => {
                let v = pool[y as usize % pool.len()];
                f.add_input(sink, Some(v));
            }
        }
    }
    f.verify_edges().is_ok()
}
