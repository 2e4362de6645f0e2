//! The interned value lattice used by constant propagation.
//!
//! Every node's abstract value is a [`ValueId`] into a per-function
//! [`Universe`]. Values are interned by structural equality, so id equality
//! is semantic equality and `meet` can early-out on identical ids.
//!
//! Integer values are kept sign-extended to 64 bits regardless of their
//! node's width (booleans stay 0/1, matching what compares materialize
//! into registers); the known-bit masks cover the full 64-bit pattern,
//! which makes the high bits of narrow non-negative constants known zeros
//! for free.

use core::fmt;
use std::hash::BuildHasher;

use hashbrown::HashMap;

use crate::dt::DataType;
use crate::module::SymbolId;

/// Number of times an integer value may strictly descend before it is
/// widened to the full range of its type.
pub const WIDEN_LIMIT: u8 = 3;

/// Handle to an interned lattice value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(u32);

impl ValueId {
    /// Index into the universe's backing storage.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A signed+unsigned integer range with bit-level knowledge.
///
/// `min > max` is legal and encodes a wrapped range (the complement of
/// `max..=min`); the transfer functions only produce it through `dual`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IntRange {
    /// Smallest value, sign-extended.
    pub min: i64,
    /// Largest value, sign-extended.
    pub max: i64,
    /// Bits known to be zero in every possible value.
    pub zeros: u64,
    /// Bits known to be one in every possible value.
    pub ones: u64,
    /// Monotonicity fuel; see [`WIDEN_LIMIT`].
    pub widen: u8,
}

impl IntRange {
    /// The constant `v`.
    pub fn constant(v: i64) -> Self {
        IntRange {
            min: v,
            max: v,
            zeros: !(v as u64),
            ones: v as u64,
            widen: 0,
        }
    }

    /// The range `min..=max` with nothing known about the bits.
    pub fn range(min: i64, max: i64) -> Self {
        debug_assert!(min <= max);
        IntRange {
            min,
            max,
            zeros: 0,
            ones: 0,
            widen: 0,
        }
    }

    /// Is this a single value?
    pub fn is_constant(&self) -> bool {
        self.min == self.max
    }

    /// Does every value in the range fit the given width once
    /// sign-extended?
    pub fn fits(&self, dt: DataType) -> bool {
        self.min >= dt.signed_min() && self.max <= dt.signed_max()
    }
}

/// Alias-class bitset carried by `MEM_SLICE` values.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AliasSet(Box<[u64]>);

impl AliasSet {
    /// The set containing exactly `class`.
    pub fn single(class: u32) -> Self {
        let mut words = vec![0u64; class as usize / 64 + 1];
        words[class as usize / 64] |= 1 << (class % 64);
        AliasSet(words.into_boxed_slice())
    }

    /// Membership test.
    pub fn contains(&self, class: u32) -> bool {
        self.0
            .get(class as usize / 64)
            .is_some_and(|w| w & (1 << (class % 64)) != 0)
    }

    /// Set union.
    pub fn union(&self, other: &AliasSet) -> AliasSet {
        let n = self.0.len().max(other.0.len());
        let mut words = vec![0u64; n];
        for (i, w) in words.iter_mut().enumerate() {
            *w = self.0.get(i).copied().unwrap_or(0) | other.0.get(i).copied().unwrap_or(0);
        }
        AliasSet(words.into_boxed_slice())
    }

    /// Do the two sets share any class?
    pub fn intersects(&self, other: &AliasSet) -> bool {
        self.0.iter().zip(other.0.iter()).any(|(a, b)| a & b != 0)
    }

    /// Bitwise complement (used by `dual`).
    pub fn complement(&self) -> AliasSet {
        AliasSet(self.0.iter().map(|w| !w).collect())
    }
}

/// An abstract run-time value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    /// Impossible / not yet analyzed.
    Top,
    /// Anything at all.
    Bot,
    /// Integer range with known bits.
    Int(IntRange),
    /// Any 32-bit float.
    Flt32,
    /// Any 64-bit float.
    Flt64,
    /// Definitely a 32-bit NaN.
    Nan32,
    /// Definitely a 64-bit NaN.
    Nan64,
    /// Definitely not a 32-bit NaN.
    XNan32,
    /// Definitely not a 64-bit NaN.
    XNan64,
    /// A specific f32 (raw bits).
    FltCon32(u32),
    /// A specific f64 (raw bits).
    FltCon64(u64),
    /// The null pointer.
    Null,
    /// Any pointer except null.
    XNull,
    /// Any pointer.
    Ptr,
    /// The address of a specific symbol.
    PtrCon(SymbolId),
    /// Live control.
    Ctrl,
    /// Unreachable control.
    XCtrl,
    /// All of memory (bottom of the memory lattice).
    AllMem,
    /// No memory at all (top of the memory lattice).
    AnyMem,
    /// Memory restricted to a set of alias classes.
    MemSlice(AliasSet),
    /// One value per projection index of a tuple node.
    Tuple(Box<[ValueId]>),
}

/// The per-function intern table of lattice values.
#[derive(Debug)]
pub struct Universe {
    values: Vec<Value>,
    interner: HashMap<Value, ValueId>,
}

macro_rules! preinterned {
    ($($(#[$doc:meta])* $name:ident = $idx:expr;)*) => {
        impl Universe {
            $($(#[$doc])* pub const $name: ValueId = ValueId($idx);)*
        }
    };
}

preinterned! {
    /// Impossible.
    TOP = 0;
    /// Anything.
    BOT = 1;
    /// Live control.
    CTRL = 2;
    /// Unreachable control.
    XCTRL = 3;
    /// Null pointer.
    NULL = 4;
    /// Non-null pointer.
    XNULL = 5;
    /// Any pointer.
    PTR = 6;
    /// All memory.
    ALLMEM = 7;
    /// No memory.
    ANYMEM = 8;
    /// Any f32.
    FLT32 = 9;
    /// Any f64.
    FLT64 = 10;
    /// f32 NaN.
    NAN32 = 11;
    /// f64 NaN.
    NAN64 = 12;
    /// f32 non-NaN.
    XNAN32 = 13;
    /// f64 non-NaN.
    XNAN64 = 14;
    /// Boolean false.
    FALSE = 15;
    /// Boolean true.
    TRUE = 16;
}

impl Default for Universe {
    fn default() -> Self {
        Self::new()
    }
}

impl Universe {
    /// A universe with the fixed singletons pre-interned.
    pub fn new() -> Self {
        let mut u = Universe {
            values: Vec::with_capacity(32),
            interner: HashMap::with_capacity(32),
        };
        let fixed = [
            Value::Top,
            Value::Bot,
            Value::Ctrl,
            Value::XCtrl,
            Value::Null,
            Value::XNull,
            Value::Ptr,
            Value::AllMem,
            Value::AnyMem,
            Value::Flt32,
            Value::Flt64,
            Value::Nan32,
            Value::Nan64,
            Value::XNan32,
            Value::XNan64,
            Value::Int(IntRange::constant(0)),
            Value::Int(IntRange::constant(1)),
        ];
        for (i, v) in fixed.into_iter().enumerate() {
            let id = u.intern(v);
            debug_assert_eq!(id.0 as usize, i, "fixed singleton order drifted");
        }
        u
    }

    /// Interns `v`, returning the canonical id.
    pub fn intern(&mut self, v: Value) -> ValueId {
        if let Some(&id) = self.interner.get(&v) {
            return id;
        }
        let id = ValueId(self.values.len() as u32);
        self.values.push(v.clone());
        self.interner.insert(v, id);
        id
    }

    /// The value behind `id`.
    pub fn get(&self, id: ValueId) -> &Value {
        &self.values[id.index()]
    }

    /// Interns the integer constant `v` as seen through `dt`.
    pub fn int_const(&mut self, v: i64, dt: DataType) -> ValueId {
        self.intern(Value::Int(IntRange::constant(dt.normalize(v))))
    }

    /// Interns `min..=max` with unknown bits.
    pub fn int_range(&mut self, min: i64, max: i64) -> ValueId {
        self.intern(Value::Int(IntRange::range(min, max)))
    }

    /// The conservative value of a freshly created node of type `dt` — the
    /// bottom of that type's sub-lattice.
    pub fn from_dt(&mut self, dt: DataType) -> ValueId {
        match dt {
            DataType::Int(b) => {
                let dt = DataType::Int(b);
                self.int_range(dt.signed_min(), dt.signed_max())
            }
            DataType::F32 => Self::FLT32,
            DataType::F64 => Self::FLT64,
            DataType::Ptr => Self::PTR,
            DataType::Control => Self::CTRL,
            DataType::Memory => Self::ALLMEM,
            DataType::Tuple | DataType::Void => Self::BOT,
        }
    }

    /// Greatest lower bound.
    pub fn meet(&mut self, a: ValueId, b: ValueId) -> ValueId {
        if a == b {
            return a;
        }
        if a == Self::TOP {
            return b;
        }
        if b == Self::TOP {
            return a;
        }
        if a == Self::BOT || b == Self::BOT {
            return Self::BOT;
        }
        let (av, bv) = (self.get(a).clone(), self.get(b).clone());
        match (av, bv) {
            (Value::Int(x), Value::Int(y)) => {
                let i = IntRange {
                    min: x.min.min(y.min),
                    max: x.max.max(y.max),
                    zeros: x.zeros & y.zeros,
                    ones: x.ones & y.ones,
                    widen: x.widen.max(y.widen),
                };
                self.intern(Value::Int(i))
            }

            // Float sub-lattices: constants sit under their NaN bucket,
            // the buckets sit under the width's bottom.
            (x, y) if float32_family(&x) && float32_family(&y) => {
                match (f32_nan_class(&x), f32_nan_class(&y)) {
                    (Some(true), Some(true)) => Self::NAN32,
                    (Some(false), Some(false)) => Self::XNAN32,
                    _ => Self::FLT32,
                }
            }
            (x, y) if float64_family(&x) && float64_family(&y) => {
                match (f64_nan_class(&x), f64_nan_class(&y)) {
                    (Some(true), Some(true)) => Self::NAN64,
                    (Some(false), Some(false)) => Self::XNAN64,
                    _ => Self::FLT64,
                }
            }

            // Pointers: PTR below {NULL, XNULL}, XNULL above the symbols.
            (Value::Null, p) | (p, Value::Null) if ptr_family(&p) => Self::PTR,
            (Value::Ptr, p) | (p, Value::Ptr) if ptr_family(&p) => Self::PTR,
            (Value::XNull, Value::PtrCon(_)) | (Value::PtrCon(_), Value::XNull) => Self::XNULL,
            (Value::PtrCon(x), Value::PtrCon(y)) => {
                debug_assert_ne!(x, y, "equal symbols intern equal");
                Self::XNULL
            }

            (Value::Ctrl, Value::XCtrl) | (Value::XCtrl, Value::Ctrl) => Self::CTRL,

            (Value::AllMem, m) | (m, Value::AllMem) if mem_family(&m) => Self::ALLMEM,
            (Value::AnyMem, m) | (m, Value::AnyMem) if mem_family(&m) => self.intern(m),
            (Value::MemSlice(x), Value::MemSlice(y)) => self.intern(Value::MemSlice(x.union(&y))),

            (Value::Tuple(xs), Value::Tuple(ys)) if xs.len() == ys.len() => {
                let elems: Vec<ValueId> = xs
                    .iter()
                    .zip(ys.iter())
                    .map(|(&x, &y)| self.meet(x, y))
                    .collect();
                self.intern(Value::Tuple(elems.into_boxed_slice()))
            }

            _ => Self::BOT,
        }
    }

    /// Lattice inversion; `dual(dual(a)) == a`.
    pub fn dual(&mut self, a: ValueId) -> ValueId {
        match self.get(a).clone() {
            Value::Top => Self::BOT,
            Value::Bot => Self::TOP,
            Value::Int(i) => self.intern(Value::Int(IntRange {
                min: i.max,
                max: i.min,
                zeros: !i.zeros,
                ones: !i.ones,
                widen: WIDEN_LIMIT - i.widen,
            })),
            Value::Ctrl => Self::XCTRL,
            Value::XCtrl => Self::CTRL,
            Value::AllMem => Self::ANYMEM,
            Value::AnyMem => Self::ALLMEM,
            Value::MemSlice(s) => self.intern(Value::MemSlice(s.complement())),
            Value::Tuple(xs) => {
                let elems: Vec<ValueId> = xs.iter().map(|&x| self.dual(x)).collect();
                self.intern(Value::Tuple(elems.into_boxed_slice()))
            }
            // Self-dual points (constants and the NaN buckets).
            _ => a,
        }
    }

    /// Least upper bound, `dual(meet(dual(a), dual(b)))`.
    pub fn join(&mut self, a: ValueId, b: ValueId) -> ValueId {
        let (da, db) = (self.dual(a), self.dual(b));
        let m = self.meet(da, db);
        self.dual(m)
    }

    /// Folds the widening rule into a lattice update: when `next` strictly
    /// descends from `old` too many times, it is pumped to the full range
    /// of `dt` so the fixed point terminates.
    pub fn apply_widening(&mut self, old: ValueId, next: ValueId, dt: DataType) -> ValueId {
        if old == next {
            return next;
        }
        let (Value::Int(o), Value::Int(n)) = (self.get(old).clone(), self.get(next).clone())
        else {
            return next;
        };
        // Only growth of the range burns fuel; sideways moves (bit-mask
        // refinement) and shrinks are free.
        if n.min >= o.min && n.max <= o.max {
            return next;
        }
        let widen = o.widen.max(n.widen).saturating_add(1);
        if widen >= WIDEN_LIMIT {
            return self.from_dt(dt);
        }
        self.intern(Value::Int(IntRange { widen, ..n }))
    }

    /// Is `id` a single concrete value a constant node could represent?
    pub fn singleton(&self, id: ValueId) -> Option<Singleton> {
        match self.get(id) {
            Value::Int(i) if i.is_constant() => Some(Singleton::Int(i.min)),
            Value::FltCon32(bits) => Some(Singleton::F32(*bits)),
            Value::FltCon64(bits) => Some(Singleton::F64(*bits)),
            Value::Null => Some(Singleton::Null),
            Value::PtrCon(sym) => Some(Singleton::Symbol(*sym)),
            _ => None,
        }
    }

    /// The integer range behind `id`, if it is an integer value.
    pub fn as_int(&self, id: ValueId) -> Option<IntRange> {
        match self.get(id) {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Renders `id` for diagnostics.
    pub fn display(&self, id: ValueId) -> impl fmt::Display + '_ {
        DisplayValue { u: self, id }
    }

    /// Hash of the structural value, exposed for interning diagnostics.
    pub fn structural_hash(&self, id: ValueId) -> u64 {
        self.interner.hasher().hash_one(self.get(id))
    }
}

/// A lattice value small enough to become a constant node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Singleton {
    /// Integer constant (sign-extended).
    Int(i64),
    /// f32 bits.
    F32(u32),
    /// f64 bits.
    F64(u64),
    /// Null pointer.
    Null,
    /// Symbol address.
    Symbol(SymbolId),
}

fn float32_family(v: &Value) -> bool {
    matches!(
        v,
        Value::Flt32 | Value::Nan32 | Value::XNan32 | Value::FltCon32(_)
    )
}

fn float64_family(v: &Value) -> bool {
    matches!(
        v,
        Value::Flt64 | Value::Nan64 | Value::XNan64 | Value::FltCon64(_)
    )
}

/// `Some(is_nan)` when the class is known, `None` for the width bottom.
fn f32_nan_class(v: &Value) -> Option<bool> {
    match v {
        Value::Nan32 => Some(true),
        Value::XNan32 => Some(false),
        Value::FltCon32(bits) => Some(f32::from_bits(*bits).is_nan()),
        _ => None,
    }
}

fn f64_nan_class(v: &Value) -> Option<bool> {
    match v {
        Value::Nan64 => Some(true),
        Value::XNan64 => Some(false),
        Value::FltCon64(bits) => Some(f64::from_bits(*bits).is_nan()),
        _ => None,
    }
}

fn ptr_family(v: &Value) -> bool {
    matches!(v, Value::Null | Value::XNull | Value::Ptr | Value::PtrCon(_))
}

fn mem_family(v: &Value) -> bool {
    matches!(v, Value::AllMem | Value::AnyMem | Value::MemSlice(_))
}

struct DisplayValue<'a> {
    u: &'a Universe,
    id: ValueId,
}

impl fmt::Display for DisplayValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.u.get(self.id) {
            Value::Top => f.write_str("top"),
            Value::Bot => f.write_str("bot"),
            Value::Int(i) if i.is_constant() => write!(f, "{}", i.min),
            Value::Int(i) => write!(f, "[{}, {}]", i.min, i.max),
            Value::Flt32 => f.write_str("f32"),
            Value::Flt64 => f.write_str("f64"),
            Value::Nan32 | Value::Nan64 => f.write_str("nan"),
            Value::XNan32 | Value::XNan64 => f.write_str("~nan"),
            Value::FltCon32(bits) => write!(f, "{}f", f32::from_bits(*bits)),
            Value::FltCon64(bits) => write!(f, "{}", f64::from_bits(*bits)),
            Value::Null => f.write_str("null"),
            Value::XNull => f.write_str("~null"),
            Value::Ptr => f.write_str("ptr"),
            Value::PtrCon(s) => write!(f, "&sym{}", s.0),
            Value::Ctrl => f.write_str("ctrl"),
            Value::XCtrl => f.write_str("~ctrl"),
            Value::AllMem => f.write_str("allmem"),
            Value::AnyMem => f.write_str("anymem"),
            Value::MemSlice(_) => f.write_str("mem{..}"),
            Value::Tuple(xs) => {
                f.write_str("(")?;
                for (i, x) in xs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", self.u.display(*x))?;
                }
                f.write_str(")")
            }
        }
    }
}

#[cfg(test)]
mod tests;
