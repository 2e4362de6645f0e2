//! Global value numbering: one canonical node per congruence class.
//!
//! The table never owns node data — it stores ids and hashes/compares
//! through the function, mirroring how the node arena already owns
//! everything. A node's hash covers exactly the fields that determine its
//! value: opcode, data type, input ids and the payload bytes.
//!
//! Nodes must be removed *before* any of those fields change; the engine's
//! mutation wrappers enforce that. A membership bit per node catches the
//! cases where that discipline breaks, which would otherwise corrupt the
//! table silently.

use std::hash::{BuildHasher, Hash, Hasher};

use hashbrown::hash_map::DefaultHashBuilder;
use hashbrown::hash_table::{Entry, HashTable};

use riptide_ir::{BitSet, Function, NodeId};

/// Hash set of canonical nodes keyed by structural value.
#[derive(Debug, Default)]
pub struct GvnTable {
    table: HashTable<NodeId>,
    members: BitSet,
    build_hasher: DefaultHashBuilder,
}

fn node_hash<H: BuildHasher>(build: &H, f: &Function, n: NodeId) -> u64 {
    let node = f.node(n);
    let mut h = build.build_hasher();
    node.op.hash(&mut h);
    node.dt.hash(&mut h);
    node.inputs().hash(&mut h);
    node.payload.hash(&mut h);
    h.finish()
}

fn node_eq(f: &Function, a: NodeId, b: NodeId) -> bool {
    let (x, y) = (f.node(a), f.node(b));
    x.op == y.op && x.dt == y.dt && x.inputs() == y.inputs() && x.payload == y.payload
}

impl GvnTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of canonical nodes currently interned.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Is the table empty?
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Is `n` the canonical member for its class right now?
    pub fn contains(&self, n: NodeId) -> bool {
        self.members.contains(n.0)
    }

    /// Looks up the congruence class of `n`, inserting it as canonical if
    /// the class is new. Returns the canonical node; when that is not `n`,
    /// the caller subsumes `n` with it.
    ///
    /// `LOCAL`s and effectful nodes are identity-significant and pass
    /// through untouched.
    pub fn intern(&mut self, f: &Function, n: NodeId) -> NodeId {
        if f.op(n).is_gvn_exempt() {
            return n;
        }
        if self.members.contains(n.0) {
            return n;
        }
        let hash = node_hash(&self.build_hasher, f, n);
        let entry = self.table.entry(
            hash,
            |&m| node_eq(f, m, n),
            |&m| node_hash(&self.build_hasher, f, m),
        );
        match entry {
            Entry::Occupied(hit) => *hit.get(),
            Entry::Vacant(slot) => {
                slot.insert(n);
                self.members.insert(n.0);
                n
            }
        }
    }

    /// Drops `n` from the table if it is interned. Must run before any
    /// hashed field of `n` changes.
    pub fn remove(&mut self, f: &Function, n: NodeId) {
        if !self.members.contains(n.0) {
            return;
        }
        let hash = node_hash(&self.build_hasher, f, n);
        match self.table.find_entry(hash, |&m| m == n) {
            Ok(hit) => {
                let _ = hit.remove();
                self.members.remove(n.0);
            }
            Err(_) => {
                // The membership bit says it is here but the hash walk
                // missed: a field mutated while interned.
                panic!("GVN table desync on {n}: node mutated while interned");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use riptide_ir::{DataType, Op, Payload, Prototype, SymbolId};

    fn graph() -> Function {
        Function::new("t", SymbolId(0), Prototype::default())
    }

    #[test]
    fn congruent_nodes_share_a_class() {
        let mut f = graph();
        let a = f.new_node(Op::IntConst, DataType::I32, 1, Payload::Int(7));
        let b = f.new_node(Op::IntConst, DataType::I32, 1, Payload::Int(7));
        let c = f.new_node(Op::IntConst, DataType::I32, 1, Payload::Int(8));

        let mut t = GvnTable::new();
        assert_eq!(t.intern(&f, a), a);
        assert_eq!(t.intern(&f, b), a, "same value, same class");
        assert_eq!(t.intern(&f, c), c, "different payload");
        assert!(t.contains(a) && !t.contains(b));
    }

    #[test]
    fn inputs_participate_in_the_key() {
        let mut f = graph();
        let x = f.new_node(Op::IntConst, DataType::I32, 1, Payload::Int(1));
        let y = f.new_node(Op::IntConst, DataType::I32, 1, Payload::Int(2));
        let add1 = f.node_with_inputs(Op::Add, DataType::I32, &[None, Some(x), Some(y)], Payload::None);
        let add2 = f.node_with_inputs(Op::Add, DataType::I32, &[None, Some(x), Some(y)], Payload::None);
        let add3 = f.node_with_inputs(Op::Add, DataType::I32, &[None, Some(y), Some(x)], Payload::None);

        let mut t = GvnTable::new();
        let canon = t.intern(&f, add1);
        assert_eq!(t.intern(&f, add2), canon);
        assert_eq!(t.intern(&f, add3), add3, "operand order is part of the key");
    }

    #[test]
    fn locals_are_exempt() {
        let mut f = graph();
        let info = riptide_ir::LocalInfo {
            size: 4,
            align: 4,
            tls: false,
            name: None,
        };
        let a = f.new_node(Op::Local, DataType::Ptr, 1, Payload::Local(info.clone()));
        let b = f.new_node(Op::Local, DataType::Ptr, 1, Payload::Local(info));

        let mut t = GvnTable::new();
        assert_eq!(t.intern(&f, a), a);
        assert_eq!(t.intern(&f, b), b, "identical locals stay distinct");
        assert!(!t.contains(a));
    }

    #[test]
    fn remove_frees_the_class() {
        let mut f = graph();
        let a = f.new_node(Op::IntConst, DataType::I32, 1, Payload::Int(7));
        let b = f.new_node(Op::IntConst, DataType::I32, 1, Payload::Int(7));

        let mut t = GvnTable::new();
        t.intern(&f, a);
        t.remove(&f, a);
        assert!(!t.contains(a));
        assert_eq!(t.intern(&f, b), b, "class is open again");
    }
}
