//! Per-function node storage and the three graph mutators.
//!
//! Every edge mutation goes through [`Function::set_input`],
//! [`Function::subsume`] or [`Function::kill`] so the user lists stay the
//! exact mirror of the input edges. The rewrite engine's soundness rests on
//! that mirror; [`Function::verify_edges`] checks it after the fact.

use core::mem;

use crate::arena::Arena;
use crate::dt::DataType;
use crate::lattice::{Universe, ValueId};
use crate::module::{Prototype, SectionId, SymbolId};
use crate::node::{Node, NodeId, Payload, Use};
use crate::op::Op;

/// Default ceiling on nodes per function before compilation reports
/// resource exhaustion.
pub const DEFAULT_NODE_BUDGET: usize = 1 << 20;

/// One function's sea of nodes plus its dense side tables.
#[derive(Debug)]
pub struct Function {
    /// Link-time name.
    pub name: String,
    /// The module symbol this function defines.
    pub sym: SymbolId,
    /// Signature.
    pub proto: Prototype,
    /// Section the code lands in.
    pub section: SectionId,
    /// The unique START node.
    pub start: NodeId,
    /// Lattice intern table for this function.
    pub universe: Universe,
    /// All RETURN nodes created so far.
    pub returns: Vec<NodeId>,
    nodes: Arena<Node>,
    types: Vec<Option<ValueId>>,
    node_budget: usize,
}

impl Function {
    /// A fresh function containing only its START node.
    pub fn new(name: impl Into<String>, sym: SymbolId, proto: Prototype) -> Self {
        let mut f = Function {
            name: name.into(),
            sym,
            proto,
            section: SectionId::Text,
            start: NodeId(0),
            universe: Universe::new(),
            returns: Vec::new(),
            nodes: Arena::new(),
            types: Vec::new(),
            node_budget: DEFAULT_NODE_BUDGET,
        };
        f.start = f.new_node(Op::Start, DataType::Tuple, 0, Payload::None);
        f
    }

    /// Overrides the node budget (resource-exhaustion limit).
    pub fn set_node_budget(&mut self, budget: usize) {
        self.node_budget = budget;
    }

    /// Has the function outgrown its configured budget?
    pub fn over_budget(&self) -> bool {
        self.nodes.len() > self.node_budget
    }

    /// The configured node ceiling.
    pub fn node_budget(&self) -> usize {
        self.node_budget
    }

    /// Total ids handed out, dead ones included (side tables size to this).
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Read access to a node.
    pub fn node(&self, id: NodeId) -> &Node {
        self.nodes.get(id.0)
    }

    /// The opcode of `id`.
    pub fn op(&self, id: NodeId) -> Op {
        self.node(id).op
    }

    /// The data type of `id`.
    pub fn dt(&self, id: NodeId) -> DataType {
        self.node(id).dt
    }

    /// Input edge `i` of `id`.
    pub fn input(&self, id: NodeId, i: usize) -> Option<NodeId> {
        self.node(id).inputs[i]
    }

    /// All input edges of `id`.
    pub fn inputs(&self, id: NodeId) -> &[Option<NodeId>] {
        &self.node(id).inputs
    }

    /// The user list of `id`.
    pub fn users(&self, id: NodeId) -> &[Use] {
        &self.node(id).users
    }

    /// Is `id` a tombstone?
    pub fn is_dead(&self, id: NodeId) -> bool {
        self.op(id) == Op::Dead
    }

    /// Iterates the ids of all live nodes.
    pub fn live_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len() as u32)
            .map(NodeId)
            .filter(|&id| !self.is_dead(id))
    }

    /// Allocates a node with `input_count` empty slots.
    pub fn new_node(&mut self, op: Op, dt: DataType, input_count: usize, payload: Payload) -> NodeId {
        let id = self.nodes.alloc(Node {
            op,
            dt,
            inputs: vec![None; input_count],
            users: Vec::new(),
            payload,
        });
        NodeId(id)
    }

    /// Allocates a node and wires every input in one go.
    pub fn node_with_inputs(
        &mut self,
        op: Op,
        dt: DataType,
        inputs: &[Option<NodeId>],
        payload: Payload,
    ) -> NodeId {
        let n = self.new_node(op, dt, inputs.len(), payload);
        for (i, &v) in inputs.iter().enumerate() {
            self.set_input(n, i, v);
        }
        n
    }

    /// Replaces the payload of `id`.
    pub fn set_payload(&mut self, id: NodeId, payload: Payload) {
        self.nodes.get_mut(id.0).payload = payload;
    }

    /// Points `n.inputs[slot]` at `v`, maintaining both user lists.
    /// `None` disconnects the slot.
    pub fn set_input(&mut self, n: NodeId, slot: usize, v: Option<NodeId>) {
        let old = self.nodes.get(n.0).inputs[slot];
        if old == v {
            return;
        }
        if let Some(o) = old {
            self.detach_user(o, n, slot as u32);
        }
        self.nodes.get_mut(n.0).inputs[slot] = v;
        if let Some(nv) = v {
            self.nodes.get_mut(nv.0).users.push(Use {
                node: n,
                slot: slot as u32,
            });
        }
    }

    /// Appends a new input slot to `n` (regions and phis grow this way).
    pub fn add_input(&mut self, n: NodeId, v: Option<NodeId>) -> usize {
        let slot = self.nodes.get(n.0).inputs.len();
        self.nodes.get_mut(n.0).inputs.push(None);
        self.set_input(n, slot, v);
        slot
    }

    /// Deletes input slot `slot` of `n`, shifting later slots down and
    /// re-numbering their user-list entries.
    pub fn remove_input(&mut self, n: NodeId, slot: usize) {
        if let Some(o) = self.nodes.get(n.0).inputs[slot] {
            self.detach_user(o, n, slot as u32);
        }
        self.nodes.get_mut(n.0).inputs.remove(slot);
        let count = self.nodes.get(n.0).inputs.len();
        for j in slot..count {
            if let Some(v) = self.nodes.get(n.0).inputs[j] {
                let entry = self.find_user(v, n, j as u32 + 1);
                self.nodes.get_mut(v.0).users[entry].slot = j as u32;
            }
        }
    }

    /// Migrates every user of `old` onto `new`, then kills `old`.
    pub fn subsume(&mut self, old: NodeId, new: NodeId) {
        assert_ne!(old, new, "subsume of {old} with itself");
        let users = mem::take(&mut self.nodes.get_mut(old.0).users);
        for u in &users {
            debug_assert_eq!(
                self.nodes.get(u.node.0).inputs[u.slot as usize],
                Some(old),
                "user list desync at {} slot {}",
                u.node,
                u.slot
            );
            self.nodes.get_mut(u.node.0).inputs[u.slot as usize] = Some(new);
        }
        self.nodes.get_mut(new.0).users.extend(users);
        self.kill(old);
    }

    /// Unwires and tombstones `n`. The id is not reused.
    ///
    /// Calling this on a node with live users is an internal invariant
    /// violation and aborts.
    pub fn kill(&mut self, n: NodeId) {
        assert!(
            self.nodes.get(n.0).users.is_empty(),
            "kill of {n} which still has users"
        );
        for slot in 0..self.nodes.get(n.0).inputs.len() {
            self.set_input(n, slot, None);
        }
        let node = self.nodes.get_mut(n.0);
        node.inputs.clear();
        node.op = Op::Dead;
        node.dt = DataType::Void;
        node.payload = Payload::None;
    }

    fn find_user(&self, owner: NodeId, user: NodeId, slot: u32) -> usize {
        self.nodes
            .get(owner.0)
            .users
            .iter()
            .position(|u| u.node == user && u.slot == slot)
            .unwrap_or_else(|| panic!("user list desync: {owner} missing ({user}, {slot})"))
    }

    fn detach_user(&mut self, owner: NodeId, user: NodeId, slot: u32) {
        let at = self.find_user(owner, user, slot);
        self.nodes.get_mut(owner.0).users.swap_remove(at);
    }

    /// The recorded lattice value of `n`, initializing from the node's
    /// data type on first read.
    pub fn value_of(&mut self, n: NodeId) -> ValueId {
        if self.types.len() <= n.index() {
            self.types.resize(self.nodes.len(), None);
        }
        match self.types[n.index()] {
            Some(v) => v,
            None => {
                let dt = self.dt(n);
                let v = self.universe.from_dt(dt);
                self.types[n.index()] = Some(v);
                v
            }
        }
    }

    /// The recorded lattice value without materializing a default.
    pub fn peek_value(&self, n: NodeId) -> Option<ValueId> {
        self.types.get(n.index()).copied().flatten()
    }

    /// Records `v` for `n`; returns whether the entry changed.
    pub fn set_value(&mut self, n: NodeId, v: ValueId) -> bool {
        if self.types.len() <= n.index() {
            self.types.resize(self.nodes.len(), None);
        }
        let changed = self.types[n.index()] != Some(v);
        self.types[n.index()] = Some(v);
        changed
    }

    /// Checks the edge/user-list mirror invariant over the whole graph.
    ///
    /// Returns a description of the first violation found. Used by tests
    /// and by debug builds of the rewrite engine.
    pub fn verify_edges(&self) -> Result<(), String> {
        for n in self.live_ids() {
            for (i, &input) in self.inputs(n).iter().enumerate() {
                let Some(v) = input else { continue };
                let hits = self
                    .users(v)
                    .iter()
                    .filter(|u| u.node == n && u.slot == i as u32)
                    .count();
                if hits != 1 {
                    return Err(format!(
                        "edge {n}.inputs[{i}] = {v} has {hits} user entries"
                    ));
                }
            }
            for u in self.users(n) {
                if self.node(u.node).inputs.get(u.slot as usize) != Some(&Some(n)) {
                    return Err(format!(
                        "user entry ({}, {}) of {n} does not point back",
                        u.node, u.slot
                    ));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests;
