//! The incremental peephole loop.
//!
//! Each dirty node goes through the same gauntlet: structural idealization
//! to a local fixed point, a lattice transfer (folding to a constant when
//! the value collapses to a singleton), identity replacement, and finally
//! global value numbering. Every graph change marks the affected users
//! dirty again, so the loop runs until the whole function is stable.
//!
//! All mutations flow through [`Engine`] wrappers that pull nodes out of
//! the GVN table *before* their hashed fields change; skipping that step
//! corrupts the table, which is why `ideal.rs` never touches the function
//! directly for edge surgery.

use tracing::{debug, trace};

use riptide_ir::{DataType, Function, NodeId, Op, Payload, ScratchPool, Singleton, Worklist};

use crate::error::OptError;
use crate::gvn::GvnTable;
use crate::{ideal, identity, transfer};

/// How hard the peephole loop tries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OptLevel {
    /// One pass over the graph, no re-queuing of users.
    None,
    /// Run to a fixed point.
    #[default]
    Normal,
    /// Fixed point now, plus a second peephole+GCM round after
    /// instruction selection (driven by the backend pipeline).
    Aggressive,
}

/// Rewrite counters, mostly for tests and logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OptStats {
    /// Structural rewrites performed by `idealize`.
    pub idealized: usize,
    /// Nodes replaced by an existing equal-valued node.
    pub identities: usize,
    /// Nodes merged into an existing congruence class.
    pub gvn_hits: usize,
    /// Nodes replaced by constants out of the lattice.
    pub folded: usize,
    /// Dead nodes collected.
    pub killed: usize,
}

impl OptStats {
    /// Total graph rewrites (everything except garbage collection).
    pub fn rewrites(&self) -> usize {
        self.idealized + self.identities + self.gvn_hits + self.folded
    }
}

/// Shared mutable state of one peephole run.
pub(crate) struct Engine {
    pub(crate) work: Worklist,
    pub(crate) gvn: GvnTable,
    scratch: ScratchPool,
    requeue: bool,
    stats: OptStats,
}

impl Engine {
    fn new(requeue: bool) -> Self {
        Engine {
            work: Worklist::new(),
            gvn: GvnTable::new(),
            scratch: ScratchPool::new(),
            requeue,
            stats: OptStats::default(),
        }
    }

    /// GVN-safe edge update: the node leaves its congruence class before
    /// the edge moves.
    pub(crate) fn set_input(&mut self, f: &mut Function, n: NodeId, slot: usize, v: Option<NodeId>) {
        self.gvn.remove(f, n);
        let old = f.input(n, slot);
        f.set_input(n, slot, v);
        if let Some(o) = old {
            // May have just lost its last user.
            self.work.push(o);
        }
        self.work.push(n);
    }

    /// GVN-safe input deletion (region/phi arm removal).
    pub(crate) fn remove_input(&mut self, f: &mut Function, n: NodeId, slot: usize) {
        self.gvn.remove(f, n);
        if let Some(o) = f.input(n, slot) {
            self.work.push(o);
        }
        f.remove_input(n, slot);
        self.work.push(n);
    }

    /// Replaces `old` with `new` everywhere and collects `old`.
    pub(crate) fn subsume(&mut self, f: &mut Function, old: NodeId, new: NodeId) {
        trace!(%old, %new, "subsume");
        let mut touched = self.scratch.get();
        touched.extend(f.users(old).iter().map(|u| u.node));
        for &u in &touched {
            self.gvn.remove(f, u);
            self.push(u);
        }
        touched.clear();
        touched.extend(f.inputs(old).iter().flatten().copied());
        for &i in &touched {
            self.push(i);
        }
        self.scratch.recycle(touched);
        self.gvn.remove(f, old);
        f.subsume(old, new);
        self.work.push(new);
    }

    /// Unwires and tombstones a node with no users.
    pub(crate) fn kill(&mut self, f: &mut Function, n: NodeId) {
        let inputs: Vec<NodeId> = f.inputs(n).iter().flatten().copied().collect();
        for i in inputs {
            self.push(i);
        }
        self.gvn.remove(f, n);
        f.kill(n);
        self.stats.killed += 1;
    }

    fn push(&mut self, n: NodeId) {
        if self.requeue {
            self.work.push(n);
        }
    }

    fn mark_users_dirty(&mut self, f: &Function, n: NodeId) {
        if !self.requeue {
            return;
        }
        let mut users = self.scratch.get();
        users.extend(f.users(n).iter().map(|u| u.node));
        for &u in &users {
            self.work.push(u);
        }
        self.scratch.recycle(users);
    }
}

/// Runs the peephole loop over `f` until nothing changes (or once, at
/// [`OptLevel::None`]).
pub fn optimize(f: &mut Function, level: OptLevel) -> Result<OptStats, OptError> {
    let mut eng = Engine::new(level != OptLevel::None);

    // Seed with every live node; creation order puts defs before most
    // uses, which converges faster but is not required for correctness.
    let ids: Vec<NodeId> = f.live_ids().collect();
    for n in ids {
        eng.work.push(n);
    }

    while let Some(n) = eng.work.pop() {
        if f.is_dead(n) {
            continue;
        }
        if f.over_budget() {
            let live = f.live_ids().count();
            return Err(OptError::ResourceExhausted {
                limit: f.node_budget(),
                live,
            });
        }
        visit(f, &mut eng, n);
    }

    let returns = core::mem::take(&mut f.returns);
    f.returns = returns.into_iter().filter(|&r| !f.is_dead(r)).collect();
    debug!(
        name = %f.name,
        rewrites = eng.stats.rewrites(),
        killed = eng.stats.killed,
        "peephole fixed point"
    );
    debug_assert_eq!(f.verify_edges(), Ok(()));
    Ok(eng.stats)
}

fn visit(f: &mut Function, eng: &mut Engine, n: NodeId) {
    // Garbage: no users and nothing the outside world can observe.
    if f.users(n).is_empty() && is_collectable(f, n) {
        eng.kill(f, n);
        return;
    }

    // Idealize until this node stops changing shape.
    let mut cur = n;
    loop {
        let Some(k) = ideal::idealize(f, eng, cur) else {
            break;
        };
        eng.stats.idealized += 1;
        eng.mark_users_dirty(f, cur);
        if k != cur {
            eng.subsume(f, cur, k);
            push_untyped(f, eng, k);
            cur = k;
        }
        if f.is_dead(cur) {
            return;
        }
    }
    if f.is_dead(cur) {
        return;
    }

    // Lattice transfer; singletons become constant nodes on the spot.
    let dt = f.dt(cur);
    let old = f.value_of(cur);
    let mut t = transfer::dataflow(f, cur);
    t = f.universe.apply_widening(old, t, dt);
    if dt.is_value() && !is_const_op(f.op(cur)) {
        if let Some(single) = f.universe.singleton(t) {
            let c = materialize(f, single, dt);
            let _ = f.set_value(c, t);
            eng.stats.folded += 1;
            trace!(node = %cur, value = %f.universe.display(t), "folded to constant");
            eng.mark_users_dirty(f, cur);
            eng.subsume(f, cur, c);
            return;
        }
    }
    if f.set_value(cur, t) {
        eng.mark_users_dirty(f, cur);
    }

    // Same value under a different shape?
    let k = identity::identity(f, cur);
    if k != cur {
        eng.stats.identities += 1;
        eng.mark_users_dirty(f, cur);
        eng.subsume(f, cur, k);
        return;
    }

    // Canonicalize against the congruence classes.
    let g = eng.gvn.intern(f, cur);
    if g != cur {
        eng.stats.gvn_hits += 1;
        eng.mark_users_dirty(f, cur);
        eng.subsume(f, cur, g);
    }
}

/// A userless node may be collected when it has no observable effect, or
/// when its effect can never run: a branch whose successors all went away,
/// or any effectful node whose control is provably unreachable.
fn is_collectable(f: &mut Function, n: NodeId) -> bool {
    let op = f.op(n);
    if n == f.start {
        return false;
    }
    if !op.has_effect() {
        return true;
    }
    if op == Op::Branch {
        return true;
    }
    match f.input(n, 0) {
        Some(ctrl) => {
            f.is_dead(ctrl) || {
                let v = f.value_of(ctrl);
                v == riptide_ir::Universe::XCTRL
            }
        }
        None => false,
    }
}

fn is_const_op(op: Op) -> bool {
    matches!(op, Op::IntConst | Op::FloatConst | Op::Symbol)
}

fn materialize(f: &mut Function, s: Singleton, dt: DataType) -> NodeId {
    match s {
        Singleton::Int(v) => f.new_node(Op::IntConst, dt, 1, Payload::Int(v)),
        Singleton::F32(bits) => f.new_node(Op::FloatConst, dt, 1, Payload::F32(bits)),
        Singleton::F64(bits) => f.new_node(Op::FloatConst, dt, 1, Payload::F64(bits)),
        Singleton::Null => f.new_node(Op::IntConst, DataType::Ptr, 1, Payload::Int(0)),
        Singleton::Symbol(sym) => f.new_node(Op::Symbol, DataType::Ptr, 1, Payload::Symbol(sym)),
    }
}

/// Nodes freshly created inside `idealize` have no recorded lattice value
/// yet; queue them (and their untyped inputs) so they get typed and
/// value-numbered like everything else.
fn push_untyped(f: &Function, eng: &mut Engine, n: NodeId) {
    eng.work.push(n);
    let mut stack = vec![n];
    while let Some(m) = stack.pop() {
        for input in f.inputs(m).iter().flatten() {
            if f.peek_value(*input).is_none() && !eng.work.contains(*input) {
                eng.work.push(*input);
                stack.push(*input);
            }
        }
    }
}
