//! Global code motion: give every floating node a basic block.
//!
//! Pinned nodes are seeded from their control input. Everything else gets
//! an *early* bound (deepest block of its inputs) and a *late* bound (LCA
//! of its uses); the final placement walks the dominator chain between the
//! two, hoisting latency-heavy nodes out of loops and leaving cheap ones
//! next to their uses.

use tracing::trace;

use riptide_ir::{Function, NodeId, Op};

use crate::cfg::{BlockId, Cfg};

/// Expected latencies come from the target; nodes at or above this many
/// cycles are worth hoisting to a shallower loop depth.
pub const HOIST_THRESHOLD: u32 = 3;

/// Target-supplied cost estimate consumed by the scheduler.
pub trait LatencyModel {
    /// Expected cycles before the node's result is usable.
    fn latency(&self, f: &Function, n: NodeId) -> u32;
}

/// Uniform single-cycle model, used by tests and as a fallback.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnitLatency;

impl LatencyModel for UnitLatency {
    fn latency(&self, _f: &Function, _n: NodeId) -> u32 {
        1
    }
}

/// Computes the owning block of every live node; unreachable nodes get
/// `None` and silently drop out of the pipeline.
pub fn global_code_motion(
    f: &Function,
    cfg: &Cfg,
    lat: &dyn LatencyModel,
) -> Vec<Option<BlockId>> {
    let n = f.node_count();
    let mut place: Vec<Option<BlockId>> = vec![None; n];

    // Pinned nodes sit where their control says.
    for id in f.live_ids() {
        if f.op(id).is_pinned() {
            place[id.index()] = cfg.block_of_ctrl(f, id);
        }
    }

    // Early bound, postorder over inputs.
    let mut early: Vec<Option<BlockId>> = place.clone();
    for id in f.live_ids() {
        early_of(f, cfg, id, &mut early);
    }

    // Late bound and final placement, computed on demand over users.
    let mut state = GcmState {
        cfg,
        lat,
        early,
        place,
        in_progress: vec![false; n],
    };
    for id in f.live_ids() {
        state.place_node(f, id);
    }
    state.place
}

fn early_of(
    f: &Function,
    cfg: &Cfg,
    n: NodeId,
    early: &mut Vec<Option<BlockId>>,
) -> Option<BlockId> {
    if let Some(b) = early[n.index()] {
        return Some(b);
    }
    if f.is_dead(n) {
        return None;
    }
    // Inputs of a floating node never cycle, so plain recursion is safe.
    let mut best = cfg.entry();
    for i in 0..f.inputs(n).len() {
        let Some(input) = f.input(n, i) else { continue };
        let Some(b) = early_of(f, cfg, input, early) else {
            continue;
        };
        if cfg.blocks[b.index()].dom_depth > cfg.blocks[best.index()].dom_depth {
            best = b;
        }
    }
    early[n.index()] = Some(best);
    Some(best)
}

struct GcmState<'a> {
    cfg: &'a Cfg,
    lat: &'a dyn LatencyModel,
    early: Vec<Option<BlockId>>,
    place: Vec<Option<BlockId>>,
    in_progress: Vec<bool>,
}

impl GcmState<'_> {
    /// Final block of `n`, scheduling its users first.
    fn place_node(&mut self, f: &Function, n: NodeId) -> Option<BlockId> {
        if let Some(b) = self.place[n.index()] {
            return Some(b);
        }
        if f.is_dead(n) || f.op(n).is_pinned() {
            return self.place[n.index()];
        }
        if self.in_progress[n.index()] {
            // Only phis make the graph cyclic and phis are pinned.
            panic!("gcm found a data cycle through {n}");
        }
        self.in_progress[n.index()] = true;

        let mut late: Option<BlockId> = None;
        let users: Vec<riptide_ir::Use> = f.users(n).to_vec();
        for u in users {
            let ub = if f.op(u.node) == Op::Phi && u.slot >= 1 {
                // A phi reads its k-th value on the k-th incoming edge.
                let region = f.input(u.node, 0);
                region
                    .and_then(|r| f.input(r, u.slot as usize - 1))
                    .and_then(|pred| self.cfg.block_of_ctrl(f, pred))
            } else if f.op(u.node).is_pinned() {
                self.place[u.node.index()]
            } else {
                self.place_node(f, u.node)
            };
            let Some(ub) = ub else { continue };
            late = Some(match late {
                None => ub,
                Some(cur) => self.cfg.lca(cur, ub),
            });
        }
        self.in_progress[n.index()] = false;

        // No reachable user wants the value: it never gets a block and
        // silently drops out of the schedule.
        let late = late?;
        let early = self.early[n.index()].unwrap_or(self.cfg.entry());
        let chosen = self.choose(f, n, early, late);
        self.place[n.index()] = Some(chosen);
        Some(chosen)
    }

    /// Picks a block on the dominator chain `early..=late`.
    fn choose(&self, f: &Function, n: NodeId, early: BlockId, late: BlockId) -> BlockId {
        let mut best = late;
        if self.lat.latency(f, n) >= HOIST_THRESHOLD {
            // Worth hoisting: shallowest loop depth wins, latest placement
            // breaks ties.
            let mut cur = late;
            loop {
                if self.cfg.blocks[cur.index()].loop_depth
                    < self.cfg.blocks[best.index()].loop_depth
                {
                    best = cur;
                }
                if cur == early {
                    break;
                }
                let up = self.cfg.blocks[cur.index()].idom;
                if up == cur {
                    break;
                }
                cur = up;
            }
        }
        if best != late {
            trace!(node = %n, from = %late, to = %best, "hoisted");
        }
        best
    }
}
