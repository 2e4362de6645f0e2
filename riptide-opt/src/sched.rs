//! Per-block list scheduling over the GCM placement.
//!
//! Within a block the order must respect data dependence, memory order
//! (loads of a memory version before the store that retires it), phis at
//! the block entry, and the terminator at the end. Ties go to pinned
//! nodes, then higher latency, then lower id, which keeps the output
//! deterministic.

use hashbrown::HashMap;
use itertools::Itertools;

use riptide_ir::{Function, NodeId, Op};

use crate::cfg::{BlockId, Cfg};
use crate::gcm::{global_code_motion, LatencyModel};

/// The scheduler's product: a block for every live node and a linear
/// order inside each block, ready for instruction selection.
#[derive(Debug)]
pub struct Schedule {
    /// The control-flow graph the placement refers to.
    pub cfg: Cfg,
    /// Owning block per node id; `None` for dead or unreachable nodes.
    pub block_of: Vec<Option<BlockId>>,
    /// Linear node order per block, heads and phis first, terminator last.
    pub order: Vec<Vec<NodeId>>,
}

impl Schedule {
    /// The block owning `n`, if it is scheduled at all.
    pub fn block_of(&self, n: NodeId) -> Option<BlockId> {
        self.block_of.get(n.index()).copied().flatten()
    }
}

/// Runs global code motion and the local scheduler.
pub fn schedule(f: &Function, cfg: Cfg, lat: &dyn LatencyModel) -> Schedule {
    let block_of = global_code_motion(f, &cfg, lat);

    let mut members: Vec<Vec<NodeId>> = vec![Vec::new(); cfg.blocks.len()];
    for n in f.live_ids() {
        if let Some(b) = block_of[n.index()] {
            members[b.index()].push(n);
        }
    }

    let order = members
        .iter()
        .enumerate()
        .map(|(b, nodes)| order_block(f, &cfg, BlockId(b as u32), nodes, lat))
        .collect();

    Schedule {
        cfg,
        block_of,
        order,
    }
}

fn order_block(
    f: &Function,
    cfg: &Cfg,
    b: BlockId,
    members: &[NodeId],
    lat: &dyn LatencyModel,
) -> Vec<NodeId> {
    let head = cfg.blocks[b.index()].head;
    let term = cfg.blocks[b.index()].terminator;

    let mut out = vec![head];
    // Phis conceptually execute on the incoming edges; list them right
    // after the head so later passes can lower them as parallel copies.
    let mut phis: Vec<NodeId> = members
        .iter()
        .copied()
        .filter(|&n| f.op(n) == Op::Phi)
        .collect();
    phis.sort();
    out.extend(&phis);

    let body: Vec<NodeId> = members
        .iter()
        .copied()
        .filter(|&n| n != head && Some(n) != term && f.op(n) != Op::Phi)
        .collect();

    // Dependency counting over the block-local subgraph.
    let mut indegree: HashMap<NodeId, usize> = body.iter().map(|&n| (n, 0)).collect();
    let mut succs: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
    let add_edge = |from: NodeId, to: NodeId,
                        indegree: &mut HashMap<NodeId, usize>,
                        succs: &mut HashMap<NodeId, Vec<NodeId>>| {
        if from == to {
            return;
        }
        if indegree.contains_key(&to) && indegree.contains_key(&from) {
            succs.entry(from).or_default().push(to);
            *indegree.get_mut(&to).expect("member") += 1;
        }
    };

    for &n in &body {
        for input in f.inputs(n).iter().flatten() {
            add_edge(*input, n, &mut indegree, &mut succs);
        }
        // Anti-dependence: whoever reads the memory version a store
        // consumes must be ordered before the store.
        if matches!(
            f.op(n),
            Op::Store | Op::Memcpy | Op::Memset | Op::AtomicXchg | Op::AtomicAdd
                | Op::AtomicAnd | Op::AtomicOr | Op::AtomicXor | Op::AtomicCas
        ) {
            if let Some(mem) = f.input(n, 1) {
                for u in f.users(mem) {
                    if u.node != n && f.op(u.node) == Op::Load {
                        add_edge(u.node, n, &mut indegree, &mut succs);
                    }
                }
            }
        }
    }

    // Ready-queue toposort with the deterministic tie-break.
    let mut ready: Vec<NodeId> = body
        .iter()
        .copied()
        .filter(|n| indegree[n] == 0)
        .collect();
    let mut emitted = 0usize;
    while !ready.is_empty() {
        let best = ready
            .iter()
            .position_min_by_key(|&&n| schedule_key(f, lat, n))
            .expect("ready set nonempty");
        let n = ready.swap_remove(best);
        out.push(n);
        emitted += 1;
        if let Some(next) = succs.get(&n) {
            for &s in next {
                let d = indegree.get_mut(&s).expect("member");
                *d -= 1;
                if *d == 0 {
                    ready.push(s);
                }
            }
        }
    }
    assert_eq!(
        emitted,
        body.len(),
        "scheduling cycle in {b} of {}",
        f.name
    );

    if let Some(t) = term {
        out.push(t);
    }
    out
}

/// Lower keys schedule first: pinned effects keep their chain order,
/// long-latency nodes start early, ids break the remaining ties.
fn schedule_key(f: &Function, lat: &dyn LatencyModel, n: NodeId) -> (u8, i64, u32) {
    let pinned = u8::from(!f.op(n).is_pinned());
    (pinned, -i64::from(lat.latency(f, n)), n.0)
}

#[cfg(test)]
mod tests;
