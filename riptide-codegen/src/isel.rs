//! Machine-independent instruction-selection driver.
//!
//! Walks each block's scheduled nodes in reverse so consumers run before
//! producers: by the time a constant, compare or address node is visited,
//! every user has already either folded it into a tile (leaving it with no
//! virtual register) or requested it in a register. PHIs lower to parallel
//! copies on the incoming edges, sequentialized with a cycle-breaking
//! temporary.

use hashbrown::HashMap;
use tracing::trace;

use riptide_ir::{BitSet, Function, NodeId, Op};
use riptide_opt::{BlockId, Schedule};

use crate::error::CompileError;
use crate::target::Target;
use crate::tile::{Operand, RegClass, RegMask, Tile, TileList, VReg};

/// Instruction-selection context handed to the target.
pub struct Sel<'a, T: Target> {
    /// The function being lowered.
    pub f: &'a Function,
    /// Placement and order from the scheduler.
    pub sched: &'a Schedule,
    /// The block currently being lowered.
    pub block: BlockId,
    /// Runtime TLS index symbol, when the driver configured one.
    pub tls_index: Option<riptide_ir::SymbolId>,
    target: &'a T,
    vregs: HashMap<NodeId, VReg>,
    classes: Vec<RegClass>,
    consumed: BitSet,
    pending: Vec<Tile<T::Op>>,
    cur: Vec<Tile<T::Op>>,
}

impl<'a, T: Target> Sel<'a, T> {
    /// The virtual register holding `n`'s value, allocating one on first
    /// request. Requesting a register is what forces a definition tile
    /// when the producer is visited later.
    pub fn vreg_of(&mut self, n: NodeId) -> VReg {
        if let Some(&v) = self.vregs.get(&n) {
            return v;
        }
        let class = self.target.reg_class(self.f.dt(n));
        let v = self.fresh(class);
        self.vregs.insert(n, v);
        v
    }

    /// Has anyone requested `n` in a register?
    pub fn has_vreg(&self, n: NodeId) -> bool {
        self.vregs.contains_key(&n)
    }

    /// A brand new virtual register of `class`.
    pub fn fresh(&mut self, class: RegClass) -> VReg {
        let v = VReg(self.classes.len() as u32);
        self.classes.push(class);
        v
    }

    /// The class of an allocated vreg.
    pub fn class_of(&self, v: VReg) -> RegClass {
        self.classes[v.index()]
    }

    /// The allocatable mask for `n`'s type.
    pub fn any_mask(&self, n: NodeId) -> RegMask {
        let class = self.target.reg_class(self.f.dt(n));
        self.class_mask(class)
    }

    /// The allocatable mask for a class.
    pub fn class_mask(&self, class: RegClass) -> RegMask {
        RegMask {
            class,
            bits: self.target.allocatable(class),
        }
    }

    /// Appends a tile in program order. All tiles emitted while selecting
    /// one node stay together; the driver slots the group in front of the
    /// consumers already selected.
    pub fn emit(&mut self, tile: Tile<T::Op>) {
        self.pending.push(tile);
    }

    /// Appends a sequence given in program order.
    pub fn emit_all(&mut self, tiles: Vec<Tile<T::Op>>) {
        self.pending.extend(tiles);
    }

    /// Marks `n` as folded into the current tile; the driver will skip it.
    pub fn mark_consumed(&mut self, n: NodeId) {
        self.consumed.insert(n.0);
    }

    /// Was `n` folded into some consumer already?
    pub fn is_consumed(&self, n: NodeId) -> bool {
        self.consumed.contains(n.0)
    }

    /// The single user of `n`, if there is exactly one.
    pub fn only_user(&self, n: NodeId) -> Option<NodeId> {
        match self.f.users(n) {
            [u] => Some(u.node),
            _ => None,
        }
    }

    /// Is `n` in the same block as the current one and scheduled?
    pub fn in_current_block(&self, n: NodeId) -> bool {
        self.sched.block_of(n) == Some(self.block)
    }

    /// Moves the current node's tile group onto the (reversed) block list;
    /// returns how many tiles the group held.
    fn flush_pending(&mut self) -> usize {
        let count = self.pending.len();
        while let Some(t) = self.pending.pop() {
            self.cur.push(t);
        }
        count
    }
}

/// Output of selection plus bookkeeping the later stages need.
pub struct Selection<O> {
    /// The tile stream.
    pub list: TileList<O>,
    /// Register class per virtual register.
    pub classes: Vec<RegClass>,
    /// Tiles at the tail of each block that belong to the terminator;
    /// edge copies must stay in front of them.
    pub term_len: Vec<usize>,
}

/// Runs instruction selection over the whole schedule.
pub fn select_function<T: Target>(
    f: &Function,
    sched: &Schedule,
    target: &T,
    tls_index: Option<riptide_ir::SymbolId>,
) -> Result<Selection<T::Op>, CompileError> {
    let mut ctx = Sel {
        f,
        sched,
        block: BlockId(0),
        tls_index,
        target,
        vregs: HashMap::new(),
        classes: Vec::new(),
        consumed: BitSet::new(),
        pending: Vec::new(),
        cur: Vec::new(),
    };

    let block_count = sched.cfg.blocks.len();
    let mut tiles: Vec<Vec<Tile<T::Op>>> = (0..block_count).map(|_| Vec::new()).collect();
    let mut term_len = vec![0usize; block_count];

    // PHI results and their arm values travel between blocks in registers,
    // so they must have vregs before any block is lowered — a producer
    // with a requested vreg always emits its definition tile.
    for &b in &sched.cfg.rpo {
        for &n in &sched.order[b.index()] {
            if f.op(n) == Op::Phi {
                let _ = ctx.vreg_of(n);
                let arms: Vec<NodeId> = f.inputs(n)[1..].iter().flatten().copied().collect();
                for arm in arms {
                    let _ = ctx.vreg_of(arm);
                }
            }
        }
    }

    for &b in &sched.cfg.rpo {
        ctx.block = b;
        ctx.cur = Vec::new();
        let order = &sched.order[b.index()];
        let term = sched.cfg.blocks[b.index()].terminator;

        // A block that just falls into its successor still ends with an
        // explicit jump tile; the emitter drops it when the layout makes
        // it redundant.
        if term.is_none() {
            if let [succ] = sched.cfg.blocks[b.index()].succs[..] {
                ctx.emit(target.jump_tile(succ));
                ctx.flush_pending();
                term_len[b.index()] = 1;
            }
        }

        for &n in order.iter().rev() {
            if ctx.is_consumed(n) || skip_op(f.op(n)) {
                continue;
            }
            target.select(&mut ctx, n)?;
            let emitted = ctx.flush_pending();
            if Some(n) == term {
                term_len[b.index()] = emitted;
            }
        }
        ctx.cur.reverse();
        tiles[b.index()] = core::mem::take(&mut ctx.cur);
    }

    // PHI lowering: parallel copies on each incoming edge, placed in the
    // predecessor just ahead of its terminator tiles.
    for &b in &sched.cfg.rpo {
        let phis: Vec<NodeId> = sched.order[b.index()]
            .iter()
            .copied()
            .filter(|&n| f.op(n) == Op::Phi && ctx.vregs.contains_key(&n))
            .collect();
        if phis.is_empty() {
            continue;
        }
        // Resolve each incoming edge to its source block directly; the
        // k-th region input carries the k-th phi arm.
        let region = sched.cfg.blocks[b.index()].head;
        let arm_count = f.inputs(region).len();
        for k in 0..arm_count {
            let Some(pred_node) = f.input(region, k) else {
                continue;
            };
            let Some(p) = sched.cfg.block_of_ctrl(f, pred_node) else {
                continue;
            };
            let mut copies: Vec<(VReg, VReg)> = Vec::new();
            for &phi in &phis {
                let Some(value) = f.input(phi, k + 1) else {
                    continue;
                };
                let dst = ctx.vreg_of(phi);
                let src = ctx.vreg_of(value);
                if dst != src {
                    copies.push((dst, src));
                }
            }
            let seq = sequentialize(&mut ctx, &copies);
            let at = tiles[p.index()].len() - term_len[p.index()];
            for (i, (dst, src)) in seq.into_iter().enumerate() {
                let class = ctx.class_of(dst);
                let mask = RegMask {
                    class,
                    bits: target.allocatable(class),
                };
                let tile = target.copy_tile(dst, src, mask);
                tiles[p.index()].insert(at + i, tile);
                trace!(%dst, %src, block = %p, "phi edge copy");
            }
        }
    }

    let layout = sched.cfg.rpo.clone();
    Ok(Selection {
        list: TileList { layout, tiles },
        classes: ctx.classes,
        term_len,
    })
}

/// Orders a parallel copy set so every source is read before its register
/// is overwritten, inserting one temporary per cycle.
fn sequentialize<T: Target>(ctx: &mut Sel<'_, T>, copies: &[(VReg, VReg)]) -> Vec<(VReg, VReg)> {
    let mut pending: Vec<(VReg, VReg)> = copies.to_vec();
    let mut out = Vec::with_capacity(pending.len());
    while !pending.is_empty() {
        if let Some(i) = pending
            .iter()
            .position(|&(d, _)| pending.iter().all(|&(_, s)| s != d))
        {
            out.push(pending.swap_remove(i));
            continue;
        }
        // Only cycles remain: save one destination and retarget its
        // readers to the saved value.
        let (d, _) = pending[0];
        let t = ctx.fresh(ctx.class_of(d));
        out.push((t, d));
        for (_, s) in pending.iter_mut() {
            if *s == d {
                *s = t;
            }
        }
    }
    out
}

/// Nodes the driver never hands to the target.
fn skip_op(op: Op) -> bool {
    matches!(
        op,
        Op::Start | Op::Region | Op::Phi | Op::MergeMem | Op::Dead
    )
}

/// Shorthand for building a copy operand pair with one mask.
pub fn copy_operands(dst: VReg, src: VReg, mask: RegMask) -> (Operand, Operand) {
    (Operand::new(dst, mask), Operand::new(src, mask))
}
