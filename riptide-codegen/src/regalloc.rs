//! Linear-scan register allocation with live-interval splitting.
//!
//! Intervals are conservative envelopes over the tile timeline: every
//! position where a vreg is defined, used or live-through contributes.
//! Allocation walks intervals by start position, keeps an active set, and
//! when no register is free either splits the interval with the furthest
//! next use onto the stack or spills the incoming one. Fixed-register
//! constraints arrive as singleton operand masks and win unconditionally;
//! the instruction selector keeps their intervals short by copying in and
//! out of them immediately.
//!
//! Spilled tails never rejoin a register wholesale; each later use reads
//! through a reserved scratch register, and rematerializable values are
//! re-emitted at the use instead of touching the stack at all.

use hashbrown::HashMap;
use tracing::{debug, trace};

use riptide_ir::{Function, NodeId};
use riptide_opt::Cfg;

use crate::liveness::Liveness;
use crate::target::Target;
use crate::tile::{PhysReg, RegClass, Tile, TileList, VReg};

/// Where a value lives from a given position on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Loc {
    /// In this register.
    Reg(PhysReg),
    /// In this spill slot.
    Spill(u32),
    /// Nowhere; re-emit the defining node at each use.
    Remat(NodeId),
}

/// Piecewise location of one vreg over its lifetime.
#[derive(Debug, Clone, Default)]
pub struct Assignment {
    segments: Vec<(u32, Loc)>,
}

impl Assignment {
    /// The location at time `t`.
    pub fn at(&self, t: u32) -> Loc {
        let mut cur = self.segments[0].1;
        for &(from, loc) in &self.segments {
            if from <= t {
                cur = loc;
            }
        }
        cur
    }

    /// Does any segment sit in a register?
    pub fn ever_in_reg(&self) -> bool {
        self.segments.iter().any(|(_, l)| matches!(l, Loc::Reg(_)))
    }
}

#[derive(Debug)]
struct Interval {
    vreg: VReg,
    class: RegClass,
    start: u32,
    end: u32,
    mask: u32,
    uses: Vec<u32>,
    def_node: Option<NodeId>,
    crosses_call: bool,
    hint: Option<VReg>,
}

impl Interval {
    fn next_use_after(&self, t: u32) -> u32 {
        self.uses
            .iter()
            .copied()
            .find(|&u| u >= t)
            .unwrap_or(self.end)
    }
}

/// The allocator's product.
#[derive(Debug)]
pub struct AllocResult {
    /// Per-vreg piecewise assignment (`None` for vregs no tile mentions).
    pub assignments: Vec<Option<Assignment>>,
    /// Number of spill slots handed out.
    pub spill_slots: u32,
    /// Callee-saved registers actually used, per class.
    pub used_callee_saved: Vec<u32>,
}

/// Runs liveness-driven linear scan over the selected tiles.
pub fn allocate<T: Target>(
    target: &T,
    f: &Function,
    list: &TileList<T::Op>,
    cfg: &Cfg,
    live: &Liveness,
    classes: &[RegClass],
) -> AllocResult {
    let nvregs = classes.len();
    let mut intervals = build_intervals(target, f, list, cfg, live, classes);

    // Fixed-constraint intervals first at equal starts, then plain order.
    let mut order: Vec<usize> = (0..intervals.len()).collect();
    order.sort_by_key(|&i| {
        let iv = &intervals[i];
        (iv.start, u32::from(iv.mask.count_ones() != 1), iv.vreg.0)
    });

    let mut assignments: Vec<Option<Assignment>> = vec![None; nvregs];
    let mut active: Vec<usize> = Vec::new();
    let mut spill_slots = 0u32;
    let mut used_callee_saved = vec![0u32; target.class_count() as usize];
    let mut slot_of: HashMap<VReg, u32> = HashMap::new();

    let spill_loc = |iv: &Interval,
                         slot_of: &mut HashMap<VReg, u32>,
                         spill_slots: &mut u32|
     -> Loc {
        if let Some(n) = iv.def_node {
            if target.is_remat(f, n) {
                return Loc::Remat(n);
            }
        }
        let slot = *slot_of.entry(iv.vreg).or_insert_with(|| {
            let s = *spill_slots;
            *spill_slots += 1;
            s
        });
        Loc::Spill(slot)
    };

    for idx in order {
        let (start, class, mask, crosses, hint, vreg) = {
            let iv = &intervals[idx];
            (iv.start, iv.class, iv.mask, iv.crosses_call, iv.hint, iv.vreg)
        };
        active.retain(|&a| intervals[a].end > start);

        let mut candidates = mask & target.allocatable(class);
        if crosses {
            // Surviving a call in a caller-saved register is not survival.
            let safe = candidates & target.callee_saved(class);
            if safe != 0 || mask.count_ones() == 1 {
                if safe != 0 {
                    candidates = safe;
                }
            } else {
                let loc = spill_loc(&intervals[idx], &mut slot_of, &mut spill_slots);
                assignments[vreg.index()] = Some(Assignment {
                    segments: vec![(start, loc)],
                });
                continue;
            }
        }

        let mut occupied = 0u32;
        for &a in &active {
            let av = &intervals[a];
            if av.class == class {
                if let Some(Loc::Reg(r)) = assignments[av.vreg.index()]
                    .as_ref()
                    .map(|asg| asg.at(start))
                {
                    occupied |= 1 << r.0;
                }
            }
        }
        let free = candidates & !occupied;

        // Hint from a copy source, to let the emitter drop the move.
        let hinted = hint
            .and_then(|h| assignments[h.index()].as_ref())
            .and_then(|asg| match asg.at(start) {
                Loc::Reg(r) if free & (1 << r.0) != 0 => Some(r),
                _ => None,
            });

        let reg = if let Some(r) = hinted {
            Some(r)
        } else if free != 0 {
            Some(PhysReg(free.trailing_zeros() as u8))
        } else if mask.count_ones() == 1 {
            // Fixed constraint: evict whoever holds the register.
            let want = PhysReg(mask.trailing_zeros() as u8);
            evict(
                target,
                f,
                &mut intervals,
                &mut active,
                &mut assignments,
                &mut slot_of,
                &mut spill_slots,
                class,
                want,
                start,
            );
            Some(want)
        } else {
            // Spill the interval with the furthest next use.
            let my_next = intervals[idx].next_use_after(start);
            let victim = active
                .iter()
                .copied()
                .filter(|&a| {
                    let av = &intervals[a];
                    av.class == class
                        && av.mask.count_ones() > 1
                        && matches!(
                            assignments[av.vreg.index()].as_ref().map(|x| x.at(start)),
                            Some(Loc::Reg(r)) if candidates & (1 << r.0) != 0
                        )
                })
                .max_by_key(|&a| intervals[a].next_use_after(start));
            match victim {
                Some(v) if intervals[v].next_use_after(start) > my_next => {
                    let Some(Loc::Reg(r)) = assignments[intervals[v].vreg.index()]
                        .as_ref()
                        .map(|x| x.at(start))
                    else {
                        unreachable!("victim not in a register");
                    };
                    let loc = spill_loc(&intervals[v], &mut slot_of, &mut spill_slots);
                    let vv = intervals[v].vreg;
                    assignments[vv.index()]
                        .as_mut()
                        .expect("victim allocated")
                        .segments
                        .push((start, loc));
                    active.retain(|&a| a != v);
                    trace!(victim = %vv, at = start, "split interval to stack");
                    Some(r)
                }
                _ => {
                    let loc = spill_loc(&intervals[idx], &mut slot_of, &mut spill_slots);
                    assignments[vreg.index()] = Some(Assignment {
                        segments: vec![(start, loc)],
                    });
                    trace!(%vreg, "spilled on arrival");
                    None
                }
            }
        };

        if let Some(r) = reg {
            debug_assert!(
                mask & (1 << r.0) != 0,
                "allocator broke the mask of {vreg}: {r:?} not in {mask:#x}"
            );
            if target.callee_saved(class) & (1 << r.0) != 0 {
                used_callee_saved[class.0 as usize] |= 1 << r.0;
            }
            assignments[vreg.index()] = Some(Assignment {
                segments: vec![(start, Loc::Reg(r))],
            });
            active.push(idx);
        }
    }

    debug!(
        vregs = nvregs,
        spill_slots, "linear scan finished"
    );
    AllocResult {
        assignments,
        spill_slots,
        used_callee_saved,
    }
}

#[allow(clippy::too_many_arguments)]
fn evict<T: Target>(
    target: &T,
    f: &Function,
    intervals: &mut [Interval],
    active: &mut Vec<usize>,
    assignments: &mut [Option<Assignment>],
    slot_of: &mut HashMap<VReg, u32>,
    spill_slots: &mut u32,
    class: RegClass,
    reg: PhysReg,
    at: u32,
) -> bool {
    let Some(pos) = active.iter().position(|&a| {
        let av = &intervals[a];
        av.class == class
            && matches!(
                assignments[av.vreg.index()].as_ref().map(|x| x.at(at)),
                Some(Loc::Reg(r)) if r == reg
            )
    }) else {
        return false;
    };
    let a = active.swap_remove(pos);
    let iv = &intervals[a];
    if iv.mask.count_ones() == 1 {
        // Two live fixed intervals demanding one register is a selector
        // bug, not a recoverable condition.
        panic!(
            "cannot satisfy fixed register {reg:?} for two overlapping intervals ({})",
            iv.vreg
        );
    }
    let loc = if let Some(n) = iv.def_node {
        if target.is_remat(f, n) {
            Loc::Remat(n)
        } else {
            slot_loc(iv.vreg, slot_of, spill_slots)
        }
    } else {
        slot_loc(iv.vreg, slot_of, spill_slots)
    };
    assignments[iv.vreg.index()]
        .as_mut()
        .expect("active interval allocated")
        .segments
        .push((at, loc));
    true
}

fn slot_loc(v: VReg, slot_of: &mut HashMap<VReg, u32>, spill_slots: &mut u32) -> Loc {
    let slot = *slot_of.entry(v).or_insert_with(|| {
        let s = *spill_slots;
        *spill_slots += 1;
        s
    });
    Loc::Spill(slot)
}

fn build_intervals<T: Target>(
    target: &T,
    _f: &Function,
    list: &TileList<T::Op>,
    _cfg: &Cfg,
    live: &Liveness,
    classes: &[RegClass],
) -> Vec<Interval> {
    let mut by_vreg: Vec<Option<Interval>> = (0..classes.len()).map(|_| None).collect();
    let mut touch = |by_vreg: &mut Vec<Option<Interval>>, v: VReg, from: u32, to: u32| {
        let iv = by_vreg[v.index()].get_or_insert_with(|| Interval {
            vreg: v,
            class: classes[v.index()],
            start: from,
            end: to,
            mask: u32::MAX,
            uses: Vec::new(),
            def_node: None,
            crosses_call: false,
            hint: None,
        });
        iv.start = iv.start.min(from);
        iv.end = iv.end.max(to);
    };

    // Tile positions are doubled: a tile at index `i` reads its inputs at
    // `2i` and writes its outputs at `2i + 1`, so a value dying into a
    // same-tile definition never conflicts with it.
    let mut time = 0u32;
    let mut spans = vec![(0u32, 0u32); list.tiles.len()];
    for &b in &list.layout {
        let from = time;
        time += list.tiles[b.index()].len() as u32;
        spans[b.index()] = (from, time);
    }

    let mut call_times: Vec<u32> = Vec::new();
    for &b in &list.layout {
        let (from, _) = spans[b.index()];
        for live_vreg in live.live_out[b.index()].iter() {
            let (lo, hi) = spans[b.index()];
            touch(&mut by_vreg, VReg(live_vreg), 2 * lo, 2 * hi);
        }
        for (i, tile) in list.tiles[b.index()].iter().enumerate() {
            let base = 2 * (from + i as u32);
            if !tile.clobbers.is_empty() {
                call_times.push(base + 1);
            }
            for op in &tile.ins {
                touch(&mut by_vreg, op.vreg, base, base + 1);
                let iv = by_vreg[op.vreg.index()].as_mut().expect("touched");
                iv.uses.push(base);
                iv.mask &= op.mask.bits;
            }
            for op in tile.outs.iter().chain(&tile.tmps) {
                touch(&mut by_vreg, op.vreg, base + 1, base + 2);
                let iv = by_vreg[op.vreg.index()].as_mut().expect("touched");
                iv.mask &= op.mask.bits;
                if iv.def_node.is_none() {
                    iv.def_node = tile.origin;
                }
            }
            if target.is_copy_tile(tile) {
                if let (Some(dst), Some(src)) = (tile.outs.first(), tile.ins.first()) {
                    if let Some(iv) = by_vreg[dst.vreg.index()].as_mut() {
                        iv.hint = Some(src.vreg);
                    }
                    if let Some(iv) = by_vreg[src.vreg.index()].as_mut() {
                        iv.hint.get_or_insert(dst.vreg);
                    }
                }
            }
        }
    }

    let mut intervals: Vec<Interval> = by_vreg.into_iter().flatten().collect();
    for iv in &mut intervals {
        iv.uses.sort_unstable();
        iv.crosses_call = call_times
            .iter()
            .any(|&t| iv.start < t && iv.end > t + 1);
        assert!(iv.mask != 0, "empty register mask on {}", iv.vreg);
    }
    intervals
}

/// Rewrites the tile stream with physical registers, inserting spill
/// stores/loads and rematerializations, and dropping moves the hints
/// managed to coalesce away.
pub fn apply<T: Target>(
    target: &T,
    f: &Function,
    list: TileList<T::Op>,
    alloc: &AllocResult,
) -> TileList<T::Op> {
    let mut out_tiles: Vec<Vec<Tile<T::Op>>> = (0..list.tiles.len()).map(|_| Vec::new()).collect();
    let mut pos = 0u32;

    for &b in &list.layout {
        let mut out = Vec::with_capacity(list.tiles[b.index()].len());
        for tile in &list.tiles[b.index()] {
            let t = 2 * pos;
            pos += 1;
            let mut tile = tile.clone();
            let mut scratch_used = 0u8;
            let mut stores: Vec<Tile<T::Op>> = Vec::new();

            for op in &mut tile.ins {
                let loc = alloc.assignments[op.vreg.index()]
                    .as_ref()
                    .map(|a| a.at(t));
                match loc {
                    Some(Loc::Reg(r)) => op.assigned = Some(r),
                    Some(Loc::Spill(slot)) => {
                        let class = op.mask.class;
                        let r = target.scratch_reg(class, scratch_used);
                        scratch_used += 1;
                        let mut load = target.spill_load(slot, op.vreg, op.mask);
                        load.outs[0].assigned = Some(r);
                        out.push(load);
                        op.assigned = Some(r);
                    }
                    Some(Loc::Remat(node)) => {
                        let class = op.mask.class;
                        let r = target.scratch_reg(class, scratch_used);
                        scratch_used += 1;
                        let mut remat = target
                            .remat_tile(f, node, op.vreg, op.mask)
                            .unwrap_or_else(|| {
                                panic!("{node} marked rematerializable but has no tile")
                            });
                        remat.outs[0].assigned = Some(r);
                        out.push(remat);
                        op.assigned = Some(r);
                    }
                    None => panic!("use of unallocated vreg {}", op.vreg),
                }
            }
            for op in &mut tile.tmps {
                match alloc.assignments[op.vreg.index()]
                    .as_ref()
                    .map(|a| a.at(t + 1))
                {
                    Some(Loc::Reg(r)) => op.assigned = Some(r),
                    _ => panic!("scratch operand of {} must stay in a register", op.vreg),
                }
            }

            let mut remat_defs = 0usize;
            for op in &mut tile.outs {
                let loc = alloc.assignments[op.vreg.index()]
                    .as_ref()
                    .map(|a| a.at(t + 1));
                match loc {
                    Some(Loc::Reg(r)) => op.assigned = Some(r),
                    Some(Loc::Spill(slot)) => {
                        let class = op.mask.class;
                        let r = target.scratch_reg(class, 0);
                        op.assigned = Some(r);
                        let mut store = target.spill_store(slot, op.vreg, op.mask);
                        store.ins[0].assigned = Some(r);
                        stores.push(store);
                    }
                    // The value is re-emitted at each use; its defining
                    // tile has nothing to produce.
                    Some(Loc::Remat(_)) => remat_defs += 1,
                    None => {
                        // Dead definition (e.g. an unused call result):
                        // the tile still runs, the value lands somewhere
                        // harmless.
                        op.assigned = if op.mask.is_singleton() {
                            op.mask.first()
                        } else {
                            Some(target.scratch_reg(op.mask.class, 0))
                        };
                    }
                }
            }
            if remat_defs > 0 && remat_defs == tile.outs.len() {
                continue;
            }

            // Coalesced copies vanish (their spill store, if any, still
            // has to happen — the value just never changed registers).
            if target.is_copy_tile(&tile)
                && tile.ins.first().map(|o| o.assigned) == tile.outs.first().map(|o| o.assigned)
            {
                out.append(&mut stores);
                continue;
            }
            out.push(tile);
            out.append(&mut stores);
        }
        out_tiles[b.index()] = out;
    }

    TileList {
        layout: list.layout,
        tiles: out_tiles,
    }
}

#[cfg(test)]
mod tests;
