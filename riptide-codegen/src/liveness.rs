//! Global liveness of virtual registers over the tile stream.

use riptide_ir::BitSet;
use riptide_opt::Cfg;

use crate::tile::TileList;

/// Per-block liveness bitsets over vregs.
#[derive(Debug)]
pub struct Liveness {
    /// Upward-exposed uses per block.
    pub gen: Vec<BitSet>,
    /// Definitions per block.
    pub kill: Vec<BitSet>,
    /// Live at block entry.
    pub live_in: Vec<BitSet>,
    /// Live at block exit.
    pub live_out: Vec<BitSet>,
}

/// Standard backward fixpoint over the block graph.
pub fn compute<O>(list: &TileList<O>, cfg: &Cfg) -> Liveness {
    let nblocks = list.tiles.len();
    let mut gen = vec![BitSet::new(); nblocks];
    let mut kill = vec![BitSet::new(); nblocks];

    for (b, tiles) in list.tiles.iter().enumerate() {
        for tile in tiles {
            for op in &tile.ins {
                if !kill[b].contains(op.vreg.0) {
                    gen[b].insert(op.vreg.0);
                }
            }
            for op in tile.outs.iter().chain(&tile.tmps) {
                kill[b].insert(op.vreg.0);
            }
        }
    }

    let mut live_in = vec![BitSet::new(); nblocks];
    let mut live_out = vec![BitSet::new(); nblocks];
    let mut changed = true;
    while changed {
        changed = false;
        // Backward problem: sweep blocks in reverse layout order.
        for &b in list.layout.iter().rev() {
            let b = b.index();
            let mut out = BitSet::new();
            for &s in &cfg.blocks[b].succs {
                out.union_with(&live_in[s.index()]);
            }
            let mut inn = out.clone();
            inn.subtract(&kill[b]);
            inn.union_with(&gen[b]);
            if out != live_out[b] {
                live_out[b] = out;
                changed = true;
            }
            if inn != live_in[b] {
                live_in[b] = inn;
                changed = true;
            }
        }
    }

    Liveness {
        gen,
        kill,
        live_in,
        live_out,
    }
}
