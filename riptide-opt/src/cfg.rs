//! Basic blocks, dominators and loops, derived from the region structure.
//!
//! A block is a START or REGION head plus the control chain hanging off
//! it. Only blocks reachable from START exist here; unreachable control
//! left behind by the rewrite engine is simply never discovered.

use hashbrown::HashMap;

use riptide_ir::{Function, NodeId, Op};

/// Index of a basic block inside one [`Cfg`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

impl BlockId {
    /// Index into the block table.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl core::fmt::Display for BlockId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, ".bb{}", self.0)
    }
}

/// One basic block.
#[derive(Debug, Clone)]
pub struct Block {
    /// The START or REGION node heading the block.
    pub head: NodeId,
    /// Predecessor blocks, in region input order for join blocks.
    pub preds: Vec<BlockId>,
    /// Successor blocks, in branch edge order.
    pub succs: Vec<BlockId>,
    /// The BRANCH or RETURN ending the block, if any (a block that falls
    /// through into a region has none).
    pub terminator: Option<NodeId>,
    /// Immediate dominator; the entry block is its own.
    pub idom: BlockId,
    /// Depth in the dominator tree (entry is 0).
    pub dom_depth: u32,
    /// Position in reverse postorder.
    pub rpo_index: u32,
    /// Innermost loop header containing this block, if any.
    pub loop_header: Option<BlockId>,
    /// Loop nesting depth (0 outside all loops).
    pub loop_depth: u32,
    /// Set on headers of single-backedge, two-predecessor loops.
    pub affine: bool,
}

/// The control-flow graph of one function after peepholes stabilize.
#[derive(Debug)]
pub struct Cfg {
    /// All reachable blocks; index 0 is the entry.
    pub blocks: Vec<Block>,
    /// Reverse postorder over `blocks`.
    pub rpo: Vec<BlockId>,
    by_head: HashMap<NodeId, BlockId>,
}

/// Where a control chain ends.
enum ChainEnd {
    Term(NodeId),
    Goto(NodeId),
    Hang,
}

impl Cfg {
    /// Discovers blocks from START, then runs dominators and loops.
    pub fn build(f: &Function) -> Cfg {
        let mut cfg = Cfg {
            blocks: Vec::new(),
            rpo: Vec::new(),
            by_head: HashMap::new(),
        };
        cfg.discover(f);
        cfg.number_rpo();
        cfg.dominators();
        cfg.loops();
        cfg
    }

    /// The entry block.
    pub fn entry(&self) -> BlockId {
        BlockId(0)
    }

    /// The block headed by `n`, if `n` is a live head.
    pub fn block_of_head(&self, n: NodeId) -> Option<BlockId> {
        self.by_head.get(&n).copied()
    }

    /// Resolves an arbitrary control-chain node to its containing block by
    /// walking up through safepoints and projections.
    pub fn block_of_ctrl(&self, f: &Function, mut n: NodeId) -> Option<BlockId> {
        loop {
            match f.op(n) {
                Op::Start | Op::Region => return self.block_of_head(n),
                _ => n = f.input(n, 0)?,
            }
        }
    }

    /// Does `a` dominate `b`?
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        let mut cur = b;
        loop {
            if cur == a {
                return true;
            }
            let up = self.blocks[cur.index()].idom;
            if up == cur {
                return false;
            }
            cur = up;
        }
    }

    /// Lowest common ancestor in the dominator tree.
    pub fn lca(&self, a: BlockId, b: BlockId) -> BlockId {
        let (mut a, mut b) = (a, b);
        while self.blocks[a.index()].dom_depth > self.blocks[b.index()].dom_depth {
            a = self.blocks[a.index()].idom;
        }
        while self.blocks[b.index()].dom_depth > self.blocks[a.index()].dom_depth {
            b = self.blocks[b.index()].idom;
        }
        while a != b {
            a = self.blocks[a.index()].idom;
            b = self.blocks[b.index()].idom;
        }
        a
    }

    fn add_block(&mut self, head: NodeId) -> BlockId {
        if let Some(&id) = self.by_head.get(&head) {
            return id;
        }
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Block {
            head,
            preds: Vec::new(),
            succs: Vec::new(),
            terminator: None,
            idom: BlockId(0),
            dom_depth: 0,
            rpo_index: 0,
            loop_header: None,
            loop_depth: 0,
            affine: false,
        });
        self.by_head.insert(head, id);
        id
    }

    /// Follows the control chain from `head` to whatever ends the block.
    fn chain_end(f: &Function, head: NodeId) -> ChainEnd {
        let mut cur = head;
        loop {
            let mut next = None;
            for u in f.users(cur) {
                match f.op(u.node) {
                    // START's control leaves through its projection.
                    Op::Proj
                        if u.slot == 0
                            && f.dt(u.node) == riptide_ir::DataType::Control
                            && f.op(cur) == Op::Start =>
                    {
                        next = Some(u.node)
                    }
                    Op::Safepoint if u.slot == 0 => next = Some(u.node),
                    Op::Branch | Op::Return if u.slot == 0 => {
                        return ChainEnd::Term(u.node);
                    }
                    Op::Region => return ChainEnd::Goto(u.node),
                    _ => {}
                }
            }
            match next {
                Some(n) => cur = n,
                None => return ChainEnd::Hang,
            }
        }
    }

    fn discover(&mut self, f: &Function) {
        let entry = self.add_block(f.start);
        let mut stack = vec![entry];
        while let Some(b) = stack.pop() {
            if !self.blocks[b.index()].succs.is_empty() || self.blocks[b.index()].terminator.is_some()
            {
                continue;
            }
            let head = self.blocks[b.index()].head;
            match Self::chain_end(f, head) {
                ChainEnd::Term(term) => {
                    self.blocks[b.index()].terminator = Some(term);
                    if f.op(term) == Op::Branch {
                        // One successor per projection, in index order.
                        let mut projs: Vec<(u32, NodeId)> = f
                            .users(term)
                            .iter()
                            .filter(|u| f.op(u.node) == Op::Proj)
                            .filter_map(|u| f.node(u.node).proj_index().map(|i| (i, u.node)))
                            .collect();
                        projs.sort_by_key(|&(i, _)| i);
                        for (_, proj) in projs {
                            for pu in f.users(proj) {
                                if f.op(pu.node) == Op::Region {
                                    let t = self.add_block(pu.node);
                                    self.blocks[b.index()].succs.push(t);
                                    stack.push(t);
                                }
                            }
                        }
                    }
                }
                ChainEnd::Goto(region) => {
                    let t = self.add_block(region);
                    self.blocks[b.index()].succs.push(t);
                    stack.push(t);
                }
                ChainEnd::Hang => {}
            }
        }
        // Predecessors in region input order, so that a phi's k-th arm
        // always pairs with preds[k].
        for b in 0..self.blocks.len() {
            let head = self.blocks[b].head;
            if f.op(head) != Op::Region {
                continue;
            }
            let preds: Vec<BlockId> = f
                .inputs(head)
                .to_vec()
                .into_iter()
                .flatten()
                .filter_map(|p| self.block_of_ctrl(f, p))
                .collect();
            self.blocks[b].preds = preds;
        }
    }

    fn number_rpo(&mut self) {
        let n = self.blocks.len();
        let mut state = vec![0u8; n]; // 0 unvisited, 1 on stack, 2 done
        let mut post: Vec<BlockId> = Vec::with_capacity(n);
        let mut stack: Vec<(BlockId, usize)> = vec![(self.entry(), 0)];
        state[0] = 1;
        while let Some(&(b, i)) = stack.last() {
            let succs = &self.blocks[b.index()].succs;
            if i < succs.len() {
                let s = succs[i];
                stack.last_mut().expect("nonempty").1 = i + 1;
                if state[s.index()] == 0 {
                    state[s.index()] = 1;
                    stack.push((s, 0));
                }
            } else {
                post.push(b);
                stack.pop();
            }
        }
        post.reverse();
        for (i, &b) in post.iter().enumerate() {
            self.blocks[b.index()].rpo_index = i as u32;
        }
        self.rpo = post;
    }

    /// Semi-NCA: Lengauer-Tarjan semidominators with path compression,
    /// then the NCA walk to settle immediate dominators.
    fn dominators(&mut self) {
        let n = self.blocks.len();
        // Preorder DFS.
        let mut pre_of = vec![usize::MAX; n]; // block index -> preorder
        let mut order: Vec<usize> = Vec::with_capacity(n); // preorder -> block index
        let mut parent = vec![0usize; n]; // in preorder space
        let mut stack = vec![(0usize, 0usize)];
        while let Some((b, p)) = stack.pop() {
            if pre_of[b] != usize::MAX {
                continue;
            }
            let v = order.len();
            pre_of[b] = v;
            order.push(b);
            parent[v] = p;
            for &s in self.blocks[b].succs.iter().rev() {
                if pre_of[s.index()] == usize::MAX {
                    stack.push((s.index(), v));
                }
            }
        }
        let count = order.len();

        let mut semi: Vec<usize> = (0..count).collect();
        let mut ancestor = vec![usize::MAX; count];
        let mut label: Vec<usize> = (0..count).collect();

        // eval with iterative path compression.
        let eval = |v: usize, ancestor: &mut Vec<usize>, label: &mut Vec<usize>, semi: &[usize]| -> usize {
            if ancestor[v] == usize::MAX {
                return v;
            }
            let mut path = vec![v];
            let mut root = v;
            while ancestor[ancestor[root]] != usize::MAX {
                root = ancestor[root];
                path.push(root);
            }
            for &u in path.iter().rev() {
                let a = ancestor[u];
                if ancestor[a] != usize::MAX {
                    if semi[label[a]] < semi[label[u]] {
                        label[u] = label[a];
                    }
                    ancestor[u] = ancestor[a];
                }
            }
            label[v]
        };

        for w in (1..count).rev() {
            let block = order[w];
            let preds = self.blocks[block].preds.clone();
            for p in preds {
                let pv = pre_of[p.index()];
                if pv == usize::MAX {
                    continue;
                }
                let u = eval(pv, &mut ancestor, &mut label, &semi);
                if semi[u] < semi[w] {
                    semi[w] = semi[u];
                }
            }
            ancestor[w] = parent[w];
        }

        // NCA pass: walk idoms up until they are at or above the semi.
        let mut idom: Vec<usize> = (0..count).map(|v| if v == 0 { 0 } else { parent[v] }).collect();
        for w in 1..count {
            let mut i = idom[w];
            while i > semi[w] {
                i = idom[i];
            }
            idom[w] = i;
        }

        for w in 0..count {
            let block = order[w];
            self.blocks[block].idom = BlockId(order[idom[w]] as u32);
        }
        // Depths in RPO order so parents are done first.
        for &b in self.rpo.clone().iter() {
            let idom = self.blocks[b.index()].idom;
            self.blocks[b.index()].dom_depth = if idom == b {
                0
            } else {
                self.blocks[idom.index()].dom_depth + 1
            };
        }
    }

    fn loops(&mut self) {
        // Backedges, outermost headers first so inner loops overwrite.
        let mut backedges: Vec<(BlockId, BlockId)> = Vec::new();
        for b in 0..self.blocks.len() {
            let from = BlockId(b as u32);
            for &h in &self.blocks[b].succs {
                if self.dominates(h, from) {
                    backedges.push((from, h));
                }
            }
        }
        backedges.sort_by_key(|&(_, h)| self.blocks[h.index()].dom_depth);

        let mut backedge_count = vec![0u32; self.blocks.len()];
        for &(from, header) in &backedges {
            backedge_count[header.index()] += 1;
            // Natural loop body: everything reaching the backedge source
            // without passing through the header.
            let mut body = vec![header, from];
            let mut stack = vec![from];
            while let Some(b) = stack.pop() {
                if b == header {
                    continue;
                }
                for &p in &self.blocks[b.index()].preds {
                    if !body.contains(&p) {
                        body.push(p);
                        stack.push(p);
                    }
                }
            }
            for b in body {
                self.blocks[b.index()].loop_depth += 1;
                self.blocks[b.index()].loop_header = Some(header);
            }
        }
        for b in 0..self.blocks.len() {
            let id = BlockId(b as u32);
            self.blocks[b].affine = backedge_count[b] == 1
                && self.blocks[b].preds.len() == 2
                && self.blocks[b].loop_header == Some(id);
        }
    }
}

#[cfg(test)]
mod tests;
