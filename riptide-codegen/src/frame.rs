//! Stack frame layout: locals, spill slots, alignment, probe decisions.

use hashbrown::HashMap;

use riptide_ir::{Function, NodeId, Op, SymbolId};

use crate::output::StackSlot;
use crate::tile::PhysReg;

/// Final frame shape shared by the emitter and the prologue/epilogue.
///
/// All slot offsets are relative to RSP *after* the prologue's stack
/// adjustment, so body code addresses everything as `[rsp + offset]`
/// whether or not a frame pointer is kept.
#[derive(Debug, Default)]
pub struct FrameLayout {
    /// Keep RBP as a base register.
    pub frame_pointer: bool,
    /// RSP-relative offset of each LOCAL node's slot.
    pub locals: HashMap<NodeId, u32>,
    /// RSP-relative offset of each allocator spill slot.
    pub spills: Vec<u32>,
    /// Bytes subtracted from RSP in the prologue.
    pub sub_amount: u32,
    /// Callee-saved registers to push, in push order (RBP excluded).
    pub saves: Vec<PhysReg>,
    /// Stack-probe helper to call when the frame is large, with the
    /// configured threshold already applied.
    pub chkstk: Option<SymbolId>,
    /// Total stack consumption reported to the writer.
    pub stack_usage: u32,
}

fn align_up(v: u32, align: u32) -> u32 {
    debug_assert!(align.is_power_of_two());
    (v + align - 1) & !(align - 1)
}

impl FrameLayout {
    /// Packs locals and spill slots and settles the prologue shape. The
    /// lowest `outgoing` bytes stay reserved for stack-passed arguments of
    /// calls in the body.
    #[allow(clippy::too_many_arguments)]
    pub fn compute(
        f: &Function,
        spill_slots: u32,
        spill_size: u32,
        saves: Vec<PhysReg>,
        frame_pointer: bool,
        chkstk_limit: u32,
        chkstk_sym: Option<SymbolId>,
        outgoing: u32,
        has_calls: bool,
    ) -> FrameLayout {
        // Locals first, largest alignment first so padding stays minimal;
        // same-size slots end up contiguous as a consequence.
        let mut local_nodes: Vec<(NodeId, u32, u32)> = f
            .live_ids()
            .filter(|&n| f.op(n) == Op::Local)
            .filter_map(|n| {
                let info = f.node(n).local_info()?;
                // Thread-locals live in the TLS block, not this frame.
                (!info.tls).then(|| (n, info.size, info.align.max(1)))
            })
            .collect();
        local_nodes.sort_by_key(|&(n, size, align)| (core::cmp::Reverse(align), size, n));

        let mut offset = align_up(outgoing, 8);
        let mut locals = HashMap::new();
        for (n, size, align) in local_nodes {
            offset = align_up(offset, align);
            locals.insert(n, offset);
            offset += size.max(1);
        }

        let mut spills = Vec::with_capacity(spill_slots as usize);
        offset = align_up(offset, spill_size.max(1));
        for _ in 0..spill_slots {
            spills.push(offset);
            offset += spill_size;
        }

        // Calls need RSP ≡ 0 (mod 16) at the call instruction; the return
        // address plus pushes already on the stack decide the parity of
        // the subtraction. Leaf functions skip the dance entirely.
        let pushed = 8 + u32::from(frame_pointer) * 8 + saves.len() as u32 * 8;
        let mut sub_amount = align_up(offset, if has_calls { 16 } else { 8 });
        if has_calls && (pushed + sub_amount) % 16 != 0 {
            sub_amount += 8;
        }

        let stack_usage = pushed + sub_amount;
        FrameLayout {
            frame_pointer,
            locals,
            spills,
            sub_amount,
            saves,
            chkstk: (sub_amount > chkstk_limit).then_some(chkstk_sym).flatten(),
            stack_usage,
        }
    }

    /// RSP-relative offset of a LOCAL's slot.
    pub fn local_offset(&self, n: NodeId) -> u32 {
        *self
            .locals
            .get(&n)
            .unwrap_or_else(|| panic!("{n} has no frame slot"))
    }

    /// RSP-relative offset of an allocator spill slot.
    pub fn spill_offset(&self, slot: u32) -> u32 {
        self.spills[slot as usize]
    }

    /// RSP-relative offset of the caller-provided overflow slot `index`
    /// (just above our return address).
    pub fn incoming_param_offset(&self, index: u32) -> u32 {
        let pushed = u32::from(self.frame_pointer) * 8 + self.saves.len() as u32 * 8;
        self.sub_amount + pushed + 8 + index * 8
    }

    /// Debugger-facing slot table.
    pub fn stack_slots(&self, f: &Function) -> Vec<StackSlot> {
        let mut out: Vec<StackSlot> = self
            .locals
            .iter()
            .map(|(&n, &offset)| {
                let info = f.node(n).local_info();
                StackSlot {
                    name: info
                        .and_then(|i| i.name.as_deref())
                        .unwrap_or("<anon>")
                        .to_owned(),
                    offset: offset as i32,
                    size: info.map(|i| i.size).unwrap_or(0),
                }
            })
            .collect();
        out.sort_by_key(|s| s.offset);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use riptide_ir::{FunctionBuilder, Prototype};

    #[test]
    fn locals_pack_aligned() {
        let mut b = FunctionBuilder::new("t", SymbolId(0), Prototype::default());
        let a = b.local(1, 1, Some("a"));
        let c = b.local(16, 16, Some("c"));
        let d = b.local(4, 4, Some("d"));
        b.ret(&[]).unwrap();
        let f = b.finish();

        let layout = FrameLayout::compute(&f, 0, 8, Vec::new(), false, 4096, None, 0, true);
        assert_eq!(layout.local_offset(c) % 16, 0);
        assert_eq!(layout.local_offset(d) % 4, 0);
        // Highest alignment first.
        assert!(layout.local_offset(c) < layout.local_offset(a));
        // Return address parity: odd multiple of 8 keeps calls aligned.
        assert_eq!((layout.sub_amount + 8) % 16, 0);

        // Leaf functions keep the frame minimal.
        let leaf = FrameLayout::compute(&f, 0, 8, Vec::new(), false, 4096, None, 0, false);
        assert!(leaf.sub_amount < layout.sub_amount || leaf.sub_amount % 8 == 0);
    }

    #[test]
    fn big_frames_request_a_probe() {
        let mut b = FunctionBuilder::new("t", SymbolId(0), Prototype::default());
        let _big = b.local(8192, 16, Some("buf"));
        b.ret(&[]).unwrap();
        let f = b.finish();

        let probe = SymbolId(7);
        let layout = FrameLayout::compute(&f, 0, 8, Vec::new(), true, 4096, Some(probe), 0, false);
        assert_eq!(layout.chkstk, Some(probe));

        let small = FrameLayout::compute(&f, 0, 8, Vec::new(), true, 1 << 20, Some(probe), 0, false);
        assert_eq!(small.chkstk, None);
    }
}
