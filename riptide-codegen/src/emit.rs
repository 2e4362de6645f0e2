//! The machine-code buffer: bytes, labels, patches, relocations.

use riptide_ir::{SourceLoc, SymbolId};
use riptide_opt::BlockId;

use crate::frame::FrameLayout;
use crate::output::{Location, Patch, PatchKind};

/// Mutable emission state threaded through the target's encoders.
pub struct EmitCtx<'a> {
    /// The code bytes produced so far.
    pub code: Vec<u8>,
    /// Frame shape for slot addressing and the prologue/epilogue.
    pub frame: &'a FrameLayout,
    /// The block following the current one in layout order, when any;
    /// jumps there can be dropped.
    pub next_block: Option<BlockId>,
    /// Whether safepoint locations are recorded at all.
    pub emit_locations: bool,
    /// Filled in by the epilogue encoder for the output record.
    pub epilogue_length: u32,
    labels: Vec<Option<u32>>,
    pending: Vec<(u32, BlockId)>,
    patches: Vec<Patch>,
    locations: Vec<Location>,
    last_loc: Option<SourceLoc>,
}

impl<'a> EmitCtx<'a> {
    /// A fresh buffer for a function with `nblocks` basic blocks.
    pub fn new(frame: &'a FrameLayout, nblocks: usize, emit_locations: bool) -> Self {
        EmitCtx {
            code: Vec::with_capacity(256),
            frame,
            next_block: None,
            emit_locations,
            epilogue_length: 0,
            labels: vec![None; nblocks],
            pending: Vec::new(),
            patches: Vec::new(),
            locations: Vec::new(),
            last_loc: None,
        }
    }

    /// Current offset.
    pub fn here(&self) -> u32 {
        self.code.len() as u32
    }

    /// Appends one byte.
    pub fn u8(&mut self, b: u8) {
        self.code.push(b);
    }

    /// Appends raw bytes.
    pub fn bytes(&mut self, bs: &[u8]) {
        self.code.extend_from_slice(bs);
    }

    /// Appends a little-endian u32.
    pub fn u32le(&mut self, v: u32) {
        self.bytes(&v.to_le_bytes());
    }

    /// Appends a little-endian u64.
    pub fn u64le(&mut self, v: u64) {
        self.bytes(&v.to_le_bytes());
    }

    /// Binds block `b`'s label to the current offset.
    pub fn bind_label(&mut self, b: BlockId) {
        debug_assert!(self.labels[b.index()].is_none(), "label {b} bound twice");
        self.labels[b.index()] = Some(self.here());
    }

    /// Is `b`'s label already bound (i.e. the block already emitted)?
    pub fn label_offset(&self, b: BlockId) -> Option<u32> {
        self.labels[b.index()]
    }

    /// Emits a rel32 field referring to block `b`, resolved at finish.
    pub fn block_rel32(&mut self, b: BlockId) {
        let site = self.here();
        self.pending.push((site, b));
        self.u32le(0);
    }

    /// Records a patch for the 4- or 8-byte field the caller writes next.
    pub fn sym_patch(&mut self, kind: PatchKind, target: SymbolId) {
        let offset = self.here();
        self.patches.push(Patch {
            offset,
            kind,
            target,
        });
        match kind {
            PatchKind::Rel32 => self.u32le(0),
            PatchKind::Abs64 => self.u64le(0),
        }
    }

    /// Attaches a source location to the current offset. Consecutive
    /// identical locations collapse into the first record.
    pub fn record_location(&mut self, loc: SourceLoc) {
        if !self.emit_locations || self.last_loc == Some(loc) {
            return;
        }
        self.last_loc = Some(loc);
        self.locations.push(Location {
            offset: self.here(),
            loc,
        });
    }

    /// Resolves forward jumps and returns the collected side tables.
    pub fn finish(mut self) -> (Vec<u8>, Vec<Patch>, Vec<Location>) {
        for (site, block) in core::mem::take(&mut self.pending) {
            let target = self.labels[block.index()]
                .unwrap_or_else(|| panic!("jump into unemitted block {block}"));
            let rel = target.wrapping_sub(site + 4) as i32;
            self.code[site as usize..site as usize + 4]
                .copy_from_slice(&rel.to_le_bytes());
        }
        self.locations.sort_by_key(|l| l.offset);
        (self.code, self.patches, self.locations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> FrameLayout {
        FrameLayout::default()
    }

    #[test]
    fn forward_jumps_resolve() {
        let fr = frame();
        let mut e = EmitCtx::new(&fr, 2, true);
        e.u8(0xe9);
        e.block_rel32(BlockId(1));
        e.u8(0x90);
        e.bind_label(BlockId(1));
        let (code, _, _) = e.finish();
        // Jump over the single nop: displacement 1.
        assert_eq!(&code[1..5], &1i32.to_le_bytes());
    }

    #[test]
    fn location_cache_coalesces_runs() {
        let fr = frame();
        let mut e = EmitCtx::new(&fr, 0, true);
        let a = SourceLoc {
            file: 1,
            line: 2,
            column: 3,
        };
        let b = SourceLoc {
            file: 1,
            line: 3,
            column: 1,
        };
        e.record_location(a);
        e.u8(0x90);
        e.record_location(a);
        e.u8(0x90);
        e.record_location(b);
        let (_, _, locs) = e.finish();
        assert_eq!(locs.len(), 2);
        assert_eq!(locs[0].offset, 0);
        assert_eq!(locs[1].offset, 2);
    }

    #[test]
    fn disabled_locations_record_nothing() {
        let fr = frame();
        let mut e = EmitCtx::new(&fr, 0, false);
        e.record_location(SourceLoc::default());
        let (_, _, locs) = e.finish();
        assert!(locs.is_empty());
    }
}
