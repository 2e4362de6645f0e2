//! Machine tiles: the unit between instruction selection and emission.

use riptide_ir::{NodeId, SymbolId};
use riptide_opt::BlockId;

/// A register class index as defined by the target (e.g. GPR vs vector).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegClass(pub u8);

/// A physical register number within its class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PhysReg(pub u8);

/// A virtual register produced by instruction selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VReg(pub u32);

impl VReg {
    /// Index into allocator side tables.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl core::fmt::Display for VReg {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// A class plus the set of allowed registers in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegMask {
    /// Class the operand lives in.
    pub class: RegClass,
    /// Bit `i` set means register `i` is allowed.
    pub bits: u32,
}

impl RegMask {
    /// Any register of a class, up to `count` of them.
    pub fn any(class: RegClass, count: u8) -> Self {
        let bits = if count >= 32 {
            u32::MAX
        } else {
            (1u32 << count) - 1
        };
        RegMask { class, bits }
    }

    /// Exactly one register.
    pub fn single(class: RegClass, reg: PhysReg) -> Self {
        RegMask {
            class,
            bits: 1 << reg.0,
        }
    }

    /// Is `reg` allowed?
    pub fn contains(&self, reg: PhysReg) -> bool {
        self.bits & (1 << reg.0) != 0
    }

    /// Is this a fixed-register constraint?
    pub fn is_singleton(&self) -> bool {
        self.bits.count_ones() == 1
    }

    /// The lowest allowed register.
    pub fn first(&self) -> Option<PhysReg> {
        if self.bits == 0 {
            None
        } else {
            Some(PhysReg(self.bits.trailing_zeros() as u8))
        }
    }
}

/// One register operand of a tile.
#[derive(Debug, Clone, Copy)]
pub struct Operand {
    /// The virtual register.
    pub vreg: VReg,
    /// Registers the tile's encoding can accept here.
    pub mask: RegMask,
    /// The physical register the allocator settled on.
    pub assigned: Option<PhysReg>,
}

impl Operand {
    /// An operand allowed in any register of `mask`.
    pub fn new(vreg: VReg, mask: RegMask) -> Self {
        Operand {
            vreg,
            mask,
            assigned: None,
        }
    }

    /// The allocated register; only valid after register allocation.
    pub fn reg(&self) -> PhysReg {
        self.assigned.expect("operand not yet allocated")
    }
}

/// What a folded memory operand's base is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrBase {
    /// Base register: index into the tile's input operands.
    Reg(u8),
    /// A stack slot owned by this frame (the LOCAL node names it).
    Frame(NodeId),
    /// A spill slot created by the register allocator.
    Spill(u32),
    /// RIP-relative reference to a symbol.
    Sym(SymbolId),
}

/// A folded `base + index*scale + disp` memory operand.
///
/// The flag-like split between [`AddrBase::Frame`] and [`AddrBase::Sym`]
/// tells later stages whether the operand lives in the frame or in a
/// section, which changes both encoding and relocation handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Addr {
    /// Base of the address.
    pub base: AddrBase,
    /// Optional index: position in the tile's input operands.
    pub index: Option<u8>,
    /// Scale applied to the index (1, 2, 4 or 8).
    pub scale: u8,
    /// Constant displacement.
    pub disp: i32,
}

impl Addr {
    /// Plain `[reg]` addressing through input operand `i`.
    pub fn reg(i: u8) -> Self {
        Addr {
            base: AddrBase::Reg(i),
            index: None,
            scale: 1,
            disp: 0,
        }
    }

    /// Frame-slot addressing.
    pub fn frame(local: NodeId, disp: i32) -> Self {
        Addr {
            base: AddrBase::Frame(local),
            index: None,
            scale: 1,
            disp,
        }
    }
}

/// A selected machine tile.
///
/// Register identities live in the operand lists; immediates, addressing
/// shapes and condition codes live inside the target's `op` payload.
#[derive(Debug, Clone)]
pub struct Tile<O> {
    /// Target-specific opcode and payload.
    pub op: O,
    /// Input operands with their masks.
    pub ins: Vec<Operand>,
    /// Output operands with their masks.
    pub outs: Vec<Operand>,
    /// Scratch registers the encoding needs.
    pub tmps: Vec<Operand>,
    /// Extra registers the tile destroys (per-class bit sets), e.g. the
    /// caller-saved set at a call.
    pub clobbers: Vec<RegMask>,
    /// Originating node, for spill policy and debugging.
    pub origin: Option<NodeId>,
}

impl<O> Tile<O> {
    /// A tile with no operands.
    pub fn new(op: O) -> Self {
        Tile {
            op,
            ins: Vec::new(),
            outs: Vec::new(),
            tmps: Vec::new(),
            clobbers: Vec::new(),
            origin: None,
        }
    }

    /// Adds an input operand, returning its index.
    pub fn read(mut self, vreg: VReg, mask: RegMask) -> Self {
        self.ins.push(Operand::new(vreg, mask));
        self
    }

    /// Adds an output operand.
    pub fn write(mut self, vreg: VReg, mask: RegMask) -> Self {
        self.outs.push(Operand::new(vreg, mask));
        self
    }

    /// Adds a scratch operand.
    pub fn scratch(mut self, vreg: VReg, mask: RegMask) -> Self {
        self.tmps.push(Operand::new(vreg, mask));
        self
    }

    /// Records the originating node.
    pub fn from_node(mut self, n: NodeId) -> Self {
        self.origin = Some(n);
        self
    }

    /// Records a clobber set.
    pub fn clobbering(mut self, mask: RegMask) -> Self {
        self.clobbers.push(mask);
        self
    }
}

/// The tile stream of one function: blocks in layout order, each a label
/// followed by its tiles.
#[derive(Debug)]
pub struct TileList<O> {
    /// Block layout order (reverse postorder).
    pub layout: Vec<BlockId>,
    /// Tiles per block, indexed by block id.
    pub tiles: Vec<Vec<Tile<O>>>,
}
