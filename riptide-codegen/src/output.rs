//! The per-function output contract with the outer object writer.

use riptide_ir::{SectionId, SourceLoc, SymbolId};

/// How a patched site must be rewritten by the writer or loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchKind {
    /// 32-bit pc-relative, measured from the end of the field.
    Rel32,
    /// Absolute 64-bit address.
    Abs64,
}

/// A site in the code referring to an external symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Patch {
    /// Byte offset of the field inside `code`.
    pub offset: u32,
    /// Field encoding.
    pub kind: PatchKind,
    /// The referenced symbol.
    pub target: SymbolId,
}

/// A source location attached to a code offset, sorted by offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    /// Byte offset the location takes effect at.
    pub offset: u32,
    /// File, line, column.
    pub loc: SourceLoc,
}

/// Debugger-facing description of one frame slot.
#[derive(Debug, Clone)]
pub struct StackSlot {
    /// Variable name, when the frontend provided one.
    pub name: String,
    /// Offset relative to the frame base (negative: below it).
    pub offset: i32,
    /// Slot size in bytes.
    pub size: u32,
}

/// Everything the core hands back for one successfully compiled function.
#[derive(Debug, Clone)]
pub struct CompiledFunction {
    /// Little-endian machine code.
    pub code: Vec<u8>,
    /// External references to resolve at link time.
    pub patches: Vec<Patch>,
    /// Debug locations, sorted by offset (empty when disabled).
    pub locations: Vec<Location>,
    /// Frame slots for debuggers.
    pub stack_slots: Vec<StackSlot>,
    /// Bytes of prologue at the start of `code`.
    pub prologue_length: u32,
    /// Bytes of the (first) epilogue sequence.
    pub epilogue_length: u32,
    /// Total stack the frame reserves.
    pub stack_usage: u32,
    /// Section the function belongs in.
    pub section: SectionId,
}

impl Default for CompiledFunction {
    fn default() -> Self {
        CompiledFunction {
            code: Vec::new(),
            patches: Vec::new(),
            locations: Vec::new(),
            stack_slots: Vec::new(),
            prologue_length: 0,
            epilogue_length: 0,
            stack_usage: 0,
            section: SectionId::Text,
        }
    }
}
