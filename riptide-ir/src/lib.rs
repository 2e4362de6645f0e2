//! Sea-of-nodes SSA intermediate representation.
//!
//! A function is a single graph in which control, memory and data are all
//! edges. Nodes float freely until global code motion pins them to basic
//! blocks, so the IR has no instruction lists — only the START node, the
//! REGIONs derived from it and the def/use edges between everything else.
//!
//! This crate owns the graph itself: node storage ([`Function`]), the typed
//! opcode table ([`Op`]), the interned value lattice ([`Universe`]) used by
//! constant propagation, and the frontend-facing [`FunctionBuilder`]. The
//! rewrite engine and the machine backends live in sibling crates.

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![deny(unused_must_use)]

pub mod arena;
pub mod bitset;
pub mod builder;
pub mod dt;
pub mod dump;
pub mod error;
pub mod func;
pub mod lattice;
pub mod module;
pub mod node;
pub mod op;
pub mod worklist;

pub use arena::{Arena, Savepoint, ScratchPool};
pub use bitset::BitSet;
pub use builder::FunctionBuilder;
pub use dt::DataType;
pub use error::BuildError;
pub use func::Function;
pub use lattice::{AliasSet, IntRange, Singleton, Universe, Value, ValueId, WIDEN_LIMIT};
pub use module::{
    CallConv, Linkage, Module, Prototype, SectionId, SourceLoc, Symbol, SymbolId, SymbolKind,
};
pub use node::{LocalInfo, MemOrder, Node, NodeId, Payload, Use};
pub use op::Op;
pub use worklist::Worklist;
