//! Modules, symbols and function prototypes.
//!
//! The symbol table is the only state shared between concurrently compiled
//! functions, so it hides behind one coarse mutex held for O(1) operations.

use std::sync::Mutex;

use hashbrown::HashMap;

use crate::dt::DataType;

/// Stable handle to a symbol in a [`Module`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolId(pub u32);

/// Output section a symbol is assigned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SectionId {
    /// Executable code.
    Text,
    /// Initialized data.
    Data,
    /// Zero-initialized data.
    Bss,
    /// Thread-local data.
    Tls,
}

/// Symbol visibility for the outer writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Linkage {
    /// Defined here, visible outside the module.
    Public,
    /// Defined here, module-private.
    Private,
    /// Defined elsewhere; emission produces relocations against it.
    External,
}

/// What a symbol names.
#[derive(Debug, Clone, PartialEq)]
pub enum SymbolKind {
    /// A function with the given prototype.
    Function(Prototype),
    /// A global with optional initializer bytes.
    Global {
        /// Initializer; `None` puts the symbol in bss.
        data: Option<Vec<u8>>,
        /// Required alignment in bytes.
        align: u32,
        /// Thread-local storage.
        tls: bool,
    },
}

/// One entry of the module symbol table.
#[derive(Debug, Clone)]
pub struct Symbol {
    /// Link-time name.
    pub name: String,
    /// Function or data.
    pub kind: SymbolKind,
    /// Where the symbol lives.
    pub section: SectionId,
    /// How the symbol links.
    pub linkage: Linkage,
}

/// Calling convention selector consumed by the target's ABI tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CallConv {
    /// The target's default C convention.
    #[default]
    C,
    /// Windows x64 convention.
    Win64,
}

/// Signature of a function or call site.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Prototype {
    /// Convention used for argument/return placement.
    pub call_conv: CallConv,
    /// Parameter types in order.
    pub params: Vec<DataType>,
    /// Return types in order (empty for void).
    pub returns: Vec<DataType>,
    /// Accepts extra arguments past `params`.
    pub varargs: bool,
}

/// A source position recorded by safepoints, `(file id, line, column)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SourceLoc {
    /// Frontend-assigned file id.
    pub file: u32,
    /// 1-based line.
    pub line: u32,
    /// 1-based column.
    pub column: u32,
}

#[derive(Debug, Default)]
struct SymbolTable {
    symbols: Vec<Symbol>,
    by_name: HashMap<String, SymbolId>,
}

/// A compilation unit: a symbol table plus whatever functions the driver is
/// currently pushing through the pipeline.
///
/// Functions themselves are not stored here — each lives on the thread
/// compiling it — so the module stays cheap to share.
#[derive(Debug, Default)]
pub struct Module {
    table: Mutex<SymbolTable>,
}

impl Module {
    /// An empty module.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares (or returns the existing id of) a symbol named `name`.
    ///
    /// Redeclaring with a different kind keeps the first definition; the
    /// frontend's semantic analysis is responsible for conflicts.
    pub fn declare(&self, name: &str, kind: SymbolKind, linkage: Linkage) -> SymbolId {
        let section = match &kind {
            SymbolKind::Function(_) => SectionId::Text,
            SymbolKind::Global { tls: true, .. } => SectionId::Tls,
            SymbolKind::Global { data: Some(_), .. } => SectionId::Data,
            SymbolKind::Global { .. } => SectionId::Bss,
        };
        let mut table = self.table.lock().expect("symbol table poisoned");
        if let Some(&id) = table.by_name.get(name) {
            return id;
        }
        let id = SymbolId(table.symbols.len() as u32);
        table.symbols.push(Symbol {
            name: name.to_owned(),
            kind,
            section,
            linkage,
        });
        table.by_name.insert(name.to_owned(), id);
        id
    }

    /// Declares an anonymous private data symbol (string literals and such).
    pub fn declare_data(&self, data: Vec<u8>, align: u32) -> SymbolId {
        let mut table = self.table.lock().expect("symbol table poisoned");
        let id = SymbolId(table.symbols.len() as u32);
        let name = format!(".L.data.{}", id.0);
        table.symbols.push(Symbol {
            name: name.clone(),
            kind: SymbolKind::Global {
                data: Some(data),
                align,
                tls: false,
            },
            section: SectionId::Data,
            linkage: Linkage::Private,
        });
        table.by_name.insert(name, id);
        id
    }

    /// Looks a symbol up by name.
    pub fn lookup(&self, name: &str) -> Option<SymbolId> {
        let table = self.table.lock().expect("symbol table poisoned");
        table.by_name.get(name).copied()
    }

    /// Clones the symbol record for `id`.
    pub fn symbol(&self, id: SymbolId) -> Symbol {
        let table = self.table.lock().expect("symbol table poisoned");
        table.symbols[id.0 as usize].clone()
    }

    /// Clones just the name of `id`.
    pub fn symbol_name(&self, id: SymbolId) -> String {
        self.symbol(id).name
    }

    /// Number of declared symbols.
    pub fn symbol_count(&self) -> usize {
        let table = self.table.lock().expect("symbol table poisoned");
        table.symbols.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declare_is_idempotent_by_name() {
        let m = Module::new();
        let a = m.declare("foo", SymbolKind::Function(Prototype::default()), Linkage::Public);
        let b = m.declare("foo", SymbolKind::Function(Prototype::default()), Linkage::Public);
        assert_eq!(a, b);
        assert_eq!(m.symbol_count(), 1);
    }

    #[test]
    fn anonymous_data_symbols_are_distinct() {
        let m = Module::new();
        let a = m.declare_data(b"hi\0".to_vec(), 1);
        let b = m.declare_data(b"hi\0".to_vec(), 1);
        assert_ne!(a, b);
        assert_eq!(m.symbol(a).section, SectionId::Data);
    }
}
