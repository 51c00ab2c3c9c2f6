// id.rs — Stable semantic identifiers for resolved entities
//
// Symbols, scopes, derived types and common blocks are referred to by dense
// indices into the `SymbolTable` arenas. Allocated in source order during
// resolve, so the same program always yields the same numbering.

use std::fmt;

/// Stable identifier for a declared entity (variable, parameter, procedure).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolId(pub u32);

/// Stable identifier for a lexical scope (program unit or `block`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(pub u32);

/// Stable identifier for a derived type definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DerivedId(pub u32);

/// Stable identifier for a common block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommonId(pub u32);

impl SymbolId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl ScopeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for SymbolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Allocator for stable IDs. Produces monotonically increasing IDs in
/// allocation (source) order, ensuring deterministic assignment.
#[derive(Debug, Default, Clone)]
pub struct IdAllocator {
    next_symbol: u32,
    next_scope: u32,
    next_derived: u32,
    next_common: u32,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc_symbol(&mut self) -> SymbolId {
        let id = SymbolId(self.next_symbol);
        self.next_symbol += 1;
        id
    }

    pub fn alloc_scope(&mut self) -> ScopeId {
        let id = ScopeId(self.next_scope);
        self.next_scope += 1;
        id
    }

    pub fn alloc_derived(&mut self) -> DerivedId {
        let id = DerivedId(self.next_derived);
        self.next_derived += 1;
        id
    }

    pub fn alloc_common(&mut self) -> CommonId {
        let id = CommonId(self.next_common);
        self.next_common += 1;
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_allocated_in_order() {
        let mut alloc = IdAllocator::new();
        assert_eq!(alloc.alloc_symbol(), SymbolId(0));
        assert_eq!(alloc.alloc_symbol(), SymbolId(1));
        assert_eq!(alloc.alloc_scope(), ScopeId(0));
        assert_eq!(alloc.alloc_derived(), DerivedId(0));
        assert_eq!(alloc.alloc_common(), CommonId(0));
        assert_eq!(alloc.alloc_symbol(), SymbolId(2));
    }

    #[test]
    fn symbol_display() {
        assert_eq!(SymbolId(7).to_string(), "s7");
    }
}
