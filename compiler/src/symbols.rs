// symbols.rs — Symbol table: types, attributes, scopes
//
// Arena-style storage indexed by the IDs in `id.rs`. Scopes form a tree
// (global → program unit → nested `block`s); lookup walks outward. Common
// blocks, namelist groups and derived types are recorded per scope.
//
// Preconditions: none.
// Postconditions: IDs are dense and allocated in declaration order.
// Failure modes: `declare` reports a clash with an existing local name.
// Side effects: none.

use std::collections::HashMap;
use std::fmt;

use crate::ast::Span;
use crate::id::{CommonId, DerivedId, IdAllocator, ScopeId, SymbolId};

// ── Types ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BaseType {
    Integer,
    Real,
    Complex,
    Logical,
    Character,
    Derived(DerivedId),
    /// `type(c_ptr)`
    CPtr,
}

/// Intrinsic or derived type with its kind parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Type {
    pub base: BaseType,
    pub kind: u8,
}

impl Type {
    pub const DEFAULT_KIND: u8 = 4;

    pub fn integer() -> Type {
        Type {
            base: BaseType::Integer,
            kind: Self::DEFAULT_KIND,
        }
    }

    pub fn real(kind: u8) -> Type {
        Type {
            base: BaseType::Real,
            kind,
        }
    }

    pub fn logical() -> Type {
        Type {
            base: BaseType::Logical,
            kind: Self::DEFAULT_KIND,
        }
    }

    pub fn character() -> Type {
        Type {
            base: BaseType::Character,
            kind: 1,
        }
    }

    pub fn is_integer(self) -> bool {
        self.base == BaseType::Integer
    }

    pub fn is_real(self) -> bool {
        self.base == BaseType::Real
    }

    pub fn is_logical(self) -> bool {
        self.base == BaseType::Logical
    }

    pub fn is_numeric(self) -> bool {
        matches!(
            self.base,
            BaseType::Integer | BaseType::Real | BaseType::Complex
        )
    }

    /// Rank of numeric types for promotion: integer < real < complex.
    fn numeric_rank(self) -> u8 {
        match self.base {
            BaseType::Integer => 0,
            BaseType::Real => 1,
            _ => 2,
        }
    }

    /// Result type of mixed arithmetic on two numeric operands.
    pub fn promote(a: Type, b: Type) -> Type {
        match a.numeric_rank().cmp(&b.numeric_rank()) {
            std::cmp::Ordering::Less => Type {
                base: b.base,
                kind: b.kind.max(if a.is_integer() { 0 } else { a.kind }),
            },
            std::cmp::Ordering::Greater => Type {
                base: a.base,
                kind: a.kind.max(if b.is_integer() { 0 } else { b.kind }),
            },
            std::cmp::Ordering::Equal => Type {
                base: a.base,
                kind: a.kind.max(b.kind),
            },
        }
    }

    /// Whether converting `from` to `self` can lose range or precision.
    pub fn narrows_from(self, from: Type) -> bool {
        from.numeric_rank() > self.numeric_rank()
            || (from.numeric_rank() == self.numeric_rank() && from.kind > self.kind)
    }

    /// Intrinsic used to spell an explicit conversion to this type.
    pub fn conversion_name(self) -> &'static str {
        match self.base {
            BaseType::Integer => "int",
            BaseType::Real => "real",
            BaseType::Complex => "cmplx",
            BaseType::Logical => "logical",
            BaseType::Character => "char",
            BaseType::Derived(_) | BaseType::CPtr => "transfer",
        }
    }

    /// Storage size of one element, in bytes.
    pub fn size_bytes(self) -> u64 {
        match self.base {
            BaseType::Complex => 2 * self.kind as u64,
            BaseType::CPtr => 8,
            _ => self.kind as u64,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.base {
            BaseType::Integer => write!(f, "integer({})", self.kind),
            BaseType::Real => write!(f, "real({})", self.kind),
            BaseType::Complex => write!(f, "complex({})", self.kind),
            BaseType::Logical => write!(f, "logical({})", self.kind),
            BaseType::Character => write!(f, "character"),
            BaseType::Derived(id) => write!(f, "type(#{})", id.0),
            BaseType::CPtr => write!(f, "type(c_ptr)"),
        }
    }
}

// ── Symbols ──

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavor {
    Variable,
    /// Named constant (`parameter`).
    Parameter,
    Procedure,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attrs {
    pub allocatable: bool,
    pub pointer: bool,
    pub target: bool,
    pub value: bool,
    pub threadprivate: bool,
    pub cray_pointer: bool,
    pub cray_pointee: bool,
    pub dummy: bool,
    pub in_namelist: bool,
    pub common: Option<CommonId>,
    /// Introduced by the compiler, not declared in source.
    pub artificial: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayKind {
    Explicit,
    Deferred,
    AssumedSize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArraySpec {
    pub kind: ArrayKind,
    pub rank: u8,
    /// Element count when every extent is constant.
    pub elements: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub id: SymbolId,
    pub name: String,
    pub flavor: Flavor,
    pub ty: Option<Type>,
    pub attrs: Attrs,
    pub array: Option<ArraySpec>,
    pub scope: ScopeId,
    pub span: Span,
    /// Folded value of an integer named constant.
    pub value: Option<i64>,
}

impl Symbol {
    pub fn rank(&self) -> u8 {
        self.array.as_ref().map(|a| a.rank).unwrap_or(0)
    }

    pub fn is_assumed_size(&self) -> bool {
        matches!(&self.array, Some(a) if a.kind == ArrayKind::AssumedSize)
    }

    /// Bytes occupied by the whole object, when known.
    pub fn size_bytes(&self) -> Option<u64> {
        let elem = self.ty?.size_bytes();
        match &self.array {
            None => Some(elem),
            Some(a) => a.elements.map(|n| n * elem),
        }
    }
}

// ── Scopes ──

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeKind {
    Global,
    Unit { name: String },
    Block,
}

#[derive(Debug, Clone)]
pub struct Scope {
    pub id: ScopeId,
    pub parent: Option<ScopeId>,
    pub kind: ScopeKind,
    names: HashMap<String, SymbolId>,
    /// Symbols in declaration order.
    pub symbols: Vec<SymbolId>,
    commons: HashMap<String, CommonId>,
    derived: HashMap<String, DerivedId>,
}

#[derive(Debug, Clone)]
pub struct DerivedType {
    pub id: DerivedId,
    pub name: String,
    /// Some component is allocatable.
    pub has_alloc_comp: bool,
    pub size_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct CommonBlock {
    pub id: CommonId,
    pub name: String,
    pub members: Vec<SymbolId>,
    pub span: Span,
}

// ── Table ──

#[derive(Debug, Clone)]
pub struct SymbolTable {
    ids: IdAllocator,
    symbols: Vec<Symbol>,
    scopes: Vec<Scope>,
    derived: Vec<DerivedType>,
    commons: Vec<CommonBlock>,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolTable {
    /// Creates the table with its global scope.
    pub fn new() -> Self {
        let mut table = SymbolTable {
            ids: IdAllocator::new(),
            symbols: Vec::new(),
            scopes: Vec::new(),
            derived: Vec::new(),
            commons: Vec::new(),
        };
        table.add_scope(None, ScopeKind::Global);
        table
    }

    pub fn global(&self) -> ScopeId {
        ScopeId(0)
    }

    pub fn add_scope(&mut self, parent: Option<ScopeId>, kind: ScopeKind) -> ScopeId {
        let id = self.ids.alloc_scope();
        self.scopes.push(Scope {
            id,
            parent,
            kind,
            names: HashMap::new(),
            symbols: Vec::new(),
            commons: HashMap::new(),
            derived: HashMap::new(),
        });
        id
    }

    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.index()]
    }

    pub fn symbol(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id.index()]
    }

    pub fn symbol_mut(&mut self, id: SymbolId) -> &mut Symbol {
        &mut self.symbols[id.index()]
    }

    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    /// Declare `name` in `scope`. On a clash returns the existing symbol.
    pub fn declare(
        &mut self,
        scope: ScopeId,
        name: &str,
        flavor: Flavor,
        span: Span,
    ) -> Result<SymbolId, SymbolId> {
        let key = name.to_ascii_lowercase();
        if let Some(&existing) = self.scopes[scope.index()].names.get(&key) {
            return Err(existing);
        }
        let id = self.ids.alloc_symbol();
        self.symbols.push(Symbol {
            id,
            name: name.to_string(),
            flavor,
            ty: None,
            attrs: Attrs::default(),
            array: None,
            scope,
            span,
            value: None,
        });
        let s = &mut self.scopes[scope.index()];
        s.names.insert(key, id);
        s.symbols.push(id);
        Ok(id)
    }

    /// Compiler temporary in `scope`; never clashes with source names.
    pub fn add_artificial(&mut self, scope: ScopeId, name: &str, ty: Type, span: Span) -> SymbolId {
        let id = self.ids.alloc_symbol();
        self.symbols.push(Symbol {
            id,
            name: name.to_string(),
            flavor: Flavor::Variable,
            ty: Some(ty),
            attrs: Attrs {
                artificial: true,
                ..Attrs::default()
            },
            array: None,
            scope,
            span,
            value: None,
        });
        self.scopes[scope.index()].symbols.push(id);
        id
    }

    pub fn lookup_local(&self, scope: ScopeId, name: &str) -> Option<SymbolId> {
        self.scope(scope)
            .names
            .get(&name.to_ascii_lowercase())
            .copied()
    }

    /// Innermost visible declaration of `name`.
    pub fn lookup(&self, scope: ScopeId, name: &str) -> Option<SymbolId> {
        self.scope_chain(scope)
            .find_map(|s| self.lookup_local(s, name))
    }

    /// `scope` and its ancestors, innermost first.
    pub fn scope_chain(&self, scope: ScopeId) -> impl Iterator<Item = ScopeId> + '_ {
        std::iter::successors(Some(scope), move |s| self.scope(*s).parent)
    }

    /// The program-unit scope enclosing `scope`.
    pub fn unit_scope(&self, scope: ScopeId) -> ScopeId {
        self.scope_chain(scope)
            .find(|s| matches!(self.scope(*s).kind, ScopeKind::Unit { .. }))
            .unwrap_or(scope)
    }

    // ── Common blocks ──

    /// Common block `name` in `scope`, created on first mention.
    pub fn common_in(&mut self, scope: ScopeId, name: &str, span: Span) -> CommonId {
        let key = name.to_ascii_lowercase();
        if let Some(&id) = self.scopes[scope.index()].commons.get(&key) {
            return id;
        }
        let id = self.ids.alloc_common();
        self.commons.push(CommonBlock {
            id,
            name: name.to_string(),
            members: Vec::new(),
            span,
        });
        self.scopes[scope.index()].commons.insert(key, id);
        id
    }

    pub fn lookup_common(&self, scope: ScopeId, name: &str) -> Option<CommonId> {
        let key = name.to_ascii_lowercase();
        self.scope_chain(scope)
            .find_map(|s| self.scope(s).commons.get(&key).copied())
    }

    pub fn common(&self, id: CommonId) -> &CommonBlock {
        &self.commons[id.0 as usize]
    }

    pub fn common_mut(&mut self, id: CommonId) -> &mut CommonBlock {
        &mut self.commons[id.0 as usize]
    }

    // ── Derived types ──

    pub fn add_derived(
        &mut self,
        scope: ScopeId,
        name: &str,
        has_alloc_comp: bool,
        size_bytes: u64,
    ) -> DerivedId {
        let id = self.ids.alloc_derived();
        self.derived.push(DerivedType {
            id,
            name: name.to_string(),
            has_alloc_comp,
            size_bytes,
        });
        self.scopes[scope.index()]
            .derived
            .insert(name.to_ascii_lowercase(), id);
        id
    }

    pub fn lookup_derived(&self, scope: ScopeId, name: &str) -> Option<DerivedId> {
        let key = name.to_ascii_lowercase();
        self.scope_chain(scope)
            .find_map(|s| self.scope(s).derived.get(&key).copied())
    }

    pub fn derived(&self, id: DerivedId) -> &DerivedType {
        &self.derived[id.0 as usize]
    }

    /// Derived type with an allocatable component.
    pub fn has_alloc_comp(&self, ty: Option<Type>) -> bool {
        match ty.map(|t| t.base) {
            Some(BaseType::Derived(id)) => self.derived(id).has_alloc_comp,
            _ => false,
        }
    }

    /// Element size of `ty`, looking through derived types.
    pub fn type_size(&self, ty: Type) -> u64 {
        match ty.base {
            BaseType::Derived(id) => self.derived(id).size_bytes,
            _ => ty.size_bytes(),
        }
    }
}
