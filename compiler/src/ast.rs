// AST node types for the Fortran subset and its directives.
//
// Every node carries a `SimpleSpan` for error reporting in downstream phases.
// Resolution fills in the `Option` slots left empty by the parser (symbol
// bindings, expression types, atomic classification) and may rewrite
// expressions in place.
//
// Preconditions: produced by the parser from a valid or partially-valid token stream.
// Postconditions: each node's span covers the source range of the construct.
// Failure modes: none (data-only module).
// Side effects: none.

use std::fmt;

use chumsky::span::SimpleSpan;

use crate::clauses::{ClauseSet, NamelistEntry};
use crate::directive::DirectiveKind;
use crate::id::{ScopeId, SymbolId};
use crate::symbols::Type;

/// Byte-offset span (alias for chumsky's `SimpleSpan`).
pub type Span = SimpleSpan;

/// An identifier with its source span.
#[derive(Debug, Clone, PartialEq)]
pub struct Ident {
    pub name: String,
    pub span: Span,
}

impl Ident {
    pub fn new(name: impl Into<String>, span: Span) -> Self {
        Ident {
            name: name.into(),
            span,
        }
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

// ── Root ──

/// A source file: one or more program units.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub units: Vec<Unit>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKind {
    Program,
    Subroutine,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Unit {
    pub kind: UnitKind,
    pub name: Ident,
    pub params: Vec<Ident>,
    pub specs: Vec<SpecStmt>,
    pub body: Vec<Stmt>,
    pub scope: Option<ScopeId>,
    pub span: Span,
}

// ── Specification part ──

#[derive(Debug, Clone, PartialEq)]
pub enum SpecStmt {
    Implicit(Span),
    Decl(TypeDecl),
    DerivedType(DerivedTypeDef),
    Common(GroupStmt),
    Namelist(GroupStmt),
    CrayPointer(CrayPointerStmt),
    Threadprivate(ThreadprivateStmt),
    DeclareSimd(DeclareSimdStmt),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeDecl {
    pub ty: TypeSpec,
    pub attrs: Vec<Attr>,
    pub entities: Vec<Entity>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeSpec {
    pub name: TypeName,
    pub kind: Option<u8>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeName {
    Integer,
    Real,
    Complex,
    Logical,
    Character,
    /// `type(name)`; `type(c_ptr)` is the C interop pointer.
    Derived(Ident),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attr {
    pub kind: AttrKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttrKind {
    Allocatable,
    Pointer,
    Target,
    Value,
    Parameter,
    Intent(Intent),
    Dimension(Vec<DimSpec>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    In,
    Out,
    InOut,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub name: Ident,
    pub dims: Option<Vec<DimSpec>>,
    pub init: Option<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DimSpec {
    /// `upper` or `lower:upper`.
    Explicit { lower: Option<Expr>, upper: Expr },
    /// `:`
    Deferred,
    /// `*` or `lower:*`
    AssumedSize { lower: Option<Expr> },
}

/// `type :: name` ... `end type`
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedTypeDef {
    pub name: Ident,
    pub components: Vec<TypeDecl>,
    pub span: Span,
}

/// `common /name/ a, b` or `namelist /name/ a, b`
#[derive(Debug, Clone, PartialEq)]
pub struct GroupStmt {
    pub name: Ident,
    pub members: Vec<Ident>,
    pub span: Span,
}

/// Legacy `pointer (ptr, pointee)`
#[derive(Debug, Clone, PartialEq)]
pub struct CrayPointerStmt {
    pub pointer: Ident,
    pub pointee: Ident,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThreadprivateStmt {
    pub items: Vec<NamelistEntry>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeclareSimdStmt {
    pub proc_name: Ident,
    pub clauses: Option<ClauseSet>,
    pub span: Span,
}

// ── Statements ──

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Assign(Assignment),
    Do(DoLoop),
    If(IfBlock),
    Call(CallStmt),
    Print(Vec<Expr>),
    Continue,
    Block(BlockConstruct),
    Directive(Box<Directive>),
}

impl Stmt {
    /// Statements with no effect, allowed between collapsed loop headers.
    pub fn is_noop(&self) -> bool {
        matches!(self.kind, StmtKind::Continue)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub lhs: Expr,
    pub rhs: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DoLoop {
    pub control: LoopControl,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoopControl {
    Counted(CountedControl),
    While(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CountedControl {
    pub var: Ident,
    pub symbol: Option<SymbolId>,
    pub start: Expr,
    pub end: Expr,
    pub step: Option<Expr>,
}

impl DoLoop {
    pub fn counted(&self) -> Option<&CountedControl> {
        match &self.control {
            LoopControl::Counted(c) => Some(c),
            LoopControl::While(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfBlock {
    pub cond: Expr,
    pub then_body: Vec<Stmt>,
    pub else_body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallStmt {
    pub name: Ident,
    pub args: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlockConstruct {
    pub specs: Vec<SpecStmt>,
    pub body: Vec<Stmt>,
    pub scope: Option<ScopeId>,
}

// ── Directives ──

/// An OpenMP/OpenACC construct and the statements it applies to.
///
/// `clauses` is `None` when the clause text failed to parse; downstream
/// passes skip such directives rather than guess.
#[derive(Debug, Clone, PartialEq)]
pub struct Directive {
    pub kind: DirectiveKind,
    pub clauses: Option<ClauseSet>,
    pub body: Vec<Stmt>,
    /// `atomic` header: operation keyword and `seq_cst`.
    pub atomic: Option<AtomicHeader>,
    /// Set by the atomic resolver.
    pub atomic_info: Option<AtomicInfo>,
    /// `critical (name)` and its `end critical (name)`.
    pub name: Option<Ident>,
    pub end_name: Option<Ident>,
    /// `flush (list)`
    pub flush: Vec<NamelistEntry>,
    pub span: Span,
}

impl Directive {
    pub fn new(kind: DirectiveKind, clauses: Option<ClauseSet>, span: Span) -> Self {
        Directive {
            kind,
            clauses,
            body: Vec::new(),
            atomic: None,
            atomic_info: None,
            name: None,
            end_name: None,
            flush: Vec::new(),
            span,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtomicOp {
    Read,
    Write,
    Update,
    Capture,
}

impl fmt::Display for AtomicOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AtomicOp::Read => "read",
            AtomicOp::Write => "write",
            AtomicOp::Update => "update",
            AtomicOp::Capture => "capture",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtomicHeader {
    pub op: AtomicOp,
    pub seq_cst: bool,
}

/// Classification recorded on an atomic directive, even when its shape was
/// rejected, so later passes can tell what was intended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtomicInfo {
    pub op: AtomicOp,
    pub seq_cst: bool,
    /// Capture whose update is a plain overwrite.
    pub swap: bool,
    /// Capture whose first statement reads the old value.
    pub capture_first: bool,
    /// `x = expr op x` was rewritten to `x = x op (expr)`.
    pub reversed_operands: bool,
    pub var: Option<SymbolId>,
    pub valid: bool,
}

// ── Expressions ──

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
    /// Filled in by resolution.
    pub ty: Option<Type>,
    pub rank: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Int(i64),
    Real { value: f64, kind: u8 },
    Logical(bool),
    Str(String),
    Ref(DataRef),
    Call {
        name: Ident,
        args: Vec<Expr>,
        intrinsic: Option<Intrinsic>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// Explicit grouping, kept so rewrites can preserve evaluation order.
    Paren(Box<Expr>),
    /// Implicit type conversion to `Expr::ty`, inserted by resolution.
    Convert(Box<Expr>),
    /// Placeholder left behind when a subtree is moved out during rewriting.
    Error,
}

/// Variable or array reference, possibly subscripted.
#[derive(Debug, Clone, PartialEq)]
pub struct DataRef {
    pub name: Ident,
    pub subscripts: Option<Vec<Subscript>>,
    pub symbol: Option<SymbolId>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Subscript {
    Element(Expr),
    Range {
        lower: Option<Expr>,
        upper: Option<Expr>,
        stride: Option<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Plus,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Eqv,
    Neqv,
}

impl BinOp {
    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Pow
        )
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinOp::And | BinOp::Or | BinOp::Eqv | BinOp::Neqv)
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Pow => "**",
            BinOp::Eq => "==",
            BinOp::Ne => "/=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::And => ".and.",
            BinOp::Or => ".or.",
            BinOp::Eqv => ".eqv.",
            BinOp::Neqv => ".neqv.",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intrinsic {
    Min,
    Max,
    Iand,
    Ior,
    Ieor,
    Abs,
    Mod,
    Sqrt,
    Real,
    Int,
}

impl Intrinsic {
    pub fn from_name(name: &str) -> Option<Intrinsic> {
        Some(match name.to_ascii_lowercase().as_str() {
            "min" => Intrinsic::Min,
            "max" => Intrinsic::Max,
            "iand" => Intrinsic::Iand,
            "ior" => Intrinsic::Ior,
            "ieor" => Intrinsic::Ieor,
            "abs" => Intrinsic::Abs,
            "mod" => Intrinsic::Mod,
            "sqrt" => Intrinsic::Sqrt,
            "real" => Intrinsic::Real,
            "int" => Intrinsic::Int,
            _ => return None,
        })
    }
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Expr {
            kind,
            span,
            ty: None,
            rank: 0,
        }
    }

    pub fn int(value: i64, span: Span) -> Self {
        Expr::new(ExprKind::Int(value), span)
    }

    /// A bare variable reference, already bound.
    pub fn var(name: Ident, symbol: SymbolId, ty: Option<Type>) -> Self {
        let span = name.span;
        Expr {
            kind: ExprKind::Ref(DataRef {
                name,
                subscripts: None,
                symbol: Some(symbol),
            }),
            span,
            ty,
            rank: 0,
        }
    }

    /// Symbol of a (possibly subscripted) variable reference.
    pub fn ref_symbol(&self) -> Option<SymbolId> {
        match &self.kind {
            ExprKind::Ref(r) => r.symbol,
            _ => None,
        }
    }

    /// Symbol of an unsubscripted variable reference.
    pub fn whole_var(&self) -> Option<SymbolId> {
        match &self.kind {
            ExprKind::Ref(r) if r.subscripts.is_none() => r.symbol,
            _ => None,
        }
    }

    pub fn is_literal(&self) -> bool {
        matches!(
            self.kind,
            ExprKind::Int(_) | ExprKind::Real { .. } | ExprKind::Logical(_) | ExprKind::Str(_)
        )
    }

    /// Take the expression out, leaving an `Error` placeholder.
    pub fn take(&mut self) -> Expr {
        let span = self.span;
        std::mem::replace(self, Expr::new(ExprKind::Error, span))
    }

    /// Direct children, in evaluation order.
    pub fn children(&self) -> Vec<&Expr> {
        match &self.kind {
            ExprKind::Int(_)
            | ExprKind::Real { .. }
            | ExprKind::Logical(_)
            | ExprKind::Str(_)
            | ExprKind::Error => Vec::new(),
            ExprKind::Ref(r) => r
                .subscripts
                .iter()
                .flatten()
                .flat_map(|s| match s {
                    Subscript::Element(e) => vec![e],
                    Subscript::Range {
                        lower,
                        upper,
                        stride,
                    } => [lower, upper, stride]
                        .into_iter()
                        .flatten()
                        .collect::<Vec<_>>(),
                })
                .collect(),
            ExprKind::Call { args, .. } => args.iter().collect(),
            ExprKind::Unary { operand, .. } => vec![operand.as_ref()],
            ExprKind::Binary { lhs, rhs, .. } => vec![lhs.as_ref(), rhs.as_ref()],
            ExprKind::Paren(e) | ExprKind::Convert(e) => vec![e.as_ref()],
        }
    }

    /// Whether `symbol` is referenced anywhere in the expression.
    pub fn references(&self, symbol: SymbolId) -> bool {
        self.ref_symbol() == Some(symbol) || self.children().iter().any(|c| c.references(symbol))
    }
}

// ── Display ──
//
// Renders expressions back to source form. Binary nodes print without
// parentheses; explicit grouping lives in `Paren` nodes.

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ExprKind::Int(v) => write!(f, "{v}"),
            ExprKind::Real { value, kind } => {
                if *kind == 8 {
                    write!(f, "{value:?}d0")
                } else {
                    write!(f, "{value:?}")
                }
            }
            ExprKind::Logical(true) => write!(f, ".true."),
            ExprKind::Logical(false) => write!(f, ".false."),
            ExprKind::Str(s) => write!(f, "'{}'", s.replace('\'', "''")),
            ExprKind::Ref(r) => {
                write!(f, "{}", r.name)?;
                if let Some(subs) = &r.subscripts {
                    write!(f, "(")?;
                    for (i, s) in subs.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{s}")?;
                    }
                    write!(f, ")")?;
                }
                Ok(())
            }
            ExprKind::Call { name, args, .. } => {
                write!(f, "{name}(")?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{a}")?;
                }
                write!(f, ")")
            }
            ExprKind::Unary { op, operand } => match op {
                UnaryOp::Neg => write!(f, "-{operand}"),
                UnaryOp::Plus => write!(f, "+{operand}"),
                UnaryOp::Not => write!(f, ".not. {operand}"),
            },
            ExprKind::Binary { op, lhs, rhs } => write!(f, "{lhs} {} {rhs}", op.symbol()),
            ExprKind::Paren(e) => write!(f, "({e})"),
            ExprKind::Convert(e) => match &self.ty {
                Some(ty) => write!(f, "{}({e}, {})", ty.conversion_name(), ty.kind),
                None => write!(f, "{e}"),
            },
            ExprKind::Error => write!(f, "<error>"),
        }
    }
}

impl fmt::Display for Subscript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subscript::Element(e) => write!(f, "{e}"),
            Subscript::Range {
                lower,
                upper,
                stride,
            } => {
                if let Some(l) = lower {
                    write!(f, "{l}")?;
                }
                write!(f, ":")?;
                if let Some(u) = upper {
                    write!(f, "{u}")?;
                }
                if let Some(s) = stride {
                    write!(f, ":{s}")?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sp() -> Span {
        (0..1).into()
    }

    fn name(n: &str) -> Expr {
        Expr::new(
            ExprKind::Ref(DataRef {
                name: Ident::new(n, sp()),
                subscripts: None,
                symbol: None,
            }),
            sp(),
        )
    }

    #[test]
    fn display_keeps_explicit_parens() {
        let e = Expr::new(
            ExprKind::Binary {
                op: BinOp::Sub,
                lhs: Box::new(name("x")),
                rhs: Box::new(Expr::new(ExprKind::Paren(Box::new(name("e"))), sp())),
            },
            sp(),
        );
        assert_eq!(e.to_string(), "x - (e)");
    }

    #[test]
    fn display_section() {
        let e = Expr::new(
            ExprKind::Ref(DataRef {
                name: Ident::new("a", sp()),
                subscripts: Some(vec![
                    Subscript::Range {
                        lower: Some(Expr::int(1, sp())),
                        upper: Some(name("n")),
                        stride: None,
                    },
                    Subscript::Element(Expr::int(2, sp())),
                ]),
                symbol: None,
            }),
            sp(),
        );
        assert_eq!(e.to_string(), "a(1:n, 2)");
    }

    #[test]
    fn references_walks_subscripts() {
        let mut i = name("i");
        if let ExprKind::Ref(r) = &mut i.kind {
            r.symbol = Some(SymbolId(3));
        }
        let e = Expr::new(
            ExprKind::Ref(DataRef {
                name: Ident::new("a", sp()),
                subscripts: Some(vec![Subscript::Element(i)]),
                symbol: Some(SymbolId(1)),
            }),
            sp(),
        );
        assert!(e.references(SymbolId(3)));
        assert!(e.references(SymbolId(1)));
        assert!(!e.references(SymbolId(2)));
        assert_eq!(e.ref_symbol(), Some(SymbolId(1)));
        assert_eq!(e.whole_var(), None);
    }

    #[test]
    fn take_leaves_placeholder() {
        let mut e = Expr::int(4, sp());
        let taken = e.take();
        assert_eq!(taken.kind, ExprKind::Int(4));
        assert_eq!(e.kind, ExprKind::Error);
    }
}
