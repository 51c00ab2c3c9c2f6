// region.rs — Region IR
//
// Statement tree produced by lowering and rewritten by the kernels
// decomposer. Unlike the AST it is self-contained: every variable carries
// the facts later passes need (compiler temporary or not, byte size), so
// passes over it never consult the symbol table.
//
// Scopes are explicit `Bind` nodes owning their locals; offload constructs
// are `Target` nodes with a kind and a clause list.

use std::fmt;

use crate::ast::{Expr, Span};
use crate::clauses::ReductionOp;
use crate::directive::DirectiveKind;
use crate::id::SymbolId;

// ── Variables ───────────────────────────────────────────────────────────────

/// A variable declared by a scope of the region tree.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalVar {
    pub symbol: SymbolId,
    pub name: String,
    /// Introduced by the compiler rather than declared in source.
    pub artificial: bool,
    /// Bytes occupied, when known.
    pub size: Option<u64>,
}

// ── Clauses ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapKind {
    To,
    From,
    ToFrom,
    Alloc,
    ForcePresent,
    ForceToFrom,
    ToPset,
    Pointer,
    FirstprivatePointer,
    FirstprivateReference,
}

impl MapKind {
    pub fn name(self) -> &'static str {
        match self {
            MapKind::To => "to",
            MapKind::From => "from",
            MapKind::ToFrom => "tofrom",
            MapKind::Alloc => "alloc",
            MapKind::ForcePresent => "force_present",
            MapKind::ForceToFrom => "force_tofrom",
            MapKind::ToPset => "to_pset",
            MapKind::Pointer => "pointer",
            MapKind::FirstprivatePointer => "firstprivate_pointer",
            MapKind::FirstprivateReference => "firstprivate_reference",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MapTarget {
    /// A whole variable.
    Decl(LocalVar),
    /// An array section or element, e.g. `a(1:n)`.
    Section(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MapClause {
    pub kind: MapKind,
    pub target: MapTarget,
    pub size: Option<u64>,
}

impl MapClause {
    /// Maps a variable that is not a compiler temporary, or any section.
    pub fn maps_user_data(&self) -> bool {
        match &self.target {
            MapTarget::Decl(var) => !var.artificial,
            MapTarget::Section(_) => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AccClause {
    Map(MapClause),
    If(Expr),
    NumGangs(Expr),
    NumWorkers(Expr),
    VectorLength(Expr),
    Collapse(u32),
    Gang,
    Worker,
    Vector,
    Seq,
    Auto,
    Independent,
    Private(Vec<LocalVar>),
    Reduction(ReductionOp, Vec<LocalVar>),
}

// ── Statements ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    /// `!$acc kernels` as written.
    Kernels,
    /// Parallel region holding one loop of a decomposed kernels region.
    ParallelLoop,
    /// Parallel region run by a single gang.
    GangSingle,
    /// Data region created by decomposition.
    Data,
}

impl TargetKind {
    pub fn name(self) -> &'static str {
        match self {
            TargetKind::Kernels => "kernels",
            TargetKind::ParallelLoop => "parallel_kernels_parallelized",
            TargetKind::GangSingle => "parallel_kernels_gang_single",
            TargetKind::Data => "data_kernels",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub kind: TargetKind,
    pub clauses: Vec<AccClause>,
    /// Variables declared directly in the region body.
    pub locals: Vec<LocalVar>,
    pub body: Vec<RStmt>,
    pub span: Span,
}

/// `!$acc loop` and the counted DO loop it annotates.
#[derive(Debug, Clone, PartialEq)]
pub struct AccLoop {
    pub clauses: Vec<AccClause>,
    pub var: LocalVar,
    pub start: Expr,
    pub end: Expr,
    pub step: Option<Expr>,
    pub body: Vec<RStmt>,
    pub span: Span,
}

impl AccLoop {
    /// Carries an explicit parallelization scheme tag.
    pub fn has_scheme(&self) -> bool {
        self.clauses
            .iter()
            .any(|c| matches!(c, AccClause::Auto | AccClause::Independent | AccClause::Seq))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RStmt {
    /// Lexical scope owning `vars`.
    Bind { vars: Vec<LocalVar>, body: Vec<RStmt> },
    /// `cleanup` runs on every exit from `body`.
    TryFinally { body: Vec<RStmt>, cleanup: Vec<RStmt> },
    Assign {
        lhs: Expr,
        rhs: Expr,
        /// The target is a whole compiler temporary.
        to_temp: bool,
    },
    Loop(Box<AccLoop>),
    Do {
        var: LocalVar,
        start: Expr,
        end: Expr,
        step: Option<Expr>,
        body: Vec<RStmt>,
    },
    While { cond: Expr, body: Vec<RStmt> },
    If {
        cond: Expr,
        then_body: Vec<RStmt>,
        else_body: Vec<RStmt>,
    },
    Call { name: String, args: Vec<Expr> },
    Print(Vec<Expr>),
    Nop,
    /// An OpenMP construct, kept opaque.
    Omp { kind: DirectiveKind, body: Vec<RStmt> },
    Target(Box<Target>),
    /// End of the innermost data region.
    DataEnd,
}

impl RStmt {
    pub fn as_target(&self) -> Option<&Target> {
        match self {
            RStmt::Target(t) => Some(t),
            _ => None,
        }
    }
}

// ── Program ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct RegionFunction {
    pub name: String,
    pub locals: Vec<LocalVar>,
    pub body: Vec<RStmt>,
    /// Instantiated from a template; decomposition then keeps every
    /// flattened variable local.
    pub is_template_instance: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegionProgram {
    pub functions: Vec<RegionFunction>,
}

/// Pre-order walk over every statement, including nested bodies.
pub fn walk<'a>(body: &'a [RStmt], f: &mut dyn FnMut(&'a RStmt)) {
    for stmt in body {
        f(stmt);
        match stmt {
            RStmt::Bind { body, .. }
            | RStmt::While { body, .. }
            | RStmt::Do { body, .. }
            | RStmt::Omp { body, .. } => walk(body, f),
            RStmt::TryFinally { body, cleanup } => {
                walk(body, f);
                walk(cleanup, f);
            }
            RStmt::If {
                then_body,
                else_body,
                ..
            } => {
                walk(then_body, f);
                walk(else_body, f);
            }
            RStmt::Loop(l) => walk(&l.body, f),
            RStmt::Target(t) => walk(&t.body, f),
            RStmt::Assign { .. }
            | RStmt::Call { .. }
            | RStmt::Print(_)
            | RStmt::Nop
            | RStmt::DataEnd => {}
        }
    }
}

// ── Display ─────────────────────────────────────────────────────────────────

impl fmt::Display for LocalVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

fn var_list(vars: &[LocalVar]) -> String {
    vars.iter()
        .map(|v| v.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

impl fmt::Display for AccClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccClause::Map(m) => {
                write!(f, "map({}:", m.kind.name())?;
                match &m.target {
                    MapTarget::Decl(v) => write!(f, "{v}")?,
                    MapTarget::Section(e) => write!(f, "{e}")?,
                }
                match m.size {
                    Some(n) => write!(f, " [{n}])"),
                    None => f.write_str(")"),
                }
            }
            AccClause::If(e) => write!(f, "if({e})"),
            AccClause::NumGangs(e) => write!(f, "num_gangs({e})"),
            AccClause::NumWorkers(e) => write!(f, "num_workers({e})"),
            AccClause::VectorLength(e) => write!(f, "vector_length({e})"),
            AccClause::Collapse(n) => write!(f, "collapse({n})"),
            AccClause::Gang => f.write_str("gang"),
            AccClause::Worker => f.write_str("worker"),
            AccClause::Vector => f.write_str("vector"),
            AccClause::Seq => f.write_str("seq"),
            AccClause::Auto => f.write_str("auto"),
            AccClause::Independent => f.write_str("independent"),
            AccClause::Private(vars) => write!(f, "private({})", var_list(vars)),
            AccClause::Reduction(op, vars) => write!(f, "reduction({op}:{})", var_list(vars)),
        }
    }
}

fn clause_suffix(clauses: &[AccClause]) -> String {
    clauses.iter().map(|c| format!(" {c}")).collect()
}

fn write_body(f: &mut fmt::Formatter<'_>, body: &[RStmt], depth: usize) -> fmt::Result {
    for stmt in body {
        write_stmt(f, stmt, depth)?;
    }
    Ok(())
}

fn write_stmt(f: &mut fmt::Formatter<'_>, stmt: &RStmt, depth: usize) -> fmt::Result {
    let pad = "  ".repeat(depth);
    match stmt {
        RStmt::Bind { vars, body } => {
            if vars.is_empty() {
                writeln!(f, "{pad}bind")?;
            } else {
                writeln!(f, "{pad}bind [{}]", var_list(vars))?;
            }
            write_body(f, body, depth + 1)
        }
        RStmt::TryFinally { body, cleanup } => {
            writeln!(f, "{pad}try")?;
            write_body(f, body, depth + 1)?;
            writeln!(f, "{pad}finally")?;
            write_body(f, cleanup, depth + 1)
        }
        RStmt::Assign { lhs, rhs, .. } => writeln!(f, "{pad}{lhs} = {rhs}"),
        RStmt::Loop(l) => {
            let step = l.step.as_ref().map(|s| format!(", {s}")).unwrap_or_default();
            writeln!(
                f,
                "{pad}acc loop{} do {} = {}, {}{step}",
                clause_suffix(&l.clauses),
                l.var,
                l.start,
                l.end
            )?;
            write_body(f, &l.body, depth + 1)
        }
        RStmt::Do {
            var,
            start,
            end,
            step,
            body,
        } => {
            let step = step.as_ref().map(|s| format!(", {s}")).unwrap_or_default();
            writeln!(f, "{pad}do {var} = {start}, {end}{step}")?;
            write_body(f, body, depth + 1)
        }
        RStmt::While { cond, body } => {
            writeln!(f, "{pad}do while ({cond})")?;
            write_body(f, body, depth + 1)
        }
        RStmt::If {
            cond,
            then_body,
            else_body,
        } => {
            writeln!(f, "{pad}if ({cond})")?;
            write_body(f, then_body, depth + 1)?;
            if !else_body.is_empty() {
                writeln!(f, "{pad}else")?;
                write_body(f, else_body, depth + 1)?;
            }
            Ok(())
        }
        RStmt::Call { name, args } => {
            let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
            writeln!(f, "{pad}call {name}({})", args.join(", "))
        }
        RStmt::Print(items) => {
            let items: Vec<String> = items.iter().map(|a| a.to_string()).collect();
            writeln!(f, "{pad}print *, {}", items.join(", "))
        }
        RStmt::Nop => writeln!(f, "{pad}nop"),
        RStmt::Omp { kind, body } => {
            writeln!(f, "{pad}{kind}")?;
            write_body(f, body, depth + 1)
        }
        RStmt::Target(t) => {
            write!(f, "{pad}{}{}", t.kind.name(), clause_suffix(&t.clauses))?;
            if !t.locals.is_empty() {
                write!(f, " locals [{}]", var_list(&t.locals))?;
            }
            writeln!(f)?;
            write_body(f, &t.body, depth + 1)
        }
        RStmt::DataEnd => writeln!(f, "{pad}data_end"),
    }
}

impl fmt::Display for RStmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_stmt(f, self, 0)
    }
}

impl fmt::Display for RegionProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for func in &self.functions {
            write!(f, "function {}", func.name)?;
            if !func.locals.is_empty() {
                write!(f, " [{}]", var_list(&func.locals))?;
            }
            writeln!(f)?;
            write_body(f, &func.body, 1)?;
        }
        Ok(())
    }
}
