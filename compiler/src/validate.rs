// validate.rs — Clause-set validation
//
// Checks a bound clause set against the cross-clause rules: scalar clause
// expression types, symbol exclusivity across list classes, and per-class
// attribute and type constraints. Every violation is reported; nothing here
// stops resolution of the surrounding program.
//
// Preconditions: list entries are bound to symbols (unbound entries were
//   already reported and are skipped).
// Postconditions: scalar clause expressions are typed; `collapse` holds the
//   folded collapse count (1 when invalid).
// Failure modes: diagnostics E0200–E0207.
// Side effects: pushes diagnostics into the environment's sink.

use std::collections::HashSet;

use tracing::trace;

use crate::ast::{Expr, ExprKind, Span, Subscript};
use crate::clauses::{ClauseSet, ListClass, NamelistEntry, ReductionOp};
use crate::diag::{codes, DiagCode, DiagLevel, Diagnostic};
use crate::directive::DirectiveKind;
use crate::expr::{const_int, ExprScope};
use crate::id::{ScopeId, SymbolId};
use crate::symbols::{BaseType, Flavor, Symbol, SymbolTable, Type};

// ── Environment ──────────────────────────────────────────────────────────

/// What the directive checkers need from the resolver: the symbol table,
/// the scope the directive sits in, and a diagnostic sink.
pub struct DirectiveEnv<'a> {
    pub symbols: &'a SymbolTable,
    pub scope: ScopeId,
    pub diags: &'a mut Vec<Diagnostic>,
}

impl<'a> DirectiveEnv<'a> {
    pub fn new(symbols: &'a SymbolTable, scope: ScopeId, diags: &'a mut Vec<Diagnostic>) -> Self {
        DirectiveEnv {
            symbols,
            scope,
            diags,
        }
    }

    pub fn symbol(&self, id: SymbolId) -> &'a Symbol {
        self.symbols.symbol(id)
    }

    pub fn error(&mut self, code: DiagCode, span: Span, message: impl Into<String>) {
        self.diags
            .push(Diagnostic::new(DiagLevel::Error, span, message).with_code(code));
    }

    /// Resolve an expression in the directive's scope.
    pub fn resolve_expr(&mut self, expr: &mut Expr) -> bool {
        ExprScope::new(self.symbols, self.scope).resolve(expr, self.diags)
    }
}

/// Where the clauses appear.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClauseContext {
    /// On an executable construct.
    Executable,
    /// On `declare simd`: list items are dummy arguments of `procedure`.
    Interface { procedure: ScopeId },
}

// ── Entry point ──────────────────────────────────────────────────────────

pub fn validate_clauses(
    env: &mut DirectiveEnv<'_>,
    clauses: &mut ClauseSet,
    kind: DirectiveKind,
    context: ClauseContext,
) {
    trace!(directive = %kind, "validating clauses");

    check_scalar_exprs(env, clauses);
    check_variables(env, clauses, context);
    check_exclusive(env, clauses);

    for class in ListClass::all() {
        if clauses.list(class).is_empty() {
            continue;
        }
        match class {
            ListClass::Copyin => check_copyin(env, clauses.list(class)),
            ListClass::Copyprivate => check_copyprivate(env, clauses.list(class)),
            ListClass::Shared => check_shared(env, clauses.list(class)),
            ListClass::Aligned => check_aligned(env, clauses.list_mut(class)),
            ListClass::DependIn | ListClass::DependOut | ListClass::DependInout => {
                check_depend(env, clauses.list_mut(class))
            }
            ListClass::AccCopy
            | ListClass::AccCopyin
            | ListClass::AccCopyout
            | ListClass::AccCreate
            | ListClass::AccPresent => resolve_sections(env, clauses.list_mut(class)),
            ListClass::Linear => {
                check_general(env, class, clauses.list(class));
                check_linear(env, clauses.list_mut(class), context);
            }
            _ => check_general(env, class, clauses.list(class)),
        }
    }
}

// ── Scalar clause expressions ────────────────────────────────────────────

fn check_scalar_exprs(env: &mut DirectiveEnv<'_>, clauses: &mut ClauseSet) {
    let logical = [
        ("if", &mut clauses.if_expr),
        ("final", &mut clauses.final_expr),
    ];
    for (name, slot) in logical {
        if let Some(e) = slot {
            if env.resolve_expr(e) && !(e.rank == 0 && e.ty.is_some_and(Type::is_logical)) {
                let span = e.span;
                env.error(
                    codes::E0200,
                    span,
                    format!("'{name}' clause requires a scalar logical expression"),
                );
            }
        }
    }

    let integer = [
        ("num_threads", &mut clauses.num_threads),
        ("schedule", &mut clauses.chunk_size),
        ("safelen", &mut clauses.safelen),
        ("simdlen", &mut clauses.simdlen),
        ("num_gangs", &mut clauses.num_gangs),
        ("num_workers", &mut clauses.num_workers),
        ("vector_length", &mut clauses.vector_length),
    ];
    for (name, slot) in integer {
        if let Some(e) = slot {
            if env.resolve_expr(e) && !is_scalar_integer(e) {
                let span = e.span;
                env.error(
                    codes::E0200,
                    span,
                    format!("'{name}' clause requires a scalar integer expression"),
                );
            }
        }
    }

    if let Some(e) = &mut clauses.collapse_expr {
        let ok = env.resolve_expr(e);
        match const_int(env.symbols, e) {
            Some(n) if ok && n > 0 => clauses.collapse = u32::try_from(n).unwrap_or(u32::MAX),
            _ => {
                let span = e.span;
                if ok {
                    env.error(
                        codes::E0200,
                        span,
                        "'collapse' clause argument is not a constant positive integer",
                    );
                }
                clauses.collapse = 1;
            }
        }
    }
}

fn is_scalar_integer(e: &Expr) -> bool {
    e.rank == 0 && e.ty.is_some_and(Type::is_integer)
}

// ── Variables ────────────────────────────────────────────────────────────

fn check_variables(env: &mut DirectiveEnv<'_>, clauses: &ClauseSet, context: ClauseContext) {
    for (class, list) in clauses.lists() {
        for entry in list {
            let Some(id) = entry.symbol else { continue };
            let sym = env.symbol(id);
            if sym.flavor != Flavor::Variable {
                env.error(
                    codes::E0202,
                    entry.span,
                    format!("object '{}' in '{}' clause is not a variable", sym.name, class.clause_name()),
                );
                continue;
            }
            if let ClauseContext::Interface { procedure } = context {
                if !(sym.attrs.dummy && sym.scope == procedure) {
                    env.error(
                        codes::E0203,
                        entry.span,
                        format!(
                            "'{}' in '{}' clause is not a dummy argument of the procedure",
                            sym.name,
                            class.clause_name()
                        ),
                    );
                }
            }
        }
    }
}

// ── Exclusivity ──────────────────────────────────────────────────────────
//
// Marks are set per symbol. First every class except firstprivate,
// lastprivate, aligned and depend; then firstprivate and lastprivate
// against those; then each of firstprivate, lastprivate and aligned
// within itself.

fn check_exclusive(env: &mut DirectiveEnv<'_>, clauses: &ClauseSet) {
    let mut marked: HashSet<SymbolId> = HashSet::new();
    let exempt = |c: ListClass| {
        matches!(
            c,
            ListClass::Firstprivate | ListClass::Lastprivate | ListClass::Aligned
        ) || c.is_depend()
    };

    for (class, list) in clauses.lists() {
        if exempt(class) {
            continue;
        }
        for entry in list {
            let Some(id) = entry.symbol else { continue };
            if !marked.insert(id) {
                report_multiple(env, entry, id);
            }
        }
    }

    for class in [ListClass::Firstprivate, ListClass::Lastprivate] {
        for entry in clauses.list(class) {
            let Some(id) = entry.symbol else { continue };
            if marked.remove(&id) {
                report_multiple(env, entry, id);
            }
        }
    }

    for entry in clauses.list(ListClass::Firstprivate) {
        let Some(id) = entry.symbol else { continue };
        if !marked.insert(id) {
            report_multiple(env, entry, id);
        }
    }

    for class in [ListClass::Lastprivate, ListClass::Aligned] {
        for entry in clauses.list(class) {
            if let Some(id) = entry.symbol {
                marked.remove(&id);
            }
        }
        for entry in clauses.list(class) {
            let Some(id) = entry.symbol else { continue };
            if !marked.insert(id) {
                report_multiple(env, entry, id);
            }
        }
    }
}

fn report_multiple(env: &mut DirectiveEnv<'_>, entry: &NamelistEntry, id: SymbolId) {
    let name = env.symbol(id).name.clone();
    env.error(
        codes::E0201,
        entry.span,
        format!("symbol '{name}' present on multiple clauses"),
    );
}

// ── Per-class rules ──────────────────────────────────────────────────────

fn bound<'e>(list: &'e [NamelistEntry]) -> impl Iterator<Item = (&'e NamelistEntry, SymbolId)> {
    list.iter().filter_map(|e| e.symbol.map(|id| (e, id)))
}

fn check_copyin(env: &mut DirectiveEnv<'_>, list: &[NamelistEntry]) {
    for (entry, id) in bound(list) {
        let sym = env.symbol(id);
        if !sym.attrs.threadprivate {
            env.error(
                codes::E0203,
                entry.span,
                format!("non-threadprivate object '{}' in 'copyin' clause", sym.name),
            );
        }
        if env.symbols.has_alloc_comp(sym.ty) {
            env.error(
                codes::E0203,
                entry.span,
                format!("'copyin' clause object '{}' has allocatable components", sym.name),
            );
        }
    }
}

fn check_copyprivate(env: &mut DirectiveEnv<'_>, list: &[NamelistEntry]) {
    for (entry, id) in bound(list) {
        let sym = env.symbol(id);
        if sym.is_assumed_size() {
            env.error(
                codes::E0203,
                entry.span,
                format!("assumed size array '{}' in 'copyprivate' clause", sym.name),
            );
        }
        if env.symbols.has_alloc_comp(sym.ty) {
            env.error(
                codes::E0203,
                entry.span,
                format!("'copyprivate' clause object '{}' has allocatable components", sym.name),
            );
        }
    }
}

fn check_shared(env: &mut DirectiveEnv<'_>, list: &[NamelistEntry]) {
    for (entry, id) in bound(list) {
        let sym = env.symbol(id);
        if sym.attrs.threadprivate {
            env.error(
                codes::E0203,
                entry.span,
                format!("threadprivate object '{}' in 'shared' clause", sym.name),
            );
        }
        if sym.attrs.cray_pointee {
            env.error(
                codes::E0203,
                entry.span,
                format!("Cray pointee '{}' in 'shared' clause", sym.name),
            );
        }
    }
}

fn check_aligned(env: &mut DirectiveEnv<'_>, list: &mut [NamelistEntry]) {
    for entry in list {
        let Some(id) = entry.symbol else { continue };
        let sym = env.symbol(id);
        let c_ptr = sym.ty.is_some_and(|t| t.base == BaseType::CPtr);
        if !(sym.attrs.pointer || sym.attrs.allocatable || sym.attrs.cray_pointer || c_ptr) {
            env.error(
                codes::E0205,
                entry.span,
                format!(
                    "'{}' in 'aligned' clause must be a pointer, allocatable, Cray pointer or c_ptr",
                    sym.name
                ),
            );
        }
        if let Some(e) = &mut entry.expr {
            let name = &sym.name;
            if env.resolve_expr(e) {
                let positive = is_scalar_integer(e) && const_int(env.symbols, e).is_some_and(|v| v > 0);
                if !positive {
                    let span = e.span;
                    env.error(
                        codes::E0205,
                        span,
                        format!(
                            "'{name}' in 'aligned' clause requires a scalar positive constant integer alignment expression"
                        ),
                    );
                }
            }
        }
    }
}

fn check_depend(env: &mut DirectiveEnv<'_>, list: &mut [NamelistEntry]) {
    for entry in list {
        let Some(id) = entry.symbol else { continue };
        let Some(section) = &mut entry.section else { continue };
        let name = env.symbol(id).name.clone();
        if !env.resolve_expr(section) {
            continue;
        }
        let ExprKind::Ref(r) = &section.kind else {
            env.error(
                codes::E0206,
                entry.span,
                format!("'{name}' in 'depend' clause is not a proper array section"),
            );
            continue;
        };
        let subscripts = r.subscripts.as_deref().unwrap_or(&[]);
        for sub in subscripts {
            let Subscript::Range {
                lower,
                upper,
                stride,
            } = sub
            else {
                continue;
            };
            if stride.is_some() {
                env.error(
                    codes::E0206,
                    entry.span,
                    "stride should not be specified for an array section in a 'depend' clause",
                );
                break;
            }
            let bounds = lower
                .as_ref()
                .and_then(|l| const_int(env.symbols, l))
                .zip(upper.as_ref().and_then(|u| const_int(env.symbols, u)));
            if let Some((lo, hi)) = bounds {
                if lo > hi {
                    env.error(
                        codes::E0206,
                        entry.span,
                        format!("'{name}' in 'depend' clause is a zero size array section"),
                    );
                    break;
                }
            }
        }
    }
}

fn resolve_sections(env: &mut DirectiveEnv<'_>, list: &mut [NamelistEntry]) {
    for entry in list {
        if let Some(section) = &mut entry.section {
            env.resolve_expr(section);
        }
    }
}

/// Rules shared by private, firstprivate, lastprivate, reduction, linear
/// and uniform.
fn check_general(env: &mut DirectiveEnv<'_>, class: ListClass, list: &[NamelistEntry]) {
    let clause = class.clause_name();
    let reduction = match class {
        ListClass::Reduction(op) => Some(op),
        _ => None,
    };
    for (entry, id) in bound(list) {
        let sym = env.symbol(id);
        if sym.attrs.threadprivate {
            env.error(
                codes::E0203,
                entry.span,
                format!("threadprivate object '{}' in '{clause}' clause", sym.name),
            );
        }
        if sym.attrs.cray_pointee {
            env.error(
                codes::E0203,
                entry.span,
                format!("Cray pointee '{}' in '{clause}' clause", sym.name),
            );
        }
        if reduction.is_some() && sym.attrs.pointer {
            env.error(
                codes::E0203,
                entry.span,
                format!("pointer object '{}' in '{clause}' clause", sym.name),
            );
        }
        if reduction.is_some() && sym.attrs.cray_pointer {
            env.error(
                codes::E0203,
                entry.span,
                format!("Cray pointer '{}' in '{clause}' clause", sym.name),
            );
        }
        if sym.is_assumed_size() {
            env.error(
                codes::E0203,
                entry.span,
                format!("assumed size array '{}' in '{clause}' clause", sym.name),
            );
        }
        if reduction.is_none() && sym.attrs.in_namelist {
            env.error(
                codes::E0203,
                entry.span,
                format!("variable '{}' in '{clause}' clause is used in a namelist statement", sym.name),
            );
        }
        if let Some(op) = reduction {
            check_reduction_type(env, entry, sym, op);
        }
    }
}

fn check_reduction_type(env: &mut DirectiveEnv<'_>, entry: &NamelistEntry, sym: &Symbol, op: ReductionOp) {
    let Some(ty) = sym.ty else { return };
    let (ok, wanted) = match op {
        ReductionOp::Add | ReductionOp::Mul | ReductionOp::Sub => (ty.is_numeric(), "numeric"),
        ReductionOp::And | ReductionOp::Or | ReductionOp::Eqv | ReductionOp::Neqv => {
            (ty.is_logical(), "logical")
        }
        ReductionOp::Max | ReductionOp::Min => (ty.is_integer() || ty.is_real(), "integer or real"),
        ReductionOp::Iand | ReductionOp::Ior | ReductionOp::Ieor => (ty.is_integer(), "integer"),
    };
    if !ok {
        env.error(
            codes::E0204,
            entry.span,
            format!(
                "'{op}' reduction variable '{}' must be of {wanted} type, got {ty}",
                sym.name
            ),
        );
    }
}

fn check_linear(
    env: &mut DirectiveEnv<'_>,
    list: &mut [NamelistEntry],
    context: ClauseContext,
) {
    let interface = matches!(context, ClauseContext::Interface { .. });
    for entry in list {
        let Some(id) = entry.symbol else { continue };
        let sym = env.symbol(id);
        if !sym.ty.is_some_and(Type::is_integer) {
            env.error(
                codes::E0207,
                entry.span,
                format!("'linear' variable '{}' must be integer", sym.name),
            );
        } else if interface && !sym.attrs.value {
            env.error(
                codes::E0207,
                entry.span,
                format!("'linear' dummy argument '{}' must have the value attribute", sym.name),
            );
        }
        let Some(step) = &mut entry.expr else { continue };
        if !env.resolve_expr(step) {
            continue;
        }
        let span = step.span;
        if !is_scalar_integer(step) {
            env.error(
                codes::E0207,
                span,
                format!("'{}' in 'linear' clause requires a scalar integer linear-step expression", sym.name),
            );
        } else if interface && const_int(env.symbols, step).is_none() {
            env.error(
                codes::E0207,
                span,
                format!(
                    "'{}' in 'linear' clause requires a constant integer linear-step expression",
                    sym.name
                ),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Ident;
    use crate::symbols::{ArrayKind, ArraySpec, ScopeKind};

    struct Fixture {
        symbols: SymbolTable,
        scope: ScopeId,
    }

    impl Fixture {
        fn new() -> Self {
            let mut symbols = SymbolTable::new();
            let scope = symbols.add_scope(Some(symbols.global()), ScopeKind::Unit { name: "p".into() });
            Fixture { symbols, scope }
        }

        fn var(&mut self, name: &str, ty: Type) -> SymbolId {
            let id = self
                .symbols
                .declare(self.scope, name, Flavor::Variable, sp())
                .unwrap();
            self.symbols.symbol_mut(id).ty = Some(ty);
            id
        }

        fn run(&self, clauses: &mut ClauseSet) -> Vec<Diagnostic> {
            let mut diags = Vec::new();
            let mut env = DirectiveEnv::new(&self.symbols, self.scope, &mut diags);
            validate_clauses(&mut env, clauses, DirectiveKind::ParallelDo, ClauseContext::Executable);
            diags
        }
    }

    fn sp() -> Span {
        (0..1).into()
    }

    fn entry(name: &str, id: SymbolId) -> NamelistEntry {
        let mut e = NamelistEntry::new(Ident::new(name, sp()));
        e.symbol = Some(id);
        e
    }

    fn codes_of(diags: &[Diagnostic]) -> Vec<&'static str> {
        diags.iter().filter_map(|d| d.code.map(|c| c.0)).collect()
    }

    #[test]
    fn private_and_shared_collide_once() {
        let mut f = Fixture::new();
        let x = f.var("x", Type::integer());
        let mut cs = ClauseSet::new();
        cs.push(ListClass::Private, entry("x", x));
        cs.push(ListClass::Shared, entry("x", x));
        let diags = f.run(&mut cs);
        assert_eq!(codes_of(&diags), ["E0201"]);
        assert!(diags[0].message.contains("'x'"));
    }

    #[test]
    fn firstprivate_lastprivate_overlap_is_allowed() {
        let mut f = Fixture::new();
        let x = f.var("x", Type::integer());
        let mut cs = ClauseSet::new();
        cs.push(ListClass::Firstprivate, entry("x", x));
        cs.push(ListClass::Lastprivate, entry("x", x));
        assert!(f.run(&mut cs).is_empty());
    }

    #[test]
    fn firstprivate_collides_with_private() {
        let mut f = Fixture::new();
        let x = f.var("x", Type::integer());
        let mut cs = ClauseSet::new();
        cs.push(ListClass::Private, entry("x", x));
        cs.push(ListClass::Firstprivate, entry("x", x));
        assert_eq!(codes_of(&f.run(&mut cs)), ["E0201"]);
    }

    #[test]
    fn duplicate_within_lastprivate() {
        let mut f = Fixture::new();
        let x = f.var("x", Type::integer());
        let mut cs = ClauseSet::new();
        cs.push(ListClass::Lastprivate, entry("x", x));
        cs.push(ListClass::Lastprivate, entry("x", x));
        assert_eq!(codes_of(&f.run(&mut cs)), ["E0201"]);
    }

    #[test]
    fn depend_is_exempt_from_exclusivity() {
        let mut f = Fixture::new();
        let x = f.var("x", Type::integer());
        let mut cs = ClauseSet::new();
        cs.push(ListClass::Shared, entry("x", x));
        cs.push(ListClass::DependIn, entry("x", x));
        cs.push(ListClass::DependOut, entry("x", x));
        assert!(f.run(&mut cs).is_empty());
    }

    #[test]
    fn depend_sections() {
        let mut f = Fixture::new();
        let a = f.var("a", Type::real(4));
        f.symbols.symbol_mut(a).array = Some(ArraySpec {
            kind: ArrayKind::Explicit,
            rank: 1,
            elements: Some(8),
        });
        let mask = DirectiveKind::Task.clause_mask();

        let cases: [(&str, &[&str]); 5] = [
            ("a(1:8:2)", &["E0206"]),
            ("a(5:1)", &["E0206"]),
            ("a(2:4)", &[]),
            ("a", &[]),
            ("a(3)", &[]),
        ];
        for (item, expected) in cases {
            let text = format!(" depend(in: {item})");
            let mut cs = crate::clause_parser::parse_clauses(
                &text,
                0..text.len(),
                mask,
                Default::default(),
            )
            .unwrap();
            let list = cs.list_mut(ListClass::DependIn);
            list[0].symbol = Some(a);

            let mut diags = Vec::new();
            let mut env = DirectiveEnv::new(&f.symbols, f.scope, &mut diags);
            check_depend(&mut env, list);
            assert_eq!(codes_of(&diags), expected, "{item}");
        }
    }

    #[test]
    fn reduction_types() {
        let mut f = Fixture::new();
        let l = f.var("l", Type::logical());
        let r = f.var("r", Type::real(8));
        let mut cs = ClauseSet::new();
        cs.push(ListClass::Reduction(ReductionOp::Add), entry("l", l));
        let diags = f.run(&mut cs);
        assert_eq!(codes_of(&diags), ["E0204"]);
        assert_eq!(diags[0].class(), crate::diag::ErrorClass::Type);

        let mut cs = ClauseSet::new();
        cs.push(ListClass::Reduction(ReductionOp::And), entry("l", l));
        cs.push(ListClass::Reduction(ReductionOp::Max), entry("r", r));
        assert!(f.run(&mut cs).is_empty());

        let mut cs = ClauseSet::new();
        cs.push(ListClass::Reduction(ReductionOp::Iand), entry("r", r));
        assert_eq!(codes_of(&f.run(&mut cs)), ["E0204"]);
    }

    #[test]
    fn threadprivate_rules() {
        let mut f = Fixture::new();
        let t = f.var("t", Type::integer());
        f.symbols.symbol_mut(t).attrs.threadprivate = true;
        let y = f.var("y", Type::integer());

        let mut cs = ClauseSet::new();
        cs.push(ListClass::Copyin, entry("t", t));
        assert!(f.run(&mut cs).is_empty());

        let mut cs = ClauseSet::new();
        cs.push(ListClass::Copyin, entry("y", y));
        cs.push(ListClass::Shared, entry("t", t));
        assert_eq!(codes_of(&f.run(&mut cs)), ["E0203", "E0203"]);
    }

    #[test]
    fn assumed_size_and_namelist() {
        let mut f = Fixture::new();
        let a = f.var("a", Type::real(4));
        f.symbols.symbol_mut(a).array = Some(ArraySpec {
            kind: ArrayKind::AssumedSize,
            rank: 1,
            elements: None,
        });
        let n = f.var("n", Type::integer());
        f.symbols.symbol_mut(n).attrs.in_namelist = true;

        let mut cs = ClauseSet::new();
        cs.push(ListClass::Private, entry("a", a));
        cs.push(ListClass::Firstprivate, entry("n", n));
        assert_eq!(codes_of(&f.run(&mut cs)), ["E0203", "E0203"]);

        // Namelist membership is fine on a reduction.
        let mut cs = ClauseSet::new();
        cs.push(ListClass::Reduction(ReductionOp::Add), entry("n", n));
        assert!(f.run(&mut cs).is_empty());
    }

    #[test]
    fn scalar_clause_types() {
        let f = Fixture::new();
        let mut cs = ClauseSet::new();
        cs.if_expr = Some(Expr::int(1, sp()));
        cs.num_threads = Some(Expr::new(ExprKind::Logical(true), sp()));
        cs.collapse_expr = Some(Expr::int(0, sp()));
        let diags = f.run(&mut cs);
        assert_eq!(codes_of(&diags), ["E0200", "E0200", "E0200"]);
        assert_eq!(cs.collapse, 1);

        let mut cs = ClauseSet::new();
        cs.collapse_expr = Some(Expr::int(3, sp()));
        assert!(f.run(&mut cs).is_empty());
        assert_eq!(cs.collapse, 3);
    }

    #[test]
    fn aligned_requires_pointer_like() {
        let mut f = Fixture::new();
        let p = f.var("p", Type::real(4));
        f.symbols.symbol_mut(p).attrs.pointer = true;
        let q = f.var("q", Type::real(4));
        let mut cs = ClauseSet::new();
        let mut e = entry("p", p);
        e.expr = Some(Expr::int(0, sp()));
        cs.push(ListClass::Aligned, e);
        cs.push(ListClass::Aligned, entry("q", q));
        assert_eq!(codes_of(&f.run(&mut cs)), ["E0205", "E0205"]);
    }

    #[test]
    fn linear_in_interface_needs_value_and_constant_step() {
        let mut f = Fixture::new();
        let a = f.var("a", Type::integer());
        let b = f.var("b", Type::integer());
        f.symbols.symbol_mut(a).attrs.dummy = true;
        f.symbols.symbol_mut(b).attrs.dummy = true;
        f.symbols.symbol_mut(b).attrs.value = true;
        let mut cs = ClauseSet::new();
        cs.push(ListClass::Linear, entry("a", a));
        let mut e = entry("b", b);
        e.expr = Some(Expr::var(Ident::new("a", sp()), a, None));
        cs.push(ListClass::Linear, e);

        let mut diags = Vec::new();
        let mut env = DirectiveEnv::new(&f.symbols, f.scope, &mut diags);
        let context = ClauseContext::Interface { procedure: f.scope };
        validate_clauses(&mut env, &mut cs, DirectiveKind::DeclareSimd, context);
        // `a` lacks value; `b`'s step is not a constant.
        assert_eq!(codes_of(&diags), ["E0207", "E0207"]);
    }

    #[test]
    fn non_variable_items() {
        let mut f = Fixture::new();
        let k = f
            .symbols
            .declare(f.scope, "k", Flavor::Parameter, sp())
            .unwrap();
        let mut cs = ClauseSet::new();
        cs.push(ListClass::Private, entry("k", k));
        assert_eq!(codes_of(&f.run(&mut cs)), ["E0202"]);
    }
}
