// resolve.rs — Name and directive resolution
//
// Walks the parsed program, builds the symbol table from the specification
// parts, types every expression, and resolves the OpenMP/OpenACC directives
// embedded in the statement lists: clause names are bound (common blocks
// expanded), clause sets validated, sequential loop variables inside
// parallel constructs made private, loop nests and atomic statements
// checked.
//
// Preconditions: `program` came from the parser; directives whose clauses
//   failed to parse carry `clauses: None` and are resolved without them.
// Postconditions: units and blocks carry their scope; references are bound;
//   atomic directives carry `atomic_info`.
// Failure modes: every problem becomes a `Diagnostic`; resolution continues
//   past errors.
// Side effects: rewrites the AST in place (bindings, conversions, implicit
//   private entries, canonical atomic updates).

use std::collections::HashSet;

use tracing::{debug, trace};

use crate::ast::*;
use crate::atomic;
use crate::clauses::{ClauseSet, ListClass, NamelistEntry};
use crate::diag::{codes, DiagCode, DiagLevel, Diagnostic};
use crate::directive::DirectiveKind;
use crate::expr::{coerce, const_int, ExprScope};
use crate::id::{ScopeId, SymbolId};
use crate::loops;
use crate::omp_context::OmpState;
use crate::symbols::{ArrayKind, ArraySpec, BaseType, Flavor, ScopeKind, SymbolTable, Type};
use crate::validate::{self, ClauseContext, DirectiveEnv};

// ── Public types ────────────────────────────────────────────────────────────

/// Result of resolution: the symbol table plus all diagnostics.
#[derive(Debug)]
pub struct ResolveResult {
    pub symbols: SymbolTable,
    pub diagnostics: Vec<Diagnostic>,
}

impl ResolveResult {
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }
}

// ── Public entry point ──────────────────────────────────────────────────────

pub fn resolve(program: &mut Program) -> ResolveResult {
    let mut ctx = ResolveCtx::new();

    // Pass 1: program units become procedures of the global scope
    ctx.collect_units(program);

    // Pass 2: declarations, then statements and directives, per unit
    for unit in &mut program.units {
        ctx.resolve_unit(unit);
    }

    ResolveResult {
        symbols: ctx.symbols,
        diagnostics: ctx.diagnostics,
    }
}

// ── Internal context ────────────────────────────────────────────────────────

struct ResolveCtx {
    symbols: SymbolTable,
    diagnostics: Vec<Diagnostic>,
    omp: OmpState,
    /// Name of the unit being resolved.
    unit_name: String,
}

impl ResolveCtx {
    fn new() -> Self {
        ResolveCtx {
            symbols: SymbolTable::new(),
            diagnostics: Vec::new(),
            omp: OmpState::new(),
            unit_name: String::new(),
        }
    }

    fn error(&mut self, code: DiagCode, span: Span, message: String) {
        self.diagnostics
            .push(Diagnostic::new(DiagLevel::Error, span, message).with_code(code));
    }

    fn resolve_expr(&mut self, scope: ScopeId, expr: &mut Expr) -> bool {
        ExprScope::new(&self.symbols, scope).resolve(expr, &mut self.diagnostics)
    }

    fn env(&mut self, scope: ScopeId) -> DirectiveEnv<'_> {
        DirectiveEnv::new(&self.symbols, scope, &mut self.diagnostics)
    }

    // ── Pass 1: program units ───────────────────────────────────────────

    fn collect_units(&mut self, program: &Program) {
        let global = self.symbols.global();
        for unit in &program.units {
            let name = &unit.name;
            match self
                .symbols
                .declare(global, &name.name, Flavor::Procedure, name.span)
            {
                Ok(_) => {}
                Err(_) => self.error(
                    codes::E0101,
                    name.span,
                    format!("duplicate program unit '{name}'"),
                ),
            }
        }
    }

    // ── Pass 2: units ───────────────────────────────────────────────────

    fn resolve_unit(&mut self, unit: &mut Unit) {
        debug!(unit = %unit.name, "resolving unit");
        let global = self.symbols.global();
        let scope = self.symbols.add_scope(
            Some(global),
            ScopeKind::Unit {
                name: unit.name.name.clone(),
            },
        );
        unit.scope = Some(scope);
        self.unit_name = unit.name.name.clone();

        for param in &unit.params {
            match self
                .symbols
                .declare(scope, &param.name, Flavor::Variable, param.span)
            {
                Ok(id) => self.symbols.symbol_mut(id).attrs.dummy = true,
                Err(_) => self.error(
                    codes::E0101,
                    param.span,
                    format!("duplicate dummy argument '{param}'"),
                ),
            }
        }

        self.resolve_specs(scope, &mut unit.specs);
        self.resolve_body(scope, &mut unit.body);
    }

    // ── Specification part ──────────────────────────────────────────────

    fn resolve_specs(&mut self, scope: ScopeId, specs: &mut [SpecStmt]) {
        for spec in specs.iter_mut() {
            match spec {
                SpecStmt::Implicit(_) => {}
                SpecStmt::DerivedType(def) => self.declare_derived(scope, def),
                SpecStmt::Decl(decl) => self.declare_entities(scope, decl),
                SpecStmt::Common(group) => self.declare_common(scope, group),
                SpecStmt::Namelist(group) => self.declare_namelist(scope, group),
                SpecStmt::CrayPointer(cp) => self.declare_cray_pointer(scope, cp),
                SpecStmt::Threadprivate(_) | SpecStmt::DeclareSimd(_) => {}
            }
        }

        // Directives in the specification part see every declaration.
        for spec in specs.iter_mut() {
            match spec {
                SpecStmt::Threadprivate(tp) => self.resolve_threadprivate(scope, tp),
                SpecStmt::DeclareSimd(ds) => self.resolve_declare_simd(scope, ds),
                _ => {}
            }
        }

        self.check_untyped(scope);
    }

    fn type_of(&mut self, scope: ScopeId, spec: &TypeSpec) -> Option<Type> {
        let kind = spec.kind.unwrap_or(Type::DEFAULT_KIND);
        let (base, valid_kinds): (BaseType, &[u8]) = match &spec.name {
            TypeName::Integer => (BaseType::Integer, &[1, 2, 4, 8]),
            TypeName::Logical => (BaseType::Logical, &[1, 2, 4, 8]),
            TypeName::Real => (BaseType::Real, &[4, 8]),
            TypeName::Complex => (BaseType::Complex, &[4, 8]),
            TypeName::Character => return Some(Type::character()),
            TypeName::Derived(name) if name.name.eq_ignore_ascii_case("c_ptr") => {
                return Some(Type {
                    base: BaseType::CPtr,
                    kind: 8,
                })
            }
            TypeName::Derived(name) => {
                return match self.symbols.lookup_derived(scope, &name.name) {
                    Some(id) => Some(Type {
                        base: BaseType::Derived(id),
                        kind: 0,
                    }),
                    None => {
                        self.error(
                            codes::E0102,
                            name.span,
                            format!("unknown derived type '{name}'"),
                        );
                        None
                    }
                };
            }
        };
        if !valid_kinds.contains(&kind) {
            self.error(
                codes::E0102,
                spec.span,
                format!("kind {kind} is not supported for this type"),
            );
            return None;
        }
        Some(Type { base, kind })
    }

    fn array_spec(&mut self, scope: ScopeId, dims: &mut [DimSpec]) -> ArraySpec {
        let mut kind = ArrayKind::Explicit;
        let mut elements = Some(1u64);
        for dim in dims.iter_mut() {
            match dim {
                DimSpec::Explicit { lower, upper } => {
                    let lo = match lower {
                        Some(l) => {
                            self.resolve_expr(scope, l);
                            const_int(&self.symbols, l)
                        }
                        None => Some(1),
                    };
                    self.resolve_expr(scope, upper);
                    let hi = const_int(&self.symbols, upper);
                    elements = match (elements, lo, hi) {
                        (Some(n), Some(lo), Some(hi)) => {
                            Some(n * u64::try_from(hi - lo + 1).unwrap_or(0))
                        }
                        _ => None,
                    };
                }
                DimSpec::Deferred => {
                    kind = ArrayKind::Deferred;
                    elements = None;
                }
                DimSpec::AssumedSize { lower } => {
                    if let Some(l) = lower {
                        self.resolve_expr(scope, l);
                    }
                    kind = ArrayKind::AssumedSize;
                    elements = None;
                }
            }
        }
        ArraySpec {
            kind,
            rank: u8::try_from(dims.len()).unwrap_or(u8::MAX),
            elements,
        }
    }

    fn declare_derived(&mut self, scope: ScopeId, def: &mut DerivedTypeDef) {
        let mut size = 0u64;
        let mut has_alloc_comp = false;
        for comp in &mut def.components {
            let ty = self.type_of(scope, &comp.ty);
            let mut shared_dims = None;
            for attr in &mut comp.attrs {
                match &mut attr.kind {
                    AttrKind::Allocatable => has_alloc_comp = true,
                    AttrKind::Dimension(dims) => shared_dims = Some(self.array_spec(scope, dims)),
                    _ => {}
                }
            }
            let Some(ty) = ty else { continue };
            for entity in &mut comp.entities {
                let spec = match &mut entity.dims {
                    Some(dims) => Some(self.array_spec(scope, dims)),
                    None => shared_dims.clone(),
                };
                let count = spec.map(|s| s.elements.unwrap_or(0)).unwrap_or(1);
                size += self.symbols.type_size(ty) * count;
            }
        }
        if self.symbols.lookup_derived(scope, &def.name.name).is_some() {
            self.error(
                codes::E0101,
                def.name.span,
                format!("duplicate derived type '{}'", def.name),
            );
            return;
        }
        self.symbols
            .add_derived(scope, &def.name.name, has_alloc_comp, size);
    }

    /// Declare `name`, or adopt an untyped variable introduced earlier by a
    /// dummy-argument list, common block or Cray pointer statement.
    fn declare_or_adopt(&mut self, scope: ScopeId, name: &Ident, flavor: Flavor) -> Option<SymbolId> {
        match self.symbols.declare(scope, &name.name, flavor, name.span) {
            Ok(id) => Some(id),
            Err(existing) => {
                let sym = self.symbols.symbol(existing);
                if sym.flavor == Flavor::Variable && flavor == Flavor::Variable && sym.ty.is_none() {
                    Some(existing)
                } else {
                    self.error(
                        codes::E0101,
                        name.span,
                        format!("duplicate declaration of '{name}'"),
                    );
                    None
                }
            }
        }
    }

    fn declare_entities(&mut self, scope: ScopeId, decl: &mut TypeDecl) {
        let ty = self.type_of(scope, &decl.ty);
        let mut flavor = Flavor::Variable;
        let mut attrs = crate::symbols::Attrs::default();
        let mut shared_dims = None;
        for attr in &mut decl.attrs {
            match &mut attr.kind {
                AttrKind::Allocatable => attrs.allocatable = true,
                AttrKind::Pointer => attrs.pointer = true,
                AttrKind::Target => attrs.target = true,
                AttrKind::Value => attrs.value = true,
                AttrKind::Parameter => flavor = Flavor::Parameter,
                AttrKind::Intent(_) => {}
                AttrKind::Dimension(dims) => shared_dims = Some(self.array_spec(scope, dims)),
            }
        }

        for entity in &mut decl.entities {
            let array = match &mut entity.dims {
                Some(dims) => Some(self.array_spec(scope, dims)),
                None => shared_dims.clone(),
            };
            if let Some(init) = &mut entity.init {
                if self.resolve_expr(scope, init) {
                    if let Some(t) = ty {
                        if t.is_numeric() && init.ty.is_some_and(Type::is_numeric) {
                            coerce(init, t);
                        }
                    }
                }
            }
            let value = entity.init.as_ref().and_then(|e| const_int(&self.symbols, e));
            if flavor == Flavor::Parameter && entity.init.is_none() {
                self.error(
                    codes::E0102,
                    entity.name.span,
                    format!("named constant '{}' requires an initializer", entity.name),
                );
            }

            let Some(id) = self.declare_or_adopt(scope, &entity.name, flavor) else {
                continue;
            };
            let sym = self.symbols.symbol_mut(id);
            sym.ty = ty;
            sym.span = entity.name.span;
            let dummy = sym.attrs.dummy;
            let keep = std::mem::take(&mut sym.attrs);
            sym.attrs = crate::symbols::Attrs {
                dummy,
                common: keep.common,
                cray_pointee: keep.cray_pointee,
                cray_pointer: keep.cray_pointer,
                in_namelist: keep.in_namelist,
                ..attrs.clone()
            };
            if array.is_some() {
                sym.array = array;
            }
            if flavor == Flavor::Parameter {
                sym.value = value;
            }
            if sym.attrs.value && !sym.attrs.dummy {
                let name = sym.name.clone();
                self.error(
                    codes::E0102,
                    entity.name.span,
                    format!("'value' attribute on '{name}', which is not a dummy argument"),
                );
            }
        }
    }

    fn declare_common(&mut self, scope: ScopeId, group: &GroupStmt) {
        let block = self.symbols.common_in(scope, &group.name.name, group.span);
        for member in &group.members {
            let id = match self.symbols.lookup_local(scope, &member.name) {
                Some(id) => id,
                None => match self.declare_or_adopt(scope, member, Flavor::Variable) {
                    Some(id) => id,
                    None => continue,
                },
            };
            if let Some(other) = self.symbols.symbol(id).attrs.common {
                let other = self.symbols.common(other).name.clone();
                self.error(
                    codes::E0101,
                    member.span,
                    format!("'{member}' is already in common block '/{other}/'"),
                );
                continue;
            }
            self.symbols.symbol_mut(id).attrs.common = Some(block);
            self.symbols.common_mut(block).members.push(id);
        }
    }

    fn declare_namelist(&mut self, scope: ScopeId, group: &GroupStmt) {
        for member in &group.members {
            match self.symbols.lookup(scope, &member.name) {
                Some(id) => self.symbols.symbol_mut(id).attrs.in_namelist = true,
                None => self.error(
                    codes::E0100,
                    member.span,
                    format!("undeclared name '{member}' in namelist '/{}/'", group.name),
                ),
            }
        }
    }

    fn declare_cray_pointer(&mut self, scope: ScopeId, cp: &CrayPointerStmt) {
        let pointer = match self.symbols.lookup_local(scope, &cp.pointer.name) {
            Some(id) => Some(id),
            None => self.declare_or_adopt(scope, &cp.pointer, Flavor::Variable),
        };
        if let Some(id) = pointer {
            let sym = self.symbols.symbol_mut(id);
            sym.attrs.cray_pointer = true;
            if sym.ty.is_none() {
                sym.ty = Some(Type {
                    base: BaseType::Integer,
                    kind: 8,
                });
            }
        }
        let pointee = match self.symbols.lookup_local(scope, &cp.pointee.name) {
            Some(id) => Some(id),
            None => self.declare_or_adopt(scope, &cp.pointee, Flavor::Variable),
        };
        if let Some(id) = pointee {
            self.symbols.symbol_mut(id).attrs.cray_pointee = true;
        }
    }

    fn resolve_threadprivate(&mut self, scope: ScopeId, tp: &mut ThreadprivateStmt) {
        for item in &mut tp.items {
            if item.common {
                match self.symbols.lookup_common(scope, &item.name.name) {
                    Some(block) => {
                        for m in self.symbols.common(block).members.clone() {
                            self.symbols.symbol_mut(m).attrs.threadprivate = true;
                        }
                    }
                    None => self.error(
                        codes::E0105,
                        item.span,
                        format!("unknown common block '/{}/'", item.name),
                    ),
                }
                continue;
            }
            let Some(id) = self.symbols.lookup(scope, &item.name.name) else {
                self.error(
                    codes::E0100,
                    item.span,
                    format!("undeclared name '{}' in threadprivate", item.name),
                );
                continue;
            };
            item.symbol = Some(id);
            match self.symbols.symbol(id).attrs.common {
                Some(block) => {
                    let block = self.symbols.common(block).name.clone();
                    self.error(
                        codes::E0106,
                        item.span,
                        format!(
                            "'{}' is a member of common block '/{block}/' and cannot appear in threadprivate on its own",
                            item.name
                        ),
                    );
                }
                None => self.symbols.symbol_mut(id).attrs.threadprivate = true,
            }
        }
    }

    fn resolve_declare_simd(&mut self, scope: ScopeId, ds: &mut DeclareSimdStmt) {
        let named = &ds.proc_name;
        if !named.name.is_empty() && !named.name.eq_ignore_ascii_case(&self.unit_name) {
            let msg = format!(
                "declare simd names '{named}', but appears in '{}'",
                self.unit_name
            );
            self.error(codes::E0108, named.span, msg);
        }
        let Some(clauses) = &mut ds.clauses else {
            return;
        };
        self.bind_clauses(scope, clauses);
        let procedure = self.symbols.unit_scope(scope);
        let mut env = self.env(scope);
        validate::validate_clauses(
            &mut env,
            clauses,
            DirectiveKind::DeclareSimd,
            ClauseContext::Interface { procedure },
        );
    }

    /// Variables left without a type once the specification part is done.
    fn check_untyped(&mut self, scope: ScopeId) {
        let untyped: Vec<(String, Span)> = self
            .symbols
            .scope(scope)
            .symbols
            .iter()
            .map(|&id| self.symbols.symbol(id))
            .filter(|s| s.flavor == Flavor::Variable && s.ty.is_none() && !s.attrs.artificial)
            .map(|s| (s.name.clone(), s.span))
            .collect();
        for (name, span) in untyped {
            self.error(
                codes::E0102,
                span,
                format!("'{name}' has no declared type"),
            );
        }
    }

    // ── Statements ──────────────────────────────────────────────────────

    fn resolve_body(&mut self, scope: ScopeId, body: &mut [Stmt]) {
        for stmt in body.iter_mut() {
            self.resolve_stmt(scope, stmt);
        }
    }

    fn resolve_stmt(&mut self, scope: ScopeId, stmt: &mut Stmt) {
        let span = stmt.span;
        match &mut stmt.kind {
            StmtKind::Assign(a) => self.resolve_assignment(scope, a),
            StmtKind::Do(d) => {
                match &mut d.control {
                    LoopControl::Counted(c) => {
                        self.resolve_counted(scope, span, c);
                    }
                    LoopControl::While(cond) => self.resolve_condition(scope, cond),
                }
                self.resolve_body(scope, &mut d.body);
            }
            StmtKind::If(i) => {
                self.resolve_condition(scope, &mut i.cond);
                self.resolve_body(scope, &mut i.then_body);
                self.resolve_body(scope, &mut i.else_body);
            }
            StmtKind::Call(call) => {
                if let Some(id) = self.symbols.lookup(scope, &call.name.name) {
                    if self.symbols.symbol(id).flavor != Flavor::Procedure {
                        self.error(
                            codes::E0104,
                            call.name.span,
                            format!("'{}' is not a subroutine", call.name),
                        );
                    }
                }
                for arg in &mut call.args {
                    self.resolve_expr(scope, arg);
                }
            }
            StmtKind::Print(items) => {
                for item in items {
                    self.resolve_expr(scope, item);
                }
            }
            StmtKind::Continue => {}
            StmtKind::Block(b) => {
                let inner = self.symbols.add_scope(Some(scope), ScopeKind::Block);
                b.scope = Some(inner);
                self.resolve_specs(inner, &mut b.specs);
                // A nested scope is resolved on its own: enclosing
                // constructs do not reach into it.
                let saved = self.omp.save_and_clear();
                self.resolve_body(inner, &mut b.body);
                self.omp.restore(saved);
            }
            StmtKind::Directive(dir) => self.resolve_directive(scope, dir),
        }
    }

    fn resolve_assignment(&mut self, scope: ScopeId, a: &mut Assignment) {
        let lhs_ok = self.resolve_expr(scope, &mut a.lhs);
        let rhs_ok = self.resolve_expr(scope, &mut a.rhs);
        if lhs_ok {
            if let Some(id) = a.lhs.ref_symbol() {
                let sym = self.symbols.symbol(id);
                if sym.flavor != Flavor::Variable {
                    let name = sym.name.clone();
                    self.error(
                        codes::E0102,
                        a.lhs.span,
                        format!("cannot assign to named constant '{name}'"),
                    );
                    return;
                }
            }
        }
        if !(lhs_ok && rhs_ok) {
            return;
        }
        let (Some(lt), Some(rt)) = (a.lhs.ty, a.rhs.ty) else {
            return;
        };
        let compatible = (lt.is_numeric() && rt.is_numeric()) || lt.base == rt.base;
        if !compatible {
            self.error(
                codes::E0103,
                a.rhs.span,
                format!("cannot assign {rt} to {lt}"),
            );
            return;
        }
        if a.rhs.rank != 0 && a.rhs.rank != a.lhs.rank {
            self.error(
                codes::E0103,
                a.rhs.span,
                format!(
                    "rank mismatch in assignment: {} on the left, {} on the right",
                    a.lhs.rank, a.rhs.rank
                ),
            );
            return;
        }
        if lt.is_numeric() {
            coerce(&mut a.rhs, lt);
        }
    }

    fn resolve_condition(&mut self, scope: ScopeId, cond: &mut Expr) {
        if self.resolve_expr(scope, cond) && !(cond.rank == 0 && cond.ty.is_some_and(Type::is_logical)) {
            self.error(
                codes::E0103,
                cond.span,
                "condition must be a scalar logical expression".to_string(),
            );
        }
    }

    fn resolve_counted(&mut self, scope: ScopeId, loop_span: Span, c: &mut CountedControl) {
        for e in [Some(&mut c.start), Some(&mut c.end), c.step.as_mut()]
            .into_iter()
            .flatten()
        {
            self.resolve_expr(scope, e);
        }
        let Some(id) = self.symbols.lookup(scope, &c.var.name) else {
            self.error(
                codes::E0100,
                c.var.span,
                format!("undeclared name '{}'", c.var),
            );
            return;
        };
        if self.symbols.symbol(id).flavor != Flavor::Variable {
            self.error(
                codes::E0102,
                c.var.span,
                format!("DO variable '{}' must be a variable", c.var),
            );
            return;
        }
        c.symbol = Some(id);
        if self.omp.note_do_iterator(loop_span, id, &c.var) {
            trace!(var = %c.var, "loop variable made private to enclosing construct");
        }
    }

    // ── Directives ──────────────────────────────────────────────────────

    fn resolve_directive(&mut self, scope: ScopeId, dir: &mut Directive) {
        let kind = dir.kind;
        trace!(directive = %kind, "resolving directive");

        for entry in &mut dir.flush {
            self.bind_entry(scope, entry, "flush");
        }
        if let Some(clauses) = &mut dir.clauses {
            self.bind_clauses(scope, clauses);
            let mut env = self.env(scope);
            validate::validate_clauses(&mut env, clauses, kind, ClauseContext::Executable);
        }

        let context = kind.is_parallel_class().then(|| {
            let sharing: HashSet<SymbolId> = dir
                .clauses
                .iter()
                .flat_map(|c| c.lists())
                .flat_map(|(_, list)| list.iter().filter_map(|e| e.symbol))
                .collect();
            self.omp.push(sharing)
        });

        let is_loop = kind.is_omp_loop() || kind == DirectiveKind::AccLoop;
        let previous = is_loop.then(|| {
            let collapse = dir.clauses.as_ref().map(|c| c.collapse).unwrap_or(1);
            let spans = loops::collapsed_loops(&dir.body, collapse)
                .iter()
                .map(|s| s.span)
                .collect();
            self.omp.track_loops(spans)
        });

        self.resolve_body(scope, &mut dir.body);

        if let Some(previous) = previous {
            self.omp.restore_tracking(previous);
        }
        if let Some(token) = context {
            let implicit = self.omp.pop(token);
            if let Some(clauses) = &mut dir.clauses {
                clauses.list_mut(ListClass::Private).extend(implicit);
            }
        }

        if is_loop {
            let mut env = self.env(scope);
            loops::resolve_loop_directive(&mut env, dir);
        }
        match kind {
            DirectiveKind::Atomic => {
                let mut env = self.env(scope);
                atomic::resolve_atomic(&mut env, dir);
            }
            DirectiveKind::Critical => self.check_critical_names(dir),
            _ => {}
        }
    }

    fn check_critical_names(&mut self, dir: &Directive) {
        let open = dir.name.as_ref().map(|n| n.name.to_ascii_lowercase());
        let close = dir.end_name.as_ref().map(|n| n.name.to_ascii_lowercase());
        if open != close {
            let span = dir.end_name.as_ref().map(|n| n.span).unwrap_or(dir.span);
            let shown = |n: &Option<Ident>| match n {
                Some(n) => format!("'{n}'"),
                None => "no name".to_string(),
            };
            let msg = format!(
                "critical construct opened with {} but closed with {}",
                shown(&dir.name),
                shown(&dir.end_name)
            );
            self.error(codes::E0107, span, msg);
        }
    }

    fn bind_entry(&mut self, scope: ScopeId, entry: &mut NamelistEntry, clause: &str) {
        match self.symbols.lookup(scope, &entry.name.name) {
            Some(id) => entry.symbol = Some(id),
            None => self.error(
                codes::E0100,
                entry.span,
                format!("undeclared name '{}' in '{clause}' clause", entry.name),
            ),
        }
    }

    /// Bind every list entry to its symbol, replacing `/block/` entries by
    /// the members of the common block.
    fn bind_clauses(&mut self, scope: ScopeId, clauses: &mut ClauseSet) {
        for class in ListClass::all() {
            if clauses.list(class).is_empty() {
                continue;
            }
            let entries = std::mem::take(clauses.list_mut(class));
            let mut bound = Vec::with_capacity(entries.len());
            for mut entry in entries {
                if !entry.common {
                    self.bind_entry(scope, &mut entry, class.clause_name());
                    bound.push(entry);
                    continue;
                }
                let Some(block) = self.symbols.lookup_common(scope, &entry.name.name) else {
                    self.error(
                        codes::E0105,
                        entry.span,
                        format!("unknown common block '/{}/'", entry.name),
                    );
                    continue;
                };
                for &member in &self.symbols.common(block).members {
                    let name = Ident::new(self.symbols.symbol(member).name.clone(), entry.span);
                    let mut expanded = NamelistEntry::new(name);
                    expanded.symbol = Some(member);
                    bound.push(expanded);
                }
            }
            *clauses.list_mut(class) = bound;

            if let ListClass::Reduction(op) = class {
                if op.is_intrinsic_name() {
                    self.check_reduction_shadow(scope, op, clauses.list(class));
                }
            }
        }
    }

    /// `max`, `min`, `iand`, `ior` and `ieor` must still name the intrinsic.
    fn check_reduction_shadow(
        &mut self,
        scope: ScopeId,
        op: crate::clauses::ReductionOp,
        list: &[NamelistEntry],
    ) {
        let Some(first) = list.first() else { return };
        if let Some(id) = self.symbols.lookup(scope, &op.to_string()) {
            let sym = self.symbols.symbol(id);
            if sym.flavor != Flavor::Procedure {
                let declared = sym.span;
                self.diagnostics.push(
                    Diagnostic::new(
                        DiagLevel::Error,
                        first.span,
                        format!("reduction operator '{op}' is shadowed by a local declaration"),
                    )
                    .with_code(codes::E0109)
                    .with_related(declared, "declared here"),
                );
            }
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve_source(source: &str) -> (Program, ResolveResult) {
        let result = crate::parser::parse(source);
        assert!(
            result.errors.is_empty(),
            "parse errors in test: {:?}",
            result.errors
        );
        let mut program = result.program.expect("parse failed in test");
        let resolved = resolve(&mut program);
        (program, resolved)
    }

    fn codes_of(result: &ResolveResult) -> Vec<&'static str> {
        result
            .diagnostics
            .iter()
            .filter_map(|d| d.code.map(|c| c.0))
            .collect()
    }

    fn first_directive(program: &Program) -> &Directive {
        program.units[0]
            .body
            .iter()
            .find_map(|s| match &s.kind {
                StmtKind::Directive(d) => Some(d.as_ref()),
                _ => None,
            })
            .expect("directive")
    }

    fn private_names(dir: &Directive) -> Vec<String> {
        dir.clauses
            .as_ref()
            .map(|c| {
                c.list(ListClass::Private)
                    .iter()
                    .map(|e| e.name.name.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    // ── Declarations ────────────────────────────────────────────────────

    #[test]
    fn declarations_build_symbols() {
        let (_, r) = resolve_source(
            "subroutine s(n)
integer :: n
integer, parameter :: m = 4
real(8), dimension(m) :: a
real, allocatable :: b(:)
end subroutine
",
        );
        assert!(codes_of(&r).is_empty(), "{:?}", r.diagnostics);
        let syms = &r.symbols;
        let unit = syms.lookup(syms.global(), "s").expect("unit");
        assert_eq!(syms.symbol(unit).flavor, Flavor::Procedure);
        let scope = ScopeId(1);
        let n = syms.symbol(syms.lookup(scope, "n").unwrap());
        assert!(n.attrs.dummy);
        let m = syms.symbol(syms.lookup(scope, "m").unwrap());
        assert_eq!(m.value, Some(4));
        let a = syms.symbol(syms.lookup(scope, "a").unwrap());
        assert_eq!(a.size_bytes(), Some(32));
        let b = syms.symbol(syms.lookup(scope, "b").unwrap());
        assert!(b.attrs.allocatable);
        assert_eq!(b.array.as_ref().map(|s| s.kind), Some(ArrayKind::Deferred));
    }

    #[test]
    fn undeclared_and_duplicate() {
        let (_, r) = resolve_source(
            "program p
integer :: x
real :: x
y = 1
end program
",
        );
        assert_eq!(codes_of(&r), ["E0101", "E0100"]);
    }

    #[test]
    fn assignment_inserts_conversion() {
        let (program, r) = resolve_source(
            "program p
integer :: i
real(8) :: d
d = i + 1
end program
",
        );
        assert!(!r.has_errors());
        let StmtKind::Assign(a) = &program.units[0].body[0].kind else {
            panic!("assignment");
        };
        assert_eq!(a.rhs.ty, Some(Type::real(8)));
        assert!(matches!(a.rhs.kind, ExprKind::Convert(_)));
    }

    // ── Implicit privatization ──────────────────────────────────────────

    #[test]
    fn sequential_loop_variable_becomes_private() {
        let (program, r) = resolve_source(
            "program p
integer :: i, j
real :: a(10)
!$omp parallel shared(a)
do i = 1, 10
do j = 1, 10
a(i) = a(i) + j
end do
end do
!$omp end parallel
end program
",
        );
        assert!(!r.has_errors(), "{:?}", r.diagnostics);
        assert_eq!(private_names(first_directive(&program)), ["i", "j"]);
    }

    #[test]
    fn listed_or_worksharing_loop_variables_are_not_added() {
        let (program, r) = resolve_source(
            "program p
integer :: i, k
real :: a(10)
!$omp parallel do firstprivate(k)
do i = 1, 10
do k = 1, 2
a(i) = k
end do
end do
end program
",
        );
        assert!(!r.has_errors(), "{:?}", r.diagnostics);
        assert!(private_names(first_directive(&program)).is_empty());
    }

    #[test]
    fn block_scope_is_resolved_on_its_own() {
        let (program, r) = resolve_source(
            "program p
integer :: i
!$omp parallel
block
integer :: n
do i = 1, 3
n = i
end do
end block
!$omp end parallel
end program
",
        );
        assert!(!r.has_errors(), "{:?}", r.diagnostics);
        assert!(private_names(first_directive(&program)).is_empty());
    }

    // ── Clause binding ──────────────────────────────────────────────────

    #[test]
    fn common_block_expands_in_clauses() {
        let (program, r) = resolve_source(
            "program p
integer :: a, b
common /blk/ a, b
!$omp parallel private(/blk/)
!$omp end parallel
end program
",
        );
        assert!(!r.has_errors(), "{:?}", r.diagnostics);
        assert_eq!(private_names(first_directive(&program)), ["a", "b"]);
    }

    #[test]
    fn unknown_common_block() {
        let (_, r) = resolve_source(
            "program p
!$omp parallel shared(/nope/)
!$omp end parallel
end program
",
        );
        assert_eq!(codes_of(&r), ["E0105"]);
    }

    #[test]
    fn threadprivate_rules() {
        let (_, r) = resolve_source(
            "program p
integer :: a, t
common /blk/ a
!$omp threadprivate(a)
!$omp threadprivate(/other/)
!$omp threadprivate(t)
end program
",
        );
        assert_eq!(codes_of(&r), ["E0106", "E0105"]);
        let t = r.symbols.lookup(ScopeId(1), "t").unwrap();
        assert!(r.symbols.symbol(t).attrs.threadprivate);
    }

    #[test]
    fn threadprivate_common_block_feeds_copyin() {
        let (_, r) = resolve_source(
            "program p
integer :: a
common /blk/ a
!$omp threadprivate(/blk/)
!$omp parallel copyin(/blk/)
!$omp end parallel
end program
",
        );
        assert!(codes_of(&r).is_empty(), "{:?}", r.diagnostics);
    }

    #[test]
    fn reduction_operator_shadowed() {
        let (_, r) = resolve_source(
            "program p
integer :: max, s
!$omp parallel reduction(max:s)
!$omp end parallel
end program
",
        );
        assert_eq!(codes_of(&r), ["E0109"]);
    }

    #[test]
    fn critical_names_must_match() {
        let (_, r) = resolve_source(
            "program p
!$omp critical (a)
!$omp end critical (b)
end program
",
        );
        assert_eq!(codes_of(&r), ["E0107"]);

        let (_, r) = resolve_source(
            "program p
!$omp critical (lock)
!$omp end critical (LOCK)
end program
",
        );
        assert!(codes_of(&r).is_empty());
    }

    #[test]
    fn declare_simd_checks_procedure_and_clauses() {
        let (_, r) = resolve_source(
            "subroutine f(x, n)
real :: x
integer, value :: n
!$omp declare simd (g) uniform(x) linear(n:1)
end subroutine
",
        );
        assert_eq!(codes_of(&r), ["E0108"]);

        let (_, r) = resolve_source(
            "subroutine f(x)
real :: x
integer :: k
!$omp declare simd uniform(k)
end subroutine
",
        );
        assert_eq!(codes_of(&r), ["E0203"]);
    }

    #[test]
    fn declare_simd_linear_step_must_be_constant() {
        let (_, r) = resolve_source(
            "subroutine f(s, b)
integer, value :: s, b
!$omp declare simd (f) uniform(s) linear(b:s)
end subroutine
",
        );
        assert_eq!(codes_of(&r), ["E0207"]);

        let (_, r) = resolve_source(
            "subroutine f(s, b)
integer, value :: s, b
!$omp declare simd (f) uniform(s) linear(b:2)
end subroutine
",
        );
        assert!(codes_of(&r).is_empty(), "{:?}", r.diagnostics);
    }

    #[test]
    fn clause_errors_do_not_stop_resolution() {
        let (program, r) = resolve_source(
            "program p
integer :: x
!$omp parallel private(x) shared(x)
x = 1
!$omp end parallel
end program
",
        );
        assert_eq!(codes_of(&r), ["E0201"]);
        assert_eq!(first_directive(&program).kind, DirectiveKind::Parallel);
    }
}
