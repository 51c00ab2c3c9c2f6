// lower.rs — AST to region IR
//
// Lowers each resolved program unit to a `RegionFunction`. Scopes become
// `Bind` nodes owning their declared variables, `!$acc kernels` becomes a
// `Target` region and `!$acc loop` an `AccLoop` whose non-trivial bounds
// are first evaluated into compiler temporaries.
//
// Preconditions: resolution finished without errors.
// Postconditions: every variable in the output carries its name, size and
//   whether it is a compiler temporary.
// Failure modes: none; unbound names left by a failed resolution are
//   dropped from clause lists.
// Side effects: adds temporaries to `symbols`.

use tracing::trace;

use crate::ast::*;
use crate::clauses::{ClauseSet, ListClass};
use crate::directive::DirectiveKind;
use crate::id::{ScopeId, SymbolId};
use crate::region::{
    AccClause, AccLoop, LocalVar, MapClause, MapKind, MapTarget, RStmt, RegionFunction,
    RegionProgram, Target, TargetKind,
};
use crate::symbols::{Flavor, SymbolTable, Type};

// ── Public entry point ──────────────────────────────────────────────────────

pub fn lower_program(program: &Program, symbols: &mut SymbolTable) -> RegionProgram {
    let mut ctx = LowerCtx {
        symbols,
        temp_count: 0,
        frames: Vec::new(),
    };
    RegionProgram {
        functions: program.units.iter().map(|u| ctx.lower_unit(u)).collect(),
    }
}

/// Data clause class and the map kind it lowers to.
const DATA_CLAUSES: [(ListClass, MapKind); 5] = [
    (ListClass::AccCopy, MapKind::ToFrom),
    (ListClass::AccCopyin, MapKind::To),
    (ListClass::AccCopyout, MapKind::From),
    (ListClass::AccCreate, MapKind::Alloc),
    (ListClass::AccPresent, MapKind::ForcePresent),
];

// ── Internal context ────────────────────────────────────────────────────────

/// A scope being lowered; temporaries created inside it land in `locals`.
struct Frame {
    scope: ScopeId,
    locals: Vec<LocalVar>,
}

struct LowerCtx<'a> {
    symbols: &'a mut SymbolTable,
    temp_count: u32,
    frames: Vec<Frame>,
}

impl LowerCtx<'_> {
    fn local_var(&self, id: SymbolId) -> LocalVar {
        let sym = self.symbols.symbol(id);
        LocalVar {
            symbol: id,
            name: sym.name.clone(),
            artificial: sym.attrs.artificial,
            size: sym.size_bytes(),
        }
    }

    fn declared_vars(&self, scope: ScopeId) -> Vec<LocalVar> {
        self.symbols
            .scope(scope)
            .symbols
            .iter()
            .filter(|&&id| self.symbols.symbol(id).flavor == Flavor::Variable)
            .map(|&id| self.local_var(id))
            .collect()
    }

    fn current_scope(&self) -> ScopeId {
        self.frames
            .last()
            .map(|f| f.scope)
            .unwrap_or_else(|| self.symbols.global())
    }

    /// New compiler temporary in the innermost frame.
    fn temp(&mut self, ty: Type, span: Span) -> (LocalVar, Expr) {
        self.temp_count += 1;
        let name = format!("tmp.{}", self.temp_count);
        let scope = self.current_scope();
        let id = self.symbols.add_artificial(scope, &name, ty, span);
        let var = self.local_var(id);
        if let Some(frame) = self.frames.last_mut() {
            frame.locals.push(var.clone());
        }
        let expr = Expr::var(Ident::new(name, span), id, Some(ty));
        (var, expr)
    }

    fn with_frame<T>(&mut self, frame: Frame, f: impl FnOnce(&mut Self) -> T) -> (Vec<LocalVar>, T) {
        self.frames.push(frame);
        let out = f(self);
        let locals = self.frames.pop().map(|f| f.locals).unwrap_or_default();
        (locals, out)
    }

    // ── Units and statements ────────────────────────────────────────────

    fn lower_unit(&mut self, unit: &Unit) -> RegionFunction {
        let scope = unit.scope.unwrap_or_else(|| self.symbols.global());
        let frame = Frame {
            scope,
            locals: self.declared_vars(scope),
        };
        let (locals, body) = self.with_frame(frame, |ctx| ctx.lower_body(&unit.body));
        RegionFunction {
            name: unit.name.name.clone(),
            locals,
            body,
            is_template_instance: false,
        }
    }

    fn lower_body(&mut self, body: &[Stmt]) -> Vec<RStmt> {
        let mut out = Vec::with_capacity(body.len());
        for stmt in body {
            self.lower_stmt(stmt, &mut out);
        }
        out
    }

    fn lower_stmt(&mut self, stmt: &Stmt, out: &mut Vec<RStmt>) {
        match &stmt.kind {
            StmtKind::Assign(a) => {
                let to_temp = a
                    .lhs
                    .whole_var()
                    .is_some_and(|id| self.symbols.symbol(id).attrs.artificial);
                out.push(RStmt::Assign {
                    lhs: a.lhs.clone(),
                    rhs: a.rhs.clone(),
                    to_temp,
                });
            }
            StmtKind::Do(d) => match &d.control {
                LoopControl::Counted(c) => {
                    let Some(id) = c.symbol else {
                        trace!(var = %c.var, "unbound DO variable; loop dropped");
                        return;
                    };
                    out.push(RStmt::Do {
                        var: self.local_var(id),
                        start: c.start.clone(),
                        end: c.end.clone(),
                        step: c.step.clone(),
                        body: self.lower_body(&d.body),
                    });
                }
                LoopControl::While(cond) => out.push(RStmt::While {
                    cond: cond.clone(),
                    body: self.lower_body(&d.body),
                }),
            },
            StmtKind::If(i) => out.push(RStmt::If {
                cond: i.cond.clone(),
                then_body: self.lower_body(&i.then_body),
                else_body: self.lower_body(&i.else_body),
            }),
            StmtKind::Call(call) => out.push(RStmt::Call {
                name: call.name.name.clone(),
                args: call.args.clone(),
            }),
            StmtKind::Print(items) => out.push(RStmt::Print(items.clone())),
            StmtKind::Continue => {}
            StmtKind::Block(b) => {
                let scope = b.scope.unwrap_or_else(|| self.current_scope());
                let frame = Frame {
                    scope,
                    locals: self.declared_vars(scope),
                };
                let (vars, body) = self.with_frame(frame, |ctx| ctx.lower_body(&b.body));
                out.push(RStmt::Bind { vars, body });
            }
            StmtKind::Directive(dir) => self.lower_directive(dir, out),
        }
    }

    fn lower_directive(&mut self, dir: &Directive, out: &mut Vec<RStmt>) {
        match dir.kind {
            DirectiveKind::AccKernels => {
                let clauses = dir
                    .clauses
                    .as_ref()
                    .map(|cs| self.target_clauses(cs))
                    .unwrap_or_default();
                let frame = Frame {
                    scope: self.current_scope(),
                    locals: Vec::new(),
                };
                let (locals, body) = self.with_frame(frame, |ctx| ctx.lower_body(&dir.body));
                out.push(RStmt::Target(Box::new(Target {
                    kind: TargetKind::Kernels,
                    clauses,
                    locals,
                    body,
                    span: dir.span,
                })));
            }
            DirectiveKind::AccLoop => self.lower_acc_loop(dir, out),
            kind => {
                let body = self.lower_body(&dir.body);
                out.push(RStmt::Omp { kind, body });
            }
        }
    }

    /// The first counted DO under the directive becomes the `AccLoop`.
    fn lower_acc_loop(&mut self, dir: &Directive, out: &mut Vec<RStmt>) {
        let mut clauses = Some(
            dir.clauses
                .as_ref()
                .map(|cs| self.loop_clauses(cs))
                .unwrap_or_default(),
        );
        for stmt in &dir.body {
            let counted = match &stmt.kind {
                StmtKind::Do(d) => d.counted().and_then(|c| c.symbol.map(|id| (d, c, id))),
                _ => None,
            };
            let (Some((d, c, id)), Some(loop_clauses)) = (counted, clauses.as_ref()) else {
                self.lower_stmt(stmt, out);
                continue;
            };
            let loop_clauses = loop_clauses.clone();
            clauses = None;

            let start = self.loop_bound(&c.start, out);
            let end = self.loop_bound(&c.end, out);
            let step = c.step.as_ref().map(|s| self.loop_bound(s, out));
            out.push(RStmt::Loop(Box::new(AccLoop {
                clauses: loop_clauses,
                var: self.local_var(id),
                start,
                end,
                step,
                body: self.lower_body(&d.body),
                span: stmt.span,
            })));
        }
    }

    /// Literal and variable bounds are used as they are; anything else is
    /// computed into a temporary right before the loop.
    fn loop_bound(&mut self, bound: &Expr, out: &mut Vec<RStmt>) -> Expr {
        if bound.is_literal() || bound.whole_var().is_some() {
            return bound.clone();
        }
        let ty = bound.ty.unwrap_or_else(Type::integer);
        let (var, expr) = self.temp(ty, bound.span);
        trace!(temp = %var, bound = %bound, "loop bound evaluated into temporary");
        out.push(RStmt::Assign {
            lhs: expr.clone(),
            rhs: bound.clone(),
            to_temp: true,
        });
        expr
    }

    // ── Clauses ─────────────────────────────────────────────────────────

    fn bound_vars(&self, cs: &ClauseSet, class: ListClass) -> Vec<LocalVar> {
        cs.list(class)
            .iter()
            .filter_map(|e| e.symbol)
            .map(|id| self.local_var(id))
            .collect()
    }

    fn target_clauses(&self, cs: &ClauseSet) -> Vec<AccClause> {
        let mut out = Vec::new();
        if let Some(e) = &cs.if_expr {
            out.push(AccClause::If(e.clone()));
        }
        if let Some(e) = &cs.num_gangs {
            out.push(AccClause::NumGangs(e.clone()));
        }
        if let Some(e) = &cs.num_workers {
            out.push(AccClause::NumWorkers(e.clone()));
        }
        if let Some(e) = &cs.vector_length {
            out.push(AccClause::VectorLength(e.clone()));
        }
        for (class, kind) in DATA_CLAUSES {
            for entry in cs.list(class) {
                let Some(id) = entry.symbol else { continue };
                let var = self.local_var(id);
                let map = match &entry.section {
                    Some(section) => MapClause {
                        kind,
                        target: MapTarget::Section(section.clone()),
                        size: None,
                    },
                    None => MapClause {
                        kind,
                        target: MapTarget::Decl(var.clone()),
                        size: var.size,
                    },
                };
                out.push(AccClause::Map(map));

                // Descriptor and data pointer of an allocatable or pointer array.
                let sym = self.symbols.symbol(id);
                if (sym.attrs.allocatable || sym.attrs.pointer) && sym.rank() > 0 {
                    out.push(AccClause::Map(MapClause {
                        kind: MapKind::ToPset,
                        target: MapTarget::Decl(var.clone()),
                        size: None,
                    }));
                    out.push(AccClause::Map(MapClause {
                        kind: MapKind::Pointer,
                        target: MapTarget::Decl(var),
                        size: Some(0),
                    }));
                }
            }
        }
        out
    }

    fn loop_clauses(&self, cs: &ClauseSet) -> Vec<AccClause> {
        let mut out = Vec::new();
        if cs.collapse > 1 {
            out.push(AccClause::Collapse(cs.collapse));
        }
        let flags = [
            (cs.acc.gang, AccClause::Gang),
            (cs.acc.worker, AccClause::Worker),
            (cs.acc.vector, AccClause::Vector),
            (cs.acc.seq, AccClause::Seq),
            (cs.acc.auto, AccClause::Auto),
            (cs.acc.independent, AccClause::Independent),
        ];
        out.extend(flags.into_iter().filter(|(set, _)| *set).map(|(_, c)| c));
        let private = self.bound_vars(cs, ListClass::Private);
        if !private.is_empty() {
            out.push(AccClause::Private(private));
        }
        for class in ListClass::all() {
            if let ListClass::Reduction(op) = class {
                let vars = self.bound_vars(cs, class);
                if !vars.is_empty() {
                    out.push(AccClause::Reduction(op, vars));
                }
            }
        }
        out
    }
}
