// loops.rs — Loop-directive resolution
//
// Checks the loop nest under `do`, `simd`, their combined forms and
// `!$acc loop`: as many perfectly nested counted DO loops as `collapse`
// asks for, integer iteration variables that carry no forbidden
// data-sharing clause, and a rectangular iteration space.
//
// Preconditions: the directive was resolved (loop variables bound, clause
//   entries bound, `collapse` folded).
// Failure modes: diagnostics E0300–E0306. Checking continues with later
//   loops after a nesting violation when a loop can still be found.
// Side effects: none beyond diagnostics.

use crate::ast::{Directive, Stmt, StmtKind};
use crate::clauses::ListClass;
use crate::diag::codes;
use crate::id::SymbolId;
use crate::validate::DirectiveEnv;

// ── Nest walking ─────────────────────────────────────────────────────────

fn is_do(stmt: &Stmt) -> bool {
    matches!(stmt.kind, StmtKind::Do(_))
}

enum NextLoop<'a> {
    /// First non-noop statement is a DO loop.
    Nested(&'a Stmt),
    /// A DO loop exists, but something else comes first.
    Late(&'a Stmt),
    Missing,
}

fn next_loop(body: &[Stmt]) -> NextLoop<'_> {
    match body.iter().find(|s| !s.is_noop()) {
        Some(s) if is_do(s) => NextLoop::Nested(s),
        _ => match body.iter().find(|s| is_do(s)) {
            Some(s) => NextLoop::Late(s),
            None => NextLoop::Missing,
        },
    }
}

fn loop_body(stmt: &Stmt) -> &[Stmt] {
    match &stmt.kind {
        StmtKind::Do(d) => &d.body,
        _ => &[],
    }
}

/// The DO statements a loop directive with the given collapse count
/// applies to, outermost first. Stops early when the nest runs out.
pub fn collapsed_loops(body: &[Stmt], collapse: u32) -> Vec<&Stmt> {
    let mut found = Vec::new();
    let mut current = body;
    for _ in 0..collapse.max(1) {
        match next_loop(current) {
            NextLoop::Nested(s) | NextLoop::Late(s) => {
                found.push(s);
                current = loop_body(s);
            }
            NextLoop::Missing => break,
        }
    }
    found
}

// ── Resolution ───────────────────────────────────────────────────────────

pub fn resolve_loop_directive(env: &mut DirectiveEnv<'_>, dir: &Directive) {
    let collapse = dir.clauses.as_ref().map(|c| c.collapse).unwrap_or(1).max(1);
    let simd = dir.kind.is_simd();

    // Iteration variables of the levels checked so far.
    let mut outer: Vec<SymbolId> = Vec::new();
    let mut current: &[Stmt] = &dir.body;

    for level in 1..=collapse {
        let stmt = match next_loop(current) {
            NextLoop::Nested(s) => s,
            NextLoop::Late(s) => {
                env.error(
                    codes::E0305,
                    s.span,
                    format!("collapsed loops of {} are not perfectly nested", dir.kind),
                );
                s
            }
            NextLoop::Missing => {
                env.error(
                    codes::E0306,
                    dir.span,
                    format!("not enough DO loops for collapsed {}", dir.kind),
                );
                return;
            }
        };
        let StmtKind::Do(do_loop) = &stmt.kind else {
            return;
        };
        let Some(counted) = do_loop.counted() else {
            env.error(
                codes::E0300,
                stmt.span,
                format!("{} cannot be a DO WHILE or DO without loop control", dir.kind),
            );
            return;
        };
        let Some(var) = counted.symbol else {
            // Undeclared; already reported.
            current = &do_loop.body;
            continue;
        };

        let sym = env.symbol(var);
        if sym.ty.is_some_and(|t| !t.is_integer()) {
            env.error(
                codes::E0301,
                counted.var.span,
                format!("{} iteration variable must be of type integer", dir.kind),
            );
        }
        if sym.attrs.threadprivate {
            env.error(
                codes::E0302,
                counted.var.span,
                format!("{} iteration variable must not be threadprivate", dir.kind),
            );
        }

        if let Some(clauses) = &dir.clauses {
            let allowed: &[ListClass] = match (simd, collapse > 1) {
                (false, _) => &[ListClass::Private, ListClass::Lastprivate],
                (true, true) => &[ListClass::Lastprivate],
                (true, false) => &[ListClass::Private, ListClass::Lastprivate, ListClass::Linear],
            };
            let misplaced = clauses
                .lists()
                .filter(|(class, _)| !allowed.contains(class))
                .any(|(_, list)| list.iter().any(|e| e.symbol == Some(var)));
            if misplaced {
                let names: Vec<&str> = allowed.iter().map(|c| c.clause_name()).collect();
                env.error(
                    codes::E0303,
                    counted.var.span,
                    format!(
                        "{} iteration variable present on clause other than {}",
                        dir.kind,
                        names.join(" or ")
                    ),
                );
            }
        }

        if level > 1 {
            let bounds = [Some(&counted.start), Some(&counted.end), counted.step.as_ref()];
            let dependent = outer.iter().any(|&ivar| {
                ivar == var || bounds.iter().flatten().any(|e| e.references(ivar))
            });
            if dependent {
                env.error(
                    codes::E0304,
                    stmt.span,
                    format!("{} collapsed loops don't form rectangular iteration space", dir.kind),
                );
            }
        }

        outer.push(var);
        current = &do_loop.body;
    }
}
