// atomic.rs — Atomic-construct classification and canonicalization
//
// Classifies the statements under `!$omp atomic` as a read, write, update
// or capture, checks their shape, and rewrites update expressions into the
// canonical `x = x op (expr)` / `x = intrinsic(x, ...)` forms the back end
// expects.
//
// Preconditions: body assignments are resolved (typed, with conversions).
// Postconditions: `atomic_info` is set on the directive whether or not the
//   shape was accepted; `valid` says which.
// Failure modes: E0400 (statement shape), E0401 (variable or expression
//   constraint); the first violation stops classification. W0400 when a
//   regrouping changes how a non-associative operator evaluates.
// Side effects: rewrites the update statement's right-hand side in place.

use tracing::debug;

use crate::ast::{
    Assignment, AtomicHeader, AtomicInfo, AtomicOp, BinOp, Directive, Expr, ExprKind, Intrinsic,
    Span, Stmt, StmtKind,
};
use crate::diag::{codes, DiagCode, DiagLevel, Diagnostic};
use crate::expr::{coerce, conversion_operand};
use crate::id::SymbolId;
use crate::symbols::Type;
use crate::validate::DirectiveEnv;

type Check<T = ()> = Result<T, Diagnostic>;

fn fail(code: DiagCode, span: Span, message: impl Into<String>) -> Diagnostic {
    Diagnostic::new(DiagLevel::Error, span, message).with_code(code)
}

pub fn resolve_atomic(env: &mut DirectiveEnv<'_>, dir: &mut Directive) {
    let header = dir.atomic.unwrap_or(AtomicHeader {
        op: AtomicOp::Update,
        seq_cst: false,
    });
    let mut info = AtomicInfo {
        op: header.op,
        seq_cst: header.seq_cst,
        swap: false,
        capture_first: false,
        reversed_operands: false,
        var: None,
        valid: false,
    };
    match classify(env, dir.span, &mut dir.body, &mut info) {
        Ok(()) => info.valid = true,
        Err(d) => env.diags.push(d),
    }
    debug!(
        op = %info.op,
        valid = info.valid,
        swap = info.swap,
        capture_first = info.capture_first,
        "classified atomic construct"
    );
    dir.atomic_info = Some(info);
}

// ── Shapes ───────────────────────────────────────────────────────────────

fn is_atomic_type(ty: Option<Type>) -> bool {
    ty.is_some_and(|t| t.is_numeric() || t.is_logical())
}

/// Symbol of a scalar variable of intrinsic type.
fn scalar_var(e: &Expr) -> Option<SymbolId> {
    if e.rank == 0 && is_atomic_type(e.ty) {
        e.ref_symbol()
    } else {
        None
    }
}

/// Look through one narrowing, else one widening, conversion.
fn strip_conversion(e: &Expr) -> &Expr {
    conversion_operand(e, true)
        .or_else(|| conversion_operand(e, false))
        .unwrap_or(e)
}

fn classify(
    env: &mut DirectiveEnv<'_>,
    span: Span,
    body: &mut [Stmt],
    info: &mut AtomicInfo,
) -> Check {
    let op = info.op;
    let wanted = if op == AtomicOp::Capture { 2 } else { 1 };
    if body.len() != wanted {
        let msg = if op == AtomicOp::Capture {
            "atomic capture requires exactly two assignments"
        } else {
            "atomic construct must contain exactly one assignment"
        };
        return Err(fail(codes::E0400, span, msg));
    }

    let mut assigns = Vec::with_capacity(2);
    for stmt in body.iter_mut() {
        match &mut stmt.kind {
            StmtKind::Assign(a) => assigns.push(a),
            _ => {
                return Err(fail(
                    codes::E0400,
                    stmt.span,
                    "atomic construct must contain only assignments",
                ))
            }
        }
    }
    let mut assigns = assigns.into_iter();
    let (Some(first), second) = (assigns.next(), assigns.next()) else {
        return Err(fail(codes::E0400, span, "atomic construct has no assignment"));
    };

    let Some(mut var) = scalar_var(&first.lhs) else {
        return Err(fail(
            codes::E0400,
            first.lhs.span,
            "atomic statement must set a scalar variable of intrinsic type",
        ));
    };

    match op {
        AtomicOp::Read => {
            let src = strip_conversion(&first.rhs);
            let Some(x) = scalar_var(src) else {
                return Err(fail(
                    codes::E0400,
                    src.span,
                    "atomic read statement must read from a scalar variable of intrinsic type",
                ));
            };
            reject_allocatable(env, x, src.span)?;
            info.var = Some(x);
            return Ok(());
        }
        AtomicOp::Write => {
            reject_allocatable(env, var, first.lhs.span)?;
            let value = strip_conversion(&first.rhs);
            if value.rank != 0 || first.rhs.references(var) {
                let name = &env.symbol(var).name;
                return Err(fail(
                    codes::E0401,
                    first.rhs.span,
                    format!("expression in atomic write must be scalar and cannot reference '{name}'"),
                ));
            }
            info.var = Some(var);
            return Ok(());
        }
        AtomicOp::Update | AtomicOp::Capture => {}
    }

    // A capture whose first statement reads a plain variable captures the
    // old value; the update follows it.
    if op == AtomicOp::Capture {
        let src = strip_conversion(&first.rhs);
        if matches!(src.kind, ExprKind::Ref(_)) {
            let Some(x) = scalar_var(src).filter(|&x| x != var) else {
                return Err(fail(
                    codes::E0400,
                    src.span,
                    "atomic capture statement must read from a scalar variable of intrinsic type",
                ));
            };
            var = x;
            info.capture_first = true;
        }
    }

    let (update, capture) = if info.capture_first {
        let Some(update) = second else {
            return Err(fail(codes::E0400, span, "atomic capture requires exactly two assignments"));
        };
        match scalar_var(&update.lhs) {
            None => {
                return Err(fail(
                    codes::E0400,
                    update.lhs.span,
                    "atomic capture update statement must set a scalar variable of intrinsic type",
                ))
            }
            Some(x) if x != var => {
                return Err(fail(
                    codes::E0401,
                    update.lhs.span,
                    "atomic capture statement reads from different variable than update statement writes into",
                ))
            }
            Some(_) => {}
        }
        (update, None)
    } else {
        (first, second)
    };

    reject_allocatable(env, var, update.lhs.span)?;

    if info.capture_first && update.rhs.rank == 0 && !update.rhs.references(var) {
        info.swap = true;
    } else {
        canonicalize(env, update, var, info)?;
    }

    if let Some(capture) = capture {
        if scalar_var(&capture.lhs).is_none() {
            return Err(fail(
                codes::E0400,
                capture.lhs.span,
                "atomic capture statement must set a scalar variable of intrinsic type",
            ));
        }
        let src = strip_conversion(&capture.rhs);
        let Some(x) = scalar_var(src) else {
            return Err(fail(
                codes::E0400,
                src.span,
                "atomic capture statement must read from a scalar variable of intrinsic type",
            ));
        };
        if x != var {
            return Err(fail(
                codes::E0401,
                src.span,
                "atomic capture statement reads from different variable than update statement writes into",
            ));
        }
    }

    info.var = Some(var);
    Ok(())
}

// ── Update canonicalization ──────────────────────────────────────────────

/// Type and position of a narrowing conversion wrapped around the update
/// expression; it is put back after rewriting.
struct Outer {
    span: Span,
    ty: Option<Type>,
    rank: u8,
}

fn split_narrowing(e: Expr) -> (Option<Outer>, Expr) {
    if conversion_operand(&e, true).is_none() {
        return (None, e);
    }
    let Expr {
        kind,
        span,
        ty,
        rank,
    } = e;
    match kind {
        ExprKind::Convert(inner) => (Some(Outer { span, ty, rank }), *inner),
        kind => (
            None,
            Expr {
                kind,
                span,
                ty,
                rank,
            },
        ),
    }
}

fn rejoin(outer: Option<Outer>, inner: Expr) -> Expr {
    match outer {
        Some(Outer { span, ty, rank }) => Expr {
            kind: ExprKind::Convert(Box::new(inner)),
            span,
            ty,
            rank,
        },
        None => inner,
    }
}

enum Shape {
    Binary,
    Intrinsic,
    Other,
}

fn canonicalize(
    env: &mut DirectiveEnv<'_>,
    update: &mut Assignment,
    var: SymbolId,
    info: &mut AtomicInfo,
) -> Check {
    let (outer, expr) = split_narrowing(update.rhs.take());
    let shape = match &expr.kind {
        ExprKind::Binary { .. } => Shape::Binary,
        ExprKind::Call {
            intrinsic: Some(_),
            args,
            ..
        } if args.len() >= 2 => Shape::Intrinsic,
        _ => Shape::Other,
    };
    let (expr, outcome) = match shape {
        Shape::Binary => update_binary(env, expr, var, info),
        Shape::Intrinsic => update_intrinsic(env, expr, var, info),
        Shape::Other => {
            let d = fail(
                codes::E0400,
                expr.span,
                "atomic assignment must have an operator or intrinsic on right hand side",
            );
            (expr, Err(d))
        }
    };
    update.rhs = rejoin(outer, expr);
    outcome
}

#[derive(Debug, Clone, Copy)]
enum Step {
    Lhs,
    Conv,
}

fn slot_at<'e>(e: &'e mut Expr, path: &[Step]) -> Option<&'e mut Expr> {
    let Some((step, rest)) = path.split_first() else {
        return Some(e);
    };
    let child = match (step, &mut e.kind) {
        (Step::Lhs, ExprKind::Binary { lhs, .. }) => lhs.as_mut(),
        (Step::Conv, ExprKind::Convert(inner)) => inner.as_mut(),
        _ => return None,
    };
    slot_at(child, rest)
}

fn leaf(e: &Expr) -> &Expr {
    match &e.kind {
        ExprKind::Convert(inner) => leaf(inner),
        _ => e,
    }
}

fn paren(e: Expr) -> Expr {
    if matches!(e.kind, ExprKind::Paren(_)) {
        return e;
    }
    Expr {
        span: e.span,
        ty: e.ty,
        rank: e.rank,
        kind: ExprKind::Paren(Box::new(e)),
    }
}

/// `e` is `var`, possibly behind a widening conversion.
fn is_var_operand(e: &Expr, var: SymbolId) -> bool {
    e.ref_symbol() == Some(var)
        || conversion_operand(e, false).is_some_and(|c| c.ref_symbol() == Some(var))
}

/// Path from the update expression down its left operands to `var`, and
/// the length of the prefix reaching the deepest binary node on the way.
fn lead_path(expr: &Expr, op: BinOp, alt: Option<BinOp>, var: SymbolId) -> Option<(Vec<Step>, Option<usize>)> {
    let ExprKind::Binary { lhs, .. } = &expr.kind else {
        return None;
    };
    let mut path = vec![Step::Lhs];
    let mut deepest = None;
    let mut cur: &Expr = lhs;
    loop {
        if cur.ref_symbol() == Some(var) {
            return Some((path, deepest));
        }
        if let Some(inner) = conversion_operand(cur, false) {
            path.push(Step::Conv);
            cur = inner;
            continue;
        }
        match &cur.kind {
            ExprKind::Binary { op: o, lhs, .. } if (*o == op || Some(*o) == alt) && cur.rank == 0 => {
                deepest = Some(path.len());
                path.push(Step::Lhs);
                cur = lhs;
            }
            _ => return None,
        }
    }
}

/// Allocatable variables are rejected for every atomic kind.
fn reject_allocatable(env: &DirectiveEnv<'_>, var: SymbolId, span: Span) -> Check {
    let sym = env.symbol(var);
    if sym.attrs.allocatable {
        return Err(fail(
            codes::E0401,
            span,
            format!("atomic construct with allocatable variable '{}'", sym.name),
        ));
    }
    Ok(())
}

fn regroups_unsafely(op: BinOp) -> bool {
    matches!(op, BinOp::Sub | BinOp::Div | BinOp::Eqv | BinOp::Neqv)
}

fn update_binary(
    env: &mut DirectiveEnv<'_>,
    expr: Expr,
    var: SymbolId,
    info: &mut AtomicInfo,
) -> (Expr, Check) {
    let span = expr.span;
    let parts = match &expr.kind {
        ExprKind::Binary { op, rhs, .. } => Some((*op, is_var_operand(rhs, var))),
        _ => None,
    };
    let Some((op, var_on_right)) = parts else {
        return (expr, Err(fail(codes::E0400, span, "atomic update must be a binary operation")));
    };
    let alt = match op {
        BinOp::Add => Some(BinOp::Sub),
        BinOp::Sub => Some(BinOp::Add),
        BinOp::Mul => Some(BinOp::Div),
        BinOp::Div => Some(BinOp::Mul),
        BinOp::Eqv => Some(BinOp::Neqv),
        BinOp::Neqv => Some(BinOp::Eqv),
        BinOp::And | BinOp::Or => None,
        _ => {
            let d = fail(
                codes::E0400,
                span,
                "atomic assignment operator must be binary +, *, -, /, .and., .or., .eqv. or .neqv.",
            );
            return (expr, Err(d));
        }
    };
    let before = expr.to_string();

    let (expr, regrouped) = if var_on_right {
        (swap_operands(expr), Some(op))
    } else {
        let Some((path, deepest)) = lead_path(&expr, op, alt, var) else {
            let d = fail(
                codes::E0400,
                span,
                "atomic assignment must be var = var op expr or var = expr op var",
            );
            return (expr, Err(d));
        };
        match deepest {
            Some(n) => rotate(expr, &path[..n]),
            None => (expr, None),
        }
    };

    if let Some(regroup_op) = regrouped {
        info.reversed_operands = true;
        if regroups_unsafely(regroup_op) {
            let after = expr.to_string();
            env.diags.push(
                Diagnostic::new(
                    DiagLevel::Warning,
                    span,
                    format!("atomic update '{before}' is performed as '{after}'"),
                )
                .with_code(codes::W0400)
                .with_hint(format!(
                    "'{}' is not associative; the regrouped form may compute a different value",
                    regroup_op.symbol()
                )),
            );
        }
    }

    let stray = match &expr.kind {
        ExprKind::Binary { rhs, .. } => rhs.references(var),
        _ => false,
    };
    if stray || expr.rank != 0 {
        let name = &env.symbol(var).name;
        let d = fail(
            codes::E0401,
            span,
            format!("atomic update must be scalar and reference '{name}' only as its leading operand"),
        );
        return (expr, Err(d));
    }
    (expr, Ok(()))
}

/// `expr op var` becomes `var op (expr)`.
fn swap_operands(e: Expr) -> Expr {
    let Expr {
        kind,
        span,
        ty,
        rank,
    } = e;
    let kind = match kind {
        ExprKind::Binary { op, lhs, rhs } => ExprKind::Binary {
            op,
            lhs: rhs,
            rhs: Box::new(paren(*lhs)),
        },
        other => other,
    };
    Expr {
        kind,
        span,
        ty,
        rank,
    }
}

/// `((var op1 a) op2 b)` becomes `var op1 ((a op2 b))`: the binary node at
/// `prefix` gives up its right operand to the enclosing tree, which then
/// becomes its new right operand. Returns the operator now applied to
/// `var`, or `None` when nothing moved.
fn rotate(mut expr: Expr, prefix: &[Step]) -> (Expr, Option<BinOp>) {
    let detached = slot_at(&mut expr, prefix).and_then(|slot| match slot.take() {
        Expr {
            kind: ExprKind::Binary { op, lhs, rhs },
            ..
        } => {
            *slot = *rhs;
            Some((op, *lhs))
        }
        other => {
            *slot = other;
            None
        }
    });
    let Some((op, chain)) = detached else {
        return (expr, None);
    };

    let (span, ty, rank) = (expr.span, expr.ty, expr.rank);
    let lead = match ty {
        Some(t) if chain.ty != ty => {
            let mut v = leaf(&chain).clone();
            coerce(&mut v, t);
            v
        }
        _ => chain,
    };
    let rotated = Expr {
        kind: ExprKind::Binary {
            op,
            lhs: Box::new(lead),
            rhs: Box::new(paren(expr)),
        },
        span,
        ty,
        rank,
    };
    (rotated, Some(op))
}

fn update_intrinsic(
    env: &mut DirectiveEnv<'_>,
    mut expr: Expr,
    var: SymbolId,
    info: &mut AtomicInfo,
) -> (Expr, Check) {
    let name = env.symbol(var).name.as_str();
    let position = match &expr.kind {
        ExprKind::Call {
            intrinsic: Some(which),
            args,
            ..
        } => var_argument(*which, args, var, name, expr.span),
        _ => Err(fail(
            codes::E0400,
            expr.span,
            "atomic assignment must have an operator or intrinsic on right hand side",
        )),
    };
    match position {
        Err(d) => (expr, Err(d)),
        Ok(0) => (expr, Ok(())),
        Ok(i) => {
            if let ExprKind::Call { args, .. } = &mut expr.kind {
                let v = args.remove(i);
                args.insert(0, v);
            }
            info.reversed_operands = true;
            (expr, Ok(()))
        }
    }
}

/// Index of the argument that is the updated variable: the first, else
/// the last.
fn var_argument(
    which: Intrinsic,
    args: &[Expr],
    var: SymbolId,
    name: &str,
    span: Span,
) -> Check<usize> {
    match which {
        Intrinsic::Min | Intrinsic::Max => {}
        Intrinsic::Iand | Intrinsic::Ior | Intrinsic::Ieor => {
            if args.len() != 2 {
                return Err(fail(
                    codes::E0400,
                    span,
                    "atomic assignment intrinsic iand, ior or ieor must have two arguments",
                ));
            }
        }
        _ => {
            return Err(fail(
                codes::E0400,
                span,
                "atomic assignment intrinsic must be min, max, iand, ior or ieor",
            ))
        }
    }

    let last = args.len() - 1;
    let mut found = None;
    for (i, arg) in args.iter().enumerate() {
        if (i == 0 || (found.is_none() && i == last)) && arg.ref_symbol() == Some(var) {
            found = Some(i);
        } else if arg.references(var) {
            return Err(fail(
                codes::E0401,
                arg.span,
                format!("atomic intrinsic arguments except one must not reference '{name}'"),
            ));
        }
        if arg.rank != 0 {
            return Err(fail(codes::E0401, arg.span, "atomic intrinsic arguments must be scalar"));
        }
    }
    found.ok_or_else(|| {
        fail(
            codes::E0400,
            span,
            format!("first or last atomic intrinsic argument must be '{name}'"),
        )
    })
}
