// expr.rs — Expression resolution: name binding, typing, constant folding
//
// Binds every data reference to its symbol, types each node, turns
// references to intrinsic procedures into calls, and wraps operands in
// `Convert` nodes where mixed-type arithmetic or assignment needs them.
//
// Preconditions: declarations of the enclosing scopes are in the table.
// Postconditions: on success every node has `ty = Some(..)` and a rank.
// Failure modes: undeclared names, misuse of procedures, type mismatches
//   (diagnostics E0100, E0103, E0104). Failed nodes keep `ty = None`.
// Side effects: rewrites the expression in place.

use crate::ast::*;
use crate::diag::{codes, DiagLevel, Diagnostic};
use crate::id::ScopeId;
use crate::symbols::{BaseType, Flavor, SymbolTable, Type};

/// Where an expression is resolved.
#[derive(Clone, Copy)]
pub struct ExprScope<'a> {
    pub symbols: &'a SymbolTable,
    pub scope: ScopeId,
}

impl<'a> ExprScope<'a> {
    pub fn new(symbols: &'a SymbolTable, scope: ScopeId) -> Self {
        ExprScope { symbols, scope }
    }

    /// Resolve `expr` in place. Returns false if any error was reported.
    pub fn resolve(&self, expr: &mut Expr, diags: &mut Vec<Diagnostic>) -> bool {
        if expr.ty.is_some() {
            return true;
        }
        let before = diags.len();
        self.resolve_node(expr, diags);
        diags.len() == before && expr.ty.is_some()
    }

    fn error(&self, diags: &mut Vec<Diagnostic>, span: Span, code: crate::diag::DiagCode, msg: String) {
        diags.push(Diagnostic::new(DiagLevel::Error, span, msg).with_code(code));
    }

    fn resolve_node(&self, expr: &mut Expr, diags: &mut Vec<Diagnostic>) {
        if expr.ty.is_some() {
            return;
        }
        let span = expr.span;
        match &mut expr.kind {
            ExprKind::Int(_) => expr.ty = Some(Type::integer()),
            ExprKind::Real { kind, .. } => expr.ty = Some(Type::real(*kind)),
            ExprKind::Logical(_) => expr.ty = Some(Type::logical()),
            ExprKind::Str(_) => expr.ty = Some(Type::character()),
            ExprKind::Error => {}
            ExprKind::Ref(_) => self.resolve_ref(expr, diags),
            ExprKind::Call { .. } => self.resolve_call(expr, diags),
            ExprKind::Paren(inner) => {
                self.resolve_node(inner, diags);
                let (ty, rank) = (inner.ty, inner.rank);
                expr.ty = ty;
                expr.rank = rank;
            }
            ExprKind::Convert(inner) => {
                // Conversions are only built around resolved operands; the
                // target type is already on the node.
                self.resolve_node(inner, diags);
                expr.rank = inner.rank;
            }
            ExprKind::Unary { op, operand } => {
                self.resolve_node(operand, diags);
                let Some(ty) = operand.ty else { return };
                let ok = match op {
                    UnaryOp::Not => ty.is_logical(),
                    UnaryOp::Neg | UnaryOp::Plus => ty.is_numeric(),
                };
                if !ok {
                    self.error(
                        diags,
                        span,
                        codes::E0103,
                        format!("operand of unary operator has type {ty}"),
                    );
                    return;
                }
                expr.rank = operand.rank;
                expr.ty = Some(ty);
            }
            ExprKind::Binary { op, lhs, rhs } => {
                self.resolve_node(lhs, diags);
                self.resolve_node(rhs, diags);
                let (Some(lt), Some(rt)) = (lhs.ty, rhs.ty) else {
                    return;
                };
                let rank = lhs.rank.max(rhs.rank);
                let op = *op;
                let result = if op.is_arithmetic() {
                    if !(lt.is_numeric() && rt.is_numeric()) {
                        None
                    } else {
                        let t = Type::promote(lt, rt);
                        coerce(lhs, t);
                        coerce(rhs, t);
                        Some(t)
                    }
                } else if op.is_comparison() {
                    if lt.is_numeric() && rt.is_numeric() {
                        let t = Type::promote(lt, rt);
                        coerce(lhs, t);
                        coerce(rhs, t);
                        Some(Type::logical())
                    } else if lt.base == BaseType::Character && rt.base == BaseType::Character {
                        Some(Type::logical())
                    } else {
                        None
                    }
                } else if lt.is_logical() && rt.is_logical() {
                    Some(Type::logical())
                } else {
                    None
                };
                match result {
                    Some(t) => {
                        expr.ty = Some(t);
                        expr.rank = rank;
                    }
                    None => self.error(
                        diags,
                        span,
                        codes::E0103,
                        format!(
                            "operands of '{}' have incompatible types {lt} and {rt}",
                            op.symbol()
                        ),
                    ),
                }
            }
        }
    }

    fn resolve_ref(&self, expr: &mut Expr, diags: &mut Vec<Diagnostic>) {
        let span = expr.span;
        let ExprKind::Ref(r) = &mut expr.kind else {
            return;
        };
        let Some(id) = self.symbols.lookup(self.scope, &r.name.name) else {
            // Not a variable: maybe an intrinsic function reference.
            let has_args = r.subscripts.is_some();
            if let (Some(intrinsic), true) = (Intrinsic::from_name(&r.name.name), has_args) {
                let name = r.name.clone();
                let mut args = Vec::new();
                for s in r.subscripts.take().into_iter().flatten() {
                    match s {
                        Subscript::Element(e) => args.push(e),
                        Subscript::Range { .. } => {
                            self.error(
                                diags,
                                span,
                                codes::E0104,
                                format!("array section passed to intrinsic '{name}'"),
                            );
                            return;
                        }
                    }
                }
                expr.kind = ExprKind::Call {
                    name,
                    args,
                    intrinsic: Some(intrinsic),
                };
                self.resolve_call(expr, diags);
                return;
            }
            let msg = match &r.subscripts {
                Some(_) => format!("'{}' is neither an array nor a known function", r.name),
                None => format!("undeclared name '{}'", r.name),
            };
            self.error(diags, span, codes::E0100, msg);
            return;
        };

        let sym = self.symbols.symbol(id);
        if sym.flavor == Flavor::Procedure {
            self.error(
                diags,
                span,
                codes::E0104,
                format!("procedure '{}' used as a value", sym.name),
            );
            return;
        }
        r.symbol = Some(id);
        let sym_rank = sym.rank();
        let ty = sym.ty;

        let rank = match &mut r.subscripts {
            None => sym_rank,
            Some(subs) => {
                if sym_rank == 0 {
                    self.error(
                        diags,
                        span,
                        codes::E0103,
                        format!("'{}' is not an array", sym.name),
                    );
                    return;
                }
                if subs.len() != sym_rank as usize {
                    self.error(
                        diags,
                        span,
                        codes::E0103,
                        format!(
                            "'{}' has rank {} but {} subscripts were given",
                            sym.name,
                            sym_rank,
                            subs.len()
                        ),
                    );
                    return;
                }
                let mut rank = 0;
                for s in subs.iter_mut() {
                    match s {
                        Subscript::Element(e) => self.resolve_node(e, diags),
                        Subscript::Range {
                            lower,
                            upper,
                            stride,
                        } => {
                            rank += 1;
                            for e in [lower, upper, stride].into_iter().flatten() {
                                self.resolve_node(e, diags);
                            }
                        }
                    }
                }
                rank
            }
        };
        expr.ty = ty;
        expr.rank = rank;
    }

    fn resolve_call(&self, expr: &mut Expr, diags: &mut Vec<Diagnostic>) {
        let span = expr.span;
        let ExprKind::Call {
            name,
            args,
            intrinsic,
        } = &mut expr.kind
        else {
            return;
        };
        for a in args.iter_mut() {
            self.resolve_node(a, diags);
        }
        let Some(intrinsic) = *intrinsic else {
            self.error(
                diags,
                span,
                codes::E0104,
                format!("unknown function '{name}'"),
            );
            return;
        };
        if args.iter().any(|a| a.ty.is_none()) {
            return;
        }
        let types: Vec<Type> = args.iter().filter_map(|a| a.ty).collect();
        let rank = args.iter().map(|a| a.rank).max().unwrap_or(0);
        let arity_error = |expected: &str| {
            format!("intrinsic '{name}' expects {expected} argument(s), got {}", args.len())
        };

        let result: Result<Type, String> = match intrinsic {
            Intrinsic::Min | Intrinsic::Max => {
                if types.len() < 2 {
                    Err(arity_error("at least 2"))
                } else if types
                    .iter()
                    .all(|t| t.base == types[0].base && (t.is_integer() || t.is_real()))
                {
                    Ok(types.iter().copied().fold(types[0], Type::promote))
                } else {
                    Err(format!(
                        "arguments of '{name}' must all be integer or all be real"
                    ))
                }
            }
            Intrinsic::Iand | Intrinsic::Ior | Intrinsic::Ieor => {
                if types.len() != 2 {
                    Err(arity_error("2"))
                } else if types.iter().all(|t| t.is_integer()) {
                    Ok(Type::promote(types[0], types[1]))
                } else {
                    Err(format!("arguments of '{name}' must be integer"))
                }
            }
            Intrinsic::Mod => {
                if types.len() != 2 {
                    Err(arity_error("2"))
                } else if types[0].base == types[1].base && types[0].is_numeric() {
                    Ok(Type::promote(types[0], types[1]))
                } else {
                    Err(format!("arguments of '{name}' must have the same numeric type"))
                }
            }
            Intrinsic::Abs => match types.as_slice() {
                [t] if t.is_numeric() => Ok(if t.base == BaseType::Complex {
                    Type::real(t.kind)
                } else {
                    *t
                }),
                [_] => Err(format!("argument of '{name}' must be numeric")),
                _ => Err(arity_error("1")),
            },
            Intrinsic::Sqrt => match types.as_slice() {
                [t] if t.is_real() || t.base == BaseType::Complex => Ok(*t),
                [_] => Err(format!("argument of '{name}' must be real or complex")),
                _ => Err(arity_error("1")),
            },
            Intrinsic::Real | Intrinsic::Int => {
                let kind = match args.get(1).map(|k| const_int(self.symbols, k)) {
                    None => Some(Type::DEFAULT_KIND as i64),
                    Some(k) => k,
                };
                match (types.first(), kind) {
                    (Some(t), Some(k)) if t.is_numeric() && types.len() <= 2 => {
                        let kind = k as u8;
                        Ok(if intrinsic == Intrinsic::Real {
                            Type::real(kind)
                        } else {
                            Type {
                                base: BaseType::Integer,
                                kind,
                            }
                        })
                    }
                    (Some(_), None) => Err(format!("kind argument of '{name}' must be constant")),
                    _ => Err(format!("argument of '{name}' must be numeric")),
                }
            }
        };
        match result {
            Ok(t) => {
                expr.ty = Some(t);
                expr.rank = rank;
            }
            Err(msg) => self.error(diags, span, codes::E0103, msg),
        }
    }
}

/// Wrap `expr` in a conversion to `ty` unless it already has that type.
pub fn coerce(expr: &mut Expr, ty: Type) {
    if expr.ty.is_none() || expr.ty == Some(ty) {
        return;
    }
    let inner = expr.take();
    *expr = Expr {
        span: inner.span,
        rank: inner.rank,
        kind: ExprKind::Convert(Box::new(inner)),
        ty: Some(ty),
    };
}

/// Operand of a conversion node that widens (`narrowing = false`) or
/// narrows (`narrowing = true`) its operand's type.
pub fn conversion_operand(expr: &Expr, narrowing: bool) -> Option<&Expr> {
    let ExprKind::Convert(inner) = &expr.kind else {
        return None;
    };
    let (Some(to), Some(from)) = (expr.ty, inner.ty) else {
        return None;
    };
    if to.narrows_from(from) == narrowing {
        Some(inner)
    } else {
        None
    }
}

/// Fold an integer constant expression, looking through named constants.
pub fn const_int(symbols: &SymbolTable, expr: &Expr) -> Option<i64> {
    match &expr.kind {
        ExprKind::Int(v) => Some(*v),
        ExprKind::Ref(r) if r.subscripts.is_none() => {
            let id = match r.symbol {
                Some(id) => id,
                None => return None,
            };
            let sym = symbols.symbol(id);
            if sym.flavor == Flavor::Parameter {
                sym.value
            } else {
                None
            }
        }
        ExprKind::Paren(e) => const_int(symbols, e),
        ExprKind::Convert(e) if expr.ty.map(|t| t.is_integer()).unwrap_or(false) => {
            const_int(symbols, e)
        }
        ExprKind::Unary { op, operand } => {
            let v = const_int(symbols, operand)?;
            match op {
                UnaryOp::Neg => v.checked_neg(),
                UnaryOp::Plus => Some(v),
                UnaryOp::Not => None,
            }
        }
        ExprKind::Binary { op, lhs, rhs } => {
            let (a, b) = (const_int(symbols, lhs)?, const_int(symbols, rhs)?);
            match op {
                BinOp::Add => a.checked_add(b),
                BinOp::Sub => a.checked_sub(b),
                BinOp::Mul => a.checked_mul(b),
                BinOp::Div => a.checked_div(b),
                BinOp::Pow => u32::try_from(b).ok().and_then(|b| a.checked_pow(b)),
                _ => None,
            }
        }
        _ => None,
    }
}
