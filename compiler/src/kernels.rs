// kernels.rs — OpenACC kernels decomposition
//
// Replaces every `kernels` region by a data region wrapping the region body
// cut into a sequence of parallel regions: one per top-level loop, and one
// gang-single region per run of sequential statements between them.
//
//   data_kernels <lifted maps, if>
//     try
//       [bind <mapped inner vars>
//         data_kernels <alloc maps>
//           try
//             [bind <temporaries>]
//               bind <kernels locals>
//                 parallel_kernels_parallelized | parallel_kernels_gang_single ...
//           finally data_end]
//     finally data_end
//
// Preconditions: the region tree came from lowering a resolved program.
// Postconditions: no `Target` of kind `Kernels` remains; every new data
//   region ends in `data_end` on all exits.
// Failure modes: none. Statements that do not match the loop grammar run
//   in gang-single regions (W0500 when they hide a loop).
// Side effects: none beyond the rewritten tree.

use tracing::debug;

use crate::ast::{Expr, Span};
use crate::diag::{codes, DiagLevel, Diagnostic};
use crate::region::{
    walk, AccClause, AccLoop, LocalVar, MapClause, MapKind, MapTarget, RStmt, RegionProgram,
    Target, TargetKind,
};
use crate::symbols::Type;

// ── Public entry points ─────────────────────────────────────────────────────

/// Decompose every kernels region of every function.
pub fn convert_kernels(program: &mut RegionProgram) -> Vec<Diagnostic> {
    let mut diags = Vec::new();
    for func in &mut program.functions {
        let body = std::mem::take(&mut func.body);
        func.body = convert_body(body, func.is_template_instance, &mut diags);
    }
    diags
}

/// Decompose one kernels region into its replacement data region.
pub fn decompose(region: Target, template_instance: bool, diags: &mut Vec<Diagnostic>) -> RStmt {
    debug_assert_eq!(region.kind, TargetKind::Kernels);
    let Target {
        clauses,
        locals,
        body,
        span,
        ..
    } = region;

    // Maps of user data move out to the new data region; what stays behind
    // only has to find the data present.
    let mut data_clauses = Vec::new();
    let mut kernels_clauses = Vec::with_capacity(clauses.len());
    for clause in clauses {
        match clause {
            AccClause::Map(map) if lifts_to_data_region(&map) => {
                data_clauses.push(AccClause::Map(map.clone()));
                kernels_clauses.push(AccClause::Map(MapClause {
                    kind: MapKind::ForcePresent,
                    ..map
                }));
            }
            AccClause::If(cond) => {
                data_clauses.push(AccClause::If(cond.clone()));
                kernels_clauses.push(AccClause::If(cond));
            }
            other => kernels_clauses.push(other),
        }
    }

    let body = decompose_body(span, kernels_clauses, locals, body, template_instance, diags);
    RStmt::Target(Box::new(Target {
        kind: TargetKind::Data,
        clauses: data_clauses,
        locals: Vec::new(),
        body: vec![data_region_try(body)],
        span,
    }))
}

// ── Region rewriting ────────────────────────────────────────────────────────

fn convert_body(body: Vec<RStmt>, template_instance: bool, diags: &mut Vec<Diagnostic>) -> Vec<RStmt> {
    body.into_iter()
        .map(|stmt| convert_stmt(stmt, template_instance, diags))
        .collect()
}

fn convert_stmt(stmt: RStmt, template: bool, diags: &mut Vec<Diagnostic>) -> RStmt {
    match stmt {
        RStmt::Target(t) if t.kind == TargetKind::Kernels => decompose(*t, template, diags),
        RStmt::Bind { vars, body } => RStmt::Bind {
            vars,
            body: convert_body(body, template, diags),
        },
        RStmt::TryFinally { body, cleanup } => RStmt::TryFinally {
            body: convert_body(body, template, diags),
            cleanup,
        },
        RStmt::Do {
            var,
            start,
            end,
            step,
            body,
        } => RStmt::Do {
            var,
            start,
            end,
            step,
            body: convert_body(body, template, diags),
        },
        RStmt::While { cond, body } => RStmt::While {
            cond,
            body: convert_body(body, template, diags),
        },
        RStmt::If {
            cond,
            then_body,
            else_body,
        } => RStmt::If {
            cond,
            then_body: convert_body(then_body, template, diags),
            else_body: convert_body(else_body, template, diags),
        },
        RStmt::Omp { kind, body } => RStmt::Omp {
            kind,
            body: convert_body(body, template, diags),
        },
        other => other,
    }
}

/// Map kinds that are never copied to the enclosing data region. Moving
/// them breaks later lowering of the regions they belong to.
fn lifts_to_data_region(map: &MapClause) -> bool {
    match map.kind {
        MapKind::Pointer
        | MapKind::ToPset
        | MapKind::ForceToFrom
        | MapKind::FirstprivatePointer
        | MapKind::FirstprivateReference => false,
        // Zero-size alloc: a pointer whose target is already mapped.
        MapKind::Alloc if map.size == Some(0) => false,
        _ => map.maps_user_data(),
    }
}

fn data_region_try(body: RStmt) -> RStmt {
    RStmt::TryFinally {
        body: vec![body],
        cleanup: vec![RStmt::DataEnd],
    }
}

/// The loop a statement stands for, when it is a top-level loop: the loop
/// itself, a scope holding only the loop (possibly inside a try/finally),
/// or a scope of assignments ending in the loop.
fn top_level_loop(stmt: &mut RStmt) -> Option<&mut AccLoop> {
    let body = match stmt {
        RStmt::Loop(l) => return Some(&mut **l),
        RStmt::Bind { body, .. } => body,
        _ => return None,
    };
    let (last, setup) = body.split_last_mut()?;
    if !setup.iter().all(|s| matches!(s, RStmt::Assign { .. })) {
        return None;
    }
    match last {
        RStmt::Loop(l) => Some(&mut **l),
        // A try/finally only counts when it is the whole scope.
        RStmt::TryFinally { body: eval, .. } if setup.is_empty() => match eval.as_mut_slice() {
            [RStmt::Loop(l)] => Some(&mut **l),
            _ => None,
        },
        _ => None,
    }
}

/// Inline nested scopes into one statement sequence, except scopes that
/// wrap a top-level loop. The variables of inlined scopes move to `vars`.
fn flatten_binds(body: Vec<RStmt>, vars: &mut Vec<LocalVar>) -> Vec<RStmt> {
    let mut flat = Vec::with_capacity(body.len());
    for mut stmt in body {
        let inline = matches!(stmt, RStmt::Bind { .. }) && top_level_loop(&mut stmt).is_none();
        match stmt {
            RStmt::Bind { vars: inner, body } if inline => {
                vars.extend(inner);
                flat.extend(flatten_binds(body, vars));
            }
            other => flat.push(other),
        }
    }
    flat
}

fn num_gangs_one(span: Span) -> AccClause {
    let mut one = Expr::int(1, span);
    one.ty = Some(Type::integer());
    AccClause::NumGangs(one)
}

fn gang_single_region(span: Span, stmts: Vec<RStmt>, clauses: &[AccClause], diags: &mut Vec<Diagnostic>) -> RStmt {
    walk(&stmts, &mut |s| {
        if let RStmt::Loop(l) = s {
            diags.push(
                Diagnostic::new(
                    DiagLevel::Warning,
                    l.span,
                    "loop in kernels region is not at the top level and runs in a gang-single region",
                )
                .with_code(codes::W0500)
                .with_hint("move the loop out of the enclosing construct to parallelize it"),
            );
        }
    });
    let mut region_clauses = Vec::with_capacity(clauses.len() + 1);
    region_clauses.push(num_gangs_one(span));
    region_clauses.extend(clauses.iter().cloned());
    RStmt::Target(Box::new(Target {
        kind: TargetKind::GangSingle,
        clauses: region_clauses,
        locals: Vec::new(),
        body: vec![RStmt::Bind {
            vars: Vec::new(),
            body: stmts,
        }],
        span,
    }))
}

fn parallel_loop_region(mut stmt: RStmt, num_gangs: Option<&AccClause>, clauses: &[AccClause], fallback: Span) -> RStmt {
    let span = match top_level_loop(&mut stmt) {
        Some(l) => {
            if !l.has_scheme() {
                l.clauses.insert(0, AccClause::Auto);
            }
            l.span
        }
        None => fallback,
    };
    let mut region_clauses = Vec::with_capacity(clauses.len() + 1);
    region_clauses.extend(num_gangs.cloned());
    region_clauses.extend(clauses.iter().cloned());
    RStmt::Target(Box::new(Target {
        kind: TargetKind::ParallelLoop,
        clauses: region_clauses,
        locals: Vec::new(),
        body: vec![RStmt::Bind {
            vars: Vec::new(),
            body: vec![stmt],
        }],
        span,
    }))
}

/// Statements waiting for the next loop or the end of the region.
struct Pending {
    stmts: Vec<RStmt>,
    /// Every statement is an assignment to a compiler temporary.
    only_setup: bool,
}

impl Pending {
    fn new() -> Self {
        Pending {
            stmts: Vec::new(),
            only_setup: true,
        }
    }

    fn push(&mut self, stmt: RStmt) {
        self.only_setup &= matches!(stmt, RStmt::Assign { to_temp: true, .. });
        self.stmts.push(stmt);
    }
}

fn decompose_body(
    span: Span,
    clauses: Vec<AccClause>,
    locals: Vec<LocalVar>,
    body: Vec<RStmt>,
    template_instance: bool,
    diags: &mut Vec<Diagnostic>,
) -> RStmt {
    // num_gangs goes to loop regions only; gang-single regions get 1.
    let mut num_gangs = None;
    let mut clauses: Vec<AccClause> = clauses
        .into_iter()
        .filter_map(|c| match c {
            AccClause::NumGangs(_) if num_gangs.is_none() => {
                num_gangs = Some(c);
                None
            }
            other => Some(other),
        })
        .collect();

    let mut inner_vars = Vec::new();
    let mut body = flatten_binds(body, &mut inner_vars);
    let (mapped, kept): (Vec<LocalVar>, Vec<LocalVar>) = inner_vars
        .into_iter()
        .partition(|v| !v.artificial && !template_instance);

    let present = mapped.iter().map(|v| {
        AccClause::Map(MapClause {
            kind: MapKind::ForcePresent,
            target: MapTarget::Decl(v.clone()),
            size: v.size,
        })
    });
    clauses = present.chain(clauses).collect();

    // A leading try/finally holds the real body; its cleanup guards the
    // inner data region instead.
    let mut inner_cleanup = None;
    if matches!(body.first(), Some(RStmt::TryFinally { .. })) {
        let rest = body.split_off(1);
        if let Some(RStmt::TryFinally { body: eval, cleanup }) = body.pop() {
            inner_cleanup = Some(cleanup);
            body = eval;
            body.extend(rest);
        }
    }

    let mut region_body = Vec::new();
    let mut pending = Pending::new();
    for mut stmt in body {
        if top_level_loop(&mut stmt).is_none() {
            pending.push(stmt);
            continue;
        }
        let setup = std::mem::replace(&mut pending, Pending::new());
        if !setup.stmts.is_empty() {
            if setup.only_setup {
                debug!(count = setup.stmts.len(), "loop setup folded into loop region");
                let mut stmts = setup.stmts;
                stmts.push(stmt);
                stmt = RStmt::Bind {
                    vars: Vec::new(),
                    body: stmts,
                };
            } else {
                debug!(count = setup.stmts.len(), "sequential run becomes gang-single region");
                region_body.push(gang_single_region(span, setup.stmts, &clauses, diags));
            }
        }
        region_body.push(parallel_loop_region(stmt, num_gangs.as_ref(), &clauses, span));
    }

    if region_body.is_empty() && pending.stmts.is_empty() {
        pending.push(RStmt::Nop);
    }
    if !pending.stmts.is_empty() {
        region_body.push(gang_single_region(span, pending.stmts, &clauses, diags));
    }
    debug!(regions = region_body.len(), "kernels region decomposed");

    let body = RStmt::Bind {
        vars: locals,
        body: region_body,
    };
    inner_data_region(span, body, mapped, kept, inner_cleanup)
}

/// Keep compiler temporaries local to the body, and create every other
/// variable of the flattened scopes on the device for the body's lifetime.
fn inner_data_region(
    span: Span,
    body: RStmt,
    mapped: Vec<LocalVar>,
    kept: Vec<LocalVar>,
    cleanup: Option<Vec<RStmt>>,
) -> RStmt {
    let body = if kept.is_empty() {
        body
    } else {
        RStmt::Bind {
            vars: kept,
            body: vec![body],
        }
    };
    if mapped.is_empty() {
        return body;
    }
    let clauses = mapped
        .iter()
        .map(|v| {
            AccClause::Map(MapClause {
                kind: MapKind::Alloc,
                target: MapTarget::Decl(v.clone()),
                size: v.size,
            })
        })
        .collect();
    let region = RStmt::Target(Box::new(Target {
        kind: TargetKind::Data,
        clauses,
        locals: Vec::new(),
        body: vec![data_region_try(body)],
        span,
    }));
    let guarded = match cleanup {
        Some(cleanup) => RStmt::TryFinally {
            body: vec![region],
            cleanup,
        },
        None => region,
    };
    RStmt::Bind {
        vars: mapped,
        body: vec![guarded],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Expr, Ident};
    use crate::id::SymbolId;

    fn sp() -> Span {
        (0..1).into()
    }

    fn var(id: u32, name: &str, artificial: bool) -> LocalVar {
        LocalVar {
            symbol: SymbolId(id),
            name: name.to_string(),
            artificial,
            size: Some(4),
        }
    }

    fn ref_to(v: &LocalVar) -> Expr {
        Expr::var(Ident::new(v.name.clone(), sp()), v.symbol, Some(Type::integer()))
    }

    fn assign(v: &LocalVar, value: i64) -> RStmt {
        RStmt::Assign {
            lhs: ref_to(v),
            rhs: Expr::int(value, sp()),
            to_temp: v.artificial,
        }
    }

    fn acc_loop(clauses: Vec<AccClause>) -> RStmt {
        RStmt::Loop(Box::new(AccLoop {
            clauses,
            var: var(90, "i", false),
            start: Expr::int(1, sp()),
            end: Expr::int(10, sp()),
            step: None,
            body: vec![RStmt::Nop],
            span: sp(),
        }))
    }

    fn kernels(clauses: Vec<AccClause>, body: Vec<RStmt>) -> Target {
        Target {
            kind: TargetKind::Kernels,
            clauses,
            locals: Vec::new(),
            body,
            span: sp(),
        }
    }

    fn run(region: Target) -> (RStmt, Vec<Diagnostic>) {
        let mut diags = Vec::new();
        let out = decompose(region, false, &mut diags);
        (out, diags)
    }

    /// Child regions of the decomposed body, skipping the scaffolding.
    fn children(stmt: &RStmt) -> Vec<&Target> {
        let mut found = Vec::new();
        walk(std::slice::from_ref(stmt), &mut |s| {
            if let Some(t) = s.as_target() {
                if matches!(t.kind, TargetKind::ParallelLoop | TargetKind::GangSingle) {
                    found.push(t);
                }
            }
        });
        found
    }

    fn kinds(stmt: &RStmt) -> Vec<TargetKind> {
        children(stmt).iter().map(|t| t.kind).collect()
    }

    #[test]
    fn loop_statement_loop_gives_three_regions() {
        let x = var(1, "x", false);
        let (out, diags) = run(kernels(
            Vec::new(),
            vec![acc_loop(Vec::new()), assign(&x, 1), acc_loop(Vec::new())],
        ));
        assert_eq!(
            kinds(&out),
            [TargetKind::ParallelLoop, TargetKind::GangSingle, TargetKind::ParallelLoop]
        );
        assert!(diags.is_empty());
    }

    #[test]
    fn temporary_setup_folds_into_loop_region() {
        let t = var(1, "tmp.1", true);
        let (out, _) = run(kernels(Vec::new(), vec![assign(&t, 9), acc_loop(Vec::new())]));
        let regions = children(&out);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].kind, TargetKind::ParallelLoop);
        let RStmt::Bind { body, .. } = &regions[0].body[0] else {
            panic!("region body");
        };
        let RStmt::Bind { body: folded, .. } = &body[0] else {
            panic!("folded scope");
        };
        assert!(matches!(folded[0], RStmt::Assign { .. }));
        assert!(matches!(folded[1], RStmt::Loop(_)));
    }

    #[test]
    fn user_variable_setup_is_not_folded() {
        let x = var(1, "x", false);
        let (out, _) = run(kernels(Vec::new(), vec![assign(&x, 9), acc_loop(Vec::new())]));
        assert_eq!(kinds(&out), [TargetKind::GangSingle, TargetKind::ParallelLoop]);
    }

    #[test]
    fn empty_region_gets_placeholder() {
        let (out, _) = run(kernels(Vec::new(), Vec::new()));
        let regions = children(&out);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].kind, TargetKind::GangSingle);
        assert_eq!(
            regions[0].body,
            vec![RStmt::Bind {
                vars: Vec::new(),
                body: vec![RStmt::Nop]
            }]
        );
    }

    #[test]
    fn num_gangs_routing() {
        let x = var(1, "x", false);
        let four = AccClause::NumGangs(Expr::int(4, sp()));
        let (out, _) = run(kernels(
            vec![four],
            vec![assign(&x, 1), acc_loop(Vec::new()), assign(&x, 2)],
        ));
        for region in children(&out) {
            let gangs: Vec<String> = region
                .clauses
                .iter()
                .filter(|c| matches!(c, AccClause::NumGangs(_)))
                .map(|c| c.to_string())
                .collect();
            match region.kind {
                TargetKind::GangSingle => assert_eq!(gangs, ["num_gangs(1)"]),
                _ => assert_eq!(gangs, ["num_gangs(4)"]),
            }
        }
    }

    #[test]
    fn auto_added_only_without_scheme() {
        let (out, _) = run(kernels(
            Vec::new(),
            vec![acc_loop(Vec::new()), acc_loop(vec![AccClause::Seq])],
        ));
        let mut loops = Vec::new();
        walk(std::slice::from_ref(&out), &mut |s| {
            if let RStmt::Loop(l) = s {
                loops.push(l.clauses.clone());
            }
        });
        assert_eq!(loops, [vec![AccClause::Auto], vec![AccClause::Seq]]);
    }

    #[test]
    fn maps_lift_to_outer_data_region() {
        let a = var(1, "a", false);
        let t = var(2, "tmp.1", true);
        let map = |kind, v: &LocalVar, size| {
            AccClause::Map(MapClause {
                kind,
                target: MapTarget::Decl(v.clone()),
                size,
            })
        };
        let cond = AccClause::If(Expr::int(1, sp()));
        let (out, _) = run(kernels(
            vec![
                map(MapKind::ToFrom, &a, Some(4)),
                map(MapKind::To, &t, Some(4)),
                map(MapKind::ToPset, &a, None),
                map(MapKind::Alloc, &a, Some(0)),
                cond.clone(),
            ],
            vec![acc_loop(Vec::new())],
        ));
        let outer = out.as_target().expect("data region");
        assert_eq!(outer.kind, TargetKind::Data);
        assert_eq!(outer.clauses, [map(MapKind::ToFrom, &a, Some(4)), cond.clone()]);

        let inner = children(&out)[0];
        assert_eq!(
            inner.clauses,
            [
                map(MapKind::ForcePresent, &a, Some(4)),
                map(MapKind::To, &t, Some(4)),
                map(MapKind::ToPset, &a, None),
                map(MapKind::Alloc, &a, Some(0)),
                cond,
            ]
        );
    }

    #[test]
    fn nested_scope_variables_are_redistributed() {
        let b = var(1, "b", false);
        let t = var(2, "tmp.1", true);
        let (out, _) = run(kernels(
            Vec::new(),
            vec![RStmt::Bind {
                vars: vec![b.clone(), t.clone()],
                body: vec![
                    assign(&b, 1),
                    RStmt::Call {
                        name: "f".into(),
                        args: Vec::new(),
                    },
                ],
            }],
        ));
        let rendered = out.to_string();
        assert_eq!(
            rendered,
            "data_kernels
  try
    bind [b]
      data_kernels map(alloc:b [4])
        try
          bind [tmp.1]
            bind
              parallel_kernels_gang_single num_gangs(1) map(force_present:b [4])
                bind
                  b = 1
                  call f()
        finally
          data_end
  finally
    data_end
"
        );
    }

    #[test]
    fn template_instance_keeps_variables_local() {
        let b = var(1, "b", false);
        let mut diags = Vec::new();
        let out = decompose(
            kernels(
                Vec::new(),
                vec![RStmt::Bind {
                    vars: vec![b.clone()],
                    body: vec![assign(&b, 1)],
                }],
            ),
            true,
            &mut diags,
        );
        let mut data_regions = 0;
        walk(std::slice::from_ref(&out), &mut |s| {
            if matches!(s.as_target(), Some(t) if t.kind == TargetKind::Data) {
                data_regions += 1;
            }
        });
        assert_eq!(data_regions, 1);
    }

    #[test]
    fn loop_wrapper_scope_is_preserved() {
        let t = var(1, "tmp.1", true);
        let wrapper = RStmt::Bind {
            vars: vec![t.clone()],
            body: vec![assign(&t, 3), acc_loop(Vec::new())],
        };
        let (out, _) = run(kernels(Vec::new(), vec![wrapper]));
        assert_eq!(kinds(&out), [TargetKind::ParallelLoop]);
        // The wrapper kept its variable; nothing was flattened.
        assert!(matches!(&out.as_target().unwrap().body[0], RStmt::TryFinally { body, .. }
            if matches!(&body[0], RStmt::Bind { vars, .. } if vars.is_empty())));
    }

    #[test]
    fn top_level_loop_shapes() {
        let t = var(1, "tmp.1", true);
        let x = var(2, "x", false);
        let guarded = |body| RStmt::TryFinally {
            body,
            cleanup: vec![RStmt::Nop],
        };

        let mut plain = acc_loop(Vec::new());
        assert!(top_level_loop(&mut plain).is_some());

        let mut wrapped = RStmt::Bind {
            vars: Vec::new(),
            body: vec![guarded(vec![acc_loop(Vec::new())])],
        };
        assert!(top_level_loop(&mut wrapped).is_some());

        let mut setup = RStmt::Bind {
            vars: vec![t.clone()],
            body: vec![assign(&t, 1), assign(&x, 2), acc_loop(Vec::new())],
        };
        assert!(top_level_loop(&mut setup).is_some());

        let mut setup_then_guard = RStmt::Bind {
            vars: Vec::new(),
            body: vec![assign(&t, 1), guarded(vec![acc_loop(Vec::new())])],
        };
        assert!(top_level_loop(&mut setup_then_guard).is_none());

        let mut loop_then_call = RStmt::Bind {
            vars: Vec::new(),
            body: vec![
                acc_loop(Vec::new()),
                RStmt::Call {
                    name: "f".into(),
                    args: Vec::new(),
                },
            ],
        };
        assert!(top_level_loop(&mut loop_then_call).is_none());

        let mut empty = RStmt::Bind {
            vars: Vec::new(),
            body: Vec::new(),
        };
        assert!(top_level_loop(&mut empty).is_none());
    }

    #[test]
    fn hidden_loop_warns() {
        let x = var(1, "x", false);
        let guarded = RStmt::If {
            cond: Expr::int(1, sp()),
            then_body: vec![acc_loop(Vec::new())],
            else_body: Vec::new(),
        };
        let (out, diags) = run(kernels(Vec::new(), vec![assign(&x, 1), guarded]));
        assert_eq!(kinds(&out), [TargetKind::GangSingle]);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].code, Some(codes::W0500));
    }

    #[test]
    fn convert_replaces_every_kernels_region() {
        let mut program = RegionProgram {
            functions: vec![crate::region::RegionFunction {
                name: "p".into(),
                locals: Vec::new(),
                body: vec![
                    RStmt::Target(Box::new(kernels(Vec::new(), Vec::new()))),
                    RStmt::Bind {
                        vars: Vec::new(),
                        body: vec![RStmt::Target(Box::new(kernels(Vec::new(), Vec::new())))],
                    },
                ],
                is_template_instance: false,
            }],
        };
        convert_kernels(&mut program);
        let mut remaining = 0;
        walk(&program.functions[0].body, &mut |s| {
            if matches!(s.as_target(), Some(t) if t.kind == TargetKind::Kernels) {
                remaining += 1;
            }
        });
        assert_eq!(remaining, 0);
    }
}
