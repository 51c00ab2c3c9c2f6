// Behavioural properties of directive resolution and kernels decomposition.
//
// Every case goes through the public library API from source text:
// parse → resolve (→ lower → convert_kernels for the region cases).

use pdc::ast::{Directive, Program, StmtKind};
use pdc::clauses::ListClass;
use pdc::diag::{DiagLevel, Diagnostic, ErrorClass};
use pdc::pass::PassId;
use pdc::pipeline::{run_pipeline, CompilationState, CompileOptions};
use pdc::region::{walk, AccClause, RStmt, Target, TargetKind};

// ── Helpers ─────────────────────────────────────────────────────────────────

fn parse(src: &str) -> Program {
    let result = pdc::parser::parse(src);
    assert!(result.errors.is_empty(), "parse errors: {:?}", result.errors);
    result.program.expect("program")
}

fn resolve(src: &str) -> (Program, Vec<Diagnostic>) {
    let mut program = parse(src);
    let result = pdc::resolve::resolve(&mut program);
    (program, result.diagnostics)
}

fn unit(decls: &str, body: &str) -> String {
    format!("program p\n{decls}\n{body}\nend program\n")
}

fn first_directive(program: &Program) -> &Directive {
    program.units[0]
        .body
        .iter()
        .find_map(|s| match &s.kind {
            StmtKind::Directive(d) => Some(d),
            _ => None,
        })
        .expect("directive")
}

fn error_codes(diags: &[Diagnostic]) -> Vec<&'static str> {
    diags
        .iter()
        .filter(|d| d.level == DiagLevel::Error)
        .filter_map(|d| d.code.map(|c| c.0))
        .collect()
}

fn list_names(dir: &Directive, class: ListClass) -> Vec<String> {
    dir.clauses
        .as_ref()
        .expect("clauses")
        .list(class)
        .iter()
        .map(|e| e.name.name.clone())
        .collect()
}

/// Compile through kernels decomposition and return the parallel regions
/// of the first procedure in source order.
fn decomposed_regions(src: &str) -> Vec<Target> {
    let mut state = CompilationState::new(parse(src));
    run_pipeline(
        &mut state,
        PassId::ConvertKernels,
        &CompileOptions::default(),
        |_, _| {},
    )
    .expect("pipeline");
    let regions = state.regions.expect("regions");
    let mut found = Vec::new();
    walk(&regions.functions[0].body, &mut |s: &RStmt| {
        if let Some(t) = s.as_target() {
            if matches!(t.kind, TargetKind::ParallelLoop | TargetKind::GangSingle) {
                found.push(t.clone());
            }
        }
    });
    found
}

fn kinds(regions: &[Target]) -> Vec<TargetKind> {
    regions.iter().map(|t| t.kind).collect()
}

// ── Clause parsing and validation ───────────────────────────────────────────

#[test]
fn repeated_list_clauses_accumulate() {
    let decls = "integer :: a, b";
    let split = parse(&unit(decls, "!$omp parallel private(a) private(b)\n!$omp end parallel"));
    let joined = parse(&unit(decls, "!$omp parallel private(a, b)\n!$omp end parallel"));
    let split = list_names(first_directive(&split), ListClass::Private);
    let joined = list_names(first_directive(&joined), ListClass::Private);
    assert_eq!(split, ["a", "b"]);
    assert_eq!(split, joined);
}

#[test]
fn private_and_shared_conflict_once() {
    let (_, diags) = resolve(&unit(
        "integer :: x",
        "!$omp parallel private(x) shared(x)\n!$omp end parallel",
    ));
    let errors: Vec<&Diagnostic> = diags.iter().filter(|d| d.is_error()).collect();
    assert_eq!(errors.len(), 1, "{diags:?}");
    assert_eq!(errors[0].class(), ErrorClass::SemanticConstraint);
    assert!(errors[0].message.contains("'x'"), "{}", errors[0].message);
}

#[test]
fn firstprivate_lastprivate_overlap_is_accepted() {
    let (_, diags) = resolve(&unit(
        "integer :: i, x",
        "!$omp parallel do firstprivate(x) lastprivate(x)\ndo i = 1, 10\nx = i\nend do",
    ));
    assert!(error_codes(&diags).is_empty(), "{diags:?}");
}

#[test]
fn reduction_operator_must_fit_the_type() {
    let (_, diags) = resolve(&unit(
        "logical :: l",
        "!$omp parallel reduction(+:l)\n!$omp end parallel",
    ));
    assert_eq!(error_codes(&diags), ["E0204"]);
    assert_eq!(diags[0].class(), ErrorClass::Type);

    let (_, diags) = resolve(&unit(
        "logical :: l",
        "!$omp parallel reduction(.and.:l)\n!$omp end parallel",
    ));
    assert!(error_codes(&diags).is_empty(), "{diags:?}");
}

// ── Loop directives ─────────────────────────────────────────────────────────

#[test]
fn triangular_collapse_is_rejected() {
    let (_, diags) = resolve(&unit(
        "integer :: i, j, n",
        "!$omp do collapse(2)\ndo i = 1, n\ndo j = 1, i\nend do\nend do",
    ));
    assert_eq!(error_codes(&diags), ["E0304"]);
}

#[test]
fn rectangular_collapse_is_accepted() {
    let (_, diags) = resolve(&unit(
        "integer :: i, j, n",
        "!$omp do collapse(2)\ndo i = 1, n\ndo j = 1, n\nend do\nend do",
    ));
    assert!(error_codes(&diags).is_empty(), "{diags:?}");
}

// ── Atomic ──────────────────────────────────────────────────────────────────

fn atomic_rhs(dir: &Directive) -> Vec<String> {
    dir.body
        .iter()
        .filter_map(|s| match &s.kind {
            StmtKind::Assign(a) => Some(a.rhs.to_string()),
            _ => None,
        })
        .collect()
}

#[test]
fn reversed_subtraction_is_rewritten_with_advisory() {
    let (program, diags) = resolve(&unit("integer :: x, a", "!$omp atomic\nx = a - x"));
    let dir = first_directive(&program);
    assert_eq!(atomic_rhs(dir), ["x - (a)"]);
    assert!(error_codes(&diags).is_empty());
    let warnings: Vec<_> = diags.iter().filter(|d| d.level == DiagLevel::Warning).collect();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].code.map(|c| c.0), Some("W0400"));
}

#[test]
fn plain_subtraction_needs_no_advisory() {
    let (program, diags) = resolve(&unit("integer :: x, a", "!$omp atomic\nx = x - a"));
    assert_eq!(atomic_rhs(first_directive(&program)), ["x - a"]);
    assert!(diags.is_empty(), "{diags:?}");
}

#[test]
fn capture_must_read_the_updated_variable() {
    let decls = "integer :: x, v, y";
    let (program, diags) = resolve(&unit(
        decls,
        "!$omp atomic capture\nx = x + 1\nv = y\n!$omp end atomic",
    ));
    let info = first_directive(&program).atomic_info.expect("classified");
    assert!(!info.valid);
    assert_eq!(error_codes(&diags).len(), 1);
    assert_eq!(diags[0].class(), ErrorClass::SemanticConstraint);

    let (program, diags) = resolve(&unit(
        decls,
        "!$omp atomic capture\nx = x + 1\nv = x\n!$omp end atomic",
    ));
    let info = first_directive(&program).atomic_info.expect("classified");
    assert!(info.valid);
    assert_eq!(info.op, pdc::ast::AtomicOp::Capture);
    assert!(diags.is_empty(), "{diags:?}");
}

// ── Kernels decomposition ───────────────────────────────────────────────────

#[test]
fn loop_statement_loop_becomes_three_regions() {
    let regions = decomposed_regions(&unit(
        "integer :: i, x\nreal :: a(10)",
        "!$acc kernels
!$acc loop
do i = 1, 10
a(i) = 0.0
end do
x = 1
!$acc loop
do i = 1, 10
a(i) = 1.0
end do
!$acc end kernels",
    ));
    assert_eq!(
        kinds(&regions),
        [TargetKind::ParallelLoop, TargetKind::GangSingle, TargetKind::ParallelLoop]
    );
}

#[test]
fn computed_bound_folds_into_the_loop_region() {
    let regions = decomposed_regions(&unit(
        "integer :: i, n\nreal :: a(10)",
        "!$acc kernels
!$acc loop
do i = 0, n - 1
a(i + 1) = 0.0
end do
!$acc end kernels",
    ));
    assert_eq!(kinds(&regions), [TargetKind::ParallelLoop]);
}

#[test]
fn empty_kernels_region_gets_one_placeholder() {
    let regions = decomposed_regions(&unit("", "!$acc kernels\n!$acc end kernels"));
    assert_eq!(kinds(&regions), [TargetKind::GangSingle]);
    assert_eq!(
        regions[0].body,
        [RStmt::Bind {
            vars: Vec::new(),
            body: vec![RStmt::Nop],
        }]
    );
}

#[test]
fn num_gangs_goes_to_loop_regions_only() {
    let regions = decomposed_regions(&unit(
        "integer :: i, x\nreal :: a(10)",
        "!$acc kernels num_gangs(4)
x = 0
!$acc loop
do i = 1, 10
a(i) = 0.0
end do
x = 1
!$acc end kernels",
    ));
    assert_eq!(
        kinds(&regions),
        [TargetKind::GangSingle, TargetKind::ParallelLoop, TargetKind::GangSingle]
    );
    for region in &regions {
        let gangs: Vec<String> = region
            .clauses
            .iter()
            .filter(|c| matches!(c, AccClause::NumGangs(_)))
            .map(|c| c.to_string())
            .collect();
        let expected = match region.kind {
            TargetKind::GangSingle => "num_gangs(1)",
            _ => "num_gangs(4)",
        };
        assert_eq!(gangs, [expected], "{:?}", region.kind);
    }
}
