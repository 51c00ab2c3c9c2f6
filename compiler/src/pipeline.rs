// pipeline.rs — Compilation state and pass orchestration
//
// Holds all pass artifacts and runs the minimal set of passes for a given
// terminal PassId.
//
// Preconditions: the program was parsed without errors.
// Postconditions: all artifacts for required passes are populated, or has_error is set.
// Failure modes: any pass emitting error-level diagnostics stops the run.
// Side effects: calls on_pass_complete after each pass for immediate display.

use std::time::{Duration, Instant};

use tracing::debug;

use crate::ast::Program;
use crate::diag::Diagnostic;
use crate::pass::{descriptor, required_passes, PassId};
use crate::region::RegionProgram;
use crate::symbols::SymbolTable;

// ── Options ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct CompileOptions {
    /// Run the kernels decomposition; off leaves kernels regions whole.
    pub split_kernels: bool,
    /// Print per-pass timing on stderr.
    pub verbose: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            split_kernels: true,
            verbose: false,
        }
    }
}

// ── Artifact storage ───────────────────────────────────────────────────────

/// Holds all compilation artifacts and accumulated diagnostics.
pub struct CompilationState {
    /// Parsed program; resolution rewrites it in place.
    pub program: Program,
    pub symbols: Option<SymbolTable>,
    pub regions: Option<RegionProgram>,
    pub diagnostics: Vec<Diagnostic>,
    pub has_error: bool,
}

impl CompilationState {
    pub fn new(program: Program) -> Self {
        Self {
            program,
            symbols: None,
            regions: None,
            diagnostics: Vec::new(),
            has_error: false,
        }
    }
}

// ── Error type ─────────────────────────────────────────────────────────────

/// Pipeline execution failed due to error-level diagnostics in a pass.
/// The specific diagnostics are available in `CompilationState.diagnostics`.
#[derive(Debug, thiserror::Error)]
#[error("{failing_pass} pass reported errors")]
pub struct PipelineError {
    /// The pass that produced the error.
    pub failing_pass: PassId,
}

/// Per-pass post-processing: callback, accumulate, verbose, error check.
fn finish_pass(
    state: &mut CompilationState,
    pass_id: PassId,
    diags: Vec<Diagnostic>,
    elapsed: Duration,
    verbose: bool,
    on_pass_complete: &mut impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    on_pass_complete(pass_id, &diags);
    let is_err = diags.iter().any(Diagnostic::is_error);
    state.diagnostics.extend(diags);
    if verbose {
        eprintln!(
            "pdc: {} complete, {:.1}ms",
            descriptor(pass_id).name,
            elapsed.as_secs_f64() * 1000.0
        );
    }
    if is_err {
        state.has_error = true;
        return Err(PipelineError {
            failing_pass: pass_id,
        });
    }
    Ok(())
}

// ── Pipeline runner ────────────────────────────────────────────────────────

/// Run the minimal set of passes to produce `terminal`.
///
/// Per-pass sequence: execute → on_pass_complete(callback) → verbose → error check.
pub fn run_pipeline(
    state: &mut CompilationState,
    terminal: PassId,
    options: &CompileOptions,
    mut on_pass_complete: impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    for pass_id in required_passes(terminal) {
        let t = Instant::now();
        let diags = match pass_id {
            PassId::Resolve => {
                let result = crate::resolve::resolve(&mut state.program);
                state.symbols = Some(result.symbols);
                result.diagnostics
            }
            PassId::Lower => {
                let symbols = state.symbols.get_or_insert_with(SymbolTable::new);
                state.regions = Some(crate::lower::lower_program(&state.program, symbols));
                Vec::new()
            }
            PassId::ConvertKernels => match state.regions.as_mut() {
                Some(regions) if options.split_kernels => crate::kernels::convert_kernels(regions),
                _ => {
                    debug!("kernels decomposition disabled");
                    Vec::new()
                }
            },
        };
        finish_pass(
            state,
            pass_id,
            diags,
            t.elapsed(),
            options.verbose,
            &mut on_pass_complete,
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::{walk, RStmt, TargetKind};

    const SOURCE: &str = "program p
integer :: i, n
real :: a(100)
!$acc kernels copy(a)
!$acc loop
do i = 1, n
a(i) = 0.0
end do
!$acc end kernels
end program
";

    fn state_for(src: &str) -> CompilationState {
        let program = crate::parser::parse(src).program.expect("parse");
        CompilationState::new(program)
    }

    fn target_kinds(regions: &RegionProgram) -> Vec<TargetKind> {
        let mut kinds = Vec::new();
        walk(&regions.functions[0].body, &mut |s: &RStmt| {
            if let Some(t) = s.as_target() {
                kinds.push(t.kind);
            }
        });
        kinds
    }

    #[test]
    fn full_pipeline_splits_kernels() {
        let mut state = state_for(SOURCE);
        let mut seen = Vec::new();
        run_pipeline(
            &mut state,
            PassId::ConvertKernels,
            &CompileOptions::default(),
            |id, _| seen.push(id),
        )
        .expect("pipeline");
        assert_eq!(seen, [PassId::Resolve, PassId::Lower, PassId::ConvertKernels]);
        let kinds = target_kinds(state.regions.as_ref().unwrap());
        assert_eq!(kinds, [TargetKind::Data, TargetKind::ParallelLoop]);
    }

    #[test]
    fn keep_mode_leaves_kernels() {
        let mut state = state_for(SOURCE);
        let options = CompileOptions {
            split_kernels: false,
            ..CompileOptions::default()
        };
        run_pipeline(&mut state, PassId::ConvertKernels, &options, |_, _| {}).expect("pipeline");
        let kinds = target_kinds(state.regions.as_ref().unwrap());
        assert_eq!(kinds, [TargetKind::Kernels]);
    }

    #[test]
    fn resolve_errors_stop_the_pipeline() {
        let mut state = state_for(
            "program p
integer :: x
!$omp parallel private(x) shared(x)
!$omp end parallel
end program
",
        );
        let err = run_pipeline(
            &mut state,
            PassId::ConvertKernels,
            &CompileOptions::default(),
            |_, _| {},
        )
        .unwrap_err();
        assert_eq!(err.failing_pass, PassId::Resolve);
        assert!(state.has_error);
        assert!(state.regions.is_none());
        assert_eq!(err.to_string(), "resolve pass reported errors");
    }
}
