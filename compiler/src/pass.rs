// pass.rs — Pass descriptors: metadata, dependency resolution, artifact IDs
//
// Declares the compiler's semantic passes (parsing happens before the
// runner), their dependency edges and the artifacts they produce. The
// pipeline runner uses this to run the minimal pass list for each --emit
// target.

use std::collections::HashSet;
use std::fmt;

// ── Pass and Artifact identifiers ──────────────────────────────────────────

/// Identifies each compiler pass (parse excluded — handled before the runner).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassId {
    Resolve,
    Lower,
    ConvertKernels,
}

/// Machine-readable artifact identifiers. Each maps to a field of the
/// compilation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactId {
    Symbols,   // SymbolTable
    Resolved,  // resolved Program (bindings, implicit privates, atomic info)
    Regions,   // RegionProgram
    Converted, // RegionProgram without kernels regions
}

impl fmt::Display for PassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(descriptor(*self).name)
    }
}

// ── Pass descriptor ────────────────────────────────────────────────────────

/// Static metadata about a compiler pass.
pub struct PassDescriptor {
    /// Human-readable name for diagnostics/verbose output.
    pub name: &'static str,
    /// Pass dependencies (other passes whose outputs this pass consumes).
    pub inputs: &'static [PassId],
    /// Artifacts this pass produces.
    pub outputs: &'static [ArtifactId],
    /// Pre/post conditions (documentation only).
    pub invariants: &'static str,
}

/// Return the static descriptor for a given pass.
pub fn descriptor(id: PassId) -> PassDescriptor {
    match id {
        PassId::Resolve => PassDescriptor {
            name: "resolve",
            inputs: &[],
            outputs: &[ArtifactId::Symbols, ArtifactId::Resolved],
            invariants: "names bound, expressions typed, directives validated",
        },
        PassId::Lower => PassDescriptor {
            name: "lower",
            inputs: &[PassId::Resolve],
            outputs: &[ArtifactId::Regions],
            invariants: "scopes explicit, acc loop bounds simple",
        },
        PassId::ConvertKernels => PassDescriptor {
            name: "convert_kernels",
            inputs: &[PassId::Lower],
            outputs: &[ArtifactId::Converted],
            invariants: "no kernels region left, data regions end on every exit",
        },
    }
}

// ── Dependency resolution ──────────────────────────────────────────────────

/// All pass IDs in declaration order (used for iteration).
pub const ALL_PASSES: [PassId; 3] = [PassId::Resolve, PassId::Lower, PassId::ConvertKernels];

/// Compute the minimal ordered set of passes needed to produce `terminal`.
/// Returns passes in topological (execution) order.
pub fn required_passes(terminal: PassId) -> Vec<PassId> {
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    visit(terminal, &mut visited, &mut order);
    order
}

fn visit(id: PassId, visited: &mut HashSet<PassId>, order: &mut Vec<PassId>) {
    if !visited.insert(id) {
        return;
    }
    for &dep in descriptor(id).inputs {
        visit(dep, visited, order);
    }
    order.push(id);
}

// ── Tests ──────────────────────────────────────────────────────────────────
