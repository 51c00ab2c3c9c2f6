// directive.rs — Directive kinds, line headers and per-kind clause masks
//
// A directive line is `<sentinel> [end] <name words> <clause text>`. The
// lexer hands the whole line to `scan_line`, which picks the longest run of
// leading words naming a known directive and records where the clause text
// starts. Clause text is parsed later by `clause_parser`.
//
// Preconditions: `scan_line` receives a line starting with its sentinel.
// Postconditions: `kind` is `None` for unknown directive names.
// Failure modes: none (unknown names are reported by the parser).
// Side effects: none.

use std::fmt;

use crate::clauses::{Clause, ClauseMask};

/// Directive family, by sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sentinel {
    Omp,
    Acc,
}

impl fmt::Display for Sentinel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sentinel::Omp => write!(f, "!$omp"),
            Sentinel::Acc => write!(f, "!$acc"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirectiveKind {
    Parallel,
    Do,
    Simd,
    DoSimd,
    ParallelDo,
    ParallelDoSimd,
    ParallelSections,
    ParallelWorkshare,
    Sections,
    Section,
    Single,
    Workshare,
    Task,
    Taskwait,
    Taskyield,
    Taskgroup,
    Critical,
    Master,
    Ordered,
    Barrier,
    Atomic,
    Flush,
    Cancel,
    CancellationPoint,
    Threadprivate,
    DeclareSimd,
    AccKernels,
    AccLoop,
}

/// How a directive relates to the statements that follow it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    /// Encloses a statement block closed by a matching end directive.
    Block,
    /// Applies to the following DO loop; the end directive is optional.
    Loop,
    /// Applies to one or two following assignments.
    Atomic,
    /// Executable directive with no body.
    Standalone,
    /// Appears in the specification part.
    Specification,
}

const OMP_NAMES: &[(&[&str], DirectiveKind)] = &[
    (&["parallel", "do", "simd"], DirectiveKind::ParallelDoSimd),
    (&["parallel", "do"], DirectiveKind::ParallelDo),
    (&["parallel", "sections"], DirectiveKind::ParallelSections),
    (&["parallel", "workshare"], DirectiveKind::ParallelWorkshare),
    (&["parallel"], DirectiveKind::Parallel),
    (&["do", "simd"], DirectiveKind::DoSimd),
    (&["do"], DirectiveKind::Do),
    (&["simd"], DirectiveKind::Simd),
    (&["sections"], DirectiveKind::Sections),
    (&["section"], DirectiveKind::Section),
    (&["single"], DirectiveKind::Single),
    (&["workshare"], DirectiveKind::Workshare),
    (&["task"], DirectiveKind::Task),
    (&["taskwait"], DirectiveKind::Taskwait),
    (&["taskyield"], DirectiveKind::Taskyield),
    (&["taskgroup"], DirectiveKind::Taskgroup),
    (&["critical"], DirectiveKind::Critical),
    (&["master"], DirectiveKind::Master),
    (&["ordered"], DirectiveKind::Ordered),
    (&["barrier"], DirectiveKind::Barrier),
    (&["atomic"], DirectiveKind::Atomic),
    (&["flush"], DirectiveKind::Flush),
    (&["cancellation", "point"], DirectiveKind::CancellationPoint),
    (&["cancel"], DirectiveKind::Cancel),
    (&["threadprivate"], DirectiveKind::Threadprivate),
    (&["declare", "simd"], DirectiveKind::DeclareSimd),
];

const ACC_NAMES: &[(&[&str], DirectiveKind)] = &[
    (&["kernels"], DirectiveKind::AccKernels),
    (&["loop"], DirectiveKind::AccLoop),
];

impl DirectiveKind {
    pub fn sentinel(self) -> Sentinel {
        match self {
            DirectiveKind::AccKernels | DirectiveKind::AccLoop => Sentinel::Acc,
            _ => Sentinel::Omp,
        }
    }

    /// Directive name as written in source, e.g. `parallel do`.
    pub fn name(self) -> &'static str {
        let table = match self.sentinel() {
            Sentinel::Omp => OMP_NAMES,
            Sentinel::Acc => ACC_NAMES,
        };
        match self {
            DirectiveKind::ParallelDoSimd => "parallel do simd",
            DirectiveKind::ParallelDo => "parallel do",
            DirectiveKind::ParallelSections => "parallel sections",
            DirectiveKind::ParallelWorkshare => "parallel workshare",
            DirectiveKind::DoSimd => "do simd",
            DirectiveKind::CancellationPoint => "cancellation point",
            DirectiveKind::DeclareSimd => "declare simd",
            _ => table
                .iter()
                .find(|(_, k)| *k == self)
                .map(|(words, _)| words[0])
                .unwrap_or("?"),
        }
    }

    pub fn category(self) -> Category {
        use DirectiveKind::*;
        match self {
            Parallel | ParallelSections | ParallelWorkshare | Sections | Single | Workshare
            | Task | Taskgroup | Critical | Master | Ordered | AccKernels => Category::Block,
            Do | Simd | DoSimd | ParallelDo | ParallelDoSimd | AccLoop => Category::Loop,
            Atomic => Category::Atomic,
            Section | Taskwait | Taskyield | Barrier | Flush | Cancel | CancellationPoint => {
                Category::Standalone
            }
            Threadprivate | DeclareSimd => Category::Specification,
        }
    }

    /// Constructs that open a new data-sharing context.
    pub fn is_parallel_class(self) -> bool {
        matches!(
            self,
            DirectiveKind::Parallel
                | DirectiveKind::ParallelDo
                | DirectiveKind::ParallelDoSimd
                | DirectiveKind::ParallelSections
                | DirectiveKind::ParallelWorkshare
                | DirectiveKind::Task
        )
    }

    /// OpenMP worksharing loop constructs handled by the loop resolver.
    pub fn is_omp_loop(self) -> bool {
        matches!(
            self,
            DirectiveKind::Do
                | DirectiveKind::Simd
                | DirectiveKind::DoSimd
                | DirectiveKind::ParallelDo
                | DirectiveKind::ParallelDoSimd
        )
    }

    pub fn is_simd(self) -> bool {
        matches!(
            self,
            DirectiveKind::Simd | DirectiveKind::DoSimd | DirectiveKind::ParallelDoSimd
        )
    }

    /// Clauses accepted on the opening directive.
    pub fn clause_mask(self) -> ClauseMask {
        use DirectiveKind::*;
        match self {
            Parallel | ParallelWorkshare => parallel_clauses(),
            Do => do_clauses(),
            Simd => simd_clauses(),
            DoSimd => (do_clauses() | simd_clauses()).without(Clause::Ordered),
            ParallelDo => parallel_clauses() | do_clauses(),
            ParallelDoSimd => {
                (parallel_clauses() | do_clauses() | simd_clauses()).without(Clause::Ordered)
            }
            ParallelSections => parallel_clauses() | sections_clauses(),
            Sections => sections_clauses(),
            Single => ClauseMask::of(&[Clause::Private, Clause::Firstprivate]),
            Task => ClauseMask::of(&[
                Clause::Private,
                Clause::Firstprivate,
                Clause::Shared,
                Clause::If,
                Clause::Default,
                Clause::Untied,
                Clause::Final,
                Clause::Mergeable,
                Clause::Depend,
            ]),
            Cancel => ClauseMask::of(&[Clause::If]),
            DeclareSimd => ClauseMask::of(&[
                Clause::Simdlen,
                Clause::Linear,
                Clause::Uniform,
                Clause::Aligned,
                Clause::Inbranch,
                Clause::Notinbranch,
            ]),
            AccKernels => ClauseMask::of(&[
                Clause::If,
                Clause::NumGangs,
                Clause::NumWorkers,
                Clause::VectorLength,
                Clause::Copy,
                Clause::AccCopyin,
                Clause::Copyout,
                Clause::Create,
                Clause::Present,
            ]),
            AccLoop => ClauseMask::of(&[
                Clause::Collapse,
                Clause::Gang,
                Clause::Worker,
                Clause::Vector,
                Clause::Seq,
                Clause::Auto,
                Clause::Independent,
                Clause::Private,
                Clause::Reduction,
            ]),
            _ => ClauseMask::EMPTY,
        }
    }

    /// Clauses accepted on the matching end directive.
    pub fn end_clause_mask(self) -> ClauseMask {
        use DirectiveKind::*;
        match self {
            Do | DoSimd | Sections | Workshare => ClauseMask::of(&[Clause::Nowait]),
            Single => ClauseMask::of(&[Clause::Nowait, Clause::Copyprivate]),
            _ => ClauseMask::EMPTY,
        }
    }
}

fn parallel_clauses() -> ClauseMask {
    ClauseMask::of(&[
        Clause::Private,
        Clause::Firstprivate,
        Clause::Shared,
        Clause::Copyin,
        Clause::Reduction,
        Clause::If,
        Clause::NumThreads,
        Clause::Default,
        Clause::ProcBind,
    ])
}

fn do_clauses() -> ClauseMask {
    ClauseMask::of(&[
        Clause::Private,
        Clause::Firstprivate,
        Clause::Lastprivate,
        Clause::Reduction,
        Clause::Schedule,
        Clause::Ordered,
        Clause::Collapse,
    ])
}

fn sections_clauses() -> ClauseMask {
    ClauseMask::of(&[
        Clause::Private,
        Clause::Firstprivate,
        Clause::Lastprivate,
        Clause::Reduction,
    ])
}

fn simd_clauses() -> ClauseMask {
    ClauseMask::of(&[
        Clause::Private,
        Clause::Lastprivate,
        Clause::Reduction,
        Clause::Collapse,
        Clause::Safelen,
        Clause::Linear,
        Clause::Aligned,
    ])
}

impl fmt::Display for DirectiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.sentinel(), self.name())
    }
}

// ── Directive line ───────────────────────────────────────────────────────

/// Header of one directive line, as recognised by the lexer.
///
/// `clause_start..clause_end` is the byte range of everything after the
/// directive name; the clause parser lexes it again.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectiveLine {
    pub sentinel: Sentinel,
    pub end: bool,
    pub kind: Option<DirectiveKind>,
    pub clause_start: usize,
    pub clause_end: usize,
}

impl fmt::Display for DirectiveLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sentinel)?;
        if self.end {
            write!(f, " end")?;
        }
        match self.kind {
            Some(kind) => write!(f, " {}", kind.name()),
            None => write!(f, " <unknown>"),
        }
    }
}

/// Split a directive line into its header parts. `line` starts with the
/// sentinel; `offset` is the line's position in the source.
pub fn scan_line(sentinel: Sentinel, line: &str, offset: usize) -> DirectiveLine {
    let after_sentinel = 5;
    let words = leading_words(line, after_sentinel);

    let mut end = false;
    let mut first = 0;
    if words.first().map(|(w, _)| w.as_str()) == Some("end") {
        end = true;
        first = 1;
    }

    let table = match sentinel {
        Sentinel::Omp => OMP_NAMES,
        Sentinel::Acc => ACC_NAMES,
    };

    // Table entries are ordered so the longest name wins.
    let mut kind = None;
    let mut name_end = words.get(first).map(|(_, e)| *e).unwrap_or(line.len());
    for (names, k) in table {
        let candidate = &words[first.min(words.len())..];
        if candidate.len() >= names.len()
            && names
                .iter()
                .zip(candidate)
                .all(|(n, (w, _))| n.eq_ignore_ascii_case(w))
        {
            kind = Some(*k);
            name_end = candidate[names.len() - 1].1;
            break;
        }
    }

    DirectiveLine {
        sentinel,
        end,
        kind,
        clause_start: offset + name_end,
        clause_end: offset + line.len(),
    }
}

/// Alphabetic words separated by blanks, starting at `from`, each with the
/// byte offset just past it. Stops at the first non-word character.
fn leading_words(line: &str, from: usize) -> Vec<(String, usize)> {
    let bytes = line.as_bytes();
    let mut words = Vec::new();
    let mut i = from.min(bytes.len());
    loop {
        while i < bytes.len() && (bytes[i] == b' ' || bytes[i] == b'\t') {
            i += 1;
        }
        let start = i;
        while i < bytes.len() && (bytes[i].is_ascii_alphabetic() || bytes[i] == b'_') {
            i += 1;
        }
        if i == start {
            break;
        }
        words.push((line[start..i].to_ascii_lowercase(), i));
    }
    words
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn longest_name_wins() {
        let d = scan_line(Sentinel::Omp, "!$omp parallel do simd private(x)", 0);
        assert_eq!(d.kind, Some(DirectiveKind::ParallelDoSimd));
        assert_eq!(d.clause_start, "!$omp parallel do simd".len());
    }

    #[test]
    fn clause_words_are_not_part_of_the_name() {
        let line = "!$omp parallel default(none)";
        let d = scan_line(Sentinel::Omp, line, 100);
        assert_eq!(d.kind, Some(DirectiveKind::Parallel));
        assert_eq!(d.clause_start, 100 + "!$omp parallel".len());
        assert_eq!(d.clause_end, 100 + line.len());
    }

    #[test]
    fn name_directly_followed_by_paren() {
        let d = scan_line(Sentinel::Omp, "!$omp critical(lock)", 0);
        assert_eq!(d.kind, Some(DirectiveKind::Critical));
        assert_eq!(d.clause_start, "!$omp critical".len());
    }

    #[test]
    fn end_directive() {
        let d = scan_line(Sentinel::Omp, "!$omp end parallel do", 0);
        assert!(d.end);
        assert_eq!(d.kind, Some(DirectiveKind::ParallelDo));
    }

    #[test]
    fn cancel_kind_is_clause_text() {
        let d = scan_line(Sentinel::Omp, "!$omp cancel do", 0);
        assert_eq!(d.kind, Some(DirectiveKind::Cancel));
        let d = scan_line(Sentinel::Omp, "!$omp cancellation point sections", 0);
        assert_eq!(d.kind, Some(DirectiveKind::CancellationPoint));
    }

    #[test]
    fn unknown_directive() {
        let d = scan_line(Sentinel::Omp, "!$omp frobnicate", 0);
        assert_eq!(d.kind, None);
        let d = scan_line(Sentinel::Acc, "!$acc parallel", 0);
        assert_eq!(d.kind, None);
    }

    #[test]
    fn masks_follow_combined_constructs() {
        let m = DirectiveKind::ParallelDo.clause_mask();
        assert!(m.contains(Clause::NumThreads));
        assert!(m.contains(Clause::Schedule));
        assert!(!m.contains(Clause::Linear));
        assert!(!DirectiveKind::DoSimd.clause_mask().contains(Clause::Ordered));
        assert!(DirectiveKind::Do.clause_mask().contains(Clause::Ordered));
        assert!(DirectiveKind::Single
            .end_clause_mask()
            .contains(Clause::Copyprivate));
    }

    #[test]
    fn display_names() {
        assert_eq!(DirectiveKind::ParallelDo.to_string(), "!$omp parallel do");
        assert_eq!(DirectiveKind::AccKernels.to_string(), "!$acc kernels");
        assert_eq!(DirectiveKind::Barrier.name(), "barrier");
    }
}
