// clauses.rs — Clause-set data model
//
// A `ClauseSet` is owned by the directive node that carries it. Scalar
// clauses occupy `Option` slots; list clauses append `NamelistEntry`s to
// one of the fixed list classes, in source order. Cross-class exclusivity
// is not enforced here; see `validate`.

use std::fmt;
use std::ops::BitOr;

use crate::ast::{Expr, Ident, Span};
use crate::id::SymbolId;

// ── Clause mask ──────────────────────────────────────────────────────────

/// Every clause keyword the parser knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Clause {
    Private,
    Firstprivate,
    Lastprivate,
    Copyprivate,
    Shared,
    Copyin,
    Reduction,
    If,
    NumThreads,
    Schedule,
    Default,
    Ordered,
    Collapse,
    Untied,
    Final,
    Mergeable,
    Aligned,
    Depend,
    Inbranch,
    Linear,
    Notinbranch,
    ProcBind,
    Safelen,
    Simdlen,
    Uniform,
    Nowait,
    NumGangs,
    NumWorkers,
    VectorLength,
    Copy,
    AccCopyin,
    Copyout,
    Create,
    Present,
    Independent,
    Seq,
    Auto,
    Gang,
    Worker,
    Vector,
}

/// Set of clauses a directive accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClauseMask(u64);

impl ClauseMask {
    pub const EMPTY: ClauseMask = ClauseMask(0);

    pub fn of(clauses: &[Clause]) -> ClauseMask {
        clauses
            .iter()
            .fold(ClauseMask::EMPTY, |m, &c| ClauseMask(m.0 | bit(c)))
    }

    pub fn contains(self, clause: Clause) -> bool {
        self.0 & bit(clause) != 0
    }

    pub fn without(self, clause: Clause) -> ClauseMask {
        ClauseMask(self.0 & !bit(clause))
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

fn bit(clause: Clause) -> u64 {
    1u64 << (clause as u8)
}

impl BitOr for ClauseMask {
    type Output = ClauseMask;
    fn bitor(self, rhs: ClauseMask) -> ClauseMask {
        ClauseMask(self.0 | rhs.0)
    }
}

// ── Reduction operators ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReductionOp {
    Add,
    Mul,
    Sub,
    And,
    Or,
    Eqv,
    Neqv,
    Max,
    Min,
    Iand,
    Ior,
    Ieor,
}

impl ReductionOp {
    /// Operators spelled as an intrinsic procedure name.
    pub fn from_intrinsic_name(name: &str) -> Option<ReductionOp> {
        match name.to_ascii_lowercase().as_str() {
            "max" => Some(ReductionOp::Max),
            "min" => Some(ReductionOp::Min),
            "iand" => Some(ReductionOp::Iand),
            "ior" => Some(ReductionOp::Ior),
            "ieor" => Some(ReductionOp::Ieor),
            _ => None,
        }
    }

    pub fn is_intrinsic_name(self) -> bool {
        matches!(
            self,
            ReductionOp::Max
                | ReductionOp::Min
                | ReductionOp::Iand
                | ReductionOp::Ior
                | ReductionOp::Ieor
        )
    }
}

impl fmt::Display for ReductionOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReductionOp::Add => "+",
            ReductionOp::Mul => "*",
            ReductionOp::Sub => "-",
            ReductionOp::And => ".and.",
            ReductionOp::Or => ".or.",
            ReductionOp::Eqv => ".eqv.",
            ReductionOp::Neqv => ".neqv.",
            ReductionOp::Max => "max",
            ReductionOp::Min => "min",
            ReductionOp::Iand => "iand",
            ReductionOp::Ior => "ior",
            ReductionOp::Ieor => "ieor",
        };
        f.write_str(s)
    }
}

// ── List classes ─────────────────────────────────────────────────────────

/// Category a list item is placed into by its clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListClass {
    Private,
    Firstprivate,
    Lastprivate,
    Copyprivate,
    Shared,
    Copyin,
    Uniform,
    Aligned,
    Linear,
    DependIn,
    DependOut,
    DependInout,
    Reduction(ReductionOp),
    AccCopy,
    AccCopyin,
    AccCopyout,
    AccCreate,
    AccPresent,
}

const REDUCTION_OPS: [ReductionOp; 12] = [
    ReductionOp::Add,
    ReductionOp::Mul,
    ReductionOp::Sub,
    ReductionOp::And,
    ReductionOp::Or,
    ReductionOp::Eqv,
    ReductionOp::Neqv,
    ReductionOp::Max,
    ReductionOp::Min,
    ReductionOp::Iand,
    ReductionOp::Ior,
    ReductionOp::Ieor,
];

/// Number of list classes (reductions count once per operator).
pub const LIST_CLASS_COUNT: usize = 12 + REDUCTION_OPS.len() + 5;

impl ListClass {
    /// All classes in storage order.
    pub fn all() -> impl Iterator<Item = ListClass> {
        (0..LIST_CLASS_COUNT).map(ListClass::from_index)
    }

    pub fn index(self) -> usize {
        match self {
            ListClass::Private => 0,
            ListClass::Firstprivate => 1,
            ListClass::Lastprivate => 2,
            ListClass::Copyprivate => 3,
            ListClass::Shared => 4,
            ListClass::Copyin => 5,
            ListClass::Uniform => 6,
            ListClass::Aligned => 7,
            ListClass::Linear => 8,
            ListClass::DependIn => 9,
            ListClass::DependOut => 10,
            ListClass::DependInout => 11,
            ListClass::Reduction(op) => 12 + op as usize,
            ListClass::AccCopy => 24,
            ListClass::AccCopyin => 25,
            ListClass::AccCopyout => 26,
            ListClass::AccCreate => 27,
            ListClass::AccPresent => 28,
        }
    }

    fn from_index(i: usize) -> ListClass {
        match i {
            0 => ListClass::Private,
            1 => ListClass::Firstprivate,
            2 => ListClass::Lastprivate,
            3 => ListClass::Copyprivate,
            4 => ListClass::Shared,
            5 => ListClass::Copyin,
            6 => ListClass::Uniform,
            7 => ListClass::Aligned,
            8 => ListClass::Linear,
            9 => ListClass::DependIn,
            10 => ListClass::DependOut,
            11 => ListClass::DependInout,
            12..=23 => ListClass::Reduction(REDUCTION_OPS[i - 12]),
            24 => ListClass::AccCopy,
            25 => ListClass::AccCopyin,
            26 => ListClass::AccCopyout,
            27 => ListClass::AccCreate,
            _ => ListClass::AccPresent,
        }
    }

    /// Clause keyword used in diagnostics.
    pub fn clause_name(self) -> &'static str {
        match self {
            ListClass::Private => "private",
            ListClass::Firstprivate => "firstprivate",
            ListClass::Lastprivate => "lastprivate",
            ListClass::Copyprivate => "copyprivate",
            ListClass::Shared => "shared",
            ListClass::Copyin => "copyin",
            ListClass::Uniform => "uniform",
            ListClass::Aligned => "aligned",
            ListClass::Linear => "linear",
            ListClass::DependIn | ListClass::DependOut | ListClass::DependInout => "depend",
            ListClass::Reduction(_) => "reduction",
            ListClass::AccCopy => "copy",
            ListClass::AccCopyin => "copyin",
            ListClass::AccCopyout => "copyout",
            ListClass::AccCreate => "create",
            ListClass::AccPresent => "present",
        }
    }

    pub fn is_depend(self) -> bool {
        matches!(
            self,
            ListClass::DependIn | ListClass::DependOut | ListClass::DependInout
        )
    }

    /// OpenACC data classes; their items may carry an array section.
    pub fn is_acc_data(self) -> bool {
        matches!(
            self,
            ListClass::AccCopy
                | ListClass::AccCopyin
                | ListClass::AccCopyout
                | ListClass::AccCreate
                | ListClass::AccPresent
        )
    }

    /// Classes whose items may name a whole common block as `/name/`.
    pub fn allows_common(self) -> bool {
        matches!(
            self,
            ListClass::Private
                | ListClass::Firstprivate
                | ListClass::Lastprivate
                | ListClass::Copyprivate
                | ListClass::Shared
                | ListClass::Copyin
        )
    }
}

// ── Enumerated clause values ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultSharing {
    Shared,
    Private,
    Firstprivate,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleKind {
    Static,
    Dynamic,
    Guided,
    Runtime,
    Auto,
}

impl ScheduleKind {
    /// `runtime` and `auto` take no chunk size.
    pub fn accepts_chunk(self) -> bool {
        !matches!(self, ScheduleKind::Runtime | ScheduleKind::Auto)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcBind {
    Master,
    Spread,
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelKind {
    Parallel,
    Sections,
    Do,
    Taskgroup,
}

/// Parallelization-scheme flags of an OpenACC `loop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AccLoopFlags {
    pub independent: bool,
    pub seq: bool,
    pub auto: bool,
    pub gang: bool,
    pub worker: bool,
    pub vector: bool,
}

// ── Namelist entry ───────────────────────────────────────────────────────

/// One list item. `symbol` is filled in by resolution; `expr` holds an
/// array section (depend, acc data clauses) or a per-item step/alignment
/// (linear, aligned).
#[derive(Debug, Clone, PartialEq)]
pub struct NamelistEntry {
    pub name: Ident,
    /// Written as `/name/`: a common block, expanded during resolution.
    pub common: bool,
    pub symbol: Option<SymbolId>,
    pub section: Option<Expr>,
    pub expr: Option<Expr>,
    pub span: Span,
}

impl NamelistEntry {
    pub fn new(name: Ident) -> Self {
        let span = name.span;
        NamelistEntry {
            name,
            common: false,
            symbol: None,
            section: None,
            expr: None,
            span,
        }
    }
}

// ── Clause set ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct ClauseSet {
    pub if_expr: Option<Expr>,
    pub final_expr: Option<Expr>,
    pub num_threads: Option<Expr>,
    pub chunk_size: Option<Expr>,
    pub safelen: Option<Expr>,
    pub simdlen: Option<Expr>,
    pub num_gangs: Option<Expr>,
    pub num_workers: Option<Expr>,
    pub vector_length: Option<Expr>,
    /// As written; folded into `collapse` during resolution.
    pub collapse_expr: Option<Expr>,
    /// Collapse count, at least 1.
    pub collapse: u32,
    pub default_sharing: Option<DefaultSharing>,
    pub schedule: Option<ScheduleKind>,
    pub proc_bind: Option<ProcBind>,
    pub cancel: Option<CancelKind>,
    pub ordered: bool,
    pub untied: bool,
    pub mergeable: bool,
    pub inbranch: bool,
    pub notinbranch: bool,
    pub nowait: bool,
    pub acc: AccLoopFlags,
    lists: Vec<Vec<NamelistEntry>>,
}

impl Default for ClauseSet {
    fn default() -> Self {
        ClauseSet {
            if_expr: None,
            final_expr: None,
            num_threads: None,
            chunk_size: None,
            safelen: None,
            simdlen: None,
            num_gangs: None,
            num_workers: None,
            vector_length: None,
            collapse_expr: None,
            collapse: 1,
            default_sharing: None,
            schedule: None,
            proc_bind: None,
            cancel: None,
            ordered: false,
            untied: false,
            mergeable: false,
            inbranch: false,
            notinbranch: false,
            nowait: false,
            acc: AccLoopFlags::default(),
            lists: vec![Vec::new(); LIST_CLASS_COUNT],
        }
    }
}

impl ClauseSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn list(&self, class: ListClass) -> &[NamelistEntry] {
        &self.lists[class.index()]
    }

    pub fn list_mut(&mut self, class: ListClass) -> &mut Vec<NamelistEntry> {
        &mut self.lists[class.index()]
    }

    pub fn push(&mut self, class: ListClass, entry: NamelistEntry) {
        self.lists[class.index()].push(entry);
    }

    /// Non-empty lists in storage order.
    pub fn lists(&self) -> impl Iterator<Item = (ListClass, &[NamelistEntry])> {
        ListClass::all()
            .map(move |c| (c, self.list(c)))
            .filter(|(_, l)| !l.is_empty())
    }

    /// Append all lists and flags of `other` (used to fold end-directive
    /// clauses such as `copyprivate` into the opening directive).
    pub fn absorb(&mut self, other: ClauseSet) {
        self.nowait |= other.nowait;
        for (i, list) in other.lists.into_iter().enumerate() {
            self.lists[i].extend(list);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ident(name: &str) -> Ident {
        Ident {
            name: name.to_string(),
            span: (0..name.len()).into(),
        }
    }

    #[test]
    fn list_class_index_round_trips() {
        let all: Vec<ListClass> = ListClass::all().collect();
        assert_eq!(all.len(), LIST_CLASS_COUNT);
        for (i, c) in all.iter().enumerate() {
            assert_eq!(c.index(), i);
        }
        assert_eq!(
            ListClass::Reduction(ReductionOp::Ieor).index(),
            ListClass::AccCopy.index() - 1
        );
    }

    #[test]
    fn mask_operations() {
        let m = ClauseMask::of(&[Clause::Private, Clause::Vector]);
        assert!(m.contains(Clause::Private));
        assert!(m.contains(Clause::Vector));
        assert!(!m.contains(Clause::Shared));
        assert!(!m.without(Clause::Private).contains(Clause::Private));
        assert!((m | ClauseMask::of(&[Clause::Shared])).contains(Clause::Shared));
        assert!(ClauseMask::EMPTY.is_empty());
    }

    #[test]
    fn push_preserves_order_and_absorb_appends() {
        let mut a = ClauseSet::new();
        a.push(ListClass::Copyprivate, NamelistEntry::new(ident("x")));
        let mut b = ClauseSet::new();
        b.push(ListClass::Copyprivate, NamelistEntry::new(ident("y")));
        b.nowait = true;
        a.absorb(b);
        let names: Vec<_> = a
            .list(ListClass::Copyprivate)
            .iter()
            .map(|e| e.name.name.as_str())
            .collect();
        assert_eq!(names, ["x", "y"]);
        assert!(a.nowait);
        assert_eq!(a.lists().count(), 1);
    }

    #[test]
    fn reduction_names() {
        assert_eq!(ReductionOp::from_intrinsic_name("MAX"), Some(ReductionOp::Max));
        assert_eq!(ReductionOp::from_intrinsic_name("sum"), None);
        assert_eq!(ReductionOp::Neqv.to_string(), ".neqv.");
        assert!(!ScheduleKind::Runtime.accepts_chunk());
    }
}
