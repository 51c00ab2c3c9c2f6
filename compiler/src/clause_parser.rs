// clause_parser.rs — Directive clause text to `ClauseSet`
//
// Clause text is the tail of a directive line after the directive name. It
// is lexed again from the source and matched clause by clause against the
// directive's permission mask. Clauses may appear in any order, optionally
// separated by commas; a scalar clause matches at most once, list clauses
// accumulate in source order.
//
// Preconditions: `range` lies inside `source` on one directive line.
// Postconditions: on success the whole range was consumed.
// Failure modes: malformed lists, bad clause arguments and trailing junk
//   return `ClauseSyntaxError`; no partial clause set escapes.
// Side effects: none.

use std::ops::Range;

use crate::ast::{AtomicHeader, AtomicOp, Expr, Ident, Span};
use crate::clauses::{
    CancelKind, Clause, ClauseMask, ClauseSet, DefaultSharing, ListClass, NamelistEntry, ProcBind,
    ReductionOp, ScheduleKind,
};
use crate::directive::{DirectiveKind, DirectiveLine};
use crate::lexer::{self, Token};
use crate::parser;

/// A clause-grammar failure. Parsing of the directive stops here.
#[derive(Debug, Clone, PartialEq)]
pub struct ClauseSyntaxError {
    pub span: Span,
    pub message: String,
}

/// Separator rules for the first clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClauseParseOptions {
    /// No clause has been seen yet, so a leading comma is not a separator.
    pub first: bool,
    /// The next clause must be preceded by whitespace unless a comma
    /// separates it.
    pub needs_space: bool,
}

impl Default for ClauseParseOptions {
    fn default() -> Self {
        ClauseParseOptions {
            first: true,
            needs_space: true,
        }
    }
}

/// Everything an opening directive line can carry besides its name.
#[derive(Debug, Clone, Default)]
pub struct DirectiveArgs {
    pub clauses: ClauseSet,
    pub atomic: Option<AtomicHeader>,
    /// `critical (name)`
    pub name: Option<Ident>,
    /// `flush (list)` and `threadprivate (list)`
    pub list: Vec<NamelistEntry>,
    /// `declare simd (proc)`
    pub proc_name: Option<Ident>,
}

#[derive(Debug, Clone, Default)]
pub struct EndArgs {
    pub clauses: ClauseSet,
    pub name: Option<Ident>,
}

/// Parse a clause list from `source[range]`.
pub fn parse_clauses(
    source: &str,
    range: Range<usize>,
    mask: ClauseMask,
    options: ClauseParseOptions,
) -> Result<ClauseSet, ClauseSyntaxError> {
    let mut cur = Cursor::new(source, range)?;
    let clauses = cur.clauses(mask, options)?;
    cur.finish()?;
    Ok(clauses)
}

/// Parse the arguments of an opening directive of kind `kind`.
pub fn parse_directive_args(
    source: &str,
    line: &DirectiveLine,
    kind: DirectiveKind,
) -> Result<DirectiveArgs, ClauseSyntaxError> {
    let mut cur = Cursor::new(source, line.clause_start..line.clause_end)?;
    let mut args = DirectiveArgs::default();
    match kind {
        DirectiveKind::Atomic => args.atomic = Some(cur.atomic_header()?),
        DirectiveKind::Critical => args.name = cur.optional_name()?,
        DirectiveKind::Flush => {
            if cur.peek() == Some(&Token::LParen) {
                cur.advance();
                args.list = cur.list(false, false)?;
                cur.expect(Token::RParen, "')'")?;
            }
        }
        DirectiveKind::Threadprivate => {
            cur.expect(Token::LParen, "'('")?;
            args.list = cur.list(true, false)?;
            cur.expect(Token::RParen, "')'")?;
        }
        DirectiveKind::Cancel => {
            args.clauses.cancel = Some(cur.cancel_kind()?);
            let options = ClauseParseOptions {
                first: false,
                needs_space: true,
            };
            let parsed = cur.clauses(kind.clause_mask(), options)?;
            args.clauses.if_expr = parsed.if_expr;
        }
        DirectiveKind::CancellationPoint => args.clauses.cancel = Some(cur.cancel_kind()?),
        DirectiveKind::DeclareSimd => {
            args.proc_name = cur.optional_name()?;
            let options = ClauseParseOptions {
                first: true,
                needs_space: args.proc_name.is_none(),
            };
            args.clauses = cur.clauses(kind.clause_mask(), options)?;
        }
        _ => args.clauses = cur.clauses(kind.clause_mask(), ClauseParseOptions::default())?,
    }
    cur.finish()?;
    Ok(args)
}

/// Parse the arguments of an end directive closing a `kind` construct.
pub fn parse_end_args(
    source: &str,
    line: &DirectiveLine,
    kind: DirectiveKind,
) -> Result<EndArgs, ClauseSyntaxError> {
    let mut cur = Cursor::new(source, line.clause_start..line.clause_end)?;
    let mut args = EndArgs::default();
    if kind == DirectiveKind::Critical {
        args.name = cur.optional_name()?;
    } else {
        args.clauses = cur.clauses(kind.end_clause_mask(), ClauseParseOptions::default())?;
    }
    cur.finish()?;
    Ok(args)
}

// ── Cursor ───────────────────────────────────────────────────────────────

struct Cursor<'s> {
    source: &'s str,
    tokens: Vec<(Token, lexer::Span)>,
    pos: usize,
    start: usize,
    end: usize,
}

fn to_span(span: lexer::Span) -> Span {
    (span.start..span.end).into()
}

impl<'s> Cursor<'s> {
    fn new(source: &'s str, range: Range<usize>) -> Result<Self, ClauseSyntaxError> {
        let lexed = lexer::lex_at(&source[range.clone()], range.start);
        if let Some(err) = lexed.errors.into_iter().next() {
            return Err(ClauseSyntaxError {
                span: to_span(err.span),
                message: err.message,
            });
        }
        Ok(Cursor {
            source,
            tokens: lexed.tokens,
            pos: 0,
            start: range.start,
            end: range.end,
        })
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn advance(&mut self) {
        self.pos += 1;
    }

    fn span(&self) -> Span {
        match self.tokens.get(self.pos) {
            Some((_, s)) => to_span(*s),
            None => (self.end..self.end).into(),
        }
    }

    fn prev_end(&self) -> usize {
        match self.pos.checked_sub(1) {
            Some(p) => self.tokens[p].1.end,
            None => self.start,
        }
    }

    /// Whether blank space separates the current token from the previous one.
    fn space_before(&self) -> bool {
        match self.tokens.get(self.pos) {
            Some((_, s)) => s.start > self.prev_end(),
            None => true,
        }
    }

    fn text(&self, span: lexer::Span) -> &'s str {
        &self.source[span.start..span.end]
    }

    /// Lowercased text of the current token if it is a word.
    fn word(&self) -> Option<String> {
        match self.tokens.get(self.pos) {
            Some((t, s)) if t.is_word() => Some(self.text(*s).to_ascii_lowercase()),
            _ => None,
        }
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_word(&mut self, w: &str) -> bool {
        if self.word().as_deref() == Some(w) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error(&self, message: impl Into<String>) -> ClauseSyntaxError {
        ClauseSyntaxError {
            span: self.span(),
            message: message.into(),
        }
    }

    fn expect(&mut self, token: Token, what: &str) -> Result<(), ClauseSyntaxError> {
        if self.eat(&token) {
            Ok(())
        } else {
            Err(self.error(format!("expected {what}")))
        }
    }

    fn ident(&mut self) -> Result<Ident, ClauseSyntaxError> {
        match self.tokens.get(self.pos) {
            Some((Token::Ident, s)) => {
                let id = Ident::new(self.text(*s), to_span(*s));
                self.advance();
                Ok(id)
            }
            _ => Err(self.error("expected a name")),
        }
    }

    fn finish(&self) -> Result<(), ClauseSyntaxError> {
        match self.tokens.get(self.pos) {
            None => Ok(()),
            Some((_, s)) => Err(ClauseSyntaxError {
                span: (s.start..self.end).into(),
                message: format!(
                    "unexpected '{}' in directive clauses",
                    self.source[s.start..self.end].trim_end()
                ),
            }),
        }
    }

    // ── Expressions ──

    /// Parse an expression running up to a `)` at nesting depth zero or to
    /// one of `stops`.
    fn expr_until(&mut self, stops: &[Token]) -> Result<Expr, ClauseSyntaxError> {
        let mut depth = 0usize;
        let mut j = self.pos;
        while let Some((tok, _)) = self.tokens.get(j) {
            match tok {
                Token::LParen => depth += 1,
                Token::RParen if depth == 0 => break,
                Token::RParen => depth -= 1,
                t if depth == 0 && stops.contains(t) => break,
                _ => {}
            }
            j += 1;
        }
        if j == self.pos {
            return Err(self.error("expected an expression"));
        }
        let eoi = match self.tokens.get(j) {
            Some((_, s)) => s.start,
            None => self.end,
        };
        let slice = self.tokens[self.pos..j].to_vec();
        let first = to_span(self.tokens[self.pos].1);
        match parser::parse_expr_tokens(self.source, slice, eoi) {
            Ok(expr) => {
                self.pos = j;
                Ok(expr)
            }
            Err(errors) => Err(match errors.into_iter().next() {
                Some(e) => ClauseSyntaxError {
                    span: *e.span(),
                    message: format!("invalid expression: {e}"),
                },
                None => ClauseSyntaxError {
                    span: first,
                    message: "invalid expression".to_string(),
                },
            }),
        }
    }

    fn paren_expr(&mut self) -> Result<Expr, ClauseSyntaxError> {
        self.expect(Token::LParen, "'('")?;
        let e = self.expr_until(&[])?;
        self.expect(Token::RParen, "')'")?;
        Ok(e)
    }

    /// `(word)` where the word is one of a closed set.
    fn paren_choice<T: Copy>(
        &mut self,
        choices: &[(&str, T)],
        what: &str,
    ) -> Result<T, ClauseSyntaxError> {
        self.expect(Token::LParen, "'('")?;
        let value = self.choice(choices, what)?;
        self.expect(Token::RParen, "')'")?;
        Ok(value)
    }

    fn choice<T: Copy>(&mut self, choices: &[(&str, T)], what: &str) -> Result<T, ClauseSyntaxError> {
        let found = self
            .word()
            .and_then(|w| choices.iter().find(|(name, _)| *name == w).map(|(_, v)| *v));
        match found {
            Some(v) => {
                self.advance();
                Ok(v)
            }
            None => Err(self.error(format!("expected {what}"))),
        }
    }

    // ── Lists ──

    /// Comma-separated list items up to (not including) `)` or `:`.
    /// `/name/` items are accepted when `common` is set; `name(section)`
    /// items when `section` is set.
    fn list(&mut self, common: bool, section: bool) -> Result<Vec<NamelistEntry>, ClauseSyntaxError> {
        let mut entries = Vec::new();
        loop {
            let entry = if common && self.eat(&Token::Slash) {
                let name = self.ident()?;
                self.expect(Token::Slash, "'/' after common block name")?;
                let mut entry = NamelistEntry::new(name);
                entry.common = true;
                entry
            } else if section
                && self.peek() == Some(&Token::Ident)
                && self.tokens.get(self.pos + 1).map(|(t, _)| t) == Some(&Token::LParen)
            {
                let name = Ident::new(self.text(self.tokens[self.pos].1), to_span(self.tokens[self.pos].1));
                let expr = self.expr_until(&[Token::Comma, Token::Colon])?;
                let mut entry = NamelistEntry::new(name);
                entry.span = expr.span;
                entry.section = Some(expr);
                entry
            } else {
                NamelistEntry::new(self.ident()?)
            };
            entries.push(entry);

            if self.eat(&Token::Comma) {
                continue;
            }
            match self.peek() {
                Some(Token::RParen) | Some(Token::Colon) => break,
                _ => return Err(self.error("syntax error in variable list")),
            }
        }
        Ok(entries)
    }

    fn list_clause(&mut self, cs: &mut ClauseSet, class: ListClass) -> Result<(), ClauseSyntaxError> {
        self.expect(Token::LParen, "'('")?;
        for entry in self.list(class.allows_common(), class.is_acc_data())? {
            cs.push(class, entry);
        }
        self.expect(Token::RParen, "')'")
    }

    /// `(list [: expr])`; each entry gets its own copy of the tail
    /// expression, or `default` when there is none.
    fn list_with_tail(
        &mut self,
        cs: &mut ClauseSet,
        class: ListClass,
        default: Option<Expr>,
    ) -> Result<(), ClauseSyntaxError> {
        self.expect(Token::LParen, "'('")?;
        let mut entries = self.list(false, false)?;
        let tail = if self.eat(&Token::Colon) {
            Some(self.expr_until(&[])?)
        } else {
            default
        };
        self.expect(Token::RParen, "')'")?;
        for entry in &mut entries {
            entry.expr = tail.clone();
        }
        for entry in entries {
            cs.push(class, entry);
        }
        Ok(())
    }

    fn reduction(&mut self, cs: &mut ClauseSet) -> Result<(), ClauseSyntaxError> {
        self.expect(Token::LParen, "'('")?;
        let op = match self.peek() {
            Some(Token::Plus) => Some(ReductionOp::Add),
            Some(Token::Star) => Some(ReductionOp::Mul),
            Some(Token::Minus) => Some(ReductionOp::Sub),
            Some(Token::And) => Some(ReductionOp::And),
            Some(Token::Or) => Some(ReductionOp::Or),
            Some(Token::Eqv) => Some(ReductionOp::Eqv),
            Some(Token::Neqv) => Some(ReductionOp::Neqv),
            _ => self.word().and_then(|w| ReductionOp::from_intrinsic_name(&w)),
        };
        let Some(op) = op else {
            return Err(self.error("unknown reduction operator"));
        };
        self.advance();
        self.expect(Token::Colon, "':' after reduction operator")?;
        for entry in self.list(false, false)? {
            cs.push(ListClass::Reduction(op), entry);
        }
        self.expect(Token::RParen, "')'")
    }

    fn depend(&mut self, cs: &mut ClauseSet) -> Result<(), ClauseSyntaxError> {
        self.expect(Token::LParen, "'('")?;
        let class = self.choice(
            &[
                ("in", ListClass::DependIn),
                ("out", ListClass::DependOut),
                ("inout", ListClass::DependInout),
            ],
            "'in', 'out' or 'inout'",
        )?;
        self.expect(Token::Colon, "':' after dependence type")?;
        for entry in self.list(false, true)? {
            cs.push(class, entry);
        }
        self.expect(Token::RParen, "')'")
    }

    fn schedule(&mut self, cs: &mut ClauseSet) -> Result<(), ClauseSyntaxError> {
        self.expect(Token::LParen, "'('")?;
        let kind = self.choice(
            &[
                ("static", ScheduleKind::Static),
                ("dynamic", ScheduleKind::Dynamic),
                ("guided", ScheduleKind::Guided),
                ("runtime", ScheduleKind::Runtime),
                ("auto", ScheduleKind::Auto),
            ],
            "a schedule kind",
        )?;
        if self.peek() == Some(&Token::Comma) {
            if !kind.accepts_chunk() {
                return Err(self.error("this schedule kind takes no chunk size"));
            }
            self.advance();
            cs.chunk_size = Some(self.expr_until(&[])?);
        }
        cs.schedule = Some(kind);
        self.expect(Token::RParen, "')'")
    }

    // ── Clause loop ──

    fn clauses(
        &mut self,
        mask: ClauseMask,
        options: ClauseParseOptions,
    ) -> Result<ClauseSet, ClauseSyntaxError> {
        let mut cs = ClauseSet::new();
        let mut first = options.first;
        let mut needs_space = options.needs_space;
        loop {
            let before = self.pos;
            let comma = !first && self.eat(&Token::Comma);
            if !comma && needs_space && !self.space_before() {
                break;
            }
            if self.at_end() {
                break;
            }
            match self.clause(&mut cs, mask)? {
                Some(flag) => {
                    first = false;
                    needs_space = flag;
                }
                None => {
                    self.pos = before;
                    break;
                }
            }
        }
        Ok(cs)
    }

    /// Try one clause at the current position. Returns `Some(is_flag)` on a
    /// match; flag clauses need a separator before the next clause.
    fn clause(&mut self, cs: &mut ClauseSet, mask: ClauseMask) -> Result<Option<bool>, ClauseSyntaxError> {
        let Some(word) = self.word() else {
            return Ok(None);
        };
        let has = |c: Clause| mask.contains(c);
        let save = self.pos;
        self.advance();
        let matched = match word.as_str() {
            "if" if has(Clause::If) && cs.if_expr.is_none() => {
                cs.if_expr = Some(self.paren_expr()?);
                Some(false)
            }
            "final" if has(Clause::Final) && cs.final_expr.is_none() => {
                cs.final_expr = Some(self.paren_expr()?);
                Some(false)
            }
            "num_threads" if has(Clause::NumThreads) && cs.num_threads.is_none() => {
                cs.num_threads = Some(self.paren_expr()?);
                Some(false)
            }
            "schedule" if has(Clause::Schedule) && cs.schedule.is_none() => {
                self.schedule(cs)?;
                Some(false)
            }
            "default" if has(Clause::Default) && cs.default_sharing.is_none() => {
                cs.default_sharing = Some(self.paren_choice(
                    &[
                        ("shared", DefaultSharing::Shared),
                        ("private", DefaultSharing::Private),
                        ("firstprivate", DefaultSharing::Firstprivate),
                        ("none", DefaultSharing::None),
                    ],
                    "'shared', 'private', 'firstprivate' or 'none'",
                )?);
                Some(false)
            }
            "proc_bind" if has(Clause::ProcBind) && cs.proc_bind.is_none() => {
                cs.proc_bind = Some(self.paren_choice(
                    &[
                        ("master", ProcBind::Master),
                        ("spread", ProcBind::Spread),
                        ("close", ProcBind::Close),
                    ],
                    "'master', 'spread' or 'close'",
                )?);
                Some(false)
            }
            "collapse" if has(Clause::Collapse) && cs.collapse_expr.is_none() => {
                cs.collapse_expr = Some(self.paren_expr()?);
                Some(false)
            }
            "safelen" if has(Clause::Safelen) && cs.safelen.is_none() => {
                cs.safelen = Some(self.paren_expr()?);
                Some(false)
            }
            "simdlen" if has(Clause::Simdlen) && cs.simdlen.is_none() => {
                cs.simdlen = Some(self.paren_expr()?);
                Some(false)
            }
            "num_gangs" if has(Clause::NumGangs) && cs.num_gangs.is_none() => {
                cs.num_gangs = Some(self.paren_expr()?);
                Some(false)
            }
            "num_workers" if has(Clause::NumWorkers) && cs.num_workers.is_none() => {
                cs.num_workers = Some(self.paren_expr()?);
                Some(false)
            }
            "vector_length" if has(Clause::VectorLength) && cs.vector_length.is_none() => {
                cs.vector_length = Some(self.paren_expr()?);
                Some(false)
            }

            "private" if has(Clause::Private) => {
                self.list_clause(cs, ListClass::Private)?;
                Some(false)
            }
            "firstprivate" if has(Clause::Firstprivate) => {
                self.list_clause(cs, ListClass::Firstprivate)?;
                Some(false)
            }
            "lastprivate" if has(Clause::Lastprivate) => {
                self.list_clause(cs, ListClass::Lastprivate)?;
                Some(false)
            }
            "copyprivate" if has(Clause::Copyprivate) => {
                self.list_clause(cs, ListClass::Copyprivate)?;
                Some(false)
            }
            "shared" if has(Clause::Shared) => {
                self.list_clause(cs, ListClass::Shared)?;
                Some(false)
            }
            "copyin" if has(Clause::Copyin) => {
                self.list_clause(cs, ListClass::Copyin)?;
                Some(false)
            }
            "copyin" if has(Clause::AccCopyin) => {
                self.list_clause(cs, ListClass::AccCopyin)?;
                Some(false)
            }
            "uniform" if has(Clause::Uniform) => {
                self.list_clause(cs, ListClass::Uniform)?;
                Some(false)
            }
            "aligned" if has(Clause::Aligned) => {
                self.list_with_tail(cs, ListClass::Aligned, None)?;
                Some(false)
            }
            "linear" if has(Clause::Linear) => {
                let step = Expr::int(1, self.span());
                self.list_with_tail(cs, ListClass::Linear, Some(step))?;
                Some(false)
            }
            "depend" if has(Clause::Depend) => {
                self.depend(cs)?;
                Some(false)
            }
            "reduction" if has(Clause::Reduction) => {
                self.reduction(cs)?;
                Some(false)
            }
            "copy" if has(Clause::Copy) => {
                self.list_clause(cs, ListClass::AccCopy)?;
                Some(false)
            }
            "copyout" if has(Clause::Copyout) => {
                self.list_clause(cs, ListClass::AccCopyout)?;
                Some(false)
            }
            "create" if has(Clause::Create) => {
                self.list_clause(cs, ListClass::AccCreate)?;
                Some(false)
            }
            "present" if has(Clause::Present) => {
                self.list_clause(cs, ListClass::AccPresent)?;
                Some(false)
            }

            "ordered" if has(Clause::Ordered) && !cs.ordered => {
                cs.ordered = true;
                Some(true)
            }
            "untied" if has(Clause::Untied) && !cs.untied => {
                cs.untied = true;
                Some(true)
            }
            "mergeable" if has(Clause::Mergeable) && !cs.mergeable => {
                cs.mergeable = true;
                Some(true)
            }
            "inbranch" if has(Clause::Inbranch) && !cs.inbranch => {
                cs.inbranch = true;
                Some(true)
            }
            "notinbranch" if has(Clause::Notinbranch) && !cs.notinbranch => {
                cs.notinbranch = true;
                Some(true)
            }
            "nowait" if has(Clause::Nowait) && !cs.nowait => {
                cs.nowait = true;
                Some(true)
            }
            "independent" if has(Clause::Independent) && !cs.acc.independent => {
                cs.acc.independent = true;
                Some(true)
            }
            "seq" if has(Clause::Seq) && !cs.acc.seq => {
                cs.acc.seq = true;
                Some(true)
            }
            "auto" if has(Clause::Auto) && !cs.acc.auto => {
                cs.acc.auto = true;
                Some(true)
            }
            "gang" if has(Clause::Gang) && !cs.acc.gang => {
                cs.acc.gang = true;
                Some(true)
            }
            "worker" if has(Clause::Worker) && !cs.acc.worker => {
                cs.acc.worker = true;
                Some(true)
            }
            "vector" if has(Clause::Vector) && !cs.acc.vector => {
                cs.acc.vector = true;
                Some(true)
            }
            _ => None,
        };
        if matched.is_none() {
            self.pos = save;
        }
        Ok(matched)
    }

    // ── Special directive forms ──

    /// `[seq_cst[,]] [read|write|update|capture] [[,] seq_cst]`
    fn atomic_header(&mut self) -> Result<AtomicHeader, ClauseSyntaxError> {
        let mut seq_cst = false;
        if self.eat_word("seq_cst") {
            seq_cst = true;
            self.eat(&Token::Comma);
        }
        let op = match self.word().as_deref() {
            Some("read") => Some(AtomicOp::Read),
            Some("write") => Some(AtomicOp::Write),
            Some("update") => Some(AtomicOp::Update),
            Some("capture") => Some(AtomicOp::Capture),
            _ => None,
        };
        if op.is_some() {
            self.advance();
        }
        if !seq_cst {
            let comma = self.eat(&Token::Comma);
            if self.eat_word("seq_cst") {
                seq_cst = true;
            } else if comma {
                return Err(self.error("expected 'seq_cst'"));
            }
        }
        Ok(AtomicHeader {
            op: op.unwrap_or(AtomicOp::Update),
            seq_cst,
        })
    }

    /// `[(name)]`
    fn optional_name(&mut self) -> Result<Option<Ident>, ClauseSyntaxError> {
        if !self.eat(&Token::LParen) {
            return Ok(None);
        }
        let name = self.ident()?;
        self.expect(Token::RParen, "')'")?;
        Ok(Some(name))
    }

    fn cancel_kind(&mut self) -> Result<CancelKind, ClauseSyntaxError> {
        self.choice(
            &[
                ("parallel", CancelKind::Parallel),
                ("sections", CancelKind::Sections),
                ("do", CancelKind::Do),
                ("taskgroup", CancelKind::Taskgroup),
            ],
            "'parallel', 'sections', 'do' or 'taskgroup'",
        )
    }
}
