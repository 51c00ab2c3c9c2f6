// diag.rs — Unified diagnostics model
//
// Provides the shared diagnostic types used across all compiler phases,
// the stable code table, and the serialisable record used by
// `--diag-format json`.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

use serde::Serialize;

use crate::ast::Span;

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E0001`, `W0300`).
///
/// Codes are `&'static str` constants defined in the `codes` module.
/// Once assigned, a code must never be reassigned to a different semantic
/// meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub mod codes {
    use super::DiagCode;

    // Syntax
    pub const E0001: DiagCode = DiagCode("E0001"); // malformed source or directive

    // Declarations and statements
    pub const E0100: DiagCode = DiagCode("E0100"); // undeclared name
    pub const E0101: DiagCode = DiagCode("E0101"); // duplicate declaration
    pub const E0102: DiagCode = DiagCode("E0102"); // invalid declaration
    pub const E0103: DiagCode = DiagCode("E0103"); // expression type mismatch
    pub const E0104: DiagCode = DiagCode("E0104"); // unknown or misused procedure
    pub const E0105: DiagCode = DiagCode("E0105"); // unknown common block
    pub const E0106: DiagCode = DiagCode("E0106"); // threadprivate on a common member
    pub const E0107: DiagCode = DiagCode("E0107"); // critical name mismatch
    pub const E0108: DiagCode = DiagCode("E0108"); // declare simd names another procedure
    pub const E0109: DiagCode = DiagCode("E0109"); // reduction operator shadowed

    // Clause validation
    pub const E0200: DiagCode = DiagCode("E0200"); // clause expression type
    pub const E0201: DiagCode = DiagCode("E0201"); // symbol on multiple clauses
    pub const E0202: DiagCode = DiagCode("E0202"); // list item is not a variable
    pub const E0203: DiagCode = DiagCode("E0203"); // attribute not allowed on clause
    pub const E0204: DiagCode = DiagCode("E0204"); // reduction operator/type mismatch
    pub const E0205: DiagCode = DiagCode("E0205"); // aligned constraint
    pub const E0206: DiagCode = DiagCode("E0206"); // depend section constraint
    pub const E0207: DiagCode = DiagCode("E0207"); // linear constraint

    // Loop directives
    pub const E0300: DiagCode = DiagCode("E0300"); // DO WHILE under a loop directive
    pub const E0301: DiagCode = DiagCode("E0301"); // iteration variable not integer
    pub const E0302: DiagCode = DiagCode("E0302"); // iteration variable threadprivate
    pub const E0303: DiagCode = DiagCode("E0303"); // iteration variable on a clause
    pub const E0304: DiagCode = DiagCode("E0304"); // non-rectangular iteration space
    pub const E0305: DiagCode = DiagCode("E0305"); // collapsed loops not perfectly nested
    pub const E0306: DiagCode = DiagCode("E0306"); // not enough loops for collapse

    // Atomic
    pub const E0400: DiagCode = DiagCode("E0400"); // atomic statement shape
    pub const E0401: DiagCode = DiagCode("E0401"); // atomic variable/expression constraint
    pub const W0400: DiagCode = DiagCode("W0400"); // reordered operands change evaluation

    // Kernels decomposition
    pub const W0500: DiagCode = DiagCode("W0500"); // loop left in a gang-single region
}

// ── Error class ──────────────────────────────────────────────────────────

/// Coarse taxonomy of diagnostics: what kind of rule was violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Malformed source or clause grammar; the directive is discarded.
    Syntax,
    /// Wrong type or rank for an expression slot.
    Type,
    /// Cross-clause, attribute, loop-nest or atomic-shape rule.
    SemanticConstraint,
    /// A region shape the decomposer could not classify.
    Structural,
}

impl ErrorClass {
    pub fn of(code: DiagCode) -> ErrorClass {
        match code.0 {
            "E0001" => ErrorClass::Syntax,
            "E0103" | "E0200" | "E0204" => ErrorClass::Type,
            c if c.starts_with("W05") => ErrorClass::Structural,
            _ => ErrorClass::SemanticConstraint,
        }
    }
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagLevel {
    Error,
    Warning,
}

// ── Related span ─────────────────────────────────────────────────────────

/// A secondary source location providing context for a diagnostic.
#[derive(Debug, Clone)]
pub struct RelatedSpan {
    pub span: Span,
    pub label: String,
}

// ── Diagnostic ───────────────────────────────────────────────────────────

/// A compiler diagnostic emitted by any phase.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: Option<DiagCode>,
    pub level: DiagLevel,
    pub span: Span,
    pub message: String,
    pub hint: Option<String>,
    pub related_spans: Vec<RelatedSpan>,
}

impl Diagnostic {
    /// Create a new diagnostic with no code, hint or related spans.
    pub fn new(level: DiagLevel, span: Span, message: impl Into<String>) -> Self {
        Self {
            code: None,
            level,
            span,
            message: message.into(),
            hint: None,
            related_spans: Vec::new(),
        }
    }

    /// Attach a stable diagnostic code.
    pub fn with_code(mut self, code: DiagCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Attach a related span.
    pub fn with_related(mut self, span: Span, label: impl Into<String>) -> Self {
        self.related_spans.push(RelatedSpan {
            span,
            label: label.into(),
        });
        self
    }

    /// Taxonomy class, derived from the code. Uncoded diagnostics are
    /// treated as syntax errors (they only come from the parser).
    pub fn class(&self) -> ErrorClass {
        self.code.map(ErrorClass::of).unwrap_or(ErrorClass::Syntax)
    }

    pub fn is_error(&self) -> bool {
        self.level == DiagLevel::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            DiagLevel::Error => "error",
            DiagLevel::Warning => "warning",
        };
        if let Some(code) = &self.code {
            write!(f, "{}[{}]: {}", level, code, self.message)?;
        } else {
            write!(f, "{}: {}", level, self.message)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}

// ── Serialisable record ──────────────────────────────────────────────────

/// Flat, serialisable view of a diagnostic for machine consumers.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticRecord<'a> {
    pub level: DiagLevel,
    pub code: Option<&'static str>,
    pub class: ErrorClass,
    pub message: &'a str,
    pub start: usize,
    pub end: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<&'a str>,
}

impl<'a> From<&'a Diagnostic> for DiagnosticRecord<'a> {
    fn from(d: &'a Diagnostic) -> Self {
        DiagnosticRecord {
            level: d.level,
            code: d.code.map(|c| c.0),
            class: d.class(),
            message: &d.message,
            start: d.span.start,
            end: d.span.end,
            hint: d.hint.as_deref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_span() -> Span {
        use chumsky::span::Span as _;
        Span::new((), 0..1)
    }

    #[test]
    fn display_without_code() {
        let d = Diagnostic::new(DiagLevel::Error, dummy_span(), "something failed");
        assert_eq!(format!("{d}"), "error: something failed");
    }

    #[test]
    fn display_with_code() {
        let d = Diagnostic::new(DiagLevel::Warning, dummy_span(), "operands reordered")
            .with_code(codes::W0400);
        assert_eq!(format!("{d}"), "warning[W0400]: operands reordered");
    }

    #[test]
    fn builder_chain() {
        let d = Diagnostic::new(DiagLevel::Error, dummy_span(), "symbol 'x' present on multiple clauses")
            .with_code(codes::E0201)
            .with_hint("remove one of the clauses")
            .with_related(dummy_span(), "first listed here");

        assert_eq!(d.code, Some(codes::E0201));
        assert_eq!(d.hint.as_deref(), Some("remove one of the clauses"));
        assert_eq!(d.related_spans.len(), 1);
    }

    #[test]
    fn class_follows_code() {
        let d = Diagnostic::new(DiagLevel::Error, dummy_span(), "x").with_code(codes::E0204);
        assert_eq!(d.class(), ErrorClass::Type);
        let d = Diagnostic::new(DiagLevel::Error, dummy_span(), "x").with_code(codes::E0201);
        assert_eq!(d.class(), ErrorClass::SemanticConstraint);
        let d = Diagnostic::new(DiagLevel::Warning, dummy_span(), "x").with_code(codes::W0500);
        assert_eq!(d.class(), ErrorClass::Structural);
        let d = Diagnostic::new(DiagLevel::Error, dummy_span(), "x");
        assert_eq!(d.class(), ErrorClass::Syntax);
    }

    #[test]
    fn record_serialises_to_json() {
        let d = Diagnostic::new(DiagLevel::Warning, dummy_span(), "reordered")
            .with_code(codes::W0400);
        let json = serde_json::to_string(&DiagnosticRecord::from(&d)).unwrap();
        assert_eq!(
            json,
            r#"{"level":"warning","code":"W0400","class":"semantic_constraint","message":"reordered","start":0,"end":1}"#
        );
    }
}
