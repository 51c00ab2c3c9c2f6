// omp_context.rs — Open data-sharing contexts during resolution
//
// While the body of a parallel-class construct is resolved, sequential DO
// loops inside it get their iteration variables made private to that
// construct, unless the construct already lists the variable or the loop
// is one of the collapsed loops of an enclosing loop directive.
//
// Contexts nest with the constructs. `push` hands back a token that `pop`
// consumes, so the two stay paired; `save_and_clear` detaches everything
// while a nested scope is resolved on its own.

use std::collections::HashSet;

use crate::ast::{Ident, Span};
use crate::clauses::NamelistEntry;
use crate::id::SymbolId;

#[derive(Debug, Default)]
struct OpenContext {
    /// Symbols named in any list clause of the construct.
    sharing: HashSet<SymbolId>,
    private_iterators: HashSet<SymbolId>,
    /// Private entries to append to the construct, in discovery order.
    implicit: Vec<NamelistEntry>,
}

/// Proof of a `push`, consumed by the matching `pop`.
#[must_use = "an open context must be closed with OmpState::pop"]
#[derive(Debug)]
pub struct ContextToken {
    depth: usize,
}

/// Detached state returned by `save_and_clear`.
#[must_use = "saved state must be given back to OmpState::restore"]
#[derive(Debug, Default)]
pub struct SavedState {
    contexts: Vec<OpenContext>,
    tracked: Vec<Span>,
}

#[derive(Debug, Default)]
pub struct OmpState {
    contexts: Vec<OpenContext>,
    /// Spans of the DO statements owned by the innermost loop directive.
    tracked: Vec<Span>,
}

impl OmpState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn depth(&self) -> usize {
        self.contexts.len()
    }

    pub fn push(&mut self, sharing: HashSet<SymbolId>) -> ContextToken {
        self.contexts.push(OpenContext {
            sharing,
            ..OpenContext::default()
        });
        ContextToken {
            depth: self.contexts.len(),
        }
    }

    /// Close the innermost context, returning the implicit private entries
    /// collected for it.
    pub fn pop(&mut self, token: ContextToken) -> Vec<NamelistEntry> {
        debug_assert_eq!(token.depth, self.contexts.len(), "unbalanced context pop");
        self.contexts.pop().map(|c| c.implicit).unwrap_or_default()
    }

    /// Track the loops of a loop directive. Returns the previous tracking,
    /// to be handed back to `restore_tracking`.
    pub fn track_loops(&mut self, loops: Vec<Span>) -> Vec<Span> {
        std::mem::replace(&mut self.tracked, loops)
    }

    pub fn restore_tracking(&mut self, previous: Vec<Span>) {
        self.tracked = previous;
    }

    /// Detach all contexts and tracking, as one step.
    pub fn save_and_clear(&mut self) -> SavedState {
        SavedState {
            contexts: std::mem::take(&mut self.contexts),
            tracked: std::mem::take(&mut self.tracked),
        }
    }

    pub fn restore(&mut self, saved: SavedState) {
        debug_assert!(self.contexts.is_empty(), "restore over open contexts");
        self.contexts = saved.contexts;
        self.tracked = saved.tracked;
    }

    /// A sequential DO loop at `loop_span` iterates over `symbol`. Returns
    /// true when the variable was made private to the innermost context.
    pub fn note_do_iterator(&mut self, loop_span: Span, symbol: SymbolId, var: &Ident) -> bool {
        if self.tracked.contains(&loop_span) {
            return false;
        }
        let Some(ctx) = self.contexts.last_mut() else {
            return false;
        };
        if ctx.sharing.contains(&symbol) || !ctx.private_iterators.insert(symbol) {
            return false;
        }
        let mut entry = NamelistEntry::new(var.clone());
        entry.symbol = Some(symbol);
        ctx.implicit.push(entry);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sp(n: usize) -> Span {
        (n..n + 1).into()
    }

    fn ident(name: &str) -> Ident {
        Ident::new(name, sp(0))
    }

    #[test]
    fn iterator_privatized_once() {
        let mut st = OmpState::new();
        let token = st.push(HashSet::new());
        assert!(st.note_do_iterator(sp(1), SymbolId(1), &ident("i")));
        assert!(!st.note_do_iterator(sp(2), SymbolId(1), &ident("i")));
        let implicit = st.pop(token);
        assert_eq!(implicit.len(), 1);
        assert_eq!(implicit[0].symbol, Some(SymbolId(1)));
        assert_eq!(st.depth(), 0);
    }

    #[test]
    fn listed_symbols_and_tracked_loops_are_left_alone() {
        let mut st = OmpState::new();
        let token = st.push(HashSet::from([SymbolId(1)]));
        assert!(!st.note_do_iterator(sp(1), SymbolId(1), &ident("i")));
        let previous = st.track_loops(vec![sp(5)]);
        assert!(!st.note_do_iterator(sp(5), SymbolId(2), &ident("j")));
        st.restore_tracking(previous);
        assert!(st.note_do_iterator(sp(5), SymbolId(2), &ident("j")));
        assert_eq!(st.pop(token).len(), 1);
    }

    #[test]
    fn no_context_means_no_action() {
        let mut st = OmpState::new();
        assert!(!st.note_do_iterator(sp(1), SymbolId(1), &ident("i")));
    }

    #[test]
    fn save_and_clear_round_trip() {
        let mut st = OmpState::new();
        let token = st.push(HashSet::new());
        let previous = st.track_loops(vec![sp(3)]);
        let saved = st.save_and_clear();
        assert_eq!(st.depth(), 0);
        assert!(!st.note_do_iterator(sp(1), SymbolId(1), &ident("i")));
        st.restore(saved);
        assert_eq!(st.depth(), 1);
        assert!(!st.note_do_iterator(sp(3), SymbolId(1), &ident("i")));
        st.restore_tracking(previous);
        assert!(st.pop(token).is_empty());
    }
}
