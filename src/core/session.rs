// This module provides arena-based compilation session management using the bumpalo crate.
// CompilationSession is the explicit compiler-state struct threaded through one compile pass:
// it borrows the arena that owns every interned name, label and parameter list, mints
// process-unique labels and reclamation-ids from monotonic counters, remembers which include
// paths were already lowered, and gathers compilation statistics. Because all counters live
// here rather than in globals, independent compilations never share state and a fresh
// session always starts numbering from zero. SessionStats tracks functions, scopes, labels,
// heap values, emitted deallocations and call sites, and renders a short report through its
// Display implementation. Interior mutability (Cell/RefCell) lets the code generator hold a
// shared `&'arena CompilationSession` while still bumping counters.

//! Arena-based compilation session management.
//!
//! All compilation objects that outlive a single lowering step (names, labels,
//! parameter lists, the scope tree) are tied to the session arena, which keeps
//! lifetimes uniform across the code generator.

use crate::core::label::{sanitize, Label};
use crate::core::ownership::ReclaimId;
use bumpalo::Bump;
use hashbrown::HashSet;
use std::cell::{Cell, RefCell};
use std::fmt;

/// Arena-based compilation session.
pub struct CompilationSession<'arena> {
    /// Arena allocator for compilation objects.
    arena: &'arena Bump,

    /// Next label number.
    next_label: Cell<u32>,

    /// Next reclamation-id.
    next_reclaim: Cell<u32>,

    /// String interning for names and labels.
    interned_strings: RefCell<HashSet<&'arena str>>,

    /// Include paths already lowered in this compilation.
    included: RefCell<HashSet<String>>,

    /// Session statistics.
    stats: RefCell<SessionStats>,
}

impl<'arena> CompilationSession<'arena> {
    /// Create a new compilation session with the given arena.
    pub fn new(arena: &'arena Bump) -> Self {
        Self {
            arena,
            next_label: Cell::new(0),
            next_reclaim: Cell::new(0),
            interned_strings: RefCell::new(HashSet::new()),
            included: RefCell::new(HashSet::new()),
            stats: RefCell::new(SessionStats::default()),
        }
    }

    /// Get access to the arena allocator.
    pub fn arena(&self) -> &'arena Bump {
        self.arena
    }

    /// Allocate a slice in the session arena.
    pub fn alloc_slice<T: Copy>(&self, slice: &[T]) -> &'arena [T] {
        self.arena.alloc_slice_copy(slice)
    }

    /// Intern a string in the arena.
    pub fn intern_str(&self, s: &str) -> &'arena str {
        let mut strings = self.interned_strings.borrow_mut();
        if let Some(&interned) = strings.get(s) {
            return interned;
        }

        let interned: &'arena str = self.arena.alloc_str(s);
        strings.insert(interned);
        interned
    }

    /// Mint a fresh label. The hint only makes the output easier to read.
    pub fn mint_label(&self, hint: &str) -> Label<'arena> {
        let n = self.next_label.get();
        self.next_label.set(n + 1);
        self.stats.borrow_mut().labels_minted += 1;

        let name = if hint.is_empty() {
            format!("L{n}")
        } else {
            format!("L{n}_{}", sanitize(hint))
        };
        Label::from_interned(self.intern_str(&name))
    }

    /// Mint a fresh reclamation-id for a newly produced heap value.
    pub fn mint_reclaim_id(&self) -> ReclaimId {
        let n = self.next_reclaim.get();
        self.next_reclaim.set(n + 1);
        self.stats.borrow_mut().heap_values += 1;
        ReclaimId::new(n)
    }

    /// Mark an include path as lowered. Returns `false` if it already was.
    pub fn mark_included(&self, path: &str) -> bool {
        self.included.borrow_mut().insert(path.to_string())
    }

    /// Record that a function (user or built-in) was lowered.
    pub fn record_function_compiled(&self, name: &str) {
        let mut stats = self.stats.borrow_mut();
        stats.functions_compiled += 1;
        log::debug!("function `{}` lowered", name);
    }

    /// Record a scope frame being opened.
    pub fn record_scope_opened(&self) {
        self.stats.borrow_mut().scopes_opened += 1;
    }

    /// Record an emitted deallocation.
    pub fn record_deallocation(&self) {
        self.stats.borrow_mut().deallocations_emitted += 1;
    }

    /// Record an emitted call site.
    pub fn record_call_site(&self, function_name: &str) {
        self.stats.borrow_mut().calls_emitted += 1;
        log::trace!("call site emitted: {}", function_name);
    }

    /// Get compilation statistics.
    pub fn stats(&self) -> SessionStats {
        self.stats.borrow().clone()
    }
}

/// Compilation session statistics.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SessionStats {
    /// Functions lowered, built-ins included.
    pub functions_compiled: usize,

    /// Scope frames opened.
    pub scopes_opened: usize,

    /// Labels minted.
    pub labels_minted: usize,

    /// Heap values given a reclamation-id.
    pub heap_values: usize,

    /// Deallocation sites emitted.
    pub deallocations_emitted: usize,

    /// Call sites emitted.
    pub calls_emitted: usize,
}

impl fmt::Display for SessionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Compilation Session Statistics:")?;
        writeln!(f, "  Functions compiled: {}", self.functions_compiled)?;
        writeln!(f, "  Scopes opened: {}", self.scopes_opened)?;
        writeln!(f, "  Labels minted: {}", self.labels_minted)?;
        writeln!(f, "  Heap values: {}", self.heap_values)?;
        writeln!(f, "  Deallocations emitted: {}", self.deallocations_emitted)?;
        writeln!(f, "  Call sites emitted: {}", self.calls_emitted)?;
        Ok(())
    }
}
