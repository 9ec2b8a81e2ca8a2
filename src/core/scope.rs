// This module implements the lexical scope tree used for symbol resolution. Scopes are
// stored in an arena vector (bumpalo) and refer to their parent by ScopeId, so the tree
// needs no reference counting and parents trivially outlive children for the duration of
// the depth-first pass. Each Scope owns a variable table, a function table, a monotonic
// stack-offset counter, a free set of pending deallocations, and optional function and
// loop markers. Lookups walk from the current scope toward the root and report the lookup
// depth (number of parent hops), which the code generator turns into that many
// saved-frame-pointer dereferences, since every scope is realised as its own stack frame.
// Loop lookups stop at function boundaries so `break` can never escape a function body.
// Offsets are handed out by bumping the counter by the declared size; a local reserved at
// offset `o` with size `s` lives at `[frame - o - s]`.

//! Scope tree, variable slots and function descriptors.

use crate::ast::Location;
use crate::core::error::{CompileError, CompileResult, SymbolKind};
use crate::core::label::Label;
use crate::core::ownership::{FreeSet, ReclaimId};
use crate::core::types::ScalarType;
use bumpalo::{collections::Vec as BumpVec, Bump};
use hashbrown::HashMap;

/// Index of a scope in the [`ScopeTree`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(usize);

/// A region of a frame: `size` bytes reserved at `offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackSlot {
    pub offset: u32,
    pub size: u32,
}

impl StackSlot {
    pub const fn new(offset: u32, size: u32) -> Self {
        Self { offset, size }
    }

    /// Displacement from the frame pointer.
    pub const fn disp(&self) -> i32 {
        -((self.offset + self.size) as i32)
    }
}

/// A declared variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VarSlot<'arena> {
    pub name: &'arena str,
    pub ty: ScalarType,
    pub size: u32,
    pub offset: u32,
    /// Companion cell holding the byte size of a heap value (0 when not owned).
    pub size_cell: Option<StackSlot>,
    /// Present once the slot owns a heap value that must be reclaimed at scope exit.
    pub reclaim: Option<ReclaimId>,
}

impl VarSlot<'_> {
    pub fn slot(&self) -> StackSlot {
        StackSlot::new(self.offset, self.size)
    }
}

/// A declared function parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamDesc<'arena> {
    pub name: &'arena str,
    pub ty: ScalarType,
}

/// Everything a call site needs to know about a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FuncDescriptor<'arena> {
    pub name: &'arena str,
    pub ret: ScalarType,
    pub ret_size: u32,
    pub params: &'arena [ParamDesc<'arena>],
    pub entry: Label<'arena>,
    pub return_label: Label<'arena>,
}

/// Marks the body scope of a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionMarker<'arena> {
    pub ret: ScalarType,
    pub return_label: Label<'arena>,
    /// Result value staged on the way to the shared return label.
    pub result: StackSlot,
    /// Byte size of a heap result.
    pub result_size: StackSlot,
}

/// Marks the body scope of a loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopMarker<'arena> {
    pub top: Label<'arena>,
    pub continue_label: Label<'arena>,
    pub exit: Label<'arena>,
}

/// Result of a scope-chain lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolved {
    pub scope: ScopeId,
    /// Parent hops between the use site and the declaring scope.
    pub depth: usize,
}

/// One lexical scope, realised at run time as one stack frame.
#[derive(Debug)]
pub struct Scope<'arena> {
    parent: Option<ScopeId>,
    variables: HashMap<&'arena str, VarSlot<'arena>>,
    functions: HashMap<&'arena str, FuncDescriptor<'arena>>,
    next_offset: u32,
    free_set: FreeSet,
    function: Option<FunctionMarker<'arena>>,
    loop_marker: Option<LoopMarker<'arena>>,
    frame_size: Label<'arena>,
}

impl<'arena> Scope<'arena> {
    fn new(parent: Option<ScopeId>, frame_size: Label<'arena>) -> Self {
        Self {
            parent,
            variables: HashMap::new(),
            functions: HashMap::new(),
            next_offset: 0,
            free_set: FreeSet::new(),
            function: None,
            loop_marker: None,
            frame_size,
        }
    }

    pub fn parent(&self) -> Option<ScopeId> {
        self.parent
    }

    /// Reserve `size` bytes in this scope's frame.
    pub fn reserve(&mut self, size: u32) -> StackSlot {
        let slot = StackSlot::new(self.next_offset, size);
        self.next_offset += size;
        slot
    }

    /// Bytes reserved so far.
    pub fn used_bytes(&self) -> u32 {
        self.next_offset
    }

    /// Frame size rounded up to whole words.
    pub fn frame_bytes(&self) -> u32 {
        self.next_offset.div_ceil(4) * 4
    }

    /// Symbol the prologue subtracts from `esp`; defined when the scope closes.
    pub fn frame_size_symbol(&self) -> Label<'arena> {
        self.frame_size
    }

    /// Declare a variable, bumping the offset counter by the type's size.
    pub fn declare_var(
        &mut self,
        name: &'arena str,
        ty: ScalarType,
        location: Location,
    ) -> CompileResult<VarSlot<'arena>> {
        if self.variables.contains_key(name) {
            return Err(CompileError::DuplicateDeclaration {
                kind: SymbolKind::Variable,
                name: name.to_string(),
                location,
            });
        }

        let slot = self.reserve(ty.size());
        let size_cell = ty.is_heap().then(|| self.reserve(4));
        let var = VarSlot {
            name,
            ty,
            size: slot.size,
            offset: slot.offset,
            size_cell,
            reclaim: None,
        };
        self.variables.insert(name, var);
        Ok(var)
    }

    pub fn declare_function(
        &mut self,
        desc: FuncDescriptor<'arena>,
        location: Location,
    ) -> CompileResult<()> {
        if self.functions.contains_key(desc.name) {
            return Err(CompileError::DuplicateDeclaration {
                kind: SymbolKind::Function,
                name: desc.name.to_string(),
                location,
            });
        }
        self.functions.insert(desc.name, desc);
        Ok(())
    }

    pub fn var(&self, name: &str) -> Option<VarSlot<'arena>> {
        self.variables.get(name).copied()
    }

    pub fn var_mut(&mut self, name: &str) -> Option<&mut VarSlot<'arena>> {
        self.variables.get_mut(name)
    }

    pub fn function(&self, name: &str) -> Option<FuncDescriptor<'arena>> {
        self.functions.get(name).copied()
    }

    /// Slots that own a heap value, in frame order.
    pub fn owning_slots(&self) -> Vec<VarSlot<'arena>> {
        let mut slots: Vec<_> = self
            .variables
            .values()
            .filter(|var| var.reclaim.is_some())
            .copied()
            .collect();
        slots.sort_by_key(|var| var.offset);
        slots
    }

    /// Whether some variable of this scope owns `id`.
    pub fn owns(&self, id: ReclaimId) -> bool {
        self.variables.values().any(|var| var.reclaim == Some(id))
    }

    pub fn free_set(&self) -> &FreeSet {
        &self.free_set
    }

    pub fn free_set_mut(&mut self) -> &mut FreeSet {
        &mut self.free_set
    }

    pub fn function_marker(&self) -> Option<FunctionMarker<'arena>> {
        self.function
    }

    pub fn set_function_marker(&mut self, marker: FunctionMarker<'arena>) {
        self.function = Some(marker);
    }

    pub fn loop_marker(&self) -> Option<LoopMarker<'arena>> {
        self.loop_marker
    }

    pub fn set_loop_marker(&mut self, marker: LoopMarker<'arena>) {
        self.loop_marker = Some(marker);
    }
}

/// Arena of scopes linked by parent index.
pub struct ScopeTree<'arena> {
    scopes: BumpVec<'arena, Scope<'arena>>,
}

impl<'arena> ScopeTree<'arena> {
    pub fn new(arena: &'arena Bump) -> Self {
        Self {
            scopes: BumpVec::new_in(arena),
        }
    }

    /// Create a scope under `parent` (or a root when `None`).
    pub fn push(&mut self, parent: Option<ScopeId>, frame_size: Label<'arena>) -> ScopeId {
        let id = ScopeId(self.scopes.len());
        self.scopes.push(Scope::new(parent, frame_size));
        id
    }

    pub fn get(&self, id: ScopeId) -> &Scope<'arena> {
        &self.scopes[id.0]
    }

    pub fn get_mut(&mut self, id: ScopeId) -> &mut Scope<'arena> {
        &mut self.scopes[id.0]
    }

    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    /// Walk from `from` toward the root, returning the first scope accepted by `found`.
    fn find(&self, from: ScopeId, mut found: impl FnMut(&Scope<'arena>) -> bool) -> Option<Resolved> {
        let mut current = Some(from);
        let mut depth = 0;
        while let Some(id) = current {
            let scope = self.get(id);
            if found(scope) {
                return Some(Resolved { scope: id, depth });
            }
            current = scope.parent;
            depth += 1;
        }
        None
    }

    pub fn lookup_var(&self, from: ScopeId, name: &str) -> Option<(Resolved, VarSlot<'arena>)> {
        let resolved = self.find(from, |scope| scope.variables.contains_key(name))?;
        let var = self.get(resolved.scope).var(name)?;
        Some((resolved, var))
    }

    pub fn lookup_function(
        &self,
        from: ScopeId,
        name: &str,
    ) -> Option<(Resolved, FuncDescriptor<'arena>)> {
        let resolved = self.find(from, |scope| scope.functions.contains_key(name))?;
        let desc = self.get(resolved.scope).function(name)?;
        Some((resolved, desc))
    }

    /// Nearest enclosing function body.
    pub fn lookup_function_marker(
        &self,
        from: ScopeId,
    ) -> Option<(Resolved, FunctionMarker<'arena>)> {
        let resolved = self.find(from, |scope| scope.function.is_some())?;
        let marker = self.get(resolved.scope).function_marker()?;
        Some((resolved, marker))
    }

    /// Nearest enclosing loop body, not crossing a function boundary.
    pub fn lookup_loop(&self, from: ScopeId) -> Option<(Resolved, LoopMarker<'arena>)> {
        let resolved = self.find(from, |scope| {
            scope.loop_marker.is_some() || scope.function.is_some()
        })?;
        let marker = self.get(resolved.scope).loop_marker()?;
        Some((resolved, marker))
    }

    /// Number of hops from `from` to the root scope.
    pub fn depth_to_root(&self, from: ScopeId) -> usize {
        self.find(from, |scope| scope.parent.is_none())
            .map_or(0, |resolved| resolved.depth)
    }

    /// `from` followed by its ancestors, `depth + 1` scopes in total.
    pub fn chain(&self, from: ScopeId, depth: usize) -> Vec<ScopeId> {
        let mut chain = Vec::with_capacity(depth + 1);
        let mut current = Some(from);
        while let Some(id) = current {
            chain.push(id);
            if chain.len() > depth {
                break;
            }
            current = self.get(id).parent;
        }
        chain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::session::CompilationSession;

    fn tree<'a>(session: &CompilationSession<'a>) -> (ScopeTree<'a>, ScopeId, ScopeId, ScopeId) {
        let mut tree = ScopeTree::new(session.arena());
        let root = tree.push(None, session.mint_label("frame"));
        let mid = tree.push(Some(root), session.mint_label("frame"));
        let leaf = tree.push(Some(mid), session.mint_label("frame"));
        (tree, root, mid, leaf)
    }

    #[test]
    fn test_lookup_reports_depth() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let (mut tree, root, mid, leaf) = tree(&session);

        let x = session.intern_str("x");
        tree.get_mut(root)
            .declare_var(x, ScalarType::Integer, Location::internal())
            .unwrap();
        tree.get_mut(mid)
            .declare_var(x, ScalarType::Boolean, Location::internal())
            .unwrap();

        let (resolved, var) = tree.lookup_var(leaf, "x").unwrap();
        assert_eq!(resolved.scope, mid);
        assert_eq!(resolved.depth, 1);
        assert_eq!(var.ty, ScalarType::Boolean);

        let (resolved, _) = tree.lookup_var(root, "x").unwrap();
        assert_eq!(resolved.depth, 0);
        assert!(tree.lookup_var(leaf, "y").is_none());
    }

    #[test]
    fn test_duplicate_declaration_in_same_scope() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let (mut tree, root, _, _) = tree(&session);

        let name = session.intern_str("a");
        let scope = tree.get_mut(root);
        scope.declare_var(name, ScalarType::Integer, Location::internal()).unwrap();
        let err = scope
            .declare_var(name, ScalarType::Integer, Location::new(2, 1))
            .unwrap_err();
        assert!(matches!(
            err,
            CompileError::DuplicateDeclaration { kind: SymbolKind::Variable, .. }
        ));
    }

    #[test]
    fn test_offsets_are_unique_and_below_counter() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let (mut tree, root, _, _) = tree(&session);

        let scope = tree.get_mut(root);
        let a = scope
            .declare_var(session.intern_str("a"), ScalarType::Integer, Location::internal())
            .unwrap();
        let b = scope
            .declare_var(session.intern_str("b"), ScalarType::Boolean, Location::internal())
            .unwrap();
        let s = scope
            .declare_var(session.intern_str("s"), ScalarType::String, Location::internal())
            .unwrap();

        assert_eq!(a.offset, 0);
        assert_eq!(b.offset, 4);
        assert_eq!(s.offset, 5);
        assert_eq!(s.size_cell, Some(StackSlot::new(9, 4)));
        for var in [a, b, s] {
            assert!(var.offset < scope.used_bytes());
        }
        assert_eq!(scope.used_bytes(), 13);
        assert_eq!(scope.frame_bytes(), 16);
        assert_eq!(a.slot().disp(), -4);
    }

    #[test]
    fn test_loop_lookup_stops_at_function_boundary() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let (mut tree, root, mid, leaf) = tree(&session);

        tree.get_mut(root).set_loop_marker(LoopMarker {
            top: session.mint_label("top"),
            continue_label: session.mint_label("cont"),
            exit: session.mint_label("exit"),
        });
        assert_eq!(tree.lookup_loop(leaf).unwrap().0.depth, 2);

        tree.get_mut(mid).set_function_marker(FunctionMarker {
            ret: ScalarType::Integer,
            return_label: session.mint_label("ret"),
            result: StackSlot::new(0, 4),
            result_size: StackSlot::new(4, 4),
        });
        assert!(tree.lookup_loop(leaf).is_none());
        assert_eq!(tree.lookup_function_marker(leaf).unwrap().0.depth, 1);
    }

    #[test]
    fn test_chain_and_root_depth() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let (tree, root, mid, leaf) = tree(&session);

        assert_eq!(tree.depth_to_root(leaf), 2);
        assert_eq!(tree.chain(leaf, 1), vec![leaf, mid]);
        assert_eq!(tree.chain(leaf, 2), vec![leaf, mid, root]);
        assert_eq!(tree.chain(leaf, 0), vec![leaf]);
    }
}
