//! Per-tet refinement lineage: cases, levels, parent/child links, the
//! active/inactive partition, and pending decisions.
//!
//! Lineage forms a tree held entirely by id: parents list their children as
//! ids, children point back at their parent as an id, and all records live in
//! id-keyed maps, so erasing an element can never dangle.

use hashbrown::HashMap;
use std::collections::BTreeSet;

use crate::amr_error::AmrError;
use crate::mesh::TetId;

/// How a tet came to exist, or what is about to happen to it.
///
/// `InitialGrid` marks elements of the unrefined input mesh. `TwoToEight` and
/// `FourToEight` are composite transitions: they never create children
/// directly but schedule an undo-then-octasect on the parent.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum RefinementCase {
    InitialGrid,
    OneToTwo,
    OneToFour,
    OneToEight,
    TwoToEight,
    FourToEight,
    None,
}

/// Lineage record of one tet.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RefinementState {
    pub case: RefinementCase,
    /// Distance from the initial grid; children sit one level below their
    /// parent.
    pub level: u32,
    /// `None` for initial-grid elements.
    pub parent: Option<TetId>,
    /// Ordered child ids; at most 8.
    pub children: Vec<TetId>,
}

impl RefinementState {
    pub fn new(case: RefinementCase, level: u32, parent: Option<TetId>) -> Self {
        Self { case, level, parent, children: Vec::new() }
    }

    pub fn num_children(&self) -> usize {
        self.children.len()
    }
}

/// Owner of every tet's [`RefinementState`], active or not.
#[derive(Debug, Default, Clone)]
pub struct MasterElementStore {
    states: HashMap<TetId, RefinementState>,
}

impl MasterElementStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an element with no parent at level 0.
    pub fn add_root(&mut self, id: TetId, case: RefinementCase) {
        self.states.insert(id, RefinementState::new(case, 0, None));
    }

    /// Registers `id` as a child of `parent`: level is the parent's plus one,
    /// and the child is appended to the parent's ordered child list.
    pub fn add_child(
        &mut self,
        id: TetId,
        case: RefinementCase,
        parent: TetId,
    ) -> Result<(), AmrError> {
        let parent_state = self
            .states
            .get_mut(&parent)
            .ok_or(AmrError::UnknownRefinementState(parent))?;
        if parent_state.num_children() >= 8 {
            return Err(AmrError::TooManyChildren { parent, count: parent_state.num_children() });
        }
        let level = parent_state.level + 1;
        parent_state.children.push(id);
        self.states.insert(id, RefinementState::new(case, level, Some(parent)));
        Ok(())
    }

    pub fn contains(&self, id: TetId) -> bool {
        self.states.contains_key(&id)
    }

    pub fn get(&self, id: TetId) -> Result<&RefinementState, AmrError> {
        self.states.get(&id).ok_or(AmrError::UnknownRefinementState(id))
    }

    pub fn get_mut(&mut self, id: TetId) -> Result<&mut RefinementState, AmrError> {
        self.states.get_mut(&id).ok_or(AmrError::UnknownRefinementState(id))
    }

    pub fn parent_of(&self, id: TetId) -> Result<Option<TetId>, AmrError> {
        Ok(self.get(id)?.parent)
    }

    pub fn level_of(&self, id: TetId) -> Result<u32, AmrError> {
        Ok(self.get(id)?.level)
    }

    /// Drops the record. The parent's child list is not touched here; the
    /// derefinement path clears it wholesale.
    pub fn erase(&mut self, id: TetId) -> Option<RefinementState> {
        self.states.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

/// The set of currently live leaves of the refinement tree.
///
/// Kept ordered so passes over active elements are deterministic.
#[derive(Debug, Default, Clone)]
pub struct ActiveElementStore {
    active: BTreeSet<TetId>,
}

impl ActiveElementStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, id: TetId) {
        self.active.insert(id);
    }

    pub fn erase(&mut self, id: TetId) -> bool {
        self.active.remove(&id)
    }

    pub fn contains(&self, id: TetId) -> bool {
        self.active.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Ascending tet ids.
    pub fn iter(&self) -> impl Iterator<Item = TetId> + '_ {
        self.active.iter().copied()
    }
}

/// Pending per-tet refinement decisions, produced by a decision pass and
/// erased as they are applied.
#[derive(Debug, Default, Clone)]
pub struct MarkedRefinements {
    marks: HashMap<TetId, RefinementCase>,
}

impl MarkedRefinements {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, id: TetId, case: RefinementCase) {
        self.marks.insert(id, case);
    }

    pub fn get(&self, id: TetId) -> Option<RefinementCase> {
        self.marks.get(&id).copied()
    }

    pub fn contains(&self, id: TetId) -> bool {
        self.marks.contains_key(&id)
    }

    pub fn erase(&mut self, id: TetId) -> Option<RefinementCase> {
        self.marks.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.marks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.marks.is_empty()
    }
}
