//! The tet store: owner of tetrahedra and the stores that describe them.
//!
//! Tets are quadruples of node ids keyed by tet id in an ordered map, so
//! whole-mesh passes run in ascending id order. The store composes the edge
//! store, the lineage store, the active set, the pending decisions, and the
//! center-tet registry, and hands out fresh ids for minted children.

use std::collections::BTreeMap;

use hashbrown::HashSet;

use crate::amr_error::AmrError;
use crate::mesh::edge::{EdgeKey, EdgeStore, LockCase};
use crate::mesh::state::{
    ActiveElementStore, MarkedRefinements, MasterElementStore, RefinementCase, RefinementState,
};
use crate::mesh::{NodeId, TetId};

/// One tetrahedron: 4 ordered node ids.
pub type Tet = [NodeId; 4];

/// The 6 canonical edge keys of a tet, in {AB, AC, AD, BC, BD, CD} order.
pub fn edge_keys(tet: &Tet) -> [EdgeKey; 6] {
    let [a, b, c, d] = *tet;
    [
        EdgeKey::new(a, b),
        EdgeKey::new(a, c),
        EdgeKey::new(a, d),
        EdgeKey::new(b, c),
        EdgeKey::new(b, d),
        EdgeKey::new(c, d),
    ]
}

/// The 4 faces of a tet as node triples, in {ABC, ABD, ACD, BCD} order.
pub fn face_keys(tet: &Tet) -> [[NodeId; 3]; 4] {
    let [a, b, c, d] = *tet;
    [[a, b, c], [a, b, d], [a, c, d], [b, c, d]]
}

#[derive(Debug, Default, Clone)]
pub struct TetStore {
    tets: BTreeMap<TetId, Tet>,
    next_id: TetId,
    /// Edges are owned here but mutated freely by the refinement algorithms.
    pub edges: EdgeStore,
    master: MasterElementStore,
    active: ActiveElementStore,
    marked: MarkedRefinements,
    centers: HashSet<TetId>,
}

impl TetStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn store_tet(&mut self, id: TetId, nodes: Tet) -> Result<(), AmrError> {
        let [a, b, c, d] = nodes;
        if a == b || a == c || a == d || b == c || b == d || c == d {
            return Err(AmrError::DegenerateTet { id, nodes });
        }
        if self.tets.contains_key(&id) {
            return Err(AmrError::DuplicateTet(id));
        }
        self.tets.insert(id, nodes);
        self.next_id = self.next_id.max(id + 1);
        Ok(())
    }

    /// Adds an element of the initial grid under an explicit id, active, at
    /// level 0.
    pub fn add_root(&mut self, id: TetId, nodes: Tet, case: RefinementCase) -> Result<(), AmrError> {
        self.store_tet(id, nodes)?;
        self.master.add_root(id, case);
        self.active.add(id);
        Ok(())
    }

    /// Adds a freshly minted child of `parent`, active, one level below it.
    /// Returns the generated id.
    pub fn add_child(
        &mut self,
        nodes: Tet,
        case: RefinementCase,
        parent: TetId,
    ) -> Result<TetId, AmrError> {
        let id = self.next_id;
        self.store_tet(id, nodes)?;
        if let Err(err) = self.master.add_child(id, case, parent) {
            self.tets.remove(&id);
            return Err(err);
        }
        self.active.add(id);
        Ok(id)
    }

    pub fn exists(&self, id: TetId) -> bool {
        self.tets.contains_key(&id)
    }

    pub fn get(&self, id: TetId) -> Result<&Tet, AmrError> {
        self.tets.get(&id).ok_or(AmrError::UnknownTet(id))
    }

    pub fn len(&self) -> usize {
        self.tets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tets.is_empty()
    }

    /// All tets, active or not, ascending by id.
    pub fn iter(&self) -> impl Iterator<Item = (TetId, &Tet)> {
        self.tets.iter().map(|(id, tet)| (*id, tet))
    }

    // --- lineage ---------------------------------------------------------

    pub fn data(&self, id: TetId) -> Result<&RefinementState, AmrError> {
        self.master.get(id)
    }

    pub fn data_mut(&mut self, id: TetId) -> Result<&mut RefinementState, AmrError> {
        self.master.get_mut(id)
    }

    pub fn refinement_case(&self, id: TetId) -> Result<RefinementCase, AmrError> {
        Ok(self.master.get(id)?.case)
    }

    pub fn set_refinement_case(&mut self, id: TetId, case: RefinementCase) -> Result<(), AmrError> {
        self.master.get_mut(id)?.case = case;
        Ok(())
    }

    pub fn level(&self, id: TetId) -> Result<u32, AmrError> {
        self.master.level_of(id)
    }

    pub fn parent_of(&self, id: TetId) -> Result<Option<TetId>, AmrError> {
        self.master.parent_of(id)
    }

    pub fn children_of(&self, id: TetId) -> Result<Vec<TetId>, AmrError> {
        Ok(self.master.get(id)?.children.clone())
    }

    // --- active set ------------------------------------------------------

    pub fn activate(&mut self, id: TetId) {
        self.active.add(id);
    }

    pub fn deactivate(&mut self, id: TetId) {
        self.active.erase(id);
    }

    pub fn is_active(&self, id: TetId) -> bool {
        self.active.contains(id)
    }

    pub fn num_active(&self) -> usize {
        self.active.len()
    }

    /// Active tet ids, ascending.
    pub fn active_tets(&self) -> impl Iterator<Item = TetId> + '_ {
        self.active.iter()
    }

    /// Flattens the active set into compact connectivity (quadruples in
    /// ascending tet-id order).
    pub fn active_connectivity(&self) -> Vec<NodeId> {
        let mut inpoel = Vec::with_capacity(4 * self.active.len());
        for id in self.active.iter() {
            if let Some(tet) = self.tets.get(&id) {
                inpoel.extend_from_slice(tet);
            }
        }
        inpoel
    }

    /// Number of distinct nodes referenced by active tets.
    pub fn active_node_count(&self) -> usize {
        let mut nodes: HashSet<NodeId> = HashSet::new();
        for id in self.active.iter() {
            if let Some(tet) = self.tets.get(&id) {
                nodes.extend(tet.iter().copied());
            }
        }
        nodes.len()
    }

    // --- erase -----------------------------------------------------------

    /// Removes the tet from the active set, the lineage store, and the tet
    /// map. Edges are deliberately left alone: an edge may be shared with
    /// siblings or tets yet to be created, so edge cleanup belongs to the
    /// refinement and derefinement algorithms, not to `erase`.
    pub fn erase(&mut self, id: TetId) -> Result<(), AmrError> {
        if !self.exists(id) {
            return Err(AmrError::UnknownTet(id));
        }
        self.active.erase(id);
        self.master.erase(id);
        self.tets.remove(&id);
        Ok(())
    }

    // --- centers ---------------------------------------------------------

    /// Registers `id` as the center child of a subdivision.
    pub fn add_center(&mut self, id: TetId) {
        self.centers.insert(id);
    }

    pub fn is_center(&self, id: TetId) -> bool {
        self.centers.contains(&id)
    }

    // --- pending decisions -----------------------------------------------

    pub fn set_mark(&mut self, id: TetId, case: RefinementCase) -> Result<(), AmrError> {
        if !self.exists(id) {
            return Err(AmrError::UnknownTet(id));
        }
        self.marked.set(id, case);
        Ok(())
    }

    pub fn marked_case(&self, id: TetId) -> Option<RefinementCase> {
        self.marked.get(id)
    }

    pub fn has_mark(&self, id: TetId) -> bool {
        self.marked.contains(id)
    }

    pub fn erase_mark(&mut self, id: TetId) -> Option<RefinementCase> {
        self.marked.erase(id)
    }

    pub fn num_marked(&self) -> usize {
        self.marked.len()
    }

    /// Clears residual decisions on the (former) children of `parent`.
    pub fn unset_marked_children(&mut self, parent: TetId) -> Result<(), AmrError> {
        for child in self.children_of(parent)? {
            self.marked.erase(child);
        }
        Ok(())
    }

    // --- edges -----------------------------------------------------------

    pub fn generate_edge_keys(&self, id: TetId) -> Result<[EdgeKey; 6], AmrError> {
        Ok(edge_keys(self.get(id)?))
    }

    pub fn generate_face_keys(&self, id: TetId) -> Result<[[NodeId; 3]; 4], AmrError> {
        Ok(face_keys(self.get(id)?))
    }

    /// Adds the 6 edges of tet `id` to the edge store as unlocked; existing
    /// edges keep their state.
    pub fn generate_edges(&mut self, id: TetId) -> Result<(), AmrError> {
        for key in self.generate_edge_keys(id)? {
            let [a, b] = key.nodes();
            self.edges.generate(a, b, LockCase::Unlocked);
        }
        Ok(())
    }
}
