//! The mesh adapter: decision pass and two-phase refinement driver.
//!
//! A refinement step is split in two so the stores never hold a transient
//! mixed-level state: pass one applies plain subdivisions and defers the
//! composite ones (a child asking for more than its parent's subdivision
//! granted), pass two undoes each deferred parent's subdivision and
//! octasects it.

use std::collections::BTreeSet;

use crate::adapt::derefine::{derefine_four_to_one, derefine_two_to_one};
use crate::adapt::refine::{refine_one_to_eight, refine_one_to_four, refine_one_to_two};
use crate::amr_error::AmrError;
use crate::mesh::edge::EdgeKey;
use crate::mesh::state::RefinementCase;
use crate::mesh::tet_store::{TetStore, edge_keys};
use crate::mesh::{NodeConnectivity, NodeId, TetId};

/// Criterion value that marks an edge unconditionally.
pub const ALWAYS_REFINE: f64 = 1.0;

/// Per-PE driver owning the stores a refinement pass mutates.
#[derive(Debug, Clone)]
pub struct MeshAdapter {
    pub tet_store: TetStore,
    pub node_connectivity: NodeConnectivity,
}

impl MeshAdapter {
    /// Builds the adapter over compact connectivity (element quadruples of
    /// global node ids). Midpoints will mint ids from `node_count` upward, so
    /// pass one past the largest node id referenced by the chunk.
    pub fn init(tetinpoel: &[NodeId], node_count: NodeId) -> Result<Self, AmrError> {
        let mut adapter = Self {
            tet_store: TetStore::new(),
            node_connectivity: NodeConnectivity::new(node_count),
        };
        adapter.consume_tets(tetinpoel)?;
        Ok(adapter)
    }

    /// Appends initial-grid elements in input order and registers their
    /// edges.
    pub fn consume_tets(&mut self, tetinpoel: &[NodeId]) -> Result<(), AmrError> {
        let base = self.tet_store.len() as TetId;
        for (i, quad) in tetinpoel.chunks_exact(4).enumerate() {
            let id = base + i as TetId;
            self.tet_store
                .add_root(id, [quad[0], quad[1], quad[2], quad[3]], RefinementCase::InitialGrid)?;
            self.tet_store.generate_edges(id)?;
        }
        Ok(())
    }

    /// Marks every edge with the unconditional criterion and refines once:
    /// every active tet becomes eight children.
    pub fn uniform_refinement(&mut self) -> Result<(), AmrError> {
        for (_, edge) in self.tet_store.edges.iter_mut() {
            edge.refinement_criterion = ALWAYS_REFINE;
        }
        self.mark_refinement(ALWAYS_REFINE)?;
        self.perform_refinement()
    }

    /// The decision pass: recomputes each edge's `needs_refining` from its
    /// criterion against `threshold`, then derives a pending case per active
    /// tet from its marked edges.
    ///
    /// 1 marked edge → one-to-two. 2 or 3 marked edges confined to a single
    /// face → one-to-four, marking the face's remaining edges as well
    /// (refining beyond the request is allowed, refining less is not).
    /// Anything else → full subdivision, escalated through the tet's own
    /// case: children of a one-to-two ask for two-to-eight, children of a
    /// one-to-four for four-to-eight.
    pub fn mark_refinement(&mut self, threshold: f64) -> Result<(), AmrError> {
        for (_, edge) in self.tet_store.edges.iter_mut() {
            edge.needs_refining = edge.refinement_criterion >= threshold;
        }

        let active: Vec<TetId> = self.tet_store.active_tets().collect();
        for id in active {
            let tet = *self.tet_store.get(id)?;
            let mut marked = Vec::new();
            for key in edge_keys(&tet) {
                if self.tet_store.edges.get(key)?.needs_refining {
                    marked.push(key);
                }
            }

            let case = match marked.len() {
                0 => continue,
                1 => RefinementCase::OneToTwo,
                2 | 3 => match self.face_containing(&tet, &marked) {
                    Some(face) => {
                        // complete the face so the subdivision is conforming
                        for key in face {
                            self.tet_store.edges.mark_for_refinement(key)?;
                        }
                        RefinementCase::OneToFour
                    }
                    None => self.full_case(id)?,
                },
                _ => self.full_case(id)?,
            };
            self.tet_store.set_mark(id, case)?;
        }
        log::debug!(
            "decision pass marked {} of {} active tets",
            self.tet_store.num_marked(),
            self.tet_store.num_active()
        );
        Ok(())
    }

    /// First face (scan order {ABC,ABD,ACD,BCD}) containing every marked
    /// edge, as its three edge keys.
    fn face_containing(&self, tet: &[NodeId; 4], marked: &[EdgeKey]) -> Option<[EdgeKey; 3]> {
        for face in crate::mesh::tet_store::face_keys(tet) {
            let [p, q, r] = face;
            let fk = [EdgeKey::new(p, q), EdgeKey::new(q, r), EdgeKey::new(p, r)];
            if marked.iter().all(|key| fk.contains(key)) {
                return Some(fk);
            }
        }
        None
    }

    fn full_case(&self, id: TetId) -> Result<RefinementCase, AmrError> {
        Ok(match self.tet_store.refinement_case(id)? {
            RefinementCase::OneToTwo => RefinementCase::TwoToEight,
            RefinementCase::OneToFour => RefinementCase::FourToEight,
            _ => RefinementCase::OneToEight,
        })
    }

    /// Applies every pending decision in two passes.
    pub fn perform_refinement(&mut self) -> Result<(), AmrError> {
        // Pass 1: plain subdivisions now, composite parents deferred.
        let mut round_two = BTreeSet::new();
        let decided: Vec<(TetId, RefinementCase)> = self
            .tet_store
            .iter()
            .filter_map(|(id, _)| self.tet_store.marked_case(id).map(|case| (id, case)))
            .collect();
        for (id, case) in decided {
            match case {
                RefinementCase::OneToTwo => {
                    refine_one_to_two(&mut self.tet_store, &mut self.node_connectivity, id)?;
                }
                RefinementCase::OneToFour => {
                    refine_one_to_four(&mut self.tet_store, &mut self.node_connectivity, id)?;
                }
                RefinementCase::OneToEight => {
                    refine_one_to_eight(&mut self.tet_store, &mut self.node_connectivity, id)?;
                }
                RefinementCase::TwoToEight | RefinementCase::FourToEight => {
                    let parent = self
                        .tet_store
                        .parent_of(id)?
                        .ok_or(AmrError::CompositeWithoutParent(id))?;
                    round_two.insert(parent);
                }
                RefinementCase::InitialGrid | RefinementCase::None => {}
            }
            self.tet_store.erase_mark(id);
        }

        // Pass 2: undo each deferred parent's subdivision, then octasect it.
        for parent in round_two {
            self.tet_store.unset_marked_children(parent)?;
            let count = self.tet_store.data(parent)?.num_children();
            match count {
                2 => derefine_two_to_one(&mut self.tet_store, parent)?,
                4 => derefine_four_to_one(&mut self.tet_store, parent)?,
                _ => return Err(AmrError::CorruptChildCount { parent, count }),
            }
            refine_one_to_eight(&mut self.tet_store, &mut self.node_connectivity, parent)?;
            self.tet_store.set_refinement_case(parent, RefinementCase::OneToEight)?;
        }

        log::debug!(
            "refinement pass done: {} tets ({} active), {} edges, {} midpoints",
            self.tet_store.len(),
            self.tet_store.num_active(),
            self.tet_store.edges.len(),
            self.node_connectivity.num_minted()
        );
        Ok(())
    }

    /// Compact connectivity of the active leaves.
    pub fn active_connectivity(&self) -> Vec<NodeId> {
        self.tet_store.active_connectivity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_tet_adapter() -> MeshAdapter {
        MeshAdapter::init(&[0, 1, 2, 3], 4).unwrap()
    }

    #[test]
    fn uniform_refinement_octasects_everything() {
        let mut adapter = single_tet_adapter();
        adapter.uniform_refinement().unwrap();

        let store = &adapter.tet_store;
        assert_eq!(store.num_active(), 8);
        assert!(!store.is_active(0));
        assert_eq!(store.data(0).unwrap().num_children(), 8);
        for child in store.children_of(0).unwrap() {
            assert_eq!(store.level(child).unwrap(), 1);
        }
        assert_eq!(adapter.node_connectivity.num_minted(), 6);
    }

    #[test]
    fn single_marked_edge_becomes_one_to_two() {
        let mut adapter = single_tet_adapter();
        adapter.tet_store.edges.set_criterion(EdgeKey::new(0, 1), 0.9).unwrap();
        adapter.mark_refinement(0.5).unwrap();
        assert_eq!(adapter.tet_store.marked_case(0), Some(RefinementCase::OneToTwo));

        adapter.perform_refinement().unwrap();
        assert_eq!(adapter.tet_store.num_active(), 2);
        assert_eq!(adapter.tet_store.num_marked(), 0);
    }

    #[test]
    fn two_marked_edges_on_a_face_become_one_to_four() {
        let mut adapter = single_tet_adapter();
        // edges AB and BC lie on face ABC; AC gets completed by the pass
        adapter.tet_store.edges.set_criterion(EdgeKey::new(0, 1), 1.0).unwrap();
        adapter.tet_store.edges.set_criterion(EdgeKey::new(1, 2), 1.0).unwrap();
        adapter.mark_refinement(0.5).unwrap();
        assert_eq!(adapter.tet_store.marked_case(0), Some(RefinementCase::OneToFour));
        assert!(adapter.tet_store.edges.get(EdgeKey::new(0, 2)).unwrap().needs_refining);

        adapter.perform_refinement().unwrap();
        assert_eq!(adapter.tet_store.num_active(), 4);
    }

    #[test]
    fn opposite_edges_escalate_to_full_subdivision() {
        let mut adapter = single_tet_adapter();
        // AB and CD share no face
        adapter.tet_store.edges.set_criterion(EdgeKey::new(0, 1), 1.0).unwrap();
        adapter.tet_store.edges.set_criterion(EdgeKey::new(2, 3), 1.0).unwrap();
        adapter.mark_refinement(0.5).unwrap();
        assert_eq!(adapter.tet_store.marked_case(0), Some(RefinementCase::OneToEight));
    }

    #[test]
    fn composite_two_to_eight_resubdivides_the_parent() {
        let mut adapter = single_tet_adapter();
        adapter.tet_store.edges.mark_for_refinement(EdgeKey::new(0, 1)).unwrap();
        adapter.tet_store.set_mark(0, RefinementCase::OneToTwo).unwrap();
        adapter.perform_refinement().unwrap();
        let children = adapter.tet_store.children_of(0).unwrap();
        assert_eq!(children.len(), 2);

        adapter.tet_store.set_mark(children[0], RefinementCase::TwoToEight).unwrap();
        adapter.perform_refinement().unwrap();

        let store = &adapter.tet_store;
        assert_eq!(store.num_active(), 8);
        assert_eq!(store.data(0).unwrap().num_children(), 8);
        assert_eq!(store.refinement_case(0).unwrap(), RefinementCase::OneToEight);
        assert!(!store.exists(children[0]));
        assert!(!store.exists(children[1]));
    }

    #[test]
    fn composite_four_to_eight_resubdivides_the_parent() {
        let mut adapter = single_tet_adapter();
        for key in [EdgeKey::new(0, 1), EdgeKey::new(1, 2), EdgeKey::new(0, 2)] {
            adapter.tet_store.edges.mark_for_refinement(key).unwrap();
        }
        adapter.tet_store.set_mark(0, RefinementCase::OneToFour).unwrap();
        adapter.perform_refinement().unwrap();
        let children = adapter.tet_store.children_of(0).unwrap();
        assert_eq!(children.len(), 4);

        adapter.tet_store.set_mark(children[1], RefinementCase::FourToEight).unwrap();
        adapter.perform_refinement().unwrap();

        assert_eq!(adapter.tet_store.data(0).unwrap().num_children(), 8);
        assert_eq!(adapter.tet_store.num_active(), 8);
    }
}
