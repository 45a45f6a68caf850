//! Collapse transitions: two-to-one, four-to-one, eight-to-one.
//!
//! A collapse erases a parent's children, reactivates the parent, and sweeps
//! away the edges that existed only to support the finer level. The three
//! mixed collapses (4→2, 8→2, 8→4) have no defined subdivision semantics and
//! fail fast instead of guessing.

use crate::amr_error::AmrError;
use crate::mesh::edge::LockCase;
use crate::mesh::tet_store::TetStore;
use crate::mesh::TetId;

/// Elements of the initial grid cannot be collapsed further.
pub const MIN_REFINEMENT_LEVEL: u32 = 0;

/// Whether `id` may be derefined: false once it sits at the minimum level.
pub fn check_allowed_derefinement(store: &TetStore, id: TetId) -> Result<bool, AmrError> {
    Ok(store.level(id)? > MIN_REFINEMENT_LEVEL)
}

fn expect_children(store: &TetStore, parent: TetId, expected: usize) -> Result<Vec<TetId>, AmrError> {
    let children = store.children_of(parent)?;
    if children.len() != expected {
        return Err(AmrError::CorruptChildCount { parent, count: children.len() });
    }
    Ok(children)
}

/// Erases every intermediate-locked edge of `parent`'s children.
///
/// A shared edge is met once per adjacent child; erasing an already-erased
/// edge is tolerated.
fn delete_intermediates_of_children(store: &mut TetStore, parent: TetId) -> Result<(), AmrError> {
    for child in store.children_of(parent)? {
        for key in store.generate_edge_keys(child)? {
            if store.edges.exists(key) && store.edges.lock_case(key)? == LockCase::Intermediate {
                store.edges.erase(key);
            }
        }
    }
    Ok(())
}

/// Erases the children, clears the parent's child list, reactivates the
/// parent. The floor check runs on each child being collapsed; a violation
/// here means the caller forced a collapse the precondition refused.
fn generic_derefine(store: &mut TetStore, parent: TetId, children: &[TetId]) -> Result<(), AmrError> {
    for &child in children {
        if !check_allowed_derefinement(store, child)? {
            return Err(AmrError::DerefineBelowFloor { tet: child, level: store.level(child)? });
        }
    }
    for &child in children {
        store.erase(child)?;
    }
    store.data_mut(parent)?.children.clear();
    store.activate(parent);
    Ok(())
}

/// Undoes a one-to-two subdivision of `parent`.
pub fn derefine_two_to_one(store: &mut TetStore, parent: TetId) -> Result<(), AmrError> {
    let children = expect_children(store, parent, 2)?;
    delete_intermediates_of_children(store, parent)?;
    generic_derefine(store, parent, &children)
}

/// Undoes a one-to-four subdivision of `parent`.
pub fn derefine_four_to_one(store: &mut TetStore, parent: TetId) -> Result<(), AmrError> {
    let children = expect_children(store, parent, 4)?;
    delete_intermediates_of_children(store, parent)?;
    generic_derefine(store, parent, &children)
}

/// Undoes an octasection of `parent`: the intermediate sweep plus deletion of
/// every child edge absent from the parent's own six edges. Child edge lists
/// are collected before anything is erased.
pub fn derefine_eight_to_one(store: &mut TetStore, parent: TetId) -> Result<(), AmrError> {
    let children = expect_children(store, parent, 8)?;
    let mut child_edges = Vec::with_capacity(children.len());
    for &child in &children {
        child_edges.push(store.generate_edge_keys(child)?);
    }

    delete_intermediates_of_children(store, parent)?;
    generic_derefine(store, parent, &children)?;

    let parent_keys = store.generate_edge_keys(parent)?;
    for keys in child_edges {
        for key in keys {
            if !parent_keys.contains(&key) {
                store.edges.erase(key);
            }
        }
    }
    Ok(())
}

/// Not implemented: no defined subdivision semantics.
pub fn derefine_four_to_two(_store: &mut TetStore, _parent: TetId) -> Result<(), AmrError> {
    Err(AmrError::UnsupportedTransition("four_to_two"))
}

/// Not implemented: no defined subdivision semantics.
pub fn derefine_eight_to_two(_store: &mut TetStore, _parent: TetId) -> Result<(), AmrError> {
    Err(AmrError::UnsupportedTransition("eight_to_two"))
}

/// Not implemented: no defined subdivision semantics.
pub fn derefine_eight_to_four(_store: &mut TetStore, _parent: TetId) -> Result<(), AmrError> {
    Err(AmrError::UnsupportedTransition("eight_to_four"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapt::refine::{refine_one_to_eight, refine_one_to_two};
    use crate::mesh::edge::EdgeKey;
    use crate::mesh::state::RefinementCase;
    use crate::mesh::NodeConnectivity;

    fn seeded_store() -> (TetStore, NodeConnectivity) {
        let mut store = TetStore::new();
        store.add_root(0, [0, 1, 2, 3], RefinementCase::InitialGrid).unwrap();
        store.generate_edges(0).unwrap();
        (store, NodeConnectivity::new(4))
    }

    fn sorted_keys(store: &TetStore) -> Vec<EdgeKey> {
        let mut keys: Vec<_> = store.edges.keys().copied().collect();
        keys.sort();
        keys
    }

    #[test]
    fn level_zero_refuses_derefinement() {
        let (store, _) = seeded_store();
        assert!(!check_allowed_derefinement(&store, 0).unwrap());
    }

    #[test]
    fn two_to_one_round_trip_restores_edges() {
        let (mut store, mut nodes) = seeded_store();
        let original = sorted_keys(&store);

        store.edges.mark_for_refinement(EdgeKey::new(0, 1)).unwrap();
        refine_one_to_two(&mut store, &mut nodes, 0).unwrap();
        assert_eq!(store.edges.len(), 10);

        derefine_two_to_one(&mut store, 0).unwrap();
        assert!(store.is_active(0));
        assert_eq!(store.data(0).unwrap().num_children(), 0);
        assert_eq!(store.len(), 1);
        assert_eq!(sorted_keys(&store), original);
    }

    #[test]
    fn eight_to_one_round_trip_restores_edges() {
        let (mut store, mut nodes) = seeded_store();
        let original = sorted_keys(&store);

        refine_one_to_eight(&mut store, &mut nodes, 0).unwrap();
        derefine_eight_to_one(&mut store, 0).unwrap();

        assert!(store.is_active(0));
        assert_eq!(store.num_active(), 1);
        assert_eq!(store.data(0).unwrap().num_children(), 0);
        assert_eq!(sorted_keys(&store), original);
    }

    #[test]
    fn wrong_child_count_is_fatal() {
        let (mut store, mut nodes) = seeded_store();
        refine_one_to_eight(&mut store, &mut nodes, 0).unwrap();
        assert_eq!(
            derefine_two_to_one(&mut store, 0),
            Err(AmrError::CorruptChildCount { parent: 0, count: 8 })
        );
        // nothing was collapsed
        assert_eq!(store.num_active(), 8);
    }

    #[test]
    fn unsupported_transitions_fail_without_mutation() {
        let (mut store, mut nodes) = seeded_store();
        refine_one_to_eight(&mut store, &mut nodes, 0).unwrap();
        let edges_before = store.edges.len();
        let tets_before = store.len();

        assert_eq!(
            derefine_four_to_two(&mut store, 0),
            Err(AmrError::UnsupportedTransition("four_to_two"))
        );
        assert_eq!(
            derefine_eight_to_two(&mut store, 0),
            Err(AmrError::UnsupportedTransition("eight_to_two"))
        );
        assert_eq!(
            derefine_eight_to_four(&mut store, 0),
            Err(AmrError::UnsupportedTransition("eight_to_four"))
        );
        assert_eq!(store.edges.len(), edges_before);
        assert_eq!(store.len(), tets_before);
    }
}
