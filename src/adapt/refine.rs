//! Subdivision transitions: one-to-two, one-to-four, one-to-eight.
//!
//! # Expected invariants
//! - The tet being refined is active and its 6 edges are present in the edge
//!   store.
//! - Midpoint minting is idempotent: a midpoint already created by a
//!   neighboring tet sharing the edge is reused, never re-created.
//! - Every edge created by a transition (half-edges of split edges, interior
//!   edges of the finer level) is added with lock case `Intermediate`;
//!   existing edges are never overwritten.
//! - Children register with the lineage store bound to the parent, one level
//!   below it; the parent is deactivated but keeps its data.

use crate::amr_error::AmrError;
use crate::mesh::edge::{EdgeKey, LockCase};
use crate::mesh::state::RefinementCase;
use crate::mesh::tet_store::{TetStore, edge_keys, face_keys};
use crate::mesh::{NodeConnectivity, NodeId, Tet, TetId};

/// Reference 1→2 subdivision: each child replaces one endpoint of the split
/// edge with the midpoint.
pub fn tetrahedron_bisection(vertices: Tet, edge: [NodeId; 2], mid: NodeId) -> [Tet; 2] {
    let [x, y] = edge;
    let mut near = vertices;
    let mut far = vertices;
    for v in near.iter_mut() {
        if *v == y {
            *v = mid;
        }
    }
    for v in far.iter_mut() {
        if *v == x {
            *v = mid;
        }
    }
    [near, far]
}

/// Reference 1→4 subdivision of face `(f0,f1,f2)` opposite `apex`, given the
/// face's mid-edge points `[m01, m12, m02]`. The last child is the
/// face-center tet.
pub fn tetrahedron_quadrisection(
    face: [NodeId; 3],
    apex: NodeId,
    midpoints: [NodeId; 3],
) -> [Tet; 4] {
    let [f0, f1, f2] = face;
    let [m01, m12, m02] = midpoints;
    [
        [f0, m01, m02, apex],
        [f1, m12, m01, apex],
        [f2, m02, m12, apex],
        [m01, m12, m02, apex],
    ]
}

/// Reference 1→8 octasection given midpoints in {AB,AC,AD,BC,BD,CD} order.
///
/// The first four children keep one original vertex apiece; the last four
/// split the interior octahedron around the AC–BD diagonal. The first
/// interior child (index 4) is the one registered as the subdivision's
/// center.
pub fn tetrahedron_octasection(vertices: Tet, midpoints: [NodeId; 6]) -> [Tet; 8] {
    let [a, b, c, d] = vertices;
    let [ab, ac, ad, bc, bd, cd] = midpoints;
    [
        [a, ab, ac, ad],
        [b, bc, ab, bd],
        [c, ac, bc, cd],
        [d, ad, cd, bd],
        [bc, cd, ac, bd],
        [ab, bd, ac, ad],
        [ab, bc, ac, bd],
        [ac, bd, cd, ad],
    ]
}

/// Ensures every edge of `child` exists; new ones are intermediate.
fn generate_child_edges(store: &mut TetStore, child: &Tet) {
    for key in edge_keys(child) {
        let [x, y] = key.nodes();
        store.edges.generate(x, y, LockCase::Intermediate);
    }
}

/// Splits `id` along its first marked edge (canonical {AB,AC,AD,BC,BD,CD}
/// order): one midpoint, two children, parent deactivated.
pub fn refine_one_to_two(
    store: &mut TetStore,
    nodes: &mut NodeConnectivity,
    id: TetId,
) -> Result<[TetId; 2], AmrError> {
    let tet = *store.get(id)?;
    let mut split = None;
    for key in edge_keys(&tet) {
        if store.edges.get(key)?.needs_refining {
            split = Some(key);
            break;
        }
    }
    let split = split.ok_or(AmrError::NoMarkedEdge(id))?;

    let [x, y] = split.nodes();
    let mid = nodes.add(x, y);
    store.edges.split(x, y, mid, LockCase::Intermediate);

    let children = tetrahedron_bisection(tet, [x, y], mid);
    let mut ids = [0; 2];
    for (slot, child) in ids.iter_mut().zip(children) {
        generate_child_edges(store, &child);
        *slot = store.add_child(child, RefinementCase::OneToTwo, id)?;
    }
    store.deactivate(id);
    Ok(ids)
}

/// Splits the first face of `id` whose three edges are all marked (face scan
/// order {ABC,ABD,ACD,BCD}): three midpoints, four children, the face-center
/// child registered as a center tet.
pub fn refine_one_to_four(
    store: &mut TetStore,
    nodes: &mut NodeConnectivity,
    id: TetId,
) -> Result<[TetId; 4], AmrError> {
    let tet = *store.get(id)?;
    let mut chosen = None;
    for face in face_keys(&tet) {
        let [p, q, r] = face;
        let fk = [EdgeKey::new(p, q), EdgeKey::new(q, r), EdgeKey::new(p, r)];
        let mut all_marked = true;
        for key in fk {
            if !store.edges.get(key)?.needs_refining {
                all_marked = false;
                break;
            }
        }
        if all_marked {
            chosen = Some(face);
            break;
        }
    }
    let face = chosen.ok_or(AmrError::NoMarkedFace(id))?;

    let [f0, f1, f2] = face;
    // the one vertex not on the split face
    let apex = tet
        .into_iter()
        .find(|v| !face.contains(v))
        .ok_or(AmrError::DegenerateTet { id, nodes: tet })?;

    let m01 = nodes.add(f0, f1);
    let m12 = nodes.add(f1, f2);
    let m02 = nodes.add(f0, f2);
    store.edges.split(f0, f1, m01, LockCase::Intermediate);
    store.edges.split(f1, f2, m12, LockCase::Intermediate);
    store.edges.split(f0, f2, m02, LockCase::Intermediate);

    let children = tetrahedron_quadrisection(face, apex, [m01, m12, m02]);
    let mut ids = [0; 4];
    for (slot, child) in ids.iter_mut().zip(children) {
        generate_child_edges(store, &child);
        *slot = store.add_child(child, RefinementCase::OneToFour, id)?;
    }
    store.add_center(ids[3]);
    store.deactivate(id);
    Ok(ids)
}

/// Full octasection of `id`: midpoints on all six edges, eight children,
/// parent deactivated. Works regardless of marks; the decision pass escalates
/// to this case.
pub fn refine_one_to_eight(
    store: &mut TetStore,
    nodes: &mut NodeConnectivity,
    id: TetId,
) -> Result<[TetId; 8], AmrError> {
    let tet = *store.get(id)?;
    let [a, b, c, d] = tet;

    let midpoints = [
        nodes.add(a, b),
        nodes.add(a, c),
        nodes.add(a, d),
        nodes.add(b, c),
        nodes.add(b, d),
        nodes.add(c, d),
    ];
    for (key, mid) in edge_keys(&tet).into_iter().zip(midpoints) {
        let [x, y] = key.nodes();
        store.edges.split(x, y, mid, LockCase::Intermediate);
    }

    let children = tetrahedron_octasection(tet, midpoints);
    let mut ids = [0; 8];
    for (slot, child) in ids.iter_mut().zip(children) {
        generate_child_edges(store, &child);
        *slot = store.add_child(child, RefinementCase::OneToEight, id)?;
    }
    store.add_center(ids[4]);
    store.deactivate(id);
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::edge::EdgeKey;

    fn seeded_store() -> (TetStore, NodeConnectivity) {
        let mut store = TetStore::new();
        store.add_root(0, [0, 1, 2, 3], RefinementCase::InitialGrid).unwrap();
        store.generate_edges(0).unwrap();
        (store, NodeConnectivity::new(4))
    }

    #[test]
    fn bisection_replaces_one_endpoint_per_child() {
        let children = tetrahedron_bisection([0, 1, 2, 3], [0, 1], 4);
        assert_eq!(children, [[0, 4, 2, 3], [4, 1, 2, 3]]);
    }

    #[test]
    fn one_to_two_without_marks_fails() {
        let (mut store, mut nodes) = seeded_store();
        assert_eq!(
            refine_one_to_two(&mut store, &mut nodes, 0),
            Err(AmrError::NoMarkedEdge(0))
        );
        // no partial mutation
        assert_eq!(store.len(), 1);
        assert_eq!(store.edges.len(), 6);
    }

    #[test]
    fn one_to_two_splits_marked_edge() {
        let (mut store, mut nodes) = seeded_store();
        store.edges.mark_for_refinement(EdgeKey::new(0, 1)).unwrap();
        let [near, far] = refine_one_to_two(&mut store, &mut nodes, 0).unwrap();

        assert!(!store.is_active(0));
        assert_eq!(store.get(near).unwrap(), &[0, 4, 2, 3]);
        assert_eq!(store.get(far).unwrap(), &[4, 1, 2, 3]);
        assert_eq!(store.level(near).unwrap(), 1);
        assert_eq!(store.children_of(0).unwrap(), vec![near, far]);
        // midpoint half-edges and interior edges are intermediate
        for key in [EdgeKey::new(0, 4), EdgeKey::new(1, 4), EdgeKey::new(2, 4), EdgeKey::new(3, 4)] {
            assert_eq!(store.edges.lock_case(key).unwrap(), LockCase::Intermediate);
        }
        // the split edge itself survives, still unlocked
        assert_eq!(store.edges.lock_case(EdgeKey::new(0, 1)).unwrap(), LockCase::Unlocked);
    }

    #[test]
    fn one_to_four_splits_a_fully_marked_face() {
        let (mut store, mut nodes) = seeded_store();
        for key in [EdgeKey::new(0, 1), EdgeKey::new(1, 2), EdgeKey::new(0, 2)] {
            store.edges.mark_for_refinement(key).unwrap();
        }
        let ids = refine_one_to_four(&mut store, &mut nodes, 0).unwrap();

        // face ABC split, apex 3; midpoints 01→4, 12→5, 02→6
        assert_eq!(store.get(ids[0]).unwrap(), &[0, 4, 6, 3]);
        assert_eq!(store.get(ids[1]).unwrap(), &[1, 5, 4, 3]);
        assert_eq!(store.get(ids[2]).unwrap(), &[2, 6, 5, 3]);
        assert_eq!(store.get(ids[3]).unwrap(), &[4, 5, 6, 3]);
        assert!(store.is_center(ids[3]));
        assert!(!store.is_center(ids[0]));
        assert_eq!(store.num_active(), 4);
        for id in ids {
            assert_eq!(store.level(id).unwrap(), 1);
        }
    }

    #[test]
    fn one_to_eight_mints_six_midpoints() {
        let (mut store, mut nodes) = seeded_store();
        let ids = refine_one_to_eight(&mut store, &mut nodes, 0).unwrap();

        assert_eq!(nodes.num_minted(), 6);
        assert_eq!(store.num_active(), 8);
        assert!(!store.is_active(0));
        assert_eq!(store.children_of(0).unwrap().len(), 8);
        assert!(store.is_center(ids[4]));
        // midpoints 4..=9 in {AB,AC,AD,BC,BD,CD} order
        assert_eq!(store.get(ids[0]).unwrap(), &[0, 4, 5, 6]);
        assert_eq!(store.get(ids[7]).unwrap(), &[5, 8, 9, 6]);
    }

    #[test]
    fn shared_midpoints_are_reused_across_tets() {
        let mut store = TetStore::new();
        store.add_root(0, [0, 1, 2, 3], RefinementCase::InitialGrid).unwrap();
        store.add_root(1, [1, 2, 3, 4], RefinementCase::InitialGrid).unwrap();
        store.generate_edges(0).unwrap();
        store.generate_edges(1).unwrap();
        let mut nodes = NodeConnectivity::new(5);

        refine_one_to_eight(&mut store, &mut nodes, 0).unwrap();
        let before = nodes.num_minted();
        refine_one_to_eight(&mut store, &mut nodes, 1).unwrap();

        // 6 new midpoints for tet 0; tet 1 shares face (1,2,3), so only its
        // three edges touching node 4 mint new nodes
        assert_eq!(before, 6);
        assert_eq!(nodes.num_minted(), 9);
    }
}
