//! Edges of the refinement hierarchy: canonical keys and the edge store.
//!
//! An edge is identified by the unordered pair of its endpoint node ids.
//! [`EdgeKey`] canonicalizes the pair as `(min, max)` so that
//! `key(A,B) == key(B,A)` holds by construction, and hashes the pair through
//! one combining step rather than hashing a formatted string of the two ids.
//!
//! The store tolerates duplicate insertion: several adjacent tets discover the
//! same edge independently, and the first write wins. Everything else about an
//! edge (lock case, refine/derefine flags, criterion) is mutated through the
//! accessors below.

use std::fmt;
use std::hash::{Hash, Hasher};

use hashbrown::HashMap;

use crate::amr_error::AmrError;
use crate::mesh::NodeId;

/// Canonical unordered node pair identifying one edge.
///
/// Construction sorts the endpoints, so the key of an edge is the same no
/// matter from which tet (or in which orientation) the edge was discovered.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct EdgeKey {
    a: NodeId,
    b: NodeId,
}

impl EdgeKey {
    /// Builds the canonical key for the edge between `x` and `y`.
    #[inline]
    pub fn new(x: NodeId, y: NodeId) -> Self {
        if x <= y { Self { a: x, b: y } } else { Self { a: y, b: x } }
    }

    /// Smaller endpoint.
    #[inline]
    pub const fn a(self) -> NodeId {
        self.a
    }

    /// Larger endpoint.
    #[inline]
    pub const fn b(self) -> NodeId {
        self.b
    }

    /// Both endpoints, ascending.
    #[inline]
    pub const fn nodes(self) -> [NodeId; 2] {
        [self.a, self.b]
    }

    /// True if `node` is one of the two endpoints.
    #[inline]
    pub fn touches(self, node: NodeId) -> bool {
        self.a == node || self.b == node
    }
}

impl Hash for EdgeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Combine both endpoints into one word before feeding the hasher; the
        // multiplier is the 64-bit golden-ratio mixing constant.
        state.write_u64(self.a.wrapping_mul(0x9E37_79B9_7F4A_7C15) ^ self.b);
    }
}

impl fmt::Debug for EdgeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EdgeKey").field(&self.a).field(&self.b).finish()
    }
}

impl fmt::Display for EdgeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.a, self.b)
    }
}

/// Per-edge lock tag controlling participation in further refinement.
///
/// `Intermediate` marks edges that exist purely to support a finer level
/// (half-edges of a split edge, interior edges of a subdivision); they are the
/// ones swept away when the subdivision is collapsed again.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum LockCase {
    Unlocked,
    Locked,
    Intermediate,
    Temporary,
}

/// Refinement bookkeeping carried by every edge.
#[derive(Copy, Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Edge {
    pub needs_refining: bool,
    pub needs_derefining: bool,
    /// Opaque scalar supplied by the error estimator; compared against a
    /// threshold in the decision pass.
    pub refinement_criterion: f64,
    pub lock_case: LockCase,
}

impl Edge {
    /// Fresh edge with cleared flags and zero criterion.
    pub fn new(lock_case: LockCase) -> Self {
        Self {
            needs_refining: false,
            needs_derefining: false,
            refinement_criterion: 0.0,
            lock_case,
        }
    }
}

impl Default for Edge {
    fn default() -> Self {
        Self::new(LockCase::Unlocked)
    }
}

/// Owner of all edges of one PE's mesh chunk.
#[derive(Debug, Default, Clone)]
pub struct EdgeStore {
    edges: HashMap<EdgeKey, Edge>,
}

impl EdgeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `edge` under `key` unless the key is already present.
    ///
    /// Duplicate insertion is not an error: neighboring tets add their shared
    /// edges independently and the first write wins.
    pub fn add(&mut self, key: EdgeKey, edge: Edge) {
        self.edges.entry(key).or_insert(edge);
    }

    /// Creates the edge between `x` and `y` with the given lock case and
    /// returns its key. Existing edges are left untouched.
    pub fn generate(&mut self, x: NodeId, y: NodeId, lock_case: LockCase) -> EdgeKey {
        let key = EdgeKey::new(x, y);
        self.add(key, Edge::new(lock_case));
        key
    }

    /// Splits edge `(x,y)` at `mid`: creates the half-edges `(x,mid)` and
    /// `(mid,y)`. The split edge itself stays in the store.
    pub fn split(&mut self, x: NodeId, y: NodeId, mid: NodeId, lock_case: LockCase) {
        self.generate(x, mid, lock_case);
        self.generate(mid, y, lock_case);
    }

    pub fn exists(&self, key: EdgeKey) -> bool {
        self.edges.contains_key(&key)
    }

    pub fn get(&self, key: EdgeKey) -> Result<&Edge, AmrError> {
        self.edges.get(&key).ok_or(AmrError::UnknownEdge(key))
    }

    pub fn get_mut(&mut self, key: EdgeKey) -> Result<&mut Edge, AmrError> {
        self.edges.get_mut(&key).ok_or(AmrError::UnknownEdge(key))
    }

    pub fn lock_case(&self, key: EdgeKey) -> Result<LockCase, AmrError> {
        Ok(self.get(key)?.lock_case)
    }

    /// Removes the edge; returns the stored value if it was present.
    ///
    /// Erasing an already-erased edge is tolerated (derefinement sweeps meet
    /// the same shared edge once per adjacent child).
    pub fn erase(&mut self, key: EdgeKey) -> Option<Edge> {
        self.edges.remove(&key)
    }

    pub fn mark_for_refinement(&mut self, key: EdgeKey) -> Result<(), AmrError> {
        self.get_mut(key)?.needs_refining = true;
        Ok(())
    }

    pub fn unmark_for_refinement(&mut self, key: EdgeKey) -> Result<(), AmrError> {
        self.get_mut(key)?.needs_refining = false;
        Ok(())
    }

    pub fn mark_for_derefinement(&mut self, key: EdgeKey) -> Result<(), AmrError> {
        self.get_mut(key)?.needs_derefining = true;
        Ok(())
    }

    pub fn set_criterion(&mut self, key: EdgeKey, value: f64) -> Result<(), AmrError> {
        self.get_mut(key)?.refinement_criterion = value;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&EdgeKey, &Edge)> {
        self.edges.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&EdgeKey, &mut Edge)> {
        self.edges.iter_mut()
    }

    pub fn keys(&self) -> impl Iterator<Item = &EdgeKey> {
        self.edges.keys()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_symmetric() {
        assert_eq!(EdgeKey::new(3, 11), EdgeKey::new(11, 3));
        assert_eq!(EdgeKey::new(0, 1).nodes(), [0, 1]);
        assert_eq!(EdgeKey::new(1, 0).nodes(), [0, 1]);
    }

    #[test]
    fn key_orders_by_endpoints() {
        assert!(EdgeKey::new(0, 1) < EdgeKey::new(0, 2));
        assert!(EdgeKey::new(0, 9) < EdgeKey::new(1, 2));
    }

    #[test]
    fn duplicate_add_keeps_first() {
        let mut store = EdgeStore::new();
        let key = store.generate(4, 2, LockCase::Intermediate);
        store.generate(2, 4, LockCase::Unlocked);
        assert_eq!(store.len(), 1);
        assert_eq!(store.lock_case(key).unwrap(), LockCase::Intermediate);
    }

    #[test]
    fn split_creates_half_edges() {
        let mut store = EdgeStore::new();
        store.generate(0, 1, LockCase::Unlocked);
        store.split(0, 1, 7, LockCase::Intermediate);
        assert_eq!(store.len(), 3);
        assert!(store.exists(EdgeKey::new(0, 7)));
        assert!(store.exists(EdgeKey::new(7, 1)));
        // the split edge itself survives
        assert_eq!(store.lock_case(EdgeKey::new(0, 1)).unwrap(), LockCase::Unlocked);
    }

    #[test]
    fn refine_and_derefine_flags_toggle_independently() {
        let mut store = EdgeStore::new();
        let key = store.generate(0, 1, LockCase::Unlocked);
        store.mark_for_refinement(key).unwrap();
        store.mark_for_derefinement(key).unwrap();
        let edge = store.get(key).unwrap();
        assert!(edge.needs_refining);
        assert!(edge.needs_derefining);
        store.unmark_for_refinement(key).unwrap();
        let edge = store.get(key).unwrap();
        assert!(!edge.needs_refining);
        assert!(edge.needs_derefining);
    }

    #[test]
    fn mark_missing_edge_fails() {
        let mut store = EdgeStore::new();
        let key = EdgeKey::new(5, 6);
        assert_eq!(store.mark_for_refinement(key), Err(AmrError::UnknownEdge(key)));
    }

    #[test]
    fn erase_is_tolerant() {
        let mut store = EdgeStore::new();
        let key = store.generate(1, 2, LockCase::Unlocked);
        assert!(store.erase(key).is_some());
        assert!(store.erase(key).is_none());
    }
}

#[cfg(test)]
mod serde_tests {
    use super::*;

    #[test]
    fn json_roundtrip() {
        let key = EdgeKey::new(9, 4);
        let s = serde_json::to_string(&key).unwrap();
        let back: EdgeKey = serde_json::from_str(&s).unwrap();
        assert_eq!(back, key);
    }

    #[test]
    fn bincode_roundtrip() {
        let edge = Edge {
            needs_refining: true,
            needs_derefining: false,
            refinement_criterion: 0.75,
            lock_case: LockCase::Temporary,
        };
        let bytes = bincode::serialize(&edge).unwrap();
        let back: Edge = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, edge);
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn key_symmetry_holds(x in 0u64..10_000, y in 0u64..10_000) {
            prop_assert_eq!(EdgeKey::new(x, y), EdgeKey::new(y, x));
        }

        #[test]
        fn key_endpoints_are_sorted(x in 0u64..10_000, y in 0u64..10_000) {
            let key = EdgeKey::new(x, y);
            prop_assert!(key.a() <= key.b());
        }
    }
}
