//! Midpoint node minting and node coordinates.
//!
//! When an edge is split, the midpoint gets a fresh PE-local node id.
//! [`NodeConnectivity`] owns that mapping: it is idempotent (a midpoint
//! already minted by a neighboring tet sharing the edge is reused, never
//! re-created) and it remembers minting order, so anything derived per minted
//! node (coordinates, for one) can be rebuilt after the fact.
//!
//! Midpoint ids are only meaningful on the minting PE. Cross-PE identity for
//! midpoints travels as the parent edge's key through the reordering
//! protocol.

use hashbrown::HashMap;

use crate::amr_error::AmrError;
use crate::mesh::NodeId;
use crate::mesh::edge::EdgeKey;

/// Edge-to-midpoint map with sequential id minting.
#[derive(Debug, Clone)]
pub struct NodeConnectivity {
    start: NodeId,
    ids: HashMap<EdgeKey, NodeId>,
    /// Keys in minting order; `minted[i]` owns id `start + i`.
    minted: Vec<EdgeKey>,
}

impl NodeConnectivity {
    /// Midpoint ids are handed out from `start` upward; pass one past the
    /// largest node id of the chunk so minted ids stay fresh.
    pub fn new(start: NodeId) -> Self {
        Self { start, ids: HashMap::new(), minted: Vec::new() }
    }

    /// Returns the midpoint id for edge `(x,y)`, minting it on first use.
    pub fn add(&mut self, x: NodeId, y: NodeId) -> NodeId {
        let key = EdgeKey::new(x, y);
        *self.ids.entry(key).or_insert_with(|| {
            let id = self.start + self.minted.len() as NodeId;
            self.minted.push(key);
            id
        })
    }

    pub fn find(&self, x: NodeId, y: NodeId) -> Option<NodeId> {
        self.ids.get(&EdgeKey::new(x, y)).copied()
    }

    pub fn find_key(&self, key: EdgeKey) -> Option<NodeId> {
        self.ids.get(&key).copied()
    }

    /// The edge a minted id belongs to; `None` for ids this map never minted.
    pub fn pair_of(&self, id: NodeId) -> Option<EdgeKey> {
        let index = id.checked_sub(self.start)? as usize;
        self.minted.get(index).copied()
    }

    /// Number of midpoints minted so far.
    pub fn num_minted(&self) -> usize {
        self.minted.len()
    }

    /// First id of the minted range.
    pub fn start(&self) -> NodeId {
        self.start
    }

    /// `(id, key)` pairs in minting order.
    pub fn minted(&self) -> impl Iterator<Item = (NodeId, EdgeKey)> + '_ {
        self.minted.iter().enumerate().map(|(i, key)| (self.start + i as NodeId, *key))
    }
}

/// Node coordinate arrays, addressed by node id.
#[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
pub struct NodeStore {
    x: Vec<f64>,
    y: Vec<f64>,
    z: Vec<f64>,
}

impl NodeStore {
    pub fn new(x: Vec<f64>, y: Vec<f64>, z: Vec<f64>) -> Self {
        debug_assert!(x.len() == y.len() && y.len() == z.len());
        Self { x, y, z }
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    pub fn get(&self, id: NodeId) -> Option<[f64; 3]> {
        let i = id as usize;
        Some([*self.x.get(i)?, *self.y.get(i)?, *self.z.get(i)?])
    }

    /// Appends coordinates for every minted midpoint, in minting order, as
    /// the average of the parent edge's endpoints. Minting order guarantees
    /// both endpoints (original nodes or earlier midpoints) already have
    /// coordinates when their midpoint is reached.
    pub fn extend_midpoints(&mut self, conn: &NodeConnectivity) -> Result<(), AmrError> {
        for (id, key) in conn.minted() {
            if (id as usize) < self.len() {
                continue; // already appended by an earlier pass
            }
            if id as usize != self.len() {
                return Err(AmrError::MissingCoordinates(self.len() as NodeId));
            }
            let [a, b] = key.nodes();
            let pa = self.get(a).ok_or(AmrError::MissingCoordinates(a))?;
            let pb = self.get(b).ok_or(AmrError::MissingCoordinates(b))?;
            self.x.push(0.5 * (pa[0] + pb[0]));
            self.y.push(0.5 * (pa[1] + pb[1]));
            self.z.push(0.5 * (pa[2] + pb[2]));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minting_is_idempotent_and_sequential() {
        let mut conn = NodeConnectivity::new(4);
        let m01 = conn.add(0, 1);
        let m12 = conn.add(1, 2);
        assert_eq!((m01, m12), (4, 5));
        // same edge, either orientation, same id
        assert_eq!(conn.add(1, 0), 4);
        assert_eq!(conn.num_minted(), 2);
        assert_eq!(conn.find(2, 1), Some(5));
        assert_eq!(conn.pair_of(5), Some(EdgeKey::new(1, 2)));
        assert_eq!(conn.pair_of(6), None);
    }

    #[test]
    fn midpoint_coordinates_average_endpoints() {
        let mut store = NodeStore::new(vec![0.0, 2.0], vec![0.0, 4.0], vec![0.0, 0.0]);
        let mut conn = NodeConnectivity::new(2);
        conn.add(0, 1);
        // a chained midpoint: edge (1, m01)
        conn.add(1, 2);
        store.extend_midpoints(&conn).unwrap();
        assert_eq!(store.len(), 4);
        assert_eq!(store.get(2), Some([1.0, 2.0, 0.0]));
        assert_eq!(store.get(3), Some([1.5, 3.0, 0.0]));
    }

    #[test]
    fn extend_twice_is_a_no_op() {
        let mut store = NodeStore::new(vec![0.0, 1.0], vec![0.0, 0.0], vec![0.0, 0.0]);
        let mut conn = NodeConnectivity::new(2);
        conn.add(0, 1);
        store.extend_midpoints(&conn).unwrap();
        store.extend_midpoints(&conn).unwrap();
        assert_eq!(store.len(), 3);
    }
}
