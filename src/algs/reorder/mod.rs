//! Leaderless global renumbering of mesh entities across PEs.
//!
//! Every PE runs the same peer protocol; there is no coordinator:
//!
//! 1. distribute: ship per-chare connectivity to the chares' owning PEs
//!    ([`chares`]), optionally followed by one uniform refinement pass whose
//!    midpoints travel the rest of the protocol as edge keys;
//! 2. query/answer: broadcast the PE's node and edge sets; every PE answers
//!    with the queried entities it also holds, each annotated with its local
//!    chare list. A PE folds its own sets through the same answer path, so
//!    chare adjacency inside one PE falls out of the same code;
//! 3. arbitrate: an entity is self-assigned iff no strictly-lower-indexed PE
//!    also claimed it; otherwise it will arrive from the lowest claimant;
//! 4. offset: broadcast per-PE unique counts; each PE derives its numbering
//!    start as the prefix sum over lower ranks, locally and redundantly;
//! 5. assign and exchange: number owned nodes then owned edges in ascending
//!    order, request the rest from their owners, serve symmetric requests;
//! 6. finalize: rewrite per-chare data into the new numbering (expanding
//!    refined elements into their eight children), merge node- and
//!    edge-derived chare adjacency, and chain the `[lower, upper)` row
//!    bounds from PE 0 upward.
//!
//! The result is a bijection from all distinct entities onto `[0, total)`,
//! each PE owning one contiguous block.

pub mod chares;
pub mod exchange;

use std::collections::{BTreeMap, BTreeSet};
use std::mem::size_of;

use bytemuck::Pod;
use hashbrown::{HashMap, HashSet};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::adapt::MeshAdapter;
use crate::adapt::refine::tetrahedron_octasection;
use crate::algs::communicator::{CommTag, Communicator, Wait};
use crate::algs::wire::{
    self, WireEdge, WireEdgeChare, WireEdgeId, WireNode, WireNodeChare, WireNodeId, WireSizes,
    WireTally,
};
use crate::amr_error::AmrError;
use crate::mesh::edge::EdgeKey;
use crate::mesh::tet_store::edge_keys;
use crate::mesh::{ChareId, NodeId};
use exchange::{exchange_all, exchange_fixed};

// Per-phase tag offsets within a run's tag block.
const DIST_SIZES: u16 = 0;
const DIST_DATA: u16 = 1;
const QUERY_SIZES: u16 = 2;
const QUERY_DATA: u16 = 3;
const ANSWER_SIZES: u16 = 4;
const ANSWER_DATA: u16 = 5;
const COUNTS: u16 = 6;
const REQUEST_SIZES: u16 = 7;
const REQUEST_DATA: u16 = 8;
const RESPONSE_SIZES: u16 = 9;
const RESPONSE_DATA: u16 = 10;
const BOUNDS: u16 = 11;

/// Number of consecutive tags one run occupies; concurrent runs must space
/// their [`CommTag`] bases at least this far apart.
pub const TAG_SPAN: u16 = 12;

/// Run parameters shared by every PE of one renumbering.
#[derive(Clone, Debug)]
pub struct ReorderConfig {
    /// Total number of chares across all PEs.
    pub nchare: ChareId,
    /// Base of this run's message-tag block.
    pub tag: CommTag,
    /// Apply one uniform refinement pass before renumbering, so midpoint
    /// nodes are numbered along with the original mesh.
    pub initial_refinement: bool,
}

impl ReorderConfig {
    pub fn new(nchare: ChareId) -> Self {
        Self { nchare, tag: CommTag::new(0), initial_refinement: false }
    }
}

/// One PE's share of the renumbered mesh.
///
/// All ids are new, except the values of `chare_old_ids` and the keys of
/// `chare_edge_nodes` and `new_*_ids`, which address the pre-protocol mesh
/// (for the coordinate arrays and for callers holding old ids).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReorderedMesh {
    /// First global row this PE owns.
    pub lower: u64,
    /// One past the last row this PE owns; a shared entity whose id falls
    /// outside `[lower, upper)` belongs to a neighboring PE's block.
    pub upper: u64,
    /// Per-chare connectivity in the new numbering. With refinement, every
    /// coarse element appears as its eight children.
    pub chare_connectivity: BTreeMap<ChareId, Vec<u64>>,
    /// Per-chare new→old node ids, addressing the original coordinates.
    pub chare_old_ids: BTreeMap<ChareId, BTreeMap<u64, NodeId>>,
    /// Per-chare midpoint ids by the (old-id) key of their split edge.
    pub chare_edge_nodes: BTreeMap<ChareId, BTreeMap<EdgeKey, u64>>,
    /// New id of every node this PE touched.
    pub new_node_ids: BTreeMap<NodeId, u64>,
    /// New id of every edge midpoint this PE touched.
    pub new_edge_ids: BTreeMap<EdgeKey, u64>,
    /// Chare adjacency: for each owned chare, the neighboring chares and the
    /// shared entity ids (new), for halo exchange during time stepping.
    pub msum: BTreeMap<ChareId, BTreeMap<ChareId, BTreeSet<u64>>>,
    /// Estimated communication cost of this PE's share, in `[0, 1]`.
    pub cost: f64,
}

/// One answer: the answering PE plus its (entity, chare) incidences.
type Answer = (usize, Vec<WireNodeChare>, Vec<WireEdgeChare>);

/// Per-PE state of one renumbering run.
pub struct Reorderer {
    rank: usize,
    size: usize,
    tag: CommTag,
    chare_conn: BTreeMap<ChareId, Vec<NodeId>>,
    chare_edge_nodes: BTreeMap<ChareId, BTreeMap<EdgeKey, NodeId>>,
    node_set: BTreeSet<NodeId>,
    edge_set: BTreeSet<EdgeKey>,
    node_chares: HashMap<NodeId, Vec<ChareId>>,
    edge_chares: HashMap<EdgeKey, Vec<ChareId>>,
    /// Entities arriving from a lower PE, keyed by the lowest claimant.
    node_comm: BTreeMap<usize, BTreeSet<NodeId>>,
    edge_comm: BTreeMap<usize, BTreeSet<EdgeKey>>,
    new_node_ids: BTreeMap<NodeId, u64>,
    new_edge_ids: BTreeMap<EdgeKey, u64>,
    /// Chare adjacency over old ids, node- and edge-derived kept apart
    /// until both are renumbered.
    msum_nodes: BTreeMap<ChareId, BTreeMap<ChareId, BTreeSet<NodeId>>>,
    msum_edges: BTreeMap<ChareId, BTreeMap<ChareId, BTreeSet<EdgeKey>>>,
    start: u64,
}

impl Reorderer {
    /// Runs the whole protocol from a PE's raw element chunk: categorize by
    /// chare, distribute to the owning PEs, then renumber.
    pub fn run<C: Communicator>(
        comm: &C,
        cfg: &ReorderConfig,
        tetinpoel: &[NodeId],
        chare_of_element: &[ChareId],
    ) -> Result<ReorderedMesh, AmrError> {
        let categorized =
            chares::categorize(tetinpoel, chare_of_element, cfg.nchare, comm.rank())?;
        let own = chares::distribute(
            comm,
            cfg.tag.offset(DIST_SIZES),
            cfg.tag.offset(DIST_DATA),
            cfg.nchare,
            categorized,
        )?;
        Self::from_parts(comm, cfg, own)
    }

    /// Runs the protocol on already-distributed per-chare connectivity.
    /// Every key must be a chare this PE owns.
    pub fn from_parts<C: Communicator>(
        comm: &C,
        cfg: &ReorderConfig,
        chare_conn: BTreeMap<ChareId, Vec<NodeId>>,
    ) -> Result<ReorderedMesh, AmrError> {
        let rank = comm.rank();
        let size = comm.size();
        for (&chare, conn) in &chare_conn {
            if chares::pe_of(chare, cfg.nchare, size) != rank {
                return Err(AmrError::UnownedChare { chare, pe: rank });
            }
            if conn.is_empty() {
                return Err(AmrError::MissingChareData(chare));
            }
            if conn.len() % 4 != 0 {
                return Err(AmrError::RaggedConnectivity(conn.len()));
            }
        }

        let mut reorderer = Self {
            rank,
            size,
            tag: cfg.tag,
            chare_conn,
            chare_edge_nodes: BTreeMap::new(),
            node_set: BTreeSet::new(),
            edge_set: BTreeSet::new(),
            node_chares: HashMap::new(),
            edge_chares: HashMap::new(),
            node_comm: BTreeMap::new(),
            edge_comm: BTreeMap::new(),
            new_node_ids: BTreeMap::new(),
            new_edge_ids: BTreeMap::new(),
            msum_nodes: BTreeMap::new(),
            msum_edges: BTreeMap::new(),
            start: 0,
        };
        if cfg.initial_refinement {
            reorderer.refine_uniformly()?;
        }
        reorderer.flatten();
        let answers = reorderer.exchange_queries(comm)?;
        reorderer.arbitrate(answers)?;
        reorderer.exchange_counts(comm)?;
        reorderer.assign_owned();
        reorderer.exchange_ids(comm)?;
        reorderer.finish(comm)
    }

    /// One uniform refinement pass over the PE's chares. The minted midpoint
    /// ids stay PE-local; what travels the protocol is the midpoints' edge
    /// keys, recorded per chare in `chare_edge_nodes`.
    fn refine_uniformly(&mut self) -> Result<(), AmrError> {
        let flat: Vec<NodeId> =
            self.chare_conn.values().flat_map(|conn| conn.iter().copied()).collect();
        let Some((min, max)) = flat.iter().copied().minmax().into_option() else {
            return Ok(());
        };
        log::debug!(
            "rank {}: uniformly refining {} elements over nodes [{min}, {max}]",
            self.rank,
            flat.len() / 4
        );
        let mut adapter = MeshAdapter::init(&flat, max + 1)?;
        adapter.uniform_refinement()?;
        for (chare, conn) in &self.chare_conn {
            let edge_nodes = self.chare_edge_nodes.entry(*chare).or_default();
            for quad in conn.chunks_exact(4) {
                let tet = [quad[0], quad[1], quad[2], quad[3]];
                for key in edge_keys(&tet) {
                    let [x, y] = key.nodes();
                    let mid = adapter
                        .node_connectivity
                        .find(x, y)
                        .ok_or(AmrError::MissingMidpoint { a: x, b: y })?;
                    edge_nodes.insert(key, mid);
                }
            }
        }
        Ok(())
    }

    /// Builds the PE's entity sets and, per entity, the sorted list of local
    /// chares touching it.
    fn flatten(&mut self) {
        for (&chare, conn) in &self.chare_conn {
            for &node in conn {
                let touching = self.node_chares.entry(node).or_default();
                if !touching.contains(&chare) {
                    touching.push(chare);
                }
                self.node_set.insert(node);
            }
        }
        for (&chare, edge_nodes) in &self.chare_edge_nodes {
            for &key in edge_nodes.keys() {
                let touching = self.edge_chares.entry(key).or_default();
                if !touching.contains(&chare) {
                    touching.push(chare);
                }
                self.edge_set.insert(key);
            }
        }
        log::debug!(
            "rank {}: {} nodes and {} edges over {} chares",
            self.rank,
            self.node_set.len(),
            self.edge_set.len(),
            self.chare_conn.len()
        );
    }

    /// Broadcasts this PE's entity sets and answers everyone else's,
    /// returning all `size` answers (own included).
    fn exchange_queries<C: Communicator>(&self, comm: &C) -> Result<Vec<Answer>, AmrError> {
        let nodes: Vec<WireNode> = self.node_set.iter().map(|&n| WireNode::of(n)).collect();
        let edges: Vec<WireEdge> = self.edge_set.iter().map(|&e| WireEdge::of(e)).collect();
        let query = encode_pair(&nodes, &edges);
        let mut outgoing = BTreeMap::new();
        for peer in (0..self.size).filter(|&p| p != self.rank) {
            outgoing.insert(peer, query.clone());
        }
        let queries =
            exchange_all(comm, self.tag.offset(QUERY_SIZES), self.tag.offset(QUERY_DATA), &outgoing)?;

        let mut responses = BTreeMap::new();
        for (peer, payload) in queries {
            let (nodes, edges) = decode_pair::<WireNode, WireEdge>(&payload)
                .map_err(|source| AmrError::CommError { neighbor: peer, source })?;
            let (node_hits, edge_hits) =
                self.answer(nodes.iter().map(WireNode::get), edges.iter().map(WireEdge::key));
            responses.insert(peer, encode_pair(&node_hits, &edge_hits));
        }

        let mut answers = Vec::with_capacity(self.size);
        let (own_nodes, own_edges) =
            self.answer(self.node_set.iter().copied(), self.edge_set.iter().copied());
        answers.push((self.rank, own_nodes, own_edges));

        let replies = exchange_all(
            comm,
            self.tag.offset(ANSWER_SIZES),
            self.tag.offset(ANSWER_DATA),
            &responses,
        )?;
        for (peer, payload) in replies {
            let (nodes, edges) = decode_pair::<WireNodeChare, WireEdgeChare>(&payload)
                .map_err(|source| AmrError::CommError { neighbor: peer, source })?;
            answers.push((peer, nodes, edges));
        }
        Ok(answers)
    }

    /// The subset of the queried entities this PE also holds, each with its
    /// local chare list.
    fn answer(
        &self,
        nodes: impl Iterator<Item = NodeId>,
        edges: impl Iterator<Item = EdgeKey>,
    ) -> (Vec<WireNodeChare>, Vec<WireEdgeChare>) {
        let mut node_hits = Vec::new();
        for node in nodes {
            if let Some(touching) = self.node_chares.get(&node) {
                for &chare in touching {
                    node_hits.push(WireNodeChare::new(node, chare));
                }
            }
        }
        let mut edge_hits = Vec::new();
        for key in edges {
            if let Some(touching) = self.edge_chares.get(&key) {
                for &chare in touching {
                    edge_hits.push(WireEdgeChare::new(key, chare));
                }
            }
        }
        (node_hits, edge_hits)
    }

    /// Accumulates chare adjacency from all answers and arbitrates ownership:
    /// entities also claimed by a lower-indexed PE are recorded under their
    /// lowest claimant and will arrive from it instead of being self-assigned.
    fn arbitrate(&mut self, answers: Vec<Answer>) -> Result<(), AmrError> {
        let mut node_claims: BTreeMap<usize, BTreeSet<NodeId>> = BTreeMap::new();
        let mut edge_claims: BTreeMap<usize, BTreeSet<EdgeKey>> = BTreeMap::new();
        for (peer, node_hits, edge_hits) in answers {
            if peer < self.rank {
                node_claims.entry(peer).or_default();
                edge_claims.entry(peer).or_default();
            }
            for hit in node_hits {
                let node = hit.node();
                let mine = self.node_chares.get(&node).ok_or_else(|| AmrError::CommError {
                    neighbor: peer,
                    source: format!("answer names node {node}, which was never queried"),
                })?;
                for &own in mine {
                    if hit.chare() != own {
                        self.msum_nodes
                            .entry(own)
                            .or_default()
                            .entry(hit.chare())
                            .or_default()
                            .insert(node);
                    }
                }
                if peer < self.rank {
                    node_claims.entry(peer).or_default().insert(node);
                }
            }
            for hit in edge_hits {
                let key = hit.key();
                let mine = self.edge_chares.get(&key).ok_or_else(|| AmrError::CommError {
                    neighbor: peer,
                    source: format!("answer names edge {key}, which was never queried"),
                })?;
                for &own in mine {
                    if hit.chare() != own {
                        self.msum_edges
                            .entry(own)
                            .or_default()
                            .entry(hit.chare())
                            .or_default()
                            .insert(key);
                    }
                }
                if peer < self.rank {
                    edge_claims.entry(peer).or_default().insert(key);
                }
            }
        }
        debug_assert_eq!(node_claims.len(), self.rank);
        debug_assert_eq!(edge_claims.len(), self.rank);

        // keep each entity only under its lowest claimant
        let mut seen_nodes: BTreeSet<NodeId> = BTreeSet::new();
        for (peer, claim) in node_claims {
            let exclusive: BTreeSet<NodeId> = claim.difference(&seen_nodes).copied().collect();
            seen_nodes.extend(claim);
            if !exclusive.is_empty() {
                self.node_comm.insert(peer, exclusive);
            }
        }
        let mut seen_edges: BTreeSet<EdgeKey> = BTreeSet::new();
        for (peer, claim) in edge_claims {
            let exclusive: BTreeSet<EdgeKey> = claim.difference(&seen_edges).copied().collect();
            seen_edges.extend(claim);
            if !exclusive.is_empty() {
                self.edge_comm.insert(peer, exclusive);
            }
        }
        log::debug!(
            "rank {}: {} nodes and {} edges arrive from lower PEs",
            self.rank,
            self.node_comm.values().map(BTreeSet::len).sum::<usize>(),
            self.edge_comm.values().map(BTreeSet::len).sum::<usize>()
        );
        Ok(())
    }

    /// Broadcasts this PE's uniquely-assigned count and derives the start of
    /// its numbering block as the prefix sum over lower ranks.
    fn exchange_counts<C: Communicator>(&mut self, comm: &C) -> Result<(), AmrError> {
        let arriving = self.node_comm.values().map(BTreeSet::len).sum::<usize>()
            + self.edge_comm.values().map(BTreeSet::len).sum::<usize>();
        let nuniq = (self.node_set.len() + self.edge_set.len() - arriving) as u64;
        let payload = wire::encode(&[WireTally::new(nuniq)]);
        let counts =
            exchange_fixed(comm, self.tag.offset(COUNTS), &payload, size_of::<WireTally>())?;
        let mut start = 0;
        for (peer, data) in counts {
            if peer < self.rank {
                let tally = wire::decode_one::<WireTally>(&data)
                    .map_err(|source| AmrError::CommError { neighbor: peer, source })?;
                start += tally.get();
            }
        }
        self.start = start;
        log::debug!("rank {}: {nuniq} unique entities, numbering starts at {start}", self.rank);
        Ok(())
    }

    /// Numbers every entity no lower PE claimed: nodes in ascending id
    /// order, then edges in ascending key order.
    fn assign_owned(&mut self) {
        let arriving_nodes: HashSet<NodeId> =
            self.node_comm.values().flatten().copied().collect();
        for &node in &self.node_set {
            if !arriving_nodes.contains(&node) {
                self.new_node_ids.insert(node, self.start);
                self.start += 1;
            }
        }
        let arriving_edges: HashSet<EdgeKey> =
            self.edge_comm.values().flatten().copied().collect();
        for &key in &self.edge_set {
            if !arriving_edges.contains(&key) {
                self.new_edge_ids.insert(key, self.start);
                self.start += 1;
            }
        }
    }

    /// Requests new ids for the entities owned elsewhere and serves the
    /// symmetric requests of higher PEs, completing the local numbering.
    fn exchange_ids<C: Communicator>(&mut self, comm: &C) -> Result<(), AmrError> {
        let peers: BTreeSet<usize> =
            self.node_comm.keys().chain(self.edge_comm.keys()).copied().collect();
        let mut outgoing = BTreeMap::new();
        for peer in peers {
            let nodes: Vec<WireNode> = self
                .node_comm
                .get(&peer)
                .map(|set| set.iter().map(|&n| WireNode::of(n)).collect())
                .unwrap_or_default();
            let edges: Vec<WireEdge> = self
                .edge_comm
                .get(&peer)
                .map(|set| set.iter().map(|&e| WireEdge::of(e)).collect())
                .unwrap_or_default();
            outgoing.insert(peer, encode_pair(&nodes, &edges));
        }
        let requests = exchange_all(
            comm,
            self.tag.offset(REQUEST_SIZES),
            self.tag.offset(REQUEST_DATA),
            &outgoing,
        )?;

        let mut responses = BTreeMap::new();
        for (peer, payload) in requests {
            if payload.is_empty() {
                continue;
            }
            let (nodes, edges) = decode_pair::<WireNode, WireEdge>(&payload)
                .map_err(|source| AmrError::CommError { neighbor: peer, source })?;
            let mut node_ids = Vec::with_capacity(nodes.len());
            for record in nodes {
                let node = record.get();
                let id =
                    *self.new_node_ids.get(&node).ok_or(AmrError::UnassignedNode(node))?;
                node_ids.push(WireNodeId::new(node, id));
            }
            let mut edge_ids = Vec::with_capacity(edges.len());
            for record in edges {
                let key = record.key();
                let id = *self.new_edge_ids.get(&key).ok_or(AmrError::UnassignedEdge(key))?;
                edge_ids.push(WireEdgeId::new(key, id));
            }
            responses.insert(peer, encode_pair(&node_ids, &edge_ids));
        }
        let replies = exchange_all(
            comm,
            self.tag.offset(RESPONSE_SIZES),
            self.tag.offset(RESPONSE_DATA),
            &responses,
        )?;
        for (peer, payload) in replies {
            if payload.is_empty() {
                continue;
            }
            let (nodes, edges) = decode_pair::<WireNodeId, WireEdgeId>(&payload)
                .map_err(|source| AmrError::CommError { neighbor: peer, source })?;
            for record in nodes {
                self.new_node_ids.insert(record.node(), record.id());
            }
            for record in edges {
                self.new_edge_ids.insert(record.key(), record.id());
            }
        }

        // reorder-complete: every entity of this PE now has a new id
        for &node in &self.node_set {
            if !self.new_node_ids.contains_key(&node) {
                return Err(AmrError::UnassignedNode(node));
            }
        }
        for &key in &self.edge_set {
            if !self.new_edge_ids.contains_key(&key) {
                return Err(AmrError::UnassignedEdge(key));
            }
        }
        log::debug!(
            "rank {}: reorder complete, {} nodes and {} edges renumbered",
            self.rank,
            self.new_node_ids.len(),
            self.new_edge_ids.len()
        );
        Ok(())
    }

    /// Rewrites per-chare data into the new numbering, merges chare
    /// adjacency, and chains the row bounds from PE 0 upward.
    fn finish<C: Communicator>(self, comm: &C) -> Result<ReorderedMesh, AmrError> {
        // new→old per chare, for addressing the original coordinate arrays
        let mut chare_old_ids: BTreeMap<ChareId, BTreeMap<u64, NodeId>> = BTreeMap::new();
        for (&chare, conn) in &self.chare_conn {
            let old_ids = chare_old_ids.entry(chare).or_default();
            for &node in conn {
                let new = *self.new_node_ids.get(&node).ok_or(AmrError::UnassignedNode(node))?;
                old_ids.insert(new, node);
            }
        }

        // midpoints now carry their final global ids
        let mut chare_edge_nodes: BTreeMap<ChareId, BTreeMap<EdgeKey, u64>> = BTreeMap::new();
        for (&chare, edge_nodes) in &self.chare_edge_nodes {
            let renumbered = chare_edge_nodes.entry(chare).or_default();
            for &key in edge_nodes.keys() {
                let id = *self.new_edge_ids.get(&key).ok_or(AmrError::UnassignedEdge(key))?;
                renumbered.insert(key, id);
            }
        }

        // connectivity in the new numbering; with midpoints present every
        // coarse element expands into its eight children
        let mut chare_connectivity: BTreeMap<ChareId, Vec<u64>> = BTreeMap::new();
        if chare_edge_nodes.is_empty() {
            for (&chare, conn) in &self.chare_conn {
                let mut rewritten = Vec::with_capacity(conn.len());
                for &node in conn {
                    rewritten
                        .push(*self.new_node_ids.get(&node).ok_or(AmrError::UnassignedNode(node))?);
                }
                chare_connectivity.insert(chare, rewritten);
            }
        } else {
            for (&chare, conn) in &self.chare_conn {
                let edge_nodes =
                    chare_edge_nodes.get(&chare).ok_or(AmrError::MissingChareData(chare))?;
                let mut rewritten = Vec::with_capacity(conn.len() * 8);
                for quad in conn.chunks_exact(4) {
                    let tet = [quad[0], quad[1], quad[2], quad[3]];
                    let mut corners = [0u64; 4];
                    for (corner, &node) in corners.iter_mut().zip(quad) {
                        *corner = *self
                            .new_node_ids
                            .get(&node)
                            .ok_or(AmrError::UnassignedNode(node))?;
                    }
                    let mut midpoints = [0u64; 6];
                    for (mid, key) in midpoints.iter_mut().zip(edge_keys(&tet)) {
                        *mid = *edge_nodes
                            .get(&key)
                            .ok_or(AmrError::MissingMidpoint { a: key.a(), b: key.b() })?;
                    }
                    for child in tetrahedron_octasection(corners, midpoints) {
                        rewritten.extend_from_slice(&child);
                    }
                }
                chare_connectivity.insert(chare, rewritten);
            }
        }

        // chare adjacency: node-derived first, then the edge-derived entries
        // fold into them (chares sharing an edge always share its endpoints)
        let mut msum: BTreeMap<ChareId, BTreeMap<ChareId, BTreeSet<u64>>> = BTreeMap::new();
        for (&chare, neighbors) in &self.msum_nodes {
            let translated = msum.entry(chare).or_default();
            for (&neighbor, shared) in neighbors {
                let ids = translated.entry(neighbor).or_default();
                for &node in shared {
                    ids.insert(
                        *self.new_node_ids.get(&node).ok_or(AmrError::UnassignedNode(node))?,
                    );
                }
            }
        }
        for (&chare, neighbors) in &self.msum_edges {
            let edge_nodes =
                chare_edge_nodes.get(&chare).ok_or(AmrError::MissingChareData(chare))?;
            for (&neighbor, shared) in neighbors {
                let ids = msum
                    .get_mut(&chare)
                    .and_then(|m| m.get_mut(&neighbor))
                    .ok_or(AmrError::AsymmetricAdjacency { chare, neighbor })?;
                for &key in shared {
                    ids.insert(
                        *edge_nodes
                            .get(&key)
                            .ok_or(AmrError::MissingMidpoint { a: key.a(), b: key.b() })?,
                    );
                }
            }
        }

        // the largest new id any of this PE's chares touches
        let mut touched: Option<u64> = None;
        for old_ids in chare_old_ids.values() {
            if let Some((&new, _)) = old_ids.iter().next_back() {
                touched = Some(touched.map_or(new, |t| t.max(new)));
            }
        }
        for edge_nodes in chare_edge_nodes.values() {
            for &id in edge_nodes.values() {
                touched = Some(touched.map_or(id, |t| t.max(id)));
            }
        }

        // bounds chain: PE 0 starts at row 0, everyone else inherits the
        // previous PE's upper bound; the last PE makes its bound exclusive
        let lower = if self.rank == 0 {
            0
        } else {
            let mut buf = vec![0u8; size_of::<WireTally>()];
            let recv = comm.irecv(self.rank - 1, self.tag.offset(BOUNDS), &mut buf);
            match recv.wait() {
                Some(data) => wire::decode_one::<WireTally>(&data)
                    .map_err(|source| AmrError::CommError { neighbor: self.rank - 1, source })?
                    .get(),
                None => {
                    return Err(AmrError::CommError {
                        neighbor: self.rank - 1,
                        source: "no lower bound from the previous rank".into(),
                    });
                }
            }
        };
        let mut upper = touched.unwrap_or(lower);
        if self.rank + 1 == self.size {
            upper += 1;
        } else {
            let payload = wire::encode(&[WireTally::new(upper)]);
            let _ = comm.isend(self.rank + 1, self.tag.offset(BOUNDS), &payload).wait();
        }

        // communication cost: the share of touched rows outside [lower, upper)
        let mut contributed: BTreeSet<u64> = BTreeSet::new();
        for ids in chare_connectivity.values() {
            contributed.extend(ids.iter().copied());
        }
        let owned = contributed.iter().filter(|&&id| id >= lower && id < upper).count();
        let foreign = contributed.len() - owned;
        let cost = if contributed.is_empty() {
            0.0
        } else {
            foreign as f64 / contributed.len() as f64
        };
        log::debug!("rank {}: rows [{lower}, {upper}), communication cost {cost:.3}", self.rank);

        Ok(ReorderedMesh {
            lower,
            upper,
            chare_connectivity,
            chare_old_ids,
            chare_edge_nodes,
            new_node_ids: self.new_node_ids,
            new_edge_ids: self.new_edge_ids,
            msum,
            cost,
        })
    }
}

/// Encodes a `[WireSizes][A; n][B; m]` payload.
fn encode_pair<A: Pod, B: Pod>(a: &[A], b: &[B]) -> Vec<u8> {
    let mut bytes = wire::encode(&[WireSizes::new(a.len(), b.len())]);
    bytes.extend_from_slice(bytemuck::cast_slice(a));
    bytes.extend_from_slice(bytemuck::cast_slice(b));
    bytes
}

/// Decodes a `[WireSizes][A; n][B; m]` payload.
fn decode_pair<A: Pod, B: Pod>(bytes: &[u8]) -> Result<(Vec<A>, Vec<B>), String> {
    let header = size_of::<WireSizes>();
    if bytes.len() < header {
        return Err(format!("payload of {} bytes is shorter than its header", bytes.len()));
    }
    let sizes: WireSizes = wire::decode_one(&bytes[..header])?;
    let split = header + sizes.nodes() * size_of::<A>();
    let end = split + sizes.edges() * size_of::<B>();
    wire::expect_exact_len(bytes.len(), end)?;
    let a = wire::decode(&bytes[header..split])?;
    let b = wire::decode(&bytes[split..end])?;
    Ok((a, b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::{NoComm, RayonComm};

    fn serial_config(nchare: ChareId) -> ReorderConfig {
        ReorderConfig::new(nchare)
    }

    #[test]
    fn single_rank_numbers_nodes_in_ascending_order() {
        let comm = NoComm;
        let mut conn = BTreeMap::new();
        conn.insert(0, vec![7, 3, 5, 1]);
        let mesh = Reorderer::from_parts(&comm, &serial_config(1), conn).unwrap();

        assert_eq!(mesh.new_node_ids[&1], 0);
        assert_eq!(mesh.new_node_ids[&3], 1);
        assert_eq!(mesh.new_node_ids[&5], 2);
        assert_eq!(mesh.new_node_ids[&7], 3);
        assert_eq!(mesh.chare_connectivity[&0], vec![3, 1, 2, 0]);
        assert_eq!(mesh.chare_old_ids[&0][&2], 5);
        assert_eq!((mesh.lower, mesh.upper), (0, 4));
        assert_eq!(mesh.cost, 0.0);
        assert!(mesh.msum.is_empty());
        assert!(mesh.new_edge_ids.is_empty());
    }

    #[test]
    fn chares_sharing_a_face_see_each_other() {
        let comm = NoComm;
        let mut conn = BTreeMap::new();
        conn.insert(0, vec![0, 1, 2, 3]);
        conn.insert(1, vec![1, 2, 3, 4]);
        let mesh = Reorderer::from_parts(&comm, &serial_config(2), conn).unwrap();

        // already-ascending contiguous ids renumber onto themselves
        for node in 0..5 {
            assert_eq!(mesh.new_node_ids[&node], node);
        }
        let shared: BTreeSet<u64> = [1, 2, 3].into_iter().collect();
        assert_eq!(mesh.msum[&0][&1], shared);
        assert_eq!(mesh.msum[&1][&0], shared);
        assert_eq!((mesh.lower, mesh.upper), (0, 5));
    }

    #[test]
    fn uniform_refinement_numbers_midpoints_after_nodes() {
        let comm = NoComm;
        let mut conn = BTreeMap::new();
        conn.insert(0, vec![0, 1, 2, 3]);
        let cfg = ReorderConfig { initial_refinement: true, ..serial_config(1) };
        let mesh = Reorderer::from_parts(&comm, &cfg, conn).unwrap();

        // 4 corners then 6 midpoints in ascending edge-key order
        for node in 0..4 {
            assert_eq!(mesh.new_node_ids[&node], node);
        }
        let expected = [
            (EdgeKey::new(0, 1), 4),
            (EdgeKey::new(0, 2), 5),
            (EdgeKey::new(0, 3), 6),
            (EdgeKey::new(1, 2), 7),
            (EdgeKey::new(1, 3), 8),
            (EdgeKey::new(2, 3), 9),
        ];
        for (key, id) in expected {
            assert_eq!(mesh.new_edge_ids[&key], id);
            assert_eq!(mesh.chare_edge_nodes[&0][&key], id);
        }

        // one coarse element becomes eight children over the new ids
        let fine = &mesh.chare_connectivity[&0];
        assert_eq!(fine.len(), 32);
        assert_eq!(&fine[0..4], &[0, 4, 5, 6]);
        assert_eq!(&fine[20..24], &[4, 8, 5, 6]);
        assert_eq!((mesh.lower, mesh.upper), (0, 10));
        assert_eq!(mesh.cost, 0.0);
    }

    #[test]
    fn from_parts_rejects_malformed_chares() {
        let comm = NoComm;
        let mut empty = BTreeMap::new();
        empty.insert(0, Vec::new());
        assert!(matches!(
            Reorderer::from_parts(&comm, &serial_config(1), empty),
            Err(AmrError::MissingChareData(0))
        ));

        let mut ragged = BTreeMap::new();
        ragged.insert(0, vec![0, 1, 2]);
        assert!(matches!(
            Reorderer::from_parts(&comm, &serial_config(1), ragged),
            Err(AmrError::RaggedConnectivity(3))
        ));
    }

    #[test]
    fn from_parts_rejects_a_foreign_chare() {
        // two ranks exist, but the error fires before any message is sent
        let comm = RayonComm::new(0, 2);
        let mut conn = BTreeMap::new();
        conn.insert(1, vec![0, 1, 2, 3]);
        assert!(matches!(
            Reorderer::from_parts(&comm, &serial_config(2), conn),
            Err(AmrError::UnownedChare { chare: 1, pe: 0 })
        ));
    }

    #[test]
    fn run_categorizes_before_renumbering() {
        let comm = NoComm;
        let tetinpoel = [4, 5, 6, 7, 0, 1, 2, 3];
        let chare_of_element = [1, 0];
        let mesh =
            Reorderer::run(&comm, &serial_config(2), &tetinpoel, &chare_of_element).unwrap();
        assert_eq!(mesh.chare_connectivity[&0], vec![0, 1, 2, 3]);
        assert_eq!(mesh.chare_connectivity[&1], vec![4, 5, 6, 7]);
        assert_eq!((mesh.lower, mesh.upper), (0, 8));
        assert!(mesh.msum.is_empty());
    }

    #[test]
    fn payload_pairs_roundtrip() {
        let nodes = vec![WireNode::of(3), WireNode::of(9)];
        let edges = vec![WireEdge::of(EdgeKey::new(4, 1))];
        let bytes = encode_pair(&nodes, &edges);
        let (back_nodes, back_edges) = decode_pair::<WireNode, WireEdge>(&bytes).unwrap();
        assert_eq!(back_nodes.len(), 2);
        assert_eq!(back_nodes[1].get(), 9);
        assert_eq!(back_edges[0].key(), EdgeKey::new(1, 4));

        assert!(decode_pair::<WireNode, WireEdge>(&bytes[..bytes.len() - 1]).is_err());
        assert!(decode_pair::<WireNode, WireEdge>(&[]).is_err());
    }
}
