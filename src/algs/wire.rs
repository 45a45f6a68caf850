//! Fixed little-endian wire records for the reconciliation protocol.
//!
//! Every multi-byte integer is little-endian on the wire: producers store
//! pre-LE with `.to_le()`, consumers decode with `::from_le()`. Payloads are
//! flat arrays of one record type (or a few record types at known offsets),
//! so a size exchange plus `decode` is all the framing there is.

use std::mem::size_of;

use bytemuck::{Pod, Zeroable};

use crate::mesh::edge::EdgeKey;
use crate::mesh::{ChareId, NodeId};

/// Encodes a record slice as raw bytes.
pub fn encode<T: Pod>(records: &[T]) -> Vec<u8> {
    bytemuck::cast_slice(records).to_vec()
}

/// Decodes a byte slice holding exactly `bytes.len() / size_of::<T>()`
/// records. Reads are unaligned, so any offset into a received buffer works.
pub fn decode<T: Pod>(bytes: &[u8]) -> Result<Vec<T>, String> {
    let width = size_of::<T>();
    if bytes.len() % width != 0 {
        return Err(format!("payload of {} bytes is not a multiple of {width}", bytes.len()));
    }
    Ok(bytes.chunks_exact(width).map(bytemuck::pod_read_unaligned).collect())
}

/// Decodes a payload that must hold exactly one record.
pub fn decode_one<T: Pod>(bytes: &[u8]) -> Result<T, String> {
    expect_exact_len(bytes.len(), size_of::<T>())?;
    Ok(bytemuck::pod_read_unaligned(bytes))
}

pub fn expect_exact_len(actual: usize, expected: usize) -> Result<(), String> {
    if actual == expected {
        Ok(())
    } else {
        Err(format!("expected {expected} bytes, got {actual}"))
    }
}

// ===== Queries and answers =================================================

/// Element counts of a two-part payload: `nodes` records of one type followed
/// by `edges` records of another.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireSizes {
    pub nodes_le: u32,
    pub edges_le: u32,
}

impl WireSizes {
    pub fn new(nodes: usize, edges: usize) -> Self {
        Self { nodes_le: (nodes as u32).to_le(), edges_le: (edges as u32).to_le() }
    }
    pub fn nodes(&self) -> usize {
        u32::from_le(self.nodes_le) as usize
    }
    pub fn edges(&self) -> usize {
        u32::from_le(self.edges_le) as usize
    }
}

/// A bare node id.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireNode {
    pub id_le: u64,
}

impl WireNode {
    pub fn of(id: NodeId) -> Self {
        Self { id_le: id.to_le() }
    }
    pub fn get(&self) -> NodeId {
        u64::from_le(self.id_le)
    }
}

/// A canonical edge key (endpoints ascending).
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireEdge {
    pub a_le: u64,
    pub b_le: u64,
}

impl WireEdge {
    pub fn of(key: EdgeKey) -> Self {
        Self { a_le: key.a().to_le(), b_le: key.b().to_le() }
    }
    pub fn key(&self) -> EdgeKey {
        EdgeKey::new(u64::from_le(self.a_le), u64::from_le(self.b_le))
    }
}

/// One (node, chare) incidence of the answering PE. A node held by several
/// chares produces several records.
/// NOTE: chare ids are u32 (never usize) on the wire.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireNodeChare {
    pub node_le: u64,
    pub chare_le: u32,
    pub _pad: u32, // pad to 8-byte alignment (explicit)
}

impl WireNodeChare {
    pub fn new(node: NodeId, chare: ChareId) -> Self {
        Self { node_le: node.to_le(), chare_le: chare.to_le(), _pad: 0 }
    }
    pub fn node(&self) -> NodeId {
        u64::from_le(self.node_le)
    }
    pub fn chare(&self) -> ChareId {
        u32::from_le(self.chare_le)
    }
}

/// One (edge, chare) incidence of the answering PE.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireEdgeChare {
    pub a_le: u64,
    pub b_le: u64,
    pub chare_le: u32,
    pub _pad: u32,
}

impl WireEdgeChare {
    pub fn new(key: EdgeKey, chare: ChareId) -> Self {
        Self { a_le: key.a().to_le(), b_le: key.b().to_le(), chare_le: chare.to_le(), _pad: 0 }
    }
    pub fn key(&self) -> EdgeKey {
        EdgeKey::new(u64::from_le(self.a_le), u64::from_le(self.b_le))
    }
    pub fn chare(&self) -> ChareId {
        u32::from_le(self.chare_le)
    }
}

// ===== Id assignment =======================================================

/// A single 64-bit quantity: a PE's unique-entity count, or a numbering
/// bound handed down the PE chain.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireTally {
    pub n_le: u64,
}

impl WireTally {
    pub fn new(n: u64) -> Self {
        Self { n_le: n.to_le() }
    }
    pub fn get(&self) -> u64 {
        u64::from_le(self.n_le)
    }
}

/// Response record: the new id assigned to an old node.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireNodeId {
    pub node_le: u64,
    pub id_le: u64,
}

impl WireNodeId {
    pub fn new(node: NodeId, id: u64) -> Self {
        Self { node_le: node.to_le(), id_le: id.to_le() }
    }
    pub fn node(&self) -> NodeId {
        u64::from_le(self.node_le)
    }
    pub fn id(&self) -> u64 {
        u64::from_le(self.id_le)
    }
}

/// Response record: the new id assigned to an edge's midpoint.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireEdgeId {
    pub a_le: u64,
    pub b_le: u64,
    pub id_le: u64,
}

impl WireEdgeId {
    pub fn new(key: EdgeKey, id: u64) -> Self {
        Self { a_le: key.a().to_le(), b_le: key.b().to_le(), id_le: id.to_le() }
    }
    pub fn key(&self) -> EdgeKey {
        EdgeKey::new(u64::from_le(self.a_le), u64::from_le(self.b_le))
    }
    pub fn id(&self) -> u64 {
        u64::from_le(self.id_le)
    }
}

// ===== Chare distribution ==================================================

/// Header of one chare block in a distribution payload; `ntets` records of
/// [`WireTet`] follow it.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireChareHdr {
    pub chare_le: u32,
    pub ntets_le: u32,
}

impl WireChareHdr {
    pub fn new(chare: ChareId, ntets: usize) -> Self {
        Self { chare_le: chare.to_le(), ntets_le: (ntets as u32).to_le() }
    }
    pub fn chare(&self) -> ChareId {
        u32::from_le(self.chare_le)
    }
    pub fn ntets(&self) -> usize {
        u32::from_le(self.ntets_le) as usize
    }
}

/// One tetrahedron's connectivity.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireTet {
    pub nodes_le: [u64; 4],
}

impl WireTet {
    pub fn of(nodes: [NodeId; 4]) -> Self {
        Self { nodes_le: [nodes[0].to_le(), nodes[1].to_le(), nodes[2].to_le(), nodes[3].to_le()] }
    }
    pub fn get(&self) -> [NodeId; 4] {
        [
            u64::from_le(self.nodes_le[0]),
            u64::from_le(self.nodes_le[1]),
            u64::from_le(self.nodes_le[2]),
            u64::from_le(self.nodes_le[3]),
        ]
    }
}

// ===== Compile-time sanity checks =========================================

const _: () = {
    // Pod/Zeroable ensures no padding contains uninit when cast to bytes.
    assert!(size_of::<WireSizes>() == 8);
    assert!(size_of::<WireNode>() == 8);
    assert!(size_of::<WireEdge>() == 16);
    assert!(size_of::<WireNodeChare>() == 16);
    assert!(size_of::<WireEdgeChare>() == 24);
    assert!(size_of::<WireTally>() == 8);
    assert!(size_of::<WireNodeId>() == 16);
    assert!(size_of::<WireEdgeId>() == 24);
    assert!(size_of::<WireChareHdr>() == 8);
    assert!(size_of::<WireTet>() == 32);
};
