//! Chare ownership and the element-distribution round.
//!
//! Chares are distributed over PEs in contiguous blocks: `nchare / npes`
//! apiece, the remainder going to the last PE. A PE's initial element chunk
//! references chares it does not own, so after categorizing its elements by
//! chare it ships every foreign block to the owning PE. After the exchange
//! every PE holds exactly the connectivity of its own chares.

use std::collections::BTreeMap;
use std::mem::size_of;

use crate::algs::communicator::Communicator;
use crate::algs::reorder::exchange::exchange_all;
use crate::algs::wire::{self, WireChareHdr, WireTet};
use crate::amr_error::AmrError;
use crate::mesh::{ChareId, NodeId};

/// Block size and this PE's share of the chares.
///
/// Every PE gets `nchare / npes` chares; the last PE also takes the
/// remainder. Returns `(chunksize, mynchare)`.
pub fn chare_distribution(nchare: ChareId, npes: usize, rank: usize) -> (ChareId, ChareId) {
    let chunksize = nchare / npes as ChareId;
    let mynchare = if rank + 1 == npes { nchare - chunksize * (npes as ChareId - 1) } else { chunksize };
    (chunksize, mynchare)
}

/// The PE owning `chare` under the block distribution.
pub fn pe_of(chare: ChareId, nchare: ChareId, npes: usize) -> usize {
    let chunksize = nchare / npes as ChareId;
    if chunksize == 0 {
        npes - 1
    } else {
        ((chare / chunksize) as usize).min(npes - 1)
    }
}

/// The contiguous chare id range owned by `rank`.
pub fn owned_chares(nchare: ChareId, npes: usize, rank: usize) -> std::ops::Range<ChareId> {
    let (chunksize, mynchare) = chare_distribution(nchare, npes, rank);
    let first = chunksize * rank as ChareId;
    first..first + mynchare
}

/// Splits a PE's element chunk into per-chare connectivity.
///
/// `tetinpoel` holds one node-id quadruple per element; `chare_of_element`
/// maps each element to its chare. An empty categorization means the run is
/// over-decomposed for this PE's chunk and is reported as the configuration
/// error it is.
pub fn categorize(
    tetinpoel: &[NodeId],
    chare_of_element: &[ChareId],
    nchare: ChareId,
    rank: usize,
) -> Result<BTreeMap<ChareId, Vec<NodeId>>, AmrError> {
    if tetinpoel.len() % 4 != 0 {
        return Err(AmrError::RaggedConnectivity(tetinpoel.len()));
    }
    let elements = tetinpoel.len() / 4;
    if elements != chare_of_element.len() {
        return Err(AmrError::ChareAssignmentMismatch {
            elements,
            assignments: chare_of_element.len(),
        });
    }
    let mut categorized: BTreeMap<ChareId, Vec<NodeId>> = BTreeMap::new();
    for (quad, &chare) in tetinpoel.chunks_exact(4).zip(chare_of_element) {
        if chare >= nchare {
            return Err(AmrError::ChareOutOfRange { chare, nchare });
        }
        categorized.entry(chare).or_default().extend_from_slice(quad);
    }
    if categorized.is_empty() {
        return Err(AmrError::OverDecomposition { pe: rank });
    }
    Ok(categorized)
}

/// Ships every foreign chare block to its owning PE and collects the blocks
/// other PEs hold for ours.
///
/// Payloads are sequences of `[WireChareHdr][WireTet; ntets]` blocks.
/// Receiving a chare this PE does not own is a protocol violation; an owned
/// chare for which no PE contributed elements means the partitioner left the
/// chare empty, which is the over-decomposition configuration error.
pub fn distribute<C: Communicator>(
    comm: &C,
    size_tag: u16,
    data_tag: u16,
    nchare: ChareId,
    categorized: BTreeMap<ChareId, Vec<NodeId>>,
) -> Result<BTreeMap<ChareId, Vec<NodeId>>, AmrError> {
    let rank = comm.rank();
    let npes = comm.size();

    let mut own: BTreeMap<ChareId, Vec<NodeId>> = BTreeMap::new();
    let mut outgoing: BTreeMap<usize, Vec<u8>> = BTreeMap::new();
    let mut exported = 0usize;
    for (chare, conn) in categorized {
        let pe = pe_of(chare, nchare, npes);
        if pe == rank {
            own.entry(chare).or_default().extend_from_slice(&conn);
        } else {
            let payload = outgoing.entry(pe).or_default();
            payload.extend_from_slice(&wire::encode(&[WireChareHdr::new(chare, conn.len() / 4)]));
            for quad in conn.chunks_exact(4) {
                payload.extend_from_slice(&wire::encode(&[WireTet::of([
                    quad[0], quad[1], quad[2], quad[3],
                ])]));
            }
            exported += 1;
        }
    }
    log::debug!("rank {rank}: keeping {} chares, exporting {exported}", own.len());

    let incoming = exchange_all(comm, size_tag, data_tag, &outgoing)?;
    for (peer, payload) in incoming {
        decode_blocks(&payload, peer, |chare, conn| {
            if pe_of(chare, nchare, npes) != rank {
                return Err(AmrError::UnownedChare { chare, pe: rank });
            }
            own.entry(chare).or_default().extend_from_slice(conn);
            Ok(())
        })?;
    }

    for chare in owned_chares(nchare, npes, rank) {
        if own.get(&chare).is_none_or(Vec::is_empty) {
            return Err(AmrError::OverDecomposition { pe: rank });
        }
    }
    Ok(own)
}

/// Walks the `[WireChareHdr][WireTet; ntets]` blocks of one payload.
fn decode_blocks(
    payload: &[u8],
    peer: usize,
    mut sink: impl FnMut(ChareId, &[NodeId]) -> Result<(), AmrError>,
) -> Result<(), AmrError> {
    let header = size_of::<WireChareHdr>();
    let record = size_of::<WireTet>();
    let mut offset = 0;
    while offset < payload.len() {
        if payload.len() - offset < header {
            return Err(AmrError::CommError {
                neighbor: peer,
                source: format!("trailing {} bytes are not a chare block", payload.len() - offset),
            });
        }
        let hdr: WireChareHdr = wire::decode_one(&payload[offset..offset + header])
            .map_err(|source| AmrError::CommError { neighbor: peer, source })?;
        offset += header;
        let len = hdr.ntets() * record;
        if payload.len() - offset < len {
            return Err(AmrError::CommError {
                neighbor: peer,
                source: format!(
                    "chare {} block announces {} tets but only {} bytes follow",
                    hdr.chare(),
                    hdr.ntets(),
                    payload.len() - offset
                ),
            });
        }
        let tets: Vec<WireTet> = wire::decode(&payload[offset..offset + len])
            .map_err(|source| AmrError::CommError { neighbor: peer, source })?;
        offset += len;
        let mut conn = Vec::with_capacity(tets.len() * 4);
        for tet in tets {
            conn.extend_from_slice(&tet.get());
        }
        sink(hdr.chare(), &conn)?;
    }
    Ok(())
}
