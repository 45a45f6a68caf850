//! Symmetric byte exchanges underneath every reconciliation phase.
//!
//! `exchange_all` is the two-stage pattern: announce byte counts on the size
//! tag, then move only the non-empty payloads on the data tag. Peers we have
//! nothing for still get the size message, so nobody waits on a payload that
//! never comes. `exchange_fixed` skips the size stage for payloads whose
//! length every PE already knows.

use std::collections::BTreeMap;
use std::mem::size_of;

use crate::algs::communicator::{Communicator, Wait};
use crate::algs::wire::{self, WireTally};
use crate::amr_error::AmrError;

/// Sends `outgoing[p]` to every peer `p` and returns what every peer sent us.
/// Peers absent from `outgoing` (or mapped to an empty payload) receive a
/// zero size; they appear in the result with an empty payload.
pub fn exchange_all<C: Communicator>(
    comm: &C,
    size_tag: u16,
    data_tag: u16,
    outgoing: &BTreeMap<usize, Vec<u8>>,
) -> Result<BTreeMap<usize, Vec<u8>>, AmrError> {
    let rank = comm.rank();
    let peers: Vec<usize> = (0..comm.size()).filter(|&p| p != rank).collect();

    // 1) post all size receives
    let mut size_bufs: Vec<Vec<u8>> =
        peers.iter().map(|_| vec![0u8; size_of::<WireTally>()]).collect();
    let mut size_recvs = Vec::with_capacity(peers.len());
    for (&peer, buf) in peers.iter().zip(size_bufs.iter_mut()) {
        size_recvs.push((peer, comm.irecv(peer, size_tag, buf)));
    }

    // 2) announce our payload length to every peer
    let mut pending_sends = Vec::with_capacity(peers.len());
    for &peer in &peers {
        let len = outgoing.get(&peer).map_or(0, Vec::len) as u64;
        let record = wire::encode(&[WireTally::new(len)]);
        pending_sends.push(comm.isend(peer, size_tag, &record));
    }

    // 3) wait for all size recvs, collect counts (but do not early-return)
    let mut incoming_sizes = BTreeMap::new();
    let mut maybe_err = None;
    for (peer, handle) in size_recvs {
        match handle.wait() {
            Some(data) => match wire::decode_one::<WireTally>(&data) {
                Ok(tally) => {
                    incoming_sizes.insert(peer, tally.get() as usize);
                }
                Err(source) => {
                    if maybe_err.is_none() {
                        maybe_err = Some(AmrError::CommError { neighbor: peer, source });
                    }
                }
            },
            None => {
                if maybe_err.is_none() {
                    maybe_err = Some(AmrError::CommError {
                        neighbor: peer,
                        source: format!("no size message from rank {peer}"),
                    });
                }
            }
        }
    }

    // 4) always drain size sends before acting on an error
    for send in pending_sends {
        let _ = send.wait();
    }
    if let Some(err) = maybe_err {
        return Err(err);
    }

    // 5) post payload receives for peers that announced bytes
    let mut data_bufs: BTreeMap<usize, Vec<u8>> = incoming_sizes
        .iter()
        .filter(|&(_, &len)| len > 0)
        .map(|(&peer, &len)| (peer, vec![0u8; len]))
        .collect();
    let mut data_recvs = Vec::with_capacity(data_bufs.len());
    for (&peer, buf) in data_bufs.iter_mut() {
        data_recvs.push((peer, buf.len(), comm.irecv(peer, data_tag, buf)));
    }

    // 6) fire the non-empty payload sends
    let mut pending_sends = Vec::new();
    for &peer in &peers {
        if let Some(payload) = outgoing.get(&peer) {
            if !payload.is_empty() {
                pending_sends.push(comm.isend(peer, data_tag, payload));
            }
        }
    }

    // 7) wait for payloads, validating each against its announced length
    let mut incoming = BTreeMap::new();
    let mut maybe_err = None;
    for (peer, expected, handle) in data_recvs {
        match handle.wait() {
            Some(data) if data.len() == expected => {
                incoming.insert(peer, data);
            }
            Some(data) => {
                if maybe_err.is_none() {
                    maybe_err = Some(AmrError::CommError {
                        neighbor: peer,
                        source: format!("expected {expected} payload bytes, got {}", data.len()),
                    });
                }
            }
            None => {
                if maybe_err.is_none() {
                    maybe_err = Some(AmrError::CommError {
                        neighbor: peer,
                        source: format!("no payload from rank {peer}"),
                    });
                }
            }
        }
    }

    // 8) drain payload sends, then report
    for send in pending_sends {
        let _ = send.wait();
    }
    if let Some(err) = maybe_err {
        return Err(err);
    }

    for (&peer, &len) in &incoming_sizes {
        if len == 0 {
            incoming.insert(peer, Vec::new());
        }
    }
    Ok(incoming)
}

/// Broadcasts one fixed-size payload to every peer and collects theirs.
/// Every PE must pass the same `expected` length.
pub fn exchange_fixed<C: Communicator>(
    comm: &C,
    tag: u16,
    payload: &[u8],
    expected: usize,
) -> Result<BTreeMap<usize, Vec<u8>>, AmrError> {
    let rank = comm.rank();
    let peers: Vec<usize> = (0..comm.size()).filter(|&p| p != rank).collect();

    // 1) post all receives
    let mut bufs: Vec<Vec<u8>> = peers.iter().map(|_| vec![0u8; expected]).collect();
    let mut recvs = Vec::with_capacity(peers.len());
    for (&peer, buf) in peers.iter().zip(bufs.iter_mut()) {
        recvs.push((peer, comm.irecv(peer, tag, buf)));
    }

    // 2) broadcast ours
    let mut pending_sends = Vec::with_capacity(peers.len());
    for &peer in &peers {
        pending_sends.push(comm.isend(peer, tag, payload));
    }

    // 3) wait for all recvs, validating lengths
    let mut incoming = BTreeMap::new();
    let mut maybe_err = None;
    for (peer, handle) in recvs {
        match handle.wait() {
            Some(data) if data.len() == expected => {
                incoming.insert(peer, data);
            }
            Some(data) => {
                if maybe_err.is_none() {
                    maybe_err = Some(AmrError::CommError {
                        neighbor: peer,
                        source: format!("expected {expected} bytes, got {}", data.len()),
                    });
                }
            }
            None => {
                if maybe_err.is_none() {
                    maybe_err = Some(AmrError::CommError {
                        neighbor: peer,
                        source: format!("no broadcast message from rank {peer}"),
                    });
                }
            }
        }
    }

    // 4) drain sends before returning
    for send in pending_sends {
        let _ = send.wait();
    }
    if let Some(err) = maybe_err {
        return Err(err);
    }
    Ok(incoming)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::{NoComm, RayonComm};

    #[test]
    fn serial_exchange_is_empty() {
        let comm = NoComm;
        let incoming = exchange_all(&comm, 0, 1, &BTreeMap::new()).unwrap();
        assert!(incoming.is_empty());
        let counts = exchange_fixed(&comm, 2, &[0u8; 8], 8).unwrap();
        assert!(counts.is_empty());
    }

    #[test]
    fn two_ranks_swap_payloads() {
        let handles: Vec<_> = (0..2usize)
            .map(|rank| {
                std::thread::spawn(move || {
                    let comm = RayonComm::new(rank, 2);
                    let peer = 1 - rank;
                    let mut outgoing = BTreeMap::new();
                    outgoing.insert(peer, vec![rank as u8; 3 + rank]);
                    let incoming = exchange_all(&comm, 200, 201, &outgoing).unwrap();
                    assert_eq!(incoming.len(), 1);
                    assert_eq!(incoming[&peer], vec![peer as u8; 3 + peer]);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn empty_payloads_still_complete() {
        let handles: Vec<_> = (0..3usize)
            .map(|rank| {
                std::thread::spawn(move || {
                    let comm = RayonComm::new(rank, 3);
                    // only rank 0 sends anything, and only to rank 2
                    let mut outgoing = BTreeMap::new();
                    if rank == 0 {
                        outgoing.insert(2, vec![7, 7]);
                    }
                    let incoming = exchange_all(&comm, 210, 211, &outgoing).unwrap();
                    assert_eq!(incoming.len(), 2);
                    if rank == 2 {
                        assert_eq!(incoming[&0], vec![7, 7]);
                        assert!(incoming[&1].is_empty());
                    } else {
                        assert!(incoming.values().all(Vec::is_empty));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn fixed_broadcast_reaches_everyone() {
        let handles: Vec<_> = (0..3usize)
            .map(|rank| {
                std::thread::spawn(move || {
                    let comm = RayonComm::new(rank, 3);
                    let payload = [rank as u8; 4];
                    let incoming = exchange_fixed(&comm, 220, &payload, 4).unwrap();
                    for (peer, data) in incoming {
                        assert_eq!(data, vec![peer as u8; 4]);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }
}
