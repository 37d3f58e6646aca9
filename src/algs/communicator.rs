//! Thin façade over intra-process (threads) or inter-process (MPI) message passing.
//!
//! Messages are contiguous byte slices. Every call is **blocking**: a receive
//! returns only once the matching message arrived, a collective returns only once
//! every rank contributed. The decomposition algorithms are written as
//! synchronised supersteps on top of these calls.
//!
//! A rank that hits a fatal error calls [`Communicator::abort`]; every peer that is
//! (or later becomes) blocked in a receive or collective is released with
//! [`DecompositionError::Aborted`].

use crate::mesh_error::DecompositionError;
use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Message tag. Collectives and point-to-point traffic of one algorithm stage
/// share a tag; the stages of a run are strictly sequential.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
pub struct CommTag(u16);

impl CommTag {
    pub const fn new(tag: u16) -> Self {
        Self(tag)
    }

    pub const fn as_u16(self) -> u16 {
        self.0
    }

    pub const fn offset(self, by: u16) -> Self {
        Self(self.0.wrapping_add(by))
    }
}

/// Tags used by the tracker stages.
#[derive(Copy, Clone, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TrackerCommTags {
    pub discovery: CommTag,
    pub interfaces: CommTag,
    pub cross_interfaces: CommTag,
    pub mapping: CommTag,
    pub numbering: CommTag,
}

impl TrackerCommTags {
    pub const fn from_base(base: CommTag) -> Self {
        Self {
            discovery: base,
            interfaces: base.offset(1),
            cross_interfaces: base.offset(2),
            mapping: base.offset(3),
            numbering: base.offset(4),
        }
    }
}

impl Default for TrackerCommTags {
    fn default() -> Self {
        Self::from_base(CommTag::new(0xD700))
    }
}

/// Blocking communication capability injected into the tracker.
pub trait Communicator {
    /// Rank of this process.
    fn rank(&self) -> usize;
    /// Number of ranks in the run.
    fn size(&self) -> usize;

    /// Send `buf` to `peer`. The buffer is copied; the call may return before the
    /// peer received it.
    fn send(&self, peer: usize, tag: CommTag, buf: &[u8]) -> Result<(), DecompositionError>;

    /// Block until the next message from `peer` with `tag` arrives.
    fn recv(&self, peer: usize, tag: CommTag) -> Result<Vec<u8>, DecompositionError>;

    /// Symmetric send/receive with one peer. Both sides must call it with the
    /// same tag; callers visit peers in ascending rank order.
    fn exchange(
        &self,
        peer: usize,
        tag: CommTag,
        buf: &[u8],
    ) -> Result<Vec<u8>, DecompositionError> {
        self.send(peer, tag, buf)?;
        self.recv(peer, tag)
    }

    /// Gather one variable-length buffer from every rank; entry `r` is rank `r`'s.
    fn all_gather(&self, tag: CommTag, buf: &[u8]) -> Result<Vec<Vec<u8>>, DecompositionError>;

    /// Broadcast `buf` from `root`; the argument is ignored on the other ranks.
    fn broadcast(
        &self,
        root: usize,
        tag: CommTag,
        buf: &[u8],
    ) -> Result<Vec<u8>, DecompositionError>;

    /// Tear the whole run down after a fatal error on this rank.
    fn abort(&self, reason: &str);
}

/// Single-rank communicator for serial runs.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl NoComm {
    fn no_peer(peer: usize) -> DecompositionError {
        DecompositionError::Communication {
            rank: 0,
            peer,
            detail: "serial communicator has no peers".into(),
        }
    }
}

impl Communicator for NoComm {
    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
    fn send(&self, peer: usize, _tag: CommTag, _buf: &[u8]) -> Result<(), DecompositionError> {
        Err(Self::no_peer(peer))
    }
    fn recv(&self, peer: usize, _tag: CommTag) -> Result<Vec<u8>, DecompositionError> {
        Err(Self::no_peer(peer))
    }
    fn all_gather(&self, _tag: CommTag, buf: &[u8]) -> Result<Vec<Vec<u8>>, DecompositionError> {
        Ok(vec![buf.to_vec()])
    }
    fn broadcast(
        &self,
        _root: usize,
        _tag: CommTag,
        buf: &[u8],
    ) -> Result<Vec<u8>, DecompositionError> {
        Ok(buf.to_vec())
    }
    fn abort(&self, reason: &str) {
        log::error!("serial run aborted: {reason}");
    }
}

// --- ThreadComm: one thread per simulated rank ---
type Key = (usize, usize, u16); // (src, dst, tag)

#[derive(Default)]
struct WorldState {
    mailboxes: HashMap<Key, VecDeque<Bytes>>,
    aborted: Option<(usize, String)>,
}

struct World {
    size: usize,
    state: Mutex<WorldState>,
    signal: Condvar,
}

/// In-process communicator: every rank of a simulated run owns one handle on a
/// shared world of mailboxes.
#[derive(Clone)]
pub struct ThreadComm {
    rank: usize,
    world: Arc<World>,
}

impl std::fmt::Debug for ThreadComm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadComm")
            .field("rank", &self.rank)
            .field("size", &self.world.size)
            .finish()
    }
}

impl ThreadComm {
    /// Create the handles of a fresh world with `size` ranks.
    pub fn world(size: usize) -> Vec<ThreadComm> {
        let world = Arc::new(World {
            size,
            state: Mutex::new(WorldState::default()),
            signal: Condvar::new(),
        });
        (0..size)
            .map(|rank| ThreadComm {
                rank,
                world: Arc::clone(&world),
            })
            .collect()
    }

    fn aborted_error(&self, origin: usize, reason: &str) -> DecompositionError {
        DecompositionError::Aborted {
            rank: self.rank,
            origin,
            reason: reason.to_owned(),
        }
    }

    fn check_peer(&self, peer: usize) -> Result<(), DecompositionError> {
        if peer >= self.world.size || peer == self.rank {
            return Err(DecompositionError::Communication {
                rank: self.rank,
                peer,
                detail: format!("invalid peer in a world of {} ranks", self.world.size),
            });
        }
        Ok(())
    }

    fn post(&self, peer: usize, tag: CommTag, buf: &[u8]) -> Result<(), DecompositionError> {
        let mut state = self.world.state.lock();
        if let Some((origin, reason)) = &state.aborted {
            return Err(self.aborted_error(*origin, reason));
        }
        state
            .mailboxes
            .entry((self.rank, peer, tag.as_u16()))
            .or_default()
            .push_back(Bytes::copy_from_slice(buf));
        self.world.signal.notify_all();
        Ok(())
    }

    /// Messages posted before an abort stay receivable.
    fn take(&self, peer: usize, tag: CommTag) -> Result<Vec<u8>, DecompositionError> {
        let key = (peer, self.rank, tag.as_u16());
        let mut state = self.world.state.lock();
        loop {
            if let Some(msg) = state.mailboxes.get_mut(&key).and_then(VecDeque::pop_front) {
                return Ok(msg.to_vec());
            }
            if let Some((origin, reason)) = &state.aborted {
                return Err(self.aborted_error(*origin, reason));
            }
            self.world.signal.wait(&mut state);
        }
    }
}

impl Communicator for ThreadComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.world.size
    }

    fn send(&self, peer: usize, tag: CommTag, buf: &[u8]) -> Result<(), DecompositionError> {
        self.check_peer(peer)?;
        self.post(peer, tag, buf)
    }

    fn recv(&self, peer: usize, tag: CommTag) -> Result<Vec<u8>, DecompositionError> {
        self.check_peer(peer)?;
        self.take(peer, tag)
    }

    fn all_gather(&self, tag: CommTag, buf: &[u8]) -> Result<Vec<Vec<u8>>, DecompositionError> {
        for peer in (0..self.world.size).filter(|&p| p != self.rank) {
            self.post(peer, tag, buf)?;
        }
        (0..self.world.size)
            .map(|peer| {
                if peer == self.rank {
                    Ok(buf.to_vec())
                } else {
                    self.take(peer, tag)
                }
            })
            .collect()
    }

    fn broadcast(
        &self,
        root: usize,
        tag: CommTag,
        buf: &[u8],
    ) -> Result<Vec<u8>, DecompositionError> {
        if root == self.rank {
            for peer in (0..self.world.size).filter(|&p| p != root) {
                self.post(peer, tag, buf)?;
            }
            Ok(buf.to_vec())
        } else {
            self.check_peer(root)?;
            self.take(root, tag)
        }
    }

    fn abort(&self, reason: &str) {
        let mut state = self.world.state.lock();
        if state.aborted.is_none() {
            log::error!("rank {} aborting the run: {reason}", self.rank);
            state.aborted = Some((self.rank, reason.to_owned()));
        }
        self.world.signal.notify_all();
    }
}

/// Run `body` once per rank of a fresh [`ThreadComm`] world, each on its own
/// thread, and collect the results in rank order.
///
/// A panicking rank aborts the world so that its peers do not block forever;
/// the panic is re-raised on the calling thread.
pub fn run_ranks<T, F>(size: usize, body: F) -> Vec<T>
where
    T: Send,
    F: Fn(ThreadComm) -> T + Sync,
{
    let comms = ThreadComm::world(size);
    std::thread::scope(|scope| {
        let body = &body;
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                scope.spawn(move || {
                    let guard = comm.clone();
                    std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| body(comm)))
                        .unwrap_or_else(|panic| {
                            guard.abort("rank panicked");
                            std::panic::resume_unwind(panic)
                        })
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| match h.join() {
                Ok(value) => value,
                Err(panic) => std::panic::resume_unwind(panic),
            })
            .collect()
    })
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::*;
    use mpi::Count;
    use mpi::datatype::PartitionMut;
    use mpi::environment::Universe;
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::*;

    pub struct MpiComm {
        // Dropping the universe finalizes MPI.
        _universe: Universe,
        world: SimpleCommunicator,
        rank: usize,
        size: usize,
    }

    impl MpiComm {
        pub fn new() -> Result<Self, DecompositionError> {
            let universe = mpi::initialize().ok_or_else(|| {
                DecompositionError::configuration(0, "MpiComm::new", "MPI already initialized")
            })?;
            let world = universe.world();
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Ok(Self {
                _universe: universe,
                world,
                rank,
                size,
            })
        }
    }

    impl Communicator for MpiComm {
        fn rank(&self) -> usize {
            self.rank
        }

        fn size(&self) -> usize {
            self.size
        }

        fn send(&self, peer: usize, tag: CommTag, buf: &[u8]) -> Result<(), DecompositionError> {
            self.world
                .process_at_rank(peer as i32)
                .send_with_tag(buf, tag.as_u16() as i32);
            Ok(())
        }

        fn recv(&self, peer: usize, tag: CommTag) -> Result<Vec<u8>, DecompositionError> {
            let (msg, _status) = self
                .world
                .process_at_rank(peer as i32)
                .receive_vec_with_tag::<u8>(tag.as_u16() as i32);
            Ok(msg)
        }

        fn exchange(
            &self,
            peer: usize,
            tag: CommTag,
            buf: &[u8],
        ) -> Result<Vec<u8>, DecompositionError> {
            let process = self.world.process_at_rank(peer as i32);
            let tag = tag.as_u16() as i32;
            let msg = mpi::request::scope(|scope| {
                let sreq = process.immediate_send_with_tag(scope, buf, tag);
                let (msg, _status) = process.receive_vec_with_tag::<u8>(tag);
                sreq.wait();
                msg
            });
            Ok(msg)
        }

        fn all_gather(
            &self,
            _tag: CommTag,
            buf: &[u8],
        ) -> Result<Vec<Vec<u8>>, DecompositionError> {
            let count = buf.len() as Count;
            let mut counts = vec![0 as Count; self.size];
            self.world.all_gather_into(&count, &mut counts[..]);
            let displs: Vec<Count> = counts
                .iter()
                .scan(0, |acc, &c| {
                    let d = *acc;
                    *acc += c;
                    Some(d)
                })
                .collect();
            let total: Count = counts.iter().sum();
            let mut recv = vec![0u8; total as usize];
            {
                let mut partition = PartitionMut::new(&mut recv[..], &counts[..], &displs[..]);
                self.world.all_gather_varcount_into(buf, &mut partition);
            }
            Ok(counts
                .iter()
                .zip(&displs)
                .map(|(&c, &d)| recv[d as usize..(d + c) as usize].to_vec())
                .collect())
        }

        fn broadcast(
            &self,
            root: usize,
            _tag: CommTag,
            buf: &[u8],
        ) -> Result<Vec<u8>, DecompositionError> {
            let root_process = self.world.process_at_rank(root as i32);
            let mut len = buf.len() as u64;
            root_process.broadcast_into(&mut len);
            let mut data = if self.rank == root {
                buf.to_vec()
            } else {
                vec![0u8; len as usize]
            };
            root_process.broadcast_into(&mut data[..]);
            Ok(data)
        }

        fn abort(&self, reason: &str) {
            log::error!("rank {} aborting the run: {reason}", self.rank);
            self.world.abort(1)
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_roundtrip_two_ranks() {
        let got = run_ranks(2, |comm| {
            let peer = 1 - comm.rank();
            let payload = [comm.rank() as u8; 4];
            comm.exchange(peer, CommTag::new(7), &payload).unwrap()
        });
        assert_eq!(got[0], vec![1, 1, 1, 1]);
        assert_eq!(got[1], vec![0, 0, 0, 0]);
    }

    #[test]
    fn tags_do_not_mix() {
        let comms = ThreadComm::world(2);
        comms[0].send(1, CommTag::new(2), &[2]).unwrap();
        comms[0].send(1, CommTag::new(1), &[1]).unwrap();
        assert_eq!(comms[1].recv(0, CommTag::new(1)).unwrap(), vec![1]);
        assert_eq!(comms[1].recv(0, CommTag::new(2)).unwrap(), vec![2]);
    }

    #[test]
    fn all_gather_is_rank_keyed() {
        let got = run_ranks(3, |comm| {
            let mine = vec![comm.rank() as u8; comm.rank()];
            comm.all_gather(CommTag::new(3), &mine).unwrap()
        });
        for gathered in got {
            assert_eq!(gathered, vec![vec![], vec![1], vec![2, 2]]);
        }
    }

    #[test]
    fn broadcast_from_root() {
        let got = run_ranks(3, |comm| {
            let buf = if comm.rank() == 2 { vec![9, 8] } else { vec![] };
            comm.broadcast(2, CommTag::new(4), &buf).unwrap()
        });
        assert!(got.iter().all(|b| b == &vec![9, 8]));
    }

    #[test]
    fn abort_releases_blocked_peers() {
        let got = run_ranks(3, |comm| {
            if comm.rank() == 1 {
                comm.abort("boom");
                return None;
            }
            comm.all_gather(CommTag::new(5), &[1]).err()
        });
        for err in [&got[0], &got[2]] {
            match err {
                Some(DecompositionError::Aborted { origin, .. }) => assert_eq!(*origin, 1),
                other => panic!("expected abort, got {other:?}"),
            }
        }
    }

    #[test]
    fn delivered_messages_survive_an_abort() {
        let comms = ThreadComm::world(2);
        comms[0].send(1, CommTag::new(6), &[3]).unwrap();
        comms[0].abort("late");
        assert_eq!(comms[1].recv(0, CommTag::new(6)).unwrap(), vec![3]);
        match comms[1].recv(0, CommTag::new(6)) {
            Err(DecompositionError::Aborted { origin, .. }) => assert_eq!(origin, 0),
            other => panic!("expected abort, got {other:?}"),
        }
    }

    #[test]
    fn no_comm_is_single_rank() {
        let comm = NoComm;
        assert_eq!(comm.size(), 1);
        assert_eq!(
            comm.all_gather(CommTag::new(1), &[5]).unwrap(),
            vec![vec![5]]
        );
        assert!(comm.recv(1, CommTag::new(1)).is_err());
    }
}
