//! In-process fabric: one rank per thread, windows in shared memory.

use std::sync::{Arc, Barrier};

use parking_lot::Mutex;
use pidx_error::{PidxError, Result};
use tracing::trace;

use crate::transport::{Communicator, RmaFabric, RmaWindow};

type Memory = Arc<Mutex<Vec<u8>>>;

#[derive(Debug)]
struct Shared {
    size: usize,
    barrier: Barrier,
    staging: Mutex<Vec<Option<Memory>>>,
}

/// A process group of `size` ranks living in one address space.
#[derive(Debug, Clone)]
pub struct LocalFabric {
    shared: Arc<Shared>,
}

impl LocalFabric {
    pub fn new(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(PidxError::precondition("local fabric needs at least one rank"));
        }
        Ok(Self {
            shared: Arc::new(Shared {
                size,
                barrier: Barrier::new(size),
                staging: Mutex::new(vec![None; size]),
            }),
        })
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.shared.size
    }

    /// One handle per rank; move each into its own thread.
    #[must_use]
    pub fn ranks(&self) -> Vec<LocalRank> {
        (0..self.shared.size)
            .map(|rank| LocalRank {
                rank,
                shared: Arc::clone(&self.shared),
            })
            .collect()
    }
}

/// Membership handle of one rank of a [`LocalFabric`].
#[derive(Debug)]
pub struct LocalRank {
    rank: usize,
    shared: Arc<Shared>,
}

impl Communicator for LocalRank {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.shared.size
    }

    fn barrier(&self) -> Result<()> {
        self.shared.barrier.wait();
        Ok(())
    }
}

impl RmaFabric for LocalRank {
    type Window = LocalWindow;

    fn create_window(&self, local: Vec<u8>) -> Result<LocalWindow> {
        let mine: Memory = Arc::new(Mutex::new(local));
        self.shared.staging.lock()[self.rank] = Some(Arc::clone(&mine));
        self.shared.barrier.wait();

        let peers: Option<Vec<Memory>> = self.shared.staging.lock().iter().cloned().collect();
        self.shared.barrier.wait();
        if self.rank == 0 {
            self.shared.staging.lock().iter_mut().for_each(|s| *s = None);
        }
        self.shared.barrier.wait();

        let peers = peers.ok_or_else(|| PidxError::Transport {
            op: "create_window",
            rank: self.rank,
            detail: "a rank did not contribute window memory".to_owned(),
        })?;
        trace!(rank = self.rank, bytes = mine.lock().len(), "window created");
        Ok(LocalWindow {
            rank: self.rank,
            peers,
            shared: Arc::clone(&self.shared),
        })
    }
}

/// Window over the memories of every rank of a [`LocalFabric`].
#[derive(Debug)]
pub struct LocalWindow {
    rank: usize,
    peers: Vec<Memory>,
    shared: Arc<Shared>,
}

impl LocalWindow {
    fn memory(&self, op: &'static str, target: usize) -> Result<&Memory> {
        self.peers.get(target).ok_or_else(|| PidxError::Transport {
            op,
            rank: target,
            detail: format!("no such rank in a group of {}", self.peers.len()),
        })
    }
}

fn check_range(
    op: &'static str,
    target: usize,
    disp: usize,
    len: usize,
    window_len: usize,
) -> Result<usize> {
    match disp.checked_add(len) {
        Some(end) if end <= window_len => Ok(end),
        _ => Err(PidxError::Transport {
            op,
            rank: target,
            detail: format!("{len} bytes at {disp} exceed a window of {window_len}"),
        }),
    }
}

impl RmaWindow for LocalWindow {
    fn local_len(&self) -> usize {
        self.peers[self.rank].lock().len()
    }

    fn fence(&mut self) -> Result<()> {
        self.shared.barrier.wait();
        Ok(())
    }

    fn put(&mut self, target: usize, disp: usize, data: &[u8]) -> Result<()> {
        let mut memory = self.memory("put", target)?.lock();
        let end = check_range("put", target, disp, data.len(), memory.len())?;
        memory[disp..end].copy_from_slice(data);
        Ok(())
    }

    fn get(&mut self, target: usize, disp: usize, out: &mut [u8]) -> Result<()> {
        let memory = self.memory("get", target)?.lock();
        let end = check_range("get", target, disp, out.len(), memory.len())?;
        out.copy_from_slice(&memory[disp..end]);
        Ok(())
    }

    fn with_local<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        f(&self.peers[self.rank].lock())
    }

    fn with_local_mut<R>(&mut self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        f(&mut self.peers[self.rank].lock())
    }

    fn into_local(self) -> Result<Vec<u8>> {
        let memory = std::mem::take(&mut *self.peers[self.rank].lock());
        Ok(memory)
    }
}
