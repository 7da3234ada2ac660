//! One-sided transport seams.
//!
//! The engine talks to peers only through these traits. Displacements are
//! byte offsets into the target rank's window. Operations issued between two
//! [`RmaWindow::fence`] calls complete by the second fence.

use pidx_error::{PidxError, Result};

/// Process-group membership.
pub trait Communicator {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;
    /// Block until every rank of the group has arrived.
    fn barrier(&self) -> Result<()>;
}

/// A group that can expose memory for one-sided access.
pub trait RmaFabric: Communicator {
    type Window: RmaWindow;

    /// Collective: every rank must call it, each contributing its own
    /// backing memory.
    fn create_window(&self, local: Vec<u8>) -> Result<Self::Window>;
}

/// Exposed memory of every rank of a group.
pub trait RmaWindow {
    /// Bytes exposed by this rank.
    fn local_len(&self) -> usize;

    /// Collective epoch boundary.
    fn fence(&mut self) -> Result<()>;

    fn put(&mut self, target: usize, disp: usize, data: &[u8]) -> Result<()>;

    fn get(&mut self, target: usize, disp: usize, out: &mut [u8]) -> Result<()>;

    /// Scatter `data` into `target` at the `(disp, len)` blocks, consumed
    /// in order.
    fn put_indexed(&mut self, target: usize, blocks: &[(usize, usize)], data: &[u8]) -> Result<()> {
        check_indexed_len("put_indexed", target, blocks, data.len())?;
        let mut cursor = 0;
        for &(disp, len) in blocks {
            self.put(target, disp, &data[cursor..cursor + len])?;
            cursor += len;
        }
        Ok(())
    }

    /// Gather the `(disp, len)` blocks of `target` into `out`, in order.
    fn get_indexed(
        &mut self,
        target: usize,
        blocks: &[(usize, usize)],
        out: &mut [u8],
    ) -> Result<()> {
        check_indexed_len("get_indexed", target, blocks, out.len())?;
        let mut cursor = 0;
        for &(disp, len) in blocks {
            self.get(target, disp, &mut out[cursor..cursor + len])?;
            cursor += len;
        }
        Ok(())
    }

    fn with_local<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R;

    fn with_local_mut<R>(&mut self, f: impl FnOnce(&mut [u8]) -> R) -> R;

    /// Tear the window down and hand back this rank's memory.
    fn into_local(self) -> Result<Vec<u8>>
    where
        Self: Sized;
}

fn check_indexed_len(
    op: &'static str,
    target: usize,
    blocks: &[(usize, usize)],
    buffer_len: usize,
) -> Result<()> {
    let total: usize = blocks.iter().map(|&(_, len)| len).sum();
    if total == buffer_len {
        Ok(())
    } else {
        Err(PidxError::Transport {
            op,
            rank: target,
            detail: format!("blocks cover {total} bytes but buffer holds {buffer_len}"),
        })
    }
}
