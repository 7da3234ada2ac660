//! Read path: scatter level buffers back into row-major order.

use pidx_error::{PidxError, Result};
use pidx_hz::{coord_to_hz, level_of};

use crate::buffer::{HzBuffer, HzBufferState};
use crate::patch::Patch;

impl HzBuffer {
    /// Rebuild the patch this buffer was (or would have been) populated
    /// from. Samples inside compacted ranges come back zeroed.
    pub fn decode_into(&self) -> Result<Patch> {
        self.expect_state(
            &[HzBufferState::Populated, HzBufferState::Compacted],
            "decode",
        )?;
        let datatype = self.datatype();
        let bps = datatype.bytes_per_sample();
        let mut patch = Patch::zeroed(*self.region(), datatype)?;
        let out = patch.data_mut();
        for (index, coord) in self.region().points().enumerate() {
            let hz = coord_to_hz(self.pattern(), &coord)?;
            let level = self.level(level_of(hz)).ok_or_else(|| {
                PidxError::internal(format!("hz {hz} has no level buffer during decode"))
            })?;
            if let Some(offset) = level.sample_offset(hz, bps) {
                out[index * bps..(index + 1) * bps]
                    .copy_from_slice(&level.data()[offset..offset + bps]);
            }
        }
        Ok(patch)
    }
}
