//! Optional byte-order flipping of on-disk payloads.
//!
//! Aggregation buffers always hold native byte order. When a dataset is
//! flagged for flipping, payloads are reversed value by value on their way
//! to disk and reversed again on the way back.

use pidx_error::{PidxError, Result};
use pidx_types::DataType;

/// Reverse the bytes of every `value_width`-byte value in `bytes`.
pub fn swap_payload(bytes: &mut [u8], value_width: usize) -> Result<()> {
    match value_width {
        1 => return Ok(()),
        2 | 4 | 8 => {}
        other => {
            return Err(PidxError::precondition(format!(
                "cannot byte-swap {other}-byte values"
            )));
        }
    }
    if bytes.len() % value_width != 0 {
        return Err(PidxError::inconsistent(format!(
            "payload of {} bytes is not a whole number of {value_width}-byte values",
            bytes.len()
        )));
    }
    for value in bytes.chunks_exact_mut(value_width) {
        value.reverse();
    }
    Ok(())
}

/// Flip `bytes` in place if `flip` is set, using the value width of
/// `datatype`.
pub fn apply_endianness(bytes: &mut [u8], datatype: DataType, flip: bool) -> Result<()> {
    if flip {
        swap_payload(bytes, datatype.bytes_per_value)?;
    }
    Ok(())
}
