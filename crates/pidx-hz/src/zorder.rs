//! Coordinate <-> HZ index transcoding.
//!
//! A plain Z address interleaves coordinate bits following the bit pattern,
//! finest level in the least significant bit. The HZ index additionally ORs a
//! sentinel at bit `max_level` and shifts off every trailing zero plus the
//! sentinel's own trailing one, so that the position of the most significant
//! set bit of the result encodes the resolution level.

use pidx_error::{PidxError, Result};
use pidx_types::{BitPattern, Coord, MAX_DIMENSIONS};

/// Encode a coordinate as an HZ index.
///
/// Fails with [`PidxError::OutOfRange`] when a component does not fit the
/// axis extent implied by `pattern`.
pub fn coord_to_hz(pattern: &BitPattern, coord: &Coord) -> Result<u64> {
    let max_level = pattern.max_level();
    let mut rest = *coord;
    let mut z = 0_u64;
    let mut level = max_level;
    let mut shift = 0_u32;
    while rest.iter().any(|&c| c != 0) {
        if level == 0 {
            return Err(PidxError::out_of_range(
                format!("coordinate for pattern {pattern}"),
                format!("{coord:?}"),
            ));
        }
        let axis = pattern.axis_at(level);
        z |= (rest[axis] & 1) << shift;
        rest[axis] >>= 1;
        shift += 1;
        level -= 1;
    }
    z |= 1_u64 << max_level;
    Ok(z >> (z.trailing_zeros() + 1))
}

/// Decode an HZ index back to its coordinate.
pub fn hz_to_coord(pattern: &BitPattern, hz: u64) -> Result<Coord> {
    let last = 1_u64 << pattern.max_level();
    if hz >= last {
        return Err(PidxError::out_of_range(
            format!("hz index for pattern {pattern}"),
            hz,
        ));
    }
    let mut z = (hz << 1) | 1;
    while z & last == 0 {
        z <<= 1;
    }
    deinterleave(pattern, z & (last - 1))
}

/// Split a raw Z address (no sentinel) onto the axes named by `pattern`.
pub fn deinterleave(pattern: &BitPattern, z: u64) -> Result<Coord> {
    let max_level = pattern.max_level();
    if z >> max_level != 0 {
        return Err(PidxError::out_of_range(
            format!("z address for pattern {pattern}"),
            z,
        ));
    }
    let mut coord = [0_u64; MAX_DIMENSIONS];
    let mut filled = [0_u32; MAX_DIMENSIONS];
    let mut rest = z;
    let mut level = max_level;
    while rest != 0 {
        let axis = pattern.axis_at(level);
        coord[axis] |= (rest & 1) << filled[axis];
        filled[axis] += 1;
        rest >>= 1;
        level -= 1;
    }
    Ok(coord)
}

/// Resolution level of an HZ index: `floor(log2 hz) + 1`, and 0 for 0.
#[must_use]
pub const fn level_of(hz: u64) -> u32 {
    if hz == 0 { 0 } else { u64::BITS - hz.leading_zeros() }
}
