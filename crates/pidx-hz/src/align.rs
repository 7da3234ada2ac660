//! Box-to-curve alignment.
//!
//! The samples of resolution level `L` form a regular lattice: an origin
//! (the level's first Z address, de-interleaved) and a per-axis step
//! ("delta"). Aligning a query box to a level intersects it with that
//! lattice's bounding box and snaps the corners onto lattice points, which
//! yields exactly the level-`L` samples inside the query.

use pidx_error::{PidxError, Result};
use pidx_types::{BitPattern, Coord, GridBox, MAX_DIMENSIONS};

use crate::zorder::{coord_to_hz, deinterleave};

/// Query box snapped onto the lattice of one resolution level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelBox {
    pub level: u32,
    /// Inclusive corners, both on lattice points.
    pub bounds: GridBox,
    /// Lattice step per axis.
    pub delta: Coord,
    /// Lattice points per axis, `1 + (upper - lower) / delta`.
    pub nsamples: Coord,
}

impl LevelBox {
    /// Number of level samples inside the box.
    #[must_use]
    pub fn sample_count(&self) -> u64 {
        self.nsamples.iter().product()
    }

    /// HZ indices of the lower and upper corners. Every level sample inside
    /// the box falls in this inclusive range.
    pub fn hz_range(&self, pattern: &BitPattern) -> Result<(u64, u64)> {
        let start = coord_to_hz(pattern, &corner(&self.bounds.lower))?;
        let end = coord_to_hz(pattern, &corner(&self.bounds.upper))?;
        Ok((start, end))
    }
}

/// Outcome of [`align`]. `Invalid` is the sentinel for "no samples of this
/// level in the box"; callers must check before use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlignedBox {
    Invalid,
    Aligned(LevelBox),
}

impl AlignedBox {
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        matches!(self, Self::Aligned(_))
    }

    #[must_use]
    pub const fn as_level_box(&self) -> Option<&LevelBox> {
        match self {
            Self::Aligned(b) => Some(b),
            Self::Invalid => None,
        }
    }
}

/// First and last plain Z addresses of `level`, before sentinel encoding.
pub fn level_z_range(max_level: u32, level: u32) -> Result<(u64, u64)> {
    check_level(max_level, level)?;
    if level == 0 {
        return Ok((0, 0));
    }
    let start = 1_u64 << (max_level - level);
    let end = (1_u64 << max_level) - 1 - (start - 1);
    Ok((start, end))
}

/// Inclusive HZ range covered by exactly one resolution level.
///
/// Equals `[2^(level-1), 2^level - 1]` for `level >= 1` and `[0, 0]` for the
/// root level; the ranges of levels `0..=max_level` tile `[0, 2^max_level)`.
pub fn curve_extent_at_level(pattern: &BitPattern, level: u32) -> Result<(u64, u64)> {
    let (z_start, z_end) = level_z_range(pattern.max_level(), level)?;
    if level == 0 {
        return Ok((0, 0));
    }
    let start = coord_to_hz(pattern, &deinterleave(pattern, z_start)?)?;
    let end = coord_to_hz(pattern, &deinterleave(pattern, z_end)?)?;
    Ok((start, end))
}

/// Lattice step per axis at `level`.
pub fn level_delta(pattern: &BitPattern, level: u32) -> Result<Coord> {
    let max_level = pattern.max_level();
    check_level(max_level, level)?;
    let mut delta = [1_u64; MAX_DIMENSIONS];
    if level == 0 {
        return Ok(delta);
    }
    for k in (level..=max_level).rev() {
        delta[pattern.axis_at(k)] <<= 1;
    }
    Ok(delta)
}

/// Snap `query` onto the sample lattice of `level`.
///
/// Returns [`AlignedBox::Invalid`] when `query` is malformed, misses the
/// level's bounding box, or contains no lattice point after snapping.
pub fn align(pattern: &BitPattern, query: &GridBox, level: u32) -> Result<AlignedBox> {
    let max_level = pattern.max_level();
    let delta = level_delta(pattern, level)?;
    if !query.is_valid() {
        return Ok(AlignedBox::Invalid);
    }

    let level_box = if level == 0 {
        GridBox::new([0; MAX_DIMENSIONS], [0; MAX_DIMENSIONS])
    } else {
        let (z_start, z_end) = level_z_range(max_level, level)?;
        GridBox::new(
            signed(&deinterleave(pattern, z_start)?),
            signed(&deinterleave(pattern, z_end)?),
        )
    };

    let mut bounds = query.intersect(&level_box);
    if !bounds.is_valid() {
        return Ok(AlignedBox::Invalid);
    }

    for d in 0..MAX_DIMENSIONS {
        let step = delta[d] as i64;
        let origin = level_box.lower[d];
        let low_mod = (bounds.lower[d] - origin) % step;
        if low_mod != 0 {
            bounds.lower[d] += step - low_mod;
        }
        let high_mod = (bounds.upper[d] - origin) % step;
        if high_mod != 0 {
            bounds.upper[d] -= high_mod;
        }
    }
    if !bounds.is_valid() {
        return Ok(AlignedBox::Invalid);
    }

    let mut nsamples = [0_u64; MAX_DIMENSIONS];
    for d in 0..MAX_DIMENSIONS {
        nsamples[d] = 1 + (bounds.upper[d] - bounds.lower[d]) as u64 / delta[d];
    }
    Ok(AlignedBox::Aligned(LevelBox {
        level,
        bounds,
        delta,
        nsamples,
    }))
}

fn check_level(max_level: u32, level: u32) -> Result<()> {
    if level > max_level {
        return Err(PidxError::out_of_range(
            format!("resolution level (max {max_level})"),
            level,
        ));
    }
    Ok(())
}

fn signed(coord: &Coord) -> [i64; MAX_DIMENSIONS] {
    coord.map(|c| c as i64)
}

fn corner(bound: &[i64; MAX_DIMENSIONS]) -> Coord {
    bound.map(|c| c as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zorder::{hz_to_coord, level_of};
    use proptest::prelude::*;

    fn pattern(text: &str) -> BitPattern {
        BitPattern::parse(text).expect("valid pattern")
    }

    fn pattern_strategy() -> impl Strategy<Value = BitPattern> {
        proptest::collection::vec(0_u8..3, 1..=18)
            .prop_map(|axes| BitPattern::from_axes(axes).expect("valid axes"))
    }

    #[test]
    fn test_level_z_range() {
        assert_eq!(level_z_range(6, 0).expect("level"), (0, 0));
        assert_eq!(level_z_range(6, 3).expect("level"), (8, 56));
        assert_eq!(level_z_range(6, 6).expect("level"), (1, 63));
        assert!(level_z_range(6, 7).is_err());
    }

    #[test]
    fn test_align_level_three_of_cube() {
        let p = pattern("V012012");
        let query = GridBox::from_offset_size([0; 5], [4, 4, 4, 1, 1]);
        let aligned = align(&p, &query, 3).expect("level in range");
        let lb = aligned.as_level_box().expect("level 3 intersects the cube");
        assert_eq!(lb.delta, [2, 2, 4, 1, 1]);
        assert_eq!(lb.bounds.lower, [0, 0, 2, 0, 0]);
        assert_eq!(lb.bounds.upper, [2, 2, 2, 0, 0]);
        assert_eq!(lb.nsamples, [2, 2, 1, 1, 1]);
        for d in 0..MAX_DIMENSIONS {
            let span = (lb.bounds.upper[d] - lb.bounds.lower[d]) as u64;
            assert_eq!(span % lb.delta[d], 0, "axis {d} span must be a multiple of delta");
        }
        assert_eq!(lb.hz_range(&p).expect("corners in range"), (4, 7));
    }

    #[test]
    fn test_align_snaps_inward() {
        let p = pattern("V012012");
        // Level 4 has delta 2 on every axis. x in [1,3] with origin x = 1
        // keeps both ends; y in [1,2] has origin 0, so it snaps to [2,2].
        let query = GridBox::new([1, 1, 0, 0, 0], [3, 2, 3, 0, 0]);
        let lb = *align(&p, &query, 4)
            .expect("level in range")
            .as_level_box()
            .expect("non-empty");
        assert_eq!(lb.bounds.lower[0], 1);
        assert_eq!(lb.bounds.upper[0], 3);
        assert_eq!(lb.bounds.lower[1], 2);
        assert_eq!(lb.bounds.upper[1], 2);
    }

    #[test]
    fn test_align_returns_sentinel_when_empty() {
        let p = pattern("V012012");
        // Level 1 holds the single sample (2, 0, 0).
        let query = GridBox::new([1, 0, 0, 0, 0], [1, 3, 3, 0, 0]);
        assert_eq!(align(&p, &query, 1).expect("level"), AlignedBox::Invalid);
        assert_eq!(align(&p, &GridBox::EMPTY, 2).expect("level"), AlignedBox::Invalid);
        assert!(align(&p, &query, 9).is_err());
    }

    #[test]
    fn test_level_zero_is_origin_only() {
        let p = pattern("V0101");
        let query = GridBox::from_offset_size([0; 5], [4, 4, 1, 1, 1]);
        let lb = *align(&p, &query, 0)
            .expect("level")
            .as_level_box()
            .expect("origin is inside");
        assert_eq!(lb.sample_count(), 1);
        let off_origin = GridBox::new([1, 0, 0, 0, 0], [3, 3, 0, 0, 0]);
        assert!(!align(&p, &off_origin, 0).expect("level").is_valid());
    }

    proptest! {
        #[test]
        fn prop_curve_extents_tile_the_domain(p in pattern_strategy()) {
            let mut next = 0_u64;
            for level in 0..=p.max_level() {
                let (start, end) = curve_extent_at_level(&p, level).expect("level");
                prop_assert_eq!(start, next, "level {} must start where the previous ended", level);
                prop_assert!(start <= end);
                prop_assert_eq!(level_of(start), level);
                prop_assert_eq!(level_of(end), level);
                next = end + 1;
            }
            prop_assert_eq!(next, p.total_samples());
        }

        #[test]
        fn prop_aligned_count_matches_brute_force(
            lo in proptest::array::uniform3(0_i64..8),
            extent in proptest::array::uniform3(1_i64..8),
        ) {
            let p = pattern("V012012012");
            let upper = [
                (lo[0] + extent[0] - 1).min(7),
                (lo[1] + extent[1] - 1).min(7),
                (lo[2] + extent[2] - 1).min(7),
            ];
            let query = GridBox::new([lo[0], lo[1], lo[2], 0, 0], [upper[0], upper[1], upper[2], 0, 0]);
            for level in 0..=p.max_level() {
                let (lo_hz, hi_hz) = curve_extent_at_level(&p, level).expect("level");
                let mut inside = Vec::new();
                for hz in lo_hz..=hi_hz {
                    let c = hz_to_coord(&p, hz).expect("hz in range");
                    if query.contains(&c) {
                        inside.push(hz);
                    }
                }
                match align(&p, &query, level).expect("level") {
                    AlignedBox::Invalid => prop_assert!(inside.is_empty()),
                    AlignedBox::Aligned(lb) => {
                        prop_assert_eq!(lb.sample_count(), inside.len() as u64);
                        let (start, end) = lb.hz_range(&p).expect("corners in range");
                        prop_assert_eq!(Some(&start), inside.first());
                        prop_assert_eq!(Some(&end), inside.last());
                    }
                }
            }
        }
    }
}
