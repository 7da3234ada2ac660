//! Per-level axis assignment for the hierarchical Z-order curve.
//!
//! A bit pattern is written as `V` followed by one axis digit per resolution
//! level, coarsest first: `"V012012"` splits x, then y, then z, twice. The
//! pattern is fixed for the lifetime of a dataset and is the only thing the
//! transcoder consults to know which axis owns a given Z-order bit.

use std::fmt;

use pidx_error::{PidxError, Result};
use serde::{Deserialize, Serialize};

use crate::geometry::{Coord, MAX_DIMENSIONS};

/// Leading marker character of every textual bit pattern.
pub const PATTERN_MARKER: char = 'V';

/// Upper bound on resolution levels. HZ indices are `u64` and the sentinel
/// bit sits at position `max_level`.
pub const MAX_LEVELS: u32 = 62;

/// Resolved per-level axis table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BitPattern {
    /// `axes[i]` is the axis split at level `i + 1`.
    axes: Vec<u8>,
}

/// How [`BitPattern::guess`] picks the next axis to split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AxisPriority {
    /// Halve the currently largest axis; ties go to the earliest axis in
    /// `order`.
    Interleaved { order: [usize; 3] },
    /// Exhaust each axis completely, in `order`.
    Major { order: [usize; 3] },
}

impl AxisPriority {
    /// Z, then Y, then X on ties.
    pub const ZYX: Self = Self::Interleaved { order: [2, 1, 0] };
    /// Y, then X, then Z on ties.
    pub const YXZ: Self = Self::Interleaved { order: [1, 0, 2] };
    /// X, then Z, then Y on ties.
    pub const XZY: Self = Self::Interleaved { order: [0, 2, 1] };
    /// All X splits first, then Y, then Z.
    pub const X_MAJOR: Self = Self::Major { order: [0, 1, 2] };
    /// All Y splits first, then X, then Z.
    pub const Y_MAJOR: Self = Self::Major { order: [1, 0, 2] };
    /// All Z splits first, then Y, then X.
    pub const Z_MAJOR: Self = Self::Major { order: [2, 1, 0] };
}

impl Default for AxisPriority {
    fn default() -> Self {
        Self::ZYX
    }
}

impl BitPattern {
    /// Build from an explicit axis table (`axes[0]` is level 1).
    pub fn from_axes(axes: Vec<u8>) -> Result<Self> {
        let rendered = render(&axes);
        if axes.is_empty() {
            return Err(invalid(&rendered, "pattern has no levels"));
        }
        if axes.len() > MAX_LEVELS as usize {
            return Err(invalid(
                &rendered,
                format!("{} levels exceeds the maximum of {MAX_LEVELS}", axes.len()),
            ));
        }
        if let Some(bad) = axes.iter().find(|&&a| usize::from(a) >= MAX_DIMENSIONS) {
            return Err(invalid(&rendered, format!("axis {bad} is not below {MAX_DIMENSIONS}")));
        }
        Ok(Self { axes })
    }

    /// Parse a literal pattern such as `"V012012"`.
    pub fn parse(text: &str) -> Result<Self> {
        if text.contains('{') {
            return Err(invalid(
                text,
                "repeating groups need an explicit level count, see parse_with_levels",
            ));
        }
        let body = strip_marker(text)?;
        let axes = body
            .chars()
            .map(|c| axis_digit(text, c))
            .collect::<Result<Vec<_>>>()?;
        Self::from_axes(axes)
    }

    /// Parse a pattern that may end in a repeating group, e.g.
    /// `"V01{012}"`, expanding it to exactly `max_level` levels.
    pub fn parse_with_levels(text: &str, max_level: u32) -> Result<Self> {
        let body = strip_marker(text)?;
        let Some(open) = body.find('{') else {
            let pattern = Self::parse(text)?;
            if pattern.max_level() != max_level {
                return Err(invalid(
                    text,
                    format!("has {} levels, expected {max_level}", pattern.max_level()),
                ));
            }
            return Ok(pattern);
        };
        let close = body
            .find('}')
            .filter(|&c| c > open + 1)
            .ok_or_else(|| invalid(text, "unterminated or empty repeating group"))?;
        if close + 1 != body.len() {
            return Err(invalid(text, "repeating group must close the pattern"));
        }
        let prefix = body[..open]
            .chars()
            .map(|c| axis_digit(text, c))
            .collect::<Result<Vec<_>>>()?;
        let group = body[open + 1..close]
            .chars()
            .map(|c| axis_digit(text, c))
            .collect::<Result<Vec<_>>>()?;

        let mut axes = Vec::with_capacity(max_level as usize);
        for n in 0..max_level as usize {
            if n < prefix.len() {
                axes.push(prefix[n]);
            } else {
                axes.push(group[(n - prefix.len()) % group.len()]);
            }
        }
        Self::from_axes(axes)
    }

    /// Derive a pattern from the dataset extent.
    ///
    /// Each dimension is rounded up to a power of two. Axes are then split
    /// one level at a time according to `priority` until every axis is 1.
    pub fn guess(dims: [u64; 3], priority: AxisPriority) -> Result<Self> {
        if dims.contains(&0) {
            return Err(PidxError::precondition(format!(
                "cannot guess a bit pattern for empty dimensions {dims:?}"
            )));
        }
        let mut pow2 = dims.map(u64::next_power_of_two);
        let mut axes = Vec::new();
        match priority {
            AxisPriority::Interleaved { order } => {
                while pow2.iter().any(|&d| d > 1) {
                    let max = pow2.iter().copied().max().unwrap_or(1);
                    let axis = order
                        .iter()
                        .copied()
                        .find(|&a| pow2[a] == max)
                        .ok_or_else(|| PidxError::internal("axis priority misses an axis"))?;
                    pow2[axis] /= 2;
                    axes.push(axis as u8);
                }
            }
            AxisPriority::Major { order } => {
                for axis in order {
                    while pow2[axis] > 1 {
                        pow2[axis] /= 2;
                        axes.push(axis as u8);
                    }
                }
            }
        }
        if axes.is_empty() {
            // A single-point dataset still needs one level to carry the sentinel.
            axes.push(0);
        }
        Self::from_axes(axes)
    }

    /// Number of resolution levels below the root.
    #[must_use]
    pub fn max_level(&self) -> u32 {
        self.axes.len() as u32
    }

    /// Axis split at `level`, for `1 <= level <= max_level`.
    ///
    /// # Panics
    /// Panics if `level` is 0 or above `max_level`; callers iterate within
    /// those bounds.
    #[must_use]
    pub fn axis_at(&self, level: u32) -> usize {
        usize::from(self.axes[level as usize - 1])
    }

    /// Axis table, coarsest level first.
    #[must_use]
    pub fn axes(&self) -> &[u8] {
        &self.axes
    }

    /// Power-of-two domain extent implied by the pattern on each axis.
    #[must_use]
    pub fn domain(&self) -> Coord {
        let mut dims = [1_u64; MAX_DIMENSIONS];
        for &axis in &self.axes {
            dims[usize::from(axis)] <<= 1;
        }
        dims
    }

    /// Total number of HZ addresses, `2^max_level`.
    #[must_use]
    pub fn total_samples(&self) -> u64 {
        1_u64 << self.max_level()
    }
}

impl fmt::Display for BitPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&render(&self.axes))
    }
}

impl TryFrom<String> for BitPattern {
    type Error = PidxError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<BitPattern> for String {
    fn from(value: BitPattern) -> Self {
        value.to_string()
    }
}

fn render(axes: &[u8]) -> String {
    let mut out = String::with_capacity(axes.len() + 1);
    out.push(PATTERN_MARKER);
    for &a in axes {
        out.push(char::from(b'0' + a.min(9)));
    }
    out
}

fn strip_marker(text: &str) -> Result<&str> {
    text.strip_prefix(PATTERN_MARKER)
        .ok_or_else(|| invalid(text, "missing leading 'V'"))
}

fn axis_digit(text: &str, c: char) -> Result<u8> {
    c.to_digit(10)
        .filter(|&d| (d as usize) < MAX_DIMENSIONS)
        .map(|d| d as u8)
        .ok_or_else(|| invalid(text, format!("'{c}' is not an axis digit")))
}

fn invalid(pattern: &str, detail: impl Into<String>) -> PidxError {
    PidxError::InvalidBitPattern {
        pattern: pattern.to_owned(),
        detail: detail.into(),
    }
}
