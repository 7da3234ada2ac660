//! Hierarchical Z-order (HZ) addressing.
//!
//! [`zorder`] maps grid coordinates to HZ indices and back; [`align`] carves
//! a box into the sub-lattice that belongs to one resolution level.

pub mod align;
pub mod zorder;

pub use align::{AlignedBox, LevelBox, align, curve_extent_at_level, level_delta, level_z_range};
pub use zorder::{coord_to_hz, deinterleave, hz_to_coord, level_of};
