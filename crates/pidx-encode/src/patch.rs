//! Raw row-major sample boxes.

use pidx_error::{PidxError, Result};
use pidx_types::{Coord, DataType, GridBox};

/// One variable's samples over an axis-aligned box, row-major with x
/// fastest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patch {
    region: GridBox,
    datatype: DataType,
    data: Vec<u8>,
}

impl Patch {
    /// Wrap existing bytes; the length must match the region volume.
    pub fn new(region: GridBox, datatype: DataType, data: Vec<u8>) -> Result<Self> {
        region.validate()?;
        let expected = region.volume() as usize * datatype.bytes_per_sample();
        if data.len() != expected {
            return Err(PidxError::precondition(format!(
                "patch data holds {} bytes, region {:?} x {datatype} needs {expected}",
                data.len(),
                region.size()
            )));
        }
        Ok(Self {
            region,
            datatype,
            data,
        })
    }

    /// Zero-filled patch, typically the target of a read.
    pub fn zeroed(region: GridBox, datatype: DataType) -> Result<Self> {
        region.validate()?;
        let len = region.volume() as usize * datatype.bytes_per_sample();
        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|e| PidxError::allocation("patch buffer", len, e))?;
        data.resize(len, 0);
        Ok(Self {
            region,
            datatype,
            data,
        })
    }

    /// Build a patch by asking `fill` for each sample's bytes.
    pub fn from_fn(
        region: GridBox,
        datatype: DataType,
        mut fill: impl FnMut(&Coord, &mut [u8]),
    ) -> Result<Self> {
        let mut patch = Self::zeroed(region, datatype)?;
        let bps = datatype.bytes_per_sample();
        for (coord, sample) in region.points().zip(patch.data.chunks_exact_mut(bps)) {
            fill(&coord, sample);
        }
        Ok(patch)
    }

    #[must_use]
    pub const fn region(&self) -> &GridBox {
        &self.region
    }

    #[must_use]
    pub const fn datatype(&self) -> DataType {
        self.datatype
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    #[must_use]
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Bytes of the sample at `coord`, if it lies inside the patch.
    #[must_use]
    pub fn sample(&self, coord: &Coord) -> Option<&[u8]> {
        let bps = self.datatype.bytes_per_sample();
        let index = self.region.linear_index(coord)? as usize;
        self.data.get(index * bps..(index + 1) * bps)
    }
}
