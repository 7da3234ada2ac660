//! Per-variable sample layout.

use std::fmt;
use std::str::FromStr;

use pidx_error::{PidxError, Result};
use serde::{Deserialize, Serialize};

/// Byte layout of one variable's samples.
///
/// A sample is `values_per_sample` consecutive values of `bytes_per_value`
/// bytes each (e.g. a 3-component `float32` vector is 4 x 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataType {
    pub bytes_per_value: usize,
    pub values_per_sample: usize,
}

impl DataType {
    /// Single `float32` value per sample.
    pub const FLOAT32: Self = Self::new_unchecked(4, 1);
    /// Single `float64` value per sample.
    pub const FLOAT64: Self = Self::new_unchecked(8, 1);
    /// Single `int32` value per sample.
    pub const INT32: Self = Self::new_unchecked(4, 1);
    /// Single `uint8` value per sample.
    pub const UINT8: Self = Self::new_unchecked(1, 1);
    /// Three `float32` components per sample.
    pub const POINT3: Self = Self::new_unchecked(4, 3);

    const fn new_unchecked(bytes_per_value: usize, values_per_sample: usize) -> Self {
        Self {
            bytes_per_value,
            values_per_sample,
        }
    }

    /// Validated constructor; both components must be nonzero.
    pub fn new(bytes_per_value: usize, values_per_sample: usize) -> Result<Self> {
        if bytes_per_value == 0 || values_per_sample == 0 {
            return Err(PidxError::precondition(format!(
                "datatype needs nonzero sizes, got {bytes_per_value} bytes x {values_per_sample} values"
            )));
        }
        Ok(Self::new_unchecked(bytes_per_value, values_per_sample))
    }

    /// Bytes occupied by one whole sample.
    #[must_use]
    pub const fn bytes_per_sample(&self) -> usize {
        self.bytes_per_value * self.values_per_sample
    }
}

impl FromStr for DataType {
    type Err = PidxError;

    /// Parse the IDX type notation, e.g. `"float32[3]"` or `"int64"`.
    fn from_str(s: &str) -> Result<Self> {
        let (name, count) = match s.split_once('[') {
            Some((name, rest)) => {
                let digits = rest.strip_suffix(']').ok_or_else(|| bad_type(s))?;
                let count = digits.parse::<usize>().map_err(|_| bad_type(s))?;
                (name, count)
            }
            None => (s, 1),
        };
        let bytes = match name {
            "int8" | "uint8" => 1,
            "int16" | "uint16" => 2,
            "int32" | "uint32" | "float32" => 4,
            "int64" | "uint64" | "float64" => 8,
            _ => return Err(bad_type(s)),
        };
        Self::new(bytes, count)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.bytes_per_value, self.values_per_sample)
    }
}

fn bad_type(s: &str) -> PidxError {
    PidxError::precondition(format!("unrecognised datatype '{s}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_idx_type_names() {
        assert_eq!("float32[1]".parse::<DataType>().expect("parse"), DataType::FLOAT32);
        assert_eq!("float64".parse::<DataType>().expect("parse"), DataType::FLOAT64);
        assert_eq!("float32[3]".parse::<DataType>().expect("parse"), DataType::POINT3);
        assert_eq!(
            "uint16[4]".parse::<DataType>().expect("parse").bytes_per_sample(),
            8
        );
        for bad in ["complex64", "float32[", "float32[x]", "float32[0]"] {
            assert!(bad.parse::<DataType>().is_err(), "{bad} should fail");
        }
    }

    #[test]
    fn test_new_rejects_zero() {
        assert!(DataType::new(0, 1).is_err());
        assert!(DataType::new(4, 0).is_err());
        assert_eq!(DataType::new(8, 2).expect("valid").bytes_per_sample(), 16);
    }
}
