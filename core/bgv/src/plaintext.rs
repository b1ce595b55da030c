use serde::{Deserialize, Serialize};
use std::fmt;
use strum_macros::{Display, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display)]
pub enum Encoding {
    /// One value per NTT slot modulo `t`; ring products act slot-wise.
    #[strum(serialize = "packed")]
    Packed,
    /// Values are the polynomial coefficients.
    #[strum(serialize = "coef_packed")]
    CoefPacked,
}

/// An encoded message of `Z_t[X]/(X^N + 1)`.
///
/// `coeffs` always holds the `N` centered coefficients of the encoded
/// polynomial, `values` the decoded values in the centered range `(-t/2, t/2]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plaintext {
    pub(crate) encoding: Encoding,
    pub(crate) coeffs: Vec<i64>,
    pub(crate) values: Vec<i64>,
    pub(crate) length: usize,
}

impl Plaintext {
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// The first `len()` decoded values.
    pub fn values(&self) -> &[i64] {
        &self.values[..self.length]
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Restricts the visible values to the first `length`; clamped to the ring dimension.
    pub fn set_length(&mut self, length: usize) {
        self.length = length.min(self.values.len());
    }
}

impl fmt::Display for Plaintext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for v in self.values() {
            write!(f, " {v},")?;
        }
        write!(f, " ... )")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_length_and_display() {
        let mut pt = Plaintext {
            encoding: Encoding::CoefPacked,
            coeffs: vec![1, -2, 3, 0],
            values: vec![1, -2, 3, 0],
            length: 4,
        };
        pt.set_length(2);
        assert_eq!(pt.values(), &[1, -2]);
        assert_eq!(pt.to_string(), "( 1, -2, ... )");
        pt.set_length(100);
        assert_eq!(pt.len(), 4);
        assert!(!pt.is_empty());
    }
}
