use rand::{CryptoRng, Rng};
use serde::{Deserialize, Serialize};

use crate::arith::{add_mod, center, lift, mul_mod, neg_mod, sub_mod};
use crate::error::BgvError;
use crate::ntt::NttTable;
use crate::sampling::uniform_sample;

/// The RNS basis `q_0, ..., q_L` of a ciphertext ring together with one NTT
/// table per tower.
#[derive(Debug, Clone)]
pub(crate) struct RnsBasis {
    ring_dim: usize,
    tables: Vec<NttTable>,
}

impl RnsBasis {
    pub(crate) fn new(moduli: &[u64], ring_dim: usize) -> Result<Self, BgvError> {
        let tables = moduli
            .iter()
            .map(|q| NttTable::new(*q, ring_dim))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { ring_dim, tables })
    }

    pub(crate) fn ring_dim(&self) -> usize {
        self.ring_dim
    }

    pub(crate) fn num_towers(&self) -> usize {
        self.tables.len()
    }

    pub(crate) fn moduli(&self) -> impl Iterator<Item = u64> + '_ {
        self.tables.iter().map(|t| t.modulus())
    }
}

/// An element of `Z_Q[X]/(X^N + 1)` with `Q = q_0 * ... * q_L`, kept in
/// evaluation (NTT) form, one vector per tower.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct RnsPoly {
    towers: Vec<Vec<u64>>,
}

impl RnsPoly {
    pub(crate) fn zero(basis: &RnsBasis) -> Self {
        Self {
            towers: vec![vec![0; basis.ring_dim()]; basis.num_towers()],
        }
    }

    /// Builds the polynomial with the given small signed coefficients.
    pub(crate) fn from_signed(basis: &RnsBasis, coeffs: &[i64]) -> Self {
        let towers = basis
            .tables
            .iter()
            .map(|table| {
                let q = table.modulus();
                let mut tower: Vec<u64> = coeffs.iter().map(|c| lift(*c, q)).collect();
                tower.resize(basis.ring_dim(), 0);
                table.forward(&mut tower);
                tower
            })
            .collect();
        Self { towers }
    }

    /// Uniform element of the ring. The NTT is a bijection, so sampling
    /// directly in evaluation form is uniform as well.
    pub(crate) fn uniform<R: Rng + CryptoRng>(basis: &RnsBasis, rng: &mut R) -> Self {
        let towers = basis
            .tables
            .iter()
            .map(|table| uniform_sample(rng, table.modulus(), basis.ring_dim()))
            .collect();
        Self { towers }
    }

    fn zip_with(&self, other: &Self, basis: &RnsBasis, f: fn(u64, u64, u64) -> u64) -> Self {
        let towers = self
            .towers
            .iter()
            .zip(other.towers.iter())
            .zip(basis.tables.iter())
            .map(|((x, y), table)| {
                let q = table.modulus();
                x.iter().zip(y.iter()).map(|(a, b)| f(*a, *b, q)).collect()
            })
            .collect();
        Self { towers }
    }

    pub(crate) fn add(&self, other: &Self, basis: &RnsBasis) -> Self {
        self.zip_with(other, basis, add_mod)
    }

    pub(crate) fn sub(&self, other: &Self, basis: &RnsBasis) -> Self {
        self.zip_with(other, basis, sub_mod)
    }

    pub(crate) fn mul(&self, other: &Self, basis: &RnsBasis) -> Self {
        self.zip_with(other, basis, mul_mod)
    }

    pub(crate) fn neg(&self, basis: &RnsBasis) -> Self {
        let towers = self
            .towers
            .iter()
            .zip(basis.tables.iter())
            .map(|(x, table)| {
                let q = table.modulus();
                x.iter().map(|a| neg_mod(*a, q)).collect()
            })
            .collect();
        Self { towers }
    }

    pub(crate) fn scalar_mul(&self, scalar: u64, basis: &RnsBasis) -> Self {
        let towers = self
            .towers
            .iter()
            .zip(basis.tables.iter())
            .map(|(x, table)| {
                let q = table.modulus();
                let s = scalar % q;
                x.iter().map(|a| mul_mod(*a, s, q)).collect()
            })
            .collect();
        Self { towers }
    }

    /// Centered coefficients of the first tower. Only meaningful when every
    /// coefficient is smaller than `q_0 / 2` in absolute value.
    pub(crate) fn centered_coeffs_first_tower(&self, basis: &RnsBasis) -> Vec<i64> {
        let table = &basis.tables[0];
        let q = table.modulus();
        let mut tower = self.towers[0].clone();
        table.backward(&mut tower);
        tower.into_iter().map(|c| center(c, q)).collect()
    }

    /// Checks that the shape of a deserialized polynomial matches `basis`
    /// and that all residues are reduced.
    pub(crate) fn check_shape(&self, basis: &RnsBasis) -> Result<(), BgvError> {
        if self.towers.len() != basis.num_towers() {
            return Err(BgvError::Deserialization(format!(
                "polynomial has {} towers, expected {}",
                self.towers.len(),
                basis.num_towers()
            )));
        }
        for (tower, q) in self.towers.iter().zip(basis.moduli()) {
            if tower.len() != basis.ring_dim() {
                return Err(BgvError::Deserialization(format!(
                    "polynomial tower has {} coefficients, expected {}",
                    tower.len(),
                    basis.ring_dim()
                )));
            }
            if tower.iter().any(|c| *c >= q) {
                return Err(BgvError::Deserialization(format!(
                    "polynomial residue is not reduced modulo {q}"
                )));
            }
        }
        Ok(())
    }
}
