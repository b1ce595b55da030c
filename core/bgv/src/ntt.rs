use crate::arith::{add_mod, inv_mod, mul_mod, primitive_root_of_unity, sub_mod};
use crate::error::BgvError;

/// Precomputed twiddles for the negacyclic NTT of length `n` modulo `q`.
///
/// `forward` maps coefficients of `Z_q[X]/(X^n + 1)` to their evaluations at
/// the odd powers of a primitive `2n`-th root of unity `psi`, so products in
/// the ring become pointwise products. Twiddles are stored in bit-reversed
/// order (Cooley-Tukey forward, Gentleman-Sande backward).
#[derive(Debug, Clone)]
pub struct NttTable {
    q: u64,
    n: usize,
    psi_rev: Vec<u64>,
    psi_inv_rev: Vec<u64>,
    n_inv: u64,
}

impl NttTable {
    pub fn new(q: u64, n: usize) -> Result<Self, BgvError> {
        if n < 2 || !n.is_power_of_two() {
            return Err(BgvError::InvalidParameter(format!(
                "NTT length {n} is not a power of two greater than one"
            )));
        }
        let psi = primitive_root_of_unity(2 * n as u64, q).ok_or_else(|| {
            BgvError::InvalidParameter(format!(
                "modulus {q} has no primitive {}-th root of unity",
                2 * n
            ))
        })?;
        let psi_inv = inv_mod(psi, q);

        let log_n = n.trailing_zeros();
        let mut psi_rev = vec![0u64; n];
        let mut psi_inv_rev = vec![0u64; n];
        let mut power = 1u64;
        let mut power_inv = 1u64;
        for i in 0..n {
            let i_rev = i.reverse_bits() >> (usize::BITS - log_n);
            psi_rev[i_rev] = power;
            psi_inv_rev[i_rev] = power_inv;
            power = mul_mod(power, psi, q);
            power_inv = mul_mod(power_inv, psi_inv, q);
        }

        Ok(Self {
            q,
            n,
            psi_rev,
            psi_inv_rev,
            n_inv: inv_mod(n as u64 % q, q),
        })
    }

    pub fn modulus(&self) -> u64 {
        self.q
    }

    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    pub fn forward(&self, a: &mut [u64]) {
        debug_assert_eq!(a.len(), self.n);
        let q = self.q;
        let mut t = self.n;
        let mut m = 1;
        while m < self.n {
            t >>= 1;
            for i in 0..m {
                let j1 = 2 * i * t;
                let s = self.psi_rev[m + i];
                for j in j1..j1 + t {
                    let u = a[j];
                    let v = mul_mod(a[j + t], s, q);
                    a[j] = add_mod(u, v, q);
                    a[j + t] = sub_mod(u, v, q);
                }
            }
            m <<= 1;
        }
    }

    pub fn backward(&self, a: &mut [u64]) {
        debug_assert_eq!(a.len(), self.n);
        let q = self.q;
        let mut t = 1;
        let mut m = self.n;
        while m > 1 {
            let h = m >> 1;
            let mut j1 = 0;
            for i in 0..h {
                let s = self.psi_inv_rev[h + i];
                for j in j1..j1 + t {
                    let u = a[j];
                    let v = a[j + t];
                    a[j] = add_mod(u, v, q);
                    a[j + t] = mul_mod(sub_mod(u, v, q), s, q);
                }
                j1 += 2 * t;
            }
            t <<= 1;
            m = h;
        }
        for x in a.iter_mut() {
            *x = mul_mod(*x, self.n_inv, q);
        }
    }
}
