use rand::{CryptoRng, Rng};

/// Samples `n` coefficients from the NewHope distribution with bound `bound`:
/// each coefficient is `sum(a_i) - sum(b_i)` over `bound` pairs of random bits,
/// so it lies in `[-bound, bound]`.
pub(crate) fn new_hope_sample<R: Rng + CryptoRng>(rng: &mut R, bound: usize, n: usize) -> Vec<i64> {
    debug_assert!(bound <= 32);
    let mask = if bound == 32 {
        u32::MAX
    } else {
        (1u32 << bound) - 1
    };
    (0..n)
        .map(|_| {
            let bits = rng.next_u64();
            let a = (bits as u32 & mask).count_ones() as i64;
            let b = ((bits >> 32) as u32 & mask).count_ones() as i64;
            a - b
        })
        .collect()
}

/// Samples `n` coefficients uniformly from `[0, q)`.
pub(crate) fn uniform_sample<R: Rng + CryptoRng>(rng: &mut R, q: u64, n: usize) -> Vec<u64> {
    (0..n).map(|_| rng.gen_range(0..q)).collect()
}
