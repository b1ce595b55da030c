//! Word-sized modular arithmetic.
//!
//! All moduli handled here are below 2^61, so a sum of two reduced
//! operands never overflows a `u64` and products are reduced through `u128`.

/// Bases for which Miller-Rabin is deterministic over the whole `u64` range.
const MILLER_RABIN_BASES: [u64; 12] = [2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37];

#[inline]
pub(crate) fn add_mod(a: u64, b: u64, q: u64) -> u64 {
    let s = a + b;
    if s >= q {
        s - q
    } else {
        s
    }
}

#[inline]
pub(crate) fn sub_mod(a: u64, b: u64, q: u64) -> u64 {
    if a >= b {
        a - b
    } else {
        a + q - b
    }
}

#[inline]
pub(crate) fn neg_mod(a: u64, q: u64) -> u64 {
    if a == 0 {
        0
    } else {
        q - a
    }
}

#[inline]
pub(crate) fn mul_mod(a: u64, b: u64, q: u64) -> u64 {
    ((a as u128 * b as u128) % q as u128) as u64
}

pub(crate) fn pow_mod(base: u64, mut exp: u64, q: u64) -> u64 {
    let mut acc = 1 % q;
    let mut base = base % q;
    while exp > 0 {
        if exp & 1 == 1 {
            acc = mul_mod(acc, base, q);
        }
        base = mul_mod(base, base, q);
        exp >>= 1;
    }
    acc
}

/// Inverse modulo a prime `q` (Fermat).
pub(crate) fn inv_mod(a: u64, q: u64) -> u64 {
    pow_mod(a, q - 2, q)
}

/// Maps a signed value to its representative in `[0, q)`.
#[inline]
pub(crate) fn lift(x: i64, q: u64) -> u64 {
    let r = x.unsigned_abs() % q;
    if x < 0 {
        neg_mod(r, q)
    } else {
        r
    }
}

/// Maps a representative in `[0, q)` to the centered range `(-q/2, q/2]`.
#[inline]
pub(crate) fn center(x: u64, q: u64) -> i64 {
    if x > q / 2 {
        -((q - x) as i64)
    } else {
        x as i64
    }
}

/// Number of significant bits of `x`.
pub(crate) fn bit_length(x: u64) -> u32 {
    u64::BITS - x.leading_zeros()
}

/// Deterministic Miller-Rabin primality test for 64-bit integers.
pub fn is_prime(n: u64) -> bool {
    if n < 2 {
        return false;
    }
    for p in MILLER_RABIN_BASES {
        if n % p == 0 {
            return n == p;
        }
    }

    let mut d = n - 1;
    let mut s = 0;
    while d % 2 == 0 {
        d /= 2;
        s += 1;
    }

    'bases: for a in MILLER_RABIN_BASES {
        let mut x = pow_mod(a, d, n);
        if x == 1 || x == n - 1 {
            continue;
        }
        for _ in 1..s {
            x = mul_mod(x, x, n);
            if x == n - 1 {
                continue 'bases;
            }
        }
        return false;
    }
    true
}

/// Finds a primitive `order`-th root of unity modulo the prime `q`,
/// where `order` is a power of two dividing `q - 1`.
pub(crate) fn primitive_root_of_unity(order: u64, q: u64) -> Option<u64> {
    if order < 2 || !order.is_power_of_two() || (q - 1) % order != 0 {
        return None;
    }
    let cofactor = (q - 1) / order;
    // psi has order exactly `order` iff psi^(order/2) = -1
    (2..q).take(1 << 16).find_map(|x| {
        let psi = pow_mod(x, cofactor, q);
        (pow_mod(psi, order / 2, q) == q - 1).then_some(psi)
    })
}
