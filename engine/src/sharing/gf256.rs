//! Arithmetic over GF(2^8) with the AES irreducible polynomial
//! `x^8 + x^4 + x^3 + x + 1` (0x11B).
//!
//! Multiplication and division go through compile-time log/exp tables keyed
//! to the generator 3, which generates the full multiplicative group of
//! order 255. Addition is XOR — characteristic 2 means addition and
//! subtraction are the same operation, which simplifies Lagrange
//! interpolation considerably.

/// The field modulus as a 9-bit polynomial.
const POLY: u16 = 0x11B;

/// Exp table over two periods so `mul` can index `log(a) + log(b)` without
/// reducing mod 255 first.
const EXP: [u8; 512] = {
    let mut t = [0u8; 512];
    let mut x: u16 = 1;
    let mut i = 0;
    while i < 255 {
        t[i] = x as u8;
        t[i + 255] = x as u8;
        // x *= 3 in the field: 3x = 2x + x, reduce if we overflow 8 bits.
        x = (x << 1) ^ x;
        if x & 0x100 != 0 {
            x ^= POLY;
        }
        i += 1;
    }
    t[510] = t[0];
    t[511] = t[1];
    t
};

/// Discrete log table, inverse of `EXP`. `LOG[0]` is unused — zero has no
/// logarithm, and `mul`/`div` special-case it before indexing.
const LOG: [u8; 256] = {
    let mut t = [0u8; 256];
    let mut i = 0;
    while i < 255 {
        t[EXP[i] as usize] = i as u8;
        i += 1;
    }
    t
};

/// Field addition. XOR, nothing more.
#[inline]
pub fn add(a: u8, b: u8) -> u8 {
    a ^ b
}

/// Field multiplication via log/exp tables.
#[inline]
pub fn mul(a: u8, b: u8) -> u8 {
    if a == 0 || b == 0 {
        return 0;
    }
    EXP[LOG[a as usize] as usize + LOG[b as usize] as usize]
}

/// Multiplicative inverse. Panics on zero — callers guarantee nonzero
/// denominators (share indices are drawn from 1..=255).
#[inline]
pub fn inv(a: u8) -> u8 {
    assert!(a != 0, "zero has no inverse in GF(256)");
    EXP[255 - LOG[a as usize] as usize]
}

/// Field division, `a / b`. Panics if `b` is zero.
#[inline]
pub fn div(a: u8, b: u8) -> u8 {
    mul(a, inv(b))
}

/// Evaluate a polynomial at `x` by Horner's rule. `coeffs[0]` is the
/// constant term.
pub fn poly_eval(coeffs: &[u8], x: u8) -> u8 {
    coeffs.iter().rev().fold(0, |acc, &c| add(mul(acc, x), c))
}

/// Lagrange interpolation of the unique degree-`(points.len()-1)` polynomial
/// through `points`, evaluated at x = 0.
///
/// Evaluating at zero is exactly secret recovery: the constant term of the
/// sharing polynomial. In characteristic 2 the basis simplifies to
/// `L_i(0) = Π x_j / (x_i + x_j)` over `j ≠ i`.
pub fn interpolate_at_zero(points: &[(u8, u8)]) -> u8 {
    let mut acc = 0u8;
    for (i, &(xi, yi)) in points.iter().enumerate() {
        let mut num = 1u8;
        let mut den = 1u8;
        for (j, &(xj, _)) in points.iter().enumerate() {
            if i == j {
                continue;
            }
            num = mul(num, xj);
            den = mul(den, add(xi, xj));
        }
        acc = add(acc, mul(yi, div(num, den)));
    }
    acc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_self_is_zero() {
        for a in 0..=255u8 {
            assert_eq!(add(a, a), 0);
        }
    }

    #[test]
    fn one_is_multiplicative_identity() {
        for a in 0..=255u8 {
            assert_eq!(mul(a, 1), a);
            assert_eq!(mul(1, a), a);
        }
    }

    #[test]
    fn mul_commutes() {
        for a in (0..=255u8).step_by(7) {
            for b in (0..=255u8).step_by(11) {
                assert_eq!(mul(a, b), mul(b, a));
            }
        }
    }

    #[test]
    fn inverse_round_trips() {
        for a in 1..=255u8 {
            assert_eq!(mul(a, inv(a)), 1);
            assert_eq!(div(mul(a, 0x53), 0x53), a);
        }
    }

    #[test]
    fn mul_distributes_over_add() {
        for a in (0..=255u8).step_by(13) {
            for b in (0..=255u8).step_by(17) {
                for c in (0..=255u8).step_by(19) {
                    assert_eq!(mul(a, add(b, c)), add(mul(a, b), mul(a, c)));
                }
            }
        }
    }

    #[test]
    fn poly_eval_constant_ignores_x() {
        assert_eq!(poly_eval(&[0x9C], 0), 0x9C);
        assert_eq!(poly_eval(&[0x9C], 77), 0x9C);
    }

    #[test]
    fn poly_eval_at_zero_is_constant_term() {
        assert_eq!(poly_eval(&[0x42, 0xAA, 0x17], 0), 0x42);
    }

    #[test]
    fn interpolation_recovers_known_polynomial() {
        // p(x) = 0x5A + 0x21·x + 0x0D·x² — sample three points, interpolate
        // back to the constant term.
        let coeffs = [0x5A, 0x21, 0x0D];
        let points: Vec<(u8, u8)> = [3u8, 9, 140]
            .iter()
            .map(|&x| (x, poly_eval(&coeffs, x)))
            .collect();
        assert_eq!(interpolate_at_zero(&points), 0x5A);
    }

    #[test]
    fn interpolation_of_flat_line() {
        let points = [(1, 0xEE), (2, 0xEE), (3, 0xEE)];
        assert_eq!(interpolate_at_zero(&points), 0xEE);
    }
}
