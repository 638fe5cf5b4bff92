//! # Threshold Secret Sharing
//!
//! The arithmetic core of the Fragmentation Controller: Shamir's scheme over
//! GF(256). A secret is split into `n` share points with threshold `k`; any
//! `k` points reconstruct the secret exactly, and any `k - 1` points carry
//! zero information about it — not "computationally hard to extract", but
//! information-theoretically absent. The time-lock layer upstairs is
//! defense-in-depth; this layer is the actual secrecy guarantee.
//!
//! ## Mechanics
//!
//! Per byte of the secret: draw a uniform polynomial of degree `k - 1` over
//! GF(256) with the secret byte as constant term, then evaluate it at the
//! nonzero points x = 1..=n. Share `i` is the column of evaluations at
//! x = i. Reconstruction is Lagrange interpolation at x = 0, byte by byte.
//!
//! Because every byte is its own independent field block, shares are exactly
//! secret-length and splitting never needs a chunking pass. The original
//! secret length travels in the session record, not in the share bytes.
//!
//! Polynomial coefficients come from the OS CSPRNG. A predictable
//! coefficient collapses the scheme from "provably nothing" to "one linear
//! equation short of everything", so no, a seeded PRNG is not acceptable
//! here even for tests.

pub mod gf256;

use rand::RngCore;
use thiserror::Error;

use crate::config::MAX_SHARES;

/// Errors from the sharing layer.
///
/// Policy-level validation (`k > n` and friends) happens upstream in
/// [`FragmentationPolicy::validate`](crate::fragment::FragmentationPolicy);
/// these are the arithmetic layer's own guards, kept independent so the
/// module stands alone.
#[derive(Debug, Error)]
pub enum ShareError {
    /// The secret is empty — nothing to split.
    #[error("secret must not be empty")]
    EmptySecret,

    /// Threshold of zero shares can't gate anything.
    #[error("threshold must be at least 1")]
    ZeroThreshold,

    /// Threshold exceeds the number of shares being produced.
    #[error("threshold {threshold} exceeds share count {shares}")]
    ThresholdExceedsShares {
        /// Requested reconstruction threshold.
        threshold: u8,
        /// Requested total share count.
        shares: u8,
    },

    /// Fewer points supplied than the stated threshold.
    #[error("{supplied} share(s) supplied, {required} required")]
    BelowThreshold {
        /// Points actually supplied.
        supplied: usize,
        /// The session threshold.
        required: usize,
    },

    /// Share payloads disagree on length — they cannot be from one split.
    #[error("share length mismatch: expected {expected} bytes, got {got}")]
    LengthMismatch {
        /// Length of the first share.
        expected: usize,
        /// Length of the offending share.
        got: usize,
    },

    /// The same evaluation point appeared twice (or x = 0 was supplied,
    /// which would be the secret itself, not a share).
    #[error("invalid or duplicate share index {0}")]
    BadShareIndex(u8),
}

/// One evaluation point of the sharing polynomial: the share at x-coordinate
/// `index` with one byte of `data` per byte of the original secret.
///
/// A `SharePoint` in isolation is indistinguishable from uniform random
/// bytes. That's the whole point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharePoint {
    /// The x-coordinate, 1-based. Zero is reserved — p(0) is the secret.
    pub index: u8,
    /// Evaluations of the per-byte polynomials at `index`.
    pub data: Vec<u8>,
}

/// Split `secret` into `shares` points with reconstruction threshold
/// `threshold`.
///
/// `threshold == 1` is accepted and degenerates to replication: the
/// polynomial has degree 0, every share equals the secret. The time-lock
/// layer is then the only protection, which is exactly what a 1-of-n
/// policy asks for.
pub fn split(secret: &[u8], threshold: u8, shares: u8) -> Result<Vec<SharePoint>, ShareError> {
    if secret.is_empty() {
        return Err(ShareError::EmptySecret);
    }
    if threshold == 0 {
        return Err(ShareError::ZeroThreshold);
    }
    if threshold > shares {
        return Err(ShareError::ThresholdExceedsShares { threshold, shares });
    }
    debug_assert!(shares <= MAX_SHARES);

    let mut out: Vec<SharePoint> = (1..=shares)
        .map(|index| SharePoint {
            index,
            data: Vec::with_capacity(secret.len()),
        })
        .collect();

    let mut rng = rand::rngs::OsRng;
    let mut coeffs = vec![0u8; threshold as usize];

    for &secret_byte in secret {
        coeffs[0] = secret_byte;
        rng.fill_bytes(&mut coeffs[1..]);

        for point in out.iter_mut() {
            point.data.push(gf256::poly_eval(&coeffs, point.index));
        }
    }

    Ok(out)
}

/// Reconstruct the secret from at least `threshold` share points.
///
/// Exactly `threshold` points are used; extras are ignored. The caller
/// states the threshold explicitly — the points themselves cannot prove
/// what degree polynomial they came from, and interpolating with too few
/// points yields well-formed garbage rather than an error. Integrity is
/// the gate's checksum step, not this function's job.
pub fn combine(
    points: &[SharePoint],
    threshold: usize,
    secret_len: usize,
) -> Result<Vec<u8>, ShareError> {
    if points.len() < threshold || threshold == 0 {
        return Err(ShareError::BelowThreshold {
            supplied: points.len(),
            required: threshold,
        });
    }

    let used = &points[..threshold];

    let mut seen = [false; 256];
    for p in used {
        if p.index == 0 || seen[p.index as usize] {
            return Err(ShareError::BadShareIndex(p.index));
        }
        seen[p.index as usize] = true;

        if p.data.len() != secret_len {
            return Err(ShareError::LengthMismatch {
                expected: secret_len,
                got: p.data.len(),
            });
        }
    }

    let mut secret = Vec::with_capacity(secret_len);
    let mut column: Vec<(u8, u8)> = Vec::with_capacity(threshold);

    for byte_idx in 0..secret_len {
        column.clear();
        column.extend(used.iter().map(|p| (p.index, p.data[byte_idx])));
        secret.push(gf256::interpolate_at_zero(&column));
    }

    Ok(secret)
}
