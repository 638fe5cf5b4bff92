//! # Validation Network
//!
//! Freshness as a distributed question. Validators hold fragment metadata
//! (never ciphertext), answer "is fragment F still fresh at time t?" from
//! their own records and their own clocks, and the [`QuorumClient`]
//! aggregates their verdicts into one majority decision with bounded
//! timeouts and conservative tie-breaking.
//!
//! The split between [`node`] and [`quorum`] mirrors the trust boundary:
//! a validator is an independent party with its own view of time; the
//! quorum client is engine-side plumbing that must assume any minority of
//! validators can be down, slow, or skewed.

pub mod node;
pub mod quorum;

pub use node::{
    FreshnessRequest, FreshnessVerdict, LocalValidator, ValidationError, Validator,
};
pub use quorum::{QuorumClient, QuorumConfig, QuorumDecision};
