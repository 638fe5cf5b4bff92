// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # TESSERA — Temporal Fragmentation Security Engine
//!
//! TESSERA makes secrets mortal. A secret goes in, gets split into `n`
//! threshold shares, each share gets sealed under a time-lock, and from
//! that moment a clock is running that nobody — including us — can stop:
//! once the expiry passes, a background daemon destroys the trapdoors and
//! the ciphertext, and the secret is gone. Not "deleted pending a backup
//! restore" gone. Gone.
//!
//! ## The four layers of "gone"
//!
//! 1. **Information-theoretic sharing** — fewer than `k` shares carry zero
//!    bits about the secret. Not hard to extract; absent.
//! 2. **Time-locked shares** — each share is sealed under a key that lives
//!    in a vault until expiry and otherwise costs a calibrated amount of
//!    strictly sequential computation. Exfiltrating ciphertext early buys
//!    an attacker a bounded, budgeted head start and nothing more.
//! 3. **Enforced destruction** — a scheduled daemon destroys trapdoors,
//!    overwrites storage, and signs an audit record for every purge.
//!    Unconfirmed deletions escalate; they never rot in a log file.
//! 4. **Quorum-verified freshness** — reconstruction consults a majority
//!    of validator nodes, each answering from its own metadata and its own
//!    clock. No quorum, no secret. Security beats availability.
//!
//! ## Architecture
//!
//! Modules mirror the actual moving parts:
//!
//! - **config** — every constant, including the adversary model. Read it.
//! - **time** — the injected clock. Expiry logic is testable because of it.
//! - **fragment** — sessions, fragments, policies, lifecycle states.
//! - **sharing** — threshold secret sharing over GF(256).
//! - **timelock** — delay puzzles, the AES-GCM seal, the trapdoor vault.
//! - **storage** — the contract external stores fulfill; in-memory impl.
//! - **registry** — concurrency-safe fragment/session registry.
//! - **audit** — Ed25519-signed, append-only event log.
//! - **controller** — fragmentation: split, seal, persist, register. Atomically.
//! - **daemon** — the expiry enforcement loop.
//! - **validation** — validator nodes and the majority-quorum client.
//! - **gate** — the only way back from fragments to a secret.
//!
//! ## Design Philosophy
//!
//! 1. Destruction is the feature. Everything else exists to make it
//!    trustworthy.
//! 2. No hidden global state — registries, clocks, and stores are
//!    constructed and injected, which is why the expiry tests run in
//!    milliseconds instead of minutes.
//! 3. Security boundaries return errors, not second chances. Expiry,
//!    integrity, and deletion-confirmation failures are never silently
//!    retried.
//! 4. If it destroys data, it writes a signed audit record. Plural, when
//!    it fails.

pub mod audit;
pub mod config;
pub mod controller;
pub mod daemon;
pub mod fragment;
pub mod gate;
pub mod registry;
pub mod sharing;
pub mod storage;
pub mod time;
pub mod timelock;
pub mod validation;
