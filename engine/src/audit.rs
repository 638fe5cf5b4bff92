//! # Signed Audit Log
//!
//! Append-only forensic record of every security-relevant event: fragment
//! creation, validation, expiry, reconstruction, reconstruction failure.
//! Each record is Ed25519-signed over its canonical bincode encoding, so a
//! log exfiltrated from a compromised host still proves which entries the
//! engine identity actually wrote — and which were spliced in afterwards.
//!
//! Sequence numbers are assigned under the append lock and verified to be
//! gapless, so silent record deletion is as detectable as forgery.
//!
//! The log deliberately stores hex strings for key and signature rather
//! than raw bytes: these records exist to be exported, shipped to
//! aggregators, and read by humans at 3am. Wire efficiency is not the
//! constraint here.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use parking_lot::Mutex;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::fragment::{FragmentId, SessionId};
use crate::time::UnixMillis;

/// Audit failures — only ever produced by verification and export, never
/// by appends. Appending cannot fail; a log that can refuse writes is a
/// log an attacker can silence.
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit record {sequence} failed signature verification")]
    BadSignature { sequence: u64 },

    #[error("audit sequence gap: expected {expected}, found {found}")]
    SequenceGap { expected: u64, found: u64 },

    #[error("audit record {sequence} carries malformed key or signature encoding")]
    MalformedRecord { sequence: u64 },
}

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEvent {
    Created,
    Validated,
    Expired,
    Reconstructed,
    ReconstructionFailed,
}

impl fmt::Display for AuditEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuditEvent::Created => "created",
            AuditEvent::Validated => "validated",
            AuditEvent::Expired => "expired",
            AuditEvent::Reconstructed => "reconstructed",
            AuditEvent::ReconstructionFailed => "reconstruction_failed",
        };
        f.write_str(s)
    }
}

/// The signed payload. Bincode over this struct is the canonical byte
/// string the signature covers — field order is load-bearing, do not
/// reorder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Gapless, zero-based position in the log.
    pub sequence: u64,
    pub session_id: SessionId,
    /// Present for fragment-scoped events; absent for session-level
    /// failures (e.g. an integrity failure before any fragment is at
    /// fault).
    pub fragment_id: Option<FragmentId>,
    pub event: AuditEvent,
    pub timestamp_ms: UnixMillis,
    /// Which component acted: "controller", "daemon", "gate".
    pub actor: String,
}

/// A record plus the signature and signer that vouch for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedAuditRecord {
    pub record: AuditRecord,
    /// Hex-encoded Ed25519 verifying key of the engine identity.
    pub signed_by: String,
    /// Hex-encoded signature over the record's bincode encoding.
    pub signature: String,
}

impl SignedAuditRecord {
    /// RFC 3339 rendering of the record timestamp, for exports and humans.
    pub fn timestamp_rfc3339(&self) -> String {
        chrono::DateTime::from_timestamp_millis(self.record.timestamp_ms as i64)
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_else(|| format!("unrepresentable({})", self.record.timestamp_ms))
    }

    /// Verify this record's signature in isolation.
    pub fn verify(&self) -> Result<(), AuditError> {
        let seq = self.record.sequence;
        let malformed = |_| AuditError::MalformedRecord { sequence: seq };

        let key_bytes: [u8; 32] = hex::decode(&self.signed_by)
            .map_err(malformed)?
            .try_into()
            .map_err(|_| AuditError::MalformedRecord { sequence: seq })?;
        let sig_bytes: [u8; 64] = hex::decode(&self.signature)
            .map_err(malformed)?
            .try_into()
            .map_err(|_| AuditError::MalformedRecord { sequence: seq })?;

        let key = VerifyingKey::from_bytes(&key_bytes)
            .map_err(|_| AuditError::MalformedRecord { sequence: seq })?;
        let message = canonical_bytes(&self.record);

        key.verify(&message, &Signature::from_bytes(&sig_bytes))
            .map_err(|_| AuditError::BadSignature { sequence: seq })
    }
}

fn canonical_bytes(record: &AuditRecord) -> Vec<u8> {
    // Bincode of a fixed struct layout: deterministic, no map ordering
    // games, no whitespace ambiguity.
    bincode::serialize(record).expect("audit record serialization is infallible")
}

// ---------------------------------------------------------------------------
// AuditLog
// ---------------------------------------------------------------------------

/// The append-only log and the identity that signs it.
pub struct AuditLog {
    identity: SigningKey,
    records: Mutex<Vec<SignedAuditRecord>>,
}

impl AuditLog {
    /// Fresh log with a newly generated engine identity.
    pub fn new() -> Self {
        Self::with_identity(SigningKey::generate(&mut OsRng))
    }

    /// Log signing with a caller-provided identity — for deployments that
    /// provision the engine key out of band.
    pub fn with_identity(identity: SigningKey) -> Self {
        Self {
            identity,
            records: Mutex::new(Vec::new()),
        }
    }

    /// Hex-encoded verifying key of this log's identity.
    pub fn identity_hex(&self) -> String {
        hex::encode(self.identity.verifying_key().to_bytes())
    }

    /// Append a signed record. Sequence assignment and insertion happen
    /// under one lock, so concurrent appenders cannot interleave into a
    /// gap or a duplicate.
    pub fn append(
        &self,
        actor: &str,
        event: AuditEvent,
        session_id: SessionId,
        fragment_id: Option<FragmentId>,
        timestamp_ms: UnixMillis,
    ) -> SignedAuditRecord {
        let mut records = self.records.lock();

        let record = AuditRecord {
            sequence: records.len() as u64,
            session_id,
            fragment_id,
            event,
            timestamp_ms,
            actor: actor.to_owned(),
        };
        let signature = self.identity.sign(&canonical_bytes(&record));
        let signed = SignedAuditRecord {
            record,
            signed_by: self.identity_hex(),
            signature: hex::encode(signature.to_bytes()),
        };

        records.push(signed.clone());
        signed
    }

    /// Snapshot of all records.
    pub fn records(&self) -> Vec<SignedAuditRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Verify every signature and the gapless sequence.
    pub fn verify_chain(&self) -> Result<(), AuditError> {
        let records = self.records.lock();
        for (i, signed) in records.iter().enumerate() {
            if signed.record.sequence != i as u64 {
                return Err(AuditError::SequenceGap {
                    expected: i as u64,
                    found: signed.record.sequence,
                });
            }
            signed.verify()?;
        }
        Ok(())
    }

    /// Export the log as pretty JSON for aggregation or offline review.
    pub fn export_json(&self) -> String {
        serde_json::to_string_pretty(&*self.records.lock())
            .expect("audit records serialize to JSON")
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditLog")
            .field("identity", &self.identity_hex())
            .field("records", &self.records.lock().len())
            .finish()
    }
}
