//! Context Package Builder (C2).
//!
//! Assembles the immutable, content-hashed bundle the three archons
//! deliberate over. Hashing follows the canonical-JSON rule in
//! `SPEC_FULL.md` §3: serialize to `serde_json::Value` (whose `Map` is
//! `BTreeMap`-backed without the `preserve_order` feature, so keys sort
//! lexicographically at every depth) and then to a compact string — no
//! hand-rolled canonicalizer is needed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::types::config::CONTEXT_SCHEMA_VERSION;
use crate::types::{ArchonId, Error, PetitionId, Result, SessionId};

/// Coarse-grained urgency signal carried alongside the petition text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeverityTier {
    Low,
    Medium,
    High,
}

/// Snapshot of the petition fields a context package needs. Supplied by the
/// external petition repository; not itself part of the deliberation engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PetitionSnapshot {
    pub petition_id: PetitionId,
    pub petition_text: String,
    pub petition_type: String,
    pub co_signer_count: u64,
    pub submitter_id: Option<String>,
    pub realm: String,
    pub submitted_at: DateTime<Utc>,
    pub severity_tier: SeverityTier,
    pub severity_signals: serde_json::Value,
}

/// The immutable, content-hashed input bundle the archons deliberate over.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextPackage {
    pub petition_id: PetitionId,
    pub petition_text: String,
    pub petition_type: String,
    pub co_signer_count: u64,
    pub submitter_id: Option<String>,
    pub realm: String,
    pub submitted_at: DateTime<Utc>,
    pub session_id: SessionId,
    pub assigned_archons: [ArchonId; 3],
    pub similar_petitions: Vec<PetitionId>,
    pub ruling_3_deferred: bool,
    pub severity_tier: SeverityTier,
    pub severity_signals: serde_json::Value,
    pub schema_version: String,
    pub built_at: DateTime<Utc>,
    pub content_hash: String,
}

/// The fields a content hash is computed over — everything except the hash
/// itself. Kept as a separate, `Serialize`-only struct so the hashable view
/// can never accidentally include `content_hash`.
#[derive(Serialize)]
struct Hashable<'a> {
    petition_id: PetitionId,
    petition_text: &'a str,
    petition_type: &'a str,
    co_signer_count: u64,
    submitter_id: &'a Option<String>,
    realm: &'a str,
    submitted_at: DateTime<Utc>,
    session_id: SessionId,
    assigned_archons: [ArchonId; 3],
    similar_petitions: &'a [PetitionId],
    ruling_3_deferred: bool,
    severity_tier: SeverityTier,
    severity_signals: &'a serde_json::Value,
    schema_version: &'a str,
    built_at: DateTime<Utc>,
}

impl ContextPackage {
    /// Build a package from a petition snapshot and the session created for
    /// it. Refuses if the two disagree on which petition is being
    /// deliberated.
    pub fn build(petition: &PetitionSnapshot, session_id: SessionId, assigned_archons: [ArchonId; 3], petition_id_check: PetitionId) -> Result<Self> {
        if petition.petition_id != petition_id_check {
            return Err(Error::petition_session_mismatch(petition.petition_id, petition_id_check));
        }

        let built_at = Utc::now();
        let hashable = Hashable {
            petition_id: petition.petition_id,
            petition_text: &petition.petition_text,
            petition_type: &petition.petition_type,
            co_signer_count: petition.co_signer_count,
            submitter_id: &petition.submitter_id,
            realm: &petition.realm,
            submitted_at: petition.submitted_at,
            session_id,
            assigned_archons,
            similar_petitions: &[],
            ruling_3_deferred: true,
            severity_tier: petition.severity_tier,
            severity_signals: &petition.severity_signals,
            schema_version: CONTEXT_SCHEMA_VERSION,
            built_at,
        };
        let content_hash = compute_content_hash(&hashable)?;

        Ok(Self {
            petition_id: petition.petition_id,
            petition_text: petition.petition_text.clone(),
            petition_type: petition.petition_type.clone(),
            co_signer_count: petition.co_signer_count,
            submitter_id: petition.submitter_id.clone(),
            realm: petition.realm.clone(),
            submitted_at: petition.submitted_at,
            session_id,
            assigned_archons,
            similar_petitions: Vec::new(),
            ruling_3_deferred: true,
            severity_tier: petition.severity_tier,
            severity_signals: petition.severity_signals.clone(),
            schema_version: CONTEXT_SCHEMA_VERSION.to_string(),
            built_at,
            content_hash,
        })
    }

    /// Recompute the content hash from this package's own fields and compare
    /// against the stored one. Used by receivers to verify integrity.
    pub fn verify_hash(&self) -> Result<bool> {
        let hashable = Hashable {
            petition_id: self.petition_id,
            petition_text: &self.petition_text,
            petition_type: &self.petition_type,
            co_signer_count: self.co_signer_count,
            submitter_id: &self.submitter_id,
            realm: &self.realm,
            submitted_at: self.submitted_at,
            session_id: self.session_id,
            assigned_archons: self.assigned_archons,
            similar_petitions: &self.similar_petitions,
            ruling_3_deferred: self.ruling_3_deferred,
            severity_tier: self.severity_tier,
            severity_signals: &self.severity_signals,
            schema_version: &self.schema_version,
            built_at: self.built_at,
        };
        Ok(compute_content_hash(&hashable)? == self.content_hash)
    }
}

/// Canonical-JSON + SHA-256 over any serializable hashable view.
fn compute_content_hash<T: Serialize>(hashable: &T) -> Result<String> {
    let value = serde_json::to_value(hashable)?;
    let canonical = serde_json::to_string(&value)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}
