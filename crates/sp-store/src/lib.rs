// SPDX-License-Identifier: MIT OR Apache-2.0
//! sp-store
//!
//! Narrow capability interfaces for the persistence collaborators the core
//! consumes — a metadata store, a blob store, and an optional search index —
//! together with in-memory substitutes that make the whole server testable
//! in-process. Real deployments swap these for a relational store, an object
//! store, and a full-text backend without touching the core.

#![deny(unsafe_code)]

/// In-memory substitutes for the collaborator traits.
pub mod memory;

use async_trait::async_trait;
use semver::Version;
use serde::{Deserialize, Serialize};
use sp_core::{Language, SkillManifest};
use thiserror::Error;

pub use memory::{MemoryBlobStore, MemoryMetadataStore, MemorySearchIndex};

/// Errors surfaced by storage collaborators.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A write conflicted with an existing `(skill_id, version)` entry.
    #[error("skill {skill_id}@{version} already exists")]
    Conflict {
        /// Conflicting skill id.
        skill_id: String,
        /// Conflicting version.
        version: Version,
    },

    /// The referenced entry does not exist.
    #[error("not found: {key}")]
    NotFound {
        /// Key that was looked up.
        key: String,
    },

    /// The backing service failed.
    #[error("storage backend error: {detail}")]
    Backend {
        /// Backend diagnostic.
        detail: String,
    },
}

/// Compute the content address (hex SHA-256) for a code blob.
#[must_use]
pub fn blob_key(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

// ---------------------------------------------------------------------------
// MetadataStore
// ---------------------------------------------------------------------------

/// Store for skill manifests keyed by `(skill_id, version)`.
///
/// Writes are once-only per key apart from [`bump_stats`], which must be
/// atomic with respect to concurrent bumps.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Persist a manifest. Fails with [`StoreError::Conflict`] when the
    /// `(skill_id, version)` pair already exists.
    async fn put_skill(&self, manifest: SkillManifest) -> Result<(), StoreError>;

    /// Fetch one version, or the latest by semantic-version order when
    /// `version` is `None`. Returns `Ok(None)` when absent.
    async fn get_skill(
        &self,
        skill_id: &str,
        version: Option<&Version>,
    ) -> Result<Option<SkillManifest>, StoreError>;

    /// Remove every version of a skill, returning how many were removed.
    /// Removing an absent skill is not an error.
    async fn delete_skill(&self, skill_id: &str) -> Result<usize, StoreError>;

    /// All stored manifests. Used by projection-only listings and by the
    /// linear-scan discovery fallback.
    async fn list_skills(&self) -> Result<Vec<SkillManifest>, StoreError>;

    /// Atomically fold one terminal invocation outcome into the stats of
    /// the given skill version.
    async fn bump_stats(
        &self,
        skill_id: &str,
        version: &Version,
        success: bool,
    ) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// BlobStore
// ---------------------------------------------------------------------------

/// Content-addressed store for code blobs.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` under `key`. Overwriting the same key with identical
    /// content is a no-op; keys are content digests so differing content
    /// under one key cannot occur.
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StoreError>;

    /// Fetch the blob for `key`, or `Ok(None)` when absent.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Delete the blob for `key`. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// SearchIndex
// ---------------------------------------------------------------------------

/// Sort orders the index can answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    /// Skill name, lexicographic ascending.
    #[default]
    Name,
    /// Registration time, newest first.
    Date,
    /// Popularity counter, highest first.
    Popularity,
}

/// A search request against the index.
#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    /// Free-text query, token-matched over name and description.
    pub text: Option<String>,
    /// Exact category filter.
    pub category: Option<String>,
    /// Exact language filter.
    pub language: Option<Language>,
    /// Sort order.
    pub sort: SortKey,
    /// Number of leading hits to skip.
    pub offset: usize,
    /// Maximum hits to return.
    pub limit: usize,
}

/// A page of search hits: matching skill ids plus the total match count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchPage {
    /// Skill ids for this page, in sort order.
    pub ids: Vec<String>,
    /// Total matches across all pages.
    pub total: usize,
}

/// Optional full-text index over skill metadata.
///
/// The index sees one entry per `skill_id` (the latest version's metadata);
/// it is allowed to lag the metadata store briefly.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Insert or refresh the entry for a skill.
    async fn upsert(&self, manifest: &SkillManifest) -> Result<(), StoreError>;

    /// Drop the entry for a skill.
    async fn remove(&self, skill_id: &str) -> Result<(), StoreError>;

    /// Run a query, returning one page of skill ids plus the total count.
    async fn search(&self, query: &SearchQuery) -> Result<SearchPage, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_key_is_hex_sha256() {
        let key = blob_key(b"def execute(i): return i\n");
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
        // Stable for identical content.
        assert_eq!(key, blob_key(b"def execute(i): return i\n"));
        assert_ne!(key, blob_key(b"other"));
    }

    #[test]
    fn sort_key_default_is_name() {
        assert_eq!(SortKey::default(), SortKey::Name);
    }
}
