// SPDX-License-Identifier: MIT OR Apache-2.0
//! sp-registry
//!
//! The validated, queryable, immutable-per-version store of skills.
//! Registration runs the full validation pass before any state changes;
//! the blob is persisted first and the manifest committed last, so a
//! half-finished registration leaves at worst an unreachable blob, never a
//! partial skill.

#![deny(unsafe_code)]

mod validate;

use base64::Engine as _;
use chrono::Utc;
use semver::Version;
use serde_json::json;
use sp_core::{RegisterRequest, SkillManifest};
use sp_error::{ErrorCode, SkillError};
use sp_store::{BlobStore, MetadataStore, SearchIndex, StoreError, blob_key};
use std::sync::Arc;
use tracing::{debug, info};

pub use validate::ValidatedRequest;

/// The skill registry: validation in front of the storage collaborators.
#[derive(Clone)]
pub struct SkillRegistry {
    metadata: Arc<dyn MetadataStore>,
    blobs: Arc<dyn BlobStore>,
    index: Option<Arc<dyn SearchIndex>>,
}

impl SkillRegistry {
    /// Create a registry over the given collaborators.
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        blobs: Arc<dyn BlobStore>,
        index: Option<Arc<dyn SearchIndex>>,
    ) -> Self {
        Self {
            metadata,
            blobs,
            index,
        }
    }

    /// Register a new skill version.
    ///
    /// # Errors
    ///
    /// `SKILL_REG_002` for field/semver/timeout/schema violations,
    /// `SKILL_REG_003` for an undecodable or empty code blob,
    /// `SKILL_REG_001` when the `(skill_id, version)` pair already exists.
    pub async fn register(&self, request: RegisterRequest) -> Result<SkillManifest, SkillError> {
        let validated = validate::validate(request)?;

        let digest = blob_key(&validated.code);
        let now = Utc::now();
        let manifest = SkillManifest {
            skill_id: validated.skill_id,
            skill_name: validated.skill_name,
            description: validated.description,
            version: validated.version,
            language: validated.language,
            timeout_seconds: validated.timeout_seconds,
            dependencies: validated.dependencies,
            input_schema: validated.input_schema,
            output_schema: validated.output_schema,
            author: validated.author,
            license: validated.license,
            category: validated.category,
            code_digest: digest.clone(),
            code_size: validated.code.len() as u64,
            created_at: now,
            updated_at: now,
            stats: Default::default(),
        };

        // Blob first; the manifest commit is the point of no return. On a
        // duplicate-identity conflict the blob stays (content-addressed, so
        // it may be shared) and nothing else changed.
        self.blobs
            .put(&digest, validated.code)
            .await
            .map_err(SkillError::registry_internal)?;

        match self.metadata.put_skill(manifest.clone()).await {
            Ok(()) => {}
            Err(StoreError::Conflict { skill_id, version }) => {
                return Err(SkillError::new(
                    ErrorCode::DuplicateSkill,
                    format!("skill {skill_id}@{version} is already registered"),
                )
                .with_detail("skill_id", skill_id)
                .with_detail("version", version.to_string()));
            }
            Err(other) => return Err(SkillError::registry_internal(other)),
        }

        self.refresh_index(&manifest.skill_id).await;

        info!(
            target: "skillport.registry",
            skill_id = %manifest.skill_id,
            version = %manifest.version,
            language = %manifest.language,
            code_size = manifest.code_size,
            "skill registered"
        );
        Ok(manifest)
    }

    /// Fetch one version, or the latest by semantic-version order.
    ///
    /// # Errors
    ///
    /// `SKILL_INV_001` when the skill (or the requested version) is absent.
    pub async fn get(
        &self,
        skill_id: &str,
        version: Option<&Version>,
    ) -> Result<SkillManifest, SkillError> {
        self.metadata
            .get_skill(skill_id, version)
            .await
            .map_err(SkillError::registry_internal)?
            .ok_or_else(|| {
                SkillError::new(
                    ErrorCode::SkillNotFound,
                    format!("skill '{skill_id}' not found"),
                )
                .with_detail("skill_id", skill_id)
            })
    }

    /// Fetch the code blob for a manifest.
    ///
    /// # Errors
    ///
    /// Internal error when the referenced blob is missing; that means the
    /// stores disagree, which registration's commit order rules out short
    /// of backend data loss.
    pub async fn code(&self, manifest: &SkillManifest) -> Result<Vec<u8>, SkillError> {
        self.blobs
            .get(&manifest.code_digest)
            .await
            .map_err(SkillError::registry_internal)?
            .ok_or_else(|| {
                SkillError::new(
                    ErrorCode::RegistryInternal,
                    format!("code blob {} missing", manifest.code_digest),
                )
            })
    }

    /// Delete every version of a skill. Succeeds whether or not the skill
    /// existed; afterwards the skill is not invocable.
    ///
    /// # Errors
    ///
    /// Internal error only, for backend failures.
    pub async fn delete(&self, skill_id: &str) -> Result<(), SkillError> {
        // Collect this skill's digests before removal so orphaned blobs can
        // be dropped, keeping any digest still referenced by another skill.
        let all = self
            .metadata
            .list_skills()
            .await
            .map_err(SkillError::registry_internal)?;
        let (mine, theirs): (Vec<_>, Vec<_>) =
            all.into_iter().partition(|m| m.skill_id == skill_id);

        let removed = self
            .metadata
            .delete_skill(skill_id)
            .await
            .map_err(SkillError::registry_internal)?;

        for digest in mine.iter().map(|m| &m.code_digest) {
            let shared = theirs.iter().any(|m| &m.code_digest == digest);
            if !shared {
                self.blobs
                    .delete(digest)
                    .await
                    .map_err(SkillError::registry_internal)?;
            }
        }

        if let Some(index) = &self.index {
            let _ = index.remove(skill_id).await;
        }

        debug!(target: "skillport.registry", %skill_id, removed, "skill deleted");
        Ok(())
    }

    /// Projection-only listing of every stored manifest, sorted by
    /// `(skill_id, version)`, with offset/limit paging.
    ///
    /// # Errors
    ///
    /// Internal error only, for backend failures.
    pub async fn list(
        &self,
        offset: usize,
        limit: usize,
    ) -> Result<(Vec<SkillManifest>, usize), SkillError> {
        let mut all = self
            .metadata
            .list_skills()
            .await
            .map_err(SkillError::registry_internal)?;
        all.sort_by(|a, b| {
            a.skill_id
                .cmp(&b.skill_id)
                .then_with(|| a.version.cmp(&b.version))
        });
        let total = all.len();
        let page = all.into_iter().skip(offset).take(limit).collect();
        Ok((page, total))
    }

    /// Fold a terminal invocation outcome into the skill's usage stats and
    /// refresh the search index entry.
    ///
    /// # Errors
    ///
    /// Internal error only; a stats bump against a just-deleted skill is
    /// ignored.
    pub async fn record_outcome(
        &self,
        skill_id: &str,
        version: &Version,
        success: bool,
    ) -> Result<(), SkillError> {
        match self.metadata.bump_stats(skill_id, version, success).await {
            Ok(()) => {
                self.refresh_index(skill_id).await;
                Ok(())
            }
            // The skill was deleted while its last execution drained.
            Err(StoreError::NotFound { .. }) => Ok(()),
            Err(other) => Err(SkillError::registry_internal(other)),
        }
    }

    async fn refresh_index(&self, skill_id: &str) {
        let Some(index) = &self.index else { return };
        if let Ok(Some(latest)) = self.metadata.get_skill(skill_id, None).await {
            let _ = index.upsert(&latest).await;
        }
    }
}

/// Decode a base64 code field. Shared with validation.
pub(crate) fn decode_code(code: &str) -> Result<Vec<u8>, SkillError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(code.trim())
        .map_err(|e| {
            SkillError::new(ErrorCode::InvalidCode, "code is not valid base64")
                .with_detail("reason", json!(e.to_string()))
        })?;
    if bytes.is_empty() {
        return Err(SkillError::new(
            ErrorCode::InvalidCode,
            "code decodes to an empty blob",
        ));
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sp_core::Language;
    use sp_store::{MemoryBlobStore, MemoryMetadataStore, MemorySearchIndex, SearchQuery};

    fn registry() -> SkillRegistry {
        SkillRegistry::new(
            Arc::new(MemoryMetadataStore::new()),
            Arc::new(MemoryBlobStore::new()),
            Some(Arc::new(MemorySearchIndex::new())),
        )
    }

    fn request(skill_id: &str, version: &str) -> RegisterRequest {
        RegisterRequest::builder(skill_id, version)
            .name("Square")
            .description("squares a number")
            .source("def execute(i):\n    return {\"result\": i[\"value\"] ** 2}\n")
            .build()
    }

    #[tokio::test]
    async fn register_then_get_roundtrips() {
        let registry = registry();
        let manifest = registry.register(request("skill_square", "1.0.0")).await.unwrap();
        assert_eq!(manifest.language, Language::Python);
        assert!(manifest.code_size > 0);

        let got = registry.get("skill_square", None).await.unwrap();
        assert_eq!(got.skill_id, "skill_square");
        assert_eq!(got.version, Version::new(1, 0, 0));
        assert_eq!(got.code_digest, manifest.code_digest);

        let code = registry.code(&got).await.unwrap();
        assert!(String::from_utf8(code).unwrap().contains("def execute"));
    }

    #[tokio::test]
    async fn duplicate_identity_is_rejected_even_with_different_code() {
        let registry = registry();
        registry.register(request("s", "1.0.0")).await.unwrap();

        let different = RegisterRequest::builder("s", "1.0.0")
            .name("Other")
            .source("def execute(i):\n    return {}\n")
            .build();
        let err = registry.register(different).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::DuplicateSkill);
    }

    #[tokio::test]
    async fn get_without_version_returns_semver_latest() {
        let registry = registry();
        registry.register(request("s", "1.2.0")).await.unwrap();
        registry.register(request("s", "1.10.0")).await.unwrap();
        registry.register(request("s", "1.3.5")).await.unwrap();

        let latest = registry.get("s", None).await.unwrap();
        assert_eq!(latest.version, Version::new(1, 10, 0));

        let pinned = registry
            .get("s", Some(&Version::new(1, 2, 0)))
            .await
            .unwrap();
        assert_eq!(pinned.version, Version::new(1, 2, 0));
    }

    #[tokio::test]
    async fn get_missing_is_skill_not_found() {
        let registry = registry();
        let err = registry.get("ghost", None).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::SkillNotFound);
    }

    #[tokio::test]
    async fn delete_is_idempotent_and_makes_skill_invisible() {
        let registry = registry();
        registry.register(request("s", "1.0.0")).await.unwrap();
        registry.register(request("s", "2.0.0")).await.unwrap();

        registry.delete("s").await.unwrap();
        let err = registry.get("s", None).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::SkillNotFound);

        // Deleting again still succeeds.
        registry.delete("s").await.unwrap();
        // And deleting something that never existed succeeds too.
        registry.delete("never_was").await.unwrap();
    }

    #[tokio::test]
    async fn delete_keeps_blobs_shared_with_other_skills() {
        let metadata = Arc::new(MemoryMetadataStore::new());
        let blobs = Arc::new(MemoryBlobStore::new());
        let registry = SkillRegistry::new(metadata, blobs.clone(), None);

        // Two skills with identical source share one content-addressed blob.
        registry.register(request("a", "1.0.0")).await.unwrap();
        let manifest = registry.register(request("b", "1.0.0")).await.unwrap();

        registry.delete("a").await.unwrap();
        let survivor = registry.get("b", None).await.unwrap();
        assert!(registry.code(&survivor).await.is_ok());
        assert_eq!(survivor.code_digest, manifest.code_digest);
    }

    #[tokio::test]
    async fn list_pages_in_stable_order() {
        let registry = registry();
        registry.register(request("b", "1.0.0")).await.unwrap();
        registry.register(request("a", "1.0.0")).await.unwrap();
        registry.register(request("a", "2.0.0")).await.unwrap();

        let (page, total) = registry.list(0, 2).await.unwrap();
        assert_eq!(total, 3);
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].skill_id, "a");
        assert_eq!(page[0].version, Version::new(1, 0, 0));
        assert_eq!(page[1].version, Version::new(2, 0, 0));
    }

    #[tokio::test]
    async fn record_outcome_updates_stats_and_survives_deleted_skills() {
        let registry = registry();
        registry.register(request("s", "1.0.0")).await.unwrap();
        let v = Version::new(1, 0, 0);

        registry.record_outcome("s", &v, true).await.unwrap();
        registry.record_outcome("s", &v, false).await.unwrap();
        let got = registry.get("s", None).await.unwrap();
        assert_eq!(got.stats.total_calls, 2);
        assert!((got.stats.success_rate - 0.5).abs() < f64::EPSILON);

        registry.delete("s").await.unwrap();
        // Late bump from a draining execution: swallowed, not an error.
        registry.record_outcome("s", &v, true).await.unwrap();
    }

    #[tokio::test]
    async fn registration_reaches_the_search_index() {
        let index = Arc::new(MemorySearchIndex::new());
        let registry = SkillRegistry::new(
            Arc::new(MemoryMetadataStore::new()),
            Arc::new(MemoryBlobStore::new()),
            Some(index.clone()),
        );
        registry.register(request("skill_square", "1.0.0")).await.unwrap();

        let page = index
            .search(&SearchQuery {
                text: Some("squares".into()),
                limit: 10,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.ids, vec!["skill_square".to_string()]);
    }
}
