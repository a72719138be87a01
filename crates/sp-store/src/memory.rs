// SPDX-License-Identifier: MIT OR Apache-2.0
//! In-memory substitutes for the storage collaborators.
//!
//! These back the default single-process deployment and every test. Each is
//! a `tokio::sync::RwLock` over plain maps; the metadata store keeps one
//! `BTreeMap<Version, _>` per skill so "latest" falls out of semantic-version
//! ordering.

use crate::{
    BlobStore, MetadataStore, SearchIndex, SearchPage, SearchQuery, SortKey, StoreError,
};
use async_trait::async_trait;
use semver::Version;
use sp_core::SkillManifest;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

// ---------------------------------------------------------------------------
// MemoryMetadataStore
// ---------------------------------------------------------------------------

/// Skill manifests in process memory.
#[derive(Default)]
pub struct MemoryMetadataStore {
    skills: RwLock<HashMap<String, BTreeMap<Version, SkillManifest>>>,
}

impl MemoryMetadataStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn put_skill(&self, manifest: SkillManifest) -> Result<(), StoreError> {
        let mut guard = self.skills.write().await;
        let versions = guard.entry(manifest.skill_id.clone()).or_default();
        if versions.contains_key(&manifest.version) {
            return Err(StoreError::Conflict {
                skill_id: manifest.skill_id.clone(),
                version: manifest.version.clone(),
            });
        }
        versions.insert(manifest.version.clone(), manifest);
        Ok(())
    }

    async fn get_skill(
        &self,
        skill_id: &str,
        version: Option<&Version>,
    ) -> Result<Option<SkillManifest>, StoreError> {
        let guard = self.skills.read().await;
        let Some(versions) = guard.get(skill_id) else {
            return Ok(None);
        };
        let manifest = match version {
            Some(v) => versions.get(v),
            None => versions.last_key_value().map(|(_, m)| m),
        };
        Ok(manifest.cloned())
    }

    async fn delete_skill(&self, skill_id: &str) -> Result<usize, StoreError> {
        let mut guard = self.skills.write().await;
        Ok(guard.remove(skill_id).map_or(0, |versions| versions.len()))
    }

    async fn list_skills(&self) -> Result<Vec<SkillManifest>, StoreError> {
        let guard = self.skills.read().await;
        Ok(guard
            .values()
            .flat_map(|versions| versions.values().cloned())
            .collect())
    }

    async fn bump_stats(
        &self,
        skill_id: &str,
        version: &Version,
        success: bool,
    ) -> Result<(), StoreError> {
        let mut guard = self.skills.write().await;
        let manifest = guard
            .get_mut(skill_id)
            .and_then(|versions| versions.get_mut(version))
            .ok_or_else(|| StoreError::NotFound {
                key: format!("{skill_id}@{version}"),
            })?;
        manifest.stats.record_outcome(success);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryBlobStore
// ---------------------------------------------------------------------------

/// Code blobs in process memory.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        self.blobs.write().await.insert(key.to_string(), bytes);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.blobs.read().await.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.blobs.write().await.remove(key);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemorySearchIndex
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct IndexEntry {
    skill_id: String,
    name: String,
    tokens: Vec<String>,
    category: String,
    language: sp_core::Language,
    created_at: chrono::DateTime<chrono::Utc>,
    popularity: u64,
}

/// Token-matching search index in process memory.
///
/// Updates are applied synchronously, so the staleness window relative to
/// the metadata store is effectively zero.
#[derive(Default)]
pub struct MemorySearchIndex {
    entries: RwLock<HashMap<String, IndexEntry>>,
}

impl MemorySearchIndex {
    /// Create an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn matches(entry: &IndexEntry, query: &SearchQuery) -> bool {
    if let Some(text) = &query.text {
        let wanted = tokenize(text);
        if !wanted.is_empty() {
            let hit = wanted.iter().all(|w| {
                entry
                    .tokens
                    .iter()
                    .any(|t| t == w || t.starts_with(w.as_str()))
            });
            if !hit {
                return false;
            }
        }
    }
    if let Some(category) = &query.category {
        if &entry.category != category {
            return false;
        }
    }
    if let Some(language) = query.language {
        if entry.language != language {
            return false;
        }
    }
    true
}

#[async_trait]
impl SearchIndex for MemorySearchIndex {
    async fn upsert(&self, manifest: &SkillManifest) -> Result<(), StoreError> {
        let mut tokens = tokenize(&manifest.skill_name);
        tokens.extend(tokenize(&manifest.description));
        let entry = IndexEntry {
            skill_id: manifest.skill_id.clone(),
            name: manifest.skill_name.clone(),
            tokens,
            category: manifest.category.clone(),
            language: manifest.language,
            created_at: manifest.created_at,
            popularity: manifest.stats.popularity,
        };
        self.entries
            .write()
            .await
            .insert(manifest.skill_id.clone(), entry);
        Ok(())
    }

    async fn remove(&self, skill_id: &str) -> Result<(), StoreError> {
        self.entries.write().await.remove(skill_id);
        Ok(())
    }

    async fn search(&self, query: &SearchQuery) -> Result<SearchPage, StoreError> {
        let guard = self.entries.read().await;
        let mut hits: Vec<&IndexEntry> =
            guard.values().filter(|e| matches(e, query)).collect();

        match query.sort {
            SortKey::Name => hits.sort_by(|a, b| a.name.cmp(&b.name)),
            SortKey::Date => hits.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
            SortKey::Popularity => hits.sort_by(|a, b| b.popularity.cmp(&a.popularity)),
        }

        let total = hits.len();
        let ids = hits
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .map(|e| e.skill_id.clone())
            .collect();
        Ok(SearchPage { ids, total })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use sp_core::Language;

    fn manifest(skill_id: &str, version: &str) -> SkillManifest {
        SkillManifest {
            skill_id: skill_id.into(),
            skill_name: format!("{skill_id} name"),
            description: "computes things".into(),
            version: Version::parse(version).unwrap(),
            language: Language::Python,
            timeout_seconds: 30,
            dependencies: json!(null),
            input_schema: json!({}),
            output_schema: json!({}),
            author: String::new(),
            license: String::new(),
            category: "math".into(),
            code_digest: crate::blob_key(b"code"),
            code_size: 4,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            stats: Default::default(),
        }
    }

    #[tokio::test]
    async fn put_then_get_roundtrips() {
        let store = MemoryMetadataStore::new();
        store.put_skill(manifest("s", "1.0.0")).await.unwrap();
        let got = store.get_skill("s", None).await.unwrap().unwrap();
        assert_eq!(got.skill_id, "s");
        assert_eq!(got.version, Version::new(1, 0, 0));
    }

    #[tokio::test]
    async fn duplicate_identity_conflicts() {
        let store = MemoryMetadataStore::new();
        store.put_skill(manifest("s", "1.0.0")).await.unwrap();
        let err = store.put_skill(manifest("s", "1.0.0")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
    }

    #[tokio::test]
    async fn latest_follows_semver_not_insertion_order() {
        let store = MemoryMetadataStore::new();
        store.put_skill(manifest("s", "1.10.0")).await.unwrap();
        store.put_skill(manifest("s", "1.2.0")).await.unwrap();
        store.put_skill(manifest("s", "1.9.9")).await.unwrap();
        let latest = store.get_skill("s", None).await.unwrap().unwrap();
        assert_eq!(latest.version, Version::new(1, 10, 0));
    }

    #[tokio::test]
    async fn prerelease_orders_below_release() {
        let store = MemoryMetadataStore::new();
        store.put_skill(manifest("s", "2.0.0-beta.1")).await.unwrap();
        store.put_skill(manifest("s", "2.0.0")).await.unwrap();
        let latest = store.get_skill("s", None).await.unwrap().unwrap();
        assert_eq!(latest.version, Version::new(2, 0, 0));
    }

    #[tokio::test]
    async fn delete_removes_all_versions_and_is_idempotent() {
        let store = MemoryMetadataStore::new();
        store.put_skill(manifest("s", "1.0.0")).await.unwrap();
        store.put_skill(manifest("s", "2.0.0")).await.unwrap();
        assert_eq!(store.delete_skill("s").await.unwrap(), 2);
        assert_eq!(store.delete_skill("s").await.unwrap(), 0);
        assert!(store.get_skill("s", None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn bump_stats_updates_counters() {
        let store = MemoryMetadataStore::new();
        store.put_skill(manifest("s", "1.0.0")).await.unwrap();
        let v = Version::new(1, 0, 0);
        store.bump_stats("s", &v, true).await.unwrap();
        store.bump_stats("s", &v, false).await.unwrap();
        let got = store.get_skill("s", Some(&v)).await.unwrap().unwrap();
        assert_eq!(got.stats.total_calls, 2);
        assert_eq!(got.stats.successful_calls, 1);
    }

    #[tokio::test]
    async fn blob_store_roundtrip_and_delete() {
        let store = MemoryBlobStore::new();
        store.put("k", b"bytes".to_vec()).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().unwrap(), b"bytes");
        store.delete("k").await.unwrap();
        assert!(store.get("k").await.unwrap().is_none());
        // Deleting again is fine.
        store.delete("k").await.unwrap();
    }

    #[tokio::test]
    async fn search_token_match_and_pagination() {
        let index = MemorySearchIndex::new();
        for (id, desc) in [
            ("alpha", "adds numbers"),
            ("beta", "squares numbers"),
            ("gamma", "fetches weather"),
        ] {
            let mut m = manifest(id, "1.0.0");
            m.description = desc.into();
            index.upsert(&m).await.unwrap();
        }

        let page = index
            .search(&SearchQuery {
                text: Some("numbers".into()),
                limit: 1,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.ids.len(), 1);
        // Name sort ascending: "alpha name" first.
        assert_eq!(page.ids[0], "alpha");
    }

    #[tokio::test]
    async fn search_filters_by_language_and_category() {
        let index = MemorySearchIndex::new();
        let mut a = manifest("a", "1.0.0");
        a.category = "math".into();
        let mut b = manifest("b", "1.0.0");
        b.category = "net".into();
        index.upsert(&a).await.unwrap();
        index.upsert(&b).await.unwrap();

        let page = index
            .search(&SearchQuery {
                category: Some("net".into()),
                limit: 10,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.ids, vec!["b".to_string()]);

        let page = index
            .search(&SearchQuery {
                language: Some(Language::Go),
                limit: 10,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 0);
    }

    #[tokio::test]
    async fn remove_drops_entry() {
        let index = MemorySearchIndex::new();
        index.upsert(&manifest("a", "1.0.0")).await.unwrap();
        index.remove("a").await.unwrap();
        let page = index
            .search(&SearchQuery {
                limit: 10,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 0);
    }
}
