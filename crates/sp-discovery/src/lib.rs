// SPDX-License-Identifier: MIT OR Apache-2.0
//! sp-discovery
//!
//! Paginated search over skill metadata. When a search index collaborator
//! is configured the query is delegated to it; otherwise discovery degrades
//! to a linear scan over the metadata store, which is exact but unindexed.
//! Either way only the latest version of each skill is surfaced.

#![deny(unsafe_code)]

use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};
use sp_core::{Language, SkillManifest};
use sp_error::SkillError;
use sp_store::{MetadataStore, SearchIndex, SearchPage, SearchQuery, SortKey};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Default page size when the caller does not pick one.
pub const DEFAULT_PAGE_SIZE: usize = 20;
/// Upper bound on `page_size`.
pub const MAX_PAGE_SIZE: usize = 100;

// ---------------------------------------------------------------------------
// Query
// ---------------------------------------------------------------------------

/// A discovery request as it arrives from the wire, all fields optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DiscoveryQuery {
    /// Free-text query, token-matched over name and description.
    pub q: Option<String>,
    /// Exact category filter.
    pub category: Option<String>,
    /// Language filter (`python`, `typescript`, `go`).
    pub language: Option<String>,
    /// Sort key: `name` (default), `date`, `popularity`.
    pub sort: Option<String>,
    /// 1-indexed page number.
    pub page: Option<usize>,
    /// Page size, clamped to `1..=100`.
    pub page_size: Option<usize>,
}

impl DiscoveryQuery {
    fn page(&self) -> usize {
        self.page.unwrap_or(1).max(1)
    }

    fn page_size(&self) -> usize {
        self.page_size
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE)
    }

    fn sort_key(&self) -> SortKey {
        match self.sort.as_deref() {
            Some("date") => SortKey::Date,
            Some("popularity") => SortKey::Popularity,
            _ => SortKey::Name,
        }
    }

    fn language_filter(&self) -> Option<Language> {
        self.language.as_deref().and_then(Language::parse)
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Discovery projection of one skill (its latest version).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillSummary {
    /// Skill identifier.
    pub skill_id: String,
    /// Display name.
    pub skill_name: String,
    /// Description.
    pub description: String,
    /// Latest registered version.
    pub version: Version,
    /// Implementation language.
    pub language: Language,
    /// Discovery category.
    pub category: String,
    /// Author attribution.
    pub author: String,
    /// Registration time of the latest version.
    pub created_at: DateTime<Utc>,
    /// Popularity counter.
    pub popularity: u64,
}

impl From<&SkillManifest> for SkillSummary {
    fn from(m: &SkillManifest) -> Self {
        Self {
            skill_id: m.skill_id.clone(),
            skill_name: m.skill_name.clone(),
            description: m.description.clone(),
            version: m.version.clone(),
            language: m.language,
            category: m.category.clone(),
            author: m.author.clone(),
            created_at: m.created_at,
            popularity: m.stats.popularity,
        }
    }
}

/// One page of discovery results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryPage {
    /// Matching skills for this page, in sort order.
    pub skills: Vec<SkillSummary>,
    /// Total matches across all pages.
    pub total: usize,
    /// Total number of pages at the current page size.
    pub total_pages: usize,
    /// The 1-indexed page this response covers.
    pub page: usize,
    /// The effective page size.
    pub page_size: usize,
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// Discovery over the metadata store, accelerated by an optional index.
#[derive(Clone)]
pub struct DiscoveryService {
    metadata: Arc<dyn MetadataStore>,
    index: Option<Arc<dyn SearchIndex>>,
}

impl DiscoveryService {
    /// Create a discovery service over the given collaborators.
    pub fn new(metadata: Arc<dyn MetadataStore>, index: Option<Arc<dyn SearchIndex>>) -> Self {
        Self { metadata, index }
    }

    /// Run a discovery query.
    ///
    /// # Errors
    ///
    /// Internal error only, for backend failures.
    pub async fn search(&self, query: &DiscoveryQuery) -> Result<DiscoveryPage, SkillError> {
        let page = query.page();
        let page_size = query.page_size();

        let (summaries, total) = match &self.index {
            Some(index) => self.indexed(index, query, page, page_size).await?,
            None => self.linear(query, page, page_size).await?,
        };

        let total_pages = total.div_ceil(page_size);
        debug!(
            target: "skillport.discovery",
            total,
            page,
            page_size,
            indexed = self.index.is_some(),
            "discovery query served"
        );
        Ok(DiscoveryPage {
            skills: summaries,
            total,
            total_pages,
            page,
            page_size,
        })
    }

    async fn indexed(
        &self,
        index: &Arc<dyn SearchIndex>,
        query: &DiscoveryQuery,
        page: usize,
        page_size: usize,
    ) -> Result<(Vec<SkillSummary>, usize), SkillError> {
        let search = SearchQuery {
            text: query.q.clone(),
            category: query.category.clone(),
            language: query.language_filter(),
            sort: query.sort_key(),
            offset: (page - 1) * page_size,
            limit: page_size,
        };
        let SearchPage { ids, total } = index
            .search(&search)
            .await
            .map_err(SkillError::registry_internal)?;

        let mut summaries = Vec::with_capacity(ids.len());
        for skill_id in ids {
            // A hit may lag a concurrent delete; skip silently.
            if let Some(manifest) = self
                .metadata
                .get_skill(&skill_id, None)
                .await
                .map_err(SkillError::registry_internal)?
            {
                summaries.push(SkillSummary::from(&manifest));
            }
        }
        Ok((summaries, total))
    }

    async fn linear(
        &self,
        query: &DiscoveryQuery,
        page: usize,
        page_size: usize,
    ) -> Result<(Vec<SkillSummary>, usize), SkillError> {
        let all = self
            .metadata
            .list_skills()
            .await
            .map_err(SkillError::registry_internal)?;

        // Keep only the latest version per skill id.
        let mut latest: HashMap<String, SkillManifest> = HashMap::new();
        for manifest in all {
            match latest.get(&manifest.skill_id) {
                Some(existing) if existing.version >= manifest.version => {}
                _ => {
                    latest.insert(manifest.skill_id.clone(), manifest);
                }
            }
        }

        let language = query.language_filter();
        let mut hits: Vec<SkillManifest> = latest
            .into_values()
            .filter(|m| {
                if let Some(category) = &query.category {
                    if &m.category != category {
                        return false;
                    }
                }
                if let Some(language) = language {
                    if m.language != language {
                        return false;
                    }
                }
                if let Some(q) = &query.q {
                    return text_matches(m, q);
                }
                true
            })
            .collect();

        match query.sort_key() {
            SortKey::Name => hits.sort_by(|a, b| a.skill_name.cmp(&b.skill_name)),
            SortKey::Date => hits.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
            SortKey::Popularity => {
                hits.sort_by(|a, b| b.stats.popularity.cmp(&a.stats.popularity));
            }
        }

        let total = hits.len();
        let summaries = hits
            .iter()
            .skip((page - 1) * page_size)
            .take(page_size)
            .map(SkillSummary::from)
            .collect();
        Ok((summaries, total))
    }
}

fn text_matches(manifest: &SkillManifest, q: &str) -> bool {
    let haystack: Vec<String> = manifest
        .skill_name
        .split(|c: char| !c.is_alphanumeric())
        .chain(manifest.description.split(|c: char| !c.is_alphanumeric()))
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect();

    q.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .all(|needle| haystack.iter().any(|t| t == &needle || t.starts_with(&needle)))
}
