//! Search collaborator interface.
//!
//! The engine's relationship search scopes a text query to the one-hop
//! neighborhood of an entity and delegates the actual matching to a
//! [`SearchService`]. Ranking internals are out of scope here; the bundled
//! [`TitleSearch`] does a case-insensitive substring match over entity
//! titles, which is enough for the CLI and for embedders without a search
//! cluster.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::store::Store;

/// Query handed to the search collaborator.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub search_term: Option<String>,
    /// Shared ids the search is scoped to.
    pub ids: Vec<String>,
    /// Relationship search always curates internally, published or not.
    pub include_unpublished: bool,
    pub limit: usize,
}

/// A matching entity row.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub shared_id: String,
}

/// Search response rows, in relevance order.
#[derive(Debug, Clone, Default)]
pub struct SearchHits {
    pub rows: Vec<SearchHit>,
}

/// Full-text search collaborator.
#[async_trait]
pub trait SearchService: Send + Sync {
    async fn search(
        &self,
        query: &SearchQuery,
        language: &str,
        user: Option<&str>,
    ) -> Result<SearchHits>;
}

/// Store-backed substring search over entity titles.
pub struct TitleSearch {
    store: Arc<dyn Store>,
}

impl TitleSearch {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl SearchService for TitleSearch {
    async fn search(
        &self,
        query: &SearchQuery,
        language: &str,
        user: Option<&str>,
    ) -> Result<SearchHits> {
        let term = query
            .search_term
            .as_deref()
            .unwrap_or("")
            .trim()
            .to_lowercase();

        let mut rows = Vec::new();
        for shared_id in &query.ids {
            let entity = match self.store.entity_by_shared_id(shared_id, language).await? {
                Some(entity) => entity,
                None => continue,
            };
            if !query.include_unpublished
                && user.is_none()
                && entity.published != Some(true)
            {
                continue;
            }
            if term.is_empty() || entity.title.to_lowercase().contains(&term) {
                rows.push(SearchHit {
                    shared_id: entity.shared_id,
                });
            }
        }
        rows.truncate(query.limit);
        Ok(SearchHits { rows })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Entity, EntityKind};
    use crate::store::memory::MemoryStore;

    fn entity(shared_id: &str, title: &str, published: bool) -> Entity {
        Entity {
            id: format!("{shared_id}-en"),
            shared_id: shared_id.to_string(),
            language: "en".to_string(),
            title: title.to_string(),
            kind: EntityKind::Entity,
            template: None,
            published: Some(published),
            creation_date: 0,
            file: None,
            metadata: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_title_search_scopes_to_ids() {
        let store = Arc::new(MemoryStore::new());
        store.seed_entity(entity("a", "alpha report", true));
        store.seed_entity(entity("b", "beta report", true));
        store.seed_entity(entity("c", "alpha appendix", true));

        let search = TitleSearch::new(store);
        let hits = search
            .search(
                &SearchQuery {
                    search_term: Some("alpha".to_string()),
                    ids: vec!["a".to_string(), "b".to_string()],
                    include_unpublished: true,
                    limit: 10,
                },
                "en",
                None,
            )
            .await
            .unwrap();

        let ids: Vec<&str> = hits.rows.iter().map(|r| r.shared_id.as_str()).collect();
        assert_eq!(ids, vec!["a"]);
    }

    #[tokio::test]
    async fn test_title_search_includes_unpublished_when_asked() {
        let store = Arc::new(MemoryStore::new());
        store.seed_entity(entity("a", "draft", false));

        let search = TitleSearch::new(store);
        let query = SearchQuery {
            search_term: None,
            ids: vec!["a".to_string()],
            include_unpublished: true,
            limit: 10,
        };
        let hits = search.search(&query, "en", None).await.unwrap();
        assert_eq!(hits.rows.len(), 1);

        let query = SearchQuery {
            include_unpublished: false,
            ..query
        };
        let hits = search.search(&query, "en", None).await.unwrap();
        assert!(hits.rows.is_empty());
    }
}
