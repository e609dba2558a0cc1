//! Cache key derivation.
//!
//! Keys are plain strings so any backend can store them:
//!
//! - detail: `{ns}:articles:detail:{id}`
//! - list:   `{ns}:articles:list:pub=..../author=..../tag=..../sort=..../offset=N/limit=N`
//!
//! Every list parameter is encoded. The tag name is the only free text and is
//! length-prefixed (`tag=5.redis`), so no two distinct queries share a key.

use std::fmt::Write as _;

use crate::application::repos::ArticleQuery;

const ARTICLES_DETAIL: &str = "articles:detail:";
const ARTICLES_LIST: &str = "articles:list:";

/// Key builder bound to one namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    namespace: String,
}

impl KeySpace {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn detail(&self, article_id: i64) -> String {
        format!("{}:{ARTICLES_DETAIL}{article_id}", self.namespace)
    }

    pub fn list(&self, query: &ArticleQuery) -> String {
        let mut key = self.list_prefix();
        push_list_params(&mut key, query);
        key
    }

    /// Prefix shared by every list key; deleting by it drops all cached pages.
    pub fn list_prefix(&self) -> String {
        format!("{}:{ARTICLES_LIST}", self.namespace)
    }
}

fn push_list_params(key: &mut String, query: &ArticleQuery) {
    let filter = &query.filter;

    key.push_str("pub=");
    match filter.published {
        Some(true) => key.push_str("true"),
        Some(false) => key.push_str("false"),
        None => key.push_str("any"),
    }

    key.push_str("/author=");
    match filter.author_id {
        Some(id) => {
            let _ = write!(key, "{id}");
        }
        None => key.push_str("any"),
    }

    key.push_str("/tag=");
    match filter.tag.as_deref() {
        Some(tag) => {
            let _ = write!(key, "{}.{tag}", tag.len());
        }
        None => key.push('-'),
    }

    let _ = write!(
        key,
        "/sort={}.{}/offset={}/limit={}",
        query.sort.field.as_str(),
        query.sort.direction.as_str(),
        query.window.offset(),
        query.window.limit()
    );
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::application::pagination::{MAX_PAGE_SIZE, PageWindow};
    use crate::application::repos::{ArticleFilter, ArticleSort, SortDirection, SortField};

    fn keys() -> KeySpace {
        KeySpace::new("test")
    }

    #[test]
    fn detail_key_format() {
        assert_eq!(keys().detail(42), "test:articles:detail:42");
    }

    #[test]
    fn list_key_is_deterministic() {
        let query = ArticleQuery {
            filter: ArticleFilter::published(),
            ..Default::default()
        };
        assert_eq!(keys().list(&query), keys().list(&query.clone()));
        assert_eq!(
            keys().list(&query),
            "test:articles:list:pub=true/author=any/tag=-/sort=created_at.desc/offset=0/limit=20"
        );
    }

    #[test]
    fn list_keys_share_the_invalidation_prefix() {
        let query = ArticleQuery::default();
        assert!(keys().list(&query).starts_with(&keys().list_prefix()));
        assert!(!keys().detail(1).starts_with(&keys().list_prefix()));
    }

    #[test]
    fn every_parameter_changes_the_key() {
        let base = ArticleQuery::default();
        let variants = vec![
            base.clone(),
            ArticleQuery {
                filter: ArticleFilter {
                    published: Some(false),
                    ..Default::default()
                },
                ..base.clone()
            },
            ArticleQuery {
                filter: ArticleFilter {
                    author_id: Some(7),
                    ..Default::default()
                },
                ..base.clone()
            },
            ArticleQuery {
                filter: ArticleFilter {
                    tag: Some("rust".into()),
                    ..Default::default()
                },
                ..base.clone()
            },
            ArticleQuery {
                sort: ArticleSort {
                    field: SortField::Title,
                    direction: SortDirection::Desc,
                },
                ..base.clone()
            },
            ArticleQuery {
                sort: ArticleSort {
                    field: SortField::CreatedAt,
                    direction: SortDirection::Asc,
                },
                ..base.clone()
            },
            ArticleQuery {
                window: PageWindow::new(20, 20, MAX_PAGE_SIZE),
                ..base.clone()
            },
            ArticleQuery {
                window: PageWindow::new(0, 50, MAX_PAGE_SIZE),
                ..base.clone()
            },
        ];

        let distinct: HashSet<String> = variants.iter().map(|q| keys().list(q)).collect();
        assert_eq!(distinct.len(), variants.len());
    }

    #[test]
    fn tag_text_cannot_forge_another_query() {
        let forged = ArticleQuery {
            filter: ArticleFilter {
                tag: Some("a/sort=title.asc".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        let plain = ArticleQuery {
            filter: ArticleFilter {
                tag: Some("a".into()),
                ..Default::default()
            },
            sort: ArticleSort {
                field: SortField::Title,
                direction: SortDirection::Asc,
            },
            ..Default::default()
        };
        assert_ne!(keys().list(&forged), keys().list(&plain));
    }

    #[test]
    fn namespaces_are_isolated() {
        assert_ne!(KeySpace::new("a").detail(1), KeySpace::new("b").detail(1));
    }
}
