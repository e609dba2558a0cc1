//! Records mirrored from persistent storage and the hydrated aggregates built
//! from them.
//!
//! Everything here round-trips through the cache codec, so timestamps carry an
//! explicit RFC 3339 representation that keeps sub-second precision.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleRecord {
    pub id: i64,
    pub author_id: i64,
    pub title: String,
    pub slug: String,
    pub content: String,
    pub summary: Option<String>,
    pub view_count: i64,
    pub is_published: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub published_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorRecord {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub display_name: Option<String>,
    pub bio: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagRecord {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentRecord {
    pub id: i64,
    pub article_id: i64,
    pub author_id: i64,
    pub content: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// An article with every relation resolved.
///
/// `commenters` holds each distinct comment author once, ordered by id, so a
/// comment's author is found by `author_id` without repeating the record per
/// comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HydratedArticle {
    pub article: ArticleRecord,
    pub author: AuthorRecord,
    pub tags: Vec<TagRecord>,
    pub comments: Vec<CommentRecord>,
    pub commenters: Vec<AuthorRecord>,
}

impl HydratedArticle {
    pub fn id(&self) -> i64 {
        self.article.id
    }

    pub fn commenter(&self, author_id: i64) -> Option<&AuthorRecord> {
        self.commenters
            .binary_search_by_key(&author_id, |author| author.id)
            .ok()
            .map(|index| &self.commenters[index])
    }
}

/// An article without its body or relations, as listed under its author.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleSummary {
    pub id: i64,
    pub title: String,
    pub slug: String,
    pub summary: Option<String>,
    pub view_count: i64,
    pub is_published: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub published_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<ArticleRecord> for ArticleSummary {
    fn from(article: ArticleRecord) -> Self {
        Self {
            id: article.id,
            title: article.title,
            slug: article.slug,
            summary: article.summary,
            view_count: article.view_count,
            is_published: article.is_published,
            published_at: article.published_at,
            created_at: article.created_at,
        }
    }
}

/// An author with every article they wrote, published or not, newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorDetail {
    pub author: AuthorRecord,
    pub articles: Vec<ArticleSummary>,
}

/// One window of a filtered, sorted article listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticlePage {
    pub items: Vec<HydratedArticle>,
    pub total: u64,
    pub offset: u64,
    pub limit: u32,
}

impl ArticlePage {
    pub fn empty(offset: u64, limit: u32) -> Self {
        Self {
            items: Vec::new(),
            total: 0,
            offset,
            limit,
        }
    }

    /// Number of pages of `limit` items needed to cover `total`.
    pub fn pages(&self) -> u64 {
        if self.limit == 0 {
            return 0;
        }
        self.total.div_ceil(u64::from(self.limit))
    }
}

/// Row counts across the content tables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentTotals {
    pub articles: u64,
    pub comments: u64,
    pub authors: u64,
}

impl ContentTotals {
    pub fn comments_per_article(&self) -> f64 {
        if self.articles == 0 {
            0.0
        } else {
            self.comments as f64 / self.articles as f64
        }
    }
}
