//! Repository traits describing persistence adapters.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use thiserror::Error;

use crate::application::pagination::PageWindow;
use crate::domain::articles::{ArticleWrite, NewAuthor, WriteOutcome};
use crate::domain::entities::{
    ArticleRecord, AuthorRecord, CommentRecord, ContentTotals, TagRecord,
};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("store unreachable: {0}")]
    Unavailable(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }

    pub fn unavailable(err: impl std::fmt::Display) -> Self {
        Self::Unavailable(err.to_string())
    }

    /// Connectivity failures and deadline overruns, as opposed to rejected data.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout)
    }
}

/// Sorted unique identifiers handed to the set-oriented fetches.
pub type IdSet = BTreeSet<i64>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ArticleFilter {
    pub published: Option<bool>,
    pub author_id: Option<i64>,
    pub tag: Option<String>,
}

impl ArticleFilter {
    pub fn published() -> Self {
        Self {
            published: Some(true),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SortField {
    #[default]
    CreatedAt,
    PublishedAt,
    ViewCount,
    Title,
}

impl SortField {
    /// Resolve a client-supplied column name; anything unknown sorts by creation time.
    pub fn from_param(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "published_at" => Self::PublishedAt,
            "view_count" => Self::ViewCount,
            "title" => Self::Title,
            _ => Self::CreatedAt,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::CreatedAt => "created_at",
            Self::PublishedAt => "published_at",
            Self::ViewCount => "view_count",
            Self::Title => "title",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    pub fn from_param(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("asc") {
            Self::Asc
        } else {
            Self::Desc
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ArticleSort {
    pub field: SortField,
    pub direction: SortDirection,
}

/// Everything that shapes one list read. Two equal queries always produce the
/// same cache key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ArticleQuery {
    pub filter: ArticleFilter,
    pub sort: ArticleSort,
    pub window: PageWindow,
}

/// One-to-many relations keyed by the primary article id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationKind {
    Tags,
    Comments,
}

impl RelationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tags => "tags",
            Self::Comments => "comments",
        }
    }
}

/// Set-oriented access to the article tables.
///
/// Every `fetch_*` taking an [`IdSet`] must return an empty map without
/// touching the backend when the set is empty.
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn fetch_page(&self, query: &ArticleQuery) -> Result<Vec<ArticleRecord>, RepoError>;

    async fn count_articles(&self, filter: &ArticleFilter) -> Result<u64, RepoError>;

    async fn fetch_articles(&self, ids: &IdSet)
    -> Result<HashMap<i64, ArticleRecord>, RepoError>;

    async fn fetch_authors(&self, ids: &IdSet) -> Result<HashMap<i64, AuthorRecord>, RepoError>;

    async fn fetch_tags(&self, ids: &IdSet) -> Result<HashMap<i64, TagRecord>, RepoError>;

    async fn fetch_comments(&self, ids: &IdSet)
    -> Result<HashMap<i64, CommentRecord>, RepoError>;

    /// Related ids per primary id. Every requested primary id is present in the
    /// result, with an empty vector when it has no related rows.
    async fn fetch_relation_ids(
        &self,
        primary_ids: &IdSet,
        kind: RelationKind,
    ) -> Result<HashMap<i64, Vec<i64>>, RepoError>;

    /// Every author, newest first.
    async fn list_authors(&self) -> Result<Vec<AuthorRecord>, RepoError>;

    /// Articles per author id, newest first, in one query. Every requested
    /// author id is present in the result, with an empty vector when the author
    /// has written nothing.
    async fn fetch_author_articles(
        &self,
        author_ids: &IdSet,
    ) -> Result<HashMap<i64, Vec<ArticleRecord>>, RepoError>;

    async fn write(&self, op: &ArticleWrite) -> Result<WriteOutcome, RepoError>;

    async fn create_author(&self, author: &NewAuthor) -> Result<AuthorRecord, RepoError>;

    async fn totals(&self) -> Result<ContentTotals, RepoError>;
}

/// Seed an id -> relations map with an empty entry for every requested id.
pub fn empty_relation_map(primary_ids: &IdSet) -> HashMap<i64, Vec<i64>> {
    primary_ids.iter().map(|id| (*id, Vec::new())).collect()
}
