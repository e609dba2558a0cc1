//! Per-request diagnostics: how the cache answered and how many store queries
//! a read cost.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use async_trait::async_trait;
use metrics::counter;
use serde::Serialize;

use crate::application::repos::{
    ArticleFilter, ArticleQuery, EntityStore, IdSet, RelationKind, RepoError,
};
use crate::domain::articles::{ArticleWrite, NewAuthor, WriteOutcome};
use crate::domain::entities::{
    ArticleRecord, AuthorRecord, CommentRecord, ContentTotals, TagRecord,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheOutcome {
    Hit,
    Miss,
    /// The cache was disabled or unreachable; the store answered directly.
    Bypassed,
}

impl CacheOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Miss => "miss",
            Self::Bypassed => "bypassed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RequestStats {
    pub cache: CacheOutcome,
    pub store_queries: u32,
}

/// A read result with its diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct Loaded<T> {
    pub value: T,
    pub stats: RequestStats,
}

impl<T> Loaded<T> {
    pub fn hit(value: T) -> Self {
        Self {
            value,
            stats: RequestStats {
                cache: CacheOutcome::Hit,
                store_queries: 0,
            },
        }
    }

    pub fn into_inner(self) -> T {
        self.value
    }
}

/// Process-wide cache counters, the same numbers exported through `metrics`.
#[derive(Debug, Default)]
pub struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    bypassed: AtomicU64,
}

impl CacheCounters {
    pub fn record(&self, outcome: CacheOutcome) {
        let slot = match outcome {
            CacheOutcome::Hit => &self.hits,
            CacheOutcome::Miss => &self.misses,
            CacheOutcome::Bypassed => &self.bypassed,
        };
        slot.fetch_add(1, Ordering::Relaxed);
        counter!(outcome_metric(outcome)).increment(1);
    }

    pub fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            bypassed: self.bypassed.load(Ordering::Relaxed),
        }
    }
}

fn outcome_metric(outcome: CacheOutcome) -> &'static str {
    match outcome {
        CacheOutcome::Hit => "pressroom_cache_hit_total",
        CacheOutcome::Miss => "pressroom_cache_miss_total",
        CacheOutcome::Bypassed => "pressroom_cache_bypass_total",
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub bypassed: u64,
}

impl CacheStats {
    pub fn lookups(&self) -> u64 {
        self.hits + self.misses + self.bypassed
    }

    /// Share of reads answered from the cache, in percent.
    pub fn hit_rate(&self) -> f64 {
        match self.lookups() {
            0 => 0.0,
            total => self.hits as f64 * 100.0 / total as f64,
        }
    }
}

/// Wraps a store for the duration of one request and counts the queries it
/// actually issues. Calls with an empty id set issue none and are not counted.
pub(crate) struct CountingStore<'a> {
    inner: &'a dyn EntityStore,
    queries: AtomicU32,
}

impl<'a> CountingStore<'a> {
    pub(crate) fn new(inner: &'a dyn EntityStore) -> Self {
        Self {
            inner,
            queries: AtomicU32::new(0),
        }
    }

    pub(crate) fn queries(&self) -> u32 {
        self.queries.load(Ordering::Relaxed)
    }

    fn count(&self, issued: bool) {
        if issued {
            self.queries.fetch_add(1, Ordering::Relaxed);
            counter!("pressroom_store_query_total").increment(1);
        }
    }
}

#[async_trait]
impl EntityStore for CountingStore<'_> {
    async fn fetch_page(&self, query: &ArticleQuery) -> Result<Vec<ArticleRecord>, RepoError> {
        self.count(true);
        self.inner.fetch_page(query).await
    }

    async fn count_articles(&self, filter: &ArticleFilter) -> Result<u64, RepoError> {
        self.count(true);
        self.inner.count_articles(filter).await
    }

    async fn fetch_articles(
        &self,
        ids: &IdSet,
    ) -> Result<HashMap<i64, ArticleRecord>, RepoError> {
        self.count(!ids.is_empty());
        self.inner.fetch_articles(ids).await
    }

    async fn fetch_authors(&self, ids: &IdSet) -> Result<HashMap<i64, AuthorRecord>, RepoError> {
        self.count(!ids.is_empty());
        self.inner.fetch_authors(ids).await
    }

    async fn fetch_tags(&self, ids: &IdSet) -> Result<HashMap<i64, TagRecord>, RepoError> {
        self.count(!ids.is_empty());
        self.inner.fetch_tags(ids).await
    }

    async fn fetch_comments(
        &self,
        ids: &IdSet,
    ) -> Result<HashMap<i64, CommentRecord>, RepoError> {
        self.count(!ids.is_empty());
        self.inner.fetch_comments(ids).await
    }

    async fn fetch_relation_ids(
        &self,
        primary_ids: &IdSet,
        kind: RelationKind,
    ) -> Result<HashMap<i64, Vec<i64>>, RepoError> {
        self.count(!primary_ids.is_empty());
        self.inner.fetch_relation_ids(primary_ids, kind).await
    }

    async fn list_authors(&self) -> Result<Vec<AuthorRecord>, RepoError> {
        self.count(true);
        self.inner.list_authors().await
    }

    async fn fetch_author_articles(
        &self,
        author_ids: &IdSet,
    ) -> Result<HashMap<i64, Vec<ArticleRecord>>, RepoError> {
        self.count(!author_ids.is_empty());
        self.inner.fetch_author_articles(author_ids).await
    }

    async fn write(&self, op: &ArticleWrite) -> Result<WriteOutcome, RepoError> {
        self.count(true);
        self.inner.write(op).await
    }

    async fn create_author(&self, author: &NewAuthor) -> Result<AuthorRecord, RepoError> {
        self.count(true);
        self.inner.create_author(author).await
    }

    async fn totals(&self) -> Result<ContentTotals, RepoError> {
        self.count(true);
        self.inner.totals().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_rate_is_a_percentage() {
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            bypassed: 0,
        };
        assert_eq!(stats.hit_rate(), 75.0);
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }

    #[test]
    fn counters_track_each_outcome() {
        let counters = CacheCounters::default();
        counters.record(CacheOutcome::Hit);
        counters.record(CacheOutcome::Miss);
        counters.record(CacheOutcome::Miss);
        counters.record(CacheOutcome::Bypassed);

        let stats = counters.snapshot();
        assert_eq!((stats.hits, stats.misses, stats.bypassed), (1, 2, 1));
        assert_eq!(stats.lookups(), 4);
    }
}
