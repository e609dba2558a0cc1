//! Read-through caching for article reads and invalidation on writes.
//!
//! Reads go `lookup -> (hit | miss) -> load -> store -> return`. Only the store
//! step is best-effort: a cache that is down, slow or full never fails a read.
//! Writes commit to the entity store first and then drop the article's detail
//! entry and every cached list page.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use metrics::counter;
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::application::diagnostics::{
    CacheCounters, CacheOutcome, CacheStats, CountingStore, Loaded, RequestStats,
};
use crate::application::error::AppError;
use crate::application::loader;
use crate::application::repos::{ArticleQuery, EntityStore, RepoError};
use crate::cache::{CacheConfig, CacheShape, CacheStore, KeySpace, codec};
use crate::domain::articles::{ArticleWrite, NewAuthor, WriteOutcome};
use crate::domain::entities::{
    ArticlePage, AuthorDetail, AuthorRecord, ContentTotals, HydratedArticle,
};

const SOURCE: &str = "application::articles";

/// Result of a committed write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteReceipt {
    pub outcome: WriteOutcome,
    /// False when the cache could not be cleared; stale entries then live until
    /// their TTL runs out.
    pub cache_invalidated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Overview {
    pub totals: ContentTotals,
    pub cache: CacheStats,
    pub cache_backend: &'static str,
    pub cache_available: bool,
}

enum Lookup<T> {
    Hit(T),
    Miss,
    Bypassed,
}

#[derive(Clone)]
pub struct ArticleService {
    store: Arc<dyn EntityStore>,
    cache: Arc<CacheStore>,
    keys: KeySpace,
    config: CacheConfig,
    counters: Arc<CacheCounters>,
    /// Bumped on every invalidation; fills started before a bump are dropped.
    epoch: Arc<AtomicU64>,
}

impl ArticleService {
    pub fn new(store: Arc<dyn EntityStore>, cache: Arc<CacheStore>, config: CacheConfig) -> Self {
        Self {
            store,
            cache,
            keys: KeySpace::new(config.namespace.clone()),
            config,
            counters: Arc::new(CacheCounters::default()),
            epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn keys(&self) -> &KeySpace {
        &self.keys
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.counters.snapshot()
    }

    pub async fn read_list(&self, query: &ArticleQuery) -> Result<Loaded<ArticlePage>, AppError> {
        let key = self.keys.list(query);
        let lookup = self.lookup::<ArticlePage>(&key).await?;
        let outcome = match lookup {
            Lookup::Hit(page) => return Ok(Loaded::hit(page)),
            Lookup::Miss => CacheOutcome::Miss,
            Lookup::Bypassed => CacheOutcome::Bypassed,
        };

        let epoch = self.epoch.load(Ordering::Acquire);
        let counting = CountingStore::new(self.store.as_ref());
        let page = loader::load_page(&counting, query).await?;
        if self.config.enabled {
            self.fill(&key, &page, self.config.list_ttl(), epoch).await;
        }

        Ok(Loaded {
            value: page,
            stats: RequestStats {
                cache: outcome,
                store_queries: counting.queries(),
            },
        })
    }

    pub async fn read_one(&self, id: i64) -> Result<Loaded<HydratedArticle>, AppError> {
        let key = self.keys.detail(id);
        let lookup = self.lookup::<HydratedArticle>(&key).await?;
        let outcome = match lookup {
            Lookup::Hit(article) => return Ok(Loaded::hit(article)),
            Lookup::Miss => CacheOutcome::Miss,
            Lookup::Bypassed => CacheOutcome::Bypassed,
        };

        let epoch = self.epoch.load(Ordering::Acquire);
        let counting = CountingStore::new(self.store.as_ref());
        let article = loader::load_one(&counting, id)
            .await?
            .ok_or(AppError::NotFound)?;
        if self.config.enabled {
            self.fill(&key, &article, self.config.detail_ttl(), epoch)
                .await;
        }

        Ok(Loaded {
            value: article,
            stats: RequestStats {
                cache: outcome,
                store_queries: counting.queries(),
            },
        })
    }

    /// Validate, commit, then invalidate. A failed commit leaves the cache
    /// untouched, except after a deadline: the commit may still have landed, so
    /// the affected entries are dropped anyway.
    pub async fn write(&self, mut op: ArticleWrite) -> Result<WriteReceipt, AppError> {
        op.validate()?;
        let outcome = match self.store.write(&op).await {
            Ok(outcome) => outcome,
            Err(RepoError::Timeout) => {
                let cache_invalidated = self.invalidate(op.target_id()).await;
                warn!(
                    target: SOURCE,
                    article_id = op.target_id(),
                    kind = op.kind().as_str(),
                    cache_invalidated,
                    "article write timed out with unknown outcome"
                );
                return Err(RepoError::Timeout.into());
            }
            Err(err) => return Err(err.into()),
        };
        let cache_invalidated = self.invalidate(Some(outcome.article_id)).await;

        debug!(
            target: SOURCE,
            article_id = outcome.article_id,
            kind = outcome.kind.as_str(),
            cache_invalidated,
            "article write committed"
        );

        Ok(WriteReceipt {
            outcome,
            cache_invalidated,
        })
    }

    pub async fn create_author(&self, author: NewAuthor) -> Result<AuthorRecord, AppError> {
        author.validate()?;
        Ok(self.store.create_author(&author).await?)
    }

    /// Every author, newest first. Not cached.
    pub async fn list_authors(&self) -> Result<Vec<AuthorRecord>, AppError> {
        Ok(self.store.list_authors().await?)
    }

    /// An author and their article summaries, read straight from the store.
    pub async fn read_author(&self, id: i64) -> Result<Loaded<AuthorDetail>, AppError> {
        let counting = CountingStore::new(self.store.as_ref());
        let detail = loader::load_author(&counting, id)
            .await?
            .ok_or(AppError::NotFound)?;

        Ok(Loaded {
            value: detail,
            stats: RequestStats {
                cache: CacheOutcome::Bypassed,
                store_queries: counting.queries(),
            },
        })
    }

    pub async fn overview(&self) -> Result<Overview, AppError> {
        let totals = self.store.totals().await?;
        Ok(Overview {
            totals,
            cache: self.cache_stats(),
            cache_backend: self.cache.backend_name(),
            cache_available: self.cache.is_available(),
        })
    }

    async fn lookup<T: CacheShape>(&self, key: &str) -> Result<Lookup<T>, AppError> {
        if !self.config.enabled || !self.cache.is_available() {
            self.counters.record(CacheOutcome::Bypassed);
            return Ok(Lookup::Bypassed);
        }

        match self.cache.get(key).await {
            Ok(Some(bytes)) => match codec::decode::<T>(&bytes) {
                Ok(value) => {
                    self.counters.record(CacheOutcome::Hit);
                    Ok(Lookup::Hit(value))
                }
                Err(err) => {
                    counter!("pressroom_cache_corrupt_total").increment(1);
                    error!(target: SOURCE, key, error = %err, "cached entry could not be decoded");
                    // Drop the entry so the next read reloads it.
                    let _ = self.cache.delete_exact(key).await;
                    Err(AppError::Serialization(err))
                }
            },
            Ok(None) => {
                self.counters.record(CacheOutcome::Miss);
                Ok(Lookup::Miss)
            }
            Err(_) => {
                self.counters.record(CacheOutcome::Bypassed);
                Ok(Lookup::Bypassed)
            }
        }
    }

    async fn fill<T: CacheShape>(&self, key: &str, value: &T, ttl: Duration, epoch: u64) {
        if self.epoch.load(Ordering::Acquire) != epoch {
            debug!(target: SOURCE, key, "write landed during load, skipping cache fill");
            return;
        }

        let bytes = match codec::encode(value) {
            Ok(bytes) => bytes,
            Err(err) => {
                counter!("pressroom_cache_fill_failed_total", "reason" => "encode").increment(1);
                warn!(target: SOURCE, key, error = %err, "failed to encode value for caching");
                return;
            }
        };

        if self.cache.set_with_ttl(key, bytes, ttl).await.is_err() {
            counter!("pressroom_cache_fill_failed_total", "reason" => "unavailable").increment(1);
            debug!(target: SOURCE, key, "cache fill skipped, backend unavailable");
        }
    }

    /// Drop the detail entry, when there is one, and every list page. Returns
    /// false when either deletion could not be carried out.
    async fn invalidate(&self, article_id: Option<i64>) -> bool {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        if !self.config.enabled {
            return true;
        }

        let detail = match article_id {
            Some(id) => self.cache.delete_exact(&self.keys.detail(id)).await.map(|_| ()),
            None => Ok(()),
        };
        let list_prefix = self.keys.list_prefix();
        let lists = self.cache.delete_by_prefix(&list_prefix).await;

        match (detail, lists) {
            (Ok(_), Ok(removed_lists)) => {
                debug!(
                    target: SOURCE,
                    article_id,
                    removed_lists,
                    "cache invalidated after write"
                );
                true
            }
            (detail, lists) => {
                counter!("pressroom_cache_invalidation_failed_total").increment(1);
                warn!(
                    target: SOURCE,
                    article_id,
                    detail_cleared = detail.is_ok(),
                    lists_cleared = lists.is_ok(),
                    "cache invalidation failed, stale entries expire with their TTL"
                );
                false
            }
        }
    }
}
