#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use pressroom::application::articles::ArticleService;
use pressroom::application::repos::EntityStore;
use pressroom::cache::{BackendError, CacheBackend, CacheConfig, CacheStore, MemoryBackend};
use pressroom::domain::articles::{ArticleWrite, NewArticle, NewAuthor, NewComment};
use pressroom::infra::memory::MemoryEntityStore;

/// A memory backend that can be switched off. While down, every call fails
/// with a connection error; `calls` counts the calls that reached it.
pub struct SwitchableBackend {
    inner: MemoryBackend,
    down: AtomicBool,
    calls: AtomicUsize,
}

impl SwitchableBackend {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            inner: MemoryBackend::new(config),
            down: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn memory(&self) -> &MemoryBackend {
        &self.inner
    }

    fn enter(&self) -> Result<(), BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            Err(BackendError::Connection("connection refused".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CacheBackend for SwitchableBackend {
    fn name(&self) -> &'static str {
        "switchable"
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, BackendError> {
        self.enter()?;
        self.inner.get(key).await
    }

    async fn set_ex(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), BackendError> {
        self.enter()?;
        self.inner.set_ex(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<u64, BackendError> {
        self.enter()?;
        self.inner.delete(key).await
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, BackendError> {
        self.enter()?;
        self.inner.delete_prefix(prefix).await
    }

    async fn ping(&self) -> Result<(), BackendError> {
        self.enter()?;
        self.inner.ping().await
    }
}

pub struct Fixture {
    pub store: Arc<MemoryEntityStore>,
    pub backend: Arc<SwitchableBackend>,
    pub cache: Arc<CacheStore>,
    pub service: ArticleService,
}

pub fn test_config() -> CacheConfig {
    CacheConfig {
        namespace: "test".to_string(),
        cooldown_ms: 100,
        op_timeout_ms: 500,
        ..CacheConfig::default()
    }
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: CacheConfig) -> Self {
        let store = Arc::new(MemoryEntityStore::new());
        let backend = Arc::new(SwitchableBackend::new(&config));
        let cache = Arc::new(CacheStore::new(backend.clone(), &config));
        let entity_store: Arc<dyn EntityStore> = store.clone();
        let service = ArticleService::new(entity_store, cache.clone(), config);
        Self {
            store,
            backend,
            cache,
            service,
        }
    }

    pub async fn author(&self, username: &str) -> i64 {
        self.service
            .create_author(NewAuthor {
                username: username.to_string(),
                email: format!("{username}@example.com"),
                display_name: Some(username.to_uppercase()),
                bio: None,
            })
            .await
            .expect("author should be created")
            .id
    }

    pub async fn article(&self, author_id: i64, title: &str, tags: &[&str]) -> i64 {
        self.service
            .write(ArticleWrite::Create(NewArticle {
                author_id,
                title: title.to_string(),
                content: format!("Body of {title}"),
                summary: Some(format!("About {title}")),
                is_published: true,
                tags: tags.iter().map(|tag| tag.to_string()).collect(),
            }))
            .await
            .expect("article should be created")
            .outcome
            .article_id
    }

    pub async fn comment(&self, article_id: i64, author_id: i64, content: &str) {
        self.service
            .write(ArticleWrite::Comment {
                article_id,
                comment: NewComment {
                    author_id,
                    content: content.to_string(),
                },
            })
            .await
            .expect("comment should be created");
    }
}
