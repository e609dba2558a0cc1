//! In-process entity store.
//!
//! Mirrors the Postgres store's semantics closely enough to back local runs and
//! the integration tests: the same filters and ordering, the same error
//! mapping for missing rows and unknown authors, and cascade on delete. Every
//! issued query is recorded as a [`StoreCall`] so tests can assert on batching.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::application::repos::{
    ArticleFilter, ArticleQuery, EntityStore, IdSet, RelationKind, RepoError, SortDirection,
    SortField, empty_relation_map,
};
use crate::domain::articles::{
    ArticlePatch, ArticleWrite, NewArticle, NewAuthor, NewComment, WriteOutcome,
};
use crate::domain::entities::{
    ArticleRecord, AuthorRecord, CommentRecord, ContentTotals, TagRecord,
};
use crate::domain::slug::unique_slug_among;
use crate::util::lock::{mutex_lock, rw_read, rw_write};

const SOURCE: &str = "infra::memory";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    FetchPage,
    CountArticles,
    FetchArticles,
    FetchAuthors,
    FetchTags,
    FetchComments,
    RelationIds(RelationKind),
    ListAuthors,
    AuthorArticles,
    Write,
    CreateAuthor,
    Totals,
}

/// One query that reached the store. `ids` is the size of the id set for
/// set-oriented fetches and zero otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreCall {
    pub op: StoreOp,
    pub ids: usize,
}

#[derive(Default)]
struct Tables {
    next_article: i64,
    next_author: i64,
    next_tag: i64,
    next_comment: i64,
    articles: BTreeMap<i64, ArticleRecord>,
    authors: BTreeMap<i64, AuthorRecord>,
    tags: BTreeMap<i64, TagRecord>,
    article_tags: BTreeSet<(i64, i64)>,
    comments: BTreeMap<i64, CommentRecord>,
}

impl Tables {
    fn next_id(counter: &mut i64) -> i64 {
        *counter += 1;
        *counter
    }

    fn matches(&self, article: &ArticleRecord, filter: &ArticleFilter) -> bool {
        if filter
            .published
            .is_some_and(|published| article.is_published != published)
        {
            return false;
        }
        if filter
            .author_id
            .is_some_and(|author_id| article.author_id != author_id)
        {
            return false;
        }
        match filter.tag.as_deref() {
            Some(name) => self
                .tag_ids_of(article.id)
                .any(|tag_id| self.tags.get(&tag_id).is_some_and(|tag| tag.name == name)),
            None => true,
        }
    }

    fn tag_ids_of(&self, article_id: i64) -> impl Iterator<Item = i64> + '_ {
        self.article_tags
            .range((article_id, i64::MIN)..=(article_id, i64::MAX))
            .map(|(_, tag_id)| *tag_id)
    }

    fn ensure_author(&self, author_id: i64) -> Result<(), RepoError> {
        if self.authors.contains_key(&author_id) {
            Ok(())
        } else {
            Err(RepoError::InvalidInput {
                message: format!("author {author_id} does not exist"),
            })
        }
    }

    fn free_slug(&self, title: &str, own: Option<i64>) -> Result<String, RepoError> {
        let taken: HashSet<String> = self
            .articles
            .values()
            .filter(|article| Some(article.id) != own)
            .map(|article| article.slug.clone())
            .collect();
        unique_slug_among(title, &taken).map_err(|err| RepoError::InvalidInput {
            message: err.to_string(),
        })
    }

    fn replace_tags(&mut self, article_id: i64, names: &[String]) {
        let linked: Vec<(i64, i64)> = self
            .tag_ids_of(article_id)
            .map(|tag_id| (article_id, tag_id))
            .collect();
        for link in linked {
            self.article_tags.remove(&link);
        }

        for name in names {
            let existing = self
                .tags
                .values()
                .find(|tag| &tag.name == name)
                .map(|tag| tag.id);
            let tag_id = match existing {
                Some(id) => id,
                None => {
                    let id = Self::next_id(&mut self.next_tag);
                    self.tags.insert(
                        id,
                        TagRecord {
                            id,
                            name: name.clone(),
                        },
                    );
                    id
                }
            };
            self.article_tags.insert((article_id, tag_id));
        }
    }

    fn insert_article(&mut self, article: &NewArticle) -> Result<i64, RepoError> {
        self.ensure_author(article.author_id)?;
        let slug = self.free_slug(&article.title, None)?;
        let now = OffsetDateTime::now_utc();
        let id = Self::next_id(&mut self.next_article);

        self.articles.insert(
            id,
            ArticleRecord {
                id,
                author_id: article.author_id,
                title: article.title.clone(),
                slug,
                content: article.content.clone(),
                summary: article.summary.clone(),
                view_count: 0,
                is_published: article.is_published,
                published_at: article.is_published.then_some(now),
                created_at: now,
                updated_at: now,
            },
        );
        self.replace_tags(id, &article.tags);
        Ok(id)
    }

    fn update_article(&mut self, id: i64, patch: &ArticlePatch) -> Result<(), RepoError> {
        let current_title = self
            .articles
            .get(&id)
            .map(|article| article.title.clone())
            .ok_or(RepoError::NotFound)?;
        let slug = match patch.title.as_deref() {
            Some(title) if title != current_title => Some(self.free_slug(title, Some(id))?),
            _ => None,
        };

        let article = self.articles.get_mut(&id).ok_or(RepoError::NotFound)?;
        if let Some(title) = patch.title.as_ref() {
            article.title = title.clone();
        }
        if let Some(slug) = slug {
            article.slug = slug;
        }
        if let Some(content) = patch.content.as_ref() {
            article.content = content.clone();
        }
        if let Some(summary) = patch.summary.as_ref() {
            article.summary = summary.clone();
        }
        let now = OffsetDateTime::now_utc();
        if let Some(published) = patch.is_published {
            article.is_published = published;
        }
        if article.is_published && article.published_at.is_none() {
            article.published_at = Some(now);
        }
        article.updated_at = article.updated_at.max(now);

        if let Some(tags) = patch.tags.as_ref() {
            self.replace_tags(id, tags);
        }
        Ok(())
    }

    fn delete_article(&mut self, id: i64) -> Result<(), RepoError> {
        self.articles.remove(&id).ok_or(RepoError::NotFound)?;
        self.article_tags
            .retain(|(article_id, _)| *article_id != id);
        self.comments.retain(|_, comment| comment.article_id != id);
        Ok(())
    }

    fn insert_comment(&mut self, article_id: i64, comment: &NewComment) -> Result<(), RepoError> {
        if !self.articles.contains_key(&article_id) {
            return Err(RepoError::NotFound);
        }
        self.ensure_author(comment.author_id)?;
        let id = Self::next_id(&mut self.next_comment);
        self.comments.insert(
            id,
            CommentRecord {
                id,
                article_id,
                author_id: comment.author_id,
                content: comment.content.clone(),
                created_at: OffsetDateTime::now_utc(),
            },
        );
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryEntityStore {
    tables: RwLock<Tables>,
    calls: Mutex<Vec<StoreCall>>,
    offline: AtomicBool,
    drop_write_acks: AtomicBool,
}

impl MemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While offline every call fails with [`RepoError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// While set, writes are applied but answered with [`RepoError::Timeout`],
    /// as when a deadline fires after the commit reached the server.
    pub fn set_drop_write_acks(&self, drop: bool) {
        self.drop_write_acks.store(drop, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        mutex_lock(&self.calls, SOURCE, "calls").clone()
    }

    pub fn take_calls(&self) -> Vec<StoreCall> {
        std::mem::take(&mut *mutex_lock(&self.calls, SOURCE, "take_calls"))
    }

    pub fn calls_of(&self, op: StoreOp) -> Vec<StoreCall> {
        self.calls()
            .into_iter()
            .filter(|call| call.op == op)
            .collect()
    }

    /// Overwrite an article's view count. Reads never touch it, so tests and
    /// local data use this to exercise the `view_count` ordering.
    pub fn set_view_count(&self, article_id: i64, views: i64) -> Result<(), RepoError> {
        let mut tables = rw_write(&self.tables, SOURCE, "set_view_count");
        let article = tables
            .articles
            .get_mut(&article_id)
            .ok_or(RepoError::NotFound)?;
        article.view_count = views;
        Ok(())
    }

    fn record(&self, op: StoreOp, ids: usize) -> Result<(), RepoError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(RepoError::unavailable("memory store is offline"));
        }
        mutex_lock(&self.calls, SOURCE, "record").push(StoreCall { op, ids });
        Ok(())
    }

    fn select<T: Clone>(map: &BTreeMap<i64, T>, ids: &IdSet) -> HashMap<i64, T> {
        ids.iter()
            .filter_map(|id| map.get(id).map(|value| (*id, value.clone())))
            .collect()
    }
}

fn compare(a: &ArticleRecord, b: &ArticleRecord, field: SortField) -> CmpOrdering {
    match field {
        SortField::CreatedAt => a.created_at.cmp(&b.created_at),
        SortField::ViewCount => a.view_count.cmp(&b.view_count),
        SortField::Title => a.title.cmp(&b.title),
        SortField::PublishedAt => a.published_at.cmp(&b.published_at),
    }
}

fn order_page(rows: &mut [ArticleRecord], field: SortField, direction: SortDirection) {
    rows.sort_by(|a, b| {
        // Nulls sort last in either direction.
        if field == SortField::PublishedAt {
            match (a.published_at.is_none(), b.published_at.is_none()) {
                (true, false) => return CmpOrdering::Greater,
                (false, true) => return CmpOrdering::Less,
                _ => {}
            }
        }
        let ordering = compare(a, b, field).then(a.id.cmp(&b.id));
        match direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    });
}

#[async_trait]
impl EntityStore for MemoryEntityStore {
    async fn fetch_page(&self, query: &ArticleQuery) -> Result<Vec<ArticleRecord>, RepoError> {
        self.record(StoreOp::FetchPage, 0)?;
        let tables = rw_read(&self.tables, SOURCE, "fetch_page");
        let mut rows: Vec<ArticleRecord> = tables
            .articles
            .values()
            .filter(|article| tables.matches(article, &query.filter))
            .cloned()
            .collect();
        order_page(&mut rows, query.sort.field, query.sort.direction);

        let offset = usize::try_from(query.window.offset()).unwrap_or(usize::MAX);
        Ok(rows
            .into_iter()
            .skip(offset)
            .take(query.window.limit() as usize)
            .collect())
    }

    async fn count_articles(&self, filter: &ArticleFilter) -> Result<u64, RepoError> {
        self.record(StoreOp::CountArticles, 0)?;
        let tables = rw_read(&self.tables, SOURCE, "count_articles");
        Ok(tables
            .articles
            .values()
            .filter(|article| tables.matches(article, filter))
            .count() as u64)
    }

    async fn fetch_articles(
        &self,
        ids: &IdSet,
    ) -> Result<HashMap<i64, ArticleRecord>, RepoError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        self.record(StoreOp::FetchArticles, ids.len())?;
        let tables = rw_read(&self.tables, SOURCE, "fetch_articles");
        Ok(Self::select(&tables.articles, ids))
    }

    async fn fetch_authors(&self, ids: &IdSet) -> Result<HashMap<i64, AuthorRecord>, RepoError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        self.record(StoreOp::FetchAuthors, ids.len())?;
        let tables = rw_read(&self.tables, SOURCE, "fetch_authors");
        Ok(Self::select(&tables.authors, ids))
    }

    async fn fetch_tags(&self, ids: &IdSet) -> Result<HashMap<i64, TagRecord>, RepoError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        self.record(StoreOp::FetchTags, ids.len())?;
        let tables = rw_read(&self.tables, SOURCE, "fetch_tags");
        Ok(Self::select(&tables.tags, ids))
    }

    async fn fetch_comments(
        &self,
        ids: &IdSet,
    ) -> Result<HashMap<i64, CommentRecord>, RepoError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        self.record(StoreOp::FetchComments, ids.len())?;
        let tables = rw_read(&self.tables, SOURCE, "fetch_comments");
        Ok(Self::select(&tables.comments, ids))
    }

    async fn fetch_relation_ids(
        &self,
        primary_ids: &IdSet,
        kind: RelationKind,
    ) -> Result<HashMap<i64, Vec<i64>>, RepoError> {
        let mut links = empty_relation_map(primary_ids);
        if primary_ids.is_empty() {
            return Ok(links);
        }
        self.record(StoreOp::RelationIds(kind), primary_ids.len())?;
        let tables = rw_read(&self.tables, SOURCE, "fetch_relation_ids");

        match kind {
            RelationKind::Tags => {
                for (article_id, tag_id) in &tables.article_tags {
                    if let Some(related) = links.get_mut(article_id) {
                        related.push(*tag_id);
                    }
                }
            }
            RelationKind::Comments => {
                let mut comments: Vec<&CommentRecord> = tables
                    .comments
                    .values()
                    .filter(|comment| primary_ids.contains(&comment.article_id))
                    .collect();
                comments.sort_by_key(|comment| (comment.created_at, comment.id));
                for comment in comments {
                    if let Some(related) = links.get_mut(&comment.article_id) {
                        related.push(comment.id);
                    }
                }
            }
        }
        Ok(links)
    }

    async fn write(&self, op: &ArticleWrite) -> Result<WriteOutcome, RepoError> {
        self.record(StoreOp::Write, 0)?;
        let mut tables = rw_write(&self.tables, SOURCE, "write");

        let article_id = match op {
            ArticleWrite::Create(article) => tables.insert_article(article)?,
            ArticleWrite::Update { id, patch } => {
                tables.update_article(*id, patch)?;
                *id
            }
            ArticleWrite::Delete { id } => {
                tables.delete_article(*id)?;
                *id
            }
            ArticleWrite::Comment {
                article_id,
                comment,
            } => {
                tables.insert_comment(*article_id, comment)?;
                *article_id
            }
        };

        if self.drop_write_acks.load(Ordering::SeqCst) {
            return Err(RepoError::Timeout);
        }
        Ok(WriteOutcome {
            article_id,
            kind: op.kind(),
        })
    }

    async fn list_authors(&self) -> Result<Vec<AuthorRecord>, RepoError> {
        self.record(StoreOp::ListAuthors, 0)?;
        let tables = rw_read(&self.tables, SOURCE, "list_authors");
        let mut authors: Vec<AuthorRecord> = tables.authors.values().cloned().collect();
        authors.sort_by(|a, b| newest_first((a.created_at, a.id), (b.created_at, b.id)));
        Ok(authors)
    }

    async fn fetch_author_articles(
        &self,
        author_ids: &IdSet,
    ) -> Result<HashMap<i64, Vec<ArticleRecord>>, RepoError> {
        if author_ids.is_empty() {
            return Ok(HashMap::new());
        }
        self.record(StoreOp::AuthorArticles, author_ids.len())?;
        let tables = rw_read(&self.tables, SOURCE, "fetch_author_articles");

        let mut by_author: HashMap<i64, Vec<ArticleRecord>> =
            author_ids.iter().map(|id| (*id, Vec::new())).collect();
        for article in tables.articles.values() {
            if let Some(articles) = by_author.get_mut(&article.author_id) {
                articles.push(article.clone());
            }
        }
        for articles in by_author.values_mut() {
            articles.sort_by(|a, b| newest_first((a.created_at, a.id), (b.created_at, b.id)));
        }
        Ok(by_author)
    }

    async fn create_author(&self, author: &NewAuthor) -> Result<AuthorRecord, RepoError> {
        self.record(StoreOp::CreateAuthor, 0)?;
        let mut tables = rw_write(&self.tables, SOURCE, "create_author");

        for existing in tables.authors.values() {
            if existing.username == author.username {
                return Err(RepoError::Duplicate {
                    constraint: "authors_username_key".to_string(),
                });
            }
            if existing.email == author.email {
                return Err(RepoError::Duplicate {
                    constraint: "authors_email_key".to_string(),
                });
            }
        }

        let id = Tables::next_id(&mut tables.next_author);
        let record = AuthorRecord {
            id,
            username: author.username.clone(),
            email: author.email.clone(),
            display_name: author.display_name.clone(),
            bio: author.bio.clone(),
            created_at: OffsetDateTime::now_utc(),
        };
        tables.authors.insert(id, record.clone());
        Ok(record)
    }

    async fn totals(&self) -> Result<ContentTotals, RepoError> {
        self.record(StoreOp::Totals, 0)?;
        let tables = rw_read(&self.tables, SOURCE, "totals");
        Ok(ContentTotals {
            articles: tables.articles.len() as u64,
            comments: tables.comments.len() as u64,
            authors: tables.authors.len() as u64,
        })
    }
}

fn newest_first(a: (OffsetDateTime, i64), b: (OffsetDateTime, i64)) -> CmpOrdering {
    b.cmp(&a)
}
